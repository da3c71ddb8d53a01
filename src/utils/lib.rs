pub mod connector;
pub mod logger;
