//! Configuration shared by publishers, subscribers and the Redis connector.

pub mod config;
