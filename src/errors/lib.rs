pub mod error;

pub use error::{
    BoxError, CodecError, ConfigError, Error, ErrorKind, Result, StoreError, StreamError,
};
