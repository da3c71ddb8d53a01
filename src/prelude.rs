// Codecs
pub use crate::codec::{Codec, FieldMap, TypeName, TypeRegistry};

// Stores
pub use crate::store::{BlockMode, MemoryStore, RedisStore, StreamStore};

// Publishing and subscribing
pub use crate::stream::{
    AckTarget, BootstrapState, CursorSubscriber, GroupOptions, GroupSubscriber, ReadResult,
    StreamPub, SubResult, Subscription,
};

// Errors
pub use crate::errors::{BoxError, Error, ErrorKind, Result};

// Configuration
pub use crate::common::config::{GroupConfig, PublisherConfig, QStreamConfig, RedisConfig};
pub use crate::utils::logger::{LoggerConfig, init_logger};

pub use tokio_util::sync::CancellationToken;
