//! qstream: typed publish/subscribe over ordered log streams.
//!
//! Values are encoded into flat field maps by a [`codec::Codec`], appended to a
//! stream key by a [`stream::StreamPub`] and read back, per key and in store
//! order, by a [`stream::Subscription`]. The log itself sits behind
//! [`store::StreamStore`]; [`store::RedisStore`] speaks Redis Streams and
//! [`store::MemoryStore`] keeps everything in process.

pub mod prelude;

#[path = "codec/lib.rs"]
pub mod codec;
#[path = "common/lib.rs"]
pub mod common;
#[path = "errors/lib.rs"]
pub mod errors;
#[path = "store/lib.rs"]
pub mod store;
#[path = "stream/lib.rs"]
pub mod stream;
#[path = "utils/lib.rs"]
pub mod utils;
