//! The ordered-log store the publisher and subscribers talk to.
//!
//! [`StreamStore`] is the command contract; [`RedisStore`] speaks it to Redis
//! Streams and [`MemoryStore`] keeps everything in process.

pub mod memory;
pub mod redis;

use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::codec::FieldMap;
use crate::errors::Result;

pub use self::memory::MemoryStore;
pub use self::redis::RedisStore;

/// Cursor for a plain read: only entries appended after the call started.
pub const NEW_ENTRIES: &str = "$";
/// Cursor for a group read: entries never delivered to any consumer of the group.
pub const UNDELIVERED: &str = ">";
/// Cursor that starts from the beginning of the stream (or of the pending list in
/// a group read).
pub const FROM_START: &str = "0";

/// How long a read may wait for data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockMode {
    /// Wait until data arrives or the read is cancelled.
    Forever,
    /// Return immediately.
    NoWait,
    /// Wait at most this long.
    For(Duration),
}

impl BlockMode {
    /// Negative waits forever, zero polls, positive waits that many milliseconds.
    pub fn from_millis(millis: i64) -> Self {
        match millis {
            m if m < 0 => BlockMode::Forever,
            0 => BlockMode::NoWait,
            m => BlockMode::For(Duration::from_millis(m as u64)),
        }
    }
}

impl From<Duration> for BlockMode {
    fn from(value: Duration) -> Self {
        if value.is_zero() {
            BlockMode::NoWait
        } else {
            BlockMode::For(value)
        }
    }
}

/// One entry of a stream. An empty field map means the store trimmed the payload
/// while the id was still referenced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamEntry {
    pub id: String,
    pub fields: FieldMap,
}

/// Entries read from one stream key, in store order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamBatch {
    pub key: String,
    pub entries: Vec<StreamEntry>,
}

/// Outcome of creating a consumer group.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroupCreate {
    Created,
    AlreadyExists,
    NoSuchStream,
}

#[derive(Debug, Clone, Copy)]
pub struct ReadRequest<'a> {
    pub keys: &'a [String],
    /// One cursor per key, paired by position.
    pub cursors: &'a [String],
    /// Upper bound of entries per key; zero means no bound.
    pub count: usize,
    pub block: BlockMode,
}

#[derive(Debug, Clone, Copy)]
pub struct GroupReadRequest<'a> {
    pub group: &'a str,
    pub consumer: &'a str,
    /// Acknowledge on delivery.
    pub no_ack: bool,
    pub read: ReadRequest<'a>,
}

/// Command contract of an append-only, per-key ordered log with consumer groups.
///
/// Implementations report store failures as errors of kind
/// [`ErrorKind::Store`](crate::errors::ErrorKind::Store) and never retry. A read
/// that times out without data fails with
/// [`StoreError::NoData`](crate::errors::StoreError::NoData). A read whose
/// `cancel` token fires must unblock promptly and fail with
/// [`StreamError::Cancelled`](crate::errors::StreamError::Cancelled).
#[async_trait]
pub trait StreamStore: Send + Sync {
    /// Appends one entry and returns its id. `max_len` bounds the stream length
    /// approximately; zero leaves it unbounded.
    async fn append(&self, key: &str, max_len: usize, fields: &FieldMap) -> Result<String>;

    async fn read(
        &self,
        request: &ReadRequest<'_>,
        cancel: &CancellationToken,
    ) -> Result<Vec<StreamBatch>>;

    async fn create_group(&self, key: &str, group: &str, start_id: &str) -> Result<GroupCreate>;

    /// Like [`create_group`](Self::create_group), creating an empty stream when
    /// `key` does not exist.
    async fn create_group_with_stream(
        &self,
        key: &str,
        group: &str,
        start_id: &str,
    ) -> Result<GroupCreate>;

    async fn read_group(
        &self,
        request: &GroupReadRequest<'_>,
        cancel: &CancellationToken,
    ) -> Result<Vec<StreamBatch>>;

    /// Returns how many of `ids` were pending and are now acknowledged.
    async fn ack(&self, key: &str, group: &str, ids: &[&str]) -> Result<u64>;
}
