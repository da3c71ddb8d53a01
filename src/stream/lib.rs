//! Publishing to and subscribing from stream keys.
//!
//! [`StreamPub`] encodes values and appends them to one key. A [`Subscription`]
//! reads several keys at once, either with plain cursors
//! ([`CursorSubscriber`]) or as a member of a consumer group
//! ([`GroupSubscriber`]), and hands back one [`SubResult`] per entry so a bad
//! entry never hides its neighbours.

pub mod bootstrap;
pub mod key_index;
pub mod publisher;
pub mod subscriber;
pub mod translate;

use std::collections::HashMap;

use tokio_util::sync::CancellationToken;

use crate::errors::{Error, Result, StreamError};
use crate::store::BlockMode;

pub use bootstrap::BootstrapState;
pub use key_index::KeyIndex;
pub use publisher::StreamPub;
pub use subscriber::{CursorSubscriber, GroupOptions, GroupSubscriber};
pub use translate::translate;

/// Outcome of one stream entry: the decoded value, or why it could not be had.
#[derive(Debug)]
pub struct SubResult<T> {
    pub id: String,
    pub data: std::result::Result<T, Error>,
}

impl<T> SubResult<T> {
    pub fn ok(id: impl Into<String>, data: T) -> Self {
        Self {
            id: id.into(),
            data: Ok(data),
        }
    }

    pub fn err(id: impl Into<String>, error: impl Into<Error>) -> Self {
        Self {
            id: id.into(),
            data: Err(error.into()),
        }
    }

    pub fn trimmed(id: impl Into<String>) -> Self {
        Self::err(id, StreamError::Trimmed)
    }

    pub fn data(&self) -> Option<&T> {
        self.data.as_ref().ok()
    }

    pub fn error(&self) -> Option<&Error> {
        self.data.as_ref().err()
    }

    pub fn is_trimmed(&self) -> bool {
        self.error().is_some_and(Error::is_trimmed)
    }

    pub fn into_data(self) -> Result<T> {
        self.data
    }
}

/// Results of one read, per stream key, in store order within each key.
pub type ReadResult<T> = HashMap<String, Vec<SubResult<T>>>;

/// Which stream an acknowledgement is for: a position in the subscribed key
/// list or a key name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckTarget<'a> {
    Index(usize),
    Key(&'a str),
}

impl From<usize> for AckTarget<'_> {
    fn from(value: usize) -> Self {
        AckTarget::Index(value)
    }
}

impl<'a> From<&'a str> for AckTarget<'a> {
    fn from(value: &'a str) -> Self {
        AckTarget::Key(value)
    }
}

impl<'a> From<&'a String> for AckTarget<'a> {
    fn from(value: &'a String) -> Self {
        AckTarget::Key(value.as_str())
    }
}

/// A subscriber of either flavour.
pub enum Subscription<T> {
    Cursor(CursorSubscriber<T>),
    Group(GroupSubscriber<T>),
}

impl<T> Subscription<T> {
    /// Reads up to `count` entries per key (zero for no bound). With no `ids` a
    /// cursor subscription reads entries newer than the call and a group
    /// subscription reads entries never delivered to the group; otherwise `ids`
    /// pair positionally with the subscribed keys.
    pub async fn read(
        &self,
        count: usize,
        block: BlockMode,
        ids: &[&str],
        cancel: &CancellationToken,
    ) -> Result<ReadResult<T>> {
        match self {
            Subscription::Cursor(sub) => sub.read(count, block, ids, cancel).await,
            Subscription::Group(sub) => sub.read(count, block, ids, cancel).await,
        }
    }

    pub async fn ack<'a>(&self, target: impl Into<AckTarget<'a>>, ids: &[&str]) -> Result<u64> {
        match self {
            Subscription::Cursor(sub) => sub.ack(target, ids),
            Subscription::Group(sub) => sub.ack(target, ids).await,
        }
    }

    pub fn keys(&self) -> &[String] {
        match self {
            Subscription::Cursor(sub) => sub.keys(),
            Subscription::Group(sub) => sub.keys(),
        }
    }

    pub fn key_index(&self, key: &str) -> Option<usize> {
        match self {
            Subscription::Cursor(sub) => sub.key_index(key),
            Subscription::Group(sub) => sub.key_index(key),
        }
    }
}

impl<T> From<CursorSubscriber<T>> for Subscription<T> {
    fn from(value: CursorSubscriber<T>) -> Self {
        Subscription::Cursor(value)
    }
}

impl<T> From<GroupSubscriber<T>> for Subscription<T> {
    fn from(value: GroupSubscriber<T>) -> Self {
        Subscription::Group(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::CodecError;

    #[test]
    fn sub_result_holds_data_or_error() {
        let ok = SubResult::ok("1-0", 7);
        assert_eq!(ok.data(), Some(&7));
        assert!(ok.error().is_none());

        let trimmed = SubResult::<i32>::trimmed("2-0");
        assert!(trimmed.is_trimmed());
        assert!(trimmed.data().is_none());

        let failed = SubResult::<i32>::err("3-0", CodecError::DataDecodeFail);
        assert!(!failed.is_trimmed());
        assert!(failed.into_data().unwrap_err().is_data_decode_fail());
    }

    #[test]
    fn ack_target_from_index_and_key() {
        let key = String::from("b");
        assert_eq!(AckTarget::from(1), AckTarget::Index(1));
        assert_eq!(AckTarget::from("b"), AckTarget::Key("b"));
        assert_eq!(AckTarget::from(&key), AckTarget::Key("b"));
    }
}
