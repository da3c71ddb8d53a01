use std::sync::Arc;

use log::debug;
use metrics::counter;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::bootstrap::{BootstrapState, GroupBootstrap};
use super::{AckTarget, KeyIndex, ReadResult, translate};
use crate::codec::Codec;
use crate::common::config::GroupConfig;
use crate::errors::{ConfigError, Result, StreamError};
use crate::store::{
    BlockMode, GroupReadRequest, NEW_ENTRIES, ReadRequest, StreamStore, UNDELIVERED,
};

/// One cursor per key: `default` everywhere when `ids` is empty, otherwise
/// `ids` paired with the keys by position.
fn cursors(index: &KeyIndex, ids: &[&str], default: &str) -> Result<Vec<String>> {
    if ids.is_empty() {
        return Ok(vec![default.to_string(); index.len()]);
    }
    if ids.len() != index.len() {
        return Err(ConfigError::CursorMismatch {
            keys: index.len(),
            ids: ids.len(),
        }
        .into());
    }
    Ok(ids.iter().map(|id| id.to_string()).collect())
}

/// Reads several stream keys with caller-managed cursors.
pub struct CursorSubscriber<T> {
    store: Arc<dyn StreamStore>,
    codec: Arc<Codec<T>>,
    index: KeyIndex,
}

impl<T> CursorSubscriber<T> {
    pub fn new<I, S>(store: Arc<dyn StreamStore>, codec: Arc<Codec<T>>, keys: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Ok(Self {
            store,
            codec,
            index: KeyIndex::new(keys)?,
        })
    }

    /// Reads up to `count` entries per key, zero meaning no bound.
    ///
    /// Without `ids` only entries appended after the call starts are returned.
    /// When the block expires with nothing to return the store's no-data error
    /// comes back as is; a fired `cancel` yields
    /// [`StreamError::Cancelled`].
    pub async fn read(
        &self,
        count: usize,
        block: BlockMode,
        ids: &[&str],
        cancel: &CancellationToken,
    ) -> Result<ReadResult<T>> {
        let cursors = cursors(&self.index, ids, NEW_ENTRIES)?;
        let request = ReadRequest {
            keys: self.index.keys(),
            cursors: &cursors,
            count,
            block,
        };
        let batches = self.store.read(&request, cancel).await?;
        Ok(translate(batches, &self.codec))
    }

    /// Always fails: a cursor subscription has no group to acknowledge to.
    pub fn ack<'a>(&self, _target: impl Into<AckTarget<'a>>, _ids: &[&str]) -> Result<u64> {
        Err(StreamError::AckNotRequired.into())
    }

    pub fn keys(&self) -> &[String] {
        self.index.keys()
    }

    pub fn key_index(&self, key: &str) -> Option<usize> {
        self.index.index_of(key)
    }
}

/// Consumer group settings of a [`GroupSubscriber`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupOptions {
    pub group: String,
    /// Where a newly created group starts; `$` for new entries only.
    pub start_id: String,
    pub consumer: String,
    /// Acknowledge entries on delivery.
    pub no_ack: bool,
}

impl GroupOptions {
    /// Starts at new entries, with a random consumer name and explicit acks.
    pub fn new(group: impl Into<String>) -> Self {
        Self {
            group: group.into(),
            start_id: NEW_ENTRIES.to_string(),
            consumer: Uuid::new_v4().to_string(),
            no_ack: false,
        }
    }

    pub fn with_start_id(mut self, start_id: impl Into<String>) -> Self {
        self.start_id = start_id.into();
        self
    }

    pub fn with_consumer(mut self, consumer: impl Into<String>) -> Self {
        self.consumer = consumer.into();
        self
    }

    pub fn with_no_ack(mut self, no_ack: bool) -> Self {
        self.no_ack = no_ack;
        self
    }
}

impl From<&GroupConfig> for GroupOptions {
    fn from(config: &GroupConfig) -> Self {
        let options = GroupOptions::new(config.group.clone())
            .with_start_id(config.start_id.clone())
            .with_no_ack(config.no_ack);
        match &config.consumer {
            Some(consumer) => options.with_consumer(consumer.clone()),
            None => options,
        }
    }
}

/// Reads several stream keys as one consumer of a consumer group.
///
/// The group is created on every key by the first read, once per subscriber.
/// A failed creation is final for this subscriber: every later read returns
/// the same [`StreamError::GroupBootstrapFailed`].
pub struct GroupSubscriber<T> {
    store: Arc<dyn StreamStore>,
    codec: Arc<Codec<T>>,
    index: KeyIndex,
    options: GroupOptions,
    bootstrap: GroupBootstrap,
}

impl<T> GroupSubscriber<T> {
    pub fn new<I, S>(
        store: Arc<dyn StreamStore>,
        codec: Arc<Codec<T>>,
        options: GroupOptions,
        keys: I,
    ) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Ok(Self {
            store,
            codec,
            index: KeyIndex::new(keys)?,
            options,
            bootstrap: GroupBootstrap::new(),
        })
    }

    pub fn from_config(
        store: Arc<dyn StreamStore>,
        codec: Arc<Codec<T>>,
        config: &GroupConfig,
    ) -> Result<Self> {
        Self::new(store, codec, GroupOptions::from(config), config.keys.iter().cloned())
    }

    /// Reads up to `count` entries per key, zero meaning no bound.
    ///
    /// Without `ids` reads entries never delivered to the group. An explicit id
    /// such as `0` re-reads this consumer's pending entries instead; those whose
    /// payload the store has since trimmed come back as
    /// [`StreamError::Trimmed`].
    pub async fn read(
        &self,
        count: usize,
        block: BlockMode,
        ids: &[&str],
        cancel: &CancellationToken,
    ) -> Result<ReadResult<T>> {
        self.bootstrap
            .ensure(
                self.store.as_ref(),
                &self.options.group,
                &self.options.start_id,
                self.index.keys(),
            )
            .await?;

        let cursors = cursors(&self.index, ids, UNDELIVERED)?;
        let request = GroupReadRequest {
            group: &self.options.group,
            consumer: &self.options.consumer,
            no_ack: self.options.no_ack,
            read: ReadRequest {
                keys: self.index.keys(),
                cursors: &cursors,
                count,
                block,
            },
        };
        let batches = self.store.read_group(&request, cancel).await?;
        Ok(translate(batches, &self.codec))
    }

    /// Acknowledges `ids` on the stream `target` names and returns how many were
    /// still pending.
    ///
    /// An index must be within the subscribed keys. A key that is not subscribed
    /// is acknowledged as given.
    pub async fn ack<'a>(&self, target: impl Into<AckTarget<'a>>, ids: &[&str]) -> Result<u64> {
        let key = match target.into() {
            AckTarget::Index(idx) => self
                .index
                .key_at(idx)
                .ok_or(StreamError::InvalidStreamId(idx))?,
            AckTarget::Key(key) => key,
        };
        if ids.is_empty() {
            return Ok(0);
        }

        let acked = self.store.ack(key, &self.options.group, ids).await?;
        counter!("qstream_acked_total", "key" => key.to_string()).increment(acked);
        debug!("Acked {}/{} entries on {} for group {}", acked, ids.len(), key, self.options.group);
        Ok(acked)
    }

    pub fn keys(&self) -> &[String] {
        self.index.keys()
    }

    pub fn key_index(&self, key: &str) -> Option<usize> {
        self.index.index_of(key)
    }

    pub fn options(&self) -> &GroupOptions {
        &self.options
    }

    pub fn bootstrap_state(&self) -> BootstrapState {
        self.bootstrap.state()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::FieldMap;
    use crate::codec::tests::{SimpleData, sample};
    use crate::store::{GroupCreate, MemoryStore, StreamBatch};
    use async_trait::async_trait;
    use std::sync::Mutex;

    /// Records acknowledgements instead of applying them.
    #[derive(Default)]
    struct AckRecorder {
        acks: Mutex<Vec<(String, String, Vec<String>)>>,
    }

    #[async_trait]
    impl StreamStore for AckRecorder {
        async fn append(&self, _key: &str, _max_len: usize, _fields: &FieldMap) -> Result<String> {
            unreachable!("append is not used by ack tests")
        }

        async fn read(
            &self,
            _request: &ReadRequest<'_>,
            _cancel: &CancellationToken,
        ) -> Result<Vec<StreamBatch>> {
            unreachable!("read is not used by ack tests")
        }

        async fn create_group(&self, _key: &str, _group: &str, _start_id: &str) -> Result<GroupCreate> {
            Ok(GroupCreate::Created)
        }

        async fn create_group_with_stream(
            &self,
            _key: &str,
            _group: &str,
            _start_id: &str,
        ) -> Result<GroupCreate> {
            Ok(GroupCreate::Created)
        }

        async fn read_group(
            &self,
            _request: &GroupReadRequest<'_>,
            _cancel: &CancellationToken,
        ) -> Result<Vec<StreamBatch>> {
            unreachable!("read_group is not used by ack tests")
        }

        async fn ack(&self, key: &str, group: &str, ids: &[&str]) -> Result<u64> {
            self.acks.lock().unwrap().push((
                key.to_string(),
                group.to_string(),
                ids.iter().map(|id| id.to_string()).collect(),
            ));
            Ok(ids.len() as u64)
        }
    }

    fn codec() -> Arc<Codec<SimpleData>> {
        Arc::new(Codec::binary())
    }

    fn ack_subscriber() -> (Arc<AckRecorder>, GroupSubscriber<SimpleData>) {
        let store = Arc::new(AckRecorder::default());
        let sub = GroupSubscriber::new(store.clone(), codec(), GroupOptions::new("g"), ["a", "b", "c"])
            .unwrap();
        (store, sub)
    }

    #[tokio::test]
    async fn ack_routes_by_index_and_key() {
        let (store, sub) = ack_subscriber();

        assert_eq!(sub.ack(1, &["1-0", "2-0"]).await.unwrap(), 2);
        assert_eq!(sub.ack("b", &["3-0"]).await.unwrap(), 1);
        assert_eq!(sub.ack("dynamic", &["4-0"]).await.unwrap(), 1);

        let acks = store.acks.lock().unwrap().clone();
        let keys: Vec<&str> = acks.iter().map(|(key, _, _)| key.as_str()).collect();
        assert_eq!(keys, ["b", "b", "dynamic"]);
        assert!(acks.iter().all(|(_, group, _)| group == "g"));
        assert_eq!(acks[0].2, ["1-0", "2-0"]);
    }

    #[tokio::test]
    async fn ack_out_of_range_index_fails() {
        let (store, sub) = ack_subscriber();
        let err = sub.ack(5, &["1-0"]).await.unwrap_err();
        assert!(err.is_invalid_stream_id());
        assert!(store.acks.lock().unwrap().is_empty());
    }

    #[test]
    fn cursor_ack_is_never_required() {
        let store: Arc<dyn StreamStore> = Arc::new(MemoryStore::new());
        let sub = CursorSubscriber::new(store, codec(), ["a", "b"]).unwrap();
        for target in [AckTarget::Index(0), AckTarget::Index(9), AckTarget::Key("a")] {
            assert!(sub.ack(target, &["1-0"]).unwrap_err().is_ack_not_required());
        }
        assert!(sub.ack("zzz", &[]).unwrap_err().is_ack_not_required());
    }

    #[test]
    fn cursors_default_or_pair_by_position() {
        let index = KeyIndex::new(["a", "b"]).unwrap();
        assert_eq!(cursors(&index, &[], NEW_ENTRIES).unwrap(), ["$", "$"]);
        assert_eq!(cursors(&index, &["0", "5-1"], NEW_ENTRIES).unwrap(), ["0", "5-1"]);

        let err = cursors(&index, &["0"], NEW_ENTRIES).unwrap_err();
        assert!(err.is_config());
    }

    #[test]
    fn duplicate_keys_are_rejected() {
        let store: Arc<dyn StreamStore> = Arc::new(MemoryStore::new());
        assert!(CursorSubscriber::new(store.clone(), codec(), ["a", "a"]).is_err());
        assert!(GroupSubscriber::new(store, codec(), GroupOptions::new("g"), ["a", "a"]).is_err());
    }

    #[test]
    fn group_options_from_config() {
        let config = GroupConfig {
            group: "billing".to_string(),
            keys: vec!["orders".to_string()],
            start_id: "0".to_string(),
            consumer: Some("worker-1".to_string()),
            no_ack: true,
        };
        let options = GroupOptions::from(&config);
        assert_eq!(options.group, "billing");
        assert_eq!(options.start_id, "0");
        assert_eq!(options.consumer, "worker-1");
        assert!(options.no_ack);

        let generated = GroupOptions::new("g");
        assert_eq!(generated.start_id, "$");
        assert!(Uuid::parse_str(&generated.consumer).is_ok());
        assert_ne!(generated.consumer, GroupOptions::new("g").consumer);
    }

    #[tokio::test]
    async fn group_read_bootstraps_then_delivers() {
        let store = Arc::new(MemoryStore::new());
        let sub = GroupSubscriber::new(
            store.clone(),
            codec(),
            GroupOptions::new("g").with_consumer("c1"),
            ["s1"],
        )
        .unwrap();
        let cancel = CancellationToken::new();
        assert_eq!(sub.bootstrap_state(), BootstrapState::Uninitialized);

        let err = sub.read(10, BlockMode::NoWait, &[], &cancel).await.unwrap_err();
        assert!(err.is_no_data());
        assert_eq!(sub.bootstrap_state(), BootstrapState::Ready);

        let fields = Codec::<SimpleData>::binary().encode(&sample()).unwrap();
        let id = store.append("s1", 0, &fields).await.unwrap();

        let result = sub.read(10, BlockMode::NoWait, &[], &cancel).await.unwrap();
        assert_eq!(result["s1"].len(), 1);
        assert_eq!(result["s1"][0].id, id);
        assert_eq!(result["s1"][0].data(), Some(&sample()));

        assert_eq!(sub.ack(0, &[id.as_str()]).await.unwrap(), 1);
        assert!(store.pending("s1", "g").await.is_empty());
    }
}
