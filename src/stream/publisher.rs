use std::sync::Arc;

use log::{debug, warn};
use metrics::counter;

use crate::codec::Codec;
use crate::common::config::PublisherConfig;
use crate::errors::Result;
use crate::store::StreamStore;

/// Appends encoded values to one stream key.
pub struct StreamPub<T> {
    store: Arc<dyn StreamStore>,
    key: String,
    max_len: usize,
    codec: Arc<Codec<T>>,
}

impl<T> StreamPub<T> {
    /// `max_len` is an approximate bound on the stream length; zero leaves the
    /// stream unbounded.
    pub fn new(
        store: Arc<dyn StreamStore>,
        key: impl Into<String>,
        max_len: usize,
        codec: Arc<Codec<T>>,
    ) -> Self {
        Self {
            store,
            key: key.into(),
            max_len,
            codec,
        }
    }

    pub fn from_config(
        store: Arc<dyn StreamStore>,
        config: &PublisherConfig,
        codec: Arc<Codec<T>>,
    ) -> Self {
        Self::new(store, config.key.clone(), config.max_len, codec)
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn max_len(&self) -> usize {
        self.max_len
    }

    /// Encodes `value` and appends it, returning the id the store assigned.
    /// Nothing reaches the store when encoding fails.
    pub async fn send(&self, value: &T) -> Result<String> {
        let fields = self.codec.encode(value).inspect_err(|e| {
            warn!("Failed to encode message for {}: {}", self.key, e);
        })?;

        let id = self.store.append(&self.key, self.max_len, &fields).await?;
        counter!("qstream_published_total", "key" => self.key.clone()).increment(1);
        debug!("Published {} to {}", id, self.key);
        Ok(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::tests::{SimpleData, sample};
    use crate::codec::{FieldMap, TypeName, TypeRegistry};
    use crate::store::{BlockMode, FROM_START, MemoryStore, ReadRequest};
    use serde::{Deserialize, Serialize};
    use tokio_util::sync::CancellationToken;

    #[tokio::test]
    async fn send_appends_encoded_fields() {
        let store = Arc::new(MemoryStore::new());
        let codec = Arc::new(Codec::<SimpleData>::structural());
        let publisher = StreamPub::new(store.clone(), "s1", 100, codec);

        let id = publisher.send(&sample()).await.unwrap();

        let keys = vec!["s1".to_string()];
        let cursors = vec![FROM_START.to_string()];
        let request = ReadRequest {
            keys: &keys,
            cursors: &cursors,
            count: 0,
            block: BlockMode::NoWait,
        };
        let batches = store.read(&request, &CancellationToken::new()).await.unwrap();
        let entry = &batches[0].entries[0];
        assert_eq!(entry.id, id);
        assert_eq!(
            entry.fields,
            FieldMap::from([
                ("id".to_string(), b"1234".to_vec()),
                ("message".to_string(), b"Hello".to_vec()),
            ])
        );
    }

    #[tokio::test]
    async fn max_len_bounds_the_stream() {
        let store = Arc::new(MemoryStore::new());
        let publisher = StreamPub::new(
            store.clone(),
            "bounded",
            2,
            Arc::new(Codec::<SimpleData>::binary()),
        );
        for _ in 0..5 {
            publisher.send(&sample()).await.unwrap();
        }
        assert_eq!(store.len("bounded").await, 2);
    }

    #[derive(Debug, Serialize, Deserialize)]
    struct Other {
        n: u8,
    }

    impl TypeName for Other {
        fn type_name(&self) -> &'static str {
            "Other"
        }
    }

    #[tokio::test]
    async fn encode_failure_skips_the_store() {
        let store = Arc::new(MemoryStore::new());
        let registry = TypeRegistry::<Other>::builder()
            .register_self("Renamed")
            .build()
            .unwrap();
        let publisher = StreamPub::new(store.clone(), "s", 0, Arc::new(Codec::tagged(registry)));

        let err = publisher.send(&Other { n: 1 }).await.unwrap_err();
        assert!(err.is_type_not_registered());
        assert_eq!(store.len("s").await, 0);
    }
}
