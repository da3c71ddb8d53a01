use std::collections::{BTreeMap, HashMap, VecDeque};
use std::fmt;
use std::str::FromStr;
use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use tokio::sync::{Mutex, Notify};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use super::{
    BlockMode, GroupCreate, GroupReadRequest, NEW_ENTRIES, ReadRequest, StreamBatch, StreamEntry,
    StreamStore, UNDELIVERED,
};
use crate::codec::FieldMap;
use crate::errors::{Result, StoreError, StreamError};

/// In-process [`StreamStore`] with Redis Streams semantics: `<ms>-<seq>` ids,
/// consumer groups with a pending list, blocking reads woken by appends.
///
/// Length bounds are applied exactly rather than approximately.
#[derive(Default)]
pub struct MemoryStore {
    streams: Mutex<HashMap<String, MemStream>>,
    appended: Notify,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
struct EntryId {
    ms: u64,
    seq: u64,
}

impl EntryId {
    fn next_after(last: EntryId) -> EntryId {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or_default();
        if now > last.ms {
            EntryId { ms: now, seq: 0 }
        } else {
            EntryId {
                ms: last.ms,
                seq: last.seq + 1,
            }
        }
    }
}

impl FromStr for EntryId {
    type Err = StoreError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let invalid = || StoreError::Protocol(format!("invalid stream id {s:?}"));
        let (ms, seq) = match s.split_once('-') {
            Some((ms, seq)) => (ms, seq),
            None => (s, "0"),
        };
        Ok(EntryId {
            ms: ms.parse().map_err(|_| invalid())?,
            seq: seq.parse().map_err(|_| invalid())?,
        })
    }
}

impl fmt::Display for EntryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.ms, self.seq)
    }
}

#[derive(Default)]
struct MemStream {
    entries: VecDeque<(EntryId, FieldMap)>,
    last_id: EntryId,
    groups: HashMap<String, MemGroup>,
}

struct MemGroup {
    last_delivered: EntryId,
    /// Delivered but unacknowledged ids, with the consumer that holds them.
    pending: BTreeMap<EntryId, String>,
}

impl MemStream {
    fn after(&self, cursor: EntryId, count: usize) -> Vec<(EntryId, FieldMap)> {
        let take = if count == 0 { usize::MAX } else { count };
        self.entries
            .iter()
            .filter(|(id, _)| *id > cursor)
            .take(take)
            .cloned()
            .collect()
    }

    fn fields_of(&self, id: EntryId) -> Option<&FieldMap> {
        self.entries
            .binary_search_by(|(entry_id, _)| entry_id.cmp(&id))
            .ok()
            .map(|idx| &self.entries[idx].1)
    }

    fn trim(&mut self, max_len: usize) {
        while self.entries.len() > max_len {
            self.entries.pop_front();
        }
    }
}

fn to_entries(items: Vec<(EntryId, FieldMap)>) -> Vec<StreamEntry> {
    items
        .into_iter()
        .map(|(id, fields)| StreamEntry {
            id: id.to_string(),
            fields,
        })
        .collect()
}

fn no_group(key: &str, group: &str) -> StoreError {
    StoreError::Protocol(format!(
        "NOGROUP no such key '{key}' or consumer group '{group}'"
    ))
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of entries currently held under `key`.
    pub async fn len(&self, key: &str) -> usize {
        self.streams
            .lock()
            .await
            .get(key)
            .map_or(0, |stream| stream.entries.len())
    }

    /// Ids delivered to `group` on `key` and not yet acknowledged.
    pub async fn pending(&self, key: &str, group: &str) -> Vec<String> {
        self.streams
            .lock()
            .await
            .get(key)
            .and_then(|stream| stream.groups.get(group))
            .map(|g| g.pending.keys().map(EntryId::to_string).collect())
            .unwrap_or_default()
    }

    /// Drops the oldest entries of `key` until at most `max_len` remain.
    pub async fn trim(&self, key: &str, max_len: usize) {
        if let Some(stream) = self.streams.lock().await.get_mut(key) {
            stream.trim(max_len);
        }
    }

    /// `$` resolves against the state at call time; other cursors parse as ids.
    async fn resolve_cursors(&self, request: &ReadRequest<'_>) -> Result<Vec<EntryId>> {
        let streams = self.streams.lock().await;
        request
            .keys
            .iter()
            .zip(request.cursors)
            .map(|(key, cursor)| -> Result<EntryId> {
                if cursor == NEW_ENTRIES {
                    Ok(streams.get(key).map(|s| s.last_id).unwrap_or_default())
                } else {
                    Ok(cursor.parse::<EntryId>()?)
                }
            })
            .collect()
    }

    fn collect_new(
        streams: &HashMap<String, MemStream>,
        keys: &[String],
        cursors: &[EntryId],
        count: usize,
    ) -> Vec<StreamBatch> {
        keys.iter()
            .zip(cursors)
            .filter_map(|(key, cursor)| {
                let items = streams.get(key)?.after(*cursor, count);
                (!items.is_empty()).then(|| StreamBatch {
                    key: key.clone(),
                    entries: to_entries(items),
                })
            })
            .collect()
    }

    fn collect_group(
        streams: &mut HashMap<String, MemStream>,
        request: &GroupReadRequest<'_>,
    ) -> Result<(Vec<StreamBatch>, bool)> {
        let read = &request.read;
        let mut batches = Vec::new();
        let mut history = false;

        for (key, cursor) in read.keys.iter().zip(read.cursors) {
            let stream = streams
                .get_mut(key)
                .ok_or_else(|| no_group(key, request.group))?;
            if !stream.groups.contains_key(request.group) {
                return Err(no_group(key, request.group).into());
            }

            if cursor == UNDELIVERED {
                let last = stream.groups[request.group].last_delivered;
                let items = stream.after(last, read.count);
                let Some((newest, _)) = items.last() else {
                    continue;
                };
                let newest = *newest;
                if let Some(group) = stream.groups.get_mut(request.group) {
                    group.last_delivered = newest;
                    if !request.no_ack {
                        for (id, _) in &items {
                            group.pending.insert(*id, request.consumer.to_string());
                        }
                    }
                }
                batches.push(StreamBatch {
                    key: key.clone(),
                    entries: to_entries(items),
                });
            } else {
                // History: this consumer's pending entries after the cursor. Ids
                // whose entry was trimmed come back with no fields.
                history = true;
                let after = cursor.parse::<EntryId>()?;
                let take = if read.count == 0 { usize::MAX } else { read.count };
                let group = &stream.groups[request.group];
                let entries = group
                    .pending
                    .iter()
                    .filter(|(id, owner)| **id > after && owner.as_str() == request.consumer)
                    .take(take)
                    .map(|(id, _)| StreamEntry {
                        id: id.to_string(),
                        fields: stream.fields_of(*id).cloned().unwrap_or_default(),
                    })
                    .collect();
                batches.push(StreamBatch {
                    key: key.clone(),
                    entries,
                });
            }
        }
        Ok((batches, history))
    }

    /// Waits for an append, the deadline or cancellation. Returns `Ok(())` when
    /// woken by an append.
    async fn wait(
        &self,
        notified: std::pin::Pin<&mut tokio::sync::futures::Notified<'_>>,
        deadline: Option<Instant>,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let expired = async {
            match deadline {
                Some(at) => tokio::time::sleep_until(at).await,
                None => std::future::pending::<()>().await,
            }
        };
        tokio::select! {
            _ = cancel.cancelled() => Err(StreamError::Cancelled.into()),
            _ = notified => Ok(()),
            _ = expired => Err(StoreError::NoData.into()),
        }
    }

    fn deadline(block: BlockMode) -> Option<Instant> {
        match block {
            BlockMode::For(wait) => Some(Instant::now() + wait),
            BlockMode::Forever | BlockMode::NoWait => None,
        }
    }
}

#[async_trait]
impl StreamStore for MemoryStore {
    async fn append(&self, key: &str, max_len: usize, fields: &FieldMap) -> Result<String> {
        let id = {
            let mut streams = self.streams.lock().await;
            let stream = streams.entry(key.to_string()).or_default();
            let id = EntryId::next_after(stream.last_id);
            stream.last_id = id;
            stream.entries.push_back((id, fields.clone()));
            if max_len > 0 {
                stream.trim(max_len);
            }
            id
        };
        self.appended.notify_waiters();
        Ok(id.to_string())
    }

    async fn read(
        &self,
        request: &ReadRequest<'_>,
        cancel: &CancellationToken,
    ) -> Result<Vec<StreamBatch>> {
        if cancel.is_cancelled() {
            return Err(StreamError::Cancelled.into());
        }
        let cursors = self.resolve_cursors(request).await?;
        let deadline = Self::deadline(request.block);

        loop {
            let notified = self.appended.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let batches = {
                let streams = self.streams.lock().await;
                Self::collect_new(&streams, request.keys, &cursors, request.count)
            };
            if !batches.is_empty() {
                return Ok(batches);
            }
            if request.block == BlockMode::NoWait {
                return Err(StoreError::NoData.into());
            }
            self.wait(notified, deadline, cancel).await?;
        }
    }

    async fn create_group(&self, key: &str, group: &str, start_id: &str) -> Result<GroupCreate> {
        let mut streams = self.streams.lock().await;
        let Some(stream) = streams.get_mut(key) else {
            return Ok(GroupCreate::NoSuchStream);
        };
        if stream.groups.contains_key(group) {
            return Ok(GroupCreate::AlreadyExists);
        }
        let last_delivered = if start_id == NEW_ENTRIES {
            stream.last_id
        } else {
            start_id.parse()?
        };
        stream.groups.insert(
            group.to_string(),
            MemGroup {
                last_delivered,
                pending: BTreeMap::new(),
            },
        );
        Ok(GroupCreate::Created)
    }

    async fn create_group_with_stream(
        &self,
        key: &str,
        group: &str,
        start_id: &str,
    ) -> Result<GroupCreate> {
        self.streams
            .lock()
            .await
            .entry(key.to_string())
            .or_default();
        self.create_group(key, group, start_id).await
    }

    async fn read_group(
        &self,
        request: &GroupReadRequest<'_>,
        cancel: &CancellationToken,
    ) -> Result<Vec<StreamBatch>> {
        if cancel.is_cancelled() {
            return Err(StreamError::Cancelled.into());
        }
        let deadline = Self::deadline(request.read.block);

        loop {
            let notified = self.appended.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let (batches, history) = {
                let mut streams = self.streams.lock().await;
                Self::collect_group(&mut streams, request)?
            };
            if history || !batches.is_empty() {
                return Ok(batches);
            }
            if request.read.block == BlockMode::NoWait {
                return Err(StoreError::NoData.into());
            }
            self.wait(notified, deadline, cancel).await?;
        }
    }

    async fn ack(&self, key: &str, group: &str, ids: &[&str]) -> Result<u64> {
        let mut streams = self.streams.lock().await;
        let Some(group) = streams
            .get_mut(key)
            .and_then(|stream| stream.groups.get_mut(group))
        else {
            return Ok(0);
        };

        let mut acked = 0;
        for id in ids {
            let id = id.parse::<EntryId>()?;
            if group.pending.remove(&id).is_some() {
                acked += 1;
            }
        }
        Ok(acked)
    }
}
