use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use async_trait::async_trait;
use deadpool_redis::{Connection, Pool};
use log::{debug, warn};
use redis::streams::StreamReadReply;
use tokio_util::sync::CancellationToken;

use super::{BlockMode, GroupCreate, GroupReadRequest, ReadRequest, StreamBatch, StreamEntry, StreamStore};
use crate::codec::FieldMap;
use crate::common::config::RedisConfig;
use crate::errors::{Result, StoreError, StreamError};
use crate::utils::connector;

/// [`StreamStore`] over Redis Streams.
///
/// The pool belongs to the caller; the store only borrows connections from it.
#[derive(Clone)]
pub struct RedisStore {
    pool: Pool,
}

enum ReadOutcome {
    Reply(redis::RedisResult<Option<StreamReadReply>>),
    /// Cancelled; the read was released or finished on its own and has been drained.
    Drained(redis::RedisResult<Option<StreamReadReply>>),
    /// Cancelled but the blocked command may still be running server side.
    Abandoned,
}

// `CLIENT UNBLOCK` answers 0 until the read is parked on the server.
const UNBLOCK_ATTEMPTS: usize = 50;
const UNBLOCK_RETRY: Duration = Duration::from_millis(20);

impl RedisStore {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }

    pub fn from_config(config: &RedisConfig) -> Result<Self> {
        Ok(Self::new(connector::create_redis_pool(config)?))
    }

    pub fn pool(&self) -> &Pool {
        &self.pool
    }

    async fn connection(&self) -> Result<Connection> {
        self.pool
            .get()
            .await
            .map_err(|e| StoreError::Pool(Box::new(e)).into())
    }

    /// Runs an `XREAD`/`XREADGROUP` command that may block server side.
    ///
    /// The read runs on a dedicated pooled connection whose client id is recorded
    /// first; cancellation sends `CLIENT UNBLOCK` for that id from another
    /// connection and lets the read drain, so the connection returns to the pool
    /// idle. Entries the drained read still carries are returned, not dropped.
    async fn run_read(
        &self,
        cmd: redis::Cmd,
        block: BlockMode,
        cancel: &CancellationToken,
    ) -> Result<Vec<StreamBatch>> {
        if cancel.is_cancelled() {
            return Err(StreamError::Cancelled.into());
        }

        let mut conn = self.connection().await?;
        if cancel.is_cancelled() {
            return Err(StreamError::Cancelled.into());
        }

        if block == BlockMode::NoWait {
            let reply: Option<StreamReadReply> = cmd.query_async(&mut conn).await?;
            return into_batches(reply);
        }

        let client_id: i64 = redis::cmd("CLIENT").arg("ID").query_async(&mut conn).await?;
        if cancel.is_cancelled() {
            return Err(StreamError::Cancelled.into());
        }

        let outcome = {
            let read = cmd.query_async::<Option<StreamReadReply>>(&mut conn);
            tokio::pin!(read);

            tokio::select! {
                biased;
                reply = &mut read => ReadOutcome::Reply(reply),
                _ = cancel.cancelled() => interrupt(read.as_mut(), || self.unblock(client_id)).await,
            }
        };

        match outcome {
            ReadOutcome::Reply(reply) => into_batches(reply?),
            ReadOutcome::Drained(reply) => settle_cancelled(reply),
            ReadOutcome::Abandoned => {
                // The connection may still be blocked; keep it out of the pool.
                drop(Connection::take(conn));
                Err(StreamError::Cancelled.into())
            }
        }
    }

    /// Sends `CLIENT UNBLOCK` and returns the server's count, `None` on failure.
    async fn unblock(&self, client_id: i64) -> Option<i64> {
        let mut conn = match self.connection().await {
            Ok(conn) => conn,
            Err(e) => {
                warn!("Failed to get connection to unblock client {}: {}", client_id, e);
                return None;
            }
        };

        match redis::cmd("CLIENT")
            .arg("UNBLOCK")
            .arg(client_id)
            .query_async::<i64>(&mut conn)
            .await
        {
            Ok(unblocked) => {
                debug!("Unblocked client {} ({})", client_id, unblocked);
                Some(unblocked)
            }
            Err(e) => {
                warn!("Failed to unblock client {}: {}", client_id, e);
                None
            }
        }
    }

    async fn xgroup_create(
        &self,
        key: &str,
        group: &str,
        start_id: &str,
        mkstream: bool,
    ) -> Result<GroupCreate> {
        let mut conn = self.connection().await?;
        let mut cmd = redis::cmd("XGROUP");
        cmd.arg("CREATE").arg(key).arg(group).arg(start_id);
        if mkstream {
            cmd.arg("MKSTREAM");
        }

        match cmd.query_async::<()>(&mut conn).await {
            Ok(()) => Ok(GroupCreate::Created),
            Err(e) if e.code() == Some("BUSYGROUP") => Ok(GroupCreate::AlreadyExists),
            Err(e) if !mkstream && is_missing_stream(&e) => Ok(GroupCreate::NoSuchStream),
            Err(e) => Err(e.into()),
        }
    }
}

/// Releases a cancelled read and waits for its reply.
///
/// A count of 0 means the read is not parked yet, either still in flight or
/// already answered, so the read gets polled briefly before the next attempt.
async fn interrupt<R, U, F>(mut read: Pin<&mut R>, mut unblock: U) -> ReadOutcome
where
    R: Future<Output = redis::RedisResult<Option<StreamReadReply>>>,
    U: FnMut() -> F,
    F: Future<Output = Option<i64>>,
{
    for _ in 0..UNBLOCK_ATTEMPTS {
        match unblock().await {
            Some(0) => {}
            Some(_) => return ReadOutcome::Drained(read.await),
            None => return ReadOutcome::Abandoned,
        }
        if let Ok(reply) = tokio::time::timeout(UNBLOCK_RETRY, read.as_mut()).await {
            return ReadOutcome::Drained(reply);
        }
    }
    warn!("Blocked read did not park after {} unblock attempts", UNBLOCK_ATTEMPTS);
    ReadOutcome::Abandoned
}

fn settle_cancelled(reply: redis::RedisResult<Option<StreamReadReply>>) -> Result<Vec<StreamBatch>> {
    match reply {
        Ok(Some(reply)) => into_batches(Some(reply)),
        _ => Err(StreamError::Cancelled.into()),
    }
}

fn is_missing_stream(err: &redis::RedisError) -> bool {
    err.to_string().contains("requires the key to exist")
}

fn stream_args(cmd: &mut redis::Cmd, request: &ReadRequest<'_>) {
    if request.count > 0 {
        cmd.arg("COUNT").arg(request.count);
    }
    match request.block {
        BlockMode::Forever => {
            cmd.arg("BLOCK").arg(0);
        }
        BlockMode::For(wait) => {
            cmd.arg("BLOCK").arg(wait.as_millis().max(1) as u64);
        }
        BlockMode::NoWait => {}
    }
}

fn streams_tail(cmd: &mut redis::Cmd, request: &ReadRequest<'_>) {
    cmd.arg("STREAMS").arg(request.keys).arg(request.cursors);
}

fn into_batches(reply: Option<StreamReadReply>) -> Result<Vec<StreamBatch>> {
    let reply = reply.ok_or(StoreError::NoData)?;

    let mut batches = Vec::with_capacity(reply.keys.len());
    for stream in reply.keys {
        let mut entries = Vec::with_capacity(stream.ids.len());
        for entry in stream.ids {
            let mut fields = FieldMap::with_capacity(entry.map.len());
            for (name, value) in entry.map {
                if value == redis::Value::Nil {
                    continue;
                }
                let bytes: Vec<u8> = redis::from_redis_value(&value)?;
                fields.insert(name, bytes);
            }
            entries.push(StreamEntry {
                id: entry.id,
                fields,
            });
        }
        batches.push(StreamBatch {
            key: stream.key,
            entries,
        });
    }
    Ok(batches)
}

#[async_trait]
impl StreamStore for RedisStore {
    async fn append(&self, key: &str, max_len: usize, fields: &FieldMap) -> Result<String> {
        let mut conn = self.connection().await?;

        let mut cmd = redis::cmd("XADD");
        cmd.arg(key);
        if max_len > 0 {
            cmd.arg("MAXLEN").arg("~").arg(max_len);
        }
        cmd.arg("*");
        for (name, value) in fields {
            cmd.arg(name).arg(value.as_slice());
        }

        let id: String = cmd.query_async(&mut conn).await?;
        Ok(id)
    }

    async fn read(
        &self,
        request: &ReadRequest<'_>,
        cancel: &CancellationToken,
    ) -> Result<Vec<StreamBatch>> {
        let mut cmd = redis::cmd("XREAD");
        stream_args(&mut cmd, request);
        streams_tail(&mut cmd, request);
        self.run_read(cmd, request.block, cancel).await
    }

    async fn create_group(&self, key: &str, group: &str, start_id: &str) -> Result<GroupCreate> {
        self.xgroup_create(key, group, start_id, false).await
    }

    async fn create_group_with_stream(
        &self,
        key: &str,
        group: &str,
        start_id: &str,
    ) -> Result<GroupCreate> {
        self.xgroup_create(key, group, start_id, true).await
    }

    async fn read_group(
        &self,
        request: &GroupReadRequest<'_>,
        cancel: &CancellationToken,
    ) -> Result<Vec<StreamBatch>> {
        let mut cmd = redis::cmd("XREADGROUP");
        cmd.arg("GROUP").arg(request.group).arg(request.consumer);
        stream_args(&mut cmd, &request.read);
        if request.no_ack {
            cmd.arg("NOACK");
        }
        streams_tail(&mut cmd, &request.read);
        self.run_read(cmd, request.read.block, cancel).await
    }

    async fn ack(&self, key: &str, group: &str, ids: &[&str]) -> Result<u64> {
        let mut conn = self.connection().await?;
        let acked: u64 = redis::cmd("XACK")
            .arg(key)
            .arg(group)
            .arg(ids)
            .query_async(&mut conn)
            .await?;
        Ok(acked)
    }
}
