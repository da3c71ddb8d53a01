use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};

use log::{debug, error, info};
use tokio::sync::OnceCell;

use crate::errors::{Error, Result, StoreError, StreamError};
use crate::store::{GroupCreate, StreamStore};

/// Lifecycle of a consumer group subscriber's group setup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum BootstrapState {
    Uninitialized = 0,
    Bootstrapping = 1,
    Ready = 2,
    /// Terminal. Every later read returns the cached failure.
    Failed = 3,
}

impl BootstrapState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => BootstrapState::Bootstrapping,
            2 => BootstrapState::Ready,
            3 => BootstrapState::Failed,
            _ => BootstrapState::Uninitialized,
        }
    }
}

#[derive(Debug, Clone)]
struct Failure {
    key: String,
    source: Arc<Error>,
}

/// Creates the consumer group on every key exactly once and caches the outcome.
///
/// Concurrent first callers wait on the same creation; afterwards every caller
/// reads the cached outcome without locking.
#[derive(Debug, Default)]
pub(crate) struct GroupBootstrap {
    state: AtomicU8,
    outcome: OnceCell<std::result::Result<(), Failure>>,
}

impl GroupBootstrap {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn state(&self) -> BootstrapState {
        BootstrapState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub(crate) async fn ensure(
        &self,
        store: &dyn StreamStore,
        group: &str,
        start_id: &str,
        keys: &[String],
    ) -> Result<()> {
        let outcome = match self.outcome.get() {
            Some(outcome) => outcome,
            None => {
                self.outcome
                    .get_or_init(|| async {
                        let mut running = Running::start(&self.state);
                        let outcome = create_groups(store, group, start_id, keys).await;
                        running.finish(match outcome {
                            Ok(()) => BootstrapState::Ready,
                            Err(_) => BootstrapState::Failed,
                        });
                        outcome
                    })
                    .await
            }
        };

        match outcome {
            Ok(()) => Ok(()),
            Err(failure) => Err(StreamError::GroupBootstrapFailed {
                group: group.to_string(),
                key: failure.key.clone(),
                source: failure.source.clone(),
            }
            .into()),
        }
    }
}

/// Marks a bootstrap in progress. Dropped unfinished, the cell is empty again so
/// the state goes back to `Uninitialized`.
struct Running<'a> {
    state: &'a AtomicU8,
    finished: bool,
}

impl<'a> Running<'a> {
    fn start(state: &'a AtomicU8) -> Self {
        state.store(BootstrapState::Bootstrapping as u8, Ordering::Release);
        Self {
            state,
            finished: false,
        }
    }

    fn finish(&mut self, state: BootstrapState) {
        self.state.store(state as u8, Ordering::Release);
        self.finished = true;
    }
}

impl Drop for Running<'_> {
    fn drop(&mut self) {
        if !self.finished {
            let _ = self.state.compare_exchange(
                BootstrapState::Bootstrapping as u8,
                BootstrapState::Uninitialized as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            );
        }
    }
}

async fn create_groups(
    store: &dyn StreamStore,
    group: &str,
    start_id: &str,
    keys: &[String],
) -> std::result::Result<(), Failure> {
    for key in keys {
        create_group(store, group, start_id, key)
            .await
            .map_err(|e| {
                error!("Failed to create consumer group {} on {}: {}", group, key, e);
                Failure {
                    key: key.clone(),
                    source: Arc::new(e),
                }
            })?;
    }
    info!("Consumer group {} ready on {} stream(s)", group, keys.len());
    Ok(())
}

async fn create_group(store: &dyn StreamStore, group: &str, start_id: &str, key: &str) -> Result<()> {
    match store.create_group(key, group, start_id).await? {
        GroupCreate::Created => debug!("Created consumer group {} on {}", group, key),
        GroupCreate::AlreadyExists => debug!("Consumer group {} already exists on {}", group, key),
        GroupCreate::NoSuchStream => {
            match store.create_group_with_stream(key, group, start_id).await? {
                GroupCreate::Created | GroupCreate::AlreadyExists => {
                    debug!("Created stream {} with consumer group {}", key, group)
                }
                GroupCreate::NoSuchStream => {
                    return Err(StoreError::Protocol(format!(
                        "stream {key} still missing after creating it with group {group}"
                    ))
                    .into());
                }
            }
        }
    }
    Ok(())
}
