//! Projection replay: rebuild one instance's read models from its events.
//!
//! A replay clears every row and cursor of the instance, then dispatches the
//! source's events in source order. It runs as a tokio task that can be
//! cancelled and polled for progress.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use serde_json::Value as JsonValue;
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{info, warn};

use warden_core::InstanceId;
use warden_events::EventEnvelope;

use crate::projections::registry::{Dispatch, DispatchError, Dispatcher};
use crate::read_model::StoreError;

/// Where replayed events come from.
pub trait EventSource: Send + Sync {
    /// Up to `limit` events of the instance, in source order, starting at
    /// `offset`. A short page ends the stream.
    fn read(
        &self,
        instance_id: &InstanceId,
        offset: usize,
        limit: usize,
    ) -> anyhow::Result<Vec<EventEnvelope<JsonValue>>>;
}

impl<S: EventSource + ?Sized> EventSource for Arc<S> {
    fn read(
        &self,
        instance_id: &InstanceId,
        offset: usize,
        limit: usize,
    ) -> anyhow::Result<Vec<EventEnvelope<JsonValue>>> {
        (**self).read(instance_id, offset, limit)
    }
}

#[derive(Debug, Error)]
pub enum ReplayError {
    #[error(transparent)]
    Source(#[from] anyhow::Error),

    #[error("clearing projections failed: {0}")]
    Clear(#[from] StoreError),

    #[error(transparent)]
    Dispatch(#[from] DispatchError),

    #[error("replay cancelled")]
    Cancelled,

    #[error("replay task failed: {0}")]
    Task(String),
}

/// Phase of a replay operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReplayPhase {
    Clearing,
    Replaying,
    Complete,
    /// Failed or cancelled.
    Failed,
}

/// Progress of a running replay.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct ReplayProgress {
    pub instance_id: InstanceId,
    pub phase: ReplayPhase,
    pub cleared_rows: usize,
    /// Events read from the source so far.
    pub loaded_events: u64,
    pub applied_events: u64,
    /// Events no reducer handles, or that were dropped as malformed/duplicate.
    pub ignored_events: u64,
    pub is_complete: bool,
    pub error: Option<String>,
}

impl ReplayProgress {
    fn new(instance_id: InstanceId) -> Self {
        Self {
            instance_id,
            phase: ReplayPhase::Clearing,
            cleared_rows: 0,
            loaded_events: 0,
            applied_events: 0,
            ignored_events: 0,
            is_complete: false,
            error: None,
        }
    }
}

/// Handle for monitoring and cancelling a replay.
#[derive(Debug, Clone)]
pub struct ReplayHandle {
    progress: Arc<RwLock<ReplayProgress>>,
    cancellation: Arc<AtomicBool>,
}

impl ReplayHandle {
    pub async fn progress(&self) -> ReplayProgress {
        self.progress.read().await.clone()
    }

    /// Stop after the event currently being dispatched.
    pub fn cancel(&self) {
        self.cancellation.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancellation.load(Ordering::Relaxed)
    }

    pub async fn wait_for_completion(&self) -> Result<ReplayProgress, ReplayError> {
        loop {
            let progress = self.progress.read().await.clone();
            if progress.is_complete {
                return match progress.phase {
                    ReplayPhase::Complete => Ok(progress),
                    _ if self.is_cancelled() => Err(ReplayError::Cancelled),
                    _ => Err(ReplayError::Task(progress.error.unwrap_or_default())),
                };
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
    }
}

/// Rebuilds instances through a [`Dispatcher`].
#[derive(Clone)]
pub struct Replayer {
    dispatcher: Dispatcher,
    source: Arc<dyn EventSource>,
    page_size: usize,
}

impl std::fmt::Debug for Replayer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Replayer")
            .field("dispatcher", &self.dispatcher)
            .field("page_size", &self.page_size)
            .finish_non_exhaustive()
    }
}

impl Replayer {
    pub fn new(dispatcher: Dispatcher, source: Arc<dyn EventSource>) -> Self {
        Self {
            dispatcher,
            source,
            page_size: 500,
        }
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    /// Start rebuilding `instance_id` on the current tokio runtime.
    pub fn start(&self, instance_id: InstanceId) -> ReplayHandle {
        let progress = Arc::new(RwLock::new(ReplayProgress::new(instance_id.clone())));
        let cancellation = Arc::new(AtomicBool::new(false));
        let handle = ReplayHandle {
            progress: progress.clone(),
            cancellation: cancellation.clone(),
        };

        let replayer = self.clone();
        tokio::spawn(async move {
            let result = replayer.run(&instance_id, &progress, &cancellation).await;

            let mut prog = progress.write().await;
            prog.is_complete = true;
            match result {
                Ok(()) => {
                    prog.phase = ReplayPhase::Complete;
                    info!(
                        instance_id = %instance_id,
                        applied = prog.applied_events,
                        ignored = prog.ignored_events,
                        "replay complete"
                    );
                }
                Err(err) => {
                    warn!(instance_id = %instance_id, error = %err, "replay failed");
                    prog.phase = ReplayPhase::Failed;
                    prog.error = Some(err.to_string());
                }
            }
        });

        handle
    }

    async fn run(
        &self,
        instance_id: &InstanceId,
        progress: &RwLock<ReplayProgress>,
        cancellation: &Arc<AtomicBool>,
    ) -> Result<(), ReplayError> {
        // Phase 1: clear rows and cursors.
        let dispatcher = self.dispatcher.clone();
        let target = instance_id.clone();
        let cleared = blocking(move || -> Result<usize, ReplayError> {
            let rows = dispatcher.tables().clear_instance(&target)?;
            dispatcher.cursors().clear_cursors(&target)?;
            Ok(rows)
        })
        .await?;
        {
            let mut prog = progress.write().await;
            prog.cleared_rows = cleared;
            prog.phase = ReplayPhase::Replaying;
        }

        // Phase 2: page through the source and dispatch in order.
        let mut offset = 0usize;
        loop {
            if cancellation.load(Ordering::Relaxed) {
                return Err(ReplayError::Cancelled);
            }

            let replayer = self.clone();
            let target = instance_id.clone();
            let stop = cancellation.clone();
            let page = blocking(move || replayer.replay_page(&target, offset, &stop)).await?;
            {
                let mut prog = progress.write().await;
                prog.loaded_events += page.loaded as u64;
                prog.applied_events += page.applied;
                prog.ignored_events += page.ignored;
            }
            info!(instance_id = %instance_id, offset, events = page.loaded, "replayed page");

            if page.loaded < self.page_size {
                return Ok(());
            }
            offset += page.loaded;
        }
    }

    fn replay_page(
        &self,
        instance_id: &InstanceId,
        offset: usize,
        stop: &AtomicBool,
    ) -> Result<PageOutcome, ReplayError> {
        let events = self.source.read(instance_id, offset, self.page_size)?;
        let mut outcome = PageOutcome {
            loaded: events.len(),
            applied: 0,
            ignored: 0,
        };
        for envelope in &events {
            if stop.load(Ordering::Relaxed) {
                return Err(ReplayError::Cancelled);
            }
            match self.dispatcher.dispatch(envelope)? {
                Dispatch::Applied(_) => outcome.applied += 1,
                Dispatch::Unhandled
                | Dispatch::Duplicate
                | Dispatch::Dropped
                | Dispatch::Skipped => outcome.ignored += 1,
            }
        }
        Ok(outcome)
    }
}

struct PageOutcome {
    loaded: usize,
    applied: u64,
    ignored: u64,
}

/// Run synchronous store work off the async executor.
async fn blocking<T: Send + 'static>(
    work: impl FnOnce() -> Result<T, ReplayError> + Send + 'static,
) -> Result<T, ReplayError> {
    tokio::task::spawn_blocking(work)
        .await
        .map_err(|err| ReplayError::Task(err.to_string()))?
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use serde_json::json;

    use super::*;
    use crate::projections::cursor_store::InMemoryCursorStore;
    use crate::projections::registry::ReducerRegistry;
    use crate::repository::{OrgMetadataRepository, OrgRepository, instance_condition};
    use crate::test_support::{Events, tables};

    #[derive(Default)]
    struct VecSource {
        events: Mutex<Vec<EventEnvelope<JsonValue>>>,
    }

    impl EventSource for VecSource {
        fn read(
            &self,
            instance_id: &InstanceId,
            offset: usize,
            limit: usize,
        ) -> anyhow::Result<Vec<EventEnvelope<JsonValue>>> {
            let events = self.events.lock().map_err(|_| anyhow::anyhow!("source lock poisoned"))?;
            Ok(events
                .iter()
                .filter(|e| e.instance_id() == instance_id)
                .skip(offset)
                .take(limit)
                .cloned()
                .collect())
        }
    }

    fn replayer(source: Arc<VecSource>) -> Replayer {
        let dispatcher = Dispatcher::new(
            Arc::new(ReducerRegistry::standard().unwrap()),
            tables(),
            Arc::new(InMemoryCursorStore::new()),
        );
        Replayer::new(dispatcher, source).with_page_size(2)
    }

    fn org_history(events: &mut Events) -> Vec<EventEnvelope<JsonValue>> {
        vec![
            events.org("org-1", "org.added", json!({"name": "acme"})),
            events.org("org-1", "org.metadata.set", json!({"key": "k1", "value": [1]})),
            events.org("org-1", "org.metadata.set", json!({"key": "k2", "value": [2]})),
            events.org("org-1", "org.changed", json!({"name": "acme corp"})),
            events.org("org-1", "org.metadata.removed", json!({"key": "k1"})),
        ]
    }

    #[tokio::test]
    async fn replay_rebuilds_the_instance_from_scratch() {
        let mut events = Events::new("inst-1");
        let source = Arc::new(VecSource::default());
        *source.events.lock().unwrap() = org_history(&mut events);

        let replayer = replayer(source);
        let tables = replayer.dispatcher.tables().clone();
        // Drift that the rebuild must wipe out.
        let stale = events.org("org-9", "org.added", json!({"name": "stale"}));
        replayer.dispatcher.dispatch(&stale).unwrap();

        let progress = replayer.start(events.instance_id()).wait_for_completion().await.unwrap();
        assert_eq!(progress.phase, ReplayPhase::Complete);
        assert_eq!(progress.loaded_events, 5);
        assert_eq!(progress.applied_events, 5);
        assert_eq!(progress.cleared_rows, 1);

        let scope = instance_condition(&events.instance_id());
        let orgs = OrgRepository::orgs(&tables).list(scope.clone()).unwrap();
        assert_eq!(orgs.len(), 1);
        assert_eq!(orgs[0].name, "acme corp");
        let metadata = OrgMetadataRepository::org_metadata(&tables).list(scope).unwrap();
        assert_eq!(metadata.iter().map(|m| m.key.as_str()).collect::<Vec<_>>(), vec!["k2"]);
    }

    #[tokio::test]
    async fn replaying_twice_gives_the_same_rows() {
        let mut events = Events::new("inst-1");
        let source = Arc::new(VecSource::default());
        *source.events.lock().unwrap() = org_history(&mut events);
        let replayer = replayer(source);
        let tables = replayer.dispatcher.tables().clone();
        let scope = instance_condition(&events.instance_id());

        replayer.start(events.instance_id()).wait_for_completion().await.unwrap();
        let first = OrgRepository::orgs(&tables).list(scope.clone()).unwrap();
        let second_run = replayer.start(events.instance_id()).wait_for_completion().await.unwrap();
        assert_eq!(second_run.applied_events, 5);
        assert_eq!(OrgRepository::orgs(&tables).list(scope).unwrap(), first);
    }

    #[tokio::test]
    async fn cancelled_replay_reports_cancellation() {
        let mut events = Events::new("inst-1");
        let source = Arc::new(VecSource::default());
        *source.events.lock().unwrap() = org_history(&mut events);

        let handle = replayer(source).start(events.instance_id());
        handle.cancel();
        let outcome = handle.wait_for_completion().await;
        assert!(matches!(outcome, Err(ReplayError::Cancelled)));
        assert_eq!(handle.progress().await.phase, ReplayPhase::Failed);
    }
}
