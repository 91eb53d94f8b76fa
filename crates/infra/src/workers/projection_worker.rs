use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::thread;
use std::time::Duration;

use backoff::backoff::Backoff;
use serde_json::Value as JsonValue;
use tracing::{debug, info, warn};

use warden_core::InstanceId;
use warden_events::{EventBus, EventEnvelope, StreamKey, Subscription, TenantScoped};

use crate::config::WorkerSettings;
use crate::projections::{DispatchError, Dispatcher};
use crate::retry::RetryPolicy;

type Envelope = EventEnvelope<JsonValue>;

#[derive(Debug, Clone)]
pub struct WorkerOptions {
    /// Ordered lanes; all events of one stream land on the same lane.
    pub partitions: usize,
    pub idle_tick: Duration,
    pub retry: RetryPolicy,
    /// When set, events of other instances are ignored.
    pub instance_id: Option<InstanceId>,
}

impl Default for WorkerOptions {
    fn default() -> Self {
        Self::from(&WorkerSettings::default())
    }
}

impl From<&WorkerSettings> for WorkerOptions {
    fn from(settings: &WorkerSettings) -> Self {
        Self {
            partitions: settings.partitions.max(1),
            idle_tick: settings.idle_tick(),
            retry: RetryPolicy::default(),
            instance_id: None,
        }
    }
}

impl WorkerOptions {
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn pinned_to(mut self, instance_id: InstanceId) -> Self {
        self.instance_id = Some(instance_id);
        self
    }
}

#[derive(Debug, Default)]
struct Counters {
    processed: AtomicU64,
    failed: AtomicU64,
}

/// Handle to control and join a running worker.
#[derive(Debug)]
pub struct WorkerHandle {
    shutdown: mpsc::Sender<()>,
    stopping: Arc<AtomicBool>,
    counters: Arc<Counters>,
    router: Option<thread::JoinHandle<()>>,
    lanes: Vec<thread::JoinHandle<()>>,
}

impl WorkerHandle {
    /// Events handed to the dispatcher, including ones it ignored or dropped.
    pub fn processed(&self) -> u64 {
        self.counters.processed.load(Ordering::Acquire)
    }

    /// Events given up on after a non-retryable failure or at shutdown.
    pub fn failed(&self) -> u64 {
        self.counters.failed.load(Ordering::Acquire)
    }

    /// Stop taking events from the bus, let every lane drain what it was
    /// already handed, then join all threads.
    pub fn shutdown(mut self) {
        let _ = self.shutdown.send(());
        if let Some(router) = self.router.take() {
            let _ = router.join();
        }
        for lane in self.lanes.drain(..) {
            let _ = lane.join();
        }
    }

    /// Like [`WorkerHandle::shutdown`], but abandons in-flight retries.
    pub fn abort(self) {
        self.stopping.store(true, Ordering::Release);
        self.shutdown();
    }
}

/// Feeds bus events through a [`Dispatcher`].
///
/// A router thread drains the subscription and hashes each envelope's stream
/// key onto one of `partitions` lane threads, so events of one stream are
/// reduced in delivery order while unrelated streams proceed in parallel.
/// Retryable failures are retried with backoff until they succeed or the
/// worker is aborted; the lane does not move past a failing event before that.
#[derive(Debug)]
pub struct ProjectionWorker;

impl ProjectionWorker {
    pub fn spawn<B>(
        name: &'static str,
        bus: B,
        dispatcher: Dispatcher,
        options: WorkerOptions,
    ) -> std::io::Result<WorkerHandle>
    where
        B: EventBus<Envelope> + Send + Sync + 'static,
    {
        let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>();
        let stopping = Arc::new(AtomicBool::new(false));
        let counters = Arc::new(Counters::default());
        let subscription = bus.subscribe();

        let partitions = options.partitions.max(1);
        let mut senders = Vec::with_capacity(partitions);
        let mut lanes = Vec::with_capacity(partitions);
        for index in 0..partitions {
            let (tx, rx) = mpsc::channel::<Envelope>();
            let lane = Lane {
                worker: name,
                index,
                dispatcher: dispatcher.clone(),
                retry: options.retry.clone(),
                stopping: Arc::clone(&stopping),
                counters: Arc::clone(&counters),
            };
            let join = thread::Builder::new()
                .name(format!("{name}-{index}"))
                .spawn(move || lane.run(rx))?;
            senders.push(tx);
            lanes.push(join);
        }

        let router = Router {
            worker: name,
            instance_id: options.instance_id.clone(),
            idle_tick: options.idle_tick,
            senders,
        };
        let router = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || router.run(subscription, shutdown_rx))?;

        info!(worker = name, partitions, "projection worker started");
        Ok(WorkerHandle {
            shutdown: shutdown_tx,
            stopping,
            counters,
            router: Some(router),
            lanes,
        })
    }
}

/// Lane index for a stream. Stable for the lifetime of the process.
pub fn partition_of(stream: &StreamKey, partitions: usize) -> usize {
    let mut hasher = DefaultHasher::new();
    stream.hash(&mut hasher);
    (hasher.finish() % partitions.max(1) as u64) as usize
}

struct Router {
    worker: &'static str,
    instance_id: Option<InstanceId>,
    idle_tick: Duration,
    senders: Vec<mpsc::Sender<Envelope>>,
}

impl Router {
    fn run(self, subscription: Subscription<Envelope>, shutdown_rx: mpsc::Receiver<()>) {
        loop {
            if shutdown_rx.try_recv().is_ok() {
                break;
            }

            match subscription.recv_timeout(self.idle_tick) {
                Ok(envelope) => {
                    if let Some(pinned) = &self.instance_id {
                        if TenantScoped::instance_id(&envelope) != pinned {
                            continue;
                        }
                    }
                    let lane = partition_of(&envelope.stream_key(), self.senders.len());
                    if self.senders[lane].send(envelope).is_err() {
                        warn!(worker = self.worker, lane, "partition lane is gone; stopping");
                        break;
                    }
                }
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }
        debug!(worker = self.worker, "router stopped");
        // Dropping the senders lets every lane drain and exit.
    }
}

struct Lane {
    worker: &'static str,
    index: usize,
    dispatcher: Dispatcher,
    retry: RetryPolicy,
    stopping: Arc<AtomicBool>,
    counters: Arc<Counters>,
}

impl Lane {
    fn run(self, rx: mpsc::Receiver<Envelope>) {
        while let Ok(envelope) = rx.recv() {
            if let Err(err) = self.dispatch_until_done(&envelope) {
                self.counters.failed.fetch_add(1, Ordering::AcqRel);
                warn!(
                    worker = self.worker,
                    lane = self.index,
                    instance_id = %envelope.instance_id(),
                    aggregate_id = envelope.aggregate_id(),
                    event_type = envelope.event_type(),
                    sequence = envelope.sequence_number(),
                    error = %err,
                    "projection worker gave up on event"
                );
            }
            self.counters.processed.fetch_add(1, Ordering::AcqRel);
        }
        debug!(worker = self.worker, lane = self.index, "lane drained");
    }

    fn dispatch_until_done(&self, envelope: &Envelope) -> Result<(), DispatchError> {
        let mut schedule = self.retry.backoff();
        loop {
            let err = match self.dispatcher.dispatch(envelope) {
                Ok(_) => return Ok(()),
                Err(err) => err,
            };
            if !err.is_retryable() || self.stopping.load(Ordering::Acquire) {
                return Err(err);
            }
            let wait = schedule.next_backoff().unwrap_or(self.retry.max_interval);
            warn!(
                worker = self.worker,
                lane = self.index,
                event_type = envelope.event_type(),
                sequence = envelope.sequence_number(),
                error = %err,
                retry_in_ms = wait.as_millis() as u64,
                "dispatch failed; retrying"
            );
            thread::sleep(wait);
        }
    }
}
