//! Concurrent dispatcher loops.
//!
//! Each dispatcher is an independent tokio task that blocks on the queue
//! store across all live queues (priority order), decodes what it gets and
//! hands ready jobs to the [`JobExecutor`]. Dispatchers share nothing but the
//! store and the [`ActiveJobs`] counter.
//!
//! Shutdown is cooperative: the flag is checked between pops and again right
//! after one returns. The blocking pop itself is never cancelled because the
//! item it returns would be lost; an item popped after shutdown is pushed
//! back unprocessed. `pop_timeout` bounds how long a dispatcher takes to
//! notice shutdown.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, info_span, Instrument};

use tillpoint_observability::metrics;

use super::executor::{DispatchError, JobExecutor};
use super::registry::HandlerRegistry;
use super::types::{ClaimedJob, Job};
use crate::queue::{QueueStore, QueueTopology};

#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    /// Number of dispatcher tasks.
    pub concurrency: usize,
    pub pop_timeout: Duration,
    /// Pause after putting back a job whose `retryAfter` has not elapsed.
    pub not_ready_delay: Duration,
    /// Pause after an iteration failed (store unreachable, write-back failed).
    pub error_backoff: Duration,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            concurrency: 3,
            pop_timeout: Duration::from_secs(5),
            not_ready_delay: Duration::from_millis(100),
            error_backoff: Duration::from_secs(1),
        }
    }
}

impl DispatcherConfig {
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency;
        self
    }
}

/// Process-wide shutdown flag.
#[derive(Debug, Clone)]
pub struct ShutdownSignal {
    tx: Arc<watch::Sender<bool>>,
}

impl Default for ShutdownSignal {
    fn default() -> Self {
        Self::new()
    }
}

impl ShutdownSignal {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    /// Set the flag. Idempotent.
    pub fn trigger(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_triggered(&self) -> bool {
        *self.tx.borrow()
    }

    /// Resolve once [`trigger`](Self::trigger) has been called.
    pub async fn wait(&self) {
        let mut rx = self.tx.subscribe();
        // The sender lives in `self`, so the channel cannot close here.
        let _ = rx.wait_for(|triggered| *triggered).await;
    }
}

/// Count of jobs currently inside a handler, across all dispatchers.
#[derive(Debug, Clone, Default)]
pub struct ActiveJobs {
    count: Arc<AtomicUsize>,
}

impl ActiveJobs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self) -> usize {
        self.count.load(Ordering::SeqCst)
    }

    /// Count one job as active until the guard is dropped.
    pub fn enter(&self) -> ActiveJobGuard {
        let now = self.count.fetch_add(1, Ordering::SeqCst) + 1;
        metrics::set_active_jobs(now);
        ActiveJobGuard {
            count: self.count.clone(),
        }
    }
}

/// Decrements [`ActiveJobs`] on drop, whichever way the job ends.
#[derive(Debug)]
pub struct ActiveJobGuard {
    count: Arc<AtomicUsize>,
}

impl Drop for ActiveJobGuard {
    fn drop(&mut self) {
        let now = self.count.fetch_sub(1, Ordering::SeqCst) - 1;
        metrics::set_active_jobs(now);
    }
}

struct Dispatcher {
    config: DispatcherConfig,
    store: Arc<dyn QueueStore>,
    executor: JobExecutor,
    queues: Vec<String>,
    active: ActiveJobs,
    shutdown: ShutdownSignal,
}

impl Dispatcher {
    async fn run(self: Arc<Self>, id: usize) {
        info!(dispatcher = id, queues = ?self.queues, "dispatcher started");

        while !self.shutdown.is_triggered() {
            if let Err(err) = self.tick(id).await {
                error!(dispatcher = id, error = %err, "dispatcher iteration failed");
                tokio::time::sleep(self.config.error_backoff).await;
            }
        }

        info!(dispatcher = id, "dispatcher stopped");
    }

    /// One pop and whatever follows from it.
    async fn tick(&self, id: usize) -> Result<(), DispatchError> {
        let Some((queue, raw)) = self
            .store
            .blocking_pop_tail(&self.queues, self.config.pop_timeout)
            .await?
        else {
            return Ok(());
        };

        if self.shutdown.is_triggered() {
            self.store.push_head(&queue, &raw).await?;
            info!(dispatcher = id, queue = %queue, "shutting down, returned popped item to queue");
            return Ok(());
        }

        let job = match Job::decode(&raw) {
            Ok(job) => job,
            Err(err) => return self.executor.dead_letter_raw(&queue, &raw, &err).await,
        };

        if !job.is_ready_at(Utc::now()) {
            // Put the original bytes back untouched.
            self.store.push_head(&queue, &raw).await?;
            debug!(
                dispatcher = id,
                job_id = %job.id,
                queue = %queue,
                retry_after = ?job.retry_after,
                "job not ready, requeued"
            );
            tokio::time::sleep(self.config.not_ready_delay).await;
            return Ok(());
        }

        debug!(
            dispatcher = id,
            job_id = %job.id,
            queue = %queue,
            job_type = %job.job_type,
            attempts = job.attempts,
            "claimed job"
        );

        let job_id = job.id.clone();
        let _active = self.active.enter();
        self.executor
            .execute(ClaimedJob::new(queue, job))
            .await
            .inspect_err(|err| {
                error!(dispatcher = id, job_id = %job_id, error = %err, "failed to record job outcome");
            })?;
        Ok(())
    }
}

/// Handle to the running dispatcher tasks.
#[derive(Debug)]
pub struct DispatcherPool {
    handles: Vec<JoinHandle<()>>,
    active: ActiveJobs,
    concurrency: usize,
}

impl DispatcherPool {
    /// Spawn `config.concurrency` dispatchers on the current tokio runtime.
    pub fn spawn(
        config: DispatcherConfig,
        store: Arc<dyn QueueStore>,
        registry: Arc<HandlerRegistry>,
        topology: &QueueTopology,
        shutdown: ShutdownSignal,
    ) -> Self {
        let active = ActiveJobs::new();
        let concurrency = config.concurrency;
        let dispatcher = Arc::new(Dispatcher {
            executor: JobExecutor::new(store.clone(), registry, topology.dead_letter()),
            queues: topology.live_names().to_vec(),
            store,
            active: active.clone(),
            shutdown,
            config,
        });

        let handles = (0..concurrency)
            .map(|id| {
                let span = info_span!("dispatcher", id);
                tokio::spawn(dispatcher.clone().run(id).instrument(span))
            })
            .collect();

        info!(concurrency, "dispatcher pool started");
        Self {
            handles,
            active,
            concurrency,
        }
    }

    pub fn active_jobs(&self) -> ActiveJobs {
        self.active.clone()
    }

    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    /// Wait for every dispatcher task to exit. Only returns after shutdown
    /// has been triggered.
    pub async fn join(self) {
        for (id, handle) in self.handles.into_iter().enumerate() {
            if let Err(err) = handle.await {
                error!(dispatcher = id, error = %err, "dispatcher task panicked");
            }
        }
    }
}
