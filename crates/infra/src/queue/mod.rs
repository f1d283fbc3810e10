//! Shared job queues.
//!
//! Queues are named Redis lists. Producers push at the head, dispatchers pop
//! from the tail, so each queue is FIFO. Across queues, the order of the name
//! list handed to [`QueueStore::blocking_pop_tail`] decides who is served
//! first; that order comes from [`QueueTopology`].

pub mod in_memory;
#[cfg(feature = "redis")]
pub mod redis_store;

use std::time::Duration;

use async_trait::async_trait;

use crate::jobs::types::JobType;

pub use in_memory::InMemoryQueueStore;
#[cfg(feature = "redis")]
pub use redis_store::{RedisQueueStore, RedisQueueStoreConfig};

pub const AUDIT_LOG_QUEUE: &str = "queue:audit_log";
pub const EMAIL_NOTIFICATION_QUEUE: &str = "queue:email_notification";
pub const REPORT_GENERATION_QUEUE: &str = "queue:report_generation";
pub const DEAD_LETTER_QUEUE: &str = "queue:dead_letter";

/// Queue store error.
#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("connection pool error: {0}")]
    Pool(String),
    #[error("queue command failed: {0}")]
    Command(String),
    #[error("queue store is closed")]
    Closed,
}

/// Key-ordered list service holding the persisted job queues.
///
/// Implementations must make each pop atomic per item across concurrent
/// callers; dispatchers rely on that instead of any in-process locking.
#[async_trait]
pub trait QueueStore: Send + Sync {
    /// Insert `item` at the head of `queue`.
    async fn push_head(&self, queue: &str, item: &str) -> Result<(), QueueError>;

    /// Pop the oldest item of the first non-empty queue in `queues`, waiting
    /// up to `timeout` for one to appear. `None` on timeout.
    async fn blocking_pop_tail(
        &self,
        queues: &[String],
        timeout: Duration,
    ) -> Result<Option<(String, String)>, QueueError>;

    /// Number of items currently in `queue`.
    async fn length(&self, queue: &str) -> Result<u64, QueueError>;

    /// Connectivity check.
    async fn ping(&self) -> Result<(), QueueError>;

    /// Release connections. Calls made afterwards fail.
    fn close(&self) {}
}

/// One live queue and its static priority rank (lower is served first).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueSpec {
    pub name: String,
    pub priority: u8,
    pub job_type: JobType,
}

impl QueueSpec {
    pub fn new(name: impl Into<String>, priority: u8, job_type: JobType) -> Self {
        Self {
            name: name.into(),
            priority,
            job_type,
        }
    }
}

/// Immutable, priority-ordered set of live queues plus the dead-letter queue.
///
/// Built once at startup. The dispatcher never derives a queue name from a
/// job type; it carries the originating queue alongside each claimed job.
#[derive(Debug, Clone)]
pub struct QueueTopology {
    queues: Vec<QueueSpec>,
    live_names: Vec<String>,
    dead_letter: String,
}

impl QueueTopology {
    pub fn new(mut queues: Vec<QueueSpec>, dead_letter: impl Into<String>) -> Self {
        // Stable sort: equal ranks keep declaration order.
        queues.sort_by_key(|q| q.priority);
        let live_names = queues.iter().map(|q| q.name.clone()).collect();
        Self {
            queues,
            live_names,
            dead_letter: dead_letter.into(),
        }
    }

    /// Live queue names in poll order.
    pub fn live_names(&self) -> &[String] {
        &self.live_names
    }

    pub fn queues(&self) -> &[QueueSpec] {
        &self.queues
    }

    pub fn dead_letter(&self) -> &str {
        &self.dead_letter
    }

    /// Queue producers should push jobs of `job_type` onto.
    pub fn queue_for(&self, job_type: &JobType) -> Option<&str> {
        self.queues
            .iter()
            .find(|q| &q.job_type == job_type)
            .map(|q| q.name.as_str())
    }
}

impl Default for QueueTopology {
    fn default() -> Self {
        Self::new(
            vec![
                QueueSpec::new(AUDIT_LOG_QUEUE, 1, JobType::audit_log()),
                QueueSpec::new(EMAIL_NOTIFICATION_QUEUE, 2, JobType::email_notification()),
                QueueSpec::new(REPORT_GENERATION_QUEUE, 3, JobType::report_generation()),
            ],
            DEAD_LETTER_QUEUE,
        )
    }
}
