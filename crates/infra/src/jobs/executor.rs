//! Runs one claimed job and applies the retry / dead-letter policy.

use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use serde_json::Value;
use tracing::{debug, error, warn};

use tillpoint_observability::metrics::{self, JobStatusLabel};

use super::registry::{HandlerRegistry, JobError, JobHandler};
use super::types::{ClaimedJob, DeadLetterRecord, UndecodableRecord};
use crate::queue::{QueueError, QueueStore};

/// Failure of the dispatch machinery itself (not of the job).
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error(transparent)]
    Queue(#[from] QueueError),

    #[error("failed to encode job: {0}")]
    Encode(#[from] serde_json::Error),
}

/// What happened to a job after one attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Completed,
    /// Re-queued on its originating queue.
    Retried { attempts: u32, retry_after: i64 },
    /// Written to the dead-letter queue; never retried automatically.
    DeadLettered { reason: String },
}

/// Executes jobs against the handler registry.
///
/// Retries go back to the queue the job was popped from; the executor never
/// derives a queue name from the job type.
#[derive(Clone)]
pub struct JobExecutor {
    store: Arc<dyn QueueStore>,
    registry: Arc<HandlerRegistry>,
    dead_letter: String,
}

impl JobExecutor {
    pub fn new(
        store: Arc<dyn QueueStore>,
        registry: Arc<HandlerRegistry>,
        dead_letter: impl Into<String>,
    ) -> Self {
        Self {
            store,
            registry,
            dead_letter: dead_letter.into(),
        }
    }

    pub fn dead_letter_queue(&self) -> &str {
        &self.dead_letter
    }

    /// Run the job's handler once.
    ///
    /// Handler failures are absorbed into the returned [`Outcome`]; only
    /// failures to write back to the store are errors.
    pub async fn execute(&self, claimed: ClaimedJob) -> Result<Outcome, DispatchError> {
        let Some(handler) = self.registry.get(&claimed.job.job_type) else {
            let err = JobError::UnknownType(claimed.job.job_type.to_string());
            return self.dead_letter(claimed, err).await;
        };

        let started = Instant::now();
        let result = run_isolated(handler, claimed.job.payload.clone()).await;
        metrics::record_job_duration(claimed.job.job_type.as_str(), started.elapsed());

        match result {
            Ok(()) => {
                metrics::record_job_processed(
                    &claimed.queue,
                    claimed.job.job_type.as_str(),
                    JobStatusLabel::Success,
                );
                debug!(
                    job_id = %claimed.job.id,
                    queue = %claimed.queue,
                    job_type = %claimed.job.job_type,
                    attempts = claimed.job.attempts,
                    "job completed"
                );
                Ok(Outcome::Completed)
            }
            Err(err) if err.is_retryable() && claimed.job.has_attempts_left() => {
                self.retry(claimed, err).await
            }
            Err(err) => self.dead_letter(claimed, err).await,
        }
    }

    async fn retry(&self, claimed: ClaimedJob, err: JobError) -> Result<Outcome, DispatchError> {
        let ClaimedJob { queue, mut job } = claimed;
        job.prepare_retry(Utc::now());
        let retry_after = job.retry_after.unwrap_or_default();

        self.store.push_head(&queue, &job.encode()?).await?;

        metrics::record_retry(&queue, job.job_type.as_str());
        metrics::record_job_processed(&queue, job.job_type.as_str(), JobStatusLabel::Retried);
        warn!(
            job_id = %job.id,
            queue = %queue,
            job_type = %job.job_type,
            attempts = job.attempts,
            max_attempts = job.max_attempts,
            retry_after,
            error = %err,
            "job failed, scheduled for retry"
        );

        Ok(Outcome::Retried {
            attempts: job.attempts,
            retry_after,
        })
    }

    async fn dead_letter(
        &self,
        claimed: ClaimedJob,
        err: JobError,
    ) -> Result<Outcome, DispatchError> {
        let reason = err.to_string();
        let record = DeadLetterRecord::new(claimed, reason.clone(), Some(format!("{err:?}")), Utc::now());

        self.store
            .push_head(&self.dead_letter, &serde_json::to_string(&record)?)
            .await?;

        metrics::record_job_processed(
            &record.queue,
            record.job.job_type.as_str(),
            JobStatusLabel::DeadLettered,
        );
        error!(
            job_id = %record.job.id,
            queue = %record.queue,
            job_type = %record.job.job_type,
            attempts = record.job.attempts,
            retryable = err.is_retryable(),
            error = %reason,
            "job dead-lettered"
        );

        Ok(Outcome::DeadLettered { reason })
    }

    /// Move a payload that could not be decoded into the dead-letter queue as-is.
    pub async fn dead_letter_raw(
        &self,
        queue: &str,
        raw: &str,
        err: &serde_json::Error,
    ) -> Result<(), DispatchError> {
        let record = UndecodableRecord::new(queue, raw, err.to_string());
        self.store
            .push_head(&self.dead_letter, &serde_json::to_string(&record)?)
            .await?;

        metrics::record_job_processed(queue, "UNDECODABLE", JobStatusLabel::DeadLettered);
        error!(queue = %queue, error = %err, "undecodable job dead-lettered");
        Ok(())
    }
}

/// Run the handler on its own task so a panic surfaces as a retryable
/// failure instead of unwinding through the dispatcher.
async fn run_isolated(handler: Arc<dyn JobHandler>, payload: Value) -> Result<(), JobError> {
    match tokio::spawn(async move { handler.handle(&payload).await }).await {
        Ok(result) => result,
        Err(err) if err.is_panic() => {
            let panic = err.into_panic();
            let message = panic
                .downcast_ref::<&str>()
                .map(|s| (*s).to_string())
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic payload".to_string());
            Err(JobError::failed(format!("handler panicked: {message}")))
        }
        Err(err) => Err(JobError::failed(format!("handler task cancelled: {err}"))),
    }
}

impl std::fmt::Debug for JobExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobExecutor")
            .field("registry", &self.registry)
            .field("dead_letter", &self.dead_letter)
            .finish_non_exhaustive()
    }
}
