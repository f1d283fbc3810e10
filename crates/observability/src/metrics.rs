//! Job metrics on the `metrics` facade, rendered by the Prometheus exporter.
//!
//! Recording helpers are no-ops until [`MetricsHandle::install`] has run, so
//! library code and tests can call them unconditionally.

use std::time::Duration;

use metrics::{describe_counter, describe_gauge, describe_histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

pub const JOBS_PROCESSED: &str = "tillpoint_jobs_processed_total";
pub const JOB_RETRIES: &str = "tillpoint_job_retries_total";
pub const JOB_DURATION: &str = "tillpoint_job_duration_seconds";
pub const QUEUE_DEPTH: &str = "tillpoint_queue_depth";
pub const ACTIVE_JOBS: &str = "tillpoint_active_jobs";

#[derive(Debug, thiserror::Error)]
pub enum MetricsError {
    #[error("failed to install Prometheus recorder: {0}")]
    Install(String),
}

/// Final status of one processed job, used as the `status` label.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobStatusLabel {
    Success,
    Retried,
    DeadLettered,
}

impl JobStatusLabel {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatusLabel::Success => "success",
            JobStatusLabel::Retried => "retried",
            JobStatusLabel::DeadLettered => "dead_lettered",
        }
    }
}

/// Handle to the installed Prometheus recorder.
#[derive(Clone)]
pub struct MetricsHandle {
    handle: PrometheusHandle,
}

impl MetricsHandle {
    /// Install the Prometheus recorder globally and describe all metrics.
    ///
    /// Only one recorder can be installed per process.
    pub fn install() -> Result<Self, MetricsError> {
        let handle = PrometheusBuilder::new()
            .install_recorder()
            .map_err(|e| MetricsError::Install(e.to_string()))?;

        register_metrics();
        ::tracing::info!("prometheus metrics recorder installed");

        Ok(Self { handle })
    }

    /// Render all collected metrics in Prometheus text format.
    pub fn render(&self) -> String {
        self.handle.render()
    }
}

impl std::fmt::Debug for MetricsHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetricsHandle").finish_non_exhaustive()
    }
}

fn register_metrics() {
    describe_counter!(JOBS_PROCESSED, "Jobs taken off a queue, by final status");
    describe_counter!(JOB_RETRIES, "Jobs re-queued with backoff after a failure");
    describe_histogram!(JOB_DURATION, "Handler execution time in seconds");
    describe_gauge!(QUEUE_DEPTH, "Items currently waiting in each queue");
    describe_gauge!(ACTIVE_JOBS, "Jobs currently being handled by dispatchers");
}

pub fn record_job_processed(queue: &str, job_type: &str, status: JobStatusLabel) {
    metrics::counter!(
        JOBS_PROCESSED,
        "queue" => queue.to_string(),
        "job_type" => job_type.to_string(),
        "status" => status.as_str()
    )
    .increment(1);
}

pub fn record_retry(queue: &str, job_type: &str) {
    metrics::counter!(
        JOB_RETRIES,
        "queue" => queue.to_string(),
        "job_type" => job_type.to_string()
    )
    .increment(1);
}

pub fn record_job_duration(job_type: &str, elapsed: Duration) {
    metrics::histogram!(JOB_DURATION, "job_type" => job_type.to_string())
        .record(elapsed.as_secs_f64());
}

pub fn set_queue_depth(queue: &str, depth: u64) {
    metrics::gauge!(QUEUE_DEPTH, "queue" => queue.to_string()).set(depth as f64);
}

pub fn set_active_jobs(count: usize) {
    metrics::gauge!(ACTIVE_JOBS).set(count as f64);
}
