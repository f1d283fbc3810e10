//! Structured logging and Prometheus metrics for the Tillpoint worker.

/// Install the JSON log subscriber. Idempotent.
pub fn init() {
    tracing::init();
}

pub mod tracing;

/// Prometheus recorder and job metric helpers.
pub mod metrics;

pub use self::metrics::{JobStatusLabel, MetricsError, MetricsHandle};
