//! Status HTTP surface (Axum router).
//!
//! - `routes.rs`: `/health`, `/metrics`, `/dlq`
//! - `errors.rs`: consistent error responses

use std::sync::Arc;

use axum::{routing::get, Extension, Router};
use tower::ServiceBuilder;

use tillpoint_infra::jobs::ActiveJobs;
use tillpoint_infra::queue::QueueStore;
use tillpoint_observability::MetricsHandle;

use crate::lifecycle::Lifecycle;

pub mod errors;
pub mod routes;

/// Read-only view of the worker shared with the status routes.
#[derive(Clone)]
pub struct StatusState {
    pub lifecycle: Lifecycle,
    pub active: ActiveJobs,
    pub concurrency: usize,
    pub store: Arc<dyn QueueStore>,
    pub dead_letter: String,
    /// `None` when no Prometheus recorder is installed; `/metrics` is then empty.
    pub metrics: Option<MetricsHandle>,
}

pub fn build_app(state: StatusState) -> Router {
    Router::new()
        .route("/health", get(routes::health))
        .route("/metrics", get(routes::metrics))
        .route("/dlq", get(routes::dead_letter))
        .layer(ServiceBuilder::new().layer(Extension(Arc::new(state))))
}
