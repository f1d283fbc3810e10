use std::sync::Arc;

use axum::{
    extract::Extension,
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

use super::errors::queue_error_to_response;
use super::StatusState;

pub const PROMETHEUS_CONTENT_TYPE: &str = "text/plain; version=0.0.4";

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    pub status: &'static str,
    /// Jobs currently inside a handler.
    pub active_workers: usize,
    pub is_shutting_down: bool,
    pub concurrency: usize,
}

#[derive(Debug, Serialize)]
pub struct DeadLetterResponse {
    pub queue: String,
    pub depth: u64,
}

/// 200 `ok` while running, 503 `shutting_down` once draining.
pub async fn health(Extension(state): Extension<Arc<StatusState>>) -> impl IntoResponse {
    let is_shutting_down = state.lifecycle.state().is_shutting_down();
    let (code, status) = if is_shutting_down {
        (StatusCode::SERVICE_UNAVAILABLE, "shutting_down")
    } else {
        (StatusCode::OK, "ok")
    };

    (
        code,
        Json(HealthResponse {
            status,
            active_workers: state.active.get(),
            is_shutting_down,
            concurrency: state.concurrency,
        }),
    )
}

pub async fn metrics(Extension(state): Extension<Arc<StatusState>>) -> impl IntoResponse {
    let body = state
        .metrics
        .as_ref()
        .map(|handle| handle.render())
        .unwrap_or_default();

    ([(header::CONTENT_TYPE, PROMETHEUS_CONTENT_TYPE)], body)
}

pub async fn dead_letter(Extension(state): Extension<Arc<StatusState>>) -> Response {
    match state.store.length(&state.dead_letter).await {
        Ok(depth) => Json(DeadLetterResponse {
            queue: state.dead_letter.clone(),
            depth,
        })
        .into_response(),
        Err(err) => queue_error_to_response(err),
    }
}
