use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde_json::json;

use tillpoint_infra::queue::QueueError;

pub fn queue_error_to_response(err: QueueError) -> axum::response::Response {
    match err {
        QueueError::Closed => json_error(
            StatusCode::SERVICE_UNAVAILABLE,
            "queue_closed",
            "queue store is closed",
        ),
        other => json_error(
            StatusCode::SERVICE_UNAVAILABLE,
            "queue_unavailable",
            other.to_string(),
        ),
    }
}

pub fn json_error(
    status: StatusCode,
    code: &'static str,
    message: impl Into<String>,
) -> axum::response::Response {
    (
        status,
        axum::Json(json!({
            "error": code,
            "message": message.into(),
        })),
    )
        .into_response()
}
