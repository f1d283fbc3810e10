//! Built-in job handlers.
//!
//! Each handler decodes its payload, then delegates the side effect to a
//! sink trait so Postgres/SMTP can be swapped for in-memory fakes in tests.

pub mod audit_log;
pub mod email;
pub mod report;

use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde_json::Value;

use tillpoint_core::DomainError;

use super::registry::{HandlerRegistry, JobError, RegistryError};
use super::types::JobType;

pub use audit_log::{AuditLogEntry, AuditLogHandler, AuditLogSink, InMemoryAuditLogSink, PostgresAuditLogSink};
pub use email::{EmailHandler, EmailMessage, LogMailer, MailError, Mailer, RecordingMailer, SmtpConfig, SmtpMailer};
pub use report::{
    InMemoryReportStore, PostgresReportStore, ReportHandler, ReportRequest, ReportStore, ReportType,
};

/// Failure of a persistence sink behind a handler.
#[derive(Debug, thiserror::Error)]
pub enum SinkError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("failed to encode record: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("sink unavailable: {0}")]
    Unavailable(String),
}

impl From<SinkError> for JobError {
    fn from(err: SinkError) -> Self {
        match err {
            // A record we cannot serialize will not serialize next time either.
            SinkError::Encode(e) => JobError::permanent(e.to_string()),
            other => JobError::failed(other.to_string()),
        }
    }
}

impl From<DomainError> for JobError {
    fn from(err: DomainError) -> Self {
        JobError::invalid_payload(err.to_string())
    }
}

pub(crate) fn decode_payload<T: DeserializeOwned>(payload: &Value) -> Result<T, JobError> {
    T::deserialize(payload).map_err(JobError::from)
}

/// Register the three built-in handlers.
pub fn register_builtin(
    registry: &mut HandlerRegistry,
    audit: Arc<dyn AuditLogSink>,
    mailer: Arc<dyn Mailer>,
    reports: Arc<dyn ReportStore>,
) -> Result<(), RegistryError> {
    registry.register(JobType::audit_log(), Arc::new(AuditLogHandler::new(audit)))?;
    registry.register(JobType::email_notification(), Arc::new(EmailHandler::new(mailer)))?;
    registry.register(JobType::report_generation(), Arc::new(ReportHandler::new(reports)))?;
    Ok(())
}
