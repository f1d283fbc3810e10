//! Job handler trait and the type-tag → handler registry.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use super::types::JobType;

/// Failure of a single job attempt.
///
/// Handlers only classify what went wrong; the executor decides whether the
/// job is retried or dead-lettered.
#[derive(Debug, thiserror::Error)]
pub enum JobError {
    #[error("unknown job type: {0}")]
    UnknownType(String),

    #[error("invalid payload: {0}")]
    InvalidPayload(String),

    /// Transient failure; the job may succeed on a later attempt.
    #[error("{0}")]
    Failed(String),

    /// Deterministic failure; retrying cannot help.
    #[error("permanent failure: {0}")]
    Permanent(String),
}

impl JobError {
    pub fn failed(msg: impl Into<String>) -> Self {
        Self::Failed(msg.into())
    }

    pub fn permanent(msg: impl Into<String>) -> Self {
        Self::Permanent(msg.into())
    }

    pub fn invalid_payload(msg: impl Into<String>) -> Self {
        Self::InvalidPayload(msg.into())
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Failed(_))
    }
}

impl From<serde_json::Error> for JobError {
    fn from(err: serde_json::Error) -> Self {
        Self::InvalidPayload(err.to_string())
    }
}

/// Asynchronous side effect for one job type.
#[async_trait]
pub trait JobHandler: Send + Sync {
    async fn handle(&self, payload: &Value) -> Result<(), JobError>;
}

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("handler already registered for job type {0}")]
    Duplicate(JobType),
}

/// Mapping from job type to handler.
///
/// Filled once at startup, then shared read-only behind an `Arc`.
#[derive(Default, Clone)]
pub struct HandlerRegistry {
    handlers: HashMap<JobType, Arc<dyn JobHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(
        &mut self,
        job_type: JobType,
        handler: Arc<dyn JobHandler>,
    ) -> Result<(), RegistryError> {
        if self.handlers.contains_key(&job_type) {
            return Err(RegistryError::Duplicate(job_type));
        }
        self.handlers.insert(job_type, handler);
        Ok(())
    }

    /// Builder-style [`register`](Self::register).
    pub fn with(mut self, job_type: JobType, handler: Arc<dyn JobHandler>) -> Result<Self, RegistryError> {
        self.register(job_type, handler)?;
        Ok(self)
    }

    pub fn get(&self, job_type: &JobType) -> Option<Arc<dyn JobHandler>> {
        self.handlers.get(job_type).cloned()
    }

    /// Registered types, sorted for stable logging.
    pub fn registered_types(&self) -> Vec<&JobType> {
        let mut types: Vec<_> = self.handlers.keys().collect();
        types.sort_by(|a, b| a.as_str().cmp(b.as_str()));
        types
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

impl std::fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerRegistry")
            .field("types", &self.registered_types())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Noop;

    #[async_trait]
    impl JobHandler for Noop {
        async fn handle(&self, _payload: &Value) -> Result<(), JobError> {
            Ok(())
        }
    }

    #[test]
    fn only_transient_failures_are_retryable() {
        assert!(JobError::failed("timeout").is_retryable());
        assert!(!JobError::permanent("bad address").is_retryable());
        assert!(!JobError::invalid_payload("missing to").is_retryable());
        assert!(!JobError::UnknownType("X".into()).is_retryable());
    }

    #[test]
    fn duplicate_registration_is_rejected() {
        let mut registry = HandlerRegistry::new();
        registry.register(JobType::audit_log(), Arc::new(Noop)).unwrap();

        let err = registry
            .register(JobType::audit_log(), Arc::new(Noop))
            .unwrap_err();
        assert!(matches!(err, RegistryError::Duplicate(t) if t == JobType::audit_log()));
        assert_eq!(registry.len(), 1);
    }

    #[tokio::test]
    async fn looks_up_handlers_by_type() {
        let registry = HandlerRegistry::new()
            .with(JobType::report_generation(), Arc::new(Noop))
            .unwrap()
            .with(JobType::audit_log(), Arc::new(Noop))
            .unwrap();

        let handler = registry.get(&JobType::audit_log()).unwrap();
        handler.handle(&serde_json::json!({})).await.unwrap();

        assert!(registry.get(&JobType::new("UNKNOWN")).is_none());
        assert_eq!(
            registry.registered_types(),
            vec![&JobType::audit_log(), &JobType::report_generation()]
        );
    }
}
