//! `AUDIT_LOG`: append an entry to the tenant's audit trail.

use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::PgPool;
use tracing::debug;
use uuid::Uuid;

use tillpoint_core::{DomainError, DomainResult, TenantId, UserId};

use super::{decode_payload, SinkError};
use crate::jobs::registry::{JobError, JobHandler};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditLogEntry {
    pub tenant_id: TenantId,
    #[serde(default)]
    pub user_id: Option<UserId>,
    pub action: String,
    pub entity_type: String,
    #[serde(default)]
    pub entity_id: Option<String>,
    /// Before/after snapshot, stored as-is.
    #[serde(default)]
    pub changes: Option<Value>,
    #[serde(default)]
    pub ip_address: Option<String>,
    #[serde(default)]
    pub user_agent: Option<String>,
}

impl AuditLogEntry {
    pub fn validate(&self) -> DomainResult<()> {
        if self.action.trim().is_empty() {
            return Err(DomainError::validation("action is empty"));
        }
        if self.entity_type.trim().is_empty() {
            return Err(DomainError::validation("entityType is empty"));
        }
        Ok(())
    }
}

#[async_trait]
pub trait AuditLogSink: Send + Sync {
    async fn record(&self, entry: &AuditLogEntry) -> Result<(), SinkError>;
}

pub struct AuditLogHandler {
    sink: Arc<dyn AuditLogSink>,
}

impl AuditLogHandler {
    pub fn new(sink: Arc<dyn AuditLogSink>) -> Self {
        Self { sink }
    }
}

#[async_trait]
impl JobHandler for AuditLogHandler {
    async fn handle(&self, payload: &Value) -> Result<(), JobError> {
        let entry: AuditLogEntry = decode_payload(payload)?;
        entry.validate()?;

        self.sink.record(&entry).await?;
        debug!(
            tenant_id = %entry.tenant_id,
            action = %entry.action,
            entity_type = %entry.entity_type,
            "audit log entry recorded"
        );
        Ok(())
    }
}

/// Writes entries to the `audit_logs` table.
#[derive(Debug, Clone)]
pub struct PostgresAuditLogSink {
    pool: PgPool,
}

impl PostgresAuditLogSink {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl AuditLogSink for PostgresAuditLogSink {
    async fn record(&self, entry: &AuditLogEntry) -> Result<(), SinkError> {
        sqlx::query(
            r#"
            INSERT INTO audit_logs
                (id, tenant_id, user_id, action, entity_type, entity_id, changes, ip_address, user_agent, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#,
        )
        .bind(Uuid::now_v7())
        .bind(entry.tenant_id.as_uuid())
        .bind(entry.user_id.map(|id| *id.as_uuid()))
        .bind(&entry.action)
        .bind(&entry.entity_type)
        .bind(entry.entity_id.as_deref())
        .bind(entry.changes.as_ref())
        .bind(entry.ip_address.as_deref())
        .bind(entry.user_agent.as_deref())
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

/// Keeps entries in memory (tests/dev).
#[derive(Debug, Default)]
pub struct InMemoryAuditLogSink {
    entries: Mutex<Vec<AuditLogEntry>>,
}

impl InMemoryAuditLogSink {
    pub fn entries(&self) -> Vec<AuditLogEntry> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl AuditLogSink for InMemoryAuditLogSink {
    async fn record(&self, entry: &AuditLogEntry) -> Result<(), SinkError> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(entry.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct DownSink;

    #[async_trait]
    impl AuditLogSink for DownSink {
        async fn record(&self, _entry: &AuditLogEntry) -> Result<(), SinkError> {
            Err(SinkError::Unavailable("connection refused".into()))
        }
    }

    fn payload(tenant: TenantId) -> Value {
        json!({
            "tenantId": tenant.to_string(),
            "action": "SALE_VOIDED",
            "entityType": "Sale",
            "entityId": "S-1001",
            "changes": {"status": ["COMPLETED", "VOIDED"]},
            "ipAddress": "10.0.0.7"
        })
    }

    #[tokio::test]
    async fn records_decoded_entry() {
        let sink = Arc::new(InMemoryAuditLogSink::default());
        let handler = AuditLogHandler::new(sink.clone());
        let tenant = TenantId::new();

        handler.handle(&payload(tenant)).await.unwrap();

        let entries = sink.entries();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].tenant_id, tenant);
        assert_eq!(entries[0].action, "SALE_VOIDED");
        assert_eq!(entries[0].user_id, None);
        assert_eq!(entries[0].ip_address.as_deref(), Some("10.0.0.7"));
    }

    #[tokio::test]
    async fn rejects_missing_or_empty_fields() {
        let handler = AuditLogHandler::new(Arc::new(InMemoryAuditLogSink::default()));

        let missing = handler.handle(&json!({"action": "X"})).await.unwrap_err();
        assert!(matches!(missing, JobError::InvalidPayload(_)));

        let mut blank = payload(TenantId::new());
        blank["action"] = json!("  ");
        let err = handler.handle(&blank).await.unwrap_err();
        assert!(matches!(err, JobError::InvalidPayload(_)));
    }

    #[tokio::test]
    async fn sink_outage_is_retryable() {
        let handler = AuditLogHandler::new(Arc::new(DownSink));
        let err = handler.handle(&payload(TenantId::new())).await.unwrap_err();
        assert!(err.is_retryable());
    }
}
