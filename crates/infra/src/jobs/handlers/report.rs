//! `REPORT_GENERATION`: compute a report and persist the result.

use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use sqlx::{PgPool, Row};
use tracing::info;

use tillpoint_core::{DomainError, DomainResult, OutletId, ReportId, TenantId, UserId};

use super::{decode_payload, SinkError};
use crate::jobs::registry::{JobError, JobHandler};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReportType {
    SalesSummary,
    InventorySnapshot,
}

impl ReportType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReportType::SalesSummary => "SALES_SUMMARY",
            ReportType::InventorySnapshot => "INVENTORY_SNAPSHOT",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportRequest {
    pub tenant_id: TenantId,
    /// Row to fill in; a new id is minted when the producer did not pre-create one.
    #[serde(default)]
    pub report_id: Option<ReportId>,
    pub report_type: ReportType,
    #[serde(default)]
    pub outlet_id: Option<OutletId>,
    pub from: DateTime<Utc>,
    pub to: DateTime<Utc>,
    #[serde(default)]
    pub requested_by: Option<UserId>,
}

impl ReportRequest {
    pub fn validate(&self) -> DomainResult<()> {
        if self.from > self.to {
            return Err(DomainError::validation("report period ends before it starts"));
        }
        Ok(())
    }
}

#[async_trait]
pub trait ReportStore: Send + Sync {
    /// Compute the report and persist it under `report_id`. Returns the stored result.
    async fn generate(&self, report_id: ReportId, request: &ReportRequest) -> Result<Value, SinkError>;
}

pub struct ReportHandler {
    store: Arc<dyn ReportStore>,
}

impl ReportHandler {
    pub fn new(store: Arc<dyn ReportStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl JobHandler for ReportHandler {
    async fn handle(&self, payload: &Value) -> Result<(), JobError> {
        let request: ReportRequest = decode_payload(payload)?;
        request.validate()?;

        let report_id = request.report_id.unwrap_or_default();
        self.store.generate(report_id, &request).await?;

        info!(
            tenant_id = %request.tenant_id,
            report_id = %report_id,
            report_type = request.report_type.as_str(),
            "report generated"
        );
        Ok(())
    }
}

/// Aggregates straight from the POS tables and upserts into `reports`.
#[derive(Debug, Clone)]
pub struct PostgresReportStore {
    pool: PgPool,
}

impl PostgresReportStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn sales_summary(&self, request: &ReportRequest) -> Result<Value, SinkError> {
        let row = sqlx::query(
            r#"
            SELECT COUNT(*)::BIGINT AS sale_count,
                   COALESCE(SUM(total), 0)::TEXT AS gross_total
            FROM sales
            WHERE tenant_id = $1
              AND created_at >= $2 AND created_at < $3
              AND ($4::uuid IS NULL OR outlet_id = $4)
            "#,
        )
        .bind(request.tenant_id.as_uuid())
        .bind(request.from)
        .bind(request.to)
        .bind(request.outlet_id.map(|id| *id.as_uuid()))
        .fetch_one(&self.pool)
        .await?;

        Ok(json!({
            "saleCount": row.try_get::<i64, _>("sale_count")?,
            "grossTotal": row.try_get::<String, _>("gross_total")?,
        }))
    }

    async fn inventory_snapshot(&self, request: &ReportRequest) -> Result<Value, SinkError> {
        let row = sqlx::query(
            r#"
            SELECT COUNT(*)::BIGINT AS sku_count,
                   COALESCE(SUM(quantity), 0)::BIGINT AS units_on_hand
            FROM inventory_levels
            WHERE tenant_id = $1
              AND ($2::uuid IS NULL OR outlet_id = $2)
            "#,
        )
        .bind(request.tenant_id.as_uuid())
        .bind(request.outlet_id.map(|id| *id.as_uuid()))
        .fetch_one(&self.pool)
        .await?;

        Ok(json!({
            "skuCount": row.try_get::<i64, _>("sku_count")?,
            "unitsOnHand": row.try_get::<i64, _>("units_on_hand")?,
        }))
    }
}

#[async_trait]
impl ReportStore for PostgresReportStore {
    async fn generate(&self, report_id: ReportId, request: &ReportRequest) -> Result<Value, SinkError> {
        let result = match request.report_type {
            ReportType::SalesSummary => self.sales_summary(request).await?,
            ReportType::InventorySnapshot => self.inventory_snapshot(request).await?,
        };

        sqlx::query(
            r#"
            INSERT INTO reports
                (id, tenant_id, outlet_id, report_type, period_from, period_to, requested_by, status, result, generated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, 'COMPLETED', $8, NOW())
            ON CONFLICT (id) DO UPDATE
                SET status = 'COMPLETED',
                    result = EXCLUDED.result,
                    generated_at = EXCLUDED.generated_at
            "#,
        )
        .bind(report_id.as_uuid())
        .bind(request.tenant_id.as_uuid())
        .bind(request.outlet_id.map(|id| *id.as_uuid()))
        .bind(request.report_type.as_str())
        .bind(request.from)
        .bind(request.to)
        .bind(request.requested_by.map(|id| *id.as_uuid()))
        .bind(&result)
        .execute(&self.pool)
        .await?;

        Ok(result)
    }
}

/// Keeps generated reports in memory (tests/dev).
#[derive(Debug, Default)]
pub struct InMemoryReportStore {
    reports: Mutex<Vec<(ReportId, ReportRequest)>>,
}

impl InMemoryReportStore {
    pub fn reports(&self) -> Vec<(ReportId, ReportRequest)> {
        self.reports
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl ReportStore for InMemoryReportStore {
    async fn generate(&self, report_id: ReportId, request: &ReportRequest) -> Result<Value, SinkError> {
        self.reports
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((report_id, request.clone()));
        Ok(json!({ "reportType": request.report_type.as_str() }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn payload(tenant: TenantId) -> Value {
        json!({
            "tenantId": tenant.to_string(),
            "reportType": "SALES_SUMMARY",
            "from": "2024-03-01T00:00:00Z",
            "to": "2024-04-01T00:00:00Z"
        })
    }

    #[tokio::test]
    async fn generates_with_fresh_id_when_none_given() {
        let store = Arc::new(InMemoryReportStore::default());
        let handler = ReportHandler::new(store.clone());
        let tenant = TenantId::new();

        handler.handle(&payload(tenant)).await.unwrap();

        let reports = store.reports();
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].1.tenant_id, tenant);
        assert_eq!(reports[0].1.report_type, ReportType::SalesSummary);
    }

    #[tokio::test]
    async fn keeps_producer_report_id() {
        let store = Arc::new(InMemoryReportStore::default());
        let handler = ReportHandler::new(store.clone());
        let report_id = ReportId::new();

        let mut body = payload(TenantId::new());
        body["reportId"] = json!(report_id.to_string());
        body["reportType"] = json!("INVENTORY_SNAPSHOT");
        handler.handle(&body).await.unwrap();

        assert_eq!(store.reports()[0].0, report_id);
    }

    #[tokio::test]
    async fn rejects_unknown_type_and_inverted_period() {
        let handler = ReportHandler::new(Arc::new(InMemoryReportStore::default()));

        let mut unknown = payload(TenantId::new());
        unknown["reportType"] = json!("PROFIT_AND_LOSS");
        assert!(matches!(
            handler.handle(&unknown).await.unwrap_err(),
            JobError::InvalidPayload(_)
        ));

        let mut inverted = payload(TenantId::new());
        inverted["from"] = json!("2024-05-01T00:00:00Z");
        assert!(matches!(
            handler.handle(&inverted).await.unwrap_err(),
            JobError::InvalidPayload(_)
        ));
    }
}
