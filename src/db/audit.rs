//! Per-tenant audit trail. Writes are fire-and-forget: a failed audit
//! insert is logged and never fails the operation that produced it.

use crate::tenancy::TenantCtx;
use crate::Db;
use serde_json::Value;

#[derive(Debug, Clone, Copy)]
pub enum AuditEvent {
    IngestBatch,
    PatientCorrection,
    CompressionRun,
    MigrationRun,
    AdminChange,
}

impl AuditEvent {
    fn as_str(&self) -> &'static str {
        match self {
            AuditEvent::IngestBatch => "INGEST_BATCH",
            AuditEvent::PatientCorrection => "PATIENT_CORRECTION",
            AuditEvent::CompressionRun => "COMPRESSION_RUN",
            AuditEvent::MigrationRun => "MIGRATION_RUN",
            AuditEvent::AdminChange => "ADMIN_CHANGE",
        }
    }
}

pub async fn record(db: &Db, tenant: &TenantCtx, event: AuditEvent, details: Value) {
    let result = async {
        let mut conn = db.tenant_conn(tenant).await?;
        sqlx::query(
            "INSERT INTO audit_log (event, details, created_at) VALUES ($1, $2, now())",
        )
        .bind(event.as_str())
        .bind(details)
        .execute(&mut *conn)
        .await?;
        crate::error::Result::Ok(())
    }
    .await;
    if let Err(e) = result {
        tracing::warn!(tenant = %tenant.code, event = event.as_str(), "audit write failed: {}", e);
    }
}
