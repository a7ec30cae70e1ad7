//! Gateway-facing ingest endpoints: multipart upload into the spool plus
//! the transfer-commit hand-off for files a gateway already placed on
//! shared storage. Both only spool and enqueue; parsing and indexing
//! happen in the consumer.

use crate::error::ArchiveError;
use crate::queue::IngestMessage;
use crate::web::error::{ApiError, ApiResult};
use crate::web::{SharedState, Tenant};
use axum::extract::{Multipart, State};
use axum::Json;
use chrono::Utc;
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize)]
pub struct IngestReceipt {
    pub received: usize,
    pub queued: usize,
}

/// `POST /api/v1/{tenant}/ingest` — multipart/form-data, field `files`.
pub async fn upload(
    State(state): State<SharedState>,
    Tenant(tenant): Tenant,
    mut multipart: Multipart,
) -> ApiResult<Json<IngestReceipt>> {
    if state.gate.is_blocked() {
        return Err(ApiError(ArchiveError::DiskLow));
    }

    let mut received = 0;
    let mut queued = 0;
    while let Some(field) = multipart.next_field().await.map_err(|e| {
        ApiError(ArchiveError::InvalidDicom(
            dicom_codec::CodecError::InvalidDicom(format!("bad multipart body: {}", e)),
        ))
    })? {
        if field.name() != Some("files") {
            continue;
        }
        received += 1;
        let original_name = field.file_name().unwrap_or("upload.dcm").to_string();
        let data = field.bytes().await.map_err(|e| {
            ApiError(ArchiveError::InvalidDicom(
                dicom_codec::CodecError::InvalidDicom(format!("upload read failed: {}", e)),
            ))
        })?;

        let spool_path = crate::ingest::spool_file(&state.spool_dir, &tenant.code, &original_name);
        if let Some(parent) = spool_path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(ArchiveError::from)?;
        }
        tokio::fs::write(&spool_path, &data)
            .await
            .map_err(ArchiveError::from)?;

        state
            .queue
            .publish(&IngestMessage {
                file_path: spool_path.display().to_string(),
                tenant_code: tenant.code.clone(),
                received_at: Utc::now(),
            })
            .await?;
        queued += 1;
    }

    tracing::info!(tenant = %tenant.code, received, queued, "upload spooled");
    Ok(Json(IngestReceipt { received, queued }))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferCommit {
    pub tenant_code: String,
    pub files: Vec<String>,
}

/// `POST /api/v1/transfer/commit` — enqueue absolute paths already
/// written by a gateway.
pub async fn transfer_commit(
    State(state): State<SharedState>,
    Json(commit): Json<TransferCommit>,
) -> ApiResult<Json<IngestReceipt>> {
    if state.gate.is_blocked() {
        return Err(ApiError(ArchiveError::DiskLow));
    }
    crate::tenancy::validate_code(&commit.tenant_code)?;
    let active = crate::ingest::consumer::active_tenant_codes(&state.db, &state.caches).await?;
    if !active.iter().any(|c| c == &commit.tenant_code) {
        return Err(ApiError(ArchiveError::TenantNotFound(commit.tenant_code)));
    }

    let mut queued = 0;
    for file in &commit.files {
        state
            .queue
            .publish(&IngestMessage {
                file_path: file.clone(),
                tenant_code: commit.tenant_code.clone(),
                received_at: Utc::now(),
            })
            .await?;
        queued += 1;
    }
    Ok(Json(IngestReceipt {
        received: commit.files.len(),
        queued,
    }))
}
