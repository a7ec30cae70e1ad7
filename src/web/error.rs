//! HTTP rendering of archive errors: a status code plus a short
//! machine-readable JSON body.

use crate::error::ArchiveError;
use axum::body::Body;
use axum::response::{IntoResponse, Response};
use http::StatusCode;

#[derive(Debug)]
pub struct ApiError(pub ArchiveError);

impl From<ArchiveError> for ApiError {
    fn from(e: ArchiveError) -> Self {
        ApiError(e)
    }
}

impl From<crate::storage::StorageError> for ApiError {
    fn from(e: crate::storage::StorageError) -> Self {
        ApiError(e.into())
    }
}

impl From<dicom_codec::CodecError> for ApiError {
    fn from(e: dicom_codec::CodecError) -> Self {
        ApiError(e.into())
    }
}

impl ApiError {
    fn status_and_kind(&self) -> (StatusCode, &'static str) {
        match &self.0 {
            ArchiveError::InvalidDicom(_) => (StatusCode::BAD_REQUEST, "invalid-dicom"),
            ArchiveError::StorageUnavailable(_) => {
                (StatusCode::SERVICE_UNAVAILABLE, "storage-unavailable")
            }
            ArchiveError::NoWriteVolume { .. } => {
                (StatusCode::SERVICE_UNAVAILABLE, "no-write-volume")
            }
            ArchiveError::UnknownVolume(_) => (StatusCode::SERVICE_UNAVAILABLE, "unknown-volume"),
            ArchiveError::DiskLow => (StatusCode::INSUFFICIENT_STORAGE, "disk-low"),
            ArchiveError::TenantNotFound(_) => (StatusCode::NOT_FOUND, "tenant-not-found"),
            ArchiveError::InvalidTenantCode(_) => (StatusCode::BAD_REQUEST, "invalid-tenant"),
            ArchiveError::Conflict { .. } => (StatusCode::CONFLICT, "conflict"),
            ArchiveError::FrameOutOfRange { .. } => (StatusCode::BAD_REQUEST, "frame-out-of-range"),
            ArchiveError::BadFrameList(_) => (StatusCode::BAD_REQUEST, "bad-frame-list"),
            ArchiveError::NotFound(_) => (StatusCode::NOT_FOUND, "not-found"),
            ArchiveError::Db(_)
            | ArchiveError::Queue(_)
            | ArchiveError::Cache(_)
            | ArchiveError::Config(_)
            | ArchiveError::Io(_) => (StatusCode::INTERNAL_SERVER_ERROR, "internal"),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, kind) = self.status_and_kind();
        if status.is_server_error() {
            tracing::error!("request failed: {}", self.0);
        }
        let body = serde_json::json!({
            "error": kind,
            "message": self.0.to_string(),
        });
        Response::builder()
            .status(status)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())
    }
}

pub type ApiResult<T> = std::result::Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::VolumeTier;

    #[test]
    fn error_statuses_follow_the_contract() {
        let cases = [
            (ArchiveError::DiskLow, StatusCode::INSUFFICIENT_STORAGE),
            (
                ArchiveError::TenantNotFound("h9".to_string()),
                StatusCode::NOT_FOUND,
            ),
            (
                ArchiveError::NoWriteVolume {
                    tier: VolumeTier::Hot,
                },
                StatusCode::SERVICE_UNAVAILABLE,
            ),
            (
                ArchiveError::Conflict {
                    entity: "patient",
                    id: 1,
                },
                StatusCode::CONFLICT,
            ),
            (
                ArchiveError::FrameOutOfRange {
                    requested: 21,
                    available: 20,
                },
                StatusCode::BAD_REQUEST,
            ),
            (
                ArchiveError::BadFrameList("a,b".to_string()),
                StatusCode::BAD_REQUEST,
            ),
        ];
        for (error, expected) in cases {
            let (status, _) = ApiError(error).status_and_kind();
            assert_eq!(status, expected);
        }
    }
}
