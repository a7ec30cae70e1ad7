//! STOW-RS: store over web.
//!
//! Request bodies are `multipart/related; type="application/dicom"`,
//! parsed with a conformant multipart parser. Accepted parts are spooled
//! and queued through the same pipeline as gateway ingest; the response
//! is a PS3.18 DICOM JSON dataset with ReferencedSOPSequence and
//! FailedSOPSequence, and 200/202/409 for all/partial/none accepted.

use crate::error::ArchiveError;
use crate::queue::IngestMessage;
use crate::web::error::{ApiError, ApiResult};
use crate::web::{SharedState, Tenant};
use axum::body::Body;
use axum::extract::State;
use axum::response::Response;
use chrono::Utc;
use dicom_codec::json::JsonItem;
use dicom_core::Tag;
use http::{HeaderMap, StatusCode};
use std::io::Cursor;

const REFERENCED_SOP_CLASS_UID: Tag = Tag(0x0008, 0x1150);
const REFERENCED_SOP_INSTANCE_UID: Tag = Tag(0x0008, 0x1155);
const FAILED_SOP_SEQUENCE: Tag = Tag(0x0008, 0x1198);
const REFERENCED_SOP_SEQUENCE: Tag = Tag(0x0008, 0x1199);
const FAILURE_REASON: Tag = Tag(0x0008, 0x1197);

/// PS3.18: 0x0110 "processing failure".
const REASON_PROCESSING_FAILURE: i64 = 0x0110;
/// PS3.18: 0xC000-level "cannot understand" for unparsable instances.
const REASON_CANNOT_UNDERSTAND: i64 = 0xC000;

struct Accepted {
    sop_class_uid: String,
    sop_uid: String,
}

struct Rejected {
    sop_class_uid: Option<String>,
    sop_uid: Option<String>,
    reason: i64,
}

pub async fn store(
    State(state): State<SharedState>,
    Tenant(tenant): Tenant,
    headers: HeaderMap,
    body: Body,
) -> ApiResult<Response> {
    if state.gate.is_blocked() {
        return Err(ApiError(ArchiveError::DiskLow));
    }

    let content_type = headers
        .get("content-type")
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| {
            ApiError(ArchiveError::InvalidDicom(
                dicom_codec::CodecError::InvalidDicom("missing content-type".to_string()),
            ))
        })?;
    let boundary = multer::parse_boundary(content_type).map_err(|e| {
        ApiError(ArchiveError::InvalidDicom(
            dicom_codec::CodecError::InvalidDicom(format!("bad multipart type: {}", e)),
        ))
    })?;

    let mut parts = multer::Multipart::new(body.into_data_stream(), boundary);
    let mut accepted: Vec<Accepted> = Vec::new();
    let mut rejected: Vec<Rejected> = Vec::new();

    loop {
        let field = match parts.next_field().await {
            Ok(Some(field)) => field,
            Ok(None) => break,
            Err(e) => {
                // Malformed envelope (dangling boundary and friends):
                // reject the whole request.
                tracing::warn!(tenant = %tenant.code, "STOW multipart parse failed: {}", e);
                return Ok(stow_response(&[], &[], StatusCode::CONFLICT));
            }
        };
        let data = match field.bytes().await {
            Ok(data) => data,
            Err(e) => {
                tracing::warn!(tenant = %tenant.code, "STOW part read failed: {}", e);
                return Ok(stow_response(&accepted, &rejected, StatusCode::CONFLICT));
            }
        };

        // Identify the instance up front so failures can be reported per
        // SOP; the authoritative parse happens again in the consumer.
        let parse_bytes = data.clone();
        let header = tokio::task::spawn_blocking(move || {
            dicom_codec::parse_header(Cursor::new(parse_bytes))
        })
        .await
        .map_err(|e| ApiError(ArchiveError::Queue(e.to_string())))?;

        let parsed = match header {
            Ok(parsed) => parsed,
            Err(e) => {
                tracing::warn!(tenant = %tenant.code, "STOW part not a valid instance: {}", e);
                rejected.push(Rejected {
                    sop_class_uid: None,
                    sop_uid: None,
                    reason: REASON_CANNOT_UNDERSTAND,
                });
                continue;
            }
        };

        let spooled = async {
            let spool_path = crate::ingest::spool_file(
                &state.spool_dir,
                &tenant.code,
                &format!("{}.dcm", parsed.sop_uid),
            );
            if let Some(parent) = spool_path.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
            tokio::fs::write(&spool_path, &data).await?;
            state
                .queue
                .publish(&IngestMessage {
                    file_path: spool_path.display().to_string(),
                    tenant_code: tenant.code.clone(),
                    received_at: Utc::now(),
                })
                .await
                .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))?;
            Ok::<(), std::io::Error>(())
        }
        .await;

        match spooled {
            Ok(()) => accepted.push(Accepted {
                sop_class_uid: parsed.sop_class_uid.clone(),
                sop_uid: parsed.sop_uid.clone(),
            }),
            Err(e) => {
                tracing::error!(tenant = %tenant.code, sop = %parsed.sop_uid, "STOW spool failed: {}", e);
                rejected.push(Rejected {
                    sop_class_uid: Some(parsed.sop_class_uid.clone()),
                    sop_uid: Some(parsed.sop_uid.clone()),
                    reason: REASON_PROCESSING_FAILURE,
                });
            }
        }
    }

    let status = match (accepted.is_empty(), rejected.is_empty()) {
        (false, true) => StatusCode::OK,
        (false, false) => StatusCode::ACCEPTED,
        (true, _) => StatusCode::CONFLICT,
    };
    tracing::info!(
        tenant = %tenant.code,
        accepted = accepted.len(),
        rejected = rejected.len(),
        "STOW request processed"
    );
    Ok(stow_response(&accepted, &rejected, status))
}

fn stow_response(accepted: &[Accepted], rejected: &[Rejected], status: StatusCode) -> Response {
    let referenced: Vec<serde_json::Value> = accepted
        .iter()
        .map(|a| {
            JsonItem::new()
                .str(REFERENCED_SOP_CLASS_UID, "UI", Some(&a.sop_class_uid))
                .str(REFERENCED_SOP_INSTANCE_UID, "UI", Some(&a.sop_uid))
                .build()
        })
        .collect();
    let failed: Vec<serde_json::Value> = rejected
        .iter()
        .map(|r| {
            JsonItem::new()
                .str(REFERENCED_SOP_CLASS_UID, "UI", r.sop_class_uid.as_deref())
                .str(REFERENCED_SOP_INSTANCE_UID, "UI", r.sop_uid.as_deref())
                .int(FAILURE_REASON, "US", Some(r.reason))
                .build()
        })
        .collect();

    let mut dataset = JsonItem::new();
    if !referenced.is_empty() {
        dataset = dataset.seq(REFERENCED_SOP_SEQUENCE, referenced);
    }
    if !failed.is_empty() {
        dataset = dataset.seq(FAILED_SOP_SEQUENCE, failed);
    }

    Response::builder()
        .status(status)
        .header("content-type", "application/dicom+json")
        .body(Body::from(dataset.build().to_string()))
        .expect("static response parts")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn response_sequences_cover_both_outcomes() {
        let accepted = vec![Accepted {
            sop_class_uid: "1.2.840.10008.5.1.4.1.1.2".to_string(),
            sop_uid: "1.2.3".to_string(),
        }];
        let rejected = vec![Rejected {
            sop_class_uid: None,
            sop_uid: None,
            reason: REASON_CANNOT_UNDERSTAND,
        }];
        let response = stow_response(&accepted, &rejected, StatusCode::ACCEPTED);
        assert_eq!(response.status(), StatusCode::ACCEPTED);
        assert_eq!(
            response.headers().get("content-type").unwrap(),
            "application/dicom+json"
        );
    }
}
