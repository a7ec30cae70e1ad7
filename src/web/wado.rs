//! WADO-RS handlers: full objects (single and multipart), the per-series
//! metadata projection, and frame retrieval.
//!
//! Frames are extracted per request from a freshly opened stream and
//! delivered at their native transfer syntax; no transcoding happens on
//! this path.

use crate::db::locations::InstanceLocation;
use crate::error::ArchiveError;
use crate::models::ProviderKind;
use crate::web::error::{ApiError, ApiResult};
use crate::web::multipart::{new_boundary, related_content_type, RelatedWriter};
use crate::web::{SharedState, Tenant};
use crate::tenancy::TenantCtx;
use axum::body::Body;
use axum::extract::{Path, State};
use axum::response::Response;
use bytes::Bytes;
use dicom_codec::frames::{is_encapsulated, FrameExtractor};
use futures_util::StreamExt;
use http::StatusCode;
use std::sync::Arc;
use tokio_util::io::{ReaderStream, SyncIoBridge};

/// Single instance: one `application/dicom` body streamed from storage.
pub async fn instance(
    State(state): State<SharedState>,
    Tenant(tenant): Tenant,
    Path((_tenant, _study_uid, series_uid, sop_uid)): Path<(String, String, String, String)>,
) -> ApiResult<Response> {
    let locations = state.instance_locations(&tenant, &series_uid).await?;
    let location = locations
        .get(&sop_uid)
        .ok_or(ApiError(ArchiveError::NotFound("instance")))?;
    let provider = state.volumes.provider(location.volume_id)?;
    let reader = provider.reader(&location.path).await?;
    Ok(Response::builder()
        .status(StatusCode::OK)
        .header("content-type", "application/dicom")
        .body(Body::from_stream(ReaderStream::new(reader)))
        .expect("static response parts"))
}

/// Whole study as `multipart/related; type="application/dicom"`.
pub async fn study(
    State(state): State<SharedState>,
    Tenant(tenant): Tenant,
    Path((_tenant, study_uid)): Path<(String, String)>,
) -> ApiResult<Response> {
    let series_list = state.series_by_study(&tenant, &study_uid).await?;
    if series_list.is_empty() {
        return Err(ApiError(ArchiveError::NotFound("study")));
    }
    let mut all: Vec<InstanceLocation> = Vec::new();
    for summary in &series_list {
        let locations = state.instance_locations(&tenant, &summary.series_uid).await?;
        all.extend(locations.into_values());
    }
    stream_dicom_parts(state, all).await
}

/// Whole series as `multipart/related; type="application/dicom"`.
pub async fn series(
    State(state): State<SharedState>,
    Tenant(tenant): Tenant,
    Path((_tenant, _study_uid, series_uid)): Path<(String, String, String)>,
) -> ApiResult<Response> {
    let locations = state.instance_locations(&tenant, &series_uid).await?;
    if locations.is_empty() {
        return Err(ApiError(ArchiveError::NotFound("series")));
    }
    stream_dicom_parts(state, locations.into_values().collect()).await
}

async fn stream_dicom_parts(
    state: SharedState,
    locations: Vec<InstanceLocation>,
) -> ApiResult<Response> {
    let boundary = new_boundary();
    let content_type = related_content_type(&boundary, "application/dicom");
    let (writer, body) = RelatedWriter::channel(boundary);

    tokio::spawn(async move {
        for location in locations {
            let provider = match state.volumes.provider(location.volume_id) {
                Ok(p) => p,
                Err(e) => {
                    tracing::error!("multipart part skipped, volume missing: {}", e);
                    continue;
                }
            };
            let reader = match provider.reader(&location.path).await {
                Ok(r) => r,
                Err(e) => {
                    tracing::error!(path = %location.path, "multipart part skipped: {}", e);
                    continue;
                }
            };
            if writer.begin_part("application/dicom").await.is_err() {
                return; // client hung up
            }
            let mut chunks = ReaderStream::new(reader);
            while let Some(chunk) = chunks.next().await {
                match chunk {
                    Ok(bytes) => {
                        if writer.write(bytes).await.is_err() {
                            return;
                        }
                    }
                    Err(e) => {
                        tracing::error!(path = %location.path, "read failed mid-part: {}", e);
                        return;
                    }
                }
            }
        }
        let _ = writer.finish().await;
    });

    Ok(Response::builder()
        .status(StatusCode::OK)
        .header("content-type", content_type)
        .body(body)
        .expect("static response parts"))
}

/// Series metadata projection (`application/dicom+json`).
///
/// Cache-file hit: stream the stored blob. Miss: local volumes build the
/// array for this response and schedule a persistent rebuild; object
/// stores build-and-persist synchronously so the next request is one GET
/// instead of N.
pub async fn series_metadata(
    State(state): State<SharedState>,
    Tenant(tenant): Tenant,
    Path((_tenant, _study_uid, series_uid)): Path<(String, String, String)>,
) -> ApiResult<Response> {
    let pointer = state
        .series_metadata_pointer(&tenant, &series_uid)
        .await?
        .ok_or(ApiError(ArchiveError::NotFound("series")))?;

    if let (Some(volume_id), Some(path)) = (pointer.metadata_volume_id, pointer.metadata_path.as_deref())
    {
        let provider = state.volumes.provider(volume_id)?;
        let reader = provider.reader(path).await?;
        return Ok(json_stream_response(Body::from_stream(ReaderStream::new(reader))));
    }

    let Some(home_volume_id) = pointer.home_volume_id else {
        return Err(ApiError(ArchiveError::NotFound("series")));
    };
    let home = state.volumes.volume(home_volume_id)?;
    let payload = if home.provider_kind == ProviderKind::Local {
        let items = state
            .metadata
            .build_json(&tenant, pointer.series_id, pointer.created_date)
            .await?;
        state.metadata.spawn_rebuild(
            tenant.clone(),
            pointer.series_id,
            pointer.created_date,
            series_uid.clone(),
        );
        Bytes::from(serde_json::to_vec(&items).map_err(|e| ArchiveError::Cache(e.to_string()))?)
    } else {
        state
            .metadata
            .rebuild(&tenant, pointer.series_id, pointer.created_date, &series_uid)
            .await?
    };
    Ok(json_stream_response(Body::from(payload)))
}

fn json_stream_response(body: Body) -> Response {
    Response::builder()
        .status(StatusCode::OK)
        .header("content-type", "application/dicom+json")
        .body(body)
        .expect("static response parts")
}

/// Frame retrieval: multipart/related of `application/octet-stream`
/// parts, one per requested frame, ascending.
pub async fn frames(
    State(state): State<SharedState>,
    Tenant(tenant): Tenant,
    Path((_tenant, _study_uid, series_uid, sop_uid, frame_list)): Path<(
        String,
        String,
        String,
        String,
        String,
    )>,
) -> ApiResult<Response> {
    let locations = state.instance_locations(&tenant, &series_uid).await?;
    let location = locations
        .get(&sop_uid)
        .cloned()
        .ok_or(ApiError(ArchiveError::NotFound("instance")))?;

    let frames = parse_frame_list(&frame_list)?;
    let total = location.number_of_frames.max(1) as u32;
    if frames[0] < 1 || *frames.last().expect("non-empty") > total {
        return Err(ApiError(ArchiveError::FrameOutOfRange {
            requested: if frames[0] < 1 { frames[0] } else { *frames.last().expect("non-empty") },
            available: total,
        }));
    }

    let encapsulated = is_encapsulated(&location.transfer_syntax_uid);
    let part_type = if encapsulated {
        format!(
            "application/octet-stream; transfer-syntax={}",
            location.transfer_syntax_uid
        )
    } else {
        "application/octet-stream".to_string()
    };
    let boundary = new_boundary();
    let content_type = if encapsulated {
        format!(
            "multipart/related; type=\"application/octet-stream\"; transfer-syntax={}; boundary={}",
            location.transfer_syntax_uid, boundary
        )
    } else {
        related_content_type(&boundary, "application/octet-stream")
    };
    let (writer, body) = RelatedWriter::channel(boundary);

    let extractor = FrameExtractor::new(&location.transfer_syntax_uid, location.number_of_frames);
    tokio::spawn(stream_frames(
        state,
        tenant,
        location,
        extractor,
        frames,
        part_type,
        writer,
    ));

    Ok(Response::builder()
        .status(StatusCode::OK)
        .header("content-type", content_type)
        .body(body)
        .expect("static response parts"))
}

async fn stream_frames(
    state: SharedState,
    tenant: TenantCtx,
    location: InstanceLocation,
    extractor: FrameExtractor,
    frames: Vec<u32>,
    part_type: String,
    writer: RelatedWriter,
) {
    let extractor = Arc::new(extractor);
    for frame_number in frames {
        // V1 strategy: a fresh stream per frame, one pass, stateless.
        let provider = match state.volumes.provider(location.volume_id) {
            Ok(p) => p,
            Err(e) => {
                tracing::error!(tenant = %tenant.code, "frame stream aborted: {}", e);
                return;
            }
        };
        let reader = match provider.reader(&location.path).await {
            Ok(r) => r,
            Err(e) => {
                tracing::error!(path = %location.path, "frame stream aborted: {}", e);
                return;
            }
        };
        let bridge = SyncIoBridge::new(reader);
        let frame_extractor = extractor.clone();
        let extracted = tokio::task::spawn_blocking(move || {
            let mut out = Vec::new();
            frame_extractor
                .extract(bridge, frame_number, &mut out)
                .map(|_| out)
        })
        .await;
        let frame_bytes = match extracted {
            Ok(Ok(bytes)) => bytes,
            Ok(Err(e)) => {
                tracing::error!(sop = %location.path, frame_number, "frame extraction failed: {}", e);
                return;
            }
            Err(e) => {
                tracing::error!(frame_number, "frame extraction task failed: {}", e);
                return;
            }
        };
        if writer.begin_part(&part_type).await.is_err() {
            return;
        }
        if writer.write(Bytes::from(frame_bytes)).await.is_err() {
            return;
        }
    }
    let _ = writer.finish().await;
}

/// `frameList` is comma-separated 1-based integers; sorted ascending.
fn parse_frame_list(raw: &str) -> Result<Vec<u32>, ApiError> {
    let mut frames = Vec::new();
    for token in raw.split(',') {
        let parsed: u32 = token
            .trim()
            .parse()
            .map_err(|_| ApiError(ArchiveError::BadFrameList(raw.to_string())))?;
        frames.push(parsed);
    }
    if frames.is_empty() {
        return Err(ApiError(ArchiveError::BadFrameList(raw.to_string())));
    }
    frames.sort_unstable();
    frames.dedup();
    Ok(frames)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_lists_parse_and_sort() {
        assert_eq!(parse_frame_list("1,5,10").unwrap(), vec![1, 5, 10]);
        assert_eq!(parse_frame_list("10,1,5").unwrap(), vec![1, 5, 10]);
        assert_eq!(parse_frame_list("3,3,3").unwrap(), vec![3]);
    }

    #[test]
    fn malformed_frame_lists_are_rejected() {
        assert!(parse_frame_list("").is_err());
        assert!(parse_frame_list("1,x").is_err());
        assert!(parse_frame_list("1,,2").is_err());
        assert!(parse_frame_list("-1").is_err());
    }
}
