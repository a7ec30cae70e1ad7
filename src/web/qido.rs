//! QIDO-RS handlers: study, series and instance queries rendered as
//! streamed `application/dicom+json` arrays, one record at a time.

use crate::db::qido::{self, InstanceQueryRow, SeriesQueryRow, StudyQuery, StudyQueryRow};
use crate::web::error::{ApiError, ApiResult};
use crate::web::{SharedState, Tenant};
use axum::body::Body;
use axum::extract::{Path, Query, State};
use axum::response::Response;
use bytes::Bytes;
use dicom_codec::json::JsonItem;
use dicom_core::Tag;
use futures_util::stream;
use http::StatusCode;
use serde_json::Value;
use std::collections::HashMap;

const STUDY_DATE: Tag = Tag(0x0008, 0x0020);
const STUDY_TIME: Tag = Tag(0x0008, 0x0030);
const ACCESSION_NUMBER: Tag = Tag(0x0008, 0x0050);
const MODALITY: Tag = Tag(0x0008, 0x0060);
const REFERRING_PHYSICIAN: Tag = Tag(0x0008, 0x0090);
const STUDY_DESCRIPTION: Tag = Tag(0x0008, 0x1030);
const SERIES_DESCRIPTION: Tag = Tag(0x0008, 0x103E);
const SOP_CLASS_UID: Tag = Tag(0x0008, 0x0016);
const SOP_INSTANCE_UID: Tag = Tag(0x0008, 0x0018);
const PATIENT_NAME: Tag = Tag(0x0010, 0x0010);
const PATIENT_ID: Tag = Tag(0x0010, 0x0020);
const PATIENT_BIRTH_DATE: Tag = Tag(0x0010, 0x0030);
const PATIENT_SEX: Tag = Tag(0x0010, 0x0040);
const BODY_PART: Tag = Tag(0x0018, 0x0015);
const STUDY_INSTANCE_UID: Tag = Tag(0x0020, 0x000D);
const SERIES_INSTANCE_UID: Tag = Tag(0x0020, 0x000E);
const SERIES_NUMBER: Tag = Tag(0x0020, 0x0011);
const INSTANCE_NUMBER: Tag = Tag(0x0020, 0x0013);
const NUM_STUDY_SERIES: Tag = Tag(0x0020, 0x1206);
const NUM_STUDY_INSTANCES: Tag = Tag(0x0020, 0x1208);
const NUM_SERIES_INSTANCES: Tag = Tag(0x0020, 0x1209);
const NUMBER_OF_FRAMES: Tag = Tag(0x0028, 0x0008);

/// Stream a JSON array without materialising it: `[`, records joined by
/// `,`, `]`. Empty result sets short-circuit to 204 in the handlers.
fn json_array_response(items: Vec<Value>) -> Response {
    let chunks = stream::iter(
        std::iter::once(Bytes::from_static(b"["))
            .chain(items.into_iter().enumerate().map(|(i, item)| {
                let mut chunk = if i == 0 { Vec::new() } else { vec![b','] };
                chunk.extend_from_slice(item.to_string().as_bytes());
                Bytes::from(chunk)
            }))
            .chain(std::iter::once(Bytes::from_static(b"]")))
            .map(Ok::<Bytes, std::convert::Infallible>),
    );
    Response::builder()
        .status(StatusCode::OK)
        .header("content-type", "application/dicom+json")
        .body(Body::from_stream(chunks))
        .expect("static response parts")
}

fn no_content() -> Response {
    Response::builder()
        .status(StatusCode::NO_CONTENT)
        .header("content-type", "application/dicom+json")
        .body(Body::empty())
        .expect("static response parts")
}

fn study_to_json(row: &StudyQueryRow) -> Value {
    JsonItem::new()
        .str(STUDY_DATE, "DA", row.study_date.as_deref())
        .str(STUDY_TIME, "TM", row.study_time.as_deref())
        .str(ACCESSION_NUMBER, "SH", row.accession_number.as_deref())
        .person(REFERRING_PHYSICIAN, row.referring_physician.as_deref())
        .str(STUDY_DESCRIPTION, "LO", row.description.as_deref())
        .person(PATIENT_NAME, row.patient_name.as_deref())
        .str(PATIENT_ID, "LO", Some(&row.patient_id))
        .str(PATIENT_BIRTH_DATE, "DA", row.birth_date.as_deref())
        .str(PATIENT_SEX, "CS", row.sex.as_deref())
        .str(STUDY_INSTANCE_UID, "UI", Some(&row.study_uid))
        .int(NUM_STUDY_SERIES, "IS", Some(row.num_series as i64))
        .int(NUM_STUDY_INSTANCES, "IS", Some(row.num_instances as i64))
        .build()
}

fn series_to_json(row: &SeriesQueryRow) -> Value {
    JsonItem::new()
        .str(MODALITY, "CS", Some(&row.modality))
        .str(SERIES_DESCRIPTION, "LO", row.description.as_deref())
        .str(BODY_PART, "CS", row.body_part.as_deref())
        .str(STUDY_INSTANCE_UID, "UI", Some(&row.study_uid))
        .str(SERIES_INSTANCE_UID, "UI", Some(&row.series_uid))
        .int(SERIES_NUMBER, "IS", row.series_number.map(i64::from))
        .int(NUM_SERIES_INSTANCES, "IS", Some(row.num_instances as i64))
        .build()
}

fn instance_to_json(row: &InstanceQueryRow) -> Value {
    JsonItem::new()
        .str(SOP_CLASS_UID, "UI", Some(&row.sop_class_uid))
        .str(SOP_INSTANCE_UID, "UI", Some(&row.sop_uid))
        .str(STUDY_INSTANCE_UID, "UI", Some(&row.study_uid))
        .str(SERIES_INSTANCE_UID, "UI", Some(&row.series_uid))
        .int(INSTANCE_NUMBER, "IS", row.instance_number.map(i64::from))
        .int(NUMBER_OF_FRAMES, "IS", Some(row.number_of_frames as i64))
        .build()
}

/// Accept both attribute keywords and bare tag keys for the supported
/// QIDO match parameters.
fn study_query_from_params(params: &HashMap<String, String>) -> StudyQuery {
    let lookup = |keyword: &str, tag: &str| -> Option<String> {
        params
            .get(keyword)
            .or_else(|| params.get(tag))
            .cloned()
            .filter(|v| !v.is_empty())
    };
    StudyQuery {
        patient_name: lookup("PatientName", "00100010"),
        patient_id: lookup("PatientID", "00100020"),
        study_date: lookup("StudyDate", "00080020"),
        accession_number: lookup("AccessionNumber", "00080050"),
        description: lookup("StudyDescription", "00081030"),
        study_uid: lookup("StudyInstanceUID", "0020000D"),
        limit: params.get("limit").and_then(|v| v.parse().ok()),
        offset: params.get("offset").and_then(|v| v.parse().ok()),
    }
}

pub async fn studies(
    State(state): State<SharedState>,
    Tenant(tenant): Tenant,
    Query(params): Query<HashMap<String, String>>,
) -> ApiResult<Response> {
    let query = study_query_from_params(&params);
    let mut conn = state.db.tenant_conn(&tenant).await?;
    let rows = qido::find_studies(&mut conn, &query).await?;
    if rows.is_empty() {
        return Ok(no_content());
    }

    // LAST_ACCESS_DAYS feeds off this touch; it must not delay the reply.
    let touched: Vec<i64> = rows.iter().map(|r| r.id).collect();
    let db = state.db.clone();
    let touch_tenant = tenant.clone();
    tokio::spawn(async move {
        let result = async {
            let mut conn = db.tenant_conn(&touch_tenant).await?;
            qido::touch_last_accessed(&mut conn, &touched).await
        }
        .await;
        if let Err(e) = result {
            tracing::warn!(tenant = %touch_tenant.code, "last-access touch failed: {}", e);
        }
    });

    Ok(json_array_response(rows.iter().map(study_to_json).collect()))
}

pub async fn series(
    State(state): State<SharedState>,
    Tenant(tenant): Tenant,
    Path((_tenant, study_uid)): Path<(String, String)>,
) -> ApiResult<Response> {
    let mut conn = state.db.tenant_conn(&tenant).await?;
    let rows = qido::find_series(&mut conn, &study_uid).await?;
    if rows.is_empty() {
        return Err(ApiError(crate::error::ArchiveError::NotFound("study")));
    }
    Ok(json_array_response(rows.iter().map(series_to_json).collect()))
}

pub async fn instances(
    State(state): State<SharedState>,
    Tenant(tenant): Tenant,
    Path((_tenant, study_uid, series_uid)): Path<(String, String, String)>,
) -> ApiResult<Response> {
    let mut conn = state.db.tenant_conn(&tenant).await?;
    let keys = qido::series_keys(&mut conn, &study_uid, &series_uid).await?;
    if keys.is_empty() {
        return Err(ApiError(crate::error::ArchiveError::NotFound("series")));
    }
    let mut items = Vec::new();
    for (series_id, created_date) in keys {
        let rows = qido::find_instances(&mut conn, series_id, created_date).await?;
        items.extend(rows.iter().map(instance_to_json));
    }
    if items.is_empty() {
        return Ok(no_content());
    }
    Ok(json_array_response(items))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn study_row() -> StudyQueryRow {
        StudyQueryRow {
            id: 1,
            public_id: "abc".to_string(),
            study_uid: "1.2.1".to_string(),
            study_date: Some("20260314".to_string()),
            study_time: None,
            description: None,
            accession_number: Some("ACC-1".to_string()),
            referring_physician: None,
            num_series: 2,
            num_instances: 40,
            study_size: 1_000_000,
            patient_id: "P1".to_string(),
            patient_name: Some("Doe^Jane".to_string()),
            birth_date: None,
            sex: Some("F".to_string()),
        }
    }

    #[test]
    fn study_record_follows_ps318_shape() {
        let json = study_to_json(&study_row());
        assert_eq!(json["0020000D"]["vr"], "UI");
        assert_eq!(json["0020000D"]["Value"][0], "1.2.1");
        assert_eq!(json["00100010"]["Value"][0]["Alphabetic"], "Doe^Jane");
        assert_eq!(json["00201208"]["Value"][0], 40);
        // Absent optional attribute keeps vr but omits Value.
        assert_eq!(json["00081030"]["vr"], "LO");
        assert!(json["00081030"].get("Value").is_none());
    }

    #[test]
    fn query_params_accept_keyword_and_tag_forms() {
        let mut params = HashMap::new();
        params.insert("00100020".to_string(), "P1".to_string());
        params.insert("StudyDate".to_string(), "20260101-20260131".to_string());
        params.insert("limit".to_string(), "50".to_string());
        let query = study_query_from_params(&params);
        assert_eq!(query.patient_id.as_deref(), Some("P1"));
        assert_eq!(query.study_date.as_deref(), Some("20260101-20260131"));
        assert_eq!(query.limit, Some(50));
    }
}
