//! Read-path lookups backing the caches: instance locations per series,
//! series metadata-cache pointers, series summaries per study.

use crate::error::Result;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use sqlx::postgres::PgConnection;
use std::collections::HashMap;

/// Where one instance's bytes live, plus what the frame service needs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstanceLocation {
    pub volume_id: i64,
    pub path: String,
    pub transfer_syntax_uid: String,
    pub number_of_frames: i32,
}

/// The whole series in one shot: this is what collapses N frame requests
/// into a single query. Two steps: series → (id, partition date), then a
/// partition-pruned instance scan per series row.
pub async fn load_series_locations(
    conn: &mut PgConnection,
    series_uid: &str,
) -> Result<HashMap<String, InstanceLocation>> {
    let keys: Vec<(i64, NaiveDate)> = sqlx::query_as(
        "SELECT id, created_at::date FROM series WHERE series_uid = $1",
    )
    .bind(series_uid)
    .fetch_all(&mut *conn)
    .await?;

    let mut locations = HashMap::new();
    for (series_id, created_date) in keys {
        let rows: Vec<(String, i64, String, String, i32)> = sqlx::query_as(
            "SELECT sop_uid, volume_id, storage_path, transfer_syntax_uid, number_of_frames \
             FROM instance WHERE series_fk = $1 AND created_date = $2",
        )
        .bind(series_id)
        .bind(created_date)
        .fetch_all(&mut *conn)
        .await?;
        for (sop_uid, volume_id, path, transfer_syntax_uid, number_of_frames) in rows {
            locations.insert(
                sop_uid,
                InstanceLocation {
                    volume_id,
                    path,
                    transfer_syntax_uid,
                    number_of_frames,
                },
            );
        }
    }
    Ok(locations)
}

/// Pointer to a series' metadata projection file, if one was built.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SeriesMetadataPointer {
    pub series_id: i64,
    pub created_date: NaiveDate,
    /// Volume the series' instances live on; the projection is stored there.
    pub home_volume_id: Option<i64>,
    pub metadata_volume_id: Option<i64>,
    pub metadata_path: Option<String>,
}

pub async fn load_series_metadata_pointer(
    conn: &mut PgConnection,
    series_uid: &str,
) -> Result<Option<SeriesMetadataPointer>> {
    let row: Option<(i64, NaiveDate, Option<i64>, Option<String>)> = sqlx::query_as(
        "SELECT id, created_at::date, metadata_volume_id, metadata_path \
         FROM series WHERE series_uid = $1 ORDER BY id LIMIT 1",
    )
    .bind(series_uid)
    .fetch_optional(&mut *conn)
    .await?;
    let Some((series_id, created_date, metadata_volume_id, metadata_path)) = row else {
        return Ok(None);
    };
    let home: Option<(i64,)> = sqlx::query_as(
        "SELECT volume_id FROM instance WHERE series_fk = $1 AND created_date = $2 LIMIT 1",
    )
    .bind(series_id)
    .bind(created_date)
    .fetch_optional(&mut *conn)
    .await?;
    Ok(Some(SeriesMetadataPointer {
        series_id,
        created_date,
        home_volume_id: home.map(|(v,)| v),
        metadata_volume_id,
        metadata_path,
    }))
}

/// Record (or clear) where a series' metadata projection is stored.
pub async fn set_series_metadata_pointer(
    conn: &mut PgConnection,
    series_id: i64,
    volume_id: Option<i64>,
    path: Option<&str>,
) -> Result<()> {
    sqlx::query("UPDATE series SET metadata_volume_id = $2, metadata_path = $3 WHERE id = $1")
        .bind(series_id)
        .bind(volume_id)
        .bind(path)
        .execute(conn)
        .await?;
    Ok(())
}

/// Instances of one series in instance-number order, with storage
/// coordinates; input to the metadata projection builder.
#[derive(Debug, sqlx::FromRow)]
pub struct SeriesInstanceFile {
    pub sop_uid: String,
    pub instance_number: Option<i32>,
    pub volume_id: i64,
    pub storage_path: String,
}

pub async fn list_series_files(
    conn: &mut PgConnection,
    series_id: i64,
    created_date: NaiveDate,
) -> Result<Vec<SeriesInstanceFile>> {
    let rows = sqlx::query_as::<_, SeriesInstanceFile>(
        "SELECT sop_uid, instance_number, volume_id, storage_path \
         FROM instance WHERE series_fk = $1 AND created_date = $2 \
         ORDER BY instance_number NULLS LAST, sop_uid",
    )
    .bind(series_id)
    .bind(created_date)
    .fetch_all(conn)
    .await?;
    Ok(rows)
}

/// Compact series summaries per study UID (the series-by-study cache).
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct SeriesSummary {
    pub series_id: i64,
    pub series_uid: String,
    pub modality: String,
    pub num_instances: i32,
    pub series_size: i64,
}

pub async fn load_series_by_study(
    conn: &mut PgConnection,
    study_uid: &str,
) -> Result<Vec<SeriesSummary>> {
    let rows = sqlx::query_as::<_, SeriesSummary>(
        "SELECT se.id AS series_id, se.series_uid, se.modality, se.num_instances, se.series_size \
         FROM series se JOIN study st ON st.id = se.study_fk \
         WHERE st.study_uid = $1 ORDER BY se.id",
    )
    .bind(study_uid)
    .fetch_all(conn)
    .await?;
    Ok(rows)
}
