//! QIDO-RS query construction.
//!
//! A small state machine appends predicates to a `QueryBuilder` and binds
//! every user value positionally; no user input is ever spliced into the
//! SQL text. DICOM `*`/`?` wildcards translate to SQL `LIKE` patterns at
//! this boundary.

use crate::error::Result;
use chrono::NaiveDate;
use sqlx::postgres::PgConnection;
use sqlx::{Postgres, QueryBuilder};

/// Upper bound a client may request; anything larger is clamped.
pub const MAX_LIMIT: i64 = 1000;

#[derive(Debug, Default, Clone)]
pub struct StudyQuery {
    pub patient_name: Option<String>,
    pub patient_id: Option<String>,
    /// `YYYYMMDD` or `YYYYMMDD-YYYYMMDD`.
    pub study_date: Option<String>,
    pub accession_number: Option<String>,
    pub description: Option<String>,
    pub study_uid: Option<String>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

#[derive(Debug, sqlx::FromRow)]
pub struct StudyQueryRow {
    pub id: i64,
    pub public_id: String,
    pub study_uid: String,
    pub study_date: Option<String>,
    pub study_time: Option<String>,
    pub description: Option<String>,
    pub accession_number: Option<String>,
    pub referring_physician: Option<String>,
    pub num_series: i32,
    pub num_instances: i32,
    pub study_size: i64,
    pub patient_id: String,
    pub patient_name: Option<String>,
    pub birth_date: Option<String>,
    pub sex: Option<String>,
}

#[derive(Debug, sqlx::FromRow)]
pub struct SeriesQueryRow {
    pub id: i64,
    pub series_uid: String,
    pub modality: String,
    pub series_number: Option<i32>,
    pub description: Option<String>,
    pub body_part: Option<String>,
    pub num_instances: i32,
    pub series_size: i64,
    pub study_uid: String,
}

#[derive(Debug, sqlx::FromRow)]
pub struct InstanceQueryRow {
    pub sop_uid: String,
    pub sop_class_uid: String,
    pub instance_number: Option<i32>,
    pub transfer_syntax_uid: String,
    pub number_of_frames: i32,
    pub file_size: i64,
    pub series_uid: String,
    pub study_uid: String,
}

/// Translate DICOM wildcards to a `LIKE` pattern. SQL pattern characters
/// in the raw value are escaped first so they stay literal.
pub fn translate_wildcards(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '%' | '_' | '\\' => {
                out.push('\\');
                out.push(c);
            }
            '*' => out.push('%'),
            '?' => out.push('_'),
            other => out.push(other),
        }
    }
    out
}

fn has_wildcards(value: &str) -> bool {
    value.contains('*') || value.contains('?')
}

/// Append an equality or wildcard predicate for one attribute.
fn push_match(
    builder: &mut QueryBuilder<'_, Postgres>,
    column: &str,
    value: &str,
    case_insensitive: bool,
) {
    if has_wildcards(value) {
        builder.push(format!(
            " AND {} {} ",
            column,
            if case_insensitive { "ILIKE" } else { "LIKE" }
        ));
        builder.push_bind(translate_wildcards(value));
    } else if case_insensitive {
        builder.push(format!(" AND {} ILIKE ", column));
        builder.push_bind(value.to_string());
    } else {
        builder.push(format!(" AND {} = ", column));
        builder.push_bind(value.to_string());
    }
}

pub fn build_study_query(query: &StudyQuery) -> QueryBuilder<'static, Postgres> {
    let mut builder: QueryBuilder<'static, Postgres> = QueryBuilder::new(
        "SELECT st.id, st.public_id, st.study_uid, st.study_date, st.study_time, \
                st.description, st.accession_number, st.referring_physician, \
                st.num_series, st.num_instances, st.study_size, \
                pa.patient_id, pa.name AS patient_name, pa.birth_date, pa.sex \
         FROM study st JOIN patient pa ON pa.id = st.patient_fk WHERE 1=1",
    );

    if let Some(name) = query.patient_name.as_deref().filter(|s| !s.is_empty()) {
        push_match(&mut builder, "pa.name", name, true);
    }
    if let Some(pid) = query.patient_id.as_deref().filter(|s| !s.is_empty()) {
        push_match(&mut builder, "pa.patient_id", pid, false);
    }
    if let Some(date) = query.study_date.as_deref().filter(|s| !s.is_empty()) {
        match date.split_once('-') {
            Some((from, to)) => {
                builder.push(" AND st.study_date >= ");
                builder.push_bind(from.to_string());
                builder.push(" AND st.study_date <= ");
                builder.push_bind(to.to_string());
            }
            None => {
                builder.push(" AND st.study_date = ");
                builder.push_bind(date.to_string());
            }
        }
    }
    if let Some(accession) = query.accession_number.as_deref().filter(|s| !s.is_empty()) {
        push_match(&mut builder, "st.accession_number", accession, false);
    }
    if let Some(description) = query.description.as_deref().filter(|s| !s.is_empty()) {
        push_match(&mut builder, "st.description", description, true);
    }
    if let Some(uid) = query.study_uid.as_deref().filter(|s| !s.is_empty()) {
        builder.push(" AND st.study_uid = ");
        builder.push_bind(uid.to_string());
    }

    let limit = query.limit.unwrap_or(MAX_LIMIT).clamp(1, MAX_LIMIT);
    let offset = query.offset.unwrap_or(0).max(0);
    builder.push(" ORDER BY st.created_at DESC LIMIT ");
    builder.push_bind(limit);
    builder.push(" OFFSET ");
    builder.push_bind(offset);
    builder
}

pub async fn find_studies(
    conn: &mut PgConnection,
    query: &StudyQuery,
) -> Result<Vec<StudyQueryRow>> {
    let mut builder = build_study_query(query);
    let rows = builder
        .build_query_as::<StudyQueryRow>()
        .fetch_all(conn)
        .await?;
    Ok(rows)
}

/// All series under the given study UID. Several study rows may carry the
/// same UID; the caller navigated in from a worklist, so returning the
/// union is the documented behaviour.
pub async fn find_series(conn: &mut PgConnection, study_uid: &str) -> Result<Vec<SeriesQueryRow>> {
    let rows = sqlx::query_as::<_, SeriesQueryRow>(
        "SELECT se.id, se.series_uid, se.modality, se.series_number, se.description, \
                se.body_part, se.num_instances, se.series_size, st.study_uid \
         FROM series se JOIN study st ON st.id = se.study_fk \
         WHERE st.study_uid = $1 \
         ORDER BY se.series_number NULLS LAST, se.id",
    )
    .bind(study_uid)
    .fetch_all(conn)
    .await?;
    Ok(rows)
}

/// Key pairs for the partition-pruned instance scan: each series row with
/// the partition date all of its instances share.
pub async fn series_keys(
    conn: &mut PgConnection,
    study_uid: &str,
    series_uid: &str,
) -> Result<Vec<(i64, NaiveDate)>> {
    let keys: Vec<(i64, NaiveDate)> = sqlx::query_as(
        "SELECT se.id, se.created_at::date \
         FROM series se JOIN study st ON st.id = se.study_fk \
         WHERE st.study_uid = $1 AND se.series_uid = $2",
    )
    .bind(study_uid)
    .bind(series_uid)
    .fetch_all(conn)
    .await?;
    Ok(keys)
}

pub async fn find_instances(
    conn: &mut PgConnection,
    series_id: i64,
    created_date: NaiveDate,
) -> Result<Vec<InstanceQueryRow>> {
    let rows = sqlx::query_as::<_, InstanceQueryRow>(
        "SELECT sop_uid, sop_class_uid, instance_number, transfer_syntax_uid, \
                number_of_frames, file_size, series_uid, study_uid \
         FROM instance WHERE series_fk = $1 AND created_date = $2 \
         ORDER BY instance_number NULLS LAST, sop_uid",
    )
    .bind(series_id)
    .bind(created_date)
    .fetch_all(conn)
    .await?;
    Ok(rows)
}

/// Background touch backing the LAST_ACCESS_DAYS lifecycle condition.
pub async fn touch_last_accessed(conn: &mut PgConnection, study_ids: &[i64]) -> Result<()> {
    sqlx::query("UPDATE study SET last_accessed_at = now() WHERE id = ANY($1)")
        .bind(study_ids)
        .execute(conn)
        .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wildcards_translate_and_escape() {
        assert_eq!(translate_wildcards("DOE*"), "DOE%");
        assert_eq!(translate_wildcards("D?E"), "D_E");
        assert_eq!(translate_wildcards("100%"), "100\\%");
        assert_eq!(translate_wildcards("a_b"), "a\\_b");
    }

    #[test]
    fn study_query_uses_equality_without_wildcards() {
        let sql = build_study_query(&StudyQuery {
            patient_id: Some("P1".to_string()),
            ..Default::default()
        })
        .into_sql();
        assert!(sql.contains("pa.patient_id = "));
        assert!(!sql.contains("pa.patient_id LIKE"));
    }

    #[test]
    fn study_query_switches_to_like_on_wildcards() {
        let sql = build_study_query(&StudyQuery {
            patient_name: Some("DOE*".to_string()),
            ..Default::default()
        })
        .into_sql();
        assert!(sql.contains("pa.name ILIKE"));
    }

    #[test]
    fn date_range_becomes_bounds() {
        let sql = build_study_query(&StudyQuery {
            study_date: Some("20240101-20240131".to_string()),
            ..Default::default()
        })
        .into_sql();
        assert!(sql.contains("st.study_date >= "));
        assert!(sql.contains("st.study_date <= "));
    }

    #[test]
    fn limit_is_capped() {
        let sql = build_study_query(&StudyQuery {
            limit: Some(10_000),
            ..Default::default()
        })
        .into_sql();
        // The cap is bound as a parameter, not inlined; presence of both
        // LIMIT and OFFSET clauses is what the text shows.
        assert!(sql.contains("LIMIT"));
        assert!(sql.contains("OFFSET"));
    }
}
