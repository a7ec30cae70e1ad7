//! Patient-id correction.
//!
//! Two-step state change: the patient row (including its `public_id`) is
//! rewritten synchronously under the optimistic lock, then every owning
//! study's `public_id` is recomputed asynchronously, tracked by a
//! `file_correction_task` row. Series and instance rows link through
//! BIGINT FKs and never need rewriting.

use crate::error::{ArchiveError, Result};
use crate::models::{identity, CorrectionTask, TaskStatus};
use crate::tenancy::TenantCtx;
use crate::Db;
use sqlx::postgres::PgConnection;

const TASK_COLUMNS: &str = "id, patient_id, status, error, created_at, updated_at";

/// Synchronous half: rewrite the patient row. A version mismatch means a
/// concurrent correction won; the caller gets a conflict.
pub async fn correct_patient_id(
    conn: &mut PgConnection,
    patient_pk: i64,
    new_raw_id: &str,
    expected_version: i64,
) -> Result<CorrectionTask> {
    let new_public_id = identity::patient_public_id(new_raw_id);
    let result = sqlx::query(
        "UPDATE patient SET \
           patient_id = $2, public_id = $3, is_provisional = false, \
           version = version + 1, updated_at = now() \
         WHERE id = $1 AND version = $4",
    )
    .bind(patient_pk)
    .bind(new_raw_id)
    .bind(&new_public_id)
    .bind(expected_version)
    .execute(&mut *conn)
    .await?;
    if result.rows_affected() == 0 {
        return Err(ArchiveError::Conflict {
            entity: "patient",
            id: patient_pk,
        });
    }

    let task = sqlx::query_as::<_, CorrectionTask>(&format!(
        "INSERT INTO file_correction_task (patient_id, status, created_at, updated_at) \
         VALUES ($1, 'PENDING', now(), now()) RETURNING {}",
        TASK_COLUMNS
    ))
    .bind(patient_pk)
    .fetch_one(conn)
    .await?;
    Ok(task)
}

/// Asynchronous half: recompute `public_id` for every study the patient
/// owns. Runs as a spawned task after the synchronous update commits.
pub async fn rehash_owned_studies(
    db: &Db,
    tenant: &TenantCtx,
    patient_pk: i64,
    task_id: i64,
) -> Result<usize> {
    let mut conn = db.tenant_conn(tenant).await?;

    let raw_id: (String,) = sqlx::query_as("SELECT patient_id FROM patient WHERE id = $1")
        .bind(patient_pk)
        .fetch_one(&mut *conn)
        .await?;

    let studies: Vec<(i64, String)> =
        sqlx::query_as("SELECT id, study_uid FROM study WHERE patient_fk = $1")
            .bind(patient_pk)
            .fetch_all(&mut *conn)
            .await?;

    for (study_id, study_uid) in &studies {
        let public_id = identity::study_public_id(&raw_id.0, study_uid);
        sqlx::query(
            "UPDATE study SET public_id = $2, version = version + 1, updated_at = now() \
             WHERE id = $1",
        )
        .bind(study_id)
        .bind(&public_id)
        .execute(&mut *conn)
        .await?;
    }

    mark_task(&mut conn, task_id, TaskStatus::Completed, None).await?;
    Ok(studies.len())
}

pub async fn mark_task(
    conn: &mut PgConnection,
    task_id: i64,
    status: TaskStatus,
    error: Option<&str>,
) -> Result<()> {
    sqlx::query(
        "UPDATE file_correction_task SET status = $2, error = $3, updated_at = now() WHERE id = $1",
    )
    .bind(task_id)
    .bind(status)
    .bind(error)
    .execute(conn)
    .await?;
    Ok(())
}

pub async fn list_tasks(
    db: &Db,
    tenant: &TenantCtx,
    status: Option<TaskStatus>,
    limit: i64,
) -> Result<Vec<CorrectionTask>> {
    let mut conn = db.tenant_conn(tenant).await?;
    let tasks = sqlx::query_as::<_, CorrectionTask>(&format!(
        "SELECT {} FROM file_correction_task \
         WHERE ($1::text IS NULL OR status = $1) ORDER BY id DESC LIMIT $2",
        TASK_COLUMNS
    ))
    .bind(status)
    .bind(limit)
    .fetch_all(&mut *conn)
    .await?;
    Ok(tasks)
}
