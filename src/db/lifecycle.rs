//! Lifecycle rules and their persistent work items.
//!
//! Migration tasks live in the shared schema (they carry a tenant code);
//! compression tasks live in each tenant schema because they reference
//! tenant-local study ids.

use crate::error::Result;
use crate::models::{
    CompressionTask, LifecycleAction, LifecycleCondition, LifecycleRule, MigrationTask, TaskStatus,
};
use crate::tenancy::TenantCtx;
use crate::Db;
use chrono::NaiveDate;
use sqlx::postgres::PgConnection;

const RULE_COLUMNS: &str = "id, enabled, action, source_tier, target_tier, condition, \
     condition_days, delete_source, compression_type, tenant_code";

pub async fn rules_for_action(db: &Db, action: LifecycleAction) -> Result<Vec<LifecycleRule>> {
    let rules = sqlx::query_as::<_, LifecycleRule>(&format!(
        "SELECT {} FROM public.lifecycle_rule WHERE enabled AND action = $1 ORDER BY id",
        RULE_COLUMNS
    ))
    .bind(action)
    .fetch_all(db.pool())
    .await?;
    Ok(rules)
}

pub async fn list_rules(db: &Db) -> Result<Vec<LifecycleRule>> {
    let rules = sqlx::query_as::<_, LifecycleRule>(&format!(
        "SELECT {} FROM public.lifecycle_rule ORDER BY id",
        RULE_COLUMNS
    ))
    .fetch_all(db.pool())
    .await?;
    Ok(rules)
}

pub async fn insert_rule(db: &Db, rule: &LifecycleRule) -> Result<LifecycleRule> {
    let created = sqlx::query_as::<_, LifecycleRule>(&format!(
        "INSERT INTO public.lifecycle_rule \
           (enabled, action, source_tier, target_tier, condition, condition_days, \
            delete_source, compression_type, tenant_code) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9) RETURNING {}",
        RULE_COLUMNS
    ))
    .bind(rule.enabled)
    .bind(rule.action)
    .bind(rule.source_tier)
    .bind(rule.target_tier)
    .bind(rule.condition)
    .bind(rule.condition_days)
    .bind(rule.delete_source)
    .bind(&rule.compression_type)
    .bind(&rule.tenant_code)
    .fetch_one(db.pool())
    .await?;
    Ok(created)
}

pub async fn delete_rule(db: &Db, rule_id: i64) -> Result<bool> {
    let result = sqlx::query("DELETE FROM public.lifecycle_rule WHERE id = $1")
        .bind(rule_id)
        .execute(db.pool())
        .await?;
    Ok(result.rows_affected() > 0)
}

/// Candidate instance for a MIGRATE rule.
#[derive(Debug, sqlx::FromRow)]
pub struct MigrationCandidate {
    pub instance_id: i64,
    pub created_date: NaiveDate,
    pub volume_id: i64,
}

/// Instances whose study meets the rule's age condition, stored on one of
/// the rule's source-tier volumes, and not already covered by a task in
/// any non-FAILED state. The NOT EXISTS keeps re-evaluation idempotent.
pub async fn find_migration_candidates(
    conn: &mut PgConnection,
    tenant_code: &str,
    condition: LifecycleCondition,
    condition_days: i32,
    source_volume_ids: &[i64],
    cap: i64,
) -> Result<Vec<MigrationCandidate>> {
    let age_predicate = match condition {
        LifecycleCondition::StudyAgeDays => "st.created_at < now() - make_interval(days => $2)",
        LifecycleCondition::LastAccessDays => {
            "COALESCE(st.last_accessed_at, st.created_at) < now() - make_interval(days => $2)"
        }
    };
    let rows = sqlx::query_as::<_, MigrationCandidate>(&format!(
        "SELECT i.id AS instance_id, i.created_date, i.volume_id \
         FROM instance i \
         JOIN series se ON se.id = i.series_fk AND se.created_at::date = i.created_date \
         JOIN study st ON st.id = se.study_fk \
         WHERE i.volume_id = ANY($3) \
           AND {} \
           AND NOT EXISTS (SELECT 1 FROM public.migration_task mt \
                           WHERE mt.tenant_code = $1 \
                             AND mt.instance_id = i.id \
                             AND mt.instance_created_date = i.created_date \
                             AND mt.status IN ('PENDING', 'IN_PROGRESS', 'COMPLETED')) \
         ORDER BY i.created_date, i.id \
         LIMIT $4",
        age_predicate
    ))
    .bind(tenant_code)
    .bind(condition_days)
    .bind(source_volume_ids)
    .bind(cap)
    .fetch_all(conn)
    .await?;
    Ok(rows)
}

pub async fn enqueue_migration_tasks(
    db: &Db,
    tenant_code: &str,
    rule: &LifecycleRule,
    target_volume_id: i64,
    candidates: &[MigrationCandidate],
) -> Result<u64> {
    if candidates.is_empty() {
        return Ok(0);
    }
    let result = sqlx::query(
        "INSERT INTO public.migration_task \
           (tenant_code, rule_id, instance_id, instance_created_date, \
            source_volume_id, target_volume_id, delete_source, status, created_at, updated_at) \
         SELECT $1, $2, u.instance_id, u.created_date, u.volume_id, $3, $4, 'PENDING', now(), now() \
         FROM UNNEST($5::bigint[], $6::date[], $7::bigint[]) \
           AS u(instance_id, created_date, volume_id)",
    )
    .bind(tenant_code)
    .bind(rule.id)
    .bind(target_volume_id)
    .bind(rule.delete_source)
    .bind(candidates.iter().map(|c| c.instance_id).collect::<Vec<_>>())
    .bind(candidates.iter().map(|c| c.created_date).collect::<Vec<_>>())
    .bind(candidates.iter().map(|c| c.volume_id).collect::<Vec<_>>())
    .execute(db.pool())
    .await?;
    Ok(result.rows_affected())
}

const MIGRATION_COLUMNS: &str = "id, tenant_code, rule_id, instance_id, instance_created_date, \
     source_volume_id, target_volume_id, delete_source, status, error, created_at, updated_at";

/// Claim up to `limit` pending migration tasks for this worker cycle.
/// SKIP LOCKED keeps concurrent workers from double-claiming.
pub async fn claim_migration_tasks(db: &Db, limit: i64) -> Result<Vec<MigrationTask>> {
    let tasks = sqlx::query_as::<_, MigrationTask>(&format!(
        "UPDATE public.migration_task SET status = 'IN_PROGRESS', updated_at = now() \
         WHERE id IN (SELECT id FROM public.migration_task WHERE status = 'PENDING' \
                      ORDER BY id LIMIT $1 FOR UPDATE SKIP LOCKED) \
         RETURNING {}",
        MIGRATION_COLUMNS
    ))
    .bind(limit)
    .fetch_all(db.pool())
    .await?;
    Ok(tasks)
}

pub async fn finish_migration_task(
    db: &Db,
    task_id: i64,
    status: TaskStatus,
    error: Option<&str>,
) -> Result<()> {
    sqlx::query(
        "UPDATE public.migration_task SET status = $2, error = $3, updated_at = now() WHERE id = $1",
    )
    .bind(task_id)
    .bind(status)
    .bind(error)
    .execute(db.pool())
    .await?;
    Ok(())
}

pub async fn list_migration_tasks(
    db: &Db,
    status: Option<TaskStatus>,
    limit: i64,
) -> Result<Vec<MigrationTask>> {
    let tasks = sqlx::query_as::<_, MigrationTask>(&format!(
        "SELECT {} FROM public.migration_task \
         WHERE ($1::text IS NULL OR status = $1) ORDER BY id DESC LIMIT $2",
        MIGRATION_COLUMNS
    ))
    .bind(status)
    .bind(limit)
    .fetch_all(db.pool())
    .await?;
    Ok(tasks)
}

/// Re-queue a FAILED migration task (admin action).
pub async fn requeue_migration_task(db: &Db, task_id: i64) -> Result<bool> {
    let result = sqlx::query(
        "UPDATE public.migration_task SET status = 'PENDING', error = NULL, updated_at = now() \
         WHERE id = $1 AND status = 'FAILED'",
    )
    .bind(task_id)
    .execute(db.pool())
    .await?;
    Ok(result.rows_affected() > 0)
}

// -- compression (tenant scope) ------------------------------------------

/// Studies eligible for a COMPRESS rule: at least one instance on a
/// source-tier volume, age condition met, and no non-terminal task of the
/// same compression type.
pub async fn find_compression_candidates(
    conn: &mut PgConnection,
    condition: LifecycleCondition,
    condition_days: i32,
    source_volume_ids: &[i64],
    compression_type: &str,
    cap: i64,
) -> Result<Vec<i64>> {
    let age_predicate = match condition {
        LifecycleCondition::StudyAgeDays => "st.created_at < now() - make_interval(days => $1)",
        LifecycleCondition::LastAccessDays => {
            "COALESCE(st.last_accessed_at, st.created_at) < now() - make_interval(days => $1)"
        }
    };
    let rows: Vec<(i64,)> = sqlx::query_as(&format!(
        "SELECT DISTINCT st.id \
         FROM study st \
         JOIN series se ON se.study_fk = st.id \
         JOIN instance i ON i.series_fk = se.id AND i.created_date = se.created_at::date \
         WHERE i.volume_id = ANY($2) \
           AND {} \
           AND NOT EXISTS (SELECT 1 FROM compression_task ct \
                           WHERE ct.study_id = st.id \
                             AND ct.compression_type = $3 \
                             AND ct.status IN ('PENDING', 'IN_PROGRESS')) \
         ORDER BY st.id \
         LIMIT $4",
        age_predicate
    ))
    .bind(condition_days)
    .bind(source_volume_ids)
    .bind(compression_type)
    .bind(cap)
    .fetch_all(conn)
    .await?;
    Ok(rows.into_iter().map(|(id,)| id).collect())
}

const COMPRESSION_COLUMNS: &str =
    "id, rule_id, study_id, compression_type, status, error, created_at, updated_at";

pub async fn enqueue_compression_tasks(
    conn: &mut PgConnection,
    rule_id: Option<i64>,
    compression_type: &str,
    study_ids: &[i64],
) -> Result<u64> {
    if study_ids.is_empty() {
        return Ok(0);
    }
    let result = sqlx::query(
        "INSERT INTO compression_task \
           (rule_id, study_id, compression_type, status, created_at, updated_at) \
         SELECT $1, u.study_id, $2, 'PENDING', now(), now() \
         FROM UNNEST($3::bigint[]) AS u(study_id)",
    )
    .bind(rule_id)
    .bind(compression_type)
    .bind(study_ids)
    .execute(conn)
    .await?;
    Ok(result.rows_affected())
}

pub async fn claim_compression_tasks(
    conn: &mut PgConnection,
    limit: i64,
) -> Result<Vec<CompressionTask>> {
    let tasks = sqlx::query_as::<_, CompressionTask>(&format!(
        "UPDATE compression_task SET status = 'IN_PROGRESS', updated_at = now() \
         WHERE id IN (SELECT id FROM compression_task WHERE status = 'PENDING' \
                      ORDER BY id LIMIT $1 FOR UPDATE SKIP LOCKED) \
         RETURNING {}",
        COMPRESSION_COLUMNS
    ))
    .bind(limit)
    .fetch_all(conn)
    .await?;
    Ok(tasks)
}

pub async fn finish_compression_task(
    conn: &mut PgConnection,
    task_id: i64,
    status: TaskStatus,
    error: Option<&str>,
) -> Result<()> {
    sqlx::query(
        "UPDATE compression_task SET status = $2, error = $3, updated_at = now() WHERE id = $1",
    )
    .bind(task_id)
    .bind(status)
    .bind(error)
    .execute(conn)
    .await?;
    Ok(())
}

pub async fn list_compression_tasks(
    db: &Db,
    tenant: &TenantCtx,
    status: Option<TaskStatus>,
    limit: i64,
) -> Result<Vec<CompressionTask>> {
    let mut conn = db.tenant_conn(tenant).await?;
    let tasks = sqlx::query_as::<_, CompressionTask>(&format!(
        "SELECT {} FROM compression_task \
         WHERE ($1::text IS NULL OR status = $1) ORDER BY id DESC LIMIT $2",
        COMPRESSION_COLUMNS
    ))
    .bind(status)
    .bind(limit)
    .fetch_all(&mut *conn)
    .await?;
    Ok(tasks)
}
