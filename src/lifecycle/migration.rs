//! Migration worker: move instance files between volumes, one task per
//! instance.
//!
//! State transitions keep the invariant that either the instance row
//! points at a volume holding a verified copy of the file, or the task is
//! FAILED: copy → verify (existence and size) → repoint `volume_id` →
//! delete source → COMPLETED. Failures record their cause and are not
//! retried automatically; an admin can re-queue.

use crate::cache::{Caches, INSTANCE_LOCATIONS, SERIES_METADATA_LOOKUP};
use crate::db::lifecycle as repo;
use crate::error::{ArchiveError, Result};
use crate::lifecycle::Engine;
use crate::models::{MigrationTask, TaskStatus};
use crate::tenancy::TenantCtx;
use chrono::NaiveDate;

pub async fn run_cycle(engine: &Engine) -> Result<u64> {
    let tasks = repo::claim_migration_tasks(&engine.db, engine.migration_batch).await?;
    if tasks.is_empty() {
        return Ok(0);
    }
    tracing::info!(claimed = tasks.len(), "migration cycle started");

    let mut completed = 0;
    for task in tasks {
        match migrate_one(engine, &task).await {
            Ok(()) => {
                repo::finish_migration_task(&engine.db, task.id, TaskStatus::Completed, None)
                    .await?;
                completed += 1;
            }
            Err(e) => {
                tracing::error!(task = task.id, "migration failed: {}", e);
                repo::finish_migration_task(
                    &engine.db,
                    task.id,
                    TaskStatus::Failed,
                    Some(&e.to_string()),
                )
                .await?;
            }
        }
    }
    Ok(completed)
}

#[derive(Debug, sqlx::FromRow)]
struct InstanceFileRow {
    file_size: i64,
    storage_path: String,
    series_fk: i64,
    series_uid: String,
}

async fn migrate_one(engine: &Engine, task: &MigrationTask) -> Result<()> {
    let tenant = TenantCtx {
        code: task.tenant_code.clone(),
    };
    let instance: InstanceFileRow = {
        let mut conn = engine.db.tenant_conn(&tenant).await?;
        sqlx::query_as(
            "SELECT file_size, storage_path, series_fk, series_uid \
             FROM instance WHERE id = $1 AND created_date = $2",
        )
        .bind(task.instance_id)
        .bind(task.instance_created_date)
        .fetch_optional(&mut *conn)
        .await?
        .ok_or(ArchiveError::NotFound("instance"))?
    };

    let source = engine.volumes.provider(task.source_volume_id)?;
    let target = engine.volumes.provider(task.target_volume_id)?;

    target
        .copy_from(source.as_ref(), &instance.storage_path, &instance.storage_path)
        .await?;

    // Verify before repointing: same relative path, same byte count.
    if !target.exists(&instance.storage_path).await? {
        return Err(ArchiveError::StorageUnavailable(
            crate::storage::StorageError::Config(format!(
                "copied file missing at target volume {}",
                task.target_volume_id
            )),
        ));
    }
    let copied_size = target.size(&instance.storage_path).await?;
    if copied_size != instance.file_size {
        return Err(ArchiveError::StorageUnavailable(
            crate::storage::StorageError::Config(format!(
                "size mismatch after copy: {} != {}",
                copied_size, instance.file_size
            )),
        ));
    }

    {
        let mut conn = engine.db.tenant_conn(&tenant).await?;
        sqlx::query("UPDATE instance SET volume_id = $3 WHERE id = $1 AND created_date = $2")
            .bind(task.instance_id)
            .bind(task.instance_created_date)
            .bind(task.target_volume_id)
            .execute(&mut *conn)
            .await?;
    }

    if task.delete_source {
        source.delete(&instance.storage_path).await?;
    }

    engine
        .caches
        .invalidate(
            &INSTANCE_LOCATIONS,
            &Caches::tenant_key(&tenant.code, &instance.series_uid),
        )
        .await;

    finish_series_if_settled(
        engine,
        &tenant,
        instance.series_fk,
        task.instance_created_date,
        &instance.series_uid,
        task.target_volume_id,
    )
    .await?;
    Ok(())
}

/// When the last instance of a series lands on the target volume, the
/// series' metadata projection moves there too.
async fn finish_series_if_settled(
    engine: &Engine,
    tenant: &TenantCtx,
    series_fk: i64,
    created_date: NaiveDate,
    series_uid: &str,
    target_volume_id: i64,
) -> Result<()> {
    let stragglers: (i64,) = {
        let mut conn = engine.db.tenant_conn(tenant).await?;
        sqlx::query_as(
            "SELECT COUNT(*) FROM instance \
             WHERE series_fk = $1 AND created_date = $2 AND volume_id <> $3",
        )
        .bind(series_fk)
        .bind(created_date)
        .bind(target_volume_id)
        .fetch_one(&mut *conn)
        .await?
    };
    if stragglers.0 > 0 {
        return Ok(());
    }

    engine
        .caches
        .invalidate(
            &SERIES_METADATA_LOOKUP,
            &Caches::tenant_key(&tenant.code, series_uid),
        )
        .await;
    {
        let mut conn = engine.db.tenant_conn(tenant).await?;
        crate::db::locations::set_series_metadata_pointer(&mut conn, series_fk, None, None).await?;
    }
    engine.metadata.spawn_rebuild(
        tenant.clone(),
        series_fk,
        created_date,
        series_uid.to_string(),
    );
    tracing::info!(
        tenant = %tenant.code,
        series_uid,
        volume = target_volume_id,
        "series fully migrated, metadata projection rebuilt on target"
    );
    Ok(())
}
