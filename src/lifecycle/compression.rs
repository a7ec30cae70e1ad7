//! Compression worker: one task per study, executed as its own spawned
//! task. Instances already at the target syntax are skipped, which makes
//! an interrupted task safe to re-run.

use crate::cache::{Caches, INSTANCE_LOCATIONS};
use crate::db::lifecycle as repo;
use crate::error::Result;
use crate::lifecycle::Engine;
use crate::models::{CompressionTask, TaskStatus};
use crate::tenancy::TenantCtx;
use chrono::NaiveDate;
use std::sync::Arc;

/// Tasks claimed per tenant per cycle; each runs concurrently.
const CLAIM_BATCH: i64 = 10;

pub async fn run_cycle(engine: &Engine, tenant: &TenantCtx) -> Result<u64> {
    let tasks = {
        let mut conn = engine.db.tenant_conn(tenant).await?;
        repo::claim_compression_tasks(&mut conn, CLAIM_BATCH).await?
    };
    let count = tasks.len() as u64;
    for task in tasks {
        let engine = Arc::new(EngineRef {
            db: engine.db.clone(),
            volumes: engine.volumes.clone(),
            caches: engine.caches.clone(),
        });
        let tenant = tenant.clone();
        tokio::spawn(async move {
            let task_id = task.id;
            let outcome = compress_study(&engine, &tenant, &task).await;
            let mut conn = match engine.db.tenant_conn(&tenant).await {
                Ok(conn) => conn,
                Err(e) => {
                    tracing::error!(task = task_id, "cannot finalise compression task: {}", e);
                    return;
                }
            };
            let result = match outcome {
                Ok(stats) => {
                    tracing::info!(
                        tenant = %tenant.code,
                        task = task_id,
                        compressed = stats.compressed,
                        skipped = stats.skipped,
                        "compression task complete"
                    );
                    repo::finish_compression_task(&mut conn, task_id, TaskStatus::Completed, None)
                        .await
                }
                Err(e) => {
                    tracing::error!(tenant = %tenant.code, task = task_id, "compression failed: {}", e);
                    repo::finish_compression_task(
                        &mut conn,
                        task_id,
                        TaskStatus::Failed,
                        Some(&e.to_string()),
                    )
                    .await
                }
            };
            if let Err(e) = result {
                tracing::error!(task = task_id, "compression status update failed: {}", e);
            }
        });
    }
    Ok(count)
}

/// Subset of the engine a spawned study task needs.
struct EngineRef {
    db: crate::Db,
    volumes: Arc<crate::storage::VolumeManager>,
    caches: Caches,
}

#[derive(Debug, Default)]
struct CompressStats {
    compressed: usize,
    skipped: usize,
}

#[derive(Debug, sqlx::FromRow)]
struct CompressCandidate {
    id: i64,
    created_date: NaiveDate,
    transfer_syntax_uid: String,
    volume_id: i64,
    storage_path: String,
    series_fk: i64,
    series_uid: String,
}

async fn compress_study(
    engine: &EngineRef,
    tenant: &TenantCtx,
    task: &CompressionTask,
) -> Result<CompressStats> {
    let candidates: Vec<CompressCandidate> = {
        let mut conn = engine.db.tenant_conn(tenant).await?;
        sqlx::query_as(
            "SELECT i.id, i.created_date, i.transfer_syntax_uid, i.volume_id, \
                    i.storage_path, i.series_fk, se.series_uid \
             FROM instance i \
             JOIN series se ON se.id = i.series_fk AND se.created_at::date = i.created_date \
             WHERE se.study_fk = $1 \
             ORDER BY i.instance_number NULLS LAST, i.id",
        )
        .bind(task.study_id)
        .fetch_all(&mut *conn)
        .await?
    };

    let mut stats = CompressStats::default();
    let mut touched_series: Vec<(i64, NaiveDate, String)> = Vec::new();

    for candidate in candidates {
        if candidate.transfer_syntax_uid == task.compression_type {
            stats.skipped += 1;
            continue;
        }
        let provider = engine.volumes.provider(candidate.volume_id)?;
        let original = provider.read_all(&candidate.storage_path).await?;

        let target_ts = task.compression_type.clone();
        let compressed = tokio::task::spawn_blocking(move || {
            crate::lifecycle::transcode::transcode_file(&original, &target_ts)
        })
        .await
        .map_err(|e| crate::error::ArchiveError::Config(e.to_string()))??;
        let new_size = compressed.len() as i64;

        // Replace in place: same path, new bytes, then the row.
        provider.delete(&candidate.storage_path).await?;
        provider
            .write(&candidate.storage_path, compressed.into())
            .await?;

        {
            let mut conn = engine.db.tenant_conn(tenant).await?;
            sqlx::query(
                "UPDATE instance SET transfer_syntax_uid = $3, file_size = $4 \
                 WHERE id = $1 AND created_date = $2",
            )
            .bind(candidate.id)
            .bind(candidate.created_date)
            .bind(&task.compression_type)
            .bind(new_size)
            .execute(&mut *conn)
            .await?;
        }
        stats.compressed += 1;
        if !touched_series
            .iter()
            .any(|(id, _, _)| *id == candidate.series_fk)
        {
            touched_series.push((
                candidate.series_fk,
                candidate.created_date,
                candidate.series_uid.clone(),
            ));
        }
    }

    // Settle counters and the series compression markers.
    let mut conn = engine.db.tenant_conn(tenant).await?;
    for (series_id, created_date, series_uid) in &touched_series {
        sqlx::query(
            "UPDATE series SET \
               series_size = (SELECT COALESCE(SUM(file_size), 0) FROM instance \
                              WHERE series_fk = $1 AND created_date = $2), \
               compress_tsuid = $3, compress_time = now() \
             WHERE id = $1",
        )
        .bind(series_id)
        .bind(created_date)
        .bind(&task.compression_type)
        .execute(&mut *conn)
        .await?;
        engine
            .caches
            .invalidate(
                &INSTANCE_LOCATIONS,
                &Caches::tenant_key(&tenant.code, series_uid),
            )
            .await;
    }
    sqlx::query(
        "UPDATE study SET \
           study_size = (SELECT COALESCE(SUM(series_size), 0) FROM series WHERE study_fk = study.id), \
           updated_at = now() \
         WHERE id = $1",
    )
    .bind(task.study_id)
    .execute(&mut *conn)
    .await?;

    Ok(stats)
}
