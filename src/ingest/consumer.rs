//! Indexing consumers: pull per-tenant batches from the queue, store the
//! file bytes on the active HOT volume, index the batch through the bulk
//! repository, then acknowledge and evict caches.
//!
//! Per-file failures are localised (quarantine, batch continues); a
//! failed transaction leaves the batch unacked so the queue redelivers
//! it, which the idempotent upsert absorbs.

use crate::cache::{Caches, ACTIVE_TENANTS};
use crate::db::bulk::{self, IngestItem};
use crate::db::{audit, tenants};
use crate::error::Result;
use crate::metadata::MetadataService;
use crate::models::VolumeTier;
use crate::queue::{Delivery, IngestQueue};
use crate::storage::VolumeManager;
use crate::tenancy::TenantCtx;
use crate::Db;
use chrono::Utc;
use std::io::Cursor;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

const ERROR_BACKOFF: Duration = Duration::from_secs(5);

#[derive(Clone)]
pub struct ConsumerDeps {
    pub db: Db,
    pub queue: Arc<dyn IngestQueue>,
    pub volumes: Arc<VolumeManager>,
    pub caches: Caches,
    pub metadata: Arc<MetadataService>,
    pub spool_dir: PathBuf,
    pub batch_size: usize,
}

/// Crash flag kept per worker so operators can see wedged loops.
#[derive(Debug, Default)]
pub struct ConsumerHealth {
    crashed: AtomicBool,
}

impl ConsumerHealth {
    pub fn is_crashed(&self) -> bool {
        self.crashed.load(Ordering::Relaxed)
    }
}

/// Spawn `count` supervised worker loops. Each panicking loop flips its
/// crash flag and is restarted by its watchdog after a short backoff.
pub fn start_consumers(
    deps: ConsumerDeps,
    count: usize,
    shutdown: CancellationToken,
) -> (Vec<tokio::task::JoinHandle<()>>, Vec<Arc<ConsumerHealth>>) {
    let mut handles = Vec::with_capacity(count);
    let mut health = Vec::with_capacity(count);
    for n in 0..count {
        let worker_id = format!("indexer-{}", n);
        let flag = Arc::new(ConsumerHealth::default());
        health.push(flag.clone());
        let deps = deps.clone();
        let shutdown = shutdown.clone();
        handles.push(tokio::spawn(supervise(deps, worker_id, flag, shutdown)));
    }
    (handles, health)
}

async fn supervise(
    deps: ConsumerDeps,
    worker_id: String,
    health: Arc<ConsumerHealth>,
    shutdown: CancellationToken,
) {
    while !shutdown.is_cancelled() {
        let loop_deps = deps.clone();
        let loop_id = worker_id.clone();
        let loop_shutdown = shutdown.clone();
        let run = tokio::spawn(async move { worker_loop(loop_deps, loop_id, loop_shutdown).await });
        match run.await {
            Ok(()) => break, // clean shutdown
            Err(e) => {
                health.crashed.store(true, Ordering::Relaxed);
                tracing::error!(worker = %worker_id, "consumer crashed, restarting: {}", e);
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = tokio::time::sleep(ERROR_BACKOFF) => {}
                }
                health.crashed.store(false, Ordering::Relaxed);
            }
        }
    }
}

async fn worker_loop(deps: ConsumerDeps, worker_id: String, shutdown: CancellationToken) {
    tracing::info!(worker = %worker_id, "ingest consumer started");
    while !shutdown.is_cancelled() {
        match run_cycle(&deps, &worker_id, &shutdown).await {
            Ok(did_work) => {
                if !did_work {
                    // Queue reads already block ~2 s per tenant; nothing
                    // extra to wait for here.
                }
            }
            Err(e) => {
                tracing::error!(worker = %worker_id, "consumer cycle failed: {}", e);
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = tokio::time::sleep(ERROR_BACKOFF) => {}
                }
            }
        }
    }
    tracing::info!(worker = %worker_id, "ingest consumer stopped");
}

async fn run_cycle(
    deps: &ConsumerDeps,
    worker_id: &str,
    shutdown: &CancellationToken,
) -> Result<bool> {
    let mut did_work = false;
    for code in active_tenant_codes(&deps.db, &deps.caches).await? {
        if shutdown.is_cancelled() {
            break;
        }
        let deliveries = deps
            .queue
            .read_batch(&code, worker_id, deps.batch_size)
            .await?;
        if deliveries.is_empty() {
            continue;
        }
        did_work = true;
        let tenant = TenantCtx { code: code.clone() };
        process_batch(deps, &tenant, deliveries).await?;
    }
    Ok(did_work)
}

/// Cached active-tenant list (60 s TTL).
pub async fn active_tenant_codes(db: &Db, caches: &Caches) -> Result<Vec<String>> {
    if let Some(codes) = caches.get::<Vec<String>>(&ACTIVE_TENANTS, "all").await {
        return Ok(codes);
    }
    let codes: Vec<String> = tenants::list_active(db)
        .await?
        .into_iter()
        .map(|t| t.code)
        .collect();
    caches.put(&ACTIVE_TENANTS, "all", &codes).await;
    Ok(codes)
}

async fn process_batch(
    deps: &ConsumerDeps,
    tenant: &TenantCtx,
    deliveries: Vec<Delivery>,
) -> Result<()> {
    let mut items: Vec<IngestItem> = Vec::with_capacity(deliveries.len());
    let mut stored_files: Vec<PathBuf> = Vec::with_capacity(deliveries.len());

    for delivery in &deliveries {
        let file = PathBuf::from(&delivery.message.file_path);
        match store_one(deps, tenant, &file).await {
            Ok(item) => {
                items.push(item);
                stored_files.push(file);
            }
            Err(e) => {
                tracing::warn!(
                    tenant = %tenant.code,
                    file = %file.display(),
                    "ingest rejected file: {}",
                    e
                );
                crate::ingest::quarantine(&deps.spool_dir, &tenant.code, &file).await;
            }
        }
    }

    // The transaction failing must leave the batch unacked: propagate.
    let outcome = bulk::upsert_batch(&deps.db, tenant, &items).await?;
    deps.queue.ack(&tenant.code, &deliveries).await?;

    for file in stored_files {
        if let Err(e) = tokio::fs::remove_file(&file).await {
            tracing::debug!(file = %file.display(), "spool cleanup failed: {}", e);
        }
    }

    let series_uids: Vec<String> = outcome
        .series
        .iter()
        .map(|s| s.series_uid.clone())
        .collect();
    deps.caches
        .evict_after_ingest(&tenant.code, &series_uids, &outcome.study_uids)
        .await;
    for series in &outcome.series {
        deps.metadata.spawn_rebuild(
            tenant.clone(),
            series.series_id,
            series.created_date,
            series.series_uid.clone(),
        );
    }

    audit::record(
        &deps.db,
        tenant,
        audit::AuditEvent::IngestBatch,
        serde_json::json!({
            "received": deliveries.len(),
            "indexed": outcome.inserted,
            "deduplicated": outcome.deduplicated,
        }),
    )
    .await;

    tracing::info!(
        tenant = %tenant.code,
        received = deliveries.len(),
        indexed = outcome.inserted,
        deduplicated = outcome.deduplicated,
        "ingest batch committed"
    );
    Ok(())
}

/// Parse one spooled file and place its bytes on the active HOT volume.
async fn store_one(deps: &ConsumerDeps, tenant: &TenantCtx, file: &PathBuf) -> Result<IngestItem> {
    let bytes = bytes::Bytes::from(tokio::fs::read(file).await?);
    let file_size = bytes.len() as i64;

    let parse_bytes = bytes.clone();
    let parsed = tokio::task::spawn_blocking(move || {
        dicom_codec::parse_header(Cursor::new(parse_bytes))
    })
    .await
    .map_err(|e| crate::error::ArchiveError::Queue(e.to_string()))??;
    let parsed = Arc::new(parsed);

    let volume = deps.volumes.active_write_volume(VolumeTier::Hot)?;
    let template = deps.volumes.template_for(&volume)?;
    let storage_path = template.resolve(&tenant.code, &parsed.object, Utc::now());

    let provider = deps.volumes.provider(volume.id)?;
    provider.write(&storage_path, bytes).await?;

    Ok(IngestItem {
        meta: parsed,
        volume_id: volume.id,
        storage_path,
        file_size,
    })
}
