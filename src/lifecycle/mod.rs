//! Lifecycle engine: nightly rule evaluation producing persistent task
//! rows, plus the workers that execute migrations and compressions.

use crate::cache::{Caches, LIFECYCLE_RULES};
use crate::config::config::LifecycleConfig;
use crate::db::lifecycle as repo;
use crate::error::Result;
use crate::metadata::MetadataService;
use crate::models::{LifecycleAction, LifecycleRule};
use crate::storage::VolumeManager;
use crate::tenancy::TenantCtx;
use crate::Db;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

pub mod compression;
pub mod evaluator;
pub mod migration;
pub mod transcode;

#[derive(Debug, Default)]
pub struct EvaluationReport {
    pub migration_tasks: u64,
    pub compression_tasks: u64,
}

pub struct Engine {
    pub(crate) db: Db,
    pub(crate) volumes: Arc<VolumeManager>,
    pub(crate) caches: Caches,
    pub(crate) metadata: Arc<MetadataService>,
    pub(crate) evaluation_cap: i64,
    pub(crate) migration_batch: i64,
}

impl Engine {
    pub fn new(
        db: Db,
        volumes: Arc<VolumeManager>,
        caches: Caches,
        metadata: Arc<MetadataService>,
        config: &LifecycleConfig,
    ) -> Engine {
        Engine {
            db,
            volumes,
            caches,
            metadata,
            evaluation_cap: config.evaluation_cap,
            migration_batch: config.migration_batch,
        }
    }

    /// Enabled rules for one action, served through the 6 h rule cache.
    pub async fn rules(&self, action: LifecycleAction) -> Result<Vec<LifecycleRule>> {
        let key = match action {
            LifecycleAction::Migrate => "MIGRATE",
            LifecycleAction::Compress => "COMPRESS",
        };
        if let Some(rules) = self.caches.get(&LIFECYCLE_RULES, key).await {
            return Ok(rules);
        }
        let rules = repo::rules_for_action(&self.db, action).await?;
        self.caches.put(&LIFECYCLE_RULES, key, &rules).await;
        Ok(rules)
    }

    pub async fn invalidate_rule_cache(&self) {
        self.caches.invalidate(&LIFECYCLE_RULES, "MIGRATE").await;
        self.caches.invalidate(&LIFECYCLE_RULES, "COMPRESS").await;
    }

    /// One full evaluation pass over every enabled rule.
    pub async fn evaluate_all(&self) -> Result<EvaluationReport> {
        evaluator::evaluate_all(self).await
    }

    /// One migration worker cycle.
    pub async fn run_migrations(&self) -> Result<u64> {
        migration::run_cycle(self).await
    }

    /// One compression dispatch cycle for a tenant.
    pub async fn run_compressions(&self, tenant: &TenantCtx) -> Result<u64> {
        compression::run_cycle(self, tenant).await
    }

    /// Admin trigger: queue one study for compression directly.
    pub async fn trigger_compression(
        &self,
        tenant: &TenantCtx,
        study_id: i64,
        compression_type: &str,
    ) -> Result<u64> {
        transcode::validate_target(compression_type)?;
        let mut conn = self.db.tenant_conn(tenant).await?;
        repo::enqueue_compression_tasks(&mut conn, None, compression_type, &[study_id]).await
    }
}

/// Spawn the periodic scheduler loops: nightly evaluation, the 10-minute
/// migration/compression cycles, and daily partition maintenance.
pub fn start_scheduler(
    engine: Arc<Engine>,
    config: &LifecycleConfig,
    months_ahead: u32,
    shutdown: CancellationToken,
) -> Vec<tokio::task::JoinHandle<()>> {
    let mut handles = Vec::new();

    {
        let engine = engine.clone();
        let shutdown = shutdown.clone();
        let every = Duration::from_secs(config.evaluate_interval_secs);
        handles.push(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.tick().await; // skip the immediate first tick
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = ticker.tick() => {
                        match engine.evaluate_all().await {
                            Ok(report) => tracing::info!(
                                migration_tasks = report.migration_tasks,
                                compression_tasks = report.compression_tasks,
                                "lifecycle evaluation finished"
                            ),
                            Err(e) => tracing::error!("lifecycle evaluation failed: {}", e),
                        }
                    }
                }
            }
        }));
    }

    {
        let engine = engine.clone();
        let shutdown = shutdown.clone();
        let every = Duration::from_secs(config.migration_interval_secs);
        handles.push(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = ticker.tick() => {
                        if let Err(e) = engine.run_migrations().await {
                            tracing::error!("migration cycle failed: {}", e);
                        }
                        match crate::ingest::consumer::active_tenant_codes(&engine.db, &engine.caches).await {
                            Ok(codes) => {
                                for code in codes {
                                    let tenant = TenantCtx { code };
                                    if let Err(e) = engine.run_compressions(&tenant).await {
                                        tracing::error!(tenant = %tenant.code, "compression cycle failed: {}", e);
                                    }
                                }
                            }
                            Err(e) => tracing::error!("tenant list unavailable: {}", e),
                        }
                    }
                }
            }
        }));
    }

    {
        let engine = engine.clone();
        let shutdown = shutdown.clone();
        handles.push(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_secs(86_400));
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = ticker.tick() => {
                        match crate::ingest::consumer::active_tenant_codes(&engine.db, &engine.caches).await {
                            Ok(codes) => {
                                for code in codes {
                                    let tenant = TenantCtx { code };
                                    match crate::db::partitions::ensure_partitions(&engine.db, &tenant, months_ahead).await {
                                        Ok(n) => tracing::debug!(tenant = %tenant.code, partitions = n, "partition maintenance ok"),
                                        Err(e) => tracing::error!(tenant = %tenant.code, "partition maintenance failed: {}", e),
                                    }
                                }
                            }
                            Err(e) => tracing::error!("tenant list unavailable: {}", e),
                        }
                    }
                }
            }
        }));
    }

    handles
}
