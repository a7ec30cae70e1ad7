//! Rule evaluation: turn enabled lifecycle rules into persistent task
//! rows. Idempotent per pass: instances already covered by a live or
//! completed task, and studies with a non-terminal compression task of
//! the same type, are skipped by the candidate queries.

use crate::db::lifecycle as repo;
use crate::error::{ArchiveError, Result};
use crate::lifecycle::{Engine, EvaluationReport};
use crate::models::{LifecycleAction, LifecycleRule, VolumeTier};
use crate::tenancy::TenantCtx;

pub async fn evaluate_all(engine: &Engine) -> Result<EvaluationReport> {
    let mut report = EvaluationReport::default();

    for rule in engine.rules(LifecycleAction::Migrate).await? {
        match evaluate_migrate_rule(engine, &rule).await {
            Ok(count) => report.migration_tasks += count,
            // A rule failing (say, no write volume in its target tier)
            // must not abort the pass.
            Err(e) => tracing::warn!(rule = rule.id, "skipping MIGRATE rule: {}", e),
        }
    }
    for rule in engine.rules(LifecycleAction::Compress).await? {
        match evaluate_compress_rule(engine, &rule).await {
            Ok(count) => report.compression_tasks += count,
            Err(e) => tracing::warn!(rule = rule.id, "skipping COMPRESS rule: {}", e),
        }
    }
    Ok(report)
}

/// Tenants a rule applies to: its explicit scope, or every active tenant.
async fn rule_tenants(engine: &Engine, rule: &LifecycleRule) -> Result<Vec<TenantCtx>> {
    match &rule.tenant_code {
        Some(code) => Ok(vec![TenantCtx { code: code.clone() }]),
        None => Ok(
            crate::ingest::consumer::active_tenant_codes(&engine.db, &engine.caches)
                .await?
                .into_iter()
                .map(|code| TenantCtx { code })
                .collect(),
        ),
    }
}

fn volumes_in_tier(engine: &Engine, tier: VolumeTier) -> Vec<i64> {
    engine
        .volumes
        .volumes()
        .into_iter()
        .filter(|v| v.tier == tier)
        .map(|v| v.id)
        .collect()
}

async fn evaluate_migrate_rule(engine: &Engine, rule: &LifecycleRule) -> Result<u64> {
    let target_tier = rule.target_tier.ok_or_else(|| {
        ArchiveError::Config(format!("MIGRATE rule {} has no target tier", rule.id))
    })?;
    let source_volumes = volumes_in_tier(engine, rule.source_tier);
    if source_volumes.is_empty() {
        return Ok(0);
    }
    // One target per pass; NoWriteVolume propagates and skips the rule.
    let target = engine.volumes.active_write_volume(target_tier)?;

    let mut queued = 0;
    for tenant in rule_tenants(engine, rule).await? {
        let candidates = {
            let mut conn = engine.db.tenant_conn(&tenant).await?;
            repo::find_migration_candidates(
                &mut conn,
                &tenant.code,
                rule.condition,
                rule.condition_days,
                &source_volumes,
                engine.evaluation_cap,
            )
            .await?
        };
        let count = repo::enqueue_migration_tasks(
            &engine.db,
            &tenant.code,
            rule,
            target.id,
            &candidates,
        )
        .await?;
        if count > 0 {
            tracing::info!(
                rule = rule.id,
                tenant = %tenant.code,
                tasks = count,
                "queued migration tasks"
            );
        }
        queued += count;
    }
    Ok(queued)
}

async fn evaluate_compress_rule(engine: &Engine, rule: &LifecycleRule) -> Result<u64> {
    let compression_type = rule.compression_type.as_deref().ok_or_else(|| {
        ArchiveError::Config(format!("COMPRESS rule {} has no compression type", rule.id))
    })?;
    crate::lifecycle::transcode::validate_target(compression_type)?;
    let source_volumes = volumes_in_tier(engine, rule.source_tier);
    if source_volumes.is_empty() {
        return Ok(0);
    }

    let mut queued = 0;
    for tenant in rule_tenants(engine, rule).await? {
        let mut conn = engine.db.tenant_conn(&tenant).await?;
        let studies = repo::find_compression_candidates(
            &mut conn,
            rule.condition,
            rule.condition_days,
            &source_volumes,
            compression_type,
            engine.evaluation_cap,
        )
        .await?;
        let count =
            repo::enqueue_compression_tasks(&mut conn, Some(rule.id), compression_type, &studies)
                .await?;
        if count > 0 {
            tracing::info!(
                rule = rule.id,
                tenant = %tenant.code,
                tasks = count,
                "queued compression tasks"
            );
        }
        queued += count;
    }
    Ok(queued)
}
