//! Admin JSON endpoints: registry CRUD, lifecycle rules and triggers,
//! task listings, queue depth, patient-id correction.

use crate::db::{audit, corrections, lifecycle, tenants, volumes};
use crate::error::ArchiveError;
use crate::models::{
    LifecycleAction, LifecycleCondition, LifecycleRule, ProviderKind, StorageVolume, TaskStatus,
    VolumeStatus, VolumeTier,
};
use crate::web::error::{ApiError, ApiResult};
use crate::web::{SharedState, Tenant};
use axum::extract::{Path, Query, State};
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};

pub async fn list_tenants(State(state): State<SharedState>) -> ApiResult<Json<Value>> {
    let tenants = tenants::list_active(&state.db).await?;
    Ok(Json(json!(tenants)))
}

// -- volumes --------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct NewVolume {
    pub code: String,
    pub provider_kind: ProviderKind,
    pub base_path: String,
    pub tier: VolumeTier,
    #[serde(default = "default_status")]
    pub status: VolumeStatus,
    #[serde(default)]
    pub priority: i32,
    pub path_template: Option<String>,
    pub bucket: Option<String>,
    pub endpoint: Option<String>,
    pub region: Option<String>,
    pub access_key: Option<String>,
    pub secret_key: Option<String>,
}

fn default_status() -> VolumeStatus {
    VolumeStatus::Active
}

pub async fn list_volumes(State(state): State<SharedState>) -> ApiResult<Json<Value>> {
    let volumes = volumes::list(&state.db).await?;
    Ok(Json(json!(volumes)))
}

pub async fn create_volume(
    State(state): State<SharedState>,
    Json(new): Json<NewVolume>,
) -> ApiResult<Json<StorageVolume>> {
    if let Some(template) = new.path_template.as_deref() {
        crate::storage::template::PathTemplate::compile(template)
            .map_err(|e| ApiError(ArchiveError::Config(e.to_string())))?;
    }
    let volume = StorageVolume {
        id: 0,
        code: new.code,
        provider_kind: new.provider_kind,
        base_path: new.base_path,
        tier: new.tier,
        status: new.status,
        priority: new.priority,
        path_template: new.path_template,
        bucket: new.bucket,
        endpoint: new.endpoint,
        region: new.region,
        access_key: new.access_key,
        secret_key: new.secret_key,
    };
    let created = volumes::insert(&state.db, &volume).await?;
    state.volumes.reload(volumes::list(&state.db).await?);
    Ok(Json(created))
}

#[derive(Debug, Deserialize)]
pub struct VolumeUpdate {
    pub tier: VolumeTier,
    pub status: VolumeStatus,
    pub priority: i32,
    pub path_template: Option<String>,
}

pub async fn update_volume(
    State(state): State<SharedState>,
    Path(volume_id): Path<i64>,
    Json(update): Json<VolumeUpdate>,
) -> ApiResult<Json<StorageVolume>> {
    if let Some(template) = update.path_template.as_deref() {
        crate::storage::template::PathTemplate::compile(template)
            .map_err(|e| ApiError(ArchiveError::Config(e.to_string())))?;
    }
    let mut volume = state.volumes.volume(volume_id)?;
    volume.tier = update.tier;
    volume.status = update.status;
    volume.priority = update.priority;
    volume.path_template = update.path_template;
    let updated = volumes::update(&state.db, &volume).await?;
    state.volumes.reload(volumes::list(&state.db).await?);
    Ok(Json(updated))
}

pub async fn reload_volumes(State(state): State<SharedState>) -> ApiResult<Json<Value>> {
    let fresh = volumes::list(&state.db).await?;
    let count = fresh.len();
    state.volumes.reload(fresh);
    Ok(Json(json!({ "volumes": count })))
}

// -- lifecycle rules and runs --------------------------------------------

#[derive(Debug, Deserialize)]
pub struct NewRule {
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    pub action: LifecycleAction,
    pub source_tier: VolumeTier,
    pub target_tier: Option<VolumeTier>,
    pub condition: LifecycleCondition,
    pub condition_days: i32,
    #[serde(default)]
    pub delete_source: bool,
    pub compression_type: Option<String>,
    pub tenant_code: Option<String>,
}

fn default_enabled() -> bool {
    true
}

pub async fn list_rules(State(state): State<SharedState>) -> ApiResult<Json<Value>> {
    let rules = lifecycle::list_rules(&state.db).await?;
    Ok(Json(json!(rules)))
}

pub async fn create_rule(
    State(state): State<SharedState>,
    Json(new): Json<NewRule>,
) -> ApiResult<Json<LifecycleRule>> {
    if new.action == LifecycleAction::Migrate && new.target_tier.is_none() {
        return Err(ApiError(ArchiveError::Config(
            "MIGRATE rules require target_tier".to_string(),
        )));
    }
    if new.action == LifecycleAction::Compress && new.compression_type.is_none() {
        return Err(ApiError(ArchiveError::Config(
            "COMPRESS rules require compression_type".to_string(),
        )));
    }
    let rule = LifecycleRule {
        id: 0,
        enabled: new.enabled,
        action: new.action,
        source_tier: new.source_tier,
        target_tier: new.target_tier,
        condition: new.condition,
        condition_days: new.condition_days,
        delete_source: new.delete_source,
        compression_type: new.compression_type,
        tenant_code: new.tenant_code,
    };
    let created = lifecycle::insert_rule(&state.db, &rule).await?;
    state.lifecycle.invalidate_rule_cache().await;
    Ok(Json(created))
}

pub async fn delete_rule(
    State(state): State<SharedState>,
    Path(rule_id): Path<i64>,
) -> ApiResult<Json<Value>> {
    let deleted = lifecycle::delete_rule(&state.db, rule_id).await?;
    if !deleted {
        return Err(ApiError(ArchiveError::NotFound("lifecycle rule")));
    }
    state.lifecycle.invalidate_rule_cache().await;
    Ok(Json(json!({ "deleted": rule_id })))
}

/// Manual evaluator run, same pass the nightly schedule performs.
pub async fn run_evaluation(State(state): State<SharedState>) -> ApiResult<Json<Value>> {
    let report = state.lifecycle.evaluate_all().await?;
    Ok(Json(json!({
        "migration_tasks": report.migration_tasks,
        "compression_tasks": report.compression_tasks,
    })))
}

// -- task listings --------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct TaskFilter {
    pub status: Option<TaskStatus>,
    #[serde(default = "default_task_limit")]
    pub limit: i64,
}

fn default_task_limit() -> i64 {
    100
}

pub async fn list_migration_tasks(
    State(state): State<SharedState>,
    Query(filter): Query<TaskFilter>,
) -> ApiResult<Json<Value>> {
    let tasks = lifecycle::list_migration_tasks(&state.db, filter.status, filter.limit).await?;
    Ok(Json(json!(tasks)))
}

pub async fn requeue_migration(
    State(state): State<SharedState>,
    Path(task_id): Path<i64>,
) -> ApiResult<Json<Value>> {
    let requeued = lifecycle::requeue_migration_task(&state.db, task_id).await?;
    if !requeued {
        return Err(ApiError(ArchiveError::NotFound("failed migration task")));
    }
    Ok(Json(json!({ "requeued": task_id })))
}

pub async fn list_compression_tasks(
    State(state): State<SharedState>,
    Tenant(tenant): Tenant,
    Query(filter): Query<TaskFilter>,
) -> ApiResult<Json<Value>> {
    let tasks =
        lifecycle::list_compression_tasks(&state.db, &tenant, filter.status, filter.limit).await?;
    Ok(Json(json!(tasks)))
}

pub async fn list_correction_tasks(
    State(state): State<SharedState>,
    Tenant(tenant): Tenant,
    Query(filter): Query<TaskFilter>,
) -> ApiResult<Json<Value>> {
    let tasks = corrections::list_tasks(&state.db, &tenant, filter.status, filter.limit).await?;
    Ok(Json(json!(tasks)))
}

// -- queue monitoring -----------------------------------------------------

pub async fn queue_depth(
    State(state): State<SharedState>,
    Tenant(tenant): Tenant,
) -> ApiResult<Json<Value>> {
    let pending = state.queue.pending_count(&tenant.code).await?;
    let crashed = state
        .consumer_health
        .iter()
        .filter(|h| h.is_crashed())
        .count();
    Ok(Json(json!({
        "tenant": tenant.code,
        "pending": pending,
        "crashed_consumers": crashed,
    })))
}

// -- compression trigger and patient correction ---------------------------

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompressionTrigger {
    pub study_id: i64,
    pub compression_type: String,
}

pub async fn trigger_compression(
    State(state): State<SharedState>,
    Tenant(tenant): Tenant,
    Json(trigger): Json<CompressionTrigger>,
) -> ApiResult<Json<Value>> {
    let queued = state
        .lifecycle
        .trigger_compression(&tenant, trigger.study_id, &trigger.compression_type)
        .await?;
    audit::record(
        &state.db,
        &tenant,
        audit::AuditEvent::AdminChange,
        json!({ "compression_trigger": trigger.study_id }),
    )
    .await;
    Ok(Json(json!({ "queued": queued })))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PatientCorrection {
    pub new_patient_id: String,
    pub expected_version: i64,
}

/// Patient-id correction: synchronous patient rewrite under the
/// optimistic lock, asynchronous study rehash tracked by the returned
/// task.
pub async fn correct_patient(
    State(state): State<SharedState>,
    Tenant(tenant): Tenant,
    Path((_tenant, patient_id)): Path<(String, i64)>,
    Json(correction): Json<PatientCorrection>,
) -> ApiResult<Json<Value>> {
    let task = {
        let mut conn = state.db.tenant_conn(&tenant).await?;
        corrections::correct_patient_id(
            &mut conn,
            patient_id,
            &correction.new_patient_id,
            correction.expected_version,
        )
        .await?
    };

    let db = state.db.clone();
    let rehash_tenant = tenant.clone();
    let task_id = task.id;
    tokio::spawn(async move {
        match corrections::rehash_owned_studies(&db, &rehash_tenant, patient_id, task_id).await {
            Ok(count) => {
                tracing::info!(tenant = %rehash_tenant.code, patient_id, studies = count, "study rehash complete");
            }
            Err(e) => {
                tracing::error!(tenant = %rehash_tenant.code, patient_id, "study rehash failed: {}", e);
                if let Ok(mut conn) = db.tenant_conn(&rehash_tenant).await {
                    let _ = corrections::mark_task(
                        &mut conn,
                        task_id,
                        TaskStatus::Failed,
                        Some(&e.to_string()),
                    )
                    .await;
                }
            }
        }
    });

    audit::record(
        &state.db,
        &tenant,
        audit::AuditEvent::PatientCorrection,
        json!({ "patient": patient_id }),
    )
    .await;
    Ok(Json(json!(task)))
}
