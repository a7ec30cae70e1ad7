//! HTTP surface: QIDO/WADO/STOW, ingest, and admin routes, assembled on
//! one axum router. Every tenant-scoped handler takes the [`Tenant`]
//! extractor, which resolves and validates the tenant before any
//! tenant-scope SQL runs.

use crate::cache::{Caches, INSTANCE_LOCATIONS, SERIES_BY_STUDY, SERIES_METADATA_LOOKUP};
use crate::db::locations::{self, InstanceLocation, SeriesMetadataPointer, SeriesSummary};
use crate::error::{ArchiveError, Result};
use crate::ingest::consumer::{active_tenant_codes, ConsumerHealth};
use crate::metadata::MetadataService;
use crate::queue::IngestQueue;
use crate::storage::{IngestGate, VolumeManager};
use crate::tenancy::{validate_code, TenantCtx, TENANT_HEADER};
use crate::web::error::ApiError;
use crate::Db;
use axum::extract::{FromRequestParts, RawPathParams};
use axum::routing::{delete, get, post, put};
use axum::Router;
use http::request::Parts;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

pub mod admin;
pub mod error;
pub mod ingest;
pub mod multipart;
pub mod qido;
pub mod stow;
pub mod wado;

pub struct AppState {
    pub db: Db,
    pub queue: Arc<dyn IngestQueue>,
    pub volumes: Arc<VolumeManager>,
    pub caches: Caches,
    pub metadata: Arc<MetadataService>,
    pub lifecycle: Arc<crate::lifecycle::Engine>,
    pub gate: Arc<IngestGate>,
    pub spool_dir: PathBuf,
    pub consumer_health: Vec<Arc<ConsumerHealth>>,
}

pub type SharedState = Arc<AppState>;

impl AppState {
    /// Batch-loaded instance locations for a series (cache-backed).
    pub async fn instance_locations(
        &self,
        tenant: &TenantCtx,
        series_uid: &str,
    ) -> Result<HashMap<String, InstanceLocation>> {
        let key = Caches::tenant_key(&tenant.code, series_uid);
        if let Some(found) = self.caches.get(&INSTANCE_LOCATIONS, &key).await {
            return Ok(found);
        }
        let mut conn = self.db.tenant_conn(tenant).await?;
        let loaded = locations::load_series_locations(&mut conn, series_uid).await?;
        self.caches.put(&INSTANCE_LOCATIONS, &key, &loaded).await;
        Ok(loaded)
    }

    pub async fn series_by_study(
        &self,
        tenant: &TenantCtx,
        study_uid: &str,
    ) -> Result<Vec<SeriesSummary>> {
        let key = Caches::tenant_key(&tenant.code, study_uid);
        if let Some(found) = self.caches.get(&SERIES_BY_STUDY, &key).await {
            return Ok(found);
        }
        let mut conn = self.db.tenant_conn(tenant).await?;
        let loaded = locations::load_series_by_study(&mut conn, study_uid).await?;
        self.caches.put(&SERIES_BY_STUDY, &key, &loaded).await;
        Ok(loaded)
    }

    pub async fn series_metadata_pointer(
        &self,
        tenant: &TenantCtx,
        series_uid: &str,
    ) -> Result<Option<SeriesMetadataPointer>> {
        let key = Caches::tenant_key(&tenant.code, series_uid);
        if let Some(found) = self.caches.get(&SERIES_METADATA_LOOKUP, &key).await {
            return Ok(found);
        }
        let mut conn = self.db.tenant_conn(tenant).await?;
        let loaded = locations::load_series_metadata_pointer(&mut conn, series_uid).await?;
        if loaded.is_some() {
            self.caches.put(&SERIES_METADATA_LOOKUP, &key, &loaded).await;
        }
        Ok(loaded)
    }
}

/// Tenant extractor: path segment `{tenant}` or the `X-Tenant-ID` header,
/// validated and checked against the active tenant registry.
pub struct Tenant(pub TenantCtx);

impl FromRequestParts<SharedState> for Tenant {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &SharedState,
    ) -> std::result::Result<Self, Self::Rejection> {
        let from_path = RawPathParams::from_request_parts(parts, state)
            .await
            .ok()
            .and_then(|params| {
                params
                    .iter()
                    .find(|(name, _)| *name == "tenant")
                    .map(|(_, value)| value.to_string())
            });
        let code = from_path.or_else(|| {
            parts
                .headers
                .get(TENANT_HEADER)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string)
        });
        let Some(code) = code else {
            return Err(ArchiveError::TenantNotFound("(unspecified)".to_string()).into());
        };
        validate_code(&code)?;
        let active = active_tenant_codes(&state.db, &state.caches).await?;
        if !active.iter().any(|c| c == &code) {
            return Err(ArchiveError::TenantNotFound(code).into());
        }
        Ok(Tenant(TenantCtx { code }))
    }
}

pub fn build_router(state: SharedState) -> Router {
    Router::new()
        // ingest
        .route("/api/v1/{tenant}/ingest", post(ingest::upload))
        .route("/api/v1/transfer/commit", post(ingest::transfer_commit))
        // QIDO-RS
        .route(
            "/dicomweb/{tenant}/studies",
            get(qido::studies).post(stow::store),
        )
        .route("/dicomweb/{tenant}/studies/{study_uid}/series", get(qido::series))
        .route(
            "/dicomweb/{tenant}/studies/{study_uid}/series/{series_uid}/instances",
            get(qido::instances),
        )
        // WADO-RS
        .route("/dicomweb/{tenant}/studies/{study_uid}", get(wado::study))
        .route(
            "/dicomweb/{tenant}/studies/{study_uid}/series/{series_uid}",
            get(wado::series),
        )
        .route(
            "/dicomweb/{tenant}/studies/{study_uid}/series/{series_uid}/metadata",
            get(wado::series_metadata),
        )
        .route(
            "/dicomweb/{tenant}/studies/{study_uid}/series/{series_uid}/instances/{sop_uid}",
            get(wado::instance),
        )
        .route(
            "/dicomweb/{tenant}/studies/{study_uid}/series/{series_uid}/instances/{sop_uid}/frames/{frame_list}",
            get(wado::frames),
        )
        // global admin
        .route("/api/v1/admin/tenants", get(admin::list_tenants))
        .route(
            "/api/v1/admin/volumes",
            get(admin::list_volumes).post(admin::create_volume),
        )
        .route("/api/v1/admin/volumes/{id}", put(admin::update_volume))
        .route("/api/v1/admin/volumes/reload", post(admin::reload_volumes))
        .route(
            "/api/v1/admin/lifecycle/rules",
            get(admin::list_rules).post(admin::create_rule),
        )
        .route(
            "/api/v1/admin/lifecycle/rules/{id}",
            delete(admin::delete_rule),
        )
        .route("/api/v1/admin/lifecycle/run", post(admin::run_evaluation))
        .route(
            "/api/v1/admin/tasks/migration",
            get(admin::list_migration_tasks),
        )
        .route(
            "/api/v1/admin/tasks/migration/{id}/requeue",
            post(admin::requeue_migration),
        )
        // tenant-scoped admin
        .route("/api/v1/{tenant}/admin/queue", get(admin::queue_depth))
        .route(
            "/api/v1/{tenant}/admin/tasks/compression",
            get(admin::list_compression_tasks),
        )
        .route(
            "/api/v1/{tenant}/admin/tasks/correction",
            get(admin::list_correction_tasks),
        )
        .route(
            "/api/v1/{tenant}/admin/compress",
            post(admin::trigger_compression),
        )
        .route(
            "/api/v1/{tenant}/admin/patients/{patient_id}/correct",
            post(admin::correct_patient),
        )
        .with_state(state)
}
