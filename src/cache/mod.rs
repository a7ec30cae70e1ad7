//! Tenant-keyed caches with per-cache TTLs and explicit writer-driven
//! invalidation (write-behind-invalidate: the repository writes the
//! database, then the writer evicts; readers batch-load on miss).

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;

pub mod local;
pub mod shared;

#[derive(Debug, Clone, Copy)]
pub struct CacheSpec {
    pub name: &'static str,
    pub ttl: Duration,
    /// Idle expiry (sliding) rather than absolute.
    pub idle: bool,
}

/// map[sopUid → location] per series; the batch load behind this cache is
/// what collapses N frame requests into one query.
pub const INSTANCE_LOCATIONS: CacheSpec = CacheSpec {
    name: "instance-locations",
    ttl: Duration::from_secs(30 * 60),
    idle: true,
};

pub const SERIES_METADATA_LOOKUP: CacheSpec = CacheSpec {
    name: "series-metadata-lookup",
    ttl: Duration::from_secs(60 * 60),
    idle: false,
};

pub const SERIES_BY_STUDY: CacheSpec = CacheSpec {
    name: "series-by-study",
    ttl: Duration::from_secs(60 * 60),
    idle: false,
};

pub const ACTIVE_TENANTS: CacheSpec = CacheSpec {
    name: "active-tenants",
    ttl: Duration::from_secs(60),
    idle: false,
};

pub const LIFECYCLE_RULES: CacheSpec = CacheSpec {
    name: "lifecycle-rules",
    ttl: Duration::from_secs(6 * 60 * 60),
    idle: false,
};

pub const ALL_SPECS: [&CacheSpec; 5] = [
    &INSTANCE_LOCATIONS,
    &SERIES_METADATA_LOOKUP,
    &SERIES_BY_STUDY,
    &ACTIVE_TENANTS,
    &LIFECYCLE_RULES,
];

#[async_trait]
pub trait CacheBackend: Send + Sync {
    async fn get(&self, spec: &CacheSpec, key: &str) -> Option<Vec<u8>>;
    async fn put(&self, spec: &CacheSpec, key: &str, value: Vec<u8>);
    async fn invalidate(&self, spec: &CacheSpec, key: &str);
}

/// Serde-typed view over the configured backend.
#[derive(Clone)]
pub struct Caches {
    backend: Arc<dyn CacheBackend>,
}

impl Caches {
    pub fn new(backend: Arc<dyn CacheBackend>) -> Caches {
        Caches { backend }
    }

    pub async fn get<T: DeserializeOwned>(&self, spec: &CacheSpec, key: &str) -> Option<T> {
        let bytes = self.backend.get(spec, key).await?;
        match serde_json::from_slice(&bytes) {
            Ok(value) => Some(value),
            Err(e) => {
                tracing::warn!(cache = spec.name, key, "dropping undecodable cache entry: {}", e);
                self.backend.invalidate(spec, key).await;
                None
            }
        }
    }

    pub async fn put<T: Serialize>(&self, spec: &CacheSpec, key: &str, value: &T) {
        match serde_json::to_vec(value) {
            Ok(bytes) => self.backend.put(spec, key, bytes).await,
            Err(e) => tracing::warn!(cache = spec.name, key, "cache encode failed: {}", e),
        }
    }

    pub async fn invalidate(&self, spec: &CacheSpec, key: &str) {
        self.backend.invalidate(spec, key).await;
    }

    /// Key for the tenant-scoped caches.
    pub fn tenant_key(tenant_code: &str, id: &str) -> String {
        format!("{}:{}", tenant_code, id)
    }

    /// Writer-side eviction after an ingest batch commits.
    pub async fn evict_after_ingest(
        &self,
        tenant_code: &str,
        series_uids: &[String],
        study_uids: &[String],
    ) {
        for series_uid in series_uids {
            let key = Self::tenant_key(tenant_code, series_uid);
            self.invalidate(&INSTANCE_LOCATIONS, &key).await;
            self.invalidate(&SERIES_METADATA_LOOKUP, &key).await;
        }
        for study_uid in study_uids {
            let key = Self::tenant_key(tenant_code, study_uid);
            self.invalidate(&SERIES_BY_STUDY, &key).await;
        }
    }
}

pub fn create_backend(
    config: &crate::config::config::CacheConfig,
    redis: Option<redis::aio::ConnectionManager>,
) -> crate::error::Result<Arc<dyn CacheBackend>> {
    match config.backend.as_str() {
        "shared" => {
            let manager = redis.ok_or_else(|| {
                crate::error::ArchiveError::Config(
                    "cache backend 'shared' requires a redis connection".to_string(),
                )
            })?;
            Ok(Arc::new(shared::SharedCache::new(manager)))
        }
        _ => Ok(Arc::new(local::LocalCache::new())),
    }
}
