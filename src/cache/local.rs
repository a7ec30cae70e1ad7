//! In-process cache backend: one moka cache per named cache, sized and
//! expired per its spec.

use crate::cache::{CacheBackend, CacheSpec, ALL_SPECS};
use async_trait::async_trait;
use moka::future::Cache;
use std::collections::HashMap;

const PER_CACHE_CAPACITY: u64 = 100_000;

pub struct LocalCache {
    caches: HashMap<&'static str, Cache<String, Vec<u8>>>,
}

impl LocalCache {
    pub fn new() -> LocalCache {
        let mut caches = HashMap::new();
        for spec in ALL_SPECS {
            let mut builder = Cache::builder().max_capacity(PER_CACHE_CAPACITY);
            builder = if spec.idle {
                builder.time_to_idle(spec.ttl)
            } else {
                builder.time_to_live(spec.ttl)
            };
            caches.insert(spec.name, builder.build());
        }
        LocalCache { caches }
    }

    fn cache(&self, spec: &CacheSpec) -> &Cache<String, Vec<u8>> {
        self.caches
            .get(spec.name)
            .unwrap_or_else(|| panic!("unregistered cache '{}'", spec.name))
    }
}

impl Default for LocalCache {
    fn default() -> Self {
        LocalCache::new()
    }
}

#[async_trait]
impl CacheBackend for LocalCache {
    async fn get(&self, spec: &CacheSpec, key: &str) -> Option<Vec<u8>> {
        self.cache(spec).get(key).await
    }

    async fn put(&self, spec: &CacheSpec, key: &str, value: Vec<u8>) {
        self.cache(spec).insert(key.to_string(), value).await;
    }

    async fn invalidate(&self, spec: &CacheSpec, key: &str) {
        self.cache(spec).invalidate(key).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{Caches, INSTANCE_LOCATIONS, SERIES_BY_STUDY};
    use std::sync::Arc;

    #[tokio::test]
    async fn round_trips_typed_values() {
        let caches = Caches::new(Arc::new(LocalCache::new()));
        let key = Caches::tenant_key("h1", "1.2.2");
        caches
            .put(&INSTANCE_LOCATIONS, &key, &vec!["a".to_string()])
            .await;
        let got: Option<Vec<String>> = caches.get(&INSTANCE_LOCATIONS, &key).await;
        assert_eq!(got, Some(vec!["a".to_string()]));
    }

    #[tokio::test]
    async fn invalidation_is_per_key_and_per_cache() {
        let caches = Caches::new(Arc::new(LocalCache::new()));
        let key = Caches::tenant_key("h1", "1.2.1");
        caches.put(&SERIES_BY_STUDY, &key, &1u32).await;
        caches.put(&INSTANCE_LOCATIONS, &key, &2u32).await;

        caches.invalidate(&SERIES_BY_STUDY, &key).await;
        assert_eq!(caches.get::<u32>(&SERIES_BY_STUDY, &key).await, None);
        assert_eq!(caches.get::<u32>(&INSTANCE_LOCATIONS, &key).await, Some(2));
    }

    #[tokio::test]
    async fn ingest_eviction_touches_series_and_study_keys() {
        let caches = Caches::new(Arc::new(LocalCache::new()));
        let series_key = Caches::tenant_key("h1", "se-1");
        let study_key = Caches::tenant_key("h1", "st-1");
        caches.put(&INSTANCE_LOCATIONS, &series_key, &1u32).await;
        caches.put(&SERIES_BY_STUDY, &study_key, &2u32).await;

        caches
            .evict_after_ingest("h1", &["se-1".to_string()], &["st-1".to_string()])
            .await;
        assert_eq!(
            caches.get::<u32>(&INSTANCE_LOCATIONS, &series_key).await,
            None
        );
        assert_eq!(caches.get::<u32>(&SERIES_BY_STUDY, &study_key).await, None);
    }
}
