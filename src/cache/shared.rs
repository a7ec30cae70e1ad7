//! Shared cache backend on Redis, for multi-node deployments where every
//! node must observe the writers' evictions.

use crate::cache::{CacheBackend, CacheSpec};
use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;

pub struct SharedCache {
    manager: ConnectionManager,
}

impl SharedCache {
    pub fn new(manager: ConnectionManager) -> SharedCache {
        SharedCache { manager }
    }

    fn redis_key(spec: &CacheSpec, key: &str) -> String {
        format!("spax:cache:{}:{}", spec.name, key)
    }
}

#[async_trait]
impl CacheBackend for SharedCache {
    async fn get(&self, spec: &CacheSpec, key: &str) -> Option<Vec<u8>> {
        let mut conn = self.manager.clone();
        let redis_key = Self::redis_key(spec, key);
        let value: Option<Vec<u8>> = match conn.get(&redis_key).await {
            Ok(v) => v,
            Err(e) => {
                tracing::warn!(cache = spec.name, "shared cache read failed: {}", e);
                return None;
            }
        };
        // Sliding expiry: reads refresh idle-expired caches.
        if value.is_some() && spec.idle {
            let _: Result<(), _> = conn.expire(&redis_key, spec.ttl.as_secs() as i64).await;
        }
        value
    }

    async fn put(&self, spec: &CacheSpec, key: &str, value: Vec<u8>) {
        let mut conn = self.manager.clone();
        let redis_key = Self::redis_key(spec, key);
        let result: Result<(), redis::RedisError> =
            conn.set_ex(&redis_key, value, spec.ttl.as_secs()).await;
        if let Err(e) = result {
            tracing::warn!(cache = spec.name, "shared cache write failed: {}", e);
        }
    }

    async fn invalidate(&self, spec: &CacheSpec, key: &str) {
        let mut conn = self.manager.clone();
        let redis_key = Self::redis_key(spec, key);
        let result: Result<i64, redis::RedisError> = conn.del(&redis_key).await;
        if let Err(e) = result {
            tracing::warn!(cache = spec.name, "shared cache eviction failed: {}", e);
        }
    }
}
