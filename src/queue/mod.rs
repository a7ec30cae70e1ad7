//! Durable per-tenant ingest queue with consumer groups.
//!
//! Delivery is at-least-once: a batch is acknowledged only after the
//! downstream transaction commits, and unacked deliveries are served
//! again (to some worker) after a crash. The downstream upsert is
//! idempotent, which is what makes redelivery safe.

use crate::config::config::{QueueConfig, RedisConfig};
use crate::error::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

pub mod stream;
pub mod wal;

/// Consumer group shared by every indexing worker.
pub const CONSUMER_GROUP: &str = "indexer-group";

/// Bounded block per read so shutdown signals are observed promptly.
pub const READ_BLOCK: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IngestMessage {
    pub file_path: String,
    pub tenant_code: String,
    pub received_at: DateTime<Utc>,
}

/// One delivered message plus the backend's acknowledgement handle.
#[derive(Debug, Clone)]
pub struct Delivery {
    pub id: String,
    pub message: IngestMessage,
}

#[async_trait]
pub trait IngestQueue: Send + Sync {
    /// Append to the tenant's stream. Non-blocking.
    async fn publish(&self, message: &IngestMessage) -> Result<()>;

    /// Read up to `batch` messages for `consumer`, blocking at most
    /// [`READ_BLOCK`]. The first read after startup serves the consumer's
    /// pending (delivered-but-unacked) entries; later reads serve new
    /// entries.
    async fn read_batch(
        &self,
        tenant_code: &str,
        consumer: &str,
        batch: usize,
    ) -> Result<Vec<Delivery>>;

    /// Acknowledge a fully processed batch.
    async fn ack(&self, tenant_code: &str, deliveries: &[Delivery]) -> Result<()>;

    /// Backlog depth for monitoring.
    async fn pending_count(&self, tenant_code: &str) -> Result<i64>;
}

pub async fn create_queue(
    queue: &QueueConfig,
    redis: &RedisConfig,
) -> Result<Arc<dyn IngestQueue>> {
    match queue.backend.as_str() {
        "wal" => Ok(Arc::new(wal::WalQueue::open(&queue.wal_dir)?)),
        _ => Ok(Arc::new(stream::RedisStreamQueue::connect(&redis.url).await?)),
    }
}

/// Stream key for a tenant.
pub fn stream_key(tenant_code: &str) -> String {
    format!("ingest:{}", tenant_code)
}
