//! Redis-streams queue backend: one stream per tenant, one consumer group
//! shared by all indexing workers.

use crate::error::{ArchiveError, Result};
use crate::queue::{stream_key, Delivery, IngestMessage, IngestQueue, CONSUMER_GROUP, READ_BLOCK};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use redis::aio::ConnectionManager;
use redis::streams::{StreamReadOptions, StreamReadReply};
use redis::AsyncCommands;
use std::collections::HashSet;
use std::sync::Mutex;

pub struct RedisStreamQueue {
    manager: ConnectionManager,
    /// Streams whose consumer group exists.
    groups: Mutex<HashSet<String>>,
    /// `(stream, consumer)` pairs whose pending backlog was drained; until
    /// then reads start at id `0` to pick up pre-crash deliveries.
    recovered: Mutex<HashSet<(String, String)>>,
}

impl RedisStreamQueue {
    pub async fn connect(url: &str) -> Result<RedisStreamQueue> {
        let client = redis::Client::open(url).map_err(ArchiveError::from)?;
        let manager = client
            .get_connection_manager()
            .await
            .map_err(ArchiveError::from)?;
        Ok(RedisStreamQueue {
            manager,
            groups: Mutex::new(HashSet::new()),
            recovered: Mutex::new(HashSet::new()),
        })
    }

    async fn ensure_group(&self, key: &str) -> Result<()> {
        if self.groups.lock().unwrap().contains(key) {
            return Ok(());
        }
        let mut conn = self.manager.clone();
        let created: std::result::Result<(), redis::RedisError> = conn
            .xgroup_create_mkstream(key, CONSUMER_GROUP, "0")
            .await;
        match created {
            Ok(()) => {}
            // Group already exists from a previous run.
            Err(e) if e.code() == Some("BUSYGROUP") => {}
            Err(e) => return Err(e.into()),
        }
        self.groups.lock().unwrap().insert(key.to_string());
        Ok(())
    }

    fn parse_entries(reply: StreamReadReply) -> Vec<Delivery> {
        let mut deliveries = Vec::new();
        for key in reply.keys {
            for entry in key.ids {
                let field = |name: &str| -> Option<String> {
                    entry
                        .map
                        .get(name)
                        .and_then(|v| redis::from_redis_value::<String>(v.clone()).ok())
                };
                let (Some(file_path), Some(tenant_code)) =
                    (field("file_path"), field("tenant_code"))
                else {
                    tracing::warn!(id = %entry.id, "dropping malformed queue entry");
                    continue;
                };
                let received_at = field("received_at")
                    .and_then(|s| s.parse::<DateTime<Utc>>().ok())
                    .unwrap_or_else(Utc::now);
                deliveries.push(Delivery {
                    id: entry.id.clone(),
                    message: IngestMessage {
                        file_path,
                        tenant_code,
                        received_at,
                    },
                });
            }
        }
        deliveries
    }
}

#[async_trait]
impl IngestQueue for RedisStreamQueue {
    async fn publish(&self, message: &IngestMessage) -> Result<()> {
        let key = stream_key(&message.tenant_code);
        self.ensure_group(&key).await?;
        let mut conn = self.manager.clone();
        let received_at = message.received_at.to_rfc3339();
        let _id: String = conn
            .xadd(
                &key,
                "*",
                &[
                    ("file_path", message.file_path.as_str()),
                    ("tenant_code", message.tenant_code.as_str()),
                    ("received_at", received_at.as_str()),
                ],
            )
            .await?;
        Ok(())
    }

    async fn read_batch(
        &self,
        tenant_code: &str,
        consumer: &str,
        batch: usize,
    ) -> Result<Vec<Delivery>> {
        let key = stream_key(tenant_code);
        self.ensure_group(&key).await?;
        let recovery_key = (key.clone(), consumer.to_string());
        let recovering = !self.recovered.lock().unwrap().contains(&recovery_key);

        let mut conn = self.manager.clone();
        let options = StreamReadOptions::default()
            .group(CONSUMER_GROUP, consumer)
            .count(batch)
            .block(READ_BLOCK.as_millis() as usize);

        if recovering {
            // Pending list first: entries delivered to this consumer but
            // never acked before the last shutdown.
            let reply: StreamReadReply = conn
                .xread_options(&[key.as_str()], &["0"], &options)
                .await?;
            let deliveries = Self::parse_entries(reply);
            if !deliveries.is_empty() {
                return Ok(deliveries);
            }
            self.recovered.lock().unwrap().insert(recovery_key);
        }

        let reply: StreamReadReply = conn
            .xread_options(&[key.as_str()], &[">"], &options)
            .await?;
        Ok(Self::parse_entries(reply))
    }

    async fn ack(&self, tenant_code: &str, deliveries: &[Delivery]) -> Result<()> {
        if deliveries.is_empty() {
            return Ok(());
        }
        let key = stream_key(tenant_code);
        let ids: Vec<&str> = deliveries.iter().map(|d| d.id.as_str()).collect();
        let mut conn = self.manager.clone();
        let _acked: i64 = conn.xack(&key, CONSUMER_GROUP, &ids).await?;
        // Trim acknowledged entries so stream length tracks the backlog.
        let _deleted: i64 = conn.xdel(&key, &ids).await?;
        Ok(())
    }

    async fn pending_count(&self, tenant_code: &str) -> Result<i64> {
        let mut conn = self.manager.clone();
        let len: i64 = conn.xlen(stream_key(tenant_code)).await?;
        Ok(len)
    }
}
