//! Node-local write-ahead-log queue backend on redb, for deployments
//! without a shared Redis. Same at-least-once contract as the stream
//! backend: deliveries are tracked in a pending table until acked and
//! re-served to their consumer after a restart.

use crate::error::{ArchiveError, Result};
use crate::queue::{Delivery, IngestMessage, IngestQueue, READ_BLOCK};
use async_trait::async_trait;
use redb::{Database, ReadableTable, TableDefinition};
use std::collections::HashSet;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

const ENTRIES: TableDefinition<(&str, u64), &[u8]> = TableDefinition::new("ingest_entries");
const PENDING: TableDefinition<(&str, u64), &str> = TableDefinition::new("ingest_pending");
const SEQUENCES: TableDefinition<&str, u64> = TableDefinition::new("ingest_sequences");

pub struct WalQueue {
    db: Arc<Database>,
    recovered: Mutex<HashSet<(String, String)>>,
}

impl WalQueue {
    pub fn open<P: AsRef<Path>>(dir: P) -> Result<WalQueue> {
        let dir = dir.as_ref();
        std::fs::create_dir_all(dir)?;
        let db = Database::create(dir.join("ingest.redb"))
            .map_err(|e| ArchiveError::Queue(format!("failed to open WAL: {}", e)))?;
        // Create tables up front so first reads see them.
        let txn = db
            .begin_write()
            .map_err(|e| ArchiveError::Queue(e.to_string()))?;
        {
            txn.open_table(ENTRIES)
                .map_err(|e| ArchiveError::Queue(e.to_string()))?;
            txn.open_table(PENDING)
                .map_err(|e| ArchiveError::Queue(e.to_string()))?;
            txn.open_table(SEQUENCES)
                .map_err(|e| ArchiveError::Queue(e.to_string()))?;
        }
        txn.commit()
            .map_err(|e| ArchiveError::Queue(e.to_string()))?;
        Ok(WalQueue {
            db: Arc::new(db),
            recovered: Mutex::new(HashSet::new()),
        })
    }

    fn queue_err<E: std::fmt::Display>(e: E) -> ArchiveError {
        ArchiveError::Queue(e.to_string())
    }

    /// One non-blocking poll; the async wrapper loops with a deadline.
    fn poll_batch(
        db: &Database,
        tenant: &str,
        consumer: &str,
        batch: usize,
        recovering: bool,
    ) -> Result<Vec<Delivery>> {
        let txn = db.begin_write().map_err(Self::queue_err)?;
        let deliveries = {
            let entries = txn.open_table(ENTRIES).map_err(Self::queue_err)?;
            let mut pending = txn.open_table(PENDING).map_err(Self::queue_err)?;
            let range = (tenant, 0u64)..=(tenant, u64::MAX);

            let mut picked: Vec<(u64, Vec<u8>)> = Vec::new();
            if recovering {
                for row in entries.range(range).map_err(Self::queue_err)? {
                    let (key, value) = row.map_err(Self::queue_err)?;
                    let seq = key.value().1;
                    let assigned = pending
                        .get((tenant, seq))
                        .map_err(Self::queue_err)?
                        .map(|v| v.value().to_string());
                    if assigned.as_deref() == Some(consumer) {
                        picked.push((seq, value.value().to_vec()));
                        if picked.len() >= batch {
                            break;
                        }
                    }
                }
            } else {
                for row in entries.range(range).map_err(Self::queue_err)? {
                    let (key, value) = row.map_err(Self::queue_err)?;
                    let seq = key.value().1;
                    let assigned = pending.get((tenant, seq)).map_err(Self::queue_err)?;
                    if assigned.is_none() {
                        picked.push((seq, value.value().to_vec()));
                        if picked.len() >= batch {
                            break;
                        }
                    }
                }
                for (seq, _) in &picked {
                    pending
                        .insert((tenant, *seq), consumer)
                        .map_err(Self::queue_err)?;
                }
            }

            picked
                .into_iter()
                .filter_map(|(seq, bytes)| {
                    match serde_json::from_slice::<IngestMessage>(&bytes) {
                        Ok(message) => Some(Delivery {
                            id: seq.to_string(),
                            message,
                        }),
                        Err(e) => {
                            tracing::warn!(seq, "dropping malformed WAL entry: {}", e);
                            None
                        }
                    }
                })
                .collect::<Vec<_>>()
        };
        txn.commit().map_err(Self::queue_err)?;
        Ok(deliveries)
    }
}

#[async_trait]
impl IngestQueue for WalQueue {
    async fn publish(&self, message: &IngestMessage) -> Result<()> {
        let db = self.db.clone();
        let message = message.clone();
        tokio::task::spawn_blocking(move || -> Result<()> {
            let bytes = serde_json::to_vec(&message)
                .map_err(|e| ArchiveError::Queue(e.to_string()))?;
            let txn = db.begin_write().map_err(WalQueue::queue_err)?;
            {
                let mut sequences = txn.open_table(SEQUENCES).map_err(WalQueue::queue_err)?;
                let next = sequences
                    .get(message.tenant_code.as_str())
                    .map_err(WalQueue::queue_err)?
                    .map(|v| v.value())
                    .unwrap_or(0);
                sequences
                    .insert(message.tenant_code.as_str(), next + 1)
                    .map_err(WalQueue::queue_err)?;
                let mut entries = txn.open_table(ENTRIES).map_err(WalQueue::queue_err)?;
                entries
                    .insert((message.tenant_code.as_str(), next), bytes.as_slice())
                    .map_err(WalQueue::queue_err)?;
            }
            txn.commit().map_err(WalQueue::queue_err)?;
            Ok(())
        })
        .await
        .map_err(|e| ArchiveError::Queue(e.to_string()))?
    }

    async fn read_batch(
        &self,
        tenant_code: &str,
        consumer: &str,
        batch: usize,
    ) -> Result<Vec<Delivery>> {
        let recovery_key = (tenant_code.to_string(), consumer.to_string());
        let deadline = Instant::now() + READ_BLOCK;
        loop {
            let recovering = !self.recovered.lock().unwrap().contains(&recovery_key);
            let db = self.db.clone();
            let tenant = tenant_code.to_string();
            let consumer_id = consumer.to_string();
            let deliveries = tokio::task::spawn_blocking(move || {
                WalQueue::poll_batch(&db, &tenant, &consumer_id, batch, recovering)
            })
            .await
            .map_err(|e| ArchiveError::Queue(e.to_string()))??;

            if !deliveries.is_empty() {
                return Ok(deliveries);
            }
            if recovering {
                // Pending backlog drained; switch to new entries.
                self.recovered.lock().unwrap().insert(recovery_key.clone());
                continue;
            }
            if Instant::now() >= deadline {
                return Ok(Vec::new());
            }
            tokio::time::sleep(Duration::from_millis(200)).await;
        }
    }

    async fn ack(&self, tenant_code: &str, deliveries: &[Delivery]) -> Result<()> {
        if deliveries.is_empty() {
            return Ok(());
        }
        let db = self.db.clone();
        let tenant = tenant_code.to_string();
        let seqs: Vec<u64> = deliveries
            .iter()
            .filter_map(|d| d.id.parse().ok())
            .collect();
        tokio::task::spawn_blocking(move || -> Result<()> {
            let txn = db.begin_write().map_err(WalQueue::queue_err)?;
            {
                let mut entries = txn.open_table(ENTRIES).map_err(WalQueue::queue_err)?;
                let mut pending = txn.open_table(PENDING).map_err(WalQueue::queue_err)?;
                for seq in &seqs {
                    entries
                        .remove((tenant.as_str(), *seq))
                        .map_err(WalQueue::queue_err)?;
                    pending
                        .remove((tenant.as_str(), *seq))
                        .map_err(WalQueue::queue_err)?;
                }
            }
            txn.commit().map_err(WalQueue::queue_err)?;
            Ok(())
        })
        .await
        .map_err(|e| ArchiveError::Queue(e.to_string()))?
    }

    async fn pending_count(&self, tenant_code: &str) -> Result<i64> {
        let db = self.db.clone();
        let tenant = tenant_code.to_string();
        tokio::task::spawn_blocking(move || -> Result<i64> {
            let txn = db.begin_read().map_err(WalQueue::queue_err)?;
            let entries = txn.open_table(ENTRIES).map_err(WalQueue::queue_err)?;
            let range = (tenant.as_str(), 0u64)..=(tenant.as_str(), u64::MAX);
            let mut count = 0i64;
            for row in entries.range(range).map_err(WalQueue::queue_err)? {
                row.map_err(WalQueue::queue_err)?;
                count += 1;
            }
            Ok(count)
        })
        .await
        .map_err(|e| ArchiveError::Queue(e.to_string()))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use tempfile::TempDir;

    fn message(tenant: &str, path: &str) -> IngestMessage {
        IngestMessage {
            file_path: path.to_string(),
            tenant_code: tenant.to_string(),
            received_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn publish_read_ack_cycle() {
        let dir = TempDir::new().unwrap();
        let queue = WalQueue::open(dir.path()).unwrap();

        queue.publish(&message("h1", "/spool/a.dcm")).await.unwrap();
        queue.publish(&message("h1", "/spool/b.dcm")).await.unwrap();
        assert_eq!(queue.pending_count("h1").await.unwrap(), 2);

        let batch = queue.read_batch("h1", "worker-0", 10).await.unwrap();
        assert_eq!(batch.len(), 2);
        assert_eq!(batch[0].message.file_path, "/spool/a.dcm");

        queue.ack("h1", &batch).await.unwrap();
        assert_eq!(queue.pending_count("h1").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn unacked_batch_redelivers_to_same_consumer_after_restart() {
        let dir = TempDir::new().unwrap();
        {
            let queue = WalQueue::open(dir.path()).unwrap();
            queue.publish(&message("h1", "/spool/a.dcm")).await.unwrap();
            let batch = queue.read_batch("h1", "worker-0", 10).await.unwrap();
            assert_eq!(batch.len(), 1);
            // Crash: no ack.
        }
        let queue = WalQueue::open(dir.path()).unwrap();
        let redelivered = queue.read_batch("h1", "worker-0", 10).await.unwrap();
        assert_eq!(redelivered.len(), 1);
        assert_eq!(redelivered[0].message.file_path, "/spool/a.dcm");
        queue.ack("h1", &redelivered).await.unwrap();
        assert_eq!(queue.pending_count("h1").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn tenants_are_isolated() {
        let dir = TempDir::new().unwrap();
        let queue = WalQueue::open(dir.path()).unwrap();
        queue.publish(&message("h1", "/spool/a.dcm")).await.unwrap();
        queue.publish(&message("h2", "/spool/b.dcm")).await.unwrap();

        let h1 = queue.read_batch("h1", "w", 10).await.unwrap();
        assert_eq!(h1.len(), 1);
        assert_eq!(h1[0].message.tenant_code, "h1");
        assert_eq!(queue.pending_count("h2").await.unwrap(), 1);
    }
}
