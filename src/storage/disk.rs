//! Disk-space monitor feeding the ingest accept path.
//!
//! The gate is eventually consistent (refreshed on an interval); accept
//! paths only read two atomic flags, never the filesystem.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Default)]
pub struct IngestGate {
    blocked: AtomicBool,
    critical: AtomicBool,
}

impl IngestGate {
    /// True when ingest must return 507 without touching storage.
    pub fn is_blocked(&self) -> bool {
        self.blocked.load(Ordering::Relaxed)
    }

    /// True when local volumes are treated as read-only.
    pub fn is_critical(&self) -> bool {
        self.critical.load(Ordering::Relaxed)
    }

    fn set(&self, blocked: bool, critical: bool) {
        self.blocked.store(blocked, Ordering::Relaxed);
        self.critical.store(critical, Ordering::Relaxed);
    }
}

pub struct DiskMonitor {
    path: PathBuf,
    threshold_mb: u64,
    refresh: Duration,
    gate: Arc<IngestGate>,
}

impl DiskMonitor {
    pub fn new(
        path: impl Into<PathBuf>,
        threshold_mb: u64,
        refresh: Duration,
        gate: Arc<IngestGate>,
    ) -> DiskMonitor {
        DiskMonitor {
            path: path.into(),
            threshold_mb,
            refresh,
            gate,
        }
    }

    pub async fn run(self, shutdown: CancellationToken) {
        let mut ticker = tokio::time::interval(self.refresh);
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => self.refresh_once(),
            }
        }
    }

    fn refresh_once(&self) {
        let stats = match nix::sys::statvfs::statvfs(&self.path) {
            Ok(s) => s,
            Err(e) => {
                tracing::error!(path = %self.path.display(), "statvfs failed: {}", e);
                return;
            }
        };
        let free = stats.blocks_available() as u64 * stats.fragment_size() as u64;
        let total = stats.blocks() as u64 * stats.fragment_size() as u64;
        if total == 0 {
            return;
        }
        let free_pct = free * 100 / total;
        let below_absolute = free < self.threshold_mb * 1024 * 1024;

        let critical = free_pct < 5;
        let blocked = critical || free_pct < 10 || below_absolute;

        let was_blocked = self.gate.is_blocked();
        self.gate.set(blocked, critical);

        if critical {
            tracing::error!(free_pct, "disk critically low: ingest blocked, local volumes read-only");
        } else if blocked && !was_blocked {
            tracing::warn!(free_pct, "disk low: ingest blocked");
        } else if !blocked && was_blocked {
            tracing::info!(free_pct, "disk recovered: ingest unblocked");
        } else if free_pct < 20 {
            tracing::warn!(free_pct, "disk space below 20%");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gate_defaults_open() {
        let gate = IngestGate::default();
        assert!(!gate.is_blocked());
        assert!(!gate.is_critical());
    }

    #[test]
    fn gate_transitions() {
        let gate = IngestGate::default();
        gate.set(true, false);
        assert!(gate.is_blocked());
        assert!(!gate.is_critical());
        gate.set(true, true);
        assert!(gate.is_critical());
        gate.set(false, false);
        assert!(!gate.is_blocked());
    }
}
