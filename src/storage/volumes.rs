//! In-memory registry of storage volumes.
//!
//! The registry snapshot (volumes grouped by tier, sorted by priority) is
//! replaced atomically on reload; concurrent readers see either the old or
//! the new index, never a torn view. Providers are constructed once per
//! volume and cached, since object-store providers own connection pools.

use crate::error::{ArchiveError, Result};
use crate::models::{ProviderKind, StorageVolume, VolumeStatus, VolumeTier};
use crate::storage::template::{PathTemplate, TemplateCache};
use crate::storage::{create_provider, IngestGate, StorageProvider};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};

/// Free-space headroom required before a local volume accepts writes.
const WRITE_HEADROOM_BYTES: u64 = 1 << 30;

#[derive(Debug, Default)]
struct TierIndex {
    by_tier: HashMap<VolumeTier, Vec<StorageVolume>>,
    by_id: HashMap<i64, StorageVolume>,
}

impl TierIndex {
    fn build(mut volumes: Vec<StorageVolume>) -> TierIndex {
        volumes.sort_by(|a, b| b.priority.cmp(&a.priority).then(a.id.cmp(&b.id)));
        let mut index = TierIndex::default();
        for volume in volumes {
            index.by_id.insert(volume.id, volume.clone());
            index.by_tier.entry(volume.tier).or_default().push(volume);
        }
        index
    }
}

pub struct VolumeManager {
    index: RwLock<Arc<TierIndex>>,
    providers: Mutex<HashMap<i64, (ProviderFingerprint, Arc<dyn StorageProvider>)>>,
    templates: TemplateCache,
    default_template: String,
    gate: Arc<IngestGate>,
}

/// Connection-relevant fields of a volume; a provider is only rebuilt on
/// reload when these changed.
#[derive(Debug, Clone, PartialEq, Eq)]
struct ProviderFingerprint {
    kind: ProviderKind,
    base_path: String,
    bucket: Option<String>,
    endpoint: Option<String>,
    region: Option<String>,
    access_key: Option<String>,
    secret_key: Option<String>,
}

impl ProviderFingerprint {
    fn of(volume: &StorageVolume) -> ProviderFingerprint {
        ProviderFingerprint {
            kind: volume.provider_kind,
            base_path: volume.base_path.clone(),
            bucket: volume.bucket.clone(),
            endpoint: volume.endpoint.clone(),
            region: volume.region.clone(),
            access_key: volume.access_key.clone(),
            secret_key: volume.secret_key.clone(),
        }
    }
}

impl VolumeManager {
    pub fn new(
        volumes: Vec<StorageVolume>,
        default_template: String,
        gate: Arc<IngestGate>,
    ) -> VolumeManager {
        VolumeManager {
            index: RwLock::new(Arc::new(TierIndex::build(volumes))),
            providers: Mutex::new(HashMap::new()),
            templates: TemplateCache::new(),
            default_template,
            gate,
        }
    }

    /// Replace the registry with a fresh volume list. Providers whose
    /// connection config is unchanged survive the reload; compiled path
    /// templates are invalidated.
    pub fn reload(&self, volumes: Vec<StorageVolume>) {
        let fresh = Arc::new(TierIndex::build(volumes));
        {
            let mut providers = self.providers.lock().unwrap();
            providers.retain(|id, (fingerprint, _)| {
                fresh
                    .by_id
                    .get(id)
                    .map(|v| ProviderFingerprint::of(v) == *fingerprint)
                    .unwrap_or(false)
            });
        }
        *self.index.write().unwrap() = fresh;
        self.templates.clear();
        tracing::info!("volume registry reloaded");
    }

    pub fn volume(&self, volume_id: i64) -> Result<StorageVolume> {
        self.index
            .read()
            .unwrap()
            .by_id
            .get(&volume_id)
            .cloned()
            .ok_or(ArchiveError::UnknownVolume(volume_id))
    }

    pub fn volumes(&self) -> Vec<StorageVolume> {
        self.index.read().unwrap().by_id.values().cloned().collect()
    }

    /// Highest-priority ACTIVE volume of the tier with enough free space.
    pub fn active_write_volume(&self, tier: VolumeTier) -> Result<StorageVolume> {
        let index = self.index.read().unwrap().clone();
        let candidates = match index.by_tier.get(&tier) {
            Some(list) => list,
            None => return Err(ArchiveError::NoWriteVolume { tier }),
        };
        for volume in candidates {
            if volume.status != VolumeStatus::Active {
                continue;
            }
            if volume.provider_kind == ProviderKind::Local {
                // Critical disk pressure flips local volumes read-only.
                if self.gate.is_critical() {
                    continue;
                }
                let provider = self.provider(volume.id)?;
                if let Some(free) = provider.available_bytes() {
                    if free < WRITE_HEADROOM_BYTES {
                        tracing::warn!(
                            volume = %volume.code,
                            free_bytes = free,
                            "skipping write volume below headroom"
                        );
                        continue;
                    }
                }
            }
            return Ok(volume.clone());
        }
        Err(ArchiveError::NoWriteVolume { tier })
    }

    /// Cached provider for a volume.
    pub fn provider(&self, volume_id: i64) -> Result<Arc<dyn StorageProvider>> {
        {
            let providers = self.providers.lock().unwrap();
            if let Some((_, provider)) = providers.get(&volume_id) {
                return Ok(provider.clone());
            }
        }
        let volume = self.volume(volume_id)?;
        let provider = create_provider(&volume)?;
        let mut providers = self.providers.lock().unwrap();
        let entry = providers
            .entry(volume_id)
            .or_insert_with(|| (ProviderFingerprint::of(&volume), provider));
        Ok(entry.1.clone())
    }

    /// Compiled path template for a volume (its override or the default).
    pub fn template_for(&self, volume: &StorageVolume) -> Result<Arc<PathTemplate>> {
        let source = volume
            .path_template
            .as_deref()
            .unwrap_or(&self.default_template);
        self.templates
            .get_or_compile(source)
            .map_err(|e| ArchiveError::Config(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::disk::IngestGate;

    fn local_volume(id: i64, tier: VolumeTier, status: VolumeStatus, priority: i32) -> StorageVolume {
        StorageVolume {
            id,
            code: format!("vol-{}", id),
            provider_kind: ProviderKind::Local,
            base_path: std::env::temp_dir()
                .join(format!("spax-volume-{}", id))
                .display()
                .to_string(),
            tier,
            status,
            priority,
            path_template: None,
            bucket: None,
            endpoint: None,
            region: None,
            access_key: None,
            secret_key: None,
        }
    }

    fn manager(volumes: Vec<StorageVolume>) -> VolumeManager {
        VolumeManager::new(
            volumes,
            "{00080018,hash}".to_string(),
            Arc::new(IngestGate::default()),
        )
    }

    #[test]
    fn picks_highest_priority_active_volume() {
        let manager = manager(vec![
            local_volume(1, VolumeTier::Hot, VolumeStatus::Active, 10),
            local_volume(2, VolumeTier::Hot, VolumeStatus::Active, 50),
            local_volume(3, VolumeTier::Hot, VolumeStatus::ReadOnly, 90),
        ]);
        let picked = manager.active_write_volume(VolumeTier::Hot).unwrap();
        assert_eq!(picked.id, 2);
    }

    #[test]
    fn no_write_volume_when_tier_empty() {
        let manager = manager(vec![local_volume(
            1,
            VolumeTier::Hot,
            VolumeStatus::Active,
            10,
        )]);
        let err = manager.active_write_volume(VolumeTier::Warm).unwrap_err();
        assert!(matches!(
            err,
            ArchiveError::NoWriteVolume {
                tier: VolumeTier::Warm
            }
        ));
    }

    #[test]
    fn unknown_volume_is_an_error() {
        let manager = manager(vec![]);
        assert!(matches!(
            manager.provider(404).unwrap_err(),
            ArchiveError::UnknownVolume(404)
        ));
    }

    #[test]
    fn reload_swaps_index_and_keeps_unchanged_providers() {
        let manager = manager(vec![local_volume(
            1,
            VolumeTier::Hot,
            VolumeStatus::Active,
            10,
        )]);
        let before = manager.provider(1).unwrap();

        let mut changed = local_volume(1, VolumeTier::Warm, VolumeStatus::Active, 10);
        changed.base_path.clone_from(&manager.volume(1).unwrap().base_path);
        manager.reload(vec![changed]);

        // Tier moved but the connection config is identical: same provider.
        let after = manager.provider(1).unwrap();
        assert!(Arc::ptr_eq(&before, &after));
        assert_eq!(manager.volume(1).unwrap().tier, VolumeTier::Warm);
    }
}
