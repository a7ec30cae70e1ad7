//! Per-series metadata projection: a DICOM JSON array covering every
//! instance of a series (pixel data excluded), stored as a blob next to
//! the instances so one GET serves what would otherwise be N header
//! parses per viewer request.

use crate::cache::{Caches, SERIES_METADATA_LOOKUP};
use crate::db::locations;
use crate::error::{ArchiveError, Result};
use crate::storage::VolumeManager;
use crate::tenancy::TenantCtx;
use crate::Db;
use bytes::Bytes;
use chrono::NaiveDate;
use std::io::Cursor;
use std::sync::Arc;

/// Storage path of a series' projection file, under the tenant prefix on
/// the same volume as the series' instances.
pub fn metadata_path(tenant_code: &str, series_uid: &str) -> String {
    let head = series_uid.get(0..2).unwrap_or("xx");
    let mid = series_uid.get(2..4).unwrap_or("xx");
    format!(
        "{}/series-meta/{}/{}/{}.json",
        tenant_code, head, mid, series_uid
    )
}

pub struct MetadataService {
    db: Db,
    volumes: Arc<VolumeManager>,
    caches: Caches,
}

impl MetadataService {
    pub fn new(db: Db, volumes: Arc<VolumeManager>, caches: Caches) -> MetadataService {
        MetadataService {
            db,
            volumes,
            caches,
        }
    }

    /// Build the projection in memory, without persisting it. Instances
    /// are emitted in instance-number order.
    pub async fn build_json(
        &self,
        tenant: &TenantCtx,
        series_id: i64,
        created_date: NaiveDate,
    ) -> Result<Vec<serde_json::Value>> {
        let files = {
            let mut conn = self.db.tenant_conn(tenant).await?;
            locations::list_series_files(&mut conn, series_id, created_date).await?
        };
        let mut items = Vec::with_capacity(files.len());
        for file in &files {
            let provider = self.volumes.provider(file.volume_id)?;
            let bytes = provider.read_all(&file.storage_path).await?;
            let parsed = tokio::task::spawn_blocking(move || {
                dicom_codec::parse_header(Cursor::new(bytes))
            })
            .await
            .map_err(|e| ArchiveError::Cache(e.to_string()))??;
            items.push(dicom_codec::json::dataset_to_json(&parsed.object)?);
        }
        Ok(items)
    }

    /// Build, persist on the series' home volume, record the pointer and
    /// evict the lookup cache. Returns the stored payload.
    pub async fn rebuild(
        &self,
        tenant: &TenantCtx,
        series_id: i64,
        created_date: NaiveDate,
        series_uid: &str,
    ) -> Result<Bytes> {
        let items = self.build_json(tenant, series_id, created_date).await?;
        let payload = Bytes::from(serde_json::to_vec(&items).map_err(|e| {
            ArchiveError::Cache(format!("metadata projection encode failed: {}", e))
        })?);

        let home_volume = {
            let mut conn = self.db.tenant_conn(tenant).await?;
            let pointer = locations::load_series_metadata_pointer(&mut conn, series_uid).await?;
            pointer.and_then(|p| p.home_volume_id)
        };
        let Some(volume_id) = home_volume else {
            // Series with no indexed instances: nothing to persist.
            return Ok(payload);
        };

        let path = metadata_path(&tenant.code, series_uid);
        let provider = self.volumes.provider(volume_id)?;
        provider.write(&path, payload.clone()).await?;

        {
            let mut conn = self.db.tenant_conn(tenant).await?;
            locations::set_series_metadata_pointer(&mut conn, series_id, Some(volume_id), Some(&path))
                .await?;
        }
        self.caches
            .invalidate(
                &SERIES_METADATA_LOOKUP,
                &Caches::tenant_key(&tenant.code, series_uid),
            )
            .await;
        tracing::debug!(tenant = %tenant.code, series_uid, "series metadata projection rebuilt");
        Ok(payload)
    }

    /// Fire-and-forget rebuild, used after ingest commits and after a
    /// migration moves a whole series.
    pub fn spawn_rebuild(
        self: &Arc<Self>,
        tenant: TenantCtx,
        series_id: i64,
        created_date: NaiveDate,
        series_uid: String,
    ) {
        let service = self.clone();
        tokio::spawn(async move {
            if let Err(e) = service
                .rebuild(&tenant, series_id, created_date, &series_uid)
                .await
            {
                tracing::warn!(
                    tenant = %tenant.code,
                    series_uid,
                    "async metadata rebuild failed: {}",
                    e
                );
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metadata_path_shards_by_uid_prefix() {
        assert_eq!(
            metadata_path("h1", "1.2.840.4711"),
            "h1/series-meta/1./2./1.2.840.4711.json"
        );
    }

    #[test]
    fn metadata_path_tolerates_short_uids() {
        assert_eq!(metadata_path("h1", "1"), "h1/series-meta/xx/xx/1.json");
    }
}
