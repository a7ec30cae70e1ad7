use crate::error::Result;
use crate::models::StorageVolume;
use crate::Db;

const VOLUME_COLUMNS: &str = "id, code, provider_kind, base_path, tier, status, priority, \
     path_template, bucket, endpoint, region, access_key, secret_key";

pub async fn list(db: &Db) -> Result<Vec<StorageVolume>> {
    let volumes = sqlx::query_as::<_, StorageVolume>(&format!(
        "SELECT {} FROM public.storage_volume ORDER BY id",
        VOLUME_COLUMNS
    ))
    .fetch_all(db.pool())
    .await?;
    Ok(volumes)
}

/// Admin create. The id is assigned by the database and immutable after.
pub async fn insert(db: &Db, volume: &StorageVolume) -> Result<StorageVolume> {
    let created = sqlx::query_as::<_, StorageVolume>(&format!(
        "INSERT INTO public.storage_volume \
         (code, provider_kind, base_path, tier, status, priority, path_template, \
          bucket, endpoint, region, access_key, secret_key) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12) \
         RETURNING {}",
        VOLUME_COLUMNS
    ))
    .bind(&volume.code)
    .bind(volume.provider_kind)
    .bind(&volume.base_path)
    .bind(volume.tier)
    .bind(volume.status)
    .bind(volume.priority)
    .bind(&volume.path_template)
    .bind(&volume.bucket)
    .bind(&volume.endpoint)
    .bind(&volume.region)
    .bind(&volume.access_key)
    .bind(&volume.secret_key)
    .fetch_one(db.pool())
    .await?;
    Ok(created)
}

/// Admin update of mutable fields (tier, status, priority, template).
pub async fn update(db: &Db, volume: &StorageVolume) -> Result<StorageVolume> {
    let updated = sqlx::query_as::<_, StorageVolume>(&format!(
        "UPDATE public.storage_volume \
         SET tier = $2, status = $3, priority = $4, path_template = $5 \
         WHERE id = $1 \
         RETURNING {}",
        VOLUME_COLUMNS
    ))
    .bind(volume.id)
    .bind(volume.tier)
    .bind(volume.status)
    .bind(volume.priority)
    .bind(&volume.path_template)
    .fetch_one(db.pool())
    .await?;
    Ok(updated)
}
