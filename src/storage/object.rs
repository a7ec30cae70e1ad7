use crate::models::{ProviderKind, StorageVolume};
use crate::storage::{ByteReader, StorageError, StorageProvider, StorageResult};
use async_trait::async_trait;
use bytes::Bytes;
use futures_util::TryStreamExt;
use object_store::aws::AmazonS3Builder;
use object_store::path::Path as ObjectPath;
use object_store::ObjectStore;
use std::sync::Arc;

/// Volume backed by an S3-compatible object store.
///
/// Holds the store client (and its connection pool) for the lifetime of
/// the provider; the volume manager caches providers per volume id.
pub struct ObjectStoreProvider {
    kind: ProviderKind,
    store: Arc<dyn ObjectStore>,
    prefix: String,
}

impl std::fmt::Debug for ObjectStoreProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObjectStoreProvider")
            .field("kind", &self.kind)
            .field("prefix", &self.prefix)
            .finish()
    }
}

impl ObjectStoreProvider {
    /// All object-store kinds are reached through the S3 wire protocol;
    /// non-AWS targets (MinIO, GCS/Azure interop gateways) supply a custom
    /// endpoint on the volume record.
    pub fn new(volume: &StorageVolume) -> StorageResult<Self> {
        let bucket = volume
            .bucket
            .as_deref()
            .ok_or_else(|| StorageError::Config(format!("volume {} has no bucket", volume.code)))?;

        let mut builder = AmazonS3Builder::new()
            .with_bucket_name(bucket)
            .with_region(volume.region.as_deref().unwrap_or("us-east-1"));
        if let Some(endpoint) = volume.endpoint.as_deref() {
            // Custom endpoints serve MinIO-style deployments, typically http.
            builder = builder.with_endpoint(endpoint).with_allow_http(true);
        }
        if let (Some(key), Some(secret)) = (volume.access_key.as_deref(), volume.secret_key.as_deref())
        {
            builder = builder
                .with_access_key_id(key)
                .with_secret_access_key(secret);
        }
        let store = builder
            .build()
            .map_err(|e| StorageError::Config(format!("volume {}: {}", volume.code, e)))?;

        Ok(ObjectStoreProvider {
            kind: volume.provider_kind,
            store: Arc::new(store),
            prefix: volume.base_path.trim_matches('/').to_string(),
        })
    }

    fn key(&self, path: &str) -> ObjectPath {
        if self.prefix.is_empty() {
            ObjectPath::from(path)
        } else {
            ObjectPath::from(format!("{}/{}", self.prefix, path))
        }
    }

    fn obj_err(path: &str, source: object_store::Error) -> StorageError {
        StorageError::Object {
            path: path.to_string(),
            source,
        }
    }
}

#[async_trait]
impl StorageProvider for ObjectStoreProvider {
    fn kind(&self) -> ProviderKind {
        self.kind
    }

    async fn write(&self, path: &str, bytes: Bytes) -> StorageResult<()> {
        self.store
            .put(&self.key(path), bytes)
            .await
            .map_err(|e| Self::obj_err(path, e))
    }

    async fn reader(&self, path: &str) -> StorageResult<ByteReader> {
        let result = self
            .store
            .get(&self.key(path))
            .await
            .map_err(|e| Self::obj_err(path, e))?;
        let stream = result
            .into_stream()
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e));
        Ok(Box::new(tokio_util::io::StreamReader::new(stream)))
    }

    async fn read_all(&self, path: &str) -> StorageResult<Bytes> {
        let result = self
            .store
            .get(&self.key(path))
            .await
            .map_err(|e| Self::obj_err(path, e))?;
        result.bytes().await.map_err(|e| Self::obj_err(path, e))
    }

    async fn delete(&self, path: &str) -> StorageResult<()> {
        self.store
            .delete(&self.key(path))
            .await
            .map_err(|e| Self::obj_err(path, e))
    }

    async fn exists(&self, path: &str) -> StorageResult<bool> {
        match self.store.head(&self.key(path)).await {
            Ok(_) => Ok(true),
            Err(object_store::Error::NotFound { .. }) => Ok(false),
            Err(e) => Err(Self::obj_err(path, e)),
        }
    }

    async fn size(&self, path: &str) -> StorageResult<i64> {
        let meta = self
            .store
            .head(&self.key(path))
            .await
            .map_err(|e| Self::obj_err(path, e))?;
        Ok(meta.size as i64)
    }
}
