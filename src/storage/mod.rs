use crate::models::ProviderKind;
use async_trait::async_trait;
use bytes::Bytes;
use std::fmt::Debug;
use tokio::io::AsyncRead;

pub mod disk;
pub mod local;
pub mod object;
pub mod template;
pub mod volumes;

pub use disk::{DiskMonitor, IngestGate};
pub use local::LocalProvider;
pub use object::ObjectStoreProvider;
pub use volumes::VolumeManager;

/// Error type for storage operations. The original cause is preserved so
/// lifecycle tasks can record it verbatim.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("IO error at '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("object store error at '{path}': {source}")]
    Object {
        path: String,
        #[source]
        source: object_store::Error,
    },
    #[error("path '{0}' escapes the volume root")]
    PathTraversal(String),
    #[error("configuration error: {0}")]
    Config(String),
}

pub type StorageResult<T> = Result<T, StorageError>;

/// A byte-level reader for one stored file.
pub type ByteReader = Box<dyn AsyncRead + Send + Unpin>;

/// Capability set of a storage volume backend.
///
/// `write` is an idempotent overwrite; all paths are relative to the
/// volume root and use `/` separators regardless of platform.
#[async_trait]
pub trait StorageProvider: Send + Sync + Debug {
    fn kind(&self) -> ProviderKind;

    async fn write(&self, path: &str, bytes: Bytes) -> StorageResult<()>;

    /// Open a sequential reader over the file.
    async fn reader(&self, path: &str) -> StorageResult<ByteReader>;

    /// Read the whole file into memory. Prefer [`StorageProvider::reader`]
    /// on the retrieve path; this is for metadata-sized payloads and
    /// cross-volume copies.
    async fn read_all(&self, path: &str) -> StorageResult<Bytes>;

    async fn delete(&self, path: &str) -> StorageResult<()>;

    async fn exists(&self, path: &str) -> StorageResult<bool>;

    async fn size(&self, path: &str) -> StorageResult<i64>;

    /// Copy a file from another provider into this one.
    async fn copy_from(
        &self,
        source: &dyn StorageProvider,
        source_path: &str,
        target_path: &str,
    ) -> StorageResult<()> {
        let bytes = source.read_all(source_path).await?;
        self.write(target_path, bytes).await
    }

    /// Free bytes on the backing filesystem; `None` for object stores.
    fn available_bytes(&self) -> Option<u64> {
        None
    }

    /// Capacity of the backing filesystem; `None` for object stores.
    fn total_bytes(&self) -> Option<u64> {
        None
    }
}

/// Build a provider for a volume record.
pub fn create_provider(
    volume: &crate::models::StorageVolume,
) -> StorageResult<std::sync::Arc<dyn StorageProvider>> {
    match volume.provider_kind {
        ProviderKind::Local => Ok(std::sync::Arc::new(LocalProvider::new(&volume.base_path)?)),
        _ => Ok(std::sync::Arc::new(ObjectStoreProvider::new(volume)?)),
    }
}
