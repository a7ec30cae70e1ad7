use crate::models::ProviderKind;
use crate::storage::{ByteReader, StorageError, StorageProvider, StorageResult};
use async_trait::async_trait;
use bytes::Bytes;
use std::path::{Component, Path, PathBuf};

/// Volume backed by a rooted directory on the local filesystem.
///
/// Every relative path is checked against traversal before it touches the
/// filesystem: any path that does not descend from the root is refused.
#[derive(Debug, Clone)]
pub struct LocalProvider {
    root: PathBuf,
}

impl LocalProvider {
    pub fn new<P: AsRef<Path>>(root: P) -> StorageResult<Self> {
        let root = root.as_ref().to_path_buf();
        if !root.exists() {
            std::fs::create_dir_all(&root).map_err(|e| StorageError::Io {
                path: root.display().to_string(),
                source: e,
            })?;
        }
        Ok(LocalProvider { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve a relative path under the root, rejecting traversal.
    fn resolve(&self, path: &str) -> StorageResult<PathBuf> {
        let rel = Path::new(path);
        if rel.is_absolute() {
            return Err(StorageError::PathTraversal(path.to_string()));
        }
        for component in rel.components() {
            match component {
                Component::Normal(_) => {}
                _ => return Err(StorageError::PathTraversal(path.to_string())),
            }
        }
        Ok(self.root.join(rel))
    }

    fn io_err(path: &str, source: std::io::Error) -> StorageError {
        StorageError::Io {
            path: path.to_string(),
            source,
        }
    }
}

#[async_trait]
impl StorageProvider for LocalProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Local
    }

    async fn write(&self, path: &str, bytes: Bytes) -> StorageResult<()> {
        let full = self.resolve(path)?;
        if let Some(parent) = full.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| Self::io_err(path, e))?;
        }
        tokio::fs::write(&full, &bytes)
            .await
            .map_err(|e| Self::io_err(path, e))
    }

    async fn reader(&self, path: &str) -> StorageResult<ByteReader> {
        let full = self.resolve(path)?;
        let file = tokio::fs::File::open(&full)
            .await
            .map_err(|e| Self::io_err(path, e))?;
        Ok(Box::new(file))
    }

    async fn read_all(&self, path: &str) -> StorageResult<Bytes> {
        let full = self.resolve(path)?;
        let data = tokio::fs::read(&full)
            .await
            .map_err(|e| Self::io_err(path, e))?;
        Ok(Bytes::from(data))
    }

    async fn delete(&self, path: &str) -> StorageResult<()> {
        let full = self.resolve(path)?;
        tokio::fs::remove_file(&full)
            .await
            .map_err(|e| Self::io_err(path, e))
    }

    async fn exists(&self, path: &str) -> StorageResult<bool> {
        let full = self.resolve(path)?;
        Ok(tokio::fs::try_exists(&full)
            .await
            .map_err(|e| Self::io_err(path, e))?)
    }

    async fn size(&self, path: &str) -> StorageResult<i64> {
        let full = self.resolve(path)?;
        let meta = tokio::fs::metadata(&full)
            .await
            .map_err(|e| Self::io_err(path, e))?;
        Ok(meta.len() as i64)
    }

    fn available_bytes(&self) -> Option<u64> {
        nix::sys::statvfs::statvfs(&self.root)
            .ok()
            .map(|s| s.blocks_available() as u64 * s.fragment_size() as u64)
    }

    fn total_bytes(&self) -> Option<u64> {
        nix::sys::statvfs::statvfs(&self.root)
            .ok()
            .map(|s| s.blocks() as u64 * s.fragment_size() as u64)
    }
}
