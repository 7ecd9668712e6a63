//! Blob storage backends
//!
//! Large artifacts are addressed as `(storage_type, storage_path,
//! file_name)` and resolved through a backend registry. The default map
//! routes `local` to a filesystem backend rooted at a configured base
//! directory.

use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Result, StoreError};

/// Default storage type of the local filesystem backend
pub const LOCAL_STORAGE_TYPE: &str = "local";

/// Address of one stored blob
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlobAddress {
    pub storage_type: String,
    pub storage_path: String,
    pub file_name: String,
}

impl BlobAddress {
    pub fn local(storage_path: impl Into<String>, file_name: impl Into<String>) -> Self {
        Self {
            storage_type: LOCAL_STORAGE_TYPE.to_string(),
            storage_path: storage_path.into(),
            file_name: file_name.into(),
        }
    }
}

/// One storage backend: upload, download, delete
#[async_trait]
pub trait StorageBackend: Send + Sync {
    async fn put(&self, storage_path: &str, file_name: &str, data: &[u8]) -> Result<()>;

    async fn get(&self, storage_path: &str, file_name: &str) -> Result<Vec<u8>>;

    async fn delete(&self, storage_path: &str, file_name: &str) -> Result<()>;
}

/// Filesystem backend rooted at a base directory
#[derive(Debug, Clone)]
pub struct LocalStorageBackend {
    base_dir: PathBuf,
}

impl LocalStorageBackend {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self { base_dir: base_dir.into() }
    }

    /// Resolve an address under the base directory, rejecting absolute
    /// paths and `..` traversal
    fn resolve(&self, storage_path: &str, file_name: &str) -> Result<PathBuf> {
        let relative = Path::new(storage_path).join(file_name);
        for component in relative.components() {
            match component {
                Component::Normal(_) | Component::CurDir => {}
                _ => return Err(StoreError::InvalidPath(relative.display().to_string())),
            }
        }
        Ok(self.base_dir.join(relative))
    }
}

#[async_trait]
impl StorageBackend for LocalStorageBackend {
    async fn put(&self, storage_path: &str, file_name: &str, data: &[u8]) -> Result<()> {
        let path = self.resolve(storage_path, file_name)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&path, data).await?;
        debug!(path = %path.display(), bytes = data.len(), "Stored blob");
        Ok(())
    }

    async fn get(&self, storage_path: &str, file_name: &str) -> Result<Vec<u8>> {
        let path = self.resolve(storage_path, file_name)?;
        Ok(tokio::fs::read(&path).await?)
    }

    async fn delete(&self, storage_path: &str, file_name: &str) -> Result<()> {
        let path = self.resolve(storage_path, file_name)?;
        tokio::fs::remove_file(&path).await?;
        debug!(path = %path.display(), "Deleted blob");
        Ok(())
    }
}

/// Maps storage types to backends
#[derive(Clone, Default)]
pub struct BackendRegistry {
    backends: HashMap<String, Arc<dyn StorageBackend>>,
}

impl BackendRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the default `local` filesystem backend
    pub fn with_local(base_dir: impl Into<PathBuf>) -> Self {
        let mut registry = Self::new();
        registry.register(LOCAL_STORAGE_TYPE, Arc::new(LocalStorageBackend::new(base_dir)));
        registry
    }

    pub fn register(&mut self, storage_type: impl Into<String>, backend: Arc<dyn StorageBackend>) {
        self.backends.insert(storage_type.into(), backend);
    }

    pub fn resolve(&self, storage_type: &str) -> Result<&Arc<dyn StorageBackend>> {
        self.backends
            .get(storage_type)
            .ok_or_else(|| StoreError::UnknownBackend(storage_type.to_string()))
    }

    pub async fn upload(&self, address: &BlobAddress, data: &[u8]) -> Result<()> {
        self.resolve(&address.storage_type)?
            .put(&address.storage_path, &address.file_name, data)
            .await
    }

    pub async fn download(&self, address: &BlobAddress) -> Result<Vec<u8>> {
        self.resolve(&address.storage_type)?
            .get(&address.storage_path, &address.file_name)
            .await
    }

    pub async fn delete(&self, address: &BlobAddress) -> Result<()> {
        self.resolve(&address.storage_type)?
            .delete(&address.storage_path, &address.file_name)
            .await
    }
}

impl std::fmt::Debug for BackendRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackendRegistry")
            .field("storage_types", &self.backends.keys().collect::<Vec<_>>())
            .finish()
    }
}
