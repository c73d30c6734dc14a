//! Filesystem-backed object storage.

use super::{ObjectStorage, StorageError, StorageResult};
use async_trait::async_trait;
use std::path::{Component, Path, PathBuf};
use tokio::fs;
use tracing::debug;

/// Objects stored as files under `<root>/<bucket>/<key>`.
#[derive(Debug, Clone)]
pub struct LocalObjectStorage {
    root: PathBuf,
}

impl LocalObjectStorage {
    /// Create a store rooted at `root`.
    ///
    /// # Errors
    ///
    /// Returns error if the root directory cannot be created.
    pub async fn new(root: impl Into<PathBuf>) -> StorageResult<Self> {
        let root = root.into();
        fs::create_dir_all(&root).await?;
        Ok(Self { root })
    }

    /// Local path of an object.
    ///
    /// # Errors
    ///
    /// Returns error if the bucket or key is not a plain relative path.
    pub fn object_path(&self, bucket: &str, key: &str) -> StorageResult<PathBuf> {
        let mut path = self.root.clone();
        for part in [bucket, key] {
            let relative = Path::new(part);
            if part.is_empty() || !relative.components().all(|c| matches!(c, Component::Normal(_))) {
                return Err(StorageError::InvalidKey(format!("{bucket}/{key}")));
            }
            path.push(relative);
        }
        Ok(path)
    }
}

#[async_trait]
impl ObjectStorage for LocalObjectStorage {
    async fn put_object(&self, bucket: &str, key: &str, content_type: &str, data: Vec<u8>) -> StorageResult<()> {
        let path = self.object_path(bucket, key)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        let size = data.len();
        fs::write(&path, data).await?;
        debug!(bucket, key, content_type, size, "Object stored");
        Ok(())
    }

    async fn get_object_to_file(&self, bucket: &str, key: &str, path: &Path) -> StorageResult<bool> {
        let source = self.object_path(bucket, key)?;
        if !fs::try_exists(&source).await? {
            return Ok(false);
        }
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        fs::copy(&source, path).await?;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_put_then_download() {
        let dir = TempDir::new().unwrap();
        let storage = LocalObjectStorage::new(dir.path().join("objects")).await.unwrap();

        storage
            .put_object("engine-public", "documents/abc", "application/pdf", b"%PDF".to_vec())
            .await
            .unwrap();

        let target = dir.path().join("out/abc.pdf");
        assert!(storage
            .get_object_to_file("engine-public", "documents/abc", &target)
            .await
            .unwrap());
        assert_eq!(std::fs::read(&target).unwrap(), b"%PDF");
    }

    #[tokio::test]
    async fn test_missing_object_reports_not_found() {
        let dir = TempDir::new().unwrap();
        let storage = LocalObjectStorage::new(dir.path()).await.unwrap();
        let found = storage
            .get_object_to_file("engine-public", "nope", &dir.path().join("x"))
            .await
            .unwrap();
        assert!(!found);
    }

    #[tokio::test]
    async fn test_rejects_keys_escaping_bucket() {
        let dir = TempDir::new().unwrap();
        let storage = LocalObjectStorage::new(dir.path()).await.unwrap();
        let result = storage
            .put_object("engine-public", "../../etc/passwd", "text/plain", Vec::new())
            .await;
        assert!(matches!(result, Err(StorageError::InvalidKey(_))));
    }
}
