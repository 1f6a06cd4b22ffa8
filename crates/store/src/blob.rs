//! Image blob storage.

use std::path::{Component, Path, PathBuf};

use dw_domain::error::{Error, Result};

#[async_trait::async_trait]
pub trait BlobStore: Send + Sync {
    /// Store `bytes` at `path` (overwriting) and return its public URL.
    async fn put(&self, path: &str, bytes: Vec<u8>, content_type: &str) -> Result<String>;
}

/// Writes blobs under a root directory that the HTTP layer serves
/// statically at `public_base`.
pub struct FsBlobStore {
    root: PathBuf,
    public_base: String,
}

impl FsBlobStore {
    pub fn new(root: impl Into<PathBuf>, public_base: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            public_base: public_base.into().trim_end_matches('/').to_string(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Map a blob path to a file under the root, refusing anything that
    /// could escape it.
    fn resolve(&self, path: &str) -> Result<PathBuf> {
        let rel = Path::new(path);
        let clean = rel
            .components()
            .all(|c| matches!(c, Component::Normal(_)));
        if path.is_empty() || !clean {
            return Err(Error::Storage(format!("invalid blob path: {path}")));
        }
        Ok(self.root.join(rel))
    }
}

#[async_trait::async_trait]
impl BlobStore for FsBlobStore {
    async fn put(&self, path: &str, bytes: Vec<u8>, content_type: &str) -> Result<String> {
        let target = self.resolve(path)?;
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&target, &bytes).await?;
        tracing::debug!(path, bytes = bytes.len(), content_type, "blob stored");
        Ok(format!("{}/{}", self.public_base, path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn put_writes_file_and_returns_url() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsBlobStore::new(dir.path(), "/blobs/");
        let url = store
            .put("cards/d1/c1.png", b"img".to_vec(), "image/png")
            .await
            .unwrap();
        assert_eq!(url, "/blobs/cards/d1/c1.png");
        let written = std::fs::read(dir.path().join("cards/d1/c1.png")).unwrap();
        assert_eq!(written, b"img");
    }

    #[tokio::test]
    async fn rejects_traversal() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsBlobStore::new(dir.path(), "/blobs");
        assert!(store.put("../escape.png", vec![], "image/png").await.is_err());
        assert!(store.put("/abs.png", vec![], "image/png").await.is_err());
    }
}
