//! Blob stores for transcript files.

use super::{lock_error, BlobStore};
use crate::error::{PanelistError, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};
use std::sync::RwLock;
use tracing::debug;

/// Reject keys that would escape the bucket.
pub fn validate_key(bucket: &str, key: &str) -> Result<()> {
    for part in [bucket, key] {
        let path = Path::new(part);
        let escapes = path
            .components()
            .any(|c| !matches!(c, Component::Normal(_)));
        if part.is_empty() || escapes {
            return Err(PanelistError::InvalidInput(format!("Invalid blob path: {}", part)));
        }
    }
    Ok(())
}

/// Blobs as files under `root/bucket/key`.
pub struct LocalBlobStore {
    root: PathBuf,
}

impl LocalBlobStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn path(&self, bucket: &str, key: &str) -> Result<PathBuf> {
        validate_key(bucket, key)?;
        Ok(self.root.join(bucket).join(key))
    }
}

#[async_trait]
impl BlobStore for LocalBlobStore {
    async fn put(&self, bucket: &str, key: &str, data: &[u8]) -> Result<()> {
        let path = self.path(bucket, key)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| PanelistError::Blob(format!("{}: {}", parent.display(), e)))?;
        }
        tokio::fs::write(&path, data)
            .await
            .map_err(|e| PanelistError::Blob(format!("{}: {}", path.display(), e)))?;
        debug!("Wrote {} bytes to {:?}", data.len(), path);
        Ok(())
    }

    async fn get(&self, bucket: &str, key: &str) -> Result<Option<Vec<u8>>> {
        let path = self.path(bucket, key)?;
        match tokio::fs::read(&path).await {
            Ok(data) => Ok(Some(data)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(PanelistError::Blob(format!("{}: {}", path.display(), e))),
        }
    }
}

/// Blobs in a map. Counts writes so tests can check dedupe.
#[derive(Default)]
pub struct MemoryBlobStore {
    blobs: RwLock<HashMap<(String, String), Vec<u8>>>,
    writes: RwLock<usize>,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn write_count(&self) -> usize {
        self.writes.read().map(|w| *w).unwrap_or_default()
    }

    pub fn keys(&self, bucket: &str) -> Vec<String> {
        let mut keys: Vec<String> = self
            .blobs
            .read()
            .map(|b| {
                b.keys()
                    .filter(|(bk, _)| bk == bucket)
                    .map(|(_, k)| k.clone())
                    .collect()
            })
            .unwrap_or_default();
        keys.sort();
        keys
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn put(&self, bucket: &str, key: &str, data: &[u8]) -> Result<()> {
        validate_key(bucket, key)?;
        self.blobs
            .write()
            .map_err(lock_error)?
            .insert((bucket.to_string(), key.to_string()), data.to_vec());
        *self.writes.write().map_err(lock_error)? += 1;
        Ok(())
    }

    async fn get(&self, bucket: &str, key: &str) -> Result<Option<Vec<u8>>> {
        validate_key(bucket, key)?;
        Ok(self
            .blobs
            .read()
            .map_err(lock_error)?
            .get(&(bucket.to_string(), key.to_string()))
            .cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_local_blob_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalBlobStore::new(dir.path());

        store
            .put("transcripts", "p1/2025-01-01_en_x/transcript.xml", b"<Person1>hi</Person1>")
            .await
            .unwrap();
        assert!(store.exists("transcripts", "p1/2025-01-01_en_x/transcript.xml").await.unwrap());
        assert!(store.get("transcripts", "missing.xml").await.unwrap().is_none());
        assert!(dir.path().join("transcripts/p1/2025-01-01_en_x/transcript.xml").exists());
    }

    #[tokio::test]
    async fn test_keys_cannot_escape() {
        let store = MemoryBlobStore::new();
        assert!(store.put("b", "../etc/passwd", b"x").await.is_err());
        assert!(store.put("b", "/abs", b"x").await.is_err());
        assert!(store.put("", "k", b"x").await.is_err());
        store.put("b", "ok/key.xml", b"x").await.unwrap();
        assert_eq!(store.write_count(), 1);
        assert_eq!(store.keys("b"), vec!["ok/key.xml"]);
    }
}
