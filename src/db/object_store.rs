//! Blob storage for source PDFs and extracted images.
//!
//! The trait mirrors the provider-enum pattern used for the vector index and
//! metadata store: one small abstraction, one real backend. Object storage is
//! a thin external collaborator here, so only a local-filesystem backend
//! ships — it is enough to exercise every pipeline stage end to end, and a
//! future S3-backed implementation only needs to satisfy `ObjectStore`.

use crate::types::{AppError, Result};
use async_trait::async_trait;
use sha2::{Digest, Sha256};
use std::path::PathBuf;

/// `{bucket}/pdfs/{workspace_id}/{document_id}.pdf` and
/// `{bucket}/images/{workspace_id}/{document_id}/{image_id}.{ext}` URI layout.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn put_pdf(&self, workspace_id: &str, document_id: &str, bytes: &[u8]) -> Result<String>;
    async fn put_image(&self, workspace_id: &str, document_id: &str, image_id: &str, ext: &str, bytes: &[u8]) -> Result<String>;
    async fn get(&self, uri: &str) -> Result<Vec<u8>>;
    async fn delete(&self, uri: &str) -> Result<()>;
    /// A URL a caller outside the process can fetch the object from.
    fn public_uri(&self, storage_uri: &str) -> String;
}

/// Sha-256 hex digest, used for image content-hash dedup before a put.
pub fn content_hash(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

/// Default backend: objects live under a root directory on local disk.
pub struct LocalObjectStore {
    base_path: PathBuf,
    bucket: String,
    public_base_url: Option<String>,
}

impl LocalObjectStore {
    pub fn new(base_path: impl Into<PathBuf>, bucket: impl Into<String>, public_base_url: Option<String>) -> Self {
        Self {
            base_path: base_path.into(),
            bucket: bucket.into(),
            public_base_url,
        }
    }

    fn full_path(&self, relative: &str) -> PathBuf {
        self.base_path.join(relative)
    }

    async fn write(&self, relative_uri: &str, bytes: &[u8]) -> Result<String> {
        let path = self.full_path(relative_uri);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| AppError::ObjectStore(format!("failed to create directory {}: {e}", parent.display())))?;
        }
        tokio::fs::write(&path, bytes)
            .await
            .map_err(|e| AppError::ObjectStore(format!("failed to write {}: {e}", path.display())))?;
        Ok(relative_uri.to_string())
    }
}

#[async_trait]
impl ObjectStore for LocalObjectStore {
    async fn put_pdf(&self, workspace_id: &str, document_id: &str, bytes: &[u8]) -> Result<String> {
        let uri = format!("{}/pdfs/{workspace_id}/{document_id}.pdf", self.bucket);
        self.write(&uri, bytes).await
    }

    async fn put_image(&self, workspace_id: &str, document_id: &str, image_id: &str, ext: &str, bytes: &[u8]) -> Result<String> {
        let uri = format!("{}/images/{workspace_id}/{document_id}/{image_id}.{ext}", self.bucket);
        self.write(&uri, bytes).await
    }

    async fn get(&self, uri: &str) -> Result<Vec<u8>> {
        let path = self.full_path(uri);
        tokio::fs::read(&path)
            .await
            .map_err(|_| AppError::NotFound(format!("object not found: {uri}")))
    }

    async fn delete(&self, uri: &str) -> Result<()> {
        let path = self.full_path(uri);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(AppError::ObjectStore(format!("failed to delete {uri}: {e}"))),
        }
    }

    fn public_uri(&self, storage_uri: &str) -> String {
        match &self.public_base_url {
            Some(base) => format!("{}/{}", base.trim_end_matches('/'), storage_uri),
            None => format!("file://{}", self.full_path(storage_uri).display()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn put_pdf_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalObjectStore::new(dir.path(), "bucket", None);
        let uri = store.put_pdf("ws1", "doc1", b"%PDF-1.4 test").await.unwrap();
        assert_eq!(uri, "bucket/pdfs/ws1/doc1.pdf");
        let bytes = store.get(&uri).await.unwrap();
        assert_eq!(bytes, b"%PDF-1.4 test");
    }

    #[tokio::test]
    async fn put_image_uses_layout_contract() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalObjectStore::new(dir.path(), "bucket", None);
        let uri = store.put_image("ws1", "doc1", "img1", "png", b"fake-png").await.unwrap();
        assert_eq!(uri, "bucket/images/ws1/doc1/img1.png");
    }

    #[tokio::test]
    async fn get_missing_object_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalObjectStore::new(dir.path(), "bucket", None);
        let err = store.get("bucket/pdfs/ws1/missing.pdf").await.unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
    }

    #[tokio::test]
    async fn delete_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalObjectStore::new(dir.path(), "bucket", None);
        store.delete("bucket/pdfs/ws1/doc1.pdf").await.unwrap();
        store.delete("bucket/pdfs/ws1/doc1.pdf").await.unwrap();
    }

    #[test]
    fn content_hash_is_deterministic() {
        assert_eq!(content_hash(b"abc"), content_hash(b"abc"));
        assert_ne!(content_hash(b"abc"), content_hash(b"abd"));
    }

    #[test]
    fn public_uri_prefers_configured_base() {
        let store = LocalObjectStore::new("/data", "bucket", Some("https://cdn.example.com".to_string()));
        assert_eq!(store.public_uri("bucket/pdfs/ws1/doc1.pdf"), "https://cdn.example.com/bucket/pdfs/ws1/doc1.pdf");
    }
}
