//! Object storage publishing.
//!
//! Unlike the other publishers, storage failures are surfaced: both platform
//! publishers need a resolvable reference and are skipped without one.

mod s3;

pub use s3::S3ObjectStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use md5::{Digest, Md5};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::instrument;

use crate::core::StorageRef;
use crate::errors::ExternalError;

/// Key prefix for uploaded artifacts.
pub const KEY_PREFIX: &str = "videos";

/// Default lifetime of presigned GET URLs.
pub const PRESIGN_TTL: Duration = Duration::from_secs(3600);

const SERVICE: &str = "s3";

/// What the store reported after an upload.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PutReceipt {
    /// Entity tag, quotes included as returned.
    pub etag: Option<String>,
}

/// Minimal object-store operations used by the pipeline.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Uploads a local file.
    async fn put_file(
        &self,
        bucket: &str,
        key: &str,
        path: &Path,
        content_type: &str,
    ) -> Result<PutReceipt, ExternalError>;

    /// Downloads an object to `dest`, returning the byte count.
    async fn get_to_file(&self, bucket: &str, key: &str, dest: &Path)
        -> Result<u64, ExternalError>;

    /// Creates a time-limited public GET URL.
    async fn presign_get(
        &self,
        bucket: &str,
        key: &str,
        ttl: Duration,
    ) -> Result<String, ExternalError>;
}

/// Builds the time-stamped remote key for a file name.
#[must_use]
pub fn storage_key_for(file_name: &str, at: DateTime<Utc>) -> String {
    format!("{KEY_PREFIX}/{}_{file_name}", at.format("%Y%m%d_%H%M%S"))
}

/// Content type by file extension.
#[must_use]
pub fn content_type_for(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase);
    match ext.as_deref() {
        Some("mp4") => "video/mp4",
        Some("jpg" | "jpeg") => "image/jpeg",
        Some("png") => "image/png",
        _ => "application/octet-stream",
    }
}

/// Parses `s3://bucket/key` or `https://bucket.s3[.region].amazonaws.com/key`.
#[must_use]
pub fn parse_storage_url(url: &str) -> Option<StorageRef> {
    let (bucket, key) = if let Some(rest) = url.strip_prefix("s3://") {
        rest.split_once('/')?
    } else {
        let rest = url.strip_prefix("https://")?;
        let (host, key) = rest.split_once('/')?;
        let (bucket, domain) = host.split_once(".s3")?;
        if !domain.ends_with("amazonaws.com") {
            return None;
        }
        (bucket, key)
    };
    if bucket.is_empty() || key.is_empty() {
        return None;
    }
    Some(StorageRef::new(bucket, key))
}

/// Hex MD5 of a byte slice.
#[must_use]
pub fn md5_hex(bytes: &[u8]) -> String {
    hex::encode(Md5::digest(bytes))
}

/// Uploads artifacts to one bucket.
#[derive(Clone)]
pub struct StoragePublisher {
    store: Arc<dyn ObjectStore>,
    bucket: String,
}

impl std::fmt::Debug for StoragePublisher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoragePublisher")
            .field("bucket", &self.bucket)
            .finish_non_exhaustive()
    }
}

impl StoragePublisher {
    /// Creates a publisher for `bucket`.
    #[must_use]
    pub fn new(store: Arc<dyn ObjectStore>, bucket: impl Into<String>) -> Self {
        Self {
            store,
            bucket: bucket.into(),
        }
    }

    /// The target bucket.
    #[must_use]
    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    /// Uploads a local file under a time-stamped key.
    #[instrument(skip(self), fields(bucket = %self.bucket))]
    pub async fn publish(&self, path: &Path) -> Result<StorageRef, ExternalError> {
        let file_name = path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| ExternalError::local(SERVICE, "Artifact path has no file name"))?;

        let bytes = tokio::fs::read(path).await.map_err(|e| {
            ExternalError::local(SERVICE, format!("Cannot read {}: {e}", path.display()))
        })?;
        let digest = md5_hex(&bytes);
        drop(bytes);

        let key = storage_key_for(file_name, Utc::now());
        let receipt = self
            .store
            .put_file(&self.bucket, &key, path, content_type_for(path))
            .await?;

        match receipt.etag.as_deref().map(|t| t.trim_matches('"')) {
            Some(etag) if etag != digest && !etag.contains('-') => {
                tracing::warn!(etag = etag, md5 = %digest, "Uploaded object ETag does not match MD5");
            }
            _ => {}
        }

        let storage = StorageRef::new(&self.bucket, key).with_md5(digest);
        tracing::info!(url = %storage.url, "Uploaded artifact");
        Ok(storage)
    }

    /// Downloads a stored object to `dest`.
    pub async fn fetch(&self, storage: &StorageRef, dest: &Path) -> Result<u64, ExternalError> {
        let bytes = self
            .store
            .get_to_file(&storage.bucket, &storage.key, dest)
            .await?;
        tracing::debug!(key = %storage.key, bytes = bytes, "Downloaded object");
        Ok(bytes)
    }

    /// Presigned GET URL for a key in this bucket.
    pub async fn presigned_url(&self, key: &str, ttl: Duration) -> Result<String, ExternalError> {
        self.store.presign_get(&self.bucket, key, ttl).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_storage_key_format() {
        let at = Utc.with_ymd_and_hms(2025, 3, 7, 9, 5, 2).unwrap();
        assert_eq!(
            storage_key_for("fact_video_abc.mp4", at),
            "videos/20250307_090502_fact_video_abc.mp4"
        );
    }

    #[test]
    fn test_content_type_for() {
        assert_eq!(content_type_for(Path::new("a.mp4")), "video/mp4");
        assert_eq!(content_type_for(Path::new("a.JPG")), "image/jpeg");
        assert_eq!(content_type_for(Path::new("a.jpeg")), "image/jpeg");
        assert_eq!(content_type_for(Path::new("a.png")), "image/png");
        assert_eq!(content_type_for(Path::new("a")), "application/octet-stream");
    }

    #[test]
    fn test_parse_storage_url() {
        let parsed = parse_storage_url("s3://reels/videos/x.mp4").unwrap();
        assert_eq!(parsed.bucket, "reels");
        assert_eq!(parsed.key, "videos/x.mp4");

        let parsed = parse_storage_url("https://reels.s3.amazonaws.com/videos/x.mp4").unwrap();
        assert_eq!(parsed, StorageRef::new("reels", "videos/x.mp4"));

        let parsed =
            parse_storage_url("https://reels.s3.eu-west-1.amazonaws.com/videos/x.mp4").unwrap();
        assert_eq!(parsed.bucket, "reels");

        assert!(parse_storage_url("https://example.com/videos/x.mp4").is_none());
        assert!(parse_storage_url("s3://reels").is_none());
        assert!(parse_storage_url("ftp://reels/x").is_none());
    }

    #[test]
    fn test_storage_ref_url_round_trip() {
        let storage = StorageRef::new("reels", "videos/20250101_000000_a.jpg");
        assert_eq!(parse_storage_url(&storage.url), Some(storage.clone()));
    }

    #[test]
    fn test_md5_hex() {
        assert_eq!(md5_hex(b"hello world"), "5eb63bbbe01eeed093cb22bb8f5acdc3");
    }

    #[tokio::test]
    async fn test_publish_uploads_with_content_type() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fact_image_r1.jpg");
        std::fs::write(&path, b"hello world").unwrap();

        let mut store = MockObjectStore::new();
        store
            .expect_put_file()
            .withf(|bucket, key, _path, content_type| {
                bucket == "reels"
                    && key.starts_with("videos/")
                    && key.ends_with("_fact_image_r1.jpg")
                    && content_type == "image/jpeg"
            })
            .times(1)
            .returning(|_, _, _, _| {
                Ok(PutReceipt {
                    etag: Some("\"5eb63bbbe01eeed093cb22bb8f5acdc3\"".to_string()),
                })
            });

        let publisher = StoragePublisher::new(Arc::new(store), "reels");
        let storage = publisher.publish(&path).await.unwrap();

        assert_eq!(storage.bucket, "reels");
        assert!(storage.url.starts_with("https://reels.s3.amazonaws.com/videos/"));
        assert_eq!(storage.md5.as_deref(), Some("5eb63bbbe01eeed093cb22bb8f5acdc3"));
    }

    #[tokio::test]
    async fn test_publish_surfaces_store_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.mp4");
        std::fs::write(&path, b"data").unwrap();

        let mut store = MockObjectStore::new();
        store
            .expect_put_file()
            .returning(|_, _, _, _| Err(ExternalError::rejected("s3", "AccessDenied")));

        let publisher = StoragePublisher::new(Arc::new(store), "reels");
        let err = publisher.publish(&path).await.unwrap_err();
        assert_eq!(err.message, "AccessDenied");
    }

    #[tokio::test]
    async fn test_publish_missing_file_is_local_error() {
        let store = MockObjectStore::new();
        let publisher = StoragePublisher::new(Arc::new(store), "reels");
        let err = publisher
            .publish(Path::new("/nonexistent/a.mp4"))
            .await
            .unwrap_err();
        assert_eq!(err.kind, crate::errors::ErrorKind::Local);
    }

    #[tokio::test]
    async fn test_presigned_url_delegates() {
        let mut store = MockObjectStore::new();
        store
            .expect_presign_get()
            .withf(|bucket, key, ttl| {
                bucket == "reels" && key == "videos/a.mp4" && *ttl == PRESIGN_TTL
            })
            .returning(|_, _, _| Ok("https://signed.example/a.mp4?X-Amz-Signature=abc".to_string()));

        let publisher = StoragePublisher::new(Arc::new(store), "reels");
        let url = publisher
            .presigned_url("videos/a.mp4", PRESIGN_TTL)
            .await
            .unwrap();
        assert!(url.contains("X-Amz-Signature"));
    }
}
