//! Video platform publishing through the resumable upload protocol.
//!
//! An access token is exchanged from the refresh token on every publish; no
//! token is cached across invocations.

mod api;

pub use api::{parse_range_header, YoutubeApi, TOKEN_URI, UPLOAD_SCOPE};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tracing::instrument;

use crate::core::{truncate_chars, Fact, StorageRef};
use crate::errors::{ErrorKind, ExternalError};
use crate::storage::{content_type_for, StoragePublisher};

/// Maximum title length.
pub const TITLE_MAX_CHARS: usize = 100;

/// Maximum description length.
pub const DESCRIPTION_MAX_CHARS: usize = 5000;

/// Maximum number of tags.
pub const MAX_TAGS: usize = 500;

/// Suffix appended to every description.
pub const HASHTAG_SUFFIX: &str = "\n\n#facts #didyouknow #education #learning";

/// The "Education" category.
pub const DEFAULT_CATEGORY_ID: &str = "27";

/// Upload chunk size.
pub const CHUNK_SIZE: usize = 1024 * 1024;

/// Consecutive chunks without progress before giving up.
const MAX_STALLED_CHUNKS: u32 = 3;

const SERVICE: &str = "youtube";

/// Normalized upload metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VideoMetadata {
    /// Title, at most 100 characters.
    pub title: String,
    /// Description with the hashtag suffix, at most 5000 characters.
    pub description: String,
    /// At most 500 tags.
    pub tags: Vec<String>,
    /// Platform category id.
    pub category_id: String,
    /// "public", "unlisted" or "private".
    pub privacy_status: String,
}

impl VideoMetadata {
    /// Applies the platform field limits.
    #[must_use]
    pub fn new(title: &str, description: &str, tags: Vec<String>) -> Self {
        let mut tags = tags;
        tags.truncate(MAX_TAGS);
        Self {
            title: truncate_chars(title, TITLE_MAX_CHARS),
            description: truncate_chars(
                &format!("{description}{HASHTAG_SUFFIX}"),
                DESCRIPTION_MAX_CHARS,
            ),
            tags,
            category_id: DEFAULT_CATEGORY_ID.to_string(),
            privacy_status: "public".to_string(),
        }
    }

    /// Metadata for a fact video.
    #[must_use]
    pub fn from_fact(fact: &Fact) -> Self {
        Self::new(
            &fact.title,
            &fact.content,
            vec![
                "facts".to_string(),
                "education".to_string(),
                fact.category.to_lowercase(),
            ],
        )
    }

    /// Sets the privacy status.
    #[must_use]
    pub fn with_privacy(mut self, status: impl Into<String>) -> Self {
        self.privacy_status = status.into();
        self
    }

    /// The `videos.insert` resource body.
    #[must_use]
    pub fn to_resource(&self) -> serde_json::Value {
        serde_json::json!({
            "snippet": {
                "title": self.title,
                "description": self.description,
                "tags": self.tags,
                "categoryId": self.category_id,
            },
            "status": {
                "privacyStatus": self.privacy_status,
                "selfDeclaredMadeForKids": false,
            },
        })
    }
}

/// Server response to one uploaded chunk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChunkProgress {
    /// More bytes are expected, starting at `next_offset`.
    Incomplete {
        /// First byte the server has not stored.
        next_offset: u64,
    },
    /// The upload finished and the video was created.
    Complete {
        /// New video id.
        video_id: String,
    },
}

/// The video platform's upload endpoints.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait VideoHost: Send + Sync {
    /// Exchanges the refresh token for a short-lived access token.
    async fn refresh_access_token(&self) -> Result<String, ExternalError>;

    /// Opens a resumable session and returns its URL.
    async fn begin_upload(
        &self,
        access_token: &str,
        metadata: &VideoMetadata,
        content_length: u64,
        content_type: &str,
    ) -> Result<String, ExternalError>;

    /// Sends bytes `offset..offset + chunk.len()` of `total`.
    async fn upload_chunk(
        &self,
        access_token: &str,
        session_url: &str,
        chunk: Vec<u8>,
        offset: u64,
        total: u64,
    ) -> Result<ChunkProgress, ExternalError>;
}

/// Outcome of a video publish.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum VideoPublishResult {
    /// The video was created.
    Uploaded {
        /// Platform video id.
        video_id: String,
        /// Public watch URL.
        url: String,
    },
    /// Credentials are absent; nothing was attempted.
    NotConfigured,
    /// The publish failed.
    Failed {
        /// Failure class.
        kind: ErrorKind,
        /// Human readable detail.
        error: String,
    },
}

impl VideoPublishResult {
    /// Builds the uploaded variant from a video id.
    #[must_use]
    pub fn uploaded(video_id: impl Into<String>) -> Self {
        let video_id = video_id.into();
        let url = format!("https://www.youtube.com/watch?v={video_id}");
        Self::Uploaded { video_id, url }
    }

    /// The watch URL, when uploaded.
    #[must_use]
    pub fn url(&self) -> Option<&str> {
        match self {
            Self::Uploaded { url, .. } => Some(url),
            _ => None,
        }
    }

    /// Response shape: `{success, video_id?, url?, error?, not_configured?}`.
    #[must_use]
    pub fn to_dict(&self) -> HashMap<String, serde_json::Value> {
        let mut map = HashMap::new();
        match self {
            Self::Uploaded { video_id, url } => {
                map.insert("success".to_string(), serde_json::json!(true));
                map.insert("video_id".to_string(), serde_json::json!(video_id));
                map.insert("url".to_string(), serde_json::json!(url));
            }
            Self::NotConfigured => {
                map.insert("success".to_string(), serde_json::json!(false));
                map.insert("not_configured".to_string(), serde_json::json!(true));
                map.insert(
                    "error".to_string(),
                    serde_json::json!("YouTube credentials not configured"),
                );
            }
            Self::Failed { kind, error } => {
                map.insert("success".to_string(), serde_json::json!(false));
                map.insert("error".to_string(), serde_json::json!(error));
                map.insert("error_kind".to_string(), serde_json::json!(kind));
            }
        }
        map
    }
}

/// Uploads artifacts to the video platform.
#[derive(Clone)]
pub struct YoutubePublisher {
    host: Option<Arc<dyn VideoHost>>,
    chunk_size: usize,
    work_dir: PathBuf,
}

impl std::fmt::Debug for YoutubePublisher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("YoutubePublisher")
            .field("configured", &self.is_configured())
            .field("chunk_size", &self.chunk_size)
            .field("work_dir", &self.work_dir)
            .finish()
    }
}

impl YoutubePublisher {
    /// Creates a publisher; `None` means not configured.
    #[must_use]
    pub fn new(host: Option<Arc<dyn VideoHost>>, work_dir: impl Into<PathBuf>) -> Self {
        Self {
            host,
            chunk_size: CHUNK_SIZE,
            work_dir: work_dir.into(),
        }
    }

    /// Sets the chunk size.
    #[must_use]
    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    /// Returns true if credentials are configured.
    #[must_use]
    pub fn is_configured(&self) -> bool {
        self.host.is_some()
    }

    /// Uploads a local file.
    #[instrument(skip(self, metadata), fields(title = %metadata.title))]
    pub async fn publish(&self, path: &Path, metadata: &VideoMetadata) -> VideoPublishResult {
        let Some(host) = self.host.as_deref() else {
            tracing::info!("YouTube credentials not configured, skipping upload");
            return VideoPublishResult::NotConfigured;
        };

        match self.upload(host, path, metadata).await {
            Ok(video_id) => {
                let result = VideoPublishResult::uploaded(video_id);
                tracing::info!(url = result.url().unwrap_or_default(), "Uploaded to YouTube");
                result
            }
            Err(e) => {
                tracing::error!(error = %e, kind = %e.kind, "YouTube upload failed");
                VideoPublishResult::Failed {
                    kind: e.kind,
                    error: e.message,
                }
            }
        }
    }

    /// Downloads a stored artifact to a temporary file and uploads it.
    pub async fn publish_from_storage(
        &self,
        storage: &StoragePublisher,
        stored: &StorageRef,
        metadata: &VideoMetadata,
    ) -> VideoPublishResult {
        if !self.is_configured() {
            tracing::info!("YouTube credentials not configured, skipping upload");
            return VideoPublishResult::NotConfigured;
        }

        let temp = self.work_dir.join(format!("youtube_{}", stored.file_name()));
        if let Err(e) = storage.fetch(stored, &temp).await {
            tracing::error!(error = %e, "Could not download artifact for YouTube");
            remove_temp(&temp).await;
            return VideoPublishResult::Failed {
                kind: e.kind,
                error: e.message,
            };
        }

        let result = self.publish(&temp, metadata).await;
        remove_temp(&temp).await;
        result
    }

    async fn upload(
        &self,
        host: &dyn VideoHost,
        path: &Path,
        metadata: &VideoMetadata,
    ) -> Result<String, ExternalError> {
        let local = |e: std::io::Error| {
            ExternalError::local(SERVICE, format!("{}: {e}", path.display()))
        };
        let mut file = tokio::fs::File::open(path).await.map_err(local)?;
        let total = file.metadata().await.map_err(local)?.len();
        if total == 0 {
            return Err(ExternalError::local(SERVICE, "Artifact is empty"));
        }

        let token = host.refresh_access_token().await?;
        let session = host
            .begin_upload(&token, metadata, total, content_type_for(path))
            .await?;
        tracing::debug!(total_bytes = total, "Resumable session opened");

        let mut offset = 0u64;
        let mut stalled = 0u32;
        while offset < total {
            let chunk = read_chunk(&mut file, offset, self.chunk_size)
                .await
                .map_err(local)?;
            match host
                .upload_chunk(&token, &session, chunk, offset, total)
                .await?
            {
                ChunkProgress::Complete { video_id } => return Ok(video_id),
                ChunkProgress::Incomplete { next_offset } => {
                    if next_offset <= offset {
                        stalled += 1;
                        if stalled >= MAX_STALLED_CHUNKS {
                            return Err(ExternalError::transient(
                                SERVICE,
                                format!("Upload stalled at byte {offset}"),
                            ));
                        }
                    } else {
                        stalled = 0;
                    }
                    offset = next_offset;
                    tracing::info!(
                        progress_pct = offset.saturating_mul(100) / total,
                        "Upload progress"
                    );
                }
            }
        }

        Err(ExternalError::rejected(
            SERVICE,
            "Upload finished without returning a video id",
        ))
    }
}

async fn remove_temp(path: &Path) {
    if let Err(e) = tokio::fs::remove_file(path).await {
        tracing::debug!(path = %path.display(), error = %e, "Could not remove temp file");
    }
}

async fn read_chunk(
    file: &mut tokio::fs::File,
    offset: u64,
    len: usize,
) -> std::io::Result<Vec<u8>> {
    file.seek(SeekFrom::Start(offset)).await?;
    let mut buf = Vec::with_capacity(len);
    (&mut *file).take(len as u64).read_to_end(&mut buf).await?;
    Ok(buf)
}
