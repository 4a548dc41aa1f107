//! Artifact references as they move through the pipeline.
//!
//! The same logical artifact is re-addressed at each hand-off: a local path
//! after rendering, a bucket/key pair after storage, and platform ids after
//! publishing.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

/// What the renderer produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactKind {
    /// A still JPEG image.
    Image,
    /// An MP4 video.
    Video,
}

impl fmt::Display for ArtifactKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Image => write!(f, "image"),
            Self::Video => write!(f, "video"),
        }
    }
}

/// Where the background image came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackgroundSource {
    /// Produced by the image-generation API.
    Generated,
    /// Procedural gradient fallback.
    Gradient,
}

/// A locally rendered artifact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RenderedArtifact {
    /// Local file path.
    pub path: PathBuf,
    /// Image or video.
    pub kind: ArtifactKind,
    /// Background provenance.
    pub background: BackgroundSource,
    /// Whether an audio bed was muxed in.
    pub has_audio: bool,
    /// Whether any sub-step fell back to a lesser result.
    pub degraded: bool,
}

impl RenderedArtifact {
    /// Creates a still-image artifact.
    #[must_use]
    pub fn image(path: impl Into<PathBuf>, background: BackgroundSource) -> Self {
        Self {
            path: path.into(),
            kind: ArtifactKind::Image,
            background,
            has_audio: false,
            degraded: false,
        }
    }

    /// The placeholder returned when no image could be produced at all.
    #[must_use]
    pub fn placeholder() -> Self {
        Self {
            path: PathBuf::from(PLACEHOLDER_PATH),
            kind: ArtifactKind::Image,
            background: BackgroundSource::Gradient,
            has_audio: false,
            degraded: true,
        }
    }

    /// Marks the artifact as degraded.
    #[must_use]
    pub fn degraded(mut self) -> Self {
        self.degraded = true;
        self
    }

    /// Returns the path as a display string.
    #[must_use]
    pub fn path_string(&self) -> String {
        self.path.display().to_string()
    }

    /// Returns the file name component, if any.
    #[must_use]
    pub fn file_name(&self) -> Option<&str> {
        self.path.file_name().and_then(|n| n.to_str())
    }
}

/// Path reported when rendering failed completely.
pub const PLACEHOLDER_PATH: &str = "/tmp/placeholder_video.jpg";

/// A stored object, addressable by bucket and key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageRef {
    /// Bucket name.
    pub bucket: String,
    /// Object key.
    pub key: String,
    /// Deterministic virtual-hosted URL.
    pub url: String,
    /// Hex MD5 of the uploaded bytes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub md5: Option<String>,
}

impl StorageRef {
    /// Creates a reference and derives its URL.
    #[must_use]
    pub fn new(bucket: impl Into<String>, key: impl Into<String>) -> Self {
        let bucket = bucket.into();
        let key = key.into();
        let url = format!("https://{bucket}.s3.amazonaws.com/{key}");
        Self {
            bucket,
            key,
            url,
            md5: None,
        }
    }

    /// Records the content digest.
    #[must_use]
    pub fn with_md5(mut self, md5: impl Into<String>) -> Self {
        self.md5 = Some(md5.into());
        self
    }

    /// The file name at the end of the key.
    #[must_use]
    pub fn file_name(&self) -> &str {
        Path::new(&self.key)
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or(&self.key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_storage_ref_url() {
        let storage = StorageRef::new("reels", "videos/20250101_120000_fact.mp4");
        assert_eq!(
            storage.url,
            "https://reels.s3.amazonaws.com/videos/20250101_120000_fact.mp4"
        );
        assert_eq!(storage.file_name(), "20250101_120000_fact.mp4");
    }

    #[test]
    fn test_placeholder_is_degraded() {
        let artifact = RenderedArtifact::placeholder();
        assert!(artifact.degraded);
        assert_eq!(artifact.path_string(), PLACEHOLDER_PATH);
        assert_eq!(artifact.kind, ArtifactKind::Image);
    }

    #[test]
    fn test_artifact_kind_serialize() {
        assert_eq!(serde_json::to_string(&ArtifactKind::Video).unwrap(), r#""video""#);
        assert_eq!(ArtifactKind::Image.to_string(), "image");
    }
}
