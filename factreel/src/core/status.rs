//! Stage names and statuses for the five-stage pipeline.

use serde::{Deserialize, Serialize};
use std::fmt;

/// The ordered stages of `full_pipeline`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageName {
    /// Ask the completion API for a fact.
    GenerateFact,
    /// Draw the fact onto an image or video.
    RenderArtifact,
    /// Upload the artifact to object storage.
    PublishStorage,
    /// Upload to the video platform.
    PublishVideo,
    /// Publish to the social platform.
    PublishSocial,
}

impl StageName {
    /// All stages in execution order.
    pub const ALL: [Self; 5] = [
        Self::GenerateFact,
        Self::RenderArtifact,
        Self::PublishStorage,
        Self::PublishVideo,
        Self::PublishSocial,
    ];

    /// Stages whose output this stage consumes.
    #[must_use]
    pub fn dependencies(&self) -> &'static [Self] {
        match self {
            Self::GenerateFact => &[],
            Self::RenderArtifact => &[Self::GenerateFact],
            Self::PublishStorage => &[Self::RenderArtifact],
            Self::PublishVideo | Self::PublishSocial => &[Self::PublishStorage],
        }
    }
}

impl fmt::Display for StageName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::GenerateFact => write!(f, "generate_fact"),
            Self::RenderArtifact => write!(f, "render_artifact"),
            Self::PublishStorage => write!(f, "publish_storage"),
            Self::PublishVideo => write!(f, "publish_video"),
            Self::PublishSocial => write!(f, "publish_social"),
        }
    }
}

/// The terminal status of a stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    /// Stage produced its real output.
    Completed,
    /// Stage produced a fallback output.
    Degraded,
    /// Stage did not run (missing credentials or missing upstream output).
    Skipped,
    /// Stage ran and failed.
    Failed,
}

impl fmt::Display for StageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Completed => write!(f, "completed"),
            Self::Degraded => write!(f, "degraded"),
            Self::Skipped => write!(f, "skipped"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

impl StageStatus {
    /// Returns true if downstream stages may consume this stage's output.
    #[must_use]
    pub fn produced_output(&self) -> bool {
        matches!(self, Self::Completed | Self::Degraded)
    }

    /// Returns true if the status indicates failure.
    #[must_use]
    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Failed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_name_display() {
        assert_eq!(StageName::GenerateFact.to_string(), "generate_fact");
        assert_eq!(StageName::PublishSocial.to_string(), "publish_social");
    }

    #[test]
    fn test_stage_order() {
        assert_eq!(StageName::ALL[0], StageName::GenerateFact);
        assert_eq!(StageName::ALL[4], StageName::PublishSocial);
    }

    #[test]
    fn test_publish_stages_depend_on_storage() {
        assert_eq!(StageName::PublishVideo.dependencies(), &[StageName::PublishStorage]);
        assert_eq!(StageName::PublishSocial.dependencies(), &[StageName::PublishStorage]);
        assert!(StageName::GenerateFact.dependencies().is_empty());
    }

    #[test]
    fn test_status_produced_output() {
        assert!(StageStatus::Completed.produced_output());
        assert!(StageStatus::Degraded.produced_output());
        assert!(!StageStatus::Skipped.produced_output());
        assert!(!StageStatus::Failed.produced_output());
        assert!(StageStatus::Failed.is_failure());
    }

    #[test]
    fn test_status_serialize() {
        let json = serde_json::to_string(&StageStatus::Degraded).unwrap();
        assert_eq!(json, r#""degraded""#);
        let back: StageStatus = serde_json::from_str(&json).unwrap();
        assert_eq!(back, StageStatus::Degraded);
    }
}
