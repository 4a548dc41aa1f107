//! Core domain model types for factreel.
//!
//! This module contains the types shared by every component:
//! - The `Fact` content unit
//! - Artifact references at each hand-off
//! - Stage names and statuses

mod artifact;
mod fact;
mod status;

pub use artifact::{
    ArtifactKind, BackgroundSource, RenderedArtifact, StorageRef, PLACEHOLDER_PATH,
};
pub use fact::{
    truncate_chars, Fact, CONTENT_MAX_CHARS, SENTINEL_CATEGORY, TITLE_MAX_CHARS,
};
pub use status::{StageName, StageStatus};
