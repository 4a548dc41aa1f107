//! # Factreel
//!
//! A content pipeline that turns a generated "did you know" fact into a short
//! video and publishes it.
//!
//! A run moves through five stages:
//!
//! - **Fact generation**: ask a chat-completion API for a structured fact
//! - **Rendering**: draw the fact over an AI or gradient background, then
//!   encode a video with an optional audio bed
//! - **Storage**: upload the artifact to an S3 bucket
//! - **Video platform**: resumable upload to YouTube
//! - **Social platform**: Instagram reel container create, poll and publish
//!
//! Every external dependency is optional. Missing credentials degrade a stage
//! or skip it, and a failed stage never aborts the run.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use factreel::prelude::*;
//!
//! let settings = Settings::from_env()?;
//! let pipeline = Pipeline::from_settings(&settings).await?;
//! let response = handle(&pipeline, &serde_json::json!({"action": "full_pipeline"})).await;
//! println!("{}", response.to_value());
//! ```

#![forbid(unsafe_code)]
#![warn(
    clippy::all,
    clippy::pedantic,
    missing_docs,
    rust_2018_idioms
)]
#![allow(
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc
)]

pub mod config;
pub mod core;
pub mod errors;
pub mod fact;
pub mod handler;
pub mod instagram;
pub mod llm;
pub mod oauth;
pub mod observability;
pub mod pipeline;
pub mod polling;
pub mod render;
pub mod storage;
pub mod youtube;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::config::{Secret, Settings};
    pub use crate::core::{
        ArtifactKind, BackgroundSource, Fact, RenderedArtifact, StageName, StageStatus,
        StorageRef,
    };
    pub use crate::errors::{ConfigError, ErrorKind, ExternalError, FactreelError, RenderError};
    pub use crate::fact::FactSource;
    pub use crate::handler::{handle, invoke, HandlerResponse};
    pub use crate::instagram::{GraphApi, InstagramPublisher, SocialPublishResult};
    pub use crate::llm::{CompletionClient, ImageGenerator};
    pub use crate::observability::{init_tracing, LogFormat, StageTimer};
    pub use crate::pipeline::{Pipeline, PipelineResult, StageReport, VideoRunResult};
    pub use crate::polling::{poll_until, Clock, PollOutcome, PollPolicy, PollStep, TokioClock};
    pub use crate::render::Renderer;
    pub use crate::storage::{ObjectStore, StoragePublisher};
    pub use crate::youtube::{VideoHost, VideoMetadata, VideoPublishResult, YoutubePublisher};
}

#[cfg(test)]
mod tests {
    use super::prelude::*;

    #[test]
    fn library_compiles() {
        let status = StageStatus::Skipped;
        assert!(!status.produced_output());
    }

    #[test]
    fn test_prelude_blocking_handler() {
        let dir = tempfile::tempdir().unwrap();
        let pipeline = Pipeline::new(
            FactSource::offline(),
            Renderer::minimal(dir.path()),
            None,
            YoutubePublisher::new(None, dir.path()),
            InstagramPublisher::new(
                None,
                None,
                std::sync::Arc::new(TokioClock),
                PollPolicy::default(),
            ),
        );
        let response = tokio_test::block_on(handle(
            &pipeline,
            &serde_json::json!({"action": "generate_fact"}),
        ));
        assert_eq!(response.status_code, 200);
    }
}
