//! The five-stage publishing pipeline.
//!
//! Stages run strictly in order. Each stage's outcome is recorded in a
//! [`StageLedger`]; a stage whose inputs were not produced is skipped rather
//! than attempted, and no stage failure aborts the run.


use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::instrument;

use crate::config::Settings;
use crate::core::{Fact, RenderedArtifact, StageName, StageStatus, StorageRef, PLACEHOLDER_PATH};
use crate::errors::FactreelError;
use crate::fact::FactSource;
use crate::instagram::{GraphApi, GraphClient, InstagramPublisher, SocialPublishResult};
use crate::llm::{CompletionClient, ImageGenerator, OpenAiClient};
use crate::observability::StageTimer;
use crate::polling::{PollPolicy, TokioClock};
use crate::render::{remove_quietly, Renderer};
use crate::storage::{S3ObjectStore, StoragePublisher};
use crate::youtube::{
    VideoHost, VideoMetadata, VideoPublishResult, YoutubeApi, YoutubePublisher,
};

/// Outcome of one stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageReport {
    /// Which stage.
    pub stage: StageName,
    /// How it ended.
    pub status: StageStatus,
    /// Wall time in milliseconds.
    pub duration_ms: f64,
    /// Error or skip reason.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

/// Per-run record of stage outcomes.
#[derive(Debug, Clone, Default)]
pub struct StageLedger {
    reports: Vec<StageReport>,
}

impl StageLedger {
    /// Creates an empty ledger.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a stage outcome.
    pub fn record(
        &mut self,
        stage: StageName,
        status: StageStatus,
        duration_ms: f64,
        detail: Option<String>,
    ) {
        match status {
            StageStatus::Failed => {
                tracing::warn!(stage = %stage, detail = detail.as_deref().unwrap_or(""), "Stage failed");
            }
            StageStatus::Skipped => {
                tracing::info!(stage = %stage, detail = detail.as_deref().unwrap_or(""), "Stage skipped");
            }
            _ => tracing::info!(stage = %stage, status = %status, duration_ms = duration_ms, "Stage finished"),
        }
        self.reports.push(StageReport {
            stage,
            status,
            duration_ms,
            detail,
        });
    }

    /// Records a stage that was not attempted.
    pub fn skip(&mut self, stage: StageName, reason: impl Into<String>) {
        self.record(stage, StageStatus::Skipped, 0.0, Some(reason.into()));
    }

    /// Status of a recorded stage.
    #[must_use]
    pub fn status_of(&self, stage: StageName) -> Option<StageStatus> {
        self.reports
            .iter()
            .rev()
            .find(|r| r.stage == stage)
            .map(|r| r.status)
    }

    /// Checks that every dependency of `stage` produced output.
    pub fn can_run(&self, stage: StageName) -> Result<(), String> {
        for dep in stage.dependencies() {
            match self.status_of(*dep) {
                Some(status) if status.produced_output() => {}
                Some(status) => return Err(format!("{dep} {status}")),
                None => return Err(format!("{dep} did not run")),
            }
        }
        Ok(())
    }

    /// Recorded reports in execution order.
    #[must_use]
    pub fn reports(&self) -> &[StageReport] {
        &self.reports
    }

    /// Number of failed stages.
    #[must_use]
    pub fn failed_count(&self) -> usize {
        self.reports.iter().filter(|r| r.status.is_failure()).count()
    }

    /// Consumes the ledger.
    #[must_use]
    pub fn into_reports(self) -> Vec<StageReport> {
        self.reports
    }
}

/// Terminal record of a `full_pipeline` run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineResult {
    /// Invocation id.
    pub run_id: String,
    /// The fact used.
    pub fact: Fact,
    /// Local artifact, if rendering ran.
    pub artifact: Option<RenderedArtifact>,
    /// Stored artifact, if storage succeeded.
    pub storage: Option<StorageRef>,
    /// Video platform outcome, if attempted.
    pub youtube: Option<VideoPublishResult>,
    /// Social platform outcome, if attempted.
    pub instagram: Option<SocialPublishResult>,
    /// Per-stage reports.
    pub stages: Vec<StageReport>,
}

impl PipelineResult {
    /// Watch URL, when the video upload succeeded.
    #[must_use]
    pub fn youtube_url(&self) -> Option<&str> {
        self.youtube.as_ref().and_then(VideoPublishResult::url)
    }

    /// Post URL, when the social publish succeeded.
    #[must_use]
    pub fn instagram_url(&self) -> Option<&str> {
        self.instagram.as_ref().and_then(SocialPublishResult::url)
    }

    /// Stored URL, when storage succeeded.
    #[must_use]
    pub fn s3_url(&self) -> Option<&str> {
        self.storage.as_ref().map(|s| s.url.as_str())
    }

    /// Status of one stage.
    #[must_use]
    pub fn stage_status(&self, stage: StageName) -> Option<StageStatus> {
        self.stages
            .iter()
            .find(|r| r.stage == stage)
            .map(|r| r.status)
    }

    /// Summary counts in the shape used by logs.
    #[must_use]
    pub fn summary(&self) -> HashMap<String, serde_json::Value> {
        let mut map = HashMap::new();
        let count = |status: StageStatus| self.stages.iter().filter(|r| r.status == status).count();
        map.insert("run_id".to_string(), serde_json::json!(self.run_id));
        map.insert("completed".to_string(), serde_json::json!(count(StageStatus::Completed)));
        map.insert("degraded".to_string(), serde_json::json!(count(StageStatus::Degraded)));
        map.insert("skipped".to_string(), serde_json::json!(count(StageStatus::Skipped)));
        map.insert("failed".to_string(), serde_json::json!(count(StageStatus::Failed)));
        map
    }
}

/// Terminal record of a `create_video` run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VideoRunResult {
    /// Invocation id.
    pub run_id: String,
    /// The fact used.
    pub fact: Fact,
    /// Local artifact (kept on disk).
    pub artifact: RenderedArtifact,
    /// Stored artifact, if uploaded.
    pub storage: Option<StorageRef>,
}

/// Sequential orchestrator over the five components.
#[derive(Debug)]
pub struct Pipeline {
    facts: FactSource,
    renderer: Renderer,
    storage: Option<Arc<StoragePublisher>>,
    video: YoutubePublisher,
    social: InstagramPublisher,
}

impl Pipeline {
    /// Assembles a pipeline from its components.
    #[must_use]
    pub fn new(
        facts: FactSource,
        renderer: Renderer,
        storage: Option<Arc<StoragePublisher>>,
        video: YoutubePublisher,
        social: InstagramPublisher,
    ) -> Self {
        Self {
            facts,
            renderer,
            storage,
            video,
            social,
        }
    }

    /// Builds every component from settings.
    pub async fn from_settings(settings: &Settings) -> Result<Self, FactreelError> {
        settings.log_summary();

        let openai = OpenAiClient::from_settings(&settings.openai)?.map(Arc::new);
        let completion = openai
            .clone()
            .map(|c| c as Arc<dyn CompletionClient>);
        let images = openai.map(|c| c as Arc<dyn ImageGenerator>);

        let facts = FactSource::new(completion, &settings.openai);
        let renderer = Renderer::from_settings(&settings.render, images);

        let storage = match &settings.storage.bucket {
            Some(bucket) => {
                let store = S3ObjectStore::connect(&settings.storage.region).await;
                Some(Arc::new(StoragePublisher::new(Arc::new(store), bucket)))
            }
            None => None,
        };

        let video_host = match &settings.youtube {
            Some(creds) => Some(Arc::new(YoutubeApi::new(creds.clone())?) as Arc<dyn VideoHost>),
            None => None,
        };
        let video = YoutubePublisher::new(video_host, &settings.render.work_dir);

        let graph = match &settings.instagram.credentials {
            Some(creds) => Some(Arc::new(GraphClient::new(
                creds.clone(),
                &settings.instagram.graph_version,
            )?) as Arc<dyn GraphApi>),
            None => None,
        };
        let social = InstagramPublisher::new(
            graph,
            storage.clone(),
            Arc::new(TokioClock),
            PollPolicy::new(
                settings.instagram.poll_interval,
                settings.instagram.poll_max_attempts,
            ),
        );

        Ok(Self::new(facts, renderer, storage, video, social))
    }

    /// Returns true if a completion client is configured.
    #[must_use]
    pub fn uses_live_facts(&self) -> bool {
        self.facts.is_live()
    }

    /// Generates one fact.
    pub async fn generate_fact(&self) -> Fact {
        self.facts.generate().await
    }

    async fn fact_stage(&self, seed: Option<Fact>, ledger: &mut StageLedger) -> Fact {
        let timer = StageTimer::start(StageName::GenerateFact.to_string());
        let (fact, status) = match seed {
            Some(fact) => (fact, StageStatus::Completed),
            None => {
                let fact = self.facts.generate().await;
                let status = if fact.is_sentinel() || fact.is_test_fact() {
                    StageStatus::Degraded
                } else {
                    StageStatus::Completed
                };
                (fact, status)
            }
        };
        let detail = fact.is_sentinel().then(|| fact.content.clone());
        ledger.record(StageName::GenerateFact, status, timer.finish(), detail);
        fact
    }

    async fn render_stage(
        &self,
        fact: &Fact,
        run_id: &str,
        ledger: &mut StageLedger,
    ) -> RenderedArtifact {
        let timer = StageTimer::start(StageName::RenderArtifact.to_string());
        let artifact = self.renderer.render(fact, run_id).await;
        let status = if artifact.degraded {
            StageStatus::Degraded
        } else {
            StageStatus::Completed
        };
        ledger.record(
            StageName::RenderArtifact,
            status,
            timer.finish(),
            Some(artifact.path_string()),
        );
        artifact
    }

    async fn storage_stage(
        &self,
        artifact: &RenderedArtifact,
        ledger: &mut StageLedger,
    ) -> Option<StorageRef> {
        let Some(storage) = self.storage.as_deref() else {
            ledger.skip(StageName::PublishStorage, "S3_BUCKET not configured");
            return None;
        };
        if !artifact.path.is_file() {
            ledger.skip(
                StageName::PublishStorage,
                format!("artifact {} does not exist", artifact.path_string()),
            );
            return None;
        }

        let timer = StageTimer::start(StageName::PublishStorage.to_string());
        match storage.publish(&artifact.path).await {
            Ok(stored) => {
                ledger.record(
                    StageName::PublishStorage,
                    StageStatus::Completed,
                    timer.finish(),
                    Some(stored.url.clone()),
                );
                Some(stored)
            }
            Err(e) => {
                ledger.record(
                    StageName::PublishStorage,
                    StageStatus::Failed,
                    timer.finish(),
                    Some(e.to_string()),
                );
                None
            }
        }
    }

    async fn video_stage(
        &self,
        fact: &Fact,
        stored: &StorageRef,
        ledger: &mut StageLedger,
    ) -> VideoPublishResult {
        let timer = StageTimer::start(StageName::PublishVideo.to_string());
        let metadata = VideoMetadata::from_fact(fact);
        let result = match self.storage.as_deref() {
            Some(storage) => self.video.publish_from_storage(storage, stored, &metadata).await,
            None => VideoPublishResult::NotConfigured,
        };
        let (status, detail) = match &result {
            VideoPublishResult::Uploaded { url, .. } => (StageStatus::Completed, Some(url.clone())),
            VideoPublishResult::NotConfigured => (
                StageStatus::Skipped,
                Some("YouTube credentials not configured".to_string()),
            ),
            VideoPublishResult::Failed { error, .. } => (StageStatus::Failed, Some(error.clone())),
        };
        ledger.record(StageName::PublishVideo, status, timer.finish(), detail);
        result
    }

    async fn social_stage(
        &self,
        fact: &Fact,
        stored: &StorageRef,
        ledger: &mut StageLedger,
    ) -> SocialPublishResult {
        let timer = StageTimer::start(StageName::PublishSocial.to_string());
        let result = self.social.publish(&stored.key, fact).await;
        let (status, detail) = match &result {
            SocialPublishResult::Published { url, .. } => {
                (StageStatus::Completed, Some(url.clone()))
            }
            SocialPublishResult::Skipped { reason } => (StageStatus::Skipped, Some(reason.clone())),
            SocialPublishResult::Failed { error, .. } => (StageStatus::Failed, Some(error.clone())),
        };
        ledger.record(StageName::PublishSocial, status, timer.finish(), detail);
        result
    }

    /// Runs all five stages; never fails.
    #[instrument(skip(self, seed), fields(run_id = tracing::field::Empty))]
    pub async fn run_full(&self, seed: Option<Fact>) -> PipelineResult {
        let run_id = uuid::Uuid::new_v4().to_string();
        tracing::Span::current().record("run_id", run_id.as_str());
        let mut ledger = StageLedger::new();

        let fact = self.fact_stage(seed, &mut ledger).await;
        let artifact = self.render_stage(&fact, &run_id, &mut ledger).await;

        let storage = match ledger.can_run(StageName::PublishStorage) {
            Ok(()) => self.storage_stage(&artifact, &mut ledger).await,
            Err(reason) => {
                ledger.skip(StageName::PublishStorage, reason);
                None
            }
        };

        let (youtube, instagram) = match (&storage, ledger.can_run(StageName::PublishVideo)) {
            (Some(stored), Ok(())) => {
                let youtube = self.video_stage(&fact, stored, &mut ledger).await;
                let instagram = self.social_stage(&fact, stored, &mut ledger).await;
                (Some(youtube), Some(instagram))
            }
            (_, reason) => {
                let reason = reason.err().unwrap_or_else(|| "no storage reference".to_string());
                ledger.skip(StageName::PublishVideo, reason.clone());
                ledger.skip(StageName::PublishSocial, reason);
                (None, None)
            }
        };

        if artifact.path.to_str() != Some(PLACEHOLDER_PATH) {
            remove_quietly(&artifact.path);
        }

        let result = PipelineResult {
            run_id,
            fact,
            artifact: Some(artifact),
            storage,
            youtube,
            instagram,
            stages: ledger.into_reports(),
        };
        tracing::info!(summary = ?result.summary(), "Pipeline finished");
        result
    }

    /// Generates (or uses) a fact, renders it, and uploads it when storage is
    /// configured. The local artifact is kept.
    #[instrument(skip(self, seed))]
    pub async fn create_video(&self, seed: Option<Fact>) -> VideoRunResult {
        let run_id = uuid::Uuid::new_v4().to_string();
        let mut ledger = StageLedger::new();

        let fact = self.fact_stage(seed, &mut ledger).await;
        let artifact = self.render_stage(&fact, &run_id, &mut ledger).await;
        let storage = self.storage_stage(&artifact, &mut ledger).await;

        VideoRunResult {
            run_id,
            fact,
            artifact,
            storage,
        }
    }
}
