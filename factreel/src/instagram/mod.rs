//! Social platform publishing: create a container, poll it, publish it.

mod graph;

pub use graph::GraphClient;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tracing::instrument;

use crate::core::Fact;
use crate::errors::ExternalError;
use crate::polling::{poll_until, Clock, PollOutcome, PollPolicy, PollStep};
use crate::storage::{StoragePublisher, PRESIGN_TTL};

/// Hashtags appended after the category tag.
const FIXED_HASHTAGS: &str = "#dailyfacts #didyouknow #interestingfacts #learning";

/// Processing state of a media container.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ContainerStatus {
    /// Ready to publish.
    Finished,
    /// Processing failed.
    Error,
    /// Not published within the container's lifetime.
    Expired,
    /// Still processing.
    InProgress,
    /// Already published.
    Published,
    /// Anything else the platform reports.
    Unknown(String),
}

impl ContainerStatus {
    /// Parses a `status_code` value.
    #[must_use]
    pub fn parse(code: &str) -> Self {
        match code {
            "FINISHED" => Self::Finished,
            "ERROR" => Self::Error,
            "EXPIRED" => Self::Expired,
            "IN_PROGRESS" => Self::InProgress,
            "PUBLISHED" => Self::Published,
            other => Self::Unknown(other.to_string()),
        }
    }
}

impl fmt::Display for ContainerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Finished => write!(f, "FINISHED"),
            Self::Error => write!(f, "ERROR"),
            Self::Expired => write!(f, "EXPIRED"),
            Self::InProgress => write!(f, "IN_PROGRESS"),
            Self::Published => write!(f, "PUBLISHED"),
            Self::Unknown(code) => write!(f, "{code}"),
        }
    }
}

/// The three Graph API calls used for publishing.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait GraphApi: Send + Sync {
    /// Creates a reels container and returns its id.
    async fn create_container(&self, video_url: &str, caption: &str)
        -> Result<String, ExternalError>;

    /// Reads a container's processing state.
    async fn container_status(&self, creation_id: &str) -> Result<ContainerStatus, ExternalError>;

    /// Publishes a finished container and returns the media id.
    async fn publish_container(&self, creation_id: &str) -> Result<String, ExternalError>;
}

/// Where a social publish stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PublishPhase {
    /// Obtaining a public URL for the artifact.
    Presign,
    /// Creating the container.
    Create,
    /// Waiting for processing.
    Poll,
    /// Publishing the container.
    Publish,
}

impl fmt::Display for PublishPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Presign => write!(f, "presign"),
            Self::Create => write!(f, "create"),
            Self::Poll => write!(f, "poll"),
            Self::Publish => write!(f, "publish"),
        }
    }
}

/// Outcome of a social publish.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SocialPublishResult {
    /// The post is live.
    Published {
        /// Published media id.
        media_id: String,
        /// Container id.
        creation_id: String,
        /// Public post URL.
        url: String,
    },
    /// Nothing was attempted.
    Skipped {
        /// Why.
        reason: String,
    },
    /// A phase failed.
    Failed {
        /// The failing phase.
        phase: PublishPhase,
        /// Human readable detail.
        error: String,
    },
}

impl SocialPublishResult {
    /// Builds the published variant.
    #[must_use]
    pub fn published(media_id: impl Into<String>, creation_id: impl Into<String>) -> Self {
        let media_id = media_id.into();
        let url = format!("https://www.instagram.com/p/{media_id}/");
        Self::Published {
            media_id,
            creation_id: creation_id.into(),
            url,
        }
    }

    /// The post URL, when published.
    #[must_use]
    pub fn url(&self) -> Option<&str> {
        match self {
            Self::Published { url, .. } => Some(url),
            _ => None,
        }
    }

    /// Returns true if the post is live.
    #[must_use]
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Published { .. })
    }

    /// Response shape: `{success, url?, media_id?, error?, skipped?}`.
    #[must_use]
    pub fn to_dict(&self) -> HashMap<String, serde_json::Value> {
        let mut map = HashMap::new();
        map.insert("success".to_string(), serde_json::json!(self.is_success()));
        match self {
            Self::Published {
                media_id,
                creation_id,
                url,
            } => {
                map.insert("media_id".to_string(), serde_json::json!(media_id));
                map.insert("creation_id".to_string(), serde_json::json!(creation_id));
                map.insert("url".to_string(), serde_json::json!(url));
            }
            Self::Skipped { reason } => {
                map.insert("error".to_string(), serde_json::json!(reason));
                map.insert("skipped".to_string(), serde_json::json!(true));
            }
            Self::Failed { phase, error } => {
                map.insert("error".to_string(), serde_json::json!(error));
                map.insert("phase".to_string(), serde_json::json!(phase));
            }
        }
        map
    }
}

/// Composes the post caption.
#[must_use]
pub fn compose_caption(fact: &Fact) -> String {
    let category_tag: String = fact.category.chars().filter(|c| !c.is_whitespace()).collect();
    format!(
        "🧠 {}\n\n{}\n\n#{category_tag} {FIXED_HASHTAGS}",
        fact.title, fact.content
    )
}

/// Publishes stored artifacts as reels.
#[derive(Clone)]
pub struct InstagramPublisher {
    graph: Option<Arc<dyn GraphApi>>,
    storage: Option<Arc<StoragePublisher>>,
    clock: Arc<dyn Clock>,
    policy: PollPolicy,
}

impl fmt::Debug for InstagramPublisher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InstagramPublisher")
            .field("configured", &self.is_configured())
            .field("storage", &self.storage)
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

impl InstagramPublisher {
    /// Creates a publisher; `graph = None` means not configured.
    #[must_use]
    pub fn new(
        graph: Option<Arc<dyn GraphApi>>,
        storage: Option<Arc<StoragePublisher>>,
        clock: Arc<dyn Clock>,
        policy: PollPolicy,
    ) -> Self {
        Self {
            graph,
            storage,
            clock,
            policy,
        }
    }

    /// Returns true if credentials are configured.
    #[must_use]
    pub fn is_configured(&self) -> bool {
        self.graph.is_some()
    }

    /// Publishes the object stored under `storage_key`.
    #[instrument(skip(self, fact), fields(title = %fact.title))]
    pub async fn publish(&self, storage_key: &str, fact: &Fact) -> SocialPublishResult {
        let Some(graph) = self.graph.as_deref() else {
            tracing::info!("Instagram credentials not configured, skipping");
            return SocialPublishResult::Skipped {
                reason: "Instagram credentials not configured".to_string(),
            };
        };
        let Some(storage) = self.storage.as_deref() else {
            return SocialPublishResult::Skipped {
                reason: "No object storage to serve the video from".to_string(),
            };
        };

        let result = self.run_phases(graph, storage, storage_key, fact).await;
        match &result {
            SocialPublishResult::Published { url, .. } => {
                tracing::info!(url = %url, "Published to Instagram");
            }
            SocialPublishResult::Failed { phase, error } => {
                tracing::error!(phase = %phase, error = %error, "Instagram publish failed");
            }
            SocialPublishResult::Skipped { .. } => {}
        }
        result
    }

    async fn run_phases(
        &self,
        graph: &dyn GraphApi,
        storage: &StoragePublisher,
        storage_key: &str,
        fact: &Fact,
    ) -> SocialPublishResult {
        let fail = |phase: PublishPhase, error: String| SocialPublishResult::Failed { phase, error };

        let video_url = match storage.presigned_url(storage_key, PRESIGN_TTL).await {
            Ok(url) => url,
            Err(e) => return fail(PublishPhase::Presign, e.to_string()),
        };

        let caption = compose_caption(fact);
        let creation_id = match graph.create_container(&video_url, &caption).await {
            Ok(id) => id,
            Err(e) => {
                return fail(
                    PublishPhase::Create,
                    format!("Failed to create media container: {e}"),
                )
            }
        };
        tracing::info!(creation_id = %creation_id, "Media container created");

        let outcome = poll_until(&self.policy, self.clock.as_ref(), |attempt| {
            let creation_id = creation_id.clone();
            async move {
                let status = graph.container_status(&creation_id).await?;
                tracing::debug!(attempt = attempt, status = %status, "Container status");
                Ok::<_, ExternalError>(match status {
                    ContainerStatus::Finished => PollStep::Ready(()),
                    ContainerStatus::Error
                    | ContainerStatus::Expired
                    | ContainerStatus::Published => PollStep::Failed(status.to_string()),
                    _ => PollStep::Pending,
                })
            }
        })
        .await;

        match outcome {
            Ok(PollOutcome::Ready { attempts, .. }) => {
                tracing::info!(attempts = attempts, "Media container ready");
            }
            Ok(PollOutcome::Failed { reason, attempts }) => {
                return fail(
                    PublishPhase::Poll,
                    format!("Media container processing failed with status {reason} after {attempts} checks"),
                )
            }
            Ok(PollOutcome::Exhausted { attempts }) => {
                return fail(
                    PublishPhase::Poll,
                    format!(
                        "Media container processing timed out after {attempts} checks ({}s)",
                        self.policy.max_wait().as_secs()
                    ),
                )
            }
            Err(e) => {
                return fail(
                    PublishPhase::Poll,
                    format!("Media container status check failed: {e}"),
                )
            }
        }

        match graph.publish_container(&creation_id).await {
            Ok(media_id) => SocialPublishResult::published(media_id, creation_id),
            Err(e) => fail(PublishPhase::Publish, format!("Failed to publish media: {e}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::polling::ManualClock;
    use crate::storage::MockObjectStore;
    use pretty_assertions::assert_eq;
    use std::time::Duration;

    fn fact() -> Fact {
        Fact::new("Honey Never Spoils", "Edible honey was found in ancient tombs.", "Food Science")
    }

    fn presigning_storage() -> Arc<StoragePublisher> {
        let mut store = MockObjectStore::new();
        store
            .expect_presign_get()
            .returning(|bucket, key, _| Ok(format!("https://{bucket}.s3.amazonaws.com/{key}?sig=1")));
        Arc::new(StoragePublisher::new(Arc::new(store), "reels"))
    }

    fn publisher(graph: MockGraphApi, clock: Arc<ManualClock>) -> InstagramPublisher {
        InstagramPublisher::new(
            Some(Arc::new(graph)),
            Some(presigning_storage()),
            clock,
            PollPolicy::new(Duration::from_secs(10), 30),
        )
    }

    #[test]
    fn test_compose_caption() {
        assert_eq!(
            compose_caption(&fact()),
            "🧠 Honey Never Spoils\n\nEdible honey was found in ancient tombs.\n\n#FoodScience \
             #dailyfacts #didyouknow #interestingfacts #learning"
        );
    }

    #[test]
    fn test_container_status_parse() {
        assert_eq!(ContainerStatus::parse("FINISHED"), ContainerStatus::Finished);
        assert_eq!(ContainerStatus::parse("IN_PROGRESS"), ContainerStatus::InProgress);
        assert_eq!(
            ContainerStatus::parse("WEIRD"),
            ContainerStatus::Unknown("WEIRD".to_string())
        );
        assert_eq!(ContainerStatus::Error.to_string(), "ERROR");
    }

    #[test]
    fn test_skipped_dict_shape() {
        let dict = SocialPublishResult::Skipped {
            reason: "Instagram credentials not configured".to_string(),
        }
        .to_dict();
        assert_eq!(dict["success"], false);
        assert_eq!(dict["skipped"], true);
        assert_eq!(dict["error"], "Instagram credentials not configured");
    }

    #[tokio::test]
    async fn test_unconfigured_makes_no_calls() {
        let publisher = InstagramPublisher::new(
            None,
            Some(Arc::new(StoragePublisher::new(Arc::new(MockObjectStore::new()), "reels"))),
            Arc::new(ManualClock::new()),
            PollPolicy::default(),
        );
        let result = publisher.publish("videos/a.mp4", &fact()).await;
        assert!(matches!(result, SocialPublishResult::Skipped { .. }));
        assert!(!result.is_success());
    }

    #[tokio::test]
    async fn test_publish_happy_path() {
        let mut graph = MockGraphApi::new();
        graph
            .expect_create_container()
            .withf(|url, caption| {
                url.starts_with("https://reels.s3.amazonaws.com/videos/a.mp4")
                    && caption.starts_with("🧠 Honey Never Spoils")
            })
            .times(1)
            .returning(|_, _| Ok("17900000000000001".to_string()));
        let mut checks = 0;
        graph
            .expect_container_status()
            .times(3)
            .returning(move |_| {
                checks += 1;
                Ok(if checks < 3 {
                    ContainerStatus::InProgress
                } else {
                    ContainerStatus::Finished
                })
            });
        graph
            .expect_publish_container()
            .withf(|id| id == "17900000000000001")
            .times(1)
            .returning(|_| Ok("18000000000000002".to_string()));

        let clock = Arc::new(ManualClock::new());
        let result = publisher(graph, clock.clone())
            .publish("videos/a.mp4", &fact())
            .await;

        assert_eq!(
            result,
            SocialPublishResult::published("18000000000000002", "17900000000000001")
        );
        assert_eq!(result.url(), Some("https://www.instagram.com/p/18000000000000002/"));
        assert_eq!(clock.sleeps(), vec![Duration::from_secs(10); 2]);
    }

    #[tokio::test]
    async fn test_container_error_fails_poll_phase() {
        let mut graph = MockGraphApi::new();
        graph
            .expect_create_container()
            .returning(|_, _| Ok("c1".to_string()));
        graph
            .expect_container_status()
            .times(1)
            .returning(|_| Ok(ContainerStatus::Error));
        graph.expect_publish_container().never();

        let result = publisher(graph, Arc::new(ManualClock::new()))
            .publish("videos/a.mp4", &fact())
            .await;

        match result {
            SocialPublishResult::Failed { phase, error } => {
                assert_eq!(phase, PublishPhase::Poll);
                assert!(error.contains("ERROR"));
            }
            other => panic!("expected poll failure, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_polling_exhaustion_fails_with_description() {
        let mut graph = MockGraphApi::new();
        graph
            .expect_create_container()
            .returning(|_, _| Ok("c1".to_string()));
        graph
            .expect_container_status()
            .times(30)
            .returning(|_| Ok(ContainerStatus::InProgress));
        graph.expect_publish_container().never();

        let clock = Arc::new(ManualClock::new());
        let result = publisher(graph, clock.clone())
            .publish("videos/a.mp4", &fact())
            .await;

        assert!(!result.is_success());
        let dict = result.to_dict();
        assert_eq!(dict["success"], false);
        assert!(dict["error"].as_str().unwrap().contains("timed out after 30 checks"));
        assert_eq!(clock.sleeps().len(), 29);
    }

    #[tokio::test]
    async fn test_create_failure() {
        let mut graph = MockGraphApi::new();
        graph
            .expect_create_container()
            .returning(|_, _| Err(ExternalError::rejected("instagram", "HTTP 400: Invalid parameter")));
        graph.expect_container_status().never();

        let result = publisher(graph, Arc::new(ManualClock::new()))
            .publish("videos/a.mp4", &fact())
            .await;

        match result {
            SocialPublishResult::Failed { phase, error } => {
                assert_eq!(phase, PublishPhase::Create);
                assert!(error.starts_with("Failed to create media container"));
            }
            other => panic!("expected create failure, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_already_published_container_stops_polling() {
        let mut graph = MockGraphApi::new();
        graph
            .expect_create_container()
            .returning(|_, _| Ok("c1".to_string()));
        graph
            .expect_container_status()
            .times(1)
            .returning(|_| Ok(ContainerStatus::Published));
        graph.expect_publish_container().never();

        let clock = Arc::new(ManualClock::new());
        let result = publisher(graph, clock.clone())
            .publish("videos/a.mp4", &fact())
            .await;

        match result {
            SocialPublishResult::Failed { phase, error } => {
                assert_eq!(phase, PublishPhase::Poll);
                assert!(error.contains("PUBLISHED after 1 checks"));
            }
            other => panic!("expected poll failure, got {other:?}"),
        }
        assert!(clock.sleeps().is_empty());
    }

    #[tokio::test]
    async fn test_status_check_error_mid_poll() {
        let mut graph = MockGraphApi::new();
        graph
            .expect_create_container()
            .returning(|_, _| Ok("c1".to_string()));
        let mut checks = 0;
        graph
            .expect_container_status()
            .times(2)
            .returning(move |_| {
                checks += 1;
                if checks == 1 {
                    Ok(ContainerStatus::InProgress)
                } else {
                    Err(ExternalError::transient("instagram", "connection reset"))
                }
            });
        graph.expect_publish_container().never();

        let clock = Arc::new(ManualClock::new());
        let result = publisher(graph, clock.clone())
            .publish("videos/a.mp4", &fact())
            .await;

        match result {
            SocialPublishResult::Failed { phase, error } => {
                assert_eq!(phase, PublishPhase::Poll);
                assert!(error.starts_with("Media container status check failed"));
                assert!(error.contains("connection reset"));
            }
            other => panic!("expected poll failure, got {other:?}"),
        }
        assert_eq!(clock.sleeps().len(), 1);
    }

    #[tokio::test]
    async fn test_publish_call_failure() {
        let mut graph = MockGraphApi::new();
        graph
            .expect_create_container()
            .returning(|_, _| Ok("c1".to_string()));
        graph
            .expect_container_status()
            .returning(|_| Ok(ContainerStatus::Finished));
        graph
            .expect_publish_container()
            .times(1)
            .returning(|_| Err(ExternalError::rejected("instagram", "HTTP 400: Media ID is not available")));

        let result = publisher(graph, Arc::new(ManualClock::new()))
            .publish("videos/a.mp4", &fact())
            .await;

        match result {
            SocialPublishResult::Failed { phase, error } => {
                assert_eq!(phase, PublishPhase::Publish);
                assert!(error.starts_with("Failed to publish media"));
                assert!(error.contains("Media ID is not available"));
            }
            other => panic!("expected publish failure, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_presign_failure_makes_no_graph_calls() {
        let mut store = MockObjectStore::new();
        store
            .expect_presign_get()
            .returning(|_, _, _| Err(ExternalError::local("s3", "no credentials in provider chain")));
        let mut graph = MockGraphApi::new();
        graph.expect_create_container().never();

        let publisher = InstagramPublisher::new(
            Some(Arc::new(graph)),
            Some(Arc::new(StoragePublisher::new(Arc::new(store), "reels"))),
            Arc::new(ManualClock::new()),
            PollPolicy::default(),
        );
        let result = publisher.publish("videos/a.mp4", &fact()).await;

        match result {
            SocialPublishResult::Failed { phase, error } => {
                assert_eq!(phase, PublishPhase::Presign);
                assert!(error.contains("no credentials in provider chain"));
            }
            other => panic!("expected presign failure, got {other:?}"),
        }
    }
}
