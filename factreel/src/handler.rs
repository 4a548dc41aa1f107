//! Event-driven entry point.
//!
//! An invocation event is a JSON object with an `action` and an optional
//! `fact_data`. The handler always answers with a JSON object carrying a
//! `statusCode`: 200 for every completed action (even when a stage inside the
//! pipeline failed) and 500 only for fatal errors.

use serde::Serialize;
use serde_json::{json, Map, Value};
use tracing::instrument;

use crate::config::Settings;
use crate::core::Fact;
use crate::errors::FactreelError;
use crate::pipeline::Pipeline;

/// Timestamp layout used in responses.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.6f+00:00";

/// Current UTC time in [`TIMESTAMP_FORMAT`].
#[must_use]
pub fn timestamp() -> String {
    chrono::Utc::now().format(TIMESTAMP_FORMAT).to_string()
}

/// Recognised event actions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    /// Generate one fact.
    GenerateFact,
    /// Generate (or accept) a fact and render it.
    CreateVideo,
    /// Run all five stages.
    FullPipeline,
}

impl Action {
    /// Parses an action name.
    #[must_use]
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "generate_fact" => Some(Self::GenerateFact),
            "create_video" => Some(Self::CreateVideo),
            "full_pipeline" => Some(Self::FullPipeline),
            _ => None,
        }
    }
}

/// Response object returned to the caller.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HandlerResponse {
    /// HTTP-style status code.
    #[serde(rename = "statusCode")]
    pub status_code: u16,
    /// Remaining response fields.
    #[serde(flatten)]
    pub body: Map<String, Value>,
}

impl HandlerResponse {
    fn ok(message: &str) -> Self {
        let mut body = Map::new();
        body.insert("message".to_string(), json!(message));
        body.insert("timestamp".to_string(), json!(timestamp()));
        Self {
            status_code: 200,
            body,
        }
    }

    /// A 500 response for a fatal error.
    #[must_use]
    pub fn error(err: &FactreelError) -> Self {
        let message = format!("❌ Lambda execution failed: {err}");
        tracing::error!(error = %err, "Invocation failed");
        let mut body = Map::new();
        body.insert("error".to_string(), json!(message));
        body.insert("timestamp".to_string(), json!(timestamp()));
        Self {
            status_code: 500,
            body,
        }
    }

    fn with(mut self, key: &str, value: impl Serialize) -> Self {
        let value = serde_json::to_value(value).unwrap_or(Value::Null);
        self.body.insert(key.to_string(), value);
        self
    }

    /// Returns true for a 500 response.
    #[must_use]
    pub fn is_error(&self) -> bool {
        self.status_code >= 500
    }

    /// Looks up a body field.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.body.get(key)
    }

    /// The full response as one JSON object.
    #[must_use]
    pub fn to_value(&self) -> Value {
        let mut map = self.body.clone();
        map.insert("statusCode".to_string(), json!(self.status_code));
        Value::Object(map)
    }
}

/// Extracts `fact_data` from an event.
///
/// A missing, null or empty object means "generate one". Anything other than
/// an object is rejected.
pub fn fact_from_event(event: &Value) -> Result<Option<Fact>, FactreelError> {
    match event.get("fact_data") {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Object(map)) if map.is_empty() => Ok(None),
        Some(value @ Value::Object(_)) => Ok(Some(serde_json::from_value(value.clone())?)),
        Some(other) => Err(FactreelError::InvalidEvent(format!(
            "fact_data must be an object, got {other}"
        ))),
    }
}

/// Handles one event against an assembled pipeline.
#[instrument(skip_all, fields(action = tracing::field::Empty))]
pub async fn handle(pipeline: &Pipeline, event: &Value) -> HandlerResponse {
    let action_name = event.get("action").and_then(Value::as_str);
    tracing::Span::current().record("action", action_name.unwrap_or("none"));
    tracing::info!(event = %event, "Invocation started");

    match dispatch(pipeline, event, action_name).await {
        Ok(response) => {
            tracing::info!(status_code = response.status_code, "Invocation finished");
            response
        }
        Err(e) => HandlerResponse::error(&e),
    }
}

async fn dispatch(
    pipeline: &Pipeline,
    event: &Value,
    action_name: Option<&str>,
) -> Result<HandlerResponse, FactreelError> {
    let Some(action) = action_name.and_then(Action::parse) else {
        return Ok(HandlerResponse::ok("Lambda function is working! 🎉")
            .with("event", event)
            .with("action_detected", action_name));
    };

    let response = match action {
        Action::GenerateFact => {
            let fact = pipeline.generate_fact().await;
            HandlerResponse::ok("Fact generated successfully! 🎉")
                .with("fact", &fact)
                .with("openai_used", pipeline.uses_live_facts())
        }
        Action::CreateVideo => {
            let seed = fact_from_event(event)?;
            let run = pipeline.create_video(seed).await;
            HandlerResponse::ok("Video created successfully! 🎬")
                .with("fact", &run.fact)
                .with("video_path", run.artifact.path_string())
                .with("s3_url", run.storage.as_ref().map(|s| s.url.as_str()))
        }
        Action::FullPipeline => {
            let seed = fact_from_event(event)?;
            let result = pipeline.run_full(seed).await;
            HandlerResponse::ok("Full pipeline completed! 🎉")
                .with("fact", &result.fact)
                .with(
                    "video_path",
                    result.artifact.as_ref().map(|a| a.path_string()),
                )
                .with("s3_url", result.s3_url())
                .with("youtube_url", result.youtube_url())
                .with("instagram_url", result.instagram_url())
                .with("youtube", result.youtube.as_ref().map(|r| r.to_dict()))
                .with("instagram", result.instagram.as_ref().map(|r| r.to_dict()))
                .with("stages", &result.stages)
                .with("run_id", &result.run_id)
        }
    };
    Ok(response.with("event_processed", true))
}

/// Builds a pipeline from `settings` and handles one event.
///
/// Construction failures become a 500 response.
pub async fn invoke(settings: &Settings, event: &Value) -> HandlerResponse {
    match Pipeline::from_settings(settings).await {
        Ok(pipeline) => handle(&pipeline, event).await,
        Err(e) => HandlerResponse::error(&e),
    }
}

/// Resolves settings from the process environment, then calls [`invoke`].
pub async fn invoke_from_env(event: &Value) -> HandlerResponse {
    match Settings::from_env() {
        Ok(settings) => invoke(&settings, event).await,
        Err(e) => HandlerResponse::error(&FactreelError::from(e)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::ConfigError;
    use crate::fact::FactSource;
    use crate::instagram::InstagramPublisher;
    use crate::polling::{ManualClock, PollPolicy};
    use crate::render::Renderer;
    use crate::youtube::YoutubePublisher;
    use pretty_assertions::assert_eq;
    use std::sync::Arc;

    fn offline_pipeline(dir: &std::path::Path) -> Pipeline {
        Pipeline::new(
            FactSource::offline(),
            Renderer::minimal(dir),
            None,
            YoutubePublisher::new(None, dir),
            InstagramPublisher::new(None, None, Arc::new(ManualClock::new()), PollPolicy::default()),
        )
    }

    #[test]
    fn test_action_parse() {
        assert_eq!(Action::parse("generate_fact"), Some(Action::GenerateFact));
        assert_eq!(Action::parse("full_pipeline"), Some(Action::FullPipeline));
        assert_eq!(Action::parse("Generate_Fact"), None);
    }

    #[test]
    fn test_timestamp_format() {
        let ts = timestamp();
        assert!(ts.ends_with("+00:00"));
        assert!(chrono::DateTime::parse_from_rfc3339(&ts).is_ok());
    }

    #[test]
    fn test_fact_from_event() {
        assert_eq!(fact_from_event(&json!({})).unwrap(), None);
        assert_eq!(fact_from_event(&json!({"fact_data": null})).unwrap(), None);
        assert_eq!(fact_from_event(&json!({"fact_data": {}})).unwrap(), None);

        let fact = fact_from_event(&json!({"fact_data": {"title": "T", "content": "C"}}))
            .unwrap()
            .unwrap();
        assert_eq!(fact, Fact::new("T", "C", "General"));

        assert!(matches!(
            fact_from_event(&json!({"fact_data": "oops"})),
            Err(FactreelError::InvalidEvent(_))
        ));
        assert!(fact_from_event(&json!({"fact_data": {"title": 3}})).is_err());
    }

    #[tokio::test]
    async fn test_generate_fact_without_credentials() {
        let dir = tempfile::tempdir().unwrap();
        let response = handle(&offline_pipeline(dir.path()), &json!({"action": "generate_fact"})).await;

        assert_eq!(response.status_code, 200);
        assert_eq!(response.get("message"), Some(&json!("Fact generated successfully! 🎉")));
        assert_eq!(response.get("fact").unwrap()["title"], "Test Fact");
        assert_eq!(response.get("fact").unwrap()["category"], "Technology");
        assert_eq!(response.get("openai_used"), Some(&json!(false)));
        assert_eq!(response.get("event_processed"), Some(&json!(true)));
    }

    #[tokio::test]
    async fn test_unknown_action_echoes_event() {
        let dir = tempfile::tempdir().unwrap();
        let event = json!({"action": "dance", "x": 1});
        let response = handle(&offline_pipeline(dir.path()), &event).await;

        assert_eq!(response.status_code, 200);
        assert_eq!(response.get("event"), Some(&event));
        assert_eq!(response.get("action_detected"), Some(&json!("dance")));
        assert!(response.get("event_processed").is_none());

        let response = handle(&offline_pipeline(dir.path()), &json!({})).await;
        assert_eq!(response.get("action_detected"), Some(&Value::Null));
    }

    #[tokio::test]
    async fn test_malformed_fact_data_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let event = json!({"action": "create_video", "fact_data": [1, 2]});
        let response = handle(&offline_pipeline(dir.path()), &event).await;

        assert!(response.is_error());
        let error = response.get("error").unwrap().as_str().unwrap();
        assert!(error.starts_with("❌ Lambda execution failed: Invalid event"));
        assert!(response.get("timestamp").is_some());
    }

    #[tokio::test]
    async fn test_create_video_uses_fact_data() {
        let dir = tempfile::tempdir().unwrap();
        let event = json!({
            "action": "create_video",
            "fact_data": {"title": "Bees", "content": "Bees can recognise faces.", "category": "Nature"}
        });
        let response = handle(&offline_pipeline(dir.path()), &event).await;

        assert_eq!(response.status_code, 200);
        assert_eq!(response.get("fact").unwrap()["title"], "Bees");
        assert_eq!(response.get("s3_url"), Some(&Value::Null));
        let path = response.get("video_path").unwrap().as_str().unwrap();
        assert!(std::path::Path::new(path).is_file());
    }

    #[tokio::test]
    async fn test_full_pipeline_response_shape() {
        let dir = tempfile::tempdir().unwrap();
        let response = handle(
            &offline_pipeline(dir.path()),
            &json!({"action": "full_pipeline"}),
        )
        .await;

        assert_eq!(response.status_code, 200);
        assert_eq!(response.get("youtube_url"), Some(&Value::Null));
        assert_eq!(response.get("instagram_url"), Some(&Value::Null));
        assert_eq!(response.get("s3_url"), Some(&Value::Null));
        assert_eq!(response.get("stages").unwrap().as_array().unwrap().len(), 5);

        let value = response.to_value();
        assert_eq!(value["statusCode"], 200);
        assert_eq!(value["message"], "Full pipeline completed! 🎉");
    }

    #[test]
    fn test_error_response_serialization() {
        let err = FactreelError::from(ConfigError::invalid_value("VIDEO_FPS", "abc", "not a number"));
        let response = HandlerResponse::error(&err);
        let value = serde_json::to_value(&response).unwrap();
        assert_eq!(value["statusCode"], 500);
        assert!(value["error"].as_str().unwrap().contains("VIDEO_FPS"));
    }
}
