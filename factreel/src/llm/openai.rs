//! OpenAI-compatible HTTP client for chat completions and image generation.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::{ChatMessage, CompletionClient, CompletionRequest, ImageGenerator, ImageRequest};
use crate::config::OpenAiSettings;
use crate::errors::ExternalError;

const SERVICE: &str = "openai";

/// Request timeout for API calls.
const REQUEST_TIMEOUT_SECS: u64 = 120;

/// Timeout for downloading a generated image.
const DOWNLOAD_TIMEOUT_SECS: u64 = 30;

/// Client for the completion and image endpoints.
pub struct OpenAiClient {
    client: Client,
    api_key: String,
    base_url: String,
    model: String,
    image_model: String,
}

impl std::fmt::Debug for OpenAiClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiClient")
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .field("image_model", &self.image_model)
            .finish_non_exhaustive()
    }
}

impl OpenAiClient {
    /// Builds a client from settings; returns `None` when no key is configured.
    pub fn from_settings(settings: &OpenAiSettings) -> Result<Option<Self>, ExternalError> {
        let Some(key) = settings.api_key.as_ref() else {
            return Ok(None);
        };
        let client = Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .map_err(|e| ExternalError::local(SERVICE, format!("HTTP client: {e}")))?;

        Ok(Some(Self {
            client,
            api_key: key.expose().to_string(),
            base_url: settings.base_url.clone(),
            model: settings.model.clone(),
            image_model: settings.image_model.clone(),
        }))
    }

    /// The chat model in use.
    #[must_use]
    pub fn model(&self) -> &str {
        &self.model
    }

    async fn post_json<B: Serialize + Sync>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<String, ExternalError> {
        let url = format!("{}/{path}", self.base_url);
        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(body)
            .send()
            .await
            .map_err(|e| ExternalError::from_reqwest(SERVICE, &e))?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| ExternalError::from_reqwest(SERVICE, &e))?;

        if !status.is_success() {
            let detail = api_error_message(&text).unwrap_or(text);
            return Err(ExternalError::from_status(SERVICE, status.as_u16(), &detail));
        }
        Ok(text)
    }
}

#[derive(Debug, Serialize)]
struct ChatBody<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    temperature: f32,
    max_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChatChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Serialize)]
struct ImageBody<'a> {
    model: &'a str,
    prompt: &'a str,
    size: &'a str,
    quality: &'a str,
    n: u8,
}

#[derive(Debug, Deserialize)]
struct ImageResponse {
    #[serde(default)]
    data: Vec<ImageDatum>,
}

#[derive(Debug, Deserialize)]
struct ImageDatum {
    #[serde(default)]
    url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiErrorEnvelope {
    error: ApiErrorBody,
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    message: String,
}

fn api_error_message(body: &str) -> Option<String> {
    serde_json::from_str::<ApiErrorEnvelope>(body)
        .ok()
        .map(|e| e.error.message)
}

/// Extracts the first choice's text from a chat completion body.
fn parse_chat_response(body: &str) -> Result<String, ExternalError> {
    let parsed: ChatResponse = serde_json::from_str(body)
        .map_err(|e| ExternalError::rejected(SERVICE, format!("Malformed completion: {e}")))?;
    parsed
        .choices
        .into_iter()
        .next()
        .and_then(|c| c.message.content)
        .map(|c| c.trim().to_string())
        .filter(|c| !c.is_empty())
        .ok_or_else(|| ExternalError::rejected(SERVICE, "Completion contained no text"))
}

/// Extracts the first image URL from an image-generation body.
fn parse_image_response(body: &str) -> Result<String, ExternalError> {
    let parsed: ImageResponse = serde_json::from_str(body)
        .map_err(|e| ExternalError::rejected(SERVICE, format!("Malformed image response: {e}")))?;
    parsed
        .data
        .into_iter()
        .find_map(|d| d.url)
        .ok_or_else(|| ExternalError::rejected(SERVICE, "Image response contained no URL"))
}

#[async_trait]
impl CompletionClient for OpenAiClient {
    async fn complete(&self, request: &CompletionRequest) -> Result<String, ExternalError> {
        let body = ChatBody {
            model: &self.model,
            messages: &request.messages,
            temperature: request.temperature,
            max_tokens: request.max_tokens,
        };
        let text = self.post_json("chat/completions", &body).await?;
        parse_chat_response(&text)
    }
}

#[async_trait]
impl ImageGenerator for OpenAiClient {
    async fn generate_image(&self, request: &ImageRequest) -> Result<Vec<u8>, ExternalError> {
        let body = ImageBody {
            model: &self.image_model,
            prompt: &request.prompt,
            size: &request.size,
            quality: &request.quality,
            n: 1,
        };
        let text = self.post_json("images/generations", &body).await?;
        let url = parse_image_response(&text)?;
        tracing::debug!(model = %self.image_model, "Downloading generated image");

        let response = self
            .client
            .get(&url)
            .timeout(Duration::from_secs(DOWNLOAD_TIMEOUT_SECS))
            .send()
            .await
            .map_err(|e| ExternalError::from_reqwest(SERVICE, &e))?;
        let status = response.status();
        if !status.is_success() {
            return Err(ExternalError::from_status(
                SERVICE,
                status.as_u16(),
                "image download failed",
            ));
        }
        let bytes = response
            .bytes()
            .await
            .map_err(|e| ExternalError::from_reqwest(SERVICE, &e))?;
        Ok(bytes.to_vec())
    }
}
