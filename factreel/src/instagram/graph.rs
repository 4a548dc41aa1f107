//! Graph API implementation of [`GraphApi`].

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;

use super::{ContainerStatus, GraphApi};
use crate::config::InstagramCredentials;
use crate::errors::ExternalError;

const SERVICE: &str = "instagram";

const GRAPH_HOST: &str = "https://graph.facebook.com";

const REQUEST_TIMEOUT_SECS: u64 = 60;

#[derive(Debug, Deserialize)]
struct IdResponse {
    id: String,
}

#[derive(Debug, Deserialize)]
struct StatusResponse {
    #[serde(default)]
    status_code: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GraphErrorEnvelope {
    error: GraphErrorBody,
}

#[derive(Debug, Deserialize)]
struct GraphErrorBody {
    message: String,
    #[serde(default, rename = "type")]
    error_type: Option<String>,
    #[serde(default)]
    code: Option<i64>,
}

/// Formats a Graph error body, or `None` if the body is not one.
fn graph_error_message(body: &str) -> Option<String> {
    let envelope: GraphErrorEnvelope = serde_json::from_str(body).ok()?;
    let err = envelope.error;
    let mut message = err.message;
    if let Some(kind) = err.error_type {
        message = format!("{kind}: {message}");
    }
    if let Some(code) = err.code {
        message = format!("{message} (code {code})");
    }
    Some(message)
}

/// Client for one business account.
pub struct GraphClient {
    client: Client,
    credentials: InstagramCredentials,
    base_url: String,
}

impl std::fmt::Debug for GraphClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GraphClient")
            .field("user_id", &self.credentials.user_id)
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

impl GraphClient {
    /// Creates a client for `credentials` at the given API version.
    pub fn new(credentials: InstagramCredentials, version: &str) -> Result<Self, ExternalError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .map_err(|e| ExternalError::local(SERVICE, format!("HTTP client: {e}")))?;
        Ok(Self {
            client,
            credentials,
            base_url: format!("{GRAPH_HOST}/{version}"),
        })
    }

    /// Overrides the API root.
    #[must_use]
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// The versioned API root.
    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn read_json<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T, ExternalError> {
        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| ExternalError::from_reqwest(SERVICE, &e))?;
        if !status.is_success() {
            let detail = graph_error_message(&body).unwrap_or(body);
            return Err(ExternalError::from_status(SERVICE, status.as_u16(), &detail));
        }
        serde_json::from_str(&body)
            .map_err(|e| ExternalError::rejected(SERVICE, format!("Unexpected response: {e}")))
    }
}

#[async_trait]
impl GraphApi for GraphClient {
    async fn create_container(
        &self,
        video_url: &str,
        caption: &str,
    ) -> Result<String, ExternalError> {
        let url = format!("{}/{}/media", self.base_url, self.credentials.user_id);
        let response = self
            .client
            .post(&url)
            .form(&[
                ("media_type", "REELS"),
                ("video_url", video_url),
                ("caption", caption),
                ("access_token", self.credentials.access_token.expose()),
            ])
            .send()
            .await
            .map_err(|e| ExternalError::from_reqwest(SERVICE, &e))?;
        let created: IdResponse = Self::read_json(response).await?;
        Ok(created.id)
    }

    async fn container_status(&self, creation_id: &str) -> Result<ContainerStatus, ExternalError> {
        let url = format!("{}/{creation_id}", self.base_url);
        let response = self
            .client
            .get(&url)
            .query(&[
                ("fields", "status_code"),
                ("access_token", self.credentials.access_token.expose()),
            ])
            .send()
            .await
            .map_err(|e| ExternalError::from_reqwest(SERVICE, &e))?;
        let status: StatusResponse = Self::read_json(response).await?;
        Ok(status
            .status_code
            .as_deref()
            .map_or(ContainerStatus::Unknown(String::new()), ContainerStatus::parse))
    }

    async fn publish_container(&self, creation_id: &str) -> Result<String, ExternalError> {
        let url = format!("{}/{}/media_publish", self.base_url, self.credentials.user_id);
        let response = self
            .client
            .post(&url)
            .form(&[
                ("creation_id", creation_id),
                ("access_token", self.credentials.access_token.expose()),
            ])
            .send()
            .await
            .map_err(|e| ExternalError::from_reqwest(SERVICE, &e))?;
        let published: IdResponse = Self::read_json(response).await?;
        Ok(published.id)
    }
}
