//! HTTP implementation of [`VideoHost`] for the YouTube Data API.

use async_trait::async_trait;
use reqwest::header::{CONTENT_LENGTH, CONTENT_RANGE, LOCATION, RANGE};
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use std::time::Duration;

use super::{ChunkProgress, VideoHost, VideoMetadata, SERVICE};
use crate::config::YoutubeCredentials;
use crate::errors::ExternalError;

/// OAuth token endpoint.
pub const TOKEN_URI: &str = "https://oauth2.googleapis.com/token";

/// Scope required for uploads.
pub const UPLOAD_SCOPE: &str = "https://www.googleapis.com/auth/youtube.upload";

const UPLOAD_URI: &str =
    "https://www.googleapis.com/upload/youtube/v3/videos?uploadType=resumable&part=snippet,status";

const REQUEST_TIMEOUT_SECS: u64 = 300;

/// Parses a `Range: bytes=0-N` header into the last stored byte index `N`.
#[must_use]
pub fn parse_range_header(value: &str) -> Option<u64> {
    let range = value.trim().strip_prefix("bytes=")?;
    let (_, end) = range.split_once('-')?;
    end.trim().parse().ok()
}

/// Client for the token and resumable upload endpoints.
pub struct YoutubeApi {
    client: Client,
    credentials: YoutubeCredentials,
    token_uri: String,
    upload_uri: String,
}

impl std::fmt::Debug for YoutubeApi {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("YoutubeApi")
            .field("client_id", &self.credentials.client_id)
            .field("token_uri", &self.token_uri)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
}

#[derive(Debug, Deserialize)]
struct InsertedVideo {
    id: String,
}

impl YoutubeApi {
    /// Creates a client for the given credentials.
    pub fn new(credentials: YoutubeCredentials) -> Result<Self, ExternalError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .map_err(|e| ExternalError::local(SERVICE, format!("HTTP client: {e}")))?;
        Ok(Self {
            client,
            credentials,
            token_uri: TOKEN_URI.to_string(),
            upload_uri: UPLOAD_URI.to_string(),
        })
    }

    /// Overrides the endpoints.
    #[must_use]
    pub fn with_endpoints(mut self, token_uri: impl Into<String>, upload_uri: impl Into<String>) -> Self {
        self.token_uri = token_uri.into();
        self.upload_uri = upload_uri.into();
        self
    }
}

async fn error_from(response: reqwest::Response) -> ExternalError {
    let status = response.status().as_u16();
    let body = response.text().await.unwrap_or_default();
    ExternalError::from_status(SERVICE, status, &body)
}

#[async_trait]
impl VideoHost for YoutubeApi {
    async fn refresh_access_token(&self) -> Result<String, ExternalError> {
        let response = self
            .client
            .post(&self.token_uri)
            .form(&[
                ("client_id", self.credentials.client_id.as_str()),
                ("client_secret", self.credentials.client_secret.expose()),
                ("refresh_token", self.credentials.refresh_token.expose()),
                ("grant_type", "refresh_token"),
            ])
            .send()
            .await
            .map_err(|e| ExternalError::from_reqwest(SERVICE, &e))?;

        if !response.status().is_success() {
            return Err(error_from(response).await);
        }
        let token: TokenResponse = response
            .json()
            .await
            .map_err(|e| ExternalError::from_reqwest(SERVICE, &e))?;
        tracing::debug!("Access token refreshed");
        Ok(token.access_token)
    }

    async fn begin_upload(
        &self,
        access_token: &str,
        metadata: &VideoMetadata,
        content_length: u64,
        content_type: &str,
    ) -> Result<String, ExternalError> {
        let response = self
            .client
            .post(&self.upload_uri)
            .bearer_auth(access_token)
            .header("X-Upload-Content-Length", content_length.to_string())
            .header("X-Upload-Content-Type", content_type)
            .json(&metadata.to_resource())
            .send()
            .await
            .map_err(|e| ExternalError::from_reqwest(SERVICE, &e))?;

        if !response.status().is_success() {
            return Err(error_from(response).await);
        }
        response
            .headers()
            .get(LOCATION)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
            .ok_or_else(|| ExternalError::rejected(SERVICE, "Upload session has no Location"))
    }

    async fn upload_chunk(
        &self,
        access_token: &str,
        session_url: &str,
        chunk: Vec<u8>,
        offset: u64,
        total: u64,
    ) -> Result<ChunkProgress, ExternalError> {
        let len = chunk.len() as u64;
        let last = offset + len.saturating_sub(1);
        let response = self
            .client
            .put(session_url)
            .bearer_auth(access_token)
            .header(CONTENT_LENGTH, len)
            .header(CONTENT_RANGE, format!("bytes {offset}-{last}/{total}"))
            .body(chunk)
            .send()
            .await
            .map_err(|e| ExternalError::from_reqwest(SERVICE, &e))?;

        match response.status() {
            StatusCode::PERMANENT_REDIRECT => {
                let next_offset = response
                    .headers()
                    .get(RANGE)
                    .and_then(|v| v.to_str().ok())
                    .and_then(parse_range_header)
                    .map_or(0, |end| end + 1);
                Ok(ChunkProgress::Incomplete { next_offset })
            }
            StatusCode::OK | StatusCode::CREATED => {
                let video: InsertedVideo = response
                    .json()
                    .await
                    .map_err(|e| ExternalError::from_reqwest(SERVICE, &e))?;
                Ok(ChunkProgress::Complete { video_id: video.id })
            }
            _ => Err(error_from(response).await),
        }
    }
}
