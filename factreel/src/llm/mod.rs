//! Completion and image-generation seams.
//!
//! The fact source and the background renderer depend on these traits, not
//! on a concrete HTTP client, so tests can substitute mocks.

mod openai;

pub use openai::OpenAiClient;

use crate::errors::ExternalError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// A single chat message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    /// "system", "user" or "assistant".
    pub role: String,
    /// Message text.
    pub content: String,
}

impl ChatMessage {
    /// Creates a system message.
    #[must_use]
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
        }
    }

    /// Creates a user message.
    #[must_use]
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }
}

/// A chat completion request.
#[derive(Debug, Clone, PartialEq)]
pub struct CompletionRequest {
    /// Conversation so far.
    pub messages: Vec<ChatMessage>,
    /// Sampling temperature.
    pub temperature: f32,
    /// Completion token budget.
    pub max_tokens: u32,
}

/// An image-generation request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageRequest {
    /// Text prompt.
    pub prompt: String,
    /// Size string understood by the API, e.g. "1792x1024".
    pub size: String,
    /// Quality tier, e.g. "standard".
    pub quality: String,
}

impl ImageRequest {
    /// Creates a request at the landscape size used for backgrounds.
    #[must_use]
    pub fn landscape(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            size: "1792x1024".to_string(),
            quality: "standard".to_string(),
        }
    }
}

/// Text completion.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CompletionClient: Send + Sync {
    /// Returns the text of the first choice.
    async fn complete(&self, request: &CompletionRequest) -> Result<String, ExternalError>;
}

/// Image generation.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ImageGenerator: Send + Sync {
    /// Generates an image and returns its encoded bytes.
    async fn generate_image(&self, request: &ImageRequest) -> Result<Vec<u8>, ExternalError>;
}
