//! Fact generation through the completion API.
//!
//! [`FactSource::generate`] never fails: without a completion client it
//! returns the canned test fact, and any API failure yields the error
//! sentinel, which the pipeline treats as a degraded stage.

use regex::Regex;
use std::sync::{Arc, OnceLock};
use tracing::instrument;

use crate::config::OpenAiSettings;
use crate::core::{truncate_chars, Fact, CONTENT_MAX_CHARS, TITLE_MAX_CHARS};
use crate::llm::{ChatMessage, CompletionClient, CompletionRequest};

const SYSTEM_PROMPT: &str = "You are a fact generator that creates interesting, surprising, and \
educational facts. Return facts in JSON format with 'title', 'content', and 'category' fields. \
Keep the title under 80 characters and content under 200 characters.";

const USER_PROMPT: &str = "Generate a fascinating and little-known fact about science, history, \
nature, or technology. Make it engaging and surprising!";

/// Produces one [`Fact`] per call.
#[derive(Clone)]
pub struct FactSource {
    client: Option<Arc<dyn CompletionClient>>,
    temperature: f32,
    max_tokens: u32,
}

impl std::fmt::Debug for FactSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FactSource")
            .field("live", &self.is_live())
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .finish()
    }
}

impl FactSource {
    /// Creates a source backed by `client`, or the test fact when `None`.
    #[must_use]
    pub fn new(client: Option<Arc<dyn CompletionClient>>, settings: &OpenAiSettings) -> Self {
        Self {
            client,
            temperature: settings.temperature,
            max_tokens: settings.max_tokens,
        }
    }

    /// A source that always returns the test fact.
    #[must_use]
    pub fn offline() -> Self {
        Self {
            client: None,
            temperature: 0.7,
            max_tokens: 500,
        }
    }

    /// Returns true if a completion client is configured.
    #[must_use]
    pub fn is_live(&self) -> bool {
        self.client.is_some()
    }

    /// Generates a fact, degrading instead of failing.
    #[instrument(skip(self), fields(live = self.is_live()))]
    pub async fn generate(&self) -> Fact {
        let Some(client) = self.client.as_ref() else {
            tracing::info!("No completion credential configured, using test fact");
            return Fact::test_fact();
        };

        let request = CompletionRequest {
            messages: vec![ChatMessage::system(SYSTEM_PROMPT), ChatMessage::user(USER_PROMPT)],
            temperature: self.temperature,
            max_tokens: self.max_tokens,
        };

        match client.complete(&request).await {
            Ok(text) => {
                let fact = parse_fact_response(&text);
                tracing::info!(title = %fact.title, category = %fact.category, "Generated fact");
                fact
            }
            Err(e) => {
                tracing::error!(error = %e, kind = %e.kind, "Fact generation failed");
                Fact::error_sentinel(&e.message)
            }
        }
    }
}

fn fence_regex() -> Option<&'static Regex> {
    static FENCE: OnceLock<Option<Regex>> = OnceLock::new();
    FENCE
        .get_or_init(|| Regex::new(r"(?s)^\s*```[A-Za-z]*\s*\n?(.*?)\s*```\s*$").ok())
        .as_ref()
}

/// Removes a surrounding Markdown code fence, if any.
#[must_use]
pub fn strip_code_fence(text: &str) -> &str {
    fence_regex()
        .and_then(|re| re.captures(text))
        .and_then(|caps| caps.get(1))
        .map_or_else(|| text.trim(), |m| m.as_str().trim())
}

/// Parses completion text into a fact.
///
/// Structured JSON with non-empty `title` and `content` is used directly;
/// anything else is treated as free text whose first line is the title.
#[must_use]
pub fn parse_fact_response(text: &str) -> Fact {
    let body = strip_code_fence(text);
    if let Some(fact) = parse_structured(body) {
        return fact;
    }
    parse_unstructured(text.trim())
}

fn parse_structured(body: &str) -> Option<Fact> {
    let value: serde_json::Value = serde_json::from_str(body).ok()?;
    let object = value.as_object()?;

    let field = |name: &str| {
        object
            .get(name)
            .and_then(serde_json::Value::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty())
    };

    let title = field("title")?;
    let content = field("content")?;
    let category = field("category").unwrap_or("General");

    Some(Fact::new(
        truncate_chars(title, TITLE_MAX_CHARS),
        truncate_chars(content, CONTENT_MAX_CHARS),
        category,
    ))
}

fn parse_unstructured(text: &str) -> Fact {
    // The remainder keeps its leading whitespace; only the title is trimmed.
    let (first, rest) = match text.split_once('\n') {
        Some((first, rest)) => (first.trim(), rest),
        None => (text, ""),
    };

    let title = if first.is_empty() {
        "Interesting Fact".to_string()
    } else {
        truncate_chars(first, TITLE_MAX_CHARS)
    };
    let content = if rest.trim().is_empty() {
        truncate_chars(text, CONTENT_MAX_CHARS)
    } else {
        truncate_chars(rest, CONTENT_MAX_CHARS)
    };

    Fact::new(title, content, "General")
}
