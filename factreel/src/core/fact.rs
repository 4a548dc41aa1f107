//! The fact content unit.

use serde::{Deserialize, Serialize};

/// Category carried by the error sentinel fact.
pub const SENTINEL_CATEGORY: &str = "Error";

/// Maximum title length in characters.
pub const TITLE_MAX_CHARS: usize = 80;

/// Maximum content length in characters.
pub const CONTENT_MAX_CHARS: usize = 200;

const TEST_TITLE: &str = "Test Fact";

/// A short structured fact driving rendering and publishing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fact {
    /// Headline.
    #[serde(default = "default_title")]
    pub title: String,
    /// Body text.
    #[serde(default)]
    pub content: String,
    /// Topic category (e.g. "Science").
    #[serde(default = "default_category")]
    pub category: String,
}

fn default_title() -> String {
    "Interesting Fact".to_string()
}

fn default_category() -> String {
    "General".to_string()
}

impl Fact {
    /// Creates a new fact.
    #[must_use]
    pub fn new(
        title: impl Into<String>,
        content: impl Into<String>,
        category: impl Into<String>,
    ) -> Self {
        Self {
            title: title.into(),
            content: content.into(),
            category: category.into(),
        }
    }

    /// The canned fact used when no completion credential is configured.
    #[must_use]
    pub fn test_fact() -> Self {
        Self::new(
            TEST_TITLE,
            "This is a test fact. Configure OPENAI_API_KEY to generate real facts!",
            "Technology",
        )
    }

    /// The sentinel returned when generation fails.
    #[must_use]
    pub fn error_sentinel(reason: &str) -> Self {
        Self::new(
            "Error Generating Fact",
            format!("Failed to generate fact: {reason}"),
            SENTINEL_CATEGORY,
        )
    }

    /// Returns true if this is the generation-failure sentinel.
    #[must_use]
    pub fn is_sentinel(&self) -> bool {
        self.category == SENTINEL_CATEGORY
    }

    /// Returns true if this is the canned test fact.
    #[must_use]
    pub fn is_test_fact(&self) -> bool {
        *self == Self::test_fact()
    }
}

/// Truncates to at most `max` characters without splitting a code point.
#[must_use]
pub fn truncate_chars(text: &str, max: usize) -> String {
    match text.char_indices().nth(max) {
        Some((idx, _)) => text[..idx].to_string(),
        None => text.to_string(),
    }
}
