//! Error types for the factreel pipeline.
//!
//! External-call wrappers return [`ExternalError`], whose [`ErrorKind`] lets
//! callers decide whether to degrade, skip, or surface a failure. Anything that
//! escapes the handler is a [`FactreelError`] and becomes a 500 response.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// The main error type for factreel operations.
#[derive(Debug, Error)]
pub enum FactreelError {
    /// Settings could not be resolved.
    #[error("{0}")]
    Config(#[from] ConfigError),

    /// An external service call failed where the caller could not degrade.
    #[error("{0}")]
    External(#[from] ExternalError),

    /// Rendering failed without a fallback.
    #[error("{0}")]
    Render(#[from] RenderError),

    /// The invocation event was malformed.
    #[error("Invalid event: {0}")]
    InvalidEvent(String),

    /// Serialization/deserialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// How an external call failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Credentials or endpoint settings are absent.
    NotConfigured,
    /// Network failure, timeout, throttling or a 5xx response.
    Transient,
    /// The remote side refused the request or answered with something unusable.
    Rejected,
    /// Local I/O or encoding around the call failed.
    Local,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotConfigured => write!(f, "not_configured"),
            Self::Transient => write!(f, "transient"),
            Self::Rejected => write!(f, "rejected"),
            Self::Local => write!(f, "local"),
        }
    }
}

/// Error returned by every external-call wrapper.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{service} {kind}: {message}")]
pub struct ExternalError {
    /// The service that was being called (e.g. "openai", "s3").
    pub service: String,
    /// The failure class.
    pub kind: ErrorKind,
    /// Human readable detail.
    pub message: String,
}

impl ExternalError {
    /// Creates a new external error.
    #[must_use]
    pub fn new(service: impl Into<String>, kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            service: service.into(),
            kind,
            message: message.into(),
        }
    }

    /// Creates a not-configured error.
    #[must_use]
    pub fn not_configured(service: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(service, ErrorKind::NotConfigured, message)
    }

    /// Creates a transient error.
    #[must_use]
    pub fn transient(service: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(service, ErrorKind::Transient, message)
    }

    /// Creates a rejected error.
    #[must_use]
    pub fn rejected(service: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(service, ErrorKind::Rejected, message)
    }

    /// Creates a local error.
    #[must_use]
    pub fn local(service: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(service, ErrorKind::Local, message)
    }

    /// Classifies a reqwest transport error.
    #[must_use]
    pub fn from_reqwest(service: impl Into<String>, err: &reqwest::Error) -> Self {
        let kind = if err.is_timeout() || err.is_connect() || err.is_request() {
            ErrorKind::Transient
        } else if err.is_decode() || err.is_body() {
            ErrorKind::Rejected
        } else if let Some(status) = err.status() {
            kind_for_status(status.as_u16())
        } else {
            ErrorKind::Transient
        };
        Self::new(service, kind, err.to_string())
    }

    /// Builds an error from a non-success HTTP status and its body.
    #[must_use]
    pub fn from_status(service: impl Into<String>, status: u16, body: &str) -> Self {
        let preview: String = body.chars().take(500).collect();
        Self::new(
            service,
            kind_for_status(status),
            format!("HTTP {status}: {preview}"),
        )
    }

    /// Returns true if the failure is worth reporting as temporary.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        self.kind == ErrorKind::Transient
    }
}

/// Maps an HTTP status to an error kind.
#[must_use]
pub fn kind_for_status(status: u16) -> ErrorKind {
    match status {
        408 | 429 => ErrorKind::Transient,
        500..=599 => ErrorKind::Transient,
        _ => ErrorKind::Rejected,
    }
}

/// Errors raised while resolving settings.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    /// A variable is present but cannot be parsed.
    #[error("Invalid value for {key}: '{value}' ({reason})")]
    InvalidValue {
        /// The variable name.
        key: String,
        /// The offending value.
        value: String,
        /// Why it was rejected.
        reason: String,
    },
}

impl ConfigError {
    /// Creates an invalid value error.
    #[must_use]
    pub fn invalid_value(
        key: impl Into<String>,
        value: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self::InvalidValue {
            key: key.into(),
            value: value.into(),
            reason: reason.into(),
        }
    }
}

/// Errors raised by the artifact renderer.
#[derive(Debug, Error)]
pub enum RenderError {
    /// Image decode/encode failure.
    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    /// Font could not be loaded.
    #[error("Font error: {0}")]
    Font(String),

    /// The encoder exited unsuccessfully or timed out.
    #[error("Encoder error: {0}")]
    Encoder(String),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A blocking render task panicked or was cancelled.
    #[error("Render task failed: {0}")]
    Task(String),
}

/// Result alias for fallible factreel operations.
pub type Result<T, E = FactreelError> = std::result::Result<T, E>;
