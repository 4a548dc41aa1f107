//! Settings resolved once per invocation from the process environment.
//!
//! Components receive `&Settings` (or an `Arc<Settings>`) at construction and
//! never read the environment themselves. Empty variables count as absent.

use crate::errors::ConfigError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

const DEFAULT_OPENAI_BASE_URL: &str = "https://api.openai.com/v1";
const DEFAULT_OPENAI_MODEL: &str = "gpt-3.5-turbo";
const DEFAULT_OPENAI_IMAGE_MODEL: &str = "dall-e-3";
const DEFAULT_AWS_REGION: &str = "us-east-1";
const DEFAULT_GRAPH_VERSION: &str = "v21.0";
const DEFAULT_MUSIC_PATH: &str = "/var/task/background_music.mp3";
const DEFAULT_TITLE_FONT: &str = "/usr/share/fonts/truetype/dejavu/DejaVuSans-Bold.ttf";
const DEFAULT_BODY_FONT: &str = "/usr/share/fonts/truetype/dejavu/DejaVuSans.ttf";

/// A credential whose value never appears in `Debug` output or logs.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Secret(String);

impl Secret {
    /// Wraps a secret value.
    #[must_use]
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Returns the raw value for use in a request.
    #[must_use]
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Secret(***)")
    }
}

/// Completion and image-generation settings.
#[derive(Debug, Clone)]
pub struct OpenAiSettings {
    /// API key; absent means the fact source returns the test fact.
    pub api_key: Option<Secret>,
    /// API root.
    pub base_url: String,
    /// Chat model.
    pub model: String,
    /// Sampling temperature.
    pub temperature: f32,
    /// Completion token budget.
    pub max_tokens: u32,
    /// Image model.
    pub image_model: String,
}

/// Object storage settings.
#[derive(Debug, Clone)]
pub struct StorageSettings {
    /// Bucket; absent means the storage stage is skipped.
    pub bucket: Option<String>,
    /// AWS region.
    pub region: String,
}

/// OAuth credentials for the video platform.
#[derive(Debug, Clone)]
pub struct YoutubeCredentials {
    /// OAuth client id.
    pub client_id: String,
    /// OAuth client secret.
    pub client_secret: Secret,
    /// Long-lived refresh token.
    pub refresh_token: Secret,
}

/// Graph API credentials for the social platform.
#[derive(Debug, Clone)]
pub struct InstagramCredentials {
    /// Business account id.
    pub user_id: String,
    /// Long-lived page access token.
    pub access_token: Secret,
}

/// Social platform settings.
#[derive(Debug, Clone)]
pub struct InstagramSettings {
    /// Credentials, when both parts are present.
    pub credentials: Option<InstagramCredentials>,
    /// Graph API version segment.
    pub graph_version: String,
    /// Delay between container status checks.
    pub poll_interval: Duration,
    /// Maximum number of status checks.
    pub poll_max_attempts: u32,
}

/// Rendering settings.
#[derive(Debug, Clone)]
pub struct RenderSettings {
    /// Explicit encoder binary.
    pub ffmpeg_path: Option<PathBuf>,
    /// Audio bed muxed into videos when present.
    pub background_music_path: PathBuf,
    /// Bold font for titles.
    pub title_font_path: PathBuf,
    /// Regular font for body and category text.
    pub body_font_path: PathBuf,
    /// Video length in seconds.
    pub video_duration_secs: u32,
    /// Video frame rate.
    pub video_fps: u32,
    /// Directory for local artifacts.
    pub work_dir: PathBuf,
}

/// All settings for one invocation.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Completion and image generation.
    pub openai: OpenAiSettings,
    /// Object storage.
    pub storage: StorageSettings,
    /// Video platform credentials, when all three parts are present.
    pub youtube: Option<YoutubeCredentials>,
    /// Social platform.
    pub instagram: InstagramSettings,
    /// Rendering.
    pub render: RenderSettings,
}

impl Settings {
    /// Reads settings from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Reads settings through an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let openai = OpenAiSettings {
            api_key: get("OPENAI_API_KEY").map(Secret::new),
            base_url: get("OPENAI_BASE_URL")
                .unwrap_or_else(|| DEFAULT_OPENAI_BASE_URL.to_string())
                .trim_end_matches('/')
                .to_string(),
            model: get("OPENAI_MODEL").unwrap_or_else(|| DEFAULT_OPENAI_MODEL.to_string()),
            temperature: parse_or("OPENAI_TEMPERATURE", get("OPENAI_TEMPERATURE"), 0.7)?,
            max_tokens: parse_or("OPENAI_MAX_TOKENS", get("OPENAI_MAX_TOKENS"), 500)?,
            image_model: get("OPENAI_IMAGE_MODEL")
                .unwrap_or_else(|| DEFAULT_OPENAI_IMAGE_MODEL.to_string()),
        };

        let storage = StorageSettings {
            bucket: get("S3_BUCKET"),
            region: get("AWS_REGION").unwrap_or_else(|| DEFAULT_AWS_REGION.to_string()),
        };

        let youtube = match (
            get("YOUTUBE_CLIENT_ID"),
            get("YOUTUBE_CLIENT_SECRET"),
            get("YOUTUBE_REFRESH_TOKEN"),
        ) {
            (Some(client_id), Some(secret), Some(refresh)) => Some(YoutubeCredentials {
                client_id,
                client_secret: Secret::new(secret),
                refresh_token: Secret::new(refresh),
            }),
            _ => None,
        };

        let instagram = InstagramSettings {
            credentials: match (get("INSTAGRAM_USER_ID"), get("INSTAGRAM_ACCESS_TOKEN")) {
                (Some(user_id), Some(token)) => Some(InstagramCredentials {
                    user_id,
                    access_token: Secret::new(token),
                }),
                _ => None,
            },
            graph_version: get("INSTAGRAM_GRAPH_VERSION")
                .unwrap_or_else(|| DEFAULT_GRAPH_VERSION.to_string()),
            poll_interval: Duration::from_secs(parse_or(
                "INSTAGRAM_POLL_INTERVAL_SECS",
                get("INSTAGRAM_POLL_INTERVAL_SECS"),
                10,
            )?),
            poll_max_attempts: parse_nonzero(
                "INSTAGRAM_POLL_MAX_ATTEMPTS",
                get("INSTAGRAM_POLL_MAX_ATTEMPTS"),
                30,
            )?,
        };

        let render = RenderSettings {
            ffmpeg_path: get("FFMPEG_PATH").map(PathBuf::from),
            background_music_path: PathBuf::from(
                get("BACKGROUND_MUSIC_PATH").unwrap_or_else(|| DEFAULT_MUSIC_PATH.to_string()),
            ),
            title_font_path: PathBuf::from(
                get("TITLE_FONT_PATH").unwrap_or_else(|| DEFAULT_TITLE_FONT.to_string()),
            ),
            body_font_path: PathBuf::from(
                get("BODY_FONT_PATH").unwrap_or_else(|| DEFAULT_BODY_FONT.to_string()),
            ),
            video_duration_secs: parse_nonzero("VIDEO_DURATION_SECS", get("VIDEO_DURATION_SECS"), 15)?,
            video_fps: parse_nonzero("VIDEO_FPS", get("VIDEO_FPS"), 30)?,
            work_dir: get("FACTREEL_WORK_DIR").map_or_else(std::env::temp_dir, PathBuf::from),
        };

        Ok(Self {
            openai,
            storage,
            youtube,
            instagram,
            render,
        })
    }

    /// Logs which credentials are present, never their values.
    pub fn log_summary(&self) {
        tracing::info!(
            bucket = self.storage.bucket.as_deref().unwrap_or("<unset>"),
            region = %self.storage.region,
            openai = presence(self.openai.api_key.is_some()),
            youtube = presence(self.youtube.is_some()),
            instagram = presence(self.instagram.credentials.is_some()),
            "Settings resolved"
        );
    }
}

fn presence(set: bool) -> &'static str {
    if set {
        "set"
    } else {
        "not set"
    }
}

fn parse_or<T>(key: &str, raw: Option<String>, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: fmt::Display,
{
    match raw {
        None => Ok(default),
        Some(value) => value
            .parse::<T>()
            .map_err(|e| ConfigError::invalid_value(key, value.clone(), e.to_string())),
    }
}

fn parse_nonzero(key: &str, raw: Option<String>, default: u32) -> Result<u32, ConfigError> {
    match parse_or(key, raw, default)? {
        0 => Err(ConfigError::invalid_value(key, "0", "must be greater than zero")),
        n => Ok(n),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn settings_from(pairs: &[(&str, &str)]) -> Result<Settings, ConfigError> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        Settings::from_lookup(|key| map.get(key).cloned())
    }

    #[test]
    fn test_empty_environment_uses_defaults() {
        let settings = settings_from(&[]).unwrap();

        assert!(settings.openai.api_key.is_none());
        assert_eq!(settings.openai.model, "gpt-3.5-turbo");
        assert!((settings.openai.temperature - 0.7).abs() < f32::EPSILON);
        assert_eq!(settings.openai.max_tokens, 500);
        assert!(settings.storage.bucket.is_none());
        assert_eq!(settings.storage.region, "us-east-1");
        assert!(settings.youtube.is_none());
        assert!(settings.instagram.credentials.is_none());
        assert_eq!(settings.instagram.graph_version, "v21.0");
        assert_eq!(settings.instagram.poll_interval, Duration::from_secs(10));
        assert_eq!(settings.instagram.poll_max_attempts, 30);
        assert_eq!(settings.render.video_duration_secs, 15);
        assert_eq!(settings.render.video_fps, 30);
    }

    #[test]
    fn test_empty_values_count_as_absent() {
        let settings = settings_from(&[("OPENAI_API_KEY", "  "), ("S3_BUCKET", "")]).unwrap();
        assert!(settings.openai.api_key.is_none());
        assert!(settings.storage.bucket.is_none());
    }

    #[test]
    fn test_partial_youtube_credentials_are_absent() {
        let settings = settings_from(&[
            ("YOUTUBE_CLIENT_ID", "id"),
            ("YOUTUBE_CLIENT_SECRET", "secret"),
        ])
        .unwrap();
        assert!(settings.youtube.is_none());

        let settings = settings_from(&[
            ("YOUTUBE_CLIENT_ID", "id"),
            ("YOUTUBE_CLIENT_SECRET", "secret"),
            ("YOUTUBE_REFRESH_TOKEN", "refresh"),
        ])
        .unwrap();
        let creds = settings.youtube.unwrap();
        assert_eq!(creds.client_id, "id");
        assert_eq!(creds.refresh_token.expose(), "refresh");
    }

    #[test]
    fn test_invalid_number_is_error() {
        let err = settings_from(&[("VIDEO_FPS", "fast")]).unwrap_err();
        match err {
            ConfigError::InvalidValue { key, value, .. } => {
                assert_eq!(key, "VIDEO_FPS");
                assert_eq!(value, "fast");
            }
        }
    }

    #[test]
    fn test_zero_counts_are_rejected() {
        for key in ["INSTAGRAM_POLL_MAX_ATTEMPTS", "VIDEO_FPS", "VIDEO_DURATION_SECS"] {
            let err = settings_from(&[(key, "0")]).unwrap_err();
            assert_eq!(
                err,
                ConfigError::invalid_value(key, "0", "must be greater than zero")
            );
        }
        let settings = settings_from(&[("INSTAGRAM_POLL_MAX_ATTEMPTS", "1")]).unwrap();
        assert_eq!(settings.instagram.poll_max_attempts, 1);
    }

    #[test]
    fn test_base_url_trailing_slash_trimmed() {
        let settings = settings_from(&[("OPENAI_BASE_URL", "http://localhost:8080/v1/")]).unwrap();
        assert_eq!(settings.openai.base_url, "http://localhost:8080/v1");
    }

    #[test]
    fn test_debug_masks_secrets() {
        let settings = settings_from(&[
            ("OPENAI_API_KEY", "sk-very-secret"),
            ("INSTAGRAM_USER_ID", "1789"),
            ("INSTAGRAM_ACCESS_TOKEN", "EAAG-secret"),
        ])
        .unwrap();
        let debug = format!("{settings:?}");
        assert!(!debug.contains("sk-very-secret"));
        assert!(!debug.contains("EAAG-secret"));
        assert!(debug.contains("1789"));
    }
}
