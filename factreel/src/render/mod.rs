//! Artifact rendering: background, text overlay and optional video.
//!
//! Every sub-step degrades instead of failing. The renderer only reports the
//! placeholder path when not even a fallback still could be written.

pub mod background;
pub mod text;
pub mod video;

pub use background::{gradient, CANVAS_HEIGHT, CANVAS_WIDTH};
pub use text::{wrap_text, FixedAdvance, Fonts, TextMeasure, MAX_LINE_WIDTH};
pub use video::{locate_encoder, VideoEncoder};

use image::codecs::jpeg::JpegEncoder;
use image::RgbImage;
use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::instrument;

use crate::config::RenderSettings;
use crate::core::{ArtifactKind, BackgroundSource, Fact, RenderedArtifact};
use crate::errors::RenderError;
use crate::llm::ImageGenerator;

/// JPEG quality for stills.
pub const JPEG_QUALITY: u8 = 95;

/// Writes an RGB image as JPEG.
pub fn save_jpeg(image: &RgbImage, path: &Path) -> Result<(), RenderError> {
    let writer = BufWriter::new(File::create(path)?);
    let mut encoder = JpegEncoder::new_with_quality(writer, JPEG_QUALITY);
    encoder.encode_image(image)?;
    Ok(())
}

/// Removes a file, logging instead of failing.
pub fn remove_quietly(path: &Path) {
    if let Err(e) = std::fs::remove_file(path) {
        tracing::debug!(path = %path.display(), error = %e, "Could not remove file");
    }
}

struct Still {
    path: PathBuf,
    background: BackgroundSource,
    degraded: bool,
}

/// Turns a fact into a local image or video file.
pub struct Renderer {
    generator: Option<Arc<dyn ImageGenerator>>,
    fonts: Option<Arc<Fonts>>,
    encoder: Option<VideoEncoder>,
    music_path: PathBuf,
    work_dir: PathBuf,
}

impl std::fmt::Debug for Renderer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Renderer")
            .field("generator", &self.generator.is_some())
            .field("fonts", &self.fonts.is_some())
            .field("encoder", &self.encoder)
            .field("music_path", &self.music_path)
            .field("work_dir", &self.work_dir)
            .finish()
    }
}

impl Renderer {
    /// Builds a renderer, resolving fonts and the encoder once.
    #[must_use]
    pub fn from_settings(
        settings: &RenderSettings,
        generator: Option<Arc<dyn ImageGenerator>>,
    ) -> Self {
        let fonts = match Fonts::load(&settings.title_font_path, &settings.body_font_path) {
            Ok(fonts) => Some(Arc::new(fonts)),
            Err(e) => {
                tracing::warn!(error = %e, "Fonts unavailable, text will not be drawn");
                None
            }
        };
        let encoder = locate_encoder(settings.ffmpeg_path.as_deref()).map(|binary| {
            tracing::info!(binary = %binary.display(), "Found video encoder");
            VideoEncoder::new(binary, settings.video_duration_secs, settings.video_fps)
        });
        if encoder.is_none() {
            tracing::warn!("No video encoder found, artifacts will be still images");
        }

        Self {
            generator,
            fonts,
            encoder,
            music_path: settings.background_music_path.clone(),
            work_dir: settings.work_dir.clone(),
        }
    }

    /// A renderer with no generator, fonts or encoder writing into `work_dir`.
    #[must_use]
    pub fn minimal(work_dir: impl Into<PathBuf>) -> Self {
        Self {
            generator: None,
            fonts: None,
            encoder: None,
            music_path: PathBuf::new(),
            work_dir: work_dir.into(),
        }
    }

    /// Replaces the encoder.
    #[must_use]
    pub fn with_encoder(mut self, encoder: Option<VideoEncoder>) -> Self {
        self.encoder = encoder;
        self
    }

    /// Replaces the image generator.
    #[must_use]
    pub fn with_generator(mut self, generator: Option<Arc<dyn ImageGenerator>>) -> Self {
        self.generator = generator;
        self
    }

    /// Sets the background music path.
    #[must_use]
    pub fn with_music(mut self, path: impl Into<PathBuf>) -> Self {
        self.music_path = path.into();
        self
    }

    /// Renders the fact; the result is a video when an encoder is available.
    #[instrument(skip(self, fact), fields(title = %fact.title))]
    pub async fn render(&self, fact: &Fact, run_id: &str) -> RenderedArtifact {
        let still = match self.render_still(fact, run_id, "fact_image").await {
            Ok(still) => still,
            Err(e) => {
                tracing::error!(error = %e, "Render failed, writing fallback still");
                match self.render_fallback(fact, run_id) {
                    Ok(still) => still,
                    Err(e) => {
                        tracing::error!(error = %e, "Fallback still failed, using placeholder");
                        return RenderedArtifact::placeholder();
                    }
                }
            }
        };

        let mut artifact = RenderedArtifact::image(&still.path, still.background);
        artifact.degraded = still.degraded;

        match &self.encoder {
            Some(encoder) => self.to_video(encoder, artifact, run_id).await,
            None => artifact,
        }
    }

    async fn render_still(
        &self,
        fact: &Fact,
        run_id: &str,
        prefix: &str,
    ) -> Result<Still, RenderError> {
        let bg = background::acquire(self.generator.as_deref(), fact).await;
        let path = self.work_dir.join(format!("{prefix}_{run_id}.jpg"));

        // Drawing and JPEG encoding are CPU bound; keep them off the runtime workers.
        let mut image = bg.image;
        let fact = fact.clone();
        let fonts = self.fonts.clone();
        let target = path.clone();
        let drawn = tokio::task::spawn_blocking(move || {
            let drawn = text::compose(&mut image, &fact, fonts.as_deref());
            save_jpeg(&image, &target).map(|()| drawn)
        })
        .await
        .map_err(|e| RenderError::Task(e.to_string()))??;
        tracing::info!(path = %path.display(), "Still written");

        Ok(Still {
            path,
            background: bg.source,
            degraded: bg.fell_back || !drawn,
        })
    }

    fn render_fallback(&self, fact: &Fact, run_id: &str) -> Result<Still, RenderError> {
        let mut image = gradient(CANVAS_WIDTH, CANVAS_HEIGHT);
        text::compose(&mut image, fact, self.fonts.as_deref());
        let path = self.work_dir.join(format!("fact_fallback_{run_id}.jpg"));
        save_jpeg(&image, &path)?;
        Ok(Still {
            path,
            background: BackgroundSource::Gradient,
            degraded: true,
        })
    }

    async fn to_video(
        &self,
        encoder: &VideoEncoder,
        still: RenderedArtifact,
        run_id: &str,
    ) -> RenderedArtifact {
        let video_path = self.work_dir.join(format!("fact_video_{run_id}.mp4"));
        if let Err(e) = encoder.encode(&still.path, &video_path).await {
            tracing::error!(error = %e, "Video encode failed, keeping still image");
            remove_quietly(&video_path);
            return still.degraded();
        }
        remove_quietly(&still.path);

        let mut artifact = RenderedArtifact {
            path: video_path,
            kind: ArtifactKind::Video,
            ..still
        };

        if !self.music_path.is_file() {
            tracing::info!(path = %self.music_path.display(), "No background music found");
            return artifact;
        }

        let muxed = video::with_music_path(&artifact.path);
        match encoder.mux(&artifact.path, &self.music_path, &muxed).await {
            Ok(()) => {
                remove_quietly(&artifact.path);
                artifact.path = muxed;
                artifact.has_audio = true;
            }
            Err(e) => {
                tracing::warn!(error = %e, "Music mux failed, keeping silent video");
                remove_quietly(&muxed);
                artifact.degraded = true;
            }
        }
        artifact
    }
}
