//! Background acquisition: a generated image or a deterministic gradient.

use image::imageops::FilterType;
use image::{ImageBuffer, Rgb, RgbImage};

use crate::core::{BackgroundSource, Fact};
use crate::errors::ExternalError;
use crate::llm::{ImageGenerator, ImageRequest};

/// Standard canvas width.
pub const CANVAS_WIDTH: u32 = 1920;

/// Standard canvas height.
pub const CANVAS_HEIGHT: u32 = 1080;

/// Builds the image-generation prompt for a fact.
#[must_use]
pub fn background_prompt(fact: &Fact) -> String {
    format!(
        "Create a visually stunning, professional background image for a fact video about: {}. \
Style: cinematic, high-quality, {} themed, vibrant colors, suitable as a backdrop for text \
overlay. No text in the image.",
        fact.title,
        fact.category.to_lowercase()
    )
}

/// Vertical purple-to-blue gradient.
#[must_use]
pub fn gradient(width: u32, height: u32) -> RgbImage {
    let h = f64::from(height.max(1));
    ImageBuffer::from_fn(width, height, |_x, y| {
        let ratio = f64::from(y) / h;
        Rgb([
            channel(75.0 + 65.0 * ratio),
            channel(100.0 * ratio),
            channel(130.0 + 70.0 * ratio),
        ])
    })
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn channel(value: f64) -> u8 {
    value.clamp(0.0, 255.0) as u8
}

/// Decodes generated bytes and scales them to the standard canvas.
pub fn decode_to_canvas(bytes: &[u8]) -> Result<RgbImage, image::ImageError> {
    let decoded = image::load_from_memory(bytes)?.to_rgb8();
    if decoded.dimensions() == (CANVAS_WIDTH, CANVAS_HEIGHT) {
        return Ok(decoded);
    }
    Ok(image::imageops::resize(
        &decoded,
        CANVAS_WIDTH,
        CANVAS_HEIGHT,
        FilterType::Lanczos3,
    ))
}

/// Result of background acquisition.
#[derive(Debug)]
pub struct Background {
    /// The canvas, always at the standard size.
    pub image: RgbImage,
    /// Where it came from.
    pub source: BackgroundSource,
    /// Set when a configured generator failed and the gradient was used.
    pub fell_back: bool,
}

/// Acquires a background, falling back to the gradient on any failure.
pub async fn acquire(generator: Option<&dyn ImageGenerator>, fact: &Fact) -> Background {
    let Some(generator) = generator else {
        tracing::info!("No image generator configured, using gradient background");
        return gradient_background(false);
    };

    let request = ImageRequest::landscape(background_prompt(fact));
    let result = match generator.generate_image(&request).await {
        Ok(bytes) => tokio::task::spawn_blocking(move || decode_to_canvas(&bytes))
            .await
            .map_err(|e| ExternalError::local("openai", format!("Decode task failed: {e}")))
            .and_then(|decoded| {
                decoded.map_err(|e| {
                    ExternalError::rejected("openai", format!("Undecodable image: {e}"))
                })
            }),
        Err(e) => Err(e),
    };

    match result {
        Ok(image) => {
            tracing::info!("Using generated background");
            Background {
                image,
                source: BackgroundSource::Generated,
                fell_back: false,
            }
        }
        Err(e) => {
            tracing::warn!(error = %e, "Background generation failed, using gradient");
            gradient_background(true)
        }
    }
}

fn gradient_background(fell_back: bool) -> Background {
    Background {
        image: gradient(CANVAS_WIDTH, CANVAS_HEIGHT),
        source: BackgroundSource::Gradient,
        fell_back,
    }
}
