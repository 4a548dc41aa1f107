//! Text compositing: darkened bands, greedy word wrap and drawing.

use ab_glyph::{FontVec, PxScale};
use image::{Rgb, RgbImage};
use imageproc::drawing::{draw_text_mut, text_size};
use std::path::Path;

use crate::core::Fact;
use crate::errors::RenderError;

/// Maximum rendered line width in pixels.
pub const MAX_LINE_WIDTH: u32 = 1700;

/// A rectangle darkened before text is drawn, inclusive corners.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Band {
    /// Left edge.
    pub x0: u32,
    /// Top edge.
    pub y0: u32,
    /// Right edge.
    pub x1: u32,
    /// Bottom edge.
    pub y1: u32,
    /// Black overlay opacity, 0..=255.
    pub alpha: u8,
}

/// Band behind the category and title.
pub const TITLE_BAND: Band = Band {
    x0: 100,
    y0: 200,
    x1: 1820,
    y1: 400,
    alpha: 180,
};

/// Band behind the content.
pub const CONTENT_BAND: Band = Band {
    x0: 100,
    y0: 450,
    x1: 1820,
    y1: 850,
    alpha: 150,
};

struct TextBlock {
    x: i32,
    y: i32,
    step: i32,
    size: f32,
    color: Rgb<u8>,
}

const CATEGORY_BLOCK: TextBlock = TextBlock {
    x: 120,
    y: 220,
    step: 0,
    size: 38.0,
    color: Rgb([255, 200, 100]),
};

const TITLE_BLOCK: TextBlock = TextBlock {
    x: 120,
    y: 320,
    step: 140,
    size: 85.0,
    color: Rgb([255, 255, 255]),
};

const CONTENT_BLOCK: TextBlock = TextBlock {
    x: 120,
    y: 520,
    step: 90,
    size: 52.0,
    color: Rgb([240, 240, 240]),
};

/// Measures the rendered width of a line of text.
pub trait TextMeasure {
    /// Width in pixels of `text` at `size`.
    fn width(&self, text: &str, size: f32) -> u32;
}

/// Fixed advance per character, for deterministic layout.
#[derive(Debug, Clone, Copy)]
pub struct FixedAdvance {
    /// Advance as a fraction of the font size.
    pub em_fraction: f32,
}

impl Default for FixedAdvance {
    fn default() -> Self {
        Self { em_fraction: 0.5 }
    }
}

impl TextMeasure for FixedAdvance {
    #[allow(
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss,
        clippy::cast_precision_loss
    )]
    fn width(&self, text: &str, size: f32) -> u32 {
        (text.chars().count() as f32 * size * self.em_fraction).ceil() as u32
    }
}

impl TextMeasure for FontVec {
    fn width(&self, text: &str, size: f32) -> u32 {
        text_size(PxScale::from(size), self, text).0
    }
}

/// Title and body fonts.
pub struct Fonts {
    title: FontVec,
    body: FontVec,
}

impl std::fmt::Debug for Fonts {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Fonts").finish_non_exhaustive()
    }
}

impl Fonts {
    /// Loads both fonts from TrueType files.
    pub fn load(title_path: &Path, body_path: &Path) -> Result<Self, RenderError> {
        Ok(Self {
            title: load_font(title_path)?,
            body: load_font(body_path)?,
        })
    }
}

fn load_font(path: &Path) -> Result<FontVec, RenderError> {
    let bytes = std::fs::read(path)
        .map_err(|e| RenderError::Font(format!("{}: {e}", path.display())))?;
    FontVec::try_from_vec(bytes)
        .map_err(|e| RenderError::Font(format!("{}: {e}", path.display())))
}

/// Greedy word wrap: a word joins the current line while the candidate
/// line still measures within `max_width`.
#[must_use]
pub fn wrap_text(text: &str, max_width: u32, size: f32, measure: &dyn TextMeasure) -> Vec<String> {
    let mut lines = Vec::new();
    let mut current = String::new();

    for word in text.split_whitespace() {
        if current.is_empty() {
            current.push_str(word);
            continue;
        }
        let candidate = format!("{current} {word}");
        if measure.width(&candidate, size) <= max_width {
            current = candidate;
        } else {
            lines.push(std::mem::replace(&mut current, word.to_string()));
        }
    }

    if !current.is_empty() {
        lines.push(current);
    }
    lines
}

/// Blends black over `band` at its alpha, clamped to the image bounds.
pub fn darken(image: &mut RgbImage, band: Band) {
    let (width, height) = image.dimensions();
    if width == 0 || height == 0 || band.x0 >= width || band.y0 >= height {
        return;
    }
    let keep = 255 - u16::from(band.alpha);
    for y in band.y0..=band.y1.min(height - 1) {
        for x in band.x0..=band.x1.min(width - 1) {
            let pixel = image.get_pixel_mut(x, y);
            for c in &mut pixel.0 {
                *c = u8::try_from(u16::from(*c) * keep / 255).unwrap_or(u8::MAX);
            }
        }
    }
}

fn draw_block(image: &mut RgbImage, font: &FontVec, block: &TextBlock, lines: &[String]) {
    let mut y = block.y;
    for line in lines {
        draw_text_mut(image, block.color, block.x, y, PxScale::from(block.size), font, line);
        y += block.step;
    }
}

/// Darkens the bands and, when fonts are available, draws the fact.
///
/// Returns true if text was drawn.
pub fn compose(image: &mut RgbImage, fact: &Fact, fonts: Option<&Fonts>) -> bool {
    darken(image, TITLE_BAND);
    darken(image, CONTENT_BAND);

    let Some(fonts) = fonts else {
        tracing::warn!("Fonts unavailable, skipping text overlay");
        return false;
    };

    draw_block(image, &fonts.body, &CATEGORY_BLOCK, &[fact.category.to_uppercase()]);

    let title_lines = wrap_text(&fact.title, MAX_LINE_WIDTH, TITLE_BLOCK.size, &fonts.title);
    draw_block(image, &fonts.title, &TITLE_BLOCK, &title_lines);

    let content_lines = wrap_text(
        &fact.content,
        MAX_LINE_WIDTH,
        CONTENT_BLOCK.size,
        &fonts.body,
    );
    draw_block(image, &fonts.body, &CONTENT_BLOCK, &content_lines);

    tracing::debug!(
        title_lines = title_lines.len(),
        content_lines = content_lines.len(),
        "Text composited"
    );
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::ImageBuffer;
    use pretty_assertions::assert_eq;

    const SENTENCE: &str = "The shortest war in history was between Britain and Zanzibar on \
        27 August 1896 and lasted somewhere between thirty-eight and forty-five minutes before \
        the sultan's forces surrendered";

    fn measure() -> FixedAdvance {
        FixedAdvance { em_fraction: 1.0 }
    }

    #[test]
    fn test_wrap_respects_width() {
        let lines = wrap_text(SENTENCE, 400, 10.0, &measure());
        assert!(lines.len() > 1);
        for line in &lines {
            assert!(measure().width(line, 10.0) <= 400, "line too wide: {line}");
        }
        assert_eq!(lines.join(" "), SENTENCE.split_whitespace().collect::<Vec<_>>().join(" "));
    }

    #[test]
    fn test_wrap_is_idempotent() {
        let lines = wrap_text(SENTENCE, 400, 10.0, &measure());
        let rewrapped = wrap_text(&lines.join(" "), 400, 10.0, &measure());
        assert_eq!(rewrapped, lines);
        for line in &lines {
            assert_eq!(wrap_text(line, 400, 10.0, &measure()), vec![line.clone()]);
        }
    }

    #[test]
    fn test_overlong_word_gets_own_line() {
        let lines = wrap_text("a supercalifragilistic b", 50, 10.0, &measure());
        assert_eq!(lines, vec!["a", "supercalifragilistic", "b"]);
    }

    #[test]
    fn test_wrap_empty_text() {
        assert!(wrap_text("   ", 400, 10.0, &measure()).is_empty());
    }

    #[test]
    fn test_darken_only_inside_band() {
        let mut img: RgbImage = ImageBuffer::from_pixel(1920, 1080, Rgb([200, 200, 200]));
        darken(&mut img, TITLE_BAND);
        darken(&mut img, CONTENT_BAND);

        assert_eq!(*img.get_pixel(50, 50), Rgb([200, 200, 200]));
        assert_eq!(*img.get_pixel(1900, 300), Rgb([200, 200, 200]));
        assert_eq!(*img.get_pixel(500, 425), Rgb([200, 200, 200]));
        // 200 * 75 / 255
        assert_eq!(*img.get_pixel(100, 200), Rgb([58, 58, 58]));
        assert_eq!(*img.get_pixel(1820, 400), Rgb([58, 58, 58]));
        // 200 * 105 / 255
        assert_eq!(*img.get_pixel(960, 600), Rgb([82, 82, 82]));
    }

    #[test]
    fn test_darken_clamps_to_small_image() {
        let mut img: RgbImage = ImageBuffer::from_pixel(150, 250, Rgb([255, 255, 255]));
        darken(&mut img, TITLE_BAND);
        assert_eq!(*img.get_pixel(149, 249), Rgb([75, 75, 75]));
        assert_eq!(*img.get_pixel(99, 249), Rgb([255, 255, 255]));
    }

    #[test]
    fn test_compose_without_fonts_still_darkens() {
        let mut img: RgbImage = ImageBuffer::from_pixel(1920, 1080, Rgb([255, 255, 255]));
        let drawn = compose(&mut img, &Fact::test_fact(), None);
        assert!(!drawn);
        assert_eq!(*img.get_pixel(960, 300), Rgb([75, 75, 75]));
    }

    #[test]
    fn test_missing_font_is_error() {
        let err = Fonts::load(Path::new("/nonexistent/a.ttf"), Path::new("/nonexistent/b.ttf"))
            .unwrap_err();
        assert!(matches!(err, RenderError::Font(_)));
    }
}
