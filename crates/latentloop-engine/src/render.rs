use anyhow::{Context, Result};
use image::imageops::{resize, FilterType};
use image::{Rgb, RgbImage};
use latentloop_contracts::config::RenderSettings;

use crate::providers::{error_chain_text, InferenceProvider};

const PLACEHOLDER_FILL: Rgb<u8> = Rgb([230, 230, 230]);
const LABEL_BOX: Rgb<u8> = Rgb([0, 0, 0]);
const LABEL_TEXT: Rgb<u8> = Rgb([255, 255, 255]);

const GLYPH_WIDTH: u32 = 5;
const GLYPH_HEIGHT: u32 = 7;

// Labels are digits only, so inline 5x7 bitmaps stand in for a font crate.
// One row per byte, most significant of the low 5 bits on the left.
const DIGIT_GLYPHS: [[u8; 7]; 10] = [
    [0x0E, 0x11, 0x13, 0x15, 0x19, 0x11, 0x0E],
    [0x04, 0x0C, 0x04, 0x04, 0x04, 0x04, 0x0E],
    [0x0E, 0x11, 0x01, 0x02, 0x04, 0x08, 0x1F],
    [0x1F, 0x02, 0x04, 0x02, 0x01, 0x11, 0x0E],
    [0x02, 0x06, 0x0A, 0x12, 0x1F, 0x02, 0x02],
    [0x1F, 0x10, 0x1E, 0x01, 0x01, 0x11, 0x0E],
    [0x06, 0x08, 0x10, 0x1E, 0x11, 0x11, 0x0E],
    [0x1F, 0x01, 0x02, 0x04, 0x08, 0x08, 0x08],
    [0x0E, 0x11, 0x11, 0x0E, 0x11, 0x11, 0x0E],
    [0x0E, 0x11, 0x11, 0x0F, 0x01, 0x02, 0x0C],
];

/// One rendered candidate. `failure` carries the provider error when the
/// image is the placeholder.
pub struct RenderOutcome {
    pub image: RgbImage,
    pub failure: Option<String>,
}

impl RenderOutcome {
    pub fn is_placeholder(&self) -> bool {
        self.failure.is_some()
    }
}

#[derive(Debug, Clone)]
pub struct CandidateRenderer {
    settings: RenderSettings,
}

impl CandidateRenderer {
    pub fn new(settings: RenderSettings) -> Self {
        Self { settings }
    }

    /// Never fails: a provider or decode error becomes a blank placeholder so
    /// the round keeps its full candidate count.
    pub fn render(
        &self,
        provider: &dyn InferenceProvider,
        model: &str,
        seed: &[f32],
        index: usize,
    ) -> RenderOutcome {
        match self.render_labeled(provider, model, seed, index) {
            Ok(image) => RenderOutcome {
                image,
                failure: None,
            },
            Err(err) => RenderOutcome {
                image: self.placeholder(),
                failure: Some(error_chain_text(&err, 512)),
            },
        }
    }

    pub fn placeholder(&self) -> RgbImage {
        let [width, height] = self.settings.placeholder_size;
        RgbImage::from_pixel(width.max(1), height.max(1), PLACEHOLDER_FILL)
    }

    fn render_labeled(
        &self,
        provider: &dyn InferenceProvider,
        model: &str,
        seed: &[f32],
        index: usize,
    ) -> Result<RgbImage> {
        let bytes = provider.generate(model, seed)?;
        let decoded = image::load_from_memory(&bytes)
            .context("inference returned bytes that are not an image")?
            .to_rgb8();
        let mut image = self.shrink(&decoded);
        let [x, y] = self.settings.label_offset;
        burn_label(&mut image, &index.to_string(), x, y, self.settings.label_scale);
        Ok(image)
    }

    fn shrink(&self, image: &RgbImage) -> RgbImage {
        let ratio = self.settings.resize_ratio;
        let width = ((image.width() as f64 * ratio).floor() as u32).max(1);
        let height = ((image.height() as f64 * ratio).floor() as u32).max(1);
        if (width, height) == image.dimensions() {
            return image.clone();
        }
        resize(image, width, height, FilterType::Triangle)
    }
}

/// Draws `text` (digits only; anything else is skipped) in white on an opaque
/// black box whose top-left corner is `(x, y)`. Pixels outside the image are
/// clipped.
pub fn burn_label(image: &mut RgbImage, text: &str, x: u32, y: u32, scale: u32) {
    let scale = scale.max(1);
    let digits = text
        .chars()
        .filter_map(|ch| ch.to_digit(10))
        .collect::<Vec<u32>>();
    if digits.is_empty() {
        return;
    }
    let padding = 2 * scale;
    let advance = (GLYPH_WIDTH + 1) * scale;
    let box_width = (padding * 2 + advance * digits.len() as u32).saturating_sub(scale);
    let box_height = padding * 2 + GLYPH_HEIGHT * scale;

    fill_rect(image, x, y, box_width, box_height, LABEL_BOX);

    for (position, digit) in digits.into_iter().enumerate() {
        let glyph = DIGIT_GLYPHS[digit as usize];
        let origin_x = x
            .saturating_add(padding)
            .saturating_add((position as u32).saturating_mul(advance));
        let origin_y = y.saturating_add(padding);
        for (row, bits) in glyph.iter().enumerate() {
            for col in 0..GLYPH_WIDTH {
                if bits & (1 << (GLYPH_WIDTH - 1 - col)) == 0 {
                    continue;
                }
                fill_rect(
                    image,
                    origin_x.saturating_add(col * scale),
                    origin_y.saturating_add(row as u32 * scale),
                    scale,
                    scale,
                    LABEL_TEXT,
                );
            }
        }
    }
}

fn fill_rect(image: &mut RgbImage, x: u32, y: u32, width: u32, height: u32, color: Rgb<u8>) {
    let x_end = x.saturating_add(width).min(image.width());
    let y_end = y.saturating_add(height).min(image.height());
    for py in y.min(y_end)..y_end {
        for px in x.min(x_end)..x_end {
            image.put_pixel(px, py, color);
        }
    }
}

#[cfg(test)]
mod tests {
    use anyhow::bail;
    use image::{Rgb, RgbImage};
    use latentloop_contracts::config::RenderSettings;

    use super::{burn_label, CandidateRenderer, LABEL_BOX, LABEL_TEXT, PLACEHOLDER_FILL};
    use crate::providers::{encode_png, InferenceProvider};

    struct SolidProvider;

    impl InferenceProvider for SolidProvider {
        fn name(&self) -> &str {
            "solid"
        }

        fn generate(&self, _model: &str, _seed: &[f32]) -> anyhow::Result<Vec<u8>> {
            encode_png(&RgbImage::from_pixel(200, 120, Rgb([10, 200, 30])))
        }
    }

    struct FailingProvider;

    impl InferenceProvider for FailingProvider {
        fn name(&self) -> &str {
            "failing"
        }

        fn generate(&self, _model: &str, _seed: &[f32]) -> anyhow::Result<Vec<u8>> {
            bail!("inference request failed (500): out of memory")
        }
    }

    struct GarbageProvider;

    impl InferenceProvider for GarbageProvider {
        fn name(&self) -> &str {
            "garbage"
        }

        fn generate(&self, _model: &str, _seed: &[f32]) -> anyhow::Result<Vec<u8>> {
            Ok(b"definitely not a png".to_vec())
        }
    }

    fn renderer() -> CandidateRenderer {
        CandidateRenderer::new(RenderSettings {
            resize_ratio: 0.5,
            label_offset: [16, 16],
            label_scale: 2,
            placeholder_size: [64, 48],
        })
    }

    #[test]
    fn success_is_halved_and_labeled() {
        let outcome = renderer().render(&SolidProvider, "m", &[0.0; 4], 7);
        assert!(!outcome.is_placeholder());
        assert_eq!(outcome.image.dimensions(), (100, 60));
        // box corner, then untouched area
        assert_eq!(*outcome.image.get_pixel(16, 16), LABEL_BOX);
        let Rgb([r, g, b]) = *outcome.image.get_pixel(90, 50);
        assert!(r < 20 && g > 190 && b < 40, "unexpected pixel {r},{g},{b}");
        let white = outcome
            .image
            .pixels()
            .filter(|pixel| **pixel == LABEL_TEXT)
            .count();
        assert!(white > 0);
    }

    #[test]
    fn provider_failure_becomes_placeholder() {
        let outcome = renderer().render(&FailingProvider, "m", &[0.0; 4], 1);
        assert!(outcome.is_placeholder());
        assert_eq!(outcome.image.dimensions(), (64, 48));
        assert!(outcome.image.pixels().all(|pixel| *pixel == PLACEHOLDER_FILL));
        assert!(outcome
            .failure
            .as_deref()
            .unwrap_or("")
            .contains("out of memory"));
    }

    #[test]
    fn undecodable_bytes_become_placeholder() {
        let outcome = renderer().render(&GarbageProvider, "m", &[0.0; 4], 1);
        assert!(outcome.is_placeholder());
        assert!(outcome
            .failure
            .as_deref()
            .unwrap_or("")
            .contains("not an image"));
    }

    #[test]
    fn two_digit_labels_are_wider_than_one_digit() {
        let count_box = |text: &str| {
            let mut image = RgbImage::from_pixel(200, 100, Rgb([255, 0, 0]));
            burn_label(&mut image, text, 0, 0, 3);
            image
                .pixels()
                .filter(|pixel| **pixel != Rgb([255, 0, 0]))
                .count()
        };
        // one digit: 2*6 + 18 - 3 = 27 wide, 2*6 + 21 = 33 tall
        assert_eq!(count_box("1"), 27 * 33);
        assert_eq!(count_box("12"), 45 * 33);
        assert_eq!(count_box("x"), 0);
    }

    #[test]
    fn label_is_clipped_at_the_edge() {
        let mut image = RgbImage::from_pixel(10, 10, Rgb([255, 0, 0]));
        burn_label(&mut image, "8", 6, 6, 4);
        assert_eq!(*image.get_pixel(9, 9), LABEL_BOX);
        assert_eq!(*image.get_pixel(5, 5), Rgb([255, 0, 0]));
    }

    #[test]
    fn label_far_outside_the_image_is_a_no_op() {
        let original = RgbImage::from_pixel(8, 8, Rgb([255, 0, 0]));
        let mut image = original.clone();
        burn_label(&mut image, "123", u32::MAX - 3, u32::MAX - 1, 10);
        burn_label(&mut image, "9", u32::MAX, 0, 10);
        assert_eq!(image, original);
    }
}
