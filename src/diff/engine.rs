use super::matcher::{rgb2y, PixelClass, PixelMatcher, YiqMatcher};
use crate::imaging::{ImageError, PixelImage, CHANNELS};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Heat-map colour for a flagged pixel.
pub const DIFF_COLOR: [u8; 4] = [255, 0, 0, 255];
/// Heat-map colour for an over-threshold pixel explained by anti-aliasing.
pub const AA_COLOR: [u8; 4] = [255, 255, 0, 255];
/// Opacity of the greyscale background drawn under matched pixels.
const BACKGROUND_ALPHA: f64 = 0.1;

/// Caller-facing strictness level, 1 (lenient) to 5 (strict).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Sensitivity(i32);

impl Sensitivity {
    pub const DEFAULT: Sensitivity = Sensitivity(3);

    pub fn new(level: i32) -> Self {
        Sensitivity(level)
    }

    pub fn level(self) -> i32 {
        self.0
    }

    /// Matcher threshold for this level. Unknown levels fall back to 0.5.
    pub fn threshold(self) -> f64 {
        match self.0 {
            1 => 0.9,
            2 => 0.7,
            3 => 0.5,
            4 => 0.3,
            5 => 0.1,
            _ => 0.5,
        }
    }
}

impl Default for Sensitivity {
    fn default() -> Self {
        Self::DEFAULT
    }
}

#[derive(Debug, Clone)]
pub struct DiffResult {
    /// `flagged_pixels / (width * height)`, in `[0, 1]`.
    pub diff_score: f64,
    pub flagged_pixels: usize,
    /// RGBA8 heat-map with the same dimensions as the compared pair.
    pub heatmap: PixelImage,
    pub matched: bool,
}

#[derive(Clone)]
pub struct DiffEngine {
    matcher: Arc<dyn PixelMatcher>,
}

impl Default for DiffEngine {
    fn default() -> Self {
        Self::new(Arc::new(YiqMatcher::default()))
    }
}

impl DiffEngine {
    pub fn new(matcher: Arc<dyn PixelMatcher>) -> Self {
        Self { matcher }
    }

    pub fn matcher_name(&self) -> &'static str {
        self.matcher.name()
    }

    /// Compare two equally sized images. The heat-map background is taken from
    /// `first`; the flag set does not depend on argument order.
    pub fn diff(
        &self,
        first: &PixelImage,
        second: &PixelImage,
        sensitivity: Sensitivity,
    ) -> Result<DiffResult, ImageError> {
        if first.dimensions() != second.dimensions() {
            return Err(ImageError::SizeMismatch {
                first: first.dimensions(),
                second: second.dimensions(),
            });
        }

        let (width, height) = first.dimensions();
        let threshold = sensitivity.threshold();
        let mut out = Vec::with_capacity(first.pixel_count() * CHANNELS);
        let mut flagged = 0usize;

        for y in 0..height {
            for x in 0..width {
                let color = match self.matcher.classify(first, second, x, y, threshold) {
                    PixelClass::Different => {
                        flagged += 1;
                        DIFF_COLOR
                    }
                    PixelClass::AntiAliased => AA_COLOR,
                    PixelClass::Same => background(first.pixel(x, y)),
                };
                out.extend_from_slice(&color);
            }
        }

        let heatmap = PixelImage::new(width, height, out)?;
        let diff_score = flagged as f64 / first.pixel_count() as f64;

        tracing::debug!(
            matcher = self.matcher.name(),
            sensitivity = sensitivity.level(),
            threshold,
            flagged,
            diff_score,
            "pixel diff complete"
        );

        Ok(DiffResult {
            diff_score,
            flagged_pixels: flagged,
            heatmap,
            matched: flagged == 0,
        })
    }
}

/// Dimmed greyscale copy of a matched pixel.
fn background(p: [u8; 4]) -> [u8; 4] {
    let luma = rgb2y(p[0] as f64, p[1] as f64, p[2] as f64);
    let v = 255.0 + (luma - 255.0) * BACKGROUND_ALPHA * (p[3] as f64 / 255.0);
    let v = v.round().clamp(0.0, 255.0) as u8;
    [v, v, v, 255]
}

/// Diff with the default YIQ matcher.
pub fn diff_images(
    first: &PixelImage,
    second: &PixelImage,
    sensitivity: Sensitivity,
) -> Result<DiffResult, ImageError> {
    DiffEngine::default().diff(first, second, sensitivity)
}
