//! Per-pixel perceptual matching.
//!
//! `YiqMatcher` measures colour distance in the YIQ space (Kotsarenko &
//! Ramos weights, the same model pixelmatch uses) after blending translucent
//! pixels onto white. A pixel over the threshold is reported as
//! `AntiAliased` instead of `Different` when it looks like an edge pixel in
//! either image, which keeps font and shape edges from lighting up the map.

use crate::imaging::PixelImage;

/// Largest possible YIQ delta between two 8-bit colours.
const MAX_YIQ_DELTA: f64 = 35215.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelClass {
    Same,
    AntiAliased,
    Different,
}

/// Pluggable per-pixel comparison. Implementations must be deterministic and
/// give the same class when `first` and `second` swap roles.
pub trait PixelMatcher: Send + Sync {
    fn name(&self) -> &'static str;

    /// Classify the pixel at `(x, y)`. `threshold` is in `[0, 1]`; smaller is stricter.
    fn classify(
        &self,
        first: &PixelImage,
        second: &PixelImage,
        x: u32,
        y: u32,
        threshold: f64,
    ) -> PixelClass;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct YiqMatcher {
    /// Count anti-aliased pixels as different.
    pub include_anti_aliased: bool,
}

impl PixelMatcher for YiqMatcher {
    fn name(&self) -> &'static str {
        "yiq"
    }

    fn classify(
        &self,
        first: &PixelImage,
        second: &PixelImage,
        x: u32,
        y: u32,
        threshold: f64,
    ) -> PixelClass {
        let a = first.pixel(x, y);
        let b = second.pixel(x, y);
        if a == b {
            return PixelClass::Same;
        }

        let max_delta = MAX_YIQ_DELTA * threshold * threshold;
        if color_delta(a, b, false).abs() <= max_delta {
            return PixelClass::Same;
        }

        if !self.include_anti_aliased
            && (is_anti_aliased(first, second, x, y) || is_anti_aliased(second, first, x, y))
        {
            PixelClass::AntiAliased
        } else {
            PixelClass::Different
        }
    }
}

// ── Colour math ────────────────────────────────────────

fn blend(c: f64, alpha: f64) -> f64 {
    255.0 + (c - 255.0) * alpha
}

fn blended(p: [u8; 4]) -> (f64, f64, f64) {
    let (r, g, b) = (p[0] as f64, p[1] as f64, p[2] as f64);
    if p[3] < 255 {
        let a = p[3] as f64 / 255.0;
        (blend(r, a), blend(g, a), blend(b, a))
    } else {
        (r, g, b)
    }
}

pub(crate) fn rgb2y(r: f64, g: f64, b: f64) -> f64 {
    r * 0.29889531 + g * 0.58662247 + b * 0.11448223
}

fn rgb2i(r: f64, g: f64, b: f64) -> f64 {
    r * 0.59597799 - g * 0.27417610 - b * 0.32180189
}

fn rgb2q(r: f64, g: f64, b: f64) -> f64 {
    r * 0.21147017 - g * 0.52261711 + b * 0.31114694
}

/// Signed YIQ distance; negative when `a` is brighter than `b`.
/// With `y_only` the raw brightness difference is returned instead.
fn color_delta(a: [u8; 4], b: [u8; 4], y_only: bool) -> f64 {
    let (r1, g1, b1) = blended(a);
    let (r2, g2, b2) = blended(b);

    let y1 = rgb2y(r1, g1, b1);
    let y2 = rgb2y(r2, g2, b2);
    let y = y1 - y2;
    if y_only {
        return y;
    }

    let i = rgb2i(r1, g1, b1) - rgb2i(r2, g2, b2);
    let q = rgb2q(r1, g1, b1) - rgb2q(r2, g2, b2);
    let delta = 0.5053 * y * y + 0.299 * i * i + 0.1957 * q * q;
    if y1 > y2 {
        -delta
    } else {
        delta
    }
}

// ── Anti-aliasing detection ────────────────────────────

/// 3x3 neighbourhood bounds clipped to the image, plus whether the centre sits on an edge.
fn neighbourhood(img: &PixelImage, x: u32, y: u32) -> (u32, u32, u32, u32, bool) {
    let x0 = x.saturating_sub(1);
    let y0 = y.saturating_sub(1);
    let x2 = (x + 1).min(img.width() - 1);
    let y2 = (y + 1).min(img.height() - 1);
    let on_edge = x == x0 || x == x2 || y == y0 || y == y2;
    (x0, y0, x2, y2, on_edge)
}

/// A pixel is anti-aliased when its neighbours contain both a darker and a
/// brighter extreme and one of those extremes sits inside a flat area in both images.
fn is_anti_aliased(img: &PixelImage, other: &PixelImage, x1: u32, y1: u32) -> bool {
    let (x0, y0, x2, y2, on_edge) = neighbourhood(img, x1, y1);
    let centre = img.pixel(x1, y1);
    let mut zeroes = u32::from(on_edge);
    let mut min = 0.0;
    let mut max = 0.0;
    let (mut min_x, mut min_y, mut max_x, mut max_y) = (0, 0, 0, 0);

    for x in x0..=x2 {
        for y in y0..=y2 {
            if x == x1 && y == y1 {
                continue;
            }
            let delta = color_delta(centre, img.pixel(x, y), true);
            if delta == 0.0 {
                zeroes += 1;
                if zeroes > 2 {
                    return false;
                }
            } else if delta < min {
                min = delta;
                min_x = x;
                min_y = y;
            } else if delta > max {
                max = delta;
                max_x = x;
                max_y = y;
            }
        }
    }

    if min == 0.0 || max == 0.0 {
        return false;
    }

    (has_many_siblings(img, min_x, min_y) && has_many_siblings(other, min_x, min_y))
        || (has_many_siblings(img, max_x, max_y) && has_many_siblings(other, max_x, max_y))
}

/// More than two identical neighbours (edge pixels count one for free).
fn has_many_siblings(img: &PixelImage, x1: u32, y1: u32) -> bool {
    let (x0, y0, x2, y2, on_edge) = neighbourhood(img, x1, y1);
    let centre = img.pixel(x1, y1);
    let mut zeroes = u32::from(on_edge);

    for x in x0..=x2 {
        for y in y0..=y2 {
            if x == x1 && y == y1 {
                continue;
            }
            if img.pixel(x, y) == centre {
                zeroes += 1;
            }
            if zeroes > 2 {
                return true;
            }
        }
    }
    false
}
