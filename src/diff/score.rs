use super::regions::RegionAnalysis;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Without a caller threshold a screen passes below 7% difference.
pub const DEFAULT_PASS_LIMIT: f64 = 0.07;

#[derive(Debug, Error)]
#[error("minScore must be between 1 and 100, got {0}")]
pub struct InvalidMinScore(pub i64);

/// Minimum acceptable similarity, in percent (1..=100).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "i64", into = "i64")]
pub struct MinScore(u8);

impl MinScore {
    pub fn new(percent: i64) -> Result<Self, InvalidMinScore> {
        if (1..=100).contains(&percent) {
            Ok(MinScore(percent as u8))
        } else {
            Err(InvalidMinScore(percent))
        }
    }

    pub fn percent(self) -> u8 {
        self.0
    }

    /// Largest final score that still passes.
    pub fn allowed_diff(self) -> f64 {
        (100 - self.0 as i64) as f64 / 100.0
    }
}

impl TryFrom<i64> for MinScore {
    type Error = InvalidMinScore;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        MinScore::new(value)
    }
}

impl From<MinScore> for i64 {
    fn from(score: MinScore) -> i64 {
        score.0 as i64
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Verdict {
    Pass,
    Fail,
}

/// Combine the raw pixel ratio with the region-area ratio.
///
/// The pixel ratio under-reports shifted elements whose pixels happen to
/// match, while the area ratio captures that displacement; the larger of the
/// two wins, clamped to `[0, 1]`.
pub fn fuse_scores(diff_score: f64, analysis: &RegionAnalysis) -> f64 {
    let perceptual = analysis.area_ratio();
    diff_score.max(perceptual).clamp(0.0, 1.0)
}

pub fn verdict(final_score: f64, min_score: Option<MinScore>) -> Verdict {
    let passed = match min_score {
        Some(min) => final_score <= min.allowed_diff(),
        None => final_score < DEFAULT_PASS_LIMIT,
    };
    if passed {
        Verdict::Pass
    } else {
        Verdict::Fail
    }
}

/// Whole-percent form stored on screen records.
pub fn diff_percent(final_score: f64) -> u8 {
    (final_score * 100.0).round().clamp(0.0, 100.0) as u8
}
