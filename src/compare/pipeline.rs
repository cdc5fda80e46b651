//! decode → normalize → diff → cluster → fuse, for a single screen.
//!
//! Each step consumes the full output of the previous one, so the stages run
//! strictly in order. Nothing is cached between calls.

use super::interface::CompareError;
use crate::diff::{
    analyze_regions, diff_percent, fuse_scores, verdict, DiffEngine, MinScore, RegionAnalysis,
    RegionParams, Sensitivity, Verdict,
};
use crate::imaging::{self, normalize_pair};
use serde::{Deserialize, Serialize};

/// Caller-supplied comparison parameters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompareParams {
    #[serde(default)]
    pub sensitivity: Sensitivity,
    #[serde(default)]
    pub min_score: Option<MinScore>,
}

impl CompareParams {
    /// Build from raw optional inputs, validating `min_score` to 1..=100.
    pub fn from_raw(sensitivity: Option<i32>, min_score: Option<i64>) -> Result<Self, CompareError> {
        Ok(Self {
            sensitivity: sensitivity.map(Sensitivity::new).unwrap_or_default(),
            min_score: min_score.map(MinScore::new).transpose()?,
        })
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ComparisonOutcome {
    /// Fused score in `[0, 1]`.
    pub diff_score: f64,
    /// Flagged pixel ratio before fusion.
    pub pixel_diff_score: f64,
    pub matched: bool,
    pub verdict: Verdict,
    pub diff_percent: u8,
    /// PNG-encoded heat-map.
    #[serde(skip)]
    pub heatmap_png: Vec<u8>,
    #[serde(flatten)]
    pub regions: RegionAnalysis,
}

/// Stateless per-screen comparison.
#[derive(Clone, Default)]
pub struct Comparator {
    engine: DiffEngine,
    regions: RegionParams,
}

impl Comparator {
    pub fn new(engine: DiffEngine, regions: RegionParams) -> Self {
        Self { engine, regions }
    }

    pub fn region_params(&self) -> &RegionParams {
        &self.regions
    }

    pub fn compare(
        &self,
        baseline: &[u8],
        candidate: &[u8],
        params: &CompareParams,
    ) -> Result<ComparisonOutcome, CompareError> {
        let baseline = imaging::decode(baseline).map_err(|e| CompareError::from_image("baseline", e))?;
        let candidate =
            imaging::decode(candidate).map_err(|e| CompareError::from_image("candidate", e))?;

        let (candidate, baseline) = normalize_pair(candidate, baseline);

        let diff = self
            .engine
            .diff(&candidate, &baseline, params.sensitivity)
            .map_err(|e| CompareError::from_image("diff", e))?;

        let regions = analyze_regions(&diff.heatmap, &self.regions);
        let final_score = fuse_scores(diff.diff_score, &regions);
        let verdict = verdict(final_score, params.min_score);

        let heatmap_png =
            imaging::encode_png(&diff.heatmap).map_err(|e| CompareError::from_image("heat-map", e))?;

        tracing::info!(
            width = regions.dimensions.width,
            height = regions.dimensions.height,
            pixel_diff = diff.diff_score,
            final_score,
            regions = regions.boxes.len(),
            ?verdict,
            "comparison complete"
        );

        Ok(ComparisonOutcome {
            diff_score: final_score,
            pixel_diff_score: diff.diff_score,
            matched: diff.matched,
            verdict,
            diff_percent: diff_percent(final_score),
            heatmap_png,
            regions,
        })
    }
}
