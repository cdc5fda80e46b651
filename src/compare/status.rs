//! Per-screen, per-build status tracking.
//!
//! A screen's status is a single current value, not a history: re-running a
//! comparison moves a finished screen back to `InProgress` and then to a fresh
//! terminal state.

use crate::diff::{RegionAnalysis, Verdict};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScreenStatus {
    /// One side (baseline or candidate) is registered without its counterpart.
    OnHold,
    InProgress,
    Pass,
    Fail,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("illegal status transition {from} -> {to}")]
pub struct TransitionError {
    pub from: ScreenStatus,
    pub to: ScreenStatus,
}

impl ScreenStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, ScreenStatus::Pass | ScreenStatus::Fail | ScreenStatus::Error)
    }

    /// Both sides are available and a comparison starts (or re-runs).
    pub fn begin(self) -> Result<Self, TransitionError> {
        match self {
            ScreenStatus::InProgress => Err(self.illegal(ScreenStatus::InProgress)),
            _ => Ok(ScreenStatus::InProgress),
        }
    }

    pub fn complete(self, verdict: Verdict) -> Result<Self, TransitionError> {
        let to = ScreenStatus::from(verdict);
        match self {
            ScreenStatus::InProgress => Ok(to),
            _ => Err(self.illegal(to)),
        }
    }

    /// The comparison cannot produce a verdict (missing baseline, bad image, fetch failure).
    pub fn fail(self) -> Result<Self, TransitionError> {
        match self {
            ScreenStatus::OnHold | ScreenStatus::InProgress => Ok(ScreenStatus::Error),
            _ => Err(self.illegal(ScreenStatus::Error)),
        }
    }

    fn illegal(self, to: ScreenStatus) -> TransitionError {
        TransitionError { from: self, to }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ScreenStatus::OnHold => "on_hold",
            ScreenStatus::InProgress => "in_progress",
            ScreenStatus::Pass => "pass",
            ScreenStatus::Fail => "fail",
            ScreenStatus::Error => "error",
        }
    }
}

impl From<Verdict> for ScreenStatus {
    fn from(verdict: Verdict) -> Self {
        match verdict {
            Verdict::Pass => ScreenStatus::Pass,
            Verdict::Fail => ScreenStatus::Fail,
        }
    }
}

impl fmt::Display for ScreenStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ScreenStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "on_hold" => Ok(ScreenStatus::OnHold),
            "in_progress" => Ok(ScreenStatus::InProgress),
            "pass" => Ok(ScreenStatus::Pass),
            "fail" => Ok(ScreenStatus::Fail),
            "error" => Ok(ScreenStatus::Error),
            other => Err(format!("unknown screen status '{}'", other)),
        }
    }
}

/// Current comparison state of one screen in one build.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScreenRecord {
    pub project_id: String,
    pub build_id: String,
    pub image_name: String,
    pub result_status: ScreenStatus,
    /// `round(final_score * 100)`
    pub diff_percent: u8,
    pub heatmap_url: Option<String>,
    pub coordinates: Option<RegionAnalysis>,
    /// Unix seconds of the last mutation.
    pub updated_at: i64,
}

impl ScreenRecord {
    pub fn on_hold(project_id: &str, build_id: &str, image_name: &str) -> Self {
        Self {
            project_id: project_id.to_string(),
            build_id: build_id.to_string(),
            image_name: image_name.to_string(),
            result_status: ScreenStatus::OnHold,
            diff_percent: 0,
            heatmap_url: None,
            coordinates: None,
            updated_at: chrono::Utc::now().timestamp(),
        }
    }

    pub fn begin(&mut self) -> Result<(), TransitionError> {
        self.result_status = self.result_status.begin()?;
        self.touch();
        Ok(())
    }

    pub fn complete(
        &mut self,
        verdict: Verdict,
        diff_percent: u8,
        heatmap_url: Option<String>,
        coordinates: RegionAnalysis,
    ) -> Result<(), TransitionError> {
        self.result_status = self.result_status.complete(verdict)?;
        self.diff_percent = diff_percent;
        self.heatmap_url = heatmap_url;
        self.coordinates = Some(coordinates);
        self.touch();
        Ok(())
    }

    /// Move to `Error`, clearing any result from a previous run.
    pub fn fail(&mut self) -> Result<(), TransitionError> {
        self.result_status = self.result_status.fail()?;
        self.diff_percent = 0;
        self.heatmap_url = None;
        self.coordinates = None;
        self.touch();
        Ok(())
    }

    fn touch(&mut self) {
        self.updated_at = chrono::Utc::now().timestamp();
    }
}
