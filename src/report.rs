//! Flattened per-build read model: each screen record joined with its image
//! references and any annotations that have arrived so far.

use crate::annotate::{AnnotationItem, ImageAnnotation};
use crate::compare::status::{ScreenRecord, ScreenStatus};
use crate::storage::{Baseline, Build, Screenshot};
use serde::Serialize;
use std::collections::HashMap;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportEntry {
    #[serde(flatten)]
    pub record: ScreenRecord,
    pub reference_url: Option<String>,
    pub screenshot_url: Option<String>,
    pub annotations: Vec<AnnotationItem>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusSummary {
    pub on_hold: usize,
    pub in_progress: usize,
    pub pass: usize,
    pub fail: usize,
    pub error: usize,
}

impl StatusSummary {
    fn record(&mut self, status: ScreenStatus) {
        match status {
            ScreenStatus::OnHold => self.on_hold += 1,
            ScreenStatus::InProgress => self.in_progress += 1,
            ScreenStatus::Pass => self.pass += 1,
            ScreenStatus::Fail => self.fail += 1,
            ScreenStatus::Error => self.error += 1,
        }
    }

    pub fn total(&self) -> usize {
        self.on_hold + self.in_progress + self.pass + self.fail + self.error
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildReport {
    pub project_id: String,
    pub build_id: String,
    pub build_name: Option<String>,
    pub summary: StatusSummary,
    pub entries: Vec<ReportEntry>,
}

/// Join records with their sources. Stored baseline and screenshot URLs take
/// precedence over the URLs echoed back by the analysis service.
pub fn assemble_report(
    build: &Build,
    records: Vec<ScreenRecord>,
    baselines: &[Baseline],
    screenshots: &[Screenshot],
    annotations: Vec<ImageAnnotation>,
) -> BuildReport {
    let baselines: HashMap<&str, &str> = baselines
        .iter()
        .map(|b| (b.screen_name.as_str(), b.source_url.as_str()))
        .collect();
    let screenshots: HashMap<&str, &str> = screenshots
        .iter()
        .map(|s| (s.image_name.as_str(), s.source_url.as_str()))
        .collect();
    let mut annotations: HashMap<String, ImageAnnotation> = annotations
        .into_iter()
        .map(|a| (a.image_name.clone(), a))
        .collect();

    let mut summary = StatusSummary::default();
    let entries = records
        .into_iter()
        .map(|record| {
            summary.record(record.result_status);
            let annotation = annotations.remove(&record.image_name);
            let name = record.image_name.as_str();
            let reference_url = baselines
                .get(name)
                .map(|s| s.to_string())
                .or_else(|| annotation.as_ref().and_then(|a| a.reference_url.clone()));
            let screenshot_url = screenshots
                .get(name)
                .map(|s| s.to_string())
                .or_else(|| annotation.as_ref().and_then(|a| a.screenshot_url.clone()));
            ReportEntry {
                reference_url,
                screenshot_url,
                annotations: annotation.map(|a| a.items).unwrap_or_default(),
                record,
            }
        })
        .collect();

    BuildReport {
        project_id: build.project_id.clone(),
        build_id: build.build_id.clone(),
        build_name: build.build_name.clone(),
        summary,
        entries,
    }
}
