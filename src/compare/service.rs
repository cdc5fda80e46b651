use super::interface::{CompareError, HeatmapPublisher, ImageSource};
use super::pipeline::{CompareParams, Comparator, ComparisonOutcome};
use super::queue::ComparisonQueue;
use super::status::{ScreenRecord, ScreenStatus, TransitionError};
use crate::annotate::{merge_items, AnnotationClient, AnnotationPayload, ImageAnnotation};
use crate::config::CompareConfig;
use crate::diff::{DiffEngine, MinScore, Sensitivity};
use crate::fetch::HttpImageSource;
use crate::publish::build_publisher;
use crate::report::{assemble_report, BuildReport};
use crate::storage::{Baseline, Build, DeletedRows, ResultStore};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::Instrument;

// ── Requests ───────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BaselineUpload {
    pub screen_name: String,
    /// Image URL or `data:` URL.
    #[serde(alias = "extractedImage")]
    pub source: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScreenshotUpload {
    /// Screen name; a trailing file extension is dropped.
    pub image_name: String,
    #[serde(alias = "image")]
    pub source: String,
}

// ── Outcomes ───────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScreenFailure {
    pub image_name: String,
    pub error: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ScreenOutcome {
    Compared(ScreenRecord),
    Failed(ScreenFailure),
}

impl ScreenOutcome {
    pub fn image_name(&self) -> &str {
        match self {
            ScreenOutcome::Compared(record) => &record.image_name,
            ScreenOutcome::Failed(failure) => &failure.image_name,
        }
    }

    fn failed(image_name: &str, err: &CompareError) -> Self {
        ScreenOutcome::Failed(ScreenFailure {
            image_name: image_name.to_string(),
            error: err.to_string(),
        })
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildOutcome {
    pub project_id: String,
    pub build_id: String,
    /// One entry per uploaded screen, in no meaningful order.
    pub results: Vec<ScreenOutcome>,
    /// Screens with a baseline but no candidate in this build.
    pub on_hold: Vec<String>,
    /// Background annotation request, if one was started.
    #[serde(skip)]
    pub annotation: Option<JoinHandle<()>>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadOutcome {
    pub build_id: String,
    pub image_names: Vec<String>,
}

// ── Service ────────────────────────────────────────────

#[derive(Clone)]
pub struct CompareService {
    store: ResultStore,
    source: Arc<dyn ImageSource>,
    publisher: Arc<dyn HeatmapPublisher>,
    annotator: Option<AnnotationClient>,
    comparator: Arc<Comparator>,
    queue: ComparisonQueue,
    default_sensitivity: Sensitivity,
}

impl CompareService {
    pub fn new(
        store: ResultStore,
        source: Arc<dyn ImageSource>,
        publisher: Arc<dyn HeatmapPublisher>,
        config: &CompareConfig,
    ) -> Self {
        let annotator = AnnotationClient::from_config(&config.annotation).unwrap_or_else(|e| {
            tracing::error!(error = %e, "annotation client unavailable, annotation disabled");
            None
        });
        Self {
            store,
            source,
            publisher,
            annotator,
            comparator: Arc::new(Comparator::new(DiffEngine::default(), config.regions.clone())),
            queue: ComparisonQueue::new(config.max_concurrent),
            default_sensitivity: config.default_sensitivity,
        }
    }

    /// Wire up the database, HTTP image source and configured publisher.
    pub async fn init_from_config(config: &CompareConfig) -> Result<Self, CompareError> {
        let store = ResultStore::connect(&config.database_url).await?;
        let source = HttpImageSource::new(config.fetch_retries)
            .map_err(|e| CompareError::Internal(format!("cannot build HTTP client: {}", e)))?;
        let source = Arc::new(source);
        let publisher = build_publisher(&config.publish, config.fetch_retries).await?;
        tracing::info!(
            publisher = %publisher.id(),
            annotation = config.annotation.enabled,
            max_concurrent = config.max_concurrent,
            "compare service ready"
        );
        Ok(Self::new(store, source, publisher, config))
    }

    pub fn with_annotator(mut self, annotator: Option<AnnotationClient>) -> Self {
        self.annotator = annotator;
        self
    }

    pub fn store(&self) -> &ResultStore {
        &self.store
    }

    /// Validate raw caller parameters, falling back to the configured sensitivity.
    pub fn params(
        &self,
        sensitivity: Option<i32>,
        min_score: Option<i64>,
    ) -> Result<CompareParams, CompareError> {
        Ok(CompareParams {
            sensitivity: sensitivity
                .map(Sensitivity::new)
                .unwrap_or(self.default_sensitivity),
            min_score: min_score.map(MinScore::new).transpose()?,
        })
    }

    /// Register (or replace) reference images. With a build id, screens that
    /// have no record in that build yet are put on hold.
    pub async fn register_baselines(
        &self,
        project_id: &str,
        build_id: Option<&str>,
        baselines: Vec<BaselineUpload>,
    ) -> Result<Vec<Baseline>, CompareError> {
        if let Some(build_id) = build_id {
            self.store.ensure_build(project_id, build_id, Some(build_id)).await?;
        }
        for upload in &baselines {
            let name = baseline_name(&upload.screen_name)?;
            self.store.upsert_baseline(project_id, &name, &upload.source).await?;
            if let Some(build_id) = build_id {
                self.hold_if_new(project_id, build_id, &name).await?;
            }
        }
        tracing::info!(project_id, count = baselines.len(), "baselines registered");
        Ok(self.store.list_baselines(project_id).await?)
    }

    pub async fn remove_baseline(&self, project_id: &str, screen_name: &str) -> Result<bool, CompareError> {
        Ok(self.store.delete_baseline(project_id, screen_name.trim()).await?)
    }

    /// Drop every baseline of a project. Records and builds are kept.
    pub async fn remove_all_baselines(&self, project_id: &str) -> Result<u64, CompareError> {
        let removed = self.store.delete_baselines(project_id).await?;
        tracing::info!(project_id, removed, "baselines removed");
        Ok(removed)
    }

    // ── Builds ─────────────────────────────────────────

    /// Open a new build with a generated id. The name defaults to the id.
    pub async fn create_build(
        &self,
        project_id: &str,
        build_name: Option<&str>,
    ) -> Result<Build, CompareError> {
        let mut build_id = generate_build_id();
        // Ids are millisecond timestamps; wait out a clash with a build opened in the same tick.
        while self.store.get_build(project_id, &build_id).await?.is_some() {
            tokio::time::sleep(Duration::from_millis(1)).await;
            build_id = generate_build_id();
        }
        let name = build_name
            .map(str::trim)
            .filter(|n| !n.is_empty())
            .unwrap_or(build_id.as_str())
            .to_string();
        let build = self.store.ensure_build(project_id, &build_id, Some(name.as_str())).await?;
        tracing::info!(project_id, build_id = %build.build_id, "build created");
        Ok(build)
    }

    pub async fn list_builds(&self, project_id: &str) -> Result<Vec<Build>, CompareError> {
        Ok(self.store.list_builds(project_id).await?)
    }

    /// Store candidates without comparing them.
    pub async fn upload_screenshots(
        &self,
        project_id: &str,
        build_id: Option<&str>,
        screenshots: Vec<ScreenshotUpload>,
    ) -> Result<UploadOutcome, CompareError> {
        let build_id = self.resolve_build(project_id, build_id).await?;
        let mut image_names = Vec::with_capacity(screenshots.len());
        for shot in screenshots {
            let name = screen_name(&shot.image_name)?;
            self.store
                .upsert_screenshot(project_id, &build_id, &name, &shot.source)
                .await?;
            self.hold_if_new(project_id, &build_id, &name).await?;
            if !image_names.contains(&name) {
                image_names.push(name);
            }
        }
        Ok(UploadOutcome { build_id, image_names })
    }

    /// Compare every uploaded screen of a build against its baseline.
    ///
    /// Per-screen failures are returned in the outcome list, never as the
    /// function's error. The annotation request (if configured) is started in
    /// the background after results are persisted; its handle is returned but
    /// need not be awaited.
    pub async fn compare_build(
        &self,
        project_id: &str,
        build_id: Option<&str>,
        screenshots: Vec<ScreenshotUpload>,
        params: CompareParams,
    ) -> Result<BuildOutcome, CompareError> {
        let build_id = self.resolve_build(project_id, build_id).await?;
        let mut results = Vec::new();

        // Save first so a failing comparison still leaves the upload on record.
        let mut pending: Vec<(String, String)> = Vec::new();
        for shot in screenshots {
            let name = match screen_name(&shot.image_name) {
                Ok(name) => name,
                Err(e) => {
                    results.push(ScreenOutcome::failed(&shot.image_name, &e));
                    continue;
                }
            };
            if let Err(e) = self
                .store
                .upsert_screenshot(project_id, &build_id, &name, &shot.source)
                .await
            {
                tracing::error!(image_name = %name, error = %e, "failed to save screenshot");
                results.push(ScreenOutcome::failed(&name, &CompareError::from(e)));
                continue;
            }
            match pending.iter_mut().find(|(n, _)| *n == name) {
                Some(entry) => entry.1 = shot.source,
                None => pending.push((name, shot.source)),
            }
        }

        let handles: Vec<_> = pending
            .into_iter()
            .map(|(image_name, candidate_url)| {
                let job = ScreenJob {
                    store: self.store.clone(),
                    source: self.source.clone(),
                    publisher: self.publisher.clone(),
                    comparator: self.comparator.clone(),
                    project_id: project_id.to_string(),
                    build_id: build_id.clone(),
                    image_name: image_name.clone(),
                    candidate_url,
                    params,
                };
                let span = tracing::info_span!("screen", %image_name);
                (image_name, self.queue.enqueue(move || job.run().instrument(span)))
            })
            .collect();

        for (image_name, handle) in handles {
            let outcome = match handle.await {
                Ok(Ok(record)) => ScreenOutcome::Compared(record),
                Ok(Err(e)) => ScreenOutcome::failed(&image_name, &e),
                Err(join) => {
                    ScreenOutcome::failed(&image_name, &CompareError::Internal(join.to_string()))
                }
            };
            results.push(outcome);
        }

        let on_hold = self.hold_baseline_only(project_id, &build_id).await?;

        let failed = results
            .iter()
            .filter(|r| matches!(r, ScreenOutcome::Failed(_)))
            .count();
        tracing::info!(
            project_id,
            build_id = %build_id,
            compared = results.len() - failed,
            failed,
            on_hold = on_hold.len(),
            "build comparison complete"
        );

        let annotation = self.annotator.clone().map(|client| {
            let store = self.store.clone();
            let project_id = project_id.to_string();
            let build_id = build_id.clone();
            tokio::spawn(annotate_build(client, store, project_id, build_id))
        });

        Ok(BuildOutcome {
            project_id: project_id.to_string(),
            build_id,
            results,
            on_hold,
            annotation,
        })
    }

    pub async fn build_report(&self, project_id: &str, build_id: &str) -> Result<BuildReport, CompareError> {
        load_report(&self.store, project_id, build_id).await
    }

    /// Store an annotation payload posted back by the analysis service.
    pub async fn store_annotations(
        &self,
        payload: AnnotationPayload,
    ) -> Result<Vec<ImageAnnotation>, CompareError> {
        merge_payload(&self.store, payload).await
    }

    /// Patch one stored annotation item by id.
    pub async fn update_annotation_item(
        &self,
        project_id: &str,
        build_id: &str,
        image_name: &str,
        item_id: &str,
        updates: &Map<String, Value>,
    ) -> Result<ImageAnnotation, CompareError> {
        let mut annotation = self
            .store
            .get_annotation(project_id, build_id, image_name)
            .await?
            .ok_or_else(|| CompareError::NotFound(format!("annotations for '{}'", image_name)))?;

        let item = annotation
            .items
            .iter_mut()
            .find(|item| item.id == item_id)
            .ok_or_else(|| CompareError::NotFound(format!("annotation item '{}'", item_id)))?;
        item.apply_updates(updates).map_err(CompareError::InvalidParameter)?;

        annotation.updated_at = chrono::Utc::now().timestamp();
        self.store.save_annotation(&annotation).await?;
        Ok(annotation)
    }

    pub async fn delete_project(&self, project_id: &str) -> Result<DeletedRows, CompareError> {
        Ok(self.store.delete_project(project_id).await?)
    }

    async fn resolve_build(&self, project_id: &str, build_id: Option<&str>) -> Result<String, CompareError> {
        let build_id = match build_id.filter(|b| !b.is_empty()) {
            Some(id) => id.to_string(),
            None => generate_build_id(),
        };
        // A new build is named after its id.
        self.store
            .ensure_build(project_id, &build_id, Some(build_id.as_str()))
            .await?;
        Ok(build_id)
    }

    async fn hold_if_new(&self, project_id: &str, build_id: &str, image_name: &str) -> Result<(), CompareError> {
        if self.store.get_record(project_id, build_id, image_name).await?.is_none() {
            self.store
                .save_record(&ScreenRecord::on_hold(project_id, build_id, image_name))
                .await?;
        }
        Ok(())
    }

    /// Put every baseline without a candidate in this build on hold.
    async fn hold_baseline_only(&self, project_id: &str, build_id: &str) -> Result<Vec<String>, CompareError> {
        let uploaded: HashSet<String> = self
            .store
            .list_screenshots(project_id, build_id)
            .await?
            .into_iter()
            .map(|s| s.image_name)
            .collect();

        let mut on_hold = Vec::new();
        for baseline in self.store.list_baselines(project_id).await? {
            if uploaded.contains(&baseline.screen_name) {
                continue;
            }
            self.hold_if_new(project_id, build_id, &baseline.screen_name).await?;
            on_hold.push(baseline.screen_name);
        }
        Ok(on_hold)
    }
}

// ── Per-screen job ─────────────────────────────────────

struct ScreenJob {
    store: ResultStore,
    source: Arc<dyn ImageSource>,
    publisher: Arc<dyn HeatmapPublisher>,
    comparator: Arc<Comparator>,
    project_id: String,
    build_id: String,
    image_name: String,
    candidate_url: String,
    params: CompareParams,
}

impl ScreenJob {
    async fn run(self) -> Result<ScreenRecord, CompareError> {
        let mut record = self
            .store
            .get_record(&self.project_id, &self.build_id, &self.image_name)
            .await?
            .unwrap_or_else(|| ScreenRecord::on_hold(&self.project_id, &self.build_id, &self.image_name));

        let baseline = match self.store.find_baseline(&self.project_id, &self.image_name).await? {
            Some(baseline) => baseline,
            None => {
                tracing::warn!("no baseline registered for screen");
                let err = CompareError::MissingBaseline(self.image_name.clone());
                self.record_failure(&mut record).await;
                return Err(err);
            }
        };

        mark_in_progress(&mut record)?;
        self.store.save_record(&record).await?;

        match self.compare(&baseline.source_url).await {
            Ok((outcome, heatmap_url)) => {
                record.complete(
                    outcome.verdict,
                    outcome.diff_percent,
                    heatmap_url,
                    outcome.regions,
                )?;
                if let Err(e) = self.store.save_record(&record).await {
                    tracing::error!(error = %e, "failed to persist result");
                    // Do not leave the stored row in progress.
                    self.record_failure(&mut record).await;
                    return Err(e.into());
                }
                tracing::info!(
                    status = %record.result_status,
                    diff_percent = record.diff_percent,
                    "screen compared"
                );
                Ok(record)
            }
            Err(e) => {
                tracing::warn!(error = %e, "screen comparison failed");
                self.record_failure(&mut record).await;
                Err(e)
            }
        }
    }

    async fn compare(&self, baseline_url: &str) -> Result<(ComparisonOutcome, Option<String>), CompareError> {
        let (baseline, candidate) = tokio::try_join!(
            self.source.fetch(baseline_url),
            self.source.fetch(&self.candidate_url)
        )?;

        let comparator = self.comparator.clone();
        let params = self.params;
        let outcome = tokio::task::spawn_blocking(move || comparator.compare(&baseline, &candidate, &params))
            .await
            .map_err(|e| CompareError::Internal(e.to_string()))??;

        // A failed publish keeps the result with no heat-map.
        let heatmap_url = match self.publisher.publish(&self.image_name, &outcome.heatmap_png).await {
            Ok(url) => Some(url),
            Err(e) => {
                tracing::warn!(publisher = %self.publisher.id(), error = %e, "heat-map publish failed");
                None
            }
        };
        Ok((outcome, heatmap_url))
    }

    async fn record_failure(&self, record: &mut ScreenRecord) {
        if let Err(e) = mark_error(record) {
            tracing::error!(error = %e, "cannot move screen to error");
            return;
        }
        if let Err(e) = self.store.save_record(record).await {
            tracing::error!(error = %e, "failed to persist error status");
        }
    }
}

/// A record left `InProgress` by an interrupted run is resumed as-is.
fn mark_in_progress(record: &mut ScreenRecord) -> Result<(), TransitionError> {
    if record.result_status == ScreenStatus::InProgress {
        return Ok(());
    }
    record.begin()
}

/// Finished screens re-enter `InProgress` before failing.
fn mark_error(record: &mut ScreenRecord) -> Result<(), TransitionError> {
    if record.result_status.is_terminal() {
        record.begin()?;
    }
    record.fail()
}

// ── Helpers ────────────────────────────────────────────

pub fn generate_build_id() -> String {
    format!("{}build", chrono::Utc::now().timestamp_millis())
}

/// Drop a trailing `.ext` (the last dot-suffix not containing `/`).
pub fn strip_extension(name: &str) -> &str {
    match name.rfind('.') {
        Some(idx) if idx + 1 < name.len() && !name[idx + 1..].contains('/') => &name[..idx],
        _ => name,
    }
}

/// Baseline names are taken as given apart from surrounding whitespace.
fn baseline_name(raw: &str) -> Result<String, CompareError> {
    let name = raw.trim();
    if name.is_empty() {
        return Err(CompareError::InvalidParameter(format!(
            "invalid screen name '{}'",
            raw
        )));
    }
    Ok(name.to_string())
}

/// Uploaded image names lose their file extension.
fn screen_name(raw: &str) -> Result<String, CompareError> {
    let name = strip_extension(raw.trim());
    if name.is_empty() {
        return Err(CompareError::InvalidParameter(format!(
            "invalid screen name '{}'",
            raw
        )));
    }
    Ok(name.to_string())
}

async fn load_report(store: &ResultStore, project_id: &str, build_id: &str) -> Result<BuildReport, CompareError> {
    let build = store
        .get_build(project_id, build_id)
        .await?
        .ok_or_else(|| CompareError::NotFound(format!("build '{}'", build_id)))?;
    let records = store.list_records(project_id, build_id).await?;
    let baselines = store.list_baselines(project_id).await?;
    let screenshots = store.list_screenshots(project_id, build_id).await?;
    let annotations = store.list_annotations(project_id, build_id).await?;
    Ok(assemble_report(&build, records, &baselines, &screenshots, annotations))
}

async fn merge_payload(
    store: &ResultStore,
    payload: AnnotationPayload,
) -> Result<Vec<ImageAnnotation>, CompareError> {
    let mut stored = Vec::with_capacity(payload.data.len());
    for data in payload.data {
        let existing = store
            .get_annotation(&payload.project_id, &payload.build_id, &data.image_name)
            .await?;
        let (items, reference_url, screenshot_url) = match existing {
            Some(prev) => (
                merge_items(prev.items, data.analysis),
                data.reference_url.or(prev.reference_url),
                data.screenshot_url.or(prev.screenshot_url),
            ),
            None => (merge_items(Vec::new(), data.analysis), data.reference_url, data.screenshot_url),
        };
        let annotation = ImageAnnotation {
            project_id: payload.project_id.clone(),
            build_id: payload.build_id.clone(),
            image_name: data.image_name,
            reference_url,
            screenshot_url,
            items,
            updated_at: chrono::Utc::now().timestamp(),
        };
        store.save_annotation(&annotation).await?;
        stored.push(annotation);
    }
    tracing::info!(
        project_id = %payload.project_id,
        build_id = %payload.build_id,
        images = stored.len(),
        "annotations stored"
    );
    Ok(stored)
}

/// Background annotation request. Every failure is logged and swallowed.
async fn annotate_build(client: AnnotationClient, store: ResultStore, project_id: String, build_id: String) {
    let report = match load_report(&store, &project_id, &build_id).await {
        Ok(report) => report,
        Err(e) => {
            tracing::warn!(%project_id, %build_id, error = %e, "cannot assemble report for annotation");
            return;
        }
    };

    match client.request_annotations(&report).await {
        Ok(Some(payload)) => {
            if let Err(e) = merge_payload(&store, payload).await {
                tracing::warn!(%project_id, %build_id, error = %e, "failed to store inline annotations");
            }
        }
        Ok(None) => {
            tracing::debug!(%project_id, %build_id, "annotation request accepted");
        }
        Err(e) => {
            tracing::warn!(
                %project_id,
                %build_id,
                webhook = client.webhook_url(),
                error = %e,
                "annotation webhook failed"
            );
        }
    }
}
