//! Command-line front end for the comparison engine.
//!
//! # Usage
//!
//! ```bash
//! # Compare two local images and write the heat-map
//! pixel-verdict compare home_ref.png home_new.png --min-score 95 --heatmap diff.png
//!
//! # Run a whole build described by a manifest
//! pixel-verdict build manifest.json --config pixel-verdict.json
//!
//! # Print the stored report of a build
//! pixel-verdict report my-app 1718000000000build
//! ```

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use pixel_verdict::compare::{BaselineUpload, ScreenshotUpload};
use pixel_verdict::config::{load_json_config, save_json_config, CompareConfig};
use pixel_verdict::diff::DiffEngine;
use pixel_verdict::{CompareParams, CompareService, Comparator};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

/// Visual regression checks for UI screenshots
#[derive(Parser, Debug)]
#[command(name = "pixel-verdict")]
#[command(version, about, long_about = None)]
struct Args {
    /// Config file (JSON). Missing file means defaults.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Compare a baseline image with a candidate
    Compare {
        baseline: PathBuf,
        candidate: PathBuf,

        /// Sensitivity level, 1 (lenient) to 5 (strict)
        #[arg(short, long)]
        sensitivity: Option<i32>,

        /// Required similarity in percent (1..=100)
        #[arg(long)]
        min_score: Option<i64>,

        /// Write the heat-map PNG here
        #[arg(long)]
        heatmap: Option<PathBuf>,
    },
    /// Register baselines and compare every screenshot of a build
    Build {
        /// Manifest JSON with projectId, buildId, baselines and screenshots
        manifest: PathBuf,
    },
    /// Print the stored report of a build
    Report { project_id: String, build_id: String },
    /// Write a config file with default values
    InitConfig { path: PathBuf },
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BuildManifest {
    project_id: String,
    #[serde(default)]
    build_id: Option<String>,
    #[serde(default)]
    baselines: Vec<BaselineUpload>,
    #[serde(default)]
    screenshots: Vec<ScreenshotUpload>,
    #[serde(default)]
    sensitivity: Option<i32>,
    #[serde(default)]
    min_score: Option<i64>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let default_level = if args.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    let config: CompareConfig = match &args.config {
        Some(path) => load_json_config(path, "compare"),
        None => CompareConfig::default(),
    };

    match args.command {
        Command::Compare {
            baseline,
            candidate,
            sensitivity,
            min_score,
            heatmap,
        } => {
            let level = sensitivity.unwrap_or(config.default_sensitivity.level());
            let params = CompareParams::from_raw(Some(level), min_score)?;
            compare_files(&config, &baseline, &candidate, params, heatmap.as_deref())
        }
        Command::Build { manifest } => run_build(&config, &manifest).await,
        Command::Report {
            project_id,
            build_id,
        } => {
            let service = CompareService::init_from_config(&config).await?;
            let report = service.build_report(&project_id, &build_id).await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
            Ok(())
        }
        Command::InitConfig { path } => {
            save_json_config(&path, &config, "compare").map_err(anyhow::Error::msg)?;
            println!("wrote {}", path.display());
            Ok(())
        }
    }
}

fn compare_files(
    config: &CompareConfig,
    baseline: &Path,
    candidate: &Path,
    params: CompareParams,
    heatmap: Option<&Path>,
) -> Result<()> {
    let baseline_bytes =
        std::fs::read(baseline).with_context(|| format!("reading {}", baseline.display()))?;
    let candidate_bytes =
        std::fs::read(candidate).with_context(|| format!("reading {}", candidate.display()))?;

    let comparator = Comparator::new(DiffEngine::default(), config.regions.clone());
    let outcome = comparator.compare(&baseline_bytes, &candidate_bytes, &params)?;

    if let Some(path) = heatmap {
        std::fs::write(path, &outcome.heatmap_png)
            .with_context(|| format!("writing heat-map to {}", path.display()))?;
        tracing::info!(path = %path.display(), "heat-map written");
    }
    println!("{}", serde_json::to_string_pretty(&outcome)?);
    Ok(())
}

async fn run_build(config: &CompareConfig, manifest_path: &Path) -> Result<()> {
    let raw = std::fs::read_to_string(manifest_path)
        .with_context(|| format!("reading {}", manifest_path.display()))?;
    let manifest: BuildManifest = serde_json::from_str(&raw).context("parsing build manifest")?;

    let service = CompareService::init_from_config(config).await?;
    let params = service.params(manifest.sensitivity, manifest.min_score)?;

    if !manifest.baselines.is_empty() {
        service
            .register_baselines(&manifest.project_id, None, manifest.baselines)
            .await?;
    }

    let mut outcome = service
        .compare_build(
            &manifest.project_id,
            manifest.build_id.as_deref(),
            manifest.screenshots,
            params,
        )
        .await?;
    println!("{}", serde_json::to_string_pretty(&outcome)?);

    // Keep the process alive until the annotation request settles.
    if let Some(handle) = outcome.annotation.take() {
        if let Err(e) = handle.await {
            tracing::warn!(error = %e, "annotation task aborted");
        }
    }
    Ok(())
}
