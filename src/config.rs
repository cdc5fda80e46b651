//! Service configuration plus the shared helpers for loading/saving JSON
//! config files and resolving secrets from fields or environment variables.

use crate::diff::{RegionParams, Sensitivity};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

// ── Config Types ───────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CompareConfig {
    /// Screens compared at once within one build.
    pub max_concurrent: usize,
    /// Retries per image fetch on network errors, 429 and 5xx.
    pub fetch_retries: u32,
    pub default_sensitivity: Sensitivity,
    pub database_url: String,
    pub annotation: AnnotationConfig,
    pub publish: PublishConfig,
    pub regions: RegionParams,
}

impl Default for CompareConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 4,
            fetch_retries: 3,
            default_sensitivity: Sensitivity::DEFAULT,
            database_url: default_database_url(),
            annotation: AnnotationConfig::default(),
            publish: PublishConfig::default(),
            regions: RegionParams::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AnnotationConfig {
    pub enabled: bool,
    pub webhook_url: Option<String>,
    pub api_key: Option<String>,
    pub api_key_env: Option<String>,
    /// The analysis service can take minutes per build.
    pub timeout_secs: u64,
}

impl Default for AnnotationConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            webhook_url: None,
            api_key: None,
            api_key_env: Some("PIXEL_VERDICT_ANNOTATION_KEY".to_string()),
            timeout_secs: 600,
        }
    }
}

impl AnnotationConfig {
    pub fn api_key(&self) -> Option<String> {
        resolve_api_key(&self.api_key, &self.api_key_env)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PublishProvider {
    Local,
    HttpUpload,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PublishConfig {
    pub provider: PublishProvider,
    /// Multipart upload endpoint for `http_upload`.
    pub upload_url: Option<String>,
    pub upload_preset: Option<String>,
    /// Heat-map directory for `local`.
    pub output_dir: Option<PathBuf>,
    /// Serve `local` heat-maps over HTTP on this loopback port. Those URLs only
    /// resolve while the process that published them keeps running; without a
    /// port the stored reference is a `file://` URL.
    pub serve_port: Option<u16>,
}

impl Default for PublishConfig {
    fn default() -> Self {
        Self {
            provider: PublishProvider::Local,
            upload_url: None,
            upload_preset: None,
            output_dir: None,
            serve_port: None,
        }
    }
}

impl PublishConfig {
    pub fn output_dir(&self) -> PathBuf {
        self.output_dir
            .clone()
            .unwrap_or_else(|| data_dir().join("heatmaps"))
    }
}

fn data_dir() -> PathBuf {
    dirs_next::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("pixel-verdict")
}

fn default_database_url() -> String {
    format!("sqlite://{}", data_dir().join("pixel_verdict.db").display())
}

// ── JSON Helpers ───────────────────────────────────────

/// Generic load for any Serde config type with a `Default` implementation.
/// Falls back to `T::default()` if the file is missing or unparsable.
pub fn load_json_config<T: DeserializeOwned + Default>(path: &Path, label: &str) -> T {
    match std::fs::read_to_string(path) {
        Ok(content) => match serde_json::from_str::<T>(&content) {
            Ok(config) => {
                tracing::info!(label, path = %path.display(), "loaded config");
                config
            }
            Err(e) => {
                tracing::warn!(
                    label,
                    path = %path.display(),
                    error = %e,
                    "failed to parse config, using defaults"
                );
                T::default()
            }
        },
        Err(_) => {
            tracing::info!(label, path = %path.display(), "no config file, using defaults");
            T::default()
        }
    }
}

/// Generic save for any Serde config type.
pub fn save_json_config<T: Serialize>(path: &Path, config: &T, label: &str) -> Result<(), String> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .map_err(|e| format!("Failed to create config directory: {}", e))?;
    }
    let json = serde_json::to_string_pretty(config)
        .map_err(|e| format!("Failed to serialize config: {}", e))?;
    std::fs::write(path, json).map_err(|e| format!("Failed to write config file: {}", e))?;
    tracing::info!(label, path = %path.display(), "saved config");
    Ok(())
}

/// Resolve an API key: check the direct `api_key` field first,
/// then fall back to reading the environment variable named in `api_key_env`.
pub fn resolve_api_key(api_key: &Option<String>, api_key_env: &Option<String>) -> Option<String> {
    if let Some(ref key) = api_key {
        if !key.is_empty() {
            return Some(key.clone());
        }
    }
    if let Some(ref env_var) = api_key_env {
        if let Ok(key) = std::env::var(env_var) {
            if !key.is_empty() {
                return Some(key);
            }
        }
    }
    None
}
