//! SQLite persistence for builds, baselines, screenshots, screen records and
//! annotations. Every row is scoped by `project_id`.

pub mod sqlite;

pub use sqlite::ResultStore;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("failed to prepare database location: {0}")]
    Io(#[from] std::io::Error),
    #[error("corrupt row: {0}")]
    Corrupt(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Build {
    pub project_id: String,
    pub build_id: String,
    pub build_name: Option<String>,
    pub created_at: i64,
}

/// A reference image registered for a named screen.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Baseline {
    pub project_id: String,
    pub screen_name: String,
    pub source_url: String,
    pub created_at: i64,
}

/// An uploaded candidate for one screen of one build.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Screenshot {
    pub project_id: String,
    pub build_id: String,
    pub image_name: String,
    pub source_url: String,
}

/// Row counts removed by a project teardown.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeletedRows {
    pub builds: u64,
    pub baselines: u64,
    pub screenshots: u64,
    pub results: u64,
    pub annotations: u64,
}
