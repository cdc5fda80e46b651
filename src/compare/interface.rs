use super::status::TransitionError;
use crate::diff::InvalidMinScore;
use crate::imaging::ImageError;
use crate::storage::StoreError;
use async_trait::async_trait;
use thiserror::Error;

// ── Error Types ────────────────────────────────────────

/// Per-screen failures. None of these abort sibling screens in a build.
#[derive(Debug, Error)]
pub enum CompareError {
    #[error("failed to fetch {reference}: {message}")]
    Fetch { reference: String, message: String },
    #[error("decode error: {0}")]
    Decode(String),
    #[error("dimension error: {0}")]
    Dimension(String),
    #[error("heat-map encoding failed: {0}")]
    Encode(String),
    #[error("heat-map publish failed: {0}")]
    Publish(String),
    #[error("no baseline found for screen '{0}'")]
    MissingBaseline(String),
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("comparison task failed: {0}")]
    Internal(String),
}

impl CompareError {
    pub fn fetch(reference: impl Into<String>, message: impl Into<String>) -> Self {
        CompareError::Fetch {
            reference: reference.into(),
            message: message.into(),
        }
    }

    /// Attach which side of the comparison an image error came from.
    pub fn from_image(side: &str, err: ImageError) -> Self {
        match err {
            ImageError::Decode { .. } => CompareError::Decode(format!("{}: {}", side, err)),
            ImageError::Encode(msg) => CompareError::Encode(msg),
            ImageError::Dimension { .. }
            | ImageError::BufferLength { .. }
            | ImageError::SizeMismatch { .. } => {
                CompareError::Dimension(format!("{}: {}", side, err))
            }
        }
    }
}

impl From<InvalidMinScore> for CompareError {
    fn from(e: InvalidMinScore) -> Self {
        CompareError::InvalidParameter(e.to_string())
    }
}

impl From<TransitionError> for CompareError {
    fn from(e: TransitionError) -> Self {
        CompareError::Internal(e.to_string())
    }
}

// ── Collaborator Traits ────────────────────────────────

/// Resolves an image reference (URL) to raw bytes.
#[async_trait]
pub trait ImageSource: Send + Sync {
    async fn fetch(&self, reference: &str) -> Result<Vec<u8>, CompareError>;
}

/// Publishes a rendered heat-map and returns a dereferenceable URL.
#[async_trait]
pub trait HeatmapPublisher: Send + Sync {
    /// Unique identifier for this publisher
    fn id(&self) -> String;

    async fn publish(&self, image_name: &str, png: &[u8]) -> Result<String, CompareError>;
}
