pub mod interface;
pub mod pipeline;
pub mod queue;
pub mod service;
pub mod status;

pub use interface::{CompareError, HeatmapPublisher, ImageSource};
pub use pipeline::{CompareParams, Comparator, ComparisonOutcome};
pub use queue::ComparisonQueue;
pub use service::{
    BaselineUpload, BuildOutcome, CompareService, ScreenFailure, ScreenOutcome, ScreenshotUpload,
    UploadOutcome,
};
pub use status::{ScreenRecord, ScreenStatus, TransitionError};

#[cfg(test)]
mod tests;
