pub mod engine;
pub mod matcher;
pub mod regions;
pub mod score;

pub use engine::{diff_images, DiffEngine, DiffResult, Sensitivity};
pub use matcher::{PixelClass, PixelMatcher, YiqMatcher};
pub use regions::{
    analyze_regions, Dimensions, Region, RegionAnalysis, RegionParams, Severity, SeverityCounts,
};
pub use score::{diff_percent, fuse_scores, verdict, InvalidMinScore, MinScore, Verdict};
