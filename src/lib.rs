pub mod annotate;
pub mod compare;
pub mod config;
pub mod diff;
pub mod fetch;
pub mod imaging;
pub mod publish;
pub mod report;
pub mod storage;
pub mod utils;

pub use compare::{
    CompareError, CompareParams, CompareService, Comparator, ComparisonOutcome, ScreenRecord,
    ScreenStatus,
};
pub use config::CompareConfig;
pub use diff::{MinScore, Sensitivity, Verdict};
pub use report::BuildReport;
