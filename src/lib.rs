pub mod constants;

// Line-level classification
pub mod binder;
pub mod checksum;
pub mod classifier;
pub mod detector;
pub mod record;

// Resumable file pipeline and its outputs
pub mod pipeline;
pub mod report;
pub mod utils;

pub use classifier::{Classifier, LineVerdict, Outcome};
pub use detector::{DetectorKind, DetectorRegistry, Match};
pub use pipeline::{sift_files, Counters, RunSummary, SiftConfig, SiftProcessor};
