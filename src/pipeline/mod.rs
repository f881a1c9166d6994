pub mod checkpoint;
pub mod chunk;
pub mod config;
pub mod processor;
pub mod staging;
pub mod stats;

#[cfg(test)]
mod tests;

pub use checkpoint::CheckpointLog;
pub use chunk::{ChunkWriter, WriterMessage, WriterReport};
pub use config::SiftConfig;
pub use processor::{FileReport, FileScanner, SiftProcessor};
pub use staging::StagedRows;
pub use stats::{Counters, RunSummary};

use anyhow::Result;
use std::path::PathBuf;

/// Classify `input_files` into the configured output directory, skipping
/// files the checkpoint log already lists.
pub async fn sift_files(input_files: &[PathBuf], config: SiftConfig) -> Result<RunSummary> {
    let mut processor = SiftProcessor::new(config)?;
    processor.process(input_files).await
}
