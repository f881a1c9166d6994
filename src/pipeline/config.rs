use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use sysinfo::System;

use crate::constants::*;
use crate::detector::DetectorKind;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SiftConfig {
    /// 0 picks one worker per logical CPU.
    pub worker_count: usize,
    pub queue_capacity: usize,
    pub row_batch_size: usize,
    pub chunk_max_lines: usize,
    pub mirror_content_max_chars: usize,
    pub path_only_sample_limit: usize,
    pub io_buffer_size_kb: usize,
    pub input_extensions: Vec<String>,
    pub output_directory: PathBuf,
    /// Relative paths resolve against `output_directory`.
    pub checkpoint_file: PathBuf,
    pub enabled_detectors: Vec<DetectorKind>,
    pub binder_cache_capacity: usize,
    pub verbose: bool,
}

impl Default for SiftConfig {
    fn default() -> Self {
        Self {
            worker_count: DEFAULT_WORKER_COUNT,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            row_batch_size: DEFAULT_ROW_BATCH_SIZE,
            chunk_max_lines: DEFAULT_CHUNK_MAX_LINES,
            mirror_content_max_chars: DEFAULT_MIRROR_CONTENT_MAX_CHARS,
            path_only_sample_limit: DEFAULT_PATH_ONLY_SAMPLE_LIMIT,
            io_buffer_size_kb: DEFAULT_IO_BUFFER_SIZE_KB,
            input_extensions: vec![DEFAULT_INPUT_EXTENSION.to_string()],
            output_directory: PathBuf::from(DEFAULT_OUTPUT_DIRECTORY),
            checkpoint_file: PathBuf::from(CHECKPOINT_FILE_NAME),
            enabled_detectors: DetectorKind::ALL.to_vec(),
            binder_cache_capacity: DEFAULT_BINDER_CACHE_CAPACITY,
            verbose: false,
        }
    }
}

impl SiftConfig {
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config {}", path.display()))?;
        let config: Self = serde_json::from_str(&content)
            .with_context(|| format!("failed to parse config {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_file(&self, path: &Path) -> Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)
            .with_context(|| format!("failed to write config {}", path.display()))?;
        Ok(())
    }

    /// Load `path`, writing the defaults there first when it does not exist.
    pub fn load_or_create(path: &Path) -> Result<Self> {
        if path.exists() {
            Self::from_file(path)
        } else {
            let config = Self::default();
            config.to_file(path)?;
            Ok(config)
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.worker_count != 0
            && (self.worker_count < MIN_WORKER_COUNT || self.worker_count > MAX_WORKER_COUNT)
        {
            return Err(anyhow::anyhow!(
                "Worker count must be 0 (auto) or between {} and {}",
                MIN_WORKER_COUNT, MAX_WORKER_COUNT
            ));
        }

        if self.queue_capacity < MIN_QUEUE_CAPACITY || self.queue_capacity > MAX_QUEUE_CAPACITY {
            return Err(anyhow::anyhow!(
                "Queue capacity must be between {} and {}",
                MIN_QUEUE_CAPACITY, MAX_QUEUE_CAPACITY
            ));
        }

        if self.row_batch_size < MIN_ROW_BATCH_SIZE || self.row_batch_size > MAX_ROW_BATCH_SIZE {
            return Err(anyhow::anyhow!(
                "Row batch size must be between {} and {}",
                MIN_ROW_BATCH_SIZE, MAX_ROW_BATCH_SIZE
            ));
        }

        if self.chunk_max_lines < MIN_CHUNK_MAX_LINES || self.chunk_max_lines > MAX_CHUNK_MAX_LINES {
            return Err(anyhow::anyhow!(
                "Chunk size must be between {} and {} lines",
                MIN_CHUNK_MAX_LINES, MAX_CHUNK_MAX_LINES
            ));
        }

        if self.mirror_content_max_chars < MIN_MIRROR_CONTENT_MAX_CHARS {
            return Err(anyhow::anyhow!(
                "Mirrored content cap must be at least {} characters",
                MIN_MIRROR_CONTENT_MAX_CHARS
            ));
        }

        if self.io_buffer_size_kb == 0 {
            return Err(anyhow::anyhow!("I/O buffer size must be positive"));
        }

        if self.input_extensions.is_empty() {
            return Err(anyhow::anyhow!("At least one input extension is required"));
        }

        if self.enabled_detectors.is_empty() {
            return Err(anyhow::anyhow!("At least one detector must be enabled"));
        }

        Ok(())
    }

    pub fn effective_workers(&self) -> usize {
        if self.worker_count > 0 {
            return self.worker_count;
        }
        let system = System::new_all();
        system.cpus().len().clamp(MIN_WORKER_COUNT, MAX_WORKER_COUNT)
    }

    pub fn io_buffer_size_bytes(&self) -> usize {
        self.io_buffer_size_kb * BYTES_PER_KB
    }

    pub fn checkpoint_path(&self) -> PathBuf {
        if self.checkpoint_file.is_absolute() {
            self.checkpoint_file.clone()
        } else {
            self.output_directory.join(&self.checkpoint_file)
        }
    }

    pub fn extracted_dir(&self) -> PathBuf {
        self.output_directory.join(EXTRACTED_DIR_NAME)
    }

    pub fn mirrored_dir(&self) -> PathBuf {
        self.output_directory.join(MIRRORED_DIR_NAME)
    }

    /// Per-file rows wait here until their file has been read completely.
    pub fn staging_dir(&self) -> PathBuf {
        self.output_directory.join(STAGING_DIR_NAME)
    }

    pub fn summary_path(&self) -> PathBuf {
        self.output_directory.join(SUMMARY_FILE_NAME)
    }
}
