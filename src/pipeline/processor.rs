use anyhow::{Context, Result};
use rayon::prelude::*;
use std::collections::HashMap;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{mpsc, Semaphore};
use tokio::task::{JoinError, JoinHandle, JoinSet};
use tracing::{debug, error, info, warn};

use crate::binder::FieldBinder;
use crate::classifier::{Classifier, LineVerdict, Outcome};
use crate::constants::{DEFAULT_CLASSIFY_BATCH_LINES, EXTRACTED_CATEGORY, MIRRORED_CATEGORY};
use crate::detector::DetectorRegistry;
use crate::pipeline::checkpoint::{basename, CheckpointLog};
use crate::pipeline::chunk::{run_writer, ChunkWriter, WriterMessage, WriterReport};
use crate::pipeline::staging::StagedRows;
use crate::pipeline::stats::{Counters, RunSummary};
use crate::pipeline::SiftConfig;
use crate::report;

const OUTPUT_QUEUES: usize = 2;

/// Result of one file worker. `error` is set for file-level failures; the
/// counters then describe rows that were discarded with the staging files.
#[derive(Debug, Clone)]
pub struct FileReport {
    pub path: PathBuf,
    pub counters: Counters,
    pub error: Option<String>,
}

impl FileReport {
    pub fn succeeded(&self) -> bool {
        self.error.is_none()
    }
}

/// Everything a file worker needs, shared across workers through an `Arc`.
pub struct FileScanner {
    classifier: Arc<Classifier>,
    extracted_tx: mpsc::Sender<WriterMessage>,
    mirrored_tx: mpsc::Sender<WriterMessage>,
    staging_dir: PathBuf,
    row_batch_size: usize,
    io_buffer_size: usize,
    sample_limit: usize,
    classify_batch_lines: usize,
}

impl FileScanner {
    pub fn new(
        classifier: Arc<Classifier>,
        extracted_tx: mpsc::Sender<WriterMessage>,
        mirrored_tx: mpsc::Sender<WriterMessage>,
        config: &SiftConfig,
    ) -> Self {
        Self {
            classifier,
            extracted_tx,
            mirrored_tx,
            staging_dir: config.staging_dir(),
            row_batch_size: config.row_batch_size,
            io_buffer_size: config.io_buffer_size_bytes(),
            sample_limit: config.path_only_sample_limit,
            classify_batch_lines: DEFAULT_CLASSIFY_BATCH_LINES,
        }
    }

    pub fn with_classify_batch_lines(mut self, lines: usize) -> Self {
        self.classify_batch_lines = lines.max(1);
        self
    }

    pub fn scan(&self, path: &Path, file_index: usize) -> FileReport {
        let mut counters = Counters::with_sample_limit(self.sample_limit);
        let result = File::open(path)
            .with_context(|| format!("failed to open {}", path.display()))
            .and_then(|file| {
                let reader = BufReader::with_capacity(self.io_buffer_size, file);
                self.scan_reader(reader, path, file_index, &mut counters)
            });
        FileReport {
            path: path.to_path_buf(),
            counters,
            error: result.err().map(|e| format!("{:#}", e)),
        }
    }

    /// Classify every line of `reader` into a per-file stage and hand the
    /// rows to the writers only once the whole input has been read.
    pub fn scan_reader<R: BufRead>(
        &self,
        mut reader: R,
        path: &Path,
        file_index: usize,
        counters: &mut Counters,
    ) -> Result<()> {
        let source: Arc<str> = Arc::from(path.to_string_lossy().as_ref());
        let mut staged = StagedRows::create(&self.staging_dir, file_index, self.io_buffer_size)?;

        let mut raw = Vec::new();
        let mut lines = Vec::with_capacity(self.classify_batch_lines);
        loop {
            raw.clear();
            let read = reader
                .read_until(b'\n', &mut raw)
                .with_context(|| format!("failed to read {}", path.display()))?;
            if read == 0 {
                break;
            }
            lines.push(String::from_utf8_lossy(&raw).into_owned());

            if lines.len() >= self.classify_batch_lines {
                self.classify_batch(&lines, &source, counters, &mut staged)?;
                lines.clear();
            }
        }
        if !lines.is_empty() {
            self.classify_batch(&lines, &source, counters, &mut staged)?;
        }

        let (extracted, mirrored) = staged.staged_rows();
        debug!(
            "Forwarding {} extracted and {} mirrored rows for {}",
            extracted,
            mirrored,
            basename(path)
        );
        staged.forward(path, &self.extracted_tx, &self.mirrored_tx, self.row_batch_size)
    }

    fn classify_batch(
        &self,
        lines: &[String],
        source: &Arc<str>,
        counters: &mut Counters,
        staged: &mut StagedRows,
    ) -> Result<()> {
        let verdicts: Vec<Result<LineVerdict>> = lines
            .par_iter()
            .map(|line| self.classifier.classify(line, source))
            .collect();

        for verdict in verdicts {
            match verdict {
                Ok(verdict) => {
                    counters.record(&verdict);
                    for row in verdict.rendered(Outcome::Extracted) {
                        staged.push_extracted(row)?;
                    }
                    for row in verdict.rendered(Outcome::Mirrored) {
                        staged.push_mirrored(row)?;
                    }
                }
                Err(e) => {
                    debug!("Skipping record in {}: {:#}", source, e);
                    counters.record_error();
                }
            }
        }
        Ok(())
    }
}

pub struct SiftProcessor {
    config: SiftConfig,
    classifier: Arc<Classifier>,
    shutdown_flag: Arc<AtomicBool>,
}

impl SiftProcessor {
    pub fn new(config: SiftConfig) -> Result<Self> {
        config.validate()?;
        let registry = Arc::new(DetectorRegistry::new(&config.enabled_detectors)?);
        let binder = Arc::new(FieldBinder::new(config.binder_cache_capacity));
        let classifier = Arc::new(Classifier::new(
            registry,
            binder,
            config.mirror_content_max_chars,
        ));

        Ok(Self {
            config,
            classifier,
            shutdown_flag: Arc::new(AtomicBool::new(false)),
        })
    }

    pub fn with_shutdown_signal(mut self, shutdown_flag: Arc<AtomicBool>) -> Self {
        self.shutdown_flag = shutdown_flag;
        self
    }

    pub fn config(&self) -> &SiftConfig {
        &self.config
    }

    pub async fn process(&mut self, input_files: &[PathBuf]) -> Result<RunSummary> {
        let start_time = Instant::now();
        std::fs::create_dir_all(&self.config.output_directory).with_context(|| {
            format!(
                "failed to create output directory {}",
                self.config.output_directory.display()
            )
        })?;
        let staging_dir = self.config.staging_dir();
        if staging_dir.exists() {
            warn!("Removing stale staged rows in {}", staging_dir.display());
            std::fs::remove_dir_all(&staging_dir)
                .with_context(|| format!("failed to clear {}", staging_dir.display()))?;
        }
        std::fs::create_dir_all(&staging_dir)
            .with_context(|| format!("failed to create {}", staging_dir.display()))?;

        let mut checkpoint = CheckpointLog::load(&self.config.checkpoint_path())?;
        let pending = checkpoint.pending_files(input_files);
        let mut summary = RunSummary {
            files_discovered: input_files.len(),
            files_skipped: input_files.len() - pending.len(),
            counters: Counters::with_sample_limit(self.config.path_only_sample_limit),
            ..Default::default()
        };

        let workers = self.config.effective_workers();
        info!(
            "Processing {} files ({} already complete) with {} workers",
            pending.len(),
            summary.files_skipped,
            workers
        );

        let (extracted_tx, extracted_rx) = mpsc::channel(self.config.queue_capacity);
        let (mirrored_tx, mirrored_rx) = mpsc::channel(self.config.queue_capacity);
        let (ack_tx, ack_rx) = mpsc::unbounded_channel();
        let extracted_writer = self.spawn_writer(extracted_rx, EXTRACTED_CATEGORY, ack_tx.clone())?;
        let mirrored_writer = self.spawn_writer(mirrored_rx, MIRRORED_CATEGORY, ack_tx)?;
        let mut commits = CommitTracker::new(ack_rx);

        let scanner = Arc::new(FileScanner::new(
            Arc::clone(&self.classifier),
            extracted_tx.clone(),
            mirrored_tx.clone(),
            &self.config,
        ));

        let semaphore = Arc::new(Semaphore::new(workers));
        let mut tasks = JoinSet::new();

        for (file_index, file_path) in pending.iter().enumerate() {
            if self.shutdown_requested() {
                warn!(
                    "Shutdown requested, not scheduling remaining {} files",
                    pending.len() - file_index
                );
                summary.interrupted = true;
                break;
            }
            if extracted_tx.is_closed() || mirrored_tx.is_closed() {
                error!("An output writer stopped, not scheduling further files");
                break;
            }

            let permit = loop {
                match Arc::clone(&semaphore).try_acquire_owned() {
                    Ok(permit) => break permit,
                    Err(_) => match tasks.join_next().await {
                        Some(joined) => {
                            Self::absorb(joined, &mut summary)?;
                            commits.apply(&mut checkpoint)?;
                        }
                        None => break Arc::clone(&semaphore).acquire_owned().await?,
                    },
                }
            };

            let scanner = Arc::clone(&scanner);
            let file_path = file_path.clone();
            debug!("Starting file {}: {}", file_index + 1, basename(&file_path));

            tasks.spawn(async move {
                let _permit = permit;
                let worker_path = file_path.clone();
                let outcome =
                    tokio::task::spawn_blocking(move || scanner.scan(&worker_path, file_index))
                        .await;
                (file_path, outcome)
            });
        }

        while let Some(joined) = tasks.join_next().await {
            Self::absorb(joined, &mut summary)?;
            commits.apply(&mut checkpoint)?;
        }
        drop(scanner);

        // Every producer is done; ask the writers to drain and stop.
        let _ = extracted_tx.send(WriterMessage::Shutdown).await;
        let _ = mirrored_tx.send(WriterMessage::Shutdown).await;
        drop(extracted_tx);
        drop(mirrored_tx);

        let extracted = Self::join_writer(extracted_writer, EXTRACTED_CATEGORY).await;
        let mirrored = Self::join_writer(mirrored_writer, MIRRORED_CATEGORY).await;
        // Files both writers flushed are durable even if a writer failed later.
        commits.apply(&mut checkpoint)?;
        let (extracted, mirrored) = (extracted?, mirrored?);

        if let Err(e) = std::fs::remove_dir(&staging_dir) {
            debug!("Could not remove {}: {}", staging_dir.display(), e);
        }

        summary.extracted_rows_written = extracted.rows_written;
        summary.extracted_chunks_created = extracted.chunks_created;
        summary.mirrored_rows_written = mirrored.rows_written;
        summary.mirrored_chunks_created = mirrored.chunks_created;
        summary.interrupted |= self.shutdown_requested();
        summary.elapsed = start_time.elapsed();
        summary.counters.cap_samples();

        if !summary.is_consistent() {
            error!(
                "Match conservation violated: extracted {} + mirrored {} + path-only {} != total {}",
                summary.counters.extracted,
                summary.counters.mirrored,
                summary.counters.dropped_path_only,
                summary.counters.total_matches
            );
        }

        report::write_summary(&self.config.summary_path(), &summary)?;
        info!(
            "Run finished: {} succeeded, {} failed, {} skipped, {} checkpointed in {:.2}s",
            summary.files_succeeded,
            summary.files_failed,
            summary.files_skipped,
            commits.committed(),
            summary.elapsed.as_secs_f64()
        );

        Ok(summary)
    }

    fn spawn_writer(
        &self,
        receiver: mpsc::Receiver<WriterMessage>,
        category: &str,
        acks: mpsc::UnboundedSender<PathBuf>,
    ) -> Result<JoinHandle<Result<WriterReport>>> {
        let directory = if category == EXTRACTED_CATEGORY {
            self.config.extracted_dir()
        } else {
            self.config.mirrored_dir()
        };
        let writer = ChunkWriter::new(
            &directory,
            category,
            self.config.chunk_max_lines,
            self.config.io_buffer_size_bytes(),
        )?;
        Ok(tokio::task::spawn_blocking(move || run_writer(receiver, writer, acks)))
    }

    async fn join_writer(
        handle: JoinHandle<Result<WriterReport>>,
        category: &str,
    ) -> Result<WriterReport> {
        handle
            .await
            .with_context(|| format!("{} writer task failed", category))?
            .with_context(|| format!("{} writer failed", category))
    }

    fn absorb(
        joined: std::result::Result<(PathBuf, std::result::Result<FileReport, JoinError>), JoinError>,
        summary: &mut RunSummary,
    ) -> Result<()> {
        let (path, outcome) = joined.context("file task failed to join")?;
        let report = outcome.unwrap_or_else(|e| FileReport {
            path: path.clone(),
            counters: Counters::default(),
            error: Some(format!("worker panicked: {}", e)),
        });

        summary.files_processed += 1;
        let file_name = basename(&report.path);
        match &report.error {
            None => {
                summary.files_succeeded += 1;
                info!(
                    "Processed {} ({}/{}): {} lines, {} extracted, {} mirrored, {} path-only",
                    file_name,
                    summary.files_processed,
                    summary.files_discovered - summary.files_skipped,
                    report.counters.lines_scanned,
                    report.counters.extracted,
                    report.counters.mirrored,
                    report.counters.dropped_path_only
                );
                let merged = std::mem::take(&mut summary.counters).combine(report.counters);
                summary.counters = merged;
            }
            Some(message) => {
                summary.files_failed += 1;
                summary.errors.push((file_name.clone(), message.clone()));
                error!("Failed to process {}: {}", file_name, message);
            }
        }
        Ok(())
    }

    fn shutdown_requested(&self) -> bool {
        self.shutdown_flag.load(Ordering::Relaxed)
    }
}

/// Collects writer acknowledgements and checkpoints a file once every output
/// queue has flushed its rows.
struct CommitTracker {
    acks: mpsc::UnboundedReceiver<PathBuf>,
    seen: HashMap<PathBuf, usize>,
    committed: usize,
}

impl CommitTracker {
    fn new(acks: mpsc::UnboundedReceiver<PathBuf>) -> Self {
        Self {
            acks,
            seen: HashMap::new(),
            committed: 0,
        }
    }

    fn apply(&mut self, checkpoint: &mut CheckpointLog) -> Result<()> {
        while let Ok(path) = self.acks.try_recv() {
            let count = self.seen.entry(path.clone()).or_insert(0);
            *count += 1;
            if *count == OUTPUT_QUEUES {
                self.seen.remove(&path);
                checkpoint.mark_complete(&path)?;
                self.committed += 1;
            }
        }
        Ok(())
    }

    fn committed(&self) -> usize {
        self.committed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_file_is_checkpointed_only_after_both_writers_commit() {
        let dir = tempdir().unwrap();
        let log_path = dir.path().join("resume.log");
        let mut checkpoint = CheckpointLog::load(&log_path).unwrap();
        let (ack_tx, ack_rx) = mpsc::unbounded_channel();
        let mut commits = CommitTracker::new(ack_rx);

        ack_tx.send(PathBuf::from("/in/a.txt")).unwrap();
        ack_tx.send(PathBuf::from("/in/b.txt")).unwrap();
        commits.apply(&mut checkpoint).unwrap();
        assert!(!checkpoint.is_complete(Path::new("/in/a.txt")));
        assert_eq!(commits.committed(), 0);

        ack_tx.send(PathBuf::from("/in/a.txt")).unwrap();
        commits.apply(&mut checkpoint).unwrap();
        assert!(checkpoint.is_complete(Path::new("/in/a.txt")));
        assert!(!checkpoint.is_complete(Path::new("/in/b.txt")));
        assert_eq!(std::fs::read_to_string(&log_path).unwrap(), "a.txt\n");
    }
}
