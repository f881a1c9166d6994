use anyhow::{Context, Result};
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use tokio::sync::mpsc::{self, error::TryRecvError};
use tracing::{debug, info};

use crate::constants::CHUNK_FILE_EXTENSION;

/// Items carried by an output queue. `Commit` follows the last rows of a
/// successful file; `Shutdown` is sent once, after every file worker has
/// finished.
#[derive(Debug)]
pub enum WriterMessage {
    Rows(Vec<String>),
    Commit(PathBuf),
    Shutdown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriterState {
    Running,
    Draining,
    Finished,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WriterReport {
    pub category: String,
    pub rows_written: usize,
    pub chunks_created: usize,
    pub chunk_files: Vec<PathBuf>,
}

/// Appends rows to `<category>_<NNN>.txt` files in one directory, rotating to
/// the next index once the open chunk holds `max_lines` rows.
pub struct ChunkWriter {
    directory: PathBuf,
    category: String,
    max_lines: usize,
    io_buffer_size: usize,
    next_index: usize,
    current: Option<BufWriter<File>>,
    current_lines: usize,
    report: WriterReport,
}

impl ChunkWriter {
    pub fn new(
        directory: &Path,
        category: &str,
        max_lines: usize,
        io_buffer_size: usize,
    ) -> Result<Self> {
        std::fs::create_dir_all(directory)
            .with_context(|| format!("failed to create output directory {}", directory.display()))?;
        let next_index = Self::highest_existing_index(directory, category)? + 1;
        if next_index > 1 {
            debug!(
                "Existing {} chunks found in {}, continuing at index {}",
                category,
                directory.display(),
                next_index
            );
        }

        Ok(Self {
            directory: directory.to_path_buf(),
            category: category.to_string(),
            max_lines: max_lines.max(1),
            io_buffer_size,
            next_index,
            current: None,
            current_lines: 0,
            report: WriterReport {
                category: category.to_string(),
                ..Default::default()
            },
        })
    }

    pub fn chunk_path(directory: &Path, category: &str, index: usize) -> PathBuf {
        directory.join(format!("{}_{:03}.{}", category, index, CHUNK_FILE_EXTENSION))
    }

    fn parse_index(file_name: &str, category: &str) -> Option<usize> {
        file_name
            .strip_prefix(category)?
            .strip_prefix('_')?
            .strip_suffix(CHUNK_FILE_EXTENSION)?
            .strip_suffix('.')?
            .parse()
            .ok()
    }

    fn highest_existing_index(directory: &Path, category: &str) -> Result<usize> {
        let mut highest = 0;
        for entry in std::fs::read_dir(directory)? {
            let entry = entry?;
            if let Some(index) = entry
                .file_name()
                .to_str()
                .and_then(|name| Self::parse_index(name, category))
            {
                highest = highest.max(index);
            }
        }
        Ok(highest)
    }

    pub fn category(&self) -> &str {
        &self.category
    }

    pub fn write_row(&mut self, row: &str) -> Result<()> {
        if self.current.is_none() || self.current_lines >= self.max_lines {
            self.rotate()?;
        }

        if let Some(out) = self.current.as_mut() {
            out.write_all(row.as_bytes())?;
            out.write_all(b"\n")?;
        }
        self.current_lines += 1;
        self.report.rows_written += 1;
        Ok(())
    }

    pub fn write_rows(&mut self, rows: &[String]) -> Result<()> {
        for row in rows {
            self.write_row(row)?;
        }
        Ok(())
    }

    fn rotate(&mut self) -> Result<()> {
        self.close_current()?;

        let path = Self::chunk_path(&self.directory, &self.category, self.next_index);
        let file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .with_context(|| format!("failed to create chunk {}", path.display()))?;
        debug!("Opened chunk {}", path.display());

        self.current = Some(BufWriter::with_capacity(self.io_buffer_size, file));
        self.current_lines = 0;
        self.next_index += 1;
        self.report.chunks_created += 1;
        self.report.chunk_files.push(path);
        Ok(())
    }

    /// Push buffered rows of the open chunk to the file.
    pub fn flush(&mut self) -> Result<()> {
        if let Some(out) = self.current.as_mut() {
            out.flush()
                .with_context(|| format!("failed to flush {} chunk", self.category))?;
        }
        Ok(())
    }

    fn close_current(&mut self) -> Result<()> {
        if let Some(mut out) = self.current.take() {
            out.flush()?;
        }
        Ok(())
    }

    pub fn finish(mut self) -> Result<WriterReport> {
        self.close_current()?;
        Ok(self.report)
    }
}

/// Single consumer loop for one output queue. Runs on a blocking thread.
///
/// A `Commit` is answered on `acks` once every row queued before it has been
/// flushed to a chunk file. After the shutdown sentinel the queue is drained
/// of everything already enqueued before the writer finishes. A queue that
/// closes without the sentinel is a pipeline failure.
pub fn run_writer(
    mut receiver: mpsc::Receiver<WriterMessage>,
    mut writer: ChunkWriter,
    acks: mpsc::UnboundedSender<PathBuf>,
) -> Result<WriterReport> {
    let mut state = WriterState::Running;

    loop {
        state = match state {
            WriterState::Running => match receiver.blocking_recv() {
                Some(WriterMessage::Rows(rows)) => {
                    writer.write_rows(&rows)?;
                    WriterState::Running
                }
                Some(WriterMessage::Commit(path)) => {
                    commit(&mut writer, &acks, path)?;
                    WriterState::Running
                }
                Some(WriterMessage::Shutdown) => WriterState::Draining,
                None => anyhow::bail!(
                    "{} queue closed before the shutdown sentinel",
                    writer.category()
                ),
            },
            WriterState::Draining => match receiver.try_recv() {
                Ok(WriterMessage::Rows(rows)) => {
                    writer.write_rows(&rows)?;
                    WriterState::Draining
                }
                Ok(WriterMessage::Commit(path)) => {
                    commit(&mut writer, &acks, path)?;
                    WriterState::Draining
                }
                Ok(WriterMessage::Shutdown) => WriterState::Draining,
                Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => {
                    WriterState::Finished
                }
            },
            WriterState::Finished => break,
        };
    }

    let report = writer.finish()?;
    info!(
        "{} writer finished: {} rows in {} new chunks",
        report.category, report.rows_written, report.chunks_created
    );
    Ok(report)
}

fn commit(
    writer: &mut ChunkWriter,
    acks: &mpsc::UnboundedSender<PathBuf>,
    path: PathBuf,
) -> Result<()> {
    writer.flush()?;
    if let Err(unsent) = acks.send(path) {
        debug!("No listener for {} commit of {}", writer.category(), unsent.0.display());
    }
    Ok(())
}
