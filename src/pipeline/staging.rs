use anyhow::{Context, Result};
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use tokio::sync::mpsc;
use tracing::debug;

use crate::constants::{EXTRACTED_CATEGORY, MIRRORED_CATEGORY, STAGED_FILE_EXTENSION};
use crate::pipeline::chunk::WriterMessage;

/// One category's spill file for a single input file.
struct StagedFile {
    path: PathBuf,
    out: Option<BufWriter<File>>,
    rows: usize,
}

impl StagedFile {
    fn create(path: PathBuf, io_buffer_size: usize) -> Result<Self> {
        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&path)
            .with_context(|| format!("failed to create staging file {}", path.display()))?;
        Ok(Self {
            path,
            out: Some(BufWriter::with_capacity(io_buffer_size, file)),
            rows: 0,
        })
    }

    fn push(&mut self, row: &str) -> Result<()> {
        if let Some(out) = self.out.as_mut() {
            out.write_all(row.as_bytes())?;
            out.write_all(b"\n")?;
        }
        self.rows += 1;
        Ok(())
    }

    /// Replay the staged rows onto `tx` in batches of `batch_size`.
    fn forward(
        &mut self,
        tx: &mpsc::Sender<WriterMessage>,
        batch_size: usize,
        io_buffer_size: usize,
        category: &str,
    ) -> Result<()> {
        if let Some(mut out) = self.out.take() {
            out.flush()
                .with_context(|| format!("failed to flush staging file {}", self.path.display()))?;
        }
        if self.rows == 0 {
            return Ok(());
        }

        let file = File::open(&self.path)
            .with_context(|| format!("failed to reopen staging file {}", self.path.display()))?;
        let reader = BufReader::with_capacity(io_buffer_size, file);
        let mut batch = Vec::with_capacity(batch_size);
        for line in reader.lines() {
            batch.push(line?);
            if batch.len() >= batch_size {
                send(tx, std::mem::take(&mut batch), category)?;
            }
        }
        if !batch.is_empty() {
            send(tx, batch, category)?;
        }
        Ok(())
    }
}

impl Drop for StagedFile {
    fn drop(&mut self) {
        self.out.take();
        if let Err(e) = std::fs::remove_file(&self.path) {
            debug!("Could not remove staging file {}: {}", self.path.display(), e);
        }
    }
}

fn send(tx: &mpsc::Sender<WriterMessage>, rows: Vec<String>, category: &str) -> Result<()> {
    tx.blocking_send(WriterMessage::Rows(rows))
        .map_err(|_| anyhow::anyhow!("{} writer is no longer accepting rows", category))
}

/// Rows of one input file, held on disk until the file has been read to the
/// end. Dropping without `forward` discards them, so a file that fails
/// halfway leaves nothing behind in the output chunks.
pub struct StagedRows {
    extracted: StagedFile,
    mirrored: StagedFile,
    io_buffer_size: usize,
}

impl StagedRows {
    pub fn create(staging_dir: &Path, file_index: usize, io_buffer_size: usize) -> Result<Self> {
        let path = |category: &str| {
            staging_dir.join(format!(
                "{:06}_{}.{}",
                file_index, category, STAGED_FILE_EXTENSION
            ))
        };
        Ok(Self {
            extracted: StagedFile::create(path(EXTRACTED_CATEGORY), io_buffer_size)?,
            mirrored: StagedFile::create(path(MIRRORED_CATEGORY), io_buffer_size)?,
            io_buffer_size,
        })
    }

    pub fn push_extracted(&mut self, row: &str) -> Result<()> {
        self.extracted.push(row)
    }

    pub fn push_mirrored(&mut self, row: &str) -> Result<()> {
        self.mirrored.push(row)
    }

    pub fn staged_rows(&self) -> (usize, usize) {
        (self.extracted.rows, self.mirrored.rows)
    }

    /// Send every staged row to its writer, followed by a `Commit` for
    /// `source` on both queues. Sending blocks while a queue is full.
    pub fn forward(
        mut self,
        source: &Path,
        extracted_tx: &mpsc::Sender<WriterMessage>,
        mirrored_tx: &mpsc::Sender<WriterMessage>,
        batch_size: usize,
    ) -> Result<()> {
        let io_buffer_size = self.io_buffer_size;
        self.extracted
            .forward(extracted_tx, batch_size, io_buffer_size, EXTRACTED_CATEGORY)?;
        self.mirrored
            .forward(mirrored_tx, batch_size, io_buffer_size, MIRRORED_CATEGORY)?;

        for (tx, category) in [
            (extracted_tx, EXTRACTED_CATEGORY),
            (mirrored_tx, MIRRORED_CATEGORY),
        ] {
            tx.blocking_send(WriterMessage::Commit(source.to_path_buf()))
                .map_err(|_| anyhow::anyhow!("{} writer is no longer accepting rows", category))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn drain(rx: &mut mpsc::Receiver<WriterMessage>) -> (Vec<String>, Vec<PathBuf>) {
        let mut rows = Vec::new();
        let mut commits = Vec::new();
        while let Ok(message) = rx.try_recv() {
            match message {
                WriterMessage::Rows(batch) => rows.extend(batch),
                WriterMessage::Commit(path) => commits.push(path),
                WriterMessage::Shutdown => {}
            }
        }
        (rows, commits)
    }

    #[test]
    fn test_forward_replays_rows_in_order_then_commits() {
        let dir = tempdir().unwrap();
        let mut staged = StagedRows::create(dir.path(), 3, 1024).unwrap();
        for n in 0..5 {
            staged.push_extracted(&format!("e{}", n)).unwrap();
        }
        staged.push_mirrored("m0").unwrap();
        assert_eq!(staged.staged_rows(), (5, 1));

        let (etx, mut erx) = mpsc::channel(16);
        let (mtx, mut mrx) = mpsc::channel(16);
        staged.forward(Path::new("/in/a.txt"), &etx, &mtx, 2).unwrap();

        let (rows, commits) = drain(&mut erx);
        assert_eq!(rows, vec!["e0", "e1", "e2", "e3", "e4"]);
        assert_eq!(commits, vec![PathBuf::from("/in/a.txt")]);
        let (rows, commits) = drain(&mut mrx);
        assert_eq!(rows, vec!["m0"]);
        assert_eq!(commits.len(), 1);
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_dropped_stage_sends_nothing_and_cleans_up() {
        let dir = tempdir().unwrap();
        let mut staged = StagedRows::create(dir.path(), 0, 1024).unwrap();
        staged.push_extracted("row").unwrap();
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 2);

        drop(staged);
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }
}
