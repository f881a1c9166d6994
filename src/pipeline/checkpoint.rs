use anyhow::{Context, Result};
use std::collections::HashSet;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::constants::CHECKPOINT_COMMENT_PREFIX;

/// Append-only log of completed input files, one basename per line.
#[derive(Debug, Clone)]
pub struct CheckpointLog {
    path: PathBuf,
    completed: HashSet<String>,
}

impl CheckpointLog {
    /// A missing log is an empty set; blank and `#` lines are ignored.
    pub fn load(path: &Path) -> Result<Self> {
        let mut completed = HashSet::new();
        if path.exists() {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("failed to read checkpoint log {}", path.display()))?;
            for line in content.lines() {
                let entry = line.trim();
                if entry.is_empty() || entry.starts_with(CHECKPOINT_COMMENT_PREFIX) {
                    continue;
                }
                completed.insert(entry.to_string());
            }
        }

        Ok(Self {
            path: path.to_path_buf(),
            completed,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn completed_count(&self) -> usize {
        self.completed.len()
    }

    pub fn is_complete(&self, file: &Path) -> bool {
        self.completed.contains(&basename(file))
    }

    /// Input files not yet recorded as complete, in their given order.
    pub fn pending_files(&self, all: &[PathBuf]) -> Vec<PathBuf> {
        all.iter()
            .filter(|file| !self.is_complete(file))
            .cloned()
            .collect()
    }

    pub fn mark_complete(&mut self, file: &Path) -> Result<()> {
        let name = basename(file);
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let mut log = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .with_context(|| format!("failed to open checkpoint log {}", self.path.display()))?;
        writeln!(log, "{}", name)?;
        log.flush()?;

        self.completed.insert(name);
        Ok(())
    }
}

pub fn basename(file: &Path) -> String {
    file.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| file.to_string_lossy().into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_missing_log_is_empty() {
        let dir = tempdir().unwrap();
        let log = CheckpointLog::load(&dir.path().join("resume.log")).unwrap();
        assert_eq!(log.completed_count(), 0);
        let all = vec![PathBuf::from("/in/a.txt"), PathBuf::from("/in/b.txt")];
        assert_eq!(log.pending_files(&all), all);
    }

    #[test]
    fn test_comments_and_blank_lines_ignored() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("resume.log");
        std::fs::write(&path, "# completed files\n\na.txt\n  b.txt  \n").unwrap();

        let log = CheckpointLog::load(&path).unwrap();
        assert_eq!(log.completed_count(), 2);
        let all = vec![
            PathBuf::from("/in/a.txt"),
            PathBuf::from("/other/b.txt"),
            PathBuf::from("/in/c.txt"),
        ];
        assert_eq!(log.pending_files(&all), vec![PathBuf::from("/in/c.txt")]);
    }

    #[test]
    fn test_mark_complete_appends_and_persists() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("resume.log");

        let mut log = CheckpointLog::load(&path).unwrap();
        log.mark_complete(Path::new("/in/a.txt")).unwrap();
        log.mark_complete(Path::new("/in/a.txt")).unwrap();
        log.mark_complete(Path::new("/in/b.txt")).unwrap();
        assert!(log.is_complete(Path::new("/elsewhere/a.txt")));

        let reloaded = CheckpointLog::load(&path).unwrap();
        assert_eq!(reloaded.completed_count(), 2);
        assert_eq!(
            std::fs::read_to_string(&path).unwrap(),
            "a.txt\na.txt\nb.txt\n"
        );
    }
}
