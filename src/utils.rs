use anyhow::Result;
use std::path::{Path, PathBuf};
use std::time::Duration;
use sysinfo::System;
use tracing::Level;
use tracing_subscriber::{fmt, EnvFilter};
use walkdir::WalkDir;

use crate::constants::BYTES_PER_GB;

pub fn setup_logging(verbose: bool) -> Result<()> {
    let level = if verbose { Level::DEBUG } else { Level::INFO };

    let filter = EnvFilter::from_default_env().add_directive(format!("pii_sift={}", level).parse()?);

    let subscriber = fmt::Subscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(verbose)
        .with_line_number(verbose)
        .finish();

    tracing::subscriber::set_global_default(subscriber)?;

    Ok(())
}

/// Files under `directory` whose extension is one of `extensions`
/// (case-insensitive), sorted by path.
pub fn discover_input_files<P: AsRef<Path>>(directory: P, extensions: &[String]) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();

    for entry in WalkDir::new(directory).follow_links(false) {
        let entry = entry?;
        let path = entry.path();

        if path.is_file() {
            if let Some(extension) = path.extension() {
                let extension = extension.to_string_lossy().to_lowercase();
                if extensions
                    .iter()
                    .any(|wanted| wanted.trim_start_matches('.').eq_ignore_ascii_case(&extension))
                {
                    files.push(path.to_path_buf());
                }
            }
        }
    }

    files.sort();
    Ok(files)
}

/// (total_memory_gb, available_memory_gb)
pub fn get_memory_info() -> (f64, f64) {
    let mut system = System::new_all();
    system.refresh_memory();

    let total_memory = system.total_memory() as f64 / BYTES_PER_GB;
    let available_memory = system.available_memory() as f64 / BYTES_PER_GB;

    (total_memory, available_memory)
}

pub fn format_duration(duration: Duration) -> String {
    let seconds = duration.as_secs_f64();
    if seconds < 60.0 {
        format!("{:.1}s", seconds)
    } else if seconds < 3600.0 {
        format!("{:.1}m", seconds / 60.0)
    } else {
        format!("{:.1}h", seconds / 3600.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(Duration::from_secs(30)), "30.0s");
        assert_eq!(format_duration(Duration::from_secs(90)), "1.5m");
        assert_eq!(format_duration(Duration::from_secs(3660)), "1.0h");
    }

    #[test]
    fn test_discover_input_files_filters_and_sorts() -> Result<()> {
        let dir = tempdir()?;
        std::fs::create_dir_all(dir.path().join("nested"))?;
        std::fs::write(dir.path().join("b.txt"), "x")?;
        std::fs::write(dir.path().join("a.TXT"), "x")?;
        std::fs::write(dir.path().join("nested").join("c.log"), "x")?;
        std::fs::write(dir.path().join("skip.csv"), "x")?;

        let files = discover_input_files(dir.path(), &["txt".to_string(), ".log".to_string()])?;
        let names: Vec<String> = files
            .iter()
            .map(|p| p.strip_prefix(dir.path()).unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["a.TXT", "b.txt", "nested/c.log"]);
        Ok(())
    }

    #[test]
    fn test_memory_info() {
        let (total, available) = get_memory_info();
        assert!(total > 0.0);
        assert!(available <= total);
    }
}
