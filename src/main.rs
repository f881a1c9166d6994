use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{info, warn};

use pii_sift::constants::DEFAULT_CONFIG_FILE_NAME;
use pii_sift::utils::{discover_input_files, format_duration, get_memory_info, setup_logging};
use pii_sift::{SiftConfig, SiftProcessor};

#[derive(Parser)]
#[command(name = "pii-sift")]
#[command(about = "🔎 PII Sift - Resumable parallel PII classifier for log-line records")]
#[command(version)]
struct Args {
    #[arg(short, long, help = "Input directory containing log files")]
    input: PathBuf,

    #[arg(short, long, help = "Output directory (overrides the config file)")]
    output: Option<PathBuf>,

    #[arg(short, long, default_value = DEFAULT_CONFIG_FILE_NAME, help = "Configuration file")]
    config: PathBuf,

    #[arg(short, long, help = "Number of parallel file workers (0 = one per CPU)")]
    workers: Option<usize>,

    #[arg(long, help = "Maximum rows per output chunk file")]
    chunk_lines: Option<usize>,

    #[arg(short, long, help = "Verbose output")]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config_existed = args.config.exists();
    let mut config = SiftConfig::load_or_create(&args.config)?;
    if let Some(output) = args.output {
        config.output_directory = output;
    }
    if let Some(workers) = args.workers {
        config.worker_count = workers;
    }
    if let Some(chunk_lines) = args.chunk_lines {
        config.chunk_max_lines = chunk_lines;
    }
    if args.verbose {
        config.verbose = true;
    }
    config.validate()?;

    setup_logging(config.verbose)?;

    println!("🔎 PII Sift");
    println!("📂 Input: {}", args.input.display());
    println!("📝 Output: {}", config.output_directory.display());
    if !config_existed {
        println!("📄 Config file not found, created default: {}", args.config.display());
    }

    if !args.input.exists() {
        anyhow::bail!("Input directory does not exist: {}", args.input.display());
    }

    let (total_gb, available_gb) = get_memory_info();
    info!("System memory: {:.2} GB total, {:.2} GB available", total_gb, available_gb);

    let input_files = discover_input_files(&args.input, &config.input_extensions)?;
    if input_files.is_empty() {
        anyhow::bail!(
            "No input files with extensions {:?} found in: {}",
            config.input_extensions,
            args.input.display()
        );
    }
    println!("🔍 Found {} input files", input_files.len());
    println!("🧵 Workers: {}", config.effective_workers());

    let shutdown_flag = Arc::new(AtomicBool::new(false));
    let shutdown_flag_clone = shutdown_flag.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Shutdown signal received, finishing in-flight files");
            shutdown_flag_clone.store(true, Ordering::Relaxed);
        }
    });

    let summary_path = config.summary_path();
    let mut processor = SiftProcessor::new(config)?.with_shutdown_signal(shutdown_flag);
    let summary = processor.process(&input_files).await?;
    let counters = &summary.counters;

    println!("\n🎉 Processing finished");
    println!("=======================================");
    println!("📁 Files: {} processed, {} skipped, {} failed",
        summary.files_processed, summary.files_skipped, summary.files_failed);
    println!("📊 Lines scanned: {}", counters.lines_scanned);
    println!("🎯 Total matches: {}", counters.total_matches);
    println!("✅ Extracted: {}", counters.extracted);
    println!("🪞 Mirrored: {}", counters.mirrored);
    println!("🗑️ Dropped (path-only): {}", counters.dropped_path_only);
    println!("🚫 Lines without PII: {}", counters.lines_dropped_entirely);
    println!("🔢 Checksum rejections: {}", counters.checksum_rejected);
    println!("📦 Chunks created: {} extracted, {} mirrored",
        summary.extracted_chunks_created, summary.mirrored_chunks_created);
    println!("⚖️ Consistency check: {}", if summary.is_consistent() { "OK" } else { "FAILED" });
    println!("⏱️ Total time: {}", format_duration(summary.elapsed));
    println!("🔄 Throughput: {:.0} lines/sec", summary.lines_per_second());
    println!("📝 Summary: {}", summary_path.display());

    if summary.interrupted {
        println!("🛑 Run interrupted; rerun to process the remaining files");
    }

    if summary.has_failures() {
        for (file, message) in &summary.errors {
            eprintln!("⚠️ {}: {}", file, message);
        }
        std::process::exit(1);
    }

    Ok(())
}
