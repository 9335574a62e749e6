//! `otaslice` command line entry point.

use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use tracing::{debug, error, info};

use otaslice::io::ProgressFn;
use otaslice::{
    ArchiveEntry, Cli, Input, LocalFile, Orchestrator, RangeSource, RemoteFile, SeekableSource,
    ZipArchive, logging,
};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    logging::init(cli.verbosity());
    let _ = rustls::crypto::aws_lc_rs::default_provider().install_default();

    if cli.list || cli.metadata {
        return match inspect(&cli).await {
            Ok(()) => ExitCode::SUCCESS,
            Err(e) => {
                error!("{e:#}");
                ExitCode::FAILURE
            }
        };
    }

    let input = cli.input();
    let progress: ProgressFn = Arc::new(|done: u64, total: u64| {
        tracing::trace!(done, total, "received");
    });
    let orchestrator = Orchestrator::new(cli.extract_options()).with_progress(progress);
    let outcome = orchestrator.run(&input).await;

    if outcome.is_success() {
        for path in outcome.outputs() {
            println!("{}", path.display());
        }
    } else {
        error!("all strategies failed for {input}");
        eprintln!("{}", outcome.failure_summary());
    }
    if input.is_remote() {
        info!(
            "total bytes transferred: {}",
            format_size(outcome.transferred_bytes)
        );
    }

    ExitCode::from(outcome.exit_code())
}

/// `--list` and `--metadata`.
async fn inspect(cli: &Cli) -> Result<()> {
    match cli.input() {
        Input::Remote(url) => {
            let source = RangeSource::connect(url.as_str(), cli.retry_policy()).await?;
            if cli.metadata {
                println!("url:           {}", source.url());
                println!("size:          {} ({})", source.size(), format_size(source.size()));
                println!("accept-ranges: bytes");
            }
            if cli.list {
                let archive = ZipArchive::open(RemoteFile::from_source(source)).await?;
                list_entries(archive.entries());
                let transferred = archive.source().transferred_bytes();
                archive.close().await?;
                debug!("listing transferred {}", format_size(transferred));
            }
        }
        Input::Local(path) => {
            let file = LocalFile::open(&path).await?;
            if cli.metadata {
                println!("path:          {}", path.display());
                println!("size:          {} ({})", file.size(), format_size(file.size()));
            }
            if cli.list {
                let archive = ZipArchive::open(file).await?;
                list_entries(archive.entries());
                archive.close().await?;
            }
        }
    }
    Ok(())
}

fn list_entries(entries: &[ArchiveEntry]) {
    println!(
        "{:>12}  {:>12}  {:>5}  {:<7}  Name",
        "Length", "Size", "Cmpr", "Method"
    );
    println!("{}", "-".repeat(70));

    let mut total_size = 0u64;
    let mut total_compressed = 0u64;
    let mut file_count = 0usize;

    for entry in entries {
        println!(
            "{:>12}  {:>12}  {}  {:<7}  {}",
            entry.size,
            entry.compressed_size,
            ratio(entry.compressed_size, entry.size),
            entry.compression.label(),
            entry.name
        );
        if !entry.is_directory {
            total_size += entry.size;
            total_compressed += entry.compressed_size;
            file_count += 1;
        }
    }

    println!("{}", "-".repeat(70));
    println!(
        "{:>12}  {:>12}  {}  {:<7}  {} files",
        total_size,
        total_compressed,
        ratio(total_compressed, total_size),
        "",
        file_count
    );
}

/// Space saved by compression, as a percentage.
fn ratio(compressed: u64, size: u64) -> String {
    if size > 0 && compressed <= size {
        format!("{:>4}%", 100 - (compressed * 100 / size))
    } else {
        "  0%".to_string()
    }
}

fn format_size(size: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if size >= GB {
        format!("{:.2} GB", size as f64 / GB as f64)
    } else if size >= MB {
        format!("{:.2} MB", size as f64 / MB as f64)
    } else if size >= KB {
        format!("{:.2} KB", size as f64 / KB as f64)
    } else {
        format!("{} bytes", size)
    }
}
