use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;

use crate::extract::{ExtractOptions, Input, PartitionFilter};
use crate::fetch::DEFAULT_WORKERS;
use crate::io::RetryPolicy;

#[derive(Parser, Debug)]
#[command(name = "otaslice")]
#[command(version)]
#[command(about = "Extract partition images from local or remote Android OTA archives", long_about = None)]
#[command(after_help = "Examples:\n  \
  otaslice https://example.com/ota.zip                 extract via payload, images or boot.img\n  \
  otaslice -p boot,vendor_boot -o out ota.zip         local OTA, selected partitions\n  \
  otaslice -l https://example.com/factory.zip         list entries of a remote archive")]
pub struct Cli {
    /// OTA archive path or HTTP URL
    #[arg(value_name = "PATH")]
    pub path: String,

    /// Partitions to extract, comma separated (case-insensitive substrings)
    #[arg(short = 'p', long = "partitions", value_name = "LIST")]
    pub partitions: Option<String>,

    /// Output directory
    #[arg(short = 'o', long = "out", value_name = "DIR", default_value = "output")]
    pub out: PathBuf,

    /// Concurrent range requests for chunked downloads
    #[arg(short = 'w', long = "workers", value_name = "N", default_value_t = DEFAULT_WORKERS)]
    pub workers: usize,

    /// Per-request timeout in seconds
    #[arg(long = "timeout", value_name = "SECS", default_value_t = 30)]
    pub timeout: u64,

    /// List archive entries and exit
    #[arg(short = 'l', long = "list")]
    pub list: bool,

    /// Print source metadata (size, range support) and exit
    #[arg(long = "metadata")]
    pub metadata: bool,

    /// More logging (-vv for trace)
    #[arg(short = 'v', action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Less logging (-qq => errors only)
    #[arg(short = 'q', action = clap::ArgAction::Count)]
    pub quiet: u8,
}

impl Cli {
    pub fn input(&self) -> Input {
        Input::parse(&self.path)
    }

    pub fn verbosity(&self) -> i8 {
        self.verbose.min(8) as i8 - self.quiet.min(8) as i8
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::default().with_timeout(Duration::from_secs(self.timeout.max(1)))
    }

    pub fn extract_options(&self) -> ExtractOptions {
        ExtractOptions {
            out_dir: self.out.clone(),
            partitions: self
                .partitions
                .as_deref()
                .map(PartitionFilter::parse)
                .filter(|f| !f.needles().is_empty()),
            workers: self.workers.max(1),
            retry: self.retry_policy(),
            ..ExtractOptions::default()
        }
    }
}
