//! Strategy selection for one input.
//!
//! A remote input is tried with [`Strategy::Payload`], then
//! [`Strategy::RawImages`], then [`Strategy::SingleEntry`], stopping at the
//! first success. A local input only gets [`Strategy::Payload`]. Each
//! attempt is recorded as an explicit [`StrategyResult`].

mod fallback;
mod images;
mod payload;

pub use fallback::{DEFAULT_TARGET, extract_single, matches_target};
pub use images::{
    IMAGE_EXTENSIONS, ImageReport, PartitionFilter, extract_images, is_image, is_nested_archive,
    is_selected,
};
pub use payload::{
    PAYLOAD_ENTRY_SUFFIX, PAYLOAD_MAGIC, PayloadCopier, PayloadDumper, PayloadHeader, is_payload,
};

use std::fmt;
use std::path::{Path, PathBuf};

use tracing::{info, warn};

use crate::error::{Error, ErrorKind, Result};
use crate::fetch::{ChunkedFetcher, DEFAULT_WORKERS};
use crate::io::{LocalFile, ProgressFn, RangeSource, RemoteFile, RetryPolicy, SeekableSource};
use crate::zip::ZipArchive;

/// Where the archive comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Input {
    Local(PathBuf),
    Remote(String),
}

impl Input {
    pub fn parse(path: &str) -> Self {
        if path.starts_with("http://") || path.starts_with("https://") {
            Input::Remote(path.to_string())
        } else {
            Input::Local(PathBuf::from(path))
        }
    }

    pub fn is_remote(&self) -> bool {
        matches!(self, Input::Remote(_))
    }
}

impl fmt::Display for Input {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Input::Local(path) => write!(f, "{}", path.display()),
            Input::Remote(url) => f.write_str(url),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    /// Hand the update payload to a [`PayloadDumper`].
    Payload,
    /// Copy image entries (and images in nested archives) verbatim.
    RawImages,
    /// Pull one target image with the chunked fetcher.
    SingleEntry,
}

impl Strategy {
    /// Strategies applicable to `input`, in the order they are attempted.
    pub fn plan(input: &Input) -> &'static [Strategy] {
        match input {
            Input::Remote(_) => &[Strategy::Payload, Strategy::RawImages, Strategy::SingleEntry],
            Input::Local(_) => &[Strategy::Payload],
        }
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Strategy::Payload => "payload",
            Strategy::RawImages => "raw-images",
            Strategy::SingleEntry => "single-entry",
        };
        f.write_str(name)
    }
}

#[derive(Debug)]
pub enum StrategyResult {
    Succeeded { outputs: Vec<PathBuf> },
    Failed { kind: ErrorKind, message: String },
}

#[derive(Debug)]
pub struct Attempt {
    pub strategy: Strategy,
    pub result: StrategyResult,
}

/// Everything the orchestrator tried for one input.
#[derive(Debug, Default)]
pub struct Outcome {
    pub attempts: Vec<Attempt>,
    /// Network bytes read through remote files.
    pub transferred_bytes: u64,
}

impl Outcome {
    pub fn succeeded(&self) -> Option<&Attempt> {
        self.attempts
            .iter()
            .find(|a| matches!(a.result, StrategyResult::Succeeded { .. }))
    }

    pub fn is_success(&self) -> bool {
        self.succeeded().is_some()
    }

    pub fn outputs(&self) -> &[PathBuf] {
        match self.succeeded().map(|a| &a.result) {
            Some(StrategyResult::Succeeded { outputs }) => outputs,
            _ => &[],
        }
    }

    /// Process exit status: 0 on any success, 1 otherwise.
    pub fn exit_code(&self) -> u8 {
        if self.is_success() { 0 } else { 1 }
    }

    /// One line per failed attempt.
    pub fn failure_summary(&self) -> String {
        self.attempts
            .iter()
            .filter_map(|a| match &a.result {
                StrategyResult::Failed { kind, message } => {
                    Some(format!("{} ({kind}): {message}", a.strategy))
                }
                StrategyResult::Succeeded { .. } => None,
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

#[derive(Debug, Clone)]
pub struct ExtractOptions {
    pub out_dir: PathBuf,
    pub partitions: Option<PartitionFilter>,
    pub workers: usize,
    pub retry: RetryPolicy,
    pub target_name: String,
}

impl Default for ExtractOptions {
    fn default() -> Self {
        Self {
            out_dir: PathBuf::from("output"),
            partitions: None,
            workers: DEFAULT_WORKERS,
            retry: RetryPolicy::default(),
            target_name: DEFAULT_TARGET.to_string(),
        }
    }
}

pub struct Orchestrator {
    options: ExtractOptions,
    dumper: Box<dyn PayloadDumper>,
    fetcher: ChunkedFetcher,
    progress: Option<ProgressFn>,
}

impl Orchestrator {
    pub fn new(options: ExtractOptions) -> Self {
        let fetcher = ChunkedFetcher::new(options.workers);
        Self {
            options,
            dumper: Box::new(PayloadCopier),
            fetcher,
            progress: None,
        }
    }

    pub fn with_dumper(mut self, dumper: Box<dyn PayloadDumper>) -> Self {
        self.dumper = dumper;
        self
    }

    pub fn with_fetcher(mut self, fetcher: ChunkedFetcher) -> Self {
        self.fetcher = fetcher;
        self
    }

    pub fn with_progress(mut self, progress: ProgressFn) -> Self {
        self.progress = Some(progress);
        self
    }

    pub fn options(&self) -> &ExtractOptions {
        &self.options
    }

    /// Attempt each applicable strategy in order until one succeeds.
    pub async fn run(&self, input: &Input) -> Outcome {
        let mut outcome = Outcome::default();

        for &strategy in Strategy::plan(input) {
            info!(%input, %strategy, "trying strategy");
            let result = match self.run_strategy(strategy, input, &mut outcome).await {
                Ok(outputs) => {
                    info!(%strategy, files = outputs.len(), "strategy succeeded");
                    StrategyResult::Succeeded { outputs }
                }
                Err(e) => {
                    warn!(%strategy, kind = %e.kind(), error = %e, "strategy failed");
                    StrategyResult::Failed {
                        kind: e.kind(),
                        message: e.to_string(),
                    }
                }
            };
            let done = matches!(result, StrategyResult::Succeeded { .. });
            outcome.attempts.push(Attempt { strategy, result });
            if done {
                break;
            }
        }

        outcome
    }

    async fn run_strategy(
        &self,
        strategy: Strategy,
        input: &Input,
        outcome: &mut Outcome,
    ) -> Result<Vec<PathBuf>> {
        match (strategy, input) {
            (Strategy::Payload, Input::Local(path)) => self.local_payload(path).await,
            (Strategy::Payload, Input::Remote(url)) => {
                let mut archive = self.open_remote(url).await?;
                let result = self.payload_from_archive(&mut archive).await;
                self.finish_remote(archive, outcome).await;
                result
            }
            (Strategy::RawImages, Input::Remote(url)) => {
                let mut archive = self.open_remote(url).await?;
                let result = self.raw_images(&mut archive).await;
                self.finish_remote(archive, outcome).await;
                result
            }
            (Strategy::SingleEntry, Input::Remote(url)) => {
                let mut archive = self.open_remote(url).await?;
                let result = self.single_entry(&mut archive).await;
                self.finish_remote(archive, outcome).await;
                result
            }
            (strategy, input) => Err(Error::archive(format!(
                "{strategy} extraction does not apply to {input}"
            ))),
        }
    }

    async fn open_remote(&self, url: &str) -> Result<ZipArchive<RemoteFile>> {
        let mut source = RangeSource::connect(url, self.options.retry.clone()).await?;
        if let Some(progress) = &self.progress {
            source = source.with_progress(progress.clone());
        }
        ZipArchive::open(RemoteFile::from_source(source)).await
    }

    async fn finish_remote(&self, archive: ZipArchive<RemoteFile>, outcome: &mut Outcome) {
        outcome.transferred_bytes += archive.source().transferred_bytes();
        if let Err(e) = archive.close().await {
            warn!(error = %e, "failed to close remote archive");
        }
    }

    async fn local_payload(&self, path: &Path) -> Result<Vec<PathBuf>> {
        let mut file = LocalFile::open(path).await?;
        if is_payload(&mut file).await? {
            let result = self.dump(&mut file).await;
            file.close().await?;
            return result;
        }
        let mut archive = ZipArchive::open(file).await?;
        let result = self.payload_from_archive(&mut archive).await;
        archive.close().await?;
        result
    }

    async fn payload_from_archive<S: SeekableSource>(
        &self,
        archive: &mut ZipArchive<S>,
    ) -> Result<Vec<PathBuf>> {
        let entry = archive
            .find(|e| !e.is_directory && e.name.ends_with(PAYLOAD_ENTRY_SUFFIX))
            .ok_or_else(|| Error::archive(format!("no {PAYLOAD_ENTRY_SUFFIX} in archive")))?;
        info!(entry = %entry.name, size = entry.size, "located payload entry");
        let mut reader = archive.open_entry(&entry).await?;
        self.dump(&mut reader).await
    }

    async fn dump<S: SeekableSource>(&self, payload: &mut S) -> Result<Vec<PathBuf>> {
        let partitions = self.options.partitions.as_ref().map(|f| f.needles());
        self.dumper
            .dump(payload, &self.options.out_dir, partitions)
            .await
    }

    async fn raw_images(&self, archive: &mut ZipArchive<RemoteFile>) -> Result<Vec<PathBuf>> {
        let report = extract_images(
            archive,
            &self.options.out_dir,
            self.options.partitions.as_ref(),
            self.progress.as_ref(),
        )
        .await?;
        if report.candidates == 0 {
            return Err(Error::archive("archive contains no image files"));
        }
        if report.all_failed() {
            return Err(Error::archive(format!(
                "all {} selected image(s) failed to extract",
                report.failed
            )));
        }
        if report.failed > 0 {
            warn!(
                failed = report.failed,
                written = report.written.len(),
                "some images could not be extracted"
            );
        }
        Ok(report.written)
    }

    async fn single_entry(&self, archive: &mut ZipArchive<RemoteFile>) -> Result<Vec<PathBuf>> {
        let path = extract_single(
            archive,
            &self.options.target_name,
            &self.options.out_dir,
            &self.fetcher,
            self.progress.clone(),
        )
        .await?;
        Ok(vec![path])
    }
}
