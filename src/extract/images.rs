use std::collections::HashSet;
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use crate::error::Result;
use crate::fetch::PartialOutput;
use crate::io::{ProgressFn, SeekableSource};
use crate::zip::{ArchiveEntry, ZipArchive};

/// Extensions treated as raw partition images.
pub const IMAGE_EXTENSIONS: [&str; 3] = [".img", ".bin", ".raw"];

/// Case-insensitive substrings selecting which images to extract.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PartitionFilter {
    needles: Vec<String>,
}

impl PartitionFilter {
    /// Parse a comma-separated list; blank items are ignored.
    pub fn parse(list: &str) -> Self {
        Self::new(list.split(','))
    }

    pub fn new<I, T>(needles: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: AsRef<str>,
    {
        let needles = needles
            .into_iter()
            .map(|n| n.as_ref().trim().to_lowercase())
            .filter(|n| !n.is_empty())
            .collect();
        Self { needles }
    }

    pub fn needles(&self) -> &[String] {
        &self.needles
    }

    pub fn matches(&self, name: &str) -> bool {
        let name = name.to_lowercase();
        self.needles.iter().any(|n| name.contains(n.as_str()))
    }
}

pub fn is_image(name: &str) -> bool {
    let name = name.to_lowercase();
    IMAGE_EXTENSIONS.iter().any(|ext| name.ends_with(ext))
}

pub fn is_nested_archive(name: &str) -> bool {
    name.to_lowercase().ends_with(".zip")
}

/// Image entry selected by `filter` (everything image-like when `None`).
pub fn is_selected(entry: &ArchiveEntry, filter: Option<&PartitionFilter>) -> bool {
    !entry.is_directory && is_image(&entry.name) && filter.is_none_or(|f| f.matches(&entry.name))
}

/// Result of a raw-image pass over one archive.
#[derive(Debug, Default)]
pub struct ImageReport {
    /// Image-like entries seen, selected or not.
    pub candidates: usize,
    pub written: Vec<PathBuf>,
    /// Selected images that could not be written.
    pub failed: usize,
}

impl ImageReport {
    /// Every selected image failed, so the pass produced nothing usable.
    pub fn all_failed(&self) -> bool {
        self.failed > 0 && self.written.is_empty()
    }

    fn record(&mut self, entry: &ArchiveEntry, result: Result<PathBuf>) {
        match result {
            Ok(path) => self.written.push(path),
            Err(e) => {
                warn!(entry = %entry.name, kind = %e.kind(), error = %e, "failed to extract image, continuing");
                self.failed += 1;
            }
        }
    }
}

/// Write every selected image of `archive`, and of archives nested one
/// level inside it, to `out_dir` under its base name.
///
/// A failing entry is logged and skipped; the others are still written.
/// Two images with the same base name land on the same path; the later
/// one replaces the earlier.
pub async fn extract_images<S: SeekableSource>(
    archive: &mut ZipArchive<S>,
    out_dir: &Path,
    filter: Option<&PartitionFilter>,
    progress: Option<&ProgressFn>,
) -> Result<ImageReport> {
    let mut report = ImageReport::default();
    let mut seen = HashSet::new();

    let entries: Vec<ArchiveEntry> = archive.entries().to_vec();
    for entry in entries.iter().filter(|e| !e.is_directory) {
        if is_image(&entry.name) {
            report.candidates += 1;
            if is_selected(entry, filter) {
                let result = write_entry(archive, entry, out_dir, &mut seen, progress).await;
                report.record(entry, result);
            }
        } else if is_nested_archive(&entry.name) {
            debug!(entry = %entry.name, "scanning nested archive");
            let reader = match archive.open_entry(entry).await {
                Ok(reader) => reader,
                Err(e) => {
                    warn!(entry = %entry.name, error = %e, "skipping unreadable nested archive");
                    continue;
                }
            };
            let mut nested = match ZipArchive::open(reader).await {
                Ok(nested) => nested,
                Err(e) => {
                    warn!(entry = %entry.name, error = %e, "skipping unreadable nested archive");
                    continue;
                }
            };
            let inner: Vec<ArchiveEntry> = nested.entries().to_vec();
            for inner_entry in inner.iter().filter(|e| !e.is_directory && is_image(&e.name)) {
                report.candidates += 1;
                if is_selected(inner_entry, filter) {
                    let result =
                        write_entry(&mut nested, inner_entry, out_dir, &mut seen, progress).await;
                    report.record(inner_entry, result);
                }
            }
        }
    }

    if report.written.is_empty() && report.failed == 0 && report.candidates > 0 {
        info!(
            candidates = report.candidates,
            "no image matched the partition filter, nothing extracted"
        );
    }
    Ok(report)
}

async fn write_entry<S: SeekableSource>(
    archive: &mut ZipArchive<S>,
    entry: &ArchiveEntry,
    out_dir: &Path,
    seen: &mut HashSet<PathBuf>,
    progress: Option<&ProgressFn>,
) -> Result<PathBuf> {
    let dest = out_dir.join(entry.base_name());
    if !seen.insert(dest.clone()) {
        debug!(entry = %entry.name, path = %dest.display(), "replacing earlier output with the same name");
    }

    let mut output = PartialOutput::create(&dest).await?;
    let written = archive
        .copy_entry(entry, output.file_mut(), progress)
        .await?;
    let path = output.commit().await?;
    info!(entry = %entry.name, path = %path.display(), bytes = written, "extracted image");
    Ok(path)
}
