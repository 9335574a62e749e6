use std::path::{Path, PathBuf};

use tracing::info;

use crate::error::{Error, Result};
use crate::fetch::ChunkedFetcher;
use crate::io::{ProgressFn, RemoteFile};
use crate::zip::{ArchiveEntry, ZipArchive};

/// Image pulled out when an archive has neither a payload nor usable images.
pub const DEFAULT_TARGET: &str = "boot.img";

pub fn matches_target(entry: &ArchiveEntry, target: &str) -> bool {
    !entry.is_directory && entry.base_name().eq_ignore_ascii_case(target)
}

/// Extract the first entry named `target` through `fetcher`.
pub async fn extract_single(
    archive: &mut ZipArchive<RemoteFile>,
    target: &str,
    out_dir: &Path,
    fetcher: &ChunkedFetcher,
    progress: Option<ProgressFn>,
) -> Result<PathBuf> {
    let entry = archive
        .find(|e| matches_target(e, target))
        .ok_or_else(|| Error::archive(format!("no {target} in archive")))?;
    let data_offset = archive.data_offset(&entry).await?;
    info!(
        entry = %entry.name,
        size = entry.size,
        method = %entry.compression.label(),
        "falling back to single-entry extraction"
    );

    let source = archive.source().source().ok_or(Error::Closed)?;
    let dest = out_dir.join(entry.base_name());
    fetcher
        .fetch_entry(source, &entry, data_offset, &dest, progress)
        .await?;
    Ok(dest)
}
