use std::io::SeekFrom;

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tracing::debug;

use super::extractor::copy_entry;
use super::structures::ArchiveEntry;
use crate::error::Result;
use crate::io::{LocalFile, SeekableSource, SliceSource};

/// Seekable stream over one entry's uncompressed bytes.
///
/// Stored entries are read straight from the parent source. Compressed
/// entries are inflated once into an anonymous temporary file, since a
/// deflate stream cannot be entered at an arbitrary offset.
pub enum EntryReader<S> {
    Stored(SliceSource<S>),
    Inflated(LocalFile),
}

impl<S: SeekableSource> EntryReader<S> {
    pub(crate) async fn open(mut source: S, entry: &ArchiveEntry, data_offset: u64) -> Result<Self> {
        if entry.is_stored() {
            return Ok(EntryReader::Stored(SliceSource::new(
                source,
                data_offset,
                entry.size,
            )?));
        }

        debug!(entry = %entry.name, size = entry.size, "inflating entry to scratch file");
        let mut spool = tokio::fs::File::from_std(tempfile::tempfile()?);
        copy_entry(&mut source, entry, data_offset, &mut spool, None).await?;
        spool.flush().await?;
        Ok(EntryReader::Inflated(LocalFile::from_file(spool).await?))
    }
}

#[async_trait]
impl<S: SeekableSource> SeekableSource for EntryReader<S> {
    async fn seek(&mut self, pos: SeekFrom) -> Result<u64> {
        match self {
            EntryReader::Stored(s) => s.seek(pos).await,
            EntryReader::Inflated(f) => f.seek(pos).await,
        }
    }

    async fn read(&mut self, n: usize) -> Result<Vec<u8>> {
        match self {
            EntryReader::Stored(s) => s.read(n).await,
            EntryReader::Inflated(f) => f.read(n).await,
        }
    }

    fn tell(&self) -> u64 {
        match self {
            EntryReader::Stored(s) => s.tell(),
            EntryReader::Inflated(f) => f.tell(),
        }
    }

    fn size(&self) -> u64 {
        match self {
            EntryReader::Stored(s) => s.size(),
            EntryReader::Inflated(f) => f.size(),
        }
    }

    async fn close(&mut self) -> Result<()> {
        match self {
            EntryReader::Stored(s) => s.close().await,
            EntryReader::Inflated(f) => f.close().await,
        }
    }
}
