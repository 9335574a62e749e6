use std::io::SeekFrom;

use async_trait::async_trait;
use tracing::debug;

use super::range::{ByteWindow, RangeSource, RetryPolicy};
use super::{SeekableSource, clamp_read, resolve_seek};
use crate::error::{Error, Result};

/// Remote file exposed as a seekable stream.
///
/// Every [`read`](SeekableSource::read) becomes exactly one range request
/// for `[pos, min(pos + n, size))`. The cursor and connection are owned by
/// this value; share the underlying resource between tasks with
/// [`RangeSource::fork`] rather than sharing a `RemoteFile`.
pub struct RemoteFile {
    source: Option<RangeSource>,
    size: u64,
    pos: u64,
    transferred_bytes: u64,
}

impl std::fmt::Debug for RemoteFile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteFile")
            .field("size", &self.size)
            .field("pos", &self.pos)
            .field("transferred_bytes", &self.transferred_bytes)
            .finish_non_exhaustive()
    }
}

impl RemoteFile {
    /// Probe `url` and open it for reading.
    pub async fn open(url: impl Into<String>, policy: RetryPolicy) -> Result<Self> {
        Ok(Self::from_source(RangeSource::connect(url, policy).await?))
    }

    pub fn from_source(source: RangeSource) -> Self {
        Self {
            size: source.size(),
            source: Some(source),
            pos: 0,
            transferred_bytes: 0,
        }
    }

    /// Get total bytes transferred from network
    pub fn transferred_bytes(&self) -> u64 {
        self.transferred_bytes
    }

    /// The range source backing this file, unless it has been closed.
    pub fn source(&self) -> Option<&RangeSource> {
        self.source.as_ref()
    }

    pub fn is_closed(&self) -> bool {
        self.source.is_none()
    }
}

#[async_trait]
impl SeekableSource for RemoteFile {
    async fn seek(&mut self, pos: SeekFrom) -> Result<u64> {
        if self.source.is_none() {
            return Err(Error::Closed);
        }
        self.pos = resolve_seek(pos, self.pos, self.size)?;
        Ok(self.pos)
    }

    async fn read(&mut self, n: usize) -> Result<Vec<u8>> {
        let source = self.source.as_mut().ok_or(Error::Closed)?;
        let len = clamp_read(self.pos, n, self.size);
        if len == 0 {
            return Ok(Vec::new());
        }

        let data = source.fetch(ByteWindow::new(self.pos, len as u64)).await?;
        self.pos += data.len() as u64;
        self.transferred_bytes += data.len() as u64;
        Ok(data)
    }

    fn tell(&self) -> u64 {
        self.pos
    }

    fn size(&self) -> u64 {
        self.size
    }

    async fn close(&mut self) -> Result<()> {
        if let Some(source) = self.source.take() {
            debug!(
                url = source.url(),
                transferred = self.transferred_bytes,
                "closing remote file"
            );
        }
        Ok(())
    }
}
