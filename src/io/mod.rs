mod http;
mod local;
mod memory;
mod range;
mod slice;

pub use http::RemoteFile;
pub use local::LocalFile;
pub use memory::MemoryFile;
pub use range::{ByteWindow, ProgressFn, RangeSource, RetryPolicy};
pub use slice::SliceSource;

use std::io::SeekFrom;

use async_trait::async_trait;

use crate::error::{Error, Result};

/// Random-access byte stream of fixed length.
///
/// This is the whole capability set an archive reader or payload parser may
/// rely on. Implementations never read ahead of what is requested.
#[async_trait]
pub trait SeekableSource: Send {
    /// Move the cursor. Targets outside `[0, size]` fail with
    /// [`Error::Range`] and leave the cursor untouched.
    async fn seek(&mut self, pos: SeekFrom) -> Result<u64>;

    /// Read up to `n` bytes from the cursor. Fewer bytes come back only at
    /// end of file; `n == 0` never touches the underlying medium.
    async fn read(&mut self, n: usize) -> Result<Vec<u8>>;

    fn tell(&self) -> u64;

    fn size(&self) -> u64;

    /// Release the underlying handle. Calling it twice is a no-op.
    async fn close(&mut self) -> Result<()>;

    /// Everything from the cursor to the end, in one read.
    async fn read_all(&mut self) -> Result<Vec<u8>> {
        let remaining = self.size() - self.tell();
        self.read(remaining as usize).await
    }

    /// Seek to `offset` and read exactly `n` bytes, or fail with
    /// [`Error::Archive`] if the source ends first.
    async fn read_exact_at(&mut self, offset: u64, n: usize) -> Result<Vec<u8>> {
        self.seek(SeekFrom::Start(offset)).await?;
        let data = self.read(n).await?;
        if data.len() != n {
            return Err(Error::archive(format!(
                "unexpected end of data at offset {offset}: wanted {n} bytes, got {}",
                data.len()
            )));
        }
        Ok(data)
    }
}

#[async_trait]
impl<S: SeekableSource + ?Sized> SeekableSource for &mut S {
    async fn seek(&mut self, pos: SeekFrom) -> Result<u64> {
        (**self).seek(pos).await
    }

    async fn read(&mut self, n: usize) -> Result<Vec<u8>> {
        (**self).read(n).await
    }

    fn tell(&self) -> u64 {
        (**self).tell()
    }

    fn size(&self) -> u64 {
        (**self).size()
    }

    async fn close(&mut self) -> Result<()> {
        (**self).close().await
    }
}

#[async_trait]
impl<S: SeekableSource + ?Sized> SeekableSource for Box<S> {
    async fn seek(&mut self, pos: SeekFrom) -> Result<u64> {
        (**self).seek(pos).await
    }

    async fn read(&mut self, n: usize) -> Result<Vec<u8>> {
        (**self).read(n).await
    }

    fn tell(&self) -> u64 {
        (**self).tell()
    }

    fn size(&self) -> u64 {
        (**self).size()
    }

    async fn close(&mut self) -> Result<()> {
        (**self).close().await
    }
}

/// Compute the absolute target of a seek against a stream of length `size`.
pub(crate) fn resolve_seek(pos: SeekFrom, current: u64, size: u64) -> Result<u64> {
    let target = match pos {
        SeekFrom::Start(offset) => offset as i128,
        SeekFrom::Current(delta) => current as i128 + delta as i128,
        SeekFrom::End(delta) => size as i128 + delta as i128,
    };
    if target < 0 || target > size as i128 {
        return Err(Error::Range { target, size });
    }
    Ok(target as u64)
}

/// Number of bytes a read of `n` at `pos` actually yields.
pub(crate) fn clamp_read(pos: u64, n: usize, size: u64) -> usize {
    (n as u64).min(size.saturating_sub(pos)) as usize
}
