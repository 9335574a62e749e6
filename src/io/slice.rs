use std::io::SeekFrom;

use async_trait::async_trait;

use super::{SeekableSource, clamp_read, resolve_seek};
use crate::error::{Error, Result};

/// A window `[start, start + len)` of another source, addressed from 0.
///
/// Closing a slice only detaches it; the parent stays open for its owner.
pub struct SliceSource<S> {
    inner: S,
    start: u64,
    len: u64,
    pos: u64,
    closed: bool,
}

impl<S: SeekableSource> SliceSource<S> {
    pub fn new(inner: S, start: u64, len: u64) -> Result<Self> {
        if start + len > inner.size() {
            return Err(Error::Range {
                target: (start + len) as i128,
                size: inner.size(),
            });
        }
        Ok(Self {
            inner,
            start,
            len,
            pos: 0,
            closed: false,
        })
    }

    pub fn into_inner(self) -> S {
        self.inner
    }
}

#[async_trait]
impl<S: SeekableSource> SeekableSource for SliceSource<S> {
    async fn seek(&mut self, pos: SeekFrom) -> Result<u64> {
        if self.closed {
            return Err(Error::Closed);
        }
        self.pos = resolve_seek(pos, self.pos, self.len)?;
        Ok(self.pos)
    }

    async fn read(&mut self, n: usize) -> Result<Vec<u8>> {
        if self.closed {
            return Err(Error::Closed);
        }
        let len = clamp_read(self.pos, n, self.len);
        if len == 0 {
            return Ok(Vec::new());
        }
        self.inner.seek(SeekFrom::Start(self.start + self.pos)).await?;
        let data = self.inner.read(len).await?;
        self.pos += data.len() as u64;
        Ok(data)
    }

    fn tell(&self) -> u64 {
        self.pos
    }

    fn size(&self) -> u64 {
        self.len
    }

    async fn close(&mut self) -> Result<()> {
        self.closed = true;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::MemoryFile;

    #[tokio::test]
    async fn test_slice_is_zero_based() {
        let mut parent = MemoryFile::new(b"headerPAYLOADtrailer".to_vec());
        let mut slice = SliceSource::new(&mut parent, 6, 7).unwrap();
        assert_eq!(slice.size(), 7);
        assert_eq!(slice.read(3).await.unwrap(), b"PAY");
        slice.seek(SeekFrom::End(-2)).await.unwrap();
        assert_eq!(slice.read(10).await.unwrap(), b"AD");
        assert!(slice.seek(SeekFrom::Start(8)).await.is_err());
        slice.close().await.unwrap();

        assert_eq!(parent.read_exact_at(0, 6).await.unwrap(), b"header");
    }

    #[test]
    fn test_slice_must_fit_parent() {
        let parent = MemoryFile::new(vec![0u8; 4]);
        assert!(SliceSource::new(parent, 2, 3).is_err());
    }
}
