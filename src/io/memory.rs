use std::io::SeekFrom;

use async_trait::async_trait;

use super::{SeekableSource, clamp_read, resolve_seek};
use crate::error::{Error, Result};

/// In-memory buffer behind the [`SeekableSource`] interface.
pub struct MemoryFile {
    data: Vec<u8>,
    pos: u64,
    closed: bool,
}

impl MemoryFile {
    pub fn new(data: Vec<u8>) -> Self {
        Self {
            data,
            pos: 0,
            closed: false,
        }
    }

    pub fn into_inner(self) -> Vec<u8> {
        self.data
    }
}

#[async_trait]
impl SeekableSource for MemoryFile {
    async fn seek(&mut self, pos: SeekFrom) -> Result<u64> {
        if self.closed {
            return Err(Error::Closed);
        }
        self.pos = resolve_seek(pos, self.pos, self.size())?;
        Ok(self.pos)
    }

    async fn read(&mut self, n: usize) -> Result<Vec<u8>> {
        if self.closed {
            return Err(Error::Closed);
        }
        let len = clamp_read(self.pos, n, self.size());
        let start = self.pos as usize;
        self.pos += len as u64;
        Ok(self.data[start..start + len].to_vec())
    }

    fn tell(&self) -> u64 {
        self.pos
    }

    fn size(&self) -> u64 {
        self.data.len() as u64
    }

    async fn close(&mut self) -> Result<()> {
        self.closed = true;
        Ok(())
    }
}
