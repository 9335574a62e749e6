use std::io::SeekFrom;
use std::path::Path;

use async_trait::async_trait;
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncSeekExt};

use super::{SeekableSource, clamp_read, resolve_seek};
use crate::error::{Error, Result};

/// Local file with the same capability set as a remote one.
pub struct LocalFile {
    file: Option<File>,
    size: u64,
    pos: u64,
}

impl LocalFile {
    pub async fn open(path: &Path) -> Result<Self> {
        let file = File::open(path).await?;
        Self::from_file(file).await
    }

    /// Wrap an already open handle; the cursor starts at 0.
    pub async fn from_file(mut file: File) -> Result<Self> {
        let size = file.metadata().await?.len();
        file.seek(SeekFrom::Start(0)).await?;
        Ok(Self {
            file: Some(file),
            size,
            pos: 0,
        })
    }
}

#[async_trait]
impl SeekableSource for LocalFile {
    async fn seek(&mut self, pos: SeekFrom) -> Result<u64> {
        let file = self.file.as_mut().ok_or(Error::Closed)?;
        let target = resolve_seek(pos, self.pos, self.size)?;
        file.seek(SeekFrom::Start(target)).await?;
        self.pos = target;
        Ok(target)
    }

    async fn read(&mut self, n: usize) -> Result<Vec<u8>> {
        let file = self.file.as_mut().ok_or(Error::Closed)?;
        let len = clamp_read(self.pos, n, self.size);
        let mut buf = vec![0u8; len];
        if len > 0 {
            file.read_exact(&mut buf).await?;
            self.pos += len as u64;
        }
        Ok(buf)
    }

    fn tell(&self) -> u64 {
        self.pos
    }

    fn size(&self) -> u64 {
        self.size
    }

    async fn close(&mut self) -> Result<()> {
        self.file = None;
        Ok(())
    }
}
