use std::io::SeekFrom;

use flate2::{Decompress, FlushDecompress, Status};
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tracing::trace;

use super::structures::{ArchiveEntry, CompressionMethod};
use crate::error::{Error, Result};
use crate::io::{ByteWindow, ProgressFn, SeekableSource};

/// Size of each sequential read during a streaming copy.
pub const COPY_BLOCK_SIZE: u64 = 1024 * 1024;

/// Copy one entry from `source` into `writer`, one window at a time.
///
/// Stored data is passed through; deflate data is inflated incrementally.
/// Progress reports bytes written, and the result is checked against the
/// entry's declared size and CRC-32.
pub async fn copy_entry<S, W>(
    source: &mut S,
    entry: &ArchiveEntry,
    data_offset: u64,
    writer: &mut W,
    progress: Option<&ProgressFn>,
) -> Result<u64>
where
    S: SeekableSource + ?Sized,
    W: AsyncWrite + Unpin + Send + ?Sized,
{
    let mut inflater = match entry.compression {
        CompressionMethod::Stored => None,
        CompressionMethod::Deflate => Some(Inflater::new()),
        CompressionMethod::Unknown(method) => {
            return Err(Error::archive(format!(
                "unsupported compression method {method} for {}",
                entry.name
            )));
        }
    };

    let input_len = if inflater.is_some() {
        entry.compressed_size
    } else {
        entry.size
    };

    source.seek(SeekFrom::Start(data_offset)).await?;

    let mut hasher = crc32fast::Hasher::new();
    let mut out = Vec::new();
    let mut consumed = 0u64;
    let mut written = 0u64;

    while consumed < input_len {
        let window = ByteWindow::new(
            data_offset + consumed,
            (input_len - consumed).min(COPY_BLOCK_SIZE),
        );
        let block = source
            .read(window.len as usize)
            .await
            .map_err(|e| Error::Extraction {
                entry: entry.name.clone(),
                window,
                source: Box::new(e),
            })?;
        if block.len() as u64 != window.len {
            return Err(Error::archive(format!(
                "unexpected end of data in {} at {window}",
                entry.name
            )));
        }
        consumed += window.len;

        let data = match inflater.as_mut() {
            Some(inflater) => {
                out.clear();
                inflater.feed(&block, &mut out)?;
                &out
            }
            None => &block,
        };

        hasher.update(data);
        writer.write_all(data).await?;
        written += data.len() as u64;
        trace!(entry = %entry.name, written, "copied block");
        if let Some(progress) = progress {
            progress(written, entry.size);
        }
    }

    if let Some(inflater) = &inflater
        && !inflater.finished
    {
        return Err(Error::archive(format!(
            "deflate stream of {} ended early",
            entry.name
        )));
    }
    if written != entry.size {
        return Err(Error::archive(format!(
            "{} produced {written} bytes, expected {}",
            entry.name, entry.size
        )));
    }

    let actual = hasher.finalize();
    if actual != entry.crc32 {
        return Err(Error::Checksum {
            entry: entry.name.clone(),
            expected: entry.crc32,
            actual,
        });
    }

    writer.flush().await?;
    Ok(written)
}

/// Incremental raw-deflate decoder.
struct Inflater {
    inner: Decompress,
    finished: bool,
}

impl Inflater {
    const OUTPUT_STEP: usize = 256 * 1024;

    fn new() -> Self {
        Self {
            inner: Decompress::new(false),
            finished: false,
        }
    }

    /// Decode `input`, appending everything it yields to `out`.
    fn feed(&mut self, mut input: &[u8], out: &mut Vec<u8>) -> Result<()> {
        while !self.finished {
            if out.capacity() - out.len() < Self::OUTPUT_STEP {
                out.reserve(Self::OUTPUT_STEP);
            }
            let in_before = self.inner.total_in();
            let out_before = self.inner.total_out();

            let status = self
                .inner
                .decompress_vec(input, out, FlushDecompress::None)
                .map_err(|e| Error::archive(format!("corrupt deflate stream: {e}")))?;

            let used = (self.inner.total_in() - in_before) as usize;
            input = &input[used..];
            let produced = self.inner.total_out() - out_before;

            match status {
                Status::StreamEnd => self.finished = true,
                Status::Ok | Status::BufError => {
                    if used == 0 && produced == 0 {
                        break;
                    }
                }
            }
        }
        Ok(())
    }
}
