use std::collections::BTreeMap;
use std::io;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::{OwnedSemaphorePermit, Semaphore, mpsc};
use tokio::task::JoinSet;
use tracing::{debug, info, trace, warn};

use super::output::PartialOutput;
use crate::error::{Error, Result};
use crate::io::{ByteWindow, ProgressFn, RangeSource, RemoteFile, SeekableSource};
use crate::zip::{ArchiveEntry, copy_entry};

/// Size of each independently fetched window.
pub const CHUNK_SIZE: u64 = 1024 * 1024;

/// Default number of concurrent chunk workers.
pub const DEFAULT_WORKERS: usize = 4;

/// One fetched window of an entry. `offset` is relative to the entry start.
#[derive(Debug)]
pub struct Chunk {
    pub index: usize,
    pub offset: u64,
    pub len: u64,
    pub payload: Vec<u8>,
}

type ChunkMessage = (usize, Result<Chunk, (ByteWindow, Error)>, OwnedSemaphorePermit);

/// Parallel retrieval of one stored archive entry.
///
/// The entry is split into fixed windows, each fetched by one of a fixed set
/// of workers over its own connection, and written to the destination in
/// index order. Compressed entries fall back to a single sequential copy.
#[derive(Debug, Clone)]
pub struct ChunkedFetcher {
    workers: usize,
    chunk_size: u64,
}

impl Default for ChunkedFetcher {
    fn default() -> Self {
        Self::new(DEFAULT_WORKERS)
    }
}

impl ChunkedFetcher {
    pub fn new(workers: usize) -> Self {
        Self {
            workers: workers.max(1),
            chunk_size: CHUNK_SIZE,
        }
    }

    pub fn with_chunk_size(mut self, chunk_size: u64) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Extract `entry`, whose data starts at `data_offset` in the archive
    /// behind `source`, into `dest`. Returns bytes written.
    ///
    /// On failure `dest` does not exist when this returns.
    pub async fn fetch_entry(
        &self,
        source: &RangeSource,
        entry: &ArchiveEntry,
        data_offset: u64,
        dest: &Path,
        progress: Option<ProgressFn>,
    ) -> Result<u64> {
        let mut output = PartialOutput::create(dest).await?;

        let result = if entry.is_stored() {
            self.fetch_stored(source, entry, data_offset, output.file_mut(), progress)
                .await
        } else {
            debug!(entry = %entry.name, method = %entry.compression.label(), "compressed entry, streaming sequentially");
            stream_compressed(source, entry, data_offset, output.file_mut(), progress).await
        };

        match result {
            Ok(written) => {
                let path = output.commit().await?;
                info!(entry = %entry.name, path = %path.display(), bytes = written, "extracted entry");
                Ok(written)
            }
            Err(e) => {
                warn!(entry = %entry.name, error = %e, "extraction failed, removing partial output");
                output.discard().await;
                Err(e)
            }
        }
    }

    async fn fetch_stored<W>(
        &self,
        source: &RangeSource,
        entry: &ArchiveEntry,
        data_offset: u64,
        writer: &mut W,
        progress: Option<ProgressFn>,
    ) -> Result<u64>
    where
        W: AsyncWrite + Unpin + Send,
    {
        let windows = Arc::new(plan_windows(entry.size, self.chunk_size));
        let total = windows.len();
        let workers = self.workers.min(total);
        debug!(entry = %entry.name, chunks = total, workers, "starting chunked fetch");

        // Bounds chunks that are in flight or waiting for a lower index.
        let budget = Arc::new(Semaphore::new(workers * 2));
        let next = Arc::new(AtomicUsize::new(0));
        let (tx, mut rx) = mpsc::unbounded_channel::<ChunkMessage>();
        let mut tasks = JoinSet::new();

        for _ in 0..workers {
            let mut source = source.fork()?;
            let windows = windows.clone();
            let next = next.clone();
            let budget = budget.clone();
            let tx = tx.clone();

            tasks.spawn(async move {
                loop {
                    let Ok(permit) = budget.clone().acquire_owned().await else {
                        break;
                    };
                    let index = next.fetch_add(1, Ordering::SeqCst);
                    let Some(window) = windows.get(index).copied() else {
                        break;
                    };

                    let absolute = ByteWindow::new(data_offset + window.start, window.len);
                    let result = source
                        .fetch(absolute)
                        .await
                        .map(|payload| Chunk {
                            index,
                            offset: window.start,
                            len: window.len,
                            payload,
                        })
                        .map_err(|e| (absolute, e));

                    let failed = result.is_err();
                    if tx.send((index, result, permit)).is_err() || failed {
                        break;
                    }
                }
            });
        }
        drop(tx);

        let mut reorder = ReorderBuffer::new();
        let mut hasher = crc32fast::Hasher::new();
        let mut written = 0u64;

        while let Some((index, result, permit)) = rx.recv().await {
            let chunk = match result {
                Ok(chunk) => chunk,
                Err((window, e)) => {
                    budget.close();
                    tasks.abort_all();
                    return Err(Error::Extraction {
                        entry: entry.name.clone(),
                        window,
                        source: Box::new(e),
                    });
                }
            };

            let ready = reorder.push(index, (chunk, permit));
            trace!(index, ready = ready.len(), held = reorder.pending(), "chunk arrived");
            for (chunk, permit) in ready {
                hasher.update(&chunk.payload);
                writer.write_all(&chunk.payload).await?;
                written += chunk.len;
                drop(permit);
                if let Some(progress) = &progress {
                    progress(written, entry.size);
                }
            }
        }

        if reorder.next_index() < total {
            let window = windows[reorder.next_index()];
            return Err(Error::Extraction {
                entry: entry.name.clone(),
                window: ByteWindow::new(data_offset + window.start, window.len),
                source: Box::new(Error::Io(io::Error::other(
                    "chunk worker exited before delivering its window",
                ))),
            });
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
}

/// Single sequential copy through a dedicated remote file.
async fn stream_compressed<W>(
    source: &RangeSource,
    entry: &ArchiveEntry,
    data_offset: u64,
    writer: &mut W,
    progress: Option<ProgressFn>,
) -> Result<u64>
where
    W: AsyncWrite + Unpin + Send,
{
    let mut file = RemoteFile::from_source(source.fork()?);
    let result = copy_entry(&mut file, entry, data_offset, writer, progress.as_ref()).await;
    file.close().await?;
    result
}

/// Split `[0, size)` into windows of `chunk_size`, the last one truncated.
pub fn plan_windows(size: u64, chunk_size: u64) -> Vec<ByteWindow> {
    (0..size)
        .step_by(chunk_size as usize)
        .map(|start| ByteWindow::new(start, chunk_size.min(size - start)))
        .collect()
}

/// Releases items strictly in index order, holding back anything that
/// arrives before its predecessors.
pub(crate) struct ReorderBuffer<T> {
    next: usize,
    pending: BTreeMap<usize, T>,
}

impl<T> ReorderBuffer<T> {
    pub(crate) fn new() -> Self {
        Self {
            next: 0,
            pending: BTreeMap::new(),
        }
    }

    /// Accept `item` and return the prefix that is now writable.
    pub(crate) fn push(&mut self, index: usize, item: T) -> Vec<T> {
        self.pending.insert(index, item);
        let mut ready = Vec::new();
        while let Some(item) = self.pending.remove(&self.next) {
            ready.push(item);
            self.next += 1;
        }
        ready
    }

    /// Lowest index not yet released.
    pub(crate) fn next_index(&self) -> usize {
        self.next
    }

    pub(crate) fn pending(&self) -> usize {
        self.pending.len()
    }
}
