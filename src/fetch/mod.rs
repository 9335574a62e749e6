//! Retrieval of a single archive entry into an output file.

mod chunked;
mod output;

pub use chunked::{CHUNK_SIZE, Chunk, ChunkedFetcher, DEFAULT_WORKERS, plan_windows};
pub use output::PartialOutput;
