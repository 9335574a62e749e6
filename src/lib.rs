//! # otaslice
//!
//! Pull partition images out of Android OTA archives without downloading
//! the whole file.
//!
//! Remote archives are read through HTTP Range requests: the central
//! directory is fetched with a handful of small reads, and only the entries
//! that are actually extracted are transferred. Large stored entries are
//! downloaded in parallel windows and reassembled in order on disk.
//!
//! ## Features
//!
//! - Seekable remote files backed by Range requests with bounded retries
//! - ZIP and ZIP64 central directory parsing over any [`SeekableSource`]
//! - STORED and DEFLATE entries, CRC-32 verified
//! - Payload, raw-image and single-entry extraction strategies
//!
//! ## Example
//!
//! ```no_run
//! use otaslice::{ExtractOptions, Input, Orchestrator};
//!
//! #[tokio::main]
//! async fn main() {
//!     let input = Input::parse("https://example.com/ota.zip");
//!     let outcome = Orchestrator::new(ExtractOptions::default()).run(&input).await;
//!     for path in outcome.outputs() {
//!         println!("{}", path.display());
//!     }
//! }
//! ```

pub mod cli;
pub mod error;
pub mod extract;
pub mod fetch;
pub mod io;
pub mod logging;
pub mod zip;

pub use cli::Cli;
pub use error::{Error, ErrorKind, Result};
pub use extract::{
    ExtractOptions, Input, Orchestrator, Outcome, PartitionFilter, PayloadDumper, Strategy,
    StrategyResult,
};
pub use fetch::{ChunkedFetcher, PartialOutput};
pub use io::{
    ByteWindow, LocalFile, MemoryFile, RangeSource, RemoteFile, RetryPolicy, SeekableSource,
};
pub use zip::{ArchiveEntry, CompressionMethod, ZipArchive};
