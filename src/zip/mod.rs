//! ZIP archive reading over a [`SeekableSource`](crate::io::SeekableSource).
//!
//! ## Architecture
//!
//! - [`structures`]: on-disk records (EOCD, ZIP64 records, entries)
//! - [`parser`]: central-directory parsing and [`ZipArchive`]
//! - [`entry`]: [`EntryReader`], a seekable stream over one entry
//! - [`extractor`]: sequential streaming copy of one entry
//!
//! The reader only ever issues the seeks and reads it needs: the tail of the
//! file, the central directory, and then each requested entry.
//!
//! ## Supported Features
//!
//! - Standard ZIP format and ZIP64 extensions
//! - STORED and DEFLATE compression methods
//!
//! ## Limitations
//!
//! - No encryption support
//! - No multi-disk archive support

mod entry;
mod extractor;
mod parser;
mod structures;

pub use entry::EntryReader;
pub use extractor::{COPY_BLOCK_SIZE, copy_entry};
pub use parser::ZipArchive;
pub use structures::*;
