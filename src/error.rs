//! Error taxonomy shared by every layer of the crate.
//!
//! Network failures ([`Error::Connectivity`]) and short reads
//! ([`Error::DataIntegrity`]) are retried by [`RangeSource`](crate::io::RangeSource)
//! and only surface once the retry budget is spent. Everything else is fatal
//! for the operation that raised it.

use std::fmt;

use thiserror::Error;

use crate::io::ByteWindow;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum Error {
    /// Transport failure or unexpected HTTP status, after all attempts.
    #[error("connectivity error after {attempts} attempt(s): {cause}")]
    Connectivity { attempts: u32, cause: String },

    /// The server answered with a success status but the wrong number of bytes.
    #[error("data integrity error after {attempts} attempt(s): expected {expected} bytes, received {received}")]
    DataIntegrity {
        attempts: u32,
        expected: u64,
        received: u64,
    },

    /// CRC-32 of the written bytes does not match the archive's record.
    #[error("checksum mismatch for {entry}: expected {expected:08x}, computed {actual:08x}")]
    Checksum {
        entry: String,
        expected: u32,
        actual: u32,
    },

    /// The remote resource cannot be used for range reads at all.
    #[error("unsupported server: {0}")]
    UnsupportedServer(String),

    /// Seek target or window outside `[0, size]`.
    #[error("position {target} is outside [0, {size}]")]
    Range { target: i128, size: u64 },

    /// A chunked or streamed copy of one entry failed terminally.
    #[error("extraction of {entry} failed at {window}: {source}")]
    Extraction {
        entry: String,
        window: ByteWindow,
        #[source]
        source: Box<Error>,
    },

    /// The container is malformed or uses a feature we do not read.
    #[error("invalid archive: {0}")]
    Archive(String),

    #[error("source is closed")]
    Closed,

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Coarse classification of an [`Error`], used to tag strategy outcomes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Connectivity,
    DataIntegrity,
    UnsupportedServer,
    Range,
    Extraction,
    Archive,
    Io,
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Connectivity { .. } => ErrorKind::Connectivity,
            Error::DataIntegrity { .. } | Error::Checksum { .. } => ErrorKind::DataIntegrity,
            Error::UnsupportedServer(_) => ErrorKind::UnsupportedServer,
            Error::Range { .. } => ErrorKind::Range,
            Error::Extraction { .. } => ErrorKind::Extraction,
            Error::Archive(_) => ErrorKind::Archive,
            Error::Closed | Error::Io(_) => ErrorKind::Io,
        }
    }

    /// Whether another attempt at the same request could succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::Connectivity { .. } | Error::DataIntegrity { .. })
    }

    pub(crate) fn archive(msg: impl Into<String>) -> Self {
        Error::Archive(msg.into())
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorKind::Connectivity => "connectivity",
            ErrorKind::DataIntegrity => "data-integrity",
            ErrorKind::UnsupportedServer => "unsupported-server",
            ErrorKind::Range => "range",
            ErrorKind::Extraction => "extraction",
            ErrorKind::Archive => "archive",
            ErrorKind::Io => "io",
        };
        f.write_str(name)
    }
}
