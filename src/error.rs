//! Error types for archive transcoding.
//!
//! Every failure is terminal for the archive being processed: the caller
//! discards whatever was written to the destination and moves on.

use std::io;
use thiserror::Error;

/// Result type alias for rezip operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised while transcoding an archive
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum Error {
    /// The source archive could not be read or its central directory is malformed
    #[error("failed to read source archive: {reason}")]
    SourceRead {
        /// What went wrong
        reason: String,
        /// Underlying I/O error, if any
        #[source]
        source: Option<io::Error>,
    },

    /// A nested archive entry is too large to be materialized in memory
    #[error("entry too large to fit in memory: '{name}' declares {size} bytes (limit {limit})")]
    EntryTooLarge {
        /// Name of the inner entry
        name: String,
        /// Declared uncompressed size
        size: u64,
        /// Configured ceiling
        limit: u64,
    },

    /// The destination rejected a write
    #[error("failed to write transcoded archive: {0}")]
    SinkWrite(#[source] io::Error),

    /// An entry named like an archive does not contain valid ZIP framing
    #[error("malformed nested archive: {reason}")]
    MalformedNestedArchive {
        /// What went wrong
        reason: String,
    },

    /// Compressor configuration is out of range
    #[error("invalid compressor configuration: {0}")]
    InvalidConfig(String),

    /// File handling around the transcode (temporary output, overwrite)
    #[error(transparent)]
    Io(#[from] io::Error),
}

impl Error {
    pub(crate) fn source_read(reason: impl Into<String>) -> Self {
        Error::SourceRead {
            reason: reason.into(),
            source: None,
        }
    }

    pub(crate) fn source_io(reason: impl Into<String>, source: io::Error) -> Self {
        Error::SourceRead {
            reason: reason.into(),
            source: Some(source),
        }
    }

    pub(crate) fn malformed(reason: impl Into<String>) -> Self {
        Error::MalformedNestedArchive {
            reason: reason.into(),
        }
    }
}
