//! # rezip
//!
//! Recompresses ZIP-family archives (`.zip`, `.jar`, `.war`, `.ear`, ...)
//! to make them smaller without changing their file content.
//!
//! Every entry is decoded and re-encoded through a [`Compressor`], and
//! metadata the consumer rarely needs can be dropped on the way:
//! directory entries, extra fields and entry comments. Nested archives are
//! unpacked and re-packed *stored* before the outer compressor sees them,
//! which lets it find redundancy across the inner entries.
//!
//! ## Features
//!
//! - ZIP parsing and writing written directly against the format, including ZIP64
//! - Streaming re-encoding with CRC-32 and size checks
//! - In-place optimization that only replaces an archive when it got smaller
//!
//! ## Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use rezip::{CompressorConfig, LocalFileReader, TranscodePolicy, ZipParser, transcode};
//!
//! fn main() -> anyhow::Result<()> {
//!     let reader = Arc::new(LocalFileReader::new("app.jar".as_ref())?);
//!     let source = ZipParser::new(reader);
//!
//!     let output = std::fs::File::create("app.rezip.jar")?;
//!     let summary = transcode(
//!         &source,
//!         std::io::BufWriter::new(output),
//!         TranscodePolicy::default(),
//!         CompressorConfig::default(),
//!     )?;
//!     println!("{} entries written", summary.entries_written);
//!
//!     Ok(())
//! }
//! ```

pub mod cli;
pub mod compress;
pub mod config;
pub mod error;
pub mod io;
pub mod optimize;
pub mod transcode;
pub mod zip;

pub use cli::Cli;
pub use compress::{Compressor, DeflateCompressor, EntryEncoder};
pub use config::{CompressorConfig, Strategy, TranscodePolicy};
pub use error::{Error, Result};
pub use io::{BufferPool, LocalFileReader, MemoryReader, ReadAt};
pub use optimize::{ArchiveOptimizer, Outcome, gain_of, is_zip_archive};
pub use transcode::{ArchiveTranscoder, NestedArchiveReencoder, TranscodeSummary, transcode};
pub use zip::{ZipFileEntry, ZipParser, ZipWriter};
