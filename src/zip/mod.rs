//! ZIP archive reading and writing.
//!
//! This module provides everything the transcoder needs from the ZIP
//! container format, written directly against the on-disk records.
//!
//! ## Architecture
//!
//! - [`structures`]: Data structures representing ZIP format elements (EOCD, file headers, etc.)
//! - [`parser`]: Central-directory reader over a random-access source
//! - [`stream`]: Forward-only reader over local headers, for archives nested in entries
//! - [`writer`]: Sequential writer producing local headers, data descriptors and the central directory
//!
//! ## ZIP Format Overview
//!
//! A ZIP file consists of:
//! 1. Local file headers and compressed data for each file
//! 2. Central Directory with metadata for all files
//! 3. End of Central Directory (EOCD) record at the end
//!
//! ## Supported Features
//!
//! - Standard ZIP format (PKZIP APPNOTE 6.3.x compatible)
//! - ZIP64 extensions for files > 4GB and archives with more than 65534 entries
//! - STORED (no compression) method
//! - DEFLATE compression method
//!
//! ## Limitations
//!
//! - No encryption support
//! - No multi-disk archive support
//! - No BZIP2, LZMA, or other compression methods

mod parser;
mod stream;
mod structures;
mod writer;

pub use parser::ZipParser;
pub(crate) use stream::nested_error;
pub use stream::{StreamEntry, ZipStreamReader};
pub use structures::*;
pub use writer::{CountingWriter, EntryDescriptor, EntryWriter, ZipWriter};
