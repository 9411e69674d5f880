//! Stored re-packing of archives found inside entries.
//!
//! Deflating an archive whose members are already deflated gains next to
//! nothing. Unpacking it and writing every member back uncompressed lets
//! the outer compressor see the raw bytes instead, including any
//! redundancy shared between members.

use std::io::{BufRead, BufReader, Read, Write};
use tracing::trace;

use crate::zip::{EntryDescriptor, StreamEntry, ZipStreamReader, ZipWriter, nested_error};
use crate::{Error, Result};

/// Largest inner entry materialized by default
pub const DEFAULT_MAX_ENTRY_SIZE: u64 = isize::MAX as u64;

/// Most memory reserved up front for a declared size; the rest grows with the data
const PREALLOCATE_LIMIT: usize = 64 << 20;

/// Rewrites a ZIP byte stream so every entry uses the stored method.
///
/// Only one level is rewritten: an archive inside the nested archive is
/// copied as an ordinary stored member. Inner extra fields and comments
/// are dropped; a sequential read cannot recover the comments and the
/// extra fields may describe the old encoding.
#[derive(Debug, Clone)]
pub struct NestedArchiveReencoder {
    max_entry_size: u64,
}

impl Default for NestedArchiveReencoder {
    fn default() -> Self {
        Self::new()
    }
}

impl NestedArchiveReencoder {
    pub fn new() -> Self {
        Self {
            max_entry_size: DEFAULT_MAX_ENTRY_SIZE,
        }
    }

    /// Refuse inner entries larger than `limit` bytes
    pub fn with_max_entry_size(mut self, limit: u64) -> Self {
        self.max_entry_size = limit;
        self
    }

    /// Decode `inner` as a ZIP archive and write a stored copy to `destination`.
    ///
    /// Returns the number of inner entries written.
    pub fn reencode<R: Read, W: Write>(&self, inner: R, destination: W) -> Result<usize> {
        let mut entries = ZipStreamReader::new(BufReader::new(inner));
        let mut writer = ZipWriter::new(destination);

        while let Some(mut entry) = entries.next_entry()? {
            let descriptor = EntryDescriptor::from_local_header(entry.header());
            let content = self.materialize(&mut entry)?;
            trace!(
                entry = %entry.file_name(),
                size = content.len(),
                "storing nested entry"
            );
            writer
                .add_stored(descriptor, &content)
                .map_err(Error::SinkWrite)?;
        }

        let written = writer.entry_count();
        writer.finish().map_err(Error::SinkWrite)?;
        Ok(written)
    }

    /// Read the whole entry into memory.
    ///
    /// Stored output needs the length and CRC before the data, so there
    /// is no way around holding the full content.
    fn materialize<R: BufRead>(&self, entry: &mut StreamEntry<'_, R>) -> Result<Vec<u8>> {
        let name = entry.file_name();
        let too_large = |size: u64| Error::EntryTooLarge {
            name: name.clone(),
            size,
            limit: self.max_entry_size,
        };

        match entry.declared_size() {
            Some(size) => {
                if size > self.max_entry_size {
                    return Err(too_large(size));
                }
                let len = usize::try_from(size).map_err(|_| too_large(size))?;
                // A corrupt header may declare far more than the payload holds
                let mut content = Vec::with_capacity(len.min(PREALLOCATE_LIMIT));
                entry
                    .by_ref()
                    .take(size)
                    .read_to_end(&mut content)
                    .map_err(nested_error)?;
                if content.len() != len {
                    return Err(Error::malformed(format!(
                        "entry '{name}' ends after {} of its declared {size} bytes",
                        content.len()
                    )));
                }

                // Hitting the end checks the CRC and consumes any trailer
                let mut overflow = [0u8; 1];
                if entry.read(&mut overflow).map_err(nested_error)? != 0 {
                    return Err(Error::malformed(format!(
                        "entry '{name}' is longer than its declared {size} bytes"
                    )));
                }
                Ok(content)
            }
            None => {
                let mut content = Vec::new();
                let limit = self.max_entry_size.saturating_add(1);
                entry
                    .by_ref()
                    .take(limit)
                    .read_to_end(&mut content)
                    .map_err(nested_error)?;
                if content.len() as u64 > self.max_entry_size {
                    return Err(too_large(content.len() as u64));
                }
                Ok(content)
            }
        }
    }
}
