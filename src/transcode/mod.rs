//! Archive transcoding.
//!
//! [`ArchiveTranscoder`] walks a source archive in central directory
//! order and writes each retained entry to a new archive, re-encoded
//! through a [`Compressor`]. Entries whose names look like archives can
//! be unpacked and re-packed stored by the [`NestedArchiveReencoder`]
//! first, so the outer compressor works on raw bytes.

mod nested;

pub use nested::{DEFAULT_MAX_ENTRY_SIZE, NestedArchiveReencoder};

use std::io::{self, Read, Write};
use std::sync::Arc;
use tracing::debug;

use crate::compress::{Compressor, DeflateCompressor};
use crate::config::{CompressorConfig, TranscodePolicy};
use crate::io::{BufferPool, ReadAt};
use crate::zip::{EntryDescriptor, ZipParser, ZipWriter, strip_zip64_extra};
use crate::{Error, Result};

/// Name suffixes treated as nested archives, matched case-insensitively
pub const ARCHIVE_EXTENSIONS: [&str; 7] = [".zip", ".jar", ".ejb", ".war", ".ear", ".rar", ".par"];

/// Archive comment identifying transcoded output
pub const ARCHIVE_COMMENT: &str = "rezip";

/// Whether an entry name carries one of the [`ARCHIVE_EXTENSIONS`]
pub fn is_nested_archive(name: &str) -> bool {
    let lower = name.to_lowercase();
    ARCHIVE_EXTENSIONS.iter().any(|ext| lower.ends_with(ext))
}

/// Counters for one transcode
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TranscodeSummary {
    pub entries_written: usize,
    pub directories_dropped: usize,
    pub nested_reencoded: usize,
    /// Uncompressed bytes fed to the compressor from ordinary entries
    pub bytes_copied: u64,
}

/// Re-encodes every entry of an archive through a compressor
pub struct ArchiveTranscoder<C: Compressor> {
    policy: TranscodePolicy,
    compressor: C,
    nested: NestedArchiveReencoder,
    pool: Arc<BufferPool>,
}

impl<C: Compressor> ArchiveTranscoder<C> {
    pub fn new(policy: TranscodePolicy, compressor: C) -> Self {
        Self {
            policy,
            compressor,
            nested: NestedArchiveReencoder::new(),
            pool: Arc::new(BufferPool::new()),
        }
    }

    /// Share a buffer pool with other transcoders
    pub fn with_pool(mut self, pool: Arc<BufferPool>) -> Self {
        self.pool = pool;
        self
    }

    pub fn with_nested_reencoder(mut self, nested: NestedArchiveReencoder) -> Self {
        self.nested = nested;
        self
    }

    /// Write a transcoded copy of `source` to `destination`.
    ///
    /// The source's central directory is read in full before anything is
    /// written. On error the destination holds a partial archive and
    /// must be discarded.
    pub fn transcode<R: ReadAt, W: Write>(
        &self,
        source: &ZipParser<R>,
        destination: W,
    ) -> Result<TranscodeSummary> {
        let entries = source.list_files()?;
        let mut writer = ZipWriter::new(destination);
        let mut summary = TranscodeSummary::default();

        for entry in &entries {
            if entry.is_directory && !self.policy.keep_directories {
                debug!(entry = %entry.file_name, "dropping directory entry");
                summary.directories_dropped += 1;
                continue;
            }

            // Size and CRC are recomputed by the writer
            let mut descriptor = EntryDescriptor::from_entry(entry);
            if self.policy.keep_extra_fields {
                descriptor.extra = strip_zip64_extra(&entry.extra);
            }
            if self.policy.keep_comment {
                descriptor.comment = entry.comment.clone();
            }

            let content = source.open_entry(entry)?;
            let mut sink = writer
                .start_entry(descriptor, &self.compressor)
                .map_err(Error::SinkWrite)?;

            if !self.policy.keep_nested_archives && is_nested_archive(&entry.file_name) {
                let inner = self.nested.reencode(content, &mut sink)?;
                debug!(
                    entry = %entry.file_name,
                    inner_entries = inner,
                    "re-encoded nested archive as stored"
                );
                summary.nested_reencoded += 1;
            } else {
                let copied = self.copy(&entry.file_name, content, &mut sink)?;
                debug!(entry = %entry.file_name, bytes = copied, "re-encoded entry");
                summary.bytes_copied += copied;
            }

            sink.finish().map_err(Error::SinkWrite)?;
            summary.entries_written += 1;
        }

        writer.set_comment(ARCHIVE_COMMENT);
        writer.finish().map_err(Error::SinkWrite)?;
        Ok(summary)
    }

    /// Stream `from` into `to` through a pooled buffer
    fn copy<R: Read, W: Write>(&self, name: &str, mut from: R, to: &mut W) -> Result<u64> {
        let mut buffer = self.pool.checkout();
        let mut total = 0u64;
        loop {
            let n = match from.read(&mut buffer) {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    return Err(Error::source_io(format!("cannot read entry '{name}'"), e));
                }
            };
            to.write_all(&buffer[..n]).map_err(Error::SinkWrite)?;
            total += n as u64;
        }
        Ok(total)
    }
}

/// Transcode `source` into `destination` with the `flate2` deflate compressor
pub fn transcode<R: ReadAt, W: Write>(
    source: &ZipParser<R>,
    destination: W,
    policy: TranscodePolicy,
    config: CompressorConfig,
) -> Result<TranscodeSummary> {
    ArchiveTranscoder::new(policy, DeflateCompressor::new(config)?).transcode(source, destination)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::MemoryReader;
    use crate::zip::CompressionMethod;

    fn parser(data: Vec<u8>) -> ZipParser<MemoryReader> {
        ZipParser::new(Arc::new(MemoryReader::new(data)))
    }

    fn source_archive() -> Vec<u8> {
        let mut writer = ZipWriter::new(Vec::new());
        let mut notes = EntryDescriptor::new("notes.txt");
        notes.comment = b"remember".to_vec();
        notes.extra = vec![0xFE, 0xCA, 4, 0, 1, 2, 3, 4];
        writer.add_stored(notes, b"abcabcabcabcabcabc").unwrap();
        writer.add_stored(EntryDescriptor::new("docs/"), b"").unwrap();
        writer
            .add_stored(EntryDescriptor::new("docs/readme.md"), b"# readme")
            .unwrap();
        writer.set_comment("original");
        writer.finish().unwrap()
    }

    fn read_entry(parser: &ZipParser<MemoryReader>, name: &str) -> Vec<u8> {
        let entries = parser.list_files().unwrap();
        let entry = entries.iter().find(|e| e.file_name == name).unwrap();
        let mut content = Vec::new();
        parser
            .open_entry(entry)
            .unwrap()
            .read_to_end(&mut content)
            .unwrap();
        content
    }

    #[test]
    fn test_default_policy_strips_metadata() {
        let source = parser(source_archive());
        let mut output = Vec::new();
        let summary = transcode(
            &source,
            &mut output,
            TranscodePolicy::default(),
            CompressorConfig::default(),
        )
        .unwrap();

        assert_eq!(summary.entries_written, 2);
        assert_eq!(summary.directories_dropped, 1);
        assert_eq!(summary.nested_reencoded, 0);
        assert_eq!(summary.bytes_copied, 18 + 8);

        let result = parser(output);
        let entries = result.list_files().unwrap();
        let names: Vec<_> = entries.iter().map(|e| e.file_name.as_str()).collect();
        assert_eq!(names, ["notes.txt", "docs/readme.md"]);
        assert!(entries[0].comment.is_empty());
        assert!(entries[0].extra.is_empty());
        assert_eq!(entries[0].compression_method, CompressionMethod::Deflate);
        assert_eq!(entries[0].crc32, crc32fast::hash(b"abcabcabcabcabcabc"));
        assert_eq!(result.archive_comment().unwrap(), ARCHIVE_COMMENT.as_bytes());
        assert_eq!(read_entry(&result, "docs/readme.md"), b"# readme");
    }

    #[test]
    fn test_keep_all_preserves_metadata() {
        let source = parser(source_archive());
        let original = source.list_files().unwrap();
        let mut output = Vec::new();
        let transcoder =
            ArchiveTranscoder::new(TranscodePolicy::keep_all(), DeflateCompressor::default());
        let summary = transcoder.transcode(&source, &mut output).unwrap();
        assert_eq!(summary.entries_written, 3);

        let result = parser(output);
        let entries = result.list_files().unwrap();
        assert_eq!(entries.len(), original.len());
        for (before, after) in original.iter().zip(&entries) {
            assert_eq!(before.file_name, after.file_name);
            assert_eq!(before.comment, after.comment);
            assert_eq!(before.extra, after.extra);
            assert_eq!(before.crc32, after.crc32);
            assert_eq!(before.uncompressed_size, after.uncompressed_size);
            assert_eq!(before.last_mod_date, after.last_mod_date);
        }
        assert_eq!(read_entry(&result, "notes.txt"), b"abcabcabcabcabcabc");
    }

    #[test]
    fn test_shared_pool_gets_buffers_back() {
        let pool = Arc::new(BufferPool::new());
        let transcoder =
            ArchiveTranscoder::new(TranscodePolicy::default(), DeflateCompressor::default())
                .with_pool(Arc::clone(&pool));
        transcoder
            .transcode(&parser(source_archive()), Vec::new())
            .unwrap();
        assert_eq!(pool.idle(), 1);
    }

    #[test]
    fn test_broken_source_writes_nothing() {
        let mut damaged = source_archive();
        // Corrupt the end of central directory signature, ahead of the 8 byte comment
        let eocd = damaged.len() - 22 - 8;
        damaged[eocd] = 0;
        let mut output = Vec::new();
        let err = transcode(
            &parser(damaged),
            &mut output,
            TranscodePolicy::default(),
            CompressorConfig::default(),
        )
        .unwrap_err();
        assert!(matches!(err, Error::SourceRead { .. }), "{err}");
        assert!(output.is_empty());
    }

    #[test]
    fn test_archive_extensions() {
        for name in ["lib/a.jar", "B.ZIP", "web.War", "x.ear", "y.rar", "z.par", "e.ejb"] {
            assert!(is_nested_archive(name), "{name}");
        }
        for name in ["a.jar.txt", "zip", "folder.zip/", "a.7z", "notes.tar"] {
            assert!(!is_nested_archive(name), "{name}");
        }
    }
}
