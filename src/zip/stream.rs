//! Sequential ZIP reader.
//!
//! Walks local file headers front to back, the only option when the
//! archive is itself an entry being decompressed on the fly. Entry
//! comments and the archive comment live in the central directory and
//! are therefore never seen here.
//!
//! An entry whose header sets general purpose bit 3 has its CRC and
//! sizes in a data descriptor after the data; its uncompressed size is
//! unknown until the content has been read.

use byteorder::{LittleEndian, ReadBytesExt};
use flate2::bufread::DeflateDecoder;
use std::io::{self, BufRead, Read, Take};

use crate::{Error, Result};

use super::structures::*;

const DATA_DESCRIPTOR_SIGNATURE_U32: u32 = 0x0807_4b50;

/// Map an I/O failure while reading a nested archive to the matching error.
///
/// Truncated or undecodable data means the framing is broken; anything
/// else is a failure of the underlying source.
pub(crate) fn nested_error(e: io::Error) -> Error {
    match e.kind() {
        io::ErrorKind::UnexpectedEof | io::ErrorKind::InvalidData | io::ErrorKind::InvalidInput => {
            Error::malformed(e.to_string())
        }
        _ => Error::source_io("cannot read nested archive", e),
    }
}

fn invalid_data(msg: String) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, msg)
}

/// Forward-only reader over local file headers
pub struct ZipStreamReader<R: BufRead> {
    reader: R,
    entry_open: bool,
    done: bool,
}

impl<R: BufRead> ZipStreamReader<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            entry_open: false,
            done: false,
        }
    }

    /// Advance to the next entry.
    ///
    /// Returns `None` once the central directory (or the end of the
    /// stream) is reached. The previous entry must have been read to
    /// its end.
    pub fn next_entry(&mut self) -> Result<Option<StreamEntry<'_, R>>> {
        if self.entry_open {
            return Err(Error::malformed("previous entry was not read to its end"));
        }
        if self.done {
            return Ok(None);
        }

        let mut sig = [0u8; 4];
        let mut filled = 0;
        while filled < sig.len() {
            match self.reader.read(&mut sig[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => return Err(nested_error(e)),
            }
        }
        if filled == 0 {
            self.done = true;
            return Ok(None);
        }
        if filled < sig.len() {
            return Err(Error::malformed("truncated record signature"));
        }

        if sig == CDFH_SIGNATURE
            || sig == EndOfCentralDirectory::SIGNATURE
            || sig == Zip64EOCD::SIGNATURE
        {
            self.done = true;
            return Ok(None);
        }
        if sig != LFH_SIGNATURE {
            return Err(Error::malformed(format!(
                "unexpected record signature {sig:02x?}"
            )));
        }

        let header = LocalFileHeader::read_after_signature(&mut self.reader).map_err(nested_error)?;
        let name = header.file_name();

        if header.flags & FLAG_ENCRYPTED != 0 {
            return Err(Error::malformed(format!("entry '{name}' is encrypted")));
        }

        let body = match header.compression_method {
            CompressionMethod::Stored => {
                Body::Stored((&mut self.reader).take(header.compressed_size))
            }
            CompressionMethod::Deflate if header.has_data_descriptor() => {
                Body::DeflateUnbounded(DeflateDecoder::new(&mut self.reader))
            }
            CompressionMethod::Deflate => Body::Deflate(DeflateDecoder::new(
                (&mut self.reader).take(header.compressed_size),
            )),
            CompressionMethod::Unknown(method) => {
                return Err(Error::malformed(format!(
                    "entry '{name}' uses unsupported compression method {method}"
                )));
            }
        };

        self.entry_open = true;
        Ok(Some(StreamEntry {
            header,
            body,
            open: &mut self.entry_open,
            hasher: crc32fast::Hasher::new(),
            size: 0,
            finished: false,
        }))
    }
}

enum Body<'a, R: BufRead> {
    Stored(Take<&'a mut R>),
    Deflate(DeflateDecoder<Take<&'a mut R>>),
    /// Compressed size unknown; the deflate stream marks its own end
    DeflateUnbounded(DeflateDecoder<&'a mut R>),
}

/// Decoded content of one entry.
///
/// Reaching the end of the content consumes the data descriptor, if
/// any, and checks the CRC-32 and size; a mismatch surfaces as an
/// [`io::ErrorKind::InvalidData`] error from `read`.
pub struct StreamEntry<'a, R: BufRead> {
    header: LocalFileHeader,
    body: Body<'a, R>,
    open: &'a mut bool,
    hasher: crc32fast::Hasher,
    size: u64,
    finished: bool,
}

impl<R: BufRead> StreamEntry<'_, R> {
    pub fn header(&self) -> &LocalFileHeader {
        &self.header
    }

    pub fn file_name(&self) -> String {
        self.header.file_name()
    }

    /// Uncompressed size from the local header, `None` when it follows the data
    pub fn declared_size(&self) -> Option<u64> {
        if self.header.has_data_descriptor() {
            None
        } else {
            Some(self.header.uncompressed_size)
        }
    }

    fn source(&mut self) -> &mut R {
        match &mut self.body {
            Body::Stored(take) => &mut **take.get_mut(),
            Body::Deflate(decoder) => &mut **decoder.get_mut().get_mut(),
            Body::DeflateUnbounded(decoder) => &mut **decoder.get_mut(),
        }
    }

    fn finish_entry(&mut self) -> io::Result<()> {
        let name = self.header.file_name();

        match &mut self.body {
            Body::Stored(take) if take.limit() > 0 => {
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    format!("entry '{name}' is truncated"),
                ));
            }
            // Skip compressed bytes the decoder did not need
            Body::Deflate(decoder) => {
                io::copy(decoder.get_mut(), &mut io::sink())?;
            }
            _ => {}
        }

        let (expected_crc, expected_size) = if self.header.has_data_descriptor() {
            // Writers that stream without a ZIP64 extra still switch to
            // 8-byte sizes once the entry outgrows 32 bits
            let zip64 =
                self.header.has_zip64_extra() || self.size >= ZIP64_SENTINEL_32 as u64;
            let source = self.source();
            let mut crc = source.read_u32::<LittleEndian>()?;
            if crc == DATA_DESCRIPTOR_SIGNATURE_U32 {
                crc = source.read_u32::<LittleEndian>()?;
            }
            let size = if zip64 {
                let _compressed = source.read_u64::<LittleEndian>()?;
                source.read_u64::<LittleEndian>()?
            } else {
                let _compressed = source.read_u32::<LittleEndian>()?;
                source.read_u32::<LittleEndian>()? as u64
            };
            (crc, size)
        } else {
            (self.header.crc32, self.header.uncompressed_size)
        };

        let actual_crc = self.hasher.clone().finalize();
        if actual_crc != expected_crc {
            return Err(invalid_data(format!(
                "entry '{name}': CRC {actual_crc:08x} does not match {expected_crc:08x}"
            )));
        }
        if self.size != expected_size {
            return Err(invalid_data(format!(
                "entry '{name}': {} bytes read, {expected_size} declared",
                self.size
            )));
        }

        self.finished = true;
        *self.open = false;
        Ok(())
    }
}

impl<R: BufRead> Read for StreamEntry<'_, R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.finished || buf.is_empty() {
            return Ok(0);
        }

        let n = match &mut self.body {
            Body::Stored(take) => take.read(buf)?,
            Body::Deflate(decoder) => decoder.read(buf)?,
            Body::DeflateUnbounded(decoder) => decoder.read(buf)?,
        };
        if n == 0 {
            self.finish_entry()?;
            return Ok(0);
        }

        self.hasher.update(&buf[..n]);
        self.size += n as u64;
        Ok(n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compress::DeflateCompressor;
    use crate::zip::{EntryDescriptor, ZipWriter};
    use byteorder::WriteBytesExt;
    use flate2::Compression;
    use flate2::write::DeflateEncoder;
    use std::io::Write;

    fn read_all(data: &[u8]) -> Result<Vec<(String, Option<u64>, Vec<u8>)>> {
        let mut reader = ZipStreamReader::new(data);
        let mut out = Vec::new();
        while let Some(mut entry) = reader.next_entry()? {
            let declared = entry.declared_size();
            let mut content = Vec::new();
            entry.read_to_end(&mut content).map_err(nested_error)?;
            out.push((entry.file_name(), declared, content));
        }
        Ok(out)
    }

    /// Local header with sizes up front, the layout most archivers produce
    fn known_size_entry(out: &mut Vec<u8>, name: &str, content: &[u8], deflate: bool) {
        let payload = if deflate {
            let mut encoder = DeflateEncoder::new(Vec::new(), Compression::best());
            encoder.write_all(content).unwrap();
            encoder.finish().unwrap()
        } else {
            content.to_vec()
        };
        out.write_all(LFH_SIGNATURE).unwrap();
        out.write_u16::<LittleEndian>(20).unwrap();
        out.write_u16::<LittleEndian>(0).unwrap();
        out.write_u16::<LittleEndian>(if deflate { 8 } else { 0 }).unwrap();
        out.write_u16::<LittleEndian>(0).unwrap();
        out.write_u16::<LittleEndian>(0x21).unwrap();
        out.write_u32::<LittleEndian>(crc32fast::hash(content)).unwrap();
        out.write_u32::<LittleEndian>(payload.len() as u32).unwrap();
        out.write_u32::<LittleEndian>(content.len() as u32).unwrap();
        out.write_u16::<LittleEndian>(name.len() as u16).unwrap();
        out.write_u16::<LittleEndian>(0).unwrap();
        out.write_all(name.as_bytes()).unwrap();
        out.write_all(&payload).unwrap();
    }

    #[test]
    fn test_reads_descriptor_and_stored_entries() {
        let mut writer = ZipWriter::new(Vec::new());
        let mut entry = writer
            .start_entry(EntryDescriptor::new("a.txt"), &DeflateCompressor::default())
            .unwrap();
        entry.write_all(&b"alpha ".repeat(100)).unwrap();
        entry.finish().unwrap();
        writer
            .add_stored(EntryDescriptor::new("b/"), b"")
            .unwrap();
        writer
            .add_stored(EntryDescriptor::new("b/c.bin"), &[9; 33])
            .unwrap();
        let data = writer.finish().unwrap();

        let entries = read_all(&data).unwrap();
        assert_eq!(entries.len(), 3);
        assert_eq!(entries[0].0, "a.txt");
        assert_eq!(entries[0].1, None);
        assert_eq!(entries[0].2, b"alpha ".repeat(100));
        assert_eq!(entries[1], ("b/".to_string(), Some(0), Vec::new()));
        assert_eq!(entries[2], ("b/c.bin".to_string(), Some(33), vec![9; 33]));
    }

    #[test]
    fn test_reads_known_size_deflate() {
        let mut data = Vec::new();
        known_size_entry(&mut data, "x.txt", &b"xyz".repeat(50), true);
        known_size_entry(&mut data, "y.txt", b"plain", false);

        let entries = read_all(&data).unwrap();
        assert_eq!(entries[0].1, Some(150));
        assert_eq!(entries[0].2, b"xyz".repeat(50));
        assert_eq!(entries[1].2, b"plain");
    }

    #[test]
    fn test_crc_mismatch_is_malformed() {
        let mut data = Vec::new();
        known_size_entry(&mut data, "y.txt", b"plain", false);
        let last = data.len() - 1;
        data[last] ^= 0xFF;

        let err = read_all(&data).unwrap_err();
        assert!(matches!(err, Error::MalformedNestedArchive { .. }), "{err}");
    }

    #[test]
    fn test_truncated_entry_is_malformed() {
        let mut data = Vec::new();
        known_size_entry(&mut data, "y.txt", &[7; 64], false);
        data.truncate(data.len() - 10);

        let err = read_all(&data).unwrap_err();
        assert!(matches!(err, Error::MalformedNestedArchive { .. }), "{err}");
    }

    #[test]
    fn test_not_an_archive() {
        let err = read_all(b"this is plain text, not a zip").unwrap_err();
        assert!(matches!(err, Error::MalformedNestedArchive { .. }));

        assert!(read_all(b"").unwrap().is_empty());
    }

    #[test]
    fn test_unread_entry_blocks_next() {
        let mut data = Vec::new();
        known_size_entry(&mut data, "a", b"aaaa", false);
        known_size_entry(&mut data, "b", b"bbbb", false);

        let mut reader = ZipStreamReader::new(&data[..]);
        let first = reader.next_entry().unwrap();
        assert!(first.is_some());
        drop(first);
        assert!(reader.next_entry().is_err());
    }
}
