//! Streaming ZIP writer.
//!
//! Entries are appended in order to any [`Write`] sink; nothing is
//! buffered beyond what the compressor holds internally. Compressed
//! entries learn their CRC and sizes only at the end, so they are
//! followed by a data descriptor. Stored entries are written with the
//! CRC and sizes up front, the layout sequential readers handle best.

use byteorder::{LittleEndian, WriteBytesExt};
use std::io::{self, Write};

use crate::compress::{Compressor, EntryEncoder};

use super::structures::*;

/// DOS date for 1980-01-01, the earliest representable date
const DOS_EPOCH_DATE: u16 = (1 << 5) | 1;

/// Header fields of an entry about to be written
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryDescriptor {
    pub name: Vec<u8>,
    /// Name and comment are UTF-8 (general purpose bit 11)
    pub utf8: bool,
    pub last_mod_time: u16,
    pub last_mod_date: u16,
    pub extra: Vec<u8>,
    pub comment: Vec<u8>,
}

impl EntryDescriptor {
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            utf8: !name.is_ascii(),
            name: name.into_bytes(),
            last_mod_time: 0,
            last_mod_date: DOS_EPOCH_DATE,
            extra: Vec::new(),
            comment: Vec::new(),
        }
    }

    /// Name and timestamp of an existing entry, nothing else
    pub fn from_entry(entry: &ZipFileEntry) -> Self {
        Self {
            name: entry.name_bytes.clone(),
            utf8: entry.flags & FLAG_UTF8 != 0,
            last_mod_time: entry.last_mod_time,
            last_mod_date: entry.last_mod_date,
            extra: Vec::new(),
            comment: Vec::new(),
        }
    }

    /// Same as [`from_entry`](Self::from_entry) for a sequentially read header
    pub fn from_local_header(header: &LocalFileHeader) -> Self {
        Self {
            name: header.name_bytes.clone(),
            utf8: header.flags & FLAG_UTF8 != 0,
            last_mod_time: header.last_mod_time,
            last_mod_date: header.last_mod_date,
            extra: Vec::new(),
            comment: Vec::new(),
        }
    }

    fn flags(&self) -> u16 {
        if self.utf8 { FLAG_UTF8 } else { 0 }
    }

    fn is_directory(&self) -> bool {
        self.name.ends_with(b"/")
    }
}

/// Central directory record collected while writing
#[derive(Debug)]
struct CentralRecord {
    descriptor: EntryDescriptor,
    flags: u16,
    method: CompressionMethod,
    crc32: u32,
    compressed_size: u64,
    uncompressed_size: u64,
    lfh_offset: u64,
}

/// Write adapter that tracks the absolute write position
#[derive(Debug)]
pub struct CountingWriter<W> {
    inner: W,
    position: u64,
}

impl<W: Write> CountingWriter<W> {
    pub fn position(&self) -> u64 {
        self.position
    }
}

impl<W: Write> Write for CountingWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.inner.write(buf)?;
        self.position += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

/// Sequential ZIP writer
pub struct ZipWriter<W: Write> {
    out: CountingWriter<W>,
    records: Vec<CentralRecord>,
    comment: Vec<u8>,
}

impl<W: Write> ZipWriter<W> {
    pub fn new(inner: W) -> Self {
        Self {
            out: CountingWriter { inner, position: 0 },
            records: Vec::new(),
            comment: Vec::new(),
        }
    }

    /// Number of entries written so far
    pub fn entry_count(&self) -> usize {
        self.records.len()
    }

    /// Begin an entry whose content is streamed through `compressor`.
    ///
    /// The entry is recorded only once [`EntryWriter::finish`] returns;
    /// dropping the writer early leaves the archive unusable.
    pub fn start_entry<C: Compressor>(
        &mut self,
        descriptor: EntryDescriptor,
        compressor: &C,
    ) -> io::Result<EntryWriter<'_, W>> {
        check_header_lengths(&descriptor)?;

        let flags = descriptor.flags() | FLAG_DATA_DESCRIPTOR;
        let method = compressor.method();
        let lfh_offset = self.out.position();
        write_local_header(&mut self.out, &descriptor, flags, method, 0, 0, 0)?;
        let data_start = self.out.position();

        Ok(EntryWriter {
            encoder: compressor.encoder(&mut self.out),
            records: &mut self.records,
            record: CentralRecord {
                descriptor,
                flags,
                method,
                crc32: 0,
                compressed_size: 0,
                uncompressed_size: 0,
                lfh_offset,
            },
            data_start,
            hasher: crc32fast::Hasher::new(),
            size: 0,
        })
    }

    /// Write a complete entry without compression
    pub fn add_stored(&mut self, descriptor: EntryDescriptor, data: &[u8]) -> io::Result<()> {
        check_header_lengths(&descriptor)?;

        let flags = descriptor.flags();
        let crc32 = crc32fast::hash(data);
        let size = data.len() as u64;
        let lfh_offset = self.out.position();
        write_local_header(
            &mut self.out,
            &descriptor,
            flags,
            CompressionMethod::Stored,
            crc32,
            size,
            size,
        )?;
        self.out.write_all(data)?;

        self.records.push(CentralRecord {
            descriptor,
            flags,
            method: CompressionMethod::Stored,
            crc32,
            compressed_size: size,
            uncompressed_size: size,
            lfh_offset,
        });
        Ok(())
    }

    /// Set the archive comment written by [`finish`](Self::finish)
    pub fn set_comment(&mut self, comment: impl Into<Vec<u8>>) {
        self.comment = comment.into();
    }

    /// Write the central directory and end records, returning the sink
    pub fn finish(mut self) -> io::Result<W> {
        if self.comment.len() > u16::MAX as usize {
            return Err(invalid_input("archive comment longer than 65535 bytes"));
        }

        let cd_offset = self.out.position();
        for record in &self.records {
            write_central_header(&mut self.out, record)?;
        }
        let cd_size = self.out.position() - cd_offset;
        let entries = self.records.len() as u64;

        let needs_zip64 = entries >= ZIP64_SENTINEL_16 as u64
            || cd_offset >= ZIP64_SENTINEL_32 as u64
            || cd_size >= ZIP64_SENTINEL_32 as u64;

        if needs_zip64 {
            let eocd64_offset = self.out.position();
            Zip64EOCD {
                // Size of the remaining record, excluding signature and this field
                eocd64_size: (Zip64EOCD::MIN_SIZE - 12) as u64,
                version_made_by: VERSION_ZIP64,
                version_needed: VERSION_ZIP64,
                disk_number: 0,
                disk_with_cd: 0,
                disk_entries: entries,
                total_entries: entries,
                cd_size,
                cd_offset,
            }
            .write_to(&mut self.out)?;
            Zip64EOCDLocator {
                disk_with_eocd64: 0,
                eocd64_offset,
                total_disks: 1,
            }
            .write_to(&mut self.out)?;
        }

        let entries16 = u16::try_from(entries)
            .ok()
            .filter(|n| *n < ZIP64_SENTINEL_16)
            .unwrap_or(ZIP64_SENTINEL_16);
        EndOfCentralDirectory {
            disk_number: 0,
            disk_with_cd: 0,
            disk_entries: entries16,
            total_entries: entries16,
            cd_size: clamp32(cd_size),
            cd_offset: clamp32(cd_offset),
            comment_len: self.comment.len() as u16,
        }
        .write_to(&mut self.out, &self.comment)?;

        self.out.flush()?;
        Ok(self.out.inner)
    }
}

/// Streaming writer for one compressed entry
pub struct EntryWriter<'a, W: Write> {
    encoder: Box<dyn EntryEncoder<&'a mut CountingWriter<W>> + 'a>,
    records: &'a mut Vec<CentralRecord>,
    record: CentralRecord,
    data_start: u64,
    hasher: crc32fast::Hasher,
    size: u64,
}

impl<W: Write> EntryWriter<'_, W> {
    /// Finish the compressed stream, append the data descriptor and record the entry
    pub fn finish(self) -> io::Result<()> {
        let EntryWriter {
            encoder,
            records,
            mut record,
            data_start,
            hasher,
            size,
        } = self;

        let out = encoder.finish()?;
        record.crc32 = hasher.finalize();
        record.uncompressed_size = size;
        record.compressed_size = out.position() - data_start;

        out.write_all(DATA_DESCRIPTOR_SIGNATURE)?;
        out.write_u32::<LittleEndian>(record.crc32)?;
        if record.compressed_size >= ZIP64_SENTINEL_32 as u64
            || record.uncompressed_size >= ZIP64_SENTINEL_32 as u64
        {
            out.write_u64::<LittleEndian>(record.compressed_size)?;
            out.write_u64::<LittleEndian>(record.uncompressed_size)?;
        } else {
            out.write_u32::<LittleEndian>(record.compressed_size as u32)?;
            out.write_u32::<LittleEndian>(record.uncompressed_size as u32)?;
        }

        records.push(record);
        Ok(())
    }
}

impl<W: Write> Write for EntryWriter<'_, W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.encoder.write(buf)?;
        self.hasher.update(&buf[..n]);
        self.size += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.encoder.flush()
    }
}

fn invalid_input(msg: &str) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidInput, msg)
}

fn clamp32(value: u64) -> u32 {
    u32::try_from(value)
        .ok()
        .filter(|v| *v < ZIP64_SENTINEL_32)
        .unwrap_or(ZIP64_SENTINEL_32)
}

fn check_header_lengths(descriptor: &EntryDescriptor) -> io::Result<()> {
    // Leave room for a ZIP64 block appended to the extra field
    if descriptor.name.len() > u16::MAX as usize {
        return Err(invalid_input("entry name longer than 65535 bytes"));
    }
    if descriptor.extra.len() > u16::MAX as usize - 28 {
        return Err(invalid_input("entry extra field too long"));
    }
    if descriptor.comment.len() > u16::MAX as usize {
        return Err(invalid_input("entry comment longer than 65535 bytes"));
    }
    Ok(())
}

fn write_local_header<W: Write>(
    out: &mut W,
    descriptor: &EntryDescriptor,
    flags: u16,
    method: CompressionMethod,
    crc32: u32,
    compressed_size: u64,
    uncompressed_size: u64,
) -> io::Result<()> {
    let zip64 = compressed_size >= ZIP64_SENTINEL_32 as u64
        || uncompressed_size >= ZIP64_SENTINEL_32 as u64;
    let zip64_len = if zip64 { 20 } else { 0 };

    out.write_all(LFH_SIGNATURE)?;
    out.write_u16::<LittleEndian>(if zip64 { VERSION_ZIP64 } else { VERSION_DEFAULT })?;
    out.write_u16::<LittleEndian>(flags)?;
    out.write_u16::<LittleEndian>(method.as_u16())?;
    out.write_u16::<LittleEndian>(descriptor.last_mod_time)?;
    out.write_u16::<LittleEndian>(descriptor.last_mod_date)?;
    out.write_u32::<LittleEndian>(crc32)?;
    out.write_u32::<LittleEndian>(clamp32(compressed_size))?;
    out.write_u32::<LittleEndian>(clamp32(uncompressed_size))?;
    out.write_u16::<LittleEndian>(descriptor.name.len() as u16)?;
    out.write_u16::<LittleEndian>((descriptor.extra.len() + zip64_len) as u16)?;
    out.write_all(&descriptor.name)?;
    out.write_all(&descriptor.extra)?;
    if zip64 {
        out.write_u16::<LittleEndian>(ZIP64_EXTRA_ID)?;
        out.write_u16::<LittleEndian>(16)?;
        out.write_u64::<LittleEndian>(uncompressed_size)?;
        out.write_u64::<LittleEndian>(compressed_size)?;
    }
    Ok(())
}

fn write_central_header<W: Write>(out: &mut W, record: &CentralRecord) -> io::Result<()> {
    // ZIP64 values, in the order the format requires
    let mut zip64 = Vec::new();
    if record.uncompressed_size >= ZIP64_SENTINEL_32 as u64 {
        zip64.write_u64::<LittleEndian>(record.uncompressed_size)?;
    }
    if record.compressed_size >= ZIP64_SENTINEL_32 as u64 {
        zip64.write_u64::<LittleEndian>(record.compressed_size)?;
    }
    if record.lfh_offset >= ZIP64_SENTINEL_32 as u64 {
        zip64.write_u64::<LittleEndian>(record.lfh_offset)?;
    }
    let zip64_len = if zip64.is_empty() { 0 } else { 4 + zip64.len() };
    let version = if zip64.is_empty() { VERSION_DEFAULT } else { VERSION_ZIP64 };
    let descriptor = &record.descriptor;
    let external_attrs: u32 = if descriptor.is_directory() { 0x10 } else { 0 };

    out.write_all(CDFH_SIGNATURE)?;
    out.write_u16::<LittleEndian>(version)?;
    out.write_u16::<LittleEndian>(version)?;
    out.write_u16::<LittleEndian>(record.flags)?;
    out.write_u16::<LittleEndian>(record.method.as_u16())?;
    out.write_u16::<LittleEndian>(descriptor.last_mod_time)?;
    out.write_u16::<LittleEndian>(descriptor.last_mod_date)?;
    out.write_u32::<LittleEndian>(record.crc32)?;
    out.write_u32::<LittleEndian>(clamp32(record.compressed_size))?;
    out.write_u32::<LittleEndian>(clamp32(record.uncompressed_size))?;
    out.write_u16::<LittleEndian>(descriptor.name.len() as u16)?;
    out.write_u16::<LittleEndian>((descriptor.extra.len() + zip64_len) as u16)?;
    out.write_u16::<LittleEndian>(descriptor.comment.len() as u16)?;
    out.write_u16::<LittleEndian>(0)?; // disk number start
    out.write_u16::<LittleEndian>(0)?; // internal attributes
    out.write_u32::<LittleEndian>(external_attrs)?;
    out.write_u32::<LittleEndian>(clamp32(record.lfh_offset))?;
    out.write_all(&descriptor.name)?;
    out.write_all(&descriptor.extra)?;
    if !zip64.is_empty() {
        out.write_u16::<LittleEndian>(ZIP64_EXTRA_ID)?;
        out.write_u16::<LittleEndian>(zip64.len() as u16)?;
        out.write_all(&zip64)?;
    }
    out.write_all(&descriptor.comment)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compress::DeflateCompressor;
    use crate::io::MemoryReader;
    use crate::zip::ZipParser;
    use std::io::Read;
    use std::sync::Arc;

    fn parse(data: Vec<u8>) -> ZipParser<MemoryReader> {
        ZipParser::new(Arc::new(MemoryReader::new(data)))
    }

    #[test]
    fn test_empty_archive() {
        let data = ZipWriter::new(Vec::new()).finish().unwrap();
        assert_eq!(data.len(), EndOfCentralDirectory::SIZE);
        assert!(parse(data).list_files().unwrap().is_empty());
    }

    #[test]
    fn test_compressed_entry_records_crc_and_sizes() {
        let content = b"abcabcabcabcabcabcabcabcabcabc".repeat(20);
        let mut writer = ZipWriter::new(Vec::new());
        let mut entry = writer
            .start_entry(EntryDescriptor::new("a.txt"), &DeflateCompressor::default())
            .unwrap();
        entry.write_all(&content).unwrap();
        entry.finish().unwrap();
        assert_eq!(writer.entry_count(), 1);
        let data = writer.finish().unwrap();

        let parser = parse(data);
        let entries = parser.list_files().unwrap();
        assert_eq!(entries[0].crc32, crc32fast::hash(&content));
        assert_eq!(entries[0].uncompressed_size, content.len() as u64);
        assert!(entries[0].compressed_size < content.len() as u64);
        assert_ne!(entries[0].flags & FLAG_DATA_DESCRIPTOR, 0);

        let mut decoded = Vec::new();
        parser
            .open_entry(&entries[0])
            .unwrap()
            .read_to_end(&mut decoded)
            .unwrap();
        assert_eq!(decoded, content);
    }

    #[test]
    fn test_non_ascii_names_set_utf8_flag() {
        let mut writer = ZipWriter::new(Vec::new());
        writer
            .add_stored(EntryDescriptor::new("données/é.txt"), b"x")
            .unwrap();
        let entries = parse(writer.finish().unwrap()).list_files().unwrap();
        assert_eq!(entries[0].file_name, "données/é.txt");
        assert_ne!(entries[0].flags & FLAG_UTF8, 0);
    }

    #[test]
    fn test_many_entries_use_zip64_end_records() {
        let mut writer = ZipWriter::new(Vec::new());
        for i in 0..70_000u32 {
            writer
                .add_stored(EntryDescriptor::new(format!("{i}")), b"")
                .unwrap();
        }
        let data = writer.finish().unwrap();

        let parser = parse(data);
        let (eocd, _) = parser.find_eocd().unwrap();
        assert!(eocd.is_zip64());
        let entries = parser.list_files().unwrap();
        assert_eq!(entries.len(), 70_000);
        assert_eq!(entries[69_999].file_name, "69999");
    }

    #[test]
    fn test_oversized_comment_is_refused() {
        let mut writer = ZipWriter::new(Vec::new());
        writer.set_comment(vec![b'c'; 70_000]);
        let err = writer.finish().unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidInput);
    }
}
