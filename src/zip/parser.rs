//! Central-directory ZIP archive parser.
//!
//! This module handles the binary parsing of ZIP file structures,
//! reading from any source that implements the [`ReadAt`] trait.
//!
//! ## Parsing Strategy
//!
//! ZIP files are designed to be read from the end:
//! 1. Find the End of Central Directory (EOCD) at the file's end
//! 2. If ZIP64, read the ZIP64 EOCD for large file support
//! 3. Read the Central Directory to get metadata for all files
//! 4. For content, read each file's Local File Header and data
//!
//! Only the central directory carries entry comments and the archive
//! comment, which is why transcoding starts from here rather than from
//! a sequential scan.

use byteorder::{LittleEndian, ReadBytesExt};
use flate2::read::DeflateDecoder;
use std::io::{self, Cursor, Read};
use std::sync::Arc;

use crate::io::{ReadAt, SectionReader};
use crate::{Error, Result};

use super::structures::*;

/// Maximum ZIP comment size allowed by the format (65535 bytes).
///
/// This limits the search area when looking for EOCD with a comment.
const MAX_COMMENT_SIZE: u64 = 65535;

/// Low-level ZIP file parser.
///
/// This struct handles reading and parsing ZIP structures from
/// a data source. It's generic over the reader type to support
/// both local files and in-memory archives.
///
/// ## Example
///
/// ```ignore
/// let parser = ZipParser::new(reader);
/// for entry in parser.list_files()? {
///     let mut content = parser.open_entry(&entry)?;
///     // Stream the decoded content...
/// }
/// ```
pub struct ZipParser<R: ReadAt> {
    /// The underlying data source
    reader: Arc<R>,
    /// Total size of the archive in bytes
    size: u64,
}

impl<R: ReadAt> ZipParser<R> {
    /// Create a new parser for the given reader.
    pub fn new(reader: Arc<R>) -> Self {
        let size = reader.size();
        Self { reader, size }
    }

    fn read_exact_at(&self, offset: u64, buf: &mut [u8], what: &str) -> Result<()> {
        self.reader
            .read_exact_at(offset, buf)
            .map_err(|e| Error::source_io(format!("cannot read {what} at offset {offset}"), e))
    }

    /// Find and parse the End of Central Directory record.
    ///
    /// The EOCD is located at the end of the ZIP file. This method
    /// handles both the simple case (no comment) and archives with
    /// comments by searching backwards for the signature.
    ///
    /// # Returns
    ///
    /// A tuple of (EOCD record, offset of EOCD in file).
    ///
    /// # Errors
    ///
    /// Returns an error if no valid EOCD can be found, indicating
    /// the file is not a valid ZIP archive.
    pub fn find_eocd(&self) -> Result<(EndOfCentralDirectory, u64)> {
        if self.size < EndOfCentralDirectory::SIZE as u64 {
            return Err(Error::source_read("not a valid ZIP file"));
        }

        // Optimization: First try the simple case where there's no comment.
        let offset = self.size - EndOfCentralDirectory::SIZE as u64;
        let mut buf = vec![0u8; EndOfCentralDirectory::SIZE];
        self.read_exact_at(offset, &mut buf, "End of Central Directory")?;

        if &buf[0..4] == EndOfCentralDirectory::SIGNATURE && &buf[20..22] == b"\x00\x00" {
            let eocd = EndOfCentralDirectory::from_bytes(&buf)?;
            return Ok((eocd, offset));
        }

        // The EOCD could be earlier if there's a ZIP comment.
        let search_size = (MAX_COMMENT_SIZE + EndOfCentralDirectory::SIZE as u64).min(self.size);
        let search_start = self.size - search_size;

        let mut buf = vec![0u8; search_size as usize];
        self.read_exact_at(search_start, &mut buf, "archive tail")?;

        // Search backwards for EOCD signature (PK\x05\x06)
        for i in (0..=buf.len() - EndOfCentralDirectory::SIZE).rev() {
            if &buf[i..i + 4] == EndOfCentralDirectory::SIGNATURE {
                // The comment length field must match the remaining bytes.
                let comment_len = u16::from_le_bytes([buf[i + 20], buf[i + 21]]) as usize;

                if comment_len == buf.len() - i - EndOfCentralDirectory::SIZE {
                    let eocd = EndOfCentralDirectory::from_bytes(
                        &buf[i..i + EndOfCentralDirectory::SIZE],
                    )?;
                    return Ok((eocd, search_start + i as u64));
                }
            }
        }

        Err(Error::source_read("not a valid ZIP file"))
    }

    /// Read the ZIP64 End of Central Directory record.
    ///
    /// Called when the regular EOCD indicates ZIP64 extensions are needed
    /// (fields set to 0xFFFF or 0xFFFFFFFF).
    pub fn read_zip64_eocd(&self, eocd_offset: u64) -> Result<Zip64EOCD> {
        // The ZIP64 EOCD Locator is located immediately before the regular EOCD
        let locator_offset = eocd_offset
            .checked_sub(Zip64EOCDLocator::SIZE as u64)
            .ok_or_else(|| Error::source_read("missing ZIP64 locator"))?;
        let mut locator_buf = vec![0u8; Zip64EOCDLocator::SIZE];
        self.read_exact_at(locator_offset, &mut locator_buf, "ZIP64 locator")?;

        let locator = Zip64EOCDLocator::from_bytes(&locator_buf)?;

        let mut eocd64_buf = vec![0u8; Zip64EOCD::MIN_SIZE];
        self.read_exact_at(locator.eocd64_offset, &mut eocd64_buf, "ZIP64 EOCD")?;

        Zip64EOCD::from_bytes(&eocd64_buf)
    }

    /// Read the archive-level comment stored after the EOCD.
    pub fn archive_comment(&self) -> Result<Vec<u8>> {
        let (eocd, offset) = self.find_eocd()?;
        let mut comment = vec![0u8; eocd.comment_len as usize];
        self.read_exact_at(
            offset + EndOfCentralDirectory::SIZE as u64,
            &mut comment,
            "archive comment",
        )?;
        Ok(comment)
    }

    /// List all files in the ZIP archive, in central directory order.
    ///
    /// Any structural problem in the central directory is reported here,
    /// before a single entry is handed out.
    pub fn list_files(&self) -> Result<Vec<ZipFileEntry>> {
        let (eocd, eocd_offset) = self.find_eocd()?;

        let (cd_offset, cd_size, total_entries) = if eocd.is_zip64() {
            let eocd64 = self.read_zip64_eocd(eocd_offset)?;
            (eocd64.cd_offset, eocd64.cd_size, eocd64.total_entries)
        } else {
            (
                eocd.cd_offset as u64,
                eocd.cd_size as u64,
                eocd.total_entries as u64,
            )
        };

        if cd_offset.checked_add(cd_size).is_none_or(|end| end > self.size) {
            return Err(Error::source_read(format!(
                "central directory ({cd_size} bytes at offset {cd_offset}) lies outside the archive"
            )));
        }
        // Each header takes at least CDFH_MIN_SIZE bytes
        if total_entries > cd_size / CDFH_MIN_SIZE as u64 {
            return Err(Error::source_read(format!(
                "central directory of {cd_size} bytes cannot hold {total_entries} entries"
            )));
        }

        let mut cd_data = vec![0u8; cd_size as usize];
        self.read_exact_at(cd_offset, &mut cd_data, "central directory")?;

        let mut entries = Vec::with_capacity(total_entries as usize);
        let mut cursor = Cursor::new(&cd_data);

        for index in 0..total_entries {
            let entry = self.parse_cdfh(&mut cursor).map_err(|e| {
                Error::source_io(format!("malformed central directory header #{index}"), e)
            })?;
            entries.push(entry);
        }

        Ok(entries)
    }

    /// Parse a Central Directory File Header from a cursor.
    ///
    /// The CDFH contains metadata about a file in the archive, including
    /// its name, sizes, extra field, comment and the location of the
    /// local header.
    fn parse_cdfh(&self, cursor: &mut Cursor<&Vec<u8>>) -> io::Result<ZipFileEntry> {
        let mut sig = [0u8; 4];
        cursor.read_exact(&mut sig)?;
        if sig != CDFH_SIGNATURE {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "bad Central Directory File Header signature",
            ));
        }

        let _version_made_by = cursor.read_u16::<LittleEndian>()?;
        let _version_needed = cursor.read_u16::<LittleEndian>()?;
        let flags = cursor.read_u16::<LittleEndian>()?;
        let compression_method = cursor.read_u16::<LittleEndian>()?;
        let last_mod_time = cursor.read_u16::<LittleEndian>()?;
        let last_mod_date = cursor.read_u16::<LittleEndian>()?;
        let crc32 = cursor.read_u32::<LittleEndian>()?;
        let mut compressed_size = cursor.read_u32::<LittleEndian>()? as u64;
        let mut uncompressed_size = cursor.read_u32::<LittleEndian>()? as u64;
        let file_name_length = cursor.read_u16::<LittleEndian>()?;
        let extra_field_length = cursor.read_u16::<LittleEndian>()?;
        let file_comment_length = cursor.read_u16::<LittleEndian>()?;
        let _disk_number_start = cursor.read_u16::<LittleEndian>()?;
        let _internal_attrs = cursor.read_u16::<LittleEndian>()?;
        let _external_attrs = cursor.read_u32::<LittleEndian>()?;
        let mut lfh_offset = cursor.read_u32::<LittleEndian>()? as u64;

        let mut name_bytes = vec![0u8; file_name_length as usize];
        cursor.read_exact(&mut name_bytes)?;
        // Use lossy conversion to handle non-UTF8 filenames gracefully
        let file_name = String::from_utf8_lossy(&name_bytes).to_string();

        // Directory entries end with '/'
        let is_directory = file_name.ends_with('/');

        let mut extra = vec![0u8; extra_field_length as usize];
        cursor.read_exact(&mut extra)?;

        // ZIP64 fields are present only if the corresponding header field is 0xFFFFFFFF
        if let Some(mut zip64) = find_extra_block(&extra, ZIP64_EXTRA_ID) {
            if uncompressed_size == ZIP64_SENTINEL_32 as u64 && zip64.len() >= 8 {
                uncompressed_size = zip64.read_u64::<LittleEndian>()?;
            }
            if compressed_size == ZIP64_SENTINEL_32 as u64 && zip64.len() >= 8 {
                compressed_size = zip64.read_u64::<LittleEndian>()?;
            }
            if lfh_offset == ZIP64_SENTINEL_32 as u64 && zip64.len() >= 8 {
                lfh_offset = zip64.read_u64::<LittleEndian>()?;
            }
        }

        let mut comment = vec![0u8; file_comment_length as usize];
        cursor.read_exact(&mut comment)?;

        Ok(ZipFileEntry {
            file_name,
            name_bytes,
            flags,
            compression_method: CompressionMethod::from_u16(compression_method),
            compressed_size,
            uncompressed_size,
            crc32,
            lfh_offset,
            last_mod_time,
            last_mod_date,
            is_directory,
            extra,
            comment,
        })
    }

    /// Get the actual data offset for a file entry.
    ///
    /// The Local File Header (LFH) has variable-length fields (filename,
    /// extra field) that may differ from the Central Directory entry.
    /// This method reads the LFH to calculate where the actual file
    /// data begins.
    pub fn get_data_offset(&self, entry: &ZipFileEntry) -> Result<u64> {
        let mut lfh_buf = vec![0u8; LFH_SIZE];
        self.read_exact_at(entry.lfh_offset, &mut lfh_buf, "local file header")?;

        if &lfh_buf[0..4] != LFH_SIGNATURE {
            return Err(Error::source_read(format!(
                "invalid Local File Header for '{}'",
                entry.file_name
            )));
        }

        // Variable field lengths sit at fixed positions 26..30
        let file_name_length = u16::from_le_bytes([lfh_buf[26], lfh_buf[27]]) as u64;
        let extra_field_length = u16::from_le_bytes([lfh_buf[28], lfh_buf[29]]) as u64;

        Ok(entry.lfh_offset + LFH_SIZE as u64 + file_name_length + extra_field_length)
    }

    /// Open a stream over the decoded content of an entry.
    pub fn open_entry(&self, entry: &ZipFileEntry) -> Result<Box<dyn Read + '_>> {
        if entry.is_encrypted() {
            return Err(Error::source_read(format!(
                "entry '{}' is encrypted",
                entry.file_name
            )));
        }

        let data_offset = self.get_data_offset(entry)?;
        let section = SectionReader::new(self.reader.as_ref(), data_offset, entry.compressed_size);

        match entry.compression_method {
            CompressionMethod::Stored => Ok(Box::new(section)),
            CompressionMethod::Deflate => Ok(Box::new(DeflateDecoder::new(section))),
            CompressionMethod::Unknown(method) => Err(Error::source_read(format!(
                "entry '{}' uses unsupported compression method {method}",
                entry.file_name
            ))),
        }
    }

    /// Get a reference to the underlying reader.
    pub fn reader(&self) -> &Arc<R> {
        &self.reader
    }
}
