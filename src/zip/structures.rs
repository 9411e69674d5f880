use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::io::{self, Cursor, Read, Write};

use crate::{Error, Result};

/// ZIP compression methods
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompressionMethod {
    Stored,
    Deflate,
    Unknown(u16),
}

impl CompressionMethod {
    pub fn from_u16(value: u16) -> Self {
        match value {
            0 => CompressionMethod::Stored,
            8 => CompressionMethod::Deflate,
            _ => CompressionMethod::Unknown(value),
        }
    }

    pub fn as_u16(&self) -> u16 {
        match self {
            CompressionMethod::Stored => 0,
            CompressionMethod::Deflate => 8,
            CompressionMethod::Unknown(v) => *v,
        }
    }
}

/// General purpose flag: entry is encrypted
pub const FLAG_ENCRYPTED: u16 = 0x0001;
/// General purpose flag: CRC and sizes follow the data in a data descriptor
pub const FLAG_DATA_DESCRIPTOR: u16 = 0x0008;
/// General purpose flag: name and comment are UTF-8
pub const FLAG_UTF8: u16 = 0x0800;

/// Header ID of the ZIP64 extended information extra block
pub const ZIP64_EXTRA_ID: u16 = 0x0001;
/// Value stored in a 32-bit field whose real value lives in the ZIP64 extra block
pub const ZIP64_SENTINEL_32: u32 = 0xFFFF_FFFF;
/// Value stored in a 16-bit entry count when the real count lives in the ZIP64 EOCD
pub const ZIP64_SENTINEL_16: u16 = 0xFFFF;

/// Version needed to extract: 2.0 (deflate, directories)
pub const VERSION_DEFAULT: u16 = 20;
/// Version needed to extract: 4.5 (ZIP64)
pub const VERSION_ZIP64: u16 = 45;

/// End of Central Directory (EOCD) - 22 bytes minimum
pub struct EndOfCentralDirectory {
    pub disk_number: u16,
    pub disk_with_cd: u16,
    pub disk_entries: u16,
    pub total_entries: u16,
    pub cd_size: u32,
    pub cd_offset: u32,
    pub comment_len: u16,
}

impl EndOfCentralDirectory {
    pub const SIGNATURE: &'static [u8] = b"PK\x05\x06";
    pub const SIZE: usize = 22;

    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        if data.len() < Self::SIZE || &data[0..4] != Self::SIGNATURE {
            return Err(Error::source_read("invalid End of Central Directory"));
        }

        let mut cursor = Cursor::new(&data[4..]);
        let truncated = |e| Error::source_io("truncated End of Central Directory", e);

        Ok(Self {
            disk_number: cursor.read_u16::<LittleEndian>().map_err(truncated)?,
            disk_with_cd: cursor.read_u16::<LittleEndian>().map_err(truncated)?,
            disk_entries: cursor.read_u16::<LittleEndian>().map_err(truncated)?,
            total_entries: cursor.read_u16::<LittleEndian>().map_err(truncated)?,
            cd_size: cursor.read_u32::<LittleEndian>().map_err(truncated)?,
            cd_offset: cursor.read_u32::<LittleEndian>().map_err(truncated)?,
            comment_len: cursor.read_u16::<LittleEndian>().map_err(truncated)?,
        })
    }

    pub fn is_zip64(&self) -> bool {
        self.disk_entries == ZIP64_SENTINEL_16
            || self.total_entries == ZIP64_SENTINEL_16
            || self.cd_size == ZIP64_SENTINEL_32
            || self.cd_offset == ZIP64_SENTINEL_32
    }

    /// Write the record followed by the archive comment
    pub fn write_to<W: Write>(&self, w: &mut W, comment: &[u8]) -> io::Result<()> {
        w.write_all(Self::SIGNATURE)?;
        w.write_u16::<LittleEndian>(self.disk_number)?;
        w.write_u16::<LittleEndian>(self.disk_with_cd)?;
        w.write_u16::<LittleEndian>(self.disk_entries)?;
        w.write_u16::<LittleEndian>(self.total_entries)?;
        w.write_u32::<LittleEndian>(self.cd_size)?;
        w.write_u32::<LittleEndian>(self.cd_offset)?;
        w.write_u16::<LittleEndian>(self.comment_len)?;
        w.write_all(comment)
    }
}

/// ZIP64 End of Central Directory Locator - 20 bytes
pub struct Zip64EOCDLocator {
    pub disk_with_eocd64: u32,
    pub eocd64_offset: u64,
    pub total_disks: u32,
}

impl Zip64EOCDLocator {
    pub const SIGNATURE: &'static [u8] = b"PK\x06\x07";
    pub const SIZE: usize = 20;

    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        if data.len() < Self::SIZE || &data[0..4] != Self::SIGNATURE {
            return Err(Error::source_read("invalid ZIP64 locator"));
        }

        let mut cursor = Cursor::new(&data[4..]);
        let truncated = |e| Error::source_io("truncated ZIP64 locator", e);

        Ok(Self {
            disk_with_eocd64: cursor.read_u32::<LittleEndian>().map_err(truncated)?,
            eocd64_offset: cursor.read_u64::<LittleEndian>().map_err(truncated)?,
            total_disks: cursor.read_u32::<LittleEndian>().map_err(truncated)?,
        })
    }

    pub fn write_to<W: Write>(&self, w: &mut W) -> io::Result<()> {
        w.write_all(Self::SIGNATURE)?;
        w.write_u32::<LittleEndian>(self.disk_with_eocd64)?;
        w.write_u64::<LittleEndian>(self.eocd64_offset)?;
        w.write_u32::<LittleEndian>(self.total_disks)
    }
}

/// ZIP64 End of Central Directory - 56 bytes minimum
pub struct Zip64EOCD {
    pub eocd64_size: u64,
    pub version_made_by: u16,
    pub version_needed: u16,
    pub disk_number: u32,
    pub disk_with_cd: u32,
    pub disk_entries: u64,
    pub total_entries: u64,
    pub cd_size: u64,
    pub cd_offset: u64,
}

impl Zip64EOCD {
    pub const SIGNATURE: &'static [u8] = b"PK\x06\x06";
    pub const MIN_SIZE: usize = 56;

    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        if data.len() < Self::MIN_SIZE || &data[0..4] != Self::SIGNATURE {
            return Err(Error::source_read("invalid ZIP64 End of Central Directory"));
        }

        let mut cursor = Cursor::new(&data[4..]);
        let truncated = |e| Error::source_io("truncated ZIP64 End of Central Directory", e);

        Ok(Self {
            eocd64_size: cursor.read_u64::<LittleEndian>().map_err(truncated)?,
            version_made_by: cursor.read_u16::<LittleEndian>().map_err(truncated)?,
            version_needed: cursor.read_u16::<LittleEndian>().map_err(truncated)?,
            disk_number: cursor.read_u32::<LittleEndian>().map_err(truncated)?,
            disk_with_cd: cursor.read_u32::<LittleEndian>().map_err(truncated)?,
            disk_entries: cursor.read_u64::<LittleEndian>().map_err(truncated)?,
            total_entries: cursor.read_u64::<LittleEndian>().map_err(truncated)?,
            cd_size: cursor.read_u64::<LittleEndian>().map_err(truncated)?,
            cd_offset: cursor.read_u64::<LittleEndian>().map_err(truncated)?,
        })
    }

    pub fn write_to<W: Write>(&self, w: &mut W) -> io::Result<()> {
        w.write_all(Self::SIGNATURE)?;
        w.write_u64::<LittleEndian>(self.eocd64_size)?;
        w.write_u16::<LittleEndian>(self.version_made_by)?;
        w.write_u16::<LittleEndian>(self.version_needed)?;
        w.write_u32::<LittleEndian>(self.disk_number)?;
        w.write_u32::<LittleEndian>(self.disk_with_cd)?;
        w.write_u64::<LittleEndian>(self.disk_entries)?;
        w.write_u64::<LittleEndian>(self.total_entries)?;
        w.write_u64::<LittleEndian>(self.cd_size)?;
        w.write_u64::<LittleEndian>(self.cd_offset)
    }
}

/// Central Directory File Header (CDFH) - 46 bytes minimum
pub const CDFH_SIGNATURE: &[u8] = b"PK\x01\x02";
pub const CDFH_MIN_SIZE: usize = 46;

/// Local File Header (LFH) - 30 bytes
pub const LFH_SIGNATURE: &[u8] = b"PK\x03\x04";
pub const LFH_SIZE: usize = 30;

/// Optional signature in front of a data descriptor
pub const DATA_DESCRIPTOR_SIGNATURE: &[u8] = b"PK\x07\x08";

/// Local File Header without its signature, as read by the sequential reader
#[derive(Debug, Clone)]
pub struct LocalFileHeader {
    pub version_needed: u16,
    pub flags: u16,
    pub compression_method: CompressionMethod,
    pub last_mod_time: u16,
    pub last_mod_date: u16,
    pub crc32: u32,
    pub compressed_size: u64,
    pub uncompressed_size: u64,
    pub name_bytes: Vec<u8>,
    pub extra: Vec<u8>,
}

impl LocalFileHeader {
    /// Parse the fields that follow the `PK\x03\x04` signature.
    ///
    /// ZIP64 sizes are resolved from the extra block when the 32-bit
    /// fields hold the sentinel.
    pub fn read_after_signature<R: Read>(r: &mut R) -> io::Result<Self> {
        let version_needed = r.read_u16::<LittleEndian>()?;
        let flags = r.read_u16::<LittleEndian>()?;
        let compression_method = CompressionMethod::from_u16(r.read_u16::<LittleEndian>()?);
        let last_mod_time = r.read_u16::<LittleEndian>()?;
        let last_mod_date = r.read_u16::<LittleEndian>()?;
        let crc32 = r.read_u32::<LittleEndian>()?;
        let compressed_size = r.read_u32::<LittleEndian>()?;
        let uncompressed_size = r.read_u32::<LittleEndian>()?;
        let name_len = r.read_u16::<LittleEndian>()?;
        let extra_len = r.read_u16::<LittleEndian>()?;

        let mut name_bytes = vec![0u8; name_len as usize];
        r.read_exact(&mut name_bytes)?;
        let mut extra = vec![0u8; extra_len as usize];
        r.read_exact(&mut extra)?;

        let mut header = Self {
            version_needed,
            flags,
            compression_method,
            last_mod_time,
            last_mod_date,
            crc32,
            compressed_size: compressed_size as u64,
            uncompressed_size: uncompressed_size as u64,
            name_bytes,
            extra,
        };

        // Local headers list uncompressed size first, then compressed size
        if let Some(mut zip64) = find_extra_block(&header.extra, ZIP64_EXTRA_ID) {
            if uncompressed_size == ZIP64_SENTINEL_32 && zip64.len() >= 8 {
                header.uncompressed_size = zip64.read_u64::<LittleEndian>()?;
            }
            if compressed_size == ZIP64_SENTINEL_32 && zip64.len() >= 8 {
                header.compressed_size = zip64.read_u64::<LittleEndian>()?;
            }
        }

        Ok(header)
    }

    pub fn file_name(&self) -> String {
        String::from_utf8_lossy(&self.name_bytes).to_string()
    }

    pub fn has_data_descriptor(&self) -> bool {
        self.flags & FLAG_DATA_DESCRIPTOR != 0
    }

    pub fn has_zip64_extra(&self) -> bool {
        find_extra_block(&self.extra, ZIP64_EXTRA_ID).is_some()
    }
}

/// Parsed ZIP file entry information
#[derive(Debug, Clone)]
pub struct ZipFileEntry {
    pub file_name: String,
    pub name_bytes: Vec<u8>,
    pub flags: u16,
    pub compression_method: CompressionMethod,
    pub compressed_size: u64,
    pub uncompressed_size: u64,
    pub crc32: u32,
    pub lfh_offset: u64,
    pub last_mod_time: u16,
    pub last_mod_date: u16,
    pub is_directory: bool,
    /// Central directory extra field, verbatim
    pub extra: Vec<u8>,
    /// Entry comment, verbatim
    pub comment: Vec<u8>,
}

impl ZipFileEntry {
    pub fn is_encrypted(&self) -> bool {
        self.flags & FLAG_ENCRYPTED != 0
    }
}

/// Return the payload of the first extra block with the given header ID
pub fn find_extra_block(extra: &[u8], id: u16) -> Option<&[u8]> {
    ExtraBlocks(extra)
        .find(|(header_id, _)| *header_id == id)
        .map(|(_, data)| data)
}

/// Copy an extra field, dropping ZIP64 blocks.
///
/// Sizes and offsets are recomputed on write, so a stale ZIP64 block
/// would contradict the new headers.
pub fn strip_zip64_extra(extra: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(extra.len());
    let mut consumed = 0;
    for (id, data) in ExtraBlocks(extra) {
        if id != ZIP64_EXTRA_ID {
            out.extend_from_slice(&extra[consumed..consumed + 4 + data.len()]);
        }
        consumed += 4 + data.len();
    }
    // Trailing bytes that do not form a block are kept as-is
    out.extend_from_slice(&extra[consumed..]);
    out
}

/// Iterator over `(header_id, data)` blocks of an extra field
struct ExtraBlocks<'a>(&'a [u8]);

impl<'a> Iterator for ExtraBlocks<'a> {
    type Item = (u16, &'a [u8]);

    fn next(&mut self) -> Option<Self::Item> {
        if self.0.len() < 4 {
            return None;
        }
        let id = u16::from_le_bytes([self.0[0], self.0[1]]);
        let size = u16::from_le_bytes([self.0[2], self.0[3]]) as usize;
        if self.0.len() < 4 + size {
            return None;
        }
        let data = &self.0[4..4 + size];
        self.0 = &self.0[4 + size..];
        Some((id, data))
    }
}
