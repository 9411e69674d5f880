use std::io::{self, Read};

use super::ReadAt;

/// Sequential [`Read`] view over a byte range of a [`ReadAt`] source.
///
/// Used to expose one entry's compressed payload to a decoder without
/// touching the rest of the archive.
pub struct SectionReader<'a, R: ReadAt + ?Sized> {
    reader: &'a R,
    offset: u64,
    remaining: u64,
}

impl<'a, R: ReadAt + ?Sized> SectionReader<'a, R> {
    pub fn new(reader: &'a R, offset: u64, len: u64) -> Self {
        Self {
            reader,
            offset,
            remaining: len,
        }
    }
}

impl<R: ReadAt + ?Sized> Read for SectionReader<'_, R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.remaining == 0 || buf.is_empty() {
            return Ok(0);
        }
        let want = buf.len().min(usize::try_from(self.remaining).unwrap_or(usize::MAX));
        let n = self.reader.read_at(self.offset, &mut buf[..want])?;
        if n == 0 {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "entry data is truncated",
            ));
        }
        self.offset += n as u64;
        self.remaining -= n as u64;
        Ok(n)
    }
}
