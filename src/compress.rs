//! Entry compressors.
//!
//! The ZIP writer streams each entry's bytes through an [`EntryEncoder`]
//! obtained from a [`Compressor`]; when the entry ends the encoder hands
//! the underlying sink back so the writer can append the data descriptor.

use flate2::Compression;
use flate2::write::DeflateEncoder;
use std::io::{self, Write};

use crate::Result;
use crate::config::{CompressorConfig, Strategy};
use crate::zip::CompressionMethod;

/// Source of per-entry encoders
pub trait Compressor {
    /// Method recorded in the entry headers
    fn method(&self) -> CompressionMethod;

    /// Wrap `sink` in an encoder for one entry
    fn encoder<'a, W: Write + 'a>(&self, sink: W) -> Box<dyn EntryEncoder<W> + 'a>;
}

/// Streaming encoder for a single entry
pub trait EntryEncoder<W>: Write {
    /// Flush the remaining compressed data and return the sink
    fn finish(self: Box<Self>) -> io::Result<W>;
}

/// Deflate compressor backed by `flate2`.
///
/// The strategy picks the level (`Store` → 0, `FixedTree` → fast,
/// `DynamicTree` → iteration count capped at 9). Every
/// `master_block_size` input bytes the stream gets a sync flush, which
/// ends the current block on a byte boundary; the window carries over,
/// so later segments still match against earlier ones. The
/// block-splitting knobs and the window size have no `flate2`
/// equivalent and are ignored.
#[derive(Debug, Clone, Default)]
pub struct DeflateCompressor {
    config: CompressorConfig,
}

impl DeflateCompressor {
    pub fn new(config: CompressorConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    fn level(&self) -> Compression {
        match self.config.strategy {
            Strategy::Store => Compression::none(),
            Strategy::FixedTree => Compression::fast(),
            Strategy::DynamicTree => Compression::new(self.config.iterations.clamp(1, 9)),
        }
    }
}

impl Compressor for DeflateCompressor {
    fn method(&self) -> CompressionMethod {
        CompressionMethod::Deflate
    }

    fn encoder<'a, W: Write + 'a>(&self, sink: W) -> Box<dyn EntryEncoder<W> + 'a> {
        Box::new(SegmentedDeflater {
            inner: DeflateEncoder::new(sink, self.level()),
            segment_size: self.config.master_block_size,
            segment_fill: 0,
        })
    }
}

struct SegmentedDeflater<W: Write> {
    inner: DeflateEncoder<W>,
    /// 0 disables segmenting
    segment_size: u64,
    segment_fill: u64,
}

impl<W: Write> Write for SegmentedDeflater<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.segment_size == 0 {
            return self.inner.write(buf);
        }

        let room = self.segment_size - self.segment_fill;
        let take = buf.len().min(usize::try_from(room).unwrap_or(usize::MAX));
        let n = self.inner.write(&buf[..take])?;
        self.segment_fill += n as u64;
        if self.segment_fill >= self.segment_size {
            self.inner.flush()?;
            self.segment_fill = 0;
        }
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

impl<W: Write> EntryEncoder<W> for SegmentedDeflater<W> {
    fn finish(self: Box<Self>) -> io::Result<W> {
        self.inner.finish()
    }
}
