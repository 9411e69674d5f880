//! In-place archive optimization.
//!
//! [`ArchiveOptimizer`] transcodes an archive on disk into a temporary
//! file and copies the result over the original only when it is smaller.

use std::fs::{File, OpenOptions};
use std::io::{self, BufWriter, Seek, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::compress::DeflateCompressor;
use crate::config::{CompressorConfig, TranscodePolicy};
use crate::io::{BufferPool, LocalFileReader, ReadAt};
use crate::transcode::{ArchiveTranscoder, NestedArchiveReencoder};
use crate::zip::{LFH_SIGNATURE, ZipParser};
use crate::{Error, Result};

/// What happened to one archive
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Not a ZIP archive, or one without entries
    Skipped,
    /// The original was replaced by a smaller transcoded copy
    Reduced { original_size: u64, gain: u64 },
    /// The transcoded copy was not smaller; the original is untouched
    NotReduced {
        original_size: u64,
        transcoded_size: u64,
    },
}

impl Outcome {
    /// Fraction of the original size saved, for reduced archives
    pub fn reduction_ratio(&self) -> Option<f64> {
        match *self {
            Outcome::Reduced {
                original_size,
                gain,
            } if original_size > 0 => Some(gain as f64 / original_size as f64),
            _ => None,
        }
    }
}

/// Bytes saved by replacing `original` with `transcoded`, if any
pub fn gain_of(original: u64, transcoded: u64) -> Option<u64> {
    original.checked_sub(transcoded).filter(|gain| *gain > 0)
}

/// Whether `source` carries ZIP framing at all.
///
/// True when it starts with a local file header or an end of central
/// directory record can be found. A damaged archive still passes, so
/// its damage is reported as an error instead of being skipped over.
pub fn is_zip_archive<R: ReadAt>(source: &ZipParser<R>) -> bool {
    let mut sig = [0u8; 4];
    let starts_with_header = source.reader().read_exact_at(0, &mut sig).is_ok()
        && sig == LFH_SIGNATURE;
    starts_with_header || source.find_eocd().is_ok()
}

/// Replaces archives on disk with smaller transcoded copies
pub struct ArchiveOptimizer {
    transcoder: ArchiveTranscoder<DeflateCompressor>,
    temp_dir: Option<PathBuf>,
}

impl ArchiveOptimizer {
    pub fn new(policy: TranscodePolicy, config: CompressorConfig) -> Result<Self> {
        Ok(Self {
            transcoder: ArchiveTranscoder::new(policy, DeflateCompressor::new(config)?),
            temp_dir: None,
        })
    }

    pub fn with_pool(mut self, pool: Arc<BufferPool>) -> Self {
        self.transcoder = self.transcoder.with_pool(pool);
        self
    }

    pub fn with_nested_reencoder(mut self, nested: NestedArchiveReencoder) -> Self {
        self.transcoder = self.transcoder.with_nested_reencoder(nested);
        self
    }

    /// Directory for temporary output, instead of the archive's own directory
    pub fn with_temp_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.temp_dir = Some(dir.into());
        self
    }

    /// Transcode the archive at `path` and keep the result if it is smaller.
    ///
    /// The original is overwritten in place by copying, so its inode,
    /// permissions and hard links survive.
    pub fn optimize(&self, path: &Path) -> Result<Outcome> {
        let reader = LocalFileReader::new(path).map_err(|e| {
            Error::source_io(format!("cannot open '{}'", path.display()), e)
        })?;
        let parser = ZipParser::new(Arc::new(reader));
        let original_size = parser.reader().size();

        if !is_zip_archive(&parser) {
            warn!(path = %path.display(), "not a ZIP archive, skipping");
            return Ok(Outcome::Skipped);
        }
        if parser.list_files()?.is_empty() {
            warn!(path = %path.display(), "archive has no entries, skipping");
            return Ok(Outcome::Skipped);
        }

        let mut temp = self.temp_file(path)?;
        debug!(path = %path.display(), temp = %temp.path().display(), "transcoding");
        {
            let mut output = BufWriter::new(temp.as_file_mut());
            let summary = self.transcoder.transcode(&parser, &mut output)?;
            output.flush().map_err(Error::SinkWrite)?;
            debug!(path = %path.display(), ?summary, "transcoded");
        }
        // Release the source before it gets overwritten
        drop(parser);

        let transcoded_size = temp.as_file().metadata()?.len();
        let Some(gain) = gain_of(original_size, transcoded_size) else {
            info!(
                path = %path.display(),
                original_size,
                transcoded_size,
                "not reduced, keeping original"
            );
            return Ok(Outcome::NotReduced {
                original_size,
                transcoded_size,
            });
        };

        let source = temp.as_file_mut();
        source.rewind()?;
        overwrite(path, source)?;

        let outcome = Outcome::Reduced {
            original_size,
            gain,
        };
        info!(
            path = %path.display(),
            original_size,
            gain,
            ratio = outcome.reduction_ratio().unwrap_or_default(),
            "reduced"
        );
        Ok(outcome)
    }

    fn temp_file(&self, path: &Path) -> Result<tempfile::NamedTempFile> {
        let dir = match &self.temp_dir {
            Some(dir) => dir.as_path(),
            None => match path.parent() {
                Some(parent) if !parent.as_os_str().is_empty() => parent,
                _ => Path::new("."),
            },
        };
        Ok(tempfile::Builder::new()
            .prefix(".rezip")
            .suffix(".tmp")
            .tempfile_in(dir)?)
    }
}

fn overwrite(path: &Path, mut from: &File) -> io::Result<()> {
    let mut target = OpenOptions::new().write(true).truncate(true).open(path)?;
    io::copy(&mut from, &mut target)?;
    target.flush()
}
