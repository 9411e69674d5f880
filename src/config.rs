//! Transcoding policy and compressor settings.

use crate::{Error, Result};

/// Which per-entry and per-archive metadata survives a transcode
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TranscodePolicy {
    /// Emit directory entries (names ending in `/`)
    pub keep_directories: bool,
    /// Copy entry extra fields
    pub keep_extra_fields: bool,
    /// Copy entry comments
    pub keep_comment: bool,
    /// Compress nested archives as opaque blobs instead of re-packing them stored
    pub keep_nested_archives: bool,
}

impl TranscodePolicy {
    /// Policy that preserves everything the transcoder can preserve
    pub fn keep_all() -> Self {
        Self {
            keep_directories: true,
            keep_extra_fields: true,
            keep_comment: true,
            keep_nested_archives: true,
        }
    }
}

/// Deflate block strategy
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum Strategy {
    /// No compression, stored deflate blocks only
    Store,
    /// Favour speed over ratio (the fastest deflate level)
    FixedTree,
    /// Dynamic Huffman trees
    #[default]
    DynamicTree,
}

/// Largest deflate window
pub const MAX_WINDOW_SIZE: u32 = 32768;

/// Settings handed to the entry compressor.
///
/// The transcoder never looks inside; it only forwards the value to the
/// [`Compressor`](crate::compress::Compressor) it was built with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompressorConfig {
    /// Optimization passes per block (at least 1)
    pub iterations: u32,
    /// Split the data into several deflate blocks
    pub block_splitting: bool,
    /// Choose split points after LZ77 instead of before
    pub block_splitting_last: bool,
    /// Maximum number of blocks, 0 for unlimited
    pub block_splitting_max: u32,
    pub strategy: Strategy,
    /// Input is processed in independent segments of this many bytes, 0 disables segmenting
    pub master_block_size: u64,
    /// Deflate window, a power of two no larger than 32768
    pub window_size: u32,
}

impl Default for CompressorConfig {
    fn default() -> Self {
        Self {
            iterations: 15,
            block_splitting: true,
            block_splitting_last: false,
            block_splitting_max: 15,
            strategy: Strategy::DynamicTree,
            master_block_size: 20_000_000,
            window_size: MAX_WINDOW_SIZE,
        }
    }
}

impl CompressorConfig {
    pub fn validate(&self) -> Result<()> {
        if self.iterations == 0 {
            return Err(Error::InvalidConfig(
                "iteration count must be at least 1".to_string(),
            ));
        }
        if !self.window_size.is_power_of_two() || self.window_size > MAX_WINDOW_SIZE {
            return Err(Error::InvalidConfig(format!(
                "window size {} is not a power of two no larger than {MAX_WINDOW_SIZE}",
                self.window_size
            )));
        }
        Ok(())
    }
}
