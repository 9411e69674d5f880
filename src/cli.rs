use clap::Parser;
use std::num::NonZeroUsize;
use std::path::PathBuf;

use crate::config::{CompressorConfig, Strategy, TranscodePolicy};

#[derive(Parser, Debug)]
#[command(name = "rezip")]
#[command(version)]
#[command(about = "Recompress ZIP archives in place when the result is smaller", long_about = None)]
#[command(after_help = "Examples:\n  \
  rezip app.jar                     strip metadata and recompress app.jar\n  \
  rezip -j 4 dist/*.war             process several archives, four at a time\n  \
  rezip --keep-nested-archives a.ear   leave inner archives compressed")]
pub struct Cli {
    /// Archives to optimize
    #[arg(value_name = "FILE", required = true)]
    pub files: Vec<PathBuf>,

    /// Keep directory entries
    #[arg(long, env = "REZIP_KEEP_DIRECTORIES")]
    pub keep_directories: bool,

    /// Keep entry extra fields
    #[arg(long, env = "REZIP_KEEP_EXTRA")]
    pub keep_extra: bool,

    /// Keep entry comments
    #[arg(long, env = "REZIP_KEEP_COMMENT")]
    pub keep_comment: bool,

    /// Do not re-pack nested archives as stored before compressing them
    #[arg(long, env = "REZIP_KEEP_NESTED_ARCHIVES")]
    pub keep_nested_archives: bool,

    /// Optimization passes per block
    #[arg(long, value_name = "N", default_value_t = 15, env = "REZIP_ITERATIONS")]
    pub iterations: u32,

    /// Encode each segment as a single block
    #[arg(long, env = "REZIP_NO_BLOCK_SPLITTING")]
    pub no_block_splitting: bool,

    /// Choose block split points after LZ77
    #[arg(long, env = "REZIP_BLOCK_SPLITTING_LAST")]
    pub block_splitting_last: bool,

    /// Maximum number of blocks, 0 for unlimited
    #[arg(long, value_name = "N", default_value_t = 15, env = "REZIP_BLOCK_SPLITTING_MAX")]
    pub block_splitting_max: u32,

    /// Deflate block strategy
    #[arg(long, value_enum, default_value_t = Strategy::DynamicTree, env = "REZIP_STRATEGY")]
    pub strategy: Strategy,

    /// Bytes per independently compressed segment, 0 to disable
    #[arg(long, value_name = "BYTES", default_value_t = 20_000_000, env = "REZIP_MASTER_BLOCK_SIZE")]
    pub master_block_size: u64,

    /// Deflate window size
    #[arg(long, value_name = "BYTES", default_value_t = 32768, env = "REZIP_WINDOW_SIZE")]
    pub window_size: u32,

    /// Directory for temporary output (default: next to each archive)
    #[arg(long, value_name = "DIR", env = "REZIP_TEMP_DIR")]
    pub temp_dir: Option<PathBuf>,

    /// Number of archives processed at once (default: available parallelism)
    #[arg(short = 'j', long, value_name = "N", env = "REZIP_JOBS")]
    pub jobs: Option<NonZeroUsize>,

    /// Do nothing
    #[arg(long, env = "REZIP_SKIP")]
    pub skip: bool,

    /// More output (-vv => trace)
    #[arg(short = 'v', action = clap::ArgAction::Count, conflicts_with = "quiet")]
    pub verbose: u8,

    /// Warnings and errors only
    #[arg(short = 'q')]
    pub quiet: bool,
}

impl Cli {
    pub fn policy(&self) -> TranscodePolicy {
        TranscodePolicy {
            keep_directories: self.keep_directories,
            keep_extra_fields: self.keep_extra,
            keep_comment: self.keep_comment,
            keep_nested_archives: self.keep_nested_archives,
        }
    }

    pub fn compressor_config(&self) -> CompressorConfig {
        CompressorConfig {
            iterations: self.iterations,
            block_splitting: !self.no_block_splitting,
            block_splitting_last: self.block_splitting_last,
            block_splitting_max: self.block_splitting_max,
            strategy: self.strategy,
            master_block_size: self.master_block_size,
            window_size: self.window_size,
        }
    }

    pub fn jobs(&self) -> usize {
        self.jobs
            .or_else(|| std::thread::available_parallelism().ok())
            .map_or(1, NonZeroUsize::get)
    }

    pub fn is_quiet(&self) -> bool {
        self.quiet
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_library() {
        let cli = Cli::try_parse_from(["rezip", "a.zip"]).unwrap();
        assert_eq!(cli.policy(), TranscodePolicy::default());
        assert_eq!(cli.compressor_config(), CompressorConfig::default());
        assert!(cli.jobs() >= 1);
    }

    #[test]
    fn test_flags() {
        let cli = Cli::try_parse_from([
            "rezip",
            "--keep-directories",
            "--keep-nested-archives",
            "--strategy",
            "fixed-tree",
            "--no-block-splitting",
            "-j",
            "3",
            "a.jar",
            "b.war",
        ])
        .unwrap();
        assert_eq!(cli.files.len(), 2);
        assert!(cli.policy().keep_directories);
        assert!(!cli.policy().keep_comment);
        assert!(cli.policy().keep_nested_archives);
        let config = cli.compressor_config();
        assert_eq!(config.strategy, Strategy::FixedTree);
        assert!(!config.block_splitting);
        assert_eq!(cli.jobs(), 3);
    }

    #[test]
    fn test_requires_files() {
        assert!(Cli::try_parse_from(["rezip"]).is_err());
        assert!(Cli::try_parse_from(["rezip", "-j", "0", "a.zip"]).is_err());
    }
}
