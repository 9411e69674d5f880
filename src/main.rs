//! Main entry point for the rezip CLI application.
//!
//! Each archive named on the command line is transcoded on the blocking
//! thread pool and replaced in place when the result is smaller.

use anyhow::{Context, Result, bail};
use clap::Parser;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{Level, error, info};
use tracing_subscriber::EnvFilter;

use rezip::{ArchiveOptimizer, BufferPool, Cli, Outcome};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(&cli);

    if cli.skip {
        info!("skipping archive optimization");
        return Ok(());
    }

    let optimizer = ArchiveOptimizer::new(cli.policy(), cli.compressor_config())
        .context("invalid compressor settings")?
        .with_pool(Arc::new(BufferPool::new()));
    let optimizer = Arc::new(match &cli.temp_dir {
        Some(dir) => optimizer.with_temp_dir(dir),
        None => optimizer,
    });

    let report = run_batch(optimizer, cli.files.clone(), cli.jobs(), cli.is_quiet()).await?;
    if !cli.is_quiet() {
        report.print();
    }

    if report.failed > 0 {
        bail!("{} of {} archives failed", report.failed, cli.files.len());
    }
    Ok(())
}

/// Verbosity maps onto a level directive; `RUST_LOG` can add more.
fn init_tracing(cli: &Cli) {
    let level = if cli.quiet {
        Level::WARN
    } else {
        match cli.verbose {
            0 => Level::INFO,
            1 => Level::DEBUG,
            _ => Level::TRACE,
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(level.into()))
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

#[derive(Debug, Default)]
struct BatchReport {
    reduced: usize,
    not_reduced: usize,
    skipped: usize,
    failed: usize,
    total_original: u64,
    total_saved: u64,
}

impl BatchReport {
    fn record(&mut self, outcome: &Outcome) {
        match *outcome {
            Outcome::Skipped => self.skipped += 1,
            Outcome::Reduced {
                original_size,
                gain,
            } => {
                self.reduced += 1;
                self.total_original += original_size;
                self.total_saved += gain;
            }
            Outcome::NotReduced { original_size, .. } => {
                self.not_reduced += 1;
                self.total_original += original_size;
            }
        }
    }

    fn print(&self) {
        eprintln!(
            "\n{} reduced, {} not reduced, {} skipped, {} failed",
            self.reduced, self.not_reduced, self.skipped, self.failed
        );
        eprintln!(
            "Total saved: {} of {}",
            format_size(self.total_saved),
            format_size(self.total_original)
        );
    }
}

fn print_outcome(path: &Path, outcome: &Outcome) {
    match *outcome {
        Outcome::Skipped => println!("{}: skipped, not a ZIP archive or empty", path.display()),
        Outcome::Reduced {
            original_size,
            gain,
        } => println!(
            "{}: {} -> {} (-{:.1}%)",
            path.display(),
            format_size(original_size),
            format_size(original_size - gain),
            outcome.reduction_ratio().unwrap_or_default() * 100.0
        ),
        Outcome::NotReduced { original_size, .. } => println!(
            "{}: not reduced ({})",
            path.display(),
            format_size(original_size)
        ),
    }
}

/// Optimize every archive, at most `jobs` at a time.
///
/// A failing archive is logged and counted; the rest of the batch still runs.
async fn run_batch(
    optimizer: Arc<ArchiveOptimizer>,
    files: Vec<PathBuf>,
    jobs: usize,
    quiet: bool,
) -> Result<BatchReport> {
    let semaphore = Arc::new(Semaphore::new(jobs));
    let mut tasks = JoinSet::new();

    for path in files {
        let permit = Arc::clone(&semaphore).acquire_owned().await?;
        let optimizer = Arc::clone(&optimizer);
        tasks.spawn_blocking(move || {
            let _permit = permit;
            let outcome = optimizer.optimize(&path);
            (path, outcome)
        });
    }

    let mut report = BatchReport::default();
    while let Some(joined) = tasks.join_next().await {
        let (path, outcome) = joined.context("archive worker panicked")?;
        match outcome {
            Ok(outcome) => {
                report.record(&outcome);
                if !quiet {
                    print_outcome(&path, &outcome);
                }
            }
            Err(e) => {
                let e = anyhow::Error::new(e);
                error!(path = %path.display(), "{e:#}");
                report.failed += 1;
            }
        }
    }

    Ok(report)
}

/// Format a byte size into a human-readable string.
///
/// Converts bytes to the most appropriate unit (bytes, KB, MB, GB)
/// with two decimal places for readability.
fn format_size(size: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if size >= GB {
        format!("{:.2} GB", size as f64 / GB as f64)
    } else if size >= MB {
        format!("{:.2} MB", size as f64 / MB as f64)
    } else if size >= KB {
        format!("{:.2} KB", size as f64 / KB as f64)
    } else {
        format!("{} bytes", size)
    }
}
