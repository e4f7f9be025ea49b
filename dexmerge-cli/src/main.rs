//! Dexmerge CLI - merge two dex files into one
//!
//! ## Usage
//!
//! ```bash
//! # Merge classes2.dex into classes.dex, writing merged.dex
//! dexmerge merged.dex classes.dex classes2.dex
//!
//! # Same, with per-stage logging
//! dexmerge -v merged.dex classes.dex classes2.dex
//! ```
//!
//! When both inputs define a class, the definition from the first input is
//! kept.

use anyhow::{Context, Result};
use clap::Parser;
use dexmerge_core::{DexMerger, MergeStats};
use std::path::PathBuf;
use std::time::{Duration, Instant};

#[derive(Parser, Debug)]
#[command(name = "dexmerge")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Merge two dex files into one", long_about = None)]
struct Cli {
    /// Log merge stages at debug level; only affects logging, not the output
    #[arg(short, long)]
    verbose: bool,

    /// Output dex file
    output: PathBuf,

    /// First input; wins when both inputs define a class
    input_a: PathBuf,

    /// Second input
    input_b: PathBuf,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let default_filter = if cli.verbose { "debug" } else { "warn" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter))
        .init();

    let start = Instant::now();
    let stats = DexMerger::with_defaults()
        .merge_files(&cli.output, &cli.input_a, &cli.input_b)
        .with_context(|| {
            format!(
                "Failed to merge {} and {} into {}",
                cli.input_a.display(),
                cli.input_b.display(),
                cli.output.display()
            )
        })?;
    let elapsed = start.elapsed();

    print_summary(&cli, &stats, elapsed);
    Ok(())
}

fn print_summary(cli: &Cli, stats: &MergeStats, elapsed: Duration) {
    println!("Output: {} ({} bytes)", cli.output.display(), stats.output_size);
    println!("  Classes: {}", stats.classes);
    println!("  Methods: {}", stats.methods);
    println!("  Strings: {}", stats.strings);
    println!("  Time: {:?}", elapsed);
}
