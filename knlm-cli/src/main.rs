//! `knlm-estimate`: count corpus n-grams into merged sorted count blocks.
//!
//! Reads a text corpus (one sentence per line, whitespace tokens), counts
//! its order-N n-grams under a RAM budget, spills sorted runs to the
//! temporary directory, and merges the spills into a single context-ordered
//! block file. Probability estimation and index building consume that file
//! downstream.

mod estimate;

use clap::Parser;
use std::path::PathBuf;
use std::process::ExitCode;
use thiserror::Error;

#[derive(Parser, Debug)]
#[command(name = "knlm-estimate", version, about)]
struct Args {
    /// Input text corpus, one sentence per line.
    text: PathBuf,

    /// Language model order N, in [3, 8].
    #[arg(long, default_value_t = 5)]
    order: usize,

    /// RAM budget for counting, in GiB.
    #[arg(long = "ram", default_value_t = 0.25)]
    ram_gib: f64,

    /// Temporary directory for spill files.
    #[arg(long = "tmp", default_value = "knlm_tmp")]
    tmp_dir: PathBuf,

    /// Worker threads for sorting. 0 means all available cores.
    #[arg(long, default_value_t = 0)]
    threads: usize,

    /// Compress spill blocks with zstd.
    #[arg(long)]
    compress_blocks: bool,

    /// Output file for the merged counts.
    #[arg(long = "out", default_value = "counts.knb")]
    out: PathBuf,
}

#[derive(Error, Debug)]
enum CliError {
    #[error("{0}")]
    InvalidArgs(String),

    #[error(transparent)]
    Counter(#[from] knlm_counter::CounterError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

fn init_tracing() {
    // Progress reporting goes through `tracing`; default to `info` on
    // stderr so the tool narrates, and let RUST_LOG override.
    let filter =
        tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into());
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn main() -> ExitCode {
    let args = Args::parse();
    init_tracing();

    match estimate::run(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}
