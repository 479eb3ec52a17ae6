//! The counting run: corpus → spills → merged count blocks.

use crate::{Args, CliError};
use knlm_counter::{merge_spills, CounterConfig, CountingPipeline, Vocabulary};
use knlm_counter::vocab::{BOS, EOS};
use knlm_core::{SortOrder, WordId, MAX_ORDER};
use std::io::BufRead;
use std::time::Instant;

const GIB: f64 = (1024 * 1024 * 1024) as f64;

pub fn run(args: Args) -> Result<(), CliError> {
    if args.order < 3 || args.order > MAX_ORDER {
        return Err(CliError::InvalidArgs(format!(
            "order must be in [3, {}], got {}",
            MAX_ORDER, args.order
        )));
    }
    if !args.text.exists() {
        return Err(CliError::InvalidArgs(format!(
            "corpus file does not exist: {}",
            args.text.display()
        )));
    }
    let ram_bytes = (args.ram_gib * GIB) as usize;
    if ram_bytes == 0 {
        return Err(CliError::InvalidArgs("RAM budget must be > 0".into()));
    }

    let threads = if args.threads == 0 {
        std::thread::available_parallelism().map(|n| n.get()).unwrap_or(1)
    } else {
        args.threads
    };
    // The indirect sorter runs on rayon's global pool; size it to match.
    let _ = rayon::ThreadPoolBuilder::new()
        .num_threads(threads)
        .build_global();

    let corpus_bytes = std::fs::metadata(&args.text)?.len();
    tracing::info!(
        corpus = %args.text.display(),
        corpus_bytes,
        order = args.order,
        ram_bytes,
        threads,
        "estimating"
    );

    let config = CounterConfig::new(args.order, &args.tmp_dir)
        .with_ram_bytes(ram_bytes)
        .with_threads(threads)
        .with_sort_order(SortOrder::Context)
        .with_compress_blocks(args.compress_blocks);
    let block_bytes = config.block_bytes;
    let compress = config.compress_blocks;

    // ---- Count ----
    let count_start = Instant::now();
    let mut pipeline = CountingPipeline::new(config)?;
    let mut vocab = Vocabulary::new();
    let mut ids: Vec<WordId> = Vec::new();
    let mut sentences = 0u64;

    let reader = std::io::BufReader::new(std::fs::File::open(&args.text)?);
    for line in reader.lines() {
        let line = line?;
        ids.clear();
        ids.push(vocab.get_or_insert(BOS));
        for token in line.split_whitespace() {
            ids.push(vocab.get_or_insert(token));
        }
        ids.push(vocab.get_or_insert(EOS));
        sentences += 1;

        if ids.len() < args.order {
            continue;
        }
        for window in ids.windows(args.order) {
            pipeline.push(window)?;
        }
    }
    let result = pipeline.finish()?;
    tracing::info!(
        sentences,
        vocabulary = vocab.len(),
        total_ngrams = result.total_ngrams,
        spills = result.spills.len(),
        elapsed_s = count_start.elapsed().as_secs_f64(),
        "counting done"
    );

    // ---- Merge ----
    let merge_start = Instant::now();
    let info = merge_spills(
        &result.spills,
        args.order,
        SortOrder::Context,
        block_bytes,
        compress,
        &args.out,
    )?;
    for spill in &result.spills {
        std::fs::remove_file(&spill.path)?;
    }
    tracing::info!(
        distinct_ngrams = info.records,
        blocks = info.blocks,
        out = %args.out.display(),
        elapsed_s = merge_start.elapsed().as_secs_f64(),
        "merge done"
    );

    Ok(())
}
