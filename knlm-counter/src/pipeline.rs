//! Memory-bounded counting pipeline: accumulate, sort, spill.
//!
//! One pipeline owns one accumulator. Pushed n-grams are interned and
//! counted until the accumulator reaches its capacity watermark (or a probe
//! cycle exhausts), at which point the full accumulator is handed to a
//! background thread for sort + spill while counting continues in a fresh
//! one. At most one background flush is in flight per pipeline; drivers that
//! want more overlap run one pipeline per worker, each with its own spill
//! files.

use crate::accumulator::NgramAccumulator;
use crate::config::CounterConfig;
use crate::error::{CounterError, Result};
use crate::spill::{SpillFileInfo, SpillWriter};
use crate::vocab::ngram_hint;
use knlm_core::WordId;
use std::time::Instant;

/// Result of a finished counting pipeline.
#[derive(Debug)]
pub struct CountResult {
    /// Spill files in flush order, each a sorted run.
    pub spills: Vec<SpillFileInfo>,
    /// N-gram occurrences pushed (including repeats).
    pub total_ngrams: u64,
}

impl CountResult {
    /// Distinct n-grams summed across spill files. An n-gram present in
    /// several spills is counted once per spill; the merge phase collapses
    /// them.
    pub fn spilled_records(&self) -> u64 {
        self.spills.iter().map(|s| s.records).sum()
    }
}

/// Accumulate n-gram counts under a RAM budget, spilling sorted runs.
pub struct CountingPipeline {
    config: CounterConfig,
    capacity: usize,
    acc: NgramAccumulator,
    spill_count: u32,
    total_ngrams: u64,
    spills: Vec<SpillFileInfo>,
    pending_flush: Option<std::thread::JoinHandle<Result<SpillFileInfo>>>,
}

impl CountingPipeline {
    /// Create a pipeline and its spill directory.
    pub fn new(config: CounterConfig) -> Result<Self> {
        std::fs::create_dir_all(&config.tmp_dir)?;
        let capacity = config.accumulator_capacity();
        tracing::info!(
            order = config.order,
            ram_bytes = config.ram_bytes,
            capacity,
            sort_order = config.sort_order.name(),
            tmp_dir = %config.tmp_dir.display(),
            "counting pipeline initialized"
        );
        let acc = NgramAccumulator::new(config.order, capacity);
        Ok(Self {
            config,
            capacity,
            acc,
            spill_count: 0,
            total_ngrams: 0,
            spills: Vec::new(),
            pending_flush: None,
        })
    }

    /// Count one n-gram occurrence. Flushes to disk at the capacity
    /// watermark.
    pub fn push(&mut self, ngram: &[WordId]) -> Result<()> {
        debug_assert_eq!(ngram.len(), self.config.order);
        self.total_ngrams += 1;
        let hint = ngram_hint(ngram);

        match self.acc.find_or_insert(ngram, hint) {
            Ok((id, true)) => {
                self.acc.increment(id);
                Ok(())
            }
            Ok((_, false)) => {
                if self.acc.len() >= self.capacity {
                    self.flush()?;
                }
                Ok(())
            }
            Err(CounterError::ProbeExhausted { .. }) => {
                // The table filled before the watermark tripped. Flush and
                // land the occurrence in the fresh accumulator.
                self.flush()?;
                let (_, existed) = self.acc.find_or_insert(ngram, hint)?;
                debug_assert!(!existed);
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    /// Flush any remaining entries and return the spill set.
    pub fn finish(mut self) -> Result<CountResult> {
        self.flush()?;
        self.join_pending_flush()?;
        tracing::info!(
            spills = self.spills.len(),
            total_ngrams = self.total_ngrams,
            "counting pipeline finished"
        );
        Ok(CountResult {
            spills: self.spills,
            total_ngrams: self.total_ngrams,
        })
    }

    /// Entries currently buffered in memory.
    pub fn buffered_len(&self) -> usize {
        self.acc.len()
    }

    /// Spill files started so far.
    pub fn spill_count(&self) -> u32 {
        self.spill_count
    }

    /// Occurrences pushed so far.
    pub fn total_ngrams(&self) -> u64 {
        self.total_ngrams
    }

    /// Hand the current accumulator to a background sort + spill thread.
    fn flush(&mut self) -> Result<()> {
        if self.acc.is_empty() {
            return Ok(());
        }
        self.join_pending_flush()?;

        let spill_index = self.spill_count;
        self.spill_count += 1;
        let path = self
            .config
            .tmp_dir
            .join(format!("spill_{:05}.knb", spill_index));

        let mut full = std::mem::replace(
            &mut self.acc,
            NgramAccumulator::new(self.config.order, self.capacity),
        );
        let order = self.config.order;
        let sort_order = self.config.sort_order;
        let strategy = self.config.strategy;
        let threads = self.config.threads;
        let block_bytes = self.config.block_bytes;
        let compress = self.config.compress_blocks;

        self.pending_flush = Some(
            std::thread::Builder::new()
                .name(format!("spill-{:05}", spill_index))
                .spawn(move || {
                    // The bucket table is dead weight from here on; drop it
                    // before the sort scratch gets allocated.
                    full.release_hash_index();

                    let sort_start = Instant::now();
                    full.sort(sort_order, strategy, threads);
                    let sort_elapsed = sort_start.elapsed();

                    let stats = full.stats();
                    let write_start = Instant::now();
                    let writer =
                        SpillWriter::create(&path, order, sort_order, block_bytes, compress)?;
                    let info = writer.write_run(full.sorted(), &stats)?;
                    let write_elapsed = write_start.elapsed();

                    tracing::info!(
                        spill = spill_index,
                        records = info.records,
                        blocks = info.blocks,
                        sort_ms = sort_elapsed.as_millis(),
                        write_ms = write_elapsed.as_millis(),
                        path = %info.path.display(),
                        "spill flushed (background)"
                    );
                    Ok(info)
                })
                .map_err(CounterError::Io)?,
        );
        Ok(())
    }

    /// Wait for an in-flight background flush and collect its result.
    fn join_pending_flush(&mut self) -> Result<()> {
        if let Some(handle) = self.pending_flush.take() {
            let info = handle.join().expect("spill thread panicked")?;
            self.spills.push(info);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use knlm_core::SortOrder;

    fn test_config(dir: &std::path::Path, ram: usize) -> CounterConfig {
        CounterConfig::new(3, dir)
            .with_ram_bytes(ram)
            .with_sort_order(SortOrder::Prefix)
            .with_block_bytes(256)
    }

    #[test]
    fn test_single_spill() {
        let dir = tempfile::tempdir().unwrap();
        let mut pipeline =
            CountingPipeline::new(test_config(dir.path(), 1024 * 1024)).unwrap();

        pipeline.push(&[1, 2, 3]).unwrap();
        pipeline.push(&[1, 2, 4]).unwrap();
        pipeline.push(&[1, 2, 3]).unwrap();

        let result = pipeline.finish().unwrap();
        assert_eq!(result.total_ngrams, 3);
        assert_eq!(result.spills.len(), 1);
        assert_eq!(result.spills[0].records, 2);
        assert_eq!(result.spills[0].stats.max_count, 2);
    }

    #[test]
    fn test_watermark_produces_multiple_spills() {
        let dir = tempfile::tempdir().unwrap();
        // MIN_CAPACITY entries per accumulator.
        let mut pipeline = CountingPipeline::new(test_config(dir.path(), 16)).unwrap();
        let capacity = pipeline.capacity;

        let total = capacity * 2 + capacity / 2;
        for i in 0..total as u32 {
            pipeline.push(&[i, i, i]).unwrap();
        }

        let result = pipeline.finish().unwrap();
        assert_eq!(result.spills.len(), 3);
        assert_eq!(result.spilled_records(), total as u64);

        // Every spill file exists and is block-aligned.
        for spill in &result.spills {
            let len = std::fs::metadata(&spill.path).unwrap().len();
            assert_eq!(len, spill.blocks * 256);
        }
    }

    #[test]
    fn test_empty_pipeline() {
        let dir = tempfile::tempdir().unwrap();
        let pipeline = CountingPipeline::new(test_config(dir.path(), 1024)).unwrap();
        let result = pipeline.finish().unwrap();
        assert_eq!(result.total_ngrams, 0);
        assert!(result.spills.is_empty());
    }
}
