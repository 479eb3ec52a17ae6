//! Front-coded block writer.

use super::bits::BitWriter;
use super::{lcp_bits, max_record_bits, BlockHeader, BLOCK_BYTES, BLOCK_HEADER_LEN};
use crate::error::{CounterError, Result};
use knlm_core::{Count, RunStats, SortOrder, WordId};
use std::cmp::Ordering;
use std::io::Write;

/// Summary of one written run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunWriteInfo {
    /// Records encoded across all blocks.
    pub records: u64,
    /// Blocks emitted. Every block occupies exactly `block_bytes` on disk.
    pub blocks: u64,
}

/// Streaming encoder for one sorted run.
///
/// Records are pushed one at a time; completed `block_bytes`-sized blocks
/// are handed to the sink as they fill. The staging buffer is exactly one
/// block and is reused across blocks. Before each record the encoder checks
/// whether the block still has room for a worst-case record (`ℓ + N·w + v`
/// bits); if not it pads the block out, emits it, and re-opens with the
/// record written explicitly. [`finish`](Self::finish) pads the final block
/// to the full block size as well, so a run's output length is always
/// `blocks × block_bytes`.
pub struct RunEncoder<F: FnMut(&[u8]) -> Result<()>> {
    order: usize,
    sort_order: SortOrder,
    sink: F,
    word_bits: u8,
    count_bits: u8,
    lcp_bits: u8,
    payload_bits: usize,
    max_bits: usize,
    buffer: BitWriter,
    block_buf: Vec<u8>,
    prev: Vec<WordId>,
    records_in_block: u64,
    records: u64,
    blocks: u64,
}

impl<F: FnMut(&[u8]) -> Result<()>> RunEncoder<F> {
    /// Start a run whose word ids and counts are bounded by `stats`.
    pub fn new(
        order: usize,
        sort_order: SortOrder,
        block_bytes: usize,
        stats: &RunStats,
        sink: F,
    ) -> Result<Self> {
        assert!(block_bytes > BLOCK_HEADER_LEN);
        let word_bits = stats.word_bits();
        let count_bits = stats.count_bits();
        let payload_bits = (block_bytes - BLOCK_HEADER_LEN) * 8;
        let max_bits = max_record_bits(order, word_bits, count_bits);
        if max_bits > payload_bits {
            return Err(CounterError::MalformedBlock(format!(
                "record needs up to {} bits but a block payload holds {}",
                max_bits, payload_bits
            )));
        }
        Ok(Self {
            order,
            sort_order,
            sink,
            word_bits,
            count_bits,
            lcp_bits: lcp_bits(order),
            payload_bits,
            max_bits,
            buffer: BitWriter::with_capacity_bits(payload_bits),
            block_buf: vec![0u8; block_bytes],
            prev: vec![0; order],
            records_in_block: 0,
            records: 0,
            blocks: 0,
        })
    }

    /// Append one record. The run must be strictly ascending under the
    /// encoder's sort order.
    pub fn push(&mut self, gram: &[WordId], count: Count) -> Result<()> {
        debug_assert_eq!(gram.len(), self.order);
        self.records += 1;

        if self.records_in_block == 0 {
            // First record of the run: explicit, no lcp.
            self.encode_explicit(gram, count);
            self.prev.copy_from_slice(gram);
            self.records_in_block = 1;
            return Ok(());
        }

        if self.payload_bits - self.buffer.len_bits() < self.max_bits {
            // Worst-case record no longer fits: pad this block out and
            // start a new one with an explicit first record.
            self.emit_block()?;
            self.encode_explicit(gram, count);
            self.prev.copy_from_slice(gram);
            self.records_in_block = 1;
            return Ok(());
        }

        match self.sort_order.compare(&self.prev, gram) {
            Ordering::Less => {}
            Ordering::Equal => {
                return Err(CounterError::InvariantViolation(format!(
                    "equal adjacent n-grams at record {}",
                    self.records
                )))
            }
            Ordering::Greater => {
                return Err(CounterError::InvariantViolation(format!(
                    "run not in {} order at record {}",
                    self.sort_order.name(),
                    self.records
                )))
            }
        }

        let lcp = self.sort_order.lcp(&self.prev, gram);
        self.buffer.append_bits(lcp as u64, self.lcp_bits);
        if lcp == 0 {
            self.encode_explicit(gram, count);
        } else {
            for i in self.sort_order.tail(self.order, lcp) {
                self.buffer.append_bits(gram[i] as u64, self.word_bits);
            }
            self.buffer.append_bits(count, self.count_bits);
        }

        self.prev.copy_from_slice(gram);
        self.records_in_block += 1;
        Ok(())
    }

    /// Pad and emit the trailing block, returning the run summary. An empty
    /// run emits nothing.
    pub fn finish(mut self) -> Result<RunWriteInfo> {
        if self.records_in_block > 0 {
            self.emit_block()?;
        }
        Ok(RunWriteInfo {
            records: self.records,
            blocks: self.blocks,
        })
    }

    /// All N components in index order, then the count. No lcp field.
    fn encode_explicit(&mut self, gram: &[WordId], count: Count) {
        for &w in gram {
            self.buffer.append_bits(w as u64, self.word_bits);
        }
        self.buffer.append_bits(count, self.count_bits);
    }

    fn emit_block(&mut self) -> Result<()> {
        let header = BlockHeader {
            word_bits: self.word_bits,
            count_bits: self.count_bits,
            records: self.records_in_block,
        };
        header.write_to(&mut self.block_buf[..BLOCK_HEADER_LEN]);
        self.buffer
            .copy_padded(&mut self.block_buf[BLOCK_HEADER_LEN..]);
        self.buffer.clear();
        self.records_in_block = 0;
        self.blocks += 1;
        (self.sink)(&self.block_buf)
    }
}

/// Whole-run convenience front end over [`RunEncoder`].
pub struct BlockWriter {
    order: usize,
    sort_order: SortOrder,
    block_bytes: usize,
}

impl BlockWriter {
    /// Writer for `order`-gram runs sorted by `sort_order`, with the default
    /// 64 MiB block size.
    pub fn new(order: usize, sort_order: SortOrder) -> Self {
        Self::with_block_bytes(order, sort_order, BLOCK_BYTES)
    }

    /// Writer with an explicit block size (tests use small blocks).
    pub fn with_block_bytes(order: usize, sort_order: SortOrder, block_bytes: usize) -> Self {
        assert!(block_bytes > BLOCK_HEADER_LEN);
        Self {
            order,
            sort_order,
            block_bytes,
        }
    }

    /// Block size this writer emits.
    pub fn block_bytes(&self) -> usize {
        self.block_bytes
    }

    /// Encode `run` and append its blocks to `out`. An empty run writes
    /// nothing.
    pub fn write_run<'a, W, I>(
        &self,
        out: &mut W,
        run: I,
        stats: &RunStats,
    ) -> Result<RunWriteInfo>
    where
        W: Write,
        I: IntoIterator<Item = (&'a [WordId], Count)>,
    {
        self.write_run_with(run, stats, |block| {
            out.write_all(block)?;
            Ok(())
        })
    }

    /// Like [`write_run`](Self::write_run), but hands each completed
    /// `block_bytes`-sized block to `emit`, the seam spill compression
    /// plugs into.
    pub fn write_run_with<'a, I, F>(&self, run: I, stats: &RunStats, emit: F) -> Result<RunWriteInfo>
    where
        I: IntoIterator<Item = (&'a [WordId], Count)>,
        F: FnMut(&[u8]) -> Result<()>,
    {
        let mut encoder =
            RunEncoder::new(self.order, self.sort_order, self.block_bytes, stats, emit)?;
        for (gram, count) in run {
            encoder.push(gram, count)?;
        }
        encoder.finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stats_for(entries: &[(&[WordId], Count)]) -> RunStats {
        let mut stats = RunStats::default();
        for (gram, count) in entries {
            stats.observe(gram, *count);
        }
        stats
    }

    #[test]
    fn test_empty_run_writes_nothing() {
        let writer = BlockWriter::with_block_bytes(3, SortOrder::Prefix, 64);
        let mut out = Vec::new();
        let info = writer
            .write_run(&mut out, std::iter::empty(), &RunStats::default())
            .unwrap();
        assert_eq!(info.records, 0);
        assert_eq!(info.blocks, 0);
        assert!(out.is_empty());
    }

    #[test]
    fn test_single_block_is_exactly_block_bytes() {
        let entries: Vec<(&[WordId], Count)> =
            vec![(&[1, 2, 3], 2), (&[1, 2, 4], 1), (&[5, 6, 7], 1)];
        let stats = stats_for(&entries);

        let writer = BlockWriter::with_block_bytes(3, SortOrder::Prefix, 128);
        let mut out = Vec::new();
        let info = writer.write_run(&mut out, entries, &stats).unwrap();

        assert_eq!(info.records, 3);
        assert_eq!(info.blocks, 1);
        assert_eq!(out.len(), 128);
    }

    #[test]
    fn test_block_spill_keeps_every_block_full_size() {
        // Entries sized so a 32-byte block holds only a handful of records.
        let entries: Vec<(Vec<WordId>, Count)> =
            (0..60u32).map(|i| (vec![i, 0], 1 as Count)).collect();
        let stats = {
            let mut s = RunStats::default();
            for (g, c) in &entries {
                s.observe(g, *c);
            }
            s
        };

        let writer = BlockWriter::with_block_bytes(2, SortOrder::Prefix, 32);
        let mut out = Vec::new();
        let info = writer
            .write_run(
                &mut out,
                entries.iter().map(|(g, c)| (g.as_slice(), *c)),
                &stats,
            )
            .unwrap();

        assert!(info.blocks > 1);
        assert_eq!(out.len(), info.blocks as usize * 32);
    }

    #[test]
    fn test_unsorted_run_is_rejected() {
        let entries: Vec<(&[WordId], Count)> = vec![(&[5, 6, 7], 1), (&[1, 2, 3], 1)];
        let stats = stats_for(&entries);

        let writer = BlockWriter::with_block_bytes(3, SortOrder::Prefix, 128);
        let err = writer
            .write_run(&mut Vec::new(), entries, &stats)
            .unwrap_err();
        assert!(matches!(err, CounterError::InvariantViolation(_)));
    }

    #[test]
    fn test_duplicate_records_are_rejected() {
        let entries: Vec<(&[WordId], Count)> = vec![(&[1, 2, 3], 1), (&[1, 2, 3], 1)];
        let stats = stats_for(&entries);

        let writer = BlockWriter::with_block_bytes(3, SortOrder::Prefix, 128);
        let err = writer
            .write_run(&mut Vec::new(), entries, &stats)
            .unwrap_err();
        assert!(matches!(err, CounterError::InvariantViolation(_)));
    }

    #[test]
    fn test_oversized_widths_are_rejected() {
        let entries: Vec<(&[WordId], Count)> = vec![(&[u32::MAX; 8], u64::MAX)];
        let stats = stats_for(&entries);

        // 8 × 32 + 64 + 4 bits cannot fit a 16-byte block.
        let writer = BlockWriter::with_block_bytes(8, SortOrder::Prefix, 16);
        let err = writer
            .write_run(&mut Vec::new(), entries, &stats)
            .unwrap_err();
        assert!(matches!(err, CounterError::MalformedBlock(_)));
    }
}
