//! Spill files: one append-only block file per flushed accumulator.
//!
//! A spill file is a concatenation of the fixed-size blocks described in
//! [`crate::block`]. With `compress_blocks` on, each block is zstd-packed
//! and framed by a `u32le` compressed length; otherwise blocks sit at fixed
//! `block_bytes` offsets. The stream-level parameters (order, sort order,
//! block size, compression) are not persisted; the driver keeps them out
//! of band and passes them back at open time.

use crate::block::{BlockCursor, BlockWriter};
use crate::error::{CounterError, Result};
use knlm_core::{Count, RunStats, SortOrder, WordId};
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

/// zstd level for spill blocks. Spills are write-once read-once; favour
/// speed.
const SPILL_ZSTD_LEVEL: i32 = 1;

/// Summary of one spill file.
#[derive(Debug, Clone)]
pub struct SpillFileInfo {
    pub path: PathBuf,
    pub records: u64,
    pub blocks: u64,
    /// Statistics of the run inside; the merge phase combines these.
    pub stats: RunStats,
}

/// Writes one sorted run to a spill file and closes it.
pub struct SpillWriter {
    path: PathBuf,
    file: BufWriter<File>,
    writer: BlockWriter,
    compress: bool,
}

impl SpillWriter {
    pub fn create(
        path: impl Into<PathBuf>,
        order: usize,
        sort_order: SortOrder,
        block_bytes: usize,
        compress: bool,
    ) -> Result<Self> {
        let path = path.into();
        let file = BufWriter::new(File::create(&path)?);
        Ok(Self {
            path,
            file,
            writer: BlockWriter::with_block_bytes(order, sort_order, block_bytes),
            compress,
        })
    }

    /// Write the whole run and finish the file.
    pub fn write_run<'a, I>(mut self, run: I, stats: &RunStats) -> Result<SpillFileInfo>
    where
        I: IntoIterator<Item = (&'a [WordId], Count)>,
    {
        let Self {
            writer,
            file,
            compress,
            ..
        } = &mut self;

        let info = if *compress {
            writer.write_run_with(run, stats, |block| {
                let packed = zstd::bulk::compress(block, SPILL_ZSTD_LEVEL)?;
                file.write_all(&(packed.len() as u32).to_le_bytes())?;
                file.write_all(&packed)?;
                Ok(())
            })?
        } else {
            writer.write_run(file, run, stats)?
        };
        self.file.flush()?;

        Ok(SpillFileInfo {
            path: self.path,
            records: info.records,
            blocks: info.blocks,
            stats: *stats,
        })
    }
}

/// Buffered, forward-only reader over a spill file's records.
///
/// Concatenates the block cursors of the file's blocks behind one
/// peek/advance surface. Block buffers are reused across blocks.
pub struct SpillReader {
    file: BufReader<File>,
    order: usize,
    sort_order: SortOrder,
    block_bytes: usize,
    compress: bool,
    cursor: Option<BlockCursor>,
    spare: Option<Vec<u8>>,
}

impl SpillReader {
    /// Open a spill file written with the same stream parameters.
    pub fn open(
        path: &Path,
        order: usize,
        sort_order: SortOrder,
        block_bytes: usize,
        compress: bool,
    ) -> Result<Self> {
        let file = BufReader::new(File::open(path)?);
        let mut reader = Self {
            file,
            order,
            sort_order,
            block_bytes,
            compress,
            cursor: None,
            spare: None,
        };
        reader.load_next_block()?;
        Ok(reader)
    }

    /// The record currently decoded, or `None` once the file is exhausted.
    ///
    /// The slice aliases the current block's scratch buffer and is
    /// invalidated by [`advance`](Self::advance).
    #[inline]
    pub fn current(&self) -> Option<(&[WordId], Count)> {
        self.cursor.as_ref().and_then(|c| c.current())
    }

    /// Step to the next record, crossing block boundaries as needed.
    pub fn advance(&mut self) -> Result<()> {
        let Some(cursor) = self.cursor.as_mut() else {
            return Ok(());
        };
        cursor.advance()?;
        if cursor.current().is_none() {
            let done = self.cursor.take().expect("cursor present");
            self.spare = Some(done.into_block());
            self.load_next_block()?;
        }
        Ok(())
    }

    /// True when every record of every block has been consumed.
    #[inline]
    pub fn is_exhausted(&self) -> bool {
        self.cursor.is_none()
    }

    fn load_next_block(&mut self) -> Result<()> {
        let block = if self.compress {
            let mut len_buf = [0u8; 4];
            if !read_exact_or_eof(&mut self.file, &mut len_buf)? {
                return Ok(());
            }
            let packed_len = u32::from_le_bytes(len_buf) as usize;
            let mut packed = vec![0u8; packed_len];
            if !read_exact_or_eof(&mut self.file, &mut packed)? {
                return Err(CounterError::MalformedBlock(
                    "compressed block frame truncated".into(),
                ));
            }
            let block = zstd::bulk::decompress(&packed, self.block_bytes)?;
            if block.len() != self.block_bytes {
                return Err(CounterError::MalformedBlock(format!(
                    "compressed block inflated to {} bytes, expected {}",
                    block.len(),
                    self.block_bytes
                )));
            }
            block
        } else {
            let mut block = self.spare.take().unwrap_or_default();
            block.resize(self.block_bytes, 0);
            if !read_exact_or_eof(&mut self.file, &mut block)? {
                return Ok(());
            }
            block
        };

        self.cursor = Some(BlockCursor::new(block, self.order, self.sort_order)?);
        Ok(())
    }
}

/// Fill `buf` completely, or read nothing. `Ok(false)` at clean EOF;
/// a partial fill is a truncation error.
fn read_exact_or_eof(file: &mut impl Read, buf: &mut [u8]) -> Result<bool> {
    let mut filled = 0;
    while filled < buf.len() {
        let n = file.read(&mut buf[filled..])?;
        if n == 0 {
            if filled == 0 {
                return Ok(false);
            }
            return Err(CounterError::MalformedBlock(format!(
                "truncated block: {} of {} bytes",
                filled,
                buf.len()
            )));
        }
        filled += n;
    }
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_and_read(
        entries: &[(Vec<WordId>, Count)],
        block_bytes: usize,
        compress: bool,
    ) -> Vec<(Vec<WordId>, Count)> {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("run.knb");

        let mut stats = RunStats::default();
        for (gram, count) in entries {
            stats.observe(gram, *count);
        }

        let writer =
            SpillWriter::create(&path, 3, SortOrder::Prefix, block_bytes, compress).unwrap();
        let info = writer
            .write_run(entries.iter().map(|(g, c)| (g.as_slice(), *c)), &stats)
            .unwrap();
        assert_eq!(info.records, entries.len() as u64);

        if !compress {
            let file_len = std::fs::metadata(&path).unwrap().len();
            assert_eq!(file_len, info.blocks * block_bytes as u64);
        }

        let mut reader =
            SpillReader::open(&path, 3, SortOrder::Prefix, block_bytes, compress).unwrap();
        let mut decoded = Vec::new();
        while let Some((gram, count)) = reader.current() {
            decoded.push((gram.to_vec(), count));
            reader.advance().unwrap();
        }
        assert!(reader.is_exhausted());
        decoded
    }

    fn ascending_trigrams(count: usize) -> Vec<(Vec<WordId>, Count)> {
        (0..count as u32)
            .map(|i| (vec![i / 9, (i / 3) % 3, i % 3], (i % 7 + 1) as Count))
            .collect()
    }

    #[test]
    fn test_round_trip_single_block() {
        let entries = ascending_trigrams(10);
        assert_eq!(write_and_read(&entries, 4096, false), entries);
    }

    #[test]
    fn test_round_trip_across_many_blocks() {
        // A tiny block size forces dozens of boundary crossings.
        let entries = ascending_trigrams(200);
        assert_eq!(write_and_read(&entries, 32, false), entries);
    }

    #[test]
    fn test_round_trip_compressed() {
        let entries = ascending_trigrams(200);
        assert_eq!(write_and_read(&entries, 64, true), entries);
    }

    #[test]
    fn test_empty_spill_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("empty.knb");
        let writer = SpillWriter::create(&path, 3, SortOrder::Prefix, 64, false).unwrap();
        let info = writer
            .write_run(std::iter::empty(), &RunStats::default())
            .unwrap();
        assert_eq!(info.blocks, 0);

        let reader = SpillReader::open(&path, 3, SortOrder::Prefix, 64, false).unwrap();
        assert!(reader.is_exhausted());
        assert!(reader.current().is_none());
    }

    #[test]
    fn test_truncated_file_is_malformed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("trunc.knb");

        let entries = ascending_trigrams(50);
        let mut stats = RunStats::default();
        for (g, c) in &entries {
            stats.observe(g, *c);
        }
        let writer = SpillWriter::create(&path, 3, SortOrder::Prefix, 64, false).unwrap();
        writer
            .write_run(entries.iter().map(|(g, c)| (g.as_slice(), *c)), &stats)
            .unwrap();

        // Chop the last half-block off.
        let bytes = std::fs::read(&path).unwrap();
        std::fs::write(&path, &bytes[..bytes.len() - 32]).unwrap();

        let mut reader = SpillReader::open(&path, 3, SortOrder::Prefix, 64, false).unwrap();
        let mut result = Ok(());
        while result.is_ok() && !reader.is_exhausted() {
            result = reader.advance();
        }
        assert!(matches!(result, Err(CounterError::MalformedBlock(_))));
    }
}
