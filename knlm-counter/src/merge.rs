//! K-way merge of sorted spill streams.
//!
//! Merges N spill readers into a single globally-sorted stream of
//! `(n-gram, count)` pairs, summing the counts of n-grams that appear in
//! more than one spill. Uses a manual min-heap keyed by the stream
//! comparator; heap entries own copies of their records because a source's
//! scratch buffer is invalidated by its next advance.

use crate::block::{RunEncoder, RunWriteInfo};
use crate::error::Result;
use crate::spill::{SpillFileInfo, SpillReader};
use knlm_core::{Count, RunStats, SortOrder, WordId};
use std::cmp::Ordering;
use std::io::Write;
use std::path::Path;

/// Buffered, forward-only record stream that can be k-way merged.
pub trait MergeSource {
    /// Current record without advancing. `None` when exhausted.
    fn current(&self) -> Option<(&[WordId], Count)>;

    /// Step to the next record.
    fn advance(&mut self) -> Result<()>;
}

impl MergeSource for SpillReader {
    #[inline]
    fn current(&self) -> Option<(&[WordId], Count)> {
        SpillReader::current(self)
    }

    fn advance(&mut self) -> Result<()> {
        SpillReader::advance(self)
    }
}

/// Entry in the min-heap: an owned record plus the stream it came from.
struct HeapEntry {
    words: Vec<WordId>,
    count: Count,
    stream: usize,
}

/// K-way merge iterator over sorted streams.
pub struct KWayMerge<S: MergeSource> {
    heap: Vec<HeapEntry>,
    streams: Vec<S>,
    sort_order: SortOrder,
}

impl<S: MergeSource> KWayMerge<S> {
    /// Seed the heap with the head of every non-empty stream.
    pub fn new(streams: Vec<S>, sort_order: SortOrder) -> Result<Self> {
        let mut merge = Self {
            heap: Vec::with_capacity(streams.len()),
            streams,
            sort_order,
        };
        for idx in 0..merge.streams.len() {
            if let Some((words, count)) = merge.streams[idx].current() {
                merge.heap.push(HeapEntry {
                    words: words.to_vec(),
                    count,
                    stream: idx,
                });
            }
        }
        for i in (0..merge.heap.len() / 2).rev() {
            merge.sift_down(i);
        }
        Ok(merge)
    }

    /// Next merged record: the smallest n-gram across all streams with its
    /// counts summed. `None` when every stream is exhausted.
    pub fn next_merged(&mut self) -> Result<Option<(Vec<WordId>, Count)>> {
        if self.heap.is_empty() {
            return Ok(None);
        }

        let words = std::mem::take(&mut self.heap[0].words);
        let mut count = self.heap[0].count;
        self.pop_root()?;

        // Equal heads from other streams collapse into one record.
        while let Some(root) = self.heap.first() {
            if root.words != words {
                break;
            }
            count += root.count;
            self.pop_root()?;
        }

        Ok(Some((words, count)))
    }

    /// Replace the root with its stream's next record, or remove it when
    /// the stream runs dry.
    fn pop_root(&mut self) -> Result<()> {
        let stream = self.heap[0].stream;
        self.streams[stream].advance()?;

        match self.streams[stream].current() {
            Some((words, count)) => {
                let root = &mut self.heap[0];
                root.words.clear();
                root.words.extend_from_slice(words);
                root.count = count;
            }
            None => {
                let last = self.heap.len() - 1;
                self.heap.swap(0, last);
                self.heap.pop();
            }
        }
        if !self.heap.is_empty() {
            self.sift_down(0);
        }
        Ok(())
    }

    fn less(&self, a: usize, b: usize) -> bool {
        match self
            .sort_order
            .compare(&self.heap[a].words, &self.heap[b].words)
        {
            Ordering::Less => true,
            Ordering::Greater => false,
            // Equal n-grams from different streams: break the tie by stream
            // index so the pop order is deterministic.
            Ordering::Equal => self.heap[a].stream < self.heap[b].stream,
        }
    }

    fn sift_down(&mut self, mut at: usize) {
        loop {
            let left = 2 * at + 1;
            if left >= self.heap.len() {
                return;
            }
            let right = left + 1;
            let mut smallest = at;
            if self.less(left, smallest) {
                smallest = left;
            }
            if right < self.heap.len() && self.less(right, smallest) {
                smallest = right;
            }
            if smallest == at {
                return;
            }
            self.heap.swap(at, smallest);
            at = smallest;
        }
    }
}

/// Merge a set of spill files into one sorted, count-summed block file.
///
/// The spills must all have been written with the same order, sort order,
/// block size, and compression flag. The merged output is written
/// uncompressed so blocks stay addressable at fixed offsets.
///
/// The output widths come from a bound, not a rescan: the merged count of
/// any n-gram is at most the sum of the per-spill maxima.
pub fn merge_spills(
    spills: &[SpillFileInfo],
    order: usize,
    sort_order: SortOrder,
    block_bytes: usize,
    compress: bool,
    out_path: &Path,
) -> Result<RunWriteInfo> {
    let mut streams = Vec::with_capacity(spills.len());
    let mut merged_stats = RunStats::default();
    for spill in spills {
        merged_stats.max_word_id = merged_stats.max_word_id.max(spill.stats.max_word_id);
        merged_stats.max_count += spill.stats.max_count;
        merged_stats.count += spill.stats.count;
        streams.push(SpillReader::open(
            &spill.path,
            order,
            sort_order,
            block_bytes,
            compress,
        )?);
    }

    let mut out = std::io::BufWriter::new(std::fs::File::create(out_path)?);
    let mut encoder = RunEncoder::new(order, sort_order, block_bytes, &merged_stats, |block| {
        out.write_all(block)?;
        Ok(())
    })?;

    let mut merge = KWayMerge::new(streams, sort_order)?;
    while let Some((gram, count)) = merge.next_merged()? {
        encoder.push(&gram, count)?;
    }
    let info = encoder.finish()?;
    out.flush()?;

    tracing::info!(
        spills = spills.len(),
        records = info.records,
        blocks = info.blocks,
        path = %out_path.display(),
        "spills merged"
    );
    Ok(info)
}

#[cfg(test)]
mod tests {
    use super::*;

    /// In-memory merge source for tests.
    struct VecSource {
        entries: Vec<(Vec<WordId>, Count)>,
        pos: usize,
    }

    impl VecSource {
        fn new(entries: Vec<(Vec<WordId>, Count)>) -> Self {
            Self { entries, pos: 0 }
        }
    }

    impl MergeSource for VecSource {
        fn current(&self) -> Option<(&[WordId], Count)> {
            self.entries
                .get(self.pos)
                .map(|(g, c)| (g.as_slice(), *c))
        }

        fn advance(&mut self) -> Result<()> {
            self.pos += 1;
            Ok(())
        }
    }

    fn drain<S: MergeSource>(mut merge: KWayMerge<S>) -> Vec<(Vec<WordId>, Count)> {
        let mut out = Vec::new();
        while let Some(entry) = merge.next_merged().unwrap() {
            out.push(entry);
        }
        out
    }

    #[test]
    fn test_merge_two_streams_sums_counts() {
        let a = VecSource::new(vec![(vec![1, 2], 3), (vec![2, 2], 1)]);
        let b = VecSource::new(vec![(vec![1, 2], 2), (vec![3, 0], 5)]);

        let merge = KWayMerge::new(vec![a, b], SortOrder::Prefix).unwrap();
        assert_eq!(
            drain(merge),
            vec![(vec![1, 2], 5), (vec![2, 2], 1), (vec![3, 0], 5)]
        );
    }

    #[test]
    fn test_merge_respects_context_order() {
        let a = VecSource::new(vec![(vec![9, 1], 1), (vec![0, 5], 1)]);
        let b = VecSource::new(vec![(vec![1, 1], 1)]);

        let merge = KWayMerge::new(vec![a, b], SortOrder::Context).unwrap();
        assert_eq!(
            drain(merge),
            vec![(vec![1, 1], 1), (vec![9, 1], 1), (vec![0, 5], 1)]
        );
    }

    #[test]
    fn test_merge_empty_and_single_streams() {
        let merge: KWayMerge<VecSource> = KWayMerge::new(vec![], SortOrder::Prefix).unwrap();
        assert_eq!(drain(merge), vec![]);

        let only = VecSource::new(vec![(vec![4, 4], 2)]);
        let merge = KWayMerge::new(vec![only], SortOrder::Prefix).unwrap();
        assert_eq!(drain(merge), vec![(vec![4, 4], 2)]);
    }

    #[test]
    fn test_merge_same_gram_in_three_streams() {
        let streams = (0..3)
            .map(|i| VecSource::new(vec![(vec![7, 7, 7], i + 1)]))
            .collect();
        let merge = KWayMerge::new(streams, SortOrder::Prefix).unwrap();
        assert_eq!(drain(merge), vec![(vec![7, 7, 7], 6)]);
    }
}
