//! Block sorters: parallel LSD radix over records, and indirect permutation
//! sort.
//!
//! Both strategies satisfy the same contract (after sorting, iterating the
//! block visits every entry exactly once in comparator order) and differ in
//! cost shape: the radix sort moves whole records but runs in `O(N × size)`
//! with no comparisons; the indirect sort leaves records in place and sorts a
//! permutation with the comparator (rayon parallel).
//!
//! The radix digit space is the dense vocabulary id range `0..=max_word_id`,
//! taken from the run statistics. Word ids are interned densely upstream, so
//! the per-worker histograms stay proportional to the vocabulary.

use knlm_core::{Count, NgramId, RunStats, SortOrder, WordId};
use rayon::prelude::*;

/// Which sorter arranges a block before spill.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortStrategy {
    /// In-place parallel LSD radix sort over records. The default.
    #[default]
    Radix,
    /// Permutation sort through an index array, comparator-driven.
    Indirect,
}

/// Sort the record store in place: `words` holds `n` word ids per record,
/// `counts` one count per record, and both move together.
///
/// Internally parallel across `threads` workers; joins before returning.
pub fn sort_records(
    words: &mut Vec<WordId>,
    counts: &mut Vec<Count>,
    n: usize,
    order: SortOrder,
    stats: &RunStats,
    threads: usize,
) {
    let size = counts.len();
    if size <= 1 {
        return;
    }
    debug_assert_eq!(words.len(), size * n);

    let digit_space = stats.max_word_id as usize + 1;
    let mut scratch_w = vec![0 as WordId; words.len()];
    let mut scratch_c = vec![0 as Count; size];

    // One stable counting pass per digit, least significant first. Each pass
    // scatters into the scratch pair, then the buffers swap, so the data is
    // back in `words`/`counts` after every pass.
    for digit in order.radix_passes(n) {
        counting_pass(
            words,
            counts,
            &mut scratch_w,
            &mut scratch_c,
            n,
            digit,
            digit_space,
            threads,
        );
        std::mem::swap(words, &mut scratch_w);
        std::mem::swap(counts, &mut scratch_c);
    }
}

/// Build a sorted permutation of record ids without moving records.
///
/// Uses rayon's parallel unstable sort; entries are distinct by the
/// accumulator's hash invariant, so instability is unobservable.
pub fn sort_indirect(words: &[WordId], n: usize, order: SortOrder) -> Vec<NgramId> {
    let size = if n == 0 { 0 } else { words.len() / n };
    let mut index: Vec<NgramId> = (0..size as NgramId).collect();
    index.par_sort_unstable_by(|&i, &j| {
        let a = &words[i as usize * n..(i as usize + 1) * n];
        let b = &words[j as usize * n..(j as usize + 1) * n];
        order.compare(a, b)
    });
    index
}

/// Raw pointer that may cross a thread boundary. Workers write disjoint
/// output slots (the offset tables partition the destination range), which
/// is what makes the shared mutable destination sound.
#[derive(Clone, Copy)]
struct SendPtr<T>(*mut T);
unsafe impl<T> Send for SendPtr<T> {}

/// One stable counting-sort pass on `src` digit `digit`, scattering into
/// `dst`.
#[allow(clippy::too_many_arguments)]
fn counting_pass(
    src_w: &[WordId],
    src_c: &[Count],
    dst_w: &mut [WordId],
    dst_c: &mut [Count],
    n: usize,
    digit: usize,
    digit_space: usize,
    threads: usize,
) {
    let size = src_c.len();
    let workers = threads.clamp(1, size);
    let chunk = size.div_ceil(workers);

    // Phase 1: per-worker digit histograms.
    let histograms: Vec<Vec<usize>> = if workers == 1 {
        let mut hist = vec![0usize; digit_space];
        for i in 0..size {
            hist[src_w[i * n + digit] as usize] += 1;
        }
        vec![hist]
    } else {
        std::thread::scope(|scope| {
            let handles: Vec<_> = (0..workers)
                .map(|t| {
                    let start = t * chunk;
                    let end = ((t + 1) * chunk).min(size);
                    scope.spawn(move || {
                        let mut hist = vec![0usize; digit_space];
                        for i in start..end {
                            hist[src_w[i * n + digit] as usize] += 1;
                        }
                        hist
                    })
                })
                .collect();
            handles
                .into_iter()
                .map(|h| h.join().expect("histogram worker panicked"))
                .collect()
        })
    };

    // Phase 2: exclusive prefix over (digit value, worker). Worker t's
    // records with digit d land at consecutive offsets after every earlier
    // worker's records with the same digit, which keeps the pass stable.
    let mut offsets: Vec<Vec<usize>> = histograms
        .iter()
        .map(|h| Vec::with_capacity(h.len()))
        .collect();
    let mut running = 0usize;
    for d in 0..digit_space {
        for (t, hist) in histograms.iter().enumerate() {
            offsets[t].push(running);
            running += hist[d];
        }
    }
    debug_assert_eq!(running, size);

    // Phase 3: scatter.
    if workers == 1 {
        let offs = &mut offsets[0];
        for i in 0..size {
            let d = src_w[i * n + digit] as usize;
            let at = offs[d];
            offs[d] += 1;
            dst_w[at * n..(at + 1) * n].copy_from_slice(&src_w[i * n..(i + 1) * n]);
            dst_c[at] = src_c[i];
        }
        return;
    }

    let dst_w_ptr = SendPtr(dst_w.as_mut_ptr());
    let dst_c_ptr = SendPtr(dst_c.as_mut_ptr());
    std::thread::scope(|scope| {
        for (t, mut offs) in offsets.into_iter().enumerate() {
            let start = t * chunk;
            let end = ((t + 1) * chunk).min(size);
            scope.spawn(move || {
                let dst_w = dst_w_ptr;
                let dst_c = dst_c_ptr;
                for i in start..end {
                    let d = src_w[i * n + digit] as usize;
                    let at = offs[d];
                    offs[d] += 1;
                    unsafe {
                        std::ptr::copy_nonoverlapping(
                            src_w.as_ptr().add(i * n),
                            dst_w.0.add(at * n),
                            n,
                        );
                        *dst_c.0.add(at) = src_c[i];
                    }
                }
            });
        }
    });
}
