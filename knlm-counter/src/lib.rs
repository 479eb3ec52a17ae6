//! # knlm Counter
//!
//! N-gram counting core for the knlm estimator. This crate owns the three
//! pieces that bound the estimator's memory and disk footprint:
//!
//! - the open-addressed [`accumulator`] that interns and counts n-grams in
//!   memory under a fixed RAM ceiling,
//! - the [`sort`] step that linearises a full accumulator in comparator
//!   order before it spills,
//! - the bit-packed, front-coded [`block`] format the sorted runs spill
//!   into, merge through, and stream back from.
//!
//! Around them sit the [`pipeline`] driver (accumulate → background sort +
//! spill), the [`merge`] phase that collapses spill files into one sorted
//! counted stream, and the [`vocab`] interner feeding word ids in.

pub mod accumulator;
pub mod block;
pub mod config;
pub mod error;
pub mod merge;
pub mod pipeline;
pub mod probe;
pub mod sort;
pub mod spill;
pub mod vocab;

pub use accumulator::NgramAccumulator;
pub use block::{BlockCursor, BlockWriter, RunEncoder, RunWriteInfo, BLOCK_BYTES};
pub use config::CounterConfig;
pub use error::{CounterError, Result};
pub use merge::{merge_spills, KWayMerge, MergeSource};
pub use pipeline::{CountResult, CountingPipeline};
pub use probe::{LinearProber, Prober, QuadraticProber};
pub use sort::SortStrategy;
pub use spill::{SpillFileInfo, SpillReader, SpillWriter};
pub use vocab::{ngram_hint, Vocabulary};
