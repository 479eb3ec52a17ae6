//! Error types for the counting core.

use std::io;
use thiserror::Error;

/// Counting-core errors.
#[derive(Error, Debug)]
pub enum CounterError {
    /// The accumulator's probe chain wrapped without finding a free bucket.
    ///
    /// Fatal for the call. The pipeline reacts by flushing the accumulator
    /// and retrying the insert in a fresh one; the accumulator itself never
    /// rehashes.
    #[error("probe chain exhausted all {buckets} buckets")]
    ProbeExhausted { buckets: usize },

    /// Short read/write or stream error during spill or load.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// A block header or payload is inconsistent with the block size.
    #[error("malformed block: {0}")]
    MalformedBlock(String),

    /// Corrupt input or a buggy comparator: an lcp ≥ order was decoded, or
    /// adjacent equal records were observed in a supposedly sorted run.
    #[error("invariant violation: {0}")]
    InvariantViolation(String),
}

/// Result type for counting-core operations.
pub type Result<T> = std::result::Result<T, CounterError>;
