//! Front-coded spill block format.
//!
//! A spill file is a sequence of fixed-size blocks. Each block is
//! self-describing for its bit widths and record count:
//!
//! ```text
//! w : u8    bit width per word id in this block
//! v : u8    bit width per count in this block
//! n : u64le number of records in this block
//! payload : BLOCK_BYTES − 10 bytes of bit-packed records, zero-padded
//! ```
//!
//! Records are front-coded against their predecessor in comparator order:
//! the first record of every block is explicit (N word ids in `w` bits each,
//! then the count in `v` bits); every later record opens with an ℓ-bit lcp,
//! ℓ = ⌈log₂(N+1)⌉, followed by its `N − lcp` trailing components and the
//! count. The order N and the [`SortOrder`] are stream-level parameters the
//! driver keeps out of band; they are not repeated per block.
//!
//! [`SortOrder`]: knlm_core::SortOrder

mod bits;
mod reader;
mod writer;

pub use bits::{read_bits, BitWriter};
pub use reader::BlockCursor;
pub use writer::{BlockWriter, RunEncoder, RunWriteInfo};

use crate::error::{CounterError, Result};
use knlm_core::bits_for;

/// Default on-disk block size: 64 MiB.
pub const BLOCK_BYTES: usize = 64 * 1024 * 1024;

/// Size of the per-block header in bytes.
pub const BLOCK_HEADER_LEN: usize = 10;

/// Bit width of the lcp field for order-`n` streams.
#[inline]
pub fn lcp_bits(order: usize) -> u8 {
    bits_for(order as u64)
}

/// Worst-case bits for one record: lcp + N explicit word ids + count.
#[inline]
pub fn max_record_bits(order: usize, word_bits: u8, count_bits: u8) -> usize {
    lcp_bits(order) as usize + order * word_bits as usize + count_bits as usize
}

/// Per-block header: widths valid inside the block, plus its record count.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockHeader {
    pub word_bits: u8,
    pub count_bits: u8,
    pub records: u64,
}

impl BlockHeader {
    pub fn write_to(&self, buf: &mut [u8]) {
        debug_assert!(buf.len() >= BLOCK_HEADER_LEN);
        buf[0] = self.word_bits;
        buf[1] = self.count_bits;
        buf[2..10].copy_from_slice(&self.records.to_le_bytes());
    }

    pub fn read_from(buf: &[u8]) -> Result<Self> {
        if buf.len() < BLOCK_HEADER_LEN {
            return Err(CounterError::MalformedBlock(format!(
                "block shorter than header: {} bytes",
                buf.len()
            )));
        }
        Ok(Self {
            word_bits: buf[0],
            count_bits: buf[1],
            records: u64::from_le_bytes(buf[2..10].try_into().expect("8 header bytes")),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_round_trip() {
        let header = BlockHeader {
            word_bits: 17,
            count_bits: 3,
            records: 123_456_789,
        };
        let mut buf = [0u8; BLOCK_HEADER_LEN];
        header.write_to(&mut buf);
        assert_eq!(BlockHeader::read_from(&buf).unwrap(), header);
    }

    #[test]
    fn test_header_too_short() {
        assert!(matches!(
            BlockHeader::read_from(&[1, 2, 3]),
            Err(CounterError::MalformedBlock(_))
        ));
    }

    #[test]
    fn test_lcp_bits() {
        assert_eq!(lcp_bits(1), 1);
        assert_eq!(lcp_bits(3), 2);
        assert_eq!(lcp_bits(5), 3);
        assert_eq!(lcp_bits(8), 4);
    }
}
