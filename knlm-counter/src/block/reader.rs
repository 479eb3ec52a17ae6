//! Front-coded block reader.

use super::bits::read_bits;
use super::{max_record_bits, BlockHeader, BLOCK_HEADER_LEN};
use crate::error::{CounterError, Result};
use knlm_core::{Count, SortOrder, WordId};

/// Forward cursor over the records of one block.
///
/// The cursor owns the block buffer for the duration of iteration and
/// decodes each record into a retained scratch tuple: components covered by
/// a record's lcp keep the bytes of the previous record, which is exactly
/// what reconstructs the full n-gram. [`current`](Self::current) therefore
/// returns a view into scratch that the next [`advance`](Self::advance)
/// overwrites; callers that retain records must copy them.
#[derive(Debug)]
pub struct BlockCursor {
    block: Vec<u8>,
    order: usize,
    sort_order: SortOrder,
    lcp_bits: u8,
    word_bits: u8,
    count_bits: u8,
    records: u64,
    /// Index of the record currently in scratch; `records` when exhausted.
    pos: u64,
    /// Bit offset into the payload.
    bit_pos: usize,
    back: Vec<WordId>,
    count: Count,
}

impl BlockCursor {
    /// Validate a block and position the cursor on its first record.
    ///
    /// `order` and `sort_order` are stream-level parameters; they must match
    /// the writer's or the decoded tuples are garbage.
    pub fn new(block: Vec<u8>, order: usize, sort_order: SortOrder) -> Result<Self> {
        let header = BlockHeader::read_from(&block)?;
        let payload_bits = (block.len() - BLOCK_HEADER_LEN) * 8;

        if header.word_bits > WordId::BITS as u8 {
            return Err(CounterError::MalformedBlock(format!(
                "word width {} exceeds {} bits",
                header.word_bits,
                WordId::BITS
            )));
        }
        if header.count_bits > Count::BITS as u8 {
            return Err(CounterError::MalformedBlock(format!(
                "count width {} exceeds {} bits",
                header.count_bits,
                Count::BITS
            )));
        }
        if header.records == 0 {
            return Err(CounterError::MalformedBlock("block contains no records".into()));
        }
        let max_bits = max_record_bits(order, header.word_bits, header.count_bits);
        if max_bits > payload_bits {
            return Err(CounterError::MalformedBlock(format!(
                "worst-case record of {} bits exceeds {}-bit block payload",
                max_bits, payload_bits
            )));
        }
        // Every record consumes at least lcp + one word id + count bits
        // (the first consumes more); a header claiming otherwise is lying.
        let min_record_bits =
            super::lcp_bits(order) as usize + header.word_bits as usize + header.count_bits as usize;
        let min_total = order * header.word_bits as usize
            + header.count_bits as usize
            + (header.records as usize - 1) * min_record_bits;
        if min_total > payload_bits {
            return Err(CounterError::MalformedBlock(format!(
                "{} records cannot fit the {}-bit block payload",
                header.records, payload_bits
            )));
        }

        let mut cursor = Self {
            block,
            order,
            sort_order,
            lcp_bits: super::lcp_bits(order),
            word_bits: header.word_bits,
            count_bits: header.count_bits,
            records: header.records,
            pos: 0,
            bit_pos: 0,
            back: vec![0; order],
            count: 0,
        };
        cursor.decode_explicit()?;
        Ok(cursor)
    }

    /// The record currently in scratch, or `None` once exhausted.
    ///
    /// The returned slice aliases the scratch buffer; it is invalidated by
    /// the next [`advance`](Self::advance).
    #[inline]
    pub fn current(&self) -> Option<(&[WordId], Count)> {
        if self.pos < self.records {
            Some((&self.back, self.count))
        } else {
            None
        }
    }

    /// Decode the next record into scratch.
    pub fn advance(&mut self) -> Result<()> {
        if self.pos + 1 >= self.records {
            self.pos = self.records;
            return Ok(());
        }
        self.decode()?;
        self.pos += 1;
        Ok(())
    }

    /// Records in this block, from the header.
    pub fn records(&self) -> u64 {
        self.records
    }

    pub fn word_bits(&self) -> u8 {
        self.word_bits
    }

    pub fn count_bits(&self) -> u8 {
        self.count_bits
    }

    /// Give the block buffer back for reuse.
    pub fn into_block(self) -> Vec<u8> {
        self.block
    }

    fn take(&mut self, width: u8) -> Result<u64> {
        read_bits(&self.block[BLOCK_HEADER_LEN..], &mut self.bit_pos, width)
            .ok_or_else(|| CounterError::MalformedBlock("block payload exhausted".into()))
    }

    /// Decode all N components plus the count into scratch.
    fn decode_explicit(&mut self) -> Result<()> {
        for i in 0..self.order {
            let word = self.take(self.word_bits)?;
            self.back[i] = word as WordId;
        }
        self.count = self.take(self.count_bits)?;
        Ok(())
    }

    fn decode(&mut self) -> Result<()> {
        let lcp = self.take(self.lcp_bits)? as usize;
        if lcp >= self.order {
            return Err(CounterError::InvariantViolation(format!(
                "decoded lcp {} for order {}",
                lcp, self.order
            )));
        }
        if lcp == 0 {
            return self.decode_explicit();
        }
        // Overwrite only the trailing components in comparator order; the
        // lcp-covered slots keep the previous record's values.
        for i in self.sort_order.tail(self.order, lcp) {
            let word = self.take(self.word_bits)?;
            self.back[i] = word as WordId;
        }
        self.count = self.take(self.count_bits)?;
        Ok(())
    }
}
