//! Sampling Process assembly (C10): turns a sequence of correlated blocks
//! into the ordered, non-overlapping `SamplingProcess` a [`crate::table::ResultTable`]
//! is built from (§4.7 final assembly step).

use crate::correlator::CorrelatedBlock;
use crate::error::{DpError, DpResult};

/// An ordered, validated sequence of [`CorrelatedBlock`]s: every block's
/// timebase starts no earlier than the previous one's, and no two blocks'
/// time ranges overlap.
#[derive(Debug)]
pub struct SamplingProcess {
    blocks: Vec<CorrelatedBlock>,
}

impl SamplingProcess {
    /// Validates `blocks` (already sorted by `(start, duration)`) against
    /// the Overlap and Order invariants before accepting them.
    pub fn assemble(blocks: Vec<CorrelatedBlock>) -> DpResult<Self> {
        for pair in blocks.windows(2) {
            let (a, b) = (&pair[0], &pair[1]);
            if b.timebase.start() < a.timebase.start() {
                return Err(DpError::Order(format!(
                    "block starting at {:?} follows a block starting at {:?}",
                    b.timebase.start(),
                    a.timebase.start()
                )));
            }
            let a_end = a.timebase.start() + a.timebase.duration();
            if b.timebase.start() <= a_end {
                return Err(DpError::Overlap(format!(
                    "block starting at {:?} overlaps the previous block's span ending at {:?}",
                    b.timebase.start(),
                    a_end
                )));
            }
        }
        Ok(Self { blocks })
    }

    pub fn blocks(&self) -> &[CorrelatedBlock] {
        &self.blocks
    }

    pub fn into_blocks(self) -> Vec<CorrelatedBlock> {
        self.blocks
    }

    pub fn total_rows(&self) -> usize {
        self.blocks.iter().map(|b| b.timebase.count() as usize).sum()
    }
}
