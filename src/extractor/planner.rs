//! Partitioning of the ordering dimension into blocks
//!
//! Every division rounds up, so the plan never under-covers the dimension:
//!
//! ```text
//! block_count  = max(1, ceil(total_size / max_block_size))
//! block_length = ceil(len / block_count)
//! block_count  = ceil(len / block_length)      (authoritative)
//! ```

use super::{ExtractError, ExtractResult};
use std::ops::Range;

/// Partition of an ordering dimension of `len` elements
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockPlan {
    /// Number of blocks (at least 1)
    pub block_count: usize,
    /// Elements per block; the last block may be shorter
    pub block_length: usize,
    /// Length of the ordering dimension
    pub len: usize,
}

/// Compute the block plan.
///
/// `total_size` and `max_block_size` must be expressed in the same unit.
/// A zero-length dimension yields a single empty block.
pub fn plan(total_size: f64, max_block_size: f64, len: usize) -> ExtractResult<BlockPlan> {
    if !max_block_size.is_finite() || max_block_size <= 0.0 {
        return Err(ExtractError::InvalidConfig(format!(
            "max_block_size must be a positive number, got {max_block_size}"
        )));
    }
    if !total_size.is_finite() || total_size < 0.0 {
        return Err(ExtractError::InvalidConfig(format!(
            "invalid total size {total_size}"
        )));
    }

    if len == 0 {
        return Ok(BlockPlan {
            block_count: 1,
            block_length: 0,
            len,
        });
    }

    let requested = ((total_size / max_block_size).ceil() as usize).max(1);
    let block_length = len.div_ceil(requested);
    let block_count = len.div_ceil(block_length);

    Ok(BlockPlan {
        block_count,
        block_length,
        len,
    })
}

impl BlockPlan {
    /// Half-open index ranges of the blocks, in order
    pub fn blocks(&self) -> Blocks {
        Blocks {
            plan: *self,
            emitted: 0,
        }
    }
}

/// Iterator over the half-open index ranges of a [`BlockPlan`]
#[derive(Debug, Clone)]
pub struct Blocks {
    plan: BlockPlan,
    emitted: usize,
}

impl Iterator for Blocks {
    type Item = Range<usize>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.emitted >= self.plan.block_count {
            return None;
        }
        let start = (self.emitted * self.plan.block_length).min(self.plan.len);
        let end = (start + self.plan.block_length).min(self.plan.len);
        self.emitted += 1;
        Some(start..end)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.plan.block_count - self.emitted;
        (remaining, Some(remaining))
    }
}

impl ExactSizeIterator for Blocks {}
