//! Uniform block grid along one axis of a hierarchical matrix.

use crate::error::{FlashError, Result};

/// One axis of a hierarchical matrix cut into blocks of a fixed size.
///
/// Block `i` starts at scalar `i * blocksize`; every block is full except
/// possibly the last one, which takes the remainder. An axis of extent 10
/// with blocksize 4 has blocks of extents `[4, 4, 2]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockGrid {
    extent: usize,
    blocksize: usize,
}

impl BlockGrid {
    /// Cover `extent` scalars with blocks of `blocksize`.
    pub fn covering(extent: usize, blocksize: usize) -> Result<Self> {
        if blocksize == 0 {
            return Err(FlashError::InvalidBlocksize(0));
        }
        Ok(Self { extent, blocksize })
    }

    /// Number of blocks.
    #[inline]
    pub fn count(&self) -> usize {
        self.extent.div_ceil(self.blocksize)
    }

    /// Scalar index where block `idx` starts. Saturates at the axis end, so
    /// `idx == count()` is the one-past-the-end boundary.
    #[inline]
    pub fn start(&self, idx: usize) -> usize {
        idx.saturating_mul(self.blocksize).min(self.extent)
    }

    /// Scalar extent of block `idx`.
    #[inline]
    pub fn extent_of(&self, idx: usize) -> usize {
        self.start(idx + 1) - self.start(idx)
    }

    /// Scalar extent of blocks `first..first + count`.
    #[inline]
    pub fn extent_between(&self, first: usize, count: usize) -> usize {
        self.start(first + count) - self.start(first)
    }

    /// Block holding scalar index `at`, with `at` relative to that block.
    #[inline]
    pub fn locate(&self, at: usize) -> (usize, usize) {
        (at / self.blocksize, at % self.blocksize)
    }

    /// `(start, extent)` of every block in order.
    pub fn blocks(&self) -> impl Iterator<Item = (usize, usize)> + '_ {
        (0..self.count()).map(|i| (self.start(i), self.extent_of(i)))
    }
}
