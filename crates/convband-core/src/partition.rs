//! Deterministic work partitioning.
//!
//! Column bands feed the thread executor, row bands feed the distributed
//! coordinator. Both are pure functions of the extent and the worker count.

use serde::{Deserialize, Serialize};
use std::num::NonZeroUsize;
use std::ops::Range;

/// Half-open index range `[lo, hi)` along one image axis.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WorkBand {
    pub lo: usize,
    pub hi: usize,
}

impl WorkBand {
    #[inline]
    pub fn new(lo: usize, hi: usize) -> Self {
        debug_assert!(lo <= hi, "band [{lo}, {hi}) is inverted");
        Self { lo, hi }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.hi - self.lo
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.hi == self.lo
    }

    #[inline]
    pub fn range(&self) -> Range<usize> {
        self.lo..self.hi
    }
}

/// Split `[0, width)` into `n` column bands; the last band takes the remainder.
pub fn column_bands(width: usize, n: NonZeroUsize) -> Vec<WorkBand> {
    let n = n.get();
    let step = width / n;
    (0..n)
        .map(|i| {
            let lo = i * step;
            let hi = if i + 1 == n { width } else { lo + step };
            WorkBand::new(lo, hi)
        })
        .collect()
}

/// Equal-height row bands for a distributed group, plus the unassigned tail.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RowPartition {
    /// `floor(height / n)`; every rank band has exactly this many rows.
    pub per_rank: usize,
    /// Band owned by rank `r` at index `r`.
    pub bands: Vec<WorkBand>,
    /// `[n * per_rank, height)`, computed by the coordinating rank alone.
    pub leftover: WorkBand,
}

impl RowPartition {
    /// Rows covered by the gathered rank bands, `[0, n * per_rank)`.
    pub fn gathered(&self) -> WorkBand {
        WorkBand::new(0, self.leftover.lo)
    }
}

/// Split `[0, height)` into `n` bands of identical height and a leftover band.
///
/// Uniform band heights let every rank contribute an equal-sized chunk to a
/// gather collective; the remainder rows are left for the root.
pub fn row_bands(height: usize, n: NonZeroUsize) -> RowPartition {
    let n = n.get();
    let per_rank = height / n;
    let bands = (0..n)
        .map(|r| WorkBand::new(r * per_rank, (r + 1) * per_rank))
        .collect();
    RowPartition {
        per_rank,
        bands,
        leftover: WorkBand::new(n * per_rank, height),
    }
}
