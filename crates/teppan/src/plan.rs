//! Splitting a seed sequence into batches and batches across workers.

use std::ops::Range;
use crate::error::{GenerationError, Result};
use crate::seeds::Seed;

/// Number of global batches for `total` seeds, at most `max_batch_size` per batch,
/// shared by `world_size` workers.
///
/// The count is `ceil(total / max_batch_size)` rounded up to a multiple of the
/// world size, so every worker owns the same number of batch slots.
pub fn num_batches(total: usize, max_batch_size: usize, world_size: usize) -> usize {
    if total == 0 {
        return 0;
    }
    total.div_ceil(max_batch_size * world_size) * world_size
}

/// The global batch layout of a run.
///
/// Batches are contiguous, near-equal slices of the seed sequence. When the batch
/// count did not need rounding up to the world size, batches are filled to
/// `max_batch_size` and only the last is shorter. Otherwise the first
/// `total % num_batches` batches hold one seed more than the rest, so a batch is
/// only empty when there are fewer seeds than batches. Batch `i` belongs to worker
/// `i % world_size`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchPlan {
    seeds: Vec<Seed>,
    chunks: Vec<Range<usize>>,
    world_size: usize,
}

impl BatchPlan {
    pub fn new(seeds: Vec<Seed>, max_batch_size: usize, world_size: usize) -> Result<Self> {
        if max_batch_size == 0 {
            return Err(GenerationError::InvalidBatchPlan(
                "batch size must be at least 1".to_string(),
            ));
        }
        if world_size == 0 {
            return Err(GenerationError::InvalidBatchPlan(
                "world size must be at least 1".to_string(),
            ));
        }

        let total = seeds.len();
        let count = num_batches(total, max_batch_size, world_size);
        let chunks = if count == total.div_ceil(max_batch_size) {
            (0..count)
                .map(|i| {
                    let start = i * max_batch_size;
                    start..(start + max_batch_size).min(total)
                })
                .collect()
        } else {
            near_equal_chunks(total, count)
        };

        Ok(Self {
            seeds,
            chunks,
            world_size,
        })
    }

    /// Total number of seeds in the run.
    pub fn len(&self) -> usize {
        self.seeds.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seeds.is_empty()
    }

    pub fn seeds(&self) -> &[Seed] {
        &self.seeds
    }

    pub fn num_batches(&self) -> usize {
        self.chunks.len()
    }

    pub fn world_size(&self) -> usize {
        self.world_size
    }

    /// Global batch `index`, possibly empty.
    pub fn batch(&self, index: usize) -> Option<&[Seed]> {
        self.chunks.get(index).map(|range| &self.seeds[range.clone()])
    }

    /// Every global batch in order.
    pub fn batches(&self) -> impl Iterator<Item = &[Seed]> + '_ {
        self.chunks.iter().map(|range| &self.seeds[range.clone()])
    }

    /// The batches worker `rank` must process: global batches `rank`, `rank + W`, ...
    ///
    /// Every rank receives the same number of batches; some may be empty.
    pub fn rank_batches(&self, rank: usize) -> Result<Vec<&[Seed]>> {
        if rank >= self.world_size {
            return Err(GenerationError::InvalidBatchPlan(format!(
                "rank {rank} is outside a world of {}",
                self.world_size
            )));
        }
        Ok(self
            .chunks
            .iter()
            .skip(rank)
            .step_by(self.world_size)
            .map(|range| &self.seeds[range.clone()])
            .collect())
    }
}

/// `count` contiguous ranges over `0..total`, the first `total % count` one longer.
fn near_equal_chunks(total: usize, count: usize) -> Vec<Range<usize>> {
    let base = total / count;
    let extra = total % count;
    let mut start = 0;
    (0..count)
        .map(|i| {
            let len = base + usize::from(i < extra);
            let range = start..start + len;
            start += len;
            range
        })
        .collect()
}
