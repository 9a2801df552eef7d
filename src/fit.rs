//! Fit-selection strategies.
//!
//! Allocation walks the free list once, collecting every block large enough
//! for the request, and then asks the configured strategy to pick one. The
//! walk, the splitting and the re-linking never change between strategies;
//! swapping the selection rule is the whole difference.

use rand::Rng;

use crate::Offset;

/// A free block that can satisfy the current request.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct Candidate {
    pub offset: Offset,
    pub size: u32,
}

/// How [`crate::ArenaAllocator::allocate`] chooses among qualifying free
/// blocks.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum FitStrategy {
    /// The smallest qualifying block. Ties go to the block seen first in
    /// list order.
    #[default]
    BestFit,
    /// The largest qualifying block. Ties go to the block seen first in
    /// list order.
    WorstFit,
    /// A uniformly random qualifying block.
    RandomFit,
}

impl FitStrategy {
    /// Applies the selection rule to the qualifying candidates, which arrive
    /// in list order starting at the free-list head.
    pub(crate) fn select(self, candidates: impl Iterator<Item = Candidate>) -> Option<Candidate> {
        match self {
            Self::BestFit => candidates.reduce(|best, c| if c.size < best.size { c } else { best }),
            Self::WorstFit => candidates.reduce(|best, c| if c.size > best.size { c } else { best }),
            Self::RandomFit => {
                // Reservoir sampling: the k-th candidate replaces the pick
                // with probability 1/k, which is uniform without knowing the
                // candidate count up front.
                let mut rng = rand::thread_rng();
                let mut pick = None;

                for (seen, candidate) in candidates.enumerate() {
                    if rng.gen_range(0..=seen) == 0 {
                        pick = Some(candidate);
                    }
                }

                pick
            }
        }
    }
}
