//! Pluggable policies supplied by the embedding service.
//!
//! Each policy is installed once in a [`LedgerContext`](crate::context::LedgerContext)
//! and never swapped afterwards. Implementations must be cheap: they run on
//! the submitting thread, some of them while a chain's write lock is held.

use crate::block::Block;
use crate::chain::{ChainLoad, ChainStats};

/// Oblivious validity oracle, consulted once per submission.
pub trait BlockValidator: Send + Sync {
    fn is_block_valid(&self, block: &Block) -> bool;
}

/// Accepts every block.
#[derive(Debug, Clone, Copy, Default)]
pub struct AcceptAll;

impl BlockValidator for AcceptAll {
    fn is_block_valid(&self, _block: &Block) -> bool {
        true
    }
}

impl<F> BlockValidator for F
where
    F: Fn(&Block) -> bool + Send + Sync,
{
    fn is_block_valid(&self, block: &Block) -> bool {
        self(block)
    }
}

/// Load sampler driving splits and merges.
pub trait LoadSignal: Send + Sync {
    /// Called after a chain finalizes a block.
    fn should_spawn(&self, load: &ChainLoad) -> bool;

    /// Called by the tree worker for a split chain whose children are leaves.
    fn should_merge(&self, parent: &ChainLoad, children: [&ChainLoad; 2]) -> bool;
}

/// Never splits or merges; the tree stays a single root chain.
#[derive(Debug, Clone, Copy, Default)]
pub struct StaticLoad;

impl LoadSignal for StaticLoad {
    fn should_spawn(&self, _load: &ChainLoad) -> bool {
        false
    }

    fn should_merge(&self, _parent: &ChainLoad, _children: [&ChainLoad; 2]) -> bool {
        false
    }
}

/// Splits a chain holding more than `spawn_above` pending items, merges two
/// children that both hold fewer than `merge_below`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContentThresholdLoad {
    pub spawn_above: usize,
    pub merge_below: usize,
}

impl ContentThresholdLoad {
    #[must_use]
    pub const fn new(spawn_above: usize, merge_below: usize) -> Self {
        Self {
            spawn_above,
            merge_below,
        }
    }
}

impl LoadSignal for ContentThresholdLoad {
    fn should_spawn(&self, load: &ChainLoad) -> bool {
        load.pending_items > self.spawn_above
    }

    fn should_merge(&self, _parent: &ChainLoad, children: [&ChainLoad; 2]) -> bool {
        children
            .iter()
            .all(|child| child.pending_items < self.merge_below)
    }
}

/// Decides which chains are offered to proposers.
pub trait ChainPriority: Send + Sync {
    fn is_available(&self, stats: &ChainStats) -> bool;
}

/// Hides ephemeral chains until they have finalized `min_finalized_blocks`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StablePriority {
    pub min_finalized_blocks: u64,
}

impl ChainPriority for StablePriority {
    fn is_available(&self, stats: &ChainStats) -> bool {
        !stats.retired && (stats.permanent || stats.finalized_blocks >= self.min_finalized_blocks)
    }
}
