//! Chains of the resharding tree.
//!
//! # Numbering
//!
//! Chains are numbered heap-style: the root is `1`, the children of chain `n`
//! are `2n` (left) and `2n + 1` (right). A chain's depth is therefore its
//! split level, and the id alone tells which mask bit routed content into it.
//!
//! - [`controller`]: the per-chain façade over fork graph, scheduler and
//!   content store. ([`ChainController`])

pub mod controller;

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::block::{BlockId, Rank};

pub use controller::{ChainController, Proposal};

// ---------------------------------------------------------------------------
// ChainId
// ---------------------------------------------------------------------------

/// Heap-numbered chain identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChainId(u64);

impl ChainId {
    pub const ROOT: Self = Self(1);

    /// Wrap a raw id; `0` is not a chain.
    #[must_use]
    pub const fn new(raw: u64) -> Option<Self> {
        if raw == 0 { None } else { Some(Self(raw)) }
    }

    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }

    #[must_use]
    pub const fn is_root(self) -> bool {
        self.0 == 1
    }

    /// Split level; the root is at depth 0.
    #[must_use]
    pub const fn depth(self) -> usize {
        (63 - self.0.leading_zeros()) as usize
    }

    #[must_use]
    pub const fn parent(self) -> Option<Self> {
        if self.0 <= 1 { None } else { Some(Self(self.0 / 2)) }
    }

    /// Left child, or `None` once the id space is exhausted.
    #[must_use]
    pub const fn left(self) -> Option<Self> {
        match self.0.checked_mul(2) {
            Some(raw) => Some(Self(raw)),
            None => None,
        }
    }

    #[must_use]
    pub const fn right(self) -> Option<Self> {
        match self.0.checked_mul(2) {
            Some(raw) => Some(Self(raw | 1)),
            None => None,
        }
    }
}

impl fmt::Display for ChainId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// Load and stats
// ---------------------------------------------------------------------------

/// Load sample handed to [`LoadSignal`](crate::strategy::LoadSignal).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ChainLoad {
    pub chain: ChainId,
    pub depth: usize,
    pub pending_items: usize,
    pub pending_bytes: u64,
    pub finalized_blocks: u64,
}

/// Introspection snapshot of one chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChainStats {
    pub chain: ChainId,
    pub depth: usize,
    pub live_blocks: usize,
    pub buffered_blocks: usize,
    pub missing_dependencies: usize,
    pub tips: usize,
    pub finalized_blocks: u64,
    pub undelivered_blocks: usize,
    pub next_rank: u64,
    pub pending_content: usize,
    pub pending_bytes: u64,
    pub priority_tip: BlockId,
    pub permanent: bool,
    pub retired: bool,
    pub split: bool,
}

// ---------------------------------------------------------------------------
// Submission outcome
// ---------------------------------------------------------------------------

/// What happened to a submitted block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmitOutcome {
    /// The block and `applied - 1` buffered dependents entered the fork graph.
    Applied { applied: usize },
    /// The parent is unknown; the block waits in the scheduler.
    Buffered,
    /// The block is already live or buffered.
    Duplicate,
    Rejected(RejectReason),
}

impl SubmitOutcome {
    #[must_use]
    pub const fn is_accepted(&self) -> bool {
        matches!(self, Self::Applied { .. } | Self::Buffered)
    }
}

/// Why a block was dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    /// The block does not name exactly one previous block.
    MalformedPrevious { count: usize },
    WrongChain { expected: ChainId, got: ChainId },
    UnknownChain(ChainId),
    /// The block validity oracle refused it.
    Invalid,
    /// `rank.current > rank.next`.
    RankOutOfOrder(Rank),
    /// `rank.current` is below the parent's `rank.next`.
    RankBelowParent { required: u64, got: u64 },
    /// The parent left the graph and the rank is behind the finalized prefix.
    Stale { next_rank: u64, got: u64 },
    /// The chain was merged into its parent.
    Retired(ChainId),
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MalformedPrevious { count } => {
                write!(f, "expected one previous block, got {count}")
            }
            Self::WrongChain { expected, got } => {
                write!(f, "block for chain {got} submitted to chain {expected}")
            }
            Self::UnknownChain(chain) => write!(f, "chain {chain} is not registered"),
            Self::Invalid => f.write_str("rejected by the validity oracle"),
            Self::RankOutOfOrder(rank) => {
                write!(f, "rank {} exceeds next rank {}", rank.current, rank.next)
            }
            Self::RankBelowParent { required, got } => {
                write!(f, "rank {got} is below the parent's next rank {required}")
            }
            Self::Stale { next_rank, got } => {
                write!(f, "rank {got} is behind the finalized next rank {next_rank}")
            }
            Self::Retired(chain) => write!(f, "chain {chain} has been merged"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn heap_numbering_round_trips() {
        let root = ChainId::ROOT;
        let left = root.left().unwrap();
        let right = root.right().unwrap();
        assert_eq!((left.as_u64(), right.as_u64()), (2, 3));
        assert_eq!(left.parent(), Some(root));
        assert_eq!(right.parent(), Some(root));
        assert_eq!(root.parent(), None);
        assert_eq!(right.right().unwrap().as_u64(), 7);
    }

    #[test]
    fn depth_counts_split_levels() {
        assert_eq!(ChainId::ROOT.depth(), 0);
        assert_eq!(ChainId::new(2).unwrap().depth(), 1);
        assert_eq!(ChainId::new(7).unwrap().depth(), 2);
        assert_eq!(ChainId::new(8).unwrap().depth(), 3);
    }

    #[test]
    fn zero_is_not_a_chain_and_ids_saturate() {
        assert!(ChainId::new(0).is_none());
        let deepest = ChainId::new(1 << 63).unwrap();
        assert_eq!(deepest.depth(), 63);
        assert!(deepest.left().is_none());
        assert!(deepest.right().is_none());
    }

    #[test]
    fn rejections_render_readably() {
        let reason = RejectReason::RankBelowParent {
            required: 4,
            got: 2,
        };
        assert_eq!(reason.to_string(), "rank 2 is below the parent's next rank 4");
        assert!(!SubmitOutcome::Rejected(reason).is_accepted());
        assert!(SubmitOutcome::Buffered.is_accepted());
    }
}
