use std::sync::Arc;

use arbor_core::Block;
use serde::{Deserialize, Serialize};

use crate::rng::DeterministicRng;

/// Fault injection for block delivery.
///
/// Nothing is dropped: a lost block would only stall its chain, and every
/// block eventually arrives in the final drain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FaultConfig {
    /// Maximum delivery delay in rounds.
    pub max_delay_rounds: u8,
    /// Percentage of sends delivered twice.
    pub duplicate_rate_percent: u8,
    /// Percentage chance of shuffling the blocks ready in one round.
    pub reorder_rate_percent: u8,
}

impl Default for FaultConfig {
    fn default() -> Self {
        Self {
            max_delay_rounds: 2,
            duplicate_rate_percent: 5,
            reorder_rate_percent: 20,
        }
    }
}

#[derive(Debug, Clone)]
struct PendingBlock {
    deliver_at_round: u64,
    block: Arc<Block>,
}

/// Result of a send.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SendOutcome {
    pub duplicated: bool,
    pub delay_rounds: u8,
}

/// Blocks due in one round.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliverOutcome {
    pub delivered: Vec<Arc<Block>>,
    pub reordered: bool,
}

/// Deterministic, fault-injecting path from proposers to the tree.
#[derive(Debug, Clone)]
pub struct DeliveryQueue {
    pending: Vec<PendingBlock>,
    fault: FaultConfig,
}

impl DeliveryQueue {
    #[must_use]
    pub const fn new(fault: FaultConfig) -> Self {
        Self {
            pending: Vec::new(),
            fault,
        }
    }

    #[must_use]
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub fn send(&mut self, block: Arc<Block>, round: u64, rng: &mut DeterministicRng) -> SendOutcome {
        let delay_bound = u64::from(self.fault.max_delay_rounds).saturating_add(1);
        let delay = u8::try_from(rng.next_bounded(delay_bound)).unwrap_or(self.fault.max_delay_rounds);
        let deliver_at_round = round.saturating_add(u64::from(delay));

        let duplicated = rng.hit_rate_percent(self.fault.duplicate_rate_percent);
        if duplicated {
            // The copy may overtake the original.
            let extra = rng.next_bounded(delay_bound);
            self.pending.push(PendingBlock {
                deliver_at_round: round.saturating_add(extra),
                block: Arc::clone(&block),
            });
        }
        self.pending.push(PendingBlock {
            deliver_at_round,
            block,
        });

        SendOutcome {
            duplicated,
            delay_rounds: delay,
        }
    }

    /// Take every block due by `round`, in send order unless reordered.
    pub fn deliver_ready(&mut self, round: u64, rng: &mut DeterministicRng) -> DeliverOutcome {
        let (ready, future): (Vec<_>, Vec<_>) = self
            .pending
            .drain(..)
            .partition(|pending| pending.deliver_at_round <= round);
        self.pending = future;

        let mut delivered: Vec<Arc<Block>> = ready.into_iter().map(|pending| pending.block).collect();
        let reordered =
            delivered.len() > 1 && rng.hit_rate_percent(self.fault.reorder_rate_percent);
        if reordered {
            rng.shuffle(&mut delivered);
        }

        DeliverOutcome {
            delivered,
            reordered,
        }
    }

    /// Everything still in flight, ordered by due round.
    pub fn drain_all(&mut self) -> Vec<Arc<Block>> {
        let mut pending = std::mem::take(&mut self.pending);
        pending.sort_by_key(|pending| pending.deliver_at_round);
        pending.into_iter().map(|pending| pending.block).collect()
    }
}
