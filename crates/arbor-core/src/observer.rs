//! Outbound notifications.
//!
//! Chain callbacks fire on the submitting thread after the chain's write lock
//! has been released, in the order the events happened. Linearization
//! callbacks fire on whichever thread ran the tree pass.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::block::{Block, BlockId};
use crate::chain::ChainId;

pub trait LedgerObserver: Send + Sync {
    /// A block entered a chain's fork graph with `weight` cumulative weight.
    fn on_non_finalized_block(&self, _chain: ChainId, _block: &Block, _weight: u64) {}

    /// One fork-graph step finalized `ordered` (oldest first) and pruned
    /// `discarded`.
    fn on_finalized(&self, _chain: ChainId, _ordered: &[BlockId], _discarded: &[BlockId]) {}

    /// `block` took position `seq` in the global order.
    fn on_linearized(&self, _seq: u64, _block: &Block) {}
}

/// Observer that records every event, for tests and the simulator.
#[derive(Debug, Default)]
pub struct RecordingObserver {
    events: Mutex<Vec<ObservedEvent>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ObservedEvent {
    NonFinalized {
        chain: ChainId,
        block: BlockId,
        weight: u64,
    },
    Finalized {
        chain: ChainId,
        ordered: Vec<BlockId>,
        discarded: Vec<BlockId>,
    },
    Linearized {
        seq: u64,
        block: Arc<Block>,
    },
}

impl RecordingObserver {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn events(&self) -> Vec<ObservedEvent> {
        self.events.lock().clone()
    }

    /// Linearized blocks in delivery order.
    #[must_use]
    pub fn linearized(&self) -> Vec<Arc<Block>> {
        self.events
            .lock()
            .iter()
            .filter_map(|event| match event {
                ObservedEvent::Linearized { block, .. } => Some(Arc::clone(block)),
                _ => None,
            })
            .collect()
    }

    /// Every id reported finalized, in report order.
    #[must_use]
    pub fn finalized(&self) -> Vec<BlockId> {
        self.events
            .lock()
            .iter()
            .filter_map(|event| match event {
                ObservedEvent::Finalized { ordered, .. } => Some(ordered.clone()),
                _ => None,
            })
            .flatten()
            .collect()
    }

    /// Every id reported pruned.
    #[must_use]
    pub fn discarded(&self) -> Vec<BlockId> {
        self.events
            .lock()
            .iter()
            .filter_map(|event| match event {
                ObservedEvent::Finalized { discarded, .. } => Some(discarded.clone()),
                _ => None,
            })
            .flatten()
            .collect()
    }
}

impl LedgerObserver for RecordingObserver {
    fn on_non_finalized_block(&self, chain: ChainId, block: &Block, weight: u64) {
        self.events.lock().push(ObservedEvent::NonFinalized {
            chain,
            block: block.id(),
            weight,
        });
    }

    fn on_finalized(&self, chain: ChainId, ordered: &[BlockId], discarded: &[BlockId]) {
        self.events.lock().push(ObservedEvent::Finalized {
            chain,
            ordered: ordered.to_vec(),
            discarded: discarded.to_vec(),
        });
    }

    fn on_linearized(&self, seq: u64, block: &Block) {
        self.events.lock().push(ObservedEvent::Linearized {
            seq,
            block: Arc::new(block.clone()),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recording_observer_splits_event_kinds() {
        let observer = RecordingObserver::new();
        let genesis = Block::genesis(ChainId::ROOT);
        let a = BlockId::from_label("a");
        let b = BlockId::from_label("b");

        observer.on_non_finalized_block(ChainId::ROOT, &genesis, 0);
        observer.on_finalized(ChainId::ROOT, &[a], &[b]);
        observer.on_linearized(0, &genesis);

        assert_eq!(observer.events().len(), 3);
        assert_eq!(observer.finalized(), vec![a]);
        assert_eq!(observer.discarded(), vec![b]);
        assert_eq!(observer.linearized()[0].id(), genesis.id());
    }
}
