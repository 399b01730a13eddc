use std::collections::BTreeMap;
use std::sync::Arc;

use arbor_core::{Block, ChainId, LedgerTree, Proposal, Rank};

use crate::rng::DeterministicRng;

/// A block built by a proposer, with whether it deliberately forked.
#[derive(Debug, Clone)]
pub struct ProposedBlock {
    pub block: Arc<Block>,
    pub forked: bool,
}

/// Stand-in for the external election module.
///
/// Each round a proposer picks a chain, asks it for a proposal template and
/// ranks the block with the round number. Some of the time it reuses the
/// template from its previous turn on that chain instead, so the block
/// extends an older tip and forks.
#[derive(Debug, Clone)]
pub struct SimulatedProposer {
    name: String,
    fork_rate_percent: u8,
    explore_rate_percent: u8,
    last: BTreeMap<ChainId, Proposal>,
    proposed: u64,
}

impl SimulatedProposer {
    #[must_use]
    pub fn new(index: usize, fork_rate_percent: u8, explore_rate_percent: u8) -> Self {
        Self {
            name: format!("proposer-{index}"),
            fork_rate_percent,
            explore_rate_percent,
            last: BTreeMap::new(),
            proposed: 0,
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub const fn proposed(&self) -> u64 {
        self.proposed
    }

    /// Build one block for `round`, or nothing if no chain is open.
    ///
    /// Young chains are hidden from the available set until they finalize,
    /// so some turns pick among every live chain instead.
    pub fn propose(
        &mut self,
        tree: &LedgerTree,
        round: u64,
        max_batch_size: u64,
        rng: &mut DeterministicRng,
    ) -> Option<ProposedBlock> {
        let candidates = if rng.hit_rate_percent(self.explore_rate_percent) {
            tree.chain_ids()
                .into_iter()
                .filter(|id| tree.chain(*id).is_some_and(|chain| !chain.is_retired()))
                .collect()
        } else {
            tree.get_available_chains()
        };
        let chain_id = *rng.pick(&candidates)?;
        let fresh = tree.prepare_proposal(chain_id, max_batch_size).ok()?;
        let stale = self.last.insert(chain_id, fresh.clone());
        let (proposal, forked) = match stale {
            Some(stale)
                if stale.previous != fresh.previous
                    && rng.hit_rate_percent(self.fork_rate_percent) =>
            {
                (stale, true)
            }
            _ => (fresh, false),
        };

        let current = round.max(proposal.min_rank);
        let draft = proposal
            .draft(Rank::new(current, current + 1))
            .proposer(&format!("{}#{}", self.name, self.proposed));
        let block = Arc::new(Block::new(draft));
        self.proposed += 1;
        Some(ProposedBlock { block, forked })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arbor_core::LedgerConfig;

    #[test]
    fn first_proposal_extends_the_root_genesis() {
        let tree = LedgerTree::with_config(LedgerConfig::default()).unwrap();
        let mut proposer = SimulatedProposer::new(0, 0, 0);
        let mut rng = DeterministicRng::new(1);

        let proposed = proposer.propose(&tree, 4, 1 << 20, &mut rng).unwrap();
        assert!(!proposed.forked);
        assert_eq!(proposed.block.chain(), ChainId::ROOT);
        assert_eq!(proposed.block.parent(), Some(tree.root().genesis()));
        assert_eq!(proposed.block.rank(), Rank::new(4, 5));
        assert_eq!(proposer.proposed(), 1);
    }

    #[test]
    fn stale_templates_fork_once_the_tip_moves() {
        let tree = LedgerTree::with_config(LedgerConfig::default()).unwrap();
        let mut proposer = SimulatedProposer::new(1, 100, 0);
        let mut rng = DeterministicRng::new(2);

        let first = proposer.propose(&tree, 1, 1 << 20, &mut rng).unwrap();
        assert!(tree.submit_block(Arc::clone(&first.block)).is_accepted());

        let second = proposer.propose(&tree, 2, 1 << 20, &mut rng).unwrap();
        assert!(second.forked);
        assert_eq!(second.block.parent(), first.block.parent());
        assert_ne!(second.block.id(), first.block.id());
    }
}
