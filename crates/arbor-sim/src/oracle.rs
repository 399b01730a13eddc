use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::fmt;

use arbor_core::{BlockId, ChainId, ContentId};

use crate::SimulationResult;

// ---------------------------------------------------------------------------
// Result types
// ---------------------------------------------------------------------------

/// Outcome of one or more invariant checks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OracleResult {
    /// `true` iff no violations were found.
    pub passed: bool,
    pub violations: Vec<InvariantViolation>,
}

impl OracleResult {
    const fn pass() -> Self {
        Self {
            passed: true,
            violations: Vec::new(),
        }
    }

    fn from_violations(violations: Vec<InvariantViolation>) -> Self {
        Self {
            passed: violations.is_empty(),
            violations,
        }
    }

    /// Accumulate another result's failures into this one.
    #[must_use]
    fn merge(mut self, other: Self) -> Self {
        if !other.passed {
            self.passed = false;
            self.violations.extend(other.violations);
        }
        self
    }
}

/// One broken invariant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InvariantViolation {
    /// A block appeared twice in the global order.
    DuplicateLinearized { block: BlockId, first_seq: usize, again_seq: usize },
    /// The global order went backwards in rank.
    RankRegression { seq: usize, previous: u64, current: u64 },
    /// A linearized block was never reported finalized.
    NotFinalized { block: BlockId },
    /// A chain reported the same block finalized twice.
    FinalizedTwice { block: BlockId },
    /// A finalized block's parent is neither finalized nor the root genesis.
    DetachedFinalized { block: BlockId, parent: Option<BlockId> },
    /// A live item is neither pending nor carried by a finalized block.
    ContentLost { content: ContentId },
    /// An item is pending in more than one store.
    ContentInManyStores { content: ContentId, chains: Vec<ChainId> },
    /// A finalized item is still pending somewhere.
    ContentNotConsumed { content: ContentId, chain: ChainId },
    /// An invalidated item is still pending somewhere.
    InvalidatedStillPending { content: ContentId, chain: ChainId },
    /// A finalized block below the confirm bar was left undelivered.
    UndeliveredBelowBar { chain: ChainId, rank: u64, bar: u64 },
    /// A live chain is not linked from a live parent.
    DetachedChain { chain: ChainId },
}

impl fmt::Display for InvariantViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DuplicateLinearized {
                block,
                first_seq,
                again_seq,
            } => write!(
                f,
                "DuplicateLinearized: block {block} at seq {first_seq} and again at seq {again_seq}"
            ),
            Self::RankRegression {
                seq,
                previous,
                current,
            } => write!(
                f,
                "RankRegression: seq {seq} has rank {current} after rank {previous}"
            ),
            Self::NotFinalized { block } => {
                write!(f, "NotFinalized: block {block} was linearized without finalizing")
            }
            Self::FinalizedTwice { block } => {
                write!(f, "FinalizedTwice: block {block} finalized more than once")
            }
            Self::DetachedFinalized { block, parent } => match parent {
                Some(parent) => write!(
                    f,
                    "DetachedFinalized: block {block} finalized on unfinalized parent {parent}"
                ),
                None => write!(f, "DetachedFinalized: block {block} has no parent"),
            },
            Self::ContentLost { content } => {
                write!(f, "ContentLost: item {content} is neither pending nor finalized")
            }
            Self::ContentInManyStores { content, chains } => {
                write!(f, "ContentInManyStores: item {content} pending in chains {chains:?}")
            }
            Self::ContentNotConsumed { content, chain } => write!(
                f,
                "ContentNotConsumed: finalized item {content} still pending in chain {chain}"
            ),
            Self::InvalidatedStillPending { content, chain } => write!(
                f,
                "InvalidatedStillPending: item {content} still pending in chain {chain}"
            ),
            Self::UndeliveredBelowBar { chain, rank, bar } => write!(
                f,
                "UndeliveredBelowBar: chain {chain} holds rank {rank} below bar {bar}"
            ),
            Self::DetachedChain { chain } => {
                write!(f, "DetachedChain: chain {chain} is not linked from a live parent")
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Oracle
// ---------------------------------------------------------------------------

/// Invariant checks over the final state of a simulation.
///
/// # Invariants checked
///
/// 1. **Exactly once**: no block appears twice in the global order.
/// 2. **Rank order**: linearized `rank.current` never decreases.
/// 3. **Finalized only**: every linearized block was finalized by its chain,
///    and no chain finalized a block twice.
/// 4. **Finalized ancestry**: every finalized block extends a finalized
///    block or the root genesis.
/// 5. **Content conservation**: every submitted, non-invalidated item is
///    either carried by a finalized block or pending in exactly one store.
/// 6. **Linearizer progress**: after settling, nothing below the confirm
///    bar is left undelivered.
/// 7. **Tree shape**: every live non-root chain is a child of a live chain.
pub struct LedgerOracle;

impl LedgerOracle {
    #[must_use]
    pub fn check_all(result: &SimulationResult) -> OracleResult {
        OracleResult::pass()
            .merge(Self::check_exactly_once(result))
            .merge(Self::check_rank_order(result))
            .merge(Self::check_finalized_only(result))
            .merge(Self::check_finalized_ancestry(result))
            .merge(Self::check_content_conservation(result))
            .merge(Self::check_linearizer_progress(result))
            .merge(Self::check_tree_shape(result))
    }

    #[must_use]
    pub fn check_exactly_once(result: &SimulationResult) -> OracleResult {
        let mut seen: BTreeMap<BlockId, usize> = BTreeMap::new();
        let mut violations = Vec::new();
        for (seq, block) in result.linearized.iter().enumerate() {
            if let Some(&first_seq) = seen.get(&block.id()) {
                violations.push(InvariantViolation::DuplicateLinearized {
                    block: block.id(),
                    first_seq,
                    again_seq: seq,
                });
            } else {
                seen.insert(block.id(), seq);
            }
        }
        OracleResult::from_violations(violations)
    }

    #[must_use]
    pub fn check_rank_order(result: &SimulationResult) -> OracleResult {
        let violations = result
            .linearized
            .windows(2)
            .enumerate()
            .filter(|(_, pair)| pair[1].rank().current < pair[0].rank().current)
            .map(|(index, pair)| InvariantViolation::RankRegression {
                seq: index + 1,
                previous: pair[0].rank().current,
                current: pair[1].rank().current,
            })
            .collect();
        OracleResult::from_violations(violations)
    }

    #[must_use]
    pub fn check_finalized_only(result: &SimulationResult) -> OracleResult {
        let mut violations = Vec::new();
        let mut finalized = HashSet::new();
        for (_, block) in &result.finalized {
            if !finalized.insert(*block) {
                violations.push(InvariantViolation::FinalizedTwice { block: *block });
            }
        }
        for block in &result.linearized {
            if !finalized.contains(&block.id()) {
                violations.push(InvariantViolation::NotFinalized { block: block.id() });
            }
        }
        OracleResult::from_violations(violations)
    }

    #[must_use]
    pub fn check_finalized_ancestry(result: &SimulationResult) -> OracleResult {
        let finalized: HashSet<BlockId> = result.finalized.iter().map(|(_, id)| *id).collect();
        let violations = result
            .finalized
            .iter()
            .filter_map(|(_, id)| {
                let parent = result.blocks.get(id).and_then(|block| block.parent());
                let attached = parent
                    .is_some_and(|p| p == result.root_genesis || finalized.contains(&p));
                (!attached).then_some(InvariantViolation::DetachedFinalized { block: *id, parent })
            })
            .collect();
        OracleResult::from_violations(violations)
    }

    #[must_use]
    pub fn check_content_conservation(result: &SimulationResult) -> OracleResult {
        let consumed: BTreeSet<ContentId> = result
            .finalized
            .iter()
            .filter_map(|(_, id)| result.blocks.get(id))
            .flat_map(|block| block.content().iter().map(|item| item.id))
            .collect();

        let mut holders: BTreeMap<ContentId, Vec<ChainId>> = BTreeMap::new();
        for chain in &result.chains {
            for content in &chain.pending {
                holders.entry(*content).or_default().push(chain.id);
            }
        }

        let mut violations = Vec::new();
        for (content, chains) in &holders {
            if chains.len() > 1 {
                violations.push(InvariantViolation::ContentInManyStores {
                    content: *content,
                    chains: chains.clone(),
                });
            }
            if consumed.contains(content) {
                violations.push(InvariantViolation::ContentNotConsumed {
                    content: *content,
                    chain: chains[0],
                });
            }
            if result.invalidated_content.contains(content) {
                violations.push(InvariantViolation::InvalidatedStillPending {
                    content: *content,
                    chain: chains[0],
                });
            }
        }

        for content in result
            .submitted_content
            .difference(&result.invalidated_content)
        {
            if !holders.contains_key(content) && !consumed.contains(content) {
                violations.push(InvariantViolation::ContentLost { content: *content });
            }
        }
        OracleResult::from_violations(violations)
    }

    #[must_use]
    pub fn check_linearizer_progress(result: &SimulationResult) -> OracleResult {
        let violations = result
            .chains
            .iter()
            .filter_map(|chain| {
                let rank = chain.undelivered_head?;
                (rank < result.final_bar).then_some(InvariantViolation::UndeliveredBelowBar {
                    chain: chain.id,
                    rank,
                    bar: result.final_bar,
                })
            })
            .collect();
        OracleResult::from_violations(violations)
    }

    #[must_use]
    pub fn check_tree_shape(result: &SimulationResult) -> OracleResult {
        let by_id: BTreeMap<ChainId, &crate::ChainSnapshot> =
            result.chains.iter().map(|chain| (chain.id, chain)).collect();
        let violations = result
            .chains
            .iter()
            .filter(|chain| !chain.retired && !chain.id.is_root())
            .filter(|chain| {
                let linked = chain
                    .id
                    .parent()
                    .and_then(|parent| by_id.get(&parent))
                    .is_some_and(|parent| {
                        !parent.retired
                            && parent.children.is_some_and(|kids| kids.contains(&chain.id))
                    });
                !linked
            })
            .map(|chain| InvariantViolation::DetachedChain { chain: chain.id })
            .collect();
        OracleResult::from_violations(violations)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use arbor_core::{Block, BlockDraft, ContentRef, Rank};

    use super::*;
    use crate::{ChainSnapshot, SimulationResult, SimulationStats};

    fn empty_result() -> SimulationResult {
        SimulationResult {
            trace: Vec::new(),
            stats: SimulationStats::default(),
            root_genesis: BlockId::from_label("genesis"),
            blocks: BTreeMap::new(),
            finalized: Vec::new(),
            linearized: Vec::new(),
            submitted_content: BTreeSet::new(),
            invalidated_content: BTreeSet::new(),
            chains: vec![ChainSnapshot {
                id: ChainId::ROOT,
                retired: false,
                children: None,
                pending: BTreeSet::new(),
                undelivered_head: None,
            }],
            final_bar: 0,
            interesting_state_reached: false,
        }
    }

    fn block(prev: BlockId, rank: u64, content: Vec<ContentRef>) -> Arc<Block> {
        Arc::new(Block::new(
            BlockDraft::extending(ChainId::ROOT, prev, Rank::new(rank, rank + 1)).content(content),
        ))
    }

    /// A root chain that finalized and linearized `a` then `b`.
    fn two_block_result() -> (SimulationResult, Arc<Block>, Arc<Block>) {
        let mut result = empty_result();
        let a = block(result.root_genesis, 1, Vec::new());
        let b = block(a.id(), 2, Vec::new());
        for block in [&a, &b] {
            result.blocks.insert(block.id(), Arc::clone(block));
            result.finalized.push((ChainId::ROOT, block.id()));
            result.linearized.push(Arc::clone(block));
        }
        result.final_bar = 3;
        (result, a, b)
    }

    #[test]
    fn clean_run_passes() {
        let (result, _, _) = two_block_result();
        let oracle = LedgerOracle::check_all(&result);
        assert!(oracle.passed, "{:?}", oracle.violations);
    }

    #[test]
    fn duplicates_and_regressions_are_reported() {
        let (mut result, a, _) = two_block_result();
        result.linearized.push(a);
        let oracle = LedgerOracle::check_all(&result);
        assert!(!oracle.passed);
        assert!(oracle.violations.iter().any(|v| matches!(
            v,
            InvariantViolation::DuplicateLinearized {
                first_seq: 0,
                again_seq: 2,
                ..
            }
        )));
        assert!(oracle.violations.iter().any(|v| matches!(
            v,
            InvariantViolation::RankRegression {
                seq: 2,
                previous: 2,
                current: 1
            }
        )));
    }

    #[test]
    fn unfinalized_and_detached_blocks_are_reported() {
        let (mut result, _, _) = two_block_result();
        let orphan = block(BlockId::from_label("elsewhere"), 5, Vec::new());
        result.blocks.insert(orphan.id(), Arc::clone(&orphan));
        result.linearized.push(Arc::clone(&orphan));

        let only = LedgerOracle::check_finalized_only(&result);
        assert_eq!(
            only.violations,
            vec![InvariantViolation::NotFinalized { block: orphan.id() }]
        );

        result.finalized.push((ChainId::ROOT, orphan.id()));
        let ancestry = LedgerOracle::check_finalized_ancestry(&result);
        assert_eq!(ancestry.violations.len(), 1);
    }

    #[test]
    fn content_must_be_pending_once_or_consumed() {
        let mut result = empty_result();
        let kept = ContentId::from_label("kept");
        let used = ContentId::from_label("used");
        let lost = ContentId::from_label("lost");
        let dropped = ContentId::from_label("dropped");
        result.submitted_content = [kept, used, lost, dropped].into_iter().collect();
        result.invalidated_content.insert(dropped);
        result.chains[0].pending.insert(kept);

        let carrier = block(result.root_genesis, 1, vec![ContentRef { id: used, size: 4 }]);
        result.blocks.insert(carrier.id(), Arc::clone(&carrier));
        result.finalized.push((ChainId::ROOT, carrier.id()));

        let oracle = LedgerOracle::check_content_conservation(&result);
        assert_eq!(
            oracle.violations,
            vec![InvariantViolation::ContentLost { content: lost }]
        );

        result.chains[0].pending.insert(used);
        let oracle = LedgerOracle::check_content_conservation(&result);
        assert!(oracle.violations.contains(&InvariantViolation::ContentNotConsumed {
            content: used,
            chain: ChainId::ROOT,
        }));
    }

    #[test]
    fn stranded_blocks_and_detached_chains_are_reported() {
        let mut result = empty_result();
        result.final_bar = 10;
        result.chains[0].undelivered_head = Some(4);
        result.chains.push(ChainSnapshot {
            id: ChainId::new(2).unwrap(),
            retired: false,
            children: None,
            pending: BTreeSet::new(),
            undelivered_head: None,
        });

        let oracle = LedgerOracle::check_all(&result);
        assert_eq!(oracle.violations.len(), 2);
        assert!(oracle.violations[0].to_string().starts_with("UndeliveredBelowBar"));
        assert!(oracle.violations[1].to_string().starts_with("DetachedChain"));
    }
}
