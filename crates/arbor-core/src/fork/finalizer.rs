//! Per-chain fork graph with weight-gap finalization and dead-fork pruning.
//!
//! The graph is an arena keyed by [`BlockId`]: every [`ForkNode`] stores its
//! previous ids and the ids of the nodes that followed it. Pruning and
//! finalization are map removals, so no node ever outlives the graph's view
//! of it.
//!
//! # Finalization rule
//!
//! With a finalization weight `W`, the follower of the last finalized node is
//! finalized once the heaviest tip leads it by at least `W`, but only while
//! the last finalized node has exactly one follower. A branch point halts
//! the walk until pruning removes the competing branch. This is conservative:
//! a follower can already be unbeatable while a doomed sibling branch is still
//! within `W` of the best tip, and the chain then waits for that sibling to
//! fall a full `W` behind.
//!
//! # Pruning rule
//!
//! Any tip whose weight trails the heaviest tip by at least `W` is a dead
//! fork. Nodes are removed walking backwards from that tip until reaching an
//! ancestor that still has another follower.
//!
//! The finalizer is not synchronized; [`ChainController`] serializes access.
//!
//! [`ChainController`]: crate::chain::ChainController

use std::collections::{BTreeSet, HashMap, HashSet};

use crate::block::BlockId;
use crate::error::LedgerError;

// ---------------------------------------------------------------------------
// ForkNode
// ---------------------------------------------------------------------------

/// A live node of the fork graph.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForkNode {
    pub id: BlockId,
    /// One id, or none for the chain's genesis.
    pub previous: Vec<BlockId>,
    /// Ids of nodes that attached to this one.
    pub following: BTreeSet<BlockId>,
    /// Cumulative weight from the genesis.
    pub weight: u64,
}

/// Result of one [`ForkFinalizer::add_block`] call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FinalizationStep {
    /// Newly finalized ids, oldest first.
    pub finalized: Vec<BlockId>,
    /// Ids removed as part of dead forks.
    pub pruned: Vec<BlockId>,
}

impl FinalizationStep {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.finalized.is_empty() && self.pruned.is_empty()
    }
}

// ---------------------------------------------------------------------------
// ForkFinalizer
// ---------------------------------------------------------------------------

/// Fork-choice and finalization state for one chain.
#[derive(Debug, Clone)]
pub struct ForkFinalizer {
    nodes: HashMap<BlockId, ForkNode>,
    tips: BTreeSet<BlockId>,
    priority_tip: BlockId,
    last_finalized: BlockId,
    finalized_weight: u64,
    finalized_count: u64,
    history: Option<Vec<(BlockId, u64)>>,
}

impl ForkFinalizer {
    /// Create a graph holding only `genesis` at weight zero.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::InvalidArgument`] if `finalized_weight` is zero:
    /// every tip would trail the heaviest tip by at least zero.
    pub fn new(genesis: BlockId, finalized_weight: u64) -> Result<Self, LedgerError> {
        if finalized_weight == 0 {
            return Err(LedgerError::InvalidArgument(
                "finalized_weight must be at least 1".into(),
            ));
        }

        let mut nodes = HashMap::new();
        nodes.insert(
            genesis,
            ForkNode {
                id: genesis,
                previous: Vec::new(),
                following: BTreeSet::new(),
                weight: 0,
            },
        );

        Ok(Self {
            nodes,
            tips: BTreeSet::from([genesis]),
            priority_tip: genesis,
            last_finalized: genesis,
            finalized_weight,
            finalized_count: 0,
            history: None,
        })
    }

    /// Keep every finalized id and its weight for introspection.
    #[must_use]
    pub fn with_history(mut self) -> Self {
        self.history = Some(Vec::new());
        self
    }

    /// Attach `id` after `prev_id` and run pruning and finalization.
    ///
    /// # Errors
    ///
    /// - [`LedgerError::BlockNotFound`] if `prev_id` is not a live node.
    /// - [`LedgerError::InvalidArgument`] if `id` is already a live node.
    pub fn add_block(
        &mut self,
        id: BlockId,
        prev_id: BlockId,
        incremental_weight: u64,
    ) -> Result<FinalizationStep, LedgerError> {
        if self.nodes.contains_key(&id) {
            return Err(LedgerError::InvalidArgument(format!(
                "block {id} is already in the fork graph"
            )));
        }
        let parent = self
            .nodes
            .get_mut(&prev_id)
            .ok_or(LedgerError::BlockNotFound(prev_id))?;

        let weight = parent.weight.saturating_add(incremental_weight);
        parent.following.insert(id);
        self.tips.remove(&prev_id);
        self.tips.insert(id);
        self.nodes.insert(
            id,
            ForkNode {
                id,
                previous: vec![prev_id],
                following: BTreeSet::new(),
                weight,
            },
        );

        let priority_weight = self.weight_of(&self.priority_tip);
        if weight > priority_weight || prev_id == self.priority_tip {
            self.priority_tip = id;
        }

        let max_tip_weight = self.max_tip_weight();
        let pruned = self.prune_dead_forks(max_tip_weight);
        let finalized = self.advance_finalized(max_tip_weight);

        Ok(FinalizationStep { finalized, pruned })
    }

    fn weight_of(&self, id: &BlockId) -> u64 {
        self.nodes.get(id).map_or(0, |node| node.weight)
    }

    fn max_tip_weight(&self) -> u64 {
        self.tips
            .iter()
            .map(|tip| self.weight_of(tip))
            .max()
            .unwrap_or(0)
    }

    fn prune_dead_forks(&mut self, max_tip_weight: u64) -> Vec<BlockId> {
        let dead: Vec<BlockId> = self
            .tips
            .iter()
            .filter(|tip| **tip != self.priority_tip)
            .filter(|tip| max_tip_weight.saturating_sub(self.weight_of(tip)) >= self.finalized_weight)
            .copied()
            .collect();

        let mut pruned = Vec::new();
        for tip in dead {
            self.prune_from(tip, &mut pruned);
        }
        pruned
    }

    fn prune_from(&mut self, tip: BlockId, pruned: &mut Vec<BlockId>) {
        let mut current = tip;
        loop {
            let Some(node) = self.nodes.remove(&current) else {
                break;
            };
            self.tips.remove(&current);
            pruned.push(current);

            let Some(&prev) = node.previous.first() else {
                break;
            };
            let Some(parent) = self.nodes.get_mut(&prev) else {
                break;
            };
            parent.following.remove(&current);

            let keep_parent = !parent.following.is_empty()
                || prev == self.last_finalized
                || prev == self.priority_tip;
            if keep_parent {
                if parent.following.is_empty() {
                    self.tips.insert(prev);
                }
                break;
            }
            current = prev;
        }
    }

    fn advance_finalized(&mut self, max_tip_weight: u64) -> Vec<BlockId> {
        let mut finalized = Vec::new();
        loop {
            let Some(anchor) = self.nodes.get(&self.last_finalized) else {
                break;
            };
            if anchor.following.len() != 1 {
                break;
            }
            let Some(&next) = anchor.following.first() else {
                break;
            };
            let next_weight = self.weight_of(&next);
            if max_tip_weight.saturating_sub(next_weight) < self.finalized_weight {
                break;
            }

            self.nodes.remove(&self.last_finalized);
            self.last_finalized = next;
            self.finalized_count += 1;
            if let Some(history) = self.history.as_mut() {
                history.push((next, next_weight));
            }
            finalized.push(next);
        }
        finalized
    }

    // -----------------------------------------------------------------------
    // Queries
    // -----------------------------------------------------------------------

    /// Returns `true` if `id` is a live node.
    #[must_use]
    pub fn contains(&self, id: &BlockId) -> bool {
        self.nodes.contains_key(id)
    }

    #[must_use]
    pub fn node(&self, id: &BlockId) -> Option<&ForkNode> {
        self.nodes.get(id)
    }

    /// Number of live nodes, including the last finalized anchor.
    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    #[must_use]
    pub const fn finalized_weight(&self) -> u64 {
        self.finalized_weight
    }

    #[must_use]
    pub const fn priority_tip(&self) -> BlockId {
        self.priority_tip
    }

    #[must_use]
    pub const fn last_finalized(&self) -> BlockId {
        self.last_finalized
    }

    #[must_use]
    pub const fn finalized_count(&self) -> u64 {
        self.finalized_count
    }

    /// Finalized ids with their weights, if history recording is enabled.
    #[must_use]
    pub fn finalized_history(&self) -> Option<&[(BlockId, u64)]> {
        self.history.as_deref()
    }

    /// Current tips in id order.
    #[must_use]
    pub fn tips(&self) -> Vec<BlockId> {
        self.tips.iter().copied().collect()
    }

    /// Head references for the next proposal: the priority tip alone.
    #[must_use]
    pub fn get_block_r(&self) -> Vec<BlockId> {
        vec![self.priority_tip]
    }

    /// Cumulative weight of a live node.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::BlockNotFound`] for unknown or removed ids.
    pub fn get_weight(&self, id: &BlockId) -> Result<u64, LedgerError> {
        self.nodes
            .get(id)
            .map(|node| node.weight)
            .ok_or(LedgerError::BlockNotFound(*id))
    }

    /// Whether `id` leads to a tip of maximum weight.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::BlockNotFound`] for unknown or removed ids.
    pub fn is_in_longest_chain(&self, id: &BlockId) -> Result<bool, LedgerError> {
        if !self.nodes.contains_key(id) {
            return Err(LedgerError::BlockNotFound(*id));
        }
        let max_tip_weight = self.max_tip_weight();

        let mut stack = vec![*id];
        let mut visited = HashSet::new();
        while let Some(current) = stack.pop() {
            if !visited.insert(current) {
                continue;
            }
            let Some(node) = self.nodes.get(&current) else {
                continue;
            };
            if node.following.is_empty() {
                if self.tips.contains(&current) && node.weight == max_tip_weight {
                    return Ok(true);
                }
            } else {
                stack.extend(node.following.iter().copied());
            }
        }
        Ok(false)
    }

    /// Ids exactly `distance` hops forward from `id`.
    ///
    /// # Errors
    ///
    /// - [`LedgerError::InvalidArgument`] if `distance` is negative.
    /// - [`LedgerError::BlockNotFound`] if `id` is not live.
    pub fn get_following(
        &self,
        id: &BlockId,
        distance: i64,
    ) -> Result<BTreeSet<BlockId>, LedgerError> {
        if distance < 0 {
            return Err(LedgerError::InvalidArgument(format!(
                "distance must be >= 0, got {distance}"
            )));
        }
        if !self.nodes.contains_key(id) {
            return Err(LedgerError::BlockNotFound(*id));
        }

        let mut frontier = BTreeSet::from([*id]);
        for _ in 0..distance {
            frontier = frontier
                .iter()
                .filter_map(|current| self.nodes.get(current))
                .flat_map(|node| node.following.iter().copied())
                .collect();
            if frontier.is_empty() {
                break;
            }
        }
        Ok(frontier)
    }

    /// Walk `depth` steps backwards from each reference.
    ///
    /// A walk that reaches the last finalized anchor stops there, so the
    /// result always holds live ids.
    ///
    /// # Errors
    ///
    /// - [`LedgerError::InvalidArgument`] if `depth` is negative.
    /// - [`LedgerError::BlockNotFound`] if any reference is not live.
    pub fn get_fork_blocks(
        &self,
        refs: &[BlockId],
        depth: i64,
    ) -> Result<BTreeSet<BlockId>, LedgerError> {
        if depth < 0 {
            return Err(LedgerError::InvalidArgument(format!(
                "depth must be >= 0, got {depth}"
            )));
        }

        let mut result = BTreeSet::new();
        for reference in refs {
            let mut node = self
                .nodes
                .get(reference)
                .ok_or(LedgerError::BlockNotFound(*reference))?;
            for _ in 0..depth {
                let Some(prev) = node.previous.first().and_then(|p| self.nodes.get(p)) else {
                    break;
                };
                node = prev;
            }
            result.insert(node.id);
        }
        Ok(result)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
