//! Buffering of blocks whose previous references have not arrived yet.
//!
//! A block that references unknown ids is registered under each missing id.
//! When a block becomes applicable, [`BlockScheduler::get_valid_ordering`]
//! releases it together with every dependent whose declared previous ids are
//! all resolved, transitively, parents strictly before children.
//!
//! Buffering is unbounded here. Discarding stale entries is the job of an
//! external timeout collaborator through [`BlockScheduler::discard`].

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use crate::block::{Block, BlockId};

/// Anything with an id and declared previous ids.
pub trait Linked {
    fn id(&self) -> BlockId;
    fn previous(&self) -> &[BlockId];
}

impl Linked for Block {
    fn id(&self) -> BlockId {
        Self::id(self)
    }

    fn previous(&self) -> &[BlockId] {
        Self::previous(self)
    }
}

/// Missing-dependency index for out-of-order blocks.
#[derive(Debug)]
pub struct BlockScheduler<B = Block> {
    /// missing id → blocks waiting on it.
    waiting: HashMap<BlockId, Vec<Arc<B>>>,
}

impl<B> Default for BlockScheduler<B> {
    fn default() -> Self {
        Self {
            waiting: HashMap::new(),
        }
    }
}

impl<B: Linked> BlockScheduler<B> {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `block` under every id in `missing_prev_ids`.
    pub fn submit_unordered_block(&mut self, block: Arc<B>, missing_prev_ids: &[BlockId]) {
        for missing in missing_prev_ids {
            let waiters = self.waiting.entry(*missing).or_default();
            if !waiters.iter().any(|w| w.id() == block.id()) {
                waiters.push(Arc::clone(&block));
            }
        }
    }

    /// `ready` followed by every dependent it transitively unblocks.
    ///
    /// A dependent is released only when none of its previous ids is still
    /// registered as missing.
    pub fn get_valid_ordering(&mut self, ready: Arc<B>) -> Vec<Arc<B>> {
        let mut stack = vec![ready.id()];
        let mut released = HashSet::from([ready.id()]);
        let mut ordering = vec![ready];

        while let Some(resolved) = stack.pop() {
            let Some(dependents) = self.waiting.remove(&resolved) else {
                continue;
            };
            for dependent in dependents {
                let satisfied = dependent
                    .previous()
                    .iter()
                    .all(|prev| !self.waiting.contains_key(prev));
                if satisfied && released.insert(dependent.id()) {
                    stack.push(dependent.id());
                    ordering.push(dependent);
                }
            }
        }

        ordering
    }

    /// Whether some buffered block is waiting on `id`.
    #[must_use]
    pub fn is_missing(&self, id: &BlockId) -> bool {
        self.waiting.contains_key(id)
    }

    /// Number of distinct missing ids.
    #[must_use]
    pub fn missing_len(&self) -> usize {
        self.waiting.len()
    }

    /// Drop `block` from the index together with everything that waits on it.
    ///
    /// Returns the dependents removed along with it (not `block` itself).
    pub fn discard(&mut self, block: &B) -> Vec<Arc<B>> {
        let mut seen = HashSet::from([block.id()]);
        self.unregister(block.id(), block.previous());

        let mut discarded = Vec::new();
        let mut stack = vec![block.id()];
        while let Some(id) = stack.pop() {
            let Some(dependents) = self.waiting.remove(&id) else {
                continue;
            };
            for dependent in dependents {
                if seen.insert(dependent.id()) {
                    self.unregister(dependent.id(), dependent.previous());
                    stack.push(dependent.id());
                    discarded.push(dependent);
                }
            }
        }
        discarded
    }

    fn unregister(&mut self, id: BlockId, previous: &[BlockId]) {
        for prev in previous {
            if let Some(waiters) = self.waiting.get_mut(prev) {
                waiters.retain(|w| w.id() != id);
                if waiters.is_empty() {
                    self.waiting.remove(prev);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug)]
    struct Node {
        id: BlockId,
        previous: Vec<BlockId>,
    }

    impl Linked for Node {
        fn id(&self) -> BlockId {
            self.id
        }

        fn previous(&self) -> &[BlockId] {
            &self.previous
        }
    }

    fn id(label: &str) -> BlockId {
        BlockId::from_label(label)
    }

    fn node(label: &str, parents: &[&str]) -> Arc<Node> {
        Arc::new(Node {
            id: id(label),
            previous: parents.iter().map(|p| id(p)).collect(),
        })
    }

    fn ids(ordering: &[Arc<Node>]) -> Vec<BlockId> {
        ordering.iter().map(|n| n.id).collect()
    }

    #[test]
    fn dependency_free_block_is_alone() {
        let mut scheduler = BlockScheduler::new();
        let ordering = scheduler.get_valid_ordering(node("A", &["Z"]));
        assert_eq!(ids(&ordering), vec![id("A")]);
    }

    #[test]
    fn reverse_submission_resolves_parent_first() {
        let mut scheduler = BlockScheduler::new();
        let labels: Vec<String> = (0..8).map(|i| format!("N{i}")).collect();
        for i in (1..labels.len()).rev() {
            let parent = labels[i - 1].as_str();
            scheduler.submit_unordered_block(node(&labels[i], &[parent]), &[id(parent)]);
        }

        let ordering = scheduler.get_valid_ordering(node(&labels[0], &["genesis"]));
        let expected: Vec<BlockId> = labels.iter().map(|l| id(l)).collect();
        assert_eq!(ids(&ordering), expected);
        assert_eq!(scheduler.missing_len(), 0);
    }

    #[test]
    fn two_parent_block_waits_for_both() {
        let mut scheduler = BlockScheduler::new();
        let child = node("C", &["A", "B"]);
        scheduler.submit_unordered_block(Arc::clone(&child), &[id("A"), id("B")]);

        let first = scheduler.get_valid_ordering(node("A", &["Z"]));
        assert_eq!(ids(&first), vec![id("A")]);
        assert!(scheduler.is_missing(&id("B")));

        let second = scheduler.get_valid_ordering(node("B", &["Z"]));
        assert_eq!(ids(&second), vec![id("B"), id("C")]);
    }

    #[test]
    fn fan_out_releases_every_child_after_parent() {
        let mut scheduler = BlockScheduler::new();
        for child in ["X", "Y", "W"] {
            scheduler.submit_unordered_block(node(child, &["P"]), &[id("P")]);
        }
        scheduler.submit_unordered_block(node("X2", &["X"]), &[id("X")]);

        let ordering = ids(&scheduler.get_valid_ordering(node("P", &["Z"])));
        assert_eq!(ordering.len(), 5);
        assert_eq!(ordering[0], id("P"));
        let pos = |label: &str| ordering.iter().position(|i| *i == id(label)).unwrap();
        assert!(pos("X") < pos("X2"));
    }

    #[test]
    fn duplicate_registration_is_ignored() {
        let mut scheduler = BlockScheduler::new();
        let child = node("C", &["P"]);
        scheduler.submit_unordered_block(Arc::clone(&child), &[id("P")]);
        scheduler.submit_unordered_block(child, &[id("P")]);
        let ordering = scheduler.get_valid_ordering(node("P", &["Z"]));
        assert_eq!(ids(&ordering), vec![id("P"), id("C")]);
    }

    #[test]
    fn discard_removes_block_and_its_dependents() {
        let mut scheduler = BlockScheduler::new();
        let b = node("B", &["A"]);
        scheduler.submit_unordered_block(Arc::clone(&b), &[id("A")]);
        scheduler.submit_unordered_block(node("C", &["B"]), &[id("B")]);
        scheduler.submit_unordered_block(node("D", &["C", "Q"]), &[id("C"), id("Q")]);

        let discarded = scheduler.discard(&b);
        assert_eq!(ids(&discarded), vec![id("C"), id("D")]);
        assert_eq!(scheduler.missing_len(), 0);
    }
}
