//! Pending application content held by one chain.
//!
//! # Ordering
//!
//! Items are kept in a `BTreeMap` keyed by [`ContentId`], so every scan visits
//! them in the same order on every replica. Two proposers that observe the
//! same pending pool and the same live ancestors therefore build the same
//! candidate batch.
//!
//! # Split and merge
//!
//! [`ContentStore::separate_content`] and [`ContentStore::aggregate_content`]
//! hold the parent's write lock for the whole migration. Lock order is always
//! parent before child.

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use super::mask::{Fingerprint, MaskCursor, Route};
use crate::block::{Block, BlockId, ContentId, ContentRef};

// ---------------------------------------------------------------------------
// ContentItem
// ---------------------------------------------------------------------------

/// One pending content item with its two routing fingerprints.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentItem {
    pub id: ContentId,
    pub fingerprints: [Fingerprint; 2],
    pub size: u64,
}

impl ContentItem {
    /// Build an item whose id is the hash of `payload`.
    #[must_use]
    pub fn new(payload: &[u8], first: Fingerprint, second: Fingerprint) -> Self {
        Self {
            id: ContentId(*blake3::hash(payload).as_bytes()),
            fingerprints: [first, second],
            size: payload.len() as u64,
        }
    }

    /// Classify this item at `cursor`.
    #[must_use]
    pub const fn route(&self, cursor: &MaskCursor) -> Route {
        cursor.match_ids(&self.fingerprints[0], &self.fingerprints[1])
    }

    /// Batch reference for this item.
    #[must_use]
    pub const fn content_ref(&self) -> ContentRef {
        ContentRef {
            id: self.id,
            size: self.size,
        }
    }
}

/// Read access to live (non-finalized) blocks, used to find content already
/// claimed by ancestors of a proposal.
pub trait BlockLookup {
    fn lookup_block(&self, id: &BlockId) -> Option<Arc<Block>>;
}

/// Children produced by [`ContentStore::separate_content`].
#[derive(Debug)]
pub struct ContentSplit {
    pub left: ContentStore,
    pub right: ContentStore,
}

// ---------------------------------------------------------------------------
// ContentStore
// ---------------------------------------------------------------------------

/// Composable pending-content store for one chain.
#[derive(Debug, Default)]
pub struct ContentStore {
    items: RwLock<BTreeMap<ContentId, ContentItem>>,
}

impl ContentStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn from_map(items: BTreeMap<ContentId, ContentItem>) -> Self {
        Self {
            items: RwLock::new(items),
        }
    }

    /// Insert an item. Returns `false` if the id was already stored.
    pub fn submit_content(&self, item: ContentItem) -> bool {
        let mut items = self.items.write();
        if items.contains_key(&item.id) {
            return false;
        }
        items.insert(item.id, item);
        true
    }

    /// Remove an item by id.
    pub fn delete_content(&self, id: &ContentId) -> Option<ContentItem> {
        self.items.write().remove(id)
    }

    /// Remove every listed id that is present; returns how many were removed.
    pub fn delete_many<'a>(&self, ids: impl IntoIterator<Item = &'a ContentId>) -> usize {
        let mut items = self.items.write();
        ids.into_iter()
            .filter(|id| items.remove(id).is_some())
            .count()
    }

    #[must_use]
    pub fn contains(&self, id: &ContentId) -> bool {
        self.items.read().contains_key(id)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.items.read().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.read().is_empty()
    }

    /// Sum of stored item sizes.
    #[must_use]
    pub fn pending_bytes(&self) -> u64 {
        self.items.read().values().map(|item| item.size).sum()
    }

    /// Snapshot of stored ids in scan order.
    #[must_use]
    pub fn ids(&self) -> BTreeSet<ContentId> {
        self.items.read().keys().copied().collect()
    }

    /// Build a deterministic content batch for a new proposal.
    ///
    /// Content referenced by any block reachable backwards from
    /// `referenced_states` (through `lookup`) is skipped. Remaining items are
    /// taken in id order while `used_space_so_far` plus the running batch
    /// size is below `max_size - safety_offset`. The bound is checked before
    /// each item, so the last item taken may overshoot it; an oversized item
    /// is still proposed once the batch before it is small enough.
    pub fn generate_content_list(
        &self,
        referenced_states: &[BlockId],
        lookup: &impl BlockLookup,
        used_space_so_far: u64,
        max_size: u64,
        safety_offset: u64,
    ) -> Vec<ContentRef> {
        let consumed = consumed_by_ancestors(referenced_states, lookup);
        let limit = max_size.saturating_sub(safety_offset);

        let items = self.items.read();
        let mut running = 0u64;
        let mut selection = Vec::new();
        for item in items.values() {
            if consumed.contains(&item.id) {
                continue;
            }
            if used_space_so_far.saturating_add(running) >= limit {
                break;
            }
            running = running.saturating_add(item.size);
            selection.push(item.content_ref());
        }
        selection
    }

    /// Partition this store at `cursor`.
    ///
    /// LEFT items move into the returned left store, RIGHT items into the
    /// right store, CENTER items stay here. The write lock is held for the
    /// whole scan so no item is observable in two stores or in none.
    pub fn separate_content(&self, cursor: &MaskCursor) -> ContentSplit {
        let mut items = self.items.write();
        let mut left = BTreeMap::new();
        let mut right = BTreeMap::new();

        let drained = std::mem::take(&mut *items);
        for (id, item) in drained {
            match item.route(cursor) {
                Route::Left => {
                    left.insert(id, item);
                }
                Route::Right => {
                    right.insert(id, item);
                }
                Route::Center => {
                    items.insert(id, item);
                }
            }
        }

        tracing::debug!(
            depth = cursor.depth(),
            left = left.len(),
            right = right.len(),
            center = items.len(),
            "separated content"
        );

        ContentSplit {
            left: Self::from_map(left),
            right: Self::from_map(right),
        }
    }

    /// Move every item of `children` back into this store.
    ///
    /// Returns the number of items moved.
    pub fn aggregate_content(&self, children: &[&Self]) -> usize {
        let mut items = self.items.write();
        let mut moved = 0;
        for child in children {
            if std::ptr::eq(*child, self) {
                continue;
            }
            let drained = std::mem::take(&mut *child.items.write());
            moved += drained.len();
            items.extend(drained);
        }
        moved
    }
}

/// Content ids referenced by every block reachable backwards from `refs`.
///
/// The walk stops at blocks `lookup` no longer knows; their content has
/// already been consumed from the store by finalization.
pub fn consumed_by_ancestors(refs: &[BlockId], lookup: &impl BlockLookup) -> HashSet<ContentId> {
    let mut consumed = HashSet::new();
    let mut visited = HashSet::new();
    let mut stack: Vec<BlockId> = refs.to_vec();

    while let Some(id) = stack.pop() {
        if !visited.insert(id) {
            continue;
        }
        let Some(block) = lookup.lookup_block(&id) else {
            continue;
        };
        consumed.extend(block.content().iter().map(|item| item.id));
        stack.extend(block.previous().iter().copied());
    }

    consumed
}
