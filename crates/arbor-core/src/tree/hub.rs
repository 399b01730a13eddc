//! Cross-thread hand-off between chains and the tree worker.
//!
//! Chains never touch the tree's chain map. A chain that splits reserves its
//! two child ids here and queues the new controllers; the worker registers
//! them on its next pass. Merged children are queued for removal the same
//! way. Every finalization marks the tree dirty so the worker runs a pass.

use std::collections::HashSet;
use std::sync::Arc;

use parking_lot::{Condvar, Mutex};

use crate::chain::{ChainController, ChainId};

// ---------------------------------------------------------------------------
// DirtySignal
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
struct SignalState {
    dirty: bool,
    stopped: bool,
}

/// One-slot wake-up flag. Marks that arrive before the worker wakes coalesce
/// into a single pass.
#[derive(Debug, Default)]
pub struct DirtySignal {
    state: Mutex<SignalState>,
    ready: Condvar,
}

impl DirtySignal {
    pub fn mark(&self) {
        let mut state = self.state.lock();
        if !state.dirty {
            state.dirty = true;
            self.ready.notify_one();
        }
    }

    /// Block until marked or stopped. Returns `false` once stopped.
    pub fn wait(&self) -> bool {
        let mut state = self.state.lock();
        while !state.dirty && !state.stopped {
            self.ready.wait(&mut state);
        }
        if state.stopped {
            return false;
        }
        state.dirty = false;
        true
    }

    /// Clear the flag without blocking; returns whether it was set.
    pub fn take(&self) -> bool {
        std::mem::take(&mut self.state.lock().dirty)
    }

    pub fn stop(&self) {
        self.state.lock().stopped = true;
        self.ready.notify_all();
    }
}

// ---------------------------------------------------------------------------
// TreeHub
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub struct TreeHub {
    spawned: Mutex<Vec<Arc<ChainController>>>,
    removals: Mutex<Vec<ChainId>>,
    /// Ids that are registered, queued for registration, or awaiting removal.
    occupied: Mutex<HashSet<ChainId>>,
    max_num_chains: usize,
    max_mask_depth: usize,
    pub dirty: DirtySignal,
}

impl TreeHub {
    pub fn new(max_num_chains: usize, max_mask_depth: usize) -> Self {
        Self {
            spawned: Mutex::new(Vec::new()),
            removals: Mutex::new(Vec::new()),
            occupied: Mutex::new(HashSet::from([ChainId::ROOT])),
            max_num_chains,
            max_mask_depth,
            dirty: DirtySignal::default(),
        }
    }

    pub const fn max_mask_depth(&self) -> usize {
        self.max_mask_depth
    }

    /// Reserve both child ids of a split, or nothing.
    ///
    /// Fails when the chain budget would be exceeded or when a previous
    /// generation of children with the same ids is still draining.
    pub fn reserve_pair(&self, left: ChainId, right: ChainId) -> bool {
        let mut occupied = self.occupied.lock();
        if occupied.len() + 2 > self.max_num_chains
            || occupied.contains(&left)
            || occupied.contains(&right)
        {
            return false;
        }
        occupied.insert(left);
        occupied.insert(right);
        true
    }

    pub fn release(&self, chain: ChainId) {
        self.occupied.lock().remove(&chain);
    }

    pub fn occupied_len(&self) -> usize {
        self.occupied.lock().len()
    }

    pub fn enqueue_spawn(&self, chain: Arc<ChainController>) {
        self.spawned.lock().push(chain);
        self.dirty.mark();
    }

    pub fn enqueue_removal(&self, chain: ChainId) {
        self.removals.lock().push(chain);
        self.dirty.mark();
    }

    pub fn drain_spawned(&self) -> Vec<Arc<ChainController>> {
        std::mem::take(&mut *self.spawned.lock())
    }

    pub fn drain_removals(&self) -> Vec<ChainId> {
        std::mem::take(&mut *self.removals.lock())
    }

    /// A queued but not yet registered chain.
    pub fn find_spawned(&self, chain: ChainId) -> Option<Arc<ChainController>> {
        self.spawned
            .lock()
            .iter()
            .find(|controller| controller.id() == chain)
            .map(Arc::clone)
    }

    pub fn spawned_snapshot(&self) -> Vec<Arc<ChainController>> {
        self.spawned.lock().clone()
    }

    /// Drop queued controllers so their back-references to the hub go away.
    pub fn clear(&self) {
        self.spawned.lock().clear();
        self.removals.lock().clear();
    }
}
