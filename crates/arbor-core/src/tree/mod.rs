//! The chain-tree orchestrator.
//!
//! # Sub-modules
//!
//! - `hub`: queues and the dirty signal shared with chains.
//! - [`linearize`]: confirm-bar linearization. ([`Linearizer`])
//!
//! # Threads
//!
//! Block and content submission run on the caller's thread and only touch
//! the target chain. Structural changes (registering spawned chains,
//! merging, removing drained chains) and linearization happen in a tree
//! pass, which is serialized: either [`LedgerTree::tick`] on the caller's
//! thread or the background worker started by
//! [`LedgerTree::spawn_worker`].

pub(crate) mod hub;
pub mod linearize;

use std::sync::Arc;
use std::thread::JoinHandle;

use indexmap::IndexMap;
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::block::{Block, ContentId};
use crate::chain::{ChainController, ChainId, Proposal, RejectReason, SubmitOutcome};
use crate::config::LedgerConfig;
use crate::content::{ContentItem, Route};
use crate::context::LedgerContext;
use crate::error::LedgerError;

use hub::TreeHub;
pub use linearize::{FinalizedSource, Linearized, Linearizer, confirm_bar};

/// What one tree pass did.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TickReport {
    pub registered: Vec<ChainId>,
    pub merged: Vec<ChainId>,
    pub removed: Vec<ChainId>,
    pub linearized: usize,
}

impl TickReport {
    #[must_use]
    pub fn is_idle(&self) -> bool {
        self.registered.is_empty()
            && self.merged.is_empty()
            && self.removed.is_empty()
            && self.linearized == 0
    }
}

// ---------------------------------------------------------------------------
// TreeInner
// ---------------------------------------------------------------------------

#[derive(Debug)]
struct TreeInner {
    ctx: Arc<LedgerContext>,
    hub: Arc<TreeHub>,
    root: Arc<ChainController>,
    /// Insertion ordered; the root is always first.
    chains: RwLock<IndexMap<ChainId, Arc<ChainController>>>,
    /// Retired chains waiting for their finalized queue to drain.
    draining: Mutex<Vec<ChainId>>,
    linearizer: Mutex<Linearizer>,
}

impl TreeInner {
    fn lookup(&self, chain: ChainId) -> Option<Arc<ChainController>> {
        let registered = self.chains.read().get(&chain).cloned();
        registered.or_else(|| self.hub.find_spawned(chain))
    }

    fn snapshot(&self) -> Vec<Arc<ChainController>> {
        self.chains.read().values().cloned().collect()
    }

    fn tick(&self) -> TickReport {
        // One pass at a time; the linearizer lock doubles as the pass lock.
        let mut linearizer = self.linearizer.lock();
        let mut report = TickReport {
            registered: self.register_spawned(),
            merged: self.discard_successive_chains(),
            ..TickReport::default()
        };

        let delivered = linearizer.run(&self.snapshot());
        report.linearized = delivered.len();
        drop(linearizer);

        for item in &delivered {
            debug!(seq = item.seq, chain = %item.chain, block = %item.block.id(), "linearized");
            for observer in &self.ctx.observers {
                observer.on_linearized(item.seq, &item.block);
            }
        }

        report.removed = self.remove_drained();
        report
    }

    fn register_spawned(&self) -> Vec<ChainId> {
        // Drain under the map lock so `remove_drained` never sees a chain in
        // neither place.
        let mut chains = self.chains.write();
        let spawned = self.hub.drain_spawned();
        if spawned.is_empty() {
            return Vec::new();
        }
        spawned
            .into_iter()
            .map(|chain| {
                let id = chain.id();
                info!(chain = %id, depth = id.depth(), "registered chain");
                chains.insert(id, chain);
                id
            })
            .collect()
    }

    /// Merge leaf pairs back into their parents until no candidate remains
    /// or the active chain count would drop below the minimum.
    fn discard_successive_chains(&self) -> Vec<ChainId> {
        let min = self.ctx.config.tree.min_num_chains;
        let mut merged = Vec::new();

        loop {
            let chains = self.snapshot();
            let mut active = chains.iter().filter(|c| !c.is_retired()).count();
            let mut progressed = false;

            for chain in &chains {
                if active < min + 2 {
                    return merged;
                }
                let Some((parent, children)) = chain.merge_candidate() else {
                    continue;
                };
                if !self.ctx.load.should_merge(&parent, [&children[0], &children[1]]) {
                    continue;
                }
                let Some(retired) = chain.merge_children() else {
                    continue;
                };
                for child in &retired {
                    self.hub.enqueue_removal(child.id());
                }
                active -= 2;
                merged.push(chain.id());
                progressed = true;
            }

            if !progressed {
                return merged;
            }
        }
    }

    fn remove_drained(&self) -> Vec<ChainId> {
        let mut draining = self.draining.lock();
        draining.extend(self.hub.drain_removals());
        if draining.is_empty() {
            return Vec::new();
        }

        let mut removed = Vec::new();
        let mut chains = self.chains.write();
        draining.retain(|id| {
            // Children merged before their first registration still have a
            // finalized queue to hand to the linearizer.
            let drained = match chains.get(id) {
                Some(chain) => chain.undelivered_len() == 0,
                None => self.hub.find_spawned(*id).is_none(),
            };
            if drained {
                chains.shift_remove(id);
                self.hub.release(*id);
                info!(chain = %id, "removed merged chain");
                removed.push(*id);
            }
            !drained
        });
        removed
    }
}

// ---------------------------------------------------------------------------
// LedgerTree
// ---------------------------------------------------------------------------

/// A dynamically resharding tree of chains with one global finalized order.
#[derive(Debug)]
pub struct LedgerTree {
    inner: Arc<TreeInner>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl LedgerTree {
    /// Build a tree holding only the root chain.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::InvalidConfig`] if the configuration does not
    /// validate.
    pub fn new(ctx: LedgerContext) -> Result<Self, LedgerError> {
        let ctx = ctx.validated()?;
        let hub = Arc::new(TreeHub::new(
            ctx.config.tree.max_num_chains,
            ctx.config.tree.max_mask_depth,
        ));
        let root = Arc::new(ChainController::root(Arc::clone(&ctx), Arc::clone(&hub))?);

        let mut chains = IndexMap::new();
        chains.insert(ChainId::ROOT, Arc::clone(&root));
        info!(
            finalized_weight = ctx.config.fork.finalized_weight,
            max_num_chains = ctx.config.tree.max_num_chains,
            "ledger tree created"
        );

        Ok(Self {
            inner: Arc::new(TreeInner {
                ctx,
                hub,
                root,
                chains: RwLock::new(chains),
                draining: Mutex::new(Vec::new()),
                linearizer: Mutex::new(Linearizer::new()),
            }),
            worker: Mutex::new(None),
        })
    }

    /// Tree with default policies and no observers.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::InvalidConfig`] if `config` does not validate.
    pub fn with_config(config: LedgerConfig) -> Result<Self, LedgerError> {
        Self::new(LedgerContext::new(config))
    }

    #[must_use]
    pub fn context(&self) -> &LedgerContext {
        &self.inner.ctx
    }

    // -----------------------------------------------------------------------
    // Write path
    // -----------------------------------------------------------------------

    /// Route a block to its destination chain.
    pub fn submit_block(&self, block: Arc<Block>) -> SubmitOutcome {
        let target = block.chain();
        let Some(chain) = self.inner.lookup(target) else {
            warn!(chain = %target, block = %block.id(), "block for unknown chain");
            return SubmitOutcome::Rejected(RejectReason::UnknownChain(target));
        };
        chain.submit_block(block)
    }

    /// Store a content item in the deepest chain its fingerprints route to.
    ///
    /// Returns the chain that holds the item, and whether it was new there.
    pub fn submit_content(&self, item: ContentItem) -> (ChainId, bool) {
        loop {
            let mut chain = self.root();
            while let Some([left, right]) = chain.children() {
                chain = match item.route(&chain.split_cursor()) {
                    Route::Left => left,
                    Route::Right => right,
                    Route::Center => break,
                };
            }

            let inserted = chain.content().submit_content(item.clone());
            // A merge that retired the chain after the walk has either moved
            // the item up already or will not see it.
            if !chain.is_retired() || chain.content().delete_content(&item.id).is_none() {
                debug!(chain = %chain.id(), content = %item.id, inserted, "stored content");
                return (chain.id(), inserted);
            }
        }
    }

    /// Remove a content item from whichever store holds it.
    pub fn invalidate_content(&self, id: &ContentId) -> Option<ChainId> {
        let mut chains = self.inner.snapshot();
        chains.extend(self.inner.hub.spawned_snapshot());
        chains
            .iter()
            .find(|chain| chain.content().delete_content(id).is_some())
            .map(|chain| {
                debug!(chain = %chain.id(), content = %id, "invalidated content");
                chain.id()
            })
    }

    // -----------------------------------------------------------------------
    // Tree passes
    // -----------------------------------------------------------------------

    /// Run one pass on the calling thread.
    pub fn tick(&self) -> TickReport {
        self.inner.hub.dirty.take();
        self.inner.tick()
    }

    /// Run passes until one does nothing.
    pub fn settle(&self) -> Vec<TickReport> {
        let mut reports = Vec::new();
        loop {
            let report = self.tick();
            if report.is_idle() {
                return reports;
            }
            reports.push(report);
        }
    }

    /// Start the background worker; a no-op if it already runs.
    ///
    /// # Errors
    ///
    /// Returns the OS error if the thread cannot be spawned.
    pub fn spawn_worker(&self) -> std::io::Result<()> {
        let mut worker = self.worker.lock();
        if worker.is_some() {
            return Ok(());
        }
        let inner = Arc::clone(&self.inner);
        let handle = std::thread::Builder::new()
            .name("arbor-tree".into())
            .spawn(move || {
                debug!("tree worker started");
                while inner.hub.dirty.wait() {
                    let report = inner.tick();
                    if !report.is_idle() {
                        debug!(?report, "tree pass");
                    }
                }
                debug!("tree worker stopped");
            })?;
        *worker = Some(handle);
        // Catch up on anything that happened before the worker existed.
        self.inner.hub.dirty.mark();
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Queries
    // -----------------------------------------------------------------------

    #[must_use]
    pub fn root(&self) -> Arc<ChainController> {
        Arc::clone(&self.inner.root)
    }

    #[must_use]
    pub fn chain(&self, id: ChainId) -> Option<Arc<ChainController>> {
        self.inner.chains.read().get(&id).cloned()
    }

    /// Proposal for the next block on `id`, batching at most `max_size`
    /// bytes of its pending content.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::ChainNotFound`] if `id` is not registered.
    pub fn prepare_proposal(&self, id: ChainId, max_size: u64) -> Result<Proposal, LedgerError> {
        self.chain(id)
            .map(|chain| chain.prepare_proposal(max_size))
            .ok_or(LedgerError::ChainNotFound(id))
    }

    /// Registered chain ids, root first.
    #[must_use]
    pub fn chain_ids(&self) -> Vec<ChainId> {
        self.inner.chains.read().keys().copied().collect()
    }

    /// Registered chains that accept blocks and that the priority policy
    /// offers to proposers.
    #[must_use]
    pub fn get_available_chains(&self) -> Vec<ChainId> {
        self.inner
            .snapshot()
            .iter()
            .filter(|chain| !chain.is_retired())
            .filter(|chain| self.inner.ctx.priority.is_available(&chain.stats()))
            .map(|chain| chain.id())
            .collect()
    }

    /// Current confirm bar over the registered chains.
    #[must_use]
    pub fn confirm_bar(&self) -> u64 {
        confirm_bar(&self.inner.snapshot())
    }

    /// Blocks placed in the global order so far.
    #[must_use]
    pub fn linearized_count(&self) -> u64 {
        self.inner.linearizer.lock().delivered()
    }
}

impl Drop for LedgerTree {
    fn drop(&mut self) {
        self.inner.hub.dirty.stop();
        if let Some(handle) = self.worker.lock().take() {
            if handle.join().is_err() {
                warn!("tree worker panicked");
            }
        }
        // Queued controllers hold the hub; drop them so both are freed.
        self.inner.hub.clear();
    }
}
