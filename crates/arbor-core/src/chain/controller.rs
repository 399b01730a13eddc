//! Per-chain façade over the fork graph, the out-of-order scheduler and the
//! pending content store.
//!
//! # Locking
//!
//! Every mutation of the fork graph runs under the chain's write lock.
//! Queries take the read lock. Observers are called after the write lock is
//! released, so an observer may query the chain it is notified about.
//!
//! Lock order across chains is always parent before child: a parent that
//! finalizes content deletes it from descendant stores, and a merge holds the
//! parent's write lock while it retires the children.
//!
//! # Finalized queue
//!
//! Finalized blocks are queued for the tree's linearizer. The queue and the
//! chain's next rank share one mutex so the linearizer never sees a next rank
//! that is ahead of the queue.

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::{Mutex, RwLock};
use tracing::{debug, info, warn};

use super::{ChainId, ChainLoad, ChainStats, RejectReason, SubmitOutcome};
use crate::block::{Block, BlockDraft, BlockId, ContentId, ContentRef, Rank};
use crate::content::{BlockLookup, ContentStore, MaskCursor};
use crate::context::LedgerContext;
use crate::error::LedgerError;
use crate::fork::{BlockScheduler, FinalizationStep, ForkFinalizer};
use crate::tree::hub::TreeHub;
use crate::tree::linearize::FinalizedSource;

// ---------------------------------------------------------------------------
// Public value types
// ---------------------------------------------------------------------------

/// Template for the next block on a chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Proposal {
    pub chain: ChainId,
    /// The priority tip, the only previous reference a proposal uses.
    pub previous: BlockId,
    pub content: Vec<ContentRef>,
    /// Lowest `rank.current` the block may carry.
    pub min_rank: u64,
}

impl Proposal {
    /// A weight-1 draft carrying this proposal's batch at `rank`.
    #[must_use]
    pub fn draft(&self, rank: Rank) -> BlockDraft {
        BlockDraft::extending(self.chain, self.previous, rank).content(self.content.clone())
    }
}

// ---------------------------------------------------------------------------
// Internal state
// ---------------------------------------------------------------------------

#[derive(Debug)]
struct ChainState {
    finalizer: ForkFinalizer,
    scheduler: BlockScheduler,
    /// Blocks waiting in the scheduler, by id.
    buffered: HashMap<BlockId, Arc<Block>>,
    /// Payloads of every node live in `finalizer`.
    blocks: HashMap<BlockId, Arc<Block>>,
}

impl BlockLookup for ChainState {
    fn lookup_block(&self, id: &BlockId) -> Option<Arc<Block>> {
        self.blocks.get(id).cloned()
    }
}

#[derive(Debug)]
struct FinalizedQueue {
    blocks: VecDeque<Arc<Block>>,
    next_rank: u64,
}

enum ChainEvent {
    NonFinalized { block: Arc<Block>, weight: u64 },
    Finalized(FinalizationStep),
}

// ---------------------------------------------------------------------------
// ChainController
// ---------------------------------------------------------------------------

pub struct ChainController {
    id: ChainId,
    genesis: BlockId,
    state: RwLock<ChainState>,
    content: ContentStore,
    /// Cursor this chain's content is partitioned with when it splits.
    split_cursor: MaskCursor,
    children: RwLock<Option<[Arc<Self>; 2]>>,
    finalized: Mutex<FinalizedQueue>,
    retired: AtomicBool,
    permanent: AtomicBool,
    ctx: Arc<LedgerContext>,
    hub: Arc<TreeHub>,
}

impl fmt::Debug for ChainController {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChainController")
            .field("id", &self.id)
            .field("genesis", &self.genesis)
            .field("retired", &self.is_retired())
            .finish_non_exhaustive()
    }
}

impl ChainController {
    /// The root chain of a tree.
    pub(crate) fn root(ctx: Arc<LedgerContext>, hub: Arc<TreeHub>) -> Result<Self, LedgerError> {
        let genesis = Arc::new(Block::genesis(ChainId::ROOT));
        let finalizer = new_finalizer(&ctx, genesis.id())?;
        let root = Self::assemble(
            ChainId::ROOT,
            genesis,
            finalizer,
            ContentStore::new(),
            MaskCursor::new(),
            ctx,
            hub,
        );
        root.permanent.store(true, Ordering::SeqCst);
        Ok(root)
    }

    /// A root chain that belongs to no tree.
    ///
    /// Splits still happen if the load policy asks for them, but the children
    /// are never registered anywhere.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::InvalidConfig`] if the context's configuration
    /// does not validate.
    pub fn standalone(ctx: Arc<LedgerContext>) -> Result<Self, LedgerError> {
        ctx.config.validate()?;
        let hub = Arc::new(TreeHub::new(
            ctx.config.tree.max_num_chains,
            ctx.config.tree.max_mask_depth,
        ));
        Self::root(ctx, hub)
    }

    fn assemble(
        id: ChainId,
        genesis: Arc<Block>,
        finalizer: ForkFinalizer,
        content: ContentStore,
        split_cursor: MaskCursor,
        ctx: Arc<LedgerContext>,
        hub: Arc<TreeHub>,
    ) -> Self {
        let next_rank = genesis.rank().next;
        Self {
            id,
            genesis: genesis.id(),
            state: RwLock::new(ChainState {
                finalizer,
                scheduler: BlockScheduler::new(),
                buffered: HashMap::new(),
                blocks: HashMap::from([(genesis.id(), genesis)]),
            }),
            content,
            split_cursor,
            children: RwLock::new(None),
            finalized: Mutex::new(FinalizedQueue {
                blocks: VecDeque::new(),
                next_rank,
            }),
            retired: AtomicBool::new(false),
            permanent: AtomicBool::new(false),
            ctx,
            hub,
        }
    }

    // -----------------------------------------------------------------------
    // Submission
    // -----------------------------------------------------------------------

    /// Apply, buffer or drop a block.
    ///
    /// Dropped blocks are logged and reported in the outcome; they never
    /// produce an error.
    pub fn submit_block(&self, block: Arc<Block>) -> SubmitOutcome {
        let outcome = match self.check_shape(&block) {
            Ok(parent) => {
                let mut events = Vec::new();
                let outcome = self.apply_submission(block.clone(), parent, &mut events);
                self.emit(&events);
                let finalized_any = events.iter().any(|event| {
                    matches!(event, ChainEvent::Finalized(step) if !step.finalized.is_empty())
                });
                if finalized_any {
                    self.hub.dirty.mark();
                }
                outcome
            }
            Err(reason) => SubmitOutcome::Rejected(reason),
        };

        if let SubmitOutcome::Rejected(reason) = &outcome {
            warn!(chain = %self.id, block = %block.id(), %reason, "dropping block");
        }
        outcome
    }

    fn check_shape(&self, block: &Block) -> Result<BlockId, RejectReason> {
        let Some(parent) = block.parent() else {
            return Err(RejectReason::MalformedPrevious {
                count: block.previous().len(),
            });
        };
        if block.chain() != self.id {
            return Err(RejectReason::WrongChain {
                expected: self.id,
                got: block.chain(),
            });
        }
        if !block.rank().is_ordered() {
            return Err(RejectReason::RankOutOfOrder(block.rank()));
        }
        if !self.ctx.validator.is_block_valid(block) {
            return Err(RejectReason::Invalid);
        }
        Ok(parent)
    }

    fn apply_submission(
        &self,
        block: Arc<Block>,
        parent: BlockId,
        events: &mut Vec<ChainEvent>,
    ) -> SubmitOutcome {
        let mut state = self.state.write();
        if self.is_retired() {
            return SubmitOutcome::Rejected(RejectReason::Retired(self.id));
        }

        let id = block.id();
        if state.blocks.contains_key(&id) || state.buffered.contains_key(&id) {
            return SubmitOutcome::Duplicate;
        }

        let Some(required) = state.blocks.get(&parent).map(|p| p.rank().next) else {
            // Anything that can still attach carries at least the finalized
            // next rank.
            let next_rank = self.finalized.lock().next_rank;
            if block.rank().current < next_rank {
                return SubmitOutcome::Rejected(RejectReason::Stale {
                    next_rank,
                    got: block.rank().current,
                });
            }
            debug!(chain = %self.id, block = %id, parent = %parent, "buffering block");
            state.buffered.insert(id, Arc::clone(&block));
            state.scheduler.submit_unordered_block(block, &[parent]);
            return SubmitOutcome::Buffered;
        };

        if block.rank().current < required {
            let dropped = state.scheduler.discard(&block);
            for dependent in &dropped {
                state.buffered.remove(&dependent.id());
            }
            return SubmitOutcome::Rejected(RejectReason::RankBelowParent {
                required,
                got: block.rank().current,
            });
        }

        let ordering = state.scheduler.get_valid_ordering(block);
        let mut applied = 0;
        for ready in ordering {
            state.buffered.remove(&ready.id());
            if self.apply(&mut state, &ready, events) {
                applied += 1;
            }
        }
        SubmitOutcome::Applied { applied }
    }

    /// Add one resolved block to the fork graph. Returns `false` if it could
    /// not attach.
    fn apply(&self, state: &mut ChainState, block: &Arc<Block>, events: &mut Vec<ChainEvent>) -> bool {
        let Some(parent) = block.parent() else {
            return false;
        };
        let Some(required) = state.blocks.get(&parent).map(|p| p.rank().next) else {
            debug!(chain = %self.id, block = %block.id(), "parent left the graph before replay");
            return false;
        };
        if block.rank().current < required {
            warn!(
                chain = %self.id,
                block = %block.id(),
                required,
                got = block.rank().current,
                "dropping replayed block ranked below its parent"
            );
            return false;
        }

        let weight = state
            .finalizer
            .get_weight(&parent)
            .map_or(block.weight(), |w| w.saturating_add(block.weight()));
        let step = match state.finalizer.add_block(block.id(), parent, block.weight()) {
            Ok(step) => step,
            Err(err) => {
                warn!(chain = %self.id, block = %block.id(), error = %err, "fork graph refused block");
                return false;
            }
        };

        debug!(chain = %self.id, block = %block.id(), weight, "applied block");
        state.blocks.insert(block.id(), Arc::clone(block));
        events.push(ChainEvent::NonFinalized {
            block: Arc::clone(block),
            weight,
        });

        if !step.is_empty() {
            self.settle(state, &step);
            events.push(ChainEvent::Finalized(step));
        }
        true
    }

    /// Bring payloads, buffers and content in line with a finalization step.
    fn settle(&self, state: &mut ChainState, step: &FinalizationStep) {
        for id in &step.pruned {
            state.blocks.remove(id);
        }

        let finalized: Vec<Arc<Block>> = step
            .finalized
            .iter()
            .filter_map(|id| state.blocks.get(id).cloned())
            .collect();

        let ChainState {
            blocks, finalizer, ..
        } = state;
        blocks.retain(|id, _| finalizer.contains(id));

        let finalized_count = finalizer.finalized_count();
        for block in finalized {
            self.on_block_finalized(&block, finalized_count);
        }
    }

    fn on_block_finalized(&self, block: &Arc<Block>, finalized_count: u64) {
        let consumed: Vec<ContentId> = block.content().iter().map(|item| item.id).collect();
        if !consumed.is_empty() {
            self.consume_content(&consumed);
        }

        {
            let mut queue = self.finalized.lock();
            queue.blocks.push_back(Arc::clone(block));
            queue.next_rank = queue.next_rank.max(block.rank().next);
        }
        debug!(chain = %self.id, block = %block.id(), rank = block.rank().current, "finalized block");

        if finalized_count >= self.ctx.config.priority.min_finalized_blocks
            && !self.permanent.swap(true, Ordering::SeqCst)
        {
            info!(chain = %self.id, finalized_count, "chain became permanent");
        }

        self.maybe_spawn(block, finalized_count);
    }

    /// Delete finalized content from this store and every descendant store.
    fn consume_content(&self, ids: &[ContentId]) {
        self.content.delete_many(ids);
        let children = self.children.read().clone();
        if let Some(children) = children {
            for child in &children {
                child.consume_content(ids);
            }
        }
    }

    fn emit(&self, events: &[ChainEvent]) {
        for event in events {
            if let ChainEvent::Finalized(step) = event {
                debug!(
                    chain = %self.id,
                    finalized = step.finalized.len(),
                    pruned = step.pruned.len(),
                    "fork graph step"
                );
            }
            for observer in &self.ctx.observers {
                match event {
                    ChainEvent::NonFinalized { block, weight } => {
                        observer.on_non_finalized_block(self.id, block, *weight);
                    }
                    ChainEvent::Finalized(step) => {
                        observer.on_finalized(self.id, &step.finalized, &step.pruned);
                    }
                }
            }
        }
    }

    // -----------------------------------------------------------------------
    // Split and merge
    // -----------------------------------------------------------------------

    /// Split into two children seeded with `genesis` if the load policy asks
    /// for it and the tree has room.
    fn maybe_spawn(&self, genesis: &Arc<Block>, finalized_count: u64) {
        if self.is_retired() || self.children.read().is_some() {
            return;
        }
        if self.id.depth() >= self.hub.max_mask_depth() {
            return;
        }
        if !self.ctx.load.should_spawn(&self.load_with(finalized_count)) {
            return;
        }
        let (Some(left_id), Some(right_id)) = (self.id.left(), self.id.right()) else {
            return;
        };
        let child_cursor = match self.split_cursor.deeper() {
            Ok(cursor) => cursor,
            Err(err) => {
                warn!(chain = %self.id, error = %err, "cannot split further");
                return;
            }
        };
        let (left_finalizer, right_finalizer) = match (
            new_finalizer(&self.ctx, genesis.id()),
            new_finalizer(&self.ctx, genesis.id()),
        ) {
            (Ok(left), Ok(right)) => (left, right),
            (Err(err), _) | (_, Err(err)) => {
                warn!(chain = %self.id, error = %err, "cannot build child fork graphs");
                return;
            }
        };
        if !self.hub.reserve_pair(left_id, right_id) {
            debug!(chain = %self.id, "split deferred, no room in the tree");
            return;
        }

        let split = self.content.separate_content(&self.split_cursor);
        let child = |id, finalizer, content| {
            Arc::new(Self::assemble(
                id,
                Arc::clone(genesis),
                finalizer,
                content,
                child_cursor,
                Arc::clone(&self.ctx),
                Arc::clone(&self.hub),
            ))
        };
        let left = child(left_id, left_finalizer, split.left);
        let right = child(right_id, right_finalizer, split.right);

        *self.children.write() = Some([Arc::clone(&left), Arc::clone(&right)]);
        info!(
            chain = %self.id,
            left = %left_id,
            right = %right_id,
            genesis = %genesis.id(),
            left_content = left.content.len(),
            right_content = right.content.len(),
            "spawned child chains"
        );
        self.hub.enqueue_spawn(left);
        self.hub.enqueue_spawn(right);
    }

    /// Load samples for a merge decision: this chain and its two children,
    /// when both children are unsplit leaves.
    #[must_use]
    pub fn merge_candidate(&self) -> Option<(ChainLoad, [ChainLoad; 2])> {
        if self.is_retired() {
            return None;
        }
        let [left, right] = self.children.read().clone()?;
        let leaves = [&left, &right]
            .iter()
            .all(|child| !child.is_retired() && child.children.read().is_none());
        leaves.then(|| (self.load(), [left.load(), right.load()]))
    }

    /// Fold both children back into this chain.
    ///
    /// The children stop accepting blocks, their content moves into this
    /// chain's store, and the link is cut. Returns the retired children.
    pub(crate) fn merge_children(&self) -> Option<[Arc<Self>; 2]> {
        let _state = self.state.write();
        let children = self.children.read().clone()?;
        for child in &children {
            child.retire();
        }
        let moved = self
            .content
            .aggregate_content(&[&children[0].content, &children[1].content]);
        *self.children.write() = None;

        info!(
            chain = %self.id,
            left = %children[0].id,
            right = %children[1].id,
            moved,
            "merged child chains"
        );
        Some(children)
    }

    fn retire(&self) {
        let mut state = self.state.write();
        self.retired.store(true, Ordering::SeqCst);
        state.buffered.clear();
        state.scheduler = BlockScheduler::new();
    }

    // -----------------------------------------------------------------------
    // Queries
    // -----------------------------------------------------------------------

    #[must_use]
    pub const fn id(&self) -> ChainId {
        self.id
    }

    /// Id of the block this chain started from.
    #[must_use]
    pub const fn genesis(&self) -> BlockId {
        self.genesis
    }

    #[must_use]
    pub const fn split_cursor(&self) -> MaskCursor {
        self.split_cursor
    }

    #[must_use]
    pub const fn content(&self) -> &ContentStore {
        &self.content
    }

    #[must_use]
    pub fn children(&self) -> Option<[Arc<Self>; 2]> {
        self.children.read().clone()
    }

    #[must_use]
    pub fn is_retired(&self) -> bool {
        self.retired.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn is_permanent(&self) -> bool {
        self.permanent.load(Ordering::SeqCst)
    }

    /// `rank.next` of the most recently finalized block.
    #[must_use]
    pub fn next_rank(&self) -> u64 {
        self.finalized.lock().next_rank
    }

    /// Lowest rank a block finalized by this chain or its descendants can
    /// still carry. Retired chains finalize nothing more.
    #[must_use]
    pub fn rank_floor(&self) -> u64 {
        if self.is_retired() {
            return u64::MAX;
        }
        let own = self.next_rank();
        self.children()
            .map_or(own, |[left, right]| own.min(left.rank_floor()).min(right.rank_floor()))
    }

    /// Finalized blocks not yet taken by the linearizer.
    #[must_use]
    pub fn undelivered_len(&self) -> usize {
        self.finalized.lock().blocks.len()
    }

    #[must_use]
    pub fn get_block(&self, id: &BlockId) -> Option<Arc<Block>> {
        self.state.read().blocks.get(id).cloned()
    }

    /// Head references for the next proposal.
    #[must_use]
    pub fn get_block_r(&self) -> Vec<BlockId> {
        self.state.read().finalizer.get_block_r()
    }

    /// # Errors
    ///
    /// Returns [`LedgerError::BlockNotFound`] for ids that are not live.
    pub fn get_weight(&self, id: &BlockId) -> Result<u64, LedgerError> {
        self.state.read().finalizer.get_weight(id)
    }

    /// # Errors
    ///
    /// Returns [`LedgerError::InvalidArgument`] for a negative distance and
    /// [`LedgerError::BlockNotFound`] for ids that are not live.
    pub fn get_following(&self, id: &BlockId, distance: i64) -> Result<Vec<BlockId>, LedgerError> {
        let following = self.state.read().finalizer.get_following(id, distance)?;
        Ok(following.into_iter().collect())
    }

    /// # Errors
    ///
    /// Returns [`LedgerError::BlockNotFound`] for ids that are not live.
    pub fn is_in_longest_chain(&self, id: &BlockId) -> Result<bool, LedgerError> {
        self.state.read().finalizer.is_in_longest_chain(id)
    }

    /// # Errors
    ///
    /// Returns [`LedgerError::InvalidArgument`] for a negative depth and
    /// [`LedgerError::BlockNotFound`] if a reference is not live.
    pub fn get_fork_blocks(&self, refs: &[BlockId], depth: i64) -> Result<Vec<BlockId>, LedgerError> {
        let blocks = self.state.read().finalizer.get_fork_blocks(refs, depth)?;
        Ok(blocks.into_iter().collect())
    }

    /// Finalized ids and weights, when `fork.record_history` is set.
    #[must_use]
    pub fn finalized_history(&self) -> Option<Vec<(BlockId, u64)>> {
        self.state
            .read()
            .finalizer
            .finalized_history()
            .map(<[(BlockId, u64)]>::to_vec)
    }

    /// Template for the next block: priority tip, a deterministic batch of
    /// content not used by live ancestors, and the minimum rank.
    #[must_use]
    pub fn prepare_proposal(&self, max_size: u64) -> Proposal {
        let state = self.state.read();
        let tip = state.finalizer.priority_tip();
        let min_rank = state.blocks.get(&tip).map_or(0, |block| block.rank().next);
        let content = self.content.generate_content_list(
            &[tip],
            &*state,
            0,
            max_size,
            self.ctx.config.content.safety_offset,
        );
        Proposal {
            chain: self.id,
            previous: tip,
            content,
            min_rank,
        }
    }

    /// Drop a buffered block and everything buffered behind it.
    ///
    /// Returns the dropped ids, empty if `id` was not buffered.
    pub fn discard_pending(&self, id: &BlockId) -> Vec<BlockId> {
        let mut state = self.state.write();
        let Some(block) = state.buffered.remove(id) else {
            return Vec::new();
        };
        let mut dropped = vec![block.id()];
        for dependent in state.scheduler.discard(&block) {
            state.buffered.remove(&dependent.id());
            dropped.push(dependent.id());
        }
        debug!(chain = %self.id, dropped = dropped.len(), "discarded buffered blocks");
        dropped
    }

    /// Load sample for the load policy.
    #[must_use]
    pub fn load(&self) -> ChainLoad {
        let finalized_blocks = self.state.read().finalizer.finalized_count();
        self.load_with(finalized_blocks)
    }

    fn load_with(&self, finalized_blocks: u64) -> ChainLoad {
        ChainLoad {
            chain: self.id,
            depth: self.id.depth(),
            pending_items: self.content.len(),
            pending_bytes: self.content.pending_bytes(),
            finalized_blocks,
        }
    }

    #[must_use]
    pub fn stats(&self) -> ChainStats {
        let state = self.state.read();
        ChainStats {
            chain: self.id,
            depth: self.id.depth(),
            live_blocks: state.finalizer.len(),
            buffered_blocks: state.buffered.len(),
            missing_dependencies: state.scheduler.missing_len(),
            tips: state.finalizer.tips().len(),
            finalized_blocks: state.finalizer.finalized_count(),
            undelivered_blocks: self.undelivered_len(),
            next_rank: self.next_rank(),
            pending_content: self.content.len(),
            pending_bytes: self.content.pending_bytes(),
            priority_tip: state.finalizer.priority_tip(),
            permanent: self.is_permanent(),
            retired: self.is_retired(),
            split: self.children.read().is_some(),
        }
    }
}

impl FinalizedSource for ChainController {
    fn chain_id(&self) -> ChainId {
        self.id
    }

    fn rank_floor(&self) -> u64 {
        Self::rank_floor(self)
    }

    fn head_rank(&self) -> Option<u64> {
        self.finalized
            .lock()
            .blocks
            .front()
            .map(|block| block.rank().current)
    }

    fn pop_head(&self) -> Option<Arc<Block>> {
        self.finalized.lock().blocks.pop_front()
    }
}

fn new_finalizer(ctx: &LedgerContext, genesis: BlockId) -> Result<ForkFinalizer, LedgerError> {
    let finalizer = ForkFinalizer::new(genesis, ctx.config.fork.finalized_weight)?;
    Ok(if ctx.config.fork.record_history {
        finalizer.with_history()
    } else {
        finalizer
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LedgerConfig;
    use crate::content::{ContentItem, Fingerprint};
    use crate::observer::RecordingObserver;
    use crate::strategy::ContentThresholdLoad;

    fn context(weight: u64) -> LedgerContext {
        let mut config = LedgerConfig::default();
        config.fork.finalized_weight = weight;
        LedgerContext::new(config)
    }

    fn chain(ctx: LedgerContext) -> ChainController {
        ChainController::standalone(Arc::new(ctx)).unwrap()
    }

    /// Weight-1 block after `prev` with rank `(n, n + 1)`.
    fn next(chain: ChainId, prev: BlockId, n: u64, label: &str) -> Arc<Block> {
        Arc::new(Block::new(
            BlockDraft::extending(chain, prev, Rank::new(n, n + 1)).proposer(label),
        ))
    }

    fn extend_n(controller: &ChainController, from: BlockId, start: u64, count: u64, tag: &str) -> Vec<BlockId> {
        let mut prev = from;
        let mut ids = Vec::new();
        for n in start..start + count {
            let block = next(controller.id(), prev, n, &format!("{tag}{n}"));
            assert!(matches!(
                controller.submit_block(Arc::clone(&block)),
                SubmitOutcome::Applied { .. }
            ));
            prev = block.id();
            ids.push(prev);
        }
        ids
    }

    #[test]
    fn fresh_chain_has_only_genesis_as_head() {
        let controller = chain(context(6));
        assert_eq!(controller.get_block_r(), vec![controller.genesis()]);
        assert_eq!(controller.get_weight(&controller.genesis()).unwrap(), 0);
    }

    #[test]
    fn sequential_blocks_move_head_and_finalize_after_w_plus_one() {
        let observer = Arc::new(RecordingObserver::new());
        let controller = chain(context(6).with_observer(observer.clone()));
        let genesis = controller.genesis();

        let ids = extend_n(&controller, genesis, 1, 6, "B");
        assert_eq!(controller.get_block_r(), vec![ids[5]]);
        assert_eq!(controller.get_weight(&ids[5]).unwrap(), 6);
        assert!(observer.finalized().is_empty());

        let seventh = extend_n(&controller, ids[5], 7, 1, "B");
        assert_eq!(observer.finalized(), vec![ids[0]]);
        assert_eq!(controller.get_block_r(), seventh);
        assert_eq!(controller.undelivered_len(), 1);
        assert_eq!(controller.next_rank(), 2);
    }

    #[test]
    fn out_of_order_blocks_are_buffered_then_replayed() {
        let controller = chain(context(6));
        let genesis = controller.genesis();
        let a = next(ChainId::ROOT, genesis, 1, "a");
        let b = next(ChainId::ROOT, a.id(), 2, "b");
        let c = next(ChainId::ROOT, b.id(), 3, "c");

        assert_eq!(controller.submit_block(Arc::clone(&c)), SubmitOutcome::Buffered);
        assert_eq!(controller.submit_block(Arc::clone(&b)), SubmitOutcome::Buffered);
        assert_eq!(controller.stats().buffered_blocks, 2);
        assert_eq!(
            controller.submit_block(a),
            SubmitOutcome::Applied { applied: 3 }
        );
        assert_eq!(controller.get_block_r(), vec![c.id()]);
        assert_eq!(controller.stats().buffered_blocks, 0);
    }

    #[test]
    fn duplicates_and_malformed_blocks_are_reported() {
        let controller = chain(context(6));
        let a = next(ChainId::ROOT, controller.genesis(), 1, "a");
        assert!(controller.submit_block(Arc::clone(&a)).is_accepted());
        assert_eq!(controller.submit_block(a), SubmitOutcome::Duplicate);

        let orphan = Arc::new(Block::new(BlockDraft {
            previous: Vec::new(),
            ..BlockDraft::extending(ChainId::ROOT, controller.genesis(), Rank::new(1, 2))
        }));
        assert_eq!(
            controller.submit_block(orphan),
            SubmitOutcome::Rejected(RejectReason::MalformedPrevious { count: 0 })
        );

        let elsewhere = next(ChainId::new(2).unwrap(), controller.genesis(), 1, "x");
        assert!(matches!(
            controller.submit_block(elsewhere),
            SubmitOutcome::Rejected(RejectReason::WrongChain { .. })
        ));
    }

    #[test]
    fn rank_rules_are_enforced() {
        let controller = chain(context(6));
        let a = next(ChainId::ROOT, controller.genesis(), 5, "a");
        assert!(controller.submit_block(Arc::clone(&a)).is_accepted());

        let backwards = Arc::new(Block::new(BlockDraft::extending(
            ChainId::ROOT,
            a.id(),
            Rank::new(9, 8),
        )));
        assert_eq!(
            controller.submit_block(backwards),
            SubmitOutcome::Rejected(RejectReason::RankOutOfOrder(Rank::new(9, 8)))
        );

        let below_parent = next(ChainId::ROOT, a.id(), 5, "low");
        assert_eq!(
            controller.submit_block(below_parent),
            SubmitOutcome::Rejected(RejectReason::RankBelowParent {
                required: 6,
                got: 5
            })
        );
    }

    #[test]
    fn validator_refusals_are_dropped() {
        let ctx = context(6).with_validator(|block: &Block| block.proposer().0 != "mallory");
        let controller = chain(ctx);
        let bad = next(ChainId::ROOT, controller.genesis(), 1, "mallory");
        assert_eq!(
            controller.submit_block(bad),
            SubmitOutcome::Rejected(RejectReason::Invalid)
        );
        assert_eq!(controller.stats().live_blocks, 1);
    }

    #[test]
    fn losing_fork_is_discarded_and_forgotten() {
        let observer = Arc::new(RecordingObserver::new());
        let controller = chain(context(3).with_observer(observer.clone()));
        let genesis = controller.genesis();

        let winner = extend_n(&controller, genesis, 1, 1, "w");
        let loser = next(ChainId::ROOT, genesis, 1, "loser");
        assert!(controller.submit_block(Arc::clone(&loser)).is_accepted());
        assert_eq!(controller.stats().tips, 2);

        let rest = extend_n(&controller, winner[0], 2, 3, "w");
        assert_eq!(observer.discarded(), vec![loser.id()]);
        assert_eq!(observer.finalized(), vec![winner[0]]);
        assert_eq!(
            controller.get_weight(&loser.id()),
            Err(LedgerError::BlockNotFound(loser.id()))
        );
        assert!(controller.get_block(&loser.id()).is_none());
        assert_eq!(controller.get_block_r(), vec![rest[2]]);
        assert_eq!(controller.get_following(&winner[0], 1).unwrap(), vec![rest[0]]);
    }

    #[test]
    fn stale_blocks_behind_the_finalized_prefix_are_rejected() {
        let controller = chain(context(1));
        let ids = extend_n(&controller, controller.genesis(), 1, 3, "B");
        assert!(controller.next_rank() >= 3);

        let unknown_parent = BlockId::from_label("long gone");
        let stale = next(ChainId::ROOT, unknown_parent, 1, "stale");
        assert!(matches!(
            controller.submit_block(stale),
            SubmitOutcome::Rejected(RejectReason::Stale { .. })
        ));
        assert_eq!(controller.get_block_r(), vec![ids[2]]);
    }

    #[test]
    fn discard_pending_drops_chain_of_buffered_blocks() {
        let controller = chain(context(6));
        let missing = next(ChainId::ROOT, controller.genesis(), 1, "missing");
        let b = next(ChainId::ROOT, missing.id(), 2, "b");
        let c = next(ChainId::ROOT, b.id(), 3, "c");
        controller.submit_block(Arc::clone(&b));
        controller.submit_block(Arc::clone(&c));

        let dropped = controller.discard_pending(&b.id());
        assert_eq!(dropped, vec![b.id(), c.id()]);
        assert!(controller.discard_pending(&b.id()).is_empty());
        assert_eq!(controller.stats().missing_dependencies, 0);
    }

    #[test]
    fn proposals_skip_content_of_live_ancestors_and_finalized_content_is_consumed() {
        let controller = chain(context(2));
        let items: Vec<ContentItem> = (0u8..4)
            .map(|i| ContentItem::new(&[i; 8], Fingerprint::of(&[i]), Fingerprint::of(&[i])))
            .collect();
        for item in &items {
            assert!(controller.content().submit_content(item.clone()));
        }

        let proposal = controller.prepare_proposal(1 << 20);
        assert_eq!(proposal.previous, controller.genesis());
        assert_eq!(proposal.content.len(), 4);
        assert_eq!(proposal.min_rank, 0);

        let first = Arc::new(Block::new(proposal.draft(Rank::new(1, 2))));
        assert!(controller.submit_block(Arc::clone(&first)).is_accepted());
        let again = controller.prepare_proposal(1 << 20);
        assert!(again.content.is_empty());
        assert_eq!(again.min_rank, 2);

        extend_n(&controller, first.id(), 2, 2, "e");
        assert!(controller.content().is_empty());
    }

    #[test]
    fn heavy_load_splits_content_into_children() {
        let ctx = context(1).with_load(ContentThresholdLoad::new(2, 0));
        let controller = chain(ctx);
        for i in 0u8..16 {
            let fp = Fingerprint([i.wrapping_mul(37); 32]);
            controller
                .content()
                .submit_content(ContentItem::new(&[i], fp, fp));
        }
        let before = controller.content().ids();

        extend_n(&controller, controller.genesis(), 1, 2, "s");
        let [left, right] = controller.children().unwrap();
        assert_eq!(left.id(), ChainId::new(2).unwrap());
        assert_eq!(right.split_cursor().depth(), 1);
        assert_eq!(left.genesis(), right.genesis());
        assert!(controller.content().is_empty());

        let mut after = left.content().ids();
        after.extend(right.content().ids());
        assert_eq!(after, before);
        assert_eq!(controller.rank_floor(), controller.next_rank());

        let (_, loads) = controller.merge_candidate().unwrap();
        assert_eq!(loads[0].pending_items + loads[1].pending_items, before.len());
        let retired = controller.merge_children().unwrap();
        assert!(retired.iter().all(|child| child.is_retired()));
        assert_eq!(controller.content().ids(), before);
        assert_eq!(retired[0].rank_floor(), u64::MAX);
    }
}
