//! arbor-sim library.
//!
//! Drives one [`LedgerTree`] through many rounds of content arrival, block
//! proposals and faulty delivery, all from a single seed, then hands the
//! final state to the [`oracle`].
//!
//! # Conventions
//!
//! - **Errors**: `anyhow::Result` for return types.
//! - **Logging**: `tracing` macros; the binary installs the subscriber.

pub mod campaign;
pub mod delivery;
pub mod oracle;
pub mod proposer;
pub mod rng;

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use arbor_core::block::{Block, BlockId, ContentId};
use arbor_core::chain::{ChainId, SubmitOutcome};
use arbor_core::config::LedgerConfig;
use arbor_core::content::{ContentItem, FINGERPRINT_LEN, Fingerprint};
use arbor_core::context::LedgerContext;
use arbor_core::observer::{ObservedEvent, RecordingObserver};
use arbor_core::strategy::ContentThresholdLoad;
use arbor_core::tree::{FinalizedSource, LedgerTree, TickReport};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use delivery::{DeliveryQueue, FaultConfig};
use proposer::SimulatedProposer;
use rng::DeterministicRng;

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SimulationConfig {
    pub seed: u64,
    pub rounds: u64,
    pub proposers: usize,
    /// Content items submitted per round.
    pub items_per_round: usize,
    /// Rounds, from the start, that receive content. Later rounds only
    /// drain, which gives idle children a chance to merge.
    pub content_rounds: u64,
    /// Chance per proposal of extending an older tip.
    pub fork_rate_percent: u8,
    /// Chance per proposal of ignoring the priority policy.
    pub explore_rate_percent: u8,
    /// Chance per round of invalidating one pending item.
    pub invalidate_rate_percent: u8,
    /// Split a chain holding more than this many pending items.
    pub spawn_above: usize,
    /// Merge two children once both hold fewer than this many.
    pub merge_below: usize,
    pub fault: FaultConfig,
    pub ledger: LedgerConfig,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        let mut ledger = LedgerConfig::default();
        ledger.fork.finalized_weight = 2;
        ledger.tree.max_num_chains = 15;
        ledger.tree.max_mask_depth = 3;
        ledger.content.max_batch_size = 4_096;
        ledger.content.safety_offset = 256;
        Self {
            seed: 0,
            rounds: 64,
            proposers: 3,
            items_per_round: 4,
            content_rounds: 32,
            fork_rate_percent: 10,
            explore_rate_percent: 40,
            invalidate_rate_percent: 5,
            spawn_above: 10,
            merge_below: 3,
            fault: FaultConfig::default(),
            ledger,
        }
    }
}

impl SimulationConfig {
    /// # Errors
    ///
    /// Returns an error if a parameter is out of range or the ledger
    /// configuration does not validate.
    pub fn validate(&self) -> Result<()> {
        if self.rounds == 0 {
            bail!("rounds must be > 0");
        }
        if self.proposers == 0 {
            bail!("proposers must be > 0");
        }
        self.ledger
            .validate()
            .context("invalid ledger configuration")?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Trace and result
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TraceEvent {
    pub round: u64,
    pub kind: TraceEventKind,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TraceEventKind {
    ContentSubmitted {
        content: ContentId,
        chain: ChainId,
    },
    ContentInvalidated {
        content: ContentId,
        chain: Option<ChainId>,
    },
    Proposed {
        proposer: String,
        chain: ChainId,
        block: BlockId,
        forked: bool,
    },
    Delivered {
        block: BlockId,
        outcome: String,
    },
    Tick {
        registered: Vec<ChainId>,
        merged: Vec<ChainId>,
        removed: Vec<ChainId>,
        linearized: usize,
    },
}

/// One registered chain at the end of a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainSnapshot {
    pub id: ChainId,
    pub retired: bool,
    pub children: Option<[ChainId; 2]>,
    pub pending: BTreeSet<ContentId>,
    pub undelivered_head: Option<u64>,
}

/// Counters for a run, used to spot seeds that exercised resharding.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SimulationStats {
    pub proposed: u64,
    pub forked: u64,
    pub applied: u64,
    pub buffered: u64,
    pub duplicates: u64,
    pub rejected: u64,
    pub spawned_chains: u64,
    pub merges: u64,
    pub removed_chains: u64,
}

#[derive(Debug, Clone)]
pub struct SimulationResult {
    pub trace: Vec<TraceEvent>,
    pub stats: SimulationStats,
    pub root_genesis: BlockId,
    /// Every block a proposer built.
    pub blocks: BTreeMap<BlockId, Arc<Block>>,
    /// `(chain, block)` for every finalization report, in report order.
    pub finalized: Vec<(ChainId, BlockId)>,
    /// The global order, as delivered to the observer.
    pub linearized: Vec<Arc<Block>>,
    pub submitted_content: BTreeSet<ContentId>,
    pub invalidated_content: BTreeSet<ContentId>,
    pub chains: Vec<ChainSnapshot>,
    pub final_bar: u64,
    pub interesting_state_reached: bool,
}

// ---------------------------------------------------------------------------
// Simulator
// ---------------------------------------------------------------------------

pub struct Simulator {
    config: SimulationConfig,
    rng: DeterministicRng,
    tree: LedgerTree,
    observer: Arc<RecordingObserver>,
    queue: DeliveryQueue,
    proposers: Vec<SimulatedProposer>,
    trace: Vec<TraceEvent>,
    stats: SimulationStats,
    blocks: BTreeMap<BlockId, Arc<Block>>,
    submitted: Vec<ContentId>,
    invalidated: BTreeSet<ContentId>,
}

impl Simulator {
    /// # Errors
    ///
    /// Returns an error if the configuration does not validate.
    pub fn new(config: SimulationConfig) -> Result<Self> {
        config.validate()?;

        let observer = Arc::new(RecordingObserver::new());
        let ctx = LedgerContext::new(config.ledger.clone())
            .with_load(ContentThresholdLoad::new(
                config.spawn_above,
                config.merge_below,
            ))
            .with_observer(observer.clone());
        let tree = LedgerTree::new(ctx).context("failed to build ledger tree")?;

        let proposers = (0..config.proposers)
            .map(|index| {
                SimulatedProposer::new(
                    index,
                    config.fork_rate_percent,
                    config.explore_rate_percent,
                )
            })
            .collect();

        Ok(Self {
            rng: DeterministicRng::new(config.seed),
            queue: DeliveryQueue::new(config.fault),
            config,
            tree,
            observer,
            proposers,
            trace: Vec::new(),
            stats: SimulationStats::default(),
            blocks: BTreeMap::new(),
            submitted: Vec::new(),
            invalidated: BTreeSet::new(),
        })
    }

    /// Run every round, drain the delivery queue and settle the tree.
    ///
    /// # Errors
    ///
    /// Reserved for harness failures; invariant breaches are reported by the
    /// oracle, not here.
    pub fn run(&mut self) -> Result<SimulationResult> {
        info!(seed = self.config.seed, rounds = self.config.rounds, "simulation started");

        for round in 0..self.config.rounds {
            self.submit_content(round);
            self.maybe_invalidate(round);
            self.propose(round);

            let delivered = self.queue.deliver_ready(round, &mut self.rng);
            for block in delivered.delivered {
                self.deliver(round, &block);
            }

            let report = self.tree.tick();
            self.record_tick(round, &report);
        }

        let last = self.config.rounds;
        for block in self.queue.drain_all() {
            self.deliver(last, &block);
        }
        for report in self.tree.settle() {
            self.record_tick(last, &report);
        }

        let result = self.collect();
        info!(
            seed = self.config.seed,
            linearized = result.linearized.len(),
            spawned = result.stats.spawned_chains,
            merges = result.stats.merges,
            "simulation finished"
        );
        Ok(result)
    }

    fn submit_content(&mut self, round: u64) {
        if round >= self.config.content_rounds {
            return;
        }
        for index in 0..self.config.items_per_round {
            let item = self.random_item(round, index);
            let id = item.id;
            let (chain, inserted) = self.tree.submit_content(item);
            if inserted {
                self.submitted.push(id);
                self.push(round, TraceEventKind::ContentSubmitted { content: id, chain });
            }
        }
    }

    /// Fingerprints agree on a random number of leading bytes, so items
    /// settle at every depth of the tree.
    fn random_item(&mut self, round: u64, index: usize) -> ContentItem {
        let mut payload = vec![0u8; 16 + self.rng.next_index(48)];
        self.rng.fill_bytes(&mut payload);
        payload.extend_from_slice(&round.to_le_bytes());
        payload.extend_from_slice(&(index as u64).to_le_bytes());

        let mut first = [0u8; FINGERPRINT_LEN];
        let mut second = [0u8; FINGERPRINT_LEN];
        self.rng.fill_bytes(&mut first);
        self.rng.fill_bytes(&mut second);
        let shared = self.rng.next_index(FINGERPRINT_LEN / 8);
        second[..shared].copy_from_slice(&first[..shared]);

        ContentItem::new(&payload, Fingerprint(first), Fingerprint(second))
    }

    fn maybe_invalidate(&mut self, round: u64) {
        if !self.rng.hit_rate_percent(self.config.invalidate_rate_percent) {
            return;
        }
        let Some(&content) = self.rng.pick(&self.submitted) else {
            return;
        };
        if !self.invalidated.insert(content) {
            return;
        }
        let chain = self.tree.invalidate_content(&content);
        self.push(round, TraceEventKind::ContentInvalidated { content, chain });
    }

    fn propose(&mut self, round: u64) {
        let max_batch = self.config.ledger.content.max_batch_size;
        for index in 0..self.proposers.len() {
            let Some(proposed) =
                self.proposers[index].propose(&self.tree, round, max_batch, &mut self.rng)
            else {
                continue;
            };
            let block = proposed.block;
            self.stats.proposed += 1;
            if proposed.forked {
                self.stats.forked += 1;
            }
            let kind = TraceEventKind::Proposed {
                proposer: self.proposers[index].name().to_string(),
                chain: block.chain(),
                block: block.id(),
                forked: proposed.forked,
            };
            self.push(round, kind);
            self.blocks.insert(block.id(), Arc::clone(&block));
            self.queue.send(block, round, &mut self.rng);
        }
    }

    fn deliver(&mut self, round: u64, block: &Arc<Block>) {
        let outcome = self.tree.submit_block(Arc::clone(block));
        match &outcome {
            SubmitOutcome::Applied { applied } => self.stats.applied += *applied as u64,
            SubmitOutcome::Buffered => self.stats.buffered += 1,
            SubmitOutcome::Duplicate => self.stats.duplicates += 1,
            SubmitOutcome::Rejected(reason) => {
                self.stats.rejected += 1;
                debug!(block = %block.id(), %reason, "simulated block rejected");
            }
        }
        self.push(
            round,
            TraceEventKind::Delivered {
                block: block.id(),
                outcome: format!("{outcome:?}"),
            },
        );
    }

    fn record_tick(&mut self, round: u64, report: &TickReport) {
        self.stats.spawned_chains += report.registered.len() as u64;
        self.stats.merges += report.merged.len() as u64;
        self.stats.removed_chains += report.removed.len() as u64;
        if report.is_idle() {
            return;
        }
        self.push(
            round,
            TraceEventKind::Tick {
                registered: report.registered.clone(),
                merged: report.merged.clone(),
                removed: report.removed.clone(),
                linearized: report.linearized,
            },
        );
    }

    fn push(&mut self, round: u64, kind: TraceEventKind) {
        self.trace.push(TraceEvent { round, kind });
    }

    fn collect(&self) -> SimulationResult {
        let mut finalized = Vec::new();
        let mut linearized = Vec::new();
        for event in self.observer.events() {
            match event {
                ObservedEvent::Finalized { chain, ordered, .. } => {
                    finalized.extend(ordered.into_iter().map(|block| (chain, block)));
                }
                ObservedEvent::Linearized { block, .. } => linearized.push(block),
                ObservedEvent::NonFinalized { .. } => {}
            }
        }

        let chains = self
            .tree
            .chain_ids()
            .into_iter()
            .filter_map(|id| self.tree.chain(id))
            .map(|chain| ChainSnapshot {
                id: chain.id(),
                retired: chain.is_retired(),
                children: chain.children().map(|[left, right]| [left.id(), right.id()]),
                pending: chain.content().ids(),
                undelivered_head: chain.head_rank(),
            })
            .collect();

        SimulationResult {
            trace: self.trace.clone(),
            stats: self.stats.clone(),
            root_genesis: self.tree.root().genesis(),
            blocks: self.blocks.clone(),
            finalized,
            linearized,
            submitted_content: self.submitted.iter().copied().collect(),
            invalidated_content: self.invalidated.clone(),
            chains,
            final_bar: self.tree.confirm_bar(),
            interesting_state_reached: self.stats.spawned_chains > 0 && self.stats.merges > 0,
        }
    }
}
