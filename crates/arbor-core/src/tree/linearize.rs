//! Cross-chain linearization of finalized blocks.
//!
//! The confirm bar is the lowest rank any chain can still finalize. A
//! queued block whose `rank.current` is strictly below the bar can never be
//! preceded by a block that has not been finalized yet, so it is safe to
//! deliver.
//!
//! Within one bar, the head with the lowest rank is delivered first; equal
//! ranks go in source order. Once nothing below the bar is left, the bar is
//! recomputed, since chains may have finalized more in the meantime. The
//! pass ends when a fresh bar delivers nothing. Delivered ranks are
//! therefore non-decreasing across passes as well as within one.
//!
//! Sources are not visited round-robin. A chain whose queue holds several
//! low blocks drains them all before a chain whose head ranks higher, which
//! a per-chain rotation would interleave. Both orders are safe under the
//! same bar; ranking keeps the output independent of where a scan starts.

use std::sync::Arc;

use crate::block::Block;
use crate::chain::ChainId;

/// A chain's finalized-but-undelivered queue as the linearizer sees it.
///
/// Only the linearizer pops; producers only append.
pub trait FinalizedSource {
    fn chain_id(&self) -> ChainId;

    /// Lowest `rank.current` this source may still finalize.
    fn rank_floor(&self) -> u64;

    /// `rank.current` of the oldest undelivered block.
    fn head_rank(&self) -> Option<u64>;

    fn pop_head(&self) -> Option<Arc<Block>>;
}

/// One block placed in the global order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Linearized {
    pub seq: u64,
    pub chain: ChainId,
    pub block: Arc<Block>,
}

#[derive(Debug, Default)]
pub struct Linearizer {
    next_seq: u64,
    last_bar: u64,
}

impl Linearizer {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Blocks delivered so far.
    #[must_use]
    pub const fn delivered(&self) -> u64 {
        self.next_seq
    }

    /// Bar used by the most recent pass.
    #[must_use]
    pub const fn last_bar(&self) -> u64 {
        self.last_bar
    }

    /// Deliver everything currently safe.
    pub fn run<S: FinalizedSource>(&mut self, sources: &[Arc<S>]) -> Vec<Linearized> {
        let mut delivered = Vec::new();
        loop {
            let bar = confirm_bar(sources);
            self.last_bar = bar;

            let before = delivered.len();
            while let Some(source) = lowest_head_below(sources, bar) {
                let Some(block) = source.pop_head() else {
                    break;
                };
                delivered.push(Linearized {
                    seq: self.next_seq,
                    chain: source.chain_id(),
                    block,
                });
                self.next_seq += 1;
            }

            if delivered.len() == before {
                return delivered;
            }
        }
    }
}

/// Minimum floor over `sources`; `u64::MAX` when there are none.
pub fn confirm_bar<S: FinalizedSource>(sources: &[Arc<S>]) -> u64 {
    sources
        .iter()
        .map(|source| source.rank_floor())
        .min()
        .unwrap_or(u64::MAX)
}

fn lowest_head_below<S: FinalizedSource>(sources: &[Arc<S>], bar: u64) -> Option<&Arc<S>> {
    let mut best: Option<(u64, &Arc<S>)> = None;
    for source in sources {
        let Some(rank) = source.head_rank() else {
            continue;
        };
        if rank >= bar {
            continue;
        }
        if best.is_none_or(|(lowest, _)| rank < lowest) {
            best = Some((rank, source));
        }
    }
    best.map(|(_, source)| source)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::{BlockDraft, BlockId, Rank};
    use parking_lot::Mutex;
    use std::collections::VecDeque;

    #[derive(Debug)]
    struct MockSource {
        chain: ChainId,
        floor: Mutex<u64>,
        queue: Mutex<VecDeque<Arc<Block>>>,
    }

    impl MockSource {
        fn new(raw: u64, floor: u64, ranks: &[u64]) -> Arc<Self> {
            let chain = ChainId::new(raw).unwrap();
            let queue = ranks
                .iter()
                .map(|&r| {
                    Arc::new(Block::new(
                        BlockDraft::extending(chain, BlockId::from_label("p"), Rank::new(r, r))
                            .proposer(&format!("{raw}-{r}")),
                    ))
                })
                .collect();
            Arc::new(Self {
                chain,
                floor: Mutex::new(floor),
                queue: Mutex::new(queue),
            })
        }
    }

    impl FinalizedSource for MockSource {
        fn chain_id(&self) -> ChainId {
            self.chain
        }

        fn rank_floor(&self) -> u64 {
            *self.floor.lock()
        }

        fn head_rank(&self) -> Option<u64> {
            self.queue.lock().front().map(|b| b.rank().current)
        }

        fn pop_head(&self) -> Option<Arc<Block>> {
            self.queue.lock().pop_front()
        }
    }

    fn ranks(out: &[Linearized]) -> Vec<(u64, u64)> {
        out.iter()
            .map(|l| (l.chain.as_u64(), l.block.rank().current))
            .collect()
    }

    #[test]
    fn nothing_to_deliver_is_a_no_op() {
        let mut linearizer = Linearizer::new();
        let sources = vec![MockSource::new(1, 10, &[])];
        assert!(linearizer.run(&sources).is_empty());
        assert_eq!(linearizer.delivered(), 0);
        assert_eq!(linearizer.last_bar(), 10);
    }

    #[test]
    fn only_blocks_strictly_below_the_bar_are_delivered() {
        let mut linearizer = Linearizer::new();
        let a = MockSource::new(1, 5, &[3, 5, 7]);
        let b = MockSource::new(2, 9, &[4]);
        let out = linearizer.run(&[a.clone(), b.clone()]);
        assert_eq!(ranks(&out), vec![(1, 3), (2, 4)]);
        assert_eq!(a.head_rank(), Some(5));
    }

    #[test]
    fn heads_interleave_by_rank_and_ties_follow_source_order() {
        let mut linearizer = Linearizer::new();
        let a = MockSource::new(1, 100, &[1, 4, 6]);
        let b = MockSource::new(2, 100, &[2, 4, 5]);
        let out = linearizer.run(&[a, b]);
        assert_eq!(
            ranks(&out),
            vec![(1, 1), (2, 2), (1, 4), (2, 4), (2, 5), (1, 6)]
        );
        let seqs: Vec<u64> = out.iter().map(|l| l.seq).collect();
        assert_eq!(seqs, (0..6).collect::<Vec<_>>());
    }

    #[test]
    fn a_chain_with_low_heads_drains_before_the_others() {
        let mut linearizer = Linearizer::new();
        let busy = MockSource::new(1, 100, &[1, 2, 3]);
        let quiet = MockSource::new(2, 100, &[7]);
        let late = MockSource::new(3, 100, &[8]);

        let out = linearizer.run(&[quiet, late, busy]);
        assert_eq!(ranks(&out), vec![(1, 1), (1, 2), (1, 3), (2, 7), (3, 8)]);
    }

    #[test]
    fn a_lagging_chain_holds_everyone_back() {
        let mut linearizer = Linearizer::new();
        let fast = MockSource::new(1, 50, &[10, 20, 30]);
        let slow = MockSource::new(2, 15, &[]);
        let sources = [fast.clone(), slow.clone()];

        assert_eq!(ranks(&linearizer.run(&sources)), vec![(1, 10)]);

        *slow.floor.lock() = 40;
        assert_eq!(ranks(&linearizer.run(&sources)), vec![(1, 20), (1, 30)]);
        assert_eq!(linearizer.delivered(), 3);
    }

    #[test]
    fn empty_source_set_has_an_open_bar() {
        let sources: Vec<Arc<MockSource>> = Vec::new();
        assert_eq!(confirm_bar(&sources), u64::MAX);
    }
}
