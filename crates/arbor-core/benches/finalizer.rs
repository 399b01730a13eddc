use std::sync::Arc;

use arbor_core::block::{Block, BlockDraft, BlockId, Rank};
use arbor_core::chain::ChainId;
use arbor_core::config::LedgerConfig;
use arbor_core::fork::{BlockScheduler, ForkFinalizer};
use arbor_core::tree::LedgerTree;
use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};

const TIERS: [(&str, u64); 3] = [("small", 256), ("medium", 4_096), ("large", 32_768)];

fn linear_ids(count: u64) -> Vec<BlockId> {
    (0..=count)
        .map(|n| BlockId::from_label(&format!("bench-{n}")))
        .collect()
}

fn linear_blocks(chain: ChainId, genesis: BlockId, count: u64) -> Vec<Arc<Block>> {
    let mut prev = genesis;
    (1..=count)
        .map(|n| {
            let block = Arc::new(Block::new(BlockDraft::extending(
                chain,
                prev,
                Rank::new(n, n + 1),
            )));
            prev = block.id();
            block
        })
        .collect()
}

fn bench_fork_finalizer(c: &mut Criterion) {
    let mut group = c.benchmark_group("fork.add_block");

    for (name, count) in TIERS {
        let ids = linear_ids(count);
        group.throughput(Throughput::Elements(count));
        group.bench_with_input(BenchmarkId::new("linear", name), &ids, |b, ids| {
            b.iter(|| {
                let mut graph = ForkFinalizer::new(ids[0], 6).expect("valid bench config");
                let mut finalized = 0;
                for pair in ids.windows(2) {
                    if let Ok(step) = graph.add_block(pair[1], pair[0], 1) {
                        finalized += step.finalized.len();
                    }
                }
                black_box(finalized)
            });
        });

        // Every fourth block spawns a side branch that falls behind and is
        // pruned.
        group.bench_with_input(BenchmarkId::new("forking", name), &ids, |b, ids| {
            b.iter(|| {
                let mut graph = ForkFinalizer::new(ids[0], 6).expect("valid bench config");
                let mut pruned = 0;
                for (n, pair) in ids.windows(2).enumerate() {
                    if n % 4 == 0 {
                        let side = BlockId::from_label(&format!("side-{n}"));
                        let _ = graph.add_block(side, pair[0], 1);
                    }
                    if let Ok(step) = graph.add_block(pair[1], pair[0], 1) {
                        pruned += step.pruned.len();
                    }
                }
                black_box(pruned)
            });
        });
    }

    group.finish();
}

fn bench_scheduler(c: &mut Criterion) {
    let mut group = c.benchmark_group("fork.scheduler");

    for (name, count) in TIERS {
        let genesis = BlockId::from_label("scheduler-genesis");
        let blocks = linear_blocks(ChainId::ROOT, genesis, count);
        group.throughput(Throughput::Elements(count));
        group.bench_with_input(BenchmarkId::new("reverse", name), &blocks, |b, blocks| {
            b.iter(|| {
                let mut scheduler = BlockScheduler::new();
                for block in blocks.iter().skip(1).rev() {
                    let parent = block.parent().unwrap_or(genesis);
                    scheduler.submit_unordered_block(Arc::clone(block), &[parent]);
                }
                black_box(scheduler.get_valid_ordering(Arc::clone(&blocks[0])).len())
            });
        });
    }

    group.finish();
}

fn bench_single_chain_tree(c: &mut Criterion) {
    let mut group = c.benchmark_group("tree.submit_and_linearize");
    group.sample_size(20);

    for (name, count) in TIERS {
        group.throughput(Throughput::Elements(count));
        group.bench_function(BenchmarkId::from_parameter(name), |b| {
            b.iter(|| {
                let tree = LedgerTree::with_config(LedgerConfig::default())
                    .expect("valid bench config");
                for block in linear_blocks(ChainId::ROOT, tree.root().genesis(), count) {
                    black_box(tree.submit_block(block));
                }
                tree.settle();
                black_box(tree.linearized_count())
            });
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_fork_finalizer,
    bench_scheduler,
    bench_single_chain_tree
);
criterion_main!(benches);
