#![no_main]

use std::collections::HashSet;
use std::sync::Arc;

use arbor_core::block::{Block, BlockDraft, BlockId, Rank};
use arbor_core::chain::ChainId;
use arbor_core::config::LedgerConfig;
use arbor_core::observer::RecordingObserver;
use arbor_core::context::LedgerContext;
use arbor_core::tree::LedgerTree;
use libfuzzer_sys::fuzz_target;

// Each byte pair builds one root block: the first byte picks a parent among
// the blocks built so far, the second bumps the rank. Blocks are then
// delivered in an order derived from the same input.
fuzz_target!(|data: &[u8]| {
    let observer = Arc::new(RecordingObserver::new());
    let ctx = LedgerContext::new(LedgerConfig::default()).with_observer(observer.clone());
    let Ok(tree) = LedgerTree::new(ctx) else {
        return;
    };

    let genesis = tree.root().genesis();
    let mut parents: Vec<(BlockId, u64)> = vec![(genesis, 0)];
    let mut blocks = Vec::new();
    for (index, pair) in data.chunks_exact(2).take(256).enumerate() {
        let (parent, parent_next) = parents[usize::from(pair[0]) % parents.len()];
        let current = parent_next + u64::from(pair[1] % 4);
        let draft = BlockDraft::extending(ChainId::ROOT, parent, Rank::new(current, current + 1))
            .proposer(&format!("fuzz-{index}"));
        let block = Arc::new(Block::new(draft));
        parents.push((block.id(), current + 1));
        blocks.push(block);
    }

    // Rotate and reverse so children often arrive before parents.
    if let Some(first) = data.first() {
        let len = blocks.len().max(1);
        blocks.rotate_left(usize::from(*first) % len);
    }
    if data.len() % 3 == 0 {
        blocks.reverse();
    }

    for block in &blocks {
        let _ = tree.submit_block(Arc::clone(block));
    }
    tree.settle();

    let linearized = observer.linearized();
    let unique: HashSet<BlockId> = linearized.iter().map(|block| block.id()).collect();
    assert_eq!(unique.len(), linearized.len());
    assert!(linearized.windows(2).all(|pair| pair[0].rank().current <= pair[1].rank().current));
});
