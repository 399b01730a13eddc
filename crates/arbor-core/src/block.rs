//! Immutable block and identifier types.
//!
//! Blocks arrive already validated and ranked by the external election
//! module. The core never mutates a block after construction; controllers
//! share them as `Arc<Block>`.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::chain::ChainId;

// ---------------------------------------------------------------------------
// Digest newtypes
// ---------------------------------------------------------------------------

macro_rules! digest_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        pub struct $name(pub [u8; 32]);

        impl $name {
            /// Derive an id by hashing an arbitrary label.
            #[must_use]
            pub fn from_label(label: &str) -> Self {
                Self(*blake3::hash(label.as_bytes()).as_bytes())
            }

            /// Raw digest bytes.
            #[must_use]
            pub const fn as_bytes(&self) -> &[u8; 32] {
                &self.0
            }

            /// Lowercase hex of the full digest.
            #[must_use]
            pub fn to_hex(&self) -> String {
                blake3::Hash::from(self.0).to_hex().to_string()
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({})", stringify!($name), &self.to_hex()[..12])
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.to_hex()[..12])
            }
        }
    };
}

digest_id!(
    /// Content-addressed block identity.
    BlockId
);

digest_id!(
    /// Content item identity, the BLAKE3 hash of the item payload.
    ContentId
);

// ---------------------------------------------------------------------------
// Rank
// ---------------------------------------------------------------------------

/// Proposer-assigned rank pair.
///
/// `current` orders the block globally across chains; `next` is the lowest
/// rank the chain's following block may carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Rank {
    pub current: u64,
    pub next: u64,
}

impl Rank {
    #[must_use]
    pub const fn new(current: u64, next: u64) -> Self {
        Self { current, next }
    }

    /// `current <= next`.
    #[must_use]
    pub const fn is_ordered(&self) -> bool {
        self.current <= self.next
    }
}

/// Reference to one content item inside a block batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ContentRef {
    pub id: ContentId,
    pub size: u64,
}

/// Opaque proposer identity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ProposerId(pub String);

impl fmt::Display for ProposerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ---------------------------------------------------------------------------
// Block
// ---------------------------------------------------------------------------

/// Field set used to build a [`Block`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockDraft {
    pub previous: Vec<BlockId>,
    pub chain: ChainId,
    pub content: Vec<ContentRef>,
    pub weight: u64,
    pub rank: Rank,
    pub proposer: ProposerId,
}

impl BlockDraft {
    /// A weight-1 block with no content extending `previous` on `chain`.
    #[must_use]
    pub fn extending(chain: ChainId, previous: BlockId, rank: Rank) -> Self {
        Self {
            previous: vec![previous],
            chain,
            content: Vec::new(),
            weight: 1,
            rank,
            proposer: ProposerId(String::new()),
        }
    }

    #[must_use]
    pub fn proposer(mut self, proposer: &str) -> Self {
        self.proposer = ProposerId(proposer.to_string());
        self
    }

    #[must_use]
    pub fn content(mut self, content: Vec<ContentRef>) -> Self {
        self.content = content;
        self
    }

    #[must_use]
    pub const fn weight(mut self, weight: u64) -> Self {
        self.weight = weight;
        self
    }

    fn digest(&self) -> BlockId {
        let mut hasher = blake3::Hasher::new();
        hasher.update(&(self.previous.len() as u64).to_le_bytes());
        for prev in &self.previous {
            hasher.update(prev.as_bytes());
        }
        hasher.update(&self.chain.as_u64().to_le_bytes());
        hasher.update(&(self.content.len() as u64).to_le_bytes());
        for item in &self.content {
            hasher.update(item.id.as_bytes());
            hasher.update(&item.size.to_le_bytes());
        }
        hasher.update(&self.weight.to_le_bytes());
        hasher.update(&self.rank.current.to_le_bytes());
        hasher.update(&self.rank.next.to_le_bytes());
        hasher.update(self.proposer.0.as_bytes());
        BlockId(*hasher.finalize().as_bytes())
    }
}

/// An immutable, ranked block destined for one chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    id: BlockId,
    previous: Vec<BlockId>,
    chain: ChainId,
    content: Vec<ContentRef>,
    weight: u64,
    rank: Rank,
    proposer: ProposerId,
}

impl Block {
    /// Build a block whose id is the hash of its fields.
    #[must_use]
    pub fn new(draft: BlockDraft) -> Self {
        let id = draft.digest();
        Self::with_id(id, draft)
    }

    /// Build a block with an externally assigned id.
    #[must_use]
    pub fn with_id(id: BlockId, draft: BlockDraft) -> Self {
        Self {
            id,
            previous: draft.previous,
            chain: draft.chain,
            content: draft.content,
            weight: draft.weight,
            rank: draft.rank,
            proposer: draft.proposer,
        }
    }

    /// The genesis block of the root chain: no parent, zero weight, rank zero.
    #[must_use]
    pub fn genesis(chain: ChainId) -> Self {
        Self {
            id: BlockId::from_label(&format!("arbor-genesis-{}", chain.as_u64())),
            previous: Vec::new(),
            chain,
            content: Vec::new(),
            weight: 0,
            rank: Rank::new(0, 0),
            proposer: ProposerId(String::new()),
        }
    }

    #[must_use]
    pub const fn id(&self) -> BlockId {
        self.id
    }

    #[must_use]
    pub fn previous(&self) -> &[BlockId] {
        &self.previous
    }

    #[must_use]
    pub const fn chain(&self) -> ChainId {
        self.chain
    }

    #[must_use]
    pub fn content(&self) -> &[ContentRef] {
        &self.content
    }

    #[must_use]
    pub const fn weight(&self) -> u64 {
        self.weight
    }

    #[must_use]
    pub const fn rank(&self) -> Rank {
        self.rank
    }

    #[must_use]
    pub const fn proposer(&self) -> &ProposerId {
        &self.proposer
    }

    /// The single parent of a well-formed block.
    #[must_use]
    pub fn parent(&self) -> Option<BlockId> {
        match self.previous.as_slice() {
            [only] => Some(*only),
            _ => None,
        }
    }
}
