//! arbor-core library.
//!
//! A ledger engine that keeps blocks in a dynamically resharding tree of
//! chains. Each chain finalizes by weight gap on its own fork graph, chains
//! split under load and merge back when idle, and every chain's finalized
//! blocks are merged into one rank-ordered sequence.
//!
//! Blocks arrive already validated and ranked; transport, election, signing
//! and persistence live outside this crate.
//!
//! # Conventions
//!
//! - **Errors**: queries return [`error::LedgerError`]; config loading returns
//!   `anyhow::Result`. Bad blocks are not errors, see [`SubmitOutcome`].
//! - **Logging**: `tracing` macros with `chain` and `block` fields. This crate
//!   never installs a subscriber.

pub mod block;
pub mod chain;
pub mod config;
pub mod content;
pub mod context;
pub mod error;
pub mod fork;
pub mod observer;
pub mod strategy;
pub mod tree;

pub use block::{Block, BlockDraft, BlockId, ContentId, ContentRef, ProposerId, Rank};
pub use chain::{ChainController, ChainId, ChainStats, Proposal, RejectReason, SubmitOutcome};
pub use config::LedgerConfig;
pub use content::{ContentItem, Fingerprint};
pub use context::LedgerContext;
pub use error::{ErrorCode, LedgerError};
pub use observer::LedgerObserver;
pub use tree::{LedgerTree, TickReport};
