//! Per-chain fork graph and out-of-order block scheduling.
//!
//! # Sub-modules
//!
//! - [`finalizer`]: id-keyed fork graph with tip tracking, weight-gap
//!   finalization and dead-fork pruning. ([`ForkFinalizer`], [`ForkNode`])
//! - [`scheduler`]: missing-parent buffer that releases blocks in a
//!   parent-before-child order. ([`BlockScheduler`])
//!
//! Neither structure is synchronized. A
//! [`ChainController`](crate::chain::ChainController) owns one of each and
//! serializes every mutation behind its write lock.

pub mod finalizer;
pub mod scheduler;

pub use finalizer::{FinalizationStep, ForkFinalizer, ForkNode};
pub use scheduler::{BlockScheduler, Linked};
