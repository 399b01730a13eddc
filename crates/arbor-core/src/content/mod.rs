//! Pending content and mask-based sharding.
//!
//! - [`mask`]: the bit cursor that routes an item LEFT, RIGHT or CENTER.
//!   ([`MaskCursor`], [`Route`], [`Fingerprint`])
//! - [`store`]: the per-chain pending pool with deterministic batch selection
//!   and split/merge. ([`ContentStore`], [`ContentItem`])

pub mod mask;
pub mod store;

pub use mask::{FINGERPRINT_LEN, Fingerprint, MAX_MASK_BITS, MaskCursor, Route};
pub use store::{BlockLookup, ContentItem, ContentSplit, ContentStore, consumed_by_ancestors};
