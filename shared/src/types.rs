//! Identifier and timestamp aliases shared across the workspace.

/// Unique identifier of a transaction.
pub type TxId = crate::Hash256;

/// Unique identifier of a block.
pub type BlockId = crate::Hash256;

/// Unix timestamp, seconds.
pub type Timestamp = i64;

/// Height of a block in the chain, genesis = 0.
pub type BlockHeight = u64;

/// Index of an output within a transaction.
pub type OutputIndex = u32;
