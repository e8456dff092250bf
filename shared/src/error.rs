use thiserror::Error;

/// Errors shared by every crate in the workspace.
///
/// `varska-core` layers its own `CoreError` (see `core::error`) for the
/// §7 consensus-facing error kinds; this enum stays at the level of the
/// primitives `shared` actually owns (hashing, amounts, serialization).
#[derive(Error, Debug)]
pub enum SharedError {
    #[error("invalid transaction: {0}")]
    InvalidTransaction(String),

    #[error("invalid block: {0}")]
    InvalidBlock(String),

    #[error("invalid hash")]
    InvalidHash,

    #[error("utxo not found")]
    UtxoNotFound,

    #[error("insufficient funds")]
    InsufficientFunds,

    #[error("serialization error: {0}")]
    SerializationError(String),
}
