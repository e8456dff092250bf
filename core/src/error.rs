use thiserror::Error;
use varska_shared::SharedError;

/// The §7 error taxonomy: every rejection the allocator, fee engine, or
/// SSFee builder can produce is one of these tagged kinds. Message text is
/// informational only — callers must match on the variant, never parse
/// the `Display` output.
///
/// `shared`'s own `SharedError` is never nested here — its payload is
/// unpacked into owned `String`s per variant instead, the way the
/// teacher's `BondError` absorbs `BlockchainError` — so that `CoreError`
/// stays `Clone`/`PartialEq` regardless of whether `SharedError` is.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CoreError {
    #[error("coin type {0} is invalid in this context")]
    InvalidCoinType(u32),

    #[error("transaction mixes coin types across inputs and outputs")]
    CoinTypeMismatch,

    #[error("coin type {0} is not active at the current height")]
    InactiveCoinType(u8),

    #[error("a pending emission for coin type {0} already exists")]
    DuplicateEmission(u8),

    #[error("fee {fee} is below the relay floor {floor} for a {size}-byte transaction")]
    InsufficientFee { fee: i64, floor: i64, size: usize },

    #[error("fee {fee} exceeds the maximum {max} and high fees are not allowed")]
    FeeTooHigh { fee: i64, max: i64 },

    #[error("allocator invariant violated: total final {total} exceeds block size {max}")]
    AllocationOverflow { total: usize, max: usize },

    #[error("SSFee staker share is negative: {0}")]
    SSFeeNegativeShare(i64),

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

impl From<SharedError> for CoreError {
    fn from(err: SharedError) -> Self {
        match err {
            SharedError::InvalidTransaction(msg) => CoreError::InvalidTransaction(msg),
            SharedError::InvalidBlock(msg) => CoreError::InvalidBlock(msg),
            SharedError::InvalidHash => CoreError::InvalidHash,
            SharedError::UtxoNotFound => CoreError::UtxoNotFound,
            SharedError::InsufficientFunds => CoreError::InsufficientFunds,
            SharedError::SerializationError(msg) => CoreError::SerializationError(msg),
        }
    }
}

pub type CoreResult<T> = std::result::Result<T, CoreError>;
