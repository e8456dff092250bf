pub mod allocator;
pub mod block;
pub mod chain_params;
pub mod coin;
pub mod config;
pub mod error;
pub mod fee;
pub mod mempool;
pub mod ssfee;
pub mod transaction;
pub mod utxo;

pub use allocator::{allocate, allocate_checked, Allocation, AllocationResult, SizeTracker};
pub use block::{Block, BlockHeader, BlockTemplateBuilder, BlockTemplateRequest};
pub use chain_params::{ChainParams, Clock, OutPoint, SSFeeIndex, SpendingView, UtxoView};
pub use coin::{format_amount, Amount, CoinType};
pub use config::AllocatorConfig;
pub use error::{CoreError, CoreResult};
pub use fee::{FeeEngine, FeeStats};
pub use mempool::PendingPool;
pub use ssfee::{build_miner_ssfee, build_staker_ssfee, is_maturity_exempt, Voter};
pub use transaction::{Transaction, TxInput, TxOutput};
pub use utxo::{Utxo, UtxoSet};

pub use varska_shared::{Hash256, SharedError};
