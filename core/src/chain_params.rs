//! Capability interfaces the core consumes but does not implement
//! (spec.md §6, §9 "polymorphic chain-parameters dependency"). Concrete
//! implementations (a real UTXO database, a real chain-parameter table,
//! a wall clock) are injected by the composition root; the core only
//! ever sees these traits, never a global singleton.

use crate::coin::{Amount, CoinType};
use serde::{Deserialize, Serialize};
use varska_shared::types::{BlockHeight, OutputIndex, TxId};

/// An outpoint: a transaction id plus the index of one of its outputs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct OutPoint {
    pub txid: TxId,
    pub vout: OutputIndex,
}

impl OutPoint {
    #[must_use]
    pub const fn new(txid: TxId, vout: OutputIndex) -> Self {
        Self { txid, vout }
    }
}

/// A SKA type's activation record, as published by chain parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SkaActivation {
    pub emission_height: BlockHeight,
    pub emission_window: BlockHeight,
    pub active: bool,
}

/// Chain-wide configuration the core reads but never owns.
pub trait ChainParams {
    /// The active SKA set at height `h`, ascending by numeric tag. VAR is
    /// never included — callers that need "VAR plus the active set"
    /// union it in themselves (see `allocator::active_coin_types`).
    fn active_ska_types(&self, h: BlockHeight) -> Vec<CoinType>;

    /// The minimum relay fee floor for SKA transactions, in atoms per KB.
    /// Defaults to `default_min_relay_fee / 10` when chain parameters do
    /// not override it via `SKAMinRelayTxFee` (spec.md §4.2).
    fn ska_min_relay_tx_fee(&self) -> Amount;

    /// The default (VAR) minimum relay fee floor, in atoms per KB.
    fn default_min_relay_fee(&self) -> Amount;

    /// The activation record for a specific SKA tag, if chain parameters
    /// know about it at all.
    fn ska_activation(&self, coin_type: CoinType) -> Option<SkaActivation>;
}

/// A read-only view over the UTXO set.
pub trait UtxoView {
    /// Looks up an outpoint's value, coin type, creation height, block
    /// index within that block, and whether it was a stake-tree output.
    fn lookup(&self, outpoint: OutPoint) -> Option<UtxoEntry>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UtxoEntry {
    pub value: Amount,
    pub coin_type: CoinType,
    pub block_height: BlockHeight,
    pub block_index: u32,
    pub is_stake: bool,
}

/// The per-(coinType, address) index of live SSFee UTXOs (spec.md §3, §4.3).
pub trait SSFeeIndex {
    fn lookup(&self, coin_type: CoinType, addr_hash: [u8; 20]) -> Option<SSFeeEntry>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SSFeeEntry {
    pub outpoint: OutPoint,
    pub block_height: BlockHeight,
    pub block_index: u32,
    pub value: Amount,
}

/// Tells the SSFee builder whether an outpoint is already being consumed
/// elsewhere in the current block/mempool round (spec.md §4.3 step 1).
pub trait SpendingView {
    fn is_spent_in_current_round(&self, outpoint: OutPoint) -> bool;
}

/// A monotonic time source, used by the fee engine's staleness decay
/// (spec.md §4.2 "stale-block factor").
pub trait Clock {
    fn now(&self) -> varska_shared::types::Timestamp;
}

#[cfg(any(test, feature = "testing"))]
pub mod testing {
    use super::{
        Clock, OutPoint, SSFeeEntry, SSFeeIndex, SkaActivation, SpendingView, UtxoEntry, UtxoView,
    };
    use crate::coin::{Amount, CoinType};
    use varska_shared::types::{BlockHeight, Timestamp};
    use std::cell::Cell;
    use std::collections::HashMap;

    /// A fixed-in-memory `ChainParams` for tests: the active set never
    /// changes with height, matching how most unit tests just want a
    /// stable SKA roster.
    #[derive(Debug, Clone, Default)]
    pub struct StaticChainParams {
        pub active: Vec<CoinType>,
        pub default_min_relay_fee: Amount,
        pub ska_min_relay_tx_fee: Option<Amount>,
        pub activations: HashMap<CoinType, SkaActivation>,
    }

    impl StaticChainParams {
        #[must_use]
        pub fn new(active: Vec<CoinType>, default_min_relay_fee: Amount) -> Self {
            Self {
                active,
                default_min_relay_fee,
                ska_min_relay_tx_fee: None,
                activations: HashMap::new(),
            }
        }
    }

    impl super::ChainParams for StaticChainParams {
        fn active_ska_types(&self, _h: BlockHeight) -> Vec<CoinType> {
            let mut types = self.active.clone();
            types.sort();
            types
        }

        fn ska_min_relay_tx_fee(&self) -> Amount {
            self.ska_min_relay_tx_fee
                .unwrap_or(self.default_min_relay_fee / 10)
        }

        fn default_min_relay_fee(&self) -> Amount {
            self.default_min_relay_fee
        }

        fn ska_activation(&self, coin_type: CoinType) -> Option<SkaActivation> {
            self.activations.get(&coin_type).copied()
        }
    }

    /// An in-memory UTXO set for tests.
    #[derive(Debug, Clone, Default)]
    pub struct MapUtxoView(pub HashMap<OutPoint, UtxoEntry>);

    impl UtxoView for MapUtxoView {
        fn lookup(&self, outpoint: OutPoint) -> Option<UtxoEntry> {
            self.0.get(&outpoint).copied()
        }
    }

    /// An in-memory SSFee index for tests.
    #[derive(Debug, Clone, Default)]
    pub struct MapSSFeeIndex(pub HashMap<(CoinType, [u8; 20]), SSFeeEntry>);

    impl SSFeeIndex for MapSSFeeIndex {
        fn lookup(&self, coin_type: CoinType, addr_hash: [u8; 20]) -> Option<SSFeeEntry> {
            self.0.get(&(coin_type, addr_hash)).copied()
        }
    }

    /// A spending view backed by a plain set of already-claimed outpoints.
    #[derive(Debug, Clone, Default)]
    pub struct SetSpendingView(pub std::collections::HashSet<OutPoint>);

    impl SpendingView for SetSpendingView {
        fn is_spent_in_current_round(&self, outpoint: OutPoint) -> bool {
            self.0.contains(&outpoint)
        }
    }

    /// A clock whose value a test can advance explicitly.
    #[derive(Debug, Clone)]
    pub struct FakeClock(pub Cell<Timestamp>);

    impl FakeClock {
        #[must_use]
        pub fn new(now: Timestamp) -> Self {
            Self(Cell::new(now))
        }

        pub fn advance(&self, secs: Timestamp) {
            self.0.set(self.0.get() + secs);
        }
    }

    impl Clock for FakeClock {
        fn now(&self) -> Timestamp {
            self.0.get()
        }
    }
}
