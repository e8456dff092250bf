//! An in-memory UTXO set: the concrete `UtxoView`/`SSFeeIndex` the demo
//! binary and integration tests exercise the core against. A production
//! composition root injects its own database-backed implementation of
//! those traits instead (spec.md §6, §9 "no global singletons").

use crate::chain_params::{OutPoint, SSFeeEntry, SSFeeIndex, UtxoEntry, UtxoView};
use crate::coin::{Amount, CoinType};
use crate::ssfee::AddrHash;
use crate::transaction::TxOutput;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use varska_shared::types::BlockHeight;

/// The maturity window for coinbase and stake-tree outputs, in blocks.
pub const MATURITY_WINDOW: BlockHeight = 100;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Utxo {
    pub output: TxOutput,
    pub block_height: BlockHeight,
    pub block_index: u32,
    pub is_stake: bool,
}

impl Utxo {
    #[must_use]
    pub const fn new(output: TxOutput, block_height: BlockHeight, block_index: u32, is_stake: bool) -> Self {
        Self {
            output,
            block_height,
            block_index,
            is_stake,
        }
    }

    /// Whether this UTXO has cleared the maturity window at
    /// `current_height`, ignoring the SSFee-specific exemption (that is
    /// layered on top by `ssfee::is_maturity_exempt` at the call site).
    #[must_use]
    pub fn is_mature(&self, current_height: BlockHeight, requires_maturity: bool) -> bool {
        if requires_maturity {
            current_height >= self.block_height + MATURITY_WINDOW
        } else {
            true
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UtxoSet {
    utxos: HashMap<OutPoint, Utxo>,
    ssfee_index: HashMap<(CoinType, AddrHash), OutPoint>,
}

impl UtxoSet {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, outpoint: OutPoint, utxo: Utxo) {
        self.utxos.insert(outpoint, utxo);
    }

    /// Registers `outpoint` as the live SSFee UTXO for `(coin_type,
    /// addr_hash)`, for `SSFeeIndex::lookup`.
    pub fn index_ssfee(&mut self, coin_type: CoinType, addr_hash: AddrHash, outpoint: OutPoint) {
        self.ssfee_index.insert((coin_type, addr_hash), outpoint);
    }

    pub fn remove(&mut self, outpoint: &OutPoint) -> Option<Utxo> {
        self.utxos.remove(outpoint)
    }

    #[must_use]
    pub fn get(&self, outpoint: &OutPoint) -> Option<&Utxo> {
        self.utxos.get(outpoint)
    }

    #[must_use]
    pub fn contains(&self, outpoint: &OutPoint) -> bool {
        self.utxos.contains_key(outpoint)
    }

    #[must_use]
    pub fn balance_for_script(&self, coin_type: CoinType, script: &[u8]) -> Amount {
        self.utxos
            .values()
            .filter(|u| u.output.coin_type == coin_type && u.output.script_pubkey == script)
            .map(|u| u.output.value)
            .sum()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.utxos.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.utxos.is_empty()
    }
}

impl UtxoView for UtxoSet {
    fn lookup(&self, outpoint: OutPoint) -> Option<UtxoEntry> {
        self.utxos.get(&outpoint).map(|u| UtxoEntry {
            value: u.output.value,
            coin_type: u.output.coin_type,
            block_height: u.block_height,
            block_index: u.block_index,
            is_stake: u.is_stake,
        })
    }
}

impl SSFeeIndex for UtxoSet {
    fn lookup(&self, coin_type: CoinType, addr_hash: AddrHash) -> Option<SSFeeEntry> {
        let outpoint = *self.ssfee_index.get(&(coin_type, addr_hash))?;
        let utxo = self.utxos.get(&outpoint)?;
        Some(SSFeeEntry {
            outpoint,
            block_height: utxo.block_height,
            block_index: utxo.block_index,
            value: utxo.output.value,
        })
    }
}
