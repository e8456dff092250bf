//! Transactions carrying a single coin type per spend (spec.md §3, §4.4).

use crate::allocator::WeightedTx;
use crate::chain_params::{OutPoint, UtxoView};
use crate::coin::{primary_coin_type, Amount, CoinType};
use crate::error::{CoreError, CoreResult};
use serde::{Deserialize, Serialize};
use varska_shared::{Hash256, Result as SharedResult, SharedError};

/// The canonical null outpoint index used by both coinbase inputs and
/// SKA-emission/mint inputs (spec.md §6).
pub const MAX_PREV_OUT_INDEX: u32 = 0xFFFF_FFFF;

/// `0x01 'S' 'K' 'A'` — the signature-script prefix that marks an SKA
/// emission (spec.md §4.4, §6).
pub const SKA_EMISSION_MARKER: [u8; 4] = [0x01, b'S', b'K', b'A'];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxInput {
    pub previous_output: OutPoint,
    pub script_sig: Vec<u8>,
    pub sequence: u32,
}

impl TxInput {
    #[must_use]
    pub const fn new(previous_output: OutPoint, script_sig: Vec<u8>, sequence: u32) -> Self {
        Self {
            previous_output,
            script_sig,
            sequence,
        }
    }

    #[must_use]
    pub fn coinbase(script_sig: Vec<u8>) -> Self {
        Self {
            previous_output: OutPoint::new(Hash256::zero(), MAX_PREV_OUT_INDEX),
            script_sig,
            sequence: MAX_PREV_OUT_INDEX,
        }
    }

    /// An emission or mint-path input: null prevOut, distinguished from
    /// a coinbase input only by its signature-script marker.
    #[must_use]
    pub fn null(script_sig: Vec<u8>) -> Self {
        Self {
            previous_output: OutPoint::new(Hash256::zero(), MAX_PREV_OUT_INDEX),
            script_sig,
            sequence: MAX_PREV_OUT_INDEX,
        }
    }

    #[must_use]
    pub fn has_null_prev_out(&self) -> bool {
        self.previous_output.txid == Hash256::zero()
            && self.previous_output.vout == MAX_PREV_OUT_INDEX
    }

    /// spec.md §4.4 "An SKA emission transaction is identified by
    /// prevOut = (all-zero-hash, MaxPrevOutIndex) and the marker 'SKA'
    /// in its signature-script."
    #[must_use]
    pub fn is_ska_emission(&self) -> bool {
        self.has_null_prev_out() && self.script_sig.starts_with(&SKA_EMISSION_MARKER)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxOutput {
    pub value: Amount,
    pub coin_type: CoinType,
    pub script_pubkey: Vec<u8>,
}

impl TxOutput {
    #[must_use]
    pub const fn new(value: Amount, coin_type: CoinType, script_pubkey: Vec<u8>) -> Self {
        Self {
            value,
            coin_type,
            script_pubkey,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    pub version: u32,
    pub inputs: Vec<TxInput>,
    pub outputs: Vec<TxOutput>,
    pub lock_time: u32,
}

impl Transaction {
    #[must_use]
    pub const fn new(
        version: u32,
        inputs: Vec<TxInput>,
        outputs: Vec<TxOutput>,
        lock_time: u32,
    ) -> Self {
        Self {
            version,
            inputs,
            outputs,
            lock_time,
        }
    }

    /// The VAR coinbase: the block's reward plus collected VAR fees, in
    /// a single output (spec.md §4.3 "Coinbase composition").
    #[must_use]
    pub fn coinbase(block_height: u64, reward_and_fees: Amount, script_pubkey: Vec<u8>) -> Self {
        let script_sig = block_height.to_le_bytes().to_vec();
        Self::new(
            1,
            vec![TxInput::coinbase(script_sig)],
            vec![TxOutput::new(reward_and_fees, CoinType::VAR, script_pubkey)],
            0,
        )
    }

    #[must_use]
    pub fn is_coinbase(&self) -> bool {
        self.inputs.len() == 1
            && self.inputs[0].has_null_prev_out()
            && !self.inputs[0].is_ska_emission()
    }

    #[must_use]
    pub fn is_ska_emission(&self) -> bool {
        self.inputs.len() == 1 && self.inputs[0].is_ska_emission()
    }

    /// This transaction's value-weighted primary coin type (spec.md §3).
    #[must_use]
    pub fn primary_coin_type(&self) -> CoinType {
        primary_coin_type(self.outputs.iter().map(|o| (o.coin_type, o.value)))
    }

    pub fn hash(&self) -> SharedResult<Hash256> {
        let serialized =
            serde_json::to_vec(self).map_err(|e| SharedError::SerializationError(e.to_string()))?;
        Ok(Hash256::keccak256(&serialized))
    }

    pub fn total_input_value<V: UtxoView>(&self, utxo_view: &V) -> CoreResult<Amount> {
        let mut total: Amount = 0;
        for input in &self.inputs {
            if input.has_null_prev_out() {
                continue;
            }
            let entry = utxo_view
                .lookup(input.previous_output)
                .ok_or(CoreError::UtxoNotFound)?;
            total = total.checked_add(entry.value).ok_or_else(|| {
                CoreError::InvalidTransaction("input value overflow".to_string())
            })?;
        }
        Ok(total)
    }

    pub fn total_output_value(&self) -> CoreResult<Amount> {
        let mut total: Amount = 0;
        for output in &self.outputs {
            total = total.checked_add(output.value).ok_or_else(|| {
                CoreError::InvalidTransaction("output value overflow".to_string())
            })?;
        }
        Ok(total)
    }

    pub fn fee<V: UtxoView>(&self, utxo_view: &V) -> CoreResult<Amount> {
        if self.is_coinbase() || self.is_ska_emission() {
            return Ok(0);
        }
        let input_value = self.total_input_value(utxo_view)?;
        let output_value = self.total_output_value()?;
        input_value
            .checked_sub(output_value)
            .ok_or_else(|| CoreError::InvalidTransaction("negative fee".to_string()))
    }

    /// spec.md §4.4 "Input/output coin-type consistency": for every
    /// non-coinbase, non-emission transaction, every input's resolved
    /// coin type must equal every output's coin type.
    pub fn check_coin_type_consistency<V: UtxoView>(&self, utxo_view: &V) -> CoreResult<()> {
        if self.is_coinbase() || self.is_ska_emission() {
            return Ok(());
        }

        let mut expected: Option<CoinType> = None;
        for input in &self.inputs {
            let entry = utxo_view
                .lookup(input.previous_output)
                .ok_or(CoreError::UtxoNotFound)?;
            match expected {
                None => expected = Some(entry.coin_type),
                Some(c) if c != entry.coin_type => return Err(CoreError::CoinTypeMismatch),
                Some(_) => {}
            }
        }
        for output in &self.outputs {
            match expected {
                None => expected = Some(output.coin_type),
                Some(c) if c != output.coin_type => return Err(CoreError::CoinTypeMismatch),
                Some(_) => {}
            }
        }
        Ok(())
    }

    #[must_use]
    pub fn estimated_size(&self) -> usize {
        let base = 4 + 4;
        let inputs_size = self.inputs.len() * (32 + 4 + 4) + self.inputs.iter().map(|i| i.script_sig.len()).sum::<usize>();
        let outputs_size = self.outputs.len() * (8 + 1) + self.outputs.iter().map(|o| o.script_pubkey.len()).sum::<usize>();
        base + inputs_size + outputs_size
    }

    pub fn validate_basic(&self) -> CoreResult<()> {
        if self.inputs.is_empty() || self.outputs.is_empty() {
            return Err(CoreError::InvalidTransaction(
                "empty inputs or outputs".to_string(),
            ));
        }
        self.total_output_value()?;
        for output in &self.outputs {
            if output.value < 0 {
                return Err(CoreError::InvalidTransaction(
                    "negative value output".to_string(),
                ));
            }
        }
        if !self.is_coinbase() && !self.is_ska_emission() {
            for input in &self.inputs {
                if input.has_null_prev_out() {
                    return Err(CoreError::InvalidTransaction(
                        "non-coinbase transaction with a null input".to_string(),
                    ));
                }
            }
        }
        if self.is_coinbase() && self.inputs.len() != 1 {
            return Err(CoreError::InvalidTransaction(
                "coinbase transaction must have exactly one input".to_string(),
            ));
        }
        Ok(())
    }
}

impl WeightedTx for Transaction {
    fn size_bytes(&self) -> usize {
        self.estimated_size()
    }

    fn primary_coin_type(&self) -> CoinType {
        self.primary_coin_type()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain_params::testing::MapUtxoView;
    use crate::chain_params::UtxoEntry;

    #[test]
    fn coinbase_is_recognized_and_pays_no_fee() {
        let coinbase = Transaction::coinbase(100, 5_000, vec![1, 2, 3]);
        assert!(coinbase.is_coinbase());
        assert!(!coinbase.is_ska_emission());
        let utxo_view = MapUtxoView::default();
        assert_eq!(coinbase.fee(&utxo_view).unwrap(), 0);
    }

    #[test]
    fn ska_emission_is_distinguished_from_coinbase() {
        let mut marker = SKA_EMISSION_MARKER.to_vec();
        marker.extend_from_slice(&[CoinType::ska(1).tag()]);
        let tx = Transaction::new(
            1,
            vec![TxInput::null(marker)],
            vec![TxOutput::new(1_000, CoinType::ska(1), vec![])],
            0,
        );
        assert!(tx.is_ska_emission());
        assert!(!tx.is_coinbase());
    }

    #[test]
    fn hash_is_deterministic() {
        let tx = Transaction::coinbase(10, 100, vec![9]);
        assert_eq!(tx.hash().unwrap(), tx.hash().unwrap());
    }

    #[test]
    fn coin_type_mismatch_is_rejected() {
        let outpoint = OutPoint::new(Hash256::zero(), 0);
        let mut utxo_view = MapUtxoView::default();
        utxo_view.0.insert(
            outpoint,
            UtxoEntry {
                value: 500,
                coin_type: CoinType::VAR,
                block_height: 1,
                block_index: 0,
                is_stake: false,
            },
        );
        let tx = Transaction::new(
            1,
            vec![TxInput::new(outpoint, vec![], 0)],
            vec![TxOutput::new(400, CoinType::ska(1), vec![])],
            0,
        );
        assert_eq!(
            tx.check_coin_type_consistency(&utxo_view).unwrap_err(),
            CoreError::CoinTypeMismatch
        );
    }

    #[test]
    fn consistent_coin_types_pass() {
        let outpoint = OutPoint::new(Hash256::zero(), 0);
        let mut utxo_view = MapUtxoView::default();
        utxo_view.0.insert(
            outpoint,
            UtxoEntry {
                value: 500,
                coin_type: CoinType::ska(1),
                block_height: 1,
                block_index: 0,
                is_stake: false,
            },
        );
        let tx = Transaction::new(
            1,
            vec![TxInput::new(outpoint, vec![], 0)],
            vec![TxOutput::new(400, CoinType::ska(1), vec![])],
            0,
        );
        assert!(tx.check_coin_type_consistency(&utxo_view).is_ok());
    }

    #[test]
    fn primary_coin_type_weighs_by_output_value() {
        let tx = Transaction::new(
            1,
            vec![TxInput::coinbase(vec![])],
            vec![
                TxOutput::new(100, CoinType::VAR, vec![]),
                TxOutput::new(900, CoinType::ska(2), vec![]),
            ],
            0,
        );
        assert_eq!(tx.primary_coin_type(), CoinType::ska(2));
    }
}
