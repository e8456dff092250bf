//! Blocks, and the template builder that ties the allocator (C1), fee
//! collection, and the SSFee consolidation builder (C3) together for a
//! single block (spec.md §4.1, §4.3).

use crate::allocator::{self, SizeTracker, WeightedTx};
use crate::chain_params::{ChainParams, OutPoint, SSFeeIndex, SpendingView, UtxoView};
use crate::coin::{Amount, CoinType};
use crate::config::AllocatorConfig;
use crate::error::CoreError;
use crate::ssfee::{self, AddrHash, Voter};
use crate::transaction::Transaction;
use crate::utxo::{Utxo, UtxoSet};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use varska_shared::types::BlockHeight;
use varska_shared::{Hash256, Result as SharedResult, SharedError};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockHeader {
    pub version: u32,
    pub height: BlockHeight,
    pub previous_hash: Hash256,
    pub merkle_root: Hash256,
    pub timestamp: i64,
}

impl BlockHeader {
    #[must_use]
    pub const fn new(
        version: u32,
        height: BlockHeight,
        previous_hash: Hash256,
        merkle_root: Hash256,
        timestamp: i64,
    ) -> Self {
        Self {
            version,
            height,
            previous_hash,
            merkle_root,
            timestamp,
        }
    }

    pub fn hash(&self) -> SharedResult<Hash256> {
        let serialized =
            serde_json::to_vec(self).map_err(|e| SharedError::SerializationError(e.to_string()))?;
        Ok(Hash256::keccak256(&serialized))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Block {
    pub header: BlockHeader,
    pub transactions: Vec<Transaction>,
}

impl Block {
    #[must_use]
    pub const fn new(header: BlockHeader, transactions: Vec<Transaction>) -> Self {
        Self {
            header,
            transactions,
        }
    }

    #[must_use]
    pub fn genesis(genesis_reward: Amount, genesis_script: Vec<u8>) -> Self {
        let coinbase = Transaction::coinbase(0, genesis_reward, genesis_script);
        let merkle_root = calculate_merkle_root(std::slice::from_ref(&coinbase))
            .unwrap_or_else(|_| Hash256::zero());
        let header = BlockHeader::new(1, 0, Hash256::zero(), merkle_root, 0);
        Self::new(header, vec![coinbase])
    }

    pub fn hash(&self) -> SharedResult<Hash256> {
        self.header.hash()
    }

    pub fn validate_basic(&self) -> Result<(), CoreError> {
        if self.transactions.is_empty() {
            return Err(CoreError::InvalidBlock(
                "block has no transactions".to_string(),
            ));
        }
        if !self.transactions[0].is_coinbase() {
            return Err(CoreError::InvalidBlock(
                "first transaction is not coinbase".to_string(),
            ));
        }
        for (i, tx) in self.transactions.iter().enumerate() {
            if i > 0 && tx.is_coinbase() {
                return Err(CoreError::InvalidBlock(
                    "multiple coinbase transactions".to_string(),
                ));
            }
            tx.validate_basic()?;
        }
        let calculated = calculate_merkle_root(&self.transactions)?;
        if calculated != self.header.merkle_root {
            return Err(CoreError::InvalidBlock("invalid merkle root".to_string()));
        }
        Ok(())
    }

    /// Removes spent UTXOs and records every output, including SSFee
    /// payment outputs (which also get registered in the set's SSFee
    /// index so the next block's builder can find them).
    pub fn apply_to_utxo_set(&self, utxo_set: &mut UtxoSet) -> Result<(), CoreError> {
        let block_height = self.header.height;

        for (block_index, tx) in self.transactions.iter().enumerate() {
            let txid = tx.hash()?;
            let is_stake = tx.version == 3;

            if !tx.is_coinbase() && !tx.is_ska_emission() {
                for input in &tx.inputs {
                    if !input.has_null_prev_out() && !utxo_set.contains(&input.previous_output) {
                        return Err(CoreError::UtxoNotFound);
                    }
                    if !input.has_null_prev_out() {
                        utxo_set.remove(&input.previous_output);
                    }
                }
            }

            for (output_index, output) in tx.outputs.iter().enumerate() {
                let vout = u32::try_from(output_index).map_err(|_| {
                    CoreError::InvalidBlock("output index overflow".to_string())
                })?;
                let outpoint = OutPoint::new(txid, vout);
                if is_stake {
                    if let Some(addr_hash) = ssfee::parse_pay_script_addr_hash(&output.script_pubkey) {
                        utxo_set.index_ssfee(output.coin_type, addr_hash, outpoint);
                    }
                }
                utxo_set.insert(
                    outpoint,
                    Utxo::new(output.clone(), block_height, block_index as u32, is_stake),
                );
            }
        }

        Ok(())
    }

    #[must_use]
    pub fn size(&self) -> usize {
        const HEADER_SIZE: usize = 96;
        HEADER_SIZE
            + self
                .transactions
                .iter()
                .map(Transaction::estimated_size)
                .sum::<usize>()
    }
}

pub fn calculate_merkle_root(transactions: &[Transaction]) -> SharedResult<Hash256> {
    if transactions.is_empty() {
        return Ok(Hash256::zero());
    }
    let mut hashes: Vec<Hash256> = transactions
        .iter()
        .map(Transaction::hash)
        .collect::<SharedResult<Vec<_>>>()?;

    if hashes.len() == 1 {
        return Ok(hashes[0]);
    }

    while hashes.len() > 1 {
        let mut next_level = Vec::with_capacity(hashes.len().div_ceil(2));
        for chunk in hashes.chunks(2) {
            let mut data = Vec::new();
            data.extend_from_slice(chunk[0].as_bytes());
            data.extend_from_slice(chunk.get(1).unwrap_or(&chunk[0]).as_bytes());
            next_level.push(Hash256::keccak256(&data));
        }
        hashes = next_level;
    }
    Ok(hashes[0])
}

/// Everything one call to [`BlockTemplateBuilder::build`] needs that
/// varies per block, as opposed to the builder's fixed capability
/// handles.
pub struct BlockTemplateRequest<'a> {
    pub height: BlockHeight,
    pub previous_hash: Hash256,
    pub timestamp: i64,
    pub reward: Amount,
    pub miner_script_pubkey: Vec<u8>,
    pub miner_addr_hash: AddrHash,
    pub voters: &'a [Voter],
    /// Candidate transactions, pre-sorted by the caller's fee priority
    /// (highest first) — the builder admits them greedily in this
    /// order up to each coin type's allocator budget.
    pub candidates: &'a [Transaction],
}

/// Builds a block template: runs the allocator over candidate demand,
/// selects transactions within each coin type's granted space, collects
/// VAR fees into the coinbase, and folds SKA fees through the staker
/// and miner SSFee builders (spec.md §4.1, §4.3, "Coinbase
/// composition").
pub struct BlockTemplateBuilder<'a, C, V, I, S> {
    chain_params: &'a C,
    utxo_view: &'a V,
    ssfee_index: &'a I,
    spending_view: &'a S,
    allocator_config: AllocatorConfig,
}

impl<'a, C, V, I, S> BlockTemplateBuilder<'a, C, V, I, S>
where
    C: ChainParams,
    V: UtxoView,
    I: SSFeeIndex,
    S: SpendingView,
{
    #[must_use]
    pub fn new(
        chain_params: &'a C,
        utxo_view: &'a V,
        ssfee_index: &'a I,
        spending_view: &'a S,
        allocator_config: AllocatorConfig,
    ) -> Self {
        Self {
            chain_params,
            utxo_view,
            ssfee_index,
            spending_view,
            allocator_config,
        }
    }

    pub fn build(&self, request: &BlockTemplateRequest<'_>) -> Result<Block, CoreError> {
        let active = self.chain_params.active_ska_types(request.height);

        let mut pending: BTreeMap<CoinType, usize> = BTreeMap::new();
        for tx in request.candidates {
            *pending.entry(tx.primary_coin_type()).or_insert(0) += tx.size_bytes();
        }
        let allocation = allocator::allocate(
            self.allocator_config.max_block_size,
            &active,
            &pending,
        );

        let mut tracker = SizeTracker::new(self.allocator_config.max_block_size);
        let mut selected: Vec<Transaction> = Vec::new();
        let mut var_fees: Amount = 0;
        let mut ska_fees: BTreeMap<CoinType, Amount> = BTreeMap::new();

        for tx in request.candidates {
            let coin_type = tx.primary_coin_type();
            let Some(budget) = allocation.per_coin.get(&coin_type) else {
                continue;
            };
            if budget.final_size == 0 {
                continue;
            }
            if !tracker.can_add(tx, &active) {
                continue;
            }
            let fee = tx.fee(self.utxo_view)?;
            tracker.add(tx);
            if coin_type.is_var() {
                var_fees = var_fees.saturating_add(fee);
            } else {
                *ska_fees.entry(coin_type).or_insert(0) += fee;
            }
            selected.push(tx.clone());
        }

        let coinbase = Transaction::coinbase(
            request.height,
            request.reward.saturating_add(var_fees),
            request.miner_script_pubkey.clone(),
        );

        let mut ssfee_transactions = Vec::new();
        for (coin_type, total_fee) in ska_fees {
            let (staker_share, miner_share) = ssfee::split_staker_miner(total_fee);
            let staker_txs = ssfee::build_staker_ssfee(
                coin_type,
                staker_share,
                request.voters,
                request.height,
                self.ssfee_index,
                self.spending_view,
            )?;
            let miner_txs = ssfee::build_miner_ssfee(
                coin_type,
                miner_share,
                request.miner_addr_hash,
                request.height,
                self.ssfee_index,
                self.spending_view,
            )?;
            ssfee_transactions.extend(staker_txs);
            ssfee_transactions.extend(miner_txs);
        }

        let mut transactions = Vec::with_capacity(1 + ssfee_transactions.len() + selected.len());
        transactions.push(coinbase);
        transactions.extend(ssfee_to_transactions(ssfee_transactions));
        transactions.extend(selected);

        let merkle_root = calculate_merkle_root(&transactions)?;
        let header = BlockHeader::new(
            1,
            request.height,
            request.previous_hash,
            merkle_root,
            request.timestamp,
        );

        Ok(Block::new(header, transactions))
    }
}

/// Lowers the builder's `SSFeeTransaction` records into ordinary
/// `Transaction`s so they can sit in a block alongside everything else.
fn ssfee_to_transactions(ssfee_txs: Vec<ssfee::SSFeeTransaction>) -> Vec<Transaction> {
    use crate::transaction::{TxInput, TxOutput};

    ssfee_txs
        .into_iter()
        .map(|t| {
            let input = match t.input {
                ssfee::SSFeeInput::Augment { outpoint, .. } => {
                    TxInput::new(outpoint, Vec::new(), 0xFFFF_FFFF)
                }
                ssfee::SSFeeInput::Mint => TxInput::null(Vec::new()),
            };
            Transaction::new(
                t.version,
                vec![input],
                vec![
                    TxOutput::new(t.marker.value, t.marker.coin_type, t.marker.script),
                    TxOutput::new(t.payment.value, t.payment.coin_type, t.payment.script),
                ],
                0,
            )
        })
        .collect()
}
