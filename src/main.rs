//! Demonstration binary: builds one block template end to end through
//! the allocator, fee engine, and SSFee consolidation builder, and
//! prints a summary. The node's real entry point (peer networking,
//! persistent storage, chain-parameter sourcing) is a composition root
//! that is out of scope here — see spec.md §6 "CLI / config: out of
//! scope".

use tracing::{info, Level};
use varska_core::chain_params::testing::{
    MapSSFeeIndex, MapUtxoView, SetSpendingView, StaticChainParams,
};
use varska_core::chain_params::UtxoEntry;
use varska_core::transaction::{TxInput, TxOutput};
use varska_core::{
    AllocatorConfig, BlockTemplateBuilder, BlockTemplateRequest, CoinType, FeeEngine,
    OutPoint, Transaction, Voter,
};
use varska_shared::Hash256;

fn main() {
    tracing_subscriber::fmt()
        .with_max_level(Level::INFO)
        .init();

    let active_ska = vec![CoinType::ska(1)];
    let chain_params = StaticChainParams::new(active_ska.clone(), 10_000);

    let fee_engine = FeeEngine::new(&chain_params, &chain_params_clock(), &active_ska);
    info!(
        var_min_fee = fee_engine.min_fee(250, CoinType::VAR),
        ska_min_fee = fee_engine.min_fee(250, CoinType::ska(1)),
        "fee engine seeded"
    );

    let mut utxo_view = MapUtxoView::default();
    let var_input = OutPoint::new(Hash256::keccak256(b"demo-var-input"), 0);
    let ska_input = OutPoint::new(Hash256::keccak256(b"demo-ska-input"), 0);
    utxo_view.0.insert(
        var_input,
        UtxoEntry {
            value: 100_000,
            coin_type: CoinType::VAR,
            block_height: 1,
            block_index: 0,
            is_stake: false,
        },
    );
    utxo_view.0.insert(
        ska_input,
        UtxoEntry {
            value: 50_000,
            coin_type: CoinType::ska(1),
            block_height: 1,
            block_index: 0,
            is_stake: false,
        },
    );

    let candidates = vec![
        Transaction::new(
            1,
            vec![TxInput::new(var_input, vec![], 0)],
            vec![TxOutput::new(98_500, CoinType::VAR, vec![1, 2, 3])],
            0,
        ),
        Transaction::new(
            1,
            vec![TxInput::new(ska_input, vec![], 0)],
            vec![TxOutput::new(49_000, CoinType::ska(1), vec![4, 5, 6])],
            0,
        ),
    ];

    let ssfee_index = MapSSFeeIndex::default();
    let spending_view = SetSpendingView::default();
    let builder = BlockTemplateBuilder::new(
        &chain_params,
        &utxo_view,
        &ssfee_index,
        &spending_view,
        AllocatorConfig::new(1_000_000),
    );

    let request = BlockTemplateRequest {
        height: 101,
        previous_hash: Hash256::zero(),
        timestamp: 1_700_000_000,
        reward: 500_000_000,
        miner_script_pubkey: vec![9, 9, 9],
        miner_addr_hash: [7u8; 20],
        voters: &[Voter {
            addr_hash: [1u8; 20],
        }],
        candidates: &candidates,
    };

    match builder.build(&request) {
        Ok(block) => {
            info!(
                height = block.header.height,
                transaction_count = block.transactions.len(),
                coinbase_value = block.transactions[0].outputs[0].value,
                "block template built"
            );
            for tx in &block.transactions {
                info!(
                    version = tx.version,
                    outputs = tx.outputs.len(),
                    coin_type = %tx.primary_coin_type(),
                    "transaction"
                );
            }
        }
        Err(err) => {
            tracing::error!(%err, "failed to build block template");
        }
    }
}

fn chain_params_clock() -> impl varska_core::chain_params::Clock {
    varska_core::chain_params::testing::FakeClock::new(1_700_000_000)
}
