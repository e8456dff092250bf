//! The shared mempool policy checks of spec.md §4.4: SKA emission
//! de-duplication and input/output coin-type consistency.

use crate::chain_params::UtxoView;
use crate::coin::CoinType;
use crate::error::{CoreError, CoreResult};
use crate::transaction::Transaction;
use std::collections::HashMap;
use tracing::warn;
use varska_shared::Hash256;

/// Tracks pending SKA emissions by coin type, so a second emission for
/// the same type is rejected before it can reach a block (spec.md
/// §4.4).
#[derive(Debug, Clone, Default)]
pub struct PendingPool {
    pending_emissions: HashMap<CoinType, Hash256>,
}

impl PendingPool {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Checks admission of `tx` against both §4.4 policies: emission
    /// de-duplication (only applies when `tx.is_ska_emission()`) and
    /// coin-type consistency (applies to every other non-coinbase
    /// transaction).
    ///
    /// `chain_has_emission` reports whether the chain itself already
    /// contains a confirmed emission for `tx`'s coin type — a condition
    /// this pool cannot know on its own since it only tracks pending
    /// (unconfirmed) emissions.
    pub fn check_admission<V: UtxoView>(
        &self,
        tx: &Transaction,
        utxo_view: &V,
        chain_has_emission: impl Fn(CoinType) -> bool,
    ) -> CoreResult<()> {
        if tx.is_ska_emission() {
            let coin_type = tx.primary_coin_type();
            if chain_has_emission(coin_type) {
                return Err(CoreError::DuplicateEmission(coin_type.tag()));
            }
            if let Some(pending_hash) = self.pending_emissions.get(&coin_type) {
                let tx_hash = tx.hash()?;
                if *pending_hash != tx_hash {
                    return Err(CoreError::DuplicateEmission(coin_type.tag()));
                }
            }
            return Ok(());
        }

        tx.check_coin_type_consistency(utxo_view)
    }

    /// Admits `tx` into the pending set, recording its emission hash if
    /// it is one (spec.md §4.4).
    pub fn admit(&mut self, tx: &Transaction) -> CoreResult<()> {
        if tx.is_ska_emission() {
            let coin_type = tx.primary_coin_type();
            let tx_hash = tx.hash()?;
            self.pending_emissions.insert(coin_type, tx_hash);
        }
        Ok(())
    }

    /// Evicts `tx` from the pending set. Per spec.md §4.4, eviction must
    /// clean the pending-emission mapping by matching the *stored
    /// hash*, never blindly keyed by coin type — a second, still-pending
    /// emission for the same coin type must survive the eviction of an
    /// unrelated transaction that happens to share its coin type.
    pub fn evict(&mut self, tx: &Transaction) {
        if !tx.is_ska_emission() {
            return;
        }
        let coin_type = tx.primary_coin_type();
        let Ok(tx_hash) = tx.hash() else {
            warn!(%coin_type, "failed to hash transaction on eviction");
            return;
        };
        if self.pending_emissions.get(&coin_type) == Some(&tx_hash) {
            self.pending_emissions.remove(&coin_type);
        }
    }

    #[must_use]
    pub fn has_pending_emission(&self, coin_type: CoinType) -> bool {
        self.pending_emissions.contains_key(&coin_type)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain_params::testing::MapUtxoView;
    use crate::transaction::{TxInput, TxOutput, SKA_EMISSION_MARKER};

    fn emission_tx(coin_type: CoinType, salt: u8) -> Transaction {
        let mut marker = SKA_EMISSION_MARKER.to_vec();
        marker.push(coin_type.tag());
        marker.push(salt);
        Transaction::new(
            1,
            vec![TxInput::null(marker)],
            vec![TxOutput::new(1_000, coin_type, vec![])],
            0,
        )
    }

    #[test]
    fn second_pending_emission_for_same_coin_type_is_rejected() {
        let mut pool = PendingPool::new();
        let utxo_view = MapUtxoView::default();
        let first = emission_tx(CoinType::ska(1), 0);
        let second = emission_tx(CoinType::ska(1), 1);

        pool.check_admission(&first, &utxo_view, |_| false).unwrap();
        pool.admit(&first).unwrap();

        let err = pool
            .check_admission(&second, &utxo_view, |_| false)
            .unwrap_err();
        assert_eq!(err, CoreError::DuplicateEmission(1));
    }

    #[test]
    fn resubmitting_the_same_pending_emission_is_allowed() {
        let mut pool = PendingPool::new();
        let utxo_view = MapUtxoView::default();
        let tx = emission_tx(CoinType::ska(1), 0);

        pool.admit(&tx).unwrap();
        assert!(pool.check_admission(&tx, &utxo_view, |_| false).is_ok());
    }

    #[test]
    fn chain_already_having_an_emission_is_rejected() {
        let pool = PendingPool::new();
        let utxo_view = MapUtxoView::default();
        let tx = emission_tx(CoinType::ska(1), 0);

        let err = pool
            .check_admission(&tx, &utxo_view, |_| true)
            .unwrap_err();
        assert_eq!(err, CoreError::DuplicateEmission(1));
    }

    #[test]
    fn eviction_matches_by_stored_hash_not_coin_type() {
        let mut pool = PendingPool::new();
        let first = emission_tx(CoinType::ska(1), 0);
        let second = emission_tx(CoinType::ska(1), 1);

        pool.admit(&first).unwrap();
        // second is a different transaction for the same coin type;
        // evicting it must not remove first's pending record.
        pool.evict(&second);
        assert!(pool.has_pending_emission(CoinType::ska(1)));

        pool.evict(&first);
        assert!(!pool.has_pending_emission(CoinType::ska(1)));
    }
}
