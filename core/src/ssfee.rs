//! C3 — the stake-fee (SSFee) consolidation builder (spec.md §4.3).
//!
//! A pure function of its inputs: no internal locks, no retained state
//! between calls. The template builder is responsible for linearizing a
//! single block's worth of calls so index lookups and the augment/mint
//! decision happen atomically from its point of view (spec.md §5).

use crate::chain_params::{OutPoint, SSFeeIndex, SpendingView};
use crate::coin::{Amount, CoinType};
use crate::error::{CoreError, CoreResult};
use varska_shared::types::BlockHeight;

/// A 20-byte address hash, as carried in consolidation and payout scripts.
pub type AddrHash = [u8; 20];

/// The `OP_RETURN` marker tag distinguishing a staker payout from a
/// miner payout (spec.md §6 "SSFee marker script").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarkerKind {
    Staker,
    Miner,
}

impl MarkerKind {
    const fn tag(self) -> [u8; 2] {
        match self {
            MarkerKind::Staker => [b'S', b'F'],
            MarkerKind::Miner => [b'M', b'F'],
        }
    }
}

/// Builds the bit-exact `OP_RETURN OP_DATA_6 'S'/'M' 'F' h0..h3` marker
/// script (spec.md §6), height little-endian.
#[must_use]
pub fn marker_script(kind: MarkerKind, height: BlockHeight) -> Vec<u8> {
    let mut script = vec![0x6a, 0x06]; // OP_RETURN, OP_DATA_6
    script.extend_from_slice(&kind.tag());
    script.extend_from_slice(&(height as u32).to_le_bytes());
    script
}

/// Builds the bit-exact `OP_RETURN OP_DATA_22 'S' 'C' addrHash` vote
/// consolidation-address declaration (spec.md §6).
#[must_use]
pub fn consolidation_script(addr_hash: AddrHash) -> Vec<u8> {
    let mut script = vec![0x6a, 0x16]; // OP_RETURN, OP_DATA_22
    script.push(b'S');
    script.push(b'C');
    script.extend_from_slice(&addr_hash);
    script
}

/// `OP_SSGEN || OP_DUP OP_HASH160 OP_DATA_20 addr OP_EQUALVERIFY OP_CHECKSIG`.
#[must_use]
pub fn pay_script(addr_hash: AddrHash) -> Vec<u8> {
    let mut script = vec![0xbb, 0x76, 0xa9, 0x14]; // OP_SSGEN, OP_DUP, OP_HASH160, OP_DATA_20
    script.extend_from_slice(&addr_hash);
    script.push(0x88); // OP_EQUALVERIFY
    script.push(0xac); // OP_CHECKSIG
    script
}

/// The inverse of [`pay_script`]: pulls the address hash back out of an
/// SSFee payment output's script, so a block applier can re-populate an
/// `SSFeeIndex` from the outputs alone. Returns `None` for anything that
/// isn't a pay script (e.g. the marker output sitting right next to it).
#[must_use]
pub fn parse_pay_script_addr_hash(script: &[u8]) -> Option<AddrHash> {
    if script.len() != 26 || script[0..4] != [0xbb, 0x76, 0xa9, 0x14] || script[24..26] != [0x88, 0xac] {
        return None;
    }
    let mut addr_hash = [0u8; 20];
    addr_hash.copy_from_slice(&script[4..24]);
    Some(addr_hash)
}

/// The canonical null input for the mint path (spec.md §6).
pub const NULL_PREV_OUT_INDEX: u32 = 0xFFFF_FFFF;
pub const NULL_BLOCK_HEIGHT: BlockHeight = 0xFFFF_FFFF;

/// One of the two outputs every SSFee transaction carries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SSFeeOutput {
    pub value: Amount,
    pub coin_type: CoinType,
    pub script: Vec<u8>,
}

/// A single SSFee input: either augmenting a live UTXO, or the canonical
/// null input for a mint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SSFeeInput {
    Augment {
        outpoint: OutPoint,
        fraud_block_height: BlockHeight,
        fraud_block_index: u32,
        value_in: Amount,
    },
    Mint,
}

/// One stake-tree transaction produced by the builder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SSFeeTransaction {
    pub version: u32,
    pub coin_type: CoinType,
    pub input: SSFeeInput,
    pub marker: SSFeeOutput,
    pub payment: SSFeeOutput,
}

/// A voter's declared consolidation address for the coin type currently
/// being paid out (spec.md §4.3 "Batching").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Voter {
    pub addr_hash: AddrHash,
}

const SSFEE_TX_VERSION: u32 = 3;

/// Distributes `staker_share` fairly across `voters`' consolidation
/// addresses for coin type `coin_type`, at height `h` (spec.md §4.3).
///
/// `coin_type` must not be VAR — SSFee is SKA-only; callers that reach
/// this with VAR get `InvalidCoinType` rather than a silently-empty
/// result.
pub fn build_staker_ssfee<I: SSFeeIndex, S: SpendingView>(
    coin_type: CoinType,
    staker_share: Amount,
    voters: &[Voter],
    h: BlockHeight,
    index: &I,
    spending: &S,
) -> CoreResult<Vec<SSFeeTransaction>> {
    build_ssfee(
        MarkerKind::Staker,
        coin_type,
        staker_share,
        voters,
        h,
        index,
        spending,
    )
}

/// Symmetric to [`build_staker_ssfee`], indexed by `(coinType,
/// minerAddressHash)` and tagged "MF" (spec.md §4.3 "Miner-SSFee").
pub fn build_miner_ssfee<I: SSFeeIndex, S: SpendingView>(
    coin_type: CoinType,
    miner_share: Amount,
    miner_addr_hash: AddrHash,
    h: BlockHeight,
    index: &I,
    spending: &S,
) -> CoreResult<Vec<SSFeeTransaction>> {
    build_ssfee(
        MarkerKind::Miner,
        coin_type,
        miner_share,
        &[Voter {
            addr_hash: miner_addr_hash,
        }],
        h,
        index,
        spending,
    )
}

/// Splits total per-block SKA fees for `coin_type` 50/50 between staker
/// and miner shares; an odd remainder accrues to the miner half
/// (spec.md §4.3 "Security invariants").
#[must_use]
pub fn split_staker_miner(total_fees: Amount) -> (Amount, Amount) {
    let staker = total_fees / 2;
    let miner = total_fees - staker;
    (staker, miner)
}

fn build_ssfee<I: SSFeeIndex, S: SpendingView>(
    kind: MarkerKind,
    coin_type: CoinType,
    share: Amount,
    voters: &[Voter],
    h: BlockHeight,
    index: &I,
    spending: &S,
) -> CoreResult<Vec<SSFeeTransaction>> {
    if coin_type.is_var() {
        return Err(CoreError::InvalidCoinType(u32::from(coin_type.tag())));
    }
    if share < 0 {
        return Err(CoreError::SSFeeNegativeShare(share));
    }
    if voters.is_empty() {
        return Ok(Vec::new());
    }

    // Fair distribution (spec.md §4.3 "Fair distribution").
    let count = voters.len() as Amount;
    let base_share = share / count;
    let remainder = share - count * base_share;

    let smallest_addr = voters
        .iter()
        .map(|v| v.addr_hash)
        .min()
        .expect("voters is non-empty");

    // Batching: coalesce voters sharing a consolidation address, keyed
    // by address, ascending so output order is deterministic.
    let mut payouts: std::collections::BTreeMap<AddrHash, Amount> = std::collections::BTreeMap::new();
    for voter in voters {
        let mut voter_payout = base_share;
        if voter.addr_hash == smallest_addr {
            voter_payout += remainder;
        }
        *payouts.entry(voter.addr_hash).or_insert(0) += voter_payout;
    }

    let mut txs = Vec::with_capacity(payouts.len());
    for (addr_hash, payout) in payouts {
        txs.push(build_one(kind, coin_type, addr_hash, payout, h, index, spending));
    }
    Ok(txs)
}

fn build_one<I: SSFeeIndex, S: SpendingView>(
    kind: MarkerKind,
    coin_type: CoinType,
    addr_hash: AddrHash,
    payout: Amount,
    h: BlockHeight,
    index: &I,
    spending: &S,
) -> SSFeeTransaction {
    let marker = SSFeeOutput {
        value: 0,
        coin_type,
        script: marker_script(kind, h),
    };

    // Per-address decision: augment vs. mint (spec.md §4.3 step 1/2).
    if let Some(entry) = index.lookup(coin_type, addr_hash) {
        if !spending.is_spent_in_current_round(entry.outpoint) {
            let payment = SSFeeOutput {
                value: entry.value + payout,
                coin_type,
                script: pay_script(addr_hash),
            };
            return SSFeeTransaction {
                version: SSFEE_TX_VERSION,
                coin_type,
                input: SSFeeInput::Augment {
                    outpoint: entry.outpoint,
                    fraud_block_height: entry.block_height,
                    fraud_block_index: entry.block_index,
                    value_in: entry.value,
                },
                marker,
                payment,
            };
        }
    }

    let payment = SSFeeOutput {
        value: payout,
        coin_type,
        script: pay_script(addr_hash),
    };
    SSFeeTransaction {
        version: SSFEE_TX_VERSION,
        coin_type,
        input: SSFeeInput::Mint,
        marker,
        payment,
    }
}

/// The maturity exemption: an augmenting SSFee transaction may spend an
/// immature SSFee output from its own lineage. Exposed as a free
/// function so the consensus validator and this builder agree on
/// exactly which spends it covers (spec.md §9 open question).
///
/// `spend` is the transaction attempting to consume `ssfee_outpoint`;
/// the exemption applies only when `spend` is itself an SSFee
/// transaction (version 3, stake-tree) paying the *same* `(coinType,
/// addrHash)` the spent output belongs to.
#[must_use]
pub fn is_maturity_exempt(
    spend_version: u32,
    spend_coin_type: CoinType,
    spend_addr_hash: AddrHash,
    ssfee_coin_type: CoinType,
    ssfee_addr_hash: AddrHash,
) -> bool {
    spend_version == SSFEE_TX_VERSION
        && spend_coin_type == ssfee_coin_type
        && spend_addr_hash == ssfee_addr_hash
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain_params::testing::{MapSSFeeIndex, SetSpendingView};
    use crate::chain_params::SSFeeEntry;

    fn addr(byte: u8) -> AddrHash {
        let mut a = [0u8; 20];
        a[0] = byte;
        a
    }

    #[test]
    fn pay_script_addr_hash_round_trips() {
        let a = addr(0x42);
        assert_eq!(parse_pay_script_addr_hash(&pay_script(a)), Some(a));
        assert_eq!(parse_pay_script_addr_hash(&marker_script(MarkerKind::Staker, 1)), None);
        assert_eq!(parse_pay_script_addr_hash(&consolidation_script(a)), None);
    }

    /// S5 — SSFee distribution.
    #[test]
    fn s5_fair_distribution_with_remainder_to_smallest_address() {
        let voters = vec![
            Voter { addr_hash: addr(0x01) },
            Voter { addr_hash: addr(0x02) },
            Voter { addr_hash: addr(0x03) },
        ];
        let index = MapSSFeeIndex::default();
        let spending = SetSpendingView::default();
        let txs = build_staker_ssfee(CoinType::ska(1), 10, &voters, 1, &index, &spending).unwrap();

        assert_eq!(txs.len(), 3);
        let total: Amount = txs.iter().map(|t| t.payment.value).sum();
        assert_eq!(total, 10);

        // addr(0x01) is lexicographically smallest, so it carries the +1
        // remainder: share = floor(10/3) = 3, remainder = 1.
        let values: Vec<Amount> = txs.iter().map(|t| t.payment.value).collect();
        assert!(values.contains(&4));
        assert_eq!(values.iter().filter(|&&v| v == 3).count(), 2);
    }

    /// S6 — SSFee batching.
    #[test]
    fn s6_batching_coalesces_shared_address_into_one_transaction() {
        let voters: Vec<Voter> = (0..5).map(|_| Voter { addr_hash: addr(0x09) }).collect();
        let index = MapSSFeeIndex::default();
        let spending = SetSpendingView::default();
        let txs = build_staker_ssfee(CoinType::ska(1), 5000, &voters, 1, &index, &spending).unwrap();

        assert_eq!(txs.len(), 1);
        assert_eq!(txs[0].payment.value, 5000);
    }

    /// S7 — SSFee augmentation.
    /// S7 / P8 — augmenting a live SSFee UTXO pays out exactly
    /// `value_in + payout`, never a replacement value.
    #[test]
    fn s7_augmentation_round_trip() {
        let voters = vec![Voter { addr_hash: addr(0x01) }];
        let mut index = MapSSFeeIndex::default();
        let mut spending = SetSpendingView::default();

        // Round 1: no prior UTXO, mints 1000.
        let round1 = build_staker_ssfee(CoinType::ska(1), 1000, &voters, 1, &index, &spending).unwrap();
        assert_eq!(round1.len(), 1);
        assert!(matches!(round1[0].input, SSFeeInput::Mint));
        assert_eq!(round1[0].payment.value, 1000);

        let minted_outpoint = OutPoint::new(varska_shared::Hash256::keccak256(b"round1"), 0);
        index.0.insert(
            (CoinType::ska(1), addr(0x01)),
            SSFeeEntry {
                outpoint: minted_outpoint,
                block_height: 1,
                block_index: 0,
                value: 1000,
            },
        );

        // Round 2, unspent: augments to 2000.
        let round2 = build_staker_ssfee(CoinType::ska(1), 1000, &voters, 2, &index, &spending).unwrap();
        assert_eq!(round2.len(), 1);
        match round2[0].input {
            SSFeeInput::Augment { value_in, outpoint, .. } => {
                assert_eq!(value_in, 1000);
                assert_eq!(outpoint, minted_outpoint);
            }
            SSFeeInput::Mint => panic!("expected augment"),
        }
        assert_eq!(round2[0].payment.value, 2000);

        // Round 2, but the UTXO is already spent this round: downgrades
        // to a fresh mint of just the new payout.
        spending.0.insert(minted_outpoint);
        let round2b = build_staker_ssfee(CoinType::ska(1), 1000, &voters, 2, &index, &spending).unwrap();
        assert_eq!(round2b.len(), 1);
        assert!(matches!(round2b[0].input, SSFeeInput::Mint));
        assert_eq!(round2b[0].payment.value, 1000);
    }

    /// P8 — holds under batching too: each augmented output's value is
    /// its prior UTXO value plus exactly its own share, not the other
    /// voter's.
    #[test]
    fn p8_augmentation_adds_share_not_replaces_it_under_batching() {
        let voters = vec![
            Voter { addr_hash: addr(0x01) },
            Voter { addr_hash: addr(0x02) },
        ];
        let mut index = MapSSFeeIndex::default();
        let op_a = OutPoint::new(varska_shared::Hash256::keccak256(b"addr-a"), 0);
        let op_b = OutPoint::new(varska_shared::Hash256::keccak256(b"addr-b"), 0);
        index.0.insert(
            (CoinType::ska(1), addr(0x01)),
            SSFeeEntry { outpoint: op_a, block_height: 1, block_index: 0, value: 500 },
        );
        index.0.insert(
            (CoinType::ska(1), addr(0x02)),
            SSFeeEntry { outpoint: op_b, block_height: 1, block_index: 0, value: 9_000 },
        );
        let spending = SetSpendingView::default();
        let txs = build_staker_ssfee(CoinType::ska(1), 100, &voters, 2, &index, &spending).unwrap();
        assert_eq!(txs.len(), 2);
        for tx in &txs {
            let (value_in, expected_addr) = match tx.input {
                SSFeeInput::Augment { value_in, outpoint, .. } if outpoint == op_a => (value_in, addr(0x01)),
                SSFeeInput::Augment { value_in, outpoint, .. } if outpoint == op_b => (value_in, addr(0x02)),
                _ => panic!("expected an augment of a known UTXO"),
            };
            assert_eq!(tx.payment.script, pay_script(expected_addr));
            assert_eq!(tx.payment.value, value_in + 50);
        }
    }

    /// P7 — output sum equals F_s exactly, batching preserves it.
    #[test]
    fn p7_output_sum_equals_staker_share() {
        let voters = vec![
            Voter { addr_hash: addr(0x01) },
            Voter { addr_hash: addr(0x02) },
            Voter { addr_hash: addr(0x01) },
            Voter { addr_hash: addr(0x05) },
        ];
        let index = MapSSFeeIndex::default();
        let spending = SetSpendingView::default();
        let txs = build_staker_ssfee(CoinType::ska(1), 77, &voters, 1, &index, &spending).unwrap();
        let total: Amount = txs.iter().map(|t| t.payment.value).sum();
        assert_eq!(total, 77);
    }

    /// P9 — never two transactions consuming the same live UTXO.
    #[test]
    fn p9_never_double_spends_a_live_utxo_within_one_block() {
        let voters = vec![
            Voter { addr_hash: addr(0x01) },
            Voter { addr_hash: addr(0x01) },
        ];
        let mut index = MapSSFeeIndex::default();
        let outpoint = OutPoint::new(varska_shared::Hash256::keccak256(b"shared"), 0);
        index.0.insert(
            (CoinType::ska(1), addr(0x01)),
            SSFeeEntry {
                outpoint,
                block_height: 1,
                block_index: 0,
                value: 500,
            },
        );
        let spending = SetSpendingView::default();
        let txs = build_staker_ssfee(CoinType::ska(1), 100, &voters, 1, &index, &spending).unwrap();
        // Both voters share an address -> batched into exactly one
        // transaction, so the live UTXO can only be consumed once.
        assert_eq!(txs.len(), 1);
    }

    #[test]
    fn var_is_rejected() {
        let index = MapSSFeeIndex::default();
        let spending = SetSpendingView::default();
        let err = build_staker_ssfee(CoinType::VAR, 100, &[Voter { addr_hash: addr(1) }], 1, &index, &spending)
            .unwrap_err();
        assert!(matches!(err, CoreError::InvalidCoinType(0)));
    }

    #[test]
    fn negative_share_is_rejected() {
        let index = MapSSFeeIndex::default();
        let spending = SetSpendingView::default();
        let err = build_staker_ssfee(CoinType::ska(1), -5, &[Voter { addr_hash: addr(1) }], 1, &index, &spending)
            .unwrap_err();
        assert_eq!(err, CoreError::SSFeeNegativeShare(-5));
    }

    #[test]
    fn split_rounds_odd_remainder_to_miner() {
        assert_eq!(split_staker_miner(101), (50, 51));
        assert_eq!(split_staker_miner(100), (50, 50));
    }

    #[test]
    fn maturity_exemption_only_covers_matching_ssfee_lineage() {
        let a = addr(1);
        assert!(is_maturity_exempt(3, CoinType::ska(1), a, CoinType::ska(1), a));
        assert!(!is_maturity_exempt(1, CoinType::ska(1), a, CoinType::ska(1), a));
        assert!(!is_maturity_exempt(3, CoinType::ska(2), a, CoinType::ska(1), a));
        assert!(!is_maturity_exempt(3, CoinType::ska(1), addr(2), CoinType::ska(1), a));
    }
}
