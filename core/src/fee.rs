//! C2 — the per-coin fee engine (spec.md §4.2, §5).
//!
//! State is a map keyed by coin type guarded by a single multi-reader/
//! single-writer lock: reads (`min_fee`, `estimate`, `validate`) take
//! shared access, writes (`record_fee`, `update_utilization`) take
//! exclusive access. No internal actor thread — the lock is the shared
//! resource, matching spec.md §5's "explicit shared value with interior
//! mutability behind a reader/writer lock" design note.

use crate::chain_params::{ChainParams, Clock};
use crate::coin::{Amount, CoinType, MAX_VAR_SUPPLY_ATOMS};
use crate::error::{CoreError, CoreResult};
use std::collections::{BTreeMap, VecDeque};
use std::sync::RwLock;
use tracing::debug;
use varska_shared::types::Timestamp;

const RECENT_FEES_CAPACITY: usize = 100;
const STALE_BLOCK_SECS: Timestamp = 600;

/// One coin type's fee-engine record (spec.md §3 "FeeRateRecord").
#[derive(Debug, Clone)]
struct FeeRateRecord {
    min_relay_fee: Amount,
    dynamic_multiplier: f64,
    max_rate: Amount,
    last_updated: Timestamp,
    last_included: Timestamp,
    recent_fees: VecDeque<f64>,
    pending_count: u64,
    pending_bytes: usize,
    block_space_used: f64,
}

impl FeeRateRecord {
    fn new(min_relay_fee: Amount, now: Timestamp) -> Self {
        Self {
            min_relay_fee,
            dynamic_multiplier: 1.0,
            max_rate: min_relay_fee.saturating_mul(100),
            last_updated: now,
            last_included: now,
            recent_fees: VecDeque::with_capacity(RECENT_FEES_CAPACITY),
            pending_count: 0,
            pending_bytes: 0,
            block_space_used: 0.0,
        }
    }
}

/// A percentile snapshot of recent per-KB fee rates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FeeStats {
    pub min_relay_fee: Amount,
    pub dynamic_multiplier: f64,
    pub max_rate: Amount,
    pub pending_count: u64,
    pub pending_bytes: usize,
    pub block_space_used: f64,
    pub slow: Amount,
    pub normal: Amount,
    pub fast: Amount,
    pub last_updated: Timestamp,
}

fn confirmation_multiplier(target_confirmations: u32) -> f64 {
    match target_confirmations {
        0 | 1 => 2.0,
        2..=3 => 1.5,
        4..=6 => 1.2,
        _ => 1.0,
    }
}

fn utilization_multiplier(block_space_used: f64) -> f64 {
    if block_space_used > 0.8 {
        1.5
    } else if block_space_used > 0.6 {
        1.2
    } else {
        1.0
    }
}

fn percentile(sorted: &[f64], pct: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    if sorted.len() == 1 {
        return sorted[0];
    }
    let rank = pct * (sorted.len() - 1) as f64;
    let lo = rank.floor() as usize;
    let hi = rank.ceil() as usize;
    if lo == hi {
        sorted[lo]
    } else {
        let frac = rank - lo as f64;
        sorted[lo] * (1.0 - frac) + sorted[hi] * frac
    }
}

/// The mutable engine state, one instance shared across threads behind
/// a `RwLock` by callers (see [`FeeEngine`]).
#[derive(Debug, Default)]
struct EngineState {
    records: BTreeMap<CoinType, FeeRateRecord>,
}

impl EngineState {
    fn record_for(&self, coin_type: CoinType) -> Option<&FeeRateRecord> {
        self.records
            .get(&coin_type)
            .or_else(|| self.records.get(&CoinType::VAR))
    }
}

/// The per-coin fee engine. Cheap to clone (an `Arc` internally would be
/// added by the composition root if it needs to share one instance across
/// threads); the engine itself owns the lock.
pub struct FeeEngine {
    state: RwLock<EngineState>,
}

impl std::fmt::Debug for FeeEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FeeEngine").finish_non_exhaustive()
    }
}

impl FeeEngine {
    /// Seeds a record for every coin type active at startup, per
    /// spec.md §4.2 "Initialization".
    #[must_use]
    pub fn new<C: ChainParams, CK: Clock>(
        params: &C,
        clock: &CK,
        active_ska: &[CoinType],
    ) -> Self {
        let now = clock.now();
        let mut records = BTreeMap::new();
        records.insert(
            CoinType::VAR,
            FeeRateRecord::new(params.default_min_relay_fee(), now),
        );
        for &k in active_ska {
            records.insert(k, FeeRateRecord::new(params.ska_min_relay_tx_fee(), now));
        }
        Self {
            state: RwLock::new(EngineState { records }),
        }
    }

    /// spec.md §4.2 "minFee".
    #[must_use]
    pub fn min_fee(&self, size: usize, coin_type: CoinType) -> Amount {
        let state = self.state.read().expect("fee engine lock poisoned");
        let Some(record) = state.record_for(coin_type) else {
            return 0;
        };
        min_fee_for(record, size)
    }

    /// spec.md §4.2 "estimate".
    #[must_use]
    pub fn estimate(&self, coin_type: CoinType, target_confirmations: u32) -> Amount {
        let state = self.state.read().expect("fee engine lock poisoned");
        let Some(record) = state.record_for(coin_type) else {
            return 0;
        };
        let base = record.min_relay_fee as f64 * record.dynamic_multiplier;
        let estimate = base
            * confirmation_multiplier(target_confirmations)
            * utilization_multiplier(record.block_space_used);
        (estimate.floor() as Amount).clamp(record.min_relay_fee, record.max_rate)
    }

    /// spec.md §4.2 "validate".
    pub fn validate(
        &self,
        fee: Amount,
        size: usize,
        coin_type: CoinType,
        allow_high_fees: bool,
    ) -> CoreResult<()> {
        let state = self.state.read().expect("fee engine lock poisoned");
        let Some(record) = state.record_for(coin_type) else {
            return Ok(());
        };
        let floor = min_fee_for(record, size);
        if fee < floor {
            return Err(CoreError::InsufficientFee {
                fee,
                floor,
                size,
            });
        }
        if !allow_high_fees {
            let max = (size as i64 * record.max_rate) / 1000;
            if fee > max {
                return Err(CoreError::FeeTooHigh { fee, max });
            }
        }
        Ok(())
    }

    /// spec.md §4.2 "Percentile snapshot" plus the rest of `FeeStats`.
    #[must_use]
    pub fn stats(&self, coin_type: CoinType) -> FeeStats {
        let state = self.state.read().expect("fee engine lock poisoned");
        let Some(record) = state.record_for(coin_type) else {
            return FeeStats {
                min_relay_fee: 0,
                dynamic_multiplier: 1.0,
                max_rate: 0,
                pending_count: 0,
                pending_bytes: 0,
                block_space_used: 0.0,
                slow: 0,
                normal: 0,
                fast: 0,
                last_updated: 0,
            };
        };
        let (slow, normal, fast) = if record.recent_fees.is_empty() {
            let default = record.min_relay_fee;
            (default / 2, default, default * 2)
        } else {
            let mut sorted: Vec<f64> = record.recent_fees.iter().copied().collect();
            sorted.sort_by(|a, b| a.partial_cmp(b).unwrap());
            (
                percentile(&sorted, 0.10) as Amount,
                percentile(&sorted, 0.50) as Amount,
                percentile(&sorted, 0.90) as Amount,
            )
        };
        FeeStats {
            min_relay_fee: record.min_relay_fee,
            dynamic_multiplier: record.dynamic_multiplier,
            max_rate: record.max_rate,
            pending_count: record.pending_count,
            pending_bytes: record.pending_bytes,
            block_space_used: record.block_space_used,
            slow,
            normal,
            fast,
            last_updated: record.last_updated,
        }
    }

    /// spec.md §4.2 "recordFee".
    pub fn record_fee(&self, coin_type: CoinType, fee: Amount, size: usize, confirmed: bool, now: Timestamp) {
        let mut state = self.state.write().expect("fee engine lock poisoned");
        let Some(record) = state.records.get_mut(&coin_type) else {
            return;
        };
        if size > 0 {
            let rate = (fee as f64 * 1000.0) / size as f64;
            if record.recent_fees.len() == RECENT_FEES_CAPACITY {
                record.recent_fees.pop_front();
            }
            record.recent_fees.push_back(rate);
        }
        if confirmed {
            record.last_included = now;
        }
        debug!(%coin_type, fee, size, confirmed, "fee recorded");
    }

    /// spec.md §4.2 "updateUtilization", which folds in
    /// `updateDynamicMultiplier`.
    pub fn update_utilization(
        &self,
        coin_type: CoinType,
        pending_count: u64,
        pending_bytes: usize,
        block_space_used: f64,
        now: Timestamp,
    ) {
        let mut state = self.state.write().expect("fee engine lock poisoned");
        let Some(record) = state.records.get_mut(&coin_type) else {
            return;
        };
        record.pending_count = pending_count;
        record.pending_bytes = pending_bytes;
        record.block_space_used = block_space_used;

        let mut target = 1.0_f64;
        if block_space_used > 0.9 {
            target *= 2.0;
        } else if block_space_used > 0.7 {
            target *= 1.5;
        } else if block_space_used > 0.5 {
            target *= 1.2;
        }
        if pending_count > 100 {
            target *= 1.5;
        } else if pending_count > 50 {
            target *= 1.2;
        }
        if now - record.last_included > STALE_BLOCK_SECS {
            target *= 1.3;
        }

        record.dynamic_multiplier = (0.7 * record.dynamic_multiplier + 0.3 * target).clamp(0.5, 10.0);
        record.last_updated = now;
    }
}

fn min_fee_for(record: &FeeRateRecord, size: usize) -> Amount {
    let base = (size as i64 * record.min_relay_fee) / 1000;
    let mut effective = (base as f64 * record.dynamic_multiplier).floor() as Amount;
    if effective == 0 && record.min_relay_fee > 0 {
        effective = record.min_relay_fee;
    }
    let cap = (size as i64 * record.max_rate) / 1000;
    effective.min(cap).clamp(0, MAX_VAR_SUPPLY_ATOMS)
}
