//! C1 — the block-space allocator (spec.md §4.1).
//!
//! `allocate` is a pure function: same inputs, same `AllocationResult`,
//! on every node. It owns no state; `SizeTracker` is the thin mutable
//! wrapper a block-template builder uses to call it incrementally while
//! selecting transactions.

use crate::coin::CoinType;
use crate::error::{CoreError, CoreResult};
use std::collections::BTreeMap;
use tracing::warn;

/// One coin type's slice of a block, per spec.md §3 "Allocation".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Allocation {
    pub base: usize,
    pub final_size: usize,
    pub used: usize,
    pub pending: usize,
}

/// The allocator's output for a whole block (spec.md §6 `AllocationResult`).
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct AllocationResult {
    pub per_coin: BTreeMap<CoinType, Allocation>,
    pub total_allocated: usize,
    pub total_used: usize,
}

impl AllocationResult {
    fn recompute_totals(&mut self) {
        self.total_allocated = self.per_coin.values().map(|a| a.final_size).sum();
        self.total_used = self.per_coin.values().map(|a| a.used).sum();
    }
}

/// Runs the spec.md §4.1 algorithm. `active_ska` need not be sorted —
/// this function sorts it by ascending numeric tag itself, since
/// determinism requires iterating the active set that way regardless of
/// how the caller obtained it (spec.md "Determinism").
#[must_use]
pub fn allocate(
    max_block_size: usize,
    active_ska: &[CoinType],
    pending: &BTreeMap<CoinType, usize>,
) -> AllocationResult {
    let m = max_block_size;
    let mut ska: Vec<CoinType> = active_ska.to_vec();
    ska.sort_unstable();
    ska.dedup();
    let n = ska.len();

    let pending_of = |c: CoinType| pending.get(&c).copied().unwrap_or(0);

    // Step 1: initialize.
    let mut per_coin: BTreeMap<CoinType, Allocation> = BTreeMap::new();
    per_coin.insert(
        CoinType::VAR,
        Allocation {
            pending: pending_of(CoinType::VAR),
            ..Allocation::default()
        },
    );
    for &k in &ska {
        per_coin.insert(
            k,
            Allocation {
                pending: pending_of(k),
                ..Allocation::default()
            },
        );
    }

    // Step 2: SKA-demand probe — the "SKA idle" fast path.
    let total_ska_pending: usize = ska.iter().map(|&k| pending_of(k)).sum();
    if total_ska_pending == 0 {
        let var = per_coin.get_mut(&CoinType::VAR).unwrap();
        var.base = m;
        var.final_size = m;
        var.used = var.pending.min(m);
        let mut result = AllocationResult {
            per_coin,
            total_allocated: 0,
            total_used: 0,
        };
        result.recompute_totals();
        return result;
    }

    // Step 3: base split.
    let var_base = m / 10;
    let ska_base = if n > 0 { (m - var_base) / n } else { 0 };
    let residue = if n > 0 {
        m - var_base - n * ska_base
    } else {
        m - var_base
    };
    {
        let var = per_coin.get_mut(&CoinType::VAR).unwrap();
        var.base = var_base + residue;
        var.final_size = var.base;
    }
    for &k in &ska {
        let entry = per_coin.get_mut(&k).unwrap();
        entry.base = ska_base;
        entry.final_size = ska_base;
    }

    // Step 4: first pass.
    for alloc in per_coin.values_mut() {
        alloc.used = alloc.pending.min(alloc.base);
    }
    let unused: usize = per_coin.values().map(|a| a.base - a.used).sum();
    let need_var = {
        let var = &per_coin[&CoinType::VAR];
        var.pending.saturating_sub(var.used)
    };
    let needs: BTreeMap<CoinType, usize> = ska
        .iter()
        .map(|&k| {
            let a = &per_coin[&k];
            (k, a.pending.saturating_sub(a.used))
        })
        .collect();
    let total_ska_need: usize = needs.values().sum();

    // Step 5: redistribute.
    let (var_share, mut ska_share) = if need_var == 0 && total_ska_need > 0 {
        (0, unused)
    } else if total_ska_need == 0 && need_var > 0 {
        (unused, 0)
    } else {
        let var_share = unused / 10;
        (var_share, unused - var_share)
    };

    let var_grant = need_var.min(var_share);
    let var_leftover = var_share - var_grant;
    if total_ska_need > 0 {
        ska_share += var_leftover;
    }

    if total_ska_need > 0 {
        for &k in &ska {
            let need_k = needs[&k];
            if need_k == 0 {
                continue;
            }
            let grant = ((need_k as u128 * ska_share as u128) / total_ska_need as u128) as usize;
            let grant = grant.min(need_k);
            let entry = per_coin.get_mut(&k).unwrap();
            entry.final_size += grant;
            entry.used += grant;
        }
    }

    // Step 6: shrink idle SKA.
    for &k in &ska {
        let entry = per_coin.get_mut(&k).unwrap();
        if entry.final_size == entry.base && entry.used < entry.base {
            entry.final_size = entry.used;
        }
    }

    // Step 7: sweep to VAR. VAR's final is always the complement of what
    // SKA ended up with, never an additive top-up on its own base — the
    // base split only ever decided the *first pass*, not the outcome.
    let ska_final_sum: usize = ska.iter().map(|k| per_coin[k].final_size).sum();
    {
        let var = per_coin.get_mut(&CoinType::VAR).unwrap();
        var.final_size = m.saturating_sub(ska_final_sum);
        var.used = var.pending.min(var.final_size);
    }

    let mut result = AllocationResult {
        per_coin,
        total_allocated: 0,
        total_used: 0,
    };
    result.recompute_totals();

    // Step 8: invariant check.
    if result.total_allocated > m {
        warn!(
            total = result.total_allocated,
            max = m,
            "allocator invariant violated: capping VAR final size"
        );
        debug_assert!(
            false,
            "allocation overflow: total {} > max {}",
            result.total_allocated, m
        );
        let overflow = result.total_allocated - m;
        let var = result.per_coin.get_mut(&CoinType::VAR).unwrap();
        var.final_size = var.final_size.saturating_sub(overflow);
        var.used = var.used.min(var.final_size);
        result.recompute_totals();
    }

    result
}

/// Same as [`allocate`] but returns `Err(AllocationOverflow)` instead of
/// capping, for callers that want the invariant to be a hard failure
/// (e.g. debug tooling, fuzz harnesses) rather than a capped-with-warning
/// recovery.
pub fn allocate_checked(
    max_block_size: usize,
    active_ska: &[CoinType],
    pending: &BTreeMap<CoinType, usize>,
) -> CoreResult<AllocationResult> {
    let result = allocate(max_block_size, active_ska, pending);
    if result.total_allocated > max_block_size {
        return Err(CoreError::AllocationOverflow {
            total: result.total_allocated,
            max: max_block_size,
        });
    }
    Ok(result)
}

/// A transaction the allocator's `SizeTracker` can weigh: its serialized
/// size and its value-weighted primary coin type (spec.md §3, §4.1
/// "Size tracker").
pub trait WeightedTx {
    fn size_bytes(&self) -> usize;
    fn primary_coin_type(&self) -> CoinType;
}

/// Tracks bytes already committed to a block-in-progress per coin type,
/// and answers "would this transaction still fit?" by re-running the
/// allocator over the bytes already committed plus the candidate.
#[derive(Debug, Clone)]
pub struct SizeTracker {
    max_block_size: usize,
    sizes_by_coin_type: BTreeMap<CoinType, usize>,
}

impl SizeTracker {
    #[must_use]
    pub fn new(max_block_size: usize) -> Self {
        Self {
            max_block_size,
            sizes_by_coin_type: BTreeMap::new(),
        }
    }

    /// Records `tx` as committed to the block.
    pub fn add<T: WeightedTx>(&mut self, tx: &T) {
        *self
            .sizes_by_coin_type
            .entry(tx.primary_coin_type())
            .or_insert(0) += tx.size_bytes();
    }

    /// Whether `tx` could be added without the allocator's run on the
    /// resulting demand granting its coin type less space than it would
    /// then be using.
    #[must_use]
    pub fn can_add<T: WeightedTx>(&self, tx: &T, active_ska: &[CoinType]) -> bool {
        let coin_type = tx.primary_coin_type();
        let mut provisional = self.sizes_by_coin_type.clone();
        *provisional.entry(coin_type).or_insert(0) += tx.size_bytes();

        let result = allocate(self.max_block_size, active_ska, &provisional);
        let Some(alloc) = result.per_coin.get(&coin_type) else {
            return false;
        };
        let would_use = self.sizes_by_coin_type.get(&coin_type).copied().unwrap_or(0) + tx.size_bytes();
        alloc.final_size >= would_use
    }

    pub fn reset(&mut self) {
        self.sizes_by_coin_type.clear();
    }

    #[must_use]
    pub fn sizes(&self) -> &BTreeMap<CoinType, usize> {
        &self.sizes_by_coin_type
    }
}

/// Unions VAR with the active SKA set at height `h`, ascending by tag —
/// the iteration order every part of the core must use (spec.md
/// "Determinism of map iteration").
#[must_use]
pub fn active_coin_types(active_ska: &[CoinType]) -> Vec<CoinType> {
    let mut all = vec![CoinType::VAR];
    all.extend_from_slice(active_ska);
    all.sort_unstable();
    all.dedup();
    all
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pending(pairs: &[(CoinType, usize)]) -> BTreeMap<CoinType, usize> {
        pairs.iter().copied().collect()
    }

    /// S1 — allocator "high demand".
    #[test]
    fn s1_high_demand() {
        let active = vec![CoinType::ska(1), CoinType::ska(2)];
        let p = pending(&[
            (CoinType::VAR, 800_000),
            (CoinType::ska(1), 1_000_000),
            (CoinType::ska(2), 100_000),
        ]);
        let result = allocate(1_000_000, &active, &p);

        assert_eq!(result.per_coin[&CoinType::VAR].used, 135_000);
        assert_eq!(result.per_coin[&CoinType::ska(1)].used, 765_000);
        assert_eq!(result.per_coin[&CoinType::ska(2)].used, 100_000);
        assert_eq!(result.total_used, 1_000_000);
    }

    /// S2 — allocator "VAR idle reclaim".
    #[test]
    fn s2_var_idle_reclaim() {
        let active = vec![CoinType::ska(1)];
        let p = pending(&[(CoinType::VAR, 4_000), (CoinType::ska(1), 0)]);
        let result = allocate(375_000, &active, &p);

        assert!(result.per_coin[&CoinType::VAR].final_size >= 367_500);
        assert_eq!(result.per_coin[&CoinType::ska(1)].final_size, 0);
    }

    /// S3 — allocator "bug-fix tiny demands".
    #[test]
    fn s3_tiny_demands_never_overflow() {
        let active = vec![CoinType::ska(1)];
        let p = pending(&[(CoinType::VAR, 1_738), (CoinType::ska(1), 254)]);
        let result = allocate(375_000, &active, &p);

        assert!(result.total_allocated <= 375_000);
        for alloc in result.per_coin.values() {
            assert!(alloc.final_size <= 375_000);
            assert!(alloc.used <= alloc.final_size);
        }
    }

    /// P1/P2 over a spread of inputs.
    #[test]
    fn invariants_hold_over_several_shapes() {
        let shapes: &[(usize, &[CoinType], &[(CoinType, usize)])] = &[
            (1_000_000, &[], &[(CoinType::VAR, 500_000)]),
            (
                500_000,
                &[CoinType::ska(1), CoinType::ska(3)],
                &[
                    (CoinType::VAR, 0),
                    (CoinType::ska(1), 0),
                    (CoinType::ska(3), 0),
                ],
            ),
            (
                200_000,
                &[CoinType::ska(5)],
                &[(CoinType::VAR, 1), (CoinType::ska(5), 1)],
            ),
        ];
        for (m, active, p) in shapes {
            let pending_map: BTreeMap<CoinType, usize> = p.iter().copied().collect();
            let result = allocate(*m, active, &pending_map);
            assert!(result.total_allocated <= *m);
            for alloc in result.per_coin.values() {
                assert!(alloc.used <= alloc.final_size);
                assert!(alloc.final_size <= *m);
            }
        }
    }

    /// P3 — sole demand absorbs the whole block, once that demand is
    /// large enough to actually claim every byte redistribution offers
    /// it (a SKA type with trivial demand only claims what it needs —
    /// the rest still sweeps to VAR, which is what step 7 is for).
    #[test]
    fn p3_sole_demand_gets_everything() {
        let active = vec![CoinType::ska(1)];

        // SKA is the sole demander, and wants more than the whole block.
        let p = pending(&[(CoinType::VAR, 0), (CoinType::ska(1), 1_000_000)]);
        let result = allocate(100_000, &active, &p);
        assert_eq!(result.per_coin[&CoinType::ska(1)].final_size, 100_000);

        // VAR is the sole demander; the SKA-idle fast path hands it the
        // whole block regardless of how small its own demand is.
        let p2 = pending(&[(CoinType::VAR, 10), (CoinType::ska(1), 0)]);
        let result2 = allocate(100_000, &active, &p2);
        assert_eq!(result2.per_coin[&CoinType::VAR].final_size, 100_000);
    }

    /// A SKA type whose demand fits comfortably inside its own base
    /// claims no more than it needs; the remainder sweeps to VAR rather
    /// than sitting idle on the SKA side.
    #[test]
    fn idle_ska_headroom_sweeps_to_var_not_left_stranded() {
        let active = vec![CoinType::ska(1)];
        let p = pending(&[(CoinType::VAR, 0), (CoinType::ska(1), 10)]);
        let result = allocate(100_000, &active, &p);
        assert_eq!(result.per_coin[&CoinType::ska(1)].final_size, 10);
        assert_eq!(result.per_coin[&CoinType::VAR].final_size, 99_990);
        assert_eq!(
            result.total_allocated, 100_000,
            "every byte of the block is accounted for"
        );
    }

    /// P4 — demand fully satisfied by base allocations means no waste.
    #[test]
    fn p4_demand_within_base_sums_exactly() {
        let active = vec![CoinType::ska(1)];
        // base VAR = 100_000/10 = 10_000; base SKA-1 = 90_000.
        let p = pending(&[(CoinType::VAR, 5_000), (CoinType::ska(1), 40_000)]);
        let result = allocate(100_000, &active, &p);
        let total_pending: usize = p.values().sum();
        assert_eq!(result.total_used, total_pending);
    }

    #[test]
    fn ska_idle_fast_path_absorbs_everything_into_var() {
        let active = vec![CoinType::ska(1), CoinType::ska(2)];
        let p = pending(&[(CoinType::VAR, 50_000)]);
        let result = allocate(1_000_000, &active, &p);
        assert_eq!(result.per_coin[&CoinType::VAR].final_size, 1_000_000);
        assert_eq!(result.per_coin[&CoinType::VAR].used, 50_000);
        assert_eq!(result.per_coin[&CoinType::ska(1)].final_size, 0);
        assert_eq!(result.per_coin[&CoinType::ska(2)].final_size, 0);
    }

    #[test]
    fn unconfigured_coin_types_receive_no_allocation() {
        let active = vec![CoinType::ska(1)];
        let p = pending(&[(CoinType::VAR, 10), (CoinType::ska(99), 10_000)]);
        let result = allocate(100_000, &active, &p);
        assert!(!result.per_coin.contains_key(&CoinType::ska(99)));
    }

    #[test]
    fn size_tracker_rejects_once_coin_type_cap_is_reached() {
        let active = vec![CoinType::ska(1)];
        let mut tracker = SizeTracker::new(1_000);

        struct Tx(usize, CoinType);
        impl WeightedTx for Tx {
            fn size_bytes(&self) -> usize {
                self.0
            }
            fn primary_coin_type(&self) -> CoinType {
                self.1
            }
        }

        let first = Tx(50, CoinType::VAR);
        assert!(tracker.can_add(&first, &active));
        tracker.add(&first);

        let huge = Tx(100_000, CoinType::VAR);
        assert!(!tracker.can_add(&huge, &active));
    }

    #[test]
    fn size_tracker_reset_clears_state() {
        let mut tracker = SizeTracker::new(1_000);
        struct Tx;
        impl WeightedTx for Tx {
            fn size_bytes(&self) -> usize {
                10
            }
            fn primary_coin_type(&self) -> CoinType {
                CoinType::VAR
            }
        }
        tracker.add(&Tx);
        assert_eq!(tracker.sizes()[&CoinType::VAR], 10);
        tracker.reset();
        assert!(tracker.sizes().is_empty());
    }

    #[test]
    fn active_coin_types_is_sorted_and_includes_var() {
        let active = vec![CoinType::ska(5), CoinType::ska(2)];
        let all = active_coin_types(&active);
        assert_eq!(
            all,
            vec![CoinType::VAR, CoinType::ska(2), CoinType::ska(5)]
        );
    }
}
