//! The dual-asset coin-type tag and amount arithmetic (spec.md §3).

use crate::error::{CoreError, CoreResult};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Atoms per whole coin, for both VAR and every SKA-k.
pub const ATOMS_PER_COIN: i64 = 100_000_000;

/// Maximum VAR supply, in atoms (21,000,000 VAR).
pub const MAX_VAR_SUPPLY_ATOMS: i64 = 21_000_000 * ATOMS_PER_COIN;

/// Maximum supply of any single SKA-k type, in atoms (10,000,000 coins).
pub const MAX_SKA_SUPPLY_ATOMS: i64 = 10_000_000 * ATOMS_PER_COIN;

/// An 8-bit coin-type tag. `0` is VAR, the mined share coin; `1..=255`
/// name SKA-1 through SKA-255, the asset-backed variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct CoinType(u8);

impl CoinType {
    pub const VAR: CoinType = CoinType(0);

    #[must_use]
    pub const fn new(tag: u8) -> Self {
        Self(tag)
    }

    #[must_use]
    pub const fn ska(k: u8) -> Self {
        Self(k)
    }

    #[must_use]
    pub const fn tag(self) -> u8 {
        self.0
    }

    #[must_use]
    pub const fn is_var(self) -> bool {
        self.0 == 0
    }

    #[must_use]
    pub const fn is_ska(self) -> bool {
        self.0 != 0
    }

    /// Maximum supply for this coin type, in atoms.
    #[must_use]
    pub const fn max_supply_atoms(self) -> i64 {
        if self.is_var() {
            MAX_VAR_SUPPLY_ATOMS
        } else {
            MAX_SKA_SUPPLY_ATOMS
        }
    }
}

impl fmt::Display for CoinType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            0 => write!(f, "VAR"),
            1 => write!(f, "SKA"),
            k => write!(f, "SKA-{k}"),
        }
    }
}

/// A signed amount of atoms. Negative values only ever appear as
/// intermediate fee/share computations that are rejected before they
/// reach a UTXO (e.g. `SSFeeNegativeShare`).
pub type Amount = i64;

/// Formats an amount the way the rest of the node displays it:
/// `"<integer>.<8-digit-fractional> <SYMBOL>"`. An amount whose coin type
/// carries no known symbol formats as `"0 Unknown"`, per spec.md §6 — this
/// path is only reachable for tags that are not active/known by the
/// caller, since every `CoinType` otherwise has a `VAR`/`SKA[-k]` symbol.
#[must_use]
pub fn format_amount(amount: Amount, coin_type: CoinType) -> String {
    let whole = amount / ATOMS_PER_COIN;
    let frac = (amount % ATOMS_PER_COIN).unsigned_abs();
    format!("{whole}.{frac:08} {coin_type}")
}

/// A transaction's primary coin type is the one whose outputs sum to the
/// largest total value; ties resolve to VAR (spec.md §3).
#[must_use]
pub fn primary_coin_type<I>(outputs: I) -> CoinType
where
    I: IntoIterator<Item = (CoinType, Amount)>,
{
    let mut totals: BTreeMap<CoinType, Amount> = BTreeMap::new();
    for (coin_type, value) in outputs {
        *totals.entry(coin_type).or_insert(0) += value;
    }

    let var_total = totals.get(&CoinType::VAR).copied().unwrap_or(0);
    let mut best = (CoinType::VAR, var_total);
    for (coin_type, total) in totals {
        if total > best.1 {
            best = (coin_type, total);
        }
    }
    best.0
}

/// Narrows a wider integer (as it might arrive from chain-parameter
/// configuration, which is outside the core's scope) into a `CoinType`,
/// raising `InvalidCoinType` per spec.md §7 when it does not fit in a u8.
pub fn coin_type_from_u32(value: u32) -> CoreResult<CoinType> {
    u8::try_from(value)
        .map(CoinType::new)
        .map_err(|_| CoreError::InvalidCoinType(value))
}
