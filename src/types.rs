//! Core record types shared across the crate.
//!
//! Everything the pipeline emits is one of the plain data tables defined
//! here: eligibility records, basket snapshots, daily backtest records and
//! per-rebalance turnover records. All of them derive serde traits so the
//! surrounding ingestion/reporting layers can persist them as they see fit.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Weighting scheme used to turn market caps into initial weights.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum WeightScheme {
    /// Weight proportional to market capitalization.
    #[default]
    CapWeighted,
    /// Weight proportional to the square root of market capitalization.
    SqrtCapWeighted,
    /// Equal weight across all selected assets.
    EqualWeight,
}

/// How the backtest treats a day where too much of the basket has no price.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum MissingPricePolicy {
    /// Report the basket return as NaN for that day.
    Nan,
    /// Rescale weights across covered assets to the full budget.
    ///
    /// Biases reported returns upward under partial coverage; kept as an
    /// explicit policy choice rather than a defect.
    Renormalize,
    /// Uncovered assets contribute zero return; the denominator stays the
    /// full original weight.
    #[default]
    ConservativeZero,
}

/// Pre-processing mode for missing prices before simulation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum GapFillMode {
    /// Leave series untouched.
    #[default]
    None,
    /// Forward-fill strictly isolated one-day holes. Runs of two or more
    /// consecutive missing days are left unchanged.
    SingleDay,
}

/// Whether a snapshot is a long-only or a dollar-neutral basket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BasketKind {
    /// Weights sum to 1.
    LongOnly,
    /// Weights sum to 0, gross exposure capped.
    DollarNeutral,
}

/// Why an asset was excluded from the universe on a rebalance date.
///
/// Variants are listed in precedence order: when several disqualifications
/// apply, the earliest one is reported so the most structural reason
/// surfaces first rather than a data-availability symptom.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ExclusionReason {
    /// The designated numeraire asset is never a basket candidate.
    Numeraire,
    Denylisted,
    Stablecoin,
    WrappedAsset,
    MissingPrice,
    MissingVolume,
    MissingMarketCap,
    InsufficientAge,
    BelowMinMarketCap,
    BelowMinLiquidity,
    /// Venue-listing proxy not yet active on the rebalance date.
    VenueNotListed,
}

impl ExclusionReason {
    /// Stable lowercase label used in exported tables.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Numeraire => "numeraire",
            Self::Denylisted => "denylisted",
            Self::Stablecoin => "stablecoin",
            Self::WrappedAsset => "wrapped-asset",
            Self::MissingPrice => "missing-price",
            Self::MissingVolume => "missing-volume",
            Self::MissingMarketCap => "missing-marketcap",
            Self::InsufficientAge => "insufficient-age",
            Self::BelowMinMarketCap => "below-min-marketcap",
            Self::BelowMinLiquidity => "below-min-liquidity",
            Self::VenueNotListed => "venue-not-listed",
        }
    }
}

impl std::fmt::Display for ExclusionReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Point-in-time eligibility decision for one asset on one rebalance date.
///
/// Created fresh each rebalance date and never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EligibilityRecord {
    pub rebalance_date: NaiveDate,
    pub symbol: String,
    pub has_price: bool,
    pub has_volume: bool,
    pub has_market_cap: bool,
    pub is_denylisted: bool,
    pub is_stablecoin: bool,
    pub is_wrapped: bool,
    pub meets_age: bool,
    pub meets_market_cap: bool,
    pub meets_liquidity: bool,
    pub venue_listed: bool,
    pub exclusion_reason: Option<ExclusionReason>,
    pub eligible: bool,
}

/// One basket as of a rebalance date: weight and rank per constituent.
///
/// Snapshots are created once by the optimizer and superseded, never edited,
/// by the next rebalance. Weight maps are ordered (`BTreeMap`) so that every
/// float reduction over a snapshot is deterministic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BasketSnapshot {
    pub rebalance_date: NaiveDate,
    pub kind: BasketKind,
    /// Label of the construction method that produced this snapshot.
    pub method: String,
    pub weights: BTreeMap<String, f64>,
    /// 1-based rank by absolute weight, largest first.
    pub ranks: BTreeMap<String, usize>,
}

impl BasketSnapshot {
    /// Build a snapshot from a weight map, deriving ranks by |weight|.
    pub fn from_weights(
        rebalance_date: NaiveDate,
        kind: BasketKind,
        method: impl Into<String>,
        weights: BTreeMap<String, f64>,
    ) -> Self {
        let mut by_abs: Vec<(&String, f64)> =
            weights.iter().map(|(s, &w)| (s, w.abs())).collect();
        by_abs.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        let ranks = by_abs
            .iter()
            .enumerate()
            .map(|(i, (s, _))| ((*s).clone(), i + 1))
            .collect();
        Self {
            rebalance_date,
            kind,
            method: method.into(),
            weights,
            ranks,
        }
    }

    /// Sum of weights.
    pub fn net(&self) -> f64 {
        self.weights.values().sum()
    }

    /// Sum of absolute weights.
    pub fn gross(&self) -> f64 {
        self.weights.values().map(|w| w.abs()).sum()
    }

    /// Number of constituents.
    pub fn len(&self) -> usize {
        self.weights.len()
    }

    pub fn is_empty(&self) -> bool {
        self.weights.is_empty()
    }

    /// Check the weight-sum invariant for this snapshot's kind.
    pub fn validate(&self, gross_cap: f64, tol: f64) -> bool {
        match self.kind {
            BasketKind::LongOnly => (self.net() - 1.0).abs() <= tol,
            BasketKind::DollarNeutral => {
                self.net().abs() <= tol && self.gross() <= gross_cap + tol
            }
        }
    }
}

/// One simulated trading day.
///
/// Records are sequentially dependent: `equity` compounds the prior day's
/// equity by `1 + net_return`. Return fields may be NaN on days the
/// missing-price policy reports no usable basket return.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BacktestDailyRecord {
    pub date: NaiveDate,
    /// Simple return of the designated numeraire asset.
    pub numeraire_return: f64,
    /// Weighted basket return under the configured missing-price policy.
    pub basket_return: f64,
    /// numeraire_return - basket_return.
    pub long_short_return: f64,
    /// Transaction cost charged on this day (rebalance days only).
    pub cost: f64,
    /// long_short_return - cost.
    pub net_return: f64,
    /// Cumulative equity, seeded at 1.0; carried flat over NaN days.
    pub equity: f64,
    /// Fraction of held weight backed by usable prices this day.
    pub coverage: f64,
}

/// Turnover accounting for one applied rebalance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RebalanceTurnoverRecord {
    pub rebalance_date: NaiveDate,
    /// Half the sum of absolute weight changes against the prior snapshot.
    pub turnover: f64,
    pub entered: usize,
    pub exited: usize,
    pub constituents: usize,
}
