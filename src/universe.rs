//! Point-in-time universe eligibility filtering.
//!
//! For each rebalance date the filter resolves the most recent available
//! data on or before that date for every candidate asset (never future
//! data) and emits one [`EligibilityRecord`] per candidate. The exclusion
//! reason follows a fixed precedence so the most structural
//! disqualification surfaces first rather than a data-availability symptom.

use crate::error::{BasketError, Result};
use crate::timeseries::AssetTable;
use crate::types::{EligibilityRecord, ExclusionReason};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use tracing::{debug, warn};

/// In-memory market data handed in by the ingestion layer: per-asset daily
/// price, market-cap and volume tables, all sparse, all read-only to the
/// core.
#[derive(Debug, Clone, Default)]
pub struct MarketData {
    pub prices: AssetTable,
    pub market_caps: AssetTable,
    pub volumes: AssetTable,
}

impl MarketData {
    /// Union trading calendar of the price table. Prices define trading
    /// days; market caps and volumes are auxiliary.
    pub fn calendar(&self) -> Vec<NaiveDate> {
        self.prices.calendar()
    }

    /// Structural check: a usable run needs a non-empty price table.
    pub fn validate(&self) -> Result<()> {
        if self.prices.is_empty() {
            return Err(BasketError::NoData);
        }
        Ok(())
    }
}

/// Reference lists owned by the ingestion layer: what can never be in a
/// basket, and when venues started listing each asset.
#[derive(Debug, Clone, Default)]
pub struct ReferenceData {
    /// Designated numeraire asset; never a basket candidate.
    pub numeraire: String,
    pub denylist: HashSet<String>,
    pub stablecoins: HashSet<String>,
    pub wrapped_assets: HashSet<String>,
    /// Per-asset venue onboarding dates. None disables the venue proxy
    /// regardless of configuration.
    pub venue_onboarding: Option<HashMap<String, NaiveDate>>,
}

impl ReferenceData {
    pub fn new(numeraire: impl Into<String>) -> Self {
        Self {
            numeraire: numeraire.into(),
            ..Default::default()
        }
    }
}

/// Thresholds and requirement toggles for eligibility.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EligibilityConfig {
    /// Minimum days since the first observed price.
    pub min_listing_age_days: i64,
    /// Minimum as-of market capitalization.
    pub min_market_cap: f64,
    /// Minimum trailing average daily dollar volume.
    pub min_liquidity: f64,
    /// Trailing window for the liquidity average, in calendar days.
    pub liquidity_window_days: i64,
    /// Which point-in-time fields are required to exist.
    pub require_price: bool,
    pub require_volume: bool,
    pub require_market_cap: bool,
    /// Enforce the venue onboarding-date proxy when the table is present.
    pub enforce_venue_listing: bool,
}

impl Default for EligibilityConfig {
    fn default() -> Self {
        Self {
            min_listing_age_days: 180,
            min_market_cap: 50_000_000.0,
            min_liquidity: 1_000_000.0,
            liquidity_window_days: 14,
            require_price: true,
            require_volume: true,
            require_market_cap: true,
            enforce_venue_listing: true,
        }
    }
}

/// Trailing average of price x volume over the liquidity window ending at
/// `date`. Only days where both price and volume exist contribute; no days
/// means no measurable liquidity.
pub fn trailing_dollar_liquidity(
    data: &MarketData,
    symbol: &str,
    date: NaiveDate,
    window_days: i64,
) -> Option<f64> {
    let prices = data.prices.get(symbol)?;
    let volumes = data.volumes.get(symbol)?;
    let start = date - chrono::Duration::days(window_days - 1);

    let mut sum = 0.0;
    let mut count = 0usize;
    for (day, price) in prices.range(start, date) {
        if let Some(volume) = volumes.at(day) {
            sum += price * volume;
            count += 1;
        }
    }
    if count == 0 {
        None
    } else {
        Some(sum / count as f64)
    }
}

/// Evaluate a single candidate as of `date`.
///
/// Every flag is computed unconditionally; the exclusion reason is the
/// highest-precedence rule that fires. `eligible` iff no rule fires.
pub fn evaluate_candidate(
    date: NaiveDate,
    symbol: &str,
    data: &MarketData,
    refs: &ReferenceData,
    config: &EligibilityConfig,
) -> EligibilityRecord {
    let price = data.prices.asof(symbol, date).map(|(_, v)| v);
    let volume = data.volumes.asof(symbol, date).map(|(_, v)| v);
    let market_cap = data.market_caps.asof(symbol, date).map(|(_, v)| v);

    let has_price = price.is_some();
    let has_volume = volume.is_some();
    let has_market_cap = market_cap.is_some();

    let is_numeraire = symbol == refs.numeraire;
    let is_denylisted = refs.denylist.contains(symbol);
    let is_stablecoin = refs.stablecoins.contains(symbol);
    let is_wrapped = refs.wrapped_assets.contains(symbol);

    let age_days = data
        .prices
        .get(symbol)
        .and_then(|s| s.first_date())
        .map(|first| (date - first).num_days())
        .unwrap_or(0);
    let meets_age = age_days >= config.min_listing_age_days;

    let meets_market_cap = market_cap.map(|m| m >= config.min_market_cap).unwrap_or(false);

    let liquidity =
        trailing_dollar_liquidity(data, symbol, date, config.liquidity_window_days);
    let meets_liquidity = liquidity.map(|l| l >= config.min_liquidity).unwrap_or(false);

    let venue_listed = match (&refs.venue_onboarding, config.enforce_venue_listing) {
        (Some(table), true) => table.get(symbol).map(|d| *d <= date).unwrap_or(false),
        _ => true,
    };

    // Fixed precedence: structural disqualifications first, then missing
    // data, then threshold misses, then the venue proxy.
    let exclusion_reason = if is_numeraire {
        Some(ExclusionReason::Numeraire)
    } else if is_denylisted {
        Some(ExclusionReason::Denylisted)
    } else if is_stablecoin {
        Some(ExclusionReason::Stablecoin)
    } else if is_wrapped {
        Some(ExclusionReason::WrappedAsset)
    } else if config.require_price && !has_price {
        Some(ExclusionReason::MissingPrice)
    } else if config.require_volume && !has_volume {
        Some(ExclusionReason::MissingVolume)
    } else if config.require_market_cap && !has_market_cap {
        Some(ExclusionReason::MissingMarketCap)
    } else if !meets_age {
        Some(ExclusionReason::InsufficientAge)
    } else if !meets_market_cap {
        Some(ExclusionReason::BelowMinMarketCap)
    } else if !meets_liquidity {
        Some(ExclusionReason::BelowMinLiquidity)
    } else if !venue_listed {
        Some(ExclusionReason::VenueNotListed)
    } else {
        None
    };

    EligibilityRecord {
        rebalance_date: date,
        symbol: symbol.to_string(),
        has_price,
        has_volume,
        has_market_cap,
        is_denylisted,
        is_stablecoin,
        is_wrapped,
        meets_age,
        meets_market_cap,
        meets_liquidity,
        venue_listed,
        eligible: exclusion_reason.is_none(),
        exclusion_reason,
    }
}

/// Evaluate the whole candidate list for one rebalance date.
///
/// Candidates default to every symbol in the price table; records come back
/// sorted by symbol. Pure function of the snapshot plus reference tables.
pub fn evaluate_universe(
    date: NaiveDate,
    candidates: Option<&[String]>,
    data: &MarketData,
    refs: &ReferenceData,
    config: &EligibilityConfig,
) -> Vec<EligibilityRecord> {
    let owned;
    let symbols: &[String] = match candidates {
        Some(c) => c,
        None => {
            owned = data.prices.symbols();
            &owned
        }
    };

    let mut records: Vec<EligibilityRecord> = symbols
        .iter()
        .map(|s| evaluate_candidate(date, s, data, refs, config))
        .collect();
    records.sort_by(|a, b| a.symbol.cmp(&b.symbol));

    let eligible = records.iter().filter(|r| r.eligible).count();
    if eligible == 0 {
        warn!("no eligible assets on {}", date);
    } else {
        debug!(
            "{}: {} of {} candidates eligible",
            date,
            eligible,
            records.len()
        );
    }
    records
}

/// Symbols with `eligible = true`, in sorted order.
pub fn eligible_symbols(records: &[EligibilityRecord]) -> Vec<String> {
    records
        .iter()
        .filter(|r| r.eligible)
        .map(|r| r.symbol.clone())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::timeseries::DailySeries;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    /// A symbol with daily price/mcap/volume history from `start` for `days`.
    fn add_symbol(
        data: &mut MarketData,
        symbol: &str,
        start: NaiveDate,
        days: i64,
        price: f64,
        mcap: f64,
        volume: f64,
    ) {
        let mut prices = DailySeries::new();
        let mut mcaps = DailySeries::new();
        let mut volumes = DailySeries::new();
        for i in 0..days {
            let day = start + chrono::Duration::days(i);
            prices.insert(day, price);
            mcaps.insert(day, mcap);
            volumes.insert(day, volume);
        }
        data.prices.insert_series(symbol, prices);
        data.market_caps.insert_series(symbol, mcaps);
        data.volumes.insert_series(symbol, volumes);
    }

    fn setup() -> (MarketData, ReferenceData, EligibilityConfig, NaiveDate) {
        let mut data = MarketData::default();
        let start = date(2023, 1, 1);
        let asof = date(2024, 1, 15);
        // 380 days of history ending past the rebalance date.
        add_symbol(&mut data, "BTC", start, 380, 40_000.0, 8e11, 1e6);
        add_symbol(&mut data, "AAA", start, 380, 10.0, 1e9, 5e5);
        add_symbol(&mut data, "USDx", start, 380, 1.0, 5e9, 1e7);
        let mut refs = ReferenceData::new("BTC");
        refs.stablecoins.insert("USDx".to_string());
        let config = EligibilityConfig::default();
        (data, refs, config, asof)
    }

    #[test]
    fn test_numeraire_always_excluded() {
        let (data, refs, config, asof) = setup();
        let rec = evaluate_candidate(asof, "BTC", &data, &refs, &config);
        assert!(!rec.eligible);
        assert_eq!(rec.exclusion_reason, Some(ExclusionReason::Numeraire));
    }

    #[test]
    fn test_stablecoin_excluded() {
        let (data, refs, config, asof) = setup();
        let rec = evaluate_candidate(asof, "USDx", &data, &refs, &config);
        assert_eq!(rec.exclusion_reason, Some(ExclusionReason::Stablecoin));
        assert!(rec.is_stablecoin);
    }

    #[test]
    fn test_healthy_asset_eligible() {
        let (data, refs, config, asof) = setup();
        let rec = evaluate_candidate(asof, "AAA", &data, &refs, &config);
        assert!(rec.eligible, "reason: {:?}", rec.exclusion_reason);
        assert!(rec.has_price && rec.has_volume && rec.has_market_cap);
        assert!(rec.meets_age && rec.meets_market_cap && rec.meets_liquidity);
    }

    #[test]
    fn test_unknown_symbol_missing_price() {
        let (data, refs, config, asof) = setup();
        let rec = evaluate_candidate(asof, "ZZZ", &data, &refs, &config);
        assert_eq!(rec.exclusion_reason, Some(ExclusionReason::MissingPrice));
    }

    #[test]
    fn test_young_asset_fails_age() {
        let (mut data, refs, config, asof) = setup();
        add_symbol(&mut data, "NEW", asof - chrono::Duration::days(30), 40, 5.0, 1e9, 1e6);
        let rec = evaluate_candidate(asof, "NEW", &data, &refs, &config);
        assert_eq!(rec.exclusion_reason, Some(ExclusionReason::InsufficientAge));
        assert!(!rec.meets_age);
    }

    #[test]
    fn test_small_cap_fails_threshold() {
        let (mut data, refs, config, asof) = setup();
        add_symbol(&mut data, "TINY", date(2023, 1, 1), 380, 0.5, 1e6, 1e6);
        let rec = evaluate_candidate(asof, "TINY", &data, &refs, &config);
        assert_eq!(
            rec.exclusion_reason,
            Some(ExclusionReason::BelowMinMarketCap)
        );
    }

    #[test]
    fn test_illiquid_fails_threshold() {
        let (mut data, refs, config, asof) = setup();
        // Dollar volume 10 * 100 = 1000/day, far below min_liquidity.
        add_symbol(&mut data, "THIN", date(2023, 1, 1), 380, 10.0, 1e9, 100.0);
        let rec = evaluate_candidate(asof, "THIN", &data, &refs, &config);
        assert_eq!(
            rec.exclusion_reason,
            Some(ExclusionReason::BelowMinLiquidity)
        );
    }

    #[test]
    fn test_venue_proxy() {
        let (mut data, mut refs, config, asof) = setup();
        add_symbol(&mut data, "LATE", date(2023, 1, 1), 380, 10.0, 1e9, 5e5);
        let mut onboarding = HashMap::new();
        onboarding.insert("AAA".to_string(), date(2023, 6, 1));
        onboarding.insert("LATE".to_string(), asof + chrono::Duration::days(10));
        refs.venue_onboarding = Some(onboarding);

        let rec = evaluate_candidate(asof, "LATE", &data, &refs, &config);
        assert_eq!(rec.exclusion_reason, Some(ExclusionReason::VenueNotListed));
        let rec = evaluate_candidate(asof, "AAA", &data, &refs, &config);
        assert!(rec.eligible);
    }

    #[test]
    fn test_precedence_denylist_beats_missing_data() {
        let (mut data, mut refs, config, asof) = setup();
        // Denylisted AND missing data: the structural reason wins.
        add_symbol(&mut data, "BAD", asof - chrono::Duration::days(5), 3, 1.0, 1e9, 1e6);
        refs.denylist.insert("BAD".to_string());
        let rec = evaluate_candidate(asof, "BAD", &data, &refs, &config);
        assert_eq!(rec.exclusion_reason, Some(ExclusionReason::Denylisted));
    }

    #[test]
    fn test_no_lookahead_in_asof() {
        let (mut data, refs, config, _) = setup();
        // Data starts after the rebalance date: nothing is visible as-of.
        add_symbol(&mut data, "FUT", date(2024, 6, 1), 100, 10.0, 1e9, 1e6);
        let rec = evaluate_candidate(date(2024, 1, 15), "FUT", &data, &refs, &config);
        assert!(!rec.has_price);
        assert_eq!(rec.exclusion_reason, Some(ExclusionReason::MissingPrice));
    }

    #[test]
    fn test_universe_sorted_and_counted() {
        let (data, refs, config, asof) = setup();
        let records = evaluate_universe(asof, None, &data, &refs, &config);
        assert_eq!(records.len(), 3);
        let symbols: Vec<&str> = records.iter().map(|r| r.symbol.as_str()).collect();
        assert_eq!(symbols, vec!["AAA", "BTC", "USDx"]);
        assert_eq!(eligible_symbols(&records), vec!["AAA".to_string()]);
    }
}
