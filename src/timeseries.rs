//! Sparse daily time series and point-in-time lookups.
//!
//! Every component that needs "the most recent value on or before date d"
//! goes through [`DailySeries::asof`], a single binary-search floor lookup.
//! Centralizing it guarantees identical no-lookahead behavior across
//! eligibility snapshots, rolling covariance windows and rolling liquidity
//! averages.

use crate::types::GapFillMode;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};

/// A sparse per-asset daily series: sorted parallel arrays of dates and
/// values. Dates are strictly increasing; inserting an existing date
/// overwrites its value.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DailySeries {
    dates: Vec<NaiveDate>,
    values: Vec<f64>,
}

impl DailySeries {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from unordered (date, value) pairs. Later duplicates win.
    pub fn from_pairs(pairs: impl IntoIterator<Item = (NaiveDate, f64)>) -> Self {
        let mut series = Self::new();
        for (date, value) in pairs {
            series.insert(date, value);
        }
        series
    }

    /// Insert or overwrite the value at `date`, keeping dates sorted.
    pub fn insert(&mut self, date: NaiveDate, value: f64) {
        match self.dates.binary_search(&date) {
            Ok(i) => self.values[i] = value,
            Err(i) => {
                self.dates.insert(i, date);
                self.values.insert(i, value);
            }
        }
    }

    pub fn len(&self) -> usize {
        self.dates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.dates.is_empty()
    }

    /// Exact lookup.
    pub fn at(&self, date: NaiveDate) -> Option<f64> {
        self.dates.binary_search(&date).ok().map(|i| self.values[i])
    }

    /// Floor ("as-of") lookup: the most recent observation on or before
    /// `date`. Never returns future data.
    pub fn asof(&self, date: NaiveDate) -> Option<(NaiveDate, f64)> {
        let idx = self.dates.partition_point(|d| *d <= date);
        if idx == 0 {
            None
        } else {
            Some((self.dates[idx - 1], self.values[idx - 1]))
        }
    }

    /// First observed date, if any.
    pub fn first_date(&self) -> Option<NaiveDate> {
        self.dates.first().copied()
    }

    pub fn last_date(&self) -> Option<NaiveDate> {
        self.dates.last().copied()
    }

    /// Iterate observations within `[start, end]` inclusive.
    pub fn range(
        &self,
        start: NaiveDate,
        end: NaiveDate,
    ) -> impl Iterator<Item = (NaiveDate, f64)> + '_ {
        let lo = self.dates.partition_point(|d| *d < start);
        let hi = self.dates.partition_point(|d| *d <= end);
        self.dates[lo..hi]
            .iter()
            .copied()
            .zip(self.values[lo..hi].iter().copied())
    }

    /// Iterate all observations in date order.
    pub fn iter(&self) -> impl Iterator<Item = (NaiveDate, f64)> + '_ {
        self.dates
            .iter()
            .copied()
            .zip(self.values.iter().copied())
    }
}

/// Simple return between two prices. None if either is missing or the
/// previous price is not strictly positive.
pub fn simple_return(prev: Option<f64>, current: Option<f64>) -> Option<f64> {
    match (prev, current) {
        (Some(p), Some(c)) if p > 0.0 => Some(c / p - 1.0),
        _ => None,
    }
}

/// A table of per-asset daily series (one table each for prices, market
/// caps and volumes). Sparse: missing cells are simply absent.
#[derive(Debug, Clone, Default)]
pub struct AssetTable {
    series: HashMap<String, DailySeries>,
}

impl AssetTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_series(&mut self, symbol: impl Into<String>, series: DailySeries) {
        self.series.insert(symbol.into(), series);
    }

    pub fn insert(&mut self, symbol: &str, date: NaiveDate, value: f64) {
        self.series
            .entry(symbol.to_string())
            .or_default()
            .insert(date, value);
    }

    pub fn get(&self, symbol: &str) -> Option<&DailySeries> {
        self.series.get(symbol)
    }

    pub fn at(&self, symbol: &str, date: NaiveDate) -> Option<f64> {
        self.series.get(symbol).and_then(|s| s.at(date))
    }

    pub fn asof(&self, symbol: &str, date: NaiveDate) -> Option<(NaiveDate, f64)> {
        self.series.get(symbol).and_then(|s| s.asof(date))
    }

    /// Sorted list of symbols present in the table.
    pub fn symbols(&self) -> Vec<String> {
        let mut symbols: Vec<String> = self.series.keys().cloned().collect();
        symbols.sort();
        symbols
    }

    pub fn len(&self) -> usize {
        self.series.len()
    }

    pub fn is_empty(&self) -> bool {
        self.series.is_empty()
    }

    /// Union trading calendar: every date observed for any symbol, sorted.
    pub fn calendar(&self) -> Vec<NaiveDate> {
        let mut dates = BTreeSet::new();
        for series in self.series.values() {
            for (date, _) in series.iter() {
                dates.insert(date);
            }
        }
        dates.into_iter().collect()
    }

    /// Apply a gap-fill mode against a trading calendar, returning a new
    /// table. `GapFillMode::None` is a plain clone.
    pub fn gap_filled(&self, mode: GapFillMode, calendar: &[NaiveDate]) -> AssetTable {
        match mode {
            GapFillMode::None => self.clone(),
            GapFillMode::SingleDay => {
                let mut filled = AssetTable::new();
                for (symbol, series) in &self.series {
                    filled
                        .series
                        .insert(symbol.clone(), fill_single_day_gaps(series, calendar));
                }
                filled
            }
        }
    }
}

/// Forward-fill strictly isolated one-day holes against a trading calendar.
///
/// A hole at calendar day `t` is filled with the value at `t-1` only when
/// the original series has observations at both `t-1` and `t+1`. Runs of
/// two or more consecutive missing days are never touched, so a fill can
/// never chain off another fill.
pub fn fill_single_day_gaps(series: &DailySeries, calendar: &[NaiveDate]) -> DailySeries {
    let mut filled = series.clone();
    for window in calendar.windows(3) {
        let (prev, hole, next) = (window[0], window[1], window[2]);
        if series.at(hole).is_none() {
            if let (Some(value), Some(_)) = (series.at(prev), series.at(next)) {
                filled.insert(hole, value);
            }
        }
    }
    filled
}

/// Observation statistics over a trailing window of the trading calendar,
/// used by the backtest's per-day quality gate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualityWindowStats {
    /// Calendar days in the window.
    pub window_days: usize,
    /// Days with an observation.
    pub observed_days: usize,
    /// 1 - observed/window.
    pub missing_fraction: f64,
    /// Longest run of consecutive missing calendar days.
    pub longest_missing_run: usize,
}

/// Compute trailing-window quality stats for one series as of `date`.
///
/// The window is the last `lookback` calendar entries ending at `date`
/// (exclusive of future days). A window shorter than `lookback` is reported
/// as-is; callers decide whether that passes their gate.
pub fn quality_window_stats(
    series: &DailySeries,
    calendar: &[NaiveDate],
    date: NaiveDate,
    lookback: usize,
) -> QualityWindowStats {
    let end = calendar.partition_point(|d| *d <= date);
    let start = end.saturating_sub(lookback);
    let window = &calendar[start..end];

    let mut observed = 0usize;
    let mut run = 0usize;
    let mut longest_run = 0usize;
    for &day in window {
        if series.at(day).is_some() {
            observed += 1;
            run = 0;
        } else {
            run += 1;
            longest_run = longest_run.max(run);
        }
    }

    let window_days = window.len();
    let missing_fraction = if window_days == 0 {
        1.0
    } else {
        1.0 - observed as f64 / window_days as f64
    };

    QualityWindowStats {
        window_days,
        observed_days: observed,
        missing_fraction,
        longest_missing_run: longest_run,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, d).unwrap()
    }

    fn series(pairs: &[(u32, f64)]) -> DailySeries {
        DailySeries::from_pairs(pairs.iter().map(|&(d, v)| (date(d), v)))
    }

    #[test]
    fn test_asof_floor_semantics() {
        let s = series(&[(2, 10.0), (5, 20.0), (9, 30.0)]);
        assert_eq!(s.asof(date(1)), None);
        assert_eq!(s.asof(date(2)), Some((date(2), 10.0)));
        assert_eq!(s.asof(date(4)), Some((date(2), 10.0)));
        assert_eq!(s.asof(date(5)), Some((date(5), 20.0)));
        assert_eq!(s.asof(date(30)), Some((date(9), 30.0)));
    }

    #[test]
    fn test_insert_keeps_order_and_overwrites() {
        let mut s = DailySeries::new();
        s.insert(date(5), 2.0);
        s.insert(date(1), 1.0);
        s.insert(date(3), 9.0);
        s.insert(date(3), 3.0);
        let collected: Vec<_> = s.iter().collect();
        assert_eq!(
            collected,
            vec![(date(1), 1.0), (date(3), 3.0), (date(5), 2.0)]
        );
    }

    #[test]
    fn test_simple_return() {
        assert_eq!(simple_return(Some(100.0), Some(110.0)), Some(0.1));
        assert_eq!(simple_return(None, Some(110.0)), None);
        assert_eq!(simple_return(Some(100.0), None), None);
        assert_eq!(simple_return(Some(0.0), Some(110.0)), None);
    }

    #[test]
    fn test_fill_isolated_single_day_gap() {
        let calendar: Vec<NaiveDate> = (1..=5).map(date).collect();
        let s = series(&[(1, 1.0), (2, 2.0), (4, 4.0), (5, 5.0)]);
        let filled = fill_single_day_gaps(&s, &calendar);
        assert_eq!(filled.at(date(3)), Some(2.0));
    }

    #[test]
    fn test_two_day_gap_left_unchanged() {
        let calendar: Vec<NaiveDate> = (1..=6).map(date).collect();
        let s = series(&[(1, 1.0), (2, 2.0), (5, 5.0), (6, 6.0)]);
        let filled = fill_single_day_gaps(&s, &calendar);
        assert_eq!(filled.at(date(3)), None);
        assert_eq!(filled.at(date(4)), None);
    }

    #[test]
    fn test_quality_window_stats() {
        let calendar: Vec<NaiveDate> = (1..=10).map(date).collect();
        let s = series(&[(1, 1.0), (2, 1.0), (5, 1.0), (8, 1.0), (9, 1.0), (10, 1.0)]);
        let stats = quality_window_stats(&s, &calendar, date(10), 10);
        assert_eq!(stats.window_days, 10);
        assert_eq!(stats.observed_days, 6);
        assert!((stats.missing_fraction - 0.4).abs() < 1e-12);
        // Days 3-4 and 6-7 are missing; both runs have length 2.
        assert_eq!(stats.longest_missing_run, 2);
    }

    #[test]
    fn test_calendar_union() {
        let mut table = AssetTable::new();
        table.insert("AAA", date(1), 1.0);
        table.insert("AAA", date(3), 1.0);
        table.insert("BBB", date(2), 1.0);
        assert_eq!(table.calendar(), vec![date(1), date(2), date(3)]);
    }
}
