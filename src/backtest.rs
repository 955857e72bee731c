//! Backtest simulation engine.
//!
//! A state machine stepping one trading day at a time, strictly in date
//! order: each day's equity and turnover-dependent cost depend on the prior
//! day's held weights, so the loop is a sequential fold. All inputs are
//! resident in memory before simulation starts; there is no I/O in the hot
//! loop.

use crate::error::{BasketError, Result};
use crate::timeseries::{quality_window_stats, simple_return};
use crate::types::{
    BacktestDailyRecord, BasketSnapshot, GapFillMode, MissingPricePolicy,
    RebalanceTurnoverRecord,
};
use crate::universe::MarketData;
use chrono::NaiveDate;
use indicatif::{ProgressBar, ProgressStyle};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, info, warn};

/// Per-asset-per-day data quality gate over a trailing lookback window.
///
/// A symbol failing the gate contributes zero return that day; the basket
/// denominator is not renormalized. Evaluated independently each day.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualityGateConfig {
    /// Trailing window, in trading days.
    pub lookback_days: usize,
    /// Minimum observed days inside the window.
    pub min_history_days: usize,
    /// Maximum fraction of the window that may be missing.
    pub max_missing_fraction: f64,
    /// Maximum run of consecutive missing days inside the window.
    pub max_consecutive_missing: usize,
}

impl Default for QualityGateConfig {
    fn default() -> Self {
        Self {
            lookback_days: 30,
            min_history_days: 20,
            max_missing_fraction: 0.3,
            max_consecutive_missing: 5,
        }
    }
}

impl QualityGateConfig {
    fn passes(&self, stats: &crate::timeseries::QualityWindowStats) -> bool {
        stats.observed_days >= self.min_history_days
            && stats.missing_fraction <= self.max_missing_fraction
            && stats.longest_missing_run <= self.max_consecutive_missing
    }
}

/// Configuration for the backtest engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BacktestConfig {
    /// Base asset whose simple return forms the long side of the
    /// long-short spread.
    pub numeraire: String,
    /// Trading fee, in basis points of turnover.
    pub fee_bps: f64,
    /// Slippage, in basis points of turnover.
    pub slippage_bps: f64,
    /// Below this coverage the missing-price policy kicks in.
    pub coverage_threshold: f64,
    pub missing_price_policy: MissingPricePolicy,
    pub gap_fill: GapFillMode,
    /// Optional per-asset-per-day quality gating.
    pub quality_gate: Option<QualityGateConfig>,
    /// Show a progress bar during simulation.
    pub show_progress: bool,
    /// Optional simulation date bounds.
    pub start: Option<NaiveDate>,
    pub end: Option<NaiveDate>,
}

impl Default for BacktestConfig {
    fn default() -> Self {
        Self {
            numeraire: "BTC".to_string(),
            fee_bps: 10.0,
            slippage_bps: 5.0,
            coverage_threshold: 0.8,
            missing_price_policy: MissingPricePolicy::default(),
            gap_fill: GapFillMode::default(),
            quality_gate: None,
            show_progress: false,
            start: None,
            end: None,
        }
    }
}

/// Concentration and attribution summary over one backtest run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct ConcentrationReport {
    /// Top constituents of the final snapshot by absolute weight.
    pub top_weights: Vec<(String, f64)>,
    /// Top assets by cumulative contribution (weight x daily return,
    /// summed over the run).
    pub top_contributors: Vec<(String, f64)>,
    /// Sum of squared weights of the final snapshot.
    pub herfindahl: f64,
    /// Share of final gross exposure held by the largest 5 positions.
    pub top5_share: f64,
    /// Share of final gross exposure held by the largest 10 positions.
    pub top10_share: f64,
}

/// Everything one simulation run emits.
#[derive(Debug, Clone, PartialEq)]
pub struct BacktestOutput {
    pub daily: Vec<BacktestDailyRecord>,
    pub turnover: Vec<RebalanceTurnoverRecord>,
    pub concentration: ConcentrationReport,
}

/// Half the sum of absolute weight changes between two snapshots.
pub fn calculate_turnover(
    prev: &BTreeMap<String, f64>,
    next: &BTreeMap<String, f64>,
) -> f64 {
    let mut sum = 0.0;
    for (symbol, w) in next {
        sum += (w - prev.get(symbol).copied().unwrap_or(0.0)).abs();
    }
    for (symbol, w) in prev {
        if !next.contains_key(symbol) {
            sum += w.abs();
        }
    }
    sum / 2.0
}

/// The simulation engine. Construct once with a config, run against any
/// market data + snapshot set.
pub struct BacktestEngine {
    config: BacktestConfig,
}

impl BacktestEngine {
    pub fn new(config: BacktestConfig) -> Self {
        Self { config }
    }

    /// Run the day-by-day simulation.
    ///
    /// Snapshots take effect on the first trading day on or after their
    /// rebalance date; a skipped optimizer date simply leaves the previous
    /// snapshot in force. Missing required inputs abort before the loop
    /// starts.
    pub fn run(
        &self,
        data: &MarketData,
        snapshots: &BTreeMap<NaiveDate, BasketSnapshot>,
    ) -> Result<BacktestOutput> {
        data.validate()?;
        if snapshots.is_empty() {
            return Err(BasketError::EmptyUniverse(
                "no basket snapshots to simulate".to_string(),
            ));
        }
        if data.prices.get(&self.config.numeraire).is_none() {
            return Err(BasketError::DataError(format!(
                "numeraire '{}' has no price series",
                self.config.numeraire
            )));
        }

        let full_calendar = data.calendar();
        let prices = data.prices.gap_filled(self.config.gap_fill, &full_calendar);

        let first_rebalance = *snapshots.keys().next().unwrap();
        let sim_start = self.config.start.map_or(first_rebalance, |s| s.max(first_rebalance));
        let sim_days: Vec<(usize, NaiveDate)> = full_calendar
            .iter()
            .copied()
            .enumerate()
            .filter(|(_, d)| {
                *d >= sim_start && self.config.end.map_or(true, |end| *d <= end)
            })
            .collect();
        if sim_days.is_empty() {
            return Err(BasketError::DataError(
                "no trading days inside the simulation window".to_string(),
            ));
        }

        info!(
            "simulating {} trading days, {} snapshots, policy {:?}",
            sim_days.len(),
            snapshots.len(),
            self.config.missing_price_policy
        );

        let progress = if self.config.show_progress {
            let pb = ProgressBar::new(sim_days.len() as u64);
            pb.set_style(
                ProgressStyle::default_bar()
                    .template("{spinner:.green} [{bar:40.cyan/blue}] {pos}/{len} days")
                    .unwrap()
                    .progress_chars("#>-"),
            );
            Some(pb)
        } else {
            None
        };

        let cost_rate = (self.config.fee_bps + self.config.slippage_bps) / 10_000.0;

        let mut held: BTreeMap<String, f64> = BTreeMap::new();
        let mut held_any = false;
        let mut final_snapshot: Option<&BasketSnapshot> = None;
        let mut pending = snapshots.values().peekable();

        let mut equity = 1.0_f64;
        let mut daily = Vec::with_capacity(sim_days.len());
        let mut turnover_records = Vec::new();
        let mut contributions: BTreeMap<String, f64> = BTreeMap::new();

        for &(cal_idx, day) in &sim_days {
            // Apply the latest snapshot due on or before this trading day.
            let mut due: Option<&BasketSnapshot> = None;
            while let Some(snap) = pending.peek() {
                if snap.rebalance_date <= day {
                    due = Some(pending.next().unwrap());
                } else {
                    break;
                }
            }

            let mut cost = 0.0;
            if let Some(snap) = due {
                let turnover = if held_any {
                    calculate_turnover(&held, &snap.weights)
                } else {
                    1.0
                };
                let entered = snap
                    .weights
                    .keys()
                    .filter(|s| !held.contains_key(*s))
                    .count();
                let exited = held
                    .keys()
                    .filter(|s| !snap.weights.contains_key(*s))
                    .count();
                cost = cost_rate * turnover;
                turnover_records.push(RebalanceTurnoverRecord {
                    rebalance_date: snap.rebalance_date,
                    turnover,
                    entered,
                    exited,
                    constituents: snap.weights.len(),
                });
                debug!(
                    "{}: applied snapshot of {} assets, turnover {:.4}",
                    day,
                    snap.weights.len(),
                    turnover
                );
                held = snap.weights.clone();
                held_any = true;
                final_snapshot = Some(snap);
            }

            let prev_day = if cal_idx > 0 {
                Some(full_calendar[cal_idx - 1])
            } else {
                None
            };

            let numeraire_return = prev_day
                .and_then(|prev| {
                    simple_return(
                        prices.at(&self.config.numeraire, prev),
                        prices.at(&self.config.numeraire, day),
                    )
                })
                .unwrap_or(f64::NAN);

            // Basket return with coverage accounting. Quality-gated symbols
            // contribute zero without shrinking the denominator or
            // triggering the coverage policy.
            let total_weight: f64 = held.values().map(|w| w.abs()).sum();
            let mut covered_weight = 0.0;
            let mut covered_sum = 0.0;
            for (symbol, &w) in &held {
                let gated = self.config.quality_gate.as_ref().is_some_and(|gate| {
                    let series = match prices.get(symbol) {
                        Some(s) => s,
                        None => return true,
                    };
                    let stats =
                        quality_window_stats(series, &full_calendar, day, gate.lookback_days);
                    !gate.passes(&stats)
                });
                if gated {
                    covered_weight += w.abs();
                    continue;
                }
                let ret = prev_day
                    .and_then(|prev| simple_return(prices.at(symbol, prev), prices.at(symbol, day)));
                if let Some(r) = ret {
                    covered_weight += w.abs();
                    covered_sum += w * r;
                    *contributions.entry(symbol.clone()).or_insert(0.0) += w * r;
                }
            }

            let coverage = if total_weight > 0.0 {
                covered_weight / total_weight
            } else {
                1.0
            };

            let basket_return = if total_weight == 0.0 {
                0.0
            } else if coverage < self.config.coverage_threshold {
                match self.config.missing_price_policy {
                    MissingPricePolicy::Nan => f64::NAN,
                    MissingPricePolicy::Renormalize => {
                        if covered_weight > 0.0 {
                            covered_sum * (total_weight / covered_weight)
                        } else {
                            f64::NAN
                        }
                    }
                    MissingPricePolicy::ConservativeZero => covered_sum,
                }
            } else {
                covered_sum
            };

            let long_short_return = numeraire_return - basket_return;
            let net_return = long_short_return - cost;
            if net_return.is_finite() {
                equity *= 1.0 + net_return;
            } else {
                // Transaction costs are cash out the door even on a day the
                // return is unobservable; only the return leg is carried.
                if cost > 0.0 {
                    equity *= 1.0 - cost;
                }
                warn!("{}: no usable return (coverage {:.3}), equity carried", day, coverage);
            }

            daily.push(BacktestDailyRecord {
                date: day,
                numeraire_return,
                basket_return,
                long_short_return,
                cost,
                net_return,
                equity,
                coverage,
            });

            if let Some(pb) = &progress {
                pb.inc(1);
            }
        }

        if let Some(pb) = progress {
            pb.finish_and_clear();
        }

        let concentration = concentration_report(final_snapshot, &contributions);
        Ok(BacktestOutput {
            daily,
            turnover: turnover_records,
            concentration,
        })
    }
}

fn concentration_report(
    final_snapshot: Option<&BasketSnapshot>,
    contributions: &BTreeMap<String, f64>,
) -> ConcentrationReport {
    let mut report = ConcentrationReport::default();

    if let Some(snap) = final_snapshot {
        let mut by_abs: Vec<(String, f64)> = snap
            .weights
            .iter()
            .map(|(s, &w)| (s.clone(), w))
            .collect();
        by_abs.sort_by(|a, b| {
            b.1.abs()
                .partial_cmp(&a.1.abs())
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        report.herfindahl = snap.weights.values().map(|w| w * w).sum();
        let gross = snap.gross();
        if gross > 0.0 {
            report.top5_share =
                by_abs.iter().take(5).map(|(_, w)| w.abs()).sum::<f64>() / gross;
            report.top10_share =
                by_abs.iter().take(10).map(|(_, w)| w.abs()).sum::<f64>() / gross;
        }
        report.top_weights = by_abs.into_iter().take(5).collect();
    }

    let mut by_contribution: Vec<(String, f64)> = contributions
        .iter()
        .map(|(s, &c)| (s.clone(), c))
        .collect();
    by_contribution.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
    report.top_contributors = by_contribution.into_iter().take(5).collect();

    report
}
