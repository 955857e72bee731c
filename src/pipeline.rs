//! End-to-end orchestration: schedule -> eligibility -> basket
//! construction -> simulation.
//!
//! Per-rebalance-date optimization is independent given the history up to
//! that date, so it fans out across threads. The only cross-date dependency
//! is the previous snapshot's weights for the turnover penalty; when that
//! penalty is active the optimization pass runs sequentially in date order
//! instead.

use crate::analytics::{summarize, PerformanceSummary};
use crate::backtest::{BacktestConfig, BacktestEngine, ConcentrationReport};
use crate::cluster::{optimize_cluster_matched, ClusterConfig};
use crate::error::{BasketError, Result};
use crate::optimizer::{optimize_min_variance, OptimizerConfig};
use crate::schedule::{rebalance_dates, RebalanceFrequency};
use crate::types::{
    BacktestDailyRecord, BasketKind, BasketSnapshot, EligibilityRecord,
    RebalanceTurnoverRecord, WeightScheme,
};
use crate::universe::{eligible_symbols, evaluate_universe, EligibilityConfig, MarketData, ReferenceData};
use crate::weights::compute_weights;
use chrono::NaiveDate;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{info, warn};
use uuid::Uuid;

/// Which construction path produces the snapshots.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum BasketMode {
    /// Long-only: top N eligible assets by market cap, scheme-weighted.
    #[default]
    TopN,
    /// Dollar-neutral constrained minimum variance (Method A).
    MinVariance,
    /// Dollar-neutral cluster-matched pairs (Method B).
    ClusterMatched,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduleConfig {
    pub start: NaiveDate,
    pub end: NaiveDate,
    pub frequency: RebalanceFrequency,
    pub day_of_month: u32,
}

/// Full configuration for one pipeline run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    pub schedule: ScheduleConfig,
    pub eligibility: EligibilityConfig,
    pub mode: BasketMode,
    /// Constituent count for `BasketMode::TopN`.
    pub top_n: usize,
    /// Weighting scheme for `BasketMode::TopN`.
    pub weighting: WeightScheme,
    /// Per-asset cap for `BasketMode::TopN` weights.
    pub max_weight: f64,
    pub optimizer: OptimizerConfig,
    pub cluster: ClusterConfig,
    pub backtest: BacktestConfig,
}

/// Everything one run emits, stamped with a run id.
#[derive(Debug, Clone)]
pub struct PipelineResult {
    pub run_id: Uuid,
    pub eligibility: Vec<EligibilityRecord>,
    pub snapshots: BTreeMap<NaiveDate, BasketSnapshot>,
    pub daily: Vec<BacktestDailyRecord>,
    pub turnover: Vec<RebalanceTurnoverRecord>,
    pub concentration: ConcentrationReport,
    pub summary: PerformanceSummary,
}

/// The pipeline: owns nothing but borrows market data and reference tables
/// for the duration of a run.
pub struct BasketPipeline<'a> {
    data: &'a MarketData,
    refs: &'a ReferenceData,
    config: PipelineConfig,
}

impl<'a> BasketPipeline<'a> {
    pub fn new(data: &'a MarketData, refs: &'a ReferenceData, config: PipelineConfig) -> Self {
        Self { data, refs, config }
    }

    pub fn run(&self) -> Result<PipelineResult> {
        self.data.validate()?;
        let run_id = Uuid::new_v4();

        let schedule = &self.config.schedule;
        let dates = rebalance_dates(
            schedule.start,
            schedule.end,
            schedule.frequency,
            schedule.day_of_month,
        );
        if dates.is_empty() {
            return Err(BasketError::ConfigError(
                "rebalance schedule is empty".to_string(),
            ));
        }

        info!(
            "run {}: {} rebalance dates ({:?}), mode {:?}",
            run_id,
            dates.len(),
            schedule.frequency,
            self.config.mode
        );

        let calendar = self.data.calendar();

        // Eligibility snapshots, one per rebalance date.
        let mut eligibility = Vec::new();
        let mut universes: Vec<(NaiveDate, Vec<String>)> = Vec::new();
        for &date in &dates {
            let records =
                evaluate_universe(date, None, self.data, self.refs, &self.config.eligibility);
            universes.push((date, eligible_symbols(&records)));
            eligibility.extend(records);
        }
        if universes.iter().all(|(_, symbols)| symbols.is_empty()) {
            return Err(BasketError::EmptyUniverse(
                "no eligible assets on any rebalance date".to_string(),
            ));
        }

        let snapshots = self.build_snapshots(&universes, &calendar)?;
        if snapshots.is_empty() {
            return Err(BasketError::EmptyUniverse(
                "no basket could be constructed on any rebalance date".to_string(),
            ));
        }
        let skipped = dates.len() - snapshots.len();
        if skipped > 0 {
            warn!("run {}: {} rebalance dates skipped", run_id, skipped);
        }

        let engine = BacktestEngine::new(self.config.backtest.clone());
        let output = engine.run(self.data, &snapshots)?;
        let summary = summarize(&output.daily);

        info!(
            "run {}: {} days simulated, final equity {:.4}",
            run_id,
            output.daily.len(),
            output.daily.last().map(|r| r.equity).unwrap_or(1.0)
        );

        Ok(PipelineResult {
            run_id,
            eligibility,
            snapshots,
            daily: output.daily,
            turnover: output.turnover,
            concentration: output.concentration,
            summary,
        })
    }

    fn build_snapshots(
        &self,
        universes: &[(NaiveDate, Vec<String>)],
        calendar: &[NaiveDate],
    ) -> Result<BTreeMap<NaiveDate, BasketSnapshot>> {
        let produced: Vec<Option<BasketSnapshot>> = match self.config.mode {
            BasketMode::TopN => universes
                .iter()
                .map(|(date, symbols)| self.top_n_snapshot(*date, symbols))
                .collect(),
            BasketMode::ClusterMatched => universes
                .par_iter()
                .map(|(date, symbols)| {
                    optimize_cluster_matched(
                        *date,
                        symbols,
                        self.data,
                        calendar,
                        &self.config.optimizer,
                        &self.config.cluster,
                    )
                })
                .collect(),
            BasketMode::MinVariance => {
                if self.config.optimizer.turnover_penalty > 0.0 {
                    // The turnover penalty couples each date to the previous
                    // snapshot, so this pass cannot fan out.
                    let mut out = Vec::with_capacity(universes.len());
                    let mut prev: Option<BTreeMap<String, f64>> = None;
                    for (date, symbols) in universes {
                        let snap = optimize_min_variance(
                            *date,
                            symbols,
                            self.data,
                            calendar,
                            prev.as_ref(),
                            &self.config.optimizer,
                        );
                        if let Some(s) = &snap {
                            prev = Some(s.weights.clone());
                        }
                        out.push(snap);
                    }
                    out
                } else {
                    universes
                        .par_iter()
                        .map(|(date, symbols)| {
                            optimize_min_variance(
                                *date,
                                symbols,
                                self.data,
                                calendar,
                                None,
                                &self.config.optimizer,
                            )
                        })
                        .collect()
                }
            }
        };

        Ok(produced
            .into_iter()
            .flatten()
            .map(|snap| (snap.rebalance_date, snap))
            .collect())
    }

    /// Long-only top-N basket: rank eligible assets by as-of market cap,
    /// weight the top N by the configured scheme with iterative capping.
    fn top_n_snapshot(&self, date: NaiveDate, symbols: &[String]) -> Option<BasketSnapshot> {
        if symbols.is_empty() {
            return None;
        }
        let mut ranked: Vec<(String, f64)> = symbols
            .iter()
            .filter_map(|s| {
                self.data
                    .market_caps
                    .asof(s, date)
                    .map(|(_, mcap)| (s.clone(), mcap))
            })
            .collect();
        ranked.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        ranked.truncate(self.config.top_n);
        if ranked.is_empty() {
            warn!("{}: no market caps for any eligible asset", date);
            return None;
        }

        let caps: BTreeMap<String, f64> = ranked.into_iter().collect();
        let weights = compute_weights(&caps, self.config.weighting, self.config.max_weight);
        Some(BasketSnapshot::from_weights(
            date,
            BasketKind::LongOnly,
            "top-n",
            weights,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::timeseries::DailySeries;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    /// A small universe with a numeraire and four healthy alts over
    /// 2023-24. The alts share one market wave but carry distinct drifts,
    /// so a persistent cross-sectional spread exists for the optimizer to
    /// find.
    fn fixture() -> (MarketData, ReferenceData) {
        let mut data = MarketData::default();
        let start = date(2023, 1, 1);
        let specs: [(&str, f64, f64, f64, f64); 5] = [
            ("BTC", 40_000.0, 8e11, 1e9, 0.0),
            ("AAA", 10.0, 4e9, 5e7, 0.002),
            ("BBB", 5.0, 2e9, 4e7, 0.001),
            ("CCC", 2.0, 1e9, 2e7, -0.001),
            ("DDD", 1.0, 5e8, 1e7, -0.002),
        ];
        for (symbol, base, mcap, volume, drift) in specs.iter() {
            let mut prices = DailySeries::new();
            let mut mcaps = DailySeries::new();
            let mut volumes = DailySeries::new();
            let mut price = *base;
            for i in 0..500_i64 {
                let wave = ((i as f64) * 0.21).sin() * 0.01;
                price *= 1.0 + wave + drift;
                let day = start + chrono::Duration::days(i);
                prices.insert(day, price);
                mcaps.insert(day, mcap * price / base);
                volumes.insert(day, *volume);
            }
            data.prices.insert_series(*symbol, prices);
            data.market_caps.insert_series(*symbol, mcaps);
            data.volumes.insert_series(*symbol, volumes);
        }
        let refs = ReferenceData::new("BTC");
        (data, refs)
    }

    fn base_config() -> PipelineConfig {
        PipelineConfig {
            schedule: ScheduleConfig {
                start: date(2023, 10, 1),
                end: date(2024, 4, 1),
                frequency: RebalanceFrequency::Monthly,
                day_of_month: 1,
            },
            eligibility: EligibilityConfig {
                min_market_cap: 1e8,
                min_liquidity: 1e6,
                ..Default::default()
            },
            mode: BasketMode::TopN,
            top_n: 3,
            weighting: WeightScheme::CapWeighted,
            max_weight: 0.6,
            optimizer: OptimizerConfig {
                max_weight: 0.6,
                portfolio_notional: 100_000.0,
                ..Default::default()
            },
            cluster: ClusterConfig {
                clusters: 2,
                leg_fraction: 0.5,
                ..Default::default()
            },
            backtest: BacktestConfig::default(),
        }
    }

    #[test]
    fn test_top_n_pipeline_end_to_end() {
        let (data, refs) = fixture();
        let result = BasketPipeline::new(&data, &refs, base_config())
            .run()
            .unwrap();

        assert_eq!(result.snapshots.len(), 7);
        for snap in result.snapshots.values() {
            assert!(snap.validate(0.0, 1e-6), "bad snapshot {:?}", snap.rebalance_date);
            assert!(snap.len() <= 3);
            assert!(!snap.weights.contains_key("BTC"));
        }
        assert!(!result.daily.is_empty());
        assert_eq!(result.turnover.len(), 7);
        assert!(result.daily.iter().all(|r| r.equity.is_finite()));
        assert_eq!(result.summary.days, result.daily.len());
    }

    #[test]
    fn test_snapshot_assets_are_eligible() {
        let (data, refs) = fixture();
        let result = BasketPipeline::new(&data, &refs, base_config())
            .run()
            .unwrap();
        for snap in result.snapshots.values() {
            for symbol in snap.weights.keys() {
                let record = result
                    .eligibility
                    .iter()
                    .find(|r| r.rebalance_date == snap.rebalance_date && &r.symbol == symbol)
                    .expect("eligibility record exists");
                assert!(record.eligible);
            }
        }
    }

    #[test]
    fn test_min_variance_pipeline_neutral_snapshots() {
        let (data, refs) = fixture();
        let mut config = base_config();
        config.mode = BasketMode::MinVariance;
        let result = BasketPipeline::new(&data, &refs, config).run().unwrap();
        for snap in result.snapshots.values() {
            assert_eq!(snap.kind, BasketKind::DollarNeutral);
            assert!(snap.net().abs() < 1e-6);
            assert!(snap.gross() <= 2.0 + 1e-6);
        }
    }

    #[test]
    fn test_parallel_matches_sequential() {
        let (data, refs) = fixture();
        let mut config = base_config();
        config.mode = BasketMode::MinVariance;
        let parallel = BasketPipeline::new(&data, &refs, config.clone())
            .run()
            .unwrap();

        // Force the sequential path with a vanishing turnover penalty: the
        // objective is unchanged up to solver tolerance.
        config.optimizer.turnover_penalty = 1e-12;
        let sequential = BasketPipeline::new(&data, &refs, config).run().unwrap();

        assert_eq!(parallel.snapshots.len(), sequential.snapshots.len());
        for (a, b) in parallel.snapshots.values().zip(sequential.snapshots.values()) {
            assert_eq!(a.rebalance_date, b.rebalance_date);
            for (symbol, w) in &a.weights {
                let other = b.weights.get(symbol).copied().unwrap_or(0.0);
                assert!((w - other).abs() < 1e-4, "{}: {} vs {}", symbol, w, other);
            }
        }
    }

    #[test]
    fn test_empty_universe_is_structural() {
        let (data, _) = fixture();
        // Denylist everything: no eligible assets on any date.
        let mut refs = ReferenceData::new("BTC");
        for symbol in ["AAA", "BBB", "CCC", "DDD"] {
            refs.denylist.insert(symbol.to_string());
        }
        let err = BasketPipeline::new(&data, &refs, base_config()).run();
        assert!(matches!(err, Err(BasketError::EmptyUniverse(_))));
    }

    #[test]
    fn test_empty_schedule_is_config_error() {
        let (data, refs) = fixture();
        let mut config = base_config();
        config.schedule.end = config.schedule.start - chrono::Duration::days(1);
        let err = BasketPipeline::new(&data, &refs, config).run();
        assert!(matches!(err, Err(BasketError::ConfigError(_))));
    }
}
