//! Configuration file support.
//!
//! Allows loading a full pipeline configuration from TOML for reproducible
//! runs. File values use human units (basis points, calendar dates as
//! strings); the conversion layer turns them into typed configs.

use crate::backtest::{BacktestConfig, QualityGateConfig};
use crate::cluster::ClusterConfig;
use crate::covariance::CovarianceConfig;
use crate::error::{BasketError, Result};
use crate::optimizer::OptimizerConfig;
use crate::pipeline::{BasketMode, PipelineConfig, ScheduleConfig};
use crate::schedule::RebalanceFrequency;
use crate::types::{GapFillMode, MissingPricePolicy, WeightScheme};
use crate::universe::EligibilityConfig;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use tracing::info;

/// Complete pipeline configuration loaded from a file.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct PipelineFileConfig {
    pub schedule: ScheduleSettings,
    #[serde(default)]
    pub universe: UniverseSettings,
    #[serde(default)]
    pub basket: BasketSettings,
    #[serde(default)]
    pub optimizer: OptimizerSettings,
    #[serde(default)]
    pub cluster: ClusterSettings,
    #[serde(default)]
    pub costs: CostSettings,
    #[serde(default)]
    pub backtest: BacktestSettings,
}

/// Rebalance schedule settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleSettings {
    /// Start date (YYYY-MM-DD).
    pub start: String,
    /// End date (YYYY-MM-DD).
    pub end: String,
    #[serde(default)]
    pub frequency: RebalanceFrequency,
    #[serde(default = "default_day_of_month")]
    pub day_of_month: u32,
}

fn default_day_of_month() -> u32 { 1 }

impl Default for ScheduleSettings {
    fn default() -> Self {
        Self {
            start: "2023-01-01".to_string(),
            end: "2024-01-01".to_string(),
            frequency: RebalanceFrequency::Monthly,
            day_of_month: 1,
        }
    }
}

/// Universe eligibility settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UniverseSettings {
    #[serde(default = "default_min_age")]
    pub min_listing_age_days: i64,
    #[serde(default = "default_min_market_cap")]
    pub min_market_cap: f64,
    #[serde(default = "default_min_liquidity")]
    pub min_liquidity: f64,
    #[serde(default = "default_liquidity_window")]
    pub liquidity_window_days: i64,
    #[serde(default = "default_true")]
    pub require_price: bool,
    #[serde(default = "default_true")]
    pub require_volume: bool,
    #[serde(default = "default_true")]
    pub require_market_cap: bool,
    #[serde(default = "default_true")]
    pub enforce_venue_listing: bool,
}

fn default_min_age() -> i64 { 180 }
fn default_min_market_cap() -> f64 { 50_000_000.0 }
fn default_min_liquidity() -> f64 { 1_000_000.0 }
fn default_liquidity_window() -> i64 { 14 }
fn default_true() -> bool { true }

impl Default for UniverseSettings {
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

/// Basket construction settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BasketSettings {
    #[serde(default)]
    pub mode: BasketMode,
    #[serde(default = "default_top_n")]
    pub top_n: usize,
    #[serde(default)]
    pub weighting: WeightScheme,
    #[serde(default = "default_max_weight")]
    pub max_weight: f64,
}

fn default_top_n() -> usize { 20 }
fn default_max_weight() -> f64 { 0.30 }

impl Default for BasketSettings {
    fn default() -> Self {
        Self {
            mode: BasketMode::TopN,
            top_n: 20,
            weighting: WeightScheme::CapWeighted,
            max_weight: 0.30,
        }
    }
}

/// Method A optimizer settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OptimizerSettings {
    #[serde(default = "default_gross_cap")]
    pub gross_cap: f64,
    #[serde(default = "default_opt_max_weight")]
    pub max_weight: f64,
    #[serde(default = "default_cvar_alpha")]
    pub cvar_alpha: f64,
    #[serde(default = "default_cvar_level")]
    pub cvar_level: f64,
    #[serde(default)]
    pub turnover_penalty: f64,
    /// Factor-neutrality band; omit to disable the constraint.
    pub factor_epsilon: Option<f64>,
    #[serde(default = "default_participation")]
    pub max_participation: f64,
    #[serde(default = "default_notional")]
    pub portfolio_notional: f64,
    #[serde(default = "default_cov_lookback")]
    pub covariance_lookback_days: usize,
    #[serde(default = "default_cov_fallback")]
    pub covariance_fallback_days: usize,
    #[serde(default = "default_shrinkage")]
    pub shrinkage: f64,
}

fn default_gross_cap() -> f64 { 2.0 }
fn default_opt_max_weight() -> f64 { 0.10 }
fn default_cvar_alpha() -> f64 { 1.0 }
fn default_cvar_level() -> f64 { 0.05 }
fn default_participation() -> f64 { 0.05 }
fn default_notional() -> f64 { 1_000_000.0 }
fn default_cov_lookback() -> usize { 90 }
fn default_cov_fallback() -> usize { 60 }
fn default_shrinkage() -> f64 { 0.2 }

impl Default for OptimizerSettings {
    fn default() -> Self {
        Self {
            gross_cap: 2.0,
            max_weight: 0.10,
            cvar_alpha: 1.0,
            cvar_level: 0.05,
            turnover_penalty: 0.0,
            factor_epsilon: None,
            max_participation: 0.05,
            portfolio_notional: 1_000_000.0,
            covariance_lookback_days: 90,
            covariance_fallback_days: 60,
            shrinkage: 0.2,
        }
    }
}

/// Method B cluster settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterSettings {
    #[serde(default = "default_clusters")]
    pub clusters: usize,
    #[serde(default = "default_leg_fraction")]
    pub leg_fraction: f64,
    #[serde(default = "default_signal_lookback")]
    pub signal_lookback_days: i64,
}

fn default_clusters() -> usize { 5 }
fn default_leg_fraction() -> f64 { 0.2 }
fn default_signal_lookback() -> i64 { 30 }

impl Default for ClusterSettings {
    fn default() -> Self {
        Self {
            clusters: 5,
            leg_fraction: 0.2,
            signal_lookback_days: 30,
        }
    }
}

/// Cost model settings, in basis points of turnover.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CostSettings {
    #[serde(default = "default_fee_bps")]
    pub fee_bps: f64,
    #[serde(default = "default_slippage_bps")]
    pub slippage_bps: f64,
}

fn default_fee_bps() -> f64 { 10.0 }
fn default_slippage_bps() -> f64 { 5.0 }

impl Default for CostSettings {
    fn default() -> Self {
        Self {
            fee_bps: 10.0,
            slippage_bps: 5.0,
        }
    }
}

/// Backtest data-quality settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BacktestSettings {
    #[serde(default = "default_numeraire")]
    pub numeraire: String,
    #[serde(default = "default_coverage")]
    pub coverage_threshold: f64,
    #[serde(default)]
    pub missing_price_policy: MissingPricePolicy,
    #[serde(default)]
    pub gap_fill: GapFillMode,
    /// Enable the per-asset-per-day quality gate.
    #[serde(default)]
    pub quality_gate: bool,
    #[serde(default = "default_gate_lookback")]
    pub quality_lookback_days: usize,
    #[serde(default = "default_gate_history")]
    pub min_history_days: usize,
    #[serde(default = "default_gate_missing")]
    pub max_missing_fraction: f64,
    #[serde(default = "default_gate_run")]
    pub max_consecutive_missing: usize,
    #[serde(default)]
    pub show_progress: bool,
}

fn default_numeraire() -> String { "BTC".to_string() }
fn default_coverage() -> f64 { 0.8 }
fn default_gate_lookback() -> usize { 30 }
fn default_gate_history() -> usize { 20 }
fn default_gate_missing() -> f64 { 0.3 }
fn default_gate_run() -> usize { 5 }

impl Default for BacktestSettings {
    fn default() -> Self {
        Self {
            numeraire: "BTC".to_string(),
            coverage_threshold: 0.8,
            missing_price_policy: MissingPricePolicy::default(),
            gap_fill: GapFillMode::default(),
            quality_gate: false,
            quality_lookback_days: 30,
            min_history_days: 20,
            max_missing_fraction: 0.3,
            max_consecutive_missing: 5,
            show_progress: false,
        }
    }
}

impl PipelineFileConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        info!("loading configuration from {}", path.display());
        let content = fs::read_to_string(path)?;
        let config: PipelineFileConfig = toml::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to a TOML file.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| BasketError::ConfigError(e.to_string()))?;
        fs::write(path, content)?;
        Ok(())
    }

    /// Convert to the typed pipeline configuration.
    pub fn to_pipeline_config(&self) -> Result<PipelineConfig> {
        let parse_date = |s: &str| {
            NaiveDate::parse_from_str(s, "%Y-%m-%d").map_err(|e| {
                BasketError::ConfigError(format!("invalid date '{}': {}", s, e))
            })
        };

        let quality_gate = if self.backtest.quality_gate {
            Some(QualityGateConfig {
                lookback_days: self.backtest.quality_lookback_days,
                min_history_days: self.backtest.min_history_days,
                max_missing_fraction: self.backtest.max_missing_fraction,
                max_consecutive_missing: self.backtest.max_consecutive_missing,
            })
        } else {
            None
        };

        Ok(PipelineConfig {
            schedule: ScheduleConfig {
                start: parse_date(&self.schedule.start)?,
                end: parse_date(&self.schedule.end)?,
                frequency: self.schedule.frequency,
                day_of_month: self.schedule.day_of_month,
            },
            eligibility: EligibilityConfig {
                min_listing_age_days: self.universe.min_listing_age_days,
                min_market_cap: self.universe.min_market_cap,
                min_liquidity: self.universe.min_liquidity,
                liquidity_window_days: self.universe.liquidity_window_days,
                require_price: self.universe.require_price,
                require_volume: self.universe.require_volume,
                require_market_cap: self.universe.require_market_cap,
                enforce_venue_listing: self.universe.enforce_venue_listing,
            },
            mode: self.basket.mode,
            top_n: self.basket.top_n,
            weighting: self.basket.weighting,
            max_weight: self.basket.max_weight,
            optimizer: OptimizerConfig {
                gross_cap: self.optimizer.gross_cap,
                max_weight: self.optimizer.max_weight,
                cvar_alpha: self.optimizer.cvar_alpha,
                cvar_level: self.optimizer.cvar_level,
                turnover_penalty: self.optimizer.turnover_penalty,
                factor_epsilon: self.optimizer.factor_epsilon,
                max_participation: self.optimizer.max_participation,
                portfolio_notional: self.optimizer.portfolio_notional,
                liquidity_window_days: self.universe.liquidity_window_days,
                covariance: CovarianceConfig {
                    lookback_days: self.optimizer.covariance_lookback_days,
                    fallback_lookback_days: self.optimizer.covariance_fallback_days,
                    shrinkage: self.optimizer.shrinkage,
                    ..Default::default()
                },
            },
            cluster: ClusterConfig {
                clusters: self.cluster.clusters,
                leg_fraction: self.cluster.leg_fraction,
                signal_lookback_days: self.cluster.signal_lookback_days,
            },
            backtest: BacktestConfig {
                numeraire: self.backtest.numeraire.clone(),
                fee_bps: self.costs.fee_bps,
                slippage_bps: self.costs.slippage_bps,
                coverage_threshold: self.backtest.coverage_threshold,
                missing_price_policy: self.backtest.missing_price_policy,
                gap_fill: self.backtest.gap_fill,
                quality_gate,
                show_progress: self.backtest.show_progress,
                start: None,
                end: None,
            },
        })
    }

    /// Generate an example configuration file.
    pub fn example() -> String {
        r#"# Basket pipeline configuration

[schedule]
start = "2023-01-01"
end = "2024-06-01"
frequency = "monthly"
day_of_month = 1

[universe]
min_listing_age_days = 180
min_market_cap = 50000000.0
min_liquidity = 1000000.0
liquidity_window_days = 14
enforce_venue_listing = true

[basket]
# "top-n", "min-variance" or "cluster-matched"
mode = "min-variance"
top_n = 20
weighting = "cap-weighted"
max_weight = 0.30

[optimizer]
gross_cap = 2.0
max_weight = 0.10
cvar_alpha = 1.0
cvar_level = 0.05
turnover_penalty = 0.0
# factor_epsilon = 0.01
max_participation = 0.05
portfolio_notional = 1000000.0
covariance_lookback_days = 90
shrinkage = 0.2

[cluster]
clusters = 5
leg_fraction = 0.2
signal_lookback_days = 30

[costs]
fee_bps = 10.0
slippage_bps = 5.0

[backtest]
numeraire = "BTC"
coverage_threshold = 0.8
# "nan", "renormalize" or "conservative-zero"
missing_price_policy = "conservative-zero"
# "none" or "single-day"
gap_fill = "single-day"
quality_gate = false
"#
        .to_string()
    }
}
