//! Wicker - point-in-time basket construction and backtesting.
//!
//! # Overview
//!
//! Wicker builds tradable baskets (long-only or dollar-neutral portfolios)
//! from a daily asset universe and evaluates their historical performance
//! with exact no-lookahead semantics:
//!
//! - **Point-in-time eligibility**: as-of joins against reference data,
//!   fixed-precedence exclusion reasons, trailing liquidity screens
//! - **Portfolio construction**: cap/sqrt-cap/equal weighting with
//!   iterative capping, a constrained minimum-variance optimizer with CVaR
//!   and turnover penalties, and a cluster-matched pairs alternative
//! - **Backtesting**: day-by-day simulation with turnover/cost accounting,
//!   configurable missing-data policies and concentration reporting
//! - **Deterministic batch runs**: seeded randomness, ordered weight maps,
//!   reproducible TOML configuration
//!
//! The crate is the computational core of a basket research system: market
//! data ingestion and report rendering live in the surrounding layers,
//! which hand in clean per-asset daily price/market-cap/volume series and
//! consume the tables this core emits.
//!
//! # Quick Start
//!
//! ```no_run
//! use wicker::pipeline::{BasketPipeline, PipelineConfig};
//! use wicker::universe::{MarketData, ReferenceData};
//! use wicker::config::PipelineFileConfig;
//!
//! let data = MarketData::default(); // filled by your ingestion layer
//! let refs = ReferenceData::new("BTC");
//! let config: PipelineConfig = PipelineFileConfig::load("wicker.toml")
//!     .and_then(|c| c.to_pipeline_config())
//!     .unwrap();
//!
//! let result = BasketPipeline::new(&data, &refs, config).run().unwrap();
//! println!("final equity: {:.4}", result.daily.last().unwrap().equity);
//! println!("sharpe: {:.2}", result.summary.sharpe_ratio);
//! ```
//!
//! # Modules
//!
//! - [`types`]: emitted record types (eligibility, snapshots, daily records)
//! - [`timeseries`]: sparse daily series and the shared as-of lookup
//! - [`schedule`]: rebalance date generation
//! - [`universe`]: point-in-time eligibility filtering
//! - [`weights`]: weighting schemes and iterative capping
//! - [`covariance`]: shrinkage covariance and the leading factor
//! - [`optimizer`]: constrained minimum-variance QP (Method A)
//! - [`cluster`]: cluster-matched pair baskets (Method B)
//! - [`explore`]: selection-variant research harness
//! - [`backtest`]: the simulation engine
//! - [`analytics`]: performance summary metrics
//! - [`pipeline`]: end-to-end orchestration
//! - [`config`]: TOML configuration files
//! - [`export`]: CSV/JSON table export

pub mod analytics;
pub mod backtest;
pub mod cluster;
pub mod config;
pub mod covariance;
pub mod error;
pub mod explore;
pub mod export;
pub mod optimizer;
pub mod pipeline;
pub mod schedule;
pub mod timeseries;
pub mod types;
pub mod universe;
pub mod weights;

// Re-exports for convenience
pub use analytics::{summarize, PerformanceSummary};
pub use backtest::{
    calculate_turnover, BacktestConfig, BacktestEngine, BacktestOutput, ConcentrationReport,
    QualityGateConfig,
};
pub use cluster::{agglomerative_clusters, optimize_cluster_matched, ClusterConfig};
pub use config::PipelineFileConfig;
pub use covariance::{estimate_covariance, CovarianceConfig, CovarianceEstimate, CovarianceMatrix};
pub use error::{BasketError, Result};
pub use explore::{run_exploration, ExploreConfig, SelectionHeuristic, VariantRow};
pub use optimizer::{
    optimize_min_variance, solve_qp, OptimizerConfig, QpProblem, SolverStrategy,
};
pub use pipeline::{BasketMode, BasketPipeline, PipelineConfig, PipelineResult, ScheduleConfig};
pub use schedule::{rebalance_dates, RebalanceFrequency};
pub use timeseries::{AssetTable, DailySeries};
pub use types::{
    BacktestDailyRecord, BasketKind, BasketSnapshot, EligibilityRecord, ExclusionReason,
    GapFillMode, MissingPricePolicy, RebalanceTurnoverRecord, WeightScheme,
};
pub use universe::{
    evaluate_universe, EligibilityConfig, MarketData, ReferenceData,
};
pub use weights::{apply_iterative_cap, compute_weights};
