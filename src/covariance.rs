//! Shrinkage covariance estimation over a trailing window.
//!
//! Sample covariance is blended toward a scaled-identity target to reduce
//! estimation noise; the result stays positive semi-definite by
//! construction. The estimator also exposes the aligned daily-return rows
//! (CVaR scenarios for the optimizer) and the leading eigenvector used for
//! factor-neutrality constraints.

use crate::error::{BasketError, Result};
use crate::timeseries::AssetTable;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CovarianceConfig {
    /// Trailing window in trading days.
    pub lookback_days: usize,
    /// Shorter window tried when the primary window is too sparse.
    pub fallback_lookback_days: usize,
    /// Joint-observation count below which the fallback window is used.
    pub min_joint_observations: usize,
    /// Linear shrinkage intensity toward the scaled-identity target, in [0, 1].
    pub shrinkage: f64,
}

impl Default for CovarianceConfig {
    fn default() -> Self {
        Self {
            lookback_days: 90,
            fallback_lookback_days: 60,
            min_joint_observations: 30,
            shrinkage: 0.2,
        }
    }
}

/// A shrinkage covariance matrix with its asset ordering.
///
/// Callers must index against `symbols`, not their own asset order.
#[derive(Debug, Clone, PartialEq)]
pub struct CovarianceMatrix {
    pub symbols: Vec<String>,
    pub matrix: Vec<Vec<f64>>,
    /// Joint observations the estimate is based on.
    pub observations: usize,
}

impl CovarianceMatrix {
    pub fn len(&self) -> usize {
        self.symbols.len()
    }

    pub fn is_empty(&self) -> bool {
        self.symbols.is_empty()
    }

    pub fn index_of(&self, symbol: &str) -> Option<usize> {
        self.symbols.iter().position(|s| s == symbol)
    }

    /// Per-asset daily volatility (sqrt of the diagonal).
    pub fn volatilities(&self) -> Vec<f64> {
        (0..self.len()).map(|i| self.matrix[i][i].max(0.0).sqrt()).collect()
    }

    /// Portfolio variance w' Sigma w for a weight map keyed by symbol.
    /// Symbols absent from the matrix contribute nothing.
    pub fn portfolio_variance(&self, weights: &BTreeMap<String, f64>) -> f64 {
        let w: Vec<f64> = self
            .symbols
            .iter()
            .map(|s| weights.get(s).copied().unwrap_or(0.0))
            .collect();
        let mut variance = 0.0;
        for i in 0..self.len() {
            for j in 0..self.len() {
                variance += w[i] * self.matrix[i][j] * w[j];
            }
        }
        variance
    }

    /// Correlation matrix derived from the covariance. Zero-variance assets
    /// get zero off-diagonal correlation.
    pub fn correlation(&self) -> Vec<Vec<f64>> {
        let n = self.len();
        let vols = self.volatilities();
        let mut corr = vec![vec![0.0; n]; n];
        for i in 0..n {
            for j in 0..n {
                if i == j {
                    corr[i][j] = 1.0;
                } else if vols[i] > 1e-12 && vols[j] > 1e-12 {
                    corr[i][j] = (self.matrix[i][j] / (vols[i] * vols[j])).clamp(-1.0, 1.0);
                }
            }
        }
        corr
    }

    /// Leading eigenvector (first principal factor) via power iteration.
    ///
    /// Deterministic: fixed start vector, fixed iteration and tolerance
    /// bounds. The returned vector is unit length with its largest-magnitude
    /// component made positive so the sign convention is stable.
    pub fn leading_eigenvector(&self) -> Vec<f64> {
        let n = self.len();
        if n == 0 {
            return Vec::new();
        }
        let mut v = vec![1.0 / (n as f64).sqrt(); n];
        for _ in 0..200 {
            let mut next = vec![0.0; n];
            for i in 0..n {
                for j in 0..n {
                    next[i] += self.matrix[i][j] * v[j];
                }
            }
            let norm: f64 = next.iter().map(|x| x * x).sum::<f64>().sqrt();
            if norm < 1e-14 {
                // Degenerate matrix: any unit vector is an eigenvector.
                return v;
            }
            for x in &mut next {
                *x /= norm;
            }
            let delta: f64 = next
                .iter()
                .zip(v.iter())
                .map(|(a, b)| (a - b).abs())
                .fold(0.0, f64::max);
            v = next;
            if delta < 1e-10 {
                break;
            }
        }
        // Stabilize sign on the dominant component.
        let dominant = v
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.abs().partial_cmp(&b.1.abs()).unwrap())
            .map(|(i, _)| i)
            .unwrap_or(0);
        if v[dominant] < 0.0 {
            for x in &mut v {
                *x = -*x;
            }
        }
        v
    }
}

/// Covariance matrix plus the aligned daily-return rows it was estimated
/// from. `scenarios[s][i]` is the return of asset `i` (in `cov.symbols`
/// order) on joint observation `s`.
#[derive(Debug, Clone, PartialEq)]
pub struct CovarianceEstimate {
    pub cov: CovarianceMatrix,
    pub scenarios: Vec<Vec<f64>>,
    /// Lookback actually used (primary or fallback).
    pub window_days: usize,
}

/// Joint daily returns for `symbols` over the trailing `lookback` trading
/// days ending at `date`. A day contributes only when every symbol has a
/// price both that day and the prior trading day.
fn joint_returns(
    prices: &AssetTable,
    symbols: &[String],
    calendar: &[NaiveDate],
    date: NaiveDate,
    lookback: usize,
) -> Vec<Vec<f64>> {
    let end = calendar.partition_point(|d| *d <= date);
    let start = end.saturating_sub(lookback + 1);
    let window = &calendar[start..end];

    let mut rows = Vec::new();
    for pair in window.windows(2) {
        let (prev, day) = (pair[0], pair[1]);
        let mut row = Vec::with_capacity(symbols.len());
        let mut complete = true;
        for symbol in symbols {
            match (prices.at(symbol, prev), prices.at(symbol, day)) {
                (Some(p), Some(c)) if p > 0.0 => row.push(c / p - 1.0),
                _ => {
                    complete = false;
                    break;
                }
            }
        }
        if complete {
            rows.push(row);
        }
    }
    rows
}

/// Estimate the shrinkage covariance for `symbols` as of `date`.
///
/// Tries the primary lookback first; if fewer than
/// `min_joint_observations` joint rows remain, retries with the fallback
/// window. Fails when fewer than two joint observations survive; callers
/// fall back to simpler heuristics per the error-handling design.
pub fn estimate_covariance(
    prices: &AssetTable,
    symbols: &[String],
    calendar: &[NaiveDate],
    date: NaiveDate,
    config: &CovarianceConfig,
) -> Result<CovarianceEstimate> {
    if symbols.len() < 2 {
        return Err(BasketError::InvalidInput(
            "covariance needs at least two assets".to_string(),
        ));
    }

    let mut window_days = config.lookback_days;
    let mut rows = joint_returns(prices, symbols, calendar, date, window_days);
    if rows.len() < config.min_joint_observations {
        debug!(
            "{}: {} joint observations in {}d window, falling back to {}d",
            date,
            rows.len(),
            config.lookback_days,
            config.fallback_lookback_days
        );
        window_days = config.fallback_lookback_days;
        rows = joint_returns(prices, symbols, calendar, date, window_days);
    }

    let n_obs = rows.len();
    if n_obs < 2 {
        return Err(BasketError::DataError(format!(
            "{}: only {} joint observations for covariance",
            date, n_obs
        )));
    }

    let n = symbols.len();
    let means: Vec<f64> = (0..n)
        .map(|i| rows.iter().map(|r| r[i]).sum::<f64>() / n_obs as f64)
        .collect();

    let mut sample = vec![vec![0.0; n]; n];
    for (i, sample_row) in sample.iter_mut().enumerate() {
        for (j, cell) in sample_row.iter_mut().enumerate() {
            *cell = rows
                .iter()
                .map(|r| (r[i] - means[i]) * (r[j] - means[j]))
                .sum::<f64>()
                / (n_obs - 1) as f64;
        }
    }

    // Shrink toward mean-variance * identity.
    let delta = config.shrinkage.clamp(0.0, 1.0);
    let mean_var = (0..n).map(|i| sample[i][i]).sum::<f64>() / n as f64;
    let mut matrix = vec![vec![0.0; n]; n];
    for i in 0..n {
        for j in 0..n {
            let target = if i == j { mean_var } else { 0.0 };
            matrix[i][j] = (1.0 - delta) * sample[i][j] + delta * target;
        }
    }

    Ok(CovarianceEstimate {
        cov: CovarianceMatrix {
            symbols: symbols.to_vec(),
            matrix,
            observations: n_obs,
        },
        scenarios: rows,
        window_days,
    })
}
