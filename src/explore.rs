//! Selection-variant exploration harness.
//!
//! A library of deterministic heuristics each proposes a fixed-size
//! long/short candidate set; every candidate is weighted two ways (naive
//! equal weight and constrained minimum variance) and the variants are
//! ranked by realized volatility over the trailing scenario window. This is
//! a research surface, not the production basket path; it reuses the same
//! covariance and solver contracts.

use crate::cluster::trailing_return_signal;
use crate::covariance::{estimate_covariance, CovarianceEstimate};
use crate::error::{BasketError, Result};
use crate::optimizer::{solve_qp, OptimizerConfig, QpProblem};
use crate::universe::MarketData;
use chrono::NaiveDate;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// The selection heuristics in the exploration library.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SelectionHeuristic {
    /// Most-correlated pairs, long the laggard and short the leader.
    CorrelationPairs,
    /// Long the lowest-volatility assets, short the highest.
    VolatilityRank,
    /// Greedy pair addition minimizing equal-weight portfolio variance.
    GreedyMinVariance,
    /// Long the lowest leading-factor loadings, short the highest.
    FactorLoadingRank,
    /// Seeded random search over leg assignments, keeping the calmest.
    RandomizedDiversification,
    /// Long the best trailing returns, short the worst.
    MomentumRank,
}

impl SelectionHeuristic {
    pub const ALL: [SelectionHeuristic; 6] = [
        Self::CorrelationPairs,
        Self::VolatilityRank,
        Self::GreedyMinVariance,
        Self::FactorLoadingRank,
        Self::RandomizedDiversification,
        Self::MomentumRank,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CorrelationPairs => "correlation-pairs",
            Self::VolatilityRank => "volatility-rank",
            Self::GreedyMinVariance => "greedy-min-variance",
            Self::FactorLoadingRank => "factor-loading-rank",
            Self::RandomizedDiversification => "randomized-diversification",
            Self::MomentumRank => "momentum-rank",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExploreConfig {
    /// Assets per leg in every candidate set.
    pub leg_size: usize,
    /// Random leg assignments evaluated by the randomized search.
    pub random_candidates: usize,
    /// Seed for the randomized search; fixed seed, fixed output.
    pub seed: u64,
}

impl Default for ExploreConfig {
    fn default() -> Self {
        Self {
            leg_size: 3,
            random_candidates: 64,
            seed: 7,
        }
    }
}

/// One row of the comparison matrix.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VariantRow {
    pub heuristic: String,
    pub weighting: String,
    /// Daily volatility of the candidate portfolio over the trailing
    /// scenario window.
    pub realized_volatility: f64,
    pub gross: f64,
    pub net: f64,
    pub constituents: usize,
}

/// A candidate long/short selection as indices into the symbol order.
struct Candidate {
    heuristic: SelectionHeuristic,
    longs: Vec<usize>,
    shorts: Vec<usize>,
}

fn equal_weight_vector(n: usize, longs: &[usize], shorts: &[usize]) -> Vec<f64> {
    let mut w = vec![0.0; n];
    let per = 1.0 / (2.0 * longs.len() as f64);
    for &i in longs {
        w[i] = per;
    }
    for &i in shorts {
        w[i] = -per;
    }
    w
}

fn portfolio_variance(sigma: &[Vec<f64>], w: &[f64]) -> f64 {
    let n = w.len();
    let mut var = 0.0;
    for i in 0..n {
        if w[i] == 0.0 {
            continue;
        }
        for j in 0..n {
            var += w[i] * sigma[i][j] * w[j];
        }
    }
    var
}

fn scenario_volatility(scenarios: &[Vec<f64>], w: &[f64]) -> f64 {
    if scenarios.len() < 2 {
        return f64::NAN;
    }
    let returns: Vec<f64> = scenarios
        .iter()
        .map(|row| row.iter().zip(w.iter()).map(|(r, x)| r * x).sum())
        .collect();
    let mean = returns.iter().sum::<f64>() / returns.len() as f64;
    let var = returns.iter().map(|r| (r - mean).powi(2)).sum::<f64>()
        / (returns.len() - 1) as f64;
    var.sqrt()
}

fn correlation_pairs(corr: &[Vec<f64>], signals: &[f64], leg: usize) -> (Vec<usize>, Vec<usize>) {
    let n = corr.len();
    let mut used = vec![false; n];
    let mut longs = Vec::new();
    let mut shorts = Vec::new();
    while longs.len() < leg {
        let mut best = None;
        let mut best_corr = f64::NEG_INFINITY;
        for i in 0..n {
            for j in (i + 1)..n {
                if !used[i] && !used[j] && corr[i][j] > best_corr {
                    best_corr = corr[i][j];
                    best = Some((i, j));
                }
            }
        }
        let Some((i, j)) = best else { break };
        used[i] = true;
        used[j] = true;
        // Mean reversion within the pair: lag long, leader short.
        if signals[i] <= signals[j] {
            longs.push(i);
            shorts.push(j);
        } else {
            longs.push(j);
            shorts.push(i);
        }
    }
    (longs, shorts)
}

fn rank_split(scores: &[f64], leg: usize) -> (Vec<usize>, Vec<usize>) {
    let mut order: Vec<usize> = (0..scores.len()).collect();
    order.sort_by(|&a, &b| {
        scores[a]
            .partial_cmp(&scores[b])
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    let longs = order[..leg].to_vec();
    let shorts = order[order.len() - leg..].to_vec();
    (longs, shorts)
}

fn greedy_min_variance(sigma: &[Vec<f64>], leg: usize) -> (Vec<usize>, Vec<usize>) {
    let n = sigma.len();
    let mut longs: Vec<usize> = Vec::new();
    let mut shorts: Vec<usize> = Vec::new();
    let mut used = vec![false; n];
    for _ in 0..leg {
        let mut best = None;
        let mut best_var = f64::INFINITY;
        for i in 0..n {
            if used[i] {
                continue;
            }
            for j in 0..n {
                if used[j] || i == j {
                    continue;
                }
                longs.push(i);
                shorts.push(j);
                let w = equal_weight_vector(n, &longs, &shorts);
                let var = portfolio_variance(sigma, &w);
                longs.pop();
                shorts.pop();
                if var < best_var {
                    best_var = var;
                    best = Some((i, j));
                }
            }
        }
        let Some((i, j)) = best else { break };
        used[i] = true;
        used[j] = true;
        longs.push(i);
        shorts.push(j);
    }
    (longs, shorts)
}

fn randomized_diversification(
    sigma: &[Vec<f64>],
    leg: usize,
    tries: usize,
    seed: u64,
) -> (Vec<usize>, Vec<usize>) {
    let n = sigma.len();
    let mut rng = StdRng::seed_from_u64(seed);
    let mut best: Option<(Vec<usize>, Vec<usize>)> = None;
    let mut best_var = f64::INFINITY;
    let mut indices: Vec<usize> = (0..n).collect();
    for _ in 0..tries {
        indices.shuffle(&mut rng);
        let longs = indices[..leg].to_vec();
        let shorts = indices[leg..2 * leg].to_vec();
        let w = equal_weight_vector(n, &longs, &shorts);
        let var = portfolio_variance(sigma, &w);
        if var < best_var {
            best_var = var;
            best = Some((longs, shorts));
        }
    }
    best.unwrap_or((Vec::new(), Vec::new()))
}

/// Weight a candidate with constrained minimum variance: signs fixed by
/// leg, half the gross budget pinned on each side.
fn min_variance_weights(
    estimate: &CovarianceEstimate,
    candidate: &Candidate,
    max_weight: f64,
) -> Result<Vec<f64>> {
    let n = estimate.cov.symbols.len();
    let mut lb = vec![0.0; n];
    let mut ub = vec![0.0; n];
    // Leave headroom above budget/leg so the leg equality stays strictly
    // feasible.
    let cap = max_weight.max(0.6 / candidate.longs.len() as f64);
    for &i in &candidate.longs {
        ub[i] = cap;
    }
    for &i in &candidate.shorts {
        lb[i] = -cap;
    }
    let problem = QpProblem {
        symbols: estimate.cov.symbols.clone(),
        sigma: estimate.cov.matrix.clone(),
        scenarios: Vec::new(),
        prev_weights: None,
        lb,
        ub,
        gross_cap: 1.0,
        cvar_alpha: 0.0,
        cvar_level: 0.05,
        turnover_penalty: 0.0,
        factor: None,
        leg_budgets: Some((candidate.longs.clone(), candidate.shorts.clone(), 1.0)),
    };
    solve_qp(&problem)
}

/// Run the exploration harness for one date over the eligible universe.
///
/// Returns the comparison matrix sorted by realized volatility, calmest
/// first.
pub fn run_exploration(
    date: NaiveDate,
    eligible: &[String],
    data: &MarketData,
    calendar: &[NaiveDate],
    optimizer: &OptimizerConfig,
    config: &ExploreConfig,
) -> Result<Vec<VariantRow>> {
    let n = eligible.len();
    let leg = config.leg_size.min(n / 2);
    if leg == 0 {
        return Err(BasketError::InvalidInput(format!(
            "exploration needs at least two assets, got {}",
            n
        )));
    }

    let estimate = estimate_covariance(
        &data.prices,
        eligible,
        calendar,
        date,
        &optimizer.covariance,
    )?;
    let corr = estimate.cov.correlation();
    let vols = estimate.cov.volatilities();
    let loadings = estimate.cov.leading_eigenvector();
    let signals: Vec<f64> = eligible
        .iter()
        .map(|s| trailing_return_signal(data, s, date, 30).unwrap_or(0.0))
        .collect();

    let mut candidates = Vec::new();
    for heuristic in SelectionHeuristic::ALL {
        let (longs, shorts) = match heuristic {
            SelectionHeuristic::CorrelationPairs => correlation_pairs(&corr, &signals, leg),
            SelectionHeuristic::VolatilityRank => rank_split(&vols, leg),
            SelectionHeuristic::GreedyMinVariance => {
                greedy_min_variance(&estimate.cov.matrix, leg)
            }
            SelectionHeuristic::FactorLoadingRank => rank_split(&loadings, leg),
            SelectionHeuristic::RandomizedDiversification => randomized_diversification(
                &estimate.cov.matrix,
                leg,
                config.random_candidates,
                config.seed,
            ),
            SelectionHeuristic::MomentumRank => {
                // rank_split longs the lowest scores; momentum wants the
                // highest, so flip the sign.
                let flipped: Vec<f64> = signals.iter().map(|s| -s).collect();
                rank_split(&flipped, leg)
            }
        };
        if longs.is_empty() || longs.len() != shorts.len() {
            debug!("{}: heuristic {} produced no candidate", date, heuristic.as_str());
            continue;
        }
        candidates.push(Candidate {
            heuristic,
            longs,
            shorts,
        });
    }

    let mut rows = Vec::new();
    for candidate in &candidates {
        let equal = equal_weight_vector(n, &candidate.longs, &candidate.shorts);
        rows.push(variant_row(candidate, "equal", &equal, &estimate));

        match min_variance_weights(&estimate, candidate, optimizer.max_weight) {
            Ok(w) => rows.push(variant_row(candidate, "min-variance", &w, &estimate)),
            Err(e) => debug!(
                "{}: min-variance weighting failed for {} ({})",
                date,
                candidate.heuristic.as_str(),
                e
            ),
        }
    }

    rows.sort_by(|a, b| {
        a.realized_volatility
            .partial_cmp(&b.realized_volatility)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    Ok(rows)
}

fn variant_row(
    candidate: &Candidate,
    weighting: &str,
    w: &[f64],
    estimate: &CovarianceEstimate,
) -> VariantRow {
    VariantRow {
        heuristic: candidate.heuristic.as_str().to_string(),
        weighting: weighting.to_string(),
        realized_volatility: scenario_volatility(&estimate.scenarios, w),
        gross: w.iter().map(|x| x.abs()).sum(),
        net: w.iter().sum(),
        constituents: w.iter().filter(|x| **x != 0.0).count(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::timeseries::DailySeries;

    fn date(d: i64) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, 1).unwrap() + chrono::Duration::days(d)
    }

    fn market(days: i64, assets: usize) -> (MarketData, Vec<String>, Vec<NaiveDate>) {
        let mut data = MarketData::default();
        let symbols: Vec<String> = (0..assets).map(|i| format!("A{:02}", i)).collect();
        for (k, symbol) in symbols.iter().enumerate() {
            let mut prices = DailySeries::new();
            let mut volumes = DailySeries::new();
            let mut price = 50.0 + k as f64 * 10.0;
            for i in 0..days {
                let wave = ((i as f64) * (0.3 + k as f64 * 0.17)).sin();
                price *= 1.0 + wave * (0.005 + k as f64 * 0.002);
                prices.insert(date(i), price);
                volumes.insert(date(i), 1e6);
            }
            data.prices.insert_series(symbol.clone(), prices);
            data.volumes.insert_series(symbol.clone(), volumes);
        }
        let calendar = data.calendar();
        (data, symbols, calendar)
    }

    #[test]
    fn test_rank_split_extremes() {
        let scores = vec![0.5, 0.1, 0.9, 0.3, 0.7];
        let (longs, shorts) = rank_split(&scores, 2);
        assert_eq!(longs, vec![1, 3]);
        assert_eq!(shorts, vec![4, 2]);
    }

    #[test]
    fn test_equal_weight_vector_neutral() {
        let w = equal_weight_vector(6, &[0, 1], &[4, 5]);
        assert!((w.iter().sum::<f64>()).abs() < 1e-12);
        assert!((w.iter().map(|x| x.abs()).sum::<f64>() - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_randomized_is_deterministic() {
        let sigma = vec![
            vec![0.04, 0.00, 0.01, 0.00],
            vec![0.00, 0.02, 0.00, 0.01],
            vec![0.01, 0.00, 0.03, 0.00],
            vec![0.00, 0.01, 0.00, 0.05],
        ];
        let a = randomized_diversification(&sigma, 2, 32, 99);
        let b = randomized_diversification(&sigma, 2, 32, 99);
        assert_eq!(a, b);
    }

    #[test]
    fn test_exploration_produces_ranked_matrix() {
        let (data, symbols, calendar) = market(120, 8);
        let rows = run_exploration(
            date(119),
            &symbols,
            &data,
            &calendar,
            &OptimizerConfig::default(),
            &ExploreConfig::default(),
        )
        .unwrap();
        // Six heuristics, two weightings each; min-variance may drop a
        // candidate on solver failure but equal always survives.
        assert!(rows.len() >= 6, "rows = {}", rows.len());
        for pair in rows.windows(2) {
            assert!(
                pair[0].realized_volatility <= pair[1].realized_volatility
                    || pair[1].realized_volatility.is_nan()
            );
        }
        for row in &rows {
            assert!(row.net.abs() < 1e-6, "{:?}", row);
            assert!(row.gross > 0.0);
        }
    }

    #[test]
    fn test_exploration_rejects_tiny_universe() {
        let (data, symbols, calendar) = market(120, 1);
        let err = run_exploration(
            date(119),
            &symbols,
            &data,
            &calendar,
            &OptimizerConfig::default(),
            &ExploreConfig::default(),
        );
        assert!(err.is_err());
    }
}
