//! Cluster-matched pair baskets (Method B).
//!
//! The eligible universe is clustered on a (1 - trailing correlation)
//! distance; within each cluster members are ranked by a trailing-return
//! signal and the top and bottom fractions become matched long/short legs.
//! Each cluster gets a fixed gross budget; caps, an exact dollar-neutral
//! rescale and a global gross rescale finish the basket.
//!
//! Degenerate inputs (unusable correlation, all-singleton clusters) fall
//! back to a deterministic volatility-rank selection instead of raising.

use crate::covariance::estimate_covariance;
use crate::optimizer::{liquidity_weight_caps, OptimizerConfig};
use crate::timeseries::simple_return;
use crate::types::{BasketKind, BasketSnapshot};
use crate::universe::MarketData;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, warn};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusterConfig {
    /// Number of clusters K to cut the dendrogram at.
    pub clusters: usize,
    /// Fraction of each cluster taken for each leg.
    pub leg_fraction: f64,
    /// Trailing window for the return signal, in calendar days.
    pub signal_lookback_days: i64,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            clusters: 5,
            leg_fraction: 0.2,
            signal_lookback_days: 30,
        }
    }
}

/// Agglomerative clustering with average linkage on a precomputed distance
/// matrix. Merges the closest pair until `k` clusters remain; each cluster
/// is a list of indices into the distance matrix.
pub fn agglomerative_clusters(distance: &[Vec<f64>], k: usize) -> Vec<Vec<usize>> {
    let n = distance.len();
    let mut clusters: Vec<Vec<usize>> = (0..n).map(|i| vec![i]).collect();
    let k = k.max(1);

    while clusters.len() > k {
        let mut best = (0usize, 1usize);
        let mut best_dist = f64::INFINITY;
        for i in 0..clusters.len() {
            for j in (i + 1)..clusters.len() {
                // Average linkage: mean pairwise distance.
                let mut sum = 0.0;
                for &a in &clusters[i] {
                    for &b in &clusters[j] {
                        sum += distance[a][b];
                    }
                }
                let d = sum / (clusters[i].len() * clusters[j].len()) as f64;
                if d < best_dist {
                    best_dist = d;
                    best = (i, j);
                }
            }
        }
        let merged = clusters.remove(best.1);
        clusters[best.0].extend(merged);
    }

    for cluster in &mut clusters {
        cluster.sort_unstable();
    }
    clusters
}

/// Trailing return over the signal window, as-of both endpoints.
pub(crate) fn trailing_return_signal(
    data: &MarketData,
    symbol: &str,
    date: NaiveDate,
    lookback_days: i64,
) -> Option<f64> {
    let then = data
        .prices
        .asof(symbol, date - chrono::Duration::days(lookback_days))
        .map(|(_, v)| v);
    let now = data.prices.asof(symbol, date).map(|(_, v)| v);
    simple_return(then, now)
}

/// Rank cluster members by signal and split off the matched legs.
///
/// Returns (long indices, short indices) into the member list, both of the
/// same size; the top of the ranking forms the long leg (momentum
/// convention). Members without a signal are dropped before ranking.
fn select_cluster_legs(
    members: &[usize],
    signals: &[Option<f64>],
    leg_fraction: f64,
) -> (Vec<usize>, Vec<usize>) {
    let mut ranked: Vec<usize> = members
        .iter()
        .copied()
        .filter(|&i| signals[i].is_some())
        .collect();
    ranked.sort_by(|&a, &b| {
        signals[b]
            .unwrap()
            .partial_cmp(&signals[a].unwrap())
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    if ranked.len() < 2 {
        return (Vec::new(), Vec::new());
    }
    let mut leg = ((ranked.len() as f64 * leg_fraction).floor() as usize).max(1);
    leg = leg.min(ranked.len() / 2);
    let longs = ranked[..leg].to_vec();
    let shorts = ranked[ranked.len() - leg..].to_vec();
    (longs, shorts)
}

/// Clip, neutralize and gross-rescale a raw signed weight vector.
fn finish_basket(
    date: NaiveDate,
    method: &str,
    symbols: &[String],
    mut weights: Vec<f64>,
    caps: &[f64],
    gross_cap: f64,
) -> Option<BasketSnapshot> {
    for (w, cap) in weights.iter_mut().zip(caps.iter()) {
        *w = w.clamp(-cap, *cap);
    }

    let long_sum: f64 = weights.iter().filter(|w| **w > 0.0).sum();
    let short_sum: f64 = weights.iter().filter(|w| **w < 0.0).map(|w| -w).sum();
    if long_sum <= 0.0 || short_sum <= 0.0 {
        warn!("{}: one-sided basket after capping, skipping", date);
        return None;
    }
    // Rescale the short side so the basket nets to zero exactly.
    let scale = long_sum / short_sum;
    for w in weights.iter_mut() {
        if *w < 0.0 {
            *w *= scale;
        }
    }

    let gross: f64 = weights.iter().map(|w| w.abs()).sum();
    if gross > gross_cap {
        let shrink = gross_cap / gross;
        for w in weights.iter_mut() {
            *w *= shrink;
        }
    }

    let map: BTreeMap<String, f64> = symbols
        .iter()
        .cloned()
        .zip(weights)
        .filter(|(_, w)| *w != 0.0)
        .collect();
    if map.is_empty() {
        return None;
    }
    Some(BasketSnapshot::from_weights(
        date,
        BasketKind::DollarNeutral,
        method,
        map,
    ))
}

/// Deterministic fallback: rank by trailing per-asset volatility, long the
/// calmest fraction and short the wildest, equal-weighted.
fn volatility_rank_basket(
    date: NaiveDate,
    eligible: &[String],
    data: &MarketData,
    calendar: &[NaiveDate],
    optimizer: &OptimizerConfig,
    cluster: &ClusterConfig,
) -> Option<BasketSnapshot> {
    let end = calendar.partition_point(|d| *d <= date);
    let start = end.saturating_sub(optimizer.covariance.lookback_days + 1);
    let window = &calendar[start..end];

    let mut vols: Vec<(usize, f64)> = Vec::new();
    for (idx, symbol) in eligible.iter().enumerate() {
        let mut returns = Vec::new();
        for pair in window.windows(2) {
            if let Some(r) = simple_return(
                data.prices.at(symbol, pair[0]),
                data.prices.at(symbol, pair[1]),
            ) {
                returns.push(r);
            }
        }
        if returns.len() < 5 {
            continue;
        }
        let mean = returns.iter().sum::<f64>() / returns.len() as f64;
        let var = returns.iter().map(|r| (r - mean).powi(2)).sum::<f64>()
            / (returns.len() - 1) as f64;
        vols.push((idx, var.sqrt()));
    }
    if vols.len() < 2 {
        warn!("{}: volatility-rank fallback has no usable assets", date);
        return None;
    }
    vols.sort_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal));

    let mut leg = ((vols.len() as f64 * cluster.leg_fraction).floor() as usize).max(1);
    leg = leg.min(vols.len() / 2);
    let per_position = optimizer.gross_cap / (2.0 * leg as f64);

    let mut weights = vec![0.0; eligible.len()];
    for &(idx, _) in vols.iter().take(leg) {
        weights[idx] = per_position;
    }
    for &(idx, _) in vols.iter().rev().take(leg) {
        weights[idx] = -per_position;
    }

    let caps = liquidity_weight_caps(data, eligible, date, optimizer);
    finish_basket(date, "volatility-rank", eligible, weights, &caps, optimizer.gross_cap)
}

/// Method B entry point: build the cluster-matched basket for one
/// rebalance date. Returns None only when no basket can be formed at all.
pub fn optimize_cluster_matched(
    date: NaiveDate,
    eligible: &[String],
    data: &MarketData,
    calendar: &[NaiveDate],
    optimizer: &OptimizerConfig,
    config: &ClusterConfig,
) -> Option<BasketSnapshot> {
    if eligible.len() < 2 {
        warn!("{}: {} eligible assets, skipping cluster basket", date, eligible.len());
        return None;
    }

    let estimate = match estimate_covariance(
        &data.prices,
        eligible,
        calendar,
        date,
        &optimizer.covariance,
    ) {
        Ok(est) => est,
        Err(e) => {
            debug!("{}: correlation unavailable ({}), using volatility rank", date, e);
            return volatility_rank_basket(date, eligible, data, calendar, optimizer, config);
        }
    };

    let corr = estimate.cov.correlation();
    let n = eligible.len();
    let mut distance = vec![vec![0.0; n]; n];
    for i in 0..n {
        for j in 0..n {
            if i != j {
                distance[i][j] = 1.0 - corr[i][j];
            }
        }
    }

    let clusters = agglomerative_clusters(&distance, config.clusters);
    let signals: Vec<Option<f64>> = eligible
        .iter()
        .map(|s| trailing_return_signal(data, s, date, config.signal_lookback_days))
        .collect();

    let budget = optimizer.gross_cap / config.clusters.max(1) as f64;
    let mut weights = vec![0.0; n];
    let mut contributing = 0usize;
    for cluster in &clusters {
        let (longs, shorts) = select_cluster_legs(cluster, &signals, config.leg_fraction);
        if longs.is_empty() {
            continue;
        }
        contributing += 1;
        let per_position = budget / (2.0 * longs.len() as f64);
        for &i in &longs {
            weights[i] += per_position;
        }
        for &i in &shorts {
            weights[i] -= per_position;
        }
    }

    if contributing == 0 {
        debug!("{}: every cluster degenerate, using volatility rank", date);
        return volatility_rank_basket(date, eligible, data, calendar, optimizer, config);
    }
    debug!("{}: {} of {} clusters contributed legs", date, contributing, clusters.len());

    let caps = liquidity_weight_caps(data, eligible, date, optimizer);
    finish_basket(date, "cluster-matched", eligible, weights, &caps, optimizer.gross_cap)
}
