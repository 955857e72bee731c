//! Weight construction for long-only baskets.
//!
//! Turns a selected asset set plus market caps into a normalized, capped
//! weight vector. Capping is iterative: clipping one asset redistributes its
//! excess across the rest, which can push a previously uncapped asset over
//! the cap, so a single pass is not enough.

use crate::types::WeightScheme;
use std::collections::BTreeMap;

const MAX_CAP_ITERATIONS: usize = 100;

/// Compute normalized weights for `market_caps` under `scheme`, then apply
/// the iterative per-asset cap and renormalize to sum to exactly 1.
///
/// An empty asset set yields an empty map. Under a cap-dependent scheme an
/// asset with a non-finite or non-positive market cap gets zero initial
/// weight; if no asset has a usable cap the whole set falls back to equal
/// weighting.
pub fn compute_weights(
    market_caps: &BTreeMap<String, f64>,
    scheme: WeightScheme,
    max_weight: f64,
) -> BTreeMap<String, f64> {
    if market_caps.is_empty() {
        return BTreeMap::new();
    }

    let raw: BTreeMap<String, f64> = match scheme {
        WeightScheme::EqualWeight => market_caps.keys().map(|s| (s.clone(), 1.0)).collect(),
        WeightScheme::CapWeighted => market_caps
            .iter()
            .map(|(s, &m)| (s.clone(), if m.is_finite() && m > 0.0 { m } else { 0.0 }))
            .collect(),
        WeightScheme::SqrtCapWeighted => market_caps
            .iter()
            .map(|(s, &m)| {
                (
                    s.clone(),
                    if m.is_finite() && m > 0.0 { m.sqrt() } else { 0.0 },
                )
            })
            .collect(),
    };

    let total: f64 = raw.values().sum();
    let mut weights: BTreeMap<String, f64> = if total > 0.0 {
        raw.iter().map(|(s, &v)| (s.clone(), v / total)).collect()
    } else {
        // No usable market caps: equal weight.
        let n = market_caps.len() as f64;
        market_caps.keys().map(|s| (s.clone(), 1.0 / n)).collect()
    };

    apply_iterative_cap(&mut weights, max_weight);
    weights
}

/// Iteratively cap normalized long-only weights at `max_weight`.
///
/// Each round clips every over-cap weight to the cap and redistributes the
/// clipped excess proportionally across assets still under the cap. Stops
/// when nothing exceeds the cap, when every asset is capped, or after 100
/// rounds; finishes by renormalizing to sum to exactly 1.
pub fn apply_iterative_cap(weights: &mut BTreeMap<String, f64>, max_weight: f64) {
    if weights.is_empty() || max_weight <= 0.0 {
        return;
    }

    for _ in 0..MAX_CAP_ITERATIONS {
        let mut excess = 0.0;
        let mut under_total = 0.0;
        for &w in weights.values() {
            if w > max_weight {
                excess += w - max_weight;
            } else {
                under_total += w;
            }
        }
        if excess <= 0.0 {
            break;
        }

        if under_total <= 0.0 {
            // Everyone is at or above the cap: clip and stop.
            for w in weights.values_mut() {
                *w = w.min(max_weight);
            }
            break;
        }

        for w in weights.values_mut() {
            if *w > max_weight {
                *w = max_weight;
            } else {
                *w += excess * (*w / under_total);
            }
        }
    }

    let total: f64 = weights.values().sum();
    if total > 0.0 {
        for w in weights.values_mut() {
            *w /= total;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn caps(pairs: &[(&str, f64)]) -> BTreeMap<String, f64> {
        pairs.iter().map(|&(s, m)| (s.to_string(), m)).collect()
    }

    fn total(weights: &BTreeMap<String, f64>) -> f64 {
        weights.values().sum()
    }

    #[test]
    fn test_cap_weighted_proportional() {
        let w = compute_weights(
            &caps(&[("AAA", 3e9), ("BBB", 1e9)]),
            WeightScheme::CapWeighted,
            1.0,
        );
        assert!((w["AAA"] - 0.75).abs() < 1e-12);
        assert!((w["BBB"] - 0.25).abs() < 1e-12);
    }

    #[test]
    fn test_sqrt_cap_compresses_spread() {
        let w = compute_weights(
            &caps(&[("AAA", 9e8), ("BBB", 1e8)]),
            WeightScheme::SqrtCapWeighted,
            1.0,
        );
        // sqrt ratio 3:1 instead of 9:1.
        assert!((w["AAA"] - 0.75).abs() < 1e-12);
        assert!((w["BBB"] - 0.25).abs() < 1e-12);
    }

    #[test]
    fn test_equal_weight_ignores_caps() {
        let w = compute_weights(
            &caps(&[("AAA", 1e12), ("BBB", 1.0), ("CCC", 5e7)]),
            WeightScheme::EqualWeight,
            1.0,
        );
        for v in w.values() {
            assert!((v - 1.0 / 3.0).abs() < 1e-12);
        }
    }

    #[test]
    fn test_iterative_cap_redistributes() {
        // 80/15/5 capped at 40%: the first clip pushes the others up.
        let w = compute_weights(
            &caps(&[("AAA", 80.0), ("BBB", 15.0), ("CCC", 5.0)]),
            WeightScheme::CapWeighted,
            0.40,
        );
        assert!((total(&w) - 1.0).abs() < 1e-9);
        for v in w.values() {
            assert!(*v <= 0.40 + 1e-9);
        }
        assert!((w["AAA"] - 0.40).abs() < 1e-9);
        // BBB absorbs excess proportionally but stays under the cap.
        assert!(w["BBB"] > 0.15 && w["BBB"] <= 0.40 + 1e-9);
    }

    #[test]
    fn test_cascading_cap() {
        // Redistribution pushes BBB over the cap on the second round.
        let w = compute_weights(
            &caps(&[("AAA", 60.0), ("BBB", 25.0), ("CCC", 10.0), ("DDD", 5.0)]),
            WeightScheme::CapWeighted,
            0.30,
        );
        assert!((total(&w) - 1.0).abs() < 1e-9);
        for (s, v) in &w {
            assert!(*v <= 0.30 + 1e-9, "{} = {}", s, v);
        }
    }

    #[test]
    fn test_infeasible_cap_degrades_to_equal() {
        // 3 assets, 20% cap: weights cannot sum to 1 under the cap. After
        // clipping everything the final renormalization yields equal thirds.
        let w = compute_weights(
            &caps(&[("AAA", 50.0), ("BBB", 30.0), ("CCC", 20.0)]),
            WeightScheme::CapWeighted,
            0.20,
        );
        assert!((total(&w) - 1.0).abs() < 1e-9);
        for v in w.values() {
            assert!((v - 1.0 / 3.0).abs() < 1e-9);
        }
    }

    #[test]
    fn test_empty_set() {
        let w = compute_weights(&BTreeMap::new(), WeightScheme::CapWeighted, 0.1);
        assert!(w.is_empty());
    }

    #[test]
    fn test_unusable_caps_fall_back_to_equal() {
        let w = compute_weights(
            &caps(&[("AAA", f64::NAN), ("BBB", -5.0)]),
            WeightScheme::CapWeighted,
            1.0,
        );
        assert!((w["AAA"] - 0.5).abs() < 1e-12);
        assert!((w["BBB"] - 0.5).abs() < 1e-12);
    }
}
