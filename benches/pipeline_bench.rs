//! Performance benchmarks for the simulation engine and the optimizer.
//!
//! Run with: cargo bench

use chrono::NaiveDate;
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use std::collections::BTreeMap;
use wicker::backtest::{BacktestConfig, BacktestEngine};
use wicker::optimizer::{solve_qp, QpProblem};
use wicker::timeseries::DailySeries;
use wicker::types::{BasketKind, BasketSnapshot};
use wicker::universe::MarketData;

fn day(offset: i64) -> NaiveDate {
    NaiveDate::from_ymd_opt(2022, 1, 1).unwrap() + chrono::Duration::days(offset)
}

fn generate_market(assets: usize, days: i64) -> MarketData {
    let mut data = MarketData::default();
    for k in 0..assets {
        let symbol = if k == 0 {
            "BTC".to_string()
        } else {
            format!("ALT{:02}", k)
        };
        let mut series = DailySeries::new();
        let mut price = 10.0 + k as f64;
        for i in 0..days {
            let wave = ((i as f64) * 0.19 + k as f64 * 0.7).sin() * 0.01;
            price *= 1.0 + wave + 0.0002;
            series.insert(day(i), price);
        }
        data.prices.insert_series(symbol, series);
    }
    data
}

fn bench_backtest(c: &mut Criterion) {
    let mut group = c.benchmark_group("backtest");
    for &assets in &[10usize, 50] {
        let data = generate_market(assets, 730);
        let mut weights = BTreeMap::new();
        let per = 1.0 / (assets - 1) as f64;
        for k in 1..assets {
            weights.insert(format!("ALT{:02}", k), per);
        }
        let mut snapshots = BTreeMap::new();
        for month in 0..24i64 {
            let rebalance = day(month * 30);
            snapshots.insert(
                rebalance,
                BasketSnapshot::from_weights(
                    rebalance,
                    BasketKind::LongOnly,
                    "bench",
                    weights.clone(),
                ),
            );
        }
        let engine = BacktestEngine::new(BacktestConfig::default());

        group.bench_with_input(
            BenchmarkId::new("daily_loop", assets),
            &assets,
            |b, _| {
                b.iter(|| {
                    let out = engine.run(black_box(&data), black_box(&snapshots)).unwrap();
                    black_box(out.daily.len())
                })
            },
        );
    }
    group.finish();
}

fn bench_optimizer(c: &mut Criterion) {
    let mut group = c.benchmark_group("optimizer");
    for &n in &[10usize, 30] {
        // Diagonal-dominant covariance plus mild uniform coupling.
        let mut sigma = vec![vec![0.0001; n]; n];
        for (i, row) in sigma.iter_mut().enumerate() {
            row[i] = 0.0009 + 0.0001 * (i as f64 % 7.0);
        }
        let scenarios: Vec<Vec<f64>> = (0..120)
            .map(|s| {
                (0..n)
                    .map(|i| ((s * 7 + i * 3) as f64 * 0.37).sin() * 0.02)
                    .collect()
            })
            .collect();
        let problem = QpProblem {
            symbols: (0..n).map(|i| format!("A{:02}", i)).collect(),
            sigma,
            scenarios,
            prev_weights: None,
            lb: vec![-0.1; n],
            ub: vec![0.1; n],
            gross_cap: 2.0,
            cvar_alpha: 1.0,
            cvar_level: 0.05,
            turnover_penalty: 0.0,
            factor: None,
            leg_budgets: None,
        };

        group.bench_with_input(BenchmarkId::new("cvar_qp", n), &n, |b, _| {
            b.iter(|| {
                let w = solve_qp(black_box(&problem)).unwrap();
                black_box(w.len())
            })
        });
    }
    group.finish();
}

criterion_group!(benches, bench_backtest, bench_optimizer);
criterion_main!(benches);
