//! Performance metrics over the daily backtest table.

use crate::types::BacktestDailyRecord;
use serde::{Deserialize, Serialize};

/// Trading days per year for annualization. Crypto markets trade every
/// calendar day.
const DAYS_PER_YEAR: f64 = 365.0;

/// Summary statistics of one backtest run, computed over net returns.
///
/// NaN days (missing-price policy output) are excluded from moment
/// estimates and counted separately.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct PerformanceSummary {
    pub days: usize,
    pub nan_days: usize,
    pub total_return: f64,
    pub annualized_return: f64,
    pub annualized_volatility: f64,
    pub sharpe_ratio: f64,
    pub max_drawdown: f64,
    /// Fraction of finite days with a positive net return.
    pub hit_rate: f64,
    pub total_cost: f64,
}

/// Compute the performance summary for a daily record table.
pub fn summarize(daily: &[BacktestDailyRecord]) -> PerformanceSummary {
    if daily.is_empty() {
        return PerformanceSummary::default();
    }

    let finite: Vec<f64> = daily
        .iter()
        .map(|r| r.net_return)
        .filter(|r| r.is_finite())
        .collect();
    let nan_days = daily.len() - finite.len();

    let final_equity = daily.last().map(|r| r.equity).unwrap_or(1.0);
    let total_return = final_equity - 1.0;

    let years = daily.len() as f64 / DAYS_PER_YEAR;
    let annualized_return = if years > 0.0 && final_equity > 0.0 {
        final_equity.powf(1.0 / years) - 1.0
    } else {
        0.0
    };

    let (annualized_volatility, sharpe_ratio) = if finite.len() > 1 {
        let mean = finite.iter().sum::<f64>() / finite.len() as f64;
        let var = finite.iter().map(|r| (r - mean).powi(2)).sum::<f64>()
            / (finite.len() - 1) as f64;
        let daily_vol = var.sqrt();
        let ann_vol = daily_vol * DAYS_PER_YEAR.sqrt();
        let sharpe = if daily_vol > 1e-12 {
            mean / daily_vol * DAYS_PER_YEAR.sqrt()
        } else {
            0.0
        };
        (ann_vol, sharpe)
    } else {
        (0.0, 0.0)
    };

    let mut peak = f64::MIN;
    let mut max_drawdown = 0.0_f64;
    for record in daily {
        peak = peak.max(record.equity);
        if peak > 0.0 {
            max_drawdown = max_drawdown.max(1.0 - record.equity / peak);
        }
    }

    let wins = finite.iter().filter(|r| **r > 0.0).count();
    let hit_rate = if finite.is_empty() {
        0.0
    } else {
        wins as f64 / finite.len() as f64
    };

    let total_cost = daily.iter().map(|r| r.cost).sum();

    PerformanceSummary {
        days: daily.len(),
        nan_days,
        total_return,
        annualized_return,
        annualized_volatility,
        sharpe_ratio,
        max_drawdown,
        hit_rate,
        total_cost,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn record(day: i64, net: f64, equity: f64, cost: f64) -> BacktestDailyRecord {
        BacktestDailyRecord {
            date: NaiveDate::from_ymd_opt(2024, 1, 1).unwrap() + chrono::Duration::days(day),
            numeraire_return: 0.0,
            basket_return: 0.0,
            long_short_return: net,
            cost,
            net_return: net,
            equity,
            coverage: 1.0,
        }
    }

    #[test]
    fn test_constant_positive_returns() {
        let mut equity = 1.0;
        let daily: Vec<_> = (0..10)
            .map(|i| {
                equity *= 1.001;
                record(i, 0.001, equity, 0.0)
            })
            .collect();
        let summary = summarize(&daily);
        assert_eq!(summary.days, 10);
        assert_eq!(summary.nan_days, 0);
        assert!((summary.hit_rate - 1.0).abs() < 1e-12);
        assert_eq!(summary.max_drawdown, 0.0);
        assert!(summary.total_return > 0.0);
        // Zero dispersion: volatility and Sharpe degrade to zero.
        assert_eq!(summary.annualized_volatility, 0.0);
        assert_eq!(summary.sharpe_ratio, 0.0);
    }

    #[test]
    fn test_drawdown_from_peak() {
        let daily = vec![
            record(0, 0.10, 1.10, 0.0),
            record(1, -0.20, 0.88, 0.0),
            record(2, 0.05, 0.924, 0.0),
        ];
        let summary = summarize(&daily);
        assert!((summary.max_drawdown - 0.2).abs() < 1e-9);
    }

    #[test]
    fn test_nan_days_counted_not_poisoning() {
        let daily = vec![
            record(0, 0.01, 1.01, 0.0),
            record(1, f64::NAN, 1.01, 0.0),
            record(2, -0.01, 0.9999, 0.001),
        ];
        let summary = summarize(&daily);
        assert_eq!(summary.nan_days, 1);
        assert!((summary.hit_rate - 0.5).abs() < 1e-12);
        assert!(summary.annualized_volatility.is_finite());
        assert!((summary.total_cost - 0.001).abs() < 1e-12);
    }

    #[test]
    fn test_empty_table() {
        let summary = summarize(&[]);
        assert_eq!(summary.days, 0);
        assert_eq!(summary.total_return, 0.0);
    }
}
