//! CSV/JSON export of the emitted tables.
//!
//! The surrounding reporting layer owns charts and markdown; this module
//! only writes the raw tables in machine-friendly formats.

use crate::analytics::PerformanceSummary;
use crate::backtest::ConcentrationReport;
use crate::error::Result;
use crate::types::{
    BacktestDailyRecord, BasketSnapshot, EligibilityRecord, RebalanceTurnoverRecord,
};
use chrono::NaiveDate;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fs::File;
use std::path::Path;

/// One snapshot constituent in long format.
#[derive(Debug, Serialize)]
struct SnapshotRow<'a> {
    rebalance_date: NaiveDate,
    symbol: &'a str,
    weight: f64,
    rank: usize,
    method: &'a str,
}

/// Write the eligibility table, one row per (date, candidate).
pub fn write_eligibility_csv(
    records: &[EligibilityRecord],
    path: impl AsRef<Path>,
) -> Result<()> {
    let mut writer = csv::Writer::from_path(path)?;
    for record in records {
        writer.serialize(record)?;
    }
    writer.flush()?;
    Ok(())
}

/// Write the snapshot table in long format: one row per constituent.
pub fn write_snapshots_csv(
    snapshots: &BTreeMap<NaiveDate, BasketSnapshot>,
    path: impl AsRef<Path>,
) -> Result<()> {
    let mut writer = csv::Writer::from_path(path)?;
    for snapshot in snapshots.values() {
        for (symbol, &weight) in &snapshot.weights {
            writer.serialize(SnapshotRow {
                rebalance_date: snapshot.rebalance_date,
                symbol,
                weight,
                rank: snapshot.ranks.get(symbol).copied().unwrap_or(0),
                method: &snapshot.method,
            })?;
        }
    }
    writer.flush()?;
    Ok(())
}

/// Write the daily backtest table.
pub fn write_daily_csv(
    records: &[BacktestDailyRecord],
    path: impl AsRef<Path>,
) -> Result<()> {
    let mut writer = csv::Writer::from_path(path)?;
    for record in records {
        writer.serialize(record)?;
    }
    writer.flush()?;
    Ok(())
}

/// Write the per-rebalance turnover table.
pub fn write_turnover_csv(
    records: &[RebalanceTurnoverRecord],
    path: impl AsRef<Path>,
) -> Result<()> {
    let mut writer = csv::Writer::from_path(path)?;
    for record in records {
        writer.serialize(record)?;
    }
    writer.flush()?;
    Ok(())
}

/// Combined performance + concentration summary as pretty JSON.
#[derive(Debug, Serialize)]
struct SummaryDocument<'a> {
    performance: &'a PerformanceSummary,
    concentration: &'a ConcentrationReport,
}

pub fn write_summary_json(
    performance: &PerformanceSummary,
    concentration: &ConcentrationReport,
    path: impl AsRef<Path>,
) -> Result<()> {
    let file = File::create(path)?;
    serde_json::to_writer_pretty(
        file,
        &SummaryDocument {
            performance,
            concentration,
        },
    )?;
    Ok(())
}
