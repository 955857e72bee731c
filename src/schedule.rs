//! Rebalance date scheduling.
//!
//! Pure date arithmetic: no data dependency, no error conditions beyond an
//! empty range producing an empty list.

use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};

/// How often baskets are rebuilt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum RebalanceFrequency {
    #[default]
    Monthly,
    Quarterly,
}

impl RebalanceFrequency {
    fn step_months(&self) -> u32 {
        match self {
            Self::Monthly => 1,
            Self::Quarterly => 3,
        }
    }
}

/// Generate the ordered list of rebalance dates in `[start, end]`.
///
/// Each date lands on `day_of_month` clamped to `[1, 28]` so every month is
/// valid, stepped by one or three months. The first emitted date is the
/// first matching calendar date >= `start`.
pub fn rebalance_dates(
    start: NaiveDate,
    end: NaiveDate,
    frequency: RebalanceFrequency,
    day_of_month: u32,
) -> Vec<NaiveDate> {
    if start > end {
        return Vec::new();
    }

    let day = day_of_month.clamp(1, 28);
    let step = frequency.step_months();

    // Candidate in start's month; roll forward one step if it precedes start.
    let mut year = start.year();
    let mut month = start.month();
    let mut current = NaiveDate::from_ymd_opt(year, month, day).expect("day clamped to 28");
    if current < start {
        (year, month) = add_months(year, month, step);
        current = NaiveDate::from_ymd_opt(year, month, day).expect("day clamped to 28");
    }

    let mut dates = Vec::new();
    while current <= end {
        dates.push(current);
        (year, month) = add_months(year, month, step);
        current = NaiveDate::from_ymd_opt(year, month, day).expect("day clamped to 28");
    }
    dates
}

fn add_months(year: i32, month: u32, step: u32) -> (i32, u32) {
    let zero_based = month - 1 + step;
    (year + (zero_based / 12) as i32, zero_based % 12 + 1)
}
