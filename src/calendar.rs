//! Calendar arithmetic for window boundaries.
//!
//! Month offsets clamp to the last day of the target month, so
//! `2023-01-31 + 1 month` is `2023-02-28`.

use crate::error::{Result, WfoError};
use chrono::{Duration, Months, NaiveDate};

/// Add `months` calendar months to `date`.
pub fn add_months(date: NaiveDate, months: u32) -> Result<NaiveDate> {
    date.checked_add_months(Months::new(months))
        .ok_or_else(|| WfoError::InvalidInput(format!("{} + {} months overflows", date, months)))
}

/// Subtract `months` calendar months from `date`.
pub fn sub_months(date: NaiveDate, months: u32) -> Result<NaiveDate> {
    date.checked_sub_months(Months::new(months))
        .ok_or_else(|| WfoError::InvalidInput(format!("{} - {} months overflows", date, months)))
}

/// The calendar day before `date`.
pub fn previous_day(date: NaiveDate) -> Result<NaiveDate> {
    date.pred_opt()
        .ok_or_else(|| WfoError::InvalidInput(format!("No day before {}", date)))
}

/// Start of the data request needed to train the first window.
///
/// Widens `start` by `train_months` plus `buffer_days` so non-trading days at
/// the edge cannot leave the first training slice short.
pub fn fetch_start(start: NaiveDate, train_months: u32, buffer_days: u32) -> Result<NaiveDate> {
    let widened = sub_months(start, train_months)?;
    widened
        .checked_sub_signed(Duration::days(buffer_days as i64))
        .ok_or_else(|| WfoError::InvalidInput(format!("Fetch start before {} overflows", widened)))
}

/// Whole days in `[from, to]`, inclusive.
pub fn days_inclusive(from: NaiveDate, to: NaiveDate) -> i64 {
    (to - from).num_days() + 1
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    #[test]
    fn test_add_months() {
        assert_eq!(add_months(d(2020, 1, 15), 6).unwrap(), d(2020, 7, 15));
    }

    #[test]
    fn test_add_months_year_rollover() {
        assert_eq!(add_months(d(2020, 11, 15), 3).unwrap(), d(2021, 2, 15));
    }

    #[test]
    fn test_add_months_clamps_month_end() {
        assert_eq!(add_months(d(2023, 1, 31), 1).unwrap(), d(2023, 2, 28));
        assert_eq!(add_months(d(2024, 1, 31), 1).unwrap(), d(2024, 2, 29));
    }

    #[test]
    fn test_sub_months() {
        assert_eq!(sub_months(d(2023, 1, 1), 6).unwrap(), d(2022, 7, 1));
    }

    #[test]
    fn test_fetch_start_includes_buffer() {
        assert_eq!(fetch_start(d(2023, 1, 1), 6, 15).unwrap(), d(2022, 6, 16));
    }

    #[test]
    fn test_days_inclusive() {
        assert_eq!(days_inclusive(d(2023, 1, 1), d(2023, 1, 31)), 31);
    }
}
