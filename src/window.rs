//! Train/test window generation.
//!
//! Windows roll forward by one test period at a time. The training block of
//! each window is the `train_months` immediately before its test block, so
//! training and test dates never overlap.

use crate::calendar::{add_months, previous_day, sub_months};
use crate::error::{Result, WfoError};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tracing::warn;

/// A single walk-forward window. All bounds are inclusive calendar dates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Window {
    /// 1-based position in the schedule.
    pub index: usize,
    pub train_start: NaiveDate,
    pub train_end: NaiveDate,
    pub test_start: NaiveDate,
    pub test_end: NaiveDate,
}

impl Window {
    /// Calendar days in the training block.
    pub fn train_days(&self) -> i64 {
        (self.train_end - self.train_start).num_days() + 1
    }

    /// Calendar days in the test block.
    pub fn test_days(&self) -> i64 {
        (self.test_end - self.test_start).num_days() + 1
    }

    pub fn contains_test_date(&self, date: NaiveDate) -> bool {
        date >= self.test_start && date <= self.test_end
    }
}

/// Lazy, restartable sequence of walk-forward windows.
///
/// The k-th test block starts `k * test_months` months after `start_date` and
/// ends the day before the next one starts. Anchoring every window to
/// `start_date` keeps consecutive test blocks contiguous even when a month-end
/// start date gets clamped (Jan 31 -> Feb 28). Iteration stops at the first
/// window whose test block would end after `last_date`.
#[derive(Debug, Clone)]
pub struct WindowSchedule {
    start_date: NaiveDate,
    last_date: NaiveDate,
    train_months: u32,
    test_months: u32,
    next_index: usize,
    exhausted: bool,
}

impl WindowSchedule {
    /// Create a schedule. `last_date` is the last date with data available.
    pub fn new(
        start_date: NaiveDate,
        last_date: NaiveDate,
        train_months: u32,
        test_months: u32,
    ) -> Result<Self> {
        if train_months == 0 {
            return Err(WfoError::ConfigError(
                "train_months must be positive".to_string(),
            ));
        }
        if test_months == 0 {
            return Err(WfoError::ConfigError(
                "test_months must be positive".to_string(),
            ));
        }
        Ok(Self {
            start_date,
            last_date,
            train_months,
            test_months,
            next_index: 0,
            exhausted: false,
        })
    }

    /// Compute the window at 0-based `position` without checking `last_date`.
    pub fn window_at(&self, position: usize) -> Result<Window> {
        let offset = months_offset(position, self.test_months)?;
        let test_start = add_months(self.start_date, offset)?;
        let next_offset = offset.checked_add(self.test_months).ok_or_else(|| {
            WfoError::InvalidInput(format!("Window {} is out of range", position + 1))
        })?;
        let next_start = add_months(self.start_date, next_offset)?;
        let test_end = previous_day(next_start)?;
        let train_start = sub_months(test_start, self.train_months)?;
        let train_end = previous_day(test_start)?;

        Ok(Window {
            index: position + 1,
            train_start,
            train_end,
            test_start,
            test_end,
        })
    }

    /// Rewind to the first window.
    pub fn reset(&mut self) {
        self.next_index = 0;
        self.exhausted = false;
    }

    pub fn start_date(&self) -> NaiveDate {
        self.start_date
    }

    pub fn last_date(&self) -> NaiveDate {
        self.last_date
    }

    pub fn train_months(&self) -> u32 {
        self.train_months
    }

    pub fn test_months(&self) -> u32 {
        self.test_months
    }
}

fn months_offset(position: usize, test_months: u32) -> Result<u32> {
    u32::try_from(position)
        .ok()
        .and_then(|p| p.checked_mul(test_months))
        .ok_or_else(|| WfoError::InvalidInput(format!("Window {} is out of range", position + 1)))
}

impl Iterator for WindowSchedule {
    type Item = Window;

    fn next(&mut self) -> Option<Window> {
        if self.exhausted {
            return None;
        }
        match self.window_at(self.next_index) {
            Ok(window) if window.test_end <= self.last_date => {
                self.next_index += 1;
                Some(window)
            }
            Ok(_) => {
                self.exhausted = true;
                None
            }
            Err(e) => {
                warn!("Window schedule cut short after {} windows: {}", self.next_index, e);
                self.exhausted = true;
                None
            }
        }
    }
}

impl std::iter::FusedIterator for WindowSchedule {}

/// Enumerate the windows for a run starting at `start_date` whose data ends at
/// `last_date`.
pub fn compute_windows(
    start_date: NaiveDate,
    last_date: NaiveDate,
    train_months: u32,
    test_months: u32,
) -> Result<WindowSchedule> {
    WindowSchedule::new(start_date, last_date, train_months, test_months)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    #[test]
    fn test_first_window_bounds() {
        let mut schedule = compute_windows(d(2023, 1, 1), d(2023, 12, 31), 6, 2).unwrap();
        let first = schedule.next().unwrap();
        assert_eq!(first.index, 1);
        assert_eq!(first.train_start, d(2022, 7, 1));
        assert_eq!(first.train_end, d(2022, 12, 31));
        assert_eq!(first.test_start, d(2023, 1, 1));
        assert_eq!(first.test_end, d(2023, 2, 28));

        let second = schedule.next().unwrap();
        assert_eq!(second.test_start, d(2023, 3, 1));
        assert_eq!(second.train_start, d(2022, 9, 1));
    }

    #[test]
    fn test_leap_year_test_end() {
        let mut schedule = compute_windows(d(2024, 1, 1), d(2024, 12, 31), 6, 2).unwrap();
        assert_eq!(schedule.next().unwrap().test_end, d(2024, 2, 29));
    }

    #[test]
    fn test_stops_before_data_end() {
        let windows: Vec<Window> = compute_windows(d(2023, 1, 1), d(2023, 6, 15), 6, 2)
            .unwrap()
            .collect();
        // Jan-Feb and Mar-Apr fit, May-Jun would end after Jun 15.
        assert_eq!(windows.len(), 2);
        assert_eq!(windows[1].test_end, d(2023, 4, 30));
    }

    #[test]
    fn test_window_ending_on_last_date_is_included() {
        let windows: Vec<Window> = compute_windows(d(2023, 1, 1), d(2023, 2, 28), 3, 2)
            .unwrap()
            .collect();
        assert_eq!(windows.len(), 1);
    }

    #[test]
    fn test_month_end_start_stays_contiguous() {
        let windows: Vec<Window> = compute_windows(d(2023, 1, 31), d(2024, 12, 31), 3, 1)
            .unwrap()
            .collect();
        assert!(windows.len() > 10);
        for pair in windows.windows(2) {
            assert_eq!(pair[0].test_end.succ_opt().unwrap(), pair[1].test_start);
        }
    }

    #[test]
    fn test_schedule_is_restartable() {
        let mut schedule = compute_windows(d(2023, 1, 1), d(2023, 12, 31), 6, 2).unwrap();
        let first_pass: Vec<Window> = schedule.by_ref().collect();
        assert!(schedule.next().is_none());
        schedule.reset();
        let second_pass: Vec<Window> = schedule.collect();
        assert_eq!(first_pass, second_pass);
    }

    #[test]
    fn test_schedule_stops_at_calendar_limit() {
        let start = NaiveDate::MAX - chrono::Duration::days(120);
        let windows: Vec<Window> = compute_windows(start, NaiveDate::MAX, 1, 1)
            .unwrap()
            .collect();
        assert!(!windows.is_empty());
        assert!(windows.len() <= 4);
        for pair in windows.windows(2) {
            assert_eq!(pair[0].test_end.succ_opt().unwrap(), pair[1].test_start);
        }
    }

    #[test]
    fn test_zero_months_rejected() {
        assert!(compute_windows(d(2023, 1, 1), d(2023, 12, 31), 0, 2).is_err());
        assert!(compute_windows(d(2023, 1, 1), d(2023, 12, 31), 6, 0).is_err());
    }
}
