//! Core data types for the walk-forward engine.

use crate::error::{Result, WfoError};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::ops::Range;

/// OHLCV bar representing a single time period of market data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bar {
    pub timestamp: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

impl Bar {
    /// Create a new bar.
    pub fn new(
        timestamp: DateTime<Utc>,
        open: f64,
        high: f64,
        low: f64,
        close: f64,
        volume: f64,
    ) -> Self {
        Self {
            timestamp,
            open,
            high,
            low,
            close,
            volume,
        }
    }

    /// Validate that bar data is consistent.
    pub fn validate(&self) -> bool {
        self.high >= self.low
            && self.high >= self.open
            && self.high >= self.close
            && self.low <= self.open
            && self.low <= self.close
            && self.open > 0.0
            && self.close > 0.0
            && self.volume >= 0.0
    }

    /// Calendar date of the bar in UTC.
    pub fn date(&self) -> NaiveDate {
        self.timestamp.date_naive()
    }
}

/// Bars whose calendar date falls inside `[from, to]`, both inclusive.
///
/// `bars` must be sorted by timestamp.
pub fn bars_between(bars: &[Bar], from: NaiveDate, to: NaiveDate) -> &[Bar] {
    let range = date_range_indices(bars, from, to);
    &bars[range]
}

fn date_range_indices(bars: &[Bar], from: NaiveDate, to: NaiveDate) -> Range<usize> {
    if from > to {
        return 0..0;
    }
    let start = bars.partition_point(|b| b.date() < from);
    let end = bars.partition_point(|b| b.date() <= to);
    start..end.max(start)
}

/// A chronologically ordered OHLCV series for one symbol and timeframe.
///
/// Timestamps are strictly increasing and every close is positive; the
/// constructor rejects anything else.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PriceSeries {
    bars: Vec<Bar>,
}

impl PriceSeries {
    /// Build a series, validating ordering and prices.
    pub fn new(bars: Vec<Bar>) -> Result<Self> {
        for (i, pair) in bars.windows(2).enumerate() {
            if pair[1].timestamp <= pair[0].timestamp {
                return Err(WfoError::DataError(format!(
                    "Timestamps must be strictly increasing (bar {} at {} follows {})",
                    i + 1,
                    pair[1].timestamp,
                    pair[0].timestamp
                )));
            }
        }
        if let Some(bad) = bars.iter().find(|b| b.close.is_nan() || b.close <= 0.0) {
            return Err(WfoError::DataError(format!(
                "Non-positive close {} at {}",
                bad.close, bad.timestamp
            )));
        }
        Ok(Self { bars })
    }

    /// An empty series.
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn bars(&self) -> &[Bar] {
        &self.bars
    }

    pub fn into_bars(self) -> Vec<Bar> {
        self.bars
    }

    pub fn len(&self) -> usize {
        self.bars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bars.is_empty()
    }

    pub fn first_date(&self) -> Option<NaiveDate> {
        self.bars.first().map(Bar::date)
    }

    pub fn last_date(&self) -> Option<NaiveDate> {
        self.bars.last().map(Bar::date)
    }

    /// Closing prices in index order.
    pub fn closes(&self) -> Vec<f64> {
        self.bars.iter().map(|b| b.close).collect()
    }

    /// Timestamps in index order.
    pub fn timestamps(&self) -> Vec<DateTime<Utc>> {
        self.bars.iter().map(|b| b.timestamp).collect()
    }

    /// Bars whose date is inside `[from, to]` (inclusive).
    pub fn slice_dates(&self, from: NaiveDate, to: NaiveDate) -> &[Bar] {
        bars_between(&self.bars, from, to)
    }

    /// Index range of the bars whose date is inside `[from, to]`.
    pub fn range_indices(&self, from: NaiveDate, to: NaiveDate) -> Range<usize> {
        date_range_indices(&self.bars, from, to)
    }

    /// Position of the bar with exactly this timestamp.
    pub fn index_of(&self, timestamp: DateTime<Utc>) -> Option<usize> {
        self.bars
            .binary_search_by(|b| b.timestamp.cmp(&timestamp))
            .ok()
    }

    /// A new series restricted to `[from, to]`.
    pub fn restrict(&self, from: NaiveDate, to: NaiveDate) -> PriceSeries {
        PriceSeries {
            bars: self.slice_dates(from, to).to_vec(),
        }
    }
}

/// A completed round-trip trade.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trade {
    pub entry_time: DateTime<Utc>,
    pub entry_price: f64,
    pub exit_time: DateTime<Utc>,
    pub exit_price: f64,
    pub quantity: f64,
    /// Fees paid on both legs.
    pub fees: f64,
    /// Net profit after fees.
    pub pnl: f64,
    /// Net return on the capital committed at entry, in percent.
    pub return_pct: f64,
}

impl Trade {
    pub fn is_winner(&self) -> bool {
        self.pnl > 0.0
    }

    /// Holding period in whole days.
    pub fn holding_days(&self) -> i64 {
        (self.exit_time - self.entry_time).num_days()
    }
}

/// Point on an equity curve.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EquityPoint {
    pub timestamp: DateTime<Utc>,
    pub equity: f64,
    pub cash: f64,
    pub position_value: f64,
    pub drawdown_pct: f64,
}

/// A named set of strategy parameters.
///
/// Ordered by name so two sets built in different orders compare, print and
/// serialize identically.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ParamSet(BTreeMap<String, f64>);

impl ParamSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert.
    pub fn with(mut self, name: impl Into<String>, value: f64) -> Self {
        self.0.insert(name.into(), value);
        self
    }

    pub fn insert(&mut self, name: impl Into<String>, value: f64) {
        self.0.insert(name.into(), value);
    }

    pub fn get(&self, name: &str) -> Option<f64> {
        self.0.get(name).copied()
    }

    /// Value of `name`, or `default` when absent.
    pub fn get_or(&self, name: &str, default: f64) -> f64 {
        self.get(name).unwrap_or(default)
    }

    /// Value of `name` as a positive integer period.
    pub fn get_period(&self, name: &str, default: usize) -> Result<usize> {
        match self.get(name) {
            None => Ok(default),
            Some(v) if v.is_finite() && v >= 1.0 && v.fract() == 0.0 => Ok(v as usize),
            Some(v) => Err(WfoError::StrategyError(format!(
                "Parameter '{}' must be a positive integer, got {}",
                name, v
            ))),
        }
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &f64)> {
        self.0.iter()
    }
}

impl FromIterator<(String, f64)> for ParamSet {
    fn from_iter<I: IntoIterator<Item = (String, f64)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl fmt::Display for ParamSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self
            .0
            .iter()
            .map(|(k, v)| {
                if v.fract() == 0.0 {
                    format!("{}={}", k, *v as i64)
                } else {
                    format!("{}={:.4}", k, v)
                }
            })
            .collect();
        write!(f, "{}", parts.join(", "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn bar_on(day: i64, close: f64) -> Bar {
        Bar::new(
            Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap() + chrono::Duration::days(day),
            close,
            close + 1.0,
            close - 1.0,
            close,
            1000.0,
        )
    }

    #[test]
    fn test_bar_validation() {
        assert!(bar_on(0, 100.0).validate());
        let mut bad = bar_on(0, 100.0);
        bad.high = 90.0;
        assert!(!bad.validate());
    }

    #[test]
    fn test_series_rejects_unordered() {
        let bars = vec![bar_on(1, 100.0), bar_on(0, 101.0)];
        assert!(PriceSeries::new(bars).is_err());
    }

    #[test]
    fn test_series_rejects_duplicate_timestamp() {
        let bars = vec![bar_on(0, 100.0), bar_on(0, 101.0)];
        assert!(PriceSeries::new(bars).is_err());
    }

    #[test]
    fn test_series_rejects_non_positive_close() {
        let mut bad = bar_on(1, 100.0);
        bad.close = 0.0;
        assert!(PriceSeries::new(vec![bar_on(0, 100.0), bad]).is_err());
    }

    #[test]
    fn test_slice_dates_inclusive() {
        let series = PriceSeries::new((0..10).map(|d| bar_on(d, 100.0)).collect()).unwrap();
        let from = NaiveDate::from_ymd_opt(2024, 1, 3).unwrap();
        let to = NaiveDate::from_ymd_opt(2024, 1, 5).unwrap();
        let slice = series.slice_dates(from, to);
        assert_eq!(slice.len(), 3);
        assert_eq!(slice[0].date(), from);
        assert_eq!(slice[2].date(), to);
        assert_eq!(series.range_indices(from, to), 2..5);
    }

    #[test]
    fn test_slice_dates_outside_range() {
        let series = PriceSeries::new((0..10).map(|d| bar_on(d, 100.0)).collect()).unwrap();
        let from = NaiveDate::from_ymd_opt(2025, 1, 1).unwrap();
        let to = NaiveDate::from_ymd_opt(2025, 2, 1).unwrap();
        assert!(series.slice_dates(from, to).is_empty());
        assert!(series.slice_dates(to, from).is_empty());
    }

    #[test]
    fn test_param_set_display_and_period() {
        let params = ParamSet::new().with("period", 10.0).with("entry_z", 1.5);
        assert_eq!(params.to_string(), "entry_z=1.5000, period=10");
        assert_eq!(params.get_period("period", 20).unwrap(), 10);
        assert_eq!(params.get_period("missing", 20).unwrap(), 20);
        assert!(params.get_period("entry_z", 20).is_err());
    }
}
