//! Mean Reversion signals.
//!
//! Assumes prices revert to their moving average: buy when price is
//! stretched below the mean, exit once it has come back above it.

use crate::data::{rolling_std_series, sma_series};
use crate::error::{Result, WfoError};
use crate::signals::{SignalGenerator, Signals};
use crate::types::{Bar, ParamSet};

/// Z-score mean reversion signal generator.
///
/// # Parameters
/// - `period`: Lookback for the mean and standard deviation (default: 20)
/// - `entry_z`: Enter when the z-score drops below `-entry_z` (default: 1.0)
/// - `exit_z`: Exit when the z-score rises above `exit_z` (default: 0.0)
#[derive(Debug, Clone)]
pub struct MeanReversion {
    period: usize,
    entry_z: f64,
    exit_z: f64,
}

impl MeanReversion {
    /// Create a generator with the given defaults.
    pub fn new(period: usize, entry_z: f64, exit_z: f64) -> Self {
        Self {
            period,
            entry_z,
            exit_z,
        }
    }

    /// Create with default parameters (20, 1.0, 0.0).
    pub fn default_params() -> Self {
        Self::new(20, 1.0, 0.0)
    }

    fn resolve(&self, params: &ParamSet) -> Result<(usize, f64, f64)> {
        let period = params.get_period("period", self.period)?;
        let entry_z = params.get_or("entry_z", self.entry_z);
        let exit_z = params.get_or("exit_z", self.exit_z);

        if period < 2 {
            return Err(WfoError::StrategyError(
                "Mean reversion period must be at least 2".to_string(),
            ));
        }
        if !entry_z.is_finite() || !exit_z.is_finite() || entry_z < 0.0 {
            return Err(WfoError::StrategyError(format!(
                "Invalid z-score thresholds: entry {}, exit {}",
                entry_z, exit_z
            )));
        }
        Ok((period, entry_z, exit_z))
    }
}

impl Default for MeanReversion {
    fn default() -> Self {
        Self::default_params()
    }
}

impl SignalGenerator for MeanReversion {
    fn name(&self) -> &str {
        "Mean Reversion"
    }

    fn signals(&self, bars: &[Bar], params: &ParamSet) -> Result<Signals> {
        let (period, entry_z, exit_z) = self.resolve(params)?;
        let mean = sma_series(bars, period);
        let std = rolling_std_series(bars, period);

        let mut entries = vec![false; bars.len()];
        let mut exits = vec![false; bars.len()];

        for (i, bar) in bars.iter().enumerate() {
            if let (Some(m), Some(s)) = (mean[i], std[i]) {
                if s > 0.0 {
                    let z = (bar.close - m) / s;
                    entries[i] = z < -entry_z;
                    exits[i] = z > exit_z;
                }
            }
        }

        Signals::new(bars.iter().map(|b| b.timestamp).collect(), entries, exits)
    }

    fn default_params(&self) -> ParamSet {
        ParamSet::new()
            .with("period", self.period as f64)
            .with("entry_z", self.entry_z)
            .with("exit_z", self.exit_z)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use std::f64::consts::PI;

    fn oscillating_bars(count: usize, cycle: f64) -> Vec<Bar> {
        (0..count)
            .map(|i| {
                let close = 100.0 + 10.0 * (2.0 * PI * i as f64 / cycle).sin();
                Bar::new(
                    Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
                        + chrono::Duration::days(i as i64),
                    close,
                    close + 1.0,
                    close - 1.0,
                    close,
                    1000.0,
                )
            })
            .collect()
    }

    #[test]
    fn test_oscillation_produces_entries_and_exits() {
        let bars = oscillating_bars(100, 10.0);
        let params = ParamSet::new().with("period", 10.0);
        let signals = MeanReversion::default().signals(&bars, &params).unwrap();

        // One trough and one crest per cycle once the lookback is filled.
        assert!(signals.entry_count() >= 9);
        assert!(signals.exit_count() >= 9);
        assert!(signals.entries[..9].iter().all(|e| !e));
    }

    #[test]
    fn test_flat_prices_give_no_signals() {
        let bars: Vec<Bar> = oscillating_bars(50, 10.0)
            .into_iter()
            .map(|mut b| {
                b.close = 100.0;
                b
            })
            .collect();
        let signals = MeanReversion::default()
            .signals(&bars, &ParamSet::new())
            .unwrap();
        assert_eq!(signals.entry_count(), 0);
    }

    #[test]
    fn test_rejects_bad_period() {
        let bars = oscillating_bars(30, 10.0);
        let params = ParamSet::new().with("period", 1.0);
        assert!(MeanReversion::default().signals(&bars, &params).is_err());
        let params = ParamSet::new().with("period", 7.5);
        assert!(MeanReversion::default().signals(&bars, &params).is_err());
    }
}
