//! Simple Moving Average Crossover signals.
//!
//! A classic trend-following rule: enter when the fast MA crosses above the
//! slow MA, exit when it crosses back below.

use crate::data::sma_series;
use crate::error::{Result, WfoError};
use crate::signals::{SignalGenerator, Signals};
use crate::types::{Bar, ParamSet};

/// SMA Crossover signal generator.
///
/// # Parameters
/// - `fast_period`: Period for the fast moving average (default: 10)
/// - `slow_period`: Period for the slow moving average (default: 30)
#[derive(Debug, Clone)]
pub struct SmaCrossover {
    fast_period: usize,
    slow_period: usize,
}

impl SmaCrossover {
    /// Create a generator whose defaults are `fast_period` / `slow_period`.
    pub fn new(fast_period: usize, slow_period: usize) -> Self {
        Self {
            fast_period,
            slow_period,
        }
    }

    /// Create with default parameters (10/30).
    pub fn default_params() -> Self {
        Self::new(10, 30)
    }

    fn resolve(&self, params: &ParamSet) -> Result<(usize, usize)> {
        let fast = params.get_period("fast_period", self.fast_period)?;
        let slow = params.get_period("slow_period", self.slow_period)?;
        if fast >= slow {
            return Err(WfoError::StrategyError(format!(
                "Fast period ({}) must be less than slow period ({})",
                fast, slow
            )));
        }
        Ok((fast, slow))
    }
}

impl Default for SmaCrossover {
    fn default() -> Self {
        Self::default_params()
    }
}

impl SignalGenerator for SmaCrossover {
    fn name(&self) -> &str {
        "SMA Crossover"
    }

    fn signals(&self, bars: &[Bar], params: &ParamSet) -> Result<Signals> {
        let (fast_period, slow_period) = self.resolve(params)?;
        let fast = sma_series(bars, fast_period);
        let slow = sma_series(bars, slow_period);

        let mut entries = vec![false; bars.len()];
        let mut exits = vec![false; bars.len()];

        for i in 1..bars.len() {
            if let (Some(pf), Some(ps), Some(f), Some(s)) = (fast[i - 1], slow[i - 1], fast[i], slow[i])
            {
                entries[i] = pf <= ps && f > s;
                exits[i] = pf >= ps && f < s;
            }
        }

        Signals::new(bars.iter().map(|b| b.timestamp).collect(), entries, exits)
    }

    fn default_params(&self) -> ParamSet {
        ParamSet::new()
            .with("fast_period", self.fast_period as f64)
            .with("slow_period", self.slow_period as f64)
    }
}
