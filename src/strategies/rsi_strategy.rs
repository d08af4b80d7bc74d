//! RSI-based signals.
//!
//! Uses the Relative Strength Index to identify overbought and oversold conditions.

use crate::data::rsi_series;
use crate::error::{Result, WfoError};
use crate::signals::{SignalGenerator, Signals};
use crate::types::{Bar, ParamSet};

/// RSI signal generator.
///
/// # Parameters
/// - `period`: RSI calculation period (default: 14)
/// - `oversold`: Enter when RSI is below this level (default: 30)
/// - `overbought`: Exit when RSI is above this level (default: 70)
#[derive(Debug, Clone)]
pub struct RsiStrategy {
    period: usize,
    oversold: f64,
    overbought: f64,
}

impl RsiStrategy {
    pub fn new(period: usize, oversold: f64, overbought: f64) -> Self {
        Self {
            period,
            oversold,
            overbought,
        }
    }

    /// Create with default parameters (14, 30, 70).
    pub fn default_params() -> Self {
        Self::new(14, 30.0, 70.0)
    }

    fn resolve(&self, params: &ParamSet) -> Result<(usize, f64, f64)> {
        let period = params.get_period("period", self.period)?;
        let oversold = params.get_or("oversold", self.oversold);
        let overbought = params.get_or("overbought", self.overbought);

        if !(0.0..=100.0).contains(&oversold) || !(0.0..=100.0).contains(&overbought) {
            return Err(WfoError::StrategyError(
                "RSI thresholds must be between 0 and 100".to_string(),
            ));
        }
        if oversold >= overbought {
            return Err(WfoError::StrategyError(format!(
                "Oversold ({}) must be less than overbought ({})",
                oversold, overbought
            )));
        }
        Ok((period, oversold, overbought))
    }
}

impl Default for RsiStrategy {
    fn default() -> Self {
        Self::default_params()
    }
}

impl SignalGenerator for RsiStrategy {
    fn name(&self) -> &str {
        "RSI Strategy"
    }

    fn signals(&self, bars: &[Bar], params: &ParamSet) -> Result<Signals> {
        let (period, oversold, overbought) = self.resolve(params)?;
        let rsi = rsi_series(bars, period);

        let entries = rsi.iter().map(|r| r.is_some_and(|v| v < oversold)).collect();
        let exits = rsi.iter().map(|r| r.is_some_and(|v| v > overbought)).collect();

        Signals::new(bars.iter().map(|b| b.timestamp).collect(), entries, exits)
    }

    fn default_params(&self) -> ParamSet {
        ParamSet::new()
            .with("period", self.period as f64)
            .with("oversold", self.oversold)
            .with("overbought", self.overbought)
    }
}
