//! Built-in signal generators.
//!
//! - [`SmaCrossover`]: Simple Moving Average crossover
//! - [`MeanReversion`]: Z-score mean reversion
//! - [`RsiStrategy`]: RSI overbought/oversold
//!
//! Use [`strategy_by_name`] to look one up from a configuration string.

mod mean_reversion;
mod rsi_strategy;
mod sma_crossover;

pub use mean_reversion::MeanReversion;
pub use rsi_strategy::RsiStrategy;
pub use sma_crossover::SmaCrossover;

use crate::error::{Result, WfoError};
use crate::signals::SignalGenerator;

/// Registry names and one-line descriptions of the built-in generators.
pub fn available_strategies() -> Vec<(&'static str, &'static str)> {
    vec![
        (
            "sma-crossover",
            "Fast/slow SMA crossover (fast_period, slow_period)",
        ),
        (
            "mean-reversion",
            "Z-score reversion to the SMA (period, entry_z, exit_z)",
        ),
        ("rsi", "RSI oversold entry / overbought exit (period, oversold, overbought)"),
    ]
}

/// Look up a built-in generator by registry name.
pub fn strategy_by_name(name: &str) -> Result<Box<dyn SignalGenerator>> {
    match name.trim().to_lowercase().replace('_', "-").as_str() {
        "sma-crossover" | "sma" => Ok(Box::new(SmaCrossover::default())),
        "mean-reversion" => Ok(Box::new(MeanReversion::default())),
        "rsi" => Ok(Box::new(RsiStrategy::default())),
        other => Err(WfoError::ConfigError(format!(
            "Unknown strategy '{}'. Available: {}",
            other,
            available_strategies()
                .iter()
                .map(|(n, _)| *n)
                .collect::<Vec<_>>()
                .join(", ")
        ))),
    }
}
