//! Signal-driven portfolio simulation.
//!
//! Turns entry/exit signal sequences into trades, an equity curve and the
//! summary statistics the walk-forward engine scores windows with.

use crate::analytics::{annualized_return_pct, calculate_calmar, calculate_sharpe, calculate_sortino};
use crate::error::{Result, WfoError};
use crate::signals::Signals;
use crate::types::{Bar, EquityPoint, Trade};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Execution settings forwarded to the simulator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionConfig {
    /// Starting cash.
    pub initial_capital: f64,
    /// Proportional fee per fill, as a fraction of notional (0.001 = 0.1%).
    pub fees_pct: f64,
    /// Adverse price adjustment per fill, as a fraction of price.
    pub slippage_pct: f64,
    /// Fraction of equity committed on each entry (0.0 to 1.0].
    pub position_size: f64,
    /// Allow fractional quantities.
    pub fractional_shares: bool,
    /// Bars per year used to annualize Sharpe and Sortino.
    pub periods_per_year: f64,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            initial_capital: 100_000.0,
            fees_pct: 0.001,
            slippage_pct: 0.0005,
            position_size: 1.0,
            fractional_shares: true,
            periods_per_year: 252.0,
        }
    }
}

impl ExecutionConfig {
    /// Frictionless execution, mainly for tests and what-if runs.
    pub fn frictionless(initial_capital: f64) -> Self {
        Self {
            initial_capital,
            fees_pct: 0.0,
            slippage_pct: 0.0,
            ..Default::default()
        }
    }

    pub fn validate(&self) -> Result<()> {
        if !self.initial_capital.is_finite() || self.initial_capital <= 0.0 {
            return Err(WfoError::ConfigError(
                "Initial capital must be positive".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.position_size) || self.position_size == 0.0 {
            return Err(WfoError::ConfigError(format!(
                "Position size must be in (0, 1], got {}",
                self.position_size
            )));
        }
        if self.fees_pct < 0.0 || self.slippage_pct < 0.0 {
            return Err(WfoError::ConfigError(
                "Fees and slippage cannot be negative".to_string(),
            ));
        }
        if !self.periods_per_year.is_finite() || self.periods_per_year <= 0.0 {
            return Err(WfoError::ConfigError(
                "periods_per_year must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

/// Outcome of one simulation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulationResult {
    pub initial_capital: f64,
    pub final_equity: f64,
    /// Total return percentage.
    pub total_return_pct: f64,
    /// Annual return percentage (CAGR).
    pub annual_return_pct: f64,
    /// Sharpe ratio (annualized).
    pub sharpe_ratio: f64,
    /// Sortino ratio (annualized).
    pub sortino_ratio: f64,
    /// Maximum drawdown percentage, as a positive number.
    pub max_drawdown_pct: f64,
    /// Calmar ratio (CAGR / max drawdown).
    pub calmar_ratio: f64,
    /// Number of round-trip trades.
    pub trade_count: usize,
    /// Win rate percentage.
    pub win_rate: f64,
    /// Percentage of bars spent holding a position.
    pub exposure_pct: f64,
    pub trades: Vec<Trade>,
    pub equity_curve: Vec<EquityPoint>,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
}

/// Turns signals into P&L.
pub trait PortfolioSimulator: Send + Sync {
    fn simulate(
        &self,
        bars: &[Bar],
        signals: &Signals,
        config: &ExecutionConfig,
    ) -> Result<SimulationResult>;
}

/// Long-only, single-position simulator.
///
/// Fills happen at the signal bar's close, moved against the trader by the
/// slippage fraction. An entry is ignored while a position is open, on a bar
/// that also carries an exit, and on the final bar. Any position still open
/// on the last bar is closed there so every trade is realized.
#[derive(Debug, Clone, Copy, Default)]
pub struct VectorizedSimulator;

#[derive(Debug, Clone, Copy)]
struct OpenPosition {
    entry_time: DateTime<Utc>,
    entry_price: f64,
    quantity: f64,
    entry_fee: f64,
}

impl VectorizedSimulator {
    pub fn new() -> Self {
        Self
    }

    fn close_position(
        position: OpenPosition,
        bar: &Bar,
        config: &ExecutionConfig,
        cash: &mut f64,
    ) -> Trade {
        let exit_price = bar.close * (1.0 - config.slippage_pct);
        let proceeds = position.quantity * exit_price;
        let exit_fee = proceeds * config.fees_pct;
        *cash += proceeds - exit_fee;

        let cost = position.quantity * position.entry_price + position.entry_fee;
        let pnl = proceeds - exit_fee - cost;
        Trade {
            entry_time: position.entry_time,
            entry_price: position.entry_price,
            exit_time: bar.timestamp,
            exit_price,
            quantity: position.quantity,
            fees: position.entry_fee + exit_fee,
            pnl,
            return_pct: if cost > 0.0 { pnl / cost * 100.0 } else { 0.0 },
        }
    }
}

impl PortfolioSimulator for VectorizedSimulator {
    fn simulate(
        &self,
        bars: &[Bar],
        signals: &Signals,
        config: &ExecutionConfig,
    ) -> Result<SimulationResult> {
        config.validate()?;
        if bars.is_empty() {
            return Err(WfoError::SimulationError(
                "Cannot simulate an empty price slice".to_string(),
            ));
        }
        signals
            .check_aligned()
            .map_err(|e| WfoError::SimulationError(e.to_string()))?;
        if signals.len() != bars.len() {
            return Err(WfoError::SimulationError(format!(
                "Signals cover {} bars but the price slice has {}",
                signals.len(),
                bars.len()
            )));
        }

        let mut cash = config.initial_capital;
        let mut position: Option<OpenPosition> = None;
        let mut trades = Vec::new();
        let mut equity_curve = Vec::with_capacity(bars.len());
        let mut peak = config.initial_capital;
        let mut bars_in_market = 0usize;
        let last = bars.len() - 1;

        for (i, bar) in bars.iter().enumerate() {
            match position {
                Some(open) if signals.exits[i] || i == last => {
                    trades.push(Self::close_position(open, bar, config, &mut cash));
                    position = None;
                }
                None if signals.entries[i] && !signals.exits[i] && i < last => {
                    let entry_price = bar.close * (1.0 + config.slippage_pct);
                    let budget = cash * config.position_size;
                    let mut quantity = budget / (entry_price * (1.0 + config.fees_pct));
                    if !config.fractional_shares {
                        quantity = quantity.floor();
                    }
                    if quantity > 0.0 {
                        let entry_fee = quantity * entry_price * config.fees_pct;
                        cash -= quantity * entry_price + entry_fee;
                        position = Some(OpenPosition {
                            entry_time: bar.timestamp,
                            entry_price,
                            quantity,
                            entry_fee,
                        });
                    }
                }
                _ => {}
            }

            let position_value = position.map(|p| p.quantity * bar.close).unwrap_or(0.0);
            if position.is_some() {
                bars_in_market += 1;
            }
            let equity = cash + position_value;
            peak = peak.max(equity);
            let drawdown_pct = if peak > 0.0 {
                (peak - equity) / peak * 100.0
            } else {
                0.0
            };
            equity_curve.push(EquityPoint {
                timestamp: bar.timestamp,
                equity,
                cash,
                position_value,
                drawdown_pct,
            });
        }

        let final_equity = equity_curve
            .last()
            .map(|e| e.equity)
            .unwrap_or(config.initial_capital);
        let total_return_pct =
            (final_equity - config.initial_capital) / config.initial_capital * 100.0;

        let start_time = bars[0].timestamp;
        let end_time = bars[last].timestamp;
        let annual_return_pct =
            annualized_return_pct(config.initial_capital, final_equity, start_time, end_time);

        let max_drawdown_pct = equity_curve
            .iter()
            .map(|e| e.drawdown_pct)
            .fold(0.0_f64, f64::max);

        let returns: Vec<f64> = equity_curve
            .windows(2)
            .map(|w| (w[1].equity - w[0].equity) / w[0].equity)
            .collect();

        let winners = trades.iter().filter(|t| t.is_winner()).count();
        let win_rate = if trades.is_empty() {
            0.0
        } else {
            winners as f64 / trades.len() as f64 * 100.0
        };

        Ok(SimulationResult {
            initial_capital: config.initial_capital,
            final_equity,
            total_return_pct,
            annual_return_pct,
            sharpe_ratio: calculate_sharpe(&returns, config.periods_per_year),
            sortino_ratio: calculate_sortino(&returns, config.periods_per_year),
            max_drawdown_pct,
            calmar_ratio: calculate_calmar(annual_return_pct, max_drawdown_pct),
            trade_count: trades.len(),
            win_rate,
            exposure_pct: bars_in_market as f64 / bars.len() as f64 * 100.0,
            trades,
            equity_curve,
            start_time,
            end_time,
        })
    }
}
