//! Out-of-sample stitching.
//!
//! Each scored window contributes the signals of its own test block to one
//! master signal series. The stitched series is simulated once, giving a
//! single equity curve for the strategy as it would have been re-fitted and
//! traded through time.

use crate::diagnostics::Alert;
use crate::error::{Result, WfoError};
use crate::search::SearchSpace;
use crate::signals::Signals;
use crate::simulator::{ExecutionConfig, PortfolioSimulator, SimulationResult};
use crate::timeframe::Timeframe;
use crate::types::{ParamSet, PriceSeries};
use crate::walkforward::{ScoredWindow, WalkForwardOptimizer, WfoConfig, WfoReport};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

/// Parameters that were live during one test block.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParamHistoryEntry {
    pub window_index: usize,
    pub test_start: NaiveDate,
    pub test_end: NaiveDate,
    pub params: ParamSet,
    pub using_fallback: bool,
}

/// One continuous out-of-sample portfolio.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OosPortfolio {
    /// Aggregate simulation over the stitched region.
    pub result: SimulationResult,
    /// Stitched signals; their timestamps are the region's price index.
    pub signals: Signals,
    pub param_history: Vec<ParamHistoryEntry>,
    pub alerts: Vec<Alert>,
}

impl OosPortfolio {
    /// Price index of the stitched region.
    pub fn timestamps(&self) -> &[DateTime<Utc>] {
        &self.signals.timestamps
    }

    pub fn oos_start(&self) -> Option<NaiveDate> {
        self.signals.timestamps.first().map(|t| t.date_naive())
    }

    pub fn oos_end(&self) -> Option<NaiveDate> {
        self.signals.timestamps.last().map(|t| t.date_naive())
    }

    /// The history entry whose test block contains `date`.
    pub fn params_active_at(&self, date: NaiveDate) -> Option<&ParamHistoryEntry> {
        self.param_history
            .iter()
            .find(|e| date >= e.test_start && date <= e.test_end)
    }
}

/// Stitch the test signals of `windows` onto `master` and simulate the result.
///
/// The region runs from `oos_start` (the first test day of the schedule) to
/// the last scored test day. Dates inside it that belong to no scored window
/// carry no signal.
pub fn stitch(
    windows: &[ScoredWindow],
    master: &PriceSeries,
    oos_start: NaiveDate,
    simulator: &dyn PortfolioSimulator,
    execution: &ExecutionConfig,
) -> Result<OosPortfolio> {
    let oos_end = windows
        .iter()
        .map(|w| w.result.window.test_end)
        .max()
        .ok_or(WfoError::NoOosData)?;

    let mut entries = vec![false; master.len()];
    let mut exits = vec![false; master.len()];
    for scored in windows {
        let signals = &scored.signals;
        for (i, ts) in signals.timestamps.iter().enumerate() {
            if let Some(pos) = master.index_of(*ts) {
                entries[pos] = signals.entries[i];
                exits[pos] = signals.exits[i];
            }
        }
    }

    let range = master.range_indices(oos_start, oos_end);
    if range.is_empty() {
        return Err(WfoError::NoOosData);
    }
    let bars = &master.bars()[range.clone()];
    let signals = Signals::new(
        bars.iter().map(|b| b.timestamp).collect(),
        entries[range.clone()].to_vec(),
        exits[range].to_vec(),
    )?;

    let result = simulator.simulate(bars, &signals, execution)?;
    info!(
        "Stitched {} windows into {} out-of-sample bars ({} to {}): return {:.2}%, {} trades",
        windows.len(),
        bars.len(),
        oos_start,
        oos_end,
        result.total_return_pct,
        result.trade_count
    );

    let param_history = windows
        .iter()
        .map(|w| ParamHistoryEntry {
            window_index: w.result.window.index,
            test_start: w.result.window.test_start,
            test_end: w.result.window.test_end,
            params: w.result.chosen_params.clone(),
            using_fallback: w.result.using_fallback,
        })
        .collect();

    Ok(OosPortfolio {
        result,
        signals,
        param_history,
        alerts: Vec::new(),
    })
}

impl WalkForwardOptimizer {
    /// Run walk-forward optimization and stitch every scored window into one
    /// out-of-sample portfolio.
    ///
    /// Fails with `NoOosData` when no window could be scored.
    pub fn generate_wfo_portfolio(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        config: &WfoConfig,
        space: &SearchSpace,
    ) -> Result<OosPortfolio> {
        let run = self.execute(symbol, timeframe, config, space)?;
        let mut portfolio = stitch(
            &run.scored,
            &run.series,
            config.start_date,
            self.simulator(),
            &config.execution,
        )?;
        portfolio.alerts = run.report.alerts;
        Ok(portfolio)
    }

    /// Run once and return both the report and, when any window was scored,
    /// the stitched portfolio.
    pub fn run_wfo_with_portfolio(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        config: &WfoConfig,
        space: &SearchSpace,
    ) -> Result<(WfoReport, Option<OosPortfolio>)> {
        let run = self.execute(symbol, timeframe, config, space)?;
        let portfolio = match stitch(
            &run.scored,
            &run.series,
            config.start_date,
            self.simulator(),
            &config.execution,
        ) {
            Ok(mut p) => {
                p.alerts = run.report.alerts.clone();
                Some(p)
            }
            Err(WfoError::NoOosData) => None,
            Err(e) => return Err(e),
        };
        Ok((run.report, portfolio))
    }
}
