//! Walk-forward optimization.
//!
//! The series is cut into rolling train/test windows. Parameters are fitted on
//! each training block and then scored, unchanged, on the test block that
//! follows it, so every reported number is out-of-sample. Windows that cannot
//! be scored are skipped and recorded; only run-wide problems (no data, not
//! enough data) are returned as errors.

use crate::calendar::fetch_start;
use crate::data::TimeSeriesSupplier;
use crate::diagnostics::{analyze_wfo, Alert};
use crate::error::{Result, WfoError};
use crate::search::{GridSearch, ParameterSearch, ScoringMetric, SearchSpace, TrialEvaluator};
use crate::signals::{signals_for_period, SignalGenerator, Signals};
use crate::simulator::{ExecutionConfig, PortfolioSimulator, VectorizedSimulator};
use crate::timeframe::Timeframe;
use crate::types::{ParamSet, PriceSeries};
use crate::window::{compute_windows, Window};
use chrono::{DateTime, NaiveDate, Utc};
use indicatif::{ProgressBar, ProgressStyle};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Window and execution settings for one run. Immutable while the run lasts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WfoConfig {
    /// Length of each training block, in months.
    pub train_months: u32,
    /// Length of each test block, in months. Windows advance by this much.
    pub test_months: u32,
    pub scoring_metric: ScoringMetric,
    /// First day of the first test block.
    pub start_date: NaiveDate,
    /// Last day of data to request.
    pub end_date: NaiveDate,
    /// Forwarded to the simulator untouched.
    pub execution: ExecutionConfig,
}

impl WfoConfig {
    /// 6-month training, 2-month test, Sharpe scoring, default execution.
    pub fn new(start_date: NaiveDate, end_date: NaiveDate) -> Self {
        Self {
            train_months: 6,
            test_months: 2,
            scoring_metric: ScoringMetric::Sharpe,
            start_date,
            end_date,
            execution: ExecutionConfig::default(),
        }
    }

    pub fn with_windows(mut self, train_months: u32, test_months: u32) -> Self {
        self.train_months = train_months;
        self.test_months = test_months;
        self
    }

    pub fn with_metric(mut self, metric: ScoringMetric) -> Self {
        self.scoring_metric = metric;
        self
    }

    pub fn with_execution(mut self, execution: ExecutionConfig) -> Self {
        self.execution = execution;
        self
    }

    pub fn initial_capital(&self) -> f64 {
        self.execution.initial_capital
    }

    pub fn validate(&self) -> Result<()> {
        if self.train_months == 0 || self.test_months == 0 {
            return Err(WfoError::ConfigError(format!(
                "Window lengths must be positive (train {} months, test {} months)",
                self.train_months, self.test_months
            )));
        }
        if self.start_date >= self.end_date {
            return Err(WfoError::ConfigError(format!(
                "Start date {} must be before end date {}",
                self.start_date, self.end_date
            )));
        }
        self.execution.validate()
    }
}

/// Tunable thresholds of the scheduler.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WfoPolicy {
    /// Training blocks with fewer bars are skipped.
    pub min_train_bars: usize,
    /// Test blocks producing fewer trades are skipped.
    pub min_test_trades: usize,
    /// Extra days fetched before the first training block.
    pub fetch_buffer_days: u32,
    /// Generate test signals over the training block too, so indicators are
    /// primed when the test block starts.
    pub warmup_signals: bool,
    /// Overrides the timeframe's bars-per-month estimate in the data check.
    pub bars_per_month: Option<f64>,
    pub show_progress: bool,
}

impl Default for WfoPolicy {
    fn default() -> Self {
        Self {
            min_train_bars: 50,
            min_test_trades: 5,
            fetch_buffer_days: 15,
            warmup_signals: true,
            bars_per_month: None,
            show_progress: false,
        }
    }
}

/// Out-of-sample result of one scored window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WindowResult {
    pub window: Window,
    pub chosen_params: ParamSet,
    /// The search failed and the previous window's parameters were reused.
    pub using_fallback: bool,
    pub test_trades: usize,
    pub test_return_pct: f64,
    pub test_sharpe: f64,
    pub test_max_drawdown_pct: f64,
    /// Best training score; `None` for fallback windows.
    pub train_score: Option<f64>,
    pub trials_evaluated: usize,
}

/// Why a window produced no result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum SkipReason {
    InsufficientTrainingData { found: usize, required: usize },
    NoFallbackParams { error: String },
    SignalFailure { error: String },
    SimulationFailure { error: String },
    TooFewTrades { found: usize, required: usize },
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::InsufficientTrainingData { found, required } => write!(
                f,
                "insufficient training data ({} bars, {} required)",
                found, required
            ),
            SkipReason::NoFallbackParams { error } => {
                write!(f, "search failed with no fallback parameters: {}", error)
            }
            SkipReason::SignalFailure { error } => write!(f, "signal generation failed: {}", error),
            SkipReason::SimulationFailure { error } => write!(f, "simulation failed: {}", error),
            SkipReason::TooFewTrades { found, required } => {
                write!(f, "too few test trades ({} < {})", found, required)
            }
        }
    }
}

/// A window that was skipped, and why.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SkippedWindow {
    pub window: Window,
    pub reason: SkipReason,
}

/// A scored window together with the test signals that produced it.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredWindow {
    pub result: WindowResult,
    /// Aligned to the window's test bars.
    pub signals: Signals,
}

/// What happened to a single window.
#[derive(Debug, Clone, PartialEq)]
pub enum WindowOutcome {
    Scored(Box<ScoredWindow>),
    Skipped(SkipReason),
    /// The test block has no bars: the data has run out and the run ends.
    Exhausted,
}

/// Most recent parameters the search produced in the current run.
///
/// Only read when a later search fails; never cleared.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LastKnownGoodParams {
    params: Option<ParamSet>,
}

impl LastKnownGoodParams {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, params: ParamSet) {
        self.params = Some(params);
    }

    pub fn get(&self) -> Option<&ParamSet> {
        self.params.as_ref()
    }
}

/// Outcome of a full walk-forward run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WfoReport {
    pub run_id: Uuid,
    pub symbol: String,
    pub timeframe: Timeframe,
    pub strategy: String,
    pub config: WfoConfig,
    /// Scored windows in test-date order.
    pub windows: Vec<WindowResult>,
    pub skipped: Vec<SkippedWindow>,
    pub alerts: Vec<Alert>,
    /// Set when the run could not be carried out at all.
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl WfoReport {
    /// An empty report for `symbol`.
    pub fn new(
        symbol: impl Into<String>,
        timeframe: Timeframe,
        strategy: impl Into<String>,
        config: WfoConfig,
    ) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            symbol: symbol.into(),
            timeframe,
            strategy: strategy.into(),
            config,
            windows: Vec::new(),
            skipped: Vec::new(),
            alerts: Vec::new(),
            error: None,
            created_at: Utc::now(),
        }
    }

    /// Mark the report as failed with `error` and refresh its alerts.
    pub fn failed(mut self, error: &WfoError) -> Self {
        self.error = Some(error.to_string());
        self.alerts = analyze_wfo(&self);
        self
    }

    pub fn is_failed(&self) -> bool {
        self.error.is_some()
    }

    /// Mean test return across scored windows, in percent.
    pub fn avg_test_return(&self) -> f64 {
        if self.windows.is_empty() {
            return 0.0;
        }
        self.windows.iter().map(|w| w.test_return_pct).sum::<f64>() / self.windows.len() as f64
    }

    /// Test returns compounded across windows, in percent.
    pub fn compounded_test_return(&self) -> f64 {
        let growth = self
            .windows
            .iter()
            .fold(1.0, |acc, w| acc * (1.0 + w.test_return_pct / 100.0));
        (growth - 1.0) * 100.0
    }

    pub fn fallback_count(&self) -> usize {
        self.windows.iter().filter(|w| w.using_fallback).count()
    }

    /// Share of scored windows with a positive test return.
    pub fn profitable_fraction(&self) -> f64 {
        if self.windows.is_empty() {
            return 0.0;
        }
        let profitable = self.windows.iter().filter(|w| w.test_return_pct > 0.0).count();
        profitable as f64 / self.windows.len() as f64
    }

    pub fn total_test_trades(&self) -> usize {
        self.windows.iter().map(|w| w.test_trades).sum()
    }

    /// Get a summary of the walk-forward run.
    pub fn summary(&self) -> String {
        format!(
            "Walk-Forward Optimization Summary ({} {}):\n\
             Windows scored: {}\n\
             Windows skipped: {}\n\
             Fallback windows: {}\n\
             Avg Test Return: {:.2}%\n\
             Compounded Test Return: {:.2}%\n\
             Profitable Windows: {:.0}%",
            self.symbol,
            self.timeframe,
            self.windows.len(),
            self.skipped.len(),
            self.fallback_count(),
            self.avg_test_return(),
            self.compounded_test_return(),
            self.profitable_fraction() * 100.0
        )
    }
}

/// Everything a run produced, including what the stitcher needs.
#[derive(Debug, Clone)]
pub(crate) struct WfoRun {
    pub series: PriceSeries,
    pub report: WfoReport,
    pub scored: Vec<ScoredWindow>,
}

/// Walk-forward optimizer wiring the data supplier, signal generator,
/// parameter search and simulator together.
pub struct WalkForwardOptimizer {
    supplier: Box<dyn TimeSeriesSupplier>,
    generator: Box<dyn SignalGenerator>,
    search: Box<dyn ParameterSearch>,
    simulator: Box<dyn PortfolioSimulator>,
    policy: WfoPolicy,
}

impl WalkForwardOptimizer {
    /// Create an optimizer using grid search and the vectorized simulator.
    pub fn new(supplier: Box<dyn TimeSeriesSupplier>, generator: Box<dyn SignalGenerator>) -> Self {
        Self {
            supplier,
            generator,
            search: Box::new(GridSearch::new()),
            simulator: Box::new(VectorizedSimulator::new()),
            policy: WfoPolicy::default(),
        }
    }

    pub fn with_search(mut self, search: Box<dyn ParameterSearch>) -> Self {
        self.search = search;
        self
    }

    pub fn with_simulator(mut self, simulator: Box<dyn PortfolioSimulator>) -> Self {
        self.simulator = simulator;
        self
    }

    pub fn with_policy(mut self, policy: WfoPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn policy(&self) -> &WfoPolicy {
        &self.policy
    }

    pub fn generator(&self) -> &dyn SignalGenerator {
        self.generator.as_ref()
    }

    pub fn simulator(&self) -> &dyn PortfolioSimulator {
        self.simulator.as_ref()
    }

    /// Bars needed to cover one training block plus one test block.
    pub fn required_bars(&self, timeframe: Timeframe, config: &WfoConfig) -> usize {
        let per_month = self
            .policy
            .bars_per_month
            .unwrap_or_else(|| timeframe.bars_per_month());
        ((config.train_months + config.test_months) as f64 * per_month).ceil() as usize
    }

    /// Fetch the series for a run, widened back to cover the first training
    /// block, and check there is enough of it.
    pub fn fetch_series(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        config: &WfoConfig,
    ) -> Result<PriceSeries> {
        let from = fetch_start(
            config.start_date,
            config.train_months,
            self.policy.fetch_buffer_days,
        )?;
        info!(
            "Fetching {} {} from {} to {}",
            symbol, timeframe, from, config.end_date
        );
        let series = self
            .supplier
            .fetch(symbol, timeframe, from, config.end_date)?
            .restrict(from, config.end_date);

        let required = self.required_bars(timeframe, config);
        if series.len() < required {
            return Err(WfoError::InsufficientData {
                required,
                found: series.len(),
            });
        }
        info!("Loaded {} bars for {}", series.len(), symbol);
        Ok(series)
    }

    /// Run walk-forward optimization for one symbol.
    pub fn run_wfo(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        config: &WfoConfig,
        space: &SearchSpace,
    ) -> Result<WfoReport> {
        Ok(self.execute(symbol, timeframe, config, space)?.report)
    }

    /// Run independent walk-forward optimizations for several symbols in
    /// parallel. A symbol whose run fails gets a failed report.
    pub fn run_many<S>(
        &self,
        symbols: &[S],
        timeframe: Timeframe,
        config: &WfoConfig,
        space: &SearchSpace,
    ) -> Vec<WfoReport>
    where
        S: AsRef<str> + Sync,
    {
        symbols
            .par_iter()
            .map(|symbol| {
                let symbol = symbol.as_ref();
                self.run_wfo(symbol, timeframe, config, space)
                    .unwrap_or_else(|e| {
                        warn!("Walk-forward run for {} failed: {}", symbol, e);
                        WfoReport::new(symbol, timeframe, self.generator.name(), config.clone())
                            .failed(&e)
                    })
            })
            .collect()
    }

    pub(crate) fn execute(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        config: &WfoConfig,
        space: &SearchSpace,
    ) -> Result<WfoRun> {
        config.validate()?;
        space.validate()?;

        let series = self.fetch_series(symbol, timeframe, config)?;
        let last_date = series.last_date().ok_or(WfoError::NoData)?;
        let schedule = compute_windows(
            config.start_date,
            last_date,
            config.train_months,
            config.test_months,
        )?;

        let planned = schedule.clone().count();
        info!(
            "Running walk-forward optimization for {} with {}: {} windows ({}m train / {}m test, {} search)",
            symbol,
            self.generator.name(),
            planned,
            config.train_months,
            config.test_months,
            self.search.name()
        );

        let progress = self.policy.show_progress.then(|| window_progress(planned));
        let mut last_good = LastKnownGoodParams::new();
        let mut scored = Vec::new();
        let mut skipped = Vec::new();

        for window in schedule {
            debug!(
                "Window {}: train {}..{}, test {}..{}",
                window.index, window.train_start, window.train_end, window.test_start, window.test_end
            );
            match self.run_window(&window, &series, space, config, &mut last_good) {
                WindowOutcome::Scored(result) => scored.push(*result),
                WindowOutcome::Skipped(reason) => skipped.push(SkippedWindow { window, reason }),
                WindowOutcome::Exhausted => {
                    info!("No test data from {}; stopping", window.test_start);
                    break;
                }
            }
            if let Some(pb) = &progress {
                pb.inc(1);
            }
        }
        if let Some(pb) = progress {
            pb.finish_and_clear();
        }

        let mut report = WfoReport::new(symbol, timeframe, self.generator.name(), config.clone());
        report.windows = scored.iter().map(|s| s.result.clone()).collect();
        report.skipped = skipped;
        report.alerts = analyze_wfo(&report);
        info!(
            "Walk-forward for {} done: {} scored, {} skipped, avg test return {:.2}%",
            symbol,
            report.windows.len(),
            report.skipped.len(),
            report.avg_test_return()
        );

        Ok(WfoRun {
            series,
            report,
            scored,
        })
    }

    /// Fit and score a single window.
    ///
    /// `last_good` is updated after a successful search and read when the
    /// search fails.
    pub fn run_window(
        &self,
        window: &Window,
        series: &PriceSeries,
        space: &SearchSpace,
        config: &WfoConfig,
        last_good: &mut LastKnownGoodParams,
    ) -> WindowOutcome {
        let train = series.slice_dates(window.train_start, window.train_end);
        if train.len() < self.policy.min_train_bars {
            warn!(
                "Window {} skipped: {} training bars, {} required",
                window.index,
                train.len(),
                self.policy.min_train_bars
            );
            return WindowOutcome::Skipped(SkipReason::InsufficientTrainingData {
                found: train.len(),
                required: self.policy.min_train_bars,
            });
        }

        let test = series.slice_dates(window.test_start, window.test_end);
        if test.is_empty() {
            return WindowOutcome::Exhausted;
        }

        let evaluator = TrialEvaluator::new(
            self.generator.as_ref(),
            self.simulator.as_ref(),
            &config.execution,
        );
        let (params, using_fallback, train_score, trials_evaluated) =
            match self.search.fit(train, space, config.scoring_metric, &evaluator) {
                Ok(outcome) => {
                    debug!(
                        "Window {}: best {} = {:.4} with {} after {} trials",
                        window.index,
                        config.scoring_metric,
                        outcome.best_score,
                        outcome.best_params,
                        outcome.trials.len()
                    );
                    last_good.record(outcome.best_params.clone());
                    (
                        outcome.best_params,
                        false,
                        Some(outcome.best_score),
                        outcome.trials.len(),
                    )
                }
                Err(e) => match last_good.get() {
                    Some(previous) => {
                        warn!(
                            "Window {}: search failed ({}), reusing {}",
                            window.index, e, previous
                        );
                        (previous.clone(), true, None, 0)
                    }
                    None => {
                        warn!(
                            "Window {} skipped: search failed with no fallback ({})",
                            window.index, e
                        );
                        return WindowOutcome::Skipped(SkipReason::NoFallbackParams {
                            error: e.to_string(),
                        });
                    }
                },
            };

        let warmup_start = self.policy.warmup_signals.then_some(window.train_start);
        let signals = match signals_for_period(
            self.generator.as_ref(),
            series.bars(),
            &params,
            window.test_start,
            window.test_end,
            warmup_start,
        ) {
            Ok(signals) => signals,
            Err(e) => {
                warn!("Window {} skipped: signal generation failed ({})", window.index, e);
                return WindowOutcome::Skipped(SkipReason::SignalFailure {
                    error: e.to_string(),
                });
            }
        };

        let result = match self.simulator.simulate(test, &signals, &config.execution) {
            Ok(result) => result,
            Err(e) => {
                warn!("Window {} skipped: simulation failed ({})", window.index, e);
                return WindowOutcome::Skipped(SkipReason::SimulationFailure {
                    error: e.to_string(),
                });
            }
        };

        if result.trade_count < self.policy.min_test_trades {
            warn!(
                "Window {} skipped: {} test trades, {} required",
                window.index, result.trade_count, self.policy.min_test_trades
            );
            return WindowOutcome::Skipped(SkipReason::TooFewTrades {
                found: result.trade_count,
                required: self.policy.min_test_trades,
            });
        }

        WindowOutcome::Scored(Box::new(ScoredWindow {
            result: WindowResult {
                window: *window,
                chosen_params: params,
                using_fallback,
                test_trades: result.trade_count,
                test_return_pct: result.total_return_pct,
                test_sharpe: result.sharpe_ratio,
                test_max_drawdown_pct: result.max_drawdown_pct,
                train_score,
                trials_evaluated,
            },
            signals,
        }))
    }
}

fn window_progress(len: usize) -> ProgressBar {
    let pb = ProgressBar::new(len as u64);
    let style = ProgressStyle::default_bar()
        .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] window {pos}/{len} ({eta})")
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("#>-");
    pb.set_style(style);
    pb
}
