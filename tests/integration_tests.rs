//! Integration tests for the walk-forward engine.

use chrono::{NaiveDate, TimeZone, Utc};
use std::f64::consts::PI;
use std::fs;
use std::io::Write;
use std::sync::atomic::{AtomicUsize, Ordering};
use tempfile::tempdir;

use wfo_engine::config::WfoFileConfig;
use wfo_engine::data::{CsvDirectorySupplier, InMemorySupplier};
use wfo_engine::diagnostics::{analyze_wfo, AlertLevel};
use wfo_engine::error::{Result, WfoError};
use wfo_engine::signals::{SignalGenerator, Signals};
use wfo_engine::simulator::{
    ExecutionConfig, PortfolioSimulator, SimulationResult, VectorizedSimulator,
};
use wfo_engine::search::{
    GridSearch, ParamRange, ParameterSearch, ScoringMetric, SearchOutcome, SearchSpace,
    TrialEvaluator,
};
use wfo_engine::strategies::MeanReversion;
use wfo_engine::timeframe::Timeframe;
use wfo_engine::types::{Bar, ParamSet, PriceSeries};
use wfo_engine::walkforward::{
    SkipReason, WalkForwardOptimizer, WfoConfig, WfoPolicy, WfoReport, WindowResult,
};
use wfo_engine::window::Window;

fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

/// Daily bars from 2023-01-01 whose close swings ±10 around 100 every 10 bars.
fn create_oscillating_bars(count: usize) -> Vec<Bar> {
    let origin = Utc.with_ymd_and_hms(2023, 1, 1, 0, 0, 0).unwrap();
    (0..count)
        .map(|i| {
            let close = 100.0 + 10.0 * (2.0 * PI * i as f64 / 10.0).sin();
            Bar::new(
                origin + chrono::Duration::days(i as i64),
                close,
                close + 1.0,
                close - 1.0,
                close,
                1000.0,
            )
        })
        .collect()
}

fn create_series(count: usize) -> PriceSeries {
    PriceSeries::new(create_oscillating_bars(count)).unwrap()
}

fn create_optimizer(series: PriceSeries) -> WalkForwardOptimizer {
    let supplier = InMemorySupplier::new().with_series("TEST", Timeframe::Day, series);
    WalkForwardOptimizer::new(Box::new(supplier), Box::new(MeanReversion::default()))
}

/// Test blocks Mar-Apr, May-Jun and Jul-Aug 2023 fit inside 300 daily bars.
fn create_config() -> WfoConfig {
    WfoConfig::new(date(2023, 3, 1), date(2023, 12, 31)).with_windows(6, 2)
}

fn period_space() -> SearchSpace {
    SearchSpace::new().with("period", ParamRange::fixed(10.0))
}

/// Delegates to a grid search except on the calls listed in `fail_on`.
struct FlakySearch {
    calls: AtomicUsize,
    fail_on: Vec<usize>,
    inner: GridSearch,
}

impl FlakySearch {
    fn failing_on(fail_on: Vec<usize>) -> Self {
        Self {
            calls: AtomicUsize::new(0),
            fail_on,
            inner: GridSearch::new(),
        }
    }
}

impl ParameterSearch for FlakySearch {
    fn name(&self) -> &str {
        "flaky"
    }

    fn fit(
        &self,
        train: &[Bar],
        space: &SearchSpace,
        metric: ScoringMetric,
        evaluator: &TrialEvaluator<'_>,
    ) -> Result<SearchOutcome> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if self.fail_on.contains(&call) {
            return Err(WfoError::OptimizationError(format!("call {} failed", call)));
        }
        self.inner.fit(train, space, metric, evaluator)
    }
}

/// True when a slice is the May-Jun 2023 test block of the second window.
///
/// Every training slice starts on the first bar of the series, so only the
/// second window's test slice starts on May 1.
fn is_second_test_block(bars: &[Bar]) -> bool {
    bars.first()
        .map_or(false, |b| b.timestamp.date_naive() == date(2023, 5, 1))
}

fn cold_start_policy() -> WfoPolicy {
    WfoPolicy {
        warmup_signals: false,
        min_test_trades: 1,
        ..Default::default()
    }
}

/// Vectorized simulation that errors on the second window's test block.
struct FailingSimulator;

impl PortfolioSimulator for FailingSimulator {
    fn simulate(
        &self,
        bars: &[Bar],
        signals: &Signals,
        config: &ExecutionConfig,
    ) -> Result<SimulationResult> {
        if is_second_test_block(bars) {
            return Err(WfoError::SimulationError("broker rejected orders".to_string()));
        }
        VectorizedSimulator.simulate(bars, signals, config)
    }
}

/// Mean reversion whose output on the second test block is unusable.
///
/// `misaligned` returns entries for only half of the bars instead of an error.
struct BrokenGenerator {
    inner: MeanReversion,
    misaligned: bool,
    always: bool,
}

impl BrokenGenerator {
    fn erroring() -> Self {
        Self {
            inner: MeanReversion::default(),
            misaligned: false,
            always: false,
        }
    }

    fn misaligned() -> Self {
        Self {
            misaligned: true,
            ..Self::erroring()
        }
    }

    fn always_misaligned() -> Self {
        Self {
            always: true,
            ..Self::misaligned()
        }
    }
}

impl SignalGenerator for BrokenGenerator {
    fn name(&self) -> &str {
        "Broken Mean Reversion"
    }

    fn signals(&self, bars: &[Bar], params: &ParamSet) -> Result<Signals> {
        if !self.always && !is_second_test_block(bars) {
            return self.inner.signals(bars, params);
        }
        if self.misaligned {
            let n = bars.len() / 2;
            return Ok(Signals {
                timestamps: bars.iter().map(|b| b.timestamp).collect(),
                entries: vec![true; n],
                exits: vec![false; n],
            });
        }
        Err(WfoError::StrategyError("indicator feed dropped".to_string()))
    }

    fn default_params(&self) -> ParamSet {
        self.inner.default_params()
    }
}

fn create_broken_optimizer(generator: BrokenGenerator) -> WalkForwardOptimizer {
    let supplier = InMemorySupplier::new().with_series("TEST", Timeframe::Day, create_series(300));
    WalkForwardOptimizer::new(Box::new(supplier), Box::new(generator)).with_policy(cold_start_policy())
}

fn window_result(index: usize, test_return_pct: f64, test_trades: usize) -> WindowResult {
    let test_start = date(2023, 1, 1) + chrono::Months::new(2 * (index as u32 - 1));
    WindowResult {
        window: Window {
            index,
            train_start: test_start - chrono::Months::new(6),
            train_end: test_start - chrono::Duration::days(1),
            test_start,
            test_end: test_start + chrono::Months::new(2) - chrono::Duration::days(1),
        },
        chosen_params: ParamSet::new().with("period", 10.0),
        using_fallback: false,
        test_trades,
        test_return_pct,
        test_sharpe: 0.5,
        test_max_drawdown_pct: 3.0,
        train_score: Some(1.0),
        trials_evaluated: 1,
    }
}

#[test]
fn test_end_to_end_walk_forward() {
    let optimizer = create_optimizer(create_series(300));
    let report = optimizer
        .run_wfo("TEST", Timeframe::Day, &create_config(), &period_space())
        .unwrap();

    assert!(!report.is_failed());
    assert_eq!(report.windows.len(), 3);
    assert!(report.skipped.is_empty());

    let test_starts: Vec<NaiveDate> = report.windows.iter().map(|w| w.window.test_start).collect();
    assert_eq!(
        test_starts,
        vec![date(2023, 3, 1), date(2023, 5, 1), date(2023, 7, 1)]
    );
    for (i, w) in report.windows.iter().enumerate() {
        assert_eq!(w.window.index, i + 1);
        assert!(w.window.train_end < w.window.test_start);
        assert_eq!(w.chosen_params, ParamSet::new().with("period", 10.0));
        assert!(!w.using_fallback);
        assert!(w.test_trades >= 5);
    }
    assert_eq!(report.fallback_count(), 0);
    assert!(!report.alerts.is_empty());
}

#[test]
fn test_grid_search_picks_from_space() {
    let optimizer = create_optimizer(create_series(300));
    let space = SearchSpace::new()
        .with("period", ParamRange::new(8.0, 12.0, 2.0))
        .with("entry_z", ParamRange::new(1.0, 1.5, 0.5));
    let report = optimizer
        .run_wfo("TEST", Timeframe::Day, &create_config(), &space)
        .unwrap();

    for w in &report.windows {
        assert_eq!(w.trials_evaluated, 6);
        let period = w.chosen_params.get("period").unwrap();
        assert!([8.0, 10.0, 12.0].contains(&period));
        assert!(w.train_score.is_some());
    }
}

#[test]
fn test_failed_search_falls_back_to_previous_window() {
    let optimizer = create_optimizer(create_series(300))
        .with_search(Box::new(FlakySearch::failing_on(vec![2])));
    let report = optimizer
        .run_wfo("TEST", Timeframe::Day, &create_config(), &period_space())
        .unwrap();

    assert_eq!(report.windows.len(), 3);
    assert!(!report.windows[0].using_fallback);
    assert!(report.windows[1].using_fallback);
    assert_eq!(report.windows[1].chosen_params, report.windows[0].chosen_params);
    assert_eq!(report.windows[1].train_score, None);
    assert!(!report.windows[2].using_fallback);
    assert_eq!(report.fallback_count(), 1);
}

#[test]
fn test_failed_first_search_skips_window() {
    let optimizer = create_optimizer(create_series(300))
        .with_search(Box::new(FlakySearch::failing_on(vec![1])));
    let report = optimizer
        .run_wfo("TEST", Timeframe::Day, &create_config(), &period_space())
        .unwrap();

    assert_eq!(report.skipped.len(), 1);
    assert_eq!(report.skipped[0].window.index, 1);
    assert!(matches!(
        report.skipped[0].reason,
        SkipReason::NoFallbackParams { .. }
    ));
    assert_eq!(report.windows.len(), 2);
    assert!(report.windows.iter().all(|w| !w.using_fallback));
}

#[test]
fn test_min_trade_filter_empties_report() {
    let optimizer = create_optimizer(create_series(300)).with_policy(WfoPolicy {
        min_test_trades: 50,
        ..Default::default()
    });
    let report = optimizer
        .run_wfo("TEST", Timeframe::Day, &create_config(), &period_space())
        .unwrap();

    assert!(report.windows.is_empty());
    assert!(!report.is_failed());
    assert_eq!(report.skipped.len(), 3);
    assert!(report
        .skipped
        .iter()
        .all(|s| matches!(s.reason, SkipReason::TooFewTrades { required: 50, .. })));
    assert_eq!(report.alerts.len(), 1);
    assert_eq!(report.alerts[0].level, AlertLevel::Error);
}

#[test]
fn test_insufficient_data() {
    let optimizer = create_optimizer(create_series(100));
    let result = optimizer.run_wfo("TEST", Timeframe::Day, &create_config(), &period_space());

    match result {
        Err(WfoError::InsufficientData { required, found }) => {
            assert_eq!(required, 168);
            assert_eq!(found, 100);
        }
        other => panic!("expected InsufficientData, got {:?}", other),
    }
}

#[test]
fn test_oos_portfolio_covers_every_test_day_once() {
    let optimizer = create_optimizer(create_series(300));
    let portfolio = optimizer
        .generate_wfo_portfolio("TEST", Timeframe::Day, &create_config(), &period_space())
        .unwrap();

    assert_eq!(portfolio.oos_start(), Some(date(2023, 3, 1)));
    assert_eq!(portfolio.oos_end(), Some(date(2023, 8, 31)));
    assert_eq!(portfolio.timestamps().len(), 184);
    assert_eq!(portfolio.result.equity_curve.len(), 184);
    assert_eq!(portfolio.param_history.len(), 3);
    assert!(portfolio.result.trade_count >= 15);

    for ts in portfolio.timestamps() {
        let covering = portfolio
            .param_history
            .iter()
            .filter(|e| ts.date_naive() >= e.test_start && ts.date_naive() <= e.test_end)
            .count();
        assert_eq!(covering, 1, "{} covered {} times", ts, covering);
    }
}

#[test]
fn test_run_with_portfolio_matches_separate_runs() {
    let optimizer = create_optimizer(create_series(300));
    let (report, portfolio) = optimizer
        .run_wfo_with_portfolio("TEST", Timeframe::Day, &create_config(), &period_space())
        .unwrap();

    let portfolio = portfolio.unwrap();
    assert_eq!(report.windows.len(), portfolio.param_history.len());
    assert_eq!(portfolio.alerts, report.alerts);
}

#[test]
fn test_portfolio_without_scored_windows_is_no_oos_data() {
    let optimizer = create_optimizer(create_series(300)).with_policy(WfoPolicy {
        min_test_trades: 50,
        ..Default::default()
    });
    let result = optimizer.generate_wfo_portfolio(
        "TEST",
        Timeframe::Day,
        &create_config(),
        &period_space(),
    );
    assert!(matches!(result, Err(WfoError::NoOosData)));

    let (report, portfolio) = optimizer
        .run_wfo_with_portfolio("TEST", Timeframe::Day, &create_config(), &period_space())
        .unwrap();
    assert!(report.windows.is_empty());
    assert!(portfolio.is_none());
}

#[test]
fn test_diagnostics_flag_losing_regimes() {
    let mut report = WfoReport::new("TEST", Timeframe::Day, "Mean Reversion", create_config());
    report.windows = vec![
        window_result(1, -5.0, 6),
        window_result(2, -2.0, 6),
        window_result(3, 1.0, 6),
    ];
    let alerts = analyze_wfo(&report);
    assert_eq!(alerts.len(), 1);
    assert_eq!(alerts[0].level, AlertLevel::Warning);
    assert_eq!(alerts[0].title, "Strategy inconsistent across regimes");

    report.windows = vec![
        window_result(1, 5.0, 6),
        window_result(2, 2.0, 6),
        window_result(3, -3.0, 6),
    ];
    let alerts = analyze_wfo(&report);
    assert!(alerts
        .iter()
        .all(|a| a.title != "Strategy inconsistent across regimes"));
}

#[test]
fn test_diagnostics_flag_thin_windows() {
    let mut report = WfoReport::new("TEST", Timeframe::Day, "Mean Reversion", create_config());
    report.windows = vec![window_result(1, 1.0, 2), window_result(2, 2.0, 3)];
    let alerts = analyze_wfo(&report);
    assert_eq!(alerts.len(), 1);
    assert_eq!(alerts[0].title, "Parameter instability risk: windows too small");
}

#[test]
fn test_run_many_isolates_failures() {
    let optimizer = create_optimizer(create_series(300));
    let reports = optimizer.run_many(
        &["TEST", "MISSING"],
        Timeframe::Day,
        &create_config(),
        &period_space(),
    );

    assert_eq!(reports.len(), 2);
    assert_eq!(reports[0].symbol, "TEST");
    assert!(!reports[0].is_failed());
    assert_eq!(reports[0].windows.len(), 3);

    assert_eq!(reports[1].symbol, "MISSING");
    assert!(reports[1].is_failed());
    assert!(reports[1].windows.is_empty());
    assert_ne!(reports[0].run_id, reports[1].run_id);
}

fn write_csv(dir: &std::path::Path, name: &str, bars: &[Bar]) {
    let mut file = fs::File::create(dir.join(name)).unwrap();
    writeln!(file, "timestamp,open,high,low,close,volume").unwrap();
    for bar in bars {
        writeln!(
            file,
            "{},{},{},{},{},{}",
            bar.timestamp.format("%Y-%m-%d"),
            bar.open,
            bar.high,
            bar.low,
            bar.close,
            bar.volume
        )
        .unwrap();
    }
}

#[test]
fn test_csv_directory_supplier_end_to_end() {
    let dir = tempdir().unwrap();
    write_csv(dir.path(), "TEST_1d.csv", &create_oscillating_bars(300));

    let supplier = CsvDirectorySupplier::new(dir.path());
    let optimizer =
        WalkForwardOptimizer::new(Box::new(supplier), Box::new(MeanReversion::default()));
    let report = optimizer
        .run_wfo("TEST", Timeframe::Day, &create_config(), &period_space())
        .unwrap();

    assert_eq!(report.windows.len(), 3);
}

#[test]
fn test_config_file_end_to_end() {
    let dir = tempdir().unwrap();
    write_csv(dir.path(), "TEST_1d.csv", &create_oscillating_bars(300));

    let toml = format!(
        r#"
[data]
directory = "{}"
symbol = "TEST"
timeframe = "1d"

[window]
train_months = 6
test_months = 2
start_date = "2023-03-01"
end_date = "2023-12-31"
scoring_metric = "total_return"

[execution]
fees_pct = 0.0
slippage_pct = 0.0

[strategy]
name = "mean-reversion"

[search]
method = "random"
n_trials = 4
seed = 7

[search.space.period]
min = 10
max = 10
step = 1

[search.space.entry_z]
min = 0.5
max = 1.0
step = 0.5
"#,
        dir.path().display().to_string().replace('\\', "/")
    );
    let config_path = dir.path().join("wfo.toml");
    fs::write(&config_path, toml).unwrap();

    let file_config = WfoFileConfig::load(&config_path).unwrap();
    let config = file_config.to_wfo_config().unwrap();
    assert_eq!(config.scoring_metric, ScoringMetric::TotalReturn);

    let optimizer = file_config.build_optimizer().unwrap();
    let report = optimizer
        .run_wfo(
            &file_config.data.symbol,
            file_config.timeframe().unwrap(),
            &config,
            &file_config.search_space().unwrap(),
        )
        .unwrap();

    assert!(!report.windows.is_empty());
    for w in &report.windows {
        assert_eq!(w.chosen_params.get("period"), Some(10.0));
        assert_eq!(w.trials_evaluated, 4);
    }
}

#[test]
fn test_simulation_failure_skips_only_that_window() {
    let optimizer = create_optimizer(create_series(300))
        .with_simulator(Box::new(FailingSimulator))
        .with_policy(cold_start_policy());
    let report = optimizer
        .run_wfo("TEST", Timeframe::Day, &create_config(), &period_space())
        .unwrap();

    assert_eq!(report.skipped.len(), 1);
    assert_eq!(report.skipped[0].window.index, 2);
    match &report.skipped[0].reason {
        SkipReason::SimulationFailure { error } => assert!(error.contains("broker rejected")),
        other => panic!("expected SimulationFailure, got {:?}", other),
    }
    let scored: Vec<usize> = report.windows.iter().map(|w| w.window.index).collect();
    assert_eq!(scored, vec![1, 3]);
}

#[test]
fn test_signal_failure_skips_only_that_window() {
    let report = create_broken_optimizer(BrokenGenerator::erroring())
        .run_wfo("TEST", Timeframe::Day, &create_config(), &period_space())
        .unwrap();

    assert_eq!(report.skipped.len(), 1);
    assert_eq!(report.skipped[0].window.index, 2);
    assert!(matches!(
        report.skipped[0].reason,
        SkipReason::SignalFailure { .. }
    ));
    let scored: Vec<usize> = report.windows.iter().map(|w| w.window.index).collect();
    assert_eq!(scored, vec![1, 3]);
}

#[test]
fn test_misaligned_test_signals_skip_the_window() {
    let report = create_broken_optimizer(BrokenGenerator::misaligned())
        .run_wfo("TEST", Timeframe::Day, &create_config(), &period_space())
        .unwrap();

    assert_eq!(report.skipped.len(), 1);
    assert_eq!(report.skipped[0].window.index, 2);
    assert!(matches!(
        report.skipped[0].reason,
        SkipReason::SignalFailure { .. }
    ));
    assert_eq!(report.windows.len(), 2);
}

#[test]
fn test_misaligned_training_signals_fail_every_search() {
    let report = create_broken_optimizer(BrokenGenerator::always_misaligned())
        .run_wfo("TEST", Timeframe::Day, &create_config(), &period_space())
        .unwrap();

    assert!(report.windows.is_empty());
    assert_eq!(report.skipped.len(), 3);
    assert!(report
        .skipped
        .iter()
        .all(|s| matches!(s.reason, SkipReason::NoFallbackParams { .. })));
}

#[test]
fn test_data_gap_ends_the_run() {
    let gap_start = date(2023, 5, 1);
    let gap_end = date(2023, 6, 30);
    let bars: Vec<Bar> = create_oscillating_bars(300)
        .into_iter()
        .filter(|b| {
            let day = b.timestamp.date_naive();
            day < gap_start || day > gap_end
        })
        .collect();
    let optimizer = create_optimizer(PriceSeries::new(bars).unwrap());
    let report = optimizer
        .run_wfo("TEST", Timeframe::Day, &create_config(), &period_space())
        .unwrap();

    // Jul-Aug has data but is never reached once May-Jun comes back empty.
    assert_eq!(report.windows.len(), 1);
    assert_eq!(report.windows[0].window.index, 1);
    assert!(report.skipped.is_empty());
}

#[test]
fn test_oversized_range_is_a_config_error() {
    let optimizer = create_optimizer(create_series(300));
    let space = SearchSpace::new()
        .with("period", ParamRange::fixed(10.0))
        .with("entry_z", ParamRange::new(0.0, 1e300, 1.0));
    let result = optimizer.run_wfo("TEST", Timeframe::Day, &create_config(), &space);
    assert!(matches!(result, Err(WfoError::ConfigError(_))));
}
