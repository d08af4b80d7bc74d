//! Configuration file support for walk-forward runs.
//!
//! Allows loading run configurations from TOML files for reproducibility.

use crate::data::{
    load_series, parse_date, CsvDirectorySupplier, DataConfig, InMemorySupplier,
    TimeSeriesSupplier,
};
use crate::error::{Result, WfoError};
use crate::search::{
    GridSearch, ParamRange, ParameterSearch, RandomSearch, ScoringMetric, SearchBudget,
    SearchSpace,
};
use crate::signals::SignalGenerator;
use crate::simulator::ExecutionConfig;
use crate::strategies::strategy_by_name;
use crate::timeframe::Timeframe;
use crate::walkforward::{WalkForwardOptimizer, WfoConfig, WfoPolicy};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::time::Duration;
use tracing::info;

/// Complete walk-forward configuration loaded from a file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WfoFileConfig {
    /// Data settings.
    #[serde(default)]
    pub data: DataSettings,
    /// Window settings.
    pub window: WindowSettings,
    /// Execution settings forwarded to the simulator.
    #[serde(default)]
    pub execution: ExecutionSettings,
    /// Strategy settings.
    #[serde(default)]
    pub strategy: StrategySettings,
    /// Parameter search settings.
    #[serde(default)]
    pub search: SearchSettings,
    /// Scheduler thresholds.
    #[serde(default)]
    pub policy: WfoPolicy,
}

/// Data settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataSettings {
    /// Path to a single CSV file holding `symbol`.
    pub path: Option<String>,
    /// Directory of `<SYMBOL>_<timeframe>.csv` files, used when `path` is unset.
    pub directory: Option<String>,
    /// Symbol name.
    #[serde(default = "default_symbol")]
    pub symbol: String,
    /// Bar timeframe label ("1d", "4h", "15m", "1w").
    #[serde(default = "default_timeframe")]
    pub timeframe: String,
    /// Date format in CSV.
    pub date_format: Option<String>,
}

fn default_symbol() -> String { "SYMBOL".to_string() }
fn default_timeframe() -> String { "1d".to_string() }

impl Default for DataSettings {
    fn default() -> Self {
        Self {
            path: None,
            directory: None,
            symbol: "SYMBOL".to_string(),
            timeframe: "1d".to_string(),
            date_format: None,
        }
    }
}

/// Window settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WindowSettings {
    /// Training block length in months.
    #[serde(default = "default_train_months")]
    pub train_months: u32,
    /// Test block length in months.
    #[serde(default = "default_test_months")]
    pub test_months: u32,
    /// First test day (YYYY-MM-DD format).
    pub start_date: String,
    /// Last data day (YYYY-MM-DD format).
    pub end_date: String,
    /// Metric the search maximizes.
    #[serde(default = "default_metric")]
    pub scoring_metric: String,
}

fn default_train_months() -> u32 { 6 }
fn default_test_months() -> u32 { 2 }
fn default_metric() -> String { "sharpe".to_string() }

impl Default for WindowSettings {
    fn default() -> Self {
        Self {
            train_months: 6,
            test_months: 2,
            start_date: "2021-01-01".to_string(),
            end_date: "2023-12-31".to_string(),
            scoring_metric: "sharpe".to_string(),
        }
    }
}

/// Execution settings. Fees and slippage are given in percent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionSettings {
    /// Initial capital.
    #[serde(default = "default_capital")]
    pub initial_capital: f64,
    /// Fee per fill as percentage.
    #[serde(default = "default_fees_pct")]
    pub fees_pct: f64,
    /// Slippage per fill as percentage.
    #[serde(default = "default_slippage_pct")]
    pub slippage_pct: f64,
    /// Position size as fraction of equity.
    #[serde(default = "default_position_size")]
    pub position_size: f64,
    /// Allow fractional shares.
    #[serde(default = "default_true")]
    pub fractional_shares: bool,
}

fn default_capital() -> f64 { 100_000.0 }
fn default_fees_pct() -> f64 { 0.1 }
fn default_slippage_pct() -> f64 { 0.05 }
fn default_position_size() -> f64 { 1.0 }
fn default_true() -> bool { true }

impl Default for ExecutionSettings {
    fn default() -> Self {
        Self {
            initial_capital: 100_000.0,
            fees_pct: 0.1,
            slippage_pct: 0.05,
            position_size: 1.0,
            fractional_shares: true,
        }
    }
}

/// Strategy settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StrategySettings {
    /// Registry name of the signal generator.
    #[serde(default = "default_strategy")]
    pub name: String,
}

fn default_strategy() -> String { "mean-reversion".to_string() }

impl Default for StrategySettings {
    fn default() -> Self {
        Self {
            name: "mean-reversion".to_string(),
        }
    }
}

/// Parameter search settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchSettings {
    /// "grid" or "random".
    #[serde(default = "default_method")]
    pub method: String,
    /// Candidates drawn per window by random search.
    #[serde(default = "default_n_trials")]
    pub n_trials: usize,
    /// Hard cap on candidates per window.
    pub max_trials: Option<usize>,
    /// Seed for random search.
    pub seed: Option<u64>,
    /// Wall-clock budget per window.
    pub time_budget_secs: Option<u64>,
    /// Parameter ranges by name.
    #[serde(default)]
    pub space: BTreeMap<String, ParamRange>,
}

fn default_method() -> String { "grid".to_string() }
fn default_n_trials() -> usize { 50 }

impl Default for SearchSettings {
    fn default() -> Self {
        Self {
            method: "grid".to_string(),
            n_trials: 50,
            max_trials: None,
            seed: None,
            time_budget_secs: None,
            space: BTreeMap::new(),
        }
    }
}

impl WfoFileConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        info!("Loading configuration from: {}", path.display());

        let content = fs::read_to_string(path)?;
        let config: WfoFileConfig = toml::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to a TOML file.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let content =
            toml::to_string_pretty(self).map_err(|e| WfoError::ConfigError(e.to_string()))?;
        fs::write(path, content)?;
        Ok(())
    }

    pub fn timeframe(&self) -> Result<Timeframe> {
        self.data.timeframe.parse()
    }

    /// Convert to the programmatic run configuration.
    pub fn to_wfo_config(&self) -> Result<WfoConfig> {
        let start_date = parse_date(&self.window.start_date).map_err(|_| {
            WfoError::ConfigError(format!("Invalid start_date '{}'", self.window.start_date))
        })?;
        let end_date = parse_date(&self.window.end_date).map_err(|_| {
            WfoError::ConfigError(format!("Invalid end_date '{}'", self.window.end_date))
        })?;
        let metric: ScoringMetric = self.window.scoring_metric.parse()?;

        let execution = ExecutionConfig {
            initial_capital: self.execution.initial_capital,
            fees_pct: self.execution.fees_pct / 100.0,
            slippage_pct: self.execution.slippage_pct / 100.0,
            position_size: self.execution.position_size,
            fractional_shares: self.execution.fractional_shares,
            ..Default::default()
        };

        let config = WfoConfig::new(start_date, end_date)
            .with_windows(self.window.train_months, self.window.test_months)
            .with_metric(metric)
            .with_execution(execution);
        config.validate()?;
        Ok(config)
    }

    /// The configured search space.
    pub fn search_space(&self) -> Result<SearchSpace> {
        let space = self
            .search
            .space
            .iter()
            .fold(SearchSpace::new(), |space, (name, range)| space.with(name.clone(), *range));
        space.validate()?;
        Ok(space)
    }

    /// Build the configured parameter search.
    pub fn build_search(&self) -> Result<Box<dyn ParameterSearch>> {
        let mut budget = SearchBudget::unlimited();
        if let Some(max) = self.search.max_trials {
            budget = budget.with_max_trials(max);
        }
        if let Some(secs) = self.search.time_budget_secs {
            budget = budget.with_time_budget(Duration::from_secs(secs));
        }

        match self.search.method.trim().to_lowercase().as_str() {
            "grid" => Ok(Box::new(GridSearch::new().with_budget(budget))),
            "random" => {
                let mut search = RandomSearch::new(self.search.n_trials).with_budget(budget);
                if let Some(seed) = self.search.seed {
                    search = search.with_seed(seed);
                }
                Ok(Box::new(search))
            }
            other => Err(WfoError::ConfigError(format!(
                "Unknown search method '{}'. Expected grid or random",
                other
            ))),
        }
    }

    pub fn build_generator(&self) -> Result<Box<dyn SignalGenerator>> {
        strategy_by_name(&self.strategy.name)
    }

    /// Build the configured data supplier.
    pub fn build_supplier(&self) -> Result<Box<dyn TimeSeriesSupplier>> {
        let data_config = DataConfig {
            date_format: self.data.date_format.clone(),
            ..Default::default()
        };

        if let Some(path) = &self.data.path {
            let series = load_series(path, &data_config)?;
            let supplier =
                InMemorySupplier::new().with_series(&self.data.symbol, self.timeframe()?, series);
            return Ok(Box::new(supplier));
        }
        if let Some(dir) = &self.data.directory {
            return Ok(Box::new(
                CsvDirectorySupplier::new(dir).with_config(data_config),
            ));
        }
        Err(WfoError::ConfigError(
            "Either data.path or data.directory must be set".to_string(),
        ))
    }

    /// Wire everything into an optimizer.
    pub fn build_optimizer(&self) -> Result<WalkForwardOptimizer> {
        Ok(
            WalkForwardOptimizer::new(self.build_supplier()?, self.build_generator()?)
                .with_search(self.build_search()?)
                .with_policy(self.policy.clone()),
        )
    }

    /// Generate an example configuration file content.
    pub fn example() -> String {
        r#"# Walk-Forward Optimization Configuration File
# This file configures a walk-forward run

[data]
path = "data/sample.csv"
symbol = "AAPL"
timeframe = "1d"
# directory = "data"        # use <SYMBOL>_<timeframe>.csv files instead of path
# date_format = "%Y-%m-%d"

[window]
train_months = 6
test_months = 2
start_date = "2021-01-01"
end_date = "2023-12-31"
scoring_metric = "sharpe"   # sharpe, total_return, calmar, drawdown

[execution]
initial_capital = 100000.0
fees_pct = 0.1              # 0.1% per fill
slippage_pct = 0.05         # 0.05% per fill
position_size = 1.0
fractional_shares = true

[strategy]
name = "mean-reversion"

[search]
method = "grid"             # grid or random
n_trials = 50               # random search only
# seed = 42
# max_trials = 500
# time_budget_secs = 30

[search.space.period]
min = 10
max = 30
step = 5

[search.space.entry_z]
min = 0.5
max = 2.0
step = 0.5

[policy]
min_train_bars = 50
min_test_trades = 5
fetch_buffer_days = 15
warmup_signals = true
show_progress = true
"#
        .to_string()
    }
}
