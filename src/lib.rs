//! wfo-engine - walk-forward optimization for signal-based trading strategies.
//!
//! # Overview
//!
//! A walk-forward run slices a price history into rolling windows. In each
//! window a parameter search is fitted on the training block only, and the
//! winning parameters are then traded on the unseen test block that follows.
//! Only test-block results are reported, so every number is out-of-sample.
//!
//! - **Anchored calendar windows**: `train_months` of training followed by
//!   `test_months` of testing, rolling forward one test block at a time
//! - **Pluggable search**: parallel grid search or seeded random search
//! - **Fallback parameters**: a window whose search fails reuses the last
//!   parameters that worked
//! - **Stitching**: every scored test block combined into one continuous
//!   out-of-sample equity curve
//! - **Diagnostics**: alerts for thin windows and regime inconsistency
//!
//! # Quick Start
//!
//! ```no_run
//! use wfo_engine::data::{load_series, DataConfig, InMemorySupplier};
//! use wfo_engine::search::{ParamRange, SearchSpace};
//! use wfo_engine::strategies::MeanReversion;
//! use wfo_engine::timeframe::Timeframe;
//! use wfo_engine::walkforward::{WalkForwardOptimizer, WfoConfig};
//! use chrono::NaiveDate;
//!
//! let series = load_series("data/AAPL.csv", &DataConfig::default()).unwrap();
//! let supplier = InMemorySupplier::new().with_series("AAPL", Timeframe::Day, series);
//! let optimizer =
//!     WalkForwardOptimizer::new(Box::new(supplier), Box::new(MeanReversion::default()));
//!
//! let config = WfoConfig::new(
//!     NaiveDate::from_ymd_opt(2022, 1, 1).unwrap(),
//!     NaiveDate::from_ymd_opt(2023, 12, 31).unwrap(),
//! )
//! .with_windows(6, 2);
//! let space = SearchSpace::new()
//!     .with("period", ParamRange::new(10.0, 30.0, 5.0))
//!     .with("entry_z", ParamRange::new(1.0, 2.0, 0.5));
//!
//! let report = optimizer.run_wfo("AAPL", Timeframe::Day, &config, &space).unwrap();
//! println!("{}", report.summary());
//! ```
//!
//! # Modules
//!
//! - [`types`]: Core data types (Bar, PriceSeries, Trade, ParamSet)
//! - [`data`]: CSV loading, time-series suppliers and indicators
//! - [`window`]: Train/test window schedule
//! - [`signals`]: Signal series and the generator trait
//! - [`strategies`]: Built-in signal generators
//! - [`simulator`]: Long-only portfolio simulation
//! - [`search`]: Parameter spaces, scoring and search strategies
//! - [`walkforward`]: The walk-forward optimizer and its report
//! - [`stitch`]: Out-of-sample portfolio stitching
//! - [`diagnostics`]: Report health alerts
//! - [`analytics`]: Performance metrics and terminal formatting
//! - [`config`]: TOML configuration file support
//! - [`export`]: JSON and CSV export

pub mod analytics;
pub mod calendar;
pub mod config;
pub mod data;
pub mod diagnostics;
pub mod error;
pub mod export;
pub mod search;
pub mod signals;
pub mod simulator;
pub mod stitch;
pub mod strategies;
pub mod timeframe;
pub mod types;
pub mod walkforward;
pub mod window;

// Re-exports for convenience
pub use analytics::ResultFormatter;
pub use diagnostics::{analyze_wfo, Alert, AlertLevel};
pub use error::{Result, WfoError};
pub use search::{
    GridSearch, ParamRange, ParameterSearch, RandomSearch, ScoringMetric, SearchSpace,
};
pub use signals::{SignalGenerator, Signals};
pub use simulator::{ExecutionConfig, PortfolioSimulator, SimulationResult, VectorizedSimulator};
pub use stitch::{OosPortfolio, ParamHistoryEntry};
pub use timeframe::Timeframe;
pub use types::{Bar, ParamSet, PriceSeries, Trade};
pub use walkforward::{WalkForwardOptimizer, WfoConfig, WfoPolicy, WfoReport, WindowResult};
pub use window::{compute_windows, Window, WindowSchedule};

// Data suppliers
pub use data::{CsvDirectorySupplier, InMemorySupplier, TimeSeriesSupplier};
