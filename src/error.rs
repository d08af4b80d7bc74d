//! Error types for the walk-forward engine.

use thiserror::Error;

/// Main error type for the walk-forward engine.
///
/// Only run-wide conditions surface through this type. Failures local to a
/// single window are recorded as [`crate::walkforward::SkipReason`] values in
/// the report instead.
#[derive(Error, Debug)]
pub enum WfoError {
    #[error("Data error: {0}")]
    DataError(String),

    #[error("CSV parsing error: {0}")]
    CsvError(#[from] csv::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Date parsing error: {0}")]
    DateParseError(#[from] chrono::ParseError),

    #[error("Invalid configuration: {0}")]
    ConfigError(String),

    #[error("Strategy error: {0}")]
    StrategyError(String),

    #[error("Insufficient data: {required} bars required, {found} found")]
    InsufficientData { required: usize, found: usize },

    #[error("No out-of-sample data: every walk-forward window was skipped")]
    NoOosData,

    #[error("No data loaded")]
    NoData,

    #[error("JSON serialization error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("TOML parsing error: {0}")]
    TomlError(#[from] toml::de::Error),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Optimization error: {0}")]
    OptimizationError(String),

    #[error("Simulation error: {0}")]
    SimulationError(String),
}

/// Result type alias for walk-forward operations.
pub type Result<T> = std::result::Result<T, WfoError>;
