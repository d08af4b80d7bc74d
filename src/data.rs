//! Data loading, time series suppliers and vectorised indicators.

use crate::error::{Result, WfoError};
use crate::timeframe::Timeframe;
use crate::types::{Bar, PriceSeries};
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Utc};
use csv::ReaderBuilder;
use serde::Deserialize;
use std::collections::HashMap;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Raw CSV row with flexible date parsing.
#[derive(Debug, Deserialize)]
struct CsvRow {
    #[serde(
        alias = "Date",
        alias = "date",
        alias = "DATE",
        alias = "Timestamp",
        alias = "timestamp",
        alias = "Time",
        alias = "time",
        alias = "datetime",
        alias = "Datetime"
    )]
    date: String,
    #[serde(alias = "Open", alias = "open", alias = "o")]
    open: f64,
    #[serde(alias = "High", alias = "high", alias = "h")]
    high: f64,
    #[serde(alias = "Low", alias = "low", alias = "l")]
    low: f64,
    #[serde(alias = "Close", alias = "close", alias = "c", alias = "Adj Close")]
    close: f64,
    #[serde(
        alias = "Volume",
        alias = "volume",
        alias = "v",
        alias = "vol",
        alias = "Vol",
        default
    )]
    volume: f64,
}

/// Data source configuration.
#[derive(Debug, Clone)]
pub struct DataConfig {
    /// Date format string for parsing (e.g., "%Y-%m-%d" or "%Y-%m-%d %H:%M:%S").
    pub date_format: Option<String>,
    /// Whether the CSV has headers.
    pub has_headers: bool,
    /// CSV delimiter character. If None, delimiter is auto-detected.
    pub delimiter: Option<u8>,
    /// Skip invalid rows instead of failing.
    pub skip_invalid: bool,
    /// Validate bar data (high >= low, etc.).
    pub validate_bars: bool,
}

impl Default for DataConfig {
    fn default() -> Self {
        Self {
            date_format: None,
            has_headers: true,
            delimiter: None,
            skip_invalid: true,
            validate_bars: true,
        }
    }
}

/// Detect the CSV delimiter from the first few lines of the file.
///
/// Picks the delimiter among comma, tab, semicolon and pipe that yields a
/// consistent column count of at least five.
fn detect_delimiter(path: &Path) -> Result<u8> {
    let file = File::open(path)?;
    let reader = BufReader::new(file);
    let lines: Vec<String> = reader.lines().take(5).filter_map(|l| l.ok()).collect();

    if lines.is_empty() {
        return Ok(b',');
    }

    let delimiters = [b',', b'\t', b';', b'|'];
    let mut best_delimiter = b',';
    let mut best_score = 0;

    for &delim in &delimiters {
        let counts: Vec<usize> = lines
            .iter()
            .map(|line| line.as_bytes().iter().filter(|&&b| b == delim).count() + 1)
            .collect();

        let first_count = counts[0];
        let all_consistent = counts.iter().all(|&c| c == first_count);

        if all_consistent && first_count >= 5 && first_count > best_score {
            best_score = first_count;
            best_delimiter = delim;
        }
    }

    debug!(
        "Detected delimiter {:?} with score {}",
        best_delimiter as char, best_score
    );
    Ok(best_delimiter)
}

/// Parse a date string with multiple format attempts.
pub fn parse_datetime(s: &str, format: Option<&str>) -> Result<DateTime<Utc>> {
    if let Some(fmt) = format {
        if let Ok(dt) = NaiveDateTime::parse_from_str(s, fmt) {
            return Ok(Utc.from_utc_datetime(&dt));
        }
        if let Ok(d) = NaiveDate::parse_from_str(s, fmt) {
            return Ok(Utc.from_utc_datetime(&d.and_time(NaiveTime::MIN)));
        }
    }

    let datetime_formats = [
        "%Y-%m-%d %H:%M:%S",
        "%Y-%m-%d %H:%M:%S%.f",
        "%Y-%m-%dT%H:%M:%S",
        "%Y-%m-%dT%H:%M:%SZ",
        "%Y-%m-%dT%H:%M:%S%.fZ",
        "%Y/%m/%d %H:%M:%S",
        "%d/%m/%Y %H:%M:%S",
    ];

    for fmt in &datetime_formats {
        if let Ok(dt) = NaiveDateTime::parse_from_str(s, fmt) {
            return Ok(Utc.from_utc_datetime(&dt));
        }
    }

    let date_formats = ["%Y-%m-%d", "%Y/%m/%d", "%d-%m-%Y", "%d/%m/%Y", "%d-%b-%Y", "%b %d, %Y"];

    for fmt in &date_formats {
        if let Ok(d) = NaiveDate::parse_from_str(s, fmt) {
            return Ok(Utc.from_utc_datetime(&d.and_time(NaiveTime::MIN)));
        }
    }

    // Unix seconds
    if let Ok(ts) = s.parse::<i64>() {
        if let Some(dt) = DateTime::from_timestamp(ts, 0) {
            return Ok(dt);
        }
    }

    Err(WfoError::DataError(format!("Could not parse date: '{}'", s)))
}

/// Parse a `YYYY-MM-DD` date.
pub fn parse_date(s: &str) -> Result<NaiveDate> {
    Ok(NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d")?)
}

/// Load OHLCV data from a CSV file.
pub fn load_csv(path: impl AsRef<Path>, config: &DataConfig) -> Result<Vec<Bar>> {
    let path = path.as_ref();
    info!("Loading data from: {}", path.display());

    let delimiter = match config.delimiter {
        Some(d) => d,
        None => detect_delimiter(path)?,
    };

    let mut reader = ReaderBuilder::new()
        .has_headers(config.has_headers)
        .delimiter(delimiter)
        .flexible(true)
        .from_path(path)?;

    let mut bars = Vec::new();
    let mut skipped = 0;

    for (row_num, result) in reader.deserialize().enumerate() {
        let row: CsvRow = match result {
            Ok(r) => r,
            Err(e) if config.skip_invalid => {
                debug!("Skipping row {}: {}", row_num + 1, e);
                skipped += 1;
                continue;
            }
            Err(e) => return Err(WfoError::CsvError(e)),
        };

        let timestamp = match parse_datetime(&row.date, config.date_format.as_deref()) {
            Ok(ts) => ts,
            Err(e) if config.skip_invalid => {
                debug!("Skipping row {} due to date parse error: {}", row_num + 1, e);
                skipped += 1;
                continue;
            }
            Err(e) => return Err(e),
        };

        let bar = Bar::new(timestamp, row.open, row.high, row.low, row.close, row.volume);

        if config.validate_bars && !bar.validate() {
            if config.skip_invalid {
                debug!("Skipping row {} due to invalid bar data: {:?}", row_num + 1, bar);
                skipped += 1;
                continue;
            }
            return Err(WfoError::DataError(format!(
                "Invalid bar data at row {}: {:?}",
                row_num + 1,
                bar
            )));
        }

        bars.push(bar);
    }

    if skipped > 0 {
        warn!("Skipped {} invalid rows", skipped);
    }

    bars.sort_by_key(|b| b.timestamp);

    let original_len = bars.len();
    bars.dedup_by_key(|b| b.timestamp);
    if bars.len() < original_len {
        warn!("Removed {} duplicate timestamps", original_len - bars.len());
    }

    if bars.is_empty() {
        return Err(WfoError::NoData);
    }

    info!(
        "Loaded {} bars from {} to {}",
        bars.len(),
        bars[0].timestamp,
        bars[bars.len() - 1].timestamp
    );

    Ok(bars)
}

/// Load a CSV file straight into a validated [`PriceSeries`].
pub fn load_series(path: impl AsRef<Path>, config: &DataConfig) -> Result<PriceSeries> {
    PriceSeries::new(load_csv(path, config)?)
}

/// Source of cleaned OHLCV series.
///
/// Implementations return whatever they have inside `[from, to]`; a short or
/// empty series means "insufficient data" and is not an error.
pub trait TimeSeriesSupplier: Send + Sync {
    fn fetch(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<PriceSeries>;
}

/// Supplier backed by series held in memory.
#[derive(Debug, Clone, Default)]
pub struct InMemorySupplier {
    series: HashMap<(String, Timeframe), PriceSeries>,
}

impl InMemorySupplier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a series for `symbol` at `timeframe`, replacing any previous one.
    pub fn insert(&mut self, symbol: impl Into<String>, timeframe: Timeframe, series: PriceSeries) {
        self.series.insert((symbol.into(), timeframe), series);
    }

    /// Builder-style [`insert`](Self::insert).
    pub fn with_series(
        mut self,
        symbol: impl Into<String>,
        timeframe: Timeframe,
        series: PriceSeries,
    ) -> Self {
        self.insert(symbol, timeframe, series);
        self
    }

    pub fn symbols(&self) -> Vec<&str> {
        self.series.keys().map(|(s, _)| s.as_str()).collect()
    }
}

impl TimeSeriesSupplier for InMemorySupplier {
    fn fetch(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<PriceSeries> {
        match self.series.get(&(symbol.to_string(), timeframe)) {
            Some(series) => Ok(series.restrict(from, to)),
            None => {
                warn!("No series registered for {} {}", symbol, timeframe);
                Ok(PriceSeries::empty())
            }
        }
    }
}

/// Supplier reading `<dir>/<SYMBOL>_<timeframe>.csv` files.
#[derive(Debug, Clone)]
pub struct CsvDirectorySupplier {
    dir: PathBuf,
    config: DataConfig,
}

impl CsvDirectorySupplier {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            config: DataConfig::default(),
        }
    }

    pub fn with_config(mut self, config: DataConfig) -> Self {
        self.config = config;
        self
    }

    /// Path of the file that holds `symbol` at `timeframe`.
    pub fn path_for(&self, symbol: &str, timeframe: Timeframe) -> PathBuf {
        self.dir.join(format!("{}_{}.csv", symbol, timeframe.label()))
    }
}

impl TimeSeriesSupplier for CsvDirectorySupplier {
    fn fetch(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<PriceSeries> {
        let path = self.path_for(symbol, timeframe);
        if !path.exists() {
            warn!("Data file not found: {}", path.display());
            return Ok(PriceSeries::empty());
        }
        match load_series(&path, &self.config) {
            Ok(series) => Ok(series.restrict(from, to)),
            Err(WfoError::NoData) => Ok(PriceSeries::empty()),
            Err(e) => Err(e),
        }
    }
}

/// Simple moving average of closes for every bar.
///
/// Entries before the first full window are `None`.
pub fn sma_series(bars: &[Bar], period: usize) -> Vec<Option<f64>> {
    let mut out = vec![None; bars.len()];
    if period == 0 || bars.len() < period {
        return out;
    }
    let mut sum: f64 = bars[..period].iter().map(|b| b.close).sum();
    out[period - 1] = Some(sum / period as f64);
    for i in period..bars.len() {
        sum += bars[i].close - bars[i - period].close;
        out[i] = Some(sum / period as f64);
    }
    out
}

/// Rolling population standard deviation of closes.
pub fn rolling_std_series(bars: &[Bar], period: usize) -> Vec<Option<f64>> {
    let mut out = vec![None; bars.len()];
    if period == 0 || bars.len() < period {
        return out;
    }
    for i in (period - 1)..bars.len() {
        let window = &bars[i + 1 - period..=i];
        let mean = window.iter().map(|b| b.close).sum::<f64>() / period as f64;
        let variance =
            window.iter().map(|b| (b.close - mean).powi(2)).sum::<f64>() / period as f64;
        out[i] = Some(variance.sqrt());
    }
    out
}

/// Relative Strength Index using simple averages over `period` changes.
pub fn rsi_series(bars: &[Bar], period: usize) -> Vec<Option<f64>> {
    let mut out = vec![None; bars.len()];
    if period == 0 || bars.len() < period + 1 {
        return out;
    }
    let changes: Vec<f64> = bars.windows(2).map(|w| w[1].close - w[0].close).collect();
    for i in period..bars.len() {
        let window = &changes[i - period..i];
        let gains: f64 = window.iter().filter(|c| **c > 0.0).sum();
        let losses: f64 = window.iter().filter(|c| **c < 0.0).map(|c| -c).sum();
        let value = if losses == 0.0 {
            100.0
        } else {
            let rs = gains / losses;
            100.0 - 100.0 / (1.0 + rs)
        };
        out[i] = Some(value);
    }
    out
}
