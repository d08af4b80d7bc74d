//! Export utilities for walk-forward results.
//!
//! Reports and stitched portfolios can be written as JSON for downstream
//! tooling, and their tabular parts (equity curve, trades, parameter history,
//! per-window results) as CSV.
//!
//! # Example
//!
//! ```ignore
//! use wfo_engine::export::{export_report_json, Exporter};
//!
//! export_report_json(&report, "report.json")?;
//!
//! let exporter = Exporter::new(&portfolio);
//! exporter.export_equity_csv("equity.csv")?;
//! exporter.export_param_history_csv("params.csv")?;
//! ```

use crate::error::Result;
use crate::stitch::OosPortfolio;
use crate::types::{EquityPoint, Trade};
use crate::walkforward::{SkippedWindow, WfoReport, WindowResult};
use serde::Serialize;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

/// Configuration for CSV exports.
#[derive(Debug, Clone)]
pub struct ExportConfig {
    /// Timestamp format for CSV exports.
    pub date_format: String,
    /// Decimal precision for numeric values.
    pub precision: usize,
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            date_format: "%Y-%m-%d %H:%M:%S".to_string(),
            precision: 4,
        }
    }
}

/// Exporter for a stitched out-of-sample portfolio.
pub struct Exporter<'a> {
    portfolio: &'a OosPortfolio,
    config: ExportConfig,
}

impl<'a> Exporter<'a> {
    pub fn new(portfolio: &'a OosPortfolio) -> Self {
        Self {
            portfolio,
            config: ExportConfig::default(),
        }
    }

    pub fn with_config(portfolio: &'a OosPortfolio, config: ExportConfig) -> Self {
        Self { portfolio, config }
    }

    /// Export the stitched equity curve to CSV.
    pub fn export_equity_csv(&self, path: impl AsRef<Path>) -> Result<()> {
        write_equity_csv(&self.portfolio.result.equity_curve, &self.config, path)
    }

    /// Export the stitched trade log to CSV.
    pub fn export_trades_csv(&self, path: impl AsRef<Path>) -> Result<()> {
        write_trades_csv(&self.portfolio.result.trades, &self.config, path)
    }

    /// Export which parameters were live in each test block.
    pub fn export_param_history_csv(&self, path: impl AsRef<Path>) -> Result<()> {
        let file = File::create(path)?;
        let mut writer = BufWriter::new(file);

        writeln!(writer, "window,test_start,test_end,params,using_fallback")?;
        for entry in &self.portfolio.param_history {
            writeln!(
                writer,
                "{},{},{},\"{}\",{}",
                entry.window_index,
                entry.test_start,
                entry.test_end,
                entry.params,
                entry.using_fallback
            )?;
        }

        writer.flush()?;
        Ok(())
    }

    /// Export the whole portfolio as pretty JSON.
    pub fn export_json(&self, path: impl AsRef<Path>) -> Result<()> {
        export_portfolio_json(self.portfolio, path)
    }

    /// Trades as a CSV string.
    pub fn trades_to_csv(&self) -> String {
        let p = self.config.precision;
        let mut out = String::from(TRADE_HEADER);
        out.push('\n');
        for trade in &self.portfolio.result.trades {
            out.push_str(&trade_line(trade, &self.config.date_format, p));
            out.push('\n');
        }
        out
    }
}

const TRADE_HEADER: &str =
    "entry_time,entry_price,exit_time,exit_price,quantity,fees,pnl,return_pct,holding_days";

fn trade_line(trade: &Trade, date_format: &str, p: usize) -> String {
    format!(
        "{},{:.p$},{},{:.p$},{:.p$},{:.p$},{:.p$},{:.p$},{}",
        trade.entry_time.format(date_format),
        trade.entry_price,
        trade.exit_time.format(date_format),
        trade.exit_price,
        trade.quantity,
        trade.fees,
        trade.pnl,
        trade.return_pct,
        trade.holding_days(),
        p = p
    )
}

fn write_equity_csv(
    equity_curve: &[EquityPoint],
    config: &ExportConfig,
    path: impl AsRef<Path>,
) -> Result<()> {
    let file = File::create(path)?;
    let mut writer = BufWriter::new(file);
    let p = config.precision;

    writeln!(writer, "timestamp,equity,cash,position_value,drawdown_pct")?;
    for point in equity_curve {
        writeln!(
            writer,
            "{},{:.p$},{:.p$},{:.p$},{:.p$}",
            point.timestamp.format(&config.date_format),
            point.equity,
            point.cash,
            point.position_value,
            point.drawdown_pct,
            p = p
        )?;
    }

    writer.flush()?;
    Ok(())
}

fn write_trades_csv(trades: &[Trade], config: &ExportConfig, path: impl AsRef<Path>) -> Result<()> {
    let file = File::create(path)?;
    let mut writer = BufWriter::new(file);

    writeln!(writer, "{}", TRADE_HEADER)?;
    for trade in trades {
        writeln!(writer, "{}", trade_line(trade, &config.date_format, config.precision))?;
    }

    writer.flush()?;
    Ok(())
}

/// Export an equity curve to CSV with default formatting.
pub fn export_equity_curve_csv(equity_curve: &[EquityPoint], path: impl AsRef<Path>) -> Result<()> {
    write_equity_csv(equity_curve, &ExportConfig::default(), path)
}

/// Export a report as pretty JSON.
pub fn export_report_json(report: &WfoReport, path: impl AsRef<Path>) -> Result<()> {
    let file = File::create(path)?;
    serde_json::to_writer_pretty(BufWriter::new(file), report)?;
    Ok(())
}

/// Export a stitched portfolio as pretty JSON.
pub fn export_portfolio_json(portfolio: &OosPortfolio, path: impl AsRef<Path>) -> Result<()> {
    let file = File::create(path)?;
    serde_json::to_writer_pretty(BufWriter::new(file), portfolio)?;
    Ok(())
}

#[derive(Serialize)]
struct WindowRow {
    window: usize,
    train_start: String,
    train_end: String,
    test_start: String,
    test_end: String,
    status: &'static str,
    params: String,
    using_fallback: bool,
    train_score: Option<f64>,
    test_trades: Option<usize>,
    test_return_pct: Option<f64>,
    test_sharpe: Option<f64>,
    test_max_drawdown_pct: Option<f64>,
    skip_reason: String,
}

impl WindowRow {
    fn scored(r: &WindowResult) -> Self {
        Self {
            window: r.window.index,
            train_start: r.window.train_start.to_string(),
            train_end: r.window.train_end.to_string(),
            test_start: r.window.test_start.to_string(),
            test_end: r.window.test_end.to_string(),
            status: "scored",
            params: r.chosen_params.to_string(),
            using_fallback: r.using_fallback,
            train_score: r.train_score,
            test_trades: Some(r.test_trades),
            test_return_pct: Some(r.test_return_pct),
            test_sharpe: Some(r.test_sharpe),
            test_max_drawdown_pct: Some(r.test_max_drawdown_pct),
            skip_reason: String::new(),
        }
    }

    fn skipped(s: &SkippedWindow) -> Self {
        Self {
            window: s.window.index,
            train_start: s.window.train_start.to_string(),
            train_end: s.window.train_end.to_string(),
            test_start: s.window.test_start.to_string(),
            test_end: s.window.test_end.to_string(),
            status: "skipped",
            params: String::new(),
            using_fallback: false,
            train_score: None,
            test_trades: None,
            test_return_pct: None,
            test_sharpe: None,
            test_max_drawdown_pct: None,
            skip_reason: s.reason.to_string(),
        }
    }
}

/// Export one row per window, scored and skipped, ordered by window index.
pub fn export_windows_csv(report: &WfoReport, path: impl AsRef<Path>) -> Result<()> {
    let mut rows: Vec<WindowRow> = report
        .windows
        .iter()
        .map(WindowRow::scored)
        .chain(report.skipped.iter().map(WindowRow::skipped))
        .collect();
    rows.sort_by_key(|r| r.window);

    let mut writer = csv::Writer::from_path(path)?;
    for row in &rows {
        writer.serialize(row)?;
    }
    writer.flush()?;
    Ok(())
}
