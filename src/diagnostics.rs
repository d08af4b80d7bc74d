//! Advisory alerts for walk-forward reports.
//!
//! The rules here only flag risk; they never change which windows were scored.

use crate::walkforward::WfoReport;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Average test trades per window below which parameters are considered unstable.
pub const MIN_AVG_TRADES_PER_WINDOW: f64 = 3.0;

/// Share of losing windows above which a strategy is flagged as inconsistent.
pub const MAX_LOSING_WINDOW_FRACTION: f64 = 0.5;

/// Severity of an alert.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertLevel {
    Success,
    Warning,
    Error,
}

impl fmt::Display for AlertLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            AlertLevel::Success => "success",
            AlertLevel::Warning => "warning",
            AlertLevel::Error => "error",
        };
        write!(f, "{}", label)
    }
}

/// One human-readable finding about a walk-forward run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    pub level: AlertLevel,
    pub title: String,
    pub message: String,
}

impl Alert {
    pub fn new(level: AlertLevel, title: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            level,
            title: title.into(),
            message: message.into(),
        }
    }

    pub fn success(title: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(AlertLevel::Success, title, message)
    }

    pub fn warning(title: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(AlertLevel::Warning, title, message)
    }

    pub fn error(title: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(AlertLevel::Error, title, message)
    }
}

/// Derive alerts from a walk-forward report.
///
/// An empty or failed report yields a single error alert. Otherwise every
/// applicable warning is emitted, and a single success alert when none apply.
pub fn analyze_wfo(report: &WfoReport) -> Vec<Alert> {
    if let Some(error) = &report.error {
        return vec![Alert::error("Walk-forward run failed", error.clone())];
    }
    if report.windows.is_empty() {
        return vec![Alert::error(
            "No windows scored",
            format!(
                "All {} windows were skipped; there is no out-of-sample evidence",
                report.skipped.len()
            ),
        )];
    }

    let count = report.windows.len() as f64;
    let mut alerts = Vec::new();

    let avg_trades = report.windows.iter().map(|w| w.test_trades).sum::<usize>() as f64 / count;
    if avg_trades < MIN_AVG_TRADES_PER_WINDOW {
        alerts.push(Alert::warning(
            "Parameter instability risk: windows too small",
            format!(
                "Only {:.1} trades per test window on average; lengthen the test period",
                avg_trades
            ),
        ));
    }

    let losing = report
        .windows
        .iter()
        .filter(|w| w.test_return_pct < 0.0)
        .count();
    if losing as f64 / count > MAX_LOSING_WINDOW_FRACTION {
        alerts.push(Alert::warning(
            "Strategy inconsistent across regimes",
            format!(
                "{} of {} test windows lost money",
                losing,
                report.windows.len()
            ),
        ));
    }

    if alerts.is_empty() {
        alerts.push(Alert::success(
            "Walk-forward looks consistent",
            format!(
                "{} windows scored, {:.1} trades per window, {} losing",
                report.windows.len(),
                avg_trades,
                losing
            ),
        ));
    }

    alerts
}
