//! Performance ratios and terminal reporting.

use crate::diagnostics::{Alert, AlertLevel};
use crate::stitch::OosPortfolio;
use crate::types::Trade;
use crate::walkforward::WfoReport;
use chrono::{DateTime, Utc};
use colored::Colorize;
use tabled::{builder::Builder, settings::Style};

/// Drawdowns shallower than this (in percent) are floored here in the Calmar ratio.
pub const MIN_CALMAR_DRAWDOWN_PCT: f64 = 1.0;

/// Calculate Sharpe ratio from per-bar returns.
pub fn calculate_sharpe(returns: &[f64], annualization_factor: f64) -> f64 {
    if returns.is_empty() {
        return 0.0;
    }

    let mean: f64 = returns.iter().sum::<f64>() / returns.len() as f64;
    let variance: f64 =
        returns.iter().map(|r| (r - mean).powi(2)).sum::<f64>() / returns.len() as f64;
    let std_dev = variance.sqrt();

    if std_dev == 0.0 {
        return 0.0;
    }

    (mean / std_dev) * annualization_factor.sqrt()
}

/// Calculate Sortino ratio from per-bar returns.
///
/// Returns 0.0 when there is no downside deviation, so the value always
/// serializes.
pub fn calculate_sortino(returns: &[f64], annualization_factor: f64) -> f64 {
    if returns.is_empty() {
        return 0.0;
    }

    let mean: f64 = returns.iter().sum::<f64>() / returns.len() as f64;
    let downside: Vec<f64> = returns.iter().filter(|&&r| r < 0.0).copied().collect();
    if downside.is_empty() {
        return 0.0;
    }

    let downside_dev =
        (downside.iter().map(|r| r.powi(2)).sum::<f64>() / downside.len() as f64).sqrt();
    if downside_dev == 0.0 {
        return 0.0;
    }

    (mean / downside_dev) * annualization_factor.sqrt()
}

/// Calmar ratio: annual return over max drawdown, both in percent.
pub fn calculate_calmar(annual_return_pct: f64, max_drawdown_pct: f64) -> f64 {
    annual_return_pct / max_drawdown_pct.max(MIN_CALMAR_DRAWDOWN_PCT)
}

/// Compound annual growth rate in percent, using calendar days / 365.
pub fn annualized_return_pct(
    initial_capital: f64,
    final_equity: f64,
    start_time: DateTime<Utc>,
    end_time: DateTime<Utc>,
) -> f64 {
    let years = (end_time - start_time).num_days() as f64 / 365.0;
    if years <= 0.0 || initial_capital <= 0.0 || final_equity <= 0.0 {
        return 0.0;
    }
    ((final_equity / initial_capital).powf(1.0 / years) - 1.0) * 100.0
}

/// Format results for terminal display.
pub struct ResultFormatter;

impl ResultFormatter {
    /// Print a walk-forward report to stdout.
    pub fn print_wfo_report(report: &WfoReport) {
        println!();
        println!("{}", "═".repeat(72).blue());
        println!("{}", " WALK-FORWARD OPTIMIZATION ".bold().blue());
        println!("{}", "═".repeat(72).blue());
        println!();

        println!("{}", "Overview".bold().underline());
        println!("  Symbol:          {} ({})", report.symbol, report.timeframe);
        println!("  Strategy:        {}", report.strategy);
        println!(
            "  Windows:         {} months train / {} months test",
            report.config.train_months, report.config.test_months
        );
        println!("  Scoring Metric:  {}", report.config.scoring_metric);
        println!(
            "  Period:          {} to {}",
            report.config.start_date, report.config.end_date
        );
        println!("  Run ID:          {}", report.run_id);
        println!();

        if let Some(error) = &report.error {
            println!("  {} {}", "Run failed:".red().bold(), error);
            println!();
            Self::print_alerts(&report.alerts);
            return;
        }

        if !report.windows.is_empty() {
            Self::print_window_table(report);
            println!();
        }

        if !report.skipped.is_empty() {
            println!("{}", "Skipped Windows".bold().underline());
            for skipped in &report.skipped {
                println!(
                    "  #{:<3} {} to {}  {}",
                    skipped.window.index,
                    skipped.window.test_start,
                    skipped.window.test_end,
                    skipped.reason.to_string().yellow()
                );
            }
            println!();
        }

        println!("{}", "Summary".bold().underline());
        println!("  Scored Windows:  {:>12}", report.windows.len());
        println!("  Fallback Used:   {:>12}", report.fallback_count());
        println!("  Test Trades:     {:>12}", report.total_test_trades());
        println!(
            "  Avg Test Return: {:>11.2}%  {}",
            report.avg_test_return(),
            Self::format_pct_change(report.avg_test_return())
        );
        println!(
            "  Compounded:      {:>11.2}%",
            report.compounded_test_return()
        );
        println!(
            "  Profitable:      {:>11.0}%",
            report.profitable_fraction() * 100.0
        );
        println!();

        Self::print_alerts(&report.alerts);
        println!("{}", "═".repeat(72).blue());
    }

    fn print_window_table(report: &WfoReport) {
        let mut builder = Builder::new();
        builder.push_record([
            "#", "Train", "Test", "Params", "Trades", "Return %", "Sharpe", "Max DD %", "Fallback",
        ]);

        for w in &report.windows {
            builder.push_record([
                w.window.index.to_string(),
                format!("{} to {}", w.window.train_start, w.window.train_end),
                format!("{} to {}", w.window.test_start, w.window.test_end),
                w.chosen_params.to_string(),
                w.test_trades.to_string(),
                format!("{:.2}", w.test_return_pct),
                format!("{:.2}", w.test_sharpe),
                format!("{:.2}", -w.test_max_drawdown_pct),
                if w.using_fallback { "yes" } else { "" }.to_string(),
            ]);
        }

        let table = builder.build().with(Style::rounded()).to_string();
        println!("{}", table);
    }

    /// Print a stitched out-of-sample portfolio.
    pub fn print_portfolio(portfolio: &OosPortfolio) {
        let result = &portfolio.result;

        println!();
        println!("{}", "═".repeat(72).blue());
        println!("{}", " OUT-OF-SAMPLE PORTFOLIO ".bold().blue());
        println!("{}", "═".repeat(72).blue());
        println!();

        println!("{}", "Overview".bold().underline());
        println!(
            "  Period:          {} to {}",
            result.start_time.format("%Y-%m-%d"),
            result.end_time.format("%Y-%m-%d")
        );
        println!("  Windows:         {}", portfolio.param_history.len());
        println!("  Bars:            {}", portfolio.signals.len());
        println!();

        println!("{}", "Performance".bold().underline());
        println!("  Initial Capital: ${:>12.2}", result.initial_capital);
        println!(
            "  Final Equity:    ${:>12.2}  {}",
            result.final_equity,
            Self::format_pct_change(result.total_return_pct)
        );
        println!("  Total Return:    {:>12.2}%", result.total_return_pct);
        println!("  Annual Return:   {:>12.2}%", result.annual_return_pct);
        println!();

        println!("{}", "Risk Metrics".bold().underline());
        println!("  Max Drawdown:    {:>12.2}%", -result.max_drawdown_pct);
        println!("  Sharpe Ratio:    {:>12.2}", result.sharpe_ratio);
        println!("  Sortino Ratio:   {:>12.2}", result.sortino_ratio);
        println!("  Calmar Ratio:    {:>12.2}", result.calmar_ratio);
        println!();

        println!("{}", "Trade Statistics".bold().underline());
        println!("  Total Trades:    {:>12}", result.trade_count);
        println!("  Win Rate:        {:>11.1}%", result.win_rate);
        println!("  Exposure:        {:>11.1}%", result.exposure_pct);
        println!();

        println!("{}", "Parameter History".bold().underline());
        let mut builder = Builder::new();
        builder.push_record(["#", "Active", "Params", "Fallback"]);
        for entry in &portfolio.param_history {
            builder.push_record([
                entry.window_index.to_string(),
                format!("{} to {}", entry.test_start, entry.test_end),
                entry.params.to_string(),
                if entry.using_fallback { "yes" } else { "" }.to_string(),
            ]);
        }
        println!("{}", builder.build().with(Style::rounded()).to_string());
        println!();

        Self::print_alerts(&portfolio.alerts);
        println!("{}", "═".repeat(72).blue());
    }

    /// Print diagnostic alerts, colored by level.
    pub fn print_alerts(alerts: &[Alert]) {
        if alerts.is_empty() {
            return;
        }
        println!("{}", "Diagnostics".bold().underline());
        for alert in alerts {
            let tag = match alert.level {
                AlertLevel::Success => "[ok]".green().bold(),
                AlertLevel::Warning => "[warn]".yellow().bold(),
                AlertLevel::Error => "[error]".red().bold(),
            };
            println!("  {} {}: {}", tag, alert.title.bold(), alert.message);
        }
        println!();
    }

    /// Print one line per symbol for a batch of runs.
    pub fn print_batch_table(reports: &[WfoReport]) {
        let mut builder = Builder::new();
        builder.push_record([
            "Symbol", "Windows", "Skipped", "Avg Return %", "Compounded %", "Profitable", "Status",
        ]);

        for report in reports {
            let status = match &report.error {
                Some(e) => e.clone(),
                None => report
                    .alerts
                    .iter()
                    .map(|a| a.level.to_string())
                    .collect::<Vec<_>>()
                    .join(", "),
            };
            builder.push_record([
                report.symbol.clone(),
                report.windows.len().to_string(),
                report.skipped.len().to_string(),
                format!("{:.2}", report.avg_test_return()),
                format!("{:.2}", report.compounded_test_return()),
                format!("{:.0}%", report.profitable_fraction() * 100.0),
                status,
            ]);
        }

        let table = builder.build().with(Style::rounded()).to_string();
        println!("{}", table);
    }

    /// Print individual trades; `limit` of 0 prints all of them.
    pub fn print_trades(trades: &[Trade], limit: usize) {
        if trades.is_empty() {
            println!("No trades.");
            return;
        }

        let shown = if limit > 0 && limit < trades.len() {
            &trades[..limit]
        } else {
            trades
        };

        let mut builder = Builder::new();
        builder.push_record(["Entry", "Exit", "Qty", "Entry $", "Exit $", "P&L", "Return %"]);
        for t in shown {
            let pnl = format!("{:.2}", t.pnl);
            builder.push_record([
                t.entry_time.format("%Y-%m-%d").to_string(),
                t.exit_time.format("%Y-%m-%d").to_string(),
                format!("{:.2}", t.quantity),
                format!("{:.2}", t.entry_price),
                format!("{:.2}", t.exit_price),
                if t.is_winner() {
                    pnl.green().to_string()
                } else {
                    pnl.red().to_string()
                },
                format!("{:.2}", t.return_pct),
            ]);
        }
        println!("{}", builder.build().with(Style::rounded()).to_string());

        if shown.len() < trades.len() {
            println!("... and {} more trades", trades.len() - shown.len());
        }
    }

    /// Format percentage change with color.
    fn format_pct_change(pct: f64) -> String {
        if pct >= 0.0 {
            format!("(+{:.2}%)", pct).green().to_string()
        } else {
            format!("({:.2}%)", pct).red().to_string()
        }
    }
}
