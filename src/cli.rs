//! Command-line interface for the walk-forward engine.

use wfo_engine::analytics::ResultFormatter;
use wfo_engine::config::WfoFileConfig;
use wfo_engine::data::{load_series, parse_date, DataConfig, InMemorySupplier};
use wfo_engine::error::{Result, WfoError};
use wfo_engine::export::{export_report_json, export_windows_csv, Exporter};
use wfo_engine::search::{
    GridSearch, ParamRange, ParameterSearch, RandomSearch, ScoringMetric, SearchSpace,
};
use wfo_engine::simulator::ExecutionConfig;
use wfo_engine::stitch::OosPortfolio;
use wfo_engine::strategies::{available_strategies, strategy_by_name};
use wfo_engine::timeframe::Timeframe;
use wfo_engine::types::ParamSet;
use wfo_engine::walkforward::{WalkForwardOptimizer, WfoConfig, WfoPolicy, WfoReport};

use clap::{Parser, Subcommand, ValueEnum};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

/// wfo - Walk-forward optimization for signal-based trading strategies.
#[derive(Parser)]
#[command(name = "wfo")]
#[command(version)]
#[command(about = "Walk-forward optimization for signal-based trading strategies")]
#[command(long_about = None)]
pub struct Cli {
    /// Verbosity level
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Output format
    #[arg(short, long, value_enum, default_value = "text")]
    pub output: OutputFormat,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run walk-forward optimization on a CSV file
    Run {
        /// Path to CSV data file
        #[arg(short, long)]
        data: PathBuf,

        /// Symbol name
        #[arg(short, long, default_value = "SYMBOL")]
        symbol: String,

        /// Bar timeframe (1d, 4h, 15m, 1w)
        #[arg(short, long, default_value = "1d")]
        timeframe: String,

        /// Strategy to optimize
        #[arg(short = 'S', long, default_value = "mean-reversion")]
        strategy: String,

        /// Training block length in months
        #[arg(long, default_value = "6")]
        train: u32,

        /// Test block length in months
        #[arg(long, default_value = "2")]
        test: u32,

        /// First test day (YYYY-MM-DD)
        #[arg(long)]
        start: String,

        /// Last data day (YYYY-MM-DD)
        #[arg(long)]
        end: String,

        /// Metric the search maximizes
        #[arg(short, long, default_value = "sharpe")]
        metric: String,

        /// Search range as name=min:max:step (repeatable)
        #[arg(short, long = "param")]
        params: Vec<String>,

        /// Search method
        #[arg(long, value_enum, default_value = "grid")]
        search: SearchMethod,

        /// Trials for random search
        #[arg(long, default_value = "50")]
        trials: usize,

        /// Seed for random search
        #[arg(long)]
        seed: Option<u64>,

        /// Initial capital
        #[arg(short, long, default_value = "100000")]
        capital: f64,

        /// Fee percentage per fill (e.g., 0.1 for 0.1%)
        #[arg(long, default_value = "0.1")]
        fees: f64,

        /// Slippage percentage per fill (e.g., 0.05 for 0.05%)
        #[arg(long, default_value = "0.05")]
        slippage: f64,

        /// Minimum trades for a test block to count
        #[arg(long, default_value = "5")]
        min_trades: usize,

        /// Also stitch the test blocks into one out-of-sample portfolio
        #[arg(long)]
        portfolio: bool,

        /// Directory for CSV/JSON exports
        #[arg(long)]
        export_dir: Option<PathBuf>,
    },

    /// Run walk-forward optimization from a TOML config file
    RunConfig {
        /// Path to config file
        #[arg(short, long)]
        config: PathBuf,

        /// Also stitch the test blocks into one out-of-sample portfolio
        #[arg(long)]
        portfolio: bool,

        /// Directory for CSV/JSON exports
        #[arg(long)]
        export_dir: Option<PathBuf>,
    },

    /// Create an example configuration file
    Init {
        /// Output path for config file
        #[arg(short, long, default_value = "wfo.toml")]
        output: PathBuf,
    },

    /// List available strategies
    Strategies,

    /// Validate a data file
    Validate {
        /// Path to CSV data file
        #[arg(short, long)]
        data: PathBuf,
    },
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, ValueEnum)]
pub enum SearchMethod {
    Grid,
    Random,
}

impl Cli {
    /// Initialize logging based on verbosity level.
    pub fn init_logging(&self) -> Result<()> {
        let level = match self.verbose {
            0 => Level::WARN,
            1 => Level::INFO,
            2 => Level::DEBUG,
            _ => Level::TRACE,
        };

        let subscriber = FmtSubscriber::builder()
            .with_max_level(level)
            .with_target(false)
            .finish();

        tracing::subscriber::set_global_default(subscriber)
            .map_err(|e| WfoError::ConfigError(format!("Failed to set tracing subscriber: {}", e)))
    }
}

/// Run the CLI application.
pub fn run() -> Result<()> {
    let cli = Cli::parse();
    cli.init_logging()?;

    match &cli.command {
        Commands::Run {
            data,
            symbol,
            timeframe,
            strategy,
            train,
            test,
            start,
            end,
            metric,
            params,
            search,
            trials,
            seed,
            capital,
            fees,
            slippage,
            min_trades,
            portfolio,
            export_dir,
        } => {
            let timeframe: Timeframe = timeframe.parse()?;
            let generator = strategy_by_name(strategy)?;
            let space = if params.is_empty() {
                default_space(&generator.default_params())
            } else {
                parse_space(params)?
            };

            let execution = ExecutionConfig {
                initial_capital: *capital,
                fees_pct: fees / 100.0,
                slippage_pct: slippage / 100.0,
                ..Default::default()
            };
            let config = WfoConfig::new(parse_date(start)?, parse_date(end)?)
                .with_windows(*train, *test)
                .with_metric(metric.parse::<ScoringMetric>()?)
                .with_execution(execution);

            let search: Box<dyn ParameterSearch> = match search {
                SearchMethod::Grid => Box::new(GridSearch::new()),
                SearchMethod::Random => {
                    let mut random = RandomSearch::new(*trials);
                    if let Some(seed) = seed {
                        random = random.with_seed(*seed);
                    }
                    Box::new(random)
                }
            };

            info!("Loading data from: {}", data.display());
            let series = load_series(data, &DataConfig::default())?;
            let supplier = InMemorySupplier::new().with_series(symbol, timeframe, series);

            let optimizer = WalkForwardOptimizer::new(Box::new(supplier), generator)
                .with_search(search)
                .with_policy(WfoPolicy {
                    min_test_trades: *min_trades,
                    show_progress: cli.output == OutputFormat::Text,
                    ..Default::default()
                });

            run_and_report(
                &optimizer,
                symbol,
                timeframe,
                &config,
                &space,
                *portfolio,
                export_dir.as_deref(),
                cli.output,
            )
        }

        Commands::RunConfig {
            config,
            portfolio,
            export_dir,
        } => run_from_config(config, *portfolio, export_dir.as_deref(), cli.output),

        Commands::Init { output } => init_config(output),

        Commands::Strategies => {
            print_strategies();
            Ok(())
        }

        Commands::Validate { data } => validate_data(data),
    }
}

/// Parse `name=min:max:step` (or `name=value` for a fixed parameter).
fn parse_range(arg: &str) -> Result<(String, ParamRange)> {
    let (name, range) = arg.split_once('=').ok_or_else(|| {
        WfoError::InvalidInput(format!("Expected name=min:max:step, got '{}'", arg))
    })?;

    let numbers = range
        .split(':')
        .map(|v| {
            v.trim().parse::<f64>().map_err(|_| {
                WfoError::InvalidInput(format!("Invalid number '{}' in '{}'", v, arg))
            })
        })
        .collect::<Result<Vec<f64>>>()?;

    let range = match numbers.as_slice() {
        [value] => ParamRange::fixed(*value),
        [min, max] => ParamRange::new(*min, *max, 1.0),
        [min, max, step] => ParamRange::new(*min, *max, *step),
        _ => {
            return Err(WfoError::InvalidInput(format!(
                "Expected name=min:max:step, got '{}'",
                arg
            )))
        }
    };
    Ok((name.trim().to_string(), range))
}

fn parse_space(args: &[String]) -> Result<SearchSpace> {
    let mut space = SearchSpace::new();
    for arg in args {
        let (name, range) = parse_range(arg)?;
        space.insert(name, range);
    }
    space.validate()?;
    Ok(space)
}

/// Without explicit ranges every parameter is pinned to its default.
fn default_space(defaults: &ParamSet) -> SearchSpace {
    defaults
        .iter()
        .fold(SearchSpace::new(), |space, (name, value)| {
            space.with(name.clone(), ParamRange::fixed(*value))
        })
}

#[allow(clippy::too_many_arguments)]
fn run_and_report(
    optimizer: &WalkForwardOptimizer,
    symbol: &str,
    timeframe: Timeframe,
    config: &WfoConfig,
    space: &SearchSpace,
    portfolio: bool,
    export_dir: Option<&Path>,
    output: OutputFormat,
) -> Result<()> {
    let (report, stitched) = if portfolio {
        optimizer.run_wfo_with_portfolio(symbol, timeframe, config, space)?
    } else {
        (optimizer.run_wfo(symbol, timeframe, config, space)?, None)
    };

    match output {
        OutputFormat::Text => {
            ResultFormatter::print_wfo_report(&report);
            if let Some(p) = &stitched {
                ResultFormatter::print_portfolio(p);
                ResultFormatter::print_trades(&p.result.trades, 20);
            }
        }
        OutputFormat::Json => {
            let value = serde_json::json!({
                "report": &report,
                "portfolio": &stitched,
            });
            println!("{}", serde_json::to_string_pretty(&value)?);
        }
    }

    if let Some(dir) = export_dir {
        export_all(dir, &report, stitched.as_ref())?;
    }
    Ok(())
}

fn export_all(dir: &Path, report: &WfoReport, portfolio: Option<&OosPortfolio>) -> Result<()> {
    fs::create_dir_all(dir)?;
    export_report_json(report, dir.join("report.json"))?;
    export_windows_csv(report, dir.join("windows.csv"))?;

    if let Some(p) = portfolio {
        let exporter = Exporter::new(p);
        exporter.export_json(dir.join("portfolio.json"))?;
        exporter.export_equity_csv(dir.join("equity.csv"))?;
        exporter.export_trades_csv(dir.join("trades.csv"))?;
        exporter.export_param_history_csv(dir.join("params.csv"))?;
    }

    info!("Exported results to {}", dir.display());
    Ok(())
}

fn run_from_config(
    config_path: &Path,
    portfolio: bool,
    export_dir: Option<&Path>,
    output: OutputFormat,
) -> Result<()> {
    let file_config = WfoFileConfig::load(config_path)?;
    let config = file_config.to_wfo_config()?;
    let space = file_config.search_space()?;
    let timeframe = file_config.timeframe()?;
    let optimizer = file_config.build_optimizer()?;

    run_and_report(
        &optimizer,
        &file_config.data.symbol,
        timeframe,
        &config,
        &space,
        portfolio,
        export_dir,
        output,
    )
}

fn print_strategies() {
    println!("\nAvailable Strategies:\n");

    for (name, description) in available_strategies() {
        println!("  {}", name);
        println!("    {}", description);
        if let Ok(generator) = strategy_by_name(name) {
            println!("    Defaults: {}", generator.default_params());
        }
        println!();
    }

    println!("Search ranges are given as name=min:max:step, e.g.:");
    println!("  wfo run -d data.csv --start 2022-01-01 --end 2023-12-31 -p period=10:30:5 -p entry_z=1:2:0.5");
    println!();
}

fn init_config(output: &Path) -> Result<()> {
    fs::write(output, WfoFileConfig::example())?;
    println!("Created example configuration file: {}", output.display());
    println!("\nEdit this file to customize your run, then run:");
    println!("  wfo run-config -c {}", output.display());
    Ok(())
}

fn validate_data(data_path: &Path) -> Result<()> {
    println!("Validating data file: {}", data_path.display());

    let series = load_series(data_path, &DataConfig::default())?;
    let bars = series.bars();

    println!("\nData Summary:");
    println!("  Rows: {}", bars.len());

    if let (Some(first), Some(last)) = (bars.first(), bars.last()) {
        println!("  Start: {}", first.timestamp);
        println!("  End: {}", last.timestamp);

        let closes = series.closes();
        let min_price = closes.iter().fold(f64::INFINITY, |a: f64, &b| a.min(b));
        let max_price = closes.iter().fold(f64::NEG_INFINITY, |a: f64, &b| a.max(b));
        let avg_price: f64 = closes.iter().sum::<f64>() / closes.len() as f64;

        println!("  Price Range: {:.2} - {:.2}", min_price, max_price);
        println!("  Average Price: {:.2}", avg_price);

        let months = (last.timestamp - first.timestamp).num_days() as f64 / 30.44;
        println!("  Span: {:.1} months", months);
    }

    println!("\nValidation: PASSED");
    Ok(())
}
