//! # Run a backtest with defaults (synthetic data, rule oracle)
//! spreadsim run
//!
//! # Run with a config file and overrides
//! spreadsim run --config config/default.toml --symbols SPY,QQQ --seed 7

use anyhow::{Context, Result};
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};

use spreadsim::data::SyntheticGateway;
use spreadsim::engine::{BacktestConfig, BacktestEngine};
use spreadsim::oracle::RuleOracle;
use spreadsim::NullSink;

#[derive(Parser)]
#[command(name = "spreadsim")]
#[command(about = "Event-driven credit-spread options backtesting engine")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a backtest with the given configuration
    Run {
        /// Path to a TOML configuration file
        #[arg(short, long)]
        config: Option<String>,

        /// Comma-separated symbol list, overriding the config
        #[arg(short, long)]
        symbols: Option<String>,

        /// Start date (YYYY-MM-DD), overriding the config
        #[arg(long)]
        start: Option<NaiveDate>,

        /// End date (YYYY-MM-DD), overriding the config
        #[arg(long)]
        end: Option<NaiveDate>,

        /// Seed for the synthetic market gateway
        #[arg(long, default_value_t = 42)]
        seed: u64,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Run {
            config,
            symbols,
            start,
            end,
            seed,
        } => run(config, symbols, start, end, seed),
    }
}

fn run(
    config_path: Option<String>,
    symbols: Option<String>,
    start: Option<NaiveDate>,
    end: Option<NaiveDate>,
    seed: u64,
) -> Result<()> {
    let mut config = match config_path {
        Some(path) => {
            let raw = std::fs::read_to_string(&path)
                .with_context(|| format!("failed to read config file {path}"))?;
            toml::from_str::<BacktestConfig>(&raw)
                .with_context(|| format!("failed to parse config file {path}"))?
        }
        None => BacktestConfig::default(),
    };
    if let Some(symbols) = symbols {
        config.symbols = symbols
            .split(',')
            .map(|s| s.trim().to_uppercase())
            .filter(|s| !s.is_empty())
            .collect();
    }
    if let Some(start) = start {
        config.start_date = start;
    }
    if let Some(end) = end {
        config.end_date = end;
    }

    let mut engine = BacktestEngine::new(
        config,
        Box::new(SyntheticGateway::new(seed)),
        Box::new(RuleOracle::default()),
        Box::new(NullSink),
    )?;

    let bar = ProgressBar::new(0);
    bar.set_style(
        ProgressStyle::with_template(
            "{spinner:.green} [{bar:40.cyan/blue}] {pos}/{len} days ({msg})",
        )?
        .progress_chars("=>-"),
    );

    let result = engine.run_with_observer(|progress| {
        bar.set_length(progress.total_days as u64);
        bar.set_position(progress.days_processed as u64);
        bar.set_message(format!(
            "{} | equity ${} | open {}",
            progress.date, progress.equity, progress.open_positions
        ));
    });
    bar.finish_and_clear();

    println!("{}", result.summary_text());
    Ok(())
}
