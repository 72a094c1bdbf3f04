//! Sharpe CLI - Command line interface for maximum Sharpe allocation.
//!
//! Reads a JSON price file and prints JSON results for downstream reporting.

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use serde::Serialize;
use serde_json::json;
use sharpe_core::{
    ApiResponse, AssetSeries, OptimizerConfig, Pipeline, PriceRecord, PriceTable,
};
use std::fs;
use std::path::{Path, PathBuf};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser)]
#[command(name = "sharpe")]
#[command(about = "Sharpe allocation CLI - long-only maximum Sharpe portfolios")]
#[command(version)]
struct Cli {
    /// Config file (TOML). Defaults to $SHARPE_CONFIG_FILE or the user config dir
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Optimize one portfolio
    Optimize {
        #[command(flatten)]
        run: RunArgs,
        /// Maximum weight per asset (0.1 = 10%)
        #[arg(long)]
        cap: Option<f64>,
    },
    /// Optimize once per position cap
    Sweep {
        #[command(flatten)]
        run: RunArgs,
        /// Position caps (comma-separated)
        #[arg(long, value_delimiter = ',', required = true)]
        caps: Vec<f64>,
    },
    /// Print the effective configuration
    Config,
}

#[derive(Args)]
struct RunArgs {
    /// Price file: JSON array of {date, ticker, price} records or of asset series
    #[arg(short, long)]
    prices: PathBuf,
    /// Annual risk-free rate (0.04 = 4%)
    #[arg(long)]
    risk_free: Option<f64>,
    /// Weights below this are dropped after optimization
    #[arg(long)]
    threshold: Option<f64>,
    /// Return periods per year (252 daily, 12 monthly, 1 yearly)
    #[arg(long)]
    periods_per_year: Option<u32>,
}

impl RunArgs {
    fn apply(&self, mut config: OptimizerConfig) -> OptimizerConfig {
        if let Some(rf) = self.risk_free {
            config = config.with_risk_free_rate(rf);
        }
        if let Some(threshold) = self.threshold {
            config = config.with_significance_threshold(threshold);
        }
        if let Some(k) = self.periods_per_year {
            config = config.with_periods_per_year(k);
        }
        config
    }
}

/// Outcome of one cap in a sweep.
#[derive(Serialize)]
struct ScenarioOutcome<T> {
    position_cap: f64,
    #[serde(flatten)]
    response: ApiResponse<T>,
}

fn main() -> Result<()> {
    // Logs go to stderr so stdout stays machine-readable
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    let config = load_config(cli.config.as_deref())?;

    let output = match cli.command {
        Commands::Optimize { run, cap } => handle_optimize(&run, cap, config)?,
        Commands::Sweep { run, caps } => handle_sweep(&run, &caps, config)?,
        Commands::Config => serde_json::to_string_pretty(&ApiResponse::ok(config))?,
    };

    println!("{}", output);
    Ok(())
}

fn load_config(path: Option<&Path>) -> Result<OptimizerConfig> {
    let config = match path {
        Some(path) => OptimizerConfig::load(path)
            .with_context(|| format!("failed to load config {}", path.display()))?,
        None => OptimizerConfig::load_or_default().context("failed to load default config")?,
    };
    Ok(config)
}

fn load_prices(path: &Path) -> Result<PriceTable> {
    let content =
        fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))?;
    let value: serde_json::Value = serde_json::from_str(&content)
        .with_context(|| format!("{} is not valid JSON", path.display()))?;

    // Long records carry a top-level "ticker" + "price"; series carry "prices".
    let is_records = value
        .as_array()
        .and_then(|rows| rows.first())
        .map(|row| row.get("price").is_some())
        .unwrap_or(false);

    let table = if is_records {
        let records: Vec<PriceRecord> = serde_json::from_value(value)?;
        PriceTable::from_records(&records)
    } else {
        let series: Vec<AssetSeries> = serde_json::from_value(value)?;
        PriceTable::from_series(series)
    };
    Ok(table)
}

fn handle_optimize(run: &RunArgs, cap: Option<f64>, config: OptimizerConfig) -> Result<String> {
    let mut config = run.apply(config);
    if let Some(cap) = cap {
        config = config.with_position_cap(cap);
    }
    let prices = load_prices(&run.prices)?;

    let response = match Pipeline::prepare(&prices, &config).and_then(|p| p.run_configured()) {
        Ok(report) => serde_json::to_string_pretty(&ApiResponse::ok(report))?,
        Err(e) => serde_json::to_string_pretty(&ApiResponse::<()>::err(e.to_string()))?,
    };
    Ok(response)
}

fn handle_sweep(run: &RunArgs, caps: &[f64], config: OptimizerConfig) -> Result<String> {
    let config = run.apply(config);
    let prices = load_prices(&run.prices)?;

    let pipeline = match Pipeline::prepare(&prices, &config) {
        Ok(pipeline) => pipeline,
        Err(e) => {
            return Ok(serde_json::to_string_pretty(&ApiResponse::<()>::err(
                e.to_string(),
            ))?)
        }
    };

    let outcomes: Vec<_> = pipeline
        .sweep(caps)
        .into_iter()
        .map(|(position_cap, result)| ScenarioOutcome {
            position_cap,
            response: match result {
                Ok(report) => ApiResponse::ok(report),
                Err(e) => ApiResponse::err(e.to_string()),
            },
        })
        .collect();

    Ok(serde_json::to_string_pretty(&ApiResponse::ok(json!({
        "dropped": pipeline.returns().dropped,
        "scenarios": outcomes,
    })))?)
}
