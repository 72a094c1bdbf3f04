//! Run configuration.
//!
//! One immutable [`OptimizerConfig`] is threaded through every stage of a run.
//! It can be built in code or loaded from a TOML file:
//!
//! ```toml
//! risk_free_rate = 0.04
//! position_cap = 0.1
//! periods_per_year = 1
//! lookback = { periods = 5 }
//!
//! [solver]
//! max_iterations = 2000
//! ```

use crate::{Error, Result};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

/// Environment variable overriding the default config file location.
pub const CONFIG_FILE_ENV: &str = "SHARPE_CONFIG_FILE";

/// Which slice of the price history feeds the estimates.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum Lookback {
    /// Every date present in the price table
    #[default]
    All,
    /// The last `n` return periods (`n + 1` price dates)
    Periods(usize),
    /// Inclusive calendar range
    Dates { start: NaiveDate, end: NaiveDate },
}

/// Numerical knobs of the estimator and optimizer.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SolverConfig {
    /// Iteration cap for one optimizer attempt
    pub max_iterations: u64,
    /// Projected-gradient stationarity tolerance
    pub tolerance: f64,
    /// Relative ridge: lambda = regularization * trace(cov) / n
    pub regularization: f64,
    /// Candidates with periodic volatility below this are rejected
    pub volatility_floor: f64,
}

impl Default for SolverConfig {
    fn default() -> Self {
        Self {
            max_iterations: 1000,
            tolerance: 1e-9,
            regularization: 1e-6,
            volatility_floor: 1e-10,
        }
    }
}

/// Configuration of one optimization run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct OptimizerConfig {
    /// Annual risk-free rate (e.g. 0.04 for 4%)
    pub risk_free_rate: f64,
    /// Maximum weight of any single asset, in (0, 1]
    pub position_cap: f64,
    /// Weights below this are zeroed after optimization
    pub significance_threshold: f64,
    /// Return periods per year (252 daily, 12 monthly, 1 yearly)
    pub periods_per_year: u32,
    /// Analysis window
    pub lookback: Lookback,
    /// Drop assets whose mean periodic return is not above this
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min_mean_return: Option<f64>,
    pub solver: SolverConfig,
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self {
            risk_free_rate: 0.04,
            position_cap: 0.4,
            significance_threshold: 0.01,
            periods_per_year: 252,
            lookback: Lookback::All,
            min_mean_return: None,
            solver: SolverConfig::default(),
        }
    }
}

impl OptimizerConfig {
    pub fn with_position_cap(mut self, position_cap: f64) -> Self {
        self.position_cap = position_cap;
        self
    }

    pub fn with_risk_free_rate(mut self, risk_free_rate: f64) -> Self {
        self.risk_free_rate = risk_free_rate;
        self
    }

    pub fn with_significance_threshold(mut self, threshold: f64) -> Self {
        self.significance_threshold = threshold;
        self
    }

    pub fn with_periods_per_year(mut self, periods_per_year: u32) -> Self {
        self.periods_per_year = periods_per_year;
        self
    }

    pub fn with_lookback(mut self, lookback: Lookback) -> Self {
        self.lookback = lookback;
        self
    }

    pub fn with_min_mean_return(mut self, min_mean_return: Option<f64>) -> Self {
        self.min_mean_return = min_mean_return;
        self
    }

    /// Risk-free rate for one return period.
    pub fn periodic_risk_free_rate(&self) -> f64 {
        self.risk_free_rate / self.periods_per_year.max(1) as f64
    }

    /// Check every field against its admissible range.
    pub fn validate(&self) -> Result<()> {
        if !self.risk_free_rate.is_finite() {
            return Err(Error::InvalidConfig(
                "risk_free_rate must be finite".to_string(),
            ));
        }

        if !(self.position_cap > 0.0 && self.position_cap <= 1.0) {
            return Err(Error::InvalidConfig(format!(
                "position_cap must be in (0, 1], got {}",
                self.position_cap
            )));
        }

        if !(self.significance_threshold >= 0.0 && self.significance_threshold < 1.0) {
            return Err(Error::InvalidConfig(format!(
                "significance_threshold must be in [0, 1), got {}",
                self.significance_threshold
            )));
        }

        if self.periods_per_year == 0 {
            return Err(Error::InvalidConfig(
                "periods_per_year must be positive".to_string(),
            ));
        }

        match self.lookback {
            Lookback::Periods(0) => {
                return Err(Error::InvalidConfig(
                    "lookback must cover at least one period".to_string(),
                ));
            }
            Lookback::Dates { start, end } if start >= end => {
                return Err(Error::InvalidConfig(format!(
                    "lookback start {} must precede end {}",
                    start, end
                )));
            }
            _ => {}
        }

        if let Some(min) = self.min_mean_return {
            if !min.is_finite() {
                return Err(Error::InvalidConfig(
                    "min_mean_return must be finite".to_string(),
                ));
            }
        }

        let solver = &self.solver;
        if solver.max_iterations == 0 {
            return Err(Error::InvalidConfig(
                "solver.max_iterations must be positive".to_string(),
            ));
        }
        if !(solver.tolerance > 0.0) || !(solver.regularization > 0.0) {
            return Err(Error::InvalidConfig(
                "solver.tolerance and solver.regularization must be positive".to_string(),
            ));
        }
        if !(solver.volatility_floor >= 0.0) {
            return Err(Error::InvalidConfig(
                "solver.volatility_floor must be non-negative".to_string(),
            ));
        }

        Ok(())
    }

    /// Load and validate a TOML config file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load from the default location, falling back to defaults if no file exists.
    pub fn load_or_default() -> Result<Self> {
        let path = Self::default_path();
        if !path.exists() {
            return Ok(Self::default());
        }
        Self::load(&path)
    }

    /// Get the default config file path.
    ///
    /// Default path: `<config dir>/sharpe/config.toml`
    /// Can be overridden with the `SHARPE_CONFIG_FILE` environment variable.
    pub fn default_path() -> PathBuf {
        if let Ok(path) = env::var(CONFIG_FILE_ENV) {
            return PathBuf::from(path);
        }

        directories::BaseDirs::new()
            .map(|dirs| dirs.config_dir().join("sharpe/config.toml"))
            .unwrap_or_else(|| PathBuf::from("sharpe.toml"))
    }
}
