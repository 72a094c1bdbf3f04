//! Sharpe Core - Long-only maximum Sharpe ratio allocation.
//!
//! This crate turns a history of periodic prices into a capped, long-only
//! portfolio that maximizes the historical Sharpe ratio:
//!
//! - **Returns**: Price table to periodic returns, dropping gapped assets
//! - **Covariance**: Sample mean and ridge-regularized covariance
//! - **Optimizer**: Projected-gradient Sharpe maximization on the capped simplex
//! - **Filter**: Zeroing of negligible weights with renormalization
//! - **Performance**: Annualized return, volatility, Sharpe and drawdown
//!
//! # Example
//!
//! ```rust,no_run
//! use sharpe_core::{optimize_portfolio, OptimizerConfig, PriceTable};
//!
//! let prices: PriceTable = serde_json::from_str("[]").unwrap();
//! let config = OptimizerConfig::default().with_position_cap(0.2);
//!
//! let report = optimize_portfolio(&prices, &config).unwrap();
//! for entry in &report.allocations {
//!     println!("{}: {:.1}%", entry.ticker, entry.weight * 100.0);
//! }
//! println!("Sharpe: {:.2}", report.performance.sharpe_ratio);
//! ```

pub mod config;
pub mod portfolio;
pub mod types;

// Re-export commonly used types
pub use config::{Lookback, OptimizerConfig, SolverConfig};
pub use types::{
    AllocationEntry, AllocationReport, ApiResponse, AssetIndex, AssetSeries, CovarianceEstimate,
    DropReason, DroppedAsset, OptimizationResult, PerformanceReport, PricePoint, PriceRecord,
    PriceTable, ReturnsMatrix, StartPoint, ValuePoint, Weights,
};

// Re-export main functionality
pub use portfolio::{
    annualize_return, build_returns_matrix, estimate_covariance, evaluate_performance,
    filter_weights, optimize_portfolio, optimize_sharpe, Pipeline,
};

/// Error types for sharpe-core operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Config parse error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Invalid operation: {0}")]
    InvalidOperation(String),

    #[error("Insufficient data: {0}")]
    InsufficientData(String),

    #[error("Singular covariance: {0}")]
    SingularCovariance(String),

    #[error("Infeasible constraints: {0}")]
    InfeasibleConstraints(String),

    #[error("Optimization did not converge: {0}")]
    OptimizationDidNotConverge(String),

    #[error("Degenerate series: {0}")]
    DegenerateSeries(String),
}

/// Result type for sharpe-core operations.
pub type Result<T> = std::result::Result<T, Error>;
