//! End-to-end allocation runs.
//!
//! [`Pipeline::prepare`] derives the returns matrix and covariance estimate
//! once. Each [`Pipeline::run`] then optimizes, filters and evaluates for one
//! position cap without touching the shared inputs, so several caps can be
//! run side by side with [`Pipeline::sweep`].

use super::covariance::estimate_covariance;
use super::filter::filter_weights;
use super::optimizer::optimize_sharpe;
use super::performance::{allocation_entries, evaluate_performance};
use super::returns::build_returns_matrix;
use crate::config::OptimizerConfig;
use crate::types::{AllocationReport, CovarianceEstimate, PriceTable, ReturnsMatrix};
use crate::Result;
use rayon::prelude::*;
use tracing::info;

/// Immutable inputs shared by every scenario of one price table.
#[derive(Debug, Clone)]
pub struct Pipeline {
    config: OptimizerConfig,
    returns: ReturnsMatrix,
    estimate: CovarianceEstimate,
}

impl Pipeline {
    /// Validate `config`, build returns and estimate moments.
    pub fn prepare(prices: &PriceTable, config: &OptimizerConfig) -> Result<Self> {
        config.validate()?;

        let returns = build_returns_matrix(prices, config)?;
        let estimate = estimate_covariance(&returns, config.solver.regularization)?;

        info!(
            assets = returns.n_assets(),
            periods = returns.n_periods(),
            dropped = returns.dropped.len(),
            "Pipeline prepared"
        );

        Ok(Self {
            config: config.clone(),
            returns,
            estimate,
        })
    }

    pub fn config(&self) -> &OptimizerConfig {
        &self.config
    }

    pub fn returns(&self) -> &ReturnsMatrix {
        &self.returns
    }

    pub fn estimate(&self) -> &CovarianceEstimate {
        &self.estimate
    }

    /// Optimize, filter and evaluate with the configured position cap.
    pub fn run_configured(&self) -> Result<AllocationReport> {
        self.run(self.config.position_cap)
    }

    /// Optimize, filter and evaluate with `position_cap`.
    pub fn run(&self, position_cap: f64) -> Result<AllocationReport> {
        let config = self.config.clone().with_position_cap(position_cap);
        config.validate()?;

        let optimization = optimize_sharpe(&self.estimate, &config)?;
        let weights = filter_weights(&optimization.weights, config.significance_threshold)?;
        let performance = evaluate_performance(&weights, &self.returns, &self.estimate, &config)?;
        let allocations = allocation_entries(&weights, &self.returns, &self.estimate, &config);

        info!(
            cap = position_cap,
            positions = weights.active_count(),
            annualized_return = performance.annualized_return,
            sharpe_ratio = performance.sharpe_ratio,
            "Allocation complete"
        );

        Ok(AllocationReport {
            config,
            dropped: self.returns.dropped.clone(),
            tickers: self.returns.index.clone(),
            optimization,
            weights,
            performance,
            allocations,
        })
    }

    /// Run every cap in parallel. Results keep the order of `caps`.
    pub fn sweep(&self, caps: &[f64]) -> Vec<(f64, Result<AllocationReport>)> {
        caps.par_iter().map(|&cap| (cap, self.run(cap))).collect()
    }
}

/// One-shot allocation for `config.position_cap`.
pub fn optimize_portfolio(
    prices: &PriceTable,
    config: &OptimizerConfig,
) -> Result<AllocationReport> {
    Pipeline::prepare(prices, config)?.run_configured()
}
