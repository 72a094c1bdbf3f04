//! Portfolio performance analytics.

use crate::config::OptimizerConfig;
use crate::types::{
    AllocationEntry, CovarianceEstimate, PerformanceReport, ReturnsMatrix, ValuePoint, Weights,
};
use crate::{Error, Result};

/// Annualized performance of `weights` over the returns window.
///
/// - Return: `(prod(1 + r_t))^(k / T) - 1`, geometric.
/// - Volatility: `sqrt(w' cov w) * sqrt(k)` with the regularized covariance.
/// - Sharpe: `(annualized return - risk_free_rate) / annualized volatility`.
///
/// # Errors
///
/// - `DegenerateSeries` with fewer than two periods.
/// - `InvalidOperation` if `weights` does not match the asset count.
pub fn evaluate_performance(
    weights: &Weights,
    returns: &ReturnsMatrix,
    estimate: &CovarianceEstimate,
    config: &OptimizerConfig,
) -> Result<PerformanceReport> {
    let periods = returns.n_periods();
    if periods < 2 {
        return Err(Error::DegenerateSeries(format!(
            "need at least 2 periods to annualize, got {}",
            periods
        )));
    }
    if weights.len() != returns.n_assets() || weights.len() != estimate.n_assets() {
        return Err(Error::InvalidOperation(format!(
            "{} weights for {} assets",
            weights.len(),
            returns.n_assets()
        )));
    }

    let k = config.periods_per_year;
    let portfolio_returns = returns.portfolio_returns(weights);

    let values = cumulative_values(&portfolio_returns);
    let compound_return = values[values.len() - 1] - 1.0;
    let annualized_return = annualize_return(compound_return, periods, k);

    let annualized_volatility =
        estimate.portfolio_volatility(weights.as_slice()) * (k as f64).sqrt();
    let sharpe_ratio = if annualized_volatility > 0.0 {
        (annualized_return - config.risk_free_rate) / annualized_volatility
    } else {
        0.0
    };

    let value_series = returns
        .dates
        .iter()
        .zip(values.iter())
        .map(|(&date, &value)| ValuePoint { date, value })
        .collect();

    Ok(PerformanceReport {
        annualized_return,
        annualized_volatility,
        sharpe_ratio,
        compound_return,
        max_drawdown: max_drawdown(&values),
        periods,
        periods_per_year: k,
        value_series,
    })
}

/// Annualize a total fractional return earned over `periods` periods.
///
/// `(1 + total)^(periods_per_year / periods) - 1`. A total loss of 100% or
/// more annualizes to -1.
pub fn annualize_return(total_return: f64, periods: usize, periods_per_year: u32) -> f64 {
    if periods == 0 {
        return 0.0;
    }

    let growth = 1.0 + total_return;
    if growth <= 0.0 {
        return -1.0;
    }
    if periods == periods_per_year as usize {
        return total_return;
    }

    let years = periods as f64 / periods_per_year as f64;
    growth.powf(1.0 / years) - 1.0
}

/// Value path starting at 1.0, one point per window date.
pub fn cumulative_values(returns: &[f64]) -> Vec<f64> {
    let mut values = Vec::with_capacity(returns.len() + 1);
    let mut value = 1.0;
    values.push(value);
    for r in returns {
        value *= 1.0 + r;
        values.push(value);
    }
    values
}

/// Largest peak-to-trough decline of a value path, as a decimal (e.g. 0.15 for 15%).
pub fn max_drawdown(values: &[f64]) -> f64 {
    let mut running_max = match values.first() {
        Some(&v) => v,
        None => return 0.0,
    };
    let mut max_drawdown = 0.0;

    for &value in values {
        if value > running_max {
            running_max = value;
        }
        if running_max > 0.0 {
            let drawdown = (running_max - value) / running_max;
            if drawdown > max_drawdown {
                max_drawdown = drawdown;
            }
        }
    }

    max_drawdown
}

/// Standalone statistics for every asset holding a non-zero weight, largest weight first.
pub fn allocation_entries(
    weights: &Weights,
    returns: &ReturnsMatrix,
    estimate: &CovarianceEstimate,
    config: &OptimizerConfig,
) -> Vec<AllocationEntry> {
    let k = config.periods_per_year as f64;

    let mut entries: Vec<AllocationEntry> = weights
        .iter()
        .enumerate()
        .filter(|(_, w)| **w > 0.0)
        .filter_map(|(i, &weight)| {
            let ticker = returns.index.ticker(i)?.to_string();
            let meta = returns.meta.get(i).cloned().unwrap_or_default();
            let annualized_return = estimate.mean_returns[i] * k;
            let annualized_volatility =
                estimate.sample_covariance[(i, i)].max(0.0).sqrt() * k.sqrt();
            let sharpe_ratio = if annualized_volatility > 0.0 {
                (annualized_return - config.risk_free_rate) / annualized_volatility
            } else {
                0.0
            };

            Some(AllocationEntry {
                ticker,
                name: meta.name,
                category: meta.category,
                weight,
                annualized_return,
                annualized_volatility,
                sharpe_ratio,
            })
        })
        .collect();

    entries.sort_by(|a, b| b.weight.partial_cmp(&a.weight).unwrap_or(std::cmp::Ordering::Equal));
    entries
}
