//! Maximum Sharpe ratio optimizer.
//!
//! $$
//! \max_{\mathbf{w}} \frac{\mathbf{w}^\top\mu - r_f}{\sqrt{\mathbf{w}^\top\Sigma\mathbf{w}}}
//! \quad \text{s.t.} \quad \sum_i w_i = 1,\ 0 \le w_i \le c
//! $$
//!
//! The negative Sharpe ratio is minimized with projected gradient descent on
//! the capped simplex, driven by argmin's [`Executor`]. Steps start from a
//! Barzilai-Borwein estimate and backtrack until the Armijo condition holds.
//! Candidates whose volatility falls below the configured floor cost `+inf`,
//! so the line search never accepts them.

use crate::config::OptimizerConfig;
use crate::types::{CovarianceEstimate, OptimizationResult, StartPoint, Weights};
use crate::{Error, Result};
use argmin::core::{
    CostFunction, Error as ArgminError, Executor, Gradient, IterState, Problem, Solver, State,
    TerminationReason, TerminationStatus, KV,
};
use nalgebra::{DMatrix, DVector};
use tracing::{debug, info, warn};

/// Slack allowed on `n * cap >= 1`.
const FEASIBILITY_SLACK: f64 = 1e-12;

/// Stationarity gap accepted when the line search can no longer make progress.
const STALL_TOLERANCE: f64 = 1e-6;

/// Relative objective change below which a step counts as no progress.
const FUNCTION_TOLERANCE: f64 = 1e-15;

/// Armijo sufficient-decrease constant.
const ARMIJO: f64 = 1e-4;

const MAX_BACKTRACKS: usize = 60;

type SolverState = IterState<Vec<f64>, Vec<f64>, (), (), (), f64>;

/// Negative Sharpe ratio over portfolio weights.
#[derive(Debug, Clone)]
struct NegativeSharpe {
    mean_returns: DVector<f64>,
    covariance: DMatrix<f64>,
    risk_free: f64,
    volatility_floor: f64,
}

impl NegativeSharpe {
    /// Expected return, volatility and `covariance * w`.
    fn moments(&self, weights: &[f64]) -> (f64, f64, DVector<f64>) {
        let w = DVector::from_column_slice(weights);
        let sigma_w = &self.covariance * &w;
        let variance = sigma_w.dot(&w).max(0.0);
        (w.dot(&self.mean_returns), variance.sqrt(), sigma_w)
    }
}

impl CostFunction for NegativeSharpe {
    type Param = Vec<f64>;
    type Output = f64;

    fn cost(&self, weights: &Self::Param) -> std::result::Result<Self::Output, ArgminError> {
        let (ret, vol, _) = self.moments(weights);
        if !(vol >= self.volatility_floor) || vol <= 0.0 {
            return Ok(f64::INFINITY);
        }
        Ok(-(ret - self.risk_free) / vol)
    }
}

impl Gradient for NegativeSharpe {
    type Param = Vec<f64>;
    type Gradient = Vec<f64>;

    fn gradient(&self, weights: &Self::Param) -> std::result::Result<Self::Gradient, ArgminError> {
        let (ret, vol, sigma_w) = self.moments(weights);
        if !(vol >= self.volatility_floor) || vol <= 0.0 {
            return Err(ArgminError::msg(format!(
                "portfolio volatility {:e} below floor {:e}",
                vol, self.volatility_floor
            )));
        }

        // d(-S)/dw = -mu / vol + (ret - rf) * (cov w) / vol^3
        let excess = ret - self.risk_free;
        let vol_cubed = vol * vol * vol;
        Ok(self
            .mean_returns
            .iter()
            .zip(sigma_w.iter())
            .map(|(mu, sw)| -mu / vol + excess * sw / vol_cubed)
            .collect())
    }
}

#[derive(Debug, Clone, PartialEq)]
enum SearchStatus {
    Running,
    Stationary,
    Stalled(String),
}

/// Projected gradient descent on `{ w : sum(w) = 1, 0 <= w <= cap }`.
#[derive(Debug, Clone)]
struct CappedSimplexDescent {
    cap: f64,
    tolerance: f64,
    previous: Option<(Vec<f64>, Vec<f64>)>,
    status: SearchStatus,
}

impl CappedSimplexDescent {
    fn new(cap: f64, tolerance: f64) -> Self {
        Self {
            cap,
            tolerance,
            previous: None,
            status: SearchStatus::Running,
        }
    }

    /// Barzilai-Borwein step from the last accepted move, else one that moves
    /// the largest coordinate by at most 1.
    fn initial_step(&self, weights: &[f64], gradient: &[f64]) -> f64 {
        if let Some((prev_w, prev_g)) = &self.previous {
            let mut ss = 0.0;
            let mut sy = 0.0;
            for i in 0..weights.len() {
                let s = weights[i] - prev_w[i];
                let y = gradient[i] - prev_g[i];
                ss += s * s;
                sy += s * y;
            }
            if sy > 0.0 && ss > 0.0 {
                return (ss / sy).clamp(1e-12, 1e12);
            }
        }
        (1.0 / max_abs(gradient).max(f64::MIN_POSITIVE)).min(1e12)
    }
}

impl<O> Solver<O, SolverState> for CappedSimplexDescent
where
    O: CostFunction<Param = Vec<f64>, Output = f64>
        + Gradient<Param = Vec<f64>, Gradient = Vec<f64>>,
{
    const NAME: &'static str = "Projected gradient (capped simplex)";

    fn init(
        &mut self,
        problem: &mut Problem<O>,
        state: SolverState,
    ) -> std::result::Result<(SolverState, Option<KV>), ArgminError> {
        let weights = state
            .get_param()
            .cloned()
            .ok_or_else(|| ArgminError::msg("optimizer started without initial weights"))?;
        let cost = problem.cost(&weights)?;
        if !cost.is_finite() {
            return Err(ArgminError::msg(
                "starting portfolio volatility is below the floor",
            ));
        }
        Ok((state.param(weights).cost(cost), None))
    }

    fn next_iter(
        &mut self,
        problem: &mut Problem<O>,
        state: SolverState,
    ) -> std::result::Result<(SolverState, Option<KV>), ArgminError> {
        let weights = state
            .get_param()
            .cloned()
            .ok_or_else(|| ArgminError::msg("optimizer state lost its weights"))?;
        let cost = state.get_cost();
        let gradient = problem.gradient(&weights)?;

        if gradient.iter().any(|g| !g.is_finite()) {
            self.status = SearchStatus::Stalled("non-finite gradient".to_string());
            return Ok((state, None));
        }

        let gap = stationarity_gap(&weights, &gradient, cost, self.cap);
        if gap <= self.tolerance {
            self.status = SearchStatus::Stationary;
            return Ok((state, None));
        }

        let mut step = self.initial_step(&weights, &gradient);
        for _ in 0..MAX_BACKTRACKS {
            let stepped: Vec<f64> = weights
                .iter()
                .zip(gradient.iter())
                .map(|(w, g)| w - step * g)
                .collect();
            let candidate = project_capped_simplex(&stepped, self.cap);
            let candidate_cost = problem.cost(&candidate)?;

            let directional: f64 = gradient
                .iter()
                .zip(candidate.iter().zip(weights.iter()))
                .map(|(g, (c, w))| g * (c - w))
                .sum();

            if candidate_cost.is_finite() && candidate_cost <= cost + ARMIJO * directional {
                let moved = candidate
                    .iter()
                    .zip(weights.iter())
                    .fold(0.0_f64, |m, (c, w)| m.max((c - w).abs()));
                if moved == 0.0 {
                    self.status = SearchStatus::Stationary;
                    return Ok((state, None));
                }
                let change = (cost - candidate_cost).abs();
                if change <= FUNCTION_TOLERANCE * cost.abs().max(1.0) && gap <= STALL_TOLERANCE {
                    self.status = SearchStatus::Stationary;
                }
                self.previous = Some((weights, gradient));
                return Ok((state.param(candidate).cost(candidate_cost), None));
            }
            step *= 0.5;
        }

        // Line search exhausted: accept as stationary only if the gap is already small.
        self.status = if gap <= STALL_TOLERANCE {
            SearchStatus::Stationary
        } else {
            SearchStatus::Stalled(format!("line search stalled with stationarity gap {:e}", gap))
        };
        Ok((state, None))
    }

    fn terminate(&mut self, _state: &SolverState) -> TerminationStatus {
        match &self.status {
            SearchStatus::Running => TerminationStatus::NotTerminated,
            SearchStatus::Stationary => {
                TerminationStatus::Terminated(TerminationReason::SolverConverged)
            }
            SearchStatus::Stalled(reason) => {
                TerminationStatus::Terminated(TerminationReason::SolverExit(reason.clone()))
            }
        }
    }
}

/// A converged solver run.
struct Solution {
    weights: Vec<f64>,
    iterations: u64,
}

/// Solve the constrained Sharpe maximization for `config.position_cap`.
///
/// Starts from equal weights. If that attempt does not converge, retries once
/// from equal weights on the `ceil(1 / cap)` assets with the highest mean
/// return. The returned weights are clamped into `[0, cap]` and renormalized.
///
/// When every asset has a negative excess return the ratio is not concave and
/// the result may be a local rather than the global optimum.
///
/// # Errors
///
/// - `InfeasibleConstraints` if `n * cap < 1`.
/// - `OptimizationDidNotConverge` if both attempts fail.
pub fn optimize_sharpe(
    estimate: &CovarianceEstimate,
    config: &OptimizerConfig,
) -> Result<OptimizationResult> {
    let n = estimate.n_assets();
    let cap = config.position_cap;

    if n == 0 {
        return Err(Error::InsufficientData(
            "no assets to optimize".to_string(),
        ));
    }
    if !(cap > 0.0 && cap <= 1.0) {
        return Err(Error::InvalidConfig(format!(
            "position_cap must be in (0, 1], got {}",
            cap
        )));
    }
    check_feasibility(n, cap)?;

    let problem = NegativeSharpe {
        mean_returns: estimate.mean_returns.clone(),
        covariance: estimate.covariance.clone(),
        risk_free: config.periodic_risk_free_rate(),
        volatility_floor: config.solver.volatility_floor,
    };

    let uniform = Weights::uniform(n).into_inner();
    let (solution, start) = match solve_from(&problem, uniform, config) {
        Ok(solution) => (solution, StartPoint::Uniform),
        Err(first) => {
            warn!(
                reason = %first,
                "Uniform start did not converge, retrying from top mean-return assets"
            );
            let fallback = top_mean_start(&estimate.mean_returns, cap);
            match solve_from(&problem, fallback, config) {
                Ok(solution) => (solution, StartPoint::TopMeanReturn),
                Err(second) => {
                    return Err(Error::OptimizationDidNotConverge(format!(
                        "uniform start: {}; top mean-return start: {}",
                        first, second
                    )));
                }
            }
        }
    };

    let weights = clamp_and_normalize(&solution.weights, cap);
    let expected_return = estimate.portfolio_return(&weights);
    let volatility = estimate.portfolio_volatility(&weights);
    let sharpe_ratio = if volatility > 0.0 {
        (expected_return - problem.risk_free) / volatility
    } else {
        0.0
    };

    info!(
        assets = n,
        cap,
        iterations = solution.iterations,
        ?start,
        sharpe_ratio,
        "Sharpe optimization converged"
    );

    Ok(OptimizationResult {
        weights: Weights::new(weights),
        expected_return,
        volatility,
        sharpe_ratio,
        iterations: solution.iterations,
        start,
    })
}

/// `n` assets capped at `cap` must be able to hold the whole portfolio.
pub fn check_feasibility(n: usize, cap: f64) -> Result<()> {
    if (n as f64) * cap < 1.0 - FEASIBILITY_SLACK {
        return Err(Error::InfeasibleConstraints(format!(
            "{} asset(s) capped at {:.2}% can hold at most {:.2}% of the portfolio",
            n,
            cap * 100.0,
            n as f64 * cap * 100.0
        )));
    }
    Ok(())
}

fn solve_from(
    problem: &NegativeSharpe,
    start: Vec<f64>,
    config: &OptimizerConfig,
) -> std::result::Result<Solution, String> {
    let solver = CappedSimplexDescent::new(config.position_cap, config.solver.tolerance);
    let max_iters = config.solver.max_iterations;

    let result = Executor::new(problem.clone(), solver)
        .configure(|state| state.param(start).max_iters(max_iters))
        .run()
        .map_err(|e| e.to_string())?;

    let state = result.state();
    let iterations = state.get_iter();
    match state.get_termination_status() {
        TerminationStatus::Terminated(TerminationReason::SolverConverged) => {
            let weights = state
                .get_param()
                .cloned()
                .ok_or_else(|| "solver returned no weights".to_string())?;
            debug!(iterations, cost = state.get_cost(), "Solver converged");
            Ok(Solution {
                weights,
                iterations,
            })
        }
        TerminationStatus::Terminated(reason) => {
            Err(format!("{:?} after {} iterations", reason, iterations))
        }
        TerminationStatus::NotTerminated => Err("solver stopped without terminating".to_string()),
    }
}

/// Equal weights on the `ceil(1 / cap)` highest mean-return assets. Ties keep index order.
fn top_mean_start(mean_returns: &DVector<f64>, cap: f64) -> Vec<f64> {
    let n = mean_returns.len();
    let k = ((1.0 / cap) - FEASIBILITY_SLACK).ceil().max(1.0) as usize;
    let k = k.min(n);

    let mut order: Vec<usize> = (0..n).collect();
    order.sort_by(|&a, &b| {
        mean_returns[b]
            .partial_cmp(&mean_returns[a])
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    let mut weights = vec![0.0; n];
    for &i in order.iter().take(k) {
        weights[i] = 1.0 / k as f64;
    }
    weights
}

/// Clamp into `[0, cap]` and rescale to sum to one.
fn clamp_and_normalize(weights: &[f64], cap: f64) -> Vec<f64> {
    let clamped: Vec<f64> = weights.iter().map(|w| w.clamp(0.0, cap)).collect();
    let total: f64 = clamped.iter().sum();
    if total <= 0.0 {
        return clamped;
    }
    clamped.iter().map(|w| w / total).collect()
}

fn max_abs(values: &[f64]) -> f64 {
    values.iter().fold(0.0_f64, |m, v| m.max(v.abs()))
}

/// Distance between `w` and the projection of a gradient step, relative to
/// the objective's magnitude. Zero exactly at KKT points.
fn stationarity_gap(weights: &[f64], gradient: &[f64], cost: f64, cap: f64) -> f64 {
    let scale = cost.abs().max(1.0);
    let stepped: Vec<f64> = weights
        .iter()
        .zip(gradient.iter())
        .map(|(w, g)| w - g / scale)
        .collect();
    let projected = project_capped_simplex(&stepped, cap);
    projected
        .iter()
        .zip(weights.iter())
        .fold(0.0_f64, |m, (p, w)| m.max((p - w).abs()))
}

/// Euclidean projection onto `{ w : sum(w) = 1, 0 <= w <= cap }`.
///
/// The projection is `clamp(v - theta, 0, cap)` for the shift `theta` making
/// the sum one. `theta` is bracketed by bisection, then solved exactly on the
/// coordinates strictly inside the box. Requires `len * cap >= 1`.
pub(crate) fn project_capped_simplex(values: &[f64], cap: f64) -> Vec<f64> {
    let clipped_sum =
        |theta: f64| -> f64 { values.iter().map(|v| (v - theta).clamp(0.0, cap)).sum() };

    let min = values.iter().cloned().fold(f64::INFINITY, f64::min);
    let max = values.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
    // clipped_sum(lo) = n * cap >= 1, clipped_sum(hi) = 0
    let mut lo = min - cap;
    let mut hi = max;

    for _ in 0..200 {
        let mid = 0.5 * (lo + hi);
        if mid <= lo || mid >= hi {
            break;
        }
        if clipped_sum(mid) > 1.0 {
            lo = mid;
        } else {
            hi = mid;
        }
    }

    let mut theta = 0.5 * (lo + hi);
    let mut free = 0usize;
    let mut free_sum = 0.0;
    let mut capped = 0usize;
    for &v in values {
        let shifted = v - theta;
        if shifted >= cap {
            capped += 1;
        } else if shifted > 0.0 {
            free += 1;
            free_sum += v;
        }
    }
    if free > 0 {
        theta = (free_sum + cap * capped as f64 - 1.0) / free as f64;
    }

    values.iter().map(|v| (v - theta).clamp(0.0, cap)).collect()
}
