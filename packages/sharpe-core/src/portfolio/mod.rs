//! Allocation pipeline.
//!
//! Data flows strictly forward: prices -> returns -> (mean, covariance) ->
//! raw optimal weights -> filtered weights -> performance report.

mod covariance;
mod filter;
mod optimizer;
mod performance;
mod pipeline;
mod returns;

pub use covariance::{estimate_covariance, is_positive_definite, regularize};
pub use filter::filter_weights;
pub use optimizer::{check_feasibility, optimize_sharpe};
pub use performance::{
    allocation_entries, annualize_return, cumulative_values, evaluate_performance, max_drawdown,
};
pub use pipeline::{optimize_portfolio, Pipeline};
pub use returns::build_returns_matrix;
