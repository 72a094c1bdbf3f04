//! End-to-end allocation runs through the public API.

use approx::assert_abs_diff_eq;
use chrono::{Months, NaiveDate};
use sharpe_core::{
    build_returns_matrix, estimate_covariance, filter_weights, optimize_portfolio,
    optimize_sharpe, AssetSeries, DropReason, Error, OptimizerConfig, Pipeline, PriceRecord,
    PriceTable, Weights,
};
use std::io::Write;

/// Prices compounding `returns` from 100, one observation per period starting 2020-01-31.
fn series(ticker: &str, returns: &[f64]) -> AssetSeries {
    let start = NaiveDate::from_ymd_opt(2020, 1, 31).unwrap();
    let mut price = 100.0;
    let mut pairs = vec![(start, price)];
    for (i, r) in returns.iter().enumerate() {
        price *= 1.0 + r;
        pairs.push((start + Months::new(i as u32 + 1), price));
    }
    AssetSeries::from_pairs(ticker, &pairs)
}

fn yearly() -> OptimizerConfig {
    OptimizerConfig::default()
        .with_periods_per_year(1)
        .with_risk_free_rate(0.0)
}

/// Five monthly assets with distinct drifts and partially overlapping cycles.
fn monthly_universe() -> PriceTable {
    let series = (0..5)
        .map(|a| {
            let returns: Vec<f64> = (0..24)
                .map(|t| {
                    let phase = (t as f64) * 0.7 * (a as f64 + 1.0) + a as f64;
                    0.002 * (a as f64 + 1.0) + 0.03 * phase.sin()
                })
                .collect();
            series(&format!("F{}", a), &returns)
        })
        .collect();
    PriceTable::from_series(series)
}

#[test]
fn test_prefers_lower_volatility_at_equal_mean() {
    let table = PriceTable::from_series(vec![
        series("STEADY", &[0.10, 0.10, 0.10]),
        series("SWING", &[0.05, 0.15, 0.05]),
    ]);
    let config = yearly().with_position_cap(1.0);

    let report = optimize_portfolio(&table, &config).unwrap();

    assert!(report.weight_of("STEADY") > report.weight_of("SWING"));
    assert_abs_diff_eq!(report.weights.sum(), 1.0, epsilon = 1e-9);
}

#[test]
fn test_cap_too_small_for_universe_is_infeasible() {
    let table = PriceTable::from_series(vec![
        series("AAA", &[0.08, 0.12, 0.05]),
        series("BBB", &[0.02, 0.15, -0.03]),
    ]);
    let config = yearly().with_position_cap(0.3);

    let result = optimize_portfolio(&table, &config);

    assert!(matches!(result, Err(Error::InfeasibleConstraints(_))));
}

#[test]
fn test_filter_zeroes_small_weight() {
    let filtered = filter_weights(&Weights::new(vec![0.008, 0.592, 0.4]), 0.01).unwrap();
    let w = filtered.as_slice();

    assert_eq!(w[0], 0.0);
    assert_abs_diff_eq!(w[1] + w[2], 1.0, epsilon = 1e-12);
    assert_abs_diff_eq!(w[1] / w[2], 0.592 / 0.4, epsilon = 1e-12);
}

#[test]
fn test_weights_respect_constraints() {
    let table = monthly_universe();
    let config = OptimizerConfig::default()
        .with_periods_per_year(12)
        .with_position_cap(0.25);

    let report = optimize_portfolio(&table, &config).unwrap();

    let raw = &report.optimization.weights;
    assert_abs_diff_eq!(raw.sum(), 1.0, epsilon = 1e-9);
    assert!(raw.iter().all(|&w| (0.0..=0.25 + 1e-9).contains(&w)));

    let final_weights = &report.weights;
    assert_abs_diff_eq!(final_weights.sum(), 1.0, epsilon = 1e-9);
    assert!(final_weights
        .iter()
        .all(|&w| w == 0.0 || w >= config.significance_threshold));
}

#[test]
fn test_optimum_beats_uniform_weights() {
    let table = monthly_universe();
    let config = OptimizerConfig::default().with_periods_per_year(12);
    let pipeline = Pipeline::prepare(&table, &config).unwrap();
    let estimate = pipeline.estimate();

    let uniform = Weights::uniform(estimate.n_assets());
    let rf = config.periodic_risk_free_rate();
    let uniform_sharpe = (estimate.portfolio_return(uniform.as_slice()) - rf)
        / estimate.portfolio_volatility(uniform.as_slice());

    for cap in [0.2, 0.4, 0.7, 1.0] {
        let result = optimize_sharpe(estimate, &config.clone().with_position_cap(cap)).unwrap();
        assert!(
            result.sharpe_ratio >= uniform_sharpe - 1e-9,
            "cap {}: {} < {}",
            cap,
            result.sharpe_ratio,
            uniform_sharpe
        );
    }
}

#[test]
fn test_collinear_assets_stay_positive_definite() {
    let base = [0.03, -0.01, 0.02, 0.04, -0.02];
    let doubled: Vec<f64> = base.iter().map(|r| r * 2.0).collect();
    let table = PriceTable::from_series(vec![series("ONE", &base), series("TWO", &doubled)]);
    let config = yearly();

    let returns = build_returns_matrix(&table, &config).unwrap();
    let estimate = estimate_covariance(&returns, config.solver.regularization).unwrap();

    let eigenvalues = estimate.covariance.clone().symmetric_eigenvalues();
    assert!(eigenvalues.iter().all(|&e| e > 0.0));
    assert!(estimate.regularization > 0.0);
}

#[test]
fn test_records_with_gaps_drop_the_asset() {
    let day = |m: u32| NaiveDate::from_ymd_opt(2023, m, 28).unwrap();
    let mut records = Vec::new();
    for (m, (a, b)) in [(100.0, 50.0), (104.0, 51.0), (101.0, 53.0), (108.0, 52.5)]
        .iter()
        .enumerate()
    {
        let date = day(m as u32 + 1);
        records.push(PriceRecord {
            date,
            ticker: "aaa".to_string(),
            price: *a,
        });
        records.push(PriceRecord {
            date,
            ticker: "BBB".to_string(),
            price: *b,
        });
        if m != 2 {
            records.push(PriceRecord {
                date,
                ticker: "GAP".to_string(),
                price: 10.0,
            });
        }
    }
    let table = PriceTable::from_records(&records);

    let report = optimize_portfolio(&table, &yearly().with_position_cap(1.0)).unwrap();

    assert_eq!(report.tickers.tickers(), &["AAA", "BBB"]);
    assert_eq!(report.weight_of("bbb"), report.weights.as_slice()[1]);
    assert_eq!(report.dropped.len(), 1);
    assert_eq!(report.dropped[0].ticker, "GAP");
    assert_eq!(report.dropped[0].reason, DropReason::MissingPrices { missing: 1 });

    let json = serde_json::to_value(&report).unwrap();
    assert_eq!(json["dropped"][0]["reason"], "missing_prices");
    assert_eq!(json["weights"].as_array().unwrap().len(), 2);
    assert_eq!(json["tickers"], serde_json::json!(["AAA", "BBB"]));
}

#[test]
fn test_config_file_drives_the_run() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(
        file,
        r#"
risk_free_rate = 0.0
position_cap = 0.5
periods_per_year = 12
significance_threshold = 0.05
"#
    )
    .unwrap();
    let config = OptimizerConfig::load(file.path()).unwrap();

    let report = optimize_portfolio(&monthly_universe(), &config).unwrap();

    assert_eq!(report.config.position_cap, 0.5);
    assert_eq!(report.performance.periods_per_year, 12);
    assert_eq!(report.performance.periods, 24);
    assert!(report.weights.iter().all(|&w| w == 0.0 || w >= 0.05));
    assert_eq!(report.allocations.len(), report.weights.active_count());
}
