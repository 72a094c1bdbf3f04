//! Price table to periodic returns.

use crate::config::{Lookback, OptimizerConfig};
use crate::types::{
    AssetIndex, AssetMeta, AssetSeries, DropReason, DroppedAsset, PriceTable, ReturnsMatrix,
};
use crate::{Error, Result};
use chrono::NaiveDate;
use nalgebra::DMatrix;
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, warn};

/// Build the returns matrix for the configured analysis window.
///
/// The window is the union of all observed dates, cut down by
/// `config.lookback`. An asset is kept only if it has a valid (positive,
/// finite) price on every window date; nothing is interpolated. Entry
/// `(a, t)` of the result is `price(a, t + 1) / price(a, t) - 1`.
///
/// # Errors
///
/// `InsufficientData` if the window has fewer than two dates or no asset
/// survives cleaning and screening.
pub fn build_returns_matrix(
    prices: &PriceTable,
    config: &OptimizerConfig,
) -> Result<ReturnsMatrix> {
    if prices.is_empty() {
        return Err(Error::InsufficientData(
            "price table contains no assets".to_string(),
        ));
    }

    let window = analysis_window(prices, config.lookback);
    if window.len() < 2 {
        return Err(Error::InsufficientData(format!(
            "analysis window has {} date(s), need at least 2",
            window.len()
        )));
    }

    let mut tickers = Vec::new();
    let mut meta = Vec::new();
    let mut rows: Vec<Vec<f64>> = Vec::new();
    let mut dropped = Vec::new();

    for series in &prices.series {
        let ticker = series.ticker.trim().to_uppercase();
        if tickers.contains(&ticker) {
            warn!(ticker = %ticker, "Duplicate series ignored");
            continue;
        }

        let window_prices = match prices_on_window(series, &window) {
            Ok(p) => p,
            Err(reason) => {
                warn!(ticker = %ticker, ?reason, "Dropping asset");
                dropped.push(DroppedAsset { ticker, reason });
                continue;
            }
        };

        let returns: Vec<f64> = window_prices
            .windows(2)
            .map(|pair| pair[1] / pair[0] - 1.0)
            .collect();

        if let Some(min) = config.min_mean_return {
            let mean_return = returns.iter().sum::<f64>() / returns.len() as f64;
            if mean_return <= min {
                debug!(ticker = %ticker, mean_return, min, "Asset screened out");
                dropped.push(DroppedAsset {
                    ticker,
                    reason: DropReason::BelowMinimumReturn { mean_return },
                });
                continue;
            }
        }

        tickers.push(ticker);
        meta.push(AssetMeta {
            name: series.name.clone(),
            category: series.category.clone(),
        });
        rows.push(returns);
    }

    if rows.is_empty() {
        return Err(Error::InsufficientData(format!(
            "no asset has a complete price history over {} .. {} ({} dropped)",
            window[0],
            window[window.len() - 1],
            dropped.len()
        )));
    }

    let periods = window.len() - 1;
    let values = DMatrix::from_fn(rows.len(), periods, |a, t| rows[a][t]);

    debug!(
        assets = rows.len(),
        periods,
        dropped = dropped.len(),
        "Returns matrix built"
    );

    Ok(ReturnsMatrix {
        index: AssetIndex::new(tickers),
        dates: window,
        values,
        meta,
        dropped,
    })
}

/// Sorted dates of the analysis window.
fn analysis_window(prices: &PriceTable, lookback: Lookback) -> Vec<NaiveDate> {
    let all: BTreeSet<NaiveDate> = prices
        .series
        .iter()
        .flat_map(|s| s.prices.iter().map(|p| p.date))
        .collect();

    match lookback {
        Lookback::All => all.into_iter().collect(),
        Lookback::Periods(n) => {
            let dates: Vec<NaiveDate> = all.into_iter().collect();
            let keep = (n + 1).min(dates.len());
            dates[dates.len() - keep..].to_vec()
        }
        Lookback::Dates { start, end } => all.range(start..=end).copied().collect(),
    }
}

/// Prices of `series` on every window date, or why the series is unusable.
fn prices_on_window(
    series: &AssetSeries,
    window: &[NaiveDate],
) -> std::result::Result<Vec<f64>, DropReason> {
    let by_date: BTreeMap<NaiveDate, f64> =
        series.prices.iter().map(|p| (p.date, p.price)).collect();

    let missing = window.iter().filter(|d| !by_date.contains_key(d)).count();
    if missing > 0 {
        return Err(DropReason::MissingPrices { missing });
    }

    window
        .iter()
        .map(|date| {
            let price = by_date[date];
            if price.is_finite() && price > 0.0 {
                Ok(price)
            } else {
                Err(DropReason::InvalidPrice { date: *date })
            }
        })
        .collect()
}
