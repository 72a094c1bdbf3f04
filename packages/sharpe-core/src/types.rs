//! Core data types for the Sharpe allocation pipeline.

use crate::config::OptimizerConfig;
use chrono::NaiveDate;
use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// One row of a long-format price table: the close of `ticker` on `date`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PriceRecord {
    pub date: NaiveDate,
    pub ticker: String,
    pub price: f64,
}

/// A dated price observation.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct PricePoint {
    pub date: NaiveDate,
    pub price: f64,
}

/// Price history of a single asset.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AssetSeries {
    /// Asset identifier (ticker or ISIN, uppercase)
    pub ticker: String,
    /// Display name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Asset category (e.g. fund category)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    /// Observations ordered by date
    pub prices: Vec<PricePoint>,
}

impl AssetSeries {
    /// Create a series, sorting observations by date. Later duplicates of a date win.
    pub fn new(ticker: &str, prices: Vec<PricePoint>) -> Self {
        let mut series = Self {
            ticker: ticker.trim().to_uppercase(),
            name: None,
            category: None,
            prices,
        };
        series.normalize();
        series
    }

    /// Create a series from `(date, price)` pairs.
    pub fn from_pairs(ticker: &str, pairs: &[(NaiveDate, f64)]) -> Self {
        let prices = pairs
            .iter()
            .map(|&(date, price)| PricePoint { date, price })
            .collect();
        Self::new(ticker, prices)
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }

    /// Price on `date`, if observed.
    pub fn price_on(&self, date: NaiveDate) -> Option<f64> {
        self.prices
            .binary_search_by(|p| p.date.cmp(&date))
            .ok()
            .map(|i| self.prices[i].price)
    }

    fn normalize(&mut self) {
        // Stable sort keeps insertion order among equal dates, so the last one is kept.
        self.prices.sort_by(|a, b| a.date.cmp(&b.date));
        let mut deduped: Vec<PricePoint> = Vec::with_capacity(self.prices.len());
        for point in self.prices.drain(..) {
            match deduped.last_mut() {
                Some(last) if last.date == point.date => *last = point,
                _ => deduped.push(point),
            }
        }
        self.prices = deduped;
    }
}

/// In-memory price table handed over by the ingestion layer.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(transparent)]
pub struct PriceTable {
    pub series: Vec<AssetSeries>,
}

impl PriceTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a table from per-asset series. Series sharing a ticker are merged.
    pub fn from_series(series: Vec<AssetSeries>) -> Self {
        let mut table = Self::new();
        for s in series {
            table.push(s);
        }
        table
    }

    /// Pivot long-format records into per-asset series, in order of first appearance.
    pub fn from_records(records: &[PriceRecord]) -> Self {
        let mut order: Vec<String> = Vec::new();
        let mut grouped: HashMap<String, Vec<PricePoint>> = HashMap::new();

        for record in records {
            let ticker = record.ticker.trim().to_uppercase();
            let points = grouped.entry(ticker.clone()).or_insert_with(|| {
                order.push(ticker.clone());
                Vec::new()
            });
            points.push(PricePoint {
                date: record.date,
                price: record.price,
            });
        }

        let series = order
            .into_iter()
            .filter_map(|ticker| {
                grouped
                    .remove(&ticker)
                    .map(|points| AssetSeries::new(&ticker, points))
            })
            .collect();

        Self { series }
    }

    /// Add a series, merging it into an existing one with the same ticker.
    pub fn push(&mut self, series: AssetSeries) {
        let series = AssetSeries {
            ticker: series.ticker.trim().to_uppercase(),
            ..series
        };
        match self.series.iter_mut().find(|s| s.ticker == series.ticker) {
            Some(existing) => {
                let mut prices = std::mem::take(&mut existing.prices);
                prices.extend(series.prices);
                existing.name = existing.name.take().or(series.name);
                existing.category = existing.category.take().or(series.category);
                existing.prices = prices;
                existing.normalize();
            }
            None => {
                let mut series = series;
                series.normalize();
                self.series.push(series);
            }
        }
    }

    pub fn len(&self) -> usize {
        self.series.len()
    }

    pub fn is_empty(&self) -> bool {
        self.series.is_empty()
    }

    pub fn tickers(&self) -> Vec<&str> {
        self.series.iter().map(|s| s.ticker.as_str()).collect()
    }
}

/// Ticker to row mapping shared by every matrix and vector of one run.
///
/// Serializes as the plain list of tickers in row order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(from = "Vec<String>", into = "Vec<String>")]
pub struct AssetIndex {
    tickers: Vec<String>,
    positions: HashMap<String, usize>,
}

impl AssetIndex {
    pub fn new(tickers: Vec<String>) -> Self {
        let positions = tickers
            .iter()
            .enumerate()
            .map(|(i, t)| (t.clone(), i))
            .collect();
        Self { tickers, positions }
    }

    /// Row of `ticker`, if it survived cleaning.
    pub fn position(&self, ticker: &str) -> Option<usize> {
        self.positions.get(&ticker.trim().to_uppercase()).copied()
    }

    pub fn ticker(&self, position: usize) -> Option<&str> {
        self.tickers.get(position).map(String::as_str)
    }

    pub fn tickers(&self) -> &[String] {
        &self.tickers
    }

    pub fn len(&self) -> usize {
        self.tickers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tickers.is_empty()
    }
}

impl From<Vec<String>> for AssetIndex {
    fn from(tickers: Vec<String>) -> Self {
        Self::new(tickers)
    }
}

impl From<AssetIndex> for Vec<String> {
    fn from(index: AssetIndex) -> Self {
        index.tickers
    }
}

/// Why an asset was excluded before estimation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum DropReason {
    /// No price on some dates of the analysis window
    MissingPrices { missing: usize },
    /// Zero, negative or non-finite price inside the window
    InvalidPrice { date: NaiveDate },
    /// Mean periodic return at or below the screening threshold
    BelowMinimumReturn { mean_return: f64 },
}

/// An asset excluded from the run, with the reason.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DroppedAsset {
    pub ticker: String,
    #[serde(flatten)]
    pub reason: DropReason,
}

/// Descriptive fields carried alongside an asset row.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AssetMeta {
    pub name: Option<String>,
    pub category: Option<String>,
}

/// Periodic returns, assets x periods, with no missing entries.
#[derive(Debug, Clone)]
pub struct ReturnsMatrix {
    /// Ticker to row mapping
    pub index: AssetIndex,
    /// Window dates; period `t` runs from `dates[t]` to `dates[t + 1]`
    pub dates: Vec<NaiveDate>,
    /// Fractional returns, one row per asset
    pub values: DMatrix<f64>,
    /// Per-row descriptive metadata
    pub meta: Vec<AssetMeta>,
    /// Assets excluded during cleaning
    pub dropped: Vec<DroppedAsset>,
}

impl ReturnsMatrix {
    pub fn n_assets(&self) -> usize {
        self.values.nrows()
    }

    pub fn n_periods(&self) -> usize {
        self.values.ncols()
    }

    /// Per-period returns of a weighted portfolio.
    pub fn portfolio_returns(&self, weights: &Weights) -> Vec<f64> {
        let w = weights.to_vector();
        (self.values.transpose() * w).iter().copied().collect()
    }
}

/// Mean returns and regularized covariance of one run.
#[derive(Debug, Clone)]
pub struct CovarianceEstimate {
    /// Per-asset arithmetic mean of periodic returns
    pub mean_returns: DVector<f64>,
    /// Unbiased sample covariance
    pub sample_covariance: DMatrix<f64>,
    /// Sample covariance plus `regularization * I`; positive-definite
    pub covariance: DMatrix<f64>,
    /// Ridge added to the diagonal
    pub regularization: f64,
}

impl CovarianceEstimate {
    pub fn n_assets(&self) -> usize {
        self.mean_returns.len()
    }

    /// Expected periodic return of a portfolio.
    pub fn portfolio_return(&self, weights: &[f64]) -> f64 {
        weights
            .iter()
            .zip(self.mean_returns.iter())
            .map(|(w, m)| w * m)
            .sum()
    }

    /// Periodic volatility of a portfolio under the regularized covariance.
    pub fn portfolio_volatility(&self, weights: &[f64]) -> f64 {
        let w = DVector::from_column_slice(weights);
        (&self.covariance * &w).dot(&w).max(0.0).sqrt()
    }
}

/// Portfolio weights, aligned with the run's [`AssetIndex`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(transparent)]
pub struct Weights(Vec<f64>);

impl Weights {
    pub fn new(values: Vec<f64>) -> Self {
        Self(values)
    }

    /// Equal weights over `n` assets.
    pub fn uniform(n: usize) -> Self {
        if n == 0 {
            return Self::default();
        }
        Self(vec![1.0 / n as f64; n])
    }

    pub fn as_slice(&self) -> &[f64] {
        &self.0
    }

    pub fn into_inner(self) -> Vec<f64> {
        self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn sum(&self) -> f64 {
        self.0.iter().sum()
    }

    pub fn get(&self, position: usize) -> Option<f64> {
        self.0.get(position).copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = &f64> {
        self.0.iter()
    }

    /// Number of strictly positive weights.
    pub fn active_count(&self) -> usize {
        self.0.iter().filter(|&&w| w > 0.0).count()
    }

    pub fn to_vector(&self) -> DVector<f64> {
        DVector::from_column_slice(&self.0)
    }
}

/// Starting point the optimizer converged from.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StartPoint {
    /// Equal weight on every asset
    Uniform,
    /// Equal weight on the `ceil(1 / cap)` highest mean-return assets
    TopMeanReturn,
}

/// Raw optimizer output, in periodic units.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OptimizationResult {
    /// Weights clamped into `[0, cap]` and summing to 1
    pub weights: Weights,
    /// Expected periodic return
    pub expected_return: f64,
    /// Periodic volatility
    pub volatility: f64,
    /// Periodic Sharpe ratio against the per-period risk-free rate
    pub sharpe_ratio: f64,
    /// Solver iterations used by the successful attempt
    pub iterations: u64,
    /// Which starting point produced the result
    pub start: StartPoint,
}

/// One point of the normalized portfolio value path.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct ValuePoint {
    pub date: NaiveDate,
    pub value: f64,
}

/// Annualized performance of a final allocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PerformanceReport {
    /// Geometric annualized return
    pub annualized_return: f64,
    /// Annualized volatility from the regularized covariance
    pub annualized_volatility: f64,
    /// (annualized return - risk-free rate) / annualized volatility
    pub sharpe_ratio: f64,
    /// Total compounded return over the window
    pub compound_return: f64,
    /// Largest peak-to-trough decline of the value path (e.g. 0.15 for 15%)
    pub max_drawdown: f64,
    /// Number of return periods
    pub periods: usize,
    /// Periods per year used for annualization
    pub periods_per_year: u32,
    /// Portfolio value normalized to 1.0 at the window start
    pub value_series: Vec<ValuePoint>,
}

/// Per-asset row of the allocation summary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AllocationEntry {
    pub ticker: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    /// Final (filtered) weight
    pub weight: f64,
    /// Annualized arithmetic mean return of the asset alone
    pub annualized_return: f64,
    /// Annualized sample volatility of the asset alone
    pub annualized_volatility: f64,
    /// Standalone Sharpe ratio
    pub sharpe_ratio: f64,
}

/// Everything one optimization run produces.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AllocationReport {
    /// Effective configuration of the run
    pub config: OptimizerConfig,
    /// Assets excluded during cleaning
    pub dropped: Vec<DroppedAsset>,
    /// Ticker to row mapping of `weights`
    pub tickers: AssetIndex,
    /// Raw optimizer output
    pub optimization: OptimizationResult,
    /// Weights after the significance filter
    pub weights: Weights,
    /// Annualized metrics of the filtered weights
    pub performance: PerformanceReport,
    /// Non-zero positions, largest first
    pub allocations: Vec<AllocationEntry>,
}

impl AllocationReport {
    /// Weight held in `ticker`, zero if absent.
    pub fn weight_of(&self, ticker: &str) -> f64 {
        self.tickers
            .position(ticker)
            .and_then(|i| self.weights.get(i))
            .unwrap_or(0.0)
    }
}

/// API response wrapper used by the command line front end.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl<T> ApiResponse<T> {
    /// Create a successful response.
    pub fn ok(data: T) -> Self {
        Self {
            ok: true,
            data: Some(data),
            error: None,
        }
    }

    /// Create an error response.
    pub fn err(error: impl Into<String>) -> Self {
        Self {
            ok: false,
            data: None,
            error: Some(error.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, d).unwrap()
    }

    #[test]
    fn test_asset_series_sorts_and_dedups() {
        let series = AssetSeries::from_pairs(
            "aapl",
            &[(day(3), 12.0), (day(1), 10.0), (day(2), 11.0), (day(3), 13.0)],
        );

        assert_eq!(series.ticker, "AAPL");
        assert_eq!(series.prices.len(), 3);
        assert_eq!(series.prices[0].date, day(1));
        // Later duplicate wins
        assert_eq!(series.price_on(day(3)), Some(13.0));
        assert_eq!(series.price_on(day(4)), None);
    }

    #[test]
    fn test_price_table_from_records() {
        let records = vec![
            PriceRecord { date: day(1), ticker: "msft".into(), price: 100.0 },
            PriceRecord { date: day(1), ticker: "AAPL".into(), price: 50.0 },
            PriceRecord { date: day(2), ticker: "MSFT".into(), price: 101.0 },
            PriceRecord { date: day(2), ticker: "AAPL".into(), price: 51.0 },
        ];

        let table = PriceTable::from_records(&records);

        assert_eq!(table.tickers(), vec!["MSFT", "AAPL"]);
        assert_eq!(table.series[0].prices.len(), 2);
        assert_eq!(table.series[1].price_on(day(2)), Some(51.0));
    }

    #[test]
    fn test_price_table_push_merges_tickers() {
        let mut table = PriceTable::new();
        table.push(AssetSeries::from_pairs("SPY", &[(day(1), 1.0)]).with_name("S&P 500"));
        table.push(AssetSeries::from_pairs("spy", &[(day(2), 2.0)]).with_category("Equity"));

        assert_eq!(table.len(), 1);
        assert_eq!(table.series[0].prices.len(), 2);
        assert_eq!(table.series[0].name.as_deref(), Some("S&P 500"));
        assert_eq!(table.series[0].category.as_deref(), Some("Equity"));
    }

    #[test]
    fn test_price_table_json_shape() {
        let json = r#"[{"ticker": "FR0010", "prices": [{"date": "2024-01-01", "price": 1.5}]}]"#;
        let table: PriceTable = serde_json::from_str(json).unwrap();
        assert_eq!(table.len(), 1);
        assert_eq!(table.series[0].prices[0].price, 1.5);
    }

    #[test]
    fn test_asset_index_lookup() {
        let index = AssetIndex::new(vec!["AAPL".into(), "MSFT".into()]);
        assert_eq!(index.position("msft"), Some(1));
        assert_eq!(index.position("GOOG"), None);
        assert_eq!(index.ticker(0), Some("AAPL"));
        assert_eq!(index.len(), 2);
    }

    #[test]
    fn test_asset_index_json_is_ticker_list() {
        let index = AssetIndex::new(vec!["AAPL".into(), "MSFT".into()]);

        let json = serde_json::to_string(&index).unwrap();
        assert_eq!(json, r#"["AAPL","MSFT"]"#);

        // Positions are rebuilt on the way back in
        let restored: AssetIndex = serde_json::from_str(&json).unwrap();
        assert_eq!(restored, index);
        assert_eq!(restored.position("aapl"), Some(0));
    }

    #[test]
    fn test_weights_uniform() {
        let w = Weights::uniform(4);
        assert_eq!(w.len(), 4);
        assert!((w.sum() - 1.0).abs() < 1e-12);
        assert_eq!(w.active_count(), 4);
        assert!(Weights::uniform(0).is_empty());
    }

    #[test]
    fn test_dropped_asset_serializes_flat() {
        let dropped = DroppedAsset {
            ticker: "XYZ".into(),
            reason: DropReason::MissingPrices { missing: 2 },
        };
        let value = serde_json::to_value(&dropped).unwrap();
        assert_eq!(value["ticker"], "XYZ");
        assert_eq!(value["reason"], "missing_prices");
        assert_eq!(value["missing"], 2);
    }

    #[test]
    fn test_api_response() {
        let response: ApiResponse<String> = ApiResponse::ok("test".to_string());
        assert!(response.ok);
        assert_eq!(response.data, Some("test".to_string()));

        let err_response: ApiResponse<String> = ApiResponse::err("error");
        assert!(!err_response.ok);
        assert_eq!(err_response.error, Some("error".to_string()));
    }
}
