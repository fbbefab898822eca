//! Return-series alignment and mean/covariance estimation.
//!
//! References:
//! - J.P. Morgan/Reuters, *RiskMetrics Technical Document* (1996), EWMA
//!   covariance with decay 0.94.
//!
//! Raw provider data is per-symbol and dated. The estimator intersects dates
//! across all requested symbols and drops any date with a gap in any symbol
//! (no forward-fill), then computes a mean vector and covariance matrix. The
//! covariance estimator is pluggable: exponentially weighted statistics
//! emphasize the recent volatility regime, while the plain sample estimator is
//! available for callers that want unweighted history.

use std::collections::BTreeSet;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::core::{ReturnSeries, RiskError};

/// Minimum aligned observations required for estimation.
pub const MIN_ALIGNED_OBSERVATIONS: usize = 20;

/// RiskMetrics decay constant for daily data.
pub const DEFAULT_EWMA_LAMBDA: f64 = 0.94;

/// Covariance estimator choice.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CovarianceEstimator {
    /// Exponentially weighted, recursion seeded from the sample covariance.
    Ewma { lambda: f64 },
    /// Unbiased sample covariance (n-1).
    Sample,
}

impl Default for CovarianceEstimator {
    fn default() -> Self {
        Self::Ewma {
            lambda: DEFAULT_EWMA_LAMBDA,
        }
    }
}

/// Date-aligned return matrix: `rows[t][i]` is the return of `symbols[i]` on
/// `dates[t]`.
#[derive(Debug, Clone, PartialEq)]
pub struct AlignedReturns {
    pub symbols: Vec<String>,
    pub dates: Vec<NaiveDate>,
    pub rows: Vec<Vec<f64>>,
}

impl AlignedReturns {
    pub fn observations(&self) -> usize {
        self.rows.len()
    }

    /// Weighted portfolio return series `w . r_t` over the aligned dates.
    pub fn portfolio_returns(&self, weights: &[f64]) -> Vec<f64> {
        self.rows
            .iter()
            .map(|row| row.iter().zip(weights.iter()).map(|(r, w)| r * w).sum())
            .collect()
    }
}

/// Estimated return model: mean vector, covariance matrix, and the aligned
/// matrix they were derived from.
#[derive(Debug, Clone, PartialEq)]
pub struct ReturnModel {
    pub aligned: AlignedReturns,
    pub mean: Vec<f64>,
    pub covariance: Vec<Vec<f64>>,
}

/// Builds aligned return matrices and mean/covariance models from raw
/// provider series.
#[derive(Debug, Clone)]
pub struct ReturnsEstimator {
    estimator: CovarianceEstimator,
    min_observations: usize,
}

impl Default for ReturnsEstimator {
    fn default() -> Self {
        Self {
            estimator: CovarianceEstimator::default(),
            min_observations: MIN_ALIGNED_OBSERVATIONS,
        }
    }
}

impl ReturnsEstimator {
    pub fn new(estimator: CovarianceEstimator) -> Self {
        Self {
            estimator,
            min_observations: MIN_ALIGNED_OBSERVATIONS,
        }
    }

    /// Aligns `series` over `symbols` and estimates the return model.
    ///
    /// Fails with [`RiskError::InsufficientData`] when a symbol is missing
    /// from the series or fewer than 20 dates survive the intersection.
    pub fn estimate(
        &self,
        series: &ReturnSeries,
        symbols: &[String],
    ) -> Result<ReturnModel, RiskError> {
        let aligned = align(series, symbols)?;
        if aligned.observations() < self.min_observations {
            return Err(RiskError::InsufficientData(format!(
                "{} aligned observations, need at least {}",
                aligned.observations(),
                self.min_observations
            )));
        }

        let mean = column_means(&aligned.rows, symbols.len());
        let covariance = match self.estimator {
            CovarianceEstimator::Sample => sample_covariance(&aligned.rows, &mean),
            CovarianceEstimator::Ewma { lambda } => {
                if !lambda.is_finite() || !(0.0..1.0).contains(&lambda) {
                    return Err(RiskError::Validation(format!(
                        "EWMA lambda must be in [0, 1), got {lambda}"
                    )));
                }
                ewma_covariance(&aligned.rows, &mean, lambda)
            }
        };

        Ok(ReturnModel {
            aligned,
            mean,
            covariance,
        })
    }
}

fn align(series: &ReturnSeries, symbols: &[String]) -> Result<AlignedReturns, RiskError> {
    if symbols.is_empty() {
        return Err(RiskError::Validation("no symbols to align".to_string()));
    }

    // Intersect observation dates across every symbol; a gap anywhere drops
    // the date for all symbols.
    let mut common: Option<BTreeSet<NaiveDate>> = None;
    for symbol in symbols {
        let observations = series.series.get(symbol).ok_or_else(|| {
            RiskError::InsufficientData(format!("no return series for symbol {symbol}"))
        })?;
        let dates: BTreeSet<NaiveDate> = observations.iter().map(|(d, _)| *d).collect();
        common = Some(match common {
            None => dates,
            Some(acc) => acc.intersection(&dates).copied().collect(),
        });
    }
    let common = common.unwrap_or_default();

    let dates: Vec<NaiveDate> = common.into_iter().collect();
    let mut rows = vec![vec![0.0_f64; symbols.len()]; dates.len()];

    for (col, symbol) in symbols.iter().enumerate() {
        let observations = &series.series[symbol];
        let mut by_date = std::collections::BTreeMap::new();
        for (d, r) in observations {
            by_date.insert(*d, *r);
        }
        for (row, date) in dates.iter().enumerate() {
            rows[row][col] = by_date[date];
        }
    }

    Ok(AlignedReturns {
        symbols: symbols.to_vec(),
        dates,
        rows,
    })
}

fn column_means(rows: &[Vec<f64>], n_assets: usize) -> Vec<f64> {
    let mut mean = vec![0.0; n_assets];
    for row in rows {
        for (m, r) in mean.iter_mut().zip(row.iter()) {
            *m += r;
        }
    }
    let n = rows.len().max(1) as f64;
    for m in &mut mean {
        *m /= n;
    }
    mean
}

fn sample_covariance(rows: &[Vec<f64>], mean: &[f64]) -> Vec<Vec<f64>> {
    let n_assets = mean.len();
    let mut cov = vec![vec![0.0_f64; n_assets]; n_assets];
    let denom = (rows.len().saturating_sub(1)).max(1) as f64;

    for row in rows {
        for i in 0..n_assets {
            let di = row[i] - mean[i];
            for j in i..n_assets {
                cov[i][j] += di * (row[j] - mean[j]);
            }
        }
    }
    for i in 0..n_assets {
        for j in i..n_assets {
            cov[i][j] /= denom;
            cov[j][i] = cov[i][j];
        }
    }
    cov
}

/// EWMA covariance recursion `S_t = lambda * S_{t-1} + (1 - lambda) d_t d_t^T`
/// with `d_t = r_t - mean`, seeded from the sample covariance.
fn ewma_covariance(rows: &[Vec<f64>], mean: &[f64], lambda: f64) -> Vec<Vec<f64>> {
    let n_assets = mean.len();
    let mut cov = sample_covariance(rows, mean);

    for row in rows {
        for i in 0..n_assets {
            let di = row[i] - mean[i];
            for j in i..n_assets {
                let dj = row[j] - mean[j];
                cov[i][j] = lambda * cov[i][j] + (1.0 - lambda) * di * dj;
            }
        }
        for i in 0..n_assets {
            for j in (i + 1)..n_assets {
                cov[j][i] = cov[i][j];
            }
        }
    }
    cov
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;
    use chrono::NaiveDate;

    use super::*;

    fn date(day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 6, day).expect("valid date")
    }

    fn series_with_gap() -> ReturnSeries {
        let mut series = ReturnSeries::default();
        series.insert(
            "AAPL",
            (1..=25).map(|d| (date(d), 0.01)).collect::<Vec<_>>(),
        );
        // GOOGL is missing day 3; that date must drop for both symbols.
        series.insert(
            "GOOGL",
            (1..=25)
                .filter(|d| *d != 3)
                .map(|d| (date(d), -0.005))
                .collect::<Vec<_>>(),
        );
        series
    }

    #[test]
    fn alignment_drops_dates_with_gaps() {
        let symbols = vec!["AAPL".to_string(), "GOOGL".to_string()];
        let model = ReturnsEstimator::default()
            .estimate(&series_with_gap(), &symbols)
            .unwrap();

        assert_eq!(model.aligned.observations(), 24);
        assert!(!model.aligned.dates.contains(&date(3)));
    }

    #[test]
    fn fewer_than_twenty_observations_is_insufficient() {
        let mut series = ReturnSeries::default();
        series.insert("AAPL", (1..=19).map(|d| (date(d), 0.01)).collect::<Vec<_>>());
        let symbols = vec!["AAPL".to_string()];

        let err = ReturnsEstimator::default()
            .estimate(&series, &symbols)
            .unwrap_err();
        assert!(matches!(err, RiskError::InsufficientData(_)));
    }

    #[test]
    fn missing_symbol_is_insufficient_data() {
        let symbols = vec!["AAPL".to_string(), "TSLA".to_string()];
        let err = ReturnsEstimator::default()
            .estimate(&series_with_gap(), &symbols)
            .unwrap_err();
        assert!(matches!(err, RiskError::InsufficientData(_)));
    }

    #[test]
    fn sample_covariance_matches_hand_computation() {
        let mut series = ReturnSeries::default();
        let xs = [0.01, -0.02, 0.015, 0.005, -0.01];
        let mut obs = Vec::new();
        for (i, x) in xs.iter().enumerate() {
            obs.push((date(i as u32 + 1), *x));
        }
        // Pad to reach the minimum observation count.
        for d in 6..=21 {
            obs.push((date(d), 0.0));
        }
        series.insert("AAPL", obs);
        let symbols = vec!["AAPL".to_string()];

        let model = ReturnsEstimator::new(CovarianceEstimator::Sample)
            .estimate(&series, &symbols)
            .unwrap();

        let values: Vec<f64> = model.aligned.rows.iter().map(|r| r[0]).collect();
        let m = values.iter().sum::<f64>() / values.len() as f64;
        let expected =
            values.iter().map(|x| (x - m) * (x - m)).sum::<f64>() / (values.len() as f64 - 1.0);
        assert_relative_eq!(model.covariance[0][0], expected, epsilon = 1e-15);
    }

    #[test]
    fn ewma_covariance_weights_recent_observations_more() {
        // Quiet start, volatile tail: EWMA variance should exceed the sample
        // variance because recent squared deviations dominate the recursion.
        let mut obs = Vec::new();
        for d in 1..=15 {
            obs.push((date(d), 0.001 * if d % 2 == 0 { 1.0 } else { -1.0 }));
        }
        for d in 16..=25 {
            obs.push((date(d), 0.03 * if d % 2 == 0 { 1.0 } else { -1.0 }));
        }
        let mut series = ReturnSeries::default();
        series.insert("AAPL", obs);
        let symbols = vec!["AAPL".to_string()];

        let ewma = ReturnsEstimator::default()
            .estimate(&series, &symbols)
            .unwrap();
        let sample = ReturnsEstimator::new(CovarianceEstimator::Sample)
            .estimate(&series, &symbols)
            .unwrap();

        assert!(ewma.covariance[0][0] > sample.covariance[0][0]);
    }

    #[test]
    fn covariance_matrix_is_symmetric() {
        let symbols = vec!["AAPL".to_string(), "GOOGL".to_string()];
        let model = ReturnsEstimator::default()
            .estimate(&series_with_gap(), &symbols)
            .unwrap();
        assert_relative_eq!(
            model.covariance[0][1],
            model.covariance[1][0],
            epsilon = 1e-15
        );
    }

    #[test]
    fn portfolio_returns_apply_weights() {
        let aligned = AlignedReturns {
            symbols: vec!["A".to_string(), "B".to_string()],
            dates: vec![date(1), date(2)],
            rows: vec![vec![0.02, -0.01], vec![-0.02, 0.03]],
        };
        let series = aligned.portfolio_returns(&[0.5, 0.5]);
        assert_relative_eq!(series[0], 0.005, epsilon = 1e-15);
        assert_relative_eq!(series[1], 0.005, epsilon = 1e-15);
    }
}
