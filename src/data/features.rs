//! Feature engineering for regime detection
//!
//! Turns raw bars into stationary features (log returns and realized
//! volatility) and standardizes them into the matrix the HMM is trained on.

use super::types::Bar;
use crate::config::{RegimeConfig, LOG_RETURN, VOLATILITY, VOLATILITY_ANNUALIZED};
use crate::error::{RegimeError, Result};
use chrono::NaiveDate;
use ndarray::{Array1, Array2, Axis};
use serde::Serialize;

/// Engineered features for one session
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FeatureRow {
    pub date: NaiveDate,
    /// ln(close_t / close_t-1)
    pub log_return: f64,
    /// Rolling sample standard deviation of `log_return`
    pub volatility: f64,
    pub volatility_annualized: f64,
}

impl FeatureRow {
    /// Look up a feature column by name
    pub fn value(&self, name: &str) -> Option<f64> {
        match name {
            LOG_RETURN => Some(self.log_return),
            VOLATILITY => Some(self.volatility),
            VOLATILITY_ANNUALIZED => Some(self.volatility_annualized),
            _ => None,
        }
    }
}

/// Standardized feature matrix with named columns
#[derive(Debug, Clone)]
pub struct FeatureMatrix {
    /// Feature matrix (rows = observations, cols = features)
    pub data: Array2<f64>,
    /// Feature names
    pub names: Vec<String>,
    /// Per-column mean used for scaling
    pub means: Array1<f64>,
    /// Per-column standard deviation used for scaling
    pub stds: Array1<f64>,
    /// Session date of each row, empty when built from a raw array
    pub dates: Vec<NaiveDate>,
}

impl FeatureMatrix {
    /// Wrap an already prepared matrix (identity scaling)
    pub fn from_array(data: Array2<f64>, names: Vec<String>) -> Result<Self> {
        if names.len() != data.ncols() {
            return Err(RegimeError::Validation(format!(
                "{} feature names for {} columns",
                names.len(),
                data.ncols()
            )));
        }
        let d = data.ncols();
        Ok(Self {
            data,
            names,
            means: Array1::zeros(d),
            stds: Array1::ones(d),
            dates: Vec::new(),
        })
    }

    /// Number of observations
    pub fn n_samples(&self) -> usize {
        self.data.nrows()
    }

    /// Number of features
    pub fn n_features(&self) -> usize {
        self.data.ncols()
    }
}

/// Feature builder for constructing the feature matrix
#[derive(Debug, Clone)]
pub struct FeatureBuilder {
    /// Window size for volatility
    pub volatility_window: usize,
    /// Periods per year for annualized volatility
    pub annualization_factor: f64,
    /// Columns selected by `scale`
    pub feature_names: Vec<String>,
}

impl Default for FeatureBuilder {
    fn default() -> Self {
        Self::from_config(&RegimeConfig::default())
    }
}

impl FeatureBuilder {
    /// Create new feature builder
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder matching the given configuration
    pub fn from_config(config: &RegimeConfig) -> Self {
        Self {
            volatility_window: config.volatility_window,
            annualization_factor: config.annualization_factor,
            feature_names: config.feature_names.clone(),
        }
    }

    /// Set volatility window
    pub fn with_volatility_window(mut self, window: usize) -> Self {
        self.volatility_window = window;
        self
    }

    /// Set the scaled feature columns
    pub fn with_features(mut self, names: &[&str]) -> Self {
        self.feature_names = names.iter().map(|n| n.to_string()).collect();
        self
    }

    /// Compute log returns and rolling volatility.
    ///
    /// The first bar has no return and the next `window - 1` returns have no
    /// full volatility lookback; those rows are dropped, leaving
    /// `bars.len() - window` rows.
    pub fn build(&self, bars: &[Bar]) -> Result<Vec<FeatureRow>> {
        let window = self.volatility_window;
        validate_bars(bars)?;

        if window < 2 {
            return Err(RegimeError::Validation(format!(
                "volatility window must be at least 2, got {}",
                window
            )));
        }
        if bars.len() <= window {
            return Err(RegimeError::Validation(format!(
                "Not enough data: need more than {} bars, got {}",
                window,
                bars.len()
            )));
        }

        let returns = log_returns(bars);
        let volatility = rolling_volatility(&returns, window);
        let annualize = self.annualization_factor.sqrt();

        // volatility[i] covers returns[i..i + window]; its row is the last return
        let rows = volatility
            .iter()
            .enumerate()
            .map(|(i, &vol)| {
                let r = i + window - 1;
                FeatureRow {
                    date: bars[r + 1].date,
                    log_return: returns[r],
                    volatility: vol,
                    volatility_annualized: vol * annualize,
                }
            })
            .collect::<Vec<_>>();

        tracing::debug!(
            bars = bars.len(),
            rows = rows.len(),
            dropped = bars.len() - rows.len(),
            "built feature rows"
        );

        Ok(rows)
    }

    /// Standardize the configured columns to zero mean and unit variance.
    ///
    /// Statistics are population moments over the whole row set. A constant
    /// column is only mean-centered.
    pub fn scale(&self, rows: &[FeatureRow]) -> Result<FeatureMatrix> {
        if rows.is_empty() {
            return Err(RegimeError::Validation(
                "cannot scale an empty feature set".to_string(),
            ));
        }

        let missing: Vec<&String> = self
            .feature_names
            .iter()
            .filter(|name| rows[0].value(name).is_none())
            .collect();
        if !missing.is_empty() {
            return Err(RegimeError::Validation(format!(
                "Missing features: {:?}",
                missing
            )));
        }

        let d = self.feature_names.len();
        let mut data = Array2::zeros((rows.len(), d));
        for (i, row) in rows.iter().enumerate() {
            for (j, name) in self.feature_names.iter().enumerate() {
                data[[i, j]] = row.value(name).unwrap_or_default();
            }
        }

        let means = data.mean_axis(Axis(0)).unwrap_or_else(|| Array1::zeros(d));
        let mut stds = data.std_axis(Axis(0), 0.0);
        stds.mapv_inplace(|s| if s > 1e-12 { s } else { 1.0 });

        for mut row in data.rows_mut() {
            row -= &means;
            row /= &stds;
        }

        tracing::debug!(features = ?self.feature_names, "scaled features");

        Ok(FeatureMatrix {
            data,
            names: self.feature_names.clone(),
            means,
            stds,
            dates: rows.iter().map(|r| r.date).collect(),
        })
    }
}

fn validate_bars(bars: &[Bar]) -> Result<()> {
    if bars.is_empty() {
        return Err(RegimeError::Validation("empty price series".to_string()));
    }
    if let Some(bad) = bars.iter().find(|b| !b.is_well_formed()) {
        return Err(RegimeError::Validation(format!(
            "malformed bar on {}: prices must be positive and finite, volume non-negative",
            bad.date
        )));
    }
    if let Some(pair) = bars.windows(2).find(|w| w[1].date <= w[0].date) {
        return Err(RegimeError::Validation(format!(
            "bars must be strictly increasing by date ({} followed by {})",
            pair[0].date, pair[1].date
        )));
    }
    Ok(())
}

fn log_returns(bars: &[Bar]) -> Vec<f64> {
    bars.windows(2)
        .map(|w| (w[1].close / w[0].close).ln())
        .collect()
}

fn rolling_volatility(returns: &[f64], window: usize) -> Vec<f64> {
    if returns.len() < window {
        return vec![];
    }

    returns
        .windows(window)
        .map(|w| {
            let mean = w.iter().sum::<f64>() / window as f64;
            let variance =
                w.iter().map(|r| (r - mean).powi(2)).sum::<f64>() / (window - 1) as f64;
            variance.sqrt()
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bars_from_closes(closes: &[f64]) -> Vec<Bar> {
        let start = NaiveDate::from_ymd_opt(2023, 1, 1).unwrap();
        closes
            .iter()
            .enumerate()
            .map(|(i, &close)| Bar {
                date: start + chrono::Duration::days(i as i64),
                open: close,
                high: close * 1.01,
                low: close * 0.99,
                close,
                volume: 1_000.0,
            })
            .collect()
    }

    #[test]
    fn test_rolling_volatility_is_sample_std() {
        let vol = rolling_volatility(&[1.0, 2.0, 3.0, 4.0], 3);
        assert_eq!(vol.len(), 2);
        assert!((vol[0] - 1.0).abs() < 1e-12);
        assert!((vol[1] - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_build_drops_warmup_rows() {
        let closes: Vec<f64> = (0..40).map(|i| 100.0 * (1.0 + 0.01 * (i % 3) as f64)).collect();
        let bars = bars_from_closes(&closes);
        let rows = FeatureBuilder::new()
            .with_volatility_window(5)
            .build(&bars)
            .unwrap();

        assert_eq!(rows.len(), 40 - 5);
        assert_eq!(rows[0].date, bars[5].date);
        assert!((rows[0].log_return - (closes[5] / closes[4]).ln()).abs() < 1e-12);
        assert!((rows[0].volatility_annualized - rows[0].volatility * 252f64.sqrt()).abs() < 1e-12);
    }

    #[test]
    fn test_build_rejects_unordered_dates() {
        let mut bars = bars_from_closes(&[100.0, 101.0, 102.0, 103.0]);
        bars.swap(1, 2);
        let err = FeatureBuilder::new().with_volatility_window(2).build(&bars);
        assert!(matches!(err, Err(RegimeError::Validation(_))));
    }

    #[test]
    fn test_build_rejects_short_series() {
        let bars = bars_from_closes(&[100.0, 101.0, 102.0]);
        let err = FeatureBuilder::new().build(&bars);
        assert!(matches!(err, Err(RegimeError::Validation(_))));
    }

    #[test]
    fn test_scale_standardizes_columns() {
        let closes: Vec<f64> = (0..60).map(|i| 100.0 + (i as f64 * 0.7).sin() * 5.0).collect();
        let bars = bars_from_closes(&closes);
        let builder = FeatureBuilder::new().with_volatility_window(10);
        let rows = builder.build(&bars).unwrap();
        let matrix = builder.scale(&rows).unwrap();

        assert_eq!(matrix.n_samples(), rows.len());
        assert_eq!(matrix.n_features(), 2);
        for col in matrix.data.columns() {
            assert!(col.mean().unwrap().abs() < 1e-9);
            assert!((col.std(0.0) - 1.0).abs() < 1e-9);
        }
    }

    #[test]
    fn test_scale_unknown_feature() {
        let rows = vec![FeatureRow {
            date: NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
            log_return: 0.01,
            volatility: 0.02,
            volatility_annualized: 0.3,
        }];
        let err = FeatureBuilder::new().with_features(&["rsi"]).scale(&rows);
        assert!(matches!(err, Err(RegimeError::Validation(_))));
    }
}
