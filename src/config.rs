//! Engine configuration
//!
//! Every knob of the regime engine lives in one immutable [`RegimeConfig`]
//! value that is handed to each component. Values can be loaded from a TOML
//! file; missing keys fall back to their defaults.

use crate::error::{RegimeError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Feature columns understood by the feature builder
pub const LOG_RETURN: &str = "log_return";
pub const VOLATILITY: &str = "volatility";
pub const VOLATILITY_ANNUALIZED: &str = "volatility_annualized";

/// Hyperparameters for feature engineering, HMM training and scoring
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegimeConfig {
    /// Rolling window for realized volatility
    #[serde(default = "default_volatility_window")]
    pub volatility_window: usize,

    /// Periods per year used for `volatility_annualized`
    #[serde(default = "default_annualization_factor")]
    pub annualization_factor: f64,

    /// State count used when the caller does not choose one
    #[serde(default = "default_n_states")]
    pub default_n_states: usize,

    /// Only "full" is supported
    #[serde(default = "default_covariance_type")]
    pub covariance_type: String,

    #[serde(default = "default_max_em_iterations")]
    pub max_em_iterations: usize,

    #[serde(default = "default_convergence_tolerance")]
    pub convergence_tolerance: f64,

    /// Seed for parameter initialisation
    #[serde(default = "default_random_seed")]
    pub random_seed: u64,

    /// Diagonal floor added to every covariance estimate
    #[serde(default = "default_min_covar")]
    pub min_covar: f64,

    /// Lower bound of the BIC sweep
    #[serde(default = "default_min_n_states")]
    pub min_n_states: usize,

    /// Upper bound of the BIC sweep
    #[serde(default = "default_max_n_states")]
    pub max_n_states: usize,

    /// Pick the state count by BIC when the caller does not pass one
    #[serde(default)]
    pub auto_select_n_states: bool,

    #[serde(default = "default_good_persistence_threshold")]
    pub good_persistence_threshold: f64,

    #[serde(default = "default_moderate_persistence_threshold")]
    pub moderate_persistence_threshold: f64,

    /// Minimum next-step probability for a prediction to count as confident
    #[serde(default = "default_prediction_confidence_threshold")]
    pub prediction_confidence_threshold: f64,

    /// Trailing window of bars kept for training
    #[serde(default = "default_max_training_days")]
    pub max_training_days: usize,

    /// Feature columns fed to the model, in order
    #[serde(default = "default_feature_names")]
    pub feature_names: Vec<String>,

    /// Number of trailing labeled rows reported as history
    #[serde(default = "default_history_lookback")]
    pub history_lookback: usize,
}

fn default_volatility_window() -> usize {
    30
}

fn default_annualization_factor() -> f64 {
    252.0
}

fn default_n_states() -> usize {
    3
}

fn default_covariance_type() -> String {
    "full".to_string()
}

fn default_max_em_iterations() -> usize {
    1000
}

fn default_convergence_tolerance() -> f64 {
    1e-4
}

fn default_random_seed() -> u64 {
    42
}

fn default_min_covar() -> f64 {
    1e-3
}

fn default_min_n_states() -> usize {
    2
}

fn default_max_n_states() -> usize {
    4
}

fn default_good_persistence_threshold() -> f64 {
    0.10
}

fn default_moderate_persistence_threshold() -> f64 {
    0.05
}

fn default_prediction_confidence_threshold() -> f64 {
    0.6
}

fn default_max_training_days() -> usize {
    500
}

fn default_feature_names() -> Vec<String> {
    vec![LOG_RETURN.to_string(), VOLATILITY.to_string()]
}

fn default_history_lookback() -> usize {
    30
}

impl Default for RegimeConfig {
    fn default() -> Self {
        Self {
            volatility_window: default_volatility_window(),
            annualization_factor: default_annualization_factor(),
            default_n_states: default_n_states(),
            covariance_type: default_covariance_type(),
            max_em_iterations: default_max_em_iterations(),
            convergence_tolerance: default_convergence_tolerance(),
            random_seed: default_random_seed(),
            min_covar: default_min_covar(),
            min_n_states: default_min_n_states(),
            max_n_states: default_max_n_states(),
            auto_select_n_states: false,
            good_persistence_threshold: default_good_persistence_threshold(),
            moderate_persistence_threshold: default_moderate_persistence_threshold(),
            prediction_confidence_threshold: default_prediction_confidence_threshold(),
            max_training_days: default_max_training_days(),
            feature_names: default_feature_names(),
            history_lookback: default_history_lookback(),
        }
    }
}

impl RegimeConfig {
    /// Load configuration from a TOML file and validate it
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Parse configuration from TOML text and validate it
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: RegimeConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Check that the values are mutually consistent
    pub fn validate(&self) -> Result<()> {
        if self.volatility_window < 2 {
            return Err(RegimeError::Validation(format!(
                "volatility_window must be at least 2, got {}",
                self.volatility_window
            )));
        }
        if self.default_n_states < 2 || self.min_n_states < 2 {
            return Err(RegimeError::Validation(
                "state counts must be at least 2".to_string(),
            ));
        }
        if self.min_n_states > self.max_n_states {
            return Err(RegimeError::Validation(format!(
                "min_n_states ({}) exceeds max_n_states ({})",
                self.min_n_states, self.max_n_states
            )));
        }
        if self.covariance_type != "full" {
            return Err(RegimeError::Validation(format!(
                "unsupported covariance_type '{}', only 'full' is available",
                self.covariance_type
            )));
        }
        if self.max_em_iterations == 0 {
            return Err(RegimeError::Validation(
                "max_em_iterations must be positive".to_string(),
            ));
        }
        if !(self.convergence_tolerance > 0.0) || !(self.min_covar >= 0.0) {
            return Err(RegimeError::Validation(
                "convergence_tolerance must be positive and min_covar non-negative".to_string(),
            ));
        }
        if self.moderate_persistence_threshold > self.good_persistence_threshold {
            return Err(RegimeError::Validation(
                "moderate_persistence_threshold must not exceed good_persistence_threshold"
                    .to_string(),
            ));
        }
        if self.feature_names.is_empty() {
            return Err(RegimeError::Validation(
                "feature_names must not be empty".to_string(),
            ));
        }
        if self.max_training_days == 0 {
            return Err(RegimeError::Validation(
                "max_training_days must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = RegimeConfig::default();
        assert_eq!(config.volatility_window, 30);
        assert_eq!(config.default_n_states, 3);
        assert_eq!(config.random_seed, 42);
        assert_eq!(config.feature_names, vec!["log_return", "volatility"]);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config = RegimeConfig::from_toml_str(
            "volatility_window = 20\nmax_n_states = 5\n",
        )
        .unwrap();
        assert_eq!(config.volatility_window, 20);
        assert_eq!(config.max_n_states, 5);
        assert_eq!(config.max_training_days, 500);
    }

    #[test]
    fn test_invalid_range_rejected() {
        let result = RegimeConfig::from_toml_str("min_n_states = 5\nmax_n_states = 3\n");
        assert!(matches!(result, Err(RegimeError::Validation(_))));
    }

    #[test]
    fn test_diagonal_covariance_rejected() {
        let config = RegimeConfig {
            covariance_type: "diag".to_string(),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }
}
