//! State-count selection by information criteria

use super::hmm::GaussianHmm;
use crate::config::RegimeConfig;
use crate::data::FeatureMatrix;
use crate::error::{RegimeError, Result};
use rayon::prelude::*;
use serde::Serialize;

/// Scores of one candidate state count
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CandidateScore {
    pub n_states: usize,
    pub aic: f64,
    pub bic: f64,
    pub log_likelihood: f64,
}

/// Outcome of a state-count sweep
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OrderSelection {
    pub optimal_n_states: usize,
    /// One entry per candidate, ordered by `n_states`
    pub candidates: Vec<CandidateScore>,
}

/// Fits one model per candidate state count and keeps the lowest BIC
#[derive(Debug, Clone)]
pub struct ModelOrderSelector {
    config: RegimeConfig,
}

impl ModelOrderSelector {
    pub fn new(config: RegimeConfig) -> Self {
        Self { config }
    }

    /// Sweep `min_states..=max_states`.
    ///
    /// Candidates are trained in parallel; each uses its own seeded model so
    /// the result does not depend on scheduling. The first failing candidate
    /// (by state count) aborts the sweep.
    pub fn select_order(
        &self,
        features: &FeatureMatrix,
        min_states: usize,
        max_states: usize,
    ) -> Result<OrderSelection> {
        self.config.validate()?;
        if min_states < 2 {
            return Err(RegimeError::Validation(format!(
                "min_states must be at least 2, got {}",
                min_states
            )));
        }
        if min_states > max_states {
            return Err(RegimeError::Validation(format!(
                "min_states ({}) exceeds max_states ({})",
                min_states, max_states
            )));
        }

        tracing::info!(min_states, max_states, "selecting number of states by BIC");

        let results: Vec<Result<CandidateScore>> = (min_states..=max_states)
            .into_par_iter()
            .map(|n_states| {
                let hmm = GaussianHmm::from_config(n_states, &self.config).fit(features)?;
                let stats = hmm.stats();
                tracing::debug!(
                    n_states,
                    aic = stats.aic,
                    bic = stats.bic,
                    log_likelihood = stats.log_likelihood,
                    "candidate scored"
                );
                Ok(CandidateScore {
                    n_states,
                    aic: stats.aic,
                    bic: stats.bic,
                    log_likelihood: stats.log_likelihood,
                })
            })
            .collect();

        let candidates = results.into_iter().collect::<Result<Vec<_>>>()?;

        // Strict comparison keeps the smallest state count on ties
        let mut best = &candidates[0];
        for candidate in &candidates[1..] {
            if candidate.bic < best.bic {
                best = candidate;
            }
        }
        let optimal_n_states = best.n_states;

        tracing::info!(optimal_n_states, bic = best.bic, "model order selected");

        Ok(OrderSelection {
            optimal_n_states,
            candidates,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array2;

    fn blocks() -> FeatureMatrix {
        let data = Array2::from_shape_fn((80, 1), |(i, _)| {
            let level = if (i / 20) % 2 == 0 { -2.0 } else { 2.0 };
            level + ((i * 13) % 7) as f64 * 0.1
        });
        FeatureMatrix::from_array(data, vec!["x".to_string()]).unwrap()
    }

    #[test]
    fn test_invalid_range() {
        let selector = ModelOrderSelector::new(RegimeConfig::default());
        assert!(matches!(
            selector.select_order(&blocks(), 1, 3),
            Err(RegimeError::Validation(_))
        ));
        assert!(matches!(
            selector.select_order(&blocks(), 4, 3),
            Err(RegimeError::Validation(_))
        ));
    }

    #[test]
    fn test_invalid_config_rejected() {
        let selector = ModelOrderSelector::new(RegimeConfig {
            covariance_type: "diag".to_string(),
            ..Default::default()
        });
        assert!(matches!(
            selector.select_order(&blocks(), 2, 3),
            Err(RegimeError::Validation(_))
        ));
    }

    #[test]
    fn test_candidates_are_ordered() {
        let selector = ModelOrderSelector::new(RegimeConfig::default());
        let selection = selector.select_order(&blocks(), 2, 4).unwrap();

        let ns: Vec<usize> = selection.candidates.iter().map(|c| c.n_states).collect();
        assert_eq!(ns, vec![2, 3, 4]);
        let min_bic = selection
            .candidates
            .iter()
            .map(|c| c.bic)
            .fold(f64::INFINITY, f64::min);
        let chosen = selection
            .candidates
            .iter()
            .find(|c| c.n_states == selection.optimal_n_states)
            .unwrap();
        assert_eq!(chosen.bic, min_bic);
    }

    #[test]
    fn test_single_candidate() {
        let selector = ModelOrderSelector::new(RegimeConfig::default());
        let selection = selector.select_order(&blocks(), 2, 2).unwrap();
        assert_eq!(selection.optimal_n_states, 2);
        assert_eq!(selection.candidates.len(), 1);
    }
}
