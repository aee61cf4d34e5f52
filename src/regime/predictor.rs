//! One-step-ahead regime forecast

use super::labeler::{Regime, RegimeLabelMapping, StateStatistics};
use crate::data::FeatureMatrix;
use crate::error::{RegimeError, Result};
use crate::models::{RegimeModel, TrainedHmm};
use serde::Serialize;
use std::collections::BTreeMap;

/// Forecast of the regime at t+1
#[derive(Debug, Clone, Serialize)]
pub struct Prediction {
    pub next_state: usize,
    pub next_regime: Regime,
    /// Next-step probability per regime label
    pub state_probabilities: BTreeMap<String, f64>,
    pub expected_return: f64,
    pub expected_volatility: f64,
    /// Probability of `next_state`
    pub confidence: f64,
    pub is_confident: bool,
    #[serde(skip)]
    next_distribution: Vec<f64>,
}

impl Prediction {
    /// Next-step probability per state index
    pub fn next_distribution(&self) -> &[f64] {
        &self.next_distribution
    }
}

/// Propagates the last filtered state distribution through the transition
/// matrix
#[derive(Debug, Clone)]
pub struct RegimePredictor<'a> {
    hmm: &'a TrainedHmm,
    stats: &'a [StateStatistics],
    mapping: &'a RegimeLabelMapping,
    confidence_threshold: f64,
}

impl<'a> RegimePredictor<'a> {
    pub fn new(
        model: &'a RegimeModel,
        stats: &'a [StateStatistics],
        mapping: &'a RegimeLabelMapping,
        confidence_threshold: f64,
    ) -> Result<Self> {
        let hmm = model.trained()?;
        let n_states = hmm.n_states();
        if stats.len() != n_states || mapping.len() != n_states {
            return Err(RegimeError::Validation(format!(
                "model has {} states but got {} statistics and {} labels",
                n_states,
                stats.len(),
                mapping.len()
            )));
        }
        Ok(Self {
            hmm,
            stats,
            mapping,
            confidence_threshold,
        })
    }

    /// Next-step state distribution: posterior of the last row times A
    pub fn next_state_distribution(&self, features: &FeatureMatrix) -> Result<Vec<f64>> {
        let posteriors = self.hmm.state_probabilities(features)?;
        let last = posteriors.row(posteriors.nrows() - 1);
        Ok(last.dot(self.hmm.transition_matrix()).to_vec())
    }

    /// Forecast the regime following the last observation
    pub fn predict_next(&self, features: &FeatureMatrix) -> Result<Prediction> {
        let next = self.next_state_distribution(features)?;
        let next_state = most_likely_state(&next);
        let confidence = next[next_state];

        let mut state_probabilities = BTreeMap::new();
        let mut expected_return = 0.0;
        let mut expected_volatility = 0.0;
        for ((state, label), &p) in self.mapping.iter().zip(&next) {
            state_probabilities.insert(label.to_string(), p);
            expected_return += p * self.stats[state].mean_return;
            expected_volatility += p * self.stats[state].mean_volatility;
        }

        let next_regime = self
            .mapping
            .label(next_state)
            .ok_or_else(|| RegimeError::Validation(format!("state {} has no label", next_state)))?;

        tracing::info!(
            regime = %next_regime,
            confidence,
            "next regime predicted"
        );

        Ok(Prediction {
            next_state,
            next_regime,
            state_probabilities,
            expected_return,
            expected_volatility,
            confidence,
            is_confident: confidence >= self.confidence_threshold,
            next_distribution: next,
        })
    }
}

/// Index of the largest probability; the lowest index wins ties
fn most_likely_state(distribution: &[f64]) -> usize {
    let mut best = 0;
    for (state, &p) in distribution.iter().enumerate() {
        if p > distribution[best] {
            best = state;
        }
    }
    best
}
