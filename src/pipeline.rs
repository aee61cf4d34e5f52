//! End-to-end regime analysis
//!
//! [`RegimePipeline`] runs bars through feature engineering, HMM training,
//! decoding, labeling, persistence scoring and a one-step forecast, and
//! returns everything as one serializable [`AnalysisResult`].

use crate::config::RegimeConfig;
use crate::data::{Dataset, DatasetSource, FeatureBuilder};
use crate::error::{RegimeError, Result};
use crate::models::{ModelOrderSelector, ModelParams, OrderSelection, RegimeModel, TrainingStats};
use crate::regime::{
    PersistenceAnalyzer, PersistenceMetrics, Prediction, Regime, RegimeLabelMapping,
    RegimeLabeler, RegimePredictor, StateStatistics,
};
use chrono::NaiveDate;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;

/// Progress marker of a pipeline run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineStage {
    Raw,
    FeaturesBuilt,
    Scaled,
    ModelFit,
    StatesDecoded,
    Labeled,
    PersistenceScored,
    Predicted,
    Done,
}

impl fmt::Display for PipelineStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PipelineStage::Raw => "RAW",
            PipelineStage::FeaturesBuilt => "FEATURES_BUILT",
            PipelineStage::Scaled => "SCALED",
            PipelineStage::ModelFit => "MODEL_FIT",
            PipelineStage::StatesDecoded => "STATES_DECODED",
            PipelineStage::Labeled => "LABELED",
            PipelineStage::PersistenceScored => "PERSISTENCE_SCORED",
            PipelineStage::Predicted => "PREDICTED",
            PipelineStage::Done => "DONE",
        };
        write!(f, "{}", name)
    }
}

/// Regime of one recent session
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RegimeHistoryEntry {
    pub date: NaiveDate,
    pub regime: Regime,
}

/// Everything a run produces
#[derive(Debug, Clone, Serialize)]
pub struct AnalysisResult {
    pub dataset: String,
    /// Number of feature rows the model was trained on
    pub total_days: usize,
    pub n_states: usize,
    pub features_used: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model_selection: Option<OrderSelection>,
    pub training_stats: TrainingStats,
    pub regime_mapping: RegimeLabelMapping,
    pub state_statistics: BTreeMap<usize, StateStatistics>,
    pub persistence: PersistenceMetrics,
    pub current_regime: Regime,
    pub current_state: usize,
    pub prediction: Prediction,
    pub regime_history: Vec<RegimeHistoryEntry>,
    pub model_params: ModelParams,
}

/// Regime analysis pipeline
#[derive(Debug, Clone)]
pub struct RegimePipeline {
    config: RegimeConfig,
}

impl Default for RegimePipeline {
    fn default() -> Self {
        Self::new(RegimeConfig::default())
    }
}

impl RegimePipeline {
    pub fn new(config: RegimeConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &RegimeConfig {
        &self.config
    }

    /// Load `name` from `source` and analyze it
    pub fn run_from_source<S: DatasetSource + ?Sized>(
        &self,
        source: &S,
        name: &str,
        n_states: Option<usize>,
        training_window_days: Option<usize>,
    ) -> Result<AnalysisResult> {
        let dataset = source.load(name)?;
        self.run(&dataset, n_states, training_window_days)
    }

    /// Analyze a dataset.
    ///
    /// `n_states` overrides the configured state count and
    /// `training_window_days` overrides `max_training_days`.
    pub fn run(
        &self,
        dataset: &Dataset,
        n_states: Option<usize>,
        training_window_days: Option<usize>,
    ) -> Result<AnalysisResult> {
        let config = &self.config;
        config.validate()?;
        enter(PipelineStage::Raw, &dataset.name);

        let window = training_window_days.unwrap_or(config.max_training_days);
        if window == 0 {
            return Err(RegimeError::Validation(
                "training window must be positive".to_string(),
            ));
        }
        let dataset = if dataset.len() > window {
            tracing::warn!(
                dataset = %dataset.name,
                from = dataset.len(),
                to = window,
                "truncating to trailing training window"
            );
            dataset.tail(window)
        } else {
            dataset.clone()
        };

        let builder = FeatureBuilder::from_config(config);
        let rows = builder.build(&dataset.bars)?;
        enter(PipelineStage::FeaturesBuilt, &dataset.name);

        let matrix = builder.scale(&rows)?;
        enter(PipelineStage::Scaled, &dataset.name);

        let (n_states, model_selection) = match n_states {
            Some(n) => (n, None),
            None if config.auto_select_n_states => {
                let selection = ModelOrderSelector::new(config.clone()).select_order(
                    &matrix,
                    config.min_n_states,
                    config.max_n_states,
                )?;
                (selection.optimal_n_states, Some(selection))
            }
            None => (config.default_n_states, None),
        };
        tracing::info!(n_states, auto_selected = model_selection.is_some(), "state count chosen");

        let model = RegimeModel::new(n_states, config).fit(&matrix)?;
        enter(PipelineStage::ModelFit, &dataset.name);

        let states = model.decode(&matrix)?;
        enter(PipelineStage::StatesDecoded, &dataset.name);

        let (stats, mapping) = RegimeLabeler::new().assign_labels(&model, &rows, &states)?;
        enter(PipelineStage::Labeled, &dataset.name);

        let persistence = PersistenceAnalyzer::from_config(config).analyze(&states, &mapping)?;
        enter(PipelineStage::PersistenceScored, &dataset.name);

        let prediction = RegimePredictor::new(
            &model,
            &stats,
            &mapping,
            config.prediction_confidence_threshold,
        )?
        .predict_next(&matrix)?;
        enter(PipelineStage::Predicted, &dataset.name);

        let label = |state: usize| {
            mapping
                .label(state)
                .ok_or_else(|| RegimeError::Validation(format!("state {} has no label", state)))
        };

        let current_state = *states.last().ok_or_else(|| {
            RegimeError::Validation("decoding produced no states".to_string())
        })?;
        let current_regime = label(current_state)?;

        let start = rows.len().saturating_sub(config.history_lookback);
        let regime_history = rows[start..]
            .iter()
            .zip(&states[start..])
            .map(|(row, &state)| {
                Ok(RegimeHistoryEntry {
                    date: row.date,
                    regime: label(state)?,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        let trained = model.trained()?;
        let result = AnalysisResult {
            dataset: dataset.name.clone(),
            total_days: rows.len(),
            n_states,
            features_used: matrix.names.clone(),
            model_selection,
            training_stats: trained.stats().clone(),
            regime_mapping: mapping.clone(),
            state_statistics: stats.into_iter().enumerate().collect(),
            persistence,
            current_regime,
            current_state,
            prediction,
            regime_history,
            model_params: trained.model_params(),
        };

        enter(PipelineStage::Done, &result.dataset);
        Ok(result)
    }
}

fn enter(stage: PipelineStage, dataset: &str) {
    tracing::info!(%stage, dataset, "pipeline stage");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_names() {
        assert_eq!(PipelineStage::Raw.to_string(), "RAW");
        assert_eq!(PipelineStage::PersistenceScored.to_string(), "PERSISTENCE_SCORED");
        assert_eq!(PipelineStage::Done.to_string(), "DONE");
    }

    #[test]
    fn test_zero_window_rejected() {
        let dataset = Dataset::new("empty.csv", vec![]);
        let err = RegimePipeline::default().run(&dataset, Some(2), Some(0));
        assert!(matches!(err, Err(RegimeError::Validation(_))));
    }

    #[test]
    fn test_invalid_config_rejected_before_any_stage() {
        let dataset = Dataset::new("empty.csv", vec![]);
        let diag = RegimePipeline::new(RegimeConfig {
            covariance_type: "diag".to_string(),
            ..Default::default()
        });
        let err = diag.run(&dataset, Some(2), None).unwrap_err();
        match err {
            RegimeError::Validation(msg) => assert!(msg.contains("covariance_type")),
            other => panic!("unexpected error: {other}"),
        }

        let inverted = RegimePipeline::new(RegimeConfig {
            good_persistence_threshold: 0.01,
            moderate_persistence_threshold: 0.5,
            ..Default::default()
        });
        assert!(matches!(
            inverted.run(&dataset, Some(2), None),
            Err(RegimeError::Validation(_))
        ));
    }

    #[test]
    fn test_short_dataset_fails_before_training() {
        let dataset = Dataset::new("empty.csv", vec![]);
        let err = RegimePipeline::default().run(&dataset, None, None);
        assert!(matches!(err, Err(RegimeError::Validation(_))));
    }
}
