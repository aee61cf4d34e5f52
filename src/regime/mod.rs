//! Regime interpretation module
//!
//! Names decoded HMM states, scores how persistent they are and forecasts the
//! next one.

mod labeler;
mod persistence;
mod predictor;

pub use labeler::{label_policy, LabelPolicy, Regime, RegimeLabelMapping, RegimeLabeler, StateStatistics};
pub use persistence::{PersistenceAnalyzer, PersistenceMetrics, PersistenceQuality, RegimeDuration};
pub use predictor::{Prediction, RegimePredictor};
