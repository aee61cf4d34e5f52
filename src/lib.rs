//! # Market Regime HMM
//!
//! Market regime detection with a full-covariance Gaussian Hidden Markov Model.
//!
//! Daily OHLCV bars are turned into log returns and rolling volatility, a
//! Gaussian HMM is fit with Baum-Welch, and the decoded hidden states are
//! named (Bear, Sideways, Bull, ...), scored for persistence and used to
//! forecast the next regime.
//!
//! ## Features
//!
//! - **Models**: seeded Gaussian HMM with Viterbi, Forward-Backward and
//!   Baum-Welch, plus AIC/BIC and a parallel state-count sweep
//! - **Regimes**: label policies, persistence metrics and one-step forecasts
//! - **Pipeline**: one call from bars to a serializable analysis result
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use market_regime_hmm::prelude::*;
//!
//! fn main() -> anyhow::Result<()> {
//!     let source = CsvDirectory::new("data");
//!     let pipeline = RegimePipeline::new(RegimeConfig::default());
//!     let result = pipeline.run_from_source(&source, "SPY.csv", Some(3), None)?;
//!
//!     println!("current regime: {}", result.current_regime);
//!     println!("next: {} ({:.1}%)", result.prediction.next_regime,
//!         result.prediction.confidence * 100.0);
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod data;
pub mod error;
pub mod models;
pub mod pipeline;
pub mod regime;

pub use config::RegimeConfig;
pub use error::{RegimeError, Result};
pub use pipeline::{AnalysisResult, PipelineStage, RegimePipeline};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::config::RegimeConfig;
    pub use crate::data::{Bar, CsvDirectory, Dataset, DatasetSource, FeatureBuilder, FeatureMatrix};
    pub use crate::error::{RegimeError, Result};
    pub use crate::models::{GaussianHmm, ModelOrderSelector, RegimeModel, TrainingStats};
    pub use crate::pipeline::{AnalysisResult, RegimePipeline};
    pub use crate::regime::{
        PersistenceAnalyzer, PersistenceQuality, Regime, RegimeLabeler, RegimePredictor,
    };
}
