//! HMM models module
//!
//! Provides a full-covariance Gaussian HMM with Viterbi, Forward-Backward
//! and Baum-Welch algorithms, plus state-count selection by BIC.

mod algorithms;
mod gaussian;
mod hmm;
mod selection;

pub use algorithms::{baum_welch_step, forward_backward, viterbi, ForwardBackward};
pub use gaussian::MultivariateGaussian;
pub use hmm::{
    count_parameters, GaussianHmm, HmmParams, ModelParams, RegimeModel, TrainedHmm,
    TrainingStats,
};
pub use selection::{CandidateScore, ModelOrderSelector, OrderSelection};
