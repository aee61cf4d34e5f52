//! Gaussian Hidden Markov Model implementation
//!
//! [`GaussianHmm`] holds the training configuration of a model that has not
//! seen data yet. Fitting it yields an immutable [`TrainedHmm`]. The
//! [`RegimeModel`] enum tags the two so callers that only hold "a model" get a
//! `NotTrained` error instead of garbage when it was never fit.

use super::algorithms::{baum_welch_step, forward_backward, log_emission_matrix, viterbi};
use super::gaussian::{weighted_covariance, MultivariateGaussian};
use crate::config::RegimeConfig;
use crate::data::FeatureMatrix;
use crate::error::{RegimeError, Result};
use ndarray::{Array1, Array2, ArrayView2, Axis};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;

/// HMM parameters
#[derive(Debug, Clone)]
pub struct HmmParams {
    /// Number of hidden states
    pub n_states: usize,
    /// Number of features
    pub n_features: usize,
    /// Initial state probabilities
    pub initial_probs: Array1<f64>,
    /// State transition matrix
    pub transition_matrix: Array2<f64>,
    /// Emission distributions (one per state)
    pub emissions: Vec<MultivariateGaussian>,
}

impl HmmParams {
    /// Draw the chain parameters from `rng` around the given emissions.
    ///
    /// Start probabilities are random and the transition matrix is diagonal
    /// dominant. The emissions are taken as they are.
    pub fn random<R: Rng>(emissions: Vec<MultivariateGaussian>, rng: &mut R) -> Self {
        let n_states = emissions.len();
        let n_features = emissions.first().map_or(0, MultivariateGaussian::dim);

        let mut initial_probs = Array1::zeros(n_states);
        for i in 0..n_states {
            initial_probs[i] = rng.gen::<f64>() + 0.1;
        }
        let sum = initial_probs.sum();
        initial_probs /= sum;

        let mut transition_matrix = Array2::zeros((n_states, n_states));
        for i in 0..n_states {
            for j in 0..n_states {
                if i == j {
                    transition_matrix[[i, j]] = 0.8 + rng.gen::<f64>() * 0.15;
                } else {
                    transition_matrix[[i, j]] = rng.gen::<f64>() * 0.1;
                }
            }
            let row_sum: f64 = transition_matrix.row(i).sum();
            for j in 0..n_states {
                transition_matrix[[i, j]] /= row_sum;
            }
        }

        Self {
            n_states,
            n_features,
            initial_probs,
            transition_matrix,
            emissions,
        }
    }
}

/// Fit-quality statistics of a trained model
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrainingStats {
    pub log_likelihood: f64,
    pub aic: f64,
    pub bic: f64,
    pub n_params: usize,
    pub n_iterations: usize,
    /// Whether the tolerance was met before the iteration cap
    pub converged: bool,
}

/// Start and transition parameters plus emissions, as plain vectors
#[derive(Debug, Clone, Serialize)]
pub struct ModelParams {
    pub start_probs: Vec<f64>,
    pub transition_matrix: Vec<Vec<f64>>,
    pub means: Vec<Vec<f64>>,
    pub covariances: Vec<Vec<Vec<f64>>>,
}

/// Count free parameters of a full-covariance Gaussian HMM.
///
/// Transition: n(n-1), initial: n-1, means: n*d, covariances: n*d(d+1)/2.
pub fn count_parameters(n_states: usize, n_features: usize) -> usize {
    let n = n_states;
    let d = n_features;
    n * (n - 1) + (n - 1) + n * d + n * d * (d + 1) / 2
}

/// Untrained Gaussian HMM: state count plus EM settings
#[derive(Debug, Clone)]
pub struct GaussianHmm {
    n_states: usize,
    max_iter: usize,
    tol: f64,
    seed: u64,
    min_covar: f64,
}

impl GaussianHmm {
    /// Create new untrained HMM with given number of states
    pub fn new(n_states: usize) -> Self {
        Self::from_config(n_states, &RegimeConfig::default())
    }

    /// Untrained HMM using the EM settings of `config`
    pub fn from_config(n_states: usize, config: &RegimeConfig) -> Self {
        Self {
            n_states,
            max_iter: config.max_em_iterations,
            tol: config.convergence_tolerance,
            seed: config.random_seed,
            min_covar: config.min_covar,
        }
    }

    /// Set maximum EM iterations
    pub fn with_max_iter(mut self, max_iter: usize) -> Self {
        self.max_iter = max_iter;
        self
    }

    /// Set the initialisation seed
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Number of states
    pub fn n_states(&self) -> usize {
        self.n_states
    }

    /// Fit the model to data using Baum-Welch (EM)
    pub fn fit(&self, features: &FeatureMatrix) -> Result<TrainedHmm> {
        let observations = &features.data;
        let n_samples = observations.nrows();
        let n_features = observations.ncols();
        let k = self.n_states;
        let numerical = |message: String| RegimeError::numerical(message, k, n_samples, n_features);

        if k < 2 {
            return Err(RegimeError::Validation(format!(
                "n_states must be at least 2, got {}",
                k
            )));
        }
        if n_samples == 0 || n_features == 0 {
            return Err(RegimeError::Validation(
                "cannot fit on an empty feature matrix".to_string(),
            ));
        }
        if observations.iter().any(|x| !x.is_finite()) {
            return Err(RegimeError::Validation(
                "feature matrix contains non-finite values".to_string(),
            ));
        }
        if n_samples < k {
            return Err(numerical(format!(
                "{} observations cannot support {} hidden states",
                n_samples, k
            )));
        }
        let variances = observations.var_axis(Axis(0), 0.0);
        if let Some(col) = variances.iter().position(|&v| v < 1e-12) {
            let name = features.names.get(col).map(String::as_str).unwrap_or("?");
            return Err(numerical(format!("feature column '{}' has zero variance", name)));
        }

        tracing::info!(
            n_samples,
            n_features,
            n_states = k,
            "training Gaussian HMM"
        );

        let mut rng = StdRng::seed_from_u64(self.seed);
        let centers = kmeans(observations.view(), k, &mut rng);
        let data_mean = observations
            .mean_axis(Axis(0))
            .unwrap_or_else(|| Array1::zeros(n_features));
        let data_cov = weighted_covariance(
            observations.view(),
            Array1::ones(n_samples).view(),
            &data_mean,
            self.min_covar,
        );
        let emissions = centers
            .into_iter()
            .map(|center| MultivariateGaussian::new(center, data_cov.clone()))
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|_| numerical("data covariance is not positive definite".to_string()))?;
        let mut params = HmmParams::random(emissions, &mut rng);

        let mut history = Vec::new();
        let mut prev_ll = f64::NEG_INFINITY;
        let mut converged = false;
        let mut n_iterations = 0;

        for iter in 0..self.max_iter {
            let step = baum_welch_step(
                observations,
                &params.initial_probs,
                &params.transition_matrix,
                &params.emissions,
            );
            let log_ll = step.log_likelihood;
            if !log_ll.is_finite() {
                return Err(numerical(format!(
                    "log-likelihood became non-finite at iteration {}",
                    iter + 1
                )));
            }

            params.initial_probs = step.initial_probs;
            params.transition_matrix = step.transition_matrix;
            for j in 0..k {
                params.emissions[j]
                    .update_weighted(observations.view(), step.gamma.column(j), self.min_covar)
                    .map_err(|_| {
                        numerical(format!("covariance of state {} is not positive definite", j))
                    })?;
            }

            history.push(log_ll);
            n_iterations = iter + 1;

            if log_ll - prev_ll < self.tol {
                converged = true;
                tracing::debug!("Converged after {} iterations", n_iterations);
                break;
            }
            prev_ll = log_ll;

            if n_iterations % 10 == 0 {
                tracing::debug!("Iteration {}: log-likelihood = {:.4}", n_iterations, log_ll);
            }
        }

        if !converged {
            tracing::warn!(
                max_iter = self.max_iter,
                "EM stopped at the iteration cap without converging"
            );
        }

        let log_likelihood = score_params(&params, observations);
        if !log_likelihood.is_finite() {
            return Err(numerical("final log-likelihood is not finite".to_string()));
        }

        let n_params = count_parameters(k, n_features);
        let aic = -2.0 * log_likelihood + 2.0 * n_params as f64;
        let bic = -2.0 * log_likelihood + n_params as f64 * (n_samples as f64).ln();

        let stats = TrainingStats {
            log_likelihood,
            aic,
            bic,
            n_params,
            n_iterations,
            converged,
        };

        tracing::info!(
            converged,
            n_iterations,
            log_likelihood,
            bic,
            "HMM training complete"
        );

        Ok(TrainedHmm {
            params,
            stats,
            log_likelihood_history: history,
        })
    }
}

/// A fitted Gaussian HMM; parameters never change after training
#[derive(Debug, Clone)]
pub struct TrainedHmm {
    params: HmmParams,
    stats: TrainingStats,
    log_likelihood_history: Vec<f64>,
}

impl TrainedHmm {
    /// Number of states
    pub fn n_states(&self) -> usize {
        self.params.n_states
    }

    /// Trained parameters
    pub fn params(&self) -> &HmmParams {
        &self.params
    }

    /// Fit statistics
    pub fn stats(&self) -> &TrainingStats {
        &self.stats
    }

    /// Log-likelihood recorded at each EM iteration
    pub fn log_likelihood_history(&self) -> &[f64] {
        &self.log_likelihood_history
    }

    /// Get the transition matrix
    pub fn transition_matrix(&self) -> &Array2<f64> {
        &self.params.transition_matrix
    }

    /// Get emission means for each state
    pub fn emission_means(&self) -> Vec<Array1<f64>> {
        self.params.emissions.iter().map(|e| e.mean.clone()).collect()
    }

    /// Most likely state sequence (Viterbi)
    pub fn decode(&self, features: &FeatureMatrix) -> Result<Vec<usize>> {
        self.check_dims(features)?;
        let log_b = log_emission_matrix(&features.data, &self.params.emissions);
        let (path, _) = viterbi(
            &log_b,
            &self.params.initial_probs,
            &self.params.transition_matrix,
        );
        Ok(path)
    }

    /// Posterior state probabilities, one row per observation
    pub fn state_probabilities(&self, features: &FeatureMatrix) -> Result<Array2<f64>> {
        self.check_dims(features)?;
        let log_b = log_emission_matrix(&features.data, &self.params.emissions);
        let fb = forward_backward(
            &log_b,
            &self.params.initial_probs,
            &self.params.transition_matrix,
        );
        Ok(fb.gamma)
    }

    /// Log-likelihood of observations
    pub fn score(&self, features: &FeatureMatrix) -> Result<f64> {
        self.check_dims(features)?;
        Ok(score_params(&self.params, &features.data))
    }

    /// Plain-vector copy of the parameters for reporting
    pub fn model_params(&self) -> ModelParams {
        ModelParams {
            start_probs: self.params.initial_probs.to_vec(),
            transition_matrix: rows_to_vecs(self.params.transition_matrix.view()),
            means: self.params.emissions.iter().map(|e| e.mean.to_vec()).collect(),
            covariances: self
                .params
                .emissions
                .iter()
                .map(|e| rows_to_vecs(e.covariance.view()))
                .collect(),
        }
    }

    fn check_dims(&self, features: &FeatureMatrix) -> Result<()> {
        if features.n_features() != self.params.n_features {
            return Err(RegimeError::Validation(format!(
                "model was trained on {} features, got {}",
                self.params.n_features,
                features.n_features()
            )));
        }
        if features.n_samples() == 0 {
            return Err(RegimeError::Validation(
                "feature matrix has no rows".to_string(),
            ));
        }
        Ok(())
    }
}

/// A model that may or may not have been fit yet
#[derive(Debug, Clone)]
pub enum RegimeModel {
    Untrained(GaussianHmm),
    Trained(TrainedHmm),
}

impl RegimeModel {
    /// Fresh untrained model with `n_states` states
    pub fn new(n_states: usize, config: &RegimeConfig) -> Self {
        RegimeModel::Untrained(GaussianHmm::from_config(n_states, config))
    }

    /// Train the model; a model is fit exactly once
    pub fn fit(self, features: &FeatureMatrix) -> Result<RegimeModel> {
        match self {
            RegimeModel::Untrained(untrained) => Ok(RegimeModel::Trained(untrained.fit(features)?)),
            RegimeModel::Trained(_) => Err(RegimeError::Validation(
                "model is already trained; build a new one to refit".to_string(),
            )),
        }
    }

    pub fn n_states(&self) -> usize {
        match self {
            RegimeModel::Untrained(untrained) => untrained.n_states(),
            RegimeModel::Trained(hmm) => hmm.n_states(),
        }
    }

    pub fn is_trained(&self) -> bool {
        matches!(self, RegimeModel::Trained(_))
    }

    /// The trained model, or `NotTrained`
    pub fn trained(&self) -> Result<&TrainedHmm> {
        match self {
            RegimeModel::Trained(hmm) => Ok(hmm),
            RegimeModel::Untrained(_) => Err(RegimeError::NotTrained(
                "call fit() before using the model".to_string(),
            )),
        }
    }

    pub fn training_stats(&self) -> Result<&TrainingStats> {
        Ok(self.trained()?.stats())
    }

    /// Viterbi decoding
    pub fn decode(&self, features: &FeatureMatrix) -> Result<Vec<usize>> {
        self.trained()?.decode(features)
    }

    /// Forward-backward posteriors
    pub fn state_probabilities(&self, features: &FeatureMatrix) -> Result<Array2<f64>> {
        self.trained()?.state_probabilities(features)
    }
}

fn score_params(params: &HmmParams, observations: &Array2<f64>) -> f64 {
    let log_b = log_emission_matrix(observations, &params.emissions);
    forward_backward(&log_b, &params.initial_probs, &params.transition_matrix).log_likelihood
}

fn rows_to_vecs(matrix: ArrayView2<f64>) -> Vec<Vec<f64>> {
    matrix.rows().into_iter().map(|r| r.to_vec()).collect()
}

/// Seeded k-means++ seeding followed by a few Lloyd iterations
fn kmeans<R: Rng>(observations: ArrayView2<f64>, k: usize, rng: &mut R) -> Vec<Array1<f64>> {
    let n = observations.nrows();
    let sq_dist = |i: usize, center: &Array1<f64>| -> f64 {
        observations
            .row(i)
            .iter()
            .zip(center.iter())
            .map(|(a, b)| (a - b).powi(2))
            .sum()
    };

    let mut centers: Vec<Array1<f64>> = vec![observations.row(rng.gen_range(0..n)).to_owned()];
    while centers.len() < k {
        let d2: Vec<f64> = (0..n)
            .map(|i| {
                centers
                    .iter()
                    .map(|c| sq_dist(i, c))
                    .fold(f64::INFINITY, f64::min)
            })
            .collect();
        let total: f64 = d2.iter().sum();

        let idx = if total > 0.0 {
            let mut target = rng.gen::<f64>() * total;
            let mut chosen = n - 1;
            for (i, &d) in d2.iter().enumerate() {
                if target < d {
                    chosen = i;
                    break;
                }
                target -= d;
            }
            chosen
        } else {
            rng.gen_range(0..n)
        };
        centers.push(observations.row(idx).to_owned());
    }

    for _ in 0..10 {
        let mut assignments = vec![0; n];
        for (i, assignment) in assignments.iter_mut().enumerate() {
            let mut best_dist = f64::MAX;
            for (j, center) in centers.iter().enumerate() {
                let dist = sq_dist(i, center);
                if dist < best_dist {
                    best_dist = dist;
                    *assignment = j;
                }
            }
        }

        for (j, center) in centers.iter_mut().enumerate() {
            let members: Vec<usize> = (0..n).filter(|&i| assignments[i] == j).collect();
            if let Some(mean) = observations.select(Axis(0), &members).mean_axis(Axis(0)) {
                *center = mean;
            }
        }
    }

    centers
}
