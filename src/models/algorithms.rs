//! HMM algorithms: Viterbi, Forward-Backward, Baum-Welch
//!
//! All recursions work on a precomputed log-emission matrix. The forward and
//! backward passes are scaled per time step, with each row of emission
//! densities shifted by its maximum before exponentiation so that far-off
//! observations cannot underflow every state at once.

use super::gaussian::MultivariateGaussian;
use ndarray::{Array1, Array2, Axis};

/// Floor used when taking logs of probabilities
const LOG_EPS: f64 = 1e-300;

/// Log density of every observation under every state's emission (T x N)
pub fn log_emission_matrix(
    observations: &Array2<f64>,
    emissions: &[MultivariateGaussian],
) -> Array2<f64> {
    let t = observations.nrows();
    let n = emissions.len();
    let mut log_b = Array2::zeros((t, n));

    for (t_idx, obs) in observations.rows().into_iter().enumerate() {
        for (j, emission) in emissions.iter().enumerate() {
            log_b[[t_idx, j]] = emission.log_pdf(obs);
        }
    }

    log_b
}

/// Viterbi algorithm - finds most likely state sequence
///
/// # Arguments
/// * `log_emissions` - Log emission densities (T x N)
/// * `initial_probs` - Initial state probabilities (N)
/// * `transition_matrix` - State transition probabilities (N x N)
///
/// # Returns
/// Most likely state sequence and its log probability. Ties resolve to the
/// lowest state index.
pub fn viterbi(
    log_emissions: &Array2<f64>,
    initial_probs: &Array1<f64>,
    transition_matrix: &Array2<f64>,
) -> (Vec<usize>, f64) {
    let t = log_emissions.nrows();
    let n = initial_probs.len();

    if t == 0 {
        return (vec![], 0.0);
    }

    let log_initial: Array1<f64> = initial_probs.mapv(|p| (p + LOG_EPS).ln());
    let log_trans: Array2<f64> = transition_matrix.mapv(|p| (p + LOG_EPS).ln());

    // Delta: best path log probability ending in state j at time t
    let mut delta = Array2::<f64>::zeros((t, n));
    // Psi: backpointers for path reconstruction
    let mut psi = Array2::<usize>::zeros((t, n));

    for j in 0..n {
        delta[[0, j]] = log_initial[j] + log_emissions[[0, j]];
    }

    for t_idx in 1..t {
        for j in 0..n {
            let mut best_val = f64::NEG_INFINITY;
            let mut best_state = 0;

            for i in 0..n {
                let val = delta[[t_idx - 1, i]] + log_trans[[i, j]];
                if val > best_val {
                    best_val = val;
                    best_state = i;
                }
            }

            delta[[t_idx, j]] = best_val + log_emissions[[t_idx, j]];
            psi[[t_idx, j]] = best_state;
        }
    }

    let mut best_final_state = 0;
    let mut best_final_prob = f64::NEG_INFINITY;
    for j in 0..n {
        if delta[[t - 1, j]] > best_final_prob {
            best_final_prob = delta[[t - 1, j]];
            best_final_state = j;
        }
    }

    let mut path = vec![0; t];
    path[t - 1] = best_final_state;
    for t_idx in (0..t - 1).rev() {
        path[t_idx] = psi[[t_idx + 1, path[t_idx + 1]]];
    }

    (path, best_final_prob)
}

/// Output of the forward-backward pass
#[derive(Debug, Clone)]
pub struct ForwardBackward {
    /// Scaled forward probabilities (T x N); each row sums to 1
    pub alpha: Array2<f64>,
    /// Scaled backward probabilities (T x N)
    pub beta: Array2<f64>,
    /// Posterior state probabilities (T x N)
    pub gamma: Array2<f64>,
    /// Per-step scaling constants of the forward pass
    pub scale: Array1<f64>,
    /// Row-shifted emission densities the recursions ran on
    pub emission_probs: Array2<f64>,
    /// log P(observations | model)
    pub log_likelihood: f64,
}

/// Forward-Backward algorithm - computes state posterior probabilities
pub fn forward_backward(
    log_emissions: &Array2<f64>,
    initial_probs: &Array1<f64>,
    transition_matrix: &Array2<f64>,
) -> ForwardBackward {
    let t = log_emissions.nrows();
    let n = initial_probs.len();

    if t == 0 {
        return ForwardBackward {
            alpha: Array2::zeros((0, n)),
            beta: Array2::zeros((0, n)),
            gamma: Array2::zeros((0, n)),
            scale: Array1::zeros(0),
            emission_probs: Array2::zeros((0, n)),
            log_likelihood: 0.0,
        };
    }

    // exp(log b - max_j log b) keeps the largest density of each row at 1
    let shift: Array1<f64> = log_emissions
        .map_axis(Axis(1), |row| row.fold(f64::NEG_INFINITY, |a, &b| a.max(b)));
    let mut emission_probs = log_emissions.clone();
    for (mut row, &m) in emission_probs.rows_mut().into_iter().zip(shift.iter()) {
        row.mapv_inplace(|lb| (lb - m).exp());
    }

    // Forward pass
    let mut alpha = Array2::zeros((t, n));
    let mut scale = Array1::zeros(t);

    for j in 0..n {
        alpha[[0, j]] = initial_probs[j] * emission_probs[[0, j]];
    }
    scale[0] = alpha.row(0).sum();
    if scale[0] > LOG_EPS {
        for j in 0..n {
            alpha[[0, j]] /= scale[0];
        }
    }

    for t_idx in 1..t {
        for j in 0..n {
            let mut sum = 0.0;
            for i in 0..n {
                sum += alpha[[t_idx - 1, i]] * transition_matrix[[i, j]];
            }
            alpha[[t_idx, j]] = sum * emission_probs[[t_idx, j]];
        }

        scale[t_idx] = alpha.row(t_idx).sum();
        if scale[t_idx] > LOG_EPS {
            for j in 0..n {
                alpha[[t_idx, j]] /= scale[t_idx];
            }
        }
    }

    // A zero scale means no state explains the observation; the -inf surfaces
    let log_likelihood: f64 = scale
        .iter()
        .zip(shift.iter())
        .map(|(&c, &m)| c.ln() + m)
        .sum();

    // Backward pass
    let mut beta = Array2::zeros((t, n));
    for j in 0..n {
        beta[[t - 1, j]] = 1.0;
    }

    for t_idx in (0..t - 1).rev() {
        for i in 0..n {
            let mut sum = 0.0;
            for j in 0..n {
                sum += transition_matrix[[i, j]]
                    * emission_probs[[t_idx + 1, j]]
                    * beta[[t_idx + 1, j]];
            }
            beta[[t_idx, i]] = sum;
        }

        if scale[t_idx + 1] > LOG_EPS {
            for i in 0..n {
                beta[[t_idx, i]] /= scale[t_idx + 1];
            }
        }
    }

    let mut gamma = &alpha * &beta;
    for mut row in gamma.rows_mut() {
        let sum = row.sum();
        if sum > LOG_EPS {
            row /= sum;
        }
    }

    ForwardBackward {
        alpha,
        beta,
        gamma,
        scale,
        emission_probs,
        log_likelihood,
    }
}

/// Re-estimated chain parameters from one Baum-Welch iteration
#[derive(Debug, Clone)]
pub struct EmStep {
    pub initial_probs: Array1<f64>,
    pub transition_matrix: Array2<f64>,
    /// Posterior state probabilities used to refit emissions
    pub gamma: Array2<f64>,
    /// Log-likelihood under the parameters *before* this step
    pub log_likelihood: f64,
}

/// Single Baum-Welch (EM) step for the Markov chain parameters.
///
/// Emission parameters are refit by the caller from `gamma`.
pub fn baum_welch_step(
    observations: &Array2<f64>,
    initial_probs: &Array1<f64>,
    transition_matrix: &Array2<f64>,
    emissions: &[MultivariateGaussian],
) -> EmStep {
    let t = observations.nrows();
    let n = initial_probs.len();

    // E-step
    let log_emissions = log_emission_matrix(observations, emissions);
    let fb = forward_backward(&log_emissions, initial_probs, transition_matrix);

    // xi summed over time: expected i -> j transition counts
    let mut xi_sum = Array2::<f64>::zeros((n, n));
    for t_idx in 0..t.saturating_sub(1) {
        let c = fb.scale[t_idx + 1];
        if c <= LOG_EPS {
            continue;
        }
        for i in 0..n {
            for j in 0..n {
                xi_sum[[i, j]] += fb.alpha[[t_idx, i]]
                    * transition_matrix[[i, j]]
                    * fb.emission_probs[[t_idx + 1, j]]
                    * fb.beta[[t_idx + 1, j]]
                    / c;
            }
        }
    }

    // M-step
    let mut new_initial = fb.gamma.row(0).to_owned();
    let init_sum = new_initial.sum();
    if init_sum > LOG_EPS {
        new_initial /= init_sum;
    } else {
        new_initial = initial_probs.clone();
    }

    let mut new_transition = Array2::zeros((n, n));
    for i in 0..n {
        let row_sum: f64 = xi_sum.row(i).sum();
        for j in 0..n {
            new_transition[[i, j]] = if row_sum > LOG_EPS {
                xi_sum[[i, j]] / row_sum
            } else {
                // State never left; keep the row uniform
                1.0 / n as f64
            };
        }
    }

    EmStep {
        initial_probs: new_initial,
        transition_matrix: new_transition,
        gamma: fb.gamma,
        log_likelihood: fb.log_likelihood,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{arr2, array};

    fn create_test_hmm() -> (Array1<f64>, Array2<f64>, Vec<MultivariateGaussian>) {
        let initial = array![0.6, 0.4];
        let transition = arr2(&[[0.7, 0.3], [0.4, 0.6]]);

        let emissions = vec![
            MultivariateGaussian::with_identity(array![0.0]),
            MultivariateGaussian::with_identity(array![3.0]),
        ];

        (initial, transition, emissions)
    }

    #[test]
    fn test_viterbi() {
        let (initial, transition, emissions) = create_test_hmm();
        let obs = arr2(&[[0.1], [0.2], [2.8], [3.1]]);
        let log_b = log_emission_matrix(&obs, &emissions);

        let (path, log_prob) = viterbi(&log_b, &initial, &transition);

        assert_eq!(path, vec![0, 0, 1, 1]);
        assert!(log_prob.is_finite());
    }

    #[test]
    fn test_forward_backward() {
        let (initial, transition, emissions) = create_test_hmm();
        let obs = arr2(&[[0.1], [0.2], [2.8], [3.1]]);
        let log_b = log_emission_matrix(&obs, &emissions);

        let fb = forward_backward(&log_b, &initial, &transition);

        assert_eq!(fb.alpha.nrows(), 4);
        for t in 0..4 {
            assert!((fb.gamma.row(t).sum() - 1.0).abs() < 1e-9);
        }
        assert!(fb.gamma[[0, 0]] > 0.9);
        assert!(fb.gamma[[3, 1]] > 0.9);
        assert!(fb.log_likelihood.is_finite());
    }

    #[test]
    fn test_log_likelihood_matches_brute_force() {
        let (initial, transition, emissions) = create_test_hmm();
        let obs = arr2(&[[0.5], [2.0]]);
        let log_b = log_emission_matrix(&obs, &emissions);

        let mut total = 0.0;
        for s0 in 0..2 {
            for s1 in 0..2 {
                total += initial[s0]
                    * log_b[[0, s0]].exp()
                    * transition[[s0, s1]]
                    * log_b[[1, s1]].exp();
            }
        }

        let fb = forward_backward(&log_b, &initial, &transition);
        assert!((fb.log_likelihood - total.ln()).abs() < 1e-10);
    }

    #[test]
    fn test_far_outlier_does_not_underflow() {
        let (initial, transition, emissions) = create_test_hmm();
        let obs = arr2(&[[0.0], [60.0], [3.0]]);
        let log_b = log_emission_matrix(&obs, &emissions);

        let fb = forward_backward(&log_b, &initial, &transition);
        assert!(fb.log_likelihood.is_finite());
        assert!((fb.gamma.row(1).sum() - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_baum_welch_step_is_stochastic_and_improves() {
        let (initial, transition, emissions) = create_test_hmm();
        let obs = arr2(&[[0.1], [0.2], [0.0], [2.8], [3.1], [2.9], [0.1], [3.0]]);

        let step = baum_welch_step(&obs, &initial, &transition, &emissions);
        for i in 0..2 {
            assert!((step.transition_matrix.row(i).sum() - 1.0).abs() < 1e-9);
        }
        assert!((step.initial_probs.sum() - 1.0).abs() < 1e-9);

        let next = baum_welch_step(&obs, &step.initial_probs, &step.transition_matrix, &emissions);
        assert!(next.log_likelihood >= step.log_likelihood - 1e-9);
    }
}
