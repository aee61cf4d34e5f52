//! Multivariate Gaussian distribution for HMM emissions

use ndarray::{Array1, Array2, ArrayView1, ArrayView2};
use std::f64::consts::PI;

/// Raised when a covariance matrix is not positive definite
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NotPositiveDefinite;

/// Multivariate Gaussian distribution with a dense covariance
#[derive(Debug, Clone)]
pub struct MultivariateGaussian {
    /// Mean vector
    pub mean: Array1<f64>,
    /// Covariance matrix
    pub covariance: Array2<f64>,
    /// Lower-triangular Cholesky factor of the covariance
    cholesky: Array2<f64>,
    /// Log determinant of the covariance
    log_det: f64,
}

impl MultivariateGaussian {
    /// Create new multivariate Gaussian
    pub fn new(mean: Array1<f64>, covariance: Array2<f64>) -> Result<Self, NotPositiveDefinite> {
        let cholesky = cholesky(&covariance)?;
        let log_det = 2.0 * cholesky.diag().iter().map(|l| l.ln()).sum::<f64>();
        Ok(Self {
            mean,
            covariance,
            cholesky,
            log_det,
        })
    }

    /// Create with identity covariance
    pub fn with_identity(mean: Array1<f64>) -> Self {
        let d = mean.len();
        Self {
            mean,
            covariance: Array2::eye(d),
            cholesky: Array2::eye(d),
            log_det: 0.0,
        }
    }

    /// Dimension of the distribution
    pub fn dim(&self) -> usize {
        self.mean.len()
    }

    /// Compute log probability density at a point
    pub fn log_pdf(&self, x: ArrayView1<f64>) -> f64 {
        let d = self.dim();
        let diff = &x - &self.mean;

        // Solve L y = (x - mu); the Mahalanobis term is |y|^2
        let mut y = Array1::<f64>::zeros(d);
        for i in 0..d {
            let mut sum = diff[i];
            for k in 0..i {
                sum -= self.cholesky[[i, k]] * y[k];
            }
            y[i] = sum / self.cholesky[[i, i]];
        }
        let quad_form = y.dot(&y);

        -0.5 * (d as f64 * (2.0 * PI).ln() + self.log_det + quad_form)
    }

    /// Compute probability density at a point
    pub fn pdf(&self, x: ArrayView1<f64>) -> f64 {
        self.log_pdf(x).exp()
    }

    /// Re-estimate mean and covariance from weighted samples.
    ///
    /// `min_covar` is added to the diagonal. A state with no posterior mass
    /// keeps its previous parameters.
    pub fn update_weighted(
        &mut self,
        samples: ArrayView2<f64>,
        weights: ArrayView1<f64>,
        min_covar: f64,
    ) -> Result<(), NotPositiveDefinite> {
        let weight_sum = weights.sum();
        if weight_sum < 1e-10 {
            return Ok(());
        }

        let new_mean = weights.dot(&samples) / weight_sum;
        let new_cov = weighted_covariance(samples, weights, &new_mean, min_covar);

        *self = Self::new(new_mean, new_cov)?;
        Ok(())
    }
}

/// Weighted covariance around `mean` with `min_covar` on the diagonal
pub fn weighted_covariance(
    samples: ArrayView2<f64>,
    weights: ArrayView1<f64>,
    mean: &Array1<f64>,
    min_covar: f64,
) -> Array2<f64> {
    let d = samples.ncols();
    let weight_sum = weights.sum();
    let mut cov = Array2::zeros((d, d));

    for (row, &w) in samples.rows().into_iter().zip(weights.iter()) {
        let diff = &row - mean;
        for j in 0..d {
            for k in 0..d {
                cov[[j, k]] += w * diff[j] * diff[k];
            }
        }
    }
    if weight_sum > 0.0 {
        cov /= weight_sum;
    }

    for i in 0..d {
        cov[[i, i]] += min_covar;
    }
    cov
}

/// Cholesky factorization `A = L L^T` of a symmetric positive definite matrix
pub fn cholesky(matrix: &Array2<f64>) -> Result<Array2<f64>, NotPositiveDefinite> {
    let n = matrix.nrows();
    let mut l = Array2::<f64>::zeros((n, n));

    for i in 0..n {
        for j in 0..=i {
            let mut sum = matrix[[i, j]];
            for k in 0..j {
                sum -= l[[i, k]] * l[[j, k]];
            }

            if i == j {
                if !(sum > 0.0) || !sum.is_finite() {
                    return Err(NotPositiveDefinite);
                }
                l[[i, j]] = sum.sqrt();
            } else {
                l[[i, j]] = sum / l[[j, j]];
            }
        }
    }

    Ok(l)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{arr2, array};

    #[test]
    fn test_gaussian_creation() {
        let g = MultivariateGaussian::new(array![0.0, 0.0], Array2::eye(2)).unwrap();
        assert_eq!(g.dim(), 2);
    }

    #[test]
    fn test_pdf_at_mean() {
        let mean = array![0.0, 0.0];
        let g = MultivariateGaussian::new(mean.clone(), Array2::eye(2)).unwrap();

        let pdf_at_mean = g.pdf(mean.view());
        let pdf_away = g.pdf(array![1.0, 1.0].view());
        assert!(pdf_at_mean > pdf_away);
        assert!((pdf_at_mean - 1.0 / (2.0 * PI)).abs() < 1e-12);
    }

    #[test]
    fn test_log_pdf_uses_full_covariance() {
        // Bivariate normal with correlation 0.5; closed form at x = (1, 1)
        let cov = arr2(&[[1.0, 0.5], [0.5, 1.0]]);
        let g = MultivariateGaussian::new(array![0.0, 0.0], cov).unwrap();
        let det: f64 = 0.75;
        // inverse = [[1, -0.5], [-0.5, 1]] / 0.75, quad = (1 - 1 + 1) / 0.75
        let expected = -0.5 * (2.0 * (2.0 * PI).ln() + det.ln() + 1.0 / 0.75);
        assert!((g.log_pdf(array![1.0, 1.0].view()) - expected).abs() < 1e-12);
    }

    #[test]
    fn test_cholesky_rejects_singular() {
        let singular = arr2(&[[1.0, 1.0], [1.0, 1.0]]);
        assert!(matches!(cholesky(&singular), Err(NotPositiveDefinite)));
    }

    #[test]
    fn test_weighted_update() {
        let samples = arr2(&[[1.0, 2.0], [3.0, 4.0], [100.0, 100.0]]);
        let weights = array![1.0, 1.0, 0.0];
        let mut g = MultivariateGaussian::with_identity(array![0.0, 0.0]);
        g.update_weighted(samples.view(), weights.view(), 0.5).unwrap();

        assert!((g.mean[0] - 2.0).abs() < 1e-12);
        assert!((g.mean[1] - 3.0).abs() < 1e-12);
        assert!((g.covariance[[0, 0]] - 1.5).abs() < 1e-12);
        assert!((g.covariance[[0, 1]] - 1.0).abs() < 1e-12);
    }
}
