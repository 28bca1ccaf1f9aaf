use super::pca::Pca;
use crate::error::{MsaError, Result};
use crate::linalg::sym_decorrelation;
use crate::{Matrix, Vector};
use ndarray::Axis;
use ndarray_rand::rand_distr::StandardNormal;
use ndarray_rand::RandomExt;
use rand::rngs::StdRng;
use rand::SeedableRng;
use tracing::{debug, warn};

/// Independent component analysis with the parallel (symmetric) FastICA
/// fixed-point iteration and the logcosh contrast function.
#[derive(Clone, Debug)]
pub struct FastIca {
    /// Unmixing matrix applied after whitening, `W · K`.
    pub components: Option<Matrix>,
    pub whitening: Option<Matrix>,
    pub mean: Option<Vector>,
    pub n_iter: Option<usize>,
    pub converged: Option<bool>,
    n_components: usize,
    max_iter: usize,
    tolerance: f64,
    random_state: Option<u64>,
}

impl FastIca {
    pub fn new(n_components: usize) -> Self {
        Self {
            components: None,
            whitening: None,
            mean: None,
            n_iter: None,
            converged: None,
            n_components,
            max_iter: 500,
            tolerance: 1e-3,
            random_state: None,
        }
    }

    pub fn max_iter(mut self, max_iter: usize) -> Self {
        self.max_iter = max_iter;
        self
    }

    pub fn tolerance(mut self, tolerance: f64) -> Self {
        self.tolerance = tolerance;
        self
    }

    pub fn random_state(mut self, random_state: u64) -> Self {
        self.random_state = Some(random_state);
        self
    }

    pub fn fit(&mut self, x: &Matrix) -> Result<()> {
        let n_samples = x.nrows();
        let k = self.n_components;

        // Whitening: project onto the leading principal axes and scale them to unit variance.
        let seed = self.random_state.unwrap_or(0);
        let mut pca = Pca::new().n_components(k).random_state(seed);
        pca.fit(x)?;
        let (Some(axes), Some(singular_values), Some(mean)) =
            (pca.components, pca.singular_values, pca.mean)
        else {
            return Err(MsaError::DecompositionFailed(
                "whitening produced no components".to_string(),
            ));
        };
        let s_max = singular_values.iter().copied().fold(0.0, f64::max);
        if singular_values.iter().any(|&s| s <= s_max * 1e-6) {
            return Err(MsaError::DecompositionFailed(format!(
                "data rank is lower than n_components={}, cannot whiten",
                k
            )));
        }
        let whitening = &axes / &singular_values.view().insert_axis(Axis(1));
        let x_centered = x - &mean.view().insert_axis(Axis(0));
        let x1 = whitening.dot(&x_centered.t()) * (n_samples as f64).sqrt();

        let mut rng = StdRng::seed_from_u64(seed);
        let w_init = Matrix::random_using((k, k), StandardNormal, &mut rng);
        let mut w = sym_decorrelation(&w_init)?;

        let mut converged = false;
        let mut n_iter = self.max_iter;
        for iteration in 0..self.max_iter {
            let wx = w.dot(&x1);
            let gwtx = wx.mapv(f64::tanh);
            let g_wtx = gwtx
                .mapv(|t| 1.0 - t * t)
                .mean_axis(Axis(1))
                .ok_or_else(|| MsaError::DecompositionFailed("empty sample set".to_string()))?;

            let update = gwtx.dot(&x1.t()) / n_samples as f64 - &(&w * &g_wtx.view().insert_axis(Axis(1)));
            let w1 = sym_decorrelation(&update)?;
            if w1.iter().any(|v| !v.is_finite()) {
                return Err(MsaError::DecompositionFailed(
                    "FastICA produced non-finite values".to_string(),
                ));
            }

            let lim = (&w1 * &w)
                .sum_axis(Axis(1))
                .iter()
                .map(|d| (d.abs() - 1.0).abs())
                .fold(0.0, f64::max);
            w = w1;

            if lim < self.tolerance {
                converged = true;
                n_iter = iteration + 1;
                break;
            }
        }

        if converged {
            debug!(n_iter, "FastICA converged");
        } else {
            warn!(
                max_iter = self.max_iter,
                tolerance = self.tolerance,
                "FastICA did not converge, consider increasing tolerance or the maximum number of iterations"
            );
        }

        self.components = Some(w.dot(&whitening));
        self.whitening = Some(whitening);
        self.mean = Some(mean);
        self.n_iter = Some(n_iter);
        self.converged = Some(converged);
        Ok(())
    }

    pub fn transform(&self, x: &Matrix) -> Result<Matrix> {
        let not_fitted =
            || MsaError::DecompositionFailed("FastICA not fitted. Call fit() first.".to_string());
        let components = self.components.as_ref().ok_or_else(not_fitted)?;
        let mean = self.mean.as_ref().ok_or_else(not_fitted)?;

        if x.ncols() != mean.len() {
            return Err(MsaError::DecompositionFailed(format!(
                "Number of features in X ({}) doesn't match training data ({})",
                x.ncols(),
                mean.len()
            )));
        }

        let x_centered = x - &mean.view().insert_axis(Axis(0));
        Ok(x_centered.dot(&components.t()))
    }

    pub fn fit_transform(&mut self, x: &Matrix) -> Result<Matrix> {
        self.fit(x)?;
        self.transform(x)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    /// Two independent non-Gaussian sources mixed into three channels.
    fn mixed_signals(n: usize) -> (Matrix, Matrix) {
        let sources = Matrix::from_shape_fn((n, 2), |(i, j)| {
            let t = i as f64 * 0.1;
            if j == 0 {
                (2.0 * t).sin()
            } else if (t * 0.7).fract() < 0.5 {
                1.0
            } else {
                -1.0
            }
        });
        let mixing = ndarray::array![[1.0, 0.5, 0.2], [0.4, 1.0, 0.8]];
        (sources.dot(&mixing), sources)
    }

    fn abs_correlation(a: ndarray::ArrayView1<f64>, b: ndarray::ArrayView1<f64>) -> f64 {
        let a = &a - a.mean().unwrap();
        let b = &b - b.mean().unwrap();
        (a.dot(&b) / (a.dot(&a).sqrt() * b.dot(&b).sqrt())).abs()
    }

    #[test]
    fn test_fastica_recovers_sources() {
        let (x, sources) = mixed_signals(400);
        let mut ica = FastIca::new(2).random_state(7);
        let recovered = ica.fit_transform(&x).unwrap();
        assert_eq!(recovered.shape(), &[400, 2]);
        assert_eq!(ica.converged, Some(true));

        for s in 0..2 {
            let best = (0..2)
                .map(|r| abs_correlation(sources.column(s), recovered.column(r)))
                .fold(0.0, f64::max);
            assert!(best > 0.95, "source {} best correlation {}", s, best);
        }
    }

    #[test]
    fn test_fastica_sources_are_orthonormal() {
        // Sources come out with unit norm, not unit variance.
        let (x, _) = mixed_signals(300);
        let mut ica = FastIca::new(2).random_state(1);
        let s = ica.fit_transform(&x).unwrap();
        let gram = s.t().dot(&s);
        assert_abs_diff_eq!(gram[[0, 0]], 1.0, epsilon = 1e-6);
        assert_abs_diff_eq!(gram[[1, 1]], 1.0, epsilon = 1e-6);
        assert_abs_diff_eq!(gram[[0, 1]], 0.0, epsilon = 1e-6);
    }

    #[test]
    fn test_fastica_is_reproducible_with_seed() {
        let (x, _) = mixed_signals(200);
        let mut a = FastIca::new(2).random_state(3);
        let mut b = FastIca::new(2).random_state(3);
        a.fit(&x).unwrap();
        b.fit(&x).unwrap();
        assert_eq!(a.components, b.components);
    }

    #[test]
    fn test_fastica_reports_iteration_cap() {
        let (x, _) = mixed_signals(200);
        let mut ica = FastIca::new(2).random_state(7).max_iter(1).tolerance(1e-15);
        ica.fit(&x).unwrap();
        assert_eq!(ica.converged, Some(false));
        assert_eq!(ica.n_iter, Some(1));
        assert!(ica.components.is_some());
    }

    #[test]
    fn test_fastica_rank_deficient_input_fails() {
        let x = Matrix::from_shape_fn((20, 3), |(i, j)| (i as f64) * (j as f64 + 1.0));
        let mut ica = FastIca::new(2);
        assert!(matches!(ica.fit(&x), Err(MsaError::DecompositionFailed(_))));
    }

    #[test]
    fn test_fastica_transform_without_fit() {
        let ica = FastIca::new(1);
        assert!(ica.transform(&Matrix::zeros((2, 2))).is_err());
    }
}
