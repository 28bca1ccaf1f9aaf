use crate::error::{MsaError, Result};
use crate::linalg::{fix_row_signs, symmetric_eigen, truncated_svd, OVERSAMPLES};
use crate::{Matrix, Vector};
use ndarray::Axis;
use rand::rngs::StdRng;
use rand::SeedableRng;
use tracing::debug;

/// Principal component analysis.
///
/// When few components are requested relative to the data, the leading
/// singular vectors come from a seeded randomized sketch. Otherwise the
/// smaller of `XᵀX` and `XXᵀ` is eigendecomposed exactly.
#[derive(Clone, Debug)]
pub struct Pca {
    pub components: Option<Matrix>,
    pub singular_values: Option<Vector>,
    pub explained_variance: Option<Vector>,
    pub explained_variance_ratio: Option<Vector>,
    pub mean: Option<Vector>,
    n_components: Option<usize>,
    random_state: Option<u64>,
}

impl Pca {
    pub fn new() -> Self {
        Self {
            components: None,
            singular_values: None,
            explained_variance: None,
            explained_variance_ratio: None,
            mean: None,
            n_components: None,
            random_state: None,
        }
    }

    pub fn n_components(mut self, n_components: usize) -> Self {
        self.n_components = Some(n_components);
        self
    }

    pub fn random_state(mut self, random_state: u64) -> Self {
        self.random_state = Some(random_state);
        self
    }

    pub fn fit(&mut self, x: &Matrix) -> Result<()> {
        if x.nrows() < 2 || x.ncols() == 0 {
            return Err(MsaError::DecompositionFailed(
                "PCA needs at least two samples and one feature".to_string(),
            ));
        }

        let n_samples = x.nrows();
        let n_features = x.ncols();
        let max_components = n_features.min(n_samples);
        let n_components = self.n_components.unwrap_or(max_components);

        if n_components == 0 || n_components > max_components {
            return Err(MsaError::DecompositionFailed(format!(
                "n_components={} must be between 1 and min(n_samples, n_features)={}",
                n_components, max_components
            )));
        }

        let mean = x
            .mean_axis(Axis(0))
            .ok_or_else(|| MsaError::DecompositionFailed("Failed to compute mean".to_string()))?;
        let x_centered = x - &mean.view().insert_axis(Axis(0));

        let (mut components, singular_values) = if n_components + OVERSAMPLES < max_components {
            debug!(n_components, n_samples, n_features, "randomized PCA");
            let mut rng = StdRng::seed_from_u64(self.random_state.unwrap_or(0));
            let (singular_values, components) = truncated_svd(&x_centered, n_components, &mut rng)?;
            (components, singular_values)
        } else if n_samples > n_features {
            self.fit_covariance(&x_centered, n_components)?
        } else {
            self.fit_gram(&x_centered, n_components)?
        };
        fix_row_signs(&mut components);

        let total_variance = x_centered.iter().map(|v| v * v).sum::<f64>() / (n_samples - 1) as f64;

        let explained_variance = singular_values.mapv(|s| s * s / (n_samples - 1) as f64);
        let explained_variance_ratio = if total_variance > 0.0 {
            &explained_variance / total_variance
        } else {
            Vector::zeros(explained_variance.len())
        };

        self.components = Some(components);
        self.singular_values = Some(singular_values);
        self.explained_variance = Some(explained_variance);
        self.explained_variance_ratio = Some(explained_variance_ratio);
        self.mean = Some(mean);

        Ok(())
    }

    pub fn transform(&self, x: &Matrix) -> Result<Matrix> {
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

    pub fn inverse_transform(&self, x: &Matrix) -> Result<Matrix> {
        let components = self.components.as_ref().ok_or_else(not_fitted)?;
        let mean = self.mean.as_ref().ok_or_else(not_fitted)?;

        if x.ncols() != components.nrows() {
            return Err(MsaError::DecompositionFailed(format!(
                "Number of features in X ({}) doesn't match number of components ({})",
                x.ncols(),
                components.nrows()
            )));
        }

        Ok(x.dot(components) + &mean.view().insert_axis(Axis(0)))
    }

    /// Components from the eigenvectors of `XᵀX`; used when samples outnumber features.
    fn fit_covariance(&self, x_centered: &Matrix, n_components: usize) -> Result<(Matrix, Vector)> {
        let xtx = x_centered.t().dot(x_centered);
        let (eigenvalues, eigenvectors) = symmetric_eigen(&xtx)?;

        let mut components = Matrix::zeros((n_components, x_centered.ncols()));
        for i in 0..n_components {
            components.row_mut(i).assign(&eigenvectors.column(i));
        }
        let singular_values = eigenvalues
            .iter()
            .take(n_components)
            .map(|&l| l.max(0.0).sqrt())
            .collect();

        Ok((components, singular_values))
    }

    /// Components from the eigenvectors of `XXᵀ` mapped back through `Xᵀ`;
    /// used when features outnumber samples, which is the usual case for images.
    fn fit_gram(&self, x_centered: &Matrix, n_components: usize) -> Result<(Matrix, Vector)> {
        let xxt = x_centered.dot(&x_centered.t());
        let (eigenvalues, eigenvectors) = symmetric_eigen(&xxt)?;

        let mut components = Matrix::zeros((n_components, x_centered.ncols()));
        let mut singular_values = Vector::zeros(n_components);
        for i in 0..n_components {
            let s = eigenvalues[i].max(0.0).sqrt();
            singular_values[i] = s;
            if s > 1e-10 {
                let v = x_centered.t().dot(&eigenvectors.column(i)) / s;
                components.row_mut(i).assign(&v);
            }
        }

        Ok((components, singular_values))
    }
}

fn not_fitted() -> MsaError {
    MsaError::DecompositionFailed("PCA not fitted. Call fit() first.".to_string())
}

impl Default for Pca {
    fn default() -> Self {
        Self::new()
    }
}
