//! Decomposition engines behind a single tagged variant.
//!
//! - `Pca`: principal component analysis
//! - `FastIca`: independent component analysis (parallel FastICA, logcosh)
//! - `LatentDirichlet`: latent Dirichlet allocation on shifted, non-negative data
//!
//! # Examples
//!
//! ```rust
//! use stackmsa::{Decomposition, Mode};
//! use ndarray::array;
//!
//! let mut x = array![
//!     [1.0, 2.0, 3.0],
//!     [4.0, 5.0, 6.0],
//!     [7.0, 8.0, 10.0]
//! ];
//!
//! let model = Decomposition::fit(Mode::Pca, 2, &mut x, 0).unwrap();
//! let projected = model.transform(&x).unwrap();
//! assert_eq!(projected.shape(), &[3, 2]);
//! ```

mod fastica;
mod lda;
mod pca;

pub use fastica::FastIca;
pub use lda::LatentDirichlet;
pub use pca::Pca;

use crate::config::Mode;
use crate::error::{MsaError, Result};
use crate::preprocessing::positivity_shift;
use crate::{Matrix, Vector};
use tracing::{debug, info};

pub const FASTICA_MAX_ITER: usize = 500;
pub const FASTICA_TOLERANCE: f64 = 1e-3;
pub const LDA_MAX_ITER: usize = 10;

/// A fitted model for one of the supported modes.
#[derive(Clone, Debug)]
pub enum Decomposition {
    Pca(Pca),
    FastIca(FastIca),
    /// `shift` was added to every element before fitting and must be added
    /// to every chunk before `transform`.
    Lda { model: LatentDirichlet, shift: f64 },
}

impl Decomposition {
    /// Fits `n_components` components to `data` (rows are samples).
    ///
    /// For [`Mode::Lda`] the positivity shift is applied to `data` in place.
    pub fn fit(mode: Mode, n_components: usize, data: &mut Matrix, seed: u64) -> Result<Self> {
        let max_components = data.nrows().min(data.ncols());
        if n_components == 0 || n_components > max_components {
            return Err(MsaError::DecompositionFailed(format!(
                "cannot extract {} components from a {}x{} matrix",
                n_components,
                data.nrows(),
                data.ncols()
            )));
        }
        if data.iter().any(|v| !v.is_finite()) {
            return Err(MsaError::DecompositionFailed(
                "input matrix contains non-finite values".to_string(),
            ));
        }

        info!(mode = %mode, n_components, rows = data.nrows(), cols = data.ncols(), "fitting decomposition");
        let model = match mode {
            Mode::Pca => {
                let mut pca = Pca::new().n_components(n_components).random_state(seed);
                pca.fit(data)?;
                Decomposition::Pca(pca)
            }
            Mode::FastIca => {
                let mut ica = FastIca::new(n_components)
                    .max_iter(FASTICA_MAX_ITER)
                    .tolerance(FASTICA_TOLERANCE)
                    .random_state(seed);
                ica.fit(data)?;
                Decomposition::FastIca(ica)
            }
            Mode::Lda => {
                let shift = positivity_shift(data);
                debug!(shift, "shifting data to non-negative values");
                data.mapv_inplace(|v| v + shift);
                let prior = 1.0 / n_components as f64;
                let mut model = LatentDirichlet::new(n_components)
                    .doc_topic_prior(prior)
                    .topic_word_prior(prior)
                    .max_iter(LDA_MAX_ITER)
                    .random_state(seed);
                model.fit(data)?;
                Decomposition::Lda { model, shift }
            }
        };
        Ok(model)
    }

    pub fn mode(&self) -> Mode {
        match self {
            Decomposition::Pca(_) => Mode::Pca,
            Decomposition::FastIca(_) => Mode::FastIca,
            Decomposition::Lda { .. } => Mode::Lda,
        }
    }

    pub fn components(&self) -> Result<&Matrix> {
        let components = match self {
            Decomposition::Pca(pca) => pca.components.as_ref(),
            Decomposition::FastIca(ica) => ica.components.as_ref(),
            Decomposition::Lda { model, .. } => model.components.as_ref(),
        };
        components.ok_or_else(|| MsaError::DecompositionFailed("model has no components".to_string()))
    }

    pub fn n_components(&self) -> usize {
        self.components().map(|c| c.nrows()).unwrap_or(0)
    }

    pub fn singular_values(&self) -> Option<&Vector> {
        match self {
            Decomposition::Pca(pca) => pca.singular_values.as_ref(),
            _ => None,
        }
    }

    pub fn explained_variance_ratio(&self) -> Option<&Vector> {
        match self {
            Decomposition::Pca(pca) => pca.explained_variance_ratio.as_ref(),
            _ => None,
        }
    }

    pub fn shift(&self) -> f64 {
        match self {
            Decomposition::Lda { shift, .. } => *shift,
            _ => 0.0,
        }
    }

    /// Applies the fit-time preprocessing to a reprojection chunk.
    pub fn prepare_chunk(&self, chunk: &mut Matrix) {
        let shift = self.shift();
        if shift != 0.0 {
            chunk.mapv_inplace(|v| v + shift);
        }
    }

    pub fn transform(&self, x: &Matrix) -> Result<Matrix> {
        match self {
            Decomposition::Pca(pca) => pca.transform(x),
            Decomposition::FastIca(ica) => ica.transform(x),
            Decomposition::Lda { model, .. } => model.transform(x),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    fn centered() -> Matrix {
        let mut x = array![
            [2.0, -1.0, 0.5, 1.0],
            [-1.0, 0.0, 2.0, -0.5],
            [0.5, 1.5, -1.0, 0.0],
            [-1.5, -0.5, -1.5, -0.5]
        ];
        crate::preprocessing::center_and_normalize(&mut x, false).unwrap();
        x
    }

    #[test]
    fn test_pca_variant_exposes_metadata() {
        let mut x = centered();
        let model = Decomposition::fit(Mode::Pca, 2, &mut x, 0).unwrap();
        assert_eq!(model.mode(), Mode::Pca);
        assert_eq!(model.n_components(), 2);
        assert_eq!(model.singular_values().unwrap().len(), 2);
        assert!(model.explained_variance_ratio().unwrap().sum() <= 1.0 + 1e-12);
        assert_eq!(model.shift(), 0.0);
    }

    #[test]
    fn test_lda_variant_records_shift() {
        let mut x = centered();
        let before = x.clone();
        let model = Decomposition::fit(Mode::Lda, 2, &mut x, 0).unwrap();
        let shift = model.shift();
        assert!(shift > 0.0);
        assert!(x.iter().all(|&v| v >= 0.0));
        assert_abs_diff_eq!(x[[0, 0]], before[[0, 0]] + shift, epsilon = 1e-12);
        assert!(model.singular_values().is_none());

        let mut chunk = before.clone();
        model.prepare_chunk(&mut chunk);
        assert_eq!(chunk, x);
        let topics = model.transform(&chunk).unwrap();
        assert_eq!(topics.shape(), &[4, 2]);
    }

    #[test]
    fn test_lda_variant_uses_default_topic_settings() {
        let mut x = centered();
        let model = Decomposition::fit(Mode::Lda, 2, &mut x, 9).unwrap();

        let mut reference = LatentDirichlet::new(2).random_state(9);
        reference.fit(&x).unwrap();
        let Decomposition::Lda { model, .. } = model else {
            panic!("expected an LDA model");
        };
        assert_eq!(model.n_iter, Some(LDA_MAX_ITER));
        assert_eq!(model.components, reference.components);
    }

    #[test]
    fn test_prepare_chunk_is_noop_without_shift() {
        let mut x = centered();
        let model = Decomposition::fit(Mode::Pca, 1, &mut x, 0).unwrap();
        let mut chunk = x.clone();
        model.prepare_chunk(&mut chunk);
        assert_eq!(chunk, x);
    }

    #[test]
    fn test_component_count_is_validated() {
        let mut x = centered();
        assert!(matches!(
            Decomposition::fit(Mode::Pca, 5, &mut x, 0),
            Err(MsaError::DecompositionFailed(_))
        ));
        assert!(Decomposition::fit(Mode::FastIca, 0, &mut x, 0).is_err());
    }

    #[test]
    fn test_nan_input_fails() {
        let mut x = centered();
        x[[1, 1]] = f64::NAN;
        assert!(matches!(
            Decomposition::fit(Mode::Pca, 1, &mut x, 0),
            Err(MsaError::DecompositionFailed(_))
        ));
    }
}
