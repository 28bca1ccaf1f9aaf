use crate::error::{MsaError, Result};
use crate::{Matrix, Vector};
use ndarray::{Axis, Zip};
use ndarray_rand::rand_distr::Gamma;
use ndarray_rand::RandomExt;
use rand::rngs::StdRng;
use rand::SeedableRng;
use tracing::debug;

/// Latent Dirichlet allocation fitted with batch variational Bayes.
///
/// Rows are treated as documents and columns as word counts, so every
/// input value must be non-negative.
#[derive(Clone, Debug)]
pub struct LatentDirichlet {
    /// Variational topic-word parameters, one row per topic.
    pub components: Option<Matrix>,
    pub n_iter: Option<usize>,
    exp_dirichlet_component: Option<Matrix>,
    n_components: usize,
    doc_topic_prior: Option<f64>,
    topic_word_prior: Option<f64>,
    max_iter: usize,
    mean_change_tol: f64,
    max_doc_update_iter: usize,
    random_state: Option<u64>,
}

impl LatentDirichlet {
    pub fn new(n_components: usize) -> Self {
        Self {
            components: None,
            n_iter: None,
            exp_dirichlet_component: None,
            n_components,
            doc_topic_prior: None,
            topic_word_prior: None,
            max_iter: 10,
            mean_change_tol: 1e-3,
            max_doc_update_iter: 100,
            random_state: None,
        }
    }

    pub fn doc_topic_prior(mut self, prior: f64) -> Self {
        self.doc_topic_prior = Some(prior);
        self
    }

    pub fn topic_word_prior(mut self, prior: f64) -> Self {
        self.topic_word_prior = Some(prior);
        self
    }

    pub fn max_iter(mut self, max_iter: usize) -> Self {
        self.max_iter = max_iter;
        self
    }

    pub fn random_state(mut self, random_state: u64) -> Self {
        self.random_state = Some(random_state);
        self
    }

    fn alpha(&self) -> f64 {
        self.doc_topic_prior
            .unwrap_or(1.0 / self.n_components as f64)
    }

    fn eta(&self) -> f64 {
        self.topic_word_prior
            .unwrap_or(1.0 / self.n_components as f64)
    }

    pub fn fit(&mut self, x: &Matrix) -> Result<()> {
        if x.nrows() == 0 || x.ncols() == 0 {
            return Err(MsaError::DecompositionFailed(
                "Input matrix must have at least one sample and one feature".to_string(),
            ));
        }
        if self.n_components == 0 {
            return Err(MsaError::DecompositionFailed(
                "n_components must be positive".to_string(),
            ));
        }
        check_non_negative(x)?;

        let mut rng = StdRng::seed_from_u64(self.random_state.unwrap_or(0));
        let init = Gamma::new(100.0, 0.01)
            .map_err(|e| MsaError::DecompositionFailed(format!("bad Gamma prior: {}", e)))?;
        let mut lambda = Matrix::random_using((self.n_components, x.ncols()), init, &mut rng);

        let eta = self.eta();
        for iteration in 0..self.max_iter {
            let exp_beta = exp_dirichlet_expectation(&lambda);
            let (_, stats) = self.e_step(x, &exp_beta, true)?;
            let stats = stats.unwrap_or_else(|| Matrix::zeros(lambda.raw_dim()));

            // M-step
            lambda = stats * &exp_beta + eta;
            if lambda.iter().any(|v| !v.is_finite()) {
                return Err(MsaError::DecompositionFailed(
                    "LatentDirichlet produced non-finite topic parameters".to_string(),
                ));
            }
            debug!(iteration, "LDA EM iteration done");
        }

        self.exp_dirichlet_component = Some(exp_dirichlet_expectation(&lambda));
        self.components = Some(lambda);
        self.n_iter = Some(self.max_iter);
        Ok(())
    }

    /// Topic proportions per row; every output row sums to one.
    pub fn transform(&self, x: &Matrix) -> Result<Matrix> {
        let exp_beta = self.exp_dirichlet_component.as_ref().ok_or_else(|| {
            MsaError::DecompositionFailed("LatentDirichlet not fitted. Call fit() first.".to_string())
        })?;
        if x.ncols() != exp_beta.ncols() {
            return Err(MsaError::DecompositionFailed(format!(
                "Number of features in X ({}) doesn't match training data ({})",
                x.ncols(),
                exp_beta.ncols()
            )));
        }
        check_non_negative(x)?;

        let (mut gamma, _) = self.e_step(x, exp_beta, false)?;
        for mut row in gamma.rows_mut() {
            let total = row.sum();
            if total > 0.0 {
                row /= total;
            }
        }
        Ok(gamma)
    }

    pub fn fit_transform(&mut self, x: &Matrix) -> Result<Matrix> {
        self.fit(x)?;
        self.transform(x)
    }

    /// Per-document variational update. Each row is inferred independently
    /// from a fixed starting point.
    fn e_step(&self, x: &Matrix, exp_beta: &Matrix, collect_stats: bool) -> Result<(Matrix, Option<Matrix>)> {
        let k = self.n_components;
        let alpha = self.alpha();
        let mut gamma = Matrix::zeros((x.nrows(), k));
        let mut stats = collect_stats.then(|| Matrix::zeros(exp_beta.raw_dim()));

        for (d, counts) in x.rows().into_iter().enumerate() {
            let mut doc_topic = Vector::ones(k);
            let mut exp_theta = exp_dirichlet_expectation_1d(&doc_topic);
            let mut norm_phi = exp_theta.dot(exp_beta) + f64::EPSILON;

            for _ in 0..self.max_doc_update_iter {
                let last = doc_topic.clone();
                let ratio = &counts / &norm_phi;
                doc_topic = &exp_theta * &exp_beta.dot(&ratio) + alpha;
                exp_theta = exp_dirichlet_expectation_1d(&doc_topic);
                norm_phi = exp_theta.dot(exp_beta) + f64::EPSILON;

                let change = (&last - &doc_topic).mapv(f64::abs).mean().unwrap_or(0.0);
                if change < self.mean_change_tol {
                    break;
                }
            }

            if doc_topic.iter().any(|v| !v.is_finite()) {
                return Err(MsaError::DecompositionFailed(format!(
                    "LatentDirichlet inference diverged on row {}",
                    d
                )));
            }
            gamma.row_mut(d).assign(&doc_topic);

            if let Some(stats) = stats.as_mut() {
                let ratio = &counts / &norm_phi;
                let outer = exp_theta
                    .view()
                    .insert_axis(Axis(1))
                    .dot(&ratio.view().insert_axis(Axis(0)));
                *stats += &outer;
            }
        }

        Ok((gamma, stats))
    }
}

fn check_non_negative(x: &Matrix) -> Result<()> {
    if x.iter().any(|&v| v < 0.0 || !v.is_finite()) {
        return Err(MsaError::DecompositionFailed(
            "LatentDirichlet needs finite, non-negative input".to_string(),
        ));
    }
    Ok(())
}

/// `exp(E[log θ])` for θ ~ Dirichlet(row), applied row by row.
fn exp_dirichlet_expectation(params: &Matrix) -> Matrix {
    let mut out = Matrix::zeros(params.raw_dim());
    Zip::from(out.rows_mut())
        .and(params.rows())
        .for_each(|mut out_row, row| {
            let psi_total = digamma(row.sum());
            Zip::from(&mut out_row)
                .and(&row)
                .for_each(|o, &v| *o = (digamma(v) - psi_total).exp());
        });
    out
}

fn exp_dirichlet_expectation_1d(params: &Vector) -> Vector {
    let psi_total = digamma(params.sum());
    params.mapv(|v| (digamma(v) - psi_total).exp())
}

/// Digamma by upward recurrence to `x >= 8` followed by the asymptotic series.
fn digamma(mut x: f64) -> f64 {
    let mut acc = 0.0;
    while x < 8.0 {
        acc -= 1.0 / x;
        x += 1.0;
    }
    let inv = 1.0 / x;
    let inv2 = inv * inv;
    acc + x.ln() - 0.5 * inv - inv2 * (1.0 / 12.0 - inv2 * (1.0 / 120.0 - inv2 * (1.0 / 252.0)))
}
