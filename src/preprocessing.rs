use crate::error::{MsaError, Result};
use crate::{Matrix, Vector};
use ndarray::Axis;

/// Optionally scales every row to unit length, then subtracts the row mean
/// from each row in place. Returns the subtracted mean.
///
/// Rows with zero norm are left as they are.
pub fn center_and_normalize(data: &mut Matrix, normalize: bool) -> Result<Vector> {
    if data.nrows() == 0 || data.ncols() == 0 {
        return Err(MsaError::DecompositionFailed(
            "Input matrix must have at least one sample and one feature".to_string(),
        ));
    }

    if normalize {
        for mut row in data.axis_iter_mut(Axis(0)) {
            let norm = row.dot(&row).sqrt();
            if norm > 0.0 {
                row /= norm;
            }
        }
    }

    let mean = data
        .mean_axis(Axis(0))
        .ok_or_else(|| MsaError::DecompositionFailed("Failed to compute mean".to_string()))?;
    for mut row in data.axis_iter_mut(Axis(0)) {
        row -= &mean;
    }
    Ok(mean)
}

/// Additive offset that makes `data` usable by solvers that need
/// non-negative input: `max(-min + 0.1 σ, 4 σ - mean)`.
pub fn positivity_shift(data: &Matrix) -> f64 {
    if data.is_empty() {
        return 0.0;
    }
    let min = data.iter().copied().fold(f64::INFINITY, f64::min);
    let mean = data.mean().unwrap_or(0.0);
    let std = data.std(0.0);
    (-min + std * 0.1).max(std * 4.0 - mean)
}
