use crate::alignment::SimilarityMatrix;
use crate::error::Result;
use crate::image::store::ImageStore;
use crate::image::transform::Transform2D;
use crate::mask::Mask;
use crate::range::SamplingRange;
use crate::{Matrix, Vector};
use std::path::Path;
use tracing::debug;

/// Reads image `index`, applies `transform` when given, and packs it through `mask`.
pub fn vectorize<S: ImageStore>(
    store: &S,
    path: &Path,
    index: usize,
    mask: &Mask,
    transform: Option<&Transform2D>,
) -> Result<Vector> {
    let mut image = store.read(path, index)?;
    mask.check_geometry(&image)?;
    if let Some(xform) = transform {
        image.transform(xform);
    }
    mask.pack(&image)
}

/// Stacks the packed vectors of every index in `range` into a
/// `(range.count(), mask.active_count())` matrix.
///
/// When `simmx` is given, each image is first aligned with the best
/// transform for its own stack index.
pub fn vectorize_range<S: ImageStore>(
    store: &S,
    path: &Path,
    mask: &Mask,
    range: &SamplingRange,
    simmx: Option<&SimilarityMatrix>,
) -> Result<Matrix> {
    let mut data = Matrix::zeros((range.count(), mask.active_count()));
    for (row, index) in range.indices().enumerate() {
        let transform = simmx.map(|s| s.best_transform(index)).transpose()?;
        let vector = vectorize(store, path, index, mask, transform.as_ref())?;
        data.row_mut(row).assign(&vector);
    }
    debug!(range = %range, rows = data.nrows(), cols = data.ncols(), "vectorized");
    Ok(data)
}
