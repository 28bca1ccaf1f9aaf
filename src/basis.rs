use crate::decomposition::Decomposition;
use crate::error::Result;
use crate::image::store::ImageStore;
use crate::mask::Mask;
use crate::Vector;
use std::path::Path;
use tracing::{debug, info};

/// Writes the mean image followed by one image per component to `output`.
///
/// Any existing stack at `output` is discarded first. Components keep the
/// solver's order. PCA components carry `eigval` and `explvarfrac`
/// attributes; FastICA components are divided by their standard deviation.
/// Returns the number of images written.
pub fn write_basis<S: ImageStore>(
    store: &mut S,
    output: &Path,
    mean: &Vector,
    mask: &Mask,
    model: &Decomposition,
) -> Result<usize> {
    store.discard(output)?;

    let mean_image = mask.unpack(mean)?;
    store.write(output, 0, &mean_image)?;

    let components = model.components()?;
    let singular_values = model.singular_values();
    let ratios = model.explained_variance_ratio();

    for (i, component) in components.rows().into_iter().enumerate() {
        let mut image = mask.unpack(&component.to_owned())?;
        if let (Some(s), Some(r)) = (singular_values, ratios) {
            image.set_attr("eigval", s[i]);
            image.set_attr("explvarfrac", r[i]);
        }
        if let Decomposition::FastIca(_) = model {
            let sigma = image.sigma();
            if sigma > 0.0 {
                image.mult(1.0 / sigma);
            }
        }
        store.write(output, i + 1, &image)?;
        debug!(component = i, "basis image written");
    }

    let written = components.nrows() + 1;
    info!(path = %output.display(), images = written, "basis written");
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Mode;
    use crate::image::store::MemoryStore;
    use crate::image::Image;
    use crate::preprocessing::center_and_normalize;
    use crate::Matrix;
    use approx::assert_abs_diff_eq;

    fn data(rows: usize) -> Matrix {
        Matrix::from_shape_fn((rows, 4), |(i, j)| {
            let t = i as f64;
            match j {
                0 => t.sin() * 3.0,
                1 => (t * 0.7).cos(),
                2 => t.sin() + (t * 1.3).cos(),
                _ => ((i * 7) % 5) as f64,
            }
        })
    }

    #[test]
    fn test_pca_basis_layout_and_metadata() {
        let mask = Mask::from_radius((2, 2, 1), 0).unwrap();
        let mut x = data(30);
        let mean = center_and_normalize(&mut x, false).unwrap();
        let model = Decomposition::fit(Mode::Pca, 3, &mut x, 0).unwrap();

        let mut store = MemoryStore::new();
        store.insert_stack("basis", vec![Image::new(9, 9, 1); 7]);
        let written = write_basis(&mut store, Path::new("basis"), &mean, &mask, &model).unwrap();

        assert_eq!(written, 4);
        let stack = store.stack(Path::new("basis")).unwrap();
        assert_eq!(stack.len(), 4);
        assert_eq!(stack[0].geometry(), (2, 2, 1));
        assert_abs_diff_eq!(stack[0].get(1, 0, 0) as f64, mean[1], epsilon = 1e-5);
        assert!(stack[0].attr("eigval").is_none());

        let s = model.singular_values().unwrap();
        for i in 1..4 {
            assert_abs_diff_eq!(stack[i].attr("eigval").unwrap(), s[i - 1]);
            assert!(stack[i].attr("explvarfrac").unwrap() >= 0.0);
        }
    }

    #[test]
    fn test_fastica_components_have_unit_sigma() {
        let mask = Mask::from_radius((2, 2, 1), 0).unwrap();
        let mut x = data(60);
        let mean = center_and_normalize(&mut x, false).unwrap();
        let model = Decomposition::fit(Mode::FastIca, 2, &mut x, 5).unwrap();

        let mut store = MemoryStore::new();
        write_basis(&mut store, Path::new("ica"), &mean, &mask, &model).unwrap();
        let stack = store.stack(Path::new("ica")).unwrap();
        assert_eq!(stack.len(), 3);
        for image in &stack[1..] {
            assert_abs_diff_eq!(image.sigma(), 1.0, epsilon = 1e-4);
            assert!(image.attr("eigval").is_none());
        }
    }
}
