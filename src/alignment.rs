//! Per-image alignment drawn from a similarity matrix.
//!
//! A similarity matrix is a 5-image stack. Every plane has one column per
//! candidate orientation (x) and one row per particle (y). Plane 0 holds the
//! alignment score, lower is better; planes 1 to 4 hold `tx`, `ty`, `alpha`
//! and the mirror flag of that candidate.

use crate::error::{MsaError, Result};
use crate::image::store::ImageStore;
use crate::image::transform::Transform2D;
use crate::image::Image;
use std::path::Path;
use tracing::debug;

const PLANES: usize = 5;

/// Starting score for the best-candidate scan; only scores below it can win.
const WORST_SCORE: f64 = 1.0e23;

#[derive(Clone, Debug)]
pub struct SimilarityMatrix {
    planes: Vec<Image>,
}

impl SimilarityMatrix {
    pub fn load<S: ImageStore>(store: &S, path: &Path) -> Result<Self> {
        let count = store.count(path)?;
        if count < PLANES {
            return Err(MsaError::InvalidSimilarityMatrix(format!(
                "{} holds {} images, expected {}",
                path.display(),
                count,
                PLANES
            )));
        }
        let planes = (0..PLANES)
            .map(|i| store.read(path, i))
            .collect::<Result<Vec<_>>>()?;
        Self::from_planes(planes)
    }

    pub fn from_planes(planes: Vec<Image>) -> Result<Self> {
        if planes.len() != PLANES {
            return Err(MsaError::InvalidSimilarityMatrix(format!(
                "expected {} planes, got {}",
                PLANES,
                planes.len()
            )));
        }
        let geometry = planes[0].geometry();
        if geometry.2 != 1 {
            return Err(MsaError::InvalidSimilarityMatrix(
                "planes must be 2D".to_string(),
            ));
        }
        if let Some(plane) = planes.iter().find(|p| p.geometry() != geometry) {
            return Err(MsaError::InvalidSimilarityMatrix(format!(
                "plane geometry {:?} differs from {:?}",
                plane.geometry(),
                geometry
            )));
        }
        debug!(
            candidates = geometry.0,
            images = geometry.1,
            "similarity matrix loaded"
        );
        Ok(Self { planes })
    }

    pub fn candidates(&self) -> usize {
        self.planes[0].nx()
    }

    pub fn images(&self) -> usize {
        self.planes[0].ny()
    }

    /// Source-to-reference transform for `image_index`.
    ///
    /// Picks the candidate with the lowest score (first one on ties), builds
    /// its reference-to-source transform and returns the inverse.
    pub fn best_transform(&self, image_index: usize) -> Result<Transform2D> {
        if image_index >= self.images() {
            return Err(MsaError::InvalidSimilarityMatrix(format!(
                "no column for image {} ({} images)",
                image_index,
                self.images()
            )));
        }

        let mut best = (WORST_SCORE, 0.0, 0.0, 0.0, 0.0);
        for j in 0..self.candidates() {
            let score = self.planes[0].get(j, image_index, 0) as f64;
            if score < best.0 {
                best = (
                    score,
                    self.planes[1].get(j, image_index, 0) as f64,
                    self.planes[2].get(j, image_index, 0) as f64,
                    self.planes[3].get(j, image_index, 0) as f64,
                    self.planes[4].get(j, image_index, 0) as f64,
                );
            }
        }

        let (_, tx, ty, alpha, mirror) = best;
        Ok(Transform2D::from_params(alpha, tx, ty, mirror as i64 != 0).inverse())
    }
}
