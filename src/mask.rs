//! Binary masks and the image ↔ vector packing they define.
//!
//! A [`Mask`] is reduced to the list of linear indices of its active voxels,
//! in raster order. Packing reads an image at exactly those indices, and
//! unpacking scatters a vector back to them, so both directions share one
//! ordering by construction.

use crate::error::{MsaError, Result};
use crate::image::store::ImageStore;
use crate::image::Image;
use crate::Vector;
use std::path::Path;
use tracing::{debug, info};

#[derive(Clone, Debug, PartialEq)]
pub struct Mask {
    geometry: (usize, usize, usize),
    active: Vec<usize>,
}

impl Mask {
    /// Builds the analysis mask.
    ///
    /// With `mask_file` the first image of that stack is used and must be
    /// strictly binary. Otherwise an all-ones mask over the geometry of the
    /// first `reference` image is used, clipped to a sphere when
    /// `radius != 0` (negative radii count inward from `ny/2 + 1`).
    pub fn build<S: ImageStore>(
        store: &S,
        mask_file: Option<&Path>,
        radius: i32,
        reference: &Path,
    ) -> Result<Self> {
        let mask = match mask_file {
            Some(path) => {
                info!(path = %path.display(), "loading mask file");
                Self::from_image(&store.read(path, 0)?)?
            }
            None => {
                let (nx, ny, nz) = store.read(reference, 0)?.geometry();
                Self::from_radius((nx, ny, nz), radius)?
            }
        };
        debug!(active = mask.active_count(), "mask ready");
        Ok(mask)
    }

    /// Validates a 1/0 image and indexes its active voxels.
    pub fn from_image(image: &Image) -> Result<Self> {
        let mean_nonzero = image
            .mean_nonzero()
            .ok_or_else(|| MsaError::InvalidMask("mask has no active pixels".to_string()))?;
        if mean_nonzero != 1.0 {
            return Err(MsaError::InvalidMask(format!(
                "maskfile must be a binary mask (1/0 only), mean of non-zero values is {}",
                mean_nonzero
            )));
        }
        if let Some(bad) = image.as_slice().iter().find(|&&v| v != 0.0 && v != 1.0) {
            return Err(MsaError::InvalidMask(format!(
                "maskfile must be a binary mask (1/0 only), found value {}",
                bad
            )));
        }

        let active = image
            .as_slice()
            .iter()
            .enumerate()
            .filter(|&(_, &v)| v != 0.0)
            .map(|(i, _)| i)
            .collect();

        Ok(Self {
            geometry: image.geometry(),
            active,
        })
    }

    /// All-ones mask, optionally clipped to a sharp sphere about the centre.
    pub fn from_radius(geometry: (usize, usize, usize), radius: i32) -> Result<Self> {
        let (nx, ny, nz) = geometry;
        let outer = if radius < 0 {
            (ny / 2) as i64 + 1 + radius as i64
        } else {
            radius as i64
        };

        let mut image = Image::ones(nx, ny, nz);
        if radius != 0 {
            if outer < 0 {
                return Err(MsaError::InvalidMask(format!(
                    "mask radius {} leaves no active pixels for a {}x{}x{} image",
                    radius, nx, ny, nz
                )));
            }
            let (cx, cy, cz) = ((nx / 2) as i64, (ny / 2) as i64, (nz / 2) as i64);
            let r2 = outer * outer;
            for z in 0..nz {
                for y in 0..ny {
                    for x in 0..nx {
                        let dx = x as i64 - cx;
                        let dy = y as i64 - cy;
                        let dz = z as i64 - cz;
                        if dx * dx + dy * dy + dz * dz > r2 {
                            image.set(x, y, z, 0.0);
                        }
                    }
                }
            }
        }
        Self::from_image(&image)
    }

    pub fn geometry(&self) -> (usize, usize, usize) {
        self.geometry
    }

    /// Number of active voxels, i.e. the length of every packed vector.
    pub fn active_count(&self) -> usize {
        self.active.len()
    }

    pub fn active_indices(&self) -> &[usize] {
        &self.active
    }

    pub fn check_geometry(&self, image: &Image) -> Result<()> {
        if image.geometry() != self.geometry {
            return Err(MsaError::GeometryMismatch {
                expected: self.geometry,
                found: image.geometry(),
            });
        }
        Ok(())
    }

    pub fn pack(&self, image: &Image) -> Result<Vector> {
        self.check_geometry(image)?;
        let data = image.as_slice();
        Ok(self.active.iter().map(|&i| data[i] as f64).collect())
    }

    /// Scatters `vector` back to image space; inactive voxels are zero.
    pub fn unpack(&self, vector: &Vector) -> Result<Image> {
        if vector.len() != self.active.len() {
            return Err(MsaError::Format(format!(
                "cannot unpack a vector of length {} through a mask with {} active pixels",
                vector.len(),
                self.active.len()
            )));
        }
        let (nx, ny, nz) = self.geometry;
        let mut image = Image::new(nx, ny, nz);
        let data = image.as_mut_slice();
        for (&i, &v) in self.active.iter().zip(vector.iter()) {
            data[i] = v as f32;
        }
        Ok(image)
    }

    /// The mask as a 1/0 image.
    pub fn to_image(&self) -> Image {
        let (nx, ny, nz) = self.geometry;
        let mut image = Image::new(nx, ny, nz);
        let data = image.as_mut_slice();
        for &i in &self.active {
            data[i] = 1.0;
        }
        image
    }
}
