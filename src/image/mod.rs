//! Images, geometric transforms and image stacks.
//!
//! An [`Image`] is a dense `nx × ny × nz` grid of `f32` values stored in
//! raster order (x fastest, then y, then z) together with a small map of
//! numeric metadata. Stacks of images live behind the [`store::ImageStore`]
//! trait.

use crate::error::{MsaError, Result};
use crate::Matrix;
use std::collections::BTreeMap;

pub mod store;
pub mod transform;

#[derive(Clone, Debug, PartialEq)]
pub struct Image {
    nx: usize,
    ny: usize,
    nz: usize,
    data: Vec<f32>,
    attrs: BTreeMap<String, f64>,
}

impl Image {
    pub fn new(nx: usize, ny: usize, nz: usize) -> Self {
        Self {
            nx,
            ny,
            nz,
            data: vec![0.0; nx * ny * nz],
            attrs: BTreeMap::new(),
        }
    }

    pub fn ones(nx: usize, ny: usize, nz: usize) -> Self {
        let mut image = Self::new(nx, ny, nz);
        image.data.fill(1.0);
        image
    }

    pub fn from_vec(nx: usize, ny: usize, nz: usize, data: Vec<f32>) -> Result<Self> {
        if data.len() != nx * ny * nz {
            return Err(MsaError::Format(format!(
                "{}x{}x{} image needs {} values, got {}",
                nx,
                ny,
                nz,
                nx * ny * nz,
                data.len()
            )));
        }
        Ok(Self {
            nx,
            ny,
            nz,
            data,
            attrs: BTreeMap::new(),
        })
    }

    /// Builds a 2D image with one image row per matrix row.
    pub fn from_matrix(matrix: &Matrix) -> Self {
        let data = matrix.iter().map(|&v| v as f32).collect();
        Self {
            nx: matrix.ncols(),
            ny: matrix.nrows(),
            nz: 1,
            data,
            attrs: BTreeMap::new(),
        }
    }

    /// Inverse of [`Image::from_matrix`]; 3D images are flattened section by section.
    pub fn to_matrix(&self) -> Result<Matrix> {
        let values = self.data.iter().map(|&v| v as f64).collect();
        Ok(Matrix::from_shape_vec((self.ny * self.nz, self.nx), values)?)
    }

    pub fn nx(&self) -> usize {
        self.nx
    }

    pub fn ny(&self) -> usize {
        self.ny
    }

    pub fn nz(&self) -> usize {
        self.nz
    }

    pub fn geometry(&self) -> (usize, usize, usize) {
        (self.nx, self.ny, self.nz)
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.data
    }

    pub fn as_mut_slice(&mut self) -> &mut [f32] {
        &mut self.data
    }

    #[inline]
    pub fn index(&self, x: usize, y: usize, z: usize) -> usize {
        x + self.nx * (y + self.ny * z)
    }

    pub fn get(&self, x: usize, y: usize, z: usize) -> f32 {
        self.data[self.index(x, y, z)]
    }

    pub fn set(&mut self, x: usize, y: usize, z: usize, value: f32) {
        let i = self.index(x, y, z);
        self.data[i] = value;
    }

    pub fn mean(&self) -> f64 {
        if self.data.is_empty() {
            return 0.0;
        }
        self.data.iter().map(|&v| v as f64).sum::<f64>() / self.data.len() as f64
    }

    /// Mean over non-zero voxels, `None` when every voxel is zero.
    pub fn mean_nonzero(&self) -> Option<f64> {
        let (sum, count) = self
            .data
            .iter()
            .filter(|&&v| v != 0.0)
            .fold((0.0, 0usize), |(s, n), &v| (s + v as f64, n + 1));
        if count == 0 {
            None
        } else {
            Some(sum / count as f64)
        }
    }

    pub fn square_sum(&self) -> f64 {
        self.data.iter().map(|&v| (v as f64) * (v as f64)).sum()
    }

    /// Population standard deviation over all voxels.
    pub fn sigma(&self) -> f64 {
        if self.data.is_empty() {
            return 0.0;
        }
        let mean = self.mean();
        let var = self
            .data
            .iter()
            .map(|&v| {
                let d = v as f64 - mean;
                d * d
            })
            .sum::<f64>()
            / self.data.len() as f64;
        var.sqrt()
    }

    pub fn mult(&mut self, factor: f64) {
        for v in self.data.iter_mut() {
            *v = (*v as f64 * factor) as f32;
        }
    }

    /// Copies `block` into this image with its origin at `offset`; voxels
    /// falling outside this image are dropped.
    pub fn insert_clip(&mut self, block: &Image, offset: (usize, usize, usize)) {
        let (x0, y0, z0) = offset;
        if x0 >= self.nx || y0 >= self.ny || z0 >= self.nz {
            return;
        }
        let wx = block.nx.min(self.nx - x0);
        let wy = block.ny.min(self.ny - y0);
        let wz = block.nz.min(self.nz - z0);
        for z in 0..wz {
            for y in 0..wy {
                let src = block.index(0, y, z);
                let dst = self.index(x0, y0 + y, z0 + z);
                self.data[dst..dst + wx].copy_from_slice(&block.data[src..src + wx]);
            }
        }
    }

    pub fn attr(&self, key: &str) -> Option<f64> {
        self.attrs.get(key).copied()
    }

    pub fn set_attr(&mut self, key: &str, value: f64) {
        self.attrs.insert(key.to_string(), value);
    }

    pub fn attrs(&self) -> &BTreeMap<String, f64> {
        &self.attrs
    }

    pub(crate) fn set_attrs(&mut self, attrs: BTreeMap<String, f64>) {
        self.attrs = attrs;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    #[test]
    fn test_image_statistics() {
        let image = Image::from_vec(2, 2, 1, vec![0.0, 1.0, 1.0, 2.0]).unwrap();
        assert_abs_diff_eq!(image.mean(), 1.0);
        assert_abs_diff_eq!(image.mean_nonzero().unwrap(), 4.0 / 3.0, epsilon = 1e-12);
        assert_abs_diff_eq!(image.square_sum(), 6.0);
        assert_abs_diff_eq!(image.sigma(), (0.5f64).sqrt(), epsilon = 1e-12);
    }

    #[test]
    fn test_mean_nonzero_of_blank_image() {
        assert!(Image::new(3, 3, 1).mean_nonzero().is_none());
    }

    #[test]
    fn test_from_vec_rejects_wrong_length() {
        assert!(Image::from_vec(2, 2, 2, vec![0.0; 7]).is_err());
    }

    #[test]
    fn test_matrix_round_trip_layout() {
        let m = array![[1.0, 2.0, 3.0], [4.0, 5.0, 6.0]];
        let image = Image::from_matrix(&m);
        assert_eq!(image.geometry(), (3, 2, 1));
        assert_eq!(image.get(2, 0, 0), 3.0);
        assert_eq!(image.get(0, 1, 0), 4.0);
        assert_eq!(image.to_matrix().unwrap(), m);
    }

    #[test]
    fn test_insert_clip_at_row_offset() {
        let mut out = Image::new(2, 5, 1);
        let block = Image::from_matrix(&array![[1.0, 2.0], [3.0, 4.0]]);
        out.insert_clip(&block, (0, 2, 0));
        assert_eq!(
            out.as_slice(),
            &[0.0, 0.0, 0.0, 0.0, 1.0, 2.0, 3.0, 4.0, 0.0, 0.0]
        );

        // Overhanging rows are clipped.
        out.insert_clip(&block, (0, 4, 0));
        assert_eq!(&out.as_slice()[8..], &[1.0, 2.0]);
    }

    #[test]
    fn test_mult_and_attrs() {
        let mut image = Image::ones(2, 1, 1);
        image.mult(0.5);
        assert_eq!(image.as_slice(), &[0.5, 0.5]);
        image.set_attr("eigval", 3.0);
        assert_eq!(image.attr("eigval"), Some(3.0));
        assert_eq!(image.attr("missing"), None);
    }
}
