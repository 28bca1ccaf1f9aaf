use super::Image;

/// Rigid 2D transform with optional mirror, acting about the image centre.
///
/// Points map as `p' = R(alpha) · M · p + t`, where `M` negates x when the
/// mirror flag is set. Angles are in degrees.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Transform2D {
    matrix: [[f64; 2]; 2],
    translation: [f64; 2],
}

impl Transform2D {
    pub fn identity() -> Self {
        Self {
            matrix: [[1.0, 0.0], [0.0, 1.0]],
            translation: [0.0, 0.0],
        }
    }

    pub fn from_params(alpha: f64, tx: f64, ty: f64, mirror: bool) -> Self {
        let (s, c) = alpha.to_radians().sin_cos();
        let m = if mirror { -1.0 } else { 1.0 };
        Self {
            matrix: [[c * m, -s], [s * m, c]],
            translation: [tx, ty],
        }
    }

    pub fn inverse(&self) -> Self {
        let [[a, b], [c, d]] = self.matrix;
        let det = a * d - b * c;
        let inv = [[d / det, -b / det], [-c / det, a / det]];
        let [tx, ty] = self.translation;
        Self {
            matrix: inv,
            translation: [
                -(inv[0][0] * tx + inv[0][1] * ty),
                -(inv[1][0] * tx + inv[1][1] * ty),
            ],
        }
    }

    pub fn apply_point(&self, x: f64, y: f64) -> (f64, f64) {
        let [[a, b], [c, d]] = self.matrix;
        (
            a * x + b * y + self.translation[0],
            c * x + d * y + self.translation[1],
        )
    }

    pub fn is_identity(&self) -> bool {
        *self == Self::identity()
    }
}

impl Default for Transform2D {
    fn default() -> Self {
        Self::identity()
    }
}

impl Image {
    /// Resamples the image in place so that content at `p` moves to
    /// `xform(p)`. Bilinear interpolation, zero outside the source grid.
    /// 3D images are transformed one xy-section at a time.
    pub fn transform(&mut self, xform: &Transform2D) {
        if xform.is_identity() {
            return;
        }
        let inverse = xform.inverse();
        let (nx, ny, nz) = self.geometry();
        let cx = (nx / 2) as f64;
        let cy = (ny / 2) as f64;
        let source = self.as_slice().to_vec();

        for z in 0..nz {
            let section = &source[z * nx * ny..(z + 1) * nx * ny];
            for y in 0..ny {
                for x in 0..nx {
                    let (sx, sy) = inverse.apply_point(x as f64 - cx, y as f64 - cy);
                    let value = bilinear(section, nx, ny, sx + cx, sy + cy);
                    self.set(x, y, z, value);
                }
            }
        }
    }
}

fn bilinear(section: &[f32], nx: usize, ny: usize, x: f64, y: f64) -> f32 {
    let x0 = x.floor();
    let y0 = y.floor();
    let fx = x - x0;
    let fy = y - y0;

    let pixel = |ix: f64, iy: f64| -> f64 {
        if ix < 0.0 || iy < 0.0 || ix >= nx as f64 || iy >= ny as f64 {
            0.0
        } else {
            section[ix as usize + nx * iy as usize] as f64
        }
    };

    let value = pixel(x0, y0) * (1.0 - fx) * (1.0 - fy)
        + pixel(x0 + 1.0, y0) * fx * (1.0 - fy)
        + pixel(x0, y0 + 1.0) * (1.0 - fx) * fy
        + pixel(x0 + 1.0, y0 + 1.0) * fx * fy;
    value as f32
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn spot(nx: usize, ny: usize, x: usize, y: usize) -> Image {
        let mut image = Image::new(nx, ny, 1);
        image.set(x, y, 0, 1.0);
        image
    }

    #[test]
    fn test_inverse_composes_to_identity() {
        let xf = Transform2D::from_params(33.0, 1.5, -2.0, true);
        let inv = xf.inverse();
        let (x, y) = xf.apply_point(0.7, -1.3);
        let (bx, by) = inv.apply_point(x, y);
        assert_abs_diff_eq!(bx, 0.7, epsilon = 1e-12);
        assert_abs_diff_eq!(by, -1.3, epsilon = 1e-12);
    }

    #[test]
    fn test_identity_leaves_image_untouched() {
        let mut image = Image::from_vec(3, 2, 1, vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0]).unwrap();
        let before = image.clone();
        image.transform(&Transform2D::identity());
        assert_eq!(image, before);
        assert!(Transform2D::from_params(0.0, 0.0, 0.0, false).is_identity());
    }

    #[test]
    fn test_translation_moves_content() {
        let mut image = spot(5, 5, 2, 2);
        image.transform(&Transform2D::from_params(0.0, 1.0, 0.0, false));
        assert_abs_diff_eq!(image.get(3, 2, 0), 1.0);
        assert_abs_diff_eq!(image.get(2, 2, 0), 0.0);
    }

    #[test]
    fn test_rotation_by_quarter_turn() {
        // Centre is (2, 2); (3, 2) rotates onto (2, 3).
        let mut image = spot(4, 4, 3, 2);
        image.transform(&Transform2D::from_params(90.0, 0.0, 0.0, false));
        assert_abs_diff_eq!(image.get(2, 3, 0), 1.0, epsilon = 1e-6);
        assert_abs_diff_eq!(image.sum_for_test(), 1.0, epsilon = 1e-6);
    }

    #[test]
    fn test_mirror_flips_x_about_centre() {
        let mut image = spot(5, 5, 3, 1);
        image.transform(&Transform2D::from_params(0.0, 0.0, 0.0, true));
        assert_abs_diff_eq!(image.get(1, 1, 0), 1.0);
        assert_abs_diff_eq!(image.get(3, 1, 0), 0.0);
    }

    #[test]
    fn test_each_section_of_a_volume_is_transformed() {
        let mut volume = Image::new(5, 5, 2);
        volume.set(2, 2, 0, 1.0);
        volume.set(2, 2, 1, 2.0);
        volume.transform(&Transform2D::from_params(0.0, 0.0, 1.0, false));
        assert_abs_diff_eq!(volume.get(2, 3, 0), 1.0);
        assert_abs_diff_eq!(volume.get(2, 3, 1), 2.0);
    }

    impl Image {
        fn sum_for_test(&self) -> f64 {
            self.as_slice().iter().map(|&v| v as f64).sum()
        }
    }
}
