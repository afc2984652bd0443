use nalgebra::{Matrix3, Point2, Vector3};
use serde::{Deserialize, Serialize};

/// Affine pixel -> geo transform of a geo-referenced raster.
///
/// Stored as a homogeneous 3x3 matrix whose last row is `[0, 0, 1]`:
///
/// ```text
/// geo_x = c0 + col * c1 + row * c2
/// geo_y = c3 + col * c4 + row * c5
/// ```
///
/// `(c0..c5)` is the usual six-coefficient geotransform layout.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct GeoTransform {
    pub m: Matrix3<f64>,
}

impl GeoTransform {
    pub fn new(m: Matrix3<f64>) -> Self {
        Self { m }
    }

    pub fn identity() -> Self {
        Self::new(Matrix3::identity())
    }

    /// Build from six geotransform coefficients `(c0, c1, c2, c3, c4, c5)`.
    pub fn from_coefficients(c: [f64; 6]) -> Self {
        Self::new(Matrix3::new(
            c[1], c[2], c[0], //
            c[4], c[5], c[3], //
            0.0, 0.0, 1.0,
        ))
    }

    pub fn to_coefficients(&self) -> [f64; 6] {
        [
            self.m[(0, 2)],
            self.m[(0, 0)],
            self.m[(0, 1)],
            self.m[(1, 2)],
            self.m[(1, 0)],
            self.m[(1, 1)],
        ]
    }

    /// Build from a GeoTIFF pixel scale `(sx, sy, _)` and one tie point
    /// `(i, j, _, x, y, _)`: raster pixel `(i, j)` sits at model `(x, y)`,
    /// rows grow southwards.
    pub fn from_scale_and_tiepoint(scale: &[f64], tiepoint: &[f64]) -> Option<Self> {
        if scale.len() < 2 || tiepoint.len() < 6 {
            return None;
        }
        let (sx, sy) = (scale[0], scale[1]);
        let (i, j, x, y) = (tiepoint[0], tiepoint[1], tiepoint[3], tiepoint[4]);
        Some(Self::from_coefficients([
            x - i * sx,
            sx,
            0.0,
            y + j * sy,
            0.0,
            -sy,
        ]))
    }

    /// Build from a row-major 4x4 GeoTIFF model transformation.
    pub fn from_model_transformation(m: &[f64]) -> Option<Self> {
        if m.len() < 16 {
            return None;
        }
        Some(Self::new(Matrix3::new(
            m[0], m[1], m[3], //
            m[4], m[5], m[7], //
            0.0, 0.0, 1.0,
        )))
    }

    #[inline]
    pub fn apply(&self, p: Point2<f64>) -> Point2<f64> {
        let v = self.m * Vector3::new(p.x, p.y, 1.0);
        Point2::new(v[0], v[1])
    }

    /// Transform of the sub-window whose top-left pixel is `(x0, y0)`.
    ///
    /// `window(x0, y0).apply((0, 0)) == apply((x0, y0))`.
    pub fn window(&self, x0: u32, y0: u32) -> Self {
        let shift = Matrix3::new(
            1.0, 0.0, x0 as f64, //
            0.0, 1.0, y0 as f64, //
            0.0, 0.0, 1.0,
        );
        Self::new(self.m * shift)
    }

    pub fn inverse(&self) -> Option<Self> {
        self.m.try_inverse().map(Self::new)
    }
}
