//! Perspective (homography) solving for quad-to-quad warps
//!
//! A [`Homography`] maps content coordinates onto stage coordinates. The
//! renderer consumes a 4x4 [`RenderTransform`], which is the homography lifted
//! into 3D with the z axis left untouched.

use nalgebra::{Matrix3, Matrix4, Vector3};
use std::fmt;
use thiserror::Error;

use crate::geometry::{Point, Quad};

/// Pivots (and homogeneous w values) below this are treated as zero
const EPSILON: f64 = 1e-10;

/// Relative tolerance for the collinearity test on quad corners
const COLLINEAR_TOLERANCE: f64 = 1e-9;

/// Which side of a correspondence a quad is on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuadRole {
    Source,
    Destination,
}

impl fmt::Display for QuadRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QuadRole::Source => f.write_str("source"),
            QuadRole::Destination => f.write_str("destination"),
        }
    }
}

/// The four correspondences do not determine a unique homography
#[derive(Debug, Clone, Copy, PartialEq, Error)]
pub enum DegenerateQuadError {
    #[error("{quad} quad has non-finite coordinates")]
    NonFinite { quad: QuadRole },
    #[error("{quad} quad corners {corners:?} are collinear")]
    Collinear { quad: QuadRole, corners: [usize; 3] },
    #[error("point correspondences produce a singular system")]
    Singular,
}

/// A stage point cannot be mapped back into content coordinates
#[derive(Debug, Clone, Copy, PartialEq, Error)]
#[error("cannot map ({x:.1}, {y:.1}) back through the current transform")]
pub struct PointTransformError {
    pub x: f64,
    pub y: f64,
}

/// 3x3 planar homography, row-major, normalized so the last entry is 1
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Homography {
    matrix: [f64; 9],
}

impl Homography {
    pub const IDENTITY: Homography = Homography {
        matrix: [1.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0],
    };

    /// Compute the homography taking each `src` corner to the matching `dst` corner
    /// using the Direct Linear Transform (DLT)
    pub fn solve(src: &Quad, dst: &Quad) -> Result<Self, DegenerateQuadError> {
        check_quad(src, QuadRole::Source)?;
        check_quad(dst, QuadRole::Destination)?;

        // For each correspondence (x,y) -> (x',y') with h9 fixed to 1:
        // x*h1 + y*h2 + h3 - x'*x*h7 - x'*y*h8 = x'
        // x*h4 + y*h5 + h6 - y'*x*h7 - y'*y*h8 = y'
        let mut a = [[0.0f64; 8]; 8];
        let mut b = [0.0f64; 8];

        for i in 0..4 {
            let Point { x, y } = src.corner(i);
            let Point { x: xp, y: yp } = dst.corner(i);

            let row1 = i * 2;
            let row2 = i * 2 + 1;

            a[row1] = [x, y, 1.0, 0.0, 0.0, 0.0, -xp * x, -xp * y];
            b[row1] = xp;

            a[row2] = [0.0, 0.0, 0.0, x, y, 1.0, -yp * x, -yp * y];
            b[row2] = yp;
        }

        let h = solve_linear_system(&mut a, &mut b).ok_or(DegenerateQuadError::Singular)?;
        let matrix = [h[0], h[1], h[2], h[3], h[4], h[5], h[6], h[7], 1.0];

        if matrix.iter().all(|v| v.is_finite()) {
            Ok(Self { matrix })
        } else {
            Err(DegenerateQuadError::Singular)
        }
    }

    /// Row-major coefficients
    pub fn matrix(&self) -> &[f64; 9] {
        &self.matrix
    }
}

#[cfg(test)]
impl Homography {
    /// Map a point through the homography, `None` if it lands at infinity
    pub fn transform_point(&self, p: Point) -> Option<Point> {
        apply_homography(&self.matrix, p)
    }

    /// Homography applying `other` first, then `self`
    pub fn then_after(&self, other: &Homography) -> Homography {
        let product = self.to_matrix3() * other.to_matrix3();
        Homography::from_matrix3(&product)
    }

    fn to_matrix3(&self) -> Matrix3<f64> {
        Matrix3::from_row_slice(&self.matrix)
    }

    fn from_matrix3(m: &Matrix3<f64>) -> Self {
        Self {
            matrix: [
                m[(0, 0)], m[(0, 1)], m[(0, 2)],
                m[(1, 0)], m[(1, 1)], m[(1, 2)],
                m[(2, 0)], m[(2, 1)], m[(2, 2)],
            ],
        }
    }
}

/// 4x4 transform in the renderer's convention, acting on column vectors `(x, y, z, w)`
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RenderTransform {
    matrix: Matrix4<f64>,
}

impl Default for RenderTransform {
    fn default() -> Self {
        Self::lift(&Homography::IDENTITY)
    }
}

impl From<Matrix4<f64>> for RenderTransform {
    fn from(matrix: Matrix4<f64>) -> Self {
        Self { matrix }
    }
}

impl RenderTransform {
    /// Embed a planar homography in 3D.
    ///
    /// The linear part and translation land in the x/y rows, z is identity and
    /// the projective row carries the homography's third row, so the usual
    /// homogeneous divide reproduces the 2D mapping on the z = 0 plane.
    pub fn lift(h: &Homography) -> Self {
        let [a, b, c, d, e, f, g, hh, i] = *h.matrix();
        Self {
            matrix: Matrix4::new(
                a, b, 0.0, c,
                d, e, 0.0, f,
                0.0, 0.0, 1.0, 0.0,
                g, hh, 0.0, i,
            ),
        }
    }

    /// The 16 entries in column-major order (the order CSS `matrix3d` expects)
    pub fn to_column_major(&self) -> [f64; 16] {
        let mut out = [0.0; 16];
        out.copy_from_slice(self.matrix.as_slice());
        out
    }

    /// Map a content point (on z = 0) to stage coordinates
    #[cfg(test)]
    pub fn transform_point(&self, p: Point) -> Option<Point> {
        let v = self.matrix * nalgebra::Vector4::new(p.x, p.y, 0.0, 1.0);
        if !v.w.is_finite() || v.w.abs() < EPSILON {
            return None;
        }
        let mapped = Point::new(v.x / v.w, v.y / v.w);
        mapped.is_finite().then_some(mapped)
    }

    /// Map a stage point back onto the content's z = 0 plane
    pub fn unproject_point(&self, p: Point) -> Result<Point, PointTransformError> {
        let err = PointTransformError { x: p.x, y: p.y };
        let m = &self.matrix;
        let planar = Matrix3::new(
            m[(0, 0)], m[(0, 1)], m[(0, 3)],
            m[(1, 0)], m[(1, 1)], m[(1, 3)],
            m[(3, 0)], m[(3, 1)], m[(3, 3)],
        );
        let inverse = planar.try_inverse().ok_or(err)?;
        let v = inverse * Vector3::new(p.x, p.y, 1.0);
        if !v.z.is_finite() || v.z.abs() < EPSILON {
            return Err(err);
        }
        let mapped = Point::new(v.x / v.z, v.y / v.z);
        if mapped.is_finite() {
            Ok(mapped)
        } else {
            Err(err)
        }
    }
}

/// Reject quads where any three corners are collinear (or coincide)
fn check_quad(quad: &Quad, role: QuadRole) -> Result<(), DegenerateQuadError> {
    if !quad.is_finite() {
        return Err(DegenerateQuadError::NonFinite { quad: role });
    }

    const TRIPLES: [[usize; 3]; 4] = [[0, 1, 2], [0, 1, 3], [0, 2, 3], [1, 2, 3]];
    for corners in TRIPLES {
        let [a, b, c] = corners.map(|i| quad.corner(i));
        let (abx, aby) = (b.x - a.x, b.y - a.y);
        let (acx, acy) = (c.x - a.x, c.y - a.y);
        let cross = abx * acy - aby * acx;
        let scale = abx.hypot(aby) * acx.hypot(acy);
        if cross.abs() <= COLLINEAR_TOLERANCE * scale {
            return Err(DegenerateQuadError::Collinear { quad: role, corners });
        }
    }

    Ok(())
}

/// Solve an 8x8 linear system using Gaussian elimination with partial pivoting.
/// Returns `None` for a singular system.
fn solve_linear_system(a: &mut [[f64; 8]; 8], b: &mut [f64; 8]) -> Option<[f64; 8]> {
    let n = 8;

    // Forward elimination with partial pivoting
    for col in 0..n {
        let mut max_row = col;
        let mut max_val = a[col][col].abs();
        for row in (col + 1)..n {
            if a[row][col].abs() > max_val {
                max_val = a[row][col].abs();
                max_row = row;
            }
        }

        if max_row != col {
            a.swap(col, max_row);
            b.swap(col, max_row);
        }

        let pivot = a[col][col];
        if !pivot.is_finite() || pivot.abs() < EPSILON {
            return None;
        }

        for row in (col + 1)..n {
            let factor = a[row][col] / pivot;
            for j in col..n {
                a[row][j] -= factor * a[col][j];
            }
            b[row] -= factor * b[col];
        }
    }

    // Back substitution
    let mut x = [0.0f64; 8];
    for i in (0..n).rev() {
        let mut sum = b[i];
        for j in (i + 1)..n {
            sum -= a[i][j] * x[j];
        }
        x[i] = sum / a[i][i];
    }

    Some(x)
}

#[cfg(test)]
fn apply_homography(h: &[f64; 9], p: Point) -> Option<Point> {
    let w = h[6] * p.x + h[7] * p.y + h[8];
    if !w.is_finite() || w.abs() < EPSILON {
        return None;
    }
    let mapped = Point::new(
        (h[0] * p.x + h[1] * p.y + h[2]) / w,
        (h[3] * p.x + h[4] * p.y + h[5]) / w,
    );
    mapped.is_finite().then_some(mapped)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::Size;

    fn quad(points: [(f64, f64); 4]) -> Quad {
        Quad::new(points.map(Point::from))
    }

    fn assert_close(actual: Point, expected: Point) {
        let tol = 1e-6 * expected.x.abs().max(expected.y.abs()).max(1.0);
        assert!(
            (actual.x - expected.x).abs() < tol && (actual.y - expected.y).abs() < tol,
            "points differ: actual={:?} expected={:?}",
            actual,
            expected
        );
    }

    fn skewed() -> Quad {
        quad([(12.0, 30.0), (410.0, 4.0), (380.0, 260.0), (25.0, 290.0)])
    }

    #[test]
    fn test_identity_transform() {
        let q = skewed();
        let h = Homography::solve(&q, &q).unwrap();
        for (actual, expected) in h.matrix().iter().zip(Homography::IDENTITY.matrix()) {
            assert!((actual - expected).abs() < 1e-6, "{:?}", h);
        }
    }

    #[test]
    fn test_lifted_identity_keeps_points() {
        let t = RenderTransform::lift(&Homography::IDENTITY);
        assert_eq!(t, RenderTransform::default());
        for p in [Point::new(0.0, 0.0), Point::new(-7.5, 13.25), Point::new(640.0, 480.0)] {
            assert_close(t.transform_point(p).unwrap(), p);
        }
    }

    #[test]
    fn test_corners_map_to_destination() {
        let src = Quad::from_size(Size::new(640.0, 480.0));
        let dst = skewed();
        let h = Homography::solve(&src, &dst).unwrap();
        for i in 0..4 {
            assert_close(h.transform_point(src.corner(i)).unwrap(), dst.corner(i));
        }
    }

    #[test]
    fn test_round_trip_composition() {
        let a = quad([(0.0, 0.0), (100.0, 0.0), (100.0, 50.0), (0.0, 50.0)]);
        let b = skewed();
        let ab = Homography::solve(&a, &b).unwrap();
        let ba = Homography::solve(&b, &a).unwrap();
        let round_trip = ba.then_after(&ab);
        for p in a.points() {
            assert_close(round_trip.transform_point(*p).unwrap(), *p);
        }
    }

    #[test]
    fn test_lift_matches_planar_mapping() {
        let src = Quad::from_size(Size::new(320.0, 240.0));
        let h = Homography::solve(&src, &skewed()).unwrap();
        let t = RenderTransform::lift(&h);
        for p in [Point::new(10.0, 20.0), Point::new(160.0, 120.0), Point::new(300.0, 5.0)] {
            assert_close(t.transform_point(p).unwrap(), h.transform_point(p).unwrap());
        }
        // z passes through untouched
        let m = &t.matrix;
        assert_eq!(m[(2, 2)], 1.0);
        assert_eq!(m[(0, 2)], 0.0);
        assert_eq!(m[(3, 2)], 0.0);
    }

    #[test]
    fn test_unproject_inverts_transform() {
        let src = Quad::from_size(Size::new(640.0, 480.0));
        let t = RenderTransform::lift(&Homography::solve(&src, &skewed()).unwrap());
        let content = Point::new(200.0, 333.0);
        let stage = t.transform_point(content).unwrap();
        assert_close(t.unproject_point(stage).unwrap(), content);
    }

    #[test]
    fn test_unproject_singular_transform() {
        let t = RenderTransform::from(Matrix4::zeros());
        let err = t.unproject_point(Point::new(3.0, 4.0)).unwrap_err();
        assert_eq!(err, PointTransformError { x: 3.0, y: 4.0 });
    }

    #[test]
    fn test_column_major_layout() {
        let src = Quad::from_size(Size::new(100.0, 100.0));
        let dst = quad([(10.0, 20.0), (110.0, 20.0), (110.0, 120.0), (10.0, 120.0)]);
        let t = RenderTransform::lift(&Homography::solve(&src, &dst).unwrap());
        let cols = t.to_column_major();
        // Translation lives in the fourth column
        assert!((cols[12] - 10.0).abs() < 1e-9);
        assert!((cols[13] - 20.0).abs() < 1e-9);
        assert!((cols[15] - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_degenerate_duplicate_points() {
        let src = quad([(0.0, 0.0), (0.0, 0.0), (1.0, 1.0), (2.0, 2.0)]);
        let dst = Quad::from_size(Size::new(10.0, 10.0));
        let err = Homography::solve(&src, &dst).unwrap_err();
        assert!(matches!(
            err,
            DegenerateQuadError::Collinear { quad: QuadRole::Source, .. }
        ));
    }

    #[test]
    fn test_degenerate_destination() {
        let src = Quad::from_size(Size::new(10.0, 10.0));
        let dst = quad([(0.0, 0.0), (5.0, 5.0), (10.0, 10.0), (0.0, 10.0)]);
        let err = Homography::solve(&src, &dst).unwrap_err();
        assert_eq!(
            err,
            DegenerateQuadError::Collinear { quad: QuadRole::Destination, corners: [0, 1, 2] }
        );
    }

    #[test]
    fn test_non_finite_rejected() {
        let src = quad([(0.0, 0.0), (f64::NAN, 0.0), (1.0, 1.0), (0.0, 1.0)]);
        let dst = Quad::from_size(Size::new(1.0, 1.0));
        assert_eq!(
            Homography::solve(&src, &dst).unwrap_err(),
            DegenerateQuadError::NonFinite { quad: QuadRole::Source }
        );
    }
}
