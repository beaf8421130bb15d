//! Geometric metrics for simplex primitives.
//!
//! Small free functions over `[f64; 3]` corner arrays. These feed both the
//! element kernels (volumes, gradients) and mesh quality diagnostics
//! (insphere radius, inward normals).

use crate::primitives::{Cell, Face, Point3};

#[inline]
pub(crate) fn sub(a: Point3, b: Point3) -> Point3 {
    [a[0] - b[0], a[1] - b[1], a[2] - b[2]]
}

#[inline]
pub(crate) fn dot(a: Point3, b: Point3) -> f64 {
    a[0] * b[0] + a[1] * b[1] + a[2] * b[2]
}

#[inline]
pub(crate) fn cross(a: Point3, b: Point3) -> Point3 {
    [
        a[1] * b[2] - a[2] * b[1],
        a[2] * b[0] - a[0] * b[2],
        a[0] * b[1] - a[1] * b[0],
    ]
}

#[inline]
pub(crate) fn norm(a: Point3) -> f64 {
    dot(a, a).sqrt()
}

#[inline]
pub(crate) fn scale(a: Point3, s: f64) -> Point3 {
    [a[0] * s, a[1] * s, a[2] * s]
}

#[inline]
pub(crate) fn add(a: Point3, b: Point3) -> Point3 {
    [a[0] + b[0], a[1] + b[1], a[2] + b[2]]
}

/// Area of the triangle spanned by three corners.
pub fn triangle_area(corners: &[Point3; 3]) -> f64 {
    let ab = sub(corners[1], corners[0]);
    let ac = sub(corners[2], corners[0]);
    0.5 * norm(cross(ab, ac))
}

/// Signed volume of the tetrahedron spanned by four corners.
///
/// Positive when the corners are positively oriented.
pub fn tet_signed_volume(corners: &[Point3; 4]) -> f64 {
    let a = sub(corners[1], corners[0]);
    let b = sub(corners[2], corners[0]);
    let c = sub(corners[3], corners[0]);
    dot(a, cross(b, c)) / 6.0
}

/// Volume of the tetrahedron spanned by four corners.
pub fn tet_volume(corners: &[Point3; 4]) -> f64 {
    tet_signed_volume(corners).abs()
}

/// Unit normal of the plane through `a`, `b`, `c`, oriented towards `inward`.
pub fn tet_inward_normal(a: Point3, b: Point3, c: Point3, inward: Point3) -> Point3 {
    let n = cross(sub(b, a), sub(c, a));
    let n = scale(n, 1.0 / norm(n));
    if dot(n, sub(inward, a)) < 0.0 {
        scale(n, -1.0)
    } else {
        n
    }
}

/// Radius of the inscribed sphere, `3 V / (sum of face areas)`.
pub fn tet_insphere_radius(corners: &[Point3; 4]) -> f64 {
    let faces: [[usize; 3]; 4] = [[1, 2, 3], [0, 2, 3], [0, 1, 3], [0, 1, 2]];
    let surface: f64 = faces
        .iter()
        .map(|f| triangle_area(&[corners[f[0]], corners[f[1]], corners[f[2]]]))
        .sum();
    3.0 * tet_volume(corners) / surface
}

/// Shape-function gradients of the linear basis on a tetrahedron.
///
/// Returns `g_0..g_3` with `g_i` the constant gradient of the hat function
/// of corner `i`. The gradients sum to zero.
pub fn tet_basis_gradients(corners: &[Point3; 4]) -> [Point3; 4] {
    let a = sub(corners[1], corners[0]);
    let b = sub(corners[2], corners[0]);
    let c = sub(corners[3], corners[0]);
    let det = dot(a, cross(b, c));
    // Rows of the inverse Jacobian, each scaled by 1/det.
    let g1 = scale(cross(b, c), 1.0 / det);
    let g2 = scale(cross(c, a), 1.0 / det);
    let g3 = scale(cross(a, b), 1.0 / det);
    let g0 = scale(add(add(g1, g2), g3), -1.0);
    [g0, g1, g2, g3]
}

impl Face {
    /// Area of the face triangle.
    pub fn area(&self) -> f64 {
        triangle_area(&self.coordinates)
    }
}

impl Cell {
    /// Volume of the cell tetrahedron.
    pub fn volume(&self) -> f64 {
        tet_volume(&self.coordinates)
    }

    /// Radius of the inscribed sphere, a shape-quality measure.
    pub fn insphere_radius(&self) -> f64 {
        tet_insphere_radius(&self.coordinates)
    }

    /// Inward-pointing unit normals of the four cell faces.
    ///
    /// Normal `i` belongs to the face opposite corner `i`.
    pub fn inward_normals(&self) -> [Point3; 4] {
        let c = &self.coordinates;
        [
            tet_inward_normal(c[1], c[2], c[3], c[0]),
            tet_inward_normal(c[0], c[2], c[3], c[1]),
            tet_inward_normal(c[0], c[1], c[3], c[2]),
            tet_inward_normal(c[0], c[1], c[2], c[3]),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    const UNIT_TET: [Point3; 4] = [
        [0.0, 0.0, 0.0],
        [1.0, 0.0, 0.0],
        [0.0, 1.0, 0.0],
        [0.0, 0.0, 1.0],
    ];

    #[test]
    fn unit_tet_volume() {
        assert_relative_eq!(tet_volume(&UNIT_TET), 1.0 / 6.0);
        let mut flipped = UNIT_TET;
        flipped.swap(0, 1);
        assert_relative_eq!(tet_signed_volume(&flipped), -1.0 / 6.0);
        assert_relative_eq!(tet_volume(&flipped), 1.0 / 6.0);
    }

    #[test]
    fn unit_tet_insphere() {
        // Surface: three right triangles of area 1/2 plus the slanted face
        // of area sqrt(3)/2.
        let surface = 1.5 + 0.75f64.sqrt();
        assert_relative_eq!(
            tet_insphere_radius(&UNIT_TET),
            0.5 / surface,
            max_relative = 1e-12
        );
    }

    #[test]
    fn gradients_sum_to_zero_and_interpolate_linears() {
        let corners = [
            [0.2, 0.1, 0.0],
            [1.3, 0.0, 0.1],
            [0.1, 1.1, 0.2],
            [0.0, 0.3, 0.9],
        ];
        let g = tet_basis_gradients(&corners);
        for k in 0..3 {
            let s: f64 = g.iter().map(|gi| gi[k]).sum();
            assert_relative_eq!(s, 0.0, epsilon = 1e-12);
        }
        // Gradient of the interpolant of f(x) = x[k] must be e_k.
        for k in 0..3 {
            let mut grad = [0.0; 3];
            for (i, gi) in g.iter().enumerate() {
                for d in 0..3 {
                    grad[d] += corners[i][k] * gi[d];
                }
            }
            for d in 0..3 {
                let expected = if d == k { 1.0 } else { 0.0 };
                assert_relative_eq!(grad[d], expected, epsilon = 1e-12);
            }
        }
    }

    #[test]
    fn inward_normals_point_inside() {
        let g = tet_basis_gradients(&UNIT_TET);
        let n = tet_inward_normal(UNIT_TET[1], UNIT_TET[2], UNIT_TET[3], UNIT_TET[0]);
        // The hat gradient of the opposite corner is parallel to the inward
        // normal of a face.
        assert!(dot(n, g[0]) > 0.0);
        let centroid = [0.25, 0.25, 0.25];
        for (i, normal) in [
            tet_inward_normal(UNIT_TET[1], UNIT_TET[2], UNIT_TET[3], UNIT_TET[0]),
            tet_inward_normal(UNIT_TET[0], UNIT_TET[2], UNIT_TET[3], UNIT_TET[1]),
            tet_inward_normal(UNIT_TET[0], UNIT_TET[1], UNIT_TET[3], UNIT_TET[2]),
            tet_inward_normal(UNIT_TET[0], UNIT_TET[1], UNIT_TET[2], UNIT_TET[3]),
        ]
        .iter()
        .enumerate()
        {
            let on_face = UNIT_TET[(i + 1) % 4];
            assert!(dot(*normal, sub(centroid, on_face)) > 0.0);
        }
    }

    #[test]
    fn triangle_area_right() {
        let t = [[0.0, 0.0, 0.0], [2.0, 0.0, 0.0], [0.0, 3.0, 0.0]];
        assert_relative_eq!(triangle_area(&t), 3.0);
    }
}
