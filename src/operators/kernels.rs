//! Local element matrices for P1 bases on simplices.

use crate::primitives::geometry::{cross, dot, norm, scale, sub, tet_basis_gradients, tet_volume, triangle_area};
use crate::primitives::Point3;

/// Computes the local matrix of a bilinear form on one micro element.
///
/// Entry `(i, j)` couples the basis function of corner `i` (test) with the
/// one of corner `j` (trial). Kernels must be symmetric in the corner
/// ordering, not in any global orientation: the caller passes micro-vertex
/// coordinates in lattice order.
pub trait ElementKernel {
    fn triangle_matrix(&self, corners: &[Point3; 3]) -> [[f64; 3]; 3];
    fn tetrahedron_matrix(&self, corners: &[Point3; 4]) -> [[f64; 4]; 4];
}

/// P1 basis gradients of a (possibly 3D-embedded) triangle.
///
/// Gradient `i` is the in-plane normal of the edge opposite corner `i`,
/// scaled so the basis function rises from 0 to 1 across the triangle.
/// The three gradients sum to zero.
fn triangle_basis_gradients(corners: &[Point3; 3]) -> [Point3; 3] {
    let area = triangle_area(corners);
    assert!(area > 0.0, "degenerate micro triangle");
    let n = cross(sub(corners[1], corners[0]), sub(corners[2], corners[0]));
    let n = scale(n, 1.0 / norm(n));
    let mut grads = [[0.0; 3]; 3];
    for i in 0..3 {
        let opposite = sub(corners[(i + 2) % 3], corners[(i + 1) % 3]);
        grads[i] = scale(cross(n, opposite), 1.0 / (2.0 * area));
    }
    grads
}

/// Stiffness form `(grad u, grad v)`, the negative Laplacian.
#[derive(Copy, Clone, Debug, Default)]
pub struct LaplaceKernel;

impl ElementKernel for LaplaceKernel {
    fn triangle_matrix(&self, corners: &[Point3; 3]) -> [[f64; 3]; 3] {
        let area = triangle_area(corners);
        let grads = triangle_basis_gradients(corners);
        let mut k = [[0.0; 3]; 3];
        for i in 0..3 {
            for j in 0..3 {
                k[i][j] = area * dot(grads[i], grads[j]);
            }
        }
        k
    }

    fn tetrahedron_matrix(&self, corners: &[Point3; 4]) -> [[f64; 4]; 4] {
        let volume = tet_volume(corners);
        assert!(volume > 0.0, "degenerate micro tetrahedron");
        let grads = tet_basis_gradients(corners);
        let mut k = [[0.0; 4]; 4];
        for i in 0..4 {
            for j in 0..4 {
                k[i][j] = volume * dot(grads[i], grads[j]);
            }
        }
        k
    }
}

/// Mass form `(u, v)` with exact integration of the P1 products.
#[derive(Copy, Clone, Debug, Default)]
pub struct MassKernel;

impl ElementKernel for MassKernel {
    fn triangle_matrix(&self, corners: &[Point3; 3]) -> [[f64; 3]; 3] {
        let w = triangle_area(corners) / 12.0;
        let mut k = [[w; 3]; 3];
        for (i, row) in k.iter_mut().enumerate() {
            row[i] = 2.0 * w;
        }
        k
    }

    fn tetrahedron_matrix(&self, corners: &[Point3; 4]) -> [[f64; 4]; 4] {
        let w = tet_volume(corners) / 20.0;
        let mut k = [[w; 4]; 4];
        for (i, row) in k.iter_mut().enumerate() {
            row[i] = 2.0 * w;
        }
        k
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    const REF_TRIANGLE: [Point3; 3] = [
        [0.0, 0.0, 0.0],
        [1.0, 0.0, 0.0],
        [0.0, 1.0, 0.0],
    ];

    const REF_TET: [Point3; 4] = [
        [0.0, 0.0, 0.0],
        [1.0, 0.0, 0.0],
        [0.0, 1.0, 0.0],
        [0.0, 0.0, 1.0],
    ];

    #[test]
    fn laplace_reference_triangle() {
        let k = LaplaceKernel.triangle_matrix(&REF_TRIANGLE);
        let expected = [
            [1.0, -0.5, -0.5],
            [-0.5, 0.5, 0.0],
            [-0.5, 0.0, 0.5],
        ];
        for i in 0..3 {
            for j in 0..3 {
                assert_relative_eq!(k[i][j], expected[i][j], epsilon = 1e-14);
            }
        }
    }

    #[test]
    fn laplace_rows_sum_to_zero() {
        let corners = [
            [0.2, -0.1, 0.0],
            [1.3, 0.4, 0.0],
            [0.5, 1.7, 0.0],
        ];
        let k = LaplaceKernel.triangle_matrix(&corners);
        for row in k {
            assert_relative_eq!(row.iter().sum::<f64>(), 0.0, epsilon = 1e-12);
        }
        let k = LaplaceKernel.tetrahedron_matrix(&REF_TET);
        for row in k {
            assert_relative_eq!(row.iter().sum::<f64>(), 0.0, epsilon = 1e-12);
        }
    }

    #[test]
    fn laplace_is_invariant_under_rigid_motion() {
        // Rotate the reference triangle out of the xy-plane and translate.
        let (s, c) = (0.6f64, 0.8f64);
        let moved: Vec<Point3> = REF_TRIANGLE
            .iter()
            .map(|p| [p[0] + 3.0, c * p[1] + 1.0, s * p[1] - 2.0])
            .collect();
        let moved = [moved[0], moved[1], moved[2]];
        let a = LaplaceKernel.triangle_matrix(&REF_TRIANGLE);
        let b = LaplaceKernel.triangle_matrix(&moved);
        for i in 0..3 {
            for j in 0..3 {
                assert_relative_eq!(a[i][j], b[i][j], epsilon = 1e-12);
            }
        }
    }

    #[test]
    fn mass_matrices_integrate_constants() {
        let k = MassKernel.triangle_matrix(&REF_TRIANGLE);
        let total: f64 = k.iter().flatten().sum();
        assert_relative_eq!(total, 0.5, epsilon = 1e-14);

        let k = MassKernel.tetrahedron_matrix(&REF_TET);
        let total: f64 = k.iter().flatten().sum();
        assert_relative_eq!(total, 1.0 / 6.0, epsilon = 1e-14);
    }
}
