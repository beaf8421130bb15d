//! Per-level lattice layouts on macro primitives.
//!
//! A refinement level `L` subdivides every macro edge into `n = 2^L` micro
//! edges, giving a structured vertex lattice of width `n + 1` per macro
//! primitive. This module owns the closed-form counts, the bijective linear
//! index functions, and lazy iterators over the structured coordinates.
//!
//! Coordinates are always `[x, y, z]` with unused components zero; the
//! simplex constraint is `x + y + z <= n`.

/// Structured lattice coordinate on a macro primitive.
pub type Idx3 = [usize; 3];

/// Number of micro edges along a macro edge at `level`.
#[inline]
pub const fn micro_edges_per_edge(level: u32) -> usize {
    1 << level
}

/// Lattice width (vertices along a macro edge) at `level`.
#[inline]
pub const fn level_width(level: u32) -> usize {
    (1 << level) + 1
}

/// Number of vertex DoFs on a macro edge at `level`.
#[inline]
pub const fn num_vertex_dofs_edge(level: u32) -> usize {
    level_width(level)
}

/// Number of vertex DoFs on a macro face at `level`: `w (w+1) / 2`.
#[inline]
pub const fn num_vertex_dofs_face(level: u32) -> usize {
    let w = level_width(level);
    w * (w + 1) / 2
}

/// Number of vertex DoFs on a macro cell at `level`: `w (w+1) (w+2) / 6`.
#[inline]
pub const fn num_vertex_dofs_cell(level: u32) -> usize {
    let w = level_width(level);
    w * (w + 1) * (w + 2) / 6
}

/// Number of edge-midpoint DoFs on a macro face at `level`, all three
/// orientation classes together: `3 n (n+1) / 2`.
#[inline]
pub const fn num_edge_dofs_face(level: u32) -> usize {
    let n = micro_edges_per_edge(level);
    3 * n * (n + 1) / 2
}

/// Linear index of lattice point `x` on a macro edge.
#[inline]
pub fn edge_index(level: u32, x: usize) -> usize {
    debug_assert!(x < level_width(level));
    x
}

/// Linear index of lattice point `(x, y)` on a macro face.
///
/// Row-major over rows of shrinking width: row `y` has `w - y` entries.
#[inline]
pub fn face_index(level: u32, x: usize, y: usize) -> usize {
    let w = level_width(level);
    debug_assert!(x + y < w);
    y * (2 * w - y + 1) / 2 + x
}

/// Linear index of lattice point `(x, y, z)` on a macro cell.
///
/// Layered: layer `z` is the face lattice of width `w - z`.
#[inline]
pub fn cell_index(level: u32, x: usize, y: usize, z: usize) -> usize {
    let w = level_width(level);
    debug_assert!(x + y + z < w);
    let tet = |m: usize| m * (m + 1) * (m + 2) / 6;
    let layer_offset = tet(w) - tet(w - z);
    let wz = w - z;
    layer_offset + y * (2 * wz - y + 1) / 2 + x
}

/// Orientation classes of edge-midpoint DoFs on a macro face.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum EdgeDoFOrientation {
    /// Micro edges parallel to the macro edge `(0) - (1)`.
    Horizontal,
    /// Micro edges parallel to `(0) - (2)`.
    Vertical,
    /// The diagonal micro edges closing the micro triangles.
    Diagonal,
}

/// Linear index of the edge-midpoint DoF anchored at `(x, y)` with the given
/// orientation, on a macro face.
///
/// The three classes occupy consecutive blocks of `n (n+1) / 2` entries
/// each; within a class the anchor lattice `x + y <= n - 1` is row-major.
pub fn face_edge_dof_index(level: u32, x: usize, y: usize, orientation: EdgeDoFOrientation) -> usize {
    let n = micro_edges_per_edge(level);
    debug_assert!(x + y < n);
    let block = n * (n + 1) / 2;
    let class = match orientation {
        EdgeDoFOrientation::Horizontal => 0,
        EdgeDoFOrientation::Vertical => 1,
        EdgeDoFOrientation::Diagonal => 2,
    };
    // Anchor rows have n - y entries.
    class * block + y * (2 * n - y + 1) / 2 + x
}

/// Iterator over edge lattice points, skipping `inner_offset` points from
/// each end.
pub fn edge_dofs(level: u32, inner_offset: usize) -> impl Iterator<Item = Idx3> {
    let n = micro_edges_per_edge(level);
    let lo = inner_offset;
    let span = (2 * lo <= n).then(|| n - 2 * lo);
    span.into_iter()
        .flat_map(move |s| (0..=s).map(move |dx| [lo + dx, 0, 0]))
}

/// Iterator over face lattice points, skipping a boundary layer of width
/// `inner_offset` (offset 0 yields the whole lattice, offset 1 the interior).
pub fn face_dofs(level: u32, inner_offset: usize) -> impl Iterator<Item = Idx3> {
    let n = micro_edges_per_edge(level);
    let lo = inner_offset;
    let span = (3 * lo <= n).then(|| n - 3 * lo);
    span.into_iter().flat_map(move |s| {
        (0..=s).flat_map(move |dy| (0..=s - dy).map(move |dx| [lo + dx, lo + dy, 0]))
    })
}

/// Iterator over cell lattice points, skipping a boundary layer of width
/// `inner_offset`.
pub fn cell_dofs(level: u32, inner_offset: usize) -> impl Iterator<Item = Idx3> {
    let n = micro_edges_per_edge(level);
    let lo = inner_offset;
    let span = (4 * lo <= n).then(|| n - 4 * lo);
    span.into_iter().flat_map(move |s| {
        (0..=s).flat_map(move |dz| {
            (0..=s - dz).flat_map(move |dy| {
                (0..=s - dz - dy).map(move |dx| [lo + dx, lo + dy, lo + dz])
            })
        })
    })
}
