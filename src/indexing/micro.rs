//! Micro-element decomposition of refined macro primitives.
//!
//! Refining a macro face at level `L` (`n = 2^L`) produces `n^2` micro
//! triangles in two congruence classes: "up" triangles aligned with the
//! macro face and "down" triangles filling the gaps. Refining a macro cell
//! produces `n^3` micro tetrahedra in six classes: one corner-aligned "up"
//! class, four classes cutting the interior octahedron of each subdivided
//! tetrahedron along the fixed diagonal `(1,0,0) - (0,1,1)`, and one "down"
//! class. Every element is identified by its class and an integer anchor;
//! its vertices are the anchor plus fixed per-class offsets.
//!
//! Operator kernels, ghost-layer derivation, and the inter-level transfer
//! stencils are all driven by this one enumeration, so they cannot disagree
//! about which lattice points form an element.

use crate::indexing::layout::{micro_edges_per_edge, Idx3};

/// Signed lattice direction.
pub type Dir3 = [i64; 3];

/// Congruence classes of micro triangles on a macro face.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum MicroFaceType {
    Up,
    Down,
}

impl MicroFaceType {
    pub const ALL: [MicroFaceType; 2] = [MicroFaceType::Up, MicroFaceType::Down];

    /// Vertex offsets relative to the anchor.
    #[inline]
    pub const fn vertex_offsets(self) -> [Idx3; 3] {
        match self {
            MicroFaceType::Up => [[0, 0, 0], [1, 0, 0], [0, 1, 0]],
            MicroFaceType::Down => [[1, 0, 0], [0, 1, 0], [1, 1, 0]],
        }
    }

    /// Largest admissible anchor coordinate sum at `level`, or `None` if the
    /// class is empty there.
    #[inline]
    pub fn anchor_budget(self, level: u32) -> Option<usize> {
        let n = micro_edges_per_edge(level);
        match self {
            MicroFaceType::Up => n.checked_sub(1),
            MicroFaceType::Down => n.checked_sub(2),
        }
    }
}

/// Congruence classes of micro tetrahedra in a macro cell.
///
/// The four octahedral classes share the diagonal `(1,0,0) - (0,1,1)` and
/// walk the equator cycle `(0,1,0), (1,1,0), (1,0,1), (0,0,1)`.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum MicroCellType {
    Up,
    Octa0,
    Octa1,
    Octa2,
    Octa3,
    Down,
}

impl MicroCellType {
    pub const ALL: [MicroCellType; 6] = [
        MicroCellType::Up,
        MicroCellType::Octa0,
        MicroCellType::Octa1,
        MicroCellType::Octa2,
        MicroCellType::Octa3,
        MicroCellType::Down,
    ];

    /// Vertex offsets relative to the anchor.
    #[inline]
    pub const fn vertex_offsets(self) -> [Idx3; 4] {
        match self {
            MicroCellType::Up => [[0, 0, 0], [1, 0, 0], [0, 1, 0], [0, 0, 1]],
            MicroCellType::Octa0 => [[1, 0, 0], [0, 1, 1], [0, 1, 0], [1, 1, 0]],
            MicroCellType::Octa1 => [[1, 0, 0], [0, 1, 1], [1, 1, 0], [1, 0, 1]],
            MicroCellType::Octa2 => [[1, 0, 0], [0, 1, 1], [1, 0, 1], [0, 0, 1]],
            MicroCellType::Octa3 => [[1, 0, 0], [0, 1, 1], [0, 0, 1], [0, 1, 0]],
            MicroCellType::Down => [[1, 1, 0], [1, 0, 1], [0, 1, 1], [1, 1, 1]],
        }
    }

    /// Largest admissible anchor coordinate sum at `level`, or `None` if the
    /// class is empty there.
    #[inline]
    pub fn anchor_budget(self, level: u32) -> Option<usize> {
        let n = micro_edges_per_edge(level);
        match self {
            MicroCellType::Up => n.checked_sub(1),
            MicroCellType::Down => n.checked_sub(3),
            _ => n.checked_sub(2),
        }
    }
}

/// One micro triangle of a macro face.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct MicroFace {
    pub ty: MicroFaceType,
    pub anchor: Idx3,
}

impl MicroFace {
    /// Lattice coordinates of the three element vertices.
    pub fn vertices(&self) -> [Idx3; 3] {
        let o = self.ty.vertex_offsets();
        [
            add(self.anchor, o[0]),
            add(self.anchor, o[1]),
            add(self.anchor, o[2]),
        ]
    }
}

/// One micro tetrahedron of a macro cell.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct MicroCell {
    pub ty: MicroCellType,
    pub anchor: Idx3,
}

impl MicroCell {
    /// Lattice coordinates of the four element vertices.
    pub fn vertices(&self) -> [Idx3; 4] {
        let o = self.ty.vertex_offsets();
        [
            add(self.anchor, o[0]),
            add(self.anchor, o[1]),
            add(self.anchor, o[2]),
            add(self.anchor, o[3]),
        ]
    }
}

#[inline]
fn add(a: Idx3, b: Idx3) -> Idx3 {
    [a[0] + b[0], a[1] + b[1], a[2] + b[2]]
}

/// Total number of micro triangles on a macro face at `level`: `n^2`.
#[inline]
pub const fn num_micro_faces(level: u32) -> usize {
    let n = micro_edges_per_edge(level);
    n * n
}

/// Total number of micro tetrahedra in a macro cell at `level`: `n^3`.
#[inline]
pub const fn num_micro_cells(level: u32) -> usize {
    let n = micro_edges_per_edge(level);
    n * n * n
}

/// Valid anchors for a 2D element class with the given budget.
pub fn anchors_2d(budget: Option<usize>) -> impl Iterator<Item = Idx3> {
    budget.into_iter().flat_map(|m| {
        (0..=m).flat_map(move |y| (0..=m - y).map(move |x| [x, y, 0]))
    })
}

/// Valid anchors for a 3D element class with the given budget.
pub fn anchors_3d(budget: Option<usize>) -> impl Iterator<Item = Idx3> {
    budget.into_iter().flat_map(|m| {
        (0..=m).flat_map(move |z| {
            (0..=m - z).flat_map(move |y| (0..=m - z - y).map(move |x| [x, y, z]))
        })
    })
}

/// All micro triangles of a macro face at `level`, class-major.
pub fn face_elements(level: u32) -> impl Iterator<Item = MicroFace> {
    MicroFaceType::ALL.into_iter().flat_map(move |ty| {
        anchors_2d(ty.anchor_budget(level)).map(move |anchor| MicroFace { ty, anchor })
    })
}

/// All micro tetrahedra of a macro cell at `level`, class-major.
pub fn cell_elements(level: u32) -> impl Iterator<Item = MicroCell> {
    MicroCellType::ALL.into_iter().flat_map(move |ty| {
        anchors_3d(ty.anchor_budget(level)).map(move |anchor| MicroCell { ty, anchor })
    })
}

/// Micro triangles having lattice point `p` as a vertex.
///
/// Each element appears exactly once: within one element the vertex offsets
/// are pairwise distinct, so at most one of them places the anchor at
/// `p - offset`.
pub fn face_elements_touching(level: u32, p: Idx3) -> impl Iterator<Item = MicroFace> {
    MicroFaceType::ALL.into_iter().flat_map(move |ty| {
        let budget = ty.anchor_budget(level);
        ty.vertex_offsets().into_iter().filter_map(move |o| {
            let anchor = checked_sub(p, o)?;
            let m = budget?;
            (anchor[0] + anchor[1] <= m).then_some(MicroFace { ty, anchor })
        })
    })
}

/// Micro tetrahedra having lattice point `p` as a vertex.
pub fn cell_elements_touching(level: u32, p: Idx3) -> impl Iterator<Item = MicroCell> {
    MicroCellType::ALL.into_iter().flat_map(move |ty| {
        let budget = ty.anchor_budget(level);
        ty.vertex_offsets().into_iter().filter_map(move |o| {
            let anchor = checked_sub(p, o)?;
            let m = budget?;
            (anchor[0] + anchor[1] + anchor[2] <= m).then_some(MicroCell { ty, anchor })
        })
    })
}

#[inline]
fn checked_sub(a: Idx3, b: Idx3) -> Option<Idx3> {
    Some([
        a[0].checked_sub(b[0])?,
        a[1].checked_sub(b[1])?,
        a[2].checked_sub(b[2])?,
    ])
}

fn simplex2_size(budget: Option<usize>) -> usize {
    match budget {
        Some(m) => (m + 1) * (m + 2) / 2,
        None => 0,
    }
}

fn simplex3_size(budget: Option<usize>) -> usize {
    match budget {
        Some(m) => (m + 1) * (m + 2) * (m + 3) / 6,
        None => 0,
    }
}

fn simplex2_index(m: usize, x: usize, y: usize) -> usize {
    let w = m + 1;
    y * (2 * w - y + 1) / 2 + x
}

fn simplex3_index(m: usize, x: usize, y: usize, z: usize) -> usize {
    let w = m + 1;
    let tet = |k: usize| k * (k + 1) * (k + 2) / 6;
    let wz = w - z;
    tet(w) - tet(wz) + y * (2 * wz - y + 1) / 2 + x
}

/// Linear index of a micro triangle, bijective onto `0..n^2`.
pub fn micro_face_index(level: u32, element: MicroFace) -> usize {
    let mut offset = 0;
    for ty in MicroFaceType::ALL {
        if ty == element.ty {
            let m = ty
                .anchor_budget(level)
                .unwrap_or_else(|| panic!("micro face class {:?} is empty at level {level}", ty));
            return offset + simplex2_index(m, element.anchor[0], element.anchor[1]);
        }
        offset += simplex2_size(ty.anchor_budget(level));
    }
    unreachable!()
}

/// Linear index of a micro tetrahedron, bijective onto `0..n^3`.
pub fn micro_cell_index(level: u32, element: MicroCell) -> usize {
    let mut offset = 0;
    for ty in MicroCellType::ALL {
        if ty == element.ty {
            let m = ty
                .anchor_budget(level)
                .unwrap_or_else(|| panic!("micro cell class {:?} is empty at level {level}", ty));
            return offset
                + simplex3_index(m, element.anchor[0], element.anchor[1], element.anchor[2]);
        }
        offset += simplex3_size(ty.anchor_budget(level));
    }
    unreachable!()
}

/// Canonical edge directions of the micro-element graph on a face.
pub const FACE_EDGE_DIRECTIONS: [Dir3; 3] = [[1, 0, 0], [0, 1, 0], [1, -1, 0]];

/// Canonical edge directions of the micro-element graph in a cell.
pub const CELL_EDGE_DIRECTIONS: [Dir3; 7] = [
    [1, 0, 0],
    [0, 1, 0],
    [0, 0, 1],
    [1, -1, 0],
    [1, 0, -1],
    [0, 1, -1],
    [1, -1, -1],
];

/// Signed neighbor directions (both orientations of each canonical edge).
pub fn neighbor_directions(has_cells: bool) -> Vec<Dir3> {
    let canonical: &[Dir3] = if has_cells {
        &CELL_EDGE_DIRECTIONS
    } else {
        &FACE_EDGE_DIRECTIONS
    };
    canonical
        .iter()
        .flat_map(|d| [*d, [-d[0], -d[1], -d[2]]])
        .collect()
}

/// The unique micro-edge direction whose component parities match `parity`.
///
/// An odd fine-grid point is the midpoint of exactly one coarse micro edge;
/// this maps its coordinate parity pattern to that edge's direction.
pub fn parity_direction(parity: [usize; 3]) -> Dir3 {
    match parity {
        [1, 0, 0] => [1, 0, 0],
        [0, 1, 0] => [0, 1, 0],
        [0, 0, 1] => [0, 0, 1],
        [1, 1, 0] => [1, -1, 0],
        [1, 0, 1] => [1, 0, -1],
        [0, 1, 1] => [0, 1, -1],
        [1, 1, 1] => [1, -1, -1],
        _ => panic!("point is not odd in any component: parity {:?}", parity),
    }
}
