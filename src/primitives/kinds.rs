//! Mesh primitives as a closed tagged variant.
//!
//! The kind set of a simplicial mesh is fixed (vertices, edges, triangular
//! faces, tetrahedral cells) and every consumer switches on it, so the
//! primitives are modeled as one enum over four plain structs rather than an
//! open class hierarchy. Neighbor lists are symmetric by construction (the
//! setup storage back-links them and validates symmetry).
//!
//! Arity invariants are enforced at construction time: a cell has exactly
//! 4 vertices, 6 edges and 4 faces; a face has 3 vertices and 3 edges.
//! Violations panic; they indicate a meshing bug, not a runtime condition.

use crate::primitives::PrimitiveId;
use serde::{Deserialize, Serialize};

/// Geometric coordinates of a mesh node.
pub type Point3 = [f64; 3];

/// Discriminant for the four primitive kinds, ordered by dimension.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum PrimitiveKind {
    Vertex,
    Edge,
    Face,
    Cell,
}

impl PrimitiveKind {
    /// Topological dimension of the kind.
    #[inline]
    pub const fn dimension(self) -> usize {
        match self {
            PrimitiveKind::Vertex => 0,
            PrimitiveKind::Edge => 1,
            PrimitiveKind::Face => 2,
            PrimitiveKind::Cell => 3,
        }
    }

    /// All kinds in dependency order (Vertex first).
    pub const ALL: [PrimitiveKind; 4] = [
        PrimitiveKind::Vertex,
        PrimitiveKind::Edge,
        PrimitiveKind::Face,
        PrimitiveKind::Cell,
    ];
}

/// Set of primitive kinds, used to scope data handles to a capability set.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct KindMask(u8);

impl KindMask {
    pub const NONE: KindMask = KindMask(0);
    pub const VERTEX: KindMask = KindMask(1);
    pub const EDGE: KindMask = KindMask(2);
    pub const FACE: KindMask = KindMask(4);
    pub const CELL: KindMask = KindMask(8);
    pub const ALL: KindMask = KindMask(15);

    #[inline]
    pub fn contains(self, kind: PrimitiveKind) -> bool {
        self.0 & KindMask::from_kind(kind).0 != 0
    }

    #[inline]
    pub const fn from_kind(kind: PrimitiveKind) -> KindMask {
        match kind {
            PrimitiveKind::Vertex => KindMask::VERTEX,
            PrimitiveKind::Edge => KindMask::EDGE,
            PrimitiveKind::Face => KindMask::FACE,
            PrimitiveKind::Cell => KindMask::CELL,
        }
    }
}

impl std::ops::BitOr for KindMask {
    type Output = KindMask;
    #[inline]
    fn bitor(self, rhs: KindMask) -> KindMask {
        KindMask(self.0 | rhs.0)
    }
}

/// Boundary classification of the degrees of freedom owned by a primitive.
///
/// Classification is a per-primitive property: all DoFs owned by one
/// primitive share its flag. Smoothers and interpolation accept a mask of
/// these flags to select which DoFs they touch.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DoFType(u8);

impl DoFType {
    pub const INNER: DoFType = DoFType(1);
    pub const DIRICHLET: DoFType = DoFType(2);
    pub const NEUMANN: DoFType = DoFType(4);
    pub const ALL: DoFType = DoFType(7);

    #[inline]
    pub fn matches(self, mask: DoFType) -> bool {
        self.0 & mask.0 != 0
    }
}

impl std::ops::BitOr for DoFType {
    type Output = DoFType;
    #[inline]
    fn bitor(self, rhs: DoFType) -> DoFType {
        DoFType(self.0 | rhs.0)
    }
}

/// A mesh vertex: one coordinate plus back-links to all incident primitives.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Vertex {
    pub(crate) id: PrimitiveId,
    pub(crate) coordinates: Point3,
    pub(crate) neighbor_edges: Vec<PrimitiveId>,
    pub(crate) neighbor_faces: Vec<PrimitiveId>,
    pub(crate) neighbor_cells: Vec<PrimitiveId>,
    pub(crate) on_boundary: bool,
    pub(crate) dof_type: DoFType,
}

impl Vertex {
    pub fn coordinates(&self) -> Point3 {
        self.coordinates
    }
    pub fn neighbor_edges(&self) -> &[PrimitiveId] {
        &self.neighbor_edges
    }
    pub fn neighbor_faces(&self) -> &[PrimitiveId] {
        &self.neighbor_faces
    }
    pub fn neighbor_cells(&self) -> &[PrimitiveId] {
        &self.neighbor_cells
    }
}

/// A mesh edge between two vertices.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Edge {
    pub(crate) id: PrimitiveId,
    pub(crate) vertex_ids: [PrimitiveId; 2],
    pub(crate) coordinates: [Point3; 2],
    pub(crate) neighbor_faces: Vec<PrimitiveId>,
    pub(crate) neighbor_cells: Vec<PrimitiveId>,
    pub(crate) on_boundary: bool,
    pub(crate) dof_type: DoFType,
}

impl Edge {
    pub fn vertex_ids(&self) -> &[PrimitiveId; 2] {
        &self.vertex_ids
    }
    pub fn coordinates(&self) -> &[Point3; 2] {
        &self.coordinates
    }
    pub fn neighbor_faces(&self) -> &[PrimitiveId] {
        &self.neighbor_faces
    }
    pub fn neighbor_cells(&self) -> &[PrimitiveId] {
        &self.neighbor_cells
    }

    /// Local index (0 or 1) of `vertex` within this edge.
    pub fn local_vertex_index(&self, vertex: PrimitiveId) -> Option<usize> {
        self.vertex_ids.iter().position(|&v| v == vertex)
    }
}

/// A triangular face.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Face {
    pub(crate) id: PrimitiveId,
    pub(crate) vertex_ids: [PrimitiveId; 3],
    pub(crate) edge_ids: [PrimitiveId; 3],
    pub(crate) coordinates: [Point3; 3],
    pub(crate) neighbor_cells: Vec<PrimitiveId>,
    pub(crate) on_boundary: bool,
    pub(crate) dof_type: DoFType,
}

impl Face {
    /// # Panics
    /// Panics if the vertex or edge count does not match a triangle.
    pub(crate) fn new(
        id: PrimitiveId,
        vertex_ids: &[PrimitiveId],
        edge_ids: &[PrimitiveId],
        coordinates: [Point3; 3],
    ) -> Self {
        assert_eq!(
            vertex_ids.len(),
            3,
            "only triangle faces are supported (number of vertices mismatches)"
        );
        assert_eq!(
            edge_ids.len(),
            3,
            "only triangle faces are supported (number of edges mismatches)"
        );
        Face {
            id,
            vertex_ids: [vertex_ids[0], vertex_ids[1], vertex_ids[2]],
            edge_ids: [edge_ids[0], edge_ids[1], edge_ids[2]],
            coordinates,
            neighbor_cells: Vec::new(),
            on_boundary: false,
            dof_type: DoFType::INNER,
        }
    }

    pub fn vertex_ids(&self) -> &[PrimitiveId; 3] {
        &self.vertex_ids
    }
    pub fn edge_ids(&self) -> &[PrimitiveId; 3] {
        &self.edge_ids
    }
    pub fn coordinates(&self) -> &[Point3; 3] {
        &self.coordinates
    }
    pub fn neighbor_cells(&self) -> &[PrimitiveId] {
        &self.neighbor_cells
    }

    /// Local index of `vertex` within this face, if it is one of its corners.
    pub fn local_vertex_index(&self, vertex: PrimitiveId) -> Option<usize> {
        self.vertex_ids.iter().position(|&v| v == vertex)
    }

    /// Local index of `edge` within this face.
    pub fn local_edge_index(&self, edge: PrimitiveId) -> Option<usize> {
        self.edge_ids.iter().position(|&e| e == edge)
    }
}

/// A tetrahedral cell.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Cell {
    pub(crate) id: PrimitiveId,
    pub(crate) vertex_ids: [PrimitiveId; 4],
    pub(crate) edge_ids: [PrimitiveId; 6],
    pub(crate) face_ids: [PrimitiveId; 4],
    pub(crate) coordinates: [Point3; 4],
    pub(crate) dof_type: DoFType,
}

impl Cell {
    /// # Panics
    /// Panics if the vertex/edge/face counts do not match a tetrahedron.
    pub(crate) fn new(
        id: PrimitiveId,
        vertex_ids: &[PrimitiveId],
        edge_ids: &[PrimitiveId],
        face_ids: &[PrimitiveId],
        coordinates: [Point3; 4],
    ) -> Self {
        assert_eq!(
            vertex_ids.len(),
            4,
            "only tetrahedron cells are supported (number of vertices mismatches)"
        );
        assert_eq!(
            edge_ids.len(),
            6,
            "only tetrahedron cells are supported (number of edges mismatches)"
        );
        assert_eq!(
            face_ids.len(),
            4,
            "only tetrahedron cells are supported (number of faces mismatches)"
        );
        Cell {
            id,
            vertex_ids: [vertex_ids[0], vertex_ids[1], vertex_ids[2], vertex_ids[3]],
            edge_ids: [
                edge_ids[0], edge_ids[1], edge_ids[2], edge_ids[3], edge_ids[4], edge_ids[5],
            ],
            face_ids: [face_ids[0], face_ids[1], face_ids[2], face_ids[3]],
            coordinates,
            dof_type: DoFType::INNER,
        }
    }

    pub fn vertex_ids(&self) -> &[PrimitiveId; 4] {
        &self.vertex_ids
    }
    pub fn edge_ids(&self) -> &[PrimitiveId; 6] {
        &self.edge_ids
    }
    pub fn face_ids(&self) -> &[PrimitiveId; 4] {
        &self.face_ids
    }
    pub fn coordinates(&self) -> &[Point3; 4] {
        &self.coordinates
    }

    /// Local index of `vertex` within this cell.
    pub fn local_vertex_index(&self, vertex: PrimitiveId) -> Option<usize> {
        self.vertex_ids.iter().position(|&v| v == vertex)
    }

    /// Local index of `edge` within this cell.
    pub fn local_edge_index(&self, edge: PrimitiveId) -> Option<usize> {
        self.edge_ids.iter().position(|&e| e == edge)
    }

    /// Local index of `face` within this cell.
    pub fn local_face_index(&self, face: PrimitiveId) -> Option<usize> {
        self.face_ids.iter().position(|&f| f == face)
    }
}

/// Closed variant over the four primitive kinds.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum Primitive {
    Vertex(Vertex),
    Edge(Edge),
    Face(Face),
    Cell(Cell),
}

impl Primitive {
    #[inline]
    pub fn id(&self) -> PrimitiveId {
        match self {
            Primitive::Vertex(v) => v.id,
            Primitive::Edge(e) => e.id,
            Primitive::Face(f) => f.id,
            Primitive::Cell(c) => c.id,
        }
    }

    #[inline]
    pub fn kind(&self) -> PrimitiveKind {
        match self {
            Primitive::Vertex(_) => PrimitiveKind::Vertex,
            Primitive::Edge(_) => PrimitiveKind::Edge,
            Primitive::Face(_) => PrimitiveKind::Face,
            Primitive::Cell(_) => PrimitiveKind::Cell,
        }
    }

    #[inline]
    pub fn dof_type(&self) -> DoFType {
        match self {
            Primitive::Vertex(v) => v.dof_type,
            Primitive::Edge(e) => e.dof_type,
            Primitive::Face(f) => f.dof_type,
            Primitive::Cell(c) => c.dof_type,
        }
    }

    /// Whether the primitive lies on the geometric domain boundary.
    #[inline]
    pub fn on_boundary(&self) -> bool {
        match self {
            Primitive::Vertex(v) => v.on_boundary,
            Primitive::Edge(e) => e.on_boundary,
            Primitive::Face(f) => f.on_boundary,
            // A cell's interior can never lie on the domain boundary.
            Primitive::Cell(_) => false,
        }
    }

    /// The primitive's own corner vertex IDs (a vertex lists itself).
    pub fn corner_vertex_ids(&self) -> &[PrimitiveId] {
        match self {
            Primitive::Vertex(v) => std::slice::from_ref(&v.id),
            Primitive::Edge(e) => &e.vertex_ids,
            Primitive::Face(f) => &f.vertex_ids,
            Primitive::Cell(c) => &c.vertex_ids,
        }
    }

    /// The corner coordinates of the primitive.
    pub fn corner_coordinates(&self) -> &[Point3] {
        match self {
            Primitive::Vertex(v) => std::slice::from_ref(&v.coordinates),
            Primitive::Edge(e) => &e.coordinates,
            Primitive::Face(f) => &f.coordinates,
            Primitive::Cell(c) => &c.coordinates,
        }
    }

    /// Ordered neighbor IDs of the given kind.
    ///
    /// For kinds below the primitive's own dimension these are its corners /
    /// sides, for kinds above its incident co-primitives. A primitive has no
    /// neighbors of its own kind.
    pub fn neighbor_ids(&self, kind: PrimitiveKind) -> &[PrimitiveId] {
        match (self, kind) {
            (Primitive::Vertex(v), PrimitiveKind::Edge) => &v.neighbor_edges,
            (Primitive::Vertex(v), PrimitiveKind::Face) => &v.neighbor_faces,
            (Primitive::Vertex(v), PrimitiveKind::Cell) => &v.neighbor_cells,
            (Primitive::Edge(e), PrimitiveKind::Vertex) => &e.vertex_ids,
            (Primitive::Edge(e), PrimitiveKind::Face) => &e.neighbor_faces,
            (Primitive::Edge(e), PrimitiveKind::Cell) => &e.neighbor_cells,
            (Primitive::Face(f), PrimitiveKind::Vertex) => &f.vertex_ids,
            (Primitive::Face(f), PrimitiveKind::Edge) => &f.edge_ids,
            (Primitive::Face(f), PrimitiveKind::Cell) => &f.neighbor_cells,
            (Primitive::Cell(c), PrimitiveKind::Vertex) => &c.vertex_ids,
            (Primitive::Cell(c), PrimitiveKind::Edge) => &c.edge_ids,
            (Primitive::Cell(c), PrimitiveKind::Face) => &c.face_ids,
            _ => &[],
        }
    }

    /// Local index of `neighbor` within the neighbor list of its kind.
    ///
    /// Used to orient local stencils consistently regardless of global
    /// numbering.
    pub fn local_index_of(&self, kind: PrimitiveKind, neighbor: PrimitiveId) -> Option<usize> {
        self.neighbor_ids(kind).iter().position(|&p| p == neighbor)
    }

    pub fn as_vertex(&self) -> Option<&Vertex> {
        match self {
            Primitive::Vertex(v) => Some(v),
            _ => None,
        }
    }
    pub fn as_edge(&self) -> Option<&Edge> {
        match self {
            Primitive::Edge(e) => Some(e),
            _ => None,
        }
    }
    pub fn as_face(&self) -> Option<&Face> {
        match self {
            Primitive::Face(f) => Some(f),
            _ => None,
        }
    }
    pub fn as_cell(&self) -> Option<&Cell> {
        match self {
            Primitive::Cell(c) => Some(c),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pid(raw: u64) -> PrimitiveId {
        PrimitiveId::new(raw)
    }

    #[test]
    fn cell_arity_asserts() {
        let vs: Vec<_> = (1..=4).map(pid).collect();
        let es: Vec<_> = (5..=10).map(pid).collect();
        let fs: Vec<_> = (11..=14).map(pid).collect();
        let coords = [[0.0; 3]; 4];
        let cell = Cell::new(pid(20), &vs, &es, &fs, coords);
        assert_eq!(cell.local_vertex_index(pid(3)), Some(2));
        assert_eq!(cell.local_face_index(pid(14)), Some(3));
        assert_eq!(cell.local_edge_index(pid(99)), None);

        let too_few = std::panic::catch_unwind(|| {
            Cell::new(pid(21), &vs[..3], &es, &fs, coords);
        });
        assert!(too_few.is_err());
    }

    #[test]
    fn face_arity_asserts() {
        let vs: Vec<_> = (1..=3).map(pid).collect();
        let es: Vec<_> = (4..=6).map(pid).collect();
        let face = Face::new(pid(9), &vs, &es, [[0.0; 3]; 3]);
        assert_eq!(face.local_edge_index(pid(5)), Some(1));
        assert!(std::panic::catch_unwind(|| {
            Face::new(pid(10), &vs, &es[..2], [[0.0; 3]; 3]);
        })
        .is_err());
    }

    #[test]
    fn kind_mask() {
        let m = KindMask::VERTEX | KindMask::EDGE;
        assert!(m.contains(PrimitiveKind::Vertex));
        assert!(m.contains(PrimitiveKind::Edge));
        assert!(!m.contains(PrimitiveKind::Cell));
        assert!(KindMask::ALL.contains(PrimitiveKind::Face));
    }

    #[test]
    fn dof_type_mask() {
        let flag = DoFType::INNER | DoFType::NEUMANN;
        assert!(DoFType::INNER.matches(flag));
        assert!(!DoFType::DIRICHLET.matches(flag));
        assert!(DoFType::DIRICHLET.matches(DoFType::ALL));
    }

    #[test]
    fn primitive_serde_roundtrip() {
        let face = Primitive::Face(Face::new(
            pid(9),
            &[pid(1), pid(2), pid(3)],
            &[pid(4), pid(5), pid(6)],
            [[0.0, 0.0, 0.0], [1.0, 0.0, 0.0], [0.0, 1.0, 0.0]],
        ));
        let bytes = bincode::serialize(&face).unwrap();
        let back: Primitive = bincode::deserialize(&bytes).unwrap();
        assert_eq!(back.id(), pid(9));
        assert_eq!(back.kind(), PrimitiveKind::Face);
        assert_eq!(back.neighbor_ids(PrimitiveKind::Edge), &[pid(4), pid(5), pid(6)]);
    }
}
