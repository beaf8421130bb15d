//! Fully replicated mesh assembly prior to distribution.
//!
//! `SetupStorage` turns raw simplex connectivity into the complete primitive
//! graph: vertices, deduplicated shared edges/faces, the element-bearing
//! top primitives, symmetric neighbor back-links, and the boundary
//! classification. Every rank builds the identical setup storage; the
//! target-rank map then drives construction of the per-rank
//! [`DistributedStorage`](crate::storage::DistributedStorage).

use crate::grid_error::GridError;
use crate::primitives::kinds::{Edge, Vertex};
use crate::primitives::{Cell, DoFType, Face, Point3, Primitive, PrimitiveId, PrimitiveKind};
use hashbrown::HashMap;
use std::collections::BTreeMap;

/// Globally replicated mesh with a target-rank assignment.
#[derive(Debug)]
pub struct SetupStorage {
    primitives: BTreeMap<PrimitiveId, Primitive>,
    target_ranks: HashMap<PrimitiveId, usize>,
    has_cells: bool,
}

struct IdAllocator(u64);

impl IdAllocator {
    fn next(&mut self) -> PrimitiveId {
        self.0 += 1;
        PrimitiveId::new(self.0)
    }
}

impl SetupStorage {
    /// Builds a 2D mesh from vertex coordinates and triangle connectivity.
    ///
    /// Shared edges are deduplicated; boundary edges (one incident face) and
    /// their vertices default to Dirichlet classification.
    ///
    /// # Errors
    /// `GridError::Topology` on out-of-range vertex indices, degenerate
    /// triangles, or non-manifold edges (more than two incident faces).
    pub fn from_triangles(
        vertices: &[Point3],
        triangles: &[[usize; 3]],
    ) -> Result<SetupStorage, GridError> {
        let mut ids = IdAllocator(0);
        let mut verts = make_vertices(vertices, &mut ids);
        let vertex_ids: Vec<PrimitiveId> = verts.keys().copied().collect();
        let mut edges: BTreeMap<PrimitiveId, Edge> = BTreeMap::new();
        let mut edge_lookup: BTreeMap<(PrimitiveId, PrimitiveId), PrimitiveId> = BTreeMap::new();
        let mut faces: BTreeMap<PrimitiveId, Face> = BTreeMap::new();

        for tri in triangles {
            let vids = simplex_vertex_ids::<3>(tri, &vertex_ids)?;
            let coords = [
                verts[&vids[0]].coordinates,
                verts[&vids[1]].coordinates,
                verts[&vids[2]].coordinates,
            ];
            let eids = [
                intern_edge(vids[0], vids[1], &mut ids, &mut verts, &mut edges, &mut edge_lookup),
                intern_edge(vids[0], vids[2], &mut ids, &mut verts, &mut edges, &mut edge_lookup),
                intern_edge(vids[1], vids[2], &mut ids, &mut verts, &mut edges, &mut edge_lookup),
            ];
            let face_id = ids.next();
            faces.insert(face_id, Face::new(face_id, &vids, &eids, coords));
            for vid in vids {
                if let Some(v) = verts.get_mut(&vid) {
                    v.neighbor_faces.push(face_id);
                }
            }
            for eid in eids {
                if let Some(e) = edges.get_mut(&eid) {
                    e.neighbor_faces.push(face_id);
                }
            }
        }

        // Boundary: an edge with exactly one incident face, and everything
        // beneath it.
        for e in edges.values_mut() {
            match e.neighbor_faces.len() {
                1 => {
                    e.on_boundary = true;
                    e.dof_type = DoFType::DIRICHLET;
                }
                2 => {}
                n => {
                    return Err(GridError::Topology(format!(
                        "edge {} has {n} incident faces (non-manifold)",
                        e.id
                    )))
                }
            }
        }
        propagate_vertex_boundary(&mut verts, edges.values().map(|e| (&e.vertex_ids[..], e.on_boundary)));

        Ok(assemble(verts, edges, faces, BTreeMap::new(), false))
    }

    /// Builds a 3D mesh from vertex coordinates and tetrahedron
    /// connectivity.
    ///
    /// # Errors
    /// `GridError::Topology` on out-of-range vertex indices, degenerate
    /// tetrahedra, or non-manifold faces.
    pub fn from_tetrahedra(
        vertices: &[Point3],
        tetrahedra: &[[usize; 4]],
    ) -> Result<SetupStorage, GridError> {
        let mut ids = IdAllocator(0);
        let mut verts = make_vertices(vertices, &mut ids);
        let vertex_ids: Vec<PrimitiveId> = verts.keys().copied().collect();
        let mut edges: BTreeMap<PrimitiveId, Edge> = BTreeMap::new();
        let mut edge_lookup: BTreeMap<(PrimitiveId, PrimitiveId), PrimitiveId> = BTreeMap::new();
        let mut faces: BTreeMap<PrimitiveId, Face> = BTreeMap::new();
        let mut face_lookup: BTreeMap<[PrimitiveId; 3], PrimitiveId> = BTreeMap::new();
        let mut cells: BTreeMap<PrimitiveId, Cell> = BTreeMap::new();

        for tet in tetrahedra {
            let vids = simplex_vertex_ids::<4>(tet, &vertex_ids)?;
            let coords = [
                verts[&vids[0]].coordinates,
                verts[&vids[1]].coordinates,
                verts[&vids[2]].coordinates,
                verts[&vids[3]].coordinates,
            ];
            let mut eids = [PrimitiveId::new(u64::MAX); 6];
            for (slot, (a, b)) in [(0, 1), (0, 2), (0, 3), (1, 2), (1, 3), (2, 3)]
                .into_iter()
                .enumerate()
            {
                eids[slot] = intern_edge(
                    vids[a],
                    vids[b],
                    &mut ids,
                    &mut verts,
                    &mut edges,
                    &mut edge_lookup,
                );
            }
            // Face k is opposite corner k.
            let mut fids = [PrimitiveId::new(u64::MAX); 4];
            for (slot, tri) in [[1, 2, 3], [0, 2, 3], [0, 1, 3], [0, 1, 2]]
                .into_iter()
                .enumerate()
            {
                fids[slot] = intern_face(
                    [vids[tri[0]], vids[tri[1]], vids[tri[2]]],
                    &mut ids,
                    &mut verts,
                    &mut edges,
                    &mut faces,
                    &mut face_lookup,
                    &edge_lookup,
                );
            }
            let cell_id = ids.next();
            cells.insert(cell_id, Cell::new(cell_id, &vids, &eids, &fids, coords));
            for vid in vids {
                if let Some(v) = verts.get_mut(&vid) {
                    v.neighbor_cells.push(cell_id);
                }
            }
            for eid in eids {
                if let Some(e) = edges.get_mut(&eid) {
                    e.neighbor_cells.push(cell_id);
                }
            }
            for fid in fids {
                if let Some(f) = faces.get_mut(&fid) {
                    f.neighbor_cells.push(cell_id);
                }
            }
        }

        for f in faces.values_mut() {
            match f.neighbor_cells.len() {
                1 => {
                    f.on_boundary = true;
                    f.dof_type = DoFType::DIRICHLET;
                }
                2 => {}
                n => {
                    return Err(GridError::Topology(format!(
                        "face {} has {n} incident cells (non-manifold)",
                        f.id
                    )))
                }
            }
        }
        // Edges and vertices inherit the boundary flag from incident faces.
        let boundary_faces: Vec<[PrimitiveId; 3]> = faces
            .values()
            .filter(|f| f.on_boundary)
            .map(|f| f.vertex_ids)
            .collect();
        for e in edges.values_mut() {
            let on = boundary_faces
                .iter()
                .any(|fv| e.vertex_ids.iter().all(|v| fv.contains(v)));
            if on {
                e.on_boundary = true;
                e.dof_type = DoFType::DIRICHLET;
            }
        }
        propagate_vertex_boundary(&mut verts, edges.values().map(|e| (&e.vertex_ids[..], e.on_boundary)));

        Ok(assemble(verts, edges, faces, cells, true))
    }

    pub fn has_global_cells(&self) -> bool {
        self.has_cells
    }

    /// The element-bearing primitive kind of this mesh.
    pub fn top_kind(&self) -> PrimitiveKind {
        if self.has_cells {
            PrimitiveKind::Cell
        } else {
            PrimitiveKind::Face
        }
    }

    pub fn primitive(&self, id: PrimitiveId) -> Option<&Primitive> {
        self.primitives.get(&id)
    }

    /// All primitives in ascending ID order.
    pub fn primitives(&self) -> impl Iterator<Item = &Primitive> {
        self.primitives.values()
    }

    pub fn num_primitives(&self) -> usize {
        self.primitives.len()
    }

    pub fn num_primitives_of_kind(&self, kind: PrimitiveKind) -> usize {
        self.primitives.values().filter(|p| p.kind() == kind).count()
    }

    pub fn target_rank(&self, id: PrimitiveId) -> usize {
        self.target_ranks.get(&id).copied().unwrap_or(0)
    }

    /// Applies a load-balancing assignment.
    ///
    /// # Panics
    /// Panics if the assignment misses a primitive.
    pub fn apply_assignment(&mut self, assignment: &HashMap<PrimitiveId, usize>) {
        for id in self.primitives.keys() {
            match assignment.get(id) {
                Some(&rank) => {
                    self.target_ranks.insert(*id, rank);
                }
                None => panic!("assignment misses primitive {id}"),
            }
        }
    }

    /// Reclassifies boundary primitives matched by `pred` as Neumann.
    pub fn mark_neumann(&mut self, pred: impl Fn(&Primitive) -> bool) {
        let ids: Vec<PrimitiveId> = self
            .primitives
            .values()
            .filter(|p| p.on_boundary() && pred(p))
            .map(|p| p.id())
            .collect();
        for id in ids {
            if let Some(p) = self.primitives.get_mut(&id) {
                match p {
                    Primitive::Vertex(v) => v.dof_type = DoFType::NEUMANN,
                    Primitive::Edge(e) => e.dof_type = DoFType::NEUMANN,
                    Primitive::Face(f) => f.dof_type = DoFType::NEUMANN,
                    Primitive::Cell(_) => {}
                }
            }
        }
    }

    pub(crate) fn take_parts(
        self,
    ) -> (BTreeMap<PrimitiveId, Primitive>, HashMap<PrimitiveId, usize>, bool) {
        (self.primitives, self.target_ranks, self.has_cells)
    }
}

fn make_vertices(coords: &[Point3], ids: &mut IdAllocator) -> BTreeMap<PrimitiveId, Vertex> {
    coords
        .iter()
        .map(|&c| {
            let id = ids.next();
            (
                id,
                Vertex {
                    id,
                    coordinates: c,
                    neighbor_edges: Vec::new(),
                    neighbor_faces: Vec::new(),
                    neighbor_cells: Vec::new(),
                    on_boundary: false,
                    dof_type: DoFType::INNER,
                },
            )
        })
        .collect()
}

fn simplex_vertex_ids<const N: usize>(
    corners: &[usize; N],
    vertex_ids: &[PrimitiveId],
) -> Result<[PrimitiveId; N], GridError> {
    let mut out = [PrimitiveId::new(u64::MAX); N];
    for (slot, &idx) in corners.iter().enumerate() {
        let id = vertex_ids.get(idx).copied().ok_or_else(|| {
            GridError::Topology(format!(
                "simplex references vertex index {idx}, mesh has {}",
                vertex_ids.len()
            ))
        })?;
        if out[..slot].contains(&id) {
            return Err(GridError::Topology(format!(
                "degenerate simplex: vertex index {idx} repeated"
            )));
        }
        out[slot] = id;
    }
    Ok(out)
}

fn intern_edge(
    a: PrimitiveId,
    b: PrimitiveId,
    ids: &mut IdAllocator,
    verts: &mut BTreeMap<PrimitiveId, Vertex>,
    edges: &mut BTreeMap<PrimitiveId, Edge>,
    edge_lookup: &mut BTreeMap<(PrimitiveId, PrimitiveId), PrimitiveId>,
) -> PrimitiveId {
    let key = if a < b { (a, b) } else { (b, a) };
    if let Some(&eid) = edge_lookup.get(&key) {
        return eid;
    }
    let eid = ids.next();
    let coords = [verts[&key.0].coordinates, verts[&key.1].coordinates];
    edges.insert(
        eid,
        Edge {
            id: eid,
            vertex_ids: [key.0, key.1],
            coordinates: coords,
            neighbor_faces: Vec::new(),
            neighbor_cells: Vec::new(),
            on_boundary: false,
            dof_type: DoFType::INNER,
        },
    );
    edge_lookup.insert(key, eid);
    for vid in [key.0, key.1] {
        if let Some(v) = verts.get_mut(&vid) {
            v.neighbor_edges.push(eid);
        }
    }
    eid
}

#[allow(clippy::too_many_arguments)]
fn intern_face(
    mut vids: [PrimitiveId; 3],
    ids: &mut IdAllocator,
    verts: &mut BTreeMap<PrimitiveId, Vertex>,
    edges: &mut BTreeMap<PrimitiveId, Edge>,
    faces: &mut BTreeMap<PrimitiveId, Face>,
    face_lookup: &mut BTreeMap<[PrimitiveId; 3], PrimitiveId>,
    edge_lookup: &BTreeMap<(PrimitiveId, PrimitiveId), PrimitiveId>,
) -> PrimitiveId {
    vids.sort();
    if let Some(&fid) = face_lookup.get(&vids) {
        return fid;
    }
    let fid = ids.next();
    let coords = [
        verts[&vids[0]].coordinates,
        verts[&vids[1]].coordinates,
        verts[&vids[2]].coordinates,
    ];
    let eids = [
        edge_lookup[&(vids[0], vids[1])],
        edge_lookup[&(vids[0], vids[2])],
        edge_lookup[&(vids[1], vids[2])],
    ];
    faces.insert(fid, Face::new(fid, &vids, &eids, coords));
    face_lookup.insert(vids, fid);
    for vid in vids {
        if let Some(v) = verts.get_mut(&vid) {
            v.neighbor_faces.push(fid);
        }
    }
    for eid in eids {
        if let Some(e) = edges.get_mut(&eid) {
            e.neighbor_faces.push(fid);
        }
    }
    fid
}

fn propagate_vertex_boundary<'a>(
    verts: &mut BTreeMap<PrimitiveId, Vertex>,
    edge_flags: impl Iterator<Item = (&'a [PrimitiveId], bool)>,
) {
    let mut boundary_vertices: Vec<PrimitiveId> = Vec::new();
    for (vids, on_boundary) in edge_flags {
        if on_boundary {
            boundary_vertices.extend_from_slice(vids);
        }
    }
    for vid in boundary_vertices {
        if let Some(v) = verts.get_mut(&vid) {
            v.on_boundary = true;
            v.dof_type = DoFType::DIRICHLET;
        }
    }
}

fn assemble(
    verts: BTreeMap<PrimitiveId, Vertex>,
    edges: BTreeMap<PrimitiveId, Edge>,
    faces: BTreeMap<PrimitiveId, Face>,
    cells: BTreeMap<PrimitiveId, Cell>,
    has_cells: bool,
) -> SetupStorage {
    let mut primitives: BTreeMap<PrimitiveId, Primitive> = BTreeMap::new();
    for (id, mut v) in verts {
        v.neighbor_edges.sort();
        v.neighbor_faces.sort();
        v.neighbor_cells.sort();
        primitives.insert(id, Primitive::Vertex(v));
    }
    for (id, mut e) in edges {
        e.neighbor_faces.sort();
        e.neighbor_cells.sort();
        primitives.insert(id, Primitive::Edge(e));
    }
    for (id, mut f) in faces {
        f.neighbor_cells.sort();
        primitives.insert(id, Primitive::Face(f));
    }
    for (id, c) in cells {
        primitives.insert(id, Primitive::Cell(c));
    }
    let target_ranks = primitives.keys().map(|&id| (id, 0usize)).collect();
    SetupStorage {
        primitives,
        target_ranks,
        has_cells,
    }
}
