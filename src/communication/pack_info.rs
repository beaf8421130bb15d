//! The three exchange families of the halo protocol.
//!
//! All DoF communication between primitives is one of:
//!
//! - **SyncUp** (overwrite, low to high): a primitive sends its full lattice
//!   to an adjacent higher-dimensional primitive, which writes it at the
//!   embedded positions. Chained Vertex -> Edge -> Face -> Cell, this makes
//!   every top-primitive lattice hold the authoritative values of its whole
//!   closure.
//! - **Halo** (overwrite, top to lower): the element-bearing primitive sends
//!   the lattice points bordering a receiver's owned DoFs that do not lie on
//!   the receiver itself, into a per-sender ghost array on the receiver.
//!   Runs after the SyncUp chain so the sender lattice is authoritative.
//! - **Additive** (top to owner): after an element loop, partial sums at a
//!   receiver-owned position are gathered from every adjacent top primitive
//!   and added onto the owner. The caller pre-zeroes the destination.
//!
//! Pack and unpack are separate passes over scalar buffers, so a wave never
//! aliases a memory it is still reading.

use crate::data::{DataHandle, FunctionMemory, Scalar};
use crate::communication::communicator::Communicator;
use crate::indexing::layout::{
    cell_dofs, cell_index, edge_dofs, edge_index, face_dofs, face_index, micro_edges_per_edge,
    Idx3,
};
use crate::indexing::micro::neighbor_directions;
use crate::indexing::Embedding;
use crate::primitives::{Primitive, PrimitiveKind};
use crate::storage::DistributedStorage;
use hashbrown::HashSet;

/// Which of the three exchange semantics a wave uses.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum PackFamily {
    SyncUp,
    Halo,
    Additive,
}

/// Lattice points of a primitive of `kind`, in linear index order.
pub fn lattice_points(kind: PrimitiveKind, level: u32) -> Box<dyn Iterator<Item = Idx3>> {
    match kind {
        PrimitiveKind::Vertex => Box::new(std::iter::once([0, 0, 0])),
        PrimitiveKind::Edge => Box::new(edge_dofs(level, 0)),
        PrimitiveKind::Face => Box::new(face_dofs(level, 0)),
        PrimitiveKind::Cell => Box::new(cell_dofs(level, 0)),
    }
}

/// Lattice points a primitive of `kind` owns itself: its lattice without
/// the closure copies living on lower-dimensional neighbors.
pub fn interior_lattice_points(kind: PrimitiveKind, level: u32) -> Box<dyn Iterator<Item = Idx3>> {
    match kind {
        PrimitiveKind::Vertex => Box::new(std::iter::once([0, 0, 0])),
        PrimitiveKind::Edge => Box::new(edge_dofs(level, 1)),
        PrimitiveKind::Face => Box::new(face_dofs(level, 1)),
        PrimitiveKind::Cell => Box::new(cell_dofs(level, 1)),
    }
}

/// Linear index of `p` on a primitive of `kind`.
#[inline]
pub fn lattice_index(kind: PrimitiveKind, level: u32, p: Idx3) -> usize {
    match kind {
        PrimitiveKind::Vertex => 0,
        PrimitiveKind::Edge => edge_index(level, p[0]),
        PrimitiveKind::Face => face_index(level, p[0], p[1]),
        PrimitiveKind::Cell => cell_index(level, p[0], p[1], p[2]),
    }
}

fn embedding_of(sub: &Primitive, container: &Primitive) -> Embedding {
    Embedding::new(sub, container).unwrap_or_else(|| {
        panic!(
            "{} is not a side of {}; wave over non-adjacent pair",
            sub.id(),
            container.id()
        )
    })
}

/// Sender-lattice coordinates of the ghost points a `sender` top primitive
/// provides to `receiver`, in the agreed wire order.
///
/// The set contains every micro-edge neighbor of an embedded receiver point
/// that does not itself lie on the receiver, deduplicated in first-visit
/// order. Sender and receiver derive the identical list independently.
pub fn ghost_points(sender: &Primitive, receiver: &Primitive, level: u32) -> Vec<Idx3> {
    let embed = embedding_of(receiver, sender);
    let dirs = neighbor_directions(sender.kind() == PrimitiveKind::Cell);
    let n = micro_edges_per_edge(level) as i64;
    let mut seen: HashSet<Idx3> = HashSet::new();
    let mut out = Vec::new();
    for p in lattice_points(receiver.kind(), level) {
        let q = embed.push_forward(level, p);
        for d in &dirs {
            let u = [
                q[0] as i64 + d[0],
                q[1] as i64 + d[1],
                q[2] as i64 + d[2],
            ];
            if u.iter().any(|&c| c < 0) || u.iter().sum::<i64>() > n {
                continue;
            }
            let u = [u[0] as usize, u[1] as usize, u[2] as usize];
            if embed.pull_back(level, u).is_none() && seen.insert(u) {
                out.push(u);
            }
        }
    }
    out
}

/// Collects the scalars travelling `sender -> receiver` into `buf`.
pub fn pack<T: Scalar, C: Communicator>(
    storage: &DistributedStorage<C>,
    handle: DataHandle<FunctionMemory<T>>,
    family: PackFamily,
    sender: &Primitive,
    receiver: &Primitive,
    level: u32,
    buf: &mut Vec<T>,
) {
    let memory = storage.data(handle, sender.id());
    let memory = memory.borrow();
    let values = memory.values(level);
    match family {
        PackFamily::SyncUp => buf.extend_from_slice(values),
        PackFamily::Halo => {
            for u in ghost_points(sender, receiver, level) {
                buf.push(values[lattice_index(sender.kind(), level, u)]);
            }
        }
        PackFamily::Additive => {
            let embed = embedding_of(receiver, sender);
            for p in lattice_points(receiver.kind(), level) {
                let q = embed.push_forward(level, p);
                buf.push(values[lattice_index(sender.kind(), level, q)]);
            }
        }
    }
}

/// Applies a packed buffer on the receiver.
pub fn unpack<T: Scalar, C: Communicator>(
    storage: &DistributedStorage<C>,
    handle: DataHandle<FunctionMemory<T>>,
    family: PackFamily,
    sender: &Primitive,
    receiver: &Primitive,
    level: u32,
    data: &[T],
) {
    let memory = storage.data(handle, receiver.id());
    let mut memory = memory.borrow_mut();
    match family {
        PackFamily::SyncUp => {
            let embed = embedding_of(sender, receiver);
            let values = memory.values_mut(level);
            for (i, p) in lattice_points(sender.kind(), level).enumerate() {
                let q = embed.push_forward(level, p);
                values[lattice_index(receiver.kind(), level, q)] = data[i];
            }
        }
        PackFamily::Halo => {
            let ghost = memory.halo_mut(level, sender.id(), data.len());
            assert_eq!(ghost.len(), data.len(), "ghost layout disagreement");
            ghost.copy_from_slice(data);
        }
        PackFamily::Additive => {
            let values = memory.values_mut(level);
            assert_eq!(values.len(), data.len());
            for (v, d) in values.iter_mut().zip(data) {
                *v = *v + *d;
            }
        }
    }
}
