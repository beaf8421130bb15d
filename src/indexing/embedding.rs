//! Barycentric embedding of sub-primitive lattices into container lattices.
//!
//! A lower-dimensional primitive (vertex, edge, face) shares its corner
//! vertices with every adjacent higher-dimensional primitive. Matching
//! corner vertex IDs yields a map from sub-primitive local corner indices to
//! container local corner indices, and that map extends linearly to whole
//! lattices through integer barycentric weights: a sub-primitive lattice
//! point with weights `w` lands at `sum_i w_i * e_{m_i}` in the container,
//! where `e_0 = (0,0,0)`, `e_1 = (1,0,0)`, `e_2 = (0,1,0)`, `e_3 = (0,0,1)`.
//!
//! The map is injective and respects refinement, so one `Embedding` serves
//! every level. `pull_back` inverts it on its image, which is how receivers
//! decide whether a container lattice point lies on them.

use crate::indexing::layout::{micro_edges_per_edge, Idx3};
use crate::primitives::{Primitive, PrimitiveKind};

/// Linear lattice map from a sub-primitive into an adjacent container.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Embedding {
    /// Container-local corner index of each sub-primitive corner.
    map: [usize; 4],
    sub_corners: usize,
    container_corners: usize,
}

impl Embedding {
    /// Builds the embedding of `sub` into `container` by corner vertex ID
    /// matching. Returns `None` if `sub` is not a side of `container`.
    pub fn new(sub: &Primitive, container: &Primitive) -> Option<Embedding> {
        let sub_ids = sub.corner_vertex_ids();
        let container_corners = container.corner_vertex_ids().len();
        if sub_ids.len() >= container_corners {
            return None;
        }
        let mut map = [0usize; 4];
        for (i, &id) in sub_ids.iter().enumerate() {
            map[i] = container.local_index_of(PrimitiveKind::Vertex, id)?;
        }
        Some(Embedding {
            map,
            sub_corners: sub_ids.len(),
            container_corners,
        })
    }

    /// Container lattice coordinates of the sub-primitive point `p`.
    pub fn push_forward(&self, level: u32, p: Idx3) -> Idx3 {
        let n = micro_edges_per_edge(level);
        // Integer barycentric weights of p on the sub-primitive; they sum
        // to n.
        let mut w = [0usize; 4];
        let used = self.sub_corners - 1;
        let interior: usize = p[..used].iter().sum();
        debug_assert!(interior <= n, "point {p:?} off the level-{level} lattice");
        w[0] = n - interior;
        w[1..=used].copy_from_slice(&p[..used]);

        let mut q = [0usize; 3];
        for i in 0..self.sub_corners {
            let m = self.map[i];
            if m > 0 {
                q[m - 1] += w[i];
            }
        }
        q
    }

    /// Sub-primitive coordinates of the container point `q`, if `q` lies on
    /// the embedded image.
    pub fn pull_back(&self, level: u32, q: Idx3) -> Option<Idx3> {
        let n = micro_edges_per_edge(level);
        let axes = self.container_corners - 1;
        // Barycentric weights of q in the container.
        let mut u = [0usize; 4];
        let mut total = 0usize;
        for k in 0..3 {
            if k < axes {
                total += q[k];
                u[k + 1] = q[k];
            } else if q[k] != 0 {
                return None;
            }
        }
        if total > n {
            return None;
        }
        u[0] = n - total;

        // On the image, exactly the mapped corners may carry weight.
        let mut w = [0usize; 4];
        let mut claimed = 0usize;
        for i in 0..self.sub_corners {
            w[i] = u[self.map[i]];
            claimed += w[i];
        }
        if claimed != n {
            return None;
        }
        let mut p = [0usize; 3];
        p[..self.sub_corners - 1].copy_from_slice(&w[1..self.sub_corners]);
        Some(p)
    }
}
