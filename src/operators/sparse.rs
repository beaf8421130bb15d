//! Sparse matrix emission for inspection and external solvers.
//!
//! The matrix-free operators never hold a global matrix; this module walks
//! the same element loops once and streams the entries into a caller-chosen
//! sink. Emission runs on a single rank against a global DoF numbering that
//! concatenates the primitives' interior lattices in kind-major, ascending
//! ID order.

use crate::communication::{interior_lattice_points, lattice_index, Communicator};
use crate::data::{num_lattice_dofs, Scalar};
use crate::functions::lattice_coordinate;
use crate::indexing::micro::{cell_elements, face_elements};
use crate::indexing::Embedding;
use crate::operators::elementwise::ElementwiseOperator;
use crate::operators::kernels::ElementKernel;
use crate::primitives::{PrimitiveId, PrimitiveKind};
use crate::storage::DistributedStorage;
use hashbrown::HashMap;
use itertools::Itertools;

/// Receives matrix entries. Repeated `(row, col)` pairs must be summed.
pub trait MatrixSink {
    fn push(&mut self, row: usize, col: usize, value: f64);
}

/// Collects raw coordinate triplets.
#[derive(Default)]
pub struct TripletSink {
    pub triplets: Vec<(usize, usize, f64)>,
}

impl MatrixSink for TripletSink {
    fn push(&mut self, row: usize, col: usize, value: f64) {
        self.triplets.push((row, col, value));
    }
}

impl TripletSink {
    /// Triplets with duplicate `(row, col)` pairs summed, in row-major order.
    pub fn compressed(&self) -> Vec<(usize, usize, f64)> {
        self.triplets
            .iter()
            .copied()
            .sorted_by_key(|&(r, c, _)| (r, c))
            .coalesce(|a, b| {
                if (a.0, a.1) == (b.0, b.1) {
                    Ok((a.0, a.1, a.2 + b.2))
                } else {
                    Err((a, b))
                }
            })
            .collect()
    }
}

/// Global numbering of the interior lattice DoFs of all primitives.
pub struct DoFNumbering {
    offsets: HashMap<PrimitiveId, usize>,
    total: usize,
}

impl DoFNumbering {
    pub fn new<C: Communicator>(storage: &DistributedStorage<C>, level: u32) -> Self {
        let mut offsets = HashMap::new();
        let mut total = 0;
        for kind in PrimitiveKind::ALL {
            for &id in storage.owned_ids(kind) {
                offsets.insert(id, total);
                total += interior_lattice_points(kind, level).count();
            }
        }
        DoFNumbering { offsets, total }
    }

    pub fn num_dofs(&self) -> usize {
        self.total
    }

    /// Global index of the `interior_slot`-th interior lattice point of
    /// primitive `id`.
    pub fn index(&self, id: PrimitiveId, interior_slot: usize) -> usize {
        self.offsets[&id] + interior_slot
    }
}

/// Streams every element matrix entry of `op` at `level` into `sink`.
///
/// # Panics
/// Panics when run on more than one rank; the numbering is not globally
/// coordinated.
pub fn emit_matrix<T: Scalar, C: Communicator, K: ElementKernel>(
    op: &ElementwiseOperator<T, C, K>,
    level: u32,
    sink: &mut impl MatrixSink,
) -> DoFNumbering {
    let storage = op.storage();
    assert_eq!(storage.num_ranks(), 1, "matrix emission is single-rank");
    let numbering = DoFNumbering::new(storage, level);
    let top = storage.top_kind();
    for prim in storage.owned(top) {
        // Resolve every top-lattice point to its owning primitive's DoF.
        let mut table = vec![usize::MAX; num_lattice_dofs(top, level)];
        for (slot, r) in interior_lattice_points(top, level).enumerate() {
            table[lattice_index(top, level, r)] = numbering.index(prim.id(), slot);
        }
        for kind in PrimitiveKind::ALL {
            if kind.dimension() >= top.dimension() {
                continue;
            }
            for &nid in prim.neighbor_ids(kind) {
                let sub = storage
                    .primitive(nid)
                    .unwrap_or_else(|e| panic!("incomplete closure: {e}"));
                let embed = Embedding::new(sub, prim)
                    .unwrap_or_else(|| panic!("{nid} is not a side of {}", prim.id()));
                for (slot, r) in interior_lattice_points(kind, level).enumerate() {
                    let q = embed.push_forward(level, r);
                    table[lattice_index(top, level, q)] = numbering.index(nid, slot);
                }
            }
        }
        match top {
            PrimitiveKind::Face => {
                for elem in face_elements(level) {
                    let vs = elem.vertices();
                    let idx = vs.map(|v| table[lattice_index(top, level, v)]);
                    let corners = vs.map(|v| lattice_coordinate(prim, level, v));
                    let k = op.kernel().triangle_matrix(&corners);
                    for i in 0..3 {
                        for j in 0..3 {
                            sink.push(idx[i], idx[j], k[i][j]);
                        }
                    }
                }
            }
            PrimitiveKind::Cell => {
                for elem in cell_elements(level) {
                    let vs = elem.vertices();
                    let idx = vs.map(|v| table[lattice_index(top, level, v)]);
                    let corners = vs.map(|v| lattice_coordinate(prim, level, v));
                    let k = op.kernel().tetrahedron_matrix(&corners);
                    for i in 0..4 {
                        for j in 0..4 {
                            sink.push(idx[i], idx[j], k[i][j]);
                        }
                    }
                }
            }
            kind => panic!("{kind:?} bears no elements"),
        }
    }
    numbering
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::communication::NoComm;
    use crate::functions::P1Function;
    use crate::operators::kernels::LaplaceKernel;
    use crate::operators::UpdateType;
    use crate::primitives::DoFType;
    use crate::storage::SetupStorage;
    use approx::assert_relative_eq;
    use std::rc::Rc;

    #[test]
    fn emitted_triplets_reproduce_the_matvec() {
        let vertices = vec![
            [0.0, 0.0, 0.0],
            [1.0, 0.0, 0.0],
            [1.0, 1.0, 0.0],
            [0.0, 1.0, 0.0],
        ];
        let setup = SetupStorage::from_triangles(&vertices, &[[0, 1, 2], [0, 2, 3]]).unwrap();
        let storage = DistributedStorage::from_setup(&setup, NoComm);
        let level = 2;
        let op = ElementwiseOperator::new(
            "laplace",
            Rc::clone(&storage),
            LaplaceKernel,
            level,
            level,
        );
        let x: P1Function<f64, NoComm> = P1Function::new("x", Rc::clone(&storage), level, level);
        let y: P1Function<f64, NoComm> = P1Function::new("y", Rc::clone(&storage), level, level);
        x.interpolate(|p| (2.0 * p[0] - p[1]).exp(), level, DoFType::ALL);
        op.apply(&x, &y, level, DoFType::ALL, UpdateType::Replace);

        let mut sink = TripletSink::default();
        let numbering = emit_matrix(&op, level, &mut sink);
        let n = numbering.num_dofs();
        assert_eq!(n, 25);

        let mut xv = vec![0.0; n];
        let mut expected = vec![0.0; n];
        for kind in PrimitiveKind::ALL {
            for prim in storage.owned(kind) {
                let xm = x.memory(prim.id());
                let xm = xm.borrow();
                let ym = y.memory(prim.id());
                let ym = ym.borrow();
                for (slot, p) in interior_lattice_points(kind, level).enumerate() {
                    let i = lattice_index(kind, level, p);
                    xv[numbering.index(prim.id(), slot)] = xm.values(level)[i];
                    expected[numbering.index(prim.id(), slot)] = ym.values(level)[i];
                }
            }
        }
        let mut yv = vec![0.0; n];
        for (r, c, v) in sink.triplets {
            yv[r] += v * xv[c];
        }
        for (got, want) in yv.iter().zip(&expected) {
            assert_relative_eq!(*got, *want, epsilon = 1e-12);
        }
    }

    #[test]
    fn laplace_triplets_are_symmetric_with_zero_row_sums() {
        let vertices = vec![
            [0.0, 0.0, 0.0],
            [1.0, 0.0, 0.0],
            [0.0, 1.0, 0.0],
            [0.0, 0.0, 1.0],
        ];
        let setup = SetupStorage::from_tetrahedra(&vertices, &[[0, 1, 2, 3]]).unwrap();
        let storage = DistributedStorage::from_setup(&setup, NoComm);
        let level = 2;
        let op: ElementwiseOperator<f64, _, _> = ElementwiseOperator::new(
            "laplace",
            Rc::clone(&storage),
            LaplaceKernel,
            level,
            level,
        );
        let mut sink = TripletSink::default();
        let numbering = emit_matrix(&op, level, &mut sink);
        let n = numbering.num_dofs();
        let compressed = sink.compressed();
        assert!(compressed.windows(2).all(|w| (w[0].0, w[0].1) < (w[1].0, w[1].1)));
        let mut dense = vec![vec![0.0; n]; n];
        for (r, c, v) in compressed {
            dense[r][c] = v;
        }
        for r in 0..n {
            assert_relative_eq!(dense[r].iter().sum::<f64>(), 0.0, epsilon = 1e-12);
            for c in 0..n {
                assert_relative_eq!(dense[r][c], dense[c][r], epsilon = 1e-12);
            }
        }
    }
}
