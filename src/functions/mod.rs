//! Piecewise-linear finite element functions over the hierarchical grid.
//!
//! A [`P1Function`] owns one nodal value per lattice point of every owned
//! primitive, for every level in its range. Values live in a persistent
//! [`FunctionMemory`] column, so functions survive repartitioning bitwise.
//! All communication with neighboring primitives and ranks goes through the
//! function's [`BufferedCommunicator`].

use crate::communication::{
    BufferedCommunicator, Communicator, LocalCommunicationMode, NoComm, PackFamily,
};
use crate::data::{DataHandle, FunctionMemory, Persistence, PrimitiveDataHandling, Scalar};
use crate::grid_error::GridError;
use crate::communication::{interior_lattice_points, lattice_index, lattice_points};
use crate::indexing::layout::{micro_edges_per_edge, Idx3};
use crate::primitives::{DoFType, KindMask, Point3, Primitive, PrimitiveId, PrimitiveKind};
use crate::storage::DistributedStorage;
use std::cell::RefCell;
use std::marker::PhantomData;
use std::rc::Rc;

/// Physical position of lattice point `p` on `primitive` at `level`.
///
/// The lattice is affine in the primitive's corners: `p / n` are the
/// barycentric weights of corners 1.. and the remainder falls on corner 0.
pub fn lattice_coordinate(primitive: &Primitive, level: u32, p: Idx3) -> Point3 {
    let corners = primitive.corner_coordinates();
    let n = micro_edges_per_edge(level) as f64;
    let c0 = corners[0];
    let mut x = c0;
    for (i, c) in corners.iter().enumerate().skip(1) {
        let w = p[i - 1] as f64 / n;
        for d in 0..3 {
            x[d] += w * (c[d] - c0[d]);
        }
    }
    x
}

struct MemoryHandling<T> {
    min_level: u32,
    max_level: u32,
    _marker: PhantomData<fn() -> T>,
}

impl<T: Scalar> PrimitiveDataHandling<FunctionMemory<T>> for MemoryHandling<T> {
    fn initialize(&self, primitive: &Primitive) -> FunctionMemory<T> {
        FunctionMemory::new(primitive.kind(), self.min_level, self.max_level)
    }

    fn persistence(&self) -> Persistence {
        Persistence::Persistent
    }

    fn serialize(&self, data: &FunctionMemory<T>) -> Result<Vec<u8>, GridError> {
        Ok(bincode::serialize(data).unwrap_or_else(|e| panic!("bincode encode failed: {e}")))
    }

    fn deserialize(
        &self,
        primitive: &Primitive,
        bytes: &[u8],
    ) -> Result<FunctionMemory<T>, GridError> {
        bincode::deserialize(bytes).map_err(|e| GridError::Serialization {
            primitive: primitive.id(),
            reason: e.to_string(),
        })
    }
}

/// A scalar P1 nodal function on levels `min_level..=max_level`.
pub struct P1Function<T: Scalar, C: Communicator = NoComm> {
    name: String,
    storage: Rc<DistributedStorage<C>>,
    handle: DataHandle<FunctionMemory<T>>,
    min_level: u32,
    max_level: u32,
    comm: BufferedCommunicator<T, C>,
}

impl<T: Scalar, C: Communicator> P1Function<T, C> {
    pub fn new(
        name: impl Into<String>,
        storage: Rc<DistributedStorage<C>>,
        min_level: u32,
        max_level: u32,
    ) -> Self {
        assert!(min_level <= max_level, "empty level range");
        let name = name.into();
        let handling = Box::new(MemoryHandling::<T> {
            min_level,
            max_level,
            _marker: PhantomData,
        });
        let handle = storage.add_data(name.clone(), KindMask::ALL, handling);
        let comm = BufferedCommunicator::new(Rc::clone(&storage), handle);
        P1Function {
            name,
            storage,
            handle,
            min_level,
            max_level,
            comm,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn storage(&self) -> &Rc<DistributedStorage<C>> {
        &self.storage
    }

    pub fn handle(&self) -> DataHandle<FunctionMemory<T>> {
        self.handle
    }

    pub fn min_level(&self) -> u32 {
        self.min_level
    }

    pub fn max_level(&self) -> u32 {
        self.max_level
    }

    pub fn set_local_communication_mode(&mut self, mode: LocalCommunicationMode) {
        self.comm = BufferedCommunicator::new(Rc::clone(&self.storage), self.handle)
            .with_local_mode(mode);
    }

    /// The value memory attached to owned primitive `id`.
    pub fn memory(&self, id: PrimitiveId) -> Rc<RefCell<FunctionMemory<T>>> {
        self.storage.data(self.handle, id)
    }

    fn owned_matching(&self, flags: DoFType) -> impl Iterator<Item = &Primitive> {
        PrimitiveKind::ALL
            .into_iter()
            .flat_map(|kind| self.storage.owned(kind))
            .filter(move |p| p.dof_type().matches(flags))
    }

    /// Sets the nodal values of all owned DoFs matching `flags` to the
    /// pointwise values of `f`.
    pub fn interpolate(&self, f: impl Fn(Point3) -> T, level: u32, flags: DoFType) {
        for prim in self.owned_matching(flags) {
            let memory = self.memory(prim.id());
            let mut memory = memory.borrow_mut();
            let values = memory.values_mut(level);
            for (i, p) in lattice_points(prim.kind(), level).enumerate() {
                values[i] = f(lattice_coordinate(prim, level, p));
            }
        }
    }

    /// `self <- sum_i scalars[i] * others[i]` on DoFs matching `flags`.
    pub fn assign(&self, scalars: &[T], others: &[&P1Function<T, C>], level: u32, flags: DoFType) {
        assert_eq!(scalars.len(), others.len(), "one scalar per function");
        self.combine(scalars, others, level, flags, false);
    }

    /// `self <- self + sum_i scalars[i] * others[i]` on DoFs matching `flags`.
    pub fn add(&self, scalars: &[T], others: &[&P1Function<T, C>], level: u32, flags: DoFType) {
        assert_eq!(scalars.len(), others.len(), "one scalar per function");
        self.combine(scalars, others, level, flags, true);
    }

    fn combine(
        &self,
        scalars: &[T],
        others: &[&P1Function<T, C>],
        level: u32,
        flags: DoFType,
        accumulate: bool,
    ) {
        for prim in self.owned_matching(flags) {
            let sources: Vec<Rc<RefCell<FunctionMemory<T>>>> =
                others.iter().map(|o| o.memory(prim.id())).collect();
            let sources: Vec<_> = sources.iter().map(|m| m.borrow()).collect();
            let dst = self.memory(prim.id());
            let mut dst = dst.borrow_mut();
            let values = dst.values_mut(level);
            for i in 0..values.len() {
                let mut acc = if accumulate { values[i] } else { T::zero() };
                for (s, src) in scalars.iter().zip(&sources) {
                    acc = acc + *s * src.values(level)[i];
                }
                values[i] = acc;
            }
        }
    }

    /// Fills all owned lattices at `level` with `value`, every DoF type.
    pub fn fill(&self, value: T, level: u32) {
        for kind in PrimitiveKind::ALL {
            for prim in self.storage.owned(kind) {
                self.memory(prim.id()).borrow_mut().fill(level, value);
            }
        }
    }

    pub fn set_zero(&self, level: u32) {
        self.fill(T::zero(), level);
    }

    /// Global inner product over DoFs matching `flags`.
    ///
    /// Only each primitive's interior lattice points enter the sum, so every
    /// global DoF is counted exactly once despite the closure copies on
    /// higher-dimensional lattices. Collective.
    pub fn dot(&self, other: &P1Function<T, C>, level: u32, flags: DoFType) -> T {
        let mut local = T::zero();
        for prim in self.owned_matching(flags) {
            let a = self.memory(prim.id());
            let b = other.memory(prim.id());
            let a = a.borrow();
            let b = b.borrow();
            let av = a.values(level);
            let bv = b.values(level);
            for p in interior_lattice_points(prim.kind(), level) {
                let i = lattice_index(prim.kind(), level, p);
                local = local + av[i] * bv[i];
            }
        }
        let global = self
            .storage
            .communicator()
            .allreduce_sum(local.to_f64().unwrap_or(f64::NAN));
        T::from(global).unwrap_or_else(T::nan)
    }

    /// Chains the low-to-high overwrite waves so every top-primitive lattice
    /// holds the authoritative values of its closure. Collective.
    pub fn sync_up(&self, level: u32) {
        self.comm.communicate(
            PrimitiveKind::Vertex,
            PrimitiveKind::Edge,
            PackFamily::SyncUp,
            level,
        );
        self.comm.communicate(
            PrimitiveKind::Edge,
            PrimitiveKind::Face,
            PackFamily::SyncUp,
            level,
        );
        if self.storage.has_global_cells() {
            self.comm.communicate(
                PrimitiveKind::Face,
                PrimitiveKind::Cell,
                PackFamily::SyncUp,
                level,
            );
        }
    }

    /// Refreshes the per-sender ghost arrays of every lower-dimensional
    /// primitive from the adjacent top primitives. Requires an up-to-date
    /// [`sync_up`](Self::sync_up). Collective.
    pub fn refresh_halos(&self, level: u32) {
        let top = self.storage.top_kind();
        for kind in PrimitiveKind::ALL {
            if kind.dimension() < top.dimension() {
                self.comm
                    .communicate(top, kind, PackFamily::Halo, level);
            }
        }
    }

    /// Gathers additive contributions from the top-primitive lattices onto
    /// the owning lower-dimensional primitives. The destinations must be
    /// pre-zeroed by the caller. Collective.
    pub fn additive_to_owners(&self, level: u32) {
        let top = self.storage.top_kind();
        for kind in PrimitiveKind::ALL {
            if kind.dimension() < top.dimension() {
                self.comm
                    .communicate(top, kind, PackFamily::Additive, level);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::communication::NoComm;
    use crate::storage::SetupStorage;
    use approx::assert_relative_eq;

    fn unit_square() -> Rc<DistributedStorage<NoComm>> {
        let vertices = vec![
            [0.0, 0.0, 0.0],
            [1.0, 0.0, 0.0],
            [1.0, 1.0, 0.0],
            [0.0, 1.0, 0.0],
        ];
        let triangles = vec![[0, 1, 2], [0, 2, 3]];
        let setup = SetupStorage::from_triangles(&vertices, &triangles).unwrap();
        DistributedStorage::from_setup(&setup, NoComm)
    }

    #[test]
    fn interpolates_linear_functions_exactly() {
        let storage = unit_square();
        let f: P1Function<f64, NoComm> = P1Function::new("f", Rc::clone(&storage), 2, 2);
        f.interpolate(|x| 2.0 * x[0] - x[1] + 0.5, 2, DoFType::ALL);
        for kind in PrimitiveKind::ALL {
            for prim in storage.owned(kind) {
                let memory = f.memory(prim.id());
                let memory = memory.borrow();
                for (i, p) in lattice_points(kind, 2).enumerate() {
                    let x = lattice_coordinate(prim, 2, p);
                    assert_relative_eq!(
                        memory.values(2)[i],
                        2.0 * x[0] - x[1] + 0.5,
                        epsilon = 1e-14
                    );
                }
            }
        }
    }

    #[test]
    fn assign_and_add_are_linear_combinations() {
        let storage = unit_square();
        let a: P1Function<f64, NoComm> = P1Function::new("a", Rc::clone(&storage), 2, 2);
        let b: P1Function<f64, NoComm> = P1Function::new("b", Rc::clone(&storage), 2, 2);
        let c: P1Function<f64, NoComm> = P1Function::new("c", Rc::clone(&storage), 2, 2);
        a.interpolate(|x| x[0], 2, DoFType::ALL);
        b.interpolate(|x| x[1], 2, DoFType::ALL);
        c.assign(&[2.0, 3.0], &[&a, &b], 2, DoFType::ALL);
        c.add(&[1.0], &[&a], 2, DoFType::ALL);
        let probe: P1Function<f64, NoComm> = P1Function::new("probe", Rc::clone(&storage), 2, 2);
        probe.interpolate(|x| 3.0 * x[0] + 3.0 * x[1], 2, DoFType::ALL);
        let diff: P1Function<f64, NoComm> = P1Function::new("diff", Rc::clone(&storage), 2, 2);
        diff.assign(&[1.0, -1.0], &[&c, &probe], 2, DoFType::ALL);
        let err = diff.dot(&diff, 2, DoFType::ALL);
        assert!(err < 1e-24, "err = {err}");
    }

    #[test]
    fn dot_counts_each_dof_once() {
        let storage = unit_square();
        let one: P1Function<f64, NoComm> = P1Function::new("one", Rc::clone(&storage), 2, 2);
        one.interpolate(|_| 1.0, 2, DoFType::ALL);
        // Two faces at level 2 triangulate the square into a 5x5 node grid.
        let total = one.dot(&one, 2, DoFType::ALL);
        assert_relative_eq!(total, 25.0, epsilon = 1e-12);
    }

    #[test]
    fn boundary_flags_select_dirichlet_dofs_only() {
        let storage = unit_square();
        let f: P1Function<f64, NoComm> = P1Function::new("f", Rc::clone(&storage), 2, 2);
        f.set_zero(2);
        f.interpolate(|_| 1.0, 2, DoFType::DIRICHLET);
        let mass = f.dot(&f, 2, DoFType::ALL);
        // 16 boundary nodes on the square's outline.
        assert_relative_eq!(mass, 16.0, epsilon = 1e-12);
    }

    #[test]
    fn survives_serialization_round_trip() {
        let storage = unit_square();
        let f: P1Function<f64, NoComm> = P1Function::new("f", Rc::clone(&storage), 2, 3);
        f.interpolate(|x| x[0] * x[1], 3, DoFType::ALL);
        let handling = MemoryHandling::<f64> {
            min_level: 2,
            max_level: 3,
            _marker: PhantomData,
        };
        let prim = storage.owned(PrimitiveKind::Face).next().unwrap();
        let memory = f.memory(prim.id());
        let bytes = handling.serialize(&memory.borrow()).unwrap();
        let back = handling.deserialize(prim, &bytes).unwrap();
        assert_eq!(back.values(3), memory.borrow().values(3));
    }
}
