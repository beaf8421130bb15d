//! On-the-fly element-loop operator application and smoothing.

use crate::communication::{interior_lattice_points, lattice_index, Communicator};
use crate::data::Scalar;
use crate::functions::{lattice_coordinate, P1Function};
use crate::indexing::layout::Idx3;
use crate::indexing::micro::{cell_elements, cell_elements_touching, face_elements, face_elements_touching};
use crate::indexing::Embedding;
use crate::operators::kernels::ElementKernel;
use crate::operators::{LinearOperator, UpdateType};
use crate::primitives::{DoFType, Primitive, PrimitiveId, PrimitiveKind};
use crate::storage::DistributedStorage;
use hashbrown::{HashMap, HashSet};
use std::cell::RefCell;
use std::rc::Rc;

#[inline]
fn scalar<T: Scalar>(v: f64) -> T {
    T::from(v).unwrap_or_else(|| unreachable!("f64 converts into any nodal scalar"))
}

/// Runs the additive application pipeline shared by the element-loop and
/// stencil operators.
///
/// `local` computes `y_top = A_local x_top` over one element-bearing
/// primitive's lattice. The partial sums are then gathered onto the DoF
/// owners, re-synchronized, and written into `dst` at `flags`-matching
/// interior points.
pub(crate) fn apply_via_scratch<T: Scalar, C: Communicator>(
    storage: &DistributedStorage<C>,
    scratch: &P1Function<T, C>,
    src: &P1Function<T, C>,
    dst: &P1Function<T, C>,
    level: u32,
    flags: DoFType,
    update: UpdateType,
    local: impl Fn(&Primitive, &[T], &mut [T]),
) {
    assert!(
        src.handle() != dst.handle(),
        "operator application cannot alias source and destination"
    );
    src.sync_up(level);

    let top = storage.top_kind();
    for prim in storage.owned(top) {
        let x = src.memory(prim.id());
        let x = x.borrow();
        let y = scratch.memory(prim.id());
        let mut y = y.borrow_mut();
        let yv = y.values_mut(level);
        yv.fill(T::zero());
        local(prim, x.values(level), yv);
    }
    for kind in PrimitiveKind::ALL {
        if kind.dimension() < top.dimension() {
            for prim in storage.owned(kind) {
                scratch.memory(prim.id()).borrow_mut().fill(level, T::zero());
            }
        }
    }
    scratch.additive_to_owners(level);
    scratch.sync_up(level);

    for kind in PrimitiveKind::ALL {
        for prim in storage.owned(kind) {
            if !prim.dof_type().matches(flags) {
                continue;
            }
            let s = scratch.memory(prim.id());
            let s = s.borrow();
            let d = dst.memory(prim.id());
            let mut d = d.borrow_mut();
            let sv = s.values(level);
            let dv = d.values_mut(level);
            for p in interior_lattice_points(kind, level) {
                let i = lattice_index(kind, level, p);
                dv[i] = match update {
                    UpdateType::Replace => sv[i],
                    UpdateType::Add => dv[i] + sv[i],
                };
            }
        }
    }
    dst.sync_up(level);
}

/// Matrix-free operator assembled from per-element kernel matrices.
///
/// Application walks every micro element of every owned element-bearing
/// primitive; smoothing assembles single DoF rows on demand from the
/// elements touching the row's lattice point.
pub struct ElementwiseOperator<T: Scalar, C: Communicator, K: ElementKernel> {
    storage: Rc<DistributedStorage<C>>,
    kernel: K,
    min_level: u32,
    max_level: u32,
    scratch: P1Function<T, C>,
    inverse_diagonal: P1Function<T, C>,
    diagonal_ready: RefCell<HashSet<u32>>,
    ghost_slots: RefCell<HashMap<(PrimitiveId, PrimitiveId, u32), Rc<HashMap<Idx3, usize>>>>,
}

impl<T: Scalar, C: Communicator, K: ElementKernel> ElementwiseOperator<T, C, K> {
    pub fn new(
        name: impl Into<String>,
        storage: Rc<DistributedStorage<C>>,
        kernel: K,
        min_level: u32,
        max_level: u32,
    ) -> Self {
        let name = name.into();
        let scratch = P1Function::new(
            format!("{name}_scratch"),
            Rc::clone(&storage),
            min_level,
            max_level,
        );
        let inverse_diagonal = P1Function::new(
            format!("{name}_inverse_diagonal"),
            Rc::clone(&storage),
            min_level,
            max_level,
        );
        ElementwiseOperator {
            storage,
            kernel,
            min_level,
            max_level,
            scratch,
            inverse_diagonal,
            diagonal_ready: RefCell::new(HashSet::new()),
            ghost_slots: RefCell::new(HashMap::new()),
        }
    }

    pub fn storage(&self) -> &Rc<DistributedStorage<C>> {
        &self.storage
    }

    pub fn min_level(&self) -> u32 {
        self.min_level
    }

    pub fn max_level(&self) -> u32 {
        self.max_level
    }

    pub fn kernel(&self) -> &K {
        &self.kernel
    }

    /// `y_top += A_local x_top` over the elements of one top primitive.
    pub(crate) fn local_matvec(&self, prim: &Primitive, xv: &[T], yv: &mut [T], level: u32) {
        match prim.kind() {
            PrimitiveKind::Face => {
                for elem in face_elements(level) {
                    let vs = elem.vertices();
                    let idx = vs.map(|v| lattice_index(PrimitiveKind::Face, level, v));
                    let corners = vs.map(|v| lattice_coordinate(prim, level, v));
                    let k = self.kernel.triangle_matrix(&corners);
                    for i in 0..3 {
                        for j in 0..3 {
                            yv[idx[i]] = yv[idx[i]] + scalar::<T>(k[i][j]) * xv[idx[j]];
                        }
                    }
                }
            }
            PrimitiveKind::Cell => {
                for elem in cell_elements(level) {
                    let vs = elem.vertices();
                    let idx = vs.map(|v| lattice_index(PrimitiveKind::Cell, level, v));
                    let corners = vs.map(|v| lattice_coordinate(prim, level, v));
                    let k = self.kernel.tetrahedron_matrix(&corners);
                    for i in 0..4 {
                        for j in 0..4 {
                            yv[idx[i]] = yv[idx[i]] + scalar::<T>(k[i][j]) * xv[idx[j]];
                        }
                    }
                }
            }
            kind => panic!("{kind:?} bears no elements"),
        }
    }

    fn ghost_slot_map(
        &self,
        sender: &Primitive,
        receiver: &Primitive,
        level: u32,
    ) -> Rc<HashMap<Idx3, usize>> {
        let key = (sender.id(), receiver.id(), level);
        if let Some(map) = self.ghost_slots.borrow().get(&key) {
            return Rc::clone(map);
        }
        let map: HashMap<Idx3, usize> = crate::communication::ghost_points(sender, receiver, level)
            .into_iter()
            .enumerate()
            .map(|(slot, u)| (u, slot))
            .collect();
        let map = Rc::new(map);
        self.ghost_slots.borrow_mut().insert(key, Rc::clone(&map));
        map
    }

    /// Diagonal entry and off-diagonal dot product of one DoF row.
    ///
    /// Requires `x` to be synchronized with refreshed halos at `level`.
    fn row(&self, prim: &Primitive, p: Idx3, level: u32, x: &P1Function<T, C>) -> (f64, T) {
        let xm = x.memory(prim.id());
        let xm = xm.borrow();
        let xv = xm.values(level);
        let mut diag = 0.0;
        let mut off = T::zero();
        let top = self.storage.top_kind();

        if prim.kind() == top {
            self.accumulate_row_from(prim, p, level, &mut diag, &mut off, |u| {
                xv[lattice_index(top, level, u)]
            });
            return (diag, off);
        }

        for &sid in prim.neighbor_ids(top) {
            let sender = self
                .storage
                .primitive(sid)
                .unwrap_or_else(|e| panic!("row assembly over incomplete ghost layer: {e}"));
            let embed = Embedding::new(prim, sender)
                .unwrap_or_else(|| panic!("{} is not a side of {sid}", prim.id()));
            let q = embed.push_forward(level, p);
            let slots = self.ghost_slot_map(sender, prim, level);
            let ghost = xm.halo(level, sid).unwrap_or_else(|| {
                panic!("smoothing before halo refresh: no ghosts from {sid}")
            });
            self.accumulate_row_from(sender, q, level, &mut diag, &mut off, |u| {
                match embed.pull_back(level, u) {
                    Some(r) => xv[lattice_index(prim.kind(), level, r)],
                    None => ghost[slots[&u]],
                }
            });
        }
        (diag, off)
    }

    /// Adds the contributions of all elements of `sender` touching lattice
    /// point `q` to one row. `value_at` resolves neighbor values.
    fn accumulate_row_from(
        &self,
        sender: &Primitive,
        q: Idx3,
        level: u32,
        diag: &mut f64,
        off: &mut T,
        value_at: impl Fn(Idx3) -> T,
    ) {
        match sender.kind() {
            PrimitiveKind::Face => {
                for elem in face_elements_touching(level, q) {
                    let vs = elem.vertices();
                    let corners = vs.map(|v| lattice_coordinate(sender, level, v));
                    let k = self.kernel.triangle_matrix(&corners);
                    let i = vs
                        .iter()
                        .position(|&v| v == q)
                        .unwrap_or_else(|| unreachable!("touching element misses its point"));
                    for j in 0..3 {
                        if j == i {
                            *diag += k[i][i];
                        } else {
                            *off = *off + scalar::<T>(k[i][j]) * value_at(vs[j]);
                        }
                    }
                }
            }
            PrimitiveKind::Cell => {
                for elem in cell_elements_touching(level, q) {
                    let vs = elem.vertices();
                    let corners = vs.map(|v| lattice_coordinate(sender, level, v));
                    let k = self.kernel.tetrahedron_matrix(&corners);
                    let i = vs
                        .iter()
                        .position(|&v| v == q)
                        .unwrap_or_else(|| unreachable!("touching element misses its point"));
                    for j in 0..4 {
                        if j == i {
                            *diag += k[i][i];
                        } else {
                            *off = *off + scalar::<T>(k[i][j]) * value_at(vs[j]);
                        }
                    }
                }
            }
            kind => panic!("{kind:?} bears no elements"),
        }
    }

    /// One successive-over-relaxation sweep, in place.
    ///
    /// Primitives are visited in ascending dimension; a full halo exchange
    /// between the dimension classes makes updated values visible before the
    /// next class reads them. Same-class couplings across primitive borders
    /// see the values from the previous exchange, giving the usual hybrid
    /// Gauss-Seidel behavior of distributed sweeps.
    pub fn smooth_sor(
        &self,
        x: &P1Function<T, C>,
        b: &P1Function<T, C>,
        level: u32,
        flags: DoFType,
        omega: f64,
    ) {
        x.sync_up(level);
        x.refresh_halos(level);
        let w = scalar::<T>(omega);
        let one_minus_w = scalar::<T>(1.0 - omega);
        for kind in PrimitiveKind::ALL {
            for prim in self.storage.owned(kind) {
                if !prim.dof_type().matches(flags) {
                    continue;
                }
                let bm = b.memory(prim.id());
                let bm = bm.borrow();
                for p in interior_lattice_points(kind, level) {
                    let i = lattice_index(kind, level, p);
                    let (diag, off) = self.row(prim, p, level, x);
                    let xm = x.memory(prim.id());
                    let mut xm = xm.borrow_mut();
                    let xv = xm.values_mut(level);
                    let candidate = (bm.values(level)[i] - off) * scalar::<T>(1.0 / diag);
                    xv[i] = one_minus_w * xv[i] + w * candidate;
                }
            }
            x.sync_up(level);
            x.refresh_halos(level);
        }
    }

    /// One Gauss-Seidel sweep, in place.
    pub fn smooth_gs(&self, x: &P1Function<T, C>, b: &P1Function<T, C>, level: u32, flags: DoFType) {
        self.smooth_sor(x, b, level, flags, 1.0);
    }

    /// One damped Jacobi step `dst = src + omega D^-1 (b - A src)` on
    /// `flags`-matching DoFs. `dst` and `src` must differ; other DoFs of
    /// `dst` are left untouched.
    pub fn smooth_jacobi(
        &self,
        dst: &P1Function<T, C>,
        src: &P1Function<T, C>,
        b: &P1Function<T, C>,
        level: u32,
        flags: DoFType,
        omega: f64,
    ) {
        self.ensure_inverse_diagonal(level);
        self.apply(src, dst, level, flags, UpdateType::Replace);
        let w = scalar::<T>(omega);
        for kind in PrimitiveKind::ALL {
            for prim in self.storage.owned(kind) {
                if !prim.dof_type().matches(flags) {
                    continue;
                }
                let sm = src.memory(prim.id());
                let sm = sm.borrow();
                let bm = b.memory(prim.id());
                let bm = bm.borrow();
                let inv = self.inverse_diagonal.memory(prim.id());
                let inv = inv.borrow();
                let dm = dst.memory(prim.id());
                let mut dm = dm.borrow_mut();
                let dv = dm.values_mut(level);
                for p in interior_lattice_points(kind, level) {
                    let i = lattice_index(kind, level, p);
                    let residual = bm.values(level)[i] - dv[i];
                    dv[i] = sm.values(level)[i] + w * inv.values(level)[i] * residual;
                }
            }
        }
        dst.sync_up(level);
    }

    /// The operator diagonal, inverted, assembled lazily per level.
    pub fn inverse_diagonal(&self) -> &P1Function<T, C> {
        &self.inverse_diagonal
    }

    pub fn ensure_inverse_diagonal(&self, level: u32) {
        if self.diagonal_ready.borrow().contains(&level) {
            return;
        }
        let top = self.storage.top_kind();
        for prim in self.storage.owned(top) {
            let d = self.inverse_diagonal.memory(prim.id());
            let mut d = d.borrow_mut();
            let dv = d.values_mut(level);
            dv.fill(T::zero());
            match top {
                PrimitiveKind::Face => {
                    for elem in face_elements(level) {
                        let vs = elem.vertices();
                        let corners = vs.map(|v| lattice_coordinate(prim, level, v));
                        let k = self.kernel.triangle_matrix(&corners);
                        for i in 0..3 {
                            let idx = lattice_index(top, level, vs[i]);
                            dv[idx] = dv[idx] + scalar::<T>(k[i][i]);
                        }
                    }
                }
                PrimitiveKind::Cell => {
                    for elem in cell_elements(level) {
                        let vs = elem.vertices();
                        let corners = vs.map(|v| lattice_coordinate(prim, level, v));
                        let k = self.kernel.tetrahedron_matrix(&corners);
                        for i in 0..4 {
                            let idx = lattice_index(top, level, vs[i]);
                            dv[idx] = dv[idx] + scalar::<T>(k[i][i]);
                        }
                    }
                }
                kind => panic!("{kind:?} bears no elements"),
            }
        }
        for kind in PrimitiveKind::ALL {
            if kind.dimension() < top.dimension() {
                for prim in self.storage.owned(kind) {
                    self.inverse_diagonal
                        .memory(prim.id())
                        .borrow_mut()
                        .fill(level, T::zero());
                }
            }
        }
        self.inverse_diagonal.additive_to_owners(level);
        self.inverse_diagonal.sync_up(level);
        for kind in PrimitiveKind::ALL {
            for prim in self.storage.owned(kind) {
                let m = self.inverse_diagonal.memory(prim.id());
                let mut m = m.borrow_mut();
                for v in m.values_mut(level) {
                    *v = T::one() / *v;
                }
            }
        }
        self.diagonal_ready.borrow_mut().insert(level);
    }
}

impl<T: Scalar, C: Communicator, K: ElementKernel> ElementwiseOperator<T, C, K> {
    /// Applies `dst = A src` (or `dst += A src`) at `level`, writing DoFs
    /// matching `flags`. Leaves `dst` fully synchronized. Collective.
    pub fn apply(
        &self,
        src: &P1Function<T, C>,
        dst: &P1Function<T, C>,
        level: u32,
        flags: DoFType,
        update: UpdateType,
    ) {
        apply_via_scratch(
            &self.storage,
            &self.scratch,
            src,
            dst,
            level,
            flags,
            update,
            |prim, xv, yv| self.local_matvec(prim, xv, yv, level),
        );
    }
}

impl<T: Scalar, C: Communicator, K: ElementKernel> LinearOperator<T, C>
    for ElementwiseOperator<T, C, K>
{
    fn apply(
        &self,
        src: &P1Function<T, C>,
        dst: &P1Function<T, C>,
        level: u32,
        flags: DoFType,
        update: UpdateType,
    ) {
        ElementwiseOperator::apply(self, src, dst, level, flags, update);
    }
}
