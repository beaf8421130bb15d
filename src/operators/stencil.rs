//! Stencil operator for affine macro geometry.
//!
//! Within one macro simplex all micro elements of a class are translates of
//! each other, so one kernel matrix per class covers the whole lattice. The
//! application pipeline is identical to the element-loop operator; only the
//! per-element kernel evaluation is replaced by a cached table lookup.

use crate::communication::{lattice_index, Communicator};
use crate::data::Scalar;
use crate::functions::{lattice_coordinate, P1Function};
use crate::indexing::micro::{
    anchors_2d, anchors_3d, MicroCell, MicroCellType, MicroFace, MicroFaceType,
};
use crate::operators::elementwise::apply_via_scratch;
use crate::operators::kernels::ElementKernel;
use crate::operators::{LinearOperator, UpdateType};
use crate::primitives::{DoFType, Primitive, PrimitiveId, PrimitiveKind};
use crate::storage::DistributedStorage;
use hashbrown::HashMap;
use std::cell::RefCell;
use std::rc::Rc;

#[inline]
fn scalar<T: Scalar>(v: f64) -> T {
    T::from(v).unwrap_or_else(|| unreachable!("f64 converts into any nodal scalar"))
}

type FaceTable = [Option<[[f64; 3]; 3]>; 2];
type CellTable = [Option<[[f64; 4]; 4]>; 6];

/// Matrix-free operator with one precomputed kernel matrix per element class
/// and macro primitive.
pub struct ConstantStencilOperator<T: Scalar, C: Communicator, K: ElementKernel> {
    storage: Rc<DistributedStorage<C>>,
    kernel: K,
    scratch: P1Function<T, C>,
    face_tables: RefCell<HashMap<(PrimitiveId, u32), Rc<FaceTable>>>,
    cell_tables: RefCell<HashMap<(PrimitiveId, u32), Rc<CellTable>>>,
}

impl<T: Scalar, C: Communicator, K: ElementKernel> ConstantStencilOperator<T, C, K> {
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
        ConstantStencilOperator {
            storage,
            kernel,
            scratch,
            face_tables: RefCell::new(HashMap::new()),
            cell_tables: RefCell::new(HashMap::new()),
        }
    }

    fn face_table(&self, prim: &Primitive, level: u32) -> Rc<FaceTable> {
        let key = (prim.id(), level);
        if let Some(table) = self.face_tables.borrow().get(&key) {
            return Rc::clone(table);
        }
        let mut table: FaceTable = [None; 2];
        for (c, ty) in MicroFaceType::ALL.into_iter().enumerate() {
            if ty.anchor_budget(level).is_none() {
                continue;
            }
            let probe = MicroFace { ty, anchor: [0, 0, 0] };
            let corners = probe.vertices().map(|v| lattice_coordinate(prim, level, v));
            table[c] = Some(self.kernel.triangle_matrix(&corners));
        }
        let table = Rc::new(table);
        self.face_tables.borrow_mut().insert(key, Rc::clone(&table));
        table
    }

    fn cell_table(&self, prim: &Primitive, level: u32) -> Rc<CellTable> {
        let key = (prim.id(), level);
        if let Some(table) = self.cell_tables.borrow().get(&key) {
            return Rc::clone(table);
        }
        let mut table: CellTable = [None; 6];
        for (c, ty) in MicroCellType::ALL.into_iter().enumerate() {
            if ty.anchor_budget(level).is_none() {
                continue;
            }
            let probe = MicroCell { ty, anchor: [0, 0, 0] };
            let corners = probe.vertices().map(|v| lattice_coordinate(prim, level, v));
            table[c] = Some(self.kernel.tetrahedron_matrix(&corners));
        }
        let table = Rc::new(table);
        self.cell_tables.borrow_mut().insert(key, Rc::clone(&table));
        table
    }

    fn local_matvec(&self, prim: &Primitive, xv: &[T], yv: &mut [T], level: u32) {
        match prim.kind() {
            PrimitiveKind::Face => {
                let table = self.face_table(prim, level);
                for (c, ty) in MicroFaceType::ALL.into_iter().enumerate() {
                    let Some(k) = table[c] else { continue };
                    for anchor in anchors_2d(ty.anchor_budget(level)) {
                        let vs = MicroFace { ty, anchor }.vertices();
                        let idx = vs.map(|v| lattice_index(PrimitiveKind::Face, level, v));
                        for i in 0..3 {
                            for j in 0..3 {
                                yv[idx[i]] = yv[idx[i]] + scalar::<T>(k[i][j]) * xv[idx[j]];
                            }
                        }
                    }
                }
            }
            PrimitiveKind::Cell => {
                let table = self.cell_table(prim, level);
                for (c, ty) in MicroCellType::ALL.into_iter().enumerate() {
                    let Some(k) = table[c] else { continue };
                    for anchor in anchors_3d(ty.anchor_budget(level)) {
                        let vs = MicroCell { ty, anchor }.vertices();
                        let idx = vs.map(|v| lattice_index(PrimitiveKind::Cell, level, v));
                        for i in 0..4 {
                            for j in 0..4 {
                                yv[idx[i]] = yv[idx[i]] + scalar::<T>(k[i][j]) * xv[idx[j]];
                            }
                        }
                    }
                }
            }
            kind => panic!("{kind:?} bears no elements"),
        }
    }
}

impl<T: Scalar, C: Communicator, K: ElementKernel> LinearOperator<T, C>
    for ConstantStencilOperator<T, C, K>
{
    fn apply(
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::communication::NoComm;
    use crate::operators::kernels::LaplaceKernel;
    use crate::operators::ElementwiseOperator;
    use crate::storage::SetupStorage;

    #[test]
    fn matches_the_element_loop_operator() {
        let vertices = vec![
            [0.0, 0.0, 0.0],
            [1.2, 0.1, 0.0],
            [0.9, 1.4, 0.0],
            [-0.2, 0.8, 0.0],
        ];
        let setup = SetupStorage::from_triangles(&vertices, &[[0, 1, 2], [0, 2, 3]]).unwrap();
        let storage = DistributedStorage::from_setup(&setup, NoComm);
        let level = 3;
        let stencil = ConstantStencilOperator::new(
            "stencil",
            Rc::clone(&storage),
            LaplaceKernel,
            level,
            level,
        );
        let loop_op = ElementwiseOperator::new(
            "elementwise",
            Rc::clone(&storage),
            LaplaceKernel,
            level,
            level,
        );
        let x: P1Function<f64, NoComm> = P1Function::new("x", Rc::clone(&storage), level, level);
        let ys: P1Function<f64, NoComm> = P1Function::new("ys", Rc::clone(&storage), level, level);
        let ye: P1Function<f64, NoComm> = P1Function::new("ye", Rc::clone(&storage), level, level);
        x.interpolate(|p| (3.0 * p[0]).cos() + p[1] * p[1], level, DoFType::ALL);
        stencil.apply(&x, &ys, level, DoFType::ALL, UpdateType::Replace);
        loop_op.apply(&x, &ye, level, DoFType::ALL, UpdateType::Replace);
        let diff: P1Function<f64, NoComm> =
            P1Function::new("diff", Rc::clone(&storage), level, level);
        diff.assign(&[1.0, -1.0], &[&ys, &ye], level, DoFType::ALL);
        let err = diff.dot(&diff, level, DoFType::ALL);
        assert!(err < 1e-22, "err = {err}");
    }

    #[test]
    fn matches_the_element_loop_operator_3d() {
        let vertices = vec![
            [0.0, 0.0, 0.0],
            [1.0, 0.0, 0.1],
            [0.0, 1.1, 0.0],
            [0.2, 0.1, 0.9],
        ];
        let setup = SetupStorage::from_tetrahedra(&vertices, &[[0, 1, 2, 3]]).unwrap();
        let storage = DistributedStorage::from_setup(&setup, NoComm);
        let level = 2;
        let stencil = ConstantStencilOperator::new(
            "stencil",
            Rc::clone(&storage),
            LaplaceKernel,
            level,
            level,
        );
        let loop_op = ElementwiseOperator::new(
            "elementwise",
            Rc::clone(&storage),
            LaplaceKernel,
            level,
            level,
        );
        let x: P1Function<f64, NoComm> = P1Function::new("x", Rc::clone(&storage), level, level);
        let ys: P1Function<f64, NoComm> = P1Function::new("ys", Rc::clone(&storage), level, level);
        let ye: P1Function<f64, NoComm> = P1Function::new("ye", Rc::clone(&storage), level, level);
        x.interpolate(|p| p[0] * p[1] + p[2], level, DoFType::ALL);
        stencil.apply(&x, &ys, level, DoFType::ALL, UpdateType::Replace);
        loop_op.apply(&x, &ye, level, DoFType::ALL, UpdateType::Replace);
        let diff: P1Function<f64, NoComm> =
            P1Function::new("diff", Rc::clone(&storage), level, level);
        diff.assign(&[1.0, -1.0], &[&ys, &ye], level, DoFType::ALL);
        let err = diff.dot(&diff, level, DoFType::ALL);
        assert!(err < 1e-22, "err = {err}");
    }
}
