//! Pluggable smoothing strategies over the element-loop operator.

use crate::communication::Communicator;
use crate::data::Scalar;
use crate::functions::P1Function;
use crate::operators::kernels::ElementKernel;
use crate::operators::ElementwiseOperator;
use crate::primitives::DoFType;
use crate::storage::DistributedStorage;
use std::rc::Rc;

/// One in-place smoothing sweep of `x` towards `A x = b`.
pub trait Smoother<T: Scalar, C: Communicator, Op> {
    fn smooth(&self, op: &Op, x: &P1Function<T, C>, b: &P1Function<T, C>, level: u32, flags: DoFType);
}

/// Hybrid Gauss-Seidel: sequential within each primitive, Jacobi-like
/// across primitive borders of the same dimension.
#[derive(Copy, Clone, Debug, Default)]
pub struct GaussSeidel;

impl<T: Scalar, C: Communicator, K: ElementKernel> Smoother<T, C, ElementwiseOperator<T, C, K>>
    for GaussSeidel
{
    fn smooth(
        &self,
        op: &ElementwiseOperator<T, C, K>,
        x: &P1Function<T, C>,
        b: &P1Function<T, C>,
        level: u32,
        flags: DoFType,
    ) {
        op.smooth_gs(x, b, level, flags);
    }
}

/// Successive over-relaxation with a fixed relaxation factor.
#[derive(Copy, Clone, Debug)]
pub struct Sor {
    pub omega: f64,
}

impl<T: Scalar, C: Communicator, K: ElementKernel> Smoother<T, C, ElementwiseOperator<T, C, K>>
    for Sor
{
    fn smooth(
        &self,
        op: &ElementwiseOperator<T, C, K>,
        x: &P1Function<T, C>,
        b: &P1Function<T, C>,
        level: u32,
        flags: DoFType,
    ) {
        op.smooth_sor(x, b, level, flags, self.omega);
    }
}

/// Damped Jacobi through an internal double buffer.
pub struct Jacobi<T: Scalar, C: Communicator> {
    omega: f64,
    tmp: P1Function<T, C>,
}

impl<T: Scalar, C: Communicator> Jacobi<T, C> {
    pub fn new(
        name: impl Into<String>,
        storage: Rc<DistributedStorage<C>>,
        min_level: u32,
        max_level: u32,
        omega: f64,
    ) -> Self {
        let tmp = P1Function::new(
            format!("{}_tmp", name.into()),
            storage,
            min_level,
            max_level,
        );
        Jacobi { omega, tmp }
    }

    pub fn omega(&self) -> f64 {
        self.omega
    }
}

impl<T: Scalar, C: Communicator, K: ElementKernel> Smoother<T, C, ElementwiseOperator<T, C, K>>
    for Jacobi<T, C>
{
    fn smooth(
        &self,
        op: &ElementwiseOperator<T, C, K>,
        x: &P1Function<T, C>,
        b: &P1Function<T, C>,
        level: u32,
        flags: DoFType,
    ) {
        op.smooth_jacobi(&self.tmp, x, b, level, flags, self.omega);
        x.assign(&[T::one()], &[&self.tmp], level, flags);
        x.sync_up(level);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::communication::NoComm;
    use crate::operators::kernels::LaplaceKernel;
    use crate::operators::UpdateType;
    use crate::storage::SetupStorage;

    fn unit_square() -> Rc<DistributedStorage<NoComm>> {
        let vertices = vec![
            [0.0, 0.0, 0.0],
            [1.0, 0.0, 0.0],
            [1.0, 1.0, 0.0],
            [0.0, 1.0, 0.0],
        ];
        let setup = SetupStorage::from_triangles(&vertices, &[[0, 1, 2], [0, 2, 3]]).unwrap();
        DistributedStorage::from_setup(&setup, NoComm)
    }

    fn residual_norm(
        op: &ElementwiseOperator<f64, NoComm, LaplaceKernel>,
        storage: &Rc<DistributedStorage<NoComm>>,
        x: &P1Function<f64, NoComm>,
        b: &P1Function<f64, NoComm>,
        level: u32,
    ) -> f64 {
        let au: P1Function<f64, NoComm> =
            P1Function::new("au_probe", Rc::clone(storage), level, level);
        let r: P1Function<f64, NoComm> =
            P1Function::new("r_probe", Rc::clone(storage), level, level);
        op.apply(x, &au, level, DoFType::INNER, UpdateType::Replace);
        r.assign(&[1.0, -1.0], &[b, &au], level, DoFType::INNER);
        r.dot(&r, level, DoFType::INNER).sqrt()
    }

    #[test]
    fn sor_with_unit_relaxation_equals_gauss_seidel() {
        let storage = unit_square();
        let level = 3;
        let op = ElementwiseOperator::new(
            "laplace",
            Rc::clone(&storage),
            LaplaceKernel,
            level,
            level,
        );
        let xa: P1Function<f64, NoComm> = P1Function::new("xa", Rc::clone(&storage), level, level);
        let xb: P1Function<f64, NoComm> = P1Function::new("xb", Rc::clone(&storage), level, level);
        let b: P1Function<f64, NoComm> = P1Function::new("b", Rc::clone(&storage), level, level);
        b.interpolate(|p| p[0] + p[1], level, DoFType::INNER);
        xa.interpolate(|p| p[0] * p[1], level, DoFType::ALL);
        xb.assign(&[1.0], &[&xa], level, DoFType::ALL);
        GaussSeidel.smooth(&op, &xa, &b, level, DoFType::INNER);
        Sor { omega: 1.0 }.smooth(&op, &xb, &b, level, DoFType::INNER);
        let diff: P1Function<f64, NoComm> =
            P1Function::new("diff", Rc::clone(&storage), level, level);
        diff.assign(&[1.0, -1.0], &[&xa, &xb], level, DoFType::ALL);
        let err = diff.dot(&diff, level, DoFType::ALL);
        assert!(err < 1e-26, "err = {err}");
    }

    #[test]
    fn jacobi_smoother_reduces_the_residual() {
        let storage = unit_square();
        let level = 3;
        let op = ElementwiseOperator::new(
            "laplace",
            Rc::clone(&storage),
            LaplaceKernel,
            level,
            level,
        );
        let smoother = Jacobi::new("jacobi", Rc::clone(&storage), level, level, 0.66);
        let x: P1Function<f64, NoComm> = P1Function::new("x", Rc::clone(&storage), level, level);
        let b: P1Function<f64, NoComm> = P1Function::new("b", Rc::clone(&storage), level, level);
        b.interpolate(|p| (p[0] - p[1]).cos(), level, DoFType::INNER);
        x.set_zero(level);
        let r0 = residual_norm(&op, &storage, &x, &b, level);
        for _ in 0..15 {
            smoother.smooth(&op, &x, &b, level, DoFType::INNER);
        }
        let r1 = residual_norm(&op, &storage, &x, &b, level);
        assert!(r1 < 0.5 * r0, "r0 = {r0}, r1 = {r1}");
    }
}
