//! Smoothers, inter-level transfers, and the multigrid solver.

pub mod multigrid;
pub mod smoothers;

pub use multigrid::{prolongate, restrict, restrict_inject, GeometricMultigrid};
pub use smoothers::{GaussSeidel, Jacobi, Smoother, Sor};

use crate::communication::Communicator;
use crate::data::Scalar;
use crate::functions::P1Function;

/// Outcome of a [`Solver::solve`] call.
#[derive(Debug, Clone, Copy)]
pub struct SolveReport {
    /// Iterations (cycles) actually run.
    pub iterations: usize,
    /// Euclidean residual norm over the unknown DoFs after the last iteration.
    pub final_residual: f64,
}

/// Iterative solution of `op x = b` on one level, in place in `x`.
pub trait Solver<T: Scalar, C: Communicator, Op> {
    fn solve(
        &self,
        op: &Op,
        x: &P1Function<T, C>,
        b: &P1Function<T, C>,
        level: u32,
    ) -> SolveReport;
}
