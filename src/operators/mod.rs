//! Matrix-free linear operators over P1 functions.
//!
//! Operators never assemble a global matrix. [`ElementwiseOperator`] loops
//! the micro elements of each element-bearing primitive and applies local
//! kernel matrices on the fly; [`ConstantStencilOperator`] exploits affine
//! macro geometry to reuse one local matrix per element class. A sparse
//! matrix view of any operator can still be emitted through [`MatrixSink`]
//! for inspection or external solvers.

pub mod elementwise;
pub mod kernels;
pub mod sparse;
pub mod stencil;

pub use elementwise::ElementwiseOperator;
pub use kernels::{ElementKernel, LaplaceKernel, MassKernel};
pub use sparse::{emit_matrix, DoFNumbering, MatrixSink, TripletSink};
pub use stencil::ConstantStencilOperator;

use crate::communication::Communicator;
use crate::data::Scalar;
use crate::functions::P1Function;
use crate::primitives::DoFType;

/// Whether an application overwrites or accumulates into the destination.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum UpdateType {
    Replace,
    Add,
}

/// A distributed linear operator `y = A x` on one-level P1 functions.
pub trait LinearOperator<T: Scalar, C: Communicator> {
    /// Applies the operator at `level`, writing DoFs matching `flags` in
    /// `dst`. Leaves `dst` fully synchronized. Collective.
    fn apply(
        &self,
        src: &P1Function<T, C>,
        dst: &P1Function<T, C>,
        level: u32,
        flags: DoFType,
        update: UpdateType,
    );
}
