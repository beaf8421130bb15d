//! # hiergrid
//!
//! hiergrid is a matrix-free finite element framework on hierarchically
//! refined simplicial meshes. A coarse mesh of vertices, edges, faces and
//! (in 3D) cells is the only stored topology; every primitive carries a
//! structured lattice of `2^L` micro edges per macro edge at each level `L`,
//! so nodal data, operators and grid transfers all run on uniform index
//! arithmetic instead of stored connectivity.
//!
//! ## Features
//! - Setup mesh construction from triangle or tetrahedron lists, boundary
//!   flagging, and round-robin or greedy first-fit load balancing onto ranks
//! - Distributed storage with a one-deep ghost layer, typed data columns,
//!   and primitive migration between ranks
//! - Nodal `P1` functions with overwrite, ghost, and additive halo exchange
//! - Matrix-free element-loop and constant-stencil operators, hybrid
//!   Gauss-Seidel / SOR / Jacobi smoothing, and sparse matrix emission
//! - Geometric multigrid with linear prolongation and full-weighting
//!   restriction over the level hierarchy
//! - Pluggable communication backends: serial, in-process threads, and MPI
//!   behind the `mpi-support` feature
//!
//! ## Usage
//! Add `hiergrid` as a dependency in your `Cargo.toml` and enable features
//! as needed:
//!
//! ```toml
//! [dependencies]
//! hiergrid = "0.1"
//! # Optional features:
//! # features = ["mpi-support","rayon","check-invariants"]
//! ```

pub mod communication;
pub mod data;
pub mod debug_invariants;
pub mod functions;
pub mod grid_error;
pub mod indexing;
pub mod operators;
pub mod primitives;
pub mod solvers;
pub mod storage;

pub use grid_error::GridError;

/// A convenient prelude to import the most-used traits & types:
pub mod prelude {
    pub use crate::communication::Communicator;
    #[cfg(feature = "mpi-support")]
    pub use crate::communication::MpiComm;
    pub use crate::communication::{LocalCommunicationMode, NoComm, ThreadComm};
    pub use crate::data::{DataHandle, FunctionMemory, Scalar};
    pub use crate::functions::{lattice_coordinate, P1Function};
    pub use crate::grid_error::GridError;
    pub use crate::indexing::Embedding;
    pub use crate::operators::{
        emit_matrix, ConstantStencilOperator, ElementKernel, ElementwiseOperator, LaplaceKernel,
        LinearOperator, MassKernel, MatrixSink, TripletSink, UpdateType,
    };
    pub use crate::primitives::{
        DoFType, KindMask, Point3, Primitive, PrimitiveId, PrimitiveKind,
    };
    pub use crate::solvers::{
        prolongate, restrict, restrict_inject, GaussSeidel, GeometricMultigrid, Jacobi, Smoother,
        SolveReport, Solver, Sor,
    };
    pub use crate::storage::{DistributedStorage, SetupStorage};
}
