//! Inter-primitive and inter-rank data exchange.
//!
//! The [`Communicator`] trait hides the transport: [`NoComm`] for serial
//! runs, [`ThreadComm`] for in-process multi-rank tests, and an MPI backend
//! behind the `mpi-support` feature. [`pack_info`] defines what each of the
//! three exchange families moves; [`BufferedCommunicator`] walks whole waves
//! over a function data column.

pub mod buffered;
pub mod communicator;
pub mod pack_info;

pub use buffered::{BufferedCommunicator, LocalCommunicationMode};
pub use communicator::{Communicator, NoComm, ThreadComm, Wait};
pub use pack_info::{
    ghost_points, interior_lattice_points, lattice_index, lattice_points, pack, unpack, PackFamily,
};

#[cfg(feature = "mpi-support")]
pub use communicator::MpiComm;
