//! Primitive-attached data: typed handles, type-erased columns, and the
//! per-level DoF memories of grid functions.

pub mod columns;
pub mod function_memory;
pub mod handle;

pub use function_memory::{num_lattice_dofs, FunctionMemory, LevelMemory};
pub use handle::{DataHandle, Persistence, PrimitiveDataHandling};

use serde::{de::DeserializeOwned, Serialize};

/// DoF scalar type: IEEE float with the traits the storage and
/// communication layers need.
pub trait Scalar:
    num_traits::Float
    + bytemuck::Pod
    + Serialize
    + DeserializeOwned
    + Default
    + std::fmt::Debug
    + Send
    + Sync
    + 'static
{
}

impl<T> Scalar for T where
    T: num_traits::Float
        + bytemuck::Pod
        + Serialize
        + DeserializeOwned
        + Default
        + std::fmt::Debug
        + Send
        + Sync
        + 'static
{
}
