//! Typed handles into the storage-owned data registry.

use crate::grid_error::GridError;
use crate::primitives::Primitive;
use std::marker::PhantomData;

/// Lifetime of a data column across repartitioning.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Persistence {
    /// Migrated with the primitive through the handling's serialization
    /// hooks. Registration of a persistent column whose handling lacks the
    /// hooks fails at migration time.
    Persistent,
    /// Dropped on migration and freshly re-initialized on the new owner.
    Volatile,
}

/// Copyable typed index to a registered data column.
///
/// Handles are only meaningful for the storage that issued them; using a
/// handle against a different storage, or a stale handle, panics on access.
pub struct DataHandle<T> {
    pub(crate) index: usize,
    _marker: PhantomData<fn() -> T>,
}

impl<T> DataHandle<T> {
    pub(crate) fn new(index: usize) -> Self {
        DataHandle {
            index,
            _marker: PhantomData,
        }
    }
}

impl<T> Copy for DataHandle<T> {}
impl<T> Clone for DataHandle<T> {
    fn clone(&self) -> Self {
        *self
    }
}
impl<T> std::fmt::Debug for DataHandle<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "DataHandle#{}<{}>", self.index, std::any::type_name::<T>())
    }
}
impl<T> PartialEq for DataHandle<T> {
    fn eq(&self, other: &Self) -> bool {
        self.index == other.index
    }
}
impl<T> Eq for DataHandle<T> {}

/// Per-column behavior: how to create an instance for a primitive and,
/// optionally, how to move it between ranks.
pub trait PrimitiveDataHandling<T> {
    /// Creates the data instance attached to `primitive`.
    fn initialize(&self, primitive: &Primitive) -> T;

    /// Whether instances survive repartitioning.
    fn persistence(&self) -> Persistence {
        Persistence::Volatile
    }

    /// Encodes an instance for migration.
    ///
    /// # Errors
    /// The default declines; persistent columns must override both hooks.
    fn serialize(&self, _data: &T) -> Result<Vec<u8>, GridError> {
        Err(GridError::MissingSerialization(
            std::any::type_name::<T>().to_owned(),
        ))
    }

    /// Decodes an instance on the receiving rank.
    ///
    /// # Errors
    /// The default declines; persistent columns must override both hooks.
    fn deserialize(&self, _primitive: &Primitive, _bytes: &[u8]) -> Result<T, GridError> {
        Err(GridError::MissingSerialization(
            std::any::type_name::<T>().to_owned(),
        ))
    }
}
