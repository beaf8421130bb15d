//! `PrimitiveId`: a strong, zero-cost handle for mesh primitives.
//!
//! Every primitive (vertex, edge, face, cell) is represented by a unique,
//! opaque identifier. `PrimitiveId` wraps a nonzero `u64` to enforce at
//! compile- and runtime that 0 is reserved as an invalid or sentinel value.
//!
//! The type is `repr(transparent)`, so it has the same ABI and alignment as
//! `u64` and can travel over MPI exactly like one.

use std::{fmt, num::NonZeroU64};

#[derive(
    Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize,
)]
#[repr(transparent)]
pub struct PrimitiveId(NonZeroU64);

impl PrimitiveId {
    /// Creates a new `PrimitiveId` from a raw `u64` value.
    ///
    /// # Panics
    ///
    /// Panics if `raw == 0`. We reserve 0 as an invalid or sentinel value.
    #[inline]
    pub fn new(raw: u64) -> Self {
        PrimitiveId(NonZeroU64::new(raw).expect("PrimitiveId must be non-zero"))
    }

    /// Returns the inner `u64` value of this `PrimitiveId`.
    #[inline]
    pub const fn get(self) -> u64 {
        self.0.get()
    }
}

/// Display as `PrimitiveId(raw_value)`.
impl fmt::Debug for PrimitiveId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("PrimitiveId").field(&self.get()).finish()
    }
}

/// Prints the numeric ID without any wrapper text.
impl fmt::Display for PrimitiveId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.get())
    }
}

/// MPI interop: `PrimitiveId` is sent over the wire as a plain `u64`.
#[cfg(feature = "mpi-support")]
unsafe impl mpi::datatype::Equivalence for PrimitiveId {
    type Out = <u64 as mpi::datatype::Equivalence>::Out;

    fn equivalent_datatype() -> Self::Out {
        u64::equivalent_datatype()
    }
}

#[cfg(test)]
mod layout_tests {
    //! Compile-time assertion that `PrimitiveId` has the same size as `u64`.
    use super::*;
    use static_assertions::{assert_eq_align, assert_eq_size};

    // If this fails, our repr(transparent) guarantee is broken!
    assert_eq_size!(PrimitiveId, u64);
    assert_eq_align!(PrimitiveId, u64);
}
