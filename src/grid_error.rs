//! GridError: unified error type for hiergrid public APIs.
//!
//! Recoverable failures (partition imbalance, missing primitives, failed
//! serialization round trips, non-convergence bookkeeping) are reported
//! through this enum. Contract violations (unregistered data handles,
//! malformed topology, forbidden src/dst aliasing) panic at the point of
//! detection instead; they indicate bugs that must be fixed, not handled.

use crate::primitives::PrimitiveId;
use thiserror::Error;

/// Unified error type for hiergrid operations.
#[derive(Debug, Error)]
pub enum GridError {
    /// Attempted to construct a `PrimitiveId` from the reserved value zero.
    #[error("PrimitiveId must be non-zero (0 is reserved as invalid/sentinel)")]
    InvalidPrimitiveId,

    /// Lookup of a primitive that is neither locally owned nor ghosted.
    /// Indicates a load-balancing or halo-setup bug on the caller's side.
    #[error("primitive `{0}` is neither local nor ghosted on this rank")]
    PrimitiveNotFound(PrimitiveId),

    /// A refinement level outside the range a function/operator was built for.
    #[error("level {level} outside configured range [{min}, {max}]")]
    LevelOutOfRange { level: u32, min: u32, max: u32 },

    /// Greedy load balancing could not meet the balance tolerance.
    #[error("partition unbalanced: max load {max_load}, min load {min_load}, ratio {ratio:.4} > tolerance {tolerance:.4}")]
    Unbalanced {
        max_load: u64,
        min_load: u64,
        ratio: f64,
        tolerance: f64,
    },

    /// A persistent data column has no serialize/deserialize hooks.
    #[error("data column `{0}` is declared persistent but implements no serialization hooks")]
    MissingSerialization(String),

    /// Byte-level (de)serialization of primitive or payload state failed.
    #[error("serialization failure for primitive `{primitive}`: {reason}")]
    Serialization {
        primitive: PrimitiveId,
        reason: String,
    },

    /// Communication-layer failure while exchanging with a neighbor rank.
    #[error("communication failure with rank {neighbor}: {reason}")]
    Comm { neighbor: usize, reason: String },

    /// Topology validation failed (asymmetric neighbor links etc.).
    #[error("topology invariant violated: {0}")]
    Topology(String),
}
