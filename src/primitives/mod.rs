//! Mesh primitives: identifiers, the four simplex kinds, and their metrics.

pub mod geometry;
pub mod id;
pub mod kinds;

pub use geometry::{
    tet_basis_gradients, tet_insphere_radius, tet_inward_normal, tet_signed_volume, tet_volume,
    triangle_area,
};
pub use id::PrimitiveId;
pub use kinds::{Cell, DoFType, Edge, Face, KindMask, Point3, Primitive, PrimitiveKind, Vertex};
