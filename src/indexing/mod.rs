//! Structured per-level indexing on macro primitives.

pub mod embedding;
pub mod layout;
pub mod micro;
pub mod optimization;

pub use embedding::Embedding;
pub use layout::{
    cell_dofs, cell_index, edge_dofs, edge_index, face_dofs, face_index, level_width,
    micro_edges_per_edge, num_vertex_dofs_cell, num_vertex_dofs_edge, num_vertex_dofs_face, Idx3,
};
pub use micro::{
    cell_elements, cell_elements_touching, face_elements, face_elements_touching, MicroCell,
    MicroCellType, MicroFace, MicroFaceType,
};
