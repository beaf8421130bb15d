//! Per-primitive, per-level DoF storage for grid functions.
//!
//! One `FunctionMemory` holds, for each refinement level in its range, the
//! primitive's own structured lattice values plus ghost arrays carrying the
//! lattice points of adjacent element-bearing primitives that border the
//! owned DoFs without lying on the primitive itself. Keeping the ghosts on
//! the reading side means a smoothing sweep over one primitive borrows only
//! this one memory.

use crate::data::Scalar;
use crate::primitives::{PrimitiveId, PrimitiveKind};
use hashbrown::HashMap;
use serde::{Deserialize, Serialize};

/// Number of own vertex DoFs of a primitive of `kind` at `level`.
pub fn num_lattice_dofs(kind: PrimitiveKind, level: u32) -> usize {
    use crate::indexing::layout::*;
    match kind {
        PrimitiveKind::Vertex => 1,
        PrimitiveKind::Edge => num_vertex_dofs_edge(level),
        PrimitiveKind::Face => num_vertex_dofs_face(level),
        PrimitiveKind::Cell => num_vertex_dofs_cell(level),
    }
}

/// Own lattice plus per-sender ghost arrays at one level.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LevelMemory<T> {
    pub(crate) data: Vec<T>,
    pub(crate) halo: HashMap<PrimitiveId, Vec<T>>,
}

impl<T: Scalar> LevelMemory<T> {
    fn new(len: usize) -> Self {
        LevelMemory {
            data: vec![T::zero(); len],
            halo: HashMap::new(),
        }
    }
}

/// All DoF storage of one grid function on one primitive.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FunctionMemory<T> {
    kind: PrimitiveKind,
    min_level: u32,
    max_level: u32,
    levels: Vec<LevelMemory<T>>,
}

impl<T: Scalar> FunctionMemory<T> {
    pub fn new(kind: PrimitiveKind, min_level: u32, max_level: u32) -> Self {
        assert!(min_level <= max_level, "empty level range");
        let levels = (min_level..=max_level)
            .map(|level| LevelMemory::new(num_lattice_dofs(kind, level)))
            .collect();
        FunctionMemory {
            kind,
            min_level,
            max_level,
            levels,
        }
    }

    pub fn kind(&self) -> PrimitiveKind {
        self.kind
    }
    pub fn min_level(&self) -> u32 {
        self.min_level
    }
    pub fn max_level(&self) -> u32 {
        self.max_level
    }

    #[inline]
    fn slot(&self, level: u32) -> usize {
        assert!(
            level >= self.min_level && level <= self.max_level,
            "level {level} outside [{}, {}]",
            self.min_level,
            self.max_level
        );
        (level - self.min_level) as usize
    }

    /// Own lattice values at `level`, in structured index order.
    #[inline]
    pub fn values(&self, level: u32) -> &[T] {
        &self.levels[self.slot(level)].data
    }

    #[inline]
    pub fn values_mut(&mut self, level: u32) -> &mut [T] {
        let slot = self.slot(level);
        &mut self.levels[slot].data
    }

    /// Ghost array received from the element-bearing neighbor `sender`.
    pub fn halo(&self, level: u32, sender: PrimitiveId) -> Option<&[T]> {
        self.levels[self.slot(level)]
            .halo
            .get(&sender)
            .map(Vec::as_slice)
    }

    /// Ghost array for `sender`, created zero-filled at `len` on first use.
    pub fn halo_mut(&mut self, level: u32, sender: PrimitiveId, len: usize) -> &mut [T] {
        let slot = self.slot(level);
        self.levels[slot]
            .halo
            .entry(sender)
            .or_insert_with(|| vec![T::zero(); len])
    }

    pub fn fill(&mut self, level: u32, value: T) {
        self.values_mut(level).fill(value);
    }

    /// Zeroes own values and all ghost arrays at `level`.
    pub fn clear(&mut self, level: u32) {
        let slot = self.slot(level);
        let mem = &mut self.levels[slot];
        mem.data.fill(T::zero());
        for ghost in mem.halo.values_mut() {
            ghost.fill(T::zero());
        }
    }
}
