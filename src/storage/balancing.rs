//! Load balancing: target-rank assignment for setup-storage primitives.
//!
//! Two strategies: a trivial round-robin over the ID order, and greedy
//! first-fit-decreasing (FFD) bin-packing by DoF weight with an
//! adjacency-aware first pass that tries to co-locate primitives with a
//! neighbor before falling back to the least-loaded rank.

use crate::data::num_lattice_dofs;
use crate::grid_error::GridError;
use crate::primitives::{PrimitiveId, PrimitiveKind};
use crate::storage::SetupStorage;
use hashbrown::HashMap;
use log::debug;
#[cfg(feature = "rayon")]
use rayon::prelude::ParallelSliceMut;
use std::cmp::Reverse;

/// Assigns primitives to ranks in ascending ID order, one at a time.
pub fn round_robin(setup: &SetupStorage, num_ranks: usize) -> HashMap<PrimitiveId, usize> {
    assert!(num_ranks > 0, "number of ranks must be >= 1");
    setup
        .primitives()
        .enumerate()
        .map(|(i, p)| (p.id(), i % num_ranks))
        .collect()
}

/// Greedy FFD assignment weighted by the number of vertex DoFs each
/// primitive carries at `level`.
///
/// Primitives are placed heaviest-first, preferring a rank that already
/// holds one of their neighbors as long as that rank stays under the
/// balance threshold `(1 + epsilon) * total / num_ranks`.
///
/// # Errors
/// `GridError::Unbalanced` if the final max/min load ratio exceeds
/// `1 + epsilon` (plus rounding slack).
pub fn greedy(
    setup: &SetupStorage,
    num_ranks: usize,
    level: u32,
    epsilon: f64,
) -> Result<HashMap<PrimitiveId, usize>, GridError> {
    assert!(num_ranks > 0, "number of ranks must be >= 1");
    let items: Vec<(PrimitiveId, u64)> = setup
        .primitives()
        .map(|p| (p.id(), num_lattice_dofs(p.kind(), level) as u64))
        .collect();
    if items.is_empty() {
        return Ok(HashMap::new());
    }

    let mut order: Vec<usize> = (0..items.len()).collect();
    #[cfg(feature = "rayon")]
    order.par_sort_unstable_by_key(|&i| (Reverse(items[i].1), items[i].0));
    #[cfg(not(feature = "rayon"))]
    order.sort_unstable_by_key(|&i| (Reverse(items[i].1), items[i].0));

    let total: u64 = items.iter().map(|&(_, w)| w).sum();
    let threshold = ((1.0 + epsilon) * (total as f64 / num_ranks as f64)).ceil() as u64;

    let mut loads = vec![0u64; num_ranks];
    let mut assignment: HashMap<PrimitiveId, usize> = HashMap::with_capacity(items.len());

    for &idx in &order {
        let (id, weight) = items[idx];
        let primitive = setup
            .primitive(id)
            .unwrap_or_else(|| panic!("setup storage lost primitive {id}"));

        // First fit: a rank already holding a neighbor, if it has room.
        let mut chosen = None;
        'adj: for kind in PrimitiveKind::ALL {
            for &nid in primitive.neighbor_ids(kind) {
                if let Some(&rank) = assignment.get(&nid) {
                    if loads[rank] + weight <= threshold {
                        chosen = Some(rank);
                        break 'adj;
                    }
                }
            }
        }
        // Fallback: least-loaded rank, lowest rank number on ties.
        let rank = chosen.unwrap_or_else(|| {
            (0..num_ranks)
                .min_by_key(|&r| (loads[r], r))
                .unwrap_or(0)
        });
        assignment.insert(id, rank);
        loads[rank] += weight;
    }

    let max_load = loads.iter().copied().max().unwrap_or(0);
    let min_load = loads.iter().copied().min().unwrap_or(0);
    let ratio = max_load as f64 / (min_load as f64 + f64::EPSILON);
    let tolerance = 1.0 + epsilon + 1e-6;
    debug!(
        "greedy balancing: {} primitives over {num_ranks} ranks, loads {loads:?}, ratio {ratio:.4}",
        items.len()
    );
    if ratio > tolerance {
        return Err(GridError::Unbalanced {
            max_load,
            min_load,
            ratio,
            tolerance,
        });
    }
    Ok(assignment)
}
