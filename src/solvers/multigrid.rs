//! Inter-level grid transfers and the geometric multigrid V-cycle.
//!
//! Fine and coarse lattices of one primitive live in the same
//! `FunctionMemory`, so the transfers move data between the level slots of a
//! single function. A fine point with all-even coordinates coincides with
//! the coarse point at half its coordinates; an odd-parity point is the
//! midpoint of exactly one coarse micro edge, found through
//! [`parity_direction`].

use crate::communication::{interior_lattice_points, lattice_index, Communicator};
use crate::data::Scalar;
use crate::functions::P1Function;
use crate::indexing::layout::{micro_edges_per_edge, Idx3};
use crate::indexing::micro::{neighbor_directions, parity_direction, Dir3, FACE_EDGE_DIRECTIONS};
use crate::indexing::Embedding;
use crate::operators::kernels::ElementKernel;
use crate::operators::{ElementwiseOperator, UpdateType};
use crate::primitives::{DoFType, Primitive, PrimitiveId, PrimitiveKind};
use crate::solvers::smoothers::Smoother;
use crate::solvers::{SolveReport, Solver};
use crate::storage::DistributedStorage;
use hashbrown::{HashMap, HashSet};
use log::debug;
use std::rc::Rc;

#[inline]
fn scalar<T: Scalar>(v: f64) -> T {
    T::from(v).unwrap_or_else(|| unreachable!("f64 converts into any nodal scalar"))
}

#[inline]
fn parity(p: Idx3) -> [usize; 3] {
    [p[0] % 2, p[1] % 2, p[2] % 2]
}

#[inline]
fn is_even(p: Idx3) -> bool {
    parity(p) == [0, 0, 0]
}

#[inline]
fn halve(p: Idx3) -> Idx3 {
    [p[0] / 2, p[1] / 2, p[2] / 2]
}

#[inline]
fn shift(p: Idx3, d: Dir3) -> Idx3 {
    [
        (p[0] as i64 + d[0]) as usize,
        (p[1] as i64 + d[1]) as usize,
        (p[2] as i64 + d[2]) as usize,
    ]
}

/// Micro-edge directions that stay on a primitive's own lattice.
fn own_directions(kind: PrimitiveKind) -> Vec<Dir3> {
    match kind {
        PrimitiveKind::Vertex => Vec::new(),
        PrimitiveKind::Edge => vec![[1, 0, 0], [-1, 0, 0]],
        PrimitiveKind::Face => FACE_EDGE_DIRECTIONS
            .iter()
            .flat_map(|d| [*d, [-d[0], -d[1], -d[2]]])
            .collect(),
        PrimitiveKind::Cell => neighbor_directions(true),
    }
}

/// Rank-independent identity of a lattice node: its nonzero integer
/// barycentric weights attached to the spanning corner vertex IDs, sorted.
/// Two element-bearing primitives sharing a node derive the same identity.
fn node_identity(sender: &Primitive, n: usize, u: Idx3) -> Vec<(PrimitiveId, usize)> {
    let corners = sender.corner_vertex_ids();
    let used = corners.len() - 1;
    let w0 = n - u[..used].iter().sum::<usize>();
    let mut weights = Vec::with_capacity(corners.len());
    if w0 > 0 {
        weights.push((corners[0], w0));
    }
    for i in 0..used {
        if u[i] > 0 {
            weights.push((corners[i + 1], u[i]));
        }
    }
    weights.sort_unstable();
    weights
}

/// Linear interpolation from `coarse_level` onto `coarse_level + 1`.
///
/// Even fine points copy their coarse counterpart; odd points average the
/// two endpoints of their coarse micro edge, both of which lie on the same
/// primitive's lattice. Requires the coarse level to be synchronized;
/// leaves the fine level synchronized. Collective.
pub fn prolongate<T: Scalar, C: Communicator>(
    u: &P1Function<T, C>,
    coarse_level: u32,
    flags: DoFType,
) {
    let storage = u.storage();
    let fine = coarse_level + 1;
    let half = scalar::<T>(0.5);
    for kind in PrimitiveKind::ALL {
        for prim in storage.owned(kind) {
            if !prim.dof_type().matches(flags) {
                continue;
            }
            let m = u.memory(prim.id());
            let mut m = m.borrow_mut();
            let coarse_vals = m.values(coarse_level).to_vec();
            let fine_vals = m.values_mut(fine);
            for p in interior_lattice_points(kind, fine) {
                let i = lattice_index(kind, fine, p);
                fine_vals[i] = if is_even(p) {
                    coarse_vals[lattice_index(kind, coarse_level, halve(p))]
                } else {
                    let d = parity_direction(parity(p));
                    let a = halve(shift(p, d));
                    let b = halve(shift(p, [-d[0], -d[1], -d[2]]));
                    half * (coarse_vals[lattice_index(kind, coarse_level, a)]
                        + coarse_vals[lattice_index(kind, coarse_level, b)])
                };
            }
        }
    }
    u.sync_up(fine);
}

/// Plain injection from `fine_level` onto `fine_level - 1`: every coarse
/// point takes the value of the coinciding fine point. Collective.
pub fn restrict_inject<T: Scalar, C: Communicator>(
    u: &P1Function<T, C>,
    fine_level: u32,
    flags: DoFType,
) {
    let storage = u.storage();
    let coarse = fine_level - 1;
    for kind in PrimitiveKind::ALL {
        for prim in storage.owned(kind) {
            if !prim.dof_type().matches(flags) {
                continue;
            }
            let m = u.memory(prim.id());
            let mut m = m.borrow_mut();
            let fine_vals = m.values(fine_level).to_vec();
            let coarse_vals = m.values_mut(coarse);
            for p in interior_lattice_points(kind, coarse) {
                coarse_vals[lattice_index(kind, coarse, p)] =
                    fine_vals[lattice_index(kind, fine_level, [2 * p[0], 2 * p[1], 2 * p[2]])];
            }
        }
    }
    u.sync_up(coarse);
}

/// Full weighting from `fine_level` onto `fine_level - 1`, the transpose of
/// [`prolongate`]: each coarse node takes its coinciding fine value plus
/// half of every fine micro-edge neighbor.
///
/// Off-primitive neighbors are read from the ghost arrays and deduplicated
/// across the adjacent element-bearing primitives by node identity, so a
/// node on a shared side is counted once. Requires the fine level to be
/// synchronized with refreshed halos; leaves the coarse level synchronized.
/// Collective.
pub fn restrict<T: Scalar, C: Communicator>(
    u: &P1Function<T, C>,
    fine_level: u32,
    flags: DoFType,
) {
    let storage = u.storage();
    let coarse = fine_level - 1;
    let top = storage.top_kind();
    let n = micro_edges_per_edge(fine_level);
    let half = scalar::<T>(0.5);
    let off_dirs = neighbor_directions(top == PrimitiveKind::Cell);

    for kind in PrimitiveKind::ALL {
        for prim in storage.owned(kind) {
            if !prim.dof_type().matches(flags) {
                continue;
            }
            let own_dirs = own_directions(kind);
            let senders: Vec<(&Primitive, Embedding, HashMap<Idx3, usize>)> =
                if kind.dimension() < top.dimension() {
                    prim.neighbor_ids(top)
                        .iter()
                        .map(|&sid| {
                            let sender = storage.primitive(sid).unwrap_or_else(|e| {
                                panic!("restriction over incomplete ghost layer: {e}")
                            });
                            let embed = Embedding::new(prim, sender).unwrap_or_else(|| {
                                panic!("{} is not a side of {sid}", prim.id())
                            });
                            let slots = crate::communication::ghost_points(sender, prim, fine_level)
                                .into_iter()
                                .enumerate()
                                .map(|(slot, u)| (u, slot))
                                .collect();
                            (sender, embed, slots)
                        })
                        .collect()
                } else {
                    Vec::new()
                };

            let m = u.memory(prim.id());
            let mut results = Vec::new();
            {
                let m = m.borrow();
                let fv = m.values(fine_level);
                let mut seen: HashSet<Vec<(PrimitiveId, usize)>> = HashSet::new();
                for p in interior_lattice_points(kind, coarse) {
                    let v = [2 * p[0], 2 * p[1], 2 * p[2]];
                    let mut acc = fv[lattice_index(kind, fine_level, v)];
                    for d in &own_dirs {
                        acc = acc + half * fv[lattice_index(kind, fine_level, shift(v, *d))];
                    }
                    seen.clear();
                    for (sender, embed, slots) in &senders {
                        let ghost = m.halo(fine_level, sender.id()).unwrap_or_else(|| {
                            panic!("restriction before halo refresh: no ghosts from {}", sender.id())
                        });
                        let q = embed.push_forward(fine_level, v);
                        for d in &off_dirs {
                            let w = [
                                q[0] as i64 + d[0],
                                q[1] as i64 + d[1],
                                q[2] as i64 + d[2],
                            ];
                            if w.iter().any(|&c| c < 0) || w.iter().sum::<i64>() > n as i64 {
                                continue;
                            }
                            let w = [w[0] as usize, w[1] as usize, w[2] as usize];
                            if embed.pull_back(fine_level, w).is_some() {
                                continue;
                            }
                            if seen.insert(node_identity(sender, n, w)) {
                                acc = acc + half * ghost[slots[&w]];
                            }
                        }
                    }
                    results.push(acc);
                }
            }
            let mut m = m.borrow_mut();
            let cv = m.values_mut(coarse);
            for (p, value) in interior_lattice_points(kind, coarse).zip(results) {
                cv[lattice_index(kind, coarse, p)] = value;
            }
        }
    }
    u.sync_up(coarse);
}

fn unknown_flags() -> DoFType {
    DoFType::INNER | DoFType::NEUMANN
}

/// V-cycle geometric multigrid over the level hierarchy of one operator.
pub struct GeometricMultigrid<T: Scalar, C: Communicator, S> {
    smoother: S,
    pre_smooth: usize,
    post_smooth: usize,
    coarse_sweeps: usize,
    max_cycles: usize,
    tolerance: f64,
    min_level: u32,
    tmp: P1Function<T, C>,
    residual: P1Function<T, C>,
    err: P1Function<T, C>,
    rhs: P1Function<T, C>,
}

impl<T: Scalar, C: Communicator, S> GeometricMultigrid<T, C, S> {
    pub fn new(
        name: impl Into<String>,
        storage: Rc<DistributedStorage<C>>,
        smoother: S,
        min_level: u32,
        max_level: u32,
    ) -> Self {
        let name = name.into();
        let work = |suffix: &str| {
            P1Function::new(
                format!("{name}_{suffix}"),
                Rc::clone(&storage),
                min_level,
                max_level,
            )
        };
        GeometricMultigrid {
            smoother,
            pre_smooth: 3,
            post_smooth: 3,
            coarse_sweeps: 50,
            max_cycles: 10,
            tolerance: 1e-12,
            min_level,
            tmp: work("tmp"),
            residual: work("residual"),
            err: work("err"),
            rhs: work("rhs"),
        }
    }

    pub fn with_smoothing_steps(mut self, pre: usize, post: usize) -> Self {
        self.pre_smooth = pre;
        self.post_smooth = post;
        self
    }

    pub fn with_coarse_sweeps(mut self, sweeps: usize) -> Self {
        self.coarse_sweeps = sweeps;
        self
    }

    pub fn with_max_cycles(mut self, cycles: usize) -> Self {
        self.max_cycles = cycles;
        self
    }

    pub fn with_tolerance(mut self, tolerance: f64) -> Self {
        self.tolerance = tolerance;
        self
    }
}

impl<T: Scalar, C: Communicator, S> GeometricMultigrid<T, C, S> {
    fn residual_norm<K: ElementKernel>(
        &self,
        op: &ElementwiseOperator<T, C, K>,
        x: &P1Function<T, C>,
        b: &P1Function<T, C>,
        level: u32,
    ) -> f64 {
        let flags = unknown_flags();
        op.apply(x, &self.tmp, level, flags, UpdateType::Replace);
        self.residual.set_zero(level);
        self.residual
            .assign(&[T::one(), -T::one()], &[b, &self.tmp], level, flags);
        self.residual
            .dot(&self.residual, level, flags)
            .to_f64()
            .unwrap_or(f64::NAN)
            .sqrt()
    }

    fn vcycle<K: ElementKernel>(
        &self,
        op: &ElementwiseOperator<T, C, K>,
        x: &P1Function<T, C>,
        b: &P1Function<T, C>,
        level: u32,
    ) where
        S: Smoother<T, C, ElementwiseOperator<T, C, K>>,
    {
        let flags = unknown_flags();
        if level == self.min_level {
            for _ in 0..self.coarse_sweeps {
                self.smoother.smooth(op, x, b, level, flags);
            }
            return;
        }
        for _ in 0..self.pre_smooth {
            self.smoother.smooth(op, x, b, level, flags);
        }

        op.apply(x, &self.tmp, level, flags, UpdateType::Replace);
        self.residual.set_zero(level);
        self.residual
            .assign(&[T::one(), -T::one()], &[b, &self.tmp], level, flags);
        self.residual.sync_up(level);
        self.residual.refresh_halos(level);
        restrict(&self.residual, level, flags);
        self.rhs.set_zero(level - 1);
        self.rhs
            .assign(&[T::one()], &[&self.residual], level - 1, flags);

        self.err.set_zero(level - 1);
        self.vcycle(op, &self.err, &self.rhs, level - 1);

        self.tmp
            .assign(&[T::one()], &[&self.err], level - 1, DoFType::ALL);
        prolongate(&self.tmp, level - 1, DoFType::ALL);
        x.add(&[T::one()], &[&self.tmp], level, flags);
        x.sync_up(level);

        for _ in 0..self.post_smooth {
            self.smoother.smooth(op, x, b, level, flags);
        }
    }
}

impl<T: Scalar, C: Communicator, K: ElementKernel, S> Solver<T, C, ElementwiseOperator<T, C, K>>
    for GeometricMultigrid<T, C, S>
where
    S: Smoother<T, C, ElementwiseOperator<T, C, K>>,
{
    fn solve(
        &self,
        op: &ElementwiseOperator<T, C, K>,
        x: &P1Function<T, C>,
        b: &P1Function<T, C>,
        level: u32,
    ) -> SolveReport {
        let mut iterations = 0;
        let mut res = self.residual_norm(op, x, b, level);
        while res > self.tolerance && iterations < self.max_cycles {
            self.vcycle(op, x, b, level);
            iterations += 1;
            let next = self.residual_norm(op, x, b, level);
            debug!("cycle {iterations}: residual {res:.3e} -> {next:.3e}");
            res = next;
        }
        SolveReport {
            iterations,
            final_residual: res,
        }
    }
}
