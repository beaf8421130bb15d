//! Poisson problems on triangle meshes: V-cycle convergence against a
//! heavily smoothed reference, and agreement between one and two ranks.

use hiergrid::storage::balancing;
use hiergrid::prelude::*;
use serial_test::serial;
use std::rc::Rc;

const MIN_LEVEL: u32 = 2;
const MAX_LEVEL: u32 = 4;

/// Harmonic, so the continuous Laplace problem with this boundary data has
/// itself as the solution. Not piecewise linear, so the discrete solution
/// is a genuine unknown rather than the interpolant.
fn harmonic(p: Point3) -> f64 {
    p[0].sin() * p[1].sinh()
}

fn right_triangle() -> SetupStorage {
    SetupStorage::from_triangles(
        &[[0.0, 0.0, 0.0], [1.0, 0.0, 0.0], [0.0, 1.0, 0.0]],
        &[[0, 1, 2]],
    )
    .unwrap()
}

fn boundary_problem<C: Communicator>(
    storage: &Rc<DistributedStorage<C>>,
) -> (P1Function<f64, C>, P1Function<f64, C>) {
    let u = P1Function::new("u", Rc::clone(storage), MIN_LEVEL, MAX_LEVEL);
    let b = P1Function::new("b", Rc::clone(storage), MIN_LEVEL, MAX_LEVEL);
    u.set_zero(MAX_LEVEL);
    u.interpolate(harmonic, MAX_LEVEL, DoFType::DIRICHLET);
    u.sync_up(MAX_LEVEL);
    b.set_zero(MAX_LEVEL);
    (u, b)
}

fn error_against<C: Communicator>(
    u: &P1Function<f64, C>,
    reference: &P1Function<f64, C>,
    storage: &Rc<DistributedStorage<C>>,
) -> f64 {
    let diff = P1Function::new("diff", Rc::clone(storage), MIN_LEVEL, MAX_LEVEL);
    diff.assign(&[1.0, -1.0], &[u, reference], MAX_LEVEL, DoFType::ALL);
    diff.dot(&diff, MAX_LEVEL, DoFType::ALL).sqrt()
}

#[test]
fn vcycles_converge_to_the_smoothed_reference() {
    let storage = DistributedStorage::from_setup(&right_triangle(), NoComm);
    let op = ElementwiseOperator::new(
        "laplace",
        Rc::clone(&storage),
        LaplaceKernel,
        MIN_LEVEL,
        MAX_LEVEL,
    );
    let flags = DoFType::INNER | DoFType::NEUMANN;

    // Reference: Gauss-Seidel driven far below the multigrid tolerance.
    let (reference, b_ref) = boundary_problem(&storage);
    for _ in 0..2000 {
        op.smooth_gs(&reference, &b_ref, MAX_LEVEL, flags);
    }

    let (u, b) = boundary_problem(&storage);
    let mg = GeometricMultigrid::new("mg", Rc::clone(&storage), GaussSeidel, MIN_LEVEL, MAX_LEVEL)
        .with_tolerance(1e-11)
        .with_max_cycles(12);
    let report = mg.solve(&op, &u, &b, MAX_LEVEL);

    assert!(
        report.final_residual < 1e-11,
        "residual {} after {} cycles",
        report.final_residual,
        report.iterations
    );
    assert!(report.iterations <= 12);
    let err = error_against(&u, &reference, &storage);
    assert!(err < 1e-8, "algebraic error {err}");

    // The discrete solution tracks the continuous one at mesh accuracy.
    let exact = P1Function::new("exact", Rc::clone(&storage), MIN_LEVEL, MAX_LEVEL);
    exact.interpolate(harmonic, MAX_LEVEL, DoFType::ALL);
    let disc = error_against(&u, &exact, &storage);
    assert!(disc < 1e-2, "discretization error {disc}");
}

#[test]
fn residual_drops_every_cycle() {
    let storage = DistributedStorage::from_setup(&right_triangle(), NoComm);
    let op = ElementwiseOperator::new(
        "laplace",
        Rc::clone(&storage),
        LaplaceKernel,
        MIN_LEVEL,
        MAX_LEVEL,
    );
    let flags = DoFType::INNER | DoFType::NEUMANN;
    let (u, b) = boundary_problem(&storage);
    let mg = GeometricMultigrid::new("mg", Rc::clone(&storage), GaussSeidel, MIN_LEVEL, MAX_LEVEL)
        .with_tolerance(0.0)
        .with_max_cycles(1);

    let au = P1Function::new("au", Rc::clone(&storage), MIN_LEVEL, MAX_LEVEL);
    let r = P1Function::new("r", Rc::clone(&storage), MIN_LEVEL, MAX_LEVEL);
    let norm = |u: &P1Function<f64, NoComm>| {
        op.apply(u, &au, MAX_LEVEL, flags, UpdateType::Replace);
        r.set_zero(MAX_LEVEL);
        r.assign(&[1.0, -1.0], &[&b, &au], MAX_LEVEL, flags);
        r.dot(&r, MAX_LEVEL, flags).sqrt()
    };

    let mut previous = norm(&u);
    for _ in 0..4 {
        mg.solve(&op, &u, &b, MAX_LEVEL);
        let current = norm(&u);
        assert!(
            current < 0.2 * previous,
            "residual stalled: {previous} -> {current}"
        );
        previous = current;
    }
}

#[test]
#[serial]
fn two_ranks_agree_with_the_serial_solution() {
    let make_setup = || {
        SetupStorage::from_triangles(
            &[
                [0.0, 0.0, 0.0],
                [1.0, 0.0, 0.0],
                [0.0, 1.0, 0.0],
                [1.0, 1.0, 0.0],
            ],
            &[[0, 1, 2], [1, 3, 2]],
        )
        .unwrap()
    };

    // Serial reference on the two-triangle square.
    let serial_values = {
        let storage = DistributedStorage::from_setup(&make_setup(), NoComm);
        let op = ElementwiseOperator::new(
            "laplace",
            Rc::clone(&storage),
            LaplaceKernel,
            MIN_LEVEL,
            MAX_LEVEL,
        );
        let (u, b) = boundary_problem(&storage);
        let mg =
            GeometricMultigrid::new("mg", Rc::clone(&storage), GaussSeidel, MIN_LEVEL, MAX_LEVEL)
                .with_tolerance(1e-12)
                .with_max_cycles(20);
        mg.solve(&op, &u, &b, MAX_LEVEL);
        collect_vertex_values(&u, &storage)
    };

    let per_rank: Vec<Vec<(u64, f64)>> = ThreadComm::group(2)
        .into_iter()
        .map(|comm| {
            std::thread::spawn(move || {
                let mut setup = SetupStorage::from_triangles(
                    &[
                        [0.0, 0.0, 0.0],
                        [1.0, 0.0, 0.0],
                        [0.0, 1.0, 0.0],
                        [1.0, 1.0, 0.0],
                    ],
                    &[[0, 1, 2], [1, 3, 2]],
                )
                .unwrap();
                // Same mesh and assignment as the serial reference.
                let assignment = balancing::greedy(&setup, 2, MAX_LEVEL, 0.1).unwrap();
                setup.apply_assignment(&assignment);
                let storage = DistributedStorage::from_setup(&setup, comm);
                let op = ElementwiseOperator::new(
                    "laplace",
                    Rc::clone(&storage),
                    LaplaceKernel,
                    MIN_LEVEL,
                    MAX_LEVEL,
                );
                let (u, b) = boundary_problem(&storage);
                let mg = GeometricMultigrid::new(
                    "mg",
                    Rc::clone(&storage),
                    GaussSeidel,
                    MIN_LEVEL,
                    MAX_LEVEL,
                )
                .with_tolerance(1e-12)
                .with_max_cycles(20);
                mg.solve(&op, &u, &b, MAX_LEVEL);
                collect_vertex_values(&u, &storage)
            })
        })
        .collect::<Vec<_>>()
        .into_iter()
        .map(|h| h.join().unwrap())
        .collect();

    let mut serial = serial_values;
    serial.sort_by_key(|&(id, _)| id);
    let mut parallel: Vec<(u64, f64)> = per_rank.into_iter().flatten().collect();
    parallel.sort_by_key(|&(id, _)| id);
    assert_eq!(serial.len(), parallel.len());
    for ((sid, sv), (pid, pv)) in serial.iter().zip(&parallel) {
        assert_eq!(sid, pid);
        assert!((sv - pv).abs() < 1e-8, "vertex {sid}: {sv} vs {pv}");
    }
}

fn collect_vertex_values<C: Communicator>(
    u: &P1Function<f64, C>,
    storage: &Rc<DistributedStorage<C>>,
) -> Vec<(u64, f64)> {
    storage
        .owned(PrimitiveKind::Vertex)
        .map(|prim| {
            let m = u.memory(prim.id());
            let v = m.borrow().values(MAX_LEVEL)[0];
            (prim.id().get(), v)
        })
        .collect()
}
