//! End-to-end properties of the distributed matrix-vector kernel.

use ferromv::kernel::{self, Problem, Report};
use ferromv::{launch, Error, KernelConfig, Partition, Schedule};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Valid `(dim, workers)` pairs used across the property tests.
const SHAPES: &[(usize, usize)] = &[
    (1, 1),
    (2, 2),
    (4, 2),
    (6, 3),
    (8, 4),
    (12, 6),
    (16, 8),
    (9, 3),
];

fn random_problem(dim: usize, seed: u64) -> Problem {
    let mut rng = StdRng::seed_from_u64(seed);
    Problem {
        vector: (0..dim).map(|_| rng.random_range(-10.0..10.0)).collect(),
        matrix: (0..dim * dim).map(|_| rng.random_range(-10.0..10.0)).collect(),
    }
}

fn config(workers: usize, schedule: Schedule) -> KernelConfig {
    KernelConfig {
        workers,
        schedule,
        local_threads: None,
    }
}

fn run_kernel(problem: &Problem, workers: usize, schedule: Schedule) -> ferromv::Result<Report> {
    let config = config(workers, schedule);
    let reports = launch(workers, |group| {
        let problem = group.is_coordinator().then(|| problem.clone());
        kernel::run(group, problem, &config)
    })?;
    assert!(reports.iter().skip(1).all(Option::is_none));
    Ok(reports
        .into_iter()
        .next()
        .flatten()
        .expect("coordinator report"))
}

#[test]
fn identity_times_vector_is_the_vector() {
    let problem = Problem {
        vector: vec![1.0, 2.0, 3.0, 4.0],
        matrix: vec![
            1.0, 0.0, 0.0, 0.0, //
            0.0, 1.0, 0.0, 0.0, //
            0.0, 0.0, 1.0, 0.0, //
            0.0, 0.0, 0.0, 1.0,
        ],
    };
    let report = run_kernel(&problem, 2, Schedule::Sequential).unwrap();
    assert_eq!(report.result, vec![1.0, 2.0, 3.0, 4.0]);
    assert_eq!(report.workers, 2);
}

#[test]
fn two_by_two_example() {
    let problem = Problem {
        vector: vec![1.0, 1.0],
        matrix: vec![1.0, 2.0, 3.0, 4.0],
    };
    let report = run_kernel(&problem, 2, Schedule::Sequential).unwrap();
    assert_eq!(report.result, vec![3.0, 7.0]);
}

#[test]
fn partition_is_complete_and_disjoint() {
    for &(dim, workers) in SHAPES {
        let problem = random_problem(dim, dim as u64);
        let blocks = launch(workers, |group| {
            let partition =
                kernel::agree_dimension(group, group.is_coordinator().then_some(dim))?;
            let matrix = group.is_coordinator().then_some(&problem.matrix[..]);
            let block = kernel::distribute_rows(group, &partition, matrix)?;
            assert_eq!(block.first_row(), group.rank() * partition.rows_per_worker());
            assert_eq!(
                block.as_slice(),
                &problem.matrix[partition.element_range(group.rank())]
            );
            Ok(block)
        })
        .unwrap();

        let reassembled: Vec<f64> = blocks
            .iter()
            .flat_map(|block| block.as_slice().iter().copied())
            .collect();
        assert_eq!(reassembled, problem.matrix, "dim {dim}, workers {workers}");
    }
}

#[test]
fn result_matches_reference_for_every_worker_count() {
    for &(dim, workers) in SHAPES {
        let problem = random_problem(dim, 1000 + dim as u64);
        let expected = kernel::matvec(&problem.matrix, &problem.vector).unwrap();
        let report = run_kernel(&problem, workers, Schedule::Sequential).unwrap();
        assert_eq!(report.result.len(), dim);
        for (i, (got, want)) in report.result.iter().zip(&expected).enumerate() {
            assert_eq!(
                got.to_bits(),
                want.to_bits(),
                "row {i} differs for dim {dim}, workers {workers}: {got} vs {want}"
            );
        }
    }
}

#[test]
fn worker_count_does_not_change_the_result() {
    let problem = random_problem(24, 7);
    let baseline = run_kernel(&problem, 1, Schedule::Sequential).unwrap().result;
    for workers in [2, 3, 4, 6, 8, 12, 24] {
        let result = run_kernel(&problem, workers, Schedule::Sequential).unwrap().result;
        assert_eq!(result, baseline, "workers {workers}");
    }
}

#[test]
fn repeated_runs_are_bit_identical() {
    let problem = random_problem(32, 99);
    let first = run_kernel(&problem, 4, Schedule::Sequential).unwrap().result;
    for schedule in [Schedule::Sequential, Schedule::Parallel, Schedule::Sequential] {
        let again = run_kernel(&problem, 4, schedule).unwrap().result;
        let same = first
            .iter()
            .zip(&again)
            .all(|(a, b)| a.to_bits() == b.to_bits());
        assert!(same, "{schedule} run differs from the first run");
    }
}

#[test]
fn every_worker_observes_the_coordinators_dimension() {
    let dims = launch(4, |group| {
        let candidate = if group.is_coordinator() { Some(20) } else { Some(999) };
        let partition = kernel::agree_dimension(group, candidate)?;
        Ok(partition.dim())
    })
    .unwrap();
    assert_eq!(dims, vec![20; 4]);
}

#[test]
fn replicated_vectors_are_independent_copies() {
    let copies = launch(3, |group| {
        let partition = kernel::agree_dimension(group, group.is_coordinator().then_some(3))?;
        let mut vector = kernel::replicate_vector(
            group,
            &partition,
            group.is_coordinator().then(|| vec![1.0, 2.0, 3.0]),
        )?;
        group.barrier()?;
        vector[0] += group.rank() as f64;
        group.barrier()?;
        Ok(vector)
    })
    .unwrap();
    assert_eq!(copies[0], vec![1.0, 2.0, 3.0]);
    assert_eq!(copies[1], vec![2.0, 2.0, 3.0]);
    assert_eq!(copies[2], vec![3.0, 2.0, 3.0]);
}

#[test]
fn indivisible_dimension_fails_before_partitioning() {
    assert!(matches!(
        Partition::new(3, 2),
        Err(Error::NotDivisible { dim: 3, workers: 2 })
    ));

    let problem = Problem {
        vector: vec![1.0; 3],
        matrix: vec![1.0; 9],
    };
    let err = run_kernel(&problem, 2, Schedule::Sequential).unwrap_err();
    match err {
        Error::Worker { rank, source } => {
            assert_eq!(rank, 0);
            assert!(matches!(*source, Error::NotDivisible { dim: 3, workers: 2 }));
        }
        other => panic!("unexpected error {other:?}"),
    }
}

#[test]
fn empty_vector_is_an_invalid_dimension() {
    let problem = Problem {
        vector: Vec::new(),
        matrix: Vec::new(),
    };
    let err = run_kernel(&problem, 2, Schedule::Sequential).unwrap_err();
    assert!(matches!(
        err,
        Error::Worker { ref source, .. } if matches!(**source, Error::InvalidDimension(_))
    ));
}

#[test]
fn short_matrix_fails_every_worker_without_hanging() {
    let problem = Problem {
        vector: vec![1.0; 4],
        matrix: vec![1.0; 15],
    };
    let config = config(2, Schedule::Sequential);
    let outcomes = launch(2, |group| {
        let problem = group.is_coordinator().then(|| problem.clone());
        Ok(kernel::run(group, problem, &config))
    })
    .unwrap();
    assert!(matches!(outcomes[0], Err(Error::InvalidCount(_))));
    assert!(matches!(outcomes[1], Err(Error::PeerFailed { rank: 0, .. })));
}
