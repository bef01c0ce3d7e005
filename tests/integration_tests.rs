//! Integration tests for the Dog Leg solver
//!
//! End-to-end runs through `Problem` → linearization → elimination → Dog Leg
//! step → trust region control.
//!
//! # Test Coverage
//!
//! - **Linear scenarios**: Gauss-Newton acceptance, steepest descent clipping,
//!   rank-deficient systems, stationary points
//! - **Misleading model**: every step rejected until the radius collapses
//! - **SE2 ring**: a synthetic planar pose graph with a loop closure, solved
//!   under every (elimination, factorization, policy) combination
//!
//! # Running Tests
//!
//! ```bash
//! cargo test --test integration_tests
//! RUST_LOG=debug cargo test --test integration_tests -- --nocapture
//! ```

use dogleg_solver::core::problem::Problem;
use dogleg_solver::core::variable::Values;
use dogleg_solver::factors::{BetweenFactor, Factor, LinearFactor, PriorFactor};
use dogleg_solver::linalg::{EliminationMode, Factorization};
use dogleg_solver::manifold::{ManifoldType, se2::SE2};
use dogleg_solver::optimizer::dog_leg::{IterationPolicy, Verbosity};
use dogleg_solver::optimizer::{
    DogLeg, DogLegConfig, IterationOutcome, OptimizationStatus, OptimizerError, StepKind,
};
use dogleg_solver::{DogLegSolverError, NonlinearSystem};
use nalgebra::{DMatrix, DVector, dmatrix, dvector};
use std::collections::HashMap;
use std::f64::consts::PI;

type TestResult = Result<(), Box<dyn std::error::Error>>;

const ELIMINATIONS: [EliminationMode; 2] = [EliminationMode::Sequential, EliminationMode::Multifrontal];
const FACTORIZATIONS: [Factorization; 2] = [Factorization::Cholesky, Factorization::QR];
const POLICIES: [IterationPolicy; 2] = [IterationPolicy::SingleAttempt, IterationPolicy::Search];

fn rn_values(entries: &[(&str, DVector<f64>)]) -> Result<Values, Box<dyn std::error::Error>> {
    let problem = Problem::new();
    let initial: HashMap<String, (ManifoldType, DVector<f64>)> = entries
        .iter()
        .map(|(key, data)| (key.to_string(), (ManifoldType::RN, data.clone())))
        .collect();
    Ok(problem.initialize_variables(&initial)?)
}

/// `½||x - [3, 4]||²` on a single 2D variable, starting from the origin.
fn target_problem() -> Result<(Problem, Values), Box<dyn std::error::Error>> {
    let mut problem = Problem::new();
    problem.add_residual_block(
        &["x"],
        Box::new(LinearFactor::new(vec![DMatrix::identity(2, 2)], dvector![3.0, 4.0])?),
        None,
    )?;
    let values = rn_values(&[("x", dvector![0.0, 0.0])])?;
    Ok((problem, values))
}

#[test]
fn test_gauss_newton_step_inside_trust_region() -> TestResult {
    let (problem, values) = target_problem()?;
    let config = DogLegConfig::new().with_initial_radius(10.0);
    let mut solver = DogLeg::new(&problem, values, config)?;
    assert!((solver.error() - 12.5).abs() < 1e-12);

    match solver.iterate()? {
        IterationOutcome::Accepted {
            step_kind, error, ..
        } => {
            assert_eq!(step_kind, StepKind::GaussNewton);
            assert!(error.abs() < 1e-20);
        }
        other => panic!("expected an accepted step, got {other:?}"),
    }

    let x = solver.values()["x"].to_vector();
    assert!((x[0] - 3.0).abs() < 1e-10);
    assert!((x[1] - 4.0).abs() < 1e-10);
    assert_eq!(solver.iterations(), 1);
    Ok(())
}

#[test]
fn test_steepest_descent_step_clipped_to_radius() -> TestResult {
    let (problem, values) = target_problem()?;
    let mut solver = DogLeg::new(&problem, values, DogLegConfig::new())?;

    match solver.iterate()? {
        IterationOutcome::Accepted {
            step_kind,
            gain,
            error,
            radius,
            attempts,
        } => {
            assert_eq!(step_kind, StepKind::SteepestDescent);
            assert!((gain - 1.0).abs() < 1e-10);
            assert!((error - 8.0).abs() < 1e-10);
            assert!((radius - 3.0).abs() < 1e-10);
            assert_eq!(attempts, 1);
        }
        other => panic!("expected an accepted step, got {other:?}"),
    }

    let delta = solver.state().delta.as_ref().ok_or("missing delta")?;
    assert!((delta[(0, 0)] - 0.6).abs() < 1e-10);
    assert!((delta[(1, 0)] - 0.8).abs() < 1e-10);
    Ok(())
}

#[test]
fn test_rank_deficient_system_is_singular_everywhere() -> TestResult {
    // a + b = 1 and a + b = 2: duplicate rows, rank one
    let mut problem = Problem::new();
    problem.add_residual_block(
        &["a", "b"],
        Box::new(LinearFactor::new(
            vec![dmatrix![1.0; 1.0], dmatrix![1.0; 1.0]],
            dvector![1.0, 2.0],
        )?),
        None,
    )?;

    for elimination in ELIMINATIONS {
        for factorization in FACTORIZATIONS {
            let values = rn_values(&[("a", dvector![0.0]), ("b", dvector![0.0])])?;
            let config = DogLegConfig::new()
                .with_elimination(elimination)
                .with_factorization(factorization);
            let mut solver = DogLeg::new(&problem, values, config)?;

            let err = match solver.iterate() {
                Err(err) => err,
                Ok(outcome) => panic!("{elimination}/{factorization}: expected failure, got {outcome:?}"),
            };
            assert!(
                matches!(err, OptimizerError::SingularSystem(_)),
                "{elimination}/{factorization}: {err}"
            );
            assert!(err.is_fatal());
            assert_eq!(solver.iterations(), 0);
            assert!((solver.error() - 2.5).abs() < 1e-12);

            // optimize surfaces the same failure instead of a status
            assert!(solver.optimize().is_err());
        }
    }
    Ok(())
}

#[test]
fn test_stationary_point_stops_optimization() -> TestResult {
    // x = 1 and x = 3 cannot both hold; x = 2 is the least squares optimum
    let mut problem = Problem::new();
    problem.add_residual_block(&["x"], Box::new(LinearFactor::new(vec![dmatrix![1.0]], dvector![1.0])?), None)?;
    problem.add_residual_block(&["x"], Box::new(LinearFactor::new(vec![dmatrix![1.0]], dvector![3.0])?), None)?;
    let values = rn_values(&[("x", dvector![2.0])])?;

    let config = DogLegConfig::new()
        .with_elimination(EliminationMode::Sequential)
        .with_factorization(Factorization::Cholesky);
    let mut solver = DogLeg::new(&problem, values, config)?;
    let result = solver.optimize()?;

    assert_eq!(result.status, OptimizationStatus::StationaryPoint);
    assert!(result.status.is_converged());
    assert_eq!(result.final_cost, result.initial_cost);
    assert!((result.final_cost - 1.0).abs() < 1e-12);
    assert_eq!(result.summary.successful_steps, 0);
    Ok(())
}

/// Reports `r = x - 3` with Jacobian `-1`, so the linear model always points uphill.
#[derive(Debug, Clone)]
struct MisleadingFactor;

impl Factor for MisleadingFactor {
    fn linearize(&self, params: &[DVector<f64>], compute_jacobian: bool) -> (DVector<f64>, Option<DMatrix<f64>>) {
        let residual = dvector![params[0][0] - 3.0];
        let jacobian = compute_jacobian.then(|| dmatrix![-1.0]);
        (residual, jacobian)
    }

    fn get_dimension(&self) -> usize {
        1
    }

    fn num_variables(&self) -> usize {
        1
    }
}

fn misleading_problem() -> Result<(Problem, Values), Box<dyn std::error::Error>> {
    let mut problem = Problem::new();
    problem.add_residual_block(&["x"], Box::new(MisleadingFactor), None)?;
    let values = rn_values(&[("x", dvector![0.0])])?;
    Ok((problem, values))
}

#[test]
fn test_single_attempt_shrinks_radius_until_no_progress() -> TestResult {
    let (problem, values) = misleading_problem()?;
    let mut solver = DogLeg::new(&problem, values, DogLegConfig::new())?;

    let mut radii = vec![solver.radius()];
    let failure = loop {
        match solver.iterate() {
            Ok(IterationOutcome::Rejected { radius, .. }) => radii.push(radius),
            Ok(other) => panic!("expected rejection, got {other:?}"),
            Err(err) => break err,
        }
        assert!(radii.len() < 50, "radius never collapsed: {radii:?}");
    };

    assert!(radii.windows(2).all(|w| w[1] < w[0]), "{radii:?}");
    match failure {
        OptimizerError::NoProgress { radius, radius_floor } => {
            assert_eq!(radius, radius_floor);
            assert_eq!(radius_floor, 1e-5);
        }
        other => panic!("expected NoProgress, got {other}"),
    }
    assert!(!failure.is_fatal());
    assert_eq!(solver.iterations(), 0);
    assert_eq!(solver.values()["x"].to_vector(), dvector![0.0]);
    assert!((solver.error() - 4.5).abs() < 1e-12);
    Ok(())
}

#[test]
fn test_search_policy_reports_no_progress_in_one_call() -> TestResult {
    let (problem, values) = misleading_problem()?;
    let config = DogLegConfig::new().with_iteration_policy(IterationPolicy::Search);
    let mut solver = DogLeg::new(&problem, values, config)?;

    let err = solver.iterate().err().ok_or("expected NoProgress")?;
    assert!(err.is_no_progress());
    assert_eq!(solver.radius(), 1e-5);
    assert_eq!(solver.iterations(), 0);

    // the outer loop keeps NoProgress distinct from convergence and failure
    let (problem, values) = misleading_problem()?;
    let config = DogLegConfig::new().with_iteration_policy(IterationPolicy::Search);
    let result = DogLeg::new(&problem, values, config)?.optimize()?;
    assert_eq!(result.status, OptimizationStatus::NoProgress);
    assert!(!result.status.is_converged());
    assert_eq!(result.final_cost, result.initial_cost);
    assert_eq!(result.iterations, 1);
    assert_eq!(result.summary.successful_steps, 0);
    assert!(result.summary.unsuccessful_steps > 10);
    Ok(())
}

#[test]
fn test_unknown_selectors_fail_at_configuration() {
    for (key, value) in [
        ("elimination", "FRONTAL"),
        ("factorization", "SVD"),
        ("iteration_policy", "LINE_SEARCH"),
        ("verbosity", "LOUD"),
    ] {
        let err = DogLegConfig::new().set_option(key, value).err();
        assert!(
            matches!(err, Some(OptimizerError::InvalidConfiguration(_))),
            "{key} = {value}"
        );
    }
}

/// Synthetic planar ring: `n` unit steps turning `2π/n`, closed by a loop constraint.
struct Ring {
    problem: Problem,
    initial: HashMap<String, (ManifoldType, DVector<f64>)>,
    truth: Vec<[f64; 3]>,
}

fn ring(n: usize, odometry_noise: f64) -> Result<Ring, Box<dyn std::error::Error>> {
    let turn = 2.0 * PI / n as f64;
    let mut truth: Vec<[f64; 3]> = vec![[0.0, 0.0, 0.0]];
    for i in 0..n - 1 {
        let [x, y, theta] = truth[i];
        truth.push([x + theta.cos(), y + theta.sin(), theta + turn]);
    }

    let mut problem = Problem::new();
    problem.add_residual_block(&["x0"], Box::new(PriorFactor::new(SE2::identity())), None)?;

    let keys: Vec<String> = (0..n).map(|i| format!("x{i}")).collect();
    for i in 0..n {
        let j = (i + 1) % n;
        let noise = odometry_noise * (i as f64 * 1.3).sin();
        let measurement = SE2::from_xy_angle(1.0 + noise, 0.5 * noise, turn);
        let weight = if j == 0 {
            Some(DMatrix::from_diagonal(&dvector![10.0, 10.0, 20.0]))
        } else {
            None
        };
        problem.add_residual_block(
            &[keys[i].as_str(), keys[j].as_str()],
            Box::new(BetweenFactor::new(measurement)),
            weight,
        )?;
    }

    let initial = truth
        .iter()
        .enumerate()
        .map(|(i, [x, y, theta])| {
            let k = i as f64;
            let guess = dvector![
                x + 0.1 * k.sin(),
                y + 0.1 * k.cos(),
                theta + 0.05 * (2.0 * k).sin()
            ];
            (keys[i].clone(), (ManifoldType::SE2, guess))
        })
        .collect();

    Ok(Ring {
        problem,
        initial,
        truth,
    })
}

fn wrapped(angle: f64) -> f64 {
    angle.sin().atan2(angle.cos())
}

fn tight_config() -> DogLegConfig {
    DogLegConfig::new()
        .with_max_iterations(200)
        .with_error_tolerance(1e-22)
        .with_absolute_error_tolerance(1e-14)
        .with_relative_error_tolerance(1e-12)
        .with_verbosity(Verbosity::Termination)
}

#[test]
fn test_se2_ring_recovers_ground_truth() -> TestResult {
    let ring = ring(8, 0.0)?;
    let values = ring.problem.initialize_variables(&ring.initial)?;
    let initial_cost = ring.problem.total_error(&values)?;
    assert!(initial_cost > 1e-3);

    let mut solver = DogLeg::new(&ring.problem, values, tight_config())?;
    let result = solver.optimize()?;

    assert_ne!(result.status, OptimizationStatus::MaxIterationsReached);
    assert!(result.final_cost < 1e-10, "final cost {}", result.final_cost);
    for (i, [x, y, theta]) in ring.truth.iter().enumerate() {
        let pose = result.parameters[&format!("x{i}")].to_vector();
        assert!((pose[0] - x).abs() < 1e-5, "x{i}: {pose}");
        assert!((pose[1] - y).abs() < 1e-5, "x{i}: {pose}");
        assert!(wrapped(pose[2] - theta).abs() < 1e-5, "x{i}: {pose}");
    }
    Ok(())
}

#[test]
fn test_all_backends_agree_on_noisy_ring() -> TestResult {
    let ring = ring(6, 0.02)?;
    let mut solutions: Vec<(String, Values, f64)> = Vec::new();

    for elimination in ELIMINATIONS {
        for factorization in FACTORIZATIONS {
            for policy in POLICIES {
                let label = format!("{elimination}/{factorization}/{policy}");
                let values = ring.problem.initialize_variables(&ring.initial)?;
                let config = tight_config()
                    .with_elimination(elimination)
                    .with_factorization(factorization)
                    .with_iteration_policy(policy);
                let result = DogLeg::new(&ring.problem, values, config)?.optimize()?;

                assert_ne!(result.status, OptimizationStatus::MaxIterationsReached, "{label}");
                assert!(result.final_cost < result.initial_cost, "{label}");
                assert!(result.final_cost.is_finite(), "{label}");
                solutions.push((label, result.parameters, result.final_cost));
            }
        }
    }

    let (reference_label, reference, reference_cost) = &solutions[0];
    for (label, values, cost) in &solutions[1..] {
        assert!(
            (cost - reference_cost).abs() < 1e-9,
            "{label} cost {cost} vs {reference_label} cost {reference_cost}"
        );
        for (key, var) in values {
            let a = var.to_vector();
            let b = reference[key].to_vector();
            assert!((a[0] - b[0]).abs() < 1e-5, "{label} {key}: {a} vs {b}");
            assert!((a[1] - b[1]).abs() < 1e-5, "{label} {key}: {a} vs {b}");
            assert!(wrapped(a[2] - b[2]).abs() < 1e-5, "{label} {key}: {a} vs {b}");
        }
    }
    Ok(())
}

#[test]
fn test_solver_error_wraps_every_layer() -> TestResult {
    fn run() -> Result<(), DogLegSolverError> {
        let mut problem = Problem::new();
        problem.add_residual_block(
            &["a", "b"],
            Box::new(LinearFactor::new(
                vec![dmatrix![1.0; 2.0], dmatrix![2.0; 4.0]],
                dvector![1.0, 1.0],
            )?),
            None,
        )?;
        let mut initial = HashMap::new();
        initial.insert("a".to_string(), (ManifoldType::RN, dvector![0.0]));
        initial.insert("b".to_string(), (ManifoldType::RN, dvector![0.0]));
        let values = problem.initialize_variables(&initial)?;
        DogLeg::new(&problem, values, DogLegConfig::new())?.iterate()?;
        Ok(())
    }

    let err = run().err().ok_or("expected a singular system")?;
    assert!(matches!(err, DogLegSolverError::Optimizer(OptimizerError::SingularSystem(_))));
    assert!(err.chain_compact().contains("Singular matrix"));
    Ok(())
}

#[cfg(feature = "logging")]
#[test]
fn test_verbose_run_with_logger() -> TestResult {
    use dogleg_solver::optimizer::dog_leg::DoglegVerbosity;

    dogleg_solver::init_logger_with_level(tracing::Level::INFO);
    let (problem, values) = target_problem()?;
    let config = DogLegConfig::new()
        .with_error_tolerance(1e-20)
        .with_verbosity(Verbosity::Linear)
        .with_dogleg_verbosity(DoglegVerbosity::Verbose);
    let result = DogLeg::new(&problem, values, config)?.optimize()?;

    assert!(result.status.is_converged());
    assert!(result.final_cost < 1e-20);
    let report = result.summary.to_string();
    assert!(report.contains("Dog-Leg Final Result"));
    assert!(report.contains("CONVERGED"));
    Ok(())
}
