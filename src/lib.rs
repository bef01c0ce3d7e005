//! # Dogleg Solver
//!
//! Powell's Dog Leg trust region method for sparse nonlinear least squares
//! problems expressed as factor graphs (pose graphs, SLAM back ends).
//!
//! ## Features
//!
//! - **Dog Leg step engine**: Gauss-Newton / steepest descent blending inside an adaptive trust region
//! - **Two elimination topologies**: sequential Bayes net or multifrontal Bayes tree
//! - **Two dense kernels**: Cholesky (information form) or QR (square-root form)
//! - **Iteration policies**: one step per call, or search until a step is accepted
//! - **Manifold variables**: Euclidean `Rn` and planar `SE2` with right-plus retraction
//!
//! ## Layout
//!
//! - [`core`]: variables, orderings, residual blocks and the [`core::problem::Problem`] factor graph
//! - [`linalg`]: linearized systems and their elimination into Bayes nets/trees
//! - [`optimizer`]: the Dog Leg path, step evaluation and trust region controller
//!
//! ```
//! use dogleg_solver::core::problem::Problem;
//! use dogleg_solver::manifold::{ManifoldType, se2::SE2};
//! use dogleg_solver::optimizer::OptimizationStatus;
//! use dogleg_solver::{BetweenFactor, DogLeg, DogLegConfig, PriorFactor};
//! use nalgebra::dvector;
//! use std::collections::HashMap;
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//!
//! let mut problem = Problem::new();
//! problem.add_residual_block(&["x0"], Box::new(PriorFactor::new(SE2::identity())), None)?;
//! problem.add_residual_block(
//!     &["x0", "x1"],
//!     Box::new(BetweenFactor::new(SE2::from_xy_angle(1.0, 0.0, 0.0))),
//!     None,
//! )?;
//!
//! let mut initial = HashMap::new();
//! initial.insert("x0".to_string(), (ManifoldType::SE2, dvector![0.1, -0.1, 0.05]));
//! initial.insert("x1".to_string(), (ManifoldType::SE2, dvector![0.8, 0.2, -0.1]));
//! let values = problem.initialize_variables(&initial)?;
//!
//! let config = DogLegConfig::new()
//!     .with_absolute_error_tolerance(1e-12)
//!     .with_relative_error_tolerance(1e-12);
//! let mut solver = DogLeg::new(&problem, values, config)?;
//! let result = solver.optimize()?;
//! assert!(result.final_cost < 1e-8);
//! assert_ne!(result.status, OptimizationStatus::MaxIterationsReached);
//! # Ok(())
//! # }
//! ```

pub mod core;
pub mod error;
pub mod factors;
pub mod linalg;
#[cfg(feature = "logging")]
pub mod logger;
pub mod manifold;
pub mod optimizer;

pub use self::core::{NonlinearSystem, ordering::Ordering, problem::Problem, variable::Variable};
pub use error::{DogLegSolverError, DogLegSolverResult};

pub use factors::{BetweenFactor, Factor, LinearFactor, PriorFactor};

pub use linalg::{EliminatedSystem, EliminationMode, Factorization};
#[cfg(feature = "logging")]
pub use logger::{init_logger, init_logger_with_level};
pub use optimizer::{
    DogLeg, DogLegConfig, OptimizationStatus, OptimizerError, SolverResult,
    dog_leg::{DoglegVerbosity, IterationPolicy, Verbosity},
};
