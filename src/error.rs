//! Error types for the dogleg-solver library
//!
//! # Error Hierarchy
//!
//! - **`DogLegSolverError`** is the top-level error for applications that mix
//!   problem construction and optimization behind one `?`
//! - **Module errors** (`CoreError`, `OptimizerError`, `LinAlgError`, ...) are
//!   wrapped transparently, with their sources preserved
//!
//! Example error chain:
//! ```text
//! DogLegSolverError::Optimizer(
//!     OptimizerError::SingularSystem(
//!         LinAlgError::SingularMatrix { slot: 3 }
//!     )
//! )
//! ```

use crate::{
    core::CoreError, factors::FactorError, linalg::LinAlgError, manifold::ManifoldError,
    optimizer::OptimizerError,
};
use std::error::Error as StdError;
use thiserror::Error;

/// Main result type used throughout the dogleg-solver library
pub type DogLegSolverResult<T> = Result<T, DogLegSolverError>;

/// Main error type for the dogleg-solver library
///
/// # Error Chain Access
///
/// ```
/// use dogleg_solver::error::DogLegSolverError;
/// use dogleg_solver::linalg::LinAlgError;
/// use dogleg_solver::optimizer::OptimizerError;
///
/// let err: DogLegSolverError =
///     OptimizerError::from(LinAlgError::SingularMatrix { slot: 3 }).into();
/// assert_eq!(
///     err.chain_compact(),
///     "Singular linear system → Singular matrix detected while eliminating slot 3"
/// );
/// ```
#[derive(Debug, Error)]
pub enum DogLegSolverError {
    /// Problem construction, variables, orderings
    #[error(transparent)]
    Core(#[from] CoreError),

    /// Trust region controller errors
    #[error(transparent)]
    Optimizer(#[from] OptimizerError),

    /// Linear algebra errors
    #[error(transparent)]
    LinearAlgebra(#[from] LinAlgError),

    /// Manifold operation errors
    #[error(transparent)]
    Manifold(#[from] ManifoldError),

    /// Factor definition errors
    #[error(transparent)]
    Factor(#[from] FactorError),
}

impl DogLegSolverError {
    /// Get the full error chain as a string, one error per line.
    pub fn chain(&self) -> String {
        let mut chain = vec![self.to_string()];
        let mut source = self.source();

        while let Some(err) = source {
            chain.push(format!("  → {}", err));
            source = err.source();
        }

        chain.join("\n")
    }

    /// Get a compact single-line error chain for logging
    ///
    /// ```rust,ignore
    /// error!("Optimization failed: {}", err.chain_compact());
    /// // Output: "Singular linear system → Singular matrix detected while eliminating slot 3"
    /// ```
    pub fn chain_compact(&self) -> String {
        let mut chain = vec![self.to_string()];
        let mut source = self.source();

        while let Some(err) = source {
            chain.push(err.to_string());
            source = err.source();
        }

        chain.join(" → ")
    }
}
