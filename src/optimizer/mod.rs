//! Trust-region optimization for nonlinear least squares problems.
//!
//! - [`dogleg_path`]: Powell's Dog Leg step for a given trust region radius
//! - [`step_evaluation`]: gain ratio of a step against the nonlinear error
//! - [`dog_leg`]: the controller that accepts/rejects steps and adapts the radius

use crate::core::CoreError;
use crate::linalg::LinAlgError;
use std::{
    fmt,
    fmt::{Display, Formatter},
};
use thiserror::Error;
use tracing::error;
use web_time as time;

pub mod dog_leg;
pub mod dogleg_path;
pub mod step_evaluation;

pub use dog_leg::{DogLeg, DogLegConfig, DogLegState, DogLegSummary, IterationOutcome};
pub use dogleg_path::{DoglegPath, DoglegStep, StepKind, compute_dogleg_step};
pub use step_evaluation::{StepEvaluation, evaluate_step};

#[derive(Debug, Clone, Error)]
pub enum OptimizerError {
    /// Invalid selector or numeric option; never retried
    #[error("Invalid optimizer configuration: {0}")]
    InvalidConfiguration(String),

    /// The linearized system is rank deficient
    #[error("Singular linear system")]
    SingularSystem(#[source] LinAlgError),

    /// Any other failure while building or eliminating the linear system
    #[error("Linear system failure")]
    LinearSystem(#[source] LinAlgError),

    /// The radius reached its floor without an accepted step
    #[error("No progress: trust region radius {radius:.6e} reached the floor {radius_floor:.6e}")]
    NoProgress { radius: f64, radius_floor: f64 },

    #[error("Nonlinear system failure: {0}")]
    NonlinearSystem(#[from] CoreError),

    #[error("Numerical instability detected: {0}")]
    NumericalInstability(String),
}

impl From<LinAlgError> for OptimizerError {
    fn from(err: LinAlgError) -> Self {
        if err.is_singular() {
            OptimizerError::SingularSystem(err)
        } else {
            OptimizerError::LinearSystem(err)
        }
    }
}

impl OptimizerError {
    #[must_use]
    pub fn log(self) -> Self {
        error!("{}", self);
        self
    }

    #[must_use]
    pub fn log_with_source<E: std::fmt::Debug>(self, source_error: E) -> Self {
        error!("{} | Source: {:?}", self, source_error);
        self
    }

    /// Whether the failure leaves no way to continue from the current state.
    ///
    /// `NoProgress` is the only non-fatal kind: the caller may read it as
    /// convergence at a stationary point or as stagnation.
    pub fn is_fatal(&self) -> bool {
        !self.is_no_progress()
    }

    pub fn is_no_progress(&self) -> bool {
        matches!(self, OptimizerError::NoProgress { .. })
    }
}

pub type OptimizerResult<T> = Result<T, OptimizerError>;

/// Why the outer loop stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OptimizationStatus {
    /// Error fell to or below `error_tolerance`
    ErrorToleranceReached,
    /// Absolute error decrease fell below `absolute_error_tolerance`
    AbsoluteErrorToleranceReached,
    /// Relative error decrease fell below `relative_error_tolerance`
    RelativeErrorToleranceReached,
    /// Zero step with zero predicted decrease
    StationaryPoint,
    MaxIterationsReached,
    /// The trust region collapsed to its floor without an accepted step
    NoProgress,
}

impl OptimizationStatus {
    pub fn is_converged(&self) -> bool {
        matches!(
            self,
            OptimizationStatus::ErrorToleranceReached
                | OptimizationStatus::AbsoluteErrorToleranceReached
                | OptimizationStatus::RelativeErrorToleranceReached
                | OptimizationStatus::StationaryPoint
        )
    }
}

impl Display for OptimizationStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            OptimizationStatus::ErrorToleranceReached => write!(f, "Error tolerance reached"),
            OptimizationStatus::AbsoluteErrorToleranceReached => {
                write!(f, "Absolute error decrease below tolerance")
            }
            OptimizationStatus::RelativeErrorToleranceReached => {
                write!(f, "Relative error decrease below tolerance")
            }
            OptimizationStatus::StationaryPoint => write!(f, "Stationary point"),
            OptimizationStatus::MaxIterationsReached => write!(f, "Maximum iterations reached"),
            OptimizationStatus::NoProgress => write!(f, "No progress (trust region collapsed)"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SolverResult<T> {
    pub parameters: T,
    pub status: OptimizationStatus,
    pub initial_cost: f64,
    pub final_cost: f64,
    /// Number of `iterate` calls made by the outer loop
    pub iterations: usize,
    pub elapsed_time: time::Duration,
    pub summary: DogLegSummary,
}
