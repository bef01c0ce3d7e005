//! Nonlinear side of the optimization problem.
//!
//! This module contains the factor graph that the Dog Leg controller drives:
//! - [`NonlinearSystem`], the contract the controller consumes
//! - [`ordering::Ordering`], the variable-to-slot map shared with linear algebra
//! - [`variable::VariableEnum`] and [`variable::Values`], manifold-valued estimates
//! - [`residual_block::ResidualBlock`] and [`problem::Problem`], the factor graph itself

pub mod ordering;
pub mod problem;
pub mod residual_block;
pub mod variable;

use crate::linalg::LinearSystem;
use faer::Mat;
use ordering::Ordering;
use thiserror::Error;
use tracing::error;

/// Core module error types for optimization problems and factors
#[derive(Debug, Clone, Error)]
pub enum CoreError {
    /// Missing or malformed variable
    #[error("Variable error: {0}")]
    Variable(String),

    /// Invalid elimination ordering
    #[error("Ordering error: {0}")]
    Ordering(String),

    /// Factor linearization failed
    #[error("Factor linearization failed: {0}")]
    FactorLinearization(String),

    /// Dimension mismatch between residual/Jacobian/variables
    #[error("Dimension mismatch: {0}")]
    DimensionMismatch(String),

    /// Invalid input parameter
    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

impl CoreError {
    /// Log the error with tracing::error and return self for chaining
    ///
    /// # Example
    /// ```ignore
    /// operation()
    ///     .map_err(|e| CoreError::from(e).log())?;
    /// ```
    #[must_use]
    pub fn log(self) -> Self {
        error!("{}", self);
        self
    }

    /// Log the error with the original source error
    ///
    /// # Example
    /// ```ignore
    /// JacobianFactor::new(terms, rhs).map_err(|e| {
    ///     CoreError::FactorLinearization("block 3".to_string()).log_with_source(e)
    /// })?;
    /// ```
    #[must_use]
    pub fn log_with_source<E: std::fmt::Debug>(self, source_error: E) -> Self {
        error!("{} | Source: {:?}", self, source_error);
        self
    }
}

/// Result type for core module operations
pub type CoreResult<T> = Result<T, CoreError>;

/// Nonlinear least-squares problem as seen by the trust-region controller.
///
/// Increments are `Mat<f64>` column vectors laid out by the ordering: slot `k`
/// occupies `linear_system.offset(k)..offset(k) + dim(k)`.
pub trait NonlinearSystem {
    /// Variable assignment type
    type Values: Clone + std::fmt::Debug;

    /// Ordering used when the caller does not provide one.
    fn default_ordering(&self, values: &Self::Values) -> CoreResult<Ordering>;

    /// Linearize every factor at `values`; the result models the error as
    /// `½||A·h - b||²` in the increment `h`.
    fn linearize(&self, values: &Self::Values, ordering: &Ordering) -> CoreResult<LinearSystem>;

    /// Total nonlinear error at `values`.
    fn total_error(&self, values: &Self::Values) -> CoreResult<f64>;

    /// Apply `increment` to `values` through each variable's retraction.
    fn retract(
        &self,
        values: &Self::Values,
        increment: &Mat<f64>,
        ordering: &Ordering,
    ) -> CoreResult<Self::Values>;
}
