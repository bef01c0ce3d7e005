//! Factor implementations for graph-based optimization problems.
//!
//! A factor is a local error term over a handful of variables. The total
//! objective of a factor graph is
//!
//! ```text
//! E(x) = ½ Σ_i ||W_i · r_i(x)||²
//! ```
//!
//! where `W_i` is an optional square-root information matrix attached to the
//! residual block. Each factor computes its residual `r_i` and the Jacobian
//! `∂r_i/∂x` with respect to right perturbations of the connected variables,
//! stacked column-wise in the order the variables were listed.
//!
//! # Factor Types
//!
//! - [`PriorFactor`]: unary constraint `log(z⁻¹ · x)`
//! - [`BetweenFactor`]: relative constraint `log(z⁻¹ · x_i⁻¹ · x_j)`
//! - [`LinearFactor`]: affine residual `Σ A_k · x_k - b` on Euclidean variables

use nalgebra::{DMatrix, DVector};
use thiserror::Error;
use tracing::error;

pub mod between_factor;
pub mod linear_factor;
pub mod prior_factor;

pub use between_factor::BetweenFactor;
pub use linear_factor::LinearFactor;
pub use prior_factor::PriorFactor;

#[derive(Debug, Clone, Error)]
pub enum FactorError {
    #[error("Invalid dimension: expected {expected}, got {actual}")]
    InvalidDimension { expected: usize, actual: usize },

    #[error("Invalid factor definition: {0}")]
    InvalidDefinition(String),
}

impl FactorError {
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
}

pub type FactorResult<T> = Result<T, FactorError>;

/// A residual term over one or more variables.
///
/// `params` holds the vector form of each connected variable (for SE(2) this is
/// `[x, y, θ]`). When `compute_jacobian` is set, the returned matrix has
/// `get_dimension()` rows and one column block per variable, each block as wide
/// as that variable's tangent space.
pub trait Factor: Send + Sync {
    fn linearize(
        &self,
        params: &[DVector<f64>],
        compute_jacobian: bool,
    ) -> (DVector<f64>, Option<DMatrix<f64>>);

    fn get_dimension(&self) -> usize;

    /// Number of variables the factor connects, i.e. the expected `params.len()`.
    fn num_variables(&self) -> usize;
}

/// Copy a fixed or dynamic square Jacobian into a column block of `target`.
pub(crate) fn copy_block<M>(target: &mut DMatrix<f64>, source: &M, dof: usize, col_offset: usize)
where
    M: std::ops::Index<(usize, usize), Output = f64>,
{
    for i in 0..dof {
        for j in 0..dof {
            target[(i, j + col_offset)] = source[(i, j)];
        }
    }
}
