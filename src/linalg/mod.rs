//! Sparse linear algebra for the Dog Leg step engine.
//!
//! A linearized problem is a [`LinearSystem`]: a set of [`JacobianFactor`]s over
//! ordering slots whose sum is the quadratic model `½||A·h - b||²`. Eliminating
//! the slots in ordering order yields a square-root information system
//! `½||R·h - d||²` stored either as a chain of conditionals
//! ([`GaussianBayesNet`], sequential) or as a clique tree
//! ([`GaussianBayesTree`], multifrontal). Both are consumed through the
//! [`EliminatedSystem`] trait, so the trust-region logic never sees the
//! topology.
//!
//! Each elimination step is a small dense problem solved with either a
//! Cholesky factorization of the gathered information matrix or a
//! Householder QR of the stacked Jacobian rows.

pub mod bayes_net;
pub mod bayes_tree;
pub mod conditional;
pub mod elimination;
pub mod linear_system;

pub use bayes_net::GaussianBayesNet;
pub use bayes_tree::{Clique, GaussianBayesTree};
pub use conditional::GaussianConditional;
pub use linear_system::{JacobianFactor, LinearSystem};

use faer::Mat;
use std::{
    fmt,
    fmt::{Display, Formatter},
    str::FromStr,
};
use thiserror::Error;
use tracing::error;

/// Topology of the eliminated structure
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum EliminationMode {
    /// One conditional per slot, chained in ordering order
    Sequential,
    /// Clique tree built from the elimination tree
    #[default]
    Multifrontal,
}

impl Display for EliminationMode {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            EliminationMode::Sequential => write!(f, "SEQUENTIAL"),
            EliminationMode::Multifrontal => write!(f, "MULTIFRONTAL"),
        }
    }
}

impl FromStr for EliminationMode {
    type Err = LinAlgError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "SEQUENTIAL" => Ok(EliminationMode::Sequential),
            "MULTIFRONTAL" => Ok(EliminationMode::Multifrontal),
            other => Err(LinAlgError::UnknownSelector(format!(
                "elimination mode '{other}'"
            ))),
        }
    }
}

/// Dense kernel used for each elimination step
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum Factorization {
    /// Cholesky of the gathered information matrix (also accepted as `LDL`)
    #[default]
    Cholesky,
    /// Householder QR of the stacked Jacobian rows
    QR,
}

impl Display for Factorization {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Factorization::Cholesky => write!(f, "CHOLESKY"),
            Factorization::QR => write!(f, "QR"),
        }
    }
}

impl FromStr for Factorization {
    type Err = LinAlgError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "CHOLESKY" | "LDL" => Ok(Factorization::Cholesky),
            "QR" => Ok(Factorization::QR),
            other => Err(LinAlgError::UnknownSelector(format!(
                "factorization '{other}'"
            ))),
        }
    }
}

/// Linear algebra specific error types
#[derive(Debug, Clone, PartialEq, Error)]
pub enum LinAlgError {
    /// Rank-deficient system detected while eliminating or solving
    #[error("Singular matrix detected while eliminating slot {slot}")]
    SingularMatrix { slot: usize },

    /// Gradient lies in the null space of the model (`||R·g|| = 0`, `||g|| > 0`)
    #[error("Degenerate gradient: the quadratic model is flat along the gradient")]
    DegenerateGradient,

    /// Factor or vector dimensions disagree with the system layout
    #[error("Dimension mismatch: {0}")]
    DimensionMismatch(String),

    /// Malformed Jacobian factor
    #[error("Invalid factor: {0}")]
    InvalidFactor(String),

    /// Failed to create sparse matrix from triplets
    #[error("Failed to create sparse matrix: {0}")]
    SparseMatrixCreation(String),

    /// Unrecognized elimination or factorization selector
    #[error("Unknown selector: {0}")]
    UnknownSelector(String),
}

impl LinAlgError {
    /// Log the error with tracing::error and return self for chaining
    ///
    /// # Example
    /// ```ignore
    /// operation()
    ///     .map_err(|e| LinAlgError::from(e).log())?;
    /// ```
    #[must_use]
    pub fn log(self) -> Self {
        error!("{}", self);
        self
    }

    /// Log the error with the original source error from a third-party library
    ///
    /// # Example
    /// ```ignore
    /// SparseColMat::try_new_from_triplets(n, n, &triplets)
    ///     .map_err(|e| {
    ///         LinAlgError::SparseMatrixCreation("R assembly failed".to_string())
    ///             .log_with_source(e)
    ///     })?;
    /// ```
    #[must_use]
    pub fn log_with_source<E: std::fmt::Debug>(self, source_error: E) -> Self {
        error!("{} | Source: {:?}", self, source_error);
        self
    }

    /// Whether the error reports a rank-deficient system
    pub fn is_singular(&self) -> bool {
        matches!(self, LinAlgError::SingularMatrix { .. })
    }
}

/// Result type for linear algebra operations
pub type LinAlgResult<T> = Result<T, LinAlgError>;

/// Factorized linear system `½||R·h - d||²` produced by elimination.
///
/// Vectors are `dim() × 1` column matrices laid out by the elimination ordering.
pub trait EliminatedSystem {
    /// Total number of scalar unknowns
    fn dim(&self) -> usize;

    /// Exact minimizer of the quadratic model (the Gauss-Newton increment)
    ///
    /// # Errors
    /// Returns [`LinAlgError::SingularMatrix`] if back-substitution breaks down.
    fn solve(&self) -> LinAlgResult<Mat<f64>>;

    /// Gradient of the model at zero increment, `g = -Rᵀ·d`
    fn gradient_at_zero(&self) -> Mat<f64>;

    /// Apply the square-root information operator, `R·x`
    fn apply(&self, x: &Mat<f64>) -> Mat<f64>;

    /// Model error `½||R·h - d||²`
    fn error(&self, h: &Mat<f64>) -> f64;

    /// Predicted decrease `error(0) - error(h)` of the quadratic model
    fn predicted_decrease(&self, h: &Mat<f64>) -> f64 {
        self.error(&Mat::zeros(self.dim(), 1)) - self.error(h)
    }
}

/// Eliminate a linear system into the topology selected by `mode`, using the
/// dense kernel selected by `factorization`.
///
/// # Errors
/// Returns [`LinAlgError::SingularMatrix`] if the system is rank deficient.
pub fn eliminate(
    system: &LinearSystem,
    mode: EliminationMode,
    factorization: Factorization,
) -> LinAlgResult<Box<dyn EliminatedSystem>> {
    match mode {
        EliminationMode::Sequential => Ok(Box::new(GaussianBayesNet::eliminate(
            system,
            factorization,
        )?)),
        EliminationMode::Multifrontal => Ok(Box::new(GaussianBayesTree::eliminate(
            system,
            factorization,
        )?)),
    }
}
