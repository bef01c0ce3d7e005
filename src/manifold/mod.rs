//! Manifold representations for optimization variables.
//!
//! Variables live on Lie groups and are updated with the right-plus retraction
//!
//! ```text
//! x ⊕ δ = x · Exp(δ)
//! ```
//!
//! so an increment computed by the linear solver is always expressed in the
//! tangent space at the current estimate. Two groups are provided:
//!
//! - [`rn::Rn`]: Euclidean vectors, where composition is addition
//! - [`se2::SE2`]: planar rigid motions with tangent `[x, y, θ]`
//!
//! Jacobians follow the right convention used throughout the crate: a
//! derivative `∂f/∂x` is taken with respect to a right perturbation `x · Exp(δ)`.

use std::ops::{Index, Mul, Neg};
use std::{
    fmt,
    fmt::{Display, Formatter},
};
use thiserror::Error;

pub mod rn;
pub mod se2;

/// Errors raised by manifold conversions and operations
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ManifoldError {
    /// A vector of the wrong length was used to build a group element or tangent
    #[error("Dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    /// NaN or Inf encountered in a group element or tangent vector
    #[error("Invalid number: NaN or Inf detected")]
    InvalidNumber,
}

pub type ManifoldResult<T> = Result<T, ManifoldError>;

/// Manifold a variable lives on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ManifoldType {
    RN,
    SE2,
}

impl Display for ManifoldType {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            ManifoldType::RN => write!(f, "Rn"),
            ManifoldType::SE2 => write!(f, "SE2"),
        }
    }
}

/// Lie group interface used by factors and variable retraction.
pub trait LieGroup: Clone {
    /// Element of the Lie algebra in vector form
    type TangentVector: Tangent<Self>;

    /// Square matrix of size `tangent_dim × tangent_dim`
    type JacobianMatrix: Clone
        + Neg<Output = Self::JacobianMatrix>
        + Mul<Output = Self::JacobianMatrix>
        + Index<(usize, usize), Output = f64>;

    /// Group inverse. The optional Jacobian receives `∂x⁻¹/∂x = -Ad(x)`.
    fn inverse(&self, jacobian: Option<&mut Self::JacobianMatrix>) -> Self;

    /// Group composition `self · other`.
    ///
    /// Jacobians are `∂(a·b)/∂a = Ad(b⁻¹)` and `∂(a·b)/∂b = I`.
    fn compose(
        &self,
        other: &Self,
        jacobian_self: Option<&mut Self::JacobianMatrix>,
        jacobian_other: Option<&mut Self::JacobianMatrix>,
    ) -> Self;

    /// Logarithmic map. The optional Jacobian receives `Jr⁻¹(log(x))`.
    fn log(&self, jacobian: Option<&mut Self::JacobianMatrix>) -> Self::TangentVector;

    /// Adjoint matrix `Ad(x)`
    fn adjoint(&self) -> Self::JacobianMatrix;

    /// Degrees of freedom of the tangent space
    fn tangent_dim(&self) -> usize;

    /// Right-plus retraction `x · Exp(δ)`
    fn right_plus(&self, tangent: &Self::TangentVector) -> Self {
        self.compose(&tangent.exp(), None, None)
    }

    /// Right-minus `log(other⁻¹ · self)`
    fn right_minus(&self, other: &Self) -> Self::TangentVector {
        other.inverse(None).compose(self, None, None).log(None)
    }

    /// `self⁻¹ · other`
    fn between(&self, other: &Self) -> Self {
        self.inverse(None).compose(other, None, None)
    }
}

/// Tangent space element of a Lie group.
pub trait Tangent<Group: LieGroup>: Clone {
    /// Exponential map onto the group
    fn exp(&self) -> Group;

    /// Right Jacobian `Jr(τ)`
    fn right_jacobian(&self) -> Group::JacobianMatrix;

    /// Inverse right Jacobian `Jr⁻¹(τ)`
    fn right_jacobian_inv(&self) -> Group::JacobianMatrix;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_manifold_error_display() {
        let err = ManifoldError::DimensionMismatch {
            expected: 3,
            actual: 2,
        };
        assert_eq!(err.to_string(), "Dimension mismatch: expected 3, got 2");
    }

    #[test]
    fn test_manifold_type_display() {
        assert_eq!(ManifoldType::RN.to_string(), "Rn");
        assert_eq!(ManifoldType::SE2.to_string(), "SE2");
    }
}
