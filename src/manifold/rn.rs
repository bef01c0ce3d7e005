//! Euclidean space ℝⁿ viewed as an additive Lie group.
//!
//! Composition is vector addition, the inverse is negation and both the
//! exponential and logarithmic maps are the identity. Every Jacobian is
//! therefore the identity (or its negation), which keeps Euclidean variables
//! on the same code path as the proper manifolds.

use crate::manifold::{LieGroup, ManifoldError, ManifoldResult, Tangent};
use nalgebra::{DMatrix, DVector};
use std::{
    fmt,
    fmt::{Display, Formatter},
};

/// Point in ℝⁿ
#[derive(Debug, Clone, PartialEq)]
pub struct Rn {
    data: DVector<f64>,
}

impl Display for Rn {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "Rn({:?})", self.data.as_slice())
    }
}

impl From<DVector<f64>> for Rn {
    fn from(data: DVector<f64>) -> Self {
        Rn { data }
    }
}

impl From<Rn> for DVector<f64> {
    fn from(rn: Rn) -> Self {
        rn.data
    }
}

impl Rn {
    pub fn new(data: DVector<f64>) -> Self {
        Rn { data }
    }

    /// # Errors
    /// [`ManifoldError::InvalidNumber`] if any entry is NaN or Inf.
    pub fn try_from_vector(data: DVector<f64>) -> ManifoldResult<Self> {
        if data.iter().any(|v| !v.is_finite()) {
            return Err(ManifoldError::InvalidNumber);
        }
        Ok(Rn { data })
    }

    pub fn from_slice(values: &[f64]) -> Self {
        Rn {
            data: DVector::from_column_slice(values),
        }
    }

    pub fn zeros(dim: usize) -> Self {
        Rn {
            data: DVector::zeros(dim),
        }
    }

    pub fn data(&self) -> &DVector<f64> {
        &self.data
    }

    pub fn dim(&self) -> usize {
        self.data.len()
    }
}

impl LieGroup for Rn {
    type TangentVector = RnTangent;
    type JacobianMatrix = DMatrix<f64>;

    fn inverse(&self, jacobian: Option<&mut Self::JacobianMatrix>) -> Self {
        if let Some(jac) = jacobian {
            *jac = -DMatrix::identity(self.dim(), self.dim());
        }
        Rn {
            data: -&self.data,
        }
    }

    fn compose(
        &self,
        other: &Self,
        jacobian_self: Option<&mut Self::JacobianMatrix>,
        jacobian_other: Option<&mut Self::JacobianMatrix>,
    ) -> Self {
        if let Some(jac) = jacobian_self {
            *jac = DMatrix::identity(self.dim(), self.dim());
        }
        if let Some(jac) = jacobian_other {
            *jac = DMatrix::identity(self.dim(), self.dim());
        }
        Rn {
            data: &self.data + &other.data,
        }
    }

    fn log(&self, jacobian: Option<&mut Self::JacobianMatrix>) -> Self::TangentVector {
        if let Some(jac) = jacobian {
            *jac = DMatrix::identity(self.dim(), self.dim());
        }
        RnTangent {
            data: self.data.clone(),
        }
    }

    fn adjoint(&self) -> Self::JacobianMatrix {
        DMatrix::identity(self.dim(), self.dim())
    }

    fn tangent_dim(&self) -> usize {
        self.dim()
    }
}

/// Tangent vector of ℝⁿ (itself a vector in ℝⁿ)
#[derive(Debug, Clone, PartialEq)]
pub struct RnTangent {
    data: DVector<f64>,
}

impl From<DVector<f64>> for RnTangent {
    fn from(data: DVector<f64>) -> Self {
        RnTangent { data }
    }
}

impl From<RnTangent> for DVector<f64> {
    fn from(tangent: RnTangent) -> Self {
        tangent.data
    }
}

impl Tangent<Rn> for RnTangent {
    fn exp(&self) -> Rn {
        Rn {
            data: self.data.clone(),
        }
    }

    fn right_jacobian(&self) -> DMatrix<f64> {
        DMatrix::identity(self.data.len(), self.data.len())
    }

    fn right_jacobian_inv(&self) -> DMatrix<f64> {
        DMatrix::identity(self.data.len(), self.data.len())
    }
}
