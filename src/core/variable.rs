//! Variables for optimization on manifolds.
//!
//! Each variable stores a manifold value and is updated with the right-plus
//! retraction `x ⊞ δ = x · Exp(δ)`, where `δ` is a tangent vector taken from the
//! slot of the increment that the ordering assigns to the variable.
//!
//! # Example
//!
//! ```
//! use dogleg_solver::core::variable::Variable;
//! use dogleg_solver::manifold::se2::{SE2, SE2Tangent};
//!
//! let var = Variable::new(SE2::from_xy_angle(1.0, 2.0, 0.0));
//! let moved = var.plus(&SE2Tangent::new(0.5, 0.0, 0.0));
//! assert!((moved.x() - 1.5).abs() < 1e-12);
//! ```

use std::collections::HashMap;

use crate::core::{CoreError, CoreResult};
use crate::manifold::{LieGroup, ManifoldType, Tangent, rn::Rn, se2::SE2};
use nalgebra::DVector;

/// Variable living on the manifold `M`.
#[derive(Clone, Debug)]
pub struct Variable<M: LieGroup> {
    /// The manifold value
    pub value: M,
}

impl<M> Variable<M>
where
    M: LieGroup,
{
    pub fn new(value: M) -> Self {
        Variable { value }
    }

    pub fn set_value(&mut self, value: M) {
        self.value = value;
    }

    /// Degrees of freedom (tangent space dimension).
    pub fn get_size(&self) -> usize {
        self.value.tangent_dim()
    }

    /// Right-plus retraction of the current value.
    pub fn plus(&self, tangent: &M::TangentVector) -> M {
        self.value.right_plus(tangent)
    }
}

/// Manifold-erased variable stored in [`Values`].
#[derive(Clone, Debug)]
pub enum VariableEnum {
    Rn(Variable<Rn>),
    SE2(Variable<SE2>),
}

/// Named variable assignment consumed by [`Problem`](crate::core::problem::Problem).
pub type Values = HashMap<String, VariableEnum>;

impl VariableEnum {
    /// Build a variable from its vector form (`[x, y, θ]` for SE(2)).
    ///
    /// # Errors
    /// Returns [`CoreError::Variable`] if the vector has the wrong length or
    /// holds non-finite entries; the underlying [`ManifoldError`] is logged.
    ///
    /// [`ManifoldError`]: crate::manifold::ManifoldError
    pub fn from_vector(manifold: ManifoldType, data: DVector<f64>) -> CoreResult<Self> {
        let variable = match manifold {
            ManifoldType::RN => Rn::try_from_vector(data).map(|rn| VariableEnum::Rn(Variable::new(rn))),
            ManifoldType::SE2 => {
                SE2::try_from_vector(&data).map(|pose| VariableEnum::SE2(Variable::new(pose)))
            }
        };
        variable.map_err(|e| {
            CoreError::Variable(format!("invalid initial value for {manifold} variable: {e}"))
                .log_with_source(e)
        })
    }

    pub fn manifold_type(&self) -> ManifoldType {
        match self {
            VariableEnum::Rn(_) => ManifoldType::RN,
            VariableEnum::SE2(_) => ManifoldType::SE2,
        }
    }

    /// Tangent space dimension.
    pub fn get_size(&self) -> usize {
        match self {
            VariableEnum::Rn(var) => var.get_size(),
            VariableEnum::SE2(var) => var.get_size(),
        }
    }

    /// Vector form handed to factors.
    pub fn to_vector(&self) -> DVector<f64> {
        match self {
            VariableEnum::Rn(var) => var.value.clone().into(),
            VariableEnum::SE2(var) => var.value.clone().into(),
        }
    }

    /// Return a copy of this variable moved by `step` in its tangent space.
    ///
    /// # Errors
    /// Returns [`CoreError::DimensionMismatch`] if `step` does not match the
    /// tangent dimension.
    pub fn retract(&self, step: &[f64]) -> CoreResult<Self> {
        if step.len() != self.get_size() {
            return Err(CoreError::DimensionMismatch(format!(
                "{} variable of dimension {} given a step of length {}",
                self.manifold_type(),
                self.get_size(),
                step.len()
            ))
            .log());
        }
        let delta = DVector::from_column_slice(step);
        Ok(match self {
            VariableEnum::Rn(var) => VariableEnum::Rn(Variable::new(var.plus(&delta.into()))),
            VariableEnum::SE2(var) => VariableEnum::SE2(Variable::new(var.plus(&delta.into()))),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifold::se2::SE2Tangent;
    use nalgebra::dvector;

    type TestResult = Result<(), Box<dyn std::error::Error>>;

    #[test]
    fn test_rn_retract_is_addition() -> TestResult {
        let var = VariableEnum::from_vector(ManifoldType::RN, dvector![1.0, 2.0])?;
        let moved = var.retract(&[0.5, -1.0])?;
        assert_eq!(moved.to_vector(), dvector![1.5, 1.0]);
        assert_eq!(moved.manifold_type(), ManifoldType::RN);
        Ok(())
    }

    #[test]
    fn test_se2_retract_moves_in_body_frame() -> TestResult {
        let var = VariableEnum::from_vector(
            ManifoldType::SE2,
            dvector![0.0, 0.0, std::f64::consts::FRAC_PI_2],
        )?;
        let moved = var.retract(&[1.0, 0.0, 0.0])?;
        let v = moved.to_vector();
        assert!(v[0].abs() < 1e-12);
        assert!((v[1] - 1.0).abs() < 1e-12);
        assert!((v[2] - std::f64::consts::FRAC_PI_2).abs() < 1e-12);
        Ok(())
    }

    #[test]
    fn test_retract_rejects_wrong_length() -> TestResult {
        let var = VariableEnum::from_vector(ManifoldType::SE2, dvector![0.0, 0.0, 0.0])?;
        assert!(matches!(
            var.retract(&[1.0, 0.0]),
            Err(CoreError::DimensionMismatch(_))
        ));
        Ok(())
    }

    #[test]
    fn test_from_vector_validates_input() {
        match VariableEnum::from_vector(ManifoldType::SE2, dvector![0.0, 1.0]) {
            Err(CoreError::Variable(msg)) => {
                assert!(msg.contains("SE2"));
                assert!(msg.contains("expected 3, got 2"));
            }
            other => panic!("expected a variable error, got {other:?}"),
        }
        match VariableEnum::from_vector(ManifoldType::SE2, dvector![0.0, f64::INFINITY, 0.0]) {
            Err(CoreError::Variable(msg)) => assert!(msg.contains("NaN or Inf")),
            other => panic!("expected a variable error, got {other:?}"),
        }
        match VariableEnum::from_vector(ManifoldType::RN, dvector![f64::NAN]) {
            Err(CoreError::Variable(msg)) => assert!(msg.contains("NaN or Inf")),
            other => panic!("expected a variable error, got {other:?}"),
        }
    }

    #[test]
    fn test_generic_variable_plus() {
        let var = Variable::new(SE2::from_xy_angle(1.0, 2.0, 0.0));
        assert_eq!(var.get_size(), 3);
        let moved = var.plus(&SE2Tangent::new(0.5, 0.0, 0.0));
        assert!((moved.x() - 1.5).abs() < 1e-12);
        assert!((moved.y() - 2.0).abs() < 1e-12);
    }
}
