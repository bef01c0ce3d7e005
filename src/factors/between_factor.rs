//! Between factor for relative constraints between two variables.

use super::{Factor, copy_block};
use crate::manifold::{LieGroup, Tangent};
use nalgebra::{DMatrix, DVector};

/// Relative measurement `z` between two variables of the same group.
///
/// # Mathematical Formulation
///
/// ```text
/// e   = log(z⁻¹ · x_i⁻¹ · x_j)
/// J_i = -Jr⁻¹(e) · Ad(x_j⁻¹ · x_i)
/// J_j =  Jr⁻¹(e)
/// ```
///
/// The Jacobian columns are `[∂e/∂x_i | ∂e/∂x_j]`. For Euclidean variables
/// the residual is `(x_j - x_i) - z`.
#[derive(Debug, Clone)]
pub struct BetweenFactor<T>
where
    T: LieGroup + Send + Sync,
{
    pub relative_pose: T,
}

impl<T> BetweenFactor<T>
where
    T: LieGroup + Send + Sync,
{
    pub fn new(relative_pose: T) -> Self {
        Self { relative_pose }
    }
}

impl<T> Factor for BetweenFactor<T>
where
    T: LieGroup + Send + Sync + From<DVector<f64>>,
    T::TangentVector: Into<DVector<f64>>,
{
    fn linearize(
        &self,
        params: &[DVector<f64>],
        compute_jacobian: bool,
    ) -> (DVector<f64>, Option<DMatrix<f64>>) {
        let x_i = T::from(params[0].clone());
        let x_j = T::from(params[1].clone());

        let predicted = x_i.between(&x_j);
        let error = self.relative_pose.between(&predicted).log(None);

        let jacobian = if compute_jacobian {
            let dof = x_i.tangent_dim();
            let jr_inv = error.right_jacobian_inv();
            let j_i = -(jr_inv.clone() * x_j.between(&x_i).adjoint());

            let mut jacobian = DMatrix::zeros(dof, 2 * dof);
            copy_block(&mut jacobian, &j_i, dof, 0);
            copy_block(&mut jacobian, &jr_inv, dof, dof);
            Some(jacobian)
        } else {
            None
        };

        (error.into(), jacobian)
    }

    fn get_dimension(&self) -> usize {
        self.relative_pose.tangent_dim()
    }

    fn num_variables(&self) -> usize {
        2
    }
}
