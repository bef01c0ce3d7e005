//! Prior factor for unary constraints on variables.

use super::{Factor, copy_block};
use crate::manifold::{LieGroup, Tangent};
use nalgebra::{DMatrix, DVector};

/// Prior factor (unary constraint) on a single variable.
///
/// Anchors a variable to a measured or known value `z`.
///
/// # Mathematical Formulation
///
/// ```text
/// r = log(z⁻¹ · x)
/// J = Jr⁻¹(r)
/// ```
///
/// For Euclidean variables this reduces to `r = x - z` with `J = I`.
///
/// # Example
///
/// ```
/// use dogleg_solver::factors::{Factor, PriorFactor};
/// use dogleg_solver::manifold::rn::Rn;
/// use nalgebra::dvector;
///
/// let prior = PriorFactor::new(Rn::new(dvector![1.0, 2.0]));
/// let (residual, jacobian) = prior.linearize(&[dvector![1.5, 2.3]], true);
///
/// assert!((residual[0] - 0.5).abs() < 1e-10);
/// assert!((residual[1] - 0.3).abs() < 1e-10);
/// assert_eq!(jacobian.map(|j| j[(1, 1)]), Some(1.0));
/// ```
#[derive(Debug, Clone)]
pub struct PriorFactor<T>
where
    T: LieGroup + Send + Sync,
{
    /// The prior value
    pub prior: T,
}

impl<T> PriorFactor<T>
where
    T: LieGroup + Send + Sync,
{
    pub fn new(prior: T) -> Self {
        Self { prior }
    }
}

impl<T> Factor for PriorFactor<T>
where
    T: LieGroup + Send + Sync + From<DVector<f64>>,
    T::TangentVector: Into<DVector<f64>>,
{
    fn linearize(
        &self,
        params: &[DVector<f64>],
        compute_jacobian: bool,
    ) -> (DVector<f64>, Option<DMatrix<f64>>) {
        let x = T::from(params[0].clone());
        let error = x.right_minus(&self.prior);

        let jacobian = if compute_jacobian {
            let dof = x.tangent_dim();
            let mut jacobian = DMatrix::zeros(dof, dof);
            copy_block(&mut jacobian, &error.right_jacobian_inv(), dof, 0);
            Some(jacobian)
        } else {
            None
        };

        (error.into(), jacobian)
    }

    fn get_dimension(&self) -> usize {
        self.prior.tangent_dim()
    }

    fn num_variables(&self) -> usize {
        1
    }
}
