//! Residual blocks: one factor, the variables it connects and its noise model.
//!
//! A block evaluates its factor on the current [`Values`], whitens the result
//! with the optional square-root information matrix `W` and either reports the
//! error `½||W·r||²` or the whitened linearization `A = W·J`, `b = -W·r`.

use nalgebra::{DMatrix, DVector};

use crate::core::{CoreError, CoreResult, ordering::Ordering, variable::Values};
use crate::factors::Factor;
use crate::linalg::JacobianFactor;

pub struct ResidualBlock {
    pub residual_block_id: usize,

    pub variable_key_list: Vec<String>,

    pub factor: Box<dyn Factor>,

    /// Square-root information `W`; identity when `None`
    pub sqrt_information: Option<DMatrix<f64>>,
}

impl ResidualBlock {
    pub fn new(
        residual_block_id: usize,
        variable_key_list: &[&str],
        factor: Box<dyn Factor>,
        sqrt_information: Option<DMatrix<f64>>,
    ) -> Self {
        ResidualBlock {
            residual_block_id,
            variable_key_list: variable_key_list.iter().map(|s| s.to_string()).collect(),
            factor,
            sqrt_information,
        }
    }

    fn parameters(&self, values: &Values) -> CoreResult<Vec<DVector<f64>>> {
        self.variable_key_list
            .iter()
            .map(|key| {
                values.get(key).map(|var| var.to_vector()).ok_or_else(|| {
                    CoreError::Variable(format!(
                        "residual block {} references unknown variable '{}'",
                        self.residual_block_id, key
                    ))
                    .log()
                })
            })
            .collect()
    }

    fn whiten_vector(&self, residual: DVector<f64>) -> DVector<f64> {
        match &self.sqrt_information {
            Some(w) => w * residual,
            None => residual,
        }
    }

    fn check_residual(&self, residual: &DVector<f64>) -> CoreResult<()> {
        if residual.len() != self.factor.get_dimension() {
            return Err(CoreError::DimensionMismatch(format!(
                "residual block {} produced {} rows, factor declares {}",
                self.residual_block_id,
                residual.len(),
                self.factor.get_dimension()
            ))
            .log());
        }
        Ok(())
    }

    /// Whitened residual `W·r(x)`.
    pub fn whitened_residual(&self, values: &Values) -> CoreResult<DVector<f64>> {
        let params = self.parameters(values)?;
        let (residual, _) = self.factor.linearize(&params, false);
        self.check_residual(&residual)?;
        Ok(self.whiten_vector(residual))
    }

    /// Error contribution `½||W·r(x)||²`. Non-finite residuals propagate as a
    /// non-finite error.
    pub fn error(&self, values: &Values) -> CoreResult<f64> {
        Ok(0.5 * self.whitened_residual(values)?.norm_squared())
    }

    /// Whitened linearization at `values`, with one term per connected variable
    /// keyed by its ordering slot.
    pub fn linearize(&self, values: &Values, ordering: &Ordering) -> CoreResult<JacobianFactor> {
        let params = self.parameters(values)?;
        let (residual, jacobian) = self.factor.linearize(&params, true);
        self.check_residual(&residual)?;
        let jacobian = jacobian.ok_or_else(|| {
            CoreError::FactorLinearization(format!(
                "residual block {} returned no Jacobian",
                self.residual_block_id
            ))
            .log()
        })?;

        let mut sizes = Vec::with_capacity(self.variable_key_list.len());
        for key in &self.variable_key_list {
            if let Some(var) = values.get(key) {
                sizes.push(var.get_size());
            }
        }
        let total: usize = sizes.iter().sum();
        if jacobian.nrows() != residual.len() || jacobian.ncols() != total {
            return Err(CoreError::DimensionMismatch(format!(
                "residual block {} Jacobian is {}x{}, expected {}x{}",
                self.residual_block_id,
                jacobian.nrows(),
                jacobian.ncols(),
                residual.len(),
                total
            ))
            .log());
        }

        let (a, b) = match &self.sqrt_information {
            Some(w) => (w * &jacobian, -(w * residual)),
            None => (jacobian, -residual),
        };

        let mut terms = Vec::with_capacity(sizes.len());
        let mut col = 0;
        for (key, &size) in self.variable_key_list.iter().zip(&sizes) {
            let slot = ordering.position(key).ok_or_else(|| {
                CoreError::Ordering(format!("variable '{key}' is missing from the ordering")).log()
            })?;
            terms.push((slot, a.columns(col, size).into_owned()));
            col += size;
        }

        JacobianFactor::new(terms, b).map_err(|e| {
            CoreError::FactorLinearization(format!(
                "residual block {} produced an invalid Jacobian factor",
                self.residual_block_id
            ))
            .log_with_source(e)
        })
    }
}
