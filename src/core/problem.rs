//! Factor graph of nonlinear residual blocks.
//!
//! [`Problem`] owns residual blocks and implements [`NonlinearSystem`] over
//! [`Values`], so it can be handed directly to the Dog Leg optimizer.
//!
//! # Example
//!
//! ```
//! use dogleg_solver::core::{NonlinearSystem, problem::Problem};
//! use dogleg_solver::factors::{BetweenFactor, PriorFactor};
//! use dogleg_solver::manifold::{ManifoldType, se2::SE2};
//! use nalgebra::dvector;
//! use std::collections::HashMap;
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//!
//! let mut problem = Problem::new();
//! problem.add_residual_block(&["x0"], Box::new(PriorFactor::new(SE2::identity())), None)?;
//! problem.add_residual_block(
//!     &["x0", "x1"],
//!     Box::new(BetweenFactor::new(SE2::from_xy_angle(1.0, 0.0, 0.1))),
//!     None,
//! )?;
//!
//! let mut initial = HashMap::new();
//! initial.insert("x0".to_string(), (ManifoldType::SE2, dvector![0.0, 0.0, 0.0]));
//! initial.insert("x1".to_string(), (ManifoldType::SE2, dvector![1.0, 0.0, 0.1]));
//! let values = problem.initialize_variables(&initial)?;
//!
//! assert!(problem.total_error(&values)? < 1e-20);
//! # Ok(())
//! # }
//! # example().unwrap();
//! ```

use std::collections::{BTreeSet, HashMap};

use faer::Mat;
use nalgebra::{DMatrix, DVector};
use tracing::debug;

#[cfg(feature = "parallel")]
use rayon::prelude::*;

use crate::core::{
    CoreError, CoreResult, NonlinearSystem,
    ordering::Ordering,
    residual_block::ResidualBlock,
    variable::{Values, VariableEnum},
};
use crate::factors::Factor;
use crate::linalg::{JacobianFactor, LinearSystem};
use crate::manifold::ManifoldType;

/// Nonlinear factor graph.
#[derive(Default)]
pub struct Problem {
    /// Total dimension of the stacked residual vector
    pub total_residual_dimension: usize,

    residual_blocks: Vec<ResidualBlock>,
}

impl Problem {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a factor connecting `variable_keys`, optionally weighted by the
    /// square-root information matrix `sqrt_information`.
    ///
    /// # Returns
    /// The id of the new residual block.
    ///
    /// # Errors
    /// Returns [`CoreError::InvalidInput`] if the number of keys differs from
    /// the factor's variable count or if the weight is not square with the
    /// factor's residual dimension.
    pub fn add_residual_block(
        &mut self,
        variable_keys: &[&str],
        factor: Box<dyn Factor>,
        sqrt_information: Option<DMatrix<f64>>,
    ) -> CoreResult<usize> {
        if variable_keys.is_empty() {
            return Err(
                CoreError::InvalidInput("residual block without variables".to_string()).log(),
            );
        }
        if variable_keys.len() != factor.num_variables() {
            return Err(CoreError::InvalidInput(format!(
                "factor connects {} variables, got keys {:?}",
                factor.num_variables(),
                variable_keys
            ))
            .log());
        }
        let dimension = factor.get_dimension();
        if let Some(w) = &sqrt_information
            && (w.nrows() != dimension || w.ncols() != dimension)
        {
            return Err(CoreError::InvalidInput(format!(
                "sqrt information is {}x{}, factor dimension is {}",
                w.nrows(),
                w.ncols(),
                dimension
            ))
            .log());
        }

        let block_id = self.residual_blocks.len();
        self.residual_blocks.push(ResidualBlock::new(
            block_id,
            variable_keys,
            factor,
            sqrt_information,
        ));
        self.total_residual_dimension += dimension;
        Ok(block_id)
    }

    pub fn num_residual_blocks(&self) -> usize {
        self.residual_blocks.len()
    }

    pub fn residual_blocks(&self) -> &[ResidualBlock] {
        &self.residual_blocks
    }

    /// Keys referenced by at least one residual block, sorted.
    pub fn variable_keys(&self) -> BTreeSet<String> {
        self.residual_blocks
            .iter()
            .flat_map(|block| block.variable_key_list.iter().cloned())
            .collect()
    }

    /// Lexicographic ordering of every variable the graph references.
    pub fn natural_ordering(&self) -> CoreResult<Ordering> {
        Ordering::natural(self.variable_keys())
    }

    /// Build typed variables from `(manifold, vector)` initial values.
    ///
    /// # Manifold Formats
    /// - **SE2**: `[x, y, theta]`
    /// - **Rn**: `[x1, ..., xn]`
    pub fn initialize_variables(
        &self,
        initial_values: &HashMap<String, (ManifoldType, DVector<f64>)>,
    ) -> CoreResult<Values> {
        initial_values
            .iter()
            .map(|(key, (manifold, data))| {
                Ok((
                    key.to_owned(),
                    VariableEnum::from_vector(*manifold, data.clone())?,
                ))
            })
            .collect()
    }

    fn slot_dims(values: &Values, ordering: &Ordering) -> CoreResult<Vec<usize>> {
        ordering
            .iter()
            .map(|key| {
                values.get(key).map(VariableEnum::get_size).ok_or_else(|| {
                    CoreError::Variable(format!("ordered variable '{key}' has no value")).log()
                })
            })
            .collect()
    }
}

impl NonlinearSystem for Problem {
    type Values = Values;

    fn default_ordering(&self, _values: &Values) -> CoreResult<Ordering> {
        self.natural_ordering()
    }

    fn linearize(&self, values: &Values, ordering: &Ordering) -> CoreResult<LinearSystem> {
        let mut system = LinearSystem::new(Self::slot_dims(values, ordering)?);

        #[cfg(feature = "parallel")]
        let factors: CoreResult<Vec<JacobianFactor>> = self
            .residual_blocks
            .par_iter()
            .map(|block| block.linearize(values, ordering))
            .collect();

        #[cfg(not(feature = "parallel"))]
        let factors: CoreResult<Vec<JacobianFactor>> = self
            .residual_blocks
            .iter()
            .map(|block| block.linearize(values, ordering))
            .collect();

        for factor in factors? {
            system.add_factor(factor).map_err(|e| {
                CoreError::FactorLinearization("factor does not fit the ordering".to_string())
                    .log_with_source(e)
            })?;
        }
        debug!(
            "linearized {} blocks into {} rows over {} slots",
            self.residual_blocks.len(),
            system.rows(),
            system.num_slots()
        );
        Ok(system)
    }

    fn total_error(&self, values: &Values) -> CoreResult<f64> {
        #[cfg(feature = "parallel")]
        let errors: CoreResult<Vec<f64>> = self
            .residual_blocks
            .par_iter()
            .map(|block| block.error(values))
            .collect();

        #[cfg(not(feature = "parallel"))]
        let errors: CoreResult<Vec<f64>> = self
            .residual_blocks
            .iter()
            .map(|block| block.error(values))
            .collect();

        Ok(errors?.iter().sum())
    }

    /// Variables that are not in `ordering` are copied unchanged.
    fn retract(
        &self,
        values: &Values,
        increment: &Mat<f64>,
        ordering: &Ordering,
    ) -> CoreResult<Values> {
        let dims = Self::slot_dims(values, ordering)?;
        let total: usize = dims.iter().sum();
        if increment.nrows() != total || increment.ncols() != 1 {
            return Err(CoreError::DimensionMismatch(format!(
                "increment is {}x{}, ordering spans {} dimensions",
                increment.nrows(),
                increment.ncols(),
                total
            ))
            .log());
        }

        let mut updated = values.clone();
        let mut offset = 0;
        for (key, dim) in ordering.iter().zip(dims) {
            let step: Vec<f64> = (offset..offset + dim).map(|i| increment[(i, 0)]).collect();
            if let Some(var) = values.get(key) {
                updated.insert(key.to_string(), var.retract(&step)?);
            }
            offset += dim;
        }
        Ok(updated)
    }
}
