//! Affine factor on Euclidean variables.

use super::{Factor, FactorError, FactorResult};
use nalgebra::{DMatrix, DVector};

/// Affine residual `r = Σ_k A_k · x_k - b`.
///
/// Useful for encoding linear least-squares problems as a factor graph; the
/// Jacobian with respect to `x_k` is simply `A_k`.
#[derive(Debug, Clone)]
pub struct LinearFactor {
    blocks: Vec<DMatrix<f64>>,
    rhs: DVector<f64>,
}

impl LinearFactor {
    /// Build the factor, checking that every block has one row per residual.
    pub fn new(blocks: Vec<DMatrix<f64>>, rhs: DVector<f64>) -> FactorResult<Self> {
        if blocks.is_empty() {
            return Err(FactorError::InvalidDefinition(
                "linear factor needs at least one coefficient block".to_string(),
            )
            .log());
        }
        for block in &blocks {
            if block.nrows() != rhs.len() {
                return Err(FactorError::InvalidDimension {
                    expected: rhs.len(),
                    actual: block.nrows(),
                }
                .log());
            }
        }
        Ok(Self { blocks, rhs })
    }

    pub fn blocks(&self) -> &[DMatrix<f64>] {
        &self.blocks
    }

    pub fn rhs(&self) -> &DVector<f64> {
        &self.rhs
    }
}

impl Factor for LinearFactor {
    fn linearize(
        &self,
        params: &[DVector<f64>],
        compute_jacobian: bool,
    ) -> (DVector<f64>, Option<DMatrix<f64>>) {
        let mut residual = -self.rhs.clone();
        for (block, x) in self.blocks.iter().zip(params) {
            residual += block * x;
        }

        let jacobian = if compute_jacobian {
            let cols = self.blocks.iter().map(|b| b.ncols()).sum();
            let mut jacobian = DMatrix::zeros(self.rhs.len(), cols);
            let mut offset = 0;
            for block in &self.blocks {
                jacobian
                    .view_mut((0, offset), (block.nrows(), block.ncols()))
                    .copy_from(block);
                offset += block.ncols();
            }
            Some(jacobian)
        } else {
            None
        };

        (residual, jacobian)
    }

    fn get_dimension(&self) -> usize {
        self.rhs.len()
    }

    fn num_variables(&self) -> usize {
        self.blocks.len()
    }
}
