//! Gaussian conditionals and the square-root information system they form.

use crate::linalg::{LinAlgError, LinAlgResult};
use faer::{
    Mat,
    sparse::{SparseColMat, Triplet},
};
use nalgebra::{DMatrix, DVector};
use std::ops::Mul;

/// Conditional density `R·x_f + S·x_p = d` produced by eliminating the
/// frontal slots `f` with separator (parent) slots `p`.
///
/// `R` is upper triangular with the frontal slots laid out in ascending order,
/// followed in `S` by the parent slots in ascending order.
#[derive(Debug, Clone)]
pub struct GaussianConditional {
    frontals: Vec<usize>,
    parents: Vec<usize>,
    r: DMatrix<f64>,
    s: DMatrix<f64>,
    d: DVector<f64>,
}

impl GaussianConditional {
    pub(crate) fn new(
        frontals: Vec<usize>,
        parents: Vec<usize>,
        r: DMatrix<f64>,
        s: DMatrix<f64>,
        d: DVector<f64>,
    ) -> Self {
        Self {
            frontals,
            parents,
            r,
            s,
            d,
        }
    }

    pub fn frontals(&self) -> &[usize] {
        &self.frontals
    }

    pub fn parents(&self) -> &[usize] {
        &self.parents
    }

    pub fn r(&self) -> &DMatrix<f64> {
        &self.r
    }

    pub fn s(&self) -> &DMatrix<f64> {
        &self.s
    }

    pub fn d(&self) -> &DVector<f64> {
        &self.d
    }

    /// Global scalar indices of the frontal variables followed by the parents.
    fn scalar_indices(slots: &[usize], dims: &[usize], offsets: &[usize]) -> Vec<usize> {
        slots
            .iter()
            .flat_map(|&slot| offsets[slot]..offsets[slot] + dims[slot])
            .collect()
    }

    /// Back-substitute `x_f = R⁻¹(d - S·x_p)` into `x`, reading the parents from `x`.
    ///
    /// # Errors
    /// Returns [`LinAlgError::SingularMatrix`] if `R` cannot be inverted or the
    /// result is not finite.
    pub fn solve_into(&self, dims: &[usize], offsets: &[usize], x: &mut Mat<f64>) -> LinAlgResult<()> {
        let parent_indices = Self::scalar_indices(&self.parents, dims, offsets);
        let x_parents = DVector::from_fn(parent_indices.len(), |i, _| x[(parent_indices[i], 0)]);

        let rhs = &self.d - &self.s * x_parents;
        let singular = LinAlgError::SingularMatrix {
            slot: self.frontals[0],
        };
        let x_frontals = self
            .r
            .solve_upper_triangular(&rhs)
            .ok_or_else(|| singular.clone())?;
        if x_frontals.iter().any(|v| !v.is_finite()) {
            return Err(singular);
        }

        let frontal_indices = Self::scalar_indices(&self.frontals, dims, offsets);
        for (local, &global) in frontal_indices.iter().enumerate() {
            x[(global, 0)] = x_frontals[local];
        }
        Ok(())
    }
}

/// Square-root information system `½||R·h - d||²` assembled from conditionals.
///
/// `R` is stored as a faer sparse matrix, block upper triangular in the
/// elimination ordering.
#[derive(Debug, Clone)]
pub(crate) struct SquareRootSystem {
    r: SparseColMat<usize, f64>,
    d: Mat<f64>,
}

impl SquareRootSystem {
    pub(crate) fn assemble<'a>(
        conditionals: impl Iterator<Item = &'a GaussianConditional>,
        dims: &[usize],
        offsets: &[usize],
        total_dim: usize,
    ) -> LinAlgResult<Self> {
        let mut triplets = Vec::new();
        let mut d = Mat::zeros(total_dim, 1);

        for conditional in conditionals {
            let rows = GaussianConditional::scalar_indices(&conditional.frontals, dims, offsets);
            let parents = GaussianConditional::scalar_indices(&conditional.parents, dims, offsets);

            for (i, &row) in rows.iter().enumerate() {
                for (j, &col) in rows.iter().enumerate().skip(i) {
                    let value = conditional.r[(i, j)];
                    if value != 0.0 {
                        triplets.push(Triplet::new(row, col, value));
                    }
                }
                for (j, &col) in parents.iter().enumerate() {
                    let value = conditional.s[(i, j)];
                    if value != 0.0 {
                        triplets.push(Triplet::new(row, col, value));
                    }
                }
                d[(row, 0)] = conditional.d[i];
            }
        }

        let r = SparseColMat::try_new_from_triplets(total_dim, total_dim, &triplets).map_err(
            |e| {
                LinAlgError::SparseMatrixCreation(
                    "Failed to assemble square-root information matrix".to_string(),
                )
                .log_with_source(e)
            },
        )?;
        Ok(Self { r, d })
    }

    pub(crate) fn dim(&self) -> usize {
        self.d.nrows()
    }

    pub(crate) fn gradient_at_zero(&self) -> Mat<f64> {
        let rtd = self.r.as_ref().transpose().mul(&self.d);
        Mat::from_fn(self.dim(), 1, |i, _| -rtd[(i, 0)])
    }

    pub(crate) fn apply(&self, x: &Mat<f64>) -> Mat<f64> {
        &self.r * x
    }

    pub(crate) fn error(&self, h: &Mat<f64>) -> f64 {
        let rh = self.apply(h);
        let mut sum = 0.0;
        for i in 0..self.dim() {
            let e = rh[(i, 0)] - self.d[(i, 0)];
            sum += e * e;
        }
        0.5 * sum
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::{dmatrix, dvector};

    #[test]
    fn test_solve_into_uses_parent_values() -> Result<(), Box<dyn std::error::Error>> {
        // 2·x0 + 1·x1 = 4 with x1 = 2  =>  x0 = 1
        let conditional =
            GaussianConditional::new(vec![0], vec![1], dmatrix![2.0], dmatrix![1.0], dvector![4.0]);
        let mut x = Mat::zeros(2, 1);
        x[(1, 0)] = 2.0;
        conditional.solve_into(&[1, 1], &[0, 1], &mut x)?;
        assert!((x[(0, 0)] - 1.0).abs() < 1e-12);
        Ok(())
    }

    #[test]
    fn test_zero_pivot_is_singular() {
        let conditional = GaussianConditional::new(
            vec![3],
            vec![],
            dmatrix![0.0],
            DMatrix::zeros(1, 0),
            dvector![1.0],
        );
        let mut x = Mat::zeros(4, 1);
        let result = conditional.solve_into(&[1, 1, 1, 1], &[0, 1, 2, 3], &mut x);
        assert_eq!(result, Err(LinAlgError::SingularMatrix { slot: 3 }));
    }

    #[test]
    fn test_square_root_system_error_and_gradient() -> Result<(), Box<dyn std::error::Error>> {
        let c0 =
            GaussianConditional::new(vec![0], vec![1], dmatrix![2.0], dmatrix![1.0], dvector![4.0]);
        let c1 = GaussianConditional::new(
            vec![1],
            vec![],
            dmatrix![3.0],
            DMatrix::zeros(1, 0),
            dvector![6.0],
        );
        let system = SquareRootSystem::assemble([&c0, &c1].into_iter(), &[1, 1], &[0, 1], 2)?;

        let zero = Mat::zeros(2, 1);
        assert!((system.error(&zero) - 0.5 * (16.0 + 36.0)).abs() < 1e-12);

        // -Rᵀd with R = [[2,1],[0,3]], d = [4,6]
        let g = system.gradient_at_zero();
        assert!((g[(0, 0)] + 8.0).abs() < 1e-12);
        assert!((g[(1, 0)] + 22.0).abs() < 1e-12);
        Ok(())
    }
}
