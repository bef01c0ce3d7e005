//! Gaussian factor graph: the linearized problem handed to elimination.

use crate::linalg::{LinAlgError, LinAlgResult};
use faer::{
    Mat,
    sparse::{SparseColMat, Triplet},
};
use nalgebra::{DMatrix, DVector};
use std::ops::Mul;

/// Dense Jacobian block row `½||Σ_k A_k·h_k - b||²` over a few ordering slots.
///
/// Keys are kept sorted ascending, so `keys()[0]` is the first slot to be
/// eliminated among the factor's variables.
#[derive(Debug, Clone)]
pub struct JacobianFactor {
    keys: Vec<usize>,
    blocks: Vec<DMatrix<f64>>,
    rhs: DVector<f64>,
}

impl JacobianFactor {
    /// Build a factor from `(slot, A_slot)` terms and the right-hand side `b`.
    ///
    /// # Errors
    /// Rejects empty factors, repeated slots and blocks whose row count differs
    /// from `b`.
    pub fn new(terms: Vec<(usize, DMatrix<f64>)>, rhs: DVector<f64>) -> LinAlgResult<Self> {
        if terms.is_empty() {
            return Err(LinAlgError::InvalidFactor(
                "Jacobian factor without variables".to_string(),
            ));
        }

        let mut terms = terms;
        terms.sort_by_key(|(slot, _)| *slot);
        if let Some(pair) = terms.windows(2).find(|pair| pair[0].0 == pair[1].0) {
            return Err(LinAlgError::InvalidFactor(format!(
                "slot {} appears twice in one factor",
                pair[0].0
            )));
        }
        if let Some((slot, block)) = terms.iter().find(|(_, block)| block.nrows() != rhs.len()) {
            return Err(LinAlgError::DimensionMismatch(format!(
                "block for slot {slot} has {} rows, right-hand side has {}",
                block.nrows(),
                rhs.len()
            )));
        }

        let (keys, blocks) = terms.into_iter().unzip();
        Ok(Self { keys, blocks, rhs })
    }

    pub fn keys(&self) -> &[usize] {
        &self.keys
    }

    pub fn blocks(&self) -> &[DMatrix<f64>] {
        &self.blocks
    }

    pub fn rhs(&self) -> &DVector<f64> {
        &self.rhs
    }

    pub fn rows(&self) -> usize {
        self.rhs.len()
    }

    /// `Σ_k A_k·h_k - b` for an increment laid out with `offsets`
    pub fn residual(&self, offsets: &[usize], h: &Mat<f64>) -> DVector<f64> {
        let mut residual = -self.rhs.clone();
        for (slot, block) in self.keys.iter().zip(&self.blocks) {
            let offset = offsets[*slot];
            let h_slot = DVector::from_fn(block.ncols(), |i, _| h[(offset + i, 0)]);
            residual += block * h_slot;
        }
        residual
    }
}

/// Sparse linear least-squares system `½||A·h - b||²` over ordering slots.
#[derive(Debug, Clone)]
pub struct LinearSystem {
    dims: Vec<usize>,
    offsets: Vec<usize>,
    total_dim: usize,
    factors: Vec<JacobianFactor>,
}

impl LinearSystem {
    /// Create an empty system whose slot `k` has `dims[k]` scalar unknowns.
    pub fn new(dims: Vec<usize>) -> Self {
        let mut offsets = Vec::with_capacity(dims.len());
        let mut total_dim = 0;
        for dim in &dims {
            offsets.push(total_dim);
            total_dim += dim;
        }
        Self {
            dims,
            offsets,
            total_dim,
            factors: Vec::new(),
        }
    }

    /// Add a factor after checking its slots and block widths against the layout.
    pub fn add_factor(&mut self, factor: JacobianFactor) -> LinAlgResult<()> {
        for (slot, block) in factor.keys().iter().zip(factor.blocks()) {
            let expected = self.dims.get(*slot).copied().ok_or_else(|| {
                LinAlgError::DimensionMismatch(format!(
                    "slot {slot} outside a system with {} slots",
                    self.dims.len()
                ))
            })?;
            if block.ncols() != expected {
                return Err(LinAlgError::DimensionMismatch(format!(
                    "block for slot {slot} has {} columns, slot dimension is {expected}",
                    block.ncols()
                )));
            }
        }
        self.factors.push(factor);
        Ok(())
    }

    /// Total number of scalar unknowns
    pub fn dim(&self) -> usize {
        self.total_dim
    }

    pub fn num_slots(&self) -> usize {
        self.dims.len()
    }

    pub fn slot_dim(&self, slot: usize) -> usize {
        self.dims[slot]
    }

    pub fn offset(&self, slot: usize) -> usize {
        self.offsets[slot]
    }

    pub fn dims(&self) -> &[usize] {
        &self.dims
    }

    pub fn offsets(&self) -> &[usize] {
        &self.offsets
    }

    pub fn factors(&self) -> &[JacobianFactor] {
        &self.factors
    }

    /// Total number of residual rows
    pub fn rows(&self) -> usize {
        self.factors.iter().map(JacobianFactor::rows).sum()
    }

    /// Model error `½||A·h - b||²`
    pub fn error(&self, h: &Mat<f64>) -> f64 {
        self.factors
            .iter()
            .map(|factor| 0.5 * factor.residual(&self.offsets, h).norm_squared())
            .sum()
    }

    /// Assemble `A` as a sparse column matrix together with the stacked `b`.
    pub fn sparse_jacobian(&self) -> LinAlgResult<(SparseColMat<usize, f64>, Mat<f64>)> {
        let rows = self.rows();
        let mut triplets = Vec::new();
        let mut rhs = Mat::zeros(rows, 1);

        let mut row_offset = 0;
        for factor in &self.factors {
            for (slot, block) in factor.keys().iter().zip(factor.blocks()) {
                let col_offset = self.offsets[*slot];
                for j in 0..block.ncols() {
                    for i in 0..block.nrows() {
                        let value = block[(i, j)];
                        if value != 0.0 {
                            triplets.push(Triplet::new(row_offset + i, col_offset + j, value));
                        }
                    }
                }
            }
            for i in 0..factor.rows() {
                rhs[(row_offset + i, 0)] = factor.rhs()[i];
            }
            row_offset += factor.rows();
        }

        let jacobian =
            SparseColMat::try_new_from_triplets(rows, self.total_dim, &triplets).map_err(|e| {
                LinAlgError::SparseMatrixCreation("Failed to assemble Jacobian".to_string())
                    .log_with_source(e)
            })?;
        Ok((jacobian, rhs))
    }

    /// Gradient of the model at zero increment, `-Aᵀ·b`
    pub fn gradient_at_zero(&self) -> LinAlgResult<Mat<f64>> {
        let (jacobian, rhs) = self.sparse_jacobian()?;
        let atb = jacobian.as_ref().transpose().mul(&rhs);
        Ok(Mat::from_fn(self.total_dim, 1, |i, _| -atb[(i, 0)]))
    }

    /// Squared norm of every scalar column of `A`, used as the scale for rank tests.
    pub(crate) fn column_norms_squared(&self) -> Vec<f64> {
        let mut norms = vec![0.0; self.total_dim];
        for factor in &self.factors {
            for (slot, block) in factor.keys().iter().zip(factor.blocks()) {
                let offset = self.offsets[*slot];
                for j in 0..block.ncols() {
                    norms[offset + j] += block.column(j).norm_squared();
                }
            }
        }
        norms
    }
}
