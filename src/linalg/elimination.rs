//! Dense per-step elimination kernels shared by the sequential and
//! multifrontal backends.
//!
//! One elimination step takes the factors that touch a group of frontal slots,
//! lays their variables out as `[frontals | separator | rhs]` and produces a
//! [`GaussianConditional`] on the frontals plus a new factor on the separator.

use crate::linalg::{
    Factorization, GaussianConditional, JacobianFactor, LinAlgError, LinAlgResult, LinearSystem,
};
use nalgebra::{Cholesky, DMatrix, DVector};
use std::collections::{BTreeSet, HashMap};

/// Relative pivot tolerance for the rank test.
const RANK_TOLERANCE: f64 = 1e-12;

/// Augmented information matrix `[A b]ᵀ[A b]` over `keys` (last row/column is the rhs).
#[derive(Debug, Clone)]
pub(crate) struct HessianFactor {
    keys: Vec<usize>,
    info: DMatrix<f64>,
}

/// Factor waiting in an elimination bucket.
#[derive(Debug, Clone)]
pub(crate) enum PendingFactor {
    Jacobian(JacobianFactor),
    Hessian(HessianFactor),
}

impl PendingFactor {
    pub(crate) fn keys(&self) -> &[usize] {
        match self {
            PendingFactor::Jacobian(factor) => factor.keys(),
            PendingFactor::Hessian(factor) => &factor.keys,
        }
    }

    /// Slot whose elimination consumes this factor.
    pub(crate) fn first_key(&self) -> usize {
        self.keys()[0]
    }
}

/// Column layout of one elimination step.
struct LocalLayout {
    frontals: Vec<usize>,
    separator: Vec<usize>,
    local_offset: HashMap<usize, usize>,
    /// Global scalar column of each local column (rhs excluded)
    global_column: Vec<usize>,
    frontal_dim: usize,
    total_dim: usize,
}

impl LocalLayout {
    fn slot_of_column(&self, column: usize) -> usize {
        let mut slot = self.frontals[0];
        for &candidate in self.frontals.iter().chain(&self.separator) {
            if self.local_offset[&candidate] <= column {
                slot = candidate;
            }
        }
        slot
    }

    fn columns_of(&self, keys: &[usize], system: &LinearSystem) -> Vec<usize> {
        let mut columns: Vec<usize> = keys
            .iter()
            .flat_map(|slot| {
                let offset = self.local_offset[slot];
                offset..offset + system.slot_dim(*slot)
            })
            .collect();
        columns.push(self.total_dim);
        columns
    }
}

/// Runs elimination steps against one linear system.
pub(crate) struct Eliminator<'a> {
    system: &'a LinearSystem,
    factorization: Factorization,
    column_scale: Vec<f64>,
}

impl<'a> Eliminator<'a> {
    pub(crate) fn new(system: &'a LinearSystem, factorization: Factorization) -> Self {
        Self {
            system,
            factorization,
            column_scale: system.column_norms_squared(),
        }
    }

    /// The system's factors, each as a pending factor.
    pub(crate) fn initial_factors(&self) -> Vec<PendingFactor> {
        self.system
            .factors()
            .iter()
            .cloned()
            .map(PendingFactor::Jacobian)
            .collect()
    }

    /// Eliminate `frontals` (ascending, consecutive in the ordering) from `gathered`.
    ///
    /// Returns the conditional on the frontals and, when the separator is not
    /// empty, the factor left on it.
    pub(crate) fn eliminate(
        &self,
        frontals: &[usize],
        gathered: Vec<PendingFactor>,
    ) -> LinAlgResult<(GaussianConditional, Option<PendingFactor>)> {
        let layout = self.layout(frontals, &gathered)?;
        match self.factorization {
            Factorization::QR => self.eliminate_qr(&layout, gathered),
            Factorization::Cholesky => self.eliminate_cholesky(&layout, gathered),
        }
    }

    fn layout(&self, frontals: &[usize], gathered: &[PendingFactor]) -> LinAlgResult<LocalLayout> {
        let involved: BTreeSet<usize> = gathered
            .iter()
            .flat_map(|factor| factor.keys().iter().copied())
            .collect();
        if let Some(&missing) = frontals.iter().find(|&&slot| !involved.contains(&slot)) {
            return Err(LinAlgError::SingularMatrix { slot: missing });
        }

        let separator: Vec<usize> = involved
            .into_iter()
            .filter(|slot| !frontals.contains(slot))
            .collect();

        let mut local_offset = HashMap::new();
        let mut global_column = Vec::new();
        let mut total_dim = 0;
        let mut frontal_dim = 0;
        for (position, &slot) in frontals.iter().chain(&separator).enumerate() {
            let dim = self.system.slot_dim(slot);
            local_offset.insert(slot, total_dim);
            global_column.extend(self.system.offset(slot)..self.system.offset(slot) + dim);
            total_dim += dim;
            if position < frontals.len() {
                frontal_dim += dim;
            }
        }

        Ok(LocalLayout {
            frontals: frontals.to_vec(),
            separator,
            local_offset,
            global_column,
            frontal_dim,
            total_dim,
        })
    }

    fn check_pivot(&self, layout: &LocalLayout, column: usize, pivot_sq: f64) -> LinAlgResult<()> {
        let scale = self.column_scale[layout.global_column[column]];
        if !pivot_sq.is_finite() || scale <= 0.0 || pivot_sq <= RANK_TOLERANCE * scale {
            return Err(LinAlgError::SingularMatrix {
                slot: layout.slot_of_column(column),
            });
        }
        Ok(())
    }

    /// Split `[S | d]` rows into a conditional.
    fn conditional(
        layout: &LocalLayout,
        r_ff: DMatrix<f64>,
        s_and_d: &DMatrix<f64>,
    ) -> GaussianConditional {
        let nf = layout.frontal_dim;
        let ns = layout.total_dim - nf;
        GaussianConditional::new(
            layout.frontals.clone(),
            layout.separator.clone(),
            r_ff,
            s_and_d.columns(0, ns).into_owned(),
            DVector::from_fn(nf, |i, _| s_and_d[(i, ns)]),
        )
    }

    fn eliminate_qr(
        &self,
        layout: &LocalLayout,
        gathered: Vec<PendingFactor>,
    ) -> LinAlgResult<(GaussianConditional, Option<PendingFactor>)> {
        let nf = layout.frontal_dim;
        let n = layout.total_dim;

        let mut jacobians = Vec::with_capacity(gathered.len());
        for factor in gathered {
            match factor {
                PendingFactor::Jacobian(jacobian) => jacobians.push(jacobian),
                PendingFactor::Hessian(_) => {
                    return Err(LinAlgError::InvalidFactor(
                        "QR elimination received an information-form factor".to_string(),
                    )
                    .log());
                }
            }
        }

        let rows: usize = jacobians.iter().map(JacobianFactor::rows).sum();
        if rows < nf {
            return Err(LinAlgError::SingularMatrix {
                slot: layout.slot_of_column(rows),
            });
        }

        let mut stacked = DMatrix::zeros(rows, n + 1);
        let mut row = 0;
        for jacobian in &jacobians {
            for (slot, block) in jacobian.keys().iter().zip(jacobian.blocks()) {
                let offset = layout.local_offset[slot];
                stacked
                    .view_mut((row, offset), (block.nrows(), block.ncols()))
                    .copy_from(block);
            }
            for i in 0..jacobian.rows() {
                stacked[(row + i, n)] = jacobian.rhs()[i];
            }
            row += jacobian.rows();
        }

        let mut r = stacked.qr().r();
        for i in 0..nf {
            if r[(i, i)] < 0.0 {
                r.row_mut(i).neg_mut();
            }
            self.check_pivot(layout, i, r[(i, i)] * r[(i, i)])?;
        }

        let r_ff = r.view((0, 0), (nf, nf)).upper_triangle();
        let s_and_d = r.view((0, nf), (nf, n - nf + 1)).into_owned();
        let conditional = Self::conditional(layout, r_ff, &s_and_d);

        let remaining_rows = r.nrows().min(n).saturating_sub(nf);
        let remaining = if layout.separator.is_empty() || remaining_rows == 0 {
            None
        } else {
            let mut terms = Vec::with_capacity(layout.separator.len());
            for &slot in &layout.separator {
                let offset = layout.local_offset[&slot];
                let dim = self.system.slot_dim(slot);
                terms.push((slot, r.view((nf, offset), (remaining_rows, dim)).into_owned()));
            }
            let rhs = DVector::from_fn(remaining_rows, |i, _| r[(nf + i, n)]);
            Some(PendingFactor::Jacobian(JacobianFactor::new(terms, rhs)?))
        };

        Ok((conditional, remaining))
    }

    fn eliminate_cholesky(
        &self,
        layout: &LocalLayout,
        gathered: Vec<PendingFactor>,
    ) -> LinAlgResult<(GaussianConditional, Option<PendingFactor>)> {
        let nf = layout.frontal_dim;
        let n = layout.total_dim;

        let mut info = DMatrix::<f64>::zeros(n + 1, n + 1);
        for factor in &gathered {
            let columns = layout.columns_of(factor.keys(), self.system);
            let contribution = match factor {
                PendingFactor::Jacobian(jacobian) => {
                    let mut ab = DMatrix::zeros(jacobian.rows(), columns.len());
                    let mut col = 0;
                    for block in jacobian.blocks() {
                        ab.view_mut((0, col), (block.nrows(), block.ncols()))
                            .copy_from(block);
                        col += block.ncols();
                    }
                    ab.column_mut(col).copy_from(jacobian.rhs());
                    ab.transpose() * &ab
                }
                PendingFactor::Hessian(hessian) => hessian.info.clone(),
            };
            for (a, &ia) in columns.iter().enumerate() {
                for (b, &ib) in columns.iter().enumerate() {
                    info[(ia, ib)] += contribution[(a, b)];
                }
            }
        }

        for i in 0..nf {
            self.check_pivot(layout, i, info[(i, i)])?;
        }

        let h_ff = info.view((0, 0), (nf, nf)).into_owned();
        let cholesky = Cholesky::new(h_ff).ok_or(LinAlgError::SingularMatrix {
            slot: layout.frontals[0],
        })?;
        let l = cholesky.l();
        for i in 0..nf {
            self.check_pivot(layout, i, l[(i, i)] * l[(i, i)])?;
        }

        let rest = info.view((0, nf), (nf, n - nf + 1)).into_owned();
        let s_and_d = l
            .solve_lower_triangular(&rest)
            .ok_or(LinAlgError::SingularMatrix {
                slot: layout.frontals[0],
            })?;
        let conditional = Self::conditional(layout, l.transpose(), &s_and_d);

        let remaining = if layout.separator.is_empty() {
            None
        } else {
            let tail = info.view((nf, nf), (n - nf + 1, n - nf + 1)).into_owned();
            let schur = tail - s_and_d.transpose() * &s_and_d;
            Some(PendingFactor::Hessian(HessianFactor {
                keys: layout.separator.clone(),
                info: schur,
            }))
        };

        Ok((conditional, remaining))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::linalg::{EliminationMode, eliminate};
    use nalgebra::{dmatrix, dvector};

    fn chain_system() -> LinAlgResult<LinearSystem> {
        // x0 = 1, x1 - x0 = 1
        let mut system = LinearSystem::new(vec![1, 1]);
        system.add_factor(JacobianFactor::new(vec![(0, dmatrix![1.0])], dvector![1.0])?)?;
        system.add_factor(JacobianFactor::new(
            vec![(0, dmatrix![-1.0]), (1, dmatrix![1.0])],
            dvector![1.0],
        )?)?;
        Ok(system)
    }

    #[test]
    fn test_qr_and_cholesky_agree_on_first_step() -> Result<(), Box<dyn std::error::Error>> {
        let system = chain_system()?;
        let mut conditionals = Vec::new();
        for factorization in [Factorization::QR, Factorization::Cholesky] {
            let eliminator = Eliminator::new(&system, factorization);
            let (conditional, remaining) = eliminator.eliminate(&[0], eliminator.initial_factors())?;
            assert!(remaining.is_some());
            assert_eq!(conditional.parents(), &[1]);
            conditionals.push(conditional);
        }
        let (qr, chol) = (&conditionals[0], &conditionals[1]);
        assert!((qr.r()[(0, 0)] - chol.r()[(0, 0)]).abs() < 1e-12);
        assert!((qr.s()[(0, 0)] - chol.s()[(0, 0)]).abs() < 1e-12);
        assert!((qr.d()[0] - chol.d()[0]).abs() < 1e-12);
        // R = √2, S = -1/√2, d = 0
        assert!((qr.r()[(0, 0)] - 2.0_f64.sqrt()).abs() < 1e-12);
        Ok(())
    }

    #[test]
    fn test_missing_frontal_is_singular() -> Result<(), Box<dyn std::error::Error>> {
        let system = chain_system()?;
        let eliminator = Eliminator::new(&system, Factorization::Cholesky);
        let result = eliminator.eliminate(&[0], Vec::new());
        assert!(matches!(result, Err(LinAlgError::SingularMatrix { slot: 0 })));
        Ok(())
    }

    #[test]
    fn test_pivot_test_is_relative_to_column_scale() -> Result<(), Box<dyn std::error::Error>> {
        // 1e-7·x0 = 1e-7, x1 = 2: tiny but well conditioned column
        let mut tiny = LinearSystem::new(vec![1, 1]);
        tiny.add_factor(JacobianFactor::new(vec![(0, dmatrix![1e-7])], dvector![1e-7])?)?;
        tiny.add_factor(JacobianFactor::new(vec![(1, dmatrix![1.0])], dvector![2.0])?)?;

        // slot 1 only ever appears with a zero coefficient
        let mut flat = LinearSystem::new(vec![1, 1]);
        flat.add_factor(JacobianFactor::new(
            vec![(0, dmatrix![1.0]), (1, dmatrix![0.0])],
            dvector![1.0],
        )?)?;
        flat.add_factor(JacobianFactor::new(vec![(0, dmatrix![1.0])], dvector![0.5])?)?;

        for mode in [EliminationMode::Sequential, EliminationMode::Multifrontal] {
            for factorization in [Factorization::QR, Factorization::Cholesky] {
                let solution = eliminate(&tiny, mode, factorization)?.solve()?;
                assert!((solution[(0, 0)] - 1.0).abs() < 1e-9);
                assert!((solution[(1, 0)] - 2.0).abs() < 1e-12);

                let result = eliminate(&flat, mode, factorization);
                assert!(matches!(result, Err(LinAlgError::SingularMatrix { slot: 1 })));
            }
        }
        Ok(())
    }
}
