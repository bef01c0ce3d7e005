//! Sequential elimination into a chain of conditionals.

use crate::linalg::{
    EliminatedSystem, Factorization, GaussianConditional, LinAlgError, LinAlgResult, LinearSystem,
    conditional::SquareRootSystem,
    elimination::{Eliminator, PendingFactor},
};
use faer::Mat;
use tracing::trace;

/// Gaussian Bayes net: one conditional per slot, in ordering order.
#[derive(Debug, Clone)]
pub struct GaussianBayesNet {
    conditionals: Vec<GaussianConditional>,
    dims: Vec<usize>,
    offsets: Vec<usize>,
    sqrt_system: SquareRootSystem,
}

impl GaussianBayesNet {
    /// Eliminate every slot of `system` in turn.
    ///
    /// Factors wait in the bucket of their lowest slot; the factor left on the
    /// separator after each step moves to the bucket of its own lowest slot.
    ///
    /// # Errors
    /// Returns [`LinAlgError::SingularMatrix`] for a rank-deficient system.
    pub fn eliminate(system: &LinearSystem, factorization: Factorization) -> LinAlgResult<Self> {
        let eliminator = Eliminator::new(system, factorization);

        let mut buckets: Vec<Vec<PendingFactor>> = vec![Vec::new(); system.num_slots()];
        for factor in eliminator.initial_factors() {
            buckets[factor.first_key()].push(factor);
        }

        let mut conditionals = Vec::with_capacity(system.num_slots());
        for slot in 0..system.num_slots() {
            let gathered = std::mem::take(&mut buckets[slot]);
            if gathered.is_empty() {
                return Err(LinAlgError::SingularMatrix { slot });
            }
            let (conditional, remaining) = eliminator.eliminate(&[slot], gathered)?;
            trace!(
                "eliminated slot {} ({} parents)",
                slot,
                conditional.parents().len()
            );
            if let Some(factor) = remaining {
                buckets[factor.first_key()].push(factor);
            }
            conditionals.push(conditional);
        }

        let sqrt_system =
            SquareRootSystem::assemble(conditionals.iter(), system.dims(), system.offsets(), system.dim())?;

        Ok(Self {
            conditionals,
            dims: system.dims().to_vec(),
            offsets: system.offsets().to_vec(),
            sqrt_system,
        })
    }

    pub fn conditionals(&self) -> &[GaussianConditional] {
        &self.conditionals
    }
}

impl EliminatedSystem for GaussianBayesNet {
    fn dim(&self) -> usize {
        self.sqrt_system.dim()
    }

    fn solve(&self) -> LinAlgResult<Mat<f64>> {
        let mut x = Mat::zeros(self.dim(), 1);
        for conditional in self.conditionals.iter().rev() {
            conditional.solve_into(&self.dims, &self.offsets, &mut x)?;
        }
        Ok(x)
    }

    fn gradient_at_zero(&self) -> Mat<f64> {
        self.sqrt_system.gradient_at_zero()
    }

    fn apply(&self, x: &Mat<f64>) -> Mat<f64> {
        self.sqrt_system.apply(x)
    }

    fn error(&self, h: &Mat<f64>) -> f64 {
        self.sqrt_system.error(h)
    }
}
