//! Multifrontal elimination into a clique tree.
//!
//! A symbolic pass first computes, for every slot, the separator it leaves
//! behind and its parent in the elimination tree (the lowest separator slot).
//! Slot `k` joins the clique of slot `k - 1` when `k` is the parent of `k - 1`
//! and `sep(k - 1) = {k} ∪ sep(k)`; chains of such slots are eliminated
//! together as one dense frontal block.

use crate::linalg::{
    EliminatedSystem, Factorization, GaussianConditional, LinAlgError, LinAlgResult, LinearSystem,
    conditional::SquareRootSystem,
    elimination::{Eliminator, PendingFactor},
};
use faer::Mat;
use std::collections::BTreeSet;
use tracing::trace;

/// Node of the Bayes tree.
#[derive(Debug, Clone)]
pub struct Clique {
    conditional: GaussianConditional,
    parent: Option<usize>,
    children: Vec<usize>,
}

impl Clique {
    pub fn conditional(&self) -> &GaussianConditional {
        &self.conditional
    }

    pub fn frontals(&self) -> &[usize] {
        self.conditional.frontals()
    }

    pub fn parent(&self) -> Option<usize> {
        self.parent
    }

    pub fn children(&self) -> &[usize] {
        &self.children
    }
}

/// Gaussian Bayes tree produced by multifrontal elimination.
#[derive(Debug, Clone)]
pub struct GaussianBayesTree {
    cliques: Vec<Clique>,
    roots: Vec<usize>,
    dims: Vec<usize>,
    offsets: Vec<usize>,
    sqrt_system: SquareRootSystem,
}

/// Frontal slot groups in elimination order.
fn symbolic_cliques(system: &LinearSystem) -> LinAlgResult<Vec<Vec<usize>>> {
    let n = system.num_slots();
    let mut buckets: Vec<Vec<BTreeSet<usize>>> = vec![Vec::new(); n];
    for factor in system.factors() {
        let keys: BTreeSet<usize> = factor.keys().iter().copied().collect();
        buckets[factor.keys()[0]].push(keys);
    }

    let mut separators: Vec<BTreeSet<usize>> = Vec::with_capacity(n);
    for slot in 0..n {
        if buckets[slot].is_empty() {
            return Err(LinAlgError::SingularMatrix { slot });
        }
        let mut separator: BTreeSet<usize> = std::mem::take(&mut buckets[slot])
            .into_iter()
            .flatten()
            .collect();
        separator.remove(&slot);
        if let Some(&parent) = separator.first() {
            buckets[parent].push(separator.clone());
        }
        separators.push(separator);
    }

    let mut groups: Vec<Vec<usize>> = Vec::new();
    for slot in 0..n {
        let merges = slot > 0
            && separators[slot - 1].first() == Some(&slot)
            && separators[slot - 1].len() == separators[slot].len() + 1;
        match groups.last_mut() {
            Some(group) if merges => group.push(slot),
            _ => groups.push(vec![slot]),
        }
    }
    Ok(groups)
}

impl GaussianBayesTree {
    /// Eliminate `system` clique by clique.
    ///
    /// # Errors
    /// Returns [`LinAlgError::SingularMatrix`] for a rank-deficient system.
    pub fn eliminate(system: &LinearSystem, factorization: Factorization) -> LinAlgResult<Self> {
        let groups = symbolic_cliques(system)?;
        let eliminator = Eliminator::new(system, factorization);

        let mut buckets: Vec<Vec<PendingFactor>> = vec![Vec::new(); system.num_slots()];
        for factor in eliminator.initial_factors() {
            buckets[factor.first_key()].push(factor);
        }

        let mut slot_to_clique = vec![0; system.num_slots()];
        let mut cliques: Vec<Clique> = Vec::with_capacity(groups.len());
        for (index, frontals) in groups.iter().enumerate() {
            let gathered: Vec<PendingFactor> = frontals
                .iter()
                .flat_map(|&slot| std::mem::take(&mut buckets[slot]))
                .collect();
            let (conditional, remaining) = eliminator.eliminate(frontals, gathered)?;
            trace!(
                "clique {} eliminated {} frontal slots, separator {:?}",
                index,
                frontals.len(),
                conditional.parents()
            );
            if let Some(factor) = remaining {
                buckets[factor.first_key()].push(factor);
            }
            for &slot in frontals {
                slot_to_clique[slot] = index;
            }
            cliques.push(Clique {
                conditional,
                parent: None,
                children: Vec::new(),
            });
        }

        let mut roots = Vec::new();
        for index in 0..cliques.len() {
            match cliques[index].conditional.parents().first() {
                Some(&parent_slot) => {
                    let parent = slot_to_clique[parent_slot];
                    cliques[index].parent = Some(parent);
                    cliques[parent].children.push(index);
                }
                None => roots.push(index),
            }
        }

        let sqrt_system = SquareRootSystem::assemble(
            cliques.iter().map(|clique| &clique.conditional),
            system.dims(),
            system.offsets(),
            system.dim(),
        )?;

        Ok(Self {
            cliques,
            roots,
            dims: system.dims().to_vec(),
            offsets: system.offsets().to_vec(),
            sqrt_system,
        })
    }

    pub fn cliques(&self) -> &[Clique] {
        &self.cliques
    }

    pub fn roots(&self) -> &[usize] {
        &self.roots
    }
}

impl EliminatedSystem for GaussianBayesTree {
    fn dim(&self) -> usize {
        self.sqrt_system.dim()
    }

    /// Top-down back-substitution starting from the roots.
    fn solve(&self) -> LinAlgResult<Mat<f64>> {
        let mut x = Mat::zeros(self.dim(), 1);
        let mut stack: Vec<usize> = self.roots.iter().rev().copied().collect();
        while let Some(index) = stack.pop() {
            let clique = &self.cliques[index];
            clique
                .conditional
                .solve_into(&self.dims, &self.offsets, &mut x)?;
            stack.extend(clique.children.iter().rev());
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
