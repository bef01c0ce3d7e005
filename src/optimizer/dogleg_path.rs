//! Powell's Dog Leg path inside a spherical trust region.
//!
//! The path runs from the origin to the Cauchy point `h_sd = -α·g`, then on to
//! the Gauss-Newton point `h_gn`:
//!
//! ```text
//! ||h_gn|| ≤ Δ              →  h = h_gn
//! ||h_sd|| ≥ Δ              →  h = Δ · h_sd / ||h_sd||
//! otherwise                 →  h = h_sd + τ·(h_gn - h_sd),  ||h|| = Δ
//! ```
//!
//! with `α = ||g||² / ||R·g||²` taken from the eliminated square-root system.
//! Along this path the norm is non-decreasing, so the boundary crossing `τ` is
//! unique in `[0, 1]`.

use crate::linalg::{EliminatedSystem, LinAlgError, LinAlgResult};
use faer::Mat;
use std::fmt;
use tracing::warn;

/// Branch of the Dog Leg path that produced a step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepKind {
    /// Full Gauss-Newton step
    GaussNewton,
    /// Steepest descent scaled to the trust region boundary
    SteepestDescent,
    /// Interpolation between the Cauchy point and the Gauss-Newton point
    Blended,
}

impl fmt::Display for StepKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StepKind::GaussNewton => write!(f, "GN"),
            StepKind::SteepestDescent => write!(f, "SD"),
            StepKind::Blended => write!(f, "DL"),
        }
    }
}

/// A single Dog Leg increment, tagged with the branch that produced it.
#[derive(Debug, Clone)]
pub enum DoglegStep {
    GaussNewton(Mat<f64>),
    SteepestDescent(Mat<f64>),
    Blended { increment: Mat<f64>, tau: f64 },
}

impl DoglegStep {
    pub fn increment(&self) -> &Mat<f64> {
        match self {
            DoglegStep::GaussNewton(h) | DoglegStep::SteepestDescent(h) => h,
            DoglegStep::Blended { increment, .. } => increment,
        }
    }

    pub fn into_increment(self) -> Mat<f64> {
        match self {
            DoglegStep::GaussNewton(h) | DoglegStep::SteepestDescent(h) => h,
            DoglegStep::Blended { increment, .. } => increment,
        }
    }

    pub fn kind(&self) -> StepKind {
        match self {
            DoglegStep::GaussNewton(_) => StepKind::GaussNewton,
            DoglegStep::SteepestDescent(_) => StepKind::SteepestDescent,
            DoglegStep::Blended { .. } => StepKind::Blended,
        }
    }

    pub fn norm(&self) -> f64 {
        self.increment().norm_l2()
    }
}

fn scaled(v: &Mat<f64>, scale: f64) -> Mat<f64> {
    Mat::from_fn(v.nrows(), 1, |i, _| scale * v[(i, 0)])
}

fn dot(a: &Mat<f64>, b: &Mat<f64>) -> f64 {
    let product = a.transpose() * b;
    product[(0, 0)]
}

/// Cauchy point `-α·g` of the quadratic model.
///
/// Returns a zero vector when the gradient vanishes.
///
/// # Errors
/// [`LinAlgError::DegenerateGradient`] when `R·g = 0` but `g ≠ 0`, i.e. the
/// model is flat along the gradient.
pub fn compute_steepest_descent_point(structure: &dyn EliminatedSystem) -> LinAlgResult<Mat<f64>> {
    let gradient = structure.gradient_at_zero();
    let g_norm_sq = dot(&gradient, &gradient);
    if g_norm_sq == 0.0 {
        return Ok(Mat::zeros(gradient.nrows(), 1));
    }

    let rg = structure.apply(&gradient);
    let rg_norm_sq = dot(&rg, &rg);
    if rg_norm_sq == 0.0 || !rg_norm_sq.is_finite() {
        return Err(LinAlgError::DegenerateGradient);
    }

    Ok(scaled(&gradient, -g_norm_sq / rg_norm_sq))
}

/// Point where the segment `h_sd → h_gn` leaves the ball of radius `radius`.
///
/// Solves `||h_sd + τ·v||² = Δ²` with `v = h_gn - h_sd`, choosing between the
/// two forms of the quadratic root by the sign of `b` to avoid cancellation.
///
/// Callers guarantee `||h_sd|| < radius < ||h_gn||`, so `c < 0` and the
/// discriminant is positive whenever `a > 0`. When `h_gn` and `h_sd` agree to
/// machine precision relative to their own size, `h_gn` is scaled onto the
/// boundary instead.
fn blend(h_sd: &Mat<f64>, h_gn: &Mat<f64>, radius: f64) -> (Mat<f64>, f64) {
    let v = Mat::from_fn(h_sd.nrows(), 1, |i, _| h_gn[(i, 0)] - h_sd[(i, 0)]);
    let a = dot(&v, &v);
    let gn_norm_sq = dot(h_gn, h_gn);
    let sd_norm_sq = dot(h_sd, h_sd);

    if a <= f64::EPSILON * (gn_norm_sq + sd_norm_sq) {
        return (scaled(h_gn, radius / gn_norm_sq.sqrt()), 1.0);
    }

    let b = dot(h_sd, &v);
    let c = sd_norm_sq - radius * radius;
    let d = (b * b - a * c).max(0.0).sqrt();
    let tau = if b <= 0.0 { (-b + d) / a } else { -c / (b + d) };
    let tau = tau.clamp(0.0, 1.0);

    let increment = Mat::from_fn(h_sd.nrows(), 1, |i, _| h_sd[(i, 0)] + tau * v[(i, 0)]);
    (increment, tau)
}

/// Gauss-Newton and steepest-descent points of one eliminated system.
///
/// Both are computed once; [`DoglegPath::step`] can then be evaluated for any
/// number of radii without touching the factorization again.
#[derive(Debug, Clone)]
pub struct DoglegPath {
    gauss_newton: Mat<f64>,
    steepest_descent: Mat<f64>,
    /// `-g` kept when the gradient direction is flat and no Cauchy point exists
    raw_descent: Option<Mat<f64>>,
}

impl DoglegPath {
    /// # Errors
    /// Propagates [`LinAlgError::SingularMatrix`] from the Gauss-Newton solve.
    pub fn new(structure: &dyn EliminatedSystem) -> LinAlgResult<Self> {
        let gauss_newton = structure.solve()?;
        match compute_steepest_descent_point(structure) {
            Ok(steepest_descent) => Ok(Self {
                gauss_newton,
                steepest_descent,
                raw_descent: None,
            }),
            Err(LinAlgError::DegenerateGradient) => {
                warn!("gradient lies in a flat direction, falling back to the raw gradient");
                let gradient = structure.gradient_at_zero();
                let raw = scaled(&gradient, -1.0);
                Ok(Self {
                    gauss_newton,
                    steepest_descent: raw.clone(),
                    raw_descent: Some(raw),
                })
            }
            Err(e) => Err(e),
        }
    }

    pub fn gauss_newton(&self) -> &Mat<f64> {
        &self.gauss_newton
    }

    pub fn steepest_descent(&self) -> &Mat<f64> {
        &self.steepest_descent
    }

    /// Whether the Cauchy point was replaced by the raw gradient direction.
    pub fn is_degenerate(&self) -> bool {
        self.raw_descent.is_some()
    }

    /// Dog Leg step for trust region radius `radius`.
    pub fn step(&self, radius: f64) -> DoglegStep {
        if self.gauss_newton.norm_l2() <= radius {
            return DoglegStep::GaussNewton(self.gauss_newton.clone());
        }

        if let Some(raw) = &self.raw_descent {
            let raw_norm = raw.norm_l2();
            return if raw_norm <= radius {
                DoglegStep::SteepestDescent(raw.clone())
            } else {
                DoglegStep::SteepestDescent(scaled(raw, radius / raw_norm))
            };
        }

        let sd_norm = self.steepest_descent.norm_l2();
        if sd_norm >= radius {
            return DoglegStep::SteepestDescent(scaled(&self.steepest_descent, radius / sd_norm));
        }

        let (increment, tau) = blend(&self.steepest_descent, &self.gauss_newton, radius);
        DoglegStep::Blended { increment, tau }
    }
}

/// Compute the Dog Leg step of `structure` for trust region radius `radius`.
///
/// # Errors
/// Propagates [`LinAlgError::SingularMatrix`] when the Gauss-Newton solve fails.
/// A flat gradient direction is not an error: the raw gradient capped at
/// `radius` is returned instead.
pub fn compute_dogleg_step(structure: &dyn EliminatedSystem, radius: f64) -> LinAlgResult<DoglegStep> {
    Ok(DoglegPath::new(structure)?.step(radius))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::linalg::{EliminationMode, Factorization, JacobianFactor, LinearSystem, eliminate};
    use approx::assert_relative_eq;
    use nalgebra::{DMatrix, DVector, dmatrix, dvector};
    use proptest::prelude::*;

    type TestResult = Result<(), Box<dyn std::error::Error>>;

    /// One factor `A·h = b` over `n` scalar slots.
    fn dense_system(a: &DMatrix<f64>, b: DVector<f64>) -> LinAlgResult<LinearSystem> {
        let mut system = LinearSystem::new(vec![1; a.ncols()]);
        let terms = (0..a.ncols())
            .map(|k| (k, a.columns(k, 1).into_owned()))
            .collect();
        system.add_factor(JacobianFactor::new(terms, b)?)?;
        Ok(system)
    }

    fn identity_structure() -> LinAlgResult<Box<dyn EliminatedSystem>> {
        let system = dense_system(&DMatrix::identity(2, 2), dvector![3.0, 4.0])?;
        eliminate(&system, EliminationMode::Multifrontal, Factorization::Cholesky)
    }

    #[test]
    fn test_gauss_newton_inside_region() -> TestResult {
        let structure = identity_structure()?;
        let step = compute_dogleg_step(structure.as_ref(), 10.0)?;
        assert_eq!(step.kind(), StepKind::GaussNewton);
        assert_relative_eq!(step.increment()[(0, 0)], 3.0, epsilon = 1e-12);
        assert_relative_eq!(step.increment()[(1, 0)], 4.0, epsilon = 1e-12);
        Ok(())
    }

    #[test]
    fn test_steepest_descent_truncated_at_boundary() -> TestResult {
        // For A = I the Cauchy point coincides with h_gn, so a small radius
        // lands on the steepest-descent branch.
        let structure = identity_structure()?;
        let step = compute_dogleg_step(structure.as_ref(), 1.0)?;
        assert_eq!(step.kind(), StepKind::SteepestDescent);
        assert_relative_eq!(step.norm(), 1.0, epsilon = 1e-12);
        assert_relative_eq!(step.increment()[(0, 0)], 0.6, epsilon = 1e-12);
        assert_relative_eq!(step.increment()[(1, 0)], 0.8, epsilon = 1e-12);
        Ok(())
    }

    #[test]
    fn test_blended_step_hits_boundary() -> TestResult {
        let system = dense_system(&dmatrix![1.0, 0.0; 0.0, 10.0], dvector![10.0, 1.0])?;
        let structure = eliminate(&system, EliminationMode::Sequential, Factorization::QR)?;
        let path = DoglegPath::new(structure.as_ref())?;
        let radius = 0.5 * (path.steepest_descent().norm_l2() + path.gauss_newton().norm_l2());
        let step = path.step(radius);
        match &step {
            DoglegStep::Blended { tau, .. } => assert!(*tau > 0.0 && *tau < 1.0),
            other => panic!("expected a blended step, got {}", other.kind()),
        }
        assert_relative_eq!(step.norm(), radius, epsilon = 1e-10);
        Ok(())
    }

    #[test]
    fn test_blended_step_respects_tiny_radius() -> TestResult {
        // Increments around 1e-8 make ||h_gn - h_sd||² fall near 1e-16.
        let system = dense_system(&dmatrix![1.0, 0.0; 0.0, 10.0], dvector![1e-8, 1e-9])?;
        let structure = eliminate(&system, EliminationMode::Sequential, Factorization::QR)?;
        let path = DoglegPath::new(structure.as_ref())?;
        let radius = 5e-9;
        assert!(path.steepest_descent().norm_l2() < radius);
        assert!(path.gauss_newton().norm_l2() > radius);

        let step = path.step(radius);
        assert_eq!(step.kind(), StepKind::Blended);
        assert!(step.norm() <= radius * (1.0 + 1e-9));
        assert_relative_eq!(step.norm(), radius, max_relative = 1e-9);
        Ok(())
    }

    #[test]
    fn test_flat_gradient_falls_back_to_raw_gradient() -> TestResult {
        let gradient = Mat::from_fn(2, 1, |i, _| [3.0, 4.0][i]);

        struct Flat(Mat<f64>);
        impl EliminatedSystem for Flat {
            fn dim(&self) -> usize {
                2
            }
            fn solve(&self) -> LinAlgResult<Mat<f64>> {
                Ok(Mat::from_fn(2, 1, |_, _| 100.0))
            }
            fn gradient_at_zero(&self) -> Mat<f64> {
                self.0.clone()
            }
            fn apply(&self, _x: &Mat<f64>) -> Mat<f64> {
                Mat::zeros(2, 1)
            }
            fn error(&self, _h: &Mat<f64>) -> f64 {
                0.0
            }
        }

        let flat = Flat(gradient);
        assert!(matches!(
            compute_steepest_descent_point(&flat),
            Err(LinAlgError::DegenerateGradient)
        ));

        let capped = compute_dogleg_step(&flat, 1.0)?;
        assert_eq!(capped.kind(), StepKind::SteepestDescent);
        assert_relative_eq!(capped.increment()[(0, 0)], -0.6, epsilon = 1e-12);
        assert_relative_eq!(capped.increment()[(1, 0)], -0.8, epsilon = 1e-12);

        let full = compute_dogleg_step(&flat, 20.0)?;
        assert_relative_eq!(full.increment()[(1, 0)], -4.0, epsilon = 1e-12);
        Ok(())
    }

    #[test]
    fn test_zero_gradient_gives_zero_cauchy_point() -> TestResult {
        let system = dense_system(&DMatrix::identity(2, 2), dvector![0.0, 0.0])?;
        let structure = eliminate(&system, EliminationMode::Sequential, Factorization::Cholesky)?;
        let h_sd = compute_steepest_descent_point(structure.as_ref())?;
        assert_eq!(h_sd.norm_l2(), 0.0);
        let step = compute_dogleg_step(structure.as_ref(), 1.0)?;
        assert_eq!(step.kind(), StepKind::GaussNewton);
        assert_eq!(step.norm(), 0.0);
        Ok(())
    }

    fn diagonally_dominant() -> impl Strategy<Value = (DMatrix<f64>, DVector<f64>, f64)> {
        (
            prop::collection::vec(-1.0..1.0f64, 9),
            prop::collection::vec(-5.0..5.0f64, 3),
            0.01..10.0f64,
        )
            .prop_map(|(entries, rhs, radius)| {
                let mut a = DMatrix::from_vec(3, 3, entries);
                for i in 0..3 {
                    a[(i, i)] = 3.0 + a[(i, i)].abs();
                }
                (a, DVector::from_vec(rhs), radius)
            })
    }

    proptest! {
        #[test]
        fn prop_path_norm_is_monotone((a, b, radius) in diagonally_dominant()) {
            let system = dense_system(&a, b).map_err(|e| TestCaseError::fail(e.to_string()))?;
            let structure = eliminate(&system, EliminationMode::Multifrontal, Factorization::Cholesky)
                .map_err(|e| TestCaseError::fail(e.to_string()))?;
            let path = DoglegPath::new(structure.as_ref())
                .map_err(|e| TestCaseError::fail(e.to_string()))?;

            let h_sd = path.steepest_descent();
            let h_gn = path.gauss_newton();
            let norm_at = |tau: f64| {
                Mat::from_fn(3, 1, |i, _| h_sd[(i, 0)] + tau * (h_gn[(i, 0)] - h_sd[(i, 0)]))
                    .norm_l2()
            };
            let mut previous = norm_at(0.0);
            for k in 1..=20 {
                let current = norm_at(k as f64 / 20.0);
                prop_assert!(current + 1e-9 * (1.0 + previous) >= previous);
                previous = current;
            }

            let step = path.step(radius);
            prop_assert!(step.norm() <= radius * (1.0 + 1e-9));
            if step.kind() != StepKind::GaussNewton {
                prop_assert!((step.norm() - radius).abs() <= 1e-9 * (1.0 + radius));
            }
        }

        #[test]
        fn prop_step_stays_inside_region_at_any_scale(
            (a, b, radius) in diagonally_dominant(),
            exponent in -12i32..=0,
        ) {
            let scale = 10f64.powi(exponent);
            let system = dense_system(&a, b * scale).map_err(|e| TestCaseError::fail(e.to_string()))?;
            let structure = eliminate(&system, EliminationMode::Sequential, Factorization::QR)
                .map_err(|e| TestCaseError::fail(e.to_string()))?;
            let radius = radius * scale;

            let step = compute_dogleg_step(structure.as_ref(), radius)
                .map_err(|e| TestCaseError::fail(e.to_string()))?;
            prop_assert!(step.norm() <= radius * (1.0 + 1e-9));
            if step.kind() != StepKind::GaussNewton {
                prop_assert!((step.norm() - radius).abs() <= 1e-9 * radius);
            }
        }
    }
}
