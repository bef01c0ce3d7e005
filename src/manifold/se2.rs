//! Special Euclidean group SE(2): rigid motions in the plane.
//!
//! Elements are stored as a translation plus a unit complex rotation. The
//! tangent vector is ordered `[x, y, θ]`, matching the `[x, y, θ]` vector form
//! used when a pose is handed to a factor.
//!
//! With `a = sin θ / θ` and `b = (1 - cos θ) / θ` the exponential map is
//!
//! ```text
//! Exp([ρ, θ]) = ( V(θ)·ρ , θ ),   V(θ) = [[a, -b], [b, a]]
//! ```
//!
//! and the logarithm inverts `V`. Small angles use Taylor expansions of `a`
//! and `b`.

use crate::manifold::{LieGroup, ManifoldError, ManifoldResult, Tangent};
use nalgebra::{DVector, Matrix2, Matrix3, Point2, UnitComplex, Vector2, Vector3};
use std::{
    fmt,
    fmt::{Display, Formatter},
};

/// Coefficients `(a, b)` of the `V(θ)` matrix.
fn v_coefficients(theta: f64) -> (f64, f64) {
    let theta_sq = theta * theta;
    if theta_sq < f64::EPSILON {
        // Taylor approximation
        (1.0 - theta_sq / 6.0, 0.5 * theta - theta * theta_sq / 24.0)
    } else {
        (theta.sin() / theta, (1.0 - theta.cos()) / theta)
    }
}

/// Rigid planar transform.
#[derive(Debug, Clone, PartialEq)]
pub struct SE2 {
    translation: Vector2<f64>,
    rotation: UnitComplex<f64>,
}

impl Display for SE2 {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "SE2(translation: [{:.4}, {:.4}], rotation: {:.4})",
            self.x(),
            self.y(),
            self.angle()
        )
    }
}

/// Unchecked `[x, y, θ]` conversion for vectors that already went through
/// [`SE2::try_from_vector`].
impl From<DVector<f64>> for SE2 {
    fn from(data: DVector<f64>) -> Self {
        SE2::from_xy_angle(data[0], data[1], data[2])
    }
}

impl From<SE2> for DVector<f64> {
    fn from(se2: SE2) -> Self {
        DVector::from_vec(vec![se2.x(), se2.y(), se2.angle()])
    }
}

impl SE2 {
    /// Degrees of freedom
    pub const DOF: usize = 3;

    pub fn identity() -> Self {
        SE2 {
            translation: Vector2::zeros(),
            rotation: UnitComplex::identity(),
        }
    }

    pub fn new(translation: Vector2<f64>, rotation: UnitComplex<f64>) -> Self {
        SE2 {
            translation,
            rotation,
        }
    }

    pub fn from_xy_angle(x: f64, y: f64, theta: f64) -> Self {
        Self::new(Vector2::new(x, y), UnitComplex::from_angle(theta))
    }

    /// Build a pose from `[x, y, θ]`.
    ///
    /// # Errors
    /// [`ManifoldError::DimensionMismatch`] unless the vector has 3 entries,
    /// [`ManifoldError::InvalidNumber`] if any of them is NaN or Inf.
    pub fn try_from_vector(data: &DVector<f64>) -> ManifoldResult<Self> {
        if data.len() != Self::DOF {
            return Err(ManifoldError::DimensionMismatch {
                expected: Self::DOF,
                actual: data.len(),
            });
        }
        if data.iter().any(|v| !v.is_finite()) {
            return Err(ManifoldError::InvalidNumber);
        }
        Ok(Self::from_xy_angle(data[0], data[1], data[2]))
    }

    pub fn translation(&self) -> Vector2<f64> {
        self.translation
    }

    pub fn rotation_matrix(&self) -> Matrix2<f64> {
        self.rotation.to_rotation_matrix().into_inner()
    }

    pub fn x(&self) -> f64 {
        self.translation.x
    }

    pub fn y(&self) -> f64 {
        self.translation.y
    }

    pub fn angle(&self) -> f64 {
        self.rotation.angle()
    }

    /// Approximate equality through the tangent-space difference.
    pub fn is_approx(&self, other: &Self, tolerance: f64) -> bool {
        let diff = self.right_minus(other);
        diff.data.norm() < tolerance
    }
}

impl LieGroup for SE2 {
    type TangentVector = SE2Tangent;
    type JacobianMatrix = Matrix3<f64>;

    fn inverse(&self, jacobian: Option<&mut Self::JacobianMatrix>) -> Self {
        let rot_inv = self.rotation.inverse();
        let trans_inv = -(rot_inv * self.translation);

        if let Some(jac) = jacobian {
            *jac = -self.adjoint();
        }

        SE2::new(trans_inv, rot_inv)
    }

    fn compose(
        &self,
        other: &Self,
        jacobian_self: Option<&mut Self::JacobianMatrix>,
        jacobian_other: Option<&mut Self::JacobianMatrix>,
    ) -> Self {
        let rotation = self.rotation * other.rotation;
        let translation = self
            .rotation
            .transform_point(&Point2::from(other.translation))
            .coords
            + self.translation;

        if let Some(jac) = jacobian_self {
            *jac = other.inverse(None).adjoint();
        }
        if let Some(jac) = jacobian_other {
            *jac = Matrix3::identity();
        }

        SE2::new(translation, rotation)
    }

    fn log(&self, jacobian: Option<&mut Self::JacobianMatrix>) -> Self::TangentVector {
        let theta = self.angle();
        let (a, b) = v_coefficients(theta);

        let den = 1.0 / (a * a + b * b);
        let a_scaled = a * den;
        let b_scaled = b * den;

        let result = SE2Tangent::new(
            a_scaled * self.x() + b_scaled * self.y(),
            -b_scaled * self.x() + a_scaled * self.y(),
            theta,
        );

        if let Some(jac) = jacobian {
            *jac = result.right_jacobian_inv();
        }

        result
    }

    fn adjoint(&self) -> Self::JacobianMatrix {
        let mut adjoint = Matrix3::identity();
        adjoint
            .fixed_view_mut::<2, 2>(0, 0)
            .copy_from(&self.rotation_matrix());
        adjoint[(0, 2)] = self.y();
        adjoint[(1, 2)] = -self.x();
        adjoint
    }

    fn tangent_dim(&self) -> usize {
        Self::DOF
    }
}

/// Tangent vector `[x, y, θ]` of SE(2)
#[derive(Debug, Clone, PartialEq)]
pub struct SE2Tangent {
    data: Vector3<f64>,
}

impl From<DVector<f64>> for SE2Tangent {
    fn from(data: DVector<f64>) -> Self {
        SE2Tangent::new(data[0], data[1], data[2])
    }
}

impl From<SE2Tangent> for DVector<f64> {
    fn from(tangent: SE2Tangent) -> Self {
        DVector::from_column_slice(tangent.data.as_slice())
    }
}

impl SE2Tangent {
    pub fn new(x: f64, y: f64, theta: f64) -> Self {
        SE2Tangent {
            data: Vector3::new(x, y, theta),
        }
    }

    pub fn x(&self) -> f64 {
        self.data[0]
    }

    pub fn y(&self) -> f64 {
        self.data[1]
    }

    pub fn angle(&self) -> f64 {
        self.data[2]
    }
}

impl Tangent<SE2> for SE2Tangent {
    fn exp(&self) -> SE2 {
        let theta = self.angle();
        let (a, b) = v_coefficients(theta);
        let translation = Vector2::new(a * self.x() - b * self.y(), b * self.x() + a * self.y());
        SE2::new(
            translation,
            UnitComplex::from_cos_sin_unchecked(theta.cos(), theta.sin()),
        )
    }

    fn right_jacobian(&self) -> Matrix3<f64> {
        let theta = self.angle();
        let theta_sq = theta * theta;
        let (a, b) = v_coefficients(theta);

        let mut jac = Matrix3::identity();
        jac[(0, 0)] = a;
        jac[(0, 1)] = b;
        jac[(1, 0)] = -b;
        jac[(1, 1)] = a;

        if theta_sq < f64::EPSILON {
            jac[(0, 2)] = -self.y() / 2.0 + theta * self.x() / 6.0;
            jac[(1, 2)] = self.x() / 2.0 + theta * self.y() / 6.0;
        } else {
            let (sin_theta, cos_theta) = theta.sin_cos();
            jac[(0, 2)] = (-self.y() + theta * self.x() + self.y() * cos_theta
                - self.x() * sin_theta)
                / theta_sq;
            jac[(1, 2)] =
                (self.x() + theta * self.y() - self.x() * cos_theta - self.y() * sin_theta)
                    / theta_sq;
        }

        jac
    }

    fn right_jacobian_inv(&self) -> Matrix3<f64> {
        let theta = self.angle();
        let theta_sq = theta * theta;

        let mut jac_inv = Matrix3::zeros();
        jac_inv[(0, 1)] = -theta * 0.5;
        jac_inv[(1, 0)] = theta * 0.5;
        jac_inv[(2, 2)] = 1.0;

        if theta_sq > f64::EPSILON {
            let (sin_theta, cos_theta) = theta.sin_cos();
            let a = theta * sin_theta;
            let b = theta * cos_theta;

            jac_inv[(0, 0)] = -a / (2.0 * cos_theta - 2.0);
            jac_inv[(1, 1)] = jac_inv[(0, 0)];

            let den = 2.0 * theta * (cos_theta - 1.0);
            jac_inv[(0, 2)] = (a * self.x() + b * self.y() - theta * self.y()
                + 2.0 * self.x() * cos_theta
                - 2.0 * self.x())
                / den;
            jac_inv[(1, 2)] =
                (-b * self.x() + a * self.y() + theta * self.x() + 2.0 * self.y() * cos_theta
                    - 2.0 * self.y())
                    / den;
        } else {
            jac_inv[(0, 0)] = 1.0 - theta_sq / 12.0;
            jac_inv[(1, 1)] = jac_inv[(0, 0)];
            jac_inv[(0, 2)] = self.y() / 2.0 + theta * self.x() / 12.0;
            jac_inv[(1, 2)] = -self.x() / 2.0 + theta * self.y() / 12.0;
        }

        jac_inv
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f64::consts::PI;

    const TOLERANCE: f64 = 1e-12;

    #[test]
    fn test_se2_inverse_compose_is_identity() {
        let pose = SE2::from_xy_angle(1.0, -2.0, PI / 3.0);
        let product = pose.compose(&pose.inverse(None), None, None);
        assert!(product.is_approx(&SE2::identity(), TOLERANCE));
    }

    #[test]
    fn test_se2_exp_log() {
        let tangent = SE2Tangent::new(0.4, -0.3, 0.8);
        let recovered = tangent.exp().log(None);
        assert!((recovered.x() - 0.4).abs() < TOLERANCE);
        assert!((recovered.y() + 0.3).abs() < TOLERANCE);
        assert!((recovered.angle() - 0.8).abs() < TOLERANCE);
    }

    #[test]
    fn test_se2_exp_small_angle() {
        let tangent = SE2Tangent::new(1.0, 2.0, 1e-10);
        let pose = tangent.exp();
        assert!((pose.x() - 1.0).abs() < 1e-9);
        assert!((pose.y() - 2.0).abs() < 1e-9);
    }

    #[test]
    fn test_se2_right_jacobian_inverse() {
        for tangent in [
            SE2Tangent::new(0.7, -0.4, 0.9),
            SE2Tangent::new(-1.5, 0.2, -2.4),
            SE2Tangent::new(0.3, 0.1, 1e-9),
        ] {
            let product = tangent.right_jacobian() * tangent.right_jacobian_inv();
            assert!((product - Matrix3::identity()).norm() < 1e-9);
        }
    }

    #[test]
    fn test_se2_vector_round_trip() {
        let pose = SE2::from_xy_angle(3.0, 4.0, -0.5);
        let vector: DVector<f64> = pose.clone().into();
        assert_eq!(vector.len(), 3);
        assert!(SE2::from(vector).is_approx(&pose, TOLERANCE));
    }

    #[test]
    fn test_se2_try_from_vector_validates_input() {
        assert_eq!(
            SE2::try_from_vector(&DVector::from_vec(vec![1.0, 2.0])),
            Err(ManifoldError::DimensionMismatch {
                expected: 3,
                actual: 2
            })
        );
        assert_eq!(
            SE2::try_from_vector(&DVector::from_vec(vec![1.0, f64::NAN, 0.0])),
            Err(ManifoldError::InvalidNumber)
        );
        let pose = SE2::try_from_vector(&DVector::from_vec(vec![1.0, 2.0, 0.5]));
        assert!(pose.is_ok_and(|p| p.is_approx(&SE2::from_xy_angle(1.0, 2.0, 0.5), TOLERANCE)));
    }
}
