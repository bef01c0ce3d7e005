//! Scoring a Dog Leg step against the true nonlinear error.

use crate::core::{NonlinearSystem, ordering::Ordering};
use crate::linalg::EliminatedSystem;
use crate::optimizer::{OptimizerResult, dogleg_path::DoglegStep};
use tracing::warn;

/// Outcome of evaluating one candidate step.
#[derive(Debug, Clone)]
pub struct StepEvaluation<V> {
    /// Quadratic model decrease `model(0) - model(h)`
    pub predicted_decrease: f64,
    /// Nonlinear decrease `error(x) - error(x ⊞ h)`
    pub actual_decrease: f64,
    /// `actual_decrease / predicted_decrease`, with the conventions of [`evaluate_step`]
    pub gain: f64,
    /// Retracted values and their error; `None` at a stationary point
    pub candidate: Option<(V, f64)>,
}

impl<V> StepEvaluation<V> {
    /// Zero step with zero predicted decrease: nothing was retracted or evaluated.
    pub fn is_stationary(&self) -> bool {
        self.candidate.is_none()
    }

    /// A step is accepted iff its gain is strictly positive.
    pub fn is_accepted(&self) -> bool {
        self.candidate.is_some() && self.gain > 0.0
    }
}

/// Retract `values` by `step`, evaluate the nonlinear error and compute the gain.
///
/// Gain conventions:
/// - negative (or NaN) predicted decrease: warning, gain `-∞`
/// - non-finite candidate error: gain `-∞`
/// - zero predicted decrease: gain `0` if the error did not drop, `+∞` otherwise
/// - zero predicted decrease with a zero step: stationary, no evaluation
///
/// # Errors
/// Propagates failures of the nonlinear system's `retract` and `total_error`.
pub fn evaluate_step<S>(
    system: &S,
    values: &S::Values,
    error: f64,
    step: &DoglegStep,
    structure: &dyn EliminatedSystem,
    ordering: &Ordering,
) -> OptimizerResult<StepEvaluation<S::Values>>
where
    S: NonlinearSystem + ?Sized,
{
    let increment = step.increment();
    let predicted_decrease = structure.predicted_decrease(increment);

    if predicted_decrease == 0.0 && step.norm() == 0.0 {
        return Ok(StepEvaluation {
            predicted_decrease,
            actual_decrease: 0.0,
            gain: 0.0,
            candidate: None,
        });
    }

    let model_is_consistent = predicted_decrease >= 0.0;
    if !model_is_consistent {
        warn!(
            "quadratic model predicts an error increase ({:.6e}) for a {} step",
            predicted_decrease,
            step.kind()
        );
    }

    let candidate_values = system.retract(values, increment, ordering)?;
    let candidate_error = system.total_error(&candidate_values)?;
    let actual_decrease = error - candidate_error;

    let gain = if !model_is_consistent || !candidate_error.is_finite() {
        f64::NEG_INFINITY
    } else if predicted_decrease == 0.0 {
        if actual_decrease <= 0.0 {
            0.0
        } else {
            f64::INFINITY
        }
    } else {
        actual_decrease / predicted_decrease
    };

    Ok(StepEvaluation {
        predicted_decrease,
        actual_decrease,
        gain,
        candidate: Some((candidate_values, candidate_error)),
    })
}
