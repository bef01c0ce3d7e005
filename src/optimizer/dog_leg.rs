//! Dog Leg trust region optimization algorithm implementation.
//!
//! The Dog Leg method is a robust trust region algorithm for solving nonlinear least squares problems:
//!
//! ```text
//! min f(x) = ½ Σᵢ ||Wᵢ·rᵢ(x)||²
//! ```
//!
//! # Algorithm Overview
//!
//! Each call to [`DogLeg::iterate`]:
//!
//! 1. linearizes the problem at the current values,
//! 2. eliminates the linear system into a Bayes net (sequential) or a Bayes
//!    tree (multifrontal),
//! 3. computes the Dog Leg step for the current radius Δ (see
//!    [`dogleg_path`](crate::optimizer::dogleg_path)),
//! 4. scores the step with the gain ratio
//!    `ρ = (actual decrease) / (predicted decrease)`,
//! 5. adapts the radius and accepts the step iff `ρ > 0`.
//!
//! ## Trust Region Management
//!
//! ```text
//! ρ > 0.75  →  Δ = max(Δ, 3·||h||)
//! ρ < 0.25  →  Δ = Δ / 2            (clamped to the radius floor)
//! ```
//!
//! A shrink that hits the floor right after a rejected step ends the call with
//! [`OptimizerError::NoProgress`].
//!
//! ## Iteration Policies
//!
//! - [`IterationPolicy::SingleAttempt`]: one step per call, accepted or not.
//! - [`IterationPolicy::Search`]: on rejection, shrink and retry against the same
//!   eliminated system until a step is accepted or the radius floor is hit.
//!
//! # Example
//!
//! ```
//! use dogleg_solver::core::problem::Problem;
//! use dogleg_solver::factors::PriorFactor;
//! use dogleg_solver::manifold::{ManifoldType, rn::Rn};
//! use dogleg_solver::optimizer::{DogLeg, DogLegConfig};
//! use nalgebra::dvector;
//! use std::collections::HashMap;
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//!
//! let mut problem = Problem::new();
//! problem.add_residual_block(&["x"], Box::new(PriorFactor::new(Rn::from_slice(&[3.0, 4.0]))), None)?;
//!
//! let mut initial = HashMap::new();
//! initial.insert("x".to_string(), (ManifoldType::RN, dvector![0.0, 0.0]));
//! let values = problem.initialize_variables(&initial)?;
//!
//! let config = DogLegConfig::new().with_initial_radius(10.0);
//! let mut solver = DogLeg::new(&problem, values, config)?;
//! let result = solver.optimize()?;
//! assert!(result.final_cost < 1e-20);
//! # Ok(())
//! # }
//! ```

use crate::core::{NonlinearSystem, ordering::Ordering};
use crate::linalg::{self, EliminationMode, Factorization, LinAlgError};
use crate::optimizer::{
    OptimizationStatus, OptimizerError, OptimizerResult, SolverResult,
    dogleg_path::{DoglegPath, StepKind},
    step_evaluation::evaluate_step,
};
use faer::Mat;
use std::{fmt, str::FromStr};
use tracing::{debug, info, trace, warn};
use web_time as time;

/// What a call to [`DogLeg::iterate`] does after a rejected step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IterationPolicy {
    /// Evaluate one step per call and return whatever the outcome
    #[default]
    SingleAttempt,
    /// Shrink and retry on the same eliminated system until a step is accepted
    Search,
}

impl fmt::Display for IterationPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IterationPolicy::SingleAttempt => write!(f, "SINGLE_ATTEMPT"),
            IterationPolicy::Search => write!(f, "SEARCH"),
        }
    }
}

impl FromStr for IterationPolicy {
    type Err = OptimizerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "SINGLE_ATTEMPT" | "ONE_STEP_PER_ITERATION" => Ok(IterationPolicy::SingleAttempt),
            "SEARCH" | "SEARCH_EACH_ITERATION" | "SEARCH_REDUCE_ONLY" => Ok(IterationPolicy::Search),
            _ => Err(OptimizerError::InvalidConfiguration(format!(
                "unknown iteration policy '{s}'"
            ))),
        }
    }
}

/// Diagnostic output of the outer loop; each level includes the ones below it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub enum Verbosity {
    #[default]
    Silent,
    /// Report why the optimization stopped
    Termination,
    /// Report the error after every accepted step
    Error,
    /// Also report the values after every accepted step
    Values,
    /// Also report every step increment
    Delta,
    /// Also report the size of every linear system
    Linear,
}

impl FromStr for Verbosity {
    type Err = OptimizerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "SILENT" => Ok(Verbosity::Silent),
            "TERMINATION" => Ok(Verbosity::Termination),
            "ERROR" => Ok(Verbosity::Error),
            "VALUES" => Ok(Verbosity::Values),
            "DELTA" => Ok(Verbosity::Delta),
            "LINEAR" => Ok(Verbosity::Linear),
            _ => Err(OptimizerError::InvalidConfiguration(format!(
                "unknown verbosity '{s}'"
            ))),
        }
    }
}

/// Diagnostic output of the Dog Leg step itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DoglegVerbosity {
    #[default]
    Silent,
    /// Report branch, norm, gain and radius update of every step
    Verbose,
}

impl FromStr for DoglegVerbosity {
    type Err = OptimizerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "SILENT" => Ok(DoglegVerbosity::Silent),
            "VERBOSE" => Ok(DoglegVerbosity::Verbose),
            _ => Err(OptimizerError::InvalidConfiguration(format!(
                "unknown dogleg verbosity '{s}'"
            ))),
        }
    }
}

/// Configuration parameters for the Dog Leg trust region optimizer.
///
/// # Builder Pattern
///
/// ```
/// use dogleg_solver::optimizer::dog_leg::{DogLegConfig, IterationPolicy};
/// use dogleg_solver::linalg::EliminationMode;
///
/// let config = DogLegConfig::new()
///     .with_elimination(EliminationMode::Sequential)
///     .with_iteration_policy(IterationPolicy::Search)
///     .with_initial_radius(0.5)
///     .with_max_iterations(50);
/// assert!(config.validate().is_ok());
/// ```
///
/// Options can also be set from strings, for parameter files:
///
/// ```
/// use dogleg_solver::optimizer::dog_leg::DogLegConfig;
/// # fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let config = DogLegConfig::new()
///     .set_option("factorization", "QR")?
///     .set_option("radius_floor", "1e-8")?;
/// assert!(DogLegConfig::new().set_option("elimination", "CHOLMOD").is_err());
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct DogLegConfig {
    /// Topology of the eliminated system
    pub elimination: EliminationMode,
    /// Dense kernel used during elimination
    pub factorization: Factorization,
    pub iteration_policy: IterationPolicy,
    /// Trust region radius of the first iteration
    pub initial_radius: f64,
    /// Smallest radius; shrinking below it after a rejection means no progress
    pub radius_floor: f64,
    /// Expansion multiplier on the step norm (for good steps, gain > `gain_expand_threshold`)
    pub expansion_factor: f64,
    /// Shrink multiplier (for poor steps, gain < `gain_shrink_threshold`)
    pub shrink_factor: f64,
    pub gain_expand_threshold: f64,
    pub gain_shrink_threshold: f64,
    /// Maximum number of `iterate` calls made by `optimize`
    pub max_iterations: usize,
    /// Stop once the error is at or below this value
    pub error_tolerance: f64,
    /// Stop once an accepted step decreases the error by less than this
    pub absolute_error_tolerance: f64,
    /// Stop once an accepted step decreases the error by less than this fraction
    pub relative_error_tolerance: f64,
    pub verbosity: Verbosity,
    pub dogleg_verbosity: DoglegVerbosity,
    /// Elimination ordering; the system's default ordering when `None`
    pub ordering: Option<Ordering>,
}

impl Default for DogLegConfig {
    fn default() -> Self {
        Self {
            elimination: EliminationMode::default(),
            factorization: Factorization::default(),
            iteration_policy: IterationPolicy::default(),
            initial_radius: 1.0,
            radius_floor: 1e-5,
            expansion_factor: 3.0,
            shrink_factor: 0.5,
            gain_expand_threshold: 0.75,
            gain_shrink_threshold: 0.25,
            max_iterations: 100,
            error_tolerance: 0.0,
            absolute_error_tolerance: 1e-5,
            relative_error_tolerance: 1e-5,
            verbosity: Verbosity::default(),
            dogleg_verbosity: DoglegVerbosity::default(),
            ordering: None,
        }
    }
}

fn parse_number<T: FromStr>(key: &str, value: &str) -> OptimizerResult<T> {
    value.trim().parse::<T>().map_err(|_| {
        OptimizerError::InvalidConfiguration(format!("option '{key}' expects a number, got '{value}'"))
    })
}

fn selector_error(err: LinAlgError) -> OptimizerError {
    OptimizerError::InvalidConfiguration(err.to_string())
}

impl DogLegConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_elimination(mut self, elimination: EliminationMode) -> Self {
        self.elimination = elimination;
        self
    }

    pub fn with_factorization(mut self, factorization: Factorization) -> Self {
        self.factorization = factorization;
        self
    }

    pub fn with_iteration_policy(mut self, policy: IterationPolicy) -> Self {
        self.iteration_policy = policy;
        self
    }

    pub fn with_initial_radius(mut self, radius: f64) -> Self {
        self.initial_radius = radius;
        self
    }

    pub fn with_radius_floor(mut self, radius_floor: f64) -> Self {
        self.radius_floor = radius_floor;
        self
    }

    pub fn with_radius_factors(mut self, expansion: f64, shrink: f64) -> Self {
        self.expansion_factor = expansion;
        self.shrink_factor = shrink;
        self
    }

    pub fn with_gain_thresholds(mut self, shrink_below: f64, expand_above: f64) -> Self {
        self.gain_shrink_threshold = shrink_below;
        self.gain_expand_threshold = expand_above;
        self
    }

    pub fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.max_iterations = max_iterations;
        self
    }

    pub fn with_error_tolerance(mut self, tolerance: f64) -> Self {
        self.error_tolerance = tolerance;
        self
    }

    pub fn with_absolute_error_tolerance(mut self, tolerance: f64) -> Self {
        self.absolute_error_tolerance = tolerance;
        self
    }

    pub fn with_relative_error_tolerance(mut self, tolerance: f64) -> Self {
        self.relative_error_tolerance = tolerance;
        self
    }

    pub fn with_verbosity(mut self, verbosity: Verbosity) -> Self {
        self.verbosity = verbosity;
        self
    }

    pub fn with_dogleg_verbosity(mut self, verbosity: DoglegVerbosity) -> Self {
        self.dogleg_verbosity = verbosity;
        self
    }

    pub fn with_ordering(mut self, ordering: Ordering) -> Self {
        self.ordering = Some(ordering);
        self
    }

    /// Set one option from its string form.
    ///
    /// Selector values are case-insensitive (`SEQUENTIAL`, `MULTIFRONTAL`,
    /// `CHOLESKY`/`LDL`, `QR`, `SINGLE_ATTEMPT`/`ONE_STEP_PER_ITERATION`,
    /// `SEARCH`, verbosity names).
    ///
    /// # Errors
    /// [`OptimizerError::InvalidConfiguration`] for unknown keys or values.
    pub fn set_option(mut self, key: &str, value: &str) -> OptimizerResult<Self> {
        match key {
            "elimination" => self.elimination = value.parse().map_err(selector_error)?,
            "factorization" => self.factorization = value.parse().map_err(selector_error)?,
            "iteration_policy" => self.iteration_policy = value.parse()?,
            "verbosity" => self.verbosity = value.parse()?,
            "dogleg_verbosity" => self.dogleg_verbosity = value.parse()?,
            "initial_radius" => self.initial_radius = parse_number(key, value)?,
            "radius_floor" => self.radius_floor = parse_number(key, value)?,
            "expansion_factor" => self.expansion_factor = parse_number(key, value)?,
            "shrink_factor" => self.shrink_factor = parse_number(key, value)?,
            "gain_expand_threshold" => self.gain_expand_threshold = parse_number(key, value)?,
            "gain_shrink_threshold" => self.gain_shrink_threshold = parse_number(key, value)?,
            "max_iterations" => self.max_iterations = parse_number(key, value)?,
            "error_tolerance" => self.error_tolerance = parse_number(key, value)?,
            "absolute_error_tolerance" => {
                self.absolute_error_tolerance = parse_number(key, value)?
            }
            "relative_error_tolerance" => {
                self.relative_error_tolerance = parse_number(key, value)?
            }
            _ => {
                return Err(OptimizerError::InvalidConfiguration(format!(
                    "unknown option '{key}'"
                ))
                .log());
            }
        }
        Ok(self)
    }

    /// Check numeric options for consistency.
    ///
    /// # Errors
    /// [`OptimizerError::InvalidConfiguration`] naming the first bad option.
    pub fn validate(&self) -> OptimizerResult<()> {
        let fail = |msg: String| Err(OptimizerError::InvalidConfiguration(msg).log());

        if !(self.initial_radius.is_finite() && self.initial_radius > 0.0) {
            return fail(format!("initial_radius must be positive, got {}", self.initial_radius));
        }
        if !(self.radius_floor.is_finite() && self.radius_floor > 0.0) {
            return fail(format!("radius_floor must be positive, got {}", self.radius_floor));
        }
        if self.radius_floor > self.initial_radius {
            return fail(format!(
                "radius_floor {} exceeds initial_radius {}",
                self.radius_floor, self.initial_radius
            ));
        }
        if !(self.expansion_factor >= 1.0) {
            return fail(format!(
                "expansion_factor must be at least 1, got {}",
                self.expansion_factor
            ));
        }
        if !(self.shrink_factor > 0.0 && self.shrink_factor < 1.0) {
            return fail(format!(
                "shrink_factor must lie in (0, 1), got {}",
                self.shrink_factor
            ));
        }
        if !(self.gain_shrink_threshold > 0.0
            && self.gain_shrink_threshold <= self.gain_expand_threshold)
        {
            return fail(format!(
                "gain thresholds must satisfy 0 < shrink ({}) <= expand ({})",
                self.gain_shrink_threshold, self.gain_expand_threshold
            ));
        }
        if self.max_iterations == 0 {
            return fail("max_iterations must be at least 1".to_string());
        }
        let tolerances = [
            self.error_tolerance,
            self.absolute_error_tolerance,
            self.relative_error_tolerance,
        ];
        if tolerances.iter().any(|t| !(*t >= 0.0)) {
            return fail(format!("tolerances must be non-negative, got {tolerances:?}"));
        }
        Ok(())
    }

    /// Print configuration parameters (debug level logging)
    pub fn print_configuration(&self) {
        debug!(
            "Configuration:\n  Solver:        Dog-Leg\n  Elimination:   {}\n  Factorization: {}\n  Policy:        {}\n\nTrust Region:\n  Initial radius:   {:.2e}\n  Radius floor:     {:.2e}\n  Expansion factor: {:.2}\n  Shrink factor:    {:.2}\n  Gain thresholds:  [{:.2}, {:.2}]\n\nConvergence Criteria:\n  Max iterations:     {}\n  Error tolerance:    {:.2e}\n  Absolute decrease:  {:.2e}\n  Relative decrease:  {:.2e}\n  Ordering:           {}",
            self.elimination,
            self.factorization,
            self.iteration_policy,
            self.initial_radius,
            self.radius_floor,
            self.expansion_factor,
            self.shrink_factor,
            self.gain_shrink_threshold,
            self.gain_expand_threshold,
            self.max_iterations,
            self.error_tolerance,
            self.absolute_error_tolerance,
            self.relative_error_tolerance,
            if self.ordering.is_some() {
                "explicit"
            } else {
                "natural"
            }
        );
    }
}

/// Estimate carried between iterations.
#[derive(Debug, Clone)]
pub struct DogLegState<V> {
    pub values: V,
    /// Nonlinear error at `values`
    pub error: f64,
    /// Last accepted increment
    pub delta: Option<Mat<f64>>,
    /// Current trust region radius, always positive
    pub radius: f64,
    /// Number of accepted steps
    pub iterations: usize,
}

/// Where the controller is within one call to [`DogLeg::iterate`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControllerPhase {
    Ready,
    Evaluating,
    Accepted,
    Rejected,
}

/// Result of one [`DogLeg::iterate`] call that did not fail.
#[derive(Debug, Clone, PartialEq)]
pub enum IterationOutcome {
    Accepted {
        step_kind: StepKind,
        gain: f64,
        error: f64,
        radius: f64,
        /// Steps evaluated in this call (more than one only under `Search`)
        attempts: usize,
    },
    Rejected {
        step_kind: StepKind,
        gain: f64,
        radius: f64,
    },
    /// Zero step with zero predicted decrease; the state is unchanged
    Stationary,
}

/// How one gain value changed the radius.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RadiusUpdate {
    Expanded,
    Shrunk,
    /// Shrink that hit the radius floor
    Floored,
    Unchanged,
}

/// Per-attempt statistics for detailed logging (Ceres-style output).
#[derive(Debug, Clone)]
pub struct IterationStats {
    /// Call number of `iterate` (1-indexed)
    pub iteration: usize,
    /// Error after the attempt (unchanged if rejected)
    pub cost: f64,
    /// Actual error decrease of the attempted step
    pub cost_change: f64,
    /// Norm of the model gradient at zero increment
    pub gradient_norm: f64,
    pub step_norm: f64,
    pub step_kind: StepKind,
    /// Gain ratio (ρ = actual / predicted)
    pub gain: f64,
    /// Radius after the update
    pub tr_radius: f64,
    pub iter_time_ms: f64,
    pub total_time_ms: f64,
    pub accepted: bool,
}

impl IterationStats {
    /// Print table header in Ceres-style format
    pub fn print_header() {
        debug!(
            "{:>4}  {:>13}  {:>13}  {:>13}  {:>13}  {:>4}  {:>11}  {:>11}  {:>11}  {:>13}  {:>6}",
            "iter",
            "cost",
            "cost_change",
            "|gradient|",
            "|step|",
            "kind",
            "gain",
            "tr_radius",
            "iter_time",
            "total_time",
            "status"
        );
    }

    /// Print single attempt line in Ceres-style format with scientific notation
    pub fn print_line(&self) {
        let status = if self.accepted { "✓" } else { "✗" };

        debug!(
            "{:>4}  {:>13.6e}  {:>13.2e}  {:>13.2e}  {:>13.2e}  {:>4}  {:>11.2e}  {:>11.2e}  {:>9.2}ms  {:>11.2}ms  {:>6}",
            self.iteration,
            self.cost,
            self.cost_change,
            self.gradient_norm,
            self.step_norm,
            self.step_kind,
            self.gain,
            self.tr_radius,
            self.iter_time_ms,
            self.total_time_ms,
            status
        );
    }
}

/// Summary statistics for the Dog Leg optimization process.
#[derive(Debug, Clone)]
pub struct DogLegSummary {
    pub initial_cost: f64,
    pub final_cost: f64,
    /// Number of `iterate` calls
    pub iterations: usize,
    /// Number of accepted steps
    pub successful_steps: usize,
    /// Number of rejected steps (all attempts, including Search retries)
    pub unsuccessful_steps: usize,
    pub final_trust_region_radius: f64,
    pub total_time: time::Duration,
    pub average_time_per_iteration: time::Duration,
    /// Per-attempt history, recorded only while debug logging is enabled
    pub iteration_history: Vec<IterationStats>,
    pub convergence_status: OptimizationStatus,
}

impl fmt::Display for DogLegSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Dog-Leg Final Result")?;

        if self.convergence_status.is_converged() {
            writeln!(f, "CONVERGED ({})", self.convergence_status)?;
        } else {
            writeln!(f, "STOPPED ({})", self.convergence_status)?;
        }

        writeln!(f)?;
        writeln!(f, "Cost:")?;
        writeln!(f, "  Initial:   {:.6e}", self.initial_cost)?;
        writeln!(f, "  Final:     {:.6e}", self.final_cost)?;
        writeln!(
            f,
            "  Reduction: {:.6e} ({:.2}%)",
            self.initial_cost - self.final_cost,
            100.0 * (self.initial_cost - self.final_cost) / self.initial_cost.max(1e-12)
        )?;
        writeln!(f)?;
        let attempts = (self.successful_steps + self.unsuccessful_steps).max(1) as f64;
        writeln!(f, "Iterations:")?;
        writeln!(f, "  Total:              {}", self.iterations)?;
        writeln!(
            f,
            "  Successful steps:   {} ({:.1}%)",
            self.successful_steps,
            100.0 * self.successful_steps as f64 / attempts
        )?;
        writeln!(
            f,
            "  Unsuccessful steps: {} ({:.1}%)",
            self.unsuccessful_steps,
            100.0 * self.unsuccessful_steps as f64 / attempts
        )?;
        writeln!(f)?;
        writeln!(f, "Trust Region:")?;
        writeln!(f, "  Final radius: {:.6e}", self.final_trust_region_radius)?;
        writeln!(f)?;
        writeln!(f, "Performance:")?;
        writeln!(
            f,
            "  Total time:             {:.2}ms",
            self.total_time.as_secs_f64() * 1000.0
        )?;
        writeln!(
            f,
            "  Average per iteration:  {:.2}ms",
            self.average_time_per_iteration.as_secs_f64() * 1000.0
        )?;

        Ok(())
    }
}

/// Dog Leg trust region controller over a [`NonlinearSystem`].
///
/// The controller owns the current estimate ([`DogLegState`]) and mutates it
/// only when a step is accepted. Linear systems and eliminated structures are
/// rebuilt on every call to [`iterate`](Self::iterate).
pub struct DogLeg<'a, S>
where
    S: NonlinearSystem + ?Sized,
{
    system: &'a S,
    config: DogLegConfig,
    ordering: Ordering,
    state: DogLegState<S::Values>,
    phase: ControllerPhase,
    successful_steps: usize,
    unsuccessful_steps: usize,
    history: Vec<IterationStats>,
    calls: usize,
    started: time::Instant,
}

impl<'a, S> DogLeg<'a, S>
where
    S: NonlinearSystem + ?Sized,
{
    /// Validate `config`, fix the ordering and evaluate the initial error.
    ///
    /// # Errors
    /// - [`OptimizerError::InvalidConfiguration`] for inconsistent options
    /// - [`OptimizerError::NumericalInstability`] if the initial error is not finite
    /// - [`OptimizerError::NonlinearSystem`] if the system cannot be evaluated
    pub fn new(system: &'a S, initial_values: S::Values, config: DogLegConfig) -> OptimizerResult<Self> {
        config.validate()?;
        let ordering = match &config.ordering {
            Some(ordering) => ordering.clone(),
            None => system.default_ordering(&initial_values)?,
        };
        let error = system.total_error(&initial_values)?;
        if !error.is_finite() {
            return Err(OptimizerError::NumericalInstability(format!(
                "initial error is {error}"
            ))
            .log());
        }

        let radius = config.initial_radius;
        Ok(Self {
            system,
            config,
            ordering,
            state: DogLegState {
                values: initial_values,
                error,
                delta: None,
                radius,
                iterations: 0,
            },
            phase: ControllerPhase::Ready,
            successful_steps: 0,
            unsuccessful_steps: 0,
            history: Vec::new(),
            calls: 0,
            started: time::Instant::now(),
        })
    }

    pub fn state(&self) -> &DogLegState<S::Values> {
        &self.state
    }

    pub fn values(&self) -> &S::Values {
        &self.state.values
    }

    pub fn error(&self) -> f64 {
        self.state.error
    }

    pub fn radius(&self) -> f64 {
        self.state.radius
    }

    /// Number of accepted steps so far.
    pub fn iterations(&self) -> usize {
        self.state.iterations
    }

    pub fn ordering(&self) -> &Ordering {
        &self.ordering
    }

    pub fn config(&self) -> &DogLegConfig {
        &self.config
    }

    pub fn phase(&self) -> ControllerPhase {
        self.phase
    }

    pub fn into_values(self) -> S::Values {
        self.state.values
    }

    fn set_phase(&mut self, phase: ControllerPhase) {
        trace!("dogleg phase {:?} -> {:?}", self.phase, phase);
        self.phase = phase;
    }

    /// Adapt the radius to the gain of a step of norm `step_norm`.
    fn update_radius(&mut self, gain: f64, step_norm: f64) -> RadiusUpdate {
        if gain > self.config.gain_expand_threshold {
            self.state.radius = self
                .state
                .radius
                .max(self.config.expansion_factor * step_norm);
            RadiusUpdate::Expanded
        } else if gain < self.config.gain_shrink_threshold {
            let shrunk = self.state.radius * self.config.shrink_factor;
            if shrunk < self.config.radius_floor {
                self.state.radius = self.config.radius_floor;
                RadiusUpdate::Floored
            } else {
                self.state.radius = shrunk;
                RadiusUpdate::Shrunk
            }
        } else {
            RadiusUpdate::Unchanged
        }
    }

    /// Perform one Dog Leg iteration: linearize, eliminate, then evaluate steps
    /// according to the iteration policy.
    ///
    /// # Errors
    /// - [`OptimizerError::SingularSystem`] if the linearized system is rank deficient
    /// - [`OptimizerError::NoProgress`] if the radius hits its floor right after a rejection
    /// - [`OptimizerError::NonlinearSystem`] if linearization, retraction or error evaluation fail
    ///
    /// The state is left untouched by every error.
    pub fn iterate(&mut self) -> OptimizerResult<IterationOutcome> {
        self.set_phase(ControllerPhase::Ready);
        self.calls += 1;
        let iter_start = time::Instant::now();

        let linear = self.system.linearize(&self.state.values, &self.ordering)?;
        if self.config.verbosity >= Verbosity::Linear {
            info!(
                "linear system: {} factors, {} rows, {} unknowns",
                linear.factors().len(),
                linear.rows(),
                linear.dim()
            );
        }

        let structure =
            linalg::eliminate(&linear, self.config.elimination, self.config.factorization)
                .map_err(|e| OptimizerError::from(e).log())?;
        let path = DoglegPath::new(structure.as_ref()).map_err(|e| OptimizerError::from(e).log())?;
        let collect_stats = tracing::enabled!(tracing::Level::DEBUG);
        let gradient_norm = if collect_stats {
            structure.gradient_at_zero().norm_l2()
        } else {
            0.0
        };
        let verbose = self.config.dogleg_verbosity == DoglegVerbosity::Verbose;

        let mut attempts = 0;
        loop {
            attempts += 1;
            let step = path.step(self.state.radius);
            let step_kind = step.kind();
            let step_norm = step.norm();
            if self.config.verbosity >= Verbosity::Delta {
                info!("delta ({}): {:?}", step_kind, step.increment());
            }

            self.set_phase(ControllerPhase::Evaluating);
            let evaluation = evaluate_step(
                self.system,
                &self.state.values,
                self.state.error,
                &step,
                structure.as_ref(),
                &self.ordering,
            )?;
            if evaluation.is_stationary() {
                self.set_phase(ControllerPhase::Ready);
                if verbose {
                    info!("stationary point: zero step with zero predicted decrease");
                }
                return Ok(IterationOutcome::Stationary);
            }

            let gain = evaluation.gain;
            let radius_before = self.state.radius;
            let update = self.update_radius(gain, step_norm);
            if verbose {
                info!(
                    "{} step |h| = {:.6e}, predicted {:.6e}, actual {:.6e}, gain {:.4}, radius {:.6e} -> {:.6e} ({:?})",
                    step_kind,
                    step_norm,
                    evaluation.predicted_decrease,
                    evaluation.actual_decrease,
                    gain,
                    radius_before,
                    self.state.radius,
                    update
                );
            }

            let accepted = evaluation.is_accepted();
            if accepted {
                self.successful_steps += 1;
            } else {
                self.unsuccessful_steps += 1;
            }

            let committed = match evaluation.candidate {
                Some((values, error)) if accepted => {
                    self.state.values = values;
                    self.state.error = error;
                    self.state.delta = Some(step.into_increment());
                    self.state.iterations += 1;
                    true
                }
                _ => false,
            };

            if collect_stats {
                let stats = IterationStats {
                    iteration: self.calls,
                    cost: self.state.error,
                    cost_change: evaluation.actual_decrease,
                    gradient_norm,
                    step_norm,
                    step_kind,
                    gain,
                    tr_radius: self.state.radius,
                    iter_time_ms: iter_start.elapsed().as_secs_f64() * 1000.0,
                    total_time_ms: self.started.elapsed().as_secs_f64() * 1000.0,
                    accepted: committed,
                };
                stats.print_line();
                self.history.push(stats);
            }

            if committed {
                self.set_phase(ControllerPhase::Accepted);
                return Ok(IterationOutcome::Accepted {
                    step_kind,
                    gain,
                    error: self.state.error,
                    radius: self.state.radius,
                    attempts,
                });
            }

            self.set_phase(ControllerPhase::Rejected);
            if update == RadiusUpdate::Floored {
                warn!(
                    "trust region collapsed to its floor {:.3e} without an accepted step",
                    self.config.radius_floor
                );
                return Err(OptimizerError::NoProgress {
                    radius: self.state.radius,
                    radius_floor: self.config.radius_floor,
                });
            }

            match self.config.iteration_policy {
                IterationPolicy::SingleAttempt => {
                    return Ok(IterationOutcome::Rejected {
                        step_kind,
                        gain,
                        radius: self.state.radius,
                    });
                }
                IterationPolicy::Search => {
                    trace!("retrying with radius {:.6e}", self.state.radius);
                }
            }
        }
    }

    /// Iterate until a stopping criterion is met.
    ///
    /// `NoProgress` ends the loop with [`OptimizationStatus::NoProgress`];
    /// every other error is returned.
    pub fn optimize(&mut self) -> OptimizerResult<SolverResult<S::Values>> {
        let start_time = time::Instant::now();
        let initial_cost = self.state.error;
        let first_call = self.calls;

        if tracing::enabled!(tracing::Level::DEBUG) {
            self.config.print_configuration();
            IterationStats::print_header();
        }

        let status = loop {
            if self.state.error <= self.config.error_tolerance {
                break OptimizationStatus::ErrorToleranceReached;
            }
            if self.calls - first_call >= self.config.max_iterations {
                break OptimizationStatus::MaxIterationsReached;
            }

            let previous_error = self.state.error;
            match self.iterate() {
                Ok(IterationOutcome::Stationary) => break OptimizationStatus::StationaryPoint,
                Ok(IterationOutcome::Rejected { .. }) => {}
                Ok(IterationOutcome::Accepted { error, .. }) => {
                    if self.config.verbosity >= Verbosity::Error {
                        info!("iteration {}: error = {:.6e}", self.calls, error);
                    }
                    if self.config.verbosity >= Verbosity::Values {
                        info!("values: {:?}", self.state.values);
                    }

                    let absolute_decrease = previous_error - error;
                    let relative_decrease = absolute_decrease / previous_error;
                    if error <= self.config.error_tolerance {
                        break OptimizationStatus::ErrorToleranceReached;
                    }
                    if absolute_decrease < self.config.absolute_error_tolerance {
                        break OptimizationStatus::AbsoluteErrorToleranceReached;
                    }
                    if relative_decrease < self.config.relative_error_tolerance {
                        break OptimizationStatus::RelativeErrorToleranceReached;
                    }
                }
                Err(err) if err.is_no_progress() => break OptimizationStatus::NoProgress,
                Err(err) => return Err(err),
            }
        };

        if self.config.verbosity >= Verbosity::Termination {
            info!(
                "dogleg stopped after {} calls: {} (error {:.6e})",
                self.calls - first_call,
                status,
                self.state.error
            );
        }

        let iterations = self.calls - first_call;
        let elapsed_time = start_time.elapsed();
        let summary = DogLegSummary {
            initial_cost,
            final_cost: self.state.error,
            iterations,
            successful_steps: self.successful_steps,
            unsuccessful_steps: self.unsuccessful_steps,
            final_trust_region_radius: self.state.radius,
            total_time: elapsed_time,
            average_time_per_iteration: if iterations > 0 {
                elapsed_time / iterations as u32
            } else {
                time::Duration::from_secs(0)
            },
            iteration_history: self.history.clone(),
            convergence_status: status.clone(),
        };
        debug!("{}", summary);

        Ok(SolverResult {
            parameters: self.state.values.clone(),
            status,
            initial_cost,
            final_cost: self.state.error,
            iterations,
            elapsed_time,
            summary,
        })
    }
}
