//! Bounded, constrained fit of the model parameters.
//!
//! The ordering constraints (leaf > branch > culm turnover, root > rhizome turnover) are
//! enforced with an exact L1 penalty added to the calibration loss. Bounds are enforced by
//! the solvers themselves. The returned point is checked against the strict ordering;
//! a violation is reported as non-convergence rather than as an error.

use crate::cancel::CancellationToken;
use crate::objective::ObjectiveEvaluator;
use crate::optimizer::{
    minimize, CalibrationProgress, Objective, SolverOptions, TerminationReason,
};
use crate::{Error, Result};
use pemcafe_core::{
    FloatValue, MeasurementRecord, ModelConfig, ParameterBounds, ParameterVector,
};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

/// Weight of the ordering-constraint penalty
const ORDERING_PENALTY: FloatValue = 1e3;
/// Slack the penalty asks for, so that the strict inequalities hold at the optimum
const ORDERING_MARGIN: FloatValue = 1e-6;

/// Calibration loss plus the ordering-constraint penalty
struct PenalizedLoss<'a> {
    evaluator: &'a ObjectiveEvaluator<'a>,
}

impl Objective for PenalizedLoss<'_> {
    fn evaluate(&self, x: &[FloatValue]) -> FloatValue {
        let violation = ParameterVector::from_slice(x)
            .map(|p| ordering_violation(&p))
            .unwrap_or(0.0);
        self.evaluator.loss_from_slice(x) + ORDERING_PENALTY * violation
    }
}

/// Total shortfall of the ordering margins below [`ORDERING_MARGIN`]
fn ordering_violation(parameters: &ParameterVector) -> FloatValue {
    parameters
        .ordering_margins()
        .iter()
        .map(|m| (ORDERING_MARGIN - m).max(0.0))
        .sum()
}

/// Outcome of a calibration.
///
/// The best point found is always returned; `converged` is false when the solver ran
/// out of iterations or the point violates the ordering constraints.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalibrationResult {
    pub parameters: ParameterVector,
    pub converged: bool,
    /// Unpenalised calibration loss at `parameters`
    pub loss: FloatValue,
    pub iterations: usize,
    pub evaluations: usize,
    pub termination: TerminationReason,
    /// Whether `parameters` satisfies leaf > branch > culm and root > rhizome turnover
    pub ordering_satisfied: bool,
}

/// Fits a [`ParameterVector`] to a measurement sequence.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Calibrator {
    config: ModelConfig,
    bounds: ParameterBounds,
    options: SolverOptions,
}

impl Calibrator {
    /// Create a calibrator, validating the bounds and solver options.
    pub fn new(
        config: ModelConfig,
        bounds: ParameterBounds,
        options: SolverOptions,
    ) -> Result<Self> {
        bounds.validate()?;
        options.validate()?;
        Ok(Self {
            config,
            bounds,
            options,
        })
    }

    pub fn bounds(&self) -> &ParameterBounds {
        &self.bounds
    }

    pub fn options(&self) -> &SolverOptions {
        &self.options
    }

    /// Calibrate starting from `initial`.
    pub fn calibrate(
        &self,
        measurements: &[MeasurementRecord],
        initial: &ParameterVector,
    ) -> Result<CalibrationResult> {
        self.calibrate_inner(
            measurements,
            initial,
            &CancellationToken::new(),
            None::<fn(&CalibrationProgress)>,
        )
    }

    /// Calibrate with cooperative cancellation and a per-iteration progress callback.
    ///
    /// # Arguments
    ///
    /// * `measurements` - Ordered measurement sequence, at least two periods
    /// * `initial` - Starting point; must lie in the parameter domain
    /// * `cancel` - Checked between iterations; a cancelled run returns [`Error::Cancelled`]
    /// * `progress_callback` - Called once per solver iteration
    pub fn calibrate_with_progress<F>(
        &self,
        measurements: &[MeasurementRecord],
        initial: &ParameterVector,
        cancel: &CancellationToken,
        progress_callback: F,
    ) -> Result<CalibrationResult>
    where
        F: FnMut(&CalibrationProgress),
    {
        self.calibrate_inner(measurements, initial, cancel, Some(progress_callback))
    }

    fn calibrate_inner<F>(
        &self,
        measurements: &[MeasurementRecord],
        initial: &ParameterVector,
        cancel: &CancellationToken,
        progress: Option<F>,
    ) -> Result<CalibrationResult>
    where
        F: FnMut(&CalibrationProgress),
    {
        initial
            .validate_ranges()
            .map_err(|e| Error::InvalidParameter(e.to_string()))?;
        let evaluator = ObjectiveEvaluator::new(measurements, self.config)?;
        let objective = PenalizedLoss {
            evaluator: &evaluator,
        };

        info!(
            periods = evaluator.periods(),
            solver = ?self.options.solver,
            initial_loss = evaluator.loss(initial),
            "starting calibration"
        );

        let minimum = minimize(
            &objective,
            &initial.to_array(),
            &self.bounds,
            &self.options,
            cancel,
            progress,
        )?;
        let parameters = ParameterVector::from_slice(&minimum.x)?;
        let loss = evaluator.loss(&parameters);
        let ordering_satisfied = parameters.satisfies_ordering();
        let in_domain = parameters.validate_ranges().is_ok();
        let converged = minimum.termination.is_converged() && ordering_satisfied && in_domain;

        if converged {
            info!(
                loss,
                iterations = minimum.iterations,
                evaluations = minimum.evaluations,
                "calibration converged"
            );
        } else {
            warn!(
                loss,
                iterations = minimum.iterations,
                termination = ?minimum.termination,
                ordering_satisfied,
                in_domain,
                "calibration did not converge; returning best point found"
            );
        }

        Ok(CalibrationResult {
            parameters,
            converged,
            loss,
            iterations: minimum.iterations,
            evaluations: minimum.evaluations,
            termination: minimum.termination,
            ordering_satisfied,
        })
    }
}
