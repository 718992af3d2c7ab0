//! Derivative-free bounded minimisers used by the calibrator.
//!
//! Both solvers work on a flattened parameter vector and keep every trial point inside
//! the [`ParameterBounds`] by projection. Constraints other than the bounds are expected
//! to be folded into the [`Objective`] as a penalty.
//!
//! - [`Solver::NelderMead`]: downhill simplex with the standard reflection (1),
//!   expansion (2), contraction (0.5) and shrink (0.5) coefficients.
//! - [`Solver::CompassSearch`]: a pattern search polling `x ± step_i e_i` along every
//!   coordinate. The `2n` poll points of an iteration are evaluated as one parallel batch.

use crate::cancel::CancellationToken;
use crate::{Error, Result};
use pemcafe_core::{FloatValue, ParameterBounds};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use tracing::debug;

const REFLECTION: FloatValue = 1.0;
const EXPANSION: FloatValue = 2.0;
const CONTRACTION: FloatValue = 0.5;
const SHRINK: FloatValue = 0.5;

/// Initial step for a coordinate that starts at exactly 0
const ZERO_COORDINATE_STEP: FloatValue = 0.000_25;

/// A scalar function to minimise.
///
/// Implementations must be cheap to share between threads; batch evaluation runs on
/// the rayon pool.
pub trait Objective: Sync {
    fn evaluate(&self, x: &[FloatValue]) -> FloatValue;

    /// Evaluate several candidate points in parallel.
    fn evaluate_batch(&self, points: &[Vec<FloatValue>]) -> Vec<FloatValue> {
        points.par_iter().map(|x| self.evaluate(x)).collect()
    }
}

impl<F> Objective for F
where
    F: Fn(&[FloatValue]) -> FloatValue + Sync,
{
    fn evaluate(&self, x: &[FloatValue]) -> FloatValue {
        self(x)
    }
}

/// Choice of minimisation algorithm.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Solver {
    #[default]
    NelderMead,
    CompassSearch,
}

/// Stopping rules and step sizes shared by both solvers.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SolverOptions {
    pub solver: Solver,
    /// Maximum number of iterations before giving up
    pub max_iterations: usize,
    /// Absolute tolerance on the spread of objective values
    pub function_tolerance: FloatValue,
    /// Absolute tolerance on the spread (simplex) or step length (compass) of the parameters
    pub parameter_tolerance: FloatValue,
    /// Initial step as a fraction of each starting coordinate
    pub initial_step: FloatValue,
}

impl Default for SolverOptions {
    fn default() -> Self {
        Self {
            solver: Solver::default(),
            max_iterations: 1600,
            function_tolerance: 1e-4,
            parameter_tolerance: 1e-4,
            initial_step: 0.05,
        }
    }
}

impl SolverOptions {
    pub fn validate(&self) -> Result<()> {
        if self.max_iterations == 0 {
            return Err(Error::InvalidConfiguration(
                "max_iterations must be at least 1".to_string(),
            ));
        }
        for (name, value) in [
            ("function_tolerance", self.function_tolerance),
            ("parameter_tolerance", self.parameter_tolerance),
        ] {
            if !value.is_finite() || value < 0.0 {
                return Err(Error::InvalidConfiguration(format!(
                    "{name} must be finite and non-negative, got {value}"
                )));
            }
        }
        if !self.initial_step.is_finite() || self.initial_step <= 0.0 {
            return Err(Error::InvalidConfiguration(format!(
                "initial_step must be finite and positive, got {}",
                self.initial_step
            )));
        }
        Ok(())
    }
}

/// Why a solver stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TerminationReason {
    /// Objective values and parameters both settled within tolerance
    Converged,
    /// The step length fell below the parameter tolerance
    StepTolerance,
    /// The iteration budget was exhausted
    MaxIterations,
}

impl TerminationReason {
    pub fn is_converged(self) -> bool {
        !matches!(self, TerminationReason::MaxIterations)
    }
}

/// Information about optimisation progress, passed to progress callbacks.
#[derive(Debug, Clone)]
pub struct CalibrationProgress {
    /// Current iteration number (0-indexed)
    pub iteration: usize,
    pub max_iterations: usize,
    /// Lowest penalised objective value seen so far
    pub best_value: FloatValue,
    /// Objective evaluations so far
    pub evaluations: usize,
}

/// Best point found by a solver.
#[derive(Debug, Clone, PartialEq)]
pub struct Minimum {
    pub x: Vec<FloatValue>,
    pub value: FloatValue,
    pub iterations: usize,
    pub evaluations: usize,
    pub termination: TerminationReason,
}

/// Minimise `objective` from `x0` with the solver selected in `options`.
pub fn minimize<O, F>(
    objective: &O,
    x0: &[FloatValue],
    bounds: &ParameterBounds,
    options: &SolverOptions,
    cancel: &CancellationToken,
    progress: Option<F>,
) -> Result<Minimum>
where
    O: Objective + ?Sized,
    F: FnMut(&CalibrationProgress),
{
    options.validate()?;
    match options.solver {
        Solver::NelderMead => nelder_mead(objective, x0, bounds, options, cancel, progress),
        Solver::CompassSearch => compass_search(objective, x0, bounds, options, cancel, progress),
    }
}

fn initial_step(x: FloatValue, relative: FloatValue) -> FloatValue {
    if x == 0.0 {
        ZERO_COORDINATE_STEP
    } else {
        relative * x.abs()
    }
}

fn by_value(a: &FloatValue, b: &FloatValue) -> Ordering {
    a.total_cmp(b)
}

struct Vertex {
    x: Vec<FloatValue>,
    value: FloatValue,
}

/// Point `from + coefficient * (to - from)`, projected onto the bounds
fn blend(
    bounds: &ParameterBounds,
    from: &[FloatValue],
    to: &[FloatValue],
    coefficient: FloatValue,
) -> Vec<FloatValue> {
    let raw: Vec<FloatValue> = from
        .iter()
        .zip(to)
        .map(|(f, t)| f + coefficient * (t - f))
        .collect();
    bounds.project(&raw)
}

fn nelder_mead<O, F>(
    objective: &O,
    x0: &[FloatValue],
    bounds: &ParameterBounds,
    options: &SolverOptions,
    cancel: &CancellationToken,
    mut progress: Option<F>,
) -> Result<Minimum>
where
    O: Objective + ?Sized,
    F: FnMut(&CalibrationProgress),
{
    let n = x0.len();
    let start = bounds.project(x0);

    // Axis-aligned initial simplex; a vertex pushed back onto `start` by the bounds is
    // mirrored to the other side instead.
    let mut points = vec![start.clone()];
    for i in 0..n {
        let step = initial_step(start[i], options.initial_step);
        let mut point = start.clone();
        point[i] += step;
        point = bounds.project(&point);
        if point[i] == start[i] {
            point[i] -= step;
            point = bounds.project(&point);
        }
        points.push(point);
    }
    let values = objective.evaluate_batch(&points);
    let mut evaluations = values.len();
    let mut simplex: Vec<Vertex> = points
        .into_iter()
        .zip(values)
        .map(|(x, value)| Vertex { x, value })
        .collect();

    for iteration in 0..options.max_iterations {
        cancel.check()?;
        simplex.sort_by(|a, b| by_value(&a.value, &b.value));

        let best = simplex[0].value;
        let worst = simplex[n].value;
        debug!(iteration, best, evaluations, "nelder-mead iteration");
        if let Some(callback) = progress.as_mut() {
            callback(&CalibrationProgress {
                iteration,
                max_iterations: options.max_iterations,
                best_value: best,
                evaluations,
            });
        }

        let x_spread = simplex[1..]
            .iter()
            .flat_map(|v| v.x.iter().zip(&simplex[0].x).map(|(a, b)| (a - b).abs()))
            .fold(0.0, FloatValue::max);
        if (worst - best).abs() <= options.function_tolerance
            && x_spread <= options.parameter_tolerance
        {
            return Ok(Minimum {
                x: simplex[0].x.clone(),
                value: best,
                iterations: iteration,
                evaluations,
                termination: TerminationReason::Converged,
            });
        }

        // Centroid of every vertex but the worst
        let mut centroid = vec![0.0; n];
        for vertex in &simplex[..n] {
            for (c, x) in centroid.iter_mut().zip(&vertex.x) {
                *c += x / n as FloatValue;
            }
        }

        let reflected = blend(bounds, &centroid, &simplex[n].x, -REFLECTION);
        let reflected_value = objective.evaluate(&reflected);
        evaluations += 1;

        if reflected_value < best {
            let expanded = blend(bounds, &centroid, &reflected, EXPANSION);
            let expanded_value = objective.evaluate(&expanded);
            evaluations += 1;
            simplex[n] = if expanded_value < reflected_value {
                Vertex {
                    x: expanded,
                    value: expanded_value,
                }
            } else {
                Vertex {
                    x: reflected,
                    value: reflected_value,
                }
            };
            continue;
        }

        if reflected_value < simplex[n - 1].value {
            simplex[n] = Vertex {
                x: reflected,
                value: reflected_value,
            };
            continue;
        }

        let (contracted, threshold) = if reflected_value < worst {
            (
                blend(bounds, &centroid, &reflected, CONTRACTION),
                reflected_value,
            )
        } else {
            (blend(bounds, &centroid, &simplex[n].x, CONTRACTION), worst)
        };
        let contracted_value = objective.evaluate(&contracted);
        evaluations += 1;
        if contracted_value < threshold {
            simplex[n] = Vertex {
                x: contracted,
                value: contracted_value,
            };
            continue;
        }

        // Shrink towards the best vertex
        let best_x = simplex[0].x.clone();
        let shrunk: Vec<Vec<FloatValue>> = simplex[1..]
            .iter()
            .map(|v| blend(bounds, &best_x, &v.x, SHRINK))
            .collect();
        let shrunk_values = objective.evaluate_batch(&shrunk);
        evaluations += shrunk_values.len();
        for (vertex, (x, value)) in simplex[1..]
            .iter_mut()
            .zip(shrunk.into_iter().zip(shrunk_values))
        {
            *vertex = Vertex { x, value };
        }
    }

    simplex.sort_by(|a, b| by_value(&a.value, &b.value));
    let best = simplex.swap_remove(0);
    Ok(Minimum {
        x: best.x,
        value: best.value,
        iterations: options.max_iterations,
        evaluations,
        termination: TerminationReason::MaxIterations,
    })
}

fn compass_search<O, F>(
    objective: &O,
    x0: &[FloatValue],
    bounds: &ParameterBounds,
    options: &SolverOptions,
    cancel: &CancellationToken,
    mut progress: Option<F>,
) -> Result<Minimum>
where
    O: Objective + ?Sized,
    F: FnMut(&CalibrationProgress),
{
    let mut x = bounds.project(x0);
    let mut value = objective.evaluate(&x);
    let mut evaluations = 1;
    let mut steps: Vec<FloatValue> = x
        .iter()
        .map(|xi| initial_step(*xi, options.initial_step))
        .collect();

    for iteration in 0..options.max_iterations {
        cancel.check()?;
        debug!(iteration, best = value, evaluations, "compass search iteration");
        if let Some(callback) = progress.as_mut() {
            callback(&CalibrationProgress {
                iteration,
                max_iterations: options.max_iterations,
                best_value: value,
                evaluations,
            });
        }

        let largest_step = steps.iter().copied().fold(0.0, FloatValue::max);
        if largest_step <= options.parameter_tolerance {
            return Ok(Minimum {
                x,
                value,
                iterations: iteration,
                evaluations,
                termination: TerminationReason::StepTolerance,
            });
        }

        let polls: Vec<Vec<FloatValue>> = (0..x.len())
            .flat_map(|i| [1.0, -1.0].map(|sign| (i, sign)))
            .map(|(i, sign)| {
                let mut point = x.clone();
                point[i] += sign * steps[i];
                bounds.project(&point)
            })
            .collect();
        let poll_values = objective.evaluate_batch(&polls);
        evaluations += poll_values.len();

        let best_poll = poll_values
            .iter()
            .enumerate()
            .min_by(|a, b| by_value(a.1, b.1))
            .map(|(i, v)| (i, *v));

        match best_poll {
            Some((index, poll_value)) if poll_value < value => {
                let improvement = value - poll_value;
                x = polls[index].clone();
                value = poll_value;
                if improvement <= options.function_tolerance {
                    steps.iter_mut().for_each(|s| *s *= 0.5);
                }
            }
            _ => steps.iter_mut().for_each(|s| *s *= 0.5),
        }
    }

    Ok(Minimum {
        x,
        value,
        iterations: options.max_iterations,
        evaluations,
        termination: TerminationReason::MaxIterations,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pemcafe_core::parameters::PARAMETER_COUNT;
    use pemcafe_core::Bound;

    fn quadratic(x: &[FloatValue]) -> FloatValue {
        // Minimum at (0.5, 0.25, ..., 0.5, 0.25)
        x.iter()
            .enumerate()
            .map(|(i, v)| {
                let target = if i % 2 == 0 { 0.5 } else { 0.25 };
                (v - target).powi(2)
            })
            .sum()
    }

    fn solve(solver: Solver, bounds: &ParameterBounds) -> Minimum {
        let options = SolverOptions {
            solver,
            max_iterations: 20_000,
            function_tolerance: 1e-10,
            parameter_tolerance: 1e-6,
            ..Default::default()
        };
        minimize(
            &quadratic,
            &[1.0; PARAMETER_COUNT],
            bounds,
            &options,
            &CancellationToken::new(),
            None::<fn(&CalibrationProgress)>,
        )
        .unwrap()
    }

    #[test]
    fn test_solvers_find_unconstrained_minimum() {
        for solver in [Solver::NelderMead, Solver::CompassSearch] {
            let minimum = solve(solver, &ParameterBounds::default());
            assert!(minimum.termination.is_converged(), "{solver:?}");
            assert!(minimum.value < 1e-6, "{solver:?}: {}", minimum.value);
            assert!((minimum.x[0] - 0.5).abs() < 1e-3);
            assert!((minimum.x[1] - 0.25).abs() < 1e-3);
        }
    }

    #[test]
    fn test_solvers_respect_bounds() {
        let mut bounds = ParameterBounds::default();
        bounds.0[0] = Bound::new(0.7, Some(2.0));
        for solver in [Solver::NelderMead, Solver::CompassSearch] {
            let minimum = solve(solver, &bounds);
            assert!(minimum.x[0] >= 0.7);
            assert!((minimum.x[0] - 0.7).abs() < 1e-3, "{solver:?}");
            assert!(minimum.x.iter().all(|v| *v >= 0.0));
        }
    }

    #[test]
    fn test_iteration_budget_is_reported() {
        let options = SolverOptions {
            max_iterations: 3,
            ..Default::default()
        };
        let minimum = minimize(
            &quadratic,
            &[1.0; PARAMETER_COUNT],
            &ParameterBounds::default(),
            &options,
            &CancellationToken::new(),
            None::<fn(&CalibrationProgress)>,
        )
        .unwrap();
        assert_eq!(minimum.termination, TerminationReason::MaxIterations);
        assert!(!minimum.termination.is_converged());
        assert_eq!(minimum.iterations, 3);
    }

    #[test]
    fn test_progress_and_cancellation() {
        let cancel = CancellationToken::new();
        let mut seen = Vec::new();
        let result = minimize(
            &quadratic,
            &[1.0; PARAMETER_COUNT],
            &ParameterBounds::default(),
            &SolverOptions::default(),
            &cancel,
            Some(|p: &CalibrationProgress| {
                seen.push(p.iteration);
                if p.iteration == 4 {
                    cancel.cancel();
                }
            }),
        );
        assert_eq!(result, Err(Error::Cancelled));
        assert_eq!(seen, vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn test_invalid_options_are_rejected() {
        let options = SolverOptions {
            initial_step: 0.0,
            ..Default::default()
        };
        assert!(options.validate().is_err());
        assert!(SolverOptions::default().validate().is_ok());
    }
}
