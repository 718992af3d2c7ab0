//! Monte Carlo propagation of measurement uncertainty.
//!
//! Each draw perturbs the measurement sequence with a [`PerturbationSampler`] and runs it
//! through a [`SeriesRunner`]. Draws are independent and run in parallel on the rayon
//! pool. Every draw owns a ChaCha stream derived from the batch seed and its draw index,
//! so a seeded batch gives the same result however the draws are scheduled.
//!
//! A draw whose run fails or whose series contains a non-finite value is discarded and
//! recorded in the discard log; the batch always continues.

use crate::cancel::CancellationToken;
use crate::perturbation::{NoiseLevels, PerturbationSampler};
use crate::{Error, Result};
use pemcafe_core::measurement::validate_sequence;
use pemcafe_core::{
    FloatValue, MeasurementRecord, ModelConfig, ParameterVector, PemcafeResult, Series,
    SeriesSimulator,
};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use tracing::{info, warn};

/// Turns a measurement sequence into a derived series.
///
/// [`SeriesSimulator`] is the standard implementation. Other implementations can
/// instrument the runs or inject failures.
pub trait SeriesRunner: Sync {
    fn run_series(&self, measurements: &[MeasurementRecord]) -> PemcafeResult<Series>;
}

impl SeriesRunner for SeriesSimulator {
    fn run_series(&self, measurements: &[MeasurementRecord]) -> PemcafeResult<Series> {
        self.run(measurements)
    }
}

/// Settings of a Monte Carlo batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonteCarloOptions {
    /// Number of draws
    pub draws: usize,
    /// Confidence level of the intervals, in (0, 1)
    pub confidence_level: FloatValue,
    /// Seed of the batch. Without one, a random seed is chosen per batch.
    pub seed: Option<u64>,
    /// Measurement-noise SD per measured variable
    pub noise: NoiseLevels,
}

impl Default for MonteCarloOptions {
    fn default() -> Self {
        Self {
            draws: 1000,
            confidence_level: 0.95,
            seed: None,
            noise: NoiseLevels::default(),
        }
    }
}

impl MonteCarloOptions {
    pub fn validate(&self) -> Result<()> {
        if self.draws == 0 {
            return Err(Error::InvalidConfiguration(
                "draws must be at least 1".to_string(),
            ));
        }
        if !(self.confidence_level > 0.0 && self.confidence_level < 1.0) {
            return Err(Error::InvalidConfiguration(format!(
                "confidence_level must lie in (0, 1), got {}",
                self.confidence_level
            )));
        }
        self.noise.validate()
    }
}

/// A draw that was dropped from the sample set
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscardedDraw {
    pub draw: usize,
    pub reason: String,
}

impl fmt::Display for DiscardedDraw {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "draw {}: {}", self.draw, self.reason)
    }
}

/// Surviving series of a Monte Carlo batch, in draw order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SampleSet {
    series: Vec<Series>,
    discarded: Vec<DiscardedDraw>,
    requested: usize,
    periods: usize,
}

impl SampleSet {
    pub fn new(
        series: Vec<Series>,
        discarded: Vec<DiscardedDraw>,
        requested: usize,
        periods: usize,
    ) -> Self {
        Self {
            series,
            discarded,
            requested,
            periods,
        }
    }

    /// Number of surviving draws
    pub fn len(&self) -> usize {
        self.series.len()
    }

    pub fn is_empty(&self) -> bool {
        self.series.is_empty()
    }

    pub fn series(&self) -> &[Series] {
        &self.series
    }

    pub fn discarded(&self) -> &[DiscardedDraw] {
        &self.discarded
    }

    /// Number of draws that were requested
    pub fn requested(&self) -> usize {
        self.requested
    }

    /// Number of periods in each series
    pub fn periods(&self) -> usize {
        self.periods
    }

    /// One reason string per discarded draw
    pub fn discard_log(&self) -> Vec<String> {
        self.discarded.iter().map(|d| d.to_string()).collect()
    }
}

/// Information about Monte Carlo progress, passed to progress callbacks.
///
/// Draws complete out of order, so `completed` counts finished draws rather than
/// naming a draw index.
#[derive(Debug, Clone)]
pub struct MonteCarloProgress {
    pub completed: usize,
    pub total: usize,
    pub discarded: usize,
}

enum DrawOutcome {
    Kept(Series),
    Discarded(String),
    Skipped,
}

/// Repeats perturbation and simulation for a batch of independent draws.
pub struct MonteCarloEngine<R: SeriesRunner = SeriesSimulator> {
    runner: R,
    sampler: PerturbationSampler,
    draws: usize,
    seed: Option<u64>,
}

impl MonteCarloEngine<SeriesSimulator> {
    /// Engine driving the standard simulator with fitted parameters
    pub fn new(
        parameters: ParameterVector,
        config: ModelConfig,
        options: &MonteCarloOptions,
    ) -> Result<Self> {
        Self::with_runner(SeriesSimulator::new(parameters, config), options)
    }
}

impl<R: SeriesRunner> MonteCarloEngine<R> {
    pub fn with_runner(runner: R, options: &MonteCarloOptions) -> Result<Self> {
        options.validate()?;
        Ok(Self {
            runner,
            sampler: PerturbationSampler::new(&options.noise)?,
            draws: options.draws,
            seed: options.seed,
        })
    }

    pub fn runner(&self) -> &R {
        &self.runner
    }

    pub fn draws(&self) -> usize {
        self.draws
    }

    /// Run every draw and collect the surviving series.
    pub fn run(&self, measurements: &[MeasurementRecord]) -> Result<SampleSet> {
        self.run_inner(measurements, &CancellationToken::new(), None)
    }

    /// Run with cooperative cancellation and a progress callback.
    ///
    /// The callback is invoked from worker threads after each draw finishes. Once
    /// `cancel` is set, draws that have not started are skipped and the batch returns
    /// [`Error::Cancelled`].
    pub fn run_with_progress<F>(
        &self,
        measurements: &[MeasurementRecord],
        cancel: &CancellationToken,
        progress_callback: F,
    ) -> Result<SampleSet>
    where
        F: Fn(&MonteCarloProgress) + Sync,
    {
        self.run_inner(measurements, cancel, Some(&progress_callback))
    }

    fn run_inner(
        &self,
        measurements: &[MeasurementRecord],
        cancel: &CancellationToken,
        progress: Option<&(dyn Fn(&MonteCarloProgress) + Sync)>,
    ) -> Result<SampleSet> {
        validate_sequence(measurements)?;
        let seed = self.seed.unwrap_or_else(rand::random);
        info!(
            draws = self.draws,
            periods = measurements.len(),
            seed,
            "starting monte carlo batch"
        );

        let completed = AtomicUsize::new(0);
        let discarded = AtomicUsize::new(0);
        let outcomes: Vec<DrawOutcome> = (0..self.draws)
            .into_par_iter()
            .map(|draw| {
                if cancel.is_cancelled() {
                    return DrawOutcome::Skipped;
                }
                let outcome = self.run_draw(measurements, seed, draw);
                if matches!(outcome, DrawOutcome::Discarded(_)) {
                    discarded.fetch_add(1, Ordering::Relaxed);
                }
                let done = completed.fetch_add(1, Ordering::Relaxed) + 1;
                if let Some(callback) = progress {
                    callback(&MonteCarloProgress {
                        completed: done,
                        total: self.draws,
                        discarded: discarded.load(Ordering::Relaxed),
                    });
                }
                outcome
            })
            .collect();
        cancel.check()?;

        let mut series = Vec::with_capacity(outcomes.len());
        let mut discards = Vec::new();
        for (draw, outcome) in outcomes.into_iter().enumerate() {
            match outcome {
                DrawOutcome::Kept(s) => series.push(s),
                DrawOutcome::Discarded(reason) => {
                    warn!(draw, reason = %reason, "discarding monte carlo draw");
                    discards.push(DiscardedDraw { draw, reason });
                }
                DrawOutcome::Skipped => return Err(Error::Cancelled),
            }
        }

        info!(
            surviving = series.len(),
            discarded = discards.len(),
            "finished monte carlo batch"
        );
        Ok(SampleSet::new(
            series,
            discards,
            self.draws,
            measurements.len(),
        ))
    }

    fn run_draw(&self, measurements: &[MeasurementRecord], seed: u64, draw: usize) -> DrawOutcome {
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        rng.set_stream(draw as u64);
        let perturbed = self.sampler.sample(measurements, &mut rng);

        match self.runner.run_series(&perturbed) {
            Ok(series) => match series.first_non_finite() {
                None => DrawOutcome::Kept(series),
                Some((period, variable)) => DrawOutcome::Discarded(format!(
                    "non-finite `{variable}` at period index {period}"
                )),
            },
            Err(e) => DrawOutcome::Discarded(e.to_string()),
        }
    }
}
