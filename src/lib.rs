//! Stand-level carbon balance from sparse field surveys.
//!
//! The three entry points:
//!
//! - [`calibrate`]: fit the model parameters by reconciling the flux-based and
//!   stock-difference estimates of net ecosystem production
//! - [`run`]: simulate one measurement sequence with fixed parameters
//! - [`monte_carlo`]: propagate measurement uncertainty through the fitted model into
//!   per-period confidence bands
//!
//! Loading survey files, presenting progress and exporting the result table are left to
//! the caller. The library emits `tracing` events but never installs a subscriber.

use pemcafe_core::PemcafeError;
use thiserror::Error;
use tracing::info;

pub mod config;

pub use config::PemcafeConfig;
pub use pemcafe_calibrate;
pub use pemcafe_calibrate::{
    CalibrationProgress, CalibrationResult, CancellationToken, MonteCarloProgress,
    MonteCarloReport, ResultTable,
};
pub use pemcafe_core;
pub use pemcafe_core::{MeasurementRecord, ParameterVector, Series};

use pemcafe_calibrate::{
    Calibrator, ConfidenceIntervalEstimator, MonteCarloEngine, ResultAssembler,
};
use pemcafe_core::{ModelConfig, SeriesSimulator};

/// Error type for the entry points and configuration loading.
#[derive(Error, Debug)]
pub enum Error {
    #[error("Failed to parse configuration: {0}")]
    ConfigParse(#[from] toml::de::Error),
    #[error(transparent)]
    Calibration(#[from] pemcafe_calibrate::Error),
}

impl From<PemcafeError> for Error {
    fn from(value: PemcafeError) -> Self {
        Error::Calibration(value.into())
    }
}

impl Error {
    /// True if the run was stopped through a [`CancellationToken`]
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Error::Calibration(pemcafe_calibrate::Error::Cancelled))
    }
}

/// Convenience type for `Result<T, Error>`.
pub type Result<T> = std::result::Result<T, Error>;

/// Simulate `measurements` with fixed `parameters`.
pub fn run(
    parameters: &ParameterVector,
    model: ModelConfig,
    measurements: &[MeasurementRecord],
) -> Result<Series> {
    parameters.validate_ranges()?;
    Ok(SeriesSimulator::new(*parameters, model).run(measurements)?)
}

/// Fit the parameters, starting from the configured initial point.
pub fn calibrate(
    config: &PemcafeConfig,
    measurements: &[MeasurementRecord],
) -> Result<CalibrationResult> {
    calibrate_with_progress(config, measurements, &CancellationToken::new(), |_| {})
}

/// [`calibrate`] with cooperative cancellation and per-iteration progress.
pub fn calibrate_with_progress<F>(
    config: &PemcafeConfig,
    measurements: &[MeasurementRecord],
    cancel: &CancellationToken,
    progress_callback: F,
) -> Result<CalibrationResult>
where
    F: FnMut(&CalibrationProgress),
{
    let calibrator = Calibrator::new(*config.model(), *config.bounds(), *config.calibration())?;
    Ok(calibrator.calibrate_with_progress(
        measurements,
        config.parameters(),
        cancel,
        progress_callback,
    )?)
}

/// Run the configured Monte Carlo batch around `parameters` and assemble the result table.
pub fn monte_carlo(
    config: &PemcafeConfig,
    parameters: &ParameterVector,
    measurements: &[MeasurementRecord],
) -> Result<MonteCarloReport> {
    monte_carlo_with_progress(
        config,
        parameters,
        measurements,
        &CancellationToken::new(),
        |_| {},
    )
}

/// [`monte_carlo`] with cooperative cancellation and per-draw progress.
///
/// The callback runs on the worker threads.
pub fn monte_carlo_with_progress<F>(
    config: &PemcafeConfig,
    parameters: &ParameterVector,
    measurements: &[MeasurementRecord],
    cancel: &CancellationToken,
    progress_callback: F,
) -> Result<MonteCarloReport>
where
    F: Fn(&MonteCarloProgress) + Sync,
{
    let options = config.monte_carlo();
    let base = run(parameters, *config.model(), measurements)?;
    let engine = MonteCarloEngine::new(*parameters, *config.model(), options)?;
    let estimator = ConfidenceIntervalEstimator::new(options.confidence_level)?;

    let samples = engine.run_with_progress(measurements, cancel, progress_callback)?;
    let bands = estimator.estimate(&samples);
    let report = ResultAssembler.assemble(base, bands, &samples);
    info!(
        surviving = report.surviving_draws,
        requested = report.requested_draws,
        "assembled monte carlo report"
    );
    Ok(report)
}
