//! Calibration and uncertainty propagation for the carbon-pool model.
//!
//! The [`calibrator::Calibrator`] fits a [`pemcafe_core::ParameterVector`] by reconciling the
//! flux-based and stock-difference estimates of net ecosystem production. The
//! [`monte_carlo::MonteCarloEngine`] then propagates measurement uncertainty through the
//! fitted model, [`confidence::ConfidenceIntervalEstimator`] summarises the surviving draws
//! and [`assembler::ResultAssembler`] merges everything into one result table.
//!
//! Candidate evaluations and Monte Carlo draws are independent and run on the rayon
//! thread pool. Long operations accept a [`cancel::CancellationToken`].

use pemcafe_core::PemcafeError;
use thiserror::Error;

pub mod assembler;
pub mod calibrator;
pub mod cancel;
pub mod confidence;
pub mod monte_carlo;
pub mod objective;
pub mod optimizer;
pub mod perturbation;

pub use assembler::{MonteCarloReport, ResultAssembler, ResultTable};
pub use calibrator::{CalibrationResult, Calibrator};
pub use cancel::CancellationToken;
pub use confidence::{ConfidenceBand, ConfidenceBands, ConfidenceIntervalEstimator};
pub use monte_carlo::{
    DiscardedDraw, MonteCarloEngine, MonteCarloOptions, MonteCarloProgress, SampleSet,
    SeriesRunner,
};
pub use objective::ObjectiveEvaluator;
pub use optimizer::{CalibrationProgress, Solver, SolverOptions, TerminationReason};
pub use perturbation::{NoiseLevels, PerturbationSampler};

/// Error type for calibration and uncertainty propagation.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum Error {
    #[error(transparent)]
    Core(#[from] PemcafeError),

    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error("Calibration needs at least two periods, got {0}")]
    InsufficientPeriods(usize),

    #[error("Operation was cancelled")]
    Cancelled,
}

/// Convenience type for `Result<T, Error>`.
pub type Result<T> = std::result::Result<T, Error>;
