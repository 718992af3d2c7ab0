//! Core data model and per-period carbon-pool state transitions for estimating a
//! stand's annual carbon balance from sparse field surveys.
//!
//! - [`measurement`]: raw per-period observations
//! - [`parameters`]: calibrated rates, their bounds and the model's mode switches
//! - [`record`]: the derived per-period state and its variable catalogue
//! - [`engine`]: the pure state-transition function
//! - [`series`]: threading the engine across a measurement sequence

pub mod engine;
pub mod errors;
pub mod measurement;
pub mod numerics;
pub mod parameters;
pub mod record;
pub mod series;

pub type FloatValue = f64;

pub use engine::StateTransitionEngine;
pub use errors::{PemcafeError, PemcafeResult};
pub use measurement::{MeasuredVariable, MeasurementRecord};
pub use parameters::{BnppMethod, Bound, ModelConfig, ParameterBounds, ParameterVector};
pub use record::{DerivedRecord, Variable, VariableKind};
pub use series::{Series, SeriesSimulator};
