//! Threading the state-transition engine across an ordered measurement sequence.

use crate::engine::StateTransitionEngine;
use crate::errors::PemcafeResult;
use crate::measurement::{validate_sequence, MeasurementRecord};
use crate::parameters::{ModelConfig, ParameterVector};
use crate::record::{DerivedRecord, Variable};
use crate::FloatValue;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Index-aligned sequence of derived records, one per measurement.
///
/// At index 0 every flux-type field is 0 and stocks equal the raw measurements.
/// For `i > 0` below-ground stocks equal the stock at `i - 1` plus the net production
/// at `i`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Series {
    records: Vec<DerivedRecord>,
}

impl Series {
    pub fn from_records(records: Vec<DerivedRecord>) -> Self {
        Self { records }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn records(&self) -> &[DerivedRecord] {
        &self.records
    }

    pub fn records_mut(&mut self) -> &mut [DerivedRecord] {
        &mut self.records
    }

    pub fn get(&self, index: usize) -> Option<&DerivedRecord> {
        self.records.get(index)
    }

    pub fn iter(&self) -> impl Iterator<Item = &DerivedRecord> {
        self.records.iter()
    }

    /// Values of one variable across all periods
    pub fn values(&self, variable: Variable) -> Vec<FloatValue> {
        self.records.iter().map(|r| r.value(variable)).collect()
    }

    /// Location of the first non-finite value as `(period index, variable)`
    pub fn first_non_finite(&self) -> Option<(usize, Variable)> {
        self.records
            .iter()
            .enumerate()
            .find_map(|(i, r)| r.first_non_finite().map(|v| (i, v)))
    }

    pub fn is_finite(&self) -> bool {
        self.first_non_finite().is_none()
    }
}

impl IntoIterator for Series {
    type Item = DerivedRecord;
    type IntoIter = std::vec::IntoIter<Self::Item>;

    fn into_iter(self) -> Self::IntoIter {
        self.records.into_iter()
    }
}

/// Drives a [`StateTransitionEngine`] over a measurement sequence in one pass.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SeriesSimulator {
    engine: StateTransitionEngine,
}

impl SeriesSimulator {
    pub fn new(parameters: ParameterVector, config: ModelConfig) -> Self {
        Self {
            engine: StateTransitionEngine::new(parameters, config),
        }
    }

    pub fn engine(&self) -> &StateTransitionEngine {
        &self.engine
    }

    /// Simulate a sequence without validating it.
    ///
    /// The previous record is carried forward by value; the first record sees no
    /// previous state and has its flux fields cleared.
    pub fn simulate(&self, measurements: &[MeasurementRecord]) -> Series {
        let mut records = Vec::with_capacity(measurements.len());
        let mut previous: Option<DerivedRecord> = None;

        for measurement in measurements {
            let mut record = self.engine.step(measurement, previous.as_ref());
            if previous.is_none() {
                record.clear_fluxes();
            }
            records.push(record);
            previous = Some(record);
        }

        Series::from_records(records)
    }

    /// Validate the measurement sequence, then simulate it.
    pub fn run(&self, measurements: &[MeasurementRecord]) -> PemcafeResult<Series> {
        validate_sequence(measurements)?;
        debug!(periods = measurements.len(), "simulating series");
        Ok(self.simulate(measurements))
    }
}
