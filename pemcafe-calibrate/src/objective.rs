//! Calibration loss.
//!
//! The loss is the root-mean-square difference between the stock-difference NEP and the
//! flux-based NEP over every period after the first. Period 0 is excluded because its
//! fluxes are 0 by construction.

use crate::{Error, Result};
use pemcafe_core::measurement::validate_sequence;
use pemcafe_core::{
    FloatValue, MeasurementRecord, ModelConfig, ParameterVector, Series, SeriesSimulator,
};

/// Loss reported when the simulation produced a non-finite RMSE
pub const NON_FINITE_PENALTY: FloatValue = 1e10;

/// RMSE between `nep_stock_difference` and `nep` over periods `1..`.
///
/// Returns [`NON_FINITE_PENALTY`] if the result is not finite and 0 for a series with
/// fewer than two periods.
pub fn nep_rmse(series: &Series) -> FloatValue {
    let records = series.records();
    if records.len() < 2 {
        return 0.0;
    }
    let residuals = &records[1..];
    let sum_sq: FloatValue = residuals
        .iter()
        .map(|r| (r.nep_stock_difference - r.nep).powi(2))
        .sum();
    let rmse = (sum_sq / residuals.len() as FloatValue).sqrt();
    if rmse.is_finite() {
        rmse
    } else {
        NON_FINITE_PENALTY
    }
}

/// Runs the series simulator for a candidate parameter vector and reduces it to a loss.
#[derive(Debug, Clone)]
pub struct ObjectiveEvaluator<'a> {
    measurements: &'a [MeasurementRecord],
    config: ModelConfig,
}

impl<'a> ObjectiveEvaluator<'a> {
    /// The measurement sequence is validated once here; candidate evaluations never fail.
    pub fn new(measurements: &'a [MeasurementRecord], config: ModelConfig) -> Result<Self> {
        validate_sequence(measurements)?;
        if measurements.len() < 2 {
            return Err(Error::InsufficientPeriods(measurements.len()));
        }
        Ok(Self {
            measurements,
            config,
        })
    }

    pub fn periods(&self) -> usize {
        self.measurements.len()
    }

    pub fn config(&self) -> &ModelConfig {
        &self.config
    }

    pub fn simulate(&self, parameters: &ParameterVector) -> Series {
        SeriesSimulator::new(*parameters, self.config).simulate(self.measurements)
    }

    pub fn loss(&self, parameters: &ParameterVector) -> FloatValue {
        nep_rmse(&self.simulate(parameters))
    }

    /// Loss of a flattened parameter vector; a vector of the wrong length is penalised.
    pub fn loss_from_slice(&self, values: &[FloatValue]) -> FloatValue {
        match ParameterVector::from_slice(values) {
            Ok(parameters) => self.loss(&parameters),
            Err(_) => NON_FINITE_PENALTY,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pemcafe_core::DerivedRecord;

    fn measurement(period: u32, foliage: FloatValue, culm: FloatValue) -> MeasurementRecord {
        MeasurementRecord {
            period,
            foliage,
            branch: 2.0,
            culm,
            stump: 3.0,
            rhizome: 4.0,
            root: 5.0,
            litter_layer: 6.0,
            soil_carbon: 80.0,
            temperature: 18.0,
            undergrowth: 0.3,
        }
    }

    #[test]
    fn test_rmse_skips_first_period() {
        let mut records = vec![DerivedRecord::default(); 3];
        records[0].nep = 100.0;
        records[1].nep_stock_difference = 3.0;
        records[2].nep = 4.0;
        let rmse = nep_rmse(&Series::from_records(records));
        assert!((rmse - (12.5_f64).sqrt()).abs() < 1e-12);
    }

    #[test]
    fn test_non_finite_rmse_is_penalised() {
        let mut records = vec![DerivedRecord::default(); 2];
        records[1].nep = FloatValue::NAN;
        assert_eq!(nep_rmse(&Series::from_records(records)), NON_FINITE_PENALTY);
    }

    #[test]
    fn test_requires_two_periods() {
        let one = [measurement(0, 1.0, 10.0)];
        assert_eq!(
            ObjectiveEvaluator::new(&one, ModelConfig::default()).unwrap_err(),
            Error::InsufficientPeriods(1)
        );
        assert!(matches!(
            ObjectiveEvaluator::new(&[], ModelConfig::default()),
            Err(Error::Core(_))
        ));
    }

    #[test]
    fn test_loss_matches_simulated_series() {
        let m = [measurement(0, 1.0, 10.0), measurement(1, 1.3, 10.6)];
        let evaluator = ObjectiveEvaluator::new(&m, ModelConfig::default()).unwrap();
        let params = ParameterVector::default();

        let series = evaluator.simulate(&params);
        let r = series.get(1).unwrap();
        let expected = (r.nep_stock_difference - r.nep).abs();

        assert!((evaluator.loss(&params) - expected).abs() < 1e-12);
        assert_eq!(evaluator.loss_from_slice(&params.to_array()), evaluator.loss(&params));
        assert_eq!(evaluator.loss_from_slice(&[0.1; 3]), NON_FINITE_PENALTY);
    }
}
