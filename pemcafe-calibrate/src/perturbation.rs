//! Randomised variants of a measurement sequence.

use crate::{Error, Result};
use indexmap::IndexMap;
use pemcafe_core::measurement::MeasurementClass;
use pemcafe_core::{FloatValue, MeasuredVariable, MeasurementRecord};
use rand::Rng;
use rand_distr::{Distribution, Normal};
use serde::{Deserialize, Serialize};

/// Smallest value a perturbed biomass pool (including undergrowth) may take
pub const BIOMASS_FLOOR: FloatValue = 1e-6;
/// Smallest value a perturbed litter layer or soil carbon stock may take
pub const DETRITAL_STOCK_FLOOR: FloatValue = 1e-6;
/// Plausible range of a perturbed mean temperature
/// unit: °C
pub const TEMPERATURE_RANGE: (FloatValue, FloatValue) = (-50.0, 60.0);

/// Standard deviation of the measurement noise for each measured variable.
///
/// Variables that are absent, or present with an SD of exactly 0, are not perturbed.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NoiseLevels(IndexMap<MeasuredVariable, FloatValue>);

impl NoiseLevels {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the SD for a variable, replacing any previous value
    pub fn with(mut self, variable: MeasuredVariable, std_dev: FloatValue) -> Self {
        self.0.insert(variable, std_dev);
        self
    }

    pub fn get(&self, variable: MeasuredVariable) -> Option<FloatValue> {
        self.0.get(&variable).copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = (MeasuredVariable, FloatValue)> + '_ {
        self.0.iter().map(|(k, v)| (*k, *v))
    }

    /// True if no variable would be perturbed
    pub fn is_quiet(&self) -> bool {
        self.0.values().all(|sd| *sd == 0.0)
    }

    /// Every SD must be finite and non-negative
    pub fn validate(&self) -> Result<()> {
        for (variable, sd) in self.iter() {
            if !sd.is_finite() || sd < 0.0 {
                return Err(Error::InvalidConfiguration(format!(
                    "standard deviation for `{variable}` must be finite and non-negative, got {sd}"
                )));
            }
        }
        Ok(())
    }
}

impl FromIterator<(MeasuredVariable, FloatValue)> for NoiseLevels {
    fn from_iter<T: IntoIterator<Item = (MeasuredVariable, FloatValue)>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// Apply the floor or clip for the variable's measurement class
pub fn limit(variable: MeasuredVariable, value: FloatValue) -> FloatValue {
    match variable.class() {
        MeasurementClass::Biomass => value.max(BIOMASS_FLOOR),
        MeasurementClass::DetritalStock => value.max(DETRITAL_STOCK_FLOOR),
        MeasurementClass::Temperature => value.clamp(TEMPERATURE_RANGE.0, TEMPERATURE_RANGE.1),
    }
}

/// Adds independent zero-mean Gaussian noise to the configured variables.
#[derive(Debug, Clone)]
pub struct PerturbationSampler {
    noise: Vec<(MeasuredVariable, Normal<FloatValue>)>,
}

impl PerturbationSampler {
    pub fn new(levels: &NoiseLevels) -> Result<Self> {
        levels.validate()?;
        let noise = levels
            .iter()
            .filter(|(_, sd)| *sd > 0.0)
            .map(|(variable, sd)| {
                Normal::new(0.0, sd)
                    .map(|d| (variable, d))
                    .map_err(|e| Error::InvalidConfiguration(format!("`{variable}`: {e}")))
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { noise })
    }

    /// Variables that receive noise, in configuration order
    pub fn perturbed_variables(&self) -> impl Iterator<Item = MeasuredVariable> + '_ {
        self.noise.iter().map(|(v, _)| *v)
    }

    /// Draw one perturbed copy of `measurements`.
    ///
    /// Each configured variable receives an independent draw in every period, followed by
    /// its class floor or clip. Unconfigured variables and the period index are copied.
    pub fn sample<R: Rng + ?Sized>(
        &self,
        measurements: &[MeasurementRecord],
        rng: &mut R,
    ) -> Vec<MeasurementRecord> {
        measurements
            .iter()
            .map(|record| {
                let mut perturbed = *record;
                for (variable, distribution) in &self.noise {
                    let value = record.get(*variable) + distribution.sample(rng);
                    perturbed.set(*variable, limit(*variable, value));
                }
                perturbed
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    fn measurements() -> Vec<MeasurementRecord> {
        (0..3)
            .map(|i| MeasurementRecord {
                period: i,
                foliage: 1.0,
                branch: 2.0,
                culm: 10.0,
                stump: 3.0,
                rhizome: 4.0,
                root: 5.0,
                litter_layer: 0.01,
                soil_carbon: 80.0,
                temperature: 58.0,
                undergrowth: 0.5,
            })
            .collect()
    }

    #[test]
    fn test_unconfigured_variables_pass_through() {
        let levels = NoiseLevels::new().with(MeasuredVariable::Culm, 0.5);
        let sampler = PerturbationSampler::new(&levels).unwrap();
        let mut rng = ChaCha8Rng::seed_from_u64(7);

        let original = measurements();
        let perturbed = sampler.sample(&original, &mut rng);
        for (p, o) in perturbed.iter().zip(&original) {
            assert_eq!(p.period, o.period);
            assert_eq!(p.foliage, o.foliage);
            assert_eq!(p.temperature, o.temperature);
        }
        assert!(perturbed.iter().any(|p| p.culm != 10.0));
    }

    #[test]
    fn test_zero_sd_is_identity() {
        let levels: NoiseLevels = MeasuredVariable::ALL.iter().map(|v| (*v, 0.0)).collect();
        assert!(levels.is_quiet());
        let sampler = PerturbationSampler::new(&levels).unwrap();
        assert_eq!(sampler.perturbed_variables().count(), 0);

        let mut rng = ChaCha8Rng::seed_from_u64(1);
        assert_eq!(sampler.sample(&measurements(), &mut rng), measurements());
    }

    #[test]
    fn test_floors_and_clips() {
        let levels = NoiseLevels::new()
            .with(MeasuredVariable::LitterLayer, 50.0)
            .with(MeasuredVariable::Temperature, 50.0)
            .with(MeasuredVariable::Undergrowth, 50.0);
        let sampler = PerturbationSampler::new(&levels).unwrap();
        let mut rng = ChaCha8Rng::seed_from_u64(3);

        for _ in 0..200 {
            for record in sampler.sample(&measurements(), &mut rng) {
                assert!(record.litter_layer >= DETRITAL_STOCK_FLOOR);
                assert!(record.undergrowth >= BIOMASS_FLOOR);
                assert!((-50.0..=60.0).contains(&record.temperature));
            }
        }
        assert_eq!(limit(MeasuredVariable::Root, -3.0), BIOMASS_FLOOR);
        assert_eq!(limit(MeasuredVariable::Temperature, 75.0), 60.0);
    }

    #[test]
    fn test_same_seed_same_draw() {
        let levels = NoiseLevels::new().with(MeasuredVariable::Foliage, 0.1);
        let sampler = PerturbationSampler::new(&levels).unwrap();
        let a = sampler.sample(&measurements(), &mut ChaCha8Rng::seed_from_u64(11));
        let b = sampler.sample(&measurements(), &mut ChaCha8Rng::seed_from_u64(11));
        assert_eq!(a, b);
    }

    #[test]
    fn test_invalid_sd_is_rejected() {
        for sd in [-1.0, FloatValue::NAN, FloatValue::INFINITY] {
            let levels = NoiseLevels::new().with(MeasuredVariable::Root, sd);
            assert!(matches!(
                PerturbationSampler::new(&levels),
                Err(Error::InvalidConfiguration(_))
            ));
        }
    }

    #[test]
    fn test_serializes_as_variable_map() {
        let levels = NoiseLevels::new()
            .with(MeasuredVariable::SoilCarbon, 2.0)
            .with(MeasuredVariable::Foliage, 0.1);
        let json = serde_json::to_string(&levels).unwrap();
        assert_eq!(json, r#"{"soil_carbon":2.0,"foliage":0.1}"#);
        let parsed: NoiseLevels = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, levels);
    }
}
