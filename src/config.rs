//! Validated run configuration, read from TOML.
//!
//! Every section is optional. A minimal file only names what differs from the defaults:
//!
//! ```toml
//! [model]
//! harvesting = true
//! bnpp_method = "soil_autotrophic_respiration"
//!
//! [parameters]
//! leaf_turnover_rate = 0.7
//!
//! [bounds]
//! litter_respiration_fraction = { lower = 0.2, upper = 0.9 }
//!
//! [calibration]
//! solver = "compass_search"
//!
//! [monte_carlo]
//! draws = 500
//! seed = 42
//!
//! [monte_carlo.noise]
//! foliage = 0.05
//! soil_carbon = 2.0
//! ```

use crate::{Error, Result};
use pemcafe_calibrate::{MonteCarloOptions, SolverOptions};
use pemcafe_core::{Bound, ModelConfig, ParameterBounds, ParameterVector, PemcafeError};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Raw shape of the configuration file
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct RawConfig {
    model: ModelConfig,
    parameters: ParameterVector,
    /// Bound overrides keyed by parameter name
    bounds: BTreeMap<String, Bound>,
    calibration: SolverOptions,
    monte_carlo: MonteCarloOptions,
}

/// Everything needed to calibrate, run and propagate uncertainty.
///
/// Constructed once through [`PemcafeConfig::from_toml_str`] or
/// [`PemcafeConfig::new`], both of which validate every section.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PemcafeConfig {
    model: ModelConfig,
    parameters: ParameterVector,
    bounds: ParameterBounds,
    calibration: SolverOptions,
    monte_carlo: MonteCarloOptions,
}

impl PemcafeConfig {
    pub fn new(
        model: ModelConfig,
        parameters: ParameterVector,
        bounds: ParameterBounds,
        calibration: SolverOptions,
        monte_carlo: MonteCarloOptions,
    ) -> Result<Self> {
        let config = Self {
            model,
            parameters,
            bounds,
            calibration,
            monte_carlo,
        };
        config.validate()?;
        Ok(config)
    }

    /// Parse and validate a TOML document
    pub fn from_toml_str(document: &str) -> Result<Self> {
        let raw: RawConfig = toml::from_str(document)?;
        let bounds = bounds_from_overrides(&raw.bounds)?;
        Self::new(
            raw.model,
            raw.parameters,
            bounds,
            raw.calibration,
            raw.monte_carlo,
        )
    }

    fn validate(&self) -> Result<()> {
        self.parameters.validate_ranges()?;
        self.bounds.validate()?;
        self.calibration.validate()?;
        self.monte_carlo.validate()?;
        Ok(())
    }

    pub fn model(&self) -> &ModelConfig {
        &self.model
    }

    /// Starting point of the calibration
    pub fn parameters(&self) -> &ParameterVector {
        &self.parameters
    }

    pub fn bounds(&self) -> &ParameterBounds {
        &self.bounds
    }

    pub fn calibration(&self) -> &SolverOptions {
        &self.calibration
    }

    pub fn monte_carlo(&self) -> &MonteCarloOptions {
        &self.monte_carlo
    }
}

fn bounds_from_overrides(overrides: &BTreeMap<String, Bound>) -> Result<ParameterBounds> {
    let mut bounds = ParameterBounds::default();
    for (name, bound) in overrides {
        let index = ParameterVector::NAMES
            .iter()
            .position(|n| n == name)
            .ok_or_else(|| {
                Error::from(PemcafeError::InvalidConfiguration(format!(
                    "unknown parameter `{name}` in [bounds]"
                )))
            })?;
        bounds.0[index] = *bound;
    }
    Ok(bounds)
}
