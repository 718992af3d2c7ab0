//! Calibrated model parameters, their bounds and the model's mode switches.

use crate::errors::{PemcafeError, PemcafeResult};
use crate::FloatValue;
use serde::{Deserialize, Serialize};

/// Number of scalars in a [`ParameterVector`].
pub const PARAMETER_COUNT: usize = 8;

/// The eight calibrated rates of the carbon-pool model.
///
/// Turnover rates are the fraction of a live pool's mass transferred to the dead pools
/// per period. Invariants (checked by [`ParameterVector::validate`]):
/// - every rate is finite and non-negative
/// - `litter_respiration_fraction` lies in [0, 1]
/// - leaf > branch > culm turnover
/// - root > rhizome turnover
///
/// Missing fields deserialize to their defaults.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ParameterVector {
    /// Decomposition rate of the litter layer
    /// unit: 1 / period
    /// default: 0.32
    pub litter_decomposition_rate: FloatValue,
    /// Foliage turnover rate
    /// default: 0.63
    pub leaf_turnover_rate: FloatValue,
    /// Branch turnover rate
    /// default: 0.21
    pub branch_turnover_rate: FloatValue,
    /// Culm turnover rate
    /// default: 0.18
    pub culm_turnover_rate: FloatValue,
    /// Stump turnover rate
    /// default: 0.18
    pub stump_turnover_rate: FloatValue,
    /// Rhizome turnover rate
    /// default: 0.9 / 8.1
    pub rhizome_turnover_rate: FloatValue,
    /// Root turnover rate
    /// default: 3.10 / 8.40
    pub root_turnover_rate: FloatValue,
    /// Fraction of the litter layer respired per period
    /// unit: dimensionless, in [0, 1]
    /// default: 0.7111
    pub litter_respiration_fraction: FloatValue,
}

impl Default for ParameterVector {
    fn default() -> Self {
        Self {
            litter_decomposition_rate: 0.32,
            leaf_turnover_rate: 0.63,
            branch_turnover_rate: 0.21,
            culm_turnover_rate: 0.18,
            stump_turnover_rate: 0.18,
            rhizome_turnover_rate: 0.9 / 8.1,
            root_turnover_rate: 3.10 / 8.40,
            litter_respiration_fraction: 3.875_619_685_696_48
                / (1.574_162_555_555_56 + 3.875_619_685_696_48),
        }
    }
}

impl ParameterVector {
    /// Parameter names in vector order
    pub const NAMES: [&'static str; PARAMETER_COUNT] = [
        "litter_decomposition_rate",
        "leaf_turnover_rate",
        "branch_turnover_rate",
        "culm_turnover_rate",
        "stump_turnover_rate",
        "rhizome_turnover_rate",
        "root_turnover_rate",
        "litter_respiration_fraction",
    ];

    /// Flatten into the order used by the optimizers
    pub fn to_array(&self) -> [FloatValue; PARAMETER_COUNT] {
        [
            self.litter_decomposition_rate,
            self.leaf_turnover_rate,
            self.branch_turnover_rate,
            self.culm_turnover_rate,
            self.stump_turnover_rate,
            self.rhizome_turnover_rate,
            self.root_turnover_rate,
            self.litter_respiration_fraction,
        ]
    }

    /// Build from a slice in [`ParameterVector::NAMES`] order.
    ///
    /// Only the length is checked; use [`ParameterVector::validate`] for the invariants.
    pub fn from_slice(values: &[FloatValue]) -> PemcafeResult<Self> {
        if values.len() != PARAMETER_COUNT {
            return Err(PemcafeError::InvalidParameter(format!(
                "expected {PARAMETER_COUNT} parameter values, got {}",
                values.len()
            )));
        }
        Ok(Self {
            litter_decomposition_rate: values[0],
            leaf_turnover_rate: values[1],
            branch_turnover_rate: values[2],
            culm_turnover_rate: values[3],
            stump_turnover_rate: values[4],
            rhizome_turnover_rate: values[5],
            root_turnover_rate: values[6],
            litter_respiration_fraction: values[7],
        })
    }

    /// Slack of the three ordering constraints.
    ///
    /// `[leaf - branch, branch - culm, root - rhizome]`; every entry must be strictly
    /// positive for the ordering to hold.
    pub fn ordering_margins(&self) -> [FloatValue; 3] {
        [
            self.leaf_turnover_rate - self.branch_turnover_rate,
            self.branch_turnover_rate - self.culm_turnover_rate,
            self.root_turnover_rate - self.rhizome_turnover_rate,
        ]
    }

    /// True if leaf > branch > culm and root > rhizome turnover
    pub fn satisfies_ordering(&self) -> bool {
        self.ordering_margins().iter().all(|m| *m > 0.0)
    }

    /// Check the sign and range invariants, ignoring the ordering constraints.
    pub fn validate_ranges(&self) -> PemcafeResult<()> {
        for (name, value) in Self::NAMES.iter().zip(self.to_array()) {
            if !value.is_finite() || value < 0.0 {
                return Err(PemcafeError::InvalidParameter(format!(
                    "`{name}` must be finite and non-negative, got {value}"
                )));
            }
        }
        if self.litter_respiration_fraction > 1.0 {
            return Err(PemcafeError::InvalidParameter(format!(
                "`litter_respiration_fraction` must lie in [0, 1], got {}",
                self.litter_respiration_fraction
            )));
        }
        Ok(())
    }

    /// Check every invariant of the parameter vector.
    pub fn validate(&self) -> PemcafeResult<()> {
        self.validate_ranges()?;
        if !self.satisfies_ordering() {
            return Err(PemcafeError::InvalidParameter(format!(
                "turnover rates must satisfy leaf > branch > culm and root > rhizome \
                 (leaf={}, branch={}, culm={}, root={}, rhizome={})",
                self.leaf_turnover_rate,
                self.branch_turnover_rate,
                self.culm_turnover_rate,
                self.root_turnover_rate,
                self.rhizome_turnover_rate
            )));
        }
        Ok(())
    }
}

/// Closed interval for one parameter. A missing upper limit is unbounded.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bound {
    pub lower: FloatValue,
    #[serde(default)]
    pub upper: Option<FloatValue>,
}

impl Bound {
    pub fn new(lower: FloatValue, upper: Option<FloatValue>) -> Self {
        Self { lower, upper }
    }

    /// `[0, ∞)`
    pub fn non_negative() -> Self {
        Self::new(0.0, None)
    }

    /// `[0, 1]`
    pub fn unit_interval() -> Self {
        Self::new(0.0, Some(1.0))
    }

    pub fn upper_or_infinity(&self) -> FloatValue {
        self.upper.unwrap_or(FloatValue::INFINITY)
    }

    /// Project a value onto the interval
    pub fn clamp(&self, value: FloatValue) -> FloatValue {
        value.max(self.lower).min(self.upper_or_infinity())
    }

    pub fn contains(&self, value: FloatValue) -> bool {
        value >= self.lower && value <= self.upper_or_infinity()
    }
}

/// Per-parameter search bounds, in [`ParameterVector::NAMES`] order.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ParameterBounds(pub [Bound; PARAMETER_COUNT]);

impl Default for ParameterBounds {
    fn default() -> Self {
        let mut bounds = [Bound::non_negative(); PARAMETER_COUNT];
        bounds[PARAMETER_COUNT - 1] = Bound::unit_interval();
        Self(bounds)
    }
}

impl ParameterBounds {
    pub fn iter(&self) -> impl Iterator<Item = &Bound> {
        self.0.iter()
    }

    /// Project every coordinate onto its bound
    pub fn project(&self, values: &[FloatValue]) -> Vec<FloatValue> {
        values
            .iter()
            .zip(self.0.iter())
            .map(|(v, b)| b.clamp(*v))
            .collect()
    }

    pub fn contains(&self, parameters: &ParameterVector) -> bool {
        parameters
            .to_array()
            .iter()
            .zip(self.0.iter())
            .all(|(v, b)| b.contains(*v))
    }

    /// Bounds must be finite below, ordered and inside the parameter domain.
    ///
    /// The respiration fraction needs an upper bound of at most 1, so every projected
    /// point satisfies [`ParameterVector::validate_ranges`].
    pub fn validate(&self) -> PemcafeResult<()> {
        for (name, bound) in ParameterVector::NAMES.iter().zip(self.0.iter()) {
            if !bound.lower.is_finite() || bound.lower < 0.0 {
                return Err(PemcafeError::InvalidConfiguration(format!(
                    "lower bound of `{name}` must be finite and non-negative, got {}",
                    bound.lower
                )));
            }
            if let Some(upper) = bound.upper {
                if upper.is_nan() || upper < bound.lower {
                    return Err(PemcafeError::InvalidConfiguration(format!(
                        "upper bound of `{name}` ({upper}) is below its lower bound ({})",
                        bound.lower
                    )));
                }
            }
        }
        let fraction = self.0[PARAMETER_COUNT - 1];
        if !fraction.upper.is_some_and(|upper| upper <= 1.0) {
            return Err(PemcafeError::InvalidConfiguration(format!(
                "bounds of `litter_respiration_fraction` must lie within [0, 1], got [{}, {}]",
                fraction.lower,
                fraction.upper_or_infinity()
            )));
        }
        Ok(())
    }
}

/// How below-ground NPP is closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BnppMethod {
    /// Below-ground net production plus below-ground detritus flux
    #[default]
    DetritusFlux,
    /// Below-ground net production plus soil autotrophic respiration
    SoilAutotrophicRespiration,
}

/// Mode switches threaded through the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    /// Culms are harvested, so culm turnover does not reach the litter layer
    pub harvesting: bool,
    pub bnpp_method: BnppMethod,
}
