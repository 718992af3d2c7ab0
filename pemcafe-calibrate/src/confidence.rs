//! Per-variable, per-period uncertainty summaries of a Monte Carlo sample set.
//!
//! For every banded variable and every period the surviving draws give
//! - the sample mean and standard deviation (n - 1 denominator)
//! - a Student-t interval: $\bar{x} \pm t_{1-\alpha/2, n-1} \, s / \sqrt{n}$
//! - an empirical percentile interval at $\alpha/2$ and $1 - \alpha/2$, linearly
//!   interpolated between order statistics
//!
//! where $\alpha = 1 - \text{confidence level}$. Fewer than two samples give no band.

use crate::monte_carlo::SampleSet;
use crate::{Error, Result};
use indexmap::IndexMap;
use ndarray::{Array2, ArrayView1, Axis};
use pemcafe_core::{FloatValue, Variable};
use serde::{Deserialize, Serialize};
use statrs::distribution::{ContinuousCDF, StudentsT};

/// Minimum number of samples for a band
pub const MIN_SAMPLES: usize = 2;

/// Uncertainty summary of one variable at one period.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ConfidenceBand {
    pub mean: FloatValue,
    pub std_dev: FloatValue,
    /// Lower limit of the Student-t interval
    pub t_lower: FloatValue,
    /// Upper limit of the Student-t interval
    pub t_upper: FloatValue,
    /// Lower empirical percentile
    pub percentile_lower: FloatValue,
    /// Upper empirical percentile
    pub percentile_upper: FloatValue,
    /// Number of samples the band was computed from
    pub samples: usize,
}

impl ConfidenceBand {
    /// Column suffixes of [`ConfidenceBand::statistics`]
    pub const STATISTICS: [&'static str; 7] =
        ["mean", "sd", "t_lower", "t_upper", "p_lower", "p_upper", "n"];

    /// The band's values in [`ConfidenceBand::STATISTICS`] order
    pub fn statistics(&self) -> [FloatValue; 7] {
        [
            self.mean,
            self.std_dev,
            self.t_lower,
            self.t_upper,
            self.percentile_lower,
            self.percentile_upper,
            self.samples as FloatValue,
        ]
    }

    /// Summarise `values` at `confidence_level`; `None` with fewer than [`MIN_SAMPLES`].
    pub fn from_samples(
        values: ArrayView1<FloatValue>,
        confidence_level: FloatValue,
    ) -> Option<Self> {
        let n = values.len();
        if n < MIN_SAMPLES {
            return None;
        }
        let alpha = 1.0 - confidence_level;
        let mean = values.mean()?;
        let std_dev = values.std(1.0);

        let t = StudentsT::new(0.0, 1.0, (n - 1) as FloatValue)
            .ok()?
            .inverse_cdf(1.0 - alpha / 2.0);
        let half_width = t * std_dev / (n as FloatValue).sqrt();

        let mut sorted = values.to_vec();
        sorted.sort_by(|a, b| a.total_cmp(b));

        Some(Self {
            mean,
            std_dev,
            t_lower: mean - half_width,
            t_upper: mean + half_width,
            percentile_lower: percentile(&sorted, alpha / 2.0),
            percentile_upper: percentile(&sorted, 1.0 - alpha / 2.0),
            samples: n,
        })
    }

    /// Band with every statistic, the sample count included, forced to 0
    pub fn zeroed() -> Self {
        Self {
            mean: 0.0,
            std_dev: 0.0,
            t_lower: 0.0,
            t_upper: 0.0,
            percentile_lower: 0.0,
            percentile_upper: 0.0,
            samples: 0,
        }
    }
}

/// Linearly interpolated quantile `q` of already sorted, non-empty values
pub fn percentile(sorted: &[FloatValue], q: FloatValue) -> FloatValue {
    let position = q.clamp(0.0, 1.0) * (sorted.len() - 1) as FloatValue;
    let lower = position.floor() as usize;
    let upper = position.ceil() as usize;
    let fraction = position - lower as FloatValue;
    sorted[lower] + fraction * (sorted[upper] - sorted[lower])
}

/// Bands of every banded variable, one slot per period.
///
/// A slot is `None` when fewer than [`MIN_SAMPLES`] draws survived.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfidenceBands {
    confidence_level: FloatValue,
    periods: usize,
    bands: IndexMap<Variable, Vec<Option<ConfidenceBand>>>,
}

impl ConfidenceBands {
    pub fn confidence_level(&self) -> FloatValue {
        self.confidence_level
    }

    pub fn periods(&self) -> usize {
        self.periods
    }

    pub fn get(&self, variable: Variable, period: usize) -> Option<&ConfidenceBand> {
        self.bands.get(&variable)?.get(period)?.as_ref()
    }

    /// Every slot of one variable
    pub fn variable(&self, variable: Variable) -> Option<&[Option<ConfidenceBand>]> {
        self.bands.get(&variable).map(|v| v.as_slice())
    }

    pub fn iter(&self) -> impl Iterator<Item = (Variable, &[Option<ConfidenceBand>])> {
        self.bands.iter().map(|(k, v)| (*k, v.as_slice()))
    }

    /// Force every existing band of a flux variable to [`ConfidenceBand::zeroed`] at `period`.
    ///
    /// Missing bands stay missing.
    pub fn zero_fluxes_at(&mut self, period: usize) {
        for (variable, slots) in self.bands.iter_mut() {
            if !variable.is_flux() {
                continue;
            }
            if let Some(slot) = slots.get_mut(period) {
                if let Some(band) = slot.as_mut() {
                    *band = ConfidenceBand::zeroed();
                }
            }
        }
    }
}

/// Reduces a [`SampleSet`] to [`ConfidenceBands`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ConfidenceIntervalEstimator {
    confidence_level: FloatValue,
}

impl ConfidenceIntervalEstimator {
    pub fn new(confidence_level: FloatValue) -> Result<Self> {
        if !(confidence_level > 0.0 && confidence_level < 1.0) {
            return Err(Error::InvalidConfiguration(format!(
                "confidence_level must lie in (0, 1), got {confidence_level}"
            )));
        }
        Ok(Self { confidence_level })
    }

    pub fn confidence_level(&self) -> FloatValue {
        self.confidence_level
    }

    pub fn estimate(&self, samples: &SampleSet) -> ConfidenceBands {
        let periods = samples.periods();
        let draws = samples.series();

        let bands = Variable::banded()
            .map(|variable| {
                // Rows are draws, columns are periods
                let values = Array2::from_shape_fn((draws.len(), periods), |(d, p)| {
                    draws[d]
                        .get(p)
                        .map(|r| r.value(variable))
                        .unwrap_or(FloatValue::NAN)
                });
                let slots = values
                    .axis_iter(Axis(1))
                    .map(|column| ConfidenceBand::from_samples(column, self.confidence_level))
                    .collect();
                (variable, slots)
            })
            .collect();

        ConfidenceBands {
            confidence_level: self.confidence_level,
            periods,
            bands,
        }
    }
}
