//! Per-period carbon-pool state transitions
//!
//! Maps the current [`MeasurementRecord`] and the previous period's [`DerivedRecord`]
//! onto the current period's full derived state. The engine has no hidden state; the
//! previous record is the only memory carried between periods.
//!
//! # Algorithm
//!
//! For each period:
//!
//! 1. Above-ground net production is the difference of measured masses.
//! 2. Below-ground net production follows allometric relations:
//!    $$\Delta St = 0.1955 \, \Delta C, \quad \Delta Rh = 1.1162 \, |\Delta L|^{0.7279}, \quad \Delta Ro = 0.9847 \, \Delta Rh$$
//! 3. Below-ground stocks integrate their net production forward.
//! 4. Turnover is the previous mass times the pool turnover rate.
//!    $$\text{ANPP} = \sum \Delta_{above} + \text{litterfall}$$
//! 5. BNPP closes with either the detritus flux or the soil autotrophic respiration.
//! 6. Soil heterotrophic respiration is a power law of clamped ANPP:
//!    $$R_{h,soil} = 0.0071 \, \mathrm{clamp}(\text{ANPP}, 4.17, 11.8)^{3.0772}$$
//! 7. Autotrophic respiration per pool scales with $e^{0.07918 T}$.
//! 8. The litter layer and soil carbon pools are updated and three independent
//!    NEP estimates are formed.

use crate::measurement::MeasurementRecord;
use crate::numerics::{is_near_zero, safe_div, safe_exp, safe_powf};
use crate::parameters::{BnppMethod, ModelConfig, ParameterVector};
use crate::record::DerivedRecord;
use crate::FloatValue;
use serde::{Deserialize, Serialize};

/// Stump net production per unit culm net production
pub const STUMP_PER_CULM: FloatValue = 0.1955;
/// Coefficient of the rhizome allometry
pub const RHIZOME_COEFFICIENT: FloatValue = 1.1162;
/// Exponent of the rhizome allometry
pub const RHIZOME_EXPONENT: FloatValue = 0.7279;
/// Root net production per unit rhizome net production
pub const ROOT_PER_RHIZOME: FloatValue = 0.9847;

/// ANPP range over which the soil respiration regression was fitted
pub const SOIL_HR_ANPP_RANGE: (FloatValue, FloatValue) = (4.17, 11.8);
const SOIL_HR_COEFFICIENT: FloatValue = 0.0071;
const SOIL_HR_EXPONENT: FloatValue = 3.0772;

const SOIL_AR_COEFFICIENT: FloatValue = 0.000_006;
const SOIL_AR_EXPONENT: FloatValue = 3.3249;

/// Respiration rate at 0 °C
/// unit: mg CO2 / g dry mass / h
const RESPIRATION_RATE_0C: FloatValue = 0.1445;
/// Temperature sensitivity of respiration
/// unit: 1 / °C
const RESPIRATION_TEMPERATURE_SENSITIVITY: FloatValue = 0.079_18;
const HOURS_PER_YEAR: FloatValue = 365.0 * 24.0;
const CARBON_PER_CO2: FloatValue = 12.0 / 44.01;
/// Allocation weight of foliage, which every other pool is normalised against
const FOLIAGE_ALLOCATION: FloatValue = 1.172;

/// A living pool that respires
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RespiringPool {
    Foliage,
    Branch,
    Culm,
    Root,
    Rhizome,
    Stump,
}

impl RespiringPool {
    /// Relative allocation weight of the pool
    pub fn allocation(self) -> FloatValue {
        match self {
            RespiringPool::Foliage => 1.172,
            RespiringPool::Branch => 0.215,
            RespiringPool::Culm => 0.085,
            RespiringPool::Root => 0.088,
            RespiringPool::Rhizome => 0.179,
            RespiringPool::Stump => 0.085,
        }
    }

    /// Carbon content of the pool's dry matter
    pub fn carbon_fraction(self) -> FloatValue {
        match self {
            RespiringPool::Foliage => 0.4544,
            RespiringPool::Branch => 0.4815,
            RespiringPool::Culm => 0.4628,
            RespiringPool::Root => 0.4487,
            RespiringPool::Rhizome => 0.4354,
            RespiringPool::Stump => 0.4628,
        }
    }
}

/// Rhizome net production from foliage net production.
///
/// 0 when foliage net production is exactly 0.
pub fn rhizome_net_production(leaf_net_production: FloatValue) -> FloatValue {
    if leaf_net_production == 0.0 {
        return 0.0;
    }
    RHIZOME_COEFFICIENT * safe_powf(leaf_net_production.abs(), RHIZOME_EXPONENT)
}

/// Soil heterotrophic respiration from above-ground NPP.
///
/// ANPP is clamped to [`SOIL_HR_ANPP_RANGE`] before the power law is applied, so the
/// result is constant outside that range. 0 when ANPP is exactly 0.
pub fn soil_heterotrophic_respiration(anpp: FloatValue) -> FloatValue {
    if anpp == 0.0 {
        return 0.0;
    }
    let (low, high) = SOIL_HR_ANPP_RANGE;
    SOIL_HR_COEFFICIENT * safe_powf(anpp.clamp(low, high), SOIL_HR_EXPONENT)
}

/// Soil autotrophic respiration from below-ground carbon
pub fn soil_autotrophic_respiration(belowground_carbon: FloatValue) -> FloatValue {
    SOIL_AR_COEFFICIENT * safe_powf(belowground_carbon, SOIL_AR_EXPONENT)
}

/// Autotrophic respiration of one pool over a year.
///
/// The temperature response is converted from mg CO2 per g dry mass per hour to
/// carbon mass per year, then weighted by the pool's allocation.
pub fn autotrophic_respiration(
    pool: RespiringPool,
    mass: FloatValue,
    temperature: FloatValue,
) -> FloatValue {
    let rate = RESPIRATION_RATE_0C * safe_exp(RESPIRATION_TEMPERATURE_SENSITIVITY * temperature);
    let dry_mass_g = safe_div(mass, pool.carbon_fraction()) * 1_000_000.0;
    let co2_t = rate * HOURS_PER_YEAR * dry_mass_g / 1000.0 / 1000.0 / 1000.0;
    let respiration = pool.allocation() / FOLIAGE_ALLOCATION * co2_t * CARBON_PER_CO2;
    if respiration.is_finite() {
        respiration
    } else {
        0.0
    }
}

/// Pure, deterministic state-transition function for one period.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StateTransitionEngine {
    parameters: ParameterVector,
    config: ModelConfig,
}

impl StateTransitionEngine {
    pub fn new(parameters: ParameterVector, config: ModelConfig) -> Self {
        Self { parameters, config }
    }

    /// Create an engine with the default [`ModelConfig`]
    pub fn from_parameters(parameters: ParameterVector) -> Self {
        Self::new(parameters, ModelConfig::default())
    }

    pub fn parameters(&self) -> &ParameterVector {
        &self.parameters
    }

    pub fn config(&self) -> &ModelConfig {
        &self.config
    }

    /// Compute one period's derived state.
    ///
    /// `previous` is `None` for the first period, in which case stocks are taken from
    /// the measurement and differences and turnover are 0.
    pub fn step(
        &self,
        current: &MeasurementRecord,
        previous: Option<&DerivedRecord>,
    ) -> DerivedRecord {
        let p = &self.parameters;
        let temperature = current.temperature;

        let mut r = DerivedRecord {
            period: current.period,
            temperature,
            undergrowth: current.undergrowth,
            foliage: current.foliage,
            branch: current.branch,
            culm: current.culm,
            ..Default::default()
        };

        // Above-ground net production
        if let Some(prev) = previous {
            r.leaf_net_production = current.foliage - prev.foliage;
            r.branch_net_production = current.branch - prev.branch;
            r.culm_net_production = current.culm - prev.culm;
        }
        r.aboveground_carbon = current.foliage + current.branch + current.culm;

        // Below-ground net production and stocks
        r.stump_net_production = STUMP_PER_CULM * r.culm_net_production;
        r.rhizome_net_production = rhizome_net_production(r.leaf_net_production);
        r.root_net_production = ROOT_PER_RHIZOME * r.rhizome_net_production;

        match previous {
            None => {
                r.stump = current.stump;
                r.rhizome = current.rhizome;
                r.root = current.root;
            }
            Some(prev) => {
                r.stump = prev.stump + r.stump_net_production;
                r.rhizome = prev.rhizome + r.rhizome_net_production;
                r.root = prev.root + r.root_net_production;
            }
        }
        r.belowground_carbon = r.stump + r.rhizome + r.root;
        r.root_shoot_ratio = safe_div(r.belowground_carbon, r.aboveground_carbon);
        r.total_biomass_carbon = r.aboveground_carbon + r.belowground_carbon;

        // Turnover and litterfall
        if let Some(prev) = previous {
            r.leaf_turnover = prev.foliage * p.leaf_turnover_rate;
            r.branch_turnover = prev.branch * p.branch_turnover_rate;
            r.culm_turnover = prev.culm * p.culm_turnover_rate;
            r.stump_turnover = prev.stump * p.stump_turnover_rate;
            r.rhizome_turnover = prev.rhizome * p.rhizome_turnover_rate;
            r.root_turnover = prev.root * p.root_turnover_rate;
        }
        r.litterfall = r.leaf_turnover + r.branch_turnover;
        if !self.config.harvesting {
            r.litterfall += r.culm_turnover;
        }
        r.anpp = r.leaf_net_production
            + r.branch_net_production
            + r.culm_net_production
            + r.litterfall;
        r.belowground_detritus = r.stump_turnover + r.rhizome_turnover + r.root_turnover;

        // Autotrophic respiration. Soil AR is needed by the second BNPP method, so it is
        // computed before BNPP within the same period.
        r.foliage_ar =
            autotrophic_respiration(RespiringPool::Foliage, current.foliage, temperature);
        r.branch_ar = autotrophic_respiration(RespiringPool::Branch, current.branch, temperature);
        r.culm_ar = autotrophic_respiration(RespiringPool::Culm, current.culm, temperature);
        r.aboveground_ar = r.foliage_ar + r.branch_ar + r.culm_ar;

        let root_term = autotrophic_respiration(RespiringPool::Root, r.root, temperature);
        let rhizome_term = autotrophic_respiration(RespiringPool::Rhizome, r.rhizome, temperature);
        let stump_term = autotrophic_respiration(RespiringPool::Stump, r.stump, temperature);
        let belowground_term = root_term + rhizome_term + stump_term;
        if !is_near_zero(belowground_term) {
            r.root_ar_ratio = safe_div(root_term, belowground_term);
            r.rhizome_ar_ratio = safe_div(rhizome_term, belowground_term);
            r.stump_ar_ratio = safe_div(stump_term, belowground_term);
        }
        r.soil_ar = soil_autotrophic_respiration(r.belowground_carbon);
        r.root_ar = r.soil_ar * r.root_ar_ratio;
        r.rhizome_ar = r.soil_ar * r.rhizome_ar_ratio;
        r.stump_ar = r.soil_ar * r.stump_ar_ratio;

        // NPP and soil heterotrophic respiration
        let belowground_net_production =
            r.stump_net_production + r.rhizome_net_production + r.root_net_production;
        r.bnpp = belowground_net_production
            + match self.config.bnpp_method {
                BnppMethod::DetritusFlux => r.belowground_detritus,
                BnppMethod::SoilAutotrophicRespiration => r.soil_ar,
            };
        r.tnpp = r.anpp + r.bnpp;
        r.soil_hr = soil_heterotrophic_respiration(r.anpp);

        r.ar = r.aboveground_ar + r.soil_ar;
        r.soil_respiration = r.soil_ar + r.soil_hr;
        let no_production = is_near_zero(r.tnpp);
        r.nep_before_litter = if no_production {
            0.0
        } else {
            r.tnpp - r.soil_hr
        };

        // Litter layer
        r.litter_layer = match previous {
            None => current.litter_layer,
            Some(prev) => (prev.litter_layer + r.litterfall) * p.litter_decomposition_rate,
        };
        r.litter_decay = r.litter_layer * p.litter_decomposition_rate;
        r.litter_hr = r.litter_layer * p.litter_respiration_fraction;
        r.hr = r.soil_hr + r.litter_hr;
        r.nep = if no_production {
            0.0
        } else {
            r.nep_before_litter - r.litter_hr
        };

        // Soil carbon and whole-ecosystem balance
        match previous {
            None => r.soil_carbon = current.soil_carbon,
            Some(prev) => {
                r.soil_carbon =
                    prev.soil_carbon + r.belowground_detritus - r.soil_hr + r.litter_decay;
                r.soil_carbon_change = r.soil_carbon - prev.soil_carbon;
            }
        }
        r.total_ecosystem_carbon = r.aboveground_carbon
            + r.belowground_carbon
            + r.litter_layer
            + r.soil_carbon
            + current.undergrowth;
        if let Some(prev) = previous {
            r.nep_stock_difference = r.total_ecosystem_carbon - prev.total_ecosystem_carbon;
        }

        r.gpp = r.tnpp + r.ar;
        r
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::Variable;

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
            temperature: 15.0,
            undergrowth: 0.5,
        }
    }

    fn default_engine() -> StateTransitionEngine {
        StateTransitionEngine::from_parameters(ParameterVector::default())
    }

    #[test]
    fn test_first_period_takes_measured_stocks() {
        let m = measurement(0, 1.0, 10.0);
        let r = default_engine().step(&m, None);

        assert_eq!(r.stump, m.stump);
        assert_eq!(r.rhizome, m.rhizome);
        assert_eq!(r.root, m.root);
        assert_eq!(r.litter_layer, m.litter_layer);
        assert_eq!(r.soil_carbon, m.soil_carbon);
        assert_eq!(r.leaf_net_production, 0.0);
        assert_eq!(r.litterfall, 0.0);
        assert_eq!(r.anpp, 0.0);
        assert_eq!(r.soil_hr, 0.0);
        assert_eq!(r.nep, 0.0);
        assert_eq!(r.nep_stock_difference, 0.0);
        // Respiration is still computed from the measured masses
        assert!(r.foliage_ar > 0.0);
    }

    #[test]
    fn test_stocks_integrate_net_production() {
        let engine = default_engine();
        let first = engine.step(&measurement(0, 1.0, 10.0), None);
        let second = engine.step(&measurement(1, 1.4, 10.8), Some(&first));

        assert!((second.stump - (first.stump + second.stump_net_production)).abs() < 1e-12);
        assert!((second.rhizome - (first.rhizome + second.rhizome_net_production)).abs() < 1e-12);
        assert!((second.root - (first.root + second.root_net_production)).abs() < 1e-12);
        assert!((second.stump_net_production - 0.1955 * 0.8).abs() < 1e-12);
    }

    #[test]
    fn test_rhizome_uses_magnitude_of_leaf_change() {
        let grow = rhizome_net_production(0.5);
        let shrink = rhizome_net_production(-0.5);
        assert!(grow > 0.0);
        assert_eq!(grow, shrink);
        assert_eq!(rhizome_net_production(0.0), 0.0);
    }

    #[test]
    fn test_harvesting_excludes_culm_turnover() {
        let first = default_engine().step(&measurement(0, 1.0, 10.0), None);
        let m = measurement(1, 1.0, 10.0);

        let unharvested = default_engine().step(&m, Some(&first));
        let harvested = StateTransitionEngine::new(
            ParameterVector::default(),
            ModelConfig {
                harvesting: true,
                ..Default::default()
            },
        )
        .step(&m, Some(&first));

        assert!(
            (unharvested.litterfall - harvested.litterfall - unharvested.culm_turnover).abs()
                < 1e-12
        );
        assert_eq!(harvested.culm_turnover, unharvested.culm_turnover);
    }

    #[test]
    fn test_bnpp_methods() {
        let first = default_engine().step(&measurement(0, 1.0, 10.0), None);
        let m = measurement(1, 1.3, 10.4);

        let detritus = default_engine().step(&m, Some(&first));
        let soil_ar = StateTransitionEngine::new(
            ParameterVector::default(),
            ModelConfig {
                bnpp_method: BnppMethod::SoilAutotrophicRespiration,
                ..Default::default()
            },
        )
        .step(&m, Some(&first));

        let net = detritus.stump_net_production
            + detritus.rhizome_net_production
            + detritus.root_net_production;
        assert!((detritus.bnpp - (net + detritus.belowground_detritus)).abs() < 1e-12);
        assert!((soil_ar.bnpp - (net + soil_ar.soil_ar)).abs() < 1e-12);
        // Same-period soil AR is used
        assert_eq!(soil_ar.soil_ar, detritus.soil_ar);
    }

    #[test]
    fn test_soil_hr_clamped_outside_fitted_range() {
        let low = soil_heterotrophic_respiration(1.0);
        assert_eq!(low, soil_heterotrophic_respiration(4.17));
        let high = soil_heterotrophic_respiration(50.0);
        assert_eq!(high, soil_heterotrophic_respiration(11.8));
        assert_eq!(soil_heterotrophic_respiration(-3.0), low);
        assert_eq!(soil_heterotrophic_respiration(0.0), 0.0);

        let mut previous = soil_heterotrophic_respiration(4.17);
        let mut anpp = 4.17;
        while anpp <= 11.8 {
            let value = soil_heterotrophic_respiration(anpp);
            assert!(value >= previous);
            previous = value;
            anpp += 0.1;
        }
    }

    #[test]
    fn test_ratios_are_bounded() {
        let first = default_engine().step(&measurement(0, 1.0, 10.0), None);
        let sum = first.root_ar_ratio + first.rhizome_ar_ratio + first.stump_ar_ratio;
        assert!((sum - 1.0).abs() < 1e-12);
        for ratio in [
            first.root_ar_ratio,
            first.rhizome_ar_ratio,
            first.stump_ar_ratio,
        ] {
            assert!((0.0..=1.0).contains(&ratio));
        }
        assert!((first.root_shoot_ratio - 12.0 / 13.0).abs() < 1e-12);
    }

    #[test]
    fn test_zero_denominators_give_zero_not_nan() {
        let m = MeasurementRecord {
            period: 0,
            foliage: 0.0,
            branch: 0.0,
            culm: 0.0,
            stump: 0.0,
            rhizome: 0.0,
            root: 0.0,
            litter_layer: 0.0,
            soil_carbon: 0.0,
            temperature: 20.0,
            undergrowth: 0.0,
        };
        let r = default_engine().step(&m, None);
        assert_eq!(r.root_shoot_ratio, 0.0);
        assert_eq!(r.root_ar_ratio, 0.0);
        assert_eq!(r.rhizome_ar_ratio, 0.0);
        assert_eq!(r.stump_ar_ratio, 0.0);
        assert_eq!(r.first_non_finite(), None);
    }

    #[test]
    fn test_extreme_temperature_stays_finite() {
        let mut m = measurement(0, 1.0, 10.0);
        m.temperature = 1.0e5;
        let r = default_engine().step(&m, None);
        assert_eq!(r.foliage_ar, 0.0);
        assert!(Variable::ALL.iter().all(|v| r.value(*v).is_finite()));
    }

    #[test]
    fn test_gpp_is_npp_plus_ar() {
        let engine = default_engine();
        let first = engine.step(&measurement(0, 1.0, 10.0), None);
        let second = engine.step(&measurement(1, 1.2, 10.3), Some(&first));
        assert!((second.gpp - (second.tnpp + second.ar)).abs() < 1e-12);
        assert!((second.hr - (second.soil_hr + second.litter_hr)).abs() < 1e-12);
        assert!((second.nep - (second.nep_before_litter - second.litter_hr)).abs() < 1e-12);
    }
}
