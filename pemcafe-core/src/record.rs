//! The per-period derived state and the catalogue of its variables.
//!
//! [`DerivedRecord`] and [`Variable`] are generated from one table so that every
//! field has exactly one variable, one output name and one [`VariableKind`].

use crate::FloatValue;
use serde::{Deserialize, Serialize};
use std::fmt;

/// How a variable behaves at the first period and in the uncertainty summaries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum VariableKind {
    /// Copied from the measurement (no confidence band is produced)
    PassThrough,
    /// Stock, mass or ratio describing the state at the end of the period
    State,
    /// Production, turnover, respiration or increment over the period.
    /// Forced to exactly 0 at the first period.
    Flux,
}

macro_rules! define_derived_record {
    (
        $(
            $(#[doc = $doc:literal])*
            $field:ident => $variant:ident : $kind:ident,
        )*
    ) => {
        /// A variable of the [`DerivedRecord`]
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(rename_all = "snake_case")]
        pub enum Variable {
            $(
                $(#[doc = $doc])*
                $variant,
            )*
        }

        impl Variable {
            /// Every variable in output-column order
            pub const ALL: &'static [Variable] = &[$(Variable::$variant,)*];

            /// Output column name
            pub fn name(self) -> &'static str {
                match self {
                    $(Variable::$variant => stringify!($field),)*
                }
            }

            pub fn kind(self) -> VariableKind {
                match self {
                    $(Variable::$variant => VariableKind::$kind,)*
                }
            }
        }

        /// One period's full computed state.
        ///
        /// Produced by [`crate::engine::StateTransitionEngine::step`] from the current
        /// measurement and the previous period's record.
        #[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
        pub struct DerivedRecord {
            /// Period index copied from the measurement
            pub period: u32,
            $(
                $(#[doc = $doc])*
                pub $field: FloatValue,
            )*
        }

        impl DerivedRecord {
            /// Get the value of a variable
            pub fn value(&self, variable: Variable) -> FloatValue {
                match variable {
                    $(Variable::$variant => self.$field,)*
                }
            }

            /// Mutable access to the value of a variable
            pub fn value_mut(&mut self, variable: Variable) -> &mut FloatValue {
                match variable {
                    $(Variable::$variant => &mut self.$field,)*
                }
            }
        }
    };
}

define_derived_record! {
    /// Mean temperature (°C)
    temperature => Temperature: PassThrough,
    /// Measured undergrowth mass
    undergrowth => Undergrowth: PassThrough,

    /// Measured foliage mass
    foliage => Foliage: State,
    /// Measured branch mass
    branch => Branch: State,
    /// Measured culm mass
    culm => Culm: State,
    /// Foliage net production (mass difference)
    leaf_net_production => LeafNetProduction: Flux,
    /// Branch net production
    branch_net_production => BranchNetProduction: Flux,
    /// Culm net production
    culm_net_production => CulmNetProduction: Flux,
    /// Above-ground carbon, AGC
    aboveground_carbon => AbovegroundCarbon: State,

    /// Stump net production (allometric from culm)
    stump_net_production => StumpNetProduction: Flux,
    /// Rhizome net production (allometric from foliage)
    rhizome_net_production => RhizomeNetProduction: Flux,
    /// Root net production (allometric from rhizome)
    root_net_production => RootNetProduction: Flux,
    /// Stump stock
    stump => Stump: State,
    /// Rhizome stock
    rhizome => Rhizome: State,
    /// Root stock
    root => Root: State,
    /// Below-ground carbon, BGC
    belowground_carbon => BelowgroundCarbon: State,
    /// BGC / AGC
    root_shoot_ratio => RootShootRatio: State,
    /// AGC + BGC
    total_biomass_carbon => TotalBiomassCarbon: State,

    /// Foliage turnover flux
    leaf_turnover => LeafTurnover: Flux,
    /// Branch turnover flux
    branch_turnover => BranchTurnover: Flux,
    /// Culm turnover flux
    culm_turnover => CulmTurnover: Flux,
    /// Flux from above-ground pools into the litter layer
    litterfall => Litterfall: Flux,
    /// Above-ground NPP
    anpp => Anpp: Flux,

    /// Stump turnover flux
    stump_turnover => StumpTurnover: Flux,
    /// Rhizome turnover flux
    rhizome_turnover => RhizomeTurnover: Flux,
    /// Root turnover flux
    root_turnover => RootTurnover: Flux,
    /// Sum of below-ground turnover fluxes
    belowground_detritus => BelowgroundDetritus: Flux,
    /// Below-ground NPP
    bnpp => Bnpp: Flux,
    /// Total NPP
    tnpp => Tnpp: Flux,
    /// Soil heterotrophic respiration
    soil_hr => SoilHr: Flux,

    /// Foliage autotrophic respiration
    foliage_ar => FoliageAr: Flux,
    /// Branch autotrophic respiration
    branch_ar => BranchAr: Flux,
    /// Culm autotrophic respiration
    culm_ar => CulmAr: Flux,
    /// Above-ground autotrophic respiration
    aboveground_ar => AbovegroundAr: Flux,
    /// Share of soil AR attributed to roots
    root_ar_ratio => RootArRatio: State,
    /// Share of soil AR attributed to rhizomes
    rhizome_ar_ratio => RhizomeArRatio: State,
    /// Share of soil AR attributed to stumps
    stump_ar_ratio => StumpArRatio: State,
    /// Soil (below-ground) autotrophic respiration
    soil_ar => SoilAr: Flux,
    /// Root autotrophic respiration
    root_ar => RootAr: Flux,
    /// Rhizome autotrophic respiration
    rhizome_ar => RhizomeAr: Flux,
    /// Stump autotrophic respiration
    stump_ar => StumpAr: Flux,
    /// Total autotrophic respiration
    ar => Ar: Flux,
    /// Soil respiration (soil AR + soil HR)
    soil_respiration => SoilRespiration: Flux,
    /// First NEP estimate: TNPP - soil HR
    nep_before_litter => NepBeforeLitter: Flux,

    /// Litter-layer stock
    litter_layer => LitterLayer: State,
    /// Litter decay flux into the soil
    litter_decay => LitterDecay: Flux,
    /// Litter-layer heterotrophic respiration
    litter_hr => LitterHr: Flux,
    /// Total heterotrophic respiration
    hr => Hr: Flux,
    /// Second (flux-based) NEP estimate
    nep => Nep: Flux,

    /// Soil carbon stock
    soil_carbon => SoilCarbon: State,
    /// First difference of the soil carbon stock
    soil_carbon_change => SoilCarbonChange: Flux,
    /// Total ecosystem carbon
    total_ecosystem_carbon => TotalEcosystemCarbon: State,
    /// Third NEP estimate: first difference of total ecosystem carbon
    nep_stock_difference => NepStockDifference: Flux,
    /// Gross primary production
    gpp => Gpp: Flux,
}

impl Variable {
    /// Variables that receive a confidence band (everything except pass-through inputs)
    pub fn banded() -> impl Iterator<Item = Variable> {
        Self::ALL
            .iter()
            .copied()
            .filter(|v| v.kind() != VariableKind::PassThrough)
    }

    pub fn is_flux(self) -> bool {
        self.kind() == VariableKind::Flux
    }
}

impl fmt::Display for Variable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl DerivedRecord {
    /// Force every flux-type field to exactly 0
    pub fn clear_fluxes(&mut self) {
        for variable in Variable::ALL.iter().filter(|v| v.is_flux()) {
            *self.value_mut(*variable) = 0.0;
        }
    }

    /// First variable holding a non-finite value, if any
    pub fn first_non_finite(&self) -> Option<Variable> {
        Variable::ALL
            .iter()
            .copied()
            .find(|v| !self.value(*v).is_finite())
    }
}
