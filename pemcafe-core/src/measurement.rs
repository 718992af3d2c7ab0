//! Raw per-period field observations.
//!
//! A [`MeasurementRecord`] is produced once by whatever loads the survey data and is
//! never modified afterwards. The serde names match the survey column headings so
//! a deserializer reports a missing column as a missing field.

use crate::errors::{PemcafeError, PemcafeResult};
use crate::FloatValue;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// One period of raw observations for a stand.
///
/// Masses are dry-matter stocks per unit area; temperature is the period mean in °C.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MeasurementRecord {
    /// Position of the period in the survey
    #[serde(rename = "Period")]
    pub period: u32,
    /// Foliage mass
    #[serde(rename = "Foliages")]
    pub foliage: FloatValue,
    /// Branch mass
    #[serde(rename = "Branches")]
    pub branch: FloatValue,
    /// Culm mass
    #[serde(rename = "Culms")]
    pub culm: FloatValue,
    /// Stump mass
    #[serde(rename = "Stumps")]
    pub stump: FloatValue,
    /// Rhizome mass
    #[serde(rename = "Rhizomes")]
    pub rhizome: FloatValue,
    /// Fine and coarse root mass
    #[serde(rename = "Roots")]
    pub root: FloatValue,
    /// Litter-layer mass on the forest floor
    #[serde(rename = "Litter_layer")]
    pub litter_layer: FloatValue,
    /// Soil carbon stock
    #[serde(rename = "SC")]
    pub soil_carbon: FloatValue,
    /// Mean air temperature over the period
    /// unit: °C
    #[serde(rename = "AvgTemp")]
    pub temperature: FloatValue,
    /// Undergrowth mass (measured, not modelled)
    #[serde(rename = "Undergrowth")]
    pub undergrowth: FloatValue,
}

impl MeasurementRecord {
    /// Column headings of the required fields, in survey order.
    pub const COLUMNS: [&'static str; 11] = [
        "Period",
        "Foliages",
        "Branches",
        "Culms",
        "Stumps",
        "Rhizomes",
        "Roots",
        "Litter_layer",
        "SC",
        "AvgTemp",
        "Undergrowth",
    ];

    /// Build a record from a row of named values.
    ///
    /// `index` is the position of the row in its sequence and is only used for error
    /// reporting. Extra columns are ignored.
    pub fn from_row(row: &HashMap<String, FloatValue>, index: usize) -> PemcafeResult<Self> {
        let get = |column: &str| -> PemcafeResult<FloatValue> {
            row.get(column)
                .copied()
                .ok_or_else(|| PemcafeError::MissingField {
                    field: column.to_string(),
                    record: index,
                })
        };

        let period = get("Period")?;
        let representable = period >= 0.0 && period <= u32::MAX as FloatValue;
        if !(period.is_finite() && representable && period.fract() == 0.0) {
            return Err(PemcafeError::MalformedInput(format!(
                "record {index}: period index must be an integer in [0, {}], got {period}",
                u32::MAX
            )));
        }

        let record = Self {
            period: period as u32,
            foliage: get("Foliages")?,
            branch: get("Branches")?,
            culm: get("Culms")?,
            stump: get("Stumps")?,
            rhizome: get("Rhizomes")?,
            root: get("Roots")?,
            litter_layer: get("Litter_layer")?,
            soil_carbon: get("SC")?,
            temperature: get("AvgTemp")?,
            undergrowth: get("Undergrowth")?,
        };
        record.validate(index)?;
        Ok(record)
    }

    /// Get the value of a measured variable
    pub fn get(&self, variable: MeasuredVariable) -> FloatValue {
        match variable {
            MeasuredVariable::Foliage => self.foliage,
            MeasuredVariable::Branch => self.branch,
            MeasuredVariable::Culm => self.culm,
            MeasuredVariable::Stump => self.stump,
            MeasuredVariable::Rhizome => self.rhizome,
            MeasuredVariable::Root => self.root,
            MeasuredVariable::LitterLayer => self.litter_layer,
            MeasuredVariable::SoilCarbon => self.soil_carbon,
            MeasuredVariable::Temperature => self.temperature,
            MeasuredVariable::Undergrowth => self.undergrowth,
        }
    }

    /// Set the value of a measured variable
    pub fn set(&mut self, variable: MeasuredVariable, value: FloatValue) {
        let slot = match variable {
            MeasuredVariable::Foliage => &mut self.foliage,
            MeasuredVariable::Branch => &mut self.branch,
            MeasuredVariable::Culm => &mut self.culm,
            MeasuredVariable::Stump => &mut self.stump,
            MeasuredVariable::Rhizome => &mut self.rhizome,
            MeasuredVariable::Root => &mut self.root,
            MeasuredVariable::LitterLayer => &mut self.litter_layer,
            MeasuredVariable::SoilCarbon => &mut self.soil_carbon,
            MeasuredVariable::Temperature => &mut self.temperature,
            MeasuredVariable::Undergrowth => &mut self.undergrowth,
        };
        *slot = value;
    }

    /// Check that every measured value is finite.
    pub fn validate(&self, index: usize) -> PemcafeResult<()> {
        for variable in MeasuredVariable::ALL {
            let value = self.get(variable);
            if !value.is_finite() {
                return Err(PemcafeError::MalformedInput(format!(
                    "record {index}: `{}` is not finite ({value})",
                    variable.column()
                )));
            }
        }
        Ok(())
    }
}

/// Validate an ordered measurement sequence before it is simulated.
pub fn validate_sequence(records: &[MeasurementRecord]) -> PemcafeResult<()> {
    if records.is_empty() {
        return Err(PemcafeError::MalformedInput(
            "measurement sequence is empty".to_string(),
        ));
    }
    records
        .iter()
        .enumerate()
        .try_for_each(|(index, record)| record.validate(index))
}

/// Broad class of a measured variable, used to pick a floor or clip after perturbation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MeasurementClass {
    /// Live biomass pools (including undergrowth)
    Biomass,
    /// Litter layer and soil carbon
    DetritalStock,
    /// Mean air temperature
    Temperature,
}

/// The perturbable fields of a [`MeasurementRecord`].
///
/// The period index is not a measurement and is never perturbed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MeasuredVariable {
    Foliage,
    Branch,
    Culm,
    Stump,
    Rhizome,
    Root,
    LitterLayer,
    SoilCarbon,
    Temperature,
    Undergrowth,
}

impl MeasuredVariable {
    pub const ALL: [MeasuredVariable; 10] = [
        MeasuredVariable::Foliage,
        MeasuredVariable::Branch,
        MeasuredVariable::Culm,
        MeasuredVariable::Stump,
        MeasuredVariable::Rhizome,
        MeasuredVariable::Root,
        MeasuredVariable::LitterLayer,
        MeasuredVariable::SoilCarbon,
        MeasuredVariable::Temperature,
        MeasuredVariable::Undergrowth,
    ];

    /// Survey column heading for this variable
    pub fn column(self) -> &'static str {
        match self {
            MeasuredVariable::Foliage => "Foliages",
            MeasuredVariable::Branch => "Branches",
            MeasuredVariable::Culm => "Culms",
            MeasuredVariable::Stump => "Stumps",
            MeasuredVariable::Rhizome => "Rhizomes",
            MeasuredVariable::Root => "Roots",
            MeasuredVariable::LitterLayer => "Litter_layer",
            MeasuredVariable::SoilCarbon => "SC",
            MeasuredVariable::Temperature => "AvgTemp",
            MeasuredVariable::Undergrowth => "Undergrowth",
        }
    }

    pub fn class(self) -> MeasurementClass {
        match self {
            MeasuredVariable::LitterLayer | MeasuredVariable::SoilCarbon => {
                MeasurementClass::DetritalStock
            }
            MeasuredVariable::Temperature => MeasurementClass::Temperature,
            _ => MeasurementClass::Biomass,
        }
    }
}

impl fmt::Display for MeasuredVariable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.column())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn full_row() -> HashMap<String, FloatValue> {
        MeasurementRecord::COLUMNS
            .iter()
            .enumerate()
            .map(|(i, c)| (c.to_string(), i as FloatValue))
            .collect()
    }

    #[test]
    fn test_from_row() {
        let record = MeasurementRecord::from_row(&full_row(), 0).unwrap();
        assert_eq!(record.period, 0);
        assert_eq!(record.foliage, 1.0);
        assert_eq!(record.undergrowth, 10.0);
        assert_eq!(record.get(MeasuredVariable::SoilCarbon), 8.0);
    }

    #[test]
    fn test_from_row_missing_field() {
        let mut row = full_row();
        row.remove("Rhizomes");
        let err = MeasurementRecord::from_row(&row, 3).unwrap_err();
        assert!(err.is_malformed_input());
        assert_eq!(
            err,
            PemcafeError::MissingField {
                field: "Rhizomes".to_string(),
                record: 3
            }
        );
    }

    #[test]
    fn test_from_row_rejects_fractional_period() {
        let mut row = full_row();
        row.insert("Period".to_string(), 1.5);
        assert!(MeasurementRecord::from_row(&row, 0).is_err());
    }

    #[test]
    fn test_from_row_rejects_period_out_of_range() {
        let mut row = full_row();
        row.insert("Period".to_string(), u32::MAX as FloatValue + 1.0);
        let err = MeasurementRecord::from_row(&row, 2).unwrap_err();
        assert!(matches!(err, PemcafeError::MalformedInput(_)));

        row.insert("Period".to_string(), u32::MAX as FloatValue);
        let record = MeasurementRecord::from_row(&row, 2).unwrap();
        assert_eq!(record.period, u32::MAX);
    }

    #[test]
    fn test_from_row_rejects_non_finite() {
        let mut row = full_row();
        row.insert("AvgTemp".to_string(), FloatValue::NAN);
        let err = MeasurementRecord::from_row(&row, 0).unwrap_err();
        assert!(matches!(err, PemcafeError::MalformedInput(_)));
    }

    #[test]
    fn test_deserialize_missing_column_fails() {
        let json = r#"{"Period": 0, "Foliages": 1.0}"#;
        let result: Result<MeasurementRecord, _> = serde_json::from_str(json);
        assert!(result.is_err());
    }

    #[test]
    fn test_set_roundtrips_every_variable() {
        let mut record = MeasurementRecord::from_row(&full_row(), 0).unwrap();
        for (i, variable) in MeasuredVariable::ALL.iter().enumerate() {
            record.set(*variable, 100.0 + i as FloatValue);
            assert_eq!(record.get(*variable), 100.0 + i as FloatValue);
        }
    }

    #[test]
    fn test_empty_sequence_is_malformed() {
        assert!(validate_sequence(&[]).unwrap_err().is_malformed_input());
    }
}
