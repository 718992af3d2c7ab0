//! Merging the fitted-parameter run with its confidence bands.

use crate::confidence::{ConfidenceBand, ConfidenceBands};
use crate::monte_carlo::SampleSet;
use pemcafe_core::{FloatValue, Series, Variable};
use serde::{Deserialize, Serialize};

/// One row per period, one column per variable and band statistic.
///
/// A `None` cell is a band that could not be computed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultTable {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Option<FloatValue>>>,
}

impl ResultTable {
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    /// Cell at `period` in the column called `name`
    pub fn cell(&self, period: usize, name: &str) -> Option<FloatValue> {
        let index = self.column_index(name)?;
        *self.rows.get(period)?.get(index)?
    }

    /// Name of the band column for `variable` and statistic `suffix`
    pub fn band_column(variable: Variable, suffix: &str) -> String {
        format!("{}_{suffix}", variable.name())
    }
}

/// Everything a Monte Carlo run produces.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonteCarloReport {
    /// Series simulated with the fitted parameters and unperturbed measurements
    pub base: Series,
    pub bands: ConfidenceBands,
    pub table: ResultTable,
    /// One reason per discarded draw
    pub discard_log: Vec<String>,
    pub requested_draws: usize,
    pub surviving_draws: usize,
}

/// Builds the final [`MonteCarloReport`].
#[derive(Debug, Clone, Copy, Default)]
pub struct ResultAssembler;

impl ResultAssembler {
    /// Merge the base run with its bands and enforce the first-period convention.
    ///
    /// Every flux-type field of the base run, and every existing band of a flux-type
    /// variable, is forced to exactly 0 at the first period. Missing bands stay missing.
    pub fn assemble(
        &self,
        mut base: Series,
        mut bands: ConfidenceBands,
        samples: &SampleSet,
    ) -> MonteCarloReport {
        if let Some(first) = base.records_mut().first_mut() {
            first.clear_fluxes();
        }
        bands.zero_fluxes_at(0);

        let table = Self::table(&base, &bands);
        MonteCarloReport {
            base,
            bands,
            table,
            discard_log: samples.discard_log(),
            requested_draws: samples.requested(),
            surviving_draws: samples.len(),
        }
    }

    fn table(base: &Series, bands: &ConfidenceBands) -> ResultTable {
        let mut columns = vec!["period".to_string()];
        columns.extend(Variable::ALL.iter().map(|v| v.name().to_string()));
        for (variable, _) in bands.iter() {
            columns.extend(
                ConfidenceBand::STATISTICS
                    .iter()
                    .map(|suffix| ResultTable::band_column(variable, suffix)),
            );
        }

        let rows = base
            .iter()
            .enumerate()
            .map(|(period, record)| {
                let mut row = Vec::with_capacity(columns.len());
                row.push(Some(record.period as FloatValue));
                row.extend(Variable::ALL.iter().map(|v| Some(record.value(*v))));
                for (_, slots) in bands.iter() {
                    match slots.get(period).and_then(|b| b.as_ref()) {
                        Some(band) => row.extend(band.statistics().map(Some)),
                        None => row.extend([None; ConfidenceBand::STATISTICS.len()]),
                    }
                }
                row
            })
            .collect();

        ResultTable { columns, rows }
    }
}
