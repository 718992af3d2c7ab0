//! Monte Carlo batches driven end to end through the interval estimator and assembler.

use approx::assert_abs_diff_eq;
use pemcafe_calibrate::{
    ConfidenceBand, ConfidenceIntervalEstimator, MonteCarloEngine, MonteCarloOptions, NoiseLevels,
    ResultAssembler, SampleSet, SeriesRunner,
};
use pemcafe_core::{
    FloatValue, MeasuredVariable, MeasurementRecord, ModelConfig, ParameterVector,
    PemcafeResult, Series, SeriesSimulator, Variable,
};

fn measurements() -> Vec<MeasurementRecord> {
    let foliage = [1.0, 1.4, 1.3, 1.7];
    let culm = [10.0, 10.5, 11.2, 11.6];
    (0..4)
        .map(|i| MeasurementRecord {
            period: i as u32,
            foliage: foliage[i],
            branch: 2.0 + 0.2 * i as FloatValue,
            culm: culm[i],
            stump: 3.0,
            rhizome: 4.0,
            root: 5.0,
            litter_layer: 6.0,
            soil_carbon: 80.0,
            temperature: 20.0,
            undergrowth: 0.5,
        })
        .collect()
}

fn simulator() -> SeriesSimulator {
    SeriesSimulator::new(ParameterVector::default(), ModelConfig::default())
}

fn run_batch<R: SeriesRunner>(runner: R, options: &MonteCarloOptions) -> (Series, SampleSet) {
    let m = measurements();
    let base = simulator().run(&m).unwrap();
    let samples = MonteCarloEngine::with_runner(runner, options)
        .unwrap()
        .run(&m)
        .unwrap();
    (base, samples)
}

#[test]
fn test_zero_noise_reproduces_the_base_run() {
    let options = MonteCarloOptions {
        draws: 20,
        seed: Some(5),
        noise: MeasuredVariable::ALL.iter().map(|v| (*v, 0.0)).collect(),
        ..Default::default()
    };
    let (base, samples) = run_batch(simulator(), &options);

    assert_eq!(samples.len(), 20);
    for series in samples.series() {
        assert_eq!(series, &base);
    }

    let bands = ConfidenceIntervalEstimator::new(options.confidence_level)
        .unwrap()
        .estimate(&samples);
    for (variable, slots) in bands.iter() {
        for (period, band) in slots.iter().enumerate() {
            let band = band.expect("20 identical draws give a band");
            let expected = base.get(period).unwrap().value(variable);
            let epsilon = 1e-9 * expected.abs().max(1.0);
            assert_abs_diff_eq!(band.mean, expected, epsilon = epsilon);
            assert_abs_diff_eq!(band.t_upper, band.t_lower, epsilon = epsilon);
            assert_eq!(band.percentile_lower, expected);
            assert_eq!(band.percentile_upper, expected);
        }
    }
}

#[test]
fn test_single_draw_gives_no_bands() {
    let options = MonteCarloOptions {
        draws: 1,
        seed: Some(9),
        noise: NoiseLevels::new().with(MeasuredVariable::Foliage, 0.1),
        ..Default::default()
    };
    let (base, samples) = run_batch(simulator(), &options);
    assert_eq!(samples.len(), 1);

    let bands = ConfidenceIntervalEstimator::new(0.95)
        .unwrap()
        .estimate(&samples);
    assert!(bands
        .iter()
        .all(|(_, slots)| slots.len() == 4 && slots.iter().all(Option::is_none)));

    let report = ResultAssembler.assemble(base, bands, &samples);
    assert_eq!(report.table.cell(0, "gpp_mean"), None);
    assert_eq!(report.table.cell(2, "soil_carbon_sd"), None);
}

/// Produces a non-finite value in every run
struct Diverging;

impl SeriesRunner for Diverging {
    fn run_series(&self, measurements: &[MeasurementRecord]) -> PemcafeResult<Series> {
        let mut series = simulator().run(measurements)?;
        series.records_mut()[1].nep = FloatValue::NAN;
        Ok(series)
    }
}

#[test]
fn test_every_draw_failing_leaves_an_empty_sample_set() {
    let options = MonteCarloOptions {
        draws: 12,
        seed: Some(1),
        noise: NoiseLevels::new().with(MeasuredVariable::Culm, 0.2),
        ..Default::default()
    };
    let (base, samples) = run_batch(Diverging, &options);

    assert!(samples.is_empty());
    assert_eq!(samples.discarded().len(), 12);
    let log = samples.discard_log();
    assert_eq!(log.len(), 12);
    assert!(log.iter().all(|reason| reason.contains("nep")));

    let bands = ConfidenceIntervalEstimator::new(0.95)
        .unwrap()
        .estimate(&samples);
    for variable in Variable::banded() {
        assert!(bands.variable(variable).unwrap().iter().all(Option::is_none));
    }

    let report = ResultAssembler.assemble(base, bands, &samples);
    assert_eq!(report.surviving_draws, 0);
    assert_eq!(report.requested_draws, 12);
    assert_eq!(report.discard_log.len(), 12);
    assert_eq!(report.table.rows.len(), 4);
}

#[test]
fn test_first_period_flux_bands_are_exactly_zero() {
    let options = MonteCarloOptions {
        draws: 50,
        seed: Some(77),
        noise: NoiseLevels::new()
            .with(MeasuredVariable::Foliage, 0.1)
            .with(MeasuredVariable::Culm, 0.3)
            .with(MeasuredVariable::SoilCarbon, 2.0)
            .with(MeasuredVariable::Temperature, 1.0),
        ..Default::default()
    };
    let (base, samples) = run_batch(simulator(), &options);
    let bands = ConfidenceIntervalEstimator::new(0.9)
        .unwrap()
        .estimate(&samples);
    let report = ResultAssembler.assemble(base, bands, &samples);

    for variable in Variable::banded() {
        for suffix in ConfidenceBand::STATISTICS {
            let column = format!("{}_{suffix}", variable.name());
            let cell = report.table.cell(0, &column).unwrap();
            if variable.is_flux() {
                assert_eq!(cell, 0.0, "{column}");
            }
        }
        if variable.is_flux() {
            assert_eq!(report.table.cell(0, variable.name()), Some(0.0));
        }
    }
    let band = report.bands.get(Variable::Gpp, 2).unwrap();
    assert!(band.t_lower < band.mean && band.mean < band.t_upper);
    assert!(band.percentile_lower < band.percentile_upper);
}
