use linfa::prelude::*;
use linfa_linear::LinearRegression;
use nalgebra::{DMatrix, DVector};
use ndarray::{Array1, Array2};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, info, warn};

use crate::compound::{fallback_table, CompoundCode, CompoundParameters, CompoundTable};
use crate::stats::{mean, percentile, round_to};
use crate::temperature::adjust_for_temperature;

/// Residual (s) above the linear model that marks the start of the cliff.
pub const CLIFF_RESIDUAL_THRESHOLD_S: f64 = 0.15;
const MIN_CLIFF_RATE: f64 = 0.005;

/// One historical stint on a single set of tyres, already cleaned of pit laps.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StintRecord {
    pub season: i32,
    pub driver: String,
    pub compound: CompoundCode,
    pub start_lap: u32,
    pub end_lap: u32,
    pub lap_times: Vec<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataSource {
    Historical,
    Fallback,
}

/// Per-compound parameters plus where they came from.
#[derive(Debug, Clone, Serialize)]
pub struct DegradationFit {
    pub compounds: CompoundTable,
    pub data_source: DataSource,
    pub seasons_used: Vec<i32>,
    pub track_temp_c: Option<f64>,
    pub notes: Vec<String>,
}

impl DegradationFit {
    pub fn fallback(reason: impl Into<String>) -> Self {
        Self {
            compounds: fallback_table(),
            data_source: DataSource::Fallback,
            seasons_used: Vec::new(),
            track_temp_c: None,
            notes: vec![reason.into(), MODEL_NOTE.to_string()],
        }
    }

    /// New fit with every compound rescaled for `track_temp_c`.
    pub fn with_track_temp(self, track_temp_c: f64) -> Self {
        let mut notes = self.notes;
        notes.push(format!(
            "Temp-adjusted to {}°C (heuristic: rate *= (temp/25)^1.2).",
            track_temp_c
        ));
        Self {
            compounds: adjust_for_temperature(&self.compounds, track_temp_c),
            track_temp_c: Some(track_temp_c),
            notes,
            ..self
        }
    }
}

const MODEL_NOTE: &str = "Model: linear + quadratic cliff. Averaged across drivers/stints. \
                          Ignores fuel, traffic and safety cars.";

// lap offsets since the reference lap, and the time lost against it
struct StintCurve {
    laps: Vec<u32>,
    deltas: Vec<f64>,
}

struct FittedCompound {
    avg_deg: f64,
    cliff_onset: u32,
    cliff_rate: f64,
    typical_max: u32,
    avg_reference: f64,
}

/// Fit wear parameters per compound code from historical stints. Codes with no
/// usable stints come from the fallback table.
pub fn fit_degradation(stints: &[StintRecord]) -> DegradationFit {
    if stints.is_empty() {
        warn!("no stint records supplied, using fallback compound table");
        return DegradationFit::fallback("No historical stint data. Using generic fallback.");
    }

    let mut notes = Vec::new();
    let mut by_code: BTreeMap<CompoundCode, Vec<&StintRecord>> = BTreeMap::new();
    let mut skipped_wet = 0usize;
    for stint in stints {
        if stint.compound.is_slick() {
            by_code.entry(stint.compound).or_default().push(stint);
        } else {
            skipped_wet += 1;
        }
    }
    if skipped_wet > 0 {
        notes.push(format!(
            "Ignored {} wet-tyre stint(s); wet parameters are fixed.",
            skipped_wet
        ));
    }

    let mut fitted: BTreeMap<CompoundCode, FittedCompound> = BTreeMap::new();
    let mut used_laps = 0usize;
    let mut used_stints = 0usize;
    let mut seasons = BTreeSet::new();

    for (code, records) in &by_code {
        let Some((fit, usable)) = fit_compound(*code, records) else {
            debug!(%code, stints = records.len(), "no usable stints for compound");
            continue;
        };
        for record in usable {
            used_laps += record.lap_times.len();
            used_stints += 1;
            seasons.insert(record.season);
        }
        debug!(
            %code,
            avg_deg = fit.avg_deg,
            cliff_onset = fit.cliff_onset,
            cliff_rate = fit.cliff_rate,
            typical_max = fit.typical_max,
            "fitted compound"
        );
        fitted.insert(*code, fit);
    }

    if fitted.is_empty() {
        warn!("no compound had enough laps to fit, using fallback compound table");
        let mut fallback = DegradationFit::fallback(
            "No stint had at least 2 laps after the reference lap. Using generic fallback.",
        );
        notes.append(&mut fallback.notes);
        fallback.notes = notes;
        return fallback;
    }

    // pace offsets are relative to the softest compound that has data
    let softest_reference = fitted
        .iter()
        .max_by_key(|(code, _)| code.code_num())
        .map(|(_, fit)| fit.avg_reference)
        .unwrap_or_default();

    let mut builder = CompoundTable::builder();
    for (code, fit) in &fitted {
        let offset = round_to((fit.avg_reference - softest_reference).max(0.0), 3);
        builder = builder.insert(CompoundParameters::new(
            *code,
            fit.avg_deg,
            fit.cliff_onset,
            fit.cliff_rate,
            fit.typical_max,
            offset,
            fit.avg_reference,
        ));
    }

    let fallback = fallback_table();
    let missing: Vec<String> = fallback
        .codes()
        .filter(|code| !fitted.contains_key(code))
        .map(|code| code.to_string())
        .collect();
    for params in fallback.iter() {
        builder = builder.insert_missing(params.clone());
    }

    notes.push(format!(
        "Computed from {} laps across {} stints.",
        used_laps, used_stints
    ));
    if !missing.is_empty() {
        notes.push(format!(
            "No historical data for {}; using generic fallback values.",
            missing.join(", ")
        ));
    }
    notes.push(MODEL_NOTE.to_string());

    info!(
        compounds = fitted.len(),
        stints = used_stints,
        laps = used_laps,
        "degradation fitted from history"
    );

    DegradationFit {
        compounds: builder.build(),
        data_source: DataSource::Historical,
        seasons_used: seasons.into_iter().collect(),
        track_temp_c: None,
        notes,
    }
}

fn fit_compound<'a>(
    code: CompoundCode,
    records: &[&'a StintRecord],
) -> Option<(FittedCompound, Vec<&'a StintRecord>)> {
    let mut slopes = Vec::new();
    let mut max_laps = Vec::new();
    let mut references = Vec::new();
    let mut curves = Vec::new();
    let mut usable = Vec::new();

    for record in records {
        // the first lap of a stint is the out-lap / reference lap
        let clean = record.lap_times.get(1..).unwrap_or_default();
        if clean.len() < 2 {
            continue;
        }
        let reference = clean[0];
        let laps: Vec<u32> = (0..clean.len() as u32).collect();
        let deltas: Vec<f64> = clean.iter().map(|t| t - reference).collect();

        match fit_slope(&laps, &deltas) {
            Some(slope) => slopes.push(slope.max(0.0)),
            None => debug!(driver = %record.driver, "linear fit failed for stint"),
        }
        references.push(reference);
        max_laps.push(record.lap_times.len() as f64);
        curves.push(StintCurve { laps, deltas });
        usable.push(*record);
    }

    let avg_deg = mean(&slopes)?;
    let typical_max = percentile(&max_laps, 75.0).map_or(30, |p| p.floor() as u32);
    let avg_reference = mean(&references).unwrap_or(85.0);
    let (cliff_onset, cliff_rate) = detect_cliff(&curves, avg_deg, typical_max, code);

    Some((
        FittedCompound {
            avg_deg: round_to(avg_deg, 4),
            cliff_onset,
            cliff_rate: round_to(cliff_rate, 5),
            typical_max,
            avg_reference: round_to(avg_reference, 3),
        },
        usable,
    ))
}

/// Ordinary least squares slope of `deltas` against `laps`.
fn fit_slope(laps: &[u32], deltas: &[f64]) -> Option<f64> {
    let features: Vec<f64> = laps.iter().map(|l| *l as f64).collect();
    let x = Array2::from_shape_vec((features.len(), 1), features).ok()?;
    let y = Array1::from_vec(deltas.to_vec());
    let ds = Dataset::new(x, y);

    let model = LinearRegression::new().fit(&ds).ok()?;
    model.params().get(0).copied().filter(|s| s.is_finite())
}

/// Onset and rate of the cliff when the data can't show one: softer compounds
/// fall off earlier and harder.
pub fn heuristic_cliff(code: CompoundCode) -> (u32, f64) {
    let n = code.code_num() as i64;
    let onset = (40 - 6 * n).max(8) as u32;
    let rate = round_to(0.005 + 0.006 * n as f64, 5);
    (onset, rate)
}

fn detect_cliff(
    curves: &[StintCurve],
    linear_deg: f64,
    typical_max: u32,
    code: CompoundCode,
) -> (u32, f64) {
    let heuristic = heuristic_cliff(code);
    if curves.is_empty() || typical_max < 6 {
        return heuristic;
    }

    let max_lap = curves
        .iter()
        .filter_map(|c| c.laps.last().copied())
        .max()
        .unwrap_or(0);
    if max_lap < 4 {
        return heuristic;
    }

    let mut binned: BTreeMap<u32, Vec<f64>> = BTreeMap::new();
    for curve in curves {
        for (lap, delta) in curve.laps.iter().zip(&curve.deltas) {
            binned.entry(*lap).or_default().push(*delta);
        }
    }
    if binned.len() < 4 {
        return heuristic;
    }

    let residuals: Vec<(u32, f64)> = binned
        .iter()
        .map(|(lap, deltas)| {
            let avg = mean(deltas).unwrap_or_default();
            (*lap, avg - linear_deg * *lap as f64)
        })
        .collect();

    let scan_from = residuals.len() / 3;
    let Some(onset) = residuals
        .iter()
        .skip(scan_from)
        .find(|(_, r)| *r > CLIFF_RESIDUAL_THRESHOLD_S)
        .map(|(lap, _)| *lap)
    else {
        return heuristic;
    };

    let (post_laps, post_residuals): (Vec<f64>, Vec<f64>) = residuals
        .iter()
        .filter(|(lap, _)| *lap >= onset)
        .map(|(lap, r)| ((lap - onset) as f64, *r))
        .unzip();

    // report the onset a couple of laps late so short stints stay clear of it
    let reported_onset = onset + 2;
    if post_laps.len() < 2 {
        return (reported_onset, heuristic.1);
    }

    let rate = quadratic_coefficient(&post_laps, &post_residuals)
        .map_or(heuristic.1, |a| a.max(MIN_CLIFF_RATE));
    (reported_onset, rate)
}

/// Leading coefficient of the least-squares parabola through the points.
fn quadratic_coefficient(x: &[f64], y: &[f64]) -> Option<f64> {
    let design = DMatrix::from_fn(x.len(), 3, |r, c| x[r].powi(2 - c as i32));
    let target = DVector::from_column_slice(y);
    let coeffs = design.svd(true, true).solve(&target, 1e-12).ok()?;
    Some(coeffs[0]).filter(|a| a.is_finite())
}
