use linfa::prelude::*;
use linfa_linear::LinearRegression;
use ndarray::{Array1, Array2};
use serde::Serialize;
use std::collections::BTreeMap;
use tracing::{debug, info, warn};

use crate::data::{RaceData, StintRecord};
use crate::error::{Result, SimError};
use crate::tire::{Compound, TireCoefficients, TireCompound};

/// Clean-lap window used for calibration; anything outside is traffic,
/// a safety car or an incident.
const CLEAN_LAP_MIN: f64 = 80.0;
const CLEAN_LAP_MAX: f64 = 120.0;

// least-squares slope of lap time against lap-in-stint
fn fit_slope(points: &[(f64, f64)]) -> Option<f64> {
    if points.len() < 2 {
        return None;
    }
    let x = Array2::from_shape_vec((points.len(), 1), points.iter().map(|p| p.0).collect()).ok()?;
    let y = Array1::from_vec(points.iter().map(|p| p.1).collect());
    let fitted = LinearRegression::new().fit(&Dataset::new(x, y)).ok()?;
    let slope = fitted.params()[0];
    slope.is_finite().then_some(slope)
}

fn mean(values: impl IntoIterator<Item = f64>) -> Option<f64> {
    let (sum, n) = values.into_iter().fold((0.0, 0usize), |(s, n), v| (s + v, n + 1));
    (n > 0).then(|| sum / n as f64)
}

// inverted records cover no laps
fn stint_bounds(stint: &StintRecord) -> Option<(u32, u32)> {
    Some((stint.lap_start?, stint.lap_end?)).filter(|(start, end)| end >= start)
}

/// Degradation observed over one recorded stint.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StintDegradation {
    pub driver_id: u32,
    pub compound: Compound,
    pub stint_start: u32,
    pub stint_end: u32,
    /// Laps that went into the fit.
    pub stint_length: u32,
    pub degradation_rate: f64,
    pub average_lap_time: f64,
    pub best_lap_time: f64,
    pub worst_lap_time: f64,
}

impl StintDegradation {
    /// `laps` are `(lap_number, seconds)` in lap order; `x` maps a lap to
    /// the regression abscissa.
    fn fit(stint: &StintRecord, start: u32, end: u32, laps: &[(u32, f64)], x: impl Fn(usize, u32) -> f64) -> Option<Self> {
        let points: Vec<(f64, f64)> = laps.iter().enumerate().map(|(i, &(n, t))| (x(i, n), t)).collect();
        let Some(slope) = fit_slope(&points) else {
            debug!("driver #{} stint from lap {start}: regression failed", stint.driver_id);
            return None;
        };
        let times = laps.iter().map(|&(_, t)| t);
        Some(Self {
            driver_id: stint.driver_id,
            compound: stint.compound.clone(),
            stint_start: start,
            stint_end: end,
            stint_length: laps.len() as u32,
            degradation_rate: slope,
            average_lap_time: mean(times.clone())?,
            best_lap_time: times.clone().fold(f64::INFINITY, f64::min),
            worst_lap_time: times.fold(f64::NEG_INFINITY, f64::max),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CompoundDegradation {
    pub stints: usize,
    pub avg_degradation: f64,
    pub avg_lap_time: f64,
    pub avg_stint_length: f64,
}

fn group_by_compound(stints: &[StintDegradation]) -> BTreeMap<String, CompoundDegradation> {
    let mut groups: BTreeMap<String, Vec<&StintDegradation>> = BTreeMap::new();
    for s in stints {
        groups.entry(s.compound.as_str().to_owned()).or_default().push(s);
    }
    groups
        .into_iter()
        .filter_map(|(name, group)| {
            let summary = CompoundDegradation {
                stints: group.len(),
                avg_degradation: mean(group.iter().map(|s| s.degradation_rate))?,
                avg_lap_time: mean(group.iter().map(|s| s.average_lap_time))?,
                avg_stint_length: mean(group.iter().map(|s| f64::from(s.stint_length)))?,
            };
            Some((name, summary))
        })
        .collect()
}

#[derive(Debug, Clone, Serialize)]
pub struct DegradationReport {
    pub driver_id: u32,
    pub stints: Vec<StintDegradation>,
    pub avg_degradation_by_compound: BTreeMap<String, CompoundDegradation>,
}

/// Per-stint degradation of one driver, from timed laps that were not
/// pit-out laps. Stints with three laps or fewer are left out.
pub fn analyze_tire_degradation(race: &RaceData, driver_id: u32) -> Result<DegradationReport> {
    if !race.has_driver(driver_id) {
        return Err(SimError::UnknownDriver(driver_id));
    }
    let baseline = race.baseline_lap_times(driver_id);

    let stints: Vec<StintDegradation> = race
        .stints(driver_id)
        .iter()
        .filter_map(|stint| {
            let (start, end) = stint_bounds(stint)?;
            let laps: Vec<(u32, f64)> = baseline.range(start..=end).map(|(&n, &t)| (n, t)).collect();
            if laps.len() <= 3 {
                return None;
            }
            StintDegradation::fit(stint, start, end, &laps, |_, n| f64::from(n - start + 1))
        })
        .collect();

    Ok(DegradationReport {
        driver_id,
        avg_degradation_by_compound: group_by_compound(&stints),
        stints,
    })
}

pub fn average_stint_lengths(race: &RaceData) -> BTreeMap<String, f64> {
    let mut lengths: BTreeMap<String, Vec<f64>> = BTreeMap::new();
    for stint in race.all_stints() {
        if let Some((start, end)) = stint_bounds(stint) {
            lengths
                .entry(stint.compound.as_str().to_owned())
                .or_default()
                .push(f64::from(end - start + 1));
        }
    }
    lengths
        .into_iter()
        .filter_map(|(name, v)| Some((name, mean(v)?)))
        .collect()
}

// field-wide, clean laps only
pub fn analyze_clean_stints(race: &RaceData) -> Vec<StintDegradation> {
    race.all_stints()
        .filter_map(|stint| {
            let (start, end) = stint_bounds(stint)?;
            let laps: Vec<(u32, f64)> = race
                .laps(stint.driver_id)
                .iter()
                .filter(|l| !l.is_pit_out_lap && (start..=end).contains(&l.lap_number))
                .filter_map(|l| l.duration.map(|d| (l.lap_number, d)))
                .filter(|&(_, t)| t > CLEAN_LAP_MIN && t < CLEAN_LAP_MAX)
                .collect();
            if laps.len() < 3 {
                return None;
            }
            StintDegradation::fit(stint, start, end, &laps, |i, _| (i + 1) as f64)
        })
        .collect()
}

/// Derives tire coefficients from the race itself.
///
/// Pace is expressed relative to MEDIUM, or to the mean of all dry compounds
/// when nobody ran MEDIUM. Degradation is stored as a magnitude: fuel burn
/// often makes the raw slope negative.
pub fn derive_tire_coefficients(race: &RaceData) -> Result<TireCoefficients> {
    let stints = analyze_clean_stints(race);
    let dry: Vec<StintDegradation> = stints.into_iter().filter(|s| s.compound.is_dry()).collect();
    let by_compound = group_by_compound(&dry);
    if by_compound.is_empty() {
        return Err(SimError::InvalidInput("no clean dry stints to calibrate from".into()));
    }
    let stint_lengths = average_stint_lengths(race);

    let baseline = match by_compound.get(Compound::Medium.as_str()) {
        Some(medium) => medium.avg_lap_time,
        None => {
            warn!("no MEDIUM stints, using the mean of all compounds as pace baseline");
            mean(by_compound.values().map(|c| c.avg_lap_time)).unwrap_or_default()
        }
    };

    let mut tire_compounds = BTreeMap::new();
    for (name, summary) in &by_compound {
        let typical = stint_lengths.get(name).copied().unwrap_or(summary.avg_stint_length);
        let tire = TireCompound::new(
            summary.avg_lap_time - baseline,
            summary.avg_degradation.abs(),
            typical as u32,
        );
        info!(
            "{name}: {} stints, {:+.3}s/lap, degradation {:.3}s/lap, typical stint {} laps",
            summary.stints, tire.performance_delta, tire.degradation_rate, tire.typical_stint_length
        );
        tire_compounds.insert(name.clone(), tire);
    }

    Ok(TireCoefficients {
        source: format!("race data, {} clean stints", dry.len()),
        generated_at: None,
        tire_compounds,
    })
}
