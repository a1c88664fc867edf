use serde::Serialize;
use std::collections::BTreeMap;

use crate::data::RaceData;
use crate::error::{Result, SimError};
use crate::replay::{RaceReplayEngine, SimulationResult};
use crate::strategy::{build_stints, stint_time, Stint, Strategy};

/// Stint `stint_number` of each side, paired by position. A side that ran
/// fewer stints has `None` there and contributes zero time.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StintComparison {
    pub stint_number: u32,
    pub actual_stint: Option<Stint>,
    pub alternative_stint: Option<Stint>,
    pub actual_time: f64,
    pub alternative_time: f64,
    pub time_difference: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ComparisonResult {
    pub driver_id: u32,
    pub actual_strategy: Strategy,
    pub alternative_strategy: Strategy,
    pub actual_total_time: f64,
    pub alternative_total_time: f64,
    /// Alternative minus actual; negative means the alternative is faster.
    pub time_difference: f64,
    pub improvement: bool,
    pub actual_lap_times: BTreeMap<u32, f64>,
    pub alternative_lap_times: BTreeMap<u32, f64>,
    pub stint_comparison: Vec<StintComparison>,
}

fn pair_stints(
    actual: &[Stint],
    actual_laps: &BTreeMap<u32, f64>,
    alternative: &[Stint],
    alternative_laps: &BTreeMap<u32, f64>,
) -> Vec<StintComparison> {
    let count = actual.len().max(alternative.len());
    (0..count)
        .map(|i| {
            let actual_stint = actual.get(i).cloned();
            let alternative_stint = alternative.get(i).cloned();
            let actual_time = actual_stint.as_ref().map_or(0.0, |s| stint_time(s, actual_laps));
            let alternative_time = alternative_stint
                .as_ref()
                .map_or(0.0, |s| stint_time(s, alternative_laps));
            StintComparison {
                stint_number: i as u32 + 1,
                actual_stint,
                alternative_stint,
                actual_time,
                alternative_time,
                time_difference: alternative_time - actual_time,
            }
        })
        .collect()
}

/// Compares alternative strategies against what a driver actually did.
#[derive(Debug, Clone, Copy)]
pub struct StrategyComparator<'a> {
    race: &'a RaceData,
    engine: RaceReplayEngine<'a>,
    /// Flat loss every stop is normalized to in static mode.
    flat_pit_loss: Option<f64>,
}

impl<'a> StrategyComparator<'a> {
    /// `flat_pit_loss` is `Some` in static mode: both strategies are charged
    /// that value per stop, so recorded pit durations do not bias the result.
    pub fn new(race: &'a RaceData, engine: RaceReplayEngine<'a>, flat_pit_loss: Option<f64>) -> Self {
        Self {
            race,
            engine,
            flat_pit_loss,
        }
    }

    fn normalize(&self, strategy: &Strategy) -> Strategy {
        match self.flat_pit_loss {
            Some(loss) => strategy.with_flat_pit_loss(loss),
            None => strategy.clone(),
        }
    }

    /// Replays the actual strategy once so it can be compared against many
    /// alternatives.
    pub fn prepare(&self, driver_id: u32) -> Result<PreparedComparison<'a>> {
        if !self.race.has_driver(driver_id) {
            return Err(SimError::UnknownDriver(driver_id));
        }
        let default_loss = self.engine.settings().default_pit_loss;
        let actual_strategy = self.race.actual_strategy(driver_id, default_loss);
        let baseline = self.race.baseline_lap_times(driver_id);
        let actual = self
            .engine
            .replay(driver_id, &baseline, &self.normalize(&actual_strategy));
        let actual_stints = build_stints(&actual.strategy, actual.race_length);

        Ok(PreparedComparison {
            comparator: *self,
            driver_id,
            baseline,
            actual_strategy,
            actual,
            actual_stints,
        })
    }

    pub fn compare(&self, driver_id: u32, alternative: &Strategy) -> Result<ComparisonResult> {
        Ok(self.prepare(driver_id)?.compare(alternative))
    }
}

/// A driver's actual race, replayed and decomposed, ready to be compared.
#[derive(Debug, Clone)]
pub struct PreparedComparison<'a> {
    comparator: StrategyComparator<'a>,
    driver_id: u32,
    baseline: BTreeMap<u32, f64>,
    actual_strategy: Strategy,
    actual: SimulationResult,
    actual_stints: Vec<Stint>,
}

impl PreparedComparison<'_> {
    pub fn driver_id(&self) -> u32 {
        self.driver_id
    }

    pub fn actual_strategy(&self) -> &Strategy {
        &self.actual_strategy
    }

    pub fn actual_total_time(&self) -> f64 {
        self.actual.total_time
    }

    pub fn race_length(&self) -> u32 {
        self.actual.race_length
    }

    pub fn compare(&self, alternative: &Strategy) -> ComparisonResult {
        let engine = &self.comparator.engine;
        let simulated = engine.replay(self.driver_id, &self.baseline, &self.comparator.normalize(alternative));
        let alternative_stints = build_stints(&simulated.strategy, simulated.race_length);
        let stint_comparison = pair_stints(
            &self.actual_stints,
            &self.actual.lap_times,
            &alternative_stints,
            &simulated.lap_times,
        );
        let time_difference = simulated.total_time - self.actual.total_time;

        ComparisonResult {
            driver_id: self.driver_id,
            actual_strategy: self.actual_strategy.clone(),
            alternative_strategy: alternative.clone(),
            actual_total_time: self.actual.total_time,
            alternative_total_time: simulated.total_time,
            time_difference,
            improvement: time_difference < 0.0,
            actual_lap_times: self.actual.lap_times.clone(),
            alternative_lap_times: simulated.lap_times,
            stint_comparison,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::fixtures::{constant_race, lap, one_stop_race};
    use crate::data::{DriverInfo, LapRecord, PitStopRecord};
    use crate::pit_loss::PitLossModel;
    use crate::replay::{PitLossMode, ReplaySettings};
    use crate::strategy::PitStop;
    use crate::tire::{Compound, TireModel};

    static STATIC: PitLossMode = PitLossMode::Static;

    fn static_comparator<'a>(race: &'a RaceData, tires: &'a TireModel) -> StrategyComparator<'a> {
        let engine = RaceReplayEngine::new(tires, &STATIC, ReplaySettings::default());
        StrategyComparator::new(race, engine, Some(22.0))
    }

    #[test]
    fn actual_against_itself_is_zero() {
        let race = one_stop_race(1, 53, 92.0, 20, Compound::Soft);
        let tires = TireModel::fallback();
        let comparator = static_comparator(&race, &tires);
        let actual = race.actual_strategy(1, 22.0);
        let result = comparator.compare(1, &actual).unwrap();
        assert!(result.time_difference.abs() < 0.1);
        assert!(!result.improvement);
    }

    #[test]
    fn actual_against_itself_is_zero_in_dynamic_mode() {
        let race = one_stop_race(44, 53, 92.0, 20, Compound::Hard);
        let tires = TireModel::fallback();
        let mode = PitLossMode::Dynamic(PitLossModel::default());
        let engine = RaceReplayEngine::new(&tires, &mode, ReplaySettings::default());
        let comparator = StrategyComparator::new(&race, engine, None);
        let actual = race.actual_strategy(44, 22.0);
        let result = comparator.compare(44, &actual).unwrap();
        assert!(result.time_difference.abs() < 0.1);
    }

    #[test]
    fn shifting_a_soft_stop_only_moves_tire_wear() {
        let race = one_stop_race(1, 53, 92.0, 20, Compound::Soft);
        let tires = TireModel::fallback();
        let comparator = static_comparator(&race, &tires);
        let alternative = Strategy::new(vec![PitStop::new(25, Compound::Soft)]);
        let result = comparator.compare(1, &alternative).unwrap();

        // wear integral of n laps at rate r, starting from zero wear
        let wear = |n: u32, rate: f64| rate * f64::from(n * n.saturating_sub(1)) / 2.0;
        let actual = wear(19, 0.05) + 34.0 * -0.6 + wear(34, 0.08);
        let alt = wear(24, 0.05) + 29.0 * -0.6 + wear(29, 0.08);
        assert!((result.time_difference - (alt - actual)).abs() < 1e-6);
    }

    #[test]
    fn recorded_pit_durations_are_normalized_in_static_mode() {
        let race = one_stop_race(1, 40, 90.0, 20, Compound::Hard);
        let tires = TireModel::fallback();
        let comparator = static_comparator(&race, &tires);
        let alternative = Strategy::new(vec![PitStop::new(20, Compound::Hard).with_pit_loss(35.0)]);
        let result = comparator.compare(1, &alternative).unwrap();
        assert!(result.time_difference.abs() < 1e-9);
    }

    #[test]
    fn unmatched_stints_pair_with_nothing() {
        let race = one_stop_race(1, 53, 92.0, 20, Compound::Soft);
        let tires = TireModel::fallback();
        let comparator = static_comparator(&race, &tires);
        let alternative = Strategy::new(vec![
            PitStop::new(15, Compound::Soft),
            PitStop::new(35, Compound::Hard),
        ]);
        let result = comparator.compare(1, &alternative).unwrap();

        assert_eq!(result.stint_comparison.len(), 3);
        let last = &result.stint_comparison[2];
        assert!(last.actual_stint.is_none());
        assert_eq!(last.actual_time, 0.0);
        assert_eq!(last.time_difference, last.alternative_time);
        let summed: f64 = result.stint_comparison.iter().map(|s| s.alternative_time).sum();
        let laps: f64 = result.alternative_lap_times.values().sum();
        assert!((summed - laps).abs() < 1e-9);
    }

    #[test]
    fn stop_after_the_last_timed_lap_is_ignored() {
        // pitted on lap 35, then no more timed laps from 31 on
        let mut laps: Vec<LapRecord> = (1..=30).map(|n| lap(1, n, 90.0)).collect();
        laps.extend((31..=40).map(|n| LapRecord {
            duration: None,
            ..lap(1, n, 0.0)
        }));
        let pits = vec![PitStopRecord {
            driver_id: 1,
            lap_number: 35,
            duration: Some(22.0),
        }];
        let race = RaceData::from_records(vec![DriverInfo::new(1)], laps, pits, Vec::new());
        let tires = TireModel::fallback();
        let comparator = static_comparator(&race, &tires);

        let result = comparator.compare(1, &Strategy::empty()).unwrap();
        assert_eq!(result.actual_strategy.len(), 1);
        assert_eq!(result.stint_comparison.len(), 1);
        assert!(result.time_difference.abs() < 1e-9);
    }

    #[test]
    fn unknown_driver_is_an_error() {
        let race = constant_race(&[1], 10, 90.0);
        let tires = TireModel::fallback();
        let comparator = static_comparator(&race, &tires);
        let err = comparator.compare(99, &Strategy::empty()).unwrap_err();
        assert!(matches!(err, SimError::UnknownDriver(99)));
    }
}
