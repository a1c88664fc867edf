use serde::Serialize;
use std::collections::BTreeMap;
use tracing::{debug, info};

use crate::compare::{ComparisonResult, StrategyComparator};
use crate::strategy::Strategy;

#[derive(Debug, Clone, Serialize)]
pub struct FieldEntry {
    /// 1-based rank by alternative race time.
    pub predicted_position: usize,
    #[serde(flatten)]
    pub comparison: ComparisonResult,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct FieldStats {
    /// Negated sum of time differences; positive when the field got faster.
    pub total_time_saved: f64,
    pub drivers_improved: usize,
    /// Mean time difference, 0.0 for an empty field.
    pub average_improvement: f64,
}

impl FieldStats {
    fn from_entries(entries: &[FieldEntry]) -> Self {
        let diffs: Vec<f64> = entries.iter().map(|e| e.comparison.time_difference).collect();
        let sum: f64 = diffs.iter().sum();
        Self {
            total_time_saved: -sum,
            drivers_improved: diffs.iter().filter(|d| **d < 0.0).count(),
            average_improvement: if diffs.is_empty() { 0.0 } else { sum / diffs.len() as f64 },
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct FieldAnalysis {
    /// Ordered by predicted position.
    pub results: Vec<FieldEntry>,
    pub stats: FieldStats,
}

impl FieldAnalysis {
    pub fn entry(&self, driver_id: u32) -> Option<&FieldEntry> {
        self.results.iter().find(|e| e.comparison.driver_id == driver_id)
    }
}

/// Applies a strategy change to several drivers and predicts the new order.
#[derive(Debug, Clone, Copy)]
pub struct FieldAnalyzer<'a> {
    comparator: StrategyComparator<'a>,
}

impl<'a> FieldAnalyzer<'a> {
    pub fn new(comparator: StrategyComparator<'a>) -> Self {
        Self { comparator }
    }

    /// Drivers the race data does not know are left out.
    pub fn analyze_field(&self, strategies: &BTreeMap<u32, Strategy>) -> FieldAnalysis {
        let mut comparisons: Vec<ComparisonResult> = Vec::with_capacity(strategies.len());
        for (&driver_id, strategy) in strategies {
            match self.comparator.compare(driver_id, strategy) {
                Ok(result) => comparisons.push(result),
                Err(e) => debug!("skipping driver #{driver_id} in field analysis: {e}"),
            }
        }
        comparisons.sort_by(|a, b| a.alternative_total_time.total_cmp(&b.alternative_total_time));

        let results: Vec<FieldEntry> = comparisons
            .into_iter()
            .enumerate()
            .map(|(i, comparison)| FieldEntry {
                predicted_position: i + 1,
                comparison,
            })
            .collect();
        let stats = FieldStats::from_entries(&results);
        FieldAnalysis { results, stats }
    }

    /// Runs [`analyze_field`](Self::analyze_field) for every named scenario.
    pub fn compare_scenarios(
        &self,
        scenarios: &BTreeMap<String, BTreeMap<u32, Strategy>>,
    ) -> BTreeMap<String, FieldAnalysis> {
        scenarios
            .iter()
            .map(|(name, strategies)| {
                info!("analyzing scenario {name} ({} drivers)", strategies.len());
                (name.clone(), self.analyze_field(strategies))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::fixtures::{constant_race, lap};
    use crate::data::{DriverInfo, RaceData};
    use crate::replay::{PitLossMode, RaceReplayEngine, ReplaySettings};
    use crate::strategy::PitStop;
    use crate::tire::{Compound, TireModel};

    static STATIC: PitLossMode = PitLossMode::Static;

    fn analyzer<'a>(race: &'a RaceData, tires: &'a TireModel) -> FieldAnalyzer<'a> {
        let engine = RaceReplayEngine::new(tires, &STATIC, ReplaySettings::default());
        FieldAnalyzer::new(StrategyComparator::new(race, engine, Some(22.0)))
    }

    fn paced_race() -> RaceData {
        // driver 3 is quickest, then 1, then 2
        let pace = [(1, 91.0), (2, 92.0), (3, 90.0)];
        let drivers = pace.iter().map(|&(id, _)| DriverInfo::new(id)).collect();
        let laps = pace
            .iter()
            .flat_map(|&(id, t)| (1..=40).map(move |n| lap(id, n, t)))
            .collect();
        RaceData::from_records(drivers, laps, Vec::new(), Vec::new())
    }

    #[test]
    fn positions_follow_alternative_time() {
        let race = paced_race();
        let tires = TireModel::fallback();
        let one_stop = Strategy::new(vec![PitStop::new(20, Compound::Hard)]);
        let strategies: BTreeMap<u32, Strategy> = [1, 2, 3].into_iter().map(|id| (id, one_stop.clone())).collect();
        let analysis = analyzer(&race, &tires).analyze_field(&strategies);

        let order: Vec<(u32, usize)> = analysis
            .results
            .iter()
            .map(|e| (e.comparison.driver_id, e.predicted_position))
            .collect();
        assert_eq!(order, vec![(3, 1), (1, 2), (2, 3)]);
        assert!(analysis
            .results
            .windows(2)
            .all(|w| w[0].comparison.alternative_total_time < w[1].comparison.alternative_total_time));
    }

    #[test]
    fn unknown_drivers_are_skipped() {
        let race = constant_race(&[1, 2], 30, 90.0);
        let tires = TireModel::fallback();
        let strategies: BTreeMap<u32, Strategy> =
            [(1, Strategy::empty()), (77, Strategy::empty()), (2, Strategy::empty())].into();
        let analysis = analyzer(&race, &tires).analyze_field(&strategies);
        assert_eq!(analysis.results.len(), 2);
        assert!(analysis.entry(77).is_none());
    }

    #[test]
    fn stats_sum_time_differences() {
        let race = constant_race(&[1, 2], 40, 90.0);
        let tires = TireModel::fallback();
        // neither driver pitted, so every stop costs 22s plus fresh-tire gains
        let strategies: BTreeMap<u32, Strategy> = [
            (1, Strategy::empty()),
            (2, Strategy::new(vec![PitStop::new(20, Compound::Soft)])),
        ]
        .into();
        let analysis = analyzer(&race, &tires).analyze_field(&strategies);
        let d2 = analysis.entry(2).unwrap().comparison.time_difference;
        assert_eq!(analysis.entry(1).unwrap().comparison.time_difference, 0.0);
        assert!((analysis.stats.total_time_saved + d2).abs() < 1e-9);
        assert!((analysis.stats.average_improvement - d2 / 2.0).abs() < 1e-9);
        assert_eq!(analysis.stats.drivers_improved, usize::from(d2 < 0.0));
    }

    #[test]
    fn empty_field_has_zero_average() {
        let race = constant_race(&[1], 30, 90.0);
        let tires = TireModel::fallback();
        let analysis = analyzer(&race, &tires).analyze_field(&BTreeMap::new());
        assert!(analysis.results.is_empty());
        assert_eq!(analysis.stats.average_improvement, 0.0);
        assert_eq!(analysis.stats.drivers_improved, 0);
    }

    #[test]
    fn scenarios_are_analyzed_independently() {
        let race = constant_race(&[1, 2], 40, 90.0);
        let tires = TireModel::fallback();
        let early: BTreeMap<u32, Strategy> = [(1, Strategy::new(vec![PitStop::new(12, Compound::Hard)]))].into();
        let scenarios: BTreeMap<String, BTreeMap<u32, Strategy>> = [
            ("as_run".to_owned(), [(1, Strategy::empty()), (2, Strategy::empty())].into()),
            ("early".to_owned(), early),
        ]
        .into();
        let out = analyzer(&race, &tires).compare_scenarios(&scenarios);
        assert_eq!(out["as_run"].results.len(), 2);
        assert_eq!(out["as_run"].stats.total_time_saved, 0.0);
        assert_eq!(out["early"].results.len(), 1);
    }
}
