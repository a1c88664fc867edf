use serde::Serialize;
use std::collections::BTreeMap;
use tracing::warn;

use crate::config::SimulatorConfig;
use crate::pit_loss::{Conditions, PitLossModel};
use crate::strategy::Strategy;
use crate::tire::{Compound, TireModel};

#[derive(Debug, Clone)]
pub enum PitLossMode {
    Static,
    Dynamic(PitLossModel),
}

impl PitLossMode {
    pub fn is_dynamic(&self) -> bool {
        matches!(self, PitLossMode::Dynamic(_))
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReplaySettings {
    pub fallback_race_length: u32,
    pub fallback_lap_time: f64,
    /// Substituted when a dynamic pit-loss calculation fails.
    pub default_pit_loss: f64,
}

impl Default for ReplaySettings {
    fn default() -> Self {
        Self::from(&SimulatorConfig::default())
    }
}

impl From<&SimulatorConfig> for ReplaySettings {
    fn from(cfg: &SimulatorConfig) -> Self {
        Self {
            fallback_race_length: cfg.fallback_race_length,
            fallback_lap_time: cfg.fallback_lap_time,
            default_pit_loss: cfg.default_pit_loss,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SimulationResult {
    pub driver_id: u32,
    pub strategy: Strategy,
    pub race_length: u32,
    pub lap_times: BTreeMap<u32, f64>,
    /// Penalty charged on each pit lap.
    pub pit_losses: BTreeMap<u32, f64>,
    pub total_time: f64,
    pub simulated: bool,
}

// last baseline lap, or the fallback when there are no timed laps
pub fn race_length(baseline: &BTreeMap<u32, f64>, fallback: u32) -> u32 {
    baseline.keys().next_back().copied().unwrap_or(fallback)
}

/// Replays a strategy over a driver's actual lap times.
///
/// Pure function of its inputs: the engine borrows the tire and pit-loss
/// models and owns nothing long-lived, so one engine can be shared by any
/// number of threads.
#[derive(Debug, Clone, Copy)]
pub struct RaceReplayEngine<'a> {
    tires: &'a TireModel,
    pit_loss: &'a PitLossMode,
    settings: ReplaySettings,
}

impl<'a> RaceReplayEngine<'a> {
    pub fn new(tires: &'a TireModel, pit_loss: &'a PitLossMode, settings: ReplaySettings) -> Self {
        Self {
            tires,
            pit_loss,
            settings,
        }
    }

    pub fn settings(&self) -> &ReplaySettings {
        &self.settings
    }

    fn penalty(&self, driver_id: u32, lap: u32, static_loss: f64) -> f64 {
        match self.pit_loss {
            PitLossMode::Static => static_loss,
            PitLossMode::Dynamic(model) => match model.pit_loss(driver_id, lap, &Conditions::default()) {
                Ok(estimate) => estimate.seconds,
                Err(e) => {
                    warn!("{e}, using default pit loss {}s", self.settings.default_pit_loss);
                    self.settings.default_pit_loss
                }
            },
        }
    }

    pub fn replay(&self, driver_id: u32, baseline: &BTreeMap<u32, f64>, strategy: &Strategy) -> SimulationResult {
        let race_length = race_length(baseline, self.settings.fallback_race_length);
        // missing laps are filled with the driver's mean pace
        let fill_time = if baseline.is_empty() {
            self.settings.fallback_lap_time
        } else {
            baseline.values().sum::<f64>() / baseline.len() as f64
        };
        let pits = strategy.by_lap();

        let mut current_tire = Compound::Medium;
        let mut laps_on_tire = 0;
        let mut total_time = 0.0;
        let mut lap_times = BTreeMap::new();
        let mut pit_losses = BTreeMap::new();

        for lap in 1..=race_length {
            // the pit lap is charged first and already driven on the new tire
            if let Some(pit) = pits.get(&lap) {
                let loss = self.penalty(driver_id, lap, pit.pit_loss);
                total_time += loss;
                pit_losses.insert(lap, loss);
                current_tire = pit.tire_compound.clone();
                laps_on_tire = 0;
            }

            let base_time = baseline.get(&lap).copied().unwrap_or(fill_time);
            let lap_time = base_time + self.tires.performance_delta(&current_tire, laps_on_tire);
            lap_times.insert(lap, lap_time);
            total_time += lap_time;
            laps_on_tire += 1;
        }

        SimulationResult {
            driver_id,
            strategy: strategy.clone(),
            race_length,
            lap_times,
            pit_losses,
            total_time,
            simulated: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pit_loss::PitLossConfig;
    use crate::strategy::PitStop;

    fn constant(laps: u32, t: f64) -> BTreeMap<u32, f64> {
        (1..=laps).map(|n| (n, t)).collect()
    }

    fn medium_integral(laps: u32) -> f64 {
        // fallback MEDIUM: 0.0 + 0.05 per lap of wear
        (0..laps).map(|k| 0.05 * f64::from(k)).sum()
    }

    #[test]
    fn empty_strategy_runs_whole_race_on_medium() {
        let tires = TireModel::fallback();
        let mode = PitLossMode::Static;
        let engine = RaceReplayEngine::new(&tires, &mode, ReplaySettings::default());
        let baseline = constant(53, 92.0);
        let result = engine.replay(1, &baseline, &Strategy::empty());

        assert_eq!(result.race_length, 53);
        assert!(result.pit_losses.is_empty());
        let expected = 53.0 * 92.0 + medium_integral(53);
        assert!((result.total_time - expected).abs() < 1e-9);
        assert!(result.simulated);
    }

    #[test]
    fn pit_lap_is_charged_and_driven_on_new_tire() {
        let tires = TireModel::fallback();
        let mode = PitLossMode::Static;
        let engine = RaceReplayEngine::new(&tires, &mode, ReplaySettings::default());
        let baseline = constant(10, 90.0);
        let strategy = Strategy::new(vec![PitStop::new(5, Compound::Soft).with_pit_loss(20.0)]);
        let result = engine.replay(1, &baseline, &strategy);

        // lap 4: MEDIUM with 3 laps of wear; lap 5: fresh SOFT
        assert!((result.lap_times[&4] - (90.0 + 0.15)).abs() < 1e-9);
        assert!((result.lap_times[&5] - (90.0 - 0.6)).abs() < 1e-9);
        assert!((result.lap_times[&6] - (90.0 - 0.6 + 0.08)).abs() < 1e-9);
        assert_eq!(result.pit_losses[&5], 20.0);
        let laps: f64 = result.lap_times.values().sum();
        assert!((result.total_time - laps - 20.0).abs() < 1e-9);
    }

    #[test]
    fn missing_laps_use_mean_of_known_laps() {
        let tires = TireModel::fallback();
        let mode = PitLossMode::Static;
        let engine = RaceReplayEngine::new(&tires, &mode, ReplaySettings::default());
        let baseline: BTreeMap<u32, f64> = [(1, 90.0), (2, 94.0), (4, 92.0)].into();
        let result = engine.replay(1, &baseline, &Strategy::empty());
        assert_eq!(result.race_length, 4);
        assert!((result.lap_times[&3] - (92.0 + 0.10)).abs() < 1e-9);
    }

    #[test]
    fn no_baseline_uses_fallbacks() {
        let tires = TireModel::fallback();
        let mode = PitLossMode::Static;
        let engine = RaceReplayEngine::new(&tires, &mode, ReplaySettings::default());
        let result = engine.replay(7, &BTreeMap::new(), &Strategy::empty());
        assert_eq!(result.race_length, 53);
        assert!((result.lap_times[&1] - 90.0).abs() < 1e-12);
    }

    #[test]
    fn dynamic_mode_prices_stops_with_model() {
        let tires = TireModel::fallback();
        let model = PitLossModel::default();
        let expected = model.pit_loss(44, 20, &Conditions::default()).unwrap().seconds;
        let mode = PitLossMode::Dynamic(model);
        let engine = RaceReplayEngine::new(&tires, &mode, ReplaySettings::default());
        let strategy = Strategy::new(vec![PitStop::new(20, Compound::Hard).with_pit_loss(99.0)]);
        let result = engine.replay(44, &constant(53, 91.0), &strategy);
        assert_eq!(result.pit_losses[&20], expected);
    }

    #[test]
    fn failed_dynamic_calculation_falls_back_to_default() {
        let tires = TireModel::fallback();
        let mut cfg = PitLossConfig::default();
        cfg.base_pit_loss = f64::NAN;
        let mode = PitLossMode::Dynamic(PitLossModel::from_config(cfg, false).unwrap());
        let engine = RaceReplayEngine::new(&tires, &mode, ReplaySettings::default());
        let strategy = Strategy::new(vec![PitStop::new(20, Compound::Hard)]);
        let result = engine.replay(1, &constant(30, 90.0), &strategy);
        assert_eq!(result.pit_losses[&20], 22.0);
    }

    #[test]
    fn two_stops_on_one_lap_charge_once() {
        let tires = TireModel::fallback();
        let mode = PitLossMode::Static;
        let engine = RaceReplayEngine::new(&tires, &mode, ReplaySettings::default());
        let strategy = Strategy::new(vec![
            PitStop::new(10, Compound::Soft).with_pit_loss(21.0),
            PitStop::new(10, Compound::Hard).with_pit_loss(25.0),
        ]);
        let result = engine.replay(1, &constant(20, 90.0), &strategy);
        assert_eq!(result.pit_losses.len(), 1);
        assert_eq!(result.pit_losses[&10], 21.0);
        assert!((result.lap_times[&10] - 89.4).abs() < 1e-9);
    }

    #[test]
    fn stop_beyond_race_length_is_never_reached() {
        let tires = TireModel::fallback();
        let mode = PitLossMode::Static;
        let engine = RaceReplayEngine::new(&tires, &mode, ReplaySettings::default());
        let baseline = constant(20, 90.0);
        let with = engine.replay(1, &baseline, &Strategy::new(vec![PitStop::new(40, Compound::Soft)]));
        let without = engine.replay(1, &baseline, &Strategy::empty());
        assert_eq!(with.total_time, without.total_time);
    }
}
