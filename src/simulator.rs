use serde::Serialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::info;

use crate::circuit::build_enhanced_config;
use crate::compare::{ComparisonResult, StrategyComparator};
use crate::config::SimulatorConfig;
use crate::data::RaceData;
use crate::degradation::{self, DegradationReport};
use crate::error::{Result, SimError};
use crate::field::{FieldAnalysis, FieldAnalyzer};
use crate::optimizer::{CancellationToken, OptimizationResult, StrategyOptimizer};
use crate::pit_loss::{Conditions, PitLossConfig, PitLossEstimate, PitLossModel, ENHANCED_MODEL_FILE};
use crate::replay::{self, PitLossMode, RaceReplayEngine, ReplaySettings};
use crate::strategy::Strategy;
use crate::tire::{TireCoefficients, TireModel, TIRE_COEFFICIENTS_FILE};
use crate::validation::{validate_strategy, PitStopRequest};

/// Everything loaded for one race. Built once and only read afterwards, so
/// it can be shared across the optimizer's worker threads.
#[derive(Debug, Clone)]
pub struct RaceContext {
    pub race: RaceData,
    pub tires: TireModel,
    pub pit_loss_model: PitLossModel,
    pub mode: PitLossMode,
    pub config: SimulatorConfig,
}

impl RaceContext {
    pub fn new(race: RaceData, tires: TireModel, pit_loss_model: PitLossModel, config: SimulatorConfig) -> Self {
        let mode = if config.dynamic_pit_loss {
            PitLossMode::Dynamic(pit_loss_model.clone())
        } else {
            PitLossMode::Static
        };
        Self {
            race,
            tires,
            pit_loss_model,
            mode,
            config,
        }
    }
}

/// Entry point for every analysis over one race.
#[derive(Debug, Clone)]
pub struct Simulator {
    ctx: RaceContext,
}

impl Simulator {
    /// Loads race tables and calibration artifacts from `config.data_dir`.
    pub fn load(config: SimulatorConfig) -> Result<Self> {
        let dir = config.data_dir.clone();
        let race = RaceData::load(&dir)?;
        let tires = TireModel::load_or_fallback(&dir);
        let pit_loss_model = if config.dynamic_pit_loss {
            PitLossModel::load(&dir)
        } else {
            PitLossModel::default()
        };
        info!(
            "pit loss mode: {}",
            if config.dynamic_pit_loss { "dynamic" } else { "static" }
        );
        Ok(Self::new(RaceContext::new(race, tires, pit_loss_model, config)))
    }

    pub fn new(ctx: RaceContext) -> Self {
        Self { ctx }
    }

    pub fn context(&self) -> &RaceContext {
        &self.ctx
    }

    pub fn race(&self) -> &RaceData {
        &self.ctx.race
    }

    fn engine(&self) -> RaceReplayEngine<'_> {
        RaceReplayEngine::new(&self.ctx.tires, &self.ctx.mode, ReplaySettings::from(&self.ctx.config))
    }

    pub fn comparator(&self) -> StrategyComparator<'_> {
        let flat = (!self.ctx.mode.is_dynamic()).then_some(self.ctx.config.default_pit_loss);
        StrategyComparator::new(&self.ctx.race, self.engine(), flat)
    }

    fn ensure_driver(&self, driver_id: u32) -> Result<()> {
        if self.ctx.race.has_driver(driver_id) {
            Ok(())
        } else {
            Err(SimError::UnknownDriver(driver_id))
        }
    }

    /// Race length used to bound a driver's submitted stops.
    fn driver_race_length(&self, driver_id: u32) -> u32 {
        replay::race_length(
            &self.ctx.race.baseline_lap_times(driver_id),
            self.ctx.config.fallback_race_length,
        )
    }

    fn validated(&self, driver_id: u32, requests: &[PitStopRequest]) -> Result<Strategy> {
        let race_length = self.driver_race_length(driver_id);
        Ok(validate_strategy(
            driver_id,
            requests,
            Some(race_length),
            self.ctx.config.default_pit_loss,
        )?)
    }

    pub fn get_actual_strategy(&self, driver_id: u32) -> Result<Strategy> {
        self.ensure_driver(driver_id)?;
        Ok(self
            .ctx
            .race
            .actual_strategy(driver_id, self.ctx.config.default_pit_loss))
    }

    /// Validates a submitted strategy, then compares it with the actual race.
    pub fn compare_strategies(&self, driver_id: u32, requests: &[PitStopRequest]) -> Result<ComparisonResult> {
        let alternative = self.validated(driver_id, requests)?;
        self.comparator().compare(driver_id, &alternative)
    }

    pub fn find_optimal_windows(&self, driver_id: u32, max_stops: u32, top_n: usize) -> Result<OptimizationResult> {
        self.find_optimal_windows_with(driver_id, max_stops, top_n, CancellationToken::new())
    }

    pub fn find_optimal_windows_with(
        &self,
        driver_id: u32,
        max_stops: u32,
        top_n: usize,
        cancel: CancellationToken,
    ) -> Result<OptimizationResult> {
        StrategyOptimizer::new(self.comparator(), self.ctx.config.optimizer.clone())
            .with_cancellation(cancel)
            .find_optimal_windows(driver_id, max_stops, top_n)
    }

    fn validated_field(&self, requests: &BTreeMap<u32, Vec<PitStopRequest>>) -> Result<BTreeMap<u32, Strategy>> {
        requests
            .iter()
            .map(|(&id, stops)| Ok((id, self.validated(id, stops)?)))
            .collect()
    }

    /// Malformed strategies fail the whole request; drivers missing from the
    /// race are skipped.
    pub fn analyze_field(&self, requests: &BTreeMap<u32, Vec<PitStopRequest>>) -> Result<FieldAnalysis> {
        let strategies = self.validated_field(requests)?;
        Ok(FieldAnalyzer::new(self.comparator()).analyze_field(&strategies))
    }

    pub fn compare_scenarios(
        &self,
        scenarios: &BTreeMap<String, BTreeMap<u32, Vec<PitStopRequest>>>,
    ) -> Result<BTreeMap<String, FieldAnalysis>> {
        let validated = scenarios
            .iter()
            .map(|(name, field)| Ok((name.clone(), self.validated_field(field)?)))
            .collect::<Result<BTreeMap<_, _>>>()?;
        Ok(FieldAnalyzer::new(self.comparator()).compare_scenarios(&validated))
    }

    pub fn analyze_tire_degradation(&self, driver_id: u32) -> Result<DegradationReport> {
        degradation::analyze_tire_degradation(&self.ctx.race, driver_id)
    }

    /// Pit-loss estimate with its full breakdown, whatever the replay mode.
    pub fn pit_loss(&self, driver_id: u32, lap_number: u32, conditions: &Conditions) -> Result<PitLossEstimate> {
        self.ctx.pit_loss_model.pit_loss(driver_id, lap_number, conditions)
    }
}

/// Calibration artifacts derived from one race.
#[derive(Debug, Clone, Serialize)]
pub struct Calibration {
    pub tires: TireCoefficients,
    pub pit_loss: PitLossConfig,
}

impl Calibration {
    pub fn derive(race: &RaceData, circuit_key: &str) -> Result<Self> {
        Ok(Self {
            tires: degradation::derive_tire_coefficients(race)?,
            pit_loss: build_enhanced_config(race, circuit_key)?,
        })
    }

    /// Writes both artifacts where [`Simulator::load`] looks for them and
    /// returns their paths.
    pub fn save<P: AsRef<Path>>(&self, data_dir: P) -> Result<(PathBuf, PathBuf)> {
        let dir = data_dir.as_ref();
        let tires_path = dir.join(TIRE_COEFFICIENTS_FILE);
        let pit_path = dir.join(ENHANCED_MODEL_FILE);
        self.tires.save(&tires_path)?;
        self.pit_loss.save(&pit_path)?;
        info!("wrote {} and {}", tires_path.display(), pit_path.display());
        Ok((tires_path, pit_path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::fixtures::{constant_race, one_stop_race};
    use crate::pit_loss::PitLossSource;
    use crate::tire::{Compound, TireModelSource};
    use crate::validation::ValidationError;

    fn simulator(race: RaceData, dynamic: bool) -> Simulator {
        let config = SimulatorConfig {
            dynamic_pit_loss: dynamic,
            ..SimulatorConfig::default()
        };
        Simulator::new(RaceContext::new(race, TireModel::fallback(), PitLossModel::default(), config))
    }

    fn req(lap: u32, compound: &str) -> PitStopRequest {
        PitStopRequest {
            lap,
            tire_compound: compound.to_owned(),
            pit_loss: None,
        }
    }

    #[test]
    fn actual_strategy_of_unknown_driver_fails() {
        let sim = simulator(constant_race(&[1], 20, 90.0), false);
        assert!(matches!(sim.get_actual_strategy(9), Err(SimError::UnknownDriver(9))));
        assert!(sim.get_actual_strategy(1).unwrap().is_empty());
    }

    #[test]
    fn submitted_strategy_is_validated_first() {
        let sim = simulator(one_stop_race(1, 53, 92.0, 20, Compound::Soft), false);
        let err = sim.compare_strategies(1, &[req(30, "SOFT"), req(31, "HARD")]).unwrap_err();
        assert!(matches!(err, SimError::Validation(ValidationError::TooClose { .. })));
        let err = sim.compare_strategies(1, &[req(60, "SOFT")]).unwrap_err();
        assert!(matches!(
            err,
            SimError::Validation(ValidationError::BeyondRaceLength { race_length: 53, .. })
        ));
    }

    #[test]
    fn actual_strategy_round_trips_through_compare() {
        let sim = simulator(one_stop_race(1, 53, 92.0, 20, Compound::Soft), false);
        let result = sim.compare_strategies(1, &[req(20, "SOFT")]).unwrap();
        assert!(result.time_difference.abs() < 0.1);
    }

    #[test]
    fn field_rejects_malformed_entries() {
        let sim = simulator(constant_race(&[1, 2], 40, 90.0), true);
        let requests: BTreeMap<u32, Vec<PitStopRequest>> =
            [(1, vec![req(20, "SOFT")]), (2, vec![req(20, "WET")])].into();
        assert!(matches!(
            sim.analyze_field(&requests),
            Err(SimError::Validation(ValidationError::UnknownCompound(_)))
        ));
    }

    #[test]
    fn field_skips_drivers_without_data() {
        let sim = simulator(constant_race(&[1, 2], 40, 90.0), true);
        let requests: BTreeMap<u32, Vec<PitStopRequest>> =
            [(1, vec![req(20, "SOFT")]), (33, vec![req(20, "HARD")])].into();
        let analysis = sim.analyze_field(&requests).unwrap();
        assert_eq!(analysis.results.len(), 1);
        assert_eq!(analysis.results[0].predicted_position, 1);
    }

    #[test]
    fn pit_loss_is_deterministic_and_safety_car_costs_more() {
        let sim = simulator(constant_race(&[1], 40, 90.0), false);
        let calm = sim.pit_loss(1, 28, &Conditions::default()).unwrap();
        assert_eq!(calm, sim.pit_loss(1, 28, &Conditions::default()).unwrap());
        let sc = sim.pit_loss(1, 28, &Conditions::safety_car()).unwrap();
        assert!(sc.seconds > calm.seconds);
    }

    #[test]
    fn loads_from_data_dir_with_fallbacks() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("drivers.csv"),
            "driver_number,broadcast_name,team_name,name_acronym\n1,M VERSTAPPEN,Red Bull Racing,VER\n",
        )
        .unwrap();
        let mut laps = String::from("driver_number,lap_number,lap_duration,is_pit_out_lap\n");
        for n in 1..=30 {
            laps.push_str(&format!("1,{n},91.5,False\n"));
        }
        std::fs::write(dir.path().join("lap_times.csv"), laps).unwrap();

        let sim = Simulator::load(SimulatorConfig::default().with_data_dir(dir.path())).unwrap();
        assert_eq!(sim.context().tires.source(), &TireModelSource::Fallback);
        assert_eq!(sim.context().pit_loss_model.source(), &PitLossSource::Default);
        assert!(sim.context().mode.is_dynamic());
        let best = sim.find_optimal_windows(1, 1, 3).unwrap();
        assert_eq!(best.candidates.len(), 3);
    }

    #[test]
    fn calibration_writes_loadable_artifacts() {
        let dir = tempfile::tempdir().unwrap();
        let race = one_stop_race(1, 40, 95.0, 20, Compound::Hard);
        let calibration = Calibration::derive(&race, "suzuka").unwrap();
        let (tires_path, pit_path) = calibration.save(dir.path()).unwrap();

        let tires = TireModel::from_coefficients(&TireCoefficients::load(tires_path).unwrap());
        assert!(matches!(tires.source(), TireModelSource::Calibrated(_)));
        let model = PitLossModel::load(dir.path());
        assert_eq!(model.source(), &PitLossSource::Enhanced(pit_path));
        assert!(model.is_enhanced());
    }
}
