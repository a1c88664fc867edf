//! Circuit pit-lane characteristics and the calibrated, circuit-aware pit-loss model.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::info;

use crate::data::RaceData;
use crate::error::{Result, SimError};
use crate::pit_loss::{lap_range, situation, team, PitLossConfig, RandomVariation};

/// Modern pit-stop stationary time, seconds.
const PIT_WORK_TIME: f64 = 2.3;
/// Seconds lost per unit of entry/exit complexity above 1.0.
const COMPLEXITY_PENALTY: f64 = 2.0;

#[derive(Debug, Clone, PartialEq)]
pub struct CircuitCharacteristics {
    pub name: &'static str,
    pub pit_lane_length: f64,
    pub pit_speed_limit: u32,
    /// 1.0 is a simple entry, 2.0 a very tight one.
    pub pit_entry_complexity: f64,
    pub pit_exit_complexity: f64,
    /// Seconds lost to cars staying out while the pit lane is traversed.
    pub track_position_loss: f64,
}

pub const CIRCUIT_KEYS: [&str; 5] = ["suzuka", "monaco", "silverstone", "monza", "spa"];

impl CircuitCharacteristics {
    pub fn builtin(key: &str) -> Option<Self> {
        let c = match key {
            "suzuka" => Self {
                name: "Suzuka International Racing Course",
                pit_lane_length: 310.0,
                pit_speed_limit: 80,
                pit_entry_complexity: 1.3,
                pit_exit_complexity: 1.1,
                track_position_loss: 18.0,
            },
            "monaco" => Self {
                name: "Circuit de Monaco",
                pit_lane_length: 350.0,
                pit_speed_limit: 60,
                pit_entry_complexity: 1.8,
                pit_exit_complexity: 2.0,
                track_position_loss: 22.5,
            },
            "silverstone" => Self {
                name: "Silverstone Circuit",
                pit_lane_length: 415.0,
                pit_speed_limit: 80,
                pit_entry_complexity: 1.0,
                pit_exit_complexity: 1.2,
                track_position_loss: 19.5,
            },
            "monza" => Self {
                name: "Autodromo Nazionale Monza",
                pit_lane_length: 385.0,
                pit_speed_limit: 80,
                pit_entry_complexity: 1.1,
                pit_exit_complexity: 1.0,
                track_position_loss: 16.5,
            },
            "spa" => Self {
                name: "Circuit de Spa-Francorchamps",
                pit_lane_length: 425.0,
                pit_speed_limit: 80,
                pit_entry_complexity: 1.2,
                pit_exit_complexity: 1.4,
                track_position_loss: 21.0,
            },
            _ => return None,
        };
        Some(c)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TheoreticalPitTime {
    pub traverse_time: f64,
    pub entry_penalty: f64,
    pub exit_penalty: f64,
    pub pit_work_time: f64,
    pub total_pit_lane_time: f64,
    pub track_position_loss: f64,
    pub total_pit_loss: f64,
}

/// Minimum pit loss implied by the pit-lane layout alone.
pub fn theoretical_pit_time(circuit: &CircuitCharacteristics) -> TheoreticalPitTime {
    let speed_limit_ms = f64::from(circuit.pit_speed_limit) / 3.6;
    let traverse_time = circuit.pit_lane_length / speed_limit_ms;
    let entry_penalty = (circuit.pit_entry_complexity - 1.0) * COMPLEXITY_PENALTY;
    let exit_penalty = (circuit.pit_exit_complexity - 1.0) * COMPLEXITY_PENALTY;
    let total_pit_lane_time = traverse_time + entry_penalty + exit_penalty + PIT_WORK_TIME;
    TheoreticalPitTime {
        traverse_time,
        entry_penalty,
        exit_penalty,
        pit_work_time: PIT_WORK_TIME,
        total_pit_lane_time,
        track_position_loss: circuit.track_position_loss,
        total_pit_loss: total_pit_lane_time + circuit.track_position_loss,
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CircuitEntry {
    pub name: String,
    pub pit_lane_length: f64,
    pub pit_speed_limit: u32,
    pub pit_entry_complexity: f64,
    pub pit_exit_complexity: f64,
    pub track_position_loss: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub theoretical_calculation: Option<TheoreticalPitTime>,
}

impl From<&CircuitCharacteristics> for CircuitEntry {
    fn from(c: &CircuitCharacteristics) -> Self {
        Self {
            name: c.name.to_owned(),
            pit_lane_length: c.pit_lane_length,
            pit_speed_limit: c.pit_speed_limit,
            pit_entry_complexity: c.pit_entry_complexity,
            pit_exit_complexity: c.pit_exit_complexity,
            track_position_loss: c.track_position_loss,
            theoretical_calculation: Some(theoretical_pit_time(c)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CircuitFactors {
    /// Multiplier per traffic level: `low`, `medium`, `high`.
    pub pit_lane_traffic: BTreeMap<String, f64>,
    #[serde(default)]
    pub weather_impact: BTreeMap<String, f64>,
}

impl Default for CircuitFactors {
    fn default() -> Self {
        Self {
            pit_lane_traffic: BTreeMap::from([
                ("low".to_owned(), 0.95),
                ("medium".to_owned(), 1.0),
                ("high".to_owned(), 1.15),
            ]),
            weather_impact: BTreeMap::from([
                ("dry".to_owned(), 1.0),
                ("damp".to_owned(), 1.08),
                ("wet".to_owned(), 1.18),
            ]),
        }
    }
}

/// Pit loss read off the lap times around one recorded stop.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ObservedPitLoss {
    pub driver_id: u32,
    pub lap_number: u32,
    pub pit_loss: f64,
    pub pit_lap_time: f64,
    pub avg_lap_time: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObservedPitLossStats {
    pub sample_size: usize,
    pub mean_pit_loss: f64,
    pub median_pit_loss: f64,
    pub std_deviation: f64,
    pub min_pit_loss: f64,
    pub max_pit_loss: f64,
}

impl ObservedPitLossStats {
    pub fn from_observations(obs: &[ObservedPitLoss]) -> Option<Self> {
        if obs.is_empty() {
            return None;
        }
        let mut losses: Vec<f64> = obs.iter().map(|o| o.pit_loss).collect();
        losses.sort_by(f64::total_cmp);
        let n = losses.len();
        let mean = losses.iter().sum::<f64>() / n as f64;
        let median = if n % 2 == 0 {
            (losses[n / 2 - 1] + losses[n / 2]) / 2.0
        } else {
            losses[n / 2]
        };
        // sample standard deviation
        let std_deviation = if n > 1 {
            (losses.iter().map(|l| (l - mean).powi(2)).sum::<f64>() / (n - 1) as f64).sqrt()
        } else {
            0.0
        };
        Some(Self {
            sample_size: n,
            mean_pit_loss: mean,
            median_pit_loss: median,
            std_deviation,
            min_pit_loss: losses[0],
            max_pit_loss: losses[n - 1],
        })
    }
}

/// Estimates each recorded stop's loss as the pit-lap time minus the mean of
/// the timed laps within two laps either side. Estimates outside 10–40 s are
/// discarded as traffic or incidents.
pub fn estimate_observed_pit_losses(race: &RaceData) -> Vec<ObservedPitLoss> {
    let mut estimates = Vec::new();
    for pit in race.all_pit_stops() {
        let window: Vec<(u32, f64)> = race
            .laps(pit.driver_id)
            .iter()
            .filter(|l| l.lap_number + 2 >= pit.lap_number && l.lap_number <= pit.lap_number + 2)
            .filter_map(|l| l.duration.map(|d| (l.lap_number, d)))
            .collect();
        if window.len() < 3 {
            continue;
        }
        let Some(&(_, pit_lap_time)) = window.iter().find(|(n, _)| *n == pit.lap_number) else {
            continue;
        };
        let reference: Vec<f64> = window
            .iter()
            .filter(|(n, _)| *n != pit.lap_number)
            .map(|(_, d)| *d)
            .collect();
        let avg_lap_time = reference.iter().sum::<f64>() / reference.len() as f64;
        let pit_loss = pit_lap_time - avg_lap_time;
        if (10.0..=40.0).contains(&pit_loss) {
            estimates.push(ObservedPitLoss {
                driver_id: pit.driver_id,
                lap_number: pit.lap_number,
                pit_loss,
                pit_lap_time,
                avg_lap_time,
            });
        }
    }
    estimates
}

/// Builds the enhanced, circuit-aware pit-loss model for `circuit_key`,
/// calibrated so that the circuit's theoretical loss matches the median loss
/// observed in `race`.
pub fn build_enhanced_config(race: &RaceData, circuit_key: &str) -> Result<PitLossConfig> {
    let current = CircuitCharacteristics::builtin(circuit_key)
        .ok_or_else(|| SimError::InvalidInput(format!("unknown circuit '{circuit_key}'")))?;

    let circuits: BTreeMap<String, CircuitEntry> = CIRCUIT_KEYS
        .iter()
        .filter_map(|key| CircuitCharacteristics::builtin(key).map(|c| ((*key).to_owned(), CircuitEntry::from(&c))))
        .collect();

    let observed = estimate_observed_pit_losses(race);
    let stats = ObservedPitLossStats::from_observations(&observed);
    let theoretical = theoretical_pit_time(&current).total_pit_loss;
    let calibration_factor = stats.as_ref().map(|s| {
        if theoretical > 0.0 {
            s.median_pit_loss / theoretical
        } else {
            1.0
        }
    });

    match (&stats, calibration_factor) {
        (Some(s), Some(f)) => info!(
            "{}: theoretical pit loss {:.1}s, observed median {:.1}s over {} stops, calibration {:.3}",
            current.name, theoretical, s.median_pit_loss, s.sample_size, f
        ),
        _ => info!("{}: no usable pit stops observed, model left uncalibrated", current.name),
    }

    Ok(PitLossConfig {
        version: "3.0".to_owned(),
        description: "Circuit-aware dynamic pit loss calibrated against observed stops".to_owned(),
        base_pit_loss: 35.0,
        lap_factors: BTreeMap::from([
            ("early_race".to_owned(), lap_range(1, 15, 1.1, "Early race with formation and initial traffic")),
            ("mid_race".to_owned(), lap_range(16, 35, 1.0, "Normal racing conditions")),
            ("late_race".to_owned(), lap_range(36, 60, 0.95, "Late race with reduced traffic")),
        ]),
        team_factors: BTreeMap::from([
            ("top_teams".to_owned(), team(&[1, 11, 16, 55, 44, 63], 0.88, "Elite pit crews")),
            ("midfield_teams".to_owned(), team(&[4, 81, 14, 18, 10, 27], 1.0, "Standard pit crews")),
            ("back_teams".to_owned(), team(&[77, 20, 24, 22, 2, 31], 1.12, "Developing pit crews")),
        ]),
        situation_factors: BTreeMap::from([
            ("safety_car".to_owned(), situation(1.2, "Pit lane congestion during safety car")),
            ("rain".to_owned(), situation(1.15, "Slower operations in wet conditions")),
            ("damaged_car".to_owned(), situation(1.25, "Additional time for damage assessment")),
        ]),
        random_variation: RandomVariation {
            std_dev: 1.0,
            min_factor: 0.9,
            max_factor: 1.15,
            description: "Natural variation in pit stop execution".to_owned(),
        },
        circuits: Some(circuits),
        current_circuit: Some(circuit_key.to_owned()),
        calibration_factor,
        circuit_factors: Some(CircuitFactors::default()),
        data_analysis: stats,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{fixtures::lap, DriverInfo, PitStopRecord};
    use crate::pit_loss::{Conditions, PitLossModel};

    fn race_with_stops(stops: &[(u32, u32, f64)]) -> RaceData {
        // every driver laps at 92s except on their pit laps
        let mut laps = Vec::new();
        let mut pits = Vec::new();
        for &(driver, pit_lap, loss) in stops {
            for n in 1..=30 {
                let t = if n == pit_lap { 92.0 + loss } else { 92.0 };
                laps.push(lap(driver, n, t));
            }
            pits.push(PitStopRecord { driver_id: driver, lap_number: pit_lap, duration: Some(loss) });
        }
        let drivers = stops.iter().map(|s| DriverInfo::new(s.0)).collect();
        RaceData::from_records(drivers, laps, pits, vec![])
    }

    #[test]
    fn suzuka_theoretical_time() {
        let t = theoretical_pit_time(&CircuitCharacteristics::builtin("suzuka").unwrap());
        assert!((t.traverse_time - 310.0 / (80.0 / 3.6)).abs() < 1e-9);
        assert!((t.entry_penalty - 0.6).abs() < 1e-9);
        assert!((t.exit_penalty - 0.2).abs() < 1e-9);
        assert!((t.total_pit_loss - (t.total_pit_lane_time + 18.0)).abs() < 1e-9);
    }

    #[test]
    fn monaco_is_slowest_in_catalog() {
        let monaco = theoretical_pit_time(&CircuitCharacteristics::builtin("monaco").unwrap()).total_pit_loss;
        for key in CIRCUIT_KEYS.iter().filter(|k| **k != "monaco") {
            let other = theoretical_pit_time(&CircuitCharacteristics::builtin(key).unwrap()).total_pit_loss;
            assert!(monaco > other, "{key}");
        }
        assert!(CircuitCharacteristics::builtin("imola").is_none());
    }

    #[test]
    fn observed_losses_filter_outliers() {
        let race = race_with_stops(&[(1, 10, 21.0), (4, 12, 24.0), (77, 15, 55.0), (20, 14, 5.0)]);
        let obs = estimate_observed_pit_losses(&race);
        assert_eq!(obs.len(), 2);
        assert!((obs.iter().find(|o| o.driver_id == 4).unwrap().pit_loss - 24.0).abs() < 1e-9);
    }

    #[test]
    fn stats_use_median_and_sample_std() {
        let race = race_with_stops(&[(1, 10, 20.0), (4, 12, 22.0), (16, 14, 30.0)]);
        let stats = ObservedPitLossStats::from_observations(&estimate_observed_pit_losses(&race)).unwrap();
        assert_eq!(stats.sample_size, 3);
        assert!((stats.median_pit_loss - 22.0).abs() < 1e-9);
        assert!((stats.mean_pit_loss - 24.0).abs() < 1e-9);
        assert!((stats.std_deviation - 28.0_f64.sqrt()).abs() < 1e-9);
    }

    #[test]
    fn enhanced_config_is_calibrated_to_median() {
        let race = race_with_stops(&[(1, 10, 20.0), (4, 12, 22.0), (16, 14, 30.0)]);
        let cfg = build_enhanced_config(&race, "suzuka").unwrap();
        let theoretical = theoretical_pit_time(&CircuitCharacteristics::builtin("suzuka").unwrap()).total_pit_loss;
        assert!((cfg.calibration_factor.unwrap() - 22.0 / theoretical).abs() < 1e-9);

        // calibrated base reproduces the observed median
        let model = PitLossModel::from_config(cfg, true).unwrap();
        let est = model.pit_loss(4, 20, &Conditions::default()).unwrap();
        assert!((est.breakdown.base_time - 22.0).abs() < 1e-9);
    }

    #[test]
    fn enhanced_config_without_stops_is_uncalibrated() {
        let race = RaceData::default();
        let cfg = build_enhanced_config(&race, "monza").unwrap();
        assert_eq!(cfg.calibration_factor, None);
        assert_eq!(cfg.circuits.as_ref().map(BTreeMap::len), Some(5));
        assert!(build_enhanced_config(&race, "nowhere").is_err());
    }
}
