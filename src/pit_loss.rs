//! Multi-factor pit-stop time penalty.
//!
//! A pit loss starts from a base time (circuit-derived when a calibrated
//! circuit model is loaded, flat otherwise) and is multiplied, in order, by
//! a lap factor, a team factor, a situational factor, an optional circuit
//! traffic factor and a seeded random variation. Every intermediate value is
//! kept in a [`PitLossBreakdown`].

use rand::rngs::StdRng;
use rand::SeedableRng;
use rand_distr::{Distribution, Normal};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::circuit::{CircuitEntry, CircuitFactors, ObservedPitLossStats};
use crate::error::{Result, SimError};

pub const ENHANCED_MODEL_FILE: &str = "enhanced_pit_loss_model.json";
pub const BASIC_MODEL_FILE: &str = "dynamic_pit_loss_model.json";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LapRangeFactor {
    /// Inclusive `[first, last]` lap range.
    pub laps: [u32; 2],
    pub factor: f64,
    #[serde(default)]
    pub description: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TeamFactor {
    pub drivers: Vec<u32>,
    pub factor: f64,
    #[serde(default)]
    pub description: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SituationFactor {
    pub factor: f64,
    #[serde(default)]
    pub description: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RandomVariation {
    pub std_dev: f64,
    pub min_factor: f64,
    pub max_factor: f64,
    #[serde(default)]
    pub description: String,
}

/// Pit-loss model as stored in `dynamic_pit_loss_model.json` or
/// `enhanced_pit_loss_model.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PitLossConfig {
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub description: String,
    #[serde(default = "default_base_pit_loss")]
    pub base_pit_loss: f64,
    pub lap_factors: BTreeMap<String, LapRangeFactor>,
    pub team_factors: BTreeMap<String, TeamFactor>,
    pub situation_factors: BTreeMap<String, SituationFactor>,
    pub random_variation: RandomVariation,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub circuits: Option<BTreeMap<String, CircuitEntry>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_circuit: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub calibration_factor: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub circuit_factors: Option<CircuitFactors>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_analysis: Option<ObservedPitLossStats>,
}

fn default_base_pit_loss() -> f64 {
    22.0
}

pub(crate) fn lap_range(first: u32, last: u32, factor: f64, description: &str) -> LapRangeFactor {
    LapRangeFactor {
        laps: [first, last],
        factor,
        description: description.to_owned(),
    }
}

pub(crate) fn team(drivers: &[u32], factor: f64, description: &str) -> TeamFactor {
    TeamFactor {
        drivers: drivers.to_vec(),
        factor,
        description: description.to_owned(),
    }
}

pub(crate) fn situation(factor: f64, description: &str) -> SituationFactor {
    SituationFactor {
        factor,
        description: description.to_owned(),
    }
}

impl Default for PitLossConfig {
    /// Hardcoded model used when no model file is available.
    fn default() -> Self {
        let lap_factors = BTreeMap::from([
            ("early_race".to_owned(), lap_range(1, 15, 1.15, "Heavy traffic in early race")),
            ("mid_race".to_owned(), lap_range(16, 35, 1.0, "Normal traffic conditions")),
            ("late_race".to_owned(), lap_range(36, 60, 0.95, "Light traffic in late race")),
        ]);
        let team_factors = BTreeMap::from([
            ("top_teams".to_owned(), team(&[1, 11, 16, 55, 44, 63], 0.92, "Elite pit crews")),
            ("midfield_teams".to_owned(), team(&[4, 81, 14, 18, 10, 27], 1.0, "Standard pit crews")),
            ("back_teams".to_owned(), team(&[77, 20, 24, 22, 2, 31], 1.08, "Developing pit crews")),
        ]);
        let situation_factors = BTreeMap::from([
            ("safety_car".to_owned(), situation(1.25, "Pit lane congestion during safety car")),
            ("rain".to_owned(), situation(1.15, "Slower operations in wet conditions")),
            ("damaged_car".to_owned(), situation(1.3, "Additional time for damage assessment")),
        ]);
        Self {
            version: "2.0".to_owned(),
            description: "Dynamic pit loss from lap, team and race conditions".to_owned(),
            base_pit_loss: default_base_pit_loss(),
            lap_factors,
            team_factors,
            situation_factors,
            random_variation: RandomVariation {
                std_dev: 1.2,
                min_factor: 0.85,
                max_factor: 1.20,
                description: "Natural variation in pit stop execution".to_owned(),
            },
            circuits: None,
            current_circuit: None,
            calibration_factor: None,
            circuit_factors: None,
            data_analysis: None,
        }
    }
}

impl PitLossConfig {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let text = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&text)?)
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }

    fn validate(&self) -> Result<()> {
        let rv = &self.random_variation;
        if !(rv.std_dev.is_finite() && rv.std_dev >= 0.0) {
            return Err(SimError::PitLoss(format!("invalid random std_dev {}", rv.std_dev)));
        }
        if !(rv.min_factor <= rv.max_factor) {
            return Err(SimError::PitLoss(format!(
                "random bounds out of order: [{}, {}]",
                rv.min_factor, rv.max_factor
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Conditions {
    pub safety_car: bool,
    pub rain: bool,
    pub damaged_car: bool,
}

impl Conditions {
    pub fn safety_car() -> Self {
        Self { safety_car: true, ..Self::default() }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TrafficLevel {
    Low,
    Medium,
    High,
}

impl TrafficLevel {
    /// Pit-lane traffic on a lap. The high bands are the usual pit windows;
    /// under a safety car everybody pits, so traffic is always high.
    pub fn classify(lap_number: u32, conditions: &Conditions) -> Self {
        if conditions.safety_car {
            return TrafficLevel::High;
        }
        match lap_number {
            12..=18 | 20..=25 | 32..=38 => TrafficLevel::High,
            n if n < 10 || n > 45 => TrafficLevel::Low,
            _ => TrafficLevel::Medium,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TrafficLevel::Low => "low",
            TrafficLevel::Medium => "medium",
            TrafficLevel::High => "high",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PitLossBreakdown {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub circuit: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub calibration_factor: Option<f64>,
    pub base_time: f64,
    pub lap_factor: f64,
    pub after_lap_factor: f64,
    pub team_factor: f64,
    pub after_team_factor: f64,
    pub situation_factor: f64,
    pub after_situation_factor: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub traffic_level: Option<TrafficLevel>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub circuit_traffic_factor: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub after_circuit_factor: Option<f64>,
    pub random_factor: f64,
    pub final_time: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PitLossEstimate {
    /// Final penalty rounded to two decimals.
    pub seconds: f64,
    pub breakdown: PitLossBreakdown,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PitLossSource {
    Enhanced(PathBuf),
    Basic(PathBuf),
    Default,
}

impl fmt::Display for PitLossSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PitLossSource::Enhanced(p) => write!(f, "enhanced circuit-aware model ({})", p.display()),
            PitLossSource::Basic(p) => write!(f, "basic dynamic model ({})", p.display()),
            PitLossSource::Default => f.write_str("built-in default model"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct PitLossModel {
    config: PitLossConfig,
    enhanced: bool,
    source: PitLossSource,
}

impl Default for PitLossModel {
    fn default() -> Self {
        Self {
            config: PitLossConfig::default(),
            enhanced: false,
            source: PitLossSource::Default,
        }
    }
}

fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}

impl PitLossModel {
    /// Wraps a config. `enhanced` enables the circuit base time and traffic factor.
    pub fn from_config(config: PitLossConfig, enhanced: bool) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            enhanced,
            source: PitLossSource::Default,
        })
    }

    /// Tries the enhanced model file, then the basic one, then the built-in default.
    pub fn load<P: AsRef<Path>>(data_dir: P) -> Self {
        let dir = data_dir.as_ref();
        for (file, enhanced) in [(ENHANCED_MODEL_FILE, true), (BASIC_MODEL_FILE, false)] {
            let path = dir.join(file);
            if !path.exists() {
                continue;
            }
            match PitLossConfig::load(&path).and_then(|cfg| Self::from_config(cfg, enhanced)) {
                Ok(mut model) => {
                    model.source = if enhanced {
                        PitLossSource::Enhanced(path)
                    } else {
                        PitLossSource::Basic(path)
                    };
                    info!("loaded {}", model.source);
                    return model;
                }
                Err(e) => warn!("ignoring pit loss model {}: {e}", path.display()),
            }
        }
        warn!("no pit loss model found in {}, using built-in default", dir.display());
        Self::default()
    }

    pub fn config(&self) -> &PitLossConfig {
        &self.config
    }

    pub fn source(&self) -> &PitLossSource {
        &self.source
    }

    pub fn is_enhanced(&self) -> bool {
        self.enhanced
    }

    fn current_circuit(&self) -> Option<(&str, &CircuitEntry)> {
        if !self.enhanced {
            return None;
        }
        let key = self.config.current_circuit.as_deref().unwrap_or("suzuka");
        self.config.circuits.as_ref()?.get(key).map(|c| (key, c))
    }

    fn lap_factor(&self, lap_number: u32) -> f64 {
        let matched = self
            .config
            .lap_factors
            .values()
            .find(|r| r.laps[0] <= lap_number && lap_number <= r.laps[1]);
        match matched {
            Some(range) => range.factor,
            None => self.config.lap_factors.get("mid_race").map_or(1.0, |r| r.factor),
        }
    }

    fn team_factor(&self, driver_id: u32) -> f64 {
        let matched = self
            .config
            .team_factors
            .values()
            .find(|t| t.drivers.contains(&driver_id));
        match matched {
            Some(group) => group.factor,
            None => self.config.team_factors.get("midfield_teams").map_or(1.0, |t| t.factor),
        }
    }

    fn situation_factor(&self, conditions: &Conditions) -> f64 {
        let factor_of = |key: &str| self.config.situation_factors.get(key).map_or(1.0, |s| s.factor);
        let mut factor = 1.0;
        if conditions.safety_car {
            factor *= factor_of("safety_car");
        }
        if conditions.rain {
            factor *= factor_of("rain");
        }
        if conditions.damaged_car {
            factor *= factor_of("damaged_car");
        }
        factor
    }

    fn traffic_factor(&self, lap_number: u32, conditions: &Conditions) -> Option<(TrafficLevel, f64)> {
        if !self.enhanced {
            return None;
        }
        let factors = self.config.circuit_factors.as_ref()?;
        let level = TrafficLevel::classify(lap_number, conditions);
        let factor = factors.pit_lane_traffic.get(level.as_str()).copied().unwrap_or(1.0);
        Some((level, factor))
    }

    /// Normal variation around 1.0 drawn from a generator seeded with
    /// `driver_id * 100 + lap_number`, so the same stop always costs the same.
    fn random_factor(&self, driver_id: u32, lap_number: u32) -> Result<f64> {
        let rv = &self.config.random_variation;
        // bounds are treated as a six-sigma range
        let normal = Normal::new(1.0, rv.std_dev / 6.0)
            .map_err(|e| SimError::PitLoss(format!("random variation: {e}")))?;
        let seed = u64::from(driver_id) * 100 + u64::from(lap_number);
        let mut rng = StdRng::seed_from_u64(seed);
        let sample: f64 = normal.sample(&mut rng);
        Ok(sample.clamp(rv.min_factor, rv.max_factor))
    }

    pub fn pit_loss(&self, driver_id: u32, lap_number: u32, conditions: &Conditions) -> Result<PitLossEstimate> {
        let circuit_base = self.current_circuit().and_then(|(key, entry)| {
            entry.theoretical_calculation.as_ref().map(|t| (key, t.total_pit_loss))
        });
        let (circuit, calibration_factor, base_time) = match circuit_base {
            Some((key, theoretical)) => {
                let calibration = self.config.calibration_factor.unwrap_or(1.0);
                (Some(key.to_owned()), Some(calibration), theoretical * calibration)
            }
            None => (None, None, self.config.base_pit_loss),
        };

        let lap_factor = self.lap_factor(lap_number);
        let after_lap_factor = base_time * lap_factor;

        let team_factor = self.team_factor(driver_id);
        let after_team_factor = after_lap_factor * team_factor;

        let situation_factor = self.situation_factor(conditions);
        let after_situation_factor = after_team_factor * situation_factor;

        let traffic = self.traffic_factor(lap_number, conditions);
        let after_circuit_factor = traffic.map(|(_, f)| after_situation_factor * f);
        let before_random = after_circuit_factor.unwrap_or(after_situation_factor);

        let random_factor = self.random_factor(driver_id, lap_number)?;
        let final_time = before_random * random_factor;
        if !final_time.is_finite() {
            return Err(SimError::PitLoss(format!(
                "non-finite pit loss for driver #{driver_id} on lap {lap_number}"
            )));
        }

        Ok(PitLossEstimate {
            seconds: round2(final_time),
            breakdown: PitLossBreakdown {
                circuit,
                calibration_factor,
                base_time,
                lap_factor,
                after_lap_factor,
                team_factor,
                after_team_factor,
                situation_factor,
                after_situation_factor,
                traffic_level: traffic.map(|(level, _)| level),
                circuit_traffic_factor: traffic.map(|(_, f)| f),
                after_circuit_factor,
                random_factor,
                final_time,
            },
        })
    }
}
