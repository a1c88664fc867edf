use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::Path;
use tracing::{info, warn};

use crate::error::Result;

/// Tire compound name as it appears in stint records and strategies.
///
/// Anything that is not one of the three dry compounds is kept verbatim in
/// `Other` so it can be reported back, but it performs like `Medium`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Compound {
    Soft,
    Medium,
    Hard,
    Other(String),
}

impl Compound {
    pub const DRY: [Compound; 3] = [Compound::Soft, Compound::Medium, Compound::Hard];

    pub fn parse(name: &str) -> Self {
        match name.trim().to_uppercase().as_str() {
            "SOFT" => Compound::Soft,
            "MEDIUM" => Compound::Medium,
            "HARD" => Compound::Hard,
            _ => Compound::Other(name.trim().to_owned()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Compound::Soft => "SOFT",
            Compound::Medium => "MEDIUM",
            Compound::Hard => "HARD",
            Compound::Other(name) => name,
        }
    }

    pub fn is_dry(&self) -> bool {
        !matches!(self, Compound::Other(_))
    }
}

impl fmt::Display for Compound {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for Compound {
    fn serialize<S: serde::Serializer>(&self, s: S) -> std::result::Result<S::Ok, S::Error> {
        s.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for Compound {
    fn deserialize<D: serde::Deserializer<'de>>(d: D) -> std::result::Result<Self, D::Error> {
        let name = String::deserialize(d)?;
        Ok(Compound::parse(&name))
    }
}

/// Performance coefficients of one compound relative to a fresh MEDIUM.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TireCompound {
    /// Seconds per lap relative to MEDIUM (negative is faster).
    pub performance_delta: f64,
    /// Seconds lost per lap of accumulated wear.
    pub degradation_rate: f64,
    #[serde(alias = "max_stint_length")]
    pub typical_stint_length: u32,
}

impl TireCompound {
    pub const fn new(performance_delta: f64, degradation_rate: f64, typical_stint_length: u32) -> Self {
        Self {
            performance_delta,
            degradation_rate,
            typical_stint_length,
        }
    }

    pub fn fallback(compound: &Compound) -> Self {
        match compound {
            Compound::Soft => Self::new(-0.6, 0.08, 25),
            Compound::Hard => Self::new(0.5, 0.03, 45),
            Compound::Medium | Compound::Other(_) => Self::new(0.0, 0.05, 35),
        }
    }
}

pub const TIRE_COEFFICIENTS_FILE: &str = "tire_coefficients.json";

/// On-disk calibration artifact, [`TIRE_COEFFICIENTS_FILE`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TireCoefficients {
    #[serde(default)]
    pub source: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub generated_at: Option<String>,
    pub tire_compounds: BTreeMap<String, TireCompound>,
}

impl TireCoefficients {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let text = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&text)?)
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TireModelSource {
    Calibrated(String),
    Fallback,
}

#[derive(Debug, Clone)]
pub struct TireModel {
    soft: TireCompound,
    medium: TireCompound,
    hard: TireCompound,
    source: TireModelSource,
}

impl Default for TireModel {
    fn default() -> Self {
        Self::fallback()
    }
}

impl TireModel {
    pub fn fallback() -> Self {
        Self {
            soft: TireCompound::fallback(&Compound::Soft),
            medium: TireCompound::fallback(&Compound::Medium),
            hard: TireCompound::fallback(&Compound::Hard),
            source: TireModelSource::Fallback,
        }
    }

    /// Builds the model from a calibration artifact. Compounds missing from
    /// the artifact keep their static coefficients.
    pub fn from_coefficients(coeffs: &TireCoefficients) -> Self {
        let pick = |compound: Compound| {
            coeffs
                .tire_compounds
                .get(compound.as_str())
                .cloned()
                .unwrap_or_else(|| TireCompound::fallback(&compound))
        };
        Self {
            soft: pick(Compound::Soft),
            medium: pick(Compound::Medium),
            hard: pick(Compound::Hard),
            source: TireModelSource::Calibrated(coeffs.source.clone()),
        }
    }

    /// Loads `tire_coefficients.json` from the data directory, falling back
    /// to the static constants when the file is absent or unreadable.
    pub fn load_or_fallback<P: AsRef<Path>>(data_dir: P) -> Self {
        let path = data_dir.as_ref().join(TIRE_COEFFICIENTS_FILE);
        match TireCoefficients::load(&path) {
            Ok(coeffs) => {
                let model = Self::from_coefficients(&coeffs);
                info!("loaded tire coefficients from {}", coeffs.source);
                for compound in Compound::DRY {
                    let tire = model.compound(&compound);
                    info!(
                        "  {}: {:+.3}s/lap, degradation {:.3}s/lap",
                        compound, tire.performance_delta, tire.degradation_rate
                    );
                }
                model
            }
            Err(e) => {
                warn!("tire coefficients unavailable at {} ({e}), using fallback values", path.display());
                Self::fallback()
            }
        }
    }

    pub fn source(&self) -> &TireModelSource {
        &self.source
    }

    // unknown names resolve to MEDIUM
    pub fn compound(&self, compound: &Compound) -> &TireCompound {
        match compound {
            Compound::Soft => &self.soft,
            Compound::Hard => &self.hard,
            Compound::Medium | Compound::Other(_) => &self.medium,
        }
    }

    /// Lap-time delta of a tire that has already done `laps_on_tire` laps.
    pub fn performance_delta(&self, compound: &Compound, laps_on_tire: u32) -> f64 {
        let tire = self.compound(compound);
        tire.performance_delta + tire.degradation_rate * f64::from(laps_on_tire)
    }
}
