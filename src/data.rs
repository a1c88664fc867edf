use csv::ReaderBuilder;
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use tracing::{info, warn};

use crate::error::Result;
use crate::strategy::{PitStop, Strategy};
use crate::tire::Compound;

// column layouts of the exported race tables. numeric columns come out of
// pandas as floats whenever the column had a gap, so they are read as f64 and rounded.
#[derive(Debug, Deserialize)]
struct RawLap {
    driver_number: f64,
    lap_number: f64,
    #[serde(default, deserialize_with = "csv::invalid_option")]
    lap_duration: Option<f64>,
    #[serde(default, deserialize_with = "loose_bool")]
    is_pit_out_lap: bool,
}

#[derive(Debug, Deserialize)]
struct RawPitStop {
    driver_number: f64,
    lap_number: f64,
    #[serde(default, deserialize_with = "csv::invalid_option")]
    pit_duration: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct RawStint {
    driver_number: f64,
    compound: String,
    #[serde(default, deserialize_with = "csv::invalid_option")]
    lap_start: Option<f64>,
    #[serde(default, deserialize_with = "csv::invalid_option")]
    lap_end: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct RawDriver {
    driver_number: f64,
    #[serde(default)]
    broadcast_name: Option<String>,
    #[serde(default)]
    full_name: Option<String>,
    #[serde(default)]
    team_name: Option<String>,
    #[serde(default)]
    name_acronym: Option<String>,
}

// pandas writes True/False, other exporters write true/1
fn loose_bool<'de, D: Deserializer<'de>>(d: D) -> std::result::Result<bool, D::Error> {
    let raw = Option::<String>::deserialize(d)?;
    Ok(matches!(
        raw.as_deref().map(str::trim),
        Some("True" | "true" | "TRUE" | "1" | "1.0")
    ))
}

/// One recorded lap. A missing duration means no time was set, not zero.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LapRecord {
    pub driver_id: u32,
    pub lap_number: u32,
    pub duration: Option<f64>,
    pub is_pit_out_lap: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PitStopRecord {
    pub driver_id: u32,
    pub lap_number: u32,
    /// Recorded pit duration in seconds.
    pub duration: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StintRecord {
    pub driver_id: u32,
    pub compound: Compound,
    pub lap_start: Option<u32>,
    pub lap_end: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DriverInfo {
    pub driver_id: u32,
    pub name: Option<String>,
    pub team: Option<String>,
    pub abbreviation: Option<String>,
}

impl DriverInfo {
    pub fn new(driver_id: u32) -> Self {
        Self {
            driver_id,
            name: None,
            team: None,
            abbreviation: None,
        }
    }
}

/// The race as it actually happened, grouped by driver. Immutable once built.
///
/// The exported tables are lap-based rather than driver-based, so everything
/// is regrouped per driver and sorted by lap on the way in.
#[derive(Debug, Clone, Default)]
pub struct RaceData {
    drivers: BTreeMap<u32, DriverInfo>,
    laps: BTreeMap<u32, Vec<LapRecord>>,
    pit_stops: BTreeMap<u32, Vec<PitStopRecord>>,
    stints: BTreeMap<u32, Vec<StintRecord>>,
}

fn to_u32(v: f64) -> u32 {
    v.round().max(0.0) as u32
}

fn read_csv<T, P>(path: P) -> Result<Vec<T>>
where
    T: for<'de> Deserialize<'de>,
    P: AsRef<Path>,
{
    let mut reader = ReaderBuilder::new().has_headers(true).from_path(path)?;
    let mut rows = Vec::new();
    for res in reader.deserialize() {
        rows.push(res?);
    }
    Ok(rows)
}

// pit stops and stints are missing for some sessions; the race is still usable without them
fn read_optional_csv<T>(path: &Path) -> Result<Vec<T>>
where
    T: for<'de> Deserialize<'de>,
{
    if path.exists() {
        read_csv(path)
    } else {
        warn!("{} not found, treating it as empty", path.display());
        Ok(Vec::new())
    }
}

impl RaceData {
    // drivers.csv, lap_times.csv, pit_stops.csv, stints.csv
    pub fn load<P: AsRef<Path>>(dir: P) -> Result<Self> {
        let dir = dir.as_ref();

        let drivers = read_csv::<RawDriver, _>(dir.join("drivers.csv"))?
            .into_iter()
            .map(|raw| DriverInfo {
                driver_id: to_u32(raw.driver_number),
                name: raw.broadcast_name.or(raw.full_name),
                team: raw.team_name,
                abbreviation: raw.name_acronym,
            })
            .collect();

        let laps = read_csv::<RawLap, _>(dir.join("lap_times.csv"))?
            .into_iter()
            .filter(|raw| raw.lap_number >= 1.0)
            .map(|raw| LapRecord {
                driver_id: to_u32(raw.driver_number),
                lap_number: to_u32(raw.lap_number),
                duration: raw.lap_duration.filter(|d| d.is_finite() && *d > 0.0),
                is_pit_out_lap: raw.is_pit_out_lap,
            })
            .collect();

        let pit_stops = read_optional_csv::<RawPitStop>(&dir.join("pit_stops.csv"))?
            .into_iter()
            .map(|raw| PitStopRecord {
                driver_id: to_u32(raw.driver_number),
                lap_number: to_u32(raw.lap_number),
                duration: raw.pit_duration.filter(|d| d.is_finite()),
            })
            .collect();

        let stints = read_optional_csv::<RawStint>(&dir.join("stints.csv"))?
            .into_iter()
            .map(|raw| StintRecord {
                driver_id: to_u32(raw.driver_number),
                compound: Compound::parse(&raw.compound),
                lap_start: raw.lap_start.map(to_u32),
                lap_end: raw.lap_end.map(to_u32),
            })
            .collect();

        let race = Self::from_records(drivers, laps, pit_stops, stints);
        info!(
            "loaded data for {} drivers, race length {} laps",
            race.drivers.len(),
            race.race_length().unwrap_or(0)
        );
        Ok(race)
    }

    pub fn from_records(
        drivers: Vec<DriverInfo>,
        laps: Vec<LapRecord>,
        pit_stops: Vec<PitStopRecord>,
        stints: Vec<StintRecord>,
    ) -> Self {
        let mut race = RaceData::default();
        for d in drivers {
            race.drivers.insert(d.driver_id, d);
        }
        for lap in laps {
            race.laps.entry(lap.driver_id).or_default().push(lap);
        }
        for pit in pit_stops {
            race.pit_stops.entry(pit.driver_id).or_default().push(pit);
        }
        for stint in stints {
            race.stints.entry(stint.driver_id).or_default().push(stint);
        }
        race.laps.values_mut().for_each(|l| l.sort_by_key(|r| r.lap_number));
        race.pit_stops.values_mut().for_each(|p| p.sort_by_key(|r| r.lap_number));
        race.stints.values_mut().for_each(|s| s.sort_by_key(|r| r.lap_start));
        race
    }

    pub fn drivers(&self) -> impl Iterator<Item = &DriverInfo> {
        self.drivers.values()
    }

    pub fn driver(&self, driver_id: u32) -> Option<&DriverInfo> {
        self.drivers.get(&driver_id)
    }

    /// A driver is known if listed in the driver table or present in the lap data.
    pub fn has_driver(&self, driver_id: u32) -> bool {
        self.drivers.contains_key(&driver_id) || self.laps.contains_key(&driver_id)
    }

    pub fn driver_ids(&self) -> Vec<u32> {
        let mut ids: Vec<u32> = self.drivers.keys().chain(self.laps.keys()).copied().collect();
        ids.sort_unstable();
        ids.dedup();
        ids
    }

    pub fn laps(&self, driver_id: u32) -> &[LapRecord] {
        self.laps.get(&driver_id).map_or(&[], Vec::as_slice)
    }

    pub fn pit_stops(&self, driver_id: u32) -> &[PitStopRecord] {
        self.pit_stops.get(&driver_id).map_or(&[], Vec::as_slice)
    }

    pub fn all_pit_stops(&self) -> impl Iterator<Item = &PitStopRecord> {
        self.pit_stops.values().flatten()
    }

    pub fn stints(&self, driver_id: u32) -> &[StintRecord] {
        self.stints.get(&driver_id).map_or(&[], Vec::as_slice)
    }

    pub fn all_stints(&self) -> impl Iterator<Item = &StintRecord> {
        self.stints.values().flatten()
    }

    pub fn race_length(&self) -> Option<u32> {
        self.laps.values().flatten().map(|l| l.lap_number).max()
    }

    /// Timed laps of a driver that were not pit-out laps, keyed by lap number.
    pub fn baseline_lap_times(&self, driver_id: u32) -> BTreeMap<u32, f64> {
        self.laps(driver_id)
            .iter()
            .filter(|l| !l.is_pit_out_lap)
            .filter_map(|l| l.duration.map(|d| (l.lap_number, d)))
            .collect()
    }

    /// Rebuilds the strategy the driver actually ran.
    ///
    /// The compound of each stop is taken from the latest stint starting at or
    /// before the pit lap; without one, MEDIUM is assumed. A stop without a
    /// recorded duration is charged `default_pit_loss`.
    pub fn actual_strategy(&self, driver_id: u32, default_pit_loss: f64) -> Strategy {
        let stints = self.stints(driver_id);
        let stops = self
            .pit_stops(driver_id)
            .iter()
            .map(|pit| {
                let compound = stints
                    .iter()
                    .filter(|s| s.lap_start.is_some_and(|start| start <= pit.lap_number))
                    .max_by_key(|s| s.lap_start)
                    .map_or(Compound::Medium, |s| s.compound.clone());
                PitStop::new(pit.lap_number, compound)
                    .with_pit_loss(pit.duration.unwrap_or(default_pit_loss))
            })
            .collect();
        Strategy::new(stops)
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;

    pub fn lap(driver_id: u32, lap_number: u32, duration: f64) -> LapRecord {
        LapRecord {
            driver_id,
            lap_number,
            duration: Some(duration),
            is_pit_out_lap: false,
        }
    }

    /// `laps` laps at a constant `lap_time` for each driver, no pit records.
    pub fn constant_race(driver_ids: &[u32], laps: u32, lap_time: f64) -> RaceData {
        let drivers = driver_ids.iter().map(|&id| DriverInfo::new(id)).collect();
        let records = driver_ids
            .iter()
            .flat_map(|&id| (1..=laps).map(move |n| lap(id, n, lap_time)))
            .collect();
        RaceData::from_records(drivers, records, Vec::new(), Vec::new())
    }

    /// Constant-pace race where `driver_id` pitted once at `pit_lap` onto `compound`.
    pub fn one_stop_race(driver_id: u32, laps: u32, lap_time: f64, pit_lap: u32, compound: Compound) -> RaceData {
        let records = (1..=laps).map(|n| lap(driver_id, n, lap_time)).collect();
        let pits = vec![PitStopRecord {
            driver_id,
            lap_number: pit_lap,
            duration: Some(22.0),
        }];
        let stints = vec![
            StintRecord {
                driver_id,
                compound: Compound::Medium,
                lap_start: Some(1),
                lap_end: Some(pit_lap - 1),
            },
            StintRecord {
                driver_id,
                compound,
                lap_start: Some(pit_lap),
                lap_end: Some(laps),
            },
        ];
        RaceData::from_records(vec![DriverInfo::new(driver_id)], records, pits, stints)
    }
}

#[cfg(test)]
mod tests {
    use super::fixtures::*;
    use super::*;
    use std::fs;

    #[test]
    fn baseline_skips_pit_out_and_untimed_laps() {
        let laps = vec![
            lap(1, 1, 95.0),
            LapRecord { duration: None, ..lap(1, 2, 0.0) },
            LapRecord { is_pit_out_lap: true, ..lap(1, 3, 115.0) },
            lap(1, 4, 93.0),
        ];
        let race = RaceData::from_records(vec![], laps, vec![], vec![]);
        let baseline = race.baseline_lap_times(1);
        assert_eq!(baseline.keys().copied().collect::<Vec<_>>(), vec![1, 4]);
        assert!(race.has_driver(1));
        assert!(!race.has_driver(2));
    }

    #[test]
    fn actual_strategy_uses_latest_matching_stint() {
        let race = RaceData::from_records(
            vec![DriverInfo::new(16)],
            vec![],
            vec![
                PitStopRecord { driver_id: 16, lap_number: 30, duration: None },
                PitStopRecord { driver_id: 16, lap_number: 12, duration: Some(23.4) },
            ],
            vec![
                StintRecord { driver_id: 16, compound: Compound::Soft, lap_start: Some(1), lap_end: Some(11) },
                StintRecord { driver_id: 16, compound: Compound::Hard, lap_start: Some(12), lap_end: Some(29) },
                StintRecord { driver_id: 16, compound: Compound::Soft, lap_start: None, lap_end: None },
            ],
        );
        let strategy = race.actual_strategy(16, 22.0);
        let stops = strategy.stops();
        assert_eq!(stops.len(), 2);
        assert_eq!((stops[0].lap, &stops[0].tire_compound, stops[0].pit_loss), (12, &Compound::Hard, 23.4));
        assert_eq!((stops[1].lap, &stops[1].tire_compound, stops[1].pit_loss), (30, &Compound::Hard, 22.0));
    }

    #[test]
    fn pit_without_stint_defaults_to_medium() {
        let race = RaceData::from_records(
            vec![],
            vec![],
            vec![PitStopRecord { driver_id: 4, lap_number: 20, duration: Some(21.0) }],
            vec![],
        );
        assert_eq!(race.actual_strategy(4, 22.0).stops()[0].tire_compound, Compound::Medium);
    }

    #[test]
    fn loads_exported_tables() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join("drivers.csv"),
            "driver_number,broadcast_name,team_name,name_acronym\n1,M VERSTAPPEN,Red Bull Racing,VER\n",
        )
        .unwrap();
        fs::write(
            dir.path().join("lap_times.csv"),
            "driver_number,lap_number,lap_duration,is_pit_out_lap\n\
             1,1,,False\n1,2,95.5,False\n1,3.0,113.2,True\n1,4,94.9,False\n",
        )
        .unwrap();
        fs::write(
            dir.path().join("stints.csv"),
            "driver_number,stint_number,compound,lap_start,lap_end\n1,1,MEDIUM,1,2\n1,2,hard,3,4\n",
        )
        .unwrap();

        let race = RaceData::load(dir.path()).unwrap();
        assert_eq!(race.driver(1).and_then(|d| d.name.as_deref()), Some("M VERSTAPPEN"));
        assert_eq!(race.race_length(), Some(4));
        assert_eq!(race.laps(1)[0].duration, None);
        assert!(race.laps(1)[2].is_pit_out_lap);
        assert_eq!(race.baseline_lap_times(1).len(), 2);
        assert_eq!(race.stints(1)[1].compound, Compound::Hard);
        assert!(race.pit_stops(1).is_empty());
    }

    #[test]
    fn missing_lap_table_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(RaceData::load(dir.path()).is_err());
    }
}
