use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::tire::Compound;

pub const DEFAULT_PIT_LOSS: f64 = 22.0;

/// One tire change: the car enters the pits on `lap` and leaves on `tire_compound`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PitStop {
    pub lap: u32,
    pub tire_compound: Compound,
    /// Seconds added to race time when the pit loss is not computed dynamically.
    #[serde(default = "default_pit_loss")]
    pub pit_loss: f64,
}

fn default_pit_loss() -> f64 {
    DEFAULT_PIT_LOSS
}

impl PitStop {
    pub fn new(lap: u32, tire_compound: Compound) -> Self {
        Self {
            lap,
            tire_compound,
            pit_loss: DEFAULT_PIT_LOSS,
        }
    }

    pub fn with_pit_loss(mut self, pit_loss: f64) -> Self {
        self.pit_loss = pit_loss;
        self
    }
}

/// Ordered pit stops for one driver. Stops are kept sorted by lap; the sort
/// is stable so stops sharing a lap keep the order they were listed in.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Strategy {
    stops: Vec<PitStop>,
}

impl Strategy {
    pub fn new(mut stops: Vec<PitStop>) -> Self {
        stops.sort_by_key(|s| s.lap);
        Self { stops }
    }

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn stops(&self) -> &[PitStop] {
        &self.stops
    }

    pub fn len(&self) -> usize {
        self.stops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stops.is_empty()
    }

    pub fn with_flat_pit_loss(&self, pit_loss: f64) -> Self {
        Self {
            stops: self
                .stops
                .iter()
                .map(|s| s.clone().with_pit_loss(pit_loss))
                .collect(),
        }
    }

    /// Pit stops keyed by lap. When two stops share a lap the first listed wins.
    pub fn by_lap(&self) -> BTreeMap<u32, &PitStop> {
        let mut map = BTreeMap::new();
        for stop in &self.stops {
            map.entry(stop.lap).or_insert(stop);
        }
        map
    }
}

impl From<Vec<PitStop>> for Strategy {
    fn from(stops: Vec<PitStop>) -> Self {
        Self::new(stops)
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.stops.is_empty() {
            return f.write_str("no stop");
        }
        let parts: Vec<String> = self
            .stops
            .iter()
            .map(|s| format!("L{} {}", s.lap, s.tire_compound))
            .collect();
        f.write_str(&parts.join(" -> "))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Stint {
    pub stint_number: u32,
    pub start_lap: u32,
    pub end_lap: u32,
    pub tire_compound: Compound,
    pub stint_length: u32,
}

impl Stint {
    fn new(stint_number: u32, start_lap: u32, end_lap: u32, tire_compound: Compound) -> Self {
        Self {
            stint_number,
            start_lap,
            end_lap,
            tire_compound,
            stint_length: (end_lap + 1).saturating_sub(start_lap),
        }
    }

    pub fn laps(&self) -> std::ops::RangeInclusive<u32> {
        self.start_lap..=self.end_lap
    }
}

/// Splits `1..=race_length` into stints at the strategy's pit laps.
///
/// The car is assumed to start on MEDIUM. A pit lap belongs to the stint it
/// starts, matching the replay, where the pit lap is already driven on the
/// new tire.
pub fn build_stints(strategy: &Strategy, race_length: u32) -> Vec<Stint> {
    // a stop recorded after the last timed lap (retirement, untimed laps)
    // is never driven by the replay
    let pits: Vec<&PitStop> = strategy
        .by_lap()
        .into_values()
        .filter(|p| p.lap <= race_length)
        .collect();
    let Some(first) = pits.first() else {
        return vec![Stint::new(1, 1, race_length, Compound::Medium)];
    };

    let mut stints = Vec::with_capacity(pits.len() + 1);
    if first.lap > 1 {
        stints.push(Stint::new(1, 1, first.lap - 1, Compound::Medium));
    }
    for (i, pit) in pits.iter().enumerate() {
        let end_lap = match pits.get(i + 1) {
            Some(next) => next.lap - 1,
            None => race_length,
        };
        let number = stints.len() as u32 + 1;
        stints.push(Stint::new(number, pit.lap, end_lap, pit.tire_compound.clone()));
    }
    stints
}

/// Sum of the lap times that fall inside the stint; absent laps count as zero.
pub fn stint_time(stint: &Stint, lap_times: &BTreeMap<u32, f64>) -> f64 {
    if stint.start_lap > stint.end_lap {
        return 0.0;
    }
    lap_times.range(stint.laps()).map(|(_, t)| t).sum()
}
