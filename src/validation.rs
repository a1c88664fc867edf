use serde::Deserialize;
use std::str::FromStr;
use thiserror::Error;

use crate::strategy::{PitStop, Strategy};
use crate::tire::Compound;

pub const MAX_STOPS: usize = 4;
pub const MIN_STOP_GAP: u32 = 3;
pub const PIT_LOSS_RANGE: std::ops::RangeInclusive<f64> = 15.0..=40.0;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    #[error("driver number {0} outside 1..=99")]
    DriverOutOfRange(u32),

    #[error("pit lap {0} outside 1..=100")]
    LapOutOfRange(u32),

    #[error("pit lap {lap} is beyond the race length of {race_length} laps")]
    BeyondRaceLength { lap: u32, race_length: u32 },

    #[error("unknown tire compound {0:?}, expected SOFT, MEDIUM or HARD")]
    UnknownCompound(String),

    #[error("pit loss {0}s outside 15..=40s")]
    PitLossOutOfRange(f64),

    #[error("{0} pit stops requested, at most 4 allowed")]
    TooManyStops(usize),

    #[error("pit stops must be in chronological order (lap {lap} after lap {previous})")]
    NotChronological { previous: u32, lap: u32 },

    #[error("pit stops on laps {previous} and {lap} are less than 3 laps apart")]
    TooClose { previous: u32, lap: u32 },

    #[error("malformed pit stop {0:?}, expected LAP:COMPOUND[:PIT_LOSS]")]
    Malformed(String),
}

/// A pit stop as a caller submits it, before any checks.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct PitStopRequest {
    pub lap: u32,
    pub tire_compound: String,
    #[serde(default)]
    pub pit_loss: Option<f64>,
}

impl FromStr for PitStopRequest {
    type Err = ValidationError;

    /// `LAP:COMPOUND` or `LAP:COMPOUND:PIT_LOSS`, e.g. `15:SOFT:21.5`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let malformed = || ValidationError::Malformed(s.to_owned());
        let mut parts = s.trim().split(':');
        let lap = parts.next().and_then(|p| p.trim().parse().ok()).ok_or_else(malformed)?;
        let tire_compound = parts
            .next()
            .map(str::trim)
            .filter(|c| !c.is_empty())
            .ok_or_else(malformed)?
            .to_owned();
        let pit_loss = match parts.next() {
            Some(p) => Some(p.trim().parse().map_err(|_| malformed())?),
            None => None,
        };
        if parts.next().is_some() {
            return Err(malformed());
        }
        Ok(Self {
            lap,
            tire_compound,
            pit_loss,
        })
    }
}

/// Parses a comma-separated list such as `15:SOFT,35:MEDIUM`. An empty
/// string is the no-stop strategy.
pub fn parse_pit_stops(list: &str) -> Result<Vec<PitStopRequest>, ValidationError> {
    list.split(',')
        .filter(|s| !s.trim().is_empty())
        .map(str::parse)
        .collect()
}

/// Checks a submitted strategy and turns it into a [`Strategy`].
///
/// Stops must be in lap order and at least three laps apart, so a
/// duplicate lap is rejected here. `race_length`, when known, bounds the
/// last stop.
pub fn validate_strategy(
    driver_id: u32,
    requests: &[PitStopRequest],
    race_length: Option<u32>,
    default_pit_loss: f64,
) -> Result<Strategy, ValidationError> {
    if !(1..=99).contains(&driver_id) {
        return Err(ValidationError::DriverOutOfRange(driver_id));
    }
    if requests.len() > MAX_STOPS {
        return Err(ValidationError::TooManyStops(requests.len()));
    }

    let mut stops = Vec::with_capacity(requests.len());
    let mut previous: Option<u32> = None;
    for req in requests {
        if !(1..=100).contains(&req.lap) {
            return Err(ValidationError::LapOutOfRange(req.lap));
        }
        if let Some(race_length) = race_length.filter(|&n| req.lap > n) {
            return Err(ValidationError::BeyondRaceLength { lap: req.lap, race_length });
        }
        let compound = Compound::parse(&req.tire_compound);
        if !compound.is_dry() {
            return Err(ValidationError::UnknownCompound(req.tire_compound.clone()));
        }
        let pit_loss = req.pit_loss.unwrap_or(default_pit_loss);
        if !PIT_LOSS_RANGE.contains(&pit_loss) {
            return Err(ValidationError::PitLossOutOfRange(pit_loss));
        }
        if let Some(prev) = previous {
            if req.lap < prev {
                return Err(ValidationError::NotChronological { previous: prev, lap: req.lap });
            }
            if req.lap - prev < MIN_STOP_GAP {
                return Err(ValidationError::TooClose { previous: prev, lap: req.lap });
            }
        }
        previous = Some(req.lap);
        stops.push(PitStop::new(req.lap, compound).with_pit_loss(pit_loss));
    }
    Ok(Strategy::new(stops))
}
