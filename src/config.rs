use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::Result;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SimulatorConfig {
    pub data_dir: PathBuf,
    // false charges every stop a flat default_pit_loss
    pub dynamic_pit_loss: bool,
    pub default_pit_loss: f64,
    // used for drivers without timed laps
    pub fallback_race_length: u32,
    pub fallback_lap_time: f64,
    pub optimizer: OptimizerConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct OptimizerConfig {
    /// Upper bound on the number of ranked candidates returned, whatever the caller asks for.
    pub result_cap: usize,
    // None: one per core
    pub workers: Option<usize>,
    // seconds
    pub deadline_secs: Option<u64>,
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data"),
            dynamic_pit_loss: true,
            default_pit_loss: 22.0,
            fallback_race_length: 53,
            fallback_lap_time: 90.0,
            optimizer: OptimizerConfig::default(),
        }
    }
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self {
            result_cap: 10,
            workers: None,
            deadline_secs: None,
        }
    }
}

impl SimulatorConfig {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let text = fs::read_to_string(path)?;
        Ok(toml::from_str(&text)?)
    }

    pub fn with_data_dir<P: Into<PathBuf>>(mut self, dir: P) -> Self {
        self.data_dir = dir.into();
        self
    }
}

impl OptimizerConfig {
    pub fn worker_count(&self) -> usize {
        match self.workers {
            Some(n) if n > 0 => n,
            _ => std::thread::available_parallelism().map_or(1, |n| n.get()),
        }
    }
}
