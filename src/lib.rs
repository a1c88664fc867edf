//! Counterfactual pit-strategy simulation over a finished race.
//!
//! A driver's recorded lap times are replayed under an alternative sequence
//! of pit stops, with tire performance and pit-lane time loss modelled on
//! top, and compared with what actually happened.

pub mod circuit;
pub mod compare;
pub mod config;
pub mod data;
pub mod degradation;
pub mod error;
pub mod field;
pub mod optimizer;
pub mod pit_loss;
pub mod replay;
pub mod report;
pub mod simulator;
pub mod strategy;
pub mod tire;
pub mod validation;

pub use compare::{ComparisonResult, StrategyComparator};
pub use config::{OptimizerConfig, SimulatorConfig};
pub use data::RaceData;
pub use error::{Result, SimError};
pub use field::{FieldAnalysis, FieldAnalyzer};
pub use optimizer::{CancellationToken, OptimizationResult, StrategyOptimizer};
pub use pit_loss::{Conditions, PitLossModel};
pub use replay::{PitLossMode, RaceReplayEngine, SimulationResult};
pub use simulator::{Calibration, RaceContext, Simulator};
pub use strategy::{PitStop, Stint, Strategy};
pub use tire::{Compound, TireModel};
pub use validation::{PitStopRequest, ValidationError};
