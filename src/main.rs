use anyhow::{bail, Context};
use clap::{Args, Parser, Subcommand};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;
use tracing::info;

use pitlane::validation::parse_pit_stops;
use pitlane::{report, Calibration, Conditions, PitStopRequest, RaceData, Simulator, SimulatorConfig};

#[derive(Parser)]
#[command(name = "pitlane", version, about = "What-if pit strategy analysis over a finished race")]
struct Cli {
    #[command(flatten)]
    global: GlobalArgs,

    #[command(subcommand)]
    command: Command,
}

#[derive(Args)]
struct GlobalArgs {
    /// Directory with the race CSV tables and calibration files
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// TOML settings file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Charge every stop a flat pit loss instead of the dynamic model
    #[arg(long, global = true)]
    static_pit_loss: bool,

    /// Print JSON instead of tables
    #[arg(long, global = true)]
    json: bool,

    /// Also write the result as JSON to this file
    #[arg(long, global = true)]
    output: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Command {
    /// Derive tire coefficients and the circuit pit-loss model from the race
    Calibrate {
        #[arg(long, default_value = "suzuka")]
        circuit: String,
    },

    #[command(flatten)]
    Analysis(Analysis),
}

#[derive(Subcommand)]
enum Analysis {
    /// Show the strategy a driver actually ran
    Actual { driver: u32 },

    /// Compare an alternative strategy with the actual one
    Compare {
        driver: u32,
        /// Pit stops as LAP:COMPOUND[:PIT_LOSS], comma separated, e.g. 15:SOFT,35:MEDIUM
        #[arg(default_value = "")]
        stops: String,
    },

    /// Search for the best one-stop or two-stop strategies
    Optimize {
        driver: u32,
        /// Number of stops to search, 1 or 2
        #[arg(long, default_value_t = 2)]
        max_stops: u32,
        #[arg(long, default_value_t = 10)]
        top: usize,
        /// Worker threads, defaults to one per core
        #[arg(long)]
        workers: Option<usize>,
        /// Give up after this many seconds and rank what was evaluated
        #[arg(long)]
        deadline: Option<u64>,
    },

    /// Apply strategy changes to several drivers and predict the new order
    Field {
        /// DRIVER=STOPS, e.g. 1=15:SOFT,35:HARD; repeat for each driver
        #[arg(long = "driver", value_name = "DRIVER=STOPS", required = true)]
        drivers: Vec<String>,
    },

    /// Compare named field scenarios read from a JSON file
    Scenarios { file: PathBuf },

    /// Fit per-stint tire degradation for a driver
    Degradation { driver: u32 },

    /// Explain the pit loss of one stop
    PitLoss {
        driver: u32,
        lap: u32,
        #[arg(long)]
        safety_car: bool,
        #[arg(long)]
        rain: bool,
        #[arg(long)]
        damaged_car: bool,
    },
}

fn load_config(args: &GlobalArgs) -> anyhow::Result<SimulatorConfig> {
    let mut config = match &args.config {
        Some(path) => SimulatorConfig::load(path)
            .with_context(|| format!("failed to read config {}", path.display()))?,
        None => SimulatorConfig::default(),
    };
    if let Some(dir) = &args.data_dir {
        config = config.with_data_dir(dir);
    }
    if args.static_pit_loss {
        config.dynamic_pit_loss = false;
    }
    Ok(config)
}

fn parse_field_entry(entry: &str) -> anyhow::Result<(u32, Vec<PitStopRequest>)> {
    let Some((driver, stops)) = entry.split_once('=') else {
        bail!("expected DRIVER=STOPS, got {entry:?}");
    };
    let driver = driver
        .trim()
        .parse()
        .with_context(|| format!("invalid driver number in {entry:?}"))?;
    Ok((driver, parse_pit_stops(stops)?))
}

/// Prints `value` as a table or JSON and exports it when asked to.
fn emit<T: Serialize>(args: &GlobalArgs, value: &T, table: impl FnOnce() -> String) -> anyhow::Result<()> {
    if args.json {
        println!("{}", report::to_json(value)?);
    } else {
        print!("{}", table());
    }
    if let Some(path) = &args.output {
        report::export_json(value, path).with_context(|| format!("failed to write {}", path.display()))?;
        info!("results exported to {}", path.display());
    }
    Ok(())
}

fn calibrate(args: &GlobalArgs, config: &SimulatorConfig, circuit: &str) -> anyhow::Result<()> {
    // only the race tables are needed, not the models being replaced
    let race = RaceData::load(&config.data_dir)
        .with_context(|| format!("failed to load race data from {}", config.data_dir.display()))?;
    let calibration = Calibration::derive(&race, circuit)?;
    calibration.save(&config.data_dir)?;
    emit(args, &calibration, || report::calibration(&calibration))
}

fn analyze(args: &GlobalArgs, mut config: SimulatorConfig, command: &Analysis) -> anyhow::Result<()> {
    if let Analysis::Optimize { workers, deadline, .. } = command {
        if workers.is_some() {
            config.optimizer.workers = *workers;
        }
        if deadline.is_some() {
            config.optimizer.deadline_secs = *deadline;
        }
    }

    let data_dir = config.data_dir.clone();
    let sim = Simulator::load(config)
        .with_context(|| format!("failed to load race data from {}", data_dir.display()))?;
    let race = sim.race();

    match command {
        Analysis::Actual { driver } => {
            let strategy = sim.get_actual_strategy(*driver)?;
            emit(args, &strategy, || report::strategy(race, *driver, &strategy))
        }
        Analysis::Compare { driver, stops } => {
            let requests = parse_pit_stops(stops)?;
            let result = sim.compare_strategies(*driver, &requests)?;
            emit(args, &result, || report::comparison(race, &result))
        }
        Analysis::Optimize { driver, max_stops, top, .. } => {
            let result = sim.find_optimal_windows(*driver, *max_stops, *top)?;
            emit(args, &result, || report::optimization(race, &result))
        }
        Analysis::Field { drivers } => {
            let requests = drivers
                .iter()
                .map(|e| parse_field_entry(e))
                .collect::<anyhow::Result<BTreeMap<_, _>>>()?;
            let analysis = sim.analyze_field(&requests)?;
            emit(args, &analysis, || report::field(race, &analysis))
        }
        Analysis::Scenarios { file } => {
            let text = fs::read_to_string(file).with_context(|| format!("failed to read {}", file.display()))?;
            let scenarios: BTreeMap<String, BTreeMap<u32, Vec<PitStopRequest>>> =
                serde_json::from_str(&text).with_context(|| format!("invalid scenario file {}", file.display()))?;
            let results = sim.compare_scenarios(&scenarios)?;
            emit(args, &results, || {
                results
                    .iter()
                    .map(|(name, analysis)| format!("Scenario {name}\n{}", report::field(race, analysis)))
                    .collect::<Vec<_>>()
                    .join("\n")
            })
        }
        Analysis::Degradation { driver } => {
            let result = sim.analyze_tire_degradation(*driver)?;
            emit(args, &result, || report::degradation(race, &result))
        }
        Analysis::PitLoss {
            driver,
            lap,
            safety_car,
            rain,
            damaged_car,
        } => {
            let conditions = Conditions {
                safety_car: *safety_car,
                rain: *rain,
                damaged_car: *damaged_car,
            };
            let estimate = sim.pit_loss(*driver, *lap, &conditions)?;
            emit(args, &estimate, || report::pit_loss(*driver, *lap, &estimate))
        }
    }
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("pitlane=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = load_config(&cli.global)?;
    match &cli.command {
        Command::Calibrate { circuit } => calibrate(&cli.global, &config, circuit),
        Command::Analysis(command) => analyze(&cli.global, config, command),
    }
}
