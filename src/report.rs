//! Terminal and JSON output for the `pitlane` binary.

use comfy_table::{presets::UTF8_FULL, Attribute, Cell, Color, Table};
use serde::Serialize;
use std::fs;
use std::path::Path;

use crate::compare::ComparisonResult;
use crate::data::RaceData;
use crate::degradation::DegradationReport;
use crate::error::Result;
use crate::field::FieldAnalysis;
use crate::optimizer::OptimizationResult;
use crate::pit_loss::PitLossEstimate;
use crate::simulator::Calibration;
use crate::strategy::{Stint, Strategy};

fn table(header: &[&str]) -> Table {
    let mut table = Table::new();
    table.load_preset(UTF8_FULL);
    table.set_header(header.iter().map(|h| Cell::new(h).add_attribute(Attribute::Bold)));
    table
}

/// `h:mm:ss.sss`, or `m:ss.sss` under an hour.
pub fn race_time(seconds: f64) -> String {
    let millis = (seconds * 1000.0).round() as i64;
    let (sign, millis) = if millis < 0 { ("-", -millis) } else { ("", millis) };
    let (h, rem) = (millis / 3_600_000, millis % 3_600_000);
    let (m, rem) = (rem / 60_000, rem % 60_000);
    let (s, ms) = (rem / 1000, rem % 1000);
    if h > 0 {
        format!("{sign}{h}:{m:02}:{s:02}.{ms:03}")
    } else {
        format!("{sign}{m}:{s:02}.{ms:03}")
    }
}

fn delta_cell(delta: f64) -> Cell {
    let cell = Cell::new(format!("{delta:+.3}s"));
    if delta < 0.0 {
        cell.fg(Color::Green)
    } else if delta > 0.0 {
        cell.fg(Color::Red)
    } else {
        cell
    }
}

fn driver_label(race: &RaceData, driver_id: u32) -> String {
    match race.driver(driver_id).and_then(|d| d.abbreviation.as_deref()) {
        Some(abbr) => format!("#{driver_id} {abbr}"),
        None => format!("#{driver_id}"),
    }
}

pub fn strategy(race: &RaceData, driver_id: u32, strategy: &Strategy) -> String {
    let mut t = table(&["Lap", "Compound", "Pit loss"]);
    for stop in strategy.stops() {
        t.add_row(vec![
            Cell::new(stop.lap),
            Cell::new(&stop.tire_compound),
            Cell::new(format!("{:.2}s", stop.pit_loss)),
        ]);
    }
    format!("Actual strategy of {}: {strategy}\n{t}\n", driver_label(race, driver_id))
}

pub fn comparison(race: &RaceData, result: &ComparisonResult) -> String {
    let mut out = format!(
        "{}\n  actual:      {}  ({})\n  alternative: {}  ({})\n",
        driver_label(race, result.driver_id),
        result.actual_strategy,
        race_time(result.actual_total_time),
        result.alternative_strategy,
        race_time(result.alternative_total_time),
    );

    let mut t = table(&["Stint", "Actual", "Actual time", "Alternative", "Alt. time", "Delta"]);
    for s in &result.stint_comparison {
        let describe = |stint: &Option<Stint>| match stint {
            Some(st) => format!("L{}-{} {}", st.start_lap, st.end_lap, st.tire_compound),
            None => "-".to_owned(),
        };
        t.add_row(vec![
            Cell::new(s.stint_number),
            Cell::new(describe(&s.actual_stint)),
            Cell::new(format!("{:.3}", s.actual_time)),
            Cell::new(describe(&s.alternative_stint)),
            Cell::new(format!("{:.3}", s.alternative_time)),
            delta_cell(s.time_difference),
        ]);
    }
    out.push_str(&t.to_string());
    out.push('\n');

    let verdict = if result.improvement {
        format!("Alternative is {:.3}s faster", -result.time_difference)
    } else {
        format!("Alternative is {:.3}s slower", result.time_difference)
    };
    out.push_str(&verdict);
    out.push('\n');
    out
}

pub fn optimization(race: &RaceData, result: &OptimizationResult) -> String {
    let mut t = table(&["Rank", "Strategy", "Race time", "vs actual"]);
    for (i, c) in result.candidates.iter().enumerate() {
        let rank = if i == 0 {
            Cell::new(1).fg(Color::Green).add_attribute(Attribute::Bold)
        } else {
            Cell::new(i + 1)
        };
        t.add_row(vec![
            rank,
            Cell::new(&c.strategy),
            Cell::new(race_time(c.total_time)),
            delta_cell(c.improvement),
        ]);
    }
    let mut out = format!(
        "Optimal pit windows for {} (actual {})\n{t}\n",
        driver_label(race, result.driver_id),
        race_time(result.actual_total_time)
    );
    out.push_str(&format!("Evaluated {}/{} candidates", result.evaluated, result.total));
    if !result.completed {
        out.push_str(" (search stopped early, ranking is partial)");
    }
    out.push('\n');
    out
}

pub fn field(race: &RaceData, analysis: &FieldAnalysis) -> String {
    let mut t = table(&["Pos", "Driver", "Alternative", "Race time", "vs actual"]);
    for e in &analysis.results {
        let c = &e.comparison;
        t.add_row(vec![
            Cell::new(e.predicted_position),
            Cell::new(driver_label(race, c.driver_id)),
            Cell::new(&c.alternative_strategy),
            Cell::new(race_time(c.alternative_total_time)),
            delta_cell(c.time_difference),
        ]);
    }
    let s = &analysis.stats;
    format!(
        "{t}\nTime saved: {:.3}s | drivers improved: {} | average change: {:+.3}s\n",
        s.total_time_saved, s.drivers_improved, s.average_improvement
    )
}

pub fn degradation(race: &RaceData, report: &DegradationReport) -> String {
    let mut stints = table(&["Laps", "Compound", "Used laps", "Avg lap", "Best", "Worst", "Deg/lap"]);
    for s in &report.stints {
        stints.add_row(vec![
            Cell::new(format!("{}-{}", s.stint_start, s.stint_end)),
            Cell::new(&s.compound),
            Cell::new(s.stint_length),
            Cell::new(format!("{:.3}", s.average_lap_time)),
            Cell::new(format!("{:.3}", s.best_lap_time)),
            Cell::new(format!("{:.3}", s.worst_lap_time)),
            Cell::new(format!("{:+.4}", s.degradation_rate)),
        ]);
    }
    let mut by_compound = table(&["Compound", "Stints", "Avg deg/lap", "Avg lap", "Avg length"]);
    for (name, c) in &report.avg_degradation_by_compound {
        by_compound.add_row(vec![
            Cell::new(name),
            Cell::new(c.stints),
            Cell::new(format!("{:+.4}", c.avg_degradation)),
            Cell::new(format!("{:.3}", c.avg_lap_time)),
            Cell::new(format!("{:.1}", c.avg_stint_length)),
        ]);
    }
    format!(
        "Tire degradation of {}\n{stints}\n{by_compound}\n",
        driver_label(race, report.driver_id)
    )
}

pub fn pit_loss(driver_id: u32, lap: u32, estimate: &PitLossEstimate) -> String {
    let b = &estimate.breakdown;
    let mut t = table(&["Step", "Factor", "Running time"]);
    match (&b.circuit, b.calibration_factor) {
        (Some(circuit), Some(cal)) => {
            t.add_row(vec![
                Cell::new(format!("base ({circuit}, calibrated)")),
                Cell::new(format!("{cal:.3}")),
                Cell::new(format!("{:.3}", b.base_time)),
            ]);
        }
        _ => {
            t.add_row(vec![Cell::new("base"), Cell::new("-"), Cell::new(format!("{:.3}", b.base_time))]);
        }
    }
    let mut step = |name: String, factor: f64, after: f64| {
        t.add_row(vec![
            Cell::new(name),
            Cell::new(format!("{factor:.3}")),
            Cell::new(format!("{after:.3}")),
        ]);
    };
    step("lap".into(), b.lap_factor, b.after_lap_factor);
    step("team".into(), b.team_factor, b.after_team_factor);
    step("situation".into(), b.situation_factor, b.after_situation_factor);
    if let (Some(level), Some(f), Some(after)) = (b.traffic_level, b.circuit_traffic_factor, b.after_circuit_factor) {
        step(format!("traffic ({})", level.as_str()), f, after);
    }
    step("random".into(), b.random_factor, b.final_time);
    format!(
        "Pit loss for #{driver_id} on lap {lap}: {:.2}s\n{t}\n",
        estimate.seconds
    )
}

pub fn calibration(calibration: &Calibration) -> String {
    let mut t = table(&["Compound", "Delta", "Deg/lap", "Typical stint"]);
    for (name, c) in &calibration.tires.tire_compounds {
        t.add_row(vec![
            Cell::new(name),
            Cell::new(format!("{:+.3}", c.performance_delta)),
            Cell::new(format!("{:.4}", c.degradation_rate)),
            Cell::new(c.typical_stint_length),
        ]);
    }
    let pit = &calibration.pit_loss;
    let observed = match &pit.data_analysis {
        Some(stats) => format!(
            "{} stops observed, median {:.2}s, calibration factor {:.3}",
            stats.sample_size,
            stats.median_pit_loss,
            pit.calibration_factor.unwrap_or(1.0)
        ),
        None => "no usable stops observed, pit loss left uncalibrated".to_owned(),
    };
    format!(
        "{t}\nCircuit: {}\n{observed}\n",
        pit.current_circuit.as_deref().unwrap_or("-")
    )
}

pub fn to_json<T: Serialize>(value: &T) -> Result<String> {
    Ok(serde_json::to_string_pretty(value)?)
}

pub fn export_json<T: Serialize, P: AsRef<Path>>(value: &T, path: P) -> Result<()> {
    fs::write(path, to_json(value)?)?;
    Ok(())
}
