use anyhow::{bail, Context};
use serde::Serialize;
use tracing::info;
use tracing_subscriber::EnvFilter;

use tyre_strategy::data::{build_race_records, extract_stint_records, load_laps, load_race_control};
use tyre_strategy::{
    adjust_for_temperature, analyze_history, fit_degradation, simulate, DegradationFit,
    HistoricalProfile, PlannerConfig, SimulationOutcome,
};

const USAGE: &str = "usage: tyre_strategy <laps.csv> [config.json] [race_control.csv]";

// everything printed as JSON at the end of a run
#[derive(Serialize)]
struct Report<'a> {
    degradation: &'a DegradationFit,
    historical_profile: &'a HistoricalProfile,
    simulation: &'a SimulationOutcome,
}

fn main() -> anyhow::Result<()> {
    // logs go to stderr, the summary and report to stdout
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let Some(laps_path) = args.first() else {
        bail!(USAGE);
    };

    let config = PlannerConfig::resolve(args.get(1).map(String::as_str))
        .context("loading planner config")?;
    config.race.validate().context("invalid race parameters")?;

    let laps = load_laps(laps_path).with_context(|| format!("loading lap table {}", laps_path))?;
    let race_control = match args.get(2) {
        Some(path) => load_race_control(path)
            .with_context(|| format!("loading race control messages {}", path))?,
        None => Vec::new(),
    };

    // Fit wear parameters from the clean stints, then rescale for track temperature.
    let stints = extract_stint_records(&laps, &config.nominations);
    let mut degradation = fit_degradation(&stints);
    if let Some(temp) = config.race.track_temp_c {
        degradation = degradation.with_track_temp(temp);
    }

    // An explicit table in the config replaces the fitted one.
    let table = match (&config.compounds, config.race.track_temp_c) {
        (Some(table), Some(temp)) => adjust_for_temperature(table, temp),
        (Some(table), None) => table.clone(),
        (None, _) => degradation.compounds.clone(),
    };

    let races = build_race_records(&laps, &race_control);
    let profile = analyze_history(&races, config.race.total_laps);
    let latest_season = races.iter().map(|r| r.season).max().unwrap_or(i32::MAX);
    let nomination = config.nominations.for_season(latest_season);

    let outcome = simulate(&config.race, &table).with_historical_alignment(
        &profile,
        &config.scoring,
        Some(&nomination),
    );
    info!(recommended = %outcome.recommended, delta_s = outcome.delta_s, "simulation finished");

    println!(
        "--- Strategies (Laps: {}, Pit Loss: {}s, {}) ---",
        outcome.total_laps, outcome.pit_loss_seconds, outcome.weather_condition
    );
    for s in &outcome.strategies {
        println!(
            "- {:32} : {} ({} stops, pits {:?})",
            s.name, s.total_time_display, s.stops, s.pit_stop_laps
        );
    }
    println!("Recommended: {} (+{:.3}s to next)", outcome.recommended, outcome.delta_s);
    for note in degradation.notes.iter().chain(&profile.notes) {
        println!("  note: {}", note);
    }

    let report = Report {
        degradation: &degradation,
        historical_profile: &profile,
        simulation: &outcome,
    };
    println!("{}", serde_json::to_string_pretty(&report).context("serialising report")?);

    Ok(())
}
