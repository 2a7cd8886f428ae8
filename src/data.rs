use csv::{ReaderBuilder, Trim};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fs::File;
use std::io::Read;
use std::path::Path;
use tracing::{debug, info};

use crate::compound::NominationTable;
use crate::error::{PlannerError, Result};
use crate::historical::{LapEntry, PitStop, RaceControlMessage, RaceRecord, RaceStint};
use crate::model::StintRecord;

/// Clean-lap window used when building fitting input.
const CLEAN_LAP_MIN_S: f64 = 60.0;
const CLEAN_LAP_MAX_S: f64 = 180.0;
const MIN_CLEAN_LAPS_PER_STINT: usize = 3;
const DRY_ROLES: [&str; 3] = ["SOFT", "MEDIUM", "HARD"];

// FastF1-style lap export, one row per driver lap
#[derive(Debug, Deserialize)]
struct RawLapRow {
    #[serde(rename = "Season")] season: i32,
    #[serde(rename = "Driver")] driver: String,
    #[serde(rename = "LapNumber")] lap_number: f64,
    #[serde(rename = "Stint", default)] stint: Option<f64>,
    #[serde(rename = "Compound", default)] compound: Option<String>,
    #[serde(rename = "LapTimeSeconds", default)] lap_time_seconds: Option<f64>,
    #[serde(rename = "Position", default)] position: Option<f64>,
    #[serde(rename = "PitInTime", default)] pit_in_time: Option<String>,
    #[serde(rename = "PitOutTime", default)] pit_out_time: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawRaceControlRow {
    #[serde(rename = "Season")] season: i32,
    #[serde(rename = "Lap", default)] lap: Option<f64>,
    #[serde(rename = "Category", default)] category: Option<String>,
    #[serde(rename = "Message", default)] message: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LapRow {
    pub season: i32,
    pub driver: String,
    pub lap_number: u32,
    pub stint: Option<u32>,
    /// Upper-cased role (SOFT/MEDIUM/HARD/INTERMEDIATE/WET); `None` when unknown.
    pub compound: Option<String>,
    pub lap_time_s: Option<f64>,
    pub position: Option<u32>,
    pub pit_in: bool,
    pub pit_out: bool,
}

impl LapRow {
    fn is_clean(&self) -> bool {
        !self.pit_in
            && !self.pit_out
            && self
                .lap_time_s
                .map_or(false, |t| (CLEAN_LAP_MIN_S..=CLEAN_LAP_MAX_S).contains(&t))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RaceControlRow {
    pub season: i32,
    pub message: RaceControlMessage,
}

fn present(field: Option<String>) -> Option<String> {
    field.map(|s| s.trim().to_string()).filter(|s| !s.is_empty())
}

fn open(path: &Path) -> Result<File> {
    File::open(path).map_err(|source| PlannerError::Io {
        path: path.display().to_string(),
        source,
    })
}

pub fn load_laps(path: impl AsRef<Path>) -> Result<Vec<LapRow>> {
    let path = path.as_ref();
    let rows = read_laps(open(path)?)?;
    info!(path = %path.display(), rows = rows.len(), "loaded lap table");
    Ok(rows)
}

/// Parse a lap table. Rows without a driver or a positive lap number are dropped;
/// lap times outside (0, 300) s are treated as missing.
pub fn read_laps<R: Read>(reader: R) -> Result<Vec<LapRow>> {
    let mut reader = ReaderBuilder::new()
        .has_headers(true)
        .trim(Trim::All)
        .from_reader(reader);

    let mut rows = Vec::new();
    for record in reader.deserialize() {
        let raw: RawLapRow = record?;
        if raw.driver.is_empty() || raw.lap_number < 1.0 {
            continue;
        }
        rows.push(LapRow {
            season: raw.season,
            driver: raw.driver,
            lap_number: raw.lap_number.round() as u32,
            stint: raw.stint.filter(|s| *s >= 1.0).map(|s| s.round() as u32),
            compound: present(raw.compound)
                .map(|c| c.to_uppercase())
                .filter(|c| c != "UNKNOWN" && c != "NAN"),
            lap_time_s: raw.lap_time_seconds.filter(|t| *t > 0.0 && *t < 300.0),
            position: raw.position.filter(|p| *p >= 1.0).map(|p| p.round() as u32),
            pit_in: present(raw.pit_in_time).is_some(),
            pit_out: present(raw.pit_out_time).is_some(),
        });
    }
    Ok(rows)
}

pub fn load_race_control(path: impl AsRef<Path>) -> Result<Vec<RaceControlRow>> {
    let path = path.as_ref();
    let rows = read_race_control(open(path)?)?;
    info!(path = %path.display(), rows = rows.len(), "loaded race control messages");
    Ok(rows)
}

pub fn read_race_control<R: Read>(reader: R) -> Result<Vec<RaceControlRow>> {
    let mut reader = ReaderBuilder::new()
        .has_headers(true)
        .trim(Trim::All)
        .from_reader(reader);

    let mut rows = Vec::new();
    for record in reader.deserialize() {
        let raw: RawRaceControlRow = record?;
        rows.push(RaceControlRow {
            season: raw.season,
            message: RaceControlMessage {
                lap: raw.lap.filter(|l| *l >= 0.0).map(|l| l.round() as u32),
                category: present(raw.category).unwrap_or_default(),
                message: present(raw.message).unwrap_or_default(),
            },
        });
    }
    Ok(rows)
}

// season -> driver -> laps sorted by lap number
fn group_by_driver(laps: &[LapRow]) -> BTreeMap<i32, BTreeMap<&str, Vec<&LapRow>>> {
    let mut grouped: BTreeMap<i32, BTreeMap<&str, Vec<&LapRow>>> = BTreeMap::new();
    for lap in laps {
        grouped
            .entry(lap.season)
            .or_default()
            .entry(lap.driver.as_str())
            .or_default()
            .push(lap);
    }
    for drivers in grouped.values_mut() {
        for driver_laps in drivers.values_mut() {
            driver_laps.sort_by_key(|l| l.lap_number);
        }
    }
    grouped
}

/// Split one driver's laps into stints. The `Stint` column decides when present;
/// otherwise a stint ends on a pit-in lap, before a pit-out lap, or on a compound change.
fn split_stints<'a>(laps: &[&'a LapRow]) -> Vec<Vec<&'a LapRow>> {
    let mut stints: Vec<Vec<&'a LapRow>> = Vec::new();
    let mut current: Vec<&'a LapRow> = Vec::new();

    for (i, &lap) in laps.iter().enumerate() {
        current.push(lap);
        let Some(next) = laps.get(i + 1) else {
            break;
        };
        let stint_ends = match (lap.stint, next.stint) {
            (Some(a), Some(b)) => a != b,
            _ => lap.pit_in || next.pit_out || lap.compound != next.compound,
        };
        if stint_ends {
            stints.push(std::mem::take(&mut current));
        }
    }
    if !current.is_empty() {
        stints.push(current);
    }
    stints
}

/// One `RaceRecord` per season. Seasons that only appear in the race control
/// table produce a record without stints.
pub fn build_race_records(laps: &[LapRow], race_control: &[RaceControlRow]) -> Vec<RaceRecord> {
    let mut records: BTreeMap<i32, RaceRecord> = BTreeMap::new();

    for (season, drivers) in group_by_driver(laps) {
        let driver_stints: BTreeMap<String, Vec<RaceStint>> = drivers
            .iter()
            .map(|(driver, driver_laps)| {
                let stints: Vec<RaceStint> = split_stints(driver_laps)
                    .iter()
                    .filter_map(|stint| {
                        let (first, last) = (stint.first()?, stint.last()?);
                        Some(RaceStint {
                            compound: first.compound.clone(),
                            start_lap: first.lap_number,
                            end_lap: last.lap_number,
                        })
                    })
                    .collect();
                (driver.to_string(), stints)
            })
            .collect();

        let season_laps: Vec<&LapRow> = laps.iter().filter(|l| l.season == season).collect();
        let pit_stops: Vec<PitStop> = season_laps
            .iter()
            .filter(|l| l.pit_in)
            .map(|l| PitStop {
                driver: l.driver.clone(),
                lap: l.lap_number,
            })
            .collect();
        let lap_entries: Vec<LapEntry> = season_laps
            .iter()
            .map(|l| LapEntry {
                driver: l.driver.clone(),
                lap: l.lap_number,
                lap_time_s: l.lap_time_s,
                position: l.position,
                pit_in: l.pit_in,
                pit_out: l.pit_out,
            })
            .collect();

        records.insert(
            season,
            RaceRecord {
                season,
                driver_stints,
                pit_stops,
                race_control: Vec::new(),
                laps: Some(lap_entries),
            },
        );
    }

    for row in race_control {
        records
            .entry(row.season)
            .or_insert_with(|| RaceRecord {
                season: row.season,
                ..RaceRecord::default()
            })
            .race_control
            .push(row.message.clone());
    }

    debug!(races = records.len(), "built race records");
    records.into_values().collect()
}

/// Clean dry stints for degradation fitting, with roles mapped to compound codes
/// through each season's nomination.
pub fn extract_stint_records(laps: &[LapRow], nominations: &NominationTable) -> Vec<StintRecord> {
    let mut records = Vec::new();

    for (season, drivers) in group_by_driver(laps) {
        let nomination = nominations.for_season(season);
        for (driver, driver_laps) in &drivers {
            for stint in split_stints(driver_laps) {
                let Some(role) = stint.first().and_then(|l| l.compound.as_deref()) else {
                    continue;
                };
                if !DRY_ROLES.contains(&role) {
                    continue;
                }
                let Some(code) = nomination.code_for_role(role) else {
                    continue;
                };

                let clean: Vec<&LapRow> = stint.iter().copied().filter(|l| l.is_clean()).collect();
                if clean.len() < MIN_CLEAN_LAPS_PER_STINT {
                    continue;
                }
                let (Some(first), Some(last)) = (clean.first(), clean.last()) else {
                    continue;
                };

                records.push(StintRecord {
                    season,
                    driver: driver.to_string(),
                    compound: code,
                    start_lap: first.lap_number,
                    end_lap: last.lap_number,
                    lap_times: clean.iter().filter_map(|l| l.lap_time_s).collect(),
                });
            }
        }
    }

    debug!(stints = records.len(), "extracted clean stints");
    records
}
