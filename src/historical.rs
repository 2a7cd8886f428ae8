// Past races at a circuit boiled down to the statistics the scorer uses. Each one can
// come back as InsufficientData; analyze_history keeps what worked and notes the rest.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::stats::{median, percentile, round_to};

pub const MIN_FIRST_STOPS: usize = 4;
pub const UNDERCUT_GAP_THRESHOLD_S: f64 = 3.0;
/// Rival must pit 1 to this many laps after the driver who stopped first.
pub const UNDERCUT_LAP_WINDOW: u32 = 3;
pub const SAFETY_CAR_BUCKET_LAPS: u32 = 5;
pub const TOP_SEQUENCES: usize = 5;

const UNKNOWN_COMPOUND: &str = "UNKNOWN";

// ---------- Race inputs ----------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RaceStint {
    /// Compound role as reported (e.g. "MEDIUM"); `None` when unknown.
    pub compound: Option<String>,
    pub start_lap: u32,
    pub end_lap: u32,
}

impl RaceStint {
    fn known_compound(&self) -> Option<&str> {
        self.compound
            .as_deref()
            .filter(|c| !c.is_empty() && !c.eq_ignore_ascii_case(UNKNOWN_COMPOUND))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PitStop {
    pub driver: String,
    pub lap: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RaceControlMessage {
    pub lap: Option<u32>,
    pub category: String,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LapEntry {
    pub driver: String,
    pub lap: u32,
    pub lap_time_s: Option<f64>,
    pub position: Option<u32>,
    pub pit_in: bool,
    pub pit_out: bool,
}

/// Everything known about one past race.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct RaceRecord {
    pub season: i32,
    /// Ordered stints per driver.
    pub driver_stints: BTreeMap<String, Vec<RaceStint>>,
    pub pit_stops: Vec<PitStop>,
    pub race_control: Vec<RaceControlMessage>,
    pub laps: Option<Vec<LapEntry>>,
}

// ---------- Profile outputs ----------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FirstStopStats {
    pub median: f64,
    pub p25: f64,
    pub p75: f64,
    pub iqr: f64,
    pub n: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StopCountDistribution {
    pub one_stop_pct: f64,
    pub two_stop_pct: f64,
    pub three_plus_pct: f64,
    pub n: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrategySequenceInfo {
    pub stops: usize,
    pub sequence: Vec<String>,
    pub frequency_pct: f64,
    pub n: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SafetyCarBucket {
    pub label: String,
    pub start_lap: u32,
    pub end_lap: u32,
    /// Fraction of races with a safety car lap inside the bucket.
    pub probability: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UndercutOvercutStats {
    pub undercut_attempts: usize,
    pub undercut_success_rate: f64,
    pub overcut_attempts: usize,
    pub overcut_success_rate: f64,
    pub typical_undercut_gain_s: f64,
    pub notes: String,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct HistoricalProfile {
    pub seasons_used: Vec<i32>,
    pub races_used: usize,
    pub first_stop_lap: Option<FirstStopStats>,
    pub stop_count_distribution: Option<StopCountDistribution>,
    pub common_strategy_sequences: Vec<StrategySequenceInfo>,
    pub safety_car_lap_histogram: Option<Vec<SafetyCarBucket>>,
    pub undercut_overcut: Option<UndercutOvercutStats>,
    pub pit_outlap_penalty_s: Option<f64>,
    pub notes: Vec<String>,
}

/// Why a statistic could not be computed. The `Display` text is the profile note.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum InsufficientData {
    #[error("First stop: only {found} data points (need {required}). Insufficient.")]
    TooFewFirstStops { found: usize, required: usize },

    #[error("Stop count: no data available.")]
    NoStintData,

    #[error("Strategy sequences: no usable data.")]
    NoUsableSequences,

    #[error("Safety car: no race control message data available.")]
    NoRaceControl,

    #[error("Undercut/overcut: no qualifying driver pairs found (gap <= {gap_threshold_s}s, 1-{lap_window} lap offset).")]
    NoUndercutPairs { gap_threshold_s: f64, lap_window: u32 },

    #[error("Outlap penalty: insufficient data to compute.")]
    NoOutlapData,
}

// ---------- Entry point ----------

/// Build a circuit profile from past races. `total_laps` is the race distance used
/// for the safety car buckets.
pub fn analyze_history(races: &[RaceRecord], total_laps: u32) -> HistoricalProfile {
    let mut notes = Vec::new();

    let usable: Vec<RaceRecord> = races
        .iter()
        .filter(|race| {
            if race.driver_stints.is_empty() {
                warn!(season = race.season, "race has no stint data, skipping");
                notes.push(format!("{}: no usable lap data.", race.season));
                false
            } else {
                true
            }
        })
        .cloned()
        .collect();

    if usable.is_empty() {
        notes.push("No historical races loaded. Profile is empty.".to_string());
        return HistoricalProfile {
            seasons_used: seasons_of(races),
            notes,
            ..HistoricalProfile::default()
        };
    }

    let seasons_used = seasons_of(&usable);
    let races_used = usable.len();

    let profile = HistoricalProfile {
        first_stop_lap: keep(first_stop_stats(&usable), &mut notes),
        stop_count_distribution: keep(stop_count_distribution(&usable), &mut notes),
        common_strategy_sequences: keep(common_sequences(&usable, TOP_SEQUENCES), &mut notes)
            .unwrap_or_default(),
        safety_car_lap_histogram: keep(
            safety_car_histogram(&usable, total_laps, SAFETY_CAR_BUCKET_LAPS),
            &mut notes,
        ),
        undercut_overcut: keep(undercut_overcut(&usable), &mut notes),
        pit_outlap_penalty_s: keep(outlap_penalty(&usable), &mut notes),
        seasons_used: Vec::new(),
        races_used,
        notes: Vec::new(),
    };

    notes.push(format!(
        "Computed from {} race(s) across {} season(s).",
        races_used,
        seasons_used.len()
    ));
    info!(races = races_used, seasons = seasons_used.len(), "historical profile computed");

    HistoricalProfile {
        seasons_used,
        notes,
        ..profile
    }
}

fn keep<T>(result: Result<T, InsufficientData>, notes: &mut Vec<String>) -> Option<T> {
    match result {
        Ok(value) => Some(value),
        Err(reason) => {
            debug!(%reason, "historical statistic unavailable");
            notes.push(reason.to_string());
            None
        }
    }
}

fn seasons_of(races: &[RaceRecord]) -> Vec<i32> {
    races
        .iter()
        .map(|r| r.season)
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

// ---------- First stop ----------

/// Spread of first pit-stop laps. Lap-1 stops are treated as damage and ignored.
pub fn first_stop_stats(races: &[RaceRecord]) -> Result<FirstStopStats, InsufficientData> {
    let first_stops: Vec<f64> = races
        .iter()
        .flat_map(|race| race.driver_stints.values())
        .filter(|stints| stints.len() >= 2)
        .map(|stints| stints[0].end_lap)
        .filter(|lap| *lap > 1)
        .map(f64::from)
        .collect();

    if first_stops.len() < MIN_FIRST_STOPS {
        return Err(InsufficientData::TooFewFirstStops {
            found: first_stops.len(),
            required: MIN_FIRST_STOPS,
        });
    }

    let p25 = percentile(&first_stops, 25.0).unwrap_or_default();
    let p75 = percentile(&first_stops, 75.0).unwrap_or_default();
    let mid = median(&first_stops).unwrap_or_default();

    Ok(FirstStopStats {
        median: round_to(mid, 1),
        p25: round_to(p25, 1),
        p75: round_to(p75, 1),
        iqr: round_to(p75 - p25, 1),
        n: first_stops.len(),
    })
}

// ---------- Stop counts ----------

/// Share of 1-, 2- and 3+-stop races among drivers who stopped at least once.
/// Drivers who never pitted (mostly early retirements) are left out.
pub fn stop_count_distribution(
    races: &[RaceRecord],
) -> Result<StopCountDistribution, InsufficientData> {
    let stop_counts: Vec<usize> = races
        .iter()
        .flat_map(|race| race.driver_stints.values())
        .map(|stints| stints.len().saturating_sub(1))
        .filter(|stops| *stops > 0)
        .collect();

    if stop_counts.is_empty() {
        return Err(InsufficientData::NoStintData);
    }

    let n = stop_counts.len();
    let pct = |count: usize| round_to(count as f64 / n as f64 * 100.0, 1);
    Ok(StopCountDistribution {
        one_stop_pct: pct(stop_counts.iter().filter(|s| **s == 1).count()),
        two_stop_pct: pct(stop_counts.iter().filter(|s| **s == 2).count()),
        three_plus_pct: pct(stop_counts.iter().filter(|s| **s >= 3).count()),
        n,
    })
}

// ---------- Sequences ----------

/// Most frequent compound sequences. Drivers with any unknown compound are left out;
/// equal counts keep the order in which the sequences were first seen.
pub fn common_sequences(
    races: &[RaceRecord],
    top_n: usize,
) -> Result<Vec<StrategySequenceInfo>, InsufficientData> {
    let mut counted: Vec<(Vec<String>, usize)> = Vec::new();
    let mut index: HashMap<Vec<String>, usize> = HashMap::new();
    let mut total = 0usize;

    for stints in races.iter().flat_map(|race| race.driver_stints.values()) {
        let sequence: Option<Vec<String>> = stints
            .iter()
            .map(|s| s.known_compound().map(str::to_string))
            .collect();
        let Some(sequence) = sequence else {
            continue;
        };
        if sequence.is_empty() {
            continue;
        }

        total += 1;
        match index.get(&sequence) {
            Some(i) => counted[*i].1 += 1,
            None => {
                index.insert(sequence.clone(), counted.len());
                counted.push((sequence, 1));
            }
        }
    }

    if total == 0 {
        return Err(InsufficientData::NoUsableSequences);
    }

    counted.sort_by(|a, b| b.1.cmp(&a.1));
    Ok(counted
        .into_iter()
        .take(top_n)
        .map(|(sequence, n)| StrategySequenceInfo {
            stops: sequence.len() - 1,
            frequency_pct: round_to(n as f64 / total as f64 * 100.0, 1),
            sequence,
            n,
        })
        .collect())
}

// ---------- Safety car ----------

/// Per-window probability of a safety car, over races that have race control data.
pub fn safety_car_histogram(
    races: &[RaceRecord],
    total_laps: u32,
    bucket_size: u32,
) -> Result<Vec<SafetyCarBucket>, InsufficientData> {
    let sc_laps_per_race: Vec<Vec<u32>> = races
        .iter()
        .filter(|race| !race.race_control.is_empty())
        .map(|race| {
            race.race_control
                .iter()
                .filter(|msg| {
                    msg.category.to_uppercase().contains("SAFETY CAR")
                        || msg.message.to_uppercase().contains("SAFETY CAR")
                })
                .filter_map(|msg| msg.lap)
                .filter(|lap| *lap > 0)
                .collect()
        })
        .collect();

    if sc_laps_per_race.is_empty() {
        return Err(InsufficientData::NoRaceControl);
    }

    let races_with_messages = sc_laps_per_race.len() as f64;
    let step = bucket_size.max(1);
    let buckets = (1..=total_laps)
        .step_by(step as usize)
        .map(|start| {
            let end = (start + step - 1).min(total_laps);
            let hits = sc_laps_per_race
                .iter()
                .filter(|laps| laps.iter().any(|lap| (start..=end).contains(lap)))
                .count();
            SafetyCarBucket {
                label: format!("{}-{}", start, end),
                start_lap: start,
                end_lap: end,
                probability: round_to(hits as f64 / races_with_messages, 3),
            }
        })
        .collect();

    Ok(buckets)
}

// ---------- Undercut / overcut ----------

#[derive(Default)]
struct PairTally {
    undercut_attempts: usize,
    undercut_successes: usize,
    overcut_attempts: usize,
    overcut_successes: usize,
    undercut_gains: Vec<f64>,
}

type LapIndex<'a> = HashMap<(&'a str, u32), &'a LapEntry>;

/// Undercut and overcut outcomes between drivers who pitted close together.
///
/// This is a coarse proxy: the outcome is read from track positions two laps
/// after the second driver's stop, with no account of traffic or later stops.
pub fn undercut_overcut(races: &[RaceRecord]) -> Result<UndercutOvercutStats, InsufficientData> {
    let mut tally = PairTally::default();

    for race in races {
        let Some(laps) = race.laps.as_ref().filter(|l| !l.is_empty()) else {
            continue;
        };
        if race.pit_stops.is_empty() {
            continue;
        }

        let lap_index: LapIndex = laps.iter().map(|l| ((l.driver.as_str(), l.lap), l)).collect();

        // drivers in the order they first appear in the pit stop list
        let mut driver_pits: Vec<(&str, Vec<u32>)> = Vec::new();
        for stop in &race.pit_stops {
            match driver_pits.iter_mut().find(|(d, _)| *d == stop.driver) {
                Some((_, pits)) => pits.push(stop.lap),
                None => driver_pits.push((stop.driver.as_str(), vec![stop.lap])),
            }
        }
        for (_, pits) in driver_pits.iter_mut() {
            pits.sort_unstable();
        }

        for (i, (driver_a, pits_a)) in driver_pits.iter().enumerate() {
            for (driver_b, pits_b) in &driver_pits[i + 1..] {
                tally.analyze_pair(&lap_index, driver_a, pits_a, driver_b, pits_b);
            }
        }
    }

    let total_attempts = tally.undercut_attempts + tally.overcut_attempts;
    if total_attempts == 0 {
        return Err(InsufficientData::NoUndercutPairs {
            gap_threshold_s: UNDERCUT_GAP_THRESHOLD_S,
            lap_window: UNDERCUT_LAP_WINDOW,
        });
    }

    let rate = |successes: usize, attempts: usize| {
        if attempts == 0 {
            0.0
        } else {
            round_to(successes as f64 / attempts as f64, 3)
        }
    };

    Ok(UndercutOvercutStats {
        undercut_attempts: tally.undercut_attempts,
        undercut_success_rate: rate(tally.undercut_successes, tally.undercut_attempts),
        overcut_attempts: tally.overcut_attempts,
        overcut_success_rate: rate(tally.overcut_successes, tally.overcut_attempts),
        typical_undercut_gain_s: median(&tally.undercut_gains).map_or(0.0, |g| round_to(g, 2)),
        notes: format!(
            "Computed from {} attempt(s). Gap threshold: {}s, window: 1-{} laps.",
            total_attempts, UNDERCUT_GAP_THRESHOLD_S, UNDERCUT_LAP_WINDOW
        ),
    })
}

impl PairTally {
    // A stops first; B is the rival stopping 1-3 laps later
    fn analyze_pair(
        &mut self,
        lap_index: &LapIndex,
        driver_a: &str,
        pits_a: &[u32],
        driver_b: &str,
        pits_b: &[u32],
    ) {
        for &pit_a in pits_a {
            let Some(&pit_b) = pits_b
                .iter()
                .find(|pb| **pb > pit_a && **pb - pit_a <= UNDERCUT_LAP_WINDOW)
            else {
                continue;
            };

            let Some(pre_lap) = pit_a.checked_sub(1).filter(|l| *l >= 1) else {
                continue;
            };
            let (Some(a_pre), Some(b_pre)) = (
                lap_index.get(&(driver_a, pre_lap)),
                lap_index.get(&(driver_b, pre_lap)),
            ) else {
                continue;
            };
            let (Some(pos_a_pre), Some(pos_b_pre)) = (a_pre.position, b_pre.position) else {
                continue;
            };
            let (Some(time_a), Some(time_b)) = (a_pre.lap_time_s, b_pre.lap_time_s) else {
                continue;
            };

            let gap = (time_a - time_b).abs();
            if gap > UNDERCUT_GAP_THRESHOLD_S {
                continue;
            }

            let post_lap = pit_b + 2;
            let (Some(a_post), Some(b_post)) = (
                lap_index.get(&(driver_a, post_lap)),
                lap_index.get(&(driver_b, post_lap)),
            ) else {
                continue;
            };
            let (Some(pos_a_post), Some(pos_b_post)) = (a_post.position, b_post.position) else {
                continue;
            };

            if pos_a_pre > pos_b_pre {
                self.undercut_attempts += 1;
                if pos_a_post < pos_b_post {
                    self.undercut_successes += 1;
                    self.undercut_gains.push(gap);
                }
            } else if pos_b_pre > pos_a_pre {
                self.overcut_attempts += 1;
                if pos_b_post < pos_a_post {
                    self.overcut_successes += 1;
                }
            }
        }
    }
}

// ---------- Out-lap penalty ----------

/// Median time lost on a pit out-lap against the same driver's median clean lap.
pub fn outlap_penalty(races: &[RaceRecord]) -> Result<f64, InsufficientData> {
    let mut deltas = Vec::new();

    for laps in races.iter().filter_map(|race| race.laps.as_ref()) {
        let mut by_driver: BTreeMap<&str, Vec<&LapEntry>> = BTreeMap::new();
        for lap in laps {
            by_driver.entry(lap.driver.as_str()).or_default().push(lap);
        }

        for driver_laps in by_driver.values() {
            let clean: Vec<f64> = driver_laps
                .iter()
                .filter(|l| !l.pit_in && !l.pit_out)
                .filter_map(|l| l.lap_time_s)
                .filter(|t| (60.0..=180.0).contains(t))
                .collect();
            let Some(median_clean) = median(&clean) else {
                continue;
            };

            deltas.extend(
                driver_laps
                    .iter()
                    .filter(|l| l.pit_out)
                    .filter_map(|l| l.lap_time_s)
                    .filter(|t| *t > 60.0 && *t < 300.0)
                    .map(|t| t - median_clean),
            );
        }
    }

    median(&deltas)
        .map(|m| round_to(m, 2))
        .ok_or(InsufficientData::NoOutlapData)
}
