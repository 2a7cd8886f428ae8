use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use tracing::{debug, info, warn};

use crate::compound::{
    intermediate_parameters, wet_parameters, CompoundCode, CompoundParameters, CompoundTable,
};
use crate::error::{PlannerError, Result};
use crate::laptime::LapModel;
use crate::stats::round_to;

pub const MODEL_ID: &str = "piecewise_linear_cliff + wet_crossover";

/// Shortest stint the optimizer will consider.
pub const MIN_STINT_LAPS: u32 = 5;
/// Laps a compound may run past its typical maximum before a split is rejected.
pub const STINT_CAP_MARGIN: u32 = 5;

const DAMP_INTER_CLIFF_RATE: f64 = 0.10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WeatherCondition {
    #[default]
    Dry,
    Damp,
    Wet,
    Extreme,
}

impl WeatherCondition {
    /// Scale applied to the base lap for the track surface.
    pub fn pace_multiplier(self) -> f64 {
        match self {
            WeatherCondition::Dry => 1.00,
            WeatherCondition::Damp => 1.06,
            WeatherCondition::Wet => 1.15,
            WeatherCondition::Extreme => 1.35,
        }
    }
}

impl fmt::Display for WeatherCondition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            WeatherCondition::Dry => "dry",
            WeatherCondition::Damp => "damp",
            WeatherCondition::Wet => "wet",
            WeatherCondition::Extreme => "extreme",
        };
        f.write_str(name)
    }
}

impl FromStr for WeatherCondition {
    type Err = PlannerError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "dry" => Ok(WeatherCondition::Dry),
            "damp" => Ok(WeatherCondition::Damp),
            "wet" => Ok(WeatherCondition::Wet),
            "extreme" => Ok(WeatherCondition::Extreme),
            _ => Err(PlannerError::InvalidCondition(s.to_string())),
        }
    }
}

/// Race parameters for one simulation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationRequest {
    pub total_laps: u32,
    pub pit_loss_seconds: f64,
    pub base_lap_time_s: f64,
    pub track_temp_c: Option<f64>,
    pub weather_condition: WeatherCondition,
    pub rain_intensity: f64,
}

impl Default for SimulationRequest {
    fn default() -> Self {
        Self {
            total_laps: 57,
            pit_loss_seconds: 22.0,
            base_lap_time_s: 90.0,
            track_temp_c: None,
            weather_condition: WeatherCondition::Dry,
            rain_intensity: 0.0,
        }
    }
}

impl SimulationRequest {
    /// Check the request against the ranges the optimizer is built for.
    pub fn validate(&self) -> Result<()> {
        check_range("total_laps", self.total_laps as f64, 10.0, 100.0)?;
        check_range("pit_loss_seconds", self.pit_loss_seconds, 10.0, 40.0)?;
        check_range("base_lap_time_s", self.base_lap_time_s, 60.0, 130.0)?;
        check_range("rain_intensity", self.rain_intensity, 0.0, 1.0)?;
        if let Some(temp) = self.track_temp_c {
            check_range("track_temp_c", temp, 0.0, 80.0)?;
        }
        Ok(())
    }
}

fn check_range(field: &'static str, value: f64, min: f64, max: f64) -> Result<()> {
    // NaN fails `contains`
    if (min..=max).contains(&value) {
        Ok(())
    } else {
        Err(PlannerError::OutOfRange {
            field,
            min,
            max,
            value,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StintDetail {
    pub stint_number: u32,
    pub compound: CompoundCode,
    pub start_lap: u32,
    pub end_lap: u32,
    pub laps: u32,
    pub stint_time_s: f64,
    pub avg_lap_time_s: f64,
    pub final_lap_time_s: f64,
    pub cliff_laps: u32,
    pub is_wet_tyre: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrategyResult {
    pub name: String,
    pub stops: u32,
    pub total_time_s: f64,
    pub total_time_display: String,
    pub pit_stop_laps: Vec<u32>,
    pub stints: Vec<StintDetail>,
    pub weather_note: String,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub historical_adjustment_s: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub historical_notes: Option<Vec<String>>,
}

impl StrategyResult {
    pub fn compounds(&self) -> Vec<CompoundCode> {
        self.stints.iter().map(|s| s.compound).collect()
    }

    /// Lap on which the first stop is taken, if any.
    pub fn first_pit_lap(&self) -> Option<u32> {
        self.pit_stop_laps.first().copied()
    }
}

/// `h:mm:ss.sss`
pub fn format_race_time(total_s: f64) -> String {
    let hours = (total_s / 3600.0).floor();
    let minutes = ((total_s % 3600.0) / 60.0).floor();
    let seconds = total_s % 60.0;
    format!("{}:{:02}:{:06.3}", hours as u64, minutes as u64, seconds)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulationOutcome {
    pub total_laps: u32,
    pub pit_loss_seconds: f64,
    pub base_lap_time_s: f64,
    pub track_temp_c: Option<f64>,
    pub weather_condition: WeatherCondition,
    pub rain_intensity: f64,
    pub strategies: Vec<StrategyResult>,
    pub recommended: String,
    pub delta_s: f64,
    pub model: String,
}

impl SimulationOutcome {
    fn ranked(request: &SimulationRequest, strategies: Vec<StrategyResult>) -> Self {
        let mut outcome = Self {
            total_laps: request.total_laps,
            pit_loss_seconds: request.pit_loss_seconds,
            base_lap_time_s: request.base_lap_time_s,
            track_temp_c: request.track_temp_c,
            weather_condition: request.weather_condition,
            rain_intensity: request.rain_intensity,
            strategies,
            recommended: String::new(),
            delta_s: 0.0,
            model: MODEL_ID.to_string(),
        };
        outcome.rerank();
        outcome
    }

    /// Sort by total time (stable) and refresh `recommended` and `delta_s`.
    pub(crate) fn rerank(&mut self) {
        sort_by_time(&mut self.strategies);
        self.recommended = self
            .strategies
            .first()
            .map_or_else(|| "N/A".to_string(), |s| s.name.clone());
        self.delta_s = match self.strategies.as_slice() {
            [best, second, ..] => round_to(second.total_time_s - best.total_time_s, 3),
            _ => 0.0,
        };
    }
}

fn sort_by_time(strategies: &mut [StrategyResult]) {
    strategies.sort_by(|a, b| a.total_time_s.total_cmp(&b.total_time_s));
}

/// Enumerate, time and rank candidate strategies for `request` on `table`.
///
/// The table is used as given; apply any temperature adjustment beforehand.
pub fn simulate(request: &SimulationRequest, table: &CompoundTable) -> SimulationOutcome {
    let condition = request.weather_condition;
    let mut candidates = match condition {
        WeatherCondition::Dry => dry_strategies(request, table),
        WeatherCondition::Damp => damp_strategies(request, table),
        WeatherCondition::Wet => wet_strategies(request, table),
        WeatherCondition::Extreme => extreme_strategies(request, table),
    };
    sort_by_time(&mut candidates);
    let generated = candidates.len();

    let kept = match condition {
        WeatherCondition::Dry => {
            let (one_stops, rest): (Vec<_>, Vec<_>) =
                candidates.into_iter().partition(|s| s.stops == 1);
            one_stops
                .into_iter()
                .take(3)
                .chain(rest.into_iter().filter(|s| s.stops == 2).take(3))
                .collect()
        }
        _ => candidates.into_iter().take(6).collect(),
    };

    let outcome = SimulationOutcome::ranked(request, kept);
    info!(
        %condition,
        generated,
        kept = outcome.strategies.len(),
        recommended = %outcome.recommended,
        "strategies simulated"
    );
    outcome
}

// ---------- Stint planning ----------

/// Times a fixed sequence of (compound, laps) stints on one lap model per compound.
struct RacePlanner<'a> {
    table: &'a CompoundTable,
    base_lap_s: f64,
    pit_loss_s: f64,
    total_laps: u32,
}

impl<'a> RacePlanner<'a> {
    fn new(request: &SimulationRequest, table: &'a CompoundTable) -> Self {
        Self {
            table,
            base_lap_s: request.base_lap_time_s * request.weather_condition.pace_multiplier(),
            pit_loss_s: request.pit_loss_seconds,
            total_laps: request.total_laps,
        }
    }

    fn params(&self, code: CompoundCode) -> Option<&'a CompoundParameters> {
        self.table.get(code)
    }

    fn cap(&self, params: &CompoundParameters) -> u32 {
        params.typical_max_stint_laps() + STINT_CAP_MARGIN
    }

    fn total_time(&self, plan: &[(LapModel, u32)]) -> f64 {
        let stints: f64 = plan.iter().map(|(model, laps)| model.stint(*laps).total_s).sum();
        stints + plan.len().saturating_sub(1) as f64 * self.pit_loss_s
    }

    fn build(&self, name: String, plan: &[(CompoundCode, u32)], note: &str) -> Option<StrategyResult> {
        let mut stints = Vec::with_capacity(plan.len());
        let mut pit_stop_laps = Vec::new();
        let mut total_time_s = 0.0;
        let mut current_lap = 1;

        for (i, &(code, laps)) in plan.iter().enumerate() {
            let timing = LapModel::new(self.base_lap_s, self.params(code)?).stint(laps);
            let end_lap = (current_lap + laps).saturating_sub(1);
            stints.push(StintDetail {
                stint_number: i as u32 + 1,
                compound: code,
                start_lap: current_lap,
                end_lap,
                laps,
                stint_time_s: timing.total_s,
                avg_lap_time_s: timing.avg_lap_s,
                final_lap_time_s: timing.final_lap_s,
                cliff_laps: timing.cliff_laps,
                is_wet_tyre: code.is_wet_tyre(),
            });
            total_time_s += timing.total_s;
            if i + 1 < plan.len() {
                pit_stop_laps.push(end_lap);
                total_time_s += self.pit_loss_s;
            }
            current_lap += laps;
        }

        debug!(%name, total_time_s, "candidate built");
        Some(StrategyResult {
            name,
            stops: pit_stop_laps.len() as u32,
            total_time_display: format_race_time(total_time_s),
            total_time_s,
            pit_stop_laps,
            stints,
            weather_note: note.to_string(),
            historical_adjustment_s: None,
            historical_notes: None,
        })
    }

    fn optimize_one_stop(&self, first: CompoundCode, second: CompoundCode) -> Option<StrategyResult> {
        let (p1, p2) = (self.params(first)?, self.params(second)?);
        let (m1, m2) = (LapModel::new(self.base_lap_s, p1), LapModel::new(self.base_lap_s, p2));
        let (cap1, cap2) = (self.cap(p1), self.cap(p2));
        let total = self.total_laps;

        let mut best: Option<(f64, u32)> = None;
        for split in MIN_STINT_LAPS..=total.saturating_sub(MIN_STINT_LAPS) {
            if split > cap1 || total - split > cap2 {
                continue;
            }
            let t = self.total_time(&[(m1, split), (m2, total - split)]);
            if best.map_or(true, |(best_t, _)| t < best_t) {
                best = Some((t, split));
            }
        }

        let split = match best {
            Some((_, split)) => split,
            None => {
                warn!(%first, %second, total, "no 1-stop split fits the stint caps, using an even split");
                total / 2
            }
        };
        self.build(
            format!("1-Stop: {} \u{2192} {}", first, second),
            &[(first, split), (second, total - split)],
            "",
        )
    }

    fn optimize_two_stop(&self, codes: [CompoundCode; 3]) -> Option<StrategyResult> {
        let [c1, c2, c3] = codes;
        let (p1, p2, p3) = (self.params(c1)?, self.params(c2)?, self.params(c3)?);
        let models = [p1, p2, p3].map(|p| LapModel::new(self.base_lap_s, p));
        let (cap1, cap2, cap3) = (self.cap(p1), self.cap(p2), self.cap(p3));
        let total = self.total_laps;

        let mut best: Option<(f64, u32, u32)> = None;
        let s1_max = cap1.min(total.saturating_sub(2 * MIN_STINT_LAPS));
        for s1 in MIN_STINT_LAPS..=s1_max {
            let s2_max = cap2.min(total.saturating_sub(s1 + MIN_STINT_LAPS));
            for s2 in MIN_STINT_LAPS..=s2_max {
                let s3 = total - s1 - s2;
                if s3 < MIN_STINT_LAPS || s3 > cap3 {
                    continue;
                }
                let t = self.total_time(&[(models[0], s1), (models[1], s2), (models[2], s3)]);
                if best.map_or(true, |(best_t, _, _)| t < best_t) {
                    best = Some((t, s1, s2));
                }
            }
        }

        let (s1, s2) = match best {
            Some((_, s1, s2)) => (s1, s2),
            None => {
                warn!(%c1, %c2, %c3, total, "no 2-stop split fits the stint caps, using an even split");
                (total / 3, total / 3)
            }
        };
        self.build(
            format!("2-Stop: {} \u{2192} {} \u{2192} {}", c1, c2, c3),
            &[(c1, s1), (c2, s2), (c3, total - s1 - s2)],
            "",
        )
    }
}

// ---------- Dry ----------

fn dry_strategies(request: &SimulationRequest, table: &CompoundTable) -> Vec<StrategyResult> {
    let planner = RacePlanner::new(request, table);
    let slicks = table.slick_codes();
    let mut strategies = Vec::new();

    for &a in &slicks {
        for &b in slicks.iter().filter(|b| **b != a) {
            strategies.extend(planner.optimize_one_stop(a, b));
        }
    }

    for &a in &slicks {
        for &b in &slicks {
            for &c in &slicks {
                if a == b && b == c {
                    continue;
                }
                strategies.extend(planner.optimize_two_stop([a, b, c]));
            }
        }
    }
    strategies
}

// ---------- Wet weather templates ----------

fn damp_strategies(request: &SimulationRequest, table: &CompoundTable) -> Vec<StrategyResult> {
    let total = request.total_laps;
    let crossover = floor_laps(total, request.rain_intensity * 0.5)
        .min(total.saturating_sub(10))
        .max(5);
    let note = format!("Track dries ~lap {}. Inters mandatory at start.", crossover);

    // inters overheat once the track is dry
    let inter = intermediate_parameters()
        .with_cliff(crossover, DAMP_INTER_CLIFF_RATE)
        .with_max_stint(crossover + 5);
    let damp_table = table.to_builder().insert(inter).build();
    let planner = RacePlanner::new(request, &damp_table);
    let slicks = damp_table.slick_codes();
    let inter = CompoundCode::Intermediate;
    let remaining = total.saturating_sub(crossover);
    let mut strategies = Vec::new();

    for &slick in &slicks {
        strategies.extend(planner.build(
            format!("1-Stop: INTER \u{2192} {}", slick),
            &[(inter, crossover), (slick, remaining)],
            &note,
        ));
    }

    let second = remaining / 2;
    let third = remaining - second;
    if second >= MIN_STINT_LAPS && third >= MIN_STINT_LAPS {
        for &a in &slicks {
            for &b in slicks.iter().filter(|b| **b != a) {
                strategies.extend(planner.build(
                    format!("2-Stop: INTER \u{2192} {} \u{2192} {}", a, b),
                    &[(inter, crossover), (a, second), (b, third)],
                    &note,
                ));
            }
        }
    }
    strategies
}

fn wet_strategies(request: &SimulationRequest, table: &CompoundTable) -> Vec<StrategyResult> {
    let total = request.total_laps;
    let rain = request.rain_intensity;
    let crossover = floor_laps(total, rain * 0.7)
        .min(total.saturating_sub(5))
        .max(10);

    let wet_table = with_wet_tyres(table);
    let planner = RacePlanner::new(request, &wet_table);
    let (inter, wet) = (CompoundCode::Intermediate, CompoundCode::Wet);
    let mut strategies = Vec::new();

    strategies.extend(planner.build(
        format!("0-Stop: {}", inter),
        &[(inter, total)],
        "Full wet race on inters",
    ));

    if rain > 0.5 {
        let switch = total / 2;
        strategies.extend(planner.build(
            "1-Stop: WET \u{2192} INTER".to_string(),
            &[(wet, switch), (inter, total - switch)],
            "Start Full Wets, switch to Inters as rain eases",
        ));
    }

    if rain < 0.6 && crossover + 8 < total {
        let note = format!("Late crossover to slicks at ~lap {}", crossover);
        for slick in wet_table.slick_codes().into_iter().take(2) {
            strategies.extend(planner.build(
                format!("1-Stop: INTER \u{2192} {}", slick),
                &[(inter, crossover), (slick, total - crossover)],
                &note,
            ));
        }
    }
    strategies
}

fn extreme_strategies(request: &SimulationRequest, table: &CompoundTable) -> Vec<StrategyResult> {
    let total = request.total_laps;
    let switch = (total / 2)
        .max(floor_laps(total, request.rain_intensity * 0.6))
        .min(total.saturating_sub(5));

    let wet_table = with_wet_tyres(table);
    let planner = RacePlanner::new(request, &wet_table);
    let (inter, wet) = (CompoundCode::Intermediate, CompoundCode::Wet);

    [
        planner.build(
            format!("0-Stop: {}", wet),
            &[(wet, total)],
            "Extreme rain. Full Wets only",
        ),
        planner.build(
            "1-Stop: WET \u{2192} INTER".to_string(),
            &[(wet, switch), (inter, total - switch)],
            "Switch to Inters if rain eases",
        ),
    ]
    .into_iter()
    .flatten()
    .collect()
}

fn with_wet_tyres(table: &CompoundTable) -> CompoundTable {
    table
        .to_builder()
        .insert(intermediate_parameters())
        .insert(wet_parameters())
        .build()
}

fn floor_laps(total_laps: u32, fraction: f64) -> u32 {
    (total_laps as f64 * fraction).floor().max(0.0) as u32
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compound::fallback_table;

    fn request(condition: WeatherCondition, total_laps: u32, rain: f64) -> SimulationRequest {
        SimulationRequest {
            total_laps,
            weather_condition: condition,
            rain_intensity: rain,
            ..SimulationRequest::default()
        }
    }

    fn two_compound_table() -> CompoundTable {
        let fallback = fallback_table();
        CompoundTable::builder()
            .insert(fallback.get(CompoundCode::C2).unwrap().clone())
            .insert(fallback.get(CompoundCode::C4).unwrap().clone())
            .build()
    }

    fn find<'a>(outcome: &'a SimulationOutcome, name: &str) -> &'a StrategyResult {
        outcome
            .strategies
            .iter()
            .find(|s| s.name == name)
            .unwrap_or_else(|| panic!("missing strategy {name}"))
    }

    fn assert_consistent(strategy: &StrategyResult, total_laps: u32, pit_loss: f64) {
        let laps: u32 = strategy.stints.iter().map(|s| s.laps).sum();
        assert_eq!(laps, total_laps, "{}", strategy.name);
        assert_eq!(strategy.pit_stop_laps.len() as u32, strategy.stops);
        assert_eq!(strategy.stints.len() as u32, strategy.stops + 1);
        let stint_sum: f64 = strategy.stints.iter().map(|s| s.stint_time_s).sum();
        let expected = stint_sum + strategy.stops as f64 * pit_loss;
        assert!((strategy.total_time_s - expected).abs() < 1e-3, "{}", strategy.name);
        for pair in strategy.stints.windows(2) {
            assert_eq!(pair[0].end_lap + 1, pair[1].start_lap);
        }
    }

    #[test]
    fn one_stop_splits_at_the_optimum() {
        let outcome = simulate(&SimulationRequest::default(), &two_compound_table());

        let medium_first = find(&outcome, "1-Stop: C2 \u{2192} C4");
        assert_eq!(medium_first.stints[0].laps, 34);
        assert_eq!(medium_first.stints[1].laps, 23);
        assert_eq!(medium_first.pit_stop_laps, vec![34]);
        assert!((medium_first.total_time_s - 5250.942).abs() < 1e-3);

        let soft_first = find(&outcome, "1-Stop: C4 \u{2192} C2");
        assert_eq!(soft_first.stints[0].laps, 23);
        assert_eq!(soft_first.stints[1].laps, 34);
    }

    #[test]
    fn dry_keeps_best_one_and_two_stops() {
        let outcome = simulate(&SimulationRequest::default(), &two_compound_table());

        // two 1-stops exist, the best three of six 2-stops are kept
        assert_eq!(outcome.strategies.len(), 5);
        assert_eq!(outcome.strategies.iter().filter(|s| s.stops == 2).count(), 3);
        assert_eq!(outcome.strategies[0].stops, 2);
        assert!((outcome.strategies[0].total_time_s - 5246.37).abs() < 1e-3);
        assert_eq!(outcome.recommended, outcome.strategies[0].name);
        assert!(outcome.delta_s >= 0.0);
        assert_eq!(outcome.model, MODEL_ID);

        for pair in outcome.strategies.windows(2) {
            assert!(pair[0].total_time_s <= pair[1].total_time_s);
        }
        for s in &outcome.strategies {
            assert_consistent(s, 57, 22.0);
            assert!(s.stints.iter().all(|st| st.laps >= MIN_STINT_LAPS));
        }
    }

    #[test]
    fn full_fallback_table_produces_valid_dry_strategies() {
        let outcome = simulate(&request(WeatherCondition::Dry, 66, 0.0), &fallback_table());
        assert_eq!(outcome.strategies.len(), 6);
        for s in &outcome.strategies {
            assert_consistent(s, 66, 22.0);
            assert!(s.stints.iter().all(|st| !st.is_wet_tyre));
        }
    }

    #[test]
    fn infeasible_caps_fall_back_to_even_split() {
        let c5 = fallback_table().get(CompoundCode::C5).unwrap().with_max_stint(5);
        let c4 = fallback_table().get(CompoundCode::C4).unwrap().with_max_stint(5);
        let table = CompoundTable::builder().insert(c4).insert(c5).build();

        let outcome = simulate(&SimulationRequest::default(), &table);
        let one_stop = find(&outcome, "1-Stop: C4 \u{2192} C5");
        assert_eq!(one_stop.stints[0].laps, 28);
        assert_eq!(one_stop.stints[1].laps, 29);

        let two_stop = outcome.strategies.iter().find(|s| s.stops == 2).unwrap();
        let laps: Vec<u32> = two_stop.stints.iter().map(|s| s.laps).collect();
        assert_eq!(laps, vec![19, 19, 19]);
    }

    #[test]
    fn damp_pits_off_inters_at_crossover() {
        let outcome = simulate(&request(WeatherCondition::Damp, 58, 0.4), &fallback_table());
        assert!(!outcome.strategies.is_empty());
        for s in &outcome.strategies {
            assert_eq!(s.stints[0].compound, CompoundCode::Intermediate);
            assert_eq!(s.stints[0].laps, 11);
            assert!(s.stints[0].is_wet_tyre);
            assert_eq!(s.weather_note, "Track dries ~lap 11. Inters mandatory at start.");
            assert_consistent(s, 58, 22.0);
        }
        assert!(outcome.strategies.len() <= 6);
    }

    #[test]
    fn short_damp_race_skips_two_stops() {
        // crossover floors at 5, leaving 5 laps: too few to split across two slicks
        let outcome = simulate(&request(WeatherCondition::Damp, 10, 0.4), &fallback_table());
        assert_eq!(outcome.strategies.len(), 5);
        for s in &outcome.strategies {
            assert_eq!(s.stops, 1);
            assert_eq!(s.stints[0].laps, 5);
            assert_eq!(s.stints[1].laps, 5);
            assert_consistent(s, 10, 22.0);
        }
    }

    #[test]
    fn damp_base_lap_is_slower_than_dry() {
        let outcome = simulate(&request(WeatherCondition::Damp, 58, 0.4), &fallback_table());
        let slick_stint = &outcome.strategies[0].stints[1];
        let params = fallback_table().get(slick_stint.compound).unwrap().clone();
        let expected = LapModel::new(90.0 * 1.06, &params).stint(slick_stint.laps);
        assert!((slick_stint.stint_time_s - expected.total_s).abs() < 1e-9);
    }

    #[test]
    fn heavy_wet_race_uses_wet_tyres_only() {
        let outcome = simulate(&request(WeatherCondition::Wet, 57, 0.7), &fallback_table());
        let names: Vec<&str> = outcome.strategies.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names.len(), 2);
        assert!(names.contains(&"0-Stop: INTERMEDIATE"));
        assert!(names.contains(&"1-Stop: WET \u{2192} INTER"));

        let switch = find(&outcome, "1-Stop: WET \u{2192} INTER");
        assert_eq!(switch.stints[0].laps, 28);
        assert!(switch.stints.iter().all(|s| s.is_wet_tyre));
    }

    #[test]
    fn light_wet_race_offers_late_slicks() {
        let outcome = simulate(&request(WeatherCondition::Wet, 57, 0.3), &fallback_table());
        assert_eq!(outcome.strategies.len(), 3);
        let to_c1 = find(&outcome, "1-Stop: INTER \u{2192} C1");
        assert_eq!(to_c1.stints[0].laps, 11);
        assert_eq!(to_c1.weather_note, "Late crossover to slicks at ~lap 11");
        find(&outcome, "1-Stop: INTER \u{2192} C2");
    }

    #[test]
    fn extreme_switch_lap() {
        let outcome = simulate(&request(WeatherCondition::Extreme, 57, 0.9), &fallback_table());
        assert_eq!(outcome.strategies.len(), 2);
        let switch = find(&outcome, "1-Stop: WET \u{2192} INTER");
        assert_eq!(switch.stints[0].laps, 30);
        assert_eq!(switch.pit_stop_laps, vec![30]);
        find(&outcome, "0-Stop: WET");
    }

    #[test]
    fn wet_templates_leave_input_table_alone() {
        let table = fallback_table();
        simulate(&request(WeatherCondition::Damp, 58, 0.4), &table);
        assert!(!table.contains(CompoundCode::Intermediate));
        assert!(!table.contains(CompoundCode::Wet));
    }

    #[test]
    fn empty_table_recommends_nothing() {
        let empty = CompoundTable::builder().build();
        let outcome = simulate(&SimulationRequest::default(), &empty);
        assert!(outcome.strategies.is_empty());
        assert_eq!(outcome.recommended, "N/A");
        assert_eq!(outcome.delta_s, 0.0);
    }

    #[test]
    fn validate_rejects_out_of_range_fields() {
        assert!(SimulationRequest::default().validate().is_ok());

        let short = SimulationRequest { total_laps: 5, ..SimulationRequest::default() };
        assert!(matches!(
            short.validate(),
            Err(PlannerError::OutOfRange { field: "total_laps", .. })
        ));

        let nan_pit = SimulationRequest { pit_loss_seconds: f64::NAN, ..SimulationRequest::default() };
        assert!(nan_pit.validate().is_err());

        let flood = SimulationRequest { rain_intensity: 1.5, ..SimulationRequest::default() };
        assert!(flood.validate().is_err());
    }

    #[test]
    fn weather_condition_parses_case_insensitively() {
        assert_eq!("Damp".parse::<WeatherCondition>().unwrap(), WeatherCondition::Damp);
        assert_eq!(" EXTREME ".parse::<WeatherCondition>().unwrap(), WeatherCondition::Extreme);
        assert!("monsoon".parse::<WeatherCondition>().is_err());
        assert_eq!(WeatherCondition::Wet.to_string(), "wet");
    }

    #[test]
    fn race_time_display() {
        assert_eq!(format_race_time(5250.942), "1:27:30.942");
        assert_eq!(format_race_time(59.5), "0:00:59.500");
    }
}
