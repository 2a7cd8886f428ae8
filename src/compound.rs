use serde::{Deserialize, Serialize, Serializer};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::error::PlannerError;

/// Absolute tyre identifier. Slicks carry Pirelli's construction number
/// (C1 hardest .. C5 softest); the two wet tyres have no number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum CompoundCode {
    Slick(u8),
    Intermediate,
    Wet,
}

impl CompoundCode {
    pub const C1: CompoundCode = CompoundCode::Slick(1);
    pub const C2: CompoundCode = CompoundCode::Slick(2);
    pub const C3: CompoundCode = CompoundCode::Slick(3);
    pub const C4: CompoundCode = CompoundCode::Slick(4);
    pub const C5: CompoundCode = CompoundCode::Slick(5);

    /// Numeric softness used by the cliff and temperature heuristics; 3 for wet tyres.
    pub fn code_num(self) -> u8 {
        match self {
            CompoundCode::Slick(n) => n,
            CompoundCode::Intermediate | CompoundCode::Wet => 3,
        }
    }

    pub fn is_slick(self) -> bool {
        matches!(self, CompoundCode::Slick(_))
    }

    pub fn is_wet_tyre(self) -> bool {
        !self.is_slick()
    }
}

impl fmt::Display for CompoundCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CompoundCode::Slick(n) => write!(f, "C{}", n),
            CompoundCode::Intermediate => f.write_str("INTERMEDIATE"),
            CompoundCode::Wet => f.write_str("WET"),
        }
    }
}

impl FromStr for CompoundCode {
    type Err = PlannerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let upper = s.trim().to_uppercase();
        match upper.as_str() {
            "INTERMEDIATE" | "INTER" | "I" => return Ok(CompoundCode::Intermediate),
            "WET" | "W" => return Ok(CompoundCode::Wet),
            _ => {}
        }
        upper
            .strip_prefix('C')
            .and_then(|digits| digits.parse::<u8>().ok())
            .filter(|n| *n > 0)
            .map(CompoundCode::Slick)
            .ok_or_else(|| PlannerError::InvalidCompound(s.to_string()))
    }
}

impl TryFrom<String> for CompoundCode {
    type Error = PlannerError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<CompoundCode> for String {
    fn from(code: CompoundCode) -> Self {
        code.to_string()
    }
}

/// Wear parameters for one compound. Built once, never modified: the `with_*`
/// methods return new values. Rates and offsets are clamped at construction.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CompoundParameters {
    code: CompoundCode,
    avg_deg_s_per_lap: f64,
    cliff_onset_lap: u32,
    cliff_rate_s_per_lap2: f64,
    typical_max_stint_laps: u32,
    base_pace_offset: f64,
    avg_reference_lap_s: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    temp_multiplier: Option<f64>,
}

impl CompoundParameters {
    pub fn new(
        code: CompoundCode,
        avg_deg_s_per_lap: f64,
        cliff_onset_lap: u32,
        cliff_rate_s_per_lap2: f64,
        typical_max_stint_laps: u32,
        base_pace_offset: f64,
        avg_reference_lap_s: f64,
    ) -> Self {
        Self {
            code,
            avg_deg_s_per_lap: avg_deg_s_per_lap.max(0.0),
            cliff_onset_lap: cliff_onset_lap.max(1),
            cliff_rate_s_per_lap2: cliff_rate_s_per_lap2.max(0.0),
            typical_max_stint_laps: typical_max_stint_laps.max(1),
            base_pace_offset: base_pace_offset.max(0.0),
            avg_reference_lap_s,
            temp_multiplier: None,
        }
    }

    pub fn code(&self) -> CompoundCode {
        self.code
    }

    pub fn avg_deg_s_per_lap(&self) -> f64 {
        self.avg_deg_s_per_lap
    }

    pub fn cliff_onset_lap(&self) -> u32 {
        self.cliff_onset_lap
    }

    pub fn cliff_rate_s_per_lap2(&self) -> f64 {
        self.cliff_rate_s_per_lap2
    }

    pub fn typical_max_stint_laps(&self) -> u32 {
        self.typical_max_stint_laps
    }

    pub fn base_pace_offset(&self) -> f64 {
        self.base_pace_offset
    }

    pub fn avg_reference_lap_s(&self) -> f64 {
        self.avg_reference_lap_s
    }

    pub fn temp_multiplier(&self) -> Option<f64> {
        self.temp_multiplier
    }

    pub fn with_cliff(&self, onset_lap: u32, rate_s_per_lap2: f64) -> Self {
        Self {
            cliff_onset_lap: onset_lap.max(1),
            cliff_rate_s_per_lap2: rate_s_per_lap2.max(0.0),
            ..self.clone()
        }
    }

    pub fn with_max_stint(&self, laps: u32) -> Self {
        Self {
            typical_max_stint_laps: laps.max(1),
            ..self.clone()
        }
    }

    /// Copy with rescaled wear fields, as produced by the temperature adjuster.
    pub(crate) fn rescaled(
        &self,
        avg_deg_s_per_lap: f64,
        cliff_onset_lap: u32,
        cliff_rate_s_per_lap2: f64,
        typical_max_stint_laps: u32,
        temp_multiplier: f64,
    ) -> Self {
        Self {
            temp_multiplier: Some(temp_multiplier),
            ..Self::new(
                self.code,
                avg_deg_s_per_lap,
                cliff_onset_lap,
                cliff_rate_s_per_lap2,
                typical_max_stint_laps,
                self.base_pace_offset,
                self.avg_reference_lap_s,
            )
        }
    }
}

/// Compound entry as accepted from configuration files; the code comes from the map key.
#[derive(Debug, Clone, Deserialize)]
pub struct CompoundSpec {
    pub avg_deg_s_per_lap: f64,
    #[serde(default = "default_cliff_onset")]
    pub cliff_onset_lap: u32,
    #[serde(default = "default_cliff_rate")]
    pub cliff_rate_s_per_lap2: f64,
    pub typical_max_stint_laps: u32,
    #[serde(default)]
    pub base_pace_offset: f64,
    #[serde(default)]
    pub avg_reference_lap_s: f64,
}

fn default_cliff_onset() -> u32 {
    20
}

fn default_cliff_rate() -> f64 {
    0.015
}

impl CompoundSpec {
    pub fn into_parameters(self, code: CompoundCode) -> CompoundParameters {
        CompoundParameters::new(
            code,
            self.avg_deg_s_per_lap,
            self.cliff_onset_lap,
            self.cliff_rate_s_per_lap2,
            self.typical_max_stint_laps,
            self.base_pace_offset,
            self.avg_reference_lap_s,
        )
    }
}

/// Immutable code → parameters table. Iteration order is the code order
/// (C1..C5, then INTERMEDIATE, WET).
#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
#[serde(from = "BTreeMap<CompoundCode, CompoundSpec>")]
pub struct CompoundTable {
    entries: BTreeMap<CompoundCode, CompoundParameters>,
}

impl CompoundTable {
    pub fn builder() -> CompoundTableBuilder {
        CompoundTableBuilder::default()
    }

    /// Start a new table from this one; `self` is left untouched.
    pub fn to_builder(&self) -> CompoundTableBuilder {
        CompoundTableBuilder {
            entries: self.entries.clone(),
        }
    }

    pub fn get(&self, code: CompoundCode) -> Option<&CompoundParameters> {
        self.entries.get(&code)
    }

    pub fn contains(&self, code: CompoundCode) -> bool {
        self.entries.contains_key(&code)
    }

    pub fn iter(&self) -> impl Iterator<Item = &CompoundParameters> {
        self.entries.values()
    }

    pub fn codes(&self) -> impl Iterator<Item = CompoundCode> + '_ {
        self.entries.keys().copied()
    }

    pub fn slick_codes(&self) -> Vec<CompoundCode> {
        self.codes().filter(|c| c.is_slick()).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Serialize for CompoundTable {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.entries.serialize(serializer)
    }
}

impl From<BTreeMap<CompoundCode, CompoundSpec>> for CompoundTable {
    fn from(specs: BTreeMap<CompoundCode, CompoundSpec>) -> Self {
        specs
            .into_iter()
            .fold(CompoundTable::builder(), |b, (code, spec)| {
                b.insert(spec.into_parameters(code))
            })
            .build()
    }
}

/// The only way to produce a [`CompoundTable`]. Each simulation call builds its
/// own table, so shared base tables are never modified.
#[derive(Debug, Clone, Default)]
pub struct CompoundTableBuilder {
    entries: BTreeMap<CompoundCode, CompoundParameters>,
}

impl CompoundTableBuilder {
    /// Insert or replace the entry for `params.code()`.
    pub fn insert(mut self, params: CompoundParameters) -> Self {
        self.entries.insert(params.code(), params);
        self
    }

    /// Insert only when no entry exists yet for the code.
    pub fn insert_missing(mut self, params: CompoundParameters) -> Self {
        self.entries.entry(params.code()).or_insert(params);
        self
    }

    pub fn build(self) -> CompoundTable {
        CompoundTable {
            entries: self.entries,
        }
    }
}

/// Generic per-compound values used when a circuit has no history. They describe
/// the compound chemistry, not any particular track.
pub fn fallback_table() -> CompoundTable {
    use CompoundCode as C;
    CompoundTable::builder()
        .insert(CompoundParameters::new(C::C1, 0.030, 35, 0.006, 45, 2.0, 84.0))
        .insert(CompoundParameters::new(C::C2, 0.045, 30, 0.008, 40, 1.3, 83.3))
        .insert(CompoundParameters::new(C::C3, 0.065, 24, 0.012, 32, 0.7, 82.7))
        .insert(CompoundParameters::new(C::C4, 0.095, 18, 0.025, 25, 0.2, 82.2))
        .insert(CompoundParameters::new(C::C5, 0.140, 12, 0.035, 18, 0.0, 82.0))
        .build()
}

/// Intermediate on a wet track: durable, 2 s off slick pace. No reference lap is
/// recorded since there is no historical wet data.
pub fn intermediate_parameters() -> CompoundParameters {
    CompoundParameters::new(CompoundCode::Intermediate, 0.02, 25, 0.005, 40, 2.0, 0.0)
}

/// Full wet: extreme rain only.
pub fn wet_parameters() -> CompoundParameters {
    CompoundParameters::new(CompoundCode::Wet, 0.01, 35, 0.003, 50, 5.0, 0.0)
}

/// Pirelli's per-race choice of three slicks and the role each one plays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Nomination {
    pub hard: CompoundCode,
    pub medium: CompoundCode,
    pub soft: CompoundCode,
}

impl Default for Nomination {
    fn default() -> Self {
        Self {
            hard: CompoundCode::C2,
            medium: CompoundCode::C3,
            soft: CompoundCode::C4,
        }
    }
}

impl Nomination {
    pub fn code_for_role(&self, role: &str) -> Option<CompoundCode> {
        match role.trim().to_uppercase().as_str() {
            "HARD" => Some(self.hard),
            "MEDIUM" => Some(self.medium),
            "SOFT" => Some(self.soft),
            "INTERMEDIATE" => Some(CompoundCode::Intermediate),
            "WET" => Some(CompoundCode::Wet),
            _ => None,
        }
    }

    /// Role label for a code, e.g. C3 → "MEDIUM" under the default nomination.
    pub fn role_for_code(&self, code: CompoundCode) -> Option<&'static str> {
        match code {
            CompoundCode::Intermediate => Some("INTERMEDIATE"),
            CompoundCode::Wet => Some("WET"),
            c if c == self.hard => Some("HARD"),
            c if c == self.medium => Some("MEDIUM"),
            c if c == self.soft => Some("SOFT"),
            _ => None,
        }
    }
}

/// Nominations keyed by season.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NominationTable {
    by_season: BTreeMap<i32, Nomination>,
}

impl NominationTable {
    pub fn with_season(mut self, season: i32, nomination: Nomination) -> Self {
        self.by_season.insert(season, nomination);
        self
    }

    /// Nomination for `season`, else the most recent earlier season, else C2/C3/C4.
    pub fn for_season(&self, season: i32) -> Nomination {
        self.by_season
            .range(..=season)
            .next_back()
            .map(|(_, n)| *n)
            .unwrap_or_default()
    }
}
