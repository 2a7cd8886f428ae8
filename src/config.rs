use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use tracing::info;

use crate::compound::{CompoundTable, NominationTable};
use crate::error::{PlannerError, Result};
use crate::strategy::SimulationRequest;

/// Environment variable naming a config file when none is passed on the command line.
pub const CONFIG_ENV_VAR: &str = "TYRE_STRATEGY_CONFIG";

/// Seconds-valued weights for the historical alignment pass. All adjustments are
/// small next to a ~22 s pit stop; set `master` to 0 to switch the pass off.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoringWeights {
    pub first_stop_penalty_per_lap_s: f64,
    pub first_stop_max_penalty_s: f64,
    pub sequence_match_bonus_s: f64,
    pub sequence_partial_factor: f64,
    pub stop_count_bonus_s: f64,
    pub master: f64,
}

impl Default for ScoringWeights {
    fn default() -> Self {
        Self {
            first_stop_penalty_per_lap_s: 0.15,
            first_stop_max_penalty_s: 2.0,
            sequence_match_bonus_s: 1.5,
            sequence_partial_factor: 0.4,
            stop_count_bonus_s: 0.5,
            master: 1.0,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlannerConfig {
    pub race: SimulationRequest,
    pub scoring: ScoringWeights,
    pub nominations: NominationTable,
    /// Replaces the fitted table when present.
    pub compounds: Option<CompoundTable>,
}

impl PlannerConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let data = fs::read_to_string(path).map_err(|source| PlannerError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let config: PlannerConfig = serde_json::from_str(&data)?;
        config.race.validate()?;
        info!(path = %path.display(), "loaded planner config");
        Ok(config)
    }

    /// Config from `path`, else from `TYRE_STRATEGY_CONFIG`, else defaults.
    pub fn resolve(path: Option<&str>) -> Result<Self> {
        match path.map(str::to_string).or_else(|| std::env::var(CONFIG_ENV_VAR).ok()) {
            Some(p) => Self::load(p),
            None => Ok(Self::default()),
        }
    }
}
