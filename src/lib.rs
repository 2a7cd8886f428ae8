//! Tyre degradation fitting and pit-stop strategy simulation.
//!
//! Historical stints are fitted into per-compound wear parameters ([`model`]),
//! optionally rescaled for track temperature ([`temperature`]), and fed to the
//! strategy optimizer ([`strategy`]). Past races at the circuit are summarised by
//! [`historical`] and used by [`scoring`] to nudge the final ranking.

pub mod compound;
pub mod config;
pub mod data;
pub mod error;
pub mod historical;
pub mod laptime;
pub mod model;
pub mod scoring;
pub mod stats;
pub mod strategy;
pub mod temperature;

pub use compound::{CompoundCode, CompoundParameters, CompoundTable, CompoundTableBuilder, Nomination};
pub use config::{PlannerConfig, ScoringWeights};
pub use error::{PlannerError, Result};
pub use historical::{analyze_history, HistoricalProfile, InsufficientData, RaceRecord};
pub use laptime::{lap_time, stint_time, LapModel, StintTiming};
pub use model::{fit_degradation, DataSource, DegradationFit, StintRecord};
pub use scoring::apply_historical_alignment;
pub use strategy::{simulate, SimulationOutcome, SimulationRequest, StrategyResult, WeatherCondition};
pub use temperature::{adjust_for_temperature, temperature_multiplier};
