// Nudges simulated strategies toward what teams have historically done at the circuit.

use tracing::debug;

use crate::compound::Nomination;
use crate::config::ScoringWeights;
use crate::historical::{
    FirstStopStats, HistoricalProfile, StopCountDistribution, StrategySequenceInfo,
};
use crate::stats::round_to;
use crate::strategy::{format_race_time, SimulationOutcome, StrategyResult};

/// Share of drivers a stop count needs before matching it earns a bonus.
pub const DOMINANT_STOP_COUNT_MIN_PCT: f64 = 40.0;

/// One scoring factor's contribution, in seconds (negative is a bonus).
#[derive(Debug, Clone, PartialEq, Default)]
pub struct AlignmentComponent {
    pub adjustment_s: f64,
    pub note: Option<String>,
}

impl AlignmentComponent {
    fn none() -> Self {
        Self::default()
    }

    fn new(adjustment_s: f64, note: String) -> Self {
        Self {
            adjustment_s,
            note: Some(note),
        }
    }
}

/// Penalty for a first stop outside the historical inter-quartile window.
pub fn score_first_stop(
    first_pit_lap: u32,
    stats: &FirstStopStats,
    weights: &ScoringWeights,
) -> AlignmentComponent {
    let lap = f64::from(first_pit_lap);
    if (stats.p25..=stats.p75).contains(&lap) {
        return AlignmentComponent::new(
            0.0,
            format!(
                "First stop L{} within historical window (L{:.0}-L{:.0}, median L{:.0}, n={})",
                first_pit_lap, stats.p25, stats.p75, stats.median, stats.n
            ),
        );
    }

    let distance = (stats.p25 - lap).max(lap - stats.p75).max(0.0);
    let penalty = (distance * weights.first_stop_penalty_per_lap_s).min(weights.first_stop_max_penalty_s);
    AlignmentComponent::new(
        penalty,
        format!(
            "First stop L{} is {:.0} laps outside historical IQR (L{:.0}-L{:.0}), +{:.1}s penalty",
            first_pit_lap, distance, stats.p25, stats.p75, penalty
        ),
    )
}

/// Bonus for running a historically common sequence. `roles` are compared
/// case-insensitively; the first matching sequence in rank order wins.
pub fn score_sequence_match(
    roles: &[String],
    sequences: &[StrategySequenceInfo],
    weights: &ScoringWeights,
) -> AlignmentComponent {
    for info in sequences {
        let freq = info.frequency_pct / 100.0;
        let joined = info.sequence.join(" \u{2192} ");

        if exact_match(roles, &info.sequence) {
            return AlignmentComponent::new(
                -weights.sequence_match_bonus_s * freq,
                format!(
                    "Matches historical sequence {} ({:.0}% of races)",
                    joined, info.frequency_pct
                ),
            );
        }
        if same_compounds(roles, &info.sequence) {
            return AlignmentComponent::new(
                -weights.sequence_match_bonus_s * weights.sequence_partial_factor * freq,
                format!("Partially matches historical {} ({:.0}%)", joined, info.frequency_pct),
            );
        }
    }
    AlignmentComponent::none()
}

/// Bonus for matching the dominant of 1 or 2 stops (ties go to 1).
pub fn score_stop_count(
    stops: u32,
    distribution: &StopCountDistribution,
    weights: &ScoringWeights,
) -> AlignmentComponent {
    let (dominant, pct) = if distribution.two_stop_pct > distribution.one_stop_pct {
        (2, distribution.two_stop_pct)
    } else {
        (1, distribution.one_stop_pct)
    };

    if stops == dominant && pct > DOMINANT_STOP_COUNT_MIN_PCT {
        AlignmentComponent::new(
            -weights.stop_count_bonus_s * pct / 100.0,
            format!(
                "{}-stop matches dominant historical pattern ({:.0}% of drivers)",
                stops, pct
            ),
        )
    } else {
        AlignmentComponent::none()
    }
}

fn exact_match(roles: &[String], historical: &[String]) -> bool {
    roles.len() == historical.len()
        && roles
            .iter()
            .zip(historical)
            .all(|(a, b)| a.eq_ignore_ascii_case(b))
}

fn same_compounds(roles: &[String], historical: &[String]) -> bool {
    let normalise = |seq: &[String]| {
        let mut upper: Vec<String> = seq.iter().map(|s| s.to_uppercase()).collect();
        upper.sort();
        upper
    };
    roles.len() == historical.len() && normalise(roles) == normalise(historical)
}

fn roles_for(strategy: &StrategyResult, nomination: Option<&Nomination>) -> Vec<String> {
    strategy
        .stints
        .iter()
        .map(|stint| {
            nomination
                .and_then(|n| n.role_for_code(stint.compound))
                .map_or_else(|| stint.compound.to_string(), str::to_string)
        })
        .collect()
}

/// A copy of `strategy` with the historical adjustment applied to its total time.
pub fn score_strategy(
    strategy: &StrategyResult,
    profile: &HistoricalProfile,
    weights: &ScoringWeights,
    nomination: Option<&Nomination>,
) -> StrategyResult {
    let first_stop = match (&profile.first_stop_lap, strategy.first_pit_lap()) {
        (Some(stats), Some(lap)) if strategy.stops >= 1 => score_first_stop(lap, stats, weights),
        _ => AlignmentComponent::none(),
    };
    let sequence = if profile.common_strategy_sequences.is_empty() {
        AlignmentComponent::none()
    } else {
        score_sequence_match(
            &roles_for(strategy, nomination),
            &profile.common_strategy_sequences,
            weights,
        )
    };
    let stop_count = profile
        .stop_count_distribution
        .as_ref()
        .map_or_else(AlignmentComponent::none, |d| score_stop_count(strategy.stops, d, weights));

    let components = [first_stop, sequence, stop_count];
    let raw: f64 = components.iter().map(|c| c.adjustment_s).sum();
    let adjustment = round_to(raw * weights.master, 3);
    let notes: Vec<String> = components.into_iter().filter_map(|c| c.note).collect();

    debug!(name = %strategy.name, adjustment, "historical alignment");
    let total_time_s = strategy.total_time_s + adjustment;
    StrategyResult {
        total_time_s,
        total_time_display: format_race_time(total_time_s),
        historical_adjustment_s: Some(adjustment),
        historical_notes: Some(notes),
        ..strategy.clone()
    }
}

/// Score every strategy. Returns unchanged copies when the master weight is zero.
pub fn apply_historical_alignment(
    strategies: &[StrategyResult],
    profile: &HistoricalProfile,
    weights: &ScoringWeights,
    nomination: Option<&Nomination>,
) -> Vec<StrategyResult> {
    if weights.master == 0.0 {
        return strategies.to_vec();
    }
    strategies
        .iter()
        .map(|s| score_strategy(s, profile, weights, nomination))
        .collect()
}

impl SimulationOutcome {
    /// Apply historical alignment and re-rank on the adjusted times.
    pub fn with_historical_alignment(
        self,
        profile: &HistoricalProfile,
        weights: &ScoringWeights,
        nomination: Option<&Nomination>,
    ) -> Self {
        let strategies =
            apply_historical_alignment(&self.strategies, profile, weights, nomination);
        let mut outcome = Self { strategies, ..self };
        outcome.rerank();
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compound::CompoundCode;
    use crate::strategy::StintDetail;

    fn strategy(name: &str, plan: &[(CompoundCode, u32)], total_time_s: f64) -> StrategyResult {
        let mut stints = Vec::new();
        let mut pit_stop_laps = Vec::new();
        let mut lap = 1;
        for (i, &(compound, laps)) in plan.iter().enumerate() {
            stints.push(StintDetail {
                stint_number: i as u32 + 1,
                compound,
                start_lap: lap,
                end_lap: lap + laps - 1,
                laps,
                stint_time_s: 0.0,
                avg_lap_time_s: 0.0,
                final_lap_time_s: 0.0,
                cliff_laps: 0,
                is_wet_tyre: false,
            });
            if i + 1 < plan.len() {
                pit_stop_laps.push(lap + laps - 1);
            }
            lap += laps;
        }
        StrategyResult {
            name: name.to_string(),
            stops: pit_stop_laps.len() as u32,
            total_time_s,
            total_time_display: format_race_time(total_time_s),
            pit_stop_laps,
            stints,
            weather_note: String::new(),
            historical_adjustment_s: None,
            historical_notes: None,
        }
    }

    fn sequence(roles: &[&str], frequency_pct: f64) -> StrategySequenceInfo {
        StrategySequenceInfo {
            stops: roles.len() - 1,
            sequence: roles.iter().map(|r| r.to_string()).collect(),
            frequency_pct,
            n: 10,
        }
    }

    fn profile() -> HistoricalProfile {
        HistoricalProfile {
            seasons_used: vec![2023, 2024],
            races_used: 2,
            first_stop_lap: Some(FirstStopStats { median: 15.0, p25: 14.0, p75: 18.0, iqr: 4.0, n: 10 }),
            stop_count_distribution: Some(StopCountDistribution {
                one_stop_pct: 60.0,
                two_stop_pct: 30.0,
                three_plus_pct: 10.0,
                n: 40,
            }),
            common_strategy_sequences: vec![
                sequence(&["MEDIUM", "HARD"], 75.0),
                sequence(&["SOFT", "HARD"], 25.0),
            ],
            ..HistoricalProfile::default()
        }
    }

    fn roles(values: &[&str]) -> Vec<String> {
        values.iter().map(|v| v.to_string()).collect()
    }

    #[test]
    fn exact_sequence_match_scales_with_frequency() {
        let seqs = vec![sequence(&["MEDIUM", "HARD"], 75.0)];
        let c = score_sequence_match(&roles(&["MEDIUM", "HARD"]), &seqs, &ScoringWeights::default());
        assert!((c.adjustment_s + 1.125).abs() < 1e-9);
        assert!(c.note.unwrap().starts_with("Matches historical sequence MEDIUM"));

        let lower = score_sequence_match(&roles(&["medium", "hard"]), &seqs, &ScoringWeights::default());
        assert!((lower.adjustment_s + 1.125).abs() < 1e-9);
    }

    #[test]
    fn reordered_sequence_is_a_partial_match() {
        let c = score_sequence_match(&roles(&["HARD", "MEDIUM"]), &profile().common_strategy_sequences, &ScoringWeights::default());
        assert!((c.adjustment_s + 0.45).abs() < 1e-9);
        assert!(c.note.unwrap().starts_with("Partially matches"));
    }

    #[test]
    fn unmatched_sequence_scores_nothing() {
        let c = score_sequence_match(&roles(&["SOFT", "SOFT", "HARD"]), &profile().common_strategy_sequences, &ScoringWeights::default());
        assert_eq!(c, AlignmentComponent::default());
    }

    #[test]
    fn first_stop_penalty_grows_then_caps() {
        let stats = profile().first_stop_lap.unwrap();
        let weights = ScoringWeights::default();

        let inside = score_first_stop(16, &stats, &weights);
        assert_eq!(inside.adjustment_s, 0.0);
        assert!(inside.note.unwrap().contains("within historical window"));

        let late = score_first_stop(21, &stats, &weights);
        assert!((late.adjustment_s - 0.45).abs() < 1e-9);

        let early = score_first_stop(10, &stats, &weights);
        assert!((early.adjustment_s - 0.6).abs() < 1e-9);

        assert_eq!(score_first_stop(50, &stats, &weights).adjustment_s, 2.0);
    }

    #[test]
    fn stop_count_bonus_needs_a_clear_majority() {
        let weights = ScoringWeights::default();
        let dist = profile().stop_count_distribution.unwrap();
        assert!((score_stop_count(1, &dist, &weights).adjustment_s + 0.3).abs() < 1e-9);
        assert_eq!(score_stop_count(2, &dist, &weights).adjustment_s, 0.0);

        let split = StopCountDistribution { one_stop_pct: 35.0, two_stop_pct: 35.0, three_plus_pct: 30.0, n: 20 };
        assert_eq!(score_stop_count(1, &split, &weights), AlignmentComponent::default());

        let tie = StopCountDistribution { one_stop_pct: 45.0, two_stop_pct: 45.0, three_plus_pct: 10.0, n: 20 };
        assert!(score_stop_count(1, &tie, &weights).adjustment_s < 0.0);
        assert_eq!(score_stop_count(2, &tie, &weights).adjustment_s, 0.0);
    }

    #[test]
    fn scoring_returns_a_new_value() {
        let original = strategy("1-Stop: C3 \u{2192} C2", &[(CompoundCode::C3, 16), (CompoundCode::C2, 41)], 5000.0);
        let nomination = Nomination::default();
        let scored = score_strategy(&original, &profile(), &ScoringWeights::default(), Some(&nomination));

        assert_eq!(original.historical_adjustment_s, None);
        assert_eq!(original.total_time_s, 5000.0);
        assert_eq!(scored.historical_adjustment_s, Some(-1.425));
        assert!((scored.total_time_s - 4998.575).abs() < 1e-9);
        assert_eq!(scored.total_time_display, "1:23:18.575");
        assert_eq!(original.total_time_display, "1:23:20.000");
        assert_eq!(scored.historical_notes.as_ref().map(Vec::len), Some(3));
    }

    #[test]
    fn codes_are_compared_directly_without_a_nomination() {
        let s = strategy("1-Stop: C3 \u{2192} C2", &[(CompoundCode::C3, 16), (CompoundCode::C2, 41)], 5000.0);
        let mut p = profile();
        p.common_strategy_sequences = vec![sequence(&["C3", "C2"], 50.0)];
        let scored = score_strategy(&s, &p, &ScoringWeights::default(), None);
        // -0.75 for the sequence, -0.3 for the stop count
        assert_eq!(scored.historical_adjustment_s, Some(-1.05));
    }

    #[test]
    fn master_weight_scales_and_zero_disables() {
        let s = strategy("1-Stop: C3 \u{2192} C2", &[(CompoundCode::C3, 16), (CompoundCode::C2, 41)], 5000.0);
        let nomination = Nomination::default();

        let damped = ScoringWeights { master: 0.4, ..ScoringWeights::default() };
        let scored = score_strategy(&s, &profile(), &damped, Some(&nomination));
        assert_eq!(scored.historical_adjustment_s, Some(-0.57));

        let off = ScoringWeights { master: 0.0, ..ScoringWeights::default() };
        let untouched = apply_historical_alignment(&[s.clone()], &profile(), &off, Some(&nomination));
        assert_eq!(untouched, vec![s]);
    }

    #[test]
    fn empty_profile_adjusts_nothing() {
        let s = strategy("2-Stop", &[(CompoundCode::C4, 10), (CompoundCode::C3, 20), (CompoundCode::C2, 27)], 5000.0);
        let scored = score_strategy(&s, &HistoricalProfile::default(), &ScoringWeights::default(), None);
        assert_eq!(scored.historical_adjustment_s, Some(0.0));
        assert_eq!(scored.historical_notes, Some(vec![]));
        assert_eq!(scored.total_time_s, 5000.0);
    }

    #[test]
    fn alignment_reranks_the_outcome() {
        let aligned = strategy("1-Stop: C3 \u{2192} C2", &[(CompoundCode::C3, 16), (CompoundCode::C2, 41)], 5000.0);
        let unusual = strategy(
            "2-Stop: C4 \u{2192} C3 \u{2192} C2",
            &[(CompoundCode::C4, 10), (CompoundCode::C3, 20), (CompoundCode::C2, 27)],
            4999.5,
        );
        let outcome = SimulationOutcome {
            total_laps: 57,
            pit_loss_seconds: 22.0,
            base_lap_time_s: 90.0,
            track_temp_c: None,
            weather_condition: Default::default(),
            rain_intensity: 0.0,
            recommended: unusual.name.clone(),
            delta_s: 0.5,
            strategies: vec![unusual, aligned],
            model: crate::strategy::MODEL_ID.to_string(),
        };
        let nomination = Nomination::default();

        let scored = outcome.with_historical_alignment(&profile(), &ScoringWeights::default(), Some(&nomination));
        assert_eq!(scored.recommended, "1-Stop: C3 \u{2192} C2");
        assert_eq!(scored.strategies[1].historical_adjustment_s, Some(0.6));
        assert!((scored.delta_s - 1.525).abs() < 1e-9);
    }
}
