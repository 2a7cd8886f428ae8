use crate::compound::{CompoundCode, CompoundTable};
use crate::stats::round_to;

/// Track temperature at which fitted parameters are taken as-is.
pub const BASELINE_TRACK_TEMP_C: f64 = 25.0;

// near-freezing tracks would otherwise push the softest compounds negative
const MIN_MULTIPLIER: f64 = 0.05;

/// Wear multiplier for `code` at `track_temp_c`.
///
/// The shared factor `(temp / 25)^1.2` is scaled per compound: softer compounds
/// (higher C-number) react more to heat than harder ones. The compound
/// sensitivity scales the deviation from baseline, so every compound sits at
/// exactly 1.0 at 25°C.
pub fn temperature_multiplier(code: CompoundCode, track_temp_c: f64) -> f64 {
    let base_mult = (track_temp_c.max(0.0) / BASELINE_TRACK_TEMP_C).powf(1.2);
    let sensitivity = 1.0 + 0.05 * (code.code_num() as f64 - 3.0);
    (1.0 + (base_mult - 1.0) * sensitivity).max(MIN_MULTIPLIER)
}

/// New table with wear rates scaled up (and the cliff and stint length pulled in)
/// for hot tracks, and the reverse for cold ones.
pub fn adjust_for_temperature(table: &CompoundTable, track_temp_c: f64) -> CompoundTable {
    table
        .iter()
        .fold(CompoundTable::builder(), |builder, params| {
            let mult = temperature_multiplier(params.code(), track_temp_c);
            let onset = (params.cliff_onset_lap() as f64 / mult.sqrt().max(0.5)).floor() as u32;
            let max_stint = (params.typical_max_stint_laps() as f64 / mult.max(0.5)).floor() as u32;

            builder.insert(params.rescaled(
                round_to(params.avg_deg_s_per_lap() * mult, 4),
                onset.max(5),
                round_to(params.cliff_rate_s_per_lap2() * mult, 5),
                max_stint.max(5),
                round_to(mult, 3),
            ))
        })
        .build()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compound::fallback_table;

    #[test]
    fn baseline_temperature_leaves_table_unchanged() {
        let base = fallback_table();
        let adjusted = adjust_for_temperature(&base, 25.0);
        for params in adjusted.iter() {
            let original = base.get(params.code()).unwrap();
            assert_eq!(params.temp_multiplier(), Some(1.0));
            assert_eq!(params.avg_deg_s_per_lap(), original.avg_deg_s_per_lap());
            assert_eq!(params.cliff_onset_lap(), original.cliff_onset_lap());
            assert_eq!(params.typical_max_stint_laps(), original.typical_max_stint_laps());
        }
        // the input table is not touched
        assert!(base.iter().all(|p| p.temp_multiplier().is_none()));
    }

    #[test]
    fn hot_track_shortens_stints_and_raises_wear() {
        let base = fallback_table();
        let hot = adjust_for_temperature(&base, 45.0);
        let c3 = hot.get(CompoundCode::C3).unwrap();
        let mult = (45.0f64 / 25.0).powf(1.2);

        assert!((c3.temp_multiplier().unwrap() - round_to(mult, 3)).abs() < 1e-12);
        assert!((c3.avg_deg_s_per_lap() - round_to(0.065 * mult, 4)).abs() < 1e-12);
        assert_eq!(c3.cliff_onset_lap(), (24.0 / mult.sqrt()).floor() as u32);
        assert_eq!(c3.typical_max_stint_laps(), (32.0 / mult).floor() as u32);
    }

    #[test]
    fn softer_compounds_are_more_heat_sensitive() {
        let c1 = temperature_multiplier(CompoundCode::C1, 40.0);
        let c5 = temperature_multiplier(CompoundCode::C5, 40.0);
        assert!(c5 > c1);
        // cold track reverses the ordering
        assert!(temperature_multiplier(CompoundCode::C5, 15.0) < temperature_multiplier(CompoundCode::C1, 15.0));
    }

    #[test]
    fn stint_and_onset_floors_at_five_laps() {
        let base = fallback_table();
        let scorching = adjust_for_temperature(&base, 90.0);
        let c5 = scorching.get(CompoundCode::C5).unwrap();
        assert!(c5.typical_max_stint_laps() >= 5);
        assert!(c5.cliff_onset_lap() >= 5);
    }

    #[test]
    fn cold_track_extends_stints_up_to_double() {
        let base = fallback_table();
        let cold = adjust_for_temperature(&base, 5.0);
        // multiplier below 0.5 is capped when stretching stint length
        let c3 = cold.get(CompoundCode::C3).unwrap();
        assert_eq!(c3.typical_max_stint_laps(), 64);
        assert_eq!(c3.cliff_onset_lap(), (24.0 / 0.5f64).floor() as u32);
    }

    #[test]
    fn sensitivity_scales_the_deviation_not_the_multiplier() {
        // 1 + (b - 1) * sens, not b * sens: C1 and C5 sit 0.1 either side of the product form
        let shared = (40.0f64 / 25.0).powf(1.2);
        let c1 = temperature_multiplier(CompoundCode::C1, 40.0);
        let c5 = temperature_multiplier(CompoundCode::C5, 40.0);
        assert!((c1 - 1.6819).abs() < 1e-4);
        assert!((c5 - 1.8335).abs() < 1e-4);
        assert!((c1 - shared * 0.9 - 0.1).abs() < 1e-9);
        assert!((shared * 1.1 - c5 - 0.1).abs() < 1e-9);
        // C3 has unit sensitivity, so both forms agree
        assert!((temperature_multiplier(CompoundCode::C3, 40.0) - shared).abs() < 1e-12);
    }

    #[test]
    fn freezing_track_keeps_wear_positive() {
        for code in [CompoundCode::C1, CompoundCode::C5] {
            let mult = temperature_multiplier(code, 0.0);
            assert!(mult.is_finite());
            assert!(mult >= MIN_MULTIPLIER);
        }
    }
}
