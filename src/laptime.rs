use serde::Serialize;

use crate::compound::CompoundParameters;

/// Aggregate timing of one stint.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct StintTiming {
    pub total_s: f64,
    pub avg_lap_s: f64,
    pub final_lap_s: f64,
    pub cliff_laps: u32,
}

/// Piecewise linear + quadratic cliff lap-time model for one compound:
///
/// ```text
/// lap_time(n) = base_lap + pace_offset + n * deg_rate
///             + cliff_rate * max(0, n - cliff_onset)^2
/// ```
///
/// `n` is the 0-based lap index within the stint.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LapModel {
    pub base_lap_s: f64,
    pub pace_offset_s: f64,
    pub deg_rate: f64,
    pub cliff_onset: u32,
    pub cliff_rate: f64,
}

impl LapModel {
    pub fn new(base_lap_s: f64, params: &CompoundParameters) -> Self {
        Self {
            base_lap_s,
            pace_offset_s: params.base_pace_offset(),
            deg_rate: params.avg_deg_s_per_lap(),
            cliff_onset: params.cliff_onset_lap(),
            cliff_rate: params.cliff_rate_s_per_lap2(),
        }
    }

    pub fn lap_time(&self, n: u32) -> f64 {
        let mut t = self.base_lap_s + self.pace_offset_s + n as f64 * self.deg_rate;
        if n > self.cliff_onset {
            let over = (n - self.cliff_onset) as f64;
            t += self.cliff_rate * over * over;
        }
        t
    }

    /// Laps up to and including the onset are summed in closed form; only the
    /// cliff laps are summed one by one.
    pub fn stint(&self, laps: u32) -> StintTiming {
        if laps == 0 {
            return StintTiming::default();
        }

        let fresh = self.base_lap_s + self.pace_offset_s;
        let linear_laps = laps.min(self.cliff_onset + 1) as f64;
        let linear_total =
            linear_laps * fresh + self.deg_rate * linear_laps * (linear_laps - 1.0) / 2.0;

        let first_cliff_lap = self.cliff_onset + 1;
        let cliff_laps = laps.saturating_sub(first_cliff_lap);
        let cliff_total: f64 = (first_cliff_lap..laps).map(|n| self.lap_time(n)).sum();

        let total_s = linear_total + cliff_total;
        StintTiming {
            total_s,
            avg_lap_s: total_s / laps as f64,
            final_lap_s: self.lap_time(laps - 1),
            cliff_laps,
        }
    }
}

pub fn lap_time(
    n: u32,
    base_lap: f64,
    pace_offset: f64,
    deg_rate: f64,
    cliff_onset: u32,
    cliff_rate: f64,
) -> f64 {
    LapModel {
        base_lap_s: base_lap,
        pace_offset_s: pace_offset,
        deg_rate,
        cliff_onset,
        cliff_rate,
    }
    .lap_time(n)
}

pub fn stint_time(
    laps: u32,
    base_lap: f64,
    pace_offset: f64,
    deg_rate: f64,
    cliff_onset: u32,
    cliff_rate: f64,
) -> StintTiming {
    LapModel {
        base_lap_s: base_lap,
        pace_offset_s: pace_offset,
        deg_rate,
        cliff_onset,
        cliff_rate,
    }
    .stint(laps)
}
