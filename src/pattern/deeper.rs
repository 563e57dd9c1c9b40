use serde::Serialize;

use super::math::{clamp_position, map_range};
use super::{is_outward, time_of_stroke, trapezoid, MotionTarget, SpeedLimits, Tuning};

/// Insertion depth ramps up a little with every stroke until it reaches the
/// full stroke, then starts over. Sensation sets the number of strokes per
/// ramp, from 2 through 11 (neutral) up to 32.
#[derive(Debug, Clone, Serialize)]
pub struct Deeper {
    time_of_stroke: f32,
    rungs: i32,
    slope: i32,
    cycle_index: i32,
    amplitude: i32,
}

impl Default for Deeper {
    fn default() -> Self {
        Self {
            time_of_stroke: 1.0,
            rungs: 2,
            slope: 0,
            cycle_index: 1,
            amplitude: 0,
        }
    }
}

impl Deeper {
    /// Strokes per ramp.
    pub fn rungs(&self) -> i32 {
        self.rungs
    }

    pub fn slope(&self) -> i32 {
        self.slope
    }

    /// Rung of the last stroke, starting at 1.
    pub fn cycle_index(&self) -> i32 {
        self.cycle_index
    }

    pub fn amplitude(&self) -> i32 {
        self.amplitude
    }

    fn rungs_for(sensation: f32) -> i32 {
        let sensation = sensation as i64;
        let rungs = if sensation < 0 {
            map_range(sensation, -100, 0, 2, 11)
        } else {
            map_range(sensation, 0, 100, 11, 32)
        };
        rungs.max(1) as i32
    }

    pub(super) fn next_target(&mut self, index: u32, tuning: &Tuning, limits: &SpeedLimits) -> MotionTarget {
        self.time_of_stroke = time_of_stroke(tuning, limits);

        self.rungs = Self::rungs_for(tuning.sensation);
        self.slope = tuning.stroke / self.rungs;
        // index advances twice per full stroke
        self.cycle_index = ((index / 2) % self.rungs as u32) as i32 + 1;
        // jumps when sensation changes mid ramp
        self.amplitude = self.slope.saturating_mul(self.cycle_index);

        let (speed, acceleration) = trapezoid(self.amplitude as f32, self.time_of_stroke, limits);
        let position = if is_outward(index) {
            tuning.home()
        } else {
            tuning.home().saturating_add(self.amplitude)
        };

        MotionTarget {
            position: clamp_position(position, tuning.depth),
            speed,
            acceleration,
            skip: false,
        }
    }
}
