use serde::Serialize;

use super::math::clamp_position;
use super::{is_outward, time_of_stroke, trapezoid, MotionTarget, SpeedLimits, StrokeTiming, Tuning};

/// Sensation shifts the speed ratio between the inward and the outward
/// move. Above zero the inward move gets faster (up to 5x) for a hard
/// pounding, below zero the outward move. A full stroke always takes the
/// same time.
#[derive(Debug, Clone, Default, Serialize)]
pub struct TeasingPounding {
    timing: StrokeTiming,
}

impl TeasingPounding {
    pub fn timing(&self) -> &StrokeTiming {
        &self.timing
    }

    pub(super) fn next_target(&mut self, index: u32, tuning: &Tuning, limits: &SpeedLimits) -> MotionTarget {
        // in and out together make up one full period
        self.timing.update(2.0 * time_of_stroke(tuning, limits), tuning.sensation);

        let stroke = tuning.stroke as f32;
        let (time, position) = if is_outward(index) {
            (self.timing.time_of_out_stroke, tuning.home())
        } else {
            (self.timing.time_of_in_stroke, tuning.depth)
        };
        let (speed, acceleration) = trapezoid(stroke, time, limits);

        MotionTarget {
            position: clamp_position(position, tuning.depth),
            speed,
            acceleration,
            skip: false,
        }
    }
}
