use serde::Serialize;

use super::math::clamp_position;
use super::{cruise_speed, is_outward, ramp_acceleration, time_of_stroke, MotionTarget, SpeedLimits, Tuning};

/// Trapezoidal strokes over the full depth, 1/3 accelerating, 1/3 coasting,
/// 1/3 decelerating. Stroke and sensation have no effect.
#[derive(Debug, Clone, Serialize)]
pub struct SimplePenetration {
    time_of_stroke: f32,
}

impl Default for SimplePenetration {
    fn default() -> Self {
        Self { time_of_stroke: 1.0 }
    }
}

impl SimplePenetration {
    pub fn time_of_stroke(&self) -> f32 {
        self.time_of_stroke
    }

    pub(super) fn next_target(&mut self, index: u32, tuning: &Tuning, limits: &SpeedLimits) -> MotionTarget {
        self.time_of_stroke = time_of_stroke(tuning, limits);

        let speed = cruise_speed(tuning.speed as f32, limits);
        let acceleration = ramp_acceleration(speed, self.time_of_stroke, limits);
        let position = if is_outward(index) { tuning.depth } else { 0 };

        MotionTarget {
            position: clamp_position(position, tuning.depth),
            speed,
            acceleration,
            skip: false,
        }
    }
}
