use serde::Serialize;

use super::math::{clamp_position, clamp_rate, fscale};
use super::{is_outward, time_of_stroke, MotionTarget, SpeedLimits, Tuning};

/// Sensation shapes the acceleration. Positive values stretch the coasting
/// phase until the stroke is nearly constant speed and feels robotic,
/// neutral is the 1/3 trapezoid, negative values shrink it into a triangle.
#[derive(Debug, Clone, Serialize)]
pub struct RoboStroke {
    time_of_stroke: f32,
    /// Share of the stroke spent accelerating, `[0.05, 0.5]`.
    x: f32,
}

impl Default for RoboStroke {
    fn default() -> Self {
        Self {
            time_of_stroke: 1.0,
            x: 1.0 / 3.0,
        }
    }
}

impl RoboStroke {
    pub fn acceleration_share(&self) -> f32 {
        self.x
    }

    pub(super) fn update_shape(&mut self, sensation: f32) {
        self.x = if sensation >= 0.0 {
            fscale(0.0, 100.0, 1.0 / 3.0, 0.5, sensation, 0.0)
        } else {
            fscale(0.0, 100.0, 1.0 / 3.0, 0.05, -sensation, 0.0)
        };
    }

    pub(super) fn next_target(&mut self, index: u32, tuning: &Tuning, limits: &SpeedLimits) -> MotionTarget {
        self.time_of_stroke = time_of_stroke(tuning, limits);

        let average = tuning.speed as f32;
        let speed = clamp_rate(average / (1.0 - self.x), limits.max_speed);
        let acceleration = clamp_rate(average / self.x, limits.max_acceleration);
        let position = if is_outward(index) { tuning.home() } else { tuning.depth };

        MotionTarget {
            position: clamp_position(position, tuning.depth),
            speed,
            acceleration,
            skip: false,
        }
    }
}
