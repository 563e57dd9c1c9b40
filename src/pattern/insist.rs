use serde::Serialize;

use super::math::{clamp_position, clamp_rate};
use super::{cruise_speed, idle_target, is_outward, time_of_stroke, MotionTarget, SpeedLimits, Tuning};

/// Sensation shortens the stroke while the speed stays that of the full
/// stroke, which turns into a vibration at high values. Positive sensation
/// moves the short stroke to the front, negative to the back.
#[derive(Debug, Clone, Serialize)]
pub struct Insist {
    time_of_stroke: f32,
    real_stroke: i32,
    stroke_fraction: f32,
    stroke_in_front: bool,
}

impl Default for Insist {
    fn default() -> Self {
        Self {
            time_of_stroke: 1.0,
            real_stroke: 0,
            stroke_fraction: 1.0,
            stroke_in_front: false,
        }
    }
}

impl Insist {
    pub fn real_stroke(&self) -> i32 {
        self.real_stroke
    }

    pub fn stroke_fraction(&self) -> f32 {
        self.stroke_fraction
    }

    pub fn stroke_in_front(&self) -> bool {
        self.stroke_in_front
    }

    fn update_real_stroke(&mut self, tuning: &Tuning) {
        self.stroke_fraction = (100.0 - tuning.sensation.abs()) / 100.0;
        self.stroke_in_front = tuning.sensation > 0.0;
        self.real_stroke = (tuning.stroke as f32 * self.stroke_fraction) as i32;
    }

    pub(super) fn idle_target(&mut self, tuning: &Tuning, limits: &SpeedLimits) -> MotionTarget {
        self.update_real_stroke(tuning);
        let position = if self.stroke_in_front {
            tuning.depth.saturating_sub(self.real_stroke)
        } else {
            tuning.home()
        };
        idle_target(position, tuning.depth, limits)
    }

    pub(super) fn next_target(&mut self, index: u32, tuning: &Tuning, limits: &SpeedLimits) -> MotionTarget {
        self.time_of_stroke = time_of_stroke(tuning, limits);
        self.update_real_stroke(tuning);

        // speed of the full stroke
        let speed = cruise_speed(tuning.speed as f32, limits);
        // keeps the 1/3 profile inside the shortened stroke
        let acceleration = clamp_rate(
            3.0 * speed as f32 / (self.time_of_stroke * self.stroke_fraction),
            limits.max_acceleration,
        );

        let position = match (self.stroke_in_front, is_outward(index)) {
            (true, true) => tuning.depth.saturating_sub(self.real_stroke),
            (true, false) => tuning.depth,
            (false, true) => tuning.home(),
            (false, false) => tuning.home().saturating_add(self.real_stroke),
        };

        MotionTarget {
            position: clamp_position(position, tuning.depth),
            speed,
            acceleration,
            skip: false,
        }
    }
}
