use std::time::{Duration, Instant};

use serde::Serialize;

use super::math::{clamp_position, map_range};
use super::{cruise_speed, is_outward, ramp_acceleration, time_of_stroke, DelayTimer, MotionTarget, SpeedLimits, Tuning};

const MAX_STROKES_IN_SERIES: u32 = 5;

/// Series of strokes separated by pauses. The series length ramps from one
/// stroke up to five and back down; sensation sets the pause from 100 ms
/// to 10 s.
#[derive(Debug, Clone, Serialize)]
pub struct StopNGo {
    time_of_stroke: f32,
    number_of_strokes: u32,
    stroke_series_index: u32,
    stroke_index: u32,
    count_strokes_up: bool,
    position: i32,
    delay: DelayTimer,
}

impl Default for StopNGo {
    fn default() -> Self {
        Self {
            time_of_stroke: 1.0,
            number_of_strokes: MAX_STROKES_IN_SERIES,
            stroke_series_index: 1,
            stroke_index: 0,
            count_strokes_up: true,
            position: 0,
            delay: DelayTimer::default(),
        }
    }
}

impl StopNGo {
    /// Pause after each series.
    pub fn pause(&self) -> Duration {
        self.delay.duration()
    }

    /// Strokes in the current series.
    pub fn series_length(&self) -> u32 {
        self.stroke_series_index
    }

    pub(super) fn update_pause(&mut self, sensation: f32) {
        let millis = map_range(sensation as i64, -100, 100, 100, 10_000);
        self.delay.update(Duration::from_millis(millis.max(0) as u64));
    }

    pub(super) fn next_target(
        &mut self,
        index: u32,
        tuning: &Tuning,
        limits: &SpeedLimits,
        now: Instant,
    ) -> MotionTarget {
        self.time_of_stroke = time_of_stroke(tuning, limits);

        let skip = self.delay.is_still_delayed(now);
        if !skip {
            if is_outward(index) {
                self.position = tuning.home();
                if self.stroke_index >= self.stroke_series_index {
                    self.stroke_index = 0;

                    if self.stroke_series_index >= self.number_of_strokes {
                        self.count_strokes_up = false;
                    }
                    if self.stroke_series_index <= 1 {
                        self.count_strokes_up = true;
                    }
                    if self.count_strokes_up {
                        self.stroke_series_index += 1;
                    } else {
                        self.stroke_series_index -= 1;
                    }

                    // pause once we are out
                    self.delay.start(now);
                }
            } else {
                self.position = tuning.depth;
                self.stroke_index += 1;
            }
        }

        let speed = cruise_speed(tuning.speed as f32, limits);
        let acceleration = ramp_acceleration(speed, self.time_of_stroke, limits);

        MotionTarget {
            position: clamp_position(self.position, tuning.depth),
            speed,
            acceleration,
            skip,
        }
    }
}
