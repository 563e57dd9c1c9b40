use serde::Serialize;

use super::math::fscale;

/// Splits one full stroke period into an inward and an outward half whose
/// durations always add up to the period. Positive sensation makes the
/// inward half up to five times faster, negative sensation the outward half.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct StrokeTiming {
    pub time_of_stroke: f32,
    pub time_of_fast_stroke: f32,
    pub time_of_in_stroke: f32,
    pub time_of_out_stroke: f32,
}

impl Default for StrokeTiming {
    fn default() -> Self {
        Self {
            time_of_stroke: 1.0,
            time_of_fast_stroke: 1.0,
            time_of_in_stroke: 1.0,
            time_of_out_stroke: 1.0,
        }
    }
}

impl StrokeTiming {
    pub fn update(&mut self, time_of_stroke: f32, sensation: f32) {
        self.time_of_stroke = time_of_stroke;
        self.time_of_fast_stroke =
            0.5 * time_of_stroke / fscale(0.0, 100.0, 1.0, 5.0, sensation.abs(), 0.0);
        let slow = time_of_stroke - self.time_of_fast_stroke;
        if sensation > 0.0 {
            self.time_of_in_stroke = self.time_of_fast_stroke;
            self.time_of_out_stroke = slow;
        } else {
            self.time_of_out_stroke = self.time_of_fast_stroke;
            self.time_of_in_stroke = slow;
        }
    }
}
