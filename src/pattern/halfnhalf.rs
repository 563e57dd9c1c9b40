use serde::Serialize;

use super::math::clamp_position;
use super::{is_outward, time_of_stroke, trapezoid, MotionTarget, SpeedLimits, StrokeTiming, Tuning};

/// Teasing Pounding where every second stroke only goes half as deep. A
/// full stroke takes the same time whether it is a half or a full one.
#[derive(Debug, Clone, Serialize)]
pub struct HalfnHalf {
    timing: StrokeTiming,
    half: bool,
}

impl Default for HalfnHalf {
    fn default() -> Self {
        Self {
            timing: StrokeTiming::default(),
            half: true,
        }
    }
}

impl HalfnHalf {
    pub fn timing(&self) -> &StrokeTiming {
        &self.timing
    }

    /// Whether the next inward move is a half stroke.
    pub fn is_half(&self) -> bool {
        self.half
    }

    pub(super) fn next_target(&mut self, index: u32, tuning: &Tuning, limits: &SpeedLimits) -> MotionTarget {
        self.timing.update(2.0 * time_of_stroke(tuning, limits), tuning.sensation);

        // start gentle
        if index == 0 {
            self.half = true;
        }

        let stroke = if self.half { tuning.stroke / 2 } else { tuning.stroke };

        // TODO: derive the half stroke speed from the half stroke so both take equal time
        let full = tuning.stroke as f32;
        let (time, position) = if is_outward(index) {
            self.half = !self.half;
            (self.timing.time_of_out_stroke, tuning.home())
        } else {
            (self.timing.time_of_in_stroke, tuning.home().saturating_add(stroke))
        };
        let (speed, acceleration) = trapezoid(full, time, limits);

        MotionTarget {
            position: clamp_position(position, tuning.depth),
            speed,
            acceleration,
            skip: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::super::{Pattern, PatternKind, PatternState};

    fn pattern() -> Pattern {
        let mut pattern = Pattern::new(PatternKind::HalfnHalf);
        pattern.set_speed_limit(50_000, 500_000, 20);
        pattern.set_depth(5000);
        pattern.set_stroke(3000);
        pattern.set_speed(1500);
        pattern
    }

    #[test]
    fn alternates_half_and_full_strokes() {
        let mut pattern = pattern();
        let positions: Vec<i32> = (0..8).map(|i| pattern.next_target(i).position).collect();
        assert_eq!(positions, vec![3500, 2000, 5000, 2000, 3500, 2000, 5000, 2000]);
    }

    #[test]
    fn neutral_timing_is_symmetric() {
        let mut pattern = pattern();
        pattern.set_sensation(0.0);
        pattern.next_target(0);
        let timing = match pattern.diagnostics() {
            PatternState::HalfnHalf(p) => *p.timing(),
            other => panic!("unexpected state {:?}", other),
        };
        assert_eq!(timing.time_of_in_stroke, timing.time_of_out_stroke);
        assert_eq!(timing.time_of_in_stroke, timing.time_of_stroke / 2.0);
    }

    #[test]
    fn half_and_full_share_speed() {
        let mut pattern = pattern();
        let half = pattern.next_target(0);
        pattern.next_target(1);
        let full = pattern.next_target(2);
        assert_eq!(half.speed, full.speed);
        assert_eq!(half.acceleration, full.acceleration);
    }

    #[test]
    fn restarting_at_zero_begins_with_half() {
        let mut pattern = pattern();
        for i in 0..3 {
            pattern.next_target(i);
        }
        // a fresh run of the same instance
        assert_eq!(pattern.next_target(0).position, 3500);
    }
}
