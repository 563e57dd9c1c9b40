//! Stroke patterns.
//!
//! A [`Pattern`] turns the live tuning (speed, stroke, depth, sensation) and
//! the machine's speed limits into one [`MotionTarget`] per stroke boundary.
//! All book keeping is done in steps; the caller converts real world units.
//! Impossible motion is never rejected, it is clipped into the configured
//! limits so the stroke still looks smooth.

use std::fmt;
use std::str::FromStr;
use std::time::Instant;

use serde::{Deserialize, Serialize};

mod deeper;
mod delay;
mod halfnhalf;
mod insist;
pub mod math;
mod robo_stroke;
mod simple_penetration;
mod stop_n_go;
mod teasing_pounding;
mod timing;

pub use deeper::Deeper;
pub use delay::DelayTimer;
pub use halfnhalf::HalfnHalf;
pub use insist::Insist;
pub use robo_stroke::RoboStroke;
pub use simple_penetration::SimplePenetration;
pub use stop_n_go::StopNGo;
pub use teasing_pounding::TeasingPounding;
pub use timing::StrokeTiming;

use math::{clamp_position, clamp_rate};

/// Everything the motor driver needs to run one trapezoidal move.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct MotionTarget {
    /// Absolute target in steps, inside `[0, depth]`.
    pub position: i32,
    /// Cruise speed in steps per second.
    pub speed: u32,
    /// Acceleration to reach the cruise speed and to halt, in steps/s².
    pub acceleration: u32,
    /// No move this cycle; ask again on the next one. Creates pauses.
    pub skip: bool,
}

/// Live user tuning as seen by a pattern. Values are stored as given;
/// clamping happens when a target is computed.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct Tuning {
    /// Steps per second. `0` holds the machine in its idle position.
    pub speed: i32,
    pub stroke: i32,
    pub depth: i32,
    /// `[-100, 100]`, `0` is neutral.
    pub sensation: f32,
}

impl Tuning {
    /// Travel of one stroke in steps.
    pub fn range_of_stroke(&self) -> f32 {
        self.depth.unsigned_abs().min(self.stroke.unsigned_abs()) as f32
    }

    /// `depth - stroke`, the back end of a normal stroke, unclamped.
    fn home(&self) -> i32 {
        self.depth.saturating_sub(self.stroke)
    }
}

/// Physical ceilings of the machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SpeedLimits {
    pub max_speed: u32,
    pub max_acceleration: u32,
    pub steps_per_unit: u32,
}

/// Seconds for one half cycle at the current speed. The speed is floored at
/// one step per second.
pub(crate) fn time_of_stroke(tuning: &Tuning, limits: &SpeedLimits) -> f32 {
    let ceiling = limits.max_speed.max(1) as i64;
    let speed = (tuning.speed as i64).clamp(1, ceiling);
    tuning.range_of_stroke() / speed as f32
}

/// Cruise speed of a 1/3 accelerate, 1/3 coast, 1/3 decelerate profile
/// with the given average speed.
pub(crate) fn cruise_speed(average: f32, limits: &SpeedLimits) -> u32 {
    clamp_rate(1.5 * average, limits.max_speed)
}

/// Acceleration that reaches `speed` within the first third of `time`.
pub(crate) fn ramp_acceleration(speed: u32, time: f32, limits: &SpeedLimits) -> u32 {
    clamp_rate(3.0 * speed as f32 / time, limits.max_acceleration)
}

/// Trapezoidal profile covering `distance` steps in `time` seconds.
pub(crate) fn trapezoid(distance: f32, time: f32, limits: &SpeedLimits) -> (u32, u32) {
    let speed = cruise_speed(distance / time, limits);
    (speed, ramp_acceleration(speed, time, limits))
}

/// Slow, gentle move to `position`, used while the speed is zero.
pub(crate) fn idle_target(position: i32, depth: i32, limits: &SpeedLimits) -> MotionTarget {
    MotionTarget {
        position: clamp_position(position, depth),
        speed: (0.05 * limits.max_speed as f32) as u32,
        acceleration: (0.5 * limits.max_acceleration as f32) as u32,
        skip: false,
    }
}

/// The selectable patterns, in menu order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PatternKind {
    #[default]
    SimplePenetration,
    TeasingPounding,
    RoboStroke,
    HalfnHalf,
    Deeper,
    StopNGo,
    Insist,
}

impl PatternKind {
    pub const ALL: [PatternKind; 7] = [
        PatternKind::SimplePenetration,
        PatternKind::TeasingPounding,
        PatternKind::RoboStroke,
        PatternKind::HalfnHalf,
        PatternKind::Deeper,
        PatternKind::StopNGo,
        PatternKind::Insist,
    ];

    /// Display name.
    pub fn name(&self) -> &'static str {
        match self {
            PatternKind::SimplePenetration => "Simple Penetration",
            PatternKind::TeasingPounding => "Teasing Pounding",
            PatternKind::RoboStroke => "Robo Stroke",
            PatternKind::HalfnHalf => "Half'n'Half",
            PatternKind::Deeper => "Deeper",
            PatternKind::StopNGo => "Stop'n'Go",
            PatternKind::Insist => "Insist",
        }
    }

    fn key(&self) -> &'static str {
        match self {
            PatternKind::SimplePenetration => "simple_penetration",
            PatternKind::TeasingPounding => "teasing_pounding",
            PatternKind::RoboStroke => "robo_stroke",
            PatternKind::HalfnHalf => "halfn_half",
            PatternKind::Deeper => "deeper",
            PatternKind::StopNGo => "stop_n_go",
            PatternKind::Insist => "insist",
        }
    }
}

impl fmt::Display for PatternKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for PatternKind {
    type Err = anyhow::Error;

    /// Accepts the menu index, the snake_case key or the display name.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if let Ok(index) = s.parse::<usize>() {
            return PatternKind::ALL
                .get(index)
                .copied()
                .ok_or_else(|| anyhow::anyhow!("No pattern with index {}", index));
        }
        PatternKind::ALL
            .iter()
            .copied()
            .find(|kind| kind.key() == s || kind.name().eq_ignore_ascii_case(s))
            .ok_or_else(|| anyhow::anyhow!("Unknown pattern: {}", s))
    }
}

/// Per-pattern state. Serializes to the pattern's named intermediate values
/// of the last computed stroke, for diagnostics.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "pattern", rename_all = "snake_case")]
pub enum PatternState {
    SimplePenetration(SimplePenetration),
    TeasingPounding(TeasingPounding),
    RoboStroke(RoboStroke),
    HalfnHalf(HalfnHalf),
    Deeper(Deeper),
    StopNGo(StopNGo),
    Insist(Insist),
}

impl PatternState {
    fn new(kind: PatternKind) -> Self {
        match kind {
            PatternKind::SimplePenetration => PatternState::SimplePenetration(Default::default()),
            PatternKind::TeasingPounding => PatternState::TeasingPounding(Default::default()),
            PatternKind::RoboStroke => PatternState::RoboStroke(Default::default()),
            PatternKind::HalfnHalf => PatternState::HalfnHalf(Default::default()),
            PatternKind::Deeper => PatternState::Deeper(Default::default()),
            PatternKind::StopNGo => PatternState::StopNGo(Default::default()),
            PatternKind::Insist => PatternState::Insist(Default::default()),
        }
    }

    pub fn kind(&self) -> PatternKind {
        match self {
            PatternState::SimplePenetration(_) => PatternKind::SimplePenetration,
            PatternState::TeasingPounding(_) => PatternKind::TeasingPounding,
            PatternState::RoboStroke(_) => PatternKind::RoboStroke,
            PatternState::HalfnHalf(_) => PatternKind::HalfnHalf,
            PatternState::Deeper(_) => PatternKind::Deeper,
            PatternState::StopNGo(_) => PatternKind::StopNGo,
            PatternState::Insist(_) => PatternKind::Insist,
        }
    }
}

/// One active stroke pattern with its tuning and limits.
#[derive(Debug, Clone)]
pub struct Pattern {
    tuning: Tuning,
    limits: SpeedLimits,
    state: PatternState,
}

impl Pattern {
    pub fn new(kind: PatternKind) -> Self {
        Self {
            tuning: Tuning::default(),
            limits: SpeedLimits::default(),
            state: PatternState::new(kind),
        }
    }

    pub fn kind(&self) -> PatternKind {
        self.state.kind()
    }

    pub fn name(&self) -> &'static str {
        self.kind().name()
    }

    pub fn tuning(&self) -> &Tuning {
        &self.tuning
    }

    pub fn limits(&self) -> &SpeedLimits {
        &self.limits
    }

    /// Named intermediate values of the last computed target.
    pub fn diagnostics(&self) -> &PatternState {
        &self.state
    }

    pub fn set_speed(&mut self, speed: i32) {
        self.tuning.speed = speed;
    }

    pub fn set_stroke(&mut self, stroke: i32) {
        self.tuning.stroke = stroke;
    }

    pub fn set_depth(&mut self, depth: i32) {
        self.tuning.depth = depth;
    }

    /// Sensation is clamped to `[-100, 100]`.
    pub fn set_sensation(&mut self, sensation: f32) {
        let sensation = if sensation.is_nan() { 0.0 } else { sensation.clamp(-100.0, 100.0) };
        self.tuning.sensation = sensation;
        match &mut self.state {
            PatternState::RoboStroke(p) => p.update_shape(sensation),
            PatternState::StopNGo(p) => p.update_pause(sensation),
            _ => {}
        }
    }

    pub fn set_speed_limit(&mut self, max_speed: u32, max_acceleration: u32, steps_per_unit: u32) {
        self.limits = SpeedLimits {
            max_speed,
            max_acceleration,
            steps_per_unit,
        };
    }

    /// Safe resting target: slow and gentle, towards the back of the stroke.
    /// Returned by [`Pattern::next_target`] while the speed is zero.
    pub fn idle_target(&mut self) -> MotionTarget {
        let tuning = &self.tuning;
        let limits = &self.limits;
        match &mut self.state {
            PatternState::SimplePenetration(_) => idle_target(0, tuning.depth, limits),
            PatternState::Insist(p) => p.idle_target(tuning, limits),
            _ => idle_target(tuning.home(), tuning.depth, limits),
        }
    }

    /// Target for stroke `index`. Odd strokes move out, even strokes move in.
    /// `index` must never decrease for the lifetime of a pattern.
    pub fn next_target(&mut self, index: u32) -> MotionTarget {
        self.next_target_at(index, Instant::now())
    }

    /// [`Pattern::next_target`] with an explicit clock reading for patterns
    /// that pause between strokes.
    pub fn next_target_at(&mut self, index: u32, now: Instant) -> MotionTarget {
        if self.tuning.speed == 0 {
            return self.idle_target();
        }

        let tuning = &self.tuning;
        let limits = &self.limits;
        match &mut self.state {
            PatternState::SimplePenetration(p) => p.next_target(index, tuning, limits),
            PatternState::TeasingPounding(p) => p.next_target(index, tuning, limits),
            PatternState::RoboStroke(p) => p.next_target(index, tuning, limits),
            PatternState::HalfnHalf(p) => p.next_target(index, tuning, limits),
            PatternState::Deeper(p) => p.next_target(index, tuning, limits),
            PatternState::StopNGo(p) => p.next_target(index, tuning, limits, now),
            PatternState::Insist(p) => p.next_target(index, tuning, limits),
        }
    }
}

impl From<PatternKind> for Pattern {
    fn from(kind: PatternKind) -> Self {
        Pattern::new(kind)
    }
}

fn is_outward(index: u32) -> bool {
    index % 2 == 1
}

#[cfg(test)]
mod tests {
    use super::*;

    fn configured(kind: PatternKind) -> Pattern {
        let mut pattern = Pattern::new(kind);
        pattern.set_speed_limit(10_000, 100_000, 20);
        pattern.set_depth(2000);
        pattern.set_stroke(1500);
        pattern
    }

    #[test]
    fn parses_kinds() {
        assert_eq!("deeper".parse::<PatternKind>().unwrap(), PatternKind::Deeper);
        assert_eq!("Half'n'Half".parse::<PatternKind>().unwrap(), PatternKind::HalfnHalf);
        assert_eq!("stop'n'go".parse::<PatternKind>().unwrap(), PatternKind::StopNGo);
        assert_eq!("2".parse::<PatternKind>().unwrap(), PatternKind::RoboStroke);
        assert!("7".parse::<PatternKind>().is_err());
        assert!("twerk".parse::<PatternKind>().is_err());
    }

    #[test]
    fn names_follow_kind() {
        for kind in PatternKind::ALL {
            assert_eq!(Pattern::new(kind).name(), kind.name());
            assert_eq!(kind.key().parse::<PatternKind>().unwrap(), kind);
        }
    }

    #[test]
    fn time_of_stroke_floors_speed() {
        let limits = SpeedLimits { max_speed: 1000, max_acceleration: 1000, steps_per_unit: 1 };
        let tuning = Tuning { speed: -20, stroke: 300, depth: 500, sensation: 0.0 };
        assert_eq!(time_of_stroke(&tuning, &limits), 300.0);

        let tuning = Tuning { speed: 5000, ..tuning };
        assert_eq!(time_of_stroke(&tuning, &limits), 0.3);

        // no limits configured yet
        let limits = SpeedLimits::default();
        assert_eq!(time_of_stroke(&tuning, &limits), 300.0);
    }

    #[test]
    fn idle_moves_home_slowly() {
        let mut pattern = configured(PatternKind::TeasingPounding);
        let target = pattern.next_target(3);
        assert_eq!(
            target,
            MotionTarget { position: 500, speed: 500, acceleration: 50_000, skip: false }
        );
    }

    #[test]
    fn sensation_is_clamped() {
        let mut pattern = configured(PatternKind::Insist);
        pattern.set_sensation(250.0);
        assert_eq!(pattern.tuning().sensation, 100.0);
        pattern.set_sensation(-1000.0);
        assert_eq!(pattern.tuning().sensation, -100.0);
        pattern.set_sensation(f32::NAN);
        assert_eq!(pattern.tuning().sensation, 0.0);
    }

    #[test]
    fn diagnostics_serialize_with_pattern_tag() {
        let mut pattern = configured(PatternKind::Deeper);
        pattern.set_speed(1000);
        pattern.next_target(0);
        let json = serde_json::to_value(pattern.diagnostics()).unwrap();
        assert_eq!(json["pattern"], "deeper");
        assert!(json.get("amplitude").is_some());
    }
}
