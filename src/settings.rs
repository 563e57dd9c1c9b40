//! User settings and machine geometry.
//!
//! The user turns knobs in percent. The engine converts them into steps for
//! the active pattern using the machine geometry found during homing.

use serde::{Deserialize, Serialize};

use crate::pattern::{PatternKind, SpeedLimits};

/// The four play controls, each in `[0, 100]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SettingPercents {
    pub speed: f32,
    pub stroke: f32,
    pub depth: f32,
    /// 50 is neutral.
    pub sensation: f32,
}

impl Default for SettingPercents {
    fn default() -> Self {
        Self {
            speed: 0.0,
            stroke: 50.0,
            depth: 50.0,
            sensation: 50.0,
        }
    }
}

fn percent(value: f32, fallback: f32) -> f32 {
    if value.is_nan() {
        fallback
    } else {
        value.clamp(0.0, 100.0)
    }
}

impl SettingPercents {
    pub fn sanitized(self) -> Self {
        let defaults = Self::default();
        Self {
            speed: percent(self.speed, defaults.speed),
            stroke: percent(self.stroke, defaults.stroke),
            depth: percent(self.depth, defaults.depth),
            sensation: percent(self.sensation, defaults.sensation),
        }
    }
}

/// A speed change matters once it moves more than one point, or when it
/// starts or stops the machine.
pub fn is_change_significant(last: f32, next: f32) -> bool {
    (last - next).abs() > 1.0 || (last <= 0.0) != (next <= 0.0)
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MachineGeometry {
    pub max_speed_mm_per_second: f32,
    pub max_acceleration_mm_per_second2: f32,
    pub steps_per_mm: u32,
    /// Measured between the end stops.
    pub physical_travel_mm: f32,
    /// Kept clear at both ends of the travel.
    pub keepout_mm: f32,
}

impl Default for MachineGeometry {
    fn default() -> Self {
        Self {
            max_speed_mm_per_second: 900.0,
            max_acceleration_mm_per_second2: 10_000.0,
            steps_per_mm: 20,
            physical_travel_mm: 150.0,
            keepout_mm: 6.0,
        }
    }
}

impl MachineGeometry {
    pub fn validate(&self) -> anyhow::Result<()> {
        if !(self.max_speed_mm_per_second > 0.0) {
            anyhow::bail!("max_speed_mm_per_second must be positive");
        }
        if !(self.max_acceleration_mm_per_second2 > 0.0) {
            anyhow::bail!("max_acceleration_mm_per_second2 must be positive");
        }
        if self.steps_per_mm == 0 {
            anyhow::bail!("steps_per_mm must be positive");
        }
        if !(self.keepout_mm >= 0.0) {
            anyhow::bail!("keepout_mm must not be negative");
        }
        if !(self.travel_mm() > 0.0) {
            anyhow::bail!(
                "physical travel of {} mm leaves no room inside the {} mm keepout",
                self.physical_travel_mm,
                self.keepout_mm
            );
        }
        Ok(())
    }

    /// Usable travel between the keepout zones.
    pub fn travel_mm(&self) -> f32 {
        (self.physical_travel_mm - 2.0 * self.keepout_mm).max(0.0)
    }

    pub fn to_steps(&self, mm: f32) -> i32 {
        (mm * self.steps_per_mm as f32).round() as i32
    }

    pub fn keepout_steps(&self) -> i32 {
        self.to_steps(self.keepout_mm)
    }

    /// Stroke or depth percent to steps of usable travel.
    pub fn travel_steps(&self, percent: f32) -> i32 {
        self.to_steps(0.01 * percent * self.travel_mm())
    }

    pub fn speed_steps(&self, percent: f32) -> i32 {
        (self.max_speed_mm_per_second * 0.01 * percent * self.steps_per_mm as f32) as i32
    }

    pub fn limits(&self) -> SpeedLimits {
        SpeedLimits {
            max_speed: (self.max_speed_mm_per_second * self.steps_per_mm as f32) as u32,
            max_acceleration: (self.max_acceleration_mm_per_second2 * self.steps_per_mm as f32) as u32,
            steps_per_unit: self.steps_per_mm,
        }
    }

    /// Full strokes per minute the settings amount to. Zero without travel.
    pub fn strokes_per_minute(&self, settings: &SettingPercents) -> f32 {
        let travel = 0.01 * self.travel_mm();
        let trip = 2.0 * (settings.stroke * travel).abs().min((settings.depth * travel).abs());
        if trip <= 0.0 {
            return 0.0;
        }
        60.0 * self.max_speed_mm_per_second * 0.01 * settings.speed / trip
    }
}

/// Sensation percent `[0, 100]` to the pattern's `[-100, 100]`.
pub fn sensation_from_percent(percent: f32) -> f32 {
    percent * 2.0 - 100.0
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub machine: MachineGeometry,
    #[serde(default)]
    pub pattern: PatternKind,
    #[serde(default)]
    pub settings: SettingPercents,
}

impl EngineConfig {
    /// Clamps the play controls; the machine geometry is left as is and
    /// checked by [`MachineGeometry::validate`].
    pub fn sanitized(self) -> Self {
        Self {
            settings: self.settings.sanitized(),
            ..self
        }
    }

    /// For runs nobody is watching: a speed that would keep the machine
    /// standing still is replaced by `fallback` percent.
    pub fn with_running_speed(mut self, fallback: f32) -> Self {
        if self.machine.speed_steps(self.settings.speed) <= 0 {
            self.settings.speed = fallback;
        }
        self
    }
}
