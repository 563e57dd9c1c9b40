use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use anyhow::Result;

/// The servo or stepper driver. Executes one trapezoidal move at a time;
/// positions are absolute motor steps.
pub trait Motor: Send {
    fn cycle(&mut self) -> Result<()>;
    fn homing(&mut self) -> Result<()>;
    fn read_position(&mut self) -> Result<i32>;
    fn move_to(&mut self, position: i32, speed: u32, acceleration: u32) -> Result<()>;
    /// True until the last commanded move has finished.
    fn is_moving(&mut self) -> Result<bool>;
    fn pos_min(&self) -> i32;
    fn pos_max(&self) -> i32;
    fn set_max_power(&mut self, power: u16) -> Result<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MoveRecord {
    pub position: i32,
    pub speed: u32,
    pub acceleration: u32,
}

/// Time a trapezoidal move of `distance` steps takes. A move too short to
/// reach `speed` becomes a triangle.
pub fn move_duration(distance: u32, speed: u32, acceleration: u32) -> Duration {
    TrapezoidMove::new(0, distance as i32, speed, acceleration).duration()
}

/// Position over time of one move: ramp up, cruise, ramp down.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrapezoidMove {
    from: i32,
    to: i32,
    /// Seconds spent in each ramp.
    ramp: f64,
    total: f64,
    peak_speed: f64,
    acceleration: f64,
}

impl TrapezoidMove {
    pub fn new(from: i32, to: i32, speed: u32, acceleration: u32) -> Self {
        let d = to.abs_diff(from) as f64;
        let v = speed as f64;
        let a = acceleration as f64;
        let (ramp, total, peak_speed) = if d == 0.0 || v == 0.0 || a == 0.0 {
            (0.0, 0.0, 0.0)
        } else if d >= v * v / a {
            (v / a, d / v + v / a, v)
        } else {
            let ramp = (d / a).sqrt();
            (ramp, 2.0 * ramp, a * ramp)
        };
        Self {
            from,
            to,
            ramp,
            total,
            peak_speed,
            acceleration: a,
        }
    }

    pub fn duration(&self) -> Duration {
        Duration::from_secs_f64(self.total)
    }

    /// Setpoint `elapsed` after the move started.
    pub fn position_at(&self, elapsed: Duration) -> i32 {
        let t = elapsed.as_secs_f64();
        if t >= self.total {
            return self.to;
        }
        let a = self.acceleration;
        let ramp_distance = 0.5 * a * self.ramp * self.ramp;
        let travelled = if t < self.ramp {
            0.5 * a * t * t
        } else if t < self.total - self.ramp {
            ramp_distance + self.peak_speed * (t - self.ramp)
        } else {
            let left = self.total - t;
            self.to.abs_diff(self.from) as f64 - 0.5 * a * left * left
        };
        let travelled = travelled.round() as i32;
        if self.to >= self.from {
            self.from + travelled
        } else {
            self.from - travelled
        }
    }
}

/// A motor without hardware. Moves either complete at once or take as long
/// as the real profile would.
pub struct SimulatedMotor {
    travel: i32,
    pos_min: i32,
    pos_max: i32,
    position: i32,
    realtime: bool,
    busy_until: Option<Instant>,
    max_power: u16,
    moves: Arc<Mutex<Vec<MoveRecord>>>,
}

impl SimulatedMotor {
    pub fn new(travel: i32) -> Self {
        Self {
            travel,
            pos_min: 0,
            pos_max: 0,
            position: 0,
            realtime: false,
            busy_until: None,
            max_power: 0,
            moves: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Moves take their profile time instead of finishing at once.
    pub fn realtime(mut self) -> Self {
        self.realtime = true;
        self
    }

    /// Every move commanded so far. Stays readable after the motor is boxed.
    pub fn moves(&self) -> Arc<Mutex<Vec<MoveRecord>>> {
        self.moves.clone()
    }

    pub fn max_power(&self) -> u16 {
        self.max_power
    }

    fn is_homed(&self) -> bool {
        self.pos_max > self.pos_min
    }
}

impl Motor for SimulatedMotor {
    fn cycle(&mut self) -> Result<()> {
        Ok(())
    }

    fn homing(&mut self) -> Result<()> {
        if self.travel <= 0 {
            anyhow::bail!("Simulated travel must be positive, got {}", self.travel);
        }
        self.pos_min = 0;
        self.pos_max = self.travel;
        self.position = 0;
        log::info!("Simulated motor homed, travel {} steps", self.travel);
        Ok(())
    }

    fn read_position(&mut self) -> Result<i32> {
        Ok(self.position)
    }

    fn move_to(&mut self, position: i32, speed: u32, acceleration: u32) -> Result<()> {
        if !self.is_homed() {
            anyhow::bail!("Motor not homed");
        }
        if position < self.pos_min || position > self.pos_max {
            anyhow::bail!(
                "Position {} outside of [{}, {}]",
                position,
                self.pos_min,
                self.pos_max
            );
        }
        if self.realtime {
            let distance = position.abs_diff(self.position);
            self.busy_until = Some(Instant::now() + move_duration(distance, speed, acceleration));
        }
        self.position = position;
        self.moves.lock().unwrap().push(MoveRecord {
            position,
            speed,
            acceleration,
        });
        Ok(())
    }

    fn is_moving(&mut self) -> Result<bool> {
        Ok(self.busy_until.is_some_and(|until| Instant::now() < until))
    }

    fn pos_min(&self) -> i32 {
        self.pos_min
    }

    fn pos_max(&self) -> i32 {
        self.pos_max
    }

    fn set_max_power(&mut self, power: u16) -> Result<()> {
        self.max_power = power;
        Ok(())
    }
}
