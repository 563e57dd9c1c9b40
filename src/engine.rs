//! The stroke engine drives the motor with the active pattern.
//!
//! One engine owns one motor and exactly one pattern. Settings written by
//! other contexts (console, web API) land in the engine's config and are
//! handed to the pattern once per cycle, right before it is asked for the
//! next target.

use std::sync::{Arc, Mutex};
use std::time;

use anyhow::Result;
use serde::Serialize;

use crate::motor::Motor;
use crate::pattern::{MotionTarget, Pattern, PatternKind, PatternState};
use crate::settings::{is_change_significant, sensation_from_percent, EngineConfig, MachineGeometry, SettingPercents};

/// Power the servo works with once homed.
const WORKING_POWER: u16 = 350;
/// Speed of parking moves.
const PARK_SPEED_MM_PER_SECOND: f32 = 30.0;
/// Pause between two cycles of the run loop, also lets writers take the lock.
const CYCLE_PAUSE: time::Duration = time::Duration::from_millis(1);

pub type SharedEngine = Arc<Mutex<Option<Box<StrokeEngine<'static>>>>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EngineState {
    /// Homed, holding position.
    Ready,
    /// Stroking with the active pattern.
    Running,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct SessionStats {
    /// Completed inward strokes.
    pub strokes: u32,
    pub distance_meters: f32,
}

#[derive(Serialize)]
pub struct StateReport {
    pub config: EngineConfig,
    pub state: EngineState,
    pub pattern: &'static str,
    pub index: u32,
    pub target: Option<MotionTarget>,
    pub strokes_per_minute: f32,
    pub session: SessionStats,
    pub session_seconds: f32,
    pub diagnostics: PatternState,
}

fn configure(pattern: &mut Pattern, machine: &MachineGeometry, settings: &SettingPercents) {
    let limits = machine.limits();
    pattern.set_speed_limit(limits.max_speed, limits.max_acceleration, limits.steps_per_unit);
    pattern.set_speed(machine.speed_steps(settings.speed));
    pattern.set_stroke(machine.travel_steps(settings.stroke));
    pattern.set_depth(machine.travel_steps(settings.depth));
    pattern.set_sensation(sensation_from_percent(settings.sensation));
}

pub struct StrokeEngine<'a> {
    motor: Box<dyn Motor + Send + 'a>,
    pattern: Pattern,
    config: EngineConfig,
    config_version: u32,
    /// Settings the pattern currently runs with.
    applied: SettingPercents,
    state: EngineState,
    index: u32,
    /// Steps between the end stops, known once homed.
    measured_steps: Option<i32>,
    /// Motor position of pattern position 0.
    origin: i32,
    position: i32,
    last_target: Option<MotionTarget>,
    session: SessionStats,
    session_start: time::Instant,
}

impl<'a> StrokeEngine<'a> {
    pub fn new(motor: Box<dyn Motor + Send + 'a>, config: EngineConfig) -> Result<Self> {
        let config = config.sanitized();
        config.machine.validate()?;

        let mut pattern = Pattern::new(config.pattern);
        configure(&mut pattern, &config.machine, &config.settings);

        Ok(Self {
            motor,
            pattern,
            applied: config.settings,
            config,
            config_version: 0,
            state: EngineState::Ready,
            index: 0,
            measured_steps: None,
            origin: 0,
            position: 0,
            last_target: None,
            session: SessionStats::default(),
            session_start: time::Instant::now(),
        })
    }

    /// Homes the motor and adopts the measured travel.
    pub fn init_motor(&mut self) -> Result<()> {
        self.motor.homing()?;

        let steps = self.motor.pos_max() - self.motor.pos_min();
        self.measured_steps = Some(steps);
        log::info!(
            "Measured travel: {} steps, {:.1} mm",
            steps,
            steps as f32 / self.config.machine.steps_per_mm as f32
        );

        self.set_config(self.config.clone())?;
        self.place_origin()?;
        self.motor.set_max_power(WORKING_POWER)?;
        Ok(())
    }

    /// Puts pattern position 0 at the back keepout of the current machine.
    fn place_origin(&mut self) -> Result<()> {
        self.origin = self.motor.pos_min() + self.config.machine.keepout_steps();
        self.position = self.motor.read_position()? - self.origin;
        Ok(())
    }

    /// The physical travel of a homed machine always comes from the measured
    /// steps, rescaled when `steps_per_mm` changes.
    pub fn set_config(&mut self, config: EngineConfig) -> Result<()> {
        let mut config = config.sanitized();
        if let Some(steps) = self.measured_steps {
            config.machine.physical_travel_mm = steps as f32 / config.machine.steps_per_mm.max(1) as f32;
        }
        config.machine.validate()?;

        let pattern_changed = config.pattern != self.config.pattern;
        let machine_changed = config.machine != self.config.machine;
        self.config = config;

        if pattern_changed {
            self.switch_pattern();
        } else if machine_changed {
            configure(&mut self.pattern, &self.config.machine, &self.applied);
        }
        if machine_changed && self.measured_steps.is_some() {
            log::info!("Machine changed, keepout now {} steps", self.config.machine.keepout_steps());
            self.place_origin()?;
        }

        self.config_version += 1;
        Ok(())
    }

    pub fn update_config(&mut self, f: impl FnOnce(&mut EngineConfig)) -> Result<()> {
        let mut config = self.config.clone();
        f(&mut config);
        self.set_config(config)
    }

    pub fn update_settings(&mut self, f: impl FnOnce(&mut SettingPercents)) -> Result<()> {
        self.update_config(|config| f(&mut config.settings))
    }

    pub fn set_pattern(&mut self, kind: PatternKind) -> Result<()> {
        self.update_config(|config| config.pattern = kind)
    }

    pub fn get_config(&self) -> EngineConfig {
        self.config.clone()
    }

    pub fn get_config_version(&self) -> u32 {
        self.config_version
    }

    pub fn state(&self) -> EngineState {
        self.state
    }

    pub fn pattern(&self) -> &Pattern {
        &self.pattern
    }

    pub fn index(&self) -> u32 {
        self.index
    }

    pub fn session(&self) -> SessionStats {
        self.session
    }

    /// Starts stroking from the first stroke of the pattern.
    pub fn start(&mut self) -> Result<()> {
        if self.state == EngineState::Running {
            return Ok(());
        }
        if self.config.machine.speed_steps(self.config.settings.speed) <= 0 {
            anyhow::bail!("Speed is zero, raise the speed to start");
        }
        self.state = EngineState::Running;
        self.index = 0;
        self.session = SessionStats::default();
        self.session_start = time::Instant::now();
        log::info!("Started {}", self.pattern.name());
        self.apply_settings()
    }

    /// Stops stroking and sends the machine to the pattern's idle position.
    pub fn stop(&mut self) -> Result<()> {
        if self.state != EngineState::Running {
            return Ok(());
        }
        self.state = EngineState::Ready;
        let idle = self.pattern.idle_target();
        self.send(idle)?;
        log::info!(
            "Stopped after {} strokes, {:.2} m",
            self.session.strokes,
            self.session.distance_meters
        );
        Ok(())
    }

    /// Parks at full depth.
    pub fn move_to_max(&mut self) -> Result<()> {
        let depth = self.pattern.tuning().depth;
        self.park(depth)
    }

    /// Parks at the back end of the travel.
    pub fn move_to_min(&mut self) -> Result<()> {
        self.park(0)
    }

    fn park(&mut self, position: i32) -> Result<()> {
        if self.state != EngineState::Ready {
            anyhow::bail!("Stop the pattern before parking");
        }
        let limits = self.config.machine.limits();
        let speed = self.config.machine.to_steps(PARK_SPEED_MM_PER_SECOND).max(0) as u32;
        self.send(MotionTarget {
            position: position.clamp(0, self.pattern.tuning().depth.max(0)),
            speed: speed.min(limits.max_speed),
            acceleration: limits.max_acceleration / 2,
            skip: false,
        })
    }

    fn switch_pattern(&mut self) {
        let kind = self.config.pattern;
        log::info!("Pattern changed: {} -> {}", self.pattern.name(), kind.name());
        let mut pattern = Pattern::new(kind);
        configure(&mut pattern, &self.config.machine, &self.applied);
        self.pattern = pattern;
        self.index = 0;
    }

    /// Hands changed settings to the pattern. Unchanged ones are left alone.
    fn apply_settings(&mut self) -> Result<()> {
        let next = self.config.settings;
        let last = self.applied;
        let machine = self.config.machine;

        if next.stroke != last.stroke {
            log::info!("Stroke changed: {:.0}% -> {:.0}%", last.stroke, next.stroke);
            self.pattern.set_stroke(machine.travel_steps(next.stroke));
            self.applied.stroke = next.stroke;
        }
        if next.depth != last.depth {
            log::info!("Depth changed: {:.0}% -> {:.0}%", last.depth, next.depth);
            self.pattern.set_depth(machine.travel_steps(next.depth));
            self.applied.depth = next.depth;
        }
        if next.sensation != last.sensation {
            log::info!("Sensation changed: {:.0}% -> {:.0}%", last.sensation, next.sensation);
            self.pattern.set_sensation(sensation_from_percent(next.sensation));
            self.applied.sensation = next.sensation;
        }
        // start and stop follow the speed the pattern gets, not the percent
        let was_moving = machine.speed_steps(last.speed) > 0;
        let moving = machine.speed_steps(next.speed) > 0;
        if is_change_significant(last.speed, next.speed) || was_moving != moving {
            log::info!("Speed changed: {:.0}% -> {:.0}%", last.speed, next.speed);
            self.pattern.set_speed(machine.speed_steps(next.speed));
            self.applied.speed = next.speed;

            if !moving {
                self.stop()?;
            } else if !was_moving && self.state == EngineState::Ready {
                self.start()?;
            }
        }
        Ok(())
    }

    fn send(&mut self, target: MotionTarget) -> Result<()> {
        self.motor
            .move_to(self.origin + target.position, target.speed, target.acceleration)?;

        let travelled = target.position.abs_diff(self.position) as f32;
        self.session.distance_meters +=
            travelled / self.config.machine.steps_per_mm as f32 / 1000.0;
        self.position = target.position;
        self.last_target = Some(target);
        Ok(())
    }

    pub fn get_current_state(&self) -> StateReport {
        StateReport {
            config: self.get_config(),
            state: self.state,
            pattern: self.pattern.name(),
            index: self.index,
            target: self.last_target,
            strokes_per_minute: self.config.machine.strokes_per_minute(&self.applied),
            session: self.session,
            session_seconds: self.session_start.elapsed().as_secs_f32(),
            diagnostics: self.pattern.diagnostics().clone(),
        }
    }

    pub fn cycle(&mut self, now: time::Instant) -> Result<()> {
        self.apply_settings()?;
        self.motor.cycle()?;

        if self.state != EngineState::Running || self.motor.is_moving()? {
            return Ok(());
        }

        let target = self.pattern.next_target_at(self.index, now);
        if log::log_enabled!(log::Level::Debug) {
            log::debug!(
                "{} #{}: {:?} {}",
                self.pattern.name(),
                self.index,
                target,
                serde_json::to_string(self.pattern.diagnostics()).unwrap_or_default()
            );
        }
        if target.skip {
            return Ok(());
        }

        self.send(target)?;
        if self.index % 2 == 0 {
            self.session.strokes += 1;
        }
        self.index += 1;
        Ok(())
    }
}

/// Cycles the shared engine until `keep_running` says otherwise. Config
/// changes are checked every 200 ms and handed to `save_config`.
pub fn run_loop(
    engine: &SharedEngine,
    mut save_config: impl FnMut(&EngineConfig) -> Result<()>,
    mut keep_running: impl FnMut(&StrokeEngine) -> bool,
) -> Result<()> {
    let mut last_config_check = time::Instant::now();
    let mut last_saved_config_version = engine
        .lock()
        .unwrap()
        .as_ref()
        .map_or(0, |e| e.get_config_version());
    let mut update_counter = 0;
    let mut last_update_counter_reset = time::Instant::now();

    loop {
        {
            let mut engine_lock = engine.lock().unwrap();
            let Some(engine) = engine_lock.as_mut() else {
                anyhow::bail!("Stroke engine lost, stopping run loop");
            };

            if last_config_check.elapsed() > time::Duration::from_millis(200) {
                last_config_check = time::Instant::now();
                let current_version = engine.get_config_version();
                if current_version != last_saved_config_version {
                    log::info!("Config updated, saving");
                    if let Err(e) = save_config(&engine.get_config()) {
                        log::error!("Failed to save config: {}", e);
                    } else {
                        last_saved_config_version = current_version;
                    }
                }
            }

            if let Err(e) = engine.cycle(time::Instant::now()) {
                log::error!("Failed to cycle: {}", e);
            }

            if !keep_running(&**engine) {
                break;
            }
        }

        update_counter += 1;
        if last_update_counter_reset.elapsed() > time::Duration::from_secs(60) {
            log::info!("Engine cycles per second: {}", update_counter as f64 / 60.0);
            last_update_counter_reset = time::Instant::now();
            update_counter = 0;
        }
        std::thread::sleep(CYCLE_PAUSE);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::time::{Duration, Instant};

    use super::*;
    use crate::motor::{MoveRecord, SimulatedMotor};

    fn engine(config: EngineConfig) -> (StrokeEngine<'static>, Arc<Mutex<Vec<MoveRecord>>>) {
        let motor = SimulatedMotor::new(3000);
        let moves = motor.moves();
        let mut engine = StrokeEngine::new(Box::new(motor), config).unwrap();
        engine.init_motor().unwrap();
        (engine, moves)
    }

    fn running_config(kind: PatternKind) -> EngineConfig {
        EngineConfig {
            pattern: kind,
            settings: SettingPercents {
                speed: 10.0,
                stroke: 50.0,
                depth: 100.0,
                sensation: 50.0,
            },
            ..EngineConfig::default()
        }
    }

    #[test]
    fn homing_adopts_measured_travel() {
        let (engine, _) = engine(EngineConfig::default());
        assert_eq!(engine.get_config().machine.physical_travel_mm, 150.0);
        // half of the 2760 steps between the keepouts
        assert_eq!(engine.pattern().tuning().depth, 1380);
        assert_eq!(engine.state(), EngineState::Ready);
    }

    #[test]
    fn does_not_start_at_zero_speed() {
        let (mut engine, _) = engine(EngineConfig::default());
        assert!(engine.start().is_err());
        engine.cycle(Instant::now()).unwrap();
        assert_eq!(engine.state(), EngineState::Ready);
    }

    #[test]
    fn speed_from_zero_starts_and_back_to_zero_stops() {
        let (mut engine, moves) = engine(EngineConfig::default());
        engine.update_settings(|s| s.speed = 20.0).unwrap();
        engine.cycle(Instant::now()).unwrap();
        assert_eq!(engine.state(), EngineState::Running);
        assert_eq!(engine.index(), 1);

        engine.update_settings(|s| s.speed = 0.0).unwrap();
        engine.cycle(Instant::now()).unwrap();
        assert_eq!(engine.state(), EngineState::Ready);

        let moves = moves.lock().unwrap();
        let idle = moves.last().unwrap();
        // idle speed is 5% of 18000 steps/s
        assert_eq!(idle.speed, 900);
    }

    #[test]
    fn strokes_alternate_inside_the_keepout() {
        let (mut engine, moves) = engine(running_config(PatternKind::SimplePenetration));
        engine.start().unwrap();
        for _ in 0..6 {
            engine.cycle(Instant::now()).unwrap();
        }
        let positions: Vec<i32> = moves.lock().unwrap().iter().map(|m| m.position).collect();
        assert_eq!(positions, vec![120, 2880, 120, 2880, 120, 2880]);
        assert_eq!(engine.session().strokes, 3);
        // 120 steps off the end stop, then 5 moves of 2760 steps, at 20 steps/mm
        assert!((engine.session().distance_meters - 0.696).abs() < 1e-4);
    }

    #[test]
    fn keepout_change_moves_the_origin() {
        let (mut engine, moves) = engine(running_config(PatternKind::SimplePenetration));
        engine.update_config(|c| c.machine.keepout_mm = 2.0).unwrap();
        engine.start().unwrap();
        for _ in 0..4 {
            engine.cycle(Instant::now()).unwrap();
        }
        engine.update_config(|c| c.machine.keepout_mm = 10.0).unwrap();
        for _ in 0..4 {
            engine.cycle(Instant::now()).unwrap();
        }
        assert_eq!(engine.state(), EngineState::Running);
        assert_eq!(engine.session().strokes, 4);

        let positions: Vec<i32> = moves.lock().unwrap().iter().map(|m| m.position).collect();
        // 2 mm keepout is 40 steps at each end, 10 mm is 200
        assert_eq!(positions, vec![40, 2960, 40, 2960, 200, 2800, 200, 2800]);
    }

    #[test]
    fn step_scale_change_keeps_the_measured_travel() {
        let (mut engine, moves) = engine(running_config(PatternKind::SimplePenetration));
        engine.update_config(|c| c.machine.steps_per_mm = 10).unwrap();
        assert_eq!(engine.get_config().machine.physical_travel_mm, 300.0);
        engine.update_config(|c| c.machine.physical_travel_mm = 500.0).unwrap();
        assert_eq!(engine.get_config().machine.physical_travel_mm, 300.0);

        engine.start().unwrap();
        engine.cycle(Instant::now()).unwrap();
        engine.cycle(Instant::now()).unwrap();
        let positions: Vec<i32> = moves.lock().unwrap().iter().map(|m| m.position).collect();
        // 3000 measured steps, 60 step keepouts
        assert_eq!(positions, vec![60, 2940]);
    }

    #[test]
    fn speed_below_one_step_does_not_run() {
        let (mut engine, moves) = engine(EngineConfig::default());
        engine.update_settings(|s| s.speed = 0.004).unwrap();
        for _ in 0..6 {
            engine.cycle(Instant::now()).unwrap();
        }
        assert_eq!(engine.state(), EngineState::Ready);
        assert_eq!(engine.index(), 0);
        assert_eq!(engine.session().strokes, 0);
        assert!(moves.lock().unwrap().is_empty());
        assert!(engine.start().is_err());

        // still under one point, but now worth 90 steps/s
        engine.update_settings(|s| s.speed = 0.5).unwrap();
        engine.cycle(Instant::now()).unwrap();
        assert_eq!(engine.state(), EngineState::Running);
        assert_eq!(engine.pattern().tuning().speed, 90);
    }

    #[test]
    fn speed_dropping_below_one_step_stops() {
        let (mut engine, _) = engine(running_config(PatternKind::SimplePenetration));
        engine.start().unwrap();
        engine.cycle(Instant::now()).unwrap();
        engine.cycle(Instant::now()).unwrap();
        engine.update_settings(|s| s.speed = 0.004).unwrap();
        engine.cycle(Instant::now()).unwrap();
        assert_eq!(engine.state(), EngineState::Ready);
        assert_eq!(engine.index(), 2);
        assert_eq!(engine.session().strokes, 1);
    }

    #[test]
    fn small_speed_jitter_is_ignored() {
        let (mut engine, _) = engine(running_config(PatternKind::RoboStroke));
        engine.start().unwrap();
        let before = engine.pattern().tuning().speed;
        engine.update_settings(|s| s.speed = 10.6).unwrap();
        engine.cycle(Instant::now()).unwrap();
        assert_eq!(engine.pattern().tuning().speed, before);
        engine.update_settings(|s| s.speed = 12.0).unwrap();
        engine.cycle(Instant::now()).unwrap();
        assert_eq!(engine.pattern().tuning().speed, 2160);
    }

    #[test]
    fn pattern_switch_restarts_index() {
        let (mut engine, moves) = engine(running_config(PatternKind::Deeper));
        engine.start().unwrap();
        for _ in 0..5 {
            engine.cycle(Instant::now()).unwrap();
        }
        assert_eq!(engine.index(), 5);
        engine.set_pattern(PatternKind::HalfnHalf).unwrap();
        assert_eq!(engine.index(), 0);
        assert_eq!(engine.pattern().name(), "Half'n'Half");
        assert_eq!(engine.state(), EngineState::Running);

        engine.cycle(Instant::now()).unwrap();
        // half of a 1380 step stroke in front of home at 1380
        assert_eq!(moves.lock().unwrap().last().unwrap().position, 120 + 1380 + 690);
    }

    #[test]
    fn skipped_strokes_keep_the_index() {
        let (mut engine, moves) = engine(running_config(PatternKind::StopNGo));
        engine.update_settings(|s| s.sensation = 0.0).unwrap();
        engine.start().unwrap();
        let t0 = Instant::now();
        engine.cycle(t0).unwrap();
        engine.cycle(t0).unwrap();
        assert_eq!(engine.index(), 2);

        engine.cycle(t0 + Duration::from_millis(50)).unwrap();
        assert_eq!(engine.index(), 2);
        assert_eq!(moves.lock().unwrap().len(), 2);

        engine.cycle(t0 + Duration::from_millis(100)).unwrap();
        assert_eq!(engine.index(), 3);
    }

    #[test]
    fn invalid_machine_is_rejected() {
        let (mut engine, _) = engine(EngineConfig::default());
        let version = engine.get_config_version();
        let result = engine.update_config(|c| c.machine.steps_per_mm = 0);
        assert!(result.is_err());
        assert_eq!(engine.get_config_version(), version);
        assert_eq!(engine.get_config().machine.steps_per_mm, 20);
    }

    #[test]
    fn parking_only_while_ready() {
        let (mut engine, moves) = engine(running_config(PatternKind::Insist));
        engine.move_to_max().unwrap();
        assert_eq!(moves.lock().unwrap().last().unwrap().position, 2880);
        engine.move_to_min().unwrap();
        assert_eq!(moves.lock().unwrap().last().unwrap().position, 120);
        engine.start().unwrap();
        assert!(engine.move_to_max().is_err());
    }

    #[test]
    fn run_loop_saves_changed_config() {
        let (engine, _) = engine(running_config(PatternKind::TeasingPounding));
        let shared: SharedEngine = Arc::new(Mutex::new(Some(Box::new(engine))));
        let writer = {
            let shared = shared.clone();
            std::thread::spawn(move || {
                std::thread::sleep(Duration::from_millis(50));
                let mut engine = shared.lock().unwrap();
                engine.as_mut().unwrap().update_settings(|s| s.depth = 80.0).unwrap();
            })
        };

        let mut saved = Vec::new();
        let started = Instant::now();
        run_loop(
            &shared,
            |config| {
                saved.push(config.settings.depth);
                Ok(())
            },
            |_| started.elapsed() < Duration::from_millis(400),
        )
        .unwrap();
        writer.join().unwrap();
        assert_eq!(saved, vec![80.0]);
        let engine = shared.lock().unwrap();
        assert_eq!(engine.as_ref().unwrap().pattern().tuning().depth, 2208);
    }
}
