//! Stroke pattern engine for the OSSM linear actuator.
//!
//! The [`pattern`] module turns four user knobs into one motion target per
//! stroke. [`engine::StrokeEngine`] owns the active pattern and a [`motor::Motor`]
//! and drives one with the other.

pub mod command;
pub mod engine;
pub mod motor;
pub mod pattern;
pub mod settings;

pub use engine::{EngineState, SharedEngine, StrokeEngine};
pub use motor::{Motor, SimulatedMotor};
pub use pattern::{MotionTarget, Pattern, PatternKind};
pub use settings::{EngineConfig, MachineGeometry, SettingPercents};
