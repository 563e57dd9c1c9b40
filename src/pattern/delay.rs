use std::time::{Duration, Instant};

use serde::Serialize;

/// Polled pause between strokes. Never blocks: the owner asks
/// [`DelayTimer::is_still_delayed`] on every stroke boundary.
#[derive(Debug, Clone, Default, Serialize)]
pub struct DelayTimer {
    #[serde(skip)]
    started: Option<Instant>,
    duration: Duration,
}

impl DelayTimer {
    pub fn start(&mut self, now: Instant) {
        self.started = Some(now);
    }

    pub fn update(&mut self, duration: Duration) {
        self.duration = duration;
    }

    pub fn duration(&self) -> Duration {
        self.duration
    }

    pub fn is_still_delayed(&self, now: Instant) -> bool {
        match self.started {
            Some(started) => now < started + self.duration,
            None => false,
        }
    }
}
