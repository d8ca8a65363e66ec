/// Sound-producing collaborators and the clocks that drive scheduling
use std::time::Instant;

use crate::sequencer::Pitch;

/// Anything that can play a pitched note at a scheduled context time.
pub trait ToneGenerator {
    /// Starts `pitch` at `time` and releases it `duration` seconds later.
    fn trigger_attack_release(&mut self, pitch: Pitch, duration: f64, time: f64);

    /// Gives the generator a chance to flush work that has come due.
    fn service(&mut self, _now: f64) {}

    /// Drops notes that have not started yet and releases sounding ones.
    fn cancel_scheduled(&mut self) {}
}

/// Sends every note to each generator in turn.
#[derive(Default)]
pub struct Layered {
    layers: Vec<Box<dyn ToneGenerator>>,
}

impl Layered {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, layer: Box<dyn ToneGenerator>) {
        self.layers.push(layer);
    }

    pub fn len(&self) -> usize {
        self.layers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }
}

impl ToneGenerator for Layered {
    fn trigger_attack_release(&mut self, pitch: Pitch, duration: f64, time: f64) {
        for layer in &mut self.layers {
            layer.trigger_attack_release(pitch, duration, time);
        }
    }

    fn service(&mut self, now: f64) {
        for layer in &mut self.layers {
            layer.service(now);
        }
    }

    fn cancel_scheduled(&mut self) {
        for layer in &mut self.layers {
            layer.cancel_scheduled();
        }
    }
}

/// Source of "now" in context seconds.
pub trait Clock {
    fn now(&self) -> f64;
}

/// Monotonic wall clock, for hosts without an audio device.
#[derive(Debug, Clone, Copy)]
pub struct SystemClock {
    origin: Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now(&self) -> f64 {
        self.origin.elapsed().as_secs_f64()
    }
}
