/// A single monophonic synth voice: oscillator shaped by an ADSR envelope
use std::f32::consts::PI;
use std::fmt;
use std::str::FromStr;

use crate::error::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Waveform {
    Sine,
    #[default]
    Square,
    Sawtooth,
    Triangle,
}

impl Waveform {
    /// One sample at `phase` in [0, 1).
    pub fn sample(&self, phase: f32) -> f32 {
        match self {
            Waveform::Sine => (phase * 2.0 * PI).sin(),
            Waveform::Square => {
                if phase < 0.5 {
                    1.0
                } else {
                    -1.0
                }
            }
            Waveform::Sawtooth => 2.0 * phase - 1.0,
            Waveform::Triangle => 1.0 - 4.0 * (phase - 0.5).abs(),
        }
    }
}

impl fmt::Display for Waveform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Waveform::Sine => "sine",
            Waveform::Square => "square",
            Waveform::Sawtooth => "sawtooth",
            Waveform::Triangle => "triangle",
        })
    }
}

impl FromStr for Waveform {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Error> {
        match s.trim().to_ascii_lowercase().as_str() {
            "sine" => Ok(Waveform::Sine),
            "square" => Ok(Waveform::Square),
            "sawtooth" | "saw" => Ok(Waveform::Sawtooth),
            "triangle" => Ok(Waveform::Triangle),
            _ => Err(Error::InvalidWaveform(s.to_string())),
        }
    }
}

/// ADSR times in seconds, sustain as a level in [0, 1].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Envelope {
    pub attack: f64,
    pub decay: f64,
    pub sustain: f32,
    pub release: f64,
}

impl Default for Envelope {
    fn default() -> Self {
        Self {
            attack: 0.005,
            decay: 0.1,
            sustain: 0.3,
            release: 0.1,
        }
    }
}

/// Envelope level `elapsed` seconds into a held note that started at `from`.
fn held_level(envelope: &Envelope, from: f32, elapsed: f64) -> f32 {
    if elapsed < envelope.attack {
        let t = (elapsed / envelope.attack) as f32;
        return from + (1.0 - from) * t;
    }
    let elapsed = elapsed - envelope.attack;
    if elapsed < envelope.decay {
        let t = (elapsed / envelope.decay) as f32;
        return 1.0 + (envelope.sustain - 1.0) * t;
    }
    envelope.sustain
}

#[derive(Debug, Clone, Copy)]
struct Gate {
    frequency: f32,
    start: f64,
    release: f64,
    /// Level the attack ramps up from, so retriggers don't click
    from: f32,
}

/// Time-driven voice: levels are computed from absolute times, so the
/// envelope is sample accurate regardless of buffer size.
#[derive(Debug, Clone)]
pub struct Voice {
    waveform: Waveform,
    envelope: Envelope,
    gain: f32,
    phase: f32,
    gate: Option<Gate>,
}

impl Voice {
    pub fn new(waveform: Waveform, envelope: Envelope, volume_db: f32) -> Self {
        Self {
            waveform,
            envelope,
            gain: db_to_gain(volume_db),
            phase: 0.0,
            gate: None,
        }
    }

    pub fn is_sounding(&self, time: f64) -> bool {
        self.gate
            .map_or(false, |gate| time < gate.release + self.envelope.release)
    }

    /// Starts a note at `time`, held for `duration` seconds.
    pub fn note_on(&mut self, frequency: f32, time: f64, duration: f64) {
        let from = self.level(time);
        self.gate = Some(Gate {
            frequency,
            start: time,
            release: time + duration.max(0.0),
            from,
        });
    }

    /// Moves the release point to `time` if the note is still held.
    pub fn release(&mut self, time: f64) {
        if let Some(gate) = self.gate.as_mut() {
            if time < gate.release {
                gate.release = time.max(gate.start);
            }
        }
    }

    pub fn level(&self, time: f64) -> f32 {
        let Some(gate) = self.gate else {
            return 0.0;
        };
        if time < gate.start {
            return 0.0;
        }
        if time < gate.release {
            return held_level(&self.envelope, gate.from, time - gate.start);
        }
        let released_at = held_level(&self.envelope, gate.from, gate.release - gate.start);
        let elapsed = time - gate.release;
        if elapsed >= self.envelope.release {
            return 0.0;
        }
        released_at * (1.0 - (elapsed / self.envelope.release) as f32)
    }

    /// Renders the sample at `time` and advances the oscillator.
    pub fn render(&mut self, time: f64, sample_rate: f32) -> f32 {
        let Some(gate) = self.gate else {
            return 0.0;
        };
        let level = self.level(time);
        if level <= 0.0 {
            if !self.is_sounding(time) && time >= gate.start {
                self.gate = None;
                self.phase = 0.0;
            }
            return 0.0;
        }
        let sample = self.waveform.sample(self.phase) * level * self.gain;
        self.phase += gate.frequency / sample_rate;
        if self.phase >= 1.0 {
            self.phase -= 1.0;
        }
        sample
    }
}

impl Default for Voice {
    fn default() -> Self {
        Self::new(Waveform::default(), Envelope::default(), -10.0)
    }
}

pub fn db_to_gain(db: f32) -> f32 {
    10.0_f32.powf(db / 20.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use float_cmp::approx_eq;

    #[test]
    fn test_waveforms() {
        assert_eq!(Waveform::Square.sample(0.25), 1.0);
        assert_eq!(Waveform::Square.sample(0.75), -1.0);
        assert_eq!(Waveform::Sawtooth.sample(0.0), -1.0);
        assert_eq!(Waveform::Triangle.sample(0.5), 1.0);
        assert!(approx_eq!(f32, Waveform::Sine.sample(0.25), 1.0, epsilon = 1e-6));
        assert_eq!("Saw".parse::<Waveform>().unwrap(), Waveform::Sawtooth);
        assert!("noise".parse::<Waveform>().is_err());
    }

    #[test]
    fn test_envelope_shape() {
        let mut voice = Voice::default();
        voice.note_on(440.0, 1.0, 0.25);
        assert_eq!(voice.level(0.5), 0.0);
        assert!(approx_eq!(f32, voice.level(1.0025), 0.5, epsilon = 1e-4));
        assert!(approx_eq!(f32, voice.level(1.005), 1.0, epsilon = 1e-4));
        // Sustain after attack + decay.
        assert!(approx_eq!(f32, voice.level(1.2), 0.3, epsilon = 1e-6));
        // Halfway through the release.
        assert!(approx_eq!(f32, voice.level(1.30), 0.15, epsilon = 1e-4));
        assert_eq!(voice.level(1.36), 0.0);
        assert!(!voice.is_sounding(1.36));
    }

    #[test]
    fn test_early_release() {
        let mut voice = Voice::default();
        voice.note_on(440.0, 0.0, 1.0);
        voice.release(0.5);
        assert!(approx_eq!(f32, voice.level(0.55), 0.15, epsilon = 1e-4));
        assert_eq!(voice.level(0.7), 0.0);
    }

    #[test]
    fn test_retrigger_starts_from_current_level() {
        let mut voice = Voice::default();
        voice.note_on(440.0, 0.0, 1.0);
        voice.note_on(880.0, 0.5, 1.0);
        assert!(approx_eq!(f32, voice.level(0.5), 0.3, epsilon = 1e-6));
    }

    #[test]
    fn test_render_is_silent_without_note() {
        let mut voice = Voice::default();
        assert_eq!(voice.render(0.0, 48_000.0), 0.0);
        voice.note_on(440.0, 0.0, 0.1);
        let peak = (0..480)
            .map(|i| voice.render(i as f64 / 48_000.0, 48_000.0).abs())
            .fold(0.0f32, f32::max);
        assert!(peak > 0.0 && peak <= db_to_gain(-10.0) + 1e-6);
    }

    #[test]
    fn test_db_to_gain() {
        assert!(approx_eq!(f32, db_to_gain(0.0), 1.0));
        assert!(approx_eq!(f32, db_to_gain(-20.0), 0.1, epsilon = 1e-6));
    }
}
