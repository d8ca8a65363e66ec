/// Audio output using cpal
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

pub mod voice;

pub use voice::{Envelope, Voice, Waveform};

use crate::error::{Error, Result};
use crate::sequencer::Pitch;
use crate::tone::{Clock, ToneGenerator};

/// A note waiting for the audio callback to reach its start time.
#[derive(Debug, Clone, Copy, PartialEq)]
struct ScheduledNote {
    frequency: f32,
    start: f64,
    duration: f64,
}

/// State shared between the UI thread and the audio callback.
#[derive(Debug, Default)]
struct Schedule {
    pending: Vec<ScheduledNote>,
    /// Release the voice at the next sample
    release_now: bool,
}

impl Schedule {
    fn push(&mut self, note: ScheduledNote) {
        let at = self
            .pending
            .iter()
            .position(|pending| pending.start > note.start)
            .unwrap_or(self.pending.len());
        self.pending.insert(at, note);
    }
}

/// Frames rendered by the output stream, as context seconds.
#[derive(Debug, Clone)]
pub struct AudioClock {
    frames: Arc<AtomicU64>,
    sample_rate: f32,
}

impl AudioClock {
    fn new(sample_rate: f32) -> Self {
        Self {
            frames: Arc::new(AtomicU64::new(0)),
            sample_rate,
        }
    }

    pub fn sample_rate(&self) -> f32 {
        self.sample_rate
    }
}

impl Clock for AudioClock {
    fn now(&self) -> f64 {
        self.frames.load(Ordering::Acquire) as f64 / self.sample_rate as f64
    }
}

/// Renders one buffer of interleaved frames starting at frame `first_frame`.
fn render_buffer(
    data: &mut [f32],
    channels: usize,
    first_frame: u64,
    sample_rate: f32,
    voice: &mut Voice,
    schedule: &mut Schedule,
) -> u64 {
    let mut frame = first_frame;
    for out in data.chunks_mut(channels.max(1)) {
        let time = frame as f64 / sample_rate as f64;
        if schedule.release_now {
            voice.release(time);
            schedule.release_now = false;
        }
        while schedule
            .pending
            .first()
            .map_or(false, |note| note.start <= time)
        {
            let note = schedule.pending.remove(0);
            voice.note_on(note.frequency, time, note.duration);
        }
        let sample = voice.render(time, sample_rate);
        for channel in out.iter_mut() {
            *channel = sample;
        }
        frame += 1;
    }
    frame
}

pub struct AudioOutput {
    _stream: cpal::Stream,
    schedule: Arc<Mutex<Schedule>>,
    clock: AudioClock,
}

impl AudioOutput {
    pub fn new(voice: Voice) -> Result<Self> {
        let host = cpal::default_host();
        let device = host
            .default_output_device()
            .ok_or_else(|| Error::AudioDevice("no default output device".into()))?;
        let config = device
            .default_output_config()
            .map_err(|e| Error::AudioDevice(e.to_string()))?;

        if config.sample_format() != cpal::SampleFormat::F32 {
            return Err(Error::AudioDevice(format!(
                "unsupported sample format {:?}",
                config.sample_format()
            )));
        }

        let sample_rate = config.sample_rate().0 as f32;
        let channels = config.channels() as usize;
        let clock = AudioClock::new(sample_rate);
        let schedule = Arc::new(Mutex::new(Schedule::default()));

        let frames = Arc::clone(&clock.frames);
        let shared = Arc::clone(&schedule);
        let mut voice = voice;
        let stream = device
            .build_output_stream(
                &config.into(),
                move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                    let first = frames.load(Ordering::Acquire);
                    let last = match shared.lock() {
                        Ok(mut schedule) => render_buffer(
                            data,
                            channels,
                            first,
                            sample_rate,
                            &mut voice,
                            &mut schedule,
                        ),
                        Err(_) => {
                            data.fill(0.0);
                            first + (data.len() / channels.max(1)) as u64
                        }
                    };
                    frames.store(last, Ordering::Release);
                },
                |err| log::error!("Audio stream error: {}", err),
                None,
            )
            .map_err(|e| Error::AudioDevice(e.to_string()))?;
        stream
            .play()
            .map_err(|e| Error::AudioDevice(e.to_string()))?;

        log::info!(
            "audio output: {} Hz, {} channel(s)",
            sample_rate,
            channels
        );
        Ok(Self {
            _stream: stream,
            schedule,
            clock,
        })
    }

    /// Clock advanced by the output stream; schedule against this.
    pub fn clock(&self) -> AudioClock {
        self.clock.clone()
    }

    pub fn trigger_note(&mut self, pitch: Pitch, duration: f64, time: f64) {
        if let Ok(mut schedule) = self.schedule.lock() {
            schedule.push(ScheduledNote {
                frequency: pitch.frequency(),
                start: time,
                duration,
            });
        }
    }

    pub fn stop_note(&mut self) {
        if let Ok(mut schedule) = self.schedule.lock() {
            schedule.pending.clear();
            schedule.release_now = true;
        }
    }
}

impl ToneGenerator for AudioOutput {
    fn trigger_attack_release(&mut self, pitch: Pitch, duration: f64, time: f64) {
        self.trigger_note(pitch, duration, time);
    }

    fn cancel_scheduled(&mut self) {
        self.stop_note();
    }
}
