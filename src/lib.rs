/// SQNC Steps - a transport-synchronized step sequencer library
///
/// This library provides the core components for building step sequencers:
/// - Step table with per-step on/off and pitch
/// - Look-ahead transport with tempo and subdivisions
/// - Step player state machine (stopped / running / paused)
/// - Audio output through a cpal synth voice
/// - MIDI output through midir, usable alongside audio

pub mod audio;
pub mod config;
pub mod error;
pub mod midi;
pub mod sequencer;
pub mod tone;

// Re-export commonly used types
pub use audio::{AudioClock, AudioOutput};
pub use config::Config;
pub use error::{Error, Result};
pub use midi::{midi_note_name, MidiOutputDevice};
pub use sequencer::playback::{PlaybackEvent, PlayerState, StepEvent};
pub use sequencer::{Pitch, Sequencer, Step, StepTable, Subdivision, Tempo};
pub use tone::{Clock, Layered, SystemClock, ToneGenerator};
