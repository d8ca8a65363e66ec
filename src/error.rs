/// Errors surfaced by the sequencer library
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("tempo must be a finite BPM in (0, {max}], got {bpm}")]
    InvalidTempo { bpm: f64, max: f64 },

    #[error("step {index} is out of range for a {len}-step pattern")]
    StepOutOfRange { index: usize, len: usize },

    #[error("a step pattern needs at least one step")]
    EmptyPattern,

    #[error("cannot parse pitch {0:?}")]
    InvalidPitch(String),

    #[error("unknown subdivision {0:?} (expected 1n, 2n, 4n, 8n, 16n or 32n)")]
    InvalidSubdivision(String),

    #[error("unknown waveform {0:?}")]
    InvalidWaveform(String),

    #[error("config: {0}")]
    Config(String),

    #[error("audio device: {0}")]
    AudioDevice(String),

    #[error("MIDI: {0}")]
    Midi(String),
}

impl Error {
    /// Caller errors: bad arguments that no retry will fix.
    pub fn is_invalid_argument(&self) -> bool {
        matches!(
            self,
            Error::InvalidTempo { .. }
                | Error::StepOutOfRange { .. }
                | Error::EmptyPattern
                | Error::InvalidPitch(_)
                | Error::InvalidSubdivision(_)
                | Error::InvalidWaveform(_)
        )
    }
}
