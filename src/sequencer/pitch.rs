/// Musical pitch of a step: a MIDI note or a raw frequency
use std::fmt;
use std::str::FromStr;

use crate::error::{Error, Result};
use crate::midi::{midi_note_name, midi_note_to_frequency};

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Pitch {
    /// MIDI note number, C4 = 60
    Note(u8),
    /// Frequency in Hz
    Frequency(f32),
}

impl Pitch {
    pub fn frequency(&self) -> f32 {
        match *self {
            Pitch::Note(note) => midi_note_to_frequency(note),
            Pitch::Frequency(hz) => hz,
        }
    }

    /// Nearest MIDI note, for outputs that only speak notes.
    pub fn midi_note(&self) -> u8 {
        match *self {
            Pitch::Note(note) => note,
            Pitch::Frequency(hz) => {
                let note = 69.0 + 12.0 * (hz / 440.0).log2();
                note.round().clamp(0.0, 127.0) as u8
            }
        }
    }
}

impl Default for Pitch {
    fn default() -> Self {
        Pitch::Note(60)
    }
}

impl fmt::Display for Pitch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Pitch::Note(note) => f.write_str(&midi_note_name(note)),
            Pitch::Frequency(hz) => write!(f, "{}Hz", hz),
        }
    }
}

impl FromStr for Pitch {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let trimmed = s.trim();
        let invalid = || Error::InvalidPitch(s.to_string());

        let lower = trimmed.to_ascii_lowercase();
        let numeric = lower.strip_suffix("hz").map(str::trim).or_else(|| {
            lower
                .starts_with(|c: char| c.is_ascii_digit() || c == '.')
                .then_some(lower.as_str())
        });

        if let Some(number) = numeric {
            let hz: f32 = number.parse().map_err(|_| invalid())?;
            if !hz.is_finite() || hz <= 0.0 {
                return Err(invalid());
            }
            return Ok(Pitch::Frequency(hz));
        }

        parse_note_name(trimmed).map(Pitch::Note).ok_or_else(invalid)
    }
}

/// Scientific pitch notation: letter, optional `#` or `b`, octave (C4 = 60).
fn parse_note_name(s: &str) -> Option<u8> {
    let mut chars = s.chars();
    let semitone: i32 = match chars.next()?.to_ascii_uppercase() {
        'C' => 0,
        'D' => 2,
        'E' => 4,
        'F' => 5,
        'G' => 7,
        'A' => 9,
        'B' => 11,
        _ => return None,
    };

    let rest = chars.as_str();
    let (accidental, octave) = if let Some(octave) = rest.strip_prefix('#') {
        (1, octave)
    } else if let Some(octave) = rest.strip_prefix('b') {
        (-1, octave)
    } else {
        (0, rest)
    };

    let octave: i32 = octave.parse().ok()?;
    let note = (octave + 1) * 12 + semitone + accidental;
    u8::try_from(note).ok().filter(|n| *n <= 127)
}

#[cfg(test)]
mod tests {
    use super::*;
    use float_cmp::approx_eq;

    #[test]
    fn test_parse_note_names() {
        assert_eq!("C4".parse::<Pitch>().unwrap(), Pitch::Note(60));
        assert_eq!("E4".parse::<Pitch>().unwrap(), Pitch::Note(64));
        assert_eq!("C#4".parse::<Pitch>().unwrap(), Pitch::Note(61));
        assert_eq!("Db4".parse::<Pitch>().unwrap(), Pitch::Note(61));
        assert_eq!("bb3".parse::<Pitch>().unwrap(), Pitch::Note(58));
        assert_eq!("C-1".parse::<Pitch>().unwrap(), Pitch::Note(0));
        assert_eq!("G9".parse::<Pitch>().unwrap(), Pitch::Note(127));
    }

    #[test]
    fn test_parse_frequencies() {
        assert_eq!("440".parse::<Pitch>().unwrap(), Pitch::Frequency(440.0));
        assert_eq!("261.5Hz".parse::<Pitch>().unwrap(), Pitch::Frequency(261.5));
        assert_eq!(" 110 hz ".parse::<Pitch>().unwrap(), Pitch::Frequency(110.0));
    }

    #[test]
    fn test_rejects_garbage() {
        for bad in ["", "H4", "C", "G#9", "Cb-1", "0hz", "-3hz", "4x"] {
            let err = bad.parse::<Pitch>().unwrap_err();
            assert!(err.is_invalid_argument(), "{bad:?} should be rejected");
        }
    }

    #[test]
    fn test_frequency_and_display() {
        assert!(approx_eq!(f32, Pitch::Note(69).frequency(), 440.0, ulps = 2));
        assert_eq!(Pitch::Frequency(440.0).midi_note(), 69);
        assert_eq!(Pitch::Frequency(262.0).midi_note(), 60);
        assert_eq!(Pitch::Note(72).to_string(), "C5");
        assert_eq!(Pitch::Frequency(440.0).to_string(), "440Hz");
    }
}
