/// Transport - tempo, subdivisions and the look-ahead tick clock
///
/// Times passed in and out are "context" seconds: whatever clock the host
/// drives the transport with (usually the audio clock). The transport keeps
/// its own running position that only advances while started.
use std::fmt;
use std::str::FromStr;

use crate::error::{Error, Result};

/// Fastest tempo the transport accepts.
pub const MAX_BPM: f64 = 960.0;
pub const DEFAULT_BPM: f64 = 120.0;

/// Tolerance when comparing scheduled positions against a horizon.
const EPSILON: f64 = 1e-9;

#[derive(Debug, Clone, Copy, PartialEq, PartialOrd)]
pub struct Tempo(f64);

impl Tempo {
    pub fn new(bpm: f64) -> Result<Self> {
        if bpm.is_finite() && bpm > 0.0 && bpm <= MAX_BPM {
            Ok(Self(bpm))
        } else {
            Err(Error::InvalidTempo { bpm, max: MAX_BPM })
        }
    }

    pub fn bpm(&self) -> f64 {
        self.0
    }

    pub fn seconds_per_beat(&self) -> f64 {
        60.0 / self.0
    }
}

impl Default for Tempo {
    fn default() -> Self {
        Self(DEFAULT_BPM)
    }
}

/// Musical time between ticks, in note values. The beat is a quarter note.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Subdivision {
    Whole,
    Half,
    #[default]
    Quarter,
    Eighth,
    Sixteenth,
    ThirtySecond,
}

impl Subdivision {
    pub const ALL: [Subdivision; 6] = [
        Subdivision::Whole,
        Subdivision::Half,
        Subdivision::Quarter,
        Subdivision::Eighth,
        Subdivision::Sixteenth,
        Subdivision::ThirtySecond,
    ];

    pub fn beats(&self) -> f64 {
        match self {
            Subdivision::Whole => 4.0,
            Subdivision::Half => 2.0,
            Subdivision::Quarter => 1.0,
            Subdivision::Eighth => 0.5,
            Subdivision::Sixteenth => 0.25,
            Subdivision::ThirtySecond => 0.125,
        }
    }

    pub fn duration_secs(&self, tempo: Tempo) -> f64 {
        self.beats() * tempo.seconds_per_beat()
    }

    fn notation(&self) -> &'static str {
        match self {
            Subdivision::Whole => "1n",
            Subdivision::Half => "2n",
            Subdivision::Quarter => "4n",
            Subdivision::Eighth => "8n",
            Subdivision::Sixteenth => "16n",
            Subdivision::ThirtySecond => "32n",
        }
    }
}

impl fmt::Display for Subdivision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.notation())
    }
}

impl FromStr for Subdivision {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let wanted = s.trim();
        Self::ALL
            .into_iter()
            .find(|sub| sub.notation() == wanted)
            .ok_or_else(|| Error::InvalidSubdivision(s.to_string()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportState {
    Stopped,
    Started,
    Paused,
}

/// Handle for a repeating tick registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RepeatId(u64);

/// One firing of a repeat.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Tick {
    pub repeat: RepeatId,
    /// Context time the tick is scheduled for
    pub time: f64,
    /// Transport position of the tick, in seconds of running time
    pub position: f64,
}

#[derive(Debug)]
struct Repeat {
    id: RepeatId,
    subdivision: Subdivision,
    start: f64,
    /// Position of the most recently dispatched tick
    last: Option<f64>,
    next: f64,
}

#[derive(Debug)]
pub struct Transport {
    tempo: Tempo,
    state: TransportState,
    /// Position at `anchor`
    position: f64,
    /// Context time at which `position` was last pinned
    anchor: f64,
    last_fired: Option<f64>,
    repeats: Vec<Repeat>,
    next_id: u64,
}

impl Transport {
    pub fn new(tempo: Tempo) -> Self {
        Self {
            tempo,
            state: TransportState::Stopped,
            position: 0.0,
            anchor: 0.0,
            last_fired: None,
            repeats: Vec::new(),
            next_id: 0,
        }
    }

    pub fn tempo(&self) -> Tempo {
        self.tempo
    }

    /// Applies from the next tick boundary at or after `now`. An interval the
    /// transport is already inside keeps its length; one that opens at a tick
    /// dispatched ahead of `now` is recomputed with the new tempo.
    pub fn set_tempo(&mut self, tempo: Tempo, now: f64) {
        self.tempo = tempo;
        let at = self.position_at(now);
        for repeat in &mut self.repeats {
            if let Some(last) = repeat.last.filter(|last| *last + EPSILON >= at) {
                repeat.next = last + repeat.subdivision.duration_secs(tempo);
            }
        }
    }

    pub fn state(&self) -> TransportState {
        self.state
    }

    pub fn position_at(&self, now: f64) -> f64 {
        match self.state {
            TransportState::Started => self.position + (now - self.anchor).max(0.0),
            _ => self.position,
        }
    }

    pub fn start(&mut self, now: f64) {
        if self.state == TransportState::Started {
            return;
        }
        self.anchor = now;
        self.state = TransportState::Started;
    }

    /// Pauses at `now`, or at the last dispatched tick if that lies later.
    pub fn pause(&mut self, now: f64) {
        if self.state != TransportState::Started {
            return;
        }
        let at = self.position_at(now);
        self.position = self.last_fired.map_or(at, |fired| fired.max(at));
        self.state = TransportState::Paused;
    }

    pub fn stop(&mut self, now: f64) {
        self.state = TransportState::Stopped;
        self.position = 0.0;
        self.anchor = now;
        self.last_fired = None;
        for repeat in &mut self.repeats {
            repeat.last = None;
            repeat.next = repeat.start;
        }
    }

    /// Registers a callback slot that fires every `subdivision`, starting at
    /// transport position `start`.
    pub fn schedule_repeat(&mut self, subdivision: Subdivision, start: f64) -> RepeatId {
        let id = RepeatId(self.next_id);
        self.next_id += 1;
        self.repeats.push(Repeat {
            id,
            subdivision,
            start,
            last: None,
            next: start,
        });
        id
    }

    pub fn clear(&mut self, id: RepeatId) -> bool {
        let before = self.repeats.len();
        self.repeats.retain(|repeat| repeat.id != id);
        before != self.repeats.len()
    }

    pub fn is_scheduled(&self, id: RepeatId) -> bool {
        self.repeats.iter().any(|repeat| repeat.id == id)
    }

    /// Every tick scheduled at or before `horizon`, in time order. The interval
    /// following a tick is computed with the tempo in effect when it is
    /// dispatched, and revised by `set_tempo` until the tick is reached.
    pub fn poll(&mut self, horizon: f64) -> Vec<Tick> {
        let mut ticks = Vec::new();
        if self.state != TransportState::Started {
            return ticks;
        }

        let limit = self.position + (horizon - self.anchor) + EPSILON;
        loop {
            let due = self
                .repeats
                .iter_mut()
                .filter(|repeat| repeat.next <= limit)
                .min_by(|a, b| a.next.total_cmp(&b.next));
            let Some(repeat) = due else {
                break;
            };

            let position = repeat.next;
            repeat.last = Some(position);
            repeat.next += repeat.subdivision.duration_secs(self.tempo);
            ticks.push(Tick {
                repeat: repeat.id,
                time: self.anchor + (position - self.position),
                position,
            });
            self.last_fired = Some(position);
        }
        ticks
    }
}

impl Default for Transport {
    fn default() -> Self {
        Self::new(Tempo::default())
    }
}
