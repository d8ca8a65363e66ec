/// Playback engine - step player state machine and time-aligned UI events
use std::collections::VecDeque;

use super::transport::{RepeatId, Subdivision, Tick, Transport};
use super::StepTable;
use crate::tone::ToneGenerator;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlayerState {
    Stopped,
    Running,
    Paused,
}

/// What happened on one tick.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StepEvent {
    /// Step that was just played
    pub step: usize,
    /// Cursor after the tick
    pub next: usize,
    /// Whether the step sounded
    pub active: bool,
    /// Scheduled context time of the tick
    pub time: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub enum PlaybackEvent {
    StepAdvanced(StepEvent),
    Stopped,
}

pub struct StepPlayer {
    state: PlayerState,
    cursor: Option<usize>,
    repeat: Option<RepeatId>,
    subdivision: Subdivision,
}

impl StepPlayer {
    pub fn new(subdivision: Subdivision) -> Self {
        Self {
            state: PlayerState::Stopped,
            cursor: None,
            repeat: None,
            subdivision,
        }
    }

    pub fn state(&self) -> PlayerState {
        self.state
    }

    /// Next step to play, `None` while stopped.
    pub fn cursor(&self) -> Option<usize> {
        self.cursor
    }

    pub fn subdivision(&self) -> Subdivision {
        self.subdivision
    }

    /// Starts from step 0 when stopped, resumes from the retained cursor when
    /// paused. Returns false if already running.
    pub fn play(&mut self, transport: &mut Transport, now: f64) -> bool {
        match self.state {
            PlayerState::Running => return false,
            PlayerState::Stopped => {
                transport.stop(now);
                self.cursor = Some(0);
                self.repeat = Some(transport.schedule_repeat(self.subdivision, 0.0));
                log::debug!("player: stopped -> running at {now:.3}");
            }
            PlayerState::Paused => {
                log::debug!("player: resuming at step {:?}", self.cursor);
            }
        }
        transport.start(now);
        self.state = PlayerState::Running;
        true
    }

    pub fn pause(&mut self, transport: &mut Transport, now: f64) -> bool {
        if self.state != PlayerState::Running {
            return false;
        }
        transport.pause(now);
        self.state = PlayerState::Paused;
        log::debug!("player: paused at step {:?}", self.cursor);
        true
    }

    /// Unregisters the tick repeat so nothing fires after this returns.
    pub fn stop(&mut self, transport: &mut Transport, now: f64) -> bool {
        if self.state == PlayerState::Stopped {
            return false;
        }
        if let Some(repeat) = self.repeat.take() {
            transport.clear(repeat);
        }
        transport.stop(now);
        self.cursor = None;
        self.state = PlayerState::Stopped;
        log::debug!("player: stopped");
        true
    }

    /// Plays the step under the cursor and advances it. Ticks from other
    /// repeats, ticks while not running, and ticks with no tone generator are
    /// skipped.
    pub fn on_tick(
        &mut self,
        tick: &Tick,
        steps: &StepTable,
        tone: Option<&mut (dyn ToneGenerator + 'static)>,
        note_length: f64,
    ) -> Option<StepEvent> {
        if self.state != PlayerState::Running || self.repeat != Some(tick.repeat) {
            return None;
        }
        let tone = tone?;
        let index = self.cursor?;
        let step = steps.get(index)?;

        if step.active {
            tone.trigger_attack_release(step.pitch, note_length, tick.time);
        }
        let next = (index + 1) % steps.len();
        self.cursor = Some(next);
        log::trace!("tick at {:.3}: step {index} active={}", tick.time, step.active);

        Some(StepEvent {
            step: index,
            next,
            active: step.active,
            time: tick.time,
        })
    }
}

impl Default for StepPlayer {
    fn default() -> Self {
        Self::new(Subdivision::Quarter)
    }
}

/// Most notifications a `DrawQueue` holds. Past this the oldest are dropped.
pub const MAX_PENDING_EVENTS: usize = 256;

/// Holds UI notifications until the clock reaches their scheduled time, so
/// highlights line up with what is heard rather than with the look-ahead.
///
/// Hosts are expected to drain it regularly with `drain_due`; a host that
/// never does loses the oldest notifications once `MAX_PENDING_EVENTS` are
/// waiting.
#[derive(Debug, Default)]
pub struct DrawQueue {
    pending: VecDeque<(f64, PlaybackEvent)>,
}

impl DrawQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn schedule(&mut self, time: f64, event: PlaybackEvent) {
        let at = self
            .pending
            .iter()
            .position(|(pending, _)| *pending > time)
            .unwrap_or(self.pending.len());
        self.pending.insert(at, (time, event));
        while self.pending.len() > MAX_PENDING_EVENTS {
            if let Some((dropped, _)) = self.pending.pop_front() {
                log::debug!("draw queue full, dropping event at {dropped:.3}");
            }
        }
    }

    pub fn drain_due(&mut self, now: f64) -> Vec<PlaybackEvent> {
        let mut due = Vec::new();
        while let Some((time, _)) = self.pending.front() {
            if *time > now {
                break;
            }
            if let Some((_, event)) = self.pending.pop_front() {
                due.push(event);
            }
        }
        due
    }

    pub fn clear(&mut self) {
        self.pending.clear();
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}
