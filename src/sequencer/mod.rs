/// Core sequencer logic - step table, transport and the playback session
/// This is pattern-length agnostic and can work with any number of steps
pub mod pitch;
pub mod playback;
pub mod transport;

pub use pitch::Pitch;
pub use playback::{DrawQueue, PlaybackEvent, PlayerState, StepEvent, StepPlayer};
pub use transport::{Subdivision, Tempo, Tick, Transport, TransportState};

use crate::config::Config;
use crate::error::{Error, Result};
use crate::tone::ToneGenerator;

/// Default look-ahead when scheduling ticks ahead of the clock.
pub const DEFAULT_LOOKAHEAD: f64 = 0.1;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Step {
    pub active: bool,
    pub pitch: Pitch,
}

impl Step {
    pub fn new(active: bool, pitch: Pitch) -> Self {
        Self { active, pitch }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct StepTable {
    steps: Vec<Step>,
}

impl StepTable {
    pub fn new(steps: Vec<Step>) -> Result<Self> {
        if steps.is_empty() {
            return Err(Error::EmptyPattern);
        }
        Ok(Self { steps })
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Step> {
        self.steps.get(index)
    }

    pub fn step(&self, index: usize) -> Result<&Step> {
        self.steps.get(index).ok_or(Error::StepOutOfRange {
            index,
            len: self.steps.len(),
        })
    }

    pub fn iter(&self) -> impl Iterator<Item = &Step> {
        self.steps.iter()
    }

    fn step_mut(&mut self, index: usize) -> Result<&mut Step> {
        let len = self.steps.len();
        self.steps
            .get_mut(index)
            .ok_or(Error::StepOutOfRange { index, len })
    }

    /// Flips the step's active flag and returns the new value.
    pub fn toggle_step(&mut self, index: usize) -> Result<bool> {
        let step = self.step_mut(index)?;
        step.active = !step.active;
        Ok(step.active)
    }

    pub fn set_active(&mut self, index: usize, active: bool) -> Result<()> {
        self.step_mut(index)?.active = active;
        Ok(())
    }

    /// Only triggers after this call hear the new pitch.
    pub fn set_pitch(&mut self, index: usize, pitch: Pitch) -> Result<()> {
        self.step_mut(index)?.pitch = pitch;
        Ok(())
    }

    pub fn clear(&mut self) {
        for step in &mut self.steps {
            step.active = false;
        }
    }

    pub fn fill(&mut self) {
        for step in &mut self.steps {
            step.active = true;
        }
    }
}

impl Default for StepTable {
    /// C major arpeggio, every step on.
    fn default() -> Self {
        Self {
            steps: [60, 64, 67, 72]
                .into_iter()
                .map(|note| Step::new(true, Pitch::Note(note)))
                .collect(),
        }
    }
}

/// One playback session: owns the pattern, the transport, the player and
/// whatever is making sound. Hosts drive it with their clock's `now`.
pub struct Sequencer {
    steps: StepTable,
    transport: Transport,
    player: StepPlayer,
    tone: Option<Box<dyn ToneGenerator>>,
    draw: DrawQueue,
    note_length: Subdivision,
    lookahead: f64,
}

impl Sequencer {
    pub fn new(steps: StepTable, tempo: Tempo, subdivision: Subdivision) -> Self {
        Self {
            steps,
            transport: Transport::new(tempo),
            player: StepPlayer::new(subdivision),
            tone: None,
            draw: DrawQueue::new(),
            note_length: Subdivision::Eighth,
            lookahead: DEFAULT_LOOKAHEAD,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        let mut sequencer = Self::new(config.steps(), config.tempo(), config.subdivision());
        sequencer.note_length = config.note_length();
        sequencer.lookahead = config.lookahead();
        sequencer
    }

    pub fn steps(&self) -> &StepTable {
        &self.steps
    }

    pub fn steps_mut(&mut self) -> &mut StepTable {
        &mut self.steps
    }

    pub fn toggle_step(&mut self, index: usize) -> Result<bool> {
        let active = self.steps.toggle_step(index)?;
        log::debug!("step {}: {}", index + 1, if active { "ON" } else { "OFF" });
        Ok(active)
    }

    pub fn set_pitch(&mut self, index: usize, pitch: Pitch) -> Result<()> {
        self.steps.set_pitch(index, pitch)?;
        log::debug!("step {} note: {pitch}", index + 1);
        Ok(())
    }

    pub fn bpm(&self) -> f64 {
        self.transport.tempo().bpm()
    }

    /// Rejects non-positive tempos and keeps the previous one. Otherwise the
    /// new tempo applies from the next tick boundary after `now`, including
    /// ticks the look-ahead has already dispatched.
    pub fn set_tempo(&mut self, bpm: f64, now: f64) -> Result<()> {
        let tempo = Tempo::new(bpm)?;
        self.transport.set_tempo(tempo, now);
        log::debug!("BPM: {bpm}");
        Ok(())
    }

    pub fn note_length(&self) -> Subdivision {
        self.note_length
    }

    pub fn set_note_length(&mut self, note_length: Subdivision) {
        self.note_length = note_length;
    }

    pub fn lookahead(&self) -> f64 {
        self.lookahead
    }

    pub fn set_lookahead(&mut self, seconds: f64) {
        self.lookahead = seconds.max(0.0);
    }

    pub fn attach_tone_generator(&mut self, tone: Box<dyn ToneGenerator>) {
        self.tone = Some(tone);
    }

    pub fn detach_tone_generator(&mut self) -> Option<Box<dyn ToneGenerator>> {
        self.tone.take()
    }

    pub fn has_tone_generator(&self) -> bool {
        self.tone.is_some()
    }

    pub fn state(&self) -> PlayerState {
        self.player.state()
    }

    pub fn is_playing(&self) -> bool {
        self.player.state() == PlayerState::Running
    }

    pub fn cursor(&self) -> Option<usize> {
        self.player.cursor()
    }

    pub fn play(&mut self, now: f64) -> bool {
        self.player.play(&mut self.transport, now)
    }

    pub fn pause(&mut self, now: f64) -> bool {
        self.player.pause(&mut self.transport, now)
    }

    /// After this returns no tick fires and no pending highlight is delivered.
    pub fn stop(&mut self, now: f64) -> bool {
        if !self.player.stop(&mut self.transport, now) {
            return false;
        }
        self.draw.clear();
        self.draw.schedule(now, PlaybackEvent::Stopped);
        if let Some(tone) = self.tone.as_mut() {
            tone.cancel_scheduled();
        }
        true
    }

    /// Play/pause button behavior.
    pub fn toggle_play(&mut self, now: f64) {
        if self.is_playing() {
            self.pause(now);
        } else {
            self.play(now);
        }
    }

    /// Dispatches every tick due before `now + lookahead` to the player and
    /// the draw queue. Returns how many steps were played. Hosts should
    /// follow each call with `poll_events`; undrained notifications are
    /// capped and the oldest dropped.
    pub fn run_until(&mut self, now: f64) -> usize {
        let ticks = self.transport.poll(now + self.lookahead);
        let note_length = self.note_length.duration_secs(self.transport.tempo());

        let mut played = 0;
        for tick in &ticks {
            let event =
                self.player
                    .on_tick(tick, &self.steps, self.tone.as_deref_mut(), note_length);
            if let Some(event) = event {
                self.draw
                    .schedule(event.time, PlaybackEvent::StepAdvanced(event));
                played += 1;
            }
        }
        if let Some(tone) = self.tone.as_mut() {
            tone.service(now);
        }
        played
    }

    /// UI notifications whose scheduled time has been reached.
    pub fn poll_events(&mut self, now: f64) -> Vec<PlaybackEvent> {
        self.draw.drain_due(now)
    }
}

impl Default for Sequencer {
    fn default() -> Self {
        Self::new(StepTable::default(), Tempo::default(), Subdivision::Quarter)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use float_cmp::approx_eq;
    use std::cell::RefCell;
    use std::rc::Rc;

    type Notes = Rc<RefCell<Vec<(Pitch, f64, f64)>>>;

    struct Recorder {
        notes: Notes,
        cancelled: Rc<RefCell<usize>>,
    }

    impl ToneGenerator for Recorder {
        fn trigger_attack_release(&mut self, pitch: Pitch, duration: f64, time: f64) {
            self.notes.borrow_mut().push((pitch, duration, time));
        }

        fn cancel_scheduled(&mut self) {
            *self.cancelled.borrow_mut() += 1;
        }
    }

    fn scenario_steps() -> StepTable {
        StepTable::new(vec![
            Step::new(true, "C4".parse().unwrap()),
            Step::new(true, "E4".parse().unwrap()),
            Step::new(false, "G4".parse().unwrap()),
            Step::new(true, "C5".parse().unwrap()),
        ])
        .unwrap()
    }

    fn sequencer_with_recorder(steps: StepTable) -> (Sequencer, Notes, Rc<RefCell<usize>>) {
        let notes = Notes::default();
        let cancelled = Rc::new(RefCell::new(0));
        let mut sequencer = Sequencer::new(steps, Tempo::default(), Subdivision::Quarter);
        sequencer.set_lookahead(0.0);
        sequencer.attach_tone_generator(Box::new(Recorder {
            notes: Rc::clone(&notes),
            cancelled: Rc::clone(&cancelled),
        }));
        (sequencer, notes, cancelled)
    }

    fn step_events(events: &[PlaybackEvent]) -> Vec<usize> {
        events
            .iter()
            .filter_map(|event| match event {
                PlaybackEvent::StepAdvanced(step) => Some(step.step),
                PlaybackEvent::Stopped => None,
            })
            .collect()
    }

    #[test]
    fn test_step_table_toggle() {
        let mut table = StepTable::default();
        assert_eq!(table.len(), 4);
        assert!(!table.toggle_step(2).unwrap());
        assert!(!table.get(2).unwrap().active);
        assert!(table.iter().enumerate().all(|(i, s)| i == 2 || s.active));
        assert!(table.toggle_step(2).unwrap());
        table.set_active(0, false).unwrap();
        assert!(!table.step(0).unwrap().active);
        assert!(table.set_active(4, true).is_err());
    }

    #[test]
    fn test_step_table_bounds() {
        let mut table = StepTable::default();
        let err = table.toggle_step(4).unwrap_err();
        assert!(matches!(err, Error::StepOutOfRange { index: 4, len: 4 }));
        assert!(table.set_pitch(9, Pitch::Note(1)).is_err());
        assert!(table.step(4).is_err());
        assert_eq!(table, StepTable::default());
        assert!(matches!(StepTable::new(vec![]), Err(Error::EmptyPattern)));
    }

    #[test]
    fn test_clear_and_fill() {
        let mut table = StepTable::default();
        table.clear();
        assert!(table.iter().all(|s| !s.active));
        table.fill();
        assert!(table.iter().all(|s| s.active));
    }

    #[test]
    fn test_concrete_scenario() {
        let (mut sequencer, notes, _) = sequencer_with_recorder(scenario_steps());
        sequencer.play(0.0);
        assert_eq!(sequencer.run_until(2.0), 5);

        let c4 = Pitch::Note(60);
        let e4 = Pitch::Note(64);
        let c5 = Pitch::Note(72);
        assert_eq!(
            *notes.borrow(),
            vec![
                (c4, 0.25, 0.0),
                (e4, 0.25, 0.5),
                (c5, 0.25, 1.5),
                (c4, 0.25, 2.0),
            ]
        );
        assert_eq!(sequencer.cursor(), Some(1));
    }

    #[test]
    fn test_cursor_is_tick_count_mod_len() {
        let (mut sequencer, _, _) = sequencer_with_recorder(scenario_steps());
        sequencer.play(0.0);
        for k in 1..=11usize {
            sequencer.run_until((k - 1) as f64 * 0.5);
            assert_eq!(sequencer.cursor(), Some(k % 4));
        }
    }

    #[test]
    fn test_toggle_between_ticks_affects_only_that_step() {
        let (mut sequencer, notes, _) = sequencer_with_recorder(scenario_steps());
        sequencer.play(0.0);
        sequencer.run_until(0.0);
        sequencer.toggle_step(2).unwrap();
        sequencer.set_pitch(1, Pitch::Note(65)).unwrap();
        sequencer.run_until(1.5);

        let times: Vec<_> = notes.borrow().iter().map(|n| (n.0, n.2)).collect();
        assert_eq!(
            times,
            vec![
                (Pitch::Note(60), 0.0),
                (Pitch::Note(65), 0.5),
                (Pitch::Note(67), 1.0),
                (Pitch::Note(72), 1.5),
            ]
        );
    }

    #[test]
    fn test_stop_resets_and_silences() {
        let (mut sequencer, notes, cancelled) = sequencer_with_recorder(scenario_steps());
        sequencer.play(0.0);
        sequencer.run_until(0.5);
        assert!(sequencer.stop(0.6));
        assert_eq!(sequencer.cursor(), None);
        assert_eq!(sequencer.state(), PlayerState::Stopped);
        assert_eq!(*cancelled.borrow(), 1);

        let heard = notes.borrow().len();
        assert_eq!(sequencer.run_until(10.0), 0);
        assert_eq!(notes.borrow().len(), heard);
        assert_eq!(sequencer.poll_events(10.0), vec![PlaybackEvent::Stopped]);
    }

    #[test]
    fn test_stop_drops_pending_highlights() {
        let (mut sequencer, _, _) = sequencer_with_recorder(scenario_steps());
        sequencer.set_lookahead(0.1);
        sequencer.play(0.0);
        sequencer.run_until(0.45);
        sequencer.stop(0.46);
        // The 0.5 tick was dispatched ahead but must not be drawn.
        assert_eq!(sequencer.poll_events(1.0), vec![PlaybackEvent::Stopped]);
    }

    #[test]
    fn test_pause_resume_keeps_cursor() {
        let (mut sequencer, notes, _) = sequencer_with_recorder(scenario_steps());
        sequencer.play(0.0);
        sequencer.run_until(0.5);
        assert_eq!(sequencer.cursor(), Some(2));

        assert!(sequencer.pause(0.7));
        assert_eq!(sequencer.run_until(30.0), 0);
        assert_eq!(sequencer.cursor(), Some(2));

        assert!(sequencer.play(40.0));
        assert_eq!(sequencer.state(), PlayerState::Running);
        sequencer.run_until(40.8);
        assert_eq!(sequencer.cursor(), Some(0));
        let last = *notes.borrow().last().unwrap();
        assert_eq!(last.0, Pitch::Note(72));
        assert!(approx_eq!(f64, last.2, 40.8, epsilon = 1e-9));
    }

    #[test]
    fn test_play_after_stop_starts_from_zero() {
        let (mut sequencer, notes, _) = sequencer_with_recorder(scenario_steps());
        sequencer.play(0.0);
        sequencer.run_until(1.0);
        sequencer.stop(1.2);
        sequencer.play(5.0);
        assert_eq!(sequencer.cursor(), Some(0));
        sequencer.run_until(5.0);
        assert_eq!(*notes.borrow().last().unwrap(), (Pitch::Note(60), 0.25, 5.0));
    }

    #[test]
    fn test_tempo_change_mid_playback() {
        let (mut sequencer, notes, _) = sequencer_with_recorder(scenario_steps());
        sequencer.steps_mut().fill();
        sequencer.play(0.0);
        sequencer.run_until(0.2);
        sequencer.set_tempo(240.0, 0.2).unwrap();
        sequencer.run_until(1.0);

        let times: Vec<_> = notes.borrow().iter().map(|n| n.2).collect();
        assert_eq!(times, vec![0.0, 0.5, 0.75, 1.0]);
        // Eighth notes at 240 BPM.
        assert!(approx_eq!(f64, notes.borrow()[1].1, 0.125));
    }

    #[test]
    fn test_tempo_change_inside_lookahead_window() {
        let (mut sequencer, notes, _) = sequencer_with_recorder(scenario_steps());
        sequencer.steps_mut().fill();
        sequencer.set_lookahead(DEFAULT_LOOKAHEAD);
        sequencer.play(0.0);
        // The 0.5 tick is handed out at 0.45, before the tempo changes.
        sequencer.run_until(0.45);
        sequencer.set_tempo(240.0, 0.46).unwrap();
        sequencer.run_until(1.2);

        let times: Vec<_> = notes.borrow().iter().map(|n| n.2).collect();
        assert_eq!(times, vec![0.0, 0.5, 0.75, 1.0, 1.25]);
    }

    #[test]
    fn test_host_that_never_drains_events_stays_bounded() {
        let (mut sequencer, _, _) = sequencer_with_recorder(scenario_steps());
        sequencer.play(0.0);
        // Ten minutes at 120 BPM without ever calling poll_events.
        for second in 1..=600 {
            sequencer.run_until(second as f64);
        }
        assert_eq!(sequencer.draw.len(), playback::MAX_PENDING_EVENTS);
        assert_eq!(sequencer.poll_events(600.0).len(), playback::MAX_PENDING_EVENTS);
    }

    #[test]
    fn test_invalid_tempo_keeps_previous() {
        let mut sequencer = Sequencer::default();
        for bad in [0.0, -120.0] {
            assert!(sequencer
                .set_tempo(bad, 0.0)
                .unwrap_err()
                .is_invalid_argument());
        }
        assert_eq!(sequencer.bpm(), 120.0);
    }

    #[test]
    fn test_no_tone_generator_is_silent() {
        let mut sequencer = Sequencer::default();
        sequencer.set_lookahead(0.0);
        sequencer.play(0.0);
        assert_eq!(sequencer.run_until(3.0), 0);
        assert_eq!(sequencer.cursor(), Some(0));
        assert!(sequencer.poll_events(3.0).is_empty());
    }

    #[test]
    fn test_highlights_wait_for_scheduled_time() {
        let (mut sequencer, _, _) = sequencer_with_recorder(scenario_steps());
        sequencer.set_lookahead(0.1);
        sequencer.play(0.0);
        sequencer.run_until(0.45);
        assert_eq!(step_events(&sequencer.poll_events(0.45)), vec![0]);
        assert_eq!(step_events(&sequencer.poll_events(0.5)), vec![1]);
    }

    #[test]
    fn test_toggle_play() {
        let mut sequencer = Sequencer::default();
        sequencer.toggle_play(0.0);
        assert!(sequencer.is_playing());
        sequencer.toggle_play(1.0);
        assert_eq!(sequencer.state(), PlayerState::Paused);
    }
}
