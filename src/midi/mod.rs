/// MIDI output using midir
use midir::{MidiOutput, MidiOutputConnection};

use crate::error::{Error, Result};
use crate::sequencer::Pitch;
use crate::tone::ToneGenerator;

const CLIENT_NAME: &str = "SQNC Steps MIDI Output";

const NOTE_ON: u8 = 0x90;
const NOTE_OFF: u8 = 0x80;

/// A channel message due at a context time.
#[derive(Debug, Clone, Copy, PartialEq)]
struct TimedMessage {
    time: f64,
    bytes: [u8; 3],
}

pub struct MidiOutputDevice {
    connection: Option<MidiOutputConnection>,
    channel: u8,
    velocity: u8,
    pending: Vec<TimedMessage>,
    /// Notes whose note-on went out and whose note-off has not
    sounding: Vec<u8>,
}

impl MidiOutputDevice {
    pub fn new() -> Self {
        Self {
            connection: None,
            channel: 0,
            velocity: 100,
            pending: Vec::new(),
            sounding: Vec::new(),
        }
    }

    pub fn with_channel(mut self, channel: u8, velocity: u8) -> Self {
        self.channel = channel.min(15);
        self.velocity = velocity.min(127);
        self
    }

    pub fn available_ports() -> Vec<String> {
        match MidiOutput::new(CLIENT_NAME) {
            Ok(midi_out) => midi_out
                .ports()
                .iter()
                .filter_map(|p| midi_out.port_name(p).ok())
                .collect(),
            Err(e) => {
                log::warn!("MIDI unavailable: {}", e);
                vec![]
            }
        }
    }

    pub fn connect(&mut self, port_index: usize) -> Result<()> {
        let midi_out = MidiOutput::new(CLIENT_NAME)
            .map_err(|e| Error::Midi(format!("failed to create MIDI output: {}", e)))?;

        let ports = midi_out.ports();
        let port = ports
            .get(port_index)
            .ok_or_else(|| Error::Midi(format!("invalid port index {}", port_index)))?;
        let name = midi_out.port_name(port).unwrap_or_default();

        let connection = midi_out
            .connect(port, "sqnc-steps")
            .map_err(|e| Error::Midi(format!("failed to connect: {}", e)))?;

        log::info!("MIDI output connected to {:?}", name);
        self.connection = Some(connection);
        Ok(())
    }

    pub fn is_connected(&self) -> bool {
        self.connection.is_some()
    }

    pub fn send_note_on(&mut self, note: u8, velocity: u8) -> Result<()> {
        self.send([NOTE_ON | self.channel, note, velocity])
    }

    pub fn send_note_off(&mut self, note: u8) -> Result<()> {
        self.send([NOTE_OFF | self.channel, note, 0])
    }

    fn send(&mut self, bytes: [u8; 3]) -> Result<()> {
        if let Some(ref mut conn) = self.connection {
            conn.send(&bytes)
                .map_err(|e| Error::Midi(format!("failed to send {:02x?}: {}", bytes, e)))?;
        }
        Ok(())
    }

    fn queue(&mut self, time: f64, bytes: [u8; 3]) {
        let at = self
            .pending
            .iter()
            .position(|pending| pending.time > time)
            .unwrap_or(self.pending.len());
        self.pending.insert(at, TimedMessage { time, bytes });
    }

    /// Removes and returns every queued message due at `now`.
    fn take_due(&mut self, now: f64) -> Vec<[u8; 3]> {
        let due = self
            .pending
            .iter()
            .take_while(|message| message.time <= now)
            .count();
        self.pending.drain(..due).map(|m| m.bytes).collect()
    }

    /// Drops every queued message and returns the note-offs for notes that
    /// are already sounding. Notes that never started get nothing.
    fn cancel_messages(&mut self) -> Vec<[u8; 3]> {
        self.pending.clear();
        let channel = self.channel;
        self.sounding
            .drain(..)
            .map(|note| [NOTE_OFF | channel, note, 0])
            .collect()
    }

    fn track(&mut self, bytes: [u8; 3]) {
        let note = bytes[1];
        match bytes[0] & 0xF0 {
            NOTE_ON => self.sounding.push(note),
            NOTE_OFF => {
                if let Some(i) = self.sounding.iter().position(|n| *n == note) {
                    self.sounding.swap_remove(i);
                }
            }
            _ => {}
        }
    }

    pub fn disconnect(&mut self) {
        self.cancel_scheduled();
        if let Some(connection) = self.connection.take() {
            connection.close();
        }
    }
}

impl Default for MidiOutputDevice {
    fn default() -> Self {
        Self::new()
    }
}

impl ToneGenerator for MidiOutputDevice {
    /// MIDI can't be scheduled ahead, so messages wait for `service`.
    fn trigger_attack_release(&mut self, pitch: Pitch, duration: f64, time: f64) {
        let note = pitch.midi_note();
        self.queue(time, [NOTE_ON | self.channel, note, self.velocity]);
        self.queue(time + duration, [NOTE_OFF | self.channel, note, 0]);
    }

    fn service(&mut self, now: f64) {
        for bytes in self.take_due(now) {
            self.track(bytes);
            if let Err(e) = self.send(bytes) {
                log::warn!("{}", e);
            }
        }
    }

    fn cancel_scheduled(&mut self) {
        for bytes in self.cancel_messages() {
            if let Err(e) = self.send(bytes) {
                log::warn!("{}", e);
            }
        }
    }
}

pub fn midi_note_name(note: u8) -> String {
    let note_names = ["C", "C#", "D", "D#", "E", "F", "F#", "G", "G#", "A", "A#", "B"];
    let octave = (note / 12) as i32 - 1;
    let note_index = (note % 12) as usize;
    format!("{}{}", note_names[note_index], octave)
}

pub fn midi_note_to_frequency(note: u8) -> f32 {
    440.0 * 2.0_f32.powf((note as f32 - 69.0) / 12.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_note_names() {
        assert_eq!(midi_note_name(60), "C4");
        assert_eq!(midi_note_name(61), "C#4");
        assert_eq!(midi_note_name(0), "C-1");
        assert_eq!(midi_note_name(127), "G9");
    }

    #[test]
    fn test_messages_wait_for_their_time() {
        let mut device = MidiOutputDevice::new().with_channel(2, 90);
        device.trigger_attack_release(Pitch::Note(64), 0.25, 1.0);
        device.trigger_attack_release(Pitch::Note(60), 0.25, 0.5);

        assert!(device.take_due(0.4).is_empty());
        assert_eq!(device.take_due(0.75), vec![[0x92, 60, 90], [0x82, 60, 0]]);
        assert_eq!(device.take_due(2.0), vec![[0x92, 64, 90], [0x82, 64, 0]]);
    }

    #[test]
    fn test_cancel_drops_pending_and_service_without_port() {
        let mut device = MidiOutputDevice::new();
        device.trigger_attack_release(Pitch::Frequency(440.0), 0.25, 1.0);
        device.service(1.0);
        assert_eq!(device.pending.len(), 1);
        device.cancel_scheduled();
        assert!(device.pending.is_empty());
    }

    #[test]
    fn test_cancel_releases_only_sounding_notes() {
        let mut device = MidiOutputDevice::new().with_channel(1, 100);
        device.trigger_attack_release(Pitch::Note(64), 0.25, 1.0);
        device.service(1.0);
        // Queued by look-ahead but never started.
        device.trigger_attack_release(Pitch::Note(67), 0.25, 2.0);

        assert_eq!(device.cancel_messages(), vec![[0x81, 64, 0]]);
        assert!(device.pending.is_empty());
        assert!(device.cancel_messages().is_empty());
    }

    #[test]
    fn test_finished_notes_need_no_release() {
        let mut device = MidiOutputDevice::new();
        device.trigger_attack_release(Pitch::Note(60), 0.25, 0.0);
        device.service(0.5);
        device.trigger_attack_release(Pitch::Note(62), 0.25, 1.0);
        assert!(device.cancel_messages().is_empty());
    }
}
