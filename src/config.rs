use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::audio::{Envelope, Voice, Waveform};
use crate::error::{Error, Result};
use crate::sequencer::{Pitch, Step, StepTable, Subdivision, Tempo, DEFAULT_LOOKAHEAD};

const DEFAULT_CONFIG: &str = include_str!("../config.toml");

#[derive(Debug, Deserialize, Default)]
struct ConfigFile {
    #[serde(default)]
    transport: TransportConfig,
    #[serde(default)]
    playback: PlaybackConfig,
    #[serde(default)]
    synth: SynthConfig,
    #[serde(default)]
    midi: MidiConfig,
    steps: Option<Vec<StepConfig>>,
}

#[derive(Debug, Deserialize, Default)]
struct TransportConfig {
    bpm: Option<f64>,
    subdivision: Option<String>,
    lookahead_ms: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
struct PlaybackConfig {
    note_length: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct SynthConfig {
    waveform: Option<String>,
    attack: Option<f64>,
    decay: Option<f64>,
    sustain: Option<f32>,
    release: Option<f64>,
    volume_db: Option<f32>,
}

#[derive(Debug, Deserialize, Default)]
struct MidiConfig {
    channel: Option<u8>,
    velocity: Option<u8>,
}

#[derive(Debug, Deserialize, Clone)]
struct StepConfig {
    #[serde(default = "default_active")]
    active: bool,
    pitch: String,
}

fn default_active() -> bool {
    true
}

#[derive(Debug)]
pub struct Config {
    file: ConfigFile,
}

impl Config {
    /// Built-in defaults merged with the user's config file, if any. A broken
    /// user file is logged and ignored.
    pub fn load() -> Self {
        let mut config = Self::defaults();
        if let Some(path) = user_config_path() {
            if path.exists() {
                match read_file(&path) {
                    Ok(user) => config.merge(user),
                    Err(e) => {
                        log::warn!(target: "config", "ignoring config {}: {}", path.display(), e)
                    }
                }
            }
        }
        config
    }

    /// Built-in defaults merged with the file at `path`.
    pub fn load_from(path: &Path) -> Result<Self> {
        let mut config = Self::defaults();
        config.merge(read_file(path)?);
        Ok(config)
    }

    /// Built-in defaults merged with `contents`.
    pub fn from_toml_str(contents: &str) -> Result<Self> {
        let mut config = Self::defaults();
        config.merge(parse(contents)?);
        Ok(config)
    }

    fn defaults() -> Self {
        let file = parse(DEFAULT_CONFIG).unwrap_or_else(|e| {
            log::error!(target: "config", "embedded config.toml: {}", e);
            ConfigFile::default()
        });
        Self { file }
    }

    fn merge(&mut self, user: ConfigFile) {
        let base = &mut self.file;
        merge_option(&mut base.transport.bpm, user.transport.bpm);
        merge_option(&mut base.transport.subdivision, user.transport.subdivision);
        merge_option(&mut base.transport.lookahead_ms, user.transport.lookahead_ms);
        merge_option(&mut base.playback.note_length, user.playback.note_length);
        merge_option(&mut base.synth.waveform, user.synth.waveform);
        merge_option(&mut base.synth.attack, user.synth.attack);
        merge_option(&mut base.synth.decay, user.synth.decay);
        merge_option(&mut base.synth.sustain, user.synth.sustain);
        merge_option(&mut base.synth.release, user.synth.release);
        merge_option(&mut base.synth.volume_db, user.synth.volume_db);
        merge_option(&mut base.midi.channel, user.midi.channel);
        merge_option(&mut base.midi.velocity, user.midi.velocity);
        merge_option(&mut base.steps, user.steps);
    }

    pub fn tempo(&self) -> Tempo {
        self.file
            .transport
            .bpm
            .and_then(|bpm| warn_invalid(Tempo::new(bpm)))
            .unwrap_or_default()
    }

    pub fn subdivision(&self) -> Subdivision {
        parse_field(self.file.transport.subdivision.as_deref()).unwrap_or_default()
    }

    pub fn note_length(&self) -> Subdivision {
        parse_field(self.file.playback.note_length.as_deref()).unwrap_or(Subdivision::Eighth)
    }

    /// Look-ahead in seconds.
    pub fn lookahead(&self) -> f64 {
        self.file
            .transport
            .lookahead_ms
            .map_or(DEFAULT_LOOKAHEAD, |ms| ms.min(1000) as f64 / 1000.0)
    }

    /// Configured pattern; unparseable pitches fall back to middle C and an
    /// empty list falls back to the built-in pattern.
    pub fn steps(&self) -> StepTable {
        let steps = self
            .file
            .steps
            .iter()
            .flatten()
            .map(|step| {
                let pitch = parse_field::<Pitch>(Some(step.pitch.as_str())).unwrap_or_default();
                Step::new(step.active, pitch)
            })
            .collect();
        warn_invalid(StepTable::new(steps)).unwrap_or_default()
    }

    pub fn waveform(&self) -> Waveform {
        parse_field(self.file.synth.waveform.as_deref()).unwrap_or_default()
    }

    pub fn envelope(&self) -> Envelope {
        let fallback = Envelope::default();
        let synth = &self.file.synth;
        Envelope {
            attack: synth.attack.map_or(fallback.attack, |t| t.clamp(0.001, 10.0)),
            decay: synth.decay.map_or(fallback.decay, |t| t.clamp(0.001, 10.0)),
            sustain: synth.sustain.map_or(fallback.sustain, |s| s.clamp(0.0, 1.0)),
            release: synth.release.map_or(fallback.release, |t| t.clamp(0.001, 10.0)),
        }
    }

    pub fn volume_db(&self) -> f32 {
        self.file.synth.volume_db.unwrap_or(-10.0).min(0.0)
    }

    pub fn voice(&self) -> Voice {
        Voice::new(self.waveform(), self.envelope(), self.volume_db())
    }

    pub fn midi_channel(&self) -> u8 {
        self.file.midi.channel.unwrap_or(0).min(15)
    }

    pub fn midi_velocity(&self) -> u8 {
        self.file.midi.velocity.unwrap_or(100).min(127)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::defaults()
    }
}

pub fn user_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("sqnc-steps").join("config.toml"))
}

fn parse(contents: &str) -> Result<ConfigFile> {
    toml::from_str(contents).map_err(|e| Error::Config(e.to_string()))
}

fn read_file(path: &Path) -> Result<ConfigFile> {
    let contents = std::fs::read_to_string(path)
        .map_err(|e| Error::Config(format!("could not read {}: {}", path.display(), e)))?;
    parse(&contents)
}

fn merge_option<T>(base: &mut Option<T>, user: Option<T>) {
    if user.is_some() {
        *base = user;
    }
}

fn parse_field<T>(value: Option<&str>) -> Option<T>
where
    T: std::str::FromStr<Err = Error>,
{
    value.and_then(|v| warn_invalid(v.parse()))
}

fn warn_invalid<T>(value: Result<T>) -> Option<T> {
    value
        .map_err(|e| log::warn!(target: "config", "using default: {}", e))
        .ok()
}
