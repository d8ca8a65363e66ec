#[cfg(feature = "gui")]
use eframe::egui;

#[cfg(feature = "gui")]
use sqnc_steps::{
    midi_note_name, AudioOutput, Clock, Config, Layered, MidiOutputDevice, Pitch, PlaybackEvent,
    PlayerState, Sequencer, SystemClock, ToneGenerator,
};
#[cfg(feature = "gui")]
use std::{cell::RefCell, rc::Rc};

/// Notes offered by the per-step selectors: C3 through C6.
#[cfg(feature = "gui")]
const NOTE_CHOICES: std::ops::RangeInclusive<u8> = 48..=84;

#[cfg(feature = "gui")]
fn main() -> Result<(), eframe::Error> {
    env_logger::init();
    log::info!("Starting SQNC Steps");

    let options = eframe::NativeOptions {
        viewport: egui::ViewportBuilder::default()
            .with_inner_size([640.0, 420.0])
            .with_title("SQNC Steps - 4-Step Sequencer"),
        ..Default::default()
    };

    eframe::run_native(
        "SQNC Steps",
        options,
        Box::new(|_cc| Ok(Box::new(SequencerApp::new(Config::load())))),
    )
}

#[cfg(not(feature = "gui"))]
fn main() {
    eprintln!("This binary requires the 'gui' feature to be enabled");
    std::process::exit(1);
}

/// Lets the UI keep the MIDI device (port selection) while the sequencer
/// plays through it.
#[cfg(feature = "gui")]
struct SharedMidi(Rc<RefCell<MidiOutputDevice>>);

#[cfg(feature = "gui")]
impl ToneGenerator for SharedMidi {
    fn trigger_attack_release(&mut self, pitch: Pitch, duration: f64, time: f64) {
        self.0
            .borrow_mut()
            .trigger_attack_release(pitch, duration, time);
    }

    fn service(&mut self, now: f64) {
        self.0.borrow_mut().service(now);
    }

    fn cancel_scheduled(&mut self) {
        self.0.borrow_mut().cancel_scheduled();
    }
}

#[cfg(feature = "gui")]
enum EngineStatus {
    Waiting,
    Ready,
    MidiOnly(String),
}

#[cfg(feature = "gui")]
struct SequencerApp {
    config: Config,
    sequencer: Sequencer,
    midi_output: Rc<RefCell<MidiOutputDevice>>,
    /// Set once the engine is started
    clock: Option<Box<dyn Clock>>,
    status: EngineStatus,

    // UI state
    available_midi_ports: Vec<String>,
    selected_port: Option<usize>,
    playing_step: Option<usize>,
}

#[cfg(feature = "gui")]
impl SequencerApp {
    fn new(config: Config) -> Self {
        let midi_output = MidiOutputDevice::new()
            .with_channel(config.midi_channel(), config.midi_velocity());

        Self {
            sequencer: Sequencer::from_config(&config),
            config,
            midi_output: Rc::new(RefCell::new(midi_output)),
            clock: None,
            status: EngineStatus::Waiting,
            available_midi_ports: MidiOutputDevice::available_ports(),
            selected_port: None,
            playing_step: None,
        }
    }

    fn now(&self) -> f64 {
        self.clock.as_ref().map_or(0.0, |clock| clock.now())
    }

    /// Opens the audio device and attaches the tone generators. Nothing sounds
    /// before this runs.
    fn start_engine(&mut self) {
        let mut layers = Layered::new();
        match AudioOutput::new(self.config.voice()) {
            Ok(output) => {
                self.clock = Some(Box::new(output.clock()));
                layers.push(Box::new(output));
                self.status = EngineStatus::Ready;
                log::info!("Audio engine ready");
            }
            Err(e) => {
                log::warn!("Audio output unavailable, MIDI only: {}", e);
                self.clock = Some(Box::new(SystemClock::new()));
                self.status = EngineStatus::MidiOnly(e.to_string());
            }
        }
        layers.push(Box::new(SharedMidi(Rc::clone(&self.midi_output))));
        self.sequencer.attach_tone_generator(Box::new(layers));
    }

    fn handle_playback_events(&mut self) {
        let now = self.now();
        self.sequencer.run_until(now);

        for event in self.sequencer.poll_events(now) {
            match event {
                PlaybackEvent::StepAdvanced(step) => {
                    self.playing_step = step.active.then_some(step.step);
                }
                PlaybackEvent::Stopped => {
                    self.playing_step = None;
                }
            }
        }
    }

    fn connect_midi(&mut self, port_index: usize) {
        match self.midi_output.borrow_mut().connect(port_index) {
            Ok(()) => self.selected_port = Some(port_index),
            Err(e) => log::warn!("{}", e),
        }
    }

    fn transport_controls(&mut self, ui: &mut egui::Ui) {
        let now = self.now();
        ui.horizontal(|ui| {
            let play_label = if self.sequencer.is_playing() {
                "⏸ Pause"
            } else {
                "▶ Play"
            };
            if ui.button(play_label).clicked() {
                self.sequencer.toggle_play(now);
            }

            let can_stop = self.sequencer.state() != PlayerState::Stopped;
            if ui.add_enabled(can_stop, egui::Button::new("⏹ Stop")).clicked() {
                self.sequencer.stop(now);
            }

            ui.add_space(20.0);

            ui.label("Tempo:");
            let mut bpm = self.sequencer.bpm();
            if ui
                .add(
                    egui::Slider::new(&mut bpm, 40.0..=240.0)
                        .step_by(1.0)
                        .suffix(" BPM"),
                )
                .changed()
            {
                if let Err(e) = self.sequencer.set_tempo(bpm, now) {
                    log::warn!("{}", e);
                }
            }
        });
    }

    fn step_controls(&mut self, ui: &mut egui::Ui) {
        let mut toggled = None;
        let mut repitched = None;

        ui.horizontal(|ui| {
            for (i, step) in self.sequencer.steps().iter().enumerate() {
                ui.vertical(|ui| {
                    let is_current = self.playing_step == Some(i);
                    let button_text = format!(
                        "Step {}\n{}",
                        i + 1,
                        if step.active { "ON" } else { "OFF" }
                    );
                    let button = egui::Button::new(button_text)
                        .min_size(egui::vec2(100.0, 60.0))
                        .fill(if is_current {
                            egui::Color32::from_rgb(100, 200, 100)
                        } else if step.active {
                            egui::Color32::from_rgb(60, 60, 200)
                        } else {
                            egui::Color32::from_rgb(40, 40, 40)
                        });
                    if ui.add(button).clicked() {
                        toggled = Some(i);
                    }

                    egui::ComboBox::from_id_source(("step_note", i))
                        .selected_text(step.pitch.to_string())
                        .width(100.0)
                        .show_ui(ui, |ui| {
                            for note in NOTE_CHOICES {
                                let pitch = Pitch::Note(note);
                                if ui
                                    .selectable_label(step.pitch == pitch, midi_note_name(note))
                                    .clicked()
                                {
                                    repitched = Some((i, pitch));
                                }
                            }
                        });
                });
            }
        });

        if let Some(i) = toggled {
            if let Err(e) = self.sequencer.toggle_step(i) {
                log::error!("{}", e);
            }
        }
        if let Some((i, pitch)) = repitched {
            if let Err(e) = self.sequencer.set_pitch(i, pitch) {
                log::error!("{}", e);
            }
        }

        ui.horizontal(|ui| {
            if ui.button("All on").clicked() {
                self.sequencer.steps_mut().fill();
            }
            if ui.button("All off").clicked() {
                self.sequencer.steps_mut().clear();
            }
        });
    }

    fn midi_controls(&mut self, ui: &mut egui::Ui) {
        let mut selected_port_changed = None;
        ui.horizontal(|ui| {
            ui.label("MIDI Output:");
            if self.available_midi_ports.is_empty() {
                ui.label("No MIDI ports available");
            } else {
                egui::ComboBox::from_id_source("midi_port")
                    .selected_text(
                        self.selected_port
                            .and_then(|i| self.available_midi_ports.get(i))
                            .map(String::as_str)
                            .unwrap_or("Select port..."),
                    )
                    .show_ui(ui, |ui| {
                        for (i, port_name) in self.available_midi_ports.iter().enumerate() {
                            if ui
                                .selectable_label(self.selected_port == Some(i), port_name)
                                .clicked()
                            {
                                selected_port_changed = Some(i);
                            }
                        }
                    });
            }
        });

        if let Some(port_idx) = selected_port_changed {
            self.connect_midi(port_idx);
        }
    }
}

#[cfg(feature = "gui")]
impl eframe::App for SequencerApp {
    fn update(&mut self, ctx: &egui::Context, _frame: &mut eframe::Frame) {
        ctx.request_repaint();

        self.handle_playback_events();

        egui::CentralPanel::default().show(ctx, |ui| {
            ui.heading("SQNC Steps - 4-Step Sequencer");
            ui.add_space(10.0);

            if matches!(self.status, EngineStatus::Waiting) {
                ui.label("Audio starts on request.");
                if ui.button("🔊 Start audio engine").clicked() {
                    self.start_engine();
                }
                return;
            }

            match &self.status {
                EngineStatus::Ready => {
                    ui.colored_label(egui::Color32::GREEN, "✅ Audio engine is ready!");
                }
                EngineStatus::MidiOnly(reason) => {
                    ui.colored_label(
                        egui::Color32::YELLOW,
                        format!("⚠ No audio output ({reason}) - MIDI playback only"),
                    );
                }
                EngineStatus::Waiting => {}
            }
            ui.add_space(10.0);

            self.midi_controls(ui);
            ui.add_space(10.0);

            self.transport_controls(ui);
            ui.add_space(20.0);

            ui.label("Steps:");
            ui.add_space(5.0);
            self.step_controls(ui);

            ui.separator();
            ui.label("Click steps to enable/disable them");
        });
    }
}

#[cfg(feature = "gui")]
impl Drop for SequencerApp {
    fn drop(&mut self) {
        let now = self.now();
        self.sequencer.stop(now);
        self.sequencer.detach_tone_generator();
        self.midi_output.borrow_mut().disconnect();
    }
}
