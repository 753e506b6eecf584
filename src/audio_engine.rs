// src/audio_engine.rs

//! Per-callback orchestrator and its control-side handle.
//!
//! `AudioEngine` lives on the audio thread and renders interleaved stereo
//! blocks; `EngineController` lives with the UI/input layer. They talk
//! through a SPSC command queue plus shared atomics and `RwLock` snapshots,
//! so the render path never blocks on the control path.

use ringbuf::{HeapConsumer, HeapProducer, HeapRb};
use serde::{Deserialize, Serialize};
use std::f32::consts::TAU;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, RwLock};

use crate::drum_machine::{DrumInstrument, DrumMachine, DrumPattern, Metronome, MAX_BPM, MIN_BPM};
use crate::dsp::{FilterSettings, LfoSettings, OscillatorSettings};
use crate::fx::{ChorusSettings, Delay, DelaySettings, Reverb, ReverbSettings, Tremolo, TremoloSettings};
use crate::looper::{Looper, SharedLooperState};
use crate::poly::{PolySettings, PolyphonyManager};
use crate::synth::{load_param, midi_note_to_freq, store_param, AdsrSettings};
use crate::wurlitzer::{WurlitzerEngine, WurlitzerSettings};

const COMMAND_QUEUE_SIZE: usize = 256;
// Largest block rendered in one pass; bigger callbacks are chunked.
const MAX_BLOCK_FRAMES: usize = 2048;

// Empirical mix ratios. These are part of the sound; do not re-derive them.
const SYNTH_MIX_GAIN: f32 = 0.5;
const LOOP_MIX_GAIN: f32 = 1.0;
const DRUM_MIX_GAIN: f32 = 1.4;
const METRONOME_MIX_GAIN: f32 = 1.2;

// Subtractive-path output shelf.
const SHELF_CROSSOVER_HZ: f32 = 250.0;
const SHELF_GAIN: f32 = 0.25;

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
pub enum SynthMode {
    Subtractive,
    ElectricPiano,
}

/// Everything the control thread can ask of the audio thread.
pub enum AudioCommand {
    NoteOn { note: u8, freq: f32, velocity: f32 },
    NoteOff { note: u8 },
    AllNotesOff,
    SetMode(SynthMode),
    SetLooperBars(usize),
    StartLooperRecording(usize),
    CancelLooperRecording,
    StartLooperPlayback,
    StopLooperPlayback,
    ClearLooperTrack(usize),
    ClearLooper,
    Shutdown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenderStatus {
    Continue,
    Stop,
}

/// Control-side settings snapshotted by the audio thread once per block.
#[derive(Serialize, Deserialize, Clone, Copy, Debug)]
pub struct EngineSettings {
    pub poly: PolySettings,
    pub wurlitzer: WurlitzerSettings,
    /// Subtractive-path effects chain.
    pub tremolo: TremoloSettings,
    pub delay: DelaySettings,
    pub reverb: ReverbSettings,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            poly: PolySettings::default(),
            wurlitzer: WurlitzerSettings::default(),
            tremolo: TremoloSettings::default(),
            delay: DelaySettings::default(),
            reverb: ReverbSettings::default(),
        }
    }
}

/// One low shelf per channel: a one-pole crossover whose low band is
/// boosted back in.
#[derive(Default)]
struct BassShelf {
    z1_l: f32,
    z1_r: f32,
}

impl BassShelf {
    #[inline]
    fn process(&mut self, l: f32, r: f32, coeff: f32) -> (f32, f32) {
        self.z1_l = coeff * self.z1_l + (1.0 - coeff) * l;
        self.z1_r = coeff * self.z1_r + (1.0 - coeff) * r;
        (l + self.z1_l * SHELF_GAIN, r + self.z1_r * SHELF_GAIN)
    }
}

/// The idempotent device-change hook: request/take around one atomic flag.
#[derive(Clone)]
pub struct RestartFlag {
    pending: Arc<AtomicBool>,
}

impl RestartFlag {
    fn new() -> Self {
        Self {
            pending: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Returns true if this call initiated the restart; a second request
    /// while one is in flight is a no-op.
    pub fn request(&self) -> bool {
        self.pending
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Consume a pending request, if any.
    pub fn take(&self) -> bool {
        self.pending
            .compare_exchange(true, false, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }
}

pub struct AudioEngine {
    command_consumer: HeapConsumer<AudioCommand>,
    settings: Arc<RwLock<EngineSettings>>,
    pattern: Arc<RwLock<DrumPattern>>,
    master_volume: Arc<AtomicU32>,
    bpm: Arc<AtomicU32>,
    drums_enabled: Arc<AtomicBool>,

    mode: SynthMode,
    poly: PolyphonyManager,
    wurlitzer: WurlitzerEngine,
    tremolo: Tremolo,
    delay: Delay,
    reverb: Reverb,
    shelf: BassShelf,
    shelf_coeff: f32,
    looper: Looper,
    drum_machine: DrumMachine,
    metronome: Metronome,

    synth_scratch: Vec<f32>,
    loop_scratch: Vec<f32>,
    running: bool,
}

impl AudioEngine {
    /// Build the engine pair for one output stream.
    pub fn new(sample_rate: f32) -> (Self, EngineController) {
        let sample_rate = sample_rate.max(1.0);
        let (command_producer, command_consumer) =
            HeapRb::<AudioCommand>::new(COMMAND_QUEUE_SIZE).split();

        let settings = Arc::new(RwLock::new(EngineSettings::default()));
        let pattern = Arc::new(RwLock::new(DrumPattern::default()));
        let master_volume = Arc::new(AtomicU32::new(0));
        store_param(&master_volume, 0.8);
        let bpm = Arc::new(AtomicU32::new(0));
        store_param(&bpm, 120.0);
        let drums_enabled = Arc::new(AtomicBool::new(false));
        let restart = RestartFlag::new();

        let looper = Looper::new(sample_rate);
        let looper_shared = looper.shared();

        let controller = EngineController {
            command_producer,
            settings: settings.clone(),
            pattern: pattern.clone(),
            master_volume: master_volume.clone(),
            bpm: bpm.clone(),
            drums_enabled: drums_enabled.clone(),
            restart: restart.clone(),
            looper: looper_shared,
            sample_rate,
        };

        let engine = Self {
            command_consumer,
            settings,
            pattern,
            master_volume,
            bpm,
            drums_enabled,
            mode: SynthMode::Subtractive,
            poly: PolyphonyManager::new(sample_rate),
            wurlitzer: WurlitzerEngine::new(sample_rate),
            tremolo: Tremolo::new(sample_rate),
            delay: Delay::new(sample_rate),
            reverb: Reverb::new(sample_rate),
            shelf: BassShelf::default(),
            shelf_coeff: (-TAU * SHELF_CROSSOVER_HZ / sample_rate).exp(),
            looper,
            drum_machine: DrumMachine::new(sample_rate),
            metronome: Metronome::new(sample_rate),
            synth_scratch: vec![0.0; MAX_BLOCK_FRAMES * 2],
            loop_scratch: vec![0.0; MAX_BLOCK_FRAMES * 2],
            running: true,
        };

        (engine, controller)
    }

    fn drain_commands(&mut self) {
        while let Some(command) = self.command_consumer.pop() {
            match command {
                AudioCommand::NoteOn { note, freq, velocity } => {
                    match self.mode {
                        SynthMode::Subtractive => {
                            let snapshot = self
                                .settings
                                .read()
                                .map(|s| s.poly)
                                .unwrap_or_default();
                            self.poly.note_on(note, freq, velocity, &snapshot);
                        }
                        SynthMode::ElectricPiano => {
                            self.wurlitzer.note_on(note, freq, velocity);
                        }
                    }
                }
                AudioCommand::NoteOff { note } => {
                    self.poly.note_off(note);
                    self.wurlitzer.note_off(note);
                }
                AudioCommand::AllNotesOff => {
                    self.poly.all_notes_off();
                    self.wurlitzer.all_notes_off();
                }
                AudioCommand::SetMode(mode) => {
                    if mode != self.mode {
                        // The outgoing path rings out its releases.
                        self.poly.all_notes_off();
                        self.wurlitzer.all_notes_off();
                        self.mode = mode;
                    }
                }
                AudioCommand::SetLooperBars(bars) => self.looper.set_bars(bars),
                AudioCommand::StartLooperRecording(track) => {
                    self.looper.start_recording(track);
                }
                AudioCommand::CancelLooperRecording => self.looper.cancel_recording(),
                AudioCommand::StartLooperPlayback => {
                    self.looper.start_playback();
                }
                AudioCommand::StopLooperPlayback => self.looper.stop_playback(),
                AudioCommand::ClearLooperTrack(track) => self.looper.clear_track(track),
                AudioCommand::ClearLooper => self.looper.clear_all(),
                AudioCommand::Shutdown => self.running = false,
            }
        }
    }

    /// Fill `output` (interleaved stereo) completely. Runs allocation-free;
    /// oversized callbacks are handled in chunks.
    pub fn render(&mut self, output: &mut [f32]) -> RenderStatus {
        self.drain_commands();
        if !self.running {
            output.fill(0.0);
            return RenderStatus::Stop;
        }

        let mut rest = output;
        while !rest.is_empty() {
            let take = rest.len().min(MAX_BLOCK_FRAMES * 2);
            let (chunk, tail) = rest.split_at_mut(take);
            self.render_chunk(chunk);
            rest = tail;
        }
        RenderStatus::Continue
    }

    fn render_chunk(&mut self, output: &mut [f32]) {
        let frames = output.len() / 2;
        let settings = self
            .settings
            .read()
            .map(|s| *s)
            .unwrap_or_default();
        let pattern = self
            .pattern
            .read()
            .map(|p| *p)
            .unwrap_or_else(|_| DrumPattern::default());
        let bpm = load_param(&self.bpm).clamp(MIN_BPM, MAX_BPM);
        let master = load_param(&self.master_volume).clamp(0.0, 1.0);

        self.looper.set_bpm(bpm);
        self.tremolo.set_settings(settings.tremolo);
        self.delay.set_settings(settings.delay);
        self.reverb.set_settings(settings.reverb);

        // Synth path into the scratch buffer.
        match self.mode {
            SynthMode::Subtractive => {
                for frame in 0..frames {
                    let (l, r) = self.poly.process(&settings.poly);
                    let (l, r) = self.tremolo.process(l, r);
                    let (l, r) = self.delay.process(l, r);
                    let (l, r) = self.reverb.process(l, r);
                    let (l, r) = self.shelf.process(l, r, self.shelf_coeff);
                    self.synth_scratch[frame * 2] = l * master;
                    self.synth_scratch[frame * 2 + 1] = r * master;
                }
            }
            SynthMode::ElectricPiano => {
                for frame in 0..frames {
                    let (l, r) = self.wurlitzer.process(&settings.wurlitzer);
                    self.synth_scratch[frame * 2] = l * master;
                    self.synth_scratch[frame * 2 + 1] = r * master;
                }
            }
        }

        // Looper records the synth and hands back the loop mix.
        self.loop_scratch[..frames * 2].fill(0.0);
        self.looper.process_block(
            &self.synth_scratch[..frames * 2],
            &mut self.loop_scratch[..frames * 2],
        );

        // Metronome during count-in/recording, drums otherwise.
        let use_metronome = self.looper.is_count_or_record();
        self.metronome.set_running(use_metronome);
        self.drum_machine
            .set_running(!use_metronome && self.drums_enabled.load(Ordering::Relaxed));

        for frame in 0..frames {
            let synth_l = self.synth_scratch[frame * 2];
            let synth_r = self.synth_scratch[frame * 2 + 1];
            let loop_l = self.loop_scratch[frame * 2];
            let loop_r = self.loop_scratch[frame * 2 + 1];

            let drums = self.drum_machine.process(&pattern, bpm) * DRUM_MIX_GAIN;
            let click = self.metronome.process(bpm) * METRONOME_MIX_GAIN;
            let percussion = drums + click;

            let l = synth_l * SYNTH_MIX_GAIN + loop_l * LOOP_MIX_GAIN + percussion;
            let r = synth_r * SYNTH_MIX_GAIN + loop_r * LOOP_MIX_GAIN + percussion;

            // Last-resort safety clamp.
            output[frame * 2] = l.clamp(-1.0, 1.0);
            output[frame * 2 + 1] = r.clamp(-1.0, 1.0);
        }
    }
}

/// Control-thread handle: parameter setters clamp and store; note and
/// transport events go through the command queue.
pub struct EngineController {
    command_producer: HeapProducer<AudioCommand>,
    settings: Arc<RwLock<EngineSettings>>,
    pattern: Arc<RwLock<DrumPattern>>,
    master_volume: Arc<AtomicU32>,
    bpm: Arc<AtomicU32>,
    drums_enabled: Arc<AtomicBool>,
    restart: RestartFlag,
    looper: SharedLooperState,
    sample_rate: f32,
}

impl EngineController {
    fn send(&mut self, command: AudioCommand) {
        // A full queue drops the event; the alternative is blocking the
        // input thread.
        let _ = self.command_producer.push(command);
    }

    fn update_settings(&self, f: impl FnOnce(&mut EngineSettings)) {
        if let Ok(mut settings) = self.settings.write() {
            f(&mut settings);
        }
    }

    // --- note events ---

    pub fn note_on(&mut self, note: u8, velocity: f32) {
        self.note_on_with_freq(note, midi_note_to_freq(note), velocity);
    }

    /// Note-on with an explicit frequency, for tunings the twelve-tone
    /// mapping cannot express.
    pub fn note_on_with_freq(&mut self, note: u8, freq: f32, velocity: f32) {
        self.send(AudioCommand::NoteOn {
            note,
            freq: freq.max(0.0),
            velocity: velocity.clamp(0.0, 1.0),
        });
    }

    pub fn note_off(&mut self, note: u8) {
        self.send(AudioCommand::NoteOff { note });
    }

    pub fn all_notes_off(&mut self) {
        self.send(AudioCommand::AllNotesOff);
    }

    pub fn set_mode(&mut self, mode: SynthMode) {
        self.send(AudioCommand::SetMode(mode));
    }

    pub fn shutdown(&mut self) {
        self.send(AudioCommand::Shutdown);
    }

    // --- global parameters ---

    pub fn set_master_volume(&self, volume: f32) {
        store_param(&self.master_volume, volume.clamp(0.0, 1.0));
    }

    pub fn set_bpm(&self, bpm: f32) {
        store_param(&self.bpm, bpm.clamp(MIN_BPM, MAX_BPM));
    }

    pub fn bpm(&self) -> f32 {
        load_param(&self.bpm)
    }

    // --- subtractive path ---

    pub fn set_oscillator(&self, settings: OscillatorSettings) {
        self.update_settings(|s| s.poly.voice.oscillator = settings);
    }

    pub fn set_filter(&self, settings: FilterSettings) {
        self.update_settings(|s| s.poly.voice.filter = settings);
    }

    pub fn set_amp_env(&self, settings: AdsrSettings) {
        self.update_settings(|s| s.poly.voice.amp_env = settings);
    }

    pub fn set_filter_env(&self, settings: AdsrSettings, amount_hz: f32) {
        self.update_settings(|s| {
            s.poly.voice.filter_env = settings;
            s.poly.voice.filter_env_amount = amount_hz.clamp(-10_000.0, 10_000.0);
        });
    }

    pub fn set_mix(&self, sub_mix: f32, noise_mix: f32) {
        self.update_settings(|s| {
            s.poly.voice.sub_mix = sub_mix.clamp(0.0, 1.0);
            s.poly.voice.noise_mix = noise_mix.clamp(0.0, 1.0);
        });
    }

    pub fn set_glide(&self, enabled: bool, time_secs: f32) {
        self.update_settings(|s| {
            s.poly.voice.glide_enabled = enabled;
            s.poly.voice.glide_time = time_secs.clamp(0.0, 2.0);
        });
    }

    pub fn set_lfo(&self, settings: LfoSettings) {
        self.update_settings(|s| s.poly.lfo = settings);
    }

    pub fn set_unison(&self, voices: usize, spread_cents: f32) {
        self.update_settings(|s| {
            s.poly.unison_voices = voices.clamp(1, crate::poly::MAX_UNISON);
            s.poly.unison_spread_cents = spread_cents.clamp(0.0, 100.0);
        });
    }

    pub fn set_synth_chorus(&self, settings: ChorusSettings) {
        self.update_settings(|s| s.poly.chorus = settings);
    }

    pub fn set_synth_tremolo(&self, settings: TremoloSettings) {
        self.update_settings(|s| s.tremolo = settings);
    }

    pub fn set_synth_delay(&self, settings: DelaySettings) {
        self.update_settings(|s| s.delay = settings);
    }

    pub fn set_synth_reverb(&self, settings: ReverbSettings) {
        self.update_settings(|s| s.reverb = settings);
    }

    // --- electric-piano path ---

    pub fn set_piano_tremolo(&self, settings: TremoloSettings) {
        self.update_settings(|s| s.wurlitzer.tremolo = settings);
    }

    pub fn set_piano_chorus(&self, settings: ChorusSettings) {
        self.update_settings(|s| s.wurlitzer.chorus = settings);
    }

    pub fn set_piano_delay(&self, settings: DelaySettings) {
        self.update_settings(|s| s.wurlitzer.delay = settings);
    }

    pub fn set_piano_reverb(&self, settings: ReverbSettings) {
        self.update_settings(|s| s.wurlitzer.reverb = settings);
    }

    pub fn set_piano_volume(&self, volume: f32) {
        self.update_settings(|s| s.wurlitzer.volume = volume.clamp(0.0, 1.0));
    }

    // --- drum machine ---

    pub fn set_drums_enabled(&self, enabled: bool) {
        self.drums_enabled.store(enabled, Ordering::Relaxed);
    }

    pub fn drum_step(&self, instrument: DrumInstrument, step: usize) -> f32 {
        self.pattern
            .read()
            .map(|p| p.step(instrument, step))
            .unwrap_or(0.0)
    }

    pub fn set_drum_step(&self, instrument: DrumInstrument, step: usize, velocity: f32) {
        if let Ok(mut pattern) = self.pattern.write() {
            pattern.set_step(instrument, step, velocity);
        }
    }

    pub fn toggle_drum_step(&self, instrument: DrumInstrument, step: usize) {
        if let Ok(mut pattern) = self.pattern.write() {
            pattern.toggle_step(instrument, step);
        }
    }

    pub fn set_drum_volume(&self, instrument: DrumInstrument, volume: f32) {
        if let Ok(mut pattern) = self.pattern.write() {
            pattern.set_volume(instrument, volume);
        }
    }

    pub fn set_drum_instrument_enabled(&self, instrument: DrumInstrument, enabled: bool) {
        if let Ok(mut pattern) = self.pattern.write() {
            pattern.set_enabled(instrument, enabled);
        }
    }

    pub fn reset_drum_pattern(&self) {
        if let Ok(mut pattern) = self.pattern.write() {
            *pattern = DrumPattern::default();
        }
    }

    // --- looper ---

    pub fn looper(&self) -> &SharedLooperState {
        &self.looper
    }

    pub fn set_looper_bars(&mut self, bars: usize) {
        self.send(AudioCommand::SetLooperBars(bars));
    }

    pub fn start_looper_recording(&mut self, track: usize) {
        self.send(AudioCommand::StartLooperRecording(track));
    }

    pub fn cancel_looper_recording(&mut self) {
        self.send(AudioCommand::CancelLooperRecording);
    }

    pub fn start_looper_playback(&mut self) {
        self.send(AudioCommand::StartLooperPlayback);
    }

    pub fn stop_looper_playback(&mut self) {
        self.send(AudioCommand::StopLooperPlayback);
    }

    pub fn clear_looper_track(&mut self, track: usize) {
        self.send(AudioCommand::ClearLooperTrack(track));
    }

    pub fn clear_looper(&mut self) {
        self.send(AudioCommand::ClearLooper);
    }

    pub fn set_track_volume(&self, track: usize, volume: f32) {
        if let Some(t) = self.looper.tracks.get(track) {
            t.set_volume(volume);
        }
    }

    pub fn set_track_muted(&self, track: usize, muted: bool) {
        if let Some(t) = self.looper.tracks.get(track) {
            t.set_muted(muted);
        }
    }

    pub fn set_track_soloed(&self, track: usize, soloed: bool) {
        if let Some(t) = self.looper.tracks.get(track) {
            t.set_soloed(soloed);
        }
    }

    /// Mix a bitmask subset of loop tracks into a fresh interleaved stereo
    /// buffer, optionally with an offline drum-machine render. Encoding is
    /// the caller's problem.
    pub fn export_mix(&self, track_mask: u8, include_drums: bool) -> Vec<f32> {
        let mut mix = self.looper.export_mix(track_mask);
        if include_drums && !mix.is_empty() {
            let pattern = self
                .pattern
                .read()
                .map(|p| *p)
                .unwrap_or_else(|_| DrumPattern::default());
            let bpm = self.bpm();
            let mut machine = DrumMachine::new(self.sample_rate);
            machine.set_running(true);
            for frame in 0..mix.len() / 2 {
                let drums = machine.process(&pattern, bpm) * DRUM_MIX_GAIN;
                mix[frame * 2] = (mix[frame * 2] + drums).clamp(-1.0, 1.0);
                mix[frame * 2 + 1] = (mix[frame * 2 + 1] + drums).clamp(-1.0, 1.0);
            }
        }
        mix
    }

    // --- device hot-swap ---

    /// Platform binding calls this on a device change. Idempotent while a
    /// restart is in flight.
    pub fn on_device_changed(&self) -> bool {
        self.restart.request()
    }

    pub fn restart_flag(&self) -> RestartFlag {
        self.restart.clone()
    }

    pub(crate) fn settings_snapshot(&self) -> EngineSettings {
        self.settings.read().map(|s| *s).unwrap_or_default()
    }

    pub(crate) fn pattern_snapshot(&self) -> DrumPattern {
        self.pattern
            .read()
            .map(|p| *p)
            .unwrap_or_else(|_| DrumPattern::default())
    }

    pub(crate) fn apply_settings(&self, settings: EngineSettings) {
        self.update_settings(|s| *s = settings);
    }

    pub(crate) fn apply_pattern(&self, pattern: DrumPattern) {
        if let Ok(mut p) = self.pattern.write() {
            *p = pattern;
        }
    }

    pub(crate) fn drums_enabled(&self) -> bool {
        self.drums_enabled.load(Ordering::Relaxed)
    }

    pub(crate) fn master_volume(&self) -> f32 {
        load_param(&self.master_volume)
    }
}
