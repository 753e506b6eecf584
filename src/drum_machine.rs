// src/drum_machine.rs

//! Sixteen-step sequencer driving the drum voices, plus the metronome.
//!
//! The step clock accumulates one count per sample and subtracts the
//! (fractional) samples-per-sixteenth threshold when it advances, so long
//! runs never drift. The metronome is an independent four-beat clock that
//! reuses the kick voice for its click.

use crate::drums::DrumSynth;
use serde::{Deserialize, Serialize};

pub const NUM_STEPS: usize = 16;

pub const MIN_BPM: f32 = 40.0;
pub const MAX_BPM: f32 = 240.0;

// Velocity a toggled-on step gets when it has no stored value yet.
const DEFAULT_STEP_VELOCITY: f32 = 1.0;

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
pub enum DrumInstrument {
    Kick,
    Snare,
    Hat,
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug)]
pub struct InstrumentTrack {
    pub steps: [f32; NUM_STEPS],
    pub volume: f32,
    pub enabled: bool,
    // Last non-zero velocity per step, so toggling twice restores it.
    stored: [f32; NUM_STEPS],
}

impl InstrumentTrack {
    fn new(steps: [f32; NUM_STEPS]) -> Self {
        Self {
            steps,
            volume: 1.0,
            enabled: true,
            stored: steps,
        }
    }

    fn empty() -> Self {
        Self::new([0.0; NUM_STEPS])
    }
}

/// The shared pattern: mutated by the control thread, snapshotted by the
/// sequencer each block.
#[derive(Serialize, Deserialize, Clone, Copy, Debug)]
pub struct DrumPattern {
    pub kick: InstrumentTrack,
    pub snare: InstrumentTrack,
    pub hat: InstrumentTrack,
}

impl Default for DrumPattern {
    fn default() -> Self {
        let mut kick = [0.0; NUM_STEPS];
        kick[0] = 1.0;
        kick[8] = 1.0;

        let mut snare = [0.0; NUM_STEPS];
        snare[4] = 1.0;
        snare[12] = 1.0;

        let mut hat = [0.0; NUM_STEPS];
        for step in (0..NUM_STEPS).step_by(2) {
            hat[step] = 0.7;
        }

        Self {
            kick: InstrumentTrack::new(kick),
            snare: InstrumentTrack::new(snare),
            hat: InstrumentTrack::new(hat),
        }
    }
}

impl DrumPattern {
    pub fn empty() -> Self {
        Self {
            kick: InstrumentTrack::empty(),
            snare: InstrumentTrack::empty(),
            hat: InstrumentTrack::empty(),
        }
    }

    fn track(&self, instrument: DrumInstrument) -> &InstrumentTrack {
        match instrument {
            DrumInstrument::Kick => &self.kick,
            DrumInstrument::Snare => &self.snare,
            DrumInstrument::Hat => &self.hat,
        }
    }

    fn track_mut(&mut self, instrument: DrumInstrument) -> &mut InstrumentTrack {
        match instrument {
            DrumInstrument::Kick => &mut self.kick,
            DrumInstrument::Snare => &mut self.snare,
            DrumInstrument::Hat => &mut self.hat,
        }
    }

    /// Out-of-range steps read as silent rather than erroring.
    pub fn step(&self, instrument: DrumInstrument, step: usize) -> f32 {
        if step >= NUM_STEPS {
            return 0.0;
        }
        self.track(instrument).steps[step]
    }

    pub fn set_step(&mut self, instrument: DrumInstrument, step: usize, velocity: f32) {
        if step >= NUM_STEPS {
            return;
        }
        let track = self.track_mut(instrument);
        let velocity = velocity.clamp(0.0, 1.0);
        track.steps[step] = velocity;
        if velocity > 0.0 {
            track.stored[step] = velocity;
        }
    }

    /// Flip a step between silent and its last non-zero velocity. Two
    /// toggles restore the exact prior value.
    pub fn toggle_step(&mut self, instrument: DrumInstrument, step: usize) {
        if step >= NUM_STEPS {
            return;
        }
        let track = self.track_mut(instrument);
        if track.steps[step] > 0.0 {
            track.stored[step] = track.steps[step];
            track.steps[step] = 0.0;
        } else {
            let restored = track.stored[step];
            track.steps[step] = if restored > 0.0 {
                restored
            } else {
                DEFAULT_STEP_VELOCITY
            };
        }
    }

    pub fn set_volume(&mut self, instrument: DrumInstrument, volume: f32) {
        self.track_mut(instrument).volume = volume.clamp(0.0, 1.0);
    }

    pub fn set_enabled(&mut self, instrument: DrumInstrument, enabled: bool) {
        self.track_mut(instrument).enabled = enabled;
    }
}

/// Trigger velocities for one step, with enable and per-instrument volume
/// already applied.
fn step_velocities(pattern: &DrumPattern, step: usize) -> (f32, f32, f32) {
    let level = |track: &InstrumentTrack| {
        if track.enabled {
            track.steps[step] * track.volume
        } else {
            0.0
        }
    };
    (
        level(&pattern.kick),
        level(&pattern.snare),
        level(&pattern.hat),
    )
}

pub struct DrumMachine {
    drums: DrumSynth,
    sample_rate: f32,
    sample_counter: f32,
    step: usize,
    running: bool,
    // Step 0 fires on the first sample after enabling.
    pending_retrigger: bool,
}

impl DrumMachine {
    pub fn new(sample_rate: f32) -> Self {
        Self {
            drums: DrumSynth::new(sample_rate),
            sample_rate: sample_rate.max(1.0),
            sample_counter: 0.0,
            step: 0,
            running: false,
            pending_retrigger: false,
        }
    }

    pub fn set_running(&mut self, running: bool) {
        if running && !self.running {
            self.step = 0;
            self.sample_counter = 0.0;
            self.pending_retrigger = true;
        }
        self.running = running;
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn current_step(&self) -> usize {
        self.step
    }

    fn fire(&mut self, pattern: &DrumPattern) {
        let (kick, snare, hat) = step_velocities(pattern, self.step);
        if kick > 0.0 {
            self.drums.trigger_kick(kick);
        }
        if snare > 0.0 {
            self.drums.trigger_snare(snare);
        }
        if hat > 0.0 {
            self.drums.trigger_hat(hat);
        }
    }

    /// Advance one sample. Voice tails keep sounding after the sequencer
    /// stops; only new triggers are gated on `running`.
    #[inline]
    pub fn process(&mut self, pattern: &DrumPattern, bpm: f32) -> f32 {
        if self.running {
            if self.pending_retrigger {
                self.pending_retrigger = false;
                self.fire(pattern);
            }

            let bpm = bpm.clamp(MIN_BPM, MAX_BPM);
            let samples_per_sixteenth = self.sample_rate * 60.0 / (bpm * 4.0);
            self.sample_counter += 1.0;
            if self.sample_counter >= samples_per_sixteenth {
                // Carry the fractional remainder for long-run accuracy.
                self.sample_counter -= samples_per_sixteenth;
                self.step = (self.step + 1) % NUM_STEPS;
                self.fire(pattern);
            }
        }

        self.drums.next_sample()
    }
}

/// Four-beat click track, beat 0 accented. Reuses the kick voice.
pub struct Metronome {
    click: crate::drums::KickVoice,
    sample_rate: f32,
    sample_counter: f32,
    beat: usize,
    running: bool,
    pending_retrigger: bool,
}

impl Metronome {
    const BEATS_PER_BAR: usize = 4;
    const ACCENT_VELOCITY: f32 = 1.0;
    const BEAT_VELOCITY: f32 = 0.6;

    pub fn new(sample_rate: f32) -> Self {
        Self {
            click: crate::drums::KickVoice::new(sample_rate),
            sample_rate: sample_rate.max(1.0),
            sample_counter: 0.0,
            beat: 0,
            running: false,
            pending_retrigger: false,
        }
    }

    pub fn set_running(&mut self, running: bool) {
        if running && !self.running {
            self.beat = 0;
            self.sample_counter = 0.0;
            self.pending_retrigger = true;
        }
        self.running = running;
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn current_beat(&self) -> usize {
        self.beat
    }

    fn click_now(&mut self) {
        let velocity = if self.beat == 0 {
            Self::ACCENT_VELOCITY
        } else {
            Self::BEAT_VELOCITY
        };
        self.click.trigger(velocity);
    }

    #[inline]
    pub fn process(&mut self, bpm: f32) -> f32 {
        if self.running {
            if self.pending_retrigger {
                self.pending_retrigger = false;
                self.click_now();
            }

            let bpm = bpm.clamp(MIN_BPM, MAX_BPM);
            let samples_per_beat = self.sample_rate * 60.0 / bpm;
            self.sample_counter += 1.0;
            if self.sample_counter >= samples_per_beat {
                self.sample_counter -= samples_per_beat;
                self.beat = (self.beat + 1) % Self::BEATS_PER_BAR;
                self.click_now();
            }
        }

        if self.click.is_active() {
            self.click.next_sample()
        } else {
            0.0
        }
    }
}
