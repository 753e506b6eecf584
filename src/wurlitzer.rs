// src/wurlitzer.rs

//! Electric-piano voice and engine.
//!
//! Each voice models a struck reed: fundamental plus slightly stretched 2nd
//! and 3rd harmonics, two quiet bell partials, a one-sample feedback term
//! and a short noise transient, shaped by four envelopes whose times scale
//! with velocity. The sum is cubic soft-clipped and DC-blocked. The engine
//! owns a twelve-slot pool and its own tremolo, chorus, delay and reverb.

use crate::fx::{Chorus, ChorusSettings, Delay, DelaySettings, Reverb, ReverbSettings, Tremolo, TremoloSettings};
use crate::synth::{Adsr, AdsrSettings, AdsrState};
use serde::{Deserialize, Serialize};
use std::f32::consts::TAU;

pub const NUM_VOICES: usize = 12;

// Inharmonic stretch on the 2nd/3rd harmonics; real tines run sharp.
const STRETCH: f32 = 1.0005;
// Bell partial ratios, deliberately far from integer.
const BELL_RATIOS: [f32; 2] = [5.04, 7.92];
const FEEDBACK: f32 = 0.15;
// DC blocker pole.
const DC_POLE: f32 = 0.999;

const GAIN_SMOOTHING: f32 = 0.9995;

// A voice retires once its amplitude envelope has effectively finished.
const RETIRE_LEVEL: f32 = 1e-4;

#[derive(Serialize, Deserialize, Clone, Copy, Debug)]
pub struct WurlitzerSettings {
    pub tremolo: TremoloSettings,
    pub chorus: ChorusSettings,
    pub delay: DelaySettings,
    pub reverb: ReverbSettings,
    pub volume: f32,
}

impl Default for WurlitzerSettings {
    fn default() -> Self {
        Self {
            tremolo: TremoloSettings {
                rate_hz: 5.5,
                depth: 0.4,
            },
            chorus: ChorusSettings::default(),
            delay: DelaySettings::default(),
            reverb: ReverbSettings::default(),
            volume: 0.8,
        }
    }
}

/// Cubic saturator: linear near zero, polynomial knee, hard ceiling at 1.
#[inline]
fn cubic_clip(x: f32) -> f32 {
    let x = x.clamp(-1.5, 1.5);
    x * (1.0 - x * x / 6.75)
}

pub struct WurlitzerVoice {
    note: Option<u8>,
    pub age: u64,
    velocity: f32,
    freq: f32,
    phases: [f32; 5],
    amp_env: Adsr,
    bark_env: Adsr,
    harmonic_env: Adsr,
    tine_env: Adsr,
    prev_sample: f32,
    dc_x1: f32,
    dc_y1: f32,
    noise_remaining: usize,
    noise_total: usize,
    sample_rate: f32,
}

impl WurlitzerVoice {
    pub fn new(sample_rate: f32) -> Self {
        let sample_rate = sample_rate.max(1.0);
        let silent = AdsrSettings {
            attack: 0.01,
            decay: 2.0,
            sustain: 0.0,
            release: 0.4,
        };
        Self {
            note: None,
            age: 0,
            velocity: 0.0,
            freq: 440.0,
            phases: [0.0; 5],
            amp_env: Adsr::new(silent, sample_rate),
            bark_env: Adsr::new(silent, sample_rate),
            harmonic_env: Adsr::new(silent, sample_rate),
            tine_env: Adsr::new(silent, sample_rate),
            prev_sample: 0.0,
            dc_x1: 0.0,
            dc_y1: 0.0,
            noise_remaining: 0,
            noise_total: (0.004 * sample_rate) as usize,
            sample_rate,
        }
    }

    pub fn note(&self) -> Option<u8> {
        self.note
    }

    pub fn is_active(&self) -> bool {
        self.note.is_some()
    }

    pub fn note_on(&mut self, note: u8, freq: f32, velocity: f32) {
        let velocity = velocity.clamp(0.0, 1.0);
        // Harder strikes speak faster and die sooner.
        let attack = 0.020 - 0.012 * velocity;
        let decay = 3.5 - 1.5 * velocity;

        self.amp_env.set_settings(AdsrSettings {
            attack,
            decay,
            sustain: 0.0,
            release: 0.5,
        });
        // Bark is the attack coloration: brief, brighter with velocity.
        self.bark_env.set_settings(AdsrSettings {
            attack: attack * 0.5,
            decay: 0.09,
            sustain: 0.0,
            release: 0.05,
        });
        self.harmonic_env.set_settings(AdsrSettings {
            attack,
            decay: decay * 0.6,
            sustain: 0.0,
            release: 0.3,
        });
        self.tine_env.set_settings(AdsrSettings {
            attack: attack * 0.4,
            decay: decay * 0.4,
            sustain: 0.0,
            release: 0.2,
        });

        if self.note.is_none() {
            self.phases = [0.0; 5];
            self.prev_sample = 0.0;
        }
        self.note = Some(note);
        self.freq = freq;
        self.velocity = velocity;
        self.noise_remaining = self.noise_total;
        self.amp_env.gate(true);
        self.bark_env.gate(true);
        self.harmonic_env.gate(true);
        self.tine_env.gate(true);
    }

    pub fn note_off(&mut self, note: u8) {
        if self.note == Some(note) {
            self.release();
        }
    }

    pub fn release(&mut self) {
        self.amp_env.gate(false);
        self.bark_env.gate(false);
        self.harmonic_env.gate(false);
        self.tine_env.gate(false);
    }

    #[inline]
    pub fn process(&mut self) -> f32 {
        if self.note.is_none() {
            return 0.0;
        }

        let amp = self.amp_env.process();
        let bark = self.bark_env.process();
        let harmonic = self.harmonic_env.process();
        let tine = self.tine_env.process();

        // Sustain is zero, so "settled in sustain" means the note is over.
        if amp < RETIRE_LEVEL && self.amp_env.state != AdsrState::Attack {
            self.note = None;
            return 0.0;
        }

        let base = self.freq / self.sample_rate;
        let increments = [
            base,
            base * 2.0 * STRETCH,
            base * 3.0 * STRETCH,
            base * BELL_RATIOS[0],
            base * BELL_RATIOS[1],
        ];
        for (phase, inc) in self.phases.iter_mut().zip(increments) {
            *phase = (*phase + inc) % 1.0;
        }

        let brightness = 0.4 + 0.6 * bark * self.velocity;
        let mut sum = (self.phases[0] * TAU).sin();
        sum += (self.phases[1] * TAU).sin() * 0.5 * harmonic * brightness;
        sum += (self.phases[2] * TAU).sin() * 0.25 * harmonic * brightness;
        sum += (self.phases[3] * TAU).sin() * 0.08 * tine;
        sum += (self.phases[4] * TAU).sin() * 0.05 * tine;
        sum += self.prev_sample * FEEDBACK;

        if self.noise_remaining > 0 {
            let fade = self.noise_remaining as f32 / self.noise_total.max(1) as f32;
            sum += (rand::random::<f32>() * 2.0 - 1.0) * 0.06 * self.velocity * fade;
            self.noise_remaining -= 1;
        }

        let shaped = cubic_clip(sum * amp * (0.25 + 0.75 * self.velocity));
        self.prev_sample = shaped;

        // One-pole DC blocker; the feedback term otherwise accumulates a
        // slow offset.
        let out = shaped - self.dc_x1 + DC_POLE * self.dc_y1;
        self.dc_x1 = shaped;
        self.dc_y1 = out;
        out
    }
}

pub struct WurlitzerEngine {
    voices: Vec<WurlitzerVoice>,
    age_counter: u64,
    tremolo: Tremolo,
    chorus: Chorus,
    delay: Delay,
    reverb: Reverb,
    smoothed_gain: f32,
}

impl WurlitzerEngine {
    pub fn new(sample_rate: f32) -> Self {
        Self {
            voices: (0..NUM_VOICES)
                .map(|_| WurlitzerVoice::new(sample_rate))
                .collect(),
            age_counter: 0,
            tremolo: Tremolo::new(sample_rate),
            chorus: Chorus::new(sample_rate),
            delay: Delay::new(sample_rate),
            reverb: Reverb::new(sample_rate),
            smoothed_gain: 1.0,
        }
    }

    fn allocate(&self, note: u8) -> usize {
        if let Some(i) = (0..NUM_VOICES).find(|&i| self.voices[i].note() == Some(note)) {
            return i;
        }
        if let Some(i) = (0..NUM_VOICES).find(|&i| !self.voices[i].is_active()) {
            return i;
        }
        (0..NUM_VOICES)
            .min_by_key(|&i| self.voices[i].age)
            .unwrap_or(0)
    }

    pub fn note_on(&mut self, note: u8, freq: f32, velocity: f32) {
        let slot = self.allocate(note);
        self.age_counter += 1;
        self.voices[slot].age = self.age_counter;
        self.voices[slot].note_on(note, freq, velocity);
    }

    pub fn note_off(&mut self, note: u8) {
        for voice in &mut self.voices {
            voice.note_off(note);
        }
    }

    pub fn all_notes_off(&mut self) {
        for voice in &mut self.voices {
            voice.release();
        }
    }

    pub fn active_voices(&self) -> usize {
        self.voices.iter().filter(|v| v.is_active()).count()
    }

    /// Render one stereo sample through the engine's own effects chain.
    #[inline]
    pub fn process(&mut self, settings: &WurlitzerSettings) -> (f32, f32) {
        let mut mix = 0.0;
        let mut active = 0usize;
        for voice in &mut self.voices {
            if voice.is_active() {
                mix += voice.process();
                active += 1;
            }
        }

        let target_gain = 1.0 / (active.max(1) as f32).sqrt();
        self.smoothed_gain =
            GAIN_SMOOTHING * self.smoothed_gain + (1.0 - GAIN_SMOOTHING) * target_gain;
        let mono = mix * self.smoothed_gain;

        self.tremolo.set_settings(settings.tremolo);
        self.chorus.set_settings(settings.chorus);
        self.delay.set_settings(settings.delay);
        self.reverb.set_settings(settings.reverb);

        let (trem, _) = self.tremolo.process(mono, mono);
        let (l, r) = self.chorus.process(trem);
        let (l, r) = self.delay.process(l, r);
        let (l, r) = self.reverb.process(l, r);

        let volume = settings.volume.clamp(0.0, 1.0);
        (l * volume, r * volume)
    }
}
