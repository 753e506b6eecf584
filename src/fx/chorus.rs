// src/fx/chorus.rs

//! Mono-in/stereo-out dual-tap chorus.
//!
//! Two sine LFOs in antiphase modulate the left and right read offsets
//! around a base delay; the detuned taps against the dry signal are what
//! widen and thicken the sound. Mode I and Mode II trade subtlety for
//! shimmer.

use serde::{Deserialize, Serialize};
use std::f32::consts::TAU;

// Longest modulated delay we ever read, with headroom.
const MAX_DELAY_SECS: f32 = 0.03;

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChorusMode {
    Off,
    /// Subtle: ~6 ms base delay, 0.5 Hz, 50% mix.
    ModeI,
    /// Deeper: ~8 ms base delay, 0.8 Hz, 60% mix.
    ModeII,
}

impl ChorusMode {
    fn params(self) -> Option<(f32, f32, f32)> {
        match self {
            ChorusMode::Off => None,
            ChorusMode::ModeI => Some((0.006, 0.5, 0.5)),
            ChorusMode::ModeII => Some((0.008, 0.8, 0.6)),
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug)]
pub struct ChorusSettings {
    pub mode: ChorusMode,
    /// Modulation depth as a fraction of the base delay (0.0 to 1.0).
    pub depth: f32,
}

impl Default for ChorusSettings {
    fn default() -> Self {
        Self {
            mode: ChorusMode::Off,
            depth: 0.5,
        }
    }
}

pub struct Chorus {
    settings: ChorusSettings,
    buffer: Vec<f32>,
    write_pos: usize,
    lfo_phase: f32,
    sample_rate: f32,
}

impl Chorus {
    pub fn new(sample_rate: f32) -> Self {
        let sample_rate = sample_rate.max(1.0);
        let max_samples = (MAX_DELAY_SECS * sample_rate).ceil() as usize + 2;
        Self {
            settings: ChorusSettings::default(),
            buffer: vec![0.0; max_samples],
            write_pos: 0,
            lfo_phase: 0.0,
            sample_rate,
        }
    }

    pub fn set_settings(&mut self, settings: ChorusSettings) {
        self.settings = ChorusSettings {
            mode: settings.mode,
            depth: settings.depth.clamp(0.0, 1.0),
        };
    }

    pub fn settings(&self) -> ChorusSettings {
        self.settings
    }

    pub fn clear(&mut self) {
        self.buffer.fill(0.0);
    }

    #[inline]
    fn read(&self, delay_samples: f32) -> f32 {
        let len = self.buffer.len() as f32;
        let read_pos = (self.write_pos as f32 - delay_samples + len) % len;
        let index1 = read_pos.floor() as usize;
        let index2 = (index1 + 1) % self.buffer.len();
        let fraction = read_pos.fract();
        let sample1 = self.buffer[index1];
        let sample2 = self.buffer[index2];
        sample1 + fraction * (sample2 - sample1)
    }

    /// One mono input sample in, one stereo pair out.
    #[inline]
    pub fn process(&mut self, input: f32) -> (f32, f32) {
        let Some((base_delay, rate_hz, mix)) = self.settings.mode.params() else {
            return (input, input);
        };

        self.buffer[self.write_pos] = input;
        self.write_pos = (self.write_pos + 1) % self.buffer.len();

        self.lfo_phase = (self.lfo_phase + rate_hz / self.sample_rate) % 1.0;
        let lfo_l = (self.lfo_phase * TAU).sin();
        // Right channel LFO runs in antiphase for width.
        let lfo_r = -lfo_l;

        let depth = self.settings.depth;
        let swing = base_delay * 0.5 * depth;
        let delay_l = ((base_delay + swing * lfo_l) * self.sample_rate).max(1.0);
        let delay_r = ((base_delay + swing * lfo_r) * self.sample_rate).max(1.0);

        let wet_l = self.read(delay_l);
        let wet_r = self.read(delay_r);

        (
            input * (1.0 - mix) + wet_l * mix,
            input * (1.0 - mix) + wet_r * mix,
        )
    }
}
