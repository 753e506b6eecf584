// src/synth.rs
//
// Shared synthesis primitives: fast math helpers, the pitch-ratio lookup
// table and the ADSR envelope generator used by every voice type.

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU32, Ordering};

/// Scaler for storing float parameters in atomics.
pub const PARAM_SCALER: f32 = 1_000_000.0;

/// Store a float into a scaled `AtomicU32` parameter.
#[inline]
pub fn store_param(atomic: &AtomicU32, value: f32) {
    atomic.store((value * PARAM_SCALER) as u32, Ordering::Relaxed);
}

/// Load a float from a scaled `AtomicU32` parameter.
#[inline]
pub fn load_param(atomic: &AtomicU32) -> f32 {
    atomic.load(Ordering::Relaxed) as f32 / PARAM_SCALER
}

/// A trait for providing a fast, approximate hyperbolic tangent function.
pub trait FastTanh {
    fn fast_tanh(self) -> Self;
}

impl FastTanh for f32 {
    /// A 3rd-order polynomial approximation of tanh(x).
    /// It is much faster than the standard library's `tanh` function.
    #[inline(always)]
    fn fast_tanh(self) -> Self {
        let x2 = self * self;
        // This is a Pade approximant, not a Taylor expansion.
        // It's chosen for its behavior across a wider range.
        self * (27.0 + x2) / (27.0 + 9.0 * x2)
    }
}

const LUT_SIZE: usize = 4096;

/// A generic lookup table for expensive functions.
pub struct Lut {
    table: [f32; LUT_SIZE],
    min_input: f32,
    max_input: f32,
    input_range: f32,
}

impl Lut {
    /// Creates a new LUT by applying a function `f` over a given input range.
    fn new<F>(min_input: f32, max_input: f32, f: F) -> Self
    where
        F: Fn(f32) -> f32,
    {
        let mut table = [0.0; LUT_SIZE];
        let input_range = max_input - min_input;
        for i in 0..LUT_SIZE {
            let phase = i as f32 / (LUT_SIZE - 1) as f32;
            let input = min_input + phase * input_range;
            table[i] = f(input);
        }
        Self {
            table,
            min_input,
            max_input,
            input_range,
        }
    }

    /// Gets a value from the LUT using linear interpolation.
    #[inline(always)]
    pub fn get_interpolated(&self, input: f32) -> f32 {
        let clamped_input = input.clamp(self.min_input, self.max_input);
        let normalized_pos = (clamped_input - self.min_input) / self.input_range;
        let scaled_pos = normalized_pos * (LUT_SIZE - 1) as f32;

        let idx_floor = scaled_pos.floor() as usize;
        let frac = scaled_pos.fract();

        if idx_floor >= LUT_SIZE - 1 {
            return self.table[LUT_SIZE - 1];
        }

        let val1 = self.table[idx_floor];
        let val2 = self.table[idx_floor + 1];

        val1 + frac * (val2 - val1)
    }
}

// Static lookup table for pitch modulation: 2.0.powf(x / 12.0)
// Covers +/- 5 octaves (-60.0 to 60.0 semitones).
pub static POW2_LUT: Lazy<Lut> = Lazy::new(|| Lut::new(-60.0, 60.0, |x| 2.0_f32.powf(x / 12.0)));

/// Convert a MIDI note number to its frequency in Hz (A4 = 69 = 440 Hz).
#[inline]
pub fn midi_note_to_freq(note: u8) -> f32 {
    440.0 * 2.0_f32.powf((note as f32 - 69.0) / 12.0)
}

/// Convert a detune amount in cents to a frequency ratio.
#[inline]
pub fn cents_to_ratio(cents: f32) -> f32 {
    POW2_LUT.get_interpolated(cents / 100.0)
}

/// Soft limiter shared by the filter and both voice pools: identity below
/// 0.8 magnitude, then a tanh knee that approaches 1.0.
#[inline(always)]
pub fn soft_limit(x: f32) -> f32 {
    let magnitude = x.abs();
    if magnitude <= 0.8 {
        x
    } else {
        // The Pade tanh drifts above 1.0 far outside its fit range, so the
        // knee is pinned to keep the ceiling exact.
        let knee = ((magnitude - 0.8) / 0.2).fast_tanh().min(1.0) * 0.2;
        (0.8 + knee) * x.signum()
    }
}

// All envelope stage times are floored here to avoid division by zero.
const MIN_STAGE_TIME: f32 = 0.001;

// Decay is considered settled once within this distance of the sustain level.
const DECAY_EPSILON: f32 = 1e-4;

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
pub struct AdsrSettings {
    pub attack: f32,
    pub decay: f32,
    pub sustain: f32,
    pub release: f32,
}

impl Default for AdsrSettings {
    fn default() -> Self {
        Self {
            attack: 0.01,
            decay: 0.1,
            sustain: 0.8,
            release: 0.2,
        }
    }
}

#[derive(PartialEq, Clone, Copy, Debug)]
pub enum AdsrState {
    Idle,
    Attack,
    Decay,
    Sustain,
    Release,
}

/// Four-stage envelope generator.
///
/// `gate(true)` always re-enters Attack from the current level rather than
/// zeroing, so fast retriggers stay legato. Attack and release ramp
/// linearly; decay approaches the sustain level exponentially.
#[derive(Clone, Copy, Debug)]
pub struct Adsr {
    pub settings: AdsrSettings,
    pub state: AdsrState,
    pub current_level: f32,
    sample_rate: f32,
}

impl Adsr {
    pub fn new(settings: AdsrSettings, sample_rate: f32) -> Self {
        Self {
            settings,
            state: AdsrState::Idle,
            current_level: 0.0,
            sample_rate: sample_rate.max(1.0),
        }
    }

    pub fn set_settings(&mut self, settings: AdsrSettings) {
        self.settings = settings;
    }

    pub fn gate(&mut self, on: bool) {
        if on {
            self.state = AdsrState::Attack;
        } else if self.state != AdsrState::Idle {
            self.state = AdsrState::Release;
        }
    }

    pub fn reset(&mut self) {
        self.state = AdsrState::Idle;
        self.current_level = 0.0;
    }

    pub fn is_active(&self) -> bool {
        self.state != AdsrState::Idle
    }

    pub fn process(&mut self) -> f32 {
        match self.state {
            AdsrState::Idle => 0.0,
            AdsrState::Attack => {
                let attack = self.settings.attack.max(MIN_STAGE_TIME);
                let attack_rate = 1.0 / (attack * self.sample_rate);
                self.current_level += attack_rate;

                if self.current_level >= 1.0 {
                    self.current_level = 1.0;
                    self.state = AdsrState::Decay;
                }
                self.current_level
            }
            AdsrState::Decay => {
                let decay = self.settings.decay.max(MIN_STAGE_TIME);
                let decay_rate = 5.0 / (decay * self.sample_rate);
                let sustain = self.settings.sustain.clamp(0.0, 1.0);
                self.current_level -= decay_rate * (self.current_level - sustain + DECAY_EPSILON);

                if (self.current_level - sustain).abs() <= DECAY_EPSILON {
                    self.current_level = sustain;
                    self.state = AdsrState::Sustain;
                }
                self.current_level
            }
            AdsrState::Sustain => {
                self.current_level = self.settings.sustain.clamp(0.0, 1.0);
                self.current_level
            }
            AdsrState::Release => {
                let release = self.settings.release.max(MIN_STAGE_TIME);
                let release_rate = 1.0 / (release * self.sample_rate);
                self.current_level -= release_rate;

                if self.current_level <= 0.0 {
                    self.current_level = 0.0;
                    self.state = AdsrState::Idle;
                }
                self.current_level
            }
        }
    }
}
