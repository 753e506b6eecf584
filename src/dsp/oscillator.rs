// src/dsp/oscillator.rs

//! Band-limited periodic waveform generator.
//!
//! Several waveform kinds can sound at once; the blend is power-normalized
//! and soft-saturated so constructive peaks stay musical. Pulse and sawtooth
//! apply a polyBLEP correction at their discontinuities, using the current
//! phase increment as the correction window.

use crate::synth::FastTanh;
use serde::{Deserialize, Serialize};
use std::f32::consts::TAU;

/// Which waveform kinds are currently sounding.
///
/// An explicit capability set: "nothing enabled" is a legal, silent state
/// and `active_count` drives the power normalization.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq)]
pub struct WaveformSet {
    pub sine: bool,
    pub pulse: bool,
    pub saw: bool,
    pub triangle: bool,
}

impl WaveformSet {
    pub const SINE: Self = Self {
        sine: true,
        pulse: false,
        saw: false,
        triangle: false,
    };

    pub const SAW: Self = Self {
        sine: false,
        pulse: false,
        saw: true,
        triangle: false,
    };

    pub const PULSE: Self = Self {
        sine: false,
        pulse: true,
        saw: false,
        triangle: false,
    };

    pub fn active_count(&self) -> u32 {
        self.sine as u32 + self.pulse as u32 + self.saw as u32 + self.triangle as u32
    }

    pub fn is_silent(&self) -> bool {
        self.active_count() == 0
    }
}

impl Default for WaveformSet {
    fn default() -> Self {
        Self::SAW
    }
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug)]
pub struct OscillatorSettings {
    pub waveforms: WaveformSet,
    /// Pulse width (0.01 to 0.99). 0.5 is a square wave.
    pub pulse_width: f32,
}

impl Default for OscillatorSettings {
    fn default() -> Self {
        Self {
            waveforms: WaveformSet::default(),
            pulse_width: 0.5,
        }
    }
}

/// Polynomial band-limited step correction around a discontinuity at
/// phase 0. `t` is the phase in [0,1), `dt` the per-sample phase increment.
#[inline(always)]
fn poly_blep(t: f32, dt: f32) -> f32 {
    if t < dt {
        let t = t / dt;
        2.0 * t - t * t - 1.0
    } else if t > 1.0 - dt {
        let t = (t - 1.0) / dt;
        t * t + 2.0 * t + 1.0
    } else {
        0.0
    }
}

pub struct Oscillator {
    phase: f32,
    sample_rate: f32,
}

impl Oscillator {
    pub fn new(sample_rate: f32) -> Self {
        Self {
            phase: 0.0,
            sample_rate: sample_rate.max(1.0),
        }
    }

    pub fn reset_phase(&mut self) {
        self.phase = 0.0;
    }

    /// Render one sample at `frequency` Hz with the given settings.
    #[inline]
    pub fn process(&mut self, frequency: f32, settings: &OscillatorSettings) -> f32 {
        let dt = (frequency / self.sample_rate).clamp(0.0, 0.5);
        let t = self.phase;
        self.phase += dt;
        if self.phase >= 1.0 {
            self.phase -= 1.0;
        }

        let waves = settings.waveforms;
        let active = waves.active_count();
        if active == 0 {
            return 0.0;
        }

        let mut sum = 0.0;

        if waves.sine {
            sum += (t * TAU).sin();
        }

        if waves.pulse {
            // Clamped so the pulse never collapses into DC.
            let width = settings.pulse_width.clamp(0.01, 0.99);
            let mut pulse = if t < width { 1.0 } else { -1.0 };
            pulse += poly_blep(t, dt);
            // Second discontinuity at the falling edge.
            pulse -= poly_blep((t - width).rem_euclid(1.0), dt);
            sum += pulse;
        }

        if waves.saw {
            let mut saw = 2.0 * t - 1.0;
            saw -= poly_blep(t, dt);
            sum += saw;
        }

        if waves.triangle {
            sum += 1.0 - 4.0 * (t - 0.5).abs();
        }

        if active == 1 {
            return sum;
        }

        // Power normalization keeps the blend level roughly constant, and a
        // soft saturator catches the constructive peaks that remain.
        let normalized = sum / (active as f32).sqrt();
        normalized.fast_tanh()
    }
}
