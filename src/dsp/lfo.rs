// src/dsp/lfo.rs

//! Triangle low-frequency oscillator with fixed modulation taps.
//!
//! One raw triangle value per sample feeds three derived taps: pitch
//! (semitones), filter (normalized) and pulse width. The polyphony manager
//! ticks this once per sample and broadcasts the taps to every voice.

use serde::{Deserialize, Serialize};

pub const MIN_RATE_HZ: f32 = 0.1;
pub const MAX_RATE_HZ: f32 = 20.0;

// Tap scaling: full-depth modulation swings.
const PITCH_RANGE_SEMITONES: f32 = 2.0;
const FILTER_RANGE: f32 = 1.0;
const PULSE_WIDTH_RANGE: f32 = 0.4;

#[derive(Serialize, Deserialize, Clone, Copy, Debug)]
pub struct LfoSettings {
    pub rate_hz: f32,
    pub depth: f32,
}

impl Default for LfoSettings {
    fn default() -> Self {
        Self {
            rate_hz: 5.0,
            depth: 0.0,
        }
    }
}

/// The three derived modulation values for one sample.
#[derive(Clone, Copy, Debug, Default)]
pub struct LfoTaps {
    /// Pitch offset in semitones (+/- 2 * depth).
    pub pitch_semitones: f32,
    /// Filter modulation (+/- 1 * depth), scaled by the voice.
    pub filter: f32,
    /// Pulse width offset (+/- 0.4 * depth).
    pub pulse_width: f32,
}

pub struct Lfo {
    phase: f32,
    sample_rate: f32,
}

impl Lfo {
    pub fn new(sample_rate: f32) -> Self {
        Self {
            phase: 0.0,
            sample_rate: sample_rate.max(1.0),
        }
    }

    pub fn reset_phase(&mut self) {
        self.phase = 0.0;
    }

    /// Advance one sample and return the modulation taps.
    #[inline]
    pub fn process(&mut self, settings: &LfoSettings) -> LfoTaps {
        let rate = settings.rate_hz.clamp(MIN_RATE_HZ, MAX_RATE_HZ);
        self.phase = (self.phase + rate / self.sample_rate) % 1.0;

        let raw = 1.0 - 4.0 * (self.phase - 0.5).abs();
        let depth = settings.depth.clamp(0.0, 1.0);

        LfoTaps {
            pitch_semitones: raw * PITCH_RANGE_SEMITONES * depth,
            filter: raw * FILTER_RANGE * depth,
            pulse_width: raw * PULSE_WIDTH_RANGE * depth,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn taps_scale_with_depth() {
        let mut lfo = Lfo::new(48_000.0);
        let settings = LfoSettings {
            rate_hz: 2.0,
            depth: 0.5,
        };
        let mut max_pitch = 0.0f32;
        let mut max_pw = 0.0f32;
        for _ in 0..48_000 {
            let taps = lfo.process(&settings);
            max_pitch = max_pitch.max(taps.pitch_semitones.abs());
            max_pw = max_pw.max(taps.pulse_width.abs());
        }
        assert!((max_pitch - 1.0).abs() < 0.01, "pitch swing {}", max_pitch);
        assert!((max_pw - 0.2).abs() < 0.01, "pw swing {}", max_pw);
    }

    #[test]
    fn rate_is_clamped() {
        let mut lfo = Lfo::new(48_000.0);
        let settings = LfoSettings {
            rate_hz: 500.0,
            depth: 1.0,
        };
        // One second at a clamped 20 Hz: raw value crosses zero 40 times.
        let mut crossings = 0;
        let mut last = 0.0f32;
        for _ in 0..48_000 {
            let taps = lfo.process(&settings);
            if last != 0.0 && taps.filter.signum() != last.signum() {
                crossings += 1;
            }
            last = taps.filter;
        }
        assert!((38..=42).contains(&crossings), "{} crossings", crossings);
    }
}
