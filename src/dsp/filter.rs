// src/dsp/filter.rs

//! Resonant two-pole low-pass with a one-pole high-pass second stage.
//!
//! The low-pass can be pushed towards self-oscillation: resonance maps
//! nonlinearly onto Q, and the output runs through a soft saturator plus
//! resonance gain compensation so runaway feedback stays bounded. When the
//! high-pass cutoff sits below 1 Hz the stage is bypassed in favor of a
//! fixed subtle bass boost.

use crate::synth::soft_limit;
use serde::{Deserialize, Serialize};
use std::f32::consts::TAU;

pub const MIN_CUTOFF_HZ: f32 = 20.0;
pub const MAX_CUTOFF_HZ: f32 = 20_000.0;

// Gain applied instead of the high-pass when its cutoff is below 1 Hz.
const BASS_BOOST: f32 = 1.12;

// Coefficients are only recomputed once the smoothed cutoff (or the
// resonance, expressed on the same scale) has moved by more than 1 Hz.
const RECOMPUTE_THRESHOLD_HZ: f32 = 1.0;

// One-pole smoothing applied to cutoff and resonance targets.
const SMOOTHING_COEFF: f32 = 0.999;

#[derive(Serialize, Deserialize, Clone, Copy, Debug)]
pub struct FilterSettings {
    /// Base low-pass cutoff in Hz.
    pub cutoff_hz: f32,
    /// Resonance (0.0 to 1.0); above 0.95 the Q climbs steeply towards
    /// self-oscillation.
    pub resonance: f32,
    /// Key tracking amount (0.0 to 1.0).
    pub key_tracking: f32,
    /// High-pass cutoff in Hz; below 1 Hz the stage becomes a bass boost.
    pub highpass_hz: f32,
}

impl Default for FilterSettings {
    fn default() -> Self {
        Self {
            cutoff_hz: 8_000.0,
            resonance: 0.2,
            key_tracking: 0.0,
            highpass_hz: 0.0,
        }
    }
}

/// Offset the target cutoff by the played note, middle C neutral.
#[inline]
pub fn key_tracked_cutoff(base_hz: f32, note_freq: f32, tracking: f32) -> f32 {
    if tracking <= 0.0 {
        return base_hz;
    }
    let offset = (note_freq.max(1.0) / 261.63).log2() * 2_000.0 * tracking;
    base_hz + offset
}

pub struct Filter {
    sample_rate: f32,
    // Biquad history (direct form I).
    x1: f32,
    x2: f32,
    y1: f32,
    y2: f32,
    // Normalized coefficients.
    b0: f32,
    b1: f32,
    b2: f32,
    a1: f32,
    a2: f32,
    smoothed_cutoff: f32,
    smoothed_resonance: f32,
    // Values the current coefficients were computed from.
    coeff_cutoff: f32,
    coeff_resonance: f32,
    // High-pass stage history.
    hp_x1: f32,
    hp_y1: f32,
}

impl Filter {
    pub fn new(sample_rate: f32) -> Self {
        let mut filter = Self {
            sample_rate: sample_rate.max(1.0),
            x1: 0.0,
            x2: 0.0,
            y1: 0.0,
            y2: 0.0,
            b0: 0.0,
            b1: 0.0,
            b2: 0.0,
            a1: 0.0,
            a2: 0.0,
            smoothed_cutoff: 8_000.0,
            smoothed_resonance: 0.0,
            coeff_cutoff: 0.0,
            coeff_resonance: 0.0,
            hp_x1: 0.0,
            hp_y1: 0.0,
        };
        filter.recompute();
        filter
    }

    pub fn reset(&mut self) {
        self.x1 = 0.0;
        self.x2 = 0.0;
        self.y1 = 0.0;
        self.y2 = 0.0;
        self.hp_x1 = 0.0;
        self.hp_y1 = 0.0;
    }

    /// Jump the smoothers straight to a target, for note starts where a
    /// sweep from the previous voice's cutoff would be audible.
    pub fn snap_to(&mut self, cutoff_hz: f32, resonance: f32) {
        self.smoothed_cutoff = cutoff_hz.clamp(MIN_CUTOFF_HZ, MAX_CUTOFF_HZ);
        self.smoothed_resonance = resonance.clamp(0.0, 1.0);
        self.recompute();
    }

    /// Resonance to Q: musical range up to 0.95, then a steep climb to 50
    /// so the filter approaches self-oscillation without blowing up.
    fn q_from_resonance(resonance: f32) -> f32 {
        if resonance <= 0.95 {
            0.707 + (resonance / 0.95) * (15.0 - 0.707)
        } else {
            15.0 + ((resonance - 0.95) / 0.05) * (50.0 - 15.0)
        }
    }

    fn recompute(&mut self) {
        let cutoff = self.smoothed_cutoff.clamp(MIN_CUTOFF_HZ, MAX_CUTOFF_HZ);
        // Keep the analog prototype well below Nyquist.
        let cutoff = cutoff.min(self.sample_rate * 0.45);
        let q = Self::q_from_resonance(self.smoothed_resonance.clamp(0.0, 1.0));

        let omega = TAU * cutoff / self.sample_rate;
        let (sin_w, cos_w) = omega.sin_cos();
        let alpha = sin_w / (2.0 * q);

        let a0 = 1.0 + alpha;
        self.b0 = ((1.0 - cos_w) / 2.0) / a0;
        self.b1 = (1.0 - cos_w) / a0;
        self.b2 = self.b0;
        self.a1 = (-2.0 * cos_w) / a0;
        self.a2 = (1.0 - alpha) / a0;

        self.coeff_cutoff = self.smoothed_cutoff;
        self.coeff_resonance = self.smoothed_resonance;
    }

    /// Process one sample. `target_cutoff_hz` is the fully modulated cutoff
    /// (base + envelope + LFO + key tracking); it is clamped here.
    #[inline]
    pub fn process(&mut self, input: f32, target_cutoff_hz: f32, settings: &FilterSettings) -> f32 {
        let target_cutoff = target_cutoff_hz.clamp(MIN_CUTOFF_HZ, MAX_CUTOFF_HZ);
        let target_resonance = settings.resonance.clamp(0.0, 1.0);

        self.smoothed_cutoff =
            SMOOTHING_COEFF * self.smoothed_cutoff + (1.0 - SMOOTHING_COEFF) * target_cutoff;
        self.smoothed_resonance =
            SMOOTHING_COEFF * self.smoothed_resonance + (1.0 - SMOOTHING_COEFF) * target_resonance;

        let resonance_moved =
            (self.smoothed_resonance - self.coeff_resonance).abs() * MAX_CUTOFF_HZ;
        if (self.smoothed_cutoff - self.coeff_cutoff).abs() > RECOMPUTE_THRESHOLD_HZ
            || resonance_moved > RECOMPUTE_THRESHOLD_HZ
        {
            self.recompute();
        }

        let output = self.b0 * input + self.b1 * self.x1 + self.b2 * self.x2
            - self.a1 * self.y1
            - self.a2 * self.y2;
        self.x2 = self.x1;
        self.x1 = input;
        self.y2 = self.y1;

        // Saturate before the value re-enters the feedback taps; at high Q
        // this is what keeps self-oscillation bounded.
        let saturated = soft_limit(output);
        self.y1 = saturated;

        let compensated = saturated / (1.0 + 2.0 * self.smoothed_resonance);

        // Second stage: one-pole high-pass, or a fixed bass boost when the
        // requested corner is essentially DC.
        if settings.highpass_hz < 1.0 {
            compensated * BASS_BOOST
        } else {
            let hp_hz = settings.highpass_hz.min(self.sample_rate * 0.45);
            let coeff = (-TAU * hp_hz / self.sample_rate).exp();
            let hp = coeff * (self.hp_y1 + compensated - self.hp_x1);
            self.hp_x1 = compensated;
            self.hp_y1 = hp;
            hp
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f32::consts::TAU;

    const SR: f32 = 48_000.0;

    #[test]
    fn no_nan_or_inf_across_full_sweep() {
        // Full-scale sine sweep, 10 seconds of simulated audio, while the
        // cutoff and resonance sweep their whole documented ranges.
        let mut filter = Filter::new(SR);
        let total = (10.0 * SR) as usize;
        let mut phase = 0.0f32;
        for i in 0..total {
            let t = i as f32 / total as f32;
            let freq = 20.0 + t * 10_000.0;
            phase = (phase + freq / SR) % 1.0;
            let input = (phase * TAU).sin();

            let cutoff = MIN_CUTOFF_HZ + t * (MAX_CUTOFF_HZ - MIN_CUTOFF_HZ);
            let settings = FilterSettings {
                cutoff_hz: cutoff,
                resonance: t,
                key_tracking: 0.0,
                highpass_hz: 0.0,
            };
            let out = filter.process(input, cutoff, &settings);
            assert!(out.is_finite(), "non-finite output at sample {}", i);
        }
    }

    #[test]
    fn max_resonance_stays_bounded() {
        let mut filter = Filter::new(SR);
        filter.snap_to(1_000.0, 1.0);
        let settings = FilterSettings {
            cutoff_hz: 1_000.0,
            resonance: 1.0,
            key_tracking: 0.0,
            highpass_hz: 0.0,
        };
        let mut peak = 0.0f32;
        let mut phase = 0.0f32;
        for _ in 0..(SR as usize) {
            phase = (phase + 1_000.0 / SR) % 1.0;
            let out = filter.process((phase * TAU).sin(), 1_000.0, &settings);
            peak = peak.max(out.abs());
        }
        assert!(peak.is_finite());
        assert!(peak < 2.0, "resonance runaway, peak {}", peak);
    }

    #[test]
    fn attenuates_above_cutoff() {
        let mut filter = Filter::new(SR);
        filter.snap_to(500.0, 0.0);
        let settings = FilterSettings {
            cutoff_hz: 500.0,
            resonance: 0.0,
            key_tracking: 0.0,
            highpass_hz: 0.0,
        };
        // Drive with a 10 kHz sine, well above the 500 Hz corner.
        let mut phase = 0.0f32;
        let mut peak = 0.0f32;
        for i in 0..(SR as usize) {
            phase = (phase + 10_000.0 / SR) % 1.0;
            let out = filter.process((phase * TAU).sin(), 500.0, &settings);
            if i > 4_000 {
                peak = peak.max(out.abs());
            }
        }
        assert!(peak < 0.1, "expected strong attenuation, got {}", peak);
    }

    #[test]
    fn key_tracking_is_centered_on_middle_c() {
        let base = 2_000.0;
        assert_eq!(key_tracked_cutoff(base, 261.63, 1.0), base);
        assert!(key_tracked_cutoff(base, 523.26, 1.0) > base + 1_900.0);
        assert!(key_tracked_cutoff(base, 130.8, 1.0) < base - 1_900.0);
        assert_eq!(key_tracked_cutoff(base, 523.26, 0.0), base);
    }
}
