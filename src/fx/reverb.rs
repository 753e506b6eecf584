// src/fx/reverb.rs

//! Schroeder-style stereo reverb.
//!
//! Four parallel comb filters per channel feed two series all-pass
//! diffusers. The right channel's comb delays are offset by a handful of
//! samples so the tail decorrelates into real stereo width. Room size maps
//! onto comb feedback; damping is a one-pole low-pass inside each comb's
//! feedback loop.

use serde::{Deserialize, Serialize};

// Prime delay lengths (samples at 44.1 kHz) avoid periodic artifacts.
const COMB_DELAYS: [f32; 4] = [1117.0, 1187.0, 1277.0, 1351.0];
const ALLPASS_DELAYS: [f32; 2] = [223.0, 557.0];
// Per-comb offset added on the right channel for stereo spread.
const STEREO_SPREAD: f32 = 23.0;

const MIN_FEEDBACK: f32 = 0.5;
const MAX_FEEDBACK: f32 = 0.95;

#[derive(Serialize, Deserialize, Clone, Copy, Debug)]
pub struct ReverbSettings {
    /// Room size (0.0 to 1.0) mapped onto comb feedback.
    pub room_size: f32,
    /// High-frequency damping of the tail (0.0 to 1.0).
    pub damping: f32,
    pub mix: f32,
}

impl Default for ReverbSettings {
    fn default() -> Self {
        Self {
            room_size: 0.5,
            damping: 0.5,
            mix: 0.0,
        }
    }
}

/// One-pole low-pass used to darken the tail inside each comb loop.
#[derive(Debug, Clone, Copy, Default)]
struct DampingFilter {
    z1: f32,
}

impl DampingFilter {
    #[inline(always)]
    fn process(&mut self, input: f32, coeff: f32) -> f32 {
        let output = input * (1.0 - coeff) + self.z1 * coeff;
        self.z1 = output;
        output
    }
}

struct CombFilter {
    buffer: Vec<f32>,
    write_pos: usize,
    damping_filter: DampingFilter,
}

impl CombFilter {
    fn new(delay_samples: usize) -> Self {
        Self {
            buffer: vec![0.0; delay_samples.max(1)],
            write_pos: 0,
            damping_filter: DampingFilter::default(),
        }
    }

    #[inline(always)]
    fn process(&mut self, input: f32, feedback: f32, damping: f32) -> f32 {
        let output = self.buffer[self.write_pos];
        let damped = self.damping_filter.process(output, damping);
        self.buffer[self.write_pos] = input + damped * feedback;
        self.write_pos = (self.write_pos + 1) % self.buffer.len();
        output
    }

    fn clear(&mut self) {
        self.buffer.fill(0.0);
        self.damping_filter = DampingFilter::default();
    }
}

/// Smears phase to raise echo density without coloring the spectrum.
struct AllPassFilter {
    buffer: Vec<f32>,
    write_pos: usize,
}

impl AllPassFilter {
    fn new(delay_samples: usize) -> Self {
        Self {
            buffer: vec![0.0; delay_samples.max(1)],
            write_pos: 0,
        }
    }

    #[inline(always)]
    fn process(&mut self, input: f32) -> f32 {
        let delayed = self.buffer[self.write_pos];
        let output = -input + delayed;
        self.buffer[self.write_pos] = input + delayed * 0.5; // G = 0.5 (fixed)
        self.write_pos = (self.write_pos + 1) % self.buffer.len();
        output
    }

    fn clear(&mut self) {
        self.buffer.fill(0.0);
    }
}

struct ReverbChannel {
    combs: [CombFilter; 4],
    allpasses: [AllPassFilter; 2],
}

impl ReverbChannel {
    fn new(sample_rate: f32, spread: f32) -> Self {
        let sr_factor = sample_rate / 44_100.0;
        let comb = |base: f32| CombFilter::new(((base + spread) * sr_factor).round() as usize);
        let allpass = |base: f32| AllPassFilter::new((base * sr_factor).round() as usize);
        Self {
            combs: [
                comb(COMB_DELAYS[0]),
                comb(COMB_DELAYS[1]),
                comb(COMB_DELAYS[2]),
                comb(COMB_DELAYS[3]),
            ],
            allpasses: [allpass(ALLPASS_DELAYS[0]), allpass(ALLPASS_DELAYS[1])],
        }
    }

    #[inline]
    fn process(&mut self, input: f32, feedback: f32, damping: f32) -> f32 {
        let comb_out = self
            .combs
            .iter_mut()
            .map(|c| c.process(input, feedback, damping))
            .sum::<f32>()
            * 0.25;
        self.allpasses
            .iter_mut()
            .fold(comb_out, |acc, ap| ap.process(acc))
    }

    fn clear(&mut self) {
        self.combs.iter_mut().for_each(CombFilter::clear);
        self.allpasses.iter_mut().for_each(AllPassFilter::clear);
    }
}

pub struct Reverb {
    settings: ReverbSettings,
    left: ReverbChannel,
    right: ReverbChannel,
}

impl Reverb {
    pub fn new(sample_rate: f32) -> Self {
        let sample_rate = sample_rate.max(1.0);
        Self {
            settings: ReverbSettings::default(),
            left: ReverbChannel::new(sample_rate, 0.0),
            right: ReverbChannel::new(sample_rate, STEREO_SPREAD),
        }
    }

    pub fn set_settings(&mut self, settings: ReverbSettings) {
        self.settings = ReverbSettings {
            room_size: settings.room_size.clamp(0.0, 1.0),
            damping: settings.damping.clamp(0.0, 1.0),
            mix: settings.mix.clamp(0.0, 1.0),
        };
    }

    pub fn settings(&self) -> ReverbSettings {
        self.settings
    }

    pub fn clear(&mut self) {
        self.left.clear();
        self.right.clear();
    }

    #[inline]
    pub fn process(&mut self, left: f32, right: f32) -> (f32, f32) {
        let mix = self.settings.mix;
        if mix <= 0.0 {
            return (left, right);
        }

        let feedback = MIN_FEEDBACK + self.settings.room_size * (MAX_FEEDBACK - MIN_FEEDBACK);
        let damping = self.settings.damping.powf(2.0) * 0.4 + 0.05;

        let wet_l = self.left.process(left, feedback, damping);
        let wet_r = self.right.process(right, feedback, damping);

        (left + wet_l * mix, right + wet_r * mix)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn impulse_produces_a_decaying_tail() {
        let mut reverb = Reverb::new(48_000.0);
        reverb.set_settings(ReverbSettings {
            room_size: 0.5,
            damping: 0.3,
            mix: 1.0,
        });

        let mut early = 0.0f32;
        let mut late = 0.0f32;
        for i in 0..96_000 {
            let input = if i == 0 { 1.0 } else { 0.0 };
            let (l, r) = reverb.process(input, input);
            let wet = (l - input).abs().max((r - input).abs());
            assert!(wet.is_finite());
            if (4_800..24_000).contains(&i) {
                early = early.max(wet);
            } else if i >= 72_000 {
                late = late.max(wet);
            }
        }
        assert!(early > 0.01, "no tail appeared ({})", early);
        assert!(late < early, "tail did not decay ({} vs {})", late, early);
    }

    #[test]
    fn max_room_size_stays_stable() {
        let mut reverb = Reverb::new(48_000.0);
        reverb.set_settings(ReverbSettings {
            room_size: 1.0,
            damping: 0.0,
            mix: 1.0,
        });
        let mut peak = 0.0f32;
        for i in 0..(48_000 * 5) {
            let input = if i % 4_800 == 0 { 0.5 } else { 0.0 };
            let (l, r) = reverb.process(input, input);
            assert!(l.is_finite() && r.is_finite());
            peak = peak.max(l.abs()).max(r.abs());
        }
        assert!(peak < 10.0, "reverb runaway, peak {}", peak);
    }

    #[test]
    fn channels_decorrelate() {
        let mut reverb = Reverb::new(48_000.0);
        reverb.set_settings(ReverbSettings {
            room_size: 0.7,
            damping: 0.5,
            mix: 1.0,
        });
        let mut diff = 0.0f32;
        for i in 0..48_000 {
            let input = if i == 0 { 1.0 } else { 0.0 };
            let (l, r) = reverb.process(input, input);
            diff = diff.max((l - r).abs());
        }
        assert!(diff > 1e-4, "stereo spread missing ({})", diff);
    }
}
