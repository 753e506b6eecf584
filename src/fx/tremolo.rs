// src/fx/tremolo.rs

//! Amplitude tremolo with a vibes-style asymmetric curve.
//!
//! A sine LFO is reshaped so the dips are narrower than the swells, then
//! run through a short exponential follower so the gain never steps. Full
//! depth attenuates at most 70%, leaving the note audible at the bottom of
//! every cycle.

use serde::{Deserialize, Serialize};
use std::f32::consts::TAU;

pub const MIN_RATE_HZ: f32 = 0.1;
pub const MAX_RATE_HZ: f32 = 12.0;

// Deepest attenuation at full depth.
const MAX_ATTENUATION: f32 = 0.7;
// Follower lag, seconds.
const FOLLOWER_TC: f32 = 0.008;

#[derive(Serialize, Deserialize, Clone, Copy, Debug)]
pub struct TremoloSettings {
    pub rate_hz: f32,
    pub depth: f32,
}

impl Default for TremoloSettings {
    fn default() -> Self {
        Self {
            rate_hz: 5.5,
            depth: 0.0,
        }
    }
}

pub struct Tremolo {
    settings: TremoloSettings,
    phase: f32,
    smoothed_gain: f32,
    follower_coeff: f32,
    sample_rate: f32,
}

impl Tremolo {
    pub fn new(sample_rate: f32) -> Self {
        let sample_rate = sample_rate.max(1.0);
        Self {
            settings: TremoloSettings::default(),
            phase: 0.0,
            smoothed_gain: 1.0,
            follower_coeff: (-1.0 / (FOLLOWER_TC * sample_rate)).exp(),
            sample_rate,
        }
    }

    pub fn set_settings(&mut self, settings: TremoloSettings) {
        self.settings = TremoloSettings {
            rate_hz: settings.rate_hz.clamp(MIN_RATE_HZ, MAX_RATE_HZ),
            depth: settings.depth.clamp(0.0, 1.0),
        };
    }

    pub fn settings(&self) -> TremoloSettings {
        self.settings
    }

    /// Current smoothed gain, without advancing the LFO.
    pub fn gain(&self) -> f32 {
        self.smoothed_gain
    }

    #[inline]
    pub fn process(&mut self, left: f32, right: f32) -> (f32, f32) {
        let depth = self.settings.depth;
        if depth <= 0.0 {
            self.smoothed_gain = 1.0;
            return (left, right);
        }

        self.phase = (self.phase + self.settings.rate_hz / self.sample_rate) % 1.0;
        let raw = 0.5 + 0.5 * (self.phase * TAU).sin();
        // Skew towards the top of the cycle: squaring the attenuation term
        // keeps the gain high most of the time, with short dips.
        let inverted = 1.0 - raw;
        let shaped = 1.0 - inverted * inverted;
        let target = 1.0 - depth * MAX_ATTENUATION * (1.0 - shaped);

        self.smoothed_gain =
            self.follower_coeff * self.smoothed_gain + (1.0 - self.follower_coeff) * target;

        (left * self.smoothed_gain, right * self.smoothed_gain)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_depth_is_transparent() {
        let mut tremolo = Tremolo::new(48_000.0);
        for i in 0..256 {
            let x = (i as f32 * 0.01).sin();
            let (l, r) = tremolo.process(x, x);
            assert_eq!(l, x);
            assert_eq!(r, x);
        }
    }

    #[test]
    fn full_depth_dips_to_about_thirty_percent() {
        let mut tremolo = Tremolo::new(48_000.0);
        tremolo.set_settings(TremoloSettings {
            rate_hz: 2.0,
            depth: 1.0,
        });
        let mut min_gain = f32::MAX;
        let mut max_gain = 0.0f32;
        for _ in 0..48_000 {
            let (l, _) = tremolo.process(1.0, 1.0);
            min_gain = min_gain.min(l);
            max_gain = max_gain.max(l);
        }
        assert!((min_gain - 0.3).abs() < 0.05, "floor {}", min_gain);
        assert!(max_gain > 0.95, "ceiling {}", max_gain);
    }

    #[test]
    fn dips_are_shorter_than_swells() {
        let mut tremolo = Tremolo::new(48_000.0);
        tremolo.set_settings(TremoloSettings {
            rate_hz: 5.0,
            depth: 1.0,
        });
        // Let the follower settle through a few cycles first.
        for _ in 0..48_000 {
            tremolo.process(1.0, 1.0);
        }
        let gains: Vec<f32> = (0..48_000).map(|_| tremolo.process(1.0, 1.0).0).collect();
        let min = gains.iter().copied().fold(f32::MAX, f32::min);
        let max = gains.iter().copied().fold(0.0f32, f32::max);
        let midpoint = 0.5 * (min + max);

        let below = gains.iter().filter(|&&g| g < midpoint).count();
        let above = gains.len() - below;
        assert!(
            (below as f32) < 0.8 * above as f32,
            "curve is symmetric: {} below vs {} above the midpoint",
            below,
            above
        );
    }

    #[test]
    fn gain_changes_are_smoothed() {
        let mut tremolo = Tremolo::new(48_000.0);
        tremolo.set_settings(TremoloSettings {
            rate_hz: MAX_RATE_HZ,
            depth: 1.0,
        });
        let mut last = 1.0f32;
        for _ in 0..48_000 {
            let (l, _) = tremolo.process(1.0, 1.0);
            assert!((l - last).abs() < 0.01, "gain stepped {} -> {}", last, l);
            last = l;
        }
    }
}
