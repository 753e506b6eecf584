// src/poly.rs

//! Polyphonic voice pool for the subtractive synth.
//!
//! Twelve slots. A note already sounding retriggers in place; otherwise a
//! free slot is used, and when none exists the slot with the smallest age
//! stamp is stolen. Unison stacks up to eight detuned slots on one note.
//! The pool owns the global LFO, the auto-gain stage, the soft limiter and
//! the stereo chorus.

use crate::dsp::{Lfo, LfoSettings, LfoTaps};
use crate::fx::{Chorus, ChorusSettings};
use crate::synth::{cents_to_ratio, soft_limit};
use crate::voice::{Voice, VoiceSettings};
use serde::{Deserialize, Serialize};

pub const NUM_VOICES: usize = 12;
pub const MAX_UNISON: usize = 8;

// Auto-gain smoothing per sample; fast enough to track chords, slow enough
// not to pump.
const GAIN_SMOOTHING: f32 = 0.9995;

#[derive(Serialize, Deserialize, Clone, Copy, Debug)]
pub struct PolySettings {
    pub voice: VoiceSettings,
    pub lfo: LfoSettings,
    pub chorus: ChorusSettings,
    /// Slots allocated per note-on (1 disables unison).
    pub unison_voices: usize,
    /// Detune spread in cents; slots span [-spread, +spread].
    pub unison_spread_cents: f32,
}

impl Default for PolySettings {
    fn default() -> Self {
        Self {
            voice: VoiceSettings::default(),
            lfo: LfoSettings::default(),
            chorus: ChorusSettings::default(),
            unison_voices: 1,
            unison_spread_cents: 10.0,
        }
    }
}

pub struct PolyphonyManager {
    voices: Vec<Voice>,
    age_counter: u64,
    lfo: Lfo,
    chorus: Chorus,
    smoothed_gain: f32,
}

impl PolyphonyManager {
    pub fn new(sample_rate: f32) -> Self {
        Self {
            voices: (0..NUM_VOICES).map(|_| Voice::new(sample_rate)).collect(),
            age_counter: 0,
            lfo: Lfo::new(sample_rate),
            chorus: Chorus::new(sample_rate),
            smoothed_gain: 1.0,
        }
    }

    /// Pick a slot for `note`, preferring (in order) a slot already sounding
    /// the note, a free slot, and finally the smallest-age steal. Slots in
    /// `taken` were claimed earlier in the same note-on.
    fn allocate(&self, note: u8, taken: &[usize]) -> usize {
        let free = |i: &usize| !taken.contains(i);

        if let Some(i) = (0..NUM_VOICES)
            .filter(free)
            .find(|&i| self.voices[i].note() == Some(note))
        {
            return i;
        }
        if let Some(i) = (0..NUM_VOICES)
            .filter(free)
            .find(|&i| !self.voices[i].is_active())
        {
            return i;
        }
        (0..NUM_VOICES)
            .filter(free)
            .min_by_key(|&i| self.voices[i].age)
            .unwrap_or(0)
    }

    pub fn note_on(&mut self, note: u8, freq: f32, velocity: f32, settings: &PolySettings) {
        let count = settings.unison_voices.clamp(1, MAX_UNISON);
        let spread = settings.unison_spread_cents.max(0.0);

        let mut taken = [usize::MAX; MAX_UNISON];
        for i in 0..count {
            let slot = self.allocate(note, &taken[..i]);
            taken[i] = slot;

            let cents = if count == 1 {
                0.0
            } else {
                -spread + 2.0 * spread * i as f32 / (count - 1) as f32
            };
            self.age_counter += 1;
            self.voices[slot].age = self.age_counter;
            self.voices[slot].note_on(note, freq, velocity, cents_to_ratio(cents), &settings.voice);
        }
    }

    /// Release every slot sounding `note` (all unison copies).
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

    /// Render one stereo sample.
    #[inline]
    pub fn process(&mut self, settings: &PolySettings) -> (f32, f32) {
        let taps: LfoTaps = self.lfo.process(&settings.lfo);

        let mut mix = 0.0;
        let mut active = 0usize;
        for voice in &mut self.voices {
            if voice.is_active() {
                mix += voice.process(&settings.voice, &taps);
                active += 1;
            }
        }

        let target_gain = 1.0 / (active.max(1) as f32).sqrt();
        self.smoothed_gain =
            GAIN_SMOOTHING * self.smoothed_gain + (1.0 - GAIN_SMOOTHING) * target_gain;

        let limited = soft_limit(mix * self.smoothed_gain);

        self.chorus.set_settings(settings.chorus);
        self.chorus.process(limited)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::synth::AdsrSettings;

    const SR: f32 = 48_000.0;

    fn sustain_settings() -> PolySettings {
        PolySettings {
            voice: VoiceSettings {
                amp_env: AdsrSettings {
                    attack: 0.001,
                    decay: 0.01,
                    sustain: 1.0,
                    release: 0.05,
                },
                ..VoiceSettings::default()
            },
            ..PolySettings::default()
        }
    }

    #[test]
    fn pool_steals_smallest_age() {
        let settings = sustain_settings();
        let mut pool = PolyphonyManager::new(SR);
        for note in 0..NUM_VOICES as u8 {
            pool.note_on(note, 220.0, 1.0, &settings);
        }
        assert_eq!(pool.active_voices(), NUM_VOICES);

        // Pool is full; the next note must evict note 0, the oldest.
        pool.note_on(100, 440.0, 1.0, &settings);
        assert_eq!(pool.active_voices(), NUM_VOICES);
        assert!(!pool.voices.iter().any(|v| v.note() == Some(0)));
        assert!(pool.voices.iter().any(|v| v.note() == Some(100)));
        assert!(pool.voices.iter().any(|v| v.note() == Some(1)));
    }

    #[test]
    fn retrigger_reuses_the_same_slot() {
        let settings = sustain_settings();
        let mut pool = PolyphonyManager::new(SR);
        pool.note_on(60, 261.63, 1.0, &settings);
        pool.note_on(60, 261.63, 1.0, &settings);
        assert_eq!(pool.active_voices(), 1);
    }

    #[test]
    fn unison_ratios_span_spread_symmetrically() {
        let mut settings = sustain_settings();
        settings.unison_voices = 5;
        settings.unison_spread_cents = 20.0;

        let mut pool = PolyphonyManager::new(SR);
        pool.note_on(69, 440.0, 1.0, &settings);
        assert_eq!(pool.active_voices(), 5);

        let mut cents: Vec<f32> = pool
            .voices
            .iter()
            .filter(|v| v.is_active())
            .map(|v| 1200.0 * v.detune_ratio().log2())
            .collect();
        cents.sort_by(|a, b| a.partial_cmp(b).unwrap());

        assert!((cents[0] + 20.0).abs() < 0.5, "low end {}", cents[0]);
        assert!((cents[4] - 20.0).abs() < 0.5, "high end {}", cents[4]);
        assert!(cents[2].abs() < 0.5, "center {}", cents[2]);
        // Symmetric pairs.
        assert!((cents[1] + cents[3]).abs() < 0.5);
    }

    #[test]
    fn note_off_releases_all_unison_slots() {
        let mut settings = sustain_settings();
        settings.unison_voices = 4;
        let mut pool = PolyphonyManager::new(SR);
        pool.note_on(60, 261.63, 1.0, &settings);
        assert_eq!(pool.active_voices(), 4);

        pool.note_off(60);
        // Release time is 50 ms; run past it.
        for _ in 0..(0.2 * SR) as usize {
            pool.process(&settings);
        }
        assert_eq!(pool.active_voices(), 0);
    }

    #[test]
    fn output_is_bounded_at_full_polyphony() {
        let settings = sustain_settings();
        let mut pool = PolyphonyManager::new(SR);
        for note in 48..(48 + NUM_VOICES as u8) {
            pool.note_on(note, 220.0 + note as f32, 1.0, &settings);
        }
        let mut peak = 0.0f32;
        for _ in 0..(SR as usize) {
            let (l, r) = pool.process(&settings);
            assert!(l.is_finite() && r.is_finite());
            peak = peak.max(l.abs()).max(r.abs());
        }
        assert!(peak <= 1.0, "limiter exceeded unity: {}", peak);
    }
}
