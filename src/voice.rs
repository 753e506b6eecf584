// src/voice.rs

//! One subtractive synth voice.
//!
//! Primary oscillator, a square sub-oscillator an octave down and a noise
//! source are blended, filtered and amplitude-enveloped. The filter cutoff
//! is modulated per sample by the filter envelope and the LFO's filter tap.
//! A voice self-retires once its amplitude envelope finishes.

use crate::dsp::{key_tracked_cutoff, Filter, FilterSettings, LfoTaps, Oscillator, OscillatorSettings};
use crate::synth::{Adsr, AdsrSettings, POW2_LUT};
use serde::{Deserialize, Serialize};

// Full-scale LFO filter tap swing in Hz.
const LFO_FILTER_RANGE_HZ: f32 = 3_000.0;

#[derive(Serialize, Deserialize, Clone, Copy, Debug)]
pub struct VoiceSettings {
    pub oscillator: OscillatorSettings,
    pub filter: FilterSettings,
    pub amp_env: AdsrSettings,
    pub filter_env: AdsrSettings,
    /// Filter envelope swing in Hz at full envelope level.
    pub filter_env_amount: f32,
    /// Sub-oscillator level relative to the primary (0.0 to 1.0).
    pub sub_mix: f32,
    /// Noise level relative to the primary (0.0 to 1.0).
    pub noise_mix: f32,
    pub glide_enabled: bool,
    /// Glide time in seconds; the exponential approach uses a fifth of this
    /// as its time constant.
    pub glide_time: f32,
}

impl Default for VoiceSettings {
    fn default() -> Self {
        Self {
            oscillator: OscillatorSettings::default(),
            filter: FilterSettings::default(),
            amp_env: AdsrSettings::default(),
            filter_env: AdsrSettings {
                attack: 0.005,
                decay: 0.3,
                sustain: 0.2,
                release: 0.3,
            },
            filter_env_amount: 0.0,
            sub_mix: 0.0,
            noise_mix: 0.0,
            glide_enabled: false,
            glide_time: 0.1,
        }
    }
}

pub struct Voice {
    note: Option<u8>,
    /// Allocation stamp; the pool steals the smallest.
    pub age: u64,
    velocity: f32,
    current_freq: f32,
    target_freq: f32,
    detune_ratio: f32,
    glide_coeff: f32,
    osc: Oscillator,
    sub_phase: f32,
    filter: Filter,
    amp_env: Adsr,
    filter_env: Adsr,
    sample_rate: f32,
}

impl Voice {
    pub fn new(sample_rate: f32) -> Self {
        let sample_rate = sample_rate.max(1.0);
        Self {
            note: None,
            age: 0,
            velocity: 0.0,
            current_freq: 440.0,
            target_freq: 440.0,
            detune_ratio: 1.0,
            glide_coeff: 1.0,
            osc: Oscillator::new(sample_rate),
            sub_phase: 0.0,
            filter: Filter::new(sample_rate),
            amp_env: Adsr::new(AdsrSettings::default(), sample_rate),
            filter_env: Adsr::new(AdsrSettings::default(), sample_rate),
            sample_rate,
        }
    }

    pub fn note(&self) -> Option<u8> {
        self.note
    }

    pub(crate) fn detune_ratio(&self) -> f32 {
        self.detune_ratio
    }

    pub fn is_active(&self) -> bool {
        self.amp_env.is_active()
    }

    pub fn note_on(
        &mut self,
        note: u8,
        freq: f32,
        velocity: f32,
        detune_ratio: f32,
        settings: &VoiceSettings,
    ) {
        self.amp_env.set_settings(settings.amp_env);
        self.filter_env.set_settings(settings.filter_env);

        let sounding = self.amp_env.is_active();
        if settings.glide_enabled && sounding {
            // Legato: keep phase and filter state, slide the pitch over.
            let tc = (settings.glide_time / 5.0).max(0.001);
            self.glide_coeff = 1.0 - (-1.0 / (tc * self.sample_rate)).exp();
        } else {
            self.current_freq = freq;
            self.glide_coeff = 1.0;
            self.osc.reset_phase();
            self.sub_phase = 0.0;
            self.filter.reset();
            // A sweep from the previous note's cutoff would be audible.
            let base = key_tracked_cutoff(
                settings.filter.cutoff_hz,
                freq,
                settings.filter.key_tracking,
            );
            self.filter.snap_to(base, settings.filter.resonance);
        }

        self.note = Some(note);
        self.target_freq = freq;
        self.detune_ratio = detune_ratio;
        self.velocity = velocity.clamp(0.0, 1.0);
        self.amp_env.gate(true);
        self.filter_env.gate(true);
    }

    /// Release if this voice is sounding `note`.
    pub fn note_off(&mut self, note: u8) {
        if self.note == Some(note) {
            self.amp_env.gate(false);
            self.filter_env.gate(false);
        }
    }

    pub fn release(&mut self) {
        self.amp_env.gate(false);
        self.filter_env.gate(false);
    }

    #[inline]
    pub fn process(&mut self, settings: &VoiceSettings, lfo: &LfoTaps) -> f32 {
        if !self.amp_env.is_active() {
            return 0.0;
        }

        self.current_freq += (self.target_freq - self.current_freq) * self.glide_coeff;
        let pitch_ratio = POW2_LUT.get_interpolated(lfo.pitch_semitones);
        let freq = self.current_freq * self.detune_ratio * pitch_ratio;

        let mut osc_settings = settings.oscillator;
        osc_settings.pulse_width += lfo.pulse_width;
        let primary = self.osc.process(freq, &osc_settings);

        // Sub-oscillator: always square, one octave down.
        self.sub_phase = (self.sub_phase + freq * 0.5 / self.sample_rate) % 1.0;
        let sub = if self.sub_phase < 0.5 { 1.0 } else { -1.0 };

        let noise = rand::random::<f32>() * 2.0 - 1.0;

        let sub_mix = settings.sub_mix.clamp(0.0, 1.0);
        let noise_mix = settings.noise_mix.clamp(0.0, 1.0);
        let mixed = (primary + sub * sub_mix + noise * noise_mix) / (1.0 + sub_mix + noise_mix);

        let env_level = self.filter_env.process();
        let base_cutoff = key_tracked_cutoff(
            settings.filter.cutoff_hz,
            self.target_freq,
            settings.filter.key_tracking,
        );
        let cutoff = base_cutoff
            + settings.filter_env_amount * env_level
            + lfo.filter * LFO_FILTER_RANGE_HZ;

        let filtered = self.filter.process(mixed, cutoff, &settings.filter);

        let amp = self.amp_env.process();
        if !self.amp_env.is_active() {
            self.note = None;
        }

        filtered * amp * self.velocity
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dsp::WaveformSet;

    const SR: f32 = 48_000.0;

    fn open_settings() -> VoiceSettings {
        VoiceSettings {
            oscillator: OscillatorSettings {
                waveforms: WaveformSet::SINE,
                pulse_width: 0.5,
            },
            filter: FilterSettings {
                cutoff_hz: 20_000.0,
                resonance: 0.0,
                key_tracking: 0.0,
                highpass_hz: 0.0,
            },
            amp_env: AdsrSettings {
                attack: 0.001,
                decay: 0.01,
                sustain: 1.0,
                release: 0.01,
            },
            ..VoiceSettings::default()
        }
    }

    #[test]
    fn voice_sounds_then_self_retires() {
        let settings = open_settings();
        let mut voice = Voice::new(SR);
        let taps = LfoTaps::default();
        assert!(!voice.is_active());

        voice.note_on(60, 261.63, 1.0, 1.0, &settings);
        assert!(voice.is_active());
        let mut peak = 0.0f32;
        for _ in 0..4_800 {
            peak = peak.max(voice.process(&settings, &taps).abs());
        }
        assert!(peak > 0.3, "voice was silent ({})", peak);

        voice.note_off(60);
        for _ in 0..4_800 {
            voice.process(&settings, &taps);
        }
        assert!(!voice.is_active());
        assert_eq!(voice.note(), None);
        assert_eq!(voice.process(&settings, &taps), 0.0);
    }

    #[test]
    fn note_off_for_other_note_is_ignored() {
        let settings = open_settings();
        let mut voice = Voice::new(SR);
        voice.note_on(60, 261.63, 1.0, 1.0, &settings);
        voice.note_off(61);
        for _ in 0..100 {
            voice.process(&settings, &LfoTaps::default());
        }
        assert!(voice.is_active());
    }

    #[test]
    fn glide_slides_pitch_instead_of_jumping() {
        let mut settings = open_settings();
        settings.glide_enabled = true;
        settings.glide_time = 0.5;

        let mut voice = Voice::new(SR);
        let taps = LfoTaps::default();
        voice.note_on(57, 220.0, 1.0, 1.0, &settings);
        for _ in 0..1_000 {
            voice.process(&settings, &taps);
        }

        // Legato note an octave up: pitch must pass through the middle.
        voice.note_on(69, 440.0, 1.0, 1.0, &settings);
        for _ in 0..1_000 {
            voice.process(&settings, &taps);
        }
        assert!(voice.current_freq > 225.0, "{}", voice.current_freq);
        assert!(voice.current_freq < 435.0, "{}", voice.current_freq);

        // Eventually it converges.
        for _ in 0..(SR as usize) {
            voice.process(&settings, &taps);
        }
        assert!((voice.current_freq - 440.0).abs() < 1.0);
    }

    #[test]
    fn detune_ratio_shifts_frequency() {
        let settings = open_settings();
        let taps = LfoTaps::default();
        let count_crossings = |ratio: f32| {
            let mut voice = Voice::new(SR);
            voice.note_on(69, 440.0, 1.0, ratio, &settings);
            let mut crossings = 0;
            let mut last = 0.0f32;
            for _ in 0..(SR as usize) {
                let s = voice.process(&settings, &taps);
                if last < 0.0 && s >= 0.0 {
                    crossings += 1;
                }
                last = s;
            }
            crossings
        };
        let base = count_crossings(1.0);
        let up = count_crossings(1.5);
        assert!((base as i32 - 440).abs() < 10, "base {}", base);
        assert!((up as i32 - 660).abs() < 10, "detuned {}", up);
    }
}
