// src/drums.rs

//! Procedural drum voices: kick, snare and hi-hat, no samples.
//!
//! Each voice is retriggerable and self-retiring; `DrumSynth` owns one of
//! each and only sums voices that report active.

use std::f32::consts::{PI, TAU};

#[inline]
fn noise() -> f32 {
    rand::random::<f32>() * 2.0 - 1.0
}

// Voices retire once their envelope falls below this.
const SILENCE_FLOOR: f32 = 1e-4;

/// Kick: sine with an exponential pitch drop and a short noise click.
pub struct KickVoice {
    sample_rate: f32,
    phase: f32,
    freq: f32,
    amp: f32,
    gain: f32,
    click_remaining: usize,
    click_total: usize,
    pitch_coeff: f32,
    amp_coeff: f32,
    active: bool,
}

impl KickVoice {
    const START_FREQ: f32 = 150.0;
    const END_FREQ: f32 = 55.0;
    const CLICK_SECS: f32 = 0.002;

    pub fn new(sample_rate: f32) -> Self {
        let sample_rate = sample_rate.max(1.0);
        Self {
            sample_rate,
            phase: 0.0,
            freq: Self::END_FREQ,
            amp: 0.0,
            gain: 0.0,
            click_remaining: 0,
            click_total: (Self::CLICK_SECS * sample_rate) as usize,
            // Pitch falls with ~40 ms time constant, amplitude with ~110 ms.
            pitch_coeff: (-25.0 / sample_rate).exp(),
            amp_coeff: (-9.0 / sample_rate).exp(),
            active: false,
        }
    }

    pub fn trigger(&mut self, velocity: f32) {
        let velocity = velocity.clamp(0.0, 1.0);
        self.phase = 0.0;
        self.freq = Self::START_FREQ;
        self.amp = 1.0;
        // Squared velocity: soft hits much quieter than hard ones.
        self.gain = velocity * velocity;
        self.click_remaining = self.click_total;
        self.active = true;
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    #[inline]
    pub fn next_sample(&mut self) -> f32 {
        if !self.active {
            return 0.0;
        }

        self.phase = (self.phase + self.freq / self.sample_rate) % 1.0;
        let mut out = (self.phase * TAU).sin() * self.amp;

        if self.click_remaining > 0 {
            let fade = self.click_remaining as f32 / self.click_total.max(1) as f32;
            out += noise() * 0.4 * fade;
            self.click_remaining -= 1;
        }

        self.freq = Self::END_FREQ + (self.freq - Self::END_FREQ) * self.pitch_coeff;
        self.amp *= self.amp_coeff;
        if self.amp < SILENCE_FLOOR {
            self.active = false;
        }

        out * self.gain
    }
}

/// State-variable filter, bandpass output only. Keeps the snare wires
/// centered around one band instead of full-spectrum hiss.
struct BandpassSvf {
    f: f32,
    q: f32,
    low: f32,
    band: f32,
}

impl BandpassSvf {
    fn new(sample_rate: f32, center_hz: f32, q: f32) -> Self {
        let f = 2.0 * (PI * center_hz / sample_rate.max(1.0)).sin();
        Self {
            f: f.min(1.5),
            q,
            low: 0.0,
            band: 0.0,
        }
    }

    #[inline]
    fn process(&mut self, input: f32) -> f32 {
        self.low += self.f * self.band;
        let high = input - self.low - self.q * self.band;
        self.band += self.f * high;
        self.band
    }
}

/// Snare: 200 Hz body plus bandpassed noise, body decaying faster.
pub struct SnareVoice {
    sample_rate: f32,
    phase: f32,
    body_env: f32,
    noise_env: f32,
    gain: f32,
    body_coeff: f32,
    noise_coeff: f32,
    bandpass: BandpassSvf,
    active: bool,
}

impl SnareVoice {
    const BODY_FREQ: f32 = 200.0;
    const NOISE_CENTER_HZ: f32 = 3_500.0;

    pub fn new(sample_rate: f32) -> Self {
        let sample_rate = sample_rate.max(1.0);
        Self {
            sample_rate,
            phase: 0.0,
            body_env: 0.0,
            noise_env: 0.0,
            gain: 0.0,
            body_coeff: (-30.0 / sample_rate).exp(),
            noise_coeff: (-12.0 / sample_rate).exp(),
            bandpass: BandpassSvf::new(sample_rate, Self::NOISE_CENTER_HZ, 1.0),
            active: false,
        }
    }

    pub fn trigger(&mut self, velocity: f32) {
        self.phase = 0.0;
        self.body_env = 1.0;
        self.noise_env = 1.0;
        self.gain = velocity.clamp(0.0, 1.0);
        self.active = true;
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    #[inline]
    pub fn next_sample(&mut self) -> f32 {
        if !self.active {
            return 0.0;
        }

        self.phase = (self.phase + Self::BODY_FREQ / self.sample_rate) % 1.0;
        let body = (self.phase * TAU).sin() * self.body_env;
        let wires = self.bandpass.process(noise()) * self.noise_env;

        self.body_env *= self.body_coeff;
        self.noise_env *= self.noise_coeff;
        if self.noise_env < SILENCE_FLOOR {
            self.active = false;
        }

        (body * 0.4 + wires * 0.9) * self.gain
    }
}

/// One-pole high-pass, the metallic half of the hi-hat sound.
#[derive(Default)]
struct HighPass {
    x1: f32,
    y1: f32,
}

impl HighPass {
    #[inline]
    fn process(&mut self, input: f32, coeff: f32) -> f32 {
        let out = coeff * (self.y1 + input - self.x1);
        self.x1 = input;
        self.y1 = out;
        out
    }
}

/// Hi-hat: six inharmonic square oscillators plus noise, both high-passed.
pub struct HatVoice {
    sample_rate: f32,
    phases: [f32; 6],
    env: f32,
    gain: f32,
    env_coeff: f32,
    hp_coeff: f32,
    metal_hp: HighPass,
    noise_hp: HighPass,
    active: bool,
}

impl HatVoice {
    // Inharmonic cluster; their upper harmonics survive the high-pass and
    // make the metallic shimmer.
    const FREQS: [f32; 6] = [263.0, 400.0, 421.0, 474.0, 587.0, 845.0];
    const HP_CUTOFF_HZ: f32 = 7_000.0;
    const VELOCITY_FLOOR: f32 = 0.3;

    pub fn new(sample_rate: f32) -> Self {
        let sample_rate = sample_rate.max(1.0);
        Self {
            sample_rate,
            phases: [0.0; 6],
            env: 0.0,
            gain: 0.0,
            env_coeff: (-40.0 / sample_rate).exp(),
            hp_coeff: (-TAU * Self::HP_CUTOFF_HZ / sample_rate).exp(),
            metal_hp: HighPass::default(),
            noise_hp: HighPass::default(),
            active: false,
        }
    }

    pub fn trigger(&mut self, velocity: f32) {
        self.env = 1.0;
        // Ghost hits still tick audibly.
        self.gain = velocity.clamp(0.0, 1.0).max(Self::VELOCITY_FLOOR);
        self.active = true;
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    #[inline]
    pub fn next_sample(&mut self) -> f32 {
        if !self.active {
            return 0.0;
        }

        let mut metal = 0.0;
        for (phase, freq) in self.phases.iter_mut().zip(Self::FREQS) {
            *phase = (*phase + freq / self.sample_rate) % 1.0;
            metal += if *phase < 0.5 { 1.0 } else { -1.0 };
        }
        metal /= Self::FREQS.len() as f32;

        let metal = self.metal_hp.process(metal, self.hp_coeff);
        let hiss = self.noise_hp.process(noise(), self.hp_coeff);

        self.env *= self.env_coeff;
        if self.env < SILENCE_FLOOR {
            self.active = false;
        }

        (metal * 0.7 + hiss * 0.5) * self.env * self.gain
    }
}

/// One kick, one snare, one hat. Retriggering a voice cuts its tail, which
/// is the expected drum-machine behavior.
pub struct DrumSynth {
    pub kick: KickVoice,
    pub snare: SnareVoice,
    pub hat: HatVoice,
}

impl DrumSynth {
    pub fn new(sample_rate: f32) -> Self {
        Self {
            kick: KickVoice::new(sample_rate),
            snare: SnareVoice::new(sample_rate),
            hat: HatVoice::new(sample_rate),
        }
    }

    pub fn trigger_kick(&mut self, velocity: f32) {
        self.kick.trigger(velocity);
    }

    pub fn trigger_snare(&mut self, velocity: f32) {
        self.snare.trigger(velocity);
    }

    pub fn trigger_hat(&mut self, velocity: f32) {
        self.hat.trigger(velocity);
    }

    pub fn is_active(&self) -> bool {
        self.kick.is_active() || self.snare.is_active() || self.hat.is_active()
    }

    #[inline]
    pub fn next_sample(&mut self) -> f32 {
        let mut out = 0.0;
        if self.kick.is_active() {
            out += self.kick.next_sample();
        }
        if self.snare.is_active() {
            out += self.snare.next_sample();
        }
        if self.hat.is_active() {
            out += self.hat.next_sample();
        }
        out
    }
}
