// src/fx/delay.rs

//! Stereo feedback delay with a damped feedback path.
//!
//! Each channel owns a circular buffer read with linear interpolation; a
//! one-pole low-pass inside the feedback loop keeps repeats warm instead of
//! brittle.

use serde::{Deserialize, Serialize};

pub const MIN_TIME_SECS: f32 = 0.05;
pub const MAX_TIME_SECS: f32 = 0.5;
pub const MAX_FEEDBACK: f32 = 0.8;

// Smoothing for delay-time changes, to avoid zipper noise.
const SMOOTHING_COEFF: f32 = 0.9995;

#[derive(Serialize, Deserialize, Clone, Copy, Debug)]
pub struct DelaySettings {
    pub time_secs: f32,
    pub feedback: f32,
    /// High-frequency damping in the feedback path (0.0 to 1.0).
    pub damping: f32,
    pub mix: f32,
}

impl Default for DelaySettings {
    fn default() -> Self {
        Self {
            time_secs: 0.25,
            feedback: 0.35,
            damping: 0.5,
            mix: 0.0,
        }
    }
}

/// A simple one-pole low-pass filter used for damping the feedback signal.
#[derive(Debug, Default, Clone, Copy)]
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

struct DelayLine {
    buffer: Vec<f32>,
    write_pos: usize,
    damping_filter: DampingFilter,
}

impl DelayLine {
    fn new(max_samples: usize) -> Self {
        Self {
            buffer: vec![0.0; max_samples.max(1)],
            write_pos: 0,
            damping_filter: DampingFilter::default(),
        }
    }

    #[inline]
    fn write(&mut self, sample: f32) {
        self.buffer[self.write_pos] = sample;
        self.write_pos = (self.write_pos + 1) % self.buffer.len();
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

    fn clear(&mut self) {
        self.buffer.fill(0.0);
        self.damping_filter = DampingFilter::default();
    }
}

pub struct Delay {
    settings: DelaySettings,
    left: DelayLine,
    right: DelayLine,
    sample_rate: f32,
    smoothed_time: f32,
}

impl Delay {
    pub fn new(sample_rate: f32) -> Self {
        let sample_rate = sample_rate.max(1.0);
        let max_samples = (MAX_TIME_SECS * sample_rate).ceil() as usize + 2;
        let settings = DelaySettings::default();
        Self {
            left: DelayLine::new(max_samples),
            right: DelayLine::new(max_samples),
            sample_rate,
            smoothed_time: settings.time_secs,
            settings,
        }
    }

    pub fn set_settings(&mut self, settings: DelaySettings) {
        self.settings = DelaySettings {
            time_secs: settings.time_secs.clamp(MIN_TIME_SECS, MAX_TIME_SECS),
            feedback: settings.feedback.clamp(0.0, MAX_FEEDBACK),
            damping: settings.damping.clamp(0.0, 1.0),
            mix: settings.mix.clamp(0.0, 1.0),
        };
    }

    pub fn settings(&self) -> DelaySettings {
        self.settings
    }

    pub fn clear(&mut self) {
        self.left.clear();
        self.right.clear();
    }

    #[inline]
    pub fn process(&mut self, left: f32, right: f32) -> (f32, f32) {
        self.smoothed_time = SMOOTHING_COEFF * self.smoothed_time
            + (1.0 - SMOOTHING_COEFF) * self.settings.time_secs;
        let delay_samples = self.smoothed_time * self.sample_rate;

        let wet_l = self.left.read(delay_samples);
        let wet_r = self.right.read(delay_samples);

        // The line keeps running while the mix is zero, so re-enabling it
        // finds live history and a feedback tail rings out instead of
        // vanishing.
        let damping = self.settings.damping;
        let feedback = self.settings.feedback;
        let fb_l = self.left.damping_filter.process(wet_l, damping) * feedback;
        let fb_r = self.right.damping_filter.process(wet_r, damping) * feedback;

        self.left.write((left + fb_l).clamp(-1.0, 1.0));
        self.right.write((right + fb_r).clamp(-1.0, 1.0));

        let mix = self.settings.mix;
        if mix <= 0.0 {
            return (left, right);
        }
        (left + wet_l * mix, right + wet_r * mix)
    }
}
