// src/dsp/mod.rs

// Declare all per-voice DSP building blocks
pub mod filter;
pub mod lfo;
pub mod oscillator;

pub use filter::{key_tracked_cutoff, Filter, FilterSettings};
pub use lfo::{Lfo, LfoSettings, LfoTaps};
pub use oscillator::{Oscillator, OscillatorSettings, WaveformSet};
