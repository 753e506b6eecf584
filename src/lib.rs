// src/lib.rs

//! Real-time polyphonic synthesizer and live-looping engine.
//!
//! The audio thread owns an [`audio_engine::AudioEngine`] and calls
//! [`audio_engine::AudioEngine::render`] once per callback; everything else
//! goes through the [`audio_engine::EngineController`] handle.

pub mod audio_engine;
pub mod audio_io;
pub mod drum_machine;
pub mod drums;
pub mod dsp;
pub mod fx;
pub mod looper;
pub mod poly;
pub mod preset;
pub mod synth;
pub mod voice;
pub mod wurlitzer;

pub use audio_engine::{AudioEngine, EngineController, RenderStatus, SynthMode};
pub use audio_io::AudioIo;
pub use preset::EnginePreset;
