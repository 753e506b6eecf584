// src/preset.rs

use crate::audio_engine::{EngineController, EngineSettings};
use crate::drum_machine::DrumPattern;
use anyhow::Result;
use serde::{Deserialize, Serialize};

/// A full snapshot of the control-side state. Where the JSON ends up is
/// the caller's concern; this module only produces and consumes strings.
#[derive(Serialize, Deserialize, Clone, Copy, Debug)]
pub struct EnginePreset {
    pub settings: EngineSettings,
    pub pattern: DrumPattern,
    pub bpm: f32,
    pub master_volume: f32,
    pub drums_enabled: bool,
}

impl Default for EnginePreset {
    fn default() -> Self {
        Self {
            settings: EngineSettings::default(),
            pattern: DrumPattern::default(),
            bpm: 120.0,
            master_volume: 0.8,
            drums_enabled: false,
        }
    }
}

impl EnginePreset {
    pub fn capture(controller: &EngineController) -> Self {
        Self {
            settings: controller.settings_snapshot(),
            pattern: controller.pattern_snapshot(),
            bpm: controller.bpm(),
            master_volume: controller.master_volume(),
            drums_enabled: controller.drums_enabled(),
        }
    }

    pub fn apply(&self, controller: &EngineController) {
        controller.apply_settings(self.settings);
        controller.apply_pattern(self.pattern);
        controller.set_bpm(self.bpm);
        controller.set_master_volume(self.master_volume);
        controller.set_drums_enabled(self.drums_enabled);
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }
}
