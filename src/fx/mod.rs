// src/fx/mod.rs

// Declare all shared effect modules
pub mod chorus;
pub mod delay;
pub mod reverb;
pub mod tremolo;

pub use chorus::{Chorus, ChorusMode, ChorusSettings};
pub use delay::{Delay, DelaySettings};
pub use reverb::{Reverb, ReverbSettings};
pub use tremolo::{Tremolo, TremoloSettings};
