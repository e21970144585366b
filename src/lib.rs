//! voxfx - Real-time voice processing for speech capture
//!
//! Captures the voice, runs it through reverb, echo and time/pitch effects
//! for immediate playback, and records the raw input to a WAV file.

pub mod audio;

pub use audio::{EngineConfig, EngineController, EngineError};
