//! Audio engine error types

use thiserror::Error;

/// Errors that can occur in the audio engine
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Input format unavailable: {0}")]
    FormatUnavailable(String),

    #[error("Voice processing unavailable: {0}")]
    VoiceProcessingUnavailable(String),

    #[error("Engine is already configured")]
    AlreadyConfigured,

    #[error("Engine is not configured")]
    NotConfigured,

    #[error("Failed to start engine: {0}")]
    StartFailed(String),

    #[error("Failed to create recording file: {0}")]
    FileCreateFailed(String),

    #[error("Invalid range: [{min}, {max}]")]
    InvalidRange { min: f32, max: f32 },

    #[error("Device not found: {0}")]
    DeviceNotFound(String),

    #[error("Stream error: {0}")]
    StreamError(String),

    #[error("Recording error: {0}")]
    RecordingError(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}
