//! Audio engine module
//!
//! Handles capture, the effect chain, playback, level metering, recording
//! and the audio session lifecycle.

pub mod backend;
mod device;
pub mod effects;
mod engine;
mod error;
mod format;
pub mod graph;
mod mapping;
mod meter;
pub mod recording;
pub mod session;

pub use backend::{AudioBackend, AudioEvent, CpalBackend, OfflineBackend, OfflineHandle};
pub use device::{list_input_devices, list_output_devices, AudioDevice, DeviceId};
pub use effects::{EchoPreset, EffectParameters, ReverbPreset};
pub use engine::{CaptureContext, EngineConfig, EngineController, EngineState};
pub use error::EngineError;
pub use format::{AudioFormat, BitDepth, RecordingFormat};
pub use graph::Stage;
pub use mapping::{map_value, rate_from_control, try_map_value};
pub use meter::{LevelMeter, PowerLevel};
pub use recording::{RecordingInfo, RecordingState};
pub use session::{handle_session_event, RouteChangeReason, SessionEvent};
