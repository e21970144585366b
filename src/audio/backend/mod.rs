//! Audio I/O backends
//!
//! The engine talks to the device through [`AudioBackend`]. [`CpalBackend`]
//! drives real hardware; [`OfflineBackend`] is driven by hand, for headless
//! use and tests.

mod cpal_backend;
mod offline;

pub use self::cpal_backend::{AudioEvent, CpalBackend};
pub use self::offline::{OfflineBackend, OfflineHandle};

use super::error::EngineError;
use super::format::AudioFormat;

/// Called once per captured buffer on the real-time capture context
pub type CaptureFn = Box<dyn FnMut(&[f32]) + Send + 'static>;

/// Called once per output buffer on the real-time render context
pub type RenderFn = Box<dyn FnMut(&mut [f32]) + Send + 'static>;

/// Capture/output device capability required by the engine
pub trait AudioBackend {
    /// Native format of the capture device
    fn input_format(&mut self) -> Result<AudioFormat, EngineError>;

    /// Turn on echo cancellation / noise suppression for the capture path
    fn enable_voice_processing(&mut self) -> Result<(), EngineError>;

    /// Build capture and output streams in the stopped state
    fn open_streams(
        &mut self,
        format: &AudioFormat,
        buffer_frames: u32,
        capture: CaptureFn,
        render: RenderFn,
    ) -> Result<(), EngineError>;

    /// Start real-time I/O
    fn start(&mut self) -> Result<(), EngineError>;

    /// Pause real-time I/O, keeping the streams
    fn stop(&mut self);

    fn is_running(&self) -> bool;

    /// Drop the streams and their callbacks
    fn close(&mut self);

    /// Forget cached devices so the next `input_format` re-acquires them
    fn reset(&mut self);
}
