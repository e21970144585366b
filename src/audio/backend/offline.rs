//! Headless backend driven by hand

use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;

use super::{AudioBackend, CaptureFn, RenderFn};
use crate::audio::error::EngineError;
use crate::audio::format::AudioFormat;

struct OfflineState {
    format: Option<AudioFormat>,
    voice_processing_supported: bool,
    voice_processing: bool,
    fail_start: Option<String>,
    running: bool,
    buffer_frames: u32,
    capture: Option<CaptureFn>,
    render: Option<RenderFn>,
    starts: u32,
}

/// Backend without a device.
///
/// Buffers are fed and pulled through an [`OfflineHandle`], which stands in
/// for the device threads.
pub struct OfflineBackend {
    state: Arc<Mutex<OfflineState>>,
}

/// Device side of an [`OfflineBackend`]
#[derive(Clone)]
pub struct OfflineHandle {
    state: Arc<Mutex<OfflineState>>,
}

impl OfflineBackend {
    pub fn new(format: AudioFormat) -> Self {
        Self {
            state: Arc::new(Mutex::new(OfflineState {
                format: Some(format),
                voice_processing_supported: true,
                voice_processing: false,
                fail_start: None,
                running: false,
                buffer_frames: 0,
                capture: None,
                render: None,
                starts: 0,
            })),
        }
    }

    /// A device that cannot report its capture format
    pub fn without_format(self) -> Self {
        self.state.lock().format = None;
        self
    }

    /// A device without voice processing support
    pub fn without_voice_processing(self) -> Self {
        self.state.lock().voice_processing_supported = false;
        self
    }

    pub fn handle(&self) -> OfflineHandle {
        OfflineHandle {
            state: self.state.clone(),
        }
    }
}

impl OfflineHandle {
    /// Deliver one captured buffer. Returns false if the device is not running.
    pub fn feed(&self, samples: &[f32]) -> bool {
        let mut state = self.state.lock();
        if !state.running {
            return false;
        }
        match state.capture.as_mut() {
            Some(capture) => {
                capture(samples);
                true
            }
            None => false,
        }
    }

    /// Pull one output buffer; silence if the device is not running
    pub fn pull(&self, out: &mut [f32]) {
        let mut state = self.state.lock();
        if !state.running {
            out.fill(0.0);
            return;
        }
        match state.render.as_mut() {
            Some(render) => render(out),
            None => out.fill(0.0),
        }
    }

    /// Make subsequent starts fail with `reason`, or succeed again with `None`
    pub fn set_fail_start(&self, reason: Option<&str>) {
        self.state.lock().fail_start = reason.map(str::to_string);
    }

    /// Stop the device as if the OS had taken it away
    pub fn halt(&self) {
        self.state.lock().running = false;
    }

    pub fn is_running(&self) -> bool {
        self.state.lock().running
    }

    /// Successful starts so far
    pub fn start_count(&self) -> u32 {
        self.state.lock().starts
    }

    pub fn voice_processing_enabled(&self) -> bool {
        self.state.lock().voice_processing
    }

    pub fn streams_open(&self) -> bool {
        let state = self.state.lock();
        state.capture.is_some() && state.render.is_some()
    }

    /// Buffer size requested when the streams were opened
    pub fn buffer_frames(&self) -> u32 {
        self.state.lock().buffer_frames
    }
}

impl AudioBackend for OfflineBackend {
    fn input_format(&mut self) -> Result<AudioFormat, EngineError> {
        self.state
            .lock()
            .format
            .ok_or_else(|| EngineError::FormatUnavailable("offline device has no format".into()))
    }

    fn enable_voice_processing(&mut self) -> Result<(), EngineError> {
        let mut state = self.state.lock();
        if !state.voice_processing_supported {
            return Err(EngineError::VoiceProcessingUnavailable(
                "offline device does not support voice processing".into(),
            ));
        }
        state.voice_processing = true;
        Ok(())
    }

    fn open_streams(
        &mut self,
        _format: &AudioFormat,
        buffer_frames: u32,
        capture: CaptureFn,
        render: RenderFn,
    ) -> Result<(), EngineError> {
        let mut state = self.state.lock();
        state.capture = Some(capture);
        state.render = Some(render);
        state.buffer_frames = buffer_frames;
        state.running = false;
        debug!("Offline streams opened ({} frames)", buffer_frames);
        Ok(())
    }

    fn start(&mut self) -> Result<(), EngineError> {
        let mut state = self.state.lock();
        if state.capture.is_none() || state.render.is_none() {
            return Err(EngineError::StartFailed("streams are not open".into()));
        }
        if let Some(reason) = state.fail_start.clone() {
            return Err(EngineError::StartFailed(reason));
        }
        state.running = true;
        state.starts += 1;
        Ok(())
    }

    fn stop(&mut self) {
        self.state.lock().running = false;
    }

    fn is_running(&self) -> bool {
        self.state.lock().running
    }

    fn close(&mut self) {
        let mut state = self.state.lock();
        state.running = false;
        state.capture = None;
        state.render = None;
    }

    fn reset(&mut self) {
        self.state.lock().voice_processing = false;
    }
}
