//! cpal-based device backend

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::Sender;
use std::sync::Arc;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, Host, Stream, StreamConfig};
use tracing::{debug, error, info, warn};

use super::{AudioBackend, CaptureFn, RenderFn};
use crate::audio::device::DeviceId;
use crate::audio::effects::{Effect, VoiceProcessor};
use crate::audio::error::EngineError;
use crate::audio::format::{AudioFormat, BitDepth};

/// Events that can occur during audio streaming
#[derive(Debug, Clone)]
pub enum AudioEvent {
    /// Input device was disconnected
    InputDeviceDisconnected,
    /// Output device was disconnected
    OutputDeviceDisconnected,
    /// Stream error occurred
    StreamError(String),
}

/// Backend on the platform's default cpal host
pub struct CpalBackend {
    host: Host,
    input_id: Option<DeviceId>,
    output_id: Option<DeviceId>,
    input_device: Option<Device>,
    capture_stream: Option<Stream>,
    playback_stream: Option<Stream>,
    running: Arc<AtomicBool>,
    voice_processing: bool,
    // Event sender for device change notifications
    event_tx: Option<Sender<AudioEvent>>,
}

impl CpalBackend {
    /// Use the given devices, or the system defaults for `None`
    pub fn new(input_id: Option<DeviceId>, output_id: Option<DeviceId>) -> Self {
        Self {
            host: cpal::default_host(),
            input_id,
            output_id,
            input_device: None,
            capture_stream: None,
            playback_stream: None,
            running: Arc::new(AtomicBool::new(false)),
            voice_processing: false,
            event_tx: None,
        }
    }

    /// Set event sender for device change notifications
    pub fn set_event_sender(&mut self, tx: Sender<AudioEvent>) {
        self.event_tx = Some(tx);
    }

    fn resolve_input(&mut self) -> Result<Device, EngineError> {
        if let Some(device) = &self.input_device {
            return Ok(device.clone());
        }
        let device = match &self.input_id {
            Some(id) => self
                .host
                .input_devices()
                .map_err(|e| EngineError::DeviceNotFound(e.to_string()))?
                .find(|d| d.name().ok().as_ref() == Some(&id.0))
                .ok_or_else(|| EngineError::DeviceNotFound(id.0.clone()))?,
            None => self
                .host
                .default_input_device()
                .ok_or_else(|| EngineError::DeviceNotFound("No default input device".into()))?,
        };
        self.input_device = Some(device.clone());
        Ok(device)
    }

    fn resolve_output(&self) -> Result<Device, EngineError> {
        match &self.output_id {
            Some(id) => self
                .host
                .output_devices()
                .map_err(|e| EngineError::DeviceNotFound(e.to_string()))?
                .find(|d| d.name().ok().as_ref() == Some(&id.0))
                .ok_or_else(|| EngineError::DeviceNotFound(id.0.clone())),
            None => self
                .host
                .default_output_device()
                .ok_or_else(|| EngineError::DeviceNotFound("No default output device".into())),
        }
    }

    fn error_callback(
        &self,
        direction: &'static str,
        disconnected: AudioEvent,
    ) -> impl FnMut(cpal::StreamError) + Send + 'static {
        let event_tx = self.event_tx.clone();
        let running = self.running.clone();
        move |err: cpal::StreamError| {
            error!("{} stream error: {:?}", direction, err);
            let event = match err {
                cpal::StreamError::DeviceNotAvailable => {
                    warn!("{} device disconnected", direction);
                    running.store(false, Ordering::SeqCst);
                    disconnected.clone()
                }
                _ => AudioEvent::StreamError(err.to_string()),
            };
            if let Some(ref tx) = event_tx {
                let _ = tx.send(event);
            }
        }
    }
}

impl AudioBackend for CpalBackend {
    fn input_format(&mut self) -> Result<AudioFormat, EngineError> {
        let device = self
            .resolve_input()
            .map_err(|e| EngineError::FormatUnavailable(e.to_string()))?;
        let config = device
            .default_input_config()
            .map_err(|e| EngineError::FormatUnavailable(e.to_string()))?;

        let bit_depth = match config.sample_format() {
            cpal::SampleFormat::I16 => BitDepth::I16,
            cpal::SampleFormat::I32 => BitDepth::I24,
            _ => BitDepth::F32,
        };
        let format = AudioFormat {
            sample_rate: config.sample_rate().0,
            channels: config.channels(),
            bit_depth,
        };
        info!(
            "Input device: {} ({} Hz, {} ch)",
            device.name().unwrap_or_default(),
            format.sample_rate,
            format.channels
        );
        Ok(format)
    }

    fn enable_voice_processing(&mut self) -> Result<(), EngineError> {
        self.voice_processing = true;
        debug!("Software voice processing enabled");
        Ok(())
    }

    fn open_streams(
        &mut self,
        format: &AudioFormat,
        buffer_frames: u32,
        mut capture: CaptureFn,
        mut render: RenderFn,
    ) -> Result<(), EngineError> {
        let input = self.resolve_input()?;
        let output = self.resolve_output()?;
        info!(
            "Opening streams: {} -> {}",
            input.name().unwrap_or_default(),
            output.name().unwrap_or_default()
        );

        let stream_config = StreamConfig {
            channels: format.channels,
            sample_rate: cpal::SampleRate(format.sample_rate),
            buffer_size: cpal::BufferSize::Fixed(buffer_frames),
        };

        let mut processor = self.voice_processing.then(|| VoiceProcessor::new(format));
        let mut scratch = vec![0.0f32; buffer_frames as usize * format.channels as usize * 4];
        let channels = format.channels.max(1) as usize;
        let chunk_len = (scratch.len() / channels).max(1) * channels;

        let capture_stream = input
            .build_input_stream(
                &stream_config,
                move |data: &[f32], _: &cpal::InputCallbackInfo| match processor.as_mut() {
                    Some(processor) => {
                        for chunk in data.chunks(chunk_len) {
                            let buf = &mut scratch[..chunk.len()];
                            buf.copy_from_slice(chunk);
                            processor.process(buf);
                            capture(buf);
                        }
                    }
                    None => capture(data),
                },
                self.error_callback("Capture", AudioEvent::InputDeviceDisconnected),
                None,
            )
            .map_err(|e| EngineError::StreamError(e.to_string()))?;

        let playback_stream = output
            .build_output_stream(
                &stream_config,
                move |data: &mut [f32], _: &cpal::OutputCallbackInfo| render(data),
                self.error_callback("Playback", AudioEvent::OutputDeviceDisconnected),
                None,
            )
            .map_err(|e| EngineError::StreamError(e.to_string()))?;

        // Some hosts start streams on creation
        let _ = capture_stream.pause();
        let _ = playback_stream.pause();

        self.capture_stream = Some(capture_stream);
        self.playback_stream = Some(playback_stream);
        self.running.store(false, Ordering::SeqCst);

        debug!(
            "Streams ready: {} Hz, {} ch, {} frames",
            format.sample_rate, format.channels, buffer_frames
        );
        Ok(())
    }

    fn start(&mut self) -> Result<(), EngineError> {
        let (Some(capture), Some(playback)) = (&self.capture_stream, &self.playback_stream) else {
            return Err(EngineError::StartFailed("streams are not open".into()));
        };
        playback
            .play()
            .map_err(|e| EngineError::StartFailed(e.to_string()))?;
        if let Err(e) = capture.play() {
            let _ = playback.pause();
            return Err(EngineError::StartFailed(e.to_string()));
        }
        self.running.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn stop(&mut self) {
        if let Some(stream) = &self.capture_stream {
            let _ = stream.pause();
        }
        if let Some(stream) = &self.playback_stream {
            let _ = stream.pause();
        }
        self.running.store(false, Ordering::SeqCst);
    }

    fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst) && self.capture_stream.is_some()
    }

    fn close(&mut self) {
        self.capture_stream = None;
        self.playback_stream = None;
        self.running.store(false, Ordering::SeqCst);
        info!("Streams closed");
    }

    fn reset(&mut self) {
        self.close();
        self.input_device = None;
        self.voice_processing = false;
    }
}

impl Drop for CpalBackend {
    fn drop(&mut self) {
        self.close();
    }
}
