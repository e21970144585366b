//! Audio engine controller
//!
//! Owns the signal graph and the backend, and is the single entry point for
//! lifecycle, recording and parameter changes. Two contexts touch the engine:
//! the real-time capture/render callbacks, which only see the small shared
//! handles in [`CaptureContext`] and [`SignalGraph`], and the control context
//! that calls the methods below.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use super::backend::{AudioBackend, CaptureFn, RenderFn};
use super::effects::{EchoPreset, EffectParameters, ReverbPreset, WET_DRY_ACTIVE, WET_DRY_BYPASS};
use super::error::EngineError;
use super::format::{AudioFormat, RecordingFormat};
use super::graph::{PlayerNode, PlayerOutput, SignalGraph, Stage, MAX_RENDER_FRAMES, TOPOLOGY};
use super::mapping::rate_from_control;
use super::meter::{LevelMeter, PowerLevel};
use super::recording::{RecordTap, RecordingInfo, RecordingSession, RecordingState};

/// Valid capture buffer sizes in frames
pub const VALID_BUFFER_FRAMES: [u32; 5] = [64, 128, 256, 512, 1024];

/// Engine configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct EngineConfig {
    /// Capture buffer size in frames
    pub buffer_frames: u32,
    /// Enable echo cancellation / noise suppression on the capture path
    pub voice_processing: bool,
    /// Play the captured signal back even when not recording
    pub monitoring: bool,
    /// Destination of the recording
    pub recording_path: PathBuf,
    /// Format of the recording file
    pub recording_format: RecordingFormat,
    pub reverb_preset: ReverbPreset,
    pub echo_preset: EchoPreset,
    /// Level meter smoothing factor in [0, 1)
    pub meter_smoothing: f32,
    /// Capture buffers the player can hold
    pub playback_buffers: u32,
    /// Seconds of audio the recording queue can hold
    pub recording_seconds: f32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            buffer_frames: 256,
            voice_processing: true,
            monitoring: false,
            recording_path: std::env::temp_dir().join("input.wav"),
            recording_format: RecordingFormat::default(),
            reverb_preset: ReverbPreset::Cathedral,
            echo_preset: EchoPreset::MultiEcho1,
            meter_smoothing: 0.8,
            playback_buffers: 8,
            recording_seconds: 2.0,
        }
    }
}

impl EngineConfig {
    /// Validate the configuration values
    pub fn validate(&self) -> Result<(), EngineError> {
        if !VALID_BUFFER_FRAMES.contains(&self.buffer_frames) {
            return Err(EngineError::InvalidConfig(format!(
                "Invalid buffer size: {}. Valid values are {:?}",
                self.buffer_frames, VALID_BUFFER_FRAMES
            )));
        }
        if !(0.0..1.0).contains(&self.meter_smoothing) {
            return Err(EngineError::InvalidConfig(format!(
                "Meter smoothing must be in [0, 1): {}",
                self.meter_smoothing
            )));
        }
        if self.playback_buffers == 0 {
            return Err(EngineError::InvalidConfig(
                "At least one playback buffer is required".to_string(),
            ));
        }
        if self.recording_seconds.is_nan() || self.recording_seconds <= 0.0 {
            return Err(EngineError::InvalidConfig(format!(
                "Recording queue must hold a positive duration: {}",
                self.recording_seconds
            )));
        }
        let format = &self.recording_format;
        if format.sample_rate == 0 || format.channels == 0 || !format.interleaved {
            return Err(EngineError::InvalidConfig(format!(
                "Unsupported recording format: {:?}",
                format
            )));
        }
        Ok(())
    }
}

/// Lifecycle state of the engine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    /// Nodes exist but the graph is not wired
    Uninitialized,
    /// Graph wired, callback installed, I/O stopped
    Configured,
    /// Real-time I/O active
    Running,
    /// I/O taken away by an external interruption
    Interrupted,
}

/// Everything the capture callback touches
pub struct CaptureContext {
    player: Arc<PlayerNode>,
    tap: Arc<RecordTap>,
    meter: Arc<LevelMeter>,
    monitoring: Arc<AtomicBool>,
    cycle: Arc<Mutex<()>>,
}

impl CaptureContext {
    /// Handle one captured buffer. Runs on the real-time context.
    pub fn process(&self, samples: &[f32]) {
        // Control operations hold the cycle lock while they change state;
        // skip the buffer rather than wait for them.
        let Some(_cycle) = self.cycle.try_lock() else {
            return;
        };

        let recording = self.tap.is_active();
        if !recording && !self.monitoring.load(Ordering::Relaxed) {
            return;
        }

        self.meter.process(samples);
        if recording {
            self.tap.push(samples);
        }
        self.player.schedule_buffer(samples);
        if !self.player.is_playing() {
            self.player.play();
        }
    }
}

/// Real-time voice engine: capture → effects → output, with optional recording
pub struct EngineController<B: AudioBackend> {
    backend: B,
    config: EngineConfig,
    format: AudioFormat,
    state: EngineState,
    params: Arc<EffectParameters>,
    meter: Arc<LevelMeter>,
    player: Arc<PlayerNode>,
    player_output: Option<PlayerOutput>,
    tap: Arc<RecordTap>,
    monitoring: Arc<AtomicBool>,
    cycle: Arc<Mutex<()>>,
    recording: RecordingState,
    last_recording: Option<RecordingInfo>,
}

impl<B: AudioBackend> EngineController<B> {
    /// Build the engine nodes on `backend`.
    ///
    /// Both effects start bypassed. The capture format read here is the
    /// canonical format for the lifetime of the graph.
    pub fn initialize(mut backend: B, config: EngineConfig) -> Result<Self, EngineError> {
        config.validate()?;

        let format = backend.input_format()?;
        if format.sample_rate == 0 || format.channels == 0 {
            return Err(EngineError::FormatUnavailable(format!(
                "device reported {} Hz, {} channels",
                format.sample_rate, format.channels
            )));
        }

        let params = Arc::new(EffectParameters::new());
        params.set_reverb_mix(WET_DRY_BYPASS);
        params.set_echo_mix(WET_DRY_BYPASS);

        let (player, player_output) = PlayerNode::new(player_capacity(&config, &format));

        info!(
            "Engine initialized: {} Hz, {} ch, reverb {:?}, echo {:?}",
            format.sample_rate, format.channels, config.reverb_preset, config.echo_preset
        );

        Ok(Self {
            backend,
            format,
            state: EngineState::Uninitialized,
            params,
            meter: Arc::new(LevelMeter::new(config.meter_smoothing)),
            player: Arc::new(player),
            player_output: Some(player_output),
            tap: Arc::new(RecordTap::new()),
            monitoring: Arc::new(AtomicBool::new(config.monitoring)),
            cycle: Arc::new(Mutex::new(())),
            recording: RecordingState::Idle,
            last_recording: None,
            config,
        })
    }

    /// Enable voice processing, wire the graph and install the capture callback
    pub fn setup(&mut self) -> Result<(), EngineError> {
        if self.state != EngineState::Uninitialized {
            return Err(EngineError::AlreadyConfigured);
        }

        if self.config.voice_processing {
            if let Err(e) = self.backend.enable_voice_processing() {
                error!("Could not enable voice processing: {}", e);
                return Err(e);
            }
        }

        let player_output = match self.player_output.take() {
            Some(output) => output,
            None => self.rebuild_player(),
        };
        let mut graph = SignalGraph::new(
            &self.format,
            self.player.clone(),
            player_output,
            self.params.clone(),
            self.config.reverb_preset,
            self.config.echo_preset,
        );

        let context = self.capture_context();
        let capture: CaptureFn = Box::new(move |samples| context.process(samples));
        let render: RenderFn = Box::new(move |out| graph.render(out));

        self.backend
            .open_streams(&self.format, self.config.buffer_frames, capture, render)?;
        self.state = EngineState::Configured;

        info!(
            "Signal graph ready ({} frames): {}",
            self.config.buffer_frames,
            TOPOLOGY
                .iter()
                .map(Stage::to_string)
                .collect::<Vec<_>>()
                .join(" -> ")
        );
        Ok(())
    }

    /// Start real-time I/O. Failures are reported, never retried.
    pub fn start(&mut self) -> Result<(), EngineError> {
        if self.state == EngineState::Uninitialized {
            return Err(EngineError::NotConfigured);
        }
        if self.backend.is_running() {
            debug!("Engine already running");
            self.state = EngineState::Running;
            return Ok(());
        }

        if let Err(e) = self.backend.start() {
            error!("Could not start audio engine: {}", e);
            return Err(e);
        }
        self.state = EngineState::Running;
        info!("Engine started");
        Ok(())
    }

    /// Start the engine if it is not running; no-op otherwise
    pub fn check_running(&mut self) -> Result<(), EngineError> {
        if self.backend.is_running() {
            return Ok(());
        }
        debug!("Engine not running, restarting");
        self.start()
    }

    /// Force recording off and halt the player. Safe to call at any time.
    pub fn stop_recording_and_playback(&mut self) {
        let cycle = self.cycle.clone();
        let _cycle = cycle.lock();

        self.finish_recording();
        self.player.stop();
        debug!("Recording and playback stopped");
    }

    /// Stop everything in response to an external interruption
    pub fn interrupt(&mut self) {
        self.stop_recording_and_playback();
        self.backend.stop();
        if self.state != EngineState::Uninitialized {
            self.state = EngineState::Interrupted;
        }
        info!("Engine interrupted");
    }

    /// Close the streams and unwire the graph so `setup` can run again
    pub fn teardown(&mut self) {
        self.stop_recording_and_playback();
        self.backend.close();
        self.player_output = Some(self.rebuild_player());
        self.state = EngineState::Uninitialized;
        info!("Engine torn down");
    }

    /// Rebuild the whole engine after the media stack was reset.
    ///
    /// Re-reads the capture format, then sets up and starts again. Effect
    /// parameters survive the rebuild; recording does not resume.
    pub fn reset_media_services(&mut self) -> Result<(), EngineError> {
        warn!("Media services reset, rebuilding engine");
        self.teardown();
        self.backend.reset();

        let format = self.backend.input_format()?;
        if format != self.format {
            info!(
                "Capture format changed: {} Hz, {} ch -> {} Hz, {} ch",
                self.format.sample_rate, self.format.channels, format.sample_rate, format.channels
            );
            self.format = format;
            self.player_output = Some(self.rebuild_player());
        }

        self.setup()?;
        self.start()
    }

    /// Start or stop recording. Returns whether recording is now active.
    pub fn toggle_recording(&mut self) -> Result<bool, EngineError> {
        let cycle = self.cycle.clone();
        let _cycle = cycle.lock();

        if let RecordingState::Recording(_) = self.recording {
            return match self.recording.stop(&self.tap) {
                Some(Err(e)) => {
                    error!("Could not finalize recording: {}", e);
                    Err(e)
                }
                Some(Ok(info)) => {
                    self.last_recording = Some(info);
                    Ok(false)
                }
                None => Ok(false),
            };
        }

        if !matches!(self.state, EngineState::Configured | EngineState::Running) {
            return Err(EngineError::NotConfigured);
        }

        // No stale playback while the new destination is configured
        self.player.stop();

        let format = self.config.recording_format;
        if format.sample_rate != self.format.sample_rate {
            warn!(
                "Recording at {} Hz from a {} Hz capture without conversion",
                format.sample_rate, self.format.sample_rate
            );
        }

        let session = RecordingSession::open(
            &self.tap,
            &self.config.recording_path,
            format,
            self.format.channels,
            self.recording_queue_capacity(),
        )
        .map_err(|e| {
            error!("Could not create file for recording: {}", e);
            e
        })?;
        self.recording = RecordingState::Recording(session);
        Ok(true)
    }

    pub fn is_recording(&self) -> bool {
        self.recording.is_recording()
    }

    /// Reverb on (wet/dry 50) or bypassed (wet/dry 0)
    pub fn set_reverb(&self, active: bool) {
        self.params
            .set_reverb_mix(if active { WET_DRY_ACTIVE } else { WET_DRY_BYPASS });
        debug!("Reverb {}", if active { "on" } else { "off" });
    }

    /// Echo on (wet/dry 50) or bypassed (wet/dry 0)
    pub fn set_echo(&self, active: bool) {
        self.params
            .set_echo_mix(if active { WET_DRY_ACTIVE } else { WET_DRY_BYPASS });
        debug!("Echo {}", if active { "on" } else { "off" });
    }

    /// Pitch shift in cents
    pub fn set_pitch(&self, cents: f32) {
        self.params.set_pitch(cents);
        debug!("Pitch: {} cents", self.params.pitch());
    }

    /// Playback rate from a control value in [-1, 1]
    pub fn set_rate(&self, control: f32) {
        self.params.set_rate(rate_from_control(control));
        debug!("Rate: {:.3}", self.params.rate());
    }

    /// Main mixer volume (0.0 - 1.0)
    pub fn set_volume(&self, volume: f32) {
        self.params.set_volume(volume);
    }

    /// Enable or disable monitoring while not recording
    pub fn set_monitoring(&self, enabled: bool) {
        self.monitoring.store(enabled, Ordering::Relaxed);
        info!(
            "Monitoring: {}",
            if enabled { "enabled" } else { "disabled" }
        );
    }

    pub fn is_monitoring(&self) -> bool {
        self.monitoring.load(Ordering::Relaxed)
    }

    pub fn is_running(&self) -> bool {
        self.backend.is_running()
    }

    pub fn is_playing(&self) -> bool {
        self.player.is_playing()
    }

    /// Current lifecycle state.
    ///
    /// A device that stopped on its own reports `Configured` until
    /// `check_running` brings it back.
    pub fn state(&self) -> EngineState {
        match self.state {
            EngineState::Running if !self.backend.is_running() => EngineState::Configured,
            state => state,
        }
    }

    /// Canonical graph format
    pub fn format(&self) -> &AudioFormat {
        &self.format
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn parameters(&self) -> &Arc<EffectParameters> {
        &self.params
    }

    pub fn meter(&self) -> &Arc<LevelMeter> {
        &self.meter
    }

    /// Current smoothed input level
    pub fn power_level(&self) -> PowerLevel {
        self.meter.level()
    }

    pub fn topology(&self) -> &'static [Stage] {
        &TOPOLOGY
    }

    /// Result of the most recently completed recording
    pub fn last_recording(&self) -> Option<&RecordingInfo> {
        self.last_recording.as_ref()
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    fn capture_context(&self) -> CaptureContext {
        CaptureContext {
            player: self.player.clone(),
            tap: self.tap.clone(),
            meter: self.meter.clone(),
            monitoring: self.monitoring.clone(),
            cycle: self.cycle.clone(),
        }
    }

    fn rebuild_player(&mut self) -> PlayerOutput {
        let (player, output) = PlayerNode::new(player_capacity(&self.config, &self.format));
        self.player = Arc::new(player);
        output
    }

    fn finish_recording(&mut self) {
        match self.recording.stop(&self.tap) {
            Some(Ok(info)) => self.last_recording = Some(info),
            Some(Err(e)) => error!("Could not finalize recording: {}", e),
            None => {}
        }
    }

    fn recording_queue_capacity(&self) -> usize {
        (self.config.recording_seconds
            * self.format.sample_rate as f32
            * self.format.channels as f32) as usize
    }
}

impl<B: AudioBackend> Drop for EngineController<B> {
    fn drop(&mut self) {
        self.finish_recording();
        self.backend.close();
    }
}

fn player_capacity(config: &EngineConfig, format: &AudioFormat) -> usize {
    let frames = (config.buffer_frames as usize).max(MAX_RENDER_FRAMES);
    frames * format.channels as usize * config.playback_buffers as usize
}
