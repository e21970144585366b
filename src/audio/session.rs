//! Audio session lifecycle hooks
//!
//! Reactions to things that happen to the audio session from outside:
//! interruptions, route changes, media server resets and device
//! configuration changes. Recording is never resumed automatically.

use std::fmt;

use tracing::{info, warn};

use super::backend::{AudioBackend, AudioEvent};
use super::engine::EngineController;
use super::error::EngineError;

/// Why the audio route changed
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteChangeReason {
    NewDeviceAvailable,
    OldDeviceUnavailable,
    CategoryChange,
    Override,
    Unknown(String),
}

impl fmt::Display for RouteChangeReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RouteChangeReason::NewDeviceAvailable => write!(f, "new device available"),
            RouteChangeReason::OldDeviceUnavailable => write!(f, "old device unavailable"),
            RouteChangeReason::CategoryChange => write!(f, "category change"),
            RouteChangeReason::Override => write!(f, "override"),
            RouteChangeReason::Unknown(reason) => write!(f, "{}", reason),
        }
    }
}

/// An external session notification
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    InterruptionBegan,
    InterruptionEnded,
    RouteChanged(RouteChangeReason),
    MediaServicesReset,
    ConfigurationChanged,
}

impl SessionEvent {
    /// Session notifications implied by a device event.
    ///
    /// A vanished device invalidates the streams, so the engine is rebuilt on
    /// whatever device is now available.
    pub fn from_audio_event(event: &AudioEvent) -> Vec<SessionEvent> {
        match event {
            AudioEvent::InputDeviceDisconnected | AudioEvent::OutputDeviceDisconnected => vec![
                SessionEvent::RouteChanged(RouteChangeReason::OldDeviceUnavailable),
                SessionEvent::MediaServicesReset,
            ],
            AudioEvent::StreamError(_) => vec![SessionEvent::ConfigurationChanged],
        }
    }
}

/// Another client took the audio hardware: stop recording and playback
pub fn on_interruption_began<B: AudioBackend>(engine: &mut EngineController<B>) {
    info!("Audio session interrupted");
    engine.interrupt();
}

/// The interruption is over: bring I/O back, leave recording off
pub fn on_interruption_ended<B: AudioBackend>(
    engine: &mut EngineController<B>,
) -> Result<(), EngineError> {
    info!("Audio session interruption ended");
    engine.check_running()
}

/// Route changes are informational; the graph keeps running
pub fn on_route_changed<B: AudioBackend>(
    _engine: &mut EngineController<B>,
    reason: &RouteChangeReason,
) {
    info!("Audio route changed: {}", reason);
}

/// The media stack was reset: rebuild and restart the engine
pub fn on_media_services_reset<B: AudioBackend>(
    engine: &mut EngineController<B>,
) -> Result<(), EngineError> {
    engine.reset_media_services()
}

/// The device configuration changed under a running engine
pub fn on_configuration_changed<B: AudioBackend>(
    engine: &mut EngineController<B>,
) -> Result<(), EngineError> {
    info!("Audio device configuration changed");
    engine.check_running()
}

/// Dispatch `event` to its hook
pub fn handle_session_event<B: AudioBackend>(
    engine: &mut EngineController<B>,
    event: &SessionEvent,
) -> Result<(), EngineError> {
    let result = match event {
        SessionEvent::InterruptionBegan => {
            on_interruption_began(engine);
            Ok(())
        }
        SessionEvent::InterruptionEnded => on_interruption_ended(engine),
        SessionEvent::RouteChanged(reason) => {
            on_route_changed(engine, reason);
            Ok(())
        }
        SessionEvent::MediaServicesReset => on_media_services_reset(engine),
        SessionEvent::ConfigurationChanged => on_configuration_changed(engine),
    };
    if let Err(e) = &result {
        warn!("Session event {:?} failed: {}", event, e);
    }
    result
}
