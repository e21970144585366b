//! Engine controller behavior
//!
//! Drives the whole controller through the headless offline backend:
//! lifecycle, recording, effect parameters and session hooks.

use std::fs;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use voxfx::audio::{
    handle_session_event, map_value, rate_from_control, try_map_value, AudioFormat, EngineConfig,
    EngineController, EngineError, EngineState, OfflineBackend, OfflineHandle, RouteChangeReason,
    SessionEvent, Stage,
};

fn temp_path(name: &str) -> PathBuf {
    std::env::temp_dir().join(format!("voxfx_it_{}_{}.wav", name, std::process::id()))
}

fn config_for(path: &PathBuf) -> EngineConfig {
    EngineConfig {
        recording_path: path.clone(),
        ..EngineConfig::default()
    }
}

/// Initialized, set up and started engine on an offline device
fn running_engine(
    format: AudioFormat,
    config: EngineConfig,
) -> (EngineController<OfflineBackend>, OfflineHandle) {
    let backend = OfflineBackend::new(format);
    let handle = backend.handle();
    let mut engine = EngineController::initialize(backend, config).unwrap();
    engine.setup().unwrap();
    engine.start().unwrap();
    (engine, handle)
}

/// Test: Range mapping hits both endpoints and the midpoint
/// Given a source range [-1, 1] and a target range [0.75, 1.25]
/// Then -1, 0 and 1 map to 0.75, 1.0 and 1.25
#[test]
fn test_map_value_endpoints() {
    assert_eq!(map_value(-1.0, -1.0, 1.0, 0.75, 1.25), 0.75);
    assert_eq!(map_value(1.0, -1.0, 1.0, 0.75, 1.25), 1.25);
    assert!((map_value(0.0, -1.0, 1.0, 0.75, 1.25) - 1.0).abs() < 1e-6);
    assert_eq!(rate_from_control(0.0), 1.0);
}

/// Test: Range mapping rejects an empty source range
#[test]
fn test_map_value_degenerate_range() {
    assert!(matches!(
        try_map_value(0.5, 1.0, 1.0, 0.0, 1.0),
        Err(EngineError::InvalidRange { .. })
    ));
}

/// Test: Engine setup wires the documented topology
/// When the engine is set up
/// Then the graph runs capture -> player -> mixer -> reverb -> echo -> time-pitch -> output
/// And voice processing is enabled on the device
#[test]
fn test_setup_topology_and_voice_processing() {
    let path = temp_path("topology");
    let (engine, handle) = running_engine(AudioFormat::new(44_100, 1), config_for(&path));

    assert_eq!(
        engine.topology(),
        &[
            Stage::Capture,
            Stage::Player,
            Stage::Mixer,
            Stage::Reverb,
            Stage::Echo,
            Stage::TimePitch,
            Stage::Output,
        ]
    );
    assert!(handle.voice_processing_enabled());
    assert!(handle.streams_open());
    assert_eq!(handle.buffer_frames(), 256);
    assert_eq!(engine.state(), EngineState::Running);
}

/// Test: Setup twice is rejected
/// Given a configured engine
/// When setup is called again
/// Then AlreadyConfigured is returned and the engine keeps running
#[test]
fn test_setup_twice_fails() {
    let path = temp_path("setup_twice");
    let (mut engine, _handle) = running_engine(AudioFormat::new(44_100, 1), config_for(&path));

    assert!(matches!(engine.setup(), Err(EngineError::AlreadyConfigured)));
    assert!(engine.is_running());
}

/// Test: A device without a capture format cannot be initialized
#[test]
fn test_format_unavailable() {
    let backend = OfflineBackend::new(AudioFormat::new(44_100, 1)).without_format();
    let result = EngineController::initialize(backend, EngineConfig::default());
    assert!(matches!(result, Err(EngineError::FormatUnavailable(_))));
}

/// Test: Voice processing failure aborts setup
/// Given a device without voice processing
/// When setup is called with voice processing requested
/// Then VoiceProcessingUnavailable is returned and the engine stays unconfigured
#[test]
fn test_voice_processing_unavailable() {
    let backend = OfflineBackend::new(AudioFormat::new(44_100, 1)).without_voice_processing();
    let handle = backend.handle();
    let mut engine = EngineController::initialize(backend, EngineConfig::default()).unwrap();

    assert!(matches!(
        engine.setup(),
        Err(EngineError::VoiceProcessingUnavailable(_))
    ));
    assert_eq!(engine.state(), EngineState::Uninitialized);
    assert!(!handle.streams_open());
}

/// Test: Voice processing can be turned off
#[test]
fn test_setup_without_voice_processing() {
    let backend = OfflineBackend::new(AudioFormat::new(44_100, 1)).without_voice_processing();
    let config = EngineConfig {
        voice_processing: false,
        ..EngineConfig::default()
    };
    let mut engine = EngineController::initialize(backend, config).unwrap();

    assert!(engine.setup().is_ok());
    assert_eq!(engine.state(), EngineState::Configured);
}

/// Test: Start failure is reported, not retried
/// Given a device that refuses to start
/// When start is called
/// Then StartFailed is returned and the engine is not running
#[test]
fn test_start_failed() {
    let backend = OfflineBackend::new(AudioFormat::new(44_100, 1));
    let handle = backend.handle();
    let mut engine = EngineController::initialize(backend, EngineConfig::default()).unwrap();
    engine.setup().unwrap();

    handle.set_fail_start(Some("device busy"));
    assert!(matches!(engine.start(), Err(EngineError::StartFailed(_))));
    assert!(!engine.is_running());
    assert_eq!(handle.start_count(), 0);
    assert_eq!(engine.state(), EngineState::Configured);
}

/// Test: checkRunning restarts a halted engine and leaves a running one alone
#[test]
fn test_check_running() {
    let path = temp_path("check_running");
    let (mut engine, handle) = running_engine(AudioFormat::new(44_100, 1), config_for(&path));
    assert_eq!(handle.start_count(), 1);

    engine.check_running().unwrap();
    assert_eq!(handle.start_count(), 1);

    handle.halt();
    assert!(!engine.is_running());
    engine.check_running().unwrap();
    assert!(engine.is_running());
    assert_eq!(handle.start_count(), 2);
}

/// Test: Effect toggles set exactly 50 or 0 and are idempotent
#[test]
fn test_effect_toggles() {
    let path = temp_path("toggles");
    let (engine, _handle) = running_engine(AudioFormat::new(44_100, 1), config_for(&path));

    assert_eq!(engine.parameters().reverb_mix(), 0.0);
    assert_eq!(engine.parameters().echo_mix(), 0.0);

    engine.set_reverb(true);
    engine.set_reverb(true);
    assert_eq!(engine.parameters().reverb_mix(), 50.0);

    engine.set_echo(true);
    engine.set_echo(false);
    engine.set_echo(false);
    assert_eq!(engine.parameters().echo_mix(), 0.0);
    assert_eq!(engine.parameters().reverb_mix(), 50.0);
}

/// Test: Recording 100 capture buffers
/// Given a running engine on a 44.1 kHz mono device
/// When recording is toggled on, 100 buffers of 256 frames at RMS 0.5 are
///      captured, and recording is toggled off
/// Then the file holds 25 600 frames
/// And the meter reads 0.5 * (1 - 0.8^100)
#[test]
fn test_record_100_buffers() {
    let path = temp_path("record_100");
    let (mut engine, handle) = running_engine(AudioFormat::new(44_100, 1), config_for(&path));

    assert!(engine.toggle_recording().unwrap());
    assert!(engine.is_recording());

    let buffer = vec![0.5f32; 256];
    for _ in 0..100 {
        assert!(handle.feed(&buffer));
    }

    assert!(!engine.toggle_recording().unwrap());
    assert!(!engine.is_recording());

    let info = engine.last_recording().unwrap();
    assert_eq!(info.frames, 25_600);
    assert_eq!(info.dropped_samples, 0);

    let expected = 0.5 * (1.0 - 0.8f32.powi(100));
    let level = engine.power_level();
    assert!((level.rms - expected).abs() < 1e-4, "rms = {}", level.rms);
    assert!((level.peak - expected).abs() < 1e-4, "peak = {}", level.peak);

    let mut reader = hound::WavReader::open(&path).unwrap();
    let spec = reader.spec();
    assert_eq!(spec.sample_rate, 44_100);
    assert_eq!(spec.channels, 2);
    assert_eq!(spec.bits_per_sample, 16);
    assert_eq!(reader.duration(), 25_600);

    let expected_sample = (0.5f32 * 32767.0) as i16;
    assert!(reader
        .samples::<i16>()
        .all(|s| s.map(|s| s == expected_sample).unwrap_or(false)));

    std::fs::remove_file(&path).ok();
}

/// Test: Stereo capture is recorded frame for frame
#[test]
fn test_record_stereo() {
    let path = temp_path("record_stereo");
    let (mut engine, handle) = running_engine(AudioFormat::new(44_100, 2), config_for(&path));

    engine.toggle_recording().unwrap();
    let buffer: Vec<f32> = (0..256).flat_map(|_| [0.25f32, -0.25]).collect();
    for _ in 0..10 {
        handle.feed(&buffer);
    }
    engine.toggle_recording().unwrap();

    let mut reader = hound::WavReader::open(&path).unwrap();
    assert_eq!(reader.duration(), 2_560);
    let samples: Vec<i16> = reader.samples::<i16>().map(|s| s.unwrap()).collect();
    assert!(samples[0] > 0);
    assert!(samples[1] < 0);

    std::fs::remove_file(&path).ok();
}

/// Test: Capture is ignored when neither recording nor monitoring
#[test]
fn test_idle_capture_is_not_metered() {
    let path = temp_path("idle");
    let (engine, handle) = running_engine(AudioFormat::new(44_100, 1), config_for(&path));

    handle.feed(&vec![0.5f32; 256]);
    assert_eq!(engine.power_level().rms, 0.0);
    assert!(!engine.is_playing());
}

/// Test: Monitoring plays the voice back without recording
/// Given monitoring is on and effects are bypassed
/// When a buffer is captured and an output buffer is rendered
/// Then the output carries the captured signal
#[test]
fn test_monitoring_reaches_output() {
    let path = temp_path("monitoring");
    let (engine, handle) = running_engine(AudioFormat::new(44_100, 1), config_for(&path));
    engine.set_monitoring(true);

    handle.feed(&vec![0.5f32; 256]);
    assert!(engine.is_playing());
    assert!(!engine.is_recording());

    let mut out = vec![0.0f32; 256];
    handle.pull(&mut out);
    assert!(out[10..200].iter().all(|s| (s - 0.5).abs() < 1e-3));
}

/// Test: The first buffer after starting a recording is heard
/// Given a running engine
/// When recording is toggled on and one buffer is captured
/// Then the rendered output carries that buffer
#[test]
fn test_first_recorded_buffer_reaches_output() {
    let path = temp_path("first_buffer");
    let (mut engine, handle) = running_engine(AudioFormat::new(44_100, 1), config_for(&path));

    assert!(engine.toggle_recording().unwrap());
    handle.feed(&vec![0.5f32; 256]);
    assert!(engine.is_playing());

    let mut out = vec![0.0f32; 256];
    handle.pull(&mut out);
    let energy: f32 = out.iter().map(|s| s * s).sum();
    assert!(energy > 0.0);
    assert!(out[10..200].iter().all(|s| (s - 0.5).abs() < 1e-3));

    engine.toggle_recording().unwrap();
    std::fs::remove_file(&path).ok();
}

/// Test: Monitoring resumes audibly after a stop
/// Given audio was played and then stopped
/// When monitoring is on and a new buffer is captured
/// Then the new buffer is rendered and the old one is not
#[test]
fn test_monitoring_after_stop_plays_new_buffer() {
    let path = temp_path("monitor_after_stop");
    let (mut engine, handle) = running_engine(AudioFormat::new(44_100, 1), config_for(&path));
    engine.set_monitoring(true);

    handle.feed(&vec![0.9f32; 256]);
    engine.stop_recording_and_playback();
    handle.feed(&vec![0.5f32; 256]);

    let mut out = vec![0.0f32; 256];
    handle.pull(&mut out);
    assert!(out[10..200].iter().all(|s| (s - 0.5).abs() < 1e-3));
}

/// Test: Control operations while capture runs on another thread
/// Given a stereo device fed from its own thread
/// When recording is started and stopped repeatedly, alternating
///      toggleRecording and stopRecordingAndPlayback
/// Then nothing deadlocks, every file holds whole capture buffers
/// And a finished file no longer grows
#[test]
fn test_control_during_concurrent_capture() {
    let path = temp_path("concurrent");
    let (mut engine, handle) = running_engine(AudioFormat::new(44_100, 2), config_for(&path));

    let done = Arc::new(AtomicBool::new(false));
    let feeder = {
        let handle = handle.clone();
        let done = done.clone();
        thread::spawn(move || {
            let buffer: Vec<f32> = (0..256).flat_map(|_| [0.3f32, -0.3]).collect();
            let mut fed = 0u64;
            while !done.load(Ordering::Relaxed) {
                if handle.feed(&buffer) {
                    fed += 1;
                }
                thread::sleep(Duration::from_micros(200));
            }
            fed
        })
    };

    for cycle in 0..20 {
        assert!(engine.toggle_recording().unwrap());
        thread::sleep(Duration::from_millis(5));
        if cycle % 2 == 0 {
            assert!(!engine.toggle_recording().unwrap());
        } else {
            engine.stop_recording_and_playback();
        }
        assert!(!engine.is_recording());

        let info = engine.last_recording().unwrap().clone();
        assert_eq!(info.frames % 256, 0);
        assert_eq!(info.file_size, 44 + info.frames * 4);

        let size = fs::metadata(&path).unwrap().len();
        assert_eq!(size, info.file_size);
        thread::sleep(Duration::from_millis(2));
        assert_eq!(fs::metadata(&path).unwrap().len(), size);

        let reader = hound::WavReader::open(&path).unwrap();
        assert_eq!(reader.duration() as u64, info.frames);
    }

    done.store(true, Ordering::Relaxed);
    let fed = feeder.join().unwrap();
    assert!(fed > 0);

    fs::remove_file(&path).ok();
}

/// Test: Stop recording and playback
/// Given an active recording
/// When stopRecordingAndPlayback is called
/// Then recording is off, the player is stopped and the output is silent
/// And later capture does not grow the file
#[test]
fn test_stop_recording_and_playback() {
    let path = temp_path("stop_all");
    let (mut engine, handle) = running_engine(AudioFormat::new(44_100, 1), config_for(&path));

    engine.toggle_recording().unwrap();
    let buffer = vec![0.3f32; 256];
    for _ in 0..4 {
        handle.feed(&buffer);
    }

    engine.stop_recording_and_playback();
    assert!(!engine.is_recording());
    assert!(!engine.is_playing());
    assert_eq!(engine.last_recording().unwrap().frames, 1_024);

    handle.feed(&buffer);
    let reader = hound::WavReader::open(&path).unwrap();
    assert_eq!(reader.duration(), 1_024);

    let mut out = vec![1.0f32; 256];
    handle.pull(&mut out);
    assert!(out.iter().all(|&s| s == 0.0));

    // Safe to call again
    engine.stop_recording_and_playback();
    assert!(!engine.is_recording());

    std::fs::remove_file(&path).ok();
}

/// Test: File creation failure leaves the engine idle
/// Given a recording path in a directory that does not exist
/// When recording is toggled on
/// Then FileCreateFailed is returned and recording stays off
#[test]
fn test_record_file_create_failed() {
    let path = std::env::temp_dir()
        .join("voxfx_missing_dir")
        .join("nested")
        .join("input.wav");
    let (mut engine, handle) = running_engine(AudioFormat::new(44_100, 1), config_for(&path));

    assert!(matches!(
        engine.toggle_recording(),
        Err(EngineError::FileCreateFailed(_))
    ));
    assert!(!engine.is_recording());

    handle.feed(&vec![0.5f32; 256]);
    assert!(!engine.is_playing());
}

/// Test: Recording requires a configured engine
#[test]
fn test_record_before_setup() {
    let backend = OfflineBackend::new(AudioFormat::new(44_100, 1));
    let mut engine = EngineController::initialize(backend, EngineConfig::default()).unwrap();
    assert!(matches!(
        engine.toggle_recording(),
        Err(EngineError::NotConfigured)
    ));
}

/// Test: Rate control maps onto the playback speed
#[test]
fn test_rate_and_pitch_controls() {
    let path = temp_path("rate");
    let (engine, _handle) = running_engine(AudioFormat::new(44_100, 1), config_for(&path));

    engine.set_rate(-1.0);
    assert_eq!(engine.parameters().rate(), 0.75);
    engine.set_rate(1.0);
    assert_eq!(engine.parameters().rate(), 1.25);
    engine.set_rate(5.0);
    assert_eq!(engine.parameters().rate(), 1.25);

    engine.set_pitch(-1200.0);
    assert_eq!(engine.parameters().pitch(), -1200.0);
}

/// Test: Interruption stops recording and does not resume it
/// Given an active recording
/// When an interruption begins and ends
/// Then the recording is finalized, I/O comes back, recording stays off
#[test]
fn test_interruption_cycle() {
    let path = temp_path("interruption");
    let (mut engine, handle) = running_engine(AudioFormat::new(44_100, 1), config_for(&path));

    engine.toggle_recording().unwrap();
    handle.feed(&vec![0.2f32; 256]);

    handle_session_event(&mut engine, &SessionEvent::InterruptionBegan).unwrap();
    assert_eq!(engine.state(), EngineState::Interrupted);
    assert!(!engine.is_recording());
    assert!(!engine.is_running());
    assert_eq!(engine.last_recording().unwrap().frames, 256);

    // Recording cannot start while interrupted
    assert!(engine.toggle_recording().is_err());

    handle_session_event(&mut engine, &SessionEvent::InterruptionEnded).unwrap();
    assert_eq!(engine.state(), EngineState::Running);
    assert!(engine.is_running());
    assert!(!engine.is_recording());

    std::fs::remove_file(&path).ok();
}

/// Test: Route changes are informational
#[test]
fn test_route_change_keeps_running() {
    let path = temp_path("route");
    let (mut engine, handle) = running_engine(AudioFormat::new(44_100, 1), config_for(&path));

    let event = SessionEvent::RouteChanged(RouteChangeReason::NewDeviceAvailable);
    handle_session_event(&mut engine, &event).unwrap();
    assert!(engine.is_running());
    assert_eq!(handle.start_count(), 1);
}

/// Test: Media services reset rebuilds the engine
/// Given a running engine with reverb on and an active recording
/// When media services are reset
/// Then the engine is set up and started again
/// And effect parameters survive while recording stays off
#[test]
fn test_media_services_reset() {
    let path = temp_path("media_reset");
    let (mut engine, handle) = running_engine(AudioFormat::new(44_100, 1), config_for(&path));
    engine.set_reverb(true);
    engine.toggle_recording().unwrap();

    handle_session_event(&mut engine, &SessionEvent::MediaServicesReset).unwrap();

    assert_eq!(engine.state(), EngineState::Running);
    assert!(engine.is_running());
    assert!(handle.streams_open());
    assert_eq!(handle.start_count(), 2);
    assert!(!engine.is_recording());
    assert_eq!(engine.parameters().reverb_mix(), 50.0);

    // The rebuilt graph still records
    assert!(engine.toggle_recording().unwrap());
    handle.feed(&vec![0.1f32; 256]);
    assert!(!engine.toggle_recording().unwrap());
    assert_eq!(engine.last_recording().unwrap().frames, 256);

    std::fs::remove_file(&path).ok();
}

/// Test: Teardown allows a fresh setup
#[test]
fn test_teardown_then_setup() {
    let path = temp_path("teardown");
    let (mut engine, handle) = running_engine(AudioFormat::new(44_100, 1), config_for(&path));

    engine.teardown();
    assert_eq!(engine.state(), EngineState::Uninitialized);
    assert!(!handle.streams_open());

    engine.setup().unwrap();
    engine.start().unwrap();
    assert!(engine.is_running());
}

/// Test: Dropping the engine finalizes an active recording
#[test]
fn test_drop_finalizes_recording() {
    let path = temp_path("drop");
    {
        let (mut engine, handle) =
            running_engine(AudioFormat::new(44_100, 1), config_for(&path));
        engine.toggle_recording().unwrap();
        handle.feed(&vec![0.4f32; 512]);
    }

    let reader = hound::WavReader::open(&path).unwrap();
    assert_eq!(reader.duration(), 512);

    std::fs::remove_file(&path).ok();
}
