//! voxfx - Real-time voice processing for speech capture

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::mpsc::Receiver;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

use voxfx::audio::{
    handle_session_event, list_input_devices, list_output_devices, AudioDevice, AudioEvent,
    CpalBackend, DeviceId, EngineConfig, EngineController, EngineError, SessionEvent,
};

/// Width of the meter bar in characters
const METER_WIDTH: usize = 30;

#[derive(Parser)]
#[command(name = "voxfx")]
#[command(about = "Real-time voice processing with reverb, echo and pitch effects")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// List available audio devices
    Devices,

    /// Run the engine and control it from stdin
    Run {
        /// Input device name (use 'devices' to see available devices)
        #[arg(long)]
        input_device: Option<String>,

        /// Output device name (use 'devices' to see available devices)
        #[arg(long)]
        output_device: Option<String>,

        /// Capture buffer size in frames
        #[arg(long)]
        buffer_frames: Option<u32>,

        /// Where to write the recording
        #[arg(long)]
        record_path: Option<PathBuf>,

        /// Hear the processed voice even when not recording
        #[arg(long)]
        monitor: bool,

        /// Disable echo cancellation / noise suppression
        #[arg(long)]
        no_voice_processing: bool,

        /// JSON engine configuration
        #[arg(short, long, env = "VOXFX_CONFIG")]
        config: Option<PathBuf>,
    },
}

fn setup_logging(verbose: bool) {
    let level = if verbose { Level::DEBUG } else { Level::INFO };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .finish();

    tracing::subscriber::set_global_default(subscriber).expect("Failed to set tracing subscriber");
}

fn print_devices(title: &str, devices: Result<Vec<AudioDevice>, EngineError>) {
    println!("{}:", title);
    match devices {
        Ok(devices) => {
            for device in devices {
                let default_marker = if device.is_default { " (default)" } else { "" };
                match (device.default_sample_rate, device.default_channels) {
                    (Some(rate), Some(channels)) => println!(
                        "  - {}{} [{} Hz, {} ch]",
                        device.name, default_marker, rate, channels
                    ),
                    _ => println!("  - {}{}", device.name, default_marker),
                }
            }
        }
        Err(e) => {
            println!("  Error: {}", e);
        }
    }
}

fn list_devices() {
    print_devices("Input devices", list_input_devices());
    println!();
    print_devices("Output devices", list_output_devices());
}

fn load_config(path: &Path) -> Result<EngineConfig> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config {}", path.display()))?;
    let config = serde_json::from_str(&text)
        .with_context(|| format!("Failed to parse config {}", path.display()))?;
    Ok(config)
}

fn print_help() {
    println!("\nCommands:");
    println!("  r            start/stop recording");
    println!("  v            toggle reverb");
    println!("  e            toggle echo");
    println!("  p <cents>    set pitch (-2400..2400)");
    println!("  t <value>    set rate (-1..1, 0 = normal speed)");
    println!("  m            toggle monitoring");
    println!("  q            quit\n");
}

fn print_meter(engine: &EngineController<CpalBackend>) {
    let meter = engine.meter();
    let filled = (meter.normalized_level() * METER_WIDTH as f32).round() as usize;
    let filled = filled.min(METER_WIDTH);
    print!(
        "\r[{}{}] {:>6.1} dB {}",
        "#".repeat(filled),
        " ".repeat(METER_WIDTH - filled),
        meter.average_power_db(),
        if engine.is_recording() { "REC" } else { "   " }
    );
    let _ = std::io::stdout().flush();
}

/// Apply one stdin command. Returns false when the user asked to quit.
fn handle_command(engine: &mut EngineController<CpalBackend>, line: &str) -> bool {
    let mut parts = line.split_whitespace();
    let Some(command) = parts.next() else {
        return true;
    };
    let argument = parts.next();

    match command {
        "r" => match engine.toggle_recording() {
            Ok(true) => println!("\nRecording to {}", engine.config().recording_path.display()),
            Ok(false) => {
                if let Some(info) = engine.last_recording() {
                    println!(
                        "\nSaved {} ({:.2}s, {} bytes)",
                        info.path.display(),
                        info.duration_secs,
                        info.file_size
                    );
                }
            }
            Err(e) => warn!("Recording toggle failed: {}", e),
        },
        "v" => engine.set_reverb(engine.parameters().reverb_mix() == 0.0),
        "e" => engine.set_echo(engine.parameters().echo_mix() == 0.0),
        "p" => match argument.map(str::parse::<f32>) {
            Some(Ok(cents)) => engine.set_pitch(cents),
            _ => println!("\nUsage: p <cents>"),
        },
        "t" => match argument.map(str::parse::<f32>) {
            Some(Ok(value)) => engine.set_rate(value),
            _ => println!("\nUsage: t <-1..1>"),
        },
        "m" => engine.set_monitoring(!engine.is_monitoring()),
        "q" => return false,
        "h" | "?" => print_help(),
        other => println!("\nUnknown command: {}", other),
    }
    true
}

fn drain_device_events(engine: &mut EngineController<CpalBackend>, events: &Receiver<AudioEvent>) {
    while let Ok(event) = events.try_recv() {
        warn!("Device event: {:?}", event);
        for session_event in SessionEvent::from_audio_event(&event) {
            // Failures are logged by the dispatcher; keep going
            let _ = handle_session_event(engine, &session_event);
        }
    }
}

async fn run_engine(
    input_device: Option<String>,
    output_device: Option<String>,
    config: EngineConfig,
) -> Result<()> {
    info!("Engine config: {:?}", config);
    config.validate()?;

    let (event_tx, event_rx) = std::sync::mpsc::channel();
    let mut backend = CpalBackend::new(input_device.map(DeviceId), output_device.map(DeviceId));
    backend.set_event_sender(event_tx);

    let mut engine = EngineController::initialize(backend, config.clone())?;
    engine.setup()?;
    engine.start()?;

    let format = *engine.format();
    println!(
        "\nEngine running: {} Hz, {} ch, {} frames ({:.1} ms)",
        format.sample_rate,
        format.channels,
        config.buffer_frames,
        format.frames_to_ms(config.buffer_frames)
    );
    print_help();

    let stdin = tokio::io::stdin();
    let mut stdin_reader = BufReader::new(stdin).lines();
    let mut meter_interval = tokio::time::interval(Duration::from_millis(500));

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Shutting down...");
                break;
            }
            _ = meter_interval.tick() => {
                drain_device_events(&mut engine, &event_rx);
                print_meter(&engine);
            }
            line_result = stdin_reader.next_line() => {
                match line_result {
                    Ok(Some(line)) => {
                        if !handle_command(&mut engine, line.trim()) {
                            break;
                        }
                    }
                    Ok(None) => {
                        info!("stdin closed");
                        break;
                    }
                    Err(e) => {
                        warn!("stdin error: {}", e);
                    }
                }
            }
        }
    }

    println!();
    engine.stop_recording_and_playback();
    if let Some(info) = engine.last_recording() {
        info!(
            "Last recording: {} ({:.2}s)",
            info.path.display(),
            info.duration_secs
        );
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    setup_logging(cli.verbose);

    match cli.command {
        Commands::Devices => list_devices(),
        Commands::Run {
            input_device,
            output_device,
            buffer_frames,
            record_path,
            monitor,
            no_voice_processing,
            config,
        } => {
            let mut engine_config = match config {
                Some(path) => load_config(&path)?,
                None => EngineConfig::default(),
            };
            if let Some(frames) = buffer_frames {
                engine_config.buffer_frames = frames;
            }
            if let Some(path) = record_path {
                engine_config.recording_path = path;
            }
            if monitor {
                engine_config.monitoring = true;
            }
            if no_voice_processing {
                engine_config.voice_processing = false;
            }
            run_engine(input_device, output_device, engine_config).await?;
        }
    }

    Ok(())
}
