//! Signal graph
//!
//! The topology is fixed: capture feeds the player node, which plays through
//! the main mixer, reverb, echo and time/pitch unit into the output device.
//! The capture side holds a [`PlayerNode`]; everything downstream of it lives
//! in a [`SignalGraph`] that is moved into the render callback.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use ringbuf::traits::{Consumer, Observer, Producer, Split};
use ringbuf::{HeapCons, HeapProd, HeapRb};

use super::effects::{
    EchoPreset, Effect, EffectParameters, MultiTapEcho, Reverb, ReverbPreset, TimePitch,
};
use super::format::AudioFormat;

/// A processing stage of the signal graph
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Capture,
    Player,
    Mixer,
    Reverb,
    Echo,
    TimePitch,
    Output,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Capture => "capture",
            Stage::Player => "player",
            Stage::Mixer => "mixer",
            Stage::Reverb => "reverb",
            Stage::Echo => "echo",
            Stage::TimePitch => "time-pitch",
            Stage::Output => "output",
        };
        f.write_str(name)
    }
}

/// Order in which audio flows through the graph
pub const TOPOLOGY: [Stage; 7] = [
    Stage::Capture,
    Stage::Player,
    Stage::Mixer,
    Stage::Reverb,
    Stage::Echo,
    Stage::TimePitch,
    Stage::Output,
];

/// Render-side chunk size; longer device buffers are processed in pieces
pub const MAX_RENDER_FRAMES: usize = 1024;

/// Scheduling end of the player node.
///
/// `schedule_buffer` is called from the capture context and never blocks.
/// `stop` belongs to the control context and waits for an in-flight
/// `schedule_buffer` to finish.
pub struct PlayerNode {
    producer: Mutex<HeapProd<f32>>,
    playing: AtomicBool,
    /// Samples ever queued
    scheduled: AtomicU64,
    /// Samples queued before the last stop; the output discards up to here
    flush_mark: Arc<AtomicU64>,
    dropped_buffers: AtomicU64,
}

/// Reading end of the player node, owned by the render context
pub struct PlayerOutput {
    consumer: HeapCons<f32>,
    flush_mark: Arc<AtomicU64>,
    /// Samples ever taken out of the queue, played or discarded
    consumed: u64,
}

impl PlayerNode {
    /// Create a player holding up to `capacity` interleaved samples
    pub fn new(capacity: usize) -> (Self, PlayerOutput) {
        let rb = HeapRb::<f32>::new(capacity.max(1));
        let (producer, consumer) = rb.split();
        let flush_mark = Arc::new(AtomicU64::new(0));

        let node = Self {
            producer: Mutex::new(producer),
            playing: AtomicBool::new(false),
            scheduled: AtomicU64::new(0),
            flush_mark: flush_mark.clone(),
            dropped_buffers: AtomicU64::new(0),
        };
        let output = PlayerOutput {
            consumer,
            flush_mark,
            consumed: 0,
        };
        (node, output)
    }

    /// Queue a buffer for playback.
    ///
    /// The whole buffer is queued or none of it, so frames never straddle a
    /// dropped buffer. Returns false when it was dropped.
    pub fn schedule_buffer(&self, samples: &[f32]) -> bool {
        let queued = match self.producer.try_lock() {
            Some(mut producer) if producer.vacant_len() >= samples.len() => {
                producer.push_slice(samples);
                self.scheduled
                    .fetch_add(samples.len() as u64, Ordering::Release);
                true
            }
            _ => false,
        };
        if !queued {
            self.dropped_buffers.fetch_add(1, Ordering::Relaxed);
        }
        queued
    }

    pub fn play(&self) {
        self.playing.store(true, Ordering::Release);
    }

    /// Halt playback and discard everything scheduled so far.
    ///
    /// Buffers scheduled after the stop are kept and play once the node is
    /// started again.
    pub fn stop(&self) {
        self.playing.store(false, Ordering::Release);
        let _producer = self.producer.lock();
        let scheduled = self.scheduled.load(Ordering::Acquire);
        self.flush_mark.fetch_max(scheduled, Ordering::AcqRel);
    }

    pub fn is_playing(&self) -> bool {
        self.playing.load(Ordering::Acquire)
    }

    /// Buffers dropped because the queue was full or busy
    pub fn dropped_buffers(&self) -> u64 {
        self.dropped_buffers.load(Ordering::Relaxed)
    }
}

impl PlayerOutput {
    /// Fill `out` with scheduled audio, or silence when nothing is queued
    pub fn read(&mut self, out: &mut [f32], playing: bool) {
        let mark = self.flush_mark.load(Ordering::Acquire);
        if self.consumed < mark {
            let stale = (mark - self.consumed) as usize;
            self.consumed += self.consumer.skip(stale) as u64;
        }
        let filled = if playing {
            self.consumer.pop_slice(out)
        } else {
            0
        };
        self.consumed += filled as u64;
        out[filled..].fill(0.0);
    }
}

/// Main mixer stage
pub struct MainMixer {
    params: Arc<EffectParameters>,
}

impl MainMixer {
    pub fn new(params: Arc<EffectParameters>) -> Self {
        Self { params }
    }
}

impl Effect for MainMixer {
    fn process(&mut self, samples: &mut [f32]) {
        let volume = self.params.volume();
        if volume == 1.0 {
            return;
        }
        for sample in samples.iter_mut() {
            *sample *= volume;
        }
    }

    fn reset(&mut self) {}

    fn name(&self) -> &str {
        "Main Mixer"
    }

    fn is_enabled(&self) -> bool {
        true
    }
}

/// Render side of the graph: player output → mixer → reverb → echo → time/pitch
pub struct SignalGraph {
    channels: usize,
    player: PlayerOutput,
    player_node: Arc<PlayerNode>,
    mixer: MainMixer,
    reverb: Reverb,
    echo: MultiTapEcho,
    time_pitch: TimePitch,
    scratch: Vec<f32>,
}

impl SignalGraph {
    /// Wire the graph. All processing memory is allocated here.
    pub fn new(
        format: &AudioFormat,
        player_node: Arc<PlayerNode>,
        player: PlayerOutput,
        params: Arc<EffectParameters>,
        reverb_preset: ReverbPreset,
        echo_preset: EchoPreset,
    ) -> Self {
        let channels = format.channels.max(1) as usize;
        Self {
            channels,
            player,
            player_node,
            mixer: MainMixer::new(params.clone()),
            reverb: Reverb::new(format, reverb_preset, params.clone()),
            echo: MultiTapEcho::new(format, echo_preset, params.clone()),
            time_pitch: TimePitch::new(format, params),
            scratch: vec![0.0; TimePitch::max_input_frames(MAX_RENDER_FRAMES) * channels],
        }
    }

    /// Produce one block of output audio
    pub fn render(&mut self, out: &mut [f32]) {
        let chunk_len = MAX_RENDER_FRAMES * self.channels;
        for chunk in out.chunks_mut(chunk_len) {
            self.render_chunk(chunk);
        }
    }

    fn render_chunk(&mut self, out: &mut [f32]) {
        let frames = out.len() / self.channels;
        let needed = self.time_pitch.input_frames_needed(frames);
        let input = &mut self.scratch[..needed * self.channels];

        let playing = self.player_node.is_playing();
        self.player.read(input, playing);
        self.mixer.process(input);
        self.reverb.process(input);
        self.echo.process(input);
        self.time_pitch.process(input, out);
    }

    pub fn reset(&mut self) {
        self.reverb.reset();
        self.echo.reset();
        self.time_pitch.reset();
    }
}
