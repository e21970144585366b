//! Audio effects processing
//!
//! DSP stages of the voice chain (reverb, multi-tap echo, time/pitch) and the
//! filters used for software voice processing. Every stage allocates its
//! state up front; `process` never allocates.

use std::f32::consts::PI;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::format::AudioFormat;

/// Wet/dry mix of an active reverb or echo
pub const WET_DRY_ACTIVE: f32 = 50.0;
/// Wet/dry mix of a bypassed reverb or echo
pub const WET_DRY_BYPASS: f32 = 0.0;
/// Pitch shift range in cents
pub const PITCH_MIN_CENTS: f32 = -2400.0;
pub const PITCH_MAX_CENTS: f32 = 2400.0;
/// Time/pitch rate range
pub const TIME_PITCH_RATE_MIN: f32 = 0.5;
pub const TIME_PITCH_RATE_MAX: f32 = 2.0;

/// Shifts smaller than this pass the signal through unchanged
const PITCH_BYPASS_CENTS: f32 = 0.5;

/// Effect trait for audio processing
pub trait Effect: Send {
    /// Process interleaved audio samples in place
    fn process(&mut self, samples: &mut [f32]);

    /// Reset effect state
    fn reset(&mut self);

    /// Get effect name
    fn name(&self) -> &str;

    /// Check if effect currently alters the signal
    fn is_enabled(&self) -> bool;
}

/// `f32` stored as bits so it can be shared without locks
#[derive(Debug)]
struct AtomicF32(AtomicU32);

impl AtomicF32 {
    fn new(value: f32) -> Self {
        Self(AtomicU32::new(value.to_bits()))
    }

    #[inline]
    fn load(&self) -> f32 {
        f32::from_bits(self.0.load(Ordering::Relaxed))
    }

    #[inline]
    fn store(&self, value: f32) {
        self.0.store(value.to_bits(), Ordering::Relaxed);
    }
}

/// Runtime parameters of the effect chain.
///
/// Written by the control context, read by the render context every cycle.
/// Changes become visible within a cycle or two.
#[derive(Debug)]
pub struct EffectParameters {
    reverb_mix: AtomicF32,
    echo_mix: AtomicF32,
    pitch: AtomicF32,
    rate: AtomicF32,
    volume: AtomicF32,
}

impl EffectParameters {
    /// Both effects bypassed, no pitch shift, unity rate and volume
    pub fn new() -> Self {
        Self {
            reverb_mix: AtomicF32::new(WET_DRY_BYPASS),
            echo_mix: AtomicF32::new(WET_DRY_BYPASS),
            pitch: AtomicF32::new(0.0),
            rate: AtomicF32::new(1.0),
            volume: AtomicF32::new(1.0),
        }
    }

    /// Reverb wet/dry mix (0-100)
    pub fn reverb_mix(&self) -> f32 {
        self.reverb_mix.load()
    }

    pub fn set_reverb_mix(&self, mix: f32) {
        self.reverb_mix.store(mix.clamp(0.0, 100.0));
    }

    /// Echo wet/dry mix (0-100)
    pub fn echo_mix(&self) -> f32 {
        self.echo_mix.load()
    }

    pub fn set_echo_mix(&self, mix: f32) {
        self.echo_mix.store(mix.clamp(0.0, 100.0));
    }

    /// Pitch shift in cents
    pub fn pitch(&self) -> f32 {
        self.pitch.load()
    }

    pub fn set_pitch(&self, cents: f32) {
        self.pitch.store(cents.clamp(PITCH_MIN_CENTS, PITCH_MAX_CENTS));
    }

    /// Playback-speed multiplier
    pub fn rate(&self) -> f32 {
        self.rate.load()
    }

    pub fn set_rate(&self, rate: f32) {
        self.rate
            .store(rate.clamp(TIME_PITCH_RATE_MIN, TIME_PITCH_RATE_MAX));
    }

    /// Main mixer volume (0.0 - 1.0)
    pub fn volume(&self) -> f32 {
        self.volume.load()
    }

    pub fn set_volume(&self, volume: f32) {
        self.volume.store(volume.clamp(0.0, 1.0));
    }
}

impl Default for EffectParameters {
    fn default() -> Self {
        Self::new()
    }
}

/// Reverb factory presets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ReverbPreset {
    SmallRoom,
    MediumHall,
    LargeHall,
    #[default]
    Cathedral,
    Plate,
}

struct ReverbTuning {
    /// Comb feedback
    room_size: f32,
    damping: f32,
    /// Scale applied to the delay line lengths
    size_scale: f32,
}

impl ReverbPreset {
    fn tuning(self) -> ReverbTuning {
        let (room_size, damping, size_scale) = match self {
            ReverbPreset::SmallRoom => (0.70, 0.50, 0.5),
            ReverbPreset::MediumHall => (0.80, 0.40, 0.8),
            ReverbPreset::LargeHall => (0.86, 0.30, 1.0),
            ReverbPreset::Cathedral => (0.92, 0.25, 1.4),
            ReverbPreset::Plate => (0.84, 0.60, 0.6),
        };
        ReverbTuning {
            room_size,
            damping,
            size_scale,
        }
    }
}

// Freeverb tunings at 44.1kHz
const COMB_TUNING: [usize; 4] = [1116, 1188, 1277, 1356];
const ALLPASS_TUNING: [usize; 2] = [556, 441];
const STEREO_SPREAD: usize = 23;
const REVERB_INPUT_GAIN: f32 = 0.03;
const REVERB_WET_GAIN: f32 = 3.0;

struct CombFilter {
    buffer: Vec<f32>,
    pos: usize,
    filter_store: f32,
}

impl CombFilter {
    fn new(len: usize) -> Self {
        Self {
            buffer: vec![0.0; len.max(1)],
            pos: 0,
            filter_store: 0.0,
        }
    }

    #[inline]
    fn process(&mut self, input: f32, feedback: f32, damping: f32) -> f32 {
        let output = self.buffer[self.pos];
        self.filter_store = output * (1.0 - damping) + self.filter_store * damping;
        self.buffer[self.pos] = input + self.filter_store * feedback;
        self.pos = (self.pos + 1) % self.buffer.len();
        output
    }

    fn reset(&mut self) {
        self.buffer.fill(0.0);
        self.pos = 0;
        self.filter_store = 0.0;
    }
}

struct AllpassFilter {
    buffer: Vec<f32>,
    pos: usize,
}

impl AllpassFilter {
    fn new(len: usize) -> Self {
        Self {
            buffer: vec![0.0; len.max(1)],
            pos: 0,
        }
    }

    #[inline]
    fn process(&mut self, input: f32) -> f32 {
        let buffered = self.buffer[self.pos];
        let output = buffered - input;
        self.buffer[self.pos] = input + buffered * 0.5;
        self.pos = (self.pos + 1) % self.buffer.len();
        output
    }

    fn reset(&mut self) {
        self.buffer.fill(0.0);
        self.pos = 0;
    }
}

/// One channel of the reverb network
struct ReverbTank {
    combs: Vec<CombFilter>,
    allpasses: Vec<AllpassFilter>,
}

/// Schroeder reverb: parallel damped combs into series allpasses, per channel
pub struct Reverb {
    channels: usize,
    preset: ReverbPreset,
    room_size: f32,
    damping: f32,
    tanks: Vec<ReverbTank>,
    params: Arc<EffectParameters>,
}

impl Reverb {
    pub fn new(format: &AudioFormat, preset: ReverbPreset, params: Arc<EffectParameters>) -> Self {
        let tuning = preset.tuning();
        let scale = format.sample_rate as f32 / 44_100.0 * tuning.size_scale;
        let channels = format.channels.max(1) as usize;

        let tanks = (0..channels)
            .map(|ch| {
                let spread = ch * STEREO_SPREAD;
                ReverbTank {
                    combs: COMB_TUNING
                        .iter()
                        .map(|&len| CombFilter::new(((len + spread) as f32 * scale) as usize))
                        .collect(),
                    allpasses: ALLPASS_TUNING
                        .iter()
                        .map(|&len| AllpassFilter::new(((len + spread) as f32 * scale) as usize))
                        .collect(),
                }
            })
            .collect();

        Self {
            channels,
            preset,
            room_size: tuning.room_size,
            damping: tuning.damping,
            tanks,
            params,
        }
    }

    pub fn preset(&self) -> ReverbPreset {
        self.preset
    }
}

impl Effect for Reverb {
    fn process(&mut self, samples: &mut [f32]) {
        let mix = self.params.reverb_mix() / 100.0;
        if mix <= 0.0 {
            return;
        }

        for frame in samples.chunks_exact_mut(self.channels) {
            for (sample, tank) in frame.iter_mut().zip(self.tanks.iter_mut()) {
                let input = *sample * REVERB_INPUT_GAIN;
                let mut wet: f32 = tank
                    .combs
                    .iter_mut()
                    .map(|comb| comb.process(input, self.room_size, self.damping))
                    .sum();
                for allpass in tank.allpasses.iter_mut() {
                    wet = allpass.process(wet);
                }
                *sample = *sample * (1.0 - mix) + wet * REVERB_WET_GAIN * mix;
            }
        }
    }

    fn reset(&mut self) {
        for tank in &mut self.tanks {
            tank.combs.iter_mut().for_each(CombFilter::reset);
            tank.allpasses.iter_mut().for_each(AllpassFilter::reset);
        }
    }

    fn name(&self) -> &str {
        "Reverb"
    }

    fn is_enabled(&self) -> bool {
        self.params.reverb_mix() > 0.0
    }
}

/// Echo factory presets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum EchoPreset {
    #[default]
    MultiEcho1,
    MultiEcho2,
    Slapback,
}

impl EchoPreset {
    /// Taps as (delay ms, gain) plus feedback taken from the last tap
    fn tuning(self) -> (&'static [(f32, f32)], f32) {
        match self {
            EchoPreset::MultiEcho1 => (&[(50.0, 0.7), (100.0, 0.5), (150.0, 0.35), (200.0, 0.25)], 0.3),
            EchoPreset::MultiEcho2 => (&[(90.0, 0.6), (180.0, 0.45), (270.0, 0.3), (360.0, 0.2)], 0.4),
            EchoPreset::Slapback => (&[(110.0, 0.8)], 0.0),
        }
    }
}

/// Multi-tap delay with feedback
pub struct MultiTapEcho {
    channels: usize,
    preset: EchoPreset,
    /// (delay in frames, gain)
    taps: Vec<(usize, f32)>,
    feedback: f32,
    lines: Vec<Vec<f32>>,
    write_pos: usize,
    params: Arc<EffectParameters>,
}

impl MultiTapEcho {
    pub fn new(format: &AudioFormat, preset: EchoPreset, params: Arc<EffectParameters>) -> Self {
        let (taps_ms, feedback) = preset.tuning();
        let taps: Vec<(usize, f32)> = taps_ms
            .iter()
            .map(|&(ms, gain)| {
                let frames = (ms * 0.001 * format.sample_rate as f32) as usize;
                (frames.max(1), gain)
            })
            .collect();
        let line_len = taps.iter().map(|&(d, _)| d).max().unwrap_or(1) + 1;
        let channels = format.channels.max(1) as usize;

        Self {
            channels,
            preset,
            taps,
            feedback: feedback.clamp(0.0, 0.95),
            lines: vec![vec![0.0; line_len]; channels],
            write_pos: 0,
            params,
        }
    }

    pub fn preset(&self) -> EchoPreset {
        self.preset
    }
}

impl Effect for MultiTapEcho {
    fn process(&mut self, samples: &mut [f32]) {
        let mix = self.params.echo_mix() / 100.0;
        if mix <= 0.0 {
            return;
        }

        let len = self.lines[0].len();
        let last_delay = self.taps.last().map(|&(d, _)| d).unwrap_or(1);

        for frame in samples.chunks_exact_mut(self.channels) {
            let write = self.write_pos;
            for (sample, line) in frame.iter_mut().zip(self.lines.iter_mut()) {
                let input = *sample;
                let wet: f32 = self
                    .taps
                    .iter()
                    .map(|&(delay, gain)| line[(write + len - delay) % len] * gain)
                    .sum();
                let recirculated = line[(write + len - last_delay) % len];
                line[write] = input + recirculated * self.feedback;
                *sample = input * (1.0 - mix) + wet * mix;
            }
            self.write_pos = (write + 1) % len;
        }
    }

    fn reset(&mut self) {
        for line in &mut self.lines {
            line.fill(0.0);
        }
        self.write_pos = 0;
    }

    fn name(&self) -> &str {
        "Multi-Tap Echo"
    }

    fn is_enabled(&self) -> bool {
        self.params.echo_mix() > 0.0
    }
}

/// Delay-line pitch shifter with two crossfaded read heads
pub struct PitchShifter {
    channels: usize,
    window: f32,
    lines: Vec<Vec<f32>>,
    write_pos: usize,
    delay: f32,
}

impl PitchShifter {
    /// Window length in milliseconds
    const WINDOW_MS: f32 = 50.0;

    pub fn new(format: &AudioFormat) -> Self {
        let window = (Self::WINDOW_MS * 0.001 * format.sample_rate as f32).max(4.0).floor();
        let channels = format.channels.max(1) as usize;
        Self {
            channels,
            window,
            lines: vec![vec![0.0; window as usize + 2]; channels],
            write_pos: 0,
            delay: 0.0,
        }
    }

    /// Shift interleaved samples in place by `cents`
    pub fn process_with(&mut self, samples: &mut [f32], cents: f32) {
        let len = self.lines[0].len();

        if cents.abs() < PITCH_BYPASS_CENTS {
            // keep the lines warm so engaging the shift does not read stale audio
            for frame in samples.chunks_exact(self.channels) {
                for (sample, line) in frame.iter().zip(self.lines.iter_mut()) {
                    line[self.write_pos] = *sample;
                }
                self.write_pos = (self.write_pos + 1) % len;
            }
            return;
        }

        let ratio = 2f32.powf(cents / 1200.0);
        let w = self.window;

        for frame in samples.chunks_exact_mut(self.channels) {
            let d1 = self.delay;
            let d2 = (d1 + w * 0.5) % w;
            let g1 = (PI * d1 / w).sin();
            let g2 = (PI * d2 / w).sin();

            for (sample, line) in frame.iter_mut().zip(self.lines.iter_mut()) {
                line[self.write_pos] = *sample;
                *sample = g1 * read_delayed(line, self.write_pos, d1)
                    + g2 * read_delayed(line, self.write_pos, d2);
            }

            self.delay += 1.0 - ratio;
            if self.delay < 0.0 {
                self.delay += w;
            } else if self.delay >= w {
                self.delay -= w;
            }
            self.write_pos = (self.write_pos + 1) % len;
        }
    }

    pub fn reset(&mut self) {
        for line in &mut self.lines {
            line.fill(0.0);
        }
        self.write_pos = 0;
        self.delay = 0.0;
    }
}

/// Linear-interpolated read `delay` samples behind `write_pos`
#[inline]
fn read_delayed(line: &[f32], write_pos: usize, delay: f32) -> f32 {
    let len = line.len() as f32;
    let mut pos = write_pos as f32 - delay;
    if pos < 0.0 {
        pos += len;
    }
    let base = pos.floor();
    let frac = pos - base;
    let i0 = base as usize % line.len();
    let i1 = (i0 + 1) % line.len();
    line[i0] * (1.0 - frac) + line[i1] * frac
}

/// Time and pitch unit.
///
/// `rate` changes tempo by reading the input at a different speed; the
/// pitch change that reading causes is compensated so `pitch` alone sets the
/// perceived pitch. Pull-based: ask [`TimePitch::input_frames_needed`] before
/// each [`TimePitch::process`] call.
pub struct TimePitch {
    channels: usize,
    params: Arc<EffectParameters>,
    /// Input frames carried over from the previous block
    pending: Vec<f32>,
    carry: Vec<f32>,
    phase: f64,
    block_rate: f64,
    shifter: PitchShifter,
}

impl TimePitch {
    const MAX_CARRY_FRAMES: usize = 4;

    pub fn new(format: &AudioFormat, params: Arc<EffectParameters>) -> Self {
        let channels = format.channels.max(1) as usize;
        Self {
            channels,
            params,
            pending: Vec::with_capacity(Self::MAX_CARRY_FRAMES * channels),
            carry: Vec::with_capacity(Self::MAX_CARRY_FRAMES * channels),
            phase: 0.0,
            block_rate: 1.0,
            shifter: PitchShifter::new(format),
        }
    }

    /// Largest input block needed for `output_frames` at the maximum rate
    pub fn max_input_frames(output_frames: usize) -> usize {
        (output_frames as f32 * TIME_PITCH_RATE_MAX).ceil() as usize + 2
    }

    fn pending_frames(&self) -> usize {
        self.pending.len() / self.channels
    }

    /// Latch the current rate and return how many new input frames the next
    /// `process` call for `output_frames` frames consumes
    pub fn input_frames_needed(&mut self, output_frames: usize) -> usize {
        self.block_rate = self.params.rate() as f64;
        if output_frames == 0 {
            return 0;
        }
        let last = self.phase + (output_frames - 1) as f64 * self.block_rate;
        (last.floor() as usize + 2).saturating_sub(self.pending_frames())
    }

    /// Resample `input` into `output` at the latched rate, then pitch shift
    pub fn process(&mut self, input: &[f32], output: &mut [f32]) {
        let ch = self.channels;
        let frames = output.len() / ch;
        let pending_frames = self.pending_frames();
        let total = pending_frames + input.len() / ch;

        if total == 0 {
            output.fill(0.0);
            return;
        }

        let rate = self.block_rate;
        for k in 0..frames {
            let pos = self.phase + k as f64 * rate;
            let i0 = (pos.floor() as usize).min(total - 1);
            let i1 = (i0 + 1).min(total - 1);
            let frac = (pos - pos.floor()) as f32;
            for c in 0..ch {
                let a = frame_sample(&self.pending, input, ch, i0, c);
                let b = frame_sample(&self.pending, input, ch, i1, c);
                output[k * ch + c] = a + (b - a) * frac;
            }
        }

        let end = self.phase + frames as f64 * rate;
        let consumed = end.floor() as usize;
        if consumed > total {
            self.phase = end.fract();
        } else {
            self.phase = end - consumed as f64;
        }
        let consumed = consumed.min(total);

        self.carry.clear();
        let keep_from = consumed.max(total.saturating_sub(Self::MAX_CARRY_FRAMES));
        for idx in keep_from..total {
            for c in 0..ch {
                self.carry
                    .push(frame_sample(&self.pending, input, ch, idx, c));
            }
        }
        std::mem::swap(&mut self.pending, &mut self.carry);

        let cents = self.params.pitch() - 1200.0 * (rate as f32).log2();
        self.shifter.process_with(output, cents);
    }

    pub fn reset(&mut self) {
        self.pending.clear();
        self.phase = 0.0;
        self.shifter.reset();
    }
}

#[inline]
fn frame_sample(pending: &[f32], input: &[f32], channels: usize, frame: usize, channel: usize) -> f32 {
    let pending_frames = pending.len() / channels;
    if frame < pending_frames {
        pending[frame * channels + channel]
    } else {
        input[(frame - pending_frames) * channels + channel]
    }
}

/// Simple high-pass filter
pub struct HighPassFilter {
    cutoff: f32,
    sample_rate: f32,
    prev_input: f32,
    prev_output: f32,
    alpha: f32,
}

impl HighPassFilter {
    pub fn new(cutoff_hz: f32, sample_rate: f32) -> Self {
        let mut filter = Self {
            cutoff: cutoff_hz,
            sample_rate,
            prev_input: 0.0,
            prev_output: 0.0,
            alpha: 0.0,
        };
        filter.update_alpha();
        filter
    }

    pub fn set_cutoff(&mut self, cutoff_hz: f32) {
        self.cutoff = cutoff_hz.clamp(20.0, self.sample_rate / 2.0);
        self.update_alpha();
    }

    fn update_alpha(&mut self) {
        let rc = 1.0 / (2.0 * PI * self.cutoff);
        let dt = 1.0 / self.sample_rate;
        self.alpha = rc / (rc + dt);
    }

    #[inline]
    pub fn process_sample(&mut self, input: f32) -> f32 {
        self.prev_output = self.alpha * (self.prev_output + input - self.prev_input);
        self.prev_input = input;
        self.prev_output
    }

    pub fn reset(&mut self) {
        self.prev_input = 0.0;
        self.prev_output = 0.0;
    }
}

/// Noise gate
pub struct NoiseGate {
    /// Threshold in dB
    pub threshold_db: f32,
    /// Attack time in ms
    pub attack_ms: f32,
    /// Release time in ms
    pub release_ms: f32,

    sample_rate: f32,
    gate_open: f32, // 0.0 = closed, 1.0 = open
}

impl NoiseGate {
    pub fn new(sample_rate: f32) -> Self {
        Self {
            threshold_db: -50.0,
            attack_ms: 1.0,
            release_ms: 80.0,
            sample_rate,
            gate_open: 0.0,
        }
    }

    /// Per-sample coefficients for the current settings
    fn coefficients(&self) -> (f32, f32, f32) {
        let threshold = db_to_linear(self.threshold_db);
        let attack = 1.0 - (-1.0 / (self.attack_ms * 0.001 * self.sample_rate)).exp();
        let release = 1.0 - (-1.0 / (self.release_ms * 0.001 * self.sample_rate)).exp();
        (threshold, attack, release)
    }

    #[inline]
    fn process_sample(&mut self, input: f32, (threshold, attack, release): (f32, f32, f32)) -> f32 {
        let target = if input.abs() > threshold { 1.0 } else { 0.0 };
        if target > self.gate_open {
            self.gate_open += attack * (target - self.gate_open);
        } else {
            self.gate_open += release * (target - self.gate_open);
        }
        input * self.gate_open
    }

    pub fn reset(&mut self) {
        self.gate_open = 0.0;
    }
}

/// Software voice processing: rumble removal and noise gating per channel
pub struct VoiceProcessor {
    channels: usize,
    high_pass: Vec<HighPassFilter>,
    gates: Vec<NoiseGate>,
}

impl VoiceProcessor {
    const HIGH_PASS_HZ: f32 = 80.0;

    pub fn new(format: &AudioFormat) -> Self {
        let channels = format.channels.max(1) as usize;
        let rate = format.sample_rate as f32;
        Self {
            channels,
            high_pass: (0..channels)
                .map(|_| HighPassFilter::new(Self::HIGH_PASS_HZ, rate))
                .collect(),
            gates: (0..channels).map(|_| NoiseGate::new(rate)).collect(),
        }
    }
}

impl Effect for VoiceProcessor {
    fn process(&mut self, samples: &mut [f32]) {
        let coefficients = match self.gates.first() {
            Some(gate) => gate.coefficients(),
            None => return,
        };
        for frame in samples.chunks_exact_mut(self.channels) {
            for ((sample, hpf), gate) in frame
                .iter_mut()
                .zip(self.high_pass.iter_mut())
                .zip(self.gates.iter_mut())
            {
                *sample = gate.process_sample(hpf.process_sample(*sample), coefficients);
            }
        }
    }

    fn reset(&mut self) {
        self.high_pass.iter_mut().for_each(HighPassFilter::reset);
        self.gates.iter_mut().for_each(NoiseGate::reset);
    }

    fn name(&self) -> &str {
        "Voice Processing"
    }

    fn is_enabled(&self) -> bool {
        true
    }
}

/// Convert decibels to linear amplitude
#[inline]
pub fn db_to_linear(db: f32) -> f32 {
    10.0_f32.powf(db / 20.0)
}

/// Convert linear amplitude to decibels
#[inline]
pub fn linear_to_db(linear: f32) -> f32 {
    20.0 * linear.max(1e-10).log10()
}
