//! Level meter for the captured signal
//!
//! Written once per capture cycle from the real-time context, read at any
//! rate by a display. Values are stored as `f32` bits in atomics.

use std::sync::atomic::{AtomicU32, Ordering};

use super::effects::linear_to_db;

/// Floor of the displayed dB range
pub const METER_MIN_DB: f32 = -60.0;

/// Smoothed signal intensity
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct PowerLevel {
    /// Smoothed root-mean-square amplitude
    pub rms: f32,
    /// Smoothed peak amplitude
    pub peak: f32,
}

/// Exponentially smoothed RMS/peak meter
pub struct LevelMeter {
    smoothing: f32,
    rms: AtomicU32,
    peak: AtomicU32,
}

impl LevelMeter {
    /// Create a meter with the given smoothing factor in [0, 1).
    ///
    /// 0 disables smoothing; values close to 1 react slowly.
    pub fn new(smoothing: f32) -> Self {
        Self {
            smoothing: smoothing.clamp(0.0, 0.999),
            rms: AtomicU32::new(0f32.to_bits()),
            peak: AtomicU32::new(0f32.to_bits()),
        }
    }

    /// Fold one buffer of interleaved samples into the reading
    pub fn process(&self, samples: &[f32]) {
        let (sum_sq, peak) = samples
            .iter()
            .fold((0.0f32, 0.0f32), |(sum, peak), &s| (sum + s * s, peak.max(s.abs())));
        let rms = if samples.is_empty() {
            0.0
        } else {
            (sum_sq / samples.len() as f32).sqrt()
        };

        self.smooth_into(&self.rms, rms);
        self.smooth_into(&self.peak, peak);
    }

    fn smooth_into(&self, cell: &AtomicU32, value: f32) {
        let prev = f32::from_bits(cell.load(Ordering::Relaxed));
        let next = self.smoothing * prev + (1.0 - self.smoothing) * value;
        cell.store(next.to_bits(), Ordering::Relaxed);
    }

    /// Current smoothed reading
    pub fn level(&self) -> PowerLevel {
        PowerLevel {
            rms: f32::from_bits(self.rms.load(Ordering::Relaxed)),
            peak: f32::from_bits(self.peak.load(Ordering::Relaxed)),
        }
    }

    /// Smoothed RMS in dBFS, floored at [`METER_MIN_DB`]
    pub fn average_power_db(&self) -> f32 {
        linear_to_db(self.level().rms).max(METER_MIN_DB)
    }

    /// Smoothed RMS mapped onto [0, 1] for display
    pub fn normalized_level(&self) -> f32 {
        (self.average_power_db() - METER_MIN_DB) / -METER_MIN_DB
    }

    pub fn smoothing(&self) -> f32 {
        self.smoothing
    }

    pub fn reset(&self) {
        self.rms.store(0f32.to_bits(), Ordering::Relaxed);
        self.peak.store(0f32.to_bits(), Ordering::Relaxed);
    }
}

impl Default for LevelMeter {
    fn default() -> Self {
        Self::new(0.8)
    }
}
