//! Audio and recording formats

use serde::{Deserialize, Serialize};

/// Bit depth for audio samples
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum BitDepth {
    /// 16-bit signed integer
    I16,
    /// 24-bit signed integer
    I24,
    /// 32-bit floating point
    #[default]
    F32,
}

impl BitDepth {
    /// Bits per sample
    pub fn bits(self) -> u16 {
        match self {
            BitDepth::I16 => 16,
            BitDepth::I24 => 24,
            BitDepth::F32 => 32,
        }
    }

    /// Bytes per sample
    pub fn bytes(self) -> u16 {
        self.bits() / 8
    }
}

/// Canonical format shared by every node of the signal graph.
///
/// Taken from the capture device once, when the engine is initialized.
/// Changing it requires rebuilding the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AudioFormat {
    /// Sample rate in Hz
    pub sample_rate: u32,
    /// Number of channels
    pub channels: u16,
    /// Sample representation delivered by the device
    pub bit_depth: BitDepth,
}

impl AudioFormat {
    pub fn new(sample_rate: u32, channels: u16) -> Self {
        Self {
            sample_rate,
            channels,
            bit_depth: BitDepth::F32,
        }
    }

    /// Duration of `frames` frames in milliseconds
    pub fn frames_to_ms(&self, frames: u32) -> f64 {
        frames as f64 * 1000.0 / self.sample_rate as f64
    }
}

/// Destination format of the recording file (linear PCM)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordingFormat {
    /// Sample rate written to the file header
    pub sample_rate: u32,
    /// Number of channels in the file
    pub channels: u16,
    /// Sample bit depth in the file
    pub bit_depth: BitDepth,
    /// Interleaved sample layout
    pub interleaved: bool,
}

impl Default for RecordingFormat {
    fn default() -> Self {
        Self {
            sample_rate: 44_100,
            channels: 2,
            bit_depth: BitDepth::I16,
            interleaved: true,
        }
    }
}

impl RecordingFormat {
    /// Bytes per interleaved frame
    pub fn block_align(&self) -> u16 {
        self.channels * self.bit_depth.bytes()
    }

    /// Bytes per second of audio
    pub fn byte_rate(&self) -> u32 {
        self.sample_rate * self.block_align() as u32
    }
}
