//! Audio recording functionality
//!
//! Captured audio is pushed by the real-time context into a lock-free queue
//! ([`RecordTap`]); a writer thread drains the queue into a WAV file
//! ([`WavFileSink`]). [`RecordingState`] governs when a session exists.

use std::fs::File;
use std::io::{BufWriter, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use parking_lot::Mutex;
use ringbuf::traits::{Consumer, Observer, Producer, Split};
use ringbuf::{HeapCons, HeapProd, HeapRb};
use tracing::{debug, info, warn};

use super::error::EngineError;
use super::format::{BitDepth, RecordingFormat};

/// WAV file header constants
const RIFF_HEADER: &[u8] = b"RIFF";
const WAVE_HEADER: &[u8] = b"WAVE";
const FMT_HEADER: &[u8] = b"fmt ";
const DATA_HEADER: &[u8] = b"data";
const WAV_HEADER_LEN: u64 = 44;

/// Samples moved per writer iteration
const WRITER_BLOCK: usize = 4096;
/// Writer sleep when the queue is empty
const WRITER_IDLE: Duration = Duration::from_millis(2);

/// Information about a completed recording
#[derive(Debug, Clone)]
pub struct RecordingInfo {
    pub path: PathBuf,
    /// Frames written to the file
    pub frames: u64,
    pub duration_secs: f64,
    pub file_size: u64,
    /// Captured samples lost because the queue was full
    pub dropped_samples: u64,
}

/// Linear PCM WAV writer.
///
/// Accepts interleaved `f32` frames in the capture channel layout and
/// converts them to the recording format: mono input is duplicated across
/// the file's channels, extra input channels are dropped.
pub struct WavFileSink {
    writer: BufWriter<File>,
    path: PathBuf,
    format: RecordingFormat,
    source_channels: usize,
    frames_written: u64,
    /// Frames that fit in the 32-bit WAV size fields
    max_frames: u64,
    truncated: bool,
}

impl WavFileSink {
    /// Create the file and write a placeholder header
    pub fn create<P: AsRef<Path>>(
        path: P,
        format: RecordingFormat,
        source_channels: u16,
    ) -> Result<Self, EngineError> {
        if !format.interleaved {
            return Err(EngineError::FileCreateFailed(
                "non-interleaved PCM is not supported".to_string(),
            ));
        }
        if format.channels == 0 || source_channels == 0 {
            return Err(EngineError::FileCreateFailed(
                "channel count must be non-zero".to_string(),
            ));
        }

        let path = path.as_ref().to_path_buf();
        let file = File::create(&path)
            .map_err(|e| EngineError::FileCreateFailed(format!("{}: {}", path.display(), e)))?;
        let mut writer = BufWriter::new(file);

        // Placeholder header, sizes are patched in finalize()
        write_wav_header(&mut writer, &format, 0)
            .map_err(|e| EngineError::FileCreateFailed(format!("Failed to write header: {}", e)))?;

        Ok(Self {
            writer,
            path,
            format,
            source_channels: source_channels as usize,
            frames_written: 0,
            max_frames: max_wav_frames(&format),
            truncated: false,
        })
    }

    /// Append interleaved frames. A trailing partial frame is ignored.
    pub fn append(&mut self, samples: &[f32]) -> Result<(), EngineError> {
        let target_channels = self.format.channels as usize;

        for frame in samples.chunks_exact(self.source_channels) {
            if self.frames_written >= self.max_frames {
                if !self.truncated {
                    warn!(
                        "{} reached the WAV size limit, discarding further audio",
                        self.path.display()
                    );
                    self.truncated = true;
                }
                break;
            }
            for ch in 0..target_channels {
                let sample = if self.source_channels == 1 {
                    frame[0]
                } else {
                    frame.get(ch).copied().unwrap_or(0.0)
                };
                self.write_sample(sample)?;
            }
            self.frames_written += 1;
        }
        Ok(())
    }

    fn write_sample(&mut self, sample: f32) -> Result<(), EngineError> {
        let result = match self.format.bit_depth {
            BitDepth::I16 => {
                let value = (sample.clamp(-1.0, 1.0) * 32767.0) as i16;
                self.writer.write_all(&value.to_le_bytes())
            }
            BitDepth::I24 => {
                let value = (sample.clamp(-1.0, 1.0) * 8388607.0) as i32;
                self.writer.write_all(&value.to_le_bytes()[0..3])
            }
            BitDepth::F32 => self.writer.write_all(&sample.to_le_bytes()),
        };
        result.map_err(|e| EngineError::RecordingError(format!("Write failed: {}", e)))
    }

    /// True once audio was discarded at the WAV size limit
    pub fn is_truncated(&self) -> bool {
        self.truncated
    }

    pub fn frames_written(&self) -> u64 {
        self.frames_written
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Flush, patch the header sizes and close the file
    pub fn finalize(mut self) -> Result<RecordingInfo, EngineError> {
        let data_size = self.frames_written * self.format.block_align() as u64;

        self.writer
            .flush()
            .map_err(|e| EngineError::RecordingError(format!("Failed to flush: {}", e)))?;
        let mut file = self
            .writer
            .into_inner()
            .map_err(|e| EngineError::RecordingError(format!("Failed to get file: {}", e)))?;

        file.seek(SeekFrom::Start(0))
            .and_then(|_| write_wav_header(&mut file, &self.format, data_size))
            .and_then(|_| file.sync_all())
            .map_err(|e| EngineError::RecordingError(format!("Failed to update header: {}", e)))?;

        Ok(RecordingInfo {
            path: self.path,
            frames: self.frames_written,
            duration_secs: self.frames_written as f64 / self.format.sample_rate as f64,
            file_size: WAV_HEADER_LEN + data_size,
            dropped_samples: 0,
        })
    }
}

/// Largest frame count whose data size still fits the RIFF size field
fn max_wav_frames(format: &RecordingFormat) -> u64 {
    (u32::MAX as u64 - 36) / format.block_align().max(1) as u64
}

/// Write WAV file header
fn write_wav_header<W: Write>(
    writer: &mut W,
    format: &RecordingFormat,
    data_size: u64,
) -> std::io::Result<()> {
    let bits_per_sample = format.bit_depth.bits();
    let data_size = u32::try_from(data_size).map_err(|_| {
        std::io::Error::new(std::io::ErrorKind::InvalidInput, "WAV data exceeds 4 GiB")
    })?;
    let file_size = 36 + data_size;

    // RIFF header
    writer.write_all(RIFF_HEADER)?;
    writer.write_all(&file_size.to_le_bytes())?;
    writer.write_all(WAVE_HEADER)?;

    // fmt subchunk
    writer.write_all(FMT_HEADER)?;
    writer.write_all(&16u32.to_le_bytes())?; // Subchunk1 size
    let audio_format = if format.bit_depth == BitDepth::F32 { 3u16 } else { 1u16 }; // 3 = IEEE float, 1 = PCM
    writer.write_all(&audio_format.to_le_bytes())?;
    writer.write_all(&format.channels.to_le_bytes())?;
    writer.write_all(&format.sample_rate.to_le_bytes())?;
    writer.write_all(&format.byte_rate().to_le_bytes())?;
    writer.write_all(&format.block_align().to_le_bytes())?;
    writer.write_all(&bits_per_sample.to_le_bytes())?;

    // data subchunk
    writer.write_all(DATA_HEADER)?;
    writer.write_all(&data_size.to_le_bytes())?;

    Ok(())
}

/// Real-time end of the recording path.
///
/// The capture callback only ever calls [`RecordTap::push`]. Opening and
/// closing happen on the control context; `close` waits for an in-flight
/// push to finish, so once it returns nothing else reaches the queue.
pub struct RecordTap {
    active: AtomicBool,
    slot: Mutex<Option<HeapProd<f32>>>,
    dropped: AtomicU64,
}

impl RecordTap {
    pub fn new() -> Self {
        Self {
            active: AtomicBool::new(false),
            slot: Mutex::new(None),
            dropped: AtomicU64::new(0),
        }
    }

    /// True while a recording session is attached
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    /// Queue captured samples. Never blocks; drops the whole buffer when the
    /// queue is full or being swapped.
    pub fn push(&self, samples: &[f32]) {
        if !self.is_active() {
            return;
        }
        let queued = match self.slot.try_lock() {
            Some(mut slot) => match slot.as_mut() {
                Some(producer) if producer.vacant_len() >= samples.len() => {
                    producer.push_slice(samples);
                    true
                }
                Some(_) => false,
                None => return,
            },
            None => false,
        };
        if !queued {
            self.dropped
                .fetch_add(samples.len() as u64, Ordering::Relaxed);
        }
    }

    fn open(&self, producer: HeapProd<f32>) {
        self.dropped.store(0, Ordering::Relaxed);
        *self.slot.lock() = Some(producer);
        self.active.store(true, Ordering::Release);
    }

    fn close(&self) -> u64 {
        self.active.store(false, Ordering::Release);
        drop(self.slot.lock().take());
        self.dropped.load(Ordering::Relaxed)
    }
}

impl Default for RecordTap {
    fn default() -> Self {
        Self::new()
    }
}

/// An open recording: the sink plus the thread feeding it
pub struct RecordingSession {
    path: PathBuf,
    finish: Arc<AtomicBool>,
    writer: JoinHandle<Result<RecordingInfo, EngineError>>,
}

impl RecordingSession {
    /// Open `path` and attach a writer thread to `tap`
    pub fn open(
        tap: &RecordTap,
        path: &Path,
        format: RecordingFormat,
        source_channels: u16,
        queue_capacity: usize,
    ) -> Result<Self, EngineError> {
        let sink = WavFileSink::create(path, format, source_channels)?;

        // Keep the queue frame-aligned so the writer never splits a frame
        let channels = source_channels.max(1) as usize;
        let capacity = (queue_capacity.max(channels) / channels) * channels;
        let (producer, consumer) = HeapRb::<f32>::new(capacity).split();
        let finish = Arc::new(AtomicBool::new(false));

        let writer = {
            let finish = finish.clone();
            thread::Builder::new()
                .name("recorder".to_string())
                .spawn(move || run_writer(consumer, sink, channels, finish))
                .map_err(|e| EngineError::FileCreateFailed(format!("Failed to spawn writer: {}", e)))?
        };

        tap.open(producer);
        info!("Recording started: {}", path.display());

        Ok(Self {
            path: path.to_path_buf(),
            finish,
            writer,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Detach from `tap`, write out everything queued and close the file
    pub fn finish(self, tap: &RecordTap) -> Result<RecordingInfo, EngineError> {
        let dropped = tap.close();
        self.finish.store(true, Ordering::Release);

        let mut info = self
            .writer
            .join()
            .map_err(|_| EngineError::RecordingError("Writer thread panicked".to_string()))??;
        info.dropped_samples = dropped;

        if dropped > 0 {
            warn!("Recording dropped {} samples (queue full)", dropped);
        }
        info!(
            "Recording stopped: {} ({:.2}s)",
            info.path.display(),
            info.duration_secs
        );
        Ok(info)
    }
}

fn run_writer(
    mut consumer: HeapCons<f32>,
    mut sink: WavFileSink,
    channels: usize,
    finish: Arc<AtomicBool>,
) -> Result<RecordingInfo, EngineError> {
    let block_len = (WRITER_BLOCK / channels).max(1) * channels;
    let mut block = vec![0.0f32; block_len];

    loop {
        // Read the flag first: once it is set the producer is gone, so a
        // drain after observing it cannot miss samples.
        let finishing = finish.load(Ordering::Acquire);
        let available = (consumer.occupied_len() / channels) * channels;
        let n = consumer.pop_slice(&mut block[..available.min(block_len)]);
        if n > 0 {
            sink.append(&block[..n])?;
            continue;
        }
        if finishing {
            break;
        }
        thread::sleep(WRITER_IDLE);
    }

    debug!("Writer drained, {} frames", sink.frames_written());
    sink.finalize()
}

/// Two-state recording machine. Toggling is the only transition.
#[derive(Default)]
pub enum RecordingState {
    #[default]
    Idle,
    Recording(RecordingSession),
}

impl RecordingState {
    pub fn is_recording(&self) -> bool {
        matches!(self, RecordingState::Recording(_))
    }

    /// Stop an active session; no-op when idle
    pub fn stop(&mut self, tap: &RecordTap) -> Option<Result<RecordingInfo, EngineError>> {
        match std::mem::replace(self, RecordingState::Idle) {
            RecordingState::Recording(session) => Some(session.finish(tap)),
            RecordingState::Idle => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn temp_path(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("voxfx_{}_{}.wav", name, std::process::id()))
    }

    #[test]
    fn test_wav_header() {
        let mut buffer = Vec::new();
        write_wav_header(&mut buffer, &RecordingFormat::default(), 1000).unwrap();

        assert_eq!(buffer.len() as u64, WAV_HEADER_LEN);
        assert_eq!(&buffer[0..4], b"RIFF");
        assert_eq!(&buffer[8..12], b"WAVE");
        assert_eq!(&buffer[12..16], b"fmt ");
        assert_eq!(&buffer[36..40], b"data");
        assert_eq!(u32::from_le_bytes(buffer[40..44].try_into().unwrap()), 1000);
    }

    #[test]
    fn test_sink_duplicates_mono() {
        let path = temp_path("sink_mono");
        let mut sink = WavFileSink::create(&path, RecordingFormat::default(), 1).unwrap();
        sink.append(&[0.5; 100]).unwrap();
        let info = sink.finalize().unwrap();

        assert_eq!(info.frames, 100);
        assert_eq!(info.file_size, 44 + 100 * 4);
        assert_eq!(fs::metadata(&path).unwrap().len(), info.file_size);

        let reader = hound::WavReader::open(&path).unwrap();
        assert_eq!(reader.spec().channels, 2);
        assert_eq!(reader.spec().sample_rate, 44_100);
        let samples: Vec<i16> = reader.into_samples::<i16>().map(|s| s.unwrap()).collect();
        assert_eq!(samples.len(), 200);
        assert!(samples.iter().all(|&s| s == 16383));

        fs::remove_file(path).ok();
    }

    #[test]
    fn test_wav_frame_limit() {
        // 16-bit stereo: about 6.7 hours at 44.1 kHz
        assert_eq!(max_wav_frames(&RecordingFormat::default()), 1_073_741_814);

        let mut buffer = Vec::new();
        let result = write_wav_header(&mut buffer, &RecordingFormat::default(), 1 << 32);
        assert!(result.is_err());
    }

    #[test]
    fn test_sink_stops_at_size_limit() {
        let path = temp_path("sink_limit");
        let mut sink = WavFileSink::create(&path, RecordingFormat::default(), 2).unwrap();
        sink.max_frames = 10;

        sink.append(&[0.25; 16]).unwrap();
        assert!(!sink.is_truncated());
        sink.append(&[0.25; 16]).unwrap();
        assert!(sink.is_truncated());
        assert_eq!(sink.frames_written(), 10);

        let info = sink.finalize().unwrap();
        let reader = hound::WavReader::open(&path).unwrap();
        assert_eq!(reader.duration(), 10);
        assert_eq!(fs::metadata(&path).unwrap().len(), info.file_size);

        fs::remove_file(path).ok();
    }

    #[test]
    fn test_sink_create_fails_for_missing_directory() {
        let path = std::env::temp_dir()
            .join("voxfx_missing_dir")
            .join("nested")
            .join("out.wav");
        let result = WavFileSink::create(&path, RecordingFormat::default(), 2);
        assert!(matches!(result, Err(EngineError::FileCreateFailed(_))));
    }

    #[test]
    fn test_session_writes_queued_samples() {
        let path = temp_path("session");
        let tap = RecordTap::new();
        assert!(!tap.is_active());

        let session =
            RecordingSession::open(&tap, &path, RecordingFormat::default(), 2, 48_000).unwrap();
        assert!(tap.is_active());
        for _ in 0..10 {
            tap.push(&[0.25; 512]);
        }
        let info = session.finish(&tap).unwrap();

        assert!(!tap.is_active());
        assert_eq!(info.frames, 10 * 256);
        assert_eq!(info.dropped_samples, 0);

        // closed tap ignores further pushes
        tap.push(&[0.25; 512]);

        fs::remove_file(path).ok();
    }

    #[test]
    fn test_tap_counts_dropped_samples() {
        let path = temp_path("dropped");
        let tap = RecordTap::new();
        let session =
            RecordingSession::open(&tap, &path, RecordingFormat::default(), 2, 1024).unwrap();
        // larger than the whole queue: always dropped
        tap.push(&[0.1; 2048]);
        let info = session.finish(&tap).unwrap();
        assert_eq!(info.dropped_samples, 2048);

        fs::remove_file(path).ok();
    }

    #[test]
    fn test_state_stop_when_idle() {
        let tap = RecordTap::new();
        let mut state = RecordingState::default();
        assert!(!state.is_recording());
        assert!(state.stop(&tap).is_none());
    }
}
