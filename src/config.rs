//! Configuration types and design constants for the capture engine.

use std::path::PathBuf;
use std::time::Duration;

use crate::source::DeviceSelection;
use crate::RecorderError;

/// Frames per processing block.
///
/// Handlers consume audio in blocks of this many frames; at 48 kHz this is
/// ~21 ms of audio per block.
pub const BLOCK_FRAMES: usize = 1024;

/// Minimum interval between `LevelChanged` emissions per source (~20 Hz).
pub const LEVEL_EMIT_INTERVAL: Duration = Duration::from_millis(50);

/// Loopback is considered silent once no block has arrived for this long.
///
/// Hard design parameter: drives the mic handler's ring-clear and the
/// mic-only fallback path.
pub const LOOPBACK_SILENCE_THRESHOLD: Duration = Duration::from_millis(200);

/// Mic ring warm-up capacity, in seconds of canonical audio.
pub const RING_WARMUP_SECONDS: usize = 4;

/// Seconds of audio the job queue should absorb before dropping.
pub const QUEUE_SECONDS: usize = 10;

/// Job queue capacity bounds.
pub const QUEUE_MIN_JOBS: usize = 2000;
/// Upper bound of the job queue capacity clamp.
pub const QUEUE_MAX_JOBS: usize = 10_000;

/// Queue-full drops are logged on the 1st and every Nth occurrence.
pub const DROP_LOG_CADENCE: u64 = 100;

/// Backlog diagnostics are logged every Nth loopback block.
pub const BACKLOG_LOG_EVERY: u64 = 50;

/// Retries after a failed device open with transient invalidation.
pub const OPEN_RETRIES: u32 = 3;
/// Suspending delay between device-open attempts.
pub const OPEN_RETRY_BACKOFF: Duration = Duration::from_millis(250);

/// Watchdog on the writer drain during `stop`.
pub const WRITER_DRAIN_TIMEOUT: Duration = Duration::from_secs(30);
/// Writer join bound during `dispose`.
pub const DISPOSE_JOIN_TIMEOUT: Duration = Duration::from_secs(1);

/// Session log size cap. One `[LOG TRUNCATED]` line is written at overflow.
pub const LOG_MAX_BYTES: u64 = 10 * 1024 * 1024;

/// Maximum bytes handed to the MP3 encoder per chunk.
pub const ENCODE_CHUNK_BYTES: usize = 64 * 1024;

/// Gain bounds and default, matching the live gain sliders this engine
/// was built for.
pub const GAIN_MIN: f32 = 0.0;
/// Upper gain bound (+9.5 dB).
pub const GAIN_MAX: f32 = 3.0;
/// Unity gain.
pub const GAIN_DEFAULT: f32 = 1.0;

/// Supported MP3 bitrate range in kbps (0 disables the MP3 pass).
pub const MP3_BITRATE_RANGE: std::ops::RangeInclusive<u16> = 64..=320;

/// Sample format of the mix file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MixDepth {
    /// 32-bit signed PCM. No dither; the effective dynamic range is already
    /// far below any audible artifact threshold.
    #[default]
    Int32,
    /// 16-bit signed PCM with TPDF dither, like the raw system/mic files.
    Int16Dithered,
}

impl MixDepth {
    /// Bits per sample written to the mix file.
    pub fn bits_per_sample(self) -> u16 {
        match self {
            Self::Int32 => 32,
            Self::Int16Dithered => 16,
        }
    }

    /// Bytes per sample written to the mix file.
    pub fn bytes_per_sample(self) -> usize {
        self.bits_per_sample() as usize / 8
    }
}

/// Device pair for a monitoring session.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MonitorOptions {
    /// Loopback (system playback) device to capture.
    pub loopback: DeviceSelection,
    /// Microphone device to capture.
    pub mic: DeviceSelection,
}

/// Options for starting a recording session.
#[derive(Debug, Clone)]
pub struct RecordOptions {
    /// Loopback (system playback) device to capture.
    pub loopback: DeviceSelection,
    /// Microphone device to capture.
    pub mic: DeviceSelection,
    /// Base path for the session outputs; `<base>-system.wav`,
    /// `<base>-mic.wav`, `<base>-mix.wav`, `<base>.txt` and optionally
    /// `<base>.mp3` are derived from it.
    pub output_base: PathBuf,
    /// MP3 bitrate in kbps; 0 disables the post-session encode.
    pub mp3_bitrate_kbps: u16,
}

impl RecordOptions {
    /// Validates bitrate and output base at entry.
    pub(crate) fn validate(&self) -> Result<(), RecorderError> {
        if self.mp3_bitrate_kbps != 0 && !MP3_BITRATE_RANGE.contains(&self.mp3_bitrate_kbps) {
            return Err(RecorderError::InvalidBitrate(self.mp3_bitrate_kbps));
        }
        if self.output_base.file_name().is_none() {
            return Err(RecorderError::InvalidOutputBase(self.output_base.clone()));
        }
        Ok(())
    }

    /// The monitoring options implied by this recording request.
    pub(crate) fn monitor_options(&self) -> MonitorOptions {
        MonitorOptions {
            loopback: self.loopback.clone(),
            mic: self.mic.clone(),
        }
    }
}

/// The canonical format of a monitoring session, taken from the loopback
/// device at open time. All audio entering the mixer or writer is
/// interleaved f32 in this format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Canonical {
    /// Sample rate in Hz.
    pub sample_rate: u32,
    /// Channel count (1 or 2).
    pub channels: u16,
}

impl Canonical {
    /// Samples per processing block (frames x channels).
    pub fn block_samples(&self) -> usize {
        BLOCK_FRAMES * self.channels as usize
    }

    /// Job queue capacity for this format: ~10 s of audio across the three
    /// targets, clamped to [`QUEUE_MIN_JOBS`]..=[`QUEUE_MAX_JOBS`].
    pub fn queue_capacity(&self) -> usize {
        let blocks_per_second = (self.sample_rate as usize).div_ceil(BLOCK_FRAMES);
        (blocks_per_second * 3 * QUEUE_SECONDS).clamp(QUEUE_MIN_JOBS, QUEUE_MAX_JOBS)
    }

    /// Mic ring warm-up capacity in samples (~4 s of canonical audio).
    pub fn ring_capacity(&self) -> usize {
        self.sample_rate as usize * self.channels as usize * RING_WARMUP_SECONDS
    }
}
