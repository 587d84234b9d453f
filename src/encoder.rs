//! Post-session MP3 pass over the finished mix file.
//!
//! Runs detached from `stop`: reads the mix WAV in bounded chunks, converts
//! to 16-bit, feeds LAME, and reports progress through the event surface.
//! Cancellation is cooperative and checked once per chunk; a cancelled pass
//! leaves a partial `.mp3` behind, which callers may keep or delete.

use std::fs::File;
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::PathBuf;

use mp3lame_encoder::{Bitrate, Builder, FlushNoGap, InterleavedPcm, Quality};
use tokio_util::sync::CancellationToken;

use crate::config::ENCODE_CHUNK_BYTES;
use crate::event::{EventCallback, RecorderEvent, StatusKind};

/// A dispatched encode request.
pub(crate) struct EncodeJob {
    pub mix_path: PathBuf,
    pub mp3_path: PathBuf,
    pub bitrate_kbps: u16,
    pub events: Option<EventCallback>,
    pub cancel: CancellationToken,
}

#[derive(Debug, PartialEq, Eq)]
pub(crate) enum EncodeOutcome {
    Completed,
    Cancelled,
}

#[derive(Debug, thiserror::Error)]
pub(crate) enum EncodeError {
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
    #[error("mix file is not a PCM WAV this engine produced")]
    BadHeader,
    #[error("lame encoder error: {0}")]
    Lame(String),
}

/// Spawns the encode pass on the blocking pool and reports through events.
pub(crate) fn spawn(job: EncodeJob) -> tokio::task::JoinHandle<()> {
    tokio::task::spawn_blocking(move || {
        emit_status(
            &job.events,
            StatusKind::Encoding,
            format!("encoding mp3 at {} kbps", job.bitrate_kbps),
        );

        match encode_mix_to_mp3(&job) {
            Ok(EncodeOutcome::Completed) => {
                tracing::info!(path = %job.mp3_path.display(), "mp3 encode finished");
                emit_status(
                    &job.events,
                    StatusKind::Info,
                    format!("mp3 saved to {}", job.mp3_path.display()),
                );
            }
            Ok(EncodeOutcome::Cancelled) => {
                tracing::info!(path = %job.mp3_path.display(), "mp3 encode cancelled");
                emit_status(
                    &job.events,
                    StatusKind::Info,
                    format!("mp3 encoding cancelled; partial file at {}", job.mp3_path.display()),
                );
            }
            Err(err) => {
                tracing::error!("mp3 encode failed: {err}");
                emit_status(
                    &job.events,
                    StatusKind::Error,
                    format!("mp3 encoding failed: {err} (wav files are intact)"),
                );
            }
        }
    })
}

fn emit_status(events: &Option<EventCallback>, kind: StatusKind, message: String) {
    if let Some(events) = events {
        events(RecorderEvent::Status {
            kind,
            message,
            output_paths: None,
        });
    }
}

/// Parsed fields of the 44-byte header this engine writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct WavMeta {
    channels: u16,
    sample_rate: u32,
    bits_per_sample: u16,
    data_bytes: u32,
}

fn parse_wav_header(header: &[u8; 44]) -> Option<WavMeta> {
    if &header[0..4] != b"RIFF" || &header[8..12] != b"WAVE" || &header[12..16] != b"fmt " {
        return None;
    }
    // PCM (integer) format tag only.
    if u16::from_le_bytes([header[20], header[21]]) != 1 {
        return None;
    }
    let meta = WavMeta {
        channels: u16::from_le_bytes([header[22], header[23]]),
        sample_rate: u32::from_le_bytes([header[24], header[25], header[26], header[27]]),
        bits_per_sample: u16::from_le_bytes([header[34], header[35]]),
        data_bytes: u32::from_le_bytes([header[40], header[41], header[42], header[43]]),
    };
    if meta.channels == 0 || !(meta.bits_per_sample == 16 || meta.bits_per_sample == 32) {
        return None;
    }
    Some(meta)
}

/// Maps a validated kbps value onto LAME's constant-bitrate steps.
fn bitrate_for(kbps: u16) -> Bitrate {
    match kbps {
        0..=64 => Bitrate::Kbps64,
        65..=80 => Bitrate::Kbps80,
        81..=96 => Bitrate::Kbps96,
        97..=112 => Bitrate::Kbps112,
        113..=128 => Bitrate::Kbps128,
        129..=160 => Bitrate::Kbps160,
        161..=192 => Bitrate::Kbps192,
        193..=224 => Bitrate::Kbps224,
        225..=256 => Bitrate::Kbps256,
        _ => Bitrate::Kbps320,
    }
}

/// Converts one chunk of mix-file bytes into interleaved stereo i16.
///
/// LAME's interleaved API expects stereo; mono input is duplicated.
fn pcm_from_chunk(bytes: &[u8], meta: WavMeta, pcm: &mut Vec<i16>) {
    pcm.clear();
    match meta.bits_per_sample {
        32 => {
            for quad in bytes.chunks_exact(4) {
                let sample = i32::from_le_bytes([quad[0], quad[1], quad[2], quad[3]]);
                push_frame_sample(pcm, (sample >> 16) as i16, meta.channels);
            }
        }
        _ => {
            for pair in bytes.chunks_exact(2) {
                let sample = i16::from_le_bytes([pair[0], pair[1]]);
                push_frame_sample(pcm, sample, meta.channels);
            }
        }
    }
}

#[inline]
fn push_frame_sample(pcm: &mut Vec<i16>, sample: i16, channels: u16) {
    pcm.push(sample);
    if channels == 1 {
        pcm.push(sample);
    }
}

fn encode_mix_to_mp3(job: &EncodeJob) -> Result<EncodeOutcome, EncodeError> {
    let mut mix = File::open(&job.mix_path)?;
    let mut header = [0u8; 44];
    mix.read_exact(&mut header)?;
    let meta = parse_wav_header(&header).ok_or(EncodeError::BadHeader)?;
    mix.seek(SeekFrom::Start(44))?;

    let mut builder = Builder::new().ok_or_else(|| EncodeError::Lame("init failed".into()))?;
    builder
        .set_num_channels(2)
        .map_err(|e| EncodeError::Lame(format!("{e:?}")))?;
    builder
        .set_sample_rate(meta.sample_rate)
        .map_err(|e| EncodeError::Lame(format!("{e:?}")))?;
    builder
        .set_brate(bitrate_for(job.bitrate_kbps))
        .map_err(|e| EncodeError::Lame(format!("{e:?}")))?;
    builder
        .set_quality(Quality::Best)
        .map_err(|e| EncodeError::Lame(format!("{e:?}")))?;
    let mut encoder = builder
        .build()
        .map_err(|e| EncodeError::Lame(format!("{e:?}")))?;

    let mut mp3 = File::create(&job.mp3_path)?;

    let frame_bytes = meta.channels as usize * meta.bits_per_sample as usize / 8;
    let chunk_bytes = (ENCODE_CHUNK_BYTES / frame_bytes).max(1) * frame_bytes;
    let total = u64::from(meta.data_bytes);

    let mut chunk = vec![0u8; chunk_bytes];
    let mut pcm: Vec<i16> = Vec::with_capacity(chunk_bytes / 2 * 2);
    let mut out: Vec<u8> = Vec::new();
    let mut processed: u64 = 0;

    while processed < total {
        if job.cancel.is_cancelled() {
            return Ok(EncodeOutcome::Cancelled);
        }

        // Whole frames only; a short read would tear a sample across
        // chunks and swap channels from there on.
        let want = chunk_bytes.min((total - processed) as usize);
        mix.read_exact(&mut chunk[..want])?;

        pcm_from_chunk(&chunk[..want], meta, &mut pcm);

        out.clear();
        out.reserve(pcm.len() * 5 / 4 + 7200);
        let encoded = encoder
            .encode(InterleavedPcm(&pcm), out.spare_capacity_mut())
            .map_err(|e| EncodeError::Lame(format!("{e:?}")))?;
        // Safety: `encode` initialized exactly `encoded` bytes of the spare capacity.
        unsafe { out.set_len(encoded) };
        mp3.write_all(&out)?;

        processed += want as u64;
        if let Some(ref events) = job.events {
            let percent = ((processed * 100) / total.max(1)).min(100) as u8;
            events(RecorderEvent::EncodingProgress { percent });
        }
    }

    out.clear();
    out.reserve(7200);
    let flushed = encoder
        .flush::<FlushNoGap>(out.spare_capacity_mut())
        .map_err(|e| EncodeError::Lame(format!("{e:?}")))?;
    // Safety: `flush` initialized exactly `flushed` bytes of the spare capacity.
    unsafe { out.set_len(flushed) };
    mp3.write_all(&out)?;
    mp3.flush()?;

    Ok(EncodeOutcome::Completed)
}
