//! # duplex-capture
//!
//! Real-time capture-and-mix engine for desktop audio recording: captures
//! the OS playback stream (loopback) and a microphone simultaneously and
//! produces three synchronized files per session - raw system audio, raw
//! mic audio, and a gain-weighted soft-clipped mix - plus an optional MP3
//! rendition of the mix.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use duplex_capture::{MixDepth, MonitorOptions, Recorder, RecordOptions};
//! use tokio_util::sync::CancellationToken;
//!
//! let recorder = Recorder::builder()
//!     .on_event(|event| tracing::info!(?event, "recorder event"))
//!     .mix_depth(MixDepth::Int32)
//!     .build();
//!
//! // Open devices and start live meters.
//! recorder.monitor(MonitorOptions::default()).await?;
//!
//! // Record to meeting-system.wav / meeting-mic.wav / meeting-mix.wav,
//! // then encode meeting.mp3 at 192 kbps.
//! recorder.start(RecordOptions {
//!     loopback: Default::default(),
//!     mic: Default::default(),
//!     output_base: "recordings/meeting".into(),
//!     mp3_bitrate_kbps: 192,
//! }).await?;
//!
//! recorder.set_mic_gain(1.2);
//! let outputs = recorder.stop(CancellationToken::new()).await?;
//! recorder.dispose().await;
//! ```
//!
//! ## Architecture
//!
//! The engine maintains a strict thread boundary:
//!
//! - **CPAL callbacks**: convert incoming samples to `f32` and push into a
//!   lock-free SPSC ring; they never block, allocate, or perform I/O
//! - **Pump tasks**: pop fixed 1024-frame blocks and run the handlers -
//!   metering, gain, the mic ring, soft-clip mixing, quantization
//! - **Writer task**: drains a bounded job queue and exclusively owns the
//!   output files, so disk latency can never stall the audio path
//!
//! The two device clocks are decoupled by a mutex-protected mic ring with
//! an overwrite-oldest policy; the loopback stream drives the mix clock,
//! and a 200 ms liveness threshold hands that clock to the mic handler
//! when the system goes silent.

// Audio code requires intentional numeric casts between sample formats
#![allow(
    clippy::cast_precision_loss,
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::cast_possible_wrap,
    clippy::cast_lossless
)]
#![warn(missing_docs)]

pub mod config;
pub mod dsp;
mod encoder;
mod error;
mod event;
mod gain;
mod logfile;
mod pipeline;
mod pool;
mod ring;
mod session;
pub mod source;
mod wav;
mod writer;

pub use config::{Canonical, MixDepth, MonitorOptions, RecordOptions};
pub use error::RecorderError;
pub use event::{
    event_callback, EventCallback, LevelSource, RecorderEvent, SessionOutputs, StatusKind,
};
pub use gain::AtomicGain;
pub use pool::BufferPool;
pub use ring::MicRing;
pub use session::{Recorder, RecorderBuilder};
pub use source::{
    default_input_device_name, default_loopback_device_name, list_input_devices,
    list_loopback_devices, AudioDevice, CaptureStream, DeviceSelection, MockSource,
};
pub use wav::WavFile;
