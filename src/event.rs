//! Events emitted to the outside world during monitoring and recording.
//!
//! Events may fire from any thread (pump tasks, the writer task, the encode
//! task). Subscribers are responsible for marshalling to whatever thread
//! they need - typically a UI thread.

use std::path::PathBuf;
use std::sync::Arc;

/// Which capture source a level reading belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LevelSource {
    /// The microphone input.
    Mic,
    /// The system-audio loopback.
    System,
}

/// Classification of a [`RecorderEvent::Status`] message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusKind {
    /// Informational state transition (monitoring started, recording started, …).
    Info,
    /// A runtime failure: disk fault, device loss, encoder failure.
    Error,
    /// The post-session MP3 pass started or hit a progress boundary.
    Encoding,
    /// A session finished; `output_paths` carries the produced files.
    Stopped,
}

/// The paths produced by a completed session.
///
/// `mp3` is `None` when no MP3 was requested or the encode has not produced
/// a file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionOutputs {
    /// Raw system-audio WAV (16-bit, TPDF-dithered).
    pub system: PathBuf,
    /// Microphone WAV converted to the canonical format (16-bit, dithered).
    pub mic: PathBuf,
    /// Gain/average/soft-clip mix WAV.
    pub mix: PathBuf,
    /// Session log (`.txt`).
    pub log: PathBuf,
    /// Compressed mix (`.mp3`), when requested.
    pub mp3: Option<PathBuf>,
}

/// Runtime events emitted during monitoring and recording.
///
/// # Example
///
/// ```
/// use duplex_capture::{LevelSource, RecorderEvent};
///
/// fn handle_event(event: RecorderEvent) {
///     match event {
///         RecorderEvent::LevelChanged { source, rms, peak, clipped } => {
///             if source == LevelSource::Mic && clipped {
///                 eprintln!("mic clipping (rms {rms:.3}, peak {peak:.3})");
///             }
///         }
///         RecorderEvent::Status { kind, message, output_paths } => {
///             eprintln!("{kind:?}: {message} ({output_paths:?})");
///         }
///         RecorderEvent::EncodingProgress { percent } => {
///             eprintln!("encoding {percent}%");
///         }
///     }
/// }
/// ```
#[derive(Debug, Clone)]
pub enum RecorderEvent {
    /// A throttled level reading for one source (~20 Hz per source).
    LevelChanged {
        /// Which source this reading is for.
        source: LevelSource,
        /// Root-mean-square of the post-gain samples in the window.
        rms: f32,
        /// Absolute peak of the post-gain samples in the window.
        peak: f32,
        /// `true` if any post-gain sample in the window exceeded unity.
        clipped: bool,
    },

    /// A state transition or runtime failure report.
    Status {
        /// Classification of this status.
        kind: StatusKind,
        /// Human-readable description.
        message: String,
        /// Output paths, present on [`StatusKind::Stopped`].
        output_paths: Option<SessionOutputs>,
    },

    /// Progress of the post-session MP3 pass.
    EncodingProgress {
        /// Completion percentage, 0..=100.
        percent: u8,
    },
}

/// Callback type for receiving recorder events.
///
/// Register via [`RecorderBuilder::on_event()`]. The callback must be cheap
/// and non-blocking; it runs on whichever task produced the event.
///
/// [`RecorderBuilder::on_event()`]: crate::RecorderBuilder::on_event
pub type EventCallback = Arc<dyn Fn(RecorderEvent) + Send + Sync>;

/// Creates an [`EventCallback`] from a closure without manual `Arc` wrapping.
///
/// # Example
///
/// ```
/// use duplex_capture::{event_callback, RecorderEvent};
///
/// let callback = event_callback(|event| {
///     println!("got event: {event:?}");
/// });
/// ```
pub fn event_callback<F>(f: F) -> EventCallback
where
    F: Fn(RecorderEvent) + Send + Sync + 'static,
{
    Arc::new(f)
}
