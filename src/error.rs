//! Error types for duplex-capture.
//!
//! Errors are split into two categories:
//! - **Fatal errors** ([`RecorderError`]): returned from the controller's
//!   public operations (`monitor`, `start`, `stop`, …)
//! - **Runtime failures**: disk faults, queue drops and device hiccups are
//!   surfaced via [`RecorderEvent::Status`](crate::RecorderEvent::Status)
//!   and the session log, never as panics

use std::path::PathBuf;

/// Errors returned from the recorder's public lifecycle operations.
///
/// Failures that occur while a session is already running (writer faults,
/// dropped blocks, device stalls) are reported through the event surface
/// instead; see [`StatusKind::Error`](crate::StatusKind::Error).
#[derive(Debug, thiserror::Error)]
pub enum RecorderError {
    /// The requested audio device was not found.
    #[error("device not found: {name}")]
    DeviceNotFound {
        /// Name of the device that wasn't found.
        name: String,
    },

    /// The requested device exists but could not be opened.
    ///
    /// `transient` is `true` for conditions like WASAPI device invalidation
    /// that are worth retrying; `monitor`/`start` retry those internally
    /// before returning this error.
    #[error("device unavailable: {name} - {reason}")]
    DeviceUnavailable {
        /// Name of the unavailable device.
        name: String,
        /// Reason the device is unavailable.
        reason: String,
        /// Whether the failure class is transient.
        transient: bool,
    },

    /// No default device of the requested kind is configured on this system.
    #[error("no default {kind} device configured")]
    NoDefaultDevice {
        /// Device kind: "input" or "loopback".
        kind: &'static str,
    },

    /// An error from the underlying audio library (CPAL).
    #[error("audio backend error: {0}")]
    Backend(String),

    /// MP3 bitrate outside the supported range.
    #[error("mp3 bitrate {0} kbps outside supported range (0 = disabled, 64-320 = encode)")]
    InvalidBitrate(u16),

    /// The output base path has no parent directory or no file stem.
    #[error("invalid output base path: {}", .0.display())]
    InvalidOutputBase(PathBuf),

    /// `stop` was called while no recording is in progress.
    #[error("not recording")]
    NotRecording,

    /// `start` was called while a recording is already in progress.
    #[error("already recording")]
    AlreadyRecording,

    /// `stop_monitor` was called while a recording is in progress.
    #[error("cannot stop monitoring while recording; call stop() first")]
    StillRecording,

    /// A public operation was invoked after `dispose()`.
    #[error("recorder has been disposed")]
    Disposed,

    /// File I/O failed while creating session outputs.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

impl RecorderError {
    /// Returns `true` if this error is worth retrying at device-open time.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::DeviceUnavailable { transient: true, .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_device_not_found_display() {
        let err = RecorderError::DeviceNotFound {
            name: "USB Mic".to_string(),
        };
        assert_eq!(err.to_string(), "device not found: USB Mic");
    }

    #[test]
    fn test_transient_classification() {
        let transient = RecorderError::DeviceUnavailable {
            name: "Speakers".to_string(),
            reason: "invalidated".to_string(),
            transient: true,
        };
        assert!(transient.is_transient());

        let fatal = RecorderError::DeviceUnavailable {
            name: "Speakers".to_string(),
            reason: "in exclusive use".to_string(),
            transient: false,
        };
        assert!(!fatal.is_transient());
        assert!(!RecorderError::Disposed.is_transient());
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "missing");
        let err: RecorderError = io_err.into();
        assert!(matches!(err, RecorderError::Io(_)));
    }
}
