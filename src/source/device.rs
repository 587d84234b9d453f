//! CPAL device wrapper for microphone and loopback capture.
//!
//! Loopback capture targets an *output* device: building an input stream on
//! it yields the OS playback mix (WASAPI loopback on Windows, Core Audio
//! taps on recent macOS). The platform fills silence with zero-valued
//! blocks, so a silent system still delivers data.

use std::sync::Arc;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, SampleFormat, Stream, StreamConfig as CpalStreamConfig};
use ringbuf::traits::{Producer, Split};
use ringbuf::HeapRb;

use super::DeviceSelection;
use crate::config::Canonical;
use crate::RecorderError;

/// Invoked from the device thread when a running stream reports an error
/// (disconnect, invalidation). Must be cheap and non-blocking.
pub type StreamErrorHook = Arc<dyn Fn(String) + Send + Sync>;

/// Seconds of audio the callback-side SPSC ring can hold before the
/// callback starts dropping samples on the floor.
const CAPTURE_BUFFER_SECONDS: usize = 4;

/// Which role a device is opened for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum DeviceKind {
    /// Microphone input.
    Input,
    /// System playback captured as loopback.
    Loopback,
}

impl DeviceKind {
    fn label(self) -> &'static str {
        match self {
            Self::Input => "input",
            Self::Loopback => "loopback",
        }
    }
}

/// Wrapper around a CPAL device opened for capture.
#[must_use]
pub struct AudioDevice {
    device: Device,
    kind: DeviceKind,
}

impl AudioDevice {
    /// Opens a device of the given kind.
    ///
    /// # Errors
    ///
    /// Returns `NoDefaultDevice` / `DeviceNotFound` for missing devices and
    /// `Backend` for host enumeration failures.
    pub(crate) fn open(
        kind: DeviceKind,
        selection: &DeviceSelection,
    ) -> Result<Self, RecorderError> {
        let host = cpal::default_host();
        let device = match selection {
            DeviceSelection::SystemDefault => match kind {
                DeviceKind::Input => host.default_input_device(),
                DeviceKind::Loopback => host.default_output_device(),
            }
            .ok_or(RecorderError::NoDefaultDevice { kind: kind.label() })?,
            DeviceSelection::ByName(name) => {
                let devices = match kind {
                    DeviceKind::Input => host.input_devices(),
                    DeviceKind::Loopback => host.output_devices(),
                }
                .map_err(|e| RecorderError::Backend(e.to_string()))?;

                devices
                    .into_iter()
                    .find(|d| d.name().map(|n| &n == name).unwrap_or(false))
                    .ok_or_else(|| RecorderError::DeviceNotFound { name: name.clone() })?
            }
        };

        Ok(Self { device, kind })
    }

    /// Returns the device name, or `"unknown"` if it cannot be queried.
    pub fn name(&self) -> String {
        self.device
            .name()
            .unwrap_or_else(|_| "unknown".to_string())
    }

    /// Returns the device's native capture format.
    ///
    /// For loopback this is the output device's playback format, which
    /// becomes the session's canonical format.
    pub fn native_config(&self) -> Result<Canonical, RecorderError> {
        let config = self.supported_config()?;
        Ok(Canonical {
            sample_rate: config.sample_rate().0,
            channels: config.channels(),
        })
    }

    fn supported_config(&self) -> Result<cpal::SupportedStreamConfig, RecorderError> {
        let result = match self.kind {
            DeviceKind::Input => self.device.default_input_config(),
            DeviceKind::Loopback => self.device.default_output_config(),
        };
        result.map_err(|e| self.map_config_error(e))
    }

    fn map_config_error(&self, err: cpal::DefaultStreamConfigError) -> RecorderError {
        match err {
            cpal::DefaultStreamConfigError::DeviceNotAvailable => {
                RecorderError::DeviceUnavailable {
                    name: self.name(),
                    reason: "device invalidated".to_string(),
                    transient: true,
                }
            }
            other => RecorderError::Backend(other.to_string()),
        }
    }

    /// Starts capturing and returns the running stream plus the SPSC
    /// consumer the pump task reads from.
    ///
    /// The CPAL callback only converts samples to `f32` and pushes them
    /// into the ring; it never blocks or allocates. `on_error` fires on
    /// mid-stream failures such as device disconnect.
    pub fn start_capture(
        &self,
        on_error: Option<StreamErrorHook>,
    ) -> Result<(CaptureStream, ringbuf::HeapCons<f32>), RecorderError> {
        let native = self.native_config()?;
        let capacity =
            native.sample_rate as usize * native.channels as usize * CAPTURE_BUFFER_SECONDS;
        let ring = HeapRb::<f32>::new(capacity);
        let (producer, consumer) = ring.split();

        let supported = self.supported_config()?;
        let sample_format = supported.sample_format();
        let config: CpalStreamConfig = supported.into();

        let stream = match sample_format {
            SampleFormat::F32 => self.build_f32_stream(&config, producer, on_error)?,
            SampleFormat::I16 => self.build_i16_stream(&config, producer, on_error)?,
            format => {
                return Err(RecorderError::Backend(format!(
                    "unsupported sample format: {format:?}"
                )));
            }
        };

        stream.play().map_err(|e| match e {
            cpal::PlayStreamError::DeviceNotAvailable => RecorderError::DeviceUnavailable {
                name: self.name(),
                reason: "device invalidated".to_string(),
                transient: true,
            },
            other => RecorderError::Backend(other.to_string()),
        })?;

        Ok((CaptureStream::new(stream), consumer))
    }

    fn build_f32_stream(
        &self,
        config: &CpalStreamConfig,
        mut producer: ringbuf::HeapProd<f32>,
        on_error: Option<StreamErrorHook>,
    ) -> Result<Stream, RecorderError> {
        self.device
            .build_input_stream(
                config,
                move |data: &[f32], _: &cpal::InputCallbackInfo| {
                    // Non-blocking push; drops samples if the pump stalled.
                    let _ = producer.push_slice(data);
                },
                move |err| {
                    tracing::error!("audio stream error: {err}");
                    if let Some(ref hook) = on_error {
                        hook(err.to_string());
                    }
                },
                None,
            )
            .map_err(|e| self.map_build_error(e))
    }

    fn build_i16_stream(
        &self,
        config: &CpalStreamConfig,
        mut producer: ringbuf::HeapProd<f32>,
        on_error: Option<StreamErrorHook>,
    ) -> Result<Stream, RecorderError> {
        self.device
            .build_input_stream(
                config,
                move |data: &[i16], _: &cpal::InputCallbackInfo| {
                    for &sample in data {
                        let _ = producer.try_push(f32::from(sample) / 32768.0);
                    }
                },
                move |err| {
                    tracing::error!("audio stream error: {err}");
                    if let Some(ref hook) = on_error {
                        hook(err.to_string());
                    }
                },
                None,
            )
            .map_err(|e| self.map_build_error(e))
    }

    fn map_build_error(&self, err: cpal::BuildStreamError) -> RecorderError {
        match err {
            cpal::BuildStreamError::DeviceNotAvailable => RecorderError::DeviceUnavailable {
                name: self.name(),
                reason: "device invalidated".to_string(),
                transient: true,
            },
            other => RecorderError::Backend(other.to_string()),
        }
    }
}

/// A running capture stream.
///
/// Capture continues while this exists; dropping it stops the device
/// callbacks. `cpal::Stream` is `!Send`, but the controller only moves the
/// handle between setup and teardown without touching the stream, so the
/// wrapper asserts `Send` and guards the assumption with a thread-affinity
/// warning on drop.
pub struct CaptureStream {
    /// Held only for RAII cleanup.
    #[allow(dead_code)]
    stream: Stream,
    creator_thread: std::thread::ThreadId,
}

unsafe impl Send for CaptureStream {}

impl CaptureStream {
    fn new(stream: Stream) -> Self {
        Self {
            stream,
            creator_thread: std::thread::current().id(),
        }
    }
}

impl Drop for CaptureStream {
    fn drop(&mut self) {
        if std::thread::current().id() != self.creator_thread {
            tracing::warn!(
                created = ?self.creator_thread,
                dropping = ?std::thread::current().id(),
                "capture stream dropped on a different thread than created"
            );
        }
    }
}
