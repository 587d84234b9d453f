//! Session controller: lifecycle state machine, device wiring, and the
//! shared state the handlers run against.
//!
//! States: Idle -> Monitoring -> Recording -> (Monitoring | Idle).
//! `monitor` opens the devices and starts meters; `start` adds the output
//! files, job queue and writer; `stop` drains and returns to Monitoring;
//! `stop_monitor` returns to Idle; `dispose` is the idempotent full
//! teardown.

use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Mutex, RwLock};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::{
    Canonical, MixDepth, MonitorOptions, RecordOptions, DISPOSE_JOIN_TIMEOUT, DROP_LOG_CADENCE,
    LOOPBACK_SILENCE_THRESHOLD, OPEN_RETRIES, OPEN_RETRY_BACKOFF, WRITER_DRAIN_TIMEOUT,
};
use crate::encoder::{self, EncodeJob};
use crate::event::{EventCallback, RecorderEvent, SessionOutputs, StatusKind};
use crate::gain::AtomicGain;
use crate::logfile::SessionLog;
use crate::pipeline::{spawn_pump, LoopbackHandler, MicHandler};
use crate::pool::BufferPool;
use crate::ring::MicRing;
use crate::source::{AudioDevice, CaptureStream, DeviceKind};
use crate::wav::WavFile;
use crate::writer::{DiskWriter, WriteJob, WriterReport};
use crate::RecorderError;

/// Bound on pump-task joins during monitor teardown.
const PUMP_JOIN_TIMEOUT: Duration = Duration::from_secs(5);

/// State shared between the controller, the handlers and the writer.
pub(crate) struct EngineShared {
    /// Gate for the handlers' file-writing steps.
    pub recording: AtomicBool,
    epoch: Instant,
    /// Milliseconds since `epoch` of the last loopback block; `u64::MAX`
    /// until the first block arrives.
    last_loopback_tick_ms: AtomicU64,
    pub mic_gain: AtomicGain,
    pub loopback_gain: AtomicGain,
    session: RwLock<Option<Arc<SessionIo>>>,
}

impl EngineShared {
    pub fn new() -> Self {
        Self {
            recording: AtomicBool::new(false),
            epoch: Instant::now(),
            last_loopback_tick_ms: AtomicU64::new(u64::MAX),
            mic_gain: AtomicGain::default(),
            loopback_gain: AtomicGain::default(),
            session: RwLock::new(None),
        }
    }

    pub fn is_recording(&self) -> bool {
        self.recording.load(Ordering::SeqCst)
    }

    pub fn start_recording(&self) {
        self.recording.store(true, Ordering::SeqCst);
    }

    pub fn stop_recording(&self) {
        self.recording.store(false, Ordering::SeqCst);
    }

    fn now_ms(&self) -> u64 {
        self.epoch.elapsed().as_millis() as u64
    }

    /// Records the loopback-liveness marker.
    pub fn touch_loopback(&self) {
        self.last_loopback_tick_ms
            .store(self.now_ms(), Ordering::Relaxed);
    }

    /// `true` once no loopback block has arrived for the silence threshold.
    pub fn loopback_silent(&self) -> bool {
        let tick = self.last_loopback_tick_ms.load(Ordering::Relaxed);
        tick == u64::MAX
            || self.now_ms().saturating_sub(tick) > LOOPBACK_SILENCE_THRESHOLD.as_millis() as u64
    }

    /// Clones out the per-recording resources, if a session is installed.
    /// The read lock is held only for the clone.
    pub fn current_session(&self) -> Option<Arc<SessionIo>> {
        self.session.read().clone()
    }

    pub fn install_session(&self, io: Option<Arc<SessionIo>>) {
        *self.session.write() = io;
    }
}

/// Per-session counters, shared by handlers and reported at stop.
pub(crate) struct SessionCounters {
    pub dropped_blocks: AtomicU64,
    pub underruns: AtomicU64,
    pub peak_backlog_samples: AtomicU64,
}

impl SessionCounters {
    pub fn new() -> Self {
        Self {
            dropped_blocks: AtomicU64::new(0),
            underruns: AtomicU64::new(0),
            peak_backlog_samples: AtomicU64::new(0),
        }
    }

    pub fn note_backlog(&self, samples: usize) {
        self.peak_backlog_samples
            .fetch_max(samples as u64, Ordering::Relaxed);
    }
}

/// The per-recording resources the handlers need: queue producer, buffer
/// pool, session log and counters.
pub(crate) struct SessionIo {
    pub jobs: mpsc::Sender<WriteJob>,
    pub pool: Arc<BufferPool>,
    pub log: Arc<SessionLog>,
    pub counters: Arc<SessionCounters>,
    pub mix_depth: MixDepth,
}

impl SessionIo {
    /// Non-blocking enqueue. A full queue drops the job, returns the buffer
    /// to the pool, counts the drop and logs on the 1st and every 100th.
    pub fn enqueue(&self, job: WriteJob) {
        match self.jobs.try_send(job) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(job)) => {
                self.pool.give_back(job.bytes);
                let dropped = self.counters.dropped_blocks.fetch_add(1, Ordering::Relaxed) + 1;
                if dropped == 1 || dropped % DROP_LOG_CADENCE == 0 {
                    self.log.warn(
                        "queue",
                        &format!("job queue full; {dropped} blocks dropped so far"),
                    );
                }
            }
            Err(mpsc::error::TrySendError::Closed(job)) => {
                self.pool.give_back(job.bytes);
            }
        }
    }
}

/// Live monitoring resources: device streams and their pump tasks.
struct MonitorRuntime {
    options: MonitorOptions,
    canonical: Canonical,
    loopback_name: String,
    mic_name: String,
    ring: Arc<Mutex<MicRing>>,
    running: Arc<AtomicBool>,
    streams: Vec<CaptureStream>,
    pumps: Vec<JoinHandle<()>>,
}

/// Resources that exist only while recording.
struct ActiveRecording {
    writer: JoinHandle<WriterReport>,
    fault: Arc<Mutex<Option<std::io::Error>>>,
    log: Arc<SessionLog>,
    counters: Arc<SessionCounters>,
    outputs: SessionOutputs,
    bitrate: u16,
    io: Arc<SessionIo>,
}

#[derive(Default)]
struct ControlState {
    monitor: Option<MonitorRuntime>,
    active: Option<ActiveRecording>,
}

/// Builder for a [`Recorder`].
#[must_use]
pub struct RecorderBuilder {
    event_callback: Option<EventCallback>,
    mix_depth: MixDepth,
    mic_gain: f32,
    loopback_gain: f32,
}

impl RecorderBuilder {
    fn new() -> Self {
        Self {
            event_callback: None,
            mix_depth: MixDepth::default(),
            mic_gain: crate::config::GAIN_DEFAULT,
            loopback_gain: crate::config::GAIN_DEFAULT,
        }
    }

    /// Sets a callback for level, status and encoding-progress events.
    pub fn on_event<F>(mut self, callback: F) -> Self
    where
        F: Fn(RecorderEvent) + Send + Sync + 'static,
    {
        self.event_callback = Some(crate::event::event_callback(callback));
        self
    }

    /// Sets the mix file's sample format. Default: 32-bit.
    pub fn mix_depth(mut self, depth: MixDepth) -> Self {
        self.mix_depth = depth;
        self
    }

    /// Sets the initial microphone gain.
    pub fn mic_gain(mut self, gain: f32) -> Self {
        self.mic_gain = gain;
        self
    }

    /// Sets the initial loopback gain.
    pub fn loopback_gain(mut self, gain: f32) -> Self {
        self.loopback_gain = gain;
        self
    }

    /// Builds the recorder in the Idle state.
    pub fn build(self) -> Recorder {
        let shared = Arc::new(EngineShared::new());
        shared.mic_gain.set(self.mic_gain);
        shared.loopback_gain.set(self.loopback_gain);
        Recorder {
            shared,
            events: self.event_callback,
            mix_depth: self.mix_depth,
            state: tokio::sync::Mutex::new(ControlState::default()),
            disposed: AtomicBool::new(false),
        }
    }
}

/// The capture-and-mix engine's public controller.
///
/// All lifecycle operations are callable from any thread; `monitor`,
/// `start` and `stop` may suspend (device-open backoff and the writer
/// drain are the suspension points). Gain accessors and `is_recording`
/// never block.
pub struct Recorder {
    shared: Arc<EngineShared>,
    events: Option<EventCallback>,
    mix_depth: MixDepth,
    state: tokio::sync::Mutex<ControlState>,
    disposed: AtomicBool,
}

impl Recorder {
    /// Starts configuring a recorder.
    pub fn builder() -> RecorderBuilder {
        RecorderBuilder::new()
    }

    fn ensure_live(&self) -> Result<(), RecorderError> {
        if self.disposed.load(Ordering::SeqCst) {
            Err(RecorderError::Disposed)
        } else {
            Ok(())
        }
    }

    fn emit_status(&self, kind: StatusKind, message: impl Into<String>, outputs: Option<SessionOutputs>) {
        if let Some(ref events) = self.events {
            events(RecorderEvent::Status {
                kind,
                message: message.into(),
                output_paths: outputs,
            });
        }
    }

    /// `true` while a recording session is active.
    pub fn is_recording(&self) -> bool {
        self.shared.is_recording()
    }

    /// Escalation path for mid-stream device failures: stop accepting new
    /// jobs at the source, note it in the session log, and report.
    fn stream_error_hook(&self) -> crate::source::StreamErrorHook {
        let shared = Arc::clone(&self.shared);
        let events = self.events.clone();
        Arc::new(move |reason: String| {
            if let Some(io) = shared.current_session() {
                io.log.error("device", &format!("stream error: {reason}"));
            }
            shared.stop_recording();
            if let Some(ref events) = events {
                events(RecorderEvent::Status {
                    kind: StatusKind::Error,
                    message: format!("audio device error: {reason}"),
                    output_paths: None,
                });
            }
        })
    }

    /// Current microphone gain.
    pub fn mic_gain(&self) -> f32 {
        self.shared.mic_gain.get()
    }

    /// Sets the microphone gain (clamped; non-finite rejected).
    pub fn set_mic_gain(&self, gain: f32) {
        self.shared.mic_gain.set(gain);
    }

    /// Current loopback gain.
    pub fn loopback_gain(&self) -> f32 {
        self.shared.loopback_gain.get()
    }

    /// Sets the loopback gain (clamped; non-finite rejected).
    pub fn set_loopback_gain(&self, gain: f32) {
        self.shared.loopback_gain.set(gain);
    }

    /// Opens the devices and starts metering without recording.
    ///
    /// Idempotent when already monitoring the same devices; reconfigures
    /// otherwise (not allowed while recording).
    pub async fn monitor(&self, options: MonitorOptions) -> Result<(), RecorderError> {
        self.ensure_live()?;
        let mut state = self.state.lock().await;
        self.monitor_locked(&mut state, &options).await.map(|_| ())
    }

    async fn monitor_locked(
        &self,
        state: &mut ControlState,
        options: &MonitorOptions,
    ) -> Result<Canonical, RecorderError> {
        if let Some(monitor) = &state.monitor {
            if monitor.options == *options {
                return Ok(monitor.canonical);
            }
            if state.active.is_some() {
                return Err(RecorderError::AlreadyRecording);
            }
            let old = state.monitor.take().expect("checked above");
            Self::teardown_monitor(old).await;
        }

        let error_hook = self.stream_error_hook();
        let loopback =
            open_capture_with_retry(DeviceKind::Loopback, &options.loopback, &error_hook).await?;
        let canonical = loopback.native;
        let mic = open_capture_with_retry(DeviceKind::Input, &options.mic, &error_hook).await?;

        let ring = Arc::new(Mutex::new(MicRing::with_capacity(canonical.ring_capacity())));
        let running = Arc::new(AtomicBool::new(true));

        self.shared.touch_loopback();

        let mut loopback_handler = LoopbackHandler::new(
            Arc::clone(&self.shared),
            Arc::clone(&ring),
            self.events.clone(),
            canonical,
        );
        let loopback_pump = spawn_pump(
            loopback.consumer,
            canonical,
            Arc::clone(&running),
            move |block| loopback_handler.handle_block(block),
        );

        let mut mic_handler = MicHandler::new(
            Arc::clone(&self.shared),
            Arc::clone(&ring),
            self.events.clone(),
            mic.native,
            canonical,
        );
        let mic_pump = spawn_pump(mic.consumer, mic.native, Arc::clone(&running), move |block| {
            mic_handler.handle_block(block)
        });

        tracing::info!(
            loopback = %loopback.name,
            mic = %mic.name,
            sample_rate = canonical.sample_rate,
            channels = canonical.channels,
            "monitoring started"
        );
        self.emit_status(
            StatusKind::Info,
            format!(
                "monitoring {} + {} at {} Hz / {} ch",
                loopback.name, mic.name, canonical.sample_rate, canonical.channels
            ),
            None,
        );

        state.monitor = Some(MonitorRuntime {
            options: options.clone(),
            canonical,
            loopback_name: loopback.name,
            mic_name: mic.name,
            ring,
            running,
            streams: vec![loopback.stream, mic.stream],
            pumps: vec![loopback_pump, mic_pump],
        });
        Ok(canonical)
    }

    /// Starts a recording session, monitoring first if needed.
    ///
    /// Returns the output paths selected for this session (collisions are
    /// avoided by suffixing ` (N)` before each extension).
    pub async fn start(&self, options: RecordOptions) -> Result<SessionOutputs, RecorderError> {
        self.ensure_live()?;
        options.validate()?;

        let mut state = self.state.lock().await;
        if state.active.is_some() {
            return Err(RecorderError::AlreadyRecording);
        }
        let canonical = self
            .monitor_locked(&mut state, &options.monitor_options())
            .await?;
        let monitor = state.monitor.as_ref().expect("monitoring just ensured");

        let outputs = select_output_paths(&options.output_base, options.mp3_bitrate_kbps > 0)?;
        let log = Arc::new(SessionLog::create(&outputs.log)?);
        log.info(
            "session",
            &format!(
                "recording started: loopback '{}', mic '{}', {} Hz / {} ch",
                monitor.loopback_name, monitor.mic_name, canonical.sample_rate, canonical.channels
            ),
        );
        log.info(
            "session",
            &format!(
                "outputs: {} | {} | {} (queue capacity {} jobs)",
                outputs.system.display(),
                outputs.mic.display(),
                outputs.mix.display(),
                canonical.queue_capacity()
            ),
        );

        let system = WavFile::create(&outputs.system, canonical.sample_rate, canonical.channels, 16)?;
        let mic = WavFile::create(&outputs.mic, canonical.sample_rate, canonical.channels, 16)?;
        let mix = WavFile::create(
            &outputs.mix,
            canonical.sample_rate,
            canonical.channels,
            self.mix_depth.bits_per_sample(),
        )?;

        let (jobs_tx, jobs_rx) = mpsc::channel(canonical.queue_capacity());
        let pool = Arc::new(BufferPool::new());
        let fault = Arc::new(Mutex::new(None));
        let counters = Arc::new(SessionCounters::new());
        let io = Arc::new(SessionIo {
            jobs: jobs_tx,
            pool: Arc::clone(&pool),
            log: Arc::clone(&log),
            counters: Arc::clone(&counters),
            mix_depth: self.mix_depth,
        });

        let writer = DiskWriter::new(
            jobs_rx,
            system,
            mic,
            mix,
            pool,
            Arc::clone(&self.shared),
            Arc::clone(&fault),
            Arc::clone(&log),
            self.events.clone(),
        );
        let writer = tokio::spawn(writer.run());

        // Anything the ring gathered before this instant predates the session.
        monitor.ring.lock().clear();
        self.shared.install_session(Some(Arc::clone(&io)));
        self.shared.start_recording();

        self.emit_status(
            StatusKind::Info,
            format!("recording to {}", outputs.mix.display()),
            None,
        );

        state.active = Some(ActiveRecording {
            writer,
            fault,
            log,
            counters,
            outputs: outputs.clone(),
            bitrate: options.mp3_bitrate_kbps,
            io,
        });
        Ok(outputs)
    }

    /// Stops the recording session, drains the writer, dispatches the MP3
    /// pass when configured, and returns to Monitoring.
    ///
    /// `cancel` governs only the post-session encode; cancelling it aborts
    /// the encoder at the next chunk boundary, leaving a partial MP3.
    pub async fn stop(&self, cancel: CancellationToken) -> Result<SessionOutputs, RecorderError> {
        self.ensure_live()?;
        let mut state = self.state.lock().await;
        let Some(active) = state.active.take() else {
            return Err(RecorderError::NotRecording);
        };
        let ActiveRecording {
            writer,
            fault,
            log,
            counters,
            mut outputs,
            bitrate,
            io,
        } = active;

        // Handlers stop enqueuing on their next block; dropping the session
        // IO releases the last queue producer so the writer can drain out.
        self.shared.stop_recording();
        self.shared.install_session(None);
        drop(io);

        let report = match tokio::time::timeout(WRITER_DRAIN_TIMEOUT, writer).await {
            Ok(Ok(report)) => Some(report),
            Ok(Err(join_err)) => {
                log.error("session", &format!("writer task failed: {join_err}"));
                None
            }
            Err(_) => {
                log.warn("session", "writer drain timed out after 30s; proceeding");
                tracing::warn!("writer drain timed out after 30s; proceeding");
                None
            }
        };

        let fault_err = fault.lock().take();
        if let Some(ref err) = fault_err {
            log.error("session", &format!("session ended with disk fault: {err}"));
            self.emit_status(
                StatusKind::Error,
                format!("session ended with disk fault: {err}"),
                None,
            );
        }

        log.info(
            "session",
            &format!(
                "stopped: {} dropped blocks, {} underruns, peak backlog {} samples",
                counters.dropped_blocks.load(Ordering::Relaxed),
                counters.underruns.load(Ordering::Relaxed),
                counters.peak_backlog_samples.load(Ordering::Relaxed),
            ),
        );

        let mix_bytes = report.map_or_else(
            || {
                std::fs::metadata(&outputs.mix)
                    .map(|m| m.len().saturating_sub(44))
                    .unwrap_or(0)
            },
            |r| r.data_bytes[2],
        );

        // The mp3 path exists exactly when a bitrate was requested; the mix
        // must also be non-empty for the encode to be worth dispatching.
        if let Some(mp3_path) = outputs.mp3.take() {
            if mix_bytes > 0 {
                log.info("encode", &format!("dispatching mp3 encode at {bitrate} kbps"));
                encoder::spawn(EncodeJob {
                    mix_path: outputs.mix.clone(),
                    mp3_path: mp3_path.clone(),
                    bitrate_kbps: bitrate,
                    events: self.events.clone(),
                    cancel,
                });
                outputs.mp3 = Some(mp3_path);
            }
        }

        log.close();
        self.emit_status(StatusKind::Stopped, "recording stopped", Some(outputs.clone()));
        Ok(outputs)
    }

    /// Tears down the device streams, returning to Idle. No-op when idle;
    /// fails while recording.
    pub async fn stop_monitor(&self) -> Result<(), RecorderError> {
        self.ensure_live()?;
        let mut state = self.state.lock().await;
        if state.active.is_some() {
            return Err(RecorderError::StillRecording);
        }
        if let Some(monitor) = state.monitor.take() {
            Self::teardown_monitor(monitor).await;
            self.emit_status(StatusKind::Info, "monitoring stopped", None);
        }
        Ok(())
    }

    async fn teardown_monitor(monitor: MonitorRuntime) {
        monitor.running.store(false, Ordering::SeqCst);
        // Dropping the streams stops the device callbacks before anything
        // else is released.
        drop(monitor.streams);
        for pump in monitor.pumps {
            if tokio::time::timeout(PUMP_JOIN_TIMEOUT, pump).await.is_err() {
                tracing::warn!("pump task did not complete within timeout");
            }
        }
    }

    /// Idempotent full teardown. Safe to call after `stop` or in lieu of
    /// it; every later public operation fails with
    /// [`RecorderError::Disposed`].
    pub async fn dispose(&self) {
        if self.disposed.swap(true, Ordering::SeqCst) {
            return;
        }
        let mut state = self.state.lock().await;

        self.shared.stop_recording();
        self.shared.install_session(None);

        // Subscriptions down first, then the writer and its files.
        if let Some(monitor) = state.monitor.take() {
            Self::teardown_monitor(monitor).await;
        }
        if let Some(active) = state.active.take() {
            let ActiveRecording { writer, log, io, .. } = active;
            drop(io);
            if tokio::time::timeout(DISPOSE_JOIN_TIMEOUT, writer)
                .await
                .is_err()
            {
                tracing::warn!("writer did not drain within dispose bound");
            }
            log.close();
        }
    }
}

impl Drop for Recorder {
    fn drop(&mut self) {
        if self.disposed.load(Ordering::SeqCst) {
            return;
        }
        // Best-effort synchronous teardown: flip the flags every task
        // checks, and release whatever the state lock will give us.
        self.shared.stop_recording();
        self.shared.install_session(None);
        if let Ok(mut state) = self.state.try_lock() {
            if let Some(monitor) = state.monitor.take() {
                monitor.running.store(false, Ordering::SeqCst);
            }
            if let Some(active) = state.active.take() {
                active.log.close();
            }
        }
    }
}

/// A device opened and capturing.
struct OpenedCapture {
    stream: CaptureStream,
    consumer: ringbuf::HeapCons<f32>,
    native: Canonical,
    name: String,
}

/// Opens a device and starts its stream, retrying transient invalidation
/// with a suspending backoff so UI-thread callers are not stalled.
async fn open_capture_with_retry(
    kind: DeviceKind,
    selection: &crate::source::DeviceSelection,
    error_hook: &crate::source::StreamErrorHook,
) -> Result<OpenedCapture, RecorderError> {
    let mut attempt = 0;
    loop {
        attempt += 1;
        match open_capture(kind, selection, Arc::clone(error_hook)) {
            Ok(opened) => return Ok(opened),
            Err(err) if err.is_transient() && attempt <= OPEN_RETRIES => {
                tracing::warn!(
                    attempt,
                    "transient device failure ({err}); retrying in {:?}",
                    OPEN_RETRY_BACKOFF
                );
                tokio::time::sleep(OPEN_RETRY_BACKOFF).await;
            }
            Err(err) => return Err(err),
        }
    }
}

fn open_capture(
    kind: DeviceKind,
    selection: &crate::source::DeviceSelection,
    error_hook: crate::source::StreamErrorHook,
) -> Result<OpenedCapture, RecorderError> {
    let device = AudioDevice::open(kind, selection)?;
    let native = device.native_config()?;
    let name = device.name();
    let (stream, consumer) = device.start_capture(Some(error_hook))?;
    Ok(OpenedCapture {
        stream,
        consumer,
        native,
        name,
    })
}

/// Picks collision-free output paths for `base`, suffixing ` (N)` before
/// each extension with the smallest `N` that frees the whole set.
fn select_output_paths(base: &Path, want_mp3: bool) -> Result<SessionOutputs, RecorderError> {
    let parent = base.parent().map(Path::to_path_buf).unwrap_or_default();
    let stem = base
        .file_name()
        .ok_or_else(|| RecorderError::InvalidOutputBase(base.to_path_buf()))?
        .to_string_lossy()
        .into_owned();

    for n in 0u32.. {
        let suffix = if n == 0 {
            String::new()
        } else {
            format!(" ({n})")
        };
        let candidate = SessionOutputs {
            system: parent.join(format!("{stem}-system{suffix}.wav")),
            mic: parent.join(format!("{stem}-mic{suffix}.wav")),
            mix: parent.join(format!("{stem}-mix{suffix}.wav")),
            log: parent.join(format!("{stem}{suffix}.txt")),
            mp3: want_mp3.then(|| parent.join(format!("{stem}{suffix}.mp3"))),
        };

        let mut paths = vec![
            &candidate.system,
            &candidate.mic,
            &candidate.mix,
            &candidate.log,
        ];
        if let Some(ref mp3) = candidate.mp3 {
            paths.push(mp3);
        }
        if paths.iter().all(|path| !path.exists()) {
            return Ok(candidate);
        }
    }
    unreachable!("u32 suffix space exhausted")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use tempfile::tempdir;

    #[test]
    fn test_engine_shared_silence_tracking() {
        let shared = EngineShared::new();
        // Silent until the first loopback block.
        assert!(shared.loopback_silent());
        shared.touch_loopback();
        assert!(!shared.loopback_silent());
    }

    #[test]
    fn test_counters_track_peak_backlog() {
        let counters = SessionCounters::new();
        counters.note_backlog(100);
        counters.note_backlog(50);
        counters.note_backlog(300);
        assert_eq!(counters.peak_backlog_samples.load(Ordering::Relaxed), 300);
    }

    #[test]
    fn test_select_output_paths_no_collision() {
        let dir = tempdir().unwrap();
        let base = dir.path().join("meeting");
        let outputs = select_output_paths(&base, true).unwrap();

        assert_eq!(outputs.system, dir.path().join("meeting-system.wav"));
        assert_eq!(outputs.mic, dir.path().join("meeting-mic.wav"));
        assert_eq!(outputs.mix, dir.path().join("meeting-mix.wav"));
        assert_eq!(outputs.log, dir.path().join("meeting.txt"));
        assert_eq!(outputs.mp3, Some(dir.path().join("meeting.mp3")));
    }

    #[test]
    fn test_select_output_paths_suffixes_whole_set() {
        let dir = tempdir().unwrap();
        let base = dir.path().join("meeting");
        // A single colliding file pushes the whole trio to (1).
        std::fs::write(dir.path().join("meeting-mic.wav"), b"x").unwrap();

        let outputs = select_output_paths(&base, false).unwrap();
        assert_eq!(outputs.system, dir.path().join("meeting-system (1).wav"));
        assert_eq!(outputs.mic, dir.path().join("meeting-mic (1).wav"));
        assert_eq!(outputs.log, dir.path().join("meeting (1).txt"));
        assert_eq!(outputs.mp3, None);
    }

    #[test]
    fn test_select_output_paths_increments_past_occupied_suffixes() {
        let dir = tempdir().unwrap();
        let base = dir.path().join("rec");
        std::fs::write(dir.path().join("rec.txt"), b"x").unwrap();
        std::fs::write(dir.path().join("rec (1).txt"), b"x").unwrap();

        let outputs = select_output_paths(&base, false).unwrap();
        assert_eq!(outputs.log, dir.path().join("rec (2).txt"));
    }

    #[test]
    fn test_select_output_paths_rejects_bare_root() {
        assert!(matches!(
            select_output_paths(&PathBuf::from("/"), false),
            Err(RecorderError::InvalidOutputBase(_))
        ));
    }

    #[test]
    fn test_queue_full_drops_counted_and_logged_on_cadence() {
        use crate::writer::JobTarget;

        let dir = tempdir().unwrap();
        let log_path = dir.path().join("session.txt");
        let pool = Arc::new(BufferPool::new());
        let (jobs, _rx) = mpsc::channel(1);
        let io = SessionIo {
            jobs,
            pool: Arc::clone(&pool),
            log: Arc::new(SessionLog::create(&log_path).unwrap()),
            counters: Arc::new(SessionCounters::new()),
            mix_depth: MixDepth::Int32,
        };

        let job = |pool: &BufferPool| WriteJob {
            target: JobTarget::System,
            bytes: pool.rent(64),
            len: 64,
        };

        // First job fills the queue; the next 150 all drop.
        io.enqueue(job(&pool));
        for _ in 0..150 {
            io.enqueue(job(&pool));
        }
        assert_eq!(io.counters.dropped_blocks.load(Ordering::Relaxed), 150);
        io.log.close();

        let text = std::fs::read_to_string(&log_path).unwrap();
        let warns: Vec<&str> = text.lines().filter(|l| l.contains("queue full")).collect();
        assert_eq!(warns.len(), 2, "log lines on the 1st and 100th drop only");
        assert!(warns[0].contains("; 1 blocks dropped"));
        assert!(warns[1].contains("; 100 blocks dropped"));
    }

    #[tokio::test]
    async fn test_stop_without_start_fails_fast() {
        let recorder = Recorder::builder().build();
        let result = recorder.stop(CancellationToken::new()).await;
        assert!(matches!(result, Err(RecorderError::NotRecording)));
        // State is intact: a second stop reports the same, not a panic.
        let result = recorder.stop(CancellationToken::new()).await;
        assert!(matches!(result, Err(RecorderError::NotRecording)));
    }

    #[tokio::test]
    async fn test_stop_monitor_when_idle_is_noop() {
        let recorder = Recorder::builder().build();
        assert!(recorder.stop_monitor().await.is_ok());
    }

    #[tokio::test]
    async fn test_dispose_is_idempotent_and_poisons_api() {
        let recorder = Recorder::builder().build();
        recorder.dispose().await;
        recorder.dispose().await;

        assert!(matches!(
            recorder.monitor(MonitorOptions::default()).await,
            Err(RecorderError::Disposed)
        ));
        assert!(matches!(
            recorder.stop(CancellationToken::new()).await,
            Err(RecorderError::Disposed)
        ));
        assert!(matches!(
            recorder.stop_monitor().await,
            Err(RecorderError::Disposed)
        ));
    }

    #[tokio::test]
    async fn test_gain_properties() {
        let recorder = Recorder::builder().mic_gain(1.5).loopback_gain(0.5).build();
        assert_eq!(recorder.mic_gain(), 1.5);
        assert_eq!(recorder.loopback_gain(), 0.5);

        recorder.set_mic_gain(2.0);
        recorder.set_loopback_gain(f32::NAN);
        assert_eq!(recorder.mic_gain(), 2.0);
        assert_eq!(recorder.loopback_gain(), 0.5);
        assert!(!recorder.is_recording());
    }

    #[tokio::test]
    async fn test_start_validates_bitrate_before_devices() {
        let recorder = Recorder::builder().build();
        let result = recorder
            .start(RecordOptions {
                loopback: crate::source::DeviceSelection::SystemDefault,
                mic: crate::source::DeviceSelection::SystemDefault,
                output_base: PathBuf::from("/tmp/x"),
                mp3_bitrate_kbps: 50,
            })
            .await;
        assert!(matches!(result, Err(RecorderError::InvalidBitrate(50))));
    }
}
