//! Background disk writer: drains the bounded job queue and owns the three
//! output files.

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc;

use crate::event::{EventCallback, RecorderEvent, StatusKind};
use crate::logfile::SessionLog;
use crate::pool::BufferPool;
use crate::session::EngineShared;
use crate::wav::WavFile;

/// Which output file a job is destined for. Closed set; jobs to distinct
/// targets are unordered relative to each other.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum JobTarget {
    /// `<base>-system.wav`
    System,
    /// `<base>-mic.wav`
    Mic,
    /// `<base>-mix.wav`
    Mix,
}

impl JobTarget {
    pub(crate) fn index(self) -> usize {
        match self {
            Self::System => 0,
            Self::Mic => 1,
            Self::Mix => 2,
        }
    }

    fn tag(self) -> &'static str {
        match self {
            Self::System => "system",
            Self::Mic => "mic",
            Self::Mix => "mix",
        }
    }
}

/// A quantized block on its way to disk.
///
/// `bytes` is rented from the pool; ownership transfers to the writer,
/// which returns it after the write. `len` is the count of valid bytes
/// (the rented buffer may be longer).
pub(crate) struct WriteJob {
    pub target: JobTarget,
    pub bytes: Vec<u8>,
    pub len: usize,
}

/// Final data chunk sizes per target, reported when the writer drains
/// within the stop watchdog.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct WriterReport {
    /// Data bytes written per target, indexed by [`JobTarget::index`].
    pub data_bytes: [u64; 3],
}

/// The long-lived queue consumer.
///
/// Exits when all producers are gone and the queue is drained. After the
/// first unrecoverable write error it records the fault, flips recording
/// off at the source, and keeps draining jobs so their buffers return to
/// the pool.
pub(crate) struct DiskWriter {
    rx: mpsc::Receiver<WriteJob>,
    files: [Option<WavFile>; 3],
    pool: Arc<BufferPool>,
    shared: Arc<EngineShared>,
    fault: Arc<Mutex<Option<std::io::Error>>>,
    log: Arc<SessionLog>,
    events: Option<EventCallback>,
}

impl DiskWriter {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        rx: mpsc::Receiver<WriteJob>,
        system: WavFile,
        mic: WavFile,
        mix: WavFile,
        pool: Arc<BufferPool>,
        shared: Arc<EngineShared>,
        fault: Arc<Mutex<Option<std::io::Error>>>,
        log: Arc<SessionLog>,
        events: Option<EventCallback>,
    ) -> Self {
        Self {
            rx,
            files: [Some(system), Some(mic), Some(mix)],
            pool,
            shared,
            fault,
            log,
            events,
        }
    }

    /// Drains the queue until every producer is gone, then finalizes the
    /// output files.
    pub(crate) async fn run(mut self) -> WriterReport {
        while let Some(job) = self.rx.recv().await {
            let faulted = self.fault.lock().is_some();
            if !faulted {
                if let Err(err) = self.write_job(&job) {
                    self.record_fault(job.target, err);
                }
            }
            self.pool.give_back(job.bytes);
        }

        self.finalize_all()
    }

    fn write_job(&mut self, job: &WriteJob) -> std::io::Result<()> {
        match self.files[job.target.index()].as_mut() {
            Some(file) => file.write_bytes(&job.bytes[..job.len]),
            None => Ok(()),
        }
    }

    fn record_fault(&mut self, target: JobTarget, err: std::io::Error) {
        self.log.error(
            "writer",
            &format!("{} write failed: {err}; recording stopped", target.tag()),
        );
        self.shared.stop_recording();
        if let Some(ref events) = self.events {
            events(RecorderEvent::Status {
                kind: StatusKind::Error,
                message: format!("disk write failed on {} file: {err}", target.tag()),
                output_paths: None,
            });
        }
        let mut fault = self.fault.lock();
        if fault.is_none() {
            *fault = Some(err);
        }
    }

    fn finalize_all(&mut self) -> WriterReport {
        let mut report = WriterReport::default();
        for (index, slot) in self.files.iter_mut().enumerate() {
            if let Some(file) = slot.take() {
                match file.finalize() {
                    Ok(bytes) => report.data_bytes[index] = bytes,
                    Err(err) => {
                        self.log
                            .error("writer", &format!("finalize failed: {err}"));
                        let mut fault = self.fault.lock();
                        if fault.is_none() {
                            *fault = Some(err);
                        }
                    }
                }
            }
        }
        report
    }
}
