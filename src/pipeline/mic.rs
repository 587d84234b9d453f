//! Microphone handler.
//!
//! Converts mic-native blocks to the canonical format, feeds the shared
//! ring while loopback is live, and takes over the system/mix timeline with
//! zero blocks and a mic-only mix while loopback is silent.

use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;

use crate::config::Canonical;
use crate::dsp::{resample_remap, soft_clip, write_i16_dithered, MeterAccumulator};
use crate::event::{EventCallback, LevelSource, RecorderEvent};
use crate::ring::MicRing;
use crate::session::EngineShared;
use crate::writer::{JobTarget, WriteJob};

pub(crate) struct MicHandler {
    shared: Arc<EngineShared>,
    ring: Arc<Mutex<MicRing>>,
    events: Option<EventCallback>,
    native: Canonical,
    canonical: Canonical,
    meter: MeterAccumulator,
    convert_scratch: Vec<f32>,
    canon: Vec<f32>,
    mix_scratch: Vec<f32>,
}

impl MicHandler {
    pub(crate) fn new(
        shared: Arc<EngineShared>,
        ring: Arc<Mutex<MicRing>>,
        events: Option<EventCallback>,
        native: Canonical,
        canonical: Canonical,
    ) -> Self {
        Self {
            shared,
            ring,
            events,
            native,
            canonical,
            meter: MeterAccumulator::new(),
            convert_scratch: Vec::new(),
            canon: Vec::new(),
            mix_scratch: Vec::new(),
        }
    }

    /// Processes one block of mic audio in the device's native format.
    pub(crate) fn handle_block(&mut self, samples: &[f32]) {
        if samples.is_empty() {
            return;
        }

        resample_remap(
            samples,
            self.native.sample_rate,
            self.native.channels,
            self.canonical.sample_rate,
            self.canonical.channels,
            &mut self.convert_scratch,
            &mut self.canon,
        );
        if self.canon.is_empty() {
            return;
        }

        let mic_gain = self.shared.mic_gain.get();
        self.meter.accumulate(&self.canon, mic_gain);
        if let Some(level) = self.meter.try_snapshot(Instant::now()) {
            if let Some(ref events) = self.events {
                events(RecorderEvent::LevelChanged {
                    source: LevelSource::Mic,
                    rms: level.rms,
                    peak: level.peak,
                    clipped: level.clipped,
                });
            }
        }

        let loopback_silent = self.shared.loopback_silent();

        if !self.shared.is_recording() {
            return;
        }
        let Some(io) = self.shared.current_session() else {
            return;
        };

        if loopback_silent {
            // Anything buffered is stale; mixing it after loopback resumes
            // would double-expose the mic.
            self.ring.lock().clear();
        } else {
            let mut ring = self.ring.lock();
            let warm = self.canonical.ring_capacity();
            if ring.capacity() < warm {
                ring.grow(warm);
            }
            ring.push(&self.canon);
        }

        // Raw converted mic audio, pre-gain.
        let len = self.canon.len() * 2;
        let mut bytes = io.pool.rent(len);
        write_i16_dithered(&self.canon, &mut bytes);
        io.enqueue(WriteJob {
            target: JobTarget::Mic,
            bytes,
            len,
        });

        // While loopback is silent the mic drives the other two files so
        // the trio stays length-aligned.
        if loopback_silent {
            let len = self.canon.len() * 2;
            let mut bytes = io.pool.rent(len);
            bytes[..len].fill(0);
            io.enqueue(WriteJob {
                target: JobTarget::System,
                bytes,
                len,
            });

            self.mix_scratch.clear();
            self.mix_scratch
                .extend(self.canon.iter().map(|&mic| soft_clip(0.5 * mic * mic_gain)));
            super::enqueue_mix(&io, &self.mix_scratch);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BLOCK_FRAMES;

    const CANONICAL: Canonical = Canonical {
        sample_rate: 48_000,
        channels: 2,
    };

    fn handler(native: Canonical) -> (MicHandler, Arc<EngineShared>, Arc<Mutex<MicRing>>) {
        let shared = Arc::new(EngineShared::new());
        let ring = Arc::new(Mutex::new(MicRing::with_capacity(1 << 16)));
        let handler = MicHandler::new(
            Arc::clone(&shared),
            Arc::clone(&ring),
            None,
            native,
            CANONICAL,
        );
        (handler, shared, ring)
    }

    #[test]
    fn test_no_session_leaves_ring_alone() {
        let native = Canonical {
            sample_rate: 24_000,
            channels: 1,
        };
        let (mut handler, shared, ring) = handler(native);
        shared.start_recording();
        shared.touch_loopback();

        // Recording flag set but no session installed: the handler must
        // bail before the ring policy runs.
        handler.handle_block(&vec![0.5f32; BLOCK_FRAMES]);
        assert_eq!(ring.lock().backlog_samples(), 0);
    }

    #[test]
    fn test_empty_block_ignored() {
        let (mut handler, _shared, ring) = handler(CANONICAL);
        handler.handle_block(&[]);
        assert_eq!(ring.lock().backlog_samples(), 0);
    }

    #[test]
    fn test_ring_untouched_while_monitoring_only() {
        let (mut handler, shared, ring) = handler(CANONICAL);
        shared.touch_loopback();
        // Not recording: meters run, ring stays empty.
        handler.handle_block(&vec![0.5f32; BLOCK_FRAMES * 2]);
        assert_eq!(ring.lock().backlog_samples(), 0);
    }

    /// Builds a minimal recording session around a ring of the given size.
    fn session_fixture(
        ring_capacity: usize,
    ) -> (
        Arc<EngineShared>,
        Arc<Mutex<MicRing>>,
        tempfile::TempDir,
        tokio::sync::mpsc::Receiver<WriteJob>,
    ) {
        use crate::config::MixDepth;
        use crate::logfile::SessionLog;
        use crate::pool::BufferPool;
        use crate::session::{SessionCounters, SessionIo};

        let dir = tempfile::tempdir().unwrap();
        let shared = Arc::new(EngineShared::new());
        let ring = Arc::new(Mutex::new(MicRing::with_capacity(ring_capacity)));
        let (tx, rx) = tokio::sync::mpsc::channel(100);
        let io = Arc::new(SessionIo {
            jobs: tx,
            pool: Arc::new(BufferPool::new()),
            log: Arc::new(SessionLog::create(dir.path().join("s.txt")).unwrap()),
            counters: Arc::new(SessionCounters::new()),
            mix_depth: MixDepth::Int32,
        });
        shared.install_session(Some(io));
        shared.start_recording();
        shared.touch_loopback();
        (shared, ring, dir, rx)
    }

    #[test]
    fn test_undersized_ring_grows_to_warmup_capacity() {
        let (shared, ring, _dir, _rx) = session_fixture(16);

        let mut handler = MicHandler::new(
            Arc::clone(&shared),
            Arc::clone(&ring),
            None,
            CANONICAL,
            CANONICAL,
        );
        handler.handle_block(&vec![0.5f32; BLOCK_FRAMES * 2]);

        let ring = ring.lock();
        assert!(ring.capacity() >= CANONICAL.ring_capacity());
        assert_eq!(ring.backlog_samples(), BLOCK_FRAMES * 2);
    }

    #[test]
    fn test_ring_receives_canonical_converted_audio() {
        let (shared, ring, _dir, _rx) = session_fixture(CANONICAL.ring_capacity());

        // Mic at 24 kHz mono vs canonical 48 kHz stereo: each native frame
        // becomes two duplicated stereo frames.
        let native = Canonical {
            sample_rate: 24_000,
            channels: 1,
        };
        let mut handler = MicHandler::new(
            Arc::clone(&shared),
            Arc::clone(&ring),
            None,
            native,
            CANONICAL,
        );
        handler.handle_block(&vec![0.5f32; BLOCK_FRAMES]);

        let mut ring = ring.lock();
        assert_eq!(ring.backlog_samples(), BLOCK_FRAMES * 2 * 2);
        let mut dst = vec![0.0f32; 4];
        ring.pop(&mut dst);
        assert_eq!(dst, vec![0.5, 0.5, 0.5, 0.5]);
    }
}
