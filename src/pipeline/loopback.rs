//! Loopback (system audio) handler.
//!
//! The loopback stream drives the session clock: every block refreshes the
//! liveness tick the mic handler uses to detect loopback silence, and every
//! block pulls the matching amount of mic audio out of the ring to keep the
//! system and mix timelines aligned.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;

use crate::config::{Canonical, BACKLOG_LOG_EVERY};
use crate::dsp::{soft_clip, write_i16_dithered, MeterAccumulator};
use crate::event::{EventCallback, LevelSource, RecorderEvent};
use crate::ring::MicRing;
use crate::session::EngineShared;
use crate::writer::{JobTarget, WriteJob};

pub(crate) struct LoopbackHandler {
    shared: Arc<EngineShared>,
    ring: Arc<Mutex<MicRing>>,
    events: Option<EventCallback>,
    canonical: Canonical,
    meter: MeterAccumulator,
    mic_scratch: Vec<f32>,
    mix_scratch: Vec<f32>,
    blocks: u64,
}

impl LoopbackHandler {
    pub(crate) fn new(
        shared: Arc<EngineShared>,
        ring: Arc<Mutex<MicRing>>,
        events: Option<EventCallback>,
        canonical: Canonical,
    ) -> Self {
        Self {
            shared,
            ring,
            events,
            canonical,
            meter: MeterAccumulator::new(),
            mic_scratch: Vec::new(),
            mix_scratch: Vec::new(),
            blocks: 0,
        }
    }

    /// Processes one canonical-format block of system audio.
    pub(crate) fn handle_block(&mut self, samples: &[f32]) {
        if samples.is_empty() {
            return;
        }

        self.shared.touch_loopback();

        let loop_gain = self.shared.loopback_gain.get();
        self.meter.accumulate(samples, loop_gain);
        if let Some(level) = self.meter.try_snapshot(Instant::now()) {
            if let Some(ref events) = self.events {
                events(RecorderEvent::LevelChanged {
                    source: LevelSource::System,
                    rms: level.rms,
                    peak: level.peak,
                    clipped: level.clipped,
                });
            }
        }

        if !self.shared.is_recording() {
            return;
        }
        let Some(io) = self.shared.current_session() else {
            return;
        };

        // Raw system audio, pre-gain.
        let len = samples.len() * 2;
        let mut bytes = io.pool.rent(len);
        write_i16_dithered(samples, &mut bytes);
        io.enqueue(WriteJob {
            target: JobTarget::System,
            bytes,
            len,
        });

        // Pull the matching mic span; zero-fill any deficit.
        self.mic_scratch.resize(samples.len(), 0.0);
        let (backlog, read) = {
            let mut ring = self.ring.lock();
            let backlog = ring.backlog_samples();
            let read = ring.pop(&mut self.mic_scratch);
            (backlog, read)
        };
        if read < samples.len() {
            self.mic_scratch[read..].fill(0.0);
            io.counters.underruns.fetch_add(1, Ordering::Relaxed);
        }
        io.counters.note_backlog(backlog);

        // Equal-weight mix with -6 dB headroom ahead of the soft clip.
        let mic_gain = self.shared.mic_gain.get();
        self.mix_scratch.clear();
        self.mix_scratch.extend(
            samples
                .iter()
                .zip(&self.mic_scratch)
                .map(|(&sys, &mic)| soft_clip(0.5 * (sys * loop_gain + mic * mic_gain))),
        );
        super::enqueue_mix(&io, &self.mix_scratch);

        self.blocks += 1;
        if self.blocks % BACKLOG_LOG_EVERY == 0 {
            let denominator =
                f64::from(self.canonical.sample_rate) * f64::from(self.canonical.channels);
            let peak = io.counters.peak_backlog_samples.load(Ordering::Relaxed);
            io.log.info(
                "loopback",
                &format!(
                    "block {}: ring backlog {:.3}s (peak {:.3}s), underruns {}",
                    self.blocks,
                    backlog as f64 / denominator,
                    peak as f64 / denominator,
                    io.counters.underruns.load(Ordering::Relaxed),
                ),
            );
        }
    }
}
