//! Capture pipeline: per-device pump tasks feeding the two handlers.
//!
//! ```text
//! CPAL callback → SPSC ring → pump task → handler → job queue → disk writer
//! ```
//!
//! The CPAL callback only pushes raw `f32` samples into the SPSC ring; the
//! pump task pops fixed 1024-frame blocks and runs the handler body. The
//! mic handler additionally feeds the shared mic ring, which the loopback
//! handler drains to assemble the mix.

mod loopback;
mod mic;
mod pump;

pub(crate) use loopback::LoopbackHandler;
pub(crate) use mic::MicHandler;
pub(crate) use pump::spawn_pump;

use crate::config::MixDepth;
use crate::dsp::{write_i16_dithered, write_i32};
use crate::session::SessionIo;
use crate::writer::{JobTarget, WriteJob};

/// Quantizes a mix block per the session's mix depth and enqueues it.
pub(crate) fn enqueue_mix(io: &SessionIo, mix: &[f32]) {
    let len = mix.len() * io.mix_depth.bytes_per_sample();
    let mut bytes = io.pool.rent(len);
    match io.mix_depth {
        MixDepth::Int32 => write_i32(mix, &mut bytes),
        MixDepth::Int16Dithered => write_i16_dithered(mix, &mut bytes),
    }
    io.enqueue(WriteJob {
        target: JobTarget::Mix,
        bytes,
        len,
    });
}
