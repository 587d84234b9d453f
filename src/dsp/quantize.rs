//! Soft clipping and quantization to the on-disk sample formats.

use std::cell::RefCell;
use std::hash::{Hash, Hasher};
use std::sync::OnceLock;
use std::time::Instant;

use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};

/// Limits a sample to [-1, +1], rolling off smoothly above unity.
///
/// Pass-through below unity; `tanh` (then a defensive clamp against float
/// rounding) above it. Applied per sample on the mix path only.
#[inline]
pub fn soft_clip(x: f32) -> f32 {
    if x.abs() > 1.0 {
        x.tanh().clamp(-1.0, 1.0)
    } else {
        x
    }
}

static PROCESS_EPOCH: OnceLock<Instant> = OnceLock::new();

fn monotonic_nanos() -> u64 {
    PROCESS_EPOCH.get_or_init(Instant::now).elapsed().as_nanos() as u64
}

fn seeded_rng() -> SmallRng {
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    std::thread::current().id().hash(&mut hasher);
    let seed = monotonic_nanos() ^ hasher.finish() ^ rand::random::<u64>();
    SmallRng::seed_from_u64(seed)
}

thread_local! {
    // One dither noise source per thread; never shared, so the hot path
    // takes no lock.
    static DITHER_RNG: RefCell<SmallRng> = RefCell::new(seeded_rng());
}

/// Quantizes samples to 16-bit little-endian PCM with TPDF dither.
///
/// Each sample is clamped to [-1, +1], scaled by 32767, offset by
/// triangular noise (difference of two uniform draws in [0, 1)), rounded
/// to nearest and clamped to the i16 range.
///
/// # Panics
///
/// Panics if `out` is shorter than `2 * samples.len()` bytes.
pub fn write_i16_dithered(samples: &[f32], out: &mut [u8]) {
    assert!(out.len() >= samples.len() * 2, "output buffer too small");

    DITHER_RNG.with(|rng| {
        let mut rng = rng.borrow_mut();
        for (i, &sample) in samples.iter().enumerate() {
            let dither: f32 = rng.gen::<f32>() - rng.gen::<f32>();
            let scaled = sample.clamp(-1.0, 1.0) * 32767.0 + dither;
            let quantized = (scaled.round() as i32).clamp(i32::from(i16::MIN), i32::from(i16::MAX));
            out[i * 2..i * 2 + 2].copy_from_slice(&(quantized as i16).to_le_bytes());
        }
    });
}

/// Quantizes samples to 32-bit little-endian PCM.
///
/// Scaling goes through f64/i64 so +1.0 lands exactly on `i32::MAX`
/// without overflow. No dither.
///
/// # Panics
///
/// Panics if `out` is shorter than `4 * samples.len()` bytes.
pub fn write_i32(samples: &[f32], out: &mut [u8]) {
    assert!(out.len() >= samples.len() * 4, "output buffer too small");

    for (i, &sample) in samples.iter().enumerate() {
        let scaled = f64::from(sample.clamp(-1.0, 1.0)) * f64::from(i32::MAX);
        let quantized = (scaled.round() as i64).clamp(i64::from(i32::MIN), i64::from(i32::MAX));
        out[i * 4..i * 4 + 4].copy_from_slice(&(quantized as i32).to_le_bytes());
    }
}
