//! Sample rate conversion and channel remapping.
//!
//! Linear interpolation is fast and sufficient for speech/meeting fidelity;
//! it may introduce artifacts for large rate changes.

/// Converts interleaved samples from `(src_rate, src_channels)` to
/// `(dst_rate, dst_channels)`.
///
/// Resampling runs first on the source channel layout, then channels are
/// remapped: mono to stereo duplicates, stereo to mono averages, identical
/// layouts copy, and any other layout clamps extra destination channels to
/// the last source channel.
///
/// `scratch` and `out` are caller-owned and reused across calls, so the
/// steady-state path does not allocate once they have warmed up.
pub fn resample_remap(
    src: &[f32],
    src_rate: u32,
    src_channels: u16,
    dst_rate: u32,
    dst_channels: u16,
    scratch: &mut Vec<f32>,
    out: &mut Vec<f32>,
) {
    out.clear();
    if src.is_empty() || src_channels == 0 || dst_channels == 0 || src_rate == 0 || dst_rate == 0 {
        return;
    }

    if src_rate == dst_rate {
        remap_channels(src, src_channels, dst_channels, out);
        return;
    }

    scratch.clear();
    resample_linear(src, src_rate, src_channels, dst_rate, scratch);
    remap_channels(scratch, src_channels, dst_channels, out);
}

/// Linear interpolation on the source channel layout.
fn resample_linear(src: &[f32], src_rate: u32, channels: u16, dst_rate: u32, out: &mut Vec<f32>) {
    let channels = channels as usize;
    let frames_in = src.len() / channels;
    if frames_in == 0 {
        return;
    }

    let ratio = f64::from(src_rate) / f64::from(dst_rate);
    let frames_out = (frames_in as f64 * f64::from(dst_rate) / f64::from(src_rate)).ceil() as usize;
    out.reserve(frames_out * channels);

    let last = frames_in - 1;
    for frame in 0..frames_out {
        let pos = frame as f64 * ratio;
        let i0 = (pos.floor() as usize).min(last);
        let i1 = (i0 + 1).min(last);
        let t = (pos - i0 as f64) as f32;

        for ch in 0..channels {
            let a = src[i0 * channels + ch];
            let b = src[i1 * channels + ch];
            out.push((1.0 - t) * a + t * b);
        }
    }
}

/// Channel remapping between interleaved layouts.
fn remap_channels(src: &[f32], src_channels: u16, dst_channels: u16, out: &mut Vec<f32>) {
    let src_channels = src_channels as usize;
    let dst_channels = dst_channels as usize;
    let frames = src.len() / src_channels;
    out.reserve(frames * dst_channels);

    match (src_channels, dst_channels) {
        (s, d) if s == d => out.extend_from_slice(&src[..frames * s]),
        (1, 2) => {
            for &sample in &src[..frames] {
                out.push(sample);
                out.push(sample);
            }
        }
        (2, 1) => {
            for pair in src[..frames * 2].chunks_exact(2) {
                out.push((pair[0] + pair[1]) * 0.5);
            }
        }
        (s, d) => {
            // Extra destination channels clamp to the last source channel.
            for frame in src[..frames * s].chunks_exact(s) {
                for ch in 0..d {
                    out.push(frame[ch.min(s - 1)]);
                }
            }
        }
    }
}
