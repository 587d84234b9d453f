//! DSP kernels for the capture pipeline.
//!
//! - Sample rate conversion + channel remapping ([`resample_remap`])
//! - Soft clipping and quantization to disk formats ([`soft_clip`],
//!   [`write_i16_dithered`], [`write_i32`])
//! - Level metering ([`MeterAccumulator`], [`dbfs`])

mod meter;
mod quantize;
mod resample;

pub use meter::{dbfs, LevelSnapshot, MeterAccumulator};
pub use quantize::{soft_clip, write_i16_dithered, write_i32};
pub use resample::resample_remap;
