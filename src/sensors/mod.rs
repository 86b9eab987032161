//! Sensor processing: range-noise model and per-ring scan buffers.

mod range_model;
mod scan_buffer;

pub use range_model::{RangeModelConfig, RangeSensorModel};
pub use scan_buffer::{RingBuffers, RingScan, RingSignals, MAX_POINTS};
