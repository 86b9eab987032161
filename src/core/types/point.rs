//! Raw sensor samples and extracted feature points.

use nalgebra::Vector3;
use serde::{Deserialize, Serialize};

/// One raw measurement from a multi-ring rotating range sensor.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PointXyzir {
    /// X coordinate in the sensor frame, meters.
    pub x: f32,
    /// Y coordinate in the sensor frame, meters.
    pub y: f32,
    /// Z coordinate in the sensor frame, meters.
    pub z: f32,
    /// Return intensity, sensor units.
    pub intensity: f32,
    /// Elevation channel index.
    pub ring: u16,
}

impl PointXyzir {
    pub fn new(x: f32, y: f32, z: f32, intensity: f32, ring: u16) -> Self {
        Self {
            x,
            y,
            z,
            intensity,
            ring,
        }
    }

    /// Euclidean range of the return.
    #[inline]
    pub fn range(&self) -> f32 {
        (self.x * self.x + self.y * self.y + self.z * self.z).sqrt()
    }
}

/// A selected feature point in the sensor frame at acquisition time.
///
/// `tick` is the batch-relative angular index: revolution wraps within one
/// optimization window accumulate so that interpolation times stay monotone.
#[derive(Debug, Clone, Copy)]
pub struct FeaturePoint {
    /// Position in the sensor frame at acquisition time.
    pub position: Vector3<f64>,
    /// Batch-relative angular index of acquisition.
    pub tick: u32,
    /// Ring the point was measured on.
    pub ring: u16,
}
