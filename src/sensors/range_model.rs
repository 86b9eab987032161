//! Range-sensor noise model.
//!
//! A rotating range sensor measures in spherical coordinates: range along
//! the beam, azimuth from the spindle encoder, elevation fixed per ring.
//! The optimizer whitens residuals with the Euclidean covariance of each
//! measurement, obtained by pushing the spherical noise through the
//! spherical-to-Cartesian Jacobian at the measured point.

use nalgebra::{Matrix3, Vector3};
use serde::{Deserialize, Serialize};

fn default_sigma_range() -> f64 {
    0.02
}

fn default_sigma_azimuth() -> f64 {
    0.001
}

fn default_sigma_elevation() -> f64 {
    0.001
}

/// Noise configuration for the range sensor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RangeModelConfig {
    /// Standard deviation of the range measurement in meters.
    #[serde(default = "default_sigma_range")]
    pub sigma_range: f64,
    /// Standard deviation of the azimuth angle in radians.
    #[serde(default = "default_sigma_azimuth")]
    pub sigma_azimuth: f64,
    /// Standard deviation of the elevation angle in radians.
    #[serde(default = "default_sigma_elevation")]
    pub sigma_elevation: f64,
    /// Per-ring beam elevation angles in radians, lowest ring first.
    /// Empty means elevations are taken from the measured points directly.
    #[serde(default)]
    pub elevation_angles: Vec<f64>,
}

impl Default for RangeModelConfig {
    fn default() -> Self {
        Self {
            sigma_range: 0.02,
            sigma_azimuth: 0.001,
            sigma_elevation: 0.001,
            elevation_angles: Vec::new(),
        }
    }
}

/// Euclidean covariance provider for measured points.
#[derive(Debug, Clone)]
pub struct RangeSensorModel {
    config: RangeModelConfig,
}

impl RangeSensorModel {
    pub fn new(config: RangeModelConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &RangeModelConfig {
        &self.config
    }

    /// Euclidean covariance of a measured point on the given ring.
    ///
    /// The point is expected in the sensor frame. When the config carries a
    /// per-ring elevation table, the tabulated beam elevation replaces the
    /// one recovered from the point, which keeps the covariance consistent
    /// for returns near the spindle axis.
    pub fn euclidean_covariance(&self, point: &Vector3<f64>, ring: u16) -> Matrix3<f64> {
        let range = point.norm().max(1e-6);
        let horiz = (point.x * point.x + point.y * point.y).sqrt().max(1e-9);
        let azimuth = point.y.atan2(point.x);
        let elevation = match self.config.elevation_angles.get(ring as usize) {
            Some(&el) => el,
            None => point.z.atan2(horiz),
        };

        let (sin_az, cos_az) = azimuth.sin_cos();
        let (sin_el, cos_el) = elevation.sin_cos();

        // Columns: d(point)/d(range), d(point)/d(azimuth), d(point)/d(elevation)
        let jac = Matrix3::new(
            cos_el * cos_az,
            -range * cos_el * sin_az,
            -range * sin_el * cos_az,
            cos_el * sin_az,
            range * cos_el * cos_az,
            -range * sin_el * sin_az,
            sin_el,
            0.0,
            range * cos_el,
        );

        let spherical = Matrix3::from_diagonal(&Vector3::new(
            self.config.sigma_range * self.config.sigma_range,
            self.config.sigma_azimuth * self.config.sigma_azimuth,
            self.config.sigma_elevation * self.config.sigma_elevation,
        ));

        jac * spherical * jac.transpose()
    }
}
