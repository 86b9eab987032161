//! Unified engine configuration.
//!
//! All sections have sensible defaults; a YAML file only needs the keys it
//! overrides.
//!
//! ## Example YAML
//!
//! ```yaml
//! n_ring: 16
//! min_features: 100
//!
//! trajectory:
//!   num_trajectory_states: 5
//!   scan_period: 0.1
//!   max_ticks: 36000
//!
//! map:
//!   ttl: 10
//!   max_correspondence_dist: 0.75
//!
//! solver:
//!   opt_iters: 10
//!   solution_remapping: true
//!   min_eigen: 0.001
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::algorithms::features::FeatureExtractorConfig;
use crate::algorithms::matching::LocalMapConfig;
use crate::algorithms::trajectory::TrajectoryConfig;
use crate::engine::OptimizerConfig;
use crate::error::{OdometryError, Result};
use crate::sensors::{RangeModelConfig, MAX_POINTS};

fn default_n_ring() -> usize {
    16
}

fn default_max_points() -> usize {
    MAX_POINTS
}

fn default_min_features() -> usize {
    100
}

/// Top-level engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OdometryConfig {
    /// Number of elevation rings of the sensor.
    #[serde(default = "default_n_ring")]
    pub n_ring: usize,
    /// Per-ring sample capacity; overflow during ingest is fatal.
    #[serde(default = "default_max_points")]
    pub max_points: usize,
    /// Total local-map entries required before the tracker initializes.
    #[serde(default = "default_min_features")]
    pub min_features: usize,

    /// Knot count, timing and GP prior.
    #[serde(default)]
    pub trajectory: TrajectoryConfig,
    /// Range-sensor noise model.
    #[serde(default)]
    pub sensor: RangeModelConfig,
    /// Feature extraction.
    #[serde(default)]
    pub features: FeatureExtractorConfig,
    /// Local maps and correspondence gating.
    #[serde(default)]
    pub map: LocalMapConfig,
    /// Nonlinear solve.
    #[serde(default)]
    pub solver: OptimizerConfig,

    /// Dump one trajectory line per sweep.
    #[serde(default)]
    pub output_trajectory: bool,
    /// Dump per-kind correspondence files per sweep.
    #[serde(default)]
    pub output_correspondences: bool,
    /// Accepted for config compatibility; rendering is out of scope here.
    #[serde(default)]
    pub visualize: bool,
}

impl Default for OdometryConfig {
    fn default() -> Self {
        Self {
            n_ring: default_n_ring(),
            max_points: default_max_points(),
            min_features: default_min_features(),
            trajectory: TrajectoryConfig::default(),
            sensor: RangeModelConfig::default(),
            features: FeatureExtractorConfig::default(),
            map: LocalMapConfig::default(),
            solver: OptimizerConfig::default(),
            output_trajectory: false,
            output_correspondences: false,
            visualize: false,
        }
    }
}

impl OdometryConfig {
    /// Parse from a YAML string.
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        serde_yaml::from_str(yaml).map_err(|e| OdometryError::Config(format!("YAML parse: {}", e)))
    }

    /// Load from a YAML file.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&contents)
    }

    /// Cross-section validation beyond what each component checks itself.
    pub fn validate(&self) -> Result<()> {
        if self.n_ring == 0 {
            return Err(OdometryError::Config("n_ring must be positive".into()));
        }
        if self.max_points == 0 {
            return Err(OdometryError::Config("max_points must be positive".into()));
        }
        self.features.validate()
    }
}
