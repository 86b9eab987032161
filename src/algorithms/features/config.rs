//! Feature-extraction configuration.

use serde::{Deserialize, Serialize};

use crate::algorithms::matching::ResidualKind;
use crate::error::{OdometryError, Result};

/// Which signal row a score reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Signal {
    /// Euclidean range of the return.
    Range,
    /// Return intensity.
    Intensity,
}

/// One scoring kernel applied per ring.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum ScoreKernel {
    /// 11-tap symmetric LOAM-style curvature kernel on the range signal.
    /// High positive at convex edges, negative at concave ones.
    Curvature,
    /// 11-tap Laplacian-of-Gaussian on the range signal.
    LogGaussian,
    /// Windowed sample variance of the chosen signal.
    Variance { signal: Signal },
}

impl ScoreKernel {
    /// The signal row this score consumes.
    pub fn signal(&self) -> Signal {
        match self {
            ScoreKernel::Curvature | ScoreKernel::LogGaussian => Signal::Range,
            ScoreKernel::Variance { signal } => *signal,
        }
    }
}

/// How a criterion thresholds its score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SelectionPolicy {
    /// `|score| < threshold`: planar surfaces.
    NearZero,
    /// `score > threshold`: convex edges.
    HighPos,
    /// `score < -threshold`: concave edges.
    HighNeg,
}

impl SelectionPolicy {
    /// Whether a score passes under this policy.
    #[inline]
    pub fn passes(&self, score: f64, threshold: f64) -> bool {
        match self {
            SelectionPolicy::NearZero => score.abs() < threshold,
            SelectionPolicy::HighPos => score > threshold,
            SelectionPolicy::HighNeg => score < -threshold,
        }
    }
}

/// One thresholded condition on one score.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Criterion {
    /// Index into [`FeatureExtractorConfig::scores`].
    pub score: usize,
    pub policy: SelectionPolicy,
    pub threshold: f64,
}

/// One feature kind: an ordered list of criteria plus selection limits.
///
/// A sample is a candidate iff the validity mask is true at it and every
/// criterion passes. The first criterion's score is the primary sort key
/// for bucketed selection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeatureDefinition {
    pub criteria: Vec<Criterion>,
    /// Upper bound on admitted features per ring.
    pub n_limit: usize,
    /// Residual kind this feature participates in downstream.
    pub residual: ResidualKind,
}

fn default_scores() -> Vec<ScoreKernel> {
    vec![
        ScoreKernel::Curvature,
        ScoreKernel::LogGaussian,
        ScoreKernel::Variance {
            signal: Signal::Intensity,
        },
    ]
}

fn default_features() -> Vec<FeatureDefinition> {
    vec![
        // Convex edges track as lines.
        FeatureDefinition {
            criteria: vec![Criterion {
                score: 0,
                policy: SelectionPolicy::HighPos,
                threshold: 0.5,
            }],
            n_limit: 48,
            residual: ResidualKind::PointToLine,
        },
        // Concave edges track as lines.
        FeatureDefinition {
            criteria: vec![Criterion {
                score: 0,
                policy: SelectionPolicy::HighNeg,
                threshold: 0.5,
            }],
            n_limit: 48,
            residual: ResidualKind::PointToLine,
        },
        // Flat patches track as planes; the LoG criterion rejects
        // slow range ramps the curvature kernel misses.
        FeatureDefinition {
            criteria: vec![
                Criterion {
                    score: 0,
                    policy: SelectionPolicy::NearZero,
                    threshold: 0.1,
                },
                Criterion {
                    score: 1,
                    policy: SelectionPolicy::NearZero,
                    threshold: 0.1,
                },
            ],
            n_limit: 96,
            residual: ResidualKind::PointToPlane,
        },
    ]
}

fn default_variance_window() -> usize {
    11
}

fn default_angular_bins() -> usize {
    12
}

fn default_key_radius() -> usize {
    5
}

fn default_occlusion_tol() -> f64 {
    0.1
}

fn default_occlusion_tol_2() -> f64 {
    1.0
}

fn default_parallel_tol() -> f64 {
    0.002
}

fn default_eigen_threads() -> usize {
    0
}

/// Feature-extractor configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeatureExtractorConfig {
    /// Scoring kernels, indexed by [`Criterion::score`].
    #[serde(default = "default_scores")]
    pub scores: Vec<ScoreKernel>,
    /// Feature kinds to extract.
    #[serde(default = "default_features")]
    pub features: Vec<FeatureDefinition>,
    /// Window width for variance scores. Must fit inside the convolution
    /// margin, i.e. at most 11.
    #[serde(default = "default_variance_window")]
    pub variance_window: usize,
    /// Equal angular bins per ring for bucketed selection.
    #[serde(default = "default_angular_bins")]
    pub angular_bins: usize,
    /// Samples suppressed on each side of an admitted feature.
    #[serde(default = "default_key_radius")]
    pub key_radius: usize,
    /// Azimuth-step gate for the occlusion exclusions, radians.
    #[serde(default = "default_occlusion_tol")]
    pub occlusion_tol: f64,
    /// Range-jump gate for the occlusion exclusions, meters.
    #[serde(default = "default_occlusion_tol_2")]
    pub occlusion_tol_2: f64,
    /// Grazing-surface gate: both neighbor displacements must exceed
    /// `parallel_tol * range²` for the center to be excluded.
    #[serde(default = "default_parallel_tol")]
    pub parallel_tol: f64,
    /// Scoring thread-pool size. 0 selects hardware concurrency.
    #[serde(default = "default_eigen_threads")]
    pub eigen_threads: usize,
}

impl Default for FeatureExtractorConfig {
    fn default() -> Self {
        Self {
            scores: default_scores(),
            features: default_features(),
            variance_window: default_variance_window(),
            angular_bins: default_angular_bins(),
            key_radius: default_key_radius(),
            occlusion_tol: default_occlusion_tol(),
            occlusion_tol_2: default_occlusion_tol_2(),
            parallel_tol: default_parallel_tol(),
            eigen_threads: default_eigen_threads(),
        }
    }
}

impl FeatureExtractorConfig {
    /// Validate internal consistency. An extractor cannot be built from an
    /// invalid configuration.
    pub fn validate(&self) -> Result<()> {
        if self.scores.is_empty() {
            return Err(OdometryError::Config(
                "feature extractor needs at least one score kernel".into(),
            ));
        }
        if self.features.is_empty() {
            return Err(OdometryError::Config(
                "feature extractor needs at least one feature definition".into(),
            ));
        }
        if self.angular_bins == 0 {
            return Err(OdometryError::Config("angular_bins must be positive".into()));
        }
        if self.variance_window < 2 || self.variance_window > super::kernels::KERNEL_WIDTH {
            return Err(OdometryError::Config(format!(
                "variance_window must be in [2, {}], got {}",
                super::kernels::KERNEL_WIDTH,
                self.variance_window
            )));
        }
        for (f_idx, def) in self.features.iter().enumerate() {
            if def.criteria.is_empty() {
                return Err(OdometryError::Config(format!(
                    "feature {} has no criteria",
                    f_idx
                )));
            }
            if def.n_limit == 0 || def.n_limit % self.angular_bins != 0 {
                return Err(OdometryError::Config(format!(
                    "feature {}: n_limit {} must be a positive multiple of angular_bins {}",
                    f_idx, def.n_limit, self.angular_bins
                )));
            }
            for criterion in &def.criteria {
                if criterion.score >= self.scores.len() {
                    return Err(OdometryError::Config(format!(
                        "feature {} references score {} but only {} scores configured",
                        f_idx,
                        criterion.score,
                        self.scores.len()
                    )));
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_valid() {
        FeatureExtractorConfig::default().validate().unwrap();
    }

    #[test]
    fn test_policy_passes() {
        assert!(SelectionPolicy::NearZero.passes(0.05, 0.1));
        assert!(!SelectionPolicy::NearZero.passes(-0.2, 0.1));
        assert!(SelectionPolicy::HighPos.passes(1.0, 0.5));
        assert!(!SelectionPolicy::HighPos.passes(0.4, 0.5));
        assert!(SelectionPolicy::HighNeg.passes(-1.0, 0.5));
        assert!(!SelectionPolicy::HighNeg.passes(-0.4, 0.5));
    }

    #[test]
    fn test_bad_score_index_rejected() {
        let mut config = FeatureExtractorConfig::default();
        config.features[0].criteria[0].score = 99;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_n_limit_must_divide_into_bins() {
        let mut config = FeatureExtractorConfig::default();
        config.features[0].n_limit = 47;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_empty_scores_rejected() {
        let config = FeatureExtractorConfig {
            scores: Vec::new(),
            ..FeatureExtractorConfig::default()
        };
        assert!(config.validate().is_err());
    }
}
