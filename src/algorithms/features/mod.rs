//! Feature extraction from raw range signals.
//!
//! Per-ring pipeline: mask invalid geometry (occlusions, near-parallel
//! surfaces), score each interior sample under the configured kernels,
//! threshold candidates per feature kind, then select a bounded, angularly
//! spread subset per ring.
//!
//! Scoring is parallelized across rings on a dedicated thread pool; all
//! scoring tasks join before `get_features` returns.

mod config;
pub(crate) mod kernels;
mod mask;
mod selection;

pub use config::{
    Criterion, FeatureDefinition, FeatureExtractorConfig, ScoreKernel, SelectionPolicy, Signal,
};

use rayon::prelude::*;

use crate::error::{OdometryError, Result};
use crate::sensors::{RingScan, RingSignals};

use kernels::{
    convolve_valid, curvature_kernel, log_gaussian_kernel, windowed_variance, KERNEL_WIDTH,
};
use mask::build_validity_mask;
use selection::{collect_candidates, sort_and_bin};

/// Admitted feature indices: `indices[feature_kind][ring]` is an ordered
/// list of sample indices into that ring's buffers.
pub type FeatureIndices = Vec<Vec<Vec<u32>>>;

/// Per-ring feature extractor.
pub struct FeatureExtractor {
    config: FeatureExtractorConfig,
    n_ring: usize,
    pool: rayon::ThreadPool,
}

impl FeatureExtractor {
    /// Build an extractor. Fails on an inconsistent configuration; an
    /// unconfigured extractor cannot exist.
    pub fn new(config: FeatureExtractorConfig, n_ring: usize) -> Result<Self> {
        config.validate()?;
        if n_ring == 0 {
            return Err(OdometryError::Config("n_ring must be positive".into()));
        }
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(config.eigen_threads)
            .thread_name(|i| format!("feature-score-{}", i))
            .build()
            .map_err(|e| OdometryError::Config(format!("scoring pool: {}", e)))?;
        Ok(Self {
            config,
            n_ring,
            pool,
        })
    }

    pub fn config(&self) -> &FeatureExtractorConfig {
        &self.config
    }

    /// Number of configured feature kinds.
    pub fn n_features(&self) -> usize {
        self.config.features.len()
    }

    /// Replace the configuration. The new configuration is validated; the
    /// scoring pool is kept.
    pub fn set_config(&mut self, config: FeatureExtractorConfig) -> Result<()> {
        config.validate()?;
        self.config = config;
        Ok(())
    }

    /// Extract feature indices for every configured kind on every ring.
    ///
    /// Rings shorter than the kernel width yield empty lists. A ring-count
    /// mismatch between the scan and signal buffers is a configuration
    /// error.
    pub fn get_features(
        &self,
        scan: &[RingScan],
        signals: &[RingSignals],
    ) -> Result<FeatureIndices> {
        if scan.len() != self.n_ring || signals.len() != self.n_ring {
            return Err(OdometryError::Config(format!(
                "ring count mismatch: configured {}, scan {}, signals {}",
                self.n_ring,
                scan.len(),
                signals.len()
            )));
        }

        let config = &self.config;
        let per_ring: Vec<Vec<Vec<u32>>> = self.pool.install(|| {
            scan.par_iter()
                .zip(signals.par_iter())
                .map(|(ring_scan, ring_signals)| {
                    extract_ring(config, ring_scan, ring_signals)
                })
                .collect()
        });

        // Transpose ring-major to feature-major.
        let mut indices: FeatureIndices = vec![Vec::with_capacity(self.n_ring); self.n_features()];
        for ring_features in per_ring {
            for (f_idx, admitted) in ring_features.into_iter().enumerate() {
                indices[f_idx].push(admitted);
            }
        }
        Ok(indices)
    }
}

/// Run the full per-ring pipeline: mask, score, filter, select.
fn extract_ring(
    config: &FeatureExtractorConfig,
    scan: &RingScan,
    signals: &RingSignals,
) -> Vec<Vec<u32>> {
    let n = scan.len();
    if n < KERNEL_WIDTH {
        return vec![Vec::new(); config.features.len()];
    }

    let valid = build_validity_mask(scan, signals, config);

    let mut scores: Vec<Vec<f64>> = Vec::with_capacity(config.scores.len());
    for kernel in &config.scores {
        let signal = match kernel.signal() {
            Signal::Range => &signals.range,
            Signal::Intensity => &signals.intensity,
        };
        let mut out = Vec::new();
        match kernel {
            ScoreKernel::Curvature => convolve_valid(signal, &curvature_kernel(), &mut out),
            ScoreKernel::LogGaussian => convolve_valid(signal, &log_gaussian_kernel(), &mut out),
            ScoreKernel::Variance { .. } => {
                windowed_variance(signal, config.variance_window, &mut out)
            }
        }
        scores.push(out);
    }

    config
        .features
        .iter()
        .map(|def| {
            let candidates = collect_candidates(def, &scores, &valid);
            sort_and_bin(def, config, candidates, &valid, &scan.tick_frac)
        })
        .collect()
}
