//! Per-ring validity masking.
//!
//! Three geometric exclusions run before scoring:
//!
//! 1. *Occlusion, forward*: a large forward range drop with a small azimuth
//!    step means the following points sit on a foreground object; the five
//!    points behind the edge are shadowed and unreliable.
//! 2. *Occlusion, backward*: the symmetric case for a range rise.
//! 3. *Grazing surface*: when both neighbor displacements are large relative
//!    to the squared range, the surface is near-parallel to the beam.

use crate::sensors::{RingScan, RingSignals};

use super::config::FeatureExtractorConfig;
use super::kernels::KERNEL_WIDTH;

/// Number of samples shadowed on the far side of an occluding edge.
const OCCLUSION_SHADOW: usize = 5;

/// Build the validity mask for one ring. Rings with fewer than 11 samples
/// yield an empty mask (and hence no features) rather than an error.
pub fn build_validity_mask(
    scan: &RingScan,
    signals: &RingSignals,
    config: &FeatureExtractorConfig,
) -> Vec<bool> {
    let n = scan.len();
    if n < KERNEL_WIDTH {
        return Vec::new();
    }

    let mut valid = vec![true; n];
    let range = &signals.range;
    let azimuth = &scan.azimuth;

    // Grazing surfaces: squared 3-D displacement to each neighbor.
    let displacement_sq = |j: usize| -> f64 {
        let dx = (scan.x[j + 1] - scan.x[j]) as f64;
        let dy = (scan.y[j + 1] - scan.y[j]) as f64;
        let dz = (scan.z[j + 1] - scan.z[j]) as f64;
        dx * dx + dy * dy + dz * dz
    };

    for i in 1..n - 1 {
        let range_sq = (range[i] as f64) * (range[i] as f64);
        let gate = config.parallel_tol * range_sq;
        if displacement_sq(i - 1) > gate && displacement_sq(i) > gate {
            valid[i] = false;
        }
    }

    // Occlusions: forward difference of the range signal.
    for j in 1..n - 1 {
        let rng_diff = (range[j] - range[j + 1]) as f64;
        let ang_diff = ((azimuth[j + 1] - azimuth[j]) as f64).abs();
        if rng_diff.abs() <= config.occlusion_tol_2 || ang_diff >= config.occlusion_tol {
            continue;
        }
        if rng_diff > 0.0 {
            // The edge occludes the points before it.
            let start = j.saturating_sub(OCCLUSION_SHADOW);
            for slot in &mut valid[start..j] {
                *slot = false;
            }
        } else {
            // The edge occludes the points after it.
            let end = (j + OCCLUSION_SHADOW).min(n - 1);
            for slot in &mut valid[j..end] {
                *slot = false;
            }
        }
    }

    valid
}
