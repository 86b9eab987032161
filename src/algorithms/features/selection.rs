//! Candidate filtering and bucketed selection.

use super::config::{FeatureDefinition, FeatureExtractorConfig, SelectionPolicy};
use super::kernels::KERNEL_MARGIN;

/// A feature candidate: sample index on the ring plus its primary score.
pub type Candidate = (usize, f64);

/// Collect candidates for one feature kind on one ring.
///
/// `scores` holds one score array per configured kernel, each aligned so
/// that slot `s` scores sample `s + KERNEL_MARGIN`. A sample qualifies iff
/// the validity mask holds and every criterion passes; the primary score is
/// the first criterion's.
pub fn collect_candidates(
    def: &FeatureDefinition,
    scores: &[Vec<f64>],
    valid: &[bool],
) -> Vec<Candidate> {
    let mut candidates = Vec::new();
    if valid.is_empty() {
        return candidates;
    }
    let n_scores = scores[def.criteria[0].score].len();
    for slot in 0..n_scores {
        let sample = slot + KERNEL_MARGIN;
        if !valid[sample] {
            continue;
        }
        if def
            .criteria
            .iter()
            .all(|c| c.policy.passes(scores[c.score][slot], c.threshold))
        {
            candidates.push((sample, scores[def.criteria[0].score][slot]));
        }
    }
    candidates
}

/// Greedy bucketed admission of sorted candidates.
///
/// The ring's angular extent is split into `angular_bins` equal bins keyed
/// by the sample's tick fraction. Candidates are visited best-score first
/// (descending for `HighPos`, ascending otherwise) and admitted when their
/// bin still has room, they are still valid in the working mask, and no
/// earlier admission suppressed them. Each admission invalidates
/// `key_radius` samples on both sides.
pub fn sort_and_bin(
    def: &FeatureDefinition,
    config: &FeatureExtractorConfig,
    mut candidates: Vec<Candidate>,
    valid: &[bool],
    tick_frac: &[f32],
) -> Vec<u32> {
    let mut admitted = Vec::new();
    if valid.is_empty() || candidates.is_empty() {
        return admitted;
    }

    let mut working = valid.to_vec();
    let max_per_bin = def.n_limit / config.angular_bins;
    let mut bin_counts = vec![0usize; config.angular_bins];

    if def.criteria[0].policy == SelectionPolicy::HighPos {
        candidates.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap());
    } else {
        candidates.sort_by(|a, b| a.1.partial_cmp(&b.1).unwrap());
    }

    for (sample, _) in candidates {
        // Bins are keyed on the fractional angular position; the batch may
        // span several revolutions, so wrap into [0, 1) first.
        let frac = tick_frac[sample].rem_euclid(1.0) as f64;
        let bin = ((frac * config.angular_bins as f64) as usize).min(config.angular_bins - 1);
        if bin_counts[bin] >= max_per_bin {
            continue;
        }
        if !working[sample] {
            continue;
        }

        admitted.push(sample as u32);
        bin_counts[bin] += 1;
        flag_nearby(sample, config.key_radius, &mut working);

        if admitted.len() >= def.n_limit {
            break;
        }
    }

    admitted
}

/// Suppress `radius` samples on each side of an admitted feature.
fn flag_nearby(sample: usize, radius: usize, working: &mut [bool]) {
    for j in 1..=radius {
        if sample + j < working.len() {
            working[sample + j] = false;
        }
        if sample >= j {
            working[sample - j] = false;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::algorithms::features::config::Criterion;
    use crate::algorithms::matching::ResidualKind;

    fn edge_def(n_limit: usize) -> FeatureDefinition {
        FeatureDefinition {
            criteria: vec![Criterion {
                score: 0,
                policy: SelectionPolicy::HighPos,
                threshold: 0.5,
            }],
            n_limit,
            residual: ResidualKind::PointToLine,
        }
    }

    fn config_with_bins(angular_bins: usize, key_radius: usize) -> FeatureExtractorConfig {
        FeatureExtractorConfig {
            angular_bins,
            key_radius,
            ..FeatureExtractorConfig::default()
        }
    }

    #[test]
    fn test_collect_respects_mask_and_criteria() {
        let def = edge_def(48);
        let scores = vec![vec![0.0, 1.0, 2.0, 0.3, 5.0]];
        let mut valid = vec![true; 15];
        valid[KERNEL_MARGIN + 2] = false; // masks the 2.0 score

        let candidates = collect_candidates(&def, &scores, &valid);
        let samples: Vec<usize> = candidates.iter().map(|c| c.0).collect();
        assert_eq!(samples, vec![KERNEL_MARGIN + 1, KERNEL_MARGIN + 4]);
    }

    #[test]
    fn test_admission_capped_per_bin() {
        // 200 strong candidates, all in the first angular bin.
        let config = config_with_bins(4, 0);
        let def = edge_def(8); // cap: 2 per bin
        let n = 300;
        let valid = vec![true; n];
        let tick_frac: Vec<f32> = (0..n).map(|i| i as f32 / n as f32 * 0.2).collect();

        let candidates: Vec<Candidate> = (0..200).map(|i| (i + KERNEL_MARGIN, 1.0 + i as f64)).collect();
        let admitted = sort_and_bin(&def, &config, candidates, &valid, &tick_frac);
        assert_eq!(admitted.len(), 2); // n_limit / angular_bins
    }

    #[test]
    fn test_key_radius_spacing() {
        let config = config_with_bins(1, 5);
        let def = edge_def(10);
        let n = 60;
        let valid = vec![true; n];
        let tick_frac: Vec<f32> = (0..n).map(|i| i as f32 / n as f32).collect();

        // A run of adjacent candidates with descending scores.
        let candidates: Vec<Candidate> =
            (10..30).map(|i| (i, 100.0 - i as f64)).collect();
        let admitted = sort_and_bin(&def, &config, candidates, &valid, &tick_frac);

        let mut sorted = admitted.clone();
        sorted.sort_unstable();
        for pair in sorted.windows(2) {
            assert!(
                pair[1] - pair[0] > 5,
                "admitted features too close: {:?}",
                sorted
            );
        }
    }

    #[test]
    fn test_n_limit_respected_and_indices_distinct() {
        let config = config_with_bins(2, 1);
        let def = edge_def(4);
        let n = 100;
        let valid = vec![true; n];
        let tick_frac: Vec<f32> = (0..n).map(|i| i as f32 / n as f32).collect();

        let candidates: Vec<Candidate> = (5..95).step_by(3).map(|i| (i, i as f64)).collect();
        let admitted = sort_and_bin(&def, &config, candidates, &valid, &tick_frac);

        assert!(admitted.len() <= 4);
        let mut dedup = admitted.clone();
        dedup.sort_unstable();
        dedup.dedup();
        assert_eq!(dedup.len(), admitted.len());
    }

    #[test]
    fn test_high_neg_sorts_ascending() {
        let mut def = edge_def(2);
        def.criteria[0].policy = SelectionPolicy::HighNeg;
        let config = config_with_bins(1, 0);
        let valid = vec![true; 40];
        let tick_frac: Vec<f32> = (0..40).map(|i| i as f32 / 40.0).collect();

        // Most negative score should win the first slot.
        let candidates = vec![(10, -1.0), (20, -6.0), (30, -3.0)];
        let admitted = sort_and_bin(&def, &config, candidates, &valid, &tick_frac);
        assert_eq!(admitted, vec![20, 30]);
    }
}
