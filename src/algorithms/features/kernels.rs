//! Scoring kernels: curvature, Laplacian-of-Gaussian, windowed variance.
//!
//! All scores are produced on the interior of a ring: a valid (no-padding)
//! convolution of width 11 shortens each ring by 10 samples, so score slot
//! `s` corresponds to sample index `s + 5`.

/// Width of the convolutional kernels.
pub const KERNEL_WIDTH: usize = 11;

/// Half-width: margin of samples without a score on each ring end.
pub const KERNEL_MARGIN: usize = KERNEL_WIDTH / 2;

/// LOAM-style curvature kernel: sum of the ten neighbors minus ten times
/// the center. Positive at convex range profiles, negative at concave.
pub fn curvature_kernel() -> [f64; KERNEL_WIDTH] {
    let mut k = [1.0; KERNEL_WIDTH];
    k[KERNEL_MARGIN] = -10.0;
    k
}

/// Sampled Laplacian-of-Gaussian, zero-mean so flat signals score zero.
pub fn log_gaussian_kernel() -> [f64; KERNEL_WIDTH] {
    const SIGMA: f64 = 2.0;
    let mut k = [0.0; KERNEL_WIDTH];
    for (i, tap) in k.iter_mut().enumerate() {
        let x = i as f64 - KERNEL_MARGIN as f64;
        let x_sq = x * x;
        let sigma_sq = SIGMA * SIGMA;
        *tap = (x_sq / (sigma_sq * sigma_sq) - 1.0 / sigma_sq) * (-x_sq / (2.0 * sigma_sq)).exp();
    }
    let mean = k.iter().sum::<f64>() / KERNEL_WIDTH as f64;
    for tap in &mut k {
        *tap -= mean;
    }
    k
}

/// Valid convolution of `signal` with an 11-tap kernel.
///
/// Output length is `signal.len() - 10`; output slot `s` scores sample
/// `s + 5`. Panics never: a signal shorter than the kernel yields an empty
/// output.
pub fn convolve_valid(signal: &[f32], kernel: &[f64; KERNEL_WIDTH], out: &mut Vec<f64>) {
    out.clear();
    if signal.len() < KERNEL_WIDTH {
        return;
    }
    out.reserve(signal.len() - KERNEL_WIDTH + 1);
    for start in 0..=(signal.len() - KERNEL_WIDTH) {
        let mut acc = 0.0;
        for (tap, &sample) in kernel.iter().zip(&signal[start..start + KERNEL_WIDTH]) {
            acc += tap * sample as f64;
        }
        out.push(acc);
    }
}

/// Windowed sample variance via the one-pass computational formula
/// `(E[X²] − E[X]²) · N / (N − 1)`.
///
/// Windows are centered on the scored sample and the output is aligned with
/// the convolutional scores: slot `s` scores sample `s + 5`. The window must
/// fit inside the kernel margin (enforced by config validation).
pub fn windowed_variance(signal: &[f32], window: usize, out: &mut Vec<f64>) {
    out.clear();
    if signal.len() < KERNEL_WIDTH || window < 2 {
        return;
    }
    let n = window as f64;
    let half = window / 2;
    out.reserve(signal.len() - KERNEL_WIDTH + 1);
    for slot in 0..=(signal.len() - KERNEL_WIDTH) {
        let center = slot + KERNEL_MARGIN;
        let start = center - half;
        let mut sum = 0.0;
        let mut sum_sq = 0.0;
        for &sample in &signal[start..start + window] {
            let v = sample as f64;
            sum += v;
            sum_sq += v * v;
        }
        let mean = sum / n;
        let var = (sum_sq / n - mean * mean) * n / (n - 1.0);
        out.push(var.max(0.0));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_curvature_kernel_zero_dc() {
        assert_relative_eq!(curvature_kernel().iter().sum::<f64>(), 0.0);
    }

    #[test]
    fn test_log_kernel_zero_dc() {
        assert_relative_eq!(log_gaussian_kernel().iter().sum::<f64>(), 0.0, epsilon = 1e-12);
    }

    #[test]
    fn test_flat_signal_scores_zero() {
        let signal = vec![5.0f32; 30];
        let mut out = Vec::new();
        convolve_valid(&signal, &curvature_kernel(), &mut out);
        assert_eq!(out.len(), 20);
        for score in &out {
            assert_relative_eq!(*score, 0.0, epsilon = 1e-9);
        }
    }

    #[test]
    fn test_convex_step_scores_positive_at_peak() {
        // A single closer return in a flat wall: the curvature kernel fires
        // negative at the dip (center weight is -10 times the low value).
        let mut signal = vec![5.0f32; 31];
        signal[15] = 4.0;
        let mut out = Vec::new();
        convolve_valid(&signal, &curvature_kernel(), &mut out);
        // Score slot for sample 15 is 10.
        assert!(out[10] > 0.0);
        // Neighbors pick up the opposite sign contribution.
        assert!(out[5] < 0.0);
    }

    #[test]
    fn test_short_signal_empty_output() {
        let mut out = vec![1.0];
        convolve_valid(&[1.0; 5], &curvature_kernel(), &mut out);
        assert!(out.is_empty());
    }

    #[test]
    fn test_variance_of_constant_is_zero() {
        let signal = vec![3.5f32; 25];
        let mut out = Vec::new();
        windowed_variance(&signal, 7, &mut out);
        assert_eq!(out.len(), 15);
        for v in &out {
            assert_relative_eq!(*v, 0.0, epsilon = 1e-9);
        }
    }

    #[test]
    fn test_variance_matches_two_pass() {
        let signal: Vec<f32> = (0..20).map(|i| (i as f32 * 0.7).sin() * 3.0 + 5.0).collect();
        let window = 5;
        let mut out = Vec::new();
        windowed_variance(&signal, window, &mut out);

        // Two-pass reference on the first window (centered at sample 5).
        let start = 5 - window / 2;
        let vals: Vec<f64> = signal[start..start + window].iter().map(|&v| v as f64).collect();
        let mean = vals.iter().sum::<f64>() / window as f64;
        let reference = vals.iter().map(|v| (v - mean) * (v - mean)).sum::<f64>()
            / (window as f64 - 1.0);
        assert_relative_eq!(out[0], reference, epsilon = 1e-9);
    }
}
