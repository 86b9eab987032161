//! Bisquare (Tukey) robust loss for M-estimator weighting.
//!
//! The bisquare loss completely cuts off residuals beyond its parameter:
//! both the influence and the IRLS weight are exactly zero for `|r| ≥ c`,
//! which keeps gross outlier correspondences from dragging the trajectory.

/// Bisquare robust loss with cutoff parameter `c`.
#[derive(Debug, Clone, Copy)]
pub struct BisquareLoss {
    c: f64,
}

impl BisquareLoss {
    pub fn new(c: f64) -> Self {
        debug_assert!(c > 0.0);
        Self { c }
    }

    /// Loss value `ρ(r) = c²/6 · (1 − (1 − (r/c)²)³)` for `|r| < c`,
    /// saturating at `c²/6` beyond.
    pub fn rho(&self, r: f64) -> f64 {
        let c_sq = self.c * self.c;
        let ratio_sq = (r * r) / c_sq;
        if ratio_sq >= 1.0 {
            c_sq / 6.0
        } else {
            let inner = 1.0 - ratio_sq;
            c_sq / 6.0 * (1.0 - inner * inner * inner)
        }
    }

    /// IRLS weight `ρ'(r)/r = (1 − (r/c)²)²` for `|r| < c`, zero beyond.
    #[inline]
    pub fn weight(&self, r: f64) -> f64 {
        let ratio_sq = (r * r) / (self.c * self.c);
        if ratio_sq >= 1.0 {
            0.0
        } else {
            let inner = 1.0 - ratio_sq;
            inner * inner
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_weight_one_at_zero() {
        let loss = BisquareLoss::new(0.5);
        assert_relative_eq!(loss.weight(0.0), 1.0);
    }

    #[test]
    fn test_zero_influence_beyond_cutoff() {
        // ρ'(r) = 0 for |r| >= c: the loss saturates and the weight is zero.
        let loss = BisquareLoss::new(0.3);
        assert_eq!(loss.weight(0.3), 0.0);
        assert_eq!(loss.weight(1.0), 0.0);
        assert_relative_eq!(loss.rho(0.3), loss.rho(10.0));
        assert_relative_eq!(loss.rho(0.3), 0.3 * 0.3 / 6.0);
    }

    #[test]
    fn test_weight_monotone_decreasing() {
        let loss = BisquareLoss::new(1.0);
        let mut last = f64::MAX;
        for i in 0..20 {
            let w = loss.weight(i as f64 * 0.05);
            assert!(w <= last);
            last = w;
        }
    }

    #[test]
    fn test_quadratic_near_zero() {
        // For small residuals ρ(r) ~= r²/2.
        let loss = BisquareLoss::new(2.0);
        let r = 1e-4;
        assert_relative_eq!(loss.rho(r), r * r / 2.0, epsilon = 1e-12);
    }
}
