//! Constant-velocity Gaussian-process segments.
//!
//! Each segment spans one adjacent knot pair under a white-noise-on-
//! acceleration prior with power-spectral density `Qc`. The segment answers
//! two queries:
//!
//! - interpolation matrices `Λ(τ)` ("hat") and `Ψ(τ)` ("candle") such that
//!   the local pose increment at `τ ∈ [tk, tkp1)` is
//!   `Λ[0..6]·hat_multiplier + Ψ[0..6]·candle_multiplier`;
//! - the 12×12 inverse covariance of the linearized motion prior between
//!   the two knots.
//!
//! The matrices depend only on the times and `Qc`, never on the knot
//! values, which is what keeps interpolation linear in the correction
//! variables during optimization.

use nalgebra::{Matrix6, SMatrix};

/// 12×12 block matrix over one knot pair.
pub type Matrix12 = SMatrix<f64, 12, 12>;

/// One constant-velocity prior segment between adjacent knots.
#[derive(Debug, Clone)]
pub struct GpSegment {
    tk: f64,
    tkp1: f64,
    qc: Matrix6<f64>,
    inv_qc: Matrix6<f64>,
}

impl GpSegment {
    pub fn new(tk: f64, tkp1: f64, qc: Matrix6<f64>, inv_qc: Matrix6<f64>) -> Self {
        debug_assert!(tkp1 > tk);
        Self {
            tk,
            tkp1,
            qc,
            inv_qc,
        }
    }

    #[inline]
    pub fn tk(&self) -> f64 {
        self.tk
    }

    #[inline]
    pub fn tkp1(&self) -> f64 {
        self.tkp1
    }

    #[inline]
    pub fn dt(&self) -> f64 {
        self.tkp1 - self.tk
    }

    /// State-transition matrix `Φ(dt) = [[I, dt·I], [0, I]]`.
    fn transition(dt: f64) -> Matrix12 {
        let mut phi = Matrix12::identity();
        for i in 0..6 {
            phi[(i, i + 6)] = dt;
        }
        phi
    }

    /// Process-noise covariance
    /// `Q(dt) = [[dt³/3·Qc, dt²/2·Qc], [dt²/2·Qc, dt·Qc]]`.
    fn process_noise(&self, dt: f64) -> Matrix12 {
        let mut q = Matrix12::zeros();
        let dt2 = dt * dt;
        let dt3 = dt2 * dt;
        q.fixed_view_mut::<6, 6>(0, 0).copy_from(&(self.qc * (dt3 / 3.0)));
        q.fixed_view_mut::<6, 6>(0, 6).copy_from(&(self.qc * (dt2 / 2.0)));
        q.fixed_view_mut::<6, 6>(6, 0).copy_from(&(self.qc * (dt2 / 2.0)));
        q.fixed_view_mut::<6, 6>(6, 6).copy_from(&(self.qc * dt));
        q
    }

    /// Closed-form inverse of the process noise,
    /// `Q(dt)⁻¹ = [[12/dt³·Qc⁻¹, −6/dt²·Qc⁻¹], [−6/dt²·Qc⁻¹, 4/dt·Qc⁻¹]]`.
    fn inv_process_noise(&self, dt: f64) -> Matrix12 {
        let mut q_inv = Matrix12::zeros();
        let dt2 = dt * dt;
        let dt3 = dt2 * dt;
        q_inv
            .fixed_view_mut::<6, 6>(0, 0)
            .copy_from(&(self.inv_qc * (12.0 / dt3)));
        q_inv
            .fixed_view_mut::<6, 6>(0, 6)
            .copy_from(&(self.inv_qc * (-6.0 / dt2)));
        q_inv
            .fixed_view_mut::<6, 6>(6, 0)
            .copy_from(&(self.inv_qc * (-6.0 / dt2)));
        q_inv
            .fixed_view_mut::<6, 6>(6, 6)
            .copy_from(&(self.inv_qc * (4.0 / dt)));
        q_inv
    }

    /// Interpolation matrices `(Λ(τ), Ψ(τ))` for a query inside the segment.
    ///
    /// ```text
    /// Ψ(τ) = Q(τ−tk) · Φ(tkp1−τ)ᵀ · Q(tkp1−tk)⁻¹
    /// Λ(τ) = Φ(τ−tk) − Ψ(τ) · Φ(tkp1−tk)
    /// ```
    pub fn interpolation_matrices(&self, tau: f64) -> (Matrix12, Matrix12) {
        debug_assert!(tau >= self.tk && tau <= self.tkp1);
        let a = tau - self.tk;
        let b = self.tkp1 - tau;
        let total = self.dt();

        let candle =
            self.process_noise(a) * Self::transition(b).transpose() * self.inv_process_noise(total);
        let hat = Self::transition(a) - candle * Self::transition(total);
        (hat, candle)
    }

    /// Inverse covariance of the linearized constant-velocity prior over
    /// this segment: `Q(dt)⁻¹`. Also used as the start-of-sweep prior
    /// weight for segment 0.
    pub fn lin_inv_covariance(&self) -> Matrix12 {
        self.inv_process_noise(self.dt())
    }
}
