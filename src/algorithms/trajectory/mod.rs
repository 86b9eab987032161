//! Continuous-time trajectory model.
//!
//! A sweep's trajectory is `K ≥ 2` knots (pose + body twist) at evenly
//! spaced timestamps, interpolated between knots under the constant-velocity
//! Gaussian-process prior in [`GpSegment`]. The model owns the knots, the
//! segments and the per-pair difference multipliers; the optimizer borrows
//! them read-only while assembling residuals and mutably only during the
//! operating-point update.

mod gp;

pub use gp::{GpSegment, Matrix12};

use nalgebra::{Matrix6, SMatrix, SVector, Vector3, Vector6};
use serde::{Deserialize, Serialize};

use crate::core::math::se3_approx_inv_left_jacobian;
use crate::core::types::{Se3, TrajectoryKnot, Twist};
use crate::error::{OdometryError, Result};

/// 12-vector over one knot: pose tangent stacked over twist.
pub type Vector12 = SVector<f64, 12>;

/// 6×12 block of an interpolation matrix.
pub type Block6x12 = SMatrix<f64, 6, 12>;

fn default_num_trajectory_states() -> usize {
    5
}

fn default_scan_period() -> f64 {
    0.1
}

fn default_n_window() -> usize {
    1
}

fn default_max_ticks() -> u32 {
    36_000
}

fn default_qc_diagonal() -> [f64; 6] {
    [1.0; 6]
}

/// Trajectory configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrajectoryConfig {
    /// Number of knots `K`. Must be at least 2; fixed for the run.
    #[serde(default = "default_num_trajectory_states")]
    pub num_trajectory_states: usize,
    /// Duration of one sensor revolution in seconds.
    #[serde(default = "default_scan_period")]
    pub scan_period: f64,
    /// Revolutions per optimization window.
    #[serde(default = "default_n_window")]
    pub n_window: usize,
    /// Angular ticks per revolution.
    #[serde(default = "default_max_ticks")]
    pub max_ticks: u32,
    /// Diagonal of the white-noise-on-acceleration power spectral density.
    #[serde(default = "default_qc_diagonal")]
    pub qc_diagonal: [f64; 6],
}

impl Default for TrajectoryConfig {
    fn default() -> Self {
        Self {
            num_trajectory_states: 5,
            scan_period: 0.1,
            n_window: 1,
            max_ticks: 36_000,
            qc_diagonal: [1.0; 6],
        }
    }
}

impl TrajectoryConfig {
    /// Duration covered by one optimization window.
    #[inline]
    pub fn window_duration(&self) -> f64 {
        self.scan_period * self.n_window as f64
    }
}

/// Multipliers the GP interpolation consumes, one per adjacent knot pair.
///
/// `hat_multiplier = (0₆, twist_k)` and
/// `candle_multiplier = (ξ, J⁻¹(ξ)·twist_{k+1})` with
/// `ξ = log(pose_{k+1}·pose_k⁻¹)` and `J⁻¹` the (approximate) inverse left
/// Jacobian of SE(3). Recomputed after every operating-point update.
#[derive(Debug, Clone, Default)]
pub struct KnotDifference {
    pub hat_multiplier: Vector12,
    pub candle_multiplier: Vector12,
}

/// The continuous-time trajectory over one optimization window.
pub struct Trajectory {
    config: TrajectoryConfig,
    knots: Vec<TrajectoryKnot>,
    /// Operating point of the previous solver iteration; the reference the
    /// solution remapping projects against.
    prev_knots: Vec<TrajectoryKnot>,
    differences: Vec<KnotDifference>,
    segments: Vec<GpSegment>,
    stamps: Vec<f64>,
    prior_twist: Twist,
    inv_prior_pose: Se3,
}

impl Trajectory {
    pub fn new(config: TrajectoryConfig) -> Result<Self> {
        if config.num_trajectory_states < 2 {
            return Err(OdometryError::Config(
                "num_trajectory_states must be at least 2".into(),
            ));
        }
        if config.max_ticks == 0 || config.n_window == 0 || config.scan_period <= 0.0 {
            return Err(OdometryError::Config(
                "scan_period, max_ticks and n_window must be positive".into(),
            ));
        }
        if config.qc_diagonal.iter().any(|&v| v <= 0.0) {
            return Err(OdometryError::Config(
                "qc_diagonal entries must be positive".into(),
            ));
        }

        let k = config.num_trajectory_states;
        let step = config.window_duration() / (k - 1) as f64;
        let stamps: Vec<f64> = (0..k).map(|i| i as f64 * step).collect();

        let qc = Matrix6::from_diagonal(&Vector6::from_row_slice(&config.qc_diagonal));
        let inv_qc = Matrix6::from_diagonal(&Vector6::from_iterator(
            config.qc_diagonal.iter().map(|&v| 1.0 / v),
        ));

        let segments = stamps
            .windows(2)
            .map(|w| GpSegment::new(w[0], w[1], qc, inv_qc))
            .collect();

        let mut trajectory = Self {
            knots: vec![TrajectoryKnot::identity(); k],
            prev_knots: vec![TrajectoryKnot::identity(); k],
            differences: vec![KnotDifference::default(); k - 1],
            segments,
            stamps,
            prior_twist: Twist::zeros(),
            inv_prior_pose: Se3::identity(),
            config,
        };
        trajectory.update_differences();
        Ok(trajectory)
    }

    /// Replace the GP power spectral density.
    pub fn set_qc(&mut self, qc: Matrix6<f64>, inv_qc: Matrix6<f64>) {
        let stamps = self.stamps.clone();
        self.segments = stamps
            .windows(2)
            .map(|w| GpSegment::new(w[0], w[1], qc, inv_qc))
            .collect();
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.knots.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.knots.is_empty()
    }

    #[inline]
    pub fn knots(&self) -> &[TrajectoryKnot] {
        &self.knots
    }

    #[inline]
    pub fn prev_knots(&self) -> &[TrajectoryKnot] {
        &self.prev_knots
    }

    #[inline]
    pub fn stamps(&self) -> &[f64] {
        &self.stamps
    }

    #[inline]
    pub fn segment(&self, k: usize) -> &GpSegment {
        &self.segments[k]
    }

    #[inline]
    pub fn difference(&self, k: usize) -> &KnotDifference {
        &self.differences[k]
    }

    /// The published sweep-end pose.
    #[inline]
    pub fn sweep_end_pose(&self) -> &Se3 {
        &self.knots[self.knots.len() - 1].pose
    }

    /// The body twist at sweep end.
    #[inline]
    pub fn sweep_end_twist(&self) -> &Twist {
        &self.knots[self.knots.len() - 1].twist
    }

    #[inline]
    pub fn prior_twist(&self) -> &Twist {
        &self.prior_twist
    }

    #[inline]
    pub fn inv_prior_pose(&self) -> &Se3 {
        &self.inv_prior_pose
    }

    /// Operating-point error of the start-of-sweep prior:
    /// `(log(pose₀ · inv_prior_pose), twist₀ − prior_twist)`.
    pub fn prior_error(&self) -> Vector12 {
        let pose_err = self.knots[0].pose.compose(&self.inv_prior_pose).log();
        let twist_err = self.knots[0].twist - self.prior_twist;
        let mut err = Vector12::zeros();
        err.fixed_rows_mut::<6>(0).copy_from(&pose_err);
        err.fixed_rows_mut::<6>(6).copy_from(&twist_err);
        err
    }

    /// Segment index and interpolation time for a batch-relative tick.
    pub fn transform_indices(&self, tick: u32) -> (usize, usize, f64) {
        let k = self.knots.len();
        let span = (self.config.max_ticks as u64 * self.config.n_window as u64) as f64;
        let start = ((tick as u64 * (k as u64 - 1)) as f64 / span) as usize;
        let start = start.min(k - 2);
        let tau = tick as f64 * self.config.scan_period / self.config.max_ticks as f64;
        (start, start + 1, tau)
    }

    /// Interpolation blocks `(Λ[0..6], Ψ[0..6])` for a query inside
    /// segment `k`.
    pub fn interpolation_blocks(&self, k: usize, tau: f64) -> (Block6x12, Block6x12) {
        let (hat, candle) = self.segments[k].interpolation_matrices(tau);
        (
            hat.fixed_view::<6, 12>(0, 0).into_owned(),
            candle.fixed_view::<6, 12>(0, 0).into_owned(),
        )
    }

    /// Pose of the sensor at a batch-relative tick, through the current
    /// operating point.
    pub fn pose_at_tick(&self, tick: u32) -> (Se3, usize, usize, Block6x12, Block6x12) {
        let (k, kp1, tau) = self.transform_indices(tick);
        let (hat, candle) = self.interpolation_blocks(k, tau);
        let delta: Vector6<f64> =
            hat * self.differences[k].hat_multiplier + candle * self.differences[k].candle_multiplier;
        let mut pose = self.knots[k].pose.clone();
        pose.manifold_plus(&delta);
        (pose, k, kp1, hat, candle)
    }

    /// Transform a sensor-frame point at acquisition tick into the map
    /// frame. Returns the map point, the bracketing knot indices and the
    /// interpolation blocks for residual construction.
    pub fn transform_to_map(
        &self,
        point: &Vector3<f64>,
        tick: u32,
    ) -> (Vector3<f64>, usize, usize, Block6x12, Block6x12) {
        let (pose, k, kp1, hat, candle) = self.pose_at_tick(tick);
        (pose.transform(point), k, kp1, hat, candle)
    }

    /// Transform a sensor-frame point at acquisition tick into the sensor
    /// frame at sweep end (undistortion).
    pub fn transform_to_sweep_end(&self, point: &Vector3<f64>, tick: u32) -> Vector3<f64> {
        let (map_point, ..) = self.transform_to_map(point, tick);
        self.sweep_end_pose().inverse_transform(&map_point)
    }

    /// Recompute the per-pair difference multipliers from the knots.
    pub fn update_differences(&mut self) {
        for i in 0..self.differences.len() {
            let xi = self.knots[i + 1].pose.manifold_minus(&self.knots[i].pose);
            let diff = &mut self.differences[i];
            diff.hat_multiplier.fixed_rows_mut::<6>(0).fill(0.0);
            diff.hat_multiplier
                .fixed_rows_mut::<6>(6)
                .copy_from(&self.knots[i].twist);
            diff.candle_multiplier.fixed_rows_mut::<6>(0).copy_from(&xi);
            diff.candle_multiplier
                .fixed_rows_mut::<6>(6)
                .copy_from(&(se3_approx_inv_left_jacobian(&xi) * self.knots[i + 1].twist));
        }
    }

    /// Apply solved corrections to every knot and refresh the differences.
    /// Corrections are consumed; the caller's parameter blocks go back to
    /// zero for the next iteration.
    pub fn update_operating_point(&mut self, corrections: &[Vector12]) {
        debug_assert_eq!(corrections.len(), self.knots.len());
        for (knot, delta) in self.knots.iter_mut().zip(corrections) {
            let pose_delta: Vector6<f64> = delta.fixed_rows::<6>(0).into_owned();
            let twist_delta: Vector6<f64> = delta.fixed_rows::<6>(6).into_owned();
            knot.pose.manifold_plus(&pose_delta);
            knot.twist += twist_delta;
        }
        self.update_differences();
    }

    /// Record the current knots as the previous operating point.
    pub fn copy_to_prev(&mut self) {
        self.prev_knots.clone_from(&self.knots);
    }

    /// Knot-to-knot deltas of the current operating point against the
    /// previous one, skipping the first `offset` knots. Pose tangent
    /// stacked over twist difference, one 12-vector per unlocked knot.
    pub fn delta_from_prev(&self, offset: usize) -> Vec<Vector12> {
        (offset..self.knots.len())
            .map(|i| {
                let mut delta = Vector12::zeros();
                delta
                    .fixed_rows_mut::<6>(0)
                    .copy_from(&self.knots[i].pose.manifold_minus(&self.prev_knots[i].pose));
                delta
                    .fixed_rows_mut::<6>(6)
                    .copy_from(&(self.knots[i].twist - self.prev_knots[i].twist));
                delta
            })
            .collect()
    }

    /// Re-apply a remapped delta on top of the previous operating point and
    /// make the result the new reference (solution remapping, final step).
    pub fn apply_remapped_delta(&mut self, offset: usize, mapped: &[Vector12]) {
        debug_assert_eq!(mapped.len() + offset, self.knots.len());
        for (slot, delta) in mapped.iter().enumerate() {
            let i = slot + offset;
            let mut pose = self.prev_knots[i].pose.clone();
            pose.manifold_plus(&delta.fixed_rows::<6>(0).into_owned());
            self.knots[i].pose = pose;
            self.knots[i].twist = self.prev_knots[i].twist + delta.fixed_rows::<6>(6).into_owned();
        }
        self.update_differences();
        self.copy_to_prev();
    }

    /// Sweep rollover with motion extrapolation: the new first knot is the
    /// old last knot's pose; each subsequent knot composes `Δt·twist_last`
    /// on the manifold; the last twist is carried as the prior twist and
    /// the inverse of the prior pose is cached.
    pub fn rollover(&mut self) {
        let last = self.knots.len() - 1;
        self.prior_twist = self.knots[last].twist;
        self.inv_prior_pose = self.knots[last].pose.inverse();

        let last_twist = self.knots[last].twist;
        let step = self.config.window_duration() / (self.knots.len() - 1) as f64;
        let step_xi: Vector6<f64> = last_twist * step;

        self.knots[0].pose = self.knots[last].pose.clone();
        for i in 1..self.knots.len() {
            let mut pose = self.knots[i - 1].pose.clone();
            pose.manifold_plus(&step_xi);
            self.knots[i].pose = pose;
        }
        self.copy_to_prev();
        self.update_differences();
    }

    /// Reset every knot to identity with zero twist; clears the priors.
    pub fn reset(&mut self) {
        for knot in &mut self.knots {
            *knot = TrajectoryKnot::identity();
        }
        self.prior_twist = Twist::zeros();
        self.inv_prior_pose = Se3::identity();
        self.copy_to_prev();
        self.update_differences();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn config(k: usize) -> TrajectoryConfig {
        TrajectoryConfig {
            num_trajectory_states: k,
            scan_period: 0.1,
            n_window: 1,
            max_ticks: 1000,
            qc_diagonal: [1.0; 6],
        }
    }

    #[test]
    fn test_requires_two_knots() {
        assert!(Trajectory::new(config(1)).is_err());
        assert!(Trajectory::new(config(2)).is_ok());
    }

    #[test]
    fn test_stamps_monotone_and_even() {
        let trajectory = Trajectory::new(config(5)).unwrap();
        let stamps = trajectory.stamps();
        assert_eq!(stamps.len(), 5);
        let step = stamps[1] - stamps[0];
        for pair in stamps.windows(2) {
            assert!(pair[1] > pair[0]);
            assert_relative_eq!(pair[1] - pair[0], step, epsilon = 1e-12);
        }
        assert_relative_eq!(*stamps.last().unwrap(), 0.1, epsilon = 1e-12);
    }

    #[test]
    fn test_interpolation_consistency_at_knots() {
        // transformToMap(p, tick at knot k) == pose_k · p, exactly.
        let mut trajectory = Trajectory::new(config(3)).unwrap();
        // Give the trajectory real motion.
        let corrections: Vec<Vector12> = (0..3)
            .map(|i| {
                let mut c = Vector12::zeros();
                c[3] = 0.1 * i as f64; // x translation
                c[2] = 0.05 * i as f64; // yaw
                c[9] = 1.0; // forward velocity
                c
            })
            .collect();
        trajectory.update_operating_point(&corrections);

        let p = nalgebra::Vector3::new(1.0, 2.0, 3.0);
        // tick 0 -> knot 0, tick 500 -> knot 1 boundary, tick at end of
        // segment hits the next knot exactly.
        let (mapped, ..) = trajectory.transform_to_map(&p, 0);
        assert_relative_eq!(mapped, trajectory.knots()[0].pose.transform(&p), epsilon = 1e-9);

        let (mapped_mid, k, _, _, _) = trajectory.transform_to_map(&p, 500);
        assert_eq!(k, 1);
        assert_relative_eq!(
            mapped_mid,
            trajectory.knots()[1].pose.transform(&p),
            epsilon = 1e-9
        );
    }

    #[test]
    fn test_differences_match_manifold_minus() {
        let mut trajectory = Trajectory::new(config(3)).unwrap();
        let corrections: Vec<Vector12> = (0..3)
            .map(|i| {
                let mut c = Vector12::zeros();
                c[3] = 0.2 * i as f64;
                c[1] = -0.03 * i as f64;
                c
            })
            .collect();
        trajectory.update_operating_point(&corrections);

        for i in 0..2 {
            let expected = trajectory.knots()[i + 1]
                .pose
                .manifold_minus(&trajectory.knots()[i].pose);
            let stored: Vector6<f64> = trajectory
                .difference(i)
                .candle_multiplier
                .fixed_rows::<6>(0)
                .into_owned();
            assert_relative_eq!(stored, expected, epsilon = 1e-9);
        }
    }

    #[test]
    fn test_rollover_extrapolates_motion() {
        let mut trajectory = Trajectory::new(config(3)).unwrap();
        // Constant forward velocity of 1 m/s on every knot.
        let corrections: Vec<Vector12> = (0..3)
            .map(|_| {
                let mut c = Vector12::zeros();
                c[9] = 1.0;
                c
            })
            .collect();
        trajectory.update_operating_point(&corrections);
        trajectory.rollover();

        // Window is 0.1 s over 2 segments: knots advance 0.05 m each.
        let t0 = trajectory.knots()[0].pose.translation().x;
        let t1 = trajectory.knots()[1].pose.translation().x;
        let t2 = trajectory.knots()[2].pose.translation().x;
        assert_relative_eq!(t1 - t0, 0.05, epsilon = 1e-9);
        assert_relative_eq!(t2 - t1, 0.05, epsilon = 1e-9);
    }

    #[test]
    fn test_rollover_idempotent_on_zero_motion() {
        // With zero twist everywhere, rollover collapses all knots onto the
        // last pose and leaves them unchanged.
        let mut trajectory = Trajectory::new(config(4)).unwrap();
        let corrections: Vec<Vector12> = (0..4)
            .map(|i| {
                let mut c = Vector12::zeros();
                c[3] = 0.1 * i as f64;
                c
            })
            .collect();
        trajectory.update_operating_point(&corrections);
        let last = trajectory.sweep_end_pose().clone();

        trajectory.rollover();
        for knot in trajectory.knots() {
            assert!(knot.pose.is_near(&last, 1e-10));
        }

        // A second rollover changes nothing.
        trajectory.rollover();
        for knot in trajectory.knots() {
            assert!(knot.pose.is_near(&last, 1e-10));
        }
    }

    #[test]
    fn test_rollover_caches_prior() {
        let mut trajectory = Trajectory::new(config(2)).unwrap();
        let corrections: Vec<Vector12> = (0..2)
            .map(|_| {
                let mut c = Vector12::zeros();
                c[3] = 1.0;
                c[9] = 2.0;
                c
            })
            .collect();
        trajectory.update_operating_point(&corrections);
        let last_pose = trajectory.sweep_end_pose().clone();

        trajectory.rollover();
        assert_relative_eq!(trajectory.prior_twist()[0], 0.0); // rotational part untouched
        assert_relative_eq!(trajectory.prior_twist()[3], 2.0);
        let recomposed = last_pose.compose(trajectory.inv_prior_pose());
        assert!(recomposed.is_near(&Se3::identity(), 1e-10));
    }

    #[test]
    fn test_prior_error_zero_after_rollover() {
        let mut trajectory = Trajectory::new(config(3)).unwrap();
        let corrections: Vec<Vector12> = (0..3)
            .map(|_| {
                let mut c = Vector12::zeros();
                c[9] = 0.5;
                c
            })
            .collect();
        trajectory.update_operating_point(&corrections);
        trajectory.rollover();
        // Knot 0 equals the prior pose and twist right after rollover.
        let err = trajectory.prior_error();
        assert_relative_eq!(err.fixed_rows::<6>(0).norm(), 0.0, epsilon = 1e-10);
        assert_relative_eq!(err.fixed_rows::<6>(6).norm(), 0.0, epsilon = 1e-10);
    }

    #[test]
    fn test_transform_indices_bounds() {
        let trajectory = Trajectory::new(config(4)).unwrap();
        let (k, kp1, tau) = trajectory.transform_indices(0);
        assert_eq!((k, kp1), (0, 1));
        assert_relative_eq!(tau, 0.0);

        // The final tick stays inside the last segment.
        let (k, kp1, tau) = trajectory.transform_indices(999);
        assert_eq!((k, kp1), (2, 3));
        assert!(tau < 0.1);
    }

    #[test]
    fn test_reset_clears_state() {
        let mut trajectory = Trajectory::new(config(3)).unwrap();
        let corrections: Vec<Vector12> = (0..3)
            .map(|_| {
                let mut c = Vector12::zeros();
                c[3] = 5.0;
                c[9] = 3.0;
                c
            })
            .collect();
        trajectory.update_operating_point(&corrections);
        trajectory.rollover();
        trajectory.reset();

        for knot in trajectory.knots() {
            assert!(knot.pose.is_near(&Se3::identity(), 1e-12));
            assert_relative_eq!(knot.twist.norm(), 0.0);
        }
        assert_relative_eq!(trajectory.prior_twist().norm(), 0.0);
    }
}
