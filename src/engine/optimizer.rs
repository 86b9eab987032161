//! Sweep optimizer: problem assembly, iterated linearization, robustified
//! dense least-squares solve and solution remapping.
//!
//! One invocation per sweep-boundary trigger. Each outer iteration
//! re-linearizes the problem around the current operating point:
//!
//! 1. one prior residual at knot 0 (segment-0 inverse covariance),
//! 2. `K−1` constant-velocity residuals over adjacent knot pairs,
//! 3. one gated point-to-line / point-to-plane residual per admitted
//!    feature correspondence, wrapped in a bisquare robust loss,
//!
//! then solves the weighted linear least squares by dense QR with
//! iteratively reweighted robust weights, applies the corrections to the
//! operating point, and optionally remaps the update through the
//! well-conditioned eigenspace of the information matrix.

use nalgebra::{DMatrix, DVector, Matrix3, Vector3};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::algorithms::matching::{
    BisquareLoss, CorrespondenceManager, InterpRecord, PointToLineGp, PointToPlaneGp, RecordPool,
    ResidualKind,
};
use crate::algorithms::trajectory::{Matrix12, Trajectory, Vector12};
use crate::core::types::FeaturePoint;
use crate::error::{OdometryError, Result};
use crate::sensors::RangeSensorModel;

/// Inner-loop cost tolerance.
const F_TOL: f64 = 1e-8;

/// Inner-loop step tolerance.
const P_TOL: f64 = 1e-7;

fn default_opt_iters() -> usize {
    10
}

fn default_max_inner_iters() -> usize {
    10
}

fn default_diff_tol() -> f64 {
    1e-5
}

fn default_min_residuals() -> usize {
    30
}

fn default_max_residual_val() -> f64 {
    0.1
}

fn default_robust_param() -> f64 {
    0.25
}

fn default_use_weighting() -> bool {
    true
}

fn default_lock_first() -> bool {
    true
}

fn default_motion_prior() -> bool {
    true
}

fn default_solution_remapping() -> bool {
    false
}

fn default_min_eigen() -> f64 {
    1e-3
}

fn default_treat_lines_as_planes() -> bool {
    false
}

fn default_solver_threads() -> usize {
    0
}

fn default_ptl_capacity() -> usize {
    1000
}

fn default_ptp_capacity() -> usize {
    3000
}

fn default_plot_stuff() -> bool {
    false
}

/// Solver configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OptimizerConfig {
    /// Outer linearization iterations per sweep.
    #[serde(default = "default_opt_iters")]
    pub opt_iters: usize,
    /// Inner robust-reweighting iterations per linearization.
    #[serde(default = "default_max_inner_iters")]
    pub max_inner_iters: usize,
    /// Outer convergence: tangent-space tolerance on the last knot's pose.
    #[serde(default = "default_diff_tol")]
    pub diff_tol: f64,
    /// Minimum residual blocks; below this the tracker resets.
    #[serde(default = "default_min_residuals")]
    pub min_residuals: usize,
    /// Pre-evaluation rejection threshold on the whitened residual norm.
    #[serde(default = "default_max_residual_val")]
    pub max_residual_val: f64,
    /// Bisquare loss parameter.
    #[serde(default = "default_robust_param")]
    pub robust_param: f64,
    /// Whiten feature residuals with the range-sensor covariance.
    #[serde(default = "default_use_weighting")]
    pub use_weighting: bool,
    /// Freeze the first knot's correction block.
    #[serde(default = "default_lock_first")]
    pub lock_first: bool,
    /// Add the start-of-sweep prior residual.
    #[serde(default = "default_motion_prior")]
    pub motion_prior: bool,
    /// Project updates into the well-conditioned eigenspace.
    #[serde(default = "default_solution_remapping")]
    pub solution_remapping: bool,
    /// Eigenvalues of the information matrix below this are zeroed.
    #[serde(default = "default_min_eigen")]
    pub min_eigen: f64,
    /// Degrade line correspondences to plane residuals anchored at the
    /// sensor origin; stabilizes long straight corridors.
    #[serde(default = "default_treat_lines_as_planes")]
    pub treat_lines_as_planes: bool,
    /// Linearization thread-pool size. 0 selects hardware concurrency.
    #[serde(default = "default_solver_threads")]
    pub solver_threads: usize,
    /// Point-to-line interpolation-record pool capacity.
    #[serde(default = "default_ptl_capacity")]
    pub ptl_capacity: usize,
    /// Point-to-plane interpolation-record pool capacity.
    #[serde(default = "default_ptp_capacity")]
    pub ptp_capacity: usize,
    /// Route verbose solver diagnostics through debug logging.
    #[serde(default = "default_plot_stuff")]
    pub plot_stuff: bool,
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self {
            opt_iters: 10,
            max_inner_iters: 10,
            diff_tol: 1e-5,
            min_residuals: 30,
            max_residual_val: 0.1,
            robust_param: 0.25,
            use_weighting: true,
            lock_first: true,
            motion_prior: true,
            solution_remapping: false,
            min_eigen: 1e-3,
            treat_lines_as_planes: false,
            solver_threads: 0,
            ptl_capacity: 1000,
            ptp_capacity: 3000,
            plot_stuff: false,
        }
    }
}

/// Outcome of one sweep optimization.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchStatus {
    /// The last knot's pose moved less than `diff_tol` in an iteration.
    Converged { iterations: usize },
    /// The outer iteration budget ran out first.
    MaxIterations { iterations: usize },
}

/// One admitted correspondence, kept for the output dumps.
#[derive(Debug, Clone)]
pub struct Correspondence {
    /// The query feature in the sensor frame at acquisition time.
    pub feature: FeaturePoint,
    /// Matched local-map entry indices, nearest first.
    pub map_entries: Vec<usize>,
}

enum CandidateGeometry {
    Line(PointToLineGp),
    Plane(PointToPlaneGp),
}

/// A feature residual that survived gating and pre-evaluation, before its
/// pool slot is claimed.
struct Candidate {
    f_idx: usize,
    feature: FeaturePoint,
    record: InterpRecord,
    indices: Vec<usize>,
    geometry: CandidateGeometry,
}

enum ResidualBlock {
    Prior {
        weight_root: Matrix12,
        error: Vector12,
    },
    Motion {
        k: usize,
        weight_root: Matrix12,
        error: Vector12,
        dt: f64,
    },
    Line(PointToLineGp),
    Plane(PointToPlaneGp),
}

impl ResidualBlock {
    fn dim(&self) -> usize {
        match self {
            ResidualBlock::Prior { .. } | ResidualBlock::Motion { .. } => 12,
            ResidualBlock::Line(_) => 2,
            ResidualBlock::Plane(_) => 1,
        }
    }

    fn robust(&self) -> bool {
        matches!(self, ResidualBlock::Line(_) | ResidualBlock::Plane(_))
    }
}

/// The per-sweep nonlinear solver.
pub struct SweepOptimizer {
    config: OptimizerConfig,
    ptl_pool: RecordPool,
    ptp_pool: RecordPool,
    pool: rayon::ThreadPool,
    correspondences: Vec<Vec<Correspondence>>,
}

impl SweepOptimizer {
    pub fn new(config: OptimizerConfig, n_feature_kinds: usize) -> Result<Self> {
        if config.opt_iters == 0 || config.max_inner_iters == 0 {
            return Err(OdometryError::Config(
                "opt_iters and max_inner_iters must be positive".into(),
            ));
        }
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(config.solver_threads)
            .thread_name(|i| format!("odom-solver-{}", i))
            .build()
            .map_err(|e| OdometryError::Config(format!("solver pool: {}", e)))?;
        Ok(Self {
            ptl_pool: RecordPool::new(config.ptl_capacity, "PtLMem"),
            ptp_pool: RecordPool::new(config.ptp_capacity, "PtPMem"),
            pool,
            correspondences: vec![Vec::new(); n_feature_kinds],
            config,
        })
    }

    pub fn config(&self) -> &OptimizerConfig {
        &self.config
    }

    pub fn set_config(&mut self, config: OptimizerConfig) {
        if config.ptl_capacity != self.config.ptl_capacity {
            self.ptl_pool = RecordPool::new(config.ptl_capacity, "PtLMem");
        }
        if config.ptp_capacity != self.config.ptp_capacity {
            self.ptp_pool = RecordPool::new(config.ptp_capacity, "PtPMem");
        }
        self.config = config;
    }

    /// Correspondences admitted by the most recent iteration, per feature
    /// kind. Consumed by the correspondence dump.
    pub fn last_correspondences(&self) -> &[Vec<Correspondence>] {
        &self.correspondences
    }

    /// Run the full optimization for one sweep.
    ///
    /// On tracking loss the trajectory has been reset and the error is
    /// surfaced so the engine can clear its initialization flag. On pool
    /// exhaustion the operating point is unchanged.
    pub fn optimize(
        &mut self,
        trajectory: &mut Trajectory,
        correspondences: &mut CorrespondenceManager,
        features: &[Vec<Vec<FeaturePoint>>],
        range_model: &RangeSensorModel,
    ) -> Result<MatchStatus> {
        trajectory.copy_to_prev();
        for iter in 0..self.config.opt_iters {
            let before = trajectory.sweep_end_pose().clone();
            self.step(trajectory, correspondences, features, range_model)?;
            if trajectory.sweep_end_pose().is_near(&before, self.config.diff_tol) {
                return Ok(MatchStatus::Converged {
                    iterations: iter + 1,
                });
            }
        }
        Ok(MatchStatus::MaxIterations {
            iterations: self.config.opt_iters,
        })
    }

    /// One outer iteration: assemble, solve, update, remap.
    fn step(
        &mut self,
        trajectory: &mut Trajectory,
        correspondences: &mut CorrespondenceManager,
        features: &[Vec<Vec<FeaturePoint>>],
        range_model: &RangeSensorModel,
    ) -> Result<()> {
        self.ptl_pool.reset();
        self.ptp_pool.reset();
        for kind in &mut self.correspondences {
            kind.clear();
        }

        let mut blocks: Vec<ResidualBlock> = Vec::new();

        if self.config.motion_prior {
            let weight_root = sqrt_information(&trajectory.segment(0).lin_inv_covariance());
            blocks.push(ResidualBlock::Prior {
                weight_root,
                error: trajectory.prior_error(),
            });
        }

        for k in 0..trajectory.len() - 1 {
            let segment = trajectory.segment(k);
            let dt = segment.dt();
            let weight_root = sqrt_information(&segment.lin_inv_covariance());

            let mut error = Vector12::zeros();
            let pose_err = trajectory.knots()[k + 1]
                .pose
                .manifold_minus(&trajectory.knots()[k].pose)
                - trajectory.knots()[k].twist * dt;
            error.fixed_rows_mut::<6>(0).copy_from(&pose_err);
            error
                .fixed_rows_mut::<6>(6)
                .copy_from(&(trajectory.knots()[k + 1].twist - trajectory.knots()[k].twist));

            blocks.push(ResidualBlock::Motion {
                k,
                weight_root,
                error,
                dt,
            });
        }

        self.assemble_feature_blocks(
            trajectory,
            correspondences,
            features,
            range_model,
            &mut blocks,
        )?;

        if blocks.len() < self.config.min_residuals {
            log::error!(
                "Less than expected residuals, resetting: {} residuals, threshold is {}",
                blocks.len(),
                self.config.min_residuals
            );
            let count = blocks.len();
            trajectory.reset();
            return Err(OdometryError::TrackingLost {
                residuals: count,
                min: self.config.min_residuals,
            });
        }

        let (corrections, information) = self.solve(trajectory, &blocks);
        trajectory.update_operating_point(&corrections);

        if self.config.solution_remapping {
            self.apply_remap(trajectory, &information);
        } else {
            trajectory.copy_to_prev();
        }
        Ok(())
    }

    /// Transform, gate and pre-evaluate every feature point, then claim
    /// pool slots for the survivors. The per-point work runs on the solver
    /// pool; all tasks join before assembly continues.
    fn assemble_feature_blocks(
        &mut self,
        trajectory: &Trajectory,
        correspondences: &mut CorrespondenceManager,
        features: &[Vec<Vec<FeaturePoint>>],
        range_model: &RangeSensorModel,
        blocks: &mut Vec<ResidualBlock>,
    ) -> Result<()> {
        let work: Vec<(usize, FeaturePoint)> = features
            .iter()
            .enumerate()
            .flat_map(|(f_idx, rings)| {
                rings
                    .iter()
                    .flat_map(move |ring| ring.iter().map(move |pt| (f_idx, *pt)))
            })
            .collect();

        let config = &self.config;
        let corr: &CorrespondenceManager = correspondences;
        let candidates: Vec<Option<Candidate>> = self.pool.install(|| {
            work.par_iter()
                .map(|(f_idx, feature)| {
                    build_candidate(config, trajectory, corr, range_model, *f_idx, feature)
                })
                .collect()
        });

        // First pass: claim a pool slot for every survivor. Exhaustion
        // aborts the sweep here, before any correspondence state changes;
        // the partial allocations are recycled by the next iteration's
        // pool reset.
        let mut admitted = Vec::new();
        for candidate in candidates.into_iter().flatten() {
            let Candidate {
                f_idx,
                feature,
                record,
                indices,
                geometry,
            } = candidate;

            let block = match geometry {
                CandidateGeometry::Line(mut residual) => {
                    residual.mem = self.ptl_pool.alloc(record)?;
                    ResidualBlock::Line(residual)
                }
                CandidateGeometry::Plane(mut residual) => {
                    residual.mem = self.ptp_pool.alloc(record)?;
                    ResidualBlock::Plane(residual)
                }
            };
            admitted.push((f_idx, feature, indices, block));
        }

        // Second pass: every slot is claimed, so the sweep is committed;
        // flag the map entries and record the blocks.
        for (f_idx, feature, indices, block) in admitted {
            for &entry in &indices {
                correspondences.mark_corresponded(f_idx, entry);
            }
            self.correspondences[f_idx].push(Correspondence {
                feature,
                map_entries: indices,
            });
            blocks.push(block);
        }
        Ok(())
    }

    /// Robustified dense least squares over the linearized problem.
    /// Returns the per-knot corrections and the final information matrix
    /// over the active variables.
    fn solve(
        &self,
        trajectory: &Trajectory,
        blocks: &[ResidualBlock],
    ) -> (Vec<Vector12>, DMatrix<f64>) {
        let n_knots = trajectory.len();
        let knot_offset = if self.config.lock_first { 1 } else { 0 };
        let n_active = 12 * (n_knots - knot_offset);
        let rows: usize = blocks.iter().map(|b| b.dim()).sum();

        let mut jacobian = DMatrix::<f64>::zeros(rows, n_active);
        let mut residual = DVector::<f64>::zeros(rows);
        let mut row_starts = Vec::with_capacity(blocks.len());

        let column_of = |knot: usize| -> Option<usize> {
            knot.checked_sub(knot_offset).map(|active| 12 * active)
        };

        let mut row = 0;
        for block in blocks {
            row_starts.push(row);
            match block {
                ResidualBlock::Prior { weight_root, error } => {
                    residual.rows_mut(row, 12).copy_from(&(weight_root * error));
                    if let Some(col) = column_of(0) {
                        jacobian
                            .view_mut((row, col), (12, 12))
                            .copy_from(weight_root);
                    }
                }
                ResidualBlock::Motion {
                    k,
                    weight_root,
                    error,
                    dt,
                } => {
                    residual.rows_mut(row, 12).copy_from(&(weight_root * error));
                    // d(error)/d(δ_k) = −Φ(dt), d(error)/d(δ_k+1) = I.
                    let mut j_k = Matrix12::identity();
                    for i in 0..6 {
                        j_k[(i, i + 6)] = *dt;
                    }
                    let j_k = -(weight_root * j_k);
                    if let Some(col) = column_of(*k) {
                        jacobian.view_mut((row, col), (12, 12)).copy_from(&j_k);
                    }
                    if let Some(col) = column_of(k + 1) {
                        jacobian
                            .view_mut((row, col), (12, 12))
                            .copy_from(weight_root);
                    }
                }
                ResidualBlock::Line(line) => {
                    let record = self.ptl_pool.get(line.mem);
                    let (res, j_k, j_kp1) = line.linearize(record);
                    residual.rows_mut(row, 2).copy_from(&res);
                    if let Some(col) = column_of(line.knots.0) {
                        jacobian.view_mut((row, col), (2, 12)).copy_from(&j_k);
                    }
                    if let Some(col) = column_of(line.knots.1) {
                        jacobian.view_mut((row, col), (2, 12)).copy_from(&j_kp1);
                    }
                }
                ResidualBlock::Plane(plane) => {
                    let record = self.ptp_pool.get(plane.mem);
                    let (res, j_k, j_kp1) = plane.linearize(record);
                    residual[row] = res;
                    if let Some(col) = column_of(plane.knots.0) {
                        jacobian.view_mut((row, col), (1, 12)).copy_from(&j_k);
                    }
                    if let Some(col) = column_of(plane.knots.1) {
                        jacobian.view_mut((row, col), (1, 12)).copy_from(&j_kp1);
                    }
                }
            }
            row += block.dim();
        }

        // Iteratively reweighted least squares on the fixed linearization.
        let loss = BisquareLoss::new(self.config.robust_param);
        let mut delta = DVector::<f64>::zeros(n_active);
        let mut weighted_j = jacobian.clone();
        let mut weighted_r = residual.clone();
        let mut prev_cost = f64::INFINITY;

        for inner in 0..self.config.max_inner_iters {
            weighted_j.copy_from(&jacobian);
            weighted_r.copy_from(&residual);
            for (block, &start) in blocks.iter().zip(&row_starts) {
                if !block.robust() {
                    continue;
                }
                let dim = block.dim();
                let current = jacobian.rows(start, dim) * &delta + residual.rows(start, dim);
                let w = loss.weight(current.norm()).sqrt();
                weighted_j.rows_mut(start, dim).scale_mut(w);
                weighted_r.rows_mut(start, dim).scale_mut(w);
            }

            let next = solve_least_squares(&weighted_j, &weighted_r);
            let cost = (&weighted_j * &next + &weighted_r).norm_squared();

            let step_norm = (&next - &delta).norm();
            let converged_step = step_norm < P_TOL * (next.norm() + P_TOL);
            let converged_cost =
                prev_cost.is_finite() && (prev_cost - cost).abs() < F_TOL * prev_cost.max(F_TOL);
            delta = next;
            prev_cost = cost;
            if converged_step || converged_cost {
                if self.config.plot_stuff {
                    log::debug!("inner solve converged after {} iterations", inner + 1);
                }
                break;
            }
        }

        if self.config.plot_stuff {
            log::debug!(
                "solved {} rows over {} active variables, final cost {:.3e}",
                rows,
                n_active,
                prev_cost
            );
        }

        let information = weighted_j.transpose() * &weighted_j;

        let mut corrections = vec![Vector12::zeros(); n_knots];
        for knot in knot_offset..n_knots {
            let col = 12 * (knot - knot_offset);
            corrections[knot].copy_from(&delta.rows(col, 12));
        }
        (corrections, information)
    }

    /// Solution remapping: eigendecompose the information matrix, zero the
    /// eigenvalues below `min_eigen`, and project the knot-to-knot delta of
    /// this iteration into the surviving eigenspace.
    fn apply_remap(&self, trajectory: &mut Trajectory, information: &DMatrix<f64>) {
        let knot_offset = if self.config.lock_first { 1 } else { 0 };
        let eigen = information.clone().symmetric_eigen();

        let mut suppressed = 0usize;
        let n = eigen.eigenvalues.len();
        let mut projector = DMatrix::<f64>::zeros(n, n);
        for i in 0..n {
            if eigen.eigenvalues[i] < self.config.min_eigen {
                suppressed += 1;
                continue;
            }
            let v = eigen.eigenvectors.column(i);
            projector += &v * v.transpose();
        }
        if self.config.plot_stuff {
            log::debug!(
                "solution remapping suppressed {} of {} directions",
                suppressed,
                n
            );
        }

        let deltas = trajectory.delta_from_prev(knot_offset);
        let mut stacked = DVector::<f64>::zeros(n);
        for (i, delta) in deltas.iter().enumerate() {
            stacked.rows_mut(12 * i, 12).copy_from(delta);
        }
        let mapped = projector * stacked;

        let mapped_blocks: Vec<Vector12> = (0..deltas.len())
            .map(|i| Vector12::from_iterator(mapped.rows(12 * i, 12).iter().copied()))
            .collect();
        trajectory.apply_remapped_delta(knot_offset, &mapped_blocks);
    }
}

/// Transform one feature point through the operating point, query its
/// neighbors, gate and pre-evaluate the residual.
fn build_candidate(
    config: &OptimizerConfig,
    trajectory: &Trajectory,
    correspondences: &CorrespondenceManager,
    range_model: &RangeSensorModel,
    f_idx: usize,
    feature: &FeaturePoint,
) -> Option<Candidate> {
    let (query, k, kp1, hat, candle) = trajectory.transform_to_map(&feature.position, feature.tick);
    let indices = correspondences.find_corresponding(f_idx, &query)?;
    if correspondences.config().no_extrapolation
        && correspondences.out_of_bounds(f_idx, &query, &indices)
    {
        return None;
    }

    let covariance: Option<Matrix3<f64>> = if config.use_weighting {
        Some(range_model.euclidean_covariance(&feature.position, feature.ring))
    } else {
        None
    };

    let record = InterpRecord {
        hat,
        candle,
        query,
    };
    let map = |i: usize| correspondences.map(f_idx).position(indices[i]);

    let geometry = match correspondences.kind(f_idx) {
        ResidualKind::PointToLine if !config.treat_lines_as_planes => {
            let residual = PointToLineGp::new(map(0), map(1), covariance.as_ref(), 0, (k, kp1))?;
            if residual.residual(&record).norm()
                > residual.weight_scale().powi(2) * config.max_residual_val
            {
                return None;
            }
            CandidateGeometry::Line(residual)
        }
        ResidualKind::PointToLine => {
            // Lines degrade to planes anchored at the sensor origin.
            let residual = PointToPlaneGp::new(
                map(0),
                map(1),
                Vector3::zeros(),
                covariance.as_ref(),
                0,
                (k, kp1),
            )?;
            if residual.residual(&record).abs()
                > residual.weight_scale().powi(2) * config.max_residual_val
            {
                return None;
            }
            CandidateGeometry::Plane(residual)
        }
        ResidualKind::PointToPlane => {
            let residual = PointToPlaneGp::new(
                map(0),
                map(1),
                map(2),
                covariance.as_ref(),
                0,
                (k, kp1),
            )?;
            if residual.residual(&record).abs()
                > residual.weight_scale().powi(2) * config.max_residual_val
            {
                return None;
            }
            CandidateGeometry::Plane(residual)
        }
    };

    Some(Candidate {
        f_idx,
        feature: *feature,
        record,
        indices,
        geometry,
    })
}

/// Upper Cholesky factor of a symmetric positive matrix: the whitener `W`
/// with `WᵀW = M`.
fn sqrt_information(information: &Matrix12) -> Matrix12 {
    match nalgebra::Cholesky::new(*information) {
        Some(chol) => chol.l().transpose(),
        None => {
            // Fall back to a damped factorization; the closed-form inverse
            // process noise is SPD up to roundoff.
            let damped = information + Matrix12::identity() * 1e-9;
            nalgebra::Cholesky::new(damped)
                .map(|c| c.l().transpose())
                .unwrap_or_else(Matrix12::identity)
        }
    }
}

/// Dense-QR least squares `min ‖J·d + r‖`, with a damped normal-equation
/// fallback when the triangular factor is singular.
fn solve_least_squares(jacobian: &DMatrix<f64>, residual: &DVector<f64>) -> DVector<f64> {
    let qr = jacobian.clone().qr();
    let qt_r = qr.q().transpose() * residual;
    if let Some(solution) = qr.r().solve_upper_triangular(&(-&qt_r)) {
        return solution;
    }

    let n = jacobian.ncols();
    let hessian = jacobian.transpose() * jacobian + DMatrix::<f64>::identity(n, n) * 1e-9;
    let gradient = -(jacobian.transpose() * residual);
    hessian
        .cholesky()
        .map(|c| c.solve(&gradient))
        .unwrap_or_else(|| DVector::zeros(n))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::algorithms::matching::{AssociationStatus, LocalMapConfig};
    use crate::algorithms::trajectory::TrajectoryConfig;
    use crate::sensors::RangeModelConfig;
    use approx::assert_relative_eq;
    use nalgebra::Vector3;

    fn trajectory() -> Trajectory {
        Trajectory::new(TrajectoryConfig {
            num_trajectory_states: 3,
            scan_period: 0.1,
            n_window: 1,
            max_ticks: 1000,
            qc_diagonal: [1.0; 6],
        })
        .unwrap()
    }

    fn flat_floor_manager() -> CorrespondenceManager {
        // A dense planar floor at z = -1 for plane correspondences.
        let mut mgr = CorrespondenceManager::new(
            LocalMapConfig {
                flat_map_density: 0.0,
                ..LocalMapConfig::default()
            },
            vec![ResidualKind::PointToPlane],
        );
        for i in 0..20 {
            for j in 0..20 {
                let p = Vector3::new(-2.0 + i as f64 * 0.2, -2.0 + j as f64 * 0.2, -1.0);
                mgr.promote(0, &p);
            }
        }
        mgr.rebuild(0);
        mgr
    }

    fn floor_features(n: usize) -> Vec<Vec<Vec<FeaturePoint>>> {
        // Sensor-frame points on the same floor, one ring.
        let features: Vec<FeaturePoint> = (0..n)
            .map(|i| {
                let angle = i as f64 / n as f64 * std::f64::consts::TAU;
                FeaturePoint {
                    position: Vector3::new(angle.cos(), angle.sin(), -1.0),
                    tick: (i as f64 / n as f64 * 999.0) as u32,
                    ring: 0,
                }
            })
            .collect();
        vec![vec![features]]
    }

    #[test]
    fn test_tracking_lost_resets_trajectory() {
        let mut optimizer = SweepOptimizer::new(OptimizerConfig::default(), 1).unwrap();
        let mut trajectory = trajectory();
        // Give the trajectory nonzero state to observe the reset.
        let corrections: Vec<Vector12> = (0..3)
            .map(|_| {
                let mut c = Vector12::zeros();
                c[3] = 1.0;
                c
            })
            .collect();
        trajectory.update_operating_point(&corrections);

        let mut mgr = CorrespondenceManager::new(
            LocalMapConfig::default(),
            vec![ResidualKind::PointToPlane],
        );
        let range_model = RangeSensorModel::new(RangeModelConfig::default());
        let features = floor_features(4);

        let err = optimizer
            .optimize(&mut trajectory, &mut mgr, &features, &range_model)
            .unwrap_err();
        assert!(matches!(err, OdometryError::TrackingLost { .. }));
        assert!(trajectory
            .sweep_end_pose()
            .is_near(&crate::core::types::Se3::identity(), 1e-12));
    }

    #[test]
    fn test_static_floor_converges_near_identity() {
        let config = OptimizerConfig {
            min_residuals: 10,
            ..OptimizerConfig::default()
        };
        let mut optimizer = SweepOptimizer::new(config, 1).unwrap();
        let mut trajectory = trajectory();
        let mut mgr = flat_floor_manager();
        let range_model = RangeSensorModel::new(RangeModelConfig::default());
        let features = floor_features(60);

        optimizer
            .optimize(&mut trajectory, &mut mgr, &features, &range_model)
            .unwrap();
        // A static scene with a prior at identity stays near identity.
        let pose = trajectory.sweep_end_pose();
        assert!(pose.translation().norm() < 1e-2, "drifted: {:?}", pose);
    }

    #[test]
    fn test_zero_corrections_leave_parameter_blocks_zero() {
        // After an operating-point update the corrections are consumed:
        // a second solve on an already-converged problem produces near-zero
        // corrections (invariant 5: blocks reset each iteration).
        let config = OptimizerConfig {
            min_residuals: 10,
            opt_iters: 2,
            ..OptimizerConfig::default()
        };
        let mut optimizer = SweepOptimizer::new(config, 1).unwrap();
        let mut trajectory = trajectory();
        let mut mgr = flat_floor_manager();
        let range_model = RangeSensorModel::new(RangeModelConfig::default());
        let features = floor_features(60);

        optimizer
            .optimize(&mut trajectory, &mut mgr, &features, &range_model)
            .unwrap();
        let pose_after_first = trajectory.sweep_end_pose().clone();

        optimizer
            .optimize(&mut trajectory, &mut mgr, &features, &range_model)
            .unwrap();
        assert!(trajectory.sweep_end_pose().is_near(&pose_after_first, 1e-3));
    }

    #[test]
    fn test_pool_exhaustion_is_clean() {
        let config = OptimizerConfig {
            min_residuals: 1,
            ptp_capacity: 2,
            ..OptimizerConfig::default()
        };
        let mut optimizer = SweepOptimizer::new(config, 1).unwrap();
        let mut trajectory = trajectory();
        let before = trajectory.sweep_end_pose().clone();
        let mut mgr = flat_floor_manager();
        let range_model = RangeSensorModel::new(RangeModelConfig::default());
        let features = floor_features(60);

        let err = optimizer
            .optimize(&mut trajectory, &mut mgr, &features, &range_model)
            .unwrap_err();
        assert!(matches!(err, OdometryError::PoolExhausted { .. }));
        // Operating point untouched.
        assert!(trajectory.sweep_end_pose().is_near(&before, 1e-12));

        // The correspondence manager is untouched too: the aborted sweep
        // must not have flagged any entry as corresponded, which would
        // shield it from TTL eviction on the next maintenance pass.
        for idx in 0..mgr.map(0).len() {
            assert_eq!(mgr.map(0).status_of(idx), AssociationStatus::Uncorresponded);
        }
        let full_ttl = mgr.config().ttl;
        mgr.refresh_all();
        for idx in 0..mgr.map(0).len() {
            assert_eq!(mgr.map(0).ttl_of(idx), full_ttl - 1);
        }
    }

    #[test]
    fn test_remap_suppresses_degenerate_direction() {
        // Hand-built information matrix: strong everywhere except one
        // direction. The remapped delta must vanish along it.
        let config = OptimizerConfig {
            solution_remapping: true,
            min_eigen: 1e-3,
            lock_first: false,
            ..OptimizerConfig::default()
        };
        let optimizer = SweepOptimizer::new(config, 1).unwrap();
        let mut trajectory = trajectory();
        trajectory.copy_to_prev();

        // Move every knot: +0.1 m in x, +0.2 m in y.
        let corrections: Vec<Vector12> = (0..3)
            .map(|_| {
                let mut c = Vector12::zeros();
                c[3] = 0.1;
                c[4] = 0.2;
                c
            })
            .collect();
        trajectory.update_operating_point(&corrections);

        let n = 36;
        let mut information = DMatrix::<f64>::identity(n, n) * 1e3;
        // Degenerate x-translation direction on every knot block.
        for knot in 0..3 {
            let idx = 12 * knot + 3;
            information[(idx, idx)] = 1e-6;
        }
        optimizer.apply_remap(&mut trajectory, &information);

        for knot in trajectory.knots() {
            assert_relative_eq!(knot.pose.translation().x, 0.0, epsilon = 1e-6);
            assert_relative_eq!(knot.pose.translation().y, 0.2, epsilon = 1e-6);
        }
    }
}
