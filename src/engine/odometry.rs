//! The odometry engine: ingest, sweep triggering, initialization and
//! output fan-out.
//!
//! Points are appended one batch at a time with their angular tick; a tick
//! decrease of more than 200 marks a revolution wrap, and after `n_window`
//! wraps a sweep trigger fires: features are extracted and, once the
//! tracker is initialized, the sweep optimizer refines the trajectory.
//! Outputs (trajectory file, correspondence dumps, publisher snapshot) are
//! produced only after a successful optimization.
//!
//! The engine is single-threaded from the caller's perspective: one ingest
//! thread owns all mutation. The solver and scoring pools parallelize
//! internally and join before returning; the publisher thread only ever
//! sees immutable snapshots.

use nalgebra::Vector3;

use crate::algorithms::features::FeatureExtractor;
use crate::algorithms::matching::CorrespondenceManager;
use crate::algorithms::trajectory::Trajectory;
use crate::core::types::{FeaturePoint, PointXyzir, Se3, Twist};
use crate::engine::optimizer::SweepOptimizer;
use crate::engine::OdometryConfig;
use crate::error::{OdometryError, Result};
use crate::io::{unix_nanos, CorrespondenceWriter, TrajectoryWriter};
use crate::sensors::{RangeSensorModel, RingBuffers};
use crate::threads::{OutputCallback, OutputPublisher, OutputSnapshot};

/// Tick drop that counts as a revolution wrap.
const WRAP_TICK_DROP: i64 = 200;

/// Continuous-time LiDAR odometry engine.
pub struct OdometryEngine {
    config: OdometryConfig,
    buffers: RingBuffers,
    extractor: FeatureExtractor,
    range_model: RangeSensorModel,
    trajectory: Trajectory,
    corr_manager: CorrespondenceManager,
    optimizer: SweepOptimizer,
    /// Current sweep's features: kind × ring × points.
    feature_points: Vec<Vec<Vec<FeaturePoint>>>,

    initialized: bool,
    full_revolution: bool,
    prv_tick: Option<u32>,
    wraps_in_batch: usize,
    prv_time: Option<u64>,
    cur_time: Option<u64>,

    publisher: Option<OutputPublisher>,
    trajectory_writer: Option<TrajectoryWriter>,
    correspondence_writer: Option<CorrespondenceWriter>,
}

impl OdometryEngine {
    pub fn new(config: OdometryConfig) -> Result<Self> {
        config.validate()?;

        let extractor = FeatureExtractor::new(config.features.clone(), config.n_ring)?;
        let kinds = config
            .features
            .features
            .iter()
            .map(|def| def.residual)
            .collect::<Vec<_>>();
        let n_kinds = kinds.len();
        let corr_manager = CorrespondenceManager::new(config.map.clone(), kinds);
        let trajectory = Trajectory::new(config.trajectory.clone())?;
        let optimizer = SweepOptimizer::new(config.solver.clone(), n_kinds)?;

        let trajectory_writer = if config.output_trajectory {
            Some(TrajectoryWriter::new()?)
        } else {
            None
        };
        let correspondence_writer = if config.output_correspondences {
            Some(CorrespondenceWriter::new())
        } else {
            None
        };

        Ok(Self {
            buffers: RingBuffers::with_capacity(config.n_ring, config.max_points),
            extractor,
            range_model: RangeSensorModel::new(config.sensor.clone()),
            trajectory,
            corr_manager,
            optimizer,
            feature_points: vec![vec![Vec::new(); config.n_ring]; n_kinds],
            initialized: false,
            full_revolution: false,
            prv_tick: None,
            wraps_in_batch: 0,
            prv_time: None,
            cur_time: None,
            publisher: None,
            trajectory_writer,
            correspondence_writer,
            config,
        })
    }

    /// Register the output callback and start the publisher thread.
    pub fn register_output_callback(&mut self, callback: OutputCallback) {
        self.publisher = Some(OutputPublisher::spawn(callback));
    }

    /// Current configuration.
    pub fn get_params(&self) -> &OdometryConfig {
        &self.config
    }

    /// Swap runtime-tunable parameters. Geometry and trajectory shape
    /// (`n_ring`, `max_points`, feature-kind list, knot count, timing) are
    /// fixed for the engine's lifetime; changing them needs a new engine.
    pub fn update_params(&mut self, config: OdometryConfig) -> Result<()> {
        config.validate()?;
        if config.n_ring != self.config.n_ring || config.max_points != self.config.max_points {
            return Err(OdometryError::Config(
                "n_ring / max_points are fixed at construction".into(),
            ));
        }
        if config.features.features.len() != self.config.features.features.len() {
            return Err(OdometryError::Config(
                "the feature-kind list is fixed at construction".into(),
            ));
        }
        let t_old = &self.config.trajectory;
        let t_new = &config.trajectory;
        if t_new.num_trajectory_states != t_old.num_trajectory_states
            || t_new.max_ticks != t_old.max_ticks
            || t_new.n_window != t_old.n_window
            || (t_new.scan_period - t_old.scan_period).abs() > f64::EPSILON
        {
            return Err(OdometryError::Config(
                "trajectory shape and timing are fixed at construction".into(),
            ));
        }

        self.extractor.set_config(config.features.clone())?;
        self.corr_manager.set_config(config.map.clone());
        self.optimizer.set_config(config.solver.clone());
        self.range_model = RangeSensorModel::new(config.sensor.clone());
        self.config = config;
        Ok(())
    }

    /// Whether the tracker has initialized against the local map.
    pub fn initialized(&self) -> bool {
        self.initialized
    }

    /// The continuous-time trajectory over the current window.
    pub fn trajectory(&self) -> &Trajectory {
        &self.trajectory
    }

    /// Total local-map entries across all feature kinds.
    pub fn local_map_entries(&self) -> usize {
        self.corr_manager.total_entries()
    }

    /// Append a batch of time-stamped points at one angular tick.
    ///
    /// A tick decrease beyond the wrap threshold marks a completed
    /// revolution; the `n_window`-th wrap triggers feature extraction and,
    /// when initialized, the sweep optimization.
    pub fn add_points(&mut self, points: &[PointXyzir], tick: u32, stamp: u64) -> Result<()> {
        if let Some(prv) = self.prv_tick {
            if (tick as i64) < prv as i64 - WRAP_TICK_DROP {
                self.wraps_in_batch += 1;
                if self.wraps_in_batch >= self.config.trajectory.n_window {
                    self.on_sweep_trigger(stamp)?;
                    self.wraps_in_batch = 0;
                }
            }
        }

        let max_ticks = self.config.trajectory.max_ticks;
        let tick_frac = (tick.min(max_ticks - 1)) as f32 / max_ticks as f32;
        let batch_tick = self.wraps_in_batch as u32 * max_ticks + tick.min(max_ticks - 1);
        for pt in points {
            self.buffers
                .push(pt.ring, pt.x, pt.y, pt.z, tick_frac, batch_tick, pt.intensity)?;
        }
        self.prv_tick = Some(tick);
        Ok(())
    }

    /// Sweep boundary: extract features, optimize, publish, roll over.
    fn on_sweep_trigger(&mut self, stamp: u64) -> Result<()> {
        let indices = self
            .extractor
            .get_features(self.buffers.scan(), self.buffers.signals())?;
        self.collect_feature_points(&indices);

        let mut optimized = false;
        if self.initialized {
            match self.optimizer.optimize(
                &mut self.trajectory,
                &mut self.corr_manager,
                &self.feature_points,
                &self.range_model,
            ) {
                Ok(_status) => optimized = true,
                Err(OdometryError::TrackingLost { .. }) => {
                    // The optimizer has reset the trajectory; drop the
                    // initialization and keep ingesting.
                    self.initialized = false;
                }
                Err(err @ OdometryError::PoolExhausted { .. }) => {
                    // Recoverable: this sweep's optimization is abandoned
                    // with the operating point unchanged.
                    log::error!("{}", err);
                }
                Err(other) => return Err(other),
            }
        }

        if optimized {
            self.emit_outputs()?;
        }

        self.rollover(stamp);
        self.buffers.clear();
        Ok(())
    }

    /// Materialize feature points from the admitted indices.
    fn collect_feature_points(&mut self, indices: &[Vec<Vec<u32>>]) {
        let scan = self.buffers.scan();
        for (f_idx, rings) in indices.iter().enumerate() {
            for (ring, admitted) in rings.iter().enumerate() {
                let out = &mut self.feature_points[f_idx][ring];
                out.clear();
                let ring_scan = &scan[ring];
                for &sample in admitted {
                    let sample = sample as usize;
                    out.push(FeaturePoint {
                        position: Vector3::new(
                            ring_scan.x[sample] as f64,
                            ring_scan.y[sample] as f64,
                            ring_scan.z[sample] as f64,
                        ),
                        tick: ring_scan.tick[sample],
                        ring: ring as u16,
                    });
                }
            }
        }
    }

    /// Trajectory file, correspondence dumps and publisher snapshot.
    fn emit_outputs(&mut self) -> Result<()> {
        if let Some(writer) = &mut self.trajectory_writer {
            writer.write_pose(self.trajectory.sweep_end_pose())?;
        }

        if let Some(writer) = &self.correspondence_writer {
            let stamp = unix_nanos();
            let inv_end = self.trajectory.sweep_end_pose().inverse();
            for f_idx in 0..self.corr_manager.n_kinds() {
                let rows: Vec<Vec<f64>> = self.optimizer.last_correspondences()[f_idx]
                    .iter()
                    .map(|corr| {
                        let raw = &corr.feature.position;
                        let undistorted = self
                            .trajectory
                            .transform_to_sweep_end(raw, corr.feature.tick);
                        let mut row = vec![raw.x, raw.y, raw.z];
                        row.extend_from_slice(&[undistorted.x, undistorted.y, undistorted.z]);
                        for &entry in &corr.map_entries {
                            let map_point = self.corr_manager.map(f_idx).position(entry);
                            let local = inv_end.transform(&map_point);
                            row.extend_from_slice(&[local.x, local.y, local.z]);
                        }
                        row
                    })
                    .collect();
                writer.write_sweep(stamp, f_idx, &rows)?;
            }
        }

        if let Some(publisher) = &self.publisher {
            publisher.publish(OutputSnapshot {
                undistorted_stamp: self.prv_time.unwrap_or(0),
                undistort_transform: self.trajectory.sweep_end_pose().clone(),
                undistort_velocity: *self.trajectory.sweep_end_twist(),
                undistorted_cloud: self.undistort_cloud(),
            });
        }
        Ok(())
    }

    /// Transform the accumulated cloud into the sweep-end sensor frame.
    fn undistort_cloud(&self) -> Vec<PointXyzir> {
        let mut cloud = Vec::new();
        let scan = self.buffers.scan();
        let signals = self.buffers.signals();
        for (ring, ring_scan) in scan.iter().enumerate() {
            for i in 0..ring_scan.len() {
                let raw = Vector3::new(
                    ring_scan.x[i] as f64,
                    ring_scan.y[i] as f64,
                    ring_scan.z[i] as f64,
                );
                let p = self
                    .trajectory
                    .transform_to_sweep_end(&raw, ring_scan.tick[i]);
                cloud.push(PointXyzir::new(
                    p.x as f32,
                    p.y as f32,
                    p.z as f32,
                    signals[ring].intensity[i],
                    ring as u16,
                ));
            }
        }
        cloud
    }

    /// End-of-sweep housekeeping: map maintenance, feature promotion,
    /// initialization bookkeeping and the trajectory's motion-extrapolation
    /// reset.
    fn rollover(&mut self, stamp: u64) {
        self.prv_time = self.cur_time;
        self.cur_time = Some(stamp);

        self.corr_manager.refresh_all();
        for f_idx in 0..self.corr_manager.n_kinds() {
            for ring in &self.feature_points[f_idx] {
                for feature in ring {
                    let (map_point, ..) = self
                        .trajectory
                        .transform_to_map(&feature.position, feature.tick);
                    self.corr_manager.promote(f_idx, &map_point);
                }
            }
            self.corr_manager.rebuild(f_idx);
        }

        if !self.initialized {
            // Never initialize against a partial first scan.
            if !self.full_revolution {
                self.full_revolution = true;
                return;
            }
            let entries = self.corr_manager.total_entries();
            if entries >= self.config.min_features {
                self.initialized = true;
                log::info!("Odometry initialized with {} local-map features", entries);
            }
        }

        self.trajectory.rollover();
    }

    /// Sweep-end pose in the map frame.
    pub fn sweep_end_pose(&self) -> &Se3 {
        self.trajectory.sweep_end_pose()
    }

    /// Body twist at sweep end.
    pub fn sweep_end_twist(&self) -> &Twist {
        self.trajectory.sweep_end_twist()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::OdometryConfig;

    fn small_config() -> OdometryConfig {
        let mut config = OdometryConfig::default();
        config.n_ring = 4;
        config.trajectory.max_ticks = 360;
        config.min_features = 10;
        config
    }

    /// One full revolution of floor returns across all rings.
    fn feed_revolution(engine: &mut OdometryEngine, stamp: u64) {
        let config = engine.get_params().clone();
        for tick in 0..config.trajectory.max_ticks {
            let angle = tick as f32 / config.trajectory.max_ticks as f32 * std::f32::consts::TAU;
            let points: Vec<PointXyzir> = (0..config.n_ring as u16)
                .map(|ring| {
                    // Floor at z = -1 seen under a per-ring depression angle.
                    let depression = 0.15 + ring as f32 * 0.1;
                    let horiz = 1.0 / depression.tan();
                    PointXyzir::new(horiz * angle.cos(), horiz * angle.sin(), -1.0, 20.0, ring)
                })
                .collect();
            engine.add_points(&points, tick, stamp).unwrap();
        }
    }

    #[test]
    fn test_wrap_detection_and_rollover() {
        let mut engine = OdometryEngine::new(small_config()).unwrap();
        feed_revolution(&mut engine, 1_000_000);
        // No wrap yet: no features promoted.
        assert_eq!(engine.local_map_entries(), 0);

        // Tick wrap: first trigger arms the full-revolution flag and
        // promotes whatever the first batch produced.
        feed_revolution(&mut engine, 1_100_000);
        assert!(!engine.initialized());
    }

    #[test]
    fn test_capacity_error_propagates() {
        let mut config = small_config();
        config.max_points = 8;
        let mut engine = OdometryEngine::new(config).unwrap();
        let points = vec![PointXyzir::new(1.0, 0.0, 0.0, 1.0, 0)];
        for tick in 0..8 {
            engine.add_points(&points, tick, 0).unwrap();
        }
        let err = engine.add_points(&points, 9, 0).unwrap_err();
        assert!(matches!(err, OdometryError::Capacity { .. }));
    }

    #[test]
    fn test_update_params_rejects_shape_changes() {
        let mut engine = OdometryEngine::new(small_config()).unwrap();
        let mut changed = small_config();
        changed.n_ring = 8;
        assert!(engine.update_params(changed).is_err());

        let mut changed = small_config();
        changed.trajectory.num_trajectory_states = 9;
        assert!(engine.update_params(changed).is_err());

        // Tunable sections swap fine.
        let mut changed = small_config();
        changed.map.ttl = 3;
        changed.solver.opt_iters = 4;
        engine.update_params(changed).unwrap();
        assert_eq!(engine.get_params().map.ttl, 3);
    }
}
