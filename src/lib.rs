//! GatiOdom - Continuous-time LiDAR odometry
//!
//! Consumes a stream of time-stamped 3-D points from a multi-ring rotating
//! range sensor and produces, per completed sweep, an estimated trajectory:
//! a sequence of rigid-body poses and body-frame twists expressed in an
//! accumulated map frame. Downstream consumers receive the sweep-end pose,
//! twist and an undistorted point cloud through a lossy background publisher.
//!
//! # Architecture
//!
//! The crate is organized into 5 logical layers:
//!
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │              threads/ + io/                         │  ← Output boundary
//! │     (publisher thread, trajectory dumps)            │
//! └─────────────────────────────────────────────────────┘
//!                          │
//! ┌─────────────────────────────────────────────────────┐
//! │                    engine/                          │  ← Orchestration
//! │      (odometry engine, sweep optimizer, config)     │
//! └─────────────────────────────────────────────────────┘
//!                          │
//! ┌─────────────────────────────────────────────────────┐
//! │                  algorithms/                        │  ← Core algorithms
//! │      (features, trajectory, matching)               │
//! └─────────────────────────────────────────────────────┘
//!                          │
//! ┌─────────────────────────────────────────────────────┐
//! │                   sensors/                          │  ← Sensor processing
//! │       (range noise model, scan buffers)             │
//! └─────────────────────────────────────────────────────┘
//!                          │
//! ┌─────────────────────────────────────────────────────┐
//! │                     core/                           │  ← Foundation
//! │                (types, Lie math)                    │
//! └─────────────────────────────────────────────────────┘
//! ```
//!
//! # Pipeline
//!
//! 1. [`engine::OdometryEngine::add_points`] accumulates raw points into
//!    per-ring dense buffers and detects revolution wraps.
//! 2. On a sweep trigger, the [`algorithms::features`] extractor masks
//!    invalid geometry, scores each ring under convolutional and statistical
//!    kernels, and bins the survivors into bounded edge/planar feature sets.
//! 3. The [`algorithms::trajectory`] model interpolates the continuous-time
//!    trajectory between pose+twist knots under a constant-velocity
//!    Gaussian-process prior.
//! 4. The [`algorithms::matching`] layer maintains a per-feature local map
//!    with a k-d tree, finds gated correspondences and forms point-to-line /
//!    point-to-plane residuals in the knot tangent space.
//! 5. The [`engine::SweepOptimizer`] iterates linearization, a robustified
//!    dense least-squares solve, the operating-point update and an optional
//!    eigenspace solution remapping that suppresses degenerate directions.

pub mod core;
pub mod sensors;

pub mod algorithms;

pub mod engine;

pub mod io;
pub mod threads;

mod error;

pub use error::{OdometryError, Result};

// Core types
pub use crate::core::types::{FeaturePoint, PointXyzir, Se3, TrajectoryKnot, Twist};

// Sensors
pub use sensors::{RangeModelConfig, RangeSensorModel, RingBuffers};

// Algorithms - Features
pub use algorithms::features::{
    Criterion, FeatureDefinition, FeatureExtractor, FeatureExtractorConfig, ScoreKernel,
    SelectionPolicy, Signal,
};

// Algorithms - Trajectory
pub use algorithms::trajectory::{GpSegment, Trajectory, TrajectoryConfig};

// Algorithms - Matching
pub use algorithms::matching::{
    AssociationStatus, BisquareLoss, CorrespondenceManager, LocalMapConfig, ResidualKind,
};

// Engine
pub use engine::{
    MatchStatus, OdometryConfig, OdometryEngine, OptimizerConfig, SweepOptimizer,
};

// Output
pub use threads::{OutputCallback, OutputPublisher, OutputSnapshot};
