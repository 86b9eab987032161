//! Shared types: rigid transforms, raw points, features, trajectory knots.

mod point;
mod se3;

pub use point::{FeaturePoint, PointXyzir};
pub use se3::{Se3, Twist};

use nalgebra::Vector6;

/// One discrete sample of the continuous-time trajectory.
#[derive(Debug, Clone)]
pub struct TrajectoryKnot {
    /// Map-frame pose of the sensor at the knot time.
    pub pose: Se3,
    /// Body-frame twist `(ω, v)` at the knot time.
    pub twist: Twist,
}

impl TrajectoryKnot {
    /// Identity pose with zero twist.
    pub fn identity() -> Self {
        Self {
            pose: Se3::identity(),
            twist: Vector6::zeros(),
        }
    }
}

impl Default for TrajectoryKnot {
    fn default() -> Self {
        Self::identity()
    }
}
