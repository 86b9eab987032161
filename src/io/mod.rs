//! File output: trajectory and correspondence dumps.

mod trajectory_writer;

pub use trajectory_writer::{unix_nanos, CorrespondenceWriter, TrajectoryWriter};
