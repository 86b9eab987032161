//! Trajectory and correspondence file dumps.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use crate::core::types::Se3;
use crate::error::Result;

/// Nanoseconds since the Unix epoch; prefixes every dump filename.
pub fn unix_nanos() -> u128 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or(0)
}

/// Appends one line per sweep to `<unix_nanos>laser_odom_traj.txt`: the 12
/// pose-storage floats in full precision, comma-separated.
pub struct TrajectoryWriter {
    file: BufWriter<File>,
    path: PathBuf,
}

impl TrajectoryWriter {
    /// Open a fresh trajectory file in the current directory.
    pub fn new() -> Result<Self> {
        Self::in_dir(Path::new("."))
    }

    /// Open a fresh trajectory file in `dir`.
    pub fn in_dir(dir: &Path) -> Result<Self> {
        let path = dir.join(format!("{}laser_odom_traj.txt", unix_nanos()));
        let file = BufWriter::new(File::create(&path)?);
        Ok(Self { file, path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append the sweep-end pose.
    pub fn write_pose(&mut self, pose: &Se3) -> Result<()> {
        let storage = pose.storage();
        let line = storage
            .iter()
            .map(|v| v.to_string())
            .collect::<Vec<_>>()
            .join(", ");
        writeln!(self.file, "{}", line)?;
        self.file.flush()?;
        Ok(())
    }
}

/// Writes one file per feature kind per sweep: whitespace-separated rows,
/// one undistorted query point followed by its matched map points.
pub struct CorrespondenceWriter {
    dir: PathBuf,
}

impl CorrespondenceWriter {
    pub fn new() -> Self {
        Self::in_dir(Path::new("."))
    }

    pub fn in_dir(dir: &Path) -> Self {
        Self {
            dir: dir.to_path_buf(),
        }
    }

    /// Dump one feature kind's correspondences for one sweep. Each row is a
    /// flat run of 3-D coordinates.
    pub fn write_sweep(&self, stamp: u128, feature_idx: usize, rows: &[Vec<f64>]) -> Result<PathBuf> {
        let path = self
            .dir
            .join(format!("{}feature_{}_cor.txt", stamp, feature_idx));
        let mut file = BufWriter::new(File::create(&path)?);
        for row in rows {
            let line = row
                .iter()
                .map(|v| v.to_string())
                .collect::<Vec<_>>()
                .join(" ");
            writeln!(file, "{}", line)?;
        }
        file.flush()?;
        Ok(path)
    }
}

impl Default for CorrespondenceWriter {
    fn default() -> Self {
        Self::new()
    }
}
