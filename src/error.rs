//! Error types for the odometry engine.

use thiserror::Error;

/// Engine error type.
#[derive(Error, Debug)]
pub enum OdometryError {
    /// Invalid or inconsistent configuration. Fatal at the boundary.
    #[error("Configuration error: {0}")]
    Config(String),

    /// A fixed-size buffer overflowed during ingest. Fatal: the engine must
    /// be rebuilt with a larger capacity.
    #[error("Ring {ring} exceeded the per-ring point capacity of {max}")]
    Capacity { ring: u16, max: usize },

    /// A pre-allocated residual pool ran out of slots. The current sweep's
    /// optimization is abandoned; engine state is unchanged.
    #[error("Pre-allocated {kind} memory pool is too small ({capacity} slots)")]
    PoolExhausted { kind: &'static str, capacity: usize },

    /// Too few residuals to constrain the trajectory. The trajectory has
    /// been reset and the tracker marked uninitialized.
    #[error("Tracking lost: {residuals} residuals, threshold is {min}")]
    TrackingLost { residuals: usize, min: usize },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, OdometryError>;
