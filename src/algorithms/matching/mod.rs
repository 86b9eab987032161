//! Correspondence matching: per-feature local maps, neighbor retrieval with
//! geometric gating, and the point-to-line / point-to-plane residuals the
//! optimizer assembles.

mod local_map;
mod residuals;
mod robust;

pub use local_map::{CorrespondenceManager, LocalMap, LocalMapConfig};
pub use residuals::{InterpRecord, PointToLineGp, PointToPlaneGp, RecordPool};
pub use robust::BisquareLoss;

use serde::{Deserialize, Serialize};

/// Residual geometry a feature kind participates in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResidualKind {
    /// Two map neighbors define a line; the residual is the perpendicular
    /// offset in the line's normal plane.
    PointToLine,
    /// Three map neighbors define a plane; the residual is the signed
    /// distance along the plane normal.
    PointToPlane,
}

impl ResidualKind {
    /// Neighbors required to anchor the residual geometry.
    #[inline]
    pub fn neighbors_required(&self) -> usize {
        match self {
            ResidualKind::PointToLine => 2,
            ResidualKind::PointToPlane => 3,
        }
    }
}

/// Lifecycle state of a local-map entry within one sweep.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssociationStatus {
    /// Not used by any correspondence this sweep.
    Uncorresponded,
    /// Participated in at least one admitted correspondence; TTL refreshes
    /// on the next map maintenance pass.
    Corresponded,
}
