//! Per-feature local maps with spatial indices.
//!
//! Each feature kind owns a set of map-frame points with a time-to-live and
//! an association status, plus a k-d tree rebuilt in bulk once per sweep.
//! Maintenance evicts entries that leave the configured range or whose TTL
//! expires; participation in a correspondence refreshes the TTL.

use kiddo::{KdTree, SquaredEuclidean};
use nalgebra::Vector3;
use serde::{Deserialize, Serialize};

use super::{AssociationStatus, ResidualKind};

fn default_ttl() -> i32 {
    10
}

fn default_local_map_range() -> f64 {
    50.0
}

fn default_max_correspondence_dist() -> f64 {
    0.75
}

fn default_azimuth_tol() -> f64 {
    0.01
}

fn default_max_extrapolation() -> f64 {
    0.3
}

fn default_no_extrapolation() -> bool {
    true
}

fn default_edge_map_density() -> f64 {
    0.01
}

fn default_flat_map_density() -> f64 {
    0.25
}

/// Local-map and correspondence-gating configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocalMapConfig {
    /// Sweeps an entry survives without participating in a correspondence.
    #[serde(default = "default_ttl")]
    pub ttl: i32,
    /// Entries farther than this from the map origin are evicted, meters.
    #[serde(default = "default_local_map_range")]
    pub local_map_range: f64,
    /// Radius of the neighbor search, meters.
    #[serde(default = "default_max_correspondence_dist")]
    pub max_correspondence_dist: f64,
    /// Elevation bin width for the cross-scan-line admission rule, radians.
    #[serde(default = "default_azimuth_tol")]
    pub azimuth_tol: f64,
    /// Tolerance on the point-to-line projection parameter outside `[0, 1]`.
    #[serde(default = "default_max_extrapolation")]
    pub max_extrapolation: f64,
    /// Whether the extrapolation gate is applied at all.
    #[serde(default = "default_no_extrapolation")]
    pub no_extrapolation: bool,
    /// Squared insertion gate for line-tracked kinds, m².
    #[serde(default = "default_edge_map_density")]
    pub edge_map_density: f64,
    /// Squared insertion gate for plane-tracked kinds, m².
    #[serde(default = "default_flat_map_density")]
    pub flat_map_density: f64,
}

impl Default for LocalMapConfig {
    fn default() -> Self {
        Self {
            ttl: 10,
            local_map_range: 50.0,
            max_correspondence_dist: 0.75,
            azimuth_tol: 0.01,
            max_extrapolation: 0.3,
            no_extrapolation: true,
            edge_map_density: 0.01,
            flat_map_density: 0.25,
        }
    }
}

/// One feature kind's map: entry arrays plus the spatial index.
pub struct LocalMap {
    positions: Vec<[f64; 3]>,
    ttl: Vec<i32>,
    status: Vec<AssociationStatus>,
    tree: KdTree<f64, 3>,
    /// Entries covered by the current tree; promotions between rebuilds
    /// are not yet queryable.
    indexed: usize,
}

impl LocalMap {
    fn new() -> Self {
        Self {
            positions: Vec::new(),
            ttl: Vec::new(),
            status: Vec::new(),
            tree: KdTree::new(),
            indexed: 0,
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.positions.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    /// Map-frame position of an entry.
    #[inline]
    pub fn position(&self, idx: usize) -> Vector3<f64> {
        Vector3::from_column_slice(&self.positions[idx])
    }

    #[inline]
    pub fn ttl_of(&self, idx: usize) -> i32 {
        self.ttl[idx]
    }

    #[inline]
    pub fn status_of(&self, idx: usize) -> AssociationStatus {
        self.status[idx]
    }

    fn swap_remove(&mut self, idx: usize) {
        self.positions.swap_remove(idx);
        self.ttl.swap_remove(idx);
        self.status.swap_remove(idx);
    }

    /// Sweep maintenance: prune out-of-range entries, refresh corresponded
    /// entries to full TTL, decrement every survivor once and evict expired
    /// entries in the same pass. The tree is rebuilt afterwards, so every
    /// observable entry satisfies `0 < ttl <= TTL` and
    /// `|position| <= local_map_range`.
    fn refresh(&mut self, config: &LocalMapConfig) {
        let range_sq = config.local_map_range * config.local_map_range;
        let mut idx = 0;
        while idx < self.positions.len() {
            let p = &self.positions[idx];
            let dist_sq = p[0] * p[0] + p[1] * p[1] + p[2] * p[2];
            if dist_sq <= range_sq {
                if self.status[idx] == AssociationStatus::Corresponded {
                    self.status[idx] = AssociationStatus::Uncorresponded;
                    self.ttl[idx] = config.ttl;
                }
                self.ttl[idx] -= 1;
                if self.ttl[idx] > 0 {
                    idx += 1;
                    continue;
                }
            }
            // Out of range or expired: swap-remove and revisit this slot.
            self.swap_remove(idx);
        }
        self.rebuild();
    }

    /// Rebuild the spatial index from the entry array.
    fn rebuild(&mut self) {
        self.tree = KdTree::new();
        for (idx, p) in self.positions.iter().enumerate() {
            self.tree.add(p, idx as u64);
        }
        self.indexed = self.positions.len();
    }

    /// Insert a map-frame point when the existing map is sparser than the
    /// density gate around it. The gate queries the last-built index, so a
    /// promotion batch is checked against the pre-existing map.
    fn promote(&mut self, point: &Vector3<f64>, density_sq: f64, full_ttl: i32) -> bool {
        if self.indexed > 0 {
            let nearest = self
                .tree
                .nearest_one::<SquaredEuclidean>(&[point.x, point.y, point.z]);
            if nearest.distance <= density_sq {
                return false;
            }
        }
        self.positions.push([point.x, point.y, point.z]);
        self.ttl.push(full_ttl);
        self.status.push(AssociationStatus::Uncorresponded);
        true
    }
}

/// All per-feature-kind local maps plus the gating logic.
pub struct CorrespondenceManager {
    config: LocalMapConfig,
    maps: Vec<LocalMap>,
    kinds: Vec<ResidualKind>,
}

impl CorrespondenceManager {
    pub fn new(config: LocalMapConfig, kinds: Vec<ResidualKind>) -> Self {
        let maps = kinds.iter().map(|_| LocalMap::new()).collect();
        Self {
            config,
            maps,
            kinds,
        }
    }

    #[inline]
    pub fn config(&self) -> &LocalMapConfig {
        &self.config
    }

    pub fn set_config(&mut self, config: LocalMapConfig) {
        self.config = config;
    }

    #[inline]
    pub fn n_kinds(&self) -> usize {
        self.maps.len()
    }

    #[inline]
    pub fn kind(&self, f_idx: usize) -> ResidualKind {
        self.kinds[f_idx]
    }

    #[inline]
    pub fn map(&self, f_idx: usize) -> &LocalMap {
        &self.maps[f_idx]
    }

    /// Total entries across all kinds; drives tracker initialization.
    pub fn total_entries(&self) -> usize {
        self.maps.iter().map(|m| m.len()).sum()
    }

    /// Run sweep maintenance on every kind's map.
    pub fn refresh_all(&mut self) {
        for map in &mut self.maps {
            map.refresh(&self.config);
        }
    }

    /// Promote a map-frame feature point into its kind's map, gated by the
    /// kind's density. The tree is left stale until [`Self::rebuild`] so a
    /// batch of promotions is gated against the pre-existing map.
    pub fn promote(&mut self, f_idx: usize, point: &Vector3<f64>) -> bool {
        let density_sq = match self.kinds[f_idx] {
            ResidualKind::PointToLine => self.config.edge_map_density,
            ResidualKind::PointToPlane => self.config.flat_map_density,
        };
        self.maps[f_idx].promote(point, density_sq, self.config.ttl)
    }

    /// Rebuild one kind's index after a promotion batch.
    pub fn rebuild(&mut self, f_idx: usize) {
        self.maps[f_idx].rebuild();
    }

    /// Flag an entry as used by an admitted correspondence.
    pub fn mark_corresponded(&mut self, f_idx: usize, entry: usize) {
        self.maps[f_idx].status[entry] = AssociationStatus::Corresponded;
    }

    /// Retrieve gated neighbors for a map-frame query.
    ///
    /// Radius search, distance-sorted; the first neighbor is admitted
    /// unconditionally, and the set must span at least two elevation bins
    /// (width `azimuth_tol`, centered on the first neighbor) before it can
    /// complete, which keeps correspondences off a single scan line.
    pub fn find_corresponding(&self, f_idx: usize, query: &Vector3<f64>) -> Option<Vec<usize>> {
        let knn = self.kinds[f_idx].neighbors_required();
        let map = &self.maps[f_idx];
        if map.indexed < knn {
            return None;
        }

        let radius_sq = self.config.max_correspondence_dist * self.config.max_correspondence_dist;
        let mut neighbors = map
            .tree
            .within_unsorted::<SquaredEuclidean>(&[query.x, query.y, query.z], radius_sq);
        if neighbors.len() < knn {
            return None;
        }
        neighbors.sort_by(|a, b| a.distance.partial_cmp(&b.distance).unwrap());

        let mut picked = Vec::with_capacity(knn);
        let mut reference_elevation = 0.0;
        let mut spans_two_bins = false;
        for neighbor in &neighbors {
            let p = map.position(neighbor.item as usize);
            let elevation = p.z.atan2((p.x * p.x + p.y * p.y).sqrt());
            if picked.is_empty() {
                reference_elevation = elevation;
            } else {
                let bin = ((elevation - reference_elevation) / self.config.azimuth_tol).round();
                if bin != 0.0 {
                    spans_two_bins = true;
                }
            }
            // The final slot is reserved until a second bin has been seen.
            if picked.len() + 1 != knn || spans_two_bins {
                picked.push(neighbor.item as usize);
            }
            if picked.len() == knn {
                return Some(picked);
            }
        }
        None
    }

    /// Extrapolation gate for point-to-line correspondences: reject when
    /// the query's projection parameter onto the neighbor segment lies far
    /// outside `[0, 1]`. Point-to-plane is never rejected here.
    pub fn out_of_bounds(&self, f_idx: usize, query: &Vector3<f64>, index: &[usize]) -> bool {
        if self.kinds[f_idx] == ResidualKind::PointToPlane {
            return false;
        }
        let a = self.maps[f_idx].position(index[0]);
        let b = self.maps[f_idx].position(index[1]);
        let ab = b - a;
        let eta = (query - a).dot(&ab) / ab.dot(&ab);
        eta < -self.config.max_extrapolation || eta > 1.0 + self.config.max_extrapolation
    }
}
