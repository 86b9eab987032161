//! Per-ring dense scan buffers.
//!
//! Each elevation ring accumulates accepted samples into two
//! struct-of-arrays blocks: geometric rows `{x, y, z, tick_frac, azimuth}`
//! and signal rows `{range, intensity}`. Storage is allocated once at
//! construction and reused every sweep; overflow is a capacity error rather
//! than a reallocation.

use crate::error::{OdometryError, Result};

/// Default per-ring sample capacity.
pub const MAX_POINTS: usize = 2200;

/// Geometric columns for one ring.
#[derive(Debug, Clone, Default)]
pub struct RingScan {
    pub x: Vec<f32>,
    pub y: Vec<f32>,
    pub z: Vec<f32>,
    /// Revolution-relative tick fraction in `[0, 1)`; keys the angular
    /// bins of bucketed selection.
    pub tick_frac: Vec<f32>,
    /// Azimuth `atan2(y, x)` in radians. The occlusion exclusions in the
    /// feature extractor depend on this column being populated.
    pub azimuth: Vec<f32>,
    /// Batch-relative tick: revolution wraps within one optimization
    /// window accumulate so interpolation times stay monotone.
    pub tick: Vec<u32>,
}

impl RingScan {
    fn with_capacity(cap: usize) -> Self {
        Self {
            x: Vec::with_capacity(cap),
            y: Vec::with_capacity(cap),
            z: Vec::with_capacity(cap),
            tick_frac: Vec::with_capacity(cap),
            azimuth: Vec::with_capacity(cap),
            tick: Vec::with_capacity(cap),
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.x.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.x.is_empty()
    }

    fn clear(&mut self) {
        self.x.clear();
        self.y.clear();
        self.z.clear();
        self.tick_frac.clear();
        self.azimuth.clear();
        self.tick.clear();
    }
}

/// Signal columns for one ring.
#[derive(Debug, Clone, Default)]
pub struct RingSignals {
    pub range: Vec<f32>,
    pub intensity: Vec<f32>,
}

impl RingSignals {
    fn with_capacity(cap: usize) -> Self {
        Self {
            range: Vec::with_capacity(cap),
            intensity: Vec::with_capacity(cap),
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.range.len()
    }

    fn clear(&mut self) {
        self.range.clear();
        self.intensity.clear();
    }
}

/// All per-ring buffers for one sweep batch.
#[derive(Debug, Clone)]
pub struct RingBuffers {
    scan: Vec<RingScan>,
    signals: Vec<RingSignals>,
    max_points: usize,
}

impl RingBuffers {
    /// Allocate buffers for `n_ring` rings with the default capacity.
    pub fn new(n_ring: usize) -> Self {
        Self::with_capacity(n_ring, MAX_POINTS)
    }

    /// Allocate buffers for `n_ring` rings with `max_points` samples each.
    pub fn with_capacity(n_ring: usize, max_points: usize) -> Self {
        Self {
            scan: (0..n_ring).map(|_| RingScan::with_capacity(max_points)).collect(),
            signals: (0..n_ring)
                .map(|_| RingSignals::with_capacity(max_points))
                .collect(),
            max_points,
        }
    }

    #[inline]
    pub fn n_ring(&self) -> usize {
        self.scan.len()
    }

    #[inline]
    pub fn scan(&self) -> &[RingScan] {
        &self.scan
    }

    #[inline]
    pub fn signals(&self) -> &[RingSignals] {
        &self.signals
    }

    /// Sample count on one ring.
    #[inline]
    pub fn count(&self, ring: usize) -> usize {
        self.scan[ring].len()
    }

    /// Append one sample to its ring. `tick_frac` is the revolution-
    /// relative angular fraction, `tick` the batch-relative tick. Range and
    /// azimuth rows are derived here so every consumer sees consistent
    /// columns.
    pub fn push(
        &mut self,
        ring: u16,
        x: f32,
        y: f32,
        z: f32,
        tick_frac: f32,
        tick: u32,
        intensity: f32,
    ) -> Result<()> {
        let idx = ring as usize;
        if idx >= self.scan.len() {
            return Err(OdometryError::Config(format!(
                "Point on ring {} but only {} rings configured",
                ring,
                self.scan.len()
            )));
        }
        if self.scan[idx].len() >= self.max_points {
            return Err(OdometryError::Capacity {
                ring,
                max: self.max_points,
            });
        }

        let scan = &mut self.scan[idx];
        scan.x.push(x);
        scan.y.push(y);
        scan.z.push(z);
        scan.tick_frac.push(tick_frac);
        scan.azimuth.push(y.atan2(x));
        scan.tick.push(tick);

        let signals = &mut self.signals[idx];
        signals.range.push((x * x + y * y + z * z).sqrt());
        signals.intensity.push(intensity);
        Ok(())
    }

    /// Reset every ring for the next batch. Capacity is retained.
    pub fn clear(&mut self) {
        for ring in &mut self.scan {
            ring.clear();
        }
        for ring in &mut self.signals {
            ring.clear();
        }
    }
}
