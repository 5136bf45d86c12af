//! Raster signatures.
//!
//! A track is turned into a sparse map from grid cell to accumulated weight. Every
//! sample contributes to the cell it falls in and to every cell within
//! `manhattan_distance_max` grid steps, with a weight that decays with the step
//! distance. A per-cell cooldown keeps a slow or stationary stretch from being counted
//! once per sample:
//!
//! - no contribution within the last `cooldown_interval` samples: a fresh contribution
//!   is added
//! - a stronger contribution inside the window replaces the weaker one
//! - anything else inside the window is ignored
//!
//! The directional variant keeps a list of visits per cell instead of a single sum.
//! Each visit records the strongest weight seen during one dwell and the circular mean
//! of the directions of travel recorded at that weight.

use std::collections::{BTreeSet, HashMap};

use log::error;
use serde::Serialize;

use crate::config::SimilarityConfig;
use crate::error::TrackSimError;
use crate::geo_utils;
use crate::Track;

// ============================================================================
// Grid
// ============================================================================

/// One cell of the latitude/longitude grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct GridCell {
    pub lat_bin: i64,
    pub long_bin: i64,
}

impl GridCell {
    pub fn new(lat_bin: i64, long_bin: i64) -> Self {
        Self { lat_bin, long_bin }
    }

    /// Cell containing a position, by floor division with the per-axis cell sizes.
    pub fn from_position(latitude: f64, longitude: f64, lat_cell_size: f64, long_cell_size: f64) -> Self {
        Self {
            lat_bin: (latitude / lat_cell_size).floor() as i64,
            long_bin: (longitude / long_cell_size).floor() as i64,
        }
    }

    pub fn offset(&self, d_lat: i64, d_long: i64) -> Self {
        Self {
            lat_bin: self.lat_bin + d_lat,
            long_bin: self.long_bin + d_long,
        }
    }

    /// Grid steps between two cells, `|Δlat_bin| + |Δlong_bin|`.
    pub fn manhattan_distance(&self, other: &GridCell) -> u64 {
        self.lat_bin.abs_diff(other.lat_bin) + self.long_bin.abs_diff(other.long_bin)
    }
}

/// Offsets at exactly `distance` grid steps (a diamond ring), deduplicated and sorted.
pub fn diamond_offsets(distance: u32) -> Vec<(i64, i64)> {
    let n = distance as i64;
    let mut ring = BTreeSet::new();
    for i in 0..=n {
        for c1 in [1, -1] {
            for c2 in [1, -1] {
                ring.insert((c1 * (n - i), c2 * i));
            }
        }
    }
    ring.into_iter().collect()
}

// ============================================================================
// Plain raster
// ============================================================================

/// Accumulated state of one cell in a plain raster.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct RasterEntry {
    /// Sum of counted contributions
    pub sum_weight: f64,
    /// Sample index of the most recent counted contribution
    pub last_update: usize,
    /// Weight of the most recent counted contribution
    pub last_weight: f64,
}

/// What a contribution did to a cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Contribution {
    Fresh,
    Superseded,
    Ignored,
}

impl RasterEntry {
    /// Entry holding a single first contribution.
    pub fn new(pk: usize, weight: f64) -> Self {
        Self {
            sum_weight: weight,
            last_update: pk,
            last_weight: weight,
        }
    }

    /// Apply a contribution of `weight` at sample `pk`.
    pub fn contribute(&mut self, pk: usize, weight: f64, cooldown: usize) -> Contribution {
        if pk > self.last_update.saturating_add(cooldown) {
            self.last_update = pk;
            self.sum_weight += weight;
            self.last_weight = weight;
            Contribution::Fresh
        } else if weight > self.last_weight {
            self.sum_weight += weight - self.last_weight;
            self.last_update = pk;
            self.last_weight = weight;
            Contribution::Superseded
        } else {
            Contribution::Ignored
        }
    }
}

/// Plain raster signature of one track.
#[derive(Debug, Clone, Default)]
pub struct RasterSignature {
    pub cells: HashMap<GridCell, RasterEntry>,
    /// Sum of squared cell weights
    pub norm: f64,
}

impl RasterSignature {
    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    pub fn get(&self, cell: &GridCell) -> Option<&RasterEntry> {
        self.cells.get(cell)
    }

    pub fn sum_weight(&self, cell: &GridCell) -> f64 {
        self.cells.get(cell).map_or(0.0, |e| e.sum_weight)
    }

    fn compute_norm(&mut self) {
        self.norm = self.cells.values().map(|e| e.sum_weight * e.sum_weight).sum();
    }

    /// Diagnostic rows, one per cell, sorted by cell.
    pub fn rows(&self, filename: &str) -> Vec<RasterRow> {
        let mut rows: Vec<RasterRow> = self
            .cells
            .iter()
            .map(|(cell, entry)| RasterRow {
                filename: filename.to_string(),
                lat_bin: cell.lat_bin,
                long_bin: cell.long_bin,
                sum_weight: entry.sum_weight,
                last_update: entry.last_update,
                last_weight: entry.last_weight,
            })
            .collect();
        rows.sort_by_key(|r| (r.lat_bin, r.long_bin));
        rows
    }
}

/// One row of the per-member rasterization table.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RasterRow {
    pub filename: String,
    pub lat_bin: i64,
    pub long_bin: i64,
    pub sum_weight: f64,
    pub last_update: usize,
    pub last_weight: f64,
}

// ============================================================================
// Directional raster
// ============================================================================

/// One completed dwell of a track near a cell.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Visit {
    pub weight: f64,
    /// Circular mean of the directions recorded at `weight` (radians)
    pub angle: f64,
}

/// State of one cell in a directional raster.
#[derive(Debug, Clone, PartialEq)]
pub struct DirectionalEntry {
    /// Completed visits in order
    pub history: Vec<Visit>,
    last_angles: Vec<f64>,
    last_weight: f64,
    last_update: usize,
    wrapped_up: bool,
}

impl Default for DirectionalEntry {
    fn default() -> Self {
        Self {
            history: Vec::new(),
            last_angles: Vec::new(),
            last_weight: 0.0,
            last_update: 0,
            wrapped_up: true,
        }
    }
}

impl DirectionalEntry {
    /// Whether no visit is currently open.
    pub fn is_wrapped_up(&self) -> bool {
        self.wrapped_up
    }

    pub fn weight_history(&self) -> Vec<f64> {
        self.history.iter().map(|v| v.weight).collect()
    }

    pub fn angle_history(&self) -> Vec<f64> {
        self.history.iter().map(|v| v.angle).collect()
    }

    fn open(&mut self, pk: usize, weight: f64, angle: f64) {
        self.last_update = pk;
        self.last_weight = weight;
        self.last_angles.clear();
        self.last_angles.push(angle);
        self.wrapped_up = false;
    }

    fn close(&mut self) {
        self.history.push(Visit {
            weight: self.last_weight,
            angle: geo_utils::circular_mean(&self.last_angles),
        });
        self.last_angles.clear();
        self.wrapped_up = true;
    }

    /// Apply a contribution of `weight` travelling at `angle` at sample `pk`.
    pub fn contribute(&mut self, pk: usize, weight: f64, angle: f64, cooldown: usize) {
        let in_window = pk < self.last_update.saturating_add(cooldown);
        if self.wrapped_up {
            self.open(pk, weight, angle);
        } else if weight > self.last_weight && in_window {
            // the closer pass sets the visit's direction
            self.open(pk, weight, angle);
        } else if weight < self.last_weight {
            // weaker passes never restart or pollute an open visit
        } else if weight == self.last_weight && in_window {
            self.last_angles.push(angle);
        } else {
            self.close();
            self.open(pk, weight, angle);
        }
    }

    /// Close the open visit, if any. Returns `false` if the cell was already closed.
    pub fn finalize(&mut self) -> bool {
        if self.wrapped_up {
            return false;
        }
        self.close();
        true
    }
}

/// Directional raster signature of one track.
#[derive(Debug, Clone, Default)]
pub struct DirectionalSignature {
    pub cells: HashMap<GridCell, DirectionalEntry>,
    /// Sum of squared visit weights across all cells
    pub norm: f64,
}

impl DirectionalSignature {
    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    pub fn get(&self, cell: &GridCell) -> Option<&DirectionalEntry> {
        self.cells.get(cell)
    }

    /// Close every open visit. Cells found already closed are logged and skipped.
    ///
    /// Returns the number of such cells.
    fn finalize(&mut self) -> usize {
        let mut anomalies = 0;
        for (cell, entry) in self.cells.iter_mut() {
            if !entry.finalize() {
                anomalies += 1;
                let err = TrackSimError::CellAlreadyClosed {
                    lat_bin: cell.lat_bin,
                    long_bin: cell.long_bin,
                };
                error!("{}: {:?}", err, entry);
            }
        }
        self.norm = self
            .cells
            .values()
            .flat_map(|e| e.history.iter())
            .map(|v| v.weight * v.weight)
            .sum();
        anomalies
    }

    /// Diagnostic rows, one per visit, sorted by cell then visit order.
    pub fn rows(&self, filename: &str) -> Vec<DirectionalRow> {
        let mut cells: Vec<(&GridCell, &DirectionalEntry)> = self.cells.iter().collect();
        cells.sort_by_key(|(cell, _)| **cell);
        cells
            .into_iter()
            .flat_map(|(cell, entry)| {
                entry.history.iter().enumerate().map(move |(visit, v)| DirectionalRow {
                    filename: filename.to_string(),
                    lat_bin: cell.lat_bin,
                    long_bin: cell.long_bin,
                    visit,
                    weight: v.weight,
                    angle: v.angle,
                })
            })
            .collect()
    }
}

/// One row of the per-member directional rasterization table.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DirectionalRow {
    pub filename: String,
    pub lat_bin: i64,
    pub long_bin: i64,
    pub visit: usize,
    pub weight: f64,
    pub angle: f64,
}

// ============================================================================
// Rasterizer
// ============================================================================

/// Converts tracks into raster signatures.
#[derive(Debug, Clone)]
pub struct Rasterizer {
    lat_cell_size: f64,
    cooldown: usize,
    angle_lag: usize,
    /// Decay weight and ring offsets per Manhattan distance, zero-weight rings dropped
    rings: Vec<(f64, Vec<(i64, i64)>)>,
}

impl Rasterizer {
    /// Build a rasterizer from a validated configuration.
    pub fn new(config: &SimilarityConfig) -> Self {
        let rings = config
            .decay_weights()
            .into_iter()
            .enumerate()
            .filter(|(_, weight)| *weight > 0.0)
            .map(|(d, weight)| (weight, diamond_offsets(d as u32)))
            .collect();
        Self {
            lat_cell_size: config.lat_cell_size(),
            cooldown: config.cooldown_interval,
            angle_lag: config.angle_lag,
            rings,
        }
    }

    pub fn lat_cell_size(&self) -> f64 {
        self.lat_cell_size
    }

    /// Cell of every sample, indexed by sample position.
    pub fn sample_cells(&self, track: &Track, long_cell_size: f64) -> Vec<GridCell> {
        track
            .points
            .iter()
            .map(|p| GridCell::from_position(p.latitude, p.longitude, self.lat_cell_size, long_cell_size))
            .collect()
    }

    /// Plain raster signature of `track` on a grid with the given longitude cell width.
    pub fn rasterize(&self, track: &Track, long_cell_size: f64) -> RasterSignature {
        let mut signature = RasterSignature::default();
        for (pk, cell) in self.sample_cells(track, long_cell_size).into_iter().enumerate() {
            for (weight, offsets) in &self.rings {
                for &(d_lat, d_long) in offsets {
                    signature
                        .cells
                        .entry(cell.offset(d_lat, d_long))
                        .and_modify(|entry| {
                            entry.contribute(pk, *weight, self.cooldown);
                        })
                        .or_insert_with(|| RasterEntry::new(pk, *weight));
                }
            }
        }
        signature.compute_norm();
        signature
    }

    /// Directional raster signature of `track`.
    ///
    /// Uses the track's precomputed directions when present, otherwise computes them
    /// with the configured lag.
    pub fn rasterize_directional(&self, track: &Track, long_cell_size: f64) -> DirectionalSignature {
        let computed;
        let angles: &[f64] = if track.has_directions() {
            &track.angles
        } else {
            computed = geo_utils::direction_series(&track.points, self.angle_lag);
            &computed
        };

        let mut signature = DirectionalSignature::default();
        let cells = self.sample_cells(track, long_cell_size);
        for (pk, (cell, &angle)) in cells.into_iter().zip(angles).enumerate() {
            for (weight, offsets) in &self.rings {
                for &(d_lat, d_long) in offsets {
                    signature
                        .cells
                        .entry(cell.offset(d_lat, d_long))
                        .or_default()
                        .contribute(pk, *weight, angle, self.cooldown);
                }
            }
        }

        let anomalies = signature.finalize();
        if anomalies > 0 {
            error!(
                "{}: {} directional cells were already closed at finalization",
                track.filename, anomalies
            );
        }
        signature
    }
}
