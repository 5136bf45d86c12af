//! # Track Similarity
//!
//! Raster-signature similarity scoring for GPS tracks.
//!
//! This library provides:
//! - Grouping of tracks into connected components by padded bounding-box intersection
//! - Rasterization of each track into a decayed, cooldown-gated occupancy map
//!   (plain and direction-aware)
//! - Pairwise similarity scoring from those raster signatures
//! - A batch pipeline tying the stages together, plus CSV/JSON I/O helpers
//!
//! ## Features
//!
//! - **`parallel`** - Rasterize tracks and score pairs in parallel with rayon
//! - **`cli`** - Build the `tracksim` command-line binary
//! - **`full`** - Enable all features
//!
//! ## Quick Start
//!
//! ```rust
//! use track_similarity::{pipeline, SimilarityConfig, Track};
//!
//! // A short eastbound track, and the same path recorded again
//! let coords: Vec<(f64, f64)> = (0..60)
//!     .map(|i| (51.5074, -0.1278 + i as f64 * 0.0001))
//!     .collect();
//!
//! let tracks = vec![
//!     Track::from_coordinates("morning.csv", &coords),
//!     Track::from_coordinates("evening.csv", &coords),
//! ];
//!
//! let report = pipeline::run(tracks, &SimilarityConfig::default()).unwrap();
//! let row = &report.rows[0];
//! assert!((row.similarity - 1.0).abs() < 1e-9);
//! ```

use rstar::{RTreeObject, AABB};
use serde::Serialize;

// Unified error handling
pub mod error;
pub use error::{Result, TrackSimError};

// Run configuration
pub mod config;
pub use config::{DecayMethod, SelfPairs, SimilarityConfig};

// Geographic helpers
pub mod geo_utils;

// Bounding-box grouping (connected components)
pub mod grouping;
pub use grouping::{Group, GroupSummary, Grouper, OverallSummary};

// Raster signatures
pub mod raster;
pub use raster::{
    Contribution, DirectionalEntry, DirectionalRow, DirectionalSignature, GridCell, RasterEntry,
    RasterRow, RasterSignature, Rasterizer, Visit,
};

// Pairwise scoring
pub mod similarity;
pub use similarity::{
    compare_signatures, directional_similarity, plain_similarity, PairSimilarity, TrackSignature,
};

// Batch driver and pair enumeration
pub mod pipeline;
pub use pipeline::{SimilarityReport, SimilarityRow};

// File input/output
pub mod io;

// ============================================================================
// Core Types
// ============================================================================

/// One sample of a track.
///
/// Sample order is temporal order; the position of a sample in its track doubles as
/// its primary key for cooldown comparisons.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrackPoint {
    pub latitude: f64,
    pub longitude: f64,
    /// Cumulative distance at this sample, in track-native units
    pub distance: f64,
}

impl TrackPoint {
    /// Create a new sample.
    pub fn new(latitude: f64, longitude: f64, distance: f64) -> Self {
        Self {
            latitude,
            longitude,
            distance,
        }
    }

    /// Check if the sample has usable coordinates.
    pub fn is_valid(&self) -> bool {
        self.latitude.is_finite()
            && self.longitude.is_finite()
            && self.latitude >= -90.0
            && self.latitude <= 90.0
            && self.longitude >= -180.0
            && self.longitude <= 180.0
    }
}

/// One input series.
#[derive(Debug, Clone)]
pub struct Track {
    /// Unique identifier (usually the source path)
    pub filename: String,
    /// Samples in temporal order
    pub points: Vec<TrackPoint>,
    /// Timestamp of the first sample, as recorded in the source
    pub start_time: Option<String>,
    /// Direction of travel per sample, filled by [`Track::compute_directions`]
    pub angles: Vec<f64>,
}

impl Track {
    /// Create a track from samples. Directions are not computed yet.
    pub fn new(filename: impl Into<String>, points: Vec<TrackPoint>) -> Self {
        Self {
            filename: filename.into(),
            points,
            start_time: None,
            angles: Vec::new(),
        }
    }

    /// Create a track from `(latitude, longitude)` pairs, filling in cumulative
    /// haversine distance in meters.
    pub fn from_coordinates(filename: impl Into<String>, coords: &[(f64, f64)]) -> Self {
        let mut points: Vec<TrackPoint> = coords
            .iter()
            .map(|&(lat, lng)| TrackPoint::new(lat, lng, 0.0))
            .collect();
        let distances = geo_utils::cumulative_distances(&points);
        for (p, d) in points.iter_mut().zip(distances) {
            p.distance = d;
        }
        Self::new(filename, points)
    }

    pub fn with_start_time(mut self, start_time: impl Into<String>) -> Self {
        self.start_time = Some(start_time.into());
        self
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Compute the direction of travel for every sample using a lag of `lag` samples.
    pub fn compute_directions(&mut self, lag: usize) {
        self.angles = geo_utils::direction_series(&self.points, lag);
    }

    /// Whether directions are present for every sample.
    pub fn has_directions(&self) -> bool {
        !self.points.is_empty() && self.angles.len() == self.points.len()
    }
}

/// Geographic bounding box (degrees).
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct BoundingBox {
    pub min_lat: f64,
    pub max_lat: f64,
    pub min_lng: f64,
    pub max_lng: f64,
}

impl BoundingBox {
    /// Unpadded bounds of a set of samples.
    pub fn from_points(points: &[TrackPoint]) -> Option<Self> {
        if points.is_empty() {
            return None;
        }
        let mut min_lat = f64::MAX;
        let mut max_lat = f64::MIN;
        let mut min_lng = f64::MAX;
        let mut max_lng = f64::MIN;

        for p in points {
            min_lat = min_lat.min(p.latitude);
            max_lat = max_lat.max(p.latitude);
            min_lng = min_lng.min(p.longitude);
            max_lng = max_lng.max(p.longitude);
        }

        Some(Self {
            min_lat,
            max_lat,
            min_lng,
            max_lng,
        })
    }

    /// Grow the box outward by the given margins on every side.
    pub fn padded(&self, lat_padding: f64, lng_padding: f64) -> Self {
        Self {
            min_lat: self.min_lat - lat_padding,
            max_lat: self.max_lat + lat_padding,
            min_lng: self.min_lng - lng_padding,
            max_lng: self.max_lng + lng_padding,
        }
    }

    /// Whether the two boxes overlap. Touching edges count as overlapping.
    pub fn intersects(&self, other: &BoundingBox) -> bool {
        !(self.max_lat < other.min_lat
            || self.min_lat > other.max_lat
            || self.max_lng < other.min_lng
            || self.min_lng > other.max_lng)
    }

    /// Center point as `(latitude, longitude)`.
    pub fn center(&self) -> (f64, f64) {
        (
            (self.min_lat + self.max_lat) / 2.0,
            (self.min_lng + self.max_lng) / 2.0,
        )
    }
}

/// Per-track summary used by the grouper.
#[derive(Debug, Clone, Serialize)]
pub struct TrackMetadata {
    /// Position of the track in the pipeline's track list
    pub index: usize,
    pub filename: String,
    /// Padded bounding box
    pub bounds: BoundingBox,
    /// Largest cumulative distance recorded
    pub distance: f64,
    pub median_lat: f64,
    pub cosine_lat: f64,
    pub start_time: Option<String>,
}

impl TrackMetadata {
    /// Summarize `track`, padding its bounding box for the configured search radius.
    ///
    /// Fails on an empty track or a sample with unusable coordinates.
    pub fn from_track(index: usize, track: &Track, config: &SimilarityConfig) -> Result<Self> {
        if track.is_empty() {
            return Err(TrackSimError::EmptyTrack {
                filename: track.filename.clone(),
            });
        }
        if let Some(row) = track.points.iter().position(|p| !p.is_valid()) {
            return Err(TrackSimError::MalformedRecord {
                filename: track.filename.clone(),
                row,
                reason: "latitude/longitude missing or out of range".to_string(),
            });
        }

        let lats: Vec<f64> = track.points.iter().map(|p| p.latitude).collect();
        let median_lat = geo_utils::median(&lats);
        let bounds = geo_utils::padded_bounds(&track.points, config.bbox_padding_lat(), median_lat)
            .ok_or_else(|| TrackSimError::EmptyTrack {
                filename: track.filename.clone(),
            })?;
        let distance = track
            .points
            .iter()
            .map(|p| p.distance)
            .filter(|d| d.is_finite())
            .fold(0.0, f64::max);

        Ok(Self {
            index,
            filename: track.filename.clone(),
            bounds,
            distance,
            median_lat,
            cosine_lat: median_lat.to_radians().cos(),
            start_time: track.start_time.clone(),
        })
    }
}

impl RTreeObject for TrackMetadata {
    type Envelope = AABB<[f64; 2]>;

    fn envelope(&self) -> Self::Envelope {
        AABB::from_corners(
            [self.bounds.min_lng, self.bounds.min_lat],
            [self.bounds.max_lng, self.bounds.max_lat],
        )
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn boxed(min_lat: f64, max_lat: f64, min_lng: f64, max_lng: f64) -> BoundingBox {
        BoundingBox {
            min_lat,
            max_lat,
            min_lng,
            max_lng,
        }
    }

    #[test]
    fn test_track_point_validation() {
        assert!(TrackPoint::new(51.5074, -0.1278, 0.0).is_valid());
        assert!(!TrackPoint::new(91.0, 0.0, 0.0).is_valid());
        assert!(!TrackPoint::new(0.0, 181.0, 0.0).is_valid());
        assert!(!TrackPoint::new(f64::NAN, 0.0, 0.0).is_valid());
    }

    #[test]
    fn test_bbox_intersection_symmetric() {
        let boxes = [
            boxed(0.0, 1.0, 0.0, 1.0),
            boxed(0.1, 0.9, 0.1, 0.9),
            boxed(2.0, 3.0, 4.0, 5.0),
            boxed(-1.0, 2.0, 6.0, 7.0),
            boxed(1.0, 2.0, 1.0, 2.0),
        ];
        for a in &boxes {
            for b in &boxes {
                assert_eq!(a.intersects(b), b.intersects(a));
            }
        }
    }

    #[test]
    fn test_bbox_touching_counts() {
        let a = boxed(0.0, 1.0, 0.0, 1.0);
        let b = boxed(1.0, 2.0, 1.0, 2.0);
        assert!(a.intersects(&b));
    }

    #[test]
    fn test_bbox_disjoint_on_one_axis() {
        let a = boxed(0.0, 1.0, 0.0, 1.0);
        let east = boxed(0.0, 1.0, 1.5, 2.0);
        let north = boxed(1.5, 2.0, 0.0, 1.0);
        assert!(!a.intersects(&east));
        assert!(!a.intersects(&north));
    }

    #[test]
    fn test_from_coordinates_fills_distance() {
        let track = Track::from_coordinates("t", &[(0.0, 0.0), (0.001, 0.0)]);
        assert_eq!(track.points[0].distance, 0.0);
        assert!(track.points[1].distance > 100.0);
        assert!(!track.has_directions());
    }

    #[test]
    fn test_metadata_pads_bounds() {
        let config = SimilarityConfig::default();
        let track = Track::from_coordinates("t", &[(10.0, 20.0), (10.001, 20.001)]);
        let meta = TrackMetadata::from_track(0, &track, &config).unwrap();
        let pad = config.bbox_padding_lat();
        assert!((meta.bounds.min_lat - (10.0 - pad)).abs() < 1e-12);
        assert!((meta.bounds.max_lat - (10.001 + pad)).abs() < 1e-12);
        // Longitude padding is wider than latitude padding away from the equator
        assert!(meta.bounds.max_lng - 20.001 > pad);
        assert!(meta.distance > 100.0);
    }

    #[test]
    fn test_metadata_rejects_empty() {
        let track = Track::new("empty", vec![]);
        let result = TrackMetadata::from_track(0, &track, &SimilarityConfig::default());
        assert!(matches!(result, Err(TrackSimError::EmptyTrack { .. })));
    }

    #[test]
    fn test_metadata_rejects_bad_coordinates() {
        let track = Track::new(
            "bad",
            vec![TrackPoint::new(0.0, 0.0, 0.0), TrackPoint::new(f64::NAN, 0.0, 1.0)],
        );
        let result = TrackMetadata::from_track(0, &track, &SimilarityConfig::default());
        assert!(matches!(
            result,
            Err(TrackSimError::MalformedRecord { row: 1, .. })
        ));
    }
}
