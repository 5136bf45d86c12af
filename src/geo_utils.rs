//! # Geographic Utilities
//!
//! Geographic computations shared by the metadata builder, the grouper and the rasterizer.
//!
//! ## Overview
//!
//! | Function | Description |
//! |----------|-------------|
//! | [`haversine_distance`] | Great-circle distance between two track points |
//! | [`cumulative_distances`] | Running distance along a track in meters |
//! | [`median`] | Median of a slice (mean of the middle pair for even lengths) |
//! | [`circular_mean`] | Mean direction of a set of angles |
//! | [`direction_series`] | Lagged direction of travel for every sample |
//! | [`longitude_cell_size`] | Longitude cell width matching a latitude cell at a given latitude |
//! | [`padded_bounds`] | Bounding box of a track, padded for the raster search radius |
//!
//! ## Example
//!
//! ```rust
//! use track_similarity::{TrackPoint, geo_utils};
//!
//! let points = vec![
//!     TrackPoint::new(51.5074, -0.1278, 0.0),
//!     TrackPoint::new(51.5080, -0.1290, 0.0),
//!     TrackPoint::new(51.5090, -0.1300, 0.0),
//! ];
//!
//! let distances = geo_utils::cumulative_distances(&points);
//! assert_eq!(distances[0], 0.0);
//! assert!(distances[2] > distances[1]);
//! ```
//!
//! ## Conventions
//!
//! Angles are mathematical (radians, counter-clockwise from east), computed on a locally
//! flattened plane where longitude differences are scaled by `cos(latitude)`.
//! Longitude cell widths are the latitude cell height divided by `cos(latitude)`, so
//! cells are close to square on the ground.

use geo::{Distance, Haversine, Point};

use crate::{BoundingBox, TrackPoint};

/// Meters per degree of latitude used to size raster cells.
pub const METERS_PER_DEGREE_LAT: f64 = 111_000.0;

/// Smallest cosine used when widening longitude cells near the poles.
const MIN_COSINE: f64 = 0.1;

// =============================================================================
// Distance Functions
// =============================================================================

/// Great-circle distance between two track points, in meters.
///
/// ```rust
/// use track_similarity::{TrackPoint, geo_utils};
///
/// let london = TrackPoint::new(51.5074, -0.1278, 0.0);
/// let paris = TrackPoint::new(48.8566, 2.3522, 0.0);
///
/// let distance = geo_utils::haversine_distance(&london, &paris);
/// assert!((distance - 343_560.0).abs() < 1000.0);
/// ```
#[inline]
pub fn haversine_distance(p1: &TrackPoint, p2: &TrackPoint) -> f64 {
    let point1 = Point::new(p1.longitude, p1.latitude);
    let point2 = Point::new(p2.longitude, p2.latitude);
    Haversine::distance(point1, point2)
}

/// Running distance along a sequence of points, starting at 0.
pub fn cumulative_distances(points: &[TrackPoint]) -> Vec<f64> {
    let mut total = 0.0;
    let mut distances = Vec::with_capacity(points.len());
    for (i, p) in points.iter().enumerate() {
        if i > 0 {
            total += haversine_distance(&points[i - 1], p);
        }
        distances.push(total);
    }
    distances
}

// =============================================================================
// Statistics
// =============================================================================

/// Median of `values`. Returns NaN for an empty slice.
pub fn median(values: &[f64]) -> f64 {
    if values.is_empty() {
        return f64::NAN;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        (sorted[mid - 1] + sorted[mid]) / 2.0
    } else {
        sorted[mid]
    }
}

/// Mean direction of `angles` (radians), `atan2(mean(sin), mean(cos))`.
///
/// Unlike an arithmetic mean this is correct across the ±π wrap: the circular mean of
/// `[π - 0.1, -π + 0.1]` is π, not 0. Returns 0 for an empty slice.
pub fn circular_mean(angles: &[f64]) -> f64 {
    if angles.is_empty() {
        return 0.0;
    }
    let n = angles.len() as f64;
    let sin_mean = angles.iter().map(|a| a.sin()).sum::<f64>() / n;
    let cos_mean = angles.iter().map(|a| a.cos()).sum::<f64>() / n;
    sin_mean.atan2(cos_mean)
}

// =============================================================================
// Direction of Travel
// =============================================================================

/// Direction of travel for every sample, using a forward difference over `lag` samples.
///
/// Sample `i` gets the direction from point `i` to point `i + lag`. The last `lag`
/// samples have no point that far ahead and repeat the last computable direction.
/// Tracks with `lag` or fewer samples use the direction from the first to the last
/// point for every sample (0 for a single point).
pub fn direction_series(points: &[TrackPoint], lag: usize) -> Vec<f64> {
    if points.is_empty() {
        return Vec::new();
    }
    let lats: Vec<f64> = points.iter().map(|p| p.latitude).collect();
    let lon_lat_ratio = median(&lats).to_radians().cos();
    let direction = |from: &TrackPoint, to: &TrackPoint| {
        let d_lat = to.latitude - from.latitude;
        let d_long = (to.longitude - from.longitude) * lon_lat_ratio;
        d_lat.atan2(d_long)
    };

    let lag = lag.max(1);
    if points.len() <= lag {
        let whole = direction(&points[0], &points[points.len() - 1]);
        return vec![whole; points.len()];
    }

    let mut angles: Vec<f64> = points
        .iter()
        .zip(points.iter().skip(lag))
        .map(|(from, to)| direction(from, to))
        .collect();
    let last = angles[angles.len() - 1];
    angles.resize(points.len(), last);
    angles
}

// =============================================================================
// Grid and Bounding Box Functions
// =============================================================================

/// Longitude cell width (degrees) covering the same ground distance as a latitude cell
/// of `lat_cell_size` degrees at `latitude`.
#[inline]
pub fn longitude_cell_size(lat_cell_size: f64, latitude: f64) -> f64 {
    lat_cell_size / latitude.to_radians().cos().max(MIN_COSINE)
}

/// Bounding box of `points`, padded by `lat_padding` degrees of latitude and the
/// equivalent longitude padding at `reference_lat`.
///
/// Returns `None` for an empty slice.
pub fn padded_bounds(
    points: &[TrackPoint],
    lat_padding: f64,
    reference_lat: f64,
) -> Option<BoundingBox> {
    let raw = BoundingBox::from_points(points)?;
    let long_padding = longitude_cell_size(lat_padding, reference_lat);
    Some(raw.padded(lat_padding, long_padding))
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::f64::consts::{FRAC_PI_2, PI};

    fn approx_eq(a: f64, b: f64, epsilon: f64) -> bool {
        (a - b).abs() < epsilon
    }

    fn point(lat: f64, lng: f64) -> TrackPoint {
        TrackPoint::new(lat, lng, 0.0)
    }

    #[test]
    fn test_haversine_distance_same_point() {
        let p = point(51.5074, -0.1278);
        assert_eq!(haversine_distance(&p, &p), 0.0);
    }

    #[test]
    fn test_cumulative_distances() {
        let track = vec![point(0.0, 0.0), point(0.001, 0.0), point(0.002, 0.0)];
        let d = cumulative_distances(&track);
        assert_eq!(d.len(), 3);
        assert_eq!(d[0], 0.0);
        assert!(approx_eq(d[1], 111.2, 1.0));
        assert!(approx_eq(d[2], 2.0 * d[1], 1e-6));
    }

    #[test]
    fn test_median_odd_and_even() {
        assert_eq!(median(&[3.0, 1.0, 2.0]), 2.0);
        assert_eq!(median(&[4.0, 1.0, 3.0, 2.0]), 2.5);
        assert!(median(&[]).is_nan());
    }

    #[test]
    fn test_circular_mean_wraps() {
        let mean = circular_mean(&[PI - 0.1, -PI + 0.1]);
        assert!(approx_eq(mean.abs(), PI, 1e-9));
    }

    #[test]
    fn test_circular_mean_simple() {
        let mean = circular_mean(&[0.0, FRAC_PI_2]);
        assert!(approx_eq(mean, PI / 4.0, 1e-12));
    }

    #[test]
    fn test_direction_series_northbound() {
        let track: Vec<TrackPoint> = (0..10).map(|i| point(i as f64 * 0.0001, 0.0)).collect();
        let angles = direction_series(&track, 3);
        assert_eq!(angles.len(), 10);
        for a in angles {
            assert!(approx_eq(a, FRAC_PI_2, 1e-9));
        }
    }

    #[test]
    fn test_direction_series_edge_fill() {
        // East for the first half, then north
        let mut track: Vec<TrackPoint> = (0..5).map(|i| point(0.0, i as f64 * 0.0001)).collect();
        track.extend((1..=5).map(|i| point(i as f64 * 0.0001, 0.0004)));
        let angles = direction_series(&track, 2);
        assert_eq!(angles.len(), 10);
        assert!(approx_eq(angles[0], 0.0, 1e-9));
        // Last two repeat the last computable value
        assert_eq!(angles[8], angles[7]);
        assert_eq!(angles[9], angles[7]);
        assert!(approx_eq(angles[7], FRAC_PI_2, 1e-9));
    }

    #[test]
    fn test_direction_series_short_track() {
        let track = vec![point(0.0, 0.0), point(0.0, -0.001)];
        let angles = direction_series(&track, 5);
        assert_eq!(angles.len(), 2);
        assert!(approx_eq(angles[0].abs(), PI, 1e-9));
        assert_eq!(direction_series(&track[..1], 5), vec![0.0]);
    }

    #[test]
    fn test_longitude_cell_size() {
        let lat_cell = 20.0 / METERS_PER_DEGREE_LAT;
        assert!(approx_eq(longitude_cell_size(lat_cell, 0.0), lat_cell, 1e-15));
        assert!(approx_eq(longitude_cell_size(lat_cell, 60.0), 2.0 * lat_cell, 1e-12));
        // Clamped near the poles
        assert!(approx_eq(longitude_cell_size(lat_cell, 90.0), 10.0 * lat_cell, 1e-9));
    }

    #[test]
    fn test_padded_bounds() {
        let track = vec![point(51.50, -0.13), point(51.51, -0.12)];
        let bounds = padded_bounds(&track, 0.01, 60.0).unwrap();
        assert!(approx_eq(bounds.min_lat, 51.49, 1e-12));
        assert!(approx_eq(bounds.max_lat, 51.52, 1e-12));
        assert!(approx_eq(bounds.min_lng, -0.15, 1e-9));
        assert!(approx_eq(bounds.max_lng, -0.10, 1e-9));
        assert!(padded_bounds(&[], 0.01, 0.0).is_none());
    }
}
