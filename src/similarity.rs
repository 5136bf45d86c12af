//! Pairwise similarity from raster signatures.
//!
//! Both scores are normalized dot products over shared grid cells:
//!
//! - **plain**: `Σ wA·wB / sqrt(normA · normB)` over cells both tracks touch, where
//!   `norm` is the sum of squared cell weights. Identical signatures score exactly 1.
//! - **directional**: visits in a shared cell are paired up in order (extra visits on
//!   either side are dropped) and each pair contributes `cos(angleA - angleB)·wA·wB`.
//!   Same-direction passes add, perpendicular passes add nothing, opposite passes
//!   subtract.
//!
//! Scoring functions take shared references only and are safe to run for many pairs
//! at once.

use serde::Serialize;

use crate::raster::{DirectionalSignature, RasterSignature};
use crate::BoundingBox;

/// Everything needed to score a track against others.
#[derive(Debug, Clone)]
pub struct TrackSignature {
    pub filename: String,
    /// Padded bounding box
    pub bounds: BoundingBox,
    pub raster: Option<RasterSignature>,
    pub directional: Option<DirectionalSignature>,
}

impl TrackSignature {
    /// Signature with bounds only; scores against it are 0 unless rasters are attached.
    pub fn new(filename: impl Into<String>, bounds: BoundingBox) -> Self {
        Self {
            filename: filename.into(),
            bounds,
            raster: None,
            directional: None,
        }
    }
}

/// Scores for one ordered pair of tracks.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct PairSimilarity {
    pub similarity: f64,
    pub directional_similarity: Option<f64>,
}

impl PairSimilarity {
    pub fn zero(directional: bool) -> Self {
        Self {
            similarity: 0.0,
            directional_similarity: directional.then_some(0.0),
        }
    }
}

fn normalize(dot: f64, norm_a: f64, norm_b: f64) -> f64 {
    let denom = (norm_a * norm_b).sqrt();
    if denom > 0.0 {
        dot / denom
    } else {
        0.0
    }
}

/// Plain similarity: weighted overlap of shared cells over the geometric-mean norm.
pub fn plain_similarity(a: &RasterSignature, b: &RasterSignature) -> f64 {
    let (small, large) = if a.len() <= b.len() { (a, b) } else { (b, a) };
    let dot: f64 = small
        .cells
        .iter()
        .filter_map(|(cell, entry)| {
            large
                .cells
                .get(cell)
                .map(|other| entry.sum_weight * other.sum_weight)
        })
        .sum();
    normalize(dot, a.norm, b.norm)
}

/// Directional similarity: angle-weighted overlap of paired visits over the
/// geometric-mean directional norm.
pub fn directional_similarity(a: &DirectionalSignature, b: &DirectionalSignature) -> f64 {
    let mut dot = 0.0;
    for (cell, entry_a) in &a.cells {
        let Some(entry_b) = b.cells.get(cell) else {
            continue;
        };
        for (va, vb) in entry_a.history.iter().zip(&entry_b.history) {
            dot += (va.angle - vb.angle).cos() * va.weight * vb.weight;
        }
    }
    normalize(dot, a.norm, b.norm)
}

/// Score a pair, returning zeros without looking at rasters when the bounding boxes
/// do not intersect.
///
/// A missing raster on either side also scores 0.
pub fn compare_signatures(a: &TrackSignature, b: &TrackSignature, directional: bool) -> PairSimilarity {
    if !a.bounds.intersects(&b.bounds) {
        return PairSimilarity::zero(directional);
    }

    let similarity = match (&a.raster, &b.raster) {
        (Some(ra), Some(rb)) => plain_similarity(ra, rb),
        _ => 0.0,
    };
    let directional_similarity = directional.then(|| match (&a.directional, &b.directional) {
        (Some(da), Some(db)) => directional_similarity(da, db),
        _ => 0.0,
    });

    PairSimilarity {
        similarity,
        directional_similarity,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::raster::Rasterizer;
    use crate::{SimilarityConfig, Track, TrackPoint};
    use std::f64::consts::PI;

    fn approx_eq(a: f64, b: f64, epsilon: f64) -> bool {
        (a - b).abs() < epsilon
    }

    fn track_through(cells: &[(i64, i64)], config: &SimilarityConfig) -> Track {
        let size = config.lat_cell_size();
        let points = cells
            .iter()
            .map(|&(lat, lng)| {
                TrackPoint::new((lat as f64 + 0.5) * size, (lng as f64 + 0.5) * size, 0.0)
            })
            .collect();
        Track::new("t", points)
    }

    fn eastbound(config: &SimilarityConfig, lat_bin: i64) -> Track {
        let cells: Vec<(i64, i64)> = (0..40).map(|i| (lat_bin, i)).collect();
        track_through(&cells, config)
    }

    fn far_bounds() -> BoundingBox {
        BoundingBox {
            min_lat: 10.0,
            max_lat: 11.0,
            min_lng: 10.0,
            max_lng: 11.0,
        }
    }

    #[test]
    fn test_self_similarity_is_one() {
        let config = SimilarityConfig::default();
        let raster = Rasterizer::new(&config).rasterize(&eastbound(&config, 0), config.lat_cell_size());
        assert!(approx_eq(plain_similarity(&raster, &raster), 1.0, 1e-12));
    }

    #[test]
    fn test_similarity_symmetric_and_bounded() {
        let config = SimilarityConfig::default();
        let rasterizer = Rasterizer::new(&config);
        let a = rasterizer.rasterize(&eastbound(&config, 0), config.lat_cell_size());
        let b = rasterizer.rasterize(&eastbound(&config, 2), config.lat_cell_size());
        let ab = plain_similarity(&a, &b);
        assert!(approx_eq(ab, plain_similarity(&b, &a), 1e-12));
        assert!(ab > 0.0 && ab < 1.0);
    }

    #[test]
    fn test_parallel_offset_decreases_similarity() {
        let config = SimilarityConfig::default();
        let rasterizer = Rasterizer::new(&config);
        let base = rasterizer.rasterize(&eastbound(&config, 0), config.lat_cell_size());
        let near = rasterizer.rasterize(&eastbound(&config, 1), config.lat_cell_size());
        let far = rasterizer.rasterize(&eastbound(&config, 3), config.lat_cell_size());
        let none = rasterizer.rasterize(&eastbound(&config, 6), config.lat_cell_size());
        let s_near = plain_similarity(&base, &near);
        let s_far = plain_similarity(&base, &far);
        assert!(s_near > s_far);
        assert!(s_far > 0.0);
        assert_eq!(plain_similarity(&base, &none), 0.0);
    }

    #[test]
    fn test_empty_signature_scores_zero() {
        let config = SimilarityConfig::default();
        let raster = Rasterizer::new(&config).rasterize(&eastbound(&config, 0), config.lat_cell_size());
        let empty = RasterSignature::default();
        assert_eq!(plain_similarity(&raster, &empty), 0.0);
        assert_eq!(
            directional_similarity(&DirectionalSignature::default(), &DirectionalSignature::default()),
            0.0
        );
    }

    #[test]
    fn test_directional_same_and_reverse() {
        let config = SimilarityConfig::default();
        let rasterizer = Rasterizer::new(&config);
        let mut forward = eastbound(&config, 0);
        forward.angles = vec![0.0; forward.len()];
        let mut backward = forward.clone();
        backward.points.reverse();
        backward.angles = vec![PI; backward.len()];
        let mut north = forward.clone();
        north.angles = vec![PI / 2.0; north.len()];

        let f = rasterizer.rasterize_directional(&forward, config.lat_cell_size());
        let b = rasterizer.rasterize_directional(&backward, config.lat_cell_size());
        let n = rasterizer.rasterize_directional(&north, config.lat_cell_size());

        assert!(approx_eq(directional_similarity(&f, &f), 1.0, 1e-9));
        assert!(approx_eq(directional_similarity(&f, &b), -1.0, 1e-9));
        assert!(approx_eq(directional_similarity(&f, &n), 0.0, 1e-9));
    }

    #[test]
    fn test_compare_disjoint_bounds_is_zero_without_rasters() {
        let config = SimilarityConfig::default();
        let track = eastbound(&config, 0);
        let rasterizer = Rasterizer::new(&config);
        let near = TrackSignature {
            filename: "near".to_string(),
            bounds: crate::BoundingBox::from_points(&track.points).unwrap(),
            raster: Some(rasterizer.rasterize(&track, config.lat_cell_size())),
            directional: Some(rasterizer.rasterize_directional(&track, config.lat_cell_size())),
        };
        let far = TrackSignature::new("far", far_bounds());

        let result = compare_signatures(&near, &far, true);
        assert_eq!(result.similarity, 0.0);
        assert_eq!(result.directional_similarity, Some(0.0));
        assert_eq!(compare_signatures(&near, &far, false).directional_similarity, None);
    }

    #[test]
    fn test_compare_overlapping() {
        let config = SimilarityConfig::default();
        let track = eastbound(&config, 0);
        let rasterizer = Rasterizer::new(&config);
        let sig = TrackSignature {
            filename: "a".to_string(),
            bounds: crate::BoundingBox::from_points(&track.points).unwrap(),
            raster: Some(rasterizer.rasterize(&track, config.lat_cell_size())),
            directional: None,
        };
        let result = compare_signatures(&sig, &sig.clone(), false);
        assert!(approx_eq(result.similarity, 1.0, 1e-12));
        assert_eq!(result.directional_similarity, None);
    }
}
