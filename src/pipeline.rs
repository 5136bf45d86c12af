//! Batch driver: tracks in, similarity rows out.
//!
//! Stages run in order:
//!
//! 1. drop tracks with no samples
//! 2. summarize each track ([`TrackMetadata`])
//! 3. group tracks by bounding-box intersection ([`Grouper`])
//! 4. rasterize every track with its group's longitude cell width
//! 5. score every intra-group pair, then zero-fill inter-group pairs
//!
//! Rows are emitted group by group, in member order, with the inter-group zeros last.
//! Enabling the `parallel` feature changes how stages 4 and 5 are scheduled, not what
//! they produce or the order they produce it in.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Instant;

use log::{debug, info, warn};
use serde::Serialize;

use crate::config::SimilarityConfig;
use crate::error::{Result, TrackSimError};
use crate::grouping::{GroupSummary, Grouper, OverallSummary};
use crate::io::display_filename;
use crate::raster::{DirectionalRow, RasterRow, Rasterizer};
use crate::similarity::{compare_signatures, PairSimilarity, TrackSignature};
use crate::{BoundingBox, Track, TrackMetadata};

const RASTER_PROGRESS_INTERVAL: usize = 25;
const PAIR_PROGRESS_INTERVAL: usize = 1000;

/// One output row: the scores of an ordered track pair.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SimilarityRow {
    pub fn1: String,
    pub fn2: String,
    pub similarity: f64,
    pub directional_similarity: Option<f64>,
    pub id1: Option<String>,
    pub id2: Option<String>,
}

impl SimilarityRow {
    fn new(fn1: String, fn2: String, scores: PairSimilarity) -> Self {
        Self {
            fn1,
            fn2,
            similarity: scores.similarity,
            directional_similarity: scores.directional_similarity,
            id1: None,
            id2: None,
        }
    }
}

/// Everything a run produces.
#[derive(Debug, Clone)]
pub struct SimilarityReport {
    pub rows: Vec<SimilarityRow>,
    pub groups: Vec<GroupSummary>,
    pub overall: OverallSummary,
    /// Per-track signatures, indexed like the filtered track list
    pub signatures: Vec<TrackSignature>,
    /// Inter-group rows included in `rows`
    pub n_zero_pairs: usize,
    /// Filename pairs whose boxes intersect across groups; empty for a sound partition
    pub group_overlaps: Vec<(String, String)>,
}

impl SimilarityReport {
    /// Plain rasterization table for every track.
    pub fn raster_rows(&self) -> Vec<RasterRow> {
        self.signatures
            .iter()
            .filter_map(|s| s.raster.as_ref().map(|r| r.rows(&s.filename)))
            .flatten()
            .collect()
    }

    /// Directional rasterization table; empty unless directional scoring was enabled.
    pub fn directional_rows(&self) -> Vec<DirectionalRow> {
        self.signatures
            .iter()
            .filter_map(|s| s.directional.as_ref().map(|d| d.rows(&s.filename)))
            .flatten()
            .collect()
    }
}

/// Remove tracks without samples, warning once per track.
pub fn filter_empty_tracks(tracks: Vec<Track>) -> Vec<Track> {
    let before = tracks.len();
    let kept: Vec<Track> = tracks
        .into_iter()
        .filter(|t| {
            if t.is_empty() {
                warn!("Removing {} due to 0 rows", t.filename);
            }
            !t.is_empty()
        })
        .collect();

    let removed = before - kept.len();
    if removed > 0 {
        warn!("Removed {} files for having 0 rows", removed);
    } else {
        debug!("No tracks removed by the empty-track filter");
    }
    kept
}

/// Run the whole pipeline over `tracks`.
///
/// Fails on an invalid configuration, when no track has samples, or when a track has
/// unusable coordinates.
pub fn run(tracks: Vec<Track>, config: &SimilarityConfig) -> Result<SimilarityReport> {
    config.validate()?;
    let start = Instant::now();

    let mut tracks = filter_empty_tracks(tracks);
    if tracks.is_empty() {
        return Err(TrackSimError::NoUsableTracks);
    }

    info!("Creating metadata for {} tracks", tracks.len());
    let metadata = tracks
        .iter()
        .enumerate()
        .map(|(i, track)| TrackMetadata::from_track(i, track, config))
        .collect::<Result<Vec<_>>>()?;

    let grouper = Grouper::from_metadata(metadata, config);
    let group_overlaps = grouper.verify_disjoint();
    if !group_overlaps.is_empty() {
        warn!(
            "{} member pairs in different groups have intersecting boxes",
            group_overlaps.len()
        );
    }
    debug!("Group sizes: {:?}", grouper.group_sizes());

    if config.directional {
        for track in &mut tracks {
            track.compute_directions(config.angle_lag);
        }
        info!("Done adding directions");
    }

    let signatures = rasterize_all(&tracks, &grouper, config);
    info!("Rasterized {} tracks", signatures.len());

    let names: Vec<String> = tracks
        .iter()
        .map(|t| display_filename(&t.filename, config.basename_only))
        .collect();

    let pairs: Vec<(usize, usize)> = grouper
        .pairwise_iter(config.self_pairs)
        .map(|(a, b)| (a.index, b.index))
        .collect();
    let scores = score_pairs(&pairs, &signatures, config.directional);
    let mut rows: Vec<SimilarityRow> = pairs
        .iter()
        .zip(scores)
        .map(|(&(i, j), s)| SimilarityRow::new(names[i].clone(), names[j].clone(), s))
        .collect();
    info!("Calculated similarities for {} pairs", rows.len());

    let mut n_zero_pairs = 0;
    if config.include_zero_pairs {
        let zero = PairSimilarity::zero(config.directional);
        for (a, b) in grouper.inter_group_pairs() {
            rows.push(SimilarityRow::new(
                names[a.index].clone(),
                names[b.index].clone(),
                zero,
            ));
            n_zero_pairs += 1;
        }
        debug!("Added {} zero-similarity inter-group pairs", n_zero_pairs);
    }

    info!(
        "Scored {} tracks in {} groups in {:?}",
        tracks.len(),
        grouper.len(),
        start.elapsed()
    );

    Ok(SimilarityReport {
        rows,
        groups: grouper.group_summaries(),
        overall: grouper.overall_summary(),
        signatures,
        n_zero_pairs,
        group_overlaps,
    })
}

/// Rasterization job for one track: its group's longitude cell width and its bounds.
struct RasterJob<'a> {
    track: &'a Track,
    long_cell_size: f64,
    bounds: BoundingBox,
}

/// Bounds of `track` padded by `D + 1` cells of the grid it is rasterized on.
///
/// Member boxes from grouping are padded with the track's own latitude; a group whose
/// median lies closer to the pole rasterizes on wider cells, so scoring re-pads here.
fn grid_bounds(
    track: &Track,
    fallback: BoundingBox,
    long_cell_size: f64,
    config: &SimilarityConfig,
) -> BoundingBox {
    let cells = config.manhattan_distance_max as f64 + 1.0;
    BoundingBox::from_points(&track.points)
        .map(|raw| raw.padded(config.bbox_padding_lat(), cells * long_cell_size))
        .unwrap_or(fallback)
}

fn rasterize_all(tracks: &[Track], grouper: &Grouper, config: &SimilarityConfig) -> Vec<TrackSignature> {
    let mut jobs: Vec<Option<RasterJob>> = (0..tracks.len()).map(|_| None).collect();
    for (idx, group) in grouper.groups().iter().enumerate() {
        let long_cell_size = grouper.group_summary(idx).long_cell_size;
        for member in &group.members {
            let track = &tracks[member.index];
            jobs[member.index] = Some(RasterJob {
                track,
                long_cell_size,
                bounds: grid_bounds(track, member.bounds, long_cell_size, config),
            });
        }
    }
    let jobs: Vec<RasterJob> = jobs.into_iter().flatten().collect();

    let rasterizer = Rasterizer::new(config);
    let done = AtomicUsize::new(0);
    let total = jobs.len();
    let rasterize_one = |job: &RasterJob| {
        let mut signature = TrackSignature::new(job.track.filename.clone(), job.bounds);
        signature.raster = Some(rasterizer.rasterize(job.track, job.long_cell_size));
        if config.directional {
            signature.directional =
                Some(rasterizer.rasterize_directional(job.track, job.long_cell_size));
        }
        let n = done.fetch_add(1, Ordering::Relaxed) + 1;
        if n % RASTER_PROGRESS_INTERVAL == 0 {
            debug!("Rasterized {}/{} tracks", n, total);
        }
        signature
    };

    #[cfg(feature = "parallel")]
    let signatures = {
        use rayon::prelude::*;
        jobs.par_iter().map(rasterize_one).collect()
    };

    #[cfg(not(feature = "parallel"))]
    let signatures = jobs.iter().map(rasterize_one).collect();

    signatures
}

fn score_pairs(
    pairs: &[(usize, usize)],
    signatures: &[TrackSignature],
    directional: bool,
) -> Vec<PairSimilarity> {
    let done = AtomicUsize::new(0);
    let total = pairs.len();
    let score_one = |&(i, j): &(usize, usize)| {
        let scores = compare_signatures(&signatures[i], &signatures[j], directional);
        let n = done.fetch_add(1, Ordering::Relaxed) + 1;
        if n % PAIR_PROGRESS_INTERVAL == 0 {
            debug!("Scored {}/{} pairs", n, total);
        }
        scores
    };

    #[cfg(feature = "parallel")]
    let scores = {
        use rayon::prelude::*;
        pairs.par_iter().map(score_one).collect()
    };

    #[cfg(not(feature = "parallel"))]
    let scores = pairs.iter().map(score_one).collect();

    scores
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::SelfPairs;

    fn approx_eq(a: f64, b: f64, epsilon: f64) -> bool {
        (a - b).abs() < epsilon
    }

    fn eastbound(name: &str, lat: f64, lng: f64, n: usize) -> Track {
        let coords: Vec<(f64, f64)> = (0..n).map(|i| (lat, lng + i as f64 * 0.0001)).collect();
        Track::from_coordinates(name, &coords)
    }

    #[test]
    fn test_filter_empty_tracks() {
        let tracks = vec![
            eastbound("a.csv", 51.5, -0.1, 10),
            Track::new("empty.csv", vec![]),
            eastbound("b.csv", 51.5, -0.1, 10),
        ];
        let kept = filter_empty_tracks(tracks);
        let names: Vec<&str> = kept.iter().map(|t| t.filename.as_str()).collect();
        assert_eq!(names, vec!["a.csv", "b.csv"]);
    }

    #[test]
    fn test_run_rejects_no_usable_tracks() {
        let result = run(vec![Track::new("empty.csv", vec![])], &SimilarityConfig::default());
        assert!(matches!(result, Err(TrackSimError::NoUsableTracks)));
        assert!(matches!(
            run(vec![], &SimilarityConfig::default()),
            Err(TrackSimError::NoUsableTracks)
        ));
    }

    #[test]
    fn test_run_rejects_invalid_config() {
        let config = SimilarityConfig {
            angle_lag: 0,
            ..SimilarityConfig::default()
        };
        let result = run(vec![eastbound("a.csv", 51.5, -0.1, 10)], &config);
        assert!(result.is_err());
    }

    #[test]
    fn test_run_identical_tracks() {
        let tracks = vec![
            eastbound("a.csv", 51.5, -0.1, 50),
            eastbound("b.csv", 51.5, -0.1, 50),
        ];
        let report = run(tracks, &SimilarityConfig::default()).unwrap();
        assert_eq!(report.rows.len(), 1);
        assert_eq!(report.n_zero_pairs, 0);
        assert_eq!(report.overall.n_groups, 1);
        let row = &report.rows[0];
        assert_eq!((row.fn1.as_str(), row.fn2.as_str()), ("a.csv", "b.csv"));
        assert!(approx_eq(row.similarity, 1.0, 1e-9));
        assert_eq!(row.directional_similarity, None);
    }

    #[test]
    fn test_run_zero_fills_distant_pairs() {
        let tracks = vec![
            eastbound("near1.csv", 51.5, -0.1, 20),
            eastbound("far.csv", 52.5, -0.1, 20),
            eastbound("near2.csv", 51.5, -0.1, 20),
        ];
        let config = SimilarityConfig {
            directional: true,
            ..SimilarityConfig::default()
        };
        let report = run(tracks.clone(), &config).unwrap();
        assert_eq!(report.overall.n_groups, 2);
        assert_eq!(report.n_zero_pairs, 2);
        assert_eq!(report.rows.len(), 3);

        let far_rows: Vec<&SimilarityRow> = report
            .rows
            .iter()
            .filter(|r| r.fn1 == "far.csv" || r.fn2 == "far.csv")
            .collect();
        assert_eq!(far_rows.len(), 2);
        for row in far_rows {
            assert_eq!(row.similarity, 0.0);
            assert_eq!(row.directional_similarity, Some(0.0));
        }

        let without_zeros = SimilarityConfig {
            include_zero_pairs: false,
            ..config
        };
        let report = run(tracks, &without_zeros).unwrap();
        assert_eq!(report.rows.len(), 1);
        assert_eq!(report.n_zero_pairs, 0);
    }

    #[test]
    fn test_run_self_pairs() {
        let tracks = vec![
            eastbound("a.csv", 51.5, -0.1, 20),
            eastbound("b.csv", 51.5, -0.1, 20),
        ];
        let config = SimilarityConfig {
            self_pairs: SelfPairs::Include,
            ..SimilarityConfig::default()
        };
        let report = run(tracks, &config).unwrap();
        assert_eq!(report.rows.len(), 3);
        let diagonal = report.rows.iter().find(|r| r.fn1 == "b.csv" && r.fn2 == "b.csv").unwrap();
        assert!(approx_eq(diagonal.similarity, 1.0, 1e-12));
    }

    #[test]
    fn test_run_basename_only() {
        let tracks = vec![
            eastbound("data/runs/a.csv", 51.5, -0.1, 20),
            eastbound("data/runs/b.csv", 51.5, -0.1, 20),
        ];
        let config = SimilarityConfig {
            basename_only: true,
            ..SimilarityConfig::default()
        };
        let report = run(tracks, &config).unwrap();
        assert_eq!(report.rows[0].fn1, "a.csv");
        assert_eq!(report.rows[0].fn2, "b.csv");
        // Signatures keep the full name
        assert_eq!(report.signatures[0].filename, "data/runs/a.csv");
    }

    #[test]
    fn test_report_tables() {
        let tracks = vec![eastbound("a.csv", 51.5, -0.1, 20)];
        let config = SimilarityConfig {
            directional: true,
            ..SimilarityConfig::default()
        };
        let report = run(tracks, &config).unwrap();
        assert!(report.rows.is_empty());
        let raster = report.raster_rows();
        assert!(!raster.is_empty());
        assert!(raster.iter().all(|r| r.filename == "a.csv"));
        assert!(!report.directional_rows().is_empty());
    }
}
