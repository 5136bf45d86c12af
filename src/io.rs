//! File input and output.
//!
//! Track files are CSV tables with at least the columns in [`REQUIRED_COLUMNS`]; any
//! other columns are ignored. Results are written as CSV, group summaries as JSON.

use std::collections::HashMap;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

use crate::error::{Result, TrackSimError};
use crate::grouping::{GroupSummary, OverallSummary};
use crate::pipeline::{SimilarityReport, SimilarityRow};
use crate::raster::{DirectionalRow, RasterRow};
use crate::{Track, TrackPoint};

/// Columns every track file must provide.
pub const REQUIRED_COLUMNS: [&str; 4] = ["position_long", "position_lat", "timestamp", "distance"];

/// Substrings marking per-lap and per-start exports that are not full tracks.
const SKIPPED_NAME_PATTERNS: [&str; 2] = ["laps", "starts"];

#[derive(Debug, Deserialize)]
struct TrackRecord {
    position_long: f64,
    position_lat: f64,
    timestamp: String,
    distance: Option<f64>,
}

// ============================================================================
// Input
// ============================================================================

/// Read one track file.
///
/// A file with a header and no rows yields a track with no points; the pipeline drops
/// it with a warning. Missing distances are stored as NaN.
pub fn read_track(path: impl AsRef<Path>) -> Result<Track> {
    let path = path.as_ref();
    let filename = path.display().to_string();
    let file = File::open(path).map_err(|e| TrackSimError::io(path, e))?;
    let mut reader = csv::Reader::from_reader(file);

    let headers = reader.headers()?.clone();
    for column in REQUIRED_COLUMNS {
        if !headers.iter().any(|h| h.trim() == column) {
            return Err(TrackSimError::MissingColumn {
                filename,
                column: column.to_string(),
            });
        }
    }

    let mut points = Vec::new();
    let mut start_time = None;
    for (row, record) in reader.deserialize::<TrackRecord>().enumerate() {
        let record = record.map_err(|e| TrackSimError::MalformedRecord {
            filename: filename.clone(),
            row,
            reason: e.to_string(),
        })?;
        if start_time.is_none() {
            start_time = Some(record.timestamp);
        }
        points.push(TrackPoint::new(
            record.position_lat,
            record.position_long,
            record.distance.unwrap_or(f64::NAN),
        ));
    }

    debug!("Read {} samples from {}", points.len(), filename);
    let mut track = Track::new(filename, points);
    track.start_time = start_time;
    Ok(track)
}

/// Read every path in order, failing on the first unreadable file.
pub fn read_tracks<P: AsRef<Path>>(paths: &[P]) -> Result<Vec<Track>> {
    info!("Loading {} track files", paths.len());
    paths.iter().map(read_track).collect()
}

/// Drop lap/start exports unless `no_filter`, then keep the first `head` paths when
/// `head > 0`.
pub fn filter_input_paths(paths: Vec<String>, no_filter: bool, head: usize) -> Vec<String> {
    let mut paths = if no_filter {
        paths
    } else {
        paths
            .into_iter()
            .filter(|p| !SKIPPED_NAME_PATTERNS.iter().any(|pat| p.contains(pat)))
            .collect()
    };
    if head > 0 && paths.len() > head {
        warn!("Only taking top {} files", head);
        paths.truncate(head);
    }
    paths
}

/// Name shown in output rows: the full path, or only its final component.
pub fn display_filename(filename: &str, basename_only: bool) -> String {
    if !basename_only {
        return filename.to_string();
    }
    Path::new(filename)
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| filename.to_string())
}

// ============================================================================
// ID mapping
// ============================================================================

#[derive(Debug, Deserialize)]
struct IdRecord {
    filename: String,
    id: String,
}

/// Load a `filename,id` table.
///
/// Any failure is logged as a warning and yields `None`; output then carries no ID
/// columns.
pub fn load_id_mapping(path: impl AsRef<Path>) -> Option<HashMap<String, String>> {
    let path = path.as_ref();
    match read_id_mapping(path) {
        Ok(mapping) => {
            debug!("Loaded {} ID mappings from {}", mapping.len(), path.display());
            Some(mapping)
        }
        Err(reason) => {
            let err = TrackSimError::MappingUnavailable(format!("{}: {}", path.display(), reason));
            warn!("{}", err);
            None
        }
    }
}

fn read_id_mapping(path: &Path) -> std::result::Result<HashMap<String, String>, String> {
    let mut reader = csv::Reader::from_path(path).map_err(|e| e.to_string())?;
    let headers = reader.headers().map_err(|e| e.to_string())?;
    for column in ["filename", "id"] {
        if !headers.iter().any(|h| h.trim() == column) {
            return Err(format!("missing column '{}'", column));
        }
    }
    reader
        .deserialize::<IdRecord>()
        .map(|r| r.map(|r| (r.filename, r.id)).map_err(|e| e.to_string()))
        .collect()
}

/// Left-join IDs onto both filename columns.
pub fn apply_id_mapping(rows: &mut [SimilarityRow], mapping: &HashMap<String, String>) {
    for row in rows {
        row.id1 = mapping.get(&row.fn1).cloned();
        row.id2 = mapping.get(&row.fn2).cloned();
    }
}

// ============================================================================
// Output
// ============================================================================

/// Write the similarity table.
///
/// `directional` adds a `directional_similarity` column; `with_ids` adds `id1, id2`.
/// Missing values are written as empty fields.
pub fn write_results(
    path: impl AsRef<Path>,
    rows: &[SimilarityRow],
    directional: bool,
    with_ids: bool,
) -> Result<()> {
    let path = path.as_ref();
    info!("Writing data to {}", path.display());
    let mut writer = csv::Writer::from_path(path)?;

    let mut header = vec!["fn1", "fn2", "similarity"];
    if directional {
        header.push("directional_similarity");
    }
    if with_ids {
        header.extend(["id1", "id2"]);
    }
    writer.write_record(&header)?;

    for row in rows {
        let mut record = vec![row.fn1.clone(), row.fn2.clone(), row.similarity.to_string()];
        if directional {
            record.push(
                row.directional_similarity
                    .map(|d| d.to_string())
                    .unwrap_or_default(),
            );
        }
        if with_ids {
            record.push(row.id1.clone().unwrap_or_default());
            record.push(row.id2.clone().unwrap_or_default());
        }
        writer.write_record(&record)?;
    }
    writer.flush().map_err(|e| TrackSimError::io(path, e))?;
    Ok(())
}

/// Write per-member plain rasterization rows.
pub fn write_raster_table(path: impl AsRef<Path>, rows: &[RasterRow]) -> Result<()> {
    write_serialized_rows(path.as_ref(), rows)
}

/// Write per-member directional rasterization rows.
pub fn write_directional_table(path: impl AsRef<Path>, rows: &[DirectionalRow]) -> Result<()> {
    write_serialized_rows(path.as_ref(), rows)
}

fn write_serialized_rows<T: Serialize>(path: &Path, rows: &[T]) -> Result<()> {
    debug!("Writing {} rows to {}", rows.len(), path.display());
    let mut writer = csv::Writer::from_path(path)?;
    for row in rows {
        writer.serialize(row)?;
    }
    writer.flush().map_err(|e| TrackSimError::io(path, e))?;
    Ok(())
}

#[derive(Serialize)]
struct GroupSummaryFile<'a> {
    overall: &'a OverallSummary,
    groups: &'a [GroupSummary],
}

/// Write group summaries as pretty-printed JSON.
pub fn write_group_summaries(
    path: impl AsRef<Path>,
    groups: &[GroupSummary],
    overall: &OverallSummary,
) -> Result<()> {
    let path = path.as_ref();
    let file = File::create(path).map_err(|e| TrackSimError::io(path, e))?;
    let mut writer = BufWriter::new(file);
    serde_json::to_writer_pretty(&mut writer, &GroupSummaryFile { overall, groups })
        .map_err(|e| TrackSimError::io(path, e.into()))?;
    writer.flush().map_err(|e| TrackSimError::io(path, e))
}

/// Destinations for one run's outputs. Only `results` is required.
#[derive(Debug, Clone, Default)]
pub struct OutputPaths {
    pub results: PathBuf,
    pub raster: Option<PathBuf>,
    pub directional_raster: Option<PathBuf>,
    pub group_summary: Option<PathBuf>,
}

impl OutputPaths {
    pub fn new(results: impl Into<PathBuf>) -> Self {
        Self {
            results: results.into(),
            ..Self::default()
        }
    }
}

/// Write every requested output of a run.
///
/// The similarity table goes first; side tables are only written once it is on disk.
/// The directional table is skipped with a warning when the report carries no
/// directional signatures.
pub fn write_report(
    report: &SimilarityReport,
    paths: &OutputPaths,
    directional: bool,
    with_ids: bool,
) -> Result<()> {
    write_results(&paths.results, &report.rows, directional, with_ids)?;

    if let Some(path) = &paths.raster {
        write_raster_table(path, &report.raster_rows())?;
    }
    if let Some(path) = &paths.directional_raster {
        if directional {
            write_directional_table(path, &report.directional_rows())?;
        } else {
            warn!(
                "Directional scoring is off, not writing {}",
                path.display()
            );
        }
    }
    if let Some(path) = &paths.group_summary {
        write_group_summaries(path, &report.groups, &report.overall)?;
    }
    Ok(())
}
