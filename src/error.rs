//! Unified error type for the track similarity pipeline.
//!
//! Errors fall into four classes:
//!
//! | Class | Variants | Handling |
//! |-------|----------|----------|
//! | Fatal input | [`EmptyTrack`], [`MissingColumn`], [`MalformedRecord`], [`NoUsableTracks`], [`Io`], [`Csv`] | Halts the run, no output written |
//! | Configuration | [`UnknownRasterMethod`], [`CustomProfileTooShort`], [`InvalidCustomProfile`], [`InvalidConfig`], [`ConfigFile`] | Halts before processing |
//! | Consistency | [`CellAlreadyClosed`] | Logged, run continues |
//! | Mapping | [`MappingUnavailable`] | Logged, output written without ID columns |
//!
//! [`EmptyTrack`]: TrackSimError::EmptyTrack
//! [`MissingColumn`]: TrackSimError::MissingColumn
//! [`MalformedRecord`]: TrackSimError::MalformedRecord
//! [`NoUsableTracks`]: TrackSimError::NoUsableTracks
//! [`Io`]: TrackSimError::Io
//! [`Csv`]: TrackSimError::Csv
//! [`UnknownRasterMethod`]: TrackSimError::UnknownRasterMethod
//! [`CustomProfileTooShort`]: TrackSimError::CustomProfileTooShort
//! [`InvalidCustomProfile`]: TrackSimError::InvalidCustomProfile
//! [`InvalidConfig`]: TrackSimError::InvalidConfig
//! [`ConfigFile`]: TrackSimError::ConfigFile
//! [`CellAlreadyClosed`]: TrackSimError::CellAlreadyClosed
//! [`MappingUnavailable`]: TrackSimError::MappingUnavailable

use thiserror::Error;

/// Result alias used across the crate.
pub type Result<T> = std::result::Result<T, TrackSimError>;

#[derive(Error, Debug)]
pub enum TrackSimError {
    #[error("track {filename} has no samples")]
    EmptyTrack { filename: String },

    #[error("track {filename} is missing required column '{column}'")]
    MissingColumn { filename: String, column: String },

    #[error("track {filename}, row {row}: {reason}")]
    MalformedRecord {
        filename: String,
        row: usize,
        reason: String,
    },

    #[error("no usable tracks after filtering")]
    NoUsableTracks,

    #[error("I/O error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("unknown raster method '{0}'")]
    UnknownRasterMethod(String),

    #[error("custom raster profile has {len} entries, at least {required} required")]
    CustomProfileTooShort { len: usize, required: usize },

    #[error("invalid custom raster profile: {0}")]
    InvalidCustomProfile(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("could not parse configuration file: {0}")]
    ConfigFile(#[from] serde_json::Error),

    #[error("directional raster cell ({lat_bin}, {long_bin}) was already closed at finalization")]
    CellAlreadyClosed { lat_bin: i64, long_bin: i64 },

    #[error("ID mapping unavailable: {0}")]
    MappingUnavailable(String),
}

impl TrackSimError {
    /// Whether this error must halt the run.
    ///
    /// Consistency and mapping problems are reported but never abort processing.
    pub fn is_fatal(&self) -> bool {
        !matches!(
            self,
            TrackSimError::CellAlreadyClosed { .. } | TrackSimError::MappingUnavailable(_)
        )
    }

    /// Whether this is a configuration problem (detected before any track is processed).
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            TrackSimError::UnknownRasterMethod(_)
                | TrackSimError::CustomProfileTooShort { .. }
                | TrackSimError::InvalidCustomProfile(_)
                | TrackSimError::InvalidConfig(_)
                | TrackSimError::ConfigFile(_)
        )
    }

    pub(crate) fn io(path: impl AsRef<std::path::Path>, source: std::io::Error) -> Self {
        TrackSimError::Io {
            path: path.as_ref().display().to_string(),
            source,
        }
    }
}
