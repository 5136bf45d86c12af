//! Run configuration.
//!
//! A [`SimilarityConfig`] is built once from defaults plus overrides (command-line flags
//! or a JSON file), validated, and then passed by reference to every pipeline stage.
//! Nothing mutates it after construction.

use std::f64::consts::FRAC_PI_2;
use std::path::Path;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Result, TrackSimError};
use crate::geo_utils::METERS_PER_DEGREE_LAT;

/// Decay function applied to ring contributions at increasing Manhattan distance.
///
/// Every method yields `1.0` at distance 0.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecayMethod {
    /// `factor ^ d`
    Exponential,
    /// `(1 + d) ^ -factor`
    Power,
    /// `1 - d / (D + 1)`
    Linear,
    /// Gaussian with sigma `factor * (D + 1)`
    Normal,
    /// Quarter cosine reaching zero just past `D`
    Cosine,
    /// Full weight for the sample cell and its direct neighbours, nothing beyond.
    NearIntersect,
    /// Explicit per-distance table from [`SimilarityConfig::custom_profile`].
    Custom,
}

impl DecayMethod {
    pub fn name(&self) -> &'static str {
        match self {
            DecayMethod::Exponential => "exponential",
            DecayMethod::Power => "power",
            DecayMethod::Linear => "linear",
            DecayMethod::Normal => "normal",
            DecayMethod::Cosine => "cosine",
            DecayMethod::NearIntersect => "near_intersect",
            DecayMethod::Custom => "custom",
        }
    }
}

impl FromStr for DecayMethod {
    type Err = TrackSimError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "exponential" => Ok(DecayMethod::Exponential),
            "power" => Ok(DecayMethod::Power),
            "linear" => Ok(DecayMethod::Linear),
            "normal" => Ok(DecayMethod::Normal),
            "cosine" => Ok(DecayMethod::Cosine),
            "near_intersect" => Ok(DecayMethod::NearIntersect),
            "custom" => Ok(DecayMethod::Custom),
            _ => Err(TrackSimError::UnknownRasterMethod(s.to_string())),
        }
    }
}

/// Whether intra-group pairing emits a track paired with itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SelfPairs {
    /// Pairs `(i, j)` with `i <= j`.
    Include,
    /// Pairs `(i, j)` with `i < j`.
    #[default]
    Exclude,
}

/// Configuration for rasterization, grouping and scoring.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SimilarityConfig {
    /// Grid cell edge length in meters.
    /// Default: 20.0
    pub raster_size_m: f64,

    /// Search radius around each sample, in cells.
    /// Default: 2
    pub manhattan_distance_max: u32,

    /// Parameter of the decay method (base for exponential, exponent for power,
    /// sigma scale for normal).
    /// Default: 0.8
    pub decay_factor: f64,

    /// Decay function selection.
    /// Default: exponential
    pub raster_method: DecayMethod,

    /// Per-distance weights, used only when `raster_method` is `custom`.
    pub custom_profile: Option<Vec<f64>>,

    /// Number of samples a cell waits before accepting a brand-new contribution.
    /// Default: 30
    pub cooldown_interval: usize,

    /// Sample lag used to compute the direction of travel.
    /// Default: 5
    pub angle_lag: usize,

    /// Emit zero-valued rows for pairs in different groups.
    /// Default: true
    pub include_zero_pairs: bool,

    /// Report file basenames instead of full paths.
    /// Default: false
    pub basename_only: bool,

    /// Intra-group diagonal handling.
    /// Default: exclude
    pub self_pairs: SelfPairs,

    /// Also compute direction-aware similarity.
    /// Default: false
    pub directional: bool,
}

impl Default for SimilarityConfig {
    fn default() -> Self {
        Self {
            raster_size_m: 20.0,
            manhattan_distance_max: 2,
            decay_factor: 0.8,
            raster_method: DecayMethod::Exponential,
            custom_profile: None,
            cooldown_interval: 30,
            angle_lag: 5,
            include_zero_pairs: true,
            basename_only: false,
            self_pairs: SelfPairs::Exclude,
            directional: false,
        }
    }
}

impl SimilarityConfig {
    /// Load overrides from a JSON file on top of the defaults and validate the result.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| TrackSimError::io(path, e))?;
        Self::from_json_str(&text)
    }

    /// Parse overrides from a JSON document on top of the defaults and validate the result.
    pub fn from_json_str(text: &str) -> Result<Self> {
        let config: SimilarityConfig = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Check every option for consistency. Called before any track is touched.
    pub fn validate(&self) -> Result<()> {
        if !(self.raster_size_m.is_finite() && self.raster_size_m > 0.0) {
            return Err(TrackSimError::InvalidConfig(format!(
                "raster_size_m must be positive, got {}",
                self.raster_size_m
            )));
        }
        if !(self.decay_factor.is_finite() && self.decay_factor > 0.0) {
            return Err(TrackSimError::InvalidConfig(format!(
                "decay_factor must be positive, got {}",
                self.decay_factor
            )));
        }
        if self.raster_method == DecayMethod::Exponential && self.decay_factor > 1.0 {
            return Err(TrackSimError::InvalidConfig(format!(
                "exponential decay_factor must not exceed 1, got {}",
                self.decay_factor
            )));
        }
        if self.angle_lag == 0 {
            return Err(TrackSimError::InvalidConfig(
                "angle_lag must be at least 1".to_string(),
            ));
        }
        if self.raster_method == DecayMethod::Custom {
            self.validate_custom_profile()?;
        }
        Ok(())
    }

    fn validate_custom_profile(&self) -> Result<()> {
        let required = self.manhattan_distance_max as usize + 1;
        let profile = self.custom_profile.as_deref().unwrap_or(&[]);
        if profile.len() < required {
            return Err(TrackSimError::CustomProfileTooShort {
                len: profile.len(),
                required,
            });
        }
        if profile[0] != 1.0 {
            return Err(TrackSimError::InvalidCustomProfile(format!(
                "first weight must be 1.0, got {}",
                profile[0]
            )));
        }
        if let Some(w) = profile.windows(2).find(|w| !(w[1] <= w[0]) || w[1] < 0.0) {
            return Err(TrackSimError::InvalidCustomProfile(format!(
                "weights must be non-negative and non-increasing ({} followed by {})",
                w[0], w[1]
            )));
        }
        Ok(())
    }

    /// Latitude cell size in degrees.
    pub fn lat_cell_size(&self) -> f64 {
        self.raster_size_m / METERS_PER_DEGREE_LAT
    }

    /// Latitude padding applied to each side of a track's bounding box.
    ///
    /// One cell more than the search radius, so footprints that could share a cell
    /// always produce intersecting boxes.
    pub fn bbox_padding_lat(&self) -> f64 {
        (self.manhattan_distance_max as f64 + 1.0) * self.lat_cell_size()
    }

    /// Decay weight at a Manhattan distance of `distance` cells.
    pub fn decay_weight(&self, distance: u32) -> f64 {
        let d = distance as f64;
        let span = self.manhattan_distance_max as f64 + 1.0;
        match self.raster_method {
            DecayMethod::Exponential => self.decay_factor.powi(distance as i32),
            DecayMethod::Power => (1.0 + d).powf(-self.decay_factor),
            DecayMethod::Linear => (1.0 - d / span).max(0.0),
            DecayMethod::Normal => {
                let sigma = self.decay_factor * span;
                (-(d * d) / (2.0 * sigma * sigma)).exp()
            }
            DecayMethod::Cosine => (FRAC_PI_2 * d / span).cos().max(0.0),
            DecayMethod::NearIntersect => {
                if distance <= 1 {
                    1.0
                } else {
                    0.0
                }
            }
            DecayMethod::Custom => self
                .custom_profile
                .as_ref()
                .and_then(|p| p.get(distance as usize).copied())
                .unwrap_or(0.0),
        }
    }

    /// Decay weights for every ring from 0 to `manhattan_distance_max` inclusive.
    pub fn decay_weights(&self) -> Vec<f64> {
        (0..=self.manhattan_distance_max)
            .map(|d| self.decay_weight(d))
            .collect()
    }
}
