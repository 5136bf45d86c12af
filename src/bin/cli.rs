//! tracksim - pairwise similarity between GPS tracks
//!
//! Usage:
//!   tracksim [OPTIONS] <FILES>...
//!
//! Reads one CSV file per track (columns `position_long, position_lat, timestamp,
//! distance`), groups tracks whose padded bounding boxes touch, rasterizes them and
//! writes one similarity row per track pair.

use std::io::Write;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use log::{error, info};
use track_similarity::{io, pipeline, DecayMethod, Result, SelfPairs, SimilarityConfig};

#[derive(Parser)]
#[command(name = "tracksim")]
#[command(about = "Get similarities between gps-type tracks", long_about = None)]
struct Cli {
    /// Input files
    #[arg(required = true)]
    files: Vec<String>,

    /// Output filename
    #[arg(long, default_value = "track_similarities.csv")]
    output_filename: PathBuf,

    /// Add direction-based similarity metrics
    #[arg(long)]
    add_directional_similarity: bool,

    /// Take the first N files instead of all of them
    #[arg(long, default_value = "0")]
    head: usize,

    /// Do not filter out lap and start files
    #[arg(long)]
    no_filter: bool,

    /// JSON configuration file; flags below override its values
    #[arg(long)]
    config: Option<PathBuf>,

    /// Grid cell edge length in meters
    #[arg(long)]
    raster_size_m: Option<f64>,

    /// Search radius in cells
    #[arg(long)]
    manhattan_distance_max: Option<u32>,

    /// Decay factor for the raster method
    #[arg(long)]
    decay_factor: Option<f64>,

    /// Decay method (exponential, power, linear, normal, cosine, near-intersect, custom)
    #[arg(long)]
    raster_method: Option<String>,

    /// Per-distance weights for the custom method, e.g. "1,0.5,0.25"
    #[arg(long, value_delimiter = ',')]
    custom_raster_profile: Option<Vec<f64>>,

    /// Samples before a cell accepts a fresh contribution
    #[arg(long)]
    cooldown_interval: Option<usize>,

    /// Lag in samples used for the direction of travel
    #[arg(long)]
    angle_lag: Option<usize>,

    /// Leave out zero-similarity pairs from different groups
    #[arg(long)]
    no_zero_pairs: bool,

    /// Write only the final path component of each filename
    #[arg(long)]
    basename: bool,

    /// Also score each track against itself
    #[arg(long)]
    include_self_pairs: bool,

    /// CSV with `filename,id` columns joined onto both filename columns
    #[arg(long)]
    id_map: Option<PathBuf>,

    /// Write the per-track rasterization table here
    #[arg(long)]
    raster_output: Option<PathBuf>,

    /// Write the per-track directional rasterization table here
    #[arg(long)]
    directional_raster_output: Option<PathBuf>,

    /// Write group summaries (JSON) here
    #[arg(long)]
    group_summary_output: Option<PathBuf>,

    /// Enable verbose debug output
    #[arg(short, long)]
    verbose: bool,
}

impl Cli {
    fn build_config(&self) -> Result<SimilarityConfig> {
        let mut config = match &self.config {
            Some(path) => SimilarityConfig::from_json_file(path)?,
            None => SimilarityConfig::default(),
        };

        if let Some(v) = self.raster_size_m {
            config.raster_size_m = v;
        }
        if let Some(v) = self.manhattan_distance_max {
            config.manhattan_distance_max = v;
        }
        if let Some(v) = self.decay_factor {
            config.decay_factor = v;
        }
        if let Some(profile) = &self.custom_raster_profile {
            config.custom_profile = Some(profile.clone());
            config.raster_method = DecayMethod::Custom;
        }
        if let Some(name) = &self.raster_method {
            config.raster_method = name.parse()?;
        }
        if let Some(v) = self.cooldown_interval {
            config.cooldown_interval = v;
        }
        if let Some(v) = self.angle_lag {
            config.angle_lag = v;
        }
        if self.add_directional_similarity {
            config.directional = true;
        }
        if self.no_zero_pairs {
            config.include_zero_pairs = false;
        }
        if self.basename {
            config.basename_only = true;
        }
        if self.include_self_pairs {
            config.self_pairs = SelfPairs::Include;
        }

        config.validate()?;
        Ok(config)
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level))
        .format(|buf, record| writeln!(buf, "[{:5}] {}", record.level(), record.args()))
        .init();

    match run(cli) {
        Ok(()) => {
            info!("Done!");
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("{}", e);
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<()> {
    let config = cli.build_config()?;

    let files = io::filter_input_paths(cli.files.clone(), cli.no_filter, cli.head);
    let tracks = io::read_tracks(&files)?;

    let mut report = pipeline::run(tracks, &config)?;

    let mapping = cli.id_map.as_ref().and_then(io::load_id_mapping);
    if let Some(mapping) = &mapping {
        io::apply_id_mapping(&mut report.rows, mapping);
    }

    let paths = io::OutputPaths {
        results: cli.output_filename.clone(),
        raster: cli.raster_output.clone(),
        directional_raster: cli.directional_raster_output.clone(),
        group_summary: cli.group_summary_output.clone(),
    };
    io::write_report(&report, &paths, config.directional, mapping.is_some())
}
