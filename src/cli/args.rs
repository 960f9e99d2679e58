//! Command-line argument definitions using clap

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use crate::config::{OutputFormat, PipelineConfig};
use crate::pipeline::grid::TemperatureUnit;
use crate::pipeline::linkage::ExposureMeasure;
use crate::pipeline::stages::PipelineInputs;

/// climalink - Link climate reanalysis anomalies to geocoded survey clusters
#[derive(Parser, Debug)]
#[command(name = "climalink")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Gridded monthly temperature extract (CSV or Parquet, long format)
    #[arg(long)]
    pub climate: Option<PathBuf>,

    /// Geocoded cluster extract (requires --children)
    #[arg(long, requires = "children")]
    pub clusters: Option<PathBuf>,

    /// Child-level survey extract (requires --clusters)
    #[arg(long, requires = "clusters")]
    pub children: Option<PathBuf>,

    /// JSON configuration file. Flags below override its values.
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Directory for public, de-identified artifacts
    #[arg(long)]
    pub public_dir: Option<PathBuf>,

    /// Directory for local-only artifacts (cluster ids and coordinates)
    #[arg(long)]
    pub local_dir: Option<PathBuf>,

    /// Output table format: "csv" or "parquet"
    #[arg(long)]
    pub format: Option<OutputFormat>,

    /// Name of the temperature column in the gridded extract
    #[arg(long)]
    pub value_column: Option<String>,

    /// Unit of the temperature column: "kelvin" or "celsius"
    #[arg(long)]
    pub units: Option<TemperatureUnit>,

    /// First year of the climatological reference period
    #[arg(long)]
    pub baseline_start: Option<i32>,

    /// Last year of the climatological reference period
    #[arg(long)]
    pub baseline_end: Option<i32>,

    /// Minimum non-null reference years for a defined baseline
    #[arg(long)]
    pub min_baseline_years: Option<usize>,

    /// Trailing rolling window for the global anomaly series, in months
    #[arg(long, value_parser = validate_positive_usize)]
    pub rolling_window: Option<usize>,

    /// Target resolution of the map-scale anomaly table, in degrees
    #[arg(long, value_parser = validate_positive_f64)]
    pub resolution: Option<f64>,

    /// Length of the pre-interview exposure window, in months
    #[arg(long, value_parser = validate_positive_u32)]
    pub windowed_months: Option<u32>,

    /// Length of the recent exposure window ending at the interview month
    #[arg(long, value_parser = validate_positive_u32)]
    pub recent_months: Option<u32>,

    /// Exposure measure: "temperature" or "anomaly"
    #[arg(long)]
    pub measure: Option<ExposureMeasure>,

    /// Temperature bin width in °C
    #[arg(long, value_parser = validate_positive_f64)]
    pub bin_width: Option<f64>,

    /// Upper edge of the open reference bin in °C
    #[arg(long)]
    pub reference_upper: Option<f64>,

    /// Lower edge of an open top-coded bin in °C
    #[arg(long)]
    pub top_code: Option<f64>,

    /// Minimum distinct clusters behind any public row
    #[arg(long, value_parser = validate_min_group_size)]
    pub min_group_size: Option<usize>,

    /// Cache directory for derived climate tables
    #[arg(long)]
    pub cache_dir: Option<PathBuf>,

    /// Disable the climate table cache
    #[arg(long, default_value = "false")]
    pub no_cache: bool,

    /// Suppress the banner and progress output
    #[arg(short, long, default_value = "false")]
    pub quiet: bool,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Write the default configuration as JSON
    InitConfig {
        /// Output path for the configuration file
        #[arg(default_value = "climalink.json")]
        output: PathBuf,
    },
}

impl Cli {
    /// Input files of a run, if the climate extract was given
    pub fn inputs(&self) -> Option<PipelineInputs> {
        Some(PipelineInputs {
            climate: self.climate.clone()?,
            clusters: self.clusters.clone(),
            children: self.children.clone(),
        })
    }

    /// Load the configuration file (or defaults) and apply flag overrides
    pub fn resolve_config(&self) -> Result<PipelineConfig> {
        let mut config = match &self.config {
            Some(path) => PipelineConfig::from_json_file(path)?,
            None => PipelineConfig::with_default_panels(),
        };
        self.apply_overrides(&mut config);
        config.validate().context("Invalid configuration")?;
        Ok(config)
    }

    /// Overwrite config values with every flag that was given
    pub fn apply_overrides(&self, config: &mut PipelineConfig) {
        fn set<T: Clone>(target: &mut T, value: &Option<T>) {
            if let Some(v) = value {
                *target = v.clone();
            }
        }

        set(&mut config.export.public_dir, &self.public_dir);
        set(&mut config.export.local_dir, &self.local_dir);
        set(&mut config.export.format, &self.format);
        set(&mut config.export.min_group_size, &self.min_group_size);
        set(&mut config.grid.value_column, &self.value_column);
        set(&mut config.grid.units, &self.units);
        set(&mut config.baseline.start_year, &self.baseline_start);
        set(&mut config.baseline.end_year, &self.baseline_end);
        set(&mut config.baseline.min_years, &self.min_baseline_years);
        set(&mut config.temporal.rolling_window, &self.rolling_window);
        set(&mut config.spatial.resolution, &self.resolution);
        set(&mut config.linkage.windowed_months, &self.windowed_months);
        set(&mut config.linkage.recent_months, &self.recent_months);
        set(&mut config.linkage.measure, &self.measure);
        set(&mut config.binning.width, &self.bin_width);
        set(&mut config.binning.reference_upper, &self.reference_upper);
        if self.top_code.is_some() {
            config.binning.top_code = self.top_code;
        }
        if self.cache_dir.is_some() {
            config.cache.dir = self.cache_dir.clone();
        }
        if self.no_cache {
            config.cache.dir = None;
        }
    }
}

fn validate_positive_f64(s: &str) -> Result<f64, String> {
    let value: f64 = s
        .parse()
        .map_err(|_| format!("'{}' is not a valid number", s))?;
    if value > 0.0 && value.is_finite() {
        Ok(value)
    } else {
        Err(format!("value must be positive, got {}", value))
    }
}

fn validate_positive_usize(s: &str) -> Result<usize, String> {
    let value: usize = s
        .parse()
        .map_err(|_| format!("'{}' is not a valid whole number", s))?;
    if value == 0 {
        Err("value must be at least 1".to_string())
    } else {
        Ok(value)
    }
}

fn validate_positive_u32(s: &str) -> Result<u32, String> {
    validate_positive_usize(s).and_then(|v| u32::try_from(v).map_err(|e| e.to_string()))
}

/// Validator for min_group_size; single-cluster groups would expose a location
fn validate_min_group_size(s: &str) -> Result<usize, String> {
    let value: usize = s
        .parse()
        .map_err(|_| format!("'{}' is not a valid whole number", s))?;
    if value < 2 {
        Err(format!("min_group_size must be at least 2, got {}", value))
    } else {
        Ok(value)
    }
}
