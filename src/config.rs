//! Pipeline configuration
//!
//! Every field has a default so a JSON config file only needs to name the
//! settings it changes. CLI flags override the loaded values.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};

use crate::pipeline::grid::TemperatureUnit;
use crate::pipeline::indicators::{default_panels, AnalysisPanel};
use crate::pipeline::linkage::ExposureMeasure;

/// Grid extract ingestion settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GridIngestConfig {
    /// Name of the temperature column in the extract
    pub value_column: String,
    /// Declared unit of the value column
    pub units: TemperatureUnit,
    /// Declared grid resolution in degrees, checked against both axes
    pub resolution: Option<f64>,
    /// Relabel 0..360 longitudes to -180..180
    pub normalize_longitude: bool,
}

impl Default for GridIngestConfig {
    fn default() -> Self {
        Self {
            value_column: "t2m".to_string(),
            units: TemperatureUnit::Kelvin,
            resolution: None,
            normalize_longitude: true,
        }
    }
}

/// Climatological reference period
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BaselineConfig {
    pub start_year: i32,
    pub end_year: i32,
    /// Minimum non-null reference years per location and calendar month
    pub min_years: usize,
}

impl Default for BaselineConfig {
    fn default() -> Self {
        Self {
            start_year: 1991,
            end_year: 2020,
            min_years: 20,
        }
    }
}

/// Global time-series settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TemporalConfig {
    /// Trailing rolling window, in months
    pub rolling_window: usize,
}

impl Default for TemporalConfig {
    fn default() -> Self {
        Self { rolling_window: 3 }
    }
}

/// Map-scale resampling settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SpatialConfig {
    /// Target resolution in degrees
    pub resolution: f64,
    /// First year exported; defaults to the last year of the extract
    pub start_year: Option<i32>,
    /// Last year exported; defaults to the last year of the extract
    pub end_year: Option<i32>,
}

impl Default for SpatialConfig {
    fn default() -> Self {
        Self {
            resolution: 0.5,
            start_year: None,
            end_year: None,
        }
    }
}

/// Survey ingestion settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SurveyConfig {
    /// Keep only these countries (after alias resolution); empty keeps all
    pub study_countries: Vec<String>,
    /// Alternative spellings mapped onto canonical country names
    pub country_aliases: BTreeMap<String, String>,
    /// Optional covariate fields carried on child records
    pub covariates: Vec<String>,
}

impl Default for SurveyConfig {
    fn default() -> Self {
        let study_countries = [
            "Georgia",
            "Gambia",
            "State of Palestine",
            "Madagascar",
            "Malawi",
            "Sierra Leone",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect();

        let mut country_aliases = BTreeMap::new();
        country_aliases.insert("The Gambia".to_string(), "Gambia".to_string());

        let covariates = ["agech", "sexch", "windex5", "urban", "edlevelmom"]
            .iter()
            .map(|s| s.to_string())
            .collect();

        Self {
            study_countries,
            country_aliases,
            covariates,
        }
    }
}

/// Exposure window settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LinkageConfig {
    /// Trailing months ending at (and including) the interview month
    pub recent_months: u32,
    /// Months immediately preceding the interview month
    pub windowed_months: u32,
    /// Average observed temperature or anomaly
    pub measure: ExposureMeasure,
}

impl Default for LinkageConfig {
    fn default() -> Self {
        Self {
            recent_months: 1,
            windowed_months: 6,
            measure: ExposureMeasure::Temperature,
        }
    }
}

/// Temperature binning settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BinningConfig {
    /// Bin width in °C
    pub width: f64,
    /// Upper edge of the open reference bin (`< reference_upper`)
    pub reference_upper: f64,
    /// Lower edge of an optional open top-coded bin
    pub top_code: Option<f64>,
}

impl Default for BinningConfig {
    fn default() -> Self {
        Self {
            width: 1.0,
            reference_upper: 26.0,
            top_code: None,
        }
    }
}

/// Output table format
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    #[default]
    Csv,
    Parquet,
}

impl OutputFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            OutputFormat::Csv => "csv",
            OutputFormat::Parquet => "parquet",
        }
    }
}

impl std::str::FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "csv" => Ok(OutputFormat::Csv),
            "parquet" => Ok(OutputFormat::Parquet),
            _ => Err(format!("Unknown output format: '{}'. Use 'csv' or 'parquet'.", s)),
        }
    }
}

/// Export settings for public and local-only artifacts
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExportConfig {
    /// Directory for public artifacts, written only by the export gate
    pub public_dir: PathBuf,
    /// Directory for local-only artifacts that retain identifying data
    pub local_dir: PathBuf,
    /// Minimum number of distinct clusters behind any public row
    pub min_group_size: usize,
    /// Published exposure quartiles are rounded to a multiple of this (°C)
    pub quantile_precision: f64,
    pub format: OutputFormat,
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            public_dir: PathBuf::from("public"),
            local_dir: PathBuf::from("local"),
            min_group_size: 5,
            quantile_precision: 0.5,
            format: OutputFormat::Csv,
        }
    }
}

/// Artifact cache settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Cache root; None disables caching
    pub dir: Option<PathBuf>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            dir: Some(PathBuf::from(".climalink-cache")),
        }
    }
}

/// Complete pipeline configuration
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub grid: GridIngestConfig,
    pub baseline: BaselineConfig,
    pub temporal: TemporalConfig,
    pub spatial: SpatialConfig,
    pub survey: SurveyConfig,
    pub linkage: LinkageConfig,
    pub binning: BinningConfig,
    pub panels: Vec<AnalysisPanel>,
    pub export: ExportConfig,
    pub cache: CacheConfig,
}

impl PipelineConfig {
    /// Default configuration with the standard discipline and ECDI panels
    pub fn with_default_panels() -> Self {
        Self {
            panels: default_panels(),
            ..Default::default()
        }
    }

    /// Load a JSON config file; panels default to the standard set when omitted
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        let mut config: PipelineConfig = serde_json::from_str(&text)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;
        if config.panels.is_empty() {
            config.panels = default_panels();
        }
        Ok(config)
    }

    /// Reject settings that cannot produce a meaningful run
    pub fn validate(&self) -> Result<()> {
        if self.baseline.start_year > self.baseline.end_year {
            bail!(
                "Baseline start year {} is after end year {}",
                self.baseline.start_year,
                self.baseline.end_year
            );
        }
        let period_years = (self.baseline.end_year - self.baseline.start_year + 1) as usize;
        if self.baseline.min_years == 0 || self.baseline.min_years > period_years {
            bail!(
                "Minimum baseline years must be between 1 and {} (the reference period length), got {}",
                period_years,
                self.baseline.min_years
            );
        }
        if self.temporal.rolling_window == 0 {
            bail!("Rolling window must be at least 1 month");
        }
        if !(self.spatial.resolution > 0.0) {
            bail!("Spatial resolution must be positive, got {}", self.spatial.resolution);
        }
        if let (Some(start), Some(end)) = (self.spatial.start_year, self.spatial.end_year) {
            if start > end {
                bail!("Spatial start year {} is after end year {}", start, end);
            }
        }
        if self.linkage.recent_months == 0 || self.linkage.windowed_months == 0 {
            bail!("Exposure windows must span at least 1 month");
        }
        if !(self.binning.width > 0.0) {
            bail!("Bin width must be positive, got {}", self.binning.width);
        }
        if let Some(top) = self.binning.top_code {
            if top <= self.binning.reference_upper {
                bail!(
                    "Top-coded bin edge {} must lie above the reference edge {}",
                    top,
                    self.binning.reference_upper
                );
            }
        }
        if self.export.min_group_size < 2 {
            bail!(
                "Minimum group size must be at least 2 clusters, got {}",
                self.export.min_group_size
            );
        }
        if !(self.export.quantile_precision > 0.0) {
            bail!(
                "Quantile precision must be positive, got {}",
                self.export.quantile_precision
            );
        }
        Ok(())
    }
}
