//! Typed pipeline stages
//!
//! The climate stage turns a gridded extract into the grid, its anomalies and
//! the public climate tables. The survey stage links survey extracts to that
//! grid and builds the public analysis tables. `publish` routes public tables
//! through the export gate and identifying tables to the local directory.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use polars::prelude::*;
use serde::Serialize;

use super::aggregate::{aggregate_tables, build_child_analysis, AnalysisTables, ChildAnalysisRow};
use super::baseline::{compute_anomalies, compute_baseline, AnomalyField};
use super::binning::TemperatureBinning;
use super::cache::{ArtifactCache, CacheKey};
use super::grid::Grid;
use super::indicators::response_fields;
use super::linkage::{link_clusters, ExposureMeasure, LinkageResult};
use super::loader::{load_frame, load_grid_extract};
use super::resample::resample_annual;
use super::survey::{read_children, read_clusters};
use super::temporal::{global_monthly_stats, monthly_anomaly_matrix};
use crate::config::{BaselineConfig, GridIngestConfig, PipelineConfig, SpatialConfig, TemporalConfig};
use crate::report::gate::{ExportGate, ExportManifest, GateConfig, PublicTable};
use crate::report::local::LocalWriter;
use crate::report::tables::{GLOBAL_MONTHLY_STATS, MONTHLY_ANOMALY_MATRIX, SPATIAL_ANOMALIES};

/// Input files of a run
#[derive(Debug, Clone)]
pub struct PipelineInputs {
    pub climate: PathBuf,
    pub clusters: Option<PathBuf>,
    pub children: Option<PathBuf>,
}

/// Settings that shape the climate tables, hashed into the cache key
#[derive(Serialize)]
struct ClimateSettings<'a> {
    grid: &'a GridIngestConfig,
    baseline: &'a BaselineConfig,
    temporal: &'a TemporalConfig,
    spatial: &'a SpatialConfig,
    version: &'static str,
}

/// Counts reported by the climate stage
#[derive(Debug, Clone, Default, Serialize)]
pub struct ClimateSummary {
    pub locations: usize,
    pub months: usize,
    pub insufficient_baseline: usize,
    pub cache_hit: bool,
    pub spatial_years: (i32, i32),
}

/// Output of the climate stage
pub struct ClimateStage {
    pub grid: Grid,
    /// None when the tables came from the cache and no consumer needs anomalies
    pub anomalies: Option<AnomalyField>,
    /// Public climate tables by name
    pub tables: BTreeMap<String, DataFrame>,
    pub summary: ClimateSummary,
}

fn spatial_years(config: &SpatialConfig, grid: &Grid) -> (i32, i32) {
    let last = grid.end().year();
    let end = config.end_year.unwrap_or(last);
    let start = config.start_year.unwrap_or(end);
    (start, end)
}

/// Baseline, anomalies and the derived climate tables
fn compute_climate(grid: &Grid, config: &PipelineConfig) -> Result<(AnomalyField, BTreeMap<String, DataFrame>, usize)> {
    let baseline = compute_baseline(grid, &config.baseline).context("Failed to compute baseline")?;
    let insufficient = baseline.insufficient_cells().len();
    let anomalies = compute_anomalies(grid, &baseline)?;

    let stats = global_monthly_stats(grid, &anomalies, config.temporal.rolling_window);
    let matrix = monthly_anomaly_matrix(grid, &anomalies);
    let (start, end) = spatial_years(&config.spatial, grid);
    let coarse = resample_annual(grid, &anomalies, config.spatial.resolution, start..=end);

    let mut tables = BTreeMap::new();
    tables.insert(GLOBAL_MONTHLY_STATS.to_string(), stats.to_frame()?);
    tables.insert(MONTHLY_ANOMALY_MATRIX.to_string(), matrix.to_frame()?);
    tables.insert(SPATIAL_ANOMALIES.to_string(), coarse.to_frame()?);

    Ok((anomalies, tables, insufficient))
}

/// Ingest the gridded extract and build the climate tables.
///
/// With a cache, the tables are reused when the extract bytes and climate
/// settings are unchanged. Anomalies are still computed when `need_anomalies`
/// is set.
pub fn run_climate_stage(
    extract: &Path,
    config: &PipelineConfig,
    cache: Option<&ArtifactCache>,
    need_anomalies: bool,
) -> Result<ClimateStage> {
    let grid = load_grid_extract(extract, &config.grid)?;
    let mut summary = ClimateSummary {
        locations: grid.n_locations(),
        months: grid.n_months(),
        spatial_years: spatial_years(&config.spatial, &grid),
        ..Default::default()
    };

    let key = match cache {
        Some(_) => {
            let settings = ClimateSettings {
                grid: &config.grid,
                baseline: &config.baseline,
                temporal: &config.temporal,
                spatial: &config.spatial,
                version: env!("CARGO_PKG_VERSION"),
            };
            Some(CacheKey::for_extract(extract, &settings)?)
        }
        None => None,
    };

    if let (Some(cache), Some(key)) = (cache, key.as_ref()) {
        if let Some(tables) = cache.load(key)? {
            summary.cache_hit = true;
            let anomalies = if need_anomalies {
                let baseline = compute_baseline(&grid, &config.baseline).context("Failed to compute baseline")?;
                summary.insufficient_baseline = baseline.insufficient_cells().len();
                Some(compute_anomalies(&grid, &baseline)?)
            } else {
                None
            };
            tracing::info!(key = %key, "climate tables loaded from cache");
            return Ok(ClimateStage {
                grid,
                anomalies,
                tables,
                summary,
            });
        }
    }

    let (anomalies, mut tables, insufficient) = compute_climate(&grid, config)?;
    summary.insufficient_baseline = insufficient;

    if let (Some(cache), Some(key)) = (cache, key.as_ref()) {
        if let Err(e) = cache.store(key, &mut tables) {
            tracing::warn!(error = %e, "failed to store climate tables in cache");
        }
    }

    tracing::info!(
        locations = summary.locations,
        months = summary.months,
        defined_anomalies = anomalies.defined_count(),
        "climate stage complete"
    );

    Ok(ClimateStage {
        grid,
        anomalies: Some(anomalies),
        tables,
        summary,
    })
}

/// Counts reported by the survey stage
#[derive(Debug, Clone, Default, Serialize)]
pub struct SurveySummary {
    pub clusters_read: usize,
    pub clusters_filtered: usize,
    pub children_read: usize,
    pub children_filtered: usize,
    pub clusters_linked: usize,
    pub exposures: usize,
    pub exclusions: usize,
    pub analysis_rows: usize,
    pub suppressed_rows: usize,
}

/// Output of the survey stage
pub struct SurveyStage {
    pub linkage: LinkageResult,
    pub child_rows: Vec<ChildAnalysisRow>,
    pub tables: AnalysisTables,
    pub summary: SurveySummary,
}

/// Link survey extracts to the grid and build the analysis tables
pub fn run_survey_stage(
    clusters_path: &Path,
    children_path: &Path,
    climate: &ClimateStage,
    config: &PipelineConfig,
) -> Result<SurveyStage> {
    let cluster_frame = load_frame(clusters_path)?;
    let cluster_set = read_clusters(&cluster_frame, &config.survey)
        .with_context(|| format!("Invalid cluster extract: {}", clusters_path.display()))?;

    let fields = response_fields(&config.panels);
    let child_frame = load_frame(children_path)?;
    let mut children = read_children(&child_frame, &fields, &config.survey.covariates)
        .with_context(|| format!("Invalid child extract: {}", children_path.display()))?;
    let children_read = children.len();
    children.retain(|c| !cluster_set.filtered_out.contains(&c.cluster_id));

    let linkage = link_clusters(
        &climate.grid,
        climate.anomalies.as_ref(),
        &cluster_set.clusters,
        &children,
        &config.linkage,
    )?;

    let binning = TemperatureBinning::new(&config.binning);
    let child_rows = build_child_analysis(&linkage, &children, &config.panels, &binning, &config.linkage);
    let tables = aggregate_tables(&child_rows, &linkage, &binning, &config.export);

    let summary = SurveySummary {
        clusters_read: cluster_set.clusters.len() + cluster_set.filtered_out.len(),
        clusters_filtered: cluster_set.filtered_out.len(),
        children_read,
        children_filtered: children_read - children.len(),
        clusters_linked: linkage.clusters.len(),
        exposures: linkage.exposure_count(),
        exclusions: linkage.exclusions.len(),
        analysis_rows: child_rows.len(),
        suppressed_rows: tables.total_suppressed(),
    };

    tracing::info!(
        clusters = summary.clusters_linked,
        children = children.len(),
        rows = summary.analysis_rows,
        "survey stage complete"
    );

    Ok(SurveyStage {
        linkage,
        child_rows,
        tables,
        summary,
    })
}

/// Stage every public table through the gate, write local-only tables, then commit
pub fn publish(climate: &ClimateStage, survey: Option<&SurveyStage>, config: &PipelineConfig) -> Result<ExportManifest> {
    let export = &config.export;
    let mut gate = ExportGate::new(
        &export.public_dir,
        &export.local_dir,
        GateConfig {
            min_group_size: export.min_group_size,
            format: export.format,
        },
    )?;

    for (name, frame) in &climate.tables {
        gate.stage_climate_frame(name, frame.clone())?;
    }

    if let Some(survey) = survey {
        gate.stage(survey.tables.indicator_by_bin.as_slice())?;
        gate.stage(survey.tables.exposure_summary.as_slice())?;
        gate.stage(survey.tables.country_distribution.as_slice())?;
        gate.stage(survey.tables.cluster_summary.as_slice())?;

        let local = LocalWriter::new(&export.local_dir, export.format)?;
        local.write_cluster_exposures(&survey.linkage)?;
        local.write_child_analysis(&survey.child_rows)?;
        local.write_exclusions(&survey.linkage)?;
    }

    Ok(gate.commit()?)
}

/// Everything a finished run reports
#[derive(Debug)]
pub struct RunReport {
    pub climate: ClimateSummary,
    pub survey: Option<SurveySummary>,
    pub manifest: ExportManifest,
}

/// Steps reported to a [`StageObserver`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    Climate,
    Survey,
    Export,
}

/// Hooks called as a run moves through its steps; all default to no-ops
pub trait StageObserver {
    fn step_started(&mut self, _step: Step) {}
    fn climate_finished(&mut self, _summary: &ClimateSummary) {}
    fn survey_finished(&mut self, _stage: &SurveyStage) {}
    fn export_finished(&mut self, _manifest: &ExportManifest) {}
    fn step_failed(&mut self, _step: Step) {}
}

impl StageObserver for () {}

/// Run every stage in order
pub fn run_pipeline(inputs: &PipelineInputs, config: &PipelineConfig) -> Result<RunReport> {
    run_pipeline_with(inputs, config, &mut ())
}

/// Run every stage in order, reporting progress to `observer`
pub fn run_pipeline_with<O: StageObserver + ?Sized>(
    inputs: &PipelineInputs,
    config: &PipelineConfig,
    observer: &mut O,
) -> Result<RunReport> {
    config.validate()?;
    let survey_inputs = match (&inputs.clusters, &inputs.children) {
        (Some(clusters), Some(children)) => Some((clusters, children)),
        (None, None) => None,
        _ => anyhow::bail!("Cluster and child extracts must be given together"),
    };
    let cache = config.cache.dir.as_ref().map(ArtifactCache::new);
    let need_anomalies = config.linkage.measure == ExposureMeasure::Anomaly;

    observer.step_started(Step::Climate);
    let climate = run_climate_stage(&inputs.climate, config, cache.as_ref(), need_anomalies)
        .inspect_err(|_| observer.step_failed(Step::Climate))?;
    observer.climate_finished(&climate.summary);

    let survey = match survey_inputs {
        Some((clusters, children)) => {
            observer.step_started(Step::Survey);
            let stage = run_survey_stage(clusters, children, &climate, config)
                .inspect_err(|_| observer.step_failed(Step::Survey))?;
            observer.survey_finished(&stage);
            Some(stage)
        }
        None => None,
    };

    observer.step_started(Step::Export);
    let manifest = publish(&climate, survey.as_ref(), config).inspect_err(|_| observer.step_failed(Step::Export))?;
    observer.export_finished(&manifest);

    Ok(RunReport {
        climate: climate.summary,
        survey: survey.map(|s| s.summary),
        manifest,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Recorder {
        events: Vec<String>,
    }

    impl StageObserver for Recorder {
        fn step_started(&mut self, step: Step) {
            self.events.push(format!("start {:?}", step));
        }

        fn step_failed(&mut self, step: Step) {
            self.events.push(format!("failed {:?}", step));
        }
    }

    #[test]
    fn test_failed_step_is_reported() {
        let dir = tempfile::TempDir::new().unwrap();
        let mut config = PipelineConfig::with_default_panels();
        config.export.public_dir = dir.path().join("public");
        config.export.local_dir = dir.path().join("local");
        let inputs = PipelineInputs {
            climate: dir.path().join("missing.csv"),
            clusters: None,
            children: None,
        };

        let mut recorder = Recorder::default();
        assert!(run_pipeline_with(&inputs, &config, &mut recorder).is_err());
        assert_eq!(recorder.events, vec!["start Climate", "failed Climate"]);
        assert!(!dir.path().join("public").exists());
    }

    #[test]
    fn test_unpaired_survey_extract_rejected() {
        let inputs = PipelineInputs {
            climate: PathBuf::from("era5.csv"),
            clusters: Some(PathBuf::from("clusters.csv")),
            children: None,
        };
        let mut recorder = Recorder::default();
        let err = run_pipeline_with(&inputs, &PipelineConfig::with_default_panels(), &mut recorder).unwrap_err();
        assert!(err.to_string().contains("together"));
        assert!(recorder.events.is_empty());
    }
}
