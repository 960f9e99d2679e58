//! Pipeline module - climate ingestion, anomalies, linkage and aggregation

pub mod aggregate;
pub mod baseline;
pub mod binning;
pub mod cache;
pub mod error;
pub mod grid;
pub mod indicators;
pub mod linkage;
pub mod loader;
pub mod resample;
pub mod stages;
pub mod survey;
pub mod temporal;

pub use aggregate::{aggregate_tables, build_child_analysis, AnalysisTables, ChildAnalysisRow, PublicAggregateRow};
pub use baseline::{compute_anomalies, compute_baseline, AnomalyField, Baseline, BaselineValue};
pub use binning::{TemperatureBin, TemperatureBinning};
pub use error::{PipelineError, PipelineResult};
pub use grid::{Grid, GridCell, RegularAxis, TemperatureUnit, YearMonth};
pub use indicators::{default_panels, AnalysisPanel, IndicatorRule};
pub use linkage::{
    link_clusters, Exclusion, ExclusionReason, ExposureDefinition, ExposureKind, ExposureMeasure, ExposureValue,
    LinkageResult,
};
pub use loader::*;
pub use resample::{resample_annual, CoarseCell};
pub use stages::{publish, run_climate_stage, run_pipeline, run_survey_stage, PipelineInputs, RunReport};
pub use survey::{read_children, read_clusters, ChildRecord, SurveyCluster};
pub use temporal::{global_monthly_stats, monthly_anomaly_matrix, rolling_mean, GlobalMonthlyStats};
