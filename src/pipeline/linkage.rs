//! Cluster linkage: grid cell resolution and exposure windows
//!
//! Each cluster is matched to the nearest grid cell at its interview month.
//! Cluster-level exposures (recent, windowed) and child-level cumulative
//! exposures average the cell's monthly series over a window. Every failure is
//! recorded as an exclusion with a reason; nothing is dropped silently.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;

use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use super::baseline::AnomalyField;
use super::error::{PipelineError, PipelineResult};
use super::grid::{Grid, GridCell, YearMonth};
use super::survey::{ChildRecord, SurveyCluster};
use crate::config::LinkageConfig;

/// Quantity averaged over an exposure window
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExposureMeasure {
    /// Observed 2 m temperature (°C)
    #[default]
    Temperature,
    /// Deviation from the calendar-month baseline
    Anomaly,
}

impl fmt::Display for ExposureMeasure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExposureMeasure::Temperature => write!(f, "temperature"),
            ExposureMeasure::Anomaly => write!(f, "anomaly"),
        }
    }
}

impl std::str::FromStr for ExposureMeasure {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "temperature" | "t2m" => Ok(ExposureMeasure::Temperature),
            "anomaly" => Ok(ExposureMeasure::Anomaly),
            _ => Err(format!(
                "Unknown exposure measure: '{}'. Use 'temperature' or 'anomaly'.",
                s
            )),
        }
    }
}

/// Exposure window family, as referenced by analysis panels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExposureKind {
    Recent,
    Windowed,
    Cumulative,
}

/// Concrete exposure window
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum ExposureDefinition {
    /// Trailing months ending at the interview month
    Recent { months: u32 },
    /// Months immediately preceding the interview month
    Windowed { months: u32 },
    /// Birth month through interview month, per child
    Cumulative,
}

impl ExposureDefinition {
    pub fn kind(&self) -> ExposureKind {
        match self {
            ExposureDefinition::Recent { .. } => ExposureKind::Recent,
            ExposureDefinition::Windowed { .. } => ExposureKind::Windowed,
            ExposureDefinition::Cumulative => ExposureKind::Cumulative,
        }
    }

    /// Resolve a window family against the configured lengths
    pub fn from_kind(kind: ExposureKind, config: &LinkageConfig) -> Self {
        match kind {
            ExposureKind::Recent => ExposureDefinition::Recent {
                months: config.recent_months,
            },
            ExposureKind::Windowed => ExposureDefinition::Windowed {
                months: config.windowed_months,
            },
            ExposureKind::Cumulative => ExposureDefinition::Cumulative,
        }
    }

    /// Stable label used in output tables
    pub fn label(&self) -> String {
        match self {
            ExposureDefinition::Recent { months } => format!("recent_{}m", months),
            ExposureDefinition::Windowed { months } => format!("windowed_{}m", months),
            ExposureDefinition::Cumulative => "cumulative".to_string(),
        }
    }

    /// Window bounds (inclusive) for an interview month
    fn cluster_window(&self, interview: YearMonth) -> Option<(YearMonth, YearMonth)> {
        match *self {
            ExposureDefinition::Recent { months } => {
                Some((interview.offset(1 - months as i64), interview))
            }
            ExposureDefinition::Windowed { months } => {
                Some((interview.offset(-(months as i64)), interview.offset(-1)))
            }
            ExposureDefinition::Cumulative => None,
        }
    }
}

impl fmt::Display for ExposureDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.label())
    }
}

/// Entity an exposure or exclusion refers to
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(tag = "type", content = "id", rename_all = "lowercase")]
pub enum ExposureSubject {
    Cluster(String),
    Child(String),
}

impl fmt::Display for ExposureSubject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExposureSubject::Cluster(id) => write!(f, "cluster {}", id),
            ExposureSubject::Child(id) => write!(f, "child {}", id),
        }
    }
}

/// One linked exposure, traceable to its cell and window
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExposureValue {
    pub subject: ExposureSubject,
    pub cluster_id: String,
    pub definition: ExposureDefinition,
    pub measure: ExposureMeasure,
    pub value: f64,
    /// Flat location index of the originating cell
    pub location: usize,
    pub cell_latitude: f64,
    pub cell_longitude: f64,
    pub window_start: YearMonth,
    pub window_end: YearMonth,
    pub months: usize,
}

/// Why a subject received no exposure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExclusionReason {
    /// Cluster location or interview month outside grid coverage
    OutOfDomain,
    /// Window starts before the first grid month
    InsufficientHistory,
    /// Window contains a month with no value
    MissingValues,
    /// Window ends before it starts (birth after interview)
    InvalidWindow,
    MissingBirthDate,
    /// Child references a cluster absent from the cluster extract
    UnknownCluster,
}

impl fmt::Display for ExclusionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ExclusionReason::OutOfDomain => "out of domain",
            ExclusionReason::InsufficientHistory => "insufficient history",
            ExclusionReason::MissingValues => "missing values",
            ExclusionReason::InvalidWindow => "invalid window",
            ExclusionReason::MissingBirthDate => "missing birth date",
            ExclusionReason::UnknownCluster => "unknown cluster",
        };
        write!(f, "{}", s)
    }
}

/// Recorded exclusion of a subject from one (or every) exposure definition
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Exclusion {
    pub subject: ExposureSubject,
    /// None when the subject is excluded from every definition
    pub definition: Option<ExposureDefinition>,
    pub reason: ExclusionReason,
    pub detail: String,
}

/// A cluster resolved to a grid cell, with its cluster-level exposures
#[derive(Debug, Clone, PartialEq)]
pub struct LinkedCluster {
    pub cluster: SurveyCluster,
    pub cell: GridCell,
    pub exposures: Vec<ExposureValue>,
}

impl LinkedCluster {
    pub fn exposure(&self, definition: ExposureDefinition) -> Option<&ExposureValue> {
        self.exposures.iter().find(|e| e.definition == definition)
    }
}

/// Output of the linkage step
#[derive(Debug, Clone, Default)]
pub struct LinkageResult {
    /// Clusters inside grid coverage
    pub clusters: Vec<LinkedCluster>,
    /// Child-level cumulative exposures
    pub child_exposures: Vec<ExposureValue>,
    pub exclusions: Vec<Exclusion>,
}

impl LinkageResult {
    pub fn cluster(&self, cluster_id: &str) -> Option<&LinkedCluster> {
        self.clusters.iter().find(|c| c.cluster.cluster_id == cluster_id)
    }

    /// Number of recorded exclusions per reason
    pub fn exclusion_counts(&self) -> BTreeMap<ExclusionReason, usize> {
        let mut counts = BTreeMap::new();
        for exclusion in &self.exclusions {
            *counts.entry(exclusion.reason).or_insert(0) += 1;
        }
        counts
    }

    /// Total number of exposure values produced
    pub fn exposure_count(&self) -> usize {
        self.clusters.iter().map(|c| c.exposures.len()).sum::<usize>() + self.child_exposures.len()
    }
}

/// Window resolution failure
struct WindowFailure {
    reason: ExclusionReason,
    detail: String,
}

/// Mean of a location's series over `[start, end]`; every month must be defined
fn window_mean(
    grid: &Grid,
    series: &[Option<f64>],
    start: YearMonth,
    end: YearMonth,
) -> Result<(f64, usize), WindowFailure> {
    if end < start {
        return Err(WindowFailure {
            reason: ExclusionReason::InvalidWindow,
            detail: format!("window {} to {} ends before it starts", start, end),
        });
    }
    let t_start = grid.month_position(start).ok_or_else(|| {
        let history = PipelineError::InsufficientHistory {
            window_start: start,
            coverage_start: grid.start(),
        };
        WindowFailure {
            reason: ExclusionReason::InsufficientHistory,
            detail: history.to_string(),
        }
    })?;
    let t_end = grid.month_position(end).ok_or_else(|| WindowFailure {
        reason: ExclusionReason::OutOfDomain,
        detail: format!("window end {} is after grid coverage ends at {}", end, grid.end()),
    })?;

    let window = &series[t_start..=t_end];
    let missing = window.iter().filter(|v| v.is_none()).count();
    if missing > 0 {
        return Err(WindowFailure {
            reason: ExclusionReason::MissingValues,
            detail: format!("{} of {} months between {} and {} have no value", missing, window.len(), start, end),
        });
    }
    let sum: f64 = window.iter().flatten().sum();
    Ok((sum / window.len() as f64, window.len()))
}

/// Monthly series an exposure averages over
#[derive(Clone, Copy)]
struct SeriesSource<'a> {
    grid: &'a Grid,
    /// Set when the measure is the anomaly
    anomalies: Option<&'a AnomalyField>,
}

impl<'a> SeriesSource<'a> {
    fn series(&self, location: usize) -> &'a [Option<f64>] {
        match self.anomalies {
            Some(field) => field.series(location),
            None => self.grid.series(location),
        }
    }
}

/// Per-cluster outcome before children are linked
enum ClusterOutcome {
    Linked(LinkedCluster, Vec<Exclusion>),
    OutOfDomain(Exclusion),
}

fn link_cluster(
    source: SeriesSource<'_>,
    cluster: &SurveyCluster,
    definitions: &[ExposureDefinition],
    measure: ExposureMeasure,
) -> ClusterOutcome {
    let grid = source.grid;
    let interview = YearMonth::from_date(cluster.interview_date);
    let subject = ExposureSubject::Cluster(cluster.cluster_id.clone());

    let cell = match grid.lookup_nearest(cluster.latitude, cluster.longitude, interview) {
        Ok(cell) => cell,
        Err(e) => {
            return ClusterOutcome::OutOfDomain(Exclusion {
                subject,
                definition: None,
                reason: ExclusionReason::OutOfDomain,
                detail: e.to_string(),
            })
        }
    };

    let series = source.series(cell.location);
    let mut exposures = Vec::new();
    let mut exclusions = Vec::new();

    for definition in definitions {
        let Some((start, end)) = definition.cluster_window(interview) else {
            continue;
        };
        match window_mean(grid, series, start, end) {
            Ok((value, months)) => exposures.push(ExposureValue {
                subject: subject.clone(),
                cluster_id: cluster.cluster_id.clone(),
                definition: *definition,
                measure,
                value,
                location: cell.location,
                cell_latitude: cell.latitude,
                cell_longitude: cell.longitude,
                window_start: start,
                window_end: end,
                months,
            }),
            Err(failure) => exclusions.push(Exclusion {
                subject: subject.clone(),
                definition: Some(*definition),
                reason: failure.reason,
                detail: failure.detail,
            }),
        }
    }

    ClusterOutcome::Linked(
        LinkedCluster {
            cluster: cluster.clone(),
            cell,
            exposures,
        },
        exclusions,
    )
}

fn link_child(
    source: SeriesSource<'_>,
    child: &ChildRecord,
    linked: &HashMap<&str, &LinkedCluster>,
    known_clusters: &HashSet<&str>,
    measure: ExposureMeasure,
) -> Option<Result<ExposureValue, Exclusion>> {
    let subject = ExposureSubject::Child(child.child_id.clone());
    let exclusion = |reason, detail: String| Exclusion {
        subject: subject.clone(),
        definition: Some(ExposureDefinition::Cumulative),
        reason,
        detail,
    };

    let Some(cluster) = linked.get(child.cluster_id.as_str()) else {
        if known_clusters.contains(child.cluster_id.as_str()) {
            // Cluster already excluded as out of domain
            return None;
        }
        return Some(Err(exclusion(
            ExclusionReason::UnknownCluster,
            format!("cluster '{}' not found in the cluster extract", child.cluster_id),
        )));
    };

    let Some(birth_date) = child.birth_date else {
        return Some(Err(exclusion(
            ExclusionReason::MissingBirthDate,
            "birth date is missing".to_string(),
        )));
    };

    let start = YearMonth::from_date(birth_date);
    let end = YearMonth::from_date(cluster.cluster.interview_date);
    let series = source.series(cluster.cell.location);

    Some(match window_mean(source.grid, series, start, end) {
        Ok((value, months)) => Ok(ExposureValue {
            subject: subject.clone(),
            cluster_id: child.cluster_id.clone(),
            definition: ExposureDefinition::Cumulative,
            measure,
            value,
            location: cluster.cell.location,
            cell_latitude: cluster.cell.latitude,
            cell_longitude: cluster.cell.longitude,
            window_start: start,
            window_end: end,
            months,
        }),
        Err(failure) => Err(exclusion(failure.reason, failure.detail)),
    })
}

/// Link clusters and children to the grid under every exposure definition.
///
/// `anomalies` is required when the configured measure is the anomaly.
/// Children whose cluster was excluded as out of domain are not excluded a
/// second time; the cluster exclusion covers them.
pub fn link_clusters(
    grid: &Grid,
    anomalies: Option<&AnomalyField>,
    clusters: &[SurveyCluster],
    children: &[ChildRecord],
    config: &LinkageConfig,
) -> PipelineResult<LinkageResult> {
    let measure = config.measure;
    let source = match (measure, anomalies) {
        (ExposureMeasure::Temperature, _) => SeriesSource { grid, anomalies: None },
        (ExposureMeasure::Anomaly, Some(field)) => SeriesSource {
            grid,
            anomalies: Some(field),
        },
        (ExposureMeasure::Anomaly, None) => {
            return Err(PipelineError::Ingestion(
                "anomaly exposures requested but no anomaly field was computed".to_string(),
            ))
        }
    };

    let definitions = [
        ExposureDefinition::from_kind(ExposureKind::Recent, config),
        ExposureDefinition::from_kind(ExposureKind::Windowed, config),
    ];

    let outcomes: Vec<ClusterOutcome> = clusters
        .par_iter()
        .map(|cluster| link_cluster(source, cluster, &definitions, measure))
        .collect();

    let mut result = LinkageResult::default();
    for outcome in outcomes {
        match outcome {
            ClusterOutcome::Linked(linked, exclusions) => {
                result.clusters.push(linked);
                result.exclusions.extend(exclusions);
            }
            ClusterOutcome::OutOfDomain(exclusion) => {
                tracing::warn!(subject = %exclusion.subject, detail = %exclusion.detail, "cluster excluded");
                result.exclusions.push(exclusion);
            }
        }
    }

    let linked: HashMap<&str, &LinkedCluster> = result
        .clusters
        .iter()
        .map(|c| (c.cluster.cluster_id.as_str(), c))
        .collect();
    let known: HashSet<&str> = clusters.iter().map(|c| c.cluster_id.as_str()).collect();

    let child_outcomes: Vec<Option<Result<ExposureValue, Exclusion>>> = children
        .par_iter()
        .map(|child| link_child(source, child, &linked, &known, measure))
        .collect();

    let mut child_exposures = Vec::new();
    let mut child_exclusions = Vec::new();
    for outcome in child_outcomes.into_iter().flatten() {
        match outcome {
            Ok(exposure) => child_exposures.push(exposure),
            Err(exclusion) => child_exclusions.push(exclusion),
        }
    }
    result.child_exposures = child_exposures;
    result.exclusions.extend(child_exclusions);

    if !result.exclusions.is_empty() {
        tracing::warn!(
            exclusions = result.exclusions.len(),
            counts = ?result.exclusion_counts(),
            "linkage recorded exclusions"
        );
    }
    tracing::info!(
        clusters = result.clusters.len(),
        exposures = result.exposure_count(),
        "linkage complete"
    );

    Ok(result)
}
