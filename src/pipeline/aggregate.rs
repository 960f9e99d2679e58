//! Child-level analysis rows and their public aggregates
//!
//! Public rows are keyed by country, bin, exposure and indicator only. Every
//! row carries the number of distinct source clusters behind it, and rows
//! below the minimum group size are suppressed here, before they are staged.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use serde::Serialize;

use super::binning::{TemperatureBin, TemperatureBinning};
use super::indicators::AnalysisPanel;
use super::linkage::{ExposureDefinition, ExposureSubject, LinkageResult, LinkedCluster};
use super::survey::ChildRecord;
use crate::config::{ExportConfig, LinkageConfig};

const Z_95: f64 = 1.96;

/// One child analysed under one panel. Local-only: carries identifiers.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChildAnalysisRow {
    pub child_id: String,
    pub cluster_id: String,
    pub country: String,
    pub panel: String,
    pub exposure: ExposureDefinition,
    pub exposure_value: f64,
    pub bin: TemperatureBin,
    pub indicators: BTreeMap<String, Option<bool>>,
    pub covariates: BTreeMap<String, Option<String>>,
}

/// Prevalence of an indicator within a country and temperature bin
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PublicAggregateRow {
    pub country: String,
    pub temperature_bin: String,
    pub is_reference_bin: bool,
    pub exposure: String,
    pub indicator: String,
    pub prevalence: f64,
    pub n_children: usize,
    /// Distinct source clusters
    pub group_size: usize,
}

/// Mean exposure with a normal-approximation 95% interval, by indicator status
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IndicatorExposureSummary {
    pub indicator: String,
    /// "positive" or "negative"
    pub status: String,
    pub exposure: String,
    pub mean_exposure: f64,
    pub ci_lower: f64,
    pub ci_upper: f64,
    pub n_children: usize,
    pub group_size: usize,
}

/// Distribution of child exposures within a country. Quartiles are rounded
/// to the reporting precision so no published value is a single cell's exposure.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CountryExposureDistribution {
    pub country: String,
    pub exposure: String,
    pub q1: f64,
    pub median: f64,
    pub q3: f64,
    pub mean: f64,
    pub n_children: usize,
    pub group_size: usize,
}

/// Number of linked clusters per country
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClusterSummaryRow {
    pub country: String,
    pub n_clusters: usize,
}

/// Public analysis tables plus the count of suppressed rows per table
#[derive(Debug, Clone, Default)]
pub struct AnalysisTables {
    pub indicator_by_bin: Vec<PublicAggregateRow>,
    pub exposure_summary: Vec<IndicatorExposureSummary>,
    pub country_distribution: Vec<CountryExposureDistribution>,
    pub cluster_summary: Vec<ClusterSummaryRow>,
    pub suppressed: BTreeMap<String, usize>,
}

impl AnalysisTables {
    pub fn total_suppressed(&self) -> usize {
        self.suppressed.values().sum()
    }
}

/// Exposure for a child under a panel's window family
fn panel_exposure(
    child: &ChildRecord,
    cluster: &LinkedCluster,
    definition: ExposureDefinition,
    child_exposures: &HashMap<&str, f64>,
) -> Option<f64> {
    match definition {
        ExposureDefinition::Cumulative => child_exposures.get(child.child_id.as_str()).copied(),
        _ => cluster.exposure(definition).map(|e| e.value),
    }
}

/// Join children to their linked exposures, bins and indicators.
///
/// One row per (child, panel) with a defined exposure. Children without a
/// linked cluster or without the panel's exposure produce no row; their
/// exclusions are already recorded by linkage.
pub fn build_child_analysis(
    linkage: &LinkageResult,
    children: &[ChildRecord],
    panels: &[AnalysisPanel],
    binning: &TemperatureBinning,
    config: &LinkageConfig,
) -> Vec<ChildAnalysisRow> {
    let clusters: HashMap<&str, &LinkedCluster> = linkage
        .clusters
        .iter()
        .map(|c| (c.cluster.cluster_id.as_str(), c))
        .collect();
    let child_exposures: HashMap<&str, f64> = linkage
        .child_exposures
        .iter()
        .filter_map(|e| match &e.subject {
            ExposureSubject::Child(id) => Some((id.as_str(), e.value)),
            _ => None,
        })
        .collect();

    let mut rows = Vec::new();
    for child in children {
        let Some(cluster) = clusters.get(child.cluster_id.as_str()) else {
            continue;
        };
        for panel in panels {
            let definition = ExposureDefinition::from_kind(panel.exposure, config);
            let Some(value) = panel_exposure(child, cluster, definition, &child_exposures) else {
                continue;
            };
            let Some(bin) = binning.assign(value) else {
                continue;
            };
            let indicators = panel
                .indicators
                .iter()
                .map(|rule| (rule.name.clone(), rule.evaluate(&child.responses)))
                .collect();
            rows.push(ChildAnalysisRow {
                child_id: child.child_id.clone(),
                cluster_id: child.cluster_id.clone(),
                country: cluster.cluster.country.clone(),
                panel: panel.name.clone(),
                exposure: definition,
                exposure_value: value,
                bin,
                indicators,
                covariates: child.covariates.clone(),
            });
        }
    }
    rows
}

#[derive(Default)]
struct Accumulator<'a> {
    values: Vec<f64>,
    clusters: BTreeSet<&'a str>,
}

impl<'a> Accumulator<'a> {
    fn push(&mut self, value: f64, cluster_id: &'a str) {
        self.values.push(value);
        self.clusters.insert(cluster_id);
    }

    fn mean(&self) -> f64 {
        self.values.iter().sum::<f64>() / self.values.len() as f64
    }

    /// Sample standard deviation; zero for a single value
    fn std_dev(&self) -> f64 {
        let n = self.values.len();
        if n < 2 {
            return 0.0;
        }
        let mean = self.mean();
        let ss: f64 = self.values.iter().map(|v| (v - mean).powi(2)).sum();
        (ss / (n - 1) as f64).sqrt()
    }
}

/// Quantile by linear interpolation between closest ranks of sorted values
pub fn quantile(sorted: &[f64], q: f64) -> Option<f64> {
    if sorted.is_empty() {
        return None;
    }
    let pos = q.clamp(0.0, 1.0) * (sorted.len() - 1) as f64;
    let lo = pos.floor() as usize;
    let hi = pos.ceil() as usize;
    Some(sorted[lo] + (sorted[hi] - sorted[lo]) * (pos - lo as f64))
}

/// Round to the nearest multiple of `step`
fn round_to(value: f64, step: f64) -> f64 {
    (value / step).round() * step
}

/// Keep rows at or above the minimum, counting the rest
fn suppress<T>(rows: Vec<T>, min_group_size: usize, group_size: impl Fn(&T) -> usize) -> (Vec<T>, usize) {
    let before = rows.len();
    let kept: Vec<T> = rows.into_iter().filter(|r| group_size(r) >= min_group_size).collect();
    let dropped = before - kept.len();
    (kept, dropped)
}

/// Collapse child rows into the public analysis tables
pub fn aggregate_tables(
    rows: &[ChildAnalysisRow],
    linkage: &LinkageResult,
    binning: &TemperatureBinning,
    export: &ExportConfig,
) -> AnalysisTables {
    let min_group_size = export.min_group_size;
    let precision = export.quantile_precision;

    // Bins ordered along the temperature axis over the observed range
    let observed: Vec<f64> = rows.iter().map(|r| r.exposure_value).collect();
    let bin_order: HashMap<String, usize> = binning
        .bins_for(&observed)
        .into_iter()
        .enumerate()
        .map(|(i, bin)| (bin.label, i))
        .collect();

    // (country, bin order, bin label, is_reference, exposure, indicator)
    let mut by_bin: BTreeMap<(String, usize, String, bool, String, String), Accumulator> = BTreeMap::new();
    // (indicator, status, exposure)
    let mut by_status: BTreeMap<(String, &'static str, String), Accumulator> = BTreeMap::new();
    // (country, exposure) with each child counted once
    let mut by_country: BTreeMap<(String, String), Accumulator> = BTreeMap::new();
    let mut seen_child_exposure = BTreeSet::new();

    for row in rows {
        let exposure = row.exposure.label();
        let order = bin_order.get(&row.bin.label).copied().unwrap_or(usize::MAX);

        if seen_child_exposure.insert((row.child_id.as_str(), exposure.clone())) {
            by_country
                .entry((row.country.clone(), exposure.clone()))
                .or_default()
                .push(row.exposure_value, &row.cluster_id);
        }

        for (indicator, value) in &row.indicators {
            let Some(flag) = value else {
                continue;
            };
            by_bin
                .entry((
                    row.country.clone(),
                    order,
                    row.bin.label.clone(),
                    row.bin.is_reference,
                    exposure.clone(),
                    indicator.clone(),
                ))
                .or_default()
                .push(if *flag { 1.0 } else { 0.0 }, &row.cluster_id);

            let status = if *flag { "positive" } else { "negative" };
            by_status
                .entry((indicator.clone(), status, exposure.clone()))
                .or_default()
                .push(row.exposure_value, &row.cluster_id);
        }
    }

    let indicator_by_bin: Vec<PublicAggregateRow> = by_bin
        .into_iter()
        .map(|((country, _, bin, is_reference, exposure, indicator), acc)| PublicAggregateRow {
            country,
            temperature_bin: bin,
            is_reference_bin: is_reference,
            exposure,
            indicator,
            prevalence: acc.mean(),
            n_children: acc.values.len(),
            group_size: acc.clusters.len(),
        })
        .collect();

    let exposure_summary: Vec<IndicatorExposureSummary> = by_status
        .into_iter()
        .map(|((indicator, status, exposure), acc)| {
            let mean = acc.mean();
            let half_width = Z_95 * acc.std_dev() / (acc.values.len() as f64).sqrt();
            IndicatorExposureSummary {
                indicator,
                status: status.to_string(),
                exposure,
                mean_exposure: mean,
                ci_lower: mean - half_width,
                ci_upper: mean + half_width,
                n_children: acc.values.len(),
                group_size: acc.clusters.len(),
            }
        })
        .collect();

    let country_distribution: Vec<CountryExposureDistribution> = by_country
        .into_iter()
        .filter_map(|((country, exposure), mut acc)| {
            let mean = acc.mean();
            acc.values.sort_by(|a, b| a.total_cmp(b));
            Some(CountryExposureDistribution {
                country,
                exposure,
                q1: round_to(quantile(&acc.values, 0.25)?, precision),
                median: round_to(quantile(&acc.values, 0.5)?, precision),
                q3: round_to(quantile(&acc.values, 0.75)?, precision),
                mean,
                n_children: acc.values.len(),
                group_size: acc.clusters.len(),
            })
        })
        .collect();

    let mut cluster_counts: BTreeMap<&str, usize> = BTreeMap::new();
    for linked in &linkage.clusters {
        *cluster_counts.entry(linked.cluster.country.as_str()).or_insert(0) += 1;
    }
    let cluster_summary: Vec<ClusterSummaryRow> = cluster_counts
        .into_iter()
        .map(|(country, n)| ClusterSummaryRow {
            country: country.to_string(),
            n_clusters: n,
        })
        .collect();

    let mut tables = AnalysisTables::default();
    let (kept, dropped) = suppress(indicator_by_bin, min_group_size, |r| r.group_size);
    tables.indicator_by_bin = kept;
    tables.suppressed.insert("indicator_by_bin".to_string(), dropped);

    let (kept, dropped) = suppress(exposure_summary, min_group_size, |r| r.group_size);
    tables.exposure_summary = kept;
    tables.suppressed.insert("indicator_exposure_summary".to_string(), dropped);

    let (kept, dropped) = suppress(country_distribution, min_group_size, |r| r.group_size);
    tables.country_distribution = kept;
    tables.suppressed.insert("country_exposure_distribution".to_string(), dropped);

    let (kept, dropped) = suppress(cluster_summary, min_group_size, |r| r.n_clusters);
    tables.cluster_summary = kept;
    tables.suppressed.insert("cluster_summary".to_string(), dropped);

    if tables.total_suppressed() > 0 {
        tracing::warn!(
            suppressed = ?tables.suppressed,
            min_group_size,
            "rows below the minimum group size were suppressed"
        );
    }

    tables
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quantile_linear_interpolation() {
        let v = [1.0, 2.0, 3.0, 4.0];
        assert_eq!(quantile(&v, 0.5), Some(2.5));
        assert_eq!(quantile(&v, 0.25), Some(1.75));
        assert_eq!(quantile(&v, 1.0), Some(4.0));
        assert_eq!(quantile(&[], 0.5), None);
    }

    #[test]
    fn test_std_dev_sample() {
        let mut acc = Accumulator::default();
        for (v, c) in [(2.0, "a"), (4.0, "b"), (4.0, "c"), (4.0, "d"), (5.0, "e"), (5.0, "f"), (7.0, "g"), (9.0, "h")] {
            acc.push(v, c);
        }
        assert_eq!(acc.mean(), 5.0);
        assert!((acc.std_dev() - (32.0f64 / 7.0).sqrt()).abs() < 1e-12);
        assert_eq!(acc.clusters.len(), 8);
    }

    #[test]
    fn test_round_to_reporting_precision() {
        assert_eq!(round_to(28.41, 0.5), 28.5);
        assert_eq!(round_to(27.77, 0.5), 28.0);
        assert!((round_to(31.04, 0.1) - 31.0).abs() < 1e-12);
    }

    #[test]
    fn test_suppress_counts_dropped() {
        let (kept, dropped) = suppress(vec![1usize, 5, 7, 4], 5, |r| *r);
        assert_eq!(kept, vec![5, 7]);
        assert_eq!(dropped, 2);
    }
}
