//! Local-only artifacts
//!
//! These tables keep cluster identifiers and coordinates for reproducibility
//! and auditing. They are written to the local directory only and never pass
//! through the export gate.

use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::Utc;
use polars::prelude::*;
use serde::Serialize;

use crate::config::OutputFormat;
use crate::pipeline::aggregate::ChildAnalysisRow;
use crate::pipeline::linkage::{Exclusion, ExclusionReason, LinkageResult};
use crate::pipeline::loader::write_frame;

pub const CLUSTER_EXPOSURES: &str = "cluster_exposures";
pub const CHILD_ANALYSIS: &str = "child_analysis";
pub const EXCLUSIONS_FILE: &str = "exclusions.json";

#[derive(Debug, Serialize)]
struct ExclusionReport<'a> {
    created_at: String,
    total: usize,
    by_reason: Vec<(ExclusionReason, usize)>,
    exclusions: &'a [Exclusion],
}

/// Writer for identifying, local-only tables
pub struct LocalWriter {
    dir: PathBuf,
    format: OutputFormat,
}

impl LocalWriter {
    pub fn new(dir: &Path, format: OutputFormat) -> Result<Self> {
        fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create local output directory: {}", dir.display()))?;
        Ok(Self {
            dir: dir.to_path_buf(),
            format,
        })
    }

    fn path(&self, name: &str) -> PathBuf {
        self.dir.join(format!("{}.{}", name, self.format.extension()))
    }

    fn write(&self, name: &str, mut df: DataFrame) -> Result<PathBuf> {
        let path = self.path(name);
        write_frame(&mut df, &path, self.format)
            .with_context(|| format!("Failed to write local table: {}", path.display()))?;
        tracing::info!(table = name, rows = df.height(), "local-only table written");
        Ok(path)
    }

    /// One row per (cluster, exposure definition) with location and window
    pub fn write_cluster_exposures(&self, linkage: &LinkageResult) -> Result<PathBuf> {
        self.write(CLUSTER_EXPOSURES, cluster_exposure_frame(linkage)?)
    }

    /// One row per (child, panel) with exposure, bin, indicators and covariates
    pub fn write_child_analysis(&self, rows: &[ChildAnalysisRow]) -> Result<PathBuf> {
        self.write(CHILD_ANALYSIS, child_analysis_frame(rows)?)
    }

    pub fn write_exclusions(&self, linkage: &LinkageResult) -> Result<PathBuf> {
        let report = ExclusionReport {
            created_at: Utc::now().to_rfc3339(),
            total: linkage.exclusions.len(),
            by_reason: linkage.exclusion_counts().into_iter().collect(),
            exclusions: &linkage.exclusions,
        };
        let path = self.dir.join(EXCLUSIONS_FILE);
        let json = serde_json::to_string_pretty(&report).context("Failed to serialize exclusions")?;
        fs::write(&path, json).with_context(|| format!("Failed to write {}", path.display()))?;
        Ok(path)
    }
}

pub fn cluster_exposure_frame(linkage: &LinkageResult) -> PolarsResult<DataFrame> {
    let mut cluster_id = Vec::new();
    let mut country = Vec::new();
    let mut latitude = Vec::new();
    let mut longitude = Vec::new();
    let mut cell_latitude = Vec::new();
    let mut cell_longitude = Vec::new();
    let mut exposure = Vec::new();
    let mut measure = Vec::new();
    let mut value = Vec::new();
    let mut window_start = Vec::new();
    let mut window_end = Vec::new();
    let mut months = Vec::new();

    for linked in &linkage.clusters {
        for e in &linked.exposures {
            cluster_id.push(linked.cluster.cluster_id.clone());
            country.push(linked.cluster.country.clone());
            latitude.push(linked.cluster.latitude);
            longitude.push(linked.cluster.longitude);
            cell_latitude.push(e.cell_latitude);
            cell_longitude.push(e.cell_longitude);
            exposure.push(e.definition.label());
            measure.push(e.measure.to_string());
            value.push(e.value);
            window_start.push(e.window_start.to_string());
            window_end.push(e.window_end.to_string());
            months.push(e.months as u64);
        }
    }

    df! {
        "cluster_id" => cluster_id,
        "country" => country,
        "latitude" => latitude,
        "longitude" => longitude,
        "cell_latitude" => cell_latitude,
        "cell_longitude" => cell_longitude,
        "exposure" => exposure,
        "measure" => measure,
        "value" => value,
        "window_start" => window_start,
        "window_end" => window_end,
        "months" => months,
    }
}

pub fn child_analysis_frame(rows: &[ChildAnalysisRow]) -> PolarsResult<DataFrame> {
    let indicator_names: BTreeSet<&str> = rows
        .iter()
        .flat_map(|r| r.indicators.keys().map(|k| k.as_str()))
        .collect();
    let covariate_names: BTreeSet<&str> = rows
        .iter()
        .flat_map(|r| r.covariates.keys().map(|k| k.as_str()))
        .collect();

    let mut columns = vec![
        Column::new("child_id".into(), rows.iter().map(|r| r.child_id.clone()).collect::<Vec<_>>()),
        Column::new("cluster_id".into(), rows.iter().map(|r| r.cluster_id.clone()).collect::<Vec<_>>()),
        Column::new("country".into(), rows.iter().map(|r| r.country.clone()).collect::<Vec<_>>()),
        Column::new("panel".into(), rows.iter().map(|r| r.panel.clone()).collect::<Vec<_>>()),
        Column::new("exposure".into(), rows.iter().map(|r| r.exposure.label()).collect::<Vec<_>>()),
        Column::new("exposure_value".into(), rows.iter().map(|r| r.exposure_value).collect::<Vec<_>>()),
        Column::new("temperature_bin".into(), rows.iter().map(|r| r.bin.label.clone()).collect::<Vec<_>>()),
        Column::new("is_reference_bin".into(), rows.iter().map(|r| r.bin.is_reference).collect::<Vec<_>>()),
    ];
    for name in &indicator_names {
        let values: Vec<Option<bool>> = rows
            .iter()
            .map(|r| r.indicators.get(*name).copied().flatten())
            .collect();
        columns.push(Column::new((*name).into(), values));
    }
    for name in &covariate_names {
        let values: Vec<Option<String>> = rows
            .iter()
            .map(|r| r.covariates.get(*name).cloned().flatten())
            .collect();
        columns.push(Column::new((*name).into(), values));
    }
    DataFrame::new(columns)
}
