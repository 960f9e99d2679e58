//! End-to-end tests of the climate stage, survey linkage and export

use std::path::{Path, PathBuf};

use climalink::pipeline::loader::load_frame;
use climalink::pipeline::stages::{run_pipeline, PipelineInputs};
use climalink::report::gate::{is_climate_column, is_identifying_column};
use polars::prelude::*;
use tempfile::TempDir;

#[path = "common/mod.rs"]
mod common;

/// Write a 2×2 grid over 2000-2003 at 28°C + 0.1°C per calendar month
fn write_climate(dir: &Path) -> PathBuf {
    let mut df = common::grid_frame(2000, 4, &[10.0, 10.5], &[20.0, 20.5], |_, m, _, _| {
        Some(273.15 + 28.0 + 0.1 * m as f64)
    });
    common::write_csv(dir, "era5.csv", &mut df)
}

fn write_survey(dir: &Path, n_clusters: usize) -> (PathBuf, PathBuf) {
    let mut clusters = common::clusters_frame(n_clusters, "2003-06-15");
    let mut children = common::children_frame(n_clusters, 4, "2001-01-15");
    (
        common::write_csv(dir, "clusters.csv", &mut clusters),
        common::write_csv(dir, "children.csv", &mut children),
    )
}

fn public_frame(dir: &TempDir, name: &str) -> DataFrame {
    load_frame(&dir.path().join("public").join(format!("{}.csv", name))).unwrap()
}

#[test]
fn test_climate_only_run_writes_public_tables() {
    let dir = TempDir::new().unwrap();
    let inputs = PipelineInputs {
        climate: write_climate(dir.path()),
        clusters: None,
        children: None,
    };
    let config = common::test_config(&dir);

    let report = run_pipeline(&inputs, &config).unwrap();
    assert_eq!(report.climate.locations, 4);
    assert_eq!(report.climate.months, 48);
    assert_eq!(report.climate.insufficient_baseline, 0);
    assert!(report.survey.is_none());

    let names: Vec<&str> = report.manifest.tables.iter().map(|t| t.name.as_str()).collect();
    assert_eq!(
        names,
        vec!["global_monthly_stats", "monthly_anomaly_matrix", "spatial_anomalies"]
    );

    let stats = public_frame(&dir, "global_monthly_stats");
    assert_eq!(stats.height(), 48);
    common::assert_has_columns(&stats, &["year", "month", "t2m_mean", "anomaly_mean", "anomaly_rolling"]);

    let spatial = public_frame(&dir, "spatial_anomalies");
    assert_eq!(spatial.height(), 4);
    common::assert_has_columns(&spatial, &["cell_latitude", "cell_longitude", "year", "anomaly_mean"]);

    assert!(dir.path().join("public").join("manifest.json").exists());
    assert!(!dir.path().join("local").join("cluster_exposures.csv").exists());
}

#[test]
fn test_full_run_links_aggregates_and_separates_outputs() {
    let dir = TempDir::new().unwrap();
    let (clusters, children) = write_survey(dir.path(), 6);
    let inputs = PipelineInputs {
        climate: write_climate(dir.path()),
        clusters: Some(clusters),
        children: Some(children),
    };
    let config = common::test_config(&dir);

    let report = run_pipeline(&inputs, &config).unwrap();
    let survey = report.survey.unwrap();
    assert_eq!(survey.clusters_linked, 6);
    assert_eq!(survey.children_read, 24);
    assert_eq!(survey.exclusions, 0);
    assert_eq!(survey.suppressed_rows, 0);

    // Survey tables carry no identifying column; grid tables stay in their vocabulary
    let climate_tables = ["global_monthly_stats", "monthly_anomaly_matrix", "spatial_anomalies"];
    for entry in &report.manifest.tables {
        let frame = public_frame(&dir, &entry.name);
        for column in frame.get_column_names() {
            if climate_tables.contains(&entry.name.as_str()) {
                assert!(is_climate_column(column), "{} carries {}", entry.name, column);
            } else {
                assert!(!is_identifying_column(column), "{} exposes {}", entry.name, column);
            }
        }
    }

    // Exposure quartiles are published at half-degree precision
    let distribution = public_frame(&dir, "country_exposure_distribution");
    assert!(distribution.height() > 0);
    for name in ["q1", "median", "q3"] {
        let values = distribution.column(name).unwrap().cast(&DataType::Float64).unwrap();
        for value in values.f64().unwrap().into_no_null_iter() {
            assert!(((value / 0.5) - (value / 0.5).round()).abs() < 1e-9, "{} = {}", name, value);
        }
    }

    // Dec-May preceding the June interview average 28.45°C
    let by_bin = public_frame(&dir, "indicator_by_bin");
    let bins = by_bin.column("temperature_bin").unwrap().str().unwrap();
    let indicators = by_bin.column("indicator").unwrap().str().unwrap();
    let prevalence = by_bin.column("prevalence").unwrap().cast(&DataType::Float64).unwrap();
    let prevalence = prevalence.f64().unwrap();
    let group_size = by_bin.column("group_size").unwrap().cast(&DataType::Int64).unwrap();
    let group_size = group_size.i64().unwrap();

    let row = (0..by_bin.height())
        .find(|&i| indicators.get(i) == Some("physical_punishment"))
        .unwrap();
    assert_eq!(bins.get(row), Some("[28,29)"));
    assert!((prevalence.get(row).unwrap() - 0.5).abs() < 1e-9);
    assert_eq!(group_size.get(row), Some(6));

    let summary = public_frame(&dir, "cluster_summary");
    assert_eq!(summary.height(), 1);

    // Identifying detail stays local
    let local = dir.path().join("local");
    let exposures = load_frame(&local.join("cluster_exposures.csv")).unwrap();
    common::assert_has_columns(&exposures, &["cluster_id", "latitude", "longitude", "exposure", "value"]);
    assert!(local.join("child_analysis.csv").exists());
    assert!(local.join("exclusions.json").exists());
}

#[test]
fn test_small_groups_suppressed_before_export() {
    let dir = TempDir::new().unwrap();
    let (clusters, children) = write_survey(dir.path(), 3);
    let inputs = PipelineInputs {
        climate: write_climate(dir.path()),
        clusters: Some(clusters),
        children: Some(children),
    };
    let config = common::test_config(&dir);

    let report = run_pipeline(&inputs, &config).unwrap();
    let survey = report.survey.unwrap();
    assert!(survey.suppressed_rows > 0);

    let rows = |name: &str| {
        report
            .manifest
            .tables
            .iter()
            .find(|t| t.name == name)
            .map(|t| t.rows)
    };
    assert_eq!(rows("indicator_by_bin"), Some(0));
    assert_eq!(rows("cluster_summary"), Some(0));
    assert_eq!(rows("global_monthly_stats"), Some(48));
}

#[test]
fn test_out_of_domain_cluster_excluded_once() {
    let dir = TempDir::new().unwrap();
    let mut clusters = common::clusters_frame(6, "2003-06-15");
    let far = df! {
        "cluster_id" => ["south"],
        "country" => ["Malawi"],
        "latitude" => [-40.0],
        "longitude" => [20.0],
        "interview_date" => ["2003-06-15"],
    }
    .unwrap();
    clusters = clusters.vstack(&far).unwrap();
    let mut children = common::children_frame(6, 4, "2001-01-15");

    let inputs = PipelineInputs {
        climate: write_climate(dir.path()),
        clusters: Some(common::write_csv(dir.path(), "clusters.csv", &mut clusters)),
        children: Some(common::write_csv(dir.path(), "children.csv", &mut children)),
    };
    let report = run_pipeline(&inputs, &common::test_config(&dir)).unwrap();
    let survey = report.survey.unwrap();
    assert_eq!(survey.clusters_linked, 6);
    assert_eq!(survey.exclusions, 1);

    let exclusions = std::fs::read_to_string(dir.path().join("local").join("exclusions.json")).unwrap();
    let parsed: serde_json::Value = serde_json::from_str(&exclusions).unwrap();
    assert_eq!(parsed["total"], 1);
    assert_eq!(parsed["exclusions"][0]["reason"], "out_of_domain");
}

#[test]
fn test_second_run_reuses_cached_climate_tables() {
    let dir = TempDir::new().unwrap();
    let inputs = PipelineInputs {
        climate: write_climate(dir.path()),
        clusters: None,
        children: None,
    };
    let mut config = common::test_config(&dir);
    config.cache.dir = Some(dir.path().join("cache"));

    let first = run_pipeline(&inputs, &config).unwrap();
    assert!(!first.climate.cache_hit);

    let second = run_pipeline(&inputs, &config).unwrap();
    assert!(second.climate.cache_hit);
    assert_eq!(first.manifest.tables.len(), second.manifest.tables.len());
    for (a, b) in first.manifest.tables.iter().zip(&second.manifest.tables) {
        assert_eq!(a.rows, b.rows);
        assert_eq!(a.columns, b.columns);
    }

    // A changed reference period misses the cache
    config.baseline.end_year = 2001;
    config.baseline.min_years = 2;
    let third = run_pipeline(&inputs, &config).unwrap();
    assert!(!third.climate.cache_hit);
}

#[test]
fn test_overlapping_output_directories_rejected() {
    let dir = TempDir::new().unwrap();
    let inputs = PipelineInputs {
        climate: write_climate(dir.path()),
        clusters: None,
        children: None,
    };
    let mut config = common::test_config(&dir);
    config.export.local_dir = config.export.public_dir.join("private");

    assert!(run_pipeline(&inputs, &config).is_err());
}
