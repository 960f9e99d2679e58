//! Integration tests for the public export gate

use climalink::config::OutputFormat;
use climalink::pipeline::aggregate::ClusterSummaryRow;
use climalink::pipeline::PipelineError;
use climalink::report::gate::{ExportGate, GateConfig, PublicTable};
use polars::prelude::*;
use tempfile::TempDir;

/// A table that carries the exact cluster position
struct LeakyClusterTable {
    rows: Vec<(String, f64, f64)>,
}

impl PublicTable for LeakyClusterTable {
    fn table_name(&self) -> &'static str {
        "leaky_clusters"
    }

    fn to_frame(&self) -> PolarsResult<DataFrame> {
        df! {
            "country" => self.rows.iter().map(|r| r.0.clone()).collect::<Vec<String>>(),
            "lat" => self.rows.iter().map(|r| r.1).collect::<Vec<f64>>(),
            "lon" => self.rows.iter().map(|r| r.2).collect::<Vec<f64>>(),
        }
    }
}

fn gate(dir: &TempDir, min_group_size: usize) -> ExportGate {
    ExportGate::new(
        &dir.path().join("public"),
        &dir.path().join("local"),
        GateConfig {
            min_group_size,
            format: OutputFormat::Csv,
        },
    )
    .unwrap()
}

#[test]
fn test_coordinate_table_never_reaches_disk() {
    let dir = TempDir::new().unwrap();
    let mut gate = gate(&dir, 5);

    let summary = vec![ClusterSummaryRow {
        country: "Malawi".to_string(),
        n_clusters: 12,
    }];
    gate.stage(summary.as_slice()).unwrap();

    let leaky = LeakyClusterTable {
        rows: vec![("Malawi".to_string(), -13.25, 34.1)],
    };
    let err = gate.stage(&leaky).unwrap_err();
    assert!(matches!(err, PipelineError::PrivacyViolation(_)));
    assert!(err.to_string().contains("lat"));

    // The run aborts before commit; nothing is written
    drop(gate);
    assert!(!dir.path().join("public").exists());
}

#[test]
fn test_survey_codebook_coordinates_rejected() {
    let dir = TempDir::new().unwrap();
    let mut gate = gate(&dir, 5);

    let dhs = df! {
        "country" => ["Malawi"],
        "LATNUM" => [-13.2512],
        "LONGNUM" => [34.3011],
        "DHSCLUST" => [17i64],
    }
    .unwrap();
    let err = gate.stage_frame("per_cluster", dhs, None).unwrap_err();
    assert!(matches!(err, PipelineError::PrivacyViolation(_)));
    assert!(err.to_string().contains("LATNUM"));

    let cells = df! {
        "cell_latitude" => [-13.25],
        "cell_longitude" => [34.25],
        "exposure_value" => [27.4],
        "group_size" => [9u64],
    }
    .unwrap();
    assert!(gate.stage_frame("cell_exposures", cells, None).is_err());

    // Rows without a group size never count as aggregates
    let ungrouped = df! { "country" => ["Malawi"], "exposure_value" => [27.4] }.unwrap();
    let err = gate.stage_frame("exposures", ungrouped, None).unwrap_err();
    assert!(err.to_string().contains("group-size"));

    let manifest = gate.commit().unwrap();
    assert!(manifest.tables.is_empty());
    let written: Vec<_> = std::fs::read_dir(dir.path().join("public"))
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    assert_eq!(written, vec!["manifest.json".to_string()]);
}

#[test]
fn test_cluster_summary_below_minimum_rejected() {
    let dir = TempDir::new().unwrap();
    let mut gate = gate(&dir, 5);
    let summary = vec![
        ClusterSummaryRow {
            country: "Malawi".to_string(),
            n_clusters: 12,
        },
        ClusterSummaryRow {
            country: "Georgia".to_string(),
            n_clusters: 3,
        },
    ];
    let err = gate.stage(summary.as_slice()).unwrap_err();
    assert!(err.to_string().contains("below the minimum"));
}

#[test]
fn test_parquet_commit_and_manifest() {
    let dir = TempDir::new().unwrap();
    let public = dir.path().join("public");
    let mut gate = ExportGate::new(
        &public,
        &dir.path().join("local"),
        GateConfig {
            min_group_size: 5,
            format: OutputFormat::Parquet,
        },
    )
    .unwrap();

    let summary = vec![ClusterSummaryRow {
        country: "Malawi".to_string(),
        n_clusters: 8,
    }];
    gate.stage(summary.as_slice()).unwrap();
    let manifest = gate.commit().unwrap();

    assert_eq!(manifest.min_group_size, 5);
    assert_eq!(manifest.tables[0].file, "cluster_summary.parquet");
    assert_eq!(manifest.tables[0].columns, vec!["country", "n_clusters"]);

    let written = LazyFrame::scan_parquet(public.join("cluster_summary.parquet"), Default::default())
        .unwrap()
        .collect()
        .unwrap();
    assert_eq!(written.height(), 1);

    let json = std::fs::read_to_string(public.join("manifest.json")).unwrap();
    let parsed: serde_json::Value = serde_json::from_str(&json).unwrap();
    assert_eq!(parsed["tables"][0]["rows"], 1);
}
