//! Shared test utilities and fixture generators

#![allow(dead_code)]

use std::path::{Path, PathBuf};

use polars::prelude::*;
use tempfile::TempDir;

use climalink::config::{BaselineConfig, PipelineConfig};
use climalink::pipeline::grid::{Grid, RegularAxis, YearMonth};

/// Long-format grid extract over the given axes and years.
///
/// `value(year, month, lat, lon)` returns the temperature in the unit the
/// caller intends to declare; None leaves the value null.
pub fn grid_frame(
    start_year: i32,
    n_years: i32,
    lats: &[f64],
    lons: &[f64],
    value: impl Fn(i32, u32, f64, f64) -> Option<f64>,
) -> DataFrame {
    let mut lat_col = Vec::new();
    let mut lon_col = Vec::new();
    let mut year_col = Vec::new();
    let mut month_col = Vec::new();
    let mut t2m = Vec::new();

    for year in start_year..start_year + n_years {
        for month in 1..=12u32 {
            for &lat in lats {
                for &lon in lons {
                    lat_col.push(lat);
                    lon_col.push(lon);
                    year_col.push(year);
                    month_col.push(month as i32);
                    t2m.push(value(year, month, lat, lon));
                }
            }
        }
    }

    df! {
        "latitude" => lat_col,
        "longitude" => lon_col,
        "year" => year_col,
        "month" => month_col,
        "t2m" => t2m,
    }
    .unwrap()
}

/// In-memory grid with a single location and `f(year, month)` values in °C
pub fn single_location_grid(start_year: i32, n_years: i32, f: impl Fn(i32, u32) -> Option<f64>) -> Grid {
    let mut values = Vec::new();
    for y in start_year..start_year + n_years {
        for m in 1..=12 {
            values.push(f(y, m));
        }
    }
    Grid::from_parts(
        RegularAxis::new(0.0, 0.25, 1).unwrap(),
        RegularAxis::new(0.0, 0.25, 1).unwrap(),
        YearMonth::new(start_year, 1).unwrap(),
        values.len(),
        values,
    )
    .unwrap()
}

/// Write a frame as CSV into `dir`
pub fn write_csv(dir: &Path, name: &str, df: &mut DataFrame) -> PathBuf {
    let path = dir.join(name);
    let mut file = std::fs::File::create(&path).unwrap();
    CsvWriter::new(&mut file).finish(df).unwrap();
    path
}

/// Write a frame as Parquet into `dir`
pub fn write_parquet(dir: &Path, name: &str, df: &mut DataFrame) -> PathBuf {
    let path = dir.join(name);
    let file = std::fs::File::create(&path).unwrap();
    ParquetWriter::new(file).finish(df).unwrap();
    path
}

/// Default config pointed at a temp dir, with a short reference period
pub fn test_config(dir: &TempDir) -> PipelineConfig {
    let mut config = PipelineConfig::with_default_panels();
    config.baseline = BaselineConfig {
        start_year: 2000,
        end_year: 2002,
        min_years: 3,
    };
    config.export.public_dir = dir.path().join("public");
    config.export.local_dir = dir.path().join("local");
    config.cache.dir = None;
    config
}

/// `n` clusters in Malawi spread over the 10.0..=10.5 × 20.0..=20.5 block
pub fn clusters_frame(n: usize, interview_date: &str) -> DataFrame {
    let ids: Vec<String> = (0..n).map(|i| format!("cl{:03}", i)).collect();
    let lats: Vec<f64> = (0..n).map(|i| 10.0 + 0.5 * (i % 2) as f64).collect();
    let lons: Vec<f64> = (0..n).map(|i| 20.0 + 0.5 * ((i / 2) % 2) as f64).collect();
    df! {
        "cluster_id" => ids,
        "country" => vec!["Malawi"; n],
        "latitude" => lats,
        "longitude" => lons,
        "interview_date" => vec![interview_date; n],
    }
    .unwrap()
}

/// `per_cluster` children in each of `n_clusters` clusters; every other child
/// answers "Yes" to shaking and every child is on track
pub fn children_frame(n_clusters: usize, per_cluster: usize, birth_date: &str) -> DataFrame {
    let mut child_id = Vec::new();
    let mut cluster_id = Vec::new();
    let mut discshook = Vec::new();
    let mut discspank = Vec::new();
    let mut ecdi = Vec::new();
    for c in 0..n_clusters {
        for k in 0..per_cluster {
            child_id.push(format!("ch{:03}_{:02}", c, k));
            cluster_id.push(format!("cl{:03}", c));
            discshook.push(if k % 2 == 0 { "Yes" } else { "No" });
            discspank.push("No");
            ecdi.push(1i64);
        }
    }
    let n = child_id.len();
    df! {
        "child_id" => child_id,
        "cluster_id" => cluster_id,
        "birth_date" => vec![birth_date; n],
        "discshook" => discshook,
        "discspank" => discspank,
        "ecdi_track" => ecdi,
    }
    .unwrap()
}

/// Assert that a DataFrame has all expected columns
pub fn assert_has_columns(df: &DataFrame, expected_cols: &[&str]) {
    let actual: Vec<String> = df.get_column_names().iter().map(|s| s.to_string()).collect();
    for col in expected_cols {
        assert!(
            actual.contains(&col.to_string()),
            "Expected column '{}' not found. Available: {:?}",
            col,
            actual
        );
    }
}
