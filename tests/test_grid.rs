//! Integration tests for grid ingestion and nearest-cell lookup

use climalink::config::GridIngestConfig;
use climalink::pipeline::grid::{Grid, TemperatureUnit, YearMonth};
use climalink::pipeline::loader::load_grid_extract;
use climalink::pipeline::PipelineError;
use polars::prelude::*;
use tempfile::TempDir;

#[path = "common/mod.rs"]
mod common;

fn kelvin(c: f64) -> Option<f64> {
    Some(c + 273.15)
}

/// Default ingestion with a declared resolution, needed for single-value axes
fn declared(resolution: f64) -> GridIngestConfig {
    GridIngestConfig {
        resolution: Some(resolution),
        ..Default::default()
    }
}

#[test]
fn test_kelvin_extract_converted_to_celsius() {
    let df = common::grid_frame(2000, 1, &[0.0, 0.25], &[30.0, 30.25], |_, m, _, _| {
        kelvin(20.0 + m as f64)
    });
    let grid = Grid::from_frame(&df, &GridIngestConfig::default()).unwrap();

    assert_eq!(grid.n_locations(), 4);
    assert_eq!(grid.n_months(), 12);
    assert_eq!(grid.start(), YearMonth::new(2000, 1).unwrap());
    assert_eq!(grid.end(), YearMonth::new(2000, 12).unwrap());

    let july = grid.month_position(YearMonth::new(2000, 7).unwrap()).unwrap();
    assert!((grid.value(0, july).unwrap() - 27.0).abs() < 1e-9);
}

#[test]
fn test_declared_celsius_with_kelvin_values_is_rejected() {
    let df = common::grid_frame(2000, 1, &[0.0], &[0.0], |_, _, _, _| kelvin(25.0));
    let config = GridIngestConfig {
        units: TemperatureUnit::Celsius,
        ..declared(0.25)
    };
    let err = Grid::from_frame(&df, &config).unwrap_err();
    assert!(matches!(err, PipelineError::Ingestion(_)));
    assert!(err.to_string().contains("implausible"));
}

#[test]
fn test_time_axis_gap_is_rejected() {
    let df = common::grid_frame(2000, 1, &[0.0], &[0.0], |_, _, _, _| kelvin(20.0));
    let mask = df.column("month").unwrap().as_materialized_series().not_equal(6).unwrap();
    let gapped = df.filter(&mask).unwrap();

    let err = Grid::from_frame(&gapped, &declared(0.25)).unwrap_err();
    assert!(err.to_string().contains("gaps"));
}

#[test]
fn test_duplicate_entries_are_rejected() {
    let df = common::grid_frame(2000, 1, &[0.0], &[0.0], |_, _, _, _| kelvin(20.0));
    let doubled = df.vstack(&df.head(Some(1))).unwrap();

    let err = Grid::from_frame(&doubled, &declared(0.25)).unwrap_err();
    assert!(err.to_string().contains("duplicate"));
}

#[test]
fn test_null_values_become_no_data() {
    let df = common::grid_frame(2000, 1, &[0.0], &[0.0], |_, m, _, _| {
        if m == 3 {
            None
        } else {
            kelvin(20.0)
        }
    });
    let grid = Grid::from_frame(&df, &declared(0.25)).unwrap();
    assert_eq!(grid.value(0, 2), None);
    assert!(grid.value(0, 3).is_some());
}

#[test]
fn test_longitudes_normalized_from_0_360() {
    let df = common::grid_frame(2000, 1, &[0.0], &[0.0, 90.0, 180.0, 270.0], |_, _, _, lon| {
        kelvin(lon / 10.0)
    });
    let grid = Grid::from_frame(&df, &declared(90.0)).unwrap();

    assert_eq!(grid.longitudes().start(), -180.0);
    let month = YearMonth::new(2000, 1).unwrap();

    // 270° and -90° name the same cell
    let west = grid.lookup_nearest(0.0, -90.0, month).unwrap();
    let east = grid.lookup_nearest(0.0, 270.0, month).unwrap();
    assert_eq!(west.location, east.location);
    assert_eq!(west.longitude, -90.0);
    assert!((west.value.unwrap() - 27.0).abs() < 1e-9);
}

#[test]
fn test_lookup_outside_coverage_is_out_of_domain() {
    let df = common::grid_frame(2000, 1, &[10.0, 10.5], &[20.0, 20.5], |_, _, _, _| kelvin(20.0));
    let grid = Grid::from_frame(&df, &GridIngestConfig::default()).unwrap();
    let inside = YearMonth::new(2000, 6).unwrap();

    assert!(grid.lookup_nearest(10.2, 20.4, inside).is_ok());

    let far = grid.lookup_nearest(-40.0, 20.0, inside).unwrap_err();
    assert!(matches!(far, PipelineError::OutOfDomain { .. }));

    let too_late = grid
        .lookup_nearest(10.0, 20.0, YearMonth::new(2001, 1).unwrap())
        .unwrap_err();
    assert!(matches!(too_late, PipelineError::OutOfDomain { .. }));
}

#[test]
fn test_single_value_axis_needs_declared_resolution() {
    let df = common::grid_frame(2000, 1, &[0.0], &[0.0, 0.25], |_, _, _, _| kelvin(20.0));
    let err = Grid::from_frame(&df, &GridIngestConfig::default()).unwrap_err();
    assert!(err.to_string().contains("declare a resolution"));

    let grid = Grid::from_frame(&df, &declared(0.25)).unwrap();
    assert_eq!(grid.n_locations(), 2);
}

#[test]
fn test_lookup_just_west_of_axis_start() {
    let df = common::grid_frame(2000, 1, &[0.0, 0.25], &[0.0, 0.25], |_, _, _, _| kelvin(20.0));
    let grid = Grid::from_frame(&df, &GridIngestConfig::default()).unwrap();
    let month = YearMonth::new(2000, 1).unwrap();

    let south = grid.lookup_nearest(-0.1, 0.1, month).unwrap();
    let west = grid.lookup_nearest(0.1, -0.1, month).unwrap();
    assert_eq!((south.latitude, south.longitude), (0.0, 0.0));
    assert_eq!((west.latitude, west.longitude), (0.0, 0.0));

    let beyond = grid.lookup_nearest(0.1, -0.2, month).unwrap_err();
    assert!(matches!(beyond, PipelineError::OutOfDomain { .. }));
}

#[test]
fn test_lookup_across_the_antimeridian() {
    let df = common::grid_frame(2000, 1, &[-17.0, -16.75], &[179.5, 179.75, 180.0, 180.25], |_, _, _, lon| {
        kelvin(lon - 155.0)
    });
    let config = GridIngestConfig {
        normalize_longitude: false,
        ..Default::default()
    };
    let grid = Grid::from_frame(&df, &config).unwrap();
    let month = YearMonth::new(2000, 1).unwrap();

    // -179.8° lies 0.7° east of 179.5°
    let cell = grid.lookup_nearest(-16.9, -179.8, month).unwrap();
    assert_eq!(cell.longitude, 180.25);
    assert!((cell.value.unwrap() - 25.25).abs() < 1e-9);

    assert!(grid.lookup_nearest(-16.9, -170.0, month).is_err());
}

#[test]
fn test_date_time_column_accepted() {
    let times: Vec<String> = (1..=12).map(|m| format!("2001-{:02}-01T00:00:00", m)).collect();
    let df = df! {
        "valid_time" => times,
        "lat" => vec![5.0; 12],
        "lon" => vec![5.0; 12],
        "t2m" => vec![290.0; 12],
    }
    .unwrap();
    let grid = Grid::from_frame(&df, &declared(0.25)).unwrap();
    assert_eq!(grid.start(), YearMonth::new(2001, 1).unwrap());
    assert_eq!(grid.n_months(), 12);
}

#[test]
fn test_load_extract_from_parquet_and_csv() {
    let dir = TempDir::new().unwrap();
    let mut df = common::grid_frame(2000, 2, &[0.0, 0.5], &[0.0], |y, _, _, _| kelvin((y - 1990) as f64));

    let parquet = common::write_parquet(dir.path(), "grid.parquet", &mut df);
    let csv = common::write_csv(dir.path(), "grid.csv", &mut df);

    let from_parquet = load_grid_extract(&parquet, &declared(0.5)).unwrap();
    let from_csv = load_grid_extract(&csv, &declared(0.5)).unwrap();

    assert_eq!(from_parquet.n_months(), 24);
    for location in 0..from_parquet.n_locations() {
        for (a, b) in from_parquet.series(location).iter().zip(from_csv.series(location)) {
            assert!((a.unwrap() - b.unwrap()).abs() < 1e-9);
        }
    }
}
