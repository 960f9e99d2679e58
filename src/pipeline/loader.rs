//! Extract loader for CSV and Parquet files

use anyhow::{Context, Result};
use polars::prelude::*;
use std::path::Path;

use super::error::PipelineResult;
use super::grid::Grid;
use crate::config::{GridIngestConfig, OutputFormat};

/// Number of rows used for CSV schema inference
const INFER_SCHEMA_LENGTH: usize = 10_000;

/// Load a dataset from a file (CSV or Parquet based on extension)
pub fn load_dataset(path: &Path) -> Result<LazyFrame> {
    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("")
        .to_lowercase();

    let lf = match extension.as_str() {
        "csv" => LazyCsvReader::new(path)
            .with_infer_schema_length(Some(INFER_SCHEMA_LENGTH))
            .finish()
            .with_context(|| format!("Failed to load CSV file: {}", path.display()))?,
        "parquet" => LazyFrame::scan_parquet(path, Default::default())
            .with_context(|| format!("Failed to load Parquet file: {}", path.display()))?,
        _ => anyhow::bail!(
            "Unsupported file format: {}. Supported formats: csv, parquet",
            extension
        ),
    };

    Ok(lf)
}

/// Load and collect a dataset into memory
pub fn load_frame(path: &Path) -> Result<DataFrame> {
    load_dataset(path)?
        .collect()
        .with_context(|| format!("Failed to read {}", path.display()))
}

/// Load a gridded extract and ingest it into a validated grid
pub fn load_grid_extract(path: &Path, config: &GridIngestConfig) -> Result<Grid> {
    let df = load_frame(path)?;
    let grid = Grid::from_frame(&df, config)
        .with_context(|| format!("Failed to ingest grid extract: {}", path.display()))?;

    tracing::info!(
        path = %path.display(),
        rows = df.height(),
        memory_mb = estimated_size_mb(&df),
        latitudes = grid.latitudes().len(),
        longitudes = grid.longitudes().len(),
        start = %grid.start(),
        end = %grid.end(),
        "grid extract ingested"
    );

    Ok(grid)
}

/// Estimated in-memory size of a frame in megabytes
pub fn estimated_size_mb(df: &DataFrame) -> f64 {
    df.estimated_size() as f64 / (1024.0 * 1024.0)
}

/// Write a frame in the given format
pub fn write_frame(df: &mut DataFrame, path: &Path, format: OutputFormat) -> PipelineResult<()> {
    let file = std::fs::File::create(path)?;
    match format {
        OutputFormat::Csv => {
            let mut file = file;
            CsvWriter::new(&mut file).finish(df)?;
        }
        OutputFormat::Parquet => {
            ParquetWriter::new(file).finish(df)?;
        }
    }
    Ok(())
}
