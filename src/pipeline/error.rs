//! Error taxonomy for the linkage pipeline.
//!
//! `Ingestion` and `PrivacyViolation` are fatal and abort the run before any
//! public artifact is written. `OutOfDomain`, `InsufficientHistory` and
//! `InsufficientBaseline` describe per-cluster or per-cell conditions that are
//! recorded as exclusions and let the batch complete with a partial result.

use thiserror::Error;

use super::grid::YearMonth;

/// Result alias for typed pipeline operations
pub type PipelineResult<T> = std::result::Result<T, PipelineError>;

/// Errors raised by the pipeline components
#[derive(Error, Debug)]
pub enum PipelineError {
    /// Malformed or inconsistent source extract.
    #[error("Ingestion error: {0}")]
    Ingestion(String),

    /// Query point or month outside the grid's coverage.
    #[error("Out of domain: ({latitude:.4}, {longitude:.4}) at {month} is outside grid coverage")]
    OutOfDomain {
        latitude: f64,
        longitude: f64,
        month: YearMonth,
    },

    /// Exposure window starts before the first month of the grid.
    #[error("Insufficient history: window starting {window_start} predates grid coverage (first month {coverage_start})")]
    InsufficientHistory {
        window_start: YearMonth,
        coverage_start: YearMonth,
    },

    /// Too few reference years at a location for a calendar month.
    #[error("Insufficient baseline: location {location}, month {month} has {years} reference year(s), {required} required")]
    InsufficientBaseline {
        location: usize,
        month: u32,
        years: usize,
        required: usize,
    },

    /// Identifying data reached the export gate, or a group is too small.
    #[error("Privacy violation: {0}")]
    PrivacyViolation(String),

    #[error("Polars error: {0}")]
    Polars(#[from] polars::error::PolarsError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
