//! Climatological baseline and anomaly computation
//!
//! The baseline is per location and per calendar month: seasonality dominates
//! raw variance, so anomalies are only meaningful against the same month's
//! long-run mean at the same place.

use rayon::prelude::*;
use serde::Serialize;

use super::error::{PipelineError, PipelineResult};
use super::grid::{Grid, YearMonth};
use crate::config::BaselineConfig;

/// Baseline for one location and calendar month
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub enum BaselineValue {
    /// Mean over the reference years
    Defined(f64),
    /// Fewer than the required number of non-null reference years
    InsufficientData { years: usize },
}

impl BaselineValue {
    pub fn value(&self) -> Option<f64> {
        match self {
            BaselineValue::Defined(v) => Some(*v),
            BaselineValue::InsufficientData { .. } => None,
        }
    }
}

/// Finished baseline table, read-only once built
#[derive(Debug, Clone)]
pub struct Baseline {
    config: BaselineConfig,
    /// `[location * 12 + (month - 1)]`
    values: Vec<BaselineValue>,
}

impl Baseline {
    pub fn config(&self) -> &BaselineConfig {
        &self.config
    }

    pub fn n_locations(&self) -> usize {
        self.values.len() / 12
    }

    pub fn get(&self, location: usize, month: u32) -> BaselineValue {
        self.values[location * 12 + (month as usize - 1)]
    }

    /// Baseline value, or None where the reference data was insufficient
    pub fn value(&self, location: usize, month: u32) -> Option<f64> {
        self.get(location, month).value()
    }

    /// Every (location, calendar month) whose baseline is undefined
    pub fn insufficient_cells(&self) -> Vec<PipelineError> {
        self.values
            .iter()
            .enumerate()
            .filter_map(|(i, v)| match v {
                BaselineValue::InsufficientData { years } => Some(PipelineError::InsufficientBaseline {
                    location: i / 12,
                    month: (i % 12) as u32 + 1,
                    years: *years,
                    required: self.config.min_years,
                }),
                BaselineValue::Defined(_) => None,
            })
            .collect()
    }
}

/// Compute the per-location, per-calendar-month baseline.
///
/// The grid must cover the whole reference period. Cells with fewer than
/// `min_years` non-null reference observations are marked insufficient.
pub fn compute_baseline(grid: &Grid, config: &BaselineConfig) -> PipelineResult<Baseline> {
    let first = YearMonth::new(config.start_year, 1)
        .ok_or_else(|| PipelineError::Ingestion("invalid baseline start year".to_string()))?;
    let last = YearMonth::new(config.end_year, 12)
        .ok_or_else(|| PipelineError::Ingestion("invalid baseline end year".to_string()))?;

    let (Some(t_first), Some(t_last)) = (grid.month_position(first), grid.month_position(last)) else {
        return Err(PipelineError::Ingestion(format!(
            "grid covers {} to {} but the reference period is {} to {}",
            grid.start(),
            grid.end(),
            first,
            last
        )));
    };

    let values: Vec<BaselineValue> = (0..grid.n_locations())
        .into_par_iter()
        .flat_map_iter(|location| {
            let reference = &grid.series(location)[t_first..=t_last];
            (0..12).map(move |m| {
                // Reference window starts in January, so position % 12 is the calendar month
                let (sum, years) = reference
                    .iter()
                    .skip(m)
                    .step_by(12)
                    .flatten()
                    .fold((0.0, 0usize), |(s, n), v| (s + v, n + 1));
                if years >= config.min_years {
                    BaselineValue::Defined(sum / years as f64)
                } else {
                    BaselineValue::InsufficientData { years }
                }
            })
        })
        .collect();

    let baseline = Baseline {
        config: config.clone(),
        values,
    };

    let insufficient = baseline
        .values
        .iter()
        .filter(|v| matches!(v, BaselineValue::InsufficientData { .. }))
        .count();
    if insufficient > 0 {
        tracing::warn!(
            insufficient,
            min_years = config.min_years,
            "baseline undefined for some location/month pairs; their anomalies are no-data"
        );
    }

    Ok(baseline)
}

/// Anomaly field aligned with the grid (location-major)
#[derive(Debug, Clone)]
pub struct AnomalyField {
    n_months: usize,
    values: Vec<Option<f64>>,
}

impl AnomalyField {
    pub fn n_locations(&self) -> usize {
        if self.n_months == 0 {
            0
        } else {
            self.values.len() / self.n_months
        }
    }

    pub fn n_months(&self) -> usize {
        self.n_months
    }

    pub fn value(&self, location: usize, t: usize) -> Option<f64> {
        self.values[location * self.n_months + t]
    }

    pub fn series(&self, location: usize) -> &[Option<f64>] {
        let start = location * self.n_months;
        &self.values[start..start + self.n_months]
    }

    /// Number of defined anomaly values
    pub fn defined_count(&self) -> usize {
        self.values.iter().filter(|v| v.is_some()).count()
    }
}

/// Derive anomalies from a finished baseline.
///
/// An anomaly exists only where both the observation and the baseline exist.
pub fn compute_anomalies(grid: &Grid, baseline: &Baseline) -> PipelineResult<AnomalyField> {
    if baseline.n_locations() != grid.n_locations() {
        return Err(PipelineError::Ingestion(format!(
            "baseline covers {} locations, grid has {}",
            baseline.n_locations(),
            grid.n_locations()
        )));
    }

    let n_months = grid.n_months();
    let mut values = vec![None; grid.n_locations() * n_months];

    values
        .par_chunks_mut(n_months)
        .enumerate()
        .for_each(|(location, out)| {
            for (t, (slot, observed)) in out.iter_mut().zip(grid.series(location)).enumerate() {
                let month = grid.month_at(t).month();
                *slot = match (observed, baseline.value(location, month)) {
                    (Some(obs), Some(base)) => Some(obs - base),
                    _ => None,
                };
            }
        });

    Ok(AnomalyField { n_months, values })
}
