//! Global monthly statistics and smoothed anomaly series

use rayon::prelude::*;
use serde::Serialize;

use super::baseline::AnomalyField;
use super::grid::{Grid, YearMonth};

/// Summary of the defined values of one month across all locations
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SummaryStats {
    pub min: f64,
    pub median: f64,
    pub max: f64,
    pub mean: f64,
    pub count: usize,
}

impl SummaryStats {
    /// Summarize the given values, or None when there are none
    pub fn from_values(mut values: Vec<f64>) -> Option<Self> {
        if values.is_empty() {
            return None;
        }
        values.sort_by(|a, b| a.total_cmp(b));
        let n = values.len();
        let median = if n % 2 == 1 {
            values[n / 2]
        } else {
            (values[n / 2 - 1] + values[n / 2]) / 2.0
        };
        Some(Self {
            min: values[0],
            median,
            max: values[n - 1],
            mean: values.iter().sum::<f64>() / n as f64,
            count: n,
        })
    }
}

/// One row of the global monthly time series
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GlobalMonthlyStats {
    pub month: YearMonth,
    /// Observed temperature across locations
    pub temperature: Option<SummaryStats>,
    /// Anomaly across locations
    pub anomaly: Option<SummaryStats>,
    /// Trailing rolling mean of the global mean anomaly
    pub rolling_anomaly: Option<f64>,
}

/// Compute per-month statistics over all grid locations.
///
/// A month without any defined anomaly is an explicit gap (`anomaly = None`).
pub fn global_monthly_stats(grid: &Grid, anomalies: &AnomalyField, rolling_window: usize) -> Vec<GlobalMonthlyStats> {
    let mut rows: Vec<GlobalMonthlyStats> = (0..grid.n_months())
        .into_par_iter()
        .map(|t| {
            let temperatures: Vec<f64> = (0..grid.n_locations())
                .filter_map(|loc| grid.value(loc, t))
                .collect();
            let anomaly_values: Vec<f64> = (0..grid.n_locations())
                .filter_map(|loc| anomalies.value(loc, t))
                .collect();
            GlobalMonthlyStats {
                month: grid.month_at(t),
                temperature: SummaryStats::from_values(temperatures),
                anomaly: SummaryStats::from_values(anomaly_values),
                rolling_anomaly: None,
            }
        })
        .collect();

    let mean_series: Vec<Option<f64>> = rows.iter().map(|r| r.anomaly.map(|a| a.mean)).collect();
    for (row, rolled) in rows.iter_mut().zip(rolling_mean(&mean_series, rolling_window)) {
        row.rolling_anomaly = rolled;
    }

    let gaps = rows.iter().filter(|r| r.anomaly.is_none()).count();
    if gaps > 0 {
        tracing::warn!(gaps, "months without any defined anomaly are left as gaps");
    }

    rows
}

/// Trailing k-point moving average.
///
/// Position i averages `series[i + 1 - k ..= i]`. The first `k - 1` positions
/// and any window containing a gap are None; partial windows are never used.
pub fn rolling_mean(series: &[Option<f64>], window: usize) -> Vec<Option<f64>> {
    if window == 0 {
        return vec![None; series.len()];
    }
    (0..series.len())
        .map(|i| {
            if i + 1 < window {
                return None;
            }
            let values: Option<Vec<f64>> = series[i + 1 - window..=i].iter().copied().collect();
            values.map(|v| v.iter().sum::<f64>() / window as f64)
        })
        .collect()
}

/// Mean anomaly per (year, calendar month) for heatmap consumption
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MonthlyAnomalyCell {
    pub year: i32,
    pub month: u32,
    pub anomaly_mean: Option<f64>,
}

/// Build the year × calendar-month anomaly matrix, one value per cell
pub fn monthly_anomaly_matrix(grid: &Grid, anomalies: &AnomalyField) -> Vec<MonthlyAnomalyCell> {
    (0..grid.n_months())
        .into_par_iter()
        .map(|t| {
            let month = grid.month_at(t);
            let (sum, n) = (0..grid.n_locations())
                .filter_map(|loc| anomalies.value(loc, t))
                .fold((0.0, 0usize), |(s, n), v| (s + v, n + 1));
            MonthlyAnomalyCell {
                year: month.year(),
                month: month.month(),
                anomaly_mean: (n > 0).then(|| sum / n as f64),
            }
        })
        .collect()
}
