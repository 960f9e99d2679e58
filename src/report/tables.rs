//! Public table definitions and their frame layouts

use polars::prelude::*;

use super::gate::{PublicTable, GROUP_SIZE_COLUMN};
use crate::pipeline::aggregate::{
    ClusterSummaryRow, CountryExposureDistribution, IndicatorExposureSummary, PublicAggregateRow,
};
use crate::pipeline::resample::CoarseCell;
use crate::pipeline::temporal::{GlobalMonthlyStats, MonthlyAnomalyCell, SummaryStats};

pub const GLOBAL_MONTHLY_STATS: &str = "global_monthly_stats";
pub const MONTHLY_ANOMALY_MATRIX: &str = "monthly_anomaly_matrix";
pub const SPATIAL_ANOMALIES: &str = "spatial_anomalies";
pub const INDICATOR_BY_BIN: &str = "indicator_by_bin";
pub const INDICATOR_EXPOSURE_SUMMARY: &str = "indicator_exposure_summary";
pub const COUNTRY_EXPOSURE_DISTRIBUTION: &str = "country_exposure_distribution";
pub const CLUSTER_SUMMARY: &str = "cluster_summary";

fn stat(rows: &[GlobalMonthlyStats], pick: impl Fn(&GlobalMonthlyStats) -> Option<SummaryStats>, field: fn(&SummaryStats) -> f64) -> Vec<Option<f64>> {
    rows.iter().map(|r| pick(r).map(|s| field(&s))).collect()
}

impl PublicTable for [GlobalMonthlyStats] {
    fn table_name(&self) -> &'static str {
        GLOBAL_MONTHLY_STATS
    }

    fn to_frame(&self) -> PolarsResult<DataFrame> {
        let t = |r: &GlobalMonthlyStats| r.temperature;
        let a = |r: &GlobalMonthlyStats| r.anomaly;
        DataFrame::new(vec![
            Column::new("year".into(), self.iter().map(|r| r.month.year()).collect::<Vec<i32>>()),
            Column::new("month".into(), self.iter().map(|r| r.month.month()).collect::<Vec<u32>>()),
            Column::new("t2m_min".into(), stat(self, t, |s| s.min)),
            Column::new("t2m_median".into(), stat(self, t, |s| s.median)),
            Column::new("t2m_max".into(), stat(self, t, |s| s.max)),
            Column::new("t2m_mean".into(), stat(self, t, |s| s.mean)),
            Column::new("anomaly_min".into(), stat(self, a, |s| s.min)),
            Column::new("anomaly_median".into(), stat(self, a, |s| s.median)),
            Column::new("anomaly_max".into(), stat(self, a, |s| s.max)),
            Column::new("anomaly_mean".into(), stat(self, a, |s| s.mean)),
            Column::new(
                "anomaly_rolling".into(),
                self.iter().map(|r| r.rolling_anomaly).collect::<Vec<Option<f64>>>(),
            ),
        ])
    }
}

impl PublicTable for [MonthlyAnomalyCell] {
    fn table_name(&self) -> &'static str {
        MONTHLY_ANOMALY_MATRIX
    }

    fn to_frame(&self) -> PolarsResult<DataFrame> {
        df! {
            "year" => self.iter().map(|r| r.year).collect::<Vec<i32>>(),
            "month" => self.iter().map(|r| r.month).collect::<Vec<u32>>(),
            "anomaly_mean" => self.iter().map(|r| r.anomaly_mean).collect::<Vec<Option<f64>>>(),
        }
    }
}

impl PublicTable for [CoarseCell] {
    fn table_name(&self) -> &'static str {
        SPATIAL_ANOMALIES
    }

    fn to_frame(&self) -> PolarsResult<DataFrame> {
        df! {
            "cell_latitude" => self.iter().map(|r| r.latitude).collect::<Vec<f64>>(),
            "cell_longitude" => self.iter().map(|r| r.longitude).collect::<Vec<f64>>(),
            "year" => self.iter().map(|r| r.year).collect::<Vec<i32>>(),
            "anomaly_mean" => self.iter().map(|r| r.anomaly_mean).collect::<Vec<f64>>(),
            "n_native" => self.iter().map(|r| r.n_native as u64).collect::<Vec<u64>>(),
        }
    }
}

impl PublicTable for [PublicAggregateRow] {
    fn table_name(&self) -> &'static str {
        INDICATOR_BY_BIN
    }

    fn to_frame(&self) -> PolarsResult<DataFrame> {
        df! {
            "country" => self.iter().map(|r| r.country.clone()).collect::<Vec<String>>(),
            "temperature_bin" => self.iter().map(|r| r.temperature_bin.clone()).collect::<Vec<String>>(),
            "is_reference_bin" => self.iter().map(|r| r.is_reference_bin).collect::<Vec<bool>>(),
            "exposure" => self.iter().map(|r| r.exposure.clone()).collect::<Vec<String>>(),
            "indicator" => self.iter().map(|r| r.indicator.clone()).collect::<Vec<String>>(),
            "prevalence" => self.iter().map(|r| r.prevalence).collect::<Vec<f64>>(),
            "n_children" => self.iter().map(|r| r.n_children as u64).collect::<Vec<u64>>(),
            "group_size" => self.iter().map(|r| r.group_size as u64).collect::<Vec<u64>>(),
        }
    }

    fn group_size_column(&self) -> Option<&'static str> {
        Some(GROUP_SIZE_COLUMN)
    }
}

impl PublicTable for [IndicatorExposureSummary] {
    fn table_name(&self) -> &'static str {
        INDICATOR_EXPOSURE_SUMMARY
    }

    fn to_frame(&self) -> PolarsResult<DataFrame> {
        df! {
            "indicator" => self.iter().map(|r| r.indicator.clone()).collect::<Vec<String>>(),
            "status" => self.iter().map(|r| r.status.clone()).collect::<Vec<String>>(),
            "exposure" => self.iter().map(|r| r.exposure.clone()).collect::<Vec<String>>(),
            "mean_exposure" => self.iter().map(|r| r.mean_exposure).collect::<Vec<f64>>(),
            "ci_lower" => self.iter().map(|r| r.ci_lower).collect::<Vec<f64>>(),
            "ci_upper" => self.iter().map(|r| r.ci_upper).collect::<Vec<f64>>(),
            "n_children" => self.iter().map(|r| r.n_children as u64).collect::<Vec<u64>>(),
            "group_size" => self.iter().map(|r| r.group_size as u64).collect::<Vec<u64>>(),
        }
    }

    fn group_size_column(&self) -> Option<&'static str> {
        Some(GROUP_SIZE_COLUMN)
    }
}

impl PublicTable for [CountryExposureDistribution] {
    fn table_name(&self) -> &'static str {
        COUNTRY_EXPOSURE_DISTRIBUTION
    }

    fn to_frame(&self) -> PolarsResult<DataFrame> {
        df! {
            "country" => self.iter().map(|r| r.country.clone()).collect::<Vec<String>>(),
            "exposure" => self.iter().map(|r| r.exposure.clone()).collect::<Vec<String>>(),
            "q1" => self.iter().map(|r| r.q1).collect::<Vec<f64>>(),
            "median" => self.iter().map(|r| r.median).collect::<Vec<f64>>(),
            "q3" => self.iter().map(|r| r.q3).collect::<Vec<f64>>(),
            "mean" => self.iter().map(|r| r.mean).collect::<Vec<f64>>(),
            "n_children" => self.iter().map(|r| r.n_children as u64).collect::<Vec<u64>>(),
            "group_size" => self.iter().map(|r| r.group_size as u64).collect::<Vec<u64>>(),
        }
    }

    fn group_size_column(&self) -> Option<&'static str> {
        Some(GROUP_SIZE_COLUMN)
    }
}

impl PublicTable for [ClusterSummaryRow] {
    fn table_name(&self) -> &'static str {
        CLUSTER_SUMMARY
    }

    fn to_frame(&self) -> PolarsResult<DataFrame> {
        df! {
            "country" => self.iter().map(|r| r.country.clone()).collect::<Vec<String>>(),
            "n_clusters" => self.iter().map(|r| r.n_clusters as u64).collect::<Vec<u64>>(),
        }
    }

    fn group_size_column(&self) -> Option<&'static str> {
        Some("n_clusters")
    }
}
