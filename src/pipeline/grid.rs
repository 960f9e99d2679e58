//! In-memory grid store for the monthly temperature field
//!
//! The grid is regular and rectangular: a latitude axis, a longitude axis and a
//! contiguous monthly time axis. Values are stored location-major so that the
//! full monthly series of one location is a contiguous slice.

use std::collections::HashSet;
use std::fmt;

use chrono::{Datelike, NaiveDate};
use polars::prelude::*;
use serde::{Deserialize, Serialize};

use super::error::{PipelineError, PipelineResult};
use crate::config::GridIngestConfig;

/// Offset between 0001-01-01 (CE day 1) and the Unix epoch, in days
const UNIX_EPOCH_CE_DAYS: i32 = 719_163;

/// Plausible range of near-surface temperature in °C
const PLAUSIBLE_CELSIUS: (f64, f64) = (-100.0, 70.0);

/// Candidate column names, first match wins
const LATITUDE_COLUMNS: [&str; 2] = ["latitude", "lat"];
const LONGITUDE_COLUMNS: [&str; 2] = ["longitude", "lon"];
const TIME_COLUMNS: [&str; 3] = ["time", "valid_time", "date"];

/// A calendar month of a specific year
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct YearMonth {
    year: i32,
    month: u32,
}

impl YearMonth {
    /// Create a year-month, returning None for months outside 1..=12
    pub fn new(year: i32, month: u32) -> Option<Self> {
        (1..=12).contains(&month).then_some(Self { year, month })
    }

    pub fn from_date(date: NaiveDate) -> Self {
        Self {
            year: date.year(),
            month: date.month(),
        }
    }

    /// Rebuild a year-month from its absolute month index
    pub fn from_index(index: i64) -> Self {
        Self {
            year: index.div_euclid(12) as i32,
            month: index.rem_euclid(12) as u32 + 1,
        }
    }

    pub fn year(&self) -> i32 {
        self.year
    }

    pub fn month(&self) -> u32 {
        self.month
    }

    /// Absolute month count since year 0, used for window arithmetic
    pub fn index(&self) -> i64 {
        self.year as i64 * 12 + (self.month as i64 - 1)
    }

    /// Shift by a (possibly negative) number of months
    pub fn offset(&self, months: i64) -> Self {
        Self::from_index(self.index() + months)
    }
}

impl fmt::Display for YearMonth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}-{:02}", self.year, self.month)
    }
}

/// Physical unit declared for the extract's value column
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TemperatureUnit {
    #[default]
    Kelvin,
    Celsius,
}

impl TemperatureUnit {
    fn to_celsius(self, value: f64) -> f64 {
        match self {
            TemperatureUnit::Kelvin => value - 273.15,
            TemperatureUnit::Celsius => value,
        }
    }
}

impl std::str::FromStr for TemperatureUnit {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "k" | "kelvin" => Ok(TemperatureUnit::Kelvin),
            "c" | "celsius" | "degc" => Ok(TemperatureUnit::Celsius),
            _ => Err(format!("Unknown temperature unit: '{}'. Use 'kelvin' or 'celsius'.", s)),
        }
    }
}

/// A uniformly spaced coordinate axis in ascending order
#[derive(Debug, Clone, PartialEq)]
pub struct RegularAxis {
    start: f64,
    step: f64,
    len: usize,
    /// Set when the axis covers the full 360° of longitude
    wraps: bool,
}

impl RegularAxis {
    /// Build an axis from explicit parameters
    pub fn new(start: f64, step: f64, len: usize) -> PipelineResult<Self> {
        if len == 0 || !(step > 0.0) || !start.is_finite() {
            return Err(PipelineError::Ingestion(format!(
                "invalid axis: start={}, step={}, len={}",
                start, step, len
            )));
        }
        Ok(Self {
            start,
            step,
            len,
            wraps: false,
        })
    }

    /// Build an axis from the sorted, de-duplicated coordinate values of an extract.
    ///
    /// Fails when the spacing is not uniform or differs from the declared resolution.
    pub fn from_values(name: &str, values: &[f64], declared_step: Option<f64>) -> PipelineResult<Self> {
        let Some(&first) = values.first() else {
            return Err(PipelineError::Ingestion(format!("{} axis is empty", name)));
        };

        if values.len() == 1 {
            let step = declared_step.ok_or_else(|| {
                PipelineError::Ingestion(format!(
                    "{} axis has a single value; declare a resolution to ingest it",
                    name
                ))
            })?;
            return Self::new(first, step, 1);
        }

        let last = values[values.len() - 1];
        let step = (last - first) / (values.len() - 1) as f64;
        let tolerance = step.abs() * 1e-3;

        for (i, pair) in values.windows(2).enumerate() {
            let diff = pair[1] - pair[0];
            if diff <= 0.0 {
                return Err(PipelineError::Ingestion(format!(
                    "{} axis is not strictly increasing at position {}",
                    name, i
                )));
            }
            if (diff - step).abs() > tolerance {
                return Err(PipelineError::Ingestion(format!(
                    "{} axis is not uniform: spacing {} at position {} differs from {}",
                    name, diff, i, step
                )));
            }
        }

        if let Some(declared) = declared_step {
            if (declared - step).abs() > tolerance {
                return Err(PipelineError::Ingestion(format!(
                    "{} resolution {} does not match declared resolution {}",
                    name, step, declared
                )));
            }
        }

        Self::new(first, step, values.len())
    }

    /// Mark the axis as periodic when it spans the whole globe
    fn with_wrap_if_global(mut self) -> Self {
        self.wraps = (self.step * self.len as f64 - 360.0).abs() < self.step * 1e-3;
        self
    }

    pub fn start(&self) -> f64 {
        self.start
    }

    pub fn step(&self) -> f64 {
        self.step
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn wraps(&self) -> bool {
        self.wraps
    }

    /// Coordinate of the i-th cell centre
    pub fn value(&self, index: usize) -> f64 {
        self.start + index as f64 * self.step
    }

    /// Index of the nearest cell centre, by index arithmetic.
    ///
    /// Returns None when the coordinate lies more than half a step beyond either end.
    pub fn nearest_index(&self, coordinate: f64) -> Option<usize> {
        if !coordinate.is_finite() {
            return None;
        }
        let position = ((coordinate - self.start) / self.step).round();
        if self.wraps {
            return Some((position as i64).rem_euclid(self.len as i64) as usize);
        }
        if position < 0.0 || position >= self.len as f64 {
            None
        } else {
            Some(position as usize)
        }
    }

    /// Nearest index on a longitude axis, measuring the offset eastward from
    /// the axis start modulo 360° so any labelling of the query resolves.
    pub fn nearest_longitude_index(&self, longitude: f64) -> Option<usize> {
        if !longitude.is_finite() {
            return None;
        }
        let offset = (longitude - self.start).rem_euclid(360.0);
        let position = (offset / self.step).round();
        if self.wraps {
            return Some((position as i64).rem_euclid(self.len as i64) as usize);
        }
        if position < self.len as f64 {
            return Some(position as usize);
        }
        // Within half a step west of the first centre
        let west = ((offset - 360.0) / self.step).round();
        (west == 0.0).then_some(0)
    }
}

/// A single grid value resolved for a query
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct GridCell {
    /// Flat location index (`lat_index * n_lon + lon_index`)
    pub location: usize,
    /// Cell centre latitude
    pub latitude: f64,
    /// Cell centre longitude
    pub longitude: f64,
    pub month: YearMonth,
    pub value: Option<f64>,
}

/// Regular monthly temperature grid in °C
#[derive(Debug, Clone)]
pub struct Grid {
    latitudes: RegularAxis,
    longitudes: RegularAxis,
    start: YearMonth,
    n_months: usize,
    values: Vec<Option<f64>>,
}

impl Grid {
    /// Assemble a grid from axes and location-major values (°C)
    pub fn from_parts(
        latitudes: RegularAxis,
        longitudes: RegularAxis,
        start: YearMonth,
        n_months: usize,
        values: Vec<Option<f64>>,
    ) -> PipelineResult<Self> {
        let expected = latitudes.len() * longitudes.len() * n_months;
        if n_months == 0 {
            return Err(PipelineError::Ingestion("time axis is empty".to_string()));
        }
        if values.len() != expected {
            return Err(PipelineError::Ingestion(format!(
                "grid holds {} values, axes require {}",
                values.len(),
                expected
            )));
        }
        Ok(Self {
            latitudes,
            longitudes,
            start,
            n_months,
            values,
        })
    }

    /// Ingest a long-format extract (one row per time, latitude, longitude).
    ///
    /// Validates the axes, the time key and the declared unit, converts to °C and
    /// normalizes longitudes from 0..360 to -180..180 when configured.
    pub fn from_frame(df: &DataFrame, config: &GridIngestConfig) -> PipelineResult<Self> {
        if df.height() == 0 {
            return Err(PipelineError::Ingestion("grid extract has no rows".to_string()));
        }

        let lat_name = find_column(df, &LATITUDE_COLUMNS)?;
        let lon_name = find_column(df, &LONGITUDE_COLUMNS)?;
        let lats = float_column(df, &lat_name)?;
        let mut lons = float_column(df, &lon_name)?;
        let values = float_column_nullable(df, &config.value_column)?;
        let months = time_keys(df)?;

        if config.normalize_longitude {
            for lon in lons.iter_mut() {
                *lon = normalize_longitude(*lon);
            }
        }

        let latitudes = RegularAxis::from_values("latitude", &sorted_unique(&lats), config.resolution)?;
        let longitudes =
            RegularAxis::from_values("longitude", &sorted_unique(&lons), config.resolution)?
                .with_wrap_if_global();

        let distinct_months: HashSet<i64> = months.iter().map(|m| m.index()).collect();
        let first = distinct_months.iter().min().copied().unwrap_or_default();
        let last = distinct_months.iter().max().copied().unwrap_or_default();
        let n_months = (last - first + 1) as usize;
        if distinct_months.len() != n_months {
            return Err(PipelineError::Ingestion(format!(
                "time axis has gaps: {} distinct months between {} and {}",
                distinct_months.len(),
                YearMonth::from_index(first),
                YearMonth::from_index(last)
            )));
        }

        let n_lon = longitudes.len();
        let n_locations = latitudes.len() * n_lon;
        let mut grid_values = vec![None; n_locations * n_months];
        let mut seen = vec![false; n_locations * n_months];

        for row in 0..df.height() {
            let (Some(lat_idx), Some(lon_idx)) = (
                latitudes.nearest_index(lats[row]),
                longitudes.nearest_index(lons[row]),
            ) else {
                return Err(PipelineError::Ingestion(format!(
                    "row {} has coordinates off the grid axes",
                    row
                )));
            };
            let t = (months[row].index() - first) as usize;
            let slot = (lat_idx * n_lon + lon_idx) * n_months + t;
            if seen[slot] {
                return Err(PipelineError::Ingestion(format!(
                    "duplicate grid entry at ({}, {}) for {}",
                    lats[row], lons[row], months[row]
                )));
            }
            seen[slot] = true;

            if let Some(raw) = values[row] {
                let celsius = config.units.to_celsius(raw);
                if !(PLAUSIBLE_CELSIUS.0..=PLAUSIBLE_CELSIUS.1).contains(&celsius) {
                    return Err(PipelineError::Ingestion(format!(
                        "value {} at row {} is implausible for declared unit {:?}",
                        raw, row, config.units
                    )));
                }
                grid_values[slot] = Some(celsius);
            }
        }

        Self::from_parts(
            latitudes,
            longitudes,
            YearMonth::from_index(first),
            n_months,
            grid_values,
        )
    }

    pub fn latitudes(&self) -> &RegularAxis {
        &self.latitudes
    }

    pub fn longitudes(&self) -> &RegularAxis {
        &self.longitudes
    }

    pub fn n_locations(&self) -> usize {
        self.latitudes.len() * self.longitudes.len()
    }

    pub fn n_months(&self) -> usize {
        self.n_months
    }

    /// First month covered
    pub fn start(&self) -> YearMonth {
        self.start
    }

    /// Last month covered
    pub fn end(&self) -> YearMonth {
        self.start.offset(self.n_months as i64 - 1)
    }

    pub fn month_at(&self, t: usize) -> YearMonth {
        self.start.offset(t as i64)
    }

    /// Position of a month on the time axis, if covered
    pub fn month_position(&self, month: YearMonth) -> Option<usize> {
        let offset = month.index() - self.start.index();
        (0..self.n_months as i64).contains(&offset).then_some(offset as usize)
    }

    /// Cell centre of a flat location index
    pub fn location_coords(&self, location: usize) -> (f64, f64) {
        let n_lon = self.longitudes.len();
        (
            self.latitudes.value(location / n_lon),
            self.longitudes.value(location % n_lon),
        )
    }

    /// Full monthly series of one location
    pub fn series(&self, location: usize) -> &[Option<f64>] {
        let start = location * self.n_months;
        &self.values[start..start + self.n_months]
    }

    pub fn value(&self, location: usize, t: usize) -> Option<f64> {
        self.values[location * self.n_months + t]
    }

    /// Nearest location for a point, or None outside the spatial coverage
    pub fn nearest_location(&self, latitude: f64, longitude: f64) -> Option<usize> {
        let lat_idx = self.latitudes.nearest_index(latitude)?;
        let lon_idx = self.longitudes.nearest_longitude_index(longitude)?;
        Some(lat_idx * self.longitudes.len() + lon_idx)
    }

    /// Resolve the nearest grid cell for a point and month
    pub fn lookup_nearest(&self, latitude: f64, longitude: f64, month: YearMonth) -> PipelineResult<GridCell> {
        let out_of_domain = || PipelineError::OutOfDomain {
            latitude,
            longitude,
            month,
        };
        let location = self.nearest_location(latitude, longitude).ok_or_else(out_of_domain)?;
        let t = self.month_position(month).ok_or_else(out_of_domain)?;
        let (cell_lat, cell_lon) = self.location_coords(location);
        Ok(GridCell {
            location,
            latitude: cell_lat,
            longitude: cell_lon,
            month,
            value: self.value(location, t),
        })
    }
}

/// Map a longitude in any range onto [-180, 180)
pub fn normalize_longitude(longitude: f64) -> f64 {
    (longitude + 180.0).rem_euclid(360.0) - 180.0
}

fn sorted_unique(values: &[f64]) -> Vec<f64> {
    let mut unique = values.to_vec();
    unique.sort_by(|a, b| a.total_cmp(b));
    unique.dedup_by(|a, b| (*a - *b).abs() < 1e-9);
    unique
}

fn find_column(df: &DataFrame, candidates: &[&str]) -> PipelineResult<String> {
    let names: Vec<String> = df.get_column_names().iter().map(|s| s.to_string()).collect();
    candidates
        .iter()
        .find(|c| names.iter().any(|n| n == *c))
        .map(|c| c.to_string())
        .ok_or_else(|| {
            PipelineError::Ingestion(format!(
                "none of the columns {:?} found. Available columns: {:?}",
                candidates, names
            ))
        })
}

fn float_column_nullable(df: &DataFrame, name: &str) -> PipelineResult<Vec<Option<f64>>> {
    let column = df
        .column(name)
        .map_err(|_| PipelineError::Ingestion(format!("column '{}' not found in extract", name)))?;
    if !column.dtype().is_primitive_numeric() {
        return Err(PipelineError::Ingestion(format!(
            "column '{}' must be numeric, found {}",
            name,
            column.dtype()
        )));
    }
    let cast = column.cast(&DataType::Float64)?;
    let values = cast
        .f64()?
        .into_iter()
        .map(|v| v.filter(|x| !x.is_nan()))
        .collect();
    Ok(values)
}

fn float_column(df: &DataFrame, name: &str) -> PipelineResult<Vec<f64>> {
    float_column_nullable(df, name)?
        .into_iter()
        .enumerate()
        .map(|(row, v)| {
            v.ok_or_else(|| {
                PipelineError::Ingestion(format!("column '{}' has a null at row {}", name, row))
            })
        })
        .collect()
}

/// Read the time key of every row, from `year`/`month` columns or a date-like column
fn time_keys(df: &DataFrame) -> PipelineResult<Vec<YearMonth>> {
    let names: Vec<String> = df.get_column_names().iter().map(|s| s.to_string()).collect();
    let has = |n: &str| names.iter().any(|c| c == n);

    if has("year") && has("month") {
        let years = float_column(df, "year")?;
        let months = float_column(df, "month")?;
        return years
            .iter()
            .zip(months.iter())
            .enumerate()
            .map(|(row, (&y, &m))| {
                YearMonth::new(y as i32, m as u32).ok_or_else(|| {
                    PipelineError::Ingestion(format!("invalid month {} at row {}", m, row))
                })
            })
            .collect();
    }

    let name = find_column(df, &TIME_COLUMNS)?;
    let column = df.column(&name)?;
    let dates: Vec<Option<NaiveDate>> = match column.dtype() {
        DataType::String => column
            .str()?
            .into_iter()
            .map(|v| v.and_then(parse_date_prefix))
            .collect(),
        DataType::Date | DataType::Datetime(_, _) => {
            let days = column.cast(&DataType::Date)?.cast(&DataType::Int32)?;
            days.i32()?
                .into_iter()
                .map(|d| d.and_then(|d| NaiveDate::from_num_days_from_ce_opt(d + UNIX_EPOCH_CE_DAYS)))
                .collect()
        }
        other => {
            return Err(PipelineError::Ingestion(format!(
                "time column '{}' has unsupported type {}",
                name, other
            )))
        }
    };

    dates
        .into_iter()
        .enumerate()
        .map(|(row, d)| {
            d.map(YearMonth::from_date).ok_or_else(|| {
                PipelineError::Ingestion(format!("unparseable time at row {} of '{}'", row, name))
            })
        })
        .collect()
}

/// Parse `YYYY-MM-DD` or `YYYY-MM` at the start of a timestamp string
pub fn parse_date_prefix(s: &str) -> Option<NaiveDate> {
    let s = s.trim();
    if let Some(head) = s.get(..10) {
        if let Ok(date) = NaiveDate::parse_from_str(head, "%Y-%m-%d") {
            return Some(date);
        }
    }
    s.get(..7)
        .and_then(|head| NaiveDate::parse_from_str(&format!("{}-01", head), "%Y-%m-%d").ok())
}
