//! Spatial coarsening of the anomaly field for map-scale output
//!
//! Each native cell belongs to the coarse cell whose bounds contain its
//! centroid. Coarse values are the plain arithmetic mean of the contributing
//! native anomalies; cell area is not weighted, so the result drifts from an
//! area-weighted mean at high latitudes.

use std::collections::BTreeMap;

use serde::Serialize;

use super::baseline::AnomalyField;
use super::grid::Grid;

/// Annual mean anomaly of one coarse cell
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CoarseCell {
    /// Coarse cell centre latitude
    pub latitude: f64,
    /// Coarse cell centre longitude
    pub longitude: f64,
    pub year: i32,
    pub anomaly_mean: f64,
    /// Defined native values averaged into this cell
    pub n_native: usize,
}

/// Index of the coarse cell containing a coordinate; bounds are `[c - r/2, c + r/2)`
pub fn coarse_index(coordinate: f64, resolution: f64) -> i64 {
    (coordinate / resolution + 0.5).floor() as i64
}

/// Coarsen the anomaly field to `resolution` degrees for each year in range.
///
/// Coarse cells without contributions are omitted rather than zero-filled.
/// Rows are sorted by year, latitude, longitude.
pub fn resample_annual(
    grid: &Grid,
    anomalies: &AnomalyField,
    resolution: f64,
    years: std::ops::RangeInclusive<i32>,
) -> Vec<CoarseCell> {
    // (year, lat index, lon index) -> (sum, count)
    let mut accumulators: BTreeMap<(i32, i64, i64), (f64, usize)> = BTreeMap::new();

    for location in 0..grid.n_locations() {
        let (lat, lon) = grid.location_coords(location);
        let key_lat = coarse_index(lat, resolution);
        let key_lon = coarse_index(lon, resolution);

        for (t, value) in anomalies.series(location).iter().enumerate() {
            let year = grid.month_at(t).year();
            if !years.contains(&year) {
                continue;
            }
            if let Some(v) = value {
                let entry = accumulators.entry((year, key_lat, key_lon)).or_insert((0.0, 0));
                entry.0 += v;
                entry.1 += 1;
            }
        }
    }

    accumulators
        .into_iter()
        .map(|((year, lat_idx, lon_idx), (sum, n))| CoarseCell {
            latitude: lat_idx as f64 * resolution,
            longitude: lon_idx as f64 * resolution,
            year,
            anomaly_mean: sum / n as f64,
            n_native: n,
        })
        .collect()
}
