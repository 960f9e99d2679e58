//! De-identification and export gate
//!
//! The gate is the only writer of public artifacts. Survey-derived tables
//! must carry a group size on every row and no identifying column; tables
//! computed from the grid alone are held to the climate column vocabulary.
//! `commit` writes nothing unless every staged table passed.

use std::fs;
use std::path::{Component, Path, PathBuf};

use chrono::Utc;
use polars::prelude::*;
use serde::Serialize;

use crate::config::OutputFormat;
use crate::pipeline::error::{PipelineError, PipelineResult};
use crate::pipeline::loader::write_frame;

/// Column names that identify a place, cluster, household or person
pub const IDENTIFYING_COLUMNS: &[&str] = &[
    "latitude",
    "longitude",
    "lat",
    "lon",
    "lng",
    "long",
    "x",
    "y",
    "geometry",
    "cluster",
    "cluster_id",
    "child_id",
    "household_id",
    "hh_id",
    "person_id",
];

/// Name tokens that mark a location or record identifier wherever they appear
const IDENTIFYING_TOKENS: &[&str] = &[
    "cell", "cluster", "coord", "coords", "coordinate", "coordinates", "geom", "geometry", "hh", "household",
    "child", "person", "caseid", "id",
];

/// Fragments matched anywhere in a name, for survey codebook spellings
const IDENTIFYING_FRAGMENTS: &[&str] = &["latnum", "longnum", "dhsclust", "gps"];

/// Columns allowed in tables derived from the grid alone
const CLIMATE_COLUMNS: &[&str] = &["year", "month", "n_native", "cell_latitude", "cell_longitude"];
const CLIMATE_PREFIXES: &[&str] = &["t2m_", "anomaly_"];

/// Column conventionally holding the distinct-cluster count of a row
pub const GROUP_SIZE_COLUMN: &str = "group_size";

/// Whether a column name denotes a location or a record identifier.
///
/// Matching is case-insensitive over the whole name, its `_`-separated tokens
/// (`lat*`/`lon*`/`lng*` prefixes included) and known codebook fragments.
pub fn is_identifying_column(name: &str) -> bool {
    let lowered = name.to_lowercase();
    if IDENTIFYING_COLUMNS.contains(&lowered.as_str()) {
        return true;
    }
    if IDENTIFYING_FRAGMENTS.iter().any(|f| lowered.contains(f)) {
        return true;
    }
    lowered
        .split(|c: char| !c.is_ascii_alphanumeric())
        .filter(|token| !token.is_empty())
        .any(|token| {
            IDENTIFYING_TOKENS.contains(&token)
                || ["lat", "lon", "lng"].iter().any(|p| token.starts_with(p))
        })
}

/// Whether a column belongs to the vocabulary of the grid-only tables
pub fn is_climate_column(name: &str) -> bool {
    CLIMATE_COLUMNS.contains(&name) || CLIMATE_PREFIXES.iter().any(|p| name.starts_with(p))
}

/// A survey-derived table eligible for public export
pub trait PublicTable {
    /// File stem of the exported table
    fn table_name(&self) -> &'static str;

    fn to_frame(&self) -> PolarsResult<DataFrame>;

    /// Column holding the number of distinct source clusters behind each row
    fn group_size_column(&self) -> Option<&'static str> {
        None
    }
}

/// Gate settings
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GateConfig {
    pub min_group_size: usize,
    pub format: OutputFormat,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            min_group_size: 5,
            format: OutputFormat::Csv,
        }
    }
}

/// One exported table in the manifest
#[derive(Debug, Clone, Serialize)]
pub struct ManifestEntry {
    pub name: String,
    pub file: String,
    pub rows: usize,
    pub columns: Vec<String>,
}

/// Record of a committed export
#[derive(Debug, Clone, Serialize)]
pub struct ExportManifest {
    pub created_at: String,
    pub climalink_version: String,
    pub min_group_size: usize,
    pub tables: Vec<ManifestEntry>,
}

struct StagedTable {
    name: String,
    frame: DataFrame,
}

/// Check a survey-derived frame: no identifying column, and a group size at
/// or above the minimum on every row
pub fn check_frame(name: &str, df: &DataFrame, group_size_column: Option<&str>, min_group_size: usize) -> PipelineResult<()> {
    for column in df.get_column_names() {
        if is_identifying_column(column) {
            return Err(PipelineError::PrivacyViolation(format!(
                "table '{}' contains identifying column '{}'",
                name, column
            )));
        }
    }

    let Some(group_column) = group_size_column else {
        return Err(PipelineError::PrivacyViolation(format!(
            "table '{}' has no group-size column",
            name
        )));
    };
    let column = df.column(group_column).map_err(|_| {
        PipelineError::PrivacyViolation(format!(
            "table '{}' declares group-size column '{}' but does not contain it",
            name, group_column
        ))
    })?;
    let sizes = column.cast(&DataType::Float64)?;
    for (row, size) in sizes.f64()?.into_iter().enumerate() {
        match size {
            Some(s) if s >= min_group_size as f64 => {}
            Some(s) => {
                return Err(PipelineError::PrivacyViolation(format!(
                    "table '{}' row {} aggregates {} clusters, below the minimum of {}",
                    name, row, s, min_group_size
                )))
            }
            None => {
                return Err(PipelineError::PrivacyViolation(format!(
                    "table '{}' row {} has no group size",
                    name, row
                )))
            }
        }
    }
    Ok(())
}

/// Check a grid-only frame against the climate column vocabulary
fn check_climate_frame(name: &str, df: &DataFrame) -> PipelineResult<()> {
    match df.get_column_names().into_iter().find(|c| !is_climate_column(c.as_str())) {
        Some(column) => Err(PipelineError::PrivacyViolation(format!(
            "climate table '{}' carries non-climate column '{}'",
            name, column
        ))),
        None => Ok(()),
    }
}

/// Staging area for public tables
pub struct ExportGate {
    public_dir: PathBuf,
    config: GateConfig,
    staged: Vec<StagedTable>,
}

impl ExportGate {
    /// Create a gate writing to `public_dir`; the local-only directory must be disjoint
    pub fn new(public_dir: &Path, local_dir: &Path, config: GateConfig) -> PipelineResult<Self> {
        let public = lexical_absolute(public_dir)?;
        let local = lexical_absolute(local_dir)?;
        if public.starts_with(&local) || local.starts_with(&public) {
            return Err(PipelineError::PrivacyViolation(format!(
                "public directory {} overlaps local-only directory {}",
                public_dir.display(),
                local_dir.display()
            )));
        }
        if public.file_name().is_none() {
            return Err(PipelineError::PrivacyViolation(format!(
                "public directory {} must be a named directory",
                public_dir.display()
            )));
        }
        Ok(Self {
            public_dir: public,
            config,
            staged: Vec::new(),
        })
    }

    /// Stage a survey-derived table after checking it
    pub fn stage<T: PublicTable + ?Sized>(&mut self, table: &T) -> PipelineResult<()> {
        let frame = table.to_frame()?;
        self.stage_frame(table.table_name(), frame, table.group_size_column())
    }

    /// Stage a raw survey-derived frame. A `group_size` column is used when none
    /// is declared; a frame without one is rejected.
    pub fn stage_frame(&mut self, name: &str, frame: DataFrame, group_size_column: Option<&str>) -> PipelineResult<()> {
        let has_default_column = frame
            .get_column_names()
            .iter()
            .any(|c| c.as_str() == GROUP_SIZE_COLUMN);
        let group_column = group_size_column.or(has_default_column.then_some(GROUP_SIZE_COLUMN));

        check_frame(name, &frame, group_column, self.config.min_group_size)?;
        self.push(name, frame);
        Ok(())
    }

    /// Stage a table computed from the grid alone
    pub(crate) fn stage_climate_frame(&mut self, name: &str, frame: DataFrame) -> PipelineResult<()> {
        check_climate_frame(name, &frame)?;
        self.push(name, frame);
        Ok(())
    }

    fn push(&mut self, name: &str, frame: DataFrame) {
        if let Some(existing) = self.staged.iter_mut().find(|t| t.name == name) {
            tracing::warn!(table = name, "table staged twice, keeping the latest");
            existing.frame = frame;
        } else {
            self.staged.push(StagedTable {
                name: name.to_string(),
                frame,
            });
        }
        tracing::debug!(table = name, "table staged for export");
    }

    /// Sibling of the public directory with a given prefix
    fn sibling(&self, prefix: &str) -> PathBuf {
        let name = self
            .public_dir
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        self.public_dir
            .with_file_name(format!(".{}.{}-{}", name, prefix, std::process::id()))
    }

    /// Write every staged table and the manifest.
    ///
    /// Everything is written to a staging directory next to the public one,
    /// which then replaces it. A failed commit leaves the previous public tier
    /// untouched, and files from earlier runs do not survive a commit.
    pub fn commit(self) -> PipelineResult<ExportManifest> {
        self.check_replaceable()?;
        let staging = self.sibling("staging");
        if staging.exists() {
            fs::remove_dir_all(&staging)?;
        }
        fs::create_dir_all(&staging)?;

        let manifest = match self.write_tables(&staging) {
            Ok(manifest) => manifest,
            Err(e) => {
                let _ = fs::remove_dir_all(&staging);
                return Err(e);
            }
        };

        let previous = self.sibling("previous");
        let had_previous = self.public_dir.exists();
        if had_previous {
            fs::rename(&self.public_dir, &previous)?;
        }
        if let Err(e) = fs::rename(&staging, &self.public_dir) {
            if had_previous {
                let _ = fs::rename(&previous, &self.public_dir);
            }
            let _ = fs::remove_dir_all(&staging);
            return Err(e.into());
        }
        if had_previous {
            if let Err(e) = fs::remove_dir_all(&previous) {
                tracing::warn!(error = %e, dir = %previous.display(), "failed to remove previous public artifacts");
            }
        }

        tracing::info!(
            tables = manifest.tables.len(),
            dir = %self.public_dir.display(),
            "public artifacts committed"
        );
        Ok(manifest)
    }

    /// An existing public directory is replaced only if it is empty or holds a
    /// previous export
    fn check_replaceable(&self) -> PipelineResult<()> {
        if !self.public_dir.exists() || self.public_dir.join("manifest.json").exists() {
            return Ok(());
        }
        if fs::read_dir(&self.public_dir)?.next().is_none() {
            return Ok(());
        }
        Err(PipelineError::Io(std::io::Error::other(format!(
            "{} holds files that are not a previous export; choose an empty public directory",
            self.public_dir.display()
        ))))
    }

    fn write_tables(&self, dir: &Path) -> PipelineResult<ExportManifest> {
        let extension = self.config.format.extension();
        let mut entries = Vec::with_capacity(self.staged.len());
        for table in &self.staged {
            let file = format!("{}.{}", table.name, extension);
            let mut frame = table.frame.clone();
            write_frame(&mut frame, &dir.join(&file), self.config.format)?;
            entries.push(ManifestEntry {
                name: table.name.clone(),
                file,
                rows: frame.height(),
                columns: frame.get_column_names().iter().map(|s| s.to_string()).collect(),
            });
        }

        let manifest = ExportManifest {
            created_at: Utc::now().to_rfc3339(),
            climalink_version: env!("CARGO_PKG_VERSION").to_string(),
            min_group_size: self.config.min_group_size,
            tables: entries,
        };
        let json = serde_json::to_string_pretty(&manifest)
            .map_err(|e| PipelineError::Io(std::io::Error::other(e)))?;
        fs::write(dir.join("manifest.json"), json)?;
        Ok(manifest)
    }
}

/// Absolute path with `.` and `..` resolved lexically (the path may not exist yet)
fn lexical_absolute(path: &Path) -> PipelineResult<PathBuf> {
    let absolute = std::path::absolute(path)?;
    let mut out = PathBuf::new();
    for component in absolute.components() {
        match component {
            Component::ParentDir => {
                out.pop();
            }
            Component::CurDir => {}
            other => out.push(other),
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_identifying_column_rejected_case_insensitive() {
        let df = df! { "country" => ["Malawi"], "Latitude" => [-13.2], "group_size" => [6u64] }.unwrap();
        let err = check_frame("t", &df, Some("group_size"), 5).unwrap_err();
        assert!(matches!(err, PipelineError::PrivacyViolation(_)));
    }

    #[test]
    fn test_identifying_names_and_spellings() {
        for name in [
            "LATNUM", "LONGNUM", "DHSCLUST", "hv001_gps", "cell_latitude", "cell_lon", "Lat_dd", "lon2",
            "cluster_ref", "hh_id", "cell_index", "child_id",
        ] {
            assert!(is_identifying_column(name), "{} should be identifying", name);
        }
        for name in [
            "country", "temperature_bin", "n_clusters", "n_children", "group_size", "prevalence", "median",
            "exposure",
        ] {
            assert!(!is_identifying_column(name), "{} should be allowed", name);
        }
    }

    #[test]
    fn test_survey_frame_without_group_size_rejected() {
        let df = df! { "country" => ["Malawi"], "prevalence" => [0.4] }.unwrap();
        let err = check_frame("t", &df, None, 5).unwrap_err();
        assert!(err.to_string().contains("no group-size column"));
    }

    #[test]
    fn test_climate_frame_vocabulary() {
        let map = df! {
            "cell_latitude" => [-13.0],
            "cell_longitude" => [34.0],
            "year" => [2020],
            "anomaly_mean" => [0.4],
            "n_native" => [4u64],
        }
        .unwrap();
        assert!(check_climate_frame("spatial_anomalies", &map).is_ok());

        let per_cluster = df! { "cell_latitude" => [-13.0], "exposure_value" => [27.1] }.unwrap();
        let err = check_climate_frame("spatial_anomalies", &per_cluster).unwrap_err();
        assert!(err.to_string().contains("exposure_value"));
    }

    #[test]
    fn test_small_group_rejected() {
        let df = df! { "country" => ["A", "B"], "group_size" => [5u64, 4] }.unwrap();
        let err = check_frame("t", &df, Some("group_size"), 5).unwrap_err();
        assert!(err.to_string().contains("below the minimum of 5"));
    }

    #[test]
    fn test_nested_directories_rejected() {
        let dir = TempDir::new().unwrap();
        let local = dir.path().join("out");
        let public = local.join("public");
        assert!(ExportGate::new(&public, &local, GateConfig::default()).is_err());
        assert!(ExportGate::new(&local, &local, GateConfig::default()).is_err());
        assert!(ExportGate::new(&dir.path().join("pub"), &local, GateConfig::default()).is_ok());
    }

    #[test]
    fn test_undeclared_group_size_column_still_checked() {
        let dir = TempDir::new().unwrap();
        let mut gate = ExportGate::new(&dir.path().join("pub"), &dir.path().join("loc"), GateConfig::default()).unwrap();
        let df = df! { "country" => ["A"], "group_size" => [2u64] }.unwrap();
        assert!(gate.stage_frame("t", df, None).is_err());
        assert!(gate.staged.is_empty());
    }

    #[test]
    fn test_commit_replaces_previous_public_tier() {
        let dir = TempDir::new().unwrap();
        let public = dir.path().join("pub");
        let local = dir.path().join("loc");

        let mut first = ExportGate::new(&public, &local, GateConfig::default()).unwrap();
        let df = df! { "country" => ["A"], "group_size" => [7u64] }.unwrap();
        first.stage_frame("old_summary", df, None).unwrap();
        first.commit().unwrap();
        assert!(public.join("old_summary.csv").exists());

        let mut second = ExportGate::new(&public, &local, GateConfig::default()).unwrap();
        let df = df! { "country" => ["A"], "group_size" => [7u64] }.unwrap();
        second.stage_frame("summary", df, None).unwrap();
        let manifest = second.commit().unwrap();

        assert_eq!(manifest.tables.len(), 1);
        assert!(public.join("summary.csv").exists());
        assert!(public.join("manifest.json").exists());
        assert!(!public.join("old_summary.csv").exists());

        // Only the public directory and nothing from staging remains
        let siblings: Vec<_> = fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(siblings, vec!["pub".to_string()]);
    }

    #[test]
    fn test_commit_refuses_foreign_directory() {
        let dir = TempDir::new().unwrap();
        let public = dir.path().join("pub");
        fs::create_dir_all(&public).unwrap();
        fs::write(public.join("notes.txt"), "keep").unwrap();

        let mut gate = ExportGate::new(&public, &dir.path().join("loc"), GateConfig::default()).unwrap();
        let df = df! { "country" => ["A"], "group_size" => [7u64] }.unwrap();
        gate.stage_frame("summary", df, None).unwrap();
        assert!(gate.commit().is_err());
        assert!(public.join("notes.txt").exists());
        assert!(!public.join("summary.csv").exists());
    }
}
