//! Survey extract schema and ingestion
//!
//! Survey fields are declared once as required or optional and validated when
//! the extract is read. Downstream code works with typed records whose optional
//! fields are present-or-explicitly-absent instead of probing columns.

use std::collections::{BTreeMap, HashSet};

use chrono::NaiveDate;
use polars::prelude::*;

use super::error::{PipelineError, PipelineResult};
use super::grid::parse_date_prefix;
use crate::config::SurveyConfig;

const UNIX_EPOCH_CE_DAYS: i32 = 719_163;

/// Value type of a declared field
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    /// Free text, read from any column type
    Text,
    /// Numeric value
    Float,
    /// Calendar date (Date column or ISO string)
    Date,
    /// Categorical response code, read from any column type
    Code,
}

/// Declared field of a survey extract
#[derive(Debug, Clone)]
pub struct FieldSpec {
    /// Canonical name followed by accepted aliases
    pub names: Vec<String>,
    pub kind: FieldKind,
    /// Column must be present
    pub required: bool,
    /// Values may be null
    pub nullable: bool,
}

impl FieldSpec {
    fn new(names: &[&str], kind: FieldKind, required: bool, nullable: bool) -> Self {
        Self {
            names: names.iter().map(|s| s.to_string()).collect(),
            kind,
            required,
            nullable,
        }
    }

    pub fn name(&self) -> &str {
        &self.names[0]
    }
}

/// Typed values of one validated field
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValues {
    Text(Vec<Option<String>>),
    Float(Vec<Option<f64>>),
    Date(Vec<Option<NaiveDate>>),
}

/// Frame whose declared fields have been checked and typed
#[derive(Debug, Clone)]
pub struct ValidatedFrame {
    height: usize,
    fields: BTreeMap<String, FieldValues>,
    /// Optional fields missing from the extract
    pub absent: Vec<String>,
}

impl ValidatedFrame {
    pub fn height(&self) -> usize {
        self.height
    }

    pub fn text(&self, name: &str) -> &[Option<String>] {
        match self.fields.get(name) {
            Some(FieldValues::Text(v)) => v,
            _ => &[],
        }
    }

    pub fn float(&self, name: &str) -> &[Option<f64>] {
        match self.fields.get(name) {
            Some(FieldValues::Float(v)) => v,
            _ => &[],
        }
    }

    pub fn date(&self, name: &str) -> &[Option<NaiveDate>] {
        match self.fields.get(name) {
            Some(FieldValues::Date(v)) => v,
            _ => &[],
        }
    }
}

/// Declared schema of a survey extract
#[derive(Debug, Clone)]
pub struct SurveySchema {
    pub fields: Vec<FieldSpec>,
}

impl SurveySchema {
    /// Schema of the geocoded cluster extract
    pub fn clusters() -> Self {
        Self {
            fields: vec![
                FieldSpec::new(&["cluster_id", "cluster"], FieldKind::Text, true, false),
                FieldSpec::new(&["country", "country_str"], FieldKind::Text, true, false),
                FieldSpec::new(&["latitude", "lat"], FieldKind::Float, true, false),
                FieldSpec::new(&["longitude", "lon"], FieldKind::Float, true, false),
                FieldSpec::new(&["interview_date"], FieldKind::Date, true, false),
            ],
        }
    }

    /// Schema of the child extract with the given response and covariate fields
    pub fn children(response_fields: &[String], covariates: &[String]) -> Self {
        let mut fields = vec![
            FieldSpec::new(&["child_id"], FieldKind::Text, true, false),
            FieldSpec::new(&["cluster_id", "cluster"], FieldKind::Text, true, false),
            FieldSpec::new(&["birth_date"], FieldKind::Date, true, true),
        ];
        fields.extend(
            response_fields
                .iter()
                .map(|f| FieldSpec::new(&[f.as_str()], FieldKind::Code, false, true)),
        );
        fields.extend(
            covariates
                .iter()
                .map(|f| FieldSpec::new(&[f.as_str()], FieldKind::Text, false, true)),
        );
        Self { fields }
    }

    /// Check the frame against the schema and extract typed values
    pub fn validate(&self, df: &DataFrame) -> PipelineResult<ValidatedFrame> {
        let columns: Vec<String> = df.get_column_names().iter().map(|s| s.to_string()).collect();
        let height = df.height();
        let mut fields = BTreeMap::new();
        let mut absent = Vec::new();

        for spec in &self.fields {
            let found = spec.names.iter().find(|n| columns.contains(n));
            let values = match found {
                Some(column_name) => {
                    let column = df.column(column_name)?;
                    let values = read_field(column, spec)?;
                    if !spec.nullable {
                        if let Some(row) = first_null(&values) {
                            return Err(PipelineError::Ingestion(format!(
                                "required field '{}' is missing a value at row {}",
                                spec.name(),
                                row
                            )));
                        }
                    }
                    values
                }
                None if spec.required => {
                    return Err(PipelineError::Ingestion(format!(
                        "required field '{}' not found (accepted names: {:?}). Available columns: {:?}",
                        spec.name(),
                        spec.names,
                        columns
                    )));
                }
                None => {
                    absent.push(spec.name().to_string());
                    empty_field(spec.kind, height)
                }
            };
            fields.insert(spec.name().to_string(), values);
        }

        if !absent.is_empty() {
            tracing::warn!(fields = ?absent, "optional survey fields absent from extract");
        }

        Ok(ValidatedFrame {
            height,
            fields,
            absent,
        })
    }
}

fn empty_field(kind: FieldKind, height: usize) -> FieldValues {
    match kind {
        FieldKind::Text | FieldKind::Code => FieldValues::Text(vec![None; height]),
        FieldKind::Float => FieldValues::Float(vec![None; height]),
        FieldKind::Date => FieldValues::Date(vec![None; height]),
    }
}

fn first_null(values: &FieldValues) -> Option<usize> {
    match values {
        FieldValues::Text(v) => v.iter().position(|x| x.is_none()),
        FieldValues::Float(v) => v.iter().position(|x| x.is_none()),
        FieldValues::Date(v) => v.iter().position(|x| x.is_none()),
    }
}

fn read_field(column: &Column, spec: &FieldSpec) -> PipelineResult<FieldValues> {
    match spec.kind {
        FieldKind::Text | FieldKind::Code => Ok(FieldValues::Text(column_to_string_vec(column)?)),
        FieldKind::Float => {
            if !column.dtype().is_primitive_numeric() {
                return Err(PipelineError::Ingestion(format!(
                    "field '{}' must be numeric, found {}",
                    spec.name(),
                    column.dtype()
                )));
            }
            let cast = column.cast(&DataType::Float64)?;
            Ok(FieldValues::Float(
                cast.f64()?
                    .into_iter()
                    .map(|v| v.filter(|x| x.is_finite()))
                    .collect(),
            ))
        }
        FieldKind::Date => {
            let dates = match column.dtype() {
                DataType::String => column
                    .str()?
                    .into_iter()
                    .map(|v| v.and_then(parse_date_prefix))
                    .collect(),
                DataType::Date | DataType::Datetime(_, _) => {
                    let days = column.cast(&DataType::Date)?.cast(&DataType::Int32)?;
                    days.i32()?
                        .into_iter()
                        .map(|d| {
                            d.and_then(|d| NaiveDate::from_num_days_from_ce_opt(d + UNIX_EPOCH_CE_DAYS))
                        })
                        .collect()
                }
                other => {
                    return Err(PipelineError::Ingestion(format!(
                        "field '{}' must be a date, found {}",
                        spec.name(),
                        other
                    )))
                }
            };
            Ok(FieldValues::Date(dates))
        }
    }
}

/// Convert a column to optional strings; blank strings count as missing
fn column_to_string_vec(col: &Column) -> PipelineResult<Vec<Option<String>>> {
    let values: Vec<Option<String>> = match col.dtype() {
        DataType::String => col
            .str()?
            .into_iter()
            .map(|v| v.map(|s| s.trim().to_string()))
            .collect(),
        DataType::Int8 | DataType::Int16 | DataType::Int32 | DataType::Int64 => {
            let cast = col.cast(&DataType::Int64)?;
            cast.i64()?
                .into_iter()
                .map(|v| v.map(|n| n.to_string()))
                .collect()
        }
        DataType::UInt8 | DataType::UInt16 | DataType::UInt32 | DataType::UInt64 => {
            let cast = col.cast(&DataType::UInt64)?;
            cast.u64()?
                .into_iter()
                .map(|v| v.map(|n| n.to_string()))
                .collect()
        }
        DataType::Float32 | DataType::Float64 => {
            let cast = col.cast(&DataType::Float64)?;
            cast.f64()?
                .into_iter()
                .map(|v| v.filter(|n| !n.is_nan()).map(|n| format!("{}", n)))
                .collect()
        }
        DataType::Boolean => col
            .bool()?
            .into_iter()
            .map(|v| v.map(|b| b.to_string()))
            .collect(),
        _ => {
            let cast = col.cast(&DataType::String)?;
            cast.str()?
                .into_iter()
                .map(|v| v.map(|s| s.trim().to_string()))
                .collect()
        }
    };

    Ok(values
        .into_iter()
        .map(|v| v.filter(|s| !s.is_empty()))
        .collect())
}

/// A geocoded survey sampling point. Private: never written to a public artifact.
#[derive(Debug, Clone, PartialEq)]
pub struct SurveyCluster {
    pub cluster_id: String,
    pub country: String,
    pub latitude: f64,
    pub longitude: f64,
    pub interview_date: NaiveDate,
}

/// One child linked to exactly one cluster
#[derive(Debug, Clone, PartialEq)]
pub struct ChildRecord {
    pub child_id: String,
    pub cluster_id: String,
    pub birth_date: Option<NaiveDate>,
    /// Raw response codes by field name; None when missing or absent
    pub responses: BTreeMap<String, Option<String>>,
    pub covariates: BTreeMap<String, Option<String>>,
}

/// Clusters kept for linkage plus the ids dropped by the study-country filter
#[derive(Debug, Clone, Default)]
pub struct ClusterSet {
    pub clusters: Vec<SurveyCluster>,
    pub filtered_out: HashSet<String>,
}

/// Resolve a country name through the configured aliases
pub fn canonical_country(name: &str, config: &SurveyConfig) -> String {
    config
        .country_aliases
        .get(name)
        .cloned()
        .unwrap_or_else(|| name.to_string())
}

/// Read geocoded clusters, applying country aliases and the study-country filter
pub fn read_clusters(df: &DataFrame, config: &SurveyConfig) -> PipelineResult<ClusterSet> {
    let frame = SurveySchema::clusters().validate(df)?;
    let ids = frame.text("cluster_id");
    let countries = frame.text("country");
    let lats = frame.float("latitude");
    let lons = frame.float("longitude");
    let dates = frame.date("interview_date");

    let mut seen = HashSet::new();
    let mut set = ClusterSet::default();

    for row in 0..frame.height() {
        // Non-nullable fields were checked in validate()
        let (Some(id), Some(country), Some(lat), Some(lon), Some(date)) = (
            ids[row].clone(),
            countries[row].as_deref(),
            lats[row],
            lons[row],
            dates[row],
        ) else {
            continue;
        };
        if !seen.insert(id.clone()) {
            return Err(PipelineError::Ingestion(format!("duplicate cluster id '{}'", id)));
        }
        let country = canonical_country(country, config);
        if !config.study_countries.is_empty() && !config.study_countries.contains(&country) {
            set.filtered_out.insert(id);
            continue;
        }
        set.clusters.push(SurveyCluster {
            cluster_id: id,
            country,
            latitude: lat,
            longitude: lon,
            interview_date: date,
        });
    }

    tracing::info!(
        kept = set.clusters.len(),
        filtered = set.filtered_out.len(),
        "cluster extract validated"
    );

    Ok(set)
}

/// Read child records with the given response fields and covariates
pub fn read_children(
    df: &DataFrame,
    response_fields: &[String],
    covariates: &[String],
) -> PipelineResult<Vec<ChildRecord>> {
    let frame = SurveySchema::children(response_fields, covariates).validate(df)?;
    let ids = frame.text("child_id");
    let clusters = frame.text("cluster_id");
    let births = frame.date("birth_date");

    let mut seen = HashSet::new();
    let mut children = Vec::with_capacity(frame.height());

    for row in 0..frame.height() {
        let (Some(child_id), Some(cluster_id)) = (ids[row].clone(), clusters[row].clone()) else {
            continue;
        };
        if !seen.insert(child_id.clone()) {
            return Err(PipelineError::Ingestion(format!("duplicate child id '{}'", child_id)));
        }
        let responses = response_fields
            .iter()
            .map(|f| (f.clone(), frame.text(f)[row].clone()))
            .collect();
        let covariate_values = covariates
            .iter()
            .map(|f| (f.clone(), frame.text(f)[row].clone()))
            .collect();
        children.push(ChildRecord {
            child_id,
            cluster_id,
            birth_date: births[row],
            responses,
            covariates: covariate_values,
        });
    }

    Ok(children)
}
