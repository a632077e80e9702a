//! Tabular input readers for reported and predictor records.
//!
//! Cells are read as text and coerced: blank or non-numeric values become
//! missing, scopes accept "Scope 1" / "Scope1" / "1", and reported units are
//! normalised to either MWh or metric tonnes CO2e.

use crate::error::{EstimationError, Result};
use crate::records::{normalize_unit, PredictorRecord, ReportedRecord, Scope, TOTAL_ACTIVITY};
use csv::ReaderBuilder;
use serde::Deserialize;
use std::io::Read;
use std::path::Path;
use tracing::{debug, info};

#[derive(Debug, Deserialize)]
struct RawReportedRow {
    #[serde(rename = "Year")]
    year: String,
    #[serde(rename = "Scope")]
    scope: String,
    #[serde(rename = "Parameter")]
    parameter: String,
    #[serde(rename = "Activity", default)]
    activity: Option<String>,
    #[serde(rename = "Unit", alias = "Units", default)]
    unit: Option<String>,
    #[serde(rename = "Value", default)]
    value: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawPredictorRow {
    #[serde(rename = "Year")]
    year: String,
    #[serde(rename = "Parameter")]
    parameter: String,
    #[serde(rename = "Value", default)]
    value: Option<String>,
    #[serde(rename = "Unit", alias = "Units", default)]
    unit: Option<String>,
}

/// Blank, non-numeric and non-finite cells are missing.
pub fn coerce_value(raw: &str) -> Option<f64> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    trimmed.parse::<f64>().ok().filter(|v| v.is_finite())
}

fn parse_year(raw: &str, row: usize) -> Result<i32> {
    let trimmed = raw.trim();
    trimmed
        .parse::<i32>()
        .ok()
        .or_else(|| {
            trimmed
                .parse::<f64>()
                .ok()
                .filter(|y| y.fract() == 0.0 && *y >= i32::MIN as f64 && *y <= i32::MAX as f64)
                .map(|y| y as i32)
        })
        .ok_or_else(|| EstimationError::Parse(format!("row {}: invalid year {:?}", row, raw)))
}

fn reader<R: Read>(input: R) -> csv::Reader<R> {
    ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(input)
}

pub fn read_reported<R: Read>(input: R) -> Result<Vec<ReportedRecord>> {
    let mut rdr = reader(input);
    let mut records = Vec::new();
    for (i, row) in rdr.deserialize::<RawReportedRow>().enumerate() {
        let row = row?;
        let line = i + 2;
        let scope: Scope = row
            .scope
            .parse()
            .map_err(|e| EstimationError::Parse(format!("row {}: {}", line, e)))?;
        let activity = row
            .activity
            .filter(|a| !a.trim().is_empty())
            .unwrap_or_else(|| TOTAL_ACTIVITY.to_string());
        let unit = normalize_unit(row.unit.as_deref().unwrap_or(""));
        let value = row.value.as_deref().and_then(coerce_value);

        records.push(
            ReportedRecord::new(parse_year(&row.year, line)?, scope, row.parameter, unit, value)
                .with_activity(activity),
        );
    }
    debug!("Read {} reported records", records.len());
    Ok(records)
}

pub fn read_predictors<R: Read>(input: R) -> Result<Vec<PredictorRecord>> {
    let mut rdr = reader(input);
    let mut records = Vec::new();
    for (i, row) in rdr.deserialize::<RawPredictorRow>().enumerate() {
        let row = row?;
        let value = row.value.as_deref().and_then(coerce_value);
        let mut record = PredictorRecord::new(parse_year(&row.year, i + 2)?, row.parameter, value);
        record.unit = row.unit.filter(|u| !u.is_empty());
        records.push(record);
    }
    debug!("Read {} predictor records", records.len());
    Ok(records)
}

pub fn load_reported(path: impl AsRef<Path>) -> Result<Vec<ReportedRecord>> {
    let path = path.as_ref();
    let file = std::fs::File::open(path)?;
    let records = read_reported(file)
        .map_err(|e| EstimationError::Parse(format!("{}: {}", path.display(), e)))?;
    info!("Loaded {} reported records from {}", records.len(), path.display());
    Ok(records)
}

pub fn load_predictors(path: impl AsRef<Path>) -> Result<Vec<PredictorRecord>> {
    let path = path.as_ref();
    let file = std::fs::File::open(path)?;
    let records = read_predictors(file)
        .map_err(|e| EstimationError::Parse(format!("{}: {}", path.display(), e)))?;
    info!("Loaded {} predictor records from {}", records.len(), path.display());
    Ok(records)
}
