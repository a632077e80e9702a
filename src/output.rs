//! Result writers.
//!
//! The estimate and explainability tables are converted to polars frames and
//! written as CSV or Parquet next to a JSON copy of the whole report.

use crate::assemble::EstimateRow;
use crate::engine::EstimationReport;
use crate::error::Result;
use crate::explain::ExplanationTable;
use crate::records::{PredictorRecord, ReportedRecord};
use polars::prelude::*;
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

pub const ESTIMATES_STEM: &str = "estimates";
pub const EXPLANATIONS_STEM: &str = "explanations";
pub const REPORT_FILE: &str = "report.json";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum OutputFormat {
    #[default]
    Csv,
    Parquet,
}

impl OutputFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            OutputFormat::Csv => "csv",
            OutputFormat::Parquet => "parquet",
        }
    }
}

pub fn estimates_frame(rows: &[EstimateRow]) -> Result<DataFrame> {
    let years: Vec<i32> = rows.iter().map(|r| r.year).collect();
    let scopes: Vec<&str> = rows.iter().map(|r| r.scope.label()).collect();
    let parameters: Vec<&str> = rows.iter().map(|r| r.parameter.as_str()).collect();
    let activities: Vec<&str> = rows.iter().map(|r| r.activity.as_str()).collect();
    let units: Vec<&str> = rows.iter().map(|r| r.unit.as_str()).collect();
    let reported: Vec<Option<f64>> = rows.iter().map(|r| r.reported).collect();
    let estimated: Vec<Option<f64>> = rows.iter().map(|r| r.estimated).collect();
    let confidence: Vec<&str> = rows.iter().map(|r| r.confidence.label()).collect();

    Ok(DataFrame::new(vec![
        Series::new("Year", years),
        Series::new("Scope", scopes),
        Series::new("Parameter", parameters),
        Series::new("Activity", activities),
        Series::new("Unit", units),
        Series::new("Company Reported", reported),
        Series::new("Ongil Estimated", estimated),
        Series::new("Confidence", confidence),
    ])?)
}

/// Scope, Parameter, Activity, one boolean column per predictor, Explanation.
pub fn explanations_frame(table: &ExplanationTable) -> Result<DataFrame> {
    let mut columns = vec![
        Series::new("Scope", table.rows.iter().map(|r| r.scope.label()).collect::<Vec<_>>()),
        Series::new(
            "Parameter",
            table.rows.iter().map(|r| r.parameter.as_str()).collect::<Vec<_>>(),
        ),
        Series::new(
            "Activity",
            table.rows.iter().map(|r| r.activity.as_str()).collect::<Vec<_>>(),
        ),
    ];
    for (i, predictor) in table.predictors.iter().enumerate() {
        let flags: Vec<bool> = table
            .rows
            .iter()
            .map(|r| r.flags.get(i).copied().unwrap_or(false))
            .collect();
        columns.push(Series::new(predictor, flags));
    }
    columns.push(Series::new(
        "Explanation",
        table.rows.iter().map(|r| r.explanation.as_str()).collect::<Vec<_>>(),
    ));
    Ok(DataFrame::new(columns)?)
}

/// Serialise `df` in `format` into memory.
pub fn encode_frame(df: &mut DataFrame, format: OutputFormat) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    match format {
        OutputFormat::Csv => {
            CsvWriter::new(&mut buf).include_header(true).finish(df)?;
        }
        OutputFormat::Parquet => {
            ParquetWriter::new(&mut buf).finish(df)?;
        }
    }
    Ok(buf)
}

pub fn write_frame(df: &mut DataFrame, path: &Path, format: OutputFormat) -> Result<()> {
    let mut file = File::create(path)?;
    file.write_all(&encode_frame(df, format)?)?;
    Ok(())
}

/// Write the estimate table, the explainability table and `report.json`
/// into `dir`, returning the written paths.
///
/// Everything is encoded before the first file is created, and files already
/// written are removed again if a later write fails.
pub fn write_report(report: &EstimationReport, dir: &Path, format: OutputFormat) -> Result<Vec<PathBuf>> {
    let staged = vec![
        (
            dir.join(format!("{}.{}", ESTIMATES_STEM, format.extension())),
            encode_frame(&mut estimates_frame(&report.estimates)?, format)?,
        ),
        (
            dir.join(format!("{}.{}", EXPLANATIONS_STEM, format.extension())),
            encode_frame(&mut explanations_frame(&report.explanations)?, format)?,
        ),
        (dir.join(REPORT_FILE), serde_json::to_vec_pretty(report)?),
    ];

    std::fs::create_dir_all(dir)?;
    let mut written: Vec<PathBuf> = Vec::with_capacity(staged.len());
    for (path, bytes) in staged {
        if let Err(e) = std::fs::write(&path, bytes) {
            for done in &written {
                if let Err(cleanup) = std::fs::remove_file(done) {
                    warn!("Could not remove partial output {}: {}", done.display(), cleanup);
                }
            }
            return Err(e.into());
        }
        written.push(path);
    }

    info!(
        "Wrote {} estimate rows and {} explanations to {}",
        report.estimates.len(),
        report.explanations.len(),
        dir.display()
    );
    Ok(written)
}

/// Write extracted records in the layout `ingest::read_reported` accepts.
pub fn write_reported(records: &[ReportedRecord], path: &Path) -> Result<()> {
    let mut writer = csv::Writer::from_path(path)?;
    writer.write_record(["Year", "Scope", "Parameter", "Activity", "Unit", "Value"])?;
    for r in records {
        writer.write_record([
            r.year.to_string(),
            r.scope.label().to_string(),
            r.parameter.clone(),
            r.activity.clone(),
            r.unit.clone(),
            r.value.map(|v| v.to_string()).unwrap_or_default(),
        ])?;
    }
    writer.flush()?;
    Ok(())
}

/// Write predictor records in the layout `ingest::read_predictors` accepts.
pub fn write_predictors(records: &[PredictorRecord], path: &Path) -> Result<()> {
    let mut writer = csv::Writer::from_path(path)?;
    writer.write_record(["Year", "Parameter", "Value", "Unit"])?;
    for r in records {
        writer.write_record([
            r.year.to_string(),
            r.name.clone(),
            r.value.map(|v| v.to_string()).unwrap_or_default(),
            r.unit.clone().unwrap_or_default(),
        ])?;
    }
    writer.flush()?;
    Ok(())
}
