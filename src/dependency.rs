//! Dependency matrix: which predictors may be used to estimate which
//! reported series.
//!
//! The configuration sheet is a boolean grid keyed by (scope, parameter),
//! optionally narrowed to one activity by an `Activity` column. A row
//! without an activity applies to every activity of that parameter seen in
//! the reported data; a row naming an activity overrides it for that series.

use crate::config::DerivedPredictor;
use crate::error::{EstimationError, Result};
use crate::parameter_table::WideMatrix;
use crate::records::{Scope, SeriesKey};
use std::collections::{BTreeMap, HashMap};
use std::io::Read;
use tracing::debug;

#[derive(Debug, Clone, PartialEq)]
pub struct DependencyRow {
    pub scope: Scope,
    pub parameter: String,
    /// `None` applies the row to every activity of the parameter.
    pub activity: Option<String>,
    pub flags: Vec<bool>,
}

type RowKey = (Scope, String, Option<String>);

/// Parsed `dependency_matrix` sheet.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DependencyConfig {
    predictors: Vec<String>,
    rows: Vec<DependencyRow>,
    index: HashMap<RowKey, usize>,
}

impl DependencyConfig {
    pub fn new(predictors: Vec<String>) -> Self {
        Self {
            predictors,
            ..Self::default()
        }
    }

    /// Add a row; `enabled` lists predictor names switched on for it.
    pub fn with_row(self, scope: Scope, parameter: &str, enabled: &[&str]) -> Result<Self> {
        self.add_row(scope, parameter, None, enabled)
    }

    /// Add a row that only applies to one activity of `parameter`.
    pub fn with_activity_row(
        self,
        scope: Scope,
        parameter: &str,
        activity: &str,
        enabled: &[&str],
    ) -> Result<Self> {
        self.add_row(scope, parameter, Some(activity), enabled)
    }

    fn add_row(
        mut self,
        scope: Scope,
        parameter: &str,
        activity: Option<&str>,
        enabled: &[&str],
    ) -> Result<Self> {
        let flags = self
            .predictors
            .iter()
            .map(|p| enabled.contains(&p.as_str()))
            .collect();
        self.push_row(DependencyRow {
            scope,
            parameter: parameter.to_string(),
            activity: activity.map(str::to_string),
            flags,
        })?;
        Ok(self)
    }

    fn push_row(&mut self, row: DependencyRow) -> Result<()> {
        let key = (row.scope, row.parameter.clone(), row.activity.clone());
        if self.index.contains_key(&key) {
            return Err(EstimationError::Config(format!(
                "duplicate dependency row for {} / {} / {}",
                row.scope,
                row.parameter,
                row.activity.as_deref().unwrap_or("*")
            )));
        }
        self.index.insert(key, self.rows.len());
        self.rows.push(row);
        Ok(())
    }

    /// Read the sheet: `Scope`, `Parameter`, an optional `Activity`, then one
    /// flag column per predictor. A blank activity cell means every activity.
    pub fn from_reader<R: Read>(reader: R) -> Result<Self> {
        let mut rdr = csv::ReaderBuilder::new()
            .has_headers(true)
            .trim(csv::Trim::All)
            .from_reader(reader);

        let headers: Vec<String> = rdr.headers()?.iter().map(|h| h.to_string()).collect();
        let scope_idx = Self::header_index(&headers, "Scope")?;
        let parameter_idx = Self::header_index(&headers, "Parameter")?;
        let activity_idx = headers.iter().position(|h| h.eq_ignore_ascii_case("Activity"));
        let predictor_columns: Vec<(usize, String)> = headers
            .iter()
            .enumerate()
            .filter(|(i, h)| {
                *i != scope_idx && *i != parameter_idx && Some(*i) != activity_idx && !h.is_empty()
            })
            .map(|(i, h)| (i, h.clone()))
            .collect();

        let mut config = Self::new(predictor_columns.iter().map(|(_, h)| h.clone()).collect());
        for record in rdr.records() {
            let record = record?;
            let scope: Scope = record.get(scope_idx).unwrap_or("").parse()?;
            let parameter = record.get(parameter_idx).unwrap_or("").to_string();
            let activity = activity_idx
                .and_then(|i| record.get(i))
                .filter(|a| !a.is_empty())
                .map(str::to_string);
            let flags = predictor_columns
                .iter()
                .map(|(i, name)| {
                    parse_flag(record.get(*i).unwrap_or("")).map_err(|e| {
                        EstimationError::Config(format!("{} / {}: {}", parameter, name, e))
                    })
                })
                .collect::<Result<Vec<_>>>()?;
            config.push_row(DependencyRow {
                scope,
                parameter,
                activity,
                flags,
            })?;
        }
        Ok(config)
    }

    fn header_index(headers: &[String], name: &str) -> Result<usize> {
        headers
            .iter()
            .position(|h| h.eq_ignore_ascii_case(name))
            .ok_or_else(|| EstimationError::Config(format!("dependency sheet lacks a '{}' column", name)))
    }

    pub fn predictors(&self) -> &[String] {
        &self.predictors
    }

    /// The row applying to every activity of `parameter`.
    pub fn row(&self, scope: Scope, parameter: &str) -> Option<&DependencyRow> {
        self.lookup(scope, parameter, None)
    }

    /// The row governing `series`: an activity-specific row if configured,
    /// otherwise the parameter-wide one.
    pub fn row_for(&self, series: &SeriesKey) -> Option<&DependencyRow> {
        self.lookup(series.scope, &series.parameter, Some(&series.activity))
            .or_else(|| self.row(series.scope, &series.parameter))
    }

    fn lookup(&self, scope: Scope, parameter: &str, activity: Option<&str>) -> Option<&DependencyRow> {
        self.index
            .get(&(scope, parameter.to_string(), activity.map(str::to_string)))
            .map(|&i| &self.rows[i])
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// Accepts 1/0, true/false, yes/no, x and blank (false).
pub fn parse_flag(raw: &str) -> Result<bool> {
    match raw.trim().to_lowercase().as_str() {
        "1" | "1.0" | "true" | "yes" | "y" | "x" => Ok(true),
        "" | "0" | "0.0" | "false" | "no" | "n" => Ok(false),
        other => Err(EstimationError::Config(format!("not a boolean flag: {:?}", other))),
    }
}

/// Ordered predictor membership per reported series.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DependencyMatrix {
    predictors: Vec<String>,
    entries: BTreeMap<SeriesKey, Vec<bool>>,
}

impl DependencyMatrix {
    /// Expand the grid to every (scope, parameter, activity) present in
    /// `wide`. Series without a configured row get no entry.
    pub fn expand(config: &DependencyConfig, wide: &WideMatrix) -> Self {
        let mut entries = BTreeMap::new();
        for key in wide.column_keys() {
            let series = key.series();
            if entries.contains_key(&series) {
                continue;
            }
            match config.row_for(&series) {
                Some(row) => {
                    entries.insert(series, row.flags.clone());
                }
                None => debug!("No dependency entry for {}", series),
            }
        }
        Self {
            predictors: config.predictors().to_vec(),
            entries,
        }
    }

    pub fn predictors(&self) -> &[String] {
        &self.predictors
    }

    pub fn entries(&self) -> impl Iterator<Item = (&SeriesKey, &[bool])> {
        self.entries.iter().map(|(k, v)| (k, v.as_slice()))
    }

    pub fn contains(&self, key: &SeriesKey) -> bool {
        self.entries.contains_key(key)
    }

    /// Configured predictors for `key`, in column order.
    pub fn enabled(&self, key: &SeriesKey) -> Option<Vec<String>> {
        let flags = self.entries.get(key)?;
        Some(
            self.predictors
                .iter()
                .zip(flags)
                .filter(|(_, &on)| on)
                .map(|(name, _)| name.clone())
                .collect(),
        )
    }

    /// Candidate predictors for estimation: the configured ones, plus the
    /// derived predictor for parameters carrying its marker. `None` means the
    /// series has no dependency entry and is not estimated.
    pub fn candidates(&self, key: &SeriesKey, derived: &DerivedPredictor) -> Option<Vec<String>> {
        let mut candidates = self.enabled(key)?;
        let marker = derived.marker.to_lowercase();
        if !marker.is_empty()
            && key.parameter.to_lowercase().contains(&marker)
            && !candidates.contains(&derived.name)
        {
            candidates.push(derived.name.clone());
        }
        Some(candidates)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
