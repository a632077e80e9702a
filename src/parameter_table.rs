//! Parameter Table Builder
//!
//! Pivots long-format reported rows into a year-indexed wide matrix with one
//! column per (scope, parameter, activity, unit). Storage is column-major:
//! each column keeps its own year → value map, and the matrix keeps the full
//! year index separately so that columns without a value for a year still
//! have a row for it.

use crate::error::{EstimationError, Result};
use crate::records::{ColumnKey, ReportedRecord, Scope, MWH, TOTAL_ACTIVITY};
use std::collections::{BTreeMap, BTreeSet, HashSet};
use tracing::debug;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct WideMatrix {
    years: BTreeSet<i32>,
    columns: BTreeMap<ColumnKey, BTreeMap<i32, f64>>,
}

impl WideMatrix {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build the matrix from reported records.
    ///
    /// A second row for an already seen (year, column) pair is rejected with
    /// `InputAmbiguity`, even when both values are missing.
    pub fn from_records(records: &[ReportedRecord]) -> Result<Self> {
        let mut matrix = Self::new();
        let mut seen: HashSet<(i32, ColumnKey)> = HashSet::with_capacity(records.len());

        for record in records {
            let key = record.column_key();
            if !seen.insert((record.year, key.clone())) {
                return Err(EstimationError::InputAmbiguity(format!(
                    "duplicate reported value for {} in {}",
                    key, record.year
                )));
            }
            matrix.years.insert(record.year);
            let column = matrix.columns.entry(key).or_default();
            if let Some(value) = record.value.filter(|v| v.is_finite()) {
                column.insert(record.year, value);
            }
        }

        debug!(
            "Built wide matrix: {} years x {} columns",
            matrix.years.len(),
            matrix.columns.len()
        );
        Ok(matrix)
    }

    pub fn years(&self) -> impl Iterator<Item = i32> + '_ {
        self.years.iter().copied()
    }

    pub fn year_count(&self) -> usize {
        self.years.len()
    }

    pub fn year_range(&self) -> Option<(i32, i32)> {
        Some((*self.years.first()?, *self.years.last()?))
    }

    pub fn contains_year(&self, year: i32) -> bool {
        self.years.contains(&year)
    }

    /// Add empty rows for `years`.
    pub fn extend_years(&mut self, years: impl IntoIterator<Item = i32>) {
        self.years.extend(years);
    }

    pub fn column_keys(&self) -> impl Iterator<Item = &ColumnKey> {
        self.columns.keys()
    }

    pub fn column(&self, key: &ColumnKey) -> Option<&BTreeMap<i32, f64>> {
        self.columns.get(key)
    }

    pub fn contains_column(&self, key: &ColumnKey) -> bool {
        self.columns.contains_key(key)
    }

    pub fn get(&self, year: i32, key: &ColumnKey) -> Option<f64> {
        self.columns.get(key)?.get(&year).copied()
    }

    pub fn set(&mut self, year: i32, key: &ColumnKey, value: Option<f64>) {
        self.years.insert(year);
        let column = self.columns.entry(key.clone()).or_default();
        match value {
            Some(v) => {
                column.insert(year, v);
            }
            None => {
                column.remove(&year);
            }
        }
    }

    /// Register a column with no values.
    pub fn ensure_column(&mut self, key: &ColumnKey) {
        self.columns.entry(key.clone()).or_default();
    }

    /// The "Total" column for `(scope, parameter)`, preferring the MWh unit
    /// when the parameter is reported in more than one unit.
    pub fn find_total(&self, scope: Scope, parameter: &str) -> Option<&ColumnKey> {
        let mut candidates = self
            .columns
            .keys()
            .filter(|k| k.scope == scope && k.parameter == parameter && k.activity == TOTAL_ACTIVITY);
        let first = candidates.next()?;
        if first.unit == MWH {
            return Some(first);
        }
        candidates.find(|k| k.unit == MWH).or(Some(first))
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }
}
