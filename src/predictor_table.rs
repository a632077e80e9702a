//! Predictor Table Builder
//!
//! Reshapes annual-report metrics into a year-indexed table aligned with the
//! reported-parameter matrix and derives the net energy predictor.

use crate::config::DerivedPredictor;
use crate::error::{EstimationError, Result};
use crate::parameter_table::WideMatrix;
use crate::records::PredictorRecord;
use std::collections::{BTreeMap, HashSet};
use tracing::{debug, warn};

#[derive(Debug, Clone, Default, PartialEq)]
pub struct PredictorMatrix {
    years: Vec<i32>,
    names: Vec<String>,
    series: BTreeMap<String, BTreeMap<i32, f64>>,
}

impl PredictorMatrix {
    /// Build the predictor table for the year range covered by `wide`.
    ///
    /// Predictor years inside that range but missing from `wide` are added to
    /// it as empty rows so their estimates can be filled in later. Years
    /// outside the range are dropped.
    pub fn build(
        records: &[PredictorRecord],
        wide: &mut WideMatrix,
        derived: &DerivedPredictor,
    ) -> Result<Self> {
        let Some((first, last)) = wide.year_range() else {
            return Ok(Self::default());
        };

        let mut matrix = Self::default();
        let mut seen: HashSet<(i32, &str)> = HashSet::with_capacity(records.len());
        let mut dropped = 0usize;

        for record in records {
            if !seen.insert((record.year, record.name.as_str())) {
                return Err(EstimationError::InputAmbiguity(format!(
                    "duplicate predictor value for {} in {}",
                    record.name, record.year
                )));
            }
            if record.year < first || record.year > last {
                dropped += 1;
                continue;
            }
            let series = matrix.register(&record.name);
            if let Some(value) = record.value.filter(|v| v.is_finite()) {
                series.insert(record.year, value);
            }
            wide.extend_years([record.year]);
        }
        if dropped > 0 {
            debug!(
                "Dropped {} predictor values outside {}..={}",
                dropped, first, last
            );
        }

        if matrix.series.contains_key(&derived.name) {
            warn!(
                "Predictor '{}' is supplied as input and will be replaced by the derived series",
                derived.name
            );
        }
        let energy_use = Self::derive_difference(wide, derived);
        *matrix.register(&derived.name) = energy_use;

        matrix.years = wide.years().collect();
        Ok(matrix)
    }

    /// `minuend - subtrahend` per year; missing whenever either side is.
    fn derive_difference(wide: &WideMatrix, derived: &DerivedPredictor) -> BTreeMap<i32, f64> {
        let minuend = wide.find_total(derived.scope, &derived.minuend);
        let subtrahend = wide.find_total(derived.scope, &derived.subtrahend);
        let (Some(minuend), Some(subtrahend)) = (minuend, subtrahend) else {
            debug!(
                "Derived predictor '{}' unavailable: '{}' or '{}' not reported",
                derived.name, derived.minuend, derived.subtrahend
            );
            return BTreeMap::new();
        };

        wide.years()
            .filter_map(|year| {
                let a = wide.get(year, minuend)?;
                let b = wide.get(year, subtrahend)?;
                Some((year, a - b))
            })
            .collect()
    }

    fn register(&mut self, name: &str) -> &mut BTreeMap<i32, f64> {
        if !self.series.contains_key(name) {
            self.names.push(name.to_string());
        }
        self.series.entry(name.to_string()).or_default()
    }

    /// Year index shared with the wide matrix, oldest first.
    pub fn years(&self) -> &[i32] {
        &self.years
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn series(&self, name: &str) -> Option<&BTreeMap<i32, f64>> {
        self.series.get(name)
    }

    pub fn get(&self, year: i32, name: &str) -> Option<f64> {
        self.series.get(name)?.get(&year).copied()
    }
}
