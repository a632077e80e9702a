//! Result Assembler
//!
//! Joins reported values, final estimates and confidence into one row per
//! (year, column) and sorts the table by year, scope, unit, parameter and
//! activity.

use crate::confidence::{Confidence, ConfidenceClassifier};
use crate::estimator::{round_estimate, EstimateSource, EstimateTable};
use crate::parameter_table::WideMatrix;
use crate::records::Scope;
use itertools::Itertools;
use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::borrow::Cow;

lazy_static! {
    static ref SINGLE_DIGIT_CATEGORY: Regex = Regex::new(r"Category (\d)-").expect("valid category pattern");
}

/// One line of the final estimate table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EstimateRow {
    #[serde(rename = "Year")]
    pub year: i32,
    #[serde(rename = "Scope")]
    pub scope: Scope,
    #[serde(rename = "Parameter")]
    pub parameter: String,
    #[serde(rename = "Activity")]
    pub activity: String,
    #[serde(rename = "Unit")]
    pub unit: String,
    #[serde(rename = "Company Reported")]
    pub reported: Option<f64>,
    #[serde(rename = "Ongil Estimated")]
    pub estimated: Option<f64>,
    #[serde(rename = "Confidence")]
    pub confidence: Confidence,
}

/// Scope-3 categories 1-9 are displayed with two spaces after "Category".
pub fn display_parameter(parameter: &str) -> Cow<'_, str> {
    SINGLE_DIGIT_CATEGORY.replace_all(parameter, "Category  ${1}-")
}

pub struct ResultAssembler {
    classifier: ConfidenceClassifier,
}

impl ResultAssembler {
    pub fn new(classifier: ConfidenceClassifier) -> Self {
        Self { classifier }
    }

    /// Build the sorted estimate table. Cells with neither a reported value
    /// nor an estimate produce no row.
    ///
    /// Only model and reconciled cells that have a reported counterpart are
    /// graded; everything else is "Not Applicable". A cell that was never
    /// estimated always shows the rounded reported value as its estimate.
    /// Grading compares against the unrounded reported value.
    pub fn assemble(&self, wide: &WideMatrix, table: &EstimateTable) -> Vec<EstimateRow> {
        let mut rows = Vec::new();
        for key in wide.column_keys() {
            let parameter = display_parameter(&key.parameter).into_owned();
            for year in wide.years() {
                let raw_reported = wide.get(year, key);
                let reported = raw_reported.map(round_estimate);
                let cell = table.get(year, key);

                let (estimated, confidence) = match cell {
                    Some(cell) if cell.source != EstimateSource::Reported => {
                        let confidence = match raw_reported {
                            Some(_) => self.classifier.classify(Some(cell.value), raw_reported),
                            None => Confidence::NotApplicable,
                        };
                        (Some(cell.value), confidence)
                    }
                    _ => (reported, Confidence::NotApplicable),
                };

                if reported.is_none() && estimated.is_none() {
                    continue;
                }
                rows.push(EstimateRow {
                    year,
                    scope: key.scope,
                    parameter: parameter.clone(),
                    activity: key.activity.clone(),
                    unit: key.unit.clone(),
                    reported,
                    estimated,
                    confidence,
                });
            }
        }

        rows.into_iter()
            .sorted_by(|a, b| {
                (a.year, a.scope, &a.unit, &a.parameter, &a.activity)
                    .cmp(&(b.year, b.scope, &b.unit, &b.parameter, &b.activity))
            })
            .collect()
    }
}

impl Default for ResultAssembler {
    fn default() -> Self {
        Self::new(ConfidenceClassifier::default())
    }
}
