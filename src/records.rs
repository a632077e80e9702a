//! Record and key types shared by every stage of the estimation pipeline.
//!
//! - `ReportedRecord`: one long-format row from a climate disclosure
//! - `PredictorRecord`: one yearly auxiliary metric from an annual report
//! - `ColumnKey` / `SeriesKey`: identities of wide-matrix columns

use crate::error::{EstimationError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Roll-up activity name.
pub const TOTAL_ACTIVITY: &str = "Total";

/// Energy unit; every other unit is normalised to `TONNES_CO2E`.
pub const MWH: &str = "MWh";
pub const TONNES_CO2E: &str = "metric tonnes CO2e";

/// GHG Protocol scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Scope {
    #[serde(rename = "Scope 1")]
    Scope1,
    #[serde(rename = "Scope 2")]
    Scope2,
    #[serde(rename = "Scope 3")]
    Scope3,
}

impl Scope {
    pub fn label(&self) -> &'static str {
        match self {
            Scope::Scope1 => "Scope 1",
            Scope::Scope2 => "Scope 2",
            Scope::Scope3 => "Scope 3",
        }
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for Scope {
    type Err = EstimationError;

    fn from_str(s: &str) -> Result<Self> {
        let compact: String = s
            .chars()
            .filter(|c| !c.is_whitespace())
            .collect::<String>()
            .to_lowercase();
        match compact.trim_start_matches("scope") {
            "1" => Ok(Scope::Scope1),
            "2" => Ok(Scope::Scope2),
            "3" => Ok(Scope::Scope3),
            _ => Err(EstimationError::Parse(format!("Unknown scope: {:?}", s))),
        }
    }
}

/// (scope, parameter, activity): the granularity the dependency matrix is
/// configured at.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SeriesKey {
    pub scope: Scope,
    pub parameter: String,
    pub activity: String,
}

impl SeriesKey {
    pub fn new(scope: Scope, parameter: impl Into<String>, activity: impl Into<String>) -> Self {
        Self {
            scope,
            parameter: parameter.into(),
            activity: activity.into(),
        }
    }

    pub fn is_total(&self) -> bool {
        self.activity == TOTAL_ACTIVITY
    }
}

impl fmt::Display for SeriesKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}_{}", self.scope, self.parameter, self.activity)
    }
}

/// One wide-matrix column: (scope, parameter, activity, unit).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ColumnKey {
    pub scope: Scope,
    pub parameter: String,
    pub activity: String,
    pub unit: String,
}

impl ColumnKey {
    pub fn new(
        scope: Scope,
        parameter: impl Into<String>,
        activity: impl Into<String>,
        unit: impl Into<String>,
    ) -> Self {
        Self {
            scope,
            parameter: parameter.into(),
            activity: activity.into(),
            unit: unit.into(),
        }
    }

    pub fn series(&self) -> SeriesKey {
        SeriesKey::new(self.scope, self.parameter.clone(), self.activity.clone())
    }

    pub fn is_total(&self) -> bool {
        self.activity == TOTAL_ACTIVITY
    }

    /// The "Total" column for this column's (scope, parameter, unit).
    pub fn total_key(&self) -> ColumnKey {
        ColumnKey::new(self.scope, self.parameter.clone(), TOTAL_ACTIVITY, self.unit.clone())
    }
}

impl fmt::Display for ColumnKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}/{}/{}",
            self.scope, self.parameter, self.activity, self.unit
        )
    }
}

/// A value reported by a company for one year, as produced by extraction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportedRecord {
    pub year: i32,
    pub scope: Scope,
    pub parameter: String,
    pub activity: String,
    pub unit: String,
    pub value: Option<f64>,
}

impl ReportedRecord {
    pub fn new(
        year: i32,
        scope: Scope,
        parameter: impl Into<String>,
        unit: impl Into<String>,
        value: Option<f64>,
    ) -> Self {
        Self {
            year,
            scope,
            parameter: parameter.into(),
            activity: TOTAL_ACTIVITY.to_string(),
            unit: unit.into(),
            value,
        }
    }

    pub fn with_activity(mut self, activity: impl Into<String>) -> Self {
        self.activity = activity.into();
        self
    }

    pub fn column_key(&self) -> ColumnKey {
        ColumnKey::new(
            self.scope,
            self.parameter.clone(),
            self.activity.clone(),
            self.unit.clone(),
        )
    }
}

/// An auxiliary yearly metric (revenue, production volume, ...).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictorRecord {
    pub year: i32,
    pub name: String,
    pub value: Option<f64>,
    #[serde(default)]
    pub unit: Option<String>,
}

impl PredictorRecord {
    pub fn new(year: i32, name: impl Into<String>, value: Option<f64>) -> Self {
        Self {
            year,
            name: name.into(),
            value,
            unit: None,
        }
    }
}

/// Units other than MWh are reported in CO2e tonnes.
pub fn normalize_unit(unit: &str) -> String {
    if unit.trim() == MWH {
        MWH.to_string()
    } else {
        TONNES_CO2E.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scope_parsing_variants() {
        assert_eq!("Scope 1".parse::<Scope>().unwrap(), Scope::Scope1);
        assert_eq!("scope2".parse::<Scope>().unwrap(), Scope::Scope2);
        assert_eq!(" 3 ".parse::<Scope>().unwrap(), Scope::Scope3);
        assert!("Scope 4".parse::<Scope>().is_err());
    }

    #[test]
    fn test_scope_ordering_follows_label() {
        assert!(Scope::Scope1 < Scope::Scope2);
        assert!(Scope::Scope2 < Scope::Scope3);
        assert_eq!(Scope::Scope2.to_string(), "Scope 2");
    }

    #[test]
    fn test_total_key_keeps_unit() {
        let key = ColumnKey::new(Scope::Scope1, "Mobile combustion", "Bottling", TONNES_CO2E);
        let total = key.total_key();
        assert!(total.is_total());
        assert_eq!(total.unit, TONNES_CO2E);
        assert_eq!(total.parameter, "Mobile combustion");
    }

    #[test]
    fn test_normalize_unit() {
        assert_eq!(normalize_unit("MWh"), MWH);
        assert_eq!(normalize_unit("tCO2e"), TONNES_CO2E);
        assert_eq!(normalize_unit(""), TONNES_CO2E);
    }
}
