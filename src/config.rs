//! Configuration workbook and engine settings.
//!
//! The workbook is a directory holding one CSV file per logical sheet plus an
//! optional `settings.json`:
//!
//! - `climate_reports.csv`: parameter catalog (Scope, Parameter, Description)
//! - `annual_reports.csv`: predictor catalog (Parameter, Description, Unit)
//! - `dependency_matrix.csv`: Scope, Parameter, an optional Activity, then one flag column per predictor
//! - `settings.json`: overrides for `EngineSettings`

use crate::dependency::DependencyConfig;
use crate::error::{EstimationError, Result};
use crate::records::Scope;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::info;

pub const PARAMETER_SHEET: &str = "climate_reports.csv";
pub const PREDICTOR_SHEET: &str = "annual_reports.csv";
pub const DEPENDENCY_SHEET: &str = "dependency_matrix.csv";
pub const SETTINGS_FILE: &str = "settings.json";

/// Synthetic predictor computed from two reported Scope 2 totals.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DerivedPredictor {
    pub name: String,
    pub scope: Scope,
    pub minuend: String,
    pub subtrahend: String,
    /// Parameters whose lowercase name contains this marker get the derived
    /// predictor appended to their candidate list.
    pub marker: String,
}

impl Default for DerivedPredictor {
    fn default() -> Self {
        Self {
            name: "energy_use".to_string(),
            scope: Scope::Scope2,
            minuend: "Energy Use Total".to_string(),
            subtrahend: "Total Renewable Energy".to_string(),
            marker: "based".to_string(),
        }
    }
}

/// A parent parameter rebuilt from the sum of its child parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParentGroup {
    pub scope: Scope,
    pub parameter: String,
    pub children: Vec<String>,
}

impl ParentGroup {
    fn new(scope: Scope, parameter: &str, children: &[&str]) -> Self {
        Self {
            scope,
            parameter: parameter.to_string(),
            children: children.iter().map(|c| c.to_string()).collect(),
        }
    }
}

/// Upper bounds (exclusive) of the High and Medium buckets.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConfidenceThresholds {
    pub high_below: f64,
    pub medium_below: f64,
    /// Added to |reported| in the relative-error denominator.
    pub damping: f64,
}

impl Default for ConfidenceThresholds {
    fn default() -> Self {
        Self {
            high_below: 0.2,
            medium_below: 0.4,
            damping: 1000.0,
        }
    }
}

/// Scoring function used to pick the winning predictor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SelectionMetric {
    #[default]
    RSquared,
    WeightedRSquared,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineSettings {
    /// Sample weight of year index j is `weight_base^j`, oldest year first.
    pub weight_base: f64,
    /// Minimum overlapping (target, predictor) years for a candidate fit.
    pub min_overlap: usize,
    /// Reported zeros are data gaps, not true zeros. Kept on for
    /// compatibility with existing outputs; genuine zero years are lost.
    pub zero_as_missing: bool,
    pub confidence: ConfidenceThresholds,
    pub selection: SelectionMetric,
    pub derived_predictor: DerivedPredictor,
    pub parent_map: Vec<ParentGroup>,
    pub company: String,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            weight_base: 1.2,
            min_overlap: 3,
            zero_as_missing: true,
            confidence: ConfidenceThresholds::default(),
            selection: SelectionMetric::default(),
            derived_predictor: DerivedPredictor::default(),
            parent_map: default_parent_map(),
            company: "The Company".to_string(),
        }
    }
}

/// Scope-3 categories appear with either one or two spaces after
/// "Category"; both spellings are accepted.
const SCOPE3_CATEGORIES: &[&str] = &[
    "Category  1- Purchased goods and services",
    "Category  2-Capital goods",
    "Category  3- Fuel-and-energy-related activities (not included in Scope 1 or 2)",
    "Category  4- Upstream transportation and distribution",
    "Category  5- Waste generated in operations",
    "Category  6- Business travel",
    "Category  7- Employee commuting",
    "Category  8- Upstream leased assets",
    "Category  9- Downstream transportation and distribution",
    "Category 1- Purchased goods and services",
    "Category 2-Capital goods",
    "Category 3- Fuel-and-energy-related activities (not included in Scope 1 or 2)",
    "Category 4- Upstream transportation and distribution",
    "Category 5- Waste generated in operations",
    "Category 6- Business travel",
    "Category 7- Employee commuting",
    "Category 8- Upstream leased assets",
    "Category 9- Downstream transportation and distribution",
    "Category 10- Processing of sold products",
    "Category 11- Use of sold products",
    "Category 12- End of life treatment of sold products",
    "Category 13- Downstream leased assets",
    "Category 14- Franchises",
    "Category 15- Investments [row hidden for FS sector companies, data point requested in C-FS14.1a]",
    "Other downstream emissions",
    "Other upstream emissions",
];

pub const SCOPE3_TOTAL: &str = "Total scope 3 emission";

pub fn scope3_categories() -> &'static [&'static str] {
    SCOPE3_CATEGORIES
}

pub fn default_parent_map() -> Vec<ParentGroup> {
    vec![
        ParentGroup::new(
            Scope::Scope1,
            "Total scope 1 emission",
            &[
                "Fugitive emissions",
                "Mobile combustion",
                "Process emissions",
                "Stationary combustion",
            ],
        ),
        ParentGroup::new(
            Scope::Scope2,
            "Energy Use Total",
            &[
                "Energy Produced Direct",
                "Energy Purchased Direct",
                "Indirect Energy Use",
            ],
        ),
        ParentGroup::new(
            Scope::Scope2,
            "Total Renewable Energy",
            &["Renewable Energy Produced", "Renewable Energy Purchased"],
        ),
        ParentGroup::new(Scope::Scope3, SCOPE3_TOTAL, SCOPE3_CATEGORIES),
    ]
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterDescription {
    #[serde(rename = "Scope")]
    pub scope: String,
    #[serde(rename = "Parameter")]
    pub parameter: String,
    #[serde(rename = "Description", default)]
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictorDescription {
    #[serde(rename = "Parameter")]
    pub parameter: String,
    #[serde(rename = "Description", default)]
    pub description: String,
    #[serde(rename = "Unit", alias = "Units", default)]
    pub unit: Option<String>,
}

/// Fully resolved configuration handed to the engine.
#[derive(Debug, Clone)]
pub struct ConfigWorkbook {
    pub parameters: Vec<ParameterDescription>,
    pub predictors: Vec<PredictorDescription>,
    pub dependencies: DependencyConfig,
    pub settings: EngineSettings,
}

impl ConfigWorkbook {
    pub fn load(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref();

        let parameters: Vec<ParameterDescription> = Self::load_sheet(dir.join(PARAMETER_SHEET))?;
        let predictors: Vec<PredictorDescription> = Self::load_sheet(dir.join(PREDICTOR_SHEET))?;

        let dependency_path = dir.join(DEPENDENCY_SHEET);
        let file = Self::open_sheet(&dependency_path)?;
        let dependencies = DependencyConfig::from_reader(file).map_err(|e| {
            EstimationError::Config(format!("{}: {}", dependency_path.display(), e))
        })?;

        let settings_path = dir.join(SETTINGS_FILE);
        let settings = if settings_path.exists() {
            let content = std::fs::read_to_string(&settings_path)?;
            serde_json::from_str(&content).map_err(|e| {
                EstimationError::Config(format!("Failed to parse {}: {}", settings_path.display(), e))
            })?
        } else {
            EngineSettings::default()
        };

        info!(
            "Loaded configuration: {} parameters, {} predictors, {} dependency rows",
            parameters.len(),
            predictors.len(),
            dependencies.len()
        );

        Ok(Self {
            parameters,
            predictors,
            dependencies,
            settings,
        })
    }

    fn open_sheet(path: &PathBuf) -> Result<std::fs::File> {
        if !path.exists() {
            return Err(EstimationError::MissingSheet(path.display().to_string()));
        }
        Ok(std::fs::File::open(path)?)
    }

    fn load_sheet<T: for<'de> Deserialize<'de>>(path: PathBuf) -> Result<Vec<T>> {
        let file = Self::open_sheet(&path)?;
        let mut reader = csv::ReaderBuilder::new().trim(csv::Trim::All).from_reader(file);
        reader
            .deserialize()
            .collect::<std::result::Result<Vec<T>, _>>()
            .map_err(|e| EstimationError::Config(format!("Failed to parse {}: {}", path.display(), e)))
    }

    /// Parameter name → description.
    pub fn parameter_descriptions(&self) -> HashMap<String, String> {
        self.parameters
            .iter()
            .map(|p| (p.parameter.clone(), p.description.clone()))
            .collect()
    }

    /// Predictor name → description.
    pub fn predictor_descriptions(&self) -> HashMap<String, String> {
        self.predictors
            .iter()
            .map(|p| (p.parameter.clone(), p.description.clone()))
            .collect()
    }

    /// Parameter name → scope, as listed in the parameter catalog.
    pub fn parameter_scopes(&self) -> Result<HashMap<String, Scope>> {
        self.parameters
            .iter()
            .map(|p| -> Result<(String, Scope)> { Ok((p.parameter.clone(), p.scope.parse()?)) })
            .collect()
    }
}
