//! Explainability Generator
//!
//! Builds one narrative per dependency entry describing how the estimate for
//! that series was obtained. Depends only on the dependency matrix, the two
//! description catalogs and the company name, never on estimation results.

use crate::dependency::DependencyMatrix;
use crate::records::{Scope, TOTAL_ACTIVITY};
use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::warn;

lazy_static! {
    static ref BRACKETED: Regex = Regex::new(r"\[.*\]").expect("valid bracket pattern");
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExplanationRow {
    pub scope: Scope,
    pub parameter: String,
    pub activity: String,
    /// Membership flags in `ExplanationTable::predictors` order.
    pub flags: Vec<bool>,
    pub explanation: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExplanationTable {
    pub predictors: Vec<String>,
    pub rows: Vec<ExplanationRow>,
}

impl ExplanationTable {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

pub struct ExplainabilityGenerator<'a> {
    parameter_descriptions: &'a HashMap<String, String>,
    predictor_descriptions: &'a HashMap<String, String>,
    company: &'a str,
}

impl<'a> ExplainabilityGenerator<'a> {
    pub fn new(
        parameter_descriptions: &'a HashMap<String, String>,
        predictor_descriptions: &'a HashMap<String, String>,
        company: &'a str,
    ) -> Self {
        Self {
            parameter_descriptions,
            predictor_descriptions,
            company,
        }
    }

    pub fn generate(&self, dependencies: &DependencyMatrix) -> ExplanationTable {
        let predictors = dependencies.predictors().to_vec();
        let rows = dependencies
            .entries()
            .map(|(key, flags)| {
                let enabled: Vec<&str> = predictors
                    .iter()
                    .zip(flags)
                    .filter(|(_, &on)| on)
                    .map(|(name, _)| name.as_str())
                    .collect();
                ExplanationRow {
                    scope: key.scope,
                    parameter: key.parameter.clone(),
                    activity: key.activity.clone(),
                    flags: flags.to_vec(),
                    explanation: self.narrative(key.scope, &key.parameter, &key.activity, &enabled),
                }
            })
            .collect();
        ExplanationTable { predictors, rows }
    }

    fn narrative(&self, scope: Scope, parameter: &str, activity: &str, enabled: &[&str]) -> String {
        let description = match self.parameter_descriptions.get(parameter) {
            Some(d) if !d.is_empty() => d.clone(),
            _ => {
                warn!("No description for parameter '{}'", parameter);
                "a reported climate disclosure metric.".to_string()
            }
        };
        let name = BRACKETED.replace_all(parameter, "");
        let name = name.trim();
        let activity_phrase = if activity == TOTAL_ACTIVITY {
            String::new()
        } else {
            format!("activity \"{}\" under ", activity)
        };

        let mut text = format!(
            "The parameter \"{name}\" is described as {description}\n\
             For calculating the {scope} {activity_phrase}parameter \"{name}\", the total {name} \
             reported by {company} was used as a starting point.\n",
            company = self.company,
        );

        if enabled.is_empty() {
            text.push_str("No correlated parameters are configured for it, so the reported value is kept as the estimate.");
        } else {
            text.push_str(
                "Then, the yearly trend of the parameters below was used for correlation analysis \
                 to determine confidence in the reported value and to adjust the corresponding \
                 estimate accordingly:\n",
            );
            let listing: Vec<String> = enabled
                .iter()
                .map(|p| match self.predictor_descriptions.get(*p) {
                    Some(d) if !d.is_empty() => format!(" {}: {}", p, d),
                    _ => format!(" {}", p),
                })
                .collect();
            text.push_str(&listing.join("\n"));
        }
        text
    }
}
