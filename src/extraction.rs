//! Disclosure Extraction
//!
//! Turns report text into `ReportedRecord`s with a JSON-mode chat completion:
//! - `ExtractionService`: one extraction call for a text batch
//! - `LlmExtractionClient`: Azure OpenAI implementation with retry and
//!   exponential backoff
//! - `extract_batches`: folds batches, feeding each call the previous result
//! - `ExtractedReport::into_records`: maps the answer onto the parameter
//!   catalog and derives the Scope 3 total
//! - `ExtractedReport::into_predictor_records`: maps an annual-report answer
//!   onto the predictor catalog

use crate::config::{ParameterDescription, PredictorDescription, SCOPE3_TOTAL};
use crate::error::{EstimationError, Result};
use crate::ingest::coerce_value;
use crate::records::{normalize_unit, PredictorRecord, ReportedRecord, Scope, TONNES_CO2E};
use async_trait::async_trait;
use serde::{Deserialize, Deserializer, Serialize};
use std::time::Duration;
use tracing::{debug, info, warn};

const SYSTEM_PROMPT: &str = "You are a helpful data entry assistant.
The user will give you sections of a document that may be an html or text extracted from a pdf.
Extract the values and corresponding units for the parameters listed below from the data and share it as a JSON in the format shared below.
The user may also share data previously extracted from the file. In that case, update the JSON provided if any missing values are present in it.
We only want the data for the current reporting year. Ignore all other values that may be present.
Make sure to use the exact spelling, case and spacing for the parameter name as in the description below

Output format:
{
    reporting_year:
    parameter_list:[
            {
                \"Parameter\":str //Parameter name as specified in the descriptions below
                \"Value\":numeric|NULL // numeric value of the given parameter, empty if no value is given
                \"Units\":str|NULL // units for the number, empty if no value is given
            },
            ...
    ]
}

Parameter descriptions:
";

/// Connection and retry settings, resolved by the caller.
#[derive(Debug, Clone, PartialEq)]
pub struct ExtractionSettings {
    pub api_key: String,
    pub api_version: String,
    pub endpoint: String,
    pub deployment: String,
    pub max_attempts: u32,
    pub backoff_multiplier: Duration,
    pub backoff_min: Duration,
    pub backoff_max: Duration,
    pub token_limit: usize,
}

impl ExtractionSettings {
    pub fn new(api_key: String, api_version: String, endpoint: String, deployment: String) -> Self {
        Self {
            api_key,
            api_version,
            endpoint,
            deployment,
            max_attempts: 3,
            backoff_multiplier: Duration::from_secs(60),
            backoff_min: Duration::from_secs(20),
            backoff_max: Duration::from_secs(320),
            token_limit: crate::preprocess::DEFAULT_TOKEN_LIMIT,
        }
    }

    /// Wait after the `attempt`-th failure (1-based): `multiplier * 2^(attempt-1)`
    /// clamped to `[backoff_min, backoff_max]`.
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.backoff_multiplier
            .saturating_mul(factor)
            .clamp(self.backoff_min, self.backoff_max)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractedParameter {
    #[serde(rename = "Parameter")]
    pub parameter: String,
    #[serde(rename = "Value", default)]
    pub value: serde_json::Value,
    #[serde(rename = "Units", alias = "Unit", default)]
    pub units: Option<String>,
}

impl ExtractedParameter {
    /// Numbers are taken as is; strings are parsed; anything else is missing.
    pub fn numeric_value(&self) -> Option<f64> {
        match &self.value {
            serde_json::Value::Number(n) => n.as_f64().filter(|v| v.is_finite()),
            serde_json::Value::String(s) => coerce_value(s),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExtractedReport {
    #[serde(default, deserialize_with = "lenient_year")]
    pub reporting_year: Option<i32>,
    #[serde(default)]
    pub parameter_list: Vec<ExtractedParameter>,
}

fn lenient_year<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Option<i32>, D::Error> {
    let value = serde_json::Value::deserialize(deserializer)?;
    Ok(match value {
        serde_json::Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().filter(|f| f.fract() == 0.0 && f.abs() < 1e15).map(|f| f as i64))
            .and_then(|y| i32::try_from(y).ok()),
        serde_json::Value::String(s) => s.trim().parse().ok(),
        _ => None,
    })
}

impl ExtractedReport {
    /// Seed answer listing every parameter with no value.
    pub fn seed(reporting_year: Option<i32>, parameters: &[&str]) -> Self {
        Self {
            reporting_year,
            parameter_list: parameters
                .iter()
                .map(|p| ExtractedParameter {
                    parameter: p.to_string(),
                    value: serde_json::Value::Null,
                    units: Some(TONNES_CO2E.to_string()),
                })
                .collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.reporting_year.is_none() && self.parameter_list.is_empty()
    }

    /// One record per catalog parameter, valued from the extracted list
    /// where present. Any extracted Scope 3 total is discarded and rebuilt as
    /// the sum of the Scope 3 values, appended when the catalog has Scope 3
    /// parameters.
    pub fn into_records(&self, catalog: &[ParameterDescription]) -> Result<Vec<ReportedRecord>> {
        let year = self.year()?;

        let mut records = Vec::with_capacity(catalog.len() + 1);
        let mut scope3_values: Vec<f64> = Vec::new();
        let mut has_scope3 = false;

        for entry in catalog {
            if entry.parameter == SCOPE3_TOTAL {
                continue;
            }
            let scope: Scope = entry.scope.parse()?;
            let extracted = self.parameter_list.iter().find(|p| p.parameter == entry.parameter);
            let value = extracted.and_then(ExtractedParameter::numeric_value);
            let unit = normalize_unit(extracted.and_then(|p| p.units.as_deref()).unwrap_or(""));

            if scope == Scope::Scope3 {
                has_scope3 = true;
                scope3_values.extend(value);
            }
            records.push(ReportedRecord::new(year, scope, entry.parameter.clone(), unit, value));
        }

        self.log_unknown(catalog.iter().map(|c| c.parameter.as_str()));

        if has_scope3 {
            let total = if scope3_values.is_empty() {
                None
            } else {
                Some(scope3_values.iter().sum())
            };
            records.push(ReportedRecord::new(year, Scope::Scope3, SCOPE3_TOTAL, TONNES_CO2E, total));
        }
        Ok(records)
    }

    /// One predictor record per catalog metric. Units are kept as extracted,
    /// falling back to the catalog unit; they are not normalised.
    pub fn into_predictor_records(&self, catalog: &[PredictorDescription]) -> Result<Vec<PredictorRecord>> {
        let year = self.year()?;
        let records = catalog
            .iter()
            .map(|entry| {
                let extracted = self.parameter_list.iter().find(|p| p.parameter == entry.parameter);
                let mut record = PredictorRecord::new(
                    year,
                    entry.parameter.clone(),
                    extracted.and_then(ExtractedParameter::numeric_value),
                );
                record.unit = extracted
                    .and_then(|p| p.units.clone())
                    .filter(|u| !u.trim().is_empty())
                    .or_else(|| entry.unit.clone());
                record
            })
            .collect();
        self.log_unknown(catalog.iter().map(|c| c.parameter.as_str()));
        Ok(records)
    }

    fn year(&self) -> Result<i32> {
        self.reporting_year
            .ok_or_else(|| EstimationError::Extraction("no reporting year in extracted data".to_string()))
    }

    fn log_unknown<'a>(&self, known: impl Iterator<Item = &'a str> + Clone) {
        for p in &self.parameter_list {
            if p.parameter != SCOPE3_TOTAL && !known.clone().any(|k| k == p.parameter) {
                debug!("Ignoring extracted parameter not in catalog: {}", p.parameter);
            }
        }
    }
}

/// One extraction call over a text batch.
#[async_trait]
pub trait ExtractionService: Send + Sync {
    async fn extract(
        &self,
        batch: &str,
        parameter_context: &str,
        previous: Option<&ExtractedReport>,
    ) -> Result<ExtractedReport>;
}

/// Run `service` over every batch, passing along the latest non-empty answer.
pub async fn extract_batches<S: ExtractionService + ?Sized>(
    service: &S,
    batches: &[String],
    parameter_context: &str,
    seed: Option<ExtractedReport>,
) -> Result<ExtractedReport> {
    let mut previous = seed;
    let mut latest = ExtractedReport::default();
    for (i, batch) in batches.iter().enumerate() {
        debug!("Extracting batch {}/{}", i + 1, batches.len());
        latest = service.extract(batch, parameter_context, previous.as_ref()).await?;
        previous = if latest.is_empty() { None } else { Some(latest.clone()) };
    }
    info!(
        "Extracted {} parameters from {} batches",
        latest.parameter_list.len(),
        batches.len()
    );
    Ok(latest)
}

pub struct LlmExtractionClient {
    settings: ExtractionSettings,
    http: reqwest::Client,
}

impl LlmExtractionClient {
    pub fn new(settings: ExtractionSettings) -> Self {
        Self {
            settings,
            http: reqwest::Client::new(),
        }
    }

    fn url(&self) -> String {
        format!(
            "{}/openai/deployments/{}/chat/completions?api-version={}",
            self.settings.endpoint.trim_end_matches('/'),
            self.settings.deployment,
            self.settings.api_version
        )
    }

    fn messages(batch: &str, parameter_context: &str, previous: Option<&ExtractedReport>) -> Result<serde_json::Value> {
        let follow_up = match previous {
            Some(previous) => format!(
                "Update the JSON with the values from the above document:{}",
                serde_json::to_string_pretty(previous)?
            ),
            None => "Extract the parameter values from the above document in the requested format".to_string(),
        };
        Ok(serde_json::json!([
            {"role": "system", "content": format!("{}{}", SYSTEM_PROMPT, parameter_context)},
            {"role": "user", "content": batch},
            {"role": "user", "content": follow_up},
        ]))
    }

    async fn call_once(&self, messages: &serde_json::Value) -> Result<ExtractedReport> {
        let body = serde_json::json!({
            "model": self.settings.deployment,
            "response_format": {"type": "json_object"},
            "messages": messages,
        });

        let response = self
            .http
            .post(self.url())
            .header("api-key", &self.settings.api_key)
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| EstimationError::Llm(format!("LLM API call failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(EstimationError::Llm(format!("LLM API returned {}: {}", status, text)));
        }

        let response_json: serde_json::Value = response
            .json()
            .await
            .map_err(|e| EstimationError::Llm(format!("Failed to parse LLM response: {}", e)))?;
        let content = response_json["choices"][0]["message"]["content"]
            .as_str()
            .ok_or_else(|| EstimationError::Llm("No content in LLM response".to_string()))?;

        parse_completion(content)
    }
}

/// Content that is not JSON yields an empty report; JSON with a malformed
/// `parameter_list` is an error so the call is retried.
pub fn parse_completion(content: &str) -> Result<ExtractedReport> {
    let Ok(value) = serde_json::from_str::<serde_json::Value>(content) else {
        warn!("LLM returned non-JSON content, treating as empty");
        return Ok(ExtractedReport::default());
    };
    serde_json::from_value(value)
        .map_err(|e| EstimationError::Extraction(format!("Unexpected extraction payload: {}", e)))
}

#[async_trait]
impl ExtractionService for LlmExtractionClient {
    async fn extract(
        &self,
        batch: &str,
        parameter_context: &str,
        previous: Option<&ExtractedReport>,
    ) -> Result<ExtractedReport> {
        let messages = Self::messages(batch, parameter_context, previous)?;
        let mut attempt = 1;
        loop {
            match self.call_once(&messages).await {
                Ok(report) => return Ok(report),
                Err(e) if attempt < self.settings.max_attempts => {
                    let delay = self.settings.backoff_delay(attempt);
                    warn!(
                        "Extraction attempt {}/{} failed: {}; retrying in {:?}",
                        attempt, self.settings.max_attempts, e, delay
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}
