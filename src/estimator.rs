//! Per-Parameter Estimator
//!
//! For every reported column with a dependency entry, each permitted
//! predictor is fitted against the column with a zero-intercept weighted
//! least-squares model. The candidate with the best score under the active
//! `SelectionPolicy` wins and its predictions fill every year where the
//! predictor has a value. Columns where nothing qualifies keep their
//! reported values.

use crate::config::{EngineSettings, SelectionMetric};
use crate::dependency::DependencyMatrix;
use crate::parameter_table::WideMatrix;
use crate::predictor_table::PredictorMatrix;
use crate::regression::{r_squared, weighted_r_squared, Observation, RecencyWeights, ZeroInterceptFit};
use crate::records::ColumnKey;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info};

/// Scores a candidate fit. Higher is better.
pub trait SelectionPolicy: Send + Sync {
    fn name(&self) -> &'static str;

    fn score(&self, actual: &[f64], fitted: &[f64], weights: &[f64]) -> f64;

    /// Whether `candidate` displaces the current best. Strict comparison
    /// keeps the earliest listed predictor on ties.
    fn prefers(&self, candidate: f64, incumbent: f64) -> bool {
        candidate > incumbent
    }
}

/// Plain R² on the training years.
#[derive(Debug, Clone, Copy, Default)]
pub struct RSquaredPolicy;

impl SelectionPolicy for RSquaredPolicy {
    fn name(&self) -> &'static str {
        "r_squared"
    }

    fn score(&self, actual: &[f64], fitted: &[f64], _weights: &[f64]) -> f64 {
        r_squared(actual, fitted)
    }
}

/// R² using the recency weights of the fit.
#[derive(Debug, Clone, Copy, Default)]
pub struct WeightedRSquaredPolicy;

impl SelectionPolicy for WeightedRSquaredPolicy {
    fn name(&self) -> &'static str {
        "weighted_r_squared"
    }

    fn score(&self, actual: &[f64], fitted: &[f64], weights: &[f64]) -> f64 {
        weighted_r_squared(actual, fitted, weights)
    }
}

pub fn policy_for(metric: SelectionMetric) -> Arc<dyn SelectionPolicy> {
    match metric {
        SelectionMetric::RSquared => Arc::new(RSquaredPolicy),
        SelectionMetric::WeightedRSquared => Arc::new(WeightedRSquaredPolicy),
    }
}

/// What happened to one candidate predictor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum CandidateOutcome {
    Fitted {
        predictor: String,
        score: f64,
        coefficient: f64,
        training_years: usize,
    },
    InsufficientData {
        predictor: String,
        overlap: usize,
    },
    Degenerate {
        predictor: String,
    },
    UnknownPredictor {
        predictor: String,
    },
}

/// The winning fit for a column.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FitSummary {
    pub predictor: String,
    pub score: f64,
    pub coefficient: f64,
    pub training_years: usize,
}

/// Raw (unrounded) model output for one column.
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnEstimate {
    pub key: ColumnKey,
    pub fit: Option<FitSummary>,
    pub predictions: BTreeMap<i32, f64>,
    pub candidates: Vec<CandidateOutcome>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EstimateSource {
    /// Rounded model prediction.
    Model,
    /// Rebuilt from constituent rows.
    Reconciled,
    /// No estimate; the rounded reported value is carried over.
    Reported,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EstimatedValue {
    pub value: f64,
    pub source: EstimateSource,
}

/// Finalised estimates per column and year, plus the fit behind each
/// modelled column.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EstimateTable {
    values: BTreeMap<ColumnKey, BTreeMap<i32, EstimatedValue>>,
    fits: BTreeMap<ColumnKey, FitSummary>,
}

impl EstimateTable {
    pub fn get(&self, year: i32, key: &ColumnKey) -> Option<EstimatedValue> {
        self.values.get(key)?.get(&year).copied()
    }

    pub fn value(&self, year: i32, key: &ColumnKey) -> Option<f64> {
        self.get(year, key).map(|v| v.value)
    }

    pub fn set(&mut self, year: i32, key: &ColumnKey, value: EstimatedValue) {
        self.values.entry(key.clone()).or_default().insert(year, value);
    }

    pub fn column(&self, key: &ColumnKey) -> Option<&BTreeMap<i32, EstimatedValue>> {
        self.values.get(key)
    }

    pub fn fit(&self, key: &ColumnKey) -> Option<&FitSummary> {
        self.fits.get(key)
    }

    pub fn fits(&self) -> impl Iterator<Item = (&ColumnKey, &FitSummary)> {
        self.fits.iter()
    }
}

/// Round half to even, matching the usual dataframe rounding.
pub fn round_estimate(value: f64) -> f64 {
    value.round_ties_even()
}

pub struct Estimator<'a> {
    settings: &'a EngineSettings,
    policy: Arc<dyn SelectionPolicy>,
}

impl<'a> Estimator<'a> {
    pub fn new(settings: &'a EngineSettings) -> Self {
        Self {
            settings,
            policy: policy_for(settings.selection),
        }
    }

    pub fn with_policy(settings: &'a EngineSettings, policy: Arc<dyn SelectionPolicy>) -> Self {
        Self { settings, policy }
    }

    pub fn policy_name(&self) -> &'static str {
        self.policy.name()
    }

    /// Fit every candidate for one column and keep the best.
    pub fn estimate_column(
        &self,
        key: &ColumnKey,
        target: &BTreeMap<i32, f64>,
        candidates: &[String],
        predictors: &PredictorMatrix,
        weights: &RecencyWeights,
    ) -> ColumnEstimate {
        let target: BTreeMap<i32, f64> = target
            .iter()
            .filter(|(_, &v)| !(self.settings.zero_as_missing && v == 0.0))
            .map(|(&y, &v)| (y, v))
            .collect();

        let mut outcomes = Vec::with_capacity(candidates.len());
        let mut best: Option<(FitSummary, &BTreeMap<i32, f64>, ZeroInterceptFit)> = None;

        for name in candidates {
            let Some(series) = predictors.series(name) else {
                debug!("{}: predictor '{}' not in predictor table", key, name);
                outcomes.push(CandidateOutcome::UnknownPredictor {
                    predictor: name.clone(),
                });
                continue;
            };

            let points: Vec<Observation> = target
                .iter()
                .filter_map(|(&year, &y)| {
                    let x = *series.get(&year)?;
                    let weight = weights.weight(year).unwrap_or(1.0);
                    Some(Observation { x, y, weight })
                })
                .collect();

            if points.len() < self.settings.min_overlap {
                outcomes.push(CandidateOutcome::InsufficientData {
                    predictor: name.clone(),
                    overlap: points.len(),
                });
                continue;
            }

            let Some(fit) = ZeroInterceptFit::fit(&points) else {
                outcomes.push(CandidateOutcome::Degenerate {
                    predictor: name.clone(),
                });
                continue;
            };

            let actual: Vec<f64> = points.iter().map(|o| o.y).collect();
            let fitted: Vec<f64> = points.iter().map(|o| fit.predict(o.x)).collect();
            let sample_weights: Vec<f64> = points.iter().map(|o| o.weight).collect();
            let score = self.policy.score(&actual, &fitted, &sample_weights);
            if score.is_nan() {
                outcomes.push(CandidateOutcome::Degenerate {
                    predictor: name.clone(),
                });
                continue;
            }

            debug!("{}: {} scores {:.4} (beta={:.6})", key, name, score, fit.coefficient);
            outcomes.push(CandidateOutcome::Fitted {
                predictor: name.clone(),
                score,
                coefficient: fit.coefficient,
                training_years: points.len(),
            });

            let replaces = match &best {
                None => true,
                Some((incumbent, _, _)) => self.policy.prefers(score, incumbent.score),
            };
            if replaces {
                let summary = FitSummary {
                    predictor: name.clone(),
                    score,
                    coefficient: fit.coefficient,
                    training_years: points.len(),
                };
                best = Some((summary, series, fit));
            }
        }

        let (fit, predictions) = match best {
            Some((summary, series, model)) => {
                let predictions = series
                    .iter()
                    .map(|(&year, &x)| (year, model.predict(x)))
                    .collect();
                (Some(summary), predictions)
            }
            None => (None, BTreeMap::new()),
        };

        ColumnEstimate {
            key: key.clone(),
            fit,
            predictions,
            candidates: outcomes,
        }
    }

    /// Run every column of `wide` and finalise the estimate table: model
    /// predictions where available, rounded reported values elsewhere.
    pub fn estimate_all(
        &self,
        wide: &WideMatrix,
        predictors: &PredictorMatrix,
        dependencies: &DependencyMatrix,
    ) -> (EstimateTable, Vec<ColumnEstimate>) {
        let weights = RecencyWeights::new(self.settings.weight_base, predictors.years());
        let empty = BTreeMap::new();
        let mut table = EstimateTable::default();
        let mut columns = Vec::new();
        let mut modelled = 0usize;

        for key in wide.column_keys() {
            let reported = wide.column(key).unwrap_or(&empty);

            let estimate = match dependencies.candidates(&key.series(), &self.settings.derived_predictor) {
                Some(candidates) if !candidates.is_empty() => {
                    Some(self.estimate_column(key, reported, &candidates, predictors, &weights))
                }
                Some(_) => None,
                None => {
                    debug!("{}: no dependency entry, keeping reported values", key);
                    None
                }
            };

            for year in wide.years() {
                let predicted = estimate.as_ref().and_then(|e| e.predictions.get(&year));
                let cell = match predicted {
                    Some(&p) => Some(EstimatedValue {
                        value: round_estimate(p),
                        source: EstimateSource::Model,
                    }),
                    None => reported.get(&year).map(|&v| EstimatedValue {
                        value: round_estimate(v),
                        source: EstimateSource::Reported,
                    }),
                };
                if let Some(cell) = cell {
                    table.set(year, key, cell);
                }
            }

            if let Some(estimate) = estimate {
                match &estimate.fit {
                    Some(fit) => {
                        modelled += 1;
                        table.fits.insert(key.clone(), fit.clone());
                    }
                    None => debug!("{}: no qualifying predictor, keeping reported values", key),
                }
                columns.push(estimate);
            }
        }

        info!(
            "Estimated {} of {} columns with {}",
            modelled,
            wide.column_keys().count(),
            self.policy.name()
        );
        (table, columns)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dependency::DependencyConfig;
    use crate::records::{PredictorRecord, ReportedRecord, Scope, TONNES_CO2E};

    fn key() -> ColumnKey {
        ColumnKey::new(Scope::Scope1, "Mobile combustion", "Total", TONNES_CO2E)
    }

    fn target(values: &[(i32, f64)]) -> BTreeMap<i32, f64> {
        values.iter().copied().collect()
    }

    fn predictors(series: &[(&str, &[(i32, f64)])], years: &[i32]) -> PredictorMatrix {
        let records: Vec<ReportedRecord> = years
            .iter()
            .map(|&y| ReportedRecord::new(y, Scope::Scope1, "Anchor", TONNES_CO2E, None))
            .collect();
        let mut wide = WideMatrix::from_records(&records).unwrap();
        let predictor_records: Vec<PredictorRecord> = series
            .iter()
            .flat_map(|(name, values)| {
                values
                    .iter()
                    .map(move |&(y, v)| PredictorRecord::new(y, *name, Some(v)))
            })
            .collect();
        PredictorMatrix::build(&predictor_records, &mut wide, &Default::default()).unwrap()
    }

    #[test]
    fn test_fills_missing_years_from_fitted_line() {
        let settings = EngineSettings::default();
        let estimator = Estimator::new(&settings);
        let years = [2016, 2017, 2018, 2019, 2020];
        let y_series: Vec<(i32, f64)> = vec![(2016, 20.0), (2017, 40.0), (2018, 60.0), (2019, 90.0), (2020, 130.0)];
        let table = predictors(&[("Y", y_series.as_slice())], &years);
        let weights = RecencyWeights::new(1.2, table.years());

        let estimate = estimator.estimate_column(
            &key(),
            &target(&[(2016, 10.0), (2017, 20.0), (2018, 30.0)]),
            &["Y".to_string()],
            &table,
            &weights,
        );

        let fit = estimate.fit.unwrap();
        assert_eq!(fit.predictor, "Y");
        assert!((fit.coefficient - 0.5).abs() < 1e-12);
        assert!((fit.score - 1.0).abs() < 1e-12);
        assert_eq!(round_estimate(estimate.predictions[&2019]), 45.0);
        assert_eq!(round_estimate(estimate.predictions[&2020]), 65.0);
    }

    #[test]
    fn test_zero_reported_values_are_not_training_points() {
        let settings = EngineSettings::default();
        let estimator = Estimator::new(&settings);
        let years = [2017, 2018, 2019, 2020];
        let x: Vec<(i32, f64)> = vec![(2017, 1.0), (2018, 2.0), (2019, 3.0), (2020, 4.0)];
        let table = predictors(&[("X", x.as_slice())], &years);
        let weights = RecencyWeights::new(1.2, table.years());

        // Three real points plus a zero: the zero would otherwise spoil the line.
        let estimate = estimator.estimate_column(
            &key(),
            &target(&[(2017, 10.0), (2018, 20.0), (2019, 30.0), (2020, 0.0)]),
            &["X".to_string()],
            &table,
            &weights,
        );
        let fit = estimate.fit.unwrap();
        assert_eq!(fit.training_years, 3);
        assert!((fit.coefficient - 10.0).abs() < 1e-12);
        assert!((estimate.predictions[&2020] - 40.0).abs() < 1e-9);
    }

    #[test]
    fn test_fewer_than_three_overlapping_years_skips_candidate() {
        let settings = EngineSettings::default();
        let estimator = Estimator::new(&settings);
        let years = [2018, 2019, 2020];
        let x: Vec<(i32, f64)> = vec![(2019, 2.0), (2020, 3.0)];
        let table = predictors(&[("X", x.as_slice())], &years);
        let weights = RecencyWeights::new(1.2, table.years());

        let estimate = estimator.estimate_column(
            &key(),
            &target(&[(2018, 1.0), (2019, 2.0), (2020, 3.0)]),
            &["X".to_string(), "Missing".to_string()],
            &table,
            &weights,
        );
        assert!(estimate.fit.is_none());
        assert!(estimate.predictions.is_empty());
        assert_eq!(
            estimate.candidates,
            vec![
                CandidateOutcome::InsufficientData {
                    predictor: "X".to_string(),
                    overlap: 2
                },
                CandidateOutcome::UnknownPredictor {
                    predictor: "Missing".to_string()
                },
            ]
        );
    }

    #[test]
    fn test_tie_keeps_first_listed_candidate() {
        let settings = EngineSettings::default();
        let estimator = Estimator::new(&settings);
        let years = [2017, 2018, 2019, 2020];
        // Identical, noisy series so both candidates score the same R² < 1.
        let noisy: Vec<(i32, f64)> = vec![(2017, 1.0), (2018, 2.5), (2019, 2.8), (2020, 4.4)];
        let table = predictors(&[("First", noisy.as_slice()), ("Second", noisy.as_slice())], &years);
        let weights = RecencyWeights::new(1.2, table.years());
        let y = target(&[(2017, 10.0), (2018, 20.0), (2019, 30.0), (2020, 40.0)]);

        let forward = estimator.estimate_column(
            &key(),
            &y,
            &["First".to_string(), "Second".to_string()],
            &table,
            &weights,
        );
        let backward = estimator.estimate_column(
            &key(),
            &y,
            &["Second".to_string(), "First".to_string()],
            &table,
            &weights,
        );
        let score = forward.fit.as_ref().unwrap().score;
        assert!(score < 1.0);
        assert_eq!(forward.fit.unwrap().predictor, "First");
        assert_eq!(backward.fit.unwrap().predictor, "Second");
    }

    #[test]
    fn test_best_scoring_candidate_wins() {
        let settings = EngineSettings::default();
        let estimator = Estimator::new(&settings);
        let years = [2017, 2018, 2019, 2020];
        let poor: Vec<(i32, f64)> = vec![(2017, 4.0), (2018, 1.0), (2019, 3.0), (2020, 2.0)];
        let exact: Vec<(i32, f64)> = vec![(2017, 1.0), (2018, 2.0), (2019, 3.0), (2020, 4.0)];
        let table = predictors(&[("Poor", poor.as_slice()), ("Exact", exact.as_slice())], &years);
        let weights = RecencyWeights::new(1.2, table.years());

        let estimate = estimator.estimate_column(
            &key(),
            &target(&[(2017, 10.0), (2018, 20.0), (2019, 30.0), (2020, 40.0)]),
            &["Poor".to_string(), "Exact".to_string()],
            &table,
            &weights,
        );
        assert_eq!(estimate.fit.unwrap().predictor, "Exact");
        assert_eq!(estimate.candidates.len(), 2);
    }

    #[test]
    fn test_estimate_all_falls_back_to_rounded_reported() {
        let settings = EngineSettings::default();
        let estimator = Estimator::new(&settings);
        let records = vec![
            ReportedRecord::new(2019, Scope::Scope1, "Mobile combustion", TONNES_CO2E, Some(10.4)),
            ReportedRecord::new(2020, Scope::Scope1, "Mobile combustion", TONNES_CO2E, None),
            ReportedRecord::new(2019, Scope::Scope1, "Process emissions", TONNES_CO2E, Some(2.5)),
        ];
        let mut wide = WideMatrix::from_records(&records).unwrap();
        let predictors = PredictorMatrix::build(&[], &mut wide, &settings.derived_predictor).unwrap();
        let config = DependencyConfig::new(vec!["Revenue".to_string()])
            .with_row(Scope::Scope1, "Mobile combustion", &["Revenue"])
            .unwrap();
        let deps = DependencyMatrix::expand(&config, &wide);

        let (table, columns) = estimator.estimate_all(&wide, &predictors, &deps);
        let mobile = records[0].column_key();
        let process = records[2].column_key();

        assert_eq!(columns.len(), 1);
        assert_eq!(
            table.get(2019, &mobile),
            Some(EstimatedValue {
                value: 10.0,
                source: EstimateSource::Reported
            })
        );
        assert_eq!(table.get(2020, &mobile), None);
        // 2.5 rounds half to even.
        assert_eq!(table.value(2019, &process), Some(2.0));
        assert!(table.fit(&mobile).is_none());
    }
}
