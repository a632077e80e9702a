//! Estimation Engine
//!
//! Runs the pipeline end to end:
//! 1. Pivot reported records into the wide matrix
//! 2. Build the predictor table (and the derived energy predictor)
//! 3. Expand the dependency matrix over the reported activities
//! 4. Fit and select a predictor per column
//! 5. Reconcile activity totals and parent subtotals
//! 6. Grade and assemble the final table
//! 7. Generate explanations from the dependency matrix
//!
//! Structural errors abort before any report exists; per-column problems only
//! degrade that column to its reported values.

use crate::assemble::{EstimateRow, ResultAssembler};
use crate::config::ConfigWorkbook;
use crate::confidence::ConfidenceClassifier;
use crate::dependency::DependencyMatrix;
use crate::error::Result;
use crate::estimator::{CandidateOutcome, Estimator, FitSummary, SelectionPolicy};
use crate::explain::{ExplainabilityGenerator, ExplanationTable};
use crate::parameter_table::WideMatrix;
use crate::predictor_table::PredictorMatrix;
use crate::reconcile::{HierarchyReconciler, ReconcileStats};
use crate::records::{ColumnKey, PredictorRecord, ReportedRecord};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

/// How one column was estimated.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ColumnReport {
    pub key: ColumnKey,
    pub fit: Option<FitSummary>,
    pub candidates: Vec<CandidateOutcome>,
}

#[derive(Debug, Clone, Serialize)]
pub struct EstimationReport {
    pub run_id: Uuid,
    pub generated_at: DateTime<Utc>,
    pub company: String,
    pub selection_policy: String,
    pub estimates: Vec<EstimateRow>,
    pub explanations: ExplanationTable,
    pub columns: Vec<ColumnReport>,
    pub reconciliation: ReconcileStats,
}

impl EstimationReport {
    pub fn column(&self, key: &ColumnKey) -> Option<&ColumnReport> {
        self.columns.iter().find(|c| &c.key == key)
    }
}

#[derive(Default)]
pub struct EstimationEngine {
    policy: Option<Arc<dyn SelectionPolicy>>,
}

impl EstimationEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Use `policy` instead of the one named in the settings.
    pub fn with_policy(policy: Arc<dyn SelectionPolicy>) -> Self {
        Self { policy: Some(policy) }
    }

    pub fn run(
        &self,
        records: &[ReportedRecord],
        predictors: &[PredictorRecord],
        workbook: &ConfigWorkbook,
    ) -> Result<EstimationReport> {
        let settings = &workbook.settings;
        let run_id = Uuid::new_v4();
        info!(
            "Starting estimation run {} for {} ({} reported, {} predictor records)",
            run_id,
            settings.company,
            records.len(),
            predictors.len()
        );

        let mut wide = WideMatrix::from_records(records)?;
        let predictor_matrix = PredictorMatrix::build(predictors, &mut wide, &settings.derived_predictor)?;
        let dependencies = DependencyMatrix::expand(&workbook.dependencies, &wide);
        info!(
            "Prepared {} years, {} columns, {} predictors, {} dependency entries",
            wide.year_count(),
            wide.column_keys().count(),
            predictor_matrix.names().len(),
            dependencies.len()
        );

        let estimator = match &self.policy {
            Some(policy) => Estimator::with_policy(settings, policy.clone()),
            None => Estimator::new(settings),
        };
        let (mut table, column_estimates) = estimator.estimate_all(&wide, &predictor_matrix, &dependencies);

        let reconciliation = HierarchyReconciler::new(&settings.parent_map).reconcile(&mut wide, &mut table);

        let estimates =
            ResultAssembler::new(ConfidenceClassifier::new(settings.confidence)).assemble(&wide, &table);

        let parameter_descriptions = workbook.parameter_descriptions();
        let predictor_descriptions = workbook.predictor_descriptions();
        let explanations =
            ExplainabilityGenerator::new(&parameter_descriptions, &predictor_descriptions, &settings.company)
                .generate(&dependencies);

        let columns = column_estimates
            .into_iter()
            .map(|c| ColumnReport {
                key: c.key,
                fit: c.fit,
                candidates: c.candidates,
            })
            .collect();

        info!(
            "Finished run {}: {} estimate rows, {} explanations",
            run_id,
            estimates.len(),
            explanations.len()
        );
        Ok(EstimationReport {
            run_id,
            generated_at: Utc::now(),
            company: settings.company.clone(),
            selection_policy: estimator.policy_name().to_string(),
            estimates,
            explanations,
            columns,
            reconciliation,
        })
    }
}
