//! Hierarchy Reconciler
//!
//! Rebuilds aggregate rows from their constituents after estimation:
//!
//! 1. Activity totals: the "Total" activity of a (scope, parameter, unit) is
//!    the sum of its other activities.
//! 2. Parent subtotals: each configured parent parameter is the sum of the
//!    "Total" rows of its child parameters, written only when that sum is
//!    strictly positive.
//!
//! A year where every constituent is missing leaves the aggregate untouched.

use crate::config::ParentGroup;
use crate::estimator::{round_estimate, EstimateSource, EstimateTable, EstimatedValue};
use crate::parameter_table::WideMatrix;
use crate::records::{ColumnKey, TOTAL_ACTIVITY};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileStats {
    pub activity_totals: usize,
    pub parent_totals: usize,
    pub skipped_parents: usize,
}

pub struct HierarchyReconciler<'a> {
    parent_map: &'a [ParentGroup],
}

impl<'a> HierarchyReconciler<'a> {
    pub fn new(parent_map: &'a [ParentGroup]) -> Self {
        Self { parent_map }
    }

    /// Run both passes. Aggregate columns that were never reported are added
    /// to `wide` so they appear in the assembled output.
    pub fn reconcile(&self, wide: &mut WideMatrix, table: &mut EstimateTable) -> ReconcileStats {
        let mut stats = ReconcileStats::default();
        self.activity_totals(wide, table, &mut stats);
        self.parent_totals(wide, table, &mut stats);
        info!(
            "Reconciled {} activity totals and {} parent totals ({} parents skipped)",
            stats.activity_totals, stats.parent_totals, stats.skipped_parents
        );
        stats
    }

    fn activity_totals(&self, wide: &mut WideMatrix, table: &mut EstimateTable, stats: &mut ReconcileStats) {
        let mut groups: BTreeMap<ColumnKey, Vec<ColumnKey>> = BTreeMap::new();
        for key in wide.column_keys().filter(|k| !k.is_total()) {
            groups.entry(key.total_key()).or_default().push(key.clone());
        }

        let years: Vec<i32> = wide.years().collect();
        for (total, children) in groups {
            wide.ensure_column(&total);
            for &year in &years {
                if let Some(sum) = Self::sum_children(wide, table, year, &children) {
                    table.set(year, &total, reconciled(sum));
                }
            }
            stats.activity_totals += 1;
        }
    }

    fn parent_totals(&self, wide: &mut WideMatrix, table: &mut EstimateTable, stats: &mut ReconcileStats) {
        let years: Vec<i32> = wide.years().collect();

        for group in self.parent_map {
            let children: Vec<ColumnKey> = wide
                .column_keys()
                .filter(|k| {
                    k.scope == group.scope
                        && k.activity == TOTAL_ACTIVITY
                        && group.children.iter().any(|c| c == &k.parameter)
                })
                .cloned()
                .collect();
            let units: BTreeSet<&str> = children.iter().map(|k| k.unit.as_str()).collect();

            for unit in units {
                let unit_children: Vec<ColumnKey> =
                    children.iter().filter(|k| k.unit == unit).cloned().collect();
                let sums: Vec<(i32, f64)> = years
                    .iter()
                    .filter_map(|&year| {
                        Self::sum_children(wide, table, year, &unit_children).map(|s| (year, s))
                    })
                    .collect();

                let grand_total: f64 = sums.iter().map(|(_, s)| s).sum();
                if grand_total <= 0.0 {
                    debug!(
                        "Skipping {} / {} ({}): children sum to {}",
                        group.scope, group.parameter, unit, grand_total
                    );
                    stats.skipped_parents += 1;
                    continue;
                }

                let parent = ColumnKey::new(group.scope, group.parameter.clone(), TOTAL_ACTIVITY, unit);
                wide.ensure_column(&parent);
                for (year, sum) in sums {
                    table.set(year, &parent, reconciled(sum));
                }
                stats.parent_totals += 1;
            }
        }
    }

    /// Sum of the children's estimates (falling back to rounded reported
    /// values); `None` when every child is missing for `year`.
    fn sum_children(wide: &WideMatrix, table: &EstimateTable, year: i32, children: &[ColumnKey]) -> Option<f64> {
        children
            .iter()
            .filter_map(|child| {
                table
                    .value(year, child)
                    .or_else(|| wide.get(year, child).map(round_estimate))
            })
            .fold(None, |acc, v| Some(acc.unwrap_or(0.0) + v))
    }
}

fn reconciled(value: f64) -> EstimatedValue {
    EstimatedValue {
        value,
        source: EstimateSource::Reconciled,
    }
}
