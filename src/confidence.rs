//! Confidence buckets from the damped relative error between an estimate
//! and the reported value it replaces.

use crate::config::ConfidenceThresholds;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Confidence {
    High,
    Medium,
    Low,
    #[serde(rename = "Not Applicable")]
    NotApplicable,
}

impl Confidence {
    pub fn label(&self) -> &'static str {
        match self {
            Confidence::High => "High",
            Confidence::Medium => "Medium",
            Confidence::Low => "Low",
            Confidence::NotApplicable => "Not Applicable",
        }
    }
}

impl fmt::Display for Confidence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ConfidenceClassifier {
    thresholds: ConfidenceThresholds,
}

impl ConfidenceClassifier {
    pub fn new(thresholds: ConfidenceThresholds) -> Self {
        Self { thresholds }
    }

    /// `|estimated - reported| / (|reported| + damping)`
    pub fn relative_error(&self, estimated: f64, reported: f64) -> f64 {
        (estimated - reported).abs() / (reported.abs() + self.thresholds.damping)
    }

    pub fn classify(&self, estimated: Option<f64>, reported: Option<f64>) -> Confidence {
        let (Some(estimated), Some(reported)) = (estimated, reported) else {
            return Confidence::NotApplicable;
        };
        let error = self.relative_error(estimated, reported);
        if !error.is_finite() {
            Confidence::NotApplicable
        } else if error < self.thresholds.high_below {
            Confidence::High
        } else if error < self.thresholds.medium_below {
            Confidence::Medium
        } else {
            Confidence::Low
        }
    }
}

impl Default for ConfidenceClassifier {
    fn default() -> Self {
        Self::new(ConfidenceThresholds::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bucket_boundaries() {
        let classifier = ConfidenceClassifier::default();
        // reported 0 → denominator 1000
        assert_eq!(classifier.classify(Some(0.0), Some(0.0)), Confidence::High);
        assert_eq!(classifier.classify(Some(199.0), Some(0.0)), Confidence::High);
        assert_eq!(classifier.classify(Some(200.0), Some(0.0)), Confidence::Medium);
        assert_eq!(classifier.classify(Some(399.0), Some(0.0)), Confidence::Medium);
        assert_eq!(classifier.classify(Some(400.0), Some(0.0)), Confidence::Low);
        assert_eq!(classifier.classify(Some(-5000.0), Some(0.0)), Confidence::Low);
    }

    #[test]
    fn test_damping_keeps_small_values_high() {
        let classifier = ConfidenceClassifier::default();
        // 10 vs 1 would be a 900% error without damping
        assert_eq!(classifier.classify(Some(10.0), Some(1.0)), Confidence::High);
        assert_eq!(classifier.relative_error(3000.0, 1000.0), 1.0);
    }

    #[test]
    fn test_missing_side_is_not_applicable() {
        let classifier = ConfidenceClassifier::default();
        assert_eq!(classifier.classify(None, Some(10.0)), Confidence::NotApplicable);
        assert_eq!(classifier.classify(Some(10.0), None), Confidence::NotApplicable);
        assert_eq!(classifier.classify(Some(f64::NAN), Some(1.0)), Confidence::NotApplicable);
    }

    #[test]
    fn test_labels() {
        assert_eq!(Confidence::NotApplicable.to_string(), "Not Applicable");
        assert_eq!(
            serde_json::to_string(&Confidence::NotApplicable).unwrap(),
            "\"Not Applicable\""
        );
    }
}
