//! Weighted least squares through the origin and goodness-of-fit scores.

/// One training point.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Observation {
    pub x: f64,
    pub y: f64,
    pub weight: f64,
}

/// `y = coefficient * x`
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ZeroInterceptFit {
    pub coefficient: f64,
}

impl ZeroInterceptFit {
    /// Minimises Σ w (y - βx)², giving β = Σ wxy / Σ wx².
    ///
    /// Returns `None` when the design is degenerate (all x zero, no
    /// observations, or non-finite input).
    pub fn fit(observations: &[Observation]) -> Option<Self> {
        let (sxy, sxx) = observations.iter().fold((0.0, 0.0), |(sxy, sxx), o| {
            (sxy + o.weight * o.x * o.y, sxx + o.weight * o.x * o.x)
        });
        if sxx == 0.0 || !sxx.is_finite() || !sxy.is_finite() {
            return None;
        }
        Some(Self {
            coefficient: sxy / sxx,
        })
    }

    pub fn predict(&self, x: f64) -> f64 {
        self.coefficient * x
    }
}

/// Coefficient of determination.
///
/// A constant target scores 1.0 when predicted exactly and 0.0 otherwise.
pub fn r_squared(actual: &[f64], predicted: &[f64]) -> f64 {
    let weights = vec![1.0; actual.len()];
    weighted_r_squared(actual, predicted, &weights)
}

/// R² with per-observation weights on both residual and total sums of squares.
pub fn weighted_r_squared(actual: &[f64], predicted: &[f64], weights: &[f64]) -> f64 {
    debug_assert_eq!(actual.len(), predicted.len());
    debug_assert_eq!(actual.len(), weights.len());

    let total_weight: f64 = weights.iter().sum();
    if actual.is_empty() || total_weight == 0.0 {
        return f64::NAN;
    }
    let mean = actual.iter().zip(weights).map(|(y, w)| y * w).sum::<f64>() / total_weight;

    let mut ss_res = 0.0;
    let mut ss_tot = 0.0;
    for ((y, y_hat), w) in actual.iter().zip(predicted).zip(weights) {
        ss_res += w * (y - y_hat).powi(2);
        ss_tot += w * (y - mean).powi(2);
    }

    if ss_tot == 0.0 {
        return if ss_res == 0.0 { 1.0 } else { 0.0 };
    }
    1.0 - ss_res / ss_tot
}

/// Geometric recency weights over a year index: the oldest year gets
/// `base^0`, the next `base^1`, and so on.
#[derive(Debug, Clone, PartialEq)]
pub struct RecencyWeights {
    base: f64,
    years: Vec<i32>,
}

impl RecencyWeights {
    pub fn new(base: f64, years: &[i32]) -> Self {
        let mut years = years.to_vec();
        years.sort_unstable();
        years.dedup();
        Self { base, years }
    }

    pub fn weight(&self, year: i32) -> Option<f64> {
        let index = self.years.binary_search(&year).ok()?;
        Some(self.base.powi(index as i32))
    }
}
