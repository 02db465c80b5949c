//! Weighted random selection.
//!
//! Builds a prefix-sum array over the effective weights and binary-searches a
//! uniform draw in `[0, total)`. The array is rebuilt every iteration, which
//! is cheap for the handful of tasks an agent carries. Zero-weight entries add
//! an empty interval and can never be drawn.

use rand::Rng;

/// Prefix sums over a weight vector
#[derive(Debug, Clone, Default)]
pub struct WeightedSelector {
    cumulative: Vec<f64>,
}

impl WeightedSelector {
    /// Build from weights. Negative and non-finite weights count as zero.
    pub fn new(weights: &[f64]) -> Self {
        let mut total = 0.0;
        let cumulative = weights
            .iter()
            .map(|&w| {
                if w.is_finite() && w > 0.0 {
                    total += w;
                }
                total
            })
            .collect();
        Self { cumulative }
    }

    /// Sum of all positive weights
    pub fn total(&self) -> f64 {
        self.cumulative.last().copied().unwrap_or(0.0)
    }

    /// Whether any entry can be selected
    pub fn has_candidates(&self) -> bool {
        self.total() > 0.0
    }

    /// Index of the entry whose interval contains `point`.
    ///
    /// `point` must lie in `[0, total)`.
    pub fn index_for(&self, point: f64) -> Option<usize> {
        if !self.has_candidates() || !(0.0..self.total()).contains(&point) {
            return None;
        }
        // First prefix strictly greater than the draw; skips empty intervals.
        let idx = self.cumulative.partition_point(|&c| c <= point);
        (idx < self.cumulative.len()).then_some(idx)
    }

    /// Draw one index with probability proportional to its weight.
    pub fn select<R: Rng>(&self, rng: &mut R) -> Option<usize> {
        if !self.has_candidates() {
            return None;
        }
        let point = rng.random_range(0.0..self.total());
        self.index_for(point)
    }
}
