//! Post-hoc scoring of recorded rollouts.
//!
//! The reward (simulator side) and these metrics both derive shortfall and
//! violation figures, on purpose and independently: training-time reward and
//! evaluation-time scoring stay separately testable. Only the quantile rule
//! is shared, through `stats`.

use serde::Serialize;

use crate::error::EmptyRolloutError;
use crate::stats;

/// One recorded step: post-step reserve, the covered period's loss, and the
/// regulatory violation flag. Drivers accumulate these; the engine only
/// reads them.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct RolloutRecord {
    pub reserve: f64,
    pub loss: f64,
    pub violation: bool,
}

/// Aggregate risk scores over one rollout.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct RiskMetrics {
    /// Mean reserve-to-loss ratio (reserve-adequacy ratio).
    pub reserve_adequacy: f64,
    /// Mean shortfall at or beyond the 0.95 shortfall quantile.
    pub cvar_95: f64,
    /// `1 - mean(|reserve - loss|)` (calibration/efficiency score).
    pub calibration_efficiency: f64,
    /// Fraction of steps in regulatory violation.
    pub violation_rate: f64,
}

/// Reduce a rollout to its four aggregate scores.
///
/// A zero loss propagates its IEEE division result (`inf` or `NaN`) into the
/// adequacy mean rather than failing; reserve adequacy is only meaningful
/// over strictly positive losses. The input is never mutated.
pub fn compute_metrics(rollout: &[RolloutRecord]) -> Result<RiskMetrics, EmptyRolloutError> {
    if rollout.is_empty() {
        return Err(EmptyRolloutError);
    }
    let shortfalls: Vec<f64> = rollout.iter().map(|r| (r.loss - r.reserve).max(0.0)).collect();
    let adequacy: Vec<f64> = rollout.iter().map(|r| r.reserve / r.loss).collect();
    let gaps: Vec<f64> = rollout.iter().map(|r| (r.reserve - r.loss).abs()).collect();
    let violations: Vec<f64> =
        rollout.iter().map(|r| if r.violation { 1.0 } else { 0.0 }).collect();

    Ok(RiskMetrics {
        reserve_adequacy: stats::mean(&adequacy),
        cvar_95: stats::cvar(&shortfalls, 0.95),
        calibration_efficiency: 1.0 - stats::mean(&gaps),
        violation_rate: stats::mean(&violations),
    })
}

/// Distribution of one metric across repeated episodes.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct MetricDist {
    pub min: f64,
    pub p25: f64,
    pub p50: f64,
    pub p75: f64,
    pub max: f64,
    pub mean: f64,
}

impl MetricDist {
    fn from_samples(samples: &[f64]) -> Self {
        let mut sorted = samples.to_vec();
        sorted.sort_by(|a, b| a.total_cmp(b));
        Self {
            min: sorted[0],
            p25: stats::quantile_sorted(&sorted, 0.25),
            p50: stats::quantile_sorted(&sorted, 0.50),
            p75: stats::quantile_sorted(&sorted, 0.75),
            max: sorted[sorted.len() - 1],
            mean: stats::mean(&sorted),
        }
    }
}

/// Per-metric distributions across a batch of episode scores.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct MetricsSummary {
    pub episodes: usize,
    pub reserve_adequacy: MetricDist,
    pub cvar_95: MetricDist,
    pub calibration_efficiency: MetricDist,
    pub violation_rate: MetricDist,
}

/// Summarize a batch of episode scores; `None` when the batch is empty.
pub fn summarize(batch: &[RiskMetrics]) -> Option<MetricsSummary> {
    if batch.is_empty() {
        return None;
    }
    let dist = |f: fn(&RiskMetrics) -> f64| -> MetricDist {
        let samples: Vec<f64> = batch.iter().map(f).collect();
        MetricDist::from_samples(&samples)
    };
    Some(MetricsSummary {
        episodes: batch.len(),
        reserve_adequacy: dist(|m| m.reserve_adequacy),
        cvar_95: dist(|m| m.cvar_95),
        calibration_efficiency: dist(|m| m.calibration_efficiency),
        violation_rate: dist(|m| m.violation_rate),
    })
}
