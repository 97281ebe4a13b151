//! Normalized loss-period data, read-only to the simulator.
//!
//! A series is either assembled from already-normalized records or derived
//! from raw incurred losses in memory: losses scale by the series maximum and
//! each period carries a trailing-window dispersion estimate scaled the same
//! way. No file formats live here.

use rand::Rng;
use rand_distr::{Distribution, LogNormal};
use serde::Serialize;

use crate::error::ConfigError;

/// Trailing window length for the local volatility estimate.
pub const VOLATILITY_WINDOW: usize = 10;

/// One reserving period.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct PeriodRecord {
    /// Incurred loss, normalized to [0, ~1] by the series maximum.
    pub incurred_loss: f64,
    /// Non-negative local dispersion estimate, normalized the same way.
    pub volatility: f64,
}

/// Ordered, immutable sequence of loss periods.
#[derive(Debug, Clone, PartialEq)]
pub struct LossSeries {
    periods: Vec<PeriodRecord>,
}

impl LossSeries {
    /// Validates that every record is finite with non-negative volatility.
    /// An empty record set is accepted here; simulator construction rejects it.
    pub fn from_records(periods: Vec<PeriodRecord>) -> Result<Self, ConfigError> {
        for (index, p) in periods.iter().enumerate() {
            if !p.incurred_loss.is_finite() {
                return Err(ConfigError::NonFinite {
                    index,
                    field: "incurred_loss",
                    value: p.incurred_loss,
                });
            }
            if !p.volatility.is_finite() {
                return Err(ConfigError::NonFinite {
                    index,
                    field: "volatility",
                    value: p.volatility,
                });
            }
            if p.volatility < 0.0 {
                return Err(ConfigError::NegativeVolatility { index, value: p.volatility });
            }
        }
        Ok(Self { periods })
    }

    /// Build a series from raw incurred losses.
    ///
    /// `incurred_loss[t] = raw[t] / max(raw)`. `volatility[t]` is the sample
    /// standard deviation of the trailing window of up to
    /// [`VOLATILITY_WINDOW`] raw values ending at `t` (zero when the window
    /// holds fewer than two values), divided by `max(raw)`.
    pub fn from_incurred(raw: &[f64]) -> Result<Self, ConfigError> {
        if raw.is_empty() {
            return Err(ConfigError::EmptySeries);
        }
        for (index, &value) in raw.iter().enumerate() {
            if !value.is_finite() {
                return Err(ConfigError::NonFinite { index, field: "incurred_loss", value });
            }
            if value < 0.0 {
                return Err(ConfigError::NegativeLoss { index, value });
            }
        }
        let max = raw.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        if max <= 0.0 {
            return Err(ConfigError::NonPositiveMax { max });
        }
        let periods = raw
            .iter()
            .enumerate()
            .map(|(t, &value)| {
                let start = t.saturating_sub(VOLATILITY_WINDOW - 1);
                PeriodRecord {
                    incurred_loss: value / max,
                    volatility: sample_std(&raw[start..=t]) / max,
                }
            })
            .collect();
        Ok(Self { periods })
    }

    /// Log-normal raw losses from `rng`, then the standard normalization.
    /// Demo and benchmark data source.
    pub fn synthetic(len: usize, rng: &mut impl Rng) -> Result<Self, ConfigError> {
        let severity = LogNormal::new(0.0, 0.5).expect("finite log-normal parameters");
        let raw: Vec<f64> = (0..len).map(|_| severity.sample(rng)).collect();
        Self::from_incurred(&raw)
    }

    pub fn periods(&self) -> &[PeriodRecord] {
        &self.periods
    }

    pub fn len(&self) -> usize {
        self.periods.len()
    }

    pub fn is_empty(&self) -> bool {
        self.periods.is_empty()
    }
}

/// Sample standard deviation (n-1 denominator); 0.0 below two observations.
fn sample_std(window: &[f64]) -> f64 {
    let n = window.len();
    if n < 2 {
        return 0.0;
    }
    let mean = window.iter().sum::<f64>() / n as f64;
    let var = window.iter().map(|&x| (x - mean).powi(2)).sum::<f64>() / (n - 1) as f64;
    var.sqrt()
}
