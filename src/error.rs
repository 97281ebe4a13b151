//! Failure taxonomy: construction-input rejection, action-range rejection,
//! and empty-rollout rejection. All are local precondition violations
//! reported at the offending call; nothing here is retried or recovered.

use thiserror::Error;

/// Malformed construction input for a series, schedule, or simulator.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ConfigError {
    #[error("loss series is empty")]
    EmptySeries,
    #[error("curriculum schedule has no entry for level {0}")]
    MissingLevel(usize),
    #[error("shortfall buffer capacity must be at least 1, got {0}")]
    BufferTooSmall(usize),
    #[error("period {index}: non-finite {field} value {value}")]
    NonFinite {
        index: usize,
        field: &'static str,
        value: f64,
    },
    #[error("period {index}: negative volatility {value}")]
    NegativeVolatility { index: usize, value: f64 },
    #[error("period {index}: negative incurred loss {value}")]
    NegativeLoss { index: usize, value: f64 },
    #[error("maximum incurred loss must be positive to normalize, got {max}")]
    NonPositiveMax { max: f64 },
    #[error("level {level}: invalid noise parameters mu={mu} sigma={sigma}")]
    BadNoiseParams { level: usize, mu: f64, sigma: f64 },
}

/// Action index outside the 7-way discrete action space.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
#[error("action index {action} outside the discrete range 0..={max}")]
pub struct InvalidActionError {
    pub action: usize,
    pub max: usize,
}

/// Metric reduction requested over a rollout with no records.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
#[error("cannot compute risk metrics over an empty rollout")]
pub struct EmptyRolloutError;
