//! Difficulty schedule for the synthetic market-signal feature.
//!
//! Levels are contiguous and 0-based; each maps to the normal-distribution
//! parameters used for the per-observation market-signal draw. Level
//! advancement is driven from outside the simulator.

use rand::Rng;
use rand_distr::{Distribution, Normal};
use serde::Serialize;

use crate::error::ConfigError;

/// Normal-distribution parameters for one level's market signal.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct NoiseParams {
    pub mu: f64,
    pub sigma: f64,
}

impl NoiseParams {
    /// One market-signal draw. A zero sigma degenerates to `mu` exactly.
    pub fn sample(&self, rng: &mut impl Rng) -> f64 {
        Normal::new(self.mu, self.sigma)
            .expect("noise parameters validated at schedule construction")
            .sample(rng)
    }
}

/// Mapping from difficulty level to market-signal noise parameters.
/// Immutable for the lifetime of any simulator sharing it.
#[derive(Debug, Clone, PartialEq)]
pub struct CurriculumSchedule {
    levels: Vec<NoiseParams>,
}

impl CurriculumSchedule {
    /// Validates every level's parameters: finite `mu`, finite `sigma >= 0`.
    /// An empty schedule is accepted here and rejected at simulator
    /// construction, which requires level 0.
    pub fn new(levels: Vec<NoiseParams>) -> Result<Self, ConfigError> {
        for (level, p) in levels.iter().enumerate() {
            if !p.mu.is_finite() || !p.sigma.is_finite() || p.sigma < 0.0 {
                return Err(ConfigError::BadNoiseParams { level, mu: p.mu, sigma: p.sigma });
            }
        }
        Ok(Self { levels })
    }

    /// Reference training schedule: rising shock mean, widening dispersion.
    pub fn standard() -> Self {
        Self {
            levels: vec![
                NoiseParams { mu: 1.0, sigma: 0.1 },
                NoiseParams { mu: 1.2, sigma: 0.2 },
                NoiseParams { mu: 1.5, sigma: 0.3 },
                NoiseParams { mu: 1.8, sigma: 0.4 },
            ],
        }
    }

    /// Single-level schedule emitting `shock` deterministically (zero sigma),
    /// the shape stress-evaluation harnesses pin the market signal with.
    pub fn fixed_shock(shock: f64) -> Result<Self, ConfigError> {
        Self::new(vec![NoiseParams { mu: shock, sigma: 0.0 }])
    }

    pub fn params(&self, level: usize) -> Option<&NoiseParams> {
        self.levels.get(level)
    }

    pub fn len(&self) -> usize {
        self.levels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.levels.is_empty()
    }

    pub fn max_level(&self) -> Option<usize> {
        self.levels.len().checked_sub(1)
    }
}
