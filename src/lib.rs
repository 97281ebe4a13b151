//! Loss-reserving simulator: a discrete-action reserve environment over an
//! incurred-loss series, plus the tail-risk metrics used to score rollouts.

pub mod curriculum;
pub mod error;
pub mod metrics;
pub mod policy;
pub mod rollout;
pub mod series;
pub mod simulator;
pub mod stats;
