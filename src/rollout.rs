//! Episode execution for evaluation drivers: reset, step to termination,
//! record the rollout.

use serde::Serialize;
use thiserror::Error;

use crate::error::{ConfigError, InvalidActionError};
use crate::metrics::RolloutRecord;
use crate::policy::Policy;
use crate::simulator::Simulator;

/// Episode-level failure: a bad level selection or a policy emitting an
/// out-of-range action.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum EpisodeError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Action(#[from] InvalidActionError),
}

/// One step of an episode trace, sized for NDJSON artifact rows.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct StepTrace {
    pub step: usize,
    pub action: usize,
    pub reward: f64,
    pub reserve: f64,
    pub loss: f64,
    pub volatility: f64,
    pub shortfall: f64,
    pub cvar: f64,
    pub violation: bool,
}

/// Completed episode: per-step trace and the reward total.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EpisodeOutcome {
    pub trace: Vec<StepTrace>,
    pub total_reward: f64,
}

impl EpisodeOutcome {
    /// Rollout records for the metric engine.
    pub fn rollout(&self) -> Vec<RolloutRecord> {
        self.trace
            .iter()
            .map(|s| RolloutRecord { reserve: s.reserve, loss: s.loss, violation: s.violation })
            .collect()
    }

    pub fn steps(&self) -> usize {
        self.trace.len()
    }
}

/// Reset the simulator, pin the curriculum level, then step with `policy`
/// until termination.
///
/// Records mirror the evaluation contract: each trace row carries the
/// post-step reserve, the loss of the period the action covered, and that
/// period's violation flag. Resetting wipes the level, so the level is
/// re-applied here and the first observation drawn after it.
pub fn run_episode(
    sim: &mut Simulator,
    policy: &mut dyn Policy,
    level: usize,
) -> Result<EpisodeOutcome, EpisodeError> {
    sim.reset();
    sim.set_level(level)?;
    let mut observation = sim.observe();

    let mut trace = Vec::new();
    let mut total_reward = 0.0;
    loop {
        let action = policy.act(&observation);
        let step = sim.step(action)?;
        total_reward += step.reward;
        trace.push(StepTrace {
            step: trace.len(),
            action,
            reward: step.reward,
            reserve: step.info.reserve,
            loss: step.info.loss,
            volatility: step.info.volatility,
            shortfall: step.info.shortfall,
            cvar: step.info.cvar,
            violation: step.info.violation,
        });
        if step.done {
            break;
        }
        observation = step.observation;
    }
    Ok(EpisodeOutcome { trace, total_reward })
}
