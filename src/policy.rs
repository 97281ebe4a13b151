//! Baseline action sources for evaluation drivers. Learning agents live
//! outside this crate; these give the drivers deterministic and stochastic
//! probes of the simulator.

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha20Rng;

use crate::simulator::{ACTION_COUNT, MAX_ADJUSTMENT, NEUTRAL_ACTION, Observation, action_delta};

/// Action source driving one episode.
pub trait Policy {
    fn act(&mut self, observation: &Observation) -> usize;
}

/// Keeps the reserve where it is.
pub struct Hold;

impl Policy for Hold {
    fn act(&mut self, _observation: &Observation) -> usize {
        NEUTRAL_ACTION
    }
}

/// Chooses the action whose adjustment moves the reserve closest to the
/// observed loss.
pub struct TrackLoss;

impl Policy for TrackLoss {
    fn act(&mut self, observation: &Observation) -> usize {
        let target = if observation.reserve > 0.0 {
            observation.loss / observation.reserve - 1.0
        } else {
            MAX_ADJUSTMENT
        };
        (0..ACTION_COUNT)
            .min_by(|&a, &b| {
                let da = (action_delta(a) - target).abs();
                let db = (action_delta(b) - target).abs();
                da.total_cmp(&db)
            })
            .unwrap_or(NEUTRAL_ACTION)
    }
}

/// Uniformly random valid action from an owned seeded generator.
pub struct Uniform {
    rng: ChaCha20Rng,
}

impl Uniform {
    pub fn seeded(seed: u64) -> Self {
        Self { rng: ChaCha20Rng::seed_from_u64(seed) }
    }
}

impl Policy for Uniform {
    fn act(&mut self, _observation: &Observation) -> usize {
        self.rng.random_range(0..ACTION_COUNT)
    }
}

/// Named policy selection for driver flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PolicyKind {
    Hold,
    TrackLoss,
    Uniform,
}

impl PolicyKind {
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "hold" => Some(Self::Hold),
            "track" => Some(Self::TrackLoss),
            "uniform" => Some(Self::Uniform),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Hold => "hold",
            Self::TrackLoss => "track",
            Self::Uniform => "uniform",
        }
    }

    /// Build a fresh policy instance; `seed` matters only to stochastic kinds.
    pub fn build(self, seed: u64) -> Box<dyn Policy> {
        match self {
            Self::Hold => Box::new(Hold),
            Self::TrackLoss => Box::new(TrackLoss),
            Self::Uniform => Box::new(Uniform::seeded(seed)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn obs(reserve: f64, loss: f64) -> Observation {
        Observation { reserve, loss, ..Observation::zeroed() }
    }

    #[test]
    fn hold_always_picks_the_neutral_action() {
        let mut p = Hold;
        assert_eq!(p.act(&obs(0.2, 1.9)), NEUTRAL_ACTION);
        assert_eq!(p.act(&obs(1.9, 0.2)), NEUTRAL_ACTION);
    }

    #[test]
    fn track_loss_raises_toward_a_higher_loss() {
        let mut p = TrackLoss;
        // target change +100%, far beyond the range: strongest raise
        assert_eq!(p.act(&obs(0.5, 1.0)), ACTION_COUNT - 1);
    }

    #[test]
    fn track_loss_cuts_toward_a_lower_loss() {
        let mut p = TrackLoss;
        // target change -50%: strongest cut
        assert_eq!(p.act(&obs(1.0, 0.5)), 0);
    }

    #[test]
    fn track_loss_holds_when_calibrated() {
        let mut p = TrackLoss;
        assert_eq!(p.act(&obs(0.7, 0.7)), NEUTRAL_ACTION);
    }

    #[test]
    fn track_loss_picks_the_nearest_intermediate_action() {
        let mut p = TrackLoss;
        // target change +3.2%: nearest delta is +0.0333 (action 4)
        assert_eq!(p.act(&obs(1.0, 1.032)), 4);
    }

    #[test]
    fn track_loss_raises_from_a_depleted_reserve() {
        let mut p = TrackLoss;
        assert_eq!(p.act(&obs(0.0, 0.5)), ACTION_COUNT - 1);
    }

    #[test]
    fn uniform_stays_in_range_and_reproduces_per_seed() {
        let mut a = Uniform::seeded(17);
        let mut b = Uniform::seeded(17);
        let o = obs(1.0, 1.0);
        for _ in 0..100 {
            let action = a.act(&o);
            assert!(action < ACTION_COUNT);
            assert_eq!(action, b.act(&o));
        }
    }

    #[test]
    fn kind_parsing_round_trips() {
        for kind in [PolicyKind::Hold, PolicyKind::TrackLoss, PolicyKind::Uniform] {
            assert_eq!(PolicyKind::parse(kind.name()), Some(kind));
        }
        assert_eq!(PolicyKind::parse("ppo"), None);
    }
}
