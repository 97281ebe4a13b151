//! Stress evaluation: replays a baseline policy against pinned market shocks.
//!
//! Each `--shocks` entry becomes a single-level schedule whose market signal
//! is the shock itself with no noise, so every episode at that shock sees an
//! identical signal stream. Prints one score row per shock magnitude.

use std::process::exit;
use std::sync::Arc;

use log::info;
use rand::SeedableRng;
use rand_chacha::ChaCha20Rng;
use rayon::prelude::*;

use resim::curriculum::CurriculumSchedule;
use resim::metrics::{RiskMetrics, compute_metrics};
use resim::policy::PolicyKind;
use resim::rollout::{EpisodeError, run_episode};
use resim::series::LossSeries;
use resim::simulator::Simulator;

const POLICY_SEED_SALT: u64 = 0x9E37_79B9_7F4A_7C15;

struct ShockScore {
    shock: f64,
    episodes: usize,
    avg_reward: f64,
    avg: RiskMetrics,
}

fn main() {
    env_logger::init();

    let args: Vec<String> = std::env::args().collect();

    let mut shocks: Vec<f64> = vec![0.8, 1.0, 1.5, 2.0];
    let mut episodes: usize = 16;
    let mut seed: u64 = 42;
    let mut periods: usize = 200;
    let mut buffer_size: usize = Simulator::DEFAULT_BUFFER_SIZE;
    let mut policy_kind = PolicyKind::TrackLoss;

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--shocks" => {
                i += 1;
                shocks = parse_shocks(&args[i]);
            }
            "--episodes" => {
                i += 1;
                episodes = args[i].parse().expect("--episodes requires a positive integer");
            }
            "--seed" => {
                i += 1;
                seed = args[i].parse().expect("--seed requires a u64");
            }
            "--periods" => {
                i += 1;
                periods = args[i].parse().expect("--periods requires a positive integer");
            }
            "--buffer-size" => {
                i += 1;
                buffer_size = args[i].parse().expect("--buffer-size requires a positive integer");
            }
            "--policy" => {
                i += 1;
                policy_kind = PolicyKind::parse(&args[i]).unwrap_or_else(|| {
                    eprintln!("error: unknown policy '{}' (hold|track|uniform)", args[i]);
                    exit(2);
                });
            }
            "--help" | "-h" => {
                eprintln!(
                    "Usage: shock_eval [--shocks S1,S2,...] [--episodes N] [--seed S]"
                );
                eprintln!("                  [--periods N] [--buffer-size N] [--policy NAME]");
                return;
            }
            other => {
                eprintln!("error: unknown argument '{other}'");
                exit(2);
            }
        }
        i += 1;
    }

    if periods < 2 {
        eprintln!("error: --periods must be at least 2 (one step needs a next period)");
        exit(2);
    }
    if episodes < 1 {
        eprintln!("error: --episodes must be at least 1");
        exit(2);
    }
    if shocks.is_empty() {
        eprintln!("error: --shocks requires at least one magnitude");
        exit(2);
    }

    // ── Shared loss series: every shock replays the same periods ──────────────
    let mut series_rng = ChaCha20Rng::seed_from_u64(seed);
    let series = match LossSeries::synthetic(periods, &mut series_rng) {
        Ok(s) => Arc::new(s),
        Err(e) => {
            eprintln!("error: {e}");
            exit(1);
        }
    };

    info!(
        "evaluating policy {} over {} shock(s), {} episode(s) each",
        policy_kind.name(),
        shocks.len(),
        episodes
    );

    // ── Score each shock magnitude ────────────────────────────────────────────
    let mut scores: Vec<ShockScore> = Vec::new();
    for &shock in &shocks {
        let curriculum = match CurriculumSchedule::fixed_shock(shock) {
            Ok(c) => Arc::new(c),
            Err(e) => {
                eprintln!("error: shock {shock}: {e}");
                exit(2);
            }
        };

        let runs: Result<Vec<(f64, RiskMetrics)>, EpisodeError> = (0..episodes)
            .into_par_iter()
            .map(|episode| {
                let episode_seed = seed.wrapping_add(episode as u64);
                let mut sim =
                    Simulator::new(Arc::clone(&series), Arc::clone(&curriculum), buffer_size)?
                        .with_seed(episode_seed);
                let mut policy = policy_kind.build(episode_seed ^ POLICY_SEED_SALT);
                let outcome = run_episode(&mut sim, policy.as_mut(), 0)?;
                let metrics = compute_metrics(&outcome.rollout())
                    .expect("an episode of at least one step yields a non-empty rollout");
                Ok((outcome.total_reward, metrics))
            })
            .collect();

        let runs = match runs {
            Ok(r) => r,
            Err(e) => {
                eprintln!("error: episode failed at shock {shock}: {e}");
                exit(1);
            }
        };

        let n = runs.len() as f64;
        let avg_reward = runs.iter().map(|(reward, _)| reward).sum::<f64>() / n;
        let avg = |f: fn(&RiskMetrics) -> f64| -> f64 {
            runs.iter().map(|(_, m)| f(m)).sum::<f64>() / n
        };
        scores.push(ShockScore {
            shock,
            episodes: runs.len(),
            avg_reward,
            avg: RiskMetrics {
                reserve_adequacy: avg(|m| m.reserve_adequacy),
                cvar_95: avg(|m| m.cvar_95),
                calibration_efficiency: avg(|m| m.calibration_efficiency),
                violation_rate: avg(|m| m.violation_rate),
            },
        });
    }

    print_shock_table(&scores, policy_kind.name());
}

fn parse_shocks(raw: &str) -> Vec<f64> {
    raw.split(',')
        .map(|part| {
            part.trim().parse::<f64>().unwrap_or_else(|_| {
                eprintln!("error: --shocks entry '{}' is not a number", part.trim());
                exit(2);
            })
        })
        .collect()
}

fn print_shock_table(scores: &[ShockScore], policy: &str) {
    println!("\n=== Shock stress scores (policy: {policy}) ===");
    println!(
        "{:>6} | {:>8} | {:>10} | {:>8} | {:>8} | {:>8} | {:>6}",
        "Shock", "Episodes", "AvgReward", "RAR", "CVaR95", "CES", "RVR"
    );
    println!("{}", "-".repeat(6 + 3 + 8 + 3 + 10 + 3 + 8 + 3 + 8 + 3 + 8 + 3 + 6));
    for s in scores {
        println!(
            "{:>6.2} | {:>8} | {:>10.3} | {:>8.4} | {:>8.4} | {:>8.4} | {:>6.3}",
            s.shock,
            s.episodes,
            s.avg_reward,
            s.avg.reserve_adequacy,
            s.avg.cvar_95,
            s.avg.calibration_efficiency,
            s.avg.violation_rate,
        );
    }
}
