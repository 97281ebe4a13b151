use std::fs::File;
use std::io::{BufWriter, Write};
use std::process::exit;
use std::sync::Arc;

use log::info;
use rand::SeedableRng;
use rand_chacha::ChaCha20Rng;
use rayon::prelude::*;
use serde::Serialize;

use resim::curriculum::CurriculumSchedule;
use resim::metrics::{MetricDist, MetricsSummary, RiskMetrics, compute_metrics, summarize};
use resim::policy::PolicyKind;
use resim::rollout::{EpisodeError, EpisodeOutcome, run_episode};
use resim::series::LossSeries;
use resim::simulator::Simulator;

// keeps policy streams disjoint from simulator streams built off the same seed
const POLICY_SEED_SALT: u64 = 0x9E37_79B9_7F4A_7C15;

struct EpisodeRun {
    level: usize,
    episode: usize,
    seed: u64,
    outcome: EpisodeOutcome,
    metrics: RiskMetrics,
}

#[derive(Serialize)]
struct EpisodeRow<'a> {
    level: usize,
    episode: usize,
    seed: u64,
    policy: &'a str,
    steps: usize,
    total_reward: f64,
    reserve_adequacy: f64,
    cvar_95: f64,
    calibration_efficiency: f64,
    violation_rate: f64,
}

#[derive(Serialize)]
struct TraceRow {
    level: usize,
    episode: usize,
    seed: u64,
    step: usize,
    action: usize,
    reward: f64,
    reserve: f64,
    loss: f64,
    volatility: f64,
    shortfall: f64,
    cvar: f64,
    violation: bool,
}

fn main() {
    env_logger::init();

    let args: Vec<String> = std::env::args().collect();

    let mut episodes: usize = 32;
    let mut seed: u64 = 42;
    let mut periods: usize = 200;
    let mut buffer_size: usize = Simulator::DEFAULT_BUFFER_SIZE;
    let mut policy_kind = PolicyKind::TrackLoss;
    let mut level: usize = 0;
    let mut sweep_levels = false;
    let mut rollout_out: Option<String> = None;
    let mut metrics_out: Option<String> = None;
    let mut quiet = false;

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
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
            "--level" => {
                i += 1;
                level = args[i].parse().expect("--level requires an integer");
            }
            "--sweep-levels" => sweep_levels = true,
            "--rollout-out" => {
                i += 1;
                rollout_out = Some(args[i].clone());
            }
            "--metrics-out" => {
                i += 1;
                metrics_out = Some(args[i].clone());
            }
            "--quiet" => quiet = true,
            "--help" | "-h" => {
                usage();
                return;
            }
            other => {
                eprintln!("error: unknown argument '{other}'");
                usage();
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

    let curriculum = Arc::new(CurriculumSchedule::standard());
    let max_level = curriculum.max_level().unwrap_or(0);
    if level > max_level {
        eprintln!("error: --level {level} beyond the schedule (max {max_level})");
        exit(2);
    }
    let levels: Vec<usize> = if sweep_levels { (0..=max_level).collect() } else { vec![level] };

    let mut series_rng = ChaCha20Rng::seed_from_u64(seed);
    let series = match LossSeries::synthetic(periods, &mut series_rng) {
        Ok(s) => Arc::new(s),
        Err(e) => {
            eprintln!("error: {e}");
            exit(1);
        }
    };

    info!(
        "running {} episode(s) x {} level(s) over {} synthetic periods, policy {}",
        episodes,
        levels.len(),
        series.len(),
        policy_kind.name()
    );

    let mut runs: Vec<EpisodeRun> = Vec::new();
    for &lvl in &levels {
        let level_runs: Result<Vec<EpisodeRun>, EpisodeError> = (0..episodes)
            .into_par_iter()
            .map(|episode| {
                let episode_seed = seed.wrapping_add(episode as u64);
                let mut sim =
                    Simulator::new(Arc::clone(&series), Arc::clone(&curriculum), buffer_size)?
                        .with_seed(episode_seed);
                let mut policy = policy_kind.build(episode_seed ^ POLICY_SEED_SALT);
                let outcome = run_episode(&mut sim, policy.as_mut(), lvl)?;
                let metrics = compute_metrics(&outcome.rollout())
                    .expect("an episode of at least one step yields a non-empty rollout");
                Ok(EpisodeRun { level: lvl, episode, seed: episode_seed, outcome, metrics })
            })
            .collect();
        match level_runs {
            Ok(mut r) => runs.append(&mut r),
            Err(e) => {
                eprintln!("error: episode failed at level {lvl}: {e}");
                exit(1);
            }
        }
    }

    if let Some(ref path) = metrics_out {
        let rows = runs.iter().map(|r| EpisodeRow {
            level: r.level,
            episode: r.episode,
            seed: r.seed,
            policy: policy_kind.name(),
            steps: r.outcome.steps(),
            total_reward: r.outcome.total_reward,
            reserve_adequacy: r.metrics.reserve_adequacy,
            cvar_95: r.metrics.cvar_95,
            calibration_efficiency: r.metrics.calibration_efficiency,
            violation_rate: r.metrics.violation_rate,
        });
        if let Err(e) = write_ndjson(path, rows) {
            eprintln!("error: failed to write {path}: {e}");
            exit(1);
        }
        info!("wrote {} episode rows to {path}", runs.len());
    }

    if let Some(ref path) = rollout_out {
        let rows = runs.iter().flat_map(|r| {
            r.outcome.trace.iter().map(move |s| TraceRow {
                level: r.level,
                episode: r.episode,
                seed: r.seed,
                step: s.step,
                action: s.action,
                reward: s.reward,
                reserve: s.reserve,
                loss: s.loss,
                volatility: s.volatility,
                shortfall: s.shortfall,
                cvar: s.cvar,
                violation: s.violation,
            })
        });
        if let Err(e) = write_ndjson(path, rows) {
            eprintln!("error: failed to write {path}: {e}");
            exit(1);
        }
        info!("wrote step traces to {path}");
    }

    if quiet {
        return;
    }

    print_level_table(&levels, &runs, policy_kind.name());

    if episodes < 2 {
        eprintln!("Warning: distribution tables require >= 2 episodes");
        return;
    }
    for &lvl in &levels {
        let batch: Vec<RiskMetrics> =
            runs.iter().filter(|r| r.level == lvl).map(|r| r.metrics).collect();
        if let Some(summary) = summarize(&batch) {
            print_distribution(lvl, &summary);
        }
    }
}

fn usage() {
    eprintln!("Usage: resim [--episodes N] [--seed S] [--periods N] [--buffer-size N]");
    eprintln!("             [--policy hold|track|uniform] [--level L | --sweep-levels]");
    eprintln!("             [--rollout-out PATH] [--metrics-out PATH] [--quiet]");
}

fn write_ndjson<T: Serialize>(path: &str, rows: impl Iterator<Item = T>) -> std::io::Result<()> {
    let file = File::create(path)?;
    let mut writer = BufWriter::new(file);
    for row in rows {
        serde_json::to_writer(&mut writer, &row)?;
        writeln!(writer)?;
    }
    writer.flush()
}

fn print_level_table(levels: &[usize], runs: &[EpisodeRun], policy: &str) {
    println!("\n=== Episode scores (policy: {policy}) ===");
    println!(
        "{:>5} | {:>8} | {:>8} | {:>10} | {:>8} | {:>8} | {:>8} | {:>6}",
        "Level", "Episodes", "AvgSteps", "AvgReward", "RAR", "CVaR95", "CES", "RVR"
    );
    println!("{}", "-".repeat(5 + 3 + 8 + 3 + 8 + 3 + 10 + 3 + 8 + 3 + 8 + 3 + 8 + 3 + 6));
    for &lvl in levels {
        let group: Vec<&EpisodeRun> = runs.iter().filter(|r| r.level == lvl).collect();
        if group.is_empty() {
            continue;
        }
        let n = group.len() as f64;
        let avg_steps = group.iter().map(|r| r.outcome.steps()).sum::<usize>() as f64 / n;
        let avg_reward = group.iter().map(|r| r.outcome.total_reward).sum::<f64>() / n;
        let avg = |f: fn(&RiskMetrics) -> f64| -> f64 {
            group.iter().map(|r| f(&r.metrics)).sum::<f64>() / n
        };
        println!(
            "{:>5} | {:>8} | {:>8.1} | {:>10.3} | {:>8.4} | {:>8.4} | {:>8.4} | {:>6.3}",
            lvl,
            group.len(),
            avg_steps,
            avg_reward,
            avg(|m| m.reserve_adequacy),
            avg(|m| m.cvar_95),
            avg(|m| m.calibration_efficiency),
            avg(|m| m.violation_rate),
        );
    }
}

fn print_distribution(level: usize, summary: &MetricsSummary) {
    println!("\n=== Metric distribution, level {level} (N={} episodes) ===", summary.episodes);
    println!(
        "{:>6} | {:>8} | {:>8} | {:>8} | {:>8} | {:>8} | {:>8}",
        "Metric", "min", "p25", "p50", "p75", "max", "mean"
    );
    println!("{}", "-".repeat(6 + 3 + 8 + 3 + 8 + 3 + 8 + 3 + 8 + 3 + 8 + 3 + 8));
    let line = |name: &str, d: &MetricDist| {
        println!(
            "{:>6} | {:>8.4} | {:>8.4} | {:>8.4} | {:>8.4} | {:>8.4} | {:>8.4}",
            name, d.min, d.p25, d.p50, d.p75, d.max, d.mean
        );
    };
    line("RAR", &summary.reserve_adequacy);
    line("CVaR95", &summary.cvar_95);
    line("CES", &summary.calibration_efficiency);
    line("RVR", &summary.violation_rate);
}
