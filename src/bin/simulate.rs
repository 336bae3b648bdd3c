//! Simulation Tool - virtual subjects trained in parallel
//!
//! Runs complete sessions against simulated subjects on a manual clock, so a
//! day of training finishes in seconds. Useful for checking level ladders
//! and bias correction before they reach a rig.
//!
//! Usage:
//!   cargo run --bin simulate -- --subjects 8 --trials 400
//!   cargo run --bin simulate -- --accuracy 0.9 --data sim/sim.sqlite
//!   cargo run --bin simulate -- --config config/rig.toml --out sim/results.json

use rayon::prelude::*;
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};

use trialrig::logging::{init_logging, verbose_from_args};
use trialrig::session::new_session_id;
use trialrig::settings::config_path_from_args;
use trialrig::{
    Clock, ManualClock, MemoryStore, RigConfig, RigResult, Session, SessionControl, SessionSummary,
    SimulatedRig, SubjectModel,
};

/// Simulated control loop tick (s)
const SIM_TICK: f64 = 0.005;

/// Simulation settings
struct SimSettings {
    subjects: usize,
    trials: usize,
    /// Fixed accuracy for every subject (None = spread 0.6..0.95)
    accuracy: Option<f64>,
    threads: usize,
    seed: u64,
    /// Shared SQLite file (None = in-memory stores)
    data: Option<String>,
    out: Option<String>,
}

impl SimSettings {
    fn from_args(args: &[String]) -> Self {
        let mut s = Self {
            subjects: 8,
            trials: 300,
            accuracy: None,
            threads: 0,
            seed: 1,
            data: None,
            out: None,
        };
        let mut i = 1;
        while i < args.len() {
            let val = args.get(i + 1);
            match args[i].as_str() {
                "--subjects" => s.subjects = val.and_then(|v| v.parse().ok()).unwrap_or(s.subjects),
                "--trials" | "-n" => s.trials = val.and_then(|v| v.parse().ok()).unwrap_or(s.trials),
                "--accuracy" => s.accuracy = val.and_then(|v| v.parse().ok()),
                "--threads" => s.threads = val.and_then(|v| v.parse().ok()).unwrap_or(0),
                "--seed" => s.seed = val.and_then(|v| v.parse().ok()).unwrap_or(s.seed),
                "--data" | "-d" => s.data = val.cloned(),
                "--out" | "-o" => s.out = val.cloned(),
                "--config" | "-c" => {}
                _ => {
                    i += 1;
                    continue;
                }
            }
            i += 2;
        }
        s
    }

    fn model(&self, index: usize) -> SubjectModel {
        let accuracy = self.accuracy.unwrap_or_else(|| {
            let span = (self.subjects.max(2) - 1) as f64;
            0.6 + 0.35 * index as f64 / span
        });
        SubjectModel {
            accuracy: accuracy.clamp(0.0, 1.0),
            ..SubjectModel::default()
        }
    }
}

/// One virtual subject's session
struct SubjectRun {
    index: usize,
    seed: u64,
    model: SubjectModel,
}

fn run_subject(base: &RigConfig, settings: &SimSettings, run: &SubjectRun) -> RigResult<SessionSummary> {
    let mut config = base.clone();
    config.session.subject = format!("sim{:02}", run.index);
    config.session.subject_id = 1000 + run.index as i64;
    config.session.seed = Some(run.seed);
    config.session.max_trials = Some(settings.trials);
    config.session.tick_interval = SIM_TICK;

    let clock: Arc<dyn Clock> = Arc::new(ManualClock::new());
    let rig = SimulatedRig::with_subject(Arc::clone(&clock), run.model, run.seed);
    let control = SessionControl::new();

    let session = match &settings.data {
        Some(path) => {
            config.session.data_file = path.clone();
            Session::open_sqlite(config, rig, clock, control)?
        }
        None => Session::new(new_session_id(), config, rig, Box::new(MemoryStore::new()), clock, control)?,
    };
    session.run()
}

/// Initialize the global rayon pool. 0 keeps rayon's default.
fn init_parallel(threads: usize) {
    if threads > 0
        && let Err(e) = rayon::ThreadPoolBuilder::new().num_threads(threads).build_global()
    {
        warn!("Failed to size thread pool: {}", e);
    }
}

fn print_results(runs: &[SubjectRun], results: &[RigResult<SessionSummary>]) {
    println!("\n{:<8} {:>8} {:>8} {:>9} {:>8} {:>8}", "subject", "accuracy", "trials", "correct", "rewards", "level");
    println!("{}", "-".repeat(56));
    for (run, result) in runs.iter().zip(results) {
        match result {
            Ok(s) => println!(
                "{:<8} {:>8.2} {:>8} {:>8.1}% {:>8} {:>4} -> {}",
                s.subject,
                run.model.accuracy,
                s.trials,
                s.percent_correct.unwrap_or(0.0) * 100.0,
                s.rewards,
                s.start_level,
                s.final_level
            ),
            Err(e) => println!("sim{:02}    FAILED: {}", run.index, e),
        }
    }
}

fn main() {
    let args: Vec<String> = std::env::args().collect();
    init_logging(verbose_from_args(&args));
    let settings = SimSettings::from_args(&args);

    let mut config = match RigConfig::load(config_path_from_args(&args).map(Path::new)) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load config: {}", e);
            std::process::exit(1);
        }
    };
    config.apply_cli_overrides(&args);
    // Per-subject values are set in run_subject
    config.session.max_trials = Some(settings.trials);

    init_parallel(settings.threads);
    let runs: Vec<SubjectRun> = (0..settings.subjects)
        .map(|index| SubjectRun {
            index,
            seed: settings.seed.wrapping_mul(1_000_003).wrapping_add(index as u64),
            model: settings.model(index),
        })
        .collect();
    info!("Simulating {} subjects x {} trials", runs.len(), settings.trials);

    let results: Vec<RigResult<SessionSummary>> =
        runs.par_iter().map(|run| run_subject(&config, &settings, run)).collect();
    print_results(&runs, &results);

    if let Some(out) = &settings.out {
        let summaries: Vec<&SessionSummary> = results.iter().filter_map(|r| r.as_ref().ok()).collect();
        let written = serde_json::to_string_pretty(&summaries)
            .map_err(|e| e.to_string())
            .and_then(|json| std::fs::write(out, json).map_err(|e| e.to_string()));
        match written {
            Ok(()) => println!("\nResults written to {}", out),
            Err(e) => eprintln!("Failed to write {}: {}", out, e),
        }
    }

    if results.iter().any(|r| r.is_err()) {
        std::process::exit(1);
    }
}
