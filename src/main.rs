//! Trialrig - session runner
//!
//! Runs one behavioral session against the simulated rig in real time.
//! Vendor drivers implement [`trialrig::Hardware`] out of tree and plug into
//! the same [`Session`].
//!
//! Usage:
//!   cargo run -- --subject m12 --subject-id 12 --trials 50
//!   cargo run -- --config config/rig.toml --level 3 --go-cue both
//!
//! Operator input on stdin: `p` pause, `u` unpause, `k` kill after the
//! current trial finishes its ITI.

use std::io::BufRead;
use std::path::Path;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{error, info, warn};

use trialrig::logging::{init_logging, verbose_from_args};
use trialrig::settings::config_path_from_args;
use trialrig::{
    Clock, RigConfig, RigResult, Session, SessionControl, SessionSummary, SimulatedRig, SubjectModel,
    SystemClock,
};

fn print_usage() {
    println!("Usage: trialrig [OPTIONS]");
    println!();
    println!("  -c, --config <path>       Rig config TOML (default: config/rig.toml)");
    println!("  -s, --subject <name>      Subject name");
    println!("      --subject-id <n>      Subject id used for stored history");
    println!("      --condition <name>    Condition label stored with each trial");
    println!("  -m, --manipulation <set>  none | opto_stim_lick_rew | opto_stim");
    println!("  -l, --level <n>           Destination level (default: resume)");
    println!("  -n, --trials <n>          Stop after n trials");
    println!("  -d, --data <path>         SQLite data file");
    println!("      --seed <n>            RNG seed");
    println!("      --go-cue <kind>       none | light | sound | both");
    println!("      --no-bias-correction  Draw sides uniformly");
    println!("      --no-rewards          Never open the reward valve");
    println!("      --accuracy <p>        Simulated subject accuracy");
    println!("  -v, --verbose             Debug logging");
}

/// Simulated subject overrides from the command line.
fn subject_model_from_args(args: &[String]) -> SubjectModel {
    let mut model = SubjectModel::default();
    if let Some(p) = args
        .iter()
        .position(|a| a == "--accuracy")
        .and_then(|i| args.get(i + 1))
        .and_then(|s| s.parse::<f64>().ok())
    {
        model.accuracy = p.clamp(0.0, 1.0);
    }
    model
}

/// Read operator commands from stdin on a detached thread.
fn spawn_operator_input(control: SessionControl) {
    let spawned = std::thread::Builder::new()
        .name("operator-input".to_string())
        .spawn(move || {
            let stdin = std::io::stdin();
            for line in stdin.lock().lines() {
                let Ok(line) = line else {
                    break;
                };
                match line.trim() {
                    "p" => {
                        control.pause();
                        info!("Paused (depth {})", control.pause_depth());
                    }
                    "u" => {
                        control.unpause();
                        info!("Unpaused (depth {})", control.pause_depth());
                    }
                    "k" | "q" => {
                        control.kill();
                        info!("Kill requested");
                        break;
                    }
                    "" => {}
                    other => warn!("Unknown command '{}' (p, u, k)", other),
                }
            }
        });
    if let Err(e) = spawned {
        warn!("Operator input unavailable: {}", e);
    }
}

fn run(args: &[String]) -> RigResult<SessionSummary> {
    let mut config = RigConfig::load(config_path_from_args(args).map(Path::new))?;
    config.apply_cli_overrides(args);

    let clock: Arc<dyn Clock> = Arc::new(SystemClock::new());
    let seed = config.session.seed.unwrap_or_else(rand::random);
    let rig = SimulatedRig::with_subject(Arc::clone(&clock), subject_model_from_args(args), seed);
    let control = SessionControl::new();
    spawn_operator_input(control.clone());

    let session = Session::open_sqlite(config, rig.clone(), clock, control)?
        .with_sensor_source(Box::new(rig.sensor_source()))?;
    info!("Session {} starting", session.id());
    session.run()
}

fn main() -> ExitCode {
    let args: Vec<String> = std::env::args().collect();
    if args.iter().any(|a| a == "--help" || a == "-h") {
        print_usage();
        return ExitCode::SUCCESS;
    }
    init_logging(verbose_from_args(&args));

    match run(&args) {
        Ok(summary) => {
            summary.print();
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("Session failed: {}", e);
            ExitCode::FAILURE
        }
    }
}
