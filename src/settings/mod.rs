//! Static rig configuration: rules, manipulations, the level ladder and the
//! TOML-backed rig config that injects them into a session.

mod config;
mod levels;
mod manipulations;
mod rules;

pub use config::{
    EngineSettings, GoCue, LoggerSettings, RigConfig, SessionSettings, TrialParams,
    config_path_from_args,
};
pub use levels::{
    Criteria, DEFAULT_RATIO, DurationChoice, FINAL_RATIOS, HARD_RATIOS, INTRO_RATIOS, IntroStep,
    Level, LevelTable, RatioSpec, default_delay_phase_duration, default_stim_phase_duration,
};
pub use manipulations::{Manipulation, ManipulationSpec};
pub use rules::{Rule, RuleId};
