//! Default rig constants
//!
//! Session-independent defaults. Everything here can be overridden from the
//! rig config file.

// =============================================================================
// TRIAL GENERATION
// =============================================================================

pub const DEFAULT_RATE_SUM: f64 = 2.5; // Combined left+right stimulus rate (Hz)
pub const DEFAULT_MIN_ISI: f64 = 0.200; // Minimum same-side inter-stimulus interval (s)
pub const DEFAULT_STIM_PHASE_PAD: (f64, f64) = (0.0, 0.050); // Lead/tail padding of STIM (s)
pub const MAX_TRAIN_RESAMPLES: usize = 10_000; // Equal-count resample budget before giving up
pub const ISI_CHECK_DECIMALS: i32 = 4; // Gap check rounds to 1e-4 s

// =============================================================================
// ANTI-BIAS
// =============================================================================

pub const DEFAULT_CORRECTION_WINDOW: usize = 6; // Valid trials per side used for bias estimate
pub const DEFAULT_MAX_BIAS_CORRECTION: f64 = 0.2; // Weaker-side weight never drops below this
pub const DEFAULT_MIN_BIAS_FOR_CORRECTION: f64 = 0.6; // Stronger-side weight needed to correct
pub const DEFAULT_REWARD_SCALING_THRESHOLD: f64 = 0.3;
pub const DEFAULT_ANTIBIAS_REWARD_SCALES: [f64; 3] = [1.0, 1.2, 1.4];
pub const DEFAULT_NUDGE_THRESHOLD: f64 = 0.3;
pub const DEFAULT_NUDGE_TRIALS: usize = 5; // Consecutive biased trials before a nudge
pub const DEFAULT_NUDGE_MAX: i32 = 8; // Net nudges saturate below this magnitude

// =============================================================================
// HISTORY
// =============================================================================

pub const HISTORY_WINDOW: usize = 15;
pub const INVALID_STREAK_ALERT: usize = 6;

// =============================================================================
// PHASE TIMING (seconds)
// =============================================================================

pub const DEFAULT_INTRO_DURATION: f64 = 1.0;
pub const DEFAULT_LICK_DURATION: f64 = 5.0;
pub const DEFAULT_REWARD_DURATION: f64 = 3.0;
pub const DEFAULT_ITI_DURATION: f64 = 3.5;
pub const DEFAULT_PENALTY_ITI_FRAC: f64 = 1.7;
pub const DEFAULT_HINT_INTERVAL: (f64, f64) = (0.400, 0.001); // Mean, sd
pub const DEFAULT_TICK_INTERVAL: f64 = 0.001;

// =============================================================================
// VALVES (seconds open)
// =============================================================================

pub const DEFAULT_STIM_VALVE_DURATION: f64 = 0.015;
pub const DEFAULT_REWARD_VALVE_DURATION: [f64; 2] = [0.071, 0.072];

// =============================================================================
// LOGGER
// =============================================================================

pub const DEFAULT_FLUSH_THRESHOLD: usize = 30;
pub const ANALOG_FORCED_FLUSH: usize = 5;
pub const DEFAULT_SENSOR_RATE_HZ: f64 = 40.0;

// =============================================================================
// FILES
// =============================================================================

pub const DEFAULT_DATA_FILE: &str = "data/data.sqlite";
pub const DEFAULT_DUMP_DIR: &str = "crashdumps";
pub const CONFIG_FILE: &str = "config/rig.toml";
pub const CONFIG_TEMPLATE_FILE: &str = "config/rig.template.toml";
