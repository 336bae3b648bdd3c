//! Rig configuration
//!
//! Loads from config/rig.toml (local, gitignored) or falls back to
//! config/rig.template.toml (tracked). CLI args override file settings.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use tracing::{info, warn};

use super::levels::{
    DurationChoice, Level, LevelTable, default_delay_phase_duration, default_stim_phase_duration,
};
use super::manipulations::ManipulationSpec;
use crate::constants::*;
use crate::error::{RigError, RigResult};

/// Which cue marks the start of the response window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GoCue {
    #[default]
    None,
    Light,
    Sound,
    Both,
}

impl GoCue {
    pub fn light(self) -> bool {
        matches!(self, GoCue::Light | GoCue::Both)
    }

    pub fn sound(self) -> bool {
        matches!(self, GoCue::Sound | GoCue::Both)
    }
}

/// Who is being trained and where data goes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionSettings {
    pub subject: String,
    pub subject_id: i64,
    pub condition: Option<String>,
    /// Manipulation preset applied to levels that leave it open
    pub manipulation: String,
    pub data_file: String,
    pub dump_dir: String,
    /// Control loop tick (seconds)
    pub tick_interval: f64,
    /// RNG seed (null = random)
    pub seed: Option<u64>,
    /// Stop after this many trials (null = until killed)
    pub max_trials: Option<usize>,
    /// Directory whose sources go into the code snapshot
    pub code_root: Option<String>,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            subject: "test".to_string(),
            subject_id: 0,
            condition: None,
            manipulation: "none".to_string(),
            data_file: DEFAULT_DATA_FILE.to_string(),
            dump_dir: DEFAULT_DUMP_DIR.to_string(),
            tick_interval: DEFAULT_TICK_INTERVAL,
            seed: None,
            max_trials: None,
            code_root: None,
        }
    }
}

/// Trial generation and adaptive training parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrialParams {
    pub rate_sum: f64,
    pub min_isi: f64,
    /// (lead, tail) padding of the STIM phase
    pub stim_phase_pad: (f64, f64),
    pub stim_phase_duration: DurationChoice,
    pub delay_phase_duration: DurationChoice,
    /// Explicit destination level (null = resume from stored trials)
    pub start_level: Option<usize>,
    pub alternate_training_levels: bool,
    pub bias_correction: bool,
    pub correction_window: usize,
    pub max_bias_correction: f64,
    pub min_bias_for_correction: f64,
    pub reward_scaling_threshold: f64,
    pub antibias_reward_scales: Vec<f64>,
    pub nudge_threshold: f64,
    pub nudge_trials: usize,
    pub nudge_max: i32,
}

impl Default for TrialParams {
    fn default() -> Self {
        Self {
            rate_sum: DEFAULT_RATE_SUM,
            min_isi: DEFAULT_MIN_ISI,
            stim_phase_pad: DEFAULT_STIM_PHASE_PAD,
            stim_phase_duration: default_stim_phase_duration(),
            delay_phase_duration: default_delay_phase_duration(),
            start_level: None,
            alternate_training_levels: true,
            bias_correction: true,
            correction_window: DEFAULT_CORRECTION_WINDOW,
            max_bias_correction: DEFAULT_MAX_BIAS_CORRECTION,
            min_bias_for_correction: DEFAULT_MIN_BIAS_FOR_CORRECTION,
            reward_scaling_threshold: DEFAULT_REWARD_SCALING_THRESHOLD,
            antibias_reward_scales: DEFAULT_ANTIBIAS_REWARD_SCALES.to_vec(),
            nudge_threshold: DEFAULT_NUDGE_THRESHOLD,
            nudge_trials: DEFAULT_NUDGE_TRIALS,
            nudge_max: DEFAULT_NUDGE_MAX,
        }
    }
}

/// Phase engine timing, rule switches and hardware cue options.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineSettings {
    pub intro_duration: f64,
    pub lick_duration: f64,
    pub reward_duration: f64,
    pub iti_duration: f64,
    /// Extra ITI fraction when the trial was not rewarded
    pub penalty_iti_frac: f64,
    /// Holding both ports pauses the session
    pub hold_rule: bool,
    /// Reward the commanded side (false = reward whichever side is licked)
    pub use_trials: bool,
    pub puffs_on: bool,
    pub rewards_on: bool,
    /// Hint interval (mean, sd)
    pub hint_interval: (f64, f64),
    pub go_cue: GoCue,
    /// ITI only ends once the subject moves
    pub motion_control: bool,
    /// Retract ports outside the response window
    pub retract_ports: bool,
    pub stim_valve_duration: f64,
    pub reward_valve_duration: [f64; 2],
    pub sensor_rate_hz: f64,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            intro_duration: DEFAULT_INTRO_DURATION,
            lick_duration: DEFAULT_LICK_DURATION,
            reward_duration: DEFAULT_REWARD_DURATION,
            iti_duration: DEFAULT_ITI_DURATION,
            penalty_iti_frac: DEFAULT_PENALTY_ITI_FRAC,
            hold_rule: true,
            use_trials: true,
            puffs_on: true,
            rewards_on: true,
            hint_interval: DEFAULT_HINT_INTERVAL,
            go_cue: GoCue::None,
            motion_control: false,
            retract_ports: true,
            stim_valve_duration: DEFAULT_STIM_VALVE_DURATION,
            reward_valve_duration: DEFAULT_REWARD_VALVE_DURATION,
            sensor_rate_hz: DEFAULT_SENSOR_RATE_HZ,
        }
    }
}

/// Event logger buffering.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggerSettings {
    pub flush_threshold: usize,
    /// Smaller per-kind thresholds for high-rate kinds, keyed by kind name
    pub forced_flush: BTreeMap<String, usize>,
}

impl Default for LoggerSettings {
    fn default() -> Self {
        let mut forced_flush = BTreeMap::new();
        forced_flush.insert("analog".to_string(), ANALOG_FORCED_FLUSH);
        Self {
            flush_threshold: DEFAULT_FLUSH_THRESHOLD,
            forced_flush,
        }
    }
}

/// Complete rig configuration.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RigConfig {
    pub session: SessionSettings,
    pub trial: TrialParams,
    pub engine: EngineSettings,
    pub logger: LoggerSettings,
    /// Replaces the built-in level ladder when present
    pub levels: Option<Vec<Level>>,
}

impl RigConfig {
    /// Load settings with priority: explicit path > local file > template > defaults.
    ///
    /// An explicit path that cannot be read or parsed is an error; the
    /// fallback files only produce warnings.
    pub fn load(path: Option<&Path>) -> RigResult<Self> {
        if let Some(path) = path {
            let content = fs::read_to_string(path)?;
            let config = Self::from_toml_str(&content)?;
            info!("Loaded rig config from {}", path.display());
            return Ok(config);
        }

        for file in [CONFIG_FILE, CONFIG_TEMPLATE_FILE] {
            let candidate = Path::new(file);
            if !candidate.exists() {
                continue;
            }
            match fs::read_to_string(candidate)
                .map_err(RigError::from)
                .and_then(|content| Self::from_toml_str(&content))
            {
                Ok(config) => {
                    info!("Loaded rig config from {}", file);
                    return Ok(config);
                }
                Err(e) => warn!("Failed to load {}: {}", file, e),
            }
        }

        info!("No rig config found, using defaults");
        Ok(Self::default())
    }

    pub fn from_toml_str(content: &str) -> RigResult<Self> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject configs the trial engine cannot run with.
    pub fn validate(&self) -> RigResult<()> {
        let t = &self.trial;
        if !(t.rate_sum.is_finite() && t.rate_sum > 0.0) {
            return Err(RigError::Config(format!("rate_sum must be positive: {}", t.rate_sum)));
        }
        if !(t.min_isi.is_finite() && t.min_isi >= 0.0) {
            return Err(RigError::Config(format!("min_isi must be non-negative: {}", t.min_isi)));
        }
        if t.stim_phase_pad.0 < 0.0 || t.stim_phase_pad.1 < 0.0 {
            return Err(RigError::Config("stim_phase_pad must be non-negative".into()));
        }
        if t.correction_window == 0 {
            return Err(RigError::Config("correction_window must be at least 1".into()));
        }
        if t.antibias_reward_scales.is_empty() {
            return Err(RigError::Config("antibias_reward_scales is empty".into()));
        }
        t.stim_phase_duration.validate()?;
        t.delay_phase_duration.validate()?;

        if self.session.tick_interval <= 0.0 {
            return Err(RigError::Config("tick_interval must be positive".into()));
        }
        let (hint_mean, hint_sd) = self.engine.hint_interval;
        if !(hint_mean.is_finite() && hint_sd.is_finite() && hint_sd >= 0.0) {
            return Err(RigError::Config(format!(
                "hint_interval must be (finite mean, non-negative sd): ({}, {})",
                hint_mean, hint_sd
            )));
        }
        if self.engine.sensor_rate_hz <= 0.0 {
            return Err(RigError::Config("sensor_rate_hz must be positive".into()));
        }
        if self.logger.flush_threshold == 0 {
            return Err(RigError::Config("flush_threshold must be at least 1".into()));
        }
        self.session_manipulation()?;
        self.level_table()?;
        Ok(())
    }

    /// Level table from the config, or the standard ladder.
    pub fn level_table(&self) -> RigResult<LevelTable> {
        match &self.levels {
            Some(levels) => LevelTable::new(levels.clone()),
            None => Ok(LevelTable::standard()),
        }
    }

    /// Session manipulation preset.
    pub fn session_manipulation(&self) -> RigResult<ManipulationSpec> {
        ManipulationSpec::preset(&self.session.manipulation).ok_or_else(|| {
            RigError::Config(format!(
                "unknown manipulation '{}' (expected one of {:?})",
                self.session.manipulation,
                ManipulationSpec::PRESET_NAMES
            ))
        })
    }

    /// Snapshot persisted with the session metadata.
    pub fn to_json(&self) -> RigResult<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Apply CLI argument overrides
    pub fn apply_cli_overrides(&mut self, args: &[String]) {
        let mut i = 1;
        while i < args.len() {
            match args[i].as_str() {
                "--subject" | "-s" => {
                    if let Some(val) = args.get(i + 1) {
                        self.session.subject = val.clone();
                        i += 1;
                    }
                }
                "--subject-id" => {
                    if let Some(val) = args.get(i + 1) {
                        if let Ok(n) = val.parse() {
                            self.session.subject_id = n;
                        }
                        i += 1;
                    }
                }
                "--condition" => {
                    if let Some(val) = args.get(i + 1) {
                        self.session.condition = Some(val.clone());
                        i += 1;
                    }
                }
                "--manipulation" | "-m" => {
                    if let Some(val) = args.get(i + 1) {
                        self.session.manipulation = val.clone();
                        i += 1;
                    }
                }
                "--level" | "-l" => {
                    if let Some(val) = args.get(i + 1) {
                        if let Ok(n) = val.parse() {
                            self.trial.start_level = Some(n);
                        }
                        i += 1;
                    }
                }
                "--trials" | "-n" => {
                    if let Some(val) = args.get(i + 1) {
                        if let Ok(n) = val.parse() {
                            self.session.max_trials = Some(n);
                        }
                        i += 1;
                    }
                }
                "--seed" => {
                    if let Some(val) = args.get(i + 1) {
                        if let Ok(n) = val.parse() {
                            self.session.seed = Some(n);
                        }
                        i += 1;
                    }
                }
                "--data" | "-d" => {
                    if let Some(val) = args.get(i + 1) {
                        self.session.data_file = val.clone();
                        i += 1;
                    }
                }
                "--go-cue" => {
                    if let Some(val) = args.get(i + 1) {
                        match val.to_lowercase().as_str() {
                            "none" => self.engine.go_cue = GoCue::None,
                            "light" => self.engine.go_cue = GoCue::Light,
                            "sound" => self.engine.go_cue = GoCue::Sound,
                            "both" => self.engine.go_cue = GoCue::Both,
                            _ => {}
                        }
                        i += 1;
                    }
                }
                "--no-bias-correction" => self.trial.bias_correction = false,
                "--no-rewards" => self.engine.rewards_on = false,
                // Consumed by the binary before config is loaded
                "--config" | "-c" => i += 1,
                _ => {}
            }
            i += 1;
        }
    }
}

/// Value of `--config`/`-c` if given.
pub fn config_path_from_args(args: &[String]) -> Option<&str> {
    args.iter()
        .position(|a| a == "--config" || a == "-c")
        .and_then(|i| args.get(i + 1))
        .map(|s| s.as_str())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        std::iter::once("trialrig")
            .chain(list.iter().copied())
            .map(String::from)
            .collect()
    }

    #[test]
    fn test_default_config_valid() {
        assert!(RigConfig::default().validate().is_ok());
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = RigConfig::from_toml_str(
            r#"
            [session]
            subject = "m12"
            subject_id = 12

            [trial]
            rate_sum = 3.0
            "#,
        )
        .unwrap();
        assert_eq!(config.session.subject, "m12");
        assert_eq!(config.trial.rate_sum, 3.0);
        assert_eq!(config.trial.min_isi, DEFAULT_MIN_ISI);
        assert_eq!(config.logger.forced_flush.get("analog"), Some(&ANALOG_FORCED_FLUSH));
        assert_eq!(config.level_table().unwrap().len(), 9);
    }

    #[test]
    fn test_unknown_manipulation_rejected() {
        let result = RigConfig::from_toml_str("[session]\nmanipulation = \"laser\"\n");
        assert!(matches!(result, Err(RigError::Config(_))));
    }

    #[test]
    fn test_bad_rate_sum_rejected() {
        let result = RigConfig::from_toml_str("[trial]\nrate_sum = 0.0\n");
        assert!(result.is_err());
    }

    #[test]
    fn test_negative_hint_sd_rejected() {
        let result = RigConfig::from_toml_str("[engine]\nhint_interval = [0.4, -0.1]\n");
        assert!(matches!(result, Err(RigError::Config(_))));
    }

    #[test]
    fn test_cli_overrides() {
        let mut config = RigConfig::default();
        config.apply_cli_overrides(&args(&[
            "--config",
            "x.toml",
            "-s",
            "m7",
            "--level",
            "3",
            "-n",
            "20",
            "--go-cue",
            "both",
            "--no-bias-correction",
        ]));
        assert_eq!(config.session.subject, "m7");
        assert_eq!(config.trial.start_level, Some(3));
        assert_eq!(config.session.max_trials, Some(20));
        assert_eq!(config.engine.go_cue, GoCue::Both);
        assert!(!config.trial.bias_correction);
    }

    #[test]
    fn test_config_path_from_args() {
        assert_eq!(config_path_from_args(&args(&["-c", "rig.toml"])), Some("rig.toml"));
        assert_eq!(config_path_from_args(&args(&["-v"])), None);
    }

    #[test]
    fn test_template_matches_defaults() {
        let template = include_str!("../../config/rig.template.toml");
        let config = RigConfig::from_toml_str(template).unwrap();
        assert_eq!(config, RigConfig::default());
    }

    #[test]
    fn test_config_json_snapshot() {
        let json = RigConfig::default().to_json().unwrap();
        assert!(json.contains("\"rate_sum\":2.5"));
    }
}
