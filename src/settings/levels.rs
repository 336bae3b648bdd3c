//! Training levels
//!
//! Levels are the ordered steps of training and the criteria required to
//! advance past each one. The position of a level in the table is stored with
//! every trial and used to resume training in later sessions, so entries must
//! not be reordered once subjects have trained on them.
//!
//! Optional fields fall back in this order: level value, then the session's
//! trial parameters (durations) or session manipulation.

use rand::Rng;
use rand::distributions::{Distribution, WeightedIndex};
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};

use super::manipulations::ManipulationSpec;
use super::rules::RuleId;
use crate::error::{RigError, RigResult};

/// Advancement thresholds evaluated over the trials of one level.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Criteria {
    /// Minimum valid trials done at this level
    pub n: usize,
    /// Window of contiguous trials the remaining checks look at
    pub win: usize,
    /// Minimum fraction correct among valid trials in the window
    pub perc: f64,
    /// Maximum normalized per-side accuracy
    pub bias: f64,
    /// Minimum fraction of valid trials in the window
    pub valid: f64,
}

impl Criteria {
    /// Transient criteria for one intro ladder step.
    pub fn intro(count: usize) -> Self {
        Self {
            n: count,
            win: count,
            perc: 0.0,
            bias: 1.0,
            valid: 0.0,
        }
    }
}

/// Evidence ratio: one value or a uniform choice among several.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RatioSpec {
    Fixed(f64),
    Choices(Vec<f64>),
}

impl RatioSpec {
    pub fn sample<R: Rng>(&self, rng: &mut R) -> RigResult<f64> {
        match self {
            RatioSpec::Fixed(r) => Ok(*r),
            RatioSpec::Choices(rs) => rs
                .choose(rng)
                .copied()
                .ok_or_else(|| RigError::Precondition("empty ratio choices".into())),
        }
    }

    fn values(&self) -> Vec<f64> {
        match self {
            RatioSpec::Fixed(r) => vec![*r],
            RatioSpec::Choices(rs) => rs.clone(),
        }
    }
}

/// Discrete duration distribution (seconds).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DurationChoice {
    pub values: Vec<f64>,
    pub probs: Vec<f64>,
}

impl DurationChoice {
    pub fn fixed(value: f64) -> Self {
        Self {
            values: vec![value],
            probs: vec![1.0],
        }
    }

    pub fn sample<R: Rng>(&self, rng: &mut R) -> RigResult<f64> {
        let dist = WeightedIndex::new(&self.probs)
            .map_err(|e| RigError::Precondition(format!("bad duration probabilities: {}", e)))?;
        self.values
            .get(dist.sample(rng))
            .copied()
            .ok_or_else(|| RigError::Precondition("duration values/probs length mismatch".into()))
    }

    pub fn validate(&self) -> RigResult<()> {
        if self.values.is_empty() || self.values.len() != self.probs.len() {
            return Err(RigError::Config(format!(
                "duration has {} values but {} probabilities",
                self.values.len(),
                self.probs.len()
            )));
        }
        if self.values.iter().any(|v| !v.is_finite() || *v < 0.0) {
            return Err(RigError::Config(format!(
                "durations must be finite and non-negative: {:?}",
                self.values
            )));
        }
        WeightedIndex::new(&self.probs)
            .map_err(|e| RigError::Config(format!("bad duration probabilities: {}", e)))?;
        Ok(())
    }
}

/// One step of an intro ladder: run `count` trials at `level`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntroStep {
    pub level: usize,
    pub count: usize,
}

/// A single training level.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Level {
    pub name: String,
    pub criteria: Criteria,
    pub rule: RuleId,
    pub ratio: RatioSpec,
    /// None = session manipulation
    #[serde(default)]
    pub manipulation: Option<ManipulationSpec>,
    /// None = session default stimulus duration
    #[serde(default)]
    pub stim_phase_dur: Option<DurationChoice>,
    /// None = session default delay
    #[serde(default)]
    pub delay_phase_dur: Option<DurationChoice>,
    /// Synchronized bilateral pair at (start, end) of the train
    pub stereo: [bool; 2],
    /// Force left/right alternation by trial parity
    #[serde(default)]
    pub alternate: bool,
    /// Training level (alternation may apply during intros)
    #[serde(default)]
    pub is_training: bool,
    /// Allow micromanipulator bias nudges
    #[serde(default)]
    pub nudge_enabled: bool,
    /// Ladder re-introducing this level at session start
    #[serde(default)]
    pub intro: Vec<IntroStep>,
}

// =============================================================================
// DEFAULT RATIOS AND DURATIONS
// =============================================================================

pub const DEFAULT_RATIO: f64 = 8.0;
pub const INTRO_RATIOS: [f64; 3] = [8.0, 4.0, 2.5];
pub const FINAL_RATIOS: [f64; 4] = [8.0, 4.0, 2.5, 1.5];
pub const HARD_RATIOS: [f64; 2] = [1.5, 1.25];

/// Session-wide stimulus duration used when a level leaves it open.
pub fn default_stim_phase_duration() -> DurationChoice {
    DurationChoice {
        values: vec![1.0, 2.0, 3.8],
        probs: vec![0.25, 0.25, 0.5],
    }
}

/// Session-wide delay used when a level leaves it open.
pub fn default_delay_phase_duration() -> DurationChoice {
    DurationChoice {
        values: vec![0.2, 1.0, 2.0],
        probs: vec![0.5, 0.25, 0.25],
    }
}

fn short_stim() -> DurationChoice {
    DurationChoice::fixed(1.0)
}

fn short_long_stim() -> DurationChoice {
    DurationChoice {
        values: vec![1.0, 3.8],
        probs: vec![0.5, 0.5],
    }
}

fn long_delay() -> DurationChoice {
    DurationChoice::fixed(1.0)
}

fn criteria(n: usize, win: usize, perc: f64, bias: f64, valid: f64) -> Criteria {
    Criteria {
        n,
        win,
        perc,
        bias,
        valid,
    }
}

fn intro(steps: &[(usize, usize)]) -> Vec<IntroStep> {
    steps
        .iter()
        .map(|&(level, count)| IntroStep { level, count })
        .collect()
}

/// Ordered, immutable level table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LevelTable {
    levels: Vec<Level>,
}

impl Default for LevelTable {
    fn default() -> Self {
        Self::standard()
    }
}

impl LevelTable {
    pub fn new(levels: Vec<Level>) -> RigResult<Self> {
        let table = Self { levels };
        table.validate()?;
        Ok(table)
    }

    /// The nine-level ladder: free rewards, multiple tries, hints, full rule,
    /// performance, and progressively harder ratios.
    pub fn standard() -> Self {
        let full = |name: &str, c: Criteria, ratio: RatioSpec, training: bool, steps: &[(usize, usize)]| Level {
            name: name.to_string(),
            criteria: c,
            rule: RuleId::Full,
            ratio,
            manipulation: None,
            stim_phase_dur: None,
            delay_phase_dur: None,
            stereo: [true, true],
            alternate: false,
            is_training: training,
            nudge_enabled: true,
            intro: intro(steps),
        };

        let levels = vec![
            Level {
                name: "free_rewards".into(),
                criteria: criteria(15, 15, 0.0, 1.0, 0.9),
                rule: RuleId::Passive,
                ratio: RatioSpec::Fixed(DEFAULT_RATIO),
                manipulation: Some(ManipulationSpec::default()),
                stim_phase_dur: Some(short_stim()),
                delay_phase_dur: None,
                stereo: [true, false],
                alternate: true,
                is_training: false,
                nudge_enabled: true,
                intro: Vec::new(),
            },
            Level {
                name: "multiple_tries".into(),
                criteria: criteria(100, 40, 0.55, 0.6, 0.5),
                rule: RuleId::Fault,
                ratio: RatioSpec::Fixed(DEFAULT_RATIO),
                manipulation: Some(ManipulationSpec::default()),
                stim_phase_dur: Some(short_stim()),
                delay_phase_dur: Some(long_delay()),
                stereo: [true, false],
                alternate: false,
                is_training: true,
                nudge_enabled: true,
                intro: intro(&[(0, 6)]),
            },
            Level {
                name: "hints".into(),
                criteria: criteria(200, 50, 0.8, 0.6, 0.6),
                rule: RuleId::Hint,
                ratio: RatioSpec::Fixed(DEFAULT_RATIO),
                manipulation: Some(ManipulationSpec::default()),
                stim_phase_dur: Some(short_stim()),
                delay_phase_dur: Some(long_delay()),
                stereo: [true, true],
                alternate: false,
                is_training: true,
                nudge_enabled: true,
                intro: intro(&[(1, 14)]),
            },
            Level {
                stim_phase_dur: Some(short_long_stim()),
                manipulation: Some(ManipulationSpec::default()),
                ..full(
                    "full_rule",
                    criteria(100, 40, 0.75, 0.6, 0.6),
                    RatioSpec::Fixed(DEFAULT_RATIO),
                    true,
                    &[(2, 30)],
                )
            },
            Level {
                manipulation: Some(ManipulationSpec::default()),
                ..full(
                    "full_training",
                    criteria(100, 40, 0.80, 0.6, 0.6),
                    RatioSpec::Fixed(DEFAULT_RATIO),
                    true,
                    &[(2, 15), (3, 15)],
                )
            },
            full(
                "full_performance",
                criteria(25, 24, 0.80, 0.6, 0.6),
                RatioSpec::Fixed(DEFAULT_RATIO),
                false,
                &[(4, 25)],
            ),
            full(
                "no_hardest",
                criteria(250, 40, 0.78, 0.7, 0.8),
                RatioSpec::Choices(INTRO_RATIOS.to_vec()),
                false,
                &[(4, 10), (5, 10)],
            ),
            full(
                "full_task",
                criteria(950, 50, 0.87, 0.7, 0.9),
                RatioSpec::Choices(FINAL_RATIOS.to_vec()),
                false,
                &[(4, 8), (5, 8), (6, 10)],
            ),
            full(
                "extra_hard",
                criteria(500_000, 500, 0.9, 0.5, 0.9),
                RatioSpec::Choices(HARD_RATIOS.to_vec()),
                false,
                &[(4, 12), (5, 12), (6, 30), (7, 80)],
            ),
        ];
        Self { levels }
    }

    pub fn len(&self) -> usize {
        self.levels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.levels.is_empty()
    }

    pub fn last_index(&self) -> usize {
        self.levels.len().saturating_sub(1)
    }

    /// Level at `idx`, clamped into the table.
    pub fn get(&self, idx: usize) -> &Level {
        &self.levels[idx.min(self.last_index())]
    }

    pub fn iter(&self) -> impl Iterator<Item = &Level> {
        self.levels.iter()
    }

    /// Check the table is usable before a session starts.
    pub fn validate(&self) -> RigResult<()> {
        if self.levels.is_empty() {
            return Err(RigError::Config("level table is empty".into()));
        }
        for (i, level) in self.levels.iter().enumerate() {
            let c = &level.criteria;
            if c.win == 0 {
                return Err(RigError::Config(format!("level {} has a zero window", i)));
            }
            for (name, v) in [("perc", c.perc), ("bias", c.bias), ("valid", c.valid)] {
                if !(0.0..=1.0).contains(&v) {
                    return Err(RigError::Config(format!(
                        "level {} criterion {} out of [0, 1]: {}",
                        i, name, v
                    )));
                }
            }
            let ratios = level.ratio.values();
            if ratios.is_empty() || ratios.iter().any(|r| !r.is_finite() || *r <= 0.0) {
                return Err(RigError::Config(format!(
                    "level {} has invalid ratios: {:?}",
                    i, ratios
                )));
            }
            if let Some(d) = &level.stim_phase_dur {
                d.validate()?;
            }
            if let Some(d) = &level.delay_phase_dur {
                d.validate()?;
            }
            if let Some(m) = &level.manipulation {
                m.validate()?;
            }
            if let Some(step) = level.intro.iter().find(|s| s.level >= self.levels.len()) {
                return Err(RigError::Config(format!(
                    "level {} intro references missing level {}",
                    i, step.level
                )));
            }
        }
        Ok(())
    }
}
