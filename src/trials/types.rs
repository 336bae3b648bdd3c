//! Trial data types

use serde::{Deserialize, Serialize};

use crate::settings::{Manipulation, RuleId};

/// Port side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Side {
    Left,
    Right,
}

impl Side {
    pub const BOTH: [Side; 2] = [Side::Left, Side::Right];

    pub fn index(self) -> usize {
        match self {
            Side::Left => 0,
            Side::Right => 1,
        }
    }

    pub fn from_index(idx: usize) -> Option<Side> {
        match idx {
            0 => Some(Side::Left),
            1 => Some(Side::Right),
            _ => None,
        }
    }

    pub fn opposite(self) -> Side {
        match self {
            Side::Left => Side::Right,
            Side::Right => Side::Left,
        }
    }

    /// Alternation side for trial `idx`: even trials left, odd right.
    pub fn by_parity(idx: usize) -> Side {
        if idx % 2 == 0 { Side::Left } else { Side::Right }
    }
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Side::Left => write!(f, "L"),
            Side::Right => write!(f, "R"),
        }
    }
}

/// Resolved trial outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Incorrect,
    Correct,
    EarlyLeft,
    EarlyRight,
    Null,
    Killed,
}

impl Outcome {
    pub const ALL: [Outcome; 6] = [
        Outcome::Incorrect,
        Outcome::Correct,
        Outcome::EarlyLeft,
        Outcome::EarlyRight,
        Outcome::Null,
        Outcome::Killed,
    ];

    /// Correct and incorrect trials are the only ones used for performance.
    pub fn is_valid(self) -> bool {
        matches!(self, Outcome::Correct | Outcome::Incorrect)
    }

    pub fn is_correct(self) -> bool {
        self == Outcome::Correct
    }

    /// Early-lick outcome for a lick on `side`.
    pub fn early(side: Side) -> Outcome {
        match side {
            Side::Left => Outcome::EarlyLeft,
            Side::Right => Outcome::EarlyRight,
        }
    }

    pub fn code(self) -> i64 {
        match self {
            Outcome::Incorrect => 0,
            Outcome::Correct => 1,
            Outcome::EarlyLeft => 2,
            Outcome::EarlyRight => 3,
            Outcome::Null => 4,
            Outcome::Killed => 5,
        }
    }

    pub fn from_code(code: i64) -> Option<Outcome> {
        Self::ALL.into_iter().find(|o| o.code() == code)
    }

    pub fn name(self) -> &'static str {
        match self {
            Outcome::Incorrect => "incorrect",
            Outcome::Correct => "correct",
            Outcome::EarlyLeft => "early_left",
            Outcome::EarlyRight => "early_right",
            Outcome::Null => "null",
            Outcome::Killed => "killed",
        }
    }
}

/// One stimulus in a trial's timeline. `time` is seconds from STIM onset.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StimulusEvent {
    pub side: Side,
    pub time: f64,
}

/// Trial descriptor. Fields after `outcome` are filled in by `end_trial`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trial {
    pub idx: usize,
    pub start: f64,
    /// Stimulus train duration (without phase padding)
    pub dur: f64,
    /// rate_right / rate_left of the generated train
    pub ratio: f64,
    pub n_left_intended: usize,
    pub n_right_intended: usize,
    pub side: Side,
    pub condition: Option<String>,
    pub manipulation: Manipulation,
    pub delay: f64,
    pub rule: RuleId,
    pub level: usize,
    pub reward_scale: f64,
    /// Normalized left accuracy used as P(right) for this draw (0.5 = unbiased)
    pub draw_p: f64,
    pub outcome: Option<Outcome>,
    pub reward: bool,
    pub end: Option<f64>,
    pub n_left: Option<usize>,
    pub n_right: Option<usize>,
}

impl Trial {
    pub fn is_valid(&self) -> bool {
        self.outcome.is_some_and(Outcome::is_valid)
    }

    pub fn is_correct(&self) -> bool {
        self.outcome == Some(Outcome::Correct)
    }
}

#[cfg(test)]
pub(crate) fn finished_trial(idx: usize, side: Side, outcome: Outcome, level: usize) -> Trial {
    Trial {
        idx,
        start: idx as f64,
        dur: 1.0,
        ratio: 8.0,
        n_left_intended: 0,
        n_right_intended: 0,
        side,
        condition: None,
        manipulation: Manipulation::None,
        delay: 0.2,
        rule: RuleId::Full,
        level,
        reward_scale: 1.0,
        draw_p: 0.5,
        outcome: Some(outcome),
        reward: outcome == Outcome::Correct,
        end: Some(idx as f64 + 0.5),
        n_left: Some(0),
        n_right: Some(0),
    }
}
