//! Lick rules
//!
//! A rule is a bundle of policy flags deciding which licks count, whether
//! licking during stimulus/delay aborts the trial, and whether hints or
//! multiple tries are allowed.

use serde::{Deserialize, Serialize};

/// Policy flags of a rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rule {
    /// Licks must happen in the response window to count
    pub any: bool,
    /// Only the correct side is rewarded
    pub side: bool,
    /// Licking before the response window aborts the trial
    pub phase: bool,
    /// Wrong-side licks are tolerated (multiple tries)
    pub fault: bool,
    /// Correct-side hint stimuli during delay and lick phases
    pub hint_delay: bool,
    /// Correct-side hint stimuli during the reward phase
    pub hint_reward: bool,
}

/// Named rules referenced by levels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleId {
    Full,
    Passive,
    Phase,
    Fault,
    Hint,
}

impl RuleId {
    pub const ALL: [RuleId; 5] = [
        RuleId::Full,
        RuleId::Passive,
        RuleId::Phase,
        RuleId::Fault,
        RuleId::Hint,
    ];

    /// Flags for this rule.
    pub const fn rule(self) -> Rule {
        match self {
            RuleId::Full => Rule {
                any: true,
                side: true,
                phase: true,
                fault: false,
                hint_delay: false,
                hint_reward: false,
            },
            RuleId::Passive => Rule {
                any: false,
                side: false,
                phase: false,
                fault: true,
                hint_delay: true,
                hint_reward: false,
            },
            RuleId::Phase => Rule {
                any: true,
                side: true,
                phase: true,
                fault: true,
                hint_delay: false,
                hint_reward: false,
            },
            RuleId::Fault => Rule {
                any: true,
                side: true,
                phase: true,
                fault: true,
                hint_delay: true,
                hint_reward: false,
            },
            RuleId::Hint => Rule {
                any: true,
                side: true,
                phase: true,
                fault: false,
                hint_delay: true,
                hint_reward: false,
            },
        }
    }

    /// Stable numeric id used in stored trial rows.
    pub fn code(self) -> i64 {
        match self {
            RuleId::Full => 0,
            RuleId::Passive => 1,
            RuleId::Phase => 2,
            RuleId::Fault => 3,
            RuleId::Hint => 4,
        }
    }

    pub fn from_code(code: i64) -> Option<RuleId> {
        Self::ALL.into_iter().find(|r| r.code() == code)
    }
}

impl std::fmt::Display for RuleId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            RuleId::Full => "full",
            RuleId::Passive => "passive",
            RuleId::Phase => "phase",
            RuleId::Fault => "fault",
            RuleId::Hint => "hint",
        };
        write!(f, "{}", name)
    }
}
