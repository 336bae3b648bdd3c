//! Trial phases

use serde::{Deserialize, Serialize};

/// Phases of one trial, in traversal order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Intro,
    Stim,
    Delay,
    Lick,
    Reward,
    Iti,
    End,
}

impl Phase {
    pub const ORDER: [Phase; 7] = [
        Phase::Intro,
        Phase::Stim,
        Phase::Delay,
        Phase::Lick,
        Phase::Reward,
        Phase::Iti,
        Phase::End,
    ];

    /// Stored numeric id.
    pub fn code(self) -> i64 {
        self as i64
    }

    pub fn from_code(code: i64) -> Option<Phase> {
        usize::try_from(code).ok().and_then(|i| Self::ORDER.get(i).copied())
    }

    /// Phase that follows on normal timeout.
    pub fn next(self) -> Phase {
        match self {
            Phase::Intro => Phase::Stim,
            Phase::Stim => Phase::Delay,
            Phase::Delay => Phase::Lick,
            Phase::Lick => Phase::Reward,
            Phase::Reward => Phase::Iti,
            Phase::Iti | Phase::End => Phase::End,
        }
    }

    /// Phases whose timers stop while the session is paused.
    pub fn freezes_on_pause(self) -> bool {
        matches!(self, Phase::Intro | Phase::Stim | Phase::Delay | Phase::Lick)
    }

    /// Phases that may jump straight to ITI.
    pub fn can_abort(self) -> bool {
        self.freezes_on_pause()
    }

    pub fn name(self) -> &'static str {
        match self {
            Phase::Intro => "intro",
            Phase::Stim => "stim",
            Phase::Delay => "delay",
            Phase::Lick => "lick",
            Phase::Reward => "reward",
            Phase::Iti => "iti",
            Phase::End => "end",
        }
    }
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes_round_trip_order() {
        for (i, phase) in Phase::ORDER.iter().enumerate() {
            assert_eq!(phase.code(), i as i64);
            assert_eq!(Phase::from_code(i as i64), Some(*phase));
        }
        assert_eq!(Phase::from_code(7), None);
        assert_eq!(Phase::from_code(-1), None);
    }

    #[test]
    fn test_next_walks_sequence() {
        let mut phase = Phase::Intro;
        let mut seen = vec![phase];
        while phase != Phase::End {
            phase = phase.next();
            seen.push(phase);
        }
        assert_eq!(seen, Phase::ORDER.to_vec());
        assert!(!Phase::Reward.freezes_on_pause());
        assert!(Phase::Lick.freezes_on_pause());
    }
}
